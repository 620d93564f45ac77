use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::blob::BlobStream;
use crate::client::{BlobId, DbHandle, TxHandle};
use crate::connection::ConnectionInner;
use crate::cursor::{Cursor, Row};
use crate::error::SqlRuntimeError;
use crate::guard::{ResourceGuard, SharedPermit};
use crate::lifecycle::{ChildCounter, LifecycleState, StateCell};
use crate::marshal::BlobWriter;
use crate::statement::Statement;
use crate::translation::ParamValues;
use crate::types::{BlobRef, ConnectionId};

const NOT_STARTED: &str = "Need to open transaction";

pub(crate) struct TransactionInner {
    pub(crate) connection: Arc<ConnectionInner>,
    pub(crate) db: DbHandle,
    pub(crate) handle: TxHandle,
    guard: ResourceGuard,
    state: StateCell,
    pub(crate) statements: ChildCounter,
    pub(crate) blobs: ChildCounter,
}

impl TransactionInner {
    /// Shared permit for a data operation. Hold it until any child the operation
    /// opens has been counted.
    pub(crate) async fn ready(&self) -> Result<SharedPermit<'_>, SqlRuntimeError> {
        let permit = self.guard.share().await;
        self.state.ensure_active("transaction", NOT_STARTED)?;
        Ok(permit)
    }
}

/// An open transaction on a [`Connection`](crate::Connection).
///
/// Statements and blob streams opened here must be disposed or closed before the
/// transaction can commit or roll back.
#[derive(Clone)]
pub struct Transaction {
    pub(crate) inner: Arc<TransactionInner>,
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("handle", &self.inner.handle)
            .field("connection", &self.inner.connection.id)
            .field("state", &self.inner.state.get())
            .field("statements", &self.inner.statements.get())
            .field("blobs", &self.inner.blobs.get())
            .finish()
    }
}

impl Transaction {
    pub(crate) fn new(connection: Arc<ConnectionInner>, db: DbHandle, handle: TxHandle) -> Self {
        Self {
            inner: Arc::new(TransactionInner {
                connection,
                db,
                handle,
                guard: ResourceGuard::new(),
                state: StateCell::new(LifecycleState::Active),
                statements: ChildCounter::default(),
                blobs: ChildCounter::default(),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<TransactionInner>) -> Self {
        Self { inner }
    }

    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.inner.state.get()
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.inner.state.get() == LifecycleState::Active
    }

    #[must_use]
    pub fn connection_id(&self) -> ConnectionId {
        self.inner.connection.id
    }

    #[must_use]
    pub fn open_statement_count(&self) -> usize {
        self.inner.statements.get()
    }

    #[must_use]
    pub fn open_blob_count(&self) -> usize {
        self.inner.blobs.get()
    }

    fn ensure_no_children(&self) -> Result<(), SqlRuntimeError> {
        self.inner.statements.ensure_zero("transaction", "statement")?;
        self.inner.blobs.ensure_zero("transaction", "blob stream")
    }

    /// Commit and finish the transaction.
    ///
    /// # Errors
    /// `OpenChildren` while statements or blob streams are open,
    /// `AlreadyFinished` after commit or rollback, or the native client's failure.
    pub async fn commit(&self) -> Result<(), SqlRuntimeError> {
        let _permit = self.inner.guard.acquire().await;
        self.inner.state.ensure_active("transaction", NOT_STARTED)?;
        self.ensure_no_children()?;
        self.inner
            .connection
            .client
            .native()
            .commit(self.inner.handle)
            .await?;
        self.finish();
        debug!(transaction = self.inner.handle.0, "committed");
        Ok(())
    }

    /// Commit the work done so far and keep the transaction open.
    ///
    /// # Errors
    /// Same as [`Transaction::commit`].
    pub async fn commit_retaining(&self) -> Result<(), SqlRuntimeError> {
        let _permit = self.inner.guard.acquire().await;
        self.inner.state.ensure_active("transaction", NOT_STARTED)?;
        self.ensure_no_children()?;
        self.inner
            .connection
            .client
            .native()
            .commit_retaining(self.inner.handle)
            .await?;
        debug!(transaction = self.inner.handle.0, "committed (retaining)");
        Ok(())
    }

    /// Roll back and finish the transaction.
    ///
    /// # Errors
    /// Same as [`Transaction::commit`].
    pub async fn rollback(&self) -> Result<(), SqlRuntimeError> {
        let _permit = self.inner.guard.acquire().await;
        self.inner.state.ensure_active("transaction", NOT_STARTED)?;
        self.ensure_no_children()?;
        self.inner
            .connection
            .client
            .native()
            .rollback(self.inner.handle)
            .await?;
        self.finish();
        debug!(transaction = self.inner.handle.0, "rolled back");
        Ok(())
    }

    fn finish(&self) {
        self.inner.state.set(LifecycleState::Finished);
        self.inner.connection.transactions.release();
    }

    /// Prepare `sql`, rewriting named placeholders to positional markers.
    ///
    /// # Errors
    /// `NotReady` / `AlreadyFinished` when the transaction is not active,
    /// `UnrecognizedType` for unsupported column metadata, or the native client's
    /// failure.
    pub async fn prepare(&self, sql: &str) -> Result<Statement, SqlRuntimeError> {
        let _shared = self.inner.ready().await?;
        Statement::prepare(Arc::clone(&self.inner), sql).await
    }

    /// Prepare, execute and dispose a statement in one step.
    ///
    /// # Errors
    /// Any prepare or execute failure. The statement is disposed either way.
    pub async fn execute(
        &self,
        sql: &str,
        params: impl Into<ParamValues>,
    ) -> Result<(), SqlRuntimeError> {
        self.execute_returning(sql, params).await.map(|_| ())
    }

    /// Like [`Transaction::execute`] but hands back the singleton row produced by
    /// statements such as `INSERT ... RETURNING` or `EXECUTE PROCEDURE`.
    ///
    /// # Errors
    /// Any prepare or execute failure. The statement is disposed either way.
    pub async fn execute_returning(
        &self,
        sql: &str,
        params: impl Into<ParamValues>,
    ) -> Result<Option<Row>, SqlRuntimeError> {
        let statement = self.prepare(sql).await?;
        let outcome = statement.execute(params).await;
        statement.dispose().await?;
        outcome
    }

    /// Open a cursor over an ad-hoc query. Closing the cursor also disposes the
    /// statement prepared for it.
    ///
    /// # Errors
    /// Any prepare or open failure. On failure the statement is already disposed.
    pub async fn query(
        &self,
        sql: &str,
        params: impl Into<ParamValues>,
    ) -> Result<Cursor, SqlRuntimeError> {
        let statement = self.prepare(sql).await?;
        match statement.open_cursor_inner(params.into(), true).await {
            Ok(cursor) => Ok(cursor),
            Err(err) => {
                statement.dispose().await?;
                Err(err)
            }
        }
    }

    /// Create a new blob and open it for writing.
    ///
    /// # Errors
    /// `NotReady` / `AlreadyFinished` when the transaction is not active, or the
    /// native client's failure.
    pub async fn create_blob(&self) -> Result<BlobStream, SqlRuntimeError> {
        let _shared = self.inner.ready().await?;
        let reservation = self.inner.blobs.reserve();
        let (handle, id) = self
            .inner
            .connection
            .client
            .native()
            .create_blob(self.inner.db, self.inner.handle)
            .await?;
        reservation.keep();
        debug!(transaction = self.inner.handle.0, blob = handle.0, "blob created");
        Ok(BlobStream::new(
            Arc::clone(&self.inner),
            handle,
            BlobRef {
                id,
                connection: self.inner.connection.id,
            },
        ))
    }

    /// Open an existing blob for reading.
    ///
    /// # Errors
    /// `CrossConnectionBlob` for a blob that belongs to another connection,
    /// `NotReady` / `AlreadyFinished` when the transaction is not active, or the
    /// native client's failure.
    pub async fn open_blob(&self, blob: &BlobRef) -> Result<BlobStream, SqlRuntimeError> {
        if blob.connection != self.inner.connection.id {
            return Err(SqlRuntimeError::CrossConnectionBlob);
        }
        let _shared = self.inner.ready().await?;
        let reservation = self.inner.blobs.reserve();
        let handle = self
            .inner
            .connection
            .client
            .native()
            .open_blob(self.inner.db, self.inner.handle, blob.id)
            .await?;
        reservation.keep();
        debug!(transaction = self.inner.handle.0, blob = handle.0, "blob opened");
        Ok(BlobStream::new(Arc::clone(&self.inner), handle, *blob))
    }

    /// Read a whole blob.
    ///
    /// # Errors
    /// Any open or read failure. The stream is closed either way.
    pub async fn read_blob(&self, blob: &BlobRef) -> Result<Vec<u8>, SqlRuntimeError> {
        let stream = self.open_blob(blob).await?;
        let data = stream.read_to_end().await;
        stream.close().await?;
        data
    }

    /// Store `data` in a new blob and return its reference.
    ///
    /// # Errors
    /// Any create or write failure. A failed write cancels the new blob.
    pub async fn write_blob(&self, data: &[u8]) -> Result<BlobRef, SqlRuntimeError> {
        let stream = self.create_blob().await?;
        if let Err(err) = stream.write(data).await {
            stream.cancel().await?;
            return Err(err);
        }
        let blob = *stream.blob_ref();
        stream.close().await?;
        Ok(blob)
    }
}

#[async_trait]
impl BlobWriter for Transaction {
    fn connection_id(&self) -> ConnectionId {
        self.inner.connection.id
    }

    async fn write_new_blob(&self, data: &[u8]) -> Result<BlobId, SqlRuntimeError> {
        self.write_blob(data).await.map(|blob| blob.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConnectionOptions, TransactionOptions};
    use crate::connection::Connection;
    use crate::test_utils::MockClient;
    use crate::types::Value;

    async fn begin(mock: &MockClient) -> (Connection, Transaction) {
        let conn = Connection::new(mock.library(), ConnectionOptions::new("t.fdb"));
        conn.connect().await.unwrap();
        let tx = conn
            .start_transaction(&TransactionOptions::default())
            .await
            .unwrap();
        (conn, tx)
    }

    #[tokio::test]
    async fn commit_waits_for_statements() {
        let mock = MockClient::new();
        let (conn, tx) = begin(&mock).await;
        let stmt = tx.prepare("DELETE FROM T").await.unwrap();

        let err = tx.commit().await.unwrap_err();
        assert!(matches!(
            err,
            SqlRuntimeError::OpenChildren {
                entity: "transaction",
                child: "statement",
                count: 1
            }
        ));
        assert!(tx.is_active());

        stmt.dispose().await.unwrap();
        tx.commit().await.unwrap();
        assert!(matches!(
            tx.commit().await,
            Err(SqlRuntimeError::AlreadyFinished(_))
        ));
        assert_eq!(conn.open_transaction_count(), 0);
    }

    #[tokio::test]
    async fn commit_retaining_keeps_transaction_open() {
        let mock = MockClient::new();
        let (conn, tx) = begin(&mock).await;
        tx.commit_retaining().await.unwrap();
        assert!(tx.is_active());
        assert_eq!(conn.open_transaction_count(), 1);
        tx.rollback().await.unwrap();
        assert_eq!(tx.state(), LifecycleState::Finished);
        assert!(matches!(
            tx.prepare("SELECT 1 FROM RDB$DATABASE").await,
            Err(SqlRuntimeError::AlreadyFinished(_))
        ));
    }

    #[tokio::test]
    async fn failed_commit_leaves_transaction_active() {
        let mock = MockClient::new();
        let (conn, tx) = begin(&mock).await;
        mock.fail_next("commit");
        assert!(matches!(tx.commit().await, Err(SqlRuntimeError::Native(_))));
        assert!(tx.is_active());
        assert_eq!(conn.open_transaction_count(), 1);
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn execute_disposes_its_statement() {
        let mock = MockClient::new();
        mock.script_statement(
            "UPDATE T SET A = :a WHERE ID = :id",
            MockClient::statement()
                .input(crate::marshal::SqlType::Varying, 10)
                .input(crate::marshal::SqlType::Int64, 8),
        );
        let (_conn, tx) = begin(&mock).await;
        tx.execute(
            "UPDATE T SET A = :a WHERE ID = :id",
            ParamValues::named([("id", Value::Int(3)), ("a", Value::from("x"))]),
        )
        .await
        .unwrap();
        assert_eq!(tx.open_statement_count(), 0);
        let executed = mock.executed();
        assert_eq!(executed.len(), 1);
        assert_eq!(executed[0].1, vec![Value::Text("x".into()), Value::Int(3)]);

        let err = tx.execute("UPDATE T SET A = :a WHERE ID = :id", ParamValues::named([("a", "y")]))
            .await
            .unwrap_err();
        assert!(matches!(err, SqlRuntimeError::MissingParameter { ref name, .. } if name == "id"));
        assert_eq!(tx.open_statement_count(), 0);
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn blobs_are_counted_until_closed() {
        let mock = MockClient::new();
        let (_conn, tx) = begin(&mock).await;
        let stream = tx.create_blob().await.unwrap();
        assert_eq!(tx.open_blob_count(), 1);
        assert!(matches!(
            tx.commit().await,
            Err(SqlRuntimeError::OpenChildren { child: "blob stream", .. })
        ));
        stream.write(b"abc").await.unwrap();
        let blob = *stream.blob_ref();
        stream.close().await.unwrap();

        assert_eq!(tx.read_blob(&blob).await.unwrap(), b"abc");
        assert_eq!(tx.open_blob_count(), 0);
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn foreign_blobs_cannot_be_opened() {
        let mock = MockClient::new();
        let (_conn, tx) = begin(&mock).await;
        let foreign = BlobRef {
            id: BlobId([1; 8]),
            connection: ConnectionId::from_raw(u64::MAX),
        };
        assert!(matches!(
            tx.open_blob(&foreign).await,
            Err(SqlRuntimeError::CrossConnectionBlob)
        ));
        assert_eq!(tx.open_blob_count(), 0);
    }

    #[tokio::test]
    async fn blob_writer_binds_blob_to_connection() {
        let mock = MockClient::new();
        let (conn, tx) = begin(&mock).await;
        let writer: &dyn BlobWriter = &tx;
        assert_eq!(writer.connection_id(), conn.id());
        let id = writer.write_new_blob(b"payload").await.unwrap();
        let blob = BlobRef {
            id,
            connection: conn.id(),
        };
        assert_eq!(tx.read_blob(&blob).await.unwrap(), b"payload");
        assert_eq!(tx.open_blob_count(), 0);
    }
}

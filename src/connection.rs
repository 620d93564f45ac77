use std::fmt;
use std::sync::{Arc, OnceLock};

use tracing::debug;

use crate::client::{ClientLibrary, DbHandle};
use crate::config::{ConnectionOptions, TransactionOptions};
use crate::cursor::Row;
use crate::error::SqlRuntimeError;
use crate::guard::ResourceGuard;
use crate::lifecycle::{ChildCounter, LifecycleState, StateCell};
use crate::transaction::Transaction;
use crate::translation::{ParamValues, PlaceholderAnalyzer};
use crate::types::ConnectionId;

const NOT_CONNECTED: &str = "Need database connection";

pub(crate) struct ConnectionInner {
    pub(crate) id: ConnectionId,
    pub(crate) client: ClientLibrary,
    pub(crate) options: ConnectionOptions,
    pub(crate) analyzer: PlaceholderAnalyzer,
    handle: OnceLock<DbHandle>,
    guard: ResourceGuard,
    state: StateCell,
    pub(crate) transactions: ChildCounter,
}

impl ConnectionInner {
    pub(crate) fn handle(&self) -> Result<DbHandle, SqlRuntimeError> {
        self.handle
            .get()
            .copied()
            .ok_or_else(|| SqlRuntimeError::NotReady(NOT_CONNECTED.into()))
    }
}

/// A single attachment to a database.
///
/// `Connection` is a cheap handle; clones share the same attachment. It starts
/// uninitialized, becomes active after [`Connection::connect`] (or
/// [`Connection::create_database`]) and is finished for good once disconnected.
#[derive(Clone)]
pub struct Connection {
    pub(crate) inner: Arc<ConnectionInner>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("database", &self.inner.options.database)
            .field("state", &self.inner.state.get())
            .field("transactions", &self.inner.transactions.get())
            .finish()
    }
}

impl Connection {
    #[must_use]
    pub fn new(client: ClientLibrary, options: ConnectionOptions) -> Self {
        Self::with_analyzer(client, options, PlaceholderAnalyzer::default())
    }

    /// Like [`Connection::new`] but with a custom placeholder analyzer for every
    /// statement prepared on this connection.
    #[must_use]
    pub fn with_analyzer(
        client: ClientLibrary,
        options: ConnectionOptions,
        analyzer: PlaceholderAnalyzer,
    ) -> Self {
        Self {
            inner: Arc::new(ConnectionInner {
                id: ConnectionId::next(),
                client,
                options,
                analyzer,
                handle: OnceLock::new(),
                guard: ResourceGuard::new(),
                state: StateCell::new(LifecycleState::Uninitialized),
                transactions: ChildCounter::default(),
            }),
        }
    }

    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    #[must_use]
    pub fn options(&self) -> &ConnectionOptions {
        &self.inner.options
    }

    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.inner.state.get()
    }

    #[must_use]
    pub fn connected(&self) -> bool {
        self.inner.state.get() == LifecycleState::Active
    }

    #[must_use]
    pub fn open_transaction_count(&self) -> usize {
        self.inner.transactions.get()
    }

    fn ensure_uninitialized(&self) -> Result<(), SqlRuntimeError> {
        match self.inner.state.get() {
            LifecycleState::Uninitialized => Ok(()),
            LifecycleState::Active => Err(SqlRuntimeError::AlreadyActive("connection".into())),
            _ => Err(SqlRuntimeError::AlreadyFinished("connection".into())),
        }
    }

    fn attached(&self, handle: DbHandle) {
        // Only reachable from Uninitialized under the guard, so the cell is empty.
        let _ = self.inner.handle.set(handle);
        self.inner.state.set(LifecycleState::Active);
    }

    /// Attach to the configured database.
    ///
    /// # Errors
    /// `AlreadyActive` when already connected, `AlreadyFinished` after a disconnect,
    /// or the native client's failure.
    pub async fn connect(&self) -> Result<(), SqlRuntimeError> {
        let _permit = self.inner.guard.acquire().await;
        self.ensure_uninitialized()?;
        let handle = self.inner.client.native().attach(&self.inner.options).await?;
        self.attached(handle);
        debug!(connection = self.inner.id.as_u64(), database = %self.inner.options.database, "connected");
        Ok(())
    }

    /// Create the configured database and attach to it.
    ///
    /// # Errors
    /// Same as [`Connection::connect`].
    pub async fn create_database(&self) -> Result<(), SqlRuntimeError> {
        let _permit = self.inner.guard.acquire().await;
        self.ensure_uninitialized()?;
        self.inner.options.validate()?;
        let handle = self
            .inner
            .client
            .native()
            .create_database(&self.inner.options)
            .await?;
        self.attached(handle);
        debug!(connection = self.inner.id.as_u64(), database = %self.inner.options.database, "database created");
        Ok(())
    }

    /// Detach. Refused while any transaction is still open.
    ///
    /// # Errors
    /// `OpenChildren` with open transactions, `NotReady` / `AlreadyFinished` when
    /// not connected, or the native client's failure.
    pub async fn disconnect(&self) -> Result<(), SqlRuntimeError> {
        let _permit = self.inner.guard.acquire().await;
        self.inner.state.ensure_active("connection", NOT_CONNECTED)?;
        self.inner.transactions.ensure_zero("connection", "transaction")?;
        let handle = self.inner.handle()?;
        self.inner.client.native().detach(handle).await?;
        self.inner.state.set(LifecycleState::Finished);
        debug!(connection = self.inner.id.as_u64(), "disconnected");
        Ok(())
    }

    /// Drop the attached database and finish the connection.
    ///
    /// # Errors
    /// Same as [`Connection::disconnect`].
    pub async fn drop_database(&self) -> Result<(), SqlRuntimeError> {
        let _permit = self.inner.guard.acquire().await;
        self.inner.state.ensure_active("connection", NOT_CONNECTED)?;
        self.inner.transactions.ensure_zero("connection", "transaction")?;
        let handle = self.inner.handle()?;
        self.inner.client.native().drop_database(handle).await?;
        self.inner.state.set(LifecycleState::Finished);
        debug!(connection = self.inner.id.as_u64(), "database dropped");
        Ok(())
    }

    /// Start a transaction. The connection counts it as open until it commits or
    /// rolls back.
    ///
    /// # Errors
    /// `NotReady` / `AlreadyFinished` when not connected, or the native client's
    /// failure.
    pub async fn start_transaction(
        &self,
        options: &TransactionOptions,
    ) -> Result<Transaction, SqlRuntimeError> {
        let _shared = self.inner.guard.share().await;
        self.inner.state.ensure_active("connection", NOT_CONNECTED)?;
        let db = self.inner.handle()?;
        let reservation = self.inner.transactions.reserve();
        let handle = self
            .inner
            .client
            .native()
            .start_transaction(db, options)
            .await?;
        reservation.keep();
        debug!(connection = self.inner.id.as_u64(), transaction = handle.0, isolation = ?options.isolation, "transaction started");
        Ok(Transaction::new(Arc::clone(&self.inner), db, handle))
    }

    /// Run one statement in its own transaction and commit it. Returns the
    /// singleton row, if the statement produced one.
    ///
    /// # Errors
    /// Any failure from the statement; the transaction is rolled back first.
    pub async fn execute(
        &self,
        sql: &str,
        params: impl Into<ParamValues>,
    ) -> Result<Option<Row>, SqlRuntimeError> {
        let tx = self.start_transaction(&TransactionOptions::default()).await?;
        match tx.execute_returning(sql, params).await {
            Ok(row) => {
                tx.commit().await?;
                Ok(row)
            }
            Err(err) => {
                tx.rollback().await?;
                Err(err)
            }
        }
    }

    /// Run a query in its own read-only transaction and collect every row.
    ///
    /// # Errors
    /// Any failure from the query; the transaction is rolled back first.
    pub async fn query(
        &self,
        sql: &str,
        params: impl Into<ParamValues>,
    ) -> Result<Vec<Row>, SqlRuntimeError> {
        let tx = self
            .start_transaction(&TransactionOptions::default().read_only())
            .await?;
        let rows = async {
            let cursor = tx.query(sql, params).await?;
            let rows = cursor.fetch_all().await;
            cursor.close().await?;
            rows
        }
        .await;
        match rows {
            Ok(rows) => {
                tx.commit().await?;
                Ok(rows)
            }
            Err(err) => {
                tx.rollback().await?;
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockClient;

    fn connection(mock: &MockClient) -> Connection {
        Connection::new(mock.library(), ConnectionOptions::new("employee.fdb"))
    }

    #[tokio::test]
    async fn connect_then_disconnect() {
        let mock = MockClient::new();
        let conn = connection(&mock);
        assert_eq!(conn.state(), LifecycleState::Uninitialized);
        assert!(!conn.connected());

        conn.connect().await.unwrap();
        assert!(conn.connected());
        assert!(matches!(
            conn.connect().await,
            Err(SqlRuntimeError::AlreadyActive(_))
        ));

        conn.disconnect().await.unwrap();
        assert_eq!(conn.state(), LifecycleState::Finished);
        assert!(matches!(
            conn.disconnect().await,
            Err(SqlRuntimeError::AlreadyFinished(_))
        ));
        assert!(matches!(
            conn.connect().await,
            Err(SqlRuntimeError::AlreadyFinished(_))
        ));
        assert_eq!(mock.calls_named("attach"), 1);
        assert_eq!(mock.calls_named("detach"), 1);
    }

    #[tokio::test]
    async fn data_ops_need_a_connection() {
        let mock = MockClient::new();
        let conn = connection(&mock);
        let err = conn
            .start_transaction(&TransactionOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SqlRuntimeError::NotReady(ref msg) if msg == NOT_CONNECTED));
    }

    #[tokio::test]
    async fn disconnect_refused_with_open_transaction() {
        let mock = MockClient::new();
        let conn = connection(&mock);
        conn.connect().await.unwrap();
        let tx = conn
            .start_transaction(&TransactionOptions::default())
            .await
            .unwrap();
        assert_eq!(conn.open_transaction_count(), 1);

        let err = conn.disconnect().await.unwrap_err();
        assert!(matches!(
            err,
            SqlRuntimeError::OpenChildren {
                entity: "connection",
                count: 1,
                ..
            }
        ));
        assert!(conn.connected());

        tx.rollback().await.unwrap();
        assert_eq!(conn.open_transaction_count(), 0);
        conn.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn failed_start_does_not_leak_a_slot() {
        let mock = MockClient::new();
        let conn = connection(&mock);
        conn.connect().await.unwrap();
        mock.fail_next("start_transaction");
        assert!(matches!(
            conn.start_transaction(&TransactionOptions::default()).await,
            Err(SqlRuntimeError::Native(_))
        ));
        assert_eq!(conn.open_transaction_count(), 0);
    }

    #[tokio::test]
    async fn failed_connect_stays_uninitialized() {
        let mock = MockClient::new();
        let conn = connection(&mock);
        mock.fail_next("attach");
        assert!(conn.connect().await.is_err());
        assert_eq!(conn.state(), LifecycleState::Uninitialized);
        conn.connect().await.unwrap();
    }

    #[tokio::test]
    async fn create_and_drop_database() {
        let mock = MockClient::new();
        let conn = connection(&mock);
        conn.create_database().await.unwrap();
        assert!(conn.connected());
        conn.drop_database().await.unwrap();
        assert_eq!(conn.state(), LifecycleState::Finished);
        assert_eq!(mock.calls_named("create_database"), 1);
        assert_eq!(mock.calls_named("drop_database"), 1);
    }

    #[tokio::test]
    async fn query_helper_commits() {
        let mock = MockClient::new();
        mock.script_query(
            "SELECT NAME FROM T",
            MockClient::varchar_columns(&["NAME"], 16),
            vec![vec!["a".into()], vec!["b".into()]],
        );
        let conn = connection(&mock);
        conn.connect().await.unwrap();
        let rows = conn.query("SELECT NAME FROM T", ParamValues::none()).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].get("NAME").and_then(|v| v.as_text()), Some("b"));
        assert_eq!(conn.open_transaction_count(), 0);
        assert_eq!(mock.calls_named("commit"), 1);
    }
}

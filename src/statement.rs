use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::client::{StatementKind, StmtHandle};
use crate::cursor::{Cursor, Row};
use crate::error::SqlRuntimeError;
use crate::guard::{ResourceGuard, SharedPermit};
use crate::lifecycle::{ChildCounter, LifecycleState, StateCell};
use crate::marshal::{FieldDescriptor, RowBuffer, decode_row, encode_row};
use crate::transaction::{Transaction, TransactionInner};
use crate::translation::{AnalyzedSql, ParamValues};

const NOT_PREPARED: &str = "Need to prepare statement";

pub(crate) struct StatementInner {
    pub(crate) transaction: Arc<TransactionInner>,
    pub(crate) handle: StmtHandle,
    kind: StatementKind,
    analyzed: AnalyzedSql,
    inputs: Vec<FieldDescriptor>,
    pub(crate) outputs: Vec<FieldDescriptor>,
    input_length: usize,
    pub(crate) output_length: usize,
    pub(crate) column_names: Arc<Vec<String>>,
    pub(crate) column_index: Arc<HashMap<String, usize>>,
    guard: ResourceGuard,
    state: StateCell,
    pub(crate) cursors: ChildCounter,
}

impl StatementInner {
    pub(crate) fn row(&self, buffer: &RowBuffer) -> Result<Row, SqlRuntimeError> {
        let values = decode_row(&self.outputs, buffer, self.transaction.connection.id)?;
        Ok(Row::new(
            Arc::clone(&self.column_names),
            Arc::clone(&self.column_index),
            values,
        ))
    }

    async fn encode_params(&self, params: ParamValues) -> Result<RowBuffer, SqlRuntimeError> {
        let values = self.analyzed.prepare_params(params)?;
        let mut input = RowBuffer::new(self.input_length);
        let blobs = Transaction::from_inner(Arc::clone(&self.transaction));
        encode_row(&self.inputs, &mut input, &values, &blobs).await?;
        Ok(input)
    }
}

/// A prepared statement. Parameters are bound by position or by the names used
/// in the original SQL.
#[derive(Clone)]
pub struct Statement {
    pub(crate) inner: Arc<StatementInner>,
}

impl fmt::Debug for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Statement")
            .field("handle", &self.inner.handle)
            .field("kind", &self.inner.kind)
            .field("sql", &self.inner.analyzed.sql())
            .field("state", &self.inner.state.get())
            .field("cursors", &self.inner.cursors.get())
            .finish()
    }
}

impl Statement {
    /// Callers must have checked that `transaction` is active.
    pub(crate) async fn prepare(
        transaction: Arc<TransactionInner>,
        sql: &str,
    ) -> Result<Self, SqlRuntimeError> {
        let connection = Arc::clone(&transaction.connection);
        let analyzed = connection.analyzer.analyze(sql);
        let reservation = transaction.statements.reserve();
        let info = connection
            .client
            .native()
            .prepare(
                transaction.db,
                transaction.handle,
                analyzed.sql(),
                connection.options.descriptor_mode,
            )
            .await?;

        let descriptors = info
            .inputs
            .iter()
            .map(FieldDescriptor::from_raw)
            .collect::<Result<Vec<_>, _>>()
            .and_then(|inputs| {
                let outputs = info
                    .outputs
                    .iter()
                    .map(FieldDescriptor::from_raw)
                    .collect::<Result<Vec<_>, _>>()?;
                Ok((inputs, outputs))
            });
        let (inputs, outputs) = match descriptors {
            Ok(pair) => pair,
            Err(err) => {
                connection.client.native().free_statement(info.handle).await?;
                return Err(err);
            }
        };
        reservation.keep();

        let column_names: Vec<String> = outputs
            .iter()
            .map(|d| d.display_name().to_owned())
            .collect();
        let column_index = column_names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect::<HashMap<_, _>>();

        debug!(
            transaction = transaction.handle.0,
            statement = info.handle.0,
            kind = ?info.kind,
            params = analyzed.param_names().len(),
            columns = outputs.len(),
            "statement prepared"
        );

        Ok(Self {
            inner: Arc::new(StatementInner {
                transaction,
                handle: info.handle,
                kind: info.kind,
                analyzed,
                inputs,
                outputs,
                input_length: info.input_length,
                output_length: info.output_length,
                column_names: Arc::new(column_names),
                column_index: Arc::new(column_index),
                guard: ResourceGuard::new(),
                state: StateCell::new(LifecycleState::Active),
                cursors: ChildCounter::default(),
            }),
        })
    }

    /// SQL as sent to the server, with named placeholders rewritten.
    #[must_use]
    pub fn sql(&self) -> &str {
        self.inner.analyzed.sql()
    }

    #[must_use]
    pub fn param_names(&self) -> &[String] {
        self.inner.analyzed.param_names()
    }

    #[must_use]
    pub fn kind(&self) -> StatementKind {
        self.inner.kind
    }

    #[must_use]
    pub fn input_descriptors(&self) -> &[FieldDescriptor] {
        &self.inner.inputs
    }

    #[must_use]
    pub fn output_descriptors(&self) -> &[FieldDescriptor] {
        &self.inner.outputs
    }

    #[must_use]
    pub fn column_names(&self) -> &[String] {
        &self.inner.column_names
    }

    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.inner.state.get()
    }

    #[must_use]
    pub fn open_cursor_count(&self) -> usize {
        self.inner.cursors.get()
    }

    async fn ready(&self) -> Result<SharedPermit<'_>, SqlRuntimeError> {
        let permit = self.inner.guard.share().await;
        self.inner.state.ensure_active("statement", NOT_PREPARED)?;
        Ok(permit)
    }

    /// Execute once. Returns the singleton output row when the statement
    /// produced one.
    ///
    /// # Errors
    /// `AlreadyFinished` after dispose, parameter binding failures
    /// (`MissingParameter`, `ArityMismatch`, marshaling errors), or the native
    /// client's failure.
    pub async fn execute(
        &self,
        params: impl Into<ParamValues>,
    ) -> Result<Option<Row>, SqlRuntimeError> {
        let _shared = self.ready().await?;
        let input = self.inner.encode_params(params.into()).await?;
        let mut output = RowBuffer::new(self.inner.output_length);
        let produced = self
            .inner
            .transaction
            .connection
            .client
            .native()
            .execute(
                self.inner.transaction.handle,
                self.inner.handle,
                input.as_bytes(),
                output.as_bytes_mut(),
            )
            .await?;
        debug!(statement = self.inner.handle.0, produced, "statement executed");
        if produced {
            self.inner.row(&output).map(Some)
        } else {
            Ok(None)
        }
    }

    /// Open a cursor over the statement's result set.
    ///
    /// # Errors
    /// Same as [`Statement::execute`].
    pub async fn open_cursor(
        &self,
        params: impl Into<ParamValues>,
    ) -> Result<Cursor, SqlRuntimeError> {
        self.open_cursor_inner(params.into(), false).await
    }

    pub(crate) async fn open_cursor_inner(
        &self,
        params: ParamValues,
        dispose_statement_on_close: bool,
    ) -> Result<Cursor, SqlRuntimeError> {
        let _shared = self.ready().await?;
        let input = self.inner.encode_params(params).await?;
        let reservation = self.inner.cursors.reserve();
        self.inner
            .transaction
            .connection
            .client
            .native()
            .open_cursor(
                self.inner.transaction.handle,
                self.inner.handle,
                input.as_bytes(),
            )
            .await?;
        reservation.keep();
        debug!(statement = self.inner.handle.0, ad_hoc = dispose_statement_on_close, "cursor opened");
        Ok(Cursor::new(
            Arc::clone(&self.inner),
            dispose_statement_on_close,
        ))
    }

    /// Free the statement. Refused while a cursor is open on it.
    ///
    /// # Errors
    /// `OpenChildren` with an open cursor, `AlreadyFinished` after dispose, or the
    /// native client's failure.
    pub async fn dispose(&self) -> Result<(), SqlRuntimeError> {
        let _permit = self.inner.guard.acquire().await;
        self.inner.state.ensure_active("statement", NOT_PREPARED)?;
        self.inner.cursors.ensure_zero("statement", "cursor")?;
        self.inner
            .transaction
            .connection
            .client
            .native()
            .free_statement(self.inner.handle)
            .await?;
        self.inner.state.set(LifecycleState::Finished);
        self.inner.transaction.statements.release();
        debug!(statement = self.inner.handle.0, "statement disposed");
        Ok(())
    }
}

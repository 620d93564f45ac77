use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::client::{
    BlobHandle, BlobId, ClientLibrary, DbHandle, NativeClient, NativeError, PreparedInfo,
    RawField, StatementKind, StmtHandle, TxHandle,
};
use crate::config::{ConnectionOptions, DescriptorMode, TransactionOptions};
use crate::marshal::{
    FieldDescriptor, MessageLayout, RowBuffer, SqlType, decode_row, encode_value, normalize,
};
use crate::translation::analyze_placeholders;
use crate::types::{ConnectionId, Value};

/// Canned metadata and data for one SQL text.
#[derive(Debug, Clone, Default)]
pub struct ScriptedStatement {
    kind: Option<StatementKind>,
    inputs: Vec<FieldDescriptor>,
    outputs: Vec<FieldDescriptor>,
    raw_outputs: Vec<RawField>,
    rows: Vec<Vec<Value>>,
    returning: Option<Vec<Value>>,
}

impl ScriptedStatement {
    #[must_use]
    pub fn kind(mut self, kind: StatementKind) -> Self {
        self.kind = Some(kind);
        self
    }

    #[must_use]
    pub fn input(mut self, sql_type: SqlType, byte_length: usize) -> Self {
        self.inputs.push(FieldDescriptor::new(sql_type, byte_length));
        self
    }

    #[must_use]
    pub fn output(mut self, name: &str, sql_type: SqlType, byte_length: usize) -> Self {
        self.outputs
            .push(FieldDescriptor::new(sql_type, byte_length).named(name));
        self
    }

    /// Report this metadata verbatim, bypassing layout. Used to feed the runtime
    /// descriptors it must reject.
    #[must_use]
    pub fn raw_output(mut self, raw: RawField) -> Self {
        self.raw_outputs.push(raw);
        self
    }

    /// Rows served by cursors opened on this statement.
    #[must_use]
    pub fn rows(mut self, rows: Vec<Vec<Value>>) -> Self {
        self.rows = rows;
        self
    }

    /// Singleton row produced by `execute`.
    #[must_use]
    pub fn returning(mut self, row: Vec<Value>) -> Self {
        self.returning = Some(row);
        self
    }

    fn statement_kind(&self) -> StatementKind {
        self.kind.unwrap_or(if self.outputs.is_empty() {
            StatementKind::Other
        } else {
            StatementKind::Select
        })
    }
}

struct OpenStatement {
    tx: u64,
    sql: String,
    script: ScriptedStatement,
    inputs: Vec<FieldDescriptor>,
    outputs: Vec<FieldDescriptor>,
    position: usize,
}

struct OpenBlob {
    id: BlobId,
    position: usize,
    created: bool,
}

#[derive(Default)]
struct MockState {
    next_handle: u64,
    calls: Vec<String>,
    failures: HashMap<String, usize>,
    delays: HashMap<String, Duration>,
    finished_transactions: HashSet<u64>,
    open_cursors: HashSet<u64>,
    scripts: HashMap<String, ScriptedStatement>,
    statements: HashMap<u64, OpenStatement>,
    blobs: HashMap<BlobId, Vec<u8>>,
    open_blobs: HashMap<u64, OpenBlob>,
    prepared: Vec<String>,
    executed: Vec<(String, Vec<Value>)>,
}

impl MockState {
    fn handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }
}

/// In-memory [`NativeClient`].
///
/// Statements are scripted per SQL text (named placeholders may be used; they
/// are matched after rewriting). Unscripted SQL prepares as a statement with no
/// parameters and no columns. Every call is logged and any call can be made to
/// fail once with [`MockClient::fail_next`] or slowed down with
/// [`MockClient::delay`].
///
/// Like a real server, the mock rejects commit or rollback while the
/// transaction still has prepared statements, prepare on a finished
/// transaction, and fetch from a cursor that is not open.
#[derive(Clone, Default)]
pub struct MockClient {
    state: Arc<Mutex<MockState>>,
}

fn native_error(err: impl std::fmt::Display) -> NativeError {
    NativeError::new(-1, err.to_string())
}

/// Blob references in recorded parameters carry this owner; the mock cannot see
/// the runtime's connection identity.
const MOCK_OWNER: ConnectionId = ConnectionId::from_raw(0);

fn write_row(
    descriptors: &[FieldDescriptor],
    values: &[Value],
    output: &mut [u8],
) -> Result<(), NativeError> {
    let mut buffer = RowBuffer::new(output.len());
    for (desc, value) in descriptors.iter().zip(values) {
        match (desc.sql_type, value) {
            (SqlType::Blob, Value::Blob(blob)) => {
                buffer.write(desc.data_offset, &blob.id.0).map_err(native_error)?;
                buffer.write(desc.null_offset, &[0, 0]).map_err(native_error)?;
            }
            _ => encode_value(desc, &mut buffer, value).map_err(native_error)?,
        }
    }
    output.copy_from_slice(buffer.as_bytes());
    Ok(())
}

impl MockClient {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A [`ClientLibrary`] backed by this mock. Clones share state.
    #[must_use]
    pub fn library(&self) -> ClientLibrary {
        ClientLibrary::new(self.clone())
    }

    #[must_use]
    pub fn statement() -> ScriptedStatement {
        ScriptedStatement::default()
    }

    /// Nullable varying-text output columns.
    #[must_use]
    pub fn varchar_columns(names: &[&str], byte_length: usize) -> Vec<FieldDescriptor> {
        names
            .iter()
            .map(|name| FieldDescriptor::new(SqlType::Varying, byte_length).named(*name))
            .collect()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn script_statement(&self, sql: &str, script: ScriptedStatement) {
        let key = analyze_placeholders(sql).sql().to_owned();
        self.state().scripts.insert(key, script);
    }

    pub fn script_query(&self, sql: &str, columns: Vec<FieldDescriptor>, rows: Vec<Vec<Value>>) {
        let script = ScriptedStatement {
            kind: Some(StatementKind::Select),
            outputs: columns,
            rows,
            ..ScriptedStatement::default()
        };
        self.script_statement(sql, script);
    }

    /// Make the next call to `operation` fail with a native error.
    pub fn fail_next(&self, operation: &str) {
        *self.state().failures.entry(operation.to_owned()).or_default() += 1;
    }

    /// Sleep for `duration` at the start of every call to `operation`.
    pub fn delay(&self, operation: &str, duration: Duration) {
        self.state().delays.insert(operation.to_owned(), duration);
    }

    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    #[must_use]
    pub fn calls_named(&self, operation: &str) -> usize {
        self.state().calls.iter().filter(|c| *c == operation).count()
    }

    /// SQL text received by `prepare`, in order.
    #[must_use]
    pub fn prepared_sql(&self) -> Vec<String> {
        self.state().prepared.clone()
    }

    /// Decoded parameters of every `execute` and `open_cursor`, in order.
    #[must_use]
    pub fn executed(&self) -> Vec<(String, Vec<Value>)> {
        self.state().executed.clone()
    }

    #[must_use]
    pub fn stored_blob(&self, id: BlobId) -> Option<Vec<u8>> {
        self.state().blobs.get(&id).cloned()
    }

    async fn pause(&self, operation: &str) {
        let delay = self.state().delays.get(operation).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn finish_transaction(&self, operation: &str, tx: TxHandle) -> Result<(), NativeError> {
        let mut state = self.enter(operation)?;
        if state.statements.values().any(|open| open.tx == tx.0) {
            return Err(native_error("transaction has open statements"));
        }
        state.finished_transactions.insert(tx.0);
        Ok(())
    }

    fn enter<'a>(&'a self, operation: &str) -> Result<MutexGuard<'a, MockState>, NativeError> {
        let mut state = self.state();
        state.calls.push(operation.to_owned());
        if let Some(remaining) = state.failures.get_mut(operation) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(NativeError::new(
                    335_544_344,
                    format!("injected failure in {operation}"),
                ));
            }
        }
        Ok(state)
    }

    fn record_params(
        state: &mut MockState,
        stmt: StmtHandle,
        input: &[u8],
    ) -> Result<(), NativeError> {
        let open = state
            .statements
            .get(&stmt.0)
            .ok_or_else(|| native_error("invalid statement handle"))?;
        let buffer = RowBuffer::from_bytes(input.to_vec());
        let values = decode_row(&open.inputs, &buffer, MOCK_OWNER).map_err(native_error)?;
        let sql = open.sql.clone();
        state.executed.push((sql, values));
        Ok(())
    }
}

#[async_trait]
impl NativeClient for MockClient {
    async fn attach(&self, _options: &ConnectionOptions) -> Result<DbHandle, NativeError> {
        let mut state = self.enter("attach")?;
        Ok(DbHandle(state.handle()))
    }

    async fn create_database(
        &self,
        _options: &ConnectionOptions,
    ) -> Result<DbHandle, NativeError> {
        let mut state = self.enter("create_database")?;
        Ok(DbHandle(state.handle()))
    }

    async fn detach(&self, _db: DbHandle) -> Result<(), NativeError> {
        self.enter("detach").map(drop)
    }

    async fn drop_database(&self, _db: DbHandle) -> Result<(), NativeError> {
        self.enter("drop_database").map(drop)
    }

    async fn start_transaction(
        &self,
        _db: DbHandle,
        _options: &TransactionOptions,
    ) -> Result<TxHandle, NativeError> {
        let mut state = self.enter("start_transaction")?;
        Ok(TxHandle(state.handle()))
    }

    async fn commit(&self, tx: TxHandle) -> Result<(), NativeError> {
        self.pause("commit").await;
        self.finish_transaction("commit", tx)
    }

    async fn commit_retaining(&self, _tx: TxHandle) -> Result<(), NativeError> {
        self.enter("commit_retaining").map(drop)
    }

    async fn rollback(&self, tx: TxHandle) -> Result<(), NativeError> {
        self.pause("rollback").await;
        self.finish_transaction("rollback", tx)
    }

    async fn prepare(
        &self,
        _db: DbHandle,
        tx: TxHandle,
        sql: &str,
        mode: DescriptorMode,
    ) -> Result<PreparedInfo, NativeError> {
        self.pause("prepare").await;
        let mut state = self.enter("prepare")?;
        if state.finished_transactions.contains(&tx.0) {
            return Err(native_error("invalid transaction handle"));
        }
        state.prepared.push(sql.to_owned());
        let script = state.scripts.get(sql).cloned().unwrap_or_default();

        let mut inputs = script.inputs.clone();
        let input_length = MessageLayout::assign(&mut inputs);
        let (outputs, output_length) = match mode {
            DescriptorMode::Normalized => normalize(&script.outputs),
            DescriptorMode::Fixed => {
                let mut outputs = script.outputs.clone();
                let length = MessageLayout::assign(&mut outputs);
                (outputs, length)
            }
        };
        let raw_outputs = if script.raw_outputs.is_empty() {
            outputs.iter().map(FieldDescriptor::to_raw).collect()
        } else {
            script.raw_outputs.clone()
        };

        let handle = StmtHandle(state.handle());
        let info = PreparedInfo {
            handle,
            kind: script.statement_kind(),
            inputs: inputs.iter().map(FieldDescriptor::to_raw).collect(),
            outputs: raw_outputs,
            input_length,
            output_length,
        };
        state.statements.insert(
            handle.0,
            OpenStatement {
                tx: tx.0,
                sql: sql.to_owned(),
                script,
                inputs,
                outputs,
                position: 0,
            },
        );
        Ok(info)
    }

    async fn execute(
        &self,
        _tx: TxHandle,
        stmt: StmtHandle,
        input: &[u8],
        output: &mut [u8],
    ) -> Result<bool, NativeError> {
        let mut state = self.enter("execute")?;
        Self::record_params(&mut state, stmt, input)?;
        let open = state
            .statements
            .get(&stmt.0)
            .ok_or_else(|| native_error("invalid statement handle"))?;
        match &open.script.returning {
            Some(row) => {
                write_row(&open.outputs, row, output)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn open_cursor(
        &self,
        _tx: TxHandle,
        stmt: StmtHandle,
        input: &[u8],
    ) -> Result<(), NativeError> {
        self.pause("open_cursor").await;
        let mut state = self.enter("open_cursor")?;
        Self::record_params(&mut state, stmt, input)?;
        let open = state
            .statements
            .get_mut(&stmt.0)
            .ok_or_else(|| native_error("invalid statement handle"))?;
        open.position = 0;
        state.open_cursors.insert(stmt.0);
        Ok(())
    }

    async fn fetch(&self, stmt: StmtHandle, output: &mut [u8]) -> Result<bool, NativeError> {
        self.pause("fetch").await;
        let mut state = self.enter("fetch")?;
        if !state.open_cursors.contains(&stmt.0) {
            return Err(native_error("cursor is not open"));
        }
        let open = state
            .statements
            .get_mut(&stmt.0)
            .ok_or_else(|| native_error("invalid statement handle"))?;
        let Some(row) = open.script.rows.get(open.position) else {
            return Ok(false);
        };
        write_row(&open.outputs, row, output)?;
        open.position += 1;
        Ok(true)
    }

    async fn close_cursor(&self, stmt: StmtHandle) -> Result<(), NativeError> {
        self.pause("close_cursor").await;
        let mut state = self.enter("close_cursor")?;
        state.open_cursors.remove(&stmt.0);
        Ok(())
    }

    async fn free_statement(&self, stmt: StmtHandle) -> Result<(), NativeError> {
        self.pause("free_statement").await;
        let mut state = self.enter("free_statement")?;
        state.statements.remove(&stmt.0);
        state.open_cursors.remove(&stmt.0);
        Ok(())
    }

    async fn create_blob(
        &self,
        _db: DbHandle,
        _tx: TxHandle,
    ) -> Result<(BlobHandle, BlobId), NativeError> {
        let mut state = self.enter("create_blob")?;
        let handle = state.handle();
        let id = BlobId(handle.to_le_bytes());
        state.blobs.insert(id, Vec::new());
        state.open_blobs.insert(
            handle,
            OpenBlob {
                id,
                position: 0,
                created: true,
            },
        );
        Ok((BlobHandle(handle), id))
    }

    async fn open_blob(
        &self,
        _db: DbHandle,
        _tx: TxHandle,
        id: BlobId,
    ) -> Result<BlobHandle, NativeError> {
        let mut state = self.enter("open_blob")?;
        if !state.blobs.contains_key(&id) {
            return Err(NativeError::new(335_544_329, format!("invalid blob id {id:?}")));
        }
        let handle = state.handle();
        state.open_blobs.insert(
            handle,
            OpenBlob {
                id,
                position: 0,
                created: false,
            },
        );
        Ok(BlobHandle(handle))
    }

    async fn get_segment(
        &self,
        blob: BlobHandle,
        max: usize,
    ) -> Result<Option<Vec<u8>>, NativeError> {
        let mut state = self.enter("get_segment")?;
        let state = &mut *state;
        let open = state
            .open_blobs
            .get_mut(&blob.0)
            .ok_or_else(|| native_error("invalid blob handle"))?;
        let data = state
            .blobs
            .get(&open.id)
            .ok_or_else(|| native_error("blob vanished"))?;
        if open.position >= data.len() {
            return Ok(None);
        }
        let end = (open.position + max).min(data.len());
        let segment = data[open.position..end].to_vec();
        open.position = end;
        Ok(Some(segment))
    }

    async fn put_segment(&self, blob: BlobHandle, data: &[u8]) -> Result<(), NativeError> {
        let mut state = self.enter("put_segment")?;
        let state = &mut *state;
        let open = state
            .open_blobs
            .get(&blob.0)
            .ok_or_else(|| native_error("invalid blob handle"))?;
        state
            .blobs
            .get_mut(&open.id)
            .ok_or_else(|| native_error("blob vanished"))?
            .extend_from_slice(data);
        Ok(())
    }

    async fn blob_length(&self, blob: BlobHandle) -> Result<u64, NativeError> {
        let state = self.enter("blob_length")?;
        let open = state
            .open_blobs
            .get(&blob.0)
            .ok_or_else(|| native_error("invalid blob handle"))?;
        let len = state.blobs.get(&open.id).map_or(0, Vec::len);
        Ok(len as u64)
    }

    async fn close_blob(&self, blob: BlobHandle) -> Result<(), NativeError> {
        let mut state = self.enter("close_blob")?;
        state
            .open_blobs
            .remove(&blob.0)
            .map(drop)
            .ok_or_else(|| native_error("invalid blob handle"))
    }

    async fn cancel_blob(&self, blob: BlobHandle) -> Result<(), NativeError> {
        let mut state = self.enter("cancel_blob")?;
        let open = state
            .open_blobs
            .remove(&blob.0)
            .ok_or_else(|| native_error("invalid blob handle"))?;
        if open.created {
            state.blobs.remove(&open.id);
        }
        Ok(())
    }
}

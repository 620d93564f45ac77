//! Boundary to the native client library.
//!
//! The runtime never speaks the wire protocol itself. Everything that touches the
//! server goes through [`NativeClient`], which hands back opaque handles and the raw
//! field metadata the marshaling engine consumes.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::{ConnectionOptions, DescriptorMode, TransactionOptions};

/// Error reported by the native client library.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("native client error {code}: {message}")]
pub struct NativeError {
    pub code: i64,
    pub message: String,
}

impl NativeError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

macro_rules! opaque_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(pub u64);
    };
}

opaque_handle!(
    /// Attachment handle.
    DbHandle
);
opaque_handle!(
    /// Transaction handle.
    TxHandle
);
opaque_handle!(
    /// Prepared statement handle.
    StmtHandle
);
opaque_handle!(
    /// Open blob stream handle.
    BlobHandle
);

/// 8-byte opaque blob id, scoped to the attachment that created it.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BlobId(pub [u8; 8]);

impl fmt::Debug for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlobId({:016x})", u64::from_le_bytes(self.0))
    }
}

/// Field metadata exactly as the library reports it. The type code is raw; the low
/// bit flags a nullable column.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawField {
    pub alias: String,
    pub field_name: String,
    pub relation_name: String,
    pub type_code: i32,
    pub sub_type: i32,
    pub length: u32,
    pub scale: i32,
    pub data_offset: u32,
    pub null_offset: u32,
}

/// Statement classification reported at prepare time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Select,
    SelectForUpdate,
    Insert,
    Update,
    Delete,
    Ddl,
    ExecProcedure,
    Other,
}

impl StatementKind {
    /// Whether executing the statement opens a cursor.
    #[must_use]
    pub fn has_cursor(self) -> bool {
        matches!(self, StatementKind::Select | StatementKind::SelectForUpdate)
    }
}

/// Result of a prepare call.
#[derive(Debug, Clone)]
pub struct PreparedInfo {
    pub handle: StmtHandle,
    pub kind: StatementKind,
    pub inputs: Vec<RawField>,
    pub outputs: Vec<RawField>,
    pub input_length: usize,
    pub output_length: usize,
}

/// Primitive operations the native client library provides.
#[async_trait]
pub trait NativeClient: Send + Sync + 'static {
    async fn attach(&self, options: &ConnectionOptions) -> Result<DbHandle, NativeError>;
    async fn create_database(&self, options: &ConnectionOptions)
    -> Result<DbHandle, NativeError>;
    async fn detach(&self, db: DbHandle) -> Result<(), NativeError>;
    async fn drop_database(&self, db: DbHandle) -> Result<(), NativeError>;

    async fn start_transaction(
        &self,
        db: DbHandle,
        options: &TransactionOptions,
    ) -> Result<TxHandle, NativeError>;
    async fn commit(&self, tx: TxHandle) -> Result<(), NativeError>;
    async fn commit_retaining(&self, tx: TxHandle) -> Result<(), NativeError>;
    async fn rollback(&self, tx: TxHandle) -> Result<(), NativeError>;

    async fn prepare(
        &self,
        db: DbHandle,
        tx: TxHandle,
        sql: &str,
        mode: DescriptorMode,
    ) -> Result<PreparedInfo, NativeError>;
    /// Execute a non-cursor statement. Returns `true` when a singleton row was
    /// written to `output`.
    async fn execute(
        &self,
        tx: TxHandle,
        stmt: StmtHandle,
        input: &[u8],
        output: &mut [u8],
    ) -> Result<bool, NativeError>;
    async fn open_cursor(
        &self,
        tx: TxHandle,
        stmt: StmtHandle,
        input: &[u8],
    ) -> Result<(), NativeError>;
    /// Fill `output` with the next row; `false` once the cursor is exhausted.
    async fn fetch(&self, stmt: StmtHandle, output: &mut [u8]) -> Result<bool, NativeError>;
    async fn close_cursor(&self, stmt: StmtHandle) -> Result<(), NativeError>;
    async fn free_statement(&self, stmt: StmtHandle) -> Result<(), NativeError>;

    async fn create_blob(
        &self,
        db: DbHandle,
        tx: TxHandle,
    ) -> Result<(BlobHandle, BlobId), NativeError>;
    async fn open_blob(
        &self,
        db: DbHandle,
        tx: TxHandle,
        id: BlobId,
    ) -> Result<BlobHandle, NativeError>;
    /// Read up to `max` bytes; `None` at end of blob.
    async fn get_segment(
        &self,
        blob: BlobHandle,
        max: usize,
    ) -> Result<Option<Vec<u8>>, NativeError>;
    async fn put_segment(&self, blob: BlobHandle, data: &[u8]) -> Result<(), NativeError>;
    async fn blob_length(&self, blob: BlobHandle) -> Result<u64, NativeError>;
    async fn close_blob(&self, blob: BlobHandle) -> Result<(), NativeError>;
    async fn cancel_blob(&self, blob: BlobHandle) -> Result<(), NativeError>;
}

/// Explicitly owned handle to the client library.
///
/// Construct one at process start and clone it into every connection or pool.
/// There is no global instance.
#[derive(Clone)]
pub struct ClientLibrary {
    native: Arc<dyn NativeClient>,
}

impl ClientLibrary {
    pub fn new(native: impl NativeClient) -> Self {
        Self {
            native: Arc::new(native),
        }
    }

    pub fn from_arc(native: Arc<dyn NativeClient>) -> Self {
        Self { native }
    }

    pub(crate) fn native(&self) -> &dyn NativeClient {
        self.native.as_ref()
    }
}

impl fmt::Debug for ClientLibrary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientLibrary").finish_non_exhaustive()
    }
}

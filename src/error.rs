use thiserror::Error;

use crate::client::NativeError;

#[derive(Debug, Error)]
pub enum SqlRuntimeError {
    #[error(transparent)]
    Native(#[from] NativeError),

    #[error("{0} already finished")]
    AlreadyFinished(String),

    #[error("{0}")]
    NotReady(String),

    #[error("{0} is already active")]
    AlreadyActive(String),

    #[error("{entity} still has {count} open {child}")]
    OpenChildren {
        entity: &'static str,
        child: &'static str,
        count: usize,
    },

    #[error("Unrecognized SQL type code: {0}")]
    UnrecognizedType(i32),

    #[error("Expected {expected} parameters but received {received}")]
    ArityMismatch { expected: usize, received: usize },

    #[error("Value for '{field}' is {actual} bytes, column allows {max}")]
    ValueTooLong {
        field: String,
        max: usize,
        actual: usize,
    },

    #[error("Unsupported blob source: {0}")]
    UnsupportedBlobSource(String),

    #[error("Blob belongs to a different connection; copying blobs across connections is unsupported")]
    CrossConnectionBlob,

    #[error("Column '{field}' expects {expected}, got {found}")]
    IncompatibleValue {
        field: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("Access of {len} bytes at offset {offset} overruns buffer of {buffer_len} bytes")]
    BufferOverrun {
        offset: usize,
        len: usize,
        buffer_len: usize,
    },

    #[error(transparent)]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error("Missing parameter '{name}' for query: {sql}")]
    MissingParameter { name: String, sql: String },

    #[error("Invalid operation on pooled connection: {0}")]
    InvalidPoolOperation(String),

    #[error("Connection pool already created")]
    AlreadyCreated,

    #[error("Connection pool not created")]
    NotCreated,

    #[error("Pool error: {0}")]
    PoolError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl From<deadpool::managed::PoolError<SqlRuntimeError>> for SqlRuntimeError {
    fn from(err: deadpool::managed::PoolError<SqlRuntimeError>) -> Self {
        match err {
            deadpool::managed::PoolError::Backend(inner) => inner,
            other => SqlRuntimeError::PoolError(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for SqlRuntimeError {
    fn from(err: serde_json::Error) -> Self {
        SqlRuntimeError::ConfigError(err.to_string())
    }
}

//! Convenient imports for common functionality.
//!
//! This module re-exports the most commonly used types and functions
//! to make it easier to get started with the library.

pub use crate::blob::BlobStream;
pub use crate::client::{BlobId, ClientLibrary, NativeClient, NativeError};
pub use crate::config::{
    ConnectionOptions, DescriptorMode, IsolationLevel, PoolOptions, TransactionOptions,
};
pub use crate::connection::Connection;
pub use crate::cursor::{Cursor, Row};
pub use crate::error::SqlRuntimeError;
pub use crate::lifecycle::LifecycleState;
pub use crate::pool::{ConnectionPool, PooledConnection};
pub use crate::session::Session;
pub use crate::statement::Statement;
pub use crate::transaction::Transaction;
pub use crate::translation::{AnalyzedSql, ParamValues, PlaceholderAnalyzer};
pub use crate::types::{BlobRef, Value};

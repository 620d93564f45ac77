//! Async access runtime over a native relational client library.
//!
//! The crate sits between application code and a [`NativeClient`] that speaks the
//! wire protocol. It adds guarded lifecycles for connections, transactions,
//! statements, cursors and blob streams, a row-buffer codec driven by field
//! descriptors, named-placeholder rewriting, and a connection pool built on
//! `deadpool`.
//!
//! ```rust,no_run
//! use sql_runtime::prelude::*;
//!
//! # async fn run(client: ClientLibrary) -> Result<(), SqlRuntimeError> {
//! let conn = Connection::new(client, ConnectionOptions::new("employee.fdb"));
//! conn.connect().await?;
//!
//! let tx = conn.start_transaction(&TransactionOptions::default()).await?;
//! tx.execute(
//!     "UPDATE EMPLOYEE SET SALARY = :salary WHERE EMP_NO = :id",
//!     ParamValues::named([("salary", Value::Double(52_000.0)), ("id", Value::Int(7))]),
//! )
//! .await?;
//! tx.commit().await?;
//!
//! conn.disconnect().await?;
//! # Ok(())
//! # }
//! ```

pub mod blob;
pub mod client;
pub mod config;
pub mod connection;
pub mod cursor;
pub mod error;
pub mod guard;
pub mod lifecycle;
pub mod marshal;
pub mod pool;
pub mod prelude;
pub mod session;
pub mod statement;
pub mod transaction;
pub mod translation;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use blob::BlobStream;
pub use client::{ClientLibrary, NativeClient, NativeError};
pub use config::{
    ConnectionOptions, ConnectionOptionsBuilder, DescriptorMode, IsolationLevel, PoolOptions,
    PoolOptionsBuilder, TransactionOptions,
};
pub use connection::Connection;
pub use cursor::{Cursor, Row};
pub use error::SqlRuntimeError;
pub use guard::{GuardPermit, ResourceGuard, SharedPermit};
pub use lifecycle::LifecycleState;
pub use pool::{ConnectionManager, ConnectionPool, PoolStatus, PooledConnection};
pub use session::Session;
pub use statement::Statement;
pub use transaction::Transaction;
pub use translation::{
    AnalyzedSql, ParamValues, PlaceholderAnalyzer, analyze_placeholders,
};
pub use types::{BlobRef, ConnectionId, Value};

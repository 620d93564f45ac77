use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use async_trait::async_trait;
use deadpool::managed::Object;
use tracing::debug;

use super::manager::ConnectionManager;
use crate::config::TransactionOptions;
use crate::connection::Connection;
use crate::cursor::Row;
use crate::error::SqlRuntimeError;
use crate::session::Session;
use crate::transaction::Transaction;
use crate::translation::ParamValues;
use crate::types::ConnectionId;

const NOT_BORROWED: &str = "Need database connection: pooled connection is not borrowed";

type Lease = Option<Object<ConnectionManager>>;

pub(crate) struct ProxyInner {
    connection: Connection,
    /// The pool object while this proxy is lent out; dropping it hands the
    /// connection back.
    lease: Mutex<Lease>,
}

/// A pooled stand-in for a [`Connection`].
///
/// The same proxy is handed out every time its connection is borrowed.
/// `disconnect` returns it to the pool, and `connected` is only true while it is
/// borrowed.
#[derive(Clone)]
pub struct PooledConnection {
    inner: Arc<ProxyInner>,
}

impl fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("connection", &self.inner.connection)
            .field("borrowed", &self.is_borrowed())
            .finish()
    }
}

impl PooledConnection {
    pub(crate) fn new(connection: Connection) -> Self {
        Self {
            inner: Arc::new(ProxyInner {
                connection,
                lease: Mutex::new(None),
            }),
        }
    }

    fn lease(&self) -> MutexGuard<'_, Lease> {
        self.inner.lease.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn lend(&self, object: Object<ConnectionManager>) {
        *self.lease() = Some(object);
    }

    pub(crate) fn take_lease(&self) -> Lease {
        self.lease().take()
    }

    /// Same proxy instance, not merely the same database.
    #[must_use]
    pub fn ptr_eq(&self, other: &PooledConnection) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn downgrade(&self) -> Weak<ProxyInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn upgrade(weak: &Weak<ProxyInner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    pub(crate) fn underlying(&self) -> &Connection {
        &self.inner.connection
    }

    #[must_use]
    pub fn is_borrowed(&self) -> bool {
        self.lease().is_some()
    }

    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.inner.connection.id()
    }

    /// True while the underlying connection is attached and this proxy is the
    /// borrowed instance.
    #[must_use]
    pub fn connected(&self) -> bool {
        self.is_borrowed() && self.inner.connection.connected()
    }

    fn borrowed(&self) -> Result<&Connection, SqlRuntimeError> {
        if self.is_borrowed() {
            Ok(&self.inner.connection)
        } else {
            Err(SqlRuntimeError::NotReady(NOT_BORROWED.into()))
        }
    }

    /// Only the pool opens connections.
    ///
    /// # Errors
    /// Always `InvalidPoolOperation`.
    #[allow(clippy::unused_async)]
    pub async fn connect(&self) -> Result<(), SqlRuntimeError> {
        Err(SqlRuntimeError::InvalidPoolOperation("connect".into()))
    }

    /// # Errors
    /// Always `InvalidPoolOperation`.
    #[allow(clippy::unused_async)]
    pub async fn create_database(&self) -> Result<(), SqlRuntimeError> {
        Err(SqlRuntimeError::InvalidPoolOperation("create_database".into()))
    }

    /// # Errors
    /// Always `InvalidPoolOperation`.
    #[allow(clippy::unused_async)]
    pub async fn drop_database(&self) -> Result<(), SqlRuntimeError> {
        Err(SqlRuntimeError::InvalidPoolOperation("drop_database".into()))
    }

    /// Return the connection to the pool. A no-op when not borrowed.
    ///
    /// # Errors
    /// `OpenChildren` while a transaction started through this proxy is still
    /// open; the proxy stays borrowed.
    pub fn disconnect(&self) -> Result<(), SqlRuntimeError> {
        let mut lease = self.lease();
        if lease.is_none() {
            return Ok(());
        }
        self.inner
            .connection
            .inner
            .transactions
            .ensure_zero("pooled connection", "transaction")?;
        let object = lease.take();
        drop(lease);
        drop(object);
        debug!(connection = self.id().as_u64(), "returned to pool");
        Ok(())
    }

    /// # Errors
    /// `NotReady` when not borrowed, otherwise as [`Connection::start_transaction`].
    pub async fn start_transaction(
        &self,
        options: &TransactionOptions,
    ) -> Result<Transaction, SqlRuntimeError> {
        self.borrowed()?.start_transaction(options).await
    }

    /// # Errors
    /// `NotReady` when not borrowed, otherwise as [`Connection::execute`].
    pub async fn execute(
        &self,
        sql: &str,
        params: impl Into<ParamValues>,
    ) -> Result<Option<Row>, SqlRuntimeError> {
        self.borrowed()?.execute(sql, params).await
    }

    /// # Errors
    /// `NotReady` when not borrowed, otherwise as [`Connection::query`].
    pub async fn query(
        &self,
        sql: &str,
        params: impl Into<ParamValues>,
    ) -> Result<Vec<Row>, SqlRuntimeError> {
        self.borrowed()?.query(sql, params).await
    }
}

#[async_trait]
impl Session for PooledConnection {
    fn connection_id(&self) -> ConnectionId {
        self.id()
    }

    fn connected(&self) -> bool {
        PooledConnection::connected(self)
    }

    async fn start_transaction(
        &self,
        options: &TransactionOptions,
    ) -> Result<Transaction, SqlRuntimeError> {
        PooledConnection::start_transaction(self, options).await
    }

    async fn execute(
        &self,
        sql: &str,
        params: ParamValues,
    ) -> Result<Option<Row>, SqlRuntimeError> {
        PooledConnection::execute(self, sql, params).await
    }

    async fn query(&self, sql: &str, params: ParamValues) -> Result<Vec<Row>, SqlRuntimeError> {
        PooledConnection::query(self, sql, params).await
    }

    async fn disconnect(&self) -> Result<(), SqlRuntimeError> {
        PooledConnection::disconnect(self)
    }
}

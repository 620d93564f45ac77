//! Connection pooling on top of `deadpool::managed`.
//!
//! The pool hands out [`PooledConnection`] proxies. A proxy keeps its identity
//! across borrow and return, refuses the operations that would open or drop a
//! database, and hands its connection back on `disconnect`.

mod manager;
mod proxy;

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use deadpool::Runtime;
use deadpool::managed::{Object, Pool};
use tracing::{debug, warn};

pub use manager::ConnectionManager;
pub use proxy::PooledConnection;

use manager::PoolTracker;

use crate::client::ClientLibrary;
use crate::config::{ConnectionOptions, PoolOptions};
use crate::error::SqlRuntimeError;
use crate::guard::ResourceGuard;
use crate::translation::PlaceholderAnalyzer;

type InnerPool = Pool<ConnectionManager>;

struct ActivePool {
    pool: InnerPool,
    tracker: Arc<PoolTracker>,
}

/// Snapshot of pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    pub max_size: usize,
    /// Connections currently held by the pool, borrowed or idle.
    pub size: usize,
    /// Idle connections ready to be borrowed.
    pub available: usize,
    /// Callers waiting for a connection.
    pub waiting: usize,
    /// Proxies currently lent out.
    pub borrowed: usize,
}

/// Pool of connections to one database.
///
/// ```rust,no_run
/// use sql_runtime::prelude::*;
///
/// # async fn run(client: ClientLibrary) -> Result<(), SqlRuntimeError> {
/// let pool = ConnectionPool::new(client);
/// pool.create(ConnectionOptions::new("employee.fdb"), PoolOptions::default()).await?;
/// let conn = pool.get().await?;
/// let rows = conn.query("SELECT * FROM T WHERE X = :x", ParamValues::named([("x", 1i64)])).await?;
/// conn.disconnect()?;
/// # let _ = rows;
/// pool.destroy().await?;
/// # Ok(())
/// # }
/// ```
pub struct ConnectionPool {
    client: ClientLibrary,
    analyzer: PlaceholderAnalyzer,
    guard: ResourceGuard,
    active: Mutex<Option<Arc<ActivePool>>>,
}

impl fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("created", &self.is_created())
            .finish_non_exhaustive()
    }
}

impl ConnectionPool {
    #[must_use]
    pub fn new(client: ClientLibrary) -> Self {
        Self::with_analyzer(client, PlaceholderAnalyzer::default())
    }

    #[must_use]
    pub fn with_analyzer(client: ClientLibrary, analyzer: PlaceholderAnalyzer) -> Self {
        Self {
            client,
            analyzer,
            guard: ResourceGuard::new(),
            active: Mutex::new(None),
        }
    }

    fn active(&self) -> Option<Arc<ActivePool>> {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_active(&self, active: Option<Arc<ActivePool>>) {
        *self.active.lock().unwrap_or_else(PoisonError::into_inner) = active;
    }

    #[must_use]
    pub fn is_created(&self) -> bool {
        self.active().is_some()
    }

    /// Build the underlying pool. Connections are opened lazily by [`ConnectionPool::get`].
    ///
    /// # Errors
    /// `AlreadyCreated` when called twice without [`ConnectionPool::destroy`],
    /// `ConfigError` for invalid options.
    pub async fn create(
        &self,
        options: ConnectionOptions,
        pool_options: PoolOptions,
    ) -> Result<(), SqlRuntimeError> {
        let _permit = self.guard.acquire().await;
        if self.is_created() {
            return Err(SqlRuntimeError::AlreadyCreated);
        }
        options.validate()?;
        if pool_options.max_size == 0 {
            return Err(SqlRuntimeError::ConfigError(
                "pool max_size must be at least 1".into(),
            ));
        }

        let tracker = Arc::new(PoolTracker::default());
        let manager = ConnectionManager::new(
            self.client.clone(),
            options.clone(),
            self.analyzer.clone(),
            Arc::clone(&tracker),
        );
        let pool = Pool::builder(manager)
            .max_size(pool_options.max_size)
            .wait_timeout(pool_options.wait_timeout)
            .create_timeout(pool_options.create_timeout)
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| SqlRuntimeError::ConfigError(format!("failed to build pool: {e}")))?;

        self.set_active(Some(Arc::new(ActivePool { pool, tracker })));
        debug!(database = %options.database, max_size = pool_options.max_size, "pool created");
        Ok(())
    }

    /// Borrow a connection, waiting per the pool's `wait_timeout` when none is free.
    ///
    /// # Errors
    /// `NotCreated` before [`ConnectionPool::create`], `PoolError` on timeout or
    /// after the pool is closed, or the failure that prevented opening a new
    /// connection.
    pub async fn get(&self) -> Result<PooledConnection, SqlRuntimeError> {
        self.guard.wait_until_free().await;
        let active = self.active().ok_or(SqlRuntimeError::NotCreated)?;
        let object = active.pool.get().await?;
        let proxy = PooledConnection::clone(&object);
        proxy.lend(object);
        debug!(connection = proxy.id().as_u64(), "borrowed from pool");
        Ok(proxy)
    }

    /// Current occupancy.
    ///
    /// # Errors
    /// `NotCreated` before [`ConnectionPool::create`].
    pub fn status(&self) -> Result<PoolStatus, SqlRuntimeError> {
        let active = self.active().ok_or(SqlRuntimeError::NotCreated)?;
        let status = active.pool.status();
        let borrowed = active
            .tracker
            .proxies()
            .iter()
            .filter(|p| p.is_borrowed())
            .count();
        Ok(PoolStatus {
            max_size: status.max_size,
            size: status.size,
            available: status.available,
            waiting: status.waiting,
            borrowed,
        })
    }

    /// Tear the pool down.
    ///
    /// Connections that callers never returned are detached with a warning,
    /// connections still being opened are waited for, idle connections are
    /// closed, and only then is the pool marked not created.
    ///
    /// # Errors
    /// `NotCreated` before [`ConnectionPool::create`], or the first failure
    /// closing an idle connection.
    pub async fn destroy(&self) -> Result<(), SqlRuntimeError> {
        let _permit = self.guard.acquire().await;
        let active = self.active().ok_or(SqlRuntimeError::NotCreated)?;

        for proxy in active.tracker.proxies() {
            let Some(object) = proxy.take_lease() else {
                continue;
            };
            warn!(
                connection = proxy.id().as_u64(),
                "pooled connection was never returned; disconnecting it"
            );
            let _ = Object::take(object);
            if let Err(err) = proxy.underlying().disconnect().await {
                warn!(connection = proxy.id().as_u64(), error = %err, "failed to disconnect leaked connection");
            }
        }

        active.tracker.drain_creates().await;

        let idle = active.tracker.proxies();
        active.pool.close();
        let mut first_error = None;
        for proxy in idle {
            if !proxy.underlying().connected() {
                continue;
            }
            if let Err(err) = proxy.underlying().disconnect().await {
                first_error.get_or_insert(err);
            }
        }

        self.set_active(None);
        debug!("pool destroyed");
        first_error.map_or(Ok(()), Err)
    }
}

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use deadpool::managed::{Manager, Metrics, RecycleError, RecycleResult};
use tokio::sync::Notify;
use tracing::debug;

use super::proxy::{PooledConnection, ProxyInner};
use crate::client::ClientLibrary;
use crate::config::ConnectionOptions;
use crate::connection::Connection;
use crate::error::SqlRuntimeError;
use crate::translation::PlaceholderAnalyzer;
use crate::types::ConnectionId;

/// Bookkeeping shared between the manager and the pool front end: every proxy
/// the manager created and the number of creates still running.
#[derive(Default)]
pub(crate) struct PoolTracker {
    proxies: Mutex<HashMap<ConnectionId, Weak<ProxyInner>>>,
    creating: AtomicUsize,
    created: Notify,
}

impl PoolTracker {
    fn register(&self, proxy: &PooledConnection) {
        self.proxies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(proxy.id(), proxy.downgrade());
    }

    fn unregister(&self, id: ConnectionId) {
        self.proxies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }

    /// Live proxies, in no particular order.
    pub(crate) fn proxies(&self) -> Vec<PooledConnection> {
        self.proxies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter_map(PooledConnection::upgrade)
            .collect()
    }

    pub(crate) fn in_flight_creates(&self) -> usize {
        self.creating.load(Ordering::Acquire)
    }

    /// Wait until no create is running.
    pub(crate) async fn drain_creates(&self) {
        loop {
            let notified = self.created.notified();
            if self.in_flight_creates() == 0 {
                return;
            }
            notified.await;
        }
    }

    fn begin_create(&self) -> CreateTicket<'_> {
        self.creating.fetch_add(1, Ordering::AcqRel);
        CreateTicket { tracker: self }
    }
}

struct CreateTicket<'a> {
    tracker: &'a PoolTracker,
}

impl Drop for CreateTicket<'_> {
    fn drop(&mut self) {
        self.tracker.creating.fetch_sub(1, Ordering::AcqRel);
        self.tracker.created.notify_waiters();
    }
}

/// `deadpool` manager that opens real connections and wraps them in proxies.
pub struct ConnectionManager {
    client: ClientLibrary,
    options: ConnectionOptions,
    analyzer: PlaceholderAnalyzer,
    tracker: Arc<PoolTracker>,
}

impl ConnectionManager {
    pub(crate) fn new(
        client: ClientLibrary,
        options: ConnectionOptions,
        analyzer: PlaceholderAnalyzer,
        tracker: Arc<PoolTracker>,
    ) -> Self {
        Self {
            client,
            options,
            analyzer,
            tracker,
        }
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("database", &self.options.database)
            .field("in_flight_creates", &self.tracker.in_flight_creates())
            .finish()
    }
}

impl Manager for ConnectionManager {
    type Type = PooledConnection;
    type Error = SqlRuntimeError;

    async fn create(&self) -> Result<Self::Type, Self::Error> {
        let _ticket = self.tracker.begin_create();
        let connection = Connection::with_analyzer(
            self.client.clone(),
            self.options.clone(),
            self.analyzer.clone(),
        );
        connection.connect().await?;
        let proxy = PooledConnection::new(connection);
        self.tracker.register(&proxy);
        debug!(connection = proxy.id().as_u64(), "pooled connection created");
        Ok(proxy)
    }

    async fn recycle(&self, conn: &mut Self::Type, _metrics: &Metrics) -> RecycleResult<Self::Error> {
        if conn.underlying().connected() {
            Ok(())
        } else {
            Err(RecycleError::message("connection is no longer attached"))
        }
    }

    fn detach(&self, conn: &mut Self::Type) {
        self.tracker.unregister(conn.id());
    }
}

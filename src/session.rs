use async_trait::async_trait;

use crate::config::TransactionOptions;
use crate::connection::Connection;
use crate::cursor::Row;
use crate::error::SqlRuntimeError;
use crate::transaction::Transaction;
use crate::translation::ParamValues;
use crate::types::ConnectionId;

/// Operations shared by a direct [`Connection`] and a
/// [`PooledConnection`](crate::pool::PooledConnection), so application code can be
/// written once against either.
///
/// `disconnect` closes a direct connection but only hands a pooled one back.
#[async_trait]
pub trait Session: Send + Sync {
    fn connection_id(&self) -> ConnectionId;

    fn connected(&self) -> bool;

    async fn start_transaction(
        &self,
        options: &TransactionOptions,
    ) -> Result<Transaction, SqlRuntimeError>;

    async fn execute(
        &self,
        sql: &str,
        params: ParamValues,
    ) -> Result<Option<Row>, SqlRuntimeError>;

    async fn query(&self, sql: &str, params: ParamValues) -> Result<Vec<Row>, SqlRuntimeError>;

    async fn disconnect(&self) -> Result<(), SqlRuntimeError>;
}

#[async_trait]
impl Session for Connection {
    fn connection_id(&self) -> ConnectionId {
        self.id()
    }

    fn connected(&self) -> bool {
        Connection::connected(self)
    }

    async fn start_transaction(
        &self,
        options: &TransactionOptions,
    ) -> Result<Transaction, SqlRuntimeError> {
        Connection::start_transaction(self, options).await
    }

    async fn execute(
        &self,
        sql: &str,
        params: ParamValues,
    ) -> Result<Option<Row>, SqlRuntimeError> {
        Connection::execute(self, sql, params).await
    }

    async fn query(&self, sql: &str, params: ParamValues) -> Result<Vec<Row>, SqlRuntimeError> {
        Connection::query(self, sql, params).await
    }

    async fn disconnect(&self) -> Result<(), SqlRuntimeError> {
        Connection::disconnect(self).await
    }
}

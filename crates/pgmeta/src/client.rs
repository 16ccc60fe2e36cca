//! Executor capability consumed by the statement builders.
//!
//! The builders never open connections. They are handed something that
//! implements [`GenericClient`] (a connection, a transaction, a pooled client
//! or a test double) and, for pipelines, [`TransactionalClient`].

use crate::error::{OrmError, OrmResult};
use crate::param::Param;
use crate::row::Row;
use std::future::Future;
use tokio_postgres::types::ToSql;

/// A trait that unifies database clients and transactions.
pub trait GenericClient: Send + Sync {
    /// Execute a statement and return all rows.
    fn query(&self, sql: &str, params: &[Param]) -> impl Future<Output = OrmResult<Vec<Row>>> + Send;

    /// Execute a statement and return the affected row count.
    fn execute(&self, sql: &str, params: &[Param]) -> impl Future<Output = OrmResult<u64>> + Send;

    /// Token for cancelling the statement currently running on this session.
    fn cancel_token(&self) -> Option<tokio_postgres::CancelToken> {
        None
    }
}

/// An exclusive transactional execution context.
pub trait TransactionContext: GenericClient {
    fn commit(self) -> impl Future<Output = OrmResult<()>> + Send;

    fn rollback(self) -> impl Future<Output = OrmResult<()>> + Send;
}

/// A client that can open a transaction.
pub trait TransactionalClient: GenericClient {
    type Transaction<'a>: TransactionContext
    where
        Self: 'a;

    fn begin(&mut self) -> impl Future<Output = OrmResult<Self::Transaction<'_>>> + Send;
}

fn driver_params(params: &[Param]) -> Vec<&(dyn ToSql + Sync)> {
    params
        .iter()
        .map(|p| &p.value as &(dyn ToSql + Sync))
        .collect()
}

async fn pg_query(client: &tokio_postgres::Client, sql: &str, params: &[Param]) -> OrmResult<Vec<Row>> {
    let rows = tokio_postgres::Client::query(client, sql, &driver_params(params))
        .await
        .map_err(OrmError::from_db_error)?;
    Ok(rows.iter().map(Row::from_pg).collect())
}

async fn pg_execute(client: &tokio_postgres::Client, sql: &str, params: &[Param]) -> OrmResult<u64> {
    tokio_postgres::Client::execute(client, sql, &driver_params(params))
        .await
        .map_err(OrmError::from_db_error)
}

impl GenericClient for tokio_postgres::Client {
    async fn query(&self, sql: &str, params: &[Param]) -> OrmResult<Vec<Row>> {
        pg_query(self, sql, params).await
    }

    async fn execute(&self, sql: &str, params: &[Param]) -> OrmResult<u64> {
        pg_execute(self, sql, params).await
    }

    fn cancel_token(&self) -> Option<tokio_postgres::CancelToken> {
        Some(tokio_postgres::Client::cancel_token(self))
    }
}

impl GenericClient for tokio_postgres::Transaction<'_> {
    async fn query(&self, sql: &str, params: &[Param]) -> OrmResult<Vec<Row>> {
        let rows = tokio_postgres::Transaction::query(self, sql, &driver_params(params))
            .await
            .map_err(OrmError::from_db_error)?;
        Ok(rows.iter().map(Row::from_pg).collect())
    }

    async fn execute(&self, sql: &str, params: &[Param]) -> OrmResult<u64> {
        tokio_postgres::Transaction::execute(self, sql, &driver_params(params))
            .await
            .map_err(OrmError::from_db_error)
    }

    fn cancel_token(&self) -> Option<tokio_postgres::CancelToken> {
        Some(tokio_postgres::Transaction::cancel_token(self))
    }
}

impl TransactionContext for tokio_postgres::Transaction<'_> {
    async fn commit(self) -> OrmResult<()> {
        tokio_postgres::Transaction::commit(self)
            .await
            .map_err(OrmError::from_db_error)
    }

    async fn rollback(self) -> OrmResult<()> {
        tokio_postgres::Transaction::rollback(self)
            .await
            .map_err(OrmError::from_db_error)
    }
}

impl TransactionalClient for tokio_postgres::Client {
    type Transaction<'a> = tokio_postgres::Transaction<'a>;

    async fn begin(&mut self) -> OrmResult<Self::Transaction<'_>> {
        self.transaction().await.map_err(OrmError::from_db_error)
    }
}

// ===== deadpool-postgres support =====

#[cfg(feature = "pool")]
impl GenericClient for deadpool_postgres::Client {
    async fn query(&self, sql: &str, params: &[Param]) -> OrmResult<Vec<Row>> {
        // Delegate to the deref target (ClientWrapper -> tokio_postgres::Client).
        let client: &tokio_postgres::Client = self;
        pg_query(client, sql, params).await
    }

    async fn execute(&self, sql: &str, params: &[Param]) -> OrmResult<u64> {
        let client: &tokio_postgres::Client = self;
        pg_execute(client, sql, params).await
    }

    fn cancel_token(&self) -> Option<tokio_postgres::CancelToken> {
        let client: &tokio_postgres::Client = self;
        Some(client.cancel_token())
    }
}

#[cfg(feature = "pool")]
impl TransactionalClient for deadpool_postgres::Client {
    type Transaction<'a> = deadpool_postgres::Transaction<'a>;

    async fn begin(&mut self) -> OrmResult<Self::Transaction<'_>> {
        self.transaction().await.map_err(OrmError::from_db_error)
    }
}

#[cfg(feature = "pool")]
impl GenericClient for deadpool_postgres::Transaction<'_> {
    async fn query(&self, sql: &str, params: &[Param]) -> OrmResult<Vec<Row>> {
        GenericClient::query(&**self, sql, params).await
    }

    async fn execute(&self, sql: &str, params: &[Param]) -> OrmResult<u64> {
        GenericClient::execute(&**self, sql, params).await
    }

    fn cancel_token(&self) -> Option<tokio_postgres::CancelToken> {
        GenericClient::cancel_token(&**self)
    }
}

#[cfg(feature = "pool")]
impl TransactionContext for deadpool_postgres::Transaction<'_> {
    async fn commit(self) -> OrmResult<()> {
        deadpool_postgres::Transaction::commit(self)
            .await
            .map_err(OrmError::from_db_error)
    }

    async fn rollback(self) -> OrmResult<()> {
        deadpool_postgres::Transaction::rollback(self)
            .await
            .map_err(OrmError::from_db_error)
    }
}

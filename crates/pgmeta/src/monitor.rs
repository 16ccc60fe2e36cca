//! Query timeouts and slow-statement logging around any executor.
//!
//! ```ignore
//! use pgmeta::{InstrumentedClient, MonitorConfig};
//! use std::time::Duration;
//!
//! let client = InstrumentedClient::new(client).with_config(
//!     MonitorConfig::new()
//!         .with_query_timeout(Duration::from_secs(30))
//!         .with_slow_query_threshold(Duration::from_millis(200))
//!         .enable_monitoring(),
//! );
//! let people = qb::select::<Person>().fetch_all(&client).await?;
//! ```

use crate::client::{GenericClient, TransactionContext, TransactionalClient};
use crate::error::{OrmError, OrmResult};
use crate::param::Param;
use crate::row::Row;
use std::borrow::Cow;
use std::future::Future;
use std::time::{Duration, Instant};

/// Default cap on logged statement text.
pub const DEFAULT_MAX_SQL_LENGTH: usize = 1000;

/// Configuration for query monitoring and timeouts.
///
/// By default, monitoring is disabled and there is no timeout.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Query timeout duration. `None` means no timeout (default).
    pub query_timeout: Option<Duration>,
    /// Statements slower than this are logged at `warn`.
    pub slow_query_threshold: Option<Duration>,
    /// Whether completed statements are logged.
    pub monitoring_enabled: bool,
    /// Logged statement text is cut to this many characters.
    pub max_sql_length: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            query_timeout: None,
            slow_query_threshold: None,
            monitoring_enabled: false,
            max_sql_length: DEFAULT_MAX_SQL_LENGTH,
        }
    }
}

impl MonitorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Statements exceeding this duration are cancelled and fail with
    /// [`OrmError::Timeout`].
    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = Some(timeout);
        self
    }

    pub fn with_slow_query_threshold(mut self, threshold: Duration) -> Self {
        self.slow_query_threshold = Some(threshold);
        self
    }

    pub fn with_max_sql_length(mut self, max: usize) -> Self {
        self.max_sql_length = max;
        self
    }

    pub fn enable_monitoring(mut self) -> Self {
        self.monitoring_enabled = true;
        self
    }

    pub fn disable_monitoring(mut self) -> Self {
        self.monitoring_enabled = false;
        self
    }
}

/// Cut `sql` to at most `max` characters, marking the cut.
pub fn truncate_sql(sql: &str, max: usize) -> Cow<'_, str> {
    match sql.char_indices().nth(max) {
        Some((at, _)) => Cow::Owned(format!("{}...", &sql[..at])),
        None => Cow::Borrowed(sql),
    }
}

/// An executor wrapper applying a [`MonitorConfig`].
///
/// Transactions opened through it are wrapped too, so pipelines run under
/// the same timeout and logging.
pub struct InstrumentedClient<C> {
    client: C,
    config: MonitorConfig,
}

impl<C> InstrumentedClient<C> {
    pub fn new(client: C) -> Self {
        Self {
            client,
            config: MonitorConfig::default(),
        }
    }

    pub fn with_config(mut self, config: MonitorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn inner(&self) -> &C {
        &self.client
    }

    pub fn into_inner(self) -> C {
        self.client
    }
}

impl<C: GenericClient> InstrumentedClient<C> {
    async fn with_timeout<T, F>(&self, future: F) -> OrmResult<T>
    where
        F: Future<Output = OrmResult<T>> + Send,
    {
        match self.config.query_timeout {
            Some(timeout) => {
                tokio::pin!(future);
                tokio::select! {
                    result = &mut future => result,
                    _ = tokio::time::sleep(timeout) => {
                        if let Some(token) = self.client.cancel_token() {
                            tokio::spawn(async move {
                                let _ = token.cancel_query(tokio_postgres::NoTls).await;
                            });
                        }
                        Err(OrmError::Timeout(timeout))
                    }
                }
            }
            None => future.await,
        }
    }

    fn report<T>(&self, sql: &str, params: usize, elapsed: Duration, result: &OrmResult<T>) {
        #[cfg(feature = "tracing")]
        {
            let shown = truncate_sql(sql, self.config.max_sql_length);
            let elapsed_ms = elapsed.as_millis() as u64;
            if let Err(e) = result {
                tracing::warn!(target: "pgmeta.sql", elapsed_ms, params, error = %e, sql = %shown, "query failed");
                return;
            }
            if let Some(threshold) = self.config.slow_query_threshold
                && elapsed > threshold
            {
                tracing::warn!(target: "pgmeta.sql", elapsed_ms, params, sql = %shown, "slow query");
            } else if self.config.monitoring_enabled {
                tracing::debug!(target: "pgmeta.sql", elapsed_ms, params, sql = %shown, "query");
            }
        }
        #[cfg(not(feature = "tracing"))]
        let _ = (sql, params, elapsed, result);
    }
}

impl<C: GenericClient> GenericClient for InstrumentedClient<C> {
    async fn query(&self, sql: &str, params: &[Param]) -> OrmResult<Vec<Row>> {
        let start = Instant::now();
        let result = self.with_timeout(self.client.query(sql, params)).await;
        self.report(sql, params.len(), start.elapsed(), &result);
        result
    }

    async fn execute(&self, sql: &str, params: &[Param]) -> OrmResult<u64> {
        let start = Instant::now();
        let result = self.with_timeout(self.client.execute(sql, params)).await;
        self.report(sql, params.len(), start.elapsed(), &result);
        result
    }

    fn cancel_token(&self) -> Option<tokio_postgres::CancelToken> {
        self.client.cancel_token()
    }
}

impl<C: TransactionContext> TransactionContext for InstrumentedClient<C> {
    async fn commit(self) -> OrmResult<()> {
        self.client.commit().await
    }

    async fn rollback(self) -> OrmResult<()> {
        self.client.rollback().await
    }
}

impl<C: TransactionalClient> TransactionalClient for InstrumentedClient<C> {
    type Transaction<'a>
        = InstrumentedClient<C::Transaction<'a>>
    where
        Self: 'a;

    async fn begin(&mut self) -> OrmResult<Self::Transaction<'_>> {
        let tx = self.client.begin().await?;
        Ok(InstrumentedClient {
            client: tx,
            config: self.config.clone(),
        })
    }
}

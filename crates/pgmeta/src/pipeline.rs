//! Pipelined execution: several pre-assembled statements in one transaction.
//!
//! Entries run in order against a single transaction. The batch is
//! all-or-nothing: if any entry fails, or the batch is cancelled, the
//! transaction is rolled back and one aggregate error is returned.
//!
//! # Example
//!
//! ```ignore
//! use pgmeta::{Pipeline, Shape, SqlQb, qb};
//!
//! let mut batch = Pipeline::new();
//! let debit = batch.add(&qb::update::<Account>().set_increment(AccountField::Balance, -10).where_pk(1), Shape::Affected)?;
//! let credit = batch.add(&qb::update::<Account>().set_increment(AccountField::Balance, 10).where_pk(2), Shape::One)?;
//!
//! let results = batch.execute(&mut client).await?;
//! assert_eq!(results.rows_affected(debit)?, 1);
//! let account: Option<Account> = results.one(credit)?;
//! ```

use crate::client::{GenericClient, TransactionContext, TransactionalClient};
use crate::error::{OrmError, OrmResult};
use crate::exec::{Assembled, Outcome, Shape, dispatch};
use crate::param::Param;
use crate::qb::SqlQb;
use crate::row::FromRow;
use crate::value::FromValue;
use std::future::Future;
use std::time::{Duration, Instant};

/// One assembled statement and the shape its result is read in.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineEntry {
    stmt: Assembled,
    shape: Shape,
}

impl PipelineEntry {
    pub fn new(stmt: Assembled, shape: Shape) -> Self {
        Self { stmt, shape }
    }

    pub fn sql(&self) -> &str {
        &self.stmt.sql
    }

    pub fn params(&self) -> &[Param] {
        &self.stmt.params
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }
}

/// Pipeline execution settings.
#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    /// Upper bound for the whole batch. `None` means no timeout (default).
    pub timeout: Option<Duration>,
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel and roll back the batch when it runs longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Ordered batch of statements executed in one transaction.
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    entries: Vec<PipelineEntry>,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Assemble `qb` for `shape` and append it. Returns the entry index.
    ///
    /// Assembly errors surface here, before anything is sent.
    pub fn add(&mut self, qb: &impl SqlQb, shape: Shape) -> OrmResult<usize> {
        let entry = qb.pipe(shape)?;
        Ok(self.push(entry))
    }

    /// Append a pre-assembled entry. Returns the entry index.
    pub fn push(&mut self, entry: PipelineEntry) -> usize {
        self.entries.push(entry);
        self.entries.len() - 1
    }

    pub fn entries(&self) -> &[PipelineEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Run every entry in one transaction, honoring the configured timeout.
    pub async fn execute<C: TransactionalClient>(&self, client: &mut C) -> OrmResult<PipelineResults> {
        match self.config.timeout {
            Some(timeout) => self.execute_with_timeout(client, timeout).await,
            None => {
                self.run(client, std::future::pending::<()>(), || OrmError::Cancelled)
                    .await
            }
        }
    }

    /// Like [`Pipeline::execute`], failing with [`OrmError::Timeout`] once
    /// `timeout` elapses. The batch is rolled back.
    pub async fn execute_with_timeout<C: TransactionalClient>(
        &self,
        client: &mut C,
        timeout: Duration,
    ) -> OrmResult<PipelineResults> {
        self.run(client, tokio::time::sleep(timeout), || OrmError::Timeout(timeout))
            .await
    }

    /// Like [`Pipeline::execute`], failing with [`OrmError::Cancelled`] as
    /// soon as `cancel` resolves. The in-flight statement is interrupted and
    /// the batch is rolled back.
    pub async fn execute_until<C, F>(&self, client: &mut C, cancel: F) -> OrmResult<PipelineResults>
    where
        C: TransactionalClient,
        F: Future<Output = ()>,
    {
        self.run(client, cancel, || OrmError::Cancelled).await
    }

    async fn run<C, F>(
        &self,
        client: &mut C,
        cancel: F,
        interrupted: impl FnOnce() -> OrmError,
    ) -> OrmResult<PipelineResults>
    where
        C: TransactionalClient,
        F: Future<Output = ()>,
    {
        if self.entries.is_empty() {
            return Ok(PipelineResults::default());
        }

        let start = Instant::now();
        let tx = client.begin().await?;
        tokio::pin!(cancel);

        let result = tokio::select! {
            biased;
            _ = &mut cancel => {
                if let Some(token) = tx.cancel_token() {
                    tokio::spawn(async move {
                        let _ = token.cancel_query(tokio_postgres::NoTls).await;
                    });
                }
                Err(interrupted())
            }
            result = self.run_entries(&tx) => result,
        };

        match result {
            Ok(outcomes) => {
                tx.commit().await?;
                #[cfg(feature = "tracing")]
                tracing::debug!(
                    target: "pgmeta.pipeline",
                    entries = outcomes.len(),
                    elapsed_us = start.elapsed().as_micros() as u64,
                    "pipeline committed"
                );
                #[cfg(not(feature = "tracing"))]
                let _ = start;
                Ok(PipelineResults { outcomes })
            }
            Err(error) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    target: "pgmeta.pipeline",
                    entries = self.entries.len(),
                    failed_entry = ?error.pipeline_index(),
                    elapsed_us = start.elapsed().as_micros() as u64,
                    error = %error,
                    "pipeline rolled back"
                );
                #[cfg(not(feature = "tracing"))]
                let _ = start;
                match tx.rollback().await {
                    Ok(()) => Err(error),
                    Err(rollback) => Err(OrmError::Rollback {
                        original: Box::new(error),
                        rollback: Box::new(rollback),
                    }),
                }
            }
        }
    }

    /// One round trip per entry, in order; nothing after a failed entry is sent.
    async fn run_entries<G: GenericClient>(&self, conn: &G) -> OrmResult<Vec<Outcome>> {
        let mut outcomes = Vec::with_capacity(self.entries.len());
        for (index, entry) in self.entries.iter().enumerate() {
            let outcome = dispatch(conn, &entry.stmt, entry.shape)
                .await
                .map_err(|e| OrmError::Pipeline {
                    index,
                    source: Box::new(e),
                })?;
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }
}

/// Per-entry results of a committed pipeline, indexed like the entries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineResults {
    outcomes: Vec<Outcome>,
}

impl PipelineResults {
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Outcome> {
        self.outcomes.get(index)
    }

    fn take(&self, index: usize) -> OrmResult<Outcome> {
        self.outcomes
            .get(index)
            .cloned()
            .ok_or_else(|| OrmError::Other(format!("no pipeline entry at index {index}")))
    }

    /// Scalar entry value.
    pub fn scalar<V: FromValue>(&self, index: usize) -> OrmResult<V> {
        self.take(index)?.into_scalar()
    }

    /// One-row entry, materialized.
    pub fn one<T: FromRow>(&self, index: usize) -> OrmResult<Option<T>> {
        Ok(self.take(index)?.into_one()?.1)
    }

    /// List entry, materialized.
    pub fn list<T: FromRow>(&self, index: usize) -> OrmResult<Vec<T>> {
        self.take(index)?.into_list()
    }

    /// Rows affected (or produced) by an entry.
    pub fn rows_affected(&self, index: usize) -> OrmResult<u64> {
        self.outcomes
            .get(index)
            .map(Outcome::rows_affected)
            .ok_or_else(|| OrmError::Other(format!("no pipeline entry at index {index}")))
    }

    pub fn into_outcomes(self) -> Vec<Outcome> {
        self.outcomes
    }
}

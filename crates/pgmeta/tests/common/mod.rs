//! In-memory scripted executor shared by the integration tests.
//!
//! Every statement is recorded. Responses are scripted by SQL substring.
//! Write statements (INSERT/UPDATE/DELETE) are "effects": outside a
//! transaction they persist immediately, inside one they persist on commit
//! and are discarded on rollback.

#![allow(dead_code)]

use pgmeta::{
    GenericClient, OrmError, OrmResult, Param, Row, TransactionContext, TransactionalClient, Value,
};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Clone)]
enum Rule {
    Rows(Vec<Row>),
    Fail(String),
    Delay(Duration),
}

#[derive(Default)]
struct State {
    statements: Vec<(String, Vec<Value>)>,
    rules: Vec<(String, Rule)>,
    committed: Vec<String>,
    events: Vec<&'static str>,
    fail_rollback: bool,
}

#[derive(Clone, Default)]
pub struct MockClient {
    state: Arc<Mutex<State>>,
}

pub fn row(columns: &[(&str, Value)]) -> Row {
    Row::new(
        columns
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect(),
    )
}

fn is_write(sql: &str) -> bool {
    ["INSERT", "UPDATE", "DELETE"]
        .iter()
        .any(|kw| sql.starts_with(kw))
}

impl MockClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Answer statements containing `pattern` with `rows`.
    pub fn respond(&self, pattern: &str, rows: Vec<Row>) {
        self.lock().rules.push((pattern.to_string(), Rule::Rows(rows)));
    }

    /// Fail statements containing `pattern`.
    pub fn fail_on(&self, pattern: &str, message: &str) {
        self.lock()
            .rules
            .push((pattern.to_string(), Rule::Fail(message.to_string())));
    }

    /// Stall statements containing `pattern` before answering.
    pub fn delay_on(&self, pattern: &str, delay: Duration) {
        self.lock().rules.push((pattern.to_string(), Rule::Delay(delay)));
    }

    pub fn fail_rollback(&self) {
        self.lock().fail_rollback = true;
    }

    pub fn statements(&self) -> Vec<String> {
        self.lock().statements.iter().map(|(s, _)| s.clone()).collect()
    }

    pub fn params(&self, index: usize) -> Vec<Value> {
        self.lock().statements[index].1.clone()
    }

    pub fn count_matching(&self, pattern: &str) -> usize {
        self.lock()
            .statements
            .iter()
            .filter(|(s, _)| s.contains(pattern))
            .count()
    }

    /// Write statements that persisted.
    pub fn committed(&self) -> Vec<String> {
        self.lock().committed.clone()
    }

    /// BEGIN / COMMIT / ROLLBACK markers in order.
    pub fn events(&self) -> Vec<&'static str> {
        self.lock().events.clone()
    }

    fn plan(&self, sql: &str, params: &[Param]) -> (Option<Duration>, Result<Vec<Row>, String>) {
        let mut state = self.lock();
        state
            .statements
            .push((sql.to_string(), params.iter().map(|p| p.value.clone()).collect()));

        let mut delay = None;
        let mut outcome = None;
        for (pattern, rule) in &state.rules {
            if !sql.contains(pattern.as_str()) {
                continue;
            }
            match rule {
                Rule::Delay(d) if delay.is_none() => delay = Some(*d),
                Rule::Rows(rows) if outcome.is_none() => outcome = Some(Ok(rows.clone())),
                Rule::Fail(msg) if outcome.is_none() => outcome = Some(Err(msg.clone())),
                _ => {}
            }
        }
        (delay, outcome.unwrap_or_else(|| Ok(Vec::new())))
    }

    async fn run(&self, sql: &str, params: &[Param], pending: Option<&Mutex<Vec<String>>>) -> OrmResult<Vec<Row>> {
        let (delay, outcome) = self.plan(sql, params);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let rows = outcome.map_err(OrmError::Other)?;
        if is_write(sql) {
            match pending {
                Some(pending) => pending.lock().unwrap().push(sql.to_string()),
                None => self.lock().committed.push(sql.to_string()),
            }
        }
        Ok(rows)
    }
}

impl GenericClient for MockClient {
    async fn query(&self, sql: &str, params: &[Param]) -> OrmResult<Vec<Row>> {
        self.run(sql, params, None).await
    }

    async fn execute(&self, sql: &str, params: &[Param]) -> OrmResult<u64> {
        let rows = self.run(sql, params, None).await?;
        Ok(rows.len().max(1) as u64)
    }
}

pub struct MockTx<'a> {
    client: &'a MockClient,
    pending: Mutex<Vec<String>>,
}

impl GenericClient for MockTx<'_> {
    async fn query(&self, sql: &str, params: &[Param]) -> OrmResult<Vec<Row>> {
        self.client.run(sql, params, Some(&self.pending)).await
    }

    async fn execute(&self, sql: &str, params: &[Param]) -> OrmResult<u64> {
        let rows = self.client.run(sql, params, Some(&self.pending)).await?;
        Ok(rows.len().max(1) as u64)
    }
}

impl TransactionContext for MockTx<'_> {
    async fn commit(self) -> OrmResult<()> {
        let pending = self.pending.into_inner().unwrap();
        let mut state = self.client.lock();
        state.events.push("COMMIT");
        state.committed.extend(pending);
        Ok(())
    }

    async fn rollback(self) -> OrmResult<()> {
        let mut state = self.client.lock();
        state.events.push("ROLLBACK");
        if state.fail_rollback {
            return Err(OrmError::Connection("connection reset during rollback".into()));
        }
        Ok(())
    }
}

impl TransactionalClient for MockClient {
    type Transaction<'a> = MockTx<'a>;

    async fn begin(&mut self) -> OrmResult<MockTx<'_>> {
        self.lock().events.push("BEGIN");
        Ok(MockTx {
            client: self,
            pending: Mutex::new(Vec::new()),
        })
    }
}

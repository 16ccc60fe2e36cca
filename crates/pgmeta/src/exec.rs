//! Post-assembly dispatch: one path from assembled text to an outcome.

use crate::client::GenericClient;
use crate::error::{OrmError, OrmResult};
use crate::param::Param;
use crate::row::{FromRow, Row};
use crate::value::{FromValue, Value};
use std::time::Instant;

/// Final command text plus its ordered parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Assembled {
    pub sql: String,
    pub params: Vec<Param>,
}

impl Assembled {
    /// Bound values in placeholder order.
    pub fn values(&self) -> Vec<&Value> {
        self.params.iter().map(|p| &p.value).collect()
    }
}

/// How the result of a statement is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// Column 0 of row 0.
    Scalar,
    /// At most one row, plus the number of rows the statement produced.
    One,
    /// All rows.
    List,
    /// Affected row count only.
    Affected,
}

/// Result of dispatching one statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Scalar(Value),
    One { affected: u64, row: Option<Row> },
    List(Vec<Row>),
    Affected(u64),
}

impl Outcome {
    pub fn into_scalar<V: FromValue>(self) -> OrmResult<V> {
        match self {
            Outcome::Scalar(v) => V::from_value(v).map_err(|e| OrmError::decode("?column?", e)),
            other => Err(shape_mismatch("scalar", &other)),
        }
    }

    pub fn into_one<T: FromRow>(self) -> OrmResult<(u64, Option<T>)> {
        match self {
            Outcome::One { affected, row } => {
                let row = row.as_ref().map(T::from_row).transpose()?;
                Ok((affected, row))
            }
            other => Err(shape_mismatch("one", &other)),
        }
    }

    pub fn into_list<T: FromRow>(self) -> OrmResult<Vec<T>> {
        match self {
            Outcome::List(rows) => rows.iter().map(T::from_row).collect(),
            other => Err(shape_mismatch("list", &other)),
        }
    }

    pub fn rows_affected(&self) -> u64 {
        match self {
            Outcome::Scalar(_) => 1,
            Outcome::One { affected, .. } | Outcome::Affected(affected) => *affected,
            Outcome::List(rows) => rows.len() as u64,
        }
    }
}

fn shape_mismatch(expected: &str, got: &Outcome) -> OrmError {
    OrmError::Other(format!("expected {expected} result, got {got:?}"))
}

/// Run an assembled statement and read it in the requested shape.
///
/// Executor failures are wrapped with the command text; a scalar read with
/// no rows is [`OrmError::NoRows`].
pub async fn dispatch<C: GenericClient>(
    conn: &C,
    stmt: &Assembled,
    shape: Shape,
) -> OrmResult<Outcome> {
    let start = Instant::now();
    let result = run(conn, stmt, shape).await;

    #[cfg(feature = "tracing")]
    match &result {
        Ok(outcome) => tracing::debug!(
            target: "pgmeta.sql",
            shape = ?shape,
            param_count = stmt.params.len(),
            rows = outcome.rows_affected(),
            elapsed_us = start.elapsed().as_micros() as u64,
            sql = %stmt.sql,
        ),
        Err(e) => tracing::warn!(
            target: "pgmeta.sql",
            shape = ?shape,
            param_count = stmt.params.len(),
            error = %e,
            sql = %stmt.sql,
        ),
    }
    #[cfg(not(feature = "tracing"))]
    let _ = start;

    result
}

async fn run<C: GenericClient>(conn: &C, stmt: &Assembled, shape: Shape) -> OrmResult<Outcome> {
    let sql = stmt.sql.as_str();
    match shape {
        Shape::Affected => {
            let n = conn
                .execute(sql, &stmt.params)
                .await
                .map_err(|e| e.in_statement(sql))?;
            Ok(Outcome::Affected(n))
        }
        Shape::Scalar => {
            let rows = conn
                .query(sql, &stmt.params)
                .await
                .map_err(|e| e.in_statement(sql))?;
            rows.into_iter()
                .next()
                .and_then(Row::into_first)
                .map(Outcome::Scalar)
                .ok_or(OrmError::NoRows)
        }
        Shape::One => {
            let rows = conn
                .query(sql, &stmt.params)
                .await
                .map_err(|e| e.in_statement(sql))?;
            let affected = rows.len() as u64;
            Ok(Outcome::One {
                affected,
                row: rows.into_iter().next(),
            })
        }
        Shape::List => {
            let rows = conn
                .query(sql, &stmt.params)
                .await
                .map_err(|e| e.in_statement(sql))?;
            Ok(Outcome::List(rows))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_shapes_convert() {
        let row = Row::new(vec![("n".into(), Value::I64(3))]);
        assert_eq!(Outcome::Scalar(Value::I64(3)).into_scalar::<i64>().unwrap(), 3);
        let (n, r) = Outcome::One {
            affected: 1,
            row: Some(row.clone()),
        }
        .into_one::<Row>()
        .unwrap();
        assert_eq!((n, r), (1, Some(row.clone())));
        assert_eq!(Outcome::List(vec![row.clone(), row]).rows_affected(), 2);
        assert!(Outcome::Affected(1).into_list::<Row>().is_err());
    }
}

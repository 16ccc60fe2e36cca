//! INSERT statement builder.

use crate::client::GenericClient;
use crate::error::{OrmError, OrmResult};
use crate::exec::Shape;
use crate::param::ParamRegistry;
use crate::qb::clause::{DEFAULT_SRID, SetExpr, SetList};
use crate::qb::select::SelectQb;
use crate::qb::traits::SqlQb;
use crate::resolve::IntoColumn;
use crate::row::{FromRow, Row};
use crate::value::Value;
use std::marker::PhantomData;
use std::sync::Arc;

/// INSERT builder for one row.
///
/// ```text
/// INSERT INTO <table> (col, ...) VALUES (expr, ...) RETURNING ...
/// INSERT INTO <table> DEFAULT VALUES RETURNING ...
/// ```
///
/// The statement always returns the inserted row.
pub struct InsertQb<T = Row> {
    table: String,
    values: SetList,
    returning: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for InsertQb<T> {
    fn clone(&self) -> Self {
        Self {
            table: self.table.clone(),
            values: self.values.clone(),
            returning: self.returning.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for InsertQb<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InsertQb")
            .field("table", &self.table)
            .field("values", &self.values)
            .field("returning", &self.returning)
            .finish()
    }
}

impl<T> InsertQb<T> {
    pub(crate) fn with_table(table: &str, returning: String) -> Self {
        Self {
            table: table.to_string(),
            values: SetList::default(),
            returning,
            _marker: PhantomData,
        }
    }

    fn push(mut self, column: impl IntoColumn, expr: SetExpr) -> Self {
        self.values.push(&column, expr);
        self
    }

    /// Column value; `None`/null inserts NULL.
    pub fn set(self, column: impl IntoColumn, value: impl Into<Value>) -> Self {
        self.push(column, SetExpr::Value(value.into()))
    }

    /// Column value only when `Some`; otherwise the column default applies.
    pub fn set_opt<V: Into<Value>>(self, column: impl IntoColumn, value: Option<V>) -> Self {
        match value {
            Some(v) => self.set(column, v),
            None => self,
        }
    }

    /// `(sql)` used verbatim. Never pass caller data here.
    pub fn set_raw(self, column: impl IntoColumn, sql: &str) -> Self {
        self.push(column, SetExpr::Raw(sql.to_string()))
    }

    /// `(<sub-select>)`
    pub fn set_sub<U: 'static>(self, column: impl IntoColumn, sub: SelectQb<U>) -> Self {
        self.push(column, SetExpr::Sub(Arc::new(sub)))
    }

    /// `ST_GeomFromText('POINT(x y)', srid)`
    pub fn set_point(self, column: impl IntoColumn, x: f64, y: f64, srid: Option<i32>) -> Self {
        self.push(
            column,
            SetExpr::Point {
                x,
                y,
                srid: srid.unwrap_or(DEFAULT_SRID),
            },
        )
    }

    /// Override the RETURNING list.
    pub fn returning(mut self, fields: &str) -> Self {
        self.returning = fields.to_string();
        self
    }
}

impl<T: FromRow + 'static> InsertQb<T> {
    /// Insert and materialize the returned row.
    pub async fn fetch_one(&self, conn: &impl GenericClient) -> OrmResult<T> {
        let (_, row) = self.run(conn, Shape::One).await?.into_one()?;
        row.ok_or(OrmError::NoRows)
    }

    /// Inserted row count.
    pub async fn execute(&self, conn: &impl GenericClient) -> OrmResult<u64> {
        Ok(self.run(conn, Shape::Affected).await?.rows_affected())
    }
}

impl<T> SqlQb for InsertQb<T> {
    fn default_shape(&self) -> Shape {
        Shape::One
    }

    fn render_shape(&self, reg: &mut ParamRegistry, _shape: Shape) -> OrmResult<String> {
        let mut sql = format!("INSERT INTO {}", self.table);
        if self.values.is_empty() {
            sql.push_str(" DEFAULT VALUES");
        } else {
            let columns = self.values.columns().collect::<Vec<_>>().join(", ");
            let exprs = self
                .values
                .items()
                .iter()
                .map(|item| item.render_expr(reg))
                .collect::<OrmResult<Vec<_>>>()?;
            sql.push_str(&format!(" ({columns}) VALUES ({})", exprs.join(", ")));
        }
        sql.push_str(" RETURNING ");
        sql.push_str(&self.returning);
        Ok(sql)
    }
}

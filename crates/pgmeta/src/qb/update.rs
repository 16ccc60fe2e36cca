//! UPDATE statement builder.

use crate::client::GenericClient;
use crate::entity::Entity;
use crate::error::{OrmResult, UsageError};
use crate::exec::Shape;
use crate::param::ParamRegistry;
use crate::qb::clause::{DEFAULT_SRID, Filter, Scope, SetExpr, SetList, append_value};
use crate::qb::select::{SelectQb, where_pk};
use crate::qb::traits::SqlQb;
use crate::resolve::IntoColumn;
use crate::row::{FromRow, Row};
use crate::value::Value;
use std::marker::PhantomData;
use std::sync::Arc;

/// UPDATE builder.
///
/// ```text
/// UPDATE <table> <alias> SET col = expr, ... WHERE ... [RETURNING ...]
/// ```
///
/// A WHERE predicate and at least one SET item are required; both are
/// checked at assembly, before anything reaches the database.
pub struct UpdateQb<T = Row> {
    table: String,
    scope: Scope,
    set: SetList,
    returning: Option<String>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for UpdateQb<T> {
    fn clone(&self) -> Self {
        Self {
            table: self.table.clone(),
            scope: self.scope.clone(),
            set: self.set.clone(),
            returning: self.returning.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for UpdateQb<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateQb")
            .field("table", &self.table)
            .field("scope", &self.scope)
            .field("set", &self.set)
            .field("returning", &self.returning)
            .finish()
    }
}

impl<T> UpdateQb<T> {
    pub(crate) fn with_table(table: &str, alias: &str, returning: Option<String>) -> Self {
        Self {
            table: table.to_string(),
            scope: Scope::new(alias),
            set: SetList::default(),
            returning,
            _marker: PhantomData,
        }
    }

    fn push(mut self, column: impl IntoColumn, expr: SetExpr) -> Self {
        self.set.push(&column, expr);
        self
    }

    /// `column = value`; `None`/null sets NULL.
    pub fn set(self, column: impl IntoColumn, value: impl Into<Value>) -> Self {
        self.push(column, SetExpr::Value(value.into()))
    }

    /// `column = value` only when `value` is `Some`.
    pub fn set_opt<V: Into<Value>>(self, column: impl IntoColumn, value: Option<V>) -> Self {
        match value {
            Some(v) => self.set(column, v),
            None => self,
        }
    }

    /// `column = value` only when `condition` holds.
    pub fn set_if(self, condition: bool, column: impl IntoColumn, value: impl Into<Value>) -> Self {
        if condition { self.set(column, value) } else { self }
    }

    /// `column = NULL`
    pub fn set_null(self, column: impl IntoColumn) -> Self {
        self.push(column, SetExpr::Value(Value::Null))
    }

    /// `column = (sql)`, with `sql` used verbatim. Never pass caller data here.
    pub fn set_raw(self, column: impl IntoColumn, sql: &str) -> Self {
        self.push(column, SetExpr::Raw(sql.to_string()))
    }

    /// `column = (<sub-select>)`, numbered with the outer statement.
    pub fn set_sub<U: 'static>(self, column: impl IntoColumn, sub: SelectQb<U>) -> Self {
        self.push(column, SetExpr::Sub(Arc::new(sub)))
    }

    /// `column = column || value`; a scalar is appended as a one-element array.
    /// The value is cast to the column type when the column is a field tag.
    pub fn set_append(self, column: impl IntoColumn, value: impl Into<Value>) -> Self {
        self.push(column, SetExpr::Append(append_value(value.into())))
    }

    /// `column = array_remove(column, value)`
    pub fn set_remove(self, column: impl IntoColumn, value: impl Into<Value>) -> Self {
        self.push(column, SetExpr::Remove(value.into()))
    }

    /// `column = column + by`
    pub fn set_increment(self, column: impl IntoColumn, by: impl Into<Value>) -> Self {
        self.push(
            column,
            SetExpr::Increment {
                by: by.into(),
                default: None,
            },
        )
    }

    /// `column = COALESCE(column, default) + by`
    pub fn set_increment_or(
        self,
        column: impl IntoColumn,
        by: impl Into<Value>,
        default: impl Into<Value>,
    ) -> Self {
        self.push(
            column,
            SetExpr::Increment {
                by: by.into(),
                default: Some(default.into()),
            },
        )
    }

    /// `column = ST_GeomFromText('POINT(x y)', srid)`; SRID defaults to 4326.
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

    /// Override the RETURNING list (qualified library text).
    pub fn returning(mut self, fields: &str) -> Self {
        self.returning = Some(fields.to_string());
        self
    }
}

impl<T: Entity> UpdateQb<T> {
    /// `alias.<primary key> = value`
    pub fn where_pk(mut self, value: impl Into<Value>) -> Self {
        where_pk::<T>(&mut self.scope, value.into());
        self
    }
}

impl<T: FromRow + 'static> UpdateQb<T> {
    /// Affected row count.
    pub async fn execute(&self, conn: &impl GenericClient) -> OrmResult<u64> {
        Ok(self.run(conn, Shape::Affected).await?.rows_affected())
    }

    /// Affected row count plus the first updated row.
    pub async fn execute_returning_one(&self, conn: &impl GenericClient) -> OrmResult<(u64, Option<T>)> {
        self.run(conn, Shape::One).await?.into_one()
    }

    /// Every updated row.
    pub async fn execute_returning(&self, conn: &impl GenericClient) -> OrmResult<Vec<T>> {
        self.run(conn, Shape::List).await?.into_list()
    }
}

impl<T> Filter for UpdateQb<T> {
    fn scope_mut(&mut self) -> &mut Scope {
        &mut self.scope
    }
}

impl<T> SqlQb for UpdateQb<T> {
    fn default_shape(&self) -> Shape {
        Shape::Affected
    }

    fn render_shape(&self, reg: &mut ParamRegistry, shape: Shape) -> OrmResult<String> {
        if self.scope.conds.is_empty() {
            return Err(UsageError::MissingWhere.into());
        }
        if self.set.is_empty() {
            return Err(UsageError::MissingSet.into());
        }
        self.scope.prepare(reg)?;

        let mut sql = format!(
            "UPDATE {} {} SET {}",
            self.table,
            self.scope.alias,
            self.set.render(reg)?
        );
        sql.push_str(" WHERE ");
        sql.push_str(&self.scope.conds.render(reg)?);
        push_returning(&mut sql, shape, self.returning.as_deref(), &self.scope.alias);
        Ok(sql)
    }
}

/// RETURNING for row-reading shapes: the given list or `alias.*`.
pub(crate) fn push_returning(sql: &mut String, shape: Shape, fields: Option<&str>, alias: &str) {
    if shape == Shape::Affected {
        return;
    }
    sql.push_str(" RETURNING ");
    match fields {
        Some(fields) => sql.push_str(fields),
        None => {
            sql.push_str(alias);
            sql.push_str(".*");
        }
    }
}

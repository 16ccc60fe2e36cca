//! SELECT statement builder.

use crate::client::GenericClient;
use crate::entity::Entity;
use crate::error::{OrmResult, UsageError};
use crate::exec::Shape;
use crate::fragment::{Fragment, Render};
use crate::param::ParamRegistry;
use crate::qb::clause::{Cond, Filter, Join, JoinKind, JoinSource, Scope};
use crate::qb::traits::SqlQb;
use crate::resolve::IntoColumn;
use crate::row::{FromRow, Row};
use crate::value::{FromValue, Value};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

#[derive(Clone)]
enum Source {
    Table(String),
    Sub(Arc<dyn Render>),
}

#[derive(Clone)]
struct UnionPart {
    all: bool,
    parens: bool,
    stmt: Arc<dyn Render>,
}

/// SELECT builder producing rows of `T`.
///
/// ```text
/// SELECT <fields>[, <join fields>] FROM <source> <alias> [TABLESAMPLE SYSTEM (p)]
///   [JOIN ...] [WHERE ...] [GROUP BY ... [HAVING ...]] [ORDER BY ...]
///   [LIMIT n] [OFFSET n] [UNION [ALL] ...]
/// ```
pub struct SelectQb<T = Row> {
    source: Source,
    scope: Scope,
    fields: Fragment,
    default_fields: bool,
    joins: Vec<Join>,
    sample: Option<f64>,
    group_by: Vec<String>,
    having: Vec<Fragment>,
    order_by: Vec<String>,
    limit: Option<i64>,
    offset: Option<i64>,
    unions: Vec<UnionPart>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for SelectQb<T> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
            scope: self.scope.clone(),
            fields: self.fields.clone(),
            default_fields: self.default_fields,
            joins: self.joins.clone(),
            sample: self.sample,
            group_by: self.group_by.clone(),
            having: self.having.clone(),
            order_by: self.order_by.clone(),
            limit: self.limit,
            offset: self.offset,
            unions: self.unions.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for SelectQb<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut reg = ParamRegistry::new();
        match self.render_shape(&mut reg, Shape::List) {
            Ok(sql) => f.debug_tuple("SelectQb").field(&sql).finish(),
            Err(e) => f.debug_tuple("SelectQb").field(&e).finish(),
        }
    }
}

impl<T> SelectQb<T> {
    fn with_source(source: Source, alias: &str, fields: Fragment) -> Self {
        Self {
            source,
            scope: Scope::new(alias),
            fields,
            default_fields: true,
            joins: Vec::new(),
            sample: None,
            group_by: Vec::new(),
            having: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
            unions: Vec::new(),
            _marker: PhantomData,
        }
    }

    pub fn alias(&self) -> &str {
        &self.scope.alias
    }

    // ==================== Fields ====================

    fn take_fields(&mut self) -> &mut Fragment {
        if self.default_fields {
            self.fields = Fragment::new();
            self.default_fields = false;
        } else if !self.fields.is_empty() {
            self.fields.push(", ");
        }
        &mut self.fields
    }

    /// Replace the projection with raw library text.
    pub fn fields(mut self, sql: &str) -> Self {
        self.fields = Fragment::raw(sql);
        self.default_fields = false;
        self
    }

    /// Add one column to the projection (the first call replaces the default).
    pub fn field(mut self, column: impl IntoColumn) -> Self {
        let column = column.qualified(&self.scope.alias);
        self.take_fields().push(column);
        self
    }

    /// Add several columns to the projection.
    pub fn fields_of<C: IntoColumn>(mut self, columns: impl IntoIterator<Item = C>) -> Self {
        for column in columns {
            self = self.field(column);
        }
        self
    }

    /// Add an expression (which may bind values) to the projection.
    pub fn field_expr(mut self, expr: Fragment) -> Self {
        self.take_fields().append(expr);
        self
    }

    /// Project a point geometry column as `<col>_x`, `<col>_y`, `<col>_srid`.
    pub fn point_field(mut self, column: impl IntoColumn) -> Self {
        let qualified = column.qualified(&self.scope.alias);
        let bare = column.bare();
        self.take_fields().push(format!(
            "ST_X({qualified}) AS {bare}_x, ST_Y({qualified}) AS {bare}_y, ST_SRID({qualified}) AS {bare}_srid"
        ));
        self
    }

    // ==================== Source ====================

    /// `TABLESAMPLE SYSTEM (percent)`
    pub fn tablesample_system(mut self, percent: f64) -> Self {
        self.sample = Some(percent);
        self
    }

    // ==================== JOIN ====================

    /// Add a join against a table.
    pub fn join(mut self, kind: JoinKind, table: &str, alias: &str, on: impl Into<Fragment>) -> Self {
        self.joins.push(Join {
            kind,
            source: JoinSource::Table(table.to_string()),
            alias: alias.to_string(),
            on: on.into(),
            returning: None,
        });
        self
    }

    /// Add INNER JOIN.
    pub fn inner_join(self, table: &str, alias: &str, on: impl Into<Fragment>) -> Self {
        self.join(JoinKind::Inner, table, alias, on)
    }

    /// Add LEFT JOIN.
    pub fn left_join(self, table: &str, alias: &str, on: impl Into<Fragment>) -> Self {
        self.join(JoinKind::Left, table, alias, on)
    }

    /// Add RIGHT JOIN.
    pub fn right_join(self, table: &str, alias: &str, on: impl Into<Fragment>) -> Self {
        self.join(JoinKind::Right, table, alias, on)
    }

    /// Join a nested SELECT.
    pub fn join_sub<U: 'static>(
        mut self,
        kind: JoinKind,
        sub: SelectQb<U>,
        alias: &str,
        on: impl Into<Fragment>,
    ) -> Self {
        self.joins.push(Join {
            kind,
            source: JoinSource::Sub(Arc::new(sub)),
            alias: alias.to_string(),
            on: on.into(),
            returning: None,
        });
        self
    }

    /// Join an entity's table; with `returning`, its fields are appended to
    /// the outer projection.
    pub fn join_entity<U: Entity>(
        mut self,
        kind: JoinKind,
        alias: &str,
        on: impl Into<Fragment>,
        returning: bool,
    ) -> Self {
        let d = U::descriptor();
        self.joins.push(Join {
            kind,
            source: JoinSource::Table(d.table.to_string()),
            alias: alias.to_string(),
            on: on.into(),
            returning: returning.then(|| d.select_list(alias)),
        });
        self
    }

    // ==================== Grouping & ordering ====================

    /// Append a GROUP BY column.
    pub fn group_by(mut self, column: impl IntoColumn) -> Self {
        let column = column.qualified(&self.scope.alias).into_owned();
        self.group_by.push(column);
        self
    }

    /// HAVING predicate (template form); only emitted with GROUP BY.
    pub fn having(mut self, template: &str, args: Vec<Value>) -> Self {
        match Fragment::template(template, args) {
            Ok(f) => self.having.push(f),
            Err(e) => self.scope.defer(e),
        }
        self
    }

    /// Append `column ASC`.
    pub fn order_by(mut self, column: impl IntoColumn) -> Self {
        let column = column.qualified(&self.scope.alias);
        self.order_by.push(format!("{column} ASC"));
        self
    }

    /// Append `column DESC`.
    pub fn order_by_desc(mut self, column: impl IntoColumn) -> Self {
        let column = column.qualified(&self.scope.alias);
        self.order_by.push(format!("{column} DESC"));
        self
    }

    /// Append a raw ORDER BY item.
    pub fn order_by_raw(mut self, sql: &str) -> Self {
        self.order_by.push(sql.to_string());
        self
    }

    // ==================== Pagination ====================

    /// Set LIMIT.
    pub fn limit(mut self, n: i64) -> Self {
        self.limit = Some(n);
        self
    }

    /// Set OFFSET.
    pub fn offset(mut self, n: i64) -> Self {
        self.offset = Some(n);
        self
    }

    /// 1-based page: `LIMIT size OFFSET (index - 1) * size`.
    pub fn page(mut self, index: i64, size: i64) -> Self {
        self.limit = Some(size);
        self.offset = Some((index - 1).max(0) * size);
        self
    }

    // ==================== UNION ====================

    /// `... UNION <other>`
    pub fn union<U: 'static>(self, other: SelectQb<U>) -> Self {
        self.push_union(other, false)
    }

    /// `... UNION ALL <other>`
    pub fn union_all<U: 'static>(self, other: SelectQb<U>) -> Self {
        self.push_union(other, true)
    }

    fn push_union<U: 'static>(mut self, other: SelectQb<U>, all: bool) -> Self {
        let parens = other.has_tail();
        self.unions.push(UnionPart {
            all,
            parens,
            stmt: Arc::new(other),
        });
        self
    }

    fn has_tail(&self) -> bool {
        !self.order_by.is_empty() || self.limit.is_some() || self.offset.is_some()
    }

    /// Copy of this statement projecting only `expr`, without ordering or paging.
    fn projecting(&self, expr: Fragment) -> SelectQb<Row> {
        SelectQb {
            source: self.source.clone(),
            scope: self.scope.clone(),
            fields: expr,
            default_fields: false,
            joins: self.joins.clone(),
            sample: self.sample,
            group_by: self.group_by.clone(),
            having: self.having.clone(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
            unions: Vec::new(),
            _marker: PhantomData,
        }
    }

    fn coalesced(&self, func: &str, column: impl IntoColumn, cast: &str, default: Value) -> SelectQb<Row> {
        let column = column.qualified(&self.scope.alias);
        let mut expr = Fragment::raw(format!("COALESCE({func}({column}){cast}, "));
        expr.push_bind(default).push(")");
        self.projecting(expr)
    }
}

impl<T: 'static> SelectQb<T> {
    /// `SELECT COUNT(1)` over the same source and predicates.
    pub async fn count(&self, conn: &impl GenericClient) -> OrmResult<i64> {
        self.projecting(Fragment::raw("COUNT(1)"))
            .fetch_scalar(conn)
            .await
    }

    /// `COALESCE(MAX(column), default)`
    pub async fn max<V>(&self, conn: &impl GenericClient, column: impl IntoColumn, default: V) -> OrmResult<V>
    where
        V: FromValue + Into<Value> + Send,
    {
        self.coalesced("MAX", column, "", default.into())
            .fetch_scalar(conn)
            .await
    }

    /// `COALESCE(MIN(column), default)`
    pub async fn min<V>(&self, conn: &impl GenericClient, column: impl IntoColumn, default: V) -> OrmResult<V>
    where
        V: FromValue + Into<Value> + Send,
    {
        self.coalesced("MIN", column, "", default.into())
            .fetch_scalar(conn)
            .await
    }

    /// `COALESCE(SUM(column), default)`
    pub async fn sum<V>(&self, conn: &impl GenericClient, column: impl IntoColumn, default: V) -> OrmResult<V>
    where
        V: FromValue + Into<Value> + Send,
    {
        self.coalesced("SUM", column, "", default.into())
            .fetch_scalar(conn)
            .await
    }

    /// `COALESCE(AVG(column)::float8, default)`
    pub async fn avg(&self, conn: &impl GenericClient, column: impl IntoColumn, default: f64) -> OrmResult<f64> {
        self.coalesced("AVG", column, "::float8", default.into())
            .fetch_scalar(conn)
            .await
    }
}

impl<T: FromRow + 'static> SelectQb<T> {
    /// At most one row (`LIMIT 1`); `None` when nothing matches.
    pub async fn fetch_one(&self, conn: &impl GenericClient) -> OrmResult<Option<T>> {
        let (_, row) = self.run(conn, Shape::One).await?.into_one()?;
        Ok(row)
    }

    /// All rows; empty when nothing matches.
    pub async fn fetch_all(&self, conn: &impl GenericClient) -> OrmResult<Vec<T>> {
        self.run(conn, Shape::List).await?.into_list()
    }
}

impl SelectQb<Row> {
    /// SELECT from a table under an alias.
    pub fn from_table(table: &str, alias: &str) -> Self {
        Self::with_source(Source::Table(table.to_string()), alias, Fragment::raw("*"))
    }

    /// SELECT from a nested statement: `FROM (<sub>) alias`.
    pub fn from_sub<U: 'static>(sub: SelectQb<U>, alias: &str) -> Self {
        Self::with_source(Source::Sub(Arc::new(sub)), alias, Fragment::raw("*"))
    }
}

impl<T: Entity> SelectQb<T> {
    /// SELECT every field of `T` from its table.
    pub fn entity(alias: &str) -> Self {
        let d = T::descriptor();
        Self::with_source(
            Source::Table(d.table.to_string()),
            alias,
            Fragment::raw(d.select_list(alias)),
        )
    }

    /// `alias.<primary key> = value`
    pub fn where_pk(mut self, value: impl Into<Value>) -> Self {
        where_pk::<T>(&mut self.scope, value.into());
        self
    }
}

pub(crate) fn where_pk<T: Entity>(scope: &mut Scope, value: Value) {
    let d = T::descriptor();
    match d.primary_key() {
        Some(pk) => {
            let column = format!("{}.{}", scope.alias, pk.column);
            scope.push(Cond::Compare {
                column,
                op: "=",
                value,
                type_tag: Some(pk.type_tag),
            });
        }
        None => scope.defer(UsageError::NoPrimaryKey(d.table)),
    }
}

impl<T> Filter for SelectQb<T> {
    fn scope_mut(&mut self) -> &mut Scope {
        &mut self.scope
    }
}

impl<T> SqlQb for SelectQb<T> {
    fn default_shape(&self) -> Shape {
        Shape::List
    }

    fn render_shape(&self, reg: &mut ParamRegistry, shape: Shape) -> OrmResult<String> {
        self.scope.prepare(reg)?;

        let mut sql = String::from("SELECT ");
        sql.push_str(&self.fields.render(reg)?);
        for join in &self.joins {
            if let Some(fields) = &join.returning {
                sql.push_str(", ");
                sql.push_str(fields);
            }
        }

        sql.push_str(" FROM ");
        match &self.source {
            Source::Table(table) => sql.push_str(table),
            Source::Sub(sub) => {
                sql.push('(');
                sql.push_str(&sub.render(reg)?);
                sql.push(')');
            }
        }
        sql.push(' ');
        sql.push_str(&self.scope.alias);

        if let Some(percent) = self.sample {
            sql.push_str(&format!(" TABLESAMPLE SYSTEM ({})", reg.add(percent)));
        }

        for join in &self.joins {
            sql.push(' ');
            sql.push_str(&join.render(reg)?);
        }

        if !self.scope.conds.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.scope.conds.render(reg)?);
        }

        if !self.group_by.is_empty() {
            sql.push_str(" GROUP BY ");
            sql.push_str(&self.group_by.join(", "));
            if !self.having.is_empty() {
                let grouped = self.having.len() > 1;
                let parts = self
                    .having
                    .iter()
                    .map(|h| {
                        let sql = h.render(reg)?;
                        Ok(if grouped { format!("({sql})") } else { sql })
                    })
                    .collect::<OrmResult<Vec<_>>>()?;
                sql.push_str(" HAVING ");
                sql.push_str(&parts.join(" AND "));
            }
        }

        if !self.order_by.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&self.order_by.join(", "));
        }

        let limit = match shape {
            Shape::One | Shape::Scalar => Some(self.limit.map_or(1, |n| n.min(1))),
            _ => self.limit,
        };
        if let Some(n) = limit {
            sql.push_str(&format!(" LIMIT {n}"));
        }
        if let Some(n) = self.offset {
            sql.push_str(&format!(" OFFSET {n}"));
        }

        if !self.unions.is_empty() {
            if self.has_tail() || limit != self.limit {
                sql = format!("({sql})");
            }
            for part in &self.unions {
                sql.push_str(if part.all { " UNION ALL " } else { " UNION " });
                let member = part.stmt.render(reg)?;
                if part.parens {
                    sql.push_str(&format!("({member})"));
                } else {
                    sql.push_str(&member);
                }
            }
        }

        Ok(sql)
    }
}

impl<T> Render for SelectQb<T> {
    fn render(&self, reg: &mut ParamRegistry) -> OrmResult<String> {
        self.render_shape(reg, Shape::List)
    }
}

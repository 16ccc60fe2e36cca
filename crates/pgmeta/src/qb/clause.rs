//! Clause accumulators shared by the statement builders.
//!
//! WHERE predicates are AND-ed; the only nesting is an explicit OR group,
//! which is parenthesized and then AND-ed like any other predicate.

use crate::entity::FieldTag;
use crate::error::{OrmResult, UsageError};
use crate::fragment::{Fragment, Render};
use crate::param::ParamRegistry;
use crate::resolve::{FieldExpr, IntoColumn};
use crate::value::Value;
use std::fmt;
use std::sync::Arc;

/// One WHERE/HAVING predicate.
#[derive(Clone, Debug)]
pub(crate) enum Cond {
    Compare {
        column: String,
        op: &'static str,
        value: Value,
        type_tag: Option<&'static str>,
    },
    NullCheck {
        column: String,
        is_null: bool,
    },
    InList {
        column: String,
        values: Vec<Value>,
        negated: bool,
        type_tag: Option<&'static str>,
    },
    Between {
        column: String,
        from: Value,
        to: Value,
        type_tag: Option<&'static str>,
    },
    /// Caller text; grouped when AND-ed with other predicates.
    Fragment(Fragment),
    /// Self-contained boolean field expression.
    Expr(String),
    Or(Vec<Cond>),
    True,
    False,
}

impl Cond {
    fn render(&self, reg: &mut ParamRegistry) -> OrmResult<String> {
        Ok(match self {
            // `= NULL` never matches; render as IS [NOT] NULL.
            Cond::Compare {
                column,
                op,
                value: Value::Null,
                ..
            } if matches!(*op, "=" | "!=") => {
                let check = if *op == "=" { "IS NULL" } else { "IS NOT NULL" };
                format!("{column} {check}")
            }
            Cond::Compare {
                column,
                op,
                value,
                type_tag,
            } => {
                format!("{column} {op} {}", reg.add_with(value.clone(), None, *type_tag))
            }
            Cond::NullCheck { column, is_null } => {
                let check = if *is_null { "IS NULL" } else { "IS NOT NULL" };
                format!("{column} {check}")
            }
            Cond::InList { values, negated, .. } if values.is_empty() => {
                (if *negated { "1=1" } else { "1=0" }).to_string()
            }
            Cond::InList {
                column,
                values,
                negated,
                type_tag,
            } => {
                let list = values
                    .iter()
                    .map(|v| reg.add_with(v.clone(), None, *type_tag).to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                let op = if *negated { "NOT IN" } else { "IN" };
                format!("{column} {op} ({list})")
            }
            Cond::Between {
                column,
                from,
                to,
                type_tag,
            } => {
                let from = reg.add_with(from.clone(), None, *type_tag);
                let to = reg.add_with(to.clone(), None, *type_tag);
                format!("{column} BETWEEN {from} AND {to}")
            }
            Cond::Fragment(f) => f.render(reg)?,
            Cond::Expr(sql) => sql.clone(),
            Cond::Or(items) if items.is_empty() => "1=0".to_string(),
            Cond::Or(items) => {
                let parts = items
                    .iter()
                    .map(|c| c.render(reg))
                    .collect::<OrmResult<Vec<_>>>()?;
                format!("({})", parts.join(" OR "))
            }
            Cond::True => "1=1".to_string(),
            Cond::False => "1=0".to_string(),
        })
    }
}

/// AND-ed predicate list.
#[derive(Clone, Debug, Default)]
pub(crate) struct WhereClause {
    conds: Vec<Cond>,
}

impl WhereClause {
    pub(crate) fn push(&mut self, cond: Cond) {
        self.conds.push(cond);
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.conds.is_empty()
    }

    /// Caller fragments are parenthesized whenever they share the list, so
    /// an `OR` inside one never escapes the AND chain.
    pub(crate) fn render(&self, reg: &mut ParamRegistry) -> OrmResult<String> {
        let grouped = self.conds.len() > 1;
        let parts = self
            .conds
            .iter()
            .map(|c| match c {
                Cond::Fragment(f) if grouped => Ok(format!("({})", f.render(reg)?)),
                other => other.render(reg),
            })
            .collect::<OrmResult<Vec<_>>>()?;
        Ok(parts.join(" AND "))
    }
}

/// Filtering state of one statement: alias, predicates, named parameters and
/// the first deferred composition error.
#[doc(hidden)]
#[derive(Clone, Debug)]
pub struct Scope {
    pub(crate) alias: String,
    pub(crate) conds: WhereClause,
    pub(crate) named: Vec<(String, Value)>,
    pub(crate) error: Option<UsageError>,
}

impl Scope {
    pub(crate) fn new(alias: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            conds: WhereClause::default(),
            named: Vec::new(),
            error: None,
        }
    }

    pub(crate) fn defer(&mut self, error: UsageError) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    pub(crate) fn push(&mut self, cond: Cond) {
        self.conds.push(cond);
    }

    fn column(&self, column: &impl IntoColumn) -> String {
        column.qualified(&self.alias).into_owned()
    }

    /// Add a caller fragment, rejecting one with no text.
    pub(crate) fn push_fragment(&mut self, fragment: Fragment) {
        if fragment.is_blank() {
            self.defer(UsageError::EmptyPredicate);
        } else {
            self.push(Cond::Fragment(fragment));
        }
    }

    /// Surface the deferred error, then declare named parameters.
    pub(crate) fn prepare(&self, reg: &mut ParamRegistry) -> Result<(), UsageError> {
        if let Some(error) = &self.error {
            return Err(error.clone());
        }
        for (name, value) in &self.named {
            reg.declare(name.clone(), value.clone())?;
        }
        Ok(())
    }
}

/// WHERE composition shared by SELECT, UPDATE and DELETE builders.
///
/// Columns are given as field tags (qualified with the statement alias),
/// [`col`](crate::col) for other aliases, or raw library text.
pub trait Filter: Sized {
    #[doc(hidden)]
    fn scope_mut(&mut self) -> &mut Scope;

    /// `column = value`
    fn eq(self, column: impl IntoColumn, value: impl Into<Value>) -> Self {
        self.compare(column, "=", value.into())
    }

    /// `column != value`
    fn ne(self, column: impl IntoColumn, value: impl Into<Value>) -> Self {
        self.compare(column, "!=", value.into())
    }

    /// `column > value`
    fn gt(self, column: impl IntoColumn, value: impl Into<Value>) -> Self {
        self.compare(column, ">", value.into())
    }

    /// `column >= value`
    fn gte(self, column: impl IntoColumn, value: impl Into<Value>) -> Self {
        self.compare(column, ">=", value.into())
    }

    /// `column < value`
    fn lt(self, column: impl IntoColumn, value: impl Into<Value>) -> Self {
        self.compare(column, "<", value.into())
    }

    /// `column <= value`
    fn lte(self, column: impl IntoColumn, value: impl Into<Value>) -> Self {
        self.compare(column, "<=", value.into())
    }

    /// `column LIKE pattern`
    fn like(self, column: impl IntoColumn, pattern: impl Into<Value>) -> Self {
        self.compare(column, "LIKE", pattern.into())
    }

    /// `column ILIKE pattern`
    fn ilike(self, column: impl IntoColumn, pattern: impl Into<Value>) -> Self {
        self.compare(column, "ILIKE", pattern.into())
    }

    /// `column = value` when `value` is `Some`.
    fn eq_opt<V: Into<Value>>(self, column: impl IntoColumn, value: Option<V>) -> Self {
        match value {
            Some(v) => self.eq(column, v),
            None => self,
        }
    }

    #[doc(hidden)]
    fn compare(mut self, column: impl IntoColumn, op: &'static str, value: Value) -> Self {
        let scope = self.scope_mut();
        let type_tag = column.type_tag();
        let column = scope.column(&column);
        scope.push(Cond::Compare {
            column,
            op,
            value,
            type_tag,
        });
        self
    }

    /// `column IS NULL`
    fn is_null(mut self, column: impl IntoColumn) -> Self {
        let scope = self.scope_mut();
        let column = scope.column(&column);
        scope.push(Cond::NullCheck {
            column,
            is_null: true,
        });
        self
    }

    /// `column IS NOT NULL`
    fn is_not_null(mut self, column: impl IntoColumn) -> Self {
        let scope = self.scope_mut();
        let column = scope.column(&column);
        scope.push(Cond::NullCheck {
            column,
            is_null: false,
        });
        self
    }

    /// `column IN (...)`; an empty list matches nothing.
    fn in_list<V: Into<Value>>(
        mut self,
        column: impl IntoColumn,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        let scope = self.scope_mut();
        let type_tag = column.type_tag();
        let column = scope.column(&column);
        scope.push(Cond::InList {
            column,
            values: values.into_iter().map(Into::into).collect(),
            negated: false,
            type_tag,
        });
        self
    }

    /// `column NOT IN (...)`; an empty list matches everything.
    fn not_in<V: Into<Value>>(
        mut self,
        column: impl IntoColumn,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        let scope = self.scope_mut();
        let type_tag = column.type_tag();
        let column = scope.column(&column);
        scope.push(Cond::InList {
            column,
            values: values.into_iter().map(Into::into).collect(),
            negated: true,
            type_tag,
        });
        self
    }

    /// `column BETWEEN from AND to`
    fn between(
        mut self,
        column: impl IntoColumn,
        from: impl Into<Value>,
        to: impl Into<Value>,
    ) -> Self {
        let scope = self.scope_mut();
        let type_tag = column.type_tag();
        let column = scope.column(&column);
        scope.push(Cond::Between {
            column,
            from: from.into(),
            to: to.into(),
            type_tag,
        });
        self
    }

    /// Template predicate with `{0}` arguments and `{name}` references.
    ///
    /// Parenthesized when combined with other predicates.
    ///
    /// ```ignore
    /// qb.where_tpl("p.age >= {0}", args![18])
    /// ```
    fn where_tpl(mut self, template: &str, args: Vec<Value>) -> Self {
        let scope = self.scope_mut();
        match Fragment::template(template, args) {
            Ok(f) => scope.push_fragment(f),
            Err(e) => scope.defer(e),
        }
        self
    }

    /// Prebuilt fragment predicate.
    fn where_fragment(mut self, fragment: Fragment) -> Self {
        self.scope_mut().push_fragment(fragment);
        self
    }

    /// Raw predicate text, used verbatim. Never pass caller data here.
    fn where_raw(mut self, sql: &str) -> Self {
        self.scope_mut().push_fragment(Fragment::raw(sql));
        self
    }

    /// One template repeated per value, OR-ed together.
    ///
    /// `where_any("a.city = {0}", args!["Oslo", "Bergen"])` renders
    /// `(a.city = $1 OR a.city = $2)`. No values matches nothing.
    fn where_any(mut self, template: &str, values: Vec<Value>) -> Self {
        let scope = self.scope_mut();
        let mut items = Vec::with_capacity(values.len());
        for value in values {
            match Fragment::template(template, vec![value]) {
                Ok(f) if f.is_blank() => {
                    scope.defer(UsageError::EmptyPredicate);
                    return self;
                }
                Ok(f) => items.push(Cond::Fragment(f)),
                Err(e) => {
                    scope.defer(e);
                    return self;
                }
            }
        }
        scope.push(Cond::Or(items));
        self
    }

    /// Parenthesized OR group of arbitrary predicates.
    ///
    /// ```ignore
    /// qb.or_group(|g| g.eq(PersonField::Name, "a").is_null(PersonField::Age))
    /// ```
    fn or_group(mut self, build: impl FnOnce(Group) -> Group) -> Self {
        let alias = self.scope_mut().alias.clone();
        let group = build(Group {
            scope: Scope::new(alias),
        });
        let inner = group.scope;
        let scope = self.scope_mut();
        if let Some(e) = inner.error {
            scope.defer(e);
        }
        scope.named.extend(inner.named);
        scope.push(Cond::Or(inner.conds.conds));
        self
    }

    /// Boolean member expression over entity fields.
    fn where_expr<F: FieldTag>(mut self, expr: impl Into<FieldExpr<F>>) -> Self {
        let scope = self.scope_mut();
        match expr.into().render(&scope.alias) {
            Ok(sql) => scope.push(Cond::Expr(sql)),
            Err(e) => scope.defer(e),
        }
        self
    }

    /// Declare a named parameter referenced as `{name}` in templates.
    fn bind_named(mut self, name: &str, value: impl Into<Value>) -> Self {
        let scope = self.scope_mut();
        if scope.named.iter().any(|(n, _)| n == name) {
            scope.defer(UsageError::Conflict(name.to_string()));
        } else {
            scope.named.push((name.to_string(), value.into()));
        }
        self
    }
}

/// Predicates collected by [`Filter::or_group`].
pub struct Group {
    scope: Scope,
}

impl Filter for Group {
    fn scope_mut(&mut self) -> &mut Scope {
        &mut self.scope
    }
}

// ─── SET list ───────────────────────────────────────────────────────────────

/// Right-hand side of `column = expression`.
#[derive(Clone)]
pub(crate) enum SetExpr {
    Value(Value),
    Raw(String),
    Sub(Arc<dyn Render>),
    Append(Value),
    Remove(Value),
    Increment {
        by: Value,
        default: Option<Value>,
    },
    Point {
        x: f64,
        y: f64,
        srid: i32,
    },
}

impl fmt::Debug for SetExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SetExpr::Value(v) => f.debug_tuple("Value").field(v).finish(),
            SetExpr::Raw(s) => f.debug_tuple("Raw").field(s).finish(),
            SetExpr::Sub(_) => f.write_str("Sub(..)"),
            SetExpr::Append(v) => f.debug_tuple("Append").field(v).finish(),
            SetExpr::Remove(v) => f.debug_tuple("Remove").field(v).finish(),
            SetExpr::Increment { by, default } => f
                .debug_struct("Increment")
                .field("by", by)
                .field("default", default)
                .finish(),
            SetExpr::Point { x, y, srid } => f
                .debug_struct("Point")
                .field("x", x)
                .field("y", y)
                .field("srid", srid)
                .finish(),
        }
    }
}

/// Default SRID for point geometry (WGS 84).
pub const DEFAULT_SRID: i32 = 4326;

impl SetExpr {
    /// Expression text for `column`; self-referential forms use the column.
    ///
    /// `type_tag` is the column's engine type, recorded on the values bound
    /// for it and used as the cast of appended arrays.
    pub(crate) fn render(
        &self,
        column: &str,
        type_tag: Option<&'static str>,
        reg: &mut ParamRegistry,
    ) -> OrmResult<String> {
        Ok(match self {
            SetExpr::Value(Value::Null) => "NULL".to_string(),
            SetExpr::Value(v) => reg.add_with(v.clone(), None, type_tag).to_string(),
            SetExpr::Raw(sql) => format!("({sql})"),
            SetExpr::Sub(sub) => format!("({})", sub.render(reg)?),
            SetExpr::Append(value) => {
                let p = reg.add_with(value.clone(), None, type_tag);
                match type_tag {
                    Some(cast) => format!("{column} || {p}::{cast}"),
                    None => format!("{column} || {p}"),
                }
            }
            SetExpr::Remove(v) => {
                let element = type_tag.and_then(|t| t.strip_suffix("[]"));
                format!("array_remove({column}, {})", reg.add_with(v.clone(), None, element))
            }
            SetExpr::Increment { by, default: None } => {
                format!("{column} + {}", reg.add_with(by.clone(), None, type_tag))
            }
            SetExpr::Increment {
                by,
                default: Some(default),
            } => {
                let d = reg.add_with(default.clone(), None, type_tag);
                format!(
                    "COALESCE({column}, {d}) + {}",
                    reg.add_with(by.clone(), None, type_tag)
                )
            }
            SetExpr::Point { x, y, srid } => {
                let point = reg.add(point_wkt(*x, *y));
                let srid = reg.add(*srid);
                format!("ST_GeomFromText({point}, {srid})")
            }
        })
    }
}

/// `POINT(x y)` well-known text.
pub(crate) fn point_wkt(x: f64, y: f64) -> String {
    format!("POINT({x} {y})")
}

#[derive(Clone, Debug)]
pub(crate) struct SetItem {
    pub(crate) column: String,
    pub(crate) type_tag: Option<&'static str>,
    pub(crate) expr: SetExpr,
}

impl SetItem {
    pub(crate) fn render_expr(&self, reg: &mut ParamRegistry) -> OrmResult<String> {
        self.expr.render(&self.column, self.type_tag, reg)
    }
}

/// Ordered `column = expression` list. Repeated columns are kept as given.
#[derive(Clone, Debug, Default)]
pub(crate) struct SetList {
    items: Vec<SetItem>,
}

impl SetList {
    pub(crate) fn push(&mut self, column: &impl IntoColumn, expr: SetExpr) {
        self.items.push(SetItem {
            column: column.bare().into_owned(),
            type_tag: column.type_tag(),
            expr,
        });
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub(crate) fn columns(&self) -> impl Iterator<Item = &str> {
        self.items.iter().map(|item| item.column.as_str())
    }

    pub(crate) fn items(&self) -> &[SetItem] {
        &self.items
    }

    /// `col1 = expr1, col2 = expr2`
    pub(crate) fn render(&self, reg: &mut ParamRegistry) -> OrmResult<String> {
        let parts = self
            .items
            .iter()
            .map(|item| Ok(format!("{} = {}", item.column, item.render_expr(reg)?)))
            .collect::<OrmResult<Vec<_>>>()?;
        Ok(parts.join(", "))
    }
}

/// Arrays are concatenated as-is; a scalar becomes a one-element array.
pub(crate) fn append_value(value: Value) -> Value {
    match value {
        Value::Array(_) => value,
        scalar => Value::Array(vec![scalar]),
    }
}

// ─── JOIN ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
}

impl JoinKind {
    fn keyword(self) -> &'static str {
        match self {
            JoinKind::Inner => "INNER JOIN",
            JoinKind::Left => "LEFT JOIN",
            JoinKind::Right => "RIGHT JOIN",
        }
    }
}

#[derive(Clone)]
pub(crate) enum JoinSource {
    Table(String),
    Sub(Arc<dyn Render>),
}

#[derive(Clone)]
pub(crate) struct Join {
    pub(crate) kind: JoinKind,
    pub(crate) source: JoinSource,
    pub(crate) alias: String,
    pub(crate) on: Fragment,
    /// Projection appended to the outer field list.
    pub(crate) returning: Option<String>,
}

impl fmt::Debug for Join {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let source = match &self.source {
            JoinSource::Table(t) => t.as_str(),
            JoinSource::Sub(_) => "(..)",
        };
        f.debug_struct("Join")
            .field("kind", &self.kind)
            .field("source", &source)
            .field("alias", &self.alias)
            .field("returning", &self.returning)
            .finish()
    }
}

impl Join {
    pub(crate) fn render(&self, reg: &mut ParamRegistry) -> OrmResult<String> {
        let source = match &self.source {
            JoinSource::Table(t) => t.clone(),
            JoinSource::Sub(sub) => format!("({})", sub.render(reg)?),
        };
        Ok(format!(
            "{} {} {} ON {}",
            self.kind.keyword(),
            source,
            self.alias,
            self.on.render(reg)?
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render_where(scope: &Scope) -> (String, usize) {
        let mut reg = ParamRegistry::new();
        scope.prepare(&mut reg).unwrap();
        let sql = scope.conds.render(&mut reg).unwrap();
        (sql, reg.finish().unwrap().len())
    }

    #[test]
    fn predicates_are_and_ed() {
        let g = Group {
            scope: Scope::new("a"),
        }
        .eq("a.x", 1)
        .is_null("a.y")
        .in_list("a.z", [1, 2]);
        assert_eq!(
            render_where(&g.scope),
            ("a.x = $1 AND a.y IS NULL AND a.z IN ($2, $3)".to_string(), 3)
        );
    }

    #[test]
    fn or_group_is_parenthesized() {
        let g = Group {
            scope: Scope::new("a"),
        }
        .eq("a.x", 1)
        .or_group(|g| g.eq("a.y", 2).eq("a.y", 3));
        assert_eq!(render_where(&g.scope).0, "a.x = $1 AND (a.y = $2 OR a.y = $3)");
    }

    #[test]
    fn empty_lists_short_circuit() {
        let g = Group {
            scope: Scope::new("a"),
        }
        .in_list("a.x", Vec::<i32>::new())
        .not_in("a.y", Vec::<i32>::new())
        .where_any("a.z = {0}", vec![]);
        assert_eq!(render_where(&g.scope), ("1=0 AND 1=1 AND 1=0".to_string(), 0));
    }

    #[test]
    fn null_equality_becomes_is_null() {
        let g = Group {
            scope: Scope::new("a"),
        }
        .eq("a.x", None::<i32>)
        .ne("a.y", Value::Null);
        assert_eq!(render_where(&g.scope).0, "a.x IS NULL AND a.y IS NOT NULL");
    }

    #[test]
    fn duplicate_named_parameter_is_deferred() {
        let g = Group {
            scope: Scope::new("a"),
        }
        .bind_named("n", 1)
        .bind_named("n", 2);
        let mut reg = ParamRegistry::new();
        assert_eq!(
            g.scope.prepare(&mut reg),
            Err(UsageError::Conflict("n".into()))
        );
    }

    #[test]
    fn set_expressions() {
        let mut set = SetList::default();
        set.push(&"name", SetExpr::Value("x".into()));
        set.push(&"nick", SetExpr::Value(Value::Null));
        set.push(&"tags", SetExpr::Append(append_value("t".into())));
        set.push(&"tags", SetExpr::Remove("old".into()));
        set.push(&"visits", SetExpr::Increment {
            by: 1.into(),
            default: Some(0.into()),
        });
        set.push(&"loc", SetExpr::Point {
            x: 10.5,
            y: 59.9,
            srid: DEFAULT_SRID,
        });
        set.push(&"touched", SetExpr::Raw("now()".into()));

        let mut reg = ParamRegistry::new();
        let sql = set.render(&mut reg).unwrap();
        assert_eq!(
            sql,
            "name = $1, nick = NULL, tags = tags || $2, tags = array_remove(tags, $3), \
             visits = COALESCE(visits, $4) + $5, loc = ST_GeomFromText($6, $7), touched = (now())"
        );
        let params = reg.finish().unwrap();
        assert_eq!(params[1].value, Value::Array(vec![Value::Text("t".into())]));
        assert_eq!(params[5].value, Value::Text("POINT(10.5 59.9)".into()));
        assert_eq!(params[6].value, Value::I32(4326));
        assert!(params.iter().all(|p| p.type_tag.is_none()));
    }

    #[test]
    fn grouped_fragments_keep_their_or_inside() {
        let g = Group {
            scope: Scope::new("a"),
        }
        .eq("a.id", 1)
        .where_raw("a.x = 1 OR a.y = 2");
        assert_eq!(render_where(&g.scope).0, "a.id = $1 AND (a.x = 1 OR a.y = 2)");

        let g = Group {
            scope: Scope::new("a"),
        }
        .where_raw("a.x = 1 OR a.y = 2");
        assert_eq!(render_where(&g.scope).0, "a.x = 1 OR a.y = 2");
    }
}

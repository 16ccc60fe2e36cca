//! Field resolver: typed field tags to column text.
//!
//! Qualified names are memoized per (field type, field, alias), so repeated
//! builder calls do not re-format the same column.

use crate::entity::{FieldDescriptor, FieldTag};
use crate::error::UsageError;
use std::any::TypeId;
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::{OnceLock, PoisonError, RwLock};

type QualifiedCache = RwLock<HashMap<(TypeId, usize, String), &'static str>>;

static QUALIFIED: OnceLock<QualifiedCache> = OnceLock::new();

/// Unqualified column name of a field.
pub fn column<F: FieldTag>(field: F) -> &'static str {
    field.descriptor().column
}

/// `alias.column` for a field, memoized.
pub fn qualified<F: FieldTag>(alias: &str, field: F) -> &'static str {
    let cache = QUALIFIED.get_or_init(|| RwLock::new(HashMap::new()));
    let key = (TypeId::of::<F>(), field.ordinal(), alias.to_string());

    if let Some(found) = cache
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(&key)
    {
        return found;
    }

    let text: &'static str = Box::leak(format!("{alias}.{}", column(field)).into_boxed_str());
    let mut map = cache.write().unwrap_or_else(PoisonError::into_inner);
    map.entry(key).or_insert(text)
}

/// Comma-separated qualified columns for a compound projection.
pub fn columns<F: FieldTag>(alias: &str, fields: &[F]) -> String {
    fields
        .iter()
        .map(|f| qualified(alias, *f))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Something that names a column: a field tag, an aliased field tag, or raw
/// library text.
pub trait IntoColumn {
    /// Column text qualified with `alias` (raw text is returned unchanged).
    fn qualified(&self, alias: &str) -> Cow<'static, str>;

    /// Column text without any alias (SET lists, INSERT column lists).
    fn bare(&self) -> Cow<'static, str>;

    /// Engine type of the column, when known.
    fn type_tag(&self) -> Option<&'static str> {
        None
    }
}

impl IntoColumn for &str {
    fn qualified(&self, _alias: &str) -> Cow<'static, str> {
        Cow::Owned(self.to_string())
    }

    fn bare(&self) -> Cow<'static, str> {
        Cow::Owned(self.to_string())
    }
}

impl IntoColumn for String {
    fn qualified(&self, _alias: &str) -> Cow<'static, str> {
        Cow::Owned(self.clone())
    }

    fn bare(&self) -> Cow<'static, str> {
        Cow::Owned(self.clone())
    }
}

impl IntoColumn for &FieldDescriptor {
    fn qualified(&self, alias: &str) -> Cow<'static, str> {
        Cow::Owned(format!("{alias}.{}", self.column))
    }

    fn bare(&self) -> Cow<'static, str> {
        Cow::Borrowed(self.column)
    }

    fn type_tag(&self) -> Option<&'static str> {
        Some(self.type_tag)
    }
}

/// A field tag bound to an explicit alias, for columns of joined tables.
#[derive(Debug, Clone, Copy)]
pub struct Aliased<F> {
    alias: &'static str,
    field: F,
}

/// Refer to `field` through `alias` regardless of the statement's own alias.
pub fn col<F: FieldTag>(alias: &'static str, field: F) -> Aliased<F> {
    Aliased { alias, field }
}

impl<F: FieldTag> IntoColumn for Aliased<F> {
    fn qualified(&self, _alias: &str) -> Cow<'static, str> {
        Cow::Borrowed(qualified(self.alias, self.field))
    }

    fn bare(&self) -> Cow<'static, str> {
        Cow::Borrowed(column(self.field))
    }

    fn type_tag(&self) -> Option<&'static str> {
        Some(self.field.descriptor().type_tag)
    }
}

/// Boolean expression over fields: a member, its negation, or AND/OR groups.
///
/// Only boolean members can stand alone as predicates; anything else is
/// rejected when the expression is rendered.
#[derive(Debug, Clone)]
pub enum FieldExpr<F> {
    Member(F),
    Not(Box<FieldExpr<F>>),
    And(Vec<FieldExpr<F>>),
    Or(Vec<FieldExpr<F>>),
}

impl<F: FieldTag> FieldExpr<F> {
    pub fn member(field: F) -> Self {
        FieldExpr::Member(field)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        FieldExpr::Not(Box::new(self))
    }

    pub fn and(self, other: FieldExpr<F>) -> Self {
        match self {
            FieldExpr::And(mut items) => {
                items.push(other);
                FieldExpr::And(items)
            }
            first => FieldExpr::And(vec![first, other]),
        }
    }

    pub fn or(self, other: FieldExpr<F>) -> Self {
        match self {
            FieldExpr::Or(mut items) => {
                items.push(other);
                FieldExpr::Or(items)
            }
            first => FieldExpr::Or(vec![first, other]),
        }
    }

    /// Render against `alias`.
    pub fn render(&self, alias: &str) -> Result<String, UsageError> {
        match self {
            FieldExpr::Member(field) => {
                let d = field.descriptor();
                if !d.is_bool() {
                    return Err(UsageError::UnsupportedExpression(format!(
                        "`{}` is {}, not a boolean member",
                        d.name, d.type_tag
                    )));
                }
                Ok(qualified(alias, *field).to_string())
            }
            FieldExpr::Not(inner) => Ok(format!("NOT ({})", inner.render(alias)?)),
            FieldExpr::And(items) => Self::join(items, " AND ", alias),
            FieldExpr::Or(items) => Self::join(items, " OR ", alias),
        }
    }

    fn join(items: &[FieldExpr<F>], sep: &str, alias: &str) -> Result<String, UsageError> {
        if items.is_empty() {
            return Err(UsageError::UnsupportedExpression(
                "empty boolean group".to_string(),
            ));
        }
        let parts = items
            .iter()
            .map(|e| e.render(alias))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(format!("({})", parts.join(sep)))
    }
}

impl<F: FieldTag> From<F> for FieldExpr<F> {
    fn from(field: F) -> Self {
        FieldExpr::Member(field)
    }
}

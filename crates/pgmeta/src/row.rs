//! Row materialization.

use crate::client::GenericClient;
use crate::entity::Entity;
use crate::error::{OrmError, OrmResult};
use crate::qb::select;
use crate::value::{FromValue, Value};
use std::fmt;
use tokio::sync::OnceCell;

/// A decoded result row: ordered `(column, value)` pairs.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    columns: Vec<(String, Value)>,
}

impl Row {
    pub fn new(columns: Vec<(String, Value)>) -> Self {
        Self { columns }
    }

    /// Decode every column of a driver row.
    ///
    /// Columns that cannot be decoded are kept as [`Value::Unsupported`];
    /// only a target that reads one of them fails.
    pub fn from_pg(row: &tokio_postgres::Row) -> Self {
        let columns = row
            .columns()
            .iter()
            .enumerate()
            .map(|(i, col)| {
                let value = row
                    .try_get::<_, Value>(i)
                    .unwrap_or_else(|_| Value::Unsupported(col.type_().name().to_string()));
                (col.name().to_string(), value)
            })
            .collect();
        Self { columns }
    }

    /// Value of a column, matched case-insensitively.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(column))
            .map(|(_, v)| v)
    }

    pub fn get_index(&self, index: usize) -> Option<&Value> {
        self.columns.get(index).map(|(_, v)| v)
    }

    /// Typed column read.
    ///
    /// A column missing from the row is only accepted for nullable targets.
    pub fn try_get<T: FromValue>(&self, column: &str) -> OrmResult<T> {
        match self.get(column) {
            Some(v) => T::from_value(v.clone()).map_err(|e| OrmError::decode(column, e)),
            None => T::absent().ok_or_else(|| OrmError::decode(column, "column not present in row")),
        }
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(name, _)| name.as_str())
    }

    pub(crate) fn into_first(self) -> Option<Value> {
        self.columns.into_iter().next().map(|(_, v)| v)
    }
}

/// Trait for types that can be built from a row.
///
/// Columns are matched by name; columns the target does not know are ignored.
pub trait FromRow: Sized {
    fn from_row(row: &Row) -> OrmResult<Self>;
}

impl FromRow for Row {
    fn from_row(row: &Row) -> OrmResult<Self> {
        Ok(row.clone())
    }
}

/// Lazily loaded related entity, cached on the owning instance.
///
/// The first successful [`Related::load`] issues one lookup by primary key;
/// later calls return the cached result, including a cached "not found".
pub struct Related<T> {
    cell: OnceCell<Option<T>>,
}

impl<T> Related<T> {
    pub fn new() -> Self {
        Self {
            cell: OnceCell::new(),
        }
    }

    /// Already-resolved value, without touching the database.
    pub fn get(&self) -> Option<Option<&T>> {
        self.cell.get().map(Option::as_ref)
    }

    pub fn is_loaded(&self) -> bool {
        self.cell.initialized()
    }
}

impl<T: Entity> Related<T> {
    /// Resolve the related row for `key`, fetching it at most once.
    ///
    /// A null key resolves to `None` without a lookup.
    pub async fn load<C: GenericClient>(&self, conn: &C, key: Value) -> OrmResult<Option<&T>> {
        if key.is_null() && !self.is_loaded() {
            return Ok(None);
        }
        let slot = self
            .cell
            .get_or_try_init(|| async move { select::<T>().where_pk(key).fetch_one(conn).await })
            .await?;
        Ok(slot.as_ref())
    }
}

impl<T> Default for Related<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> Clone for Related<T> {
    fn clone(&self) -> Self {
        Self {
            cell: self.cell.clone(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Related<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.cell.get() {
            Some(v) => f.debug_tuple("Related").field(v).finish(),
            None => f.write_str("Related(<unloaded>)"),
        }
    }
}

/// Loading state is not part of an entity's identity.
impl<T> PartialEq for Related<T> {
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}

//! Statement builders.
//!
//! Every builder accumulates clauses freely and is assembled once per
//! execution. Assembly renders the text left to right and mints `$n`
//! placeholders in that order, so numbering always matches the text no
//! matter how the builder was composed.
//!
//! # Usage
//!
//! ```ignore
//! use pgmeta::qb;
//! use pgmeta::{Filter, args};
//!
//! // Entity query
//! let adults = qb::select::<Person>()
//!     .gte(PersonField::Age, 18)
//!     .order_by(PersonField::Name)
//!     .fetch_all(&client)
//!     .await?;
//!
//! // Untyped query over any table
//! let rows = qb::select_from("people", "p")
//!     .where_tpl("p.age >= {0}", args![18])
//!     .limit(1)
//!     .fetch_all(&client)
//!     .await?;
//!
//! // UPDATE
//! qb::update::<Person>()
//!     .set(PersonField::Name, "alice")
//!     .where_pk(id)
//!     .execute(&client)
//!     .await?;
//!
//! // DELETE
//! qb::delete::<Person>().where_pk(id).execute(&client).await?;
//! ```

mod clause;
mod delete;
mod insert;
mod select;
mod traits;
mod update;

pub use clause::{DEFAULT_SRID, Filter, Group, JoinKind};
#[doc(hidden)]
pub use clause::Scope;
pub use delete::DeleteQb;
pub use insert::InsertQb;
pub use select::SelectQb;
pub use traits::SqlQb;
pub use update::UpdateQb;

use crate::entity::Entity;
use crate::row::Row;

/// Alias used by entity statements.
pub const DEFAULT_ALIAS: &str = "a";

/// SELECT every field of `T` from its table, aliased `a`.
pub fn select<T: Entity>() -> SelectQb<T> {
    SelectQb::entity(DEFAULT_ALIAS)
}

/// SELECT `*` from any table under `alias`.
///
/// # Example
/// ```ignore
/// let qb = pgmeta::qb::select_from("users", "u").eq("u.id", 1);
/// ```
pub fn select_from(table: &str, alias: &str) -> SelectQb<Row> {
    SelectQb::from_table(table, alias)
}

/// SELECT `*` from a nested statement.
pub fn select_sub<U: 'static>(sub: SelectQb<U>, alias: &str) -> SelectQb<Row> {
    SelectQb::from_sub(sub, alias)
}

/// UPDATE `T`'s table; returning shapes read `T`.
pub fn update<T: Entity>() -> UpdateQb<T> {
    let d = T::descriptor();
    UpdateQb::with_table(d.table, DEFAULT_ALIAS, Some(d.select_list(DEFAULT_ALIAS)))
}

/// UPDATE any table under `alias`.
pub fn update_table(table: &str, alias: &str) -> UpdateQb<Row> {
    UpdateQb::with_table(table, alias, None)
}

/// UPDATE every non-key field of `entity`, matched by primary key.
pub fn update_entity<T: Entity>(entity: &T) -> UpdateQb<T> {
    let d = T::descriptor();
    let mut qb = update::<T>();
    let mut key = None;
    for (field, value) in d.fields.iter().zip(entity.field_values()) {
        if field.primary_key {
            key = Some(value);
        } else {
            qb = qb.set(field, value);
        }
    }
    match key {
        Some(key) => qb.where_pk(key),
        None => qb,
    }
}

/// DELETE from `T`'s table.
pub fn delete<T: Entity>() -> DeleteQb<T> {
    let d = T::descriptor();
    DeleteQb::with_table(d.table, DEFAULT_ALIAS, Some(d.select_list(DEFAULT_ALIAS)))
}

/// DELETE from any table under `alias`.
pub fn delete_from(table: &str, alias: &str) -> DeleteQb<Row> {
    DeleteQb::with_table(table, alias, None)
}

/// DELETE `entity`, matched by primary key.
pub fn delete_entity<T: Entity>(entity: &T) -> DeleteQb<T> {
    match entity.primary_key_value() {
        Some(key) => delete::<T>().where_pk(key),
        None => delete::<T>(),
    }
}

/// INSERT into `T`'s table, returning its fields.
pub fn insert<T: Entity>() -> InsertQb<T> {
    let d = T::descriptor();
    InsertQb::with_table(d.table, d.column_list())
}

/// INSERT into any table, returning `*`.
pub fn insert_into(table: &str) -> InsertQb<Row> {
    InsertQb::with_table(table, "*".to_string())
}

/// INSERT every field of `entity`.
pub fn insert_entity<T: Entity>(entity: &T) -> InsertQb<T> {
    let d = T::descriptor();
    d.fields
        .iter()
        .zip(entity.field_values())
        .fold(insert::<T>(), |qb, (field, value)| qb.set(field, value))
}

#[cfg(test)]
mod tests;

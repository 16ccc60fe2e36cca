//! # pgmeta
//!
//! Typed, parameter-safe SQL statement construction and execution for
//! PostgreSQL.
//!
//! ## Features
//!
//! - **Entities as static metadata**: `entity!` declares a struct, its
//!   field-tag enum and a per-type descriptor; no runtime reflection
//! - **Values never become text**: caller data travels as [`Value`]s bound to
//!   `$n` placeholders minted in text order at assembly
//! - **Safe defaults**: UPDATE/DELETE require WHERE, UPDATE requires SET,
//!   checked before any round trip
//! - **One dispatch path**: scalar, one-row, list and affected-count shapes
//! - **Pipelines**: several statements in one all-or-nothing transaction,
//!   with timeout and cancellation
//! - **Lazy relations**: foreign-key accessors fetch once and cache on the
//!   instance
//!
//! ## Example
//!
//! ```ignore
//! use pgmeta::prelude::*;
//!
//! pgmeta::entity! {
//!     #[table = "people"]
//!     pub struct Person / PersonField {
//!         #[pk] pub id: i64 => Id("int8"),
//!         pub name: String => Name("text"),
//!         #[nullable] pub age: Option<i32> => Age("int4"),
//!     }
//! }
//!
//! let adults = qb::select::<Person>()
//!     .gte(PersonField::Age, 18)
//!     .order_by(PersonField::Name)
//!     .page(1, 20)
//!     .fetch_all(&client)
//!     .await?;
//!
//! qb::update::<Person>()
//!     .set(PersonField::Name, "alice")
//!     .where_pk(adults[0].id)
//!     .execute(&client)
//!     .await?;
//! ```

pub mod client;
pub mod entity;
pub mod error;
pub mod exec;
pub mod fragment;
pub mod monitor;
pub mod param;
pub mod pipeline;
pub mod qb;
pub mod resolve;
pub mod row;
pub mod value;

pub use client::{GenericClient, TransactionContext, TransactionalClient};
pub use entity::{Entity, EntityDescriptor, FieldDescriptor, FieldTag, descriptor_of};
pub use error::{OrmError, OrmResult, UsageError};
pub use exec::{Assembled, Outcome, Shape, dispatch};
pub use fragment::{Fragment, Render};
pub use monitor::{InstrumentedClient, MonitorConfig};
pub use param::{Param, ParamRegistry, Placeholder};
pub use pipeline::{Pipeline, PipelineConfig, PipelineEntry, PipelineResults};
pub use qb::{
    DEFAULT_SRID, DeleteQb, Filter, InsertQb, JoinKind, SelectQb, SqlQb, UpdateQb,
};
pub use resolve::{FieldExpr, IntoColumn, col};
pub use row::{FromRow, Related, Row};
pub use value::{FromValue, Json, Value};

#[cfg(feature = "pool")]
pub mod pool;

#[cfg(feature = "pool")]
pub use pool::{create_pool, create_pool_with_config};

/// Everything needed to declare entities and build statements.
pub mod prelude {
    pub use crate::qb;
    pub use crate::{
        Entity, FieldExpr, FieldTag, Filter, FromRow, GenericClient, JoinKind, OrmError,
        OrmResult, Pipeline, Row, Shape, SqlQb, Value, args, col,
    };
}

//! Entity descriptors and the per-type descriptor registry.
//!
//! Entities are declared with the [`entity!`](crate::entity) macro, which
//! produces the struct, a field-tag enum and the static metadata the query
//! builders need. Descriptors are built once per type and then shared for the
//! lifetime of the process.

use crate::row::FromRow;
use crate::value::Value;
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{OnceLock, PoisonError, RwLock};

/// Static metadata for one entity field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: &'static str,
    pub column: &'static str,
    /// Engine type name (`int4`, `text[]`, `geometry`, ...).
    pub type_tag: &'static str,
    pub primary_key: bool,
    pub nullable: bool,
    pub array: bool,
}

impl FieldDescriptor {
    pub const fn new(name: &'static str, type_tag: &'static str) -> Self {
        Self {
            name,
            column: name,
            type_tag,
            primary_key: false,
            nullable: false,
            array: false,
        }
    }

    pub const fn flags(mut self, primary_key: bool, nullable: bool, array: bool) -> Self {
        self.primary_key = primary_key;
        self.nullable = nullable;
        self.array = array;
        self
    }

    /// Override the column name when it differs from the field name.
    pub const fn column(mut self, column: &'static str) -> Self {
        self.column = column;
        self
    }

    pub fn is_bool(&self) -> bool {
        matches!(self.type_tag, "bool" | "boolean")
    }
}

/// Static metadata for one entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityDescriptor {
    pub table: &'static str,
    pub fields: Vec<FieldDescriptor>,
}

impl EntityDescriptor {
    pub fn new(table: &'static str, fields: Vec<FieldDescriptor>) -> Self {
        Self { table, fields }
    }

    /// Find a field by column name (case-insensitive).
    pub fn find(&self, column: &str) -> Option<&FieldDescriptor> {
        self.fields
            .iter()
            .find(|f| f.column.eq_ignore_ascii_case(column))
    }

    pub fn primary_key(&self) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.primary_key)
    }

    /// `col1, col2, ...`
    pub fn column_list(&self) -> String {
        self.fields
            .iter()
            .map(|f| f.column)
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// `alias.col1, alias.col2, ...`
    pub fn select_list(&self, alias: &str) -> String {
        self.fields
            .iter()
            .map(|f| format!("{alias}.{}", f.column))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// A type that maps to one table.
pub trait Entity: FromRow + Send + Sync + 'static {
    /// Field-tag enum generated alongside the entity.
    type Field: FieldTag;

    /// Build the descriptor. Called at most once per type by the registry.
    fn describe() -> EntityDescriptor;

    /// Values of every field, in descriptor order.
    fn field_values(&self) -> Vec<Value>;

    /// Cached descriptor for this type.
    fn descriptor() -> &'static EntityDescriptor {
        descriptor_of::<Self>()
    }

    /// Value of the primary key field, if one is declared.
    fn primary_key_value(&self) -> Option<Value> {
        let index = Self::descriptor().fields.iter().position(|f| f.primary_key)?;
        self.field_values().into_iter().nth(index)
    }
}

/// Statically typed field selector for an entity.
pub trait FieldTag: Copy + Send + Sync + 'static {
    type Entity: Entity;

    /// Index of the field in the entity descriptor.
    fn ordinal(self) -> usize;

    fn descriptor(self) -> &'static FieldDescriptor {
        &<Self::Entity as Entity>::descriptor().fields[self.ordinal()]
    }
}

type Registry = RwLock<HashMap<TypeId, &'static EntityDescriptor>>;

static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Registry lookup keyed by type identity.
///
/// The descriptor is built outside the lock; when two callers race on a type
/// that has not been seen yet, the first insert wins and both get the same
/// reference.
pub fn descriptor_of<E: Entity>() -> &'static EntityDescriptor {
    let registry = REGISTRY.get_or_init(|| RwLock::new(HashMap::new()));
    let key = TypeId::of::<E>();

    if let Some(found) = registry
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(&key)
    {
        return found;
    }

    let built: &'static EntityDescriptor = Box::leak(Box::new(E::describe()));
    let mut map = registry.write().unwrap_or_else(PoisonError::into_inner);
    map.entry(key).or_insert(built)
}

#[doc(hidden)]
#[macro_export]
macro_rules! __entity_flag {
    ($want:ident;) => {
        false
    };
    (pk; pk $($rest:ident)*) => {
        true
    };
    (nullable; nullable $($rest:ident)*) => {
        true
    };
    (array; array $($rest:ident)*) => {
        true
    };
    ($want:ident; $other:ident $($rest:ident)*) => {
        $crate::__entity_flag!($want; $($rest)*)
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __entity_column {
    ($field:ident) => {
        stringify!($field)
    };
    ($field:ident, $column:literal) => {
        $column
    };
}

/// Declare an entity: the struct, its field-tag enum and its descriptor.
///
/// Each field names its tag variant and engine type, plus the column name
/// when it differs from the field name. `#[pk]`, `#[nullable]` and
/// `#[array]` mark key, nullable and array columns. An optional
/// `relations` block adds lazily loaded related entities keyed by a local
/// foreign-key field.
///
/// ```ignore
/// pgmeta::entity! {
///     #[table = "classmates"]
///     pub struct Classmate / ClassmateField {
///         #[pk] pub id: Uuid => Id("uuid"),
///         pub name: String => Name("text"),
///         #[nullable] pub grade_id: Option<Uuid> => GradeId("uuid"),
///         #[array] pub tags: Vec<String> => Tags("text[]"),
///         pub joined_at: DateTime<Utc> => JoinedAt("timestamptz", "created_at"),
///     }
///     relations {
///         grade: Grade = grade_id,
///     }
/// }
/// ```
#[macro_export]
macro_rules! entity {
    (
        #[table = $table:literal]
        $(#[$meta:meta])*
        $vis:vis struct $name:ident / $field_enum:ident {
            $(
                $(#[$flag:ident])*
                $fvis:vis $field:ident : $ty:ty => $variant:ident ($tag:literal $(, $column:literal)?)
            ),+ $(,)?
        }
        $(
            relations {
                $($rel:ident : $rel_ty:ty = $fk:ident),+ $(,)?
            }
        )?
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq)]
        $vis struct $name {
            $($fvis $field: $ty,)+
            $($(pub $rel: $crate::Related<$rel_ty>,)+)?
        }

        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        $vis enum $field_enum {
            $($variant,)+
        }

        impl $crate::FieldTag for $field_enum {
            type Entity = $name;

            fn ordinal(self) -> usize {
                self as usize
            }
        }

        impl $crate::IntoColumn for $field_enum {
            fn qualified(&self, alias: &str) -> ::std::borrow::Cow<'static, str> {
                ::std::borrow::Cow::Borrowed($crate::resolve::qualified(alias, *self))
            }

            fn bare(&self) -> ::std::borrow::Cow<'static, str> {
                ::std::borrow::Cow::Borrowed($crate::resolve::column(*self))
            }

            fn type_tag(&self) -> ::std::option::Option<&'static str> {
                ::std::option::Option::Some($crate::FieldTag::descriptor(*self).type_tag)
            }
        }

        impl $crate::FromRow for $name {
            fn from_row(row: &$crate::Row) -> $crate::OrmResult<Self> {
                ::std::result::Result::Ok(Self {
                    $($field: row.try_get($crate::__entity_column!($field $(, $column)?))?,)+
                    $($($rel: $crate::Related::new(),)+)?
                })
            }
        }

        impl $crate::Entity for $name {
            type Field = $field_enum;

            fn describe() -> $crate::EntityDescriptor {
                $crate::EntityDescriptor::new(
                    $table,
                    ::std::vec![
                        $(
                            $crate::FieldDescriptor::new(stringify!($field), $tag)
                                $(.column($column))?
                                .flags(
                                $crate::__entity_flag!(pk; $($flag)*),
                                $crate::__entity_flag!(nullable; $($flag)*),
                                $crate::__entity_flag!(array; $($flag)*),
                            ),
                        )+
                    ],
                )
            }

            fn field_values(&self) -> ::std::vec::Vec<$crate::Value> {
                ::std::vec![$($crate::Value::from(::std::clone::Clone::clone(&self.$field)),)+]
            }
        }

        $(
            impl $name {
                $(
                    /// Related entity, fetched on first access and cached on this instance.
                    pub async fn $rel(
                        &self,
                        conn: &impl $crate::GenericClient,
                    ) -> $crate::OrmResult<::std::option::Option<&$rel_ty>> {
                        let key = $crate::Value::from(::std::clone::Clone::clone(&self.$fk));
                        self.$rel.load(conn, key).await
                    }
                )+
            }
        )?
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    crate::entity! {
        #[table = "people"]
        pub struct Person / PersonField {
            #[pk] pub id: i64 => Id("int8"),
            pub name: String => Name("text"),
            #[nullable] pub age: Option<i32> => Age("int4"),
            #[array] pub tags: Vec<String> => Tags("text[]"),
            pub active: bool => Active("bool"),
        }
    }

    #[test]
    fn descriptor_reflects_declaration() {
        let d = Person::descriptor();
        assert_eq!(d.table, "people");
        assert_eq!(d.column_list(), "id, name, age, tags, active");
        assert_eq!(d.primary_key().map(|f| f.column), Some("id"));
        assert!(d.fields[2].nullable);
        assert!(d.fields[3].array);
        assert!(!d.fields[1].nullable);
        assert_eq!(d.find("NAME").map(|f| f.type_tag), Some("text"));
    }

    #[test]
    fn descriptor_is_cached() {
        let a: *const EntityDescriptor = Person::descriptor();
        let b: *const EntityDescriptor = descriptor_of::<Person>();
        assert_eq!(a, b);
    }

    #[test]
    fn concurrent_first_use_yields_one_descriptor() {
        crate::entity! {
            #[table = "race"]
            struct Race / RaceField {
                #[pk] id: i32 => Id("int4"),
            }
        }
        let handles: Vec<_> = (0..8)
            .map(|_| std::thread::spawn(|| Race::descriptor() as *const _ as usize))
            .collect();
        let ptrs: Vec<usize> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(ptrs.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn field_tags_index_the_descriptor() {
        assert_eq!(PersonField::Age.descriptor().column, "age");
        assert_eq!(PersonField::Active.ordinal(), 4);
    }

    #[test]
    fn primary_key_value_reads_the_key_field() {
        let p = Person {
            id: 9,
            name: "x".into(),
            age: None,
            tags: vec![],
            active: true,
        };
        assert_eq!(p.primary_key_value(), Some(Value::I64(9)));
        assert_eq!(p.field_values()[2], Value::Null);
    }

    #[test]
    fn renamed_columns_flow_through_queries_and_rows() {
        crate::entity! {
            #[table = "members"]
            struct Member / MemberField {
                #[pk] id: i32 => Id("int4"),
                full_name: String => FullName("text", "display_name"),
            }
        }

        let d = Member::descriptor();
        assert_eq!(d.fields[1].name, "full_name");
        assert_eq!(d.column_list(), "id, display_name");
        assert_eq!(crate::resolve::qualified("m", MemberField::FullName), "m.display_name");

        let m = Member::from_row(&crate::Row::new(vec![
            ("id".into(), Value::I32(1)),
            ("DISPLAY_NAME".into(), Value::from("Ada")),
        ]))
        .unwrap();
        assert_eq!(m.full_name, "Ada");
    }

    #[test]
    fn select_list_qualifies_columns() {
        assert_eq!(
            Person::descriptor().select_list("p"),
            "p.id, p.name, p.age, p.tags, p.active"
        );
    }
}

//! DELETE statement builder.

use crate::client::GenericClient;
use crate::entity::Entity;
use crate::error::{OrmResult, UsageError};
use crate::exec::Shape;
use crate::param::ParamRegistry;
use crate::qb::clause::{Filter, Scope};
use crate::qb::select::where_pk;
use crate::qb::traits::SqlQb;
use crate::qb::update::push_returning;
use crate::row::{FromRow, Row};
use crate::value::Value;
use std::marker::PhantomData;

/// DELETE builder: `DELETE FROM <table> <alias> WHERE ... [RETURNING ...]`.
///
/// A statement without a WHERE predicate fails at assembly.
pub struct DeleteQb<T = Row> {
    table: String,
    scope: Scope,
    returning: Option<String>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for DeleteQb<T> {
    fn clone(&self) -> Self {
        Self {
            table: self.table.clone(),
            scope: self.scope.clone(),
            returning: self.returning.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for DeleteQb<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeleteQb")
            .field("table", &self.table)
            .field("scope", &self.scope)
            .finish()
    }
}

impl<T> DeleteQb<T> {
    pub(crate) fn with_table(table: &str, alias: &str, returning: Option<String>) -> Self {
        Self {
            table: table.to_string(),
            scope: Scope::new(alias),
            returning,
            _marker: PhantomData,
        }
    }

    pub fn returning(mut self, fields: &str) -> Self {
        self.returning = Some(fields.to_string());
        self
    }
}

impl<T: Entity> DeleteQb<T> {
    /// `alias.<primary key> = value`
    pub fn where_pk(mut self, value: impl Into<Value>) -> Self {
        where_pk::<T>(&mut self.scope, value.into());
        self
    }
}

impl<T: FromRow + 'static> DeleteQb<T> {
    pub async fn execute(&self, conn: &impl GenericClient) -> OrmResult<u64> {
        Ok(self.run(conn, Shape::Affected).await?.rows_affected())
    }

    pub async fn execute_returning_one(&self, conn: &impl GenericClient) -> OrmResult<(u64, Option<T>)> {
        self.run(conn, Shape::One).await?.into_one()
    }

    pub async fn execute_returning(&self, conn: &impl GenericClient) -> OrmResult<Vec<T>> {
        self.run(conn, Shape::List).await?.into_list()
    }
}

impl<T> Filter for DeleteQb<T> {
    fn scope_mut(&mut self) -> &mut Scope {
        &mut self.scope
    }
}

impl<T> SqlQb for DeleteQb<T> {
    fn default_shape(&self) -> Shape {
        Shape::Affected
    }

    fn render_shape(&self, reg: &mut ParamRegistry, shape: Shape) -> OrmResult<String> {
        if self.scope.conds.is_empty() {
            return Err(UsageError::MissingWhere.into());
        }
        self.scope.prepare(reg)?;

        let mut sql = format!(
            "DELETE FROM {} {} WHERE {}",
            self.table,
            self.scope.alias,
            self.scope.conds.render(reg)?
        );
        push_returning(&mut sql, shape, self.returning.as_deref(), &self.scope.alias);
        Ok(sql)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::qb::{delete, delete_entity, delete_from};

    crate::entity! {
        #[table = "sessions"]
        pub struct Session / SessionField {
            #[pk] pub id: i64 => Id("int8"),
            pub token: String => Token("text"),
        }
    }

    crate::entity! {
        #[table = "audit"]
        pub struct Audit / AuditField {
            pub line: String => Line("text"),
        }
    }

    #[test]
    fn delete_without_where_fails() {
        let err = delete_from("sessions", "s").assemble().unwrap_err();
        assert_eq!(err.usage(), Some(&UsageError::MissingWhere));
    }

    #[test]
    fn delete_by_key() {
        let a = delete::<Session>().where_pk(3i64).assemble().unwrap();
        assert_eq!(a.sql, "DELETE FROM sessions a WHERE a.id = $1");

        let s = Session {
            id: 4,
            token: "t".into(),
        };
        let a = delete_entity(&s).assemble_for(Shape::One).unwrap();
        assert_eq!(a.sql, "DELETE FROM sessions a WHERE a.id = $1 RETURNING a.id, a.token");
    }

    #[test]
    fn where_pk_without_key_is_a_usage_error() {
        let err = delete::<Audit>().where_pk(1).assemble().unwrap_err();
        // The deferred error is only consulted once a predicate exists.
        assert_eq!(err.usage(), Some(&UsageError::MissingWhere));

        let err = delete::<Audit>()
            .where_pk(1)
            .eq(AuditField::Line, "x")
            .assemble()
            .unwrap_err();
        assert_eq!(err.usage(), Some(&UsageError::NoPrimaryKey("audit")));
    }

    #[test]
    fn template_or_is_grouped_with_the_key() {
        let a = delete::<Session>()
            .where_pk(3i64)
            .where_tpl("a.token = {0} OR a.token IS NULL", crate::args!["t"])
            .assemble()
            .unwrap();
        assert_eq!(
            a.sql,
            "DELETE FROM sessions a WHERE a.id = $1 AND (a.token = $2 OR a.token IS NULL)"
        );
    }

    #[test]
    fn blank_fragment_does_not_count_as_where() {
        let err = delete_from("sessions", "s")
            .where_fragment(crate::Fragment::new())
            .assemble()
            .unwrap_err();
        assert_eq!(err.usage(), Some(&UsageError::MissingWhere));

        let err = delete_from("sessions", "s")
            .eq("s.id", 1)
            .where_raw(" ")
            .assemble()
            .unwrap_err();
        assert_eq!(err.usage(), Some(&UsageError::EmptyPredicate));
    }

    #[test]
    fn template_predicates() {
        let a = delete_from("sessions", "s")
            .where_tpl("s.expires_at < now() - {0} * interval '1 day'", crate::args![30])
            .assemble()
            .unwrap();
        assert_eq!(
            a.sql,
            "DELETE FROM sessions s WHERE s.expires_at < now() - $1 * interval '1 day'"
        );
    }
}

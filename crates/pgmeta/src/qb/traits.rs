//! Trait definitions for query builders.

use crate::client::GenericClient;
use crate::error::{OrmError, OrmResult};
use crate::exec::{Assembled, Outcome, Shape, dispatch};
use crate::param::ParamRegistry;
use crate::pipeline::PipelineEntry;
use crate::value::FromValue;
use std::future::Future;

/// Base trait for all statement builders.
///
/// A builder is mutated freely and assembled once per execution: assembly
/// checks the statement's invariants, renders the text and numbers the
/// parameters in one pass.
pub trait SqlQb: Sync {
    /// Shape used by [`SqlQb::assemble`] and [`SqlQb::to_sql`].
    fn default_shape(&self) -> Shape;

    /// Render the statement for `shape` into `reg`.
    ///
    /// Builders adjust the text per shape (`LIMIT 1` for one-row selects,
    /// `RETURNING` for mutations read as rows).
    fn render_shape(&self, reg: &mut ParamRegistry, shape: Shape) -> OrmResult<String>;

    /// Assemble for a given result shape.
    fn assemble_for(&self, shape: Shape) -> OrmResult<Assembled> {
        let mut reg = ParamRegistry::new();
        let sql = self.render_shape(&mut reg, shape)?;
        let params = reg.finish()?;
        Ok(Assembled { sql, params })
    }

    /// Assemble in the builder's default shape.
    fn assemble(&self) -> OrmResult<Assembled> {
        self.assemble_for(self.default_shape())
    }

    /// Debug helper to get the SQL string.
    fn to_sql(&self) -> OrmResult<String> {
        self.assemble().map(|a| a.sql)
    }

    /// Assemble into a pipeline entry.
    fn pipe(&self, shape: Shape) -> OrmResult<PipelineEntry> {
        Ok(PipelineEntry::new(self.assemble_for(shape)?, shape))
    }

    /// Assemble and dispatch in one step.
    fn run(
        &self,
        conn: &impl GenericClient,
        shape: Shape,
    ) -> impl Future<Output = OrmResult<Outcome>> + Send {
        async move {
            let stmt = self.assemble_for(shape)?;
            dispatch(conn, &stmt, shape).await
        }
    }

    /// Column 0 of row 0; [`OrmError::NoRows`] when there is none.
    fn fetch_scalar<V: FromValue + Send>(
        &self,
        conn: &impl GenericClient,
    ) -> impl Future<Output = OrmResult<V>> + Send {
        async move { self.run(conn, Shape::Scalar).await?.into_scalar() }
    }

    /// Column 0 of row 0, or `default` when there is no row.
    fn fetch_scalar_or<V: FromValue + Send>(
        &self,
        conn: &impl GenericClient,
        default: V,
    ) -> impl Future<Output = OrmResult<V>> + Send {
        async move {
            match self.run(conn, Shape::Scalar).await {
                Ok(outcome) => outcome.into_scalar(),
                Err(OrmError::NoRows) => Ok(default),
                Err(e) => Err(e),
            }
        }
    }
}

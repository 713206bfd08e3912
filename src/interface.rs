use async_trait::async_trait;
use crate::core::Result;
use crate::pool::Engine;

/// Seam to the driver or ORM that actually runs statements.
///
/// The router only decides which [`Engine`] a statement goes to; an
/// implementation of this trait owns the real connections (typically one
/// driver pool per engine, looked up by [`Engine::name`] or [`Engine::url`]).
#[async_trait]
pub trait StatementExecutor: Send + Sync {
    type Output: Send;

    /// Execute `sql` on `engine`.
    async fn execute(&self, engine: &Engine, sql: &str) -> Result<Self::Output>;

    /// Called when the routed session commits.
    async fn commit(&self) -> Result<()> {
        Ok(())
    }

    /// Called when the routed session rolls back.
    async fn rollback(&self) -> Result<()> {
        Ok(())
    }
}

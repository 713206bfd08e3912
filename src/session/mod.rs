//! Routed session: the transaction-boundary collaborator.
//!
//! Holds one [`RoutingContext`] and resets it on every commit, rollback,
//! request end and drop, so stickiness never leaks into the next unit of work.

use std::sync::Arc;

use tracing::debug;

use crate::core::{Result, RouterError};
use crate::interface::StatementExecutor;
use crate::router::{BindGroupGuard, ContextHolder, Router, RoutingContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    InTransaction,
    Closed,
}

/// Session that routes every statement through a [`Router`]
///
/// # Examples
///
/// ```ignore
/// let mut session = RoutedSession::new(router, executor);
///
/// session.begin()?;
/// session.execute("INSERT INTO orders VALUES (1)").await?;
/// session.execute("SELECT * FROM orders").await?; // primary: read-your-writes
/// session.commit().await?;
///
/// session.execute("SELECT * FROM orders").await?; // replica again
/// ```
pub struct RoutedSession<E: StatementExecutor> {
    router: Arc<Router>,
    executor: Arc<E>,
    context: RoutingContext,
    state: SessionState,
}

impl<E: StatementExecutor> RoutedSession<E> {
    pub fn new(router: Arc<Router>, executor: Arc<E>) -> Self {
        Self {
            router,
            executor,
            context: RoutingContext::new(),
            state: SessionState::Active,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn context(&self) -> &RoutingContext {
        &self.context
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    pub fn is_in_transaction(&self) -> bool {
        self.state == SessionState::InTransaction
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state == SessionState::Closed {
            return Err(RouterError::Execution("Session is closed".into()));
        }
        Ok(())
    }

    /// Route and execute a statement
    pub async fn execute(&mut self, sql: &str) -> Result<E::Output> {
        self.ensure_open()?;
        let engine = self.router.decide(sql, &mut self.context)?;
        self.executor.execute(&engine, sql).await
    }

    /// Execute a read/count-style statement with an optional one-shot bind group
    pub async fn query_with_bind(&mut self, sql: &str, bind: Option<&str>) -> Result<E::Output> {
        self.ensure_open()?;
        let engine = self.router.decide_with_bind(sql, &mut self.context, bind)?;
        self.executor.execute(&engine, sql).await
    }

    /// Start a logical transaction with a fresh routing context
    pub fn begin(&mut self) -> Result<()> {
        self.ensure_open()?;
        if self.state == SessionState::InTransaction {
            return Err(RouterError::Execution("Transaction already active".into()));
        }

        self.router.reset_context(&mut self.context);
        self.state = SessionState::InTransaction;
        Ok(())
    }

    /// Commit; the context is reset even when the executor fails
    pub async fn commit(&mut self) -> Result<()> {
        if self.state != SessionState::InTransaction {
            return Err(RouterError::Execution("No active transaction".into()));
        }

        let outcome = self.executor.commit().await;
        self.finish_transaction();
        outcome
    }

    /// Roll back; the context is reset even when the executor fails
    pub async fn rollback(&mut self) -> Result<()> {
        if self.state != SessionState::InTransaction {
            return Err(RouterError::Execution("No active transaction".into()));
        }

        let outcome = self.executor.rollback().await;
        self.finish_transaction();
        outcome
    }

    fn finish_transaction(&mut self) {
        self.router.reset_context(&mut self.context);
        self.state = SessionState::Active;
    }

    /// Request-teardown safety net for integrations
    ///
    /// Resets the context whether or not the application committed. An
    /// open transaction is left to the caller; only routing state is cleared.
    pub fn end_request(&mut self) {
        if self.state == SessionState::InTransaction {
            debug!(context = %self.context.id(), "request ended inside an open transaction");
        }
        self.router.reset_context(&mut self.context);
    }

    /// Close the session, rolling back an open transaction
    pub async fn close(&mut self) -> Result<()> {
        if self.state == SessionState::InTransaction {
            self.rollback().await?;
        }

        self.router.reset_context(&mut self.context);
        self.state = SessionState::Closed;
        Ok(())
    }

    /// Force `group` for statements issued through the returned guard
    pub fn with_bind_group(&mut self, group: &str) -> Result<BindGroupGuard<'_, Self>> {
        let router = Arc::clone(&self.router);
        router.with_bind_group(self, group)
    }

    /// Force the default group for statements issued through the returned guard
    pub fn primary_context(&mut self) -> BindGroupGuard<'_, Self> {
        let router = Arc::clone(&self.router);
        router.primary_context(self)
    }

    /// Force the read group for statements issued through the returned guard
    pub fn replica_context(&mut self) -> BindGroupGuard<'_, Self> {
        let router = Arc::clone(&self.router);
        router.replica_context(self)
    }
}

impl<E: StatementExecutor> ContextHolder for RoutedSession<E> {
    fn routing_context(&mut self) -> &mut RoutingContext {
        &mut self.context
    }
}

impl<E: StatementExecutor> Drop for RoutedSession<E> {
    fn drop(&mut self) {
        self.context.reset();
    }
}

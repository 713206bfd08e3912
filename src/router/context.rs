use std::fmt;
use uuid::Uuid;

/// Consistency state of a logical transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    /// No write seen yet, reads may use replicas
    Fresh,
    /// A write was routed, reads are pinned to the default group
    Stuck,
}

impl fmt::Display for ContextState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextState::Fresh => write!(f, "FRESH"),
            ContextState::Stuck => write!(f, "STUCK"),
        }
    }
}

/// Per-transaction routing state
///
/// One instance per logical transaction or request, owned by a single
/// caller and passed by `&mut` into every decision. Must be reset at
/// every commit, rollback and request teardown.
#[derive(Debug)]
pub struct RoutingContext {
    id: Uuid,
    stuck_to_primary: bool,
    override_stack: Vec<String>,
    ended: bool,
}

impl RoutingContext {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            stuck_to_primary: false,
            override_stack: Vec::new(),
            ended: false,
        }
    }

    /// Identifier used in log output
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> ContextState {
        if self.stuck_to_primary {
            ContextState::Stuck
        } else {
            ContextState::Fresh
        }
    }

    pub fn is_stuck(&self) -> bool {
        self.stuck_to_primary
    }

    /// Innermost active bind-group override
    pub fn active_override(&self) -> Option<&str> {
        self.override_stack.last().map(String::as_str)
    }

    pub fn override_depth(&self) -> usize {
        self.override_stack.len()
    }

    /// Return to FRESH and drop all overrides. Safe to call repeatedly.
    pub fn reset(&mut self) {
        self.stuck_to_primary = false;
        self.override_stack.clear();
        self.ended = false;
    }

    /// Record that the owning transaction ended without a reset yet
    ///
    /// Any decision on this context fails with `StaleContext` until
    /// [`reset`](Self::reset) is called.
    pub fn mark_ended(&mut self) {
        self.ended = true;
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    pub(crate) fn stick(&mut self) {
        self.stuck_to_primary = true;
    }

    pub(crate) fn push_override(&mut self, group: &str) -> usize {
        self.override_stack.push(group.to_string());
        self.override_stack.len()
    }

    pub(crate) fn truncate_overrides(&mut self, depth: usize) {
        self.override_stack.truncate(depth);
    }
}

impl Default for RoutingContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_context_is_fresh() {
        let ctx = RoutingContext::new();
        assert_eq!(ctx.state(), ContextState::Fresh);
        assert_eq!(ctx.active_override(), None);
        assert!(!ctx.is_ended());
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut ctx = RoutingContext::new();
        ctx.stick();
        ctx.push_override("analytics");
        ctx.push_override("default");
        ctx.mark_ended();

        assert_eq!(ctx.state(), ContextState::Stuck);
        assert_eq!(ctx.active_override(), Some("default"));

        ctx.reset();
        assert_eq!(ctx.state(), ContextState::Fresh);
        assert_eq!(ctx.override_depth(), 0);
        assert!(!ctx.is_ended());

        // Idempotent
        ctx.reset();
        assert_eq!(ctx.state(), ContextState::Fresh);
    }

    #[test]
    fn test_contexts_have_distinct_ids() {
        assert_ne!(RoutingContext::new().id(), RoutingContext::new().id());
    }
}

//! Scoped bind-group overrides.
//!
//! A [`BindGroupGuard`] pushes a group onto the context's override stack and
//! pops it when dropped, including during unwinding.

use std::ops::{Deref, DerefMut};

use super::context::RoutingContext;

/// Anything that owns a [`RoutingContext`]
pub trait ContextHolder {
    fn routing_context(&mut self) -> &mut RoutingContext;
}

impl ContextHolder for RoutingContext {
    fn routing_context(&mut self) -> &mut RoutingContext {
        self
    }
}

/// Active override; dereferences to the holder it was created from
///
/// Guards nest: creating a guard from another guard pushes a new frame and
/// the innermost one governs routing until it is dropped.
pub struct BindGroupGuard<'a, T: ContextHolder + ?Sized> {
    holder: &'a mut T,
    group: String,
    depth: usize,
}

impl<'a, T: ContextHolder + ?Sized> BindGroupGuard<'a, T> {
    /// Callers validate `group` against the pool first.
    pub(crate) fn enter(holder: &'a mut T, group: &str) -> Self {
        let depth = holder.routing_context().push_override(group);
        Self {
            holder,
            group: group.to_string(),
            depth,
        }
    }

    /// Group forced by this guard
    pub fn group(&self) -> &str {
        &self.group
    }
}

impl<T: ContextHolder + ?Sized> Deref for BindGroupGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &*self.holder
    }
}

impl<T: ContextHolder + ?Sized> DerefMut for BindGroupGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut *self.holder
    }
}

impl<T: ContextHolder + ?Sized> ContextHolder for BindGroupGuard<'_, T> {
    fn routing_context(&mut self) -> &mut RoutingContext {
        self.holder.routing_context()
    }
}

impl<T: ContextHolder + ?Sized> Drop for BindGroupGuard<'_, T> {
    fn drop(&mut self) {
        // Truncate rather than pop: a reset inside the scope already emptied the stack.
        self.holder
            .routing_context()
            .truncate_overrides(self.depth - 1);
    }
}

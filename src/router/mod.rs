// ============================================================================
// Routing Decision
// ============================================================================
//
// decide(statement, context):
//   1. routing disabled       -> first engine of the default group
//   2. override stack active  -> innermost override group
//   3. write / locking read   -> default group, context becomes STUCK
//   4. read on STUCK context  -> default group
//   5. read on FRESH context  -> read group
//
// ============================================================================

pub mod context;
pub mod scope;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, warn};

use crate::classifier::{Classification, Routable, StatementClassifier};
use crate::config::RoutingConfig;
use crate::core::{Result, RouterError};
use crate::pool::{Engine, EnginePool};
pub use context::{ContextState, RoutingContext};
pub use scope::{BindGroupGuard, ContextHolder};

/// Why a decision went where it did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteReason {
    Disabled,
    Override,
    Write,
    Sticky,
    Replica,
}

impl fmt::Display for RouteReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RouteReason::Disabled => "disabled",
            RouteReason::Override => "override",
            RouteReason::Write => "write",
            RouteReason::Sticky => "sticky",
            RouteReason::Replica => "replica",
        })
    }
}

/// Result of a routing decision
#[derive(Debug, Clone)]
pub struct Decision {
    pub engine: Arc<Engine>,
    /// `None` when classification was skipped (disabled routing or override)
    pub classification: Option<Classification>,
    pub reason: RouteReason,
}

impl Decision {
    pub fn group(&self) -> &str {
        self.engine.group()
    }
}

/// Decision counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterStats {
    pub disabled: u64,
    pub overridden: u64,
    pub writes: u64,
    pub sticky_reads: u64,
    pub replica_reads: u64,
}

impl RouterStats {
    pub fn total(&self) -> u64 {
        self.disabled + self.overridden + self.writes + self.sticky_reads + self.replica_reads
    }
}

#[derive(Debug, Default)]
struct DecisionCounters {
    disabled: AtomicU64,
    overridden: AtomicU64,
    writes: AtomicU64,
    sticky_reads: AtomicU64,
    replica_reads: AtomicU64,
}

impl DecisionCounters {
    fn record(&self, reason: RouteReason) {
        let counter = match reason {
            RouteReason::Disabled => &self.disabled,
            RouteReason::Override => &self.overridden,
            RouteReason::Write => &self.writes,
            RouteReason::Sticky => &self.sticky_reads,
            RouteReason::Replica => &self.replica_reads,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> RouterStats {
        RouterStats {
            disabled: self.disabled.load(Ordering::Relaxed),
            overridden: self.overridden.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            sticky_reads: self.sticky_reads.load(Ordering::Relaxed),
            replica_reads: self.replica_reads.load(Ordering::Relaxed),
        }
    }
}

/// Statement router
///
/// Shared across threads (`Arc<Router>`); all per-transaction state lives in
/// the [`RoutingContext`] passed to each call.
///
/// # Examples
///
/// ```
/// use bindroute::{Router, RoutingConfig, RoutingContext};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let router = Router::new(
///     RoutingConfig::new("postgres://primary/app").replica("postgres://replica/app"),
/// )?;
/// let mut ctx = RoutingContext::new();
///
/// assert_eq!(router.decide("SELECT * FROM users", &mut ctx)?.group(), "read");
/// assert_eq!(router.decide("UPDATE users SET active = true", &mut ctx)?.group(), "default");
/// assert_eq!(router.decide("SELECT * FROM users", &mut ctx)?.group(), "default");
///
/// router.reset_context(&mut ctx);
/// assert_eq!(router.decide("SELECT * FROM users", &mut ctx)?.group(), "read");
/// # Ok(())
/// # }
/// ```
pub struct Router {
    config: RoutingConfig,
    pool: EnginePool,
    classifier: StatementClassifier,
    counters: DecisionCounters,
}

impl Router {
    /// Validate the configuration and build the engine pool
    pub fn new(config: RoutingConfig) -> Result<Self> {
        let pool = EnginePool::build(&config)?;
        let classifier = StatementClassifier::new(config.dialect, config.classifier_cache_size);

        Ok(Self {
            config,
            pool,
            classifier,
            counters: DecisionCounters::default(),
        })
    }

    pub fn config(&self) -> &RoutingConfig {
        &self.config
    }

    pub fn pool(&self) -> &EnginePool {
        &self.pool
    }

    pub fn classifier(&self) -> &StatementClassifier {
        &self.classifier
    }

    /// Pick the engine that should execute `statement`
    pub fn decide<S: Routable + ?Sized>(
        &self,
        statement: &S,
        ctx: &mut RoutingContext,
    ) -> Result<Arc<Engine>> {
        self.route(statement, ctx).map(|decision| decision.engine)
    }

    /// Like [`decide`](Self::decide) with a one-shot bind-group override
    pub fn decide_with_bind<S: Routable + ?Sized>(
        &self,
        statement: &S,
        ctx: &mut RoutingContext,
        bind: Option<&str>,
    ) -> Result<Arc<Engine>> {
        match bind {
            Some(group) => {
                let mut scoped = self.with_bind_group(&mut *ctx, group)?;
                self.decide(statement, &mut scoped)
            }
            None => self.decide(statement, ctx),
        }
    }

    /// Full decision including classification and reason
    pub fn route<S: Routable + ?Sized>(
        &self,
        statement: &S,
        ctx: &mut RoutingContext,
    ) -> Result<Decision> {
        if !self.config.enabled {
            return Ok(self.finish(
                ctx,
                Decision {
                    engine: Arc::clone(self.pool.primary()),
                    classification: None,
                    reason: RouteReason::Disabled,
                },
            ));
        }

        if ctx.is_ended() {
            warn!(context = %ctx.id(), "routing requested on a context that was not reset");
            return Err(RouterError::StaleContext(format!(
                "context {} was not reset after its transaction ended",
                ctx.id()
            )));
        }

        if let Some(group) = ctx.active_override() {
            let engine = self.pool.select(group, self.config.strategy)?;
            return Ok(self.finish(
                ctx,
                Decision {
                    engine: Arc::clone(engine),
                    classification: None,
                    reason: RouteReason::Override,
                },
            ));
        }

        let classification = statement.classify_with(&self.classifier);
        let strategy = self.config.strategy;

        let (engine, reason) = if classification.requires_primary() {
            if self.config.sticky_after_write {
                ctx.stick();
            }
            (self.pool.default_group().select(strategy), RouteReason::Write)
        } else if ctx.is_stuck() {
            (self.pool.default_group().select(strategy), RouteReason::Sticky)
        } else {
            (self.pool.read_group().select(strategy), RouteReason::Replica)
        };

        Ok(self.finish(
            ctx,
            Decision {
                engine: Arc::clone(engine),
                classification: Some(classification),
                reason,
            },
        ))
    }

    fn finish(&self, ctx: &RoutingContext, decision: Decision) -> Decision {
        self.counters.record(decision.reason);
        debug!(
            context = %ctx.id(),
            state = %ctx.state(),
            classification = ?decision.classification,
            group = %decision.group(),
            engine = %decision.engine.name(),
            reason = %decision.reason,
            "routed statement"
        );
        decision
    }

    /// Return the context to FRESH at a transaction or request boundary
    pub fn reset_context(&self, ctx: &mut RoutingContext) {
        debug!(context = %ctx.id(), state = %ctx.state(), "reset routing context");
        ctx.reset();
    }

    /// Force `group` until the returned guard is dropped
    ///
    /// Fails with `UnknownGroup` (leaving the context untouched) when the
    /// group is not configured.
    pub fn with_bind_group<'a, T: ContextHolder + ?Sized>(
        &self,
        holder: &'a mut T,
        group: &str,
    ) -> Result<BindGroupGuard<'a, T>> {
        self.pool.group(group)?;
        Ok(BindGroupGuard::enter(holder, group))
    }

    /// Force the default group
    pub fn primary_context<'a, T: ContextHolder + ?Sized>(&self, holder: &'a mut T) -> BindGroupGuard<'a, T> {
        BindGroupGuard::enter(holder, &self.config.default_group)
    }

    /// Force the read group
    pub fn replica_context<'a, T: ContextHolder + ?Sized>(&self, holder: &'a mut T) -> BindGroupGuard<'a, T> {
        BindGroupGuard::enter(holder, &self.config.read_group)
    }

    /// Run `f` with `group` forced, restoring the previous policy afterwards
    pub fn scoped<T, R, F>(&self, holder: &mut T, group: &str, f: F) -> Result<R>
    where
        T: ContextHolder + ?Sized,
        F: FnOnce(&mut T) -> R,
    {
        let mut guard = self.with_bind_group(holder, group)?;
        Ok(f(&mut *guard))
    }

    pub fn stats(&self) -> RouterStats {
        self.counters.snapshot()
    }
}

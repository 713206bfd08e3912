// ============================================================================
// bindroute Library
// ============================================================================
//
// Statement routing for primary/replica database deployments:
//
//   statement -> classifier -> router (context: override / stickiness)
//             -> engine pool (bind group) -> selector -> engine
//
// ============================================================================

pub mod core;
pub mod config;
pub mod pool;
pub mod classifier;
pub mod router;
pub mod interface;
pub mod session;

// Re-export main types for convenience
pub use crate::core::{Result, RouterError};
pub use config::{
    ConnectionUrl, EngineDescriptor, ReplicaDescriptor, RoutingConfig, SqlDialect, Strategy,
};
pub use pool::{Engine, EngineGroup, EnginePool};
pub use classifier::{Classification, Routable, StatementClassifier};
pub use router::{
    BindGroupGuard, ContextHolder, ContextState, Decision, RouteReason, Router, RouterStats,
    RoutingContext,
};
pub use interface::StatementExecutor;
pub use session::{RoutedSession, SessionState};

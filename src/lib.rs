//! modelgate: model-routing and cost-accounting core for an LLM gateway
//!
//! The crate centers on the [`Orchestrator`]: it resolves a client-facing
//! model group to a concrete deployment, executes the request through a
//! pluggable [`ProviderAdapter`], and handles retries, cooldowns, and
//! fallback chains when providers misbehave. Successful requests are priced
//! against a [`ModelCostTable`] and attributed to provider/team/key budget
//! scopes, exactly once.
//!
//! Provider wire formats, HTTP surfaces, and persistence backends live
//! outside this crate, behind the traits in [`core::interfaces`].
//!
//! ```no_run
//! use modelgate::config;
//! use modelgate::core::pricing::ModelCostTable;
//! use std::sync::Arc;
//!
//! # fn adapter() -> Arc<dyn modelgate::core::interfaces::ProviderAdapter> { unimplemented!() }
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let cfg = config::from_yaml_file("gateway.yaml")?;
//! let table = Arc::new(ModelCostTable::new());
//! let orchestrator = config::build_orchestrator(&cfg, table, adapter())?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod utils;

pub use config::DispatchConfig;
pub use self::core::budget::{BudgetTracker, ScopeKey};
pub use self::core::cost::{CostCalculator, CostResult};
pub use self::core::errors::{DispatchFailure, ProviderFailure, RouterError};
pub use self::core::interfaces::{PersistenceSink, ProviderAdapter, ProviderReply, UsageReport};
pub use self::core::pricing::{ModelCostTable, PricingEntry};
pub use self::core::router::{
    Deployment, DeploymentPool, DeploymentSelector, DispatchOutcome, DispatchRequest,
    ModelGroup, Orchestrator, RoutingStrategy,
};
pub use self::core::usage::{UsageAggregator, UsageRecord};

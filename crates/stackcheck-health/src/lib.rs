//! stackcheck-health verifies a freshly started stack is actually healthy.
//!
//! Provides bounded, fallback-driven probes over HTTP bodies and raw TCP
//! ports, and an orchestrator that runs them across the stack and folds
//! the results into a [`DeploymentVerdict`](stackcheck_core::DeploymentVerdict).
//!
//! # Architecture
//!
//! ```text
//! HealthOrchestrator
//!   ├── settle delay (once)
//!   ├── JoinSet of probe tasks, bounded by a Semaphore
//!   │   ├── ServiceProbe::check(ProbeSpec)        primary → fallback → …
//!   │   └── ServiceProbe::check_once(SingleShotCheck)
//!   ├── global deadline → unresolved services marked Unreachable
//!   └── Overall::aggregate → DeploymentVerdict
//! ```
//!
//! Network failures never escape a probe: they are spent as attempts, and
//! an exhausted chain is an `Unreachable` result rather than an error.

pub mod net;
pub mod orchestrator;
pub mod probe;

#[cfg(test)]
mod mock;

pub use net::{HttpResponse, HyperNetwork, Network, NetworkError};
pub use orchestrator::{HealthOrchestrator, OrchestratorSettings};
pub use probe::{Matcher, ServiceProbe};

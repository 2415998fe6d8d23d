//! stackcheck-core: shared types and configuration for stackcheck.
//!
//! Defines the probe data model ([`ProbeSpec`], [`ProbeResult`],
//! [`DeploymentVerdict`]), the `stackcheck.toml` schema, and the
//! duration-string helpers used by every config field.

pub mod config;
pub mod duration;
pub mod types;

pub use config::{ConfigError, EntryKind, ReconcileEntry, StackConfig, StackSettings, WritePolicy};
pub use duration::{format_duration, parse_duration};
pub use types::*;

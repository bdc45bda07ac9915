//! The fixed-point driver: per-function policy resolution, the round loop and its degradation
//! ladder, and telemetry aggregation for the Molt mid-end optimizer (§4.12, §6).
//!
//! `pipeline::optimize_function` is the single public seam the front-end and back-end are
//! expected to call; everything else in this crate exists to support that one entry point.

pub mod config;
pub mod error;
pub mod pipeline;
pub mod policy;
pub mod telemetry;

pub use config::DriverConfig;
pub use error::DriverError;
pub use pipeline::{optimize_function, OptimizeOutcome};
pub use policy::{resolve_policy, Policy, PolicyInput, Profile, Tier};
pub use telemetry::{DegradeEvent, FunctionTelemetry, PassTiming, PolicyOutcome, TelemetryAggregator};

//! Core of the QNP-to-voxel pipeline.
//!
//! Turns per-tile histology scores into smoothed volumetric masks on each
//! subject's native MRI grid, and sequences the per-subject steps so that
//! reruns only redo what is missing.

pub mod config;
pub(crate) mod fsio;
pub mod math;
pub mod model;
pub mod orchestrator;
pub mod prelude;
pub mod processing;
pub mod telemetry;
pub mod volume;

pub use orchestrator::{Orchestrator, RunSummary};
pub use prelude::{StepError, StepResult};

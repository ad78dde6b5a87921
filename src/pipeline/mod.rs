//! The four-stage progressive analysis pipeline and its controller.

pub mod controller;
pub mod cost;
pub mod enhanced;
pub mod enrichment;
pub mod triage;
pub mod validation;
pub mod velocity;

pub use controller::{CoreContext, CycleBusy, PipelineController};
pub use cost::CostTracker;
pub use enrichment::{EnrichOutcome, EnrichmentCache};

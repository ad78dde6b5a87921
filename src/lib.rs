//! gemscout — early-stage token discovery and ranking engine.
//!
//! Ingests candidate tokens from heterogeneous discovery sources and runs
//! them through a four-stage progressive pipeline (triage, enhanced
//! analysis, market validation, velocity scoring) that narrows a noisy
//! candidate set into a small ranked shortlist while minimizing expensive
//! provider calls.
//!
//! Source connectors, alert delivery, and dashboards live with the host;
//! this crate is the pipeline, its provider plumbing (rate-limit gate,
//! circuit breaker, batch planner), the scoring library, and the
//! alerted-set storage.

pub mod config;
pub mod models;
pub mod pipeline;
pub mod providers;
pub mod scoring;
pub mod storage;

pub use config::EngineConfig;
pub use models::{Candidate, CostReport, CycleOutput, DiscoveryRecord};
pub use pipeline::{CoreContext, CycleBusy, PipelineController};
pub use providers::{ProviderAdapter, ProviderError, ProviderRegistry};
pub use storage::{AlertedSet, MemoryAlertedSet, SqliteAlertedSet};

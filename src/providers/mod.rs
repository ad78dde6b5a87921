//! Outbound-call plumbing: typed errors, the adapter contract, the
//! rate-limit gate, the circuit breaker, the batch planner, and a generic
//! REST adapter.

pub mod adapter;
pub mod batch;
pub mod breaker;
pub mod error;
pub mod gate;
pub mod http;
pub mod registry;

pub use adapter::{FieldSet, PartialRecord, ProviderAdapter, Timeframe};
pub use batch::{BatchOutcome, BatchPlanner};
pub use breaker::{CallOutcome, CircuitBreaker, CircuitState};
pub use error::ProviderError;
pub use gate::{GatePermit, RateLimitGate};
pub use http::{RestProviderAdapter, RestProviderConfig};
pub use registry::ProviderRegistry;

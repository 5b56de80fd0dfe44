//! HTTP API handlers for cropscout-te
//!
//! Observation ingest plus read-side lookups over windows and
//! diagnoses, with SSE event streaming.

pub mod diagnoses;
pub mod health;
pub mod observations;
pub mod sse;
pub mod windows;

pub use diagnoses::diagnosis_routes;
pub use health::health_routes;
pub use observations::observation_routes;
pub use sse::event_stream;
pub use windows::window_routes;

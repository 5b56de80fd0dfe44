//! Engine services
//!
//! The processing chain: observation ingest feeds the aggregation
//! engine, the sweeper promotes idle windows, and the pipeline drives
//! each ready window through triage, analyzer fan-out, and diagnosis
//! publication.

pub mod aggregation;
pub mod fanout;
pub mod pipeline;
pub mod publisher;
pub mod sweeper;
pub mod triage_router;

pub use aggregation::{AggregationEngine, IngestOutcome};
pub use fanout::FanOutCoordinator;
pub use pipeline::{ReadyWindow, WindowPipeline};
pub use publisher::DiagnosisPublisher;
pub use sweeper::ExpirySweeper;
pub use triage_router::TriageRouter;

//! Data models for cropscout-te (Triage Engine)
//!
//! - Observation events and their aggregation windows
//! - Window state machine (open, ready, triaged, failed)
//! - Triage decisions and the classification routing table
//! - Analyzer findings and merged diagnoses

pub mod diagnosis;
pub mod finding;
pub mod observation;
pub mod parameters;
pub mod triage;
pub mod window;

pub use diagnosis::{Diagnosis, DiagnosisSummary};
pub use finding::{AnalyzerFinding, Citation};
pub use observation::{severity_from_quality_percent, ObservationEvent};
pub use parameters::EngineParams;
pub use triage::{Classification, RouteSet, RoutingTable, TriageDecision};
pub use window::{EvidenceWindow, StateTransition, WindowStatus};

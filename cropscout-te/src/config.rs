//! Engine configuration
//!
//! Service endpoints, the analyzer fleet, and routing overrides come from
//! a TOML file. Tuning parameters live in the settings table instead
//! (see [`crate::db::settings`]); this file covers only topology.

use crate::models::{Classification, RouteSet, RoutingTable};
use cropscout_common::Error;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

/// One specialist analyzer service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    /// Registry id, referenced by routing entries
    pub id: String,
    /// Base URL of the analyzer service
    pub endpoint: String,
    /// Knowledge domain used for retrieval scoping
    pub domain: String,
}

/// Routing override for one classification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConfig {
    /// Classification label (e.g. "pest_pressure")
    pub classification: String,
    /// Analyzer id consulted alone at high confidence
    pub primary: String,
    /// Additional analyzer ids consulted at medium confidence
    #[serde(default)]
    pub plausible: Vec<String>,
}

/// Triage engine topology configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Evidence classifier service base URL
    pub classifier_url: String,
    /// Grower context service base URL
    pub context_url: String,
    /// Knowledge retrieval service base URL (empty disables retrieval)
    pub retrieval_url: String,
    /// Specialist analyzer fleet
    pub analyzers: Vec<AnalyzerConfig>,
    /// Routing table overrides, applied on top of the compiled defaults
    pub routes: Vec<RouteConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            classifier_url: "http://127.0.0.1:5851".to_string(),
            context_url: "http://127.0.0.1:5852".to_string(),
            retrieval_url: "http://127.0.0.1:5853".to_string(),
            analyzers: vec![
                AnalyzerConfig {
                    id: "pest".to_string(),
                    endpoint: "http://127.0.0.1:5861".to_string(),
                    domain: "pest_management".to_string(),
                },
                AnalyzerConfig {
                    id: "pathology".to_string(),
                    endpoint: "http://127.0.0.1:5862".to_string(),
                    domain: "plant_pathology".to_string(),
                },
                AnalyzerConfig {
                    id: "irrigation".to_string(),
                    endpoint: "http://127.0.0.1:5863".to_string(),
                    domain: "irrigation".to_string(),
                },
                AnalyzerConfig {
                    id: "nutrition".to_string(),
                    endpoint: "http://127.0.0.1:5864".to_string(),
                    domain: "crop_nutrition".to_string(),
                },
            ],
            routes: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file
    ///
    /// A missing file is not an error; the compiled defaults describe a
    /// full local deployment. Unreadable or malformed files are.
    pub fn load(path: Option<&Path>) -> cropscout_common::Result<Self> {
        let Some(path) = path else {
            info!("No engine config file given, using compiled defaults");
            return Ok(Self::default());
        };

        if !path.exists() {
            info!(
                "Engine config file not found ({}), using compiled defaults",
                path.display()
            );
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Read engine config failed: {}", e)))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Parse engine config failed: {}", e)))?;

        info!(
            analyzers = config.analyzers.len(),
            route_overrides = config.routes.len(),
            "Engine config loaded from {}",
            path.display()
        );
        Ok(config)
    }

    /// Build the routing table: compiled defaults plus file overrides
    ///
    /// Overrides naming an unrecognized classification are skipped with a
    /// warning; Unknown is not overridable.
    pub fn routing_table(&self) -> RoutingTable {
        let mut table = RoutingTable::builtin();
        for route in &self.routes {
            let classification = Classification::from_label(&route.classification);
            if classification == Classification::Unknown {
                warn!(
                    label = %route.classification,
                    "Ignoring routing override for unrecognized classification"
                );
                continue;
            }
            table.set_route(
                classification,
                RouteSet {
                    primary: route.primary.clone(),
                    plausible: route.plausible.clone(),
                },
            );
        }
        table
    }
}

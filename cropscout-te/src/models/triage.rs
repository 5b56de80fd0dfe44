//! Triage classification and analyzer routing

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Probable root cause assigned by the classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    PestPressure,
    Disease,
    WaterStress,
    NutrientDeficit,
    /// Classifier could not assign a cause with usable confidence
    Unknown,
}

impl Classification {
    /// The classifiable (non-unknown) causes, in routing-table order
    pub const CAUSES: [Classification; 4] = [
        Classification::PestPressure,
        Classification::Disease,
        Classification::WaterStress,
        Classification::NutrientDeficit,
    ];

    /// Database and wire representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::PestPressure => "pest_pressure",
            Classification::Disease => "disease",
            Classification::WaterStress => "water_stress",
            Classification::NutrientDeficit => "nutrient_deficit",
            Classification::Unknown => "unknown",
        }
    }

    /// Parse a classifier label, falling back to Unknown
    ///
    /// Classifier output is free text; anything unrecognized is treated
    /// as unknown rather than rejected.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "pest_pressure" | "pest pressure" | "pest" => Classification::PestPressure,
            "disease" | "pathogen" => Classification::Disease,
            "water_stress" | "water stress" | "drought" => Classification::WaterStress,
            "nutrient_deficit" | "nutrient deficit" | "nutrient" => {
                Classification::NutrientDeficit
            }
            _ => Classification::Unknown,
        }
    }
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Analyzer set for one classification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteSet {
    /// Best-matching analyzer, used alone at high confidence
    pub primary: String,
    /// Additional analyzers consulted at medium confidence
    #[serde(default)]
    pub plausible: Vec<String>,
}

/// Static classification → analyzer lookup table
///
/// Compiled defaults, overridable per classification from the config
/// file. New analyzer types are added by extending the table, not by
/// changing routing logic. Unknown always routes to every configured
/// analyzer and is not overridable.
#[derive(Debug, Clone)]
pub struct RoutingTable {
    routes: HashMap<Classification, RouteSet>,
    analyzers: Vec<String>,
}

impl Default for RoutingTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl RoutingTable {
    /// Compiled default routes
    pub fn builtin() -> Self {
        let mut table = Self {
            routes: HashMap::new(),
            analyzers: Vec::new(),
        };
        table.routes.insert(
            Classification::PestPressure,
            RouteSet {
                primary: "pest".to_string(),
                plausible: vec!["pathology".to_string()],
            },
        );
        table.routes.insert(
            Classification::Disease,
            RouteSet {
                primary: "pathology".to_string(),
                plausible: vec!["pest".to_string()],
            },
        );
        table.routes.insert(
            Classification::WaterStress,
            RouteSet {
                primary: "irrigation".to_string(),
                plausible: vec!["nutrition".to_string()],
            },
        );
        table.routes.insert(
            Classification::NutrientDeficit,
            RouteSet {
                primary: "nutrition".to_string(),
                plausible: vec!["irrigation".to_string()],
            },
        );
        table.rebuild_analyzers();
        table
    }

    /// Replace the route set for one classification
    pub fn set_route(&mut self, classification: Classification, route: RouteSet) {
        if classification == Classification::Unknown {
            return;
        }
        self.routes.insert(classification, route);
        self.rebuild_analyzers();
    }

    /// Best-matching analyzer for a classification, if one is routed
    pub fn primary_for(&self, classification: Classification) -> Option<&str> {
        self.routes
            .get(&classification)
            .map(|r| r.primary.as_str())
    }

    /// All analyzers plausible for a classification, primary first
    ///
    /// Unknown yields every configured analyzer.
    pub fn plausible_for(&self, classification: Classification) -> Vec<String> {
        match self.routes.get(&classification) {
            Some(route) => {
                let mut set = vec![route.primary.clone()];
                for analyzer in &route.plausible {
                    if !set.contains(analyzer) {
                        set.push(analyzer.clone());
                    }
                }
                set
            }
            None => self.analyzers.clone(),
        }
    }

    /// Every analyzer named anywhere in the table, in table order
    pub fn all_analyzers(&self) -> &[String] {
        &self.analyzers
    }

    fn rebuild_analyzers(&mut self) {
        let mut analyzers = Vec::new();
        for classification in Classification::CAUSES {
            if let Some(route) = self.routes.get(&classification) {
                if !analyzers.contains(&route.primary) {
                    analyzers.push(route.primary.clone());
                }
                for analyzer in &route.plausible {
                    if !analyzers.contains(analyzer) {
                        analyzers.push(analyzer.clone());
                    }
                }
            }
        }
        self.analyzers = analyzers;
    }
}

/// Output of classification for one window, immutable once created
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriageDecision {
    /// Window the decision applies to
    pub window_id: Uuid,

    /// Classified probable cause
    pub classification: Classification,

    /// Classifier confidence in [0, 1]
    pub confidence: f64,

    /// Analyzer identifiers to invoke, in priority order
    pub routed_to: Vec<String>,

    /// Whether the window needs human review
    pub flagged_for_review: bool,

    /// When the decision was made
    pub decided_at: DateTime<Utc>,
}

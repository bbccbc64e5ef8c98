//! Scenario definitions: checkpoint months and time-indexed intervention and
//! survey events. Scenarios are built once from configuration and shared
//! read-only across replicates.

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::{ConfigError, Result};

/// Diagnostic used when measuring prevalence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Diagnostic {
    /// Microfilarial blood-slide count.
    Mf,
    /// Immunochromatographic antigen test.
    Ict,
}

/// Drug regimen delivered by an MDA round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DrugType {
    /// Diethylcarbamazine + albendazole.
    #[default]
    Da,
    /// Ivermectin + albendazole.
    Ia,
    /// Triple therapy (ivermectin + diethylcarbamazine + albendazole).
    Ida,
}

impl DrugType {
    pub fn label(&self) -> &'static str {
        match self {
            DrugType::Da => "da",
            DrugType::Ia => "ia",
            DrugType::Ida => "ida",
        }
    }

    /// Fraction of microfilariae cleared in a treated host.
    pub fn mf_kill(&self) -> f64 {
        match self {
            DrugType::Da => 0.95,
            DrugType::Ia => 0.99,
            DrugType::Ida => 1.0,
        }
    }
}

/// A scheduled mass drug administration round.
#[derive(Debug, Clone, Deserialize)]
pub struct MdaEvent {
    pub month: i32,
    pub coverage: f64,
    /// Systematic-compliance correlation between rounds.
    #[serde(default)]
    pub compliance: f64,
    #[serde(default)]
    pub drug: DrugType,
    #[serde(default)]
    pub min_age: i32,
    #[serde(default = "default_event_max_age")]
    pub max_age: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BedNetEvent {
    pub month: i32,
    pub coverage: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PrevalenceEvent {
    pub month: i32,
    #[serde(default)]
    pub min_age: i32,
    #[serde(default = "default_event_max_age")]
    pub max_age: i32,
    #[serde(default = "default_diagnostic")]
    pub method: Diagnostic,
}

impl PrevalenceEvent {
    /// Query used for baseline output when no scheduled event applies.
    pub fn baseline(min_age: i32, method: Diagnostic) -> PrevalenceEvent {
        PrevalenceEvent {
            month: -1,
            min_age,
            max_age: default_event_max_age(),
            method,
        }
    }
}

/// Externally-specified importation-rate update.
#[derive(Debug, Clone, Deserialize)]
pub struct ImportationEvent {
    pub month: i32,
    pub rate: f64,
}

fn default_event_max_age() -> i32 {
    100
}

fn default_diagnostic() -> Diagnostic {
    Diagnostic::Mf
}

/// One scenario segment: a named branch of history with its own event streams
/// and an ordered list of months at which state is checkpointed.
#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    pub name: String,
    #[serde(default)]
    pub start_month: i32,
    pub months_to_save: Vec<i32>,
    #[serde(default)]
    pub mda_events: Vec<MdaEvent>,
    #[serde(default)]
    pub bed_net_events: Vec<BedNetEvent>,
    #[serde(default)]
    pub prevalence_events: Vec<PrevalenceEvent>,
    #[serde(default)]
    pub importation_events: Vec<ImportationEvent>,
}

impl Scenario {
    pub fn num_months_to_save(&self) -> usize {
        self.months_to_save.len()
    }

    pub fn month_to_save(&self, y: usize) -> i32 {
        self.months_to_save[y]
    }

    pub fn treatment_due(&self, month: i32) -> Option<&MdaEvent> {
        self.mda_events.iter().find(|e| e.month == month)
    }

    pub fn prevalence_due(&self, month: i32) -> Option<&PrevalenceEvent> {
        self.prevalence_events.iter().find(|e| e.month == month)
    }

    pub fn bed_net_due(&self, month: i32) -> Option<&BedNetEvent> {
        self.bed_net_events.iter().find(|e| e.month == month)
    }

    pub fn importation_due(&self, month: i32) -> Option<&ImportationEvent> {
        self.importation_events.iter().find(|e| e.month == month)
    }

    fn validate(&self) -> Result<()> {
        if self.months_to_save.is_empty() {
            return Err(ConfigError::Scenario {
                name: self.name.clone(),
                message: "no months to save".to_string(),
            });
        }
        if !self.months_to_save.windows(2).all(|w| w[0] < w[1]) {
            return Err(ConfigError::Scenario {
                name: self.name.clone(),
                message: "months to save must be strictly increasing".to_string(),
            });
        }
        if self.start_month > self.months_to_save[0] {
            return Err(ConfigError::Scenario {
                name: self.name.clone(),
                message: "start month is after the first month to save".to_string(),
            });
        }
        Ok(())
    }
}

/// The full ordered scenario set for a run.
#[derive(Debug, Clone, Deserialize)]
pub struct ScenarioList {
    pub name: String,
    #[serde(default = "default_base_year")]
    pub base_year: i32,
    pub scenarios: Vec<Scenario>,
    /// Default minimum age when emitting the burn-in baseline prevalence.
    #[serde(default)]
    pub extra_min_age: i32,
    #[serde(default = "default_event_max_age")]
    pub extra_max_age: i32,
}

fn default_base_year() -> i32 {
    2000
}

impl ScenarioList {
    pub fn from_json_file(path: &Path) -> Result<ScenarioList> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let list: ScenarioList =
            serde_json::from_str(&text).map_err(|e| ConfigError::Parse {
                path: path.to_path_buf(),
                line: e.line(),
                what: "scenario list",
                value: e.to_string(),
            })?;
        for sc in &list.scenarios {
            sc.validate()?;
        }
        Ok(list)
    }

    pub fn num_scenarios(&self) -> usize {
        self.scenarios.len()
    }
}

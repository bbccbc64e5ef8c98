//! Model-level configuration: population demography, diagnostics, survey
//! policy and coverage-restoration policy. Loaded from a JSON document; every
//! field has a default so a minimal file only overrides what it needs.

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::{ConfigError, Result};
use crate::survey::NEVER;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelParams {
    /// Maximum host age in years.
    pub max_age: i32,
    /// Host life expectancy in years.
    pub tau: f64,
    /// Minimum age (years) for the default prevalence output.
    pub min_age_prev: i32,
    /// Individuals sampled by pre-TAS and TAS surveys.
    pub sample_size: usize,
    /// Microfilarial prevalence below which a pre-TAS survey passes, and
    /// below which the very first MDA round may be skipped.
    pub mf_threshold: f64,
    /// Antigen-positive fraction below which a TAS survey passes.
    pub ict_threshold: f64,
    /// Months between successive surveys after a failure or partial pass.
    pub inter_survey_period: i32,
    /// MDA rounds delivered before the first pre-TAS survey is scheduled.
    pub first_tas_num_mda: u32,
    /// Earliest month at which surveys may start.
    pub survey_start_date: i32,
    /// Skip the first round when sampled mf prevalence is already below the
    /// threshold.
    pub no_mda_low_mf: bool,
    /// Refresh the aggregation parameter and vector-to-host ratio from the
    /// drawn calibration series at every 12-month boundary.
    pub update_params: bool,

    pub never_treat_fraction: f64,
    pub never_treat_changed_fraction: f64,
    pub never_treat_change_time: i32,
    pub never_treat_change_scenarios: Vec<String>,

    pub ict_sensitivity: f64,
    pub ict_specificity: f64,
    pub ict_sensitivity_changed: f64,
    pub ict_specificity_changed: f64,
    pub ict_test_change_time: i32,
    pub sens_spec_change_scenarios: Vec<String>,

    /// Month from which the simulation's own prevalence-driven importation
    /// reduction applies instead of the externally-scheduled one.
    pub switch_importation_reducing_method_time: i32,

    pub remove_coverage_reduction: bool,
    pub remove_coverage_reduction_time: i32,
    pub gradually_remove_coverage_reduction: bool,

    /// Shape parameters for worm-burden-driven sequela risk.
    pub lymphoedema_shape: f64,
    pub lymphoedema_total_worms: u32,
    pub hydrocele_shape: f64,
    pub hydrocele_total_worms: u32,

    /// Exposure reduction for a host covered by a bed net.
    pub bed_net_efficacy: f64,
    /// Per-month exposure scaling applied to the vector biting density.
    pub bite_rate: f64,
    /// Mean adult worm burden seeded per host before burn-in.
    pub init_worms: f64,
}

impl Default for ModelParams {
    fn default() -> ModelParams {
        ModelParams {
            max_age: 100,
            tau: 50.0,
            min_age_prev: 5,
            sample_size: 250,
            mf_threshold: 0.01,
            ict_threshold: 0.02,
            inter_survey_period: 12,
            first_tas_num_mda: 5,
            survey_start_date: 144,
            no_mda_low_mf: false,
            update_params: false,
            never_treat_fraction: 0.0,
            never_treat_changed_fraction: 0.0,
            never_treat_change_time: NEVER,
            never_treat_change_scenarios: Vec::new(),
            ict_sensitivity: 0.97,
            ict_specificity: 0.99,
            ict_sensitivity_changed: 0.97,
            ict_specificity_changed: 0.99,
            ict_test_change_time: NEVER,
            sens_spec_change_scenarios: Vec::new(),
            switch_importation_reducing_method_time: NEVER,
            remove_coverage_reduction: false,
            remove_coverage_reduction_time: 0,
            gradually_remove_coverage_reduction: false,
            lymphoedema_shape: 0.015,
            lymphoedema_total_worms: 200,
            hydrocele_shape: 0.01,
            hydrocele_total_worms: 200,
            bed_net_efficacy: 0.41,
            bite_rate: 0.15,
            init_worms: 4.0,
        }
    }
}

impl ModelParams {
    pub fn from_json_file(path: &Path) -> Result<ModelParams> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            line: e.line(),
            what: "model parameters",
            value: e.to_string(),
        })
    }
}

/// Reads the population-size file: one candidate size per line, one of which
/// is drawn per replicate.
pub fn load_population_sizes(path: &Path) -> Result<Vec<usize>> {
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut sizes = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        let tok = match line.split_whitespace().next() {
            Some(tok) => tok,
            None => continue,
        };
        let size = tok.parse::<usize>().map_err(|_| ConfigError::Parse {
            path: path.to_path_buf(),
            line: lineno + 1,
            what: "population size",
            value: tok.to_string(),
        })?;
        sizes.push(size);
    }
    if sizes.is_empty() {
        return Err(ConfigError::TooShort {
            path: path.to_path_buf(),
            needed: 1,
            found: 0,
        });
    }
    Ok(sizes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn minimal_file_overrides_defaults_only() {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(br#"{ "max_age": 80, "sample_size": 100 }"#).unwrap();
        let params = ModelParams::from_json_file(f.path()).unwrap();
        assert_eq!(params.max_age, 80);
        assert_eq!(params.sample_size, 100);
        assert_eq!(params.first_tas_num_mda, 5);
        assert_eq!(params.inter_survey_period, 12);
    }

    #[test]
    fn population_sizes_one_per_line() {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(b"500\n750\n\n1000\n").unwrap();
        let sizes = load_population_sizes(f.path()).unwrap();
        assert_eq!(sizes, vec![500, 750, 1000]);
    }

    #[test]
    fn empty_population_file_is_fatal() {
        let f = NamedTempFile::new().unwrap();
        assert!(load_population_sizes(f.path()).is_err());
    }
}

//! Replicate output: the in-memory month record store consumed by the
//! per-scenario result files, and the yearly endgame/roadmap CSV writers.

use std::fs;
use std::path::Path;

use crate::error::{ConfigError, Result};
use crate::population::{Population, RecordedPrevalence, SurveyOutcome};
use crate::scenario::{PrevalenceEvent, ScenarioList};

/// Summary of one delivered MDA round.
#[derive(Debug, Clone)]
pub struct MdaRecord {
    pub drug: &'static str,
    pub coverage: f64,
    /// Round number within the calendar year, for output labeling.
    pub round: u32,
    pub treated: usize,
}

/// One observation appended by the time-step engine.
#[derive(Debug, Clone)]
pub struct MonthRecord {
    pub month: i32,
    pub query: Option<PrevalenceEvent>,
    pub prevalence: Option<RecordedPrevalence>,
    pub mda: Option<MdaRecord>,
}

/// Per-replicate output state. Cleared at the start of each replicate;
/// records at or past a month are dropped when a scenario rewinds to a
/// shared history prefix.
pub struct Output {
    base_year: i32,
    seed: u64,
    random_names: Vec<String>,
    random_values: Vec<f64>,
    records: Vec<MonthRecord>,
}

impl Output {
    pub fn new(base_year: i32) -> Output {
        Output {
            base_year,
            seed: 0,
            random_names: Vec::new(),
            random_values: Vec::new(),
            records: Vec::new(),
        }
    }

    pub fn base_year(&self) -> i32 {
        self.base_year
    }

    /// Drops the previous replicate's records.
    pub fn initialise(&mut self) {
        self.records.clear();
    }

    pub fn save_seed(&mut self, seed: u64) {
        self.seed = seed;
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Must be called in the same order as the matching
    /// [`Output::save_random_values`] calls.
    pub fn save_random_names(&mut self, names: Vec<String>) {
        self.random_names.extend(names);
    }

    pub fn random_names(&self) -> &[String] {
        &self.random_names
    }

    pub fn clear_random_values(&mut self) {
        self.random_values.clear();
    }

    pub fn save_random_values(&mut self, values: Vec<f64>) {
        self.random_values.extend(values);
    }

    pub fn save_month(
        &mut self,
        month: i32,
        query: Option<PrevalenceEvent>,
        prevalence: Option<RecordedPrevalence>,
        mda: Option<MdaRecord>,
    ) {
        self.records.push(MonthRecord {
            month,
            query,
            prevalence,
            mda,
        });
    }

    /// Deletes all records at or after `month`.
    pub fn reset_to_month(&mut self, month: i32) {
        self.records.retain(|r| r.month < month);
    }

    pub fn records(&self) -> &[MonthRecord] {
        &self.records
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurveyKind {
    PreTas,
    Tas,
}

impl SurveyKind {
    pub fn label(&self) -> &'static str {
        match self {
            SurveyKind::PreTas => "PreTAS survey",
            SurveyKind::Tas => "TAS survey",
        }
    }
}

/// CSV output files for one scenario: yearly age-stratified records, survey
/// records, roadmap-target rows and the per-replicate result table.
pub struct EndgameWriter {
    ihme: Option<csv::Writer<fs::File>>,
    pre_tas: Option<csv::Writer<fs::File>>,
    tas: Option<csv::Writer<fs::File>>,
    survey_by_age: Option<csv::Writer<fs::File>>,
    ntdmc: Option<csv::Writer<fs::File>>,
    results: csv::Writer<fs::File>,
}

fn create_writer(
    out_dir: &Path,
    name: &str,
    headers: &[&str],
) -> Result<csv::Writer<fs::File>> {
    let path = out_dir.join(name);
    let file = fs::File::create(&path).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })?;
    let mut wtr = csv::Writer::from_writer(file);
    wtr.write_record(headers)?;
    Ok(wtr)
}

impl EndgameWriter {
    fn create(
        out_dir: &Path,
        index: i32,
        scenario_name: &str,
        output_endgame: bool,
        output_ntdmc: bool,
        random_names: &[String],
    ) -> Result<EndgameWriter> {
        let file_name = |kind: &str| format!("{scenario_name}_{kind}_{index}.csv");

        let ihme = if output_endgame {
            Some(create_writer(
                out_dir,
                &file_name("ihme"),
                &["rep", "year", "age_start", "age_end", "measure", "value"],
            )?)
        } else {
            None
        };
        let survey_headers = ["rep", "year", "performed", "sampled", "positives", "passed"];
        let pre_tas = if output_endgame {
            Some(create_writer(out_dir, &file_name("pretas"), &survey_headers)?)
        } else {
            None
        };
        let tas = if output_endgame {
            Some(create_writer(out_dir, &file_name("tas"), &survey_headers)?)
        } else {
            None
        };
        let survey_by_age = if output_endgame {
            Some(create_writer(
                out_dir,
                &file_name("surveybyage"),
                &[
                    "rep",
                    "year",
                    "age_start",
                    "age_end",
                    "population",
                    "pre_tas_passed",
                    "tas_passes",
                ],
            )?)
        } else {
            None
        };
        let ntdmc = if output_ntdmc {
            Some(create_writer(
                out_dir,
                &file_name("ntdmc"),
                &["rep", "year", "do_mda", "tas_passes", "needed", "met_target"],
            )?)
        } else {
            None
        };

        let mut result_headers: Vec<String> = vec!["rep".to_string()];
        result_headers.extend(random_names.iter().cloned());
        result_headers.extend(
            ["month", "mf_prev", "ict_prev", "drug", "coverage", "round", "treated"]
                .iter()
                .map(|s| s.to_string()),
        );
        let results = create_writer(
            out_dir,
            &file_name("res"),
            &result_headers.iter().map(String::as_str).collect::<Vec<_>>(),
        )?;

        Ok(EndgameWriter {
            ihme,
            pre_tas,
            tas,
            survey_by_age,
            ntdmc,
            results,
        })
    }

    pub fn write_prev_by_age(&mut self, rep: usize, year: i32, popln: &Population) -> Result<()> {
        if let Some(wtr) = &mut self.ihme {
            for (lo, hi, value) in popln.mf_prevalence_by_age() {
                wtr.write_record([
                    rep.to_string(),
                    year.to_string(),
                    lo.to_string(),
                    hi.to_string(),
                    "mf_prevalence".to_string(),
                    value.to_string(),
                ])?;
            }
        }
        Ok(())
    }

    pub fn write_number_by_age(
        &mut self,
        rep: usize,
        year: i32,
        popln: &Population,
        context: &str,
    ) -> Result<()> {
        if let Some(wtr) = &mut self.ihme {
            for (lo, hi, count) in popln.counts_by_age() {
                wtr.write_record([
                    rep.to_string(),
                    year.to_string(),
                    lo.to_string(),
                    hi.to_string(),
                    format!("population ({context})"),
                    count.to_string(),
                ])?;
            }
        }
        Ok(())
    }

    /// Writes and consumes the new-infection counts accumulated since the
    /// previous yearly emission.
    pub fn write_incidence_by_age(
        &mut self,
        rep: usize,
        year: i32,
        popln: &mut Population,
    ) -> Result<()> {
        if let Some(wtr) = &mut self.ihme {
            for (lo, hi, count) in popln.take_incidence() {
                wtr.write_record([
                    rep.to_string(),
                    year.to_string(),
                    lo.to_string(),
                    hi.to_string(),
                    "incidence".to_string(),
                    count.to_string(),
                ])?;
            }
        }
        Ok(())
    }

    /// Yearly snapshot of the survey machine against the age structure: one
    /// row per age bin carrying the current pre-TAS pass flag and the
    /// consecutive-TAS-pass count.
    pub fn write_survey_state_by_age(
        &mut self,
        rep: usize,
        year: i32,
        popln: &Population,
        pre_tas_passed: bool,
        tas_passes: u32,
    ) -> Result<()> {
        if let Some(wtr) = &mut self.survey_by_age {
            for (lo, hi, count) in popln.counts_by_age() {
                wtr.write_record([
                    rep.to_string(),
                    year.to_string(),
                    lo.to_string(),
                    hi.to_string(),
                    count.to_string(),
                    pre_tas_passed.to_string(),
                    tas_passes.to_string(),
                ])?;
            }
        }
        Ok(())
    }

    pub fn write_sequelae_by_age(
        &mut self,
        rep: usize,
        year: i32,
        popln: &Population,
    ) -> Result<()> {
        if let Some(wtr) = &mut self.ihme {
            for (lo, hi, lymph, hydro) in popln.sequelae_by_age() {
                wtr.write_record([
                    rep.to_string(),
                    year.to_string(),
                    lo.to_string(),
                    hi.to_string(),
                    "lymphoedema".to_string(),
                    lymph.to_string(),
                ])?;
                wtr.write_record([
                    rep.to_string(),
                    year.to_string(),
                    lo.to_string(),
                    hi.to_string(),
                    "hydrocele".to_string(),
                    hydro.to_string(),
                ])?;
            }
        }
        Ok(())
    }

    /// Writes one survey row. `None` records that no survey of this kind
    /// occurred this year, keeping row counts identical across replicates.
    pub fn write_survey(
        &mut self,
        kind: SurveyKind,
        rep: usize,
        year: i32,
        outcome: Option<SurveyOutcome>,
    ) -> Result<()> {
        let wtr = match kind {
            SurveyKind::PreTas => &mut self.pre_tas,
            SurveyKind::Tas => &mut self.tas,
        };
        if let Some(wtr) = wtr {
            match outcome {
                Some(o) => wtr.write_record([
                    rep.to_string(),
                    year.to_string(),
                    "true".to_string(),
                    o.sampled.to_string(),
                    o.positives.to_string(),
                    o.passed.to_string(),
                ])?,
                None => wtr.write_record([
                    rep.to_string(),
                    year.to_string(),
                    "false".to_string(),
                    "0".to_string(),
                    "0".to_string(),
                    "false".to_string(),
                ])?,
            }
        }
        Ok(())
    }

    pub fn write_roadmap_target(
        &mut self,
        rep: usize,
        year: i32,
        do_mda: bool,
        tas_passes: u32,
        needed: u32,
    ) -> Result<()> {
        if let Some(wtr) = &mut self.ntdmc {
            wtr.write_record([
                rep.to_string(),
                year.to_string(),
                do_mda.to_string(),
                tas_passes.to_string(),
                needed.to_string(),
                (tas_passes >= needed).to_string(),
            ])?;
        }
        Ok(())
    }

    /// Appends this replicate's recorded observations to the scenario's
    /// result file: one row per record, prefixed with the replicate's seed
    /// and calibration draws.
    pub fn write_results(&mut self, rep: usize, output: &Output) -> Result<()> {
        for record in output.records() {
            let mut row: Vec<String> = vec![rep.to_string()];
            row.push(output.seed().to_string());
            row.extend(output.random_values.iter().map(|v| v.to_string()));
            row.push(record.month.to_string());
            match &record.prevalence {
                Some(p) => {
                    row.push(p.mf.to_string());
                    row.push(p.ict.to_string());
                }
                None => {
                    row.push(String::new());
                    row.push(String::new());
                }
            }
            match &record.mda {
                Some(m) => {
                    row.push(m.drug.to_string());
                    row.push(m.coverage.to_string());
                    row.push(m.round.to_string());
                    row.push(m.treated.to_string());
                }
                None => {
                    row.extend([String::new(), String::new(), String::new(), String::new()]);
                }
            }
            self.results.write_record(&row)?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        for wtr in [
            &mut self.ihme,
            &mut self.pre_tas,
            &mut self.tas,
            &mut self.survey_by_age,
            &mut self.ntdmc,
        ]
        .into_iter()
        .flatten()
        {
            wtr.flush().map_err(csv::Error::from)?;
        }
        self.results.flush().map_err(csv::Error::from)?;
        Ok(())
    }
}

/// One [`EndgameWriter`] per scenario, opened up front with headers so the
/// files exist even for runs that end early.
pub struct ScenarioWriters {
    writers: Vec<EndgameWriter>,
}

impl ScenarioWriters {
    pub fn create(
        out_dir: &Path,
        index: i32,
        scenarios: &ScenarioList,
        output_endgame: bool,
        output_ntdmc: bool,
        random_names: &[String],
    ) -> Result<ScenarioWriters> {
        fs::create_dir_all(out_dir).map_err(|source| ConfigError::Io {
            path: out_dir.to_path_buf(),
            source,
        })?;
        let writers = scenarios
            .scenarios
            .iter()
            .map(|sc| {
                EndgameWriter::create(
                    out_dir,
                    index,
                    &sc.name,
                    output_endgame,
                    output_ntdmc,
                    random_names,
                )
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(ScenarioWriters { writers })
    }

    pub fn scenario_mut(&mut self, i: usize) -> &mut EndgameWriter {
        &mut self.writers[i]
    }

    pub fn finish(&mut self) -> Result<()> {
        for wtr in &mut self.writers {
            wtr.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::Diagnostic;

    #[test]
    fn reset_to_month_drops_only_later_records() {
        let mut output = Output::new(2000);
        for month in [0, 12, 24, 36] {
            output.save_month(
                month,
                Some(PrevalenceEvent::baseline(0, Diagnostic::Mf)),
                Some(RecordedPrevalence::default()),
                None,
            );
        }
        output.reset_to_month(24);
        let months: Vec<i32> = output.records().iter().map(|r| r.month).collect();
        assert_eq!(months, vec![0, 12]);
    }

    #[test]
    fn initialise_clears_records_but_keeps_names() {
        let mut output = Output::new(2000);
        output.save_random_names(vec!["seed".to_string(), "k".to_string()]);
        output.save_month(0, None, None, None);
        output.initialise();
        assert!(output.records().is_empty());
        assert_eq!(output.random_names().len(), 2);
    }
}

//! The simulation driver: replicate orchestration, burn-in, and the
//! month-granular time-step engine that applies interventions, runs surveys
//! and records observations.

use std::io::Write;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::{SeedableRng, rngs::StdRng};
use tracing::debug;

use crate::draws::{DrawSource, ReplicateDraw};
use crate::error::Result;
use crate::output::{EndgameWriter, MdaRecord, Output, ScenarioWriters, SurveyKind};
use crate::population::Population;
use crate::scenario::{Diagnostic, MdaEvent, PrevalenceEvent, Scenario, ScenarioList};
use crate::survey::{NEEDED_TAS_PASSES, SurveyState};
use crate::vectors::VectorPop;
use crate::worms::Worm;

/// Run-level switches, mirroring the command line.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub replicates: usize,
    /// Label appended to output file names.
    pub index: i32,
    pub output_endgame: bool,
    /// Calendar year from which yearly endgame records are emitted.
    pub output_endgame_date: i32,
    pub output_ntdmc: bool,
    pub output_ntdmc_date: i32,
    /// Reduce the importation rate from the scenario's schedule rather than
    /// from observed prevalence decline, until the configured switch time.
    pub reduce_imp_via_xml: bool,
    pub out_dir: PathBuf,
}

impl Default for RunSettings {
    fn default() -> RunSettings {
        RunSettings {
            replicates: 1000,
            index: 0,
            output_endgame: true,
            output_endgame_date: 2000,
            output_ntdmc: true,
            output_ntdmc_date: 2000,
            reduce_imp_via_xml: false,
            out_dir: PathBuf::from("./"),
        }
    }
}

/// Phased-restoration policy for intervention coverage after a historical
/// disruption.
#[derive(Debug, Clone, Copy)]
pub struct CoveragePolicy {
    pub remove_reduction: bool,
    pub removal_time: i32,
    pub gradual: bool,
}

/// Multiplier applied to declared MDA coverage at month `t`.
pub fn multiplier_for_coverage(t: i32, cov_prop: f64, policy: CoveragePolicy) -> f64 {
    if policy.gradual {
        if t < policy.removal_time {
            (1.0 - cov_prop) * (f64::from(t) / f64::from(policy.removal_time)) + cov_prop
        } else {
            1.0
        }
    } else if policy.remove_reduction {
        if t < policy.removal_time { cov_prop } else { 1.0 }
    } else {
        cov_prop
    }
}

/// Whether the simulation's own prevalence-driven importation reduction
/// applies at month `t`, as opposed to the scenario's external schedule.
pub fn should_reduce_importation_via_prevalence(
    reduce_imp_via_xml: bool,
    t: i32,
    switch_time: i32,
) -> bool {
    !reduce_imp_via_xml || t >= switch_time
}

/// Number of unperturbed steps run before scenarios start. At least one full
/// host lifetime, to avoid age-distribution bias in the baseline.
pub fn burn_in_steps(max_age: i32, dt: f64) -> usize {
    (12.0 * f64::from(max_age.max(100)) / dt) as usize
}

/// Treatment-probability and round bookkeeping for one replicate.
#[derive(Debug, Clone)]
struct MdaState {
    /// Effective coverage of the previous round; negative until the first
    /// round initializes per-host treatment probabilities.
    prev_cov: f64,
    prev_rho: f64,
    tot_rounds: u32,
    previous_year: Option<i32>,
    round_in_year: u32,
}

impl MdaState {
    fn new() -> MdaState {
        MdaState {
            prev_cov: -1.0,
            prev_rho: -1.0,
            tot_rounds: 0,
            previous_year: None,
            round_in_year: 1,
        }
    }
}

/// Pending prevalence-driven importation adjustment, evaluated six months
/// after an applied round.
#[derive(Debug, Clone, Default)]
struct ImportationState {
    due_month: Option<i32>,
    mf_prev_before: f64,
}

/// All mutable per-replicate driver state. Persists across scenario segments
/// within a replicate; rebuilt at the start of the next.
#[derive(Debug, Clone)]
struct ReplicateState {
    survey: SurveyState,
    mda: MdaState,
    importation: ImportationState,
    done_pre_tas: bool,
    done_tas: bool,
}

impl ReplicateState {
    fn new() -> ReplicateState {
        ReplicateState {
            survey: SurveyState::new(),
            mda: MdaState::new(),
            importation: ImportationState::default(),
            done_pre_tas: false,
            done_tas: false,
        }
    }
}

/// Per-scenario policy-switch flags resolved from the configured scenario
/// name lists.
#[derive(Debug, Clone, Copy)]
struct ScenarioFlags {
    change_sens_spec: bool,
    change_never_treat: bool,
}

/// Months that must elapse after an applied round before the pre/post
/// prevalence comparison that rescales the importation amplitude.
const IMPORTATION_ADJUST_DELAY: i32 = 6;

pub struct Model {
    current_month: i32,
    dt: f64,
}

impl Model {
    /// `dt` is the time step in months; it is owned here alone.
    pub fn new(dt: f64) -> Model {
        Model {
            current_month: 0,
            dt,
        }
    }

    pub fn current_month(&self) -> i32 {
        self.current_month
    }

    /// Runs every replicate: draw parameters and seed, reset state, burn in,
    /// then run each scenario segment in declared order, emitting results
    /// after each segment. Undersized input files fail before replicate 0.
    pub fn run_scenarios(
        &mut self,
        scenarios: &ScenarioList,
        popln: &mut Population,
        vectors: &mut VectorPop,
        worms: &mut Worm,
        draws: &DrawSource,
        settings: &RunSettings,
    ) -> Result<()> {
        println!(
            "Index {} running {} with {} scenarios",
            settings.index,
            scenarios.name,
            scenarios.num_scenarios()
        );
        print!("Progress: {:3}%", 0);
        std::io::stdout().flush().ok();

        let mut output = Output::new(scenarios.base_year);
        output.save_random_names(vec!["seed".to_string()]);
        output.save_random_names(popln.random_variable_names());
        output.save_random_names(vectors.random_variable_names());
        output.save_random_names(worms.random_variable_names());

        let mut writers = ScenarioWriters::create(
            &settings.out_dir,
            settings.index,
            scenarios,
            settings.output_endgame,
            settings.output_ntdmc,
            output.random_names(),
        )?;

        // Reporting start dates, as months relative to the base year.
        let endgame_start = (settings.output_endgame_date - scenarios.base_year) * 12;
        let ntdmc_start = (settings.output_ntdmc_date - scenarios.base_year) * 12;

        for rep in 0..settings.replicates {
            let draw = draws.draw(rep);
            let seed = draw.seed.unwrap_or_else(time_seed);
            let mut rng = StdRng::seed_from_u64(seed);

            self.current_month = 0;
            popln.clear_saved_months();
            vectors.clear_saved_months();
            output.initialise();

            let first = draw.series[0];
            popln.init_hosts(first.k, first.a_imp, worms, &mut rng);
            vectors.reset(first.v_to_h);
            worms.reset(first.w_prop_mda);

            // Must be saved in the same order the names were registered.
            output.clear_random_values();
            output.save_seed(seed);
            output.save_random_values(popln.random_variable_values());
            output.save_random_values(vectors.random_variable_values());
            output.save_random_values(worms.random_variable_values());

            let baseline = PrevalenceEvent {
                month: -1,
                min_age: popln.params().min_age_prev.max(scenarios.extra_min_age),
                max_age: scenarios.extra_max_age,
                method: Diagnostic::Mf,
            };
            self.burn_in(popln, vectors, worms, &mut output, &baseline, &mut rng);

            let mut state = ReplicateState::new();
            state.importation.mf_prev_before = popln.mf_prevalence(popln.size(), &mut rng);

            for (i, sc) in scenarios.scenarios.iter().enumerate() {
                debug!(scenario = %sc.name, start = sc.start_month, "scenario starts");

                if sc.start_month != self.current_month {
                    // Rewind to the shared history prefix and branch.
                    self.current_month = sc.start_month;
                    popln.reset_to_month(self.current_month);
                    vectors.reset_to_month(self.current_month);
                    output.reset_to_month(self.current_month);
                }

                let flags = ScenarioFlags {
                    change_sens_spec: popln
                        .params()
                        .sens_spec_change_scenarios
                        .iter()
                        .any(|n| n == &sc.name),
                    change_never_treat: popln
                        .params()
                        .never_treat_change_scenarios
                        .iter()
                        .any(|n| n == &sc.name),
                };

                for y in 0..sc.num_months_to_save() {
                    self.evolve_and_save(
                        y,
                        popln,
                        vectors,
                        worms,
                        sc,
                        &mut output,
                        writers.scenario_mut(i),
                        rep,
                        &draw,
                        &mut state,
                        flags,
                        settings,
                        endgame_start,
                        ntdmc_start,
                        &mut rng,
                    )?;
                }

                writers.scenario_mut(i).write_results(rep, &output)?;
            }

            print!("\rProgress: {:3}%", rep * 100 / settings.replicates);
            std::io::stdout().flush().ok();
        }

        println!("\rProgress: 100%");
        writers.finish()
    }

    /// Advances the freshly initialized population to its pre-intervention
    /// steady state, then records the converged state as the month-zero
    /// checkpoint and emits the baseline prevalence as the first observation.
    fn burn_in(
        &mut self,
        popln: &mut Population,
        vectors: &mut VectorPop,
        worms: &Worm,
        output: &mut Output,
        baseline: &PrevalenceEvent,
        rng: &mut StdRng,
    ) {
        for _ in 0..burn_in_steps(popln.max_age(), self.dt) {
            popln.evolve(self.dt, vectors, worms, rng);
            vectors.update_l3_density(popln, worms);
        }

        // Infections acquired while converging are not incidence; the first
        // yearly emission starts from a clean counter.
        popln.take_incidence();
        popln.save_state(0, "burn-in");
        vectors.save_state(0);

        let prevalence = popln.get_prevalence(baseline);
        output.save_month(-1, Some(baseline.clone()), Some(prevalence), None);
    }

    /// Advances from the replicate's current month to the segment's next
    /// save month in `dt`-sized steps, applying due interventions, running
    /// due surveys and emitting scheduled records along the way.
    #[allow(clippy::too_many_arguments)]
    fn evolve_and_save(
        &mut self,
        y: usize,
        popln: &mut Population,
        vectors: &mut VectorPop,
        worms: &Worm,
        sc: &Scenario,
        output: &mut Output,
        writer: &mut EndgameWriter,
        rep: usize,
        draw: &ReplicateDraw<'_>,
        state: &mut ReplicateState,
        flags: ScenarioFlags,
        settings: &RunSettings,
        endgame_start: i32,
        ntdmc_start: i32,
        rng: &mut StdRng,
    ) -> Result<()> {
        let target_month = sc.month_to_save(y);
        let base_year = output.base_year();
        let steps = (f64::from(target_month - self.current_month) / self.dt).round() as usize;

        for step in 0..steps {
            let time = f64::from(self.current_month) + step as f64 * self.dt;
            let month = exact_month(time);

            if let Some(t) = month {
                if popln.params().update_params && t % 12 == 0 {
                    let idx = (t / 12) as usize;
                    if idx < draw.series.len() {
                        popln.update_k(draw.series[idx].k);
                        vectors.update_v_to_h(draw.series[idx].v_to_h);
                    }
                }

                // Yearly records are emitted on schedule regardless of which
                // dynamic branches fire below.
                if t % 12 == 0 && settings.output_endgame && t >= endgame_start {
                    let year = t / 12 + base_year;
                    writer.write_prev_by_age(rep, year, popln)?;
                    writer.write_number_by_age(rep, year, popln, "not survey")?;
                    writer.write_incidence_by_age(rep, year, popln)?;
                    writer.write_sequelae_by_age(rep, year, popln)?;
                    writer.write_survey_state_by_age(
                        rep,
                        year,
                        popln,
                        state.survey.pre_tas_pass,
                        state.survey.tas_pass,
                    )?;
                }
                if t % 12 == 0 && settings.output_ntdmc && t >= ntdmc_start {
                    writer.write_roadmap_target(
                        rep,
                        t / 12 + base_year,
                        state.survey.do_mda,
                        state.survey.tas_pass,
                        NEEDED_TAS_PASSES,
                    )?;
                }

                // A year with no survey still emits an explicit empty record
                // so every replicate's output has the same number of rows.
                if (t + 1) % 12 == 0 && settings.output_endgame && t >= endgame_start {
                    let year = (t + 1) / 12 + base_year - 1;
                    if !state.done_pre_tas {
                        writer.write_survey(SurveyKind::PreTas, rep, year, None)?;
                        writer.write_number_by_age(rep, year, popln, "PreTAS survey")?;
                    }
                    state.done_pre_tas = false;
                    if !state.done_tas {
                        writer.write_survey(SurveyKind::Tas, rep, year, None)?;
                        writer.write_number_by_age(rep, year, popln, "TAS survey")?;
                    }
                    state.done_tas = false;
                }

                // Externally scheduled importation reduction applies until
                // the switch to the prevalence-driven method.
                if !should_reduce_importation_via_prevalence(
                    settings.reduce_imp_via_xml,
                    t,
                    popln.params().switch_importation_reducing_method_time,
                ) && t % 12 == 0
                {
                    if let Some(ev) = sc.importation_due(t) {
                        popln.set_importation_rate(ev.rate);
                    }
                }

                if let Some(ev) = sc.bed_net_due(t) {
                    popln.update_bed_net_coverage(ev.coverage);
                }
            }

            popln.evolve(self.dt, vectors, worms, rng);
            vectors.update_l3_density(popln, worms);

            let Some(t) = month else { continue };

            let query = sc.prevalence_due(t).cloned();
            let prevalence = query.as_ref().map(|q| popln.get_prevalence(q));

            if state.survey.pre_tas_due(t) {
                let outcome = popln.pre_tas_survey(rng);
                state
                    .survey
                    .record_pre_tas(t, outcome.passed, popln.params().inter_survey_period);
                state.done_pre_tas = true;
                if settings.output_endgame && t >= endgame_start {
                    let year = t / 12 + base_year;
                    writer.write_survey(SurveyKind::PreTas, rep, year, Some(outcome))?;
                    writer.write_number_by_age(rep, year, popln, "PreTAS survey")?;
                }
            }

            if state.survey.tas_due(t) {
                let outcome = popln.tas_survey(rng);
                state
                    .survey
                    .record_tas(t, outcome.passed, popln.params().inter_survey_period);
                state.done_tas = true;
                if settings.output_endgame && t >= endgame_start {
                    let year = t / 12 + base_year;
                    writer.write_survey(SurveyKind::Tas, rep, year, Some(outcome))?;
                    writer.write_number_by_age(rep, year, popln, "TAS survey")?;
                }
            }

            let mda_record = match sc.treatment_due(t) {
                Some(event) => {
                    let record = self.apply_mda_round(
                        event,
                        t,
                        base_year,
                        draw.cov_prop,
                        popln,
                        worms,
                        state,
                        rng,
                    );
                    Some(record)
                }
                None => None,
            };

            // Six months after an applied round, scale the importation
            // amplitude by the observed prevalence decline.
            if should_reduce_importation_via_prevalence(
                settings.reduce_imp_via_xml,
                t,
                popln.params().switch_importation_reducing_method_time,
            ) && state.importation.due_month == Some(t)
            {
                let after = popln.mf_prevalence(popln.size(), rng);
                let before = state.importation.mf_prev_before;
                if before > after {
                    popln.scale_importation_rate(after / before);
                }
                state.importation.mf_prev_before = popln.mf_prevalence(popln.size(), rng);
                state.importation.due_month = None;
            }

            if t < popln.params().never_treat_change_time {
                popln.never_treat_to_original();
            } else if flags.change_never_treat {
                popln.change_never_treat();
            }

            if t < popln.params().ict_test_change_time {
                popln.ict_test_to_original();
            } else if flags.change_sens_spec {
                popln.change_ict_test();
            }

            if query.is_some() || mda_record.is_some() {
                output.save_month(t, query, prevalence, mda_record);
            }
        }

        popln.never_treat_to_original();
        self.current_month = target_month;

        if y < sc.num_months_to_save() - 1 {
            // Not finished with this scenario: checkpoint so a sibling
            // scenario can branch from here.
            popln.save_state(self.current_month, &sc.name);
            vectors.save_state(self.current_month);
            debug!(scenario = %sc.name, month = self.current_month, "saving month");
        }
        Ok(())
    }

    /// The MDA application protocol: effective coverage, per-host
    /// treatment-probability upkeep, low-prevalence gating of the first
    /// round, pre-round prevalence capture for the delayed importation
    /// adjustment, and survey scheduling once enough rounds have run.
    #[allow(clippy::too_many_arguments)]
    fn apply_mda_round(
        &self,
        event: &MdaEvent,
        t: i32,
        base_year: i32,
        cov_prop: f64,
        popln: &mut Population,
        worms: &Worm,
        state: &mut ReplicateState,
        rng: &mut StdRng,
    ) -> MdaRecord {
        let params = popln.params();
        let policy = CoveragePolicy {
            remove_reduction: params.remove_coverage_reduction,
            removal_time: params.remove_coverage_reduction_time,
            gradual: params.gradually_remove_coverage_reduction,
        };
        let sample_size = params.sample_size;
        let mf_threshold = params.mf_threshold;
        let no_mda_low_mf = params.no_mda_low_mf;
        let first_tas_num_mda = params.first_tas_num_mda;
        let survey_start_date = params.survey_start_date;

        let cov = event.coverage * multiplier_for_coverage(t, cov_prop, policy);
        let rho = event.compliance;

        if state.mda.prev_cov < 0.0 {
            popln.init_p_treat(cov, rho, rng);
            state.mda.prev_cov = cov;
            state.mda.prev_rho = rho;
        }
        if state.mda.prev_cov != cov || state.mda.prev_rho != rho {
            // Hosts born since the last round carry a zero probability and
            // must be assigned before the rescale.
            popln.check_for_zero_p_treat(state.mda.prev_cov, state.mda.prev_rho, rng);
            popln.edit_p_treat(state.mda.prev_cov, cov, rho, rng);
            state.mda.prev_cov = cov;
            state.mda.prev_rho = rho;
        }
        popln.check_for_zero_p_treat(cov, rho, rng);

        // Before the very first round, a survey-sized sample may show the
        // area is already below threshold, in which case this round treats
        // nobody but still counts for spacing. Only this round is suppressed;
        // the survey machine's gate is left alone.
        let mut do_mda = state.survey.do_mda;
        if do_mda && state.mda.tot_rounds == 0 && no_mda_low_mf {
            let sampled = popln.mf_prevalence(sample_size, rng);
            if sampled <= mf_threshold {
                do_mda = false;
            }
        }

        // Whole-population prevalence before the round, for the delayed
        // importation-rate adjustment.
        state.importation.mf_prev_before = popln.mf_prevalence(popln.size(), rng);

        let year = t / 12 + base_year;
        state.mda.round_in_year = if state.mda.previous_year == Some(year) {
            state.mda.round_in_year + 1
        } else {
            1
        };
        state.mda.previous_year = Some(year);

        let treated = popln.apply_treatment(event, worms, do_mda, rng);
        state.importation.due_month = Some(t + IMPORTATION_ADJUST_DELAY);
        state.mda.tot_rounds += 1;

        if state.mda.tot_rounds == first_tas_num_mda {
            state.survey.schedule_first_pre_tas(t, survey_start_date);
        }

        MdaRecord {
            drug: event.drug.label(),
            coverage: cov,
            round: state.mda.round_in_year,
            treated,
        }
    }
}

/// Returns the integral month at `time`, or `None` mid-month when `dt < 1`.
fn exact_month(time: f64) -> Option<i32> {
    let rounded = time.round();
    ((time - rounded).abs() < 1e-9).then_some(rounded as i32)
}

/// Unpredictable seed for runs without a seed file.
fn time_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::draws::DrawSource;
    use crate::parameters::ModelParams;
    use std::io::Write as _;

    #[test]
    fn gradual_removal_ramps_from_cov_prop_to_one() {
        let policy = CoveragePolicy {
            remove_reduction: false,
            removal_time: 10,
            gradual: true,
        };
        assert_eq!(multiplier_for_coverage(0, 0.5, policy), 0.5);
        assert_eq!(multiplier_for_coverage(5, 0.5, policy), 0.75);
        assert_eq!(multiplier_for_coverage(10, 0.5, policy), 1.0);
        assert_eq!(multiplier_for_coverage(100, 0.5, policy), 1.0);
    }

    #[test]
    fn instant_removal_steps_to_one_at_removal_time() {
        let policy = CoveragePolicy {
            remove_reduction: true,
            removal_time: 10,
            gradual: false,
        };
        assert_eq!(multiplier_for_coverage(5, 0.5, policy), 0.5);
        assert_eq!(multiplier_for_coverage(11, 0.5, policy), 1.0);
    }

    #[test]
    fn no_removal_keeps_cov_prop_forever() {
        let policy = CoveragePolicy {
            remove_reduction: false,
            removal_time: 10,
            gradual: false,
        };
        for t in [0, 5, 10, 500] {
            assert_eq!(multiplier_for_coverage(t, 0.5, policy), 0.5);
        }
    }

    #[test]
    fn burn_in_step_count_formula() {
        assert_eq!(burn_in_steps(50, 1.0), 1200);
        assert_eq!(burn_in_steps(100, 1.0), 1200);
        assert_eq!(burn_in_steps(120, 1.0), 1440);
        assert_eq!(burn_in_steps(100, 0.5), 2400);
        assert_eq!(burn_in_steps(80, 2.0), 600);
    }

    #[test]
    fn importation_method_selection() {
        // Flag off: always the prevalence-driven method.
        assert!(should_reduce_importation_via_prevalence(false, 0, 120));
        // Flag on: external schedule until the switch time.
        assert!(!should_reduce_importation_via_prevalence(true, 119, 120));
        assert!(should_reduce_importation_via_prevalence(true, 120, 120));
    }

    fn setup_with_params(seed: u64, params: ModelParams) -> (Population, VectorPop, Worm, StdRng) {
        let worms = Worm::default();
        let mut rng = StdRng::seed_from_u64(seed);
        let mut popln = Population::new(params, vec![150]);
        popln.init_hosts(0.3, 1.0, &worms, &mut rng);
        let mut vectors = VectorPop::new();
        vectors.reset(10.0);
        (popln, vectors, worms, rng)
    }

    fn test_setup(seed: u64) -> (Population, VectorPop, Worm, StdRng) {
        setup_with_params(
            seed,
            ModelParams {
                max_age: 60,
                sample_size: 50,
                ..ModelParams::default()
            },
        )
    }

    fn baseline() -> PrevalenceEvent {
        PrevalenceEvent {
            month: -1,
            min_age: 5,
            max_age: 100,
            method: Diagnostic::Mf,
        }
    }

    #[test]
    fn burn_in_is_deterministic_for_a_fixed_seed() {
        let run = || {
            let (mut popln, mut vectors, worms, mut rng) = test_setup(42);
            let mut model = Model::new(1.0);
            let mut output = Output::new(2000);
            model.burn_in(
                &mut popln,
                &mut vectors,
                &worms,
                &mut output,
                &baseline(),
                &mut rng,
            );
            (popln.get_prevalence(&baseline()), popln.importation_rate())
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn burn_in_emits_the_baseline_observation() {
        let (mut popln, mut vectors, worms, mut rng) = test_setup(7);
        let mut model = Model::new(1.0);
        let mut output = Output::new(2000);
        model.burn_in(
            &mut popln,
            &mut vectors,
            &worms,
            &mut output,
            &baseline(),
            &mut rng,
        );
        assert_eq!(output.records().len(), 1);
        assert_eq!(output.records()[0].month, -1);
        assert!(output.records()[0].prevalence.is_some());
    }

    fn scenario_list() -> ScenarioList {
        serde_json::from_value(serde_json::json!({
            "name": "test-set",
            "base_year": 2000,
            "scenarios": [{
                "name": "annual-mda",
                "start_month": 0,
                "months_to_save": [12, 24],
                "mda_events": [
                    { "month": 2, "coverage": 0.65, "compliance": 0.2 },
                    { "month": 14, "coverage": 0.65, "compliance": 0.2 }
                ],
                "prevalence_events": [{ "month": 6 }, { "month": 18 }]
            }]
        }))
        .unwrap()
    }

    fn write_draws(dir: &std::path::Path, lines: &[&str]) -> DrawSource {
        let params_path = dir.join("params.txt");
        let mut f = std::fs::File::create(&params_path).unwrap();
        for line in lines {
            writeln!(f, "{line}").unwrap();
        }
        DrawSource::load(&params_path, None, None, lines.len()).unwrap()
    }

    #[test]
    fn replicate_ends_each_segment_at_its_target_month() {
        let dir = tempfile::tempdir().unwrap();
        let draws = write_draws(dir.path(), &["10.0 0.3 1.0 0.55", "9.0 0.25 1.0 0.5"]);
        let scenarios = scenario_list();
        let (mut popln, mut vectors, mut worms, _) = test_setup(1);

        let settings = RunSettings {
            replicates: 2,
            out_dir: dir.path().join("out"),
            ..RunSettings::default()
        };
        let mut model = Model::new(1.0);
        model
            .run_scenarios(
                &scenarios,
                &mut popln,
                &mut vectors,
                &mut worms,
                &draws,
                &settings,
            )
            .unwrap();
        assert_eq!(model.current_month(), 24);
    }

    /// Every replicate must produce the same number of survey rows per year
    /// whether or not any survey actually ran.
    #[test]
    fn survey_record_density_is_identical_across_replicates() {
        let dir = tempfile::tempdir().unwrap();
        let draws = write_draws(dir.path(), &["10.0 0.3 1.0 0.55", "6.0 0.2 0.5 0.5"]);
        let scenarios = scenario_list();
        let (mut popln, mut vectors, mut worms, _) = test_setup(2);

        let out_dir = dir.path().join("out");
        let settings = RunSettings {
            replicates: 2,
            out_dir: out_dir.clone(),
            ..RunSettings::default()
        };
        let mut model = Model::new(1.0);
        model
            .run_scenarios(
                &scenarios,
                &mut popln,
                &mut vectors,
                &mut worms,
                &draws,
                &settings,
            )
            .unwrap();

        for kind in ["pretas", "tas"] {
            let text =
                std::fs::read_to_string(out_dir.join(format!("annual-mda_{kind}_0.csv"))).unwrap();
            let count_rep = |rep: &str| {
                text.lines()
                    .filter(|l| l.split(',').next() == Some(rep))
                    .count()
            };
            assert_eq!(count_rep("0"), count_rep("1"), "{kind} rows diverge");
            // Two simulated years, one record per year.
            assert_eq!(count_rep("0"), 2, "{kind} row count");
        }
    }

    #[test]
    fn roadmap_records_are_emitted_every_year() {
        let dir = tempfile::tempdir().unwrap();
        let draws = write_draws(dir.path(), &["10.0 0.3 1.0 0.55"]);
        let scenarios = scenario_list();
        let (mut popln, mut vectors, mut worms, _) = test_setup(3);

        let out_dir = dir.path().join("out");
        let settings = RunSettings {
            replicates: 1,
            out_dir: out_dir.clone(),
            ..RunSettings::default()
        };
        let mut model = Model::new(1.0);
        model
            .run_scenarios(
                &scenarios,
                &mut popln,
                &mut vectors,
                &mut worms,
                &draws,
                &settings,
            )
            .unwrap();

        let text = std::fs::read_to_string(out_dir.join("annual-mda_ntdmc_0.csv")).unwrap();
        // Header plus boundaries at months 0, 12 (month 24 ends the run).
        assert_eq!(text.lines().count(), 3);
    }

    #[test]
    fn observations_recorded_for_queries_and_rounds() {
        let dir = tempfile::tempdir().unwrap();
        let draws = write_draws(dir.path(), &["10.0 0.3 1.0 0.55"]);
        let scenarios = scenario_list();
        let (mut popln, mut vectors, mut worms, _) = test_setup(4);

        let out_dir = dir.path().join("out");
        let settings = RunSettings {
            replicates: 1,
            out_dir: out_dir.clone(),
            ..RunSettings::default()
        };
        let mut model = Model::new(1.0);
        model
            .run_scenarios(
                &scenarios,
                &mut popln,
                &mut vectors,
                &mut worms,
                &draws,
                &settings,
            )
            .unwrap();

        let text = std::fs::read_to_string(out_dir.join("annual-mda_res_0.csv")).unwrap();
        // Header + baseline + 2 MDA rounds + 2 prevalence queries.
        assert_eq!(text.lines().count(), 6);
    }

    /// Skipping the first round for low prevalence must not disable later
    /// rounds: the suppression applies to that round only.
    #[test]
    fn low_prevalence_gate_skips_only_the_first_round() {
        let dir = tempfile::tempdir().unwrap();
        let draws = write_draws(dir.path(), &["10.0 0.3 1.0 0.55"]);
        let scenarios = scenario_list();
        // Threshold above any possible prevalence, so the gate always fires.
        let (mut popln, mut vectors, mut worms, _) = setup_with_params(
            11,
            ModelParams {
                max_age: 60,
                sample_size: 50,
                no_mda_low_mf: true,
                mf_threshold: 1.1,
                ..ModelParams::default()
            },
        );

        let out_dir = dir.path().join("out");
        let settings = RunSettings {
            replicates: 1,
            out_dir: out_dir.clone(),
            ..RunSettings::default()
        };
        let mut model = Model::new(1.0);
        model
            .run_scenarios(
                &scenarios,
                &mut popln,
                &mut vectors,
                &mut worms,
                &draws,
                &settings,
            )
            .unwrap();

        let text = std::fs::read_to_string(out_dir.join("annual-mda_res_0.csv")).unwrap();
        let rounds: Vec<(String, usize)> = text
            .lines()
            .skip(1)
            .filter_map(|l| {
                let f: Vec<&str> = l.split(',').collect();
                (!f[9].is_empty()).then(|| (f[6].to_string(), f[12].parse().unwrap()))
            })
            .collect();
        assert_eq!(rounds.len(), 2);
        assert_eq!(rounds[0], ("2".to_string(), 0));
        assert_eq!(rounds[1].0, "14");
        assert!(rounds[1].1 > 0, "second round must treat");
    }

    /// Every 12-month boundary emits the full age-stratified family,
    /// including incidence and the survey-state snapshot.
    #[test]
    fn yearly_records_include_incidence_and_survey_state() {
        let dir = tempfile::tempdir().unwrap();
        let draws = write_draws(dir.path(), &["10.0 0.3 1.0 0.55"]);
        let scenarios = scenario_list();
        let (mut popln, mut vectors, mut worms, _) = test_setup(6);

        let out_dir = dir.path().join("out");
        let settings = RunSettings {
            replicates: 1,
            out_dir: out_dir.clone(),
            ..RunSettings::default()
        };
        let mut model = Model::new(1.0);
        model
            .run_scenarios(
                &scenarios,
                &mut popln,
                &mut vectors,
                &mut worms,
                &draws,
                &settings,
            )
            .unwrap();

        // 12 five-year bins (max age 60) at each of the two year boundaries.
        let ihme = std::fs::read_to_string(out_dir.join("annual-mda_ihme_0.csv")).unwrap();
        let incidence_rows = ihme
            .lines()
            .filter(|l| l.split(',').nth(4) == Some("incidence"))
            .count();
        assert_eq!(incidence_rows, 24);

        let by_age =
            std::fs::read_to_string(out_dir.join("annual-mda_surveybyage_0.csv")).unwrap();
        assert_eq!(by_age.lines().count(), 1 + 24);
    }

    #[test]
    fn fractional_timestep_reaches_each_target_month() {
        let dir = tempfile::tempdir().unwrap();
        let draws = write_draws(dir.path(), &["10.0 0.3 1.0 0.55"]);
        let scenarios = scenario_list();
        let (mut popln, mut vectors, mut worms, _) = test_setup(8);

        let out_dir = dir.path().join("out");
        let settings = RunSettings {
            replicates: 1,
            out_dir: out_dir.clone(),
            ..RunSettings::default()
        };
        let mut model = Model::new(0.5);
        model
            .run_scenarios(
                &scenarios,
                &mut popln,
                &mut vectors,
                &mut worms,
                &draws,
                &settings,
            )
            .unwrap();
        assert_eq!(model.current_month(), 24);

        // Month-gated work still fires exactly once per month: header +
        // baseline + 2 rounds + 2 prevalence queries.
        let text = std::fs::read_to_string(out_dir.join("annual-mda_res_0.csv")).unwrap();
        assert_eq!(text.lines().count(), 6);
    }

    /// The prevalence-driven adjustment only ever scales the importation
    /// amplitude down.
    #[test]
    fn importation_rate_never_increases_under_mda() {
        let dir = tempfile::tempdir().unwrap();
        let draws = write_draws(dir.path(), &["10.0 0.3 1.0 0.55"]);
        let scenarios = scenario_list();
        let (mut popln, mut vectors, mut worms, _) = test_setup(5);

        let settings = RunSettings {
            replicates: 1,
            out_dir: dir.path().join("out"),
            ..RunSettings::default()
        };
        let mut model = Model::new(1.0);
        model
            .run_scenarios(
                &scenarios,
                &mut popln,
                &mut vectors,
                &mut worms,
                &draws,
                &settings,
            )
            .unwrap();
        assert!(popln.importation_rate() <= 1.0);
    }

    #[test]
    fn exact_month_detection() {
        assert_eq!(exact_month(12.0), Some(12));
        assert_eq!(exact_month(12.5), None);
        assert_eq!(exact_month(11.999_999_999_9), Some(12));
    }
}

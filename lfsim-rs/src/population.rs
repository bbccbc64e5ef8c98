//! Host population: individual worm burdens, microfilarial densities,
//! treatment-probability state and survey sampling.

use rand::{Rng, rngs::StdRng};
use rand_distr::{Beta, Binomial, Distribution, Gamma, Poisson};

use crate::parameters::ModelParams;
use crate::scenario::{MdaEvent, PrevalenceEvent};
use crate::vectors::VectorPop;
use crate::worms::Worm;

/// Microfilarial density at which a blood slide reads positive.
const MF_DETECTION_LIMIT: f64 = 1.0;

#[derive(Debug, Clone)]
pub struct Host {
    /// Age in months.
    pub age: f64,
    /// Relative exposure to bites, gamma-distributed with the replicate's
    /// aggregation parameter.
    pub bite_risk: f64,
    pub male_worms: u32,
    pub female_worms: u32,
    /// Microfilarial density per blood sample.
    pub mf: f64,
    /// Probability of taking treatment in an MDA round. Zero means the value
    /// has never been assigned.
    pub p_treat: f64,
    /// Uniform draw classifying the host against the current
    /// never-treat fraction.
    never_treat_u: f64,
}

impl Host {
    pub fn total_worms(&self) -> u32 {
        self.male_worms + self.female_worms
    }

    pub fn is_fertile(&self) -> bool {
        self.male_worms > 0 && self.female_worms > 0
    }

    pub fn mf_positive(&self) -> bool {
        self.mf >= MF_DETECTION_LIMIT
    }

    pub fn antigen_positive(&self) -> bool {
        self.total_worms() > 0
    }

    fn age_years(&self) -> f64 {
        self.age / 12.0
    }
}

/// Prevalence measured by one query: microfilarial and antigen prevalence
/// are computed together over the same individuals.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RecordedPrevalence {
    pub mf: f64,
    pub ict: f64,
    pub sampled: usize,
}

/// Outcome of one survey, recorded for output.
#[derive(Debug, Clone, Copy)]
pub struct SurveyOutcome {
    pub passed: bool,
    pub positives: usize,
    pub sampled: usize,
}

#[derive(Debug, Clone)]
struct SavedPopulationState {
    month: i32,
    #[allow(dead_code)]
    label: String,
    hosts: Vec<Host>,
    a_imp: f64,
    bed_net_coverage: f64,
    k: f64,
    incidence: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct Population {
    hosts: Vec<Host>,
    params: ModelParams,
    size_choices: Vec<usize>,
    /// Aggregation parameter: gamma shape of bite-risk heterogeneity.
    k: f64,
    /// Importation amplitude: externally-sourced infection pressure.
    a_imp: f64,
    bed_net_coverage: f64,
    never_treat_fraction: f64,
    ict_sensitivity: f64,
    ict_specificity: f64,
    /// New infections per 5-year age bin since the last [`Population::take_incidence`].
    incidence: Vec<usize>,
    saved: Vec<SavedPopulationState>,
}

impl Population {
    pub fn new(params: ModelParams, size_choices: Vec<usize>) -> Population {
        let never_treat_fraction = params.never_treat_fraction;
        let ict_sensitivity = params.ict_sensitivity;
        let ict_specificity = params.ict_specificity;
        Population {
            hosts: Vec::new(),
            params,
            size_choices,
            k: 0.3,
            a_imp: 0.0,
            bed_net_coverage: 0.0,
            never_treat_fraction,
            ict_sensitivity,
            ict_specificity,
            incidence: Vec::new(),
            saved: Vec::new(),
        }
    }

    /// Builds a fresh host population for one replicate: size drawn from the
    /// configured choices, ages uniform over the lifespan, bite risk
    /// gamma-distributed with shape `k`, and a light seed infection so
    /// burn-in can converge to endemic equilibrium.
    pub fn init_hosts(&mut self, k: f64, a_imp: f64, worms: &Worm, rng: &mut StdRng) {
        self.k = k.max(1e-3);
        self.a_imp = a_imp;
        self.bed_net_coverage = 0.0;
        self.never_treat_fraction = self.params.never_treat_fraction;
        self.ict_sensitivity = self.params.ict_sensitivity;
        self.ict_specificity = self.params.ict_specificity;
        self.incidence = vec![0; self.bins().len()];

        let size = self.size_choices[rng.random_range(0..self.size_choices.len())];
        let max_age_months = f64::from(self.params.max_age) * 12.0;
        let gamma = Gamma::new(self.k, 1.0 / self.k).unwrap();

        self.hosts = (0..size)
            .map(|_| {
                let bite_risk = gamma.sample(rng);
                let seed_mean = (self.params.init_worms * bite_risk).max(1e-6);
                let seeded = Poisson::new(seed_mean).unwrap().sample(rng) as u64;
                let male = Binomial::new(seeded, 0.5).unwrap().sample(rng) as u32;
                let female = (seeded as u32) - male;
                let mut host = Host {
                    age: rng.random::<f64>() * max_age_months,
                    bite_risk,
                    male_worms: male,
                    female_worms: female,
                    mf: 0.0,
                    p_treat: 0.0,
                    never_treat_u: rng.random(),
                };
                if host.is_fertile() {
                    host.mf = worms.mf_equilibrium(host.female_worms);
                }
                host
            })
            .collect();
    }

    /// Advances every host by one `dt`-month step: aging and replacement,
    /// new worm acquisition from the vector population, worm death, mf
    /// production and decay, and imported infections.
    pub fn evolve(&mut self, dt: f64, vectors: &VectorPop, worms: &Worm, rng: &mut StdRng) {
        let max_age_months = f64::from(self.params.max_age) * 12.0;
        let death_rate = dt / (12.0 * self.params.tau);
        let net_factor = 1.0 - self.bed_net_coverage * self.params.bed_net_efficacy;
        let exposure = self.params.bite_rate * vectors.biting_density() * net_factor * dt;
        let gamma = Gamma::new(self.k, 1.0 / self.k).unwrap();
        let nbins = self.incidence.len();

        for host in &mut self.hosts {
            host.age += dt;
            if host.age >= max_age_months || rng.random::<f64>() < death_rate {
                // Replaced by a newborn with no treatment-probability history.
                *host = Host {
                    age: 0.0,
                    bite_risk: gamma.sample(rng),
                    male_worms: 0,
                    female_worms: 0,
                    mf: 0.0,
                    p_treat: 0.0,
                    never_treat_u: rng.random(),
                };
                continue;
            }

            let had_worms = host.total_worms() > 0;
            let lambda = exposure * host.bite_risk;
            if lambda > 0.0 {
                let acquired = Poisson::new(lambda).unwrap().sample(rng) as u64;
                if acquired > 0 {
                    let males = Binomial::new(acquired, 0.5).unwrap().sample(rng) as u32;
                    host.male_worms += males;
                    host.female_worms += (acquired as u32) - males;
                }
            }
            if nbins > 0 && !had_worms && host.total_worms() > 0 {
                self.incidence[((host.age / 60.0) as usize).min(nbins - 1)] += 1;
            }

            let death_p = (worms.death_rate * dt).min(1.0);
            if host.male_worms > 0 {
                host.male_worms -=
                    Binomial::new(u64::from(host.male_worms), death_p).unwrap().sample(rng) as u32;
            }
            if host.female_worms > 0 {
                host.female_worms -= Binomial::new(u64::from(host.female_worms), death_p)
                    .unwrap()
                    .sample(rng) as u32;
            }

            let production = if host.is_fertile() {
                worms.fecundity * f64::from(host.female_worms)
            } else {
                0.0
            };
            host.mf = (host.mf + dt * (production - worms.mf_death_rate * host.mf)).max(0.0);
        }

        // Imported infections arrive at amplitude a_imp per month across the
        // whole population.
        if self.a_imp > 0.0 && !self.hosts.is_empty() {
            let imports = Poisson::new(self.a_imp * dt).unwrap().sample(rng) as u64;
            for _ in 0..imports {
                let idx = rng.random_range(0..self.hosts.len());
                let host = &mut self.hosts[idx];
                let had_worms = host.total_worms() > 0;
                host.male_worms += 1;
                host.female_worms += 1;
                if nbins > 0 && !had_worms {
                    self.incidence[((host.age / 60.0) as usize).min(nbins - 1)] += 1;
                }
            }
        }
    }

    /// New-infection counts per 5-year age bin since the previous call, then
    /// resets the counters.
    pub fn take_incidence(&mut self) -> Vec<(i32, i32, usize)> {
        let rows: Vec<(i32, i32, usize)> = self
            .bins()
            .iter()
            .zip(&self.incidence)
            .map(|(&(lo, hi), &n)| (lo, hi, n))
            .collect();
        self.incidence.iter_mut().for_each(|n| *n = 0);
        rows
    }

    pub fn mean_mf_density(&self) -> f64 {
        if self.hosts.is_empty() {
            return 0.0;
        }
        self.hosts.iter().map(|h| h.mf).sum::<f64>() / self.hosts.len() as f64
    }

    /// Microfilarial and antigen prevalence over the query's age range,
    /// computed in one pass. Antigen prevalence folds in the current test
    /// sensitivity and specificity.
    pub fn get_prevalence(&self, query: &PrevalenceEvent) -> RecordedPrevalence {
        let mut n = 0usize;
        let mut mf_pos = 0usize;
        let mut ag_pos = 0usize;
        for host in &self.hosts {
            let age = host.age_years();
            if age < f64::from(query.min_age) || age >= f64::from(query.max_age) {
                continue;
            }
            n += 1;
            if host.mf_positive() {
                mf_pos += 1;
            }
            if host.antigen_positive() {
                ag_pos += 1;
            }
        }
        if n == 0 {
            return RecordedPrevalence::default();
        }
        let ag_frac = ag_pos as f64 / n as f64;
        RecordedPrevalence {
            mf: mf_pos as f64 / n as f64,
            ict: self.ict_sensitivity * ag_frac + (1.0 - self.ict_specificity) * (1.0 - ag_frac),
            sampled: n,
        }
    }

    /// Microfilarial prevalence on a random sample of `sample_size` hosts;
    /// pass the full population size to measure the intrinsic value.
    pub fn mf_prevalence(&self, sample_size: usize, rng: &mut StdRng) -> f64 {
        if self.hosts.is_empty() {
            return 0.0;
        }
        let n = sample_size.min(self.hosts.len());
        if n == self.hosts.len() {
            let pos = self.hosts.iter().filter(|h| h.mf_positive()).count();
            return pos as f64 / n as f64;
        }
        let idx = rand::seq::index::sample(rng, self.hosts.len(), n);
        let pos = idx.iter().filter(|&i| self.hosts[i].mf_positive()).count();
        pos as f64 / n as f64
    }

    /// Pre-TAS survey: mf prevalence on a sample of the declared survey
    /// size, passing when it is below the programme threshold.
    pub fn pre_tas_survey(&self, rng: &mut StdRng) -> SurveyOutcome {
        let n = self.params.sample_size.min(self.hosts.len()).max(1);
        let idx = rand::seq::index::sample(rng, self.hosts.len(), n);
        let positives = idx.iter().filter(|&i| self.hosts[i].mf_positive()).count();
        SurveyOutcome {
            passed: (positives as f64 / n as f64) < self.params.mf_threshold,
            positives,
            sampled: n,
        }
    }

    /// TAS survey: antigen testing of 6–7 year olds, passing when the
    /// positive fraction is below the critical cutoff.
    pub fn tas_survey(&self, rng: &mut StdRng) -> SurveyOutcome {
        let children: Vec<&Host> = self
            .hosts
            .iter()
            .filter(|h| h.age >= 72.0 && h.age < 96.0)
            .collect();
        if children.is_empty() {
            return SurveyOutcome {
                passed: true,
                positives: 0,
                sampled: 0,
            };
        }
        let n = self.params.sample_size.min(children.len());
        let idx = rand::seq::index::sample(rng, children.len(), n);
        let positives = idx
            .iter()
            .filter(|&i| {
                let p = if children[i].antigen_positive() {
                    self.ict_sensitivity
                } else {
                    1.0 - self.ict_specificity
                };
                rng.random::<f64>() < p
            })
            .count();
        SurveyOutcome {
            passed: (positives as f64 / n as f64) < self.params.ict_threshold,
            positives,
            sampled: n,
        }
    }

    /// Assigns every host's treatment probability from coverage and the
    /// systematic-compliance correlation.
    pub fn init_p_treat(&mut self, cov: f64, rho: f64, rng: &mut StdRng) {
        for host in &mut self.hosts {
            host.p_treat = draw_p_treat(cov, rho, rng);
        }
    }

    /// Rescales assigned treatment probabilities when coverage changes
    /// between rounds, preserving each host's relative compliance.
    pub fn edit_p_treat(&mut self, prev_cov: f64, cov: f64, rho: f64, rng: &mut StdRng) {
        if prev_cov <= 0.0 {
            self.init_p_treat(cov, rho, rng);
            return;
        }
        let ratio = cov / prev_cov;
        for host in &mut self.hosts {
            if host.p_treat > 0.0 {
                host.p_treat = (host.p_treat * ratio).min(1.0);
            }
        }
    }

    /// Hosts with a zero treatment probability have never been assigned one
    /// (they were born after the last assignment); give them a fresh draw.
    pub fn check_for_zero_p_treat(&mut self, cov: f64, rho: f64, rng: &mut StdRng) {
        for host in &mut self.hosts {
            if host.p_treat == 0.0 {
                host.p_treat = draw_p_treat(cov, rho, rng);
            }
        }
    }

    /// Delivers one MDA round. When `do_mda` is false the round is recorded
    /// but nobody is treated, keeping output bookkeeping identical across
    /// replicates.
    pub fn apply_treatment(
        &mut self,
        event: &MdaEvent,
        worms: &Worm,
        do_mda: bool,
        rng: &mut StdRng,
    ) -> usize {
        if !do_mda {
            return 0;
        }
        let never_treat_fraction = self.never_treat_fraction;
        let adult_kill = worms.adult_kill();
        let mf_kill = worms.mf_kill(event.drug);
        let mut treated = 0usize;
        for host in &mut self.hosts {
            let age = host.age_years();
            if age < f64::from(event.min_age) || age >= f64::from(event.max_age) {
                continue;
            }
            if host.never_treat_u < never_treat_fraction {
                continue;
            }
            if rng.random::<f64>() >= host.p_treat {
                continue;
            }
            if host.male_worms > 0 {
                host.male_worms -= Binomial::new(u64::from(host.male_worms), adult_kill)
                    .unwrap()
                    .sample(rng) as u32;
            }
            if host.female_worms > 0 {
                host.female_worms -= Binomial::new(u64::from(host.female_worms), adult_kill)
                    .unwrap()
                    .sample(rng) as u32;
            }
            host.mf *= 1.0 - mf_kill;
            treated += 1;
        }
        treated
    }

    pub fn update_bed_net_coverage(&mut self, coverage: f64) {
        self.bed_net_coverage = coverage.clamp(0.0, 1.0);
    }

    pub fn importation_rate(&self) -> f64 {
        self.a_imp
    }

    pub fn set_importation_rate(&mut self, rate: f64) {
        self.a_imp = rate.max(0.0);
    }

    pub fn scale_importation_rate(&mut self, factor: f64) {
        self.a_imp *= factor;
    }

    pub fn update_k(&mut self, k: f64) {
        self.k = k.max(1e-3);
    }

    pub fn change_never_treat(&mut self) {
        self.never_treat_fraction = self.params.never_treat_changed_fraction;
    }

    pub fn never_treat_to_original(&mut self) {
        self.never_treat_fraction = self.params.never_treat_fraction;
    }

    pub fn change_ict_test(&mut self) {
        self.ict_sensitivity = self.params.ict_sensitivity_changed;
        self.ict_specificity = self.params.ict_specificity_changed;
    }

    pub fn ict_test_to_original(&mut self) {
        self.ict_sensitivity = self.params.ict_sensitivity;
        self.ict_specificity = self.params.ict_specificity;
    }

    pub fn save_state(&mut self, month: i32, label: &str) {
        self.saved.push(SavedPopulationState {
            month,
            label: label.to_string(),
            hosts: self.hosts.clone(),
            a_imp: self.a_imp,
            bed_net_coverage: self.bed_net_coverage,
            k: self.k,
            incidence: self.incidence.clone(),
        });
    }

    /// Restores the state saved at `month`, or the latest earlier one, and
    /// drops checkpoints beyond it.
    pub fn reset_to_month(&mut self, month: i32) {
        if let Some(pos) = self.saved.iter().rposition(|s| s.month <= month) {
            let state = &self.saved[pos];
            self.hosts = state.hosts.clone();
            self.a_imp = state.a_imp;
            self.bed_net_coverage = state.bed_net_coverage;
            self.k = state.k;
            self.incidence = state.incidence.clone();
        }
        self.saved.retain(|s| s.month <= month);
    }

    pub fn clear_saved_months(&mut self) {
        self.saved.clear();
    }

    pub fn size(&self) -> usize {
        self.hosts.len()
    }

    pub fn max_age(&self) -> i32 {
        self.params.max_age
    }

    pub fn params(&self) -> &ModelParams {
        &self.params
    }

    /// Host counts per 5-year age bin.
    pub fn counts_by_age(&self) -> Vec<(i32, i32, usize)> {
        self.bins()
            .iter()
            .map(|&(lo, hi)| {
                let n = self
                    .hosts
                    .iter()
                    .filter(|h| {
                        let age = h.age_years();
                        age >= f64::from(lo) && age < f64::from(hi)
                    })
                    .count();
                (lo, hi, n)
            })
            .collect()
    }

    /// Microfilarial prevalence per 5-year age bin.
    pub fn mf_prevalence_by_age(&self) -> Vec<(i32, i32, f64)> {
        self.fraction_by_age(|h| h.mf_positive())
    }

    /// Expected lymphoedema and hydrocele prevalence per 5-year age bin,
    /// driven by each host's worm burden.
    pub fn sequelae_by_age(&self) -> Vec<(i32, i32, f64, f64)> {
        let lymph_shape = self.params.lymphoedema_shape;
        let lymph_cap = self.params.lymphoedema_total_worms;
        let hydro_shape = self.params.hydrocele_shape;
        let hydro_cap = self.params.hydrocele_total_worms;
        let risk = |w: u32, shape: f64, cap: u32| -> f64 {
            1.0 - (-shape * f64::from(w.min(cap))).exp()
        };

        self.bins()
            .iter()
            .map(|&(lo, hi)| {
                let mut n = 0usize;
                let mut lymph = 0.0;
                let mut hydro = 0.0;
                for host in &self.hosts {
                    let age = host.age_years();
                    if age < f64::from(lo) || age >= f64::from(hi) {
                        continue;
                    }
                    n += 1;
                    lymph += risk(host.total_worms(), lymph_shape, lymph_cap);
                    hydro += risk(host.total_worms(), hydro_shape, hydro_cap);
                }
                if n == 0 {
                    (lo, hi, 0.0, 0.0)
                } else {
                    (lo, hi, lymph / n as f64, hydro / n as f64)
                }
            })
            .collect()
    }

    fn bins(&self) -> Vec<(i32, i32)> {
        (0..self.params.max_age)
            .step_by(5)
            .map(|lo| (lo, (lo + 5).min(self.params.max_age)))
            .collect()
    }

    fn fraction_by_age(&self, pred: impl Fn(&Host) -> bool) -> Vec<(i32, i32, f64)> {
        self.bins()
            .iter()
            .map(|&(lo, hi)| {
                let mut n = 0usize;
                let mut hits = 0usize;
                for host in &self.hosts {
                    let age = host.age_years();
                    if age < f64::from(lo) || age >= f64::from(hi) {
                        continue;
                    }
                    n += 1;
                    if pred(host) {
                        hits += 1;
                    }
                }
                let frac = if n == 0 { 0.0 } else { hits as f64 / n as f64 };
                (lo, hi, frac)
            })
            .collect()
    }

    pub fn random_variable_names(&self) -> Vec<String> {
        vec!["k".to_string(), "aImp".to_string()]
    }

    pub fn random_variable_values(&self) -> Vec<f64> {
        vec![self.k, self.a_imp]
    }
}

/// Draws one host's treatment probability. With no systematic compliance
/// everyone gets the coverage; otherwise a beta draw with mean `cov` whose
/// spread grows with `rho`, floored so an assigned value is never zero.
fn draw_p_treat(cov: f64, rho: f64, rng: &mut StdRng) -> f64 {
    if cov <= 0.0 {
        return 1e-12;
    }
    if rho <= 0.0 || rho >= 1.0 || cov >= 1.0 {
        return cov.min(1.0);
    }
    let alpha = cov * (1.0 - rho) / rho;
    let beta = (1.0 - cov) * (1.0 - rho) / rho;
    let draw = Beta::new(alpha, beta).unwrap().sample(rng);
    draw.max(1e-12)
}

//! Adult worm and microfilaria life-history parameters.

use crate::scenario::DrugType;

#[derive(Debug, Clone)]
pub struct Worm {
    /// Adult worm death rate per month.
    pub death_rate: f64,
    /// Microfilaria decay rate per month.
    pub mf_death_rate: f64,
    /// Microfilariae produced per fertile female worm per month.
    pub fecundity: f64,
    /// Proportion of adult worms killed in a treated host, drawn per
    /// replicate (MDA-uptake proportion).
    w_prop_mda: f64,
}

impl Default for Worm {
    fn default() -> Worm {
        Worm {
            death_rate: 1.0 / (12.0 * 8.0), // ~8 year adult lifespan
            mf_death_rate: 1.0 / 10.0,
            fecundity: 1.5,
            w_prop_mda: 0.55,
        }
    }
}

impl Worm {
    pub fn reset(&mut self, w_prop_mda: f64) {
        self.w_prop_mda = w_prop_mda;
    }

    /// Fraction of a treated host's adult worms killed by one round.
    pub fn adult_kill(&self) -> f64 {
        self.w_prop_mda
    }

    /// Fraction of a treated host's microfilariae cleared by one round.
    pub fn mf_kill(&self, drug: DrugType) -> f64 {
        drug.mf_kill()
    }

    /// Equilibrium mf density for a host with the given fertile female count.
    pub fn mf_equilibrium(&self, female_worms: u32) -> f64 {
        self.fecundity * f64::from(female_worms) / self.mf_death_rate
    }

    pub fn random_variable_names(&self) -> Vec<String> {
        vec!["wPropMDA".to_string()]
    }

    pub fn random_variable_values(&self) -> Vec<f64> {
        vec![self.w_prop_mda]
    }
}

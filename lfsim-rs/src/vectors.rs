//! Mosquito vector population: vector-to-host ratio and infective (L3)
//! larval density, updated from the host population's microfilarial load.

use crate::population::Population;
use crate::worms::Worm;

#[derive(Debug, Clone, Copy)]
struct SavedVectorState {
    month: i32,
    l3_density: f64,
    v_to_h: f64,
}

#[derive(Debug, Clone)]
pub struct VectorPop {
    v_to_h: f64,
    l3_density: f64,
    /// Saturation level of larval uptake per mosquito.
    kappa: f64,
    /// Uptake rate per unit mf density.
    uptake_rate: f64,
    /// Per-month turnover of the larval pool.
    turnover: f64,
    saved: Vec<SavedVectorState>,
}

impl VectorPop {
    pub fn new() -> VectorPop {
        VectorPop {
            v_to_h: 10.0,
            l3_density: 0.0,
            kappa: 4.4,
            uptake_rate: 0.055,
            turnover: 0.8,
            saved: Vec::new(),
        }
    }

    /// Resets for a new replicate with a freshly drawn vector-to-host ratio.
    /// Larval density starts above zero so burn-in can establish transmission.
    pub fn reset(&mut self, v_to_h: f64) {
        self.v_to_h = v_to_h;
        self.l3_density = 1.0;
    }

    pub fn update_v_to_h(&mut self, v_to_h: f64) {
        self.v_to_h = v_to_h;
    }

    /// Infective larvae per host: per-mosquito density times the ratio.
    pub fn biting_density(&self) -> f64 {
        self.l3_density * self.v_to_h
    }

    /// Relaxes the per-mosquito L3 density towards the uptake implied by the
    /// host population's current mean mf density (saturating in mf load).
    pub fn update_l3_density(&mut self, popln: &Population, _worms: &Worm) {
        let mf = popln.mean_mf_density();
        let uptake = self.kappa * (1.0 - (-self.uptake_rate * mf / self.kappa).exp());
        self.l3_density += self.turnover * (uptake - self.l3_density);
    }

    pub fn save_state(&mut self, month: i32) {
        self.saved.push(SavedVectorState {
            month,
            l3_density: self.l3_density,
            v_to_h: self.v_to_h,
        });
    }

    /// Restores the state saved at `month`, or the latest earlier one.
    pub fn reset_to_month(&mut self, month: i32) {
        if let Some(state) = self
            .saved
            .iter()
            .rev()
            .find(|s| s.month <= month)
            .copied()
        {
            self.l3_density = state.l3_density;
            self.v_to_h = state.v_to_h;
        }
        self.saved.retain(|s| s.month <= month);
    }

    pub fn clear_saved_months(&mut self) {
        self.saved.clear();
    }

    pub fn random_variable_names(&self) -> Vec<String> {
        vec!["vToH".to_string()]
    }

    pub fn random_variable_values(&self) -> Vec<f64> {
        vec![self.v_to_h]
    }
}

impl Default for VectorPop {
    fn default() -> VectorPop {
        VectorPop::new()
    }
}

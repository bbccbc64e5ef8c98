//! Stochastic individual-based simulation of lymphatic filariasis
//! transmission and elimination programmes.
//!
//! A run is a set of replicates, each seeded from external calibration
//! draws. A replicate burns a fresh host population in to endemic
//! equilibrium and then plays out one or more scenario branches of
//! intervention history, recording prevalence, treatment and survey
//! outcomes to per-scenario CSV files.

pub mod draws;
pub mod error;
pub mod model;
pub mod output;
pub mod parameters;
pub mod population;
pub mod scenario;
pub mod survey;
pub mod vectors;
pub mod worms;

pub use draws::DrawSource;
pub use error::{ConfigError, Result};
pub use model::{Model, RunSettings};
pub use parameters::{ModelParams, load_population_sizes};
pub use population::Population;
pub use scenario::ScenarioList;
pub use vectors::VectorPop;
pub use worms::Worm;

//! # Estimation Results
//!
//! The outcome of a maximum likelihood run: one row of statistics per free
//! beta, the general fit statistics, the robust covariance matrix and any
//! bootstrap draws. Results are written to and read back from TOML so that
//! forecasting can run without re-estimating.

use crate::choice::expression::ParameterSet;
use crate::choice::faer_ndarray::SymmetricDecomposition;
use crate::choice::specification::ModelKind;
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ResultsError {
    #[error("Failed to read or write results file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML results file: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize results to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error("The results were estimated for {found}, but {expected} was requested.")]
    MismatchedModel { found: ModelKind, expected: ModelKind },
    #[error("Parameter '{0}' has no estimated value in the results.")]
    MissingParameter(String),
    #[error("The robust covariance matrix is not {n}x{n}.")]
    MalformedCovariance { n: usize },
}

/// Estimate and tests of one free beta.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterEstimate {
    pub name: String,
    pub value: f64,
    pub std_err: f64,
    pub t_test: f64,
    pub p_value: f64,
    pub robust_std_err: f64,
    pub robust_t_test: f64,
    pub robust_p_value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bootstrap_std_err: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bootstrap_p_value: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneralStatistics {
    pub n_parameters: usize,
    pub sample_size: usize,
    pub excluded_observations: usize,
    pub init_log_likelihood: f64,
    pub final_log_likelihood: f64,
    pub null_log_likelihood: f64,
    /// `-2 (LL_init - LL_final)`.
    pub likelihood_ratio: f64,
    pub rho_square: f64,
    pub rho_bar_square: f64,
    pub rho_square_null: f64,
    pub rho_bar_square_null: f64,
    pub akaike: f64,
    pub bayesian: f64,
    pub final_gradient_norm: f64,
    pub iterations: usize,
    pub smallest_eigenvalue: f64,
    pub largest_eigenvalue: f64,
    pub bootstrap_draws: usize,
    pub weighted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimationResults {
    pub model: ModelKind,
    /// Robust (sandwich) covariance of the free betas, row by row.
    pub robust_covariance: Vec<Vec<f64>>,
    /// Free-beta vectors estimated on bootstrap replicas.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bootstrap: Vec<Vec<f64>>,
    pub statistics: GeneralStatistics,
    pub parameters: Vec<ParameterEstimate>,
}

impl EstimationResults {
    pub fn save(&self, path: &Path) -> Result<(), ResultsError> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        log::info!("Estimation results written to '{}'", path.display());
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, ResultsError> {
        let toml_string = fs::read_to_string(path)?;
        let results = toml::from_str(&toml_string)?;
        Ok(results)
    }

    /// Default location of the results of `model` inside `directory`.
    pub fn default_path(directory: &Path, model: ModelKind) -> std::path::PathBuf {
        directory.join(format!("{}.results.toml", model.name()))
    }

    pub fn ensure_model(&self, expected: ModelKind) -> Result<(), ResultsError> {
        if self.model != expected {
            return Err(ResultsError::MismatchedModel {
                found: self.model,
                expected,
            });
        }
        Ok(())
    }

    pub fn value_of(&self, name: &str) -> Option<f64> {
        self.parameters
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.value)
    }

    /// Full beta vector in the order of `parameters`: estimated values for the
    /// free betas, start values for the fixed ones.
    pub fn beta_vector(&self, parameters: &ParameterSet) -> Result<Vec<f64>, ResultsError> {
        parameters
            .iter()
            .map(|beta| {
                if beta.fixed {
                    Ok(beta.start)
                } else {
                    self.value_of(&beta.name)
                        .ok_or_else(|| ResultsError::MissingParameter(beta.name.clone()))
                }
            })
            .collect()
    }

    /// Beta vectors for simulating confidence intervals. Bootstrap draws are
    /// used when the results carry them; otherwise `count` vectors are drawn from
    /// the asymptotic normal distribution with the robust covariance.
    pub fn sensitivity_draws(
        &self,
        parameters: &ParameterSet,
        count: usize,
        seed: u64,
    ) -> Result<Vec<Vec<f64>>, ResultsError> {
        let base = self.beta_vector(parameters)?;
        let free = parameters.free_indices();
        let expand = |free_values: &[f64]| {
            let mut betas = base.clone();
            for (&id, &value) in free.iter().zip(free_values) {
                betas[id] = value;
            }
            betas
        };

        if !self.bootstrap.is_empty() {
            log::info!(
                "Using {} bootstrap draws for sensitivity analysis.",
                self.bootstrap.len()
            );
            return Ok(self.bootstrap.iter().map(|draw| expand(draw)).collect());
        }

        let k = free.len();
        let covariance = self.covariance_matrix(k)?;
        let root = covariance_root(&covariance);
        let mean: Array1<f64> = free.iter().map(|&id| base[id]).collect();
        let mut rng = StdRng::seed_from_u64(seed);
        Ok((0..count)
            .map(|_| {
                let z: Array1<f64> = (0..k).map(|_| rng.sample::<f64, _>(StandardNormal)).collect();
                let draw = &mean + &root.dot(&z);
                expand(draw.as_slice().unwrap_or(&[]))
            })
            .collect())
    }

    fn covariance_matrix(&self, n: usize) -> Result<Array2<f64>, ResultsError> {
        if self.robust_covariance.len() != n || self.robust_covariance.iter().any(|r| r.len() != n) {
            return Err(ResultsError::MalformedCovariance { n });
        }
        Ok(Array2::from_shape_fn((n, n), |(i, j)| {
            self.robust_covariance[i][j]
        }))
    }
}

/// A matrix `R` with `R Rᵀ` equal to the covariance. Cholesky when the matrix is
/// positive definite, otherwise the eigen square root with negative modes clipped.
fn covariance_root(covariance: &Array2<f64>) -> Array2<f64> {
    if let Ok(lower) = covariance.cholesky_lower() {
        return lower;
    }
    log::warn!("Robust covariance is not positive definite; clipping negative eigenvalues.");
    match covariance.symmetric_eigen() {
        Ok((values, vectors)) => {
            let scales = values.mapv(|v| v.max(0.0).sqrt());
            vectors * &scales
        }
        Err(_) => Array2::zeros(covariance.raw_dim()),
    }
}

//! # Maximum Likelihood Estimation
//!
//! Fits the free betas of a `ModelSpecification` by maximising the (optionally
//! weighted) log-likelihood of the observed choices:
//!
//! 1.  **Reparameterisation:** bounded betas are mapped to an unconstrained
//!     space, a logistic map for two-sided bounds and an exponential map for
//!     one-sided ones.
//! 2.  **Optimisation (BFGS):** the mean negative log-likelihood and its exact
//!     gradient, evaluated row-parallel with forward-mode derivatives, drive
//!     `wolfe_bfgs`.
//! 3.  **Inference:** the Hessian is obtained by central differences of the
//!     analytic gradient at the optimum. Its negated pseudo-inverse gives the
//!     classical covariance; the sandwich with the BHHH matrix gives the robust
//!     one.
//! 4.  **Bootstrap (optional):** the model is re-estimated on resampled
//!     replicas of the data to obtain bootstrap standard errors and draws for
//!     forecasting.

use wolfe_bfgs::{Bfgs, BfgsSolution};

use crate::choice::data::{DataError, Database, schema};
use crate::choice::expression::{Beta, EvalContext, Seed};
use crate::choice::faer_ndarray::{LinalgError, symmetric_pseudo_inverse};
use crate::choice::models::{self, ModelError};
use crate::choice::results::{EstimationResults, GeneralStatistics, ParameterEstimate};
use crate::choice::specification::ModelSpecification;
use crate::choice::weights::{self, WeightError};

use indicatif::{ProgressBar, ProgressStyle};
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use statrs::function::erf::erfc;
use thiserror::Error;

/// Relative tolerance under which Hessian eigenvalues are treated as zero.
const SINGULARITY_TOLERANCE: f64 = 1e-10;
/// Fraction of the bound range by which a start value on a bound is moved inside.
const BOUND_NUDGE: f64 = 1e-4;
/// Estimates closer than this many nudges to a bound are reported as at the bound.
const ACTIVE_BOUND_NUDGES: f64 = 10.0;

#[derive(Error, Debug)]
pub enum EstimationError {
    #[error(transparent)]
    Data(#[from] DataError),

    #[error("Model evaluation failed: {0}")]
    Model(#[from] ModelError),

    #[error("Post-stratification failed: {0}")]
    Weights(#[from] WeightError),

    #[error("Linear algebra failure while computing the covariance: {0}")]
    Linalg(#[from] LinalgError),

    #[error("The model has no free parameter to estimate.")]
    NoFreeParameters,

    #[error("The database has no observation.")]
    NoObservations,

    #[error("Start value {start} of '{name}' lies outside its bounds.")]
    StartOutsideBounds { name: String, start: f64 },

    #[error("The log-likelihood at the start values is not finite ({0}).")]
    NonFiniteInitialLikelihood(f64),

    #[error("BFGS optimization failed to converge: {0}")]
    OptimizationFailed(String),

    #[error("All {0} bootstrap replicas failed to estimate.")]
    BootstrapFailed(usize),
}

/// Optimizer and inference settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimationConfig {
    pub tolerance: f64,
    pub max_iterations: usize,
    /// Weight each observation's log-likelihood by the stratum weight.
    pub weighted: bool,
    pub bootstrap_draws: usize,
    pub seed: u64,
    /// Relative step of the finite-difference Hessian.
    pub hessian_step: f64,
}

impl Default for EstimationConfig {
    fn default() -> Self {
        Self {
            tolerance: 1e-6,
            max_iterations: 1000,
            weighted: false,
            bootstrap_draws: 0,
            seed: 42,
            hessian_step: 1e-5,
        }
    }
}

/// Map between a beta and its unconstrained optimizer coordinate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Transform {
    Identity,
    Lower(f64),
    Upper(f64),
    Interval(f64, f64),
}

impl Transform {
    pub fn for_beta(beta: &Beta) -> Self {
        match (beta.lower, beta.upper) {
            (None, None) => Transform::Identity,
            (Some(lo), None) => Transform::Lower(lo),
            (None, Some(hi)) => Transform::Upper(hi),
            (Some(lo), Some(hi)) => Transform::Interval(lo, hi),
        }
    }

    /// Optimizer coordinate of a beta value. Values on a bound are moved slightly inside.
    pub fn to_internal(self, x: f64) -> Option<f64> {
        match self {
            Transform::Identity => Some(x),
            Transform::Lower(lo) => (x >= lo).then(|| (x - lo).max(BOUND_NUDGE).ln()),
            Transform::Upper(hi) => (x <= hi).then(|| (hi - x).max(BOUND_NUDGE).ln()),
            Transform::Interval(lo, hi) => {
                if !(lo..=hi).contains(&x) || hi <= lo {
                    return None;
                }
                let nudge = BOUND_NUDGE * (hi - lo);
                let u = ((x - lo).clamp(nudge, hi - lo - nudge)) / (hi - lo);
                Some((u / (1.0 - u)).ln())
            }
        }
    }

    /// Whether `x` lies within a few `BOUND_NUDGE`s of a bound.
    pub fn near_bound(self, x: f64) -> bool {
        let margin = ACTIVE_BOUND_NUDGES * BOUND_NUDGE;
        match self {
            Transform::Identity => false,
            Transform::Lower(lo) => x - lo <= margin,
            Transform::Upper(hi) => hi - x <= margin,
            Transform::Interval(lo, hi) => {
                let margin = margin * (hi - lo);
                x - lo <= margin || hi - x <= margin
            }
        }
    }

    /// Beta value of an optimizer coordinate and the derivative `dx/dθ`.
    pub fn to_external(self, theta: f64) -> (f64, f64) {
        match self {
            Transform::Identity => (theta, 1.0),
            Transform::Lower(lo) => {
                let e = theta.exp();
                (lo + e, e)
            }
            Transform::Upper(hi) => {
                let e = theta.exp();
                (hi - e, -e)
            }
            Transform::Interval(lo, hi) => {
                let s = 1.0 / (1.0 + (-theta).exp());
                (lo + (hi - lo) * s, (hi - lo) * s * (1.0 - s))
            }
        }
    }
}

/// Log-likelihood of one model on one database.
pub struct LikelihoodProblem<'a> {
    model: &'a ModelSpecification,
    database: &'a Database,
    weights: Option<Array1<f64>>,
    free: Vec<usize>,
    slots: Vec<Option<usize>>,
    transforms: Vec<Transform>,
    base_betas: Vec<f64>,
}

impl<'a> LikelihoodProblem<'a> {
    pub fn new(
        model: &'a ModelSpecification,
        database: &'a Database,
        weighted: bool,
    ) -> Result<Self, EstimationError> {
        if database.n_rows() == 0 {
            return Err(EstimationError::NoObservations);
        }
        let free = model.parameters.free_indices();
        if free.is_empty() {
            return Err(EstimationError::NoFreeParameters);
        }
        let weights = if weighted {
            database.require([schema::WEIGHT])?;
            Some(database.column(schema::WEIGHT)?.to_owned())
        } else {
            None
        };
        let transforms = free
            .iter()
            .filter_map(|&id| model.parameters.get(id))
            .map(Transform::for_beta)
            .collect();
        Ok(Self {
            model,
            database,
            weights,
            free,
            slots: model.parameters.tangent_slots(),
            transforms,
            base_betas: model.parameters.start_values(),
        })
    }

    pub fn n_free(&self) -> usize {
        self.free.len()
    }

    pub fn n_rows(&self) -> usize {
        self.database.n_rows()
    }

    fn weight(&self, row: usize) -> f64 {
        self.weights.as_ref().map_or(1.0, |w| w[row])
    }

    pub fn total_weight(&self) -> f64 {
        self.weights
            .as_ref()
            .map_or(self.n_rows() as f64, |w| w.sum())
    }

    /// Full beta vector with `free_values` substituted for the free betas.
    pub fn betas_from_free(&self, free_values: &Array1<f64>) -> Vec<f64> {
        let mut betas = self.base_betas.clone();
        for (&id, &value) in self.free.iter().zip(free_values.iter()) {
            betas[id] = value;
        }
        betas
    }

    pub fn free_values(&self, betas: &[f64]) -> Array1<f64> {
        self.free.iter().map(|&id| betas[id]).collect()
    }

    /// Optimizer starting point for the given free values.
    pub fn to_internal(&self, free_values: &Array1<f64>) -> Result<Array1<f64>, EstimationError> {
        self.transforms
            .iter()
            .zip(free_values.iter())
            .zip(&self.free)
            .map(|((t, &x), &id)| {
                t.to_internal(x).ok_or_else(|| EstimationError::StartOutsideBounds {
                    name: self
                        .model
                        .parameters
                        .get(id)
                        .map_or_else(String::new, |b| b.name.clone()),
                    start: x,
                })
            })
            .collect()
    }

    /// Free values and the Jacobian diagonal `dx/dθ` of an optimizer point.
    pub fn to_external(&self, theta: &Array1<f64>) -> (Array1<f64>, Array1<f64>) {
        let (values, jacobian): (Vec<f64>, Vec<f64>) = self
            .transforms
            .iter()
            .zip(theta.iter())
            .map(|(t, &th)| t.to_external(th))
            .unzip();
        (Array1::from(values), Array1::from(jacobian))
    }

    fn row_contribution(&self, row: usize, betas: &[f64]) -> Result<(f64, Array1<f64>), ModelError> {
        let ctx = EvalContext {
            database: self.database,
            row,
            betas,
            seed: Seed::Parameters {
                slots: &self.slots,
                dim: self.free.len(),
            },
        };
        let log_p = models::chosen_log_probability(self.model, &ctx)?;
        let w = self.weight(row);
        Ok((w * log_p.value, log_p.tangent * w))
    }

    /// Log-likelihood and its gradient with respect to the free betas.
    pub fn log_likelihood_and_gradient(
        &self,
        free_values: &Array1<f64>,
    ) -> Result<(f64, Array1<f64>), ModelError> {
        let betas = self.betas_from_free(free_values);
        let k = self.n_free();
        (0..self.n_rows())
            .into_par_iter()
            .map(|row| self.row_contribution(row, &betas))
            .try_reduce(
                || (0.0, Array1::zeros(k)),
                |(ll_a, g_a), (ll_b, g_b)| Ok((ll_a + ll_b, g_a + g_b)),
            )
    }

    pub fn log_likelihood(&self, free_values: &Array1<f64>) -> Result<f64, ModelError> {
        self.log_likelihood_and_gradient(free_values)
            .map(|(ll, _)| ll)
    }

    /// Per-observation weighted scores, one row per observation.
    pub fn scores(&self, free_values: &Array1<f64>) -> Result<Array2<f64>, ModelError> {
        let betas = self.betas_from_free(free_values);
        let rows = (0..self.n_rows())
            .into_par_iter()
            .map(|row| self.row_contribution(row, &betas).map(|(_, g)| g))
            .collect::<Result<Vec<_>, _>>()?;
        let mut scores = Array2::zeros((rows.len(), self.n_free()));
        for (mut target, g) in scores.rows_mut().into_iter().zip(rows) {
            target.assign(&g);
        }
        Ok(scores)
    }

    /// Symmetrised central-difference Hessian of the log-likelihood.
    pub fn hessian(&self, free_values: &Array1<f64>, step: f64) -> Result<Array2<f64>, ModelError> {
        let k = self.n_free();
        let mut hessian = Array2::zeros((k, k));
        for j in 0..k {
            let h = step * free_values[j].abs().max(1.0);
            let mut plus = free_values.clone();
            plus[j] += h;
            let mut minus = free_values.clone();
            minus[j] -= h;
            let (_, g_plus) = self.log_likelihood_and_gradient(&plus)?;
            let (_, g_minus) = self.log_likelihood_and_gradient(&minus)?;
            hessian.column_mut(j).assign(&((g_plus - g_minus) / (2.0 * h)));
        }
        Ok((&hessian + &hessian.t()) / 2.0)
    }

    /// Runs BFGS from `start` (free values) and returns the optimum.
    pub fn maximize(
        &self,
        start: &Array1<f64>,
        config: &EstimationConfig,
    ) -> Result<Optimum, EstimationError> {
        let initial_theta = self.to_internal(start)?;
        let scale = 1.0 / self.total_weight();

        let cost_and_grad = |theta: &Array1<f64>| -> (f64, Array1<f64>) {
            let (values, jacobian) = self.to_external(theta);
            match self.log_likelihood_and_gradient(&values) {
                Ok((ll, grad)) if ll.is_finite() => (-ll * scale, -(grad * &jacobian) * scale),
                Ok((ll, _)) => {
                    log::warn!("Non-finite log-likelihood encountered: {}, returning large finite value", ll);
                    (1e10, Array1::zeros(theta.len()))
                }
                Err(e) => {
                    log::warn!("Log-likelihood evaluation failed: {:?}, returning large finite value", e);
                    (1e10, Array1::zeros(theta.len()))
                }
            }
        };

        let BfgsSolution {
            final_point,
            iterations,
            ..
        } = Bfgs::new(initial_theta, cost_and_grad)
            .with_tolerance(config.tolerance)
            .with_max_iterations(config.max_iterations)
            .run()
            .map_err(|e| EstimationError::OptimizationFailed(format!("BFGS failed: {:?}", e)))?;

        let (free_values, _) = self.to_external(&final_point);
        let (log_likelihood, gradient) = self.log_likelihood_and_gradient(&free_values)?;
        Ok(Optimum {
            free_values,
            log_likelihood,
            gradient,
            iterations,
        })
    }
}

/// Point reached by the optimizer.
#[derive(Debug, Clone)]
pub struct Optimum {
    pub free_values: Array1<f64>,
    pub log_likelihood: f64,
    pub gradient: Array1<f64>,
    pub iterations: usize,
}

/// Two-sided normal p-value of a t statistic.
pub fn p_value(t: f64) -> f64 {
    if t.is_nan() {
        return f64::NAN;
    }
    erfc(t.abs() / std::f64::consts::SQRT_2)
}

/// Estimates the model on the database, which must already be prepared.
pub fn estimate(
    model: &ModelSpecification,
    database: &Database,
    config: &EstimationConfig,
) -> Result<EstimationResults, EstimationError> {
    let problem = LikelihoodProblem::new(model, database, config.weighted)?;
    let k = problem.n_free();
    let n = problem.n_rows();
    log::info!(
        "Estimating {} with {} free parameters on {} observations{}.",
        model.kind,
        k,
        n,
        if config.weighted { " (weighted)" } else { "" }
    );

    let start = problem.free_values(&model.parameters.start_values());
    let init_ll = problem.log_likelihood(&start)?;
    if !init_ll.is_finite() {
        return Err(EstimationError::NonFiniteInitialLikelihood(init_ll));
    }
    log::info!("Initial log-likelihood: {:.6}", init_ll);

    let optimum = problem.maximize(&start, config)?;
    log::info!(
        "BFGS converged in {} iterations, final log-likelihood {:.6}",
        optimum.iterations,
        optimum.log_likelihood
    );

    let hessian = problem.hessian(&optimum.free_values, config.hessian_step)?;
    let (covariance, eigenvalues) = symmetric_pseudo_inverse(&(-&hessian), SINGULARITY_TOLERANCE)?;
    let scores = problem.scores(&optimum.free_values)?;
    let bhhh = scores.t().dot(&scores);
    let robust = covariance.dot(&bhhh).dot(&covariance);

    let draws = if config.bootstrap_draws > 0 {
        bootstrap(model, database, config, &optimum.free_values)?
    } else {
        Vec::new()
    };
    let bootstrap_std = bootstrap_std_errors(&draws, k);

    let parameters = problem
        .free
        .iter()
        .enumerate()
        .map(|(j, &id)| {
            let value = optimum.free_values[j];
            let name = model
                .parameters
                .get(id)
                .map_or_else(String::new, |b| b.name.clone());
            if problem.transforms[j].near_bound(value) {
                log::warn!(
                    "Parameter '{}' = {:.6} finished at a bound; its standard errors ignore the active constraint.",
                    name,
                    value
                );
            }
            let std_err = covariance[(j, j)].max(0.0).sqrt();
            let robust_std_err = robust[(j, j)].max(0.0).sqrt();
            let t_test = value / std_err;
            let robust_t_test = value / robust_std_err;
            let bootstrap_std_err = bootstrap_std.as_ref().map(|s| s[j]);
            ParameterEstimate {
                name,
                value,
                std_err,
                t_test,
                p_value: p_value(t_test),
                robust_std_err,
                robust_t_test,
                robust_p_value: p_value(robust_t_test),
                bootstrap_std_err,
                bootstrap_p_value: bootstrap_std_err.map(|s| p_value(value / s)),
            }
        })
        .collect();

    let null_ll = models::null_log_likelihood(model, problem.weights.as_ref(), n);
    let final_ll = optimum.log_likelihood;
    let kf = k as f64;
    let statistics = GeneralStatistics {
        n_parameters: k,
        sample_size: n,
        excluded_observations: 0,
        init_log_likelihood: init_ll,
        final_log_likelihood: final_ll,
        null_log_likelihood: null_ll,
        likelihood_ratio: -2.0 * (init_ll - final_ll),
        rho_square: 1.0 - final_ll / init_ll,
        rho_bar_square: 1.0 - (final_ll - kf) / init_ll,
        rho_square_null: 1.0 - final_ll / null_ll,
        rho_bar_square_null: 1.0 - (final_ll - kf) / null_ll,
        akaike: 2.0 * kf - 2.0 * final_ll,
        bayesian: kf * (n as f64).ln() - 2.0 * final_ll,
        final_gradient_norm: optimum.gradient.dot(&optimum.gradient).sqrt(),
        iterations: optimum.iterations,
        smallest_eigenvalue: eigenvalues.first().copied().unwrap_or(f64::NAN),
        largest_eigenvalue: eigenvalues.last().copied().unwrap_or(f64::NAN),
        bootstrap_draws: draws.len(),
        weighted: config.weighted,
    };

    Ok(EstimationResults {
        model: model.kind,
        robust_covariance: robust.rows().into_iter().map(|r| r.to_vec()).collect(),
        bootstrap: draws,
        statistics,
        parameters,
    })
}

/// Re-estimates the model on `config.bootstrap_draws` resampled replicas,
/// starting each run from `start`. Replica `r` is drawn with seed `config.seed + r`.
///
/// In weighted estimation every replica is post-stratified again against the
/// census shares implied by the full sample's weights, so replica weights sum
/// to the replica size.
pub fn bootstrap(
    model: &ModelSpecification,
    database: &Database,
    config: &EstimationConfig,
    start: &Array1<f64>,
) -> Result<Vec<Vec<f64>>, EstimationError> {
    let draws = config.bootstrap_draws;
    let n = database.n_rows();
    log::info!("Bootstrapping {} replicas of {} observations.", draws, n);
    let census = if config.weighted {
        Some(weights::implied_census(database)?)
    } else {
        None
    };

    let pb = ProgressBar::new(draws as u64);
    if let Ok(style) = ProgressStyle::with_template(
        "\n> [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
    ) {
        pb.set_style(style.progress_chars("█▉▊▋▌▍▎▏  "));
    }
    pb.set_message("bootstrap");

    let results: Vec<Vec<f64>> = (0..draws)
        .into_par_iter()
        .filter_map(|r| {
            let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(r as u64));
            let rows: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
            let outcome = fit_replica(model, database, &rows, census.as_ref(), start, config);
            pb.inc(1);
            match outcome {
                Ok(optimum) => Some(optimum.free_values.to_vec()),
                Err(e) => {
                    log::warn!("Bootstrap replica {} failed: {}", r, e);
                    None
                }
            }
        })
        .collect();
    pb.finish_with_message("bootstrap done");

    if results.is_empty() {
        return Err(EstimationError::BootstrapFailed(draws));
    }
    Ok(results)
}

fn fit_replica(
    model: &ModelSpecification,
    database: &Database,
    rows: &[usize],
    census: Option<&weights::CensusTotals>,
    start: &Array1<f64>,
    config: &EstimationConfig,
) -> Result<Optimum, EstimationError> {
    let mut replica = database.resample(rows);
    if let Some(census) = census {
        weights::reweight(&mut replica, census)?;
    }
    LikelihoodProblem::new(model, &replica, config.weighted)?.maximize(start, config)
}

/// Sample standard deviation of each coordinate over the draws.
fn bootstrap_std_errors(draws: &[Vec<f64>], k: usize) -> Option<Vec<f64>> {
    if draws.len() < 2 {
        return None;
    }
    let m = draws.len() as f64;
    Some(
        (0..k)
            .map(|j| {
                let mean = draws.iter().map(|d| d[j]).sum::<f64>() / m;
                let var = draws.iter().map(|d| (d[j] - mean).powi(2)).sum::<f64>() / (m - 1.0);
                var.sqrt()
            })
            .collect(),
    )
}

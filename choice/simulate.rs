//! # Forecasting
//!
//! Simulation of an estimated model over the sample: choice probabilities,
//! weighted market shares, values of time and cost elasticities. All
//! quantities are computed row-parallel for a given beta vector; confidence
//! intervals repeat the simulation for every beta draw and take per-row
//! quantiles, the way sensitivity analysis is usually reported for discrete
//! choice models.

use crate::choice::data::{DataError, Database, schema};
use crate::choice::expression::{EvalContext, ExpressionError, Seed};
use crate::choice::models::{self, ModelError};
use crate::choice::specification::{Alternative, COST_PARAMETER, ModelSpecification};
use ndarray::{Array1, Array2, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SimulationError {
    #[error(transparent)]
    Data(#[from] DataError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Expression(#[from] ExpressionError),
    #[error("Failed to write the simulation table: {0}")]
    Csv(#[from] csv::Error),
    #[error("Failed to write the simulation table: {0}")]
    Io(#[from] std::io::Error),
    #[error("Confidence level must lie strictly between 0 and 1, got {0}.")]
    InvalidLevel(f64),
    #[error("At least one beta draw is required to compute confidence intervals.")]
    NoDraws,
    #[error("Scenario factor must be positive and different from 1, got {0}.")]
    InvalidFactor(f64),
    #[error("Variable '{variable}' does not enter the utility of {alternative}.")]
    VariableNotInUtility {
        variable: String,
        alternative: Alternative,
    },
    #[error("The total weight of the sample is zero.")]
    ZeroTotalWeight,
}

/// Weighted share of each alternative, in `Alternative::index` order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarketShares {
    pub shares: [f64; 4],
}

impl MarketShares {
    pub fn share(&self, alternative: Alternative) -> f64 {
        self.shares[alternative.index()]
    }

    /// Mean over rows of `weight × probability`, per alternative.
    pub fn from_probabilities(probabilities: &Array2<f64>, weights: &Array1<f64>) -> Self {
        let mut shares = [0.0; 4];
        let n = probabilities.nrows().max(1) as f64;
        for (j, column) in probabilities.axis_iter(Axis(1)).enumerate().take(4) {
            shares[j] = column.dot(weights) / n;
        }
        Self { shares }
    }
}

/// A point value with the bounds of its confidence interval.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Interval {
    pub value: f64,
    pub lower: f64,
    pub upper: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValueOfTime {
    pub alternative: Alternative,
    /// Weighted mean, in cost units per duration unit (GBP/hour on the survey data).
    pub value: f64,
}

/// Aggregate elasticity of the probability of one alternative with respect
/// to the cost of another (or the same) alternative.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Elasticity {
    pub cost_of: Alternative,
    pub probability_of: Alternative,
    /// `Σ w P E / Σ w P`.
    pub aggregate: f64,
    /// `Σ w P`.
    pub normalizing_factor: f64,
}

impl Elasticity {
    pub fn is_direct(&self) -> bool {
        self.cost_of == self.probability_of
    }
}

/// The `Weight` column; weights must have been applied beforehand.
pub fn sample_weights(database: &Database) -> Result<Array1<f64>, SimulationError> {
    database.require([schema::WEIGHT])?;
    Ok(database.column(schema::WEIGHT)?.to_owned())
}

fn collect_rows(rows: Vec<Vec<f64>>, width: usize) -> Array2<f64> {
    let mut out = Array2::zeros((rows.len(), width));
    for (mut target, row) in out.rows_mut().into_iter().zip(rows) {
        for (t, v) in target.iter_mut().zip(row) {
            *t = v;
        }
    }
    out
}

/// Choice probabilities of every row, one column per alternative.
pub fn simulate_probabilities(
    model: &ModelSpecification,
    database: &Database,
    betas: &[f64],
) -> Result<Array2<f64>, SimulationError> {
    let rows = (0..database.n_rows())
        .into_par_iter()
        .map(|row| models::probabilities(model, database, row, betas))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(collect_rows(rows, Alternative::ALL.len()))
}

pub fn market_shares(
    model: &ModelSpecification,
    database: &Database,
    betas: &[f64],
) -> Result<MarketShares, SimulationError> {
    let weights = sample_weights(database)?;
    let probabilities = simulate_probabilities(model, database, betas)?;
    Ok(MarketShares::from_probabilities(&probabilities, &weights))
}

/// Weighted shares of the choices observed in `travel_mode`.
pub fn actual_market_shares(database: &Database) -> Result<MarketShares, SimulationError> {
    database.require([schema::TRAVEL_MODE])?;
    let weights = sample_weights(database)?;
    let modes = database.column(schema::TRAVEL_MODE)?;
    let total = weights.sum();
    if total == 0.0 {
        return Err(SimulationError::ZeroTotalWeight);
    }
    let mut shares = [0.0; 4];
    for (row, (&mode, &w)) in modes.iter().zip(weights.iter()).enumerate() {
        let alternative =
            Alternative::from_code(mode).ok_or(ModelError::UnknownChoice { row, code: mode })?;
        shares[alternative.index()] += w / total;
    }
    Ok(MarketShares { shares })
}

/// Linear-interpolation quantile of sorted values.
pub fn quantile(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => f64::NAN,
        1 => sorted[0],
        n => {
            let position = q.clamp(0.0, 1.0) * (n - 1) as f64;
            let below = position.floor() as usize;
            let above = position.ceil() as usize;
            let fraction = position - below as f64;
            sorted[below] + fraction * (sorted[above] - sorted[below])
        }
    }
}

/// Per-row, per-column quantiles at `(1 - level)/2` and `(1 + level)/2` over the draws.
pub fn per_row_quantiles(
    simulations: &[Array2<f64>],
    level: f64,
) -> Result<(Array2<f64>, Array2<f64>), SimulationError> {
    if !(level > 0.0 && level < 1.0) {
        return Err(SimulationError::InvalidLevel(level));
    }
    let first = simulations.first().ok_or(SimulationError::NoDraws)?;
    let (rows, cols) = first.dim();
    let mut lower = Array2::zeros((rows, cols));
    let mut upper = Array2::zeros((rows, cols));
    let mut values = Vec::with_capacity(simulations.len());
    for i in 0..rows {
        for j in 0..cols {
            values.clear();
            values.extend(simulations.iter().map(|s| s[(i, j)]));
            values.sort_by(|a, b| a.total_cmp(b));
            lower[(i, j)] = quantile(&values, (1.0 - level) / 2.0);
            upper[(i, j)] = quantile(&values, (1.0 + level) / 2.0);
        }
    }
    Ok((lower, upper))
}

/// Market shares with confidence intervals from simulations at every beta draw.
pub fn market_share_intervals(
    model: &ModelSpecification,
    database: &Database,
    betas: &[f64],
    draws: &[Vec<f64>],
    level: f64,
) -> Result<[Interval; 4], SimulationError> {
    if draws.is_empty() {
        return Err(SimulationError::NoDraws);
    }
    let weights = sample_weights(database)?;
    let point = MarketShares::from_probabilities(
        &simulate_probabilities(model, database, betas)?,
        &weights,
    );
    log::info!("Simulating {} beta draws for confidence intervals.", draws.len());
    let simulations = draws
        .iter()
        .map(|draw| simulate_probabilities(model, database, draw))
        .collect::<Result<Vec<_>, _>>()?;
    let (left, right) = per_row_quantiles(&simulations, level)?;
    let lower = MarketShares::from_probabilities(&left, &weights);
    let upper = MarketShares::from_probabilities(&right, &weights);
    Ok(std::array::from_fn(|j| Interval {
        value: point.shares[j],
        lower: lower.shares[j],
        upper: upper.shares[j],
    }))
}

/// Derivative of the log-probabilities of every row with respect to one data column.
fn log_probability_derivatives(
    model: &ModelSpecification,
    database: &Database,
    betas: &[f64],
    variable: &str,
) -> Result<Array2<f64>, SimulationError> {
    let rows = (0..database.n_rows())
        .into_par_iter()
        .map(|row| {
            let ctx = EvalContext {
                database,
                row,
                betas,
                seed: Seed::Variable(variable),
            };
            models::log_probabilities(model, &ctx)
                .map(|lp| lp.iter().map(|d| d.tangent[0]).collect::<Vec<f64>>())
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(collect_rows(rows, Alternative::ALL.len()))
}

/// Point elasticities `∂P_i/∂x · x / P_i` of every row and alternative.
pub fn point_elasticities(
    model: &ModelSpecification,
    database: &Database,
    betas: &[f64],
    variable: &str,
) -> Result<Array2<f64>, SimulationError> {
    let mut derivatives = log_probability_derivatives(model, database, betas, variable)?;
    let x = database.column(variable)?;
    for (mut row, &value) in derivatives.rows_mut().into_iter().zip(x.iter()) {
        row *= value;
    }
    Ok(derivatives)
}

/// Direct and cross aggregate elasticities with respect to each cost variable.
pub fn aggregate_elasticities(
    model: &ModelSpecification,
    database: &Database,
    betas: &[f64],
) -> Result<Vec<Elasticity>, SimulationError> {
    let weights = sample_weights(database)?;
    let probabilities = simulate_probabilities(model, database, betas)?;
    let mut out = Vec::new();
    for cost_of in Alternative::ALL {
        let Some(variable) = cost_of.cost_variable() else {
            continue;
        };
        let elasticities = point_elasticities(model, database, betas, variable)?;
        for probability_of in Alternative::ALL {
            let j = probability_of.index();
            let weighted_p = &probabilities.column(j) * &weights;
            let normalizing_factor = weighted_p.sum();
            let aggregate = weighted_p.dot(&elasticities.column(j)) / normalizing_factor;
            out.push(Elasticity {
                cost_of,
                probability_of,
                aggregate,
                normalizing_factor,
            });
        }
    }
    Ok(out)
}

/// Per-row value of time `(∂V/∂duration) / B_COST` of one alternative.
pub fn values_of_time(
    model: &ModelSpecification,
    database: &Database,
    betas: &[f64],
    alternative: Alternative,
) -> Result<Array1<f64>, SimulationError> {
    let cost_id = model.parameters.id_of(COST_PARAMETER)?;
    let cost = *betas
        .get(cost_id)
        .ok_or(ExpressionError::ParameterCountMismatch {
            found: betas.len(),
            expected: cost_id + 1,
        })?;
    let utility = model.utility(alternative);
    let variable = alternative.duration_variable();
    (0..database.n_rows())
        .into_par_iter()
        .map(|row| -> Result<f64, SimulationError> {
            let ctx = EvalContext {
                database,
                row,
                betas,
                seed: Seed::Variable(variable),
            };
            Ok(utility.eval(&ctx)?.tangent[0] / cost)
        })
        .collect::<Result<Vec<f64>, SimulationError>>()
        .map(Array1::from)
}

/// Weighted mean value of time of the alternatives that carry a cost.
pub fn value_of_time(
    model: &ModelSpecification,
    database: &Database,
    betas: &[f64],
) -> Result<Vec<ValueOfTime>, SimulationError> {
    let weights = sample_weights(database)?;
    let n = database.n_rows().max(1) as f64;
    Alternative::ALL
        .into_iter()
        .filter(|alt| alt.cost_variable().is_some())
        .map(|alternative| -> Result<ValueOfTime, SimulationError> {
            let vot = values_of_time(model, database, betas, alternative)?;
            Ok(ValueOfTime {
                alternative,
                value: vot.dot(&weights) / n,
            })
        })
        .collect()
}

/// Named per-row simulated quantities.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationTable {
    pub columns: Vec<String>,
    pub values: Array2<f64>,
}

impl SimulationTable {
    /// Weight, probabilities, values of time, elasticities and weighted probabilities of every row.
    pub fn simulate(
        model: &ModelSpecification,
        database: &Database,
        betas: &[f64],
    ) -> Result<Self, SimulationError> {
        let weights = sample_weights(database)?;
        let probabilities = simulate_probabilities(model, database, betas)?;
        let mut columns = vec![schema::WEIGHT.to_string()];
        let mut blocks: Vec<Array1<f64>> = vec![weights.clone()];

        for alt in Alternative::ALL {
            columns.push(format!("Prob. {}", alt.label()));
            blocks.push(probabilities.column(alt.index()).to_owned());
        }
        for alt in Alternative::ALL.into_iter().filter(|a| a.cost_variable().is_some()) {
            columns.push(format!("VOT {}", alt.label()));
            blocks.push(values_of_time(model, database, betas, alt)?);
        }
        for cost_of in Alternative::ALL {
            let Some(variable) = cost_of.cost_variable() else {
                continue;
            };
            let elasticities = point_elasticities(model, database, betas, variable)?;
            for probability_of in Alternative::ALL {
                columns.push(if cost_of == probability_of {
                    format!("Elast. dir. {}", cost_of.label())
                } else {
                    format!("Elast. cross {}-{}", cost_of.label(), probability_of.label())
                });
                blocks.push(elasticities.column(probability_of.index()).to_owned());
            }
        }
        for alt in Alternative::ALL {
            columns.push(format!("Weighted prob. {}", alt.label()));
            blocks.push(&probabilities.column(alt.index()) * &weights);
        }

        let mut values = Array2::zeros((database.n_rows(), blocks.len()));
        for (mut target, block) in values.columns_mut().into_iter().zip(&blocks) {
            target.assign(block);
        }
        Ok(Self { columns, values })
    }

    pub fn column(&self, name: &str) -> Option<ndarray::ArrayView1<'_, f64>> {
        self.columns
            .iter()
            .position(|c| c == name)
            .map(|j| self.values.column(j))
    }

    pub fn write_csv(&self, path: &Path) -> Result<(), SimulationError> {
        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record(&self.columns)?;
        for row in self.values.rows() {
            writer.write_record(row.iter().map(|v| v.to_string()))?;
        }
        writer.flush()?;
        log::info!("Simulated values written to '{}'", path.display());
        Ok(())
    }
}

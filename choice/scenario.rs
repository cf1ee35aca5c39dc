//! # Policy Scenarios
//!
//! A scenario multiplies one variable inside the utility of one alternative,
//! for instance a 15% fare reduction on public transport, and the model is
//! re-simulated with the estimated betas. The shift in market shares is
//! summarised as an arc elasticity per alternative.

use crate::choice::data::{Database, schema};
use crate::choice::simulate::{self, MarketShares, SimulationError};
use crate::choice::specification::{Alternative, ModelSpecification};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub alternative: Alternative,
    pub variable: String,
    pub factor: f64,
}

impl Scenario {
    pub fn new(alternative: Alternative, variable: &str, factor: f64) -> Self {
        Self {
            alternative,
            variable: variable.to_string(),
            factor,
        }
    }

    /// Transit fares down 15% and car costs up 15%.
    pub fn defaults() -> Vec<Scenario> {
        vec![
            Scenario::new(Alternative::Pt, schema::COST_TRANSIT, 0.85),
            Scenario::new(Alternative::Car, schema::COST_DRIVING, 1.15),
        ]
    }

    pub fn validate(&self, model: &ModelSpecification) -> Result<(), SimulationError> {
        if !(self.factor > 0.0) || self.factor == 1.0 || !self.factor.is_finite() {
            return Err(SimulationError::InvalidFactor(self.factor));
        }
        if !model
            .utility(self.alternative)
            .variables()
            .contains(&self.variable)
        {
            return Err(SimulationError::VariableNotInUtility {
                variable: self.variable.clone(),
                alternative: self.alternative,
            });
        }
        Ok(())
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let change = if self.factor < 1.0 { "decrease" } else { "increase" };
        write!(
            f,
            "{} of {} {} by {:.0}%",
            change,
            self.alternative.label(),
            self.variable,
            (self.factor - 1.0).abs() * 100.0
        )
    }
}

/// `ln(share_scenario / share_base) / ln(factor)`.
pub fn arc_elasticity(base_share: f64, scenario_share: f64, factor: f64) -> f64 {
    (scenario_share / base_share).ln() / factor.ln()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioOutcome {
    pub scenario: Scenario,
    pub shares: MarketShares,
    pub arc_elasticities: [f64; 4],
}

/// Market shares under the scenario and the arc elasticities relative to `base`.
pub fn run_scenario(
    model: &ModelSpecification,
    database: &Database,
    betas: &[f64],
    base: &MarketShares,
    scenario: &Scenario,
) -> Result<ScenarioOutcome, SimulationError> {
    scenario.validate(model)?;
    log::info!("Simulating scenario: {}", scenario);
    let scenario_model = model.with_scenario(scenario);
    let shares = simulate::market_shares(&scenario_model, database, betas)?;
    let arc_elasticities = std::array::from_fn(|j| {
        arc_elasticity(base.shares[j], shares.shares[j], scenario.factor)
    });
    Ok(ScenarioOutcome {
        scenario: scenario.clone(),
        shares,
        arc_elasticities,
    })
}

/// Everything reported by a forecasting run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    pub base: MarketShares,
    pub intervals: Option<[simulate::Interval; 4]>,
    pub confidence_level: f64,
    pub actual: MarketShares,
    pub values_of_time: Vec<simulate::ValueOfTime>,
    pub elasticities: Vec<simulate::Elasticity>,
    pub scenarios: Vec<ScenarioOutcome>,
}

/// Sensitivity analysis inputs: beta draws and the confidence level.
pub struct Sensitivity<'a> {
    pub draws: &'a [Vec<f64>],
    pub level: f64,
}

/// Runs the full forecasting pass: base shares (with intervals when draws are
/// given), observed shares, values of time, elasticities and every scenario.
pub fn forecast(
    model: &ModelSpecification,
    database: &Database,
    betas: &[f64],
    scenarios: &[Scenario],
    sensitivity: Option<Sensitivity<'_>>,
) -> Result<Forecast, SimulationError> {
    let base = simulate::market_shares(model, database, betas)?;
    let (intervals, confidence_level) = match sensitivity {
        Some(s) => (
            Some(simulate::market_share_intervals(
                model, database, betas, s.draws, s.level,
            )?),
            s.level,
        ),
        None => (None, 0.0),
    };
    let outcomes = scenarios
        .iter()
        .map(|scenario| run_scenario(model, database, betas, &base, scenario))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Forecast {
        base,
        intervals,
        confidence_level,
        actual: simulate::actual_market_shares(database)?,
        values_of_time: simulate::value_of_time(model, database, betas)?,
        elasticities: simulate::aggregate_elasticities(model, database, betas)?,
        scenarios: outcomes,
    })
}

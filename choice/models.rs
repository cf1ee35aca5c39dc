//! # Choice Probabilities
//!
//! Logit and nested logit log-probabilities of the four alternatives on one
//! observation. Every quantity is a `Dual`, so the same code yields the
//! log-likelihood gradient during estimation and the derivatives with respect to
//! times and costs during simulation.

use crate::choice::data::{Database, schema};
use crate::choice::dual::Dual;
use crate::choice::expression::{EvalContext, ExpressionError, Seed};
use crate::choice::specification::{Alternative, ModelSpecification, Structure};
use ndarray::Array1;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error(transparent)]
    Expression(#[from] ExpressionError),
    #[error("Row {row}: chosen alternative {code} is not one of the codes 1-4.")]
    UnknownChoice { row: usize, code: f64 },
    #[error("Row {row}: chosen alternative {alternative} is not available.")]
    UnavailableChoice { row: usize, alternative: Alternative },
    #[error("Row {row}: no alternative is available.")]
    NoAvailableAlternative { row: usize },
    #[error("Nest scale must be positive, got {0}.")]
    InvalidNestScale(f64),
}

/// `ln Σ exp(x_j)` over the finite entries, shifted by the maximum for stability.
pub fn log_sum_exp(values: &[f64]) -> f64 {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    max + values.iter().map(|v| (v - max).exp()).sum::<f64>().ln()
}

/// Dual version of `log_sum_exp`; the tangent is the softmax-weighted tangent sum.
pub fn dual_log_sum_exp(values: &[&Dual]) -> Dual {
    let dim = values.first().map_or(0, |v| v.dim());
    let max = values
        .iter()
        .map(|v| v.value)
        .fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return Dual::constant(max, dim);
    }
    let shares: Vec<f64> = values.iter().map(|v| (v.value - max).exp()).collect();
    let total: f64 = shares.iter().sum();
    let mut tangent = Array1::zeros(dim);
    for (v, share) in values.iter().zip(&shares) {
        tangent.scaled_add(share / total, &v.tangent);
    }
    Dual {
        value: max + total.ln(),
        tangent,
    }
}

/// Multinomial logit log-probabilities; unavailable alternatives get `-inf`.
pub fn logit_log_probabilities(utilities: &[Dual], availability: &[bool]) -> Vec<Dual> {
    let dim = utilities.first().map_or(0, Dual::dim);
    let available: Vec<&Dual> = utilities
        .iter()
        .zip(availability)
        .filter(|(_, av)| **av)
        .map(|(v, _)| v)
        .collect();
    let denominator = dual_log_sum_exp(&available);
    utilities
        .iter()
        .zip(availability)
        .map(|(v, &av)| {
            if av {
                v - &denominator
            } else {
                Dual::constant(f64::NEG_INFINITY, dim)
            }
        })
        .collect()
}

/// Nested logit log-probabilities.
///
/// With `ln y_m = ln Σ_{j in m} exp(μ_m V_j)` the probability of `i` in nest `m` is
/// `log P_i = μ_m V_i - ln y_m + ln y_m / μ_m - ln Σ_k exp(ln y_k / μ_k)`.
/// `nests` pairs each scale with the indices of its members; every alternative
/// must belong to exactly one nest.
pub fn nested_log_probabilities(
    utilities: &[Dual],
    availability: &[bool],
    nests: &[(Dual, Vec<usize>)],
) -> Result<Vec<Dual>, ModelError> {
    let dim = utilities.first().map_or(0, Dual::dim);
    let mut log_probabilities = vec![Dual::constant(f64::NEG_INFINITY, dim); utilities.len()];
    let mut nest_terms = Vec::with_capacity(nests.len());
    let mut within = Vec::with_capacity(nests.len());

    for (scale, members) in nests {
        if scale.value <= 0.0 || !scale.value.is_finite() {
            return Err(ModelError::InvalidNestScale(scale.value));
        }
        let scaled: Vec<(usize, Dual)> = members
            .iter()
            .filter(|&&i| availability[i])
            .map(|&i| (i, scale * &utilities[i]))
            .collect();
        if scaled.is_empty() {
            continue;
        }
        let log_y = dual_log_sum_exp(&scaled.iter().map(|(_, d)| d).collect::<Vec<_>>());
        nest_terms.push(&log_y / scale);
        within.push((scaled, log_y, nest_terms.len() - 1));
    }

    let denominator = dual_log_sum_exp(&nest_terms.iter().collect::<Vec<_>>());
    for (scaled, log_y, term) in within {
        let nest_part = &nest_terms[term] - &denominator;
        for (i, scaled_utility) in scaled {
            log_probabilities[i] = &(&scaled_utility - &log_y) + &nest_part;
        }
    }
    Ok(log_probabilities)
}

/// Evaluates the log-probabilities of all alternatives on one observation.
pub fn log_probabilities(
    model: &ModelSpecification,
    ctx: &EvalContext<'_>,
) -> Result<Vec<Dual>, ModelError> {
    if !model.availability.iter().any(|&av| av) {
        return Err(ModelError::NoAvailableAlternative { row: ctx.row });
    }
    let utilities = model
        .utilities
        .iter()
        .map(|v| v.eval(ctx))
        .collect::<Result<Vec<_>, _>>()?;
    match &model.structure {
        Structure::Logit => Ok(logit_log_probabilities(&utilities, &model.availability)),
        Structure::Nested(nests) => {
            let mut groups = Vec::with_capacity(Alternative::ALL.len());
            let mut nested = [false; 4];
            for nest in nests {
                let members: Vec<usize> = nest.members.iter().map(|a| a.index()).collect();
                for &i in &members {
                    nested[i] = true;
                }
                groups.push((nest.scale.eval(ctx)?, members));
            }
            for alt in Alternative::ALL {
                if !nested[alt.index()] {
                    groups.push((Dual::constant(1.0, ctx.seed.dim()), vec![alt.index()]));
                }
            }
            nested_log_probabilities(&utilities, &model.availability, &groups)
        }
    }
}

/// The alternative recorded as chosen on `row`.
pub fn chosen_alternative(
    model: &ModelSpecification,
    database: &Database,
    row: usize,
) -> Result<Alternative, ModelError> {
    let code = database
        .value(schema::TRAVEL_MODE, row)
        .ok_or_else(|| ExpressionError::UnknownVariable(schema::TRAVEL_MODE.to_string()))?;
    let alternative =
        Alternative::from_code(code).ok_or(ModelError::UnknownChoice { row, code })?;
    if !model.availability[alternative.index()] {
        return Err(ModelError::UnavailableChoice { row, alternative });
    }
    Ok(alternative)
}

/// Log-probability of the observed choice on one row.
pub fn chosen_log_probability(
    model: &ModelSpecification,
    ctx: &EvalContext<'_>,
) -> Result<Dual, ModelError> {
    let chosen = chosen_alternative(model, ctx.database, ctx.row)?;
    let mut all = log_probabilities(model, ctx)?;
    Ok(all.swap_remove(chosen.index()))
}

/// Choice probabilities at `betas`, without derivatives.
pub fn probabilities(
    model: &ModelSpecification,
    database: &Database,
    row: usize,
    betas: &[f64],
) -> Result<Vec<f64>, ModelError> {
    let ctx = EvalContext {
        database,
        row,
        betas,
        seed: Seed::None,
    };
    Ok(log_probabilities(model, &ctx)?
        .iter()
        .map(|lp| lp.value.exp())
        .collect())
}

/// Log-likelihood of the model where every available alternative is equally likely.
pub fn null_log_likelihood(model: &ModelSpecification, weights: Option<&Array1<f64>>, n_rows: usize) -> f64 {
    let available = model.availability.iter().filter(|&&av| av).count() as f64;
    let total_weight = weights.map_or(n_rows as f64, |w| w.sum());
    -total_weight * available.ln()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::choice::specification::ModelKind;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn duals(values: &[f64]) -> Vec<Dual> {
        values
            .iter()
            .enumerate()
            .map(|(i, &v)| Dual::seeded(v, values.len(), i))
            .collect()
    }

    #[test]
    fn log_sum_exp_survives_large_inputs() {
        assert_abs_diff_eq!(log_sum_exp(&[1000.0, 1000.0]), 1000.0 + 2.0_f64.ln(), epsilon = 1e-9);
        assert_eq!(log_sum_exp(&[]), f64::NEG_INFINITY);
    }

    #[test]
    fn logit_probabilities_sum_to_one() {
        let v = duals(&[0.5, -1.0, 2.0, 0.0]);
        let lp = logit_log_probabilities(&v, &[true; 4]);
        let total: f64 = lp.iter().map(|d| d.value.exp()).sum();
        assert_abs_diff_eq!(total, 1.0, epsilon = 1e-12);
        // d log P_i / d V_i = 1 - P_i
        let p0 = lp[0].value.exp();
        assert_abs_diff_eq!(lp[0].tangent[0], 1.0 - p0, epsilon = 1e-12);
    }

    #[test]
    fn unavailable_alternatives_get_zero_probability() {
        let v = duals(&[0.5, -1.0, 2.0, 0.0]);
        let lp = logit_log_probabilities(&v, &[true, false, true, true]);
        assert_eq!(lp[1].value, f64::NEG_INFINITY);
        let total: f64 = lp.iter().map(|d| d.value.exp()).sum();
        assert_abs_diff_eq!(total, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn nested_with_unit_scales_equals_logit() {
        let v = duals(&[0.5, -1.0, 2.0, 0.0]);
        let one = Dual::constant(1.0, 4);
        let nests = vec![(one.clone(), vec![2, 3]), (one, vec![0, 1])];
        let nested = nested_log_probabilities(&v, &[true; 4], &nests).unwrap();
        let logit = logit_log_probabilities(&v, &[true; 4]);
        for (a, b) in nested.iter().zip(&logit) {
            assert_abs_diff_eq!(a.value, b.value, epsilon = 1e-12);
            for (ta, tb) in a.tangent.iter().zip(b.tangent.iter()) {
                assert_abs_diff_eq!(ta, tb, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn nested_probabilities_sum_to_one_and_match_closed_form() {
        let v = duals(&[0.5, -1.0, 2.0, 0.0]);
        let mu = 2.5;
        let nests = vec![
            (Dual::constant(mu, 4), vec![2, 3]),
            (Dual::constant(1.0, 4), vec![0, 1]),
        ];
        let lp = nested_log_probabilities(&v, &[true; 4], &nests).unwrap();
        let total: f64 = lp.iter().map(|d| d.value.exp()).sum();
        assert_abs_diff_eq!(total, 1.0, epsilon = 1e-12);

        // P(PT) = exp(mu V_pt) / y_m * y_m^(1/mu) / (y_m^(1/mu) + y_n)
        let y_m = (mu * 2.0_f64).exp() + (mu * 0.0_f64).exp();
        let y_n = 0.5_f64.exp() + (-1.0_f64).exp();
        let expected = (mu * 2.0_f64).exp() / y_m * y_m.powf(1.0 / mu) / (y_m.powf(1.0 / mu) + y_n);
        assert_abs_diff_eq!(lp[2].value.exp(), expected, epsilon = 1e-12);
    }

    #[test]
    fn nest_scale_derivative_matches_finite_differences() {
        let values = [0.5, -1.0, 2.0, 0.0];
        let log_probabilities = |mu: Dual| {
            let v: Vec<Dual> = values.iter().map(|&x| Dual::constant(x, 1)).collect();
            let nests = vec![(mu, vec![2, 3]), (Dual::constant(1.0, 1), vec![0, 1])];
            nested_log_probabilities(&v, &[true; 4], &nests).unwrap()
        };

        let mu = 2.5;
        let h = 1e-6;
        let analytic = log_probabilities(Dual::seeded(mu, 1, 0));
        let plus = log_probabilities(Dual::constant(mu + h, 1));
        let minus = log_probabilities(Dual::constant(mu - h, 1));
        for i in 0..values.len() {
            let numeric = (plus[i].value - minus[i].value) / (2.0 * h);
            assert_abs_diff_eq!(analytic[i].tangent[0], numeric, epsilon = 1e-7);
        }
        // the scale moves probability within the nest, so PT and car respond
        assert!(analytic[2].tangent[0].abs() > 1e-3);
    }

    #[test]
    fn nonpositive_scale_is_rejected() {
        let v = duals(&[0.0, 0.0]);
        let err = nested_log_probabilities(&v, &[true, true], &[(Dual::constant(0.0, 2), vec![0, 1])]);
        assert!(matches!(err, Err(ModelError::InvalidNestScale(_))));
    }

    #[test]
    fn unknown_choice_code_is_reported() {
        let model = ModelSpecification::build(ModelKind::Model0).unwrap();
        let db = Database::from_columns("t", vec![("travel_mode".to_string(), array![7.0])]).unwrap();
        assert!(matches!(
            chosen_alternative(&model, &db, 0),
            Err(ModelError::UnknownChoice { row: 0, .. })
        ));
    }

    #[test]
    fn null_log_likelihood_uses_the_number_of_alternatives() {
        let model = ModelSpecification::build(ModelKind::Model0).unwrap();
        assert_abs_diff_eq!(
            null_log_likelihood(&model, None, 10),
            -10.0 * 4.0_f64.ln(),
            epsilon = 1e-12
        );
    }
}

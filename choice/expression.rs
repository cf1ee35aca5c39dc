//! # Utility Expressions
//!
//! Symbolic building blocks for utility functions: data columns, unknown
//! coefficients ("betas"), arithmetic, and the two non-linear constructs the
//! mode choice models rely on (Box-Cox transforms and discrete segmentation).
//!
//! Expressions are evaluated row by row on `Dual` numbers. The seed decides
//! which derivatives travel with the value:
//!
//! - `Seed::None`: plain evaluation, empty tangent.
//! - `Seed::Parameters`: one tangent slot per free beta, used by the likelihood.
//! - `Seed::Variable`: a single slot for one data column, used to differentiate
//!   utilities and probabilities with respect to times and costs.

use crate::choice::data::Database;
use crate::choice::dual::Dual;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt::Write as _;
use std::ops::{Add, Div, Mul, Neg, Sub};
use thiserror::Error;

/// Below this magnitude the Box-Cox parameter is treated as zero and the
/// transform falls back to its logarithmic limit.
pub const BOX_COX_LAMBDA_EPSILON: f64 = 1e-5;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExpressionError {
    #[error("Variable '{0}' is not a column of the database.")]
    UnknownVariable(String),
    #[error("Parameter '{0}' has not been declared.")]
    UnknownParameter(String),
    #[error("Parameter '{name}' is declared twice with different settings.")]
    ConflictingParameter { name: String },
    #[error("Row {row} is out of range for a database of {rows} rows.")]
    RowOutOfRange { row: usize, rows: usize },
    #[error("Parameter vector has {found} entries, but {expected} parameters are declared.")]
    ParameterCountMismatch { found: usize, expected: usize },
    #[error("Segmentation on '{0}' has no levels.")]
    EmptySegmentation(String),
}

/// An unknown coefficient of the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Beta {
    pub name: String,
    pub start: f64,
    pub lower: Option<f64>,
    pub upper: Option<f64>,
    /// Fixed betas keep their start value and are not estimated.
    pub fixed: bool,
}

/// The ordered registry of all betas of a model. Expressions refer to betas by
/// their index in this set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterSet {
    betas: Vec<Beta>,
    index: HashMap<String, usize>,
}

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a free, unbounded beta.
    pub fn free(&mut self, name: &str, start: f64) -> Result<Expr, ExpressionError> {
        self.declare(Beta {
            name: name.to_string(),
            start,
            lower: None,
            upper: None,
            fixed: false,
        })
    }

    /// Declares a beta held at `value` for identification.
    pub fn fixed(&mut self, name: &str, value: f64) -> Result<Expr, ExpressionError> {
        self.declare(Beta {
            name: name.to_string(),
            start: value,
            lower: None,
            upper: None,
            fixed: true,
        })
    }

    /// Declares a free beta restricted to `[lower, upper]`.
    pub fn bounded(
        &mut self,
        name: &str,
        start: f64,
        lower: Option<f64>,
        upper: Option<f64>,
    ) -> Result<Expr, ExpressionError> {
        self.declare(Beta {
            name: name.to_string(),
            start,
            lower,
            upper,
            fixed: false,
        })
    }

    /// Registers a beta. Declaring the same beta twice returns the existing
    /// reference; declaring the same name with other settings is an error.
    pub fn declare(&mut self, beta: Beta) -> Result<Expr, ExpressionError> {
        if let Some(&id) = self.index.get(&beta.name) {
            if self.betas[id] != beta {
                return Err(ExpressionError::ConflictingParameter { name: beta.name });
            }
            return Ok(Expr::Parameter(id));
        }
        let id = self.betas.len();
        self.index.insert(beta.name.clone(), id);
        self.betas.push(beta);
        Ok(Expr::Parameter(id))
    }

    pub fn len(&self) -> usize {
        self.betas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.betas.is_empty()
    }

    pub fn get(&self, id: usize) -> Option<&Beta> {
        self.betas.get(id)
    }

    pub fn by_name(&self, name: &str) -> Result<&Beta, ExpressionError> {
        self.id_of(name).map(|id| &self.betas[id])
    }

    pub fn id_of(&self, name: &str) -> Result<usize, ExpressionError> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| ExpressionError::UnknownParameter(name.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Beta> {
        self.betas.iter()
    }

    /// Indices of the betas that are estimated, in declaration order.
    pub fn free_indices(&self) -> Vec<usize> {
        self.betas
            .iter()
            .enumerate()
            .filter(|(_, beta)| !beta.fixed)
            .map(|(id, _)| id)
            .collect()
    }

    /// Start values of every beta, fixed ones included.
    pub fn start_values(&self) -> Vec<f64> {
        self.betas.iter().map(|beta| beta.start).collect()
    }

    /// Maps each beta index to its tangent slot (free betas only).
    pub fn tangent_slots(&self) -> Vec<Option<usize>> {
        let mut next = 0;
        self.betas
            .iter()
            .map(|beta| {
                if beta.fixed {
                    None
                } else {
                    next += 1;
                    Some(next - 1)
                }
            })
            .collect()
    }
}

/// Which derivatives accompany an evaluation.
#[derive(Debug, Clone, Copy)]
pub enum Seed<'a> {
    None,
    /// Tangent slot per beta index (`None` for fixed betas) and the tangent length.
    Parameters { slots: &'a [Option<usize>], dim: usize },
    Variable(&'a str),
}

impl Seed<'_> {
    pub fn dim(&self) -> usize {
        match self {
            Seed::None => 0,
            Seed::Parameters { dim, .. } => *dim,
            Seed::Variable(_) => 1,
        }
    }
}

/// Everything an expression needs to evaluate on one observation.
#[derive(Debug, Clone, Copy)]
pub struct EvalContext<'a> {
    pub database: &'a Database,
    pub row: usize,
    pub betas: &'a [f64],
    pub seed: Seed<'a>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Constant(f64),
    Variable(String),
    Parameter(usize),
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    Div(Box<Expr>, Box<Expr>),
    Neg(Box<Expr>),
    Exp(Box<Expr>),
    Ln(Box<Expr>),
    Power(Box<Expr>, Box<Expr>),
    /// `(x^λ - 1) / λ`, with `ln x` as the `λ → 0` limit and `0` at `x = 0`.
    BoxCox { x: Box<Expr>, lambda: Box<Expr> },
    /// `1` if the inner expression equals the level, `0` otherwise.
    Equals(Box<Expr>, f64),
}

impl Expr {
    pub fn var(name: &str) -> Self {
        Expr::Variable(name.to_string())
    }

    pub fn constant(value: f64) -> Self {
        Expr::Constant(value)
    }

    pub fn exp(self) -> Self {
        Expr::Exp(Box::new(self))
    }

    pub fn ln(self) -> Self {
        Expr::Ln(Box::new(self))
    }

    pub fn pow(self, exponent: Expr) -> Self {
        Expr::Power(Box::new(self), Box::new(exponent))
    }

    pub fn equals(self, level: f64) -> Self {
        Expr::Equals(Box::new(self), level)
    }

    /// Sums a sequence of expressions; an empty sequence is the constant zero.
    pub fn sum<I: IntoIterator<Item = Expr>>(terms: I) -> Self {
        terms
            .into_iter()
            .reduce(|acc, term| acc + term)
            .unwrap_or(Expr::Constant(0.0))
    }

    /// Evaluates without derivatives.
    pub fn value(
        &self,
        database: &Database,
        row: usize,
        betas: &[f64],
    ) -> Result<f64, ExpressionError> {
        let ctx = EvalContext {
            database,
            row,
            betas,
            seed: Seed::None,
        };
        Ok(self.eval(&ctx)?.value)
    }

    /// Evaluates the expression on one row, carrying the derivatives selected by the seed.
    pub fn eval(&self, ctx: &EvalContext<'_>) -> Result<Dual, ExpressionError> {
        let dim = ctx.seed.dim();
        let result = match self {
            Expr::Constant(c) => Dual::constant(*c, dim),
            Expr::Variable(name) => {
                let rows = ctx.database.n_rows();
                if ctx.row >= rows {
                    return Err(ExpressionError::RowOutOfRange { row: ctx.row, rows });
                }
                let value = ctx
                    .database
                    .value(name, ctx.row)
                    .ok_or_else(|| ExpressionError::UnknownVariable(name.clone()))?;
                match ctx.seed {
                    Seed::Variable(target) if target == name => Dual::seeded(value, 1, 0),
                    _ => Dual::constant(value, dim),
                }
            }
            Expr::Parameter(id) => {
                let value =
                    *ctx.betas
                        .get(*id)
                        .ok_or(ExpressionError::ParameterCountMismatch {
                            found: ctx.betas.len(),
                            expected: *id + 1,
                        })?;
                match ctx.seed {
                    Seed::Parameters { slots, dim } => match slots.get(*id).copied().flatten() {
                        Some(slot) => Dual::seeded(value, dim, slot),
                        None => Dual::constant(value, dim),
                    },
                    _ => Dual::constant(value, dim),
                }
            }
            Expr::Add(a, b) => a.eval(ctx)? + b.eval(ctx)?,
            Expr::Sub(a, b) => a.eval(ctx)? - b.eval(ctx)?,
            Expr::Mul(a, b) => a.eval(ctx)? * b.eval(ctx)?,
            Expr::Div(a, b) => a.eval(ctx)? / b.eval(ctx)?,
            Expr::Neg(a) => -a.eval(ctx)?,
            Expr::Exp(a) => a.eval(ctx)?.exp(),
            Expr::Ln(a) => a.eval(ctx)?.ln(),
            Expr::Power(base, exponent) => base.eval(ctx)?.pow(&exponent.eval(ctx)?),
            Expr::BoxCox { x, lambda } => box_cox_dual(&x.eval(ctx)?, &lambda.eval(ctx)?),
            Expr::Equals(a, level) => {
                let inner = a.eval(ctx)?;
                Dual::constant(if inner.value == *level { 1.0 } else { 0.0 }, dim)
            }
        };
        Ok(result)
    }

    /// Names of the data columns the expression reads.
    pub fn variables(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.visit(&mut |expr| {
            if let Expr::Variable(name) = expr {
                out.insert(name.clone());
            }
        });
        out
    }

    /// Indices of the betas the expression references.
    pub fn parameters(&self) -> BTreeSet<usize> {
        let mut out = BTreeSet::new();
        self.visit(&mut |expr| {
            if let Expr::Parameter(id) = expr {
                out.insert(*id);
            }
        });
        out
    }

    fn visit<F: FnMut(&Expr)>(&self, f: &mut F) {
        f(self);
        match self {
            Expr::Constant(_) | Expr::Variable(_) | Expr::Parameter(_) => {}
            Expr::Add(a, b)
            | Expr::Sub(a, b)
            | Expr::Mul(a, b)
            | Expr::Div(a, b)
            | Expr::Power(a, b) => {
                a.visit(f);
                b.visit(f);
            }
            Expr::BoxCox { x, lambda } => {
                x.visit(f);
                lambda.visit(f);
            }
            Expr::Neg(a) | Expr::Exp(a) | Expr::Ln(a) | Expr::Equals(a, _) => a.visit(f),
        }
    }

    /// Returns a copy where every occurrence of the column `name` is multiplied by `factor`.
    pub fn scale_variable(&self, name: &str, factor: f64) -> Expr {
        let rec = |e: &Expr| Box::new(e.scale_variable(name, factor));
        match self {
            Expr::Variable(v) if v == name => Expr::Constant(factor) * self.clone(),
            Expr::Constant(_) | Expr::Variable(_) | Expr::Parameter(_) => self.clone(),
            Expr::Add(a, b) => Expr::Add(rec(a), rec(b)),
            Expr::Sub(a, b) => Expr::Sub(rec(a), rec(b)),
            Expr::Mul(a, b) => Expr::Mul(rec(a), rec(b)),
            Expr::Div(a, b) => Expr::Div(rec(a), rec(b)),
            Expr::Power(a, b) => Expr::Power(rec(a), rec(b)),
            Expr::Neg(a) => Expr::Neg(rec(a)),
            Expr::Exp(a) => Expr::Exp(rec(a)),
            Expr::Ln(a) => Expr::Ln(rec(a)),
            Expr::Equals(a, level) => Expr::Equals(rec(a), *level),
            Expr::BoxCox { x, lambda } => Expr::BoxCox {
                x: rec(x),
                lambda: rec(lambda),
            },
        }
    }

    /// Human-readable rendering with beta names resolved.
    pub fn describe(&self, parameters: &ParameterSet) -> String {
        let mut out = String::new();
        self.write_to(&mut out, parameters);
        out
    }

    fn write_to(&self, out: &mut String, parameters: &ParameterSet) {
        match self {
            Expr::Constant(c) => {
                let _ = write!(out, "{c}");
            }
            Expr::Variable(name) => out.push_str(name),
            Expr::Parameter(id) => match parameters.get(*id) {
                Some(beta) => out.push_str(&beta.name),
                None => {
                    let _ = write!(out, "beta[{id}]");
                }
            },
            Expr::Add(a, b) => write_binary(out, a, "+", b, parameters),
            Expr::Sub(a, b) => write_binary(out, a, "-", b, parameters),
            Expr::Mul(a, b) => write_binary(out, a, "*", b, parameters),
            Expr::Div(a, b) => write_binary(out, a, "/", b, parameters),
            Expr::Power(a, b) => write_binary(out, a, "^", b, parameters),
            Expr::Neg(a) => {
                out.push('-');
                a.write_to(out, parameters);
            }
            Expr::Exp(a) => write_call(out, "exp", &[&**a], parameters),
            Expr::Ln(a) => write_call(out, "log", &[&**a], parameters),
            Expr::BoxCox { x, lambda } => write_call(out, "boxcox", &[&**x, &**lambda], parameters),
            Expr::Equals(a, level) => {
                out.push('[');
                a.write_to(out, parameters);
                let _ = write!(out, " == {level}]");
            }
        }
    }
}

fn write_binary(out: &mut String, a: &Expr, op: &str, b: &Expr, parameters: &ParameterSet) {
    out.push('(');
    a.write_to(out, parameters);
    let _ = write!(out, " {op} ");
    b.write_to(out, parameters);
    out.push(')');
}

fn write_call(out: &mut String, name: &str, args: &[&Expr], parameters: &ParameterSet) {
    out.push_str(name);
    out.push('(');
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        arg.write_to(out, parameters);
    }
    out.push(')');
}

/// Box-Cox transform of `x` with parameter `lambda`.
pub fn box_cox(x: Expr, lambda: Expr) -> Expr {
    Expr::BoxCox {
        x: Box::new(x),
        lambda: Box::new(lambda),
    }
}

fn box_cox_dual(x: &Dual, lambda: &Dual) -> Dual {
    let dim = x.dim().max(lambda.dim());
    if x.value == 0.0 {
        return Dual::constant(0.0, dim);
    }
    let l = lambda.value;
    let log_x = x.value.ln();
    let (value, d_x, d_lambda) = if l.abs() < BOX_COX_LAMBDA_EPSILON {
        (
            log_x + 0.5 * l * log_x * log_x,
            (1.0 + l * log_x) / x.value,
            0.5 * log_x * log_x,
        )
    } else {
        let powered = x.value.powf(l);
        (
            (powered - 1.0) / l,
            x.value.powf(l - 1.0),
            (powered * log_x * l - (powered - 1.0)) / (l * l),
        )
    };
    let mut tangent = &x.tangent * d_x;
    tangent.scaled_add(d_lambda, &lambda.tangent);
    Dual { value, tangent }
}

/// A discrete variable whose levels shift a beta. The first level is the reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscreteSegmentation {
    pub variable: String,
    pub levels: Vec<(f64, String)>,
}

impl DiscreteSegmentation {
    pub fn new(variable: &str, levels: &[(f64, &str)]) -> Self {
        Self {
            variable: variable.to_string(),
            levels: levels
                .iter()
                .map(|(value, label)| (*value, label.to_string()))
                .collect(),
        }
    }
}

/// Replaces a beta by `beta + Σ beta_level · [variable == level]` over the
/// non-reference levels of every segmentation. The extra betas are named
/// `{beta}_{label}` and inherit the start value, bounds and fixed status of the base.
pub fn segment_parameter(
    parameters: &mut ParameterSet,
    base: &str,
    segmentations: &[DiscreteSegmentation],
) -> Result<Expr, ExpressionError> {
    let base_beta = parameters.by_name(base)?.clone();
    let mut terms = vec![Expr::Parameter(parameters.id_of(base)?)];
    for segmentation in segmentations {
        if segmentation.levels.is_empty() {
            return Err(ExpressionError::EmptySegmentation(
                segmentation.variable.clone(),
            ));
        }
        for (level, label) in segmentation.levels.iter().skip(1) {
            let shifted = parameters.declare(Beta {
                name: format!("{}_{}", base_beta.name, label),
                ..base_beta.clone()
            })?;
            terms.push(shifted * Expr::var(&segmentation.variable).equals(*level));
        }
    }
    Ok(Expr::sum(terms))
}

macro_rules! impl_binary_op {
    ($trait:ident, $method:ident, $variant:ident) => {
        impl $trait for Expr {
            type Output = Expr;
            fn $method(self, rhs: Expr) -> Expr {
                Expr::$variant(Box::new(self), Box::new(rhs))
            }
        }

        impl $trait<f64> for Expr {
            type Output = Expr;
            fn $method(self, rhs: f64) -> Expr {
                Expr::$variant(Box::new(self), Box::new(Expr::Constant(rhs)))
            }
        }

        impl $trait<Expr> for f64 {
            type Output = Expr;
            fn $method(self, rhs: Expr) -> Expr {
                Expr::$variant(Box::new(Expr::Constant(self)), Box::new(rhs))
            }
        }
    };
}

impl_binary_op!(Add, add, Add);
impl_binary_op!(Sub, sub, Sub);
impl_binary_op!(Mul, mul, Mul);
impl_binary_op!(Div, div, Div);

impl Neg for Expr {
    type Output = Expr;
    fn neg(self) -> Expr {
        Expr::Neg(Box::new(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn database() -> Database {
        Database::from_columns(
            "test",
            vec![
                ("dur".to_string(), array![0.5, 2.0, 0.0]),
                ("group".to_string(), array![0.0, 1.0, 2.0]),
            ],
        )
        .unwrap()
    }

    #[test]
    fn linear_utility_gradient_is_the_attribute() {
        let db = database();
        let mut params = ParameterSet::new();
        let asc = params.free("ASC", 0.0).unwrap();
        let b = params.free("B_TIME", 0.0).unwrap();
        let v = asc + b * Expr::var("dur");

        let slots = params.tangent_slots();
        let ctx = EvalContext {
            database: &db,
            row: 1,
            betas: &[0.3, -1.5],
            seed: Seed::Parameters {
                slots: &slots,
                dim: 2,
            },
        };
        let out = v.eval(&ctx).unwrap();
        assert_abs_diff_eq!(out.value, 0.3 - 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(out.tangent[0], 1.0);
        assert_abs_diff_eq!(out.tangent[1], 2.0);
    }

    #[test]
    fn fixed_parameters_get_no_tangent_slot() {
        let mut params = ParameterSet::new();
        params.free("A", 0.0).unwrap();
        params.fixed("B", 0.0).unwrap();
        params.free("C", 1.0).unwrap();
        assert_eq!(params.tangent_slots(), vec![Some(0), None, Some(1)]);
        assert_eq!(params.free_indices(), vec![0, 2]);
    }

    #[test]
    fn redeclaring_with_other_settings_fails() {
        let mut params = ParameterSet::new();
        params.free("A", 0.0).unwrap();
        assert_eq!(params.free("A", 0.0).unwrap(), Expr::Parameter(0));
        assert!(matches!(
            params.fixed("A", 0.0),
            Err(ExpressionError::ConflictingParameter { .. })
        ));
    }

    #[test]
    fn box_cox_limits_and_derivatives() {
        let db = database();
        let mut params = ParameterSet::new();
        let lambda = params.free("LAMBDA", 1.0).unwrap();
        let t = box_cox(Expr::var("dur"), lambda);
        let slots = params.tangent_slots();

        // λ = 1 is the shifted identity: x - 1
        let ctx = EvalContext {
            database: &db,
            row: 1,
            betas: &[1.0],
            seed: Seed::Parameters {
                slots: &slots,
                dim: 1,
            },
        };
        let out = t.eval(&ctx).unwrap();
        assert_abs_diff_eq!(out.value, 1.0, epsilon = 1e-12);
        let expected = 2.0 * 2.0_f64.ln() - 1.0;
        assert_abs_diff_eq!(out.tangent[0], expected, epsilon = 1e-12);

        // λ → 0 approaches the logarithm
        let tiny = t.value(&db, 1, &[1e-7]).unwrap();
        assert_abs_diff_eq!(tiny, 2.0_f64.ln(), epsilon = 1e-6);

        // zero durations stay at zero
        assert_abs_diff_eq!(t.value(&db, 2, &[0.5]).unwrap(), 0.0);
    }

    #[test]
    fn box_cox_derivative_matches_finite_difference() {
        let db = database();
        let mut params = ParameterSet::new();
        let lambda = params.free("LAMBDA", 0.4).unwrap();
        let t = box_cox(Expr::var("dur"), lambda);
        let slots = params.tangent_slots();
        let ctx = EvalContext {
            database: &db,
            row: 0,
            betas: &[0.4],
            seed: Seed::Parameters {
                slots: &slots,
                dim: 1,
            },
        };
        let analytic = t.eval(&ctx).unwrap().tangent[0];
        let h = 1e-6;
        let numeric =
            (t.value(&db, 0, &[0.4 + h]).unwrap() - t.value(&db, 0, &[0.4 - h]).unwrap()) / (2.0 * h);
        assert_abs_diff_eq!(analytic, numeric, epsilon = 1e-7);
    }

    #[test]
    fn variable_seed_differentiates_with_respect_to_a_column() {
        let db = database();
        let mut params = ParameterSet::new();
        let b = params.free("B", 0.0).unwrap();
        let v = b * Expr::var("dur").pow(Expr::constant(2.0));
        let ctx = EvalContext {
            database: &db,
            row: 1,
            betas: &[3.0],
            seed: Seed::Variable("dur"),
        };
        // d/dx (3 x^2) = 6 x = 12 at x = 2
        assert_abs_diff_eq!(v.eval(&ctx).unwrap().tangent[0], 12.0, epsilon = 1e-12);
    }

    #[test]
    fn segmentation_adds_one_beta_per_non_reference_level() {
        let db = database();
        let mut params = ParameterSet::new();
        params.free("ASC", 0.5).unwrap();
        let seg = DiscreteSegmentation::new("group", &[(0.0, "a"), (1.0, "b"), (2.0, "c")]);
        let asc = segment_parameter(&mut params, "ASC", &[seg]).unwrap();

        assert_eq!(params.len(), 3);
        assert_eq!(params.by_name("ASC_b").unwrap().start, 0.5);
        assert!(params.by_name("ASC_a").is_err());

        let betas = [1.0, 10.0, 100.0];
        assert_abs_diff_eq!(asc.value(&db, 0, &betas).unwrap(), 1.0);
        assert_abs_diff_eq!(asc.value(&db, 1, &betas).unwrap(), 11.0);
        assert_abs_diff_eq!(asc.value(&db, 2, &betas).unwrap(), 101.0);
    }

    #[test]
    fn segmenting_a_fixed_beta_keeps_the_shifts_fixed() {
        let mut params = ParameterSet::new();
        params.fixed("ASC_BIKE", 0.0).unwrap();
        let seg = DiscreteSegmentation::new("group", &[(0.0, "a"), (1.0, "b")]);
        segment_parameter(&mut params, "ASC_BIKE", &[seg]).unwrap();
        assert!(params.by_name("ASC_BIKE_b").unwrap().fixed);
    }

    #[test]
    fn scaling_a_variable_rewrites_only_that_column() {
        let db = database();
        let v = 2.0 * Expr::var("dur") + Expr::var("group");
        let scaled = v.scale_variable("dur", 0.5);
        assert_abs_diff_eq!(scaled.value(&db, 1, &[]).unwrap(), 2.0 + 1.0);
        assert_eq!(scaled.variables(), v.variables());
    }

    #[test]
    fn unknown_variables_are_reported() {
        let db = database();
        let err = Expr::var("missing").value(&db, 0, &[]).unwrap_err();
        assert_eq!(err, ExpressionError::UnknownVariable("missing".to_string()));
    }
}

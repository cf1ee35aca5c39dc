//! Forward-mode dual numbers.
//!
//! A `Dual` carries a value together with its tangent: the vector of partial
//! derivatives with respect to whatever was seeded (all free parameters during
//! estimation, or a single data column when simulating elasticities and values
//! of time). Every utility expression and choice probability is evaluated on
//! this type, so the likelihood gradient comes out exact and in one pass.

use ndarray::Array1;
use std::ops::{Add, Div, Mul, Neg, Sub};

#[derive(Debug, Clone, PartialEq)]
pub struct Dual {
    pub value: f64,
    pub tangent: Array1<f64>,
}

impl Dual {
    /// A value with a zero tangent of length `dim`.
    pub fn constant(value: f64, dim: usize) -> Self {
        Self {
            value,
            tangent: Array1::zeros(dim),
        }
    }

    /// A value whose tangent is the unit vector along `slot`.
    pub fn seeded(value: f64, dim: usize, slot: usize) -> Self {
        let mut tangent = Array1::zeros(dim);
        tangent[slot] = 1.0;
        Self { value, tangent }
    }

    pub fn dim(&self) -> usize {
        self.tangent.len()
    }

    /// Applies a scalar function given its value and first derivative at `self.value`.
    pub fn chain(&self, value: f64, derivative: f64) -> Self {
        Self {
            value,
            tangent: &self.tangent * derivative,
        }
    }

    pub fn exp(&self) -> Self {
        let e = self.value.exp();
        self.chain(e, e)
    }

    pub fn ln(&self) -> Self {
        self.chain(self.value.ln(), 1.0 / self.value)
    }

    pub fn scale(&self, factor: f64) -> Self {
        self.chain(self.value * factor, factor)
    }

    /// `self ^ exponent` where both sides may carry a tangent.
    pub fn pow(&self, exponent: &Dual) -> Self {
        let value = self.value.powf(exponent.value);
        let d_base = exponent.value * self.value.powf(exponent.value - 1.0);
        let mut tangent = &self.tangent * d_base;
        if self.value > 0.0 && exponent.tangent.iter().any(|&t| t != 0.0) {
            tangent.scaled_add(value * self.value.ln(), &exponent.tangent);
        }
        Self { value, tangent }
    }

    /// Linear combination `a * x + b * y` of two tangents, sharing the result value.
    fn combine(value: f64, a: f64, x: &Array1<f64>, b: f64, y: &Array1<f64>) -> Self {
        let mut tangent = x * a;
        tangent.scaled_add(b, y);
        Self { value, tangent }
    }
}

impl Add for &Dual {
    type Output = Dual;

    fn add(self, rhs: &Dual) -> Dual {
        Dual {
            value: self.value + rhs.value,
            tangent: &self.tangent + &rhs.tangent,
        }
    }
}

impl Sub for &Dual {
    type Output = Dual;

    fn sub(self, rhs: &Dual) -> Dual {
        Dual {
            value: self.value - rhs.value,
            tangent: &self.tangent - &rhs.tangent,
        }
    }
}

impl Mul for &Dual {
    type Output = Dual;

    fn mul(self, rhs: &Dual) -> Dual {
        Dual::combine(
            self.value * rhs.value,
            rhs.value,
            &self.tangent,
            self.value,
            &rhs.tangent,
        )
    }
}

impl Div for &Dual {
    type Output = Dual;

    fn div(self, rhs: &Dual) -> Dual {
        let inv = 1.0 / rhs.value;
        let value = self.value * inv;
        Dual::combine(value, inv, &self.tangent, -value * inv, &rhs.tangent)
    }
}

impl Neg for &Dual {
    type Output = Dual;

    fn neg(self) -> Dual {
        self.scale(-1.0)
    }
}

impl Add for Dual {
    type Output = Dual;

    fn add(mut self, rhs: Dual) -> Dual {
        self.value += rhs.value;
        self.tangent += &rhs.tangent;
        self
    }
}

impl Sub for Dual {
    type Output = Dual;

    fn sub(mut self, rhs: Dual) -> Dual {
        self.value -= rhs.value;
        self.tangent -= &rhs.tangent;
        self
    }
}

impl Mul for Dual {
    type Output = Dual;

    fn mul(self, rhs: Dual) -> Dual {
        &self * &rhs
    }
}

impl Div for Dual {
    type Output = Dual;

    fn div(self, rhs: Dual) -> Dual {
        &self / &rhs
    }
}

impl Neg for Dual {
    type Output = Dual;

    fn neg(self) -> Dual {
        self.scale(-1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn product_rule_matches_hand_derivation() {
        // f(a, b) = a * b at (3, 4): df/da = 4, df/db = 3
        let a = Dual::seeded(3.0, 2, 0);
        let b = Dual::seeded(4.0, 2, 1);
        let f = &a * &b;
        assert_abs_diff_eq!(f.value, 12.0);
        assert_abs_diff_eq!(f.tangent[0], 4.0);
        assert_abs_diff_eq!(f.tangent[1], 3.0);
    }

    #[test]
    fn quotient_and_exp_compose() {
        // f(x) = exp(x) / x at x = 2: f' = exp(x)(x - 1)/x^2
        let x = Dual::seeded(2.0, 1, 0);
        let f = &x.exp() / &x;
        let expected = 2.0_f64.exp() * (2.0 - 1.0) / 4.0;
        assert_abs_diff_eq!(f.tangent[0], expected, epsilon = 1e-12);
    }

    #[test]
    fn power_with_variable_exponent() {
        // f(x, y) = x^y at (2, 3): df/dx = y x^(y-1) = 12, df/dy = x^y ln x = 8 ln 2
        let x = Dual::seeded(2.0, 2, 0);
        let y = Dual::seeded(3.0, 2, 1);
        let f = x.pow(&y);
        assert_abs_diff_eq!(f.value, 8.0, epsilon = 1e-12);
        assert_abs_diff_eq!(f.tangent[0], 12.0, epsilon = 1e-12);
        assert_abs_diff_eq!(f.tangent[1], 8.0 * 2.0_f64.ln(), epsilon = 1e-12);
    }

    #[test]
    fn constant_has_zero_tangent() {
        let c = Dual::constant(5.0, 3);
        let x = Dual::seeded(1.5, 3, 2);
        let f = (c - x.clone()).ln();
        assert_abs_diff_eq!(f.tangent[0], 0.0);
        assert_abs_diff_eq!(f.tangent[2], -1.0 / 3.5, epsilon = 1e-12);
    }
}

//! Tolerant price comparisons.
//!
//! Prices are `f64`; two prices closer than [`EPSILON`] compare equal.

pub const EPSILON: f64 = 1e-9;

pub fn approx_eq(a: f64, b: f64) -> bool {
    (a - b).abs() < EPSILON
}

/// `a > b` by more than the tolerance.
pub fn gt(a: f64, b: f64) -> bool {
    a - b >= EPSILON
}

/// `a < b` by more than the tolerance.
pub fn lt(a: f64, b: f64) -> bool {
    b - a >= EPSILON
}

/// `a <= b` within the tolerance.
pub fn le(a: f64, b: f64) -> bool {
    !gt(a, b)
}

/// `a >= b` within the tolerance.
pub fn ge(a: f64, b: f64) -> bool {
    !lt(a, b)
}

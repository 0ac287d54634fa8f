//! Monetary tolerances and helpers.
//!
//! Amounts are carried as `f64` in the currency's major unit. Every comparison
//! that decides a status or a settlement goes through the tolerances below.

/// General tolerance for amount comparisons (remaining vs. zero, overpayment).
pub const EPSILON: f64 = 0.001;

/// Tolerance used by the offset engine when comparing against remaining amounts.
pub const OFFSET_EPSILON: f64 = 1e-5;

/// Smallest amount an offset may settle.
pub const MIN_OFFSET_AMOUNT: f64 = 0.009;

/// `a` and `b` are equal within [`EPSILON`].
pub fn approx_eq(a: f64, b: f64) -> bool {
    (a - b).abs() <= EPSILON
}

/// `value` is zero (or a negative rounding artefact) within [`EPSILON`].
pub fn is_settled(value: f64) -> bool {
    value <= EPSILON
}

/// Remaining amount derived from `amount` and `paid`, never negative.
pub fn remaining(amount: f64, paid: f64) -> f64 {
    (amount - paid).max(0.0)
}

/// Round to minor units (two decimals) for presentation and reference sums.
pub fn round_minor(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

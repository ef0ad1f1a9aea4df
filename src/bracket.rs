//! Isolating intervals for the roots of the secular equation

use log::debug;
use ndarray::NdFloat;

use crate::{secular::SecularEquation, LinalgError, Result, RhoSign};

/// Open interval `(lower, upper)` containing exactly one root of the secular equation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bracket<A> {
    pub lower: A,
    pub upper: A,
    /// Whether `f >= 0` holds just above `lower`. Fixed for the whole bisection since `f` is
    /// monotonic inside the bracket.
    pub lower_nonneg: bool,
}

impl<A: NdFloat> Bracket<A> {
    pub fn half_width(&self) -> A {
        (self.upper - self.lower) / A::from(2.).unwrap()
    }

    /// Strict containment
    pub fn contains(&self, x: A) -> bool {
        self.lower < x && x < self.upper
    }
}

/// Computes the bracket of root `index`
///
/// Interior roots are isolated by consecutive diagonal entries. For `rho < 0` the root with index
/// 0 lies below `d_0`, for `rho > 0` the root with index `n - 1` lies above `d_{n-1}`; its outer
/// end is found by stepping away from the diagonal in increments of `norm_z` until `f` turns
/// non-negative, giving up after `max_steps` steps.
///
/// The lower end of every bracket is either a pole approached from above or a searched point on
/// the far side of the extremal root, and in both cases the sign of `f` there is `-sign(rho)`.
pub fn resolve<A: NdFloat>(
    eq: &SecularEquation<A>,
    index: usize,
    norm_z: A,
    max_steps: usize,
) -> Result<Bracket<A>> {
    let n = eq.len();
    if index >= n {
        return Err(LinalgError::IndexOutOfRange { index, len: n });
    }
    let d = eq.diag();
    let sign = eq.sign();

    let (lower, upper) = match sign {
        RhoSign::Negative if index == 0 => (extend(eq, index, d[0], -norm_z, max_steps)?, d[0]),
        RhoSign::Negative => (d[index - 1], d[index]),
        RhoSign::Positive if index == n - 1 => {
            (d[index], extend(eq, index, d[index], norm_z, max_steps)?)
        }
        RhoSign::Positive => (d[index], d[index + 1]),
    };

    Ok(Bracket {
        lower,
        upper,
        lower_nonneg: sign == RhoSign::Negative,
    })
}

/// Steps from `start` by `step` until the secular equation is non-negative
///
/// A NaN value, which a vanishing `z` produces at the pole itself, counts as not yet bracketed.
fn extend<A: NdFloat>(
    eq: &SecularEquation<A>,
    index: usize,
    start: A,
    step: A,
    max_steps: usize,
) -> Result<A> {
    let mut probe = start;
    for steps in 1..=max_steps {
        probe += step;
        if eq.evaluate(probe) >= A::zero() {
            debug!(
                "bracketed extremal root {} after {} extension step(s)",
                index, steps
            );
            return Ok(probe);
        }
    }

    Err(LinalgError::BracketSearchOverflow {
        index,
        steps: max_steps,
    })
}

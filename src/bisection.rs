//! Bisection on isolated roots of the secular equation
//!
//! Each root is refined independently of every other root, so a set of indices is solved as a
//! parallel iterator and every index gets its own result.

use log::{trace, warn};
use ndarray::NdFloat;
use rayon::prelude::*;

use crate::{
    bracket::{self, Bracket},
    secular::SecularEquation,
    LinalgError, Result, SecularParams,
};

/// A converged root of the secular equation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Root<A> {
    pub value: A,
    /// Number of midpoints examined
    pub iterations: usize,
}

/// Bisects `bracket` until `f` vanishes at the midpoint or the half-width drops below `tol`
///
/// The endpoint whose `f >= 0` predicate matches the midpoint's is replaced, so the root stays
/// inside the interval. Fails with [`LinalgError::IterationCapExceeded`] after `maxiter`
/// iterations, or as soon as the midpoint is no longer strictly inside an interval whose
/// half-width is still at least `tol`: the endpoints are then adjacent floats and `tol` is
/// unreachable at this magnitude.
pub fn bisect<A: NdFloat>(
    eq: &SecularEquation<A>,
    index: usize,
    bracket: Bracket<A>,
    tol: A,
    maxiter: usize,
) -> Result<Root<A>> {
    let two = A::from(2.).unwrap();
    let (mut a, mut b) = (bracket.lower, bracket.upper);

    for iter in 1..=maxiter {
        let mid = (a + b) / two;
        if (b - a) / two < tol {
            return Ok(Root {
                value: mid,
                iterations: iter,
            });
        }
        let f = eq.evaluate(mid);
        if f.is_zero() {
            return Ok(Root {
                value: mid,
                iterations: iter,
            });
        }
        if !(a < mid && mid < b) {
            return Err(LinalgError::IterationCapExceeded {
                index,
                iterations: iter,
            });
        }

        if (f >= A::zero()) == bracket.lower_nonneg {
            a = mid;
        } else {
            b = mid;
        }
    }

    Err(LinalgError::IterationCapExceeded {
        index,
        iterations: maxiter,
    })
}

/// Brackets and bisects root `index`
///
/// `norm_z` is the Euclidean norm of the update vector, computed once per problem by the caller.
pub fn solve_root<A: NdFloat>(
    eq: &SecularEquation<A>,
    params: &SecularParams<A>,
    index: usize,
    norm_z: A,
) -> Result<Root<A>> {
    let bracket = bracket::resolve(eq, index, norm_z, params.max_extension_steps)?;
    let root = bisect(eq, index, bracket, params.tolerance, params.maxiter)?;
    trace!(
        "root {} converged after {} iterations",
        index,
        root.iterations
    );
    Ok(root)
}

/// Solves every root in `indices`, returning one result per index in the same order
///
/// A failing index does not stop the others.
pub fn solve_roots<A: NdFloat>(
    eq: &SecularEquation<A>,
    params: &SecularParams<A>,
    indices: &[usize],
) -> Vec<Result<Root<A>>> {
    let norm_z = eq.norm_z();
    indices
        .par_iter()
        .map(|&index| {
            let res = solve_root(eq, params, index, norm_z);
            if let Err(err) = &res {
                warn!("secular root {} failed: {}", index, err);
            }
            res
        })
        .collect()
}

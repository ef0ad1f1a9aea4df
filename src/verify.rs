//! Checks on solved merge nodes
//!
//! These are cheap, `O(n)` per eigenpair, and meant for callers that want to validate a merge step
//! before handing it to backtransformation.

use std::fmt::Write;

use ndarray::{ArrayView1, NdFloat};

use crate::{LinalgError, MergeNode, Result, RhoSign};

/// Outcome of an interlacing check
#[derive(Debug, Clone, PartialEq)]
pub struct InterlacingReport {
    /// Indices whose eigenvalue lies outside its bracket
    pub violations: Vec<usize>,
    pub explanation: String,
}

impl InterlacingReport {
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Checks that every eigenvalue lies in the interval reserved for its index
///
/// For `rho > 0` eigenvalue `i` must lie in `(d_i, d_{i+1})` and the last one above `d_{n-1}`;
/// for `rho < 0` eigenvalue `i` must lie in `(d_{i-1}, d_i)` and the first one below `d_0`.
pub fn check_interlacing<A: NdFloat>(
    diag: ArrayView1<A>,
    eigvals: ArrayView1<A>,
    rho: A,
) -> Result<InterlacingReport> {
    let n = diag.len();
    if eigvals.len() != n {
        return Err(LinalgError::EigenvalueCountMismatch {
            expected: n,
            actual: eigvals.len(),
        });
    }

    let mut violations = Vec::new();
    let mut explanation = String::new();
    for (i, &lambda) in eigvals.iter().enumerate() {
        let (lower, upper) = match RhoSign::of(rho) {
            RhoSign::Positive => (Some(diag[i]), diag.get(i + 1).copied()),
            RhoSign::Negative => (i.checked_sub(1).map(|j| diag[j]), Some(diag[i])),
        };
        let above = lower.map_or(true, |lo| lo < lambda);
        let below = upper.map_or(true, |hi| lambda < hi);
        if !(above && below) {
            violations.push(i);
            let _ = writeln!(
                explanation,
                "i={}: {:?} outside ({:?}, {:?})",
                i, lambda, lower, upper
            );
        }
    }

    Ok(InterlacingReport {
        violations,
        explanation,
    })
}

/// Euclidean norm of `(D + rho z z^T) v - lambda v` for eigenpair `index` of a normalized node
///
/// Evaluated as `d_j v_j + rho z_j (z . v) - lambda v_j` without forming the dense matrix.
pub fn residual_norm<A: NdFloat>(node: &MergeNode<A>, index: usize) -> Result<A> {
    let v = node.eigenvector(index)?;
    let lambda = node
        .eigenvalues()
        .map(|eigvals| eigvals[index])
        .ok_or(LinalgError::InvalidState {
            expected: crate::NodeStage::Normalized,
            actual: node.stage(),
        })?;
    let z = node.z();
    let zv = z.dot(&v);
    let rho = node.rho();

    let sum = node
        .diag()
        .iter()
        .zip(z.iter())
        .zip(v.iter())
        .map(|((&d, &zj), &vj)| {
            let r = d * vj + rho * zj * zv - lambda * vj;
            r * r
        })
        .fold(A::zero(), |acc, x| acc + x);
    Ok(sum.sqrt())
}

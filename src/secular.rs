//! The secular equation of a rank-one updated diagonal matrix

use ndarray::{ArrayView1, NdFloat};

use crate::{reduce::ParallelSum, RhoSign};

/// Read-only view of `f(x) = 1 + rho * sum_i z_i^2 / (d_i - x)`
///
/// The roots of `f` are the eigenvalues of `diag(d) + rho * z * z^T`. Between two consecutive
/// poles `d_i` the derivative `rho * sum_i z_i^2 / (d_i - x)^2` has the sign of `rho`, so every
/// open interval between poles contains at most one root.
///
/// `f` is singular at every `d_i`; none of the methods may be called with `x` equal to a
/// diagonal entry.
#[derive(Debug, Clone)]
pub struct SecularEquation<'a, A> {
    diag: ArrayView1<'a, A>,
    z: ArrayView1<'a, A>,
    rho: A,
    reducer: ParallelSum,
}

impl<'a, A: NdFloat> SecularEquation<'a, A> {
    /// `diag` and `z` must have the same length. No further validation is done here; outside the
    /// crate the equation is obtained through
    /// [`MergeNode::equation`](crate::MergeNode::equation).
    pub(crate) fn new(diag: ArrayView1<'a, A>, z: ArrayView1<'a, A>, rho: A) -> Self {
        assert_eq!(diag.len(), z.len());
        SecularEquation {
            diag,
            z,
            rho,
            reducer: ParallelSum::default(),
        }
    }

    /// Use `reducer` for every sum over the diagonal
    pub fn with_reducer(mut self, reducer: ParallelSum) -> Self {
        self.reducer = reducer;

        self
    }

    pub fn len(&self) -> usize {
        self.diag.len()
    }

    pub fn is_empty(&self) -> bool {
        self.diag.is_empty()
    }

    pub fn diag(&self) -> ArrayView1<'a, A> {
        self.diag
    }

    pub fn z(&self) -> ArrayView1<'a, A> {
        self.z
    }

    pub fn rho(&self) -> A {
        self.rho
    }

    pub fn sign(&self) -> RhoSign {
        RhoSign::of(self.rho)
    }

    /// Evaluates `f(x)`
    pub fn evaluate(&self, x: A) -> A {
        let (d, z) = (&self.diag, &self.z);
        let sum = self.reducer.sum(self.len(), |i| z[i] * z[i] / (d[i] - x));
        A::one() + self.rho * sum
    }

    /// Evaluates `sum_i z_i^2 / (d_i - x)^2`, the squared norm of the unnormalized eigenvector
    /// belonging to eigenvalue `x`
    pub fn weight_sum(&self, x: A) -> A {
        let (d, z) = (&self.diag, &self.z);
        self.reducer.sum(self.len(), |i| {
            let gap = d[i] - x;
            z[i] * z[i] / (gap * gap)
        })
    }

    /// Euclidean norm of `z`, an upper bound on how far the update moves any eigenvalue per unit
    /// of `rho`
    pub fn norm_z(&self) -> A {
        let z = &self.z;
        self.reducer.sum(self.len(), |i| z[i] * z[i]).sqrt()
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    use super::*;

    #[test]
    fn evaluate() {
        let d = array![1.0f64, 3.];
        let z = array![1.0, 1.];
        let eq = SecularEquation::new(d.view(), z.view(), 1.);

        // 1 + 1/(1-2) + 1/(3-2) = 1
        assert_abs_diff_eq!(eq.evaluate(2.), 1.);
        // 1 + 1/(1-0) + 1/(3-0)
        assert_abs_diff_eq!(eq.evaluate(0.), 1. + 1. + 1. / 3.);
        assert_abs_diff_eq!(eq.evaluate(3. - 2f64.sqrt()), 0., epsilon = 1e-12);
        assert_abs_diff_eq!(eq.evaluate(3. + 2f64.sqrt()), 0., epsilon = 1e-12);
    }

    #[test]
    fn monotonic_between_poles() {
        let d = array![0.0f64, 1., 2.5, 4.];
        let z = array![0.3, -0.7, 0.2, 1.1];
        for &rho in &[0.8, -1.3] {
            let eq = SecularEquation::new(d.view(), z.view(), rho);
            let xs = [0.1, 0.3, 0.5, 0.7, 0.9];
            for w in xs.windows(2) {
                let (lo, hi) = (eq.evaluate(w[0]), eq.evaluate(w[1]));
                if rho > 0. {
                    assert!(lo < hi);
                } else {
                    assert!(lo > hi);
                }
            }
        }
    }

    #[test]
    fn norms() {
        let d = array![1.0f64, 2., 4.];
        let z = array![2.0, 1., 2.];
        let eq = SecularEquation::new(d.view(), z.view(), -2.);
        assert_abs_diff_eq!(eq.norm_z(), 3.);
        assert_eq!(eq.sign(), RhoSign::Negative);
        assert_abs_diff_eq!(eq.weight_sum(3.), 4. / 4. + 1. / 1. + 4. / 1.);
    }

    #[test]
    fn reducer_does_not_change_value() {
        let n = 3000;
        let d = ndarray::Array1::from_shape_fn(n, |i| i as f64);
        let z = ndarray::Array1::from_shape_fn(n, |i| 1.0 / (i as f64 + 1.0));
        let seq = SecularEquation::new(d.view(), z.view(), 0.5)
            .with_reducer(ParallelSum::sequential());
        let par = seq.clone().with_reducer(ParallelSum::new(6, 0));
        assert_abs_diff_eq!(seq.evaluate(10.5), par.evaluate(10.5), epsilon = 1e-12);
        assert_abs_diff_eq!(seq.weight_sum(10.5), par.weight_sum(10.5), epsilon = 1e-12);
    }
}

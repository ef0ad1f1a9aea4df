//! Merge step of the divide-and-conquer tree
//!
//! A [`MergeNode`] owns the diagonal `D`, the update vector `z` and the coefficient `rho` of one
//! rank-one updated problem, together with everything derived from them. It moves through
//! `Unsolved -> EigenvaluesReady -> Normalized`; operations called in the wrong stage are rejected
//! with [`LinalgError::InvalidState`].

use log::{debug, warn};
use ndarray::{prelude::*, DataMut, NdFloat, Zip};
use rayon::prelude::*;

use crate::{
    bisection,
    group::{self, ProcessGroup, SingleProcess},
    secular::SecularEquation,
    LinalgError, Result, SecularParams,
};

/// Progress of a [`MergeNode`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStage {
    Unsolved,
    EigenvaluesReady,
    Normalized,
}

#[derive(Debug, Clone)]
enum State<A> {
    Unsolved {
        /// Converged roots of earlier, partially failed attempts
        roots: Vec<Option<A>>,
        failures: Vec<LinalgError>,
    },
    EigenvaluesReady {
        eigvals: Array1<A>,
    },
    Normalized {
        eigvals: Array1<A>,
        norms: Array1<A>,
    },
}

impl<A> State<A> {
    fn stage(&self) -> NodeStage {
        match self {
            State::Unsolved { .. } => NodeStage::Unsolved,
            State::EigenvaluesReady { .. } => NodeStage::EigenvaluesReady,
            State::Normalized { .. } => NodeStage::Normalized,
        }
    }
}

/// Everything a [`MergeNode`] owns, handed back by [`MergeNode::into_parts`]
#[derive(Debug, Clone)]
pub struct NodeParts<A> {
    pub diag: Array1<A>,
    pub z: Array1<A>,
    pub rho: A,
    pub eigvals: Option<Array1<A>>,
    pub norms: Option<Array1<A>>,
}

/// Rank-one updated diagonal problem `diag(D) + rho * z * z^T`
#[derive(Debug, Clone)]
pub struct MergeNode<A> {
    diag: Array1<A>,
    z: Array1<A>,
    rho: A,
    params: SecularParams<A>,
    state: State<A>,
}

impl<A: NdFloat> MergeNode<A> {
    /// Creates the problem `diag(D) + beta * theta * z * z^T`
    ///
    /// Deflation must already have happened: `diag` has to be strictly increasing and `z` should
    /// not contain negligible entries.
    pub fn new(diag: Array1<A>, z: Array1<A>, beta: A, theta: A) -> Result<Self> {
        Self::from_rho(diag, z, beta * theta)
    }

    /// Creates the problem `diag(D) + rho * z * z^T`
    pub fn from_rho(diag: Array1<A>, z: Array1<A>, rho: A) -> Result<Self> {
        if diag.len() != z.len() {
            return Err(LinalgError::DimensionMismatch {
                diag: diag.len(),
                z: z.len(),
            });
        }
        if rho.is_zero() || !rho.is_finite() {
            return Err(LinalgError::InvalidUpdate);
        }
        // `!(a < b)` also rejects NaN entries
        if let Some(i) = diag
            .iter()
            .zip(diag.iter().skip(1))
            .position(|(a, b)| !(a < b))
        {
            return Err(LinalgError::NotStrictlyIncreasing { index: i + 1 });
        }

        let n = diag.len();
        Ok(MergeNode {
            diag,
            z,
            rho,
            params: SecularParams::default(),
            state: State::Unsolved {
                roots: vec![None; n],
                failures: Vec::new(),
            },
        })
    }

    /// Replace the solver budgets
    pub fn with_params(mut self, params: SecularParams<A>) -> Self {
        self.params = params;

        self
    }

    /// Replace the solver budgets in place, e.g. to relax them before retrying failed roots
    pub fn set_params(&mut self, params: SecularParams<A>) {
        self.params = params;
    }

    pub fn params(&self) -> &SecularParams<A> {
        &self.params
    }

    pub fn len(&self) -> usize {
        self.diag.len()
    }

    pub fn is_empty(&self) -> bool {
        self.diag.is_empty()
    }

    pub fn diag(&self) -> &Array1<A> {
        &self.diag
    }

    pub fn z(&self) -> &Array1<A> {
        &self.z
    }

    pub fn rho(&self) -> A {
        self.rho
    }

    pub fn stage(&self) -> NodeStage {
        self.state.stage()
    }

    /// The secular equation of this problem, summed with the node's parallel settings
    pub fn equation(&self) -> SecularEquation<'_, A> {
        SecularEquation::new(self.diag.view(), self.z.view(), self.rho)
            .with_reducer(self.params.reducer())
    }

    /// Eigenvalues in ascending order, available once the eigenvalue phase succeeded
    pub fn eigenvalues(&self) -> Option<&Array1<A>> {
        match &self.state {
            State::Unsolved { .. } => None,
            State::EigenvaluesReady { eigvals } | State::Normalized { eigvals, .. } => {
                Some(eigvals)
            }
        }
    }

    pub fn normalization_factors(&self) -> Option<&Array1<A>> {
        match &self.state {
            State::Normalized { norms, .. } => Some(norms),
            _ => None,
        }
    }

    /// Roots retained from a failed eigenvalue phase, `None` where the root is still missing
    pub fn partial_eigenvalues(&self) -> Option<&[Option<A>]> {
        match &self.state {
            State::Unsolved { roots, .. } => Some(roots.as_slice()),
            _ => None,
        }
    }

    /// Per-root failures of the last eigenvalue phase, ordered by index
    pub fn failures(&self) -> &[LinalgError] {
        match &self.state {
            State::Unsolved { failures, .. } => failures.as_slice(),
            _ => &[],
        }
    }

    fn invalid_state(&self, expected: NodeStage) -> LinalgError {
        LinalgError::InvalidState {
            expected,
            actual: self.stage(),
        }
    }

    /// Finds all eigenvalues, sharing the roots between the ranks of `group`
    ///
    /// Every rank of `group` must call this on an identical node. Roots that failed leave the
    /// node `Unsolved` and are reported through [`LinalgError::RootsFailed`] and
    /// [`failures`](Self::failures); converged roots are kept, so calling this again (typically
    /// after [`set_params`](Self::set_params)) only solves the missing ones.
    pub fn compute_eigenvalues<G: ProcessGroup>(&mut self, group: &G) -> Result<&mut Self> {
        let n = self.len();
        let pending: Vec<usize> = match &self.state {
            State::Unsolved { roots, .. } => group::local_range(n, group.rank(), group.size())
                .filter(|&i| roots[i].is_none())
                .collect(),
            _ => return Err(self.invalid_state(NodeStage::Unsolved)),
        };

        let solved = {
            let eq = self.equation();
            bisection::solve_roots(&eq, &self.params, &pending)
        };
        let local: Vec<(usize, Result<A>)> = pending
            .into_iter()
            .zip(solved.into_iter().map(|res| res.map(|root| root.value)))
            .collect();
        let gathered = group.all_gather(local)?;

        let stage = self.stage();
        let (roots, failures) = match &mut self.state {
            State::Unsolved { roots, failures } => (roots, failures),
            _ => {
                return Err(LinalgError::InvalidState {
                    expected: NodeStage::Unsolved,
                    actual: stage,
                })
            }
        };
        failures.clear();
        for (index, res) in gathered.into_iter().flatten() {
            match res {
                Ok(value) => roots[index] = Some(value),
                Err(err) => failures.push(err),
            }
        }
        failures.sort_by_key(failure_index);

        if let Some(first) = failures.first() {
            let err = LinalgError::RootsFailed {
                failed: failures.len(),
                total: n,
                first: Box::new(first.clone()),
            };
            warn!("eigenvalue phase of merge node of size {} failed: {}", n, err);
            return Err(err);
        }

        let mut eigvals = Array1::zeros(n);
        for (i, root) in roots.iter().enumerate() {
            match root {
                Some(value) => eigvals[i] = *value,
                None => {
                    return Err(LinalgError::ProcessGroup(format!(
                        "root {} was not contributed by any rank",
                        i
                    )))
                }
            }
        }
        debug!(
            "solved {} secular roots on rank {} of {}",
            n,
            group.rank(),
            group.size()
        );
        self.state = State::EigenvaluesReady { eigvals };
        Ok(self)
    }

    /// Computes the normalization factors `N_i = sqrt(sum_j z_j^2 / (d_j - lambda_i)^2)`
    pub fn compute_normalization_factors(&mut self) -> Result<&mut Self> {
        self.compute_normalization_factors_distributed(&SingleProcess)
    }

    /// Computes the normalization factors, sharing the eigenvalues between the ranks of `group`
    pub fn compute_normalization_factors_distributed<G: ProcessGroup>(
        &mut self,
        group: &G,
    ) -> Result<&mut Self> {
        let n = self.len();
        let norms = {
            let eigvals = match &self.state {
                State::EigenvaluesReady { eigvals } => eigvals,
                _ => return Err(self.invalid_state(NodeStage::EigenvaluesReady)),
            };
            let eq = self.equation();
            let local: Vec<A> = group::local_range(n, group.rank(), group.size())
                .into_par_iter()
                .map(|i| eq.weight_sum(eigvals[i]).sqrt())
                .collect();
            group::gather_blocks(group, n, local)?
        };

        if let Some(index) = norms.iter().position(|&x| !(x > A::zero() && x.is_finite())) {
            return Err(LinalgError::DegenerateNormalization { index });
        }

        let stage = self.stage();
        let eigvals = match &mut self.state {
            State::EigenvaluesReady { eigvals } => std::mem::replace(eigvals, Array1::zeros(0)),
            _ => {
                return Err(LinalgError::InvalidState {
                    expected: NodeStage::EigenvaluesReady,
                    actual: stage,
                })
            }
        };
        self.state = State::Normalized {
            eigvals,
            norms: Array1::from(norms),
        };
        Ok(self)
    }

    fn normalized(&self) -> Result<(&Array1<A>, &Array1<A>)> {
        match &self.state {
            State::Normalized { eigvals, norms } => Ok((eigvals, norms)),
            _ => Err(self.invalid_state(NodeStage::Normalized)),
        }
    }

    /// Writes eigenvector `index` into the first `n` entries of `out`
    ///
    /// `out[j] = z_j / (d_j - lambda_index) / N_index`. Nothing is cached, every call costs `O(n)`.
    pub fn eigenvector_into<S: DataMut<Elem = A>>(
        &self,
        index: usize,
        out: &mut ArrayBase<S, Ix1>,
    ) -> Result<()> {
        let (eigvals, norms) = self.normalized()?;
        let n = self.len();
        if index >= n {
            return Err(LinalgError::IndexOutOfRange { index, len: n });
        }
        if out.len() < n {
            return Err(LinalgError::BufferTooSmall {
                required: n,
                actual: out.len(),
            });
        }

        let (lambda, norm) = (eigvals[index], norms[index]);
        Zip::from(out.slice_mut(s![..n]))
            .and(&self.diag)
            .and(&self.z)
            .for_each(|o, &d, &z| *o = z / (d - lambda) / norm);
        Ok(())
    }

    /// Eigenvector `index` as a new array
    pub fn eigenvector(&self, index: usize) -> Result<Array1<A>> {
        let mut out = Array1::zeros(self.len());
        self.eigenvector_into(index, &mut out)?;
        Ok(out)
    }

    /// All eigenvectors as the columns of a new matrix, in eigenvalue order
    pub fn eigenvectors(&self) -> Result<Array2<A>> {
        let n = self.len();
        let mut vecs = Array2::zeros((n, n));
        vecs.axis_iter_mut(Axis(1))
            .into_par_iter()
            .enumerate()
            .try_for_each(|(i, mut col)| self.eigenvector_into(i, &mut col))?;
        Ok(vecs)
    }

    /// The dense matrix `diag(D) + rho * z * z^T`
    pub fn dense(&self) -> Array2<A> {
        let z = self.z.view().insert_axis(Axis(1));
        let mut mat = z.dot(&z.t()) * self.rho;
        let mut diag = mat.diag_mut();
        diag += &self.diag;
        mat
    }

    /// Releases the node, handing every array back to the caller
    pub fn into_parts(self) -> NodeParts<A> {
        let (eigvals, norms) = match self.state {
            State::Unsolved { .. } => (None, None),
            State::EigenvaluesReady { eigvals } => (Some(eigvals), None),
            State::Normalized { eigvals, norms } => (Some(eigvals), Some(norms)),
        };
        NodeParts {
            diag: self.diag,
            z: self.z,
            rho: self.rho,
            eigvals,
            norms,
        }
    }
}

fn failure_index(err: &LinalgError) -> usize {
    match err {
        LinalgError::BracketSearchOverflow { index, .. }
        | LinalgError::IterationCapExceeded { index, .. } => *index,
        _ => usize::MAX,
    }
}

//! Secular equation solver for the merge step of divide-and-conquer symmetric eigensolvers.
//!
//! Merging two solved halves of a symmetric tridiagonal matrix produces the rank-one updated
//! diagonal problem
//! ```text
//! D + rho * z * z^T
//! ```
//! whose eigenvalues are the roots of the secular equation
//! `f(x) = 1 + rho * sum z_i^2 / (d_i - x)`.
//! Every root sits alone in a known bracket, so each one is found by bisection independently of
//! the others. [`MergeNode`] holds one such problem and walks it through
//! `Unsolved -> EigenvaluesReady -> Normalized`, after which eigenvectors are computed on demand.
//!
//! ```rust
//! use ndarray::array;
//! use linfa_secular::{MergeNode, SingleProcess};
//!
//! let mut node = MergeNode::<f64>::new(array![1., 3.], array![1., 1.], 1., 1.).unwrap();
//! node.compute_eigenvalues(&SingleProcess)
//!     .unwrap()
//!     .compute_normalization_factors()
//!     .unwrap();
//! let v = node.eigenvector(0).unwrap();
//! assert!((v.dot(&v) - 1.).abs() < 1e-8);
//! ```

pub mod bisection;
pub mod bracket;
pub mod group;
pub mod node;
pub mod reduce;
pub mod secular;
pub mod verify;

use ndarray::NdFloat;
use thiserror::Error;

pub use group::{ProcessGroup, SingleProcess, ThreadGroup};
pub use node::{MergeNode, NodeParts, NodeStage};
pub use secular::SecularEquation;

#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum LinalgError {
    /// The rank-one coefficient is zero or not finite
    #[error("Rank-one update coefficient must be finite and non-zero")]
    InvalidUpdate,
    #[error("Diagonal has {diag} entries but update vector has {z}")]
    DimensionMismatch { diag: usize, z: usize },
    #[error("Expected {expected} eigenvalues, got {actual}")]
    EigenvalueCountMismatch { expected: usize, actual: usize },
    #[error("Diagonal is not strictly increasing at index {index}")]
    NotStrictlyIncreasing { index: usize },
    #[error("Bracket search for root {index} did not terminate after {steps} steps")]
    BracketSearchOverflow { index: usize, steps: usize },
    #[error("Bisection for root {index} did not converge after {iterations} iterations")]
    IterationCapExceeded { index: usize, iterations: usize },
    /// Aggregate of the per-root failures of one eigenvalue phase
    #[error("{failed} of {total} secular roots failed, first failure: {first}")]
    RootsFailed {
        failed: usize,
        total: usize,
        #[source]
        first: Box<LinalgError>,
    },
    #[error("Normalization factor of eigenvector {index} is not positive")]
    DegenerateNormalization { index: usize },
    #[error("Index {index} out of range for problem of size {len}")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("Output buffer holds {actual} entries, {required} required")]
    BufferTooSmall { required: usize, actual: usize },
    #[error("Operation requires a node in stage {expected:?}, node is {actual:?}")]
    InvalidState {
        expected: NodeStage,
        actual: NodeStage,
    },
    #[error("Process group failure: {0}")]
    ProcessGroup(String),
}

pub type Result<T> = std::result::Result<T, LinalgError>;

/// Side of the spectrum the extremal eigenvalue moves to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RhoSign {
    /// Extremal root lies below the first diagonal entry
    Negative,
    /// Extremal root lies above the last diagonal entry
    Positive,
}

impl RhoSign {
    pub fn of<A: NdFloat>(rho: A) -> Self {
        if rho < A::zero() {
            RhoSign::Negative
        } else {
            RhoSign::Positive
        }
    }
}

/// Budgets and parallelism settings for solving a secular equation
///
/// Stored per [`MergeNode`], so independent subtrees may use different budgets. Setters follow
/// the builder pattern:
///
/// ```rust
/// use linfa_secular::SecularParams;
///
/// let params = SecularParams::<f64>::default()
///     .tolerance(1e-12)
///     .maxiter(20_000)
///     .partitions(4);
/// assert_eq!(params.max_extension_steps, 100);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct SecularParams<A> {
    /// Absolute tolerance on the bisection half-width
    pub tolerance: A,
    /// Maximal number of bisection iterations per root
    pub maxiter: usize,
    /// Maximal number of outward steps when bracketing the extremal root
    pub max_extension_steps: usize,
    /// Number of static partitions of the secular sum
    pub partitions: usize,
    /// Problems shorter than this are summed sequentially
    pub min_parallel_len: usize,
}

impl<A: NdFloat> Default for SecularParams<A> {
    fn default() -> Self {
        SecularParams {
            tolerance: A::from(1e-10).unwrap(),
            maxiter: 10_000,
            max_extension_steps: 100,
            partitions: rayon::current_num_threads(),
            min_parallel_len: 1024,
        }
    }
}

impl<A: NdFloat> SecularParams<A> {
    pub fn tolerance(mut self, tolerance: A) -> Self {
        self.tolerance = tolerance;

        self
    }

    pub fn maxiter(mut self, maxiter: usize) -> Self {
        self.maxiter = maxiter;

        self
    }

    pub fn max_extension_steps(mut self, steps: usize) -> Self {
        self.max_extension_steps = steps;

        self
    }

    /// Set the number of static partitions used by the parallel secular sum
    ///
    /// Results are bit-identical for identical inputs as long as this value is unchanged.
    pub fn partitions(mut self, partitions: usize) -> Self {
        self.partitions = partitions;

        self
    }

    pub fn min_parallel_len(mut self, len: usize) -> Self {
        self.min_parallel_len = len;

        self
    }

    pub(crate) fn reducer(&self) -> reduce::ParallelSum {
        reduce::ParallelSum::new(self.partitions, self.min_parallel_len)
    }
}

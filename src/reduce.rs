//! Deterministic parallel summation over static partitions
//!
//! Floating point addition is only approximately associative, so the order in which partial sums
//! are combined changes the last bits of the result. The index range is therefore split into a
//! fixed number of contiguous blocks, each block is summed sequentially on the rayon pool, and the
//! block sums are combined in block order. For a fixed partition count the result does not depend
//! on thread scheduling.

use std::ops::Range;

use ndarray::NdFloat;
use rayon::prelude::*;

/// Splits `0..len` into `parts` contiguous blocks whose lengths differ by at most one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Partition {
    len: usize,
    parts: usize,
}

impl Partition {
    /// A partition count of 0 is treated as 1
    pub fn new(len: usize, parts: usize) -> Self {
        Partition {
            len,
            parts: parts.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn parts(&self) -> usize {
        self.parts
    }

    /// Range of block `k`. The first `len % parts` blocks hold one extra element, blocks past the
    /// end of a short range are empty.
    pub fn block(&self, k: usize) -> Range<usize> {
        let base = self.len / self.parts;
        let extra = self.len % self.parts;
        let start = k * base + k.min(extra);
        let size = if k < extra { base + 1 } else { base };
        let start = start.min(self.len);
        start..(start + size).min(self.len)
    }

    pub fn blocks(&self) -> impl Iterator<Item = Range<usize>> + '_ {
        (0..self.parts).map(move |k| self.block(k))
    }
}

/// Summation strategy shared by the secular equation and its derived sums
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParallelSum {
    partitions: usize,
    min_parallel_len: usize,
}

impl Default for ParallelSum {
    fn default() -> Self {
        ParallelSum::new(rayon::current_num_threads(), 1024)
    }
}

impl ParallelSum {
    pub fn new(partitions: usize, min_parallel_len: usize) -> Self {
        ParallelSum {
            partitions: partitions.max(1),
            min_parallel_len,
        }
    }

    /// Strategy that never leaves the calling thread
    pub fn sequential() -> Self {
        ParallelSum::new(1, usize::MAX)
    }

    /// Computes `term(0) + term(1) + ... + term(len - 1)`
    pub fn sum<A, F>(&self, len: usize, term: F) -> A
    where
        A: NdFloat,
        F: Fn(usize) -> A + Sync,
    {
        if len < self.min_parallel_len || self.partitions == 1 || len < 2 {
            return sum_range(0..len, &term);
        }

        let partition = Partition::new(len, self.partitions.min(len));
        let partials: Vec<A> = (0..partition.parts())
            .into_par_iter()
            .map(|k| sum_range(partition.block(k), &term))
            .collect();
        partials.into_iter().fold(A::zero(), |acc, x| acc + x)
    }
}

fn sum_range<A: NdFloat, F: Fn(usize) -> A>(range: Range<usize>, term: &F) -> A {
    range.fold(A::zero(), |acc, i| acc + term(i))
}

//! Process groups sharing the roots of one merge step
//!
//! Every root of the secular equation depends only on the broadcast inputs, so the index range is
//! split into one contiguous block per rank. Ranks solve their block locally and exchange results
//! once per phase through [`ProcessGroup::all_gather`].

use std::{
    any::Any,
    ops::Range,
    sync::{Arc, Barrier, Mutex},
};

use crate::{reduce::Partition, LinalgError, Result};

/// Capability to exchange data between the cooperating ranks of one subtree
///
/// Groups are created and owned by the driver of the recursion tree and passed into every
/// distributed operation explicitly, so independent subtrees may be solved concurrently on
/// different groups.
pub trait ProcessGroup {
    /// Rank of the calling process, in `0..size()`
    fn rank(&self) -> usize;

    /// Number of ranks in the group
    fn size(&self) -> usize;

    /// Collects `local` from every rank. Every rank receives all contributions, ordered by rank.
    ///
    /// This is a collective operation: all ranks must call it the same number of times.
    fn all_gather<T: Clone + Send + 'static>(&self, local: Vec<T>) -> Result<Vec<Vec<T>>>;
}

/// Indices owned by `rank` when `0..len` is shared by `size` ranks
pub fn local_range(len: usize, rank: usize, size: usize) -> Range<usize> {
    Partition::new(len, size).block(rank)
}

/// Gathers one value per index into a vector of length `len`
///
/// Each rank contributes the values of its [`local_range`], in index order.
pub fn gather_blocks<G, T>(group: &G, len: usize, local: Vec<T>) -> Result<Vec<T>>
where
    G: ProcessGroup,
    T: Clone + Send + 'static,
{
    let blocks = group.all_gather(local)?;
    let size = group.size();
    if blocks.len() != size {
        return Err(LinalgError::ProcessGroup(format!(
            "expected {} contributions, received {}",
            size,
            blocks.len()
        )));
    }

    let mut out = Vec::with_capacity(len);
    for (rank, block) in blocks.into_iter().enumerate() {
        let expected = local_range(len, rank, size).len();
        if block.len() != expected {
            return Err(LinalgError::ProcessGroup(format!(
                "rank {} contributed {} values, expected {}",
                rank,
                block.len(),
                expected
            )));
        }
        out.extend(block);
    }
    Ok(out)
}

/// Group consisting of the calling process alone
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SingleProcess;

impl ProcessGroup for SingleProcess {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn all_gather<T: Clone + Send + 'static>(&self, local: Vec<T>) -> Result<Vec<Vec<T>>> {
        Ok(vec![local])
    }
}

type Slot = Option<Box<dyn Any + Send>>;

#[derive(Debug)]
struct Shared {
    barrier: Barrier,
    slots: Mutex<Vec<Slot>>,
}

/// Group of in-process ranks, one handle per thread
///
/// ```rust
/// use linfa_secular::{ProcessGroup, ThreadGroup};
///
/// let handles = ThreadGroup::new(3);
/// let sums: Vec<usize> = std::thread::scope(|s| {
///     let workers: Vec<_> = handles
///         .iter()
///         .map(|g| s.spawn(move || g.all_gather(vec![g.rank()]).unwrap()))
///         .collect();
///     workers
///         .into_iter()
///         .map(|w| w.join().unwrap().into_iter().flatten().sum())
///         .collect()
/// });
/// assert_eq!(sums, vec![3, 3, 3]);
/// ```
#[derive(Debug, Clone)]
pub struct ThreadGroup {
    rank: usize,
    size: usize,
    shared: Arc<Shared>,
}

impl ThreadGroup {
    /// Creates the handles of a group with `size` ranks, ordered by rank
    pub fn new(size: usize) -> Vec<ThreadGroup> {
        let size = size.max(1);
        let shared = Arc::new(Shared {
            barrier: Barrier::new(size),
            slots: Mutex::new((0..size).map(|_| None).collect()),
        });
        (0..size)
            .map(|rank| ThreadGroup {
                rank,
                size,
                shared: shared.clone(),
            })
            .collect()
    }
}

fn poisoned() -> LinalgError {
    LinalgError::ProcessGroup("another rank panicked during a gather".to_string())
}

impl ProcessGroup for ThreadGroup {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn all_gather<T: Clone + Send + 'static>(&self, local: Vec<T>) -> Result<Vec<Vec<T>>> {
        // Every rank passes both barriers even on error, otherwise its peers would hang
        let stored = match self.shared.slots.lock() {
            Ok(mut slots) => {
                slots[self.rank] = Some(Box::new(local));
                true
            }
            Err(_) => false,
        };
        self.shared.barrier.wait();

        let gathered = match self.shared.slots.lock() {
            Ok(slots) => slots
                .iter()
                .enumerate()
                .map(|(rank, slot)| {
                    slot.as_ref()
                        .and_then(|data| data.downcast_ref::<Vec<T>>())
                        .cloned()
                        .ok_or_else(|| {
                            LinalgError::ProcessGroup(format!(
                                "rank {} contributed no data of the requested type",
                                rank
                            ))
                        })
                })
                .collect::<Result<Vec<_>>>(),
            Err(_) => Err(poisoned()),
        };
        self.shared.barrier.wait();

        // Slots are only read between the two barriers, so the own slot can be released now
        if let Ok(mut slots) = self.shared.slots.lock() {
            slots[self.rank] = None;
        }

        if !stored {
            return Err(poisoned());
        }
        gathered
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn ranges_partition_indices() {
        let ranges: Vec<_> = (0..3).map(|r| local_range(7, r, 3)).collect();
        assert_eq!(ranges, vec![0..3, 3..5, 5..7]);

        let ranges: Vec<_> = (0..4).map(|r| local_range(2, r, 4)).collect();
        assert_eq!(ranges, vec![0..1, 1..2, 2..2, 2..2]);
    }

    #[test]
    fn single_process() {
        let out = gather_blocks(&SingleProcess, 3, vec![1, 2, 3]).unwrap();
        assert_eq!(out, vec![1, 2, 3]);
        assert!(matches!(
            gather_blocks(&SingleProcess, 4, vec![1, 2, 3]),
            Err(LinalgError::ProcessGroup(_))
        ));
    }

    #[test]
    fn thread_group_gathers_in_rank_order() {
        let len = 10;
        let handles = ThreadGroup::new(4);
        let outputs: Vec<Vec<usize>> = thread::scope(|s| {
            let workers: Vec<_> = handles
                .iter()
                .map(|group| {
                    s.spawn(move || {
                        let local: Vec<usize> =
                            local_range(len, group.rank(), group.size()).map(|i| i * i).collect();
                        // two rounds to exercise slot reuse
                        let first = gather_blocks(group, len, local.clone()).unwrap();
                        let second = gather_blocks(group, len, local).unwrap();
                        assert_eq!(first, second);
                        first
                    })
                })
                .collect();
            workers.into_iter().map(|w| w.join().unwrap()).collect()
        });

        let expected: Vec<usize> = (0..len).map(|i| i * i).collect();
        for out in outputs {
            assert_eq!(out, expected);
        }
    }

    #[test]
    fn thread_group_type_mismatch() {
        let handles = ThreadGroup::new(2);
        let results: Vec<bool> = thread::scope(|s| {
            let a = s.spawn(|| handles[0].all_gather(vec![1u32]).is_err());
            let b = s.spawn(|| handles[1].all_gather(vec![1.0f64]).is_err());
            vec![a.join().unwrap(), b.join().unwrap()]
        });
        assert_eq!(results, vec![true, true]);
    }
}

//! The host-local part of a partitioned graph.

pub mod csr;

pub use csr::LocalCsrBuilder;

use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering::Relaxed};
use std::time::Instant;

use log::info;
use rayon::prelude::*;

use crate::index::Idx;
use crate::SharedMut;

/// Represents the target of an edge and its associated value.
#[derive(Clone, Copy, Debug)]
#[repr(C)]
pub struct Target<NI, EV> {
    pub target: NI,
    pub value: EV,
}

impl<T: Ord, V> Ord for Target<T, V> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.target.cmp(&other.target)
    }
}

impl<T: PartialOrd, V> PartialOrd for Target<T, V> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        self.target.partial_cmp(&other.target)
    }
}

impl<T: PartialEq, V> PartialEq for Target<T, V> {
    fn eq(&self, other: &Self) -> bool {
        self.target.eq(&other.target)
    }
}

impl<T: Eq, V> Eq for Target<T, V> {}

impl<T, EV> Target<T, EV> {
    pub fn new(target: T, value: EV) -> Self {
        Self { target, value }
    }
}

/// A Compressed-Sparse-Row graph over local node ids.
///
/// For a graph with node count `n` and edge count `m`, `offsets` has exactly
/// `n + 1` and `targets` exactly `m` entries. The out-edges of `u` are
/// `&targets[offsets[u]..offsets[u + 1]]`.
#[derive(Debug)]
pub struct LocalGraph<NI: Idx, EV = ()> {
    offsets: Box<[usize]>,
    targets: Box<[Target<NI, EV>]>,
}

impl<NI: Idx, EV> LocalGraph<NI, EV> {
    pub(crate) fn new(offsets: Box<[usize]>, targets: Box<[Target<NI, EV>]>) -> Self {
        debug_assert_eq!(offsets.last().copied(), Some(targets.len()));
        Self { offsets, targets }
    }

    #[inline]
    pub fn node_count(&self) -> usize {
        self.offsets.len() - 1
    }

    #[inline]
    pub fn edge_count(&self) -> usize {
        self.targets.len()
    }

    /// The slots of the out-edges of `node` in the target array.
    #[inline]
    pub fn edge_range(&self, node: NI) -> Range<usize> {
        self.offsets[node.index()]..self.offsets[node.index() + 1]
    }

    #[inline]
    pub fn out_degree(&self, node: NI) -> usize {
        let range = self.edge_range(node);
        range.end - range.start
    }

    #[inline]
    pub fn out_neighbors_with_values(&self, node: NI) -> &[Target<NI, EV>] {
        &self.targets[self.edge_range(node)]
    }

    pub fn out_neighbors(&self, node: NI) -> impl Iterator<Item = NI> + '_ {
        self.out_neighbors_with_values(node).iter().map(|t| t.target)
    }

    /// Creates a range-based out degree partition of the nodes.
    ///
    /// Divides the nodes into at most `concurrency` ranges such that these
    /// ranges have roughly equal total out degree.
    pub fn out_degree_partition(&self, concurrency: usize) -> Vec<Range<NI>> {
        let concurrency = usize::max(concurrency, 1);
        let batch_size = (self.edge_count() as f64 / concurrency as f64).ceil();
        greedy_node_map_partition(
            |node| self.out_degree(NI::new(node)),
            self.node_count(),
            batch_size as usize,
            concurrency,
        )
        .into_iter()
        .map(|r| NI::new(r.start)..NI::new(r.end))
        .collect()
    }
}

impl<NI, EV> LocalGraph<NI, EV>
where
    NI: Idx,
    EV: Copy + Send + Sync,
{
    /// Returns the graph with all edges reversed.
    ///
    /// The in-edges of every node are ordered by their source.
    pub fn transpose(&self) -> Self {
        let start = Instant::now();
        let node_count = self.node_count();
        let edge_count = self.edge_count();

        let degrees = (0..node_count)
            .map(|_| AtomicUsize::new(0))
            .collect::<Vec<_>>();
        self.targets.par_iter().for_each(|t| {
            degrees[t.target.index()].fetch_add(1, Relaxed);
        });

        let offsets = prefix_sum(degrees.into_iter().map(AtomicUsize::into_inner));
        let cursors = offsets[..node_count]
            .iter()
            .map(|&o| AtomicUsize::new(o))
            .collect::<Vec<_>>();

        let mut targets = Vec::<Target<NI, EV>>::with_capacity(edge_count);
        let targets_ptr = SharedMut::new(targets.as_mut_ptr());

        (0..node_count).into_par_iter().for_each(|source| {
            for t in &self.targets[self.offsets[source]..self.offsets[source + 1]] {
                let slot = cursors[t.target.index()].fetch_add(1, Relaxed);
                // SAFETY: every slot below `edge_count` is handed out exactly
                // once by the cursor of the target node.
                unsafe {
                    targets_ptr
                        .add(slot)
                        .write(Target::new(NI::new(source), t.value));
                }
            }
        });

        // SAFETY: the in-degrees sum up to `edge_count`, so the loop above
        // initialized every slot.
        unsafe {
            targets.set_len(edge_count);
        }

        to_mut_slices(&offsets, &mut targets)
            .par_iter_mut()
            .for_each(|list| list.sort_unstable_by_key(|t| t.target));

        info!(
            "Transposed local graph (node_count = {}, edge_count = {}) in {:?}",
            node_count,
            edge_count,
            start.elapsed()
        );

        Self::new(offsets.into_boxed_slice(), targets.into_boxed_slice())
    }
}

/// Turns per-node counts into `n + 1` offsets starting at zero.
pub(crate) fn prefix_sum<I: IntoIterator<Item = usize>>(degrees: I) -> Vec<usize> {
    let mut total = 0;
    let mut sums = vec![0];
    sums.extend(degrees.into_iter().map(|degree| {
        total += degree;
        total
    }));
    sums
}

fn to_mut_slices<'targets, T>(offsets: &[usize], targets: &'targets mut [T]) -> Vec<&'targets mut [T]> {
    let mut target_slices = Vec::with_capacity(offsets.len() - 1);
    let mut tail = targets;

    for window in offsets.windows(2) {
        let (list, remainder) = tail.split_at_mut(window[1] - window[0]);
        target_slices.push(list);
        tail = remainder;
    }

    target_slices
}

// Partition nodes 0..node_count into at most max_batches ranges such that the
// sums of node_map(node) for each range are roughly equal. It does so
// greedily and therefore does not guarantee an optimally balanced partition.
pub(crate) fn greedy_node_map_partition<F>(
    node_map: F,
    node_count: usize,
    batch_size: usize,
    max_batches: usize,
) -> Vec<Range<usize>>
where
    F: Fn(usize) -> usize,
{
    let mut partitions = Vec::with_capacity(max_batches);

    let mut partition_size = 0;
    let mut partition_start = 0;

    for node in 0..node_count {
        partition_size += node_map(node);

        if (partitions.len() < max_batches - 1 && partition_size >= batch_size)
            || node == node_count - 1
        {
            let partition_end = node + 1;
            partitions.push(partition_start..partition_end);
            partition_size = 0;
            partition_start = partition_end;
        }
    }

    partitions
}

use std::sync::atomic::{AtomicUsize, Ordering::AcqRel, Ordering::Acquire};
use std::time::Instant;

use log::info;

use crate::graph::{LocalGraph, Target};
use crate::index::Idx;
use crate::{Error, SharedMut};

/// Preallocated CSR structure that is filled concurrently.
///
/// The edge slice of every node is frozen with [`LocalCsrBuilder::fix_end_edge`]
/// before any edge is written. Writers reserve slots of a node's slice by
/// advancing the node's cursor with a compare-and-swap, so concurrent writers
/// never share a slot and every slot is handed out at most once.
pub struct LocalCsrBuilder<NI: Idx, EV> {
    offsets: Vec<usize>,
    cursors: Box<[AtomicUsize]>,
    targets: Vec<Target<NI, EV>>,
    targets_ptr: SharedMut<Target<NI, EV>>,
    edge_count: usize,
    fixed: usize,
}

impl<NI: Idx, EV: Copy> LocalCsrBuilder<NI, EV> {
    /// Allocates room for `node_count` nodes and `edge_count` edges.
    pub fn preallocate(node_count: usize, edge_count: usize) -> Self {
        let mut targets = Vec::with_capacity(edge_count);
        let targets_ptr = SharedMut::new(targets.as_mut_ptr());
        let mut offsets = Vec::with_capacity(node_count + 1);
        offsets.push(0);

        Self {
            offsets,
            cursors: (0..node_count).map(|_| AtomicUsize::new(0)).collect(),
            targets,
            targets_ptr,
            edge_count,
            fixed: 0,
        }
    }

    /// Creates a builder whose node slices end at the given inclusive
    /// prefix sums.
    pub fn from_ends(ends: &[usize]) -> Self {
        let edge_count = ends.last().copied().unwrap_or(0);
        let mut builder = Self::preallocate(ends.len(), edge_count);
        for (lid, &end) in ends.iter().enumerate() {
            builder.fix_end_edge(lid, end);
        }
        builder
    }

    /// Freezes the end of the edge slice of `lid`.
    ///
    /// Must be called once for every node in increasing `lid` order. The
    /// slice of `lid` starts where the slice of `lid - 1` ends.
    pub fn fix_end_edge(&mut self, lid: usize, end: usize) {
        assert_eq!(lid, self.fixed, "edge slices must be fixed in order");
        let start = self.offsets[lid];
        assert!(
            start <= end && end <= self.edge_count,
            "invalid end {end} for local node {lid} starting at {start}"
        );
        self.cursors[lid] = AtomicUsize::new(start);
        self.offsets.push(end);
        self.fixed += 1;
    }

    pub fn node_count(&self) -> usize {
        self.cursors.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    /// The next free slot of `lid`.
    pub fn cursor(&self, lid: usize) -> usize {
        self.cursors[lid].load(Acquire)
    }

    /// The exclusive end of the edge slice of `lid`.
    pub fn slice_end(&self, lid: usize) -> usize {
        self.offsets[lid + 1]
    }

    pub fn is_complete(&self, lid: usize) -> bool {
        self.cursor(lid) == self.slice_end(lid)
    }

    fn reserve(&self, lid: usize, count: usize) -> Result<usize, Error> {
        debug_assert!(lid < self.fixed);
        let end = self.slice_end(lid);
        let cursor = &self.cursors[lid];
        let mut current = cursor.load(Acquire);
        loop {
            if current + count > end {
                return Err(Error::CursorOverrun {
                    lid,
                    cursor: current,
                    requested: count,
                    end,
                });
            }
            match cursor.compare_exchange_weak(current, current + count, AcqRel, Acquire) {
                Ok(_) => return Ok(current),
                Err(actual) => current = actual,
            }
        }
    }

    /// Writes a single edge at the cursor of `lid`.
    pub fn construct_edge(&self, lid: usize, dst: NI, value: EV) -> Result<(), Error> {
        let slot = self.reserve(lid, 1)?;
        // SAFETY: `reserve` handed out `slot` exclusively and it lies below
        // the preallocated edge count.
        unsafe {
            self.targets_ptr.add(slot).write(Target::new(dst, value));
        }
        Ok(())
    }

    /// Writes consecutive edges at the cursor of `lid`.
    pub fn construct_edges(&self, lid: usize, edges: &[Target<NI, EV>]) -> Result<(), Error> {
        if edges.is_empty() {
            return Ok(());
        }
        let slot = self.reserve(lid, edges.len())?;
        // SAFETY: `reserve` handed out `slot..slot + edges.len()`
        // exclusively and the range lies below the preallocated edge count.
        unsafe {
            std::ptr::copy_nonoverlapping(edges.as_ptr(), self.targets_ptr.add(slot), edges.len());
        }
        Ok(())
    }

    /// Verifies that every edge slice has been filled and returns the graph.
    pub fn build(mut self) -> Result<LocalGraph<NI, EV>, Error> {
        let start = Instant::now();
        assert_eq!(self.fixed, self.node_count(), "not all edge slices are fixed");

        for (lid, cursor) in self.cursors.iter().enumerate() {
            let cursor = cursor.load(Acquire);
            let end = self.offsets[lid + 1];
            if cursor != end {
                return Err(Error::IncompleteSlice { lid, cursor, end });
            }
        }

        let edge_count = self.offsets.last().copied().unwrap_or(0);

        // SAFETY: every slice ends at its frozen end and the slices are
        // adjacent, so each slot below `edge_count` was written exactly once.
        unsafe {
            self.targets.set_len(edge_count);
        }

        info!(
            "Finalized local graph (node_count = {}, edge_count = {}) in {:?}",
            self.node_count(),
            edge_count,
            start.elapsed()
        );

        Ok(LocalGraph::new(
            self.offsets.into_boxed_slice(),
            self.targets.into_boxed_slice(),
        ))
    }
}

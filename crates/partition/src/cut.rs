//! Decides which host constructs each edge.

use std::time::Instant;

use bitvec::prelude::*;
use log::{debug, info};

use crate::input::GraphSource;
use crate::ownership::Ownership;
use crate::{Error, HostId};

/// The partitioning strategy for edges.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CutKind {
    /// Every edge is constructed by the owner of its source.
    EdgeCut,
    /// Nodes with an out-degree above `threshold` have their edges
    /// constructed by the owners of the edge targets.
    HybridVertexCut { threshold: u64 },
}

impl CutKind {
    pub const DEFAULT_THRESHOLD: u64 = 100;

    pub fn is_vertex_cut(&self) -> bool {
        matches!(self, CutKind::HybridVertexCut { .. })
    }
}

impl Default for CutKind {
    fn default() -> Self {
        CutKind::HybridVertexCut {
            threshold: Self::DEFAULT_THRESHOLD,
        }
    }
}

/// Routes the out-edges of nodes owned by a single host.
#[derive(Clone, Copy, Debug)]
pub struct EdgeRouter<'a> {
    ownership: &'a Ownership,
    host: HostId,
    cut: CutKind,
}

impl<'a> EdgeRouter<'a> {
    pub fn new(ownership: &'a Ownership, host: HostId, cut: CutKind) -> Self {
        Self {
            ownership,
            host,
            cut,
        }
    }

    pub fn ownership(&self) -> &'a Ownership {
        self.ownership
    }

    pub fn host(&self) -> HostId {
        self.host
    }

    /// Returns `true` if the edges of a node with `out_degree` are spread
    /// over the owners of their targets.
    #[inline]
    pub fn is_split(&self, out_degree: u64) -> bool {
        match self.cut {
            CutKind::EdgeCut => false,
            CutKind::HybridVertexCut { threshold } => out_degree > threshold,
        }
    }

    /// Returns the host that constructs an edge to `dst` whose source is
    /// owned by this router's host and has `out_degree` out-edges.
    ///
    /// The result only depends on the arguments, which allows every pass
    /// over the graph to recompute the same assignment.
    #[inline]
    pub fn route(&self, out_degree: u64, dst: u64) -> HostId {
        if self.is_split(out_degree) {
            self.ownership.owner_of(dst)
        } else {
            self.host
        }
    }
}

/// Edge counts a host assigned to every host, including itself.
#[derive(Debug)]
pub struct EdgeAssignment {
    /// `rows[h][i]` is the number of out-edges of the `i`-th node in this
    /// host's primary range that host `h` constructs.
    pub rows: Vec<Vec<u64>>,
    /// Total number of edges assigned to each host.
    pub assigned: Vec<u64>,
    /// Targets of edges kept on this host that are owned by other hosts.
    pub ghosts: BitVec,
}

impl EdgeAssignment {
    pub fn total_assigned(&self) -> u64 {
        self.assigned.iter().sum()
    }
}

/// Inspects the out-edges of all nodes in the primary range of the router's
/// host and counts the edges each host will construct.
///
/// Edgeless nodes owned through a bipartite split have no out-edges and are
/// not inspected.
pub fn assign_edges<S: GraphSource>(
    source: &S,
    router: &EdgeRouter<'_>,
) -> Result<EdgeAssignment, Error> {
    let start = Instant::now();
    let ownership = router.ownership();
    let host = router.host();
    let num_hosts = ownership.num_hosts() as usize;
    let range = ownership.range(host);
    let row_len = (range.end - range.start) as usize;

    let mut rows = vec![vec![0_u64; row_len]; num_hosts];
    let mut assigned = vec![0_u64; num_hosts];
    let mut ghosts = bitvec![0; ownership.node_count() as usize];

    source.reset_seek_counters();

    let node_count = ownership.node_count();
    let target = |e| {
        let dst = source.edge_dst(e);
        if dst < node_count {
            Ok(dst)
        } else {
            Err(Error::InvalidNode {
                gid: dst,
                node_count,
            })
        }
    };

    for (i, src) in range.clone().enumerate() {
        let degree = source.out_degree(src);
        if router.is_split(degree) {
            for e in source.edges(src) {
                let dst = target(e)?;
                let h = router.route(degree, dst) as usize;
                rows[h][i] += 1;
                assigned[h] += 1;
            }
        } else {
            rows[host as usize][i] += degree;
            assigned[host as usize] += degree;
            for e in source.edges(src) {
                let dst = target(e)?;
                if !ownership.is_owned(host, dst) {
                    ghosts.set(dst as usize, true);
                }
            }
        }
    }

    let expected = if range.is_empty() {
        0
    } else {
        source.edge_end(range.end - 1) - source.edge_begin(range.start)
    };
    let assignment = EdgeAssignment {
        rows,
        assigned,
        ghosts,
    };

    if assignment.total_assigned() != expected {
        return Err(Error::EdgeConservation {
            host,
            assigned: assignment.total_assigned(),
            expected,
        });
    }

    debug!("Host {} assigned edges {:?}", host, assignment.assigned);
    info!(
        "Host {} inspected {} edges in {:?}, read {} bytes in {} seeks",
        host,
        expected,
        start.elapsed(),
        source.num_bytes_read(),
        source.num_seeks()
    );

    Ok(assignment)
}

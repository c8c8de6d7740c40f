//! Assignment of global node ids to hosts.
//!
//! Every host owns a contiguous range of global ids. Graphs whose
//! edge-bearing nodes form a prefix of the id space (bipartite graphs) can
//! split that prefix and the remaining edgeless suffix separately, in which
//! case a host owns one range from each split.

use std::ops::Range;
use std::time::Instant;

use log::{info, warn};

use crate::cut::CutKind;
use crate::input::GraphSource;
use crate::{Error, HostId};

/// Returns the `id`-th of `num` blocks of `begin..end`.
///
/// All blocks have the same size, rounded up, except for the trailing blocks
/// which may be shorter or empty.
///
/// # Example
///
/// ```
/// use graph_partition::ownership::block_range;
///
/// assert_eq!(block_range(0, 10, 0, 3), 0..4);
/// assert_eq!(block_range(0, 10, 2, 3), 8..10);
/// assert_eq!(block_range(0, 2, 3, 4), 2..2);
/// ```
pub fn block_range(begin: u64, end: u64, id: usize, num: usize) -> Range<u64> {
    let len = end - begin;
    let per_block = u64::max((len + num as u64 - 1) / num as u64, 1);
    let block_begin = u64::min(per_block * id as u64, len);
    let block_end = u64::min(per_block * (id as u64 + 1), len);
    begin + block_begin..begin + block_end
}

/// How global node ids are distributed over the hosts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ownership {
    node_count: u64,
    gid2host: Vec<Range<u64>>,
    gid2host_without_edges: Option<Vec<Range<u64>>>,
}

impl Ownership {
    /// Splits `0..node_count` into equally sized ranges.
    pub fn uniform(node_count: u64, num_hosts: HostId) -> Self {
        let num = num_hosts as usize;
        Self {
            node_count,
            gid2host: (0..num)
                .map(|h| block_range(0, node_count, h, num))
                .collect(),
            gid2host_without_edges: None,
        }
    }

    /// Splits `0..node_count` proportionally to the given host weights.
    ///
    /// The id space is divided into `sum(weights)` blocks and every host
    /// takes as many consecutive blocks as its weight says. Returns `None`
    /// if a weight is zero.
    pub fn weighted(node_count: u64, weights: &[u32]) -> Option<Self> {
        if weights.iter().any(|&w| w == 0) {
            return None;
        }

        let num_blocks = weights.iter().map(|&w| w as usize).sum::<usize>();
        let mut first_block = 0;
        let gid2host = weights
            .iter()
            .map(|&w| {
                let last_block = first_block + w as usize - 1;
                let start = block_range(0, node_count, first_block, num_blocks).start;
                let end = block_range(0, node_count, last_block, num_blocks).end;
                first_block = last_block + 1;
                start..end
            })
            .collect();

        Some(Self {
            node_count,
            gid2host,
            gid2host_without_edges: None,
        })
    }

    /// Splits the edge-bearing prefix `0..with_edges` and the remaining
    /// `with_edges..node_count` independently.
    pub fn bipartite(node_count: u64, with_edges: u64, num_hosts: HostId) -> Self {
        let num = num_hosts as usize;
        Self {
            node_count,
            gid2host: (0..num)
                .map(|h| block_range(0, with_edges, h, num))
                .collect(),
            gid2host_without_edges: Some(
                (0..num)
                    .map(|h| block_range(with_edges, node_count, h, num))
                    .collect(),
            ),
        }
    }

    /// Computes the ownership of all nodes of `source`.
    ///
    /// Unsupported weightings are reported on host 0 and replaced by a
    /// uniform split.
    pub fn compute<S: GraphSource>(
        source: &S,
        host: HostId,
        num_hosts: HostId,
        cut: CutKind,
        scale_factors: &[u32],
        bipartite: bool,
    ) -> Result<Self, Error> {
        if num_hosts == 0 || host >= num_hosts {
            return Err(Error::InvalidHost { host, num_hosts });
        }

        let start = Instant::now();
        let node_count = source.node_count();

        let ownership = if bipartite {
            if !scale_factors.is_empty() && host == 0 {
                warn!("Scale factors are not supported for bipartite graphs, using a uniform split");
            }
            Self::bipartite(node_count, nodes_with_edges(source), num_hosts)
        } else if scale_factors.is_empty() || num_hosts == 1 {
            Self::uniform(node_count, num_hosts)
        } else if cut.is_vertex_cut() {
            if host == 0 {
                warn!("Scale factors are not supported for hybrid vertex cuts, using a uniform split");
            }
            Self::uniform(node_count, num_hosts)
        } else if scale_factors.len() != num_hosts as usize {
            if host == 0 {
                warn!(
                    "Expected {} scale factors, got {}, using a uniform split",
                    num_hosts,
                    scale_factors.len()
                );
            }
            Self::uniform(node_count, num_hosts)
        } else {
            match Self::weighted(node_count, scale_factors) {
                Some(ownership) => ownership,
                None => {
                    if host == 0 {
                        warn!("Scale factors must be positive, using a uniform split");
                    }
                    Self::uniform(node_count, num_hosts)
                }
            }
        };

        info!(
            "Computed ownership of {} nodes for {} hosts in {:?}",
            node_count,
            num_hosts,
            start.elapsed()
        );

        Ok(ownership)
    }

    pub fn node_count(&self) -> u64 {
        self.node_count
    }

    pub fn num_hosts(&self) -> HostId {
        self.gid2host.len() as HostId
    }

    /// The primary range of global ids owned by `host`.
    pub fn range(&self, host: HostId) -> Range<u64> {
        self.gid2host[host as usize].clone()
    }

    /// The range of edgeless nodes owned by `host`, empty unless the
    /// ownership is bipartite.
    pub fn range_without_edges(&self, host: HostId) -> Range<u64> {
        match &self.gid2host_without_edges {
            Some(ranges) => ranges[host as usize].clone(),
            None => 0..0,
        }
    }

    pub fn is_bipartite(&self) -> bool {
        self.gid2host_without_edges.is_some()
    }

    /// Returns the host owning `gid`.
    pub fn owner_of(&self, gid: u64) -> HostId {
        debug_assert!(gid < self.node_count, "gid {gid} out of range");
        let ranges = match &self.gid2host_without_edges {
            Some(ranges) if gid >= self.primary_end() => ranges,
            _ => &self.gid2host,
        };
        ranges.partition_point(|r| r.end <= gid) as HostId
    }

    pub fn is_owned(&self, host: HostId, gid: u64) -> bool {
        self.range(host).contains(&gid) || self.range_without_edges(host).contains(&gid)
    }

    /// Number of global ids owned by `host`.
    pub fn owned_count(&self, host: HostId) -> u64 {
        let primary = self.range(host);
        let secondary = self.range_without_edges(host);
        (primary.end - primary.start) + (secondary.end - secondary.start)
    }

    fn primary_end(&self) -> u64 {
        self.gid2host.last().map_or(0, |r| r.end)
    }
}

// Edge-bearing nodes form a prefix in bipartite graphs, so the first node
// whose edges start at the global edge count ends that prefix.
fn nodes_with_edges<S: GraphSource>(source: &S) -> u64 {
    let edge_count = source.edge_count();
    let (mut lo, mut hi) = (0, source.node_count());
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if source.edge_begin(mid).offset() < edge_count {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    lo
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::EdgeListSource;

    fn assert_exhaustive(ownership: &Ownership) {
        let mut covered = vec![0; ownership.node_count() as usize];
        for host in 0..ownership.num_hosts() {
            for gid in ownership
                .range(host)
                .chain(ownership.range_without_edges(host))
            {
                covered[gid as usize] += 1;
                assert_eq!(ownership.owner_of(gid), host);
                assert!(ownership.is_owned(host, gid));
            }
        }
        assert!(covered.iter().all(|&c| c == 1), "{covered:?}");
    }

    #[test]
    fn block_range_rounds_up() {
        assert_eq!(block_range(0, 6, 0, 2), 0..3);
        assert_eq!(block_range(0, 6, 1, 2), 3..6);
        assert_eq!(block_range(0, 7, 0, 3), 0..3);
        assert_eq!(block_range(0, 7, 1, 3), 3..6);
        assert_eq!(block_range(0, 7, 2, 3), 6..7);
        assert_eq!(block_range(5, 5, 0, 2), 5..5);
    }

    #[test]
    fn uniform_split_is_exhaustive() {
        for node_count in [0, 1, 2, 5, 17, 100] {
            for num_hosts in 1..=7 {
                let ownership = Ownership::uniform(node_count, num_hosts);
                assert_eq!(ownership.num_hosts(), num_hosts);
                assert_exhaustive(&ownership);

                let owned = (0..num_hosts)
                    .map(|h| ownership.owned_count(h))
                    .sum::<u64>();
                assert_eq!(owned, node_count);
            }
        }
    }

    #[test]
    fn more_hosts_than_nodes() {
        let ownership = Ownership::uniform(2, 4);
        assert_eq!(ownership.range(0), 0..1);
        assert_eq!(ownership.range(1), 1..2);
        assert_eq!(ownership.range(2), 2..2);
        assert_eq!(ownership.range(3), 2..2);
        assert_exhaustive(&ownership);
    }

    #[test]
    fn weighted_split() {
        let ownership = Ownership::weighted(6, &[1, 2]).unwrap();
        assert_eq!(ownership.range(0), 0..2);
        assert_eq!(ownership.range(1), 2..6);
        assert_exhaustive(&ownership);

        assert!(Ownership::weighted(6, &[1, 0]).is_none());
    }

    #[test]
    fn bipartite_split() {
        let source = EdgeListSource::from_edges(
            6,
            vec![(0, 3, ()), (0, 4, ()), (1, 4, ()), (1, 5, ()), (2, 5, ()), (2, 3, ())],
        );
        let ownership = Ownership::compute(&source, 0, 2, CutKind::default(), &[], true).unwrap();

        assert!(ownership.is_bipartite());
        assert_eq!(ownership.range(0), 0..2);
        assert_eq!(ownership.range(1), 2..3);
        assert_eq!(ownership.range_without_edges(0), 3..5);
        assert_eq!(ownership.range_without_edges(1), 5..6);
        assert_eq!(ownership.owned_count(0), 4);
        assert_exhaustive(&ownership);
    }

    #[test]
    fn unsupported_weights_fall_back_to_uniform() {
        let source = EdgeListSource::from_edges(6, vec![(0, 1, ())]);
        let uniform = Ownership::uniform(6, 2);

        let hybrid = Ownership::compute(&source, 0, 2, CutKind::default(), &[1, 2], false).unwrap();
        assert_eq!(hybrid, uniform);

        let wrong_len = Ownership::compute(&source, 0, 2, CutKind::EdgeCut, &[1, 2, 3], false).unwrap();
        assert_eq!(wrong_len, uniform);

        let zero = Ownership::compute(&source, 1, 2, CutKind::EdgeCut, &[0, 2], false).unwrap();
        assert_eq!(zero, uniform);

        let weighted = Ownership::compute(&source, 0, 2, CutKind::EdgeCut, &[1, 2], false).unwrap();
        assert_eq!(weighted.range(0), 0..2);
    }

    #[test]
    fn rejects_invalid_host() {
        let source = EdgeListSource::from_edges(2, vec![(0, 1, ())]);
        let ownership = Ownership::compute(&source, 2, 2, CutKind::EdgeCut, &[], false);
        assert!(matches!(
            ownership,
            Err(Error::InvalidHost {
                host: 2,
                num_hosts: 2
            })
        ));
    }
}

//! The edge count round and the local node universe derived from it.

use std::time::Instant;

use bitvec::slice::BitSlice;
use log::{debug, info};

use crate::comm::{Channel, Phase, RecvBuffer, SendBuffer};
use crate::cut::EdgeAssignment;
use crate::graph::LocalCsrBuilder;
use crate::id_map::IdMap;
use crate::index::Idx;
use crate::ownership::Ownership;
use crate::{Error, HostId};

/// Edge counts every host announced to this host.
#[derive(Debug)]
pub struct EdgeCounts {
    /// `rows[h][i]` is the number of out-edges of the `i`-th node in the
    /// primary range of host `h` that this host constructs.
    pub rows: Vec<Vec<u64>>,
    /// Number of edges this host receives from its peers.
    pub edges_to_receive: u64,
}

/// Sends every peer the number of edges it will construct for each node of
/// this host and receives the same from all peers.
///
/// Blocks until a message from every peer arrived and advances `phase`
/// afterwards.
pub fn exchange_edge_counts<C>(
    channel: &C,
    phase: &mut Phase,
    ownership: &Ownership,
    assignment: EdgeAssignment,
) -> Result<EdgeCounts, Error>
where
    C: Channel + ?Sized,
{
    let start = Instant::now();
    let host = channel.host_id();
    let num_hosts = channel.num_hosts();

    let mut rows = assignment.rows.into_iter().map(Some).collect::<Vec<_>>();

    for peer in (0..num_hosts).filter(|&h| h != host) {
        let mut buffer = SendBuffer::new();
        let row = rows[peer as usize].take().unwrap_or_default();
        buffer
            .push(assignment.assigned[peer as usize])
            .push_slice(&row);
        channel.send_tagged(peer, *phase, buffer.into_bytes())?;
    }
    channel.flush();

    let mut edges_to_receive = 0;
    let mut pending = num_hosts as usize - 1;
    while pending > 0 {
        channel.handle_receives();
        let Some((from, bytes)) = channel.receive_tagged(*phase) else {
            std::thread::yield_now();
            continue;
        };

        let mut buffer = RecvBuffer::new(&bytes);
        let assigned = buffer.read()?;
        let row = buffer.read_vec::<u64>()?;
        check_row(ownership, from, &row)?;

        let expected = row.iter().sum::<u64>();
        if expected != assigned {
            return Err(Error::EdgeConservation {
                host: from,
                assigned,
                expected,
            });
        }

        debug!("Host {} receives {} edges from host {}", host, assigned, from);
        edges_to_receive += assigned;
        rows[from as usize] = Some(row);
        pending -= 1;
    }

    phase.advance();

    info!(
        "Host {} exchanged edge counts in {:?}, receiving {} edges",
        host,
        start.elapsed(),
        edges_to_receive
    );

    Ok(EdgeCounts {
        rows: rows.into_iter().map(Option::unwrap_or_default).collect(),
        edges_to_receive,
    })
}

// A count row covers the primary range of its sender, one entry per node.
fn check_row(ownership: &Ownership, host: HostId, row: &[u64]) -> Result<(), Error> {
    let range = ownership.range(host);
    let expected = usize::try_from(range.end - range.start)?;
    if row.len() != expected {
        return Err(Error::CountRowLength {
            host,
            actual: row.len(),
            expected,
        });
    }
    Ok(())
}

/// The nodes resident on a host and the bounds of their edge slices.
#[derive(Debug)]
pub struct LocalLayout<NI: Idx> {
    pub id_map: IdMap<NI>,
    /// Inclusive prefix sum of the edge counts in local id order.
    pub ends: Vec<usize>,
}

impl<NI: Idx> LocalLayout<NI> {
    /// Determines the local nodes of `host`.
    ///
    /// Walks the nodes of all hosts in host order. A node becomes local if
    /// this host constructs edges for it, if this host owns it or if it is
    /// the target of an edge kept on this host.
    pub fn build(
        ownership: &Ownership,
        host: HostId,
        counts: &EdgeCounts,
        ghosts: &BitSlice,
    ) -> Result<Self, Error> {
        let start = Instant::now();
        let capacity = ownership.owned_count(host) as usize;
        let mut id_map = IdMap::with_capacity(capacity);
        let mut ends = Vec::with_capacity(capacity);
        let mut edge_count = 0_usize;

        for h in 0..ownership.num_hosts() {
            let owned = h == host;
            let row = &counts.rows[h as usize];
            check_row(ownership, h, row)?;

            for (gid, &count) in ownership.range(h).zip(row) {
                if count > 0 || owned || ghosts[gid as usize] {
                    id_map.register(gid, h);
                    edge_count += usize::try_from(count)?;
                    ends.push(edge_count);
                }
            }

            for gid in ownership.range_without_edges(h) {
                if owned || ghosts[gid as usize] {
                    id_map.register(gid, h);
                    ends.push(edge_count);
                }
            }
        }

        info!(
            "Host {} created {} local nodes with {} edges in {:?}",
            host,
            id_map.len(),
            edge_count,
            start.elapsed()
        );

        Ok(Self { id_map, ends })
    }

    pub fn node_count(&self) -> usize {
        self.ends.len()
    }

    pub fn edge_count(&self) -> usize {
        self.ends.last().copied().unwrap_or(0)
    }

    /// Preallocates the local CSR with the edge slices of this layout.
    pub fn csr_builder<EV: Copy>(&self) -> LocalCsrBuilder<NI, EV> {
        LocalCsrBuilder::from_ends(&self.ends)
    }
}

#[cfg(test)]
mod tests {
    use bitvec::prelude::*;

    use super::*;
    use crate::comm::LocalNetwork;
    use crate::cut::{assign_edges, CutKind, EdgeRouter};
    use crate::input::EdgeListSource;

    #[test]
    fn layout_walks_hosts_in_order() {
        let ownership = Ownership::uniform(6, 2);
        let counts = EdgeCounts {
            rows: vec![vec![3, 1, 0], vec![0, 0, 0]],
            edges_to_receive: 0,
        };
        let mut ghosts = bitvec![0; 6];
        ghosts.set(3, true);
        ghosts.set(4, true);

        let layout = LocalLayout::<u32>::build(&ownership, 0, &counts, &ghosts).unwrap();

        assert_eq!(layout.id_map.local_to_global(), &[0, 1, 2, 3, 4]);
        assert_eq!(layout.id_map.owners(), &[0, 0, 0, 1, 1]);
        assert_eq!(layout.ends, vec![3, 4, 4, 4, 4]);
        assert_eq!(layout.edge_count(), 4);
    }

    #[test]
    fn remote_sources_become_local() {
        let ownership = Ownership::uniform(6, 2);
        let counts = EdgeCounts {
            rows: vec![vec![2, 0, 0], vec![1, 1, 0]],
            edges_to_receive: 2,
        };
        let ghosts = bitvec![0; 6];

        let layout = LocalLayout::<u32>::build(&ownership, 1, &counts, &ghosts).unwrap();

        assert_eq!(layout.id_map.local_to_global(), &[0, 3, 4, 5]);
        assert_eq!(layout.ends, vec![2, 3, 4, 4]);
    }

    #[test]
    fn exchanges_counts_between_hosts() {
        let source = EdgeListSource::from_edges(
            6,
            vec![
                (0, 1, ()),
                (0, 3, ()),
                (0, 4, ()),
                (1, 2, ()),
                (3, 0, ()),
                (3, 4, ()),
                (4, 5, ()),
            ],
        );
        let ownership = Ownership::uniform(6, 2);
        let channels = LocalNetwork::new(2);

        let results = std::thread::scope(|s| {
            let handles = channels
                .iter()
                .map(|channel| {
                    let (source, ownership) = (&source, &ownership);
                    s.spawn(move || {
                        let cut = CutKind::HybridVertexCut { threshold: 1 };
                        let router = EdgeRouter::new(ownership, channel.host_id(), cut);
                        let assignment = assign_edges(source, &router).unwrap();
                        let mut phase = Phase::default();
                        let counts =
                            exchange_edge_counts(channel, &mut phase, ownership, assignment)
                                .unwrap();
                        (counts, phase)
                    })
                })
                .collect::<Vec<_>>();
            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .collect::<Vec<_>>()
        });

        let (counts, phase) = &results[0];
        assert_eq!(*phase, Phase::new(1));
        assert_eq!(counts.edges_to_receive, 1);
        assert_eq!(counts.rows, vec![vec![1, 1, 0], vec![1, 0, 0]]);

        let (counts, _) = &results[1];
        assert_eq!(counts.edges_to_receive, 2);
        assert_eq!(counts.rows, vec![vec![2, 0, 0], vec![1, 1, 0]]);
    }

    fn receive_row(assigned: u64, row: &[u64]) -> Result<EdgeCounts, Error> {
        let source = EdgeListSource::from_edges(6, vec![(0, 1, ()), (3, 4, ())]);
        let ownership = Ownership::uniform(6, 2);
        let channels = LocalNetwork::new(2);
        let mut phase = Phase::default();

        let mut buffer = SendBuffer::new();
        buffer.push(assigned).push_slice(row);
        channels[1].send_tagged(0, phase, buffer.into_bytes()).unwrap();
        channels[1].flush();

        let router = EdgeRouter::new(&ownership, 0, CutKind::default());
        let assignment = assign_edges(&source, &router).unwrap();
        exchange_edge_counts(&channels[0], &mut phase, &ownership, assignment)
    }

    #[test]
    fn rejects_counts_that_do_not_add_up() {
        assert!(matches!(
            receive_row(5, &[1, 0, 0]),
            Err(Error::EdgeConservation {
                host: 1,
                assigned: 5,
                expected: 1
            })
        ));
    }

    #[test]
    fn rejects_short_count_rows() {
        assert!(matches!(
            receive_row(1, &[1, 0]),
            Err(Error::CountRowLength {
                host: 1,
                actual: 2,
                expected: 3
            })
        ));
    }

    #[test]
    fn layout_rejects_short_count_rows() {
        let ownership = Ownership::uniform(6, 2);
        let counts = EdgeCounts {
            rows: vec![vec![3, 1, 0], vec![0]],
            edges_to_receive: 0,
        };
        let ghosts = bitvec![0; 6];

        let layout = LocalLayout::<u32>::build(&ownership, 0, &counts, &ghosts);

        assert!(matches!(
            layout,
            Err(Error::CountRowLength {
                host: 1,
                actual: 1,
                expected: 3
            })
        ));
    }
}

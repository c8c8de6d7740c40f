//! A library to partition a graph across a set of hosts and to construct the
//! host-local part of it.
//!
//! Every participating host reads the same graph from disk, computes which
//! nodes it owns and which edges it is responsible for, exchanges edges with
//! its peers and finally materializes a local Compressed-Sparse-Row (CSR)
//! graph. Nodes owned by the host are called *masters*, replicas of nodes
//! owned by other hosts are called *mirrors*.
//!
//! # Partitioning
//!
//! The global node id space is split into contiguous ranges, one per host.
//! Edges are assigned by a hybrid vertex cut: a node with an out-degree
//! above a configurable threshold has its edges moved to the hosts owning the
//! edge targets, all other nodes keep their edges with their owner. The
//! strategy is selected via [`CutKind`].
//!
//! # Construction
//!
//! Construction runs two all-to-all communication rounds over a [`Channel`].
//! The first round exchanges edge counts so that every host can preallocate
//! its local CSR. The second round ships the edges themselves; a sender and a
//! receiver task fill the preallocated structure concurrently.
//!
//! The crate ships an in-process [`LocalNetwork`] which connects a number of
//! hosts running on threads of the same process:
//!
//! ```
//! use graph_partition::prelude::*;
//!
//! let source = EdgeListSource::<()>::from_edges(
//!     6,
//!     vec![(0, 1, ()), (0, 3, ()), (0, 4, ()), (1, 2, ()), (3, 0, ()), (3, 4, ()), (4, 5, ())],
//! );
//!
//! let channels = LocalNetwork::new(2);
//!
//! let graphs = std::thread::scope(|s| {
//!     let handles = channels
//!         .iter()
//!         .map(|channel| {
//!             let source = &source;
//!             s.spawn(move || {
//!                 let config = PartitionConfig::new(channel.host_id(), 2).threshold(1);
//!                 let mut phase = Phase::default();
//!                 DistGraph::<u32, ()>::build(source, channel, &mut phase, &config)
//!             })
//!         })
//!         .collect::<Vec<_>>();
//!
//!     handles
//!         .into_iter()
//!         .map(|h| h.join().unwrap().unwrap())
//!         .collect::<Vec<_>>()
//! });
//!
//! let edge_count = graphs.iter().map(|g| g.graph().edge_count()).sum::<usize>();
//! assert_eq!(edge_count, 7);
//!
//! assert_eq!(graphs[0].master_range(), 0..3);
//! assert_eq!(graphs[1].master_range(), 1..4);
//! ```

pub mod comm;
pub mod cut;
pub mod dist_graph;
pub mod exchange;
pub mod graph;
pub mod id_map;
pub mod index;
pub mod input;
pub mod meta;
pub mod mirror;
pub mod ownership;
pub mod prelude;
pub mod protocol;

pub use crate::comm::{Channel, LocalChannel, LocalNetwork, Phase};
pub use crate::cut::CutKind;
pub use crate::dist_graph::{DistGraph, ExchangeMode, PartitionConfig};
pub use crate::graph::LocalGraph;
pub use crate::mirror::SyncType;

use std::path::PathBuf;

use thiserror::Error;

/// Identifies a participating host, `0 <= host < num_hosts`.
pub type HostId = u32;

#[derive(Error, Debug)]
pub enum Error {
    #[error("error while loading graph")]
    IoError {
        #[from]
        source: std::io::Error,
    },
    #[error("incompatible index type")]
    IdxError {
        #[from]
        source: std::num::TryFromIntError,
    },
    #[error("unsupported .gr file version {version}")]
    UnsupportedVersion { version: u64 },
    #[error("invalid edge value size, expected {expected} bytes, got {actual} bytes")]
    InvalidEdgeValueSize { expected: usize, actual: usize },
    #[error("truncated graph file, expected at least {expected} bytes, got {actual} bytes")]
    TruncatedGraph { expected: usize, actual: usize },
    #[error("edge end {end} of node {node} is out of order or exceeds the edge count")]
    InvalidEdgeEnd { node: u64, end: u64 },
    #[error("node {gid} is out of range for {node_count} nodes")]
    InvalidNode { gid: u64, node_count: u64 },
    #[error("malformed edge in line {line}")]
    InvalidEdgeList { line: usize },
    #[error("host {host} is out of range for {num_hosts} hosts")]
    InvalidHost { host: HostId, num_hosts: HostId },
    #[error("host {host} assigned {assigned} edges but is responsible for {expected} edges")]
    EdgeConservation {
        host: HostId,
        assigned: u64,
        expected: u64,
    },
    #[error("writing {requested} edges for local node {lid} at slot {cursor} overruns its slice end {end}")]
    CursorOverrun {
        lid: usize,
        cursor: usize,
        requested: usize,
        end: usize,
    },
    #[error("edge slice of local node {lid} stopped at slot {cursor}, expected {end}")]
    IncompleteSlice { lid: usize, cursor: usize, end: usize },
    #[error("global node {gid} has no local id on host {host}")]
    UnknownNode { gid: u64, host: HostId },
    #[error("host {host} announced edge counts for {actual} nodes, but owns {expected} nodes")]
    CountRowLength {
        host: HostId,
        actual: usize,
        expected: usize,
    },
    #[error("edge message carries {values} values for {dsts} targets")]
    MismatchedEdgeValues { dsts: usize, values: usize },
    #[error("host {host} received {received} more edges than announced")]
    UnexpectedEdges { host: HostId, received: u64 },
    #[error("owned nodes of host {host} are not contiguous in local id space")]
    MasterRange { host: HostId },
    #[error("truncated message, expected {expected} more bytes, got {actual}")]
    TruncatedMessage { expected: usize, actual: usize },
    #[error("unable to open partition metadata {path:?}")]
    MissingMetadata {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[repr(transparent)]
pub struct SharedMut<T>(*mut T);
unsafe impl<T: Send> Send for SharedMut<T> {}
unsafe impl<T: Sync> Sync for SharedMut<T> {}

impl<T> SharedMut<T> {
    pub fn new(ptr: *mut T) -> Self {
        SharedMut(ptr)
    }

    delegate::delegate! {
        to self.0 {
            /// # Safety
            ///
            /// Ensure that `count` does not exceed the capacity of the Vec.
            pub unsafe fn add(&self, count: usize) -> *mut T;
        }
    }
}

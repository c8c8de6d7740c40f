//! The partitioned graph of a single host.

use std::ops::Range;
use std::path::{Path, PathBuf};
use std::time::Instant;

use log::info;

use crate::comm::{Channel, LocalNetwork, Phase};
use crate::cut::{assign_edges, CutKind, EdgeRouter};
use crate::exchange::{exchange_edge_counts, LocalLayout};
use crate::graph::{LocalGraph, Target};
use crate::id_map::IdMap;
use crate::index::Idx;
use crate::input::{GraphSource, InputFormat};
use crate::meta::{meta_file_path, write_meta_file, NodeInfo};
use crate::mirror::{MasterMirror, SyncType};
use crate::ownership::Ownership;
use crate::protocol::{exchange_edges, EdgeSink};
use crate::{Error, HostId};

pub use crate::protocol::ExchangeMode;

const DEFAULT_BASENAME: &str = "graph";

/// Settings for constructing a [`DistGraph`].
///
/// ```
/// use graph_partition::{CutKind, ExchangeMode, PartitionConfig};
///
/// let config = PartitionConfig::new(1, 4)
///     .threshold(1000)
///     .exchange_mode(ExchangeMode::Cooperative)
///     .transpose(true);
///
/// assert_eq!(config.get_cut(), CutKind::HybridVertexCut { threshold: 1000 });
/// assert!(config.is_transpose());
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartitionConfig {
    host: HostId,
    num_hosts: HostId,
    cut: CutKind,
    scale_factors: Vec<u32>,
    bipartite: bool,
    transpose: bool,
    partition_folder: Option<PathBuf>,
    basename: Option<String>,
    exchange_mode: ExchangeMode,
    batch_size: usize,
}

impl PartitionConfig {
    pub fn new(host: HostId, num_hosts: HostId) -> Self {
        Self {
            host,
            num_hosts,
            cut: CutKind::default(),
            scale_factors: Vec::new(),
            bipartite: false,
            transpose: false,
            partition_folder: None,
            basename: None,
            exchange_mode: ExchangeMode::default(),
            batch_size: LocalNetwork::DEFAULT_BATCH_SIZE,
        }
    }

    #[must_use]
    pub fn host(mut self, host: HostId) -> Self {
        self.host = host;
        self
    }

    #[must_use]
    pub fn num_hosts(mut self, num_hosts: HostId) -> Self {
        self.num_hosts = num_hosts;
        self
    }

    #[must_use]
    pub fn cut(mut self, cut: CutKind) -> Self {
        self.cut = cut;
        self
    }

    /// Selects the hybrid vertex cut with the given degree threshold.
    #[must_use]
    pub fn threshold(self, threshold: u64) -> Self {
        self.cut(CutKind::HybridVertexCut { threshold })
    }

    /// Relative number of nodes every host owns, one entry per host.
    ///
    /// Only honored by [`CutKind::EdgeCut`].
    #[must_use]
    pub fn scale_factors(mut self, scale_factors: Vec<u32>) -> Self {
        self.scale_factors = scale_factors;
        self
    }

    #[must_use]
    pub fn bipartite(mut self, bipartite: bool) -> Self {
        self.bipartite = bipartite;
        self
    }

    /// Reverse all local edges after construction.
    #[must_use]
    pub fn transpose(mut self, transpose: bool) -> Self {
        self.transpose = transpose;
        self
    }

    /// Folder to write the partition metadata of the host into.
    #[must_use]
    pub fn partition_folder<P: Into<PathBuf>>(mut self, folder: P) -> Self {
        self.partition_folder = Some(folder.into());
        self
    }

    /// Prefix of the metadata file names, defaults to the name of the
    /// input file or `graph`.
    #[must_use]
    pub fn basename<S: Into<String>>(mut self, basename: S) -> Self {
        self.basename = Some(basename.into());
        self
    }

    #[must_use]
    pub fn exchange_mode(mut self, exchange_mode: ExchangeMode) -> Self {
        self.exchange_mode = exchange_mode;
        self
    }

    /// Number of messages a channel buffers per peer before sending them.
    #[must_use]
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn get_host(&self) -> HostId {
        self.host
    }

    pub fn get_num_hosts(&self) -> HostId {
        self.num_hosts
    }

    pub fn get_cut(&self) -> CutKind {
        self.cut
    }

    pub fn get_scale_factors(&self) -> &[u32] {
        &self.scale_factors
    }

    pub fn is_bipartite(&self) -> bool {
        self.bipartite
    }

    pub fn is_transpose(&self) -> bool {
        self.transpose
    }

    pub fn get_partition_folder(&self) -> Option<&Path> {
        self.partition_folder.as_deref()
    }

    pub fn get_basename(&self) -> &str {
        self.basename.as_deref().unwrap_or(DEFAULT_BASENAME)
    }

    pub fn get_exchange_mode(&self) -> ExchangeMode {
        self.exchange_mode
    }

    pub fn get_batch_size(&self) -> usize {
        self.batch_size
    }
}

/// The part of a partitioned graph that resides on one host.
///
/// Local ids are assigned host by host: all nodes of lower hosts that are
/// local come first, followed by the nodes owned by this host and the nodes
/// of higher hosts. Owned nodes therefore occupy a contiguous range of local
/// ids, see [`DistGraph::master_range`].
pub struct DistGraph<NI: Idx, EV = ()> {
    host: HostId,
    num_hosts: HostId,
    total_edges: u64,
    ownership: Ownership,
    id_map: IdMap<NI>,
    masters: MasterMirror,
    graph: LocalGraph<NI, EV>,
    transposed: bool,
    thread_ranges: Vec<Range<NI>>,
}

impl<NI, EV> DistGraph<NI, EV>
where
    NI: Idx,
    EV: Copy + Send + Sync,
{
    /// Partitions `source` and constructs the local graph of the host
    /// behind `channel`.
    ///
    /// Every host of the channel has to call this with the same source and
    /// an equivalent configuration. Runs two communication rounds and
    /// advances `phase` once per round.
    pub fn build<S, C>(
        source: &S,
        channel: &C,
        phase: &mut Phase,
        config: &PartitionConfig,
    ) -> Result<Self, Error>
    where
        S: GraphSource<EV = EV>,
        C: Channel + ?Sized,
    {
        let start = Instant::now();
        let host = config.host;
        let num_hosts = config.num_hosts;

        if channel.host_id() != host || channel.num_hosts() != num_hosts {
            return Err(Error::InvalidHost {
                host: channel.host_id(),
                num_hosts,
            });
        }

        let ownership = Ownership::compute(
            source,
            host,
            num_hosts,
            config.cut,
            &config.scale_factors,
            config.bipartite,
        )?;
        let router = EdgeRouter::new(&ownership, host, config.cut);

        let mut assignment = assign_edges(source, &router)?;
        let ghosts = std::mem::take(&mut assignment.ghosts);
        let counts = exchange_edge_counts(channel, phase, &ownership, assignment)?;

        let layout = LocalLayout::<NI>::build(&ownership, host, &counts, &ghosts)?;
        drop(ghosts);

        let builder = layout.csr_builder::<EV>();
        exchange_edges(
            source,
            channel,
            phase,
            &router,
            &EdgeSink {
                host,
                id_map: &layout.id_map,
                builder: &builder,
            },
            counts.edges_to_receive,
            config.exchange_mode,
        )?;
        let graph = builder.build()?;

        let LocalLayout { id_map, .. } = layout;
        let masters =
            MasterMirror::classify(host, num_hosts, id_map.owners(), id_map.local_to_global())?;
        debug_assert_eq!(masters.num_masters() as u64, ownership.owned_count(host));

        let transposed = config.transpose && graph.node_count() > 0;
        let graph = if transposed { graph.transpose() } else { graph };

        let thread_ranges = graph.out_degree_partition(rayon::current_num_threads());

        let dist = Self {
            host,
            num_hosts,
            total_edges: source.edge_count(),
            ownership,
            id_map,
            masters,
            graph,
            transposed,
            thread_ranges,
        };

        info!(
            "Host {} owns {} of {} nodes, holds {} local nodes with {} edges, built in {:?}",
            host,
            dist.num_owned(),
            dist.total_nodes(),
            dist.node_count(),
            dist.edge_count(),
            start.elapsed()
        );

        if let Some(folder) = &config.partition_folder {
            let path = meta_file_path(folder, config.get_basename(), host, num_hosts);
            write_meta_file(path, &dist.meta_records())?;
        }

        Ok(dist)
    }

    /// Opens `path` with `format` and builds the local graph from it.
    ///
    /// Metadata files are named after the input file unless the
    /// configuration sets a basename.
    pub fn from_path<F, P, C>(
        format: F,
        path: P,
        channel: &C,
        phase: &mut Phase,
        config: &PartitionConfig,
    ) -> Result<Self, Error>
    where
        F: InputFormat,
        F::Source: GraphSource<EV = EV>,
        P: AsRef<Path>,
        C: Channel + ?Sized,
    {
        let path = path.as_ref();
        let source = format.open(path)?;

        match (&config.basename, path.file_name()) {
            (None, Some(name)) => {
                let config = config.clone().basename(name.to_string_lossy());
                Self::build(&source, channel, phase, &config)
            }
            _ => Self::build(&source, channel, phase, config),
        }
    }
}

impl<NI: Idx, EV> DistGraph<NI, EV> {
    delegate::delegate! {
        to self.graph {
            /// Number of local nodes.
            pub fn node_count(&self) -> usize;
            /// Number of local edges.
            pub fn edge_count(&self) -> usize;
            pub fn out_degree(&self, node: NI) -> usize;
            pub fn out_neighbors_with_values(&self, node: NI) -> &[Target<NI, EV>];
        }
    }

    delegate::delegate! {
        to self.masters {
            /// The contiguous range of local ids owned by this host.
            pub fn master_range(&self) -> Range<usize>;
            /// Global ids of the mirrors on this host, grouped by owner.
            pub fn mirror_nodes(&self) -> &[Vec<u64>];
            pub fn num_mirrors(&self) -> usize;
        }
    }

    pub fn host_id(&self) -> HostId {
        self.host
    }

    pub fn num_hosts(&self) -> HostId {
        self.num_hosts
    }

    /// Number of nodes of the whole graph.
    pub fn total_nodes(&self) -> u64 {
        self.ownership.node_count()
    }

    /// Number of edges of the whole graph.
    pub fn total_edges(&self) -> u64 {
        self.total_edges
    }

    pub fn ownership(&self) -> &Ownership {
        &self.ownership
    }

    pub fn is_owned(&self, gid: u64) -> bool {
        self.ownership.is_owned(self.host, gid)
    }

    /// Returns `true` if `gid` has a local id on this host.
    pub fn is_local(&self, gid: u64) -> bool {
        self.id_map.contains(gid)
    }

    pub fn g2l(&self, gid: u64) -> Option<NI> {
        self.id_map.to_local(gid)
    }

    pub fn l2g(&self, lid: NI) -> u64 {
        self.id_map.to_global(lid)
    }

    /// The host owning the global node `gid`.
    pub fn host_of(&self, gid: u64) -> HostId {
        self.ownership.owner_of(gid)
    }

    pub fn owner_of_local(&self, lid: NI) -> HostId {
        self.id_map.owner_of_local(lid)
    }

    pub fn num_owned(&self) -> usize {
        self.masters.num_masters()
    }

    /// Calls `f` with the local id ranges a synchronization of `kind` has to
    /// reset.
    pub fn reset_range<F: FnMut(Range<usize>)>(&self, kind: SyncType, f: F) {
        self.masters.reset_range(kind, f)
    }

    pub fn graph(&self) -> &LocalGraph<NI, EV> {
        &self.graph
    }

    pub fn is_transposed(&self) -> bool {
        self.transposed
    }

    /// Local nodes split into ranges of roughly equal out degree, one per
    /// worker thread.
    pub fn thread_ranges(&self) -> &[Range<NI>] {
        &self.thread_ranges
    }

    /// Metadata records of all local nodes in local id order.
    pub fn meta_records(&self) -> Vec<NodeInfo> {
        self.id_map
            .local_to_global()
            .iter()
            .zip(self.id_map.owners())
            .enumerate()
            .map(|(lid, (&gid, &owner))| NodeInfo::new(gid, lid as u64, owner as u64))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::input::EdgeListSource;
    use crate::meta::read_meta_file;

    fn sample() -> EdgeListSource {
        EdgeListSource::from_edges(
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
        )
    }

    fn build_all<F>(source: &EdgeListSource, configure: F) -> Vec<(DistGraph<u32>, Phase)>
    where
        F: Fn(PartitionConfig) -> PartitionConfig + Sync,
    {
        let channels = LocalNetwork::new(2);
        std::thread::scope(|s| {
            let handles = channels
                .iter()
                .map(|channel| {
                    let configure = &configure;
                    s.spawn(move || {
                        let config = configure(PartitionConfig::new(channel.host_id(), 2));
                        let mut phase = Phase::default();
                        let graph = DistGraph::<u32>::build(source, channel, &mut phase, &config)?;
                        Ok::<_, Error>((graph, phase))
                    })
                })
                .collect::<Vec<_>>();
            handles
                .into_iter()
                .map(|h| h.join().unwrap().unwrap())
                .collect()
        })
    }

    fn neighbors(graph: &DistGraph<u32>, lid: u32) -> Vec<u32> {
        graph.graph().out_neighbors(lid).collect()
    }

    fn local_gids(graph: &DistGraph<u32>) -> BTreeSet<u64> {
        (0..graph.node_count() as u32).map(|lid| graph.l2g(lid)).collect()
    }

    fn owned_gids(graph: &DistGraph<u32>) -> Vec<u64> {
        graph
            .master_range()
            .map(|lid| graph.l2g(lid as u32))
            .collect()
    }

    fn global_edges(graph: &DistGraph<u32>) -> Vec<(u64, u64)> {
        (0..graph.node_count() as u32)
            .flat_map(|src| {
                neighbors(graph, src)
                    .into_iter()
                    .map(move |dst| (graph.l2g(src), graph.l2g(dst)))
            })
            .collect()
    }

    #[test]
    fn config_defaults() {
        let config = PartitionConfig::new(0, 1);

        assert_eq!(
            config.get_cut(),
            CutKind::HybridVertexCut { threshold: 100 }
        );
        assert_eq!(config.get_exchange_mode(), ExchangeMode::Concurrent);
        assert_eq!(config.get_batch_size(), LocalNetwork::DEFAULT_BATCH_SIZE);
        assert_eq!(config.get_basename(), "graph");
        assert!(config.get_partition_folder().is_none());
        assert!(!config.is_bipartite());
    }

    #[test]
    fn high_threshold_keeps_edges_with_owner() {
        let source = sample();
        let graphs = build_all(&source, |c| c);

        let (g0, phase) = &graphs[0];
        assert_eq!(*phase, Phase::new(2));
        assert_eq!(g0.node_count(), 5);
        assert_eq!(g0.edge_count(), 4);
        assert_eq!(neighbors(g0, 0), vec![1, 3, 4]);
        assert_eq!(neighbors(g0, 1), vec![2]);
        assert_eq!(g0.master_range(), 0..3);
        let mirrors: &[Vec<u64>] = &[vec![], vec![3, 4]];
        assert_eq!(g0.mirror_nodes(), mirrors);

        let (g1, _) = &graphs[1];
        assert_eq!(g1.node_count(), 4);
        assert_eq!(g1.edge_count(), 3);
        assert_eq!(g1.l2g(0), 0);
        assert_eq!(neighbors(g1, 1), vec![0, 2]);
        assert_eq!(neighbors(g1, 2), vec![3]);
        assert_eq!(g1.master_range(), 1..4);
        assert_eq!(g1.num_mirrors(), 1);
    }

    #[test]
    fn low_threshold_moves_edges_to_target_owner() {
        let source = sample();
        let graphs = build_all(&source, |c| c.threshold(1));

        let (g0, _) = &graphs[0];
        assert_eq!(g0.graph().edge_count(), 3);
        assert_eq!(neighbors(g0, 0), vec![1]);
        assert_eq!(neighbors(g0, 1), vec![2]);
        assert_eq!(neighbors(g0, 3), vec![0]);

        let (g1, _) = &graphs[1];
        assert_eq!(g1.graph().edge_count(), 4);
        let mut n0 = neighbors(g1, 0);
        n0.sort_unstable();
        assert_eq!(n0, vec![1, 2]);
        assert_eq!(neighbors(g1, 1), vec![2]);
        assert_eq!(neighbors(g1, 2), vec![3]);
    }

    #[test]
    fn high_threshold_owns_every_node_once() {
        let source = sample();
        let graphs = build_all(&source, |c| c);

        let union = graphs
            .iter()
            .flat_map(|(g, _)| local_gids(g))
            .collect::<BTreeSet<_>>();
        assert_eq!(union, (0..6).collect::<BTreeSet<_>>());

        for gid in 0..6 {
            let owners = graphs.iter().filter(|(g, _)| g.is_owned(gid)).count();
            assert_eq!(owners, 1, "node {gid} has {owners} owners");
        }

        let mut masters = graphs
            .iter()
            .flat_map(|(g, _)| owned_gids(g))
            .collect::<Vec<_>>();
        masters.sort_unstable();
        assert_eq!(masters, (0..6).collect::<Vec<_>>());
    }

    #[test]
    fn low_threshold_classifies_masters_and_mirrors() {
        let source = sample();
        let graphs = build_all(&source, |c| c.threshold(1));

        let (g0, _) = &graphs[0];
        assert_eq!(g0.master_range(), 0..3);
        let mirrors: &[Vec<u64>] = &[vec![], vec![3]];
        assert_eq!(g0.mirror_nodes(), mirrors);

        let (g1, _) = &graphs[1];
        assert_eq!(g1.master_range(), 1..4);
        let mirrors: &[Vec<u64>] = &[vec![0], vec![]];
        assert_eq!(g1.mirror_nodes(), mirrors);
    }

    #[test]
    fn low_threshold_conserves_edges() {
        let source = sample();
        let graphs = build_all(&source, |c| c.threshold(1));

        let mut all = graphs
            .iter()
            .flat_map(|(g, _)| global_edges(g))
            .collect::<Vec<_>>();
        all.sort_unstable();
        let mut expected = (0..source.node_count())
            .flat_map(|src| source.edges(src).map(move |e| (src, e)))
            .map(|(src, e)| (src, source.edge_dst(e)))
            .collect::<Vec<_>>();
        expected.sort_unstable();
        assert_eq!(all, expected);

        let cut = CutKind::HybridVertexCut { threshold: 1 };
        let assignments = graphs
            .iter()
            .map(|(g, _)| assign_edges(&source, &EdgeRouter::new(g.ownership(), g.host_id(), cut)))
            .collect::<Result<Vec<_>, _>>()
            .unwrap();

        for (graph, _) in &graphs {
            let host = graph.host_id();
            let owned_out_degree = graph
                .ownership()
                .range(host)
                .map(|gid| source.out_degree(gid))
                .sum::<u64>();
            assert_eq!(assignments[host as usize].total_assigned(), owned_out_degree);

            let routed_here = assignments
                .iter()
                .map(|a| a.assigned[host as usize])
                .sum::<u64>();
            assert_eq!(graph.edge_count() as u64, routed_here);
        }
    }

    #[test]
    fn low_threshold_mirrors_every_remote_endpoint() {
        let source = sample();
        let graphs = build_all(&source, |c| c.threshold(1));

        for (graph, _) in &graphs {
            for (src, dst) in global_edges(graph) {
                // a split source places the edge with the owner of its target
                if source.out_degree(src) > 1 {
                    assert!(graph.is_owned(dst), "edge ({src}, {dst}) is not with the target owner");
                }
                for gid in [src, dst].into_iter().filter(|&gid| !graph.is_owned(gid)) {
                    assert!(graph.is_local(gid));
                    let owner = graph.host_of(gid) as usize;
                    assert!(graph.mirror_nodes()[owner].contains(&gid), "{gid} is not a mirror");
                }
            }
        }
    }

    #[test]
    fn queries() {
        let source = sample();
        let graphs = build_all(&source, |c| c);
        let (g1, _) = &graphs[1];

        assert_eq!(g1.host_id(), 1);
        assert_eq!(g1.num_hosts(), 2);
        assert_eq!(g1.total_nodes(), 6);
        assert_eq!(g1.total_edges(), 7);
        assert!(g1.is_owned(4));
        assert!(!g1.is_owned(0));
        assert!(g1.is_local(0));
        assert!(!g1.is_local(1));
        assert_eq!(g1.g2l(5), Some(3));
        assert_eq!(g1.g2l(2), None);
        assert_eq!(g1.host_of(2), 0);
        assert_eq!(g1.owner_of_local(0), 0);
        assert_eq!(g1.num_owned(), 3);

        let mut reduce = Vec::new();
        g1.reset_range(SyncType::Reduce, |r| reduce.push(r));
        assert_eq!(reduce, vec![0..1]);

        let covered = g1
            .thread_ranges()
            .iter()
            .map(|r| (r.end - r.start) as usize)
            .sum::<usize>();
        assert_eq!(covered, g1.node_count());
    }

    #[test]
    fn transpose_reverses_local_edges() {
        let source = sample();
        let graphs = build_all(&source, |c| c.transpose(true));
        let (g0, _) = &graphs[0];

        assert!(g0.is_transposed());
        assert_eq!(g0.edge_count(), 4);
        assert_eq!(neighbors(g0, 0), Vec::<u32>::new());
        assert_eq!(neighbors(g0, 2), vec![1]);
        assert_eq!(neighbors(g0, 3), vec![0]);
        assert_eq!(neighbors(g0, 4), vec![0]);
    }

    #[test]
    fn writes_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let source = sample();
        let folder = dir.path().to_path_buf();
        let graphs = build_all(&source, |c| c.partition_folder(&folder).basename("sample"));

        for (graph, _) in &graphs {
            let path = meta_file_path(dir.path(), "sample", graph.host_id(), 2);
            let records = read_meta_file(path).unwrap();
            assert_eq!(records, graph.meta_records());
        }

        let records = graphs[1].0.meta_records();
        assert_eq!(records[0], NodeInfo::new(0, 0, 0));
        assert_eq!(records[1], NodeInfo::new(3, 1, 1));
    }

    #[test]
    fn rejects_mismatching_channel() {
        let source = sample();
        let channels = LocalNetwork::new(2);
        let config = PartitionConfig::new(1, 2);

        let result =
            DistGraph::<u32>::build(&source, &channels[0], &mut Phase::default(), &config);

        assert!(matches!(
            result,
            Err(Error::InvalidHost {
                host: 0,
                num_hosts: 2
            })
        ));
    }
}

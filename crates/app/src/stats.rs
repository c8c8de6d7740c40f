use graph_partition::prelude::*;
use log::info;

/// What a single host ended up with.
#[derive(Debug)]
pub(crate) struct HostStats {
    host: HostId,
    total_nodes: u64,
    total_edges: u64,
    nodes: usize,
    owned: usize,
    mirrors: usize,
    edges: usize,
    thread_ranges: usize,
}

impl HostStats {
    pub(crate) fn of<NI: Idx, EV>(graph: &DistGraph<NI, EV>) -> Self {
        Self {
            host: graph.host_id(),
            total_nodes: graph.total_nodes(),
            total_edges: graph.total_edges(),
            nodes: graph.node_count(),
            owned: graph.num_owned(),
            mirrors: graph.num_mirrors(),
            edges: graph.edge_count(),
            thread_ranges: graph.thread_ranges().len(),
        }
    }
}

pub(crate) fn report(stats: &[HostStats]) {
    for s in stats {
        info!(
            "Host {}: {} local nodes ({} masters, {} mirrors), {} edges, {} thread ranges",
            s.host, s.nodes, s.owned, s.mirrors, s.edges, s.thread_ranges
        );
    }

    let Some(first) = stats.first() else {
        return;
    };

    let local_nodes = stats.iter().map(|s| s.nodes).sum::<usize>();
    let local_edges = stats.iter().map(|s| s.edges).sum::<usize>();
    let max_edges = stats.iter().map(|s| s.edges).max().unwrap_or(0);

    let replication = if first.total_nodes == 0 {
        0.0
    } else {
        local_nodes as f64 / first.total_nodes as f64
    };
    let imbalance = if local_edges == 0 {
        1.0
    } else {
        max_edges as f64 * stats.len() as f64 / local_edges as f64
    };

    info!(
        "{} nodes, {} edges ({} constructed), replication factor {:.3}, edge imbalance {:.3}",
        first.total_nodes, first.total_edges, local_edges, replication, imbalance
    );
}

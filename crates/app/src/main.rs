mod stats;

use std::path::PathBuf;
use std::time::Instant;

use clap::{Parser, ValueEnum};
use graph_partition::prelude::*;
use log::info;

use crate::stats::HostStats;

type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    info!(
        "Partitioning graph ({} bit) from {:?} across {} hosts",
        if args.use_32_bit { "32" } else { "64" },
        args.path,
        args.hosts
    );

    match (args.use_32_bit, args.weighted) {
        (true, false) => run_format::<u32, ()>(&args),
        (true, true) => run_format::<u32, u32>(&args),
        (false, false) => run_format::<usize, ()>(&args),
        (false, true) => run_format::<usize, u32>(&args),
    }
}

fn run_format<NI, EV>(args: &Args) -> Result<()>
where
    NI: Idx,
    EV: EdgeValue + ParseValue,
{
    match args.format {
        FileFormat::Gr => run::<NI, EV, GrInput<EV>>(args),
        FileFormat::EdgeList => run::<NI, EV, EdgeListInput<EV>>(args),
    }
}

// Runs one thread per host, every host opens the input on its own.
fn run<NI, EV, F>(args: &Args) -> Result<()>
where
    NI: Idx,
    EV: EdgeValue,
    F: InputFormat + Default,
    F::Source: GraphSource<EV = EV>,
{
    let template = args.config();

    for run in 1..=args.runs {
        let start = Instant::now();
        let channels = LocalNetwork::with_batch_size(args.hosts, template.get_batch_size());

        let stats = std::thread::scope(|s| {
            let handles = channels
                .iter()
                .map(|channel| {
                    let config = template.clone().host(channel.host_id());
                    s.spawn(move || {
                        let mut phase = Phase::default();
                        let graph = DistGraph::<NI, EV>::from_path(
                            F::default(),
                            &args.path,
                            channel,
                            &mut phase,
                            &config,
                        )?;
                        Ok::<_, Error>(HostStats::of(&graph))
                    })
                })
                .collect::<Vec<_>>();

            handles
                .into_iter()
                .map(|h| match h.join() {
                    Ok(stats) => Ok(stats?),
                    Err(_) => Err("host thread panicked".into()),
                })
                .collect::<Result<Vec<_>>>()
        })?;

        info!("Run {} partitioned the graph in {:?}", run, start.elapsed());
        stats::report(&stats);
    }

    Ok(())
}

#[derive(Debug, Parser)]
#[command(version, about = "Partitions a graph across an in-process cluster of hosts")]
struct Args {
    /// Graph file to partition
    path: PathBuf,

    #[arg(short, long, value_enum, default_value_t = FileFormat::Gr)]
    format: FileFormat,

    /// Number of hosts
    #[arg(short = 'n', long, default_value_t = 2, value_parser = clap::value_parser!(u32).range(1..))]
    hosts: u32,

    /// Out-degree above which the edges of a node are moved to the owners
    /// of their targets
    #[arg(short, long, default_value_t = CutKind::DEFAULT_THRESHOLD)]
    threshold: u64,

    /// Keep every edge with the owner of its source
    #[arg(long)]
    edge_cut: bool,

    /// Relative share of nodes per host, e.g. `1,2,1`
    #[arg(long, value_delimiter = ',')]
    scale_factors: Vec<u32>,

    /// Split nodes with and without out-edges separately
    #[arg(long)]
    bipartite: bool,

    /// Reverse the local edges after construction
    #[arg(long)]
    transpose: bool,

    /// Read edge values as u32
    #[arg(long)]
    weighted: bool,

    /// Write partition metadata into this folder
    #[arg(long)]
    partition_folder: Option<PathBuf>,

    #[arg(short, long, value_enum, default_value_t = Mode::Concurrent)]
    mode: Mode,

    /// Messages buffered per peer before they are delivered
    #[arg(long, default_value_t = LocalNetwork::DEFAULT_BATCH_SIZE)]
    batch_size: usize,

    #[arg(long)]
    use_32_bit: bool,

    #[arg(short, long, default_value_t = 1)]
    runs: usize,
}

impl Args {
    fn config(&self) -> PartitionConfig {
        let cut = if self.edge_cut {
            CutKind::EdgeCut
        } else {
            CutKind::HybridVertexCut {
                threshold: self.threshold,
            }
        };

        let config = PartitionConfig::new(0, self.hosts)
            .cut(cut)
            .scale_factors(self.scale_factors.clone())
            .bipartite(self.bipartite)
            .transpose(self.transpose)
            .exchange_mode(self.mode.into())
            .batch_size(self.batch_size);

        match &self.partition_folder {
            Some(folder) => config.partition_folder(folder),
            None => config,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum FileFormat {
    Gr,
    EdgeList,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum Mode {
    Concurrent,
    Cooperative,
}

impl From<Mode> for ExchangeMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Concurrent => ExchangeMode::Concurrent,
            Mode::Cooperative => ExchangeMode::Cooperative,
        }
    }
}

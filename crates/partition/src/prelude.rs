pub use crate::comm::Channel;
pub use crate::comm::LocalChannel;
pub use crate::comm::LocalNetwork;
pub use crate::comm::Phase;

pub use crate::cut::CutKind;

pub use crate::dist_graph::DistGraph;
pub use crate::dist_graph::ExchangeMode;
pub use crate::dist_graph::PartitionConfig;

pub use crate::graph::LocalGraph;
pub use crate::graph::Target;

pub use crate::index::Idx;

pub use crate::input::*;

pub use crate::meta::read_meta_file;
pub use crate::meta::NodeInfo;

pub use crate::mirror::SyncType;

pub use crate::ownership::Ownership;

pub use crate::Error;
pub use crate::HostId;

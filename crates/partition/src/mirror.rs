//! Classification of local nodes into masters and mirrors.

use std::ops::Range;

use crate::{Error, HostId};

/// The kind of synchronization a caller is about to run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncType {
    /// Mirrors contribute their values to the masters.
    Reduce,
    /// Masters send their values to the mirrors.
    Broadcast,
}

/// Masters and mirrors of a single host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MasterMirror {
    node_count: usize,
    masters: Range<usize>,
    mirrors: Vec<Vec<u64>>,
}

impl MasterMirror {
    /// Classifies local nodes by their owners.
    ///
    /// `owners[lid]` is the owner of local node `lid` and `local_to_global`
    /// its global id. The local ids owned by `host` must be contiguous.
    pub fn classify(
        host: HostId,
        num_hosts: HostId,
        owners: &[HostId],
        local_to_global: &[u64],
    ) -> Result<Self, Error> {
        debug_assert_eq!(owners.len(), local_to_global.len());

        let first = owners.iter().position(|&o| o == host);
        let masters = match first {
            Some(first) => {
                let len = owners[first..]
                    .iter()
                    .take_while(|&&o| o == host)
                    .count();
                first..first + len
            }
            None => 0..0,
        };

        let mut mirrors = vec![Vec::new(); num_hosts as usize];
        for (lid, (&owner, &gid)) in owners.iter().zip(local_to_global).enumerate() {
            if owner == host {
                if !masters.contains(&lid) {
                    return Err(Error::MasterRange { host });
                }
            } else {
                mirrors[owner as usize].push(gid);
            }
        }

        Ok(Self {
            node_count: owners.len(),
            masters,
            mirrors,
        })
    }

    /// The contiguous range of local ids owned by this host.
    pub fn master_range(&self) -> Range<usize> {
        self.masters.clone()
    }

    pub fn num_masters(&self) -> usize {
        self.masters.len()
    }

    /// Global ids of the mirrors on this host, grouped by their owner.
    pub fn mirror_nodes(&self) -> &[Vec<u64>] {
        &self.mirrors
    }

    pub fn num_mirrors(&self) -> usize {
        self.node_count - self.masters.len()
    }

    /// Calls `f` with the ranges of local ids a synchronization of `kind`
    /// has to reset.
    ///
    /// A broadcast overwrites the values of masters, so `f` is called with
    /// the master range. A reduce merges into the masters, so `f` is called
    /// with the non-empty ranges before and after it.
    pub fn reset_range<F>(&self, kind: SyncType, mut f: F)
    where
        F: FnMut(Range<usize>),
    {
        match kind {
            SyncType::Broadcast => {
                if !self.masters.is_empty() {
                    f(self.master_range());
                }
            }
            SyncType::Reduce => {
                if self.masters.is_empty() {
                    if self.node_count > 0 {
                        f(0..self.node_count);
                    }
                    return;
                }
                if self.masters.start > 0 {
                    f(0..self.masters.start);
                }
                if self.masters.end < self.node_count {
                    f(self.masters.end..self.node_count);
                }
            }
        }
    }
}

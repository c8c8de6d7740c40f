use fxhash::FxHashMap;

use crate::index::Idx;
use crate::HostId;

/// Bidirectional mapping between global node ids and the local ids of a
/// single host.
///
/// Local ids are handed out sequentially in registration order, starting at
/// zero. Once assigned, the pair of ids never changes.
#[derive(Debug, Default)]
pub struct IdMap<NI: Idx> {
    local_to_global: Vec<u64>,
    owners: Vec<HostId>,
    global_to_local: FxHashMap<u64, NI>,
}

impl<NI: Idx> IdMap<NI> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            local_to_global: Vec::with_capacity(capacity),
            owners: Vec::with_capacity(capacity),
            global_to_local: FxHashMap::with_capacity_and_hasher(capacity, Default::default()),
        }
    }

    /// Returns the local id of `gid`, assigning the next free one if `gid`
    /// has not been registered before.
    pub fn register(&mut self, gid: u64, owner: HostId) -> NI {
        let next = self.local_to_global.len();
        let lid = *self.global_to_local.entry(gid).or_insert_with(|| NI::new(next));
        if lid.index() == next {
            self.local_to_global.push(gid);
            self.owners.push(owner);
        }
        lid
    }

    pub fn len(&self) -> usize {
        self.local_to_global.len()
    }

    pub fn is_empty(&self) -> bool {
        self.local_to_global.is_empty()
    }

    #[inline]
    pub fn to_global(&self, lid: NI) -> u64 {
        self.local_to_global[lid.index()]
    }

    #[inline]
    pub fn to_local(&self, gid: u64) -> Option<NI> {
        self.global_to_local.get(&gid).copied()
    }

    #[inline]
    pub fn contains(&self, gid: u64) -> bool {
        self.global_to_local.contains_key(&gid)
    }

    #[inline]
    pub fn owner_of_local(&self, lid: NI) -> HostId {
        self.owners[lid.index()]
    }

    /// All global ids in local id order.
    pub fn local_to_global(&self) -> &[u64] {
        &self.local_to_global
    }

    /// All owners in local id order.
    pub fn owners(&self) -> &[HostId] {
        &self.owners
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_is_idempotent() {
        let mut map = IdMap::<u32>::default();

        assert_eq!(map.register(42, 1), 0);
        assert_eq!(map.register(7, 0), 1);
        assert_eq!(map.register(42, 1), 0);
        assert_eq!(map.len(), 2);

        assert_eq!(map.to_global(0), 42);
        assert_eq!(map.to_global(1), 7);
        assert_eq!(map.to_local(7), Some(1));
        assert_eq!(map.to_local(8), None);
        assert_eq!(map.owner_of_local(0), 1);
        assert_eq!(map.local_to_global(), &[42, 7]);
    }

    #[test]
    fn global_ids_round_trip() {
        let mut map = IdMap::<u64>::with_capacity(16);
        let gids = [9_u64, 3, 27, 1, 3, 9, 100];
        for gid in gids {
            let lid = map.register(gid, 0);
            assert_eq!(map.to_global(lid), gid);
            assert_eq!(map.to_local(gid), Some(lid));
        }
        assert_eq!(map.len(), 5);
        assert!(map.contains(27));
        assert!(!map.contains(2));
    }
}

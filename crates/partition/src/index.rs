use std::fmt::Debug;
use std::hash::Hash;

/// Type of a host-local node id.
///
/// Global node ids are always `u64`; local ids only need to address the
/// nodes resident on a single host, which is why most deployments use `u32`.
pub trait Idx: Copy + Ord + Debug + Hash + Send + Sync + Sized + 'static {
    fn new(idx: usize) -> Self;

    fn zero() -> Self;

    fn index(self) -> usize;
}

macro_rules! impl_idx {
    ($TYPE:ty) => {
        impl Idx for $TYPE {
            #[inline]
            fn new(idx: usize) -> Self {
                assert!(idx <= <$TYPE>::MAX as usize);
                idx as $TYPE
            }

            #[inline]
            fn zero() -> Self {
                0
            }

            #[inline]
            fn index(self) -> usize {
                self as usize
            }
        }
    };
}

impl_idx!(u32);
impl_idx!(u64);
impl_idx!(usize);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_usize() {
        assert_eq!(u32::new(42).index(), 42);
        assert_eq!(u64::zero(), 0);
    }

    #[test]
    #[should_panic]
    fn rejects_ids_beyond_type_range() {
        let _ = u32::new(u32::MAX as usize + 1);
    }
}

//! Random access to an immutable graph on disk.
//!
//! Every host opens the same graph and reads the out-edges of the nodes it
//! owns. Sources keep track of how many bytes they read and how often a read
//! did not continue where the previous read stopped, which makes the access
//! pattern of the partitioning passes observable.

pub mod edgelist;
pub mod gr;

pub use edgelist::EdgeListInput;
pub use edgelist::EdgeListSource;
pub use gr::write_gr;
pub use gr::GrInput;
pub use gr::GrSource;

use std::fmt::Debug;
use std::ops::Sub;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering::Relaxed};

use byte_slice_cast::{ToByteSlice, ToMutByteSlice};

use crate::Error;

/// Values that can be attached to edges.
///
/// Edge values travel through files and messages as raw bytes, which is why
/// they need to be plain old data.
pub trait EdgeValue:
    Copy + Default + Debug + Send + Sync + ToByteSlice + ToMutByteSlice + 'static
{
}

impl<T> EdgeValue for T where
    T: Copy + Default + Debug + Send + Sync + ToByteSlice + ToMutByteSlice + 'static
{
}

/// Position of a single edge inside a [`GraphSource`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EdgeCursor(u64);

impl EdgeCursor {
    pub fn new(offset: u64) -> Self {
        Self(offset)
    }

    #[inline]
    pub fn offset(self) -> u64 {
        self.0
    }
}

impl Sub for EdgeCursor {
    type Output = u64;

    fn sub(self, rhs: Self) -> Self::Output {
        self.0 - rhs.0
    }
}

/// Forward iterator over the edges of a single node.
#[derive(Clone, Debug)]
pub struct EdgeCursors {
    next: u64,
    end: u64,
}

impl Iterator for EdgeCursors {
    type Item = EdgeCursor;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next == self.end {
            return None;
        }
        let cursor = EdgeCursor(self.next);
        self.next += 1;
        Some(cursor)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let len = (self.end - self.next) as usize;
        (len, Some(len))
    }
}

impl ExactSizeIterator for EdgeCursors {}

/// Read access to a graph stored as out-edge lists grouped by source.
///
/// Node ids are dense in `0..node_count()`. The edges of node `n` are
/// addressed by the cursors in `edge_begin(n)..edge_end(n)`, and
/// `edge_end(n) == edge_begin(n + 1)` holds for all nodes.
pub trait GraphSource: Sync {
    type EV: EdgeValue;

    fn node_count(&self) -> u64;

    fn edge_count(&self) -> u64;

    fn edge_begin(&self, node: u64) -> EdgeCursor;

    fn edge_end(&self, node: u64) -> EdgeCursor;

    fn edge_dst(&self, cursor: EdgeCursor) -> u64;

    fn edge_value(&self, cursor: EdgeCursor) -> Self::EV;

    fn num_bytes_read(&self) -> u64;

    fn num_seeks(&self) -> u64;

    fn reset_seek_counters(&self);

    fn out_degree(&self, node: u64) -> u64 {
        self.edge_end(node) - self.edge_begin(node)
    }

    fn edges(&self, node: u64) -> EdgeCursors {
        EdgeCursors {
            next: self.edge_begin(node).offset(),
            end: self.edge_end(node).offset(),
        }
    }
}

/// Opens a [`GraphSource`] from a path.
pub trait InputFormat {
    type Source: GraphSource;

    fn open(&self, path: &Path) -> Result<Self::Source, Error>;
}

/// Counts bytes read and non-sequential reads.
#[derive(Debug)]
pub struct SeekCounter {
    bytes_read: AtomicU64,
    seeks: AtomicU64,
    position: AtomicU64,
}

impl Default for SeekCounter {
    fn default() -> Self {
        Self {
            bytes_read: AtomicU64::new(0),
            seeks: AtomicU64::new(0),
            position: AtomicU64::new(u64::MAX),
        }
    }
}

impl SeekCounter {
    pub fn record(&self, offset: u64, len: u64) {
        if self.position.swap(offset + len, Relaxed) != offset {
            self.seeks.fetch_add(1, Relaxed);
        }
        self.bytes_read.fetch_add(len, Relaxed);
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Relaxed)
    }

    pub fn seeks(&self) -> u64 {
        self.seeks.load(Relaxed)
    }

    pub fn reset(&self) {
        self.bytes_read.store(0, Relaxed);
        self.seeks.store(0, Relaxed);
        self.position.store(u64::MAX, Relaxed);
    }
}

/// Byte layout of a version 1 `.gr` file.
///
/// ```text
/// u64 version, u64 edge value size, u64 node count, u64 edge count
/// u64 edge_end[node_count]
/// u32 dst[edge_count]        (+ u32 padding if edge_count is odd and
///                              the edges carry values)
/// EV  value[edge_count]
/// ```
#[derive(Clone, Copy, Debug)]
pub(crate) struct GrLayout {
    pub(crate) node_count: u64,
    pub(crate) edge_count: u64,
    pub(crate) value_size: u64,
}

pub(crate) const GR_VERSION: u64 = 1;
pub(crate) const GR_HEADER_LEN: u64 = 4 * 8;

impl GrLayout {
    #[inline]
    pub(crate) fn index_offset(&self, node: u64) -> u64 {
        GR_HEADER_LEN + node * 8
    }

    #[inline]
    pub(crate) fn dst_offset(&self, edge: u64) -> u64 {
        self.index_offset(self.node_count) + edge * 4
    }

    #[inline]
    pub(crate) fn value_offset(&self, edge: u64) -> u64 {
        let padded_edges = self.edge_count + (self.edge_count & 1);
        self.dst_offset(padded_edges) + edge * self.value_size
    }

    pub(crate) fn len(&self) -> u64 {
        if self.value_size == 0 {
            self.dst_offset(self.edge_count)
        } else {
            self.value_offset(self.edge_count)
        }
    }
}

/// Groups edges by their source node, keeping the input order per source.
///
/// Returns the exclusive end offset of each node's edges together with the
/// targets and values in grouped order.
pub(crate) fn group_by_source<EV: Copy>(
    node_count: u64,
    edges: &[(u64, u64, EV)],
) -> (Vec<u64>, Vec<u64>, Vec<EV>) {
    let mut degrees = vec![0_u64; node_count as usize];
    for &(s, _, _) in edges {
        degrees[s as usize] += 1;
    }

    let ends = degrees
        .iter()
        .scan(0_u64, |total, degree| {
            *total += degree;
            Some(*total)
        })
        .collect::<Vec<_>>();

    // reuse the degrees as write cursors, starting at each node's first slot
    let mut cursors = degrees;
    for (node, cursor) in cursors.iter_mut().enumerate() {
        *cursor = ends[node] - *cursor;
    }

    let mut targets = vec![0_u64; edges.len()];
    let mut values = Vec::with_capacity(edges.len());
    values.extend(edges.iter().map(|&(_, _, v)| v));
    for &(s, t, v) in edges {
        let slot = cursors[s as usize] as usize;
        targets[slot] = t;
        values[slot] = v;
        cursors[s as usize] += 1;
    }

    (ends, targets, values)
}

/// Used by input formats to read edge values from bytes.
pub trait ParseValue: Default + Sized {
    /// Parses a value from a slice.
    ///
    /// # Example
    ///
    /// ```
    /// use graph_partition::input::ParseValue;
    ///
    /// let bytes = "13.37".as_bytes();
    ///
    /// let (number, len) = f32::parse(bytes);
    ///
    /// assert_eq!(number, 13.37);
    /// assert_eq!(len, 5);
    /// ```
    ///
    /// # Return
    ///
    /// Returns a tuple containing two entries. The first is the parsed value,
    /// the second is the index of the byte right after the parsed value.
    fn parse(bytes: &[u8]) -> (Self, usize);
}

impl ParseValue for () {
    fn parse(_bytes: &[u8]) -> (Self, usize) {
        ((), 0)
    }
}

macro_rules! impl_parse_value {
    ($atoi:path, $($ty:ty),+ $(,)?) => {
        $(
            impl $crate::input::ParseValue for $ty {
                fn parse(bytes: &[u8]) -> (Self, usize) {
                    if bytes.is_empty() {
                        (<$ty as ::std::default::Default>::default(), 0)
                    } else {
                        $atoi(bytes)
                    }
                }
            }
        )+
    };
}

impl_parse_value!(::atoi::FromRadix10::from_radix_10, u8, u16, u32, u64, usize);

impl_parse_value!(
    ::atoi::FromRadix10Signed::from_radix_10_signed,
    i8,
    i16,
    i32,
    i64,
    isize,
);

impl_parse_value!(parse_float, f32, f64);

fn parse_float<T: fast_float2::FastFloat + Default>(bytes: &[u8]) -> (T, usize) {
    fast_float2::parse_partial(bytes).unwrap_or_default()
}

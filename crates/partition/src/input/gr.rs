use std::{
    fs::File,
    io::Write,
    marker::PhantomData,
    mem::size_of,
    path::Path,
    time::Instant,
};

use byte_slice_cast::{AsByteSlice, AsMutByteSlice};
use log::info;
use memmap2::Mmap;

use crate::Error;

use super::{
    group_by_source, EdgeCursor, EdgeValue, GraphSource, GrLayout, InputFormat, SeekCounter,
    GR_HEADER_LEN, GR_VERSION,
};

/// Opens binary `.gr` files as [`GrSource`].
pub struct GrInput<EV> {
    _ev: PhantomData<EV>,
}

impl<EV> Default for GrInput<EV> {
    fn default() -> Self {
        Self { _ev: PhantomData }
    }
}

impl<EV: EdgeValue> InputFormat for GrInput<EV> {
    type Source = GrSource<EV>;

    fn open(&self, path: &Path) -> Result<Self::Source, Error> {
        GrSource::open(path)
    }
}

/// A memory-mapped graph in the binary `.gr` format.
///
/// The header and the edge ends are validated on open, all other reads go
/// straight to the mapped file and are recorded by the seek counter.
pub struct GrSource<EV> {
    map: Mmap,
    layout: GrLayout,
    counter: SeekCounter,
    _ev: PhantomData<EV>,
}

impl<EV: EdgeValue> GrSource<EV> {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let start = Instant::now();
        let file = File::open(path.as_ref())?;
        let map = unsafe { memmap2::MmapOptions::new().map(&file)? };

        if map.len() < GR_HEADER_LEN as usize {
            return Err(Error::TruncatedGraph {
                expected: GR_HEADER_LEN as usize,
                actual: map.len(),
            });
        }

        let version = read_u64(&map, 0);
        if version != GR_VERSION {
            return Err(Error::UnsupportedVersion { version });
        }

        // Graphs without edge values may be read from files that carry some.
        let value_size = read_u64(&map, 8);
        if size_of::<EV>() != 0 && value_size as usize != size_of::<EV>() {
            return Err(Error::InvalidEdgeValueSize {
                expected: size_of::<EV>(),
                actual: value_size as usize,
            });
        }

        let layout = GrLayout {
            node_count: read_u64(&map, 16),
            edge_count: read_u64(&map, 24),
            value_size,
        };

        let expected = usize::try_from(layout.len())?;
        if map.len() < expected {
            return Err(Error::TruncatedGraph {
                expected,
                actual: map.len(),
            });
        }

        // Edge ends must be sorted and the last one must close the edge array.
        let mut previous = 0;
        for node in 0..layout.node_count {
            let end = read_u64(&map, layout.index_offset(node) as usize);
            let is_last = node + 1 == layout.node_count;
            if end < previous || end > layout.edge_count || (is_last && end != layout.edge_count) {
                return Err(Error::InvalidEdgeEnd { node, end });
            }
            previous = end;
        }

        info!(
            "Opened {:?} (node_count = {}, edge_count = {}) in {:?}",
            path.as_ref(),
            layout.node_count,
            layout.edge_count,
            start.elapsed()
        );

        Ok(Self {
            map,
            layout,
            counter: SeekCounter::default(),
            _ev: PhantomData,
        })
    }
}

impl<EV: EdgeValue> GraphSource for GrSource<EV> {
    type EV = EV;

    fn node_count(&self) -> u64 {
        self.layout.node_count
    }

    fn edge_count(&self) -> u64 {
        self.layout.edge_count
    }

    fn edge_begin(&self, node: u64) -> EdgeCursor {
        if node == 0 {
            EdgeCursor::new(0)
        } else {
            self.edge_end(node - 1)
        }
    }

    fn edge_end(&self, node: u64) -> EdgeCursor {
        let offset = self.layout.index_offset(node);
        self.counter.record(offset, 8);
        EdgeCursor::new(read_u64(&self.map, offset as usize))
    }

    fn edge_dst(&self, cursor: EdgeCursor) -> u64 {
        let offset = self.layout.dst_offset(cursor.offset());
        self.counter.record(offset, 4);
        let offset = offset as usize;
        let mut bytes = [0_u8; 4];
        bytes.copy_from_slice(&self.map[offset..offset + 4]);
        u32::from_ne_bytes(bytes) as u64
    }

    fn edge_value(&self, cursor: EdgeCursor) -> EV {
        let mut value = [EV::default()];
        let size = size_of::<EV>();
        if size > 0 {
            let offset = self.layout.value_offset(cursor.offset());
            self.counter.record(offset, size as u64);
            let offset = offset as usize;
            value
                .as_mut_byte_slice()
                .copy_from_slice(&self.map[offset..offset + size]);
        }
        value[0]
    }

    fn num_bytes_read(&self) -> u64 {
        self.counter.bytes_read()
    }

    fn num_seeks(&self) -> u64 {
        self.counter.seeks()
    }

    fn reset_seek_counters(&self) {
        self.counter.reset()
    }
}

#[inline]
fn read_u64(map: &[u8], offset: usize) -> u64 {
    let mut bytes = [0_u8; 8];
    bytes.copy_from_slice(&map[offset..offset + 8]);
    u64::from_ne_bytes(bytes)
}

/// Writes edges as a binary `.gr` graph with `node_count` nodes.
///
/// Edges are grouped by their source, the order of edges with the same
/// source is kept. Target ids must fit into `u32`.
pub fn write_gr<W, EV>(mut output: W, node_count: u64, edges: &[(u64, u64, EV)]) -> Result<(), Error>
where
    W: Write,
    EV: EdgeValue,
{
    let (ends, targets, values) = group_by_source(node_count, edges);

    let targets = targets
        .into_iter()
        .map(u32::try_from)
        .collect::<Result<Vec<_>, _>>()?;

    let edge_count = targets.len() as u64;
    let header = [
        GR_VERSION,
        size_of::<EV>() as u64,
        node_count,
        edge_count,
    ];

    output.write_all(header.as_byte_slice())?;
    output.write_all(ends.as_byte_slice())?;
    output.write_all(targets.as_byte_slice())?;
    if size_of::<EV>() > 0 && edge_count % 2 == 1 {
        output.write_all([0_u32].as_byte_slice())?;
    }
    output.write_all(values.as_byte_slice())?;
    output.flush()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::{BufWriter, Write};

    use super::*;

    fn write_to_temp<EV: EdgeValue>(node_count: u64, edges: &[(u64, u64, EV)]) -> tempfile::NamedTempFile {
        let file = tempfile::NamedTempFile::new().unwrap();
        write_gr(BufWriter::new(file.as_file()), node_count, edges).unwrap();
        file
    }

    #[test]
    fn reads_written_graph_with_values() {
        let edges = vec![(0, 1, 0.5_f32), (2, 0, 1.5), (0, 2, 2.5)];
        let file = write_to_temp(3, &edges);

        let source = GrSource::<f32>::open(file.path()).unwrap();

        assert_eq!(source.node_count(), 3);
        assert_eq!(source.edge_count(), 3);
        assert_eq!(source.out_degree(0), 2);
        assert_eq!(source.out_degree(1), 0);
        assert_eq!(source.out_degree(2), 1);

        let out = source
            .edges(0)
            .map(|e| (source.edge_dst(e), source.edge_value(e)))
            .collect::<Vec<_>>();
        assert_eq!(out, vec![(1, 0.5), (2, 2.5)]);

        let e = source.edge_begin(2);
        assert_eq!(source.edge_dst(e), 0);
        assert_eq!(source.edge_value(e), 1.5);
    }

    #[test]
    fn counts_bytes_and_seeks() {
        let edges = vec![(0, 1, ()), (0, 2, ()), (1, 2, ())];
        let file = write_to_temp(3, &edges);
        let source = GrSource::<()>::open(file.path()).unwrap();

        source.reset_seek_counters();
        let begin = source.edge_begin(0);
        let end = source.edge_end(0);
        assert_eq!(end - begin, 2);
        for e in source.edges(0) {
            source.edge_dst(e);
        }

        // edge_end(0) is read twice, followed by two sequential targets
        assert_eq!(source.num_bytes_read(), 8 + 8 + 4 + 4);
        assert_eq!(source.num_seeks(), 3);
    }

    #[test]
    fn void_graph_ignores_stored_values() {
        let edges = vec![(0, 1, 7_u64), (1, 0, 8)];
        let file = write_to_temp(2, &edges);

        let source = GrSource::<()>::open(file.path()).unwrap();
        assert_eq!(source.edge_count(), 2);

        let weighted = GrSource::<u32>::open(file.path());
        assert!(matches!(
            weighted,
            Err(Error::InvalidEdgeValueSize {
                expected: 4,
                actual: 8
            })
        ));
    }

    #[test]
    fn rejects_unknown_version() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all([2_u64, 0, 0, 0].as_byte_slice()).unwrap();
        file.flush().unwrap();

        let source = GrSource::<()>::open(file.path());
        assert!(matches!(source, Err(Error::UnsupportedVersion { version: 2 })));
    }

    #[test]
    fn rejects_edge_ends_past_the_edge_count() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all([GR_VERSION, 0, 2, 1, 0, 2].as_byte_slice()).unwrap();
        file.write_all([1_u32].as_byte_slice()).unwrap();
        file.flush().unwrap();

        let source = GrSource::<()>::open(file.path());
        assert!(matches!(source, Err(Error::InvalidEdgeEnd { node: 1, end: 2 })));
    }

    #[test]
    fn rejects_decreasing_edge_ends() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all([GR_VERSION, 0, 2, 1, 1, 0].as_byte_slice()).unwrap();
        file.write_all([1_u32].as_byte_slice()).unwrap();
        file.flush().unwrap();

        let source = GrSource::<()>::open(file.path());
        assert!(matches!(source, Err(Error::InvalidEdgeEnd { node: 1, end: 0 })));
    }
}

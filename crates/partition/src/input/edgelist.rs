use std::{convert::TryFrom, fs::File, marker::PhantomData, mem::size_of, path::Path, time::Instant};

use atoi::FromRadix10Checked;
use log::info;

use crate::Error;

use super::{
    group_by_source, EdgeCursor, EdgeValue, GraphSource, GrLayout, InputFormat, ParseValue,
    SeekCounter,
};

/// Reads a graph from a file that contains an edge per line.
///
/// An edge is represented by a source node id and a target node id followed
/// by an optional value. The fields are separated by spaces or tabs. Empty
/// lines and lines starting with `#` or `%` are skipped.
///
/// The node count of the resulting graph is the highest node id within the
/// file plus one.
///
/// # Example
///
/// ```ignore
/// > cat my_graph.edgelist
/// # source target
/// 0 1
/// 0 2
/// 1 3
/// 2 0
/// ```
pub struct EdgeListInput<EV = ()> {
    _ev: PhantomData<EV>,
}

impl<EV> Default for EdgeListInput<EV> {
    fn default() -> Self {
        Self { _ev: PhantomData }
    }
}

impl<EV: EdgeValue + ParseValue> InputFormat for EdgeListInput<EV> {
    type Source = EdgeListSource<EV>;

    fn open(&self, path: &Path) -> Result<Self::Source, Error> {
        EdgeListSource::open(path)
    }
}

/// An in-memory graph source built from an edge list.
///
/// Reads are accounted as if the graph was stored in a `.gr` file, so the
/// seek statistics are comparable between both sources.
#[derive(Debug)]
pub struct EdgeListSource<EV = ()> {
    layout: GrLayout,
    ends: Box<[u64]>,
    targets: Box<[u64]>,
    values: Box<[EV]>,
    counter: SeekCounter,
}

impl<EV: EdgeValue> EdgeListSource<EV> {
    /// Creates a source from `(source, target, value)` triples.
    ///
    /// The node count is raised to the highest node id plus one if an edge
    /// references a node beyond `node_count`.
    pub fn from_edges(node_count: u64, edges: Vec<(u64, u64, EV)>) -> Self {
        let node_count = edges
            .iter()
            .map(|&(s, t, _)| u64::max(s, t) + 1)
            .fold(node_count, u64::max);

        let (ends, targets, values) = group_by_source(node_count, &edges);

        Self {
            layout: GrLayout {
                node_count,
                edge_count: targets.len() as u64,
                value_size: size_of::<EV>() as u64,
            },
            ends: ends.into_boxed_slice(),
            targets: targets.into_boxed_slice(),
            values: values.into_boxed_slice(),
            counter: SeekCounter::default(),
        }
    }
}

impl<EV: EdgeValue + ParseValue> EdgeListSource<EV> {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let file = File::open(path.as_ref())?;
        let mmap = unsafe { memmap2::MmapOptions::new().populate().map(&file)? };
        EdgeListSource::try_from(mmap.as_ref())
    }
}

impl<EV: EdgeValue + ParseValue> TryFrom<&[u8]> for EdgeListSource<EV> {
    type Error = Error;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let start = Instant::now();

        let mut edges = Vec::new();
        for (line, content) in bytes.split(|b| *b == b'\n').enumerate() {
            let content = content.strip_suffix(b"\r").unwrap_or(content);
            let content = skip_blanks(content);
            if content.is_empty() || content[0] == b'#' || content[0] == b'%' {
                continue;
            }

            // lines are reported 1-based
            let line = line + 1;

            let (source, content) = parse_node(content).ok_or(Error::InvalidEdgeList { line })?;
            if content.first().map_or(true, |b| !is_blank(*b)) {
                return Err(Error::InvalidEdgeList { line });
            }
            let (target, content) =
                parse_node(skip_blanks(content)).ok_or(Error::InvalidEdgeList { line })?;

            let value = match skip_blanks(content) {
                [] => EV::default(),
                value => EV::parse(value).0,
            };

            edges.push((source, target, value));
        }

        let elapsed = start.elapsed().as_millis() as f64 / 1000_f64;

        info!(
            "Read {} edges in {:.2}s ({:.2} MB/s)",
            edges.len(),
            elapsed,
            ((bytes.len() as f64) / elapsed) / (1024.0 * 1024.0)
        );

        Ok(Self::from_edges(0, edges))
    }
}

fn is_blank(b: u8) -> bool {
    b == b' ' || b == b'\t'
}

fn skip_blanks(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| !is_blank(*b)).unwrap_or(bytes.len());
    &bytes[start..]
}

fn parse_node(bytes: &[u8]) -> Option<(u64, &[u8])> {
    match u64::from_radix_10_checked(bytes) {
        (Some(id), used) if used > 0 => Some((id, &bytes[used..])),
        _ => None,
    }
}

impl<EV: EdgeValue> GraphSource for EdgeListSource<EV> {
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
        self.counter.record(self.layout.index_offset(node), 8);
        EdgeCursor::new(self.ends[node as usize])
    }

    fn edge_dst(&self, cursor: EdgeCursor) -> u64 {
        self.counter.record(self.layout.dst_offset(cursor.offset()), 4);
        self.targets[cursor.offset() as usize]
    }

    fn edge_value(&self, cursor: EdgeCursor) -> EV {
        if self.layout.value_size > 0 {
            self.counter.record(
                self.layout.value_offset(cursor.offset()),
                self.layout.value_size,
            );
        }
        self.values[cursor.offset() as usize]
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

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn out_edges<EV: EdgeValue>(source: &EdgeListSource<EV>, node: u64) -> Vec<(u64, EV)> {
        source
            .edges(node)
            .map(|e| (source.edge_dst(e), source.edge_value(e)))
            .collect()
    }

    #[test]
    fn from_edges_grows_node_count() {
        let source = EdgeListSource::from_edges(2, vec![(0, 4, ()), (3, 1, ())]);

        assert_eq!(source.node_count(), 5);
        assert_eq!(source.edge_count(), 2);
        assert_eq!(source.out_degree(0), 1);
        assert_eq!(source.out_degree(2), 0);
        assert_eq!(source.out_degree(4), 0);
        assert_eq!(out_edges(&source, 3), vec![(1, ())]);
    }

    #[test]
    fn edge_list_from_linux_bytes() {
        let bytes = b"# comment\n0 1\n0 2\n\n1 2\n1 3\n2 4\n3 4\n";
        let source = EdgeListSource::<()>::try_from(&bytes[..]).unwrap();

        assert_eq!(source.node_count(), 5);
        assert_eq!(source.edge_count(), 6);
        assert_eq!(out_edges(&source, 1), vec![(2, ()), (3, ())]);
    }

    #[test]
    fn edge_list_from_windows_bytes() {
        let bytes = b"% matrix market style comment\r\n0\t1\r\n2 3\r\n";
        let source = EdgeListSource::<()>::try_from(&bytes[..]).unwrap();

        assert_eq!(source.node_count(), 4);
        assert_eq!(out_edges(&source, 2), vec![(3, ())]);
    }

    #[test]
    fn edge_list_with_values_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"0 1 0.5\n0 2 0.25\n2 0 1.5\n").unwrap();
        file.flush().unwrap();

        let source = EdgeListInput::<f32>::default().open(file.path()).unwrap();

        assert_eq!(out_edges(&source, 0), vec![(1, 0.5), (2, 0.25)]);
        assert_eq!(out_edges(&source, 2), vec![(0, 1.5)]);
    }

    #[test]
    fn missing_value_defaults() {
        let bytes = b"0 1 7\n1 0\n";
        let source = EdgeListSource::<u64>::try_from(&bytes[..]).unwrap();

        assert_eq!(out_edges(&source, 0), vec![(1, 7)]);
        assert_eq!(out_edges(&source, 1), vec![(0, 0)]);
    }

    #[test]
    fn rejects_malformed_lines() {
        let bytes = b"0 1\n1 x\n";
        let source = EdgeListSource::<()>::try_from(&bytes[..]);
        assert!(matches!(source, Err(Error::InvalidEdgeList { line: 2 })));

        let bytes = b"01\n";
        let source = EdgeListSource::<()>::try_from(&bytes[..]);
        assert!(matches!(source, Err(Error::InvalidEdgeList { line: 1 })));
    }

    #[test]
    fn accounts_reads_like_a_gr_file() {
        let source = EdgeListSource::from_edges(3, vec![(0, 1, 1_u32), (0, 2, 2), (1, 2, 3)]);

        source.reset_seek_counters();
        let _ = out_edges(&source, 0);

        // the end of node 0, then interleaved targets and values
        assert_eq!(source.num_bytes_read(), 8 + 2 * (4 + 4));
        assert_eq!(source.num_seeks(), 1 + 4);
    }
}

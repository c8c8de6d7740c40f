//! Partition metadata files.
//!
//! A metadata file lists the local nodes of one host:
//!
//! ```text
//! u64 count
//! (u64 global id, u64 local id, u64 owner)[count]
//! ```

use std::fs::File;
use std::io::{self, BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use byte_slice_cast::{AsByteSlice, AsMutByteSlice};
use log::info;

use crate::{Error, HostId};

const HEADER_LEN: u64 = 8;
const RECORD_LEN: u64 = 24;

/// A single record of a metadata file.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NodeInfo {
    pub global_id: u64,
    pub local_id: u64,
    pub owner_id: u64,
}

impl NodeInfo {
    pub fn new(global_id: u64, local_id: u64, owner_id: u64) -> Self {
        Self {
            global_id,
            local_id,
            owner_id,
        }
    }
}

/// Returns `<basename>.META.<host>.OF.<num_hosts>`.
pub fn meta_file_name(basename: &str, host: HostId, num_hosts: HostId) -> String {
    format!("{basename}.META.{host}.OF.{num_hosts}")
}

/// Path of the metadata file of `host` inside `folder`.
pub fn meta_file_path<P: AsRef<Path>>(
    folder: P,
    basename: &str,
    host: HostId,
    num_hosts: HostId,
) -> PathBuf {
    folder
        .as_ref()
        .join(meta_file_name(basename, host, num_hosts))
}

pub fn write_meta_file<P: AsRef<Path>>(path: P, records: &[NodeInfo]) -> Result<(), Error> {
    let mut output = BufWriter::new(File::create(path.as_ref())?);

    let flat = records
        .iter()
        .flat_map(|r| [r.global_id, r.local_id, r.owner_id])
        .collect::<Vec<_>>();

    output.write_all([records.len() as u64].as_byte_slice())?;
    output.write_all(flat.as_byte_slice())?;
    output.flush()?;

    info!(
        "Wrote {} records to {:?}",
        records.len(),
        path.as_ref()
    );

    Ok(())
}

/// Reads all records of a metadata file.
///
/// A file that cannot be opened is reported as [`Error::MissingMetadata`].
pub fn read_meta_file<P: AsRef<Path>>(path: P) -> Result<Vec<NodeInfo>, Error> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| Error::MissingMetadata {
        path: path.to_path_buf(),
        source,
    })?;
    let file_len = file.metadata()?.len();
    let mut input = BufReader::new(file);

    let mut count = [0_u64];
    input.read_exact(count.as_mut_byte_slice())?;
    let count = count[0];

    // The header must describe exactly the records that follow it.
    let expected_len = count
        .checked_mul(RECORD_LEN)
        .and_then(|len| len.checked_add(HEADER_LEN));
    if expected_len != Some(file_len) {
        return Err(io::Error::new(
            ErrorKind::InvalidData,
            format!("{count} records do not fit a metadata file of {file_len} bytes"),
        )
        .into());
    }

    let mut flat = vec![0_u64; usize::try_from(count)? * 3];
    input.read_exact(flat.as_mut_byte_slice())?;

    Ok(flat
        .chunks_exact(3)
        .map(|r| NodeInfo::new(r[0], r[1], r[2]))
        .collect())
}

//! On-disk format for saved navigation graphs
//!
//! A file starts with the magic `NGPH` and a format version, both little-endian
//! `u32`, followed by the payload length and a `postcard` payload holding the
//! content hash and the serialized graph.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use navgraph_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

/// Magic number for graph files ('NGPH')
pub const GRAPH_MAGIC: u32 = 0x4850_474E; // 'NGPH' in little-endian

/// Current graph file version
pub const GRAPH_VERSION: u32 = 1;

/// Largest payload accepted when reading
const MAX_PAYLOAD_LEN: u32 = 1 << 30;

#[derive(Debug, Serialize, Deserialize)]
struct PersistedGraph {
    hash: String,
    graph: Vec<u8>,
}

/// Writes a serialized graph and its content hash
pub fn write_graph<W: Write>(writer: &mut W, hash: &str, graph: Vec<u8>) -> Result<()> {
    let payload = postcard::to_allocvec(&PersistedGraph {
        hash: hash.to_string(),
        graph,
    })
    .map_err(|e| Error::Persistence(format!("failed to encode graph: {}", e)))?;

    let len = u32::try_from(payload.len())
        .map_err(|_| Error::Persistence("graph payload too large".to_string()))?;

    writer.write_u32::<LittleEndian>(GRAPH_MAGIC)?;
    writer.write_u32::<LittleEndian>(GRAPH_VERSION)?;
    writer.write_u32::<LittleEndian>(len)?;
    writer.write_all(&payload)?;
    Ok(())
}

/// Reads a graph file, returning the stored hash and the serialized graph
pub fn read_graph<R: Read>(reader: &mut R) -> Result<(String, Vec<u8>)> {
    let magic = reader.read_u32::<LittleEndian>()?;
    if magic != GRAPH_MAGIC {
        return Err(Error::Persistence(format!(
            "bad magic 0x{:08x}, expected 0x{:08x}",
            magic, GRAPH_MAGIC
        )));
    }

    let version = reader.read_u32::<LittleEndian>()?;
    if version != GRAPH_VERSION {
        return Err(Error::Persistence(format!(
            "unsupported graph version {}, expected {}",
            version, GRAPH_VERSION
        )));
    }

    let len = reader.read_u32::<LittleEndian>()?;
    if len > MAX_PAYLOAD_LEN {
        return Err(Error::Persistence(format!("payload length {} too large", len)));
    }

    // Grow with the data actually present rather than the declared length
    let mut payload = Vec::new();
    reader.by_ref().take(u64::from(len)).read_to_end(&mut payload)?;
    if payload.len() != len as usize {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!("graph payload truncated: {} of {} bytes", payload.len(), len),
        )));
    }

    let persisted: PersistedGraph = postcard::from_bytes(&payload)
        .map_err(|e| Error::Persistence(format!("failed to decode graph: {}", e)))?;
    Ok((persisted.hash, persisted.graph))
}

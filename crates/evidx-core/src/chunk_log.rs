//! Append-only JSON-lines log of every persisted chunk.
//!
//! The log is the source of truth for chunk bodies and attributes; both
//! indices only store ids and the text they need for ranking.

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use tracing::warn;

use crate::error::{Error, Result};
use crate::types::Chunk;

#[derive(Debug, Default)]
pub struct ChunkLogContents {
    pub chunks: Vec<Chunk>,
    /// Lines that failed to decode and were skipped.
    pub skipped: usize,
}

/// Read every decodable chunk. A missing log reads as empty; malformed lines
/// are logged and skipped.
pub fn read_chunks(path: &Path) -> Result<ChunkLogContents> {
    let file = match fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(ChunkLogContents::default());
        }
        Err(e) => return Err(Error::io(format!("open {}", path.display()), e)),
    };
    let mut contents = ChunkLogContents::default();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| Error::io(format!("read {}", path.display()), e))?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Chunk>(&line) {
            Ok(chunk) => contents.chunks.push(chunk),
            Err(source) => {
                let err = Error::ChunkDecode { path: path.to_path_buf(), line: idx + 1, source };
                warn!("{err}");
                contents.skipped += 1;
            }
        }
    }
    Ok(contents)
}

pub fn read_chunk_ids(path: &Path) -> Result<HashSet<String>> {
    Ok(read_chunks(path)?.chunks.into_iter().map(|c| c.chunk_id).collect())
}

/// Append `chunks` as JSON lines and fsync the file.
pub fn append_chunks(path: &Path, chunks: &[Chunk]) -> Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| Error::io(format!("open {}", path.display()), e))?;
    let mut writer = BufWriter::new(file);
    for chunk in chunks {
        let line = serde_json::to_string(chunk)
            .map_err(|source| Error::Serialization {
                context: format!("encode chunk {}", chunk.chunk_id),
                source,
            })?;
        writeln!(writer, "{line}").map_err(|e| Error::io(format!("append {}", path.display()), e))?;
    }
    let file = writer
        .into_inner()
        .map_err(|e| Error::io(format!("flush {}", path.display()), e.into_error()))?;
    file.sync_all().map_err(|e| Error::io(format!("sync {}", path.display()), e))
}

//! On-disk layout of `vectors.bin` (all integers little-endian):
//!
//! ```text
//! magic "EVIX" | version u8 | model len u32 + bytes | dim u32 | count u64
//! | count x (id len u32 + bytes) | count*dim f32 | xxhash64 of all preceding bytes
//! ```

use std::hash::Hasher;

use twox_hash::XxHash64;

use evidx_core::error::{Error, Result};

const MAGIC: [u8; 4] = *b"EVIX";
const VERSION: u8 = 1;
// magic + version + model len + dim + count + checksum
const MIN_LEN: usize = 4 + 1 + 4 + 4 + 8 + 8;

pub(crate) struct Decoded {
    pub model: String,
    pub dim: usize,
    pub ids: Vec<String>,
    pub data: Vec<f32>,
}

fn checksum(bytes: &[u8]) -> u64 {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(bytes);
    hasher.finish()
}

fn len_u32(len: usize, what: &str) -> Result<u32> {
    u32::try_from(len)
        .map_err(|_| Error::corrupt("vectors.bin", format!("{what} too large: {len}")))
}

pub(crate) fn encode(model: &str, dim: usize, ids: &[String], data: &[f32]) -> Result<Vec<u8>> {
    let id_bytes: usize = ids.iter().map(|i| i.len() + 4).sum();
    let mut out = Vec::with_capacity(MIN_LEN + model.len() + id_bytes + data.len() * 4);
    out.extend_from_slice(&MAGIC);
    out.push(VERSION);
    out.extend_from_slice(&len_u32(model.len(), "model name")?.to_le_bytes());
    out.extend_from_slice(model.as_bytes());
    out.extend_from_slice(&len_u32(dim, "dimension")?.to_le_bytes());
    out.extend_from_slice(&(ids.len() as u64).to_le_bytes());
    for id in ids {
        out.extend_from_slice(&len_u32(id.len(), "chunk id")?.to_le_bytes());
        out.extend_from_slice(id.as_bytes());
    }
    for v in data {
        out.extend_from_slice(&v.to_le_bytes());
    }
    let sum = checksum(&out);
    out.extend_from_slice(&sum.to_le_bytes());
    Ok(out)
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(n).filter(|&e| e <= self.buf.len()).ok_or_else(|| {
            Error::corrupt("vectors.bin", format!("truncated at byte {}", self.pos))
        })?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut arr = [0u8; N];
        arr.copy_from_slice(self.take(N)?);
        Ok(arr)
    }

    fn u32(&mut self) -> Result<usize> {
        Ok(u32::from_le_bytes(self.array()?) as usize)
    }

    fn string(&mut self) -> Result<String> {
        let len = self.u32()?;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|e| Error::corrupt("vectors.bin", e.to_string()))
    }
}

pub(crate) fn decode(bytes: &[u8]) -> Result<Decoded> {
    if bytes.len() < MIN_LEN {
        let detail = format!("file too short ({} bytes)", bytes.len());
        return Err(Error::corrupt("vectors.bin", detail));
    }
    let body_len = bytes.len() - 8;
    let mut stored = [0u8; 8];
    stored.copy_from_slice(&bytes[body_len..]);
    let stored = u64::from_le_bytes(stored);
    let computed = checksum(&bytes[..body_len]);
    if stored != computed {
        return Err(Error::corrupt(
            "vectors.bin",
            format!("checksum mismatch (stored={stored:#x}, computed={computed:#x})"),
        ));
    }

    let mut cur = Cursor { buf: &bytes[..body_len], pos: 0 };
    if cur.array::<4>()? != MAGIC {
        return Err(Error::corrupt("vectors.bin", "bad magic"));
    }
    let version = cur.array::<1>()?[0];
    if version != VERSION {
        return Err(Error::corrupt("vectors.bin", format!("unsupported version {version}")));
    }
    let model = cur.string()?;
    let dim = cur.u32()?;
    let count = usize::try_from(u64::from_le_bytes(cur.array()?))
        .map_err(|_| Error::corrupt("vectors.bin", "count overflows usize"))?;
    if dim == 0 && count > 0 {
        return Err(Error::corrupt("vectors.bin", format!("{count} vectors of width 0")));
    }
    let mut ids = Vec::with_capacity(count.min(1 << 20));
    for _ in 0..count {
        ids.push(cur.string()?);
    }
    let floats = count
        .checked_mul(dim)
        .ok_or_else(|| Error::corrupt("vectors.bin", "matrix size overflows"))?;
    let byte_len = floats
        .checked_mul(4)
        .ok_or_else(|| Error::corrupt("vectors.bin", "matrix size overflows"))?;
    let raw = cur.take(byte_len)?;
    let data = raw
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    if cur.pos != body_len {
        return Err(Error::corrupt("vectors.bin", "trailing bytes before checksum"));
    }
    Ok(Decoded { model, dim, ids, data })
}

//! Paragraph-greedy chunking with content-addressed chunk ids.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::types::{Chunk, SourceDocument};

const PARAGRAPH_SEPARATOR: &str = "\n\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub max_chars: usize,
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self { max_chars: 1200, overlap_chars: 200 }
    }
}

/// Split `text` into ordered segments of at most `max_chars` characters.
///
/// Paragraphs (blank-line separated) are coalesced greedily; a paragraph that
/// alone exceeds `max_chars` is emitted as a single oversized segment rather
/// than cut mid-word. Every segment after the first is prefixed with the last
/// `overlap_chars` characters of its predecessor and a newline.
pub fn split(text: &str, max_chars: usize, overlap_chars: usize) -> Vec<String> {
    let paragraphs = paragraphs(text);
    let sep_len = PARAGRAPH_SEPARATOR.chars().count();

    let mut segments: Vec<String> = Vec::new();
    let mut buffer = String::new();
    let mut buffer_len = 0usize;
    for paragraph in paragraphs {
        let len = paragraph.chars().count();
        if buffer.is_empty() {
            buffer = paragraph;
            buffer_len = len;
        } else if buffer_len + sep_len + len <= max_chars {
            buffer.push_str(PARAGRAPH_SEPARATOR);
            buffer.push_str(&paragraph);
            buffer_len += sep_len + len;
        } else {
            segments.push(std::mem::replace(&mut buffer, paragraph));
            buffer_len = len;
        }
    }
    if !buffer.is_empty() {
        segments.push(buffer);
    }

    if overlap_chars == 0 || segments.len() < 2 {
        return segments;
    }
    let mut overlapped = Vec::with_capacity(segments.len());
    overlapped.push(segments[0].clone());
    for pair in segments.windows(2) {
        let tail = tail_chars(&pair[0], overlap_chars);
        overlapped.push(format!("{tail}\n{}", pair[1]));
    }
    overlapped
}

/// Stable id for the `index`-th segment of `doc_id`.
pub fn chunk_id(doc_id: &str, index: usize, segment: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(doc_id.as_bytes());
    hasher.update(b"|");
    hasher.update(index.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(segment.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Cut a source document into chunks that inherit its attribution.
pub fn chunk_document(doc: &SourceDocument, config: &ChunkingConfig) -> Vec<Chunk> {
    split(&doc.text, config.max_chars, config.overlap_chars)
        .into_iter()
        .enumerate()
        .map(|(index, text)| Chunk {
            doc_id: doc.doc_id.clone(),
            chunk_id: chunk_id(&doc.doc_id, index, &text),
            source_type: doc.source_type.clone(),
            title: doc.title.clone(),
            text,
            provenance: doc.provenance.clone(),
            meta: doc.meta.clone(),
            updated_at: doc.updated_at.clone(),
        })
        .collect()
}

fn paragraphs(text: &str) -> Vec<String> {
    let normalized = text.replace("\r\n", "\n").replace('\r', "\n");
    let mut out = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in normalized.split('\n') {
        if line.trim().is_empty() {
            flush_paragraph(&mut current, &mut out);
        } else {
            current.push(line);
        }
    }
    flush_paragraph(&mut current, &mut out);
    out
}

fn flush_paragraph(lines: &mut Vec<&str>, out: &mut Vec<String>) {
    if lines.is_empty() {
        return;
    }
    let paragraph = lines.join("\n").trim().to_string();
    lines.clear();
    if !paragraph.is_empty() {
        out.push(paragraph);
    }
}

fn tail_chars(s: &str, n: usize) -> &str {
    let count = s.chars().count();
    if count <= n {
        return s;
    }
    match s.char_indices().nth(count - n) {
        Some((idx, _)) => &s[idx..],
        None => s,
    }
}

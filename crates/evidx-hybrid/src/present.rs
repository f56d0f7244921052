//! Display helpers for results: snippets and viewer links.

use evidx_core::types::Chunk;

/// Collapse whitespace runs and cut to `max_chars`, marking truncation with `…`.
pub fn snippet(text: &str, max_chars: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= max_chars {
        return collapsed;
    }
    let mut out: String = collapsed.chars().take(max_chars).collect();
    out.push('…');
    out
}

/// Run-attributed chunks link to their run, knowledge-base chunks to the
/// note's path, anything else to the knowledge-base root.
pub fn jump_link(chunk: &Chunk, run_viewer_base: &str, kb_viewer_base: &str) -> String {
    let run_base = run_viewer_base.trim_end_matches('/');
    let kb_base = kb_viewer_base.trim_end_matches('/');
    let run_id = chunk.provenance.run_id.as_deref().map(str::trim).filter(|r| !r.is_empty());
    if let Some(run_id) = run_id {
        return format!("{run_base}/{run_id}");
    }
    match chunk.doc_id.strip_prefix("kb:") {
        Some(rest) => format!("{kb_base}/{}", rest.replace(':', "/")),
        None => kb_base.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evidx_core::types::{ChunkMeta, Provenance, SourceType};

    fn chunk(doc_id: &str, run_id: Option<&str>) -> Chunk {
        Chunk {
            doc_id: doc_id.into(),
            chunk_id: "c".into(),
            source_type: SourceType::KbTopic,
            title: String::new(),
            text: String::new(),
            provenance: Provenance {
                run_id: run_id.map(str::to_string),
                file_path: Some("kb/topics/cd73.md".into()),
                ..Default::default()
            },
            meta: ChunkMeta::default(),
            updated_at: String::new(),
        }
    }

    #[test]
    fn snippet_collapses_and_truncates() {
        assert_eq!(snippet("a \n\n b\tc", 240), "a b c");
        assert_eq!(snippet("abcdef", 4), "abcd…");
        assert_eq!(snippet("abcd", 4), "abcd");
    }

    #[test]
    fn links() {
        assert_eq!(jump_link(&chunk("run:r1:report", Some("r1")), "/runs", "/kb"), "/runs/r1");
        assert_eq!(jump_link(&chunk("kb:topic:cd73", None), "/runs", "/kb/"), "/kb/topic/cd73");
        assert_eq!(jump_link(&chunk("external-1", None), "/runs", "/kb"), "/kb");
    }
}

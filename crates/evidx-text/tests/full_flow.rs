use evidx_text::{KeywordIndex, KeywordRow};
use tempfile::TempDir;

fn row(chunk_id: &str, title: &str, text: &str) -> KeywordRow {
    KeywordRow {
        doc_id: format!("kb:topic:{title}"),
        chunk_id: chunk_id.to_string(),
        title: title.to_string(),
        text: text.to_string(),
        source_type: "kb_topic".to_string(),
        updated_at: "2024-01-01T00:00:00Z".to_string(),
    }
}

fn seeded() -> (TempDir, KeywordIndex) {
    let tmp = TempDir::new().expect("tmp");
    let index = KeywordIndex::initialize(&tmp.path().join("keyword")).expect("init");
    index
        .add_documents(&[
            row("c1", "CD73", "CD73 converts AMP to adenosine in the tumour microenvironment."),
            row("c2", "PD-1", "PD-1 is an immune checkpoint receptor on T cells."),
            row("c3", "Report", "Adenosine signalling and checkpoint blockade were both reviewed."),
        ])
        .expect("add");
    (tmp, index)
}

#[test]
fn bm25_ranks_matching_rows_first() {
    let (_tmp, index) = seeded();
    assert_eq!(index.num_docs(), 3);
    let hits = index.search("CD73 adenosine", 10).expect("search");
    assert_eq!(hits[0].chunk_id, "c1");
    assert!(hits.iter().all(|h| h.chunk_id != "c2"));
    for pair in hits.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
}

#[test]
fn stemming_matches_inflected_forms() {
    let (_tmp, index) = seeded();
    let hits = index.search("converting", 5).expect("search");
    assert_eq!(hits.first().map(|h| h.chunk_id.as_str()), Some("c1"));
}

#[test]
fn empty_query_matches_nothing() {
    let (_tmp, index) = seeded();
    assert!(index.search("", 10).expect("search").is_empty());
    assert!(index.search("   ", 10).expect("search").is_empty());
    assert!(index.search("adenosine", 0).expect("search").is_empty());
}

#[test]
fn malformed_query_syntax_is_tolerated() {
    let (_tmp, index) = seeded();
    let hits = index.search("checkpoint AND (", 5).expect("lenient search");
    assert!(!hits.is_empty());
}

#[test]
fn clear_then_reopen() {
    let (tmp, index) = seeded();
    index.clear().expect("clear");
    assert_eq!(index.num_docs(), 0);
    index.close();
    drop(index);
    let reopened = KeywordIndex::open(&tmp.path().join("keyword")).expect("open");
    assert_eq!(reopened.num_docs(), 0);
}

#[test]
fn open_without_index_is_unavailable() {
    let tmp = TempDir::new().expect("tmp");
    assert!(matches!(
        KeywordIndex::open(&tmp.path().join("missing")),
        Err(evidx_core::Error::IndexUnavailable(_))
    ));
}

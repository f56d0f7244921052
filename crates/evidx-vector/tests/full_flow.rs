use evidx_vector::VectorIndex;
use tempfile::TempDir;

fn ids(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn seeded() -> VectorIndex {
    let mut index = VectorIndex::new();
    index
        .add(
            &ids(&["x", "y", "xy"]),
            &[vec![1.0, 0.0], vec![0.0, 1.0], vec![0.7071, 0.7071]],
            "test-model",
        )
        .expect("add");
    index
}

#[test]
fn save_and_load_round_trip() {
    let tmp = TempDir::new().expect("tmp");
    let path = tmp.path().join("gen").join("vectors.bin");
    let index = seeded();
    index.save(&path).expect("save");

    let loaded = VectorIndex::load(&path).expect("load");
    assert_eq!(loaded.len(), 3);
    assert_eq!(loaded.dim(), 2);
    assert_eq!(loaded.model(), "test-model");
    assert_eq!(loaded.ids(), index.ids());
    let hits = loaded.search(&[0.0, 1.0], 1).expect("search");
    assert_eq!(hits[0].chunk_id, "y");
    assert!((hits[0].score - 1.0).abs() < 1e-6);
}

#[test]
fn missing_file_is_an_empty_index() {
    let tmp = TempDir::new().expect("tmp");
    let index = VectorIndex::load(&tmp.path().join("nope.bin")).expect("load");
    assert!(index.is_empty());
    assert!(index.search(&[1.0, 0.0], 5).expect("search").is_empty());
}

#[test]
fn search_orders_by_similarity_and_normalizes_query() {
    let index = seeded();
    let hits = index.search(&[3.0, 0.5], 3).expect("search");
    let order: Vec<&str> = hits.iter().map(|h| h.chunk_id.as_str()).collect();
    assert_eq!(order, vec!["x", "xy", "y"]);
    assert!(hits[0].score <= 1.0 + 1e-6);
    assert_eq!(index.search(&[1.0, 0.0], 0).expect("search").len(), 0);
}

#[test]
fn dimension_guard_leaves_index_unchanged() {
    let mut index = seeded();
    let err = index.add(&ids(&["bad"]), &[vec![1.0, 0.0, 0.0]], "test-model").expect_err("width");
    assert!(matches!(err, evidx_core::Error::DimensionMismatch { expected: 2, actual: 3 }));
    let err = index
        .add(&ids(&["ok", "ragged"]), &[vec![1.0, 0.0], vec![1.0]], "test-model")
        .expect_err("ragged");
    assert!(matches!(err, evidx_core::Error::DimensionMismatch { .. }));
    assert_eq!(index.len(), 3);
    assert!(!index.ids().iter().any(|id| id == "ok"));

    assert!(matches!(
        index.search(&[1.0, 0.0, 0.0], 1),
        Err(evidx_core::Error::DimensionMismatch { expected: 2, actual: 3 })
    ));
}

#[test]
fn model_and_length_mismatches_are_rejected() {
    let mut index = seeded();
    assert!(matches!(
        index.add(&ids(&["z"]), &[vec![1.0, 0.0]], "other-model"),
        Err(evidx_core::Error::ModelMismatch { .. })
    ));
    assert!(index.add(&ids(&["z", "w"]), &[vec![1.0, 0.0]], "test-model").is_err());
    assert_eq!(index.len(), 3);

    index.add(&ids(&["z"]), &[vec![0.6, 0.8]], "test-model").expect("append");
    assert_eq!(index.len(), 4);
}

#[test]
fn corrupted_file_is_a_storage_error() {
    let tmp = TempDir::new().expect("tmp");
    let path = tmp.path().join("vectors.bin");
    seeded().save(&path).expect("save");

    let mut bytes = std::fs::read(&path).expect("read");
    let mid = bytes.len() / 2;
    bytes[mid] ^= 0xFF;
    std::fs::write(&path, &bytes).expect("write");
    assert!(matches!(VectorIndex::load(&path), Err(evidx_core::Error::StorageIo { .. })));

    std::fs::write(&path, b"EVIX").expect("write");
    assert!(matches!(VectorIndex::load(&path), Err(evidx_core::Error::StorageIo { .. })));
}

#[test]
fn stored_rows_are_normalized_so_scores_are_cosines() {
    let mut index = VectorIndex::new();
    index
        .add(&ids(&["big", "exact"]), &[vec![10.0, 0.0], vec![0.6, 0.8]], "raw-model")
        .expect("add");
    let hits = index.search(&[0.6, 0.8], 2).expect("search");
    assert_eq!(hits[0].chunk_id, "exact");
    assert!((hits[0].score - 1.0).abs() < 1e-6);
    assert_eq!(hits[1].chunk_id, "big");
    assert!((hits[1].score - 0.6).abs() < 1e-6);

    let tmp = TempDir::new().expect("tmp");
    let path = tmp.path().join("vectors.bin");
    index.save(&path).expect("save");
    let loaded = VectorIndex::load(&path).expect("load");
    let top = loaded.search(&[1.0, 0.0], 1).expect("search");
    assert_eq!(top[0].chunk_id, "big");
    assert!(top[0].score <= 1.0 + 1e-6);
}

#[test]
fn zero_width_vectors_are_rejected() {
    let mut index = VectorIndex::new();
    let err = index.add(&ids(&["empty"]), &[vec![]], "test-model").expect_err("zero width");
    assert!(matches!(err, evidx_core::Error::DimensionMismatch { actual: 0, .. }));
    assert!(index.is_empty());
    assert_eq!(index.dim(), 0);
    assert!(index.search(&[], 3).expect("search").is_empty());
}

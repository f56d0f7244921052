use std::fs;
use std::path::Path;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, SystemTime};

use evidx_core::chunk_log::read_chunks;
use evidx_core::chunker::ChunkingConfig;
use evidx_core::layout::{IndexLayout, WRITER_LOCK_FILE};
use evidx_core::traits::{EmbeddingProvider, Embeddings};
use evidx_core::types::{ChunkMeta, Provenance, SourceDocument, SourceType};
use evidx_core::Error;
use evidx_embed::{DigestEmbedder, TokenHashEmbedder};
use evidx_index::{DocumentSource, FsDocumentSource, IndexJobs, Indexer, JobKind, JobState};
use tempfile::TempDir;

fn write(path: &Path, body: &str) {
    fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
    fs::write(path, body).expect("write");
}

fn seed_corpus(root: &Path) {
    let kb = root.join("kb");
    write(
        &kb.join("topics/cd73.md"),
        "# CD73\n\nCD73 converts AMP to adenosine.\n\nAdenosine suppresses T cells.",
    );
    write(&kb.join("notes/misc.md"), "Loose note about assay design.");

    let run = root.join("runs/run-001");
    write(&run.join("report.md"), "# Run 001\n\nWe reviewed CD73 inhibitors in solid tumours.");
    write(
        &run.join("claims/claims.jsonl"),
        concat!(
            r#"{"claim":"CD73 blockade restores T cell function","pmid":"111","#,
            r#""section":"results","year":2022}"#,
            "\n",
            "{not json\n",
            r#"{"claim":"Adenosine is immunosuppressive","pmid":222,"locator":"p.4"}"#,
            "\n",
        ),
    );
    write(
        &run.join("research_rank.json"),
        concat!(
            r#"[{"pmid":"111","title":"CD73 in cancer","abstract":"A review of CD73.","#,
            r#""year":2022,"tier":"A","oa":true},"#,
            r#"{"title":"Broken","year":"not a year"}]"#,
        ),
    );
}

fn add_run(root: &Path, id: &str, text: &str) {
    write(&root.join("runs").join(id).join("report.md"), text);
}

fn fs_indexer(root: &Path, embedder: Arc<dyn EmbeddingProvider>) -> Indexer<FsDocumentSource> {
    Indexer::new(
        IndexLayout::new(root.join("index")),
        FsDocumentSource::new(root.join("kb"), root.join("runs")),
        embedder,
        ChunkingConfig::default(),
    )
}

fn published_chunks(root: &Path, generation: &str) -> Vec<evidx_core::types::Chunk> {
    read_chunks(&root.join("index").join(generation).join("chunks.jsonl")).expect("log").chunks
}

fn generation_dirs(root: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(root.join("index"))
        .expect("read index root")
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|n| n.starts_with("gen-"))
        .collect();
    names.sort();
    names
}

#[test]
fn second_update_without_changes_writes_nothing() {
    let tmp = TempDir::new().expect("tmp");
    seed_corpus(tmp.path());
    let indexer = fs_indexer(tmp.path(), Arc::new(TokenHashEmbedder::new(64)));

    let built = indexer.update().expect("first update rebuilds");
    assert!(built.chunks > 0);
    assert!(built.indexed_runs.contains("run-001"));
    assert!(built.kb_indexed_at.is_some());
    let before = indexer.status().expect("status").expect("published");
    let dirs_before = generation_dirs(tmp.path());

    let again = indexer.update().expect("no-op update");
    assert_eq!(again, built);
    let after = indexer.status().expect("status").expect("published");
    assert_eq!(after.generation, before.generation);
    assert_eq!(generation_dirs(tmp.path()), dirs_before);
}

#[test]
fn update_indexes_only_new_runs() {
    let tmp = TempDir::new().expect("tmp");
    seed_corpus(tmp.path());
    let indexer = fs_indexer(tmp.path(), Arc::new(TokenHashEmbedder::new(64)));
    let first = indexer.rebuild().expect("rebuild");
    let first_gen = indexer.status().expect("status").expect("published").generation;

    add_run(tmp.path(), "run-002", "# Run 002\n\nPD-1 checkpoint inhibitors in melanoma.");
    let second = indexer.update().expect("update");
    assert_eq!(second.created_at, first.created_at);
    assert!(second.indexed_runs.contains("run-002"));
    assert_eq!(second.chunks, first.chunks + 1);

    let status = indexer.status().expect("status").expect("published");
    assert_ne!(status.generation, first_gen);
    let dirs = generation_dirs(tmp.path());
    assert_eq!(dirs.len(), 2, "previous generation is retained");

    let chunks = published_chunks(tmp.path(), &status.generation);
    assert_eq!(chunks.len(), second.chunks);
    let run2: Vec<_> =
        chunks.iter().filter(|c| c.provenance.run_id.as_deref() == Some("run-002")).collect();
    assert_eq!(run2.len(), 1);
    assert_eq!(run2[0].doc_id, "run:run-002:report");
}

#[test]
fn update_reindexes_changed_knowledge_base() {
    let tmp = TempDir::new().expect("tmp");
    seed_corpus(tmp.path());
    let indexer = fs_indexer(tmp.path(), Arc::new(TokenHashEmbedder::new(64)));
    let first = indexer.rebuild().expect("rebuild");
    let first_gen = indexer.status().expect("status").expect("published").generation;

    let note = tmp.path().join("kb/notes/misc.md");
    write(&note, "Loose note about assay design.\n\nFlow cytometry panel for CD39 and CD73.");
    let later = SystemTime::now() + Duration::from_secs(120);
    fs::File::options()
        .write(true)
        .open(&note)
        .expect("open note")
        .set_modified(later)
        .expect("set mtime");

    let second = indexer.update().expect("update");
    assert!(second.chunks > first.chunks, "edited note adds chunks");
    assert_ne!(second.kb_indexed_at, first.kb_indexed_at);
    assert_eq!(second.indexed_runs, first.indexed_runs);
    let second_gen = indexer.status().expect("status").expect("published").generation;
    assert_ne!(second_gen, first_gen);

    let chunks = published_chunks(tmp.path(), &second_gen);
    assert_eq!(chunks.len(), second.chunks);
    let topic_chunks = chunks.iter().filter(|c| c.doc_id == "kb:topic:cd73").count();
    assert_eq!(topic_chunks, 1, "unchanged notes are not duplicated");
    assert!(chunks.iter().any(|c| c.text.contains("Flow cytometry")));

    let third = indexer.update().expect("no-op update");
    assert_eq!(third, second);
    assert_eq!(indexer.status().expect("status").expect("published").generation, second_gen);
}

#[test]
fn writer_lock_held_elsewhere_blocks_rebuild() {
    let tmp = TempDir::new().expect("tmp");
    seed_corpus(tmp.path());
    let indexer = fs_indexer(tmp.path(), Arc::new(TokenHashEmbedder::new(32)));
    let other_process = IndexLayout::new(tmp.path().join("index")).lock_writer().expect("lock");

    assert!(matches!(indexer.rebuild(), Err(Error::JobInFlight(_))));
    assert!(matches!(indexer.update(), Err(Error::JobInFlight(_))));
    assert!(indexer.status().expect("status").is_none());

    drop(other_process);
    indexer.rebuild().expect("rebuild after release");
    assert!(!tmp.path().join("index").join(WRITER_LOCK_FILE).exists());
}

#[test]
fn malformed_records_are_skipped() {
    let tmp = TempDir::new().expect("tmp");
    seed_corpus(tmp.path());
    let indexer = fs_indexer(tmp.path(), Arc::new(TokenHashEmbedder::new(64)));
    indexer.rebuild().expect("rebuild");

    let status = indexer.status().expect("status").expect("published");
    let chunks = published_chunks(tmp.path(), &status.generation);
    let claims: Vec<_> = chunks.iter().filter(|c| c.source_type == SourceType::Claim).collect();
    assert_eq!(claims.len(), 2);
    assert!(claims.iter().any(|c| c.provenance.pmid.as_deref() == Some("222")));
    let papers: Vec<_> = chunks.iter().filter(|c| c.source_type == SourceType::Paper).collect();
    assert_eq!(papers.len(), 1);
    assert_eq!(papers[0].meta.year, Some(2022));
    assert_eq!(papers[0].doc_id, "run:run-001:paper:111");
    let topic = chunks.iter().find(|c| c.source_type == SourceType::KbTopic).expect("topic chunk");
    assert_eq!(topic.doc_id, "kb:topic:cd73");
    assert_eq!(topic.title, "CD73");
    assert!(topic.meta.topics.contains("cd73"));
}

struct MemSource {
    docs: Vec<SourceDocument>,
}

impl DocumentSource for MemSource {
    fn run_ids(&self) -> evidx_core::Result<Vec<String>> {
        Ok(vec!["mem".to_string()])
    }
    fn load_run(&self, _run_id: &str) -> evidx_core::Result<Vec<SourceDocument>> {
        Ok(self.docs.clone())
    }
    fn kb_updated_at(&self) -> evidx_core::Result<Option<String>> {
        Ok(None)
    }
    fn load_kb(&self) -> evidx_core::Result<Vec<SourceDocument>> {
        Ok(Vec::new())
    }
}

fn run_provenance(run_id: &str) -> Provenance {
    Provenance { run_id: Some(run_id.into()), ..Default::default() }
}

fn doc(doc_id: &str, text: &str, provenance: Provenance) -> SourceDocument {
    SourceDocument {
        doc_id: doc_id.to_string(),
        title: doc_id.to_string(),
        text: text.to_string(),
        source_type: SourceType::Claim,
        provenance,
        meta: ChunkMeta::default(),
        updated_at: "2024-01-01T00:00:00Z".to_string(),
    }
}

#[test]
fn unattributed_chunks_are_never_persisted() {
    let tmp = TempDir::new().expect("tmp");
    let source = MemSource {
        docs: vec![
            doc("ok", "attributed text", run_provenance("mem")),
            doc("orphan", "nobody owns this", Provenance::default()),
            doc("blank", "blank ids", run_provenance("  ")),
        ],
    };
    let indexer = Indexer::new(
        IndexLayout::new(tmp.path().join("index")),
        source,
        Arc::new(TokenHashEmbedder::new(32)),
        ChunkingConfig::default(),
    );
    let manifest = indexer.rebuild().expect("rebuild");
    assert_eq!(manifest.chunks, 1);
    assert_eq!(manifest.dropped_chunks, 2);

    let status = indexer.status().expect("status").expect("published");
    assert!(published_chunks(tmp.path(), &status.generation).iter().all(|c| c.is_attributable()));
}

#[test]
fn duplicate_chunks_are_stored_once() {
    let tmp = TempDir::new().expect("tmp");
    let source = MemSource {
        docs: vec![
            doc("same", "identical body", run_provenance("mem")),
            doc("same", "identical body", run_provenance("mem")),
        ],
    };
    let indexer = Indexer::new(
        IndexLayout::new(tmp.path().join("index")),
        source,
        Arc::new(TokenHashEmbedder::new(32)),
        ChunkingConfig::default(),
    );
    assert_eq!(indexer.rebuild().expect("rebuild").chunks, 1);
}

struct FailingEmbedder;

impl EmbeddingProvider for FailingEmbedder {
    fn model_name(&self) -> &str {
        "failing"
    }

    fn dim(&self) -> usize {
        8
    }

    fn embed(&self, _texts: &[String]) -> evidx_core::Result<Embeddings> {
        Err(Error::EmbeddingBackend("backend offline".into()))
    }
}

#[test]
fn embedding_failure_aborts_rebuild() {
    let tmp = TempDir::new().expect("tmp");
    seed_corpus(tmp.path());
    let indexer = fs_indexer(tmp.path(), Arc::new(FailingEmbedder));
    assert!(matches!(indexer.rebuild(), Err(Error::EmbeddingBackend(_))));
    assert!(indexer.status().expect("status").is_none());
}

#[test]
fn embedding_failure_keeps_published_generation() {
    let tmp = TempDir::new().expect("tmp");
    seed_corpus(tmp.path());
    let good = fs_indexer(tmp.path(), Arc::new(TokenHashEmbedder::new(64)));
    good.rebuild().expect("rebuild");
    let published = good.status().expect("status").expect("published").generation;

    let bad = fs_indexer(tmp.path(), Arc::new(FailingEmbedder));
    assert!(bad.rebuild().is_err());
    assert_eq!(good.status().expect("status").expect("published").generation, published);
    assert_eq!(generation_dirs(tmp.path()), vec![published]);
}

#[test]
fn changed_embedding_model_triggers_rebuild() {
    let tmp = TempDir::new().expect("tmp");
    seed_corpus(tmp.path());
    let first = fs_indexer(tmp.path(), Arc::new(TokenHashEmbedder::new(64)))
        .rebuild()
        .expect("rebuild");
    assert_eq!(first.embedding_model, "token-hash-d64");

    let switched = fs_indexer(tmp.path(), Arc::new(DigestEmbedder::new(64)));
    let manifest = switched.update().expect("update");
    assert_eq!(manifest.embedding_model, "digest-sha256-d64");
    assert_eq!(manifest.chunks, first.chunks);
}

struct GatedEmbedder {
    inner: TokenHashEmbedder,
    gate: Mutex<mpsc::Receiver<()>>,
}

impl EmbeddingProvider for GatedEmbedder {
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn dim(&self) -> usize {
        self.inner.dim()
    }

    fn embed(&self, texts: &[String]) -> evidx_core::Result<Embeddings> {
        let _ = self.gate.lock().expect("gate").recv();
        self.inner.embed(texts)
    }
}

#[test]
fn job_slot_rejects_concurrent_submission() {
    let tmp = TempDir::new().expect("tmp");
    seed_corpus(tmp.path());
    let (release, gate) = mpsc::channel();
    let embedder =
        Arc::new(GatedEmbedder { inner: TokenHashEmbedder::new(32), gate: Mutex::new(gate) });
    let jobs = IndexJobs::new(Arc::new(fs_indexer(tmp.path(), embedder)));

    let id = jobs.submit(JobKind::Rebuild).expect("first submission");
    assert_eq!(jobs.status().expect("status").state, JobState::Running);
    assert!(matches!(jobs.submit(JobKind::Update), Err(Error::JobInFlight(_))));

    release.send(()).expect("release");
    drop(release);
    let done = jobs.wait().expect("finished");
    assert_eq!(done.id, id);
    assert_eq!(done.state, JobState::Succeeded);
    assert!(done.finished_at.is_some());
    assert!(done.manifest.expect("manifest").chunks > 0);

    let next = jobs.submit(JobKind::Update).expect("slot free again");
    assert!(next > id);
    assert_eq!(jobs.wait().expect("finished").state, JobState::Succeeded);
}

struct PanickingEmbedder;

impl EmbeddingProvider for PanickingEmbedder {
    fn model_name(&self) -> &str {
        "panicking"
    }

    fn dim(&self) -> usize {
        8
    }

    fn embed(&self, _texts: &[String]) -> evidx_core::Result<Embeddings> {
        panic!("native backend crashed");
    }
}

#[test]
fn panicking_job_frees_the_slot() {
    let tmp = TempDir::new().expect("tmp");
    seed_corpus(tmp.path());
    let jobs = IndexJobs::new(Arc::new(fs_indexer(tmp.path(), Arc::new(PanickingEmbedder))));

    let id = jobs.submit(JobKind::Rebuild).expect("submit");
    let mut status = jobs.status().expect("status");
    for _ in 0..500 {
        if status.state != JobState::Running {
            break;
        }
        thread::sleep(Duration::from_millis(10));
        status = jobs.status().expect("status");
    }
    assert_eq!(status.id, id);
    assert_eq!(status.state, JobState::Failed);
    assert!(status.error.as_deref().is_some_and(|e| e.contains("native backend crashed")));
    assert!(status.finished_at.is_some());
    assert!(!tmp.path().join("index").join(WRITER_LOCK_FILE).exists());

    let next = jobs.submit(JobKind::Update).expect("slot is free without wait()");
    assert!(next > id);
    assert_eq!(jobs.wait().expect("finished").state, JobState::Failed);
}

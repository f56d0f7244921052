//! Where documents come from.
//!
//! `FsDocumentSource` reads a knowledge base of markdown notes and a
//! directory of research runs:
//!
//! ```text
//! <kb_dir>/topics/**/*.md   kb_topic   kb:topic:<path under topics/>
//! <kb_dir>/papers/**/*.md   kb_paper   kb:paper:<path under papers/>
//! <kb_dir>/**/*.md          kb_note    kb:note:<path under kb_dir>
//! <runs_dir>/<run_id>/report.md               run_report
//! <runs_dir>/<run_id>/qa_report.md            qa_report
//! <runs_dir>/<run_id>/claims/*.jsonl          claim (one per line)
//! <runs_dir>/<run_id>/research_rank.json      paper (or papers.jsonl)
//! ```
//!
//! KB paths in ids drop the `.md` extension and use `/` separators, so
//! `topics/immuno/CD73.md` becomes `kb:topic:immuno/CD73`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use tracing::{debug, warn};
use walkdir::WalkDir;

use evidx_core::error::{Error, Result};
use evidx_core::types::{ChunkMeta, Provenance, SourceDocument, SourceType};

/// Supplier of documents to index.
///
/// Implementations should log and skip individual unreadable artifacts and
/// only return `Err` when the source as a whole cannot be read.
pub trait DocumentSource: Send + Sync {
    fn run_ids(&self) -> Result<Vec<String>>;
    fn load_run(&self, run_id: &str) -> Result<Vec<SourceDocument>>;
    /// Latest modification time of the knowledge base, `None` when empty.
    fn kb_updated_at(&self) -> Result<Option<String>>;
    fn load_kb(&self) -> Result<Vec<SourceDocument>>;
}

#[derive(Debug, Clone)]
pub struct FsDocumentSource {
    kb_dir: PathBuf,
    runs_dir: PathBuf,
}

impl FsDocumentSource {
    pub fn new(kb_dir: impl Into<PathBuf>, runs_dir: impl Into<PathBuf>) -> Self {
        Self { kb_dir: kb_dir.into(), runs_dir: runs_dir.into() }
    }

    fn kb_files(&self) -> Vec<PathBuf> {
        if !self.kb_dir.is_dir() {
            return Vec::new();
        }
        let mut files: Vec<PathBuf> = WalkDir::new(&self.kb_dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| p.extension().and_then(|s| s.to_str()) == Some("md"))
            .collect();
        files.sort();
        files
    }

    fn kb_document(&self, path: &Path) -> Option<SourceDocument> {
        let text = read_text(path)?;
        let stem = file_stem(path);
        let rel = path.strip_prefix(&self.kb_dir).unwrap_or(path);
        let section = rel
            .components()
            .next()
            .and_then(|c| c.as_os_str().to_str())
            .unwrap_or_default();
        let under_section = rel.strip_prefix(section).unwrap_or(rel);
        let mut meta = ChunkMeta::default();
        let (source_type, doc_id) = match section {
            "topics" => {
                meta.topics.insert(stem.clone());
                (SourceType::KbTopic, format!("kb:topic:{}", path_key(under_section)))
            }
            "papers" => (SourceType::KbPaper, format!("kb:paper:{}", path_key(under_section))),
            _ => (SourceType::KbNote, format!("kb:note:{}", path_key(rel))),
        };
        Some(SourceDocument {
            doc_id,
            title: first_heading(&text).unwrap_or_else(|| stem.clone()),
            text,
            source_type,
            provenance: Provenance {
                file_path: Some(path.display().to_string()),
                ..Default::default()
            },
            meta,
            updated_at: mtime_iso(path).unwrap_or_default(),
        })
    }
}

impl DocumentSource for FsDocumentSource {
    fn run_ids(&self) -> Result<Vec<String>> {
        let entries = match fs::read_dir(&self.runs_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::io(format!("list {}", self.runs_dir.display()), e)),
        };
        let mut ids: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_ok_and(|t| t.is_dir()))
            .filter_map(|e| e.file_name().to_str().map(str::to_string))
            .filter(|name| !name.starts_with('.'))
            .collect();
        ids.sort();
        Ok(ids)
    }

    fn load_run(&self, run_id: &str) -> Result<Vec<SourceDocument>> {
        let dir = self.runs_dir.join(run_id);
        if !dir.is_dir() {
            return Err(Error::io(
                format!("run {run_id}"),
                std::io::Error::new(std::io::ErrorKind::NotFound, dir.display().to_string()),
            ));
        }
        let mut docs = Vec::new();
        for (file, source_type, suffix, title) in [
            ("report.md", SourceType::RunReport, "report", "report"),
            ("qa_report.md", SourceType::QaReport, "qa_report", "QA report"),
        ] {
            let path = dir.join(file);
            if !path.is_file() {
                continue;
            }
            if let Some(text) = read_text(&path) {
                docs.push(SourceDocument {
                    doc_id: format!("run:{run_id}:{suffix}"),
                    title: first_heading(&text).unwrap_or_else(|| format!("Run {run_id} {title}")),
                    text,
                    source_type,
                    provenance: run_provenance(run_id, &path),
                    meta: ChunkMeta::default(),
                    updated_at: mtime_iso(&path).unwrap_or_default(),
                });
            }
        }
        docs.extend(load_claims(run_id, &dir.join("claims")));
        docs.extend(load_papers(run_id, &dir));
        debug!("run {run_id}: {} documents", docs.len());
        Ok(docs)
    }

    fn kb_updated_at(&self) -> Result<Option<String>> {
        let latest = self
            .kb_files()
            .iter()
            .filter_map(|p| fs::metadata(p).and_then(|m| m.modified()).ok())
            .max();
        Ok(latest.map(system_time_iso))
    }

    fn load_kb(&self) -> Result<Vec<SourceDocument>> {
        let docs: Vec<SourceDocument> =
            self.kb_files().iter().filter_map(|p| self.kb_document(p)).collect();
        debug!("knowledge base: {} documents", docs.len());
        Ok(docs)
    }
}

/// Identifiers show up both as strings and as bare numbers.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LooseId {
    Text(String),
    Number(i64),
}

impl LooseId {
    fn into_string(self) -> String {
        match self {
            Self::Text(s) => s,
            Self::Number(n) => n.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ClaimRecord {
    #[serde(alias = "claim", alias = "statement")]
    text: Option<String>,
    pmid: Option<LooseId>,
    doi: Option<String>,
    section: Option<String>,
    locator: Option<String>,
    year: Option<i32>,
    tier: Option<String>,
    oa: Option<bool>,
    #[serde(default)]
    topics: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct PaperRecord {
    pmid: Option<LooseId>,
    doi: Option<String>,
    title: Option<String>,
    #[serde(alias = "abstract")]
    summary: Option<String>,
    year: Option<i32>,
    journal: Option<String>,
    tier: Option<String>,
    score: Option<f64>,
    oa: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RankFile {
    List(Vec<serde_json::Value>),
    Wrapped { papers: Vec<serde_json::Value> },
}

fn load_claims(run_id: &str, claims_dir: &Path) -> Vec<SourceDocument> {
    let Ok(entries) = fs::read_dir(claims_dir) else { return Vec::new() };
    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().and_then(|s| s.to_str()) == Some("jsonl"))
        .collect();
    files.sort();

    let mut docs = Vec::new();
    let mut n = 0usize;
    for path in files {
        let Some(body) = read_text(&path) else { continue };
        let updated_at = mtime_iso(&path).unwrap_or_default();
        for (line_no, line) in body.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let record: ClaimRecord = match serde_json::from_str(line) {
                Ok(r) => r,
                Err(e) => {
                    warn!("skipping claim {}:{}: {e}", path.display(), line_no + 1);
                    continue;
                }
            };
            let Some(text) = record.text.filter(|t| !t.trim().is_empty()) else {
                warn!("skipping claim {}:{}: no text", path.display(), line_no + 1);
                continue;
            };
            n += 1;
            let mut provenance = run_provenance(run_id, &path);
            provenance.pmid = record.pmid.map(LooseId::into_string);
            provenance.doi = record.doi;
            provenance.section = record.section;
            provenance.locator = record.locator;
            let meta = ChunkMeta {
                year: record.year,
                tier: record.tier,
                oa: record.oa,
                topics: record.topics.into_iter().collect(),
                ..Default::default()
            };
            docs.push(SourceDocument {
                doc_id: format!("run:{run_id}:claim:{n}"),
                title: format!("Claim {n} ({run_id})"),
                text,
                source_type: SourceType::Claim,
                provenance,
                meta,
                updated_at: updated_at.clone(),
            });
        }
    }
    docs
}

fn load_papers(run_id: &str, run_dir: &Path) -> Vec<SourceDocument> {
    let rank = run_dir.join("research_rank.json");
    let jsonl = run_dir.join("papers.jsonl");
    let (path, values): (PathBuf, Vec<serde_json::Value>) = if rank.is_file() {
        let Some(body) = read_text(&rank) else { return Vec::new() };
        match serde_json::from_str::<RankFile>(&body) {
            Ok(RankFile::List(v) | RankFile::Wrapped { papers: v }) => (rank, v),
            Err(e) => {
                warn!("skipping {}: {e}", rank.display());
                return Vec::new();
            }
        }
    } else if jsonl.is_file() {
        let Some(body) = read_text(&jsonl) else { return Vec::new() };
        let mut values = Vec::new();
        for (line_no, line) in body.lines().enumerate().filter(|(_, l)| !l.trim().is_empty()) {
            match serde_json::from_str(line) {
                Ok(v) => values.push(v),
                Err(e) => warn!("skipping paper {}:{}: {e}", jsonl.display(), line_no + 1),
            }
        }
        (jsonl, values)
    } else {
        return Vec::new();
    };

    let updated_at = mtime_iso(&path).unwrap_or_default();
    let mut docs = Vec::new();
    for (idx, value) in values.into_iter().enumerate() {
        let record: PaperRecord = match serde_json::from_value(value) {
            Ok(r) => r,
            Err(e) => {
                warn!("skipping paper #{} in {}: {e}", idx + 1, path.display());
                continue;
            }
        };
        let pmid = record.pmid.map(LooseId::into_string);
        let title = record.title.unwrap_or_default();
        let text = match record.summary {
            Some(s) if !title.is_empty() => format!("{title}\n\n{s}"),
            Some(s) => s,
            None => title.clone(),
        };
        if text.trim().is_empty() {
            continue;
        }
        let key = pmid.clone().unwrap_or_else(|| (idx + 1).to_string());
        let mut provenance = run_provenance(run_id, &path);
        provenance.pmid = pmid.clone();
        provenance.doi = record.doi;
        docs.push(SourceDocument {
            doc_id: format!("run:{run_id}:paper:{key}"),
            title: if title.is_empty() { format!("Paper {key}") } else { title },
            text,
            source_type: SourceType::Paper,
            provenance,
            meta: ChunkMeta {
                year: record.year,
                journal: record.journal,
                tier: record.tier,
                score: record.score,
                oa: record.oa,
                ..Default::default()
            },
            updated_at: updated_at.clone(),
        });
    }
    docs
}

fn run_provenance(run_id: &str, path: &Path) -> Provenance {
    Provenance {
        run_id: Some(run_id.to_string()),
        file_path: Some(path.display().to_string()),
        ..Default::default()
    }
}

fn read_text(path: &Path) -> Option<String> {
    match fs::read(path) {
        Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
        Err(e) => {
            warn!("skipping unreadable {}: {e}", path.display());
            None
        }
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default()
}

/// `a/b/name.md` -> `a/b/name`, joined with `/` on every platform.
fn path_key(rel: &Path) -> String {
    let mut parts: Vec<String> = rel
        .parent()
        .into_iter()
        .flat_map(Path::components)
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    parts.push(file_stem(rel));
    parts.join("/")
}

fn first_heading(text: &str) -> Option<String> {
    text.lines()
        .find_map(|l| l.trim_start().strip_prefix("# "))
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
}

fn mtime_iso(path: &Path) -> Option<String> {
    fs::metadata(path).and_then(|m| m.modified()).ok().map(system_time_iso)
}

fn system_time_iso(t: SystemTime) -> String {
    DateTime::<Utc>::from(t).to_rfc3339_opts(SecondsFormat::Millis, true)
}

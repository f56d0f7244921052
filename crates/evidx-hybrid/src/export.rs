//! Render search results as JSON, Markdown or CSV.

use std::fmt::{self, Write};
use std::str::FromStr;

use evidx_core::error::{Error, Result};

use crate::engine::SearchResult;

pub const CSV_COLUMNS: [&str; 12] = [
    "doc_id", "chunk_id", "title", "score", "snippet", "run_id", "pmid", "section", "locator",
    "year", "tier", "oa",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Markdown,
    Csv,
}

impl FromStr for ExportFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "md" | "markdown" => Ok(Self::Markdown),
            "csv" => Ok(Self::Csv),
            other => Err(Error::InvalidConfig(format!("unknown export format '{other}'"))),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Json => "json",
            Self::Markdown => "md",
            Self::Csv => "csv",
        })
    }
}

pub fn export(results: &[SearchResult], format: ExportFormat) -> Result<String> {
    match format {
        ExportFormat::Json => serde_json::to_string_pretty(results).map_err(|source| {
            Error::Serialization { context: "export results as JSON".into(), source }
        }),
        ExportFormat::Markdown => Ok(to_markdown(results)),
        ExportFormat::Csv => Ok(to_csv(results)),
    }
}

fn to_markdown(results: &[SearchResult]) -> String {
    let mut out = String::from("# Search results\n");
    if results.is_empty() {
        out.push_str("\n_No results._\n");
        return out;
    }
    for (i, r) in results.iter().enumerate() {
        let _ = write!(out, "\n## {}. {}\n\n", i + 1, r.title);
        let _ = writeln!(out, "- score: {:.4}", r.score);
        let _ = writeln!(out, "- source: {} (`{}`)", r.source_type, r.doc_id);
        if let Some(run_id) = &r.provenance.run_id {
            let _ = writeln!(out, "- run: {run_id}");
        }
        if let Some(pmid) = &r.provenance.pmid {
            let _ = writeln!(out, "- pmid: {pmid}");
        }
        if let Some(year) = r.meta.year {
            let _ = writeln!(out, "- year: {year}");
        }
        let _ = writeln!(out, "- link: [{0}]({0})", r.jump_link);
        let _ = write!(out, "\n> {}\n", r.snippet);
    }
    out
}

fn to_csv(results: &[SearchResult]) -> String {
    let mut out = String::new();
    push_record(&mut out, CSV_COLUMNS.iter().map(|c| (*c).to_string()));
    for r in results {
        let opt = |v: &Option<String>| v.clone().unwrap_or_default();
        push_record(
            &mut out,
            [
                r.doc_id.clone(),
                r.chunk_id.clone(),
                r.title.clone(),
                format!("{:.6}", r.score),
                r.snippet.clone(),
                opt(&r.provenance.run_id),
                opt(&r.provenance.pmid),
                opt(&r.provenance.section),
                opt(&r.provenance.locator),
                r.meta.year.map(|y| y.to_string()).unwrap_or_default(),
                opt(&r.meta.tier),
                r.meta.oa.map(|b| b.to_string()).unwrap_or_default(),
            ]
            .into_iter(),
        );
    }
    out
}

/// One RFC 4180 record terminated by CRLF.
fn push_record(out: &mut String, fields: impl Iterator<Item = String>) {
    for (i, field) in fields.enumerate() {
        if i > 0 {
            out.push(',');
        }
        if field.contains([',', '"', '\n', '\r']) {
            out.push('"');
            out.push_str(&field.replace('"', "\"\""));
            out.push('"');
        } else {
            out.push_str(&field);
        }
    }
    out.push_str("\r\n");
}

use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::Value;
use tantivy::TantivyDocument;
use tracing::debug;

use evidx_core::error::Result;
use evidx_core::types::ScoredId;

use crate::index::KeywordIndex;
use crate::tantivy_utils::keyword_err;

impl KeywordIndex {
    /// Rank chunks for `query` by BM25 over title and text.
    ///
    /// Scores are raw BM25 (higher is better). An empty query matches nothing.
    pub fn search(&self, query: &str, top_k: usize) -> Result<Vec<ScoredId>> {
        if query.trim().is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }
        let searcher = self.reader.searcher();
        let qp = QueryParser::for_index(&self.index, vec![self.fields.title, self.fields.text]);
        let (q, errors) = qp.parse_query_lenient(query);
        if !errors.is_empty() {
            debug!("lenient parse of {query:?} ignored {} error(s)", errors.len());
        }
        let top_docs = searcher.search(&q, &TopDocs::with_limit(top_k)).map_err(keyword_err)?;
        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, addr) in top_docs {
            let doc: TantivyDocument = searcher.doc(addr).map_err(keyword_err)?;
            let Some(chunk_id) = doc.get_first(self.fields.chunk_id).and_then(|v| v.as_str()) else {
                continue;
            };
            hits.push(ScoredId { chunk_id: chunk_id.to_string(), score });
        }
        Ok(hits)
    }
}

use tantivy::schema::{
    Field, IndexRecordOption, Schema, TextFieldIndexing, TextOptions, STORED, STRING,
};
use tantivy::tokenizer::{
    Language, LowerCaser, RemoveLongFilter, SimpleTokenizer, Stemmer, StopWordFilter, TextAnalyzer,
};
use tantivy::Index;

use evidx_core::error::{Error, Result};

pub const STEMMED_TOKENIZER: &str = "en_stem_stopwords";

pub fn build_schema() -> Schema {
    let mut schema_builder = Schema::builder();
    schema_builder.add_text_field("doc_id", STRING | STORED);
    schema_builder.add_text_field("chunk_id", STRING | STORED);
    let text_field_indexing = TextFieldIndexing::default()
        .set_tokenizer(STEMMED_TOKENIZER)
        .set_index_option(IndexRecordOption::WithFreqsAndPositions);
    let text_options = TextOptions::default()
        .set_indexing_options(text_field_indexing)
        .set_stored();
    schema_builder.add_text_field("title", text_options.clone());
    schema_builder.add_text_field("text", text_options);
    schema_builder.add_text_field("source_type", STRING | STORED);
    schema_builder.add_text_field("updated_at", STRING | STORED);
    schema_builder.build()
}

pub fn register_tokenizer(index: &Index) {
    let stop_words = vec![
        "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "has", "he", "in", "is",
        "it", "its", "of", "on", "that", "the", "to", "was", "will", "with", "or", "but", "not",
        "this", "these", "they", "them", "their", "there", "then", "than", "so", "if", "when",
        "where", "why", "how", "what", "which", "who", "whom", "whose", "can", "could", "should",
        "would", "may", "might", "must", "shall", "do", "does", "did", "have", "had", "having",
    ];
    let tokenizer = TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(RemoveLongFilter::limit(40))
        .filter(LowerCaser)
        .filter(StopWordFilter::remove(stop_words.into_iter().map(|s| s.to_string())))
        .filter(Stemmer::new(Language::English))
        .build();
    index.tokenizers().register(STEMMED_TOKENIZER, tokenizer);
}

/// Field handles resolved once per opened index.
#[derive(Debug, Clone, Copy)]
pub struct KeywordFields {
    pub doc_id: Field,
    pub chunk_id: Field,
    pub title: Field,
    pub text: Field,
    pub source_type: Field,
    pub updated_at: Field,
}

impl KeywordFields {
    pub fn resolve(schema: &Schema) -> Result<Self> {
        let get = |name: &str| schema.get_field(name).map_err(keyword_err);
        Ok(Self {
            doc_id: get("doc_id")?,
            chunk_id: get("chunk_id")?,
            title: get("title")?,
            text: get("text")?,
            source_type: get("source_type")?,
            updated_at: get("updated_at")?,
        })
    }
}

pub fn keyword_err(e: tantivy::TantivyError) -> Error {
    Error::KeywordIndex(e.to_string())
}

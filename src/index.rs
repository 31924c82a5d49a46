//! Full-text index over content documents, keyed by (work code, ordinal).

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tantivy::collector::DocSetCollector;
use tantivy::directory::MmapDirectory;
use tantivy::query::{AllQuery, BooleanQuery, Occur, PhraseQuery, Query, TermQuery};
use tantivy::schema::{
    Field, IndexRecordOption, Schema, TextFieldIndexing, TextOptions, Value, INDEXED, STORED,
    STRING,
};
use tantivy::tokenizer::{Language, LowerCaser, SimpleTokenizer, Stemmer, TextAnalyzer, TokenStream};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};
use tracing::debug;

use crate::error::RequestError;
use crate::model::Content;
use crate::query::{AstNode, SearchOptions, TokenKind};

pub const NO_STEMMING: &str = "noStemming";
pub const GERMAN_STEMMING: &str = "germanStemming";

#[derive(Clone, Copy)]
struct Fields {
    work_code: Field,
    kind: Field,
    ordinal: Field,
    plain: Field,
    stemmed: Field,
}

#[derive(Clone)]
pub struct SearchIndex {
    index: Index,
    reader: IndexReader,
    fields: Fields,
    writer_memory: usize,
}

fn text_options(tokenizer: &str) -> TextOptions {
    TextOptions::default().set_indexing_options(
        TextFieldIndexing::default()
            .set_tokenizer(tokenizer)
            .set_index_option(IndexRecordOption::WithFreqsAndPositions),
    )
}

fn schema() -> Schema {
    let mut builder = Schema::builder();
    builder.add_text_field("work_code", STRING | STORED);
    builder.add_text_field("kind", STRING);
    builder.add_u64_field("ordinal", INDEXED | STORED);
    builder.add_text_field("search_text_plain", text_options(NO_STEMMING));
    builder.add_text_field("search_text_stemmed", text_options(GERMAN_STEMMING));
    builder.build()
}

fn register_analyzers(index: &Index) {
    index.tokenizers().register(
        NO_STEMMING,
        TextAnalyzer::builder(SimpleTokenizer::default())
            .filter(LowerCaser)
            .build(),
    );
    index.tokenizers().register(
        GERMAN_STEMMING,
        TextAnalyzer::builder(SimpleTokenizer::default())
            .filter(LowerCaser)
            .filter(Stemmer::new(Language::German))
            .build(),
    );
}

impl SearchIndex {
    pub fn open(dir: &Path, writer_memory: usize) -> Result<Self> {
        fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        let directory = MmapDirectory::open(dir)?;
        let index = Index::open_or_create(directory, schema())?;
        Self::from_index(index, writer_memory)
    }

    pub fn in_memory(writer_memory: usize) -> Result<Self> {
        Self::from_index(Index::create_in_ram(schema()), writer_memory)
    }

    fn from_index(index: Index, writer_memory: usize) -> Result<Self> {
        register_analyzers(&index);
        let schema = index.schema();
        let fields = Fields {
            work_code: schema.get_field("work_code")?,
            kind: schema.get_field("kind")?,
            ordinal: schema.get_field("ordinal")?,
            plain: schema.get_field("search_text_plain")?,
            stemmed: schema.get_field("search_text_stemmed")?,
        };
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;
        Ok(Self {
            index,
            reader,
            fields,
            writer_memory,
        })
    }

    // ── Writing ──

    /// Deletes every document of `replaced` work codes and adds `contents`,
    /// without committing. Dropping the writer discards the changes.
    pub fn stage(&self, replaced: &[String], contents: &[Content]) -> Result<IndexWriter> {
        let f = self.fields;
        let writer: IndexWriter = self
            .index
            .writer_with_num_threads(1, self.writer_memory)
            .context("opening index writer")?;
        for code in replaced {
            writer.delete_term(Term::from_field_text(f.work_code, code));
        }
        for c in contents {
            writer.add_document(doc!(
                f.work_code => c.work_code.clone(),
                f.kind => c.kind.as_str().to_string(),
                f.ordinal => c.ordinal as u64,
                f.plain => c.search_text.clone(),
                f.stemmed => c.search_text.clone(),
            ))?;
        }
        debug!(replaced = replaced.len(), added = contents.len(), "staged index changes");
        Ok(writer)
    }

    pub fn commit(&self, mut writer: IndexWriter) -> Result<()> {
        writer.commit()?;
        self.reader.reload()?;
        Ok(())
    }

    pub fn num_docs(&self) -> u64 {
        self.reader.searcher().num_docs()
    }

    // ── Querying ──

    /// AST → index query restricted to the requested kinds and works.
    pub fn build_query(
        &self,
        ast: &AstNode,
        options: &SearchOptions,
    ) -> Result<Box<dyn Query>, RequestError> {
        let f = self.fields;
        let (field, analyzer_name) = if options.with_stemming {
            (f.stemmed, GERMAN_STEMMING)
        } else {
            (f.plain, NO_STEMMING)
        };
        let mut analyzer = self
            .index
            .tokenizers()
            .get(analyzer_name)
            .ok_or(RequestError::EmptyQuery)?;

        let text_query = node_query(ast, field, &mut analyzer)?;

        let kinds = options
            .kinds()
            .into_iter()
            .map(|k| term_clause(f.kind, k.as_str()))
            .collect();
        let kinds: Box<dyn Query> = Box::new(BooleanQuery::new(kinds));
        let mut clauses = vec![(Occur::Must, text_query), (Occur::Must, kinds)];
        if let Some(codes) = &options.work_codes {
            if codes.is_empty() {
                return Err(RequestError::EmptyWorkSelection);
            }
            let codes = codes.iter().map(|c| term_clause(f.work_code, c)).collect();
            let codes: Box<dyn Query> = Box::new(BooleanQuery::new(codes));
            clauses.push((Occur::Must, codes));
        }
        Ok(Box::new(BooleanQuery::new(clauses)))
    }

    /// Matching (work code, ordinal) keys in ascending order.
    /// Keys of all matches in (work code, ordinal) order, cut after `limit`.
    pub fn search(&self, query: &dyn Query, limit: usize) -> Result<Vec<(String, i32)>> {
        let f = self.fields;
        let searcher = self.reader.searcher();
        let hits = searcher.search(query, &DocSetCollector)?;
        let mut keys = Vec::with_capacity(hits.len());
        for address in hits {
            let doc: TantivyDocument = searcher.doc(address)?;
            let code = doc.get_first(f.work_code).and_then(|v| v.as_str());
            let ordinal = doc.get_first(f.ordinal).and_then(|v| v.as_u64());
            if let (Some(code), Some(ordinal)) = (code, ordinal) {
                keys.push((code.to_string(), ordinal as i32));
            }
        }
        keys.sort();
        if keys.len() > limit {
            debug!(matches = keys.len(), limit, "search results capped");
            keys.truncate(limit);
        }
        Ok(keys)
    }
}

fn term_clause(field: Field, text: &str) -> (Occur, Box<dyn Query>) {
    let term = TermQuery::new(Term::from_field_text(field, text), IndexRecordOption::Basic);
    (Occur::Should, Box::new(term))
}

fn analyze(analyzer: &mut TextAnalyzer, field: Field, text: &str) -> Vec<Term> {
    let mut terms = Vec::new();
    let mut stream = analyzer.token_stream(text);
    while stream.advance() {
        terms.push(Term::from_field_text(field, &stream.token().text));
    }
    terms
}

fn child(node: &Option<Box<AstNode>>) -> Result<&AstNode, RequestError> {
    node.as_deref().ok_or(RequestError::EmptyQuery)
}

fn node_query(
    node: &AstNode,
    field: Field,
    analyzer: &mut TextAnalyzer,
) -> Result<Box<dyn Query>, RequestError> {
    let query: Box<dyn Query> = match node.token.kind {
        TokenKind::Word | TokenKind::Phrase => {
            let mut terms = analyze(analyzer, field, &node.token.text);
            match terms.len() {
                0 => return Err(RequestError::EmptyQuery),
                1 => Box::new(TermQuery::new(
                    terms.remove(0),
                    IndexRecordOption::WithFreqs,
                )),
                _ => Box::new(PhraseQuery::new(terms)),
            }
        }
        TokenKind::And | TokenKind::Or => {
            let occur = if node.token.kind == TokenKind::And {
                Occur::Must
            } else {
                Occur::Should
            };
            let left = node_query(child(&node.left)?, field, analyzer)?;
            let right = node_query(child(&node.right)?, field, analyzer)?;
            Box::new(BooleanQuery::new(vec![(occur, left), (occur, right)]))
        }
        TokenKind::Not => {
            let operand = node_query(child(&node.left)?, field, analyzer)?;
            let all: Box<dyn Query> = Box::new(AllQuery);
            Box::new(BooleanQuery::new(vec![
                (Occur::Must, all),
                (Occur::MustNot, operand),
            ]))
        }
        TokenKind::Open | TokenKind::Close => return Err(RequestError::EmptyQuery),
    };
    Ok(query)
}

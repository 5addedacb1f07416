//! Full-text search over chunk content via Tantivy, scored by its built-in
//! BM25 relevance function. Grounded on the teacher's `IndexSchema`/
//! `IndexManager`: a single `IndexWriter` per host serialized by a mutex,
//! readers auto-reloading after each commit.

use std::path::Path;
use tantivy::collector::TopDocs;
use tantivy::query::{BooleanQuery, Occur, QueryParser, TermQuery};
use tantivy::schema::{Field, IndexRecordOption, Schema, Value, FAST, STORED, STRING, TEXT};
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};
use tokio::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum LexicalIndexError {
    #[error("tantivy error: {0}")]
    Tantivy(#[from] tantivy::TantivyError),
    #[error("query parse error: {0}")]
    QueryParse(String),
}

type Result<T> = std::result::Result<T, LexicalIndexError>;

struct Fields {
    chunk_id: Field,
    document_id: Field,
    owner_id: Field,
    content: Field,
    page_number: Field,
    chunk_index: Field,
}

fn build_schema() -> (Schema, Fields) {
    let mut builder = Schema::builder();
    let chunk_id = builder.add_text_field("chunk_id", STRING | STORED);
    let document_id = builder.add_text_field("document_id", STRING | STORED);
    let owner_id = builder.add_text_field("owner_id", STRING | STORED);
    let content = builder.add_text_field("content", TEXT | STORED);
    let page_number = builder.add_i64_field("page_number", STORED | FAST);
    let chunk_index = builder.add_i64_field("chunk_index", STORED | FAST);
    (
        builder.build(),
        Fields {
            chunk_id,
            document_id,
            owner_id,
            content,
            page_number,
            chunk_index,
        },
    )
}

pub struct LexicalIndex {
    index: Index,
    reader: IndexReader,
    fields: Fields,
    writer: Mutex<IndexWriter>,
}

impl LexicalIndex {
    pub fn open_or_create(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir).map_err(|e| {
            LexicalIndexError::Tantivy(tantivy::TantivyError::OpenDirectoryError(
                tantivy::directory::error::OpenDirectoryError::wrap_io_error(e, dir.to_path_buf()),
            ))
        })?;
        let (schema, fields) = build_schema();
        let tantivy_dir = tantivy::directory::MmapDirectory::open(dir)?;
        let index = Index::open_or_create(tantivy_dir, schema)?;
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommitWithDelay)
            .try_into()?;
        let writer = index.writer(50_000_000)?;
        Ok(Self { index, reader, fields, writer: Mutex::new(writer) })
    }

    pub async fn index_chunk(
        &self,
        chunk_id: &str,
        document_id: &str,
        owner_id: &str,
        chunk_index: i64,
        page_number: Option<i64>,
        content: &str,
    ) -> Result<()> {
        let mut doc = TantivyDocument::default();
        doc.add_text(self.fields.chunk_id, chunk_id);
        doc.add_text(self.fields.document_id, document_id);
        doc.add_text(self.fields.owner_id, owner_id);
        doc.add_text(self.fields.content, content);
        doc.add_i64(self.fields.chunk_index, chunk_index);
        if let Some(p) = page_number {
            doc.add_i64(self.fields.page_number, p);
        }

        let writer = self.writer.lock().await;
        let term = Term::from_field_text(self.fields.chunk_id, chunk_id);
        writer.delete_term(term);
        writer.add_document(doc)?;
        Ok(())
    }

    pub async fn remove_chunk(&self, chunk_id: &str) -> Result<()> {
        let writer = self.writer.lock().await;
        let term = Term::from_field_text(self.fields.chunk_id, chunk_id);
        writer.delete_term(term);
        Ok(())
    }

    pub async fn remove_document(&self, document_id: &str) -> Result<()> {
        let writer = self.writer.lock().await;
        let term = Term::from_field_text(self.fields.document_id, document_id);
        writer.delete_term(term);
        Ok(())
    }

    pub async fn commit(&self) -> Result<()> {
        let mut writer = self.writer.lock().await;
        writer.commit()?;
        Ok(())
    }

    /// Ordered (chunk_id, BM25 score) pairs, filtered in-SQL-equivalent
    /// fashion by owner via an indexed `owner_id` term clause.
    pub fn query(&self, text: &str, k: usize, owner_id: &str) -> Result<Vec<(String, f32)>> {
        let searcher = self.reader.searcher();
        let parser = QueryParser::for_index(&self.index, vec![self.fields.content]);
        let text_query = parser
            .parse_query(text)
            .map_err(|e| LexicalIndexError::QueryParse(e.to_string()))?;

        let owner_term = Term::from_field_text(self.fields.owner_id, owner_id);
        let owner_query = TermQuery::new(owner_term, IndexRecordOption::Basic);

        let combined = BooleanQuery::new(vec![
            (Occur::Must, text_query),
            (Occur::Must, Box::new(owner_query)),
        ]);

        let top_docs = searcher.search(&combined, &TopDocs::with_limit(k))?;
        let mut results = Vec::with_capacity(top_docs.len());
        for (score, doc_address) in top_docs {
            let doc: TantivyDocument = searcher.doc(doc_address)?;
            if let Some(chunk_id) = doc
                .get_first(self.fields.chunk_id)
                .and_then(|v| v.as_str())
            {
                results.push((chunk_id.to_string(), score));
            }
        }
        Ok(results)
    }

    pub fn count(&self) -> usize {
        self.reader.searcher().num_docs() as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn query_returns_matching_chunk_scoped_to_owner() {
        let dir = tempdir().unwrap();
        let idx = LexicalIndex::open_or_create(dir.path()).unwrap();
        idx.index_chunk("c1", "d1", "owner-a", 0, Some(1), "the quick brown fox")
            .await
            .unwrap();
        idx.index_chunk("c2", "d2", "owner-b", 0, None, "the quick brown fox")
            .await
            .unwrap();
        idx.commit().await.unwrap();

        let results = idx.query("quick fox", 10, "owner-a").unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, "c1");
    }

    #[tokio::test]
    async fn remove_document_drops_its_chunks_from_results() {
        let dir = tempdir().unwrap();
        let idx = LexicalIndex::open_or_create(dir.path()).unwrap();
        idx.index_chunk("c1", "d1", "owner-a", 0, None, "alpha beta gamma")
            .await
            .unwrap();
        idx.commit().await.unwrap();
        assert_eq!(idx.query("alpha", 10, "owner-a").unwrap().len(), 1);

        idx.remove_document("d1").await.unwrap();
        idx.commit().await.unwrap();
        assert_eq!(idx.query("alpha", 10, "owner-a").unwrap().len(), 0);
    }
}

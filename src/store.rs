//! Primary relational store: documents, chunks, query logs.
//!
//! Backed by `sqlx`-over-SQLite, grounded on the migration-driven
//! `SQLiteCheckpointer` pattern: a pooled connection, `sqlx::migrate!` run
//! once at `connect()`, and row-level lifecycle transitions serialized by a
//! `BEGIN IMMEDIATE` transaction scoped to the document row.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqlitePoolOptions, Row, SqlitePool};
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("document not found: {0}")]
    DocumentNotFound(String),
    #[error("document {0} state is {1:?}, expected {2:?}")]
    UnexpectedState(String, DocumentState, DocumentState),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentState {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl DocumentState {
    fn as_str(&self) -> &'static str {
        match self {
            DocumentState::Pending => "pending",
            DocumentState::Processing => "processing",
            DocumentState::Completed => "completed",
            DocumentState::Failed => "failed",
        }
    }
}

impl FromStr for DocumentState {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "pending" => DocumentState::Pending,
            "processing" => DocumentState::Processing,
            "completed" => DocumentState::Completed,
            "failed" => DocumentState::Failed,
            other => return Err(StoreError::Sqlx(sqlx::Error::Decode(
                format!("unknown document state: {other}").into(),
            ))),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub owner_id: String,
    pub original_filename: String,
    pub stored_path: String,
    pub byte_size: i64,
    pub mime: String,
    pub state: DocumentState,
    pub job_id: String,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: i64,
    pub page_number: Option<i64>,
    pub content: String,
    pub token_count: i64,
    pub embedding_present: bool,
    pub embedding_model: Option<String>,
    /// Stable i64 identifier this chunk is addressed by in the vector index
    /// (which requires a fixed-width key). Derived once at insertion from a
    /// hash of `id`, never recomputed.
    pub vector_id: i64,
}

/// Deterministic i64 derived from a chunk's UUID, masked non-negative so it
/// never collides with the vector index's tombstone sentinel (-1).
fn derive_vector_id(chunk_id: &str) -> i64 {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(chunk_id.as_bytes());
    let bytes: [u8; 8] = digest[0..8].try_into().expect("sha256 digest is 32 bytes");
    (i64::from_le_bytes(bytes)) & 0x7fff_ffff_ffff_ffff
}

#[derive(Debug, Clone)]
pub struct NewChunk {
    pub document_id: String,
    pub chunk_index: usize,
    pub page_number: Option<u32>,
    pub content: String,
    pub token_count: usize,
}

pub struct PrimaryStore {
    pool: SqlitePool,
}

impl PrimaryStore {
    pub async fn connect(path: &str) -> Result<Self> {
        let url = format!("sqlite://{path}?mode=rwc");
        let pool = SqlitePoolOptions::new().max_connections(8).connect(&url).await?;
        sqlx::migrate!("./migrations").run(&pool).await.map_err(|e| {
            StoreError::Sqlx(sqlx::Error::Configuration(e.to_string().into()))
        })?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Inserts a new Document in `pending` state.
    pub async fn create_document(
        &self,
        owner_id: &str,
        original_filename: &str,
        stored_path: &str,
        byte_size: i64,
        mime: &str,
        job_id: &str,
    ) -> Result<Document> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO documents (id, owner_id, original_filename, stored_path, byte_size, mime, state, job_id, error_message, created_at, processed_at) \
             VALUES (?, ?, ?, ?, ?, ?, 'pending', ?, NULL, ?, NULL)",
        )
        .bind(&id)
        .bind(owner_id)
        .bind(original_filename)
        .bind(stored_path)
        .bind(byte_size)
        .bind(mime)
        .bind(job_id)
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;

        self.get_document(&id).await
    }

    pub async fn get_document(&self, id: &str) -> Result<Document> {
        let row = sqlx::query("SELECT * FROM documents WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::DocumentNotFound(id.to_string()))?;
        Self::row_to_document(&row)
    }

    /// Documents left in `pending` (never picked up) or `processing` (worker
    /// died mid-job) state, oldest first. Used at startup to re-feed the
    /// ingestion queue after a crash. A `processing` row is reset back to
    /// `pending` first (see `reset_interrupted_processing`) and re-queued
    /// under its own original `job_id`, which is what `begin_processing`'s
    /// job-id check requires it to match.
    pub async fn list_pending_documents(&self) -> Result<Vec<Document>> {
        let rows = sqlx::query(
            "SELECT * FROM documents WHERE state IN ('pending', 'processing') ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_document).collect()
    }

    fn row_to_document(row: &sqlx::sqlite::SqliteRow) -> Result<Document> {
        let state: String = row.try_get("state")?;
        let created_at: String = row.try_get("created_at")?;
        let processed_at: Option<String> = row.try_get("processed_at")?;
        Ok(Document {
            id: row.try_get("id")?,
            owner_id: row.try_get("owner_id")?,
            original_filename: row.try_get("original_filename")?,
            stored_path: row.try_get("stored_path")?,
            byte_size: row.try_get("byte_size")?,
            mime: row.try_get("mime")?,
            state: DocumentState::from_str(&state)?,
            job_id: row.try_get("job_id")?,
            error_message: row.try_get("error_message")?,
            created_at: DateTime::parse_from_rfc3339(&created_at)
                .map(|d| d.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
            processed_at: processed_at.and_then(|s| {
                DateTime::parse_from_rfc3339(&s).ok().map(|d| d.with_timezone(&Utc))
            }),
        })
    }

    /// Transitions a Document from `pending` to `processing`. Fails (no-op at
    /// the ingestion-worker call site) if the document isn't in `pending` or
    /// the job id doesn't match — the worker contract's step 1.
    pub async fn begin_processing(&self, document_id: &str, job_id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query("SELECT state, job_id FROM documents WHERE id = ?")
            .bind(document_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| StoreError::DocumentNotFound(document_id.to_string()))?;

        let state: String = row.try_get("state")?;
        let stored_job_id: String = row.try_get("job_id")?;
        if state != "pending" || stored_job_id != job_id {
            return Ok(false);
        }

        sqlx::query("UPDATE documents SET state = 'processing' WHERE id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(true)
    }

    pub async fn complete_document(&self, document_id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE documents SET state = 'completed', processed_at = ? WHERE id = ?",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(document_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn fail_document(&self, document_id: &str, error_message: &str) -> Result<()> {
        sqlx::query(
            "UPDATE documents SET state = 'failed', error_message = ?, processed_at = ? WHERE id = ?",
        )
        .bind(error_message)
        .bind(Utc::now().to_rfc3339())
        .bind(document_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Resets a `failed` Document back to `pending`, reusing its id (decided
    /// in the design ledger). Clears its chunks first; the caller is
    /// responsible for removing the corresponding vector-index sidecar
    /// entries before or after this call.
    pub async fn resubmit_document(&self, document_id: &str) -> Result<Vec<Chunk>> {
        let doc = self.get_document(document_id).await?;
        if !matches!(doc.state, DocumentState::Failed) {
            return Err(StoreError::UnexpectedState(
                document_id.to_string(),
                doc.state,
                DocumentState::Failed,
            ));
        }
        self.reset_to_pending(document_id).await
    }

    /// Resets a Document stuck in `processing` (worker crashed mid-job) back
    /// to `pending` so it can be re-queued at startup. Same clear-and-reset
    /// body as `resubmit_document` — a document interrupted mid-ingestion has
    /// no way to resume partway through steps 3-10, so it starts over exactly
    /// like a failed one would.
    pub async fn reset_interrupted_processing(&self, document_id: &str) -> Result<Vec<Chunk>> {
        let doc = self.get_document(document_id).await?;
        if !matches!(doc.state, DocumentState::Processing) {
            return Err(StoreError::UnexpectedState(
                document_id.to_string(),
                doc.state,
                DocumentState::Processing,
            ));
        }
        self.reset_to_pending(document_id).await
    }

    async fn reset_to_pending(&self, document_id: &str) -> Result<Vec<Chunk>> {
        let chunks = self.list_chunks(document_id).await?;
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE documents SET state = 'pending', error_message = NULL WHERE id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(chunks)
    }

    /// Deletes every chunk row belonging to `document_id` and returns what was
    /// deleted (each carrying its `vector_id`), without touching the
    /// document's own state — the caller decides what state the document
    /// lands in. Used by ingestion's rollback of a job that failed after
    /// partially persisting chunks.
    pub async fn clear_chunks(&self, document_id: &str) -> Result<Vec<Chunk>> {
        let chunks = self.list_chunks(document_id).await?;
        sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(document_id)
            .execute(&self.pool)
            .await?;
        Ok(chunks)
    }

    pub async fn delete_document(&self, document_id: &str) -> Result<Vec<Chunk>> {
        let chunks = self.list_chunks(document_id).await?;
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(chunks)
    }

    /// Inserts all chunks for a document in order, with `embedding_present = false`.
    pub async fn insert_chunks(&self, chunks: &[NewChunk]) -> Result<Vec<Chunk>> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = Vec::with_capacity(chunks.len());
        for c in chunks {
            let id = Uuid::new_v4().to_string();
            let vector_id = derive_vector_id(&id);
            sqlx::query(
                "INSERT INTO chunks (id, document_id, chunk_index, page_number, content, token_count, embedding_present, embedding_model, vector_id) \
                 VALUES (?, ?, ?, ?, ?, ?, 0, NULL, ?)",
            )
            .bind(&id)
            .bind(&c.document_id)
            .bind(c.chunk_index as i64)
            .bind(c.page_number.map(|p| p as i64))
            .bind(&c.content)
            .bind(c.token_count as i64)
            .bind(vector_id)
            .execute(&mut *tx)
            .await?;
            inserted.push(Chunk {
                id,
                document_id: c.document_id.clone(),
                chunk_index: c.chunk_index as i64,
                page_number: c.page_number.map(|p| p as i64),
                content: c.content.clone(),
                token_count: c.token_count as i64,
                embedding_present: false,
                embedding_model: None,
                vector_id,
            });
        }
        tx.commit().await?;
        Ok(inserted)
    }

    pub async fn mark_embedded(&self, chunk_id: &str, model: &str) -> Result<()> {
        sqlx::query("UPDATE chunks SET embedding_present = 1, embedding_model = ? WHERE id = ?")
            .bind(model)
            .bind(chunk_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn list_chunks(&self, document_id: &str) -> Result<Vec<Chunk>> {
        let rows = sqlx::query("SELECT * FROM chunks WHERE document_id = ? ORDER BY chunk_index ASC")
            .bind(document_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_chunk).collect()
    }

    fn row_to_chunk(row: &sqlx::sqlite::SqliteRow) -> Result<Chunk> {
        let embedding_present: i64 = row.try_get("embedding_present")?;
        Ok(Chunk {
            id: row.try_get("id")?,
            document_id: row.try_get("document_id")?,
            chunk_index: row.try_get("chunk_index")?,
            page_number: row.try_get("page_number")?,
            content: row.try_get("content")?,
            token_count: row.try_get("token_count")?,
            embedding_present: embedding_present != 0,
            embedding_model: row.try_get("embedding_model")?,
            vector_id: row.try_get("vector_id")?,
        })
    }

    /// Resolves raw chunk ids against `owner_id`, returning only the chunks
    /// that belong to that owner (the post-hoc ownership filter used by the
    /// hybrid searcher for the lexical branch's results; see DESIGN.md).
    pub async fn chunks_owned_by(&self, chunk_ids: &[String], owner_id: &str) -> Result<Vec<Chunk>> {
        if chunk_ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = chunk_ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!(
            "SELECT c.* FROM chunks c JOIN documents d ON d.id = c.document_id \
             WHERE c.id IN ({placeholders}) AND d.owner_id = ?"
        );
        let mut query = sqlx::query(&sql);
        for id in chunk_ids {
            query = query.bind(id);
        }
        query = query.bind(owner_id);
        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_chunk).collect()
    }

    /// Same ownership filter as `chunks_owned_by`, keyed by the vector
    /// index's i64 ids instead of chunk UUIDs (the vector branch's result
    /// shape).
    pub async fn chunks_owned_by_vector_ids(
        &self,
        vector_ids: &[i64],
        owner_id: &str,
    ) -> Result<Vec<Chunk>> {
        if vector_ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vector_ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!(
            "SELECT c.* FROM chunks c JOIN documents d ON d.id = c.document_id \
             WHERE c.vector_id IN ({placeholders}) AND d.owner_id = ?"
        );
        let mut query = sqlx::query(&sql);
        for id in vector_ids {
            query = query.bind(id);
        }
        query = query.bind(owner_id);
        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_chunk).collect()
    }

    pub async fn get_chunk(&self, chunk_id: &str) -> Result<Option<Chunk>> {
        let row = sqlx::query("SELECT * FROM chunks WHERE id = ?")
            .bind(chunk_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_chunk).transpose()
    }

    pub async fn insert_query_log(
        &self,
        user_id: &str,
        query_text: &str,
        requested_k: i64,
        returned_count: i64,
        result_metadata: Option<&str>,
        elapsed_ms: i64,
    ) -> Result<String> {
        let query_id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO query_logs (query_id, user_id, query_text, requested_k, returned_count, result_metadata, elapsed_ms, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&query_id)
        .bind(user_id)
        .bind(query_text)
        .bind(requested_k)
        .bind(returned_count)
        .bind(result_metadata)
        .bind(elapsed_ms)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(query_id)
    }
}

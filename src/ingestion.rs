//! Ingestion worker: consumes document ids off a queue and drives each
//! through extractor -> chunker -> embedding client -> persistent stores,
//! advancing lifecycle state as it goes.
//!
//! Grounded on `EmbeddingManager::index_workspace_vectors`'s per-scope CAS
//! guard with RAII reset, generalized from one guard per workspace to one
//! per document, and on its `writer_lock`-style serialization of the shared
//! on-disk index around the save step.

use crate::cache::Cache;
use crate::chunker::Chunker;
use crate::config::AppConfig;
use crate::extractors::ExtractorRegistry;
use crate::lexical_index::LexicalIndex;
use crate::providers::Embedder;
use crate::store::{NewChunk, PrimaryStore};
use crate::vector_index::VectorIndex;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct IngestionJob {
    pub document_id: String,
    pub job_id: String,
}

pub struct IngestionWorker {
    store: Arc<PrimaryStore>,
    extractors: Arc<ExtractorRegistry>,
    chunker: Arc<Chunker>,
    embedder: Arc<dyn Embedder>,
    vector_index: Arc<VectorIndex>,
    lexical_index: Arc<LexicalIndex>,
    query_cache: Arc<Cache<String, Vec<u8>>>,
    config: AppConfig,
    /// Serializes step 8 (vector index + sidecar persistence) across workers
    /// on this host — the same discipline `IndexManager::writer_lock` applies
    /// to Tantivy commits.
    writer_lock: Mutex<()>,
    in_progress: DashMap<String, Arc<AtomicBool>>,
}

struct ProcessingGuard(Arc<AtomicBool>);
impl Drop for ProcessingGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl IngestionWorker {
    pub fn new(
        store: Arc<PrimaryStore>,
        extractors: Arc<ExtractorRegistry>,
        chunker: Arc<Chunker>,
        embedder: Arc<dyn Embedder>,
        vector_index: Arc<VectorIndex>,
        lexical_index: Arc<LexicalIndex>,
        query_cache: Arc<Cache<String, Vec<u8>>>,
        config: AppConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            extractors,
            chunker,
            embedder,
            vector_index,
            lexical_index,
            query_cache,
            config,
            writer_lock: Mutex::new(()),
            in_progress: DashMap::new(),
        })
    }

    /// Spawns `pool_size` tasks draining `receiver`, sharing this worker's
    /// state. Returns once all tasks have been spawned; the tasks themselves
    /// run until `receiver` is closed.
    pub fn spawn_pool(
        self: &Arc<Self>,
        receiver: mpsc::Receiver<IngestionJob>,
        pool_size: usize,
    ) -> Vec<tokio::task::JoinHandle<()>> {
        let receiver = Arc::new(Mutex::new(receiver));
        (0..pool_size.max(1))
            .map(|worker_index| {
                let worker = Arc::clone(self);
                let receiver = Arc::clone(&receiver);
                tokio::spawn(async move {
                    loop {
                        let job = {
                            let mut rx = receiver.lock().await;
                            rx.recv().await
                        };
                        let Some(job) = job else {
                            break;
                        };
                        info!(worker = worker_index, document_id = %job.document_id, "processing ingestion job");
                        if let Err(e) = worker.process(&job).await {
                            error!(document_id = %job.document_id, error = %e, "ingestion job failed");
                        }
                    }
                })
            })
            .collect()
    }

    /// Runs the full per-job contract (SPEC_FULL §4.2, steps 1-10). Returns
    /// `Ok(())` both when the job succeeds and when it is a legitimate no-op
    /// (step 1/guard reject); failures that transitioned the Document to
    /// `failed` are also `Ok(())` since the failure was recorded, not thrown.
    pub async fn process(&self, job: &IngestionJob) -> anyhow::Result<()> {
        let guard_flag = self
            .in_progress
            .entry(job.document_id.clone())
            .or_insert_with(|| Arc::new(AtomicBool::new(false)))
            .value()
            .clone();

        if guard_flag
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!(document_id = %job.document_id, "ingestion already in progress, skipping duplicate job");
            return Ok(());
        }
        let _reset = ProcessingGuard(guard_flag);

        match self.process_inner(job).await {
            Ok(()) => Ok(()),
            Err(e) => {
                if let Err(rollback_err) = self.rollback_partial_ingestion(&job.document_id).await {
                    warn!(
                        document_id = %job.document_id,
                        error = %rollback_err,
                        "failed to roll back partially ingested chunks/vectors after job failure"
                    );
                }
                self.store
                    .fail_document(&job.document_id, &e.to_string())
                    .await?;
                Ok(())
            }
        }
    }

    /// Clears whatever `process_inner` managed to write before failing —
    /// chunk rows, vector-index entries, lexical-index entries — so a failed
    /// job never leaves partial state for a later save/commit to flush as if
    /// it belonged to a completed document. Mirrors the cleanup
    /// `AppState::recover_interrupted_ingestion` runs for a crash-interrupted
    /// job, applied here to an in-process failure instead. A no-op if
    /// nothing was persisted yet (e.g. the job failed at extraction).
    async fn rollback_partial_ingestion(&self, document_id: &str) -> anyhow::Result<()> {
        let chunks = self.store.clear_chunks(document_id).await?;
        if chunks.is_empty() {
            return Ok(());
        }

        let vector_ids: Vec<i64> = chunks.iter().map(|c| c.vector_id).collect();
        self.vector_index.remove(&vector_ids);
        {
            let _writer_guard = self.writer_lock.lock().await;
            self.vector_index.save()?;
        }

        self.lexical_index.remove_document(document_id).await?;
        self.lexical_index.commit().await?;

        Ok(())
    }

    async fn process_inner(&self, job: &IngestionJob) -> anyhow::Result<()> {
        // Step 1-2: claim the document for processing.
        let began = self
            .store
            .begin_processing(&job.document_id, &job.job_id)
            .await?;
        if !began {
            return Ok(());
        }

        let document = self.store.get_document(&job.document_id).await?;

        // Step 3: extract.
        let segments = self
            .extractors
            .extract(&document.mime, std::path::Path::new(&document.stored_path))
            .map_err(|e| anyhow::anyhow!("extraction failed: {e}"))?;

        // Step 4: chunk.
        let chunked = self
            .chunker
            .chunk(&segments)
            .map_err(|e| anyhow::anyhow!("chunking failed: {e}"))?;

        // Step 5: persist chunks with embedding_present = false.
        let new_chunks: Vec<NewChunk> = chunked
            .iter()
            .map(|c| NewChunk {
                document_id: document.id.clone(),
                chunk_index: c.index,
                page_number: c.page_number,
                content: c.text.clone(),
                token_count: c.token_count,
            })
            .collect();
        let persisted = self.store.insert_chunks(&new_chunks).await?;

        // Step 6: batch-embed.
        let batch_size = self.config.embedding_batch_size.max(1);
        let mut vectors = Vec::with_capacity(persisted.len());
        for batch in persisted.chunks(batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();
            let embedded = self
                .embedder
                .embed(&texts)
                .await
                .map_err(|e| anyhow::anyhow!("embedding failed: {e}"))?;
            vectors.extend(embedded);
        }
        if vectors.len() != persisted.len() {
            anyhow::bail!(
                "embedding provider returned {} vectors for {} chunks",
                vectors.len(),
                persisted.len()
            );
        }

        // Step 7: append to the vector index under the external vector ids,
        // index into the lexical index, then flag each chunk embedded.
        let vector_ids: Vec<i64> = persisted.iter().map(|c| c.vector_id).collect();
        self.vector_index.append(&vectors, &vector_ids)?;

        for chunk in &persisted {
            self.lexical_index
                .index_chunk(
                    &chunk.id,
                    &chunk.document_id,
                    &document.owner_id,
                    chunk.chunk_index,
                    chunk.page_number,
                    &chunk.content,
                )
                .await?;
            self.store
                .mark_embedded(&chunk.id, self.embedder.model())
                .await?;
        }
        self.lexical_index.commit().await?;

        // Step 8: persist the vector index atomically, serialized across workers.
        {
            let _writer_guard = self.writer_lock.lock().await;
            self.vector_index.save()?;
        }

        // Step 9: invalidate the owner's cached query results.
        let owner_prefix = format!("{}:", document.owner_id);
        self.query_cache.retain(|key| !key.starts_with(&owner_prefix));

        // Step 10: mark complete.
        self.store.complete_document(&document.id).await?;

        Ok(())
    }
}

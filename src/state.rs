//! Composition root: builds every long-lived component exactly once and
//! wires them together by explicit handle, then hands the whole graph to
//! `main.rs`/`server.rs` as a single `Clone`-able `AppState`.
//!
//! Grounded on the teacher's own `AppState::new`, which already followed
//! this shape for its workspace/index/embedding managers — generalized here
//! to the document-intelligence component set named in SPEC_FULL §2.

use crate::cache::Cache;
use crate::chunker::{Chunker, ChunkerConfig};
use crate::config::{AppConfig, ProviderConfig};
use crate::error::{AppError, AppResult};
use crate::extractors::ExtractorRegistry;
use crate::ingestion::{IngestionJob, IngestionWorker};
use crate::lexical_index::LexicalIndex;
use crate::providers::{Embedder, Generator, HttpEmbedder, HttpGenerator};
use crate::rag::RagOrchestrator;
use crate::search::HybridSearcher;
use crate::store::PrimaryStore;
use crate::vector_index::VectorIndex;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// The scope name the single corpus-wide vector index is rooted under.
/// Ownership isolation is enforced post-hoc by `HybridSearcher`, not by the
/// index itself (see Open Question decision 3) — there is exactly one
/// vector index file pair for the whole deployment.
const VECTOR_INDEX_SCOPE: &str = "corpus";

/// Depth of the ingestion job queue. Sized independently of worker pool
/// size — it's a buffer against submission bursts, not a concurrency knob.
const INGESTION_QUEUE_CAPACITY: usize = 1024;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<PrimaryStore>,
    pub vector_index: Arc<VectorIndex>,
    pub lexical_index: Arc<LexicalIndex>,
    pub searcher: Arc<HybridSearcher>,
    pub rag: Arc<RagOrchestrator>,
    pub ingestion_tx: mpsc::Sender<IngestionJob>,
    /// Process start time, for the health check's `uptime` field. Lives here
    /// rather than behind a module-level singleton, same as every other
    /// piece of long-lived state this composition root owns.
    pub started_at: Instant,
}

impl AppState {
    pub async fn new(config: AppConfig) -> AppResult<Self> {
        let data_dir = std::path::PathBuf::from(&config.data_dir);
        tokio::fs::create_dir_all(&data_dir)
            .await
            .map_err(AppError::Io)?;

        let store = Arc::new(
            PrimaryStore::connect(&config.primary_store_path)
                .await
                .map_err(|e| AppError::StoreUnavailable(e.to_string()))?,
        );

        let vector_index = Arc::new(
            VectorIndex::open(
                std::path::Path::new(&config.vector_index_path),
                VECTOR_INDEX_SCOPE,
                config.embedding_dim,
            )
            .map_err(|e| AppError::Internal(e.into()))?,
        );

        let lexical_index = Arc::new(
            LexicalIndex::open_or_create(&data_dir.join("lexical"))
                .map_err(|e| AppError::Internal(e.into()))?,
        );

        let chunker = Arc::new(
            Chunker::new(ChunkerConfig {
                chunk_size: config.chunk_size,
                chunk_overlap: config.chunk_overlap,
                min_chunk_size: config.min_chunk_size,
            })
            .map_err(AppError::Internal)?,
        );

        let extractors = Arc::new(ExtractorRegistry::default());

        let embedding_provider = ProviderConfig::from_env(
            "embedding",
            "https://api.openai.com/v1",
            &config.embedding_model,
            config.embedding_request_timeout,
        );
        let embedder: Arc<dyn Embedder> =
            Arc::new(HttpEmbedder::new(embedding_provider, config.embedding_dim));

        let generation_provider = ProviderConfig::from_env(
            "generation",
            "https://api.openai.com/v1",
            &config.generation_model_default,
            config.llm_request_timeout,
        );
        let generator: Arc<dyn Generator> = Arc::new(HttpGenerator::new(generation_provider));

        let embedding_cache: Arc<Cache<String, Vec<f32>>> =
            Arc::new(Cache::new(config.embedding_cache_max_entries));
        let query_cache: Arc<Cache<String, Vec<u8>>> =
            Arc::new(Cache::new(config.query_cache_max_entries));

        let searcher = Arc::new(HybridSearcher::new(
            Arc::clone(&vector_index),
            Arc::clone(&lexical_index),
            Arc::clone(&store),
            Arc::clone(&embedder),
            Arc::clone(&embedding_cache),
            Arc::clone(&query_cache),
            config.clone(),
        ));

        let rag = Arc::new(RagOrchestrator::new(
            Arc::clone(&searcher),
            Arc::clone(&generator),
            Arc::clone(&store),
            Arc::clone(&chunker),
        ));

        let (ingestion_tx, ingestion_rx) = mpsc::channel(INGESTION_QUEUE_CAPACITY);

        let ingestion_worker = IngestionWorker::new(
            Arc::clone(&store),
            extractors,
            chunker,
            embedder,
            Arc::clone(&vector_index),
            Arc::clone(&lexical_index),
            query_cache,
            config.clone(),
        );
        let _worker_handles = ingestion_worker.spawn_pool(ingestion_rx, config.ingestion_worker_pool_size);

        let state = Self {
            config,
            store,
            vector_index,
            lexical_index,
            searcher,
            rag,
            ingestion_tx,
            started_at: Instant::now(),
        };

        state.recover_interrupted_ingestion().await?;

        Ok(state)
    }

    /// Re-feeds any Document left in `pending` or `processing` state from a
    /// prior run — the latter meaning a worker crashed mid-job. A
    /// `processing` row is first reset to `pending` (no partial resume;
    /// ingestion starts the document over) before being queued.
    async fn recover_interrupted_ingestion(&self) -> AppResult<()> {
        let pending = self
            .store
            .list_pending_documents()
            .await
            .map_err(|e| AppError::StoreUnavailable(e.to_string()))?;

        if pending.is_empty() {
            return Ok(());
        }
        info!(count = pending.len(), "recovering interrupted ingestion jobs");

        let mut stale_vector_ids = Vec::new();
        let mut touched_documents = false;

        for document in &pending {
            if matches!(document.state, crate::store::DocumentState::Processing) {
                let cleared = match self.store.reset_interrupted_processing(&document.id).await {
                    Ok(chunks) => chunks,
                    Err(e) => {
                        warn!(document_id = %document.id, error = %e, "failed to reset interrupted document");
                        continue;
                    }
                };
                if !cleared.is_empty() {
                    stale_vector_ids.extend(cleared.iter().map(|c| c.vector_id));
                    if let Err(e) = self.lexical_index.remove_document(&document.id).await {
                        warn!(document_id = %document.id, error = %e, "failed to clear stale lexical entries");
                    }
                    touched_documents = true;
                }
            }
        }

        if !stale_vector_ids.is_empty() {
            self.vector_index.remove(&stale_vector_ids);
            self.vector_index.save().map_err(|e| AppError::Internal(e.into()))?;
        }
        if touched_documents {
            self.lexical_index
                .commit()
                .await
                .map_err(|e| AppError::Internal(e.into()))?;
        }

        for document in pending {
            let job = IngestionJob { document_id: document.id.clone(), job_id: document.job_id.clone() };
            if self.ingestion_tx.send(job).await.is_err() {
                warn!(document_id = %document.id, "ingestion queue closed during recovery");
                break;
            }
        }
        Ok(())
    }
}

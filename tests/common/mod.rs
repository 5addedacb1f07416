//! Shared composition root for integration tests: the same wiring
//! `AppState::new` does in `src/state.rs`, built against a tempdir and the
//! `test-support`-gated stub providers instead of real network calls.

use docintel_core::cache::Cache;
use docintel_core::chunker::{Chunker, ChunkerConfig};
use docintel_core::config::AppConfig;
use docintel_core::extractors::ExtractorRegistry;
use docintel_core::ingestion::{IngestionJob, IngestionWorker};
use docintel_core::lexical_index::LexicalIndex;
use docintel_core::providers::{Embedder, Generator, StubEmbedder, StubGenerator};
use docintel_core::rag::RagOrchestrator;
use docintel_core::search::HybridSearcher;
use docintel_core::store::{Document, PrimaryStore};
use docintel_core::vector_index::VectorIndex;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub const EMBEDDING_DIM: usize = 16;
pub const VECTOR_SCOPE: &str = "corpus";

pub struct Harness {
    pub dir: TempDir,
    pub store: Arc<PrimaryStore>,
    pub vector_index: Arc<VectorIndex>,
    pub lexical_index: Arc<LexicalIndex>,
    pub searcher: Arc<HybridSearcher>,
    pub rag: Arc<RagOrchestrator>,
    pub worker: Arc<IngestionWorker>,
    pub query_cache: Arc<Cache<String, Vec<u8>>>,
    pub config: AppConfig,
}

impl Harness {
    /// Builds a full component graph with a `StubGenerator` that always
    /// answers with `answer_text`, regardless of what was retrieved.
    pub async fn new(answer_text: &str) -> Self {
        Self::with_embedder(answer_text, Arc::new(StubEmbedder::new(EMBEDDING_DIM))).await
    }

    /// Same component graph as `new`, with the embedder swapped out — used to
    /// force a failure partway through ingestion (e.g. `FailingEmbedder`) to
    /// exercise the rollback path.
    pub async fn with_embedder(answer_text: &str, embedder: Arc<dyn Embedder>) -> Self {
        let dir = TempDir::new().expect("tempdir");
        let config = test_config(&dir);

        let store = Arc::new(
            PrimaryStore::connect(&config.primary_store_path)
                .await
                .expect("connect primary store"),
        );
        let vector_index = Arc::new(
            VectorIndex::open(Path::new(&config.vector_index_path), VECTOR_SCOPE, EMBEDDING_DIM)
                .expect("open vector index"),
        );
        let lexical_index = Arc::new(
            LexicalIndex::open_or_create(&dir.path().join("lexical")).expect("open lexical index"),
        );
        let chunker = Arc::new(
            Chunker::new(ChunkerConfig {
                chunk_size: config.chunk_size,
                chunk_overlap: config.chunk_overlap,
                min_chunk_size: config.min_chunk_size,
            })
            .expect("build chunker"),
        );
        let extractors = Arc::new(ExtractorRegistry::default());
        let generator: Arc<dyn Generator> = Arc::new(StubGenerator::from_text(answer_text));

        let embedding_cache = Arc::new(Cache::new(config.embedding_cache_max_entries));
        let query_cache = Arc::new(Cache::new(config.query_cache_max_entries));

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

        let worker = IngestionWorker::new(
            Arc::clone(&store),
            extractors,
            chunker,
            embedder,
            Arc::clone(&vector_index),
            Arc::clone(&lexical_index),
            Arc::clone(&query_cache),
            config.clone(),
        );

        Self {
            dir,
            store,
            vector_index,
            lexical_index,
            searcher,
            rag,
            worker,
            query_cache,
            config,
        }
    }

    /// Writes `content` to a file under the tempdir, registers a `pending`
    /// Document for it, and runs it through the ingestion worker directly
    /// (bypassing the mpsc queue/pool, which integration tests have no need
    /// to exercise). Returns the Document row after ingestion completes.
    pub async fn ingest_text(&self, owner_id: &str, filename: &str, content: &str) -> Document {
        let path = self.dir.path().join(filename);
        tokio::fs::write(&path, content).await.expect("write source file");

        let job_id = uuid::Uuid::new_v4().to_string();
        let document = self
            .store
            .create_document(
                owner_id,
                filename,
                path.to_str().unwrap(),
                content.len() as i64,
                "text/plain",
                &job_id,
            )
            .await
            .expect("create document");

        self.worker
            .process(&IngestionJob { document_id: document.id.clone(), job_id })
            .await
            .expect("ingestion worker process");

        self.store.get_document(&document.id).await.expect("reload document")
    }

    /// Registers a Document under `mime` and runs it through the worker
    /// without ever writing bytes to `stored_path` — used by the
    /// failed-ingestion scenario, where extraction itself is what fails.
    pub async fn ingest_with_mime(&self, owner_id: &str, filename: &str, mime: &str) -> Document {
        let path = self.dir.path().join(filename);
        tokio::fs::write(&path, "irrelevant bytes").await.expect("write placeholder file");

        let job_id = uuid::Uuid::new_v4().to_string();
        let document = self
            .store
            .create_document(owner_id, filename, path.to_str().unwrap(), 16, mime, &job_id)
            .await
            .expect("create document");

        self.worker
            .process(&IngestionJob { document_id: document.id.clone(), job_id })
            .await
            .expect("ingestion worker process");

        self.store.get_document(&document.id).await.expect("reload document")
    }
}

fn test_config(dir: &TempDir) -> AppConfig {
    AppConfig {
        listen_addr: "127.0.0.1:0".to_string(),
        data_dir: dir.path().to_string_lossy().to_string(),
        primary_store_path: dir.path().join("docintel.sqlite3").to_string_lossy().to_string(),
        vector_index_path: dir.path().join("indexes").to_string_lossy().to_string(),
        ingestion_worker_pool_size: 1,

        chunk_size: 200,
        chunk_overlap: 20,
        min_chunk_size: 10,

        embedding_dim: EMBEDDING_DIM,
        embedding_batch_size: 16,
        embedding_model: "stub-embedder".to_string(),

        compaction_tombstone_ratio: 0.2,

        search_topk_default: 5,
        search_branch_multiplier: 4,
        search_branch_cap: 100,
        rrf_constant: 60,

        query_cache_ttl: Duration::from_secs(3600),
        query_cache_max_entries: 1000,
        embedding_cache_ttl: Duration::from_secs(3600),
        embedding_cache_max_entries: 1000,

        generation_model_default: "stub-model".to_string(),
        generation_temperature_default: 0.3,
        generation_max_tokens_default: 1000,

        llm_request_timeout: Duration::from_secs(30),
        embedding_request_timeout: Duration::from_secs(30),
        extractor_timeout: Duration::from_secs(30),
    }
}

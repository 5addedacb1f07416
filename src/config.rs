use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Maximum allowed length for a retrieval/RAG query (characters).
pub const MAX_QUERY_LENGTH: usize = 1000;

fn env_var<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_duration_secs(name: &str, default_secs: u64) -> Duration {
    Duration::from_secs(env_var(name, default_secs))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub listen_addr: String,
    pub data_dir: String,
    pub primary_store_path: String,
    pub vector_index_path: String,
    pub ingestion_worker_pool_size: usize,

    // Chunker
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub min_chunk_size: usize,

    // Embedding
    pub embedding_dim: usize,
    pub embedding_batch_size: usize,
    pub embedding_model: String,

    // Vector index
    pub compaction_tombstone_ratio: f32,

    // Hybrid search
    pub search_topk_default: usize,
    pub search_branch_multiplier: usize,
    pub search_branch_cap: usize,
    pub rrf_constant: u32,

    // Cache
    #[serde(with = "duration_secs")]
    pub query_cache_ttl: Duration,
    pub query_cache_max_entries: usize,
    #[serde(with = "duration_secs")]
    pub embedding_cache_ttl: Duration,
    pub embedding_cache_max_entries: usize,

    // Generation
    pub generation_model_default: String,
    pub generation_temperature_default: f32,
    pub generation_max_tokens_default: usize,

    // Timeouts
    #[serde(with = "duration_secs")]
    pub llm_request_timeout: Duration,
    #[serde(with = "duration_secs")]
    pub embedding_request_timeout: Duration,
    #[serde(with = "duration_secs")]
    pub extractor_timeout: Duration,
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let port: u16 = env_var("DOCINTEL_PORT", 9721);

        let data_dir = std::env::var("DOCINTEL_DATA_DIR").unwrap_or_else(|_| {
            dirs::data_local_dir()
                .map(|d| d.join("docintel").to_string_lossy().to_string())
                .unwrap_or_else(|| ".docintel-data".to_string())
        });

        let primary_store_path = std::env::var("DOCINTEL_STORE_PATH")
            .unwrap_or_else(|_| format!("{data_dir}/docintel.sqlite3"));
        let vector_index_path = std::env::var("DOCINTEL_VECTOR_INDEX_PATH")
            .unwrap_or_else(|_| format!("{data_dir}/indexes"));

        Self {
            listen_addr: format!("127.0.0.1:{port}"),
            data_dir,
            primary_store_path,
            vector_index_path,
            ingestion_worker_pool_size: env_var("DOCINTEL_INGESTION_WORKERS", 4),

            chunk_size: env_var("DOCINTEL_CHUNK_SIZE", 512),
            chunk_overlap: env_var("DOCINTEL_CHUNK_OVERLAP", 50),
            min_chunk_size: env_var("DOCINTEL_MIN_CHUNK_SIZE", 100),

            embedding_dim: env_var("DOCINTEL_EMBEDDING_DIM", 1536),
            embedding_batch_size: env_var("DOCINTEL_EMBEDDING_BATCH_SIZE", 100),
            embedding_model: std::env::var("DOCINTEL_EMBEDDING_MODEL")
                .unwrap_or_else(|_| "text-embedding-3-small".to_string()),

            compaction_tombstone_ratio: env_var("DOCINTEL_COMPACTION_TOMBSTONE_RATIO", 0.2),

            search_topk_default: env_var("DOCINTEL_SEARCH_TOPK_DEFAULT", 5),
            search_branch_multiplier: env_var("DOCINTEL_SEARCH_BRANCH_MULTIPLIER", 4),
            search_branch_cap: env_var("DOCINTEL_SEARCH_BRANCH_CAP", 100),
            rrf_constant: env_var("DOCINTEL_RRF_CONSTANT", 60),

            query_cache_ttl: env_duration_secs("DOCINTEL_QUERY_CACHE_TTL_SECS", 3600),
            query_cache_max_entries: env_var("DOCINTEL_QUERY_CACHE_MAX_ENTRIES", 10_000),
            embedding_cache_ttl: env_duration_secs("DOCINTEL_EMBEDDING_CACHE_TTL_SECS", 86400),
            embedding_cache_max_entries: env_var("DOCINTEL_EMBEDDING_CACHE_MAX_ENTRIES", 50_000),

            generation_model_default: std::env::var("DOCINTEL_GENERATION_MODEL_DEFAULT")
                .unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            generation_temperature_default: env_var("DOCINTEL_GENERATION_TEMPERATURE_DEFAULT", 0.3),
            generation_max_tokens_default: env_var("DOCINTEL_GENERATION_MAX_TOKENS_DEFAULT", 1000),

            llm_request_timeout: env_duration_secs("DOCINTEL_LLM_REQUEST_TIMEOUT_SECS", 60),
            embedding_request_timeout: env_duration_secs(
                "DOCINTEL_EMBEDDING_REQUEST_TIMEOUT_SECS",
                30,
            ),
            extractor_timeout: env_duration_secs("DOCINTEL_EXTRACTOR_TIMEOUT_SECS", 120),
        }
    }
}

/// Config for a single external model provider (embedding or generation),
/// read from `DOCINTEL_{NAME}_{FIELD}` env vars.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    pub endpoint: String,
    pub api_key: Option<String>,
    pub model: String,
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
}

impl ProviderConfig {
    pub fn from_env(name: &str, default_endpoint: &str, default_model: &str, timeout: Duration) -> Self {
        let prefix = format!("DOCINTEL_{}", name.to_uppercase());
        Self {
            name: name.to_string(),
            endpoint: std::env::var(format!("{prefix}_ENDPOINT"))
                .unwrap_or_else(|_| default_endpoint.to_string()),
            api_key: std::env::var(format!("{prefix}_API_KEY")).ok(),
            model: std::env::var(format!("{prefix}_MODEL"))
                .unwrap_or_else(|_| default_model.to_string()),
            timeout,
        }
    }
}

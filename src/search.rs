//! Hybrid retrieval: vector branch + lexical branch fused by reciprocal rank
//! fusion. Grounded on the parallel-fetch-then-fuse shape of a production
//! RAG engine's `search_single_query`, simplified to the exact RRF formula
//! this core commits to rather than that engine's richer scored variant.

use crate::cache::Cache;
use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::lexical_index::LexicalIndex;
use crate::providers::Embedder;
use crate::store::PrimaryStore;
use crate::vector_index::VectorIndex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    Vector,
    Lexical,
    Hybrid,
}

impl SearchMode {
    fn as_str(self) -> &'static str {
        match self {
            SearchMode::Vector => "vector",
            SearchMode::Lexical => "lexical",
            SearchMode::Hybrid => "hybrid",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub chunk_id: String,
    pub document_id: String,
    pub content: String,
    pub chunk_index: i64,
    pub page_number: Option<i64>,
    /// The RRF-fused score for `Hybrid` mode; the branch's own native score
    /// (L2 distance, lower is better) for `Vector` mode; BM25 (higher is
    /// better) for `Lexical` mode.
    pub score: f32,
    pub vector_rank: Option<usize>,
    pub lexical_rank: Option<usize>,
}

pub struct HybridSearcher {
    vector_index: Arc<VectorIndex>,
    lexical_index: Arc<LexicalIndex>,
    store: Arc<PrimaryStore>,
    embedder: Arc<dyn Embedder>,
    embedding_cache: Arc<Cache<String, Vec<f32>>>,
    query_cache: Arc<Cache<String, Vec<u8>>>,
    config: AppConfig,
}

impl HybridSearcher {
    pub fn new(
        vector_index: Arc<VectorIndex>,
        lexical_index: Arc<LexicalIndex>,
        store: Arc<PrimaryStore>,
        embedder: Arc<dyn Embedder>,
        embedding_cache: Arc<Cache<String, Vec<f32>>>,
        query_cache: Arc<Cache<String, Vec<u8>>>,
        config: AppConfig,
    ) -> Self {
        Self {
            vector_index,
            lexical_index,
            store,
            embedder,
            embedding_cache,
            query_cache,
            config,
        }
    }

    /// Prefixed with `owner_id:` so `IngestionWorker`'s per-owner
    /// `query_cache.retain(|k| !k.starts_with(prefix))` invalidates exactly
    /// this owner's cached result sets on new completed ingestion.
    fn query_cache_key(owner_id: &str, query: &str, mode: SearchMode, top_k: usize, alpha: f32) -> String {
        let digest = Sha256::digest(format!("{}:{top_k}:{alpha}:{query}", mode.as_str()).as_bytes());
        format!("{owner_id}:{digest:x}")
    }

    fn cache_key(text: &str) -> String {
        let digest = Sha256::digest(text.as_bytes());
        format!("{digest:x}")
    }

    async fn embed_query(&self, query: &str) -> AppResult<Vec<f32>> {
        let key = Self::cache_key(query);
        if let Some(cached) = self.embedding_cache.get(&key) {
            return Ok(cached);
        }
        let embeddings = self
            .embedder
            .embed(&[query.to_string()])
            .await
            .map_err(|e| AppError::EmbeddingUnavailable(e.to_string()))?;
        let vector = embeddings
            .into_iter()
            .next()
            .ok_or_else(|| AppError::EmbeddingUnavailable("empty embedding response".into()))?;
        self.embedding_cache.set(
            key,
            vector.clone(),
            Some(Duration::from_secs(self.config.embedding_cache_ttl.as_secs())),
        );
        Ok(vector)
    }

    /// Runs the requested branch(es), resolves each branch's hits to
    /// owner-scoped chunks via a single batched store lookup per branch, then
    /// combines them: `Hybrid` fuses both branches' ranks with RRF weighted
    /// by `alpha`, while `Vector`/`Lexical` skip fusion entirely and order by
    /// that branch's own native score (L2 distance ascending, BM25
    /// descending) with `alpha` unused. A single failing branch degrades to
    /// an empty result for that branch; both branches failing is
    /// `SearchUnavailable`. Reads through `query_cache`; a hit skips both
    /// branches entirely. `IngestionWorker` invalidates an owner's entries
    /// on every completed document, so a cached result set never outlives
    /// the index state it was computed against.
    pub async fn search(
        &self,
        query: &str,
        owner_id: &str,
        mode: SearchMode,
        top_k: usize,
        alpha: f32,
    ) -> AppResult<Vec<SearchResult>> {
        let cache_key = Self::query_cache_key(owner_id, query, mode, top_k, alpha);
        if let Some(bytes) = self.query_cache.get(&cache_key) {
            if let Ok(cached) = serde_json::from_slice::<Vec<SearchResult>>(&bytes) {
                return Ok(cached);
            }
        }

        let results = self.search_uncached(query, owner_id, mode, top_k, alpha).await?;

        if let Ok(bytes) = serde_json::to_vec(&results) {
            self.query_cache.set(
                cache_key,
                bytes,
                Some(Duration::from_secs(self.config.query_cache_ttl.as_secs())),
            );
        }
        Ok(results)
    }

    async fn search_uncached(
        &self,
        query: &str,
        owner_id: &str,
        mode: SearchMode,
        top_k: usize,
        alpha: f32,
    ) -> AppResult<Vec<SearchResult>> {
        let branch_k = (top_k * self.config.search_branch_multiplier)
            .min(self.config.search_branch_cap)
            .max(top_k);

        let want_vector = matches!(mode, SearchMode::Vector | SearchMode::Hybrid);
        let want_lexical = matches!(mode, SearchMode::Lexical | SearchMode::Hybrid);

        let vector_fut = async {
            if !want_vector {
                return Ok(Vec::new());
            }
            let qvec = self.embed_query(query).await.map_err(|e| e.to_string())?;
            self.vector_index.search(&qvec, branch_k).map_err(|e| e.to_string())
        };

        let lexical_fut = async {
            if !want_lexical {
                return Ok(Vec::new());
            }
            self.lexical_index.query(query, branch_k, owner_id).map_err(|e| e.to_string())
        };

        let (vector_result, lexical_result): (Result<Vec<(i64, f32)>, String>, Result<Vec<(String, f32)>, String>) =
            tokio::join!(vector_fut, lexical_fut);

        if want_vector && vector_result.is_err() && (!want_lexical || lexical_result.is_err()) {
            return Err(AppError::SearchUnavailable);
        }
        if want_lexical && lexical_result.is_err() && (!want_vector || vector_result.is_err()) {
            return Err(AppError::SearchUnavailable);
        }

        let vector_hits = vector_result.unwrap_or_default();
        let lexical_hits = lexical_result.unwrap_or_default();

        let vector_ids: Vec<i64> = vector_hits.iter().map(|(vid, _)| *vid).collect();
        let lexical_ids: Vec<String> = lexical_hits.iter().map(|(id, _)| id.clone()).collect();

        let vector_chunks = if vector_ids.is_empty() {
            Vec::new()
        } else {
            self.store
                .chunks_owned_by_vector_ids(&vector_ids, owner_id)
                .await
                .map_err(|e| AppError::StoreUnavailable(e.to_string()))?
        };
        let lexical_chunks = if lexical_ids.is_empty() {
            Vec::new()
        } else {
            self.store
                .chunks_owned_by(&lexical_ids, owner_id)
                .await
                .map_err(|e| AppError::StoreUnavailable(e.to_string()))?
        };

        // Rank (1-indexed, branch-native order) and native score per vector id / chunk id.
        let vector_rank_by_vid: HashMap<i64, usize> =
            vector_hits.iter().enumerate().map(|(rank, (vid, _))| (*vid, rank + 1)).collect();
        let vector_score_by_vid: HashMap<i64, f32> =
            vector_hits.iter().map(|(vid, dist)| (*vid, *dist)).collect();
        let lexical_rank_by_id: HashMap<String, usize> =
            lexical_hits.iter().enumerate().map(|(rank, (id, _))| (id.clone(), rank + 1)).collect();
        let lexical_score_by_id: HashMap<String, f32> =
            lexical_hits.iter().map(|(id, score)| (id.clone(), *score)).collect();

        let vector_ranks: HashMap<String, usize> = vector_chunks
            .iter()
            .filter_map(|c| vector_rank_by_vid.get(&c.vector_id).map(|rank| (c.id.clone(), *rank)))
            .collect();
        let vector_scores: HashMap<String, f32> = vector_chunks
            .iter()
            .filter_map(|c| vector_score_by_vid.get(&c.vector_id).map(|dist| (c.id.clone(), *dist)))
            .collect();

        let mut chunks_by_id: HashMap<String, crate::store::Chunk> = HashMap::new();
        for c in vector_chunks.into_iter().chain(lexical_chunks.into_iter()) {
            chunks_by_id.entry(c.id.clone()).or_insert(c);
        }

        let ordered: Vec<(String, f32)> = match mode {
            SearchMode::Hybrid => fuse_rrf(&vector_ranks, &lexical_rank_by_id, self.config.rrf_constant, alpha),
            SearchMode::Vector => {
                let mut ids: Vec<&String> = vector_ranks.keys().collect();
                ids.sort_by_key(|id| vector_ranks[*id]);
                ids.into_iter()
                    .map(|id| (id.clone(), vector_scores.get(id).copied().unwrap_or(0.0)))
                    .collect()
            }
            SearchMode::Lexical => {
                let mut ids: Vec<&String> = lexical_rank_by_id.keys().collect();
                ids.sort_by_key(|id| lexical_rank_by_id[*id]);
                ids.into_iter()
                    .map(|id| (id.clone(), lexical_score_by_id.get(id).copied().unwrap_or(0.0)))
                    .collect()
            }
        };

        let mut results = Vec::with_capacity(top_k);
        for (chunk_id, score) in ordered {
            let Some(chunk) = chunks_by_id.get(&chunk_id) else {
                continue;
            };
            results.push(SearchResult {
                chunk_id: chunk.id.clone(),
                document_id: chunk.document_id.clone(),
                content: chunk.content.clone(),
                chunk_index: chunk.chunk_index,
                page_number: chunk.page_number,
                score,
                vector_rank: vector_ranks.get(&chunk_id).copied(),
                lexical_rank: lexical_rank_by_id.get(&chunk_id).copied(),
            });
            if results.len() == top_k {
                break;
            }
        }
        Ok(results)
    }
}

/// `rrf(chunk) = alpha * 1/(c + rank_v) + (1 - alpha) * 1/(c + rank_l)`.
/// A branch a chunk is absent from contributes zero. `alpha` is caller-
/// supplied (the external interface's per-request `alpha`, defaulting to
/// 0.5 at the route boundary) rather than fixed here, so fusion weighting
/// stays a pure function of its inputs.
fn fuse_rrf(
    vector_ranks: &HashMap<String, usize>,
    lexical_ranks: &HashMap<String, usize>,
    c: u32,
    alpha: f32,
) -> Vec<(String, f32)> {
    let mut ids: Vec<&String> = vector_ranks.keys().chain(lexical_ranks.keys()).collect();
    ids.sort();
    ids.dedup();

    let mut scored: Vec<(String, f32)> = ids
        .into_iter()
        .map(|id| {
            let v_term = vector_ranks
                .get(id)
                .map(|rank| alpha * (1.0 / (c as f32 + *rank as f32)))
                .unwrap_or(0.0);
            let l_term = lexical_ranks
                .get(id)
                .map(|rank| (1.0 - alpha) * (1.0 / (c as f32 + *rank as f32)))
                .unwrap_or(0.0);
            (id.clone(), v_term + l_term)
        })
        .collect();

    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fuse_rrf_favors_chunk_present_in_both_branches() {
        let mut vector_ranks = HashMap::new();
        vector_ranks.insert("a".to_string(), 1);
        vector_ranks.insert("b".to_string(), 2);
        let mut lexical_ranks = HashMap::new();
        lexical_ranks.insert("b".to_string(), 1);
        lexical_ranks.insert("c".to_string(), 2);

        let fused = fuse_rrf(&vector_ranks, &lexical_ranks, 60, 0.5);
        assert_eq!(fused[0].0, "b");
    }

    #[test]
    fn fuse_rrf_ignores_branch_a_chunk_is_absent_from() {
        let mut vector_ranks = HashMap::new();
        vector_ranks.insert("only-vector".to_string(), 1);
        let lexical_ranks = HashMap::new();

        let fused = fuse_rrf(&vector_ranks, &lexical_ranks, 60, 0.5);
        assert_eq!(fused.len(), 1);
        assert!(fused[0].1 > 0.0);
    }
}

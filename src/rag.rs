//! RAG orchestrator: composes the hybrid searcher, prompt assembly, the
//! generation client, and the citation tracker into a single question-
//! answering operation, either buffered (`answer`) or streamed as ordered
//! typed events (`answer_stream`).
//!
//! Grounded in SPEC_FULL §4.6 directly — no single teacher file owns this
//! shape — with the phase-timing discipline borrowed from the
//! `#[instrument(skip(...), err)]` spans `checkpointer_sqlite.rs` wraps its
//! own operations in.

use crate::chunker::Chunker;
use crate::citations;
use crate::config::MAX_QUERY_LENGTH;
use crate::error::{AppError, AppResult};
use crate::providers::{GenerationParams, Generator, Prompt};
use crate::search::{HybridSearcher, SearchMode, SearchResult};
use crate::store::PrimaryStore;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::warn;

#[derive(Debug, Clone, Serialize)]
pub struct Source {
    pub chunk_id: String,
    pub document_id: String,
    pub document_filename: String,
    pub content: String,
    pub chunk_index: i64,
    pub page_number: Option<i64>,
    pub score: f32,
    pub rank: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CitationView {
    pub number: usize,
    pub chunk_id: String,
    pub document_id: String,
    pub document_filename: String,
    pub page_number: Option<i64>,
    pub chunk_index: i64,
    pub score: f32,
    pub content_preview: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Usage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnswerResponse {
    pub query_id: String,
    pub query_text: String,
    pub answer: String,
    pub citations: Vec<CitationView>,
    pub sources: Vec<Source>,
    pub model: String,
    pub usage: Usage,
    pub response_time_ms: u64,
    pub search_time_ms: u64,
    pub generation_time_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    #[serde(rename = "status")]
    Status { message: String },
    #[serde(rename = "search_complete")]
    SearchComplete { sources_found: usize, time_ms: u64 },
    #[serde(rename = "sources")]
    Sources { sources: Vec<Source> },
    #[serde(rename = "answer_chunk")]
    AnswerChunk { content: String },
    #[serde(rename = "citations")]
    Citations { citations: Vec<CitationView> },
    #[serde(rename = "done")]
    Done { query_id: String, response_time_ms: u64, search_time_ms: u64, generation_time_ms: u64 },
    #[serde(rename = "error")]
    Error { message: String },
}

#[derive(Debug, Clone)]
pub struct AnswerRequest {
    pub query: String,
    pub top_k: usize,
    pub mode: SearchMode,
    pub alpha: f32,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: usize,
    pub owner_id: String,
}

const NO_SOURCES_ANSWER: &str =
    "I couldn't find any relevant sources in your documents to answer this question.";

pub struct RagOrchestrator {
    searcher: Arc<HybridSearcher>,
    generator: Arc<dyn Generator>,
    store: Arc<PrimaryStore>,
    chunker: Arc<Chunker>,
}

impl RagOrchestrator {
    pub fn new(
        searcher: Arc<HybridSearcher>,
        generator: Arc<dyn Generator>,
        store: Arc<PrimaryStore>,
        chunker: Arc<Chunker>,
    ) -> Self {
        Self { searcher, generator, store, chunker }
    }

    fn validate_query(query: &str) -> AppResult<()> {
        if query.trim().is_empty() {
            return Err(AppError::BadRequest("query must not be empty".to_string()));
        }
        if query.len() > MAX_QUERY_LENGTH {
            return Err(AppError::BadRequest(format!(
                "query exceeds maximum length of {MAX_QUERY_LENGTH} characters"
            )));
        }
        Ok(())
    }

    async fn resolve_sources(&self, results: &[SearchResult]) -> AppResult<Vec<Source>> {
        let mut sources = Vec::with_capacity(results.len());
        for (rank, r) in results.iter().enumerate() {
            let document = self
                .store
                .get_document(&r.document_id)
                .await
                .map_err(|e| AppError::StoreUnavailable(e.to_string()))?;
            sources.push(Source {
                chunk_id: r.chunk_id.clone(),
                document_id: r.document_id.clone(),
                document_filename: document.original_filename,
                content: r.content.clone(),
                chunk_index: r.chunk_index,
                page_number: r.page_number,
                score: r.score,
                rank: rank + 1,
            });
        }
        Ok(sources)
    }

    fn build_prompt(query: &str, sources: &[Source]) -> Prompt {
        let system = "Answer the user's question using only the numbered context blocks below. \
            Cite every claim with the bracketed number of the block it came from, e.g. [1]. \
            If the context does not contain enough information to answer, say so explicitly \
            instead of guessing."
            .to_string();

        let mut user = format!("Question: {query}\n\nContext:\n");
        for s in sources {
            user.push_str(&format!(
                "[{}] ({}, page {}): {}\n\n",
                s.rank,
                s.document_filename,
                s.page_number.map(|p| p.to_string()).unwrap_or_else(|| "n/a".to_string()),
                s.content,
            ));
        }
        Prompt { system, user }
    }

    fn citation_views(text: &str, sources: &[Source]) -> Vec<CitationView> {
        let source_chunk_ids: Vec<String> = sources.iter().map(|s| s.chunk_id.clone()).collect();

        let (ok, violations) = citations::validate(text, sources.len());
        if !ok {
            warn!(?violations, source_count = sources.len(), "generated answer cites source(s) outside the retrieved set");
        }

        citations::bind(text, &source_chunk_ids)
            .into_iter()
            .filter_map(|c| {
                let source = sources.iter().find(|s| s.chunk_id == c.chunk_id)?;
                Some(CitationView {
                    number: c.marker,
                    chunk_id: source.chunk_id.clone(),
                    document_id: source.document_id.clone(),
                    document_filename: source.document_filename.clone(),
                    page_number: source.page_number,
                    chunk_index: source.chunk_index,
                    score: source.score,
                    content_preview: source.content.chars().take(200).collect(),
                })
            })
            .collect()
    }

    /// Buffered answer: runs retrieval, generation, and citation binding to
    /// completion before returning.
    pub async fn answer(&self, request: AnswerRequest) -> AppResult<AnswerResponse> {
        Self::validate_query(&request.query)?;
        let overall_start = Instant::now();

        let search_start = Instant::now();
        let results = self
            .searcher
            .search(&request.query, &request.owner_id, request.mode, request.top_k, request.alpha)
            .await?;
        let search_time_ms = search_start.elapsed().as_millis() as u64;

        let sources = self.resolve_sources(&results).await?;

        let query_id = self
            .store
            .insert_query_log(
                &request.owner_id,
                &request.query,
                request.top_k as i64,
                sources.len() as i64,
                None,
                0,
            )
            .await
            .map_err(|e| AppError::StoreUnavailable(e.to_string()))?;

        if sources.is_empty() {
            return Ok(AnswerResponse {
                query_id,
                query_text: request.query,
                answer: NO_SOURCES_ANSWER.to_string(),
                citations: Vec::new(),
                sources: Vec::new(),
                model: request.model,
                usage: Usage { prompt_tokens: 0, completion_tokens: 0, total_tokens: 0 },
                response_time_ms: overall_start.elapsed().as_millis() as u64,
                search_time_ms,
                generation_time_ms: 0,
            });
        }

        let prompt = Self::build_prompt(&request.query, &sources);
        let params = GenerationParams {
            model: request.model.clone(),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        let generation_start = Instant::now();
        let answer_text = self
            .generator
            .generate(prompt.clone(), params)
            .await
            .map_err(|e| AppError::LLMUnavailable(e.to_string()))?;
        let generation_time_ms = generation_start.elapsed().as_millis() as u64;

        let citation_views = Self::citation_views(&answer_text, &sources);
        let prompt_tokens = self.chunker.count_tokens(&prompt.system) + self.chunker.count_tokens(&prompt.user);
        let completion_tokens = self.chunker.count_tokens(&answer_text);

        Ok(AnswerResponse {
            query_id,
            query_text: request.query,
            answer: answer_text,
            citations: citation_views,
            sources,
            model: request.model,
            usage: Usage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
            },
            response_time_ms: overall_start.elapsed().as_millis() as u64,
            search_time_ms,
            generation_time_ms,
        })
    }

    /// Streamed answer: emits ordered `StreamEvent`s over `sender`. Uses a
    /// bounded channel so a slow consumer applies back-pressure rather than
    /// dropping events — unlike the teacher's WebSocket broadcast channel,
    /// which drops lagging subscribers, an SSE response must deliver every
    /// event in order.
    pub async fn answer_stream(&self, request: AnswerRequest, sender: mpsc::Sender<StreamEvent>) {
        if let Err(e) = Self::validate_query(&request.query) {
            let _ = sender.send(StreamEvent::Error { message: e.to_string() }).await;
            return;
        }
        let overall_start = Instant::now();

        let _ = sender
            .send(StreamEvent::Status { message: "searching".to_string() })
            .await;

        let search_start = Instant::now();
        let results = match self
            .searcher
            .search(&request.query, &request.owner_id, request.mode, request.top_k, request.alpha)
            .await
        {
            Ok(r) => r,
            Err(e) => {
                let _ = sender.send(StreamEvent::Error { message: e.to_string() }).await;
                return;
            }
        };
        let search_time_ms = search_start.elapsed().as_millis() as u64;

        let sources = match self.resolve_sources(&results).await {
            Ok(s) => s,
            Err(e) => {
                let _ = sender.send(StreamEvent::Error { message: e.to_string() }).await;
                return;
            }
        };

        let _ = sender
            .send(StreamEvent::SearchComplete { sources_found: sources.len(), time_ms: search_time_ms })
            .await;
        let _ = sender.send(StreamEvent::Sources { sources: sources.clone() }).await;

        let query_id = match self
            .store
            .insert_query_log(
                &request.owner_id,
                &request.query,
                request.top_k as i64,
                sources.len() as i64,
                None,
                0,
            )
            .await
        {
            Ok(id) => id,
            Err(e) => {
                let _ = sender
                    .send(StreamEvent::Error { message: AppError::StoreUnavailable(e.to_string()).to_string() })
                    .await;
                return;
            }
        };

        if sources.is_empty() {
            let _ = sender.send(StreamEvent::AnswerChunk { content: NO_SOURCES_ANSWER.to_string() }).await;
            let _ = sender.send(StreamEvent::Citations { citations: Vec::new() }).await;
            let _ = sender
                .send(StreamEvent::Done {
                    query_id,
                    response_time_ms: overall_start.elapsed().as_millis() as u64,
                    search_time_ms,
                    generation_time_ms: 0,
                })
                .await;
            return;
        }

        let prompt = Self::build_prompt(&request.query, &sources);
        let params = GenerationParams {
            model: request.model.clone(),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        let generation_start = Instant::now();
        let mut stream = match self.generator.generate_stream(prompt, params).await {
            Ok(s) => s,
            Err(e) => {
                let _ = sender
                    .send(StreamEvent::Error { message: AppError::LLMUnavailable(e.to_string()).to_string() })
                    .await;
                return;
            }
        };

        let mut full_text = String::new();
        use futures_util::StreamExt;
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(text) => {
                    full_text.push_str(&text);
                    if sender.send(StreamEvent::AnswerChunk { content: text }).await.is_err() {
                        return;
                    }
                }
                Err(e) => {
                    let _ = sender
                        .send(StreamEvent::Error { message: AppError::LLMUnavailable(e.to_string()).to_string() })
                        .await;
                    return;
                }
            }
        }
        let generation_time_ms = generation_start.elapsed().as_millis() as u64;

        let citation_views = Self::citation_views(&full_text, &sources);
        let _ = sender.send(StreamEvent::Citations { citations: citation_views }).await;
        let _ = sender
            .send(StreamEvent::Done {
                query_id,
                response_time_ms: overall_start.elapsed().as_millis() as u64,
                search_time_ms,
                generation_time_ms,
            })
            .await;
    }
}

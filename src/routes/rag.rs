//! Thin HTTP surface over `RagOrchestrator`/`HybridSearcher`/`PrimaryStore`.
//!
//! Grounded on `server.rs`'s `inject_user_id` separation of concerns: these
//! handlers trust an already-authenticated caller identity (`Extension<UserId>`)
//! rather than performing authentication themselves — that boundary is out of
//! scope here. Streaming mirrors the ordered-event-forwarding shape of the
//! teacher's `ws_handler`, adapted to axum SSE (`axum::response::sse::Sse`)
//! since there is exactly one consumer per request rather than a broadcast
//! fan-out.

use axum::extract::{Extension, Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use futures_util::stream::Stream;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt as _;

use crate::error::{AppError, AppResult};
use crate::rag::{AnswerRequest, AnswerResponse, Source, StreamEvent};
use crate::search::SearchMode;
use crate::state::AppState;

/// Caller identity, injected by `server.rs`'s `inject_user_id` layer ahead of
/// these handlers — authenticating that identity happens upstream of this
/// process, not here.
#[derive(Debug, Clone)]
pub struct UserId(pub String);

const DEFAULT_TOP_K: usize = 5;
const DEFAULT_ALPHA: f32 = 0.5;
const DEFAULT_TEMPERATURE: f32 = 0.3;
const DEFAULT_MAX_TOKENS: usize = 1000;

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub q: String,
    pub k: Option<usize>,
    pub search_type: Option<String>,
    pub alpha: Option<f32>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<usize>,
}

impl QueryRequest {
    fn into_answer_request(self, state: &AppState, owner_id: String) -> AppResult<AnswerRequest> {
        let mode = match self.search_type.as_deref() {
            None | Some("hybrid") => SearchMode::Hybrid,
            Some("vector") => SearchMode::Vector,
            Some("fulltext") => SearchMode::Lexical,
            Some(other) => {
                return Err(AppError::BadRequest(format!("unknown search_type: {other}")))
            }
        };
        let alpha = self.alpha.unwrap_or(DEFAULT_ALPHA);
        if !(0.0..=1.0).contains(&alpha) {
            return Err(AppError::BadRequest("alpha must be within 0..1".to_string()));
        }
        let top_k = self.k.unwrap_or(DEFAULT_TOP_K);
        if top_k == 0 || top_k > 20 {
            return Err(AppError::BadRequest("k must be within 1..20".to_string()));
        }
        let temperature = self.temperature.unwrap_or(DEFAULT_TEMPERATURE);
        let max_tokens = self.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS);
        if !(100..=4000).contains(&max_tokens) {
            return Err(AppError::BadRequest("max_tokens must be within 100..4000".to_string()));
        }
        Ok(AnswerRequest {
            query: self.q,
            top_k,
            mode,
            alpha,
            model: self.model.unwrap_or_else(|| state.config.generation_model_default.clone()),
            temperature,
            max_tokens,
            owner_id,
        })
    }
}

/// `POST /query` — buffered answer.
pub async fn submit_query(
    State(state): State<AppState>,
    Extension(UserId(owner_id)): Extension<UserId>,
    Json(body): Json<QueryRequest>,
) -> AppResult<Json<AnswerResponse>> {
    let request = body.into_answer_request(&state, owner_id)?;
    let response = state.rag.answer(request).await?;
    Ok(Json(response))
}

/// `POST /query/stream` — SSE answer. Each `StreamEvent` is forwarded as one
/// `data:` frame, JSON-encoded, in the order `RagOrchestrator::answer_stream`
/// produces them.
pub async fn submit_query_stream(
    State(state): State<AppState>,
    Extension(UserId(owner_id)): Extension<UserId>,
    Json(body): Json<QueryRequest>,
) -> AppResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let request = body.into_answer_request(&state, owner_id)?;

    let (tx, rx) = mpsc::channel::<StreamEvent>(32);
    tokio::spawn(async move {
        state.rag.answer_stream(request, tx).await;
    });

    let events = ReceiverStream::new(rx).map(|event| {
        let data = serde_json::to_string(&event).unwrap_or_else(|_| {
            r#"{"type":"error","message":"failed to serialize event"}"#.to_string()
        });
        Ok(Event::default().data(data))
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

#[derive(Debug, Serialize)]
pub struct RetrievalResponse {
    pub query_id: String,
    pub query_text: String,
    pub results: Vec<Source>,
    pub result_count: usize,
    pub response_time_ms: u64,
}

/// `POST /retrieve` — search without generation.
pub async fn retrieve(
    State(state): State<AppState>,
    Extension(UserId(owner_id)): Extension<UserId>,
    Json(body): Json<QueryRequest>,
) -> AppResult<Json<RetrievalResponse>> {
    let overall_start = Instant::now();
    let request = body.into_answer_request(&state, owner_id.clone())?;

    let results = state
        .searcher
        .search(&request.query, &owner_id, request.mode, request.top_k, request.alpha)
        .await?;

    let mut sources = Vec::with_capacity(results.len());
    for (rank, r) in results.iter().enumerate() {
        let document = state
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

    let query_id = state
        .store
        .insert_query_log(&owner_id, &request.query, request.top_k as i64, sources.len() as i64, None, 0)
        .await
        .map_err(|e| AppError::StoreUnavailable(e.to_string()))?;

    Ok(Json(RetrievalResponse {
        query_id,
        query_text: request.query,
        result_count: sources.len(),
        results: sources,
        response_time_ms: overall_start.elapsed().as_millis() as u64,
    }))
}

/// `GET /documents/{document_id}` — lifecycle query. Ownership is enforced
/// here rather than in the store, matching how `HybridSearcher` enforces it
/// post-hoc for search results.
pub async fn get_document(
    State(state): State<AppState>,
    Extension(UserId(owner_id)): Extension<UserId>,
    Path(document_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let document = state
        .store
        .get_document(&document_id)
        .await
        .map_err(|e| AppError::DocumentNotFound(e.to_string()))?;
    if document.owner_id != owner_id {
        return Err(AppError::DocumentNotFound(document_id));
    }
    Ok(Json(document))
}

/// `GET /documents/{document_id}/chunks` — chunks in index order.
pub async fn get_document_chunks(
    State(state): State<AppState>,
    Extension(UserId(owner_id)): Extension<UserId>,
    Path(document_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let document = state
        .store
        .get_document(&document_id)
        .await
        .map_err(|e| AppError::DocumentNotFound(e.to_string()))?;
    if document.owner_id != owner_id {
        return Err(AppError::DocumentNotFound(document_id));
    }
    let chunks = state
        .store
        .list_chunks(&document_id)
        .await
        .map_err(|e| AppError::StoreUnavailable(e.to_string()))?;
    Ok(Json(chunks))
}

/// Mountable router for the document-intelligence surface. Handlers expect
/// `Extension<UserId>` to already be present — `server.rs` is responsible
/// for inserting it (and, if this deployment authenticates callers at all,
/// for doing that upstream of this crate entirely).
pub fn core_routes() -> axum::Router<AppState> {
    use axum::routing::{get, post};
    axum::Router::new()
        .route("/query", post(submit_query))
        .route("/query/stream", post(submit_query_stream))
        .route("/retrieve", post(retrieve))
        .route("/documents/{document_id}", get(get_document))
        .route("/documents/{document_id}/chunks", get(get_document_chunks))
}

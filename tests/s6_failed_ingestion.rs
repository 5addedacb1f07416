//! S6: a document whose MIME type has no registered extractor fails
//! ingestion cleanly — the Document transitions to `failed` with a
//! recorded error message, no chunks are persisted, and nothing reaches
//! either index.

mod common;

use common::{Harness, EMBEDDING_DIM};
use docintel_core::providers::{Embedder, FailingEmbedder};
use docintel_core::search::SearchMode;
use docintel_core::store::DocumentState;
use std::sync::Arc;

#[tokio::test]
async fn unregistered_extractor_mime_fails_the_document() {
    let harness = Harness::new("unused").await;

    let document = harness.ingest_with_mime("owner-1", "scan.pdf", "application/pdf").await;

    assert!(matches!(document.state, DocumentState::Failed));
    assert!(document.error_message.is_some());
    assert!(document.processed_at.is_some());

    let chunks = harness.store.list_chunks(&document.id).await.unwrap();
    assert!(chunks.is_empty());

    assert_eq!(harness.vector_index.len(), 0);
    assert_eq!(harness.lexical_index.count(), 0);

    let results = harness
        .searcher
        .search("anything", "owner-1", SearchMode::Hybrid, 5, 0.5)
        .await
        .unwrap();
    assert!(results.is_empty());
}

#[tokio::test]
async fn completely_unknown_mime_also_fails_the_document() {
    let harness = Harness::new("unused").await;

    let document = harness
        .ingest_with_mime("owner-1", "mystery.bin", "application/octet-stream")
        .await;

    assert!(matches!(document.state, DocumentState::Failed));
    assert!(document.error_message.unwrap().contains("unsupported"));
}

#[tokio::test]
async fn embedding_failure_after_chunk_persistence_rolls_back_chunks_and_vectors() {
    let embedder: Arc<dyn Embedder> = Arc::new(FailingEmbedder::new(EMBEDDING_DIM));
    let harness = Harness::with_embedder("unused", embedder).await;

    let document = harness
        .ingest_text(
            "owner-1",
            "ok.txt",
            "A reasonably long paragraph that will be chunked successfully and then \
             fail at the embedding step, which runs after chunks are already persisted.",
        )
        .await;

    assert!(matches!(document.state, DocumentState::Failed));
    assert!(document.error_message.unwrap().contains("embedding failed"));

    let chunks = harness.store.list_chunks(&document.id).await.unwrap();
    assert!(chunks.is_empty(), "rollback must delete chunks persisted before the failure");
    assert_eq!(harness.vector_index.len(), 0);
    assert_eq!(harness.lexical_index.count(), 0);
}

#[tokio::test]
async fn a_failed_document_does_not_block_later_documents_for_the_same_owner() {
    let harness = Harness::new("unused").await;

    harness.ingest_with_mime("owner-1", "broken.pdf", "application/pdf").await;

    let ok_document = harness
        .ingest_text("owner-1", "ok.txt", "Lighthouses guide ships safely along rocky coastlines at night.")
        .await;
    assert!(matches!(ok_document.state, DocumentState::Completed));

    let results = harness
        .searcher
        .search("lighthouses ships coastlines", "owner-1", SearchMode::Hybrid, 5, 0.5)
        .await
        .unwrap();
    assert!(!results.is_empty());
}

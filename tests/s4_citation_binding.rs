//! S4: citation markers `[N]` in a generated answer are bound back to the
//! retrieved chunk that was shown to the generator at that position. A
//! dangling marker past the source count is reported as a validation
//! violation (via `citations::validate`, observable in logs) and then
//! dropped rather than bound to a nonexistent source.

mod common;

use common::Harness;
use docintel_core::search::SearchMode;

#[tokio::test]
async fn citations_bind_to_the_sources_they_reference() {
    let harness = Harness::new("Granite is an igneous rock [1], while shale is sedimentary [2].").await;

    harness
        .ingest_text("owner-1", "granite.txt", "Granite forms from slowly cooled magma deep underground.")
        .await;
    harness
        .ingest_text("owner-1", "shale.txt", "Shale is a fine-grained sedimentary rock formed from mud.")
        .await;

    let request = docintel_core::rag::AnswerRequest {
        query: "Tell me about igneous and sedimentary rocks".to_string(),
        top_k: 5,
        mode: SearchMode::Hybrid,
        alpha: 0.5,
        model: "stub-model".to_string(),
        temperature: 0.3,
        max_tokens: 500,
        owner_id: "owner-1".to_string(),
    };

    let response = harness.rag.answer(request).await.unwrap();

    assert_eq!(response.citations.len(), 2);
    assert_eq!(response.citations[0].number, 1);
    assert_eq!(response.citations[1].number, 2);
    assert_eq!(response.citations[0].chunk_id, response.sources[0].chunk_id);
    assert_eq!(response.citations[1].chunk_id, response.sources[1].chunk_id);
    assert!(response.usage.total_tokens > 0);
}

#[tokio::test]
async fn dangling_citation_marker_is_reported_and_dropped_not_errored() {
    let harness = Harness::new("This cites a source that does not exist [9].").await;

    harness
        .ingest_text("owner-1", "one.txt", "A single short document about coral reefs and biodiversity.")
        .await;

    let request = docintel_core::rag::AnswerRequest {
        query: "coral reefs".to_string(),
        top_k: 5,
        mode: SearchMode::Hybrid,
        alpha: 0.5,
        model: "stub-model".to_string(),
        temperature: 0.3,
        max_tokens: 500,
        owner_id: "owner-1".to_string(),
    };

    let response = harness.rag.answer(request).await.unwrap();
    assert!(response.citations.is_empty());
}

#[tokio::test]
async fn no_sources_found_yields_fallback_answer_and_no_citations() {
    let harness = Harness::new("this generator output is never reached").await;

    let request = docintel_core::rag::AnswerRequest {
        query: "anything at all".to_string(),
        top_k: 5,
        mode: SearchMode::Hybrid,
        alpha: 0.5,
        model: "stub-model".to_string(),
        temperature: 0.3,
        max_tokens: 500,
        owner_id: "owner-with-no-documents".to_string(),
    };

    let response = harness.rag.answer(request).await.unwrap();
    assert!(response.citations.is_empty());
    assert!(response.sources.is_empty());
    assert_eq!(response.usage.total_tokens, 0);
}

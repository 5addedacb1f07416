//! S5: `answer_stream` emits its typed events in the fixed order the
//! external interface promises — one or more `Status`, then
//! `SearchComplete`, `Sources`, zero or more `AnswerChunk`, `Citations`,
//! and finally `Done`.

mod common;

use common::Harness;
use docintel_core::rag::{AnswerRequest, StreamEvent};
use docintel_core::search::SearchMode;
use tokio::sync::mpsc;

#[tokio::test]
async fn stream_events_arrive_in_contractual_order() {
    let harness = Harness::new("Reefs shelter a quarter of all marine species [1].").await;

    harness
        .ingest_text(
            "owner-1",
            "reef.txt",
            "Coral reefs occupy less than one percent of the ocean floor but \
             shelter roughly a quarter of all known marine species.",
        )
        .await;

    let request = AnswerRequest {
        query: "how many marine species do coral reefs shelter".to_string(),
        top_k: 5,
        mode: SearchMode::Hybrid,
        alpha: 0.5,
        model: "stub-model".to_string(),
        temperature: 0.3,
        max_tokens: 500,
        owner_id: "owner-1".to_string(),
    };

    let (tx, mut rx) = mpsc::channel(32);
    let rag = harness.rag.clone();
    tokio::spawn(async move {
        rag.answer_stream(request, tx).await;
    });

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }

    assert!(!events.is_empty());
    assert!(matches!(events[0], StreamEvent::Status { .. }));

    let search_complete_at = events
        .iter()
        .position(|e| matches!(e, StreamEvent::SearchComplete { .. }))
        .expect("search_complete event present");
    let sources_at = events
        .iter()
        .position(|e| matches!(e, StreamEvent::Sources { .. }))
        .expect("sources event present");
    let citations_at = events
        .iter()
        .position(|e| matches!(e, StreamEvent::Citations { .. }))
        .expect("citations event present");
    let done_at = events
        .iter()
        .position(|e| matches!(e, StreamEvent::Done { .. }))
        .expect("done event present");

    assert!(search_complete_at < sources_at);
    assert!(sources_at < citations_at);
    assert!(citations_at < done_at);
    assert_eq!(done_at, events.len() - 1, "done must be the terminal event");

    // No error event on the happy path.
    assert!(!events.iter().any(|e| matches!(e, StreamEvent::Error { .. })));

    if let StreamEvent::Citations { citations } = &events[citations_at] {
        assert_eq!(citations.len(), 1);
        assert_eq!(citations[0].number, 1);
    }
}

#[tokio::test]
async fn empty_query_emits_error_event_only() {
    let harness = Harness::new("unused").await;

    let request = AnswerRequest {
        query: "   ".to_string(),
        top_k: 5,
        mode: SearchMode::Hybrid,
        alpha: 0.5,
        model: "stub-model".to_string(),
        temperature: 0.3,
        max_tokens: 500,
        owner_id: "owner-1".to_string(),
    };

    let (tx, mut rx) = mpsc::channel(32);
    harness.rag.answer_stream(request, tx).await;

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }

    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], StreamEvent::Error { .. }));
}

//! S2: a second process holding its own `VectorIndex` handle over the same
//! on-disk files picks up writes made by the ingesting process without being
//! told to — `search()`'s own mtime check reloads it.

mod common;

use common::{Harness, EMBEDDING_DIM, VECTOR_SCOPE};
use docintel_core::providers::StubEmbedder;
use docintel_core::search::SearchMode;
use docintel_core::vector_index::VectorIndex;

#[tokio::test]
async fn second_reader_reloads_after_writer_saves() {
    let harness = Harness::new("unused").await;

    // A second handle over the same index path/scope, opened before anything
    // has been ingested — simulating a second long-lived reader process.
    let reader = VectorIndex::open(
        std::path::Path::new(&harness.config.vector_index_path),
        VECTOR_SCOPE,
        EMBEDDING_DIM,
    )
    .unwrap();
    assert_eq!(reader.reload_count(), 0);

    let embedder = StubEmbedder::new(EMBEDDING_DIM);
    let query_vec = {
        use docintel_core::providers::Embedder;
        embedder
            .embed(&["a migratory bird crosses continents each autumn".to_string()])
            .await
            .unwrap()
            .remove(0)
    };
    assert!(reader.search(&query_vec, 5).unwrap().is_empty());

    harness
        .ingest_text(
            "owner-1",
            "birds.txt",
            "A migratory bird crosses continents each autumn, guided by \
             magnetic fields and the position of the stars.",
        )
        .await;

    // The ingesting harness's own vector_index instance already sees the new
    // data (it wrote it); the independent `reader` handle only sees it once
    // its next `search()` call notices the on-disk mtime advanced.
    let results = reader.search(&query_vec, 5).unwrap();
    assert!(!results.is_empty());
    assert_eq!(reader.reload_count(), 1);

    let searcher_results = harness
        .searcher
        .search("migratory bird continents", "owner-1", SearchMode::Vector, 5, 0.5)
        .await
        .unwrap();
    assert!(!searcher_results.is_empty());
}

//! S3: a repeated query against unchanged state is served from the
//! query-result cache, and a newly completed ingestion for the same owner
//! invalidates exactly that owner's cached entries (never another owner's).

mod common;

use common::Harness;
use docintel_core::search::SearchMode;

#[tokio::test]
async fn identical_query_hits_cache_until_new_ingestion_invalidates_it() {
    let harness = Harness::new("unused").await;

    harness
        .ingest_text(
            "owner-1",
            "volcano.txt",
            "A shield volcano is built almost entirely of fluid lava flows \
             that spread widely and gently down its slopes.",
        )
        .await;

    assert_eq!(harness.query_cache.len(), 0);

    let first = harness
        .searcher
        .search("shield volcano lava", "owner-1", SearchMode::Hybrid, 5, 0.5)
        .await
        .unwrap();
    assert!(!first.is_empty());
    assert_eq!(harness.query_cache.len(), 1);
    let misses_after_first = harness.query_cache.stats().misses();

    let second = harness
        .searcher
        .search("shield volcano lava", "owner-1", SearchMode::Hybrid, 5, 0.5)
        .await
        .unwrap();
    assert_eq!(second.len(), first.len());
    assert_eq!(second[0].chunk_id, first[0].chunk_id);
    // Served from cache: no new miss recorded, and a hit was.
    assert_eq!(harness.query_cache.stats().misses(), misses_after_first);
    assert!(harness.query_cache.stats().hits() >= 1);

    // A second owner's query never touches owner-1's cache entry.
    let other_owner = harness
        .searcher
        .search("shield volcano lava", "owner-2", SearchMode::Hybrid, 5, 0.5)
        .await
        .unwrap();
    assert!(other_owner.is_empty());
    assert_eq!(harness.query_cache.len(), 2);

    // Completing a new ingestion for owner-1 invalidates owner-1's entry only.
    harness
        .ingest_text(
            "owner-1",
            "volcano2.txt",
            "Basaltic lava's low viscosity lets it travel long distances \
             before cooling and solidifying.",
        )
        .await;

    assert_eq!(harness.query_cache.len(), 1, "owner-1's entry was invalidated, owner-2's survives");

    let third = harness
        .searcher
        .search("shield volcano lava", "owner-1", SearchMode::Hybrid, 5, 0.5)
        .await
        .unwrap();
    // The new document is now a candidate too, so the recomputed result set
    // may differ in size from the stale cached one.
    assert!(third.len() >= first.len());
}

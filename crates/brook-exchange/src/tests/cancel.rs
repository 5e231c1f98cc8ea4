//! Cancellation scenarios.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use brook_store::ChunkStore;
use brook_types::ContentId;

use crate::tests::helpers::*;
use crate::ExchangeError;

const CHUNK: u32 = 65_536;

#[tokio::test]
async fn test_cancel_leaves_only_stored_chunks() {
    let data = test_data(CHUNK as usize * 8);
    let (manifest, chunks) = manifest_for("obj", &data, CHUNK);

    // The provider answers manifest and have queries promptly but stalls
    // every block, so no further chunk can complete.
    let mut stall = MockProvider::seeded(b"stall", &manifest, &chunks, |_| true);
    stall.block_delay = Some(Duration::from_secs(3600));
    let stall = Arc::new(stall);

    let (exchange, store) = exchange_with(
        test_config(CHUNK, Duration::from_secs(3600)),
        vec![stall.clone()],
    )
    .await;

    // 5 of 8 chunks are already present locally.
    for (id, bytes) in chunks.iter().take(5) {
        store.put(*id, bytes.clone()).await.unwrap();
    }

    let session = exchange.session(manifest.identifier);
    let token = session.cancel_token();
    let handle = tokio::spawn(session.run());

    // Let the session reach the fetching phase, then cancel it.
    tokio::time::sleep(Duration::from_millis(200)).await;
    token.cancel();

    match handle.await.unwrap() {
        Err(ExchangeError::Cancelled) => {}
        other => panic!("expected Cancelled, got {other:?}"),
    }

    // Exactly the 5 pre-stored chunks remain; nothing half-fetched.
    assert_eq!(raw_entry_count(&store).await, 5);

    // The cancel was propagated for the 3 outstanding chunks.
    let outstanding: BTreeSet<ContentId> = chunks.iter().skip(5).map(|(id, _)| *id).collect();
    let cancelled: BTreeSet<ContentId> = stall.cancelled_ids().into_iter().collect();
    assert_eq!(cancelled, outstanding);

    // No further wants are issued after cancellation.
    let wants_at_cancel = stall.wants_seen();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(stall.wants_seen(), wants_at_cancel);
}

#[tokio::test]
async fn test_cancel_before_run() {
    let data = test_data(CHUNK as usize * 2);
    let (exchange, _store) = exchange_with(
        test_config(CHUNK, Duration::from_secs(5)),
        Vec::new(),
    )
    .await;
    let manifest = exchange.publish("obj", &data).await.unwrap();

    let session = exchange.session(manifest.identifier);
    session.cancel_token().cancel();
    assert!(matches!(
        session.run().await,
        Err(ExchangeError::Cancelled)
    ));
}

#[tokio::test]
async fn test_cancel_is_idempotent_and_session_is_single_use() {
    let data = test_data(CHUNK as usize);
    let (exchange, _store) = exchange_with(
        test_config(CHUNK, Duration::from_secs(5)),
        Vec::new(),
    )
    .await;
    let manifest = exchange.publish("obj", &data).await.unwrap();

    // Cancelling twice is harmless; a fresh session still completes.
    let session = exchange.session(manifest.identifier);
    let token = session.cancel_token();
    token.cancel();
    token.cancel();
    assert!(session.run().await.is_err());

    let result = exchange.fetch(manifest.identifier).await.unwrap();
    assert_eq!(result.data, data);
}

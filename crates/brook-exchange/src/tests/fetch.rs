//! Happy-path fetch scenarios.

use std::sync::Arc;
use std::time::Duration;

use brook_net::StaticDirectory;
use brook_store::{ChunkStore, MemoryStore};
use brook_types::{Codec, ContentId, HashAlgorithm};
use bytes::Bytes;

use crate::tests::helpers::*;
use crate::{Exchange, ExchangeError};

const CHUNK: u32 = 262_144;

#[tokio::test]
async fn test_publish_then_fetch_locally() {
    let data = test_data(2_097_152);
    let (exchange, _store) = exchange_with(
        test_config(CHUNK, Duration::from_secs(5)),
        Vec::new(),
    )
    .await;

    let manifest = exchange.publish("release.bin", &data).await.unwrap();
    // 2,097,152 bytes at 262,144 per chunk is exactly 8 chunks.
    assert_eq!(manifest.chunk_count, 8);

    let result = exchange.fetch(manifest.identifier).await.unwrap();
    assert_eq!(result.data, data);
    assert_eq!(result.report.chunk_count, 8);
    assert_eq!(result.report.already_present, 8);
    assert_eq!(result.report.transferred, 0);
}

#[tokio::test]
async fn test_publish_is_deterministic_across_nodes() {
    let data = test_data(600_000);
    let (m1, _) = manifest_for("same", &data, CHUNK);
    let (m2, _) = manifest_for("same", &data, CHUNK);
    assert_eq!(m1.identifier, m2.identifier);
}

#[tokio::test]
async fn test_fetch_from_single_provider() {
    let data = test_data(2_097_152);
    let (manifest, chunks) = manifest_for("obj", &data, CHUNK);
    let provider = Arc::new(MockProvider::seeded(b"p1", &manifest, &chunks, |_| true));

    let (exchange, store) = exchange_with(
        test_config(CHUNK, Duration::from_secs(5)),
        vec![provider.clone()],
    )
    .await;

    let result = exchange.fetch(manifest.identifier).await.unwrap();
    assert_eq!(result.data, data);
    assert_eq!(result.report.transferred, 8);
    assert_eq!(result.report.rejected_blocks, 0);

    // Everything the manifest names is now stored locally, plus the manifest.
    assert_eq!(raw_entry_count(&store).await, 8);
    assert!(store.contains(manifest.identifier).await.unwrap());
}

#[tokio::test]
async fn test_fetch_from_three_disjoint_providers() {
    let data = test_data(2_097_152);
    let (manifest, chunks) = manifest_for("obj", &data, CHUNK);

    // Each provider can serve a disjoint subset of the 8 chunks.
    let providers: Vec<Arc<MockProvider>> = (0..3u32)
        .map(|i| {
            Arc::new(MockProvider::seeded(
                &[b'p', i as u8],
                &manifest,
                &chunks,
                move |index| index % 3 == i,
            ))
        })
        .collect();

    let (exchange, store) = exchange_with(
        test_config(CHUNK, Duration::from_secs(5)),
        providers.clone(),
    )
    .await;

    let result = exchange.fetch(manifest.identifier).await.unwrap();
    assert_eq!(result.data, data);
    assert_eq!(result.report.transferred, 8);
    assert_eq!(raw_entry_count(&store).await, 8);

    // The have-sets route each want straight to the only holder.
    assert_eq!(providers[0].wants_seen(), 3); // chunks 0, 3, 6
    assert_eq!(providers[1].wants_seen(), 3); // chunks 1, 4, 7
    assert_eq!(providers[2].wants_seen(), 2); // chunks 2, 5
}

#[tokio::test]
async fn test_fetch_resumes_partial_transfer() {
    let data = test_data(2_097_152);
    let (manifest, chunks) = manifest_for("obj", &data, CHUNK);
    let provider = Arc::new(MockProvider::seeded(b"p1", &manifest, &chunks, |_| true));

    let (exchange, store) = exchange_with(
        test_config(CHUNK, Duration::from_secs(5)),
        vec![provider],
    )
    .await;

    // 5 of 8 chunks already arrived in an earlier, interrupted session.
    for (id, bytes) in chunks.iter().take(5) {
        store.put(*id, bytes.clone()).await.unwrap();
    }

    let result = exchange.fetch(manifest.identifier).await.unwrap();
    assert_eq!(result.data, data);
    assert_eq!(result.report.already_present, 5);
    assert_eq!(result.report.transferred, 3);
}

#[tokio::test]
async fn test_fetch_unknown_id_without_providers() {
    let (exchange, _store) = exchange_with(
        test_config(CHUNK, Duration::from_millis(200)),
        Vec::new(),
    )
    .await;

    let target = ContentId::for_bytes(Codec::Manifest, HashAlgorithm::Blake3, b"nowhere");
    match exchange.fetch(target).await {
        Err(ExchangeError::NoProviders(id)) => assert_eq!(id, target),
        other => panic!("expected NoProviders, got {other:?}"),
    }
}

#[tokio::test]
async fn test_fetch_rejects_raw_codec_target() {
    let (exchange, _store) = exchange_with(
        test_config(CHUNK, Duration::from_millis(200)),
        Vec::new(),
    )
    .await;

    let target = ContentId::for_bytes(Codec::Raw, HashAlgorithm::Blake3, b"chunk");
    assert!(matches!(
        exchange.fetch(target).await,
        Err(ExchangeError::NotAManifest(_))
    ));
}

#[tokio::test]
async fn test_fetch_manifest_unavailable() {
    // Providers exist but none has the manifest.
    let provider = Arc::new(MockProvider::new(b"empty"));
    let (exchange, _store) = exchange_with(
        test_config(CHUNK, Duration::from_millis(200)),
        vec![provider],
    )
    .await;

    let target = ContentId::for_bytes(Codec::Manifest, HashAlgorithm::Blake3, b"missing");
    assert!(matches!(
        exchange.fetch(target).await,
        Err(ExchangeError::ManifestUnavailable { requested }) if requested == target
    ));
}

#[tokio::test]
async fn test_fetch_empty_object() {
    let (exchange, _store) = exchange_with(
        test_config(CHUNK, Duration::from_secs(5)),
        Vec::new(),
    )
    .await;

    let manifest = exchange.publish("empty", b"").await.unwrap();
    let result = exchange.fetch(manifest.identifier).await.unwrap();
    assert!(result.data.is_empty());
    assert_eq!(result.report.chunk_count, 0);
}

#[tokio::test]
async fn test_publish_announces_to_directory() {
    let data = test_data(CHUNK as usize * 2);
    let store: Arc<dyn ChunkStore> = Arc::new(MemoryStore::new());
    let directory = Arc::new(StaticDirectory::new());
    let self_provider = Arc::new(crate::LocalProvider::new(
        brook_types::ProviderId::from_data(b"self"),
        store.clone(),
    ));

    let exchange = Exchange::new(
        test_config(CHUNK, Duration::from_secs(5)),
        store,
        directory.clone(),
    )
    .with_self_provider(self_provider);

    let manifest = exchange.publish("announced", &data).await.unwrap();

    use brook_net::ProviderDirectory;
    assert_eq!(directory.locate(manifest.identifier).await.len(), 1);
    for chunk in &manifest.chunks {
        assert_eq!(directory.locate(chunk.id()).await.len(), 1);
    }
}

#[tokio::test]
async fn test_fetched_store_can_serve_others() {
    // A node that fetched an object becomes a provider for it: fetch from A
    // into B, then fetch from B into C.
    let data = test_data(700_000);
    let (manifest, chunks) = manifest_for("obj", &data, CHUNK);
    let a = Arc::new(MockProvider::seeded(b"a", &manifest, &chunks, |_| true));

    let (exchange_b, store_b) = exchange_with(
        test_config(CHUNK, Duration::from_secs(5)),
        vec![a],
    )
    .await;
    exchange_b.fetch(manifest.identifier).await.unwrap();

    // B serves from its store, no mock involved.
    let b_provider = crate::LocalProvider::new(brook_types::ProviderId::from_data(b"b"), store_b);
    let store_c: Arc<dyn ChunkStore> = Arc::new(MemoryStore::new());
    let directory_c = Arc::new(StaticDirectory::new());
    directory_c.add_global(Arc::new(b_provider)).await;
    let exchange_c = Exchange::new(
        test_config(CHUNK, Duration::from_secs(5)),
        store_c,
        directory_c,
    );

    let result = exchange_c.fetch(manifest.identifier).await.unwrap();
    assert_eq!(result.data, data);
}

#[tokio::test]
async fn test_fetch_result_bytes_are_stored_verbatim() {
    let data = test_data(CHUNK as usize + 1);
    let (manifest, chunks) = manifest_for("obj", &data, CHUNK);
    let provider = Arc::new(MockProvider::seeded(b"p", &manifest, &chunks, |_| true));

    let (exchange, store) = exchange_with(
        test_config(CHUNK, Duration::from_secs(5)),
        vec![provider],
    )
    .await;
    let result = exchange.fetch(manifest.identifier).await.unwrap();
    assert_eq!(result.data.len(), CHUNK as usize + 1);

    // Every stored chunk re-verifies against its identifier.
    for chunk in &manifest.chunks {
        assert!(store.verify(chunk.id()).await.unwrap());
        assert_eq!(
            store.get(chunk.id()).await.unwrap(),
            Bytes::copy_from_slice(
                &data[chunk.offset as usize..chunk.offset as usize + chunk.size as usize]
            )
        );
    }
}

//! [`FetchSession`] — the want/have/block retrieval state machine.
//!
//! One session fetches one object: it resolves the manifest, computes the
//! missing-chunk set against the local store, fans out one task per missing
//! chunk (bounded by the configured parallelism), verifies every returned
//! block against the manifest and its Merkle root before any store write,
//! and completes only when the reassembled object verifies end to end.
//!
//! The session owns all mutable want-tracking state: per-chunk slots live
//! in an arena indexed by chunk index, and spawned tasks report back by
//! return value rather than sharing the arena.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use brook_cas::{deserialize_manifest, missing_chunks, verify_leaf, verify_manifest};
use brook_net::{Provider, ProviderDirectory};
use brook_store::{ChunkStore, StoreError};
use brook_types::{
    ChunkRef, Codec, ContentId, ExchangeConfig, HASH_LEN, HashAlgorithm, Manifest, ProviderId,
};
use bytes::Bytes;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::{ChunkFailure, ExchangeError};

/// Lifecycle state of a single chunk within a session.
///
/// `Missing → Requested → Stored` on success; a timed-out or rejected block
/// returns the chunk to `Missing` for retry against another provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkState {
    /// Not present locally and not currently requested.
    Missing,
    /// A want is outstanding for this chunk.
    Requested,
    /// Verified and durably written to the local store.
    Stored,
}

/// Session-level phases, in order of progression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Asking providers for the manifest.
    ResolvingManifest,
    /// Computing the missing set and provider have-sets.
    Planning,
    /// Wants are in flight.
    Fetching,
    /// All chunks stored; verifying the reassembled object.
    Assembling,
    /// Terminal: object verified and returned.
    Complete,
    /// Terminal: retries exhausted for at least one chunk.
    Failed,
    /// Terminal: cancelled by external request.
    Cancelled,
}

/// Per-chunk bookkeeping, owned by the session.
#[derive(Debug)]
struct ChunkSlot {
    state: ChunkState,
}

/// Cancels an in-flight [`FetchSession`].
///
/// Cancellation stops new wants immediately, best-effort-cancels
/// outstanding ones, and leaves only fully verified chunks in the store.
#[derive(Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelToken {
    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

/// Summary counters for a finished fetch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchReport {
    /// Chunks the manifest describes.
    pub chunk_count: u32,
    /// Chunks already present locally when planning started.
    pub already_present: u32,
    /// Chunks transferred and stored by this session.
    pub transferred: u32,
    /// Blocks rejected for failing verification.
    pub rejected_blocks: u32,
    /// Wants that timed out.
    pub timeouts: u32,
}

/// A completed fetch: the verified object plus its manifest.
#[derive(Debug, Clone)]
pub struct FetchResult {
    /// The resolved manifest.
    pub manifest: Manifest,
    /// The reassembled, verified object bytes.
    pub data: Bytes,
    /// Transfer statistics.
    pub report: FetchReport,
}

/// Per-session provider penalties. A provider that serves bad blocks is
/// deprioritized, not permanently banned — transient corruption is a normal
/// failure mode, not inherently malicious.
#[derive(Default)]
struct Scoreboard {
    penalties: Mutex<HashMap<ProviderId, u32>>,
}

impl Scoreboard {
    fn penalize(&self, id: ProviderId, amount: u32) {
        let mut map = self.penalties.lock().expect("scoreboard lock poisoned");
        *map.entry(id).or_insert(0) += amount;
    }

    fn score(&self, id: ProviderId) -> u32 {
        let map = self.penalties.lock().expect("scoreboard lock poisoned");
        map.get(&id).copied().unwrap_or(0)
    }
}

/// Order candidates for one want: providers known (via have-sets) to hold
/// the chunk first, then by ascending penalty, with a rotation by
/// `(chunk index + round)` so concurrent wants spread across equally-good
/// providers.
fn rank_candidates(
    providers: &[Arc<dyn Provider>],
    scores: &Scoreboard,
    have: &HashMap<ProviderId, HashSet<ContentId>>,
    chunk_id: ContentId,
    rotation: usize,
) -> Vec<Arc<dyn Provider>> {
    if providers.is_empty() {
        return Vec::new();
    }
    let mut ranked: Vec<Arc<dyn Provider>> = providers.to_vec();
    ranked.rotate_left(rotation % providers.len());
    // Stable sort keeps the rotation within equal (holds, penalty) keys.
    ranked.sort_by_key(|p| {
        let pid = p.id();
        let holds = have.get(&pid).is_some_and(|set| set.contains(&chunk_id));
        (if holds { 0u8 } else { 1u8 }, scores.score(pid))
    });
    ranked
}

/// Outcome of one per-chunk fetch task.
enum TaskOutcome {
    Stored {
        index: u32,
        transferred: bool,
        rejected: u32,
        timeouts: u32,
    },
    Failed(ChunkFailure),
    Cancelled(u32),
}

/// Resolves only when the session is cancelled; pends forever otherwise.
async fn wait_cancelled(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|cancelled| *cancelled).await.is_err() {
        // Sender gone without cancelling; nothing to wait for.
        std::future::pending::<()>().await;
    }
}

/// A single fetch operation. Create via
/// [`Exchange::session`](crate::Exchange::session), then [`run`](Self::run).
pub struct FetchSession {
    target: ContentId,
    store: Arc<dyn ChunkStore>,
    directory: Arc<dyn ProviderDirectory>,
    config: ExchangeConfig,
    phase: SessionPhase,
    cancel_tx: Arc<watch::Sender<bool>>,
    cancel_rx: watch::Receiver<bool>,
}

impl FetchSession {
    pub(crate) fn new(
        target: ContentId,
        store: Arc<dyn ChunkStore>,
        directory: Arc<dyn ProviderDirectory>,
        config: ExchangeConfig,
    ) -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            target,
            store,
            directory,
            config,
            phase: SessionPhase::ResolvingManifest,
            cancel_tx: Arc::new(tx),
            cancel_rx: rx,
        }
    }

    /// A handle that cancels this session from another task.
    pub fn cancel_token(&self) -> CancelToken {
        CancelToken {
            tx: self.cancel_tx.clone(),
        }
    }

    /// The current session phase.
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    fn is_cancelled(&self) -> bool {
        *self.cancel_rx.borrow()
    }

    /// Drive the session to a terminal phase.
    pub async fn run(mut self) -> Result<FetchResult, ExchangeError> {
        let providers = self.directory.locate(self.target).await;
        let scores = Arc::new(Scoreboard::default());

        // --- Resolve the manifest ---
        self.phase = SessionPhase::ResolvingManifest;
        let manifest = self.resolve_manifest(&providers, &scores).await?;
        if self.is_cancelled() {
            self.phase = SessionPhase::Cancelled;
            return Err(ExchangeError::Cancelled);
        }

        // --- Plan: missing set and provider have-sets ---
        self.phase = SessionPhase::Planning;
        let missing = missing_chunks(&manifest, self.store.as_ref()).await?;
        let mut report = FetchReport {
            chunk_count: manifest.chunk_count,
            already_present: manifest.chunk_count - missing.len() as u32,
            ..FetchReport::default()
        };
        debug!(
            target = %self.target,
            missing = missing.len(),
            present = report.already_present,
            providers = providers.len(),
            "planned fetch"
        );

        if !missing.is_empty() {
            if providers.is_empty() {
                self.phase = SessionPhase::Failed;
                return Err(ExchangeError::NoProviders(self.target));
            }
            let have = self.query_have_sets(&providers, &manifest, &missing).await;
            self.fetch_missing(&manifest, &missing, &providers, &scores, have, &mut report)
                .await?;
        }

        // --- Assemble and verify the whole object ---
        self.phase = SessionPhase::Assembling;
        let data = self.assemble(&manifest).await?;

        self.phase = SessionPhase::Complete;
        info!(
            target = %self.target,
            size = data.len(),
            transferred = report.transferred,
            rejected = report.rejected_blocks,
            "fetch complete"
        );
        Ok(FetchResult {
            manifest,
            data,
            report,
        })
    }

    /// Resolve the manifest: locally if stored, otherwise from the first
    /// provider whose returned bytes compute to the requested identifier.
    async fn resolve_manifest(
        &mut self,
        providers: &[Arc<dyn Provider>],
        scores: &Scoreboard,
    ) -> Result<Manifest, ExchangeError> {
        if self.target.codec() != Codec::Manifest {
            return Err(ExchangeError::NotAManifest(self.target));
        }

        // Local store first.
        match self.store.try_get(self.target).await {
            Ok(Some(bytes)) => match deserialize_manifest(&bytes) {
                Ok(manifest) if manifest.identifier == self.target => {
                    debug!(target = %self.target, "resolved manifest locally");
                    return Ok(manifest);
                }
                _ => warn!(target = %self.target, "local manifest entry unusable, re-fetching"),
            },
            Ok(None) => {}
            Err(StoreError::Corrupt { .. }) => {
                warn!(target = %self.target, "local manifest entry corrupt, re-fetching");
            }
            Err(e) => return Err(e.into()),
        }

        if providers.is_empty() {
            return Err(ExchangeError::NoProviders(self.target));
        }

        let mut identity_mismatch: Option<ExchangeError> = None;
        for provider in providers {
            if self.is_cancelled() {
                return Err(ExchangeError::Cancelled);
            }
            let pid = provider.id();
            let bytes = match timeout(self.config.want_timeout, provider.fetch_manifest(self.target))
                .await
            {
                Err(_) => {
                    debug!(provider = %pid, "manifest request timed out");
                    scores.penalize(pid, 1);
                    continue;
                }
                Ok(Err(e)) => {
                    debug!(provider = %pid, %e, "manifest request failed");
                    scores.penalize(pid, 1);
                    continue;
                }
                Ok(Ok(None)) => continue,
                Ok(Ok(Some(bytes))) => bytes,
            };

            let manifest = match deserialize_manifest(&bytes) {
                Ok(m) => m,
                Err(e) => {
                    warn!(provider = %pid, %e, "provider returned undecodable manifest");
                    scores.penalize(pid, 2);
                    continue;
                }
            };

            // The identifier is computed from the bytes; a mismatch means
            // this provider answered with the wrong manifest. Mark it
            // unreliable for this session and move on.
            if manifest.identifier != self.target {
                warn!(
                    provider = %pid,
                    requested = %self.target,
                    computed = %manifest.identifier,
                    "manifest identity mismatch"
                );
                identity_mismatch = Some(ExchangeError::ManifestIdentityMismatch {
                    requested: self.target,
                    computed: manifest.identifier,
                });
                scores.penalize(pid, 3);
                continue;
            }

            // Cache the verified manifest; the bytes hash to the target id.
            self.store.put(self.target, Bytes::from(bytes)).await?;
            debug!(target = %self.target, provider = %pid, "resolved manifest from provider");
            return Ok(manifest);
        }

        Err(identity_mismatch.unwrap_or(ExchangeError::ManifestUnavailable {
            requested: self.target,
        }))
    }

    /// Ask every provider which of the missing chunks it can serve.
    /// Failures are absorbed; an unknown have-set just loses the provider
    /// its head start in candidate ranking.
    async fn query_have_sets(
        &self,
        providers: &[Arc<dyn Provider>],
        manifest: &Manifest,
        missing: &BTreeSet<u32>,
    ) -> HashMap<ProviderId, HashSet<ContentId>> {
        let wanted: Vec<ContentId> = missing
            .iter()
            .filter_map(|&i| manifest.chunk_id(i))
            .collect();

        let mut have = HashMap::new();
        for provider in providers {
            match timeout(self.config.want_timeout, provider.have(&wanted)).await {
                Ok(Ok(ids)) => {
                    debug!(provider = %provider.id(), holds = ids.len(), "have-set received");
                    have.insert(provider.id(), ids.into_iter().collect());
                }
                Ok(Err(e)) => debug!(provider = %provider.id(), %e, "have query failed"),
                Err(_) => debug!(provider = %provider.id(), "have query timed out"),
            }
        }
        have
    }

    /// Fan out one task per missing chunk and collect their outcomes.
    async fn fetch_missing(
        &mut self,
        manifest: &Manifest,
        missing: &BTreeSet<u32>,
        providers: &[Arc<dyn Provider>],
        scores: &Arc<Scoreboard>,
        have: HashMap<ProviderId, HashSet<ContentId>>,
        report: &mut FetchReport,
    ) -> Result<(), ExchangeError> {
        self.phase = SessionPhase::Fetching;

        let mut slots: Vec<ChunkSlot> = manifest
            .chunks
            .iter()
            .map(|c| ChunkSlot {
                state: if missing.contains(&c.index) {
                    ChunkState::Missing
                } else {
                    ChunkState::Stored
                },
            })
            .collect();

        let leaves: Arc<Vec<[u8; HASH_LEN]>> =
            Arc::new(manifest.chunks.iter().map(|c| c.hash).collect());
        let have = Arc::new(have);
        let semaphore = Arc::new(Semaphore::new(self.config.parallel_providers_max.max(1)));

        let mut join = JoinSet::new();
        for &index in missing {
            let Some(chunk) = manifest.chunks.get(index as usize).copied() else {
                continue;
            };
            if let Some(slot) = slots.get_mut(index as usize) {
                slot.state = ChunkState::Requested;
            }
            join.spawn(fetch_chunk(ChunkTask {
                chunk,
                algo: manifest.hash_algorithm,
                root: manifest.root_hash,
                leaves: leaves.clone(),
                providers: providers.to_vec(),
                scores: scores.clone(),
                have: have.clone(),
                store: self.store.clone(),
                config: self.config.clone(),
                cancel_rx: self.cancel_rx.clone(),
                semaphore: semaphore.clone(),
            }));
        }

        let mut failures: Vec<ChunkFailure> = Vec::new();
        let mut cancelled = false;
        while let Some(joined) = join.join_next().await {
            match joined {
                Ok(TaskOutcome::Stored {
                    index,
                    transferred,
                    rejected,
                    timeouts,
                }) => {
                    if let Some(slot) = slots.get_mut(index as usize) {
                        slot.state = ChunkState::Stored;
                    }
                    if transferred {
                        report.transferred += 1;
                    }
                    report.rejected_blocks += rejected;
                    report.timeouts += timeouts;
                }
                Ok(TaskOutcome::Failed(failure)) => {
                    if let Some(slot) = slots.get_mut(failure.index as usize) {
                        slot.state = ChunkState::Missing;
                    }
                    failures.push(failure);
                }
                Ok(TaskOutcome::Cancelled(index)) => {
                    if let Some(slot) = slots.get_mut(index as usize) {
                        slot.state = ChunkState::Missing;
                    }
                    cancelled = true;
                }
                Err(e) => warn!(%e, "chunk fetch task aborted"),
            }
        }

        if cancelled || self.is_cancelled() {
            self.propagate_cancel(manifest, &slots, providers).await;
            self.phase = SessionPhase::Cancelled;
            return Err(ExchangeError::Cancelled);
        }

        if !failures.is_empty() {
            failures.sort_by_key(|f| f.index);
            self.phase = SessionPhase::Failed;
            return Err(ExchangeError::Exhausted { failures });
        }

        Ok(())
    }

    /// Withdraw wants for every chunk that is not stored.
    async fn propagate_cancel(
        &self,
        manifest: &Manifest,
        slots: &[ChunkSlot],
        providers: &[Arc<dyn Provider>],
    ) {
        let outstanding: Vec<ContentId> = slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.state != ChunkState::Stored)
            .filter_map(|(i, _)| manifest.chunk_id(i as u32))
            .collect();
        if outstanding.is_empty() {
            return;
        }
        debug!(
            target = %self.target,
            outstanding = outstanding.len(),
            "propagating cancel to providers"
        );
        for provider in providers {
            let grace = std::time::Duration::from_millis(500);
            if let Ok(Err(e)) = timeout(grace, provider.cancel(&outstanding)).await {
                debug!(provider = %provider.id(), %e, "cancel notification failed");
            }
        }
    }

    /// Read every chunk back from the store, reassemble, and verify the
    /// object against the manifest root and the requested identifier.
    async fn assemble(&self, manifest: &Manifest) -> Result<Bytes, ExchangeError> {
        let mut data = Vec::with_capacity(manifest.total_size as usize);
        for chunk in &manifest.chunks {
            let bytes = self.store.get(chunk.id()).await?;
            data.extend_from_slice(&bytes);
        }

        verify_manifest(manifest, &data)?;

        // Defense in depth: the manifest we verified against must still be
        // the one that was requested.
        if manifest.identifier != self.target {
            return Err(ExchangeError::ManifestIdentityMismatch {
                requested: self.target,
                computed: manifest.identifier,
            });
        }

        Ok(Bytes::from(data))
    }
}

/// Everything one per-chunk task needs, bundled to keep the spawn site flat.
struct ChunkTask {
    chunk: ChunkRef,
    algo: HashAlgorithm,
    root: [u8; HASH_LEN],
    leaves: Arc<Vec<[u8; HASH_LEN]>>,
    providers: Vec<Arc<dyn Provider>>,
    scores: Arc<Scoreboard>,
    have: Arc<HashMap<ProviderId, HashSet<ContentId>>>,
    store: Arc<dyn ChunkStore>,
    config: ExchangeConfig,
    cancel_rx: watch::Receiver<bool>,
    semaphore: Arc<Semaphore>,
}

/// Fetch a single chunk: try candidate providers in ranked order, verify
/// each returned block before storing, and retry until the configured
/// rounds are exhausted.
async fn fetch_chunk(mut task: ChunkTask) -> TaskOutcome {
    let index = task.chunk.index;
    let id = task.chunk.id();

    // Bound global want parallelism; cancellation wins while queueing.
    let _permit = tokio::select! {
        permit = task.semaphore.clone().acquire_owned() => match permit {
            Ok(p) => p,
            Err(_) => return TaskOutcome::Cancelled(index),
        },
        _ = wait_cancelled(&mut task.cancel_rx) => return TaskOutcome::Cancelled(index),
    };

    let mut attempts = 0u32;
    let mut rejected = 0u32;
    let mut timeouts = 0u32;
    let mut last_error = String::from("no candidate provider holds this chunk");

    'rounds: for round in 0..task.config.max_retries_per_chunk {
        // First-valid-wins: an identical chunk stored by a sibling task (or
        // another session) makes this want obsolete. The check is a cheap
        // identifier lookup, not a re-verification.
        match task.store.contains(id).await {
            Ok(true) => {
                debug!(%id, index, "chunk already stored, want superseded");
                return TaskOutcome::Stored {
                    index,
                    transferred: false,
                    rejected,
                    timeouts,
                };
            }
            Ok(false) => {}
            Err(e) => {
                last_error = format!("store lookup failed: {e}");
                break;
            }
        }

        let candidates = rank_candidates(
            &task.providers,
            &task.scores,
            &task.have,
            id,
            index as usize + round as usize,
        );
        if candidates.is_empty() {
            break;
        }

        for provider in candidates {
            if *task.cancel_rx.borrow() {
                return TaskOutcome::Cancelled(index);
            }
            let pid = provider.id();
            attempts += 1;

            let fetched = tokio::select! {
                _ = wait_cancelled(&mut task.cancel_rx) => return TaskOutcome::Cancelled(index),
                res = timeout(task.config.want_timeout, provider.fetch_block(id)) => res,
            };

            let data = match fetched {
                Err(_) => {
                    // Requested → TimedOut → Missing: withdraw the want and
                    // move to the next candidate.
                    timeouts += 1;
                    task.scores.penalize(pid, 1);
                    last_error = format!("want timed out after {:?}", task.config.want_timeout);
                    debug!(%id, index, provider = %pid, "want timed out");
                    let cancel_ids = vec![id];
                    let cancel_provider = provider.clone();
                    tokio::spawn(async move {
                        let _ = cancel_provider.cancel(&cancel_ids).await;
                    });
                    continue;
                }
                Ok(Err(e)) => {
                    task.scores.penalize(pid, 1);
                    last_error = format!("provider unreachable: {e}");
                    debug!(%id, index, provider = %pid, %e, "want failed");
                    continue;
                }
                Ok(Ok(None)) => {
                    last_error = "provider does not have this chunk".to_string();
                    continue;
                }
                Ok(Ok(Some(data))) => data,
            };

            // Verify before any other action: the block's hash must match
            // the manifest entry, and the hash must be a member of the
            // Merkle tree under the manifest root.
            let computed = task.algo.digest(&data);
            let valid = computed == task.chunk.hash
                && data.len() as u32 == task.chunk.size
                && verify_leaf(task.algo, index as usize, &computed, &task.leaves, &task.root);
            if !valid {
                // Verifying → Rejected → Missing: never stored, provider
                // degraded but not banned.
                rejected += 1;
                task.scores.penalize(pid, 3);
                last_error = "block failed hash verification".to_string();
                warn!(%id, index, provider = %pid, "rejecting block that failed verification");
                continue;
            }

            match task.store.put(id, data).await {
                Ok(()) => {
                    debug!(%id, index, provider = %pid, "chunk verified and stored");
                    return TaskOutcome::Stored {
                        index,
                        transferred: true,
                        rejected,
                        timeouts,
                    };
                }
                Err(e) => {
                    last_error = format!("store write failed: {e}");
                    warn!(%id, index, %e, "failed to persist verified chunk");
                    break 'rounds;
                }
            }
        }
    }

    TaskOutcome::Failed(ChunkFailure {
        index,
        id,
        attempts,
        last_error,
    })
}

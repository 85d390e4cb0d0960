#![forbid(unsafe_code)]

//! Forward-message cache.
//!
//! # Lifecycle
//!
//! 1. A cacheable original is stored under its hash with age 0.
//! 2. A reference to a stored hash resolves to a copy of the payload carrying
//!    the reference's own metadata, and resets the entry's age.
//! 3. After every finished run, [`ForwardMsgCache::increment_run_count`] ages
//!    all entries and evicts those older than the configured maximum.
//!
//! A reference to an unknown hash becomes a pending fetch. Only one fetch per
//! hash is ever outstanding; later references on the same hash join it.
//!
//! # Invariants
//!
//! - Returned messages are owned copies; nothing a caller does to them
//!   reaches the store.
//! - An entry with age `a` is evicted by the first increment that makes
//!   `a > max_age_runs`. `max_age_runs == 0` therefore disables cross-run reuse.

use std::collections::HashMap;
use std::fmt;

use dv_core::{ForwardMsg, ForwardMsgMetadata, MessageCodec, MessageHash};

use crate::fetch::{FetchCompletion, FetchError, MessageFetcher, WaiterToken};

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Errors from cache resolution.
#[derive(Debug)]
pub enum CacheError {
    /// A cacheable original arrived without a hash.
    MissingHash,
    /// A referenced payload could not be obtained. Every waiter on the hash
    /// is failed together.
    CacheMissUnrecoverable {
        hash: MessageHash,
        waiters: Vec<WaiterToken>,
        source: FetchError,
    },
    /// A fetch result arrived for a hash nobody is waiting on.
    UnexpectedFetch { hash: MessageHash },
    /// A synchronous resolution found a fetch for the hash already in flight.
    FetchInFlight { hash: MessageHash },
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingHash => write!(f, "cacheable message has no hash"),
            Self::CacheMissUnrecoverable { hash, source, .. } => {
                write!(f, "cannot resolve reference to {hash}: {source}")
            }
            Self::UnexpectedFetch { hash } => write!(f, "no fetch in flight for {hash}"),
            Self::FetchInFlight { hash } => write!(f, "fetch for {hash} is already in flight"),
        }
    }
}

impl std::error::Error for CacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::CacheMissUnrecoverable { source, .. } => Some(source),
            _ => None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Types
// ─────────────────────────────────────────────────────────────────────────────

/// Outcome of [`ForwardMsgCache::process`].
#[derive(Clone, Debug)]
pub enum Resolution {
    /// The message to apply downstream.
    Ready(ForwardMsg),
    /// The referenced payload is not cached. `token` identifies this reference
    /// in the eventual [`FetchCompletion`]; `fetch_needed` is set only for the
    /// first waiter on `hash`, whose owner must start the fetch.
    Pending {
        hash: MessageHash,
        token: WaiterToken,
        fetch_needed: bool,
    },
}

impl Resolution {
    #[must_use]
    pub fn ready(self) -> Option<ForwardMsg> {
        match self {
            Self::Ready(msg) => Some(msg),
            Self::Pending { .. } => None,
        }
    }
}

/// Cache statistics.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of stored payloads.
    pub entry_count: usize,
    /// Encoded size of all stored payloads.
    pub total_bytes: usize,
    /// Hashes with a fetch outstanding.
    pub in_flight: usize,
    /// References answered from the store.
    pub hits: u64,
    /// References that had to wait for a fetch.
    pub misses: u64,
    /// Entries removed by aging.
    pub evictions: u64,
}

#[derive(Clone, Debug)]
struct CacheEntry {
    msg: ForwardMsg,
    age: u32,
    encoded_len: usize,
}

#[derive(Debug)]
struct Waiter {
    token: WaiterToken,
    metadata: ForwardMsgMetadata,
}

// ─────────────────────────────────────────────────────────────────────────────
// ForwardMsgCache
// ─────────────────────────────────────────────────────────────────────────────

/// Session-scoped store of cacheable forward messages.
#[derive(Debug, Default)]
pub struct ForwardMsgCache {
    entries: HashMap<MessageHash, CacheEntry>,
    in_flight: HashMap<MessageHash, Vec<Waiter>>,
    next_token: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl ForwardMsgCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a just-decoded message.
    ///
    /// Originals pass through unchanged (cacheable ones are stored first).
    /// References resolve from the store or become [`Resolution::Pending`].
    /// `encoded` is the raw wire form and is only used for size accounting.
    pub fn process(&mut self, msg: ForwardMsg, encoded: &[u8]) -> Result<Resolution, CacheError> {
        let Some(ref_hash) = msg.ref_hash().cloned() else {
            if msg.metadata.cacheable {
                self.store(&msg, encoded.len())?;
            }
            return Ok(Resolution::Ready(msg));
        };

        if let Some(resolved) = self.resolve_hit(&ref_hash, msg.metadata.clone()) {
            return Ok(Resolution::Ready(resolved));
        }

        self.misses += 1;
        let token = self.next_token();
        let waiters = self.in_flight.entry(ref_hash.clone()).or_default();
        let fetch_needed = waiters.is_empty();
        waiters.push(Waiter {
            token,
            metadata: msg.metadata,
        });
        dv_core::debug!(
            hash = %ref_hash,
            waiters = waiters.len(),
            fetch_needed,
            "cache miss"
        );

        Ok(Resolution::Pending {
            hash: ref_hash,
            token,
            fetch_needed,
        })
    }

    /// Finish the in-flight fetch for `hash`.
    ///
    /// On success the payload is stored (age 0) and one copy per waiter is
    /// returned, each with that waiter's metadata. On failure every waiter is
    /// reported in [`CacheError::CacheMissUnrecoverable`].
    pub fn complete_fetch<C: MessageCodec + ?Sized>(
        &mut self,
        hash: &MessageHash,
        result: Result<Vec<u8>, FetchError>,
        codec: &C,
    ) -> Result<FetchCompletion, CacheError> {
        let waiters = self
            .in_flight
            .remove(hash)
            .ok_or_else(|| CacheError::UnexpectedFetch { hash: hash.clone() })?;

        let fetched = result.and_then(|bytes| {
            let msg = codec.decode_forward(&bytes)?;
            if msg.hash != *hash {
                return Err(FetchError::HashMismatch {
                    expected: hash.clone(),
                    found: msg.hash,
                });
            }
            Ok((msg, bytes.len()))
        });

        let (msg, encoded_len) = match fetched {
            Ok(fetched) => fetched,
            Err(source) => {
                dv_core::warn!(hash = %hash, error = %source, "fetch failed");
                return Err(CacheError::CacheMissUnrecoverable {
                    hash: hash.clone(),
                    waiters: waiters.iter().map(|w| w.token).collect(),
                    source,
                });
            }
        };

        let resolved = waiters
            .into_iter()
            .map(|waiter| {
                let mut copy = msg.clone();
                copy.metadata = waiter.metadata;
                (waiter.token, copy)
            })
            .collect();
        self.entries.insert(
            hash.clone(),
            CacheEntry {
                msg,
                age: 0,
                encoded_len,
            },
        );

        Ok(FetchCompletion {
            hash: hash.clone(),
            resolved,
        })
    }

    /// Resolve `msg` completely, fetching synchronously through `fetcher` on a miss.
    pub fn resolve_with<F, C>(
        &mut self,
        msg: ForwardMsg,
        encoded: &[u8],
        fetcher: &mut F,
        codec: &C,
    ) -> Result<ForwardMsg, CacheError>
    where
        F: MessageFetcher + ?Sized,
        C: MessageCodec + ?Sized,
    {
        match self.process(msg, encoded)? {
            Resolution::Ready(msg) => Ok(msg),
            Resolution::Pending {
                hash,
                token,
                fetch_needed: true,
            } => {
                let result = fetcher.fetch(&hash);
                let mut completion = self.complete_fetch(&hash, result, codec)?;
                completion
                    .take(token)
                    .ok_or(CacheError::UnexpectedFetch { hash })
            }
            Resolution::Pending { hash, token, .. } => {
                self.drop_waiter(&hash, token);
                Err(CacheError::FetchInFlight { hash })
            }
        }
    }

    /// Age every entry by one run and evict those older than `max_age_runs`.
    /// Returns the number of evicted entries.
    pub fn increment_run_count(&mut self, max_age_runs: u32) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| {
            entry.age = entry.age.saturating_add(1);
            entry.age <= max_age_runs
        });
        let evicted = before - self.entries.len();
        self.evictions += evicted as u64;
        dv_core::debug!(
            max_age_runs,
            evicted,
            remaining = self.entries.len(),
            "cache run count incremented"
        );
        evicted
    }

    /// Drop every outstanding fetch. Returns the abandoned hashes.
    pub fn abandon_fetches(&mut self) -> Vec<MessageHash> {
        let mut hashes: Vec<MessageHash> = self.in_flight.drain().map(|(hash, _)| hash).collect();
        hashes.sort();
        if !hashes.is_empty() {
            dv_core::debug!(count = hashes.len(), "abandoned pending fetches");
        }
        hashes
    }

    /// Copy of the stored payload for `hash`. Does not touch its age.
    #[must_use]
    pub fn get(&self, hash: &MessageHash) -> Option<ForwardMsg> {
        self.entries.get(hash).map(|entry| entry.msg.clone())
    }

    #[must_use]
    pub fn contains(&self, hash: &MessageHash) -> bool {
        self.entries.contains_key(hash)
    }

    /// Age of the entry for `hash` in completed runs.
    #[must_use]
    pub fn age(&self, hash: &MessageHash) -> Option<u32> {
        self.entries.get(hash).map(|entry| entry.age)
    }

    #[must_use]
    pub fn is_in_flight(&self, hash: &MessageHash) -> bool {
        self.in_flight.contains_key(hash)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every entry and outstanding fetch. Counters are kept.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.in_flight.clear();
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entry_count: self.entries.len(),
            total_bytes: self.entries.values().map(|e| e.encoded_len).sum(),
            in_flight: self.in_flight.len(),
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
        }
    }

    fn store(&mut self, msg: &ForwardMsg, encoded_len: usize) -> Result<(), CacheError> {
        if msg.hash.is_empty() {
            return Err(CacheError::MissingHash);
        }
        self.entries.insert(
            msg.hash.clone(),
            CacheEntry {
                msg: msg.clone(),
                age: 0,
                encoded_len,
            },
        );
        dv_core::trace!(hash = %msg.hash, bytes = encoded_len, "cached message");
        Ok(())
    }

    fn resolve_hit(&mut self, hash: &MessageHash, metadata: ForwardMsgMetadata) -> Option<ForwardMsg> {
        let entry = self.entries.get_mut(hash)?;
        entry.age = 0;
        self.hits += 1;
        let mut copy = entry.msg.clone();
        copy.metadata = metadata;
        Some(copy)
    }

    fn drop_waiter(&mut self, hash: &MessageHash, token: WaiterToken) {
        if let Some(waiters) = self.in_flight.get_mut(hash) {
            waiters.retain(|w| w.token != token);
        }
    }

    fn next_token(&mut self) -> WaiterToken {
        let token = WaiterToken(self.next_token);
        self.next_token += 1;
        token
    }
}

//! In-process backend with lazy per-key expiry.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::trace;

use super::{Command, KvStore, Pipeline, Reply, SetMode, StoreError, StoreResult};

/// Every this many batches, expired keys nobody touches any more are swept.
const SWEEP_INTERVAL: u64 = 64;

#[derive(Debug)]
enum Slot {
    Bytes(Vec<u8>),
    Set(BTreeSet<String>),
}

#[derive(Debug)]
struct Entry {
    slot: Slot,
    /// None means the key never expires.
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| now >= deadline)
    }
}

/// In-memory [`KvStore`].
///
/// Keys expire lazily: a key past its deadline is dropped the next time a
/// command touches it, by the sweep run every few dozen batches, or by
/// [`MemoryStore::purge_expired`]. Clones share the
/// same keyspace. Each pipeline is applied under one lock, so commands of
/// different pipelines never interleave here (a network backend gives no such
/// guarantee).
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
    batches: Arc<AtomicU64>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .values()
            .filter(|entry| !entry.is_expired(now))
            .count()
    }

    /// Check if the store holds no live keys.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check whether `key` exists and has not expired.
    pub fn contains(&self, key: &str) -> bool {
        let now = Instant::now();
        self.entries
            .lock()
            .get(key)
            .is_some_and(|entry| !entry.is_expired(now))
    }

    /// Remaining TTL of a live key that has one.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let entries = self.entries.lock();
        let entry = entries.get(key).filter(|entry| !entry.is_expired(now))?;
        entry
            .expires_at
            .map(|deadline| deadline.saturating_duration_since(now))
    }

    /// Drop every expired key and return how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        let purged = before - entries.len();
        if purged > 0 {
            trace!(purged, "Purged expired keys");
        }
        purged
    }

    /// Remove every key.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    fn execute_now(&self, commands: Vec<Command>) -> StoreResult<Vec<Reply>> {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        let batch = self.batches.fetch_add(1, Ordering::Relaxed) + 1;
        if batch % SWEEP_INTERVAL == 0 {
            let before = entries.len();
            entries.retain(|_, entry| !entry.is_expired(now));
            if entries.len() < before {
                trace!(swept = before - entries.len(), "Swept expired keys");
            }
        }
        let mut replies = Vec::with_capacity(commands.len());
        let mut first_error = None;

        for command in commands {
            match apply(&mut entries, command, now) {
                Ok(reply) => replies.push(reply),
                Err(err) => {
                    first_error.get_or_insert(err);
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(replies),
        }
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn execute(&self, pipeline: Pipeline) -> StoreResult<Vec<Reply>> {
        self.execute_now(pipeline.into_commands())
    }
}

fn evict_expired(entries: &mut HashMap<String, Entry>, key: &str, now: Instant) {
    if entries.get(key).is_some_and(|entry| entry.is_expired(now)) {
        entries.remove(key);
    }
}

fn apply(entries: &mut HashMap<String, Entry>, command: Command, now: Instant) -> StoreResult<Reply> {
    evict_expired(entries, command.key(), now);

    match command {
        Command::Set {
            key,
            value,
            ttl,
            mode,
        } => {
            if ttl.is_zero() {
                return Err(StoreError::Backend(format!("invalid expire time for '{key}'")));
            }
            let exists = entries.contains_key(&key);
            let write = match mode {
                SetMode::Always => true,
                SetMode::IfAbsent => !exists,
                SetMode::IfPresent => exists,
            };
            if write {
                entries.insert(
                    key,
                    Entry {
                        slot: Slot::Bytes(value),
                        expires_at: Some(now + ttl),
                    },
                );
            }
            Ok(Reply::Flag(write))
        }
        Command::Get { key } => match entries.get(&key) {
            None => Ok(Reply::Value(None)),
            Some(Entry {
                slot: Slot::Bytes(value),
                ..
            }) => Ok(Reply::Value(Some(value.clone()))),
            Some(_) => Err(StoreError::WrongType(key)),
        },
        Command::Del { key } => Ok(Reply::Count(i64::from(entries.remove(&key).is_some()))),
        Command::SAdd { key, member } => {
            let entry = entries.entry(key.clone()).or_insert_with(|| Entry {
                slot: Slot::Set(BTreeSet::new()),
                expires_at: None,
            });
            match &mut entry.slot {
                Slot::Set(members) => Ok(Reply::Count(i64::from(members.insert(member)))),
                Slot::Bytes(_) => Err(StoreError::WrongType(key)),
            }
        }
        Command::SRem { key, member } => {
            let Some(entry) = entries.get_mut(&key) else {
                return Ok(Reply::Count(0));
            };
            let Slot::Set(members) = &mut entry.slot else {
                return Err(StoreError::WrongType(key));
            };
            let removed = members.remove(&member);
            let emptied = members.is_empty();
            if emptied {
                entries.remove(&key);
            }
            Ok(Reply::Count(i64::from(removed)))
        }
        Command::SMembers { key } => match entries.get(&key) {
            None => Ok(Reply::Members(Vec::new())),
            Some(Entry {
                slot: Slot::Set(members),
                ..
            }) => Ok(Reply::Members(members.iter().cloned().collect())),
            Some(_) => Err(StoreError::WrongType(key)),
        },
        Command::Expire { key, ttl } => {
            if ttl.is_zero() {
                return Ok(Reply::Flag(entries.remove(&key).is_some()));
            }
            match entries.get_mut(&key) {
                Some(entry) => {
                    entry.expires_at = Some(now + ttl);
                    Ok(Reply::Flag(true))
                }
                None => Ok(Reply::Flag(false)),
            }
        }
    }
}

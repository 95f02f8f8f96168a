//! Common test utilities for session store integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use uesm_session::{
    Command, KvStore, MemoryStore, Pipeline, Reply, SessionConfig, SessionRecord, SessionStore,
    StoreError, StoreResult,
};

pub const IMSI: &str = "123456789012345";
pub const MSISDN: &str = "1234567890";

/// A store over a fresh in-memory backend.
pub fn memory_store(config: SessionConfig) -> (SessionStore, MemoryStore) {
    let backend = MemoryStore::new();
    let store = SessionStore::new(Arc::new(backend.clone()), config);
    (store, backend)
}

/// Config with a TTL short enough to watch expire.
pub fn short_ttl(ttl: Duration) -> SessionConfig {
    SessionConfig::new()
        .with_min_ttl(Duration::from_millis(1))
        .with_default_ttl(ttl)
}

pub fn record(tmsi: &str) -> SessionRecord {
    SessionRecord::new(tmsi, IMSI, MSISDN)
}

/// Wraps a [`MemoryStore`] and fails selected commands on demand.
///
/// Failing commands are skipped (not applied) and the batch reports a
/// connection error, while the rest of the batch still applies, the same way
/// a non-transactional pipeline behaves when one command errors.
#[derive(Clone)]
pub struct FlakyStore {
    inner: MemoryStore,
    fail_expire: Arc<AtomicBool>,
    fail_sadd: Arc<AtomicBool>,
    fail_all: Arc<AtomicBool>,
    batches: Arc<AtomicUsize>,
}

impl FlakyStore {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            fail_expire: Arc::new(AtomicBool::new(false)),
            fail_sadd: Arc::new(AtomicBool::new(false)),
            fail_all: Arc::new(AtomicBool::new(false)),
            batches: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn fail_expire(&self, enabled: bool) {
        self.fail_expire.store(enabled, Ordering::SeqCst);
    }

    pub fn fail_sadd(&self, enabled: bool) {
        self.fail_sadd.store(enabled, Ordering::SeqCst);
    }

    pub fn fail_all(&self, enabled: bool) {
        self.fail_all.store(enabled, Ordering::SeqCst);
    }

    /// Number of batches seen so far.
    pub fn batches(&self) -> usize {
        self.batches.load(Ordering::SeqCst)
    }

    fn should_fail(&self, command: &Command) -> bool {
        match command {
            Command::Expire { .. } => self.fail_expire.load(Ordering::SeqCst),
            Command::SAdd { .. } => self.fail_sadd.load(Ordering::SeqCst),
            _ => false,
        }
    }
}

#[async_trait]
impl KvStore for FlakyStore {
    async fn execute(&self, pipeline: Pipeline) -> StoreResult<Vec<Reply>> {
        self.batches.fetch_add(1, Ordering::SeqCst);
        if self.fail_all.load(Ordering::SeqCst) {
            return Err(StoreError::Connection("connection refused".into()));
        }

        let mut kept = Pipeline::new();
        let mut failed = false;
        for command in pipeline.into_commands() {
            if self.should_fail(&command) {
                failed = true;
            } else {
                kept.push(command);
            }
        }

        let replies = self.inner.execute(kept).await?;
        if failed {
            return Err(StoreError::Connection("broken pipe".into()));
        }
        Ok(replies)
    }
}

//! Secondary indexes: IMSI and MSISDN to the set of TMSIs.
//!
//! Index sets are hints. A TMSI in an index may point at a record that has
//! since expired, been deleted, or moved to another identifier, because the
//! record and its index entries are written by separate, non-transactional
//! commands. [`IndexManager::resolve`] therefore checks every hint against
//! the record itself and schedules a best-effort cleanup for the ones that
//! did not hold up.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::task::TaskTracker;
use tracing::{debug, trace};

use crate::backend::{KvStore, Pipeline};
use crate::context::OpContext;
use crate::error::{Error, Result};
use crate::keys;
use crate::record::SessionRecord;

/// Which secondary identifier an index is keyed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexKind {
    Imsi,
    Msisdn,
}

impl IndexKind {
    /// Both index kinds.
    pub const ALL: [IndexKind; 2] = [IndexKind::Imsi, IndexKind::Msisdn];

    /// Field name of the identifier.
    pub fn field(self) -> &'static str {
        match self {
            IndexKind::Imsi => "imsi",
            IndexKind::Msisdn => "msisdn",
        }
    }

    /// Backend key of the index set for `value`.
    pub fn key(self, value: &str) -> String {
        match self {
            IndexKind::Imsi => keys::imsi_index_key(value),
            IndexKind::Msisdn => keys::msisdn_index_key(value),
        }
    }

    /// The identifier of this kind carried by `record`.
    pub fn value_of(self, record: &SessionRecord) -> &str {
        match self {
            IndexKind::Imsi => &record.imsi,
            IndexKind::Msisdn => &record.msisdn,
        }
    }
}

impl std::fmt::Display for IndexKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.field())
    }
}

/// Maintains and resolves the IMSI and MSISDN indexes.
///
/// Batch builders (`register`, `unregister`, `reindex`, `refresh`) only queue
/// commands; the caller sends them together with its record write.
#[derive(Clone)]
pub struct IndexManager {
    backend: Arc<dyn KvStore>,
    cleanups: TaskTracker,
    flush: Arc<Mutex<()>>,
}

impl IndexManager {
    /// Create an index manager over `backend`.
    pub fn new(backend: Arc<dyn KvStore>) -> Self {
        Self {
            backend,
            cleanups: TaskTracker::new(),
            flush: Arc::new(Mutex::new(())),
        }
    }

    /// Queue adding `record.tmsi` to both of its indexes with `ttl`.
    pub fn register(&self, pipe: &mut Pipeline, record: &SessionRecord, ttl: Duration) {
        for kind in IndexKind::ALL {
            add(pipe, kind, kind.value_of(record), &record.tmsi, ttl);
        }
    }

    /// Queue removing `record.tmsi` from both of its indexes.
    pub fn unregister(&self, pipe: &mut Pipeline, record: &SessionRecord) {
        for kind in IndexKind::ALL {
            pipe.srem(kind.key(kind.value_of(record)), record.tmsi.as_str());
        }
    }

    /// Queue the index changes for a record moving from `old` to `new`.
    ///
    /// A changed identifier moves the TMSI from the old set to the new one.
    /// An unchanged identifier has its membership re-asserted, since a
    /// concurrent update may have removed the TMSI from that set after `old`
    /// was read.
    pub fn reindex(
        &self,
        pipe: &mut Pipeline,
        old: &SessionRecord,
        new: &SessionRecord,
        ttl: Duration,
    ) {
        for kind in IndexKind::ALL {
            let before = kind.value_of(old);
            let after = kind.value_of(new);
            if before != after {
                pipe.srem(kind.key(before), new.tmsi.as_str());
            }
            add(pipe, kind, after, &new.tmsi, ttl);
        }
    }

    /// Queue re-asserting membership of `record.tmsi` and resetting both set TTLs.
    pub fn refresh(&self, pipe: &mut Pipeline, record: &SessionRecord, ttl: Duration) {
        self.register(pipe, record, ttl);
    }

    /// TMSIs currently listed in the `kind` index for `value`.
    pub async fn members(&self, ctx: &OpContext, kind: IndexKind, value: &str) -> Result<Vec<String>> {
        let key = kind.key(value);
        ctx.run(async {
            self.backend
                .smembers(&key)
                .await
                .map_err(Error::store("read index"))
        })
        .await
    }

    /// Resolve TMSIs to their live records with one batched multi-get.
    ///
    /// TMSIs without a record are left out. With `origin` set to the index
    /// the TMSIs came from, records whose identifier no longer matches it are
    /// left out too. Every left-out TMSI gets a detached cleanup task.
    /// Duplicate TMSIs are resolved once; result order follows `tmsis`.
    pub async fn resolve(
        &self,
        ctx: &OpContext,
        tmsis: &[String],
        origin: Option<(IndexKind, &str)>,
    ) -> Result<Vec<SessionRecord>> {
        let mut seen = HashSet::new();
        let mut unique = Vec::with_capacity(tmsis.len());
        for tmsi in tmsis {
            if seen.insert(tmsi.as_str()) {
                unique.push(tmsi);
            }
        }
        let tmsis = unique;
        if tmsis.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = Pipeline::new();
        for tmsi in &tmsis {
            pipe.get(keys::session_key(tmsi));
        }

        let replies = ctx
            .run(async {
                self.backend
                    .execute(pipe)
                    .await
                    .map_err(Error::store("query multiple sessions"))
            })
            .await?;

        let mut records = Vec::with_capacity(tmsis.len());
        for (tmsi, reply) in tmsis.into_iter().zip(replies) {
            let value = reply
                .into_value("GET")
                .map_err(Error::store("query multiple sessions"))?;

            let Some(bytes) = value else {
                trace!(tmsi = %tmsi, "Indexed session is gone");
                self.schedule_cleanup(tmsi.clone(), origin);
                continue;
            };

            let record: SessionRecord = serde_json::from_slice(&bytes)
                .map_err(Error::serialization("decode session"))?;

            if let Some((kind, value)) = origin
                && kind.value_of(&record) != value
            {
                trace!(tmsi = %tmsi, index = %kind, "Indexed session moved to another identifier");
                self.schedule_cleanup(tmsi.clone(), origin);
                continue;
            }

            records.push(record);
        }

        Ok(records)
    }

    /// Number of cleanup tasks still running.
    pub fn pending_cleanups(&self) -> usize {
        self.cleanups.len()
    }

    /// Wait until every cleanup task scheduled so far has finished.
    ///
    /// Concurrent callers are served one at a time. Cleanups scheduled while
    /// a flush is waiting are waited for too.
    pub async fn flush_cleanups(&self) {
        let _flushing = self.flush.lock().await;
        self.cleanups.close();
        self.cleanups.wait().await;
        self.cleanups.reopen();
    }

    fn schedule_cleanup(&self, tmsi: String, origin: Option<(IndexKind, &str)>) {
        let backend = Arc::clone(&self.backend);
        let origin = origin.map(|(kind, value)| (kind, value.to_string()));

        // Detached: own context, never the caller's cancellation or errors.
        self.cleanups.spawn(async move {
            let ctx = OpContext::new();
            match cleanup_stale_entry(&ctx, backend.as_ref(), &tmsi, origin).await {
                Ok(removed) if removed > 0 => {
                    debug!(tmsi = %tmsi, removed, "Removed stale index entry");
                }
                Ok(_) => trace!(tmsi = %tmsi, "Stale index entry left to expire"),
                Err(err) => debug!(tmsi = %tmsi, error = %err, "Index cleanup failed"),
            }
        });
    }
}

impl std::fmt::Debug for IndexManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexManager")
            .field("pending_cleanups", &self.cleanups.len())
            .finish_non_exhaustive()
    }
}

fn add(pipe: &mut Pipeline, kind: IndexKind, value: &str, tmsi: &str, ttl: Duration) {
    let key = kind.key(value);
    pipe.sadd(key.as_str(), tmsi).expire(key, ttl);
}

/// Re-read the record behind a stale hint and drop the hint if that is safe.
///
/// The record is needed to know which index entries belong to it. When it is
/// gone there is nothing to go on: the entry stays until the index TTL runs
/// out. When it is live, it is only removed from the originating index, and
/// only if its identifier there no longer matches. Returns the number of
/// entries removed.
async fn cleanup_stale_entry(
    ctx: &OpContext,
    backend: &dyn KvStore,
    tmsi: &str,
    origin: Option<(IndexKind, String)>,
) -> Result<i64> {
    let session_key = keys::session_key(tmsi);
    let bytes = ctx
        .run(async {
            backend
                .get(&session_key)
                .await
                .map_err(Error::store("read session for cleanup"))
        })
        .await?;

    let Some(bytes) = bytes else {
        return Ok(0);
    };
    let record: SessionRecord =
        serde_json::from_slice(&bytes).map_err(Error::serialization("decode session"))?;

    let Some((kind, value)) = origin else {
        return Ok(0);
    };
    if kind.value_of(&record) == value {
        return Ok(0);
    }

    let mut pipe = Pipeline::new();
    pipe.srem(kind.key(&value), tmsi);
    let replies = ctx
        .run(async {
            backend
                .execute(pipe)
                .await
                .map_err(Error::store("clean up index"))
        })
        .await?;

    replies
        .into_iter()
        .map(|reply| reply.into_count("SREM"))
        .sum::<std::result::Result<i64, _>>()
        .map_err(Error::store("clean up index"))
}

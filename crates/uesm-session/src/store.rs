//! Session store: record CRUD, TTL lifecycle and index maintenance.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, trace, warn};

use crate::backend::{KvStore, Pipeline, Reply, SetMode};
use crate::config::SessionConfig;
use crate::context::OpContext;
use crate::error::{Error, Result};
use crate::index::{IndexKind, IndexManager};
use crate::keys;
use crate::record::SessionRecord;
use crate::validation::{require, validate_record};

/// Store for UE session records.
///
/// Holds no lock of its own: every operation is a short sequence of backend
/// round trips and all synchronization comes from per-key atomicity in the
/// backend. Clones share the backend and the index manager.
#[derive(Clone)]
pub struct SessionStore {
    backend: Arc<dyn KvStore>,
    index: IndexManager,
    config: SessionConfig,
}

impl SessionStore {
    /// Create a session store over `backend`.
    pub fn new(backend: Arc<dyn KvStore>, config: SessionConfig) -> Self {
        let index = IndexManager::new(Arc::clone(&backend));
        Self {
            backend,
            index,
            config,
        }
    }

    /// Get the store configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The index manager used by this store.
    pub fn index(&self) -> &IndexManager {
        &self.index
    }

    /// Store a new session.
    ///
    /// Fills `attach_time` when unset and stamps `last_update`. The record is
    /// claimed with a set-if-absent write, so of two concurrent creates for
    /// one TMSI exactly one succeeds. Index registration follows as a second
    /// batch; if that batch fails the record stays, unindexed until its next
    /// renewal. Cancelling `ctx` after the claim has landed does not stop the
    /// registration: the create then completes and returns the record.
    pub async fn create(&self, ctx: &OpContext, mut record: SessionRecord) -> Result<SessionRecord> {
        validate_record(&record)?;

        let now = Utc::now();
        record.attach_time.get_or_insert(now);
        record.last_update = Some(now);

        let payload = encode(&record)?;
        let ttl = self.config.default_ttl;

        let mut claim = Pipeline::new();
        claim.set_with_mode(keys::session_key(&record.tmsi), payload, ttl, SetMode::IfAbsent);
        let replies = self.execute(ctx, claim, "create session").await?;
        if !first_flag(replies, "SET", "create session")? {
            return Err(Error::AlreadyExists(record.tmsi));
        }

        let mut pipe = Pipeline::new();
        self.index.register(&mut pipe, &record, ttl);
        self.execute(&OpContext::new(), pipe, "index session").await?;

        debug!(tmsi = %record.tmsi, imsi = %record.imsi, "Session created");
        Ok(record)
    }

    /// Read a session and, unless `renew_on_read` is off, renew its TTLs.
    ///
    /// A failed renewal is logged and does not fail the read.
    pub async fn get(&self, ctx: &OpContext, tmsi: &str) -> Result<SessionRecord> {
        let record = self.peek(ctx, tmsi).await?;

        if self.config.renew_on_read
            && let Err(err) = self.refresh(ctx, &record).await
        {
            warn!(tmsi = %tmsi, error = %err, "Failed to renew session TTL on read");
        }

        Ok(record)
    }

    /// Read a session without touching its TTLs.
    pub async fn peek(&self, ctx: &OpContext, tmsi: &str) -> Result<SessionRecord> {
        require("tmsi", tmsi)?;
        self.fetch(ctx, tmsi)
            .await?
            .ok_or_else(|| Error::NotFound(tmsi.to_string()))
    }

    /// Replace an existing session.
    ///
    /// Keeps the stored `attach_time`, stamps `last_update`, and moves the
    /// TMSI between index sets for every identifier that changed. The write
    /// only lands if the record still exists; a record that vanished between
    /// the read and the write is reported as not found, not resurrected.
    pub async fn update(&self, ctx: &OpContext, mut record: SessionRecord) -> Result<SessionRecord> {
        validate_record(&record)?;

        let existing = self.peek(ctx, &record.tmsi).await?;
        record.attach_time = existing.attach_time;
        record.last_update = Some(Utc::now());

        let payload = encode(&record)?;
        let ttl = self.config.default_ttl;

        let mut pipe = Pipeline::new();
        pipe.set_with_mode(keys::session_key(&record.tmsi), payload, ttl, SetMode::IfPresent);
        self.index.reindex(&mut pipe, &existing, &record, ttl);

        let replies = self.execute(ctx, pipe, "update session").await?;
        if !first_flag(replies, "SET", "update session")? {
            return Err(Error::NotFound(record.tmsi));
        }

        debug!(
            tmsi = %record.tmsi,
            imsi_changed = existing.imsi != record.imsi,
            msisdn_changed = existing.msisdn != record.msisdn,
            "Session updated"
        );
        Ok(record)
    }

    /// Remove a session and its index entries.
    pub async fn delete(&self, ctx: &OpContext, tmsi: &str) -> Result<()> {
        let existing = self.peek(ctx, tmsi).await?;

        let mut pipe = Pipeline::new();
        pipe.del(keys::session_key(tmsi));
        self.index.unregister(&mut pipe, &existing);

        let replies = self.execute(ctx, pipe, "delete session").await?;
        let removed = replies
            .into_iter()
            .next()
            .map(|reply| reply.into_count("DEL"))
            .transpose()
            .map_err(Error::store("delete session"))?
            .unwrap_or(0);
        if removed == 0 {
            // Lost a race with another delete or with expiry.
            return Err(Error::NotFound(tmsi.to_string()));
        }

        debug!(tmsi = %tmsi, "Session deleted");
        Ok(())
    }

    /// All live sessions carrying `imsi`.
    pub async fn query_by_imsi(&self, ctx: &OpContext, imsi: &str) -> Result<Vec<SessionRecord>> {
        self.query_index(ctx, IndexKind::Imsi, imsi).await
    }

    /// All live sessions carrying `msisdn`.
    pub async fn query_by_msisdn(
        &self,
        ctx: &OpContext,
        msisdn: &str,
    ) -> Result<Vec<SessionRecord>> {
        self.query_index(ctx, IndexKind::Msisdn, msisdn).await
    }

    /// Live sessions for an explicit list of TMSIs. Unknown TMSIs are skipped.
    pub async fn query_by_multiple(
        &self,
        ctx: &OpContext,
        tmsis: &[String],
    ) -> Result<Vec<SessionRecord>> {
        self.index.resolve(ctx, tmsis, None).await
    }

    /// Sessions matching `imsi`, `msisdn`, or both (merged), ordered by TMSI.
    pub async fn query_sessions(
        &self,
        ctx: &OpContext,
        imsi: Option<&str>,
        msisdn: Option<&str>,
    ) -> Result<Vec<SessionRecord>> {
        let imsi = imsi.filter(|v| !v.is_empty());
        let msisdn = msisdn.filter(|v| !v.is_empty());
        if imsi.is_none() && msisdn.is_none() {
            return Err(Error::validation("query", "imsi or msisdn is required"));
        }

        let mut merged = BTreeMap::new();
        if let Some(imsi) = imsi {
            for record in self.query_by_imsi(ctx, imsi).await? {
                merged.insert(record.tmsi.clone(), record);
            }
        }
        if let Some(msisdn) = msisdn {
            for record in self.query_by_msisdn(ctx, msisdn).await? {
                merged.insert(record.tmsi.clone(), record);
            }
        }

        Ok(merged.into_values().collect())
    }

    /// Extend the record and index TTLs to the default window.
    ///
    /// Content and timestamps are untouched, so repeated renewals only move
    /// the expiry horizon.
    pub async fn renew_ttl(&self, ctx: &OpContext, tmsi: &str) -> Result<()> {
        let record = self.peek(ctx, tmsi).await?;
        self.refresh(ctx, &record).await?;
        trace!(tmsi = %tmsi, "Session TTL renewed");
        Ok(())
    }

    /// Reset TTLs for `record` and re-assert its index membership.
    async fn refresh(&self, ctx: &OpContext, record: &SessionRecord) -> Result<()> {
        let ttl = self.config.default_ttl;
        let mut pipe = Pipeline::new();
        pipe.expire(keys::session_key(&record.tmsi), ttl);
        self.index.refresh(&mut pipe, record, ttl);

        let replies = self.execute(ctx, pipe, "renew TTL").await?;
        if !first_flag(replies, "EXPIRE", "renew TTL")? {
            return Err(Error::NotFound(record.tmsi.clone()));
        }
        Ok(())
    }

    async fn query_index(
        &self,
        ctx: &OpContext,
        kind: IndexKind,
        value: &str,
    ) -> Result<Vec<SessionRecord>> {
        require(kind.field(), value)?;

        let tmsis = self.index.members(ctx, kind, value).await?;
        if tmsis.is_empty() {
            return Ok(Vec::new());
        }

        let records = self.index.resolve(ctx, &tmsis, Some((kind, value))).await?;
        trace!(
            index = %kind,
            indexed = tmsis.len(),
            live = records.len(),
            "Index query resolved"
        );
        Ok(records)
    }

    async fn fetch(&self, ctx: &OpContext, tmsi: &str) -> Result<Option<SessionRecord>> {
        let key = keys::session_key(tmsi);
        let bytes = ctx
            .run(async {
                self.backend
                    .get(&key)
                    .await
                    .map_err(Error::store("get session"))
            })
            .await?;

        bytes
            .map(|bytes| serde_json::from_slice(&bytes).map_err(Error::serialization("decode session")))
            .transpose()
    }

    async fn execute(
        &self,
        ctx: &OpContext,
        pipe: Pipeline,
        op: &'static str,
    ) -> Result<Vec<Reply>> {
        ctx.run(async { self.backend.execute(pipe).await.map_err(Error::store(op)) })
            .await
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("config", &self.config)
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}

fn encode(record: &SessionRecord) -> Result<Vec<u8>> {
    serde_json::to_vec(record).map_err(Error::serialization("encode session"))
}

/// The flag reply of the first command in a batch.
fn first_flag(replies: Vec<Reply>, command: &'static str, op: &'static str) -> Result<bool> {
    replies
        .into_iter()
        .next()
        .map(|reply| reply.into_flag(command))
        .transpose()
        .map_err(Error::store(op))
        .map(|flag| flag.unwrap_or(false))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryStore;
    use crate::record::{SecurityContext, UeState};
    use std::time::Duration;
    use tokio::time::sleep;

    const IMSI: &str = "123456789012345";
    const MSISDN: &str = "1234567890";

    fn store_with(config: SessionConfig) -> (SessionStore, MemoryStore) {
        let backend = MemoryStore::new();
        let store = SessionStore::new(Arc::new(backend.clone()), config);
        (store, backend)
    }

    fn store() -> (SessionStore, MemoryStore) {
        store_with(SessionConfig::default())
    }

    fn sample(tmsi: &str) -> SessionRecord {
        SessionRecord::new(tmsi, IMSI, MSISDN)
            .with_gnb_id("gNB001")
            .with_tai("TAI001")
            .with_capabilities(["5G", "4G"])
            .with_security_context(SecurityContext {
                kamf: Some("test-kamf".into()),
                algorithm: Some("AES".into()),
                keyset_id: Some("1".into()),
                next_hop_chaining_count: 1,
            })
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let (store, _) = store();
        let ctx = OpContext::new();

        let input = sample("12345678");
        store.create(&ctx, input.clone()).await.unwrap();

        let fetched = store.get(&ctx, "12345678").await.unwrap();
        assert!(fetched.same_content(&input));
        assert!(fetched.attach_time.is_some());
        assert!(fetched.last_update.is_some());
    }

    #[tokio::test]
    async fn test_create_defaults_state() {
        let (store, _) = store();
        let ctx = OpContext::new();

        let created = store
            .create(&ctx, SessionRecord::new("12345678", IMSI, MSISDN))
            .await
            .unwrap();
        assert_eq!(created.ue_state, UeState::Registered);
        assert!(created.capabilities.is_empty());
    }

    #[tokio::test]
    async fn test_create_keeps_caller_attach_time() {
        let (store, _) = store();
        let ctx = OpContext::new();
        let attached = Utc::now() - chrono::Duration::minutes(5);

        let created = store
            .create(&ctx, sample("12345678").with_attach_time(attached))
            .await
            .unwrap();
        assert_eq!(created.attach_time, Some(attached));
        assert!(created.last_update.unwrap() > attached);
    }

    #[tokio::test]
    async fn test_duplicate_create_rejected() {
        let (store, _) = store();
        let ctx = OpContext::new();

        store.create(&ctx, sample("12345678")).await.unwrap();
        let err = store.create(&ctx, sample("12345678")).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(ref t) if t == "12345678"));
    }

    #[tokio::test]
    async fn test_create_validation() {
        let (store, backend) = store();
        let ctx = OpContext::new();

        let err = store
            .create(&ctx, SessionRecord::new("123", IMSI, MSISDN))
            .await
            .unwrap_err();
        assert_eq!(err.field(), Some("tmsi"));
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn test_create_registers_indexes_with_ttl() {
        let (store, backend) = store();
        let ctx = OpContext::new();
        store.create(&ctx, sample("12345678")).await.unwrap();

        let imsi_key = keys::imsi_index_key(IMSI);
        let msisdn_key = keys::msisdn_index_key(MSISDN);
        assert_eq!(backend.smembers(&imsi_key).await.unwrap(), vec!["12345678"]);
        assert_eq!(backend.smembers(&msisdn_key).await.unwrap(), vec!["12345678"]);
        assert!(backend.ttl(&imsi_key).is_some());
        assert!(backend.ttl(&msisdn_key).is_some());
    }

    #[tokio::test]
    async fn test_get_missing() {
        let (store, _) = store();
        let err = store.get(&OpContext::new(), "nonexistent").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_get_empty_tmsi() {
        let (store, _) = store();
        let err = store.get(&OpContext::new(), "").await.unwrap_err();
        assert_eq!(err.field(), Some("tmsi"));
    }

    #[tokio::test]
    async fn test_get_renews_ttl() {
        let config = SessionConfig::new()
            .with_min_ttl(Duration::from_millis(10))
            .with_default_ttl(Duration::from_millis(150));
        let (store, backend) = store_with(config);
        let ctx = OpContext::new();
        store.create(&ctx, sample("12345678")).await.unwrap();

        sleep(Duration::from_millis(100)).await;
        store.get(&ctx, "12345678").await.unwrap();
        sleep(Duration::from_millis(100)).await;

        // 200ms after create, alive only because the read renewed it.
        assert!(backend.contains(&keys::session_key("12345678")));
        assert!(backend.contains(&keys::imsi_index_key(IMSI)));
    }

    #[tokio::test]
    async fn test_peek_and_read_only_get_do_not_renew() {
        let config = SessionConfig::new()
            .with_min_ttl(Duration::from_millis(10))
            .with_default_ttl(Duration::from_millis(150))
            .with_renew_on_read(false);
        let (store, _) = store_with(config);
        let ctx = OpContext::new();
        store.create(&ctx, sample("12345678")).await.unwrap();

        sleep(Duration::from_millis(100)).await;
        store.get(&ctx, "12345678").await.unwrap();
        store.peek(&ctx, "12345678").await.unwrap();
        sleep(Duration::from_millis(100)).await;

        assert!(store.get(&ctx, "12345678").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_expired_session_is_not_found() {
        let config = SessionConfig::new()
            .with_min_ttl(Duration::from_millis(10))
            .with_default_ttl(Duration::from_millis(40));
        let (store, _) = store_with(config);
        let ctx = OpContext::new();
        store.create(&ctx, sample("12345678")).await.unwrap();

        sleep(Duration::from_millis(80)).await;

        assert!(store.get(&ctx, "12345678").await.unwrap_err().is_not_found());
        assert!(store.query_by_imsi(&ctx, IMSI).await.unwrap().is_empty());
        // Expiry frees the TMSI for a new create.
        store.create(&ctx, sample("12345678")).await.unwrap();
    }

    #[tokio::test]
    async fn test_update_preserves_attach_time() {
        let (store, _) = store();
        let ctx = OpContext::new();
        let created = store.create(&ctx, sample("12345678")).await.unwrap();

        let mut changed = sample("12345678").with_gnb_id("gNB002");
        changed.attach_time = None;
        let updated = store.update(&ctx, changed).await.unwrap();

        assert_eq!(updated.attach_time, created.attach_time);
        assert!(updated.last_update >= created.last_update);

        let fetched = store.get(&ctx, "12345678").await.unwrap();
        assert_eq!(fetched.gnb_id.as_deref(), Some("gNB002"));
        assert_eq!(fetched.attach_time, created.attach_time);
    }

    #[tokio::test]
    async fn test_update_missing() {
        let (store, backend) = store();
        let err = store
            .update(&OpContext::new(), sample("12345678"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn test_update_validates_like_create() {
        let (store, _) = store();
        let ctx = OpContext::new();
        store.create(&ctx, sample("12345678")).await.unwrap();

        let err = store
            .update(&ctx, SessionRecord::new("12345678", "12345", MSISDN))
            .await
            .unwrap_err();
        assert_eq!(err.field(), Some("imsi"));
    }

    #[tokio::test]
    async fn test_update_moves_indexes() {
        let (store, backend) = store();
        let ctx = OpContext::new();
        store.create(&ctx, sample("12345678")).await.unwrap();

        let moved = SessionRecord::new("12345678", "999999999999999", "9999999999");
        store.update(&ctx, moved).await.unwrap();

        assert!(store.query_by_imsi(&ctx, IMSI).await.unwrap().is_empty());
        assert!(store.query_by_msisdn(&ctx, MSISDN).await.unwrap().is_empty());
        assert_eq!(store.query_by_imsi(&ctx, "999999999999999").await.unwrap().len(), 1);
        assert_eq!(store.query_by_msisdn(&ctx, "9999999999").await.unwrap().len(), 1);

        // Old sets held only this TMSI and are gone.
        assert!(!backend.contains(&keys::imsi_index_key(IMSI)));
        assert!(!backend.contains(&keys::msisdn_index_key(MSISDN)));
    }

    #[tokio::test]
    async fn test_delete() {
        let (store, backend) = store();
        let ctx = OpContext::new();
        store.create(&ctx, sample("12345678")).await.unwrap();

        store.delete(&ctx, "12345678").await.unwrap();

        assert!(store.get(&ctx, "12345678").await.unwrap_err().is_not_found());
        assert!(backend.smembers(&keys::imsi_index_key(IMSI)).await.unwrap().is_empty());
        assert!(backend.smembers(&keys::msisdn_index_key(MSISDN)).await.unwrap().is_empty());
        assert!(store.delete(&ctx, "12345678").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_delete_keeps_other_members() {
        let (store, backend) = store();
        let ctx = OpContext::new();
        store.create(&ctx, sample("tmsi-a")).await.unwrap();
        store.create(&ctx, sample("tmsi-b")).await.unwrap();

        store.delete(&ctx, "tmsi-a").await.unwrap();

        assert_eq!(
            backend.smembers(&keys::imsi_index_key(IMSI)).await.unwrap(),
            vec!["tmsi-b"]
        );
    }

    #[tokio::test]
    async fn test_query_shared_imsi() {
        let (store, _) = store();
        let ctx = OpContext::new();
        store.create(&ctx, sample("tmsi-b")).await.unwrap();
        store.create(&ctx, sample("tmsi-a")).await.unwrap();
        store
            .create(
                &ctx,
                SessionRecord::new("tmsi-c", "555555555555555", "5555555555"),
            )
            .await
            .unwrap();

        let mut found: Vec<_> = store
            .query_by_imsi(&ctx, IMSI)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.tmsi)
            .collect();
        found.sort();
        assert_eq!(found, vec!["tmsi-a", "tmsi-b"]);
    }

    #[tokio::test]
    async fn test_query_unknown_and_empty() {
        let (store, _) = store();
        let ctx = OpContext::new();

        assert!(store.query_by_imsi(&ctx, IMSI).await.unwrap().is_empty());
        assert!(store.query_by_msisdn(&ctx, MSISDN).await.unwrap().is_empty());

        let err = store.query_by_imsi(&ctx, "").await.unwrap_err();
        assert_eq!(err.field(), Some("imsi"));
        let err = store.query_by_msisdn(&ctx, "").await.unwrap_err();
        assert_eq!(err.field(), Some("msisdn"));
    }

    #[tokio::test]
    async fn test_query_sessions_merges() {
        let (store, _) = store();
        let ctx = OpContext::new();
        store.create(&ctx, sample("tmsi-a")).await.unwrap();
        store
            .create(&ctx, SessionRecord::new("tmsi-b", "555555555555555", MSISDN))
            .await
            .unwrap();

        let by_both = store
            .query_sessions(&ctx, Some(IMSI), Some(MSISDN))
            .await
            .unwrap();
        let tmsis: Vec<_> = by_both.iter().map(|r| r.tmsi.as_str()).collect();
        assert_eq!(tmsis, vec!["tmsi-a", "tmsi-b"]);

        let by_imsi = store.query_sessions(&ctx, Some(IMSI), None).await.unwrap();
        assert_eq!(by_imsi.len(), 1);

        let err = store.query_sessions(&ctx, None, Some("")).await.unwrap_err();
        assert_eq!(err.field(), Some("query"));
    }

    #[tokio::test]
    async fn test_query_by_multiple() {
        let (store, _) = store();
        let ctx = OpContext::new();
        store.create(&ctx, sample("tmsi-a")).await.unwrap();

        let records = store
            .query_by_multiple(&ctx, &["tmsi-a".to_string(), "tmsi-zz".to_string()])
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert!(store.query_by_multiple(&ctx, &[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_renew_ttl_is_content_idempotent() {
        let config = SessionConfig::new()
            .with_min_ttl(Duration::from_millis(10))
            .with_default_ttl(Duration::from_millis(150));
        let (store, backend) = store_with(config);
        let ctx = OpContext::new();
        store.create(&ctx, sample("12345678")).await.unwrap();
        let before = store.peek(&ctx, "12345678").await.unwrap();

        for _ in 0..3 {
            sleep(Duration::from_millis(60)).await;
            store.renew_ttl(&ctx, "12345678").await.unwrap();
        }

        // 180ms after create: alive, unchanged.
        let after = store.peek(&ctx, "12345678").await.unwrap();
        assert_eq!(after, before);
        assert!(backend.contains(&keys::msisdn_index_key(MSISDN)));
    }

    #[tokio::test]
    async fn test_renew_missing() {
        let (store, _) = store();
        let err = store
            .renew_ttl(&OpContext::new(), "12345678")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_renew_restores_lost_index_entry() {
        let (store, backend) = store();
        let ctx = OpContext::new();
        store.create(&ctx, sample("12345678")).await.unwrap();

        let mut pipe = Pipeline::new();
        pipe.del(keys::imsi_index_key(IMSI));
        backend.execute(pipe).await.unwrap();
        assert!(store.query_by_imsi(&ctx, IMSI).await.unwrap().is_empty());

        store.renew_ttl(&ctx, "12345678").await.unwrap();
        assert_eq!(store.query_by_imsi(&ctx, IMSI).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_context() {
        let (store, backend) = store();
        let ctx = OpContext::new();
        ctx.cancel();

        let err = store.create(&ctx, sample("12345678")).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert!(backend.is_empty());

        let err = store.get(&ctx, "12345678").await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }
}

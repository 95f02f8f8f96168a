//! Demo command - walk one session through its whole lifecycle.

use std::sync::Arc;

use anyhow::{Context as _, Result, anyhow, bail};
use clap::Args;
use tracing::{debug, info};

use uesm_config::{BackendKind, SessionSection, StoreConfig};
use uesm_session::{
    Error, KvStore, MemoryStore, OpContext, SessionConfig, SessionRecord, SessionStore, UeState,
};

use super::Context;

/// Arguments for the demo command.
#[derive(Args, Debug)]
pub struct DemoArgs {
    /// TMSI of the demo session
    #[arg(long, default_value = "12345678")]
    pub tmsi: String,

    /// IMSI of the demo session
    #[arg(long, default_value = "123456789012345")]
    pub imsi: String,

    /// MSISDN of the demo session
    #[arg(long, default_value = "1234567890")]
    pub msisdn: String,
}

/// Run the demo command.
pub async fn run(args: DemoArgs, ctx: &Context) -> Result<()> {
    let config = ctx.config();
    config.validate()?;

    let store_config = config.store();
    let backend = open_backend(&store_config).await?;
    let session_config = session_config(&config.session());
    session_config.validate()?;
    info!(backend = %store_config.backend, "Session store ready");

    let store = SessionStore::new(backend, session_config);
    let op = OpContext::new();
    let cancel = op.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let mut report = Report::new(ctx.json_output);
    let result = walk(&store, &op, &args, &mut report).await;
    store.index().flush_cleanups().await;
    result?;

    report.finish()
}

async fn walk(
    store: &SessionStore,
    op: &OpContext,
    args: &DemoArgs,
    report: &mut Report,
) -> Result<()> {
    let tmsi = args.tmsi.as_str();

    let record = SessionRecord::new(tmsi, &args.imsi, &args.msisdn)
        .with_gnb_id("gNB001")
        .with_tai("TAI001")
        .with_capabilities(["5G", "4G"]);
    let created = store
        .create(op, record.clone())
        .await
        .with_context(|| format!("creating session {tmsi}"))?;
    report.step("create", &created, format!("{tmsi} attached"));

    let fetched = store.get(op, tmsi).await?;
    report.step("get", &fetched, format!("{tmsi} is {}", fetched.ue_state));

    match store.create(op, record).await {
        Err(err @ Error::AlreadyExists(_)) => {
            report.note("duplicate", format!("rejected: {err}"));
        }
        Err(err) => return Err(err.into()),
        Ok(_) => bail!("duplicate create of {tmsi} was accepted"),
    }

    let updated = store
        .update(
            op,
            fetched.with_state(UeState::Connected).with_gnb_id("gNB002"),
        )
        .await?;
    report.step(
        "update",
        &updated,
        format!("{tmsi} is {} at gNB002", updated.ue_state),
    );

    let by_imsi = store.query_by_imsi(op, &args.imsi).await?;
    report.note(
        "query",
        format!("{} session(s) for IMSI {}", by_imsi.len(), args.imsi),
    );

    let merged = store
        .query_sessions(op, Some(&args.imsi), Some(&args.msisdn))
        .await?;
    report.note(
        "merge",
        format!("{} session(s) for IMSI or MSISDN", merged.len()),
    );

    store.renew_ttl(op, tmsi).await?;
    report.note(
        "renew",
        format!("TTL reset to {}s", store.config().default_ttl.as_secs()),
    );

    store.delete(op, tmsi).await?;
    report.note("delete", format!("{tmsi} removed"));

    match store.peek(op, tmsi).await {
        Err(err) if err.is_not_found() => {
            report.note("verify", format!("{tmsi} no longer found"));
        }
        Err(err) => return Err(err.into()),
        Ok(_) => bail!("{tmsi} still present after delete"),
    }

    Ok(())
}

fn session_config(section: &SessionSection) -> SessionConfig {
    SessionConfig::new()
        .with_default_ttl(section.default_ttl())
        .with_max_ttl(section.max_ttl())
        .with_min_ttl(section.min_ttl())
        .with_renew_on_read(section.renew_on_read)
}

async fn open_backend(store: &StoreConfig) -> Result<Arc<dyn KvStore>> {
    match store.backend {
        BackendKind::Memory => Ok(Arc::new(MemoryStore::new())),
        BackendKind::Redis => {
            let url = store
                .url
                .as_deref()
                .ok_or_else(|| anyhow!("store.url is required for the redis backend"))?;
            open_redis(url).await
        }
    }
}

#[cfg(feature = "redis")]
async fn open_redis(url: &str) -> Result<Arc<dyn KvStore>> {
    let redis = uesm_session::RedisStore::connect(url)
        .await
        .with_context(|| format!("connecting to {url}"))?;
    redis.ping().await?;
    debug!(url = %url, "Redis reachable");
    Ok(Arc::new(redis))
}

#[cfg(not(feature = "redis"))]
async fn open_redis(url: &str) -> Result<Arc<dyn KvStore>> {
    debug!(url = %url, "Redis backend requested");
    bail!("this build has no redis support; rebuild uesm with `--features redis`")
}

/// Collects demo steps and prints them as text lines or one JSON document.
struct Report {
    json: bool,
    steps: Vec<serde_json::Value>,
}

impl Report {
    fn new(json: bool) -> Self {
        Self {
            json,
            steps: Vec::new(),
        }
    }

    fn step(&mut self, name: &str, record: &SessionRecord, detail: String) {
        if self.json {
            self.steps.push(serde_json::json!({
                "step": name,
                "detail": detail,
                "session": record,
            }));
        } else {
            println!("✓ {name:<10} {detail}");
        }
    }

    fn note(&mut self, name: &str, detail: String) {
        if self.json {
            self.steps
                .push(serde_json::json!({ "step": name, "detail": detail }));
        } else {
            println!("✓ {name:<10} {detail}");
        }
    }

    fn finish(self) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(&self.steps)?);
        }
        Ok(())
    }
}

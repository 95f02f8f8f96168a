//! UE session store with TTL lifecycle and secondary indexes.
//!
//! This crate keeps transient UE session records keyed by TMSI in a shared
//! key-value store, with:
//! - Automatic expiry of records after a configurable window
//! - Keep-alive on read and explicit TTL renewal
//! - Reverse lookup by IMSI and MSISDN through set-valued indexes
//! - Read-time filtering and lazy cleanup of stale index entries
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use uesm_session::{MemoryStore, OpContext, SessionConfig, SessionRecord, SessionStore};
//!
//! let store = SessionStore::new(Arc::new(MemoryStore::new()), SessionConfig::default());
//! let ctx = OpContext::new();
//!
//! store
//!     .create(&ctx, SessionRecord::new("12345678", "123456789012345", "1234567890"))
//!     .await?;
//! let sessions = store.query_by_imsi(&ctx, "123456789012345").await?;
//! ```

pub mod backend;
mod config;
mod context;
mod error;
mod index;
pub mod keys;
mod record;
mod store;
pub mod validation;

pub use backend::{Command, KvStore, MemoryStore, Pipeline, Reply, SetMode, StoreError, StoreResult};
#[cfg(feature = "redis")]
pub use backend::RedisStore;
pub use config::SessionConfig;
pub use context::OpContext;
pub use error::{Error, Result};
pub use index::{IndexKind, IndexManager};
pub use record::{SecurityContext, SessionRecord, UeState};
pub use store::SessionStore;

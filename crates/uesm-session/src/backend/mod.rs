//! Key-value backend contract.
//!
//! The session store needs very little from its backend: strings with a TTL,
//! sets of strings, per-key expiry refresh, and pipelined execution of a
//! batch of such commands. [`KvStore`] captures exactly that, so the store
//! can run against Redis in production and [`MemoryStore`] in tests.
//!
//! A pipeline is a network batch, not a transaction. Each command executes
//! on its own; a failing command does not stop the ones after it, and other
//! clients may interleave their commands between any two of ours.

use std::time::Duration;

use async_trait::async_trait;

mod memory;
#[cfg(feature = "redis")]
mod redis_store;

pub use memory::MemoryStore;
#[cfg(feature = "redis")]
pub use redis_store::RedisStore;

/// Error type for backend operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The backend could not be reached or the connection broke.
    #[error("connection error: {0}")]
    Connection(String),

    /// A command was applied to a key holding the other kind of value.
    #[error("wrong kind of value at key '{0}'")]
    WrongType(String),

    /// A reply did not have the shape its command implies.
    #[error("unexpected reply to {command}: {reply}")]
    UnexpectedReply { command: &'static str, reply: String },

    /// The backend rejected the command.
    #[error("backend error: {0}")]
    Backend(String),
}

/// Result type for backend operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Condition attached to a `Set` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetMode {
    /// Write unconditionally.
    Always,
    /// Write only if the key does not exist (`NX`).
    IfAbsent,
    /// Write only if the key already exists (`XX`).
    IfPresent,
}

/// A single backend command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Store a value with a TTL. Replies [`Reply::Flag`] (written or not).
    Set {
        key: String,
        value: Vec<u8>,
        ttl: Duration,
        mode: SetMode,
    },
    /// Read a value. Replies [`Reply::Value`].
    Get { key: String },
    /// Remove a key. Replies [`Reply::Count`].
    Del { key: String },
    /// Add a member to a set, creating it without expiry. Replies [`Reply::Count`].
    SAdd { key: String, member: String },
    /// Remove a member from a set; an emptied set is removed. Replies [`Reply::Count`].
    SRem { key: String, member: String },
    /// List the members of a set. Replies [`Reply::Members`].
    SMembers { key: String },
    /// Reset a key's TTL; zero removes the key. Replies [`Reply::Flag`] (key existed).
    Expire { key: String, ttl: Duration },
}

impl Command {
    /// Command name as the backend knows it.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Set { .. } => "SET",
            Command::Get { .. } => "GET",
            Command::Del { .. } => "DEL",
            Command::SAdd { .. } => "SADD",
            Command::SRem { .. } => "SREM",
            Command::SMembers { .. } => "SMEMBERS",
            Command::Expire { .. } => "EXPIRE",
        }
    }

    /// The key the command targets.
    pub fn key(&self) -> &str {
        match self {
            Command::Set { key, .. }
            | Command::Get { key }
            | Command::Del { key }
            | Command::SAdd { key, .. }
            | Command::SRem { key, .. }
            | Command::SMembers { key }
            | Command::Expire { key, .. } => key,
        }
    }
}

/// Reply to a single command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Value of a `Get`.
    Value(Option<Vec<u8>>),
    /// Outcome of a `Set` or `Expire`.
    Flag(bool),
    /// Number of keys or members affected.
    Count(i64),
    /// Members of a set.
    Members(Vec<String>),
}

impl Reply {
    pub fn into_value(self, command: &'static str) -> StoreResult<Option<Vec<u8>>> {
        match self {
            Reply::Value(value) => Ok(value),
            other => Err(other.unexpected(command)),
        }
    }

    pub fn into_flag(self, command: &'static str) -> StoreResult<bool> {
        match self {
            Reply::Flag(flag) => Ok(flag),
            other => Err(other.unexpected(command)),
        }
    }

    pub fn into_count(self, command: &'static str) -> StoreResult<i64> {
        match self {
            Reply::Count(count) => Ok(count),
            other => Err(other.unexpected(command)),
        }
    }

    pub fn into_members(self, command: &'static str) -> StoreResult<Vec<String>> {
        match self {
            Reply::Members(members) => Ok(members),
            other => Err(other.unexpected(command)),
        }
    }

    fn unexpected(&self, command: &'static str) -> StoreError {
        StoreError::UnexpectedReply {
            command,
            reply: format!("{self:?}"),
        }
    }
}

/// An ordered batch of commands sent in one round trip.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pipeline {
    commands: Vec<Command>,
}

impl Pipeline {
    /// Create an empty pipeline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an arbitrary command.
    pub fn push(&mut self, command: Command) -> &mut Self {
        self.commands.push(command);
        self
    }

    /// Queue an unconditional `SET` with TTL.
    pub fn set(&mut self, key: impl Into<String>, value: Vec<u8>, ttl: Duration) -> &mut Self {
        self.set_with_mode(key, value, ttl, SetMode::Always)
    }

    /// Queue a `SET` with TTL and a write condition.
    pub fn set_with_mode(
        &mut self,
        key: impl Into<String>,
        value: Vec<u8>,
        ttl: Duration,
        mode: SetMode,
    ) -> &mut Self {
        self.push(Command::Set {
            key: key.into(),
            value,
            ttl,
            mode,
        })
    }

    pub fn get(&mut self, key: impl Into<String>) -> &mut Self {
        self.push(Command::Get { key: key.into() })
    }

    pub fn del(&mut self, key: impl Into<String>) -> &mut Self {
        self.push(Command::Del { key: key.into() })
    }

    pub fn sadd(&mut self, key: impl Into<String>, member: impl Into<String>) -> &mut Self {
        self.push(Command::SAdd {
            key: key.into(),
            member: member.into(),
        })
    }

    pub fn srem(&mut self, key: impl Into<String>, member: impl Into<String>) -> &mut Self {
        self.push(Command::SRem {
            key: key.into(),
            member: member.into(),
        })
    }

    pub fn smembers(&mut self, key: impl Into<String>) -> &mut Self {
        self.push(Command::SMembers { key: key.into() })
    }

    pub fn expire(&mut self, key: impl Into<String>, ttl: Duration) -> &mut Self {
        self.push(Command::Expire {
            key: key.into(),
            ttl,
        })
    }

    /// Number of queued commands.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Check if no commands are queued.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// The queued commands, in order.
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Consume the pipeline into its commands.
    pub fn into_commands(self) -> Vec<Command> {
        self.commands
    }
}

/// A key-value backend with per-key expiry and pipelined execution.
///
/// Implementations must be safe to share between tasks; the session store
/// never serializes access to them.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Execute a batch of commands, returning one reply per command in order.
    ///
    /// Every command is attempted even when an earlier one fails; the first
    /// failure is then returned for the whole batch. Commands that executed
    /// before or after the failing one keep their effect.
    async fn execute(&self, pipeline: Pipeline) -> StoreResult<Vec<Reply>>;

    /// Read a single value.
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let mut pipe = Pipeline::new();
        pipe.get(key);
        single_reply(self.execute(pipe).await?, "GET")?.into_value("GET")
    }

    /// List the members of a single set.
    async fn smembers(&self, key: &str) -> StoreResult<Vec<String>> {
        let mut pipe = Pipeline::new();
        pipe.smembers(key);
        single_reply(self.execute(pipe).await?, "SMEMBERS")?.into_members("SMEMBERS")
    }
}

fn single_reply(replies: Vec<Reply>, command: &'static str) -> StoreResult<Reply> {
    let count = replies.len();
    let mut replies = replies.into_iter();
    match (replies.next(), count) {
        (Some(reply), 1) => Ok(reply),
        _ => Err(StoreError::UnexpectedReply {
            command,
            reply: format!("{count} replies"),
        }),
    }
}

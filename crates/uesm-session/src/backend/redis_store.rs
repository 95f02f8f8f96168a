//! Redis backend.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{FromRedisValue, RedisError, Value};
use tracing::debug;

use super::{Command, KvStore, Pipeline, Reply, SetMode, StoreError, StoreResult};

/// [`KvStore`] over a shared, auto-reconnecting Redis connection.
///
/// A [`Pipeline`] is sent as one `redis::Pipeline` (not `MULTI`/`EXEC`), so
/// it costs a single round trip and stays non-transactional.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Connect to `url` (e.g. `redis://127.0.0.1:6379/0`).
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let client = redis::Client::open(url).map_err(connection_error)?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(connection_error)?;
        debug!(url = %url, "Connected to Redis");
        Ok(Self { conn })
    }

    /// Wrap an existing connection manager.
    pub fn from_connection(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    /// Round-trip a `PING`.
    pub async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map(|_| ())
            .map_err(map_error)
    }
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").finish_non_exhaustive()
    }
}

#[async_trait]
impl KvStore for RedisStore {
    async fn execute(&self, pipeline: Pipeline) -> StoreResult<Vec<Reply>> {
        if pipeline.is_empty() {
            return Ok(Vec::new());
        }

        let commands = pipeline.into_commands();
        let mut pipe = redis::pipe();
        for command in &commands {
            encode(&mut pipe, command);
        }

        let mut conn = self.conn.clone();
        let values: Vec<Value> = pipe.query_async(&mut conn).await.map_err(map_error)?;
        if values.len() != commands.len() {
            return Err(StoreError::UnexpectedReply {
                command: "pipeline",
                reply: format!("{} replies for {} commands", values.len(), commands.len()),
            });
        }

        commands
            .iter()
            .zip(values.iter())
            .map(|(command, value)| decode(command, value))
            .collect()
    }
}

fn encode(pipe: &mut redis::Pipeline, command: &Command) {
    match command {
        Command::Set {
            key,
            value,
            ttl,
            mode,
        } => {
            let cmd = pipe
                .cmd("SET")
                .arg(key)
                .arg(value.as_slice())
                .arg("PX")
                .arg(millis(*ttl));
            match mode {
                SetMode::Always => {}
                SetMode::IfAbsent => {
                    cmd.arg("NX");
                }
                SetMode::IfPresent => {
                    cmd.arg("XX");
                }
            }
        }
        Command::Get { key } => {
            pipe.cmd("GET").arg(key);
        }
        Command::Del { key } => {
            pipe.cmd("DEL").arg(key);
        }
        Command::SAdd { key, member } => {
            pipe.cmd("SADD").arg(key).arg(member);
        }
        Command::SRem { key, member } => {
            pipe.cmd("SREM").arg(key).arg(member);
        }
        Command::SMembers { key } => {
            pipe.cmd("SMEMBERS").arg(key);
        }
        Command::Expire { key, ttl } => {
            pipe.cmd("PEXPIRE").arg(key).arg(millis(*ttl));
        }
    }
}

fn decode(command: &Command, value: &Value) -> StoreResult<Reply> {
    let name = command.name();
    match command {
        // SET ... NX/XX answers nil when the condition fails.
        Command::Set { .. } => Ok(Reply::Flag(!matches!(value, Value::Nil))),
        Command::Get { .. } => convert::<Option<Vec<u8>>>(value, name).map(Reply::Value),
        Command::Del { .. } | Command::SAdd { .. } | Command::SRem { .. } => {
            convert::<i64>(value, name).map(Reply::Count)
        }
        Command::SMembers { .. } => convert::<Vec<String>>(value, name).map(Reply::Members),
        Command::Expire { .. } => convert::<bool>(value, name).map(Reply::Flag),
    }
}

fn convert<T: FromRedisValue>(value: &Value, command: &'static str) -> StoreResult<T> {
    redis::from_redis_value(value).map_err(|err| StoreError::UnexpectedReply {
        command,
        reply: err.to_string(),
    })
}

fn millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX)
}

fn connection_error(err: RedisError) -> StoreError {
    StoreError::Connection(err.to_string())
}

fn map_error(err: RedisError) -> StoreError {
    if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
        StoreError::Connection(err.to_string())
    } else if err.code() == Some("WRONGTYPE") {
        StoreError::WrongType(err.to_string())
    } else {
        StoreError::Backend(err.to_string())
    }
}

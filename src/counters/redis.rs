use std::time::Duration;

use ::redis::aio::ConnectionManager;
use ::redis::{Client, Script};
use async_trait::async_trait;
use tracing::info;

use super::{CounterError, CounterStore, WindowCount};

/// INCR and arm the expiry in one server-side step. Returns `{count, ttl_ms}`.
/// A key that somehow lost its TTL gets one re-armed instead of living forever.
const INCREMENT_IN_WINDOW: &str = r#"
local current = redis.call('INCR', KEYS[1])
local ttl = redis.call('PTTL', KEYS[1])
if current == 1 or ttl < 0 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
    ttl = tonumber(ARGV[1])
end
return {current, ttl}
"#;

/// Redis-backed counters. One multiplexed connection is opened at startup
/// and reused; the manager reconnects on its own after failures.
#[derive(Clone)]
pub struct RedisCounterStore {
    conn: ConnectionManager,
    prefix: String,
    script: Script,
}

impl RedisCounterStore {
    pub async fn connect(url: &str, prefix: &str) -> Result<Self, CounterError> {
        let client = Client::open(url).map_err(|e| CounterError::Connection(e.to_string()))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| CounterError::Connection(e.to_string()))?;
        info!(prefix, "Connected to Redis counter store");

        Ok(Self {
            conn,
            prefix: prefix.to_string(),
            script: Script::new(INCREMENT_IN_WINDOW),
        })
    }

    fn render_key(&self, key: &str) -> String {
        format!("{}:{}", self.prefix, key)
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn increment_in_window(&self, key: &str, window: Duration) -> Result<WindowCount, CounterError> {
        let window_ms = i64::try_from(window.as_millis()).unwrap_or(i64::MAX).max(1);
        let mut conn = self.conn.clone();

        let (count, ttl_ms): (i64, i64) = self
            .script
            .key(self.render_key(key))
            .arg(window_ms)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| CounterError::Backend(e.to_string()))?;

        Ok(WindowCount {
            count: u64::try_from(count).unwrap_or(0),
            resets_in: Duration::from_millis(u64::try_from(ttl_ms).unwrap_or(0)),
        })
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}

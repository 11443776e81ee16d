//! Redis-backed limit store for multi-instance deployments
//!
//! Each operation is a single Lua script, so the refill/take and
//! count/block transitions are atomic across every gate instance sharing
//! the server. Keys carry TTLs, which replaces the in-process sweep.

use crate::bucket::{BucketParams, TakeOutcome};
use crate::failure::{BruteForcePolicy, FailureRecord};
use crate::store::{LimitStore, LimitStoreError, LimitStoreResult};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;
use tracing::debug;

const TAKE_TOKEN: &str = r#"
local capacity = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local now = tonumber(ARGV[3])
local state = redis.call('HMGET', KEYS[1], 'tokens', 'last')
local tokens = tonumber(state[1])
local last = tonumber(state[2])
if tokens == nil or last == nil then
  tokens = capacity
  last = now
end
local elapsed = math.max(0, now - last)
tokens = math.max(0, math.min(capacity, tokens + elapsed * capacity / window))
if now > last then last = now end
local allowed = 0
local reset
if tokens >= 1 then
  tokens = tokens - 1
  allowed = 1
  reset = now + math.ceil((capacity - tokens) * window / capacity)
else
  reset = now + math.ceil((1 - tokens) * window / capacity)
end
redis.call('HSET', KEYS[1], 'tokens', tostring(tokens), 'last', tostring(last))
redis.call('PEXPIRE', KEYS[1], window)
return {allowed, math.floor(tokens), tostring(reset)}
"#;

const RECORD_FAILURE: &str = r#"
local max_attempts = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local block = tonumber(ARGV[3])
local now = tonumber(ARGV[4])
local s = redis.call('HMGET', KEYS[1], 'count', 'first', 'last', 'blocked')
local count = tonumber(s[1])
local first = tonumber(s[2])
local last = tonumber(s[3])
local blocked = tonumber(s[4]) or 0
local fresh = count == nil or first == nil
if not fresh then
  if blocked > 0 then
    if now < blocked then
      return {count, tostring(first), tostring(last), tostring(blocked)}
    end
    fresh = true
  elseif now - first >= window then
    fresh = true
  end
end
if fresh then
  count = 1
  first = now
  blocked = 0
else
  count = count + 1
end
if count >= max_attempts then blocked = now + block end
redis.call('HSET', KEYS[1], 'count', count, 'first', tostring(first), 'last', tostring(now), 'blocked', tostring(blocked))
if blocked > 0 then
  redis.call('PEXPIREAT', KEYS[1], tostring(blocked))
else
  redis.call('PEXPIREAT', KEYS[1], tostring(first + window))
end
return {count, tostring(first), tostring(now), tostring(blocked)}
"#;

const FAILURE_STATUS: &str = r#"
local window = tonumber(ARGV[1])
local now = tonumber(ARGV[2])
local s = redis.call('HMGET', KEYS[1], 'count', 'first', 'last', 'blocked')
local count = tonumber(s[1])
local first = tonumber(s[2])
if count == nil or first == nil then return nil end
local blocked = tonumber(s[4]) or 0
if (blocked > 0 and now >= blocked) or (blocked == 0 and now - first >= window) then
  redis.call('DEL', KEYS[1])
  return nil
end
return {count, tostring(first), s[3], tostring(blocked)}
"#;

/// Shared limit store
pub struct RedisLimitStore {
    conn: ConnectionManager,
    take_token: Script,
    record_failure: Script,
    failure_status: Script,
}

impl RedisLimitStore {
    /// Connect to `url` (`redis://host:port/db`)
    pub async fn connect(url: &str) -> LimitStoreResult<Self> {
        let client = redis::Client::open(url).map_err(backend)?;
        let conn = ConnectionManager::new(client).await.map_err(backend)?;
        debug!("connected to redis limit store");
        Ok(Self::with_connection(conn))
    }

    pub fn with_connection(conn: ConnectionManager) -> Self {
        Self {
            conn,
            take_token: Script::new(TAKE_TOKEN),
            record_failure: Script::new(RECORD_FAILURE),
            failure_status: Script::new(FAILURE_STATUS),
        }
    }
}

#[async_trait]
impl LimitStore for RedisLimitStore {
    async fn take_token(&self, key: &str, params: BucketParams, now_ms: i64) -> LimitStoreResult<TakeOutcome> {
        let mut conn = self.conn.clone();
        let (allowed, remaining, reset): (i64, i64, String) = self
            .take_token
            .key(key)
            .arg(params.capacity)
            .arg(params.window_ms)
            .arg(now_ms)
            .invoke_async(&mut conn)
            .await
            .map_err(backend)?;

        Ok(TakeOutcome {
            allowed: allowed == 1,
            remaining: remaining.max(0) as u32,
            reset_at_ms: parse_ms(key, &reset)?,
        })
    }

    async fn failure_status(
        &self,
        key: &str,
        policy: &BruteForcePolicy,
        now_ms: i64,
    ) -> LimitStoreResult<Option<FailureRecord>> {
        let mut conn = self.conn.clone();
        let raw: Option<(u32, String, String, String)> = self
            .failure_status
            .key(key)
            .arg(policy.window_ms)
            .arg(now_ms)
            .invoke_async(&mut conn)
            .await
            .map_err(backend)?;

        raw.map(|fields| to_record(key, fields)).transpose()
    }

    async fn record_failure(&self, key: &str, policy: &BruteForcePolicy, now_ms: i64) -> LimitStoreResult<FailureRecord> {
        let mut conn = self.conn.clone();
        let raw: (u32, String, String, String) = self
            .record_failure
            .key(key)
            .arg(policy.max_attempts)
            .arg(policy.window_ms)
            .arg(policy.block_duration_ms)
            .arg(now_ms)
            .invoke_async(&mut conn)
            .await
            .map_err(backend)?;

        to_record(key, raw)
    }

    async fn clear_failures(&self, key: &str) -> LimitStoreResult<()> {
        let mut conn = self.conn.clone();
        let _removed: i64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn sweep(&self, _now_ms: i64) -> LimitStoreResult<usize> {
        // key TTLs expire idle state server-side
        Ok(0)
    }
}

fn backend(err: redis::RedisError) -> LimitStoreError {
    LimitStoreError::Backend(err.to_string())
}

fn parse_ms(key: &str, raw: &str) -> LimitStoreResult<i64> {
    raw.parse::<f64>()
        .map(|v| v as i64)
        .map_err(|_| LimitStoreError::Corrupt { key: key.to_string() })
}

fn to_record(key: &str, (count, first, last, blocked): (u32, String, String, String)) -> LimitStoreResult<FailureRecord> {
    let blocked = parse_ms(key, &blocked)?;
    Ok(FailureRecord {
        count,
        first_attempt_ms: parse_ms(key, &first)?,
        last_attempt_ms: parse_ms(key, &last)?,
        blocked_until_ms: (blocked > 0).then_some(blocked),
    })
}

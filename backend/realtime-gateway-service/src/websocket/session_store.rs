//! Cross-instance presence: who is connected to which room.
//!
//! Records live in Redis under `socket:session:{room}:{identity}` with a TTL
//! so that crashed instances do not leak presence forever. Without Redis an
//! in-process map stands in; it is only visible to this process.

use crate::error::{AppError, AppResult};
use crate::redis_client::RedisClient;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

const KEY_PREFIX: &str = "socket:session:";
const SCAN_BATCH: usize = 200;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub connection_id: String,
    pub room: String,
    pub identity: String,
    pub display_name: String,
    pub role: String,
    pub created_at: DateTime<Utc>,
}

struct MemoryEntry {
    record: SessionRecord,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}

#[derive(Clone)]
enum Backend {
    Redis(RedisClient),
    Memory(Arc<DashMap<String, MemoryEntry>>),
}

#[derive(Clone)]
pub struct SessionStore {
    backend: Backend,
    default_ttl: Duration,
}

fn session_key(room: &str, identity: &str) -> String {
    format!("{KEY_PREFIX}{room}:{identity}")
}

/// SCAN pattern for one room. Glob metacharacters in the room name are
/// escaped; a room containing `:` can still match its longer siblings, so
/// callers filter the decoded records by room as well.
fn room_pattern(room: &str) -> String {
    let mut pattern = String::with_capacity(KEY_PREFIX.len() + room.len() + 2);
    pattern.push_str(KEY_PREFIX);
    for c in room.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push_str(":*");
    pattern
}

fn records_for_room(room: &str, values: Vec<Option<String>>) -> Vec<SessionRecord> {
    values
        .into_iter()
        .flatten()
        .filter_map(|raw| match serde_json::from_str::<SessionRecord>(&raw) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!(room, error = %e, "skipping undecodable session record");
                None
            }
        })
        .filter(|record| record.room == room)
        .collect()
}

impl SessionStore {
    pub fn redis(client: RedisClient, default_ttl: Duration) -> Self {
        Self {
            backend: Backend::Redis(client),
            default_ttl,
        }
    }

    pub fn memory(default_ttl: Duration) -> Self {
        Self {
            backend: Backend::Memory(Arc::new(DashMap::new())),
            default_ttl,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        match self.backend {
            Backend::Redis(_) => "redis",
            Backend::Memory(_) => "memory",
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Writes a record. `ttl: None` stores it without expiry until the next sweep.
    pub async fn put(&self, room: &str, identity: &str, record: &SessionRecord, ttl: Option<Duration>) -> AppResult<()> {
        let key = session_key(room, identity);
        match &self.backend {
            Backend::Redis(client) => {
                let payload = serde_json::to_string(record)?;
                let mut conn = client.get_multiplexed_async_connection().await?;
                let mut cmd = redis::cmd("SET");
                cmd.arg(&key).arg(payload);
                if let Some(ttl) = ttl {
                    cmd.arg("EX").arg(ttl.as_secs().max(1));
                }
                cmd.query_async::<_, ()>(&mut conn).await?;
            }
            Backend::Memory(map) => {
                map.insert(
                    key,
                    MemoryEntry {
                        record: record.clone(),
                        expires_at: ttl.map(|ttl| Instant::now() + ttl),
                    },
                );
            }
        }
        Ok(())
    }

    pub async fn get(&self, room: &str, identity: &str) -> AppResult<Option<SessionRecord>> {
        let key = session_key(room, identity);
        match &self.backend {
            Backend::Redis(client) => {
                let mut conn = client.get_multiplexed_async_connection().await?;
                let raw: Option<String> = redis::cmd("GET").arg(&key).query_async(&mut conn).await?;
                match raw {
                    Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
                    None => Ok(None),
                }
            }
            Backend::Memory(map) => {
                let now = Instant::now();
                let record = map
                    .get(&key)
                    .filter(|entry| !entry.is_expired(now))
                    .map(|entry| entry.record.clone());
                if record.is_none() {
                    map.remove_if(&key, |_, entry| entry.is_expired(now));
                }
                Ok(record)
            }
        }
    }

    /// Returns whether a record was removed.
    pub async fn delete(&self, room: &str, identity: &str) -> AppResult<bool> {
        let key = session_key(room, identity);
        match &self.backend {
            Backend::Redis(client) => {
                let mut conn = client.get_multiplexed_async_connection().await?;
                let removed: i64 = redis::cmd("DEL").arg(&key).query_async(&mut conn).await?;
                Ok(removed > 0)
            }
            Backend::Memory(map) => Ok(map.remove(&key).is_some()),
        }
    }

    pub async fn list_by_room(&self, room: &str) -> AppResult<Vec<SessionRecord>> {
        let mut records = match &self.backend {
            Backend::Redis(client) => {
                let mut conn = client.get_multiplexed_async_connection().await?;
                let keys = scan_keys(&mut conn, &room_pattern(room)).await?;
                if keys.is_empty() {
                    return Ok(Vec::new());
                }
                let values: Vec<Option<String>> = redis::cmd("MGET").arg(&keys).query_async(&mut conn).await?;
                records_for_room(room, values)
            }
            Backend::Memory(map) => {
                let now = Instant::now();
                map.iter()
                    .filter(|entry| entry.record.room == room && !entry.is_expired(now))
                    .map(|entry| entry.record.clone())
                    .collect()
            }
        };
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(records)
    }

    /// Applies the default TTL to records that have none and drops expired
    /// in-process entries. Returns the number of records that got a TTL.
    pub async fn sweep(&self) -> AppResult<usize> {
        let ttl = self.default_ttl;
        let healed = match &self.backend {
            Backend::Redis(client) => {
                let mut conn = client.get_multiplexed_async_connection().await?;
                let keys = scan_keys(&mut conn, &format!("{KEY_PREFIX}*")).await?;
                let mut healed = 0;
                for key in keys {
                    let remaining: i64 = match redis::cmd("TTL").arg(&key).query_async(&mut conn).await {
                        Ok(remaining) => remaining,
                        Err(e) => {
                            tracing::debug!(key = %key, error = %e, "TTL lookup failed");
                            continue;
                        }
                    };
                    // -1: key exists without expiry
                    if remaining == -1 {
                        redis::cmd("EXPIRE")
                            .arg(&key)
                            .arg(ttl.as_secs().max(1))
                            .query_async::<_, i64>(&mut conn)
                            .await?;
                        healed += 1;
                    }
                }
                healed
            }
            Backend::Memory(map) => {
                let now = Instant::now();
                map.retain(|_, entry| !entry.is_expired(now));
                let mut healed = 0;
                for mut entry in map.iter_mut() {
                    if entry.expires_at.is_none() {
                        entry.expires_at = Some(now + ttl);
                        healed += 1;
                    }
                }
                healed
            }
        };

        if healed > 0 {
            tracing::info!(healed, backend = self.backend_name(), "applied TTL to session records");
        }
        Ok(healed)
    }
}

async fn scan_keys(conn: &mut ConnectionManager, pattern: &str) -> AppResult<Vec<String>> {
    let mut cursor: u64 = 0;
    let mut keys = Vec::new();
    loop {
        let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(SCAN_BATCH)
            .query_async(conn)
            .await
            .map_err(AppError::from)?;
        keys.extend(batch);
        if next == 0 {
            break;
        }
        cursor = next;
    }
    keys.sort();
    keys.dedup();
    Ok(keys)
}

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tracing::{debug, info};
use uuid::Uuid;

/// Resolves an opaque bearer token to the account that owns it.
///
/// Tokens are issued by the authentication service; this side only reads them. The registry
/// is created at startup and injected through `AppState`.
#[async_trait]
pub trait SessionRegistry: Send + Sync {
    async fn resolve(&self, token: &str) -> Result<Option<Uuid>>;
}

/// Process-owned registry. Useful for local development and tests.
#[derive(Default)]
pub struct InMemorySessionRegistry {
    sessions: RwLock<HashMap<String, Uuid>>,
}

impl InMemorySessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, token: impl Into<String>, owner_id: Uuid) {
        self.sessions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(token.into(), owner_id);
    }

    pub fn revoke(&self, token: &str) {
        self.sessions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(token);
    }
}

#[async_trait]
impl SessionRegistry for InMemorySessionRegistry {
    async fn resolve(&self, token: &str) -> Result<Option<Uuid>> {
        Ok(self
            .sessions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(token)
            .copied())
    }
}

/// Registry backed by `session:<token>` keys holding the owner UUID.
#[derive(Clone)]
pub struct RedisSessionRegistry {
    conn: MultiplexedConnection,
}

impl RedisSessionRegistry {
    pub async fn connect(client: &redis::Client) -> Result<Self> {
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .context("Failed to connect to Redis")?;
        info!("Redis session registry connected");
        Ok(Self { conn })
    }
}

fn session_key(token: &str) -> String {
    format!("session:{token}")
}

#[async_trait]
impl SessionRegistry for RedisSessionRegistry {
    async fn resolve(&self, token: &str) -> Result<Option<Uuid>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn
            .get(session_key(token))
            .await
            .context("Redis session lookup failed")?;

        Ok(raw.and_then(|value| match Uuid::parse_str(value.trim()) {
            Ok(owner_id) => Some(owner_id),
            Err(e) => {
                debug!("Ignoring malformed session value: {e}");
                None
            }
        }))
    }
}

// src/dedupe/redis.rs
//! Redis-backed store: `SET key 1 NX EX ttl` over a shared connection manager.
//!
//! The connection is established on first use, so an unreachable Redis does
//! not prevent a generation from starting; each check surfaces the error
//! instead. `ConnectionManager` reconnects on its own after that.

use ::redis::aio::ConnectionManager;
use ::redis::{Client, IntoConnectionInfo};
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::info;

use super::{DedupeError, KeyValueStore};
use crate::config::RedisConfig;

pub struct RedisStore {
    client: Client,
    conn: OnceCell<ConnectionManager>,
}

impl RedisStore {
    pub fn new(cfg: &RedisConfig) -> Result<Self, DedupeError> {
        let addr = cfg.addr.trim();
        let url = if addr.contains("://") {
            addr.to_string()
        } else {
            format!("redis://{addr}/{}", cfg.db)
        };
        let mut info = url.as_str().into_connection_info()?;
        if let Some(pw) = cfg.password.as_deref().filter(|p| !p.is_empty()) {
            info.redis.password = Some(pw.to_string());
        }
        Ok(Self {
            client: Client::open(info)?,
            conn: OnceCell::new(),
        })
    }

    async fn connection(&self) -> Result<ConnectionManager, DedupeError> {
        let conn = self
            .conn
            .get_or_try_init(|| async {
                let conn = self.client.get_connection_manager().await?;
                info!(target: "dedupe", "redis connected");
                Ok::<_, DedupeError>(conn)
            })
            .await?;
        Ok(conn.clone())
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn set_if_absent(&self, key: &str, ttl: Duration) -> Result<bool, DedupeError> {
        let mut conn = self.connection().await?;
        let reply: Option<String> = ::redis::cmd("SET")
            .arg(key)
            .arg(1)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }
}

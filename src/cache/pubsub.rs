//! Cross-instance cache invalidation over Redis pub/sub
//!
//! The instance that performs an eviction applies it to both tiers itself,
//! then publishes it. Peers evict their local tier only; the shared tier is
//! already clean. Peer eviction is eventually consistent, bounded by
//! broadcast latency.

use super::TieredCache;
use crate::error::{AppError, Result};
use futures_util::StreamExt;
use redis::{aio::ConnectionManager, AsyncCommands};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

const RECONNECT_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidationScope {
    Prefix(String),
    All,
}

/// Wire format of a broadcast eviction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationMessage {
    /// Instance id of the publisher
    pub origin: String,
    /// Key prefix to evict; absent means everything
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

impl InvalidationMessage {
    pub fn new(origin: impl Into<String>, scope: InvalidationScope) -> Self {
        let prefix = match scope {
            InvalidationScope::Prefix(prefix) => Some(prefix),
            InvalidationScope::All => None,
        };
        Self {
            origin: origin.into(),
            prefix,
        }
    }

    pub fn scope(&self) -> InvalidationScope {
        match &self.prefix {
            Some(prefix) => InvalidationScope::Prefix(prefix.clone()),
            None => InvalidationScope::All,
        }
    }
}

/// Publishes evictions to peer instances
#[derive(Clone)]
pub struct InvalidationBroadcaster {
    conn: ConnectionManager,
    channel: String,
    origin: String,
}

impl InvalidationBroadcaster {
    pub fn new(conn: ConnectionManager, channel: impl Into<String>, origin: impl Into<String>) -> Self {
        Self {
            conn,
            channel: channel.into(),
            origin: origin.into(),
        }
    }

    pub async fn publish(&self, scope: InvalidationScope) -> Result<()> {
        let message = InvalidationMessage::new(self.origin.clone(), scope);
        let payload = serde_json::to_string(&message)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Invalidation encode error: {}", e)))?;

        let mut conn = self.conn.clone();
        let receivers: i64 = conn.publish(&self.channel, payload).await?;
        tracing::debug!(channel = %self.channel, receivers, "Published cache invalidation");
        Ok(())
    }
}

/// Subscribes to the invalidation channel and evicts the local tier
pub struct InvalidationListener {
    client: redis::Client,
    channel: String,
    origin: String,
    cache: Arc<TieredCache>,
}

impl InvalidationListener {
    pub fn new(
        client: redis::Client,
        channel: impl Into<String>,
        origin: impl Into<String>,
        cache: Arc<TieredCache>,
    ) -> Self {
        Self {
            client,
            channel: channel.into(),
            origin: origin.into(),
            cache,
        }
    }

    /// Run the subscription loop in the background, reconnecting on error.
    ///
    /// Messages published while disconnected are lost, so the local tier is
    /// cleared after every reconnect.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut connected_before = false;
            loop {
                match self.subscribe_and_listen(&mut connected_before).await {
                    Ok(()) => tracing::warn!(channel = %self.channel, "Invalidation stream ended"),
                    Err(e) => {
                        tracing::error!(channel = %self.channel, error = %e, "Invalidation subscription failed")
                    }
                }
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        })
    }

    async fn subscribe_and_listen(&self, connected_before: &mut bool) -> Result<()> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(&self.channel).await?;
        tracing::info!(channel = %self.channel, "Subscribed to cache invalidations");

        if *connected_before {
            self.cache.clear_local().await;
        }
        *connected_before = true;

        let mut messages = pubsub.on_message();
        while let Some(msg) = messages.next().await {
            let payload: String = match msg.get_payload() {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::warn!(error = %e, "Ignoring non-text invalidation payload");
                    continue;
                }
            };
            self.handle_payload(&payload).await;
        }
        Ok(())
    }

    /// Apply one broadcast message. Returns false when it was ignored.
    pub async fn handle_payload(&self, payload: &str) -> bool {
        let message: InvalidationMessage = match serde_json::from_str(payload) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring malformed invalidation message");
                return false;
            }
        };

        if message.origin == self.origin {
            return false;
        }

        match message.scope() {
            InvalidationScope::Prefix(prefix) => {
                tracing::debug!(origin = %message.origin, prefix = %prefix, "Evicting on peer request");
                self.cache.evict_local(&prefix).await;
            }
            InvalidationScope::All => {
                tracing::info!(origin = %message.origin, "Clearing local tier on peer request");
                self.cache.clear_local().await;
            }
        }
        metrics::counter!("gatekeeper_cache_invalidations_total", "reason" => "peer").increment(1);
        true
    }
}

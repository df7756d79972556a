//! Redis pub/sub transport for conversation events.
//!
//! Each conversation has its own channel (`conversation.{id}`). Publishing is
//! best effort: the HTTP request that produced an event has already committed,
//! so a failed publish is logged and never surfaces to the caller.

use anyhow::{Context, Result};
use backoff::ExponentialBackoffBuilder;
use futures::{Stream, StreamExt};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn, Instrument};
use uuid::Uuid;

use crate::domain::conversations::{channel_name, ConversationEvent};

/// Publisher/subscriber for conversation channels
#[derive(Clone)]
pub struct Broadcaster {
    client: redis::Client,
    conn: ConnectionManager,
}

impl Broadcaster {
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url).context("Failed to create Redis client")?;
        let conn = ConnectionManager::new(client.clone())
            .await
            .context("Failed to connect to Redis")?;

        tracing::info!("Redis broadcaster connected");
        Ok(Self { client, conn })
    }

    /// Publish an event to every subscriber of the conversation.
    ///
    /// Delivery runs on its own task so callers never wait on Redis.
    pub fn publish(&self, conversation_id: Uuid, event: &ConversationEvent) {
        let payload = match serde_json::to_string(event) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Failed to serialize conversation event");
                return;
            }
        };
        let channel = channel_name(conversation_id);
        let conn = self.conn.clone();

        spawn_delivery(channel.clone(), move || {
            let mut conn = conn.clone();
            let channel = channel.clone();
            let payload = payload.clone();
            async move { conn.publish::<_, _, i64>(channel, payload).await }
        });
    }

    /// Subscribe to a conversation channel. Yields raw JSON payloads.
    pub async fn subscribe(&self, conversation_id: Uuid) -> Result<impl Stream<Item = String>> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .context("Failed to open Redis pub/sub connection")?;
        pubsub
            .subscribe(channel_name(conversation_id))
            .await
            .context("Failed to subscribe to conversation channel")?;

        Ok(pubsub
            .into_on_message()
            .filter_map(|msg| async move { msg.get_payload::<String>().ok() }))
    }

    /// Check if Redis is reachable.
    pub async fn health_check(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .context("Redis health check failed")?;
        Ok(())
    }
}

/// Retry `attempt` in the background until it succeeds or the retry window
/// closes.
fn spawn_delivery<F, Fut>(channel: String, attempt: F) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = redis::RedisResult<i64>> + Send + 'static,
{
    // Short retry window for transient connection drops
    let policy = ExponentialBackoffBuilder::new()
        .with_initial_interval(Duration::from_millis(50))
        .with_max_elapsed_time(Some(Duration::from_secs(2)))
        .build();

    let task = async move {
        let result = backoff::future::retry(policy, || {
            let call = attempt();
            async move { call.await.map_err(backoff::Error::transient) }
        })
        .await;

        match result {
            Ok(receivers) => debug!(channel = %channel, receivers, "Published conversation event"),
            Err(e) => warn!(channel = %channel, error = %e, "Failed to publish conversation event"),
        }
    };
    tokio::spawn(task.in_current_span())
}

#[cfg(test)]
mod tests {
    use super::*;
    use redis::{ErrorKind, RedisError};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn delivery_retries_without_blocking_the_caller() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();

        let handle = spawn_delivery("conversation.test".to_string(), move || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(RedisError::from((ErrorKind::IoError, "connection dropped")))
                } else {
                    Ok(1)
                }
            }
        });

        // Nothing has run yet; the caller already has control back
        assert_eq!(attempts.load(Ordering::SeqCst), 0);

        handle.await.unwrap();
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }
}

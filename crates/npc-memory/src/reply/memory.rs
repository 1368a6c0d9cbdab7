//! In-process reply store
//!
//! Per-key FIFO of payloads with expiry. Waiters park on a `Notify`; a push
//! with no waiter leaves a permit behind, so a push that lands between the
//! emptiness check and the wait is never lost.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::ReplyChannel;
use crate::error::Result;

#[derive(Debug)]
struct Pending {
    payload: String,
    expires_at: Instant,
}

#[derive(Debug, Default)]
struct Slot {
    items: VecDeque<Pending>,
    notify: Arc<Notify>,
}

impl Slot {
    /// Drop expired payloads, returning how many went unread
    fn evict_expired(&mut self, now: Instant) -> usize {
        let before = self.items.len();
        self.items.retain(|p| p.expires_at > now);
        before - self.items.len()
    }

    /// Nobody is waiting and nothing is stored
    fn is_idle(&self) -> bool {
        self.items.is_empty() && Arc::strong_count(&self.notify) == 1
    }
}

#[derive(Debug, Default)]
pub struct MemoryReplyChannel {
    slots: DashMap<String, Slot>,
}

impl MemoryReplyChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently holding state
    pub fn key_count(&self) -> usize {
        self.slots.len()
    }

    /// Evict expired replies and idle keys. Returns the number of replies that
    /// expired unread (the gateway had already given up on them).
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut expired = 0;
        self.slots.retain(|key, slot| {
            let dropped = slot.evict_expired(now);
            if dropped > 0 {
                warn!(key = %key, dropped, "Reply expired unread; task completed after its caller gave up");
            }
            expired += dropped;
            !slot.is_idle()
        });
        expired
    }

    /// Run [`Self::sweep`] every `interval` until the returned handle is aborted
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let channel = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let expired = channel.sweep();
                if expired > 0 {
                    debug!(expired, keys = channel.key_count(), "Reply sweep finished");
                }
            }
        })
    }

    fn release_if_idle(&self, key: &str) {
        self.slots.remove_if(key, |_, slot| slot.is_idle());
    }
}

#[async_trait]
impl ReplyChannel for MemoryReplyChannel {
    async fn push(&self, key: &str, payload: String, ttl: Duration) -> Result<()> {
        let notify = {
            let mut slot = self.slots.entry(key.to_string()).or_default();
            slot.items.push_back(Pending {
                payload,
                expires_at: Instant::now() + ttl,
            });
            Arc::clone(&slot.notify)
        };
        notify.notify_one();
        Ok(())
    }

    async fn blocking_pop(&self, key: &str, timeout: Duration) -> Result<Option<String>> {
        let deadline = Instant::now() + timeout;

        loop {
            let notify = {
                let mut slot = self.slots.entry(key.to_string()).or_default();
                let dropped = slot.evict_expired(Instant::now());
                if dropped > 0 {
                    warn!(key = %key, dropped, "Reply expired before it was read");
                }
                if let Some(pending) = slot.items.pop_front() {
                    drop(slot);
                    self.release_if_idle(key);
                    return Ok(Some(pending.payload));
                }
                Arc::clone(&slot.notify)
            };

            let woke = tokio::time::timeout_at(deadline, notify.notified()).await;
            drop(notify);
            if woke.is_err() {
                self.release_if_idle(key);
                return Ok(None);
            }
        }
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pop_returns_pushed_payload() {
        let channel = MemoryReplyChannel::new();
        channel
            .push("reply:a", "hello".to_string(), Duration::from_secs(5))
            .await
            .unwrap();
        let got = channel
            .blocking_pop("reply:a", Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(got.as_deref(), Some("hello"));
        assert_eq!(channel.key_count(), 0);
    }

    #[tokio::test]
    async fn test_pop_times_out_with_none() {
        let channel = MemoryReplyChannel::new();
        let started = std::time::Instant::now();
        let got = channel
            .blocking_pop("reply:missing", Duration::from_millis(50))
            .await
            .unwrap();
        assert!(got.is_none());
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert_eq!(channel.key_count(), 0);
    }

    #[tokio::test]
    async fn test_waiter_wakes_on_later_push() {
        let channel = Arc::new(MemoryReplyChannel::new());
        let waiter = {
            let channel = Arc::clone(&channel);
            tokio::spawn(async move {
                channel
                    .blocking_pop("reply:late", Duration::from_secs(5))
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        channel
            .push("reply:late", "done".to_string(), Duration::from_secs(5))
            .await
            .unwrap();

        let got = waiter.await.unwrap().unwrap();
        assert_eq!(got.as_deref(), Some("done"));
    }

    #[tokio::test]
    async fn test_keys_are_isolated() {
        let channel = MemoryReplyChannel::new();
        channel
            .push("reply:x", "for x".to_string(), Duration::from_secs(5))
            .await
            .unwrap();
        let got = channel
            .blocking_pop("reply:y", Duration::from_millis(10))
            .await
            .unwrap();
        assert!(got.is_none());
        assert_eq!(channel.key_count(), 1);
    }

    #[tokio::test]
    async fn test_expired_reply_is_not_returned() {
        let channel = MemoryReplyChannel::new();
        channel
            .push("reply:old", "stale".to_string(), Duration::ZERO)
            .await
            .unwrap();
        let got = channel
            .blocking_pop("reply:old", Duration::from_millis(10))
            .await
            .unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn test_sweep_counts_unread_expiries() {
        let channel = MemoryReplyChannel::new();
        channel
            .push("reply:ghost", "late".to_string(), Duration::ZERO)
            .await
            .unwrap();
        channel
            .push("reply:live", "fresh".to_string(), Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(channel.sweep(), 1);
        assert_eq!(channel.key_count(), 1);
    }
}

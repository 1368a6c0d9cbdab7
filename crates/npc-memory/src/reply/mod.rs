//! Reply channel: the store a worker writes into and the gateway blocks on
//!
//! Keys take the form `reply:{correlation_id}`. Each key expects exactly one
//! consumer; a reply nobody pops expires with its TTL.

mod http;
mod memory;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

pub use http::{HttpReplyChannel, MAX_LONG_POLL, reply_routes};
pub use memory::MemoryReplyChannel;

#[async_trait]
pub trait ReplyChannel: Send + Sync {
    /// Append `payload` under `key`, expiring after `ttl`
    async fn push(&self, key: &str, payload: String, ttl: Duration) -> Result<()>;

    /// Wait up to `timeout` for a payload under `key`; `None` when nothing arrived
    async fn blocking_pop(&self, key: &str, timeout: Duration) -> Result<Option<String>>;

    fn name(&self) -> &str;
}

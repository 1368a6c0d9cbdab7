//! NPC Memory - request-reply memory pipeline for game characters
//!
//! A gateway accepts memory writes and recall queries, publishes them as
//! correlation tasks, and blocks until a worker answers through the reply
//! channel. Workers embed text, index memories, and rank hybrid lexical and
//! vector hits with reciprocal rank fusion plus importance decay.

pub mod config;
pub mod embedding;
pub mod error;
pub mod gateway;
pub mod index;
pub mod memory;
pub mod metrics;
pub mod queue;
pub mod ranking;
pub mod reply;
pub mod task;
pub mod testing;
pub mod worker;

pub use error::MemoryError;

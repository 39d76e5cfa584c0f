//! Thin capability layer over an in-memory-primary / on-disk-durable KV
//! engine: get/set with TTL, sorted sets, append-only lists,
//! compare-and-set, and prefix scan (spec.md §4.1, component C1).

pub mod engine;
pub mod error;
pub mod sled_engine;

pub use engine::{KvEngine, ScoredMember};
pub use error::KvError;
pub use sled_engine::SledKvEngine;

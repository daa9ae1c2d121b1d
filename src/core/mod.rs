//! Order-taking pipeline
//!
//! Classification, routing, cart extraction and the per-intent handlers,
//! tied together by the turn engine over persistent session memory.

pub mod cart;
mod classifier;
mod engine;
mod extractor;
mod handlers;
pub mod intent;
mod memory;
mod router;

pub use engine::{CartSummary, ChatEngine, TurnError};
pub use memory::{MemoryStore, StoredMessage};

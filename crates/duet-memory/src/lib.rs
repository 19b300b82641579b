//! Persistence collaborators for the Duet bots: bounded short-term chat
//! memory (SQLite) and the append-only chat replay log (JSONL).

pub mod memory_store;
pub mod replay_log;

pub use memory_store::{HistoryEntry, MemoryStore};
pub use replay_log::{ChatEventDraft, ChatReplayLog, ChatReplayRecord};

//! Joint-trigger detection and the pending-handoff table.
//!
//! The pending-handoff table is the cross-identity coordination state: the
//! follow identity records "waiting for the lead to speak" per channel and
//! consumes the entry when the lead's message is observed. Entries expire by
//! a lazy sweep at the top of every message-handling pass; there is no
//! background timer.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use duet_gateway::GatewayMessage;

/// Returns true when `message` addresses both bot identities at once.
///
/// Messages authored by either identity (or any bot) never count as a fresh
/// joint trigger; bot-authored messages only matter as the partner
/// confirmation signal handled by the orchestrator.
pub fn is_joint_mention_trigger(message: &GatewayMessage, lead_id: u64, follow_id: u64) -> bool {
    if message.author.is_bot
        || message.author.user_id == lead_id
        || message.author.user_id == follow_id
    {
        return false;
    }
    message.mentions_user(lead_id) && message.mentions_user(follow_id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// One recorded "follow waits for lead" coordination entry.
pub struct PendingHandoff {
    pub created_at: Instant,
    pub trigger_message_id: u64,
}

#[derive(Debug, Default)]
/// Per-channel pending-handoff entries with monotonic-clock expiry.
///
/// At most one entry per channel; a new trigger overwrites any prior entry
/// (last-trigger-wins).
pub struct PendingHandoffTable {
    entries: Mutex<HashMap<u64, PendingHandoff>>,
}

impl PendingHandoffTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unconditionally upserts the entry for `channel_id`.
    pub fn record(&self, channel_id: u64, trigger_message_id: u64) {
        self.record_at(channel_id, trigger_message_id, Instant::now());
    }

    fn record_at(&self, channel_id: u64, trigger_message_id: u64, created_at: Instant) {
        let mut entries = self
            .entries
            .lock()
            .expect("pending handoff table lock poisoned");
        entries.insert(
            channel_id,
            PendingHandoff {
                created_at,
                trigger_message_id,
            },
        );
    }

    /// Removes every entry older than `timeout`.
    pub fn expire_stale(&self, timeout: Duration) {
        self.expire_stale_at(Instant::now(), timeout);
    }

    fn expire_stale_at(&self, now: Instant, timeout: Duration) {
        let mut entries = self
            .entries
            .lock()
            .expect("pending handoff table lock poisoned");
        entries.retain(|_, pending| now.saturating_duration_since(pending.created_at) <= timeout);
    }

    /// Removes and returns the entry for `channel_id`, if any.
    pub fn take(&self, channel_id: u64) -> Option<PendingHandoff> {
        let mut entries = self
            .entries
            .lock()
            .expect("pending handoff table lock poisoned");
        entries.remove(&channel_id)
    }

    pub fn len(&self) -> usize {
        let entries = self
            .entries
            .lock()
            .expect("pending handoff table lock poisoned");
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

//! Dual-mention orchestrator hook.
//!
//! One hook type serves both identities; the role a process plays is decided
//! by which identity it binds at gateway-ready time. The lead identity opens
//! the scripted exchange immediately on a joint trigger; the follow identity
//! records a pending handoff and runs its own script only after observing the
//! lead speak in the same channel (or drops the handoff on expiry).

use std::collections::HashSet;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use duet_gateway::{ChannelSender, GatewayMessage, MessageHook};

use crate::dual_mention::{is_joint_mention_trigger, PendingHandoffTable};
use crate::script::{LineScriptProvider, ScriptContext};
use crate::task_registry::SequenceTaskRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Role the bound identity plays in the scripted exchange.
pub enum InteractionRole {
    Lead,
    Follow,
}

#[derive(Debug, Clone)]
/// Settings for the dual-mention orchestrator.
pub struct DualMentionHookConfig {
    pub enabled: bool,
    pub lead_bot_id: u64,
    pub follow_bot_id: u64,
    /// Lines per sequence; clamped to at least one.
    pub line_count: usize,
    pub pending_timeout: Duration,
    /// Composition delay before the first line; longer than the per-line gap.
    pub first_line_delay: Duration,
    pub between_line_delay: Duration,
}

impl Default for DualMentionHookConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            lead_bot_id: 0,
            follow_bot_id: 0,
            line_count: 3,
            pending_timeout: Duration::from_secs(20),
            first_line_delay: Duration::from_millis(1_600),
            between_line_delay: Duration::from_millis(900),
        }
    }
}

#[derive(Debug, Clone, Copy)]
/// Inter-line pacing for one sequence.
pub struct SequencePacing {
    pub first_line_delay: Duration,
    pub between_line_delay: Duration,
}

#[derive(Debug, Default, Clone)]
struct ActiveChannels {
    channels: Arc<Mutex<HashSet<u64>>>,
}

impl ActiveChannels {
    fn contains(&self, channel_id: u64) -> bool {
        let channels = self.channels.lock().expect("active channel lock poisoned");
        channels.contains(&channel_id)
    }

    fn try_acquire(&self, channel_id: u64) -> Option<ActiveChannelGuard> {
        let mut channels = self.channels.lock().expect("active channel lock poisoned");
        if !channels.insert(channel_id) {
            return None;
        }
        Some(ActiveChannelGuard {
            channels: Arc::clone(&self.channels),
            channel_id,
        })
    }

    fn len(&self) -> usize {
        let channels = self.channels.lock().expect("active channel lock poisoned");
        channels.len()
    }
}

/// Releases the busy-guard for its channel on every exit path, including
/// task cancellation (the spawned future is dropped, which drops the guard).
struct ActiveChannelGuard {
    channels: Arc<Mutex<HashSet<u64>>>,
    channel_id: u64,
}

impl Drop for ActiveChannelGuard {
    fn drop(&mut self) {
        let mut channels = self.channels.lock().expect("active channel lock poisoned");
        channels.remove(&self.channel_id);
    }
}

/// Strategy-polymorphic orchestrator for the two-identity scripted exchange.
pub struct DualMentionHook {
    config: DualMentionHookConfig,
    sender: Arc<dyn ChannelSender>,
    provider: Arc<dyn LineScriptProvider>,
    own_identity: OnceLock<u64>,
    pending: PendingHandoffTable,
    active: ActiveChannels,
    tasks: Arc<SequenceTaskRegistry>,
}

impl DualMentionHook {
    pub fn new(
        config: DualMentionHookConfig,
        sender: Arc<dyn ChannelSender>,
        provider: Arc<dyn LineScriptProvider>,
    ) -> Self {
        Self {
            config,
            sender,
            provider,
            own_identity: OnceLock::new(),
            pending: PendingHandoffTable::new(),
            active: ActiveChannels::default(),
            tasks: Arc::new(SequenceTaskRegistry::new()),
        }
    }

    /// Binds the identity this process runs as, resolved at gateway-ready.
    /// Later calls with a different id are ignored and logged.
    pub fn bind_identity(&self, bot_user_id: u64) {
        if self.own_identity.set(bot_user_id).is_err() {
            let bound = self.own_identity.get().copied().unwrap_or_default();
            if bound != bot_user_id {
                warn!(bound, bot_user_id, "identity rebind ignored");
            }
        }
    }

    pub fn role(&self) -> Option<InteractionRole> {
        let own_id = self.own_identity.get().copied()?;
        if own_id == self.config.lead_bot_id {
            Some(InteractionRole::Lead)
        } else if own_id == self.config.follow_bot_id {
            Some(InteractionRole::Follow)
        } else {
            None
        }
    }

    pub fn pending_handoffs(&self) -> usize {
        self.pending.len()
    }

    pub fn active_sequences(&self) -> usize {
        self.active.len()
    }

    pub fn tracked_tasks(&self) -> usize {
        self.tasks.len()
    }

    fn handle_as_lead(&self, message: &GatewayMessage) -> bool {
        if message.author.is_bot {
            return false;
        }
        if !is_joint_mention_trigger(message, self.config.lead_bot_id, self.config.follow_bot_id) {
            return false;
        }

        debug!(
            channel_id = message.channel_id,
            trigger_message_id = message.message_id,
            "joint trigger observed; lead sequence starting"
        );
        self.launch_sequence(
            message.channel_id,
            message.message_id,
            self.script_context(message, self.config.follow_bot_id),
        );
        // Suppress the default mention auto-reply; the scripted exchange
        // replaces it.
        true
    }

    fn handle_as_follow(&self, message: &GatewayMessage) -> bool {
        if message.author.is_bot {
            if message.author.user_id != self.config.lead_bot_id {
                return false;
            }
            let Some(pending) = self.pending.take(message.channel_id) else {
                return false;
            };
            debug!(
                channel_id = message.channel_id,
                trigger_message_id = pending.trigger_message_id,
                "lead message observed; follow sequence starting"
            );
            self.launch_sequence(
                message.channel_id,
                pending.trigger_message_id,
                self.script_context(message, self.config.lead_bot_id),
            );
            return false;
        }

        if !is_joint_mention_trigger(message, self.config.lead_bot_id, self.config.follow_bot_id) {
            return false;
        }

        self.pending.record(message.channel_id, message.message_id);
        debug!(
            channel_id = message.channel_id,
            trigger_message_id = message.message_id,
            "joint trigger observed; waiting for lead"
        );
        // Suppress the default auto-reply while waiting for the lead.
        true
    }

    fn script_context(&self, message: &GatewayMessage, partner_mention_id: u64) -> ScriptContext {
        let trigger_text = if message.clean_content.trim().is_empty() {
            message.content.trim().to_string()
        } else {
            message.clean_content.trim().to_string()
        };
        ScriptContext {
            trigger_text,
            trigger_user_id: message.author.user_id,
            partner_mention_id,
        }
    }

    fn launch_sequence(&self, channel_id: u64, trigger_message_id: u64, context: ScriptContext) {
        // The guard is taken before the task is spawned so the channel is
        // busy for the whole sequence lifetime, script generation included.
        let Some(guard) = self.active.try_acquire(channel_id) else {
            return;
        };

        let provider = Arc::clone(&self.provider);
        let sender = Arc::clone(&self.sender);
        let line_count = self.config.line_count.max(1);
        let pacing = SequencePacing {
            first_line_delay: self.config.first_line_delay,
            between_line_delay: self.config.between_line_delay,
        };
        let task_id = self.tasks.allocate_id();
        let task_registry = Arc::clone(&self.tasks);

        let handle = tokio::spawn(async move {
            let _guard = guard;
            match provider.provide(&context, line_count).await {
                Ok(lines) => {
                    if lines.is_empty() {
                        debug!(channel_id, trigger_message_id, "provider returned no lines");
                    } else if let Err(error) =
                        run_sequence(sender.as_ref(), channel_id, &lines, pacing).await
                    {
                        warn!(
                            channel_id,
                            trigger_message_id,
                            error = %error,
                            "sequence delivery failed"
                        );
                    }
                }
                Err(error) => {
                    warn!(
                        channel_id,
                        trigger_message_id,
                        error = %error,
                        "script unavailable; sequence skipped"
                    );
                }
            }
            task_registry.complete(task_id);
        });
        self.tasks.register(task_id, handle);
    }
}

/// Delivers `lines` in order with typing indication and pacing. Aborts on the
/// first delivery error; the caller owns logging and the busy-guard.
async fn run_sequence(
    sender: &dyn ChannelSender,
    channel_id: u64,
    lines: &[String],
    pacing: SequencePacing,
) -> anyhow::Result<()> {
    for (index, line) in lines.iter().enumerate() {
        let delay = if index == 0 {
            pacing.first_line_delay
        } else {
            pacing.between_line_delay
        };
        sender.show_typing(channel_id).await?;
        tokio::time::sleep(delay).await;
        sender.send_text(channel_id, line).await?;
    }
    Ok(())
}

#[async_trait]
impl MessageHook for DualMentionHook {
    async fn handle_message(&self, message: &GatewayMessage) -> bool {
        if !self.config.enabled {
            return false;
        }
        if self.own_identity.get().is_none() {
            return false;
        }

        // Lazy sweeps run before any trigger processing in the same pass.
        self.pending.expire_stale(self.config.pending_timeout);
        self.tasks.prune_finished();

        if self.active.contains(message.channel_id) {
            return false;
        }

        match self.role() {
            Some(InteractionRole::Lead) => self.handle_as_lead(message),
            Some(InteractionRole::Follow) => self.handle_as_follow(message),
            None => false,
        }
    }

    async fn close(&self) {
        self.tasks.close().await;
    }
}

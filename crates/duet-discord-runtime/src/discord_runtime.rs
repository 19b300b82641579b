//! Discord bridge runtime.
//!
//! Adapts serenity gateway events into the transport-neutral contract,
//! resolves the process identity at ready time, gates banned users, and
//! dispatches the dual-mention hook. Shutdown drains the hook's in-flight
//! sequences before the shards go down.

use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use anyhow::{anyhow, Context as _, Result};
use async_trait::async_trait;
use serenity::all::{
    ChannelId, Client, Context, CreateAllowedMentions, CreateMessage, EventHandler,
    GatewayIntents, Message, Ready,
};
use serenity::http::Http;
use tracing::{debug, info, warn};

use duet_ai::{OpenAiClient, OpenAiConfig};
use duet_gateway::{ChannelSender, GatewayMessage, GatewayUser, MessageHook};
use duet_interaction::{
    DualMentionHook, DualMentionHookConfig, GeneratedScriptConfig, GeneratedScriptProvider,
    LineScriptProvider, RolePairedScriptProvider, StaticScriptProvider,
};
use duet_memory::{ChatEventDraft, ChatReplayLog, MemoryStore};

const MEMORY_STORE_FILE: &str = "memory.sqlite3";
const CHAT_REPLAY_LOG_FILE: &str = "chat-replay.jsonl";
const DUAL_MENTION_TRIGGER_LABEL: &str = "dual_mention";

#[derive(Debug, Clone)]
/// Settings for the generated-script strategy, when enabled.
pub struct GenerationSettings {
    pub api_base: String,
    pub api_key: String,
    pub model: String,
    pub request_timeout_ms: u64,
    pub max_retries: usize,
}

#[derive(Debug, Clone)]
/// Runtime configuration for the Discord bridge.
pub struct DiscordBridgeRuntimeConfig {
    pub bot_token: String,
    pub state_dir: PathBuf,
    pub max_history_turns: usize,
    pub hook: DualMentionHookConfig,
    /// `None` keeps the static templated scripts for both roles.
    pub generation: Option<GenerationSettings>,
}

#[derive(Default)]
/// `ChannelSender` backed by the serenity HTTP client, bound at ready time.
pub struct DiscordChannelSender {
    http: OnceLock<Arc<Http>>,
}

impl DiscordChannelSender {
    fn bind_http(&self, http: Arc<Http>) {
        let _ = self.http.set(http);
    }

    fn http(&self) -> Result<&Arc<Http>> {
        self.http
            .get()
            .ok_or_else(|| anyhow!("discord http client is not bound yet"))
    }
}

#[async_trait]
impl ChannelSender for DiscordChannelSender {
    async fn send_text(&self, channel_id: u64, text: &str) -> Result<()> {
        let http = self.http()?;
        ChannelId::new(channel_id)
            .send_message(
                http,
                CreateMessage::new()
                    .content(text)
                    .allowed_mentions(CreateAllowedMentions::new()),
            )
            .await
            .with_context(|| format!("failed to send to channel {channel_id}"))?;
        Ok(())
    }

    async fn show_typing(&self, channel_id: u64) -> Result<()> {
        let http = self.http()?;
        ChannelId::new(channel_id)
            .broadcast_typing(http)
            .await
            .with_context(|| format!("failed to show typing in channel {channel_id}"))?;
        Ok(())
    }
}

struct DiscordBridgeHandler {
    sender: Arc<DiscordChannelSender>,
    hook: Arc<DualMentionHook>,
    memory: Arc<MemoryStore>,
    replay_log: Arc<ChatReplayLog>,
}

#[async_trait]
impl EventHandler for DiscordBridgeHandler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        self.sender.bind_http(ctx.http.clone());
        self.hook.bind_identity(ready.user.id.get());
        info!(
            bot_user_id = ready.user.id.get(),
            role = ?self.hook.role(),
            "discord bridge ready"
        );
    }

    async fn message(&self, _ctx: Context, message: Message) {
        let event = convert_message(&message);

        if let Some(guild_id) = event.guild_id {
            match self.memory.is_user_banned(guild_id, event.author.user_id) {
                Ok(true) => {
                    debug!(
                        guild_id,
                        user_id = event.author.user_id,
                        "ignoring message from banned user"
                    );
                    return;
                }
                Ok(false) => {}
                Err(error) => {
                    warn!(guild_id, error = %error, "ban probe failed; message processed");
                }
            }
        }

        let handled = self.hook.handle_message(&event).await;
        if handled {
            if let Err(error) = self.replay_log.append(build_replay_draft(&event)) {
                warn!(
                    channel_id = event.channel_id,
                    error = %error,
                    "failed to append replay record"
                );
            }
        }
    }
}

fn convert_message(message: &Message) -> GatewayMessage {
    GatewayMessage {
        message_id: message.id.get(),
        channel_id: message.channel_id.get(),
        guild_id: message.guild_id.map(|id| id.get()),
        author: GatewayUser {
            user_id: message.author.id.get(),
            display_name: message
                .author
                .global_name
                .clone()
                .unwrap_or_else(|| message.author.name.clone()),
            is_bot: message.author.bot,
        },
        mention_ids: message.mentions.iter().map(|user| user.id.get()).collect(),
        content: message.content.clone(),
        clean_content: message.content.clone(),
    }
}

fn build_replay_draft(event: &GatewayMessage) -> ChatEventDraft {
    ChatEventDraft {
        guild_id: event.guild_id,
        guild_name: None,
        channel_id: event.channel_id,
        channel_name: None,
        user_id: event.author.user_id,
        user_name: event.author.display_name.clone(),
        user_display: event.author.display_name.clone(),
        trigger: DUAL_MENTION_TRIGGER_LABEL.to_string(),
        prompt: event.content.clone(),
        reply_length: 0,
    }
}

fn build_script_provider(
    config: &DiscordBridgeRuntimeConfig,
) -> Result<Arc<dyn LineScriptProvider>> {
    let follow_script: Arc<dyn LineScriptProvider> =
        Arc::new(StaticScriptProvider::follow_reply());
    let lead_script: Arc<dyn LineScriptProvider> = match &config.generation {
        None => Arc::new(StaticScriptProvider::lead_opener()),
        Some(settings) => {
            let client = OpenAiClient::new(OpenAiConfig {
                api_base: settings.api_base.clone(),
                api_key: settings.api_key.clone(),
                request_timeout_ms: settings.request_timeout_ms,
                max_retries: settings.max_retries,
            })
            .context("failed to build generation client")?;
            Arc::new(GeneratedScriptProvider::new(
                Arc::new(client),
                GeneratedScriptConfig {
                    model: settings.model.clone(),
                    ..GeneratedScriptConfig::default()
                },
            ))
        }
    };
    Ok(Arc::new(RolePairedScriptProvider::new(
        config.hook.lead_bot_id,
        lead_script,
        follow_script,
    )))
}

/// Runs the Discord bridge until shutdown is requested.
pub async fn run_discord_bridge(config: DiscordBridgeRuntimeConfig) -> Result<()> {
    std::fs::create_dir_all(&config.state_dir)
        .with_context(|| format!("failed to create {}", config.state_dir.display()))?;

    let memory = Arc::new(MemoryStore::open(
        config.state_dir.join(MEMORY_STORE_FILE),
        config.max_history_turns,
    )?);
    let replay_log = Arc::new(ChatReplayLog::open(
        config.state_dir.join(CHAT_REPLAY_LOG_FILE),
    )?);

    let sender = Arc::new(DiscordChannelSender::default());
    let provider = build_script_provider(&config)?;
    let hook = Arc::new(DualMentionHook::new(
        config.hook.clone(),
        sender.clone() as Arc<dyn ChannelSender>,
        provider,
    ));

    let handler = DiscordBridgeHandler {
        sender: Arc::clone(&sender),
        hook: Arc::clone(&hook),
        memory,
        replay_log,
    };

    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::DIRECT_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT;
    let mut client = Client::builder(&config.bot_token, intents)
        .event_handler(handler)
        .await
        .context("failed to build discord client")?;

    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("discord bridge shutdown requested");
            shard_manager.shutdown_all().await;
        }
    });

    let run_result = client.start().await;

    // Drain in-flight sequences whether the gateway exited cleanly or not.
    hook.close().await;
    run_result.context("discord client terminated with an error")?;
    info!("discord bridge stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use duet_gateway::{GatewayMessage, GatewayUser};
    use duet_interaction::{LineScriptProvider, ScriptContext};
    use duet_memory::MemoryStore;

    use super::{build_replay_draft, build_script_provider, DiscordBridgeRuntimeConfig};

    fn test_event() -> GatewayMessage {
        GatewayMessage {
            message_id: 900,
            channel_id: 77,
            guild_id: Some(5),
            author: GatewayUser {
                user_id: 42,
                display_name: "Someone".to_string(),
                is_bot: false,
            },
            mention_ids: vec![111, 222],
            content: "<@111> <@222> settle this".to_string(),
            clean_content: "@lead @follow settle this".to_string(),
        }
    }

    fn test_config(state_dir: &std::path::Path) -> DiscordBridgeRuntimeConfig {
        DiscordBridgeRuntimeConfig {
            bot_token: "test-token".to_string(),
            state_dir: state_dir.to_path_buf(),
            max_history_turns: 8,
            hook: duet_interaction::DualMentionHookConfig {
                lead_bot_id: 111,
                follow_bot_id: 222,
                ..duet_interaction::DualMentionHookConfig::default()
            },
            generation: None,
        }
    }

    #[test]
    fn unit_replay_draft_carries_event_correlation() {
        let draft = build_replay_draft(&test_event());
        assert_eq!(draft.guild_id, Some(5));
        assert_eq!(draft.channel_id, 77);
        assert_eq!(draft.user_id, 42);
        assert_eq!(draft.trigger, "dual_mention");
        assert!(draft.prompt.contains("settle this"));
    }

    #[tokio::test]
    async fn functional_static_provider_wiring_serves_both_roles() {
        let dir = tempdir().expect("tempdir");
        let provider = build_script_provider(&test_config(dir.path())).expect("provider");

        let lead_context = ScriptContext {
            trigger_text: "settle this".to_string(),
            trigger_user_id: 42,
            partner_mention_id: 222,
        };
        let lead_lines = provider.provide(&lead_context, 2).await.expect("lead");
        assert!(lead_lines[0].contains("<@222>"));

        let follow_context = ScriptContext {
            partner_mention_id: 111,
            ..lead_context
        };
        let follow_lines = provider.provide(&follow_context, 2).await.expect("follow");
        assert!(follow_lines[0].contains("<@111>"));
    }

    #[test]
    fn functional_ban_gate_uses_memory_store_state() {
        let dir = tempdir().expect("tempdir");
        let store = MemoryStore::open(dir.path().join("memory.sqlite3"), 4).expect("open");
        let event = test_event();
        let guild_id = event.guild_id.expect("guild");

        assert!(!store.is_user_banned(guild_id, event.author.user_id).expect("probe"));
        store
            .ban_user(guild_id, event.author.user_id, None, Some("spam"))
            .expect("ban");
        assert!(store.is_user_banned(guild_id, event.author.user_id).expect("probe"));
    }
}

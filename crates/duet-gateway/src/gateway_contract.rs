//! Chat-gateway contract types.
//!
//! This module defines the transport-neutral inbound event shape plus the
//! outbound and hook seams. Transport runtimes adapt their native events into
//! these types so hook code never touches a gateway SDK directly.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
/// Author of an inbound gateway message.
pub struct GatewayUser {
    pub user_id: u64,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub is_bot: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
/// Inbound message event delivered to message hooks.
pub struct GatewayMessage {
    pub message_id: u64,
    pub channel_id: u64,
    #[serde(default)]
    pub guild_id: Option<u64>,
    pub author: GatewayUser,
    /// Addressed-recipient set: the user ids this message mentions.
    #[serde(default)]
    pub mention_ids: Vec<u64>,
    #[serde(default)]
    pub content: String,
    /// Display form with mention markup resolved, when the transport has one.
    #[serde(default)]
    pub clean_content: String,
}

impl GatewayMessage {
    pub fn mentions_user(&self, user_id: u64) -> bool {
        self.mention_ids.contains(&user_id)
    }
}

#[async_trait]
/// Outbound channel primitives a transport runtime must provide.
///
/// `send_text` must deliver the text without firing mention notifications;
/// `show_typing` surfaces the transport's composing indicator.
pub trait ChannelSender: Send + Sync {
    async fn send_text(&self, channel_id: u64, text: &str) -> Result<()>;

    async fn show_typing(&self, channel_id: u64) -> Result<()>;
}

#[async_trait]
/// Trait contract for gateway message hooks.
///
/// `handle_message` returns true when the hook fully handled the event and
/// the runtime must suppress its default reply behavior. `close` drains and
/// cancels any in-flight background work owned by the hook.
pub trait MessageHook: Send + Sync {
    async fn handle_message(&self, message: &GatewayMessage) -> bool;

    async fn close(&self);
}

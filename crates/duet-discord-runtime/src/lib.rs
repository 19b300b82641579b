//! Discord bridge runtime that adapts gateway events to Duet hooks.

pub mod discord_runtime;

pub use discord_runtime::{
    run_discord_bridge, DiscordBridgeRuntimeConfig, DiscordChannelSender, GenerationSettings,
};

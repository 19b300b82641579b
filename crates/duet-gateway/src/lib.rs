//! Transport-neutral chat-gateway contract shared by Duet crates.

pub mod gateway_contract;

pub use gateway_contract::{ChannelSender, GatewayMessage, GatewayUser, MessageHook};

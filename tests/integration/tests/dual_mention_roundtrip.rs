//! Cross-identity round trip: two hooks, one per process identity, observing
//! the same channel stream and coordinating only through it.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;

use duet_gateway::{ChannelSender, GatewayMessage, GatewayUser, MessageHook};
use duet_interaction::{DualMentionHook, DualMentionHookConfig, StaticScriptProvider};

const LEAD_ID: u64 = 111;
const FOLLOW_ID: u64 = 222;
const CHANNEL_ID: u64 = 77;

#[derive(Default)]
struct RecordingSender {
    sent: Mutex<Vec<String>>,
}

impl RecordingSender {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn sent_lines(&self) -> Vec<String> {
        self.sent.lock().expect("sent lock").clone()
    }
}

#[async_trait]
impl ChannelSender for RecordingSender {
    async fn send_text(&self, _channel_id: u64, text: &str) -> anyhow::Result<()> {
        self.sent.lock().expect("sent lock").push(text.to_string());
        Ok(())
    }

    async fn show_typing(&self, _channel_id: u64) -> anyhow::Result<()> {
        Ok(())
    }
}

fn hook_config() -> DualMentionHookConfig {
    DualMentionHookConfig {
        enabled: true,
        lead_bot_id: LEAD_ID,
        follow_bot_id: FOLLOW_ID,
        line_count: 3,
        pending_timeout: Duration::from_secs(5),
        first_line_delay: Duration::from_millis(5),
        between_line_delay: Duration::from_millis(2),
    }
}

fn lead_process(sender: Arc<RecordingSender>) -> DualMentionHook {
    let hook = DualMentionHook::new(
        hook_config(),
        sender,
        Arc::new(StaticScriptProvider::lead_opener()),
    );
    hook.bind_identity(LEAD_ID);
    hook
}

fn follow_process(sender: Arc<RecordingSender>) -> DualMentionHook {
    let hook = DualMentionHook::new(
        hook_config(),
        sender,
        Arc::new(StaticScriptProvider::follow_reply()),
    );
    hook.bind_identity(FOLLOW_ID);
    hook
}

fn user_trigger(message_id: u64) -> GatewayMessage {
    GatewayMessage {
        message_id,
        channel_id: CHANNEL_ID,
        guild_id: Some(1),
        author: GatewayUser {
            user_id: 42,
            display_name: "someone".to_string(),
            is_bot: false,
        },
        mention_ids: vec![LEAD_ID, FOLLOW_ID],
        content: format!("<@{LEAD_ID}> <@{FOLLOW_ID}> who runs this chat?"),
        clean_content: "@lead @follow who runs this chat?".to_string(),
    }
}

fn lead_authored(message_id: u64, text: &str) -> GatewayMessage {
    GatewayMessage {
        message_id,
        channel_id: CHANNEL_ID,
        guild_id: Some(1),
        author: GatewayUser {
            user_id: LEAD_ID,
            display_name: "lead".to_string(),
            is_bot: true,
        },
        mention_ids: vec![FOLLOW_ID],
        content: text.to_string(),
        clean_content: text.to_string(),
    }
}

async fn wait_for_lines(sender: &RecordingSender, expected: usize) {
    for _ in 0..200 {
        if sender.sent_lines().len() >= expected {
            return;
        }
        sleep(Duration::from_millis(5)).await;
    }
    panic!(
        "expected {expected} delivered lines, saw {}",
        sender.sent_lines().len()
    );
}

#[tokio::test]
async fn integration_both_identities_complete_the_exchange() {
    let lead_sender = RecordingSender::new();
    let follow_sender = RecordingSender::new();
    let lead = lead_process(Arc::clone(&lead_sender));
    let follow = follow_process(Arc::clone(&follow_sender));

    // Both processes observe the same user message.
    let trigger = user_trigger(900);
    assert!(lead.handle_message(&trigger).await);
    assert!(follow.handle_message(&trigger).await);
    assert_eq!(follow.pending_handoffs(), 1);

    // The lead speaks first; the follow only reacts to the observed stream.
    wait_for_lines(&lead_sender, 3).await;
    let first_lead_line = lead_sender.sent_lines()[0].clone();
    assert!(first_lead_line.contains(&format!("<@{FOLLOW_ID}>")));

    // The lead's first delivered message confirms the handoff.
    assert!(!follow.handle_message(&lead_authored(901, &first_lead_line)).await);
    assert_eq!(follow.pending_handoffs(), 0);
    wait_for_lines(&follow_sender, 3).await;
    assert!(follow_sender.sent_lines()[0].contains(&format!("<@{LEAD_ID}>")));

    // Later lead messages find no pending handoff and are no-ops once the
    // follow sequence has drained.
    for _ in 0..200 {
        if follow.active_sequences() == 0 {
            break;
        }
        sleep(Duration::from_millis(5)).await;
    }
    assert!(!follow.handle_message(&lead_authored(902, "another line")).await);
    assert_eq!(follow_sender.sent_lines().len(), 3);

    lead.close().await;
    follow.close().await;
}

#[tokio::test]
async fn integration_shutdown_drains_both_processes_mid_sequence() {
    let lead_sender = RecordingSender::new();
    let follow_sender = RecordingSender::new();

    let mut slow_config = hook_config();
    slow_config.between_line_delay = Duration::from_secs(3_600);
    let lead = DualMentionHook::new(
        slow_config.clone(),
        Arc::clone(&lead_sender) as Arc<dyn ChannelSender>,
        Arc::new(StaticScriptProvider::lead_opener()),
    );
    lead.bind_identity(LEAD_ID);
    let follow = DualMentionHook::new(
        slow_config,
        Arc::clone(&follow_sender) as Arc<dyn ChannelSender>,
        Arc::new(StaticScriptProvider::follow_reply()),
    );
    follow.bind_identity(FOLLOW_ID);

    let trigger = user_trigger(900);
    assert!(lead.handle_message(&trigger).await);
    assert!(follow.handle_message(&trigger).await);
    wait_for_lines(&lead_sender, 1).await;
    assert!(!follow.handle_message(&lead_authored(901, "opener")).await);
    wait_for_lines(&follow_sender, 1).await;

    lead.close().await;
    follow.close().await;
    assert_eq!(lead.active_sequences(), 0);
    assert_eq!(lead.tracked_tasks(), 0);
    assert_eq!(follow.active_sequences(), 0);
    assert_eq!(follow.tracked_tasks(), 0);
}

//! Binary entrypoint for the Duet Discord bridge.

mod cli_args;

use std::time::Duration;

use anyhow::{bail, Result};
use clap::Parser;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use duet_discord_runtime::{run_discord_bridge, DiscordBridgeRuntimeConfig, GenerationSettings};
use duet_interaction::DualMentionHookConfig;

use crate::cli_args::Cli;

fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

fn build_runtime_config(cli: &Cli) -> Result<DiscordBridgeRuntimeConfig> {
    if cli.lead_bot_id == cli.follow_bot_id {
        bail!("lead and follow bot ids must differ");
    }

    let generation = if cli.generated_scripts {
        if cli.api_key.trim().is_empty() {
            bail!("--generated-scripts requires an API key (DUET_API_KEY)");
        }
        Some(GenerationSettings {
            api_base: cli.api_base.clone(),
            api_key: cli.api_key.clone(),
            model: cli.model.clone(),
            request_timeout_ms: cli.request_timeout_ms,
            max_retries: cli.max_retries,
        })
    } else {
        None
    };

    Ok(DiscordBridgeRuntimeConfig {
        bot_token: cli.discord_token.clone(),
        state_dir: cli.state_dir.clone(),
        max_history_turns: cli.max_history_turns,
        hook: DualMentionHookConfig {
            enabled: cli.dual_mention_enabled,
            lead_bot_id: cli.lead_bot_id,
            follow_bot_id: cli.follow_bot_id,
            line_count: cli.sequence_line_count,
            pending_timeout: Duration::from_secs(cli.pending_timeout_seconds),
            first_line_delay: Duration::from_millis(cli.first_line_delay_ms),
            between_line_delay: Duration::from_millis(cli.between_line_delay_ms),
        },
        generation,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = build_runtime_config(&cli)?;
    run_discord_bridge(config).await
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use crate::cli_args::Cli;

    use super::build_runtime_config;

    fn parse(args: &[&str]) -> Cli {
        let mut full = vec![
            "duet",
            "--discord-token",
            "token",
            "--lead-bot-id",
            "111",
            "--follow-bot-id",
            "222",
        ];
        full.extend_from_slice(args);
        Cli::try_parse_from(full).expect("parse")
    }

    #[test]
    fn unit_static_config_has_no_generation_settings() {
        let config = build_runtime_config(&parse(&[])).expect("config");
        assert!(config.generation.is_none());
        assert_eq!(config.hook.lead_bot_id, 111);
        assert_eq!(config.hook.follow_bot_id, 222);
    }

    #[test]
    fn unit_generated_scripts_require_api_key() {
        let error = build_runtime_config(&parse(&["--generated-scripts"]))
            .expect_err("missing key must fail");
        assert!(error.to_string().contains("API key"));

        let config =
            build_runtime_config(&parse(&["--generated-scripts", "--api-key", "sk-test"]))
                .expect("config");
        assert!(config.generation.is_some());
    }

    #[test]
    fn unit_identical_identity_pair_is_rejected() {
        let cli = Cli::try_parse_from([
            "duet",
            "--discord-token",
            "token",
            "--lead-bot-id",
            "111",
            "--follow-bot-id",
            "111",
        ])
        .expect("parse");
        assert!(build_runtime_config(&cli).is_err());
    }
}

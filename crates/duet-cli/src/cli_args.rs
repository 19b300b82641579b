use std::path::PathBuf;

use clap::Parser;

fn parse_positive_usize(value: &str) -> Result<usize, String> {
    let parsed = value
        .parse::<usize>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

#[derive(Debug, Parser)]
#[command(
    name = "duet",
    about = "Two-identity Discord companion bots with a coordinated dual-mention exchange",
    version
)]
/// Command-line surface of the Duet bridge.
pub struct Cli {
    #[arg(long, env = "DUET_DISCORD_TOKEN", help = "Discord bot token for this identity")]
    pub discord_token: String,

    #[arg(
        long,
        env = "DUET_STATE_DIR",
        default_value = ".duet",
        help = "Directory for the memory store and replay log"
    )]
    pub state_dir: PathBuf,

    #[arg(
        long,
        env = "DUET_LEAD_BOT_ID",
        help = "User id of the identity that speaks first on a joint mention"
    )]
    pub lead_bot_id: u64,

    #[arg(
        long,
        env = "DUET_FOLLOW_BOT_ID",
        help = "User id of the identity that waits for the lead"
    )]
    pub follow_bot_id: u64,

    #[arg(
        long,
        env = "DUET_DUAL_MENTION_ENABLED",
        default_value_t = true,
        help = "Enable the dual-mention interaction hook"
    )]
    pub dual_mention_enabled: bool,

    #[arg(
        long,
        env = "DUET_SEQUENCE_LINE_COUNT",
        default_value = "3",
        value_parser = parse_positive_usize,
        help = "Lines delivered per scripted sequence"
    )]
    pub sequence_line_count: usize,

    #[arg(
        long,
        env = "DUET_PENDING_TIMEOUT_SECONDS",
        default_value = "20",
        value_parser = parse_positive_u64,
        help = "Seconds the follow identity waits for the lead before dropping the handoff"
    )]
    pub pending_timeout_seconds: u64,

    #[arg(
        long,
        env = "DUET_FIRST_LINE_DELAY_MS",
        default_value = "1600",
        value_parser = parse_positive_u64,
        help = "Composition delay before the first line of a sequence"
    )]
    pub first_line_delay_ms: u64,

    #[arg(
        long,
        env = "DUET_BETWEEN_LINE_DELAY_MS",
        default_value = "900",
        value_parser = parse_positive_u64,
        help = "Delay between subsequent lines of a sequence"
    )]
    pub between_line_delay_ms: u64,

    #[arg(
        long,
        env = "DUET_MAX_HISTORY_TURNS",
        default_value = "8",
        value_parser = parse_positive_usize,
        help = "Conversation turns retained per channel in short-term memory"
    )]
    pub max_history_turns: usize,

    #[arg(
        long,
        env = "DUET_GENERATED_SCRIPTS",
        default_value_t = false,
        help = "Generate the lead script with the model instead of static templates"
    )]
    pub generated_scripts: bool,

    #[arg(
        long,
        env = "DUET_API_BASE",
        default_value = "https://api.openai.com/v1",
        help = "Base URL for the OpenAI-compatible generation API"
    )]
    pub api_base: String,

    #[arg(
        long,
        env = "DUET_API_KEY",
        default_value = "",
        help = "API key for the generation API (required with --generated-scripts)"
    )]
    pub api_key: String,

    #[arg(
        long,
        env = "DUET_MODEL",
        default_value = "gpt-4o-mini",
        help = "Model used for generated scripts"
    )]
    pub model: String,

    #[arg(
        long,
        env = "DUET_REQUEST_TIMEOUT_MS",
        default_value = "30000",
        value_parser = parse_positive_u64,
        help = "Per-request timeout for the generation API"
    )]
    pub request_timeout_ms: u64,

    #[arg(
        long,
        env = "DUET_MAX_RETRIES",
        default_value = "2",
        help = "Retry attempts for retryable generation failures"
    )]
    pub max_retries: usize,
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::Cli;

    fn base_args() -> Vec<&'static str> {
        vec![
            "duet",
            "--discord-token",
            "token",
            "--lead-bot-id",
            "111",
            "--follow-bot-id",
            "222",
        ]
    }

    #[test]
    fn unit_defaults_cover_interaction_knobs() {
        let cli = Cli::try_parse_from(base_args()).expect("parse");
        assert!(cli.dual_mention_enabled);
        assert_eq!(cli.sequence_line_count, 3);
        assert_eq!(cli.pending_timeout_seconds, 20);
        assert!(cli.first_line_delay_ms > cli.between_line_delay_ms);
        assert!(!cli.generated_scripts);
    }

    #[test]
    fn unit_zero_line_count_is_rejected() {
        let mut args = base_args();
        args.extend(["--sequence-line-count", "0"]);
        assert!(Cli::try_parse_from(args).is_err());
    }

    #[test]
    fn unit_identity_pair_is_required() {
        let result = Cli::try_parse_from(["duet", "--discord-token", "token"]);
        assert!(result.is_err());
    }
}

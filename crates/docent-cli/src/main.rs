use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use docent_slack_runtime::{run_slack_triage, SlackTriageRuntimeConfig};
use docent_store::SqliteTriageStore;

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
    name = "docent",
    about = "Slack triage responder: rule-matched replies with feedback buttons",
    version
)]
struct Cli {
    #[arg(
        long = "slack-app-token",
        env = "DOCENT_SLACK_APP_TOKEN",
        hide_env_values = true,
        help = "Slack app-level token (xapp-...) used to open Socket Mode connections"
    )]
    slack_app_token: String,

    #[arg(
        long = "slack-bot-token",
        env = "DOCENT_SLACK_BOT_TOKEN",
        hide_env_values = true,
        help = "Slack bot token (xoxb-...) used for Web API calls"
    )]
    slack_bot_token: String,

    #[arg(
        long = "slack-api-base",
        env = "DOCENT_SLACK_API_BASE",
        default_value = "https://slack.com/api",
        help = "Base URL for the Slack Web API"
    )]
    slack_api_base: String,

    #[arg(
        long = "slack-bot-user-id",
        env = "DOCENT_SLACK_BOT_USER_ID",
        help = "Bot user id used to skip self-authored messages; resolved via auth.test when omitted"
    )]
    slack_bot_user_id: Option<String>,

    #[arg(
        long = "db-path",
        env = "DOCENT_DB_PATH",
        default_value = "docent.db",
        help = "Path to the sqlite database holding rules, dispatches, and counters"
    )]
    db_path: PathBuf,

    #[arg(
        long = "request-timeout-ms",
        env = "DOCENT_REQUEST_TIMEOUT_MS",
        default_value_t = 15_000,
        value_parser = parse_positive_u64,
        help = "Per-request timeout for Slack Web API calls in milliseconds"
    )]
    request_timeout_ms: u64,

    #[arg(
        long = "reconnect-delay-ms",
        env = "DOCENT_RECONNECT_DELAY_MS",
        default_value_t = 5_000,
        value_parser = parse_positive_u64,
        help = "Delay before reopening the Socket Mode connection after it closes, in milliseconds"
    )]
    reconnect_delay_ms: u64,
}

impl Cli {
    fn runtime_config(&self) -> SlackTriageRuntimeConfig {
        SlackTriageRuntimeConfig {
            api_base: self.slack_api_base.clone(),
            app_token: self.slack_app_token.clone(),
            bot_token: self.slack_bot_token.clone(),
            bot_user_id: self.slack_bot_user_id.clone(),
            request_timeout_ms: self.request_timeout_ms,
            reconnect_delay: Duration::from_millis(self.reconnect_delay_ms),
        }
    }
}

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

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let store = Arc::new(SqliteTriageStore::new(&cli.db_path)?);
    run_slack_triage(cli.runtime_config(), store).await
}

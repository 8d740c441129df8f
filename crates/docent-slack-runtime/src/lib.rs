//! Slack Socket Mode transport for the docent triage engine.

mod slack_runtime;

pub use slack_runtime::{run_slack_triage, SlackApiClient, SlackTriageRuntimeConfig};

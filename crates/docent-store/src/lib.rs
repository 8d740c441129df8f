//! Triage store abstractions and in-memory backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;

mod sqlite;

pub use sqlite::SqliteTriageStore;

/// Result type for triage store operations.
pub type StoreResult<T> = Result<T, TriageStoreError>;

/// Errors returned by store implementations.
#[derive(Debug, Error)]
pub enum TriageStoreError {
    #[error("dispatch for thread '{0}' already recorded")]
    DispatchAlreadyRecorded(String),
    #[error("invalid persisted value for '{field}': {value}")]
    InvalidPersistedValue { field: &'static str, value: String },
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Chrono(#[from] chrono::ParseError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A channel-scoped matching rule. Rules are administered outside the
/// engine; the engine only reads them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: i64,
    pub channel: String,
    /// Case-insensitive regex tested against message text. `None` marks the
    /// channel's default rule, which matches only when no pattern rule does.
    pub pattern: Option<String>,
    pub response_template: String,
    pub show_buttons: bool,
    pub success_label: Option<String>,
    pub fail_label: Option<String>,
    pub success_reaction: Option<String>,
    pub fail_reaction: Option<String>,
    pub success_message: Option<String>,
    pub fail_message: Option<String>,
    pub active: bool,
    pub sort_order: i64,
}

/// One row per dispatched top-level reply, keyed by the thread timestamp
/// the reply was sent under. Insert-once, read-many, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchRecord {
    pub thread_ts: String,
    pub rule_id: i64,
    pub channel: String,
    pub original_text: String,
    pub dispatched_at: DateTime<Utc>,
}

/// Aggregate per-rule counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleCounters {
    pub rule_id: i64,
    pub sent: u64,
    pub success: u64,
    pub fail: u64,
}

/// Which counter an increment targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterKind {
    Sent,
    Success,
    Fail,
}

/// Async store contract used by the dispatch and feedback flows.
#[async_trait]
pub trait TriageStore: Send + Sync {
    /// Active, pattern-bearing rules for `channel`, ascending `sort_order`.
    /// An unknown channel yields an empty list, not an error.
    async fn rules_for_channel(&self, channel: &str) -> StoreResult<Vec<Rule>>;

    /// The channel's active default rule (no pattern), lowest `sort_order`
    /// winning when the data carries more than one.
    async fn default_rule_for_channel(&self, channel: &str) -> StoreResult<Option<Rule>>;

    async fn rule_by_id(&self, rule_id: i64) -> StoreResult<Option<Rule>>;

    async fn record_dispatch(&self, record: DispatchRecord) -> StoreResult<()>;

    /// Correlation lookup; absence is a valid outcome (untracked thread).
    async fn dispatch_for_thread(&self, thread_ts: &str) -> StoreResult<Option<DispatchRecord>>;

    async fn increment_counter(&self, rule_id: i64, kind: CounterKind) -> StoreResult<()>;

    async fn counters_for_rule(&self, rule_id: i64) -> StoreResult<RuleCounters>;
}

/// In-memory implementation for tests and local experimentation.
#[derive(Debug, Default)]
pub struct InMemoryTriageStore {
    inner: RwLock<StoreInner>,
}

#[derive(Debug, Default)]
struct StoreInner {
    rules: Vec<Rule>,
    next_rule_id: i64,
    dispatches: HashMap<String, DispatchRecord>,
    counters: HashMap<i64, RuleCounters>,
}

impl InMemoryTriageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Administrative seeding helper; the engine itself never writes rules.
    pub async fn insert_rule(&self, mut rule: Rule) -> i64 {
        let mut inner = self.inner.write().await;
        if rule.id == 0 {
            inner.next_rule_id += 1;
            rule.id = inner.next_rule_id;
        } else {
            inner.next_rule_id = inner.next_rule_id.max(rule.id);
        }
        let id = rule.id;
        inner.rules.push(rule);
        id
    }
}

#[async_trait]
impl TriageStore for InMemoryTriageStore {
    async fn rules_for_channel(&self, channel: &str) -> StoreResult<Vec<Rule>> {
        let inner = self.inner.read().await;
        let mut rules: Vec<Rule> = inner
            .rules
            .iter()
            .filter(|rule| rule.channel == channel && rule.active && rule.pattern.is_some())
            .cloned()
            .collect();
        rules.sort_by(|left, right| {
            left.sort_order
                .cmp(&right.sort_order)
                .then_with(|| left.id.cmp(&right.id))
        });
        Ok(rules)
    }

    async fn default_rule_for_channel(&self, channel: &str) -> StoreResult<Option<Rule>> {
        let inner = self.inner.read().await;
        Ok(inner
            .rules
            .iter()
            .filter(|rule| rule.channel == channel && rule.active && rule.pattern.is_none())
            .min_by_key(|rule| (rule.sort_order, rule.id))
            .cloned())
    }

    async fn rule_by_id(&self, rule_id: i64) -> StoreResult<Option<Rule>> {
        let inner = self.inner.read().await;
        Ok(inner.rules.iter().find(|rule| rule.id == rule_id).cloned())
    }

    async fn record_dispatch(&self, record: DispatchRecord) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if inner.dispatches.contains_key(&record.thread_ts) {
            return Err(TriageStoreError::DispatchAlreadyRecorded(record.thread_ts));
        }
        inner.dispatches.insert(record.thread_ts.clone(), record);
        Ok(())
    }

    async fn dispatch_for_thread(&self, thread_ts: &str) -> StoreResult<Option<DispatchRecord>> {
        let inner = self.inner.read().await;
        Ok(inner.dispatches.get(thread_ts).cloned())
    }

    async fn increment_counter(&self, rule_id: i64, kind: CounterKind) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let counters = inner.counters.entry(rule_id).or_insert_with(|| RuleCounters {
            rule_id,
            ..RuleCounters::default()
        });
        match kind {
            CounterKind::Sent => counters.sent = counters.sent.saturating_add(1),
            CounterKind::Success => counters.success = counters.success.saturating_add(1),
            CounterKind::Fail => counters.fail = counters.fail.saturating_add(1),
        }
        Ok(())
    }

    async fn counters_for_rule(&self, rule_id: i64) -> StoreResult<RuleCounters> {
        let inner = self.inner.read().await;
        Ok(inner.counters.get(&rule_id).cloned().unwrap_or(RuleCounters {
            rule_id,
            ..RuleCounters::default()
        }))
    }
}

//! SQLite-backed `TriageStore` implementation with durable persistence.

use crate::{
    CounterKind, DispatchRecord, Rule, RuleCounters, StoreResult, TriageStore, TriageStoreError,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Persistent SQLite store backend.
#[derive(Debug)]
pub struct SqliteTriageStore {
    db_path: PathBuf,
}

impl SqliteTriageStore {
    /// Creates a SQLite-backed store at `path`, creating schema if needed.
    pub fn new(path: impl AsRef<Path>) -> StoreResult<Self> {
        let db_path = path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let store = Self { db_path };
        let connection = store.open_connection()?;
        store.initialize_schema(&connection)?;
        Ok(store)
    }

    fn open_connection(&self) -> StoreResult<Connection> {
        let connection = Connection::open(&self.db_path)?;
        connection.busy_timeout(Duration::from_secs(5))?;
        connection.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            "#,
        )?;
        Ok(connection)
    }

    fn initialize_schema(&self, connection: &Connection) -> StoreResult<()> {
        connection.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS rules (
                rule_id INTEGER PRIMARY KEY AUTOINCREMENT,
                channel TEXT NOT NULL,
                pattern TEXT NULL,
                response_template TEXT NOT NULL,
                show_buttons INTEGER NOT NULL,
                success_label TEXT NULL,
                fail_label TEXT NULL,
                success_reaction TEXT NULL,
                fail_reaction TEXT NULL,
                success_message TEXT NULL,
                fail_message TEXT NULL,
                active INTEGER NOT NULL,
                sort_order INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_rules_channel ON rules (channel, sort_order);

            CREATE TABLE IF NOT EXISTS dispatches (
                thread_ts TEXT PRIMARY KEY,
                rule_id INTEGER NOT NULL,
                channel TEXT NOT NULL,
                original_text TEXT NOT NULL,
                dispatched_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS rule_counters (
                rule_id INTEGER PRIMARY KEY,
                sent INTEGER NOT NULL DEFAULT 0,
                success INTEGER NOT NULL DEFAULT 0,
                fail INTEGER NOT NULL DEFAULT 0
            );
            "#,
        )?;
        Ok(())
    }

    /// Administrative seeding helper; the engine itself never writes rules.
    pub fn insert_rule(&self, rule: &Rule) -> StoreResult<i64> {
        let connection = self.open_connection()?;
        connection.execute(
            r#"
            INSERT INTO rules (
                channel, pattern, response_template, show_buttons, success_label,
                fail_label, success_reaction, fail_reaction, success_message,
                fail_message, active, sort_order
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
            params![
                rule.channel,
                rule.pattern,
                rule.response_template,
                rule.show_buttons,
                rule.success_label,
                rule.fail_label,
                rule.success_reaction,
                rule.fail_reaction,
                rule.success_message,
                rule.fail_message,
                rule.active,
                rule.sort_order,
            ],
        )?;
        Ok(connection.last_insert_rowid())
    }
}

const RULE_COLUMNS: &str = r#"
    rule_id, channel, pattern, response_template, show_buttons, success_label,
    fail_label, success_reaction, fail_reaction, success_message, fail_message,
    active, sort_order
"#;

fn rule_from_row(row: &Row<'_>) -> rusqlite::Result<Rule> {
    Ok(Rule {
        id: row.get(0)?,
        channel: row.get(1)?,
        pattern: row.get(2)?,
        response_template: row.get(3)?,
        show_buttons: row.get(4)?,
        success_label: row.get(5)?,
        fail_label: row.get(6)?,
        success_reaction: row.get(7)?,
        fail_reaction: row.get(8)?,
        success_message: row.get(9)?,
        fail_message: row.get(10)?,
        active: row.get(11)?,
        sort_order: row.get(12)?,
    })
}

#[async_trait]
impl TriageStore for SqliteTriageStore {
    async fn rules_for_channel(&self, channel: &str) -> StoreResult<Vec<Rule>> {
        let connection = self.open_connection()?;
        let mut statement = connection.prepare(&format!(
            r#"
            SELECT {RULE_COLUMNS}
            FROM rules
            WHERE channel = ?1 AND active = 1 AND pattern IS NOT NULL
            ORDER BY sort_order ASC, rule_id ASC
            "#
        ))?;
        let rules = statement
            .query_map(params![channel], rule_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rules)
    }

    async fn default_rule_for_channel(&self, channel: &str) -> StoreResult<Option<Rule>> {
        let connection = self.open_connection()?;
        let rule = connection
            .query_row(
                &format!(
                    r#"
                    SELECT {RULE_COLUMNS}
                    FROM rules
                    WHERE channel = ?1 AND active = 1 AND pattern IS NULL
                    ORDER BY sort_order ASC, rule_id ASC
                    LIMIT 1
                    "#
                ),
                params![channel],
                rule_from_row,
            )
            .optional()?;
        Ok(rule)
    }

    async fn rule_by_id(&self, rule_id: i64) -> StoreResult<Option<Rule>> {
        let connection = self.open_connection()?;
        let rule = connection
            .query_row(
                &format!("SELECT {RULE_COLUMNS} FROM rules WHERE rule_id = ?1"),
                params![rule_id],
                rule_from_row,
            )
            .optional()?;
        Ok(rule)
    }

    async fn record_dispatch(&self, record: DispatchRecord) -> StoreResult<()> {
        let mut connection = self.open_connection()?;
        let transaction = connection.transaction()?;

        let exists = transaction
            .query_row(
                "SELECT 1 FROM dispatches WHERE thread_ts = ?1",
                params![record.thread_ts],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        if exists.is_some() {
            return Err(TriageStoreError::DispatchAlreadyRecorded(record.thread_ts));
        }

        transaction.execute(
            r#"
            INSERT INTO dispatches (thread_ts, rule_id, channel, original_text, dispatched_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                record.thread_ts,
                record.rule_id,
                record.channel,
                record.original_text,
                timestamp_to_db(record.dispatched_at),
            ],
        )?;
        transaction.commit()?;
        Ok(())
    }

    async fn dispatch_for_thread(&self, thread_ts: &str) -> StoreResult<Option<DispatchRecord>> {
        let connection = self.open_connection()?;
        let row: Option<(String, i64, String, String, String)> = connection
            .query_row(
                r#"
                SELECT thread_ts, rule_id, channel, original_text, dispatched_at
                FROM dispatches
                WHERE thread_ts = ?1
                "#,
                params![thread_ts],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                    ))
                },
            )
            .optional()?;

        row.map(
            |(thread_ts, rule_id, channel, original_text, dispatched_at)| -> StoreResult<DispatchRecord> {
                Ok(DispatchRecord {
                    thread_ts,
                    rule_id,
                    channel,
                    original_text,
                    dispatched_at: timestamp_from_db(&dispatched_at)?,
                })
            },
        )
        .transpose()
    }

    async fn increment_counter(&self, rule_id: i64, kind: CounterKind) -> StoreResult<()> {
        let column = counter_column(kind);
        let connection = self.open_connection()?;
        connection.execute(
            &format!(
                r#"
                INSERT INTO rule_counters (rule_id, {column}) VALUES (?1, 1)
                ON CONFLICT(rule_id) DO UPDATE SET {column} = {column} + 1
                "#
            ),
            params![rule_id],
        )?;
        Ok(())
    }

    async fn counters_for_rule(&self, rule_id: i64) -> StoreResult<RuleCounters> {
        let connection = self.open_connection()?;
        let row: Option<(i64, i64, i64)> = connection
            .query_row(
                "SELECT sent, success, fail FROM rule_counters WHERE rule_id = ?1",
                params![rule_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let Some((sent, success, fail)) = row else {
            return Ok(RuleCounters {
                rule_id,
                ..RuleCounters::default()
            });
        };
        Ok(RuleCounters {
            rule_id,
            sent: i64_to_u64("sent", sent)?,
            success: i64_to_u64("success", success)?,
            fail: i64_to_u64("fail", fail)?,
        })
    }
}

fn counter_column(kind: CounterKind) -> &'static str {
    match kind {
        CounterKind::Sent => "sent",
        CounterKind::Success => "success",
        CounterKind::Fail => "fail",
    }
}

fn timestamp_to_db(value: DateTime<Utc>) -> String {
    value.to_rfc3339()
}

fn timestamp_from_db(value: &str) -> StoreResult<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)?.with_timezone(&Utc))
}

fn i64_to_u64(field: &'static str, value: i64) -> StoreResult<u64> {
    u64::try_from(value).map_err(|_| TriageStoreError::InvalidPersistedValue {
        field,
        value: value.to_string(),
    })
}

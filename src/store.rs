//! # Persistence Boundaries
//!
//! The engine never touches a database directly; it goes through three
//! narrow interfaces: [`RuleStore`] (rule sources per group),
//! [`VariableStore`] (persistent `vars.*` values plus the per-group log
//! FIFO), and [`StatsStore`] (the append-only event stream behind
//! `user.stats.*` / `group.stats.*`).
//!
//! The in-memory implementations back the test suites and double as
//! reference semantics: variable values are kept as JSON strings exactly
//! like the production store keeps them.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use thiserror::Error;

use crate::event::EventTag;
use crate::eval::value::Value;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Scope of a persistent variable. `User` scope always pairs with a
/// target user id; `Group` scope ignores user selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VarScope {
    Group,
    User,
}

/// A rule as stored for one group.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRule {
    pub id: i64,
    pub group_id: i64,
    pub name: String,
    pub source: String,
    pub priority: i64,
    pub active: bool,
}

#[async_trait]
pub trait RuleStore: Send + Sync {
    async fn rules_for_group(&self, group_id: i64) -> Result<Vec<StoredRule>, StoreError>;

    async fn all_rules(&self) -> Result<Vec<StoredRule>, StoreError>;

    /// Flip a rule's active flag; returns the new state, or `None` when
    /// the rule does not exist.
    async fn toggle_rule(&self, rule_id: i64) -> Result<Option<bool>, StoreError>;
}

#[async_trait]
pub trait VariableStore: Send + Sync {
    async fn read_var(
        &self,
        group_id: i64,
        scope: VarScope,
        name: &str,
        user_id: Option<i64>,
    ) -> Result<Option<Value>, StoreError>;

    async fn write_var(
        &self,
        group_id: i64,
        scope: VarScope,
        name: &str,
        value: Value,
        user_id: Option<i64>,
    ) -> Result<(), StoreError>;

    async fn delete_var(
        &self,
        group_id: i64,
        scope: VarScope,
        name: &str,
        user_id: Option<i64>,
    ) -> Result<(), StoreError>;

    /// Append to the per-group log; the store keeps a bounded FIFO.
    async fn record_log(
        &self,
        group_id: i64,
        text: &str,
        tag: Option<&str>,
    ) -> Result<(), StoreError>;
}

/// Statistic kinds queryable through `*.stats.*` paths. `Messages` counts
/// all message-bearing events: message, command, photo, video, document
/// and media_group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatKind {
    Messages,
    Joins,
    Leaves,
}

impl StatKind {
    pub fn matches(&self, tag: EventTag) -> bool {
        match self {
            StatKind::Messages => matches!(
                tag,
                EventTag::Message
                    | EventTag::Command
                    | EventTag::Photo
                    | EventTag::Video
                    | EventTag::Document
                    | EventTag::MediaGroup
            ),
            StatKind::Joins => tag == EventTag::UserJoin,
            StatKind::Leaves => tag == EventTag::UserLeave,
        }
    }
}

#[async_trait]
pub trait StatsStore: Send + Sync {
    /// Append one event to the stream.
    async fn record(
        &self,
        group_id: i64,
        tag: EventTag,
        user_id: Option<i64>,
        timestamp: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Count matching events in `[now - window, now]`, optionally
    /// narrowed to one user.
    async fn count(
        &self,
        group_id: i64,
        kind: StatKind,
        window: Duration,
        user_id: Option<i64>,
    ) -> Result<i64, StoreError>;
}

// ---- in-memory implementations -------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub text: String,
    pub tag: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// In-memory [`VariableStore`]. Values are serialized to JSON strings on
/// write and deserialized on read; a non-JSON string read back falls back
/// to an integer parse, then to the raw string.
pub struct MemoryVariableStore {
    values: DashMap<(i64, Option<i64>, String), String>,
    logs: DashMap<i64, VecDeque<LogEntry>>,
    log_capacity: usize,
}

impl Default for MemoryVariableStore {
    fn default() -> Self {
        Self::new(500)
    }
}

impl MemoryVariableStore {
    pub fn new(log_capacity: usize) -> Self {
        Self {
            values: DashMap::new(),
            logs: DashMap::new(),
            log_capacity,
        }
    }

    fn key(group_id: i64, scope: VarScope, name: &str, user_id: Option<i64>) -> (i64, Option<i64>, String) {
        let user = match scope {
            VarScope::Group => None,
            VarScope::User => user_id,
        };
        (group_id, user, name.to_string())
    }

    /// Raw write used by tests to seed legacy, non-JSON values.
    pub fn seed_raw(&self, group_id: i64, scope: VarScope, name: &str, user_id: Option<i64>, raw: &str) {
        self.values
            .insert(Self::key(group_id, scope, name, user_id), raw.to_string());
    }

    pub fn logs(&self, group_id: i64) -> Vec<LogEntry> {
        self.logs
            .get(&group_id)
            .map(|entries| entries.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn decode(raw: &str) -> Value {
        match serde_json::from_str::<serde_json::Value>(raw) {
            Ok(json) => Value::from_json(json),
            Err(_) => match raw.parse::<i64>() {
                Ok(i) => Value::Integer(i),
                Err(_) => Value::String(raw.to_string()),
            },
        }
    }
}

#[async_trait]
impl VariableStore for MemoryVariableStore {
    async fn read_var(
        &self,
        group_id: i64,
        scope: VarScope,
        name: &str,
        user_id: Option<i64>,
    ) -> Result<Option<Value>, StoreError> {
        Ok(self
            .values
            .get(&Self::key(group_id, scope, name, user_id))
            .map(|raw| Self::decode(&raw)))
    }

    async fn write_var(
        &self,
        group_id: i64,
        scope: VarScope,
        name: &str,
        value: Value,
        user_id: Option<i64>,
    ) -> Result<(), StoreError> {
        self.values.insert(
            Self::key(group_id, scope, name, user_id),
            value.to_json().to_string(),
        );
        Ok(())
    }

    async fn delete_var(
        &self,
        group_id: i64,
        scope: VarScope,
        name: &str,
        user_id: Option<i64>,
    ) -> Result<(), StoreError> {
        self.values.remove(&Self::key(group_id, scope, name, user_id));
        Ok(())
    }

    async fn record_log(
        &self,
        group_id: i64,
        text: &str,
        tag: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut entries = self.logs.entry(group_id).or_default();
        if entries.len() >= self.log_capacity {
            entries.pop_front();
        }
        entries.push_back(LogEntry {
            text: text.to_string(),
            tag: tag.map(str::to_string),
            timestamp: Utc::now(),
        });
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct StatEvent {
    group_id: i64,
    tag: EventTag,
    user_id: Option<i64>,
    timestamp: DateTime<Utc>,
}

/// In-memory [`StatsStore`] over a flat event vector.
#[derive(Default)]
pub struct MemoryStatsStore {
    events: Mutex<Vec<StatEvent>>,
}

impl MemoryStatsStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StatsStore for MemoryStatsStore {
    async fn record(
        &self,
        group_id: i64,
        tag: EventTag,
        user_id: Option<i64>,
        timestamp: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.events.lock().unwrap().push(StatEvent {
            group_id,
            tag,
            user_id,
            timestamp,
        });
        Ok(())
    }

    async fn count(
        &self,
        group_id: i64,
        kind: StatKind,
        window: Duration,
        user_id: Option<i64>,
    ) -> Result<i64, StoreError> {
        let since = Utc::now() - chrono::Duration::from_std(window).unwrap_or_default();
        let events = self.events.lock().unwrap();
        let count = events
            .iter()
            .filter(|e| e.group_id == group_id)
            .filter(|e| kind.matches(e.tag))
            .filter(|e| e.timestamp >= since)
            .filter(|e| user_id.is_none() || e.user_id == user_id)
            .count();
        Ok(count as i64)
    }
}

/// In-memory [`RuleStore`].
#[derive(Default)]
pub struct MemoryRuleStore {
    rules: DashMap<i64, StoredRule>,
    next_id: AtomicI64,
}

impl MemoryRuleStore {
    pub fn new() -> Self {
        Self {
            rules: DashMap::new(),
            next_id: AtomicI64::new(1),
        }
    }

    pub fn add_rule(
        &self,
        group_id: i64,
        name: &str,
        source: &str,
        priority: i64,
    ) -> StoredRule {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let rule = StoredRule {
            id,
            group_id,
            name: name.to_string(),
            source: source.to_string(),
            priority,
            active: true,
        };
        self.rules.insert(id, rule.clone());
        rule
    }
}

#[async_trait]
impl RuleStore for MemoryRuleStore {
    async fn rules_for_group(&self, group_id: i64) -> Result<Vec<StoredRule>, StoreError> {
        let mut rules: Vec<StoredRule> = self
            .rules
            .iter()
            .filter(|entry| entry.group_id == group_id)
            .map(|entry| entry.clone())
            .collect();
        rules.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));
        Ok(rules)
    }

    async fn all_rules(&self) -> Result<Vec<StoredRule>, StoreError> {
        let mut rules: Vec<StoredRule> = self.rules.iter().map(|entry| entry.clone()).collect();
        rules.sort_by_key(|r| r.id);
        Ok(rules)
    }

    async fn toggle_rule(&self, rule_id: i64) -> Result<Option<bool>, StoreError> {
        match self.rules.get_mut(&rule_id) {
            Some(mut rule) => {
                rule.active = !rule.active;
                Ok(Some(rule.active))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_variable_json_roundtrip() {
        let store = MemoryVariableStore::default();
        store
            .write_var(1, VarScope::User, "warnings", Value::Integer(2), Some(77))
            .await
            .unwrap();

        let value = store
            .read_var(1, VarScope::User, "warnings", Some(77))
            .await
            .unwrap();
        assert_eq!(value, Some(Value::Integer(2)));

        // Group scope ignores the user id.
        let value = store.read_var(1, VarScope::Group, "warnings", Some(77)).await.unwrap();
        assert_eq!(value, None);
    }

    #[tokio::test]
    async fn test_legacy_raw_values_decode() {
        let store = MemoryVariableStore::default();
        store.seed_raw(1, VarScope::Group, "n", None, "-12");
        store.seed_raw(1, VarScope::Group, "s", None, "plain text");

        assert_eq!(
            store.read_var(1, VarScope::Group, "n", None).await.unwrap(),
            Some(Value::Integer(-12))
        );
        assert_eq!(
            store.read_var(1, VarScope::Group, "s", None).await.unwrap(),
            Some(Value::String("plain text".to_string()))
        );
    }

    #[tokio::test]
    async fn test_delete_var() {
        let store = MemoryVariableStore::default();
        store
            .write_var(1, VarScope::Group, "x", Value::Boolean(true), None)
            .await
            .unwrap();
        store.delete_var(1, VarScope::Group, "x", None).await.unwrap();
        assert_eq!(store.read_var(1, VarScope::Group, "x", None).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_log_fifo_capacity() {
        let store = MemoryVariableStore::new(3);
        for i in 0..5 {
            store
                .record_log(9, &format!("entry {}", i), None)
                .await
                .unwrap();
        }
        let logs = store.logs(9);
        assert_eq!(logs.len(), 3);
        assert_eq!(logs[0].text, "entry 2");
        assert_eq!(logs[2].text, "entry 4");
    }

    #[tokio::test]
    async fn test_stats_window_and_kind() {
        let store = MemoryStatsStore::new();
        let now = Utc::now();
        store.record(1, EventTag::Message, Some(7), now).await.unwrap();
        store.record(1, EventTag::Photo, Some(7), now).await.unwrap();
        store.record(1, EventTag::UserJoin, Some(8), now).await.unwrap();
        store
            .record(1, EventTag::Message, Some(9), now - chrono::Duration::hours(2))
            .await
            .unwrap();

        let count = store
            .count(1, StatKind::Messages, Duration::from_secs(3600), None)
            .await
            .unwrap();
        assert_eq!(count, 2);

        let count = store
            .count(1, StatKind::Messages, Duration::from_secs(3600), Some(7))
            .await
            .unwrap();
        assert_eq!(count, 2);

        let count = store
            .count(1, StatKind::Joins, Duration::from_secs(3600), None)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_rule_store_priority_order_and_toggle() {
        let store = MemoryRuleStore::new();
        let low = store.add_rule(1, "low", "WHEN message THEN { } END", 10);
        let high = store.add_rule(1, "high", "WHEN message THEN { } END", 100);
        store.add_rule(2, "other group", "WHEN message THEN { } END", 50);

        let rules = store.rules_for_group(1).await.unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].id, high.id);
        assert_eq!(rules[1].id, low.id);

        assert_eq!(store.toggle_rule(low.id).await.unwrap(), Some(false));
        assert_eq!(store.toggle_rule(low.id).await.unwrap(), Some(true));
        assert_eq!(store.toggle_rule(999).await.unwrap(), None);
    }
}

//! # Event Dispatcher
//!
//! Receives canonical events from the [`EventBus`], routes media-group
//! fragments through the aggregator, keeps the lazily-populated per-group
//! rule cache, and executes matching rules in priority order. Each event
//! runs as its own task; no failure crosses the task boundary.
//!
//! The administrative commands (`/rules`, `/togglerule`, `/reload_rules`)
//! are handled here by a built-in system rule before group rules run.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::actions::ActionRegistry;
use crate::aggregator::MediaGroupAggregator;
use crate::ast::Rule;
use crate::eval::context::{ExecutionContext, SharedContext};
use crate::event::{ChatEvent, EventBus, EventError, EventTag};
use crate::executor::{ExecutionOutcome, RuleExecutor};
use crate::parser;
use crate::platform::PlatformClient as _;
use crate::resolver::ContextResolver;
use crate::scheduler::Scheduler;
use crate::store::{RuleStore, StatsStore as _, StoreError};

/// A stored rule compiled into its shareable, immutable form.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub id: i64,
    pub name: String,
    pub priority: i64,
    pub active: bool,
    pub source_hash: u64,
    pub rule: Rule,
}

fn source_hash(source: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    source.hash(&mut hasher);
    hasher.finish()
}

pub struct Dispatcher {
    shared: Arc<SharedContext>,
    rule_store: Arc<dyn RuleStore>,
    rule_cache: DashMap<i64, Arc<Vec<Arc<CompiledRule>>>>,
    aggregator: MediaGroupAggregator,
    executor: RuleExecutor,
    bus: Arc<EventBus>,
    scheduler: Mutex<Option<Arc<Scheduler>>>,
}

impl Dispatcher {
    pub fn new(
        shared: Arc<SharedContext>,
        rule_store: Arc<dyn RuleStore>,
        bus: Arc<EventBus>,
    ) -> Self {
        let aggregator =
            MediaGroupAggregator::new(bus.clone(), shared.config.media_group_delay);
        let executor = RuleExecutor::new(
            Arc::new(ContextResolver::new()),
            Arc::new(ActionRegistry::new()),
        );
        Self {
            shared,
            rule_store,
            rule_cache: DashMap::new(),
            aggregator,
            executor,
            bus,
            scheduler: Mutex::new(None),
        }
    }

    /// Wire in the cron scheduler so rule-cache invalidation also
    /// reinstalls scheduled jobs.
    pub fn attach_scheduler(&self, scheduler: Arc<Scheduler>) {
        *self.scheduler.lock().unwrap() = Some(scheduler);
    }

    /// Consume the bus until shutdown; each event runs as one task.
    /// On shutdown intake stops, running tasks get a bounded grace
    /// period, and pending aggregation timers are dropped.
    pub async fn run(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut rx = self.bus.subscribe();
        let mut tasks: Vec<JoinHandle<()>> = Vec::new();

        loop {
            tokio::select! {
                received = rx.recv() => match received {
                    Ok(event) => {
                        tasks.retain(|task| !task.is_finished());
                        let dispatcher = self.clone();
                        tasks.push(tokio::spawn(async move {
                            dispatcher.handle_event(event).await;
                        }));
                    }
                    Err(EventError::Lagged { count }) => {
                        tracing::warn!(count, "dispatcher lagged behind the event bus");
                    }
                    Err(_) => break,
                },
                _ = shutdown_rx.recv() => {
                    tracing::info!("dispatcher shutting down");
                    break;
                }
            }
        }

        let grace = self.shared.config.shutdown_timeout;
        if tokio::time::timeout(grace, futures::future::join_all(tasks))
            .await
            .is_err()
        {
            tracing::warn!("event tasks still running after shutdown grace period");
        }
        self.aggregator.shutdown();
    }

    #[tracing::instrument(level = "debug", skip(self, event), fields(group_id = event.group_id, tag = %event.tag))]
    pub async fn handle_event(&self, event: ChatEvent) {
        // Media-group fragments are aggregated, not dispatched.
        if matches!(event.tag, EventTag::Photo | EventTag::Video) {
            if let Some(message) = &event.message {
                if let Some(media_group_id) = message.media_group_id.clone() {
                    self.record_stats(&event).await;
                    self.aggregator
                        .add(&media_group_id, event.group_id, message.clone());
                    return;
                }
            }
        }

        if event.tag != EventTag::Schedule {
            self.record_stats(&event).await;
        }

        if event.tag == EventTag::Command && self.handle_admin_command(&event).await {
            return;
        }

        let rules = match self.rules_for_group(event.group_id).await {
            Ok(rules) => rules,
            Err(e) => {
                // Store unreachable: skip this group now, retry on the
                // next event (the cache stays empty).
                tracing::error!(group_id = event.group_id, error = %e, "rule load failed");
                return;
            }
        };

        let memo = Arc::new(DashMap::new());
        let event = Arc::new(event);
        for compiled in rules.iter() {
            if !compiled.active || !compiled.rule.matches(event.tag) {
                continue;
            }
            let ctx = ExecutionContext::new(
                self.shared.clone(),
                event.clone(),
                memo.clone(),
                compiled.id,
            );
            match self.executor.execute(&compiled.rule, &ctx).await {
                ExecutionOutcome::Stopped => {
                    tracing::debug!(rule_id = compiled.id, "rule requested stop");
                    break;
                }
                ExecutionOutcome::Errored => {
                    tracing::debug!(rule_id = compiled.id, "rule errored, continuing");
                }
                ExecutionOutcome::Completed => {}
            }
        }
    }

    async fn record_stats(&self, event: &ChatEvent) {
        let user_id = event.user.as_ref().map(|u| u.id);
        if let Err(e) = self
            .shared
            .stats
            .record(event.group_id, event.tag, user_id, Utc::now())
            .await
        {
            tracing::warn!(group_id = event.group_id, error = %e, "stats record failed");
        }
    }

    async fn rules_for_group(
        &self,
        group_id: i64,
    ) -> Result<Arc<Vec<Arc<CompiledRule>>>, StoreError> {
        if let Some(cached) = self.rule_cache.get(&group_id) {
            return Ok(cached.clone());
        }

        tracing::info!(group_id, "rule cache miss, loading from store");
        let stored = self.rule_store.rules_for_group(group_id).await?;
        let mut compiled = Vec::with_capacity(stored.len());
        for rule in stored {
            match parser::compile(&rule.source) {
                Ok(ast) => compiled.push(Arc::new(CompiledRule {
                    id: rule.id,
                    name: rule.name,
                    priority: rule.priority,
                    active: rule.active,
                    source_hash: source_hash(&rule.source),
                    rule: ast,
                })),
                Err(e) => {
                    // A rule that fails to parse is logged once and
                    // excluded from the group's set.
                    tracing::error!(rule_id = rule.id, name = %rule.name, error = %e, "rule failed to parse");
                }
            }
        }
        compiled.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));

        let compiled = Arc::new(compiled);
        self.rule_cache.insert(group_id, compiled.clone());
        Ok(compiled)
    }

    pub fn invalidate_group(&self, group_id: i64) {
        self.rule_cache.remove(&group_id);
    }

    pub fn invalidate_all(&self) {
        self.rule_cache.clear();
    }

    pub fn cached_group_count(&self) -> usize {
        self.rule_cache.len()
    }

    async fn reinstall_schedules(&self) {
        let scheduler = self.scheduler.lock().unwrap().clone();
        if let Some(scheduler) = scheduler {
            scheduler.reinstall().await;
        }
    }

    /// The built-in system rule for administrative commands. Returns
    /// whether the event was consumed.
    async fn handle_admin_command(&self, event: &ChatEvent) -> bool {
        let text = match event.message.as_ref().and_then(|m| m.text.clone()) {
            Some(text) => text,
            None => return false,
        };
        let mut words = text.split_whitespace();
        let name = match words.next().and_then(|w| w.strip_prefix('/')) {
            Some(name) => name,
            None => return false,
        };

        match name {
            "rules" => {
                let listing = match self.rules_for_group(event.group_id).await {
                    Ok(rules) => {
                        let lines: Vec<String> = rules
                            .iter()
                            .filter(|r| r.active)
                            .map(|r| format!("{}: {} (priority {})", r.id, r.name, r.priority))
                            .collect();
                        if lines.is_empty() {
                            "no active rules".to_string()
                        } else {
                            lines.join("\n")
                        }
                    }
                    Err(e) => format!("failed to load rules: {}", e),
                };
                self.send_admin_reply(event.group_id, &listing).await;
                true
            }
            "togglerule" => {
                let reply = match words.next().and_then(|arg| arg.parse::<i64>().ok()) {
                    Some(rule_id) => match self.rule_store.toggle_rule(rule_id).await {
                        Ok(Some(active)) => {
                            self.invalidate_group(event.group_id);
                            self.reinstall_schedules().await;
                            format!(
                                "rule {} is now {}",
                                rule_id,
                                if active { "active" } else { "disabled" }
                            )
                        }
                        Ok(None) => format!("rule {} not found", rule_id),
                        Err(e) => format!("failed to toggle rule {}: {}", rule_id, e),
                    },
                    None => "usage: /togglerule <id>".to_string(),
                };
                self.send_admin_reply(event.group_id, &reply).await;
                true
            }
            "reload_rules" => {
                self.invalidate_all();
                self.reinstall_schedules().await;
                self.send_admin_reply(event.group_id, "rules reloaded").await;
                true
            }
            _ => false,
        }
    }

    async fn send_admin_reply(&self, group_id: i64, text: &str) {
        if let Err(e) = self.shared.platform.send_message(group_id, text).await {
            tracing::error!(group_id, error = %e, "admin reply failed");
        }
    }
}

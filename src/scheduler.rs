//! # Schedule Trigger Scheduler
//!
//! Rules with a `schedule("<cron>")` trigger are installed here once at
//! startup and again on every rule-cache invalidation. Each installed job
//! wakes at minute boundaries and, when its cron spec matches, publishes a
//! synthetic `schedule` event (no user fields) for the rule's group.

use std::sync::Arc;

use chrono::{DateTime, Datelike, Timelike, Utc};
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::event::{ChatEvent, EventBus, EventTag};
use crate::parser;
use crate::store::RuleStore;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScheduleError {
    #[error("cron expression must have 5 fields, got {0}")]
    WrongFieldCount(usize),
    #[error("invalid cron field '{text}' for {field}")]
    InvalidField { field: &'static str, text: String },
}

/// A parsed five-field cron expression:
/// `minute hour day-of-month month day-of-week`.
#[derive(Debug, Clone, PartialEq)]
pub struct CronSpec {
    minute: FieldSpec,
    hour: FieldSpec,
    day_of_month: FieldSpec,
    month: FieldSpec,
    day_of_week: FieldSpec,
}

#[derive(Debug, Clone, PartialEq)]
struct FieldSpec {
    any: bool,
    allowed: Vec<u8>,
}

impl FieldSpec {
    fn matches(&self, value: u8) -> bool {
        self.any || self.allowed.contains(&value)
    }
}

impl CronSpec {
    pub fn parse(expression: &str) -> Result<Self, ScheduleError> {
        let fields: Vec<&str> = expression.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(ScheduleError::WrongFieldCount(fields.len()));
        }
        Ok(Self {
            minute: parse_field(fields[0], 0, 59, "minute")?,
            hour: parse_field(fields[1], 0, 23, "hour")?,
            day_of_month: parse_field(fields[2], 1, 31, "day-of-month")?,
            month: parse_field(fields[3], 1, 12, "month")?,
            day_of_week: parse_dow_field(fields[4])?,
        })
    }

    pub fn matches(&self, t: DateTime<Utc>) -> bool {
        if !self.minute.matches(t.minute() as u8)
            || !self.hour.matches(t.hour() as u8)
            || !self.month.matches(t.month() as u8)
        {
            return false;
        }

        let dom = self.day_of_month.matches(t.day() as u8);
        let dow = self
            .day_of_week
            .matches(t.weekday().num_days_from_sunday() as u8);
        // Standard cron: when both day fields are restricted, either one
        // matching suffices.
        if !self.day_of_month.any && !self.day_of_week.any {
            dom || dow
        } else {
            dom && dow
        }
    }
}

fn parse_field(
    text: &str,
    min: u8,
    max: u8,
    field: &'static str,
) -> Result<FieldSpec, ScheduleError> {
    let invalid = || ScheduleError::InvalidField {
        field,
        text: text.to_string(),
    };

    if text == "*" {
        return Ok(FieldSpec {
            any: true,
            allowed: Vec::new(),
        });
    }

    let mut allowed = Vec::new();
    for item in text.split(',') {
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => {
                let step: u8 = step.parse().map_err(|_| invalid())?;
                if step == 0 {
                    return Err(invalid());
                }
                (range, step)
            }
            None => (item, 1),
        };

        let (start, end) = if range == "*" {
            (min, max)
        } else if let Some((a, b)) = range.split_once('-') {
            let a: u8 = a.parse().map_err(|_| invalid())?;
            let b: u8 = b.parse().map_err(|_| invalid())?;
            (a, b)
        } else {
            let v: u8 = range.parse().map_err(|_| invalid())?;
            (v, v)
        };

        if start < min || end > max || start > end {
            return Err(invalid());
        }
        let mut value = start;
        while value <= end {
            allowed.push(value);
            match value.checked_add(step) {
                Some(next) => value = next,
                None => break,
            }
        }
    }
    allowed.sort_unstable();
    allowed.dedup();
    Ok(FieldSpec {
        any: false,
        allowed,
    })
}

/// Day-of-week allows 0-7 with 7 folding to Sunday (0).
fn parse_dow_field(text: &str) -> Result<FieldSpec, ScheduleError> {
    let mut spec = parse_field(text, 0, 7, "day-of-week")?;
    if spec.allowed.contains(&7) {
        spec.allowed.retain(|v| *v != 7);
        spec.allowed.push(0);
        spec.allowed.sort_unstable();
        spec.allowed.dedup();
    }
    Ok(spec)
}

pub struct Scheduler {
    rule_store: Arc<dyn RuleStore>,
    bus: Arc<EventBus>,
    jobs: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(rule_store: Arc<dyn RuleStore>, bus: Arc<EventBus>) -> Self {
        Self {
            rule_store,
            bus,
            jobs: tokio::sync::Mutex::new(Vec::new()),
        }
    }

    /// Install one job per active schedule rule, replacing any jobs from
    /// an earlier installation.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn install_all(&self) {
        let mut jobs = self.jobs.lock().await;
        for job in jobs.drain(..) {
            job.abort();
        }

        let stored = match self.rule_store.all_rules().await {
            Ok(stored) => stored,
            Err(e) => {
                tracing::error!(error = %e, "scheduler could not load rules");
                return;
            }
        };

        for rule in stored.into_iter().filter(|r| r.active) {
            let ast = match parser::compile(&rule.source) {
                Ok(ast) => ast,
                Err(_) => continue,
            };
            let Some(cron) = ast.schedule() else {
                continue;
            };
            let spec = match CronSpec::parse(cron) {
                Ok(spec) => spec,
                Err(e) => {
                    tracing::error!(rule_id = rule.id, cron, error = %e, "invalid cron expression");
                    continue;
                }
            };

            tracing::info!(rule_id = rule.id, group_id = rule.group_id, cron, "schedule installed");
            let bus = self.bus.clone();
            let group_id = rule.group_id;
            jobs.push(tokio::spawn(async move {
                loop {
                    tokio::time::sleep(until_next_minute()).await;
                    if spec.matches(Utc::now()) {
                        let event = ChatEvent::new(EventTag::Schedule, group_id);
                        if let Err(e) = bus.publish(event).await {
                            tracing::error!(group_id, error = %e, "schedule publish failed");
                            return;
                        }
                    }
                }
            }));
        }
    }

    pub async fn reinstall(&self) {
        self.install_all().await;
    }

    pub async fn shutdown(&self) {
        let mut jobs = self.jobs.lock().await;
        for job in jobs.drain(..) {
            job.abort();
        }
    }

    pub async fn job_count(&self) -> usize {
        self.jobs.lock().await.len()
    }
}

fn until_next_minute() -> std::time::Duration {
    let now = Utc::now();
    let seconds = 60 - now.second().min(59) as u64;
    std::time::Duration::from_secs(seconds.max(1))
}

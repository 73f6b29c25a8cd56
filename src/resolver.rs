//! # Variable Resolver
//!
//! Bridges rule scripts and the live world. When the evaluator meets a
//! path that is not a local variable (`user.is_admin`,
//! `vars.group.welcome`, `command.arg[0]`), it hands the whole path to the
//! resolver, which answers from the event, the platform API, or the
//! stores.
//!
//! Anything that costs a platform or database round trip is memoized in
//! the per-event cache keyed by the canonical path string, so one dispatch
//! never pays for the same lookup twice.

use std::fmt::Write as _;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use thiserror::Error;

use crate::eval::context::ExecutionContext;
use crate::eval::value::Value;
use crate::event::EventTag;
use crate::platform::PlatformClient as _;
use crate::store::{StatKind, StatsStore as _, StoreError, VarScope, VariableStore as _};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResolveError {
    #[error("ResolveError: unknown path '{0}'")]
    UnknownPath(String),
    #[error("ResolveError: {0}")]
    Store(String),
}

impl From<StoreError> for ResolveError {
    fn from(e: StoreError) -> Self {
        ResolveError::Store(e.to_string())
    }
}

/// One resolved segment of a path; index expressions arrive
/// pre-evaluated.
#[derive(Debug, Clone, PartialEq)]
pub enum PathPart {
    Attr(String),
    Index(Value),
}

/// Canonical path string, used for memo keys and diagnostics:
/// `command.arg[0]`, `vars.user_12345.warnings`.
pub fn canonical_path(parts: &[PathPart]) -> String {
    let mut out = String::new();
    for part in parts {
        match part {
            PathPart::Attr(name) => {
                if !out.is_empty() {
                    out.push('.');
                }
                out.push_str(name);
            }
            PathPart::Index(value) => {
                let _ = write!(out, "[{}]", value);
            }
        }
    }
    out
}

/// Null-safe navigation through an already-resolved value. A null at any
/// point makes the whole result null; an unknown attribute on a non-null
/// platform object is an error.
pub fn navigate(base: Value, parts: &[PathPart], full_path: &str) -> Result<Value, ResolveError> {
    let mut current = base;
    for part in parts {
        if current.is_null() {
            return Ok(Value::Null);
        }
        current = match (&current, part) {
            (Value::Message(m), PathPart::Attr(name)) => m
                .field(name)
                .ok_or_else(|| ResolveError::UnknownPath(full_path.to_string()))?,
            (Value::User(u), PathPart::Attr(name)) => u
                .field(name)
                .ok_or_else(|| ResolveError::UnknownPath(full_path.to_string()))?,
            (Value::Map(map), PathPart::Attr(name)) => {
                map.get(name).cloned().unwrap_or(Value::Null)
            }
            (Value::Map(map), PathPart::Index(Value::String(key))) => {
                map.get(key).cloned().unwrap_or(Value::Null)
            }
            (Value::List(items), PathPart::Index(index)) => index
                .as_integer()
                .and_then(|i| usize::try_from(i).ok())
                .and_then(|i| items.get(i).cloned())
                .unwrap_or(Value::Null),
            (Value::String(s), PathPart::Index(index)) => index
                .as_integer()
                .and_then(|i| usize::try_from(i).ok())
                .and_then(|i| s.chars().nth(i))
                .map(|c| Value::String(c.to_string()))
                .unwrap_or(Value::Null),
            _ => return Err(ResolveError::UnknownPath(full_path.to_string())),
        };
    }
    Ok(current)
}

/// The single-method boundary the evaluator depends on, so the executor
/// is unit-testable without a live platform or database.
#[async_trait]
pub trait VariableResolver: Send + Sync {
    async fn resolve(
        &self,
        parts: &[PathPart],
        ctx: &ExecutionContext,
    ) -> Result<Value, ResolveError>;
}

/// Production resolver over the event, platform client and stores.
pub struct ContextResolver {
    stats_pattern: Regex,
    user_scope_pattern: Regex,
}

impl Default for ContextResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextResolver {
    pub fn new() -> Self {
        Self {
            stats_pattern: Regex::new(r"^(messages|joins|leaves)_(\d+)([smhd])$").unwrap(),
            user_scope_pattern: Regex::new(r"^user_(\d+)$").unwrap(),
        }
    }

    async fn resolve_user(
        &self,
        parts: &[PathPart],
        rest: &[PathPart],
        ctx: &ExecutionContext,
    ) -> Result<Value, ResolveError> {
        let user_value = ctx
            .event
            .user
            .clone()
            .map(Value::User)
            .unwrap_or(Value::Null);

        match rest.first() {
            None => Ok(user_value),
            Some(PathPart::Attr(name)) if name == "is_admin" && rest.len() == 1 => {
                self.resolve_is_admin(ctx).await
            }
            Some(PathPart::Attr(name)) if name == "stats" => {
                let user_id = match &ctx.event.user {
                    Some(user) => user.id,
                    None => return Ok(Value::Integer(0)),
                };
                self.resolve_stats(parts, &rest[1..], ctx, Some(user_id))
                    .await
            }
            _ => navigate(user_value, rest, &canonical_path(parts)),
        }
    }

    async fn resolve_is_admin(&self, ctx: &ExecutionContext) -> Result<Value, ResolveError> {
        let user = match &ctx.event.user {
            Some(user) => user.clone(),
            None => return Ok(Value::Boolean(false)),
        };
        let chat_id = ctx.event.group_id;

        let key = format!("user.is_admin:{}:{}", chat_id, user.id);
        if let Some(cached) = ctx.memo_get(&key) {
            return Ok(cached);
        }

        match ctx.shared.platform.get_chat_member(chat_id, user.id).await {
            Ok(member) => {
                let value = Value::Boolean(member.status.is_admin());
                ctx.memo_insert(&key, value.clone());
                Ok(value)
            }
            Err(e) => {
                // API failure degrades to "not an admin" instead of
                // failing the rule.
                tracing::error!(user_id = user.id, chat_id, error = %e, "get_chat_member failed");
                Ok(Value::Boolean(false))
            }
        }
    }

    async fn resolve_stats(
        &self,
        parts: &[PathPart],
        rest: &[PathPart],
        ctx: &ExecutionContext,
        user_id: Option<i64>,
    ) -> Result<Value, ResolveError> {
        let full_path = canonical_path(parts);
        let suffix = match rest {
            [PathPart::Attr(suffix)] => suffix,
            _ => return Err(ResolveError::UnknownPath(full_path)),
        };

        let captures = self
            .stats_pattern
            .captures(suffix)
            .ok_or_else(|| ResolveError::UnknownPath(full_path.clone()))?;
        let kind = match &captures[1] {
            "messages" => StatKind::Messages,
            "joins" => StatKind::Joins,
            "leaves" => StatKind::Leaves,
            _ => unreachable!("anchored by the pattern"),
        };
        // Per-user statistics only support message counts.
        if user_id.is_some() && kind != StatKind::Messages {
            return Err(ResolveError::UnknownPath(full_path));
        }

        let amount: u64 = captures[2].parse().unwrap_or(0);
        let unit_seconds = match &captures[3] {
            "s" => 1,
            "m" => 60,
            "h" => 3600,
            "d" => 86_400,
            _ => unreachable!("anchored by the pattern"),
        };
        let window = Duration::from_secs(amount * unit_seconds);

        if let Some(cached) = ctx.memo_get(&full_path) {
            return Ok(cached);
        }
        let count = ctx
            .shared
            .stats
            .count(ctx.event.group_id, kind, window, user_id)
            .await?;
        let value = Value::Integer(count);
        ctx.memo_insert(&full_path, value.clone());
        Ok(value)
    }

    fn command_data(&self, ctx: &ExecutionContext) -> Value {
        if ctx.event.tag != EventTag::Command {
            return Value::Null;
        }
        let text = match ctx.event.message.as_ref().and_then(|m| m.text.clone()) {
            Some(text) if text.starts_with('/') => text,
            _ => return Value::Null,
        };

        if let Some(cached) = ctx.memo_get("command") {
            return cached;
        }

        let (tokens, full_args) = split_command_text(&text);
        let name = tokens
            .first()
            .map(|t| t.trim_start_matches('/').to_string())
            .unwrap_or_default();
        let args: Vec<Value> = tokens
            .iter()
            .skip(1)
            .map(|t| Value::String(t.clone()))
            .collect();

        let map = Value::Map(
            [
                ("name".to_string(), Value::String(name)),
                // The count includes the command token itself.
                ("arg_count".to_string(), Value::Integer(tokens.len() as i64)),
                ("arg".to_string(), Value::List(args)),
                ("full_args".to_string(), Value::String(full_args)),
                ("full_text".to_string(), Value::String(text)),
            ]
            .into_iter()
            .collect(),
        );
        ctx.memo_insert("command", map.clone());
        map
    }

    fn media_group_data(&self, ctx: &ExecutionContext) -> Value {
        if ctx.event.tag != EventTag::MediaGroup {
            return Value::Null;
        }
        let messages = match &ctx.event.media_group {
            Some(messages) => messages,
            None => return Value::Null,
        };

        let caption = messages
            .iter()
            .find_map(|m| m.caption.clone().filter(|c| !c.is_empty()))
            .map(Value::String)
            .unwrap_or(Value::Null);

        Value::Map(
            [
                (
                    "messages".to_string(),
                    Value::List(messages.iter().cloned().map(Value::Message).collect()),
                ),
                (
                    "message_count".to_string(),
                    Value::Integer(messages.len() as i64),
                ),
                ("caption".to_string(), caption),
            ]
            .into_iter()
            .collect(),
        )
    }

    async fn resolve_vars(
        &self,
        parts: &[PathPart],
        ctx: &ExecutionContext,
    ) -> Result<Value, ResolveError> {
        let full_path = canonical_path(parts);
        let (scope_str, name) = match parts {
            [PathPart::Attr(_), PathPart::Attr(scope), PathPart::Attr(name)] => (scope, name),
            _ => return Err(ResolveError::UnknownPath(full_path)),
        };

        let (scope, user_id) = if scope_str == "group" {
            (VarScope::Group, None)
        } else if scope_str == "user" {
            match ctx.resolve_target(None) {
                Some(user_id) => (VarScope::User, Some(user_id)),
                // No effective user (e.g. scheduled events): reads are null.
                None => return Ok(Value::Null),
            }
        } else if let Some(captures) = self.user_scope_pattern.captures(scope_str) {
            match captures[1].parse::<i64>() {
                Ok(user_id) => (VarScope::User, Some(user_id)),
                Err(_) => return Err(ResolveError::UnknownPath(full_path)),
            }
        } else {
            return Err(ResolveError::UnknownPath(full_path));
        };

        if let Some(cached) = ctx.memo_get(&full_path) {
            return Ok(cached);
        }
        let value = ctx
            .shared
            .variables
            .read_var(ctx.event.group_id, scope, name, user_id)
            .await?
            .unwrap_or(Value::Null);
        ctx.memo_insert(&full_path, value.clone());
        Ok(value)
    }
}

#[async_trait]
impl VariableResolver for ContextResolver {
    #[tracing::instrument(level = "trace", skip(self, ctx))]
    async fn resolve(
        &self,
        parts: &[PathPart],
        ctx: &ExecutionContext,
    ) -> Result<Value, ResolveError> {
        let full_path = canonical_path(parts);
        let root = match parts.first() {
            Some(PathPart::Attr(root)) => root.as_str(),
            _ => return Err(ResolveError::UnknownPath(full_path)),
        };
        let rest = &parts[1..];

        match root {
            "user" => self.resolve_user(parts, rest, ctx).await,
            "message" => {
                let base = ctx
                    .event
                    .message
                    .clone()
                    .map(Value::Message)
                    .unwrap_or(Value::Null);
                navigate(base, rest, &full_path)
            }
            "command" => navigate(self.command_data(ctx), rest, &full_path),
            "media_group" => navigate(self.media_group_data(ctx), rest, &full_path),
            "vars" => self.resolve_vars(parts, ctx).await,
            "time" => match rest {
                [PathPart::Attr(field)] if field == "unix" => {
                    Ok(Value::Integer(Utc::now().timestamp()))
                }
                _ => Err(ResolveError::UnknownPath(full_path)),
            },
            "group" => match rest.first() {
                Some(PathPart::Attr(name)) if name == "stats" => {
                    self.resolve_stats(parts, &rest[1..], ctx, None).await
                }
                _ => Err(ResolveError::UnknownPath(full_path)),
            },
            _ => Err(ResolveError::UnknownPath(full_path)),
        }
    }
}

/// Split a command line into tokens, respecting double-quoted groups, and
/// return the raw text from the first argument's offset onward.
fn split_command_text(text: &str) -> (Vec<String>, String) {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut in_token = false;
    let mut first_arg_offset: Option<usize> = None;

    for (i, c) in text.char_indices() {
        match c {
            '"' => {
                if !in_token && tokens.len() == 1 && first_arg_offset.is_none() {
                    first_arg_offset = Some(i);
                }
                in_quotes = !in_quotes;
                in_token = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            c => {
                if !in_token && tokens.len() == 1 && first_arg_offset.is_none() {
                    first_arg_offset = Some(i);
                }
                in_token = true;
                current.push(c);
            }
        }
    }
    if in_token {
        tokens.push(current);
    }

    let full_args = first_arg_offset
        .map(|offset| text[offset..].to_string())
        .unwrap_or_default();
    (tokens, full_args)
}

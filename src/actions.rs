//! # Action Registry
//!
//! Side-effecting operations callable from statement position. Each
//! handler is a thin adapter over the [`PlatformClient`] or the variable
//! store. The registry is a static table keyed by lowercase name,
//! populated at construction.
//!
//! Failure semantics: a [`PlatformError`] or [`StoreError`] is caught by
//! the statement walker, logged with the rule id and statement line, and
//! the rule continues. An [`ActionError::Invalid`] (bad arguments)
//! terminates the rule like any other runtime error.

use std::collections::HashMap;

use chrono::Utc;
use futures::future::BoxFuture;
use thiserror::Error;

use crate::eval::builtins::{parse_var_path, ScopeSpec};
use crate::eval::context::ExecutionContext;
use crate::eval::value::Value;
use crate::eval::RuntimeError;
use crate::platform::{PlatformClient as _, PlatformError};
use crate::store::{StoreError, VarScope, VariableStore as _};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ActionError {
    #[error(transparent)]
    Invalid(#[from] RuntimeError),
    #[error(transparent)]
    Platform(#[from] PlatformError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ActionError {
    /// Whether this failure terminates the rule (invalid call) or is
    /// absorbed after logging (flaky adapter).
    pub fn is_fatal(&self) -> bool {
        matches!(self, ActionError::Invalid(_))
    }
}

/// What the statement walker should do after an action ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionFlow {
    Continue,
    /// `stop()` — halt this rule and every later rule for the event.
    Stop,
}

type ActionResult = Result<ActionFlow, ActionError>;
type ActionHandler =
    for<'a> fn(Vec<Value>, &'a ExecutionContext) -> BoxFuture<'a, ActionResult>;

pub struct ActionRegistry {
    handlers: HashMap<&'static str, ActionHandler>,
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ActionRegistry {
    pub fn new() -> Self {
        let mut handlers: HashMap<&'static str, ActionHandler> = HashMap::new();
        handlers.insert("reply", |args, ctx| Box::pin(action_reply(args, ctx)));
        handlers.insert("send_message", |args, ctx| {
            Box::pin(action_send_message(args, ctx))
        });
        handlers.insert("delete_message", |args, ctx| {
            Box::pin(action_delete_message(args, ctx))
        });
        handlers.insert("ban_user", |args, ctx| Box::pin(action_ban_user(args, ctx)));
        handlers.insert("kick_user", |args, ctx| {
            Box::pin(action_kick_user(args, ctx))
        });
        handlers.insert("mute_user", |args, ctx| {
            Box::pin(action_mute_user(args, ctx))
        });
        handlers.insert("unmute_user", |args, ctx| {
            Box::pin(action_unmute_user(args, ctx))
        });
        handlers.insert("set_var", |args, ctx| Box::pin(action_set_var(args, ctx)));
        handlers.insert("log", |args, ctx| Box::pin(action_log(args, ctx)));
        handlers.insert("start_verification", |args, ctx| {
            Box::pin(action_start_verification(args, ctx))
        });
        handlers.insert("stop", |args, ctx| Box::pin(action_stop(args, ctx)));
        Self { handlers }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name.to_lowercase().as_str())
    }

    pub async fn run(
        &self,
        name: &str,
        args: Vec<Value>,
        ctx: &ExecutionContext,
    ) -> ActionResult {
        match self.handlers.get(name.to_lowercase().as_str()) {
            Some(handler) => handler(args, ctx).await,
            None => Err(ActionError::Invalid(RuntimeError::UnknownAction(
                name.to_string(),
            ))),
        }
    }
}

fn expect_args(name: &str, args: &[Value], min: usize, max: usize) -> Result<(), ActionError> {
    if args.len() < min || args.len() > max {
        return Err(ActionError::Invalid(RuntimeError::BadArgument {
            message: format!(
                "{} expects {} to {} arguments, got {}",
                name,
                min,
                max,
                args.len()
            ),
        }));
    }
    Ok(())
}

fn target_from_arg(args: &[Value], index: usize, ctx: &ExecutionContext) -> Option<i64> {
    ctx.resolve_target(args.get(index).and_then(Value::as_integer))
}

/// `"30m"`, `"2h"`, `"1d"`, `"45s"` → duration. Anything else is `None`,
/// which administrative actions treat as "indefinitely".
fn parse_duration(text: &str) -> Option<chrono::Duration> {
    let text = text.trim();
    let digits_end = text.find(|c: char| !c.is_ascii_digit())?;
    let amount: i64 = text[..digits_end].parse().ok()?;
    match text[digits_end..].trim() {
        "s" => Some(chrono::Duration::seconds(amount)),
        "m" => Some(chrono::Duration::minutes(amount)),
        "h" => Some(chrono::Duration::hours(amount)),
        "d" => Some(chrono::Duration::days(amount)),
        _ => None,
    }
}

async fn action_reply(args: Vec<Value>, ctx: &ExecutionContext) -> ActionResult {
    expect_args("reply", &args, 1, 1)?;
    let text = args[0].to_string();
    if let Some(message) = &ctx.event.message {
        ctx.shared
            .platform
            .reply(message.chat_id, message.id, &text)
            .await?;
    } else {
        tracing::debug!(rule_id = ctx.rule_id, "reply without a message, skipped");
    }
    Ok(ActionFlow::Continue)
}

async fn action_send_message(args: Vec<Value>, ctx: &ExecutionContext) -> ActionResult {
    expect_args("send_message", &args, 1, 1)?;
    let text = args[0].to_string();
    ctx.shared
        .platform
        .send_message(ctx.event.group_id, &text)
        .await?;
    Ok(ActionFlow::Continue)
}

async fn action_delete_message(args: Vec<Value>, ctx: &ExecutionContext) -> ActionResult {
    expect_args("delete_message", &args, 0, 0)?;
    if let Some(message) = &ctx.event.message {
        ctx.shared
            .platform
            .delete(message.chat_id, message.id)
            .await?;
    }
    Ok(ActionFlow::Continue)
}

async fn action_ban_user(args: Vec<Value>, ctx: &ExecutionContext) -> ActionResult {
    expect_args("ban_user", &args, 0, 2)?;
    let Some(user_id) = target_from_arg(&args, 0, ctx) else {
        tracing::warn!(rule_id = ctx.rule_id, "ban_user with no resolvable target");
        return Ok(ActionFlow::Continue);
    };
    let reason = args.get(1).map(Value::to_string);
    ctx.shared
        .platform
        .ban(ctx.event.group_id, user_id, reason.as_deref())
        .await?;
    Ok(ActionFlow::Continue)
}

async fn action_kick_user(args: Vec<Value>, ctx: &ExecutionContext) -> ActionResult {
    expect_args("kick_user", &args, 0, 1)?;
    let Some(user_id) = target_from_arg(&args, 0, ctx) else {
        tracing::warn!(rule_id = ctx.rule_id, "kick_user with no resolvable target");
        return Ok(ActionFlow::Continue);
    };
    ctx.shared.platform.kick(ctx.event.group_id, user_id).await?;
    Ok(ActionFlow::Continue)
}

async fn action_mute_user(args: Vec<Value>, ctx: &ExecutionContext) -> ActionResult {
    expect_args("mute_user", &args, 0, 2)?;
    let until = args
        .first()
        .and_then(|d| parse_duration(&d.to_string()))
        .map(|d| Utc::now() + d);
    let Some(user_id) = target_from_arg(&args, 1, ctx) else {
        tracing::warn!(rule_id = ctx.rule_id, "mute_user with no resolvable target");
        return Ok(ActionFlow::Continue);
    };
    ctx.shared
        .platform
        .restrict(ctx.event.group_id, user_id, until)
        .await?;
    Ok(ActionFlow::Continue)
}

async fn action_unmute_user(args: Vec<Value>, ctx: &ExecutionContext) -> ActionResult {
    expect_args("unmute_user", &args, 0, 1)?;
    let Some(user_id) = target_from_arg(&args, 0, ctx) else {
        tracing::warn!(rule_id = ctx.rule_id, "unmute_user with no resolvable target");
        return Ok(ActionFlow::Continue);
    };
    ctx.shared
        .platform
        .unrestrict(ctx.event.group_id, user_id)
        .await?;
    Ok(ActionFlow::Continue)
}

/// `set_var(path, value, user_id?)` — the only write path into `vars.*`.
/// Writing null deletes the variable.
async fn action_set_var(args: Vec<Value>, ctx: &ExecutionContext) -> ActionResult {
    expect_args("set_var", &args, 2, 3)?;
    let path = match &args[0] {
        Value::String(path) => path.clone(),
        other => {
            return Err(ActionError::Invalid(RuntimeError::BadArgument {
                message: format!("set_var path must be a string, got {}", other.type_name()),
            }))
        }
    };
    let value = args[1].clone();
    let explicit_user = args.get(2).and_then(Value::as_integer);

    let (scope, name) = parse_var_path(&path).map_err(ActionError::Invalid)?;
    let (store_scope, user_id) = match scope {
        ScopeSpec::Group => (VarScope::Group, None),
        ScopeSpec::SpecificUser(user_id) => (VarScope::User, Some(user_id)),
        ScopeSpec::User => match ctx.resolve_target(explicit_user) {
            Some(user_id) => (VarScope::User, Some(user_id)),
            // No effective user (scheduled events): the write is a no-op.
            None => return Ok(ActionFlow::Continue),
        },
    };

    let group_id = ctx.event.group_id;
    if value.is_null() {
        ctx.shared
            .variables
            .delete_var(group_id, store_scope, name, user_id)
            .await?;
    } else {
        ctx.shared
            .variables
            .write_var(group_id, store_scope, name, value, user_id)
            .await?;
    }
    // Later reads in this dispatch must observe the write.
    ctx.memo_invalidate_vars();
    Ok(ActionFlow::Continue)
}

async fn action_log(args: Vec<Value>, ctx: &ExecutionContext) -> ActionResult {
    expect_args("log", &args, 1, 2)?;
    let text = args[0].to_string();
    let tag = args.get(1).map(Value::to_string);
    ctx.shared
        .variables
        .record_log(ctx.event.group_id, &text, tag.as_deref())
        .await?;
    Ok(ActionFlow::Continue)
}

async fn action_start_verification(args: Vec<Value>, ctx: &ExecutionContext) -> ActionResult {
    expect_args("start_verification", &args, 0, 0)?;
    if let Some(user) = &ctx.event.user {
        ctx.shared
            .platform
            .start_verification(ctx.event.group_id, user.id)
            .await?;
    }
    Ok(ActionFlow::Continue)
}

async fn action_stop(args: Vec<Value>, _ctx: &ExecutionContext) -> ActionResult {
    expect_args("stop", &args, 0, 0)?;
    Ok(ActionFlow::Stop)
}

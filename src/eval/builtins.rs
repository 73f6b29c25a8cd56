//! Built-in function registry.
//!
//! Builtins are callable from any expression position. Arity is validated
//! here; trailing optional parameters may simply be absent. `get_var` is
//! the one builtin that suspends: it reads the persistent store using the
//! same target-user rules as the administrative actions.

use crate::eval::context::ExecutionContext;
use crate::eval::value::Value;
use crate::eval::{EvalResult, RuntimeError};
use crate::store::{VarScope, VariableStore as _};

const BUILTIN_NAMES: &[&str] = &[
    "len", "str", "int", "lower", "upper", "split", "join", "get_var",
];

pub fn is_builtin(name: &str) -> bool {
    BUILTIN_NAMES.contains(&name)
}

pub async fn call(name: &str, args: Vec<Value>, ctx: &ExecutionContext) -> EvalResult<Value> {
    match name {
        "len" => {
            expect_args(name, &args, 1, 1)?;
            builtin_len(&args[0])
        }
        "str" => {
            expect_args(name, &args, 1, 1)?;
            Ok(Value::String(args[0].to_string()))
        }
        "int" => {
            expect_args(name, &args, 1, 1)?;
            Ok(builtin_int(&args[0]))
        }
        "lower" => {
            expect_args(name, &args, 1, 1)?;
            builtin_case(&args[0], str::to_lowercase)
        }
        "upper" => {
            expect_args(name, &args, 1, 1)?;
            builtin_case(&args[0], str::to_uppercase)
        }
        "split" => {
            expect_args(name, &args, 2, 3)?;
            builtin_split(&args)
        }
        "join" => {
            expect_args(name, &args, 2, 2)?;
            builtin_join(&args[0], &args[1])
        }
        "get_var" => {
            expect_args(name, &args, 1, 3)?;
            builtin_get_var(&args, ctx).await
        }
        _ => Err(RuntimeError::UnknownFunction(name.to_string())),
    }
}

fn expect_args(name: &str, args: &[Value], min: usize, max: usize) -> EvalResult<()> {
    if args.len() < min || args.len() > max {
        return Err(RuntimeError::BadArgument {
            message: if min == max {
                format!("{} expects {} argument(s), got {}", name, min, args.len())
            } else {
                format!(
                    "{} expects {} to {} arguments, got {}",
                    name,
                    min,
                    max,
                    args.len()
                )
            },
        });
    }
    Ok(())
}

fn builtin_len(value: &Value) -> EvalResult<Value> {
    match value {
        Value::String(s) => Ok(Value::Integer(s.chars().count() as i64)),
        Value::List(items) => Ok(Value::Integer(items.len() as i64)),
        Value::Map(map) => Ok(Value::Integer(map.len() as i64)),
        other => Err(RuntimeError::TypeMismatch {
            message: format!("len expects string, list or map, got {}", other.type_name()),
        }),
    }
}

/// Base-10 coercion; floats truncate toward zero; failure yields 0.
fn builtin_int(value: &Value) -> Value {
    let result = match value {
        Value::Integer(i) => *i,
        Value::Float(v) => v.trunc() as i64,
        Value::String(s) => s.trim().parse::<i64>().unwrap_or(0),
        Value::Boolean(true) => 1,
        _ => 0,
    };
    Value::Integer(result)
}

fn builtin_case(value: &Value, apply: fn(&str) -> String) -> EvalResult<Value> {
    match value {
        Value::String(s) => Ok(Value::String(apply(s))),
        other => Err(RuntimeError::TypeMismatch {
            message: format!("expected a string, got {}", other.type_name()),
        }),
    }
}

fn builtin_split(args: &[Value]) -> EvalResult<Value> {
    let (s, sep) = match (&args[0], &args[1]) {
        (Value::String(s), Value::String(sep)) => (s, sep),
        (l, r) => {
            return Err(RuntimeError::TypeMismatch {
                message: format!("split expects strings, got {} and {}", l.type_name(), r.type_name()),
            })
        }
    };
    if sep.is_empty() {
        return Err(RuntimeError::BadArgument {
            message: "split separator must not be empty".to_string(),
        });
    }

    let pieces: Vec<Value> = match args.get(2) {
        Some(limit) => {
            let maxsplit = limit.as_integer().ok_or_else(|| RuntimeError::BadArgument {
                message: "split maxsplit must be an integer".to_string(),
            })?;
            if maxsplit < 0 {
                s.split(sep.as_str())
                    .map(|p| Value::String(p.to_string()))
                    .collect()
            } else {
                s.splitn(maxsplit as usize + 1, sep.as_str())
                    .map(|p| Value::String(p.to_string()))
                    .collect()
            }
        }
        None => s
            .split(sep.as_str())
            .map(|p| Value::String(p.to_string()))
            .collect(),
    };
    Ok(Value::List(pieces))
}

fn builtin_join(list: &Value, sep: &Value) -> EvalResult<Value> {
    match (list, sep) {
        (Value::List(items), Value::String(sep)) => {
            let rendered: Vec<String> = items.iter().map(Value::to_string).collect();
            Ok(Value::String(rendered.join(sep)))
        }
        (l, r) => Err(RuntimeError::TypeMismatch {
            message: format!(
                "join expects a list and a string, got {} and {}",
                l.type_name(),
                r.type_name()
            ),
        }),
    }
}

/// `get_var(path, default?, user_id?)` — reads a persistent variable;
/// missing values (and an absent target user) yield the default.
async fn builtin_get_var(args: &[Value], ctx: &ExecutionContext) -> EvalResult<Value> {
    let path = match &args[0] {
        Value::String(path) => path,
        other => {
            return Err(RuntimeError::BadArgument {
                message: format!("get_var path must be a string, got {}", other.type_name()),
            })
        }
    };
    let default = args.get(1).cloned().unwrap_or(Value::Null);
    let explicit_user = args.get(2).and_then(Value::as_integer);

    let (scope, name) = parse_var_path(path)?;
    let user_id = match scope {
        ScopeSpec::Group => None,
        ScopeSpec::User => match ctx.resolve_target(explicit_user) {
            Some(user_id) => Some(user_id),
            None => return Ok(default),
        },
        ScopeSpec::SpecificUser(user_id) => Some(user_id),
    };
    let store_scope = match scope {
        ScopeSpec::Group => VarScope::Group,
        _ => VarScope::User,
    };

    match ctx
        .shared
        .variables
        .read_var(ctx.event.group_id, store_scope, name, user_id)
        .await
    {
        Ok(Some(value)) => Ok(value),
        Ok(None) => Ok(default),
        Err(e) => {
            tracing::warn!(path, error = %e, "get_var store read failed");
            Ok(default)
        }
    }
}

pub(crate) enum ScopeSpec {
    Group,
    User,
    SpecificUser(i64),
}

/// Parse `scope.name` where scope is `group`, `user` or `user_<digits>`.
pub(crate) fn parse_var_path(path: &str) -> EvalResult<(ScopeSpec, &str)> {
    let (scope, name) = path.split_once('.').ok_or_else(|| RuntimeError::BadArgument {
        message: format!("variable path '{}' must be scope.name", path),
    })?;
    if name.is_empty() || name.contains('.') {
        return Err(RuntimeError::BadArgument {
            message: format!("variable path '{}' must be scope.name", path),
        });
    }

    let spec = if scope == "group" {
        ScopeSpec::Group
    } else if scope == "user" {
        ScopeSpec::User
    } else if let Some(digits) = scope.strip_prefix("user_") {
        let user_id = digits
            .parse::<i64>()
            .map_err(|_| RuntimeError::BadArgument {
                message: format!("invalid user id in scope '{}'", scope),
            })?;
        ScopeSpec::SpecificUser(user_id)
    } else {
        return Err(RuntimeError::BadArgument {
            message: format!("unknown variable scope '{}'", scope),
        });
    };
    Ok((spec, name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::eval::context::SharedContext;
    use crate::event::{ChatEvent, EventTag, UserRef};
    use crate::platform::RecordingClient;
    use crate::store::{MemoryStatsStore, MemoryVariableStore, VariableStore};
    use dashmap::DashMap;
    use std::sync::Arc;

    fn setup() -> (Arc<MemoryVariableStore>, ExecutionContext) {
        let variables = Arc::new(MemoryVariableStore::default());
        let shared = Arc::new(SharedContext {
            platform: Arc::new(RecordingClient::new()),
            variables: variables.clone(),
            stats: Arc::new(MemoryStatsStore::new()),
            config: EngineConfig::default(),
        });
        let user = Arc::new(UserRef::new(7, "Ann"));
        let event = ChatEvent::with_message(
            EventTag::Message,
            1,
            crate::event::text_message(1, 10, user, "hi"),
        );
        let ctx = ExecutionContext::new(shared, Arc::new(event), Arc::new(DashMap::new()), 1);
        (variables, ctx)
    }

    #[tokio::test]
    async fn test_len() {
        let (_, ctx) = setup();
        assert_eq!(
            call("len", vec![Value::String("héllo".into())], &ctx)
                .await
                .unwrap(),
            Value::Integer(5)
        );
        assert_eq!(
            call("len", vec![Value::List(vec![Value::Null])], &ctx)
                .await
                .unwrap(),
            Value::Integer(1)
        );
        assert!(call("len", vec![Value::Integer(1)], &ctx).await.is_err());
        assert!(call("len", vec![], &ctx).await.is_err());
    }

    #[tokio::test]
    async fn test_str_and_int() {
        let (_, ctx) = setup();
        assert_eq!(
            call("str", vec![Value::Integer(5)], &ctx).await.unwrap(),
            Value::String("5".into())
        );
        assert_eq!(
            call("str", vec![Value::Float(2.0)], &ctx).await.unwrap(),
            Value::String("2".into())
        );

        assert_eq!(
            call("int", vec![Value::String("42".into())], &ctx)
                .await
                .unwrap(),
            Value::Integer(42)
        );
        assert_eq!(
            call("int", vec![Value::String(" 77 ".into())], &ctx)
                .await
                .unwrap(),
            Value::Integer(77)
        );
        assert_eq!(
            call("int", vec![Value::Float(-3.9)], &ctx).await.unwrap(),
            Value::Integer(-3)
        );
        // Failures coerce to 0.
        assert_eq!(
            call("int", vec![Value::String("abc".into())], &ctx)
                .await
                .unwrap(),
            Value::Integer(0)
        );
        assert_eq!(
            call("int", vec![Value::Null], &ctx).await.unwrap(),
            Value::Integer(0)
        );
    }

    #[tokio::test]
    async fn test_lower_upper() {
        let (_, ctx) = setup();
        assert_eq!(
            call("lower", vec![Value::String("AbC".into())], &ctx)
                .await
                .unwrap(),
            Value::String("abc".into())
        );
        assert_eq!(
            call("upper", vec![Value::String("AbC".into())], &ctx)
                .await
                .unwrap(),
            Value::String("ABC".into())
        );
    }

    #[tokio::test]
    async fn test_split_and_join() {
        let (_, ctx) = setup();
        let parts = call(
            "split",
            vec![Value::String("a,b,c".into()), Value::String(",".into())],
            &ctx,
        )
        .await
        .unwrap();
        assert_eq!(
            parts,
            Value::List(vec![
                Value::String("a".into()),
                Value::String("b".into()),
                Value::String("c".into())
            ])
        );

        let parts = call(
            "split",
            vec![
                Value::String("a,b,c".into()),
                Value::String(",".into()),
                Value::Integer(1),
            ],
            &ctx,
        )
        .await
        .unwrap();
        assert_eq!(
            parts,
            Value::List(vec![
                Value::String("a".into()),
                Value::String("b,c".into())
            ])
        );

        let joined = call(
            "join",
            vec![
                Value::List(vec![Value::Integer(1), Value::String("b".into())]),
                Value::String("-".into()),
            ],
            &ctx,
        )
        .await
        .unwrap();
        assert_eq!(joined, Value::String("1-b".into()));
    }

    #[tokio::test]
    async fn test_get_var_with_default_and_target() {
        let (variables, ctx) = setup();
        variables
            .write_var(1, VarScope::User, "warnings", Value::Integer(2), Some(77))
            .await
            .unwrap();

        // Explicit target user.
        let value = call(
            "get_var",
            vec![
                Value::String("user.warnings".into()),
                Value::Integer(0),
                Value::Integer(77),
            ],
            &ctx,
        )
        .await
        .unwrap();
        assert_eq!(value, Value::Integer(2));

        // Default applies when missing (context user 7 has no value).
        let value = call(
            "get_var",
            vec![Value::String("user.warnings".into()), Value::Integer(0)],
            &ctx,
        )
        .await
        .unwrap();
        assert_eq!(value, Value::Integer(0));

        // Group scope.
        variables
            .write_var(1, VarScope::Group, "welcome", Value::String("hi".into()), None)
            .await
            .unwrap();
        let value = call(
            "get_var",
            vec![Value::String("group.welcome".into())],
            &ctx,
        )
        .await
        .unwrap();
        assert_eq!(value, Value::String("hi".into()));
    }

    #[tokio::test]
    async fn test_get_var_bad_path() {
        let (_, ctx) = setup();
        let err = call("get_var", vec![Value::String("nodot".into())], &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::BadArgument { .. }));
    }
}

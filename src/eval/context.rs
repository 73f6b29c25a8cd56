//! Per-execution context: scope frames, the per-event memo cache, and the
//! handles every component reaches the outside world through.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use dashmap::DashMap;

use crate::config::EngineConfig;
use crate::eval::value::Value;
use crate::eval::RuntimeError;
use crate::event::ChatEvent;
use crate::platform::PlatformClient;
use crate::resolver::PathPart;
use crate::store::{StatsStore, VariableStore};

/// Handles shared across every execution the dispatcher starts. Cheap to
/// clone behind an `Arc`.
pub struct SharedContext {
    pub platform: Arc<dyn PlatformClient>,
    pub variables: Arc<dyn VariableStore>,
    pub stats: Arc<dyn StatsStore>,
    pub config: EngineConfig,
}

/// The context of one rule execution for one event.
///
/// The memo cache is shared by every rule executed for the same event and
/// lives exactly one dispatch; the scope frames are private to this rule.
pub struct ExecutionContext {
    pub shared: Arc<SharedContext>,
    pub event: Arc<ChatEvent>,
    pub rule_id: i64,
    memo: Arc<DashMap<String, Value>>,
    scopes: Mutex<Vec<HashMap<String, Value>>>,
}

impl ExecutionContext {
    pub fn new(
        shared: Arc<SharedContext>,
        event: Arc<ChatEvent>,
        memo: Arc<DashMap<String, Value>>,
        rule_id: i64,
    ) -> Self {
        Self {
            shared,
            event,
            rule_id,
            memo,
            scopes: Mutex::new(vec![HashMap::new()]),
        }
    }

    // ---- local scope ------------------------------------------------------

    /// Closest frame wins.
    pub fn get_variable(&self, name: &str) -> Option<Value> {
        let scopes = self.scopes.lock().unwrap();
        scopes.iter().rev().find_map(|frame| frame.get(name).cloned())
    }

    /// Assignment: an existing name is updated in the frame that holds it,
    /// a new name lands in the top frame.
    pub fn set_variable(&self, name: &str, value: Value) {
        let mut scopes = self.scopes.lock().unwrap();
        for frame in scopes.iter_mut().rev() {
            if frame.contains_key(name) {
                frame.insert(name.to_string(), value);
                return;
            }
        }
        scopes
            .last_mut()
            .expect("scope stack is never empty")
            .insert(name.to_string(), value);
    }

    /// Introduce a name in the top frame, shadowing any outer binding.
    /// Loop variables use this.
    pub fn declare_variable(&self, name: &str, value: Value) {
        let mut scopes = self.scopes.lock().unwrap();
        scopes
            .last_mut()
            .expect("scope stack is never empty")
            .insert(name.to_string(), value);
    }

    pub fn push_frame(&self) {
        self.scopes.lock().unwrap().push(HashMap::new());
    }

    pub fn pop_frame(&self) {
        let mut scopes = self.scopes.lock().unwrap();
        if scopes.len() > 1 {
            scopes.pop();
        }
    }

    /// Write through a path into a local container
    /// (`xs[0] = 1;`, `m.key = "v";`). The root must already be a local;
    /// context roots are not assignable.
    pub fn assign_path(
        &self,
        root: &str,
        parts: &[PathPart],
        value: Value,
    ) -> Result<(), RuntimeError> {
        let mut scopes = self.scopes.lock().unwrap();
        let frame = scopes
            .iter_mut()
            .rev()
            .find(|frame| frame.contains_key(root))
            .ok_or_else(|| RuntimeError::InvalidAssignment(root.to_string()))?;

        let mut slot = frame.get_mut(root).expect("checked above");
        for part in parts {
            slot = match (slot, part) {
                (Value::Map(map), PathPart::Attr(key)) => map
                    .entry(key.clone())
                    .or_insert(Value::Null),
                (Value::Map(map), PathPart::Index(Value::String(key))) => map
                    .entry(key.clone())
                    .or_insert(Value::Null),
                (Value::List(items), PathPart::Index(index)) => {
                    let i = index
                        .as_integer()
                        .filter(|i| *i >= 0 && (*i as usize) < items.len())
                        .ok_or_else(|| RuntimeError::BadArgument {
                            message: format!("index {} out of range", index),
                        })?;
                    &mut items[i as usize]
                }
                (other, _) => {
                    return Err(RuntimeError::TypeMismatch {
                        message: format!("cannot assign into {}", other.type_name()),
                    })
                }
            };
        }
        *slot = value;
        Ok(())
    }

    // ---- per-event memo ---------------------------------------------------

    pub fn memo_get(&self, key: &str) -> Option<Value> {
        self.memo.get(key).map(|v| v.clone())
    }

    pub fn memo_insert(&self, key: &str, value: Value) {
        self.memo.insert(key.to_string(), value);
    }

    /// Drop memoized persistent-variable reads after a `set_var` write so
    /// later reads in the same dispatch observe the new value.
    pub fn memo_invalidate_vars(&self) {
        self.memo.retain(|key, _| !key.starts_with("vars."));
    }

    // ---- target-user disambiguation ---------------------------------------

    /// The shared three-step rule for administrative actions: an explicit
    /// `user_id` argument wins, then the replied-to user, then the
    /// triggering user.
    pub fn resolve_target(&self, explicit: Option<i64>) -> Option<i64> {
        if explicit.is_some() {
            return explicit;
        }
        if let Some(message) = &self.event.message {
            if let Some(reply) = &message.reply_to_message {
                if let Some(from) = &reply.from_user {
                    return Some(from.id);
                }
            }
        }
        self.event.user.as_ref().map(|u| u.id)
    }
}

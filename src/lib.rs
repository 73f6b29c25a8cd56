//! # CHATWARDEN: Rule-DSL Engine for Chat Group Management
//!
//! Chatwarden lets group administrators express moderation policy in a
//! small rule language and executes those rules in response to chat
//! events.
//!
//! ```text
//! WHEN message
//! WHERE message.text contains "spam" and user.is_admin == false
//! THEN {
//!     delete_message();
//!     mute_user("10m");
//! }
//! END
//! ```
//!
//! ## DSL Processing Pipeline
//!
//! ```text
//! Source Code → Tokenizer → Preprocessor → Parser → Executor
//! ```
//!
//! ### Stage 1: Tokenization (Lexical Analysis)
//!
//! The [`tokenizer`] module transforms raw source into a token stream
//! with exact (line, column) positions.
//!
//! ### Stage 2: Preprocessing
//!
//! The [`preprocessor`] strips whitespace, newline and comment tokens.
//!
//! ### Stage 3: Parsing (Syntactic Analysis)
//!
//! The [`parser`] builds the rule AST ([`ast`]) by recursive descent,
//! with precedence climbing for expressions. [`parser::precompile`]
//! exposes syntax validation without execution.
//!
//! ### Stage 4: Execution
//!
//! The [`executor`] evaluates the guard and walks the body through the
//! [`eval`] system; context variables resolve through the [`resolver`],
//! side effects go through the [`actions`] registry to the
//! [`platform`] client, and persistent state lives behind the [`store`]
//! boundaries.
//!
//! ## Event Flow
//!
//! Canonical events ([`event`]) enter over a broadcast bus. The
//! [`dispatcher`] aggregates media groups behind a short delay
//! ([`aggregator`]), loads and caches each group's parsed rules, and runs
//! matching rules in priority order until one calls `stop()`. Rules with
//! a `schedule("<cron>")` trigger fire from the [`scheduler`] instead.

pub mod actions;
pub mod aggregator;
pub mod ast;
pub mod config;
pub mod defaults;
pub mod dispatcher;
pub mod error;
pub mod eval;
pub mod event;
pub mod executor;
pub mod parser;
pub mod platform;
pub mod preprocessor;
pub mod resolver;
pub mod scheduler;
pub mod store;
pub mod tokenizer;

// Re-exports
pub use config::EngineConfig;
pub use dispatcher::Dispatcher;
pub use error::{EngineError, EngineResult};
pub use eval::value::Value;
pub use event::{ChatEvent, EventBus, EventTag, Message, UserRef};
pub use executor::{ExecutionOutcome, RuleExecutor};
pub use parser::{compile, precompile};
pub use scheduler::Scheduler;

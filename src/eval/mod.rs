//! # Evaluation System
//!
//! Executes rule ASTs at runtime.
//!
//! ## Core Components
//!
//! * [`value`]: the dynamic value domain and its coercions
//! * [`expression`]: async recursive expression evaluation; variable
//!   lookup is delegated to an injected [`crate::resolver::VariableResolver`]
//! * [`builtins`]: the pure(ish) function registry callable from
//!   expressions
//! * [`statement`]: the statement walker with control flow, scope frames
//!   and action dispatch
//! * [`context`]: the per-execution [`context::ExecutionContext`]
//!
//! ## Evaluation Pipeline
//!
//! 1. The executor evaluates the rule guard through the expression
//!    evaluator.
//! 2. The statement walker runs the body in source order; side effects go
//!    through the action registry.
//! 3. Runtime errors terminate the current rule and are reported to the
//!    dispatcher, which moves on to the next rule.

pub mod builtins;
pub mod context;
pub mod expression;
pub mod statement;
pub mod value;

use thiserror::Error;

use crate::resolver::ResolveError;

/// Typed evaluation failures. These terminate the current rule; the
/// dispatcher logs them and continues with the next rule.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuntimeError {
    #[error("RuntimeError: division by zero")]
    DivisionByZero,

    #[error("RuntimeError: unknown function '{0}'")]
    UnknownFunction(String),

    #[error("RuntimeError: unknown action '{0}'")]
    UnknownAction(String),

    #[error("RuntimeError: type mismatch: {message}")]
    TypeMismatch { message: String },

    #[error("RuntimeError: bad argument: {message}")]
    BadArgument { message: String },

    #[error("RuntimeError: undefined variable '{0}'")]
    UndefinedVariable(String),

    #[error("RuntimeError: cannot assign to '{0}'")]
    InvalidAssignment(String),

    #[error("RuntimeError: loop iteration cap of {cap} exceeded")]
    IterationCap { cap: usize },

    #[error(transparent)]
    Resolve(#[from] ResolveError),
}

pub type EvalResult<T> = Result<T, RuntimeError>;

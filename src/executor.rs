//! # Rule Executor
//!
//! Runs one parsed rule against one event: evaluates the guard, walks the
//! body, and classifies the outcome. No error escapes `execute`; runtime
//! failures are logged with the rule id and reported as
//! [`ExecutionOutcome::Errored`] so the dispatcher can move on to the next
//! rule.

use std::sync::Arc;

use crate::actions::ActionRegistry;
use crate::ast::Rule;
use crate::eval::context::ExecutionContext;
use crate::eval::expression::ExpressionEvaluator;
use crate::eval::statement::{ControlFlow, StatementEvaluator, StatementResult};
use crate::resolver::VariableResolver;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// Guard not met, or the body ran to the end.
    Completed,
    /// The body called `stop()`; later rules must not run for this event.
    Stopped,
    /// The guard or body raised a runtime error.
    Errored,
}

pub struct RuleExecutor {
    expressions: Arc<ExpressionEvaluator>,
    statements: StatementEvaluator,
}

impl RuleExecutor {
    pub fn new(resolver: Arc<dyn VariableResolver>, actions: Arc<ActionRegistry>) -> Self {
        let expressions = Arc::new(ExpressionEvaluator::new(resolver));
        let statements = StatementEvaluator::new(expressions.clone(), actions);
        Self {
            expressions,
            statements,
        }
    }

    #[tracing::instrument(level = "debug", skip(self, rule, ctx), fields(rule_id = ctx.rule_id))]
    pub async fn execute(&self, rule: &Rule, ctx: &ExecutionContext) -> ExecutionOutcome {
        if let Some(guard) = &rule.guard {
            match self.expressions.eval_expression(guard, ctx).await {
                Ok(value) => {
                    if !value.is_truthy() {
                        return ExecutionOutcome::Completed;
                    }
                }
                Err(e) => {
                    tracing::error!(rule_id = ctx.rule_id, error = %e, "guard evaluation failed");
                    return ExecutionOutcome::Errored;
                }
            }
        }

        match self.statements.eval_block(&rule.body, ctx).await {
            Ok(StatementResult::Control(ControlFlow::Stop)) => ExecutionOutcome::Stopped,
            Ok(_) => ExecutionOutcome::Completed,
            Err(e) => {
                tracing::error!(rule_id = ctx.rule_id, error = %e, "rule body failed");
                ExecutionOutcome::Errored
            }
        }
    }
}

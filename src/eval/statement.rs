//! Statement evaluation: control flow, scope frames, and action dispatch.
//!
//! Statements run in source order; side effects therefore observe a total
//! order within one rule. `foreach` pushes a scope frame and is guarded by
//! the configured iteration cap.

use std::sync::Arc;

use async_recursion::async_recursion;

use crate::actions::{ActionFlow, ActionRegistry};
use crate::ast::{Block, Expression, Statement};
use crate::eval::builtins;
use crate::eval::context::ExecutionContext;
use crate::eval::expression::ExpressionEvaluator;
use crate::eval::value::Value;
use crate::eval::{EvalResult, RuntimeError};

#[derive(Debug, Clone, PartialEq)]
pub enum StatementResult {
    Value(Value),
    Control(ControlFlow),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlFlow {
    /// `break;` — exits the innermost loop.
    Break,
    /// `continue;` — restarts the innermost loop.
    Continue,
    /// `stop()` — aborts the rule and halts later rules for this event.
    Stop,
}

pub struct StatementEvaluator {
    pub expression_evaluator: Arc<ExpressionEvaluator>,
    actions: Arc<ActionRegistry>,
}

impl StatementEvaluator {
    pub fn new(expression_evaluator: Arc<ExpressionEvaluator>, actions: Arc<ActionRegistry>) -> Self {
        Self {
            expression_evaluator,
            actions,
        }
    }

    pub async fn eval_block(
        &self,
        block: &Block,
        ctx: &ExecutionContext,
    ) -> EvalResult<StatementResult> {
        let mut last = Value::Null;
        for statement in &block.statements {
            match self.eval_statement(statement, ctx).await? {
                StatementResult::Value(value) => last = value,
                control => return Ok(control),
            }
        }
        Ok(StatementResult::Value(last))
    }

    #[async_recursion]
    pub async fn eval_statement(
        &self,
        statement: &Statement,
        ctx: &ExecutionContext,
    ) -> EvalResult<StatementResult> {
        match statement {
            Statement::Expression { expr, line } => self.eval_expression_statement(expr, *line, ctx).await,
            Statement::Assign { target, value, .. } => {
                let value = self
                    .expression_evaluator
                    .eval_expression(value, ctx)
                    .await?;
                self.expression_evaluator.assign(target, value, ctx).await?;
                Ok(StatementResult::Value(Value::Null))
            }
            Statement::If {
                condition,
                then_block,
                else_block,
            } => {
                let condition = self
                    .expression_evaluator
                    .eval_expression(condition, ctx)
                    .await?;
                if condition.is_truthy() {
                    self.eval_block(then_block, ctx).await
                } else if let Some(else_block) = else_block {
                    self.eval_block(else_block, ctx).await
                } else {
                    Ok(StatementResult::Value(Value::Null))
                }
            }
            Statement::Foreach {
                variable,
                iterable,
                body,
            } => self.eval_foreach(variable, iterable, body, ctx).await,
            Statement::Break => Ok(StatementResult::Control(ControlFlow::Break)),
            Statement::Continue => Ok(StatementResult::Control(ControlFlow::Continue)),
        }
    }

    /// Statement-position calls dispatch to the action registry; other
    /// expressions evaluate for their side-effect-free value. A name that
    /// is neither an action nor a builtin is an unknown action here.
    async fn eval_expression_statement(
        &self,
        expr: &Expression,
        line: usize,
        ctx: &ExecutionContext,
    ) -> EvalResult<StatementResult> {
        if let Expression::Call { name, args, .. } = expr {
            if self.actions.contains(name) {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.expression_evaluator.eval_expression(arg, ctx).await?);
                }
                return match self.actions.run(name, values, ctx).await {
                    Ok(ActionFlow::Stop) => Ok(StatementResult::Control(ControlFlow::Stop)),
                    Ok(ActionFlow::Continue) => Ok(StatementResult::Value(Value::Null)),
                    Err(e) if e.is_fatal() => Err(match e {
                        crate::actions::ActionError::Invalid(inner) => inner,
                        _ => unreachable!("is_fatal covers Invalid only"),
                    }),
                    Err(e) => {
                        // Adapter failures do not terminate the rule.
                        tracing::error!(
                            rule_id = ctx.rule_id,
                            line,
                            action = %name,
                            error = %e,
                            "action failed"
                        );
                        Ok(StatementResult::Value(Value::Null))
                    }
                };
            }
            if !builtins::is_builtin(name) {
                return Err(RuntimeError::UnknownAction(name.clone()));
            }
        }

        let value = self.expression_evaluator.eval_expression(expr, ctx).await?;
        Ok(StatementResult::Value(value))
    }

    async fn eval_foreach(
        &self,
        variable: &str,
        iterable: &Expression,
        body: &Block,
        ctx: &ExecutionContext,
    ) -> EvalResult<StatementResult> {
        let iterable = self
            .expression_evaluator
            .eval_expression(iterable, ctx)
            .await?;
        let items: Vec<Value> = match iterable {
            Value::List(items) => items,
            Value::String(s) => s
                .chars()
                .map(|c| Value::String(c.to_string()))
                .collect(),
            other => {
                return Err(RuntimeError::TypeMismatch {
                    message: format!("foreach expects a list or string, got {}", other.type_name()),
                })
            }
        };

        let cap = ctx.shared.config.loop_iteration_cap;
        ctx.push_frame();
        let result = self.run_loop(variable, &items, body, cap, ctx).await;
        ctx.pop_frame();

        match result? {
            StatementResult::Control(ControlFlow::Stop) => {
                Ok(StatementResult::Control(ControlFlow::Stop))
            }
            _ => Ok(StatementResult::Value(Value::Null)),
        }
    }

    async fn run_loop(
        &self,
        variable: &str,
        items: &[Value],
        body: &Block,
        cap: usize,
        ctx: &ExecutionContext,
    ) -> EvalResult<StatementResult> {
        let mut iterations = 0usize;
        for item in items {
            iterations += 1;
            if iterations > cap {
                return Err(RuntimeError::IterationCap { cap });
            }
            ctx.declare_variable(variable, item.clone());
            match self.eval_block(body, ctx).await? {
                StatementResult::Control(ControlFlow::Break) => break,
                StatementResult::Control(ControlFlow::Continue) => continue,
                StatementResult::Control(ControlFlow::Stop) => {
                    return Ok(StatementResult::Control(ControlFlow::Stop))
                }
                StatementResult::Value(_) => {}
            }
        }
        Ok(StatementResult::Value(Value::Null))
    }
}

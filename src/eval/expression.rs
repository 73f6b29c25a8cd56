//! Async recursive expression evaluation.
//!
//! The evaluator is a pure function of the AST and the resolver's
//! answers: given the same inputs it produces the same outputs. Variable
//! lookup order is local scope first, then the injected
//! [`VariableResolver`]; resolver failures on `vars.*` paths degrade to
//! null because missing persistent data is not an error.

use std::sync::Arc;

use async_recursion::async_recursion;

use crate::ast::{BinaryOperator, Expression, Literal, Path, PathSegment, UnaryOperator};
use crate::eval::builtins;
use crate::eval::context::ExecutionContext;
use crate::eval::value::Value;
use crate::eval::{EvalResult, RuntimeError};
use crate::resolver::{canonical_path, navigate, PathPart, VariableResolver};

pub struct ExpressionEvaluator {
    resolver: Arc<dyn VariableResolver>,
}

impl ExpressionEvaluator {
    pub fn new(resolver: Arc<dyn VariableResolver>) -> Self {
        Self { resolver }
    }

    #[async_recursion]
    pub async fn eval_expression(
        &self,
        expr: &Expression,
        ctx: &ExecutionContext,
    ) -> EvalResult<Value> {
        match expr {
            Expression::Literal(lit) => Ok(Self::eval_literal(lit)),
            Expression::List(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval_expression(item, ctx).await?);
                }
                Ok(Value::List(values))
            }
            Expression::Dict(pairs) => {
                let mut map = std::collections::HashMap::with_capacity(pairs.len());
                for (key, value) in pairs {
                    map.insert(key.clone(), self.eval_expression(value, ctx).await?);
                }
                Ok(Value::Map(map))
            }
            Expression::Identifier(name) => self.eval_identifier(name, ctx).await,
            Expression::Path(path) => self.eval_path(path, ctx).await,
            Expression::Unary { op, operand } => self.eval_unary(*op, operand, ctx).await,
            Expression::Binary { op, left, right } => self.eval_binary(*op, left, right, ctx).await,
            Expression::Call { name, args, .. } => self.eval_call(name, args, ctx).await,
            Expression::Assignment { target, value } => {
                let value = self.eval_expression(value, ctx).await?;
                self.assign(target, value.clone(), ctx).await?;
                Ok(value)
            }
        }
    }

    fn eval_literal(lit: &Literal) -> Value {
        match lit {
            Literal::Integer(i) => Value::Integer(*i),
            Literal::Float(v) => Value::Float(*v),
            Literal::String(s) => Value::String(s.clone()),
            Literal::Boolean(b) => Value::Boolean(*b),
            Literal::Null => Value::Null,
        }
    }

    async fn eval_identifier(&self, name: &str, ctx: &ExecutionContext) -> EvalResult<Value> {
        if let Some(value) = ctx.get_variable(name) {
            return Ok(value);
        }
        let parts = [PathPart::Attr(name.to_string())];
        match self.resolver.resolve(&parts, ctx).await {
            Ok(value) => Ok(value),
            Err(_) => Err(RuntimeError::UndefinedVariable(name.to_string())),
        }
    }

    async fn eval_path(&self, path: &Path, ctx: &ExecutionContext) -> EvalResult<Value> {
        let parts = self.resolve_parts(path, ctx).await?;

        // Locals shadow context roots.
        if let Some(local) = ctx.get_variable(&path.root) {
            return navigate(local, &parts[1..], &canonical_path(&parts))
                .map_err(RuntimeError::Resolve);
        }

        match self.resolver.resolve(&parts, ctx).await {
            Ok(value) => Ok(value),
            // Missing persistent data is not an error.
            Err(_) if path.root == "vars" => Ok(Value::Null),
            Err(e) => Err(RuntimeError::Resolve(e)),
        }
    }

    /// Pre-evaluate index expressions so resolvers and navigation only see
    /// plain values.
    async fn resolve_parts(
        &self,
        path: &Path,
        ctx: &ExecutionContext,
    ) -> EvalResult<Vec<PathPart>> {
        let mut parts = Vec::with_capacity(path.segments.len() + 1);
        parts.push(PathPart::Attr(path.root.clone()));
        for segment in &path.segments {
            match segment {
                PathSegment::Attribute(name) => parts.push(PathPart::Attr(name.clone())),
                PathSegment::Index(index) => {
                    let value = self.eval_expression(index, ctx).await?;
                    parts.push(PathPart::Index(value));
                }
            }
        }
        Ok(parts)
    }

    /// Shared with the statement walker for `a = b = expr` chains.
    pub(crate) async fn assign(
        &self,
        target: &Path,
        value: Value,
        ctx: &ExecutionContext,
    ) -> EvalResult<()> {
        if target.segments.is_empty() {
            ctx.set_variable(&target.root, value);
            return Ok(());
        }
        let parts = self.resolve_parts(target, ctx).await?;
        ctx.assign_path(&target.root, &parts[1..], value)
    }

    async fn eval_unary(
        &self,
        op: UnaryOperator,
        operand: &Expression,
        ctx: &ExecutionContext,
    ) -> EvalResult<Value> {
        let value = self.eval_expression(operand, ctx).await?;
        match op {
            UnaryOperator::Not => Ok(Value::Boolean(!value.is_truthy())),
            UnaryOperator::Negate => match value {
                Value::Integer(i) => Ok(Value::Integer(-i)),
                Value::Float(v) => Ok(Value::Float(-v)),
                other => Err(RuntimeError::TypeMismatch {
                    message: format!("cannot negate {}", other.type_name()),
                }),
            },
        }
    }

    async fn eval_binary(
        &self,
        op: BinaryOperator,
        left: &Expression,
        right: &Expression,
        ctx: &ExecutionContext,
    ) -> EvalResult<Value> {
        // Short-circuit logic first: the right side must not be evaluated
        // when the left side decides.
        match op {
            BinaryOperator::And => {
                let left = self.eval_expression(left, ctx).await?;
                if !left.is_truthy() {
                    return Ok(Value::Boolean(false));
                }
                let right = self.eval_expression(right, ctx).await?;
                return Ok(Value::Boolean(right.is_truthy()));
            }
            BinaryOperator::Or => {
                let left = self.eval_expression(left, ctx).await?;
                if left.is_truthy() {
                    return Ok(Value::Boolean(true));
                }
                let right = self.eval_expression(right, ctx).await?;
                return Ok(Value::Boolean(right.is_truthy()));
            }
            _ => {}
        }

        let left = self.eval_expression(left, ctx).await?;
        let right = self.eval_expression(right, ctx).await?;

        match op {
            BinaryOperator::Add => Self::eval_add(&left, &right),
            BinaryOperator::Subtract => {
                Self::eval_arith(&left, &right, "-", |l, r| l - r, |l, r| l - r)
            }
            BinaryOperator::Multiply => {
                Self::eval_arith(&left, &right, "*", |l, r| l * r, |l, r| l * r)
            }
            BinaryOperator::Divide => Self::eval_divide(&left, &right),
            BinaryOperator::Equal => Ok(Value::Boolean(left == right)),
            BinaryOperator::NotEqual => Ok(Value::Boolean(left != right)),
            BinaryOperator::Greater => Self::compare(&left, &right, |o| o.is_gt()),
            BinaryOperator::GreaterEqual => Self::compare(&left, &right, |o| o.is_ge()),
            BinaryOperator::Less => Self::compare(&left, &right, |o| o.is_lt()),
            BinaryOperator::LessEqual => Self::compare(&left, &right, |o| o.is_le()),
            BinaryOperator::Contains => Self::eval_contains(&left, &right),
            BinaryOperator::StartsWith => Self::eval_affix(&left, &right, true),
            BinaryOperator::EndsWith => Self::eval_affix(&left, &right, false),
            BinaryOperator::And | BinaryOperator::Or => unreachable!("handled above"),
        }
    }

    fn eval_add(left: &Value, right: &Value) -> EvalResult<Value> {
        match (left, right) {
            (Value::Integer(l), Value::Integer(r)) => Ok(Value::Integer(l + r)),
            (Value::Float(l), Value::Float(r)) => Ok(Value::Float(l + r)),
            (Value::Integer(l), Value::Float(r)) => Ok(Value::Float(*l as f64 + r)),
            (Value::Float(l), Value::Integer(r)) => Ok(Value::Float(l + *r as f64)),
            (Value::String(l), Value::String(r)) => Ok(Value::String(format!("{}{}", l, r))),
            // A string on either side renders the other side like str().
            (Value::String(l), r) => Ok(Value::String(format!("{}{}", l, r))),
            (l, Value::String(r)) => Ok(Value::String(format!("{}{}", l, r))),
            (Value::List(l), Value::List(r)) => {
                let mut items = l.clone();
                items.extend(r.iter().cloned());
                Ok(Value::List(items))
            }
            (l, r) => Err(RuntimeError::TypeMismatch {
                message: format!("{} + {}", l.type_name(), r.type_name()),
            }),
        }
    }

    fn eval_arith(
        left: &Value,
        right: &Value,
        symbol: &str,
        apply_int: fn(i64, i64) -> i64,
        apply_float: fn(f64, f64) -> f64,
    ) -> EvalResult<Value> {
        match (left, right) {
            (Value::Integer(l), Value::Integer(r)) => Ok(Value::Integer(apply_int(*l, *r))),
            _ => match (left.as_number(), right.as_number()) {
                (Some(l), Some(r)) => Ok(Value::Float(apply_float(l, r))),
                _ => Err(RuntimeError::TypeMismatch {
                    message: format!("{} {} {}", left.type_name(), symbol, right.type_name()),
                }),
            },
        }
    }

    fn eval_divide(left: &Value, right: &Value) -> EvalResult<Value> {
        match (left.as_number(), right.as_number()) {
            (Some(_), Some(r)) if r == 0.0 => Err(RuntimeError::DivisionByZero),
            // Division always yields a float.
            (Some(l), Some(r)) => Ok(Value::Float(l / r)),
            _ => Err(RuntimeError::TypeMismatch {
                message: format!("{} / {}", left.type_name(), right.type_name()),
            }),
        }
    }

    fn compare(
        left: &Value,
        right: &Value,
        decide: fn(std::cmp::Ordering) -> bool,
    ) -> EvalResult<Value> {
        let ordering = match (left, right) {
            (Value::String(l), Value::String(r)) => l.cmp(r),
            _ => match (left.as_number(), right.as_number()) {
                (Some(l), Some(r)) => l
                    .partial_cmp(&r)
                    .unwrap_or(std::cmp::Ordering::Equal),
                _ => {
                    return Err(RuntimeError::TypeMismatch {
                        message: format!(
                            "cannot order {} and {}",
                            left.type_name(),
                            right.type_name()
                        ),
                    })
                }
            },
        };
        Ok(Value::Boolean(decide(ordering)))
    }

    fn eval_contains(left: &Value, right: &Value) -> EvalResult<Value> {
        match left {
            Value::String(haystack) => {
                let needle = match right {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                Ok(Value::Boolean(haystack.contains(&needle)))
            }
            Value::List(items) => Ok(Value::Boolean(items.iter().any(|item| item == right))),
            other => Err(RuntimeError::TypeMismatch {
                message: format!("{} contains {}", other.type_name(), right.type_name()),
            }),
        }
    }

    fn eval_affix(left: &Value, right: &Value, prefix: bool) -> EvalResult<Value> {
        match (left, right) {
            (Value::String(s), Value::String(affix)) => Ok(Value::Boolean(if prefix {
                s.starts_with(affix.as_str())
            } else {
                s.ends_with(affix.as_str())
            })),
            (l, r) => Err(RuntimeError::TypeMismatch {
                message: format!(
                    "{} {} {}",
                    l.type_name(),
                    if prefix { "startswith" } else { "endswith" },
                    r.type_name()
                ),
            }),
        }
    }

    async fn eval_call(
        &self,
        name: &str,
        args: &[Expression],
        ctx: &ExecutionContext,
    ) -> EvalResult<Value> {
        if !builtins::is_builtin(name) {
            return Err(RuntimeError::UnknownFunction(name.to_string()));
        }
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.eval_expression(arg, ctx).await?);
        }
        builtins::call(name, values, ctx).await
    }
}

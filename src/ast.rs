//! # AST Model
//!
//! Typed nodes for the rule DSL. A parsed [`Rule`] is immutable: the
//! dispatcher shares rules out of its cache behind `Arc` and executors only
//! ever read them.
//!
//! Every node renders to a canonical text form via [`std::fmt::Display`].
//! The canonical form is fully parenthesized and re-parses to an equal AST,
//! which is what the round-trip tests rely on.

use core::fmt;

use crate::event::EventTag;

/// A parsed rule: trigger list, optional guard, statement body.
///
/// ```text
/// WHEN <trigger> (or <trigger>)*
/// [WHERE <expression>]
/// THEN { <statement>; ... }
/// END
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub triggers: Vec<Trigger>,
    pub guard: Option<Expression>,
    pub body: Block,
}

impl Rule {
    /// Whether this rule fires for the given canonical event tag.
    pub fn matches(&self, tag: EventTag) -> bool {
        self.triggers.iter().any(|t| match t {
            Trigger::Event(event) => *event == tag,
            Trigger::Schedule(_) => tag == EventTag::Schedule,
        })
    }

    /// The cron expression of a `schedule(..)` rule, if any.
    pub fn schedule(&self) -> Option<&str> {
        self.triggers.iter().find_map(|t| match t {
            Trigger::Schedule(cron) => Some(cron.as_str()),
            Trigger::Event(_) => None,
        })
    }
}

/// A single trigger in the `WHEN` list. `schedule("<cron>")` is mutually
/// exclusive with every other trigger; the parser enforces that.
#[derive(Debug, Clone, PartialEq)]
pub enum Trigger {
    Event(EventTag),
    Schedule(String),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Block {
    pub statements: Vec<Statement>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// A bare expression terminated by `;`. Calls to registered actions
    /// are dispatched from here by the executor.
    Expression { expr: Expression, line: usize },
    /// `path = expr;` — chained assignments nest right-associatively via
    /// [`Expression::Assignment`].
    Assign {
        target: Path,
        value: Expression,
        line: usize,
    },
    If {
        condition: Expression,
        then_block: Block,
        else_block: Option<Block>,
    },
    Foreach {
        variable: String,
        iterable: Expression,
        body: Block,
    },
    Break,
    Continue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Literal(Literal),
    List(Vec<Expression>),
    Dict(Vec<(String, Expression)>),
    /// A bare name: a local variable or a context root.
    Identifier(String),
    /// A dotted/indexed path, e.g. `message.reply_to_message.from_user.id`
    /// or `command.arg[0]`.
    Path(Path),
    Unary {
        op: UnaryOperator,
        operand: Box<Expression>,
    },
    Binary {
        op: BinaryOperator,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Call {
        name: String,
        args: Vec<Expression>,
        line: usize,
    },
    /// The tail of a chained assignment: `b = expr` inside `a = b = expr`.
    Assignment {
        target: Path,
        value: Box<Expression>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Path {
    pub root: String,
    pub segments: Vec<PathSegment>,
}

impl Path {
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            segments: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PathSegment {
    Attribute(String),
    Index(Expression),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    Not,
    Negate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    Add,
    Subtract,
    Multiply,
    Divide,
    Equal,
    NotEqual,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,
    Contains,
    StartsWith,
    EndsWith,
    And,
    Or,
}

impl fmt::Display for BinaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            BinaryOperator::Add => "+",
            BinaryOperator::Subtract => "-",
            BinaryOperator::Multiply => "*",
            BinaryOperator::Divide => "/",
            BinaryOperator::Equal => "==",
            BinaryOperator::NotEqual => "!=",
            BinaryOperator::Greater => ">",
            BinaryOperator::GreaterEqual => ">=",
            BinaryOperator::Less => "<",
            BinaryOperator::LessEqual => "<=",
            BinaryOperator::Contains => "contains",
            BinaryOperator::StartsWith => "startswith",
            BinaryOperator::EndsWith => "endswith",
            BinaryOperator::And => "and",
            BinaryOperator::Or => "or",
        };
        write!(f, "{}", text)
    }
}

/// Literal values in the AST. Runtime values live in
/// [`crate::eval::value::Value`]; these are only what the source spelled out.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Integer(i64),
    Float(f64),
    String(String),
    Boolean(bool),
    Null,
}

// ---- canonical rendering -------------------------------------------------

fn escape_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Integer(i) => write!(f, "{}", i),
            // A whole float keeps one fractional digit so it re-parses as
            // a float, not an integer.
            Literal::Float(v) if v.fract() == 0.0 => write!(f, "{:.1}", v),
            Literal::Float(v) => write!(f, "{}", v),
            Literal::String(s) => write!(f, "\"{}\"", escape_string(s)),
            Literal::Boolean(b) => write!(f, "{}", b),
            Literal::Null => write!(f, "null"),
        }
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.root)?;
        for segment in &self.segments {
            match segment {
                PathSegment::Attribute(name) => write!(f, ".{}", name)?,
                PathSegment::Index(index) => write!(f, "[{}]", index)?,
            }
        }
        Ok(())
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Literal(lit) => write!(f, "{}", lit),
            Expression::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Expression::Dict(pairs) => {
                write!(f, "{{")?;
                for (i, (key, value)) in pairs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "\"{}\": {}", escape_string(key), value)?;
                }
                write!(f, "}}")
            }
            Expression::Identifier(name) => write!(f, "{}", name),
            Expression::Path(path) => write!(f, "{}", path),
            Expression::Unary { op, operand } => match op {
                UnaryOperator::Not => write!(f, "(not {})", operand),
                UnaryOperator::Negate => write!(f, "(-{})", operand),
            },
            Expression::Binary { op, left, right } => {
                write!(f, "({} {} {})", left, op, right)
            }
            Expression::Call { name, args, .. } => {
                write!(f, "{}(", name)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ")")
            }
            Expression::Assignment { target, value } => {
                write!(f, "{} = {}", target, value)
            }
        }
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statement::Expression { expr, .. } => write!(f, "{};", expr),
            Statement::Assign { target, value, .. } => write!(f, "{} = {};", target, value),
            Statement::If {
                condition,
                then_block,
                else_block,
            } => {
                write!(f, "if ({}) {}", condition, then_block)?;
                if let Some(else_block) = else_block {
                    write!(f, " else {}", else_block)?;
                }
                Ok(())
            }
            Statement::Foreach {
                variable,
                iterable,
                body,
            } => write!(f, "foreach ({} in {}) {}", variable, iterable, body),
            Statement::Break => write!(f, "break;"),
            Statement::Continue => write!(f, "continue;"),
        }
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for statement in &self.statements {
            write!(f, " {}", statement)?;
        }
        write!(f, " }}")
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Event(tag) => write!(f, "{}", tag),
            Trigger::Schedule(cron) => write!(f, "schedule(\"{}\")", escape_string(cron)),
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WHEN ")?;
        for (i, trigger) in self.triggers.iter().enumerate() {
            if i > 0 {
                write!(f, " or ")?;
            }
            write!(f, "{}", trigger)?;
        }
        if let Some(guard) = &self.guard {
            write!(f, " WHERE {}", guard)?;
        }
        write!(f, " THEN {} END", self.body)
    }
}

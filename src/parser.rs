//! # Rule Parser
//!
//! Recursive descent over the preprocessed token stream, with precedence
//! climbing for expressions. The parser either returns a complete
//! [`Rule`] or fails with a diagnostic carrying the offending token's
//! line and column; partial ASTs are never surfaced.
//!
//! [`precompile`] wraps the whole pipeline for syntax validation without
//! execution: `(source) → (ok, message)`.

use std::str::FromStr;

use thiserror::Error;

use crate::ast::{
    BinaryOperator, Block, Expression, Literal, Path, PathSegment, Rule, Statement, Trigger,
    UnaryOperator,
};
use crate::event::EventTag;
use crate::preprocessor::{Preprocessor, TokenPreprocessor};
use crate::tokenizer::keyword::Keyword;
use crate::tokenizer::literal::Literal as TokenLiteral;
use crate::tokenizer::symbol::{Delimiter, Operator};
use crate::tokenizer::token::{LexError, Token, TokenSpan, Tokenizer};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("parse error (line {line}, column {column}): expected {expected}, got {found}")]
    Unexpected {
        expected: String,
        found: String,
        line: usize,
        column: usize,
    },
    #[error("parse error (line {line}, column {column}): {message}")]
    Invalid {
        message: String,
        line: usize,
        column: usize,
    },
}

/// Lexing and parsing failures surfaced by [`compile`] / [`precompile`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompileError {
    #[error(transparent)]
    Lex(#[from] LexError),
    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// Compile one rule source into its AST.
#[tracing::instrument(level = "debug", skip(source))]
pub fn compile(source: &str) -> Result<Rule, CompileError> {
    let spans = Tokenizer::new().tokenize(source)?;
    let tokens = TokenPreprocessor::new().process(spans);
    let rule = RuleParser::new(tokens).parse()?;
    Ok(rule)
}

/// Syntax validation without execution: `ok == true` iff lexing and
/// parsing both succeed.
pub fn precompile(source: &str) -> (bool, Option<String>) {
    match compile(source) {
        Ok(_) => (true, None),
        Err(e) => (false, Some(e.to_string())),
    }
}

pub struct RuleParser {
    tokens: Vec<TokenSpan>,
    pos: usize,
}

impl RuleParser {
    pub fn new(tokens: Vec<TokenSpan>) -> Self {
        Self { tokens, pos: 0 }
    }

    pub fn parse(&mut self) -> Result<Rule, ParseError> {
        self.expect_keyword(Keyword::When)?;

        let mut triggers = vec![self.parse_trigger()?];
        while self.peek_keyword(Keyword::Or) {
            self.advance();
            triggers.push(self.parse_trigger()?);
        }
        if triggers.len() > 1 && triggers.iter().any(|t| matches!(t, Trigger::Schedule(_))) {
            let (line, column) = self.position_of(0);
            return Err(ParseError::Invalid {
                message: "schedule(..) cannot be combined with other triggers".to_string(),
                line,
                column,
            });
        }

        let guard = if self.peek_keyword(Keyword::Where) {
            self.advance();
            Some(self.parse_expression(0)?)
        } else {
            None
        };

        self.expect_keyword(Keyword::Then)?;
        let body = self.parse_block()?;
        self.expect_keyword(Keyword::End)?;

        if !self.is_at_end() {
            return Err(self.unexpected("end of input"));
        }

        Ok(Rule {
            triggers,
            guard,
            body,
        })
    }

    fn parse_trigger(&mut self) -> Result<Trigger, ParseError> {
        let (line, column) = self.current_position();
        let name = self.expect_identifier("a trigger")?;

        if name == "schedule" {
            self.expect_delimiter(Delimiter::OpenParen)?;
            let cron = match self.current_token() {
                Some(Token::Literal(TokenLiteral::String(s))) => {
                    let cron = s.clone();
                    self.advance();
                    cron
                }
                _ => return Err(self.unexpected("a string literal")),
            };
            self.expect_delimiter(Delimiter::CloseParen)?;
            return Ok(Trigger::Schedule(cron));
        }

        match EventTag::from_str(&name) {
            Ok(tag) => Ok(Trigger::Event(tag)),
            Err(_) => Err(ParseError::Invalid {
                message: format!("unknown trigger '{}'", name),
                line,
                column,
            }),
        }
    }

    fn parse_block(&mut self) -> Result<Block, ParseError> {
        self.expect_delimiter(Delimiter::OpenBrace)?;
        let mut statements = Vec::new();
        while !self.peek_delimiter(Delimiter::CloseBrace) && !self.is_at_end() {
            statements.push(self.parse_statement()?);
        }
        self.expect_delimiter(Delimiter::CloseBrace)?;
        Ok(Block { statements })
    }

    fn parse_statement(&mut self) -> Result<Statement, ParseError> {
        let (line, _) = self.current_position();

        if self.peek_keyword(Keyword::If) {
            return self.parse_if_statement();
        }
        if self.peek_keyword(Keyword::Foreach) {
            return self.parse_foreach_statement();
        }
        if self.peek_keyword(Keyword::Break) {
            self.advance();
            self.expect_delimiter(Delimiter::Semicolon)?;
            return Ok(Statement::Break);
        }
        if self.peek_keyword(Keyword::Continue) {
            self.advance();
            self.expect_delimiter(Delimiter::Semicolon)?;
            return Ok(Statement::Continue);
        }

        let statement = if self.lookahead_is_assignment() {
            let target = self.parse_path_target()?;
            self.expect_operator(Operator::Assign)?;
            let value = self.parse_assignment_value()?;
            Statement::Assign {
                target,
                value,
                line,
            }
        } else {
            let expr = self.parse_expression(0)?;
            Statement::Expression { expr, line }
        };

        self.expect_delimiter(Delimiter::Semicolon)?;
        Ok(statement)
    }

    /// Scans forward to decide whether the upcoming statement is an
    /// assignment: `=` before any of `;`, `(` or the end of the stream.
    fn lookahead_is_assignment(&self) -> bool {
        let mut i = self.pos;
        while let Some(span) = self.tokens.get(i) {
            match &span.token {
                Token::Delimiter(Delimiter::Semicolon) => return false,
                Token::Delimiter(Delimiter::OpenParen) => return false,
                Token::Operator(Operator::Assign) => return true,
                _ => i += 1,
            }
        }
        false
    }

    /// The right-hand side of an assignment; chained `a = b = e` nests
    /// right-associatively and evaluates `e` once at run time.
    fn parse_assignment_value(&mut self) -> Result<Expression, ParseError> {
        if self.lookahead_is_assignment() {
            let target = self.parse_path_target()?;
            self.expect_operator(Operator::Assign)?;
            let value = Box::new(self.parse_assignment_value()?);
            return Ok(Expression::Assignment { target, value });
        }
        self.parse_expression(0)
    }

    fn parse_if_statement(&mut self) -> Result<Statement, ParseError> {
        self.expect_keyword(Keyword::If)?;
        self.expect_delimiter(Delimiter::OpenParen)?;
        let condition = self.parse_expression(0)?;
        self.expect_delimiter(Delimiter::CloseParen)?;
        let then_block = self.parse_block()?;

        let else_block = if self.peek_keyword(Keyword::Else) {
            self.advance();
            if self.peek_keyword(Keyword::If) {
                // `else if` desugars to an else block holding one if.
                Some(Block {
                    statements: vec![self.parse_if_statement()?],
                })
            } else {
                Some(self.parse_block()?)
            }
        } else {
            None
        };

        Ok(Statement::If {
            condition,
            then_block,
            else_block,
        })
    }

    fn parse_foreach_statement(&mut self) -> Result<Statement, ParseError> {
        self.expect_keyword(Keyword::Foreach)?;
        self.expect_delimiter(Delimiter::OpenParen)?;
        let variable = self.expect_identifier("a loop variable")?;
        self.expect_keyword(Keyword::In)?;
        let iterable = self.parse_expression(0)?;
        self.expect_delimiter(Delimiter::CloseParen)?;
        let body = self.parse_block()?;
        Ok(Statement::Foreach {
            variable,
            iterable,
            body,
        })
    }

    /// Precedence climbing; `min_precedence` is the lowest binding power
    /// this call is allowed to consume.
    fn parse_expression(&mut self, min_precedence: u8) -> Result<Expression, ParseError> {
        let mut lhs = self.parse_unary()?;

        while let Some((op, precedence)) = self.peek_binary_operator() {
            if precedence < min_precedence {
                break;
            }
            self.advance();
            let rhs = self.parse_expression(precedence + 1)?;
            lhs = Expression::Binary {
                op,
                left: Box::new(lhs),
                right: Box::new(rhs),
            };
        }

        Ok(lhs)
    }

    fn peek_binary_operator(&self) -> Option<(BinaryOperator, u8)> {
        match self.current_token()? {
            Token::Keyword(Keyword::Or) => Some((BinaryOperator::Or, 2)),
            Token::Keyword(Keyword::And) => Some((BinaryOperator::And, 3)),
            Token::Keyword(Keyword::Contains) => Some((BinaryOperator::Contains, 4)),
            Token::Keyword(Keyword::Startswith) => Some((BinaryOperator::StartsWith, 4)),
            Token::Keyword(Keyword::Endswith) => Some((BinaryOperator::EndsWith, 4)),
            Token::Operator(Operator::EqualEqual) => Some((BinaryOperator::Equal, 4)),
            Token::Operator(Operator::NotEqual) => Some((BinaryOperator::NotEqual, 4)),
            Token::Operator(Operator::Greater) => Some((BinaryOperator::Greater, 4)),
            Token::Operator(Operator::GreaterEqual) => Some((BinaryOperator::GreaterEqual, 4)),
            Token::Operator(Operator::Less) => Some((BinaryOperator::Less, 4)),
            Token::Operator(Operator::LessEqual) => Some((BinaryOperator::LessEqual, 4)),
            Token::Operator(Operator::Plus) => Some((BinaryOperator::Add, 5)),
            Token::Operator(Operator::Minus) => Some((BinaryOperator::Subtract, 5)),
            Token::Operator(Operator::Star) => Some((BinaryOperator::Multiply, 6)),
            Token::Operator(Operator::Slash) => Some((BinaryOperator::Divide, 6)),
            _ => None,
        }
    }

    fn parse_unary(&mut self) -> Result<Expression, ParseError> {
        if self.peek_keyword(Keyword::Not) {
            self.advance();
            let operand = Box::new(self.parse_unary()?);
            return Ok(Expression::Unary {
                op: UnaryOperator::Not,
                operand,
            });
        }
        if matches!(self.current_token(), Some(Token::Operator(Operator::Minus))) {
            self.advance();
            let operand = Box::new(self.parse_unary()?);
            return Ok(Expression::Unary {
                op: UnaryOperator::Negate,
                operand,
            });
        }
        self.parse_postfix()
    }

    /// Postfix `.name` and `[expr]` chains attached to an identifier,
    /// producing a [`Path`].
    fn parse_postfix(&mut self) -> Result<Expression, ParseError> {
        let mut expr = self.parse_primary()?;

        loop {
            if matches!(self.current_token(), Some(Token::Operator(Operator::Dot))) {
                self.advance();
                let attr = self.expect_identifier("an attribute name")?;
                expr = self.extend_path(expr, PathSegment::Attribute(attr))?;
            } else if self.peek_delimiter(Delimiter::OpenBracket) {
                self.advance();
                let index = self.parse_expression(0)?;
                self.expect_delimiter(Delimiter::CloseBracket)?;
                expr = self.extend_path(expr, PathSegment::Index(index))?;
            } else {
                break;
            }
        }

        Ok(expr)
    }

    fn extend_path(
        &self,
        expr: Expression,
        segment: PathSegment,
    ) -> Result<Expression, ParseError> {
        let mut path = match expr {
            Expression::Identifier(root) => Path::new(root),
            Expression::Path(path) => path,
            _ => {
                let (line, column) = self.position_of(self.pos.saturating_sub(1));
                return Err(ParseError::Invalid {
                    message: "path segments must follow an identifier".to_string(),
                    line,
                    column,
                });
            }
        };
        path.segments.push(segment);
        Ok(Expression::Path(path))
    }

    fn parse_primary(&mut self) -> Result<Expression, ParseError> {
        let token = match self.current_token() {
            Some(token) => token.clone(),
            None => return Err(self.unexpected("an expression")),
        };

        match token {
            Token::Literal(TokenLiteral::String(s)) => {
                self.advance();
                Ok(Expression::Literal(Literal::String(s)))
            }
            Token::Literal(TokenLiteral::Integer(i)) => {
                self.advance();
                Ok(Expression::Literal(Literal::Integer(i)))
            }
            Token::Literal(TokenLiteral::Float(v)) => {
                self.advance();
                Ok(Expression::Literal(Literal::Float(v)))
            }
            Token::Keyword(Keyword::True) => {
                self.advance();
                Ok(Expression::Literal(Literal::Boolean(true)))
            }
            Token::Keyword(Keyword::False) => {
                self.advance();
                Ok(Expression::Literal(Literal::Boolean(false)))
            }
            Token::Keyword(Keyword::Null) => {
                self.advance();
                Ok(Expression::Literal(Literal::Null))
            }
            Token::Delimiter(Delimiter::OpenParen) => {
                self.advance();
                let expr = self.parse_expression(0)?;
                self.expect_delimiter(Delimiter::CloseParen)?;
                Ok(expr)
            }
            Token::Delimiter(Delimiter::OpenBracket) => self.parse_list_literal(),
            Token::Delimiter(Delimiter::OpenBrace) => self.parse_dict_literal(),
            Token::Identifier(name) => {
                let (line, _) = self.current_position();
                self.advance();
                if self.peek_delimiter(Delimiter::OpenParen) {
                    let args = self.parse_call_arguments()?;
                    Ok(Expression::Call { name, args, line })
                } else {
                    Ok(Expression::Identifier(name))
                }
            }
            _ => Err(self.unexpected("an expression")),
        }
    }

    fn parse_call_arguments(&mut self) -> Result<Vec<Expression>, ParseError> {
        self.expect_delimiter(Delimiter::OpenParen)?;
        let mut args = Vec::new();
        if !self.peek_delimiter(Delimiter::CloseParen) {
            loop {
                args.push(self.parse_expression(0)?);
                if !self.peek_delimiter(Delimiter::Comma) {
                    break;
                }
                self.advance();
            }
        }
        self.expect_delimiter(Delimiter::CloseParen)?;
        Ok(args)
    }

    fn parse_list_literal(&mut self) -> Result<Expression, ParseError> {
        self.expect_delimiter(Delimiter::OpenBracket)?;
        let mut items = Vec::new();
        if !self.peek_delimiter(Delimiter::CloseBracket) {
            loop {
                items.push(self.parse_expression(0)?);
                if !self.peek_delimiter(Delimiter::Comma) {
                    break;
                }
                self.advance();
            }
        }
        self.expect_delimiter(Delimiter::CloseBracket)?;
        Ok(Expression::List(items))
    }

    fn parse_dict_literal(&mut self) -> Result<Expression, ParseError> {
        self.expect_delimiter(Delimiter::OpenBrace)?;
        let mut pairs = Vec::new();
        if !self.peek_delimiter(Delimiter::CloseBrace) {
            loop {
                let key = match self.current_token() {
                    Some(Token::Literal(TokenLiteral::String(s))) => {
                        let key = s.clone();
                        self.advance();
                        key
                    }
                    _ => return Err(self.unexpected("a string key")),
                };
                self.expect_delimiter(Delimiter::Colon)?;
                let value = self.parse_expression(0)?;
                pairs.push((key, value));
                if !self.peek_delimiter(Delimiter::Comma) {
                    break;
                }
                self.advance();
            }
        }
        self.expect_delimiter(Delimiter::CloseBrace)?;
        Ok(Expression::Dict(pairs))
    }

    fn parse_path_target(&mut self) -> Result<Path, ParseError> {
        let root = self.expect_identifier("an assignment target")?;
        let mut path = Path::new(root);
        loop {
            if matches!(self.current_token(), Some(Token::Operator(Operator::Dot))) {
                self.advance();
                let attr = self.expect_identifier("an attribute name")?;
                path.segments.push(PathSegment::Attribute(attr));
            } else if self.peek_delimiter(Delimiter::OpenBracket) {
                self.advance();
                let index = self.parse_expression(0)?;
                self.expect_delimiter(Delimiter::CloseBracket)?;
                path.segments.push(PathSegment::Index(index));
            } else {
                break;
            }
        }
        Ok(path)
    }

    // ---- token cursor helpers --------------------------------------------

    fn current_token(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|span| &span.token)
    }

    fn current_position(&self) -> (usize, usize) {
        self.position_of(self.pos)
    }

    /// Position of the token at `index`, falling back to the last token
    /// when the stream has run out.
    fn position_of(&self, index: usize) -> (usize, usize) {
        if let Some(span) = self.tokens.get(index) {
            (span.line, span.column)
        } else if let Some(span) = self.tokens.last() {
            (span.line, span.column)
        } else {
            (1, 1)
        }
    }

    fn advance(&mut self) {
        self.pos += 1;
    }

    fn is_at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn peek_keyword(&self, keyword: Keyword) -> bool {
        matches!(self.current_token(), Some(Token::Keyword(k)) if *k == keyword)
    }

    fn peek_delimiter(&self, delimiter: Delimiter) -> bool {
        matches!(self.current_token(), Some(Token::Delimiter(d)) if *d == delimiter)
    }

    fn expect_keyword(&mut self, keyword: Keyword) -> Result<(), ParseError> {
        if self.peek_keyword(keyword) {
            self.advance();
            Ok(())
        } else {
            Err(self.unexpected(&format!("'{}'", keyword)))
        }
    }

    fn expect_delimiter(&mut self, delimiter: Delimiter) -> Result<(), ParseError> {
        if self.peek_delimiter(delimiter) {
            self.advance();
            Ok(())
        } else {
            Err(self.unexpected(&format!("'{}'", delimiter)))
        }
    }

    fn expect_operator(&mut self, operator: Operator) -> Result<(), ParseError> {
        if matches!(self.current_token(), Some(Token::Operator(op)) if *op == operator) {
            self.advance();
            Ok(())
        } else {
            Err(self.unexpected(&format!("'{}'", operator)))
        }
    }

    fn expect_identifier(&mut self, expected: &str) -> Result<String, ParseError> {
        match self.current_token() {
            Some(Token::Identifier(name)) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(self.unexpected(expected)),
        }
    }

    fn unexpected(&self, expected: &str) -> ParseError {
        let (line, column) = self.current_position();
        let found = match self.current_token() {
            Some(token) => format!("'{}'", token),
            None => "end of input".to_string(),
        };
        ParseError::Unexpected {
            expected: expected.to_string(),
            found,
            line,
            column,
        }
    }
}

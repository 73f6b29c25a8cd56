use std::fmt;

use nom::{branch::alt, bytes::complete::tag, combinator::map};

use super::token::{ParserResult, Token};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    // Comparison
    EqualEqual,
    NotEqual,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,
    // Arithmetic
    Plus,
    Minus,
    Star,
    Slash,
    // Assignment and access
    Assign,
    Dot,
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Operator::EqualEqual => "==",
            Operator::NotEqual => "!=",
            Operator::Greater => ">",
            Operator::GreaterEqual => ">=",
            Operator::Less => "<",
            Operator::LessEqual => "<=",
            Operator::Plus => "+",
            Operator::Minus => "-",
            Operator::Star => "*",
            Operator::Slash => "/",
            Operator::Assign => "=",
            Operator::Dot => ".",
        };
        write!(f, "{}", text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delimiter {
    OpenBrace,
    CloseBrace,
    OpenParen,
    CloseParen,
    OpenBracket,
    CloseBracket,
    Comma,
    Semicolon,
    Colon,
}

impl fmt::Display for Delimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Delimiter::OpenBrace => "{",
            Delimiter::CloseBrace => "}",
            Delimiter::OpenParen => "(",
            Delimiter::CloseParen => ")",
            Delimiter::OpenBracket => "[",
            Delimiter::CloseBracket => "]",
            Delimiter::Comma => ",",
            Delimiter::Semicolon => ";",
            Delimiter::Colon => ":",
        };
        write!(f, "{}", text)
    }
}

// Two-character operators must be tried before their one-character prefixes.
pub fn parse_operator(input: &str) -> ParserResult<Token> {
    alt((
        map(tag("=="), |_| Token::Operator(Operator::EqualEqual)),
        map(tag("!="), |_| Token::Operator(Operator::NotEqual)),
        map(tag(">="), |_| Token::Operator(Operator::GreaterEqual)),
        map(tag("<="), |_| Token::Operator(Operator::LessEqual)),
        map(tag(">"), |_| Token::Operator(Operator::Greater)),
        map(tag("<"), |_| Token::Operator(Operator::Less)),
        map(tag("+"), |_| Token::Operator(Operator::Plus)),
        map(tag("-"), |_| Token::Operator(Operator::Minus)),
        map(tag("*"), |_| Token::Operator(Operator::Star)),
        map(tag("/"), |_| Token::Operator(Operator::Slash)),
        map(tag("="), |_| Token::Operator(Operator::Assign)),
        map(tag("."), |_| Token::Operator(Operator::Dot)),
    ))(input)
}

pub fn parse_delimiter(input: &str) -> ParserResult<Token> {
    alt((
        map(tag("{"), |_| Token::Delimiter(Delimiter::OpenBrace)),
        map(tag("}"), |_| Token::Delimiter(Delimiter::CloseBrace)),
        map(tag("("), |_| Token::Delimiter(Delimiter::OpenParen)),
        map(tag(")"), |_| Token::Delimiter(Delimiter::CloseParen)),
        map(tag("["), |_| Token::Delimiter(Delimiter::OpenBracket)),
        map(tag("]"), |_| Token::Delimiter(Delimiter::CloseBracket)),
        map(tag(","), |_| Token::Delimiter(Delimiter::Comma)),
        map(tag(";"), |_| Token::Delimiter(Delimiter::Semicolon)),
        map(tag(":"), |_| Token::Delimiter(Delimiter::Colon)),
    ))(input)
}

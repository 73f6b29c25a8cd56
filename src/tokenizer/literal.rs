use std::fmt;

use nom::{
    branch::alt,
    bytes::complete::take_while1,
    character::complete::{char, digit0, digit1, one_of},
    combinator::{map, opt, recognize},
    error::context,
    multi::fold_many0,
    sequence::{delimited, preceded, tuple},
};

use super::token::{ParserResult, Token};

/// Literal values as they appear in source. Booleans and `null` are
/// keywords, not literals; a leading minus is a unary operator and never
/// part of a number literal.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    String(String),
    Integer(i64),
    Float(f64),
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::String(s) => write!(f, "\"{}\"", s),
            Literal::Integer(i) => write!(f, "{}", i),
            Literal::Float(v) => write!(f, "{}", v),
        }
    }
}

#[tracing::instrument(level = "trace", skip(input))]
pub fn parse_literal(input: &str) -> ParserResult<Token> {
    context(
        "literal",
        map(alt((parse_string_literal, parse_number_literal)), Token::Literal),
    )(input)
}

fn parse_string_literal(input: &str) -> ParserResult<Literal> {
    context(
        "string literal",
        alt((quoted_string('"'), quoted_string('\''))),
    )(input)
}

/// Builds a parser for one quote style. Supported escapes: `\\`, `\"`,
/// `\'`, `\n`, `\t`; any other backslash pair is kept verbatim.
fn quoted_string(quote: char) -> impl Fn(&str) -> ParserResult<Literal> {
    move |input: &str| {
        let body = fold_many0(
            alt((
                map(preceded(char('\\'), one_of("\\\"'nt")), |c| match c {
                    'n' => "\n".to_string(),
                    't' => "\t".to_string(),
                    other => other.to_string(),
                }),
                map(
                    preceded(char('\\'), nom::character::complete::anychar),
                    |c| format!("\\{}", c),
                ),
                map(
                    take_while1(move |c: char| c != quote && c != '\\'),
                    |s: &str| s.to_string(),
                ),
            )),
            String::new,
            |mut acc, part| {
                acc.push_str(&part);
                acc
            },
        );
        map(delimited(char(quote), body, char(quote)), Literal::String)(input)
    }
}

fn parse_number_literal(input: &str) -> ParserResult<Literal> {
    let (rest, text) = context(
        "number literal",
        recognize(tuple((digit1, opt(tuple((char('.'), digit0)))))),
    )(input)?;

    let literal = if text.contains('.') {
        Literal::Float(text.parse::<f64>().unwrap_or(0.0))
    } else {
        match text.parse::<i64>() {
            Ok(i) => Literal::Integer(i),
            Err(_) => Literal::Float(text.parse::<f64>().unwrap_or(0.0)),
        }
    };
    Ok((rest, literal))
}

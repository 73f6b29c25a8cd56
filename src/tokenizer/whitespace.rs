use nom::{
    branch::alt,
    bytes::complete::{tag, take_while1},
    combinator::map,
    error::context,
};

use super::token::{ParserResult, Token};

pub fn parse_whitespace(input: &str) -> ParserResult<Token> {
    context(
        "whitespace",
        map(
            take_while1(|c: char| c == ' ' || c == '\t' || c == '\r'),
            |s: &str| Token::Whitespace(s.to_string()),
        ),
    )(input)
}

pub fn parse_newline(input: &str) -> ParserResult<Token> {
    context("newline", map(alt((tag("\r\n"), tag("\n"))), |_| Token::Newline))(input)
}

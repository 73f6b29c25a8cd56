use std::fmt;

use nom::{
    branch::alt,
    bytes::complete::{take_while, take_while1},
    combinator::recognize,
    error::{context, VerboseError},
    sequence::pair,
    IResult,
};
use thiserror::Error;

use super::{
    comment::parse_comment,
    keyword::Keyword,
    literal::{parse_literal, Literal},
    symbol::{parse_delimiter, parse_operator, Delimiter, Operator},
    whitespace::{parse_newline, parse_whitespace},
};

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Keywords (case-insensitive in source)
    Keyword(Keyword),
    // Identifiers
    Identifier(String),
    // Symbols
    Operator(Operator),
    Delimiter(Delimiter),
    // Literals
    Literal(Literal),
    // Formatting (removed by the preprocessor)
    Whitespace(String),
    Newline,
    Comment(String),
}

impl Token {
    pub fn is_whitespace(&self) -> bool {
        matches!(self, Token::Whitespace(_))
    }

    pub fn is_newline(&self) -> bool {
        matches!(self, Token::Newline)
    }

    pub fn is_comment(&self) -> bool {
        matches!(self, Token::Comment(_))
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Keyword(k) => write!(f, "{}", k),
            Token::Identifier(name) => write!(f, "{}", name),
            Token::Operator(op) => write!(f, "{}", op),
            Token::Delimiter(d) => write!(f, "{}", d),
            Token::Literal(lit) => write!(f, "{}", lit),
            Token::Whitespace(_) => write!(f, " "),
            Token::Newline => write!(f, "\\n"),
            Token::Comment(text) => write!(f, "//{}", text),
        }
    }
}

/// A token together with its source position. Lines and columns are
/// 1-based; `start`/`end` are byte offsets into the source.
#[derive(Debug, Clone)]
pub struct TokenSpan {
    pub token: Token,
    pub start: usize,
    pub end: usize,
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Clone)]
pub struct Tokenizer {
    current_position: usize,
    current_line: usize,
    current_column: usize,
}

impl Default for Tokenizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Tokenizer {
    pub fn new() -> Self {
        Self {
            current_position: 0,
            current_line: 1,
            current_column: 1,
        }
    }

    #[tracing::instrument(level = "debug", skip(self, input))]
    pub fn tokenize(&mut self, input: &str) -> Result<Vec<TokenSpan>, LexError> {
        let mut tokens = Vec::new();
        let mut remaining = input;

        while !remaining.is_empty() {
            let start_position = self.current_position;
            let start_line = self.current_line;
            let start_column = self.current_column;

            let result = alt((
                // Formatting
                parse_whitespace,
                parse_newline,
                parse_comment,
                // Literals
                parse_literal,
                // Code elements
                parse_operator,
                parse_delimiter,
                parse_identifier,
            ))(remaining);

            match result {
                Ok((new_remaining, token)) => {
                    let consumed = &remaining[..(remaining.len() - new_remaining.len())];
                    self.update_position(consumed);

                    tokens.push(TokenSpan {
                        token,
                        start: start_position,
                        end: self.current_position,
                        line: start_line,
                        column: start_column,
                    });

                    remaining = new_remaining;
                }
                Err(_) => {
                    let found = remaining.chars().next().unwrap_or('\0');
                    let error = LexError::UnexpectedCharacter {
                        character: found,
                        line: start_line,
                        column: start_column,
                    };
                    tracing::debug!("{}", error);
                    return Err(error);
                }
            }
        }

        Ok(tokens)
    }

    fn update_position(&mut self, text: &str) {
        for c in text.chars() {
            self.current_position += c.len_utf8();
            if c == '\n' {
                self.current_line += 1;
                self.current_column = 1;
            } else {
                self.current_column += 1;
            }
        }
    }
}

#[tracing::instrument(level = "trace", skip(input))]
fn parse_identifier(input: &str) -> ParserResult<Token> {
    let (input, id) = context(
        "identifier",
        recognize(pair(
            take_while1(|c: char| c.is_alphabetic() || c == '_'),
            take_while(|c: char| c.is_alphanumeric() || c == '_'),
        )),
    )(input)?;

    // Keywords fold case-insensitively out of the identifier space.
    if let Ok(kw) = Keyword::try_from(id) {
        return Ok((input, Token::Keyword(kw)));
    }

    Ok((input, Token::Identifier(id.to_string())))
}

pub type ParserResult<'a, T> = IResult<&'a str, T, VerboseError<&'a str>>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LexError {
    #[error("lex error (line {line}, column {column}): unexpected character '{character}'")]
    UnexpectedCharacter {
        character: char,
        line: usize,
        column: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn significant(tokens: &[TokenSpan]) -> Vec<&Token> {
        tokens
            .iter()
            .filter(|t| !t.token.is_whitespace() && !t.token.is_newline() && !t.token.is_comment())
            .map(|t| &t.token)
            .collect()
    }

    #[test]
    fn test_identifier_keyword_folding() {
        let (rest, token) = parse_identifier("WHEN message").unwrap();
        assert_eq!(token, Token::Keyword(Keyword::When));
        assert_eq!(rest, " message");

        let (_, token) = parse_identifier("Foreach").unwrap();
        assert_eq!(token, Token::Keyword(Keyword::Foreach));

        let (_, token) = parse_identifier("whenever").unwrap();
        assert_eq!(token, Token::Identifier("whenever".to_string()));
    }

    #[test]
    fn test_tokenizer_tracks_positions() {
        let mut tokenizer = Tokenizer::new();
        let tokens = tokenizer.tokenize("x\nreply").unwrap();

        assert_eq!(tokens[0].line, 1);
        assert_eq!(tokens[0].column, 1);
        assert_eq!(tokens[0].token, Token::Identifier("x".to_string()));

        assert_eq!(tokens[2].line, 2);
        assert_eq!(tokens[2].column, 1);
        assert_eq!(tokens[2].token, Token::Identifier("reply".to_string()));
    }

    #[test]
    fn test_rule_header_tokens() {
        let mut tokenizer = Tokenizer::new();
        let tokens = tokenizer
            .tokenize("WHEN message WHERE message.text contains \"spam\" THEN { stop(); } END")
            .unwrap();
        let tokens = significant(&tokens);

        assert_eq!(tokens[0], &Token::Keyword(Keyword::When));
        assert_eq!(tokens[1], &Token::Identifier("message".to_string()));
        assert_eq!(tokens[2], &Token::Keyword(Keyword::Where));
        assert_eq!(tokens[6], &Token::Keyword(Keyword::Contains));
        assert_eq!(
            tokens[7],
            &Token::Literal(Literal::String("spam".to_string()))
        );
        assert_eq!(tokens[8], &Token::Keyword(Keyword::Then));
        assert_eq!(tokens.last().unwrap(), &&Token::Keyword(Keyword::End));
    }

    #[test]
    fn test_comment_is_tokenized() {
        let mut tokenizer = Tokenizer::new();
        let tokens = tokenizer.tokenize("x // trailing note\ny").unwrap();
        assert!(tokens.iter().any(|t| t.token.is_comment()));
        // The newline after the comment still advances the line counter.
        let y = tokens
            .iter()
            .find(|t| t.token == Token::Identifier("y".to_string()))
            .unwrap();
        assert_eq!(y.line, 2);
    }

    #[test]
    fn test_unexpected_character() {
        let mut tokenizer = Tokenizer::new();
        let err = tokenizer.tokenize("x = 1 @ 2").unwrap_err();
        assert_eq!(
            err.to_string(),
            "lex error (line 1, column 7): unexpected character '@'"
        );
    }

    #[test]
    fn test_operators_longest_match() {
        let mut tokenizer = Tokenizer::new();
        let tokens = tokenizer.tokenize("a >= b == c != d").unwrap();
        let tokens = significant(&tokens);
        assert_eq!(tokens[1], &Token::Operator(Operator::GreaterEqual));
        assert_eq!(tokens[3], &Token::Operator(Operator::EqualEqual));
        assert_eq!(tokens[5], &Token::Operator(Operator::NotEqual));
    }
}

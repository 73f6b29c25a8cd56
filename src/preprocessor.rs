//! # Preprocessor
//!
//! Sits between the tokenizer and the parser:
//!
//! ```text
//! Source Code → Tokenizer → Preprocessor → Parser → Executor
//! ```
//!
//! The tokenizer preserves whitespace, newlines and comments so that token
//! positions stay exact; the preprocessor removes that trivia and hands the
//! parser a stream of significant tokens only.

use crate::tokenizer::token::TokenSpan;

/// A trait for preprocessing different types of input.
pub trait Preprocessor<T, U = T> {
    /// Process the input of type T and return the processed result.
    fn process(&self, input: T) -> U;
}

/// Token-stream preprocessor: drops trivia tokens.
#[derive(Default)]
pub struct TokenPreprocessor {}

impl TokenPreprocessor {
    pub fn new() -> Self {
        Self {}
    }
}

impl Preprocessor<Vec<TokenSpan>> for TokenPreprocessor {
    fn process(&self, input: Vec<TokenSpan>) -> Vec<TokenSpan> {
        input
            .into_iter()
            .filter(|span| {
                !span.token.is_comment() && !span.token.is_whitespace() && !span.token.is_newline()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::token::{Token, Tokenizer};

    #[test]
    fn test_trivia_removed() {
        let mut tokenizer = Tokenizer::new();
        let spans = tokenizer.tokenize("x = 1; // set up\ny = 2;").unwrap();
        let processed = TokenPreprocessor::new().process(spans);

        assert!(processed.iter().all(|s| {
            !s.token.is_comment() && !s.token.is_whitespace() && !s.token.is_newline()
        }));
        assert_eq!(processed[0].token, Token::Identifier("x".to_string()));
        // Positions survive preprocessing.
        let y = processed
            .iter()
            .find(|s| s.token == Token::Identifier("y".to_string()))
            .unwrap();
        assert_eq!(y.line, 2);
        assert_eq!(y.column, 1);
    }
}

//! # Tokenizer Component
//!
//! Lexical analysis for the rule DSL: raw source text is transformed into a
//! stream of [`TokenSpan`](token::TokenSpan) objects carrying precise
//! (line, column) positions for error reporting.
//!
//! Whitespace, newlines and comments are preserved as tokens so that the
//! positions of the remaining tokens stay exact; the
//! [`preprocessor`](crate::preprocessor) removes them before parsing.
//!
//! ## Component Structure
//!
//! * [`token`]: Core token types and the tokenizer loop
//! * [`keyword`]: Keyword folding (case-insensitive)
//! * [`symbol`]: Operators and delimiters
//! * [`literal`]: String and number literals
//! * [`whitespace`]: Whitespace and newline handling
//! * [`comment`]: `//` line comments
//!
//! ## Pipeline Position
//!
//! ```text
//! Source Code → Tokenizer → Preprocessor → Parser → Executor
//! ```

pub mod comment;
pub mod keyword;
pub mod literal;
pub mod symbol;
pub mod token;
pub mod whitespace;

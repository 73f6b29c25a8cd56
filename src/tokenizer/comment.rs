use nom::{
    bytes::complete::{tag, take_while},
    combinator::map,
    error::context,
    sequence::preceded,
};

use super::token::{ParserResult, Token};

/// Line comments run from `//` to the end of the line; the newline itself
/// stays in the stream so line counting is unaffected.
pub fn parse_comment(input: &str) -> ParserResult<Token> {
    context(
        "comment",
        map(
            preceded(tag("//"), take_while(|c: char| c != '\n')),
            |content: &str| Token::Comment(content.to_string()),
        ),
    )(input)
}

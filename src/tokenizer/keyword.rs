/// Reserved words of the rule DSL. Keyword matching is case-insensitive:
/// `WHEN`, `when` and `When` all fold to [`Keyword::When`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, strum::EnumString, strum::Display, strum::EnumIter,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Keyword {
    When,
    Where,
    Then,
    End,
    If,
    Else,
    Foreach,
    In,
    Break,
    Continue,
    True,
    False,
    Null,
    And,
    Or,
    Not,
    Contains,
    Startswith,
    Endswith,
}

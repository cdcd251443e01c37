use logos::Logos;
use std::convert::Infallible;

#[derive(Debug, PartialEq, Clone, Default)]
pub enum LexingError {
    IntegerOutOfRange,
    #[default]
    Other,
}

impl From<std::num::ParseIntError> for LexingError {
    fn from(_: std::num::ParseIntError) -> Self {
        LexingError::IntegerOutOfRange
    }
}

impl From<Infallible> for LexingError {
    fn from(_: Infallible) -> Self {
        LexingError::Other
    }
}

/// One whitespace-separated word of a program.
#[derive(Logos, Debug, PartialEq, Eq, Clone)]
#[logos(error = LexingError, skip r"[ \t\r\n\f]+")]
pub enum Token {
    #[token("drop")]
    Drop,
    #[token("dup")]
    Dup,
    #[token("swap")]
    Swap,
    #[token("rot")]
    Rot,
    #[token("over")]
    Over,
    #[token("flip")]
    Flip,
    #[token("++")]
    Increment,
    #[token("--")]
    Decrement,
    #[token("+")]
    Add,
    #[token("-")]
    Sub,
    #[token("*")]
    Mul,
    #[token("/")]
    Div,
    #[token(".")]
    Dump,
    #[token("break")]
    Break,
    #[token("if")]
    If,
    #[token("while")]
    While,
    #[token("else")]
    Else,
    #[token("do")]
    Do,
    #[token("end")]
    End,
    #[token("function")]
    Function,
    #[token("return")]
    Return,
    #[token("call")]
    Call,

    #[token("==")]
    Eq,
    #[token("!=")]
    Neq,
    #[token(">")]
    Gt,
    #[token("<")]
    Lt,
    #[token(">=")]
    Geq,
    #[token("<=")]
    Leq,

    #[regex(r"-?[0-9]+", |lex| lex.slice().parse::<i64>(), priority = 3)]
    Integer(i64),

    /// Anything else: a function name, or garbage outside of `call`/`function`.
    #[regex(r"[^ \t\r\n\f]+", |lex| lex.slice().to_string(), priority = 1)]
    Word(String),
}

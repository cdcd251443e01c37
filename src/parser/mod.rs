//! Turns program text into a validated [`Program`].
//!
//! Source is a sequence of whitespace-separated words. Every word becomes one instruction,
//! except `call <name>` and `function <name> <arity>` which take their operands from the words
//! that follow them.

use logos::Logos;
use thiserror::Error;

use crate::{
    errors::StructuralError,
    ir::{Instruction, Program, Relation},
};
use tokens::{LexingError, Token};

pub mod tokens;

/// Front-end errors. Positions are word indexes in the source, except for
/// [`ParseError::Structural`] which points into the instruction stream.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("unknown token {word:?} at word {index}")]
    UnknownToken { word: String, index: usize },
    #[error("`{keyword}` at word {index} must be followed by a name")]
    MissingName { keyword: &'static str, index: usize },
    #[error("invalid arity {word:?} at word {index}")]
    InvalidArity { word: String, index: usize },
    #[error("integer {word:?} at word {index} does not fit in 64 bits")]
    IntegerOutOfRange { word: String, index: usize },
    #[error(transparent)]
    Structural(#[from] StructuralError),
}

/// A lexed word: the token (or why it failed to lex) and its raw text.
type Word<'src> = (Result<Token, LexingError>, &'src str);

/// Lexes and validates a whole program.
pub fn parse_program(source: &str) -> Result<Program, ParseError> {
    let words: Vec<Word> = Token::lexer(source)
        .spanned()
        .map(|(token, span)| (token, &source[span]))
        .collect();
    tracing::debug!("lexed {} words", words.len());

    let instructions = parse_instructions(&words)?;
    Ok(Program::new(instructions)?)
}

fn parse_instructions(words: &[Word]) -> Result<Vec<Instruction>, ParseError> {
    let mut instructions = Vec::with_capacity(words.len());
    let mut index = 0;

    while index < words.len() {
        let (token, word) = &words[index];
        let token = match token {
            Ok(token) => token,
            Err(LexingError::IntegerOutOfRange) => {
                return Err(ParseError::IntegerOutOfRange {
                    word: word.to_string(),
                    index,
                });
            }
            Err(LexingError::Other) => {
                return Err(ParseError::UnknownToken {
                    word: word.to_string(),
                    index,
                });
            }
        };

        let instruction = match token {
            Token::Integer(value) => Instruction::Push(*value),
            Token::Drop => Instruction::Drop,
            Token::Dup => Instruction::Dup,
            Token::Swap => Instruction::Swap,
            Token::Rot => Instruction::Rot,
            Token::Over => Instruction::Over,
            Token::Flip => Instruction::Flip,
            Token::Increment => Instruction::Increment,
            Token::Decrement => Instruction::Decrement,
            Token::Add => Instruction::Add,
            Token::Sub => Instruction::Sub,
            Token::Mul => Instruction::Mul,
            Token::Div => Instruction::Div,
            Token::Dump => Instruction::Dump,
            Token::Break => Instruction::Break,
            Token::If => Instruction::If,
            Token::While => Instruction::While,
            Token::Else => Instruction::Else,
            Token::Do => Instruction::Do,
            Token::End => Instruction::End,
            Token::Return => Instruction::Return,
            Token::Eq => Instruction::Relation(Relation::Eq),
            Token::Neq => Instruction::Relation(Relation::Neq),
            Token::Gt => Instruction::Relation(Relation::Gt),
            Token::Lt => Instruction::Relation(Relation::Lt),
            Token::Geq => Instruction::Relation(Relation::Geq),
            Token::Leq => Instruction::Relation(Relation::Leq),
            Token::Call => {
                let name = name_after(words, index, "call")?;
                index += 1;
                Instruction::Call(name)
            }
            Token::Function => {
                let name = name_after(words, index, "function")?;
                let arity = match words.get(index + 2) {
                    Some((Ok(Token::Integer(arity)), word)) => {
                        usize::try_from(*arity).map_err(|_| ParseError::InvalidArity {
                            word: word.to_string(),
                            index: index + 2,
                        })?
                    }
                    Some((_, word)) => {
                        return Err(ParseError::InvalidArity {
                            word: word.to_string(),
                            index: index + 2,
                        });
                    }
                    None => {
                        return Err(ParseError::InvalidArity {
                            word: String::new(),
                            index: index + 2,
                        });
                    }
                };
                index += 2;
                Instruction::Function { name, arity }
            }
            Token::Word(word) => {
                return Err(ParseError::UnknownToken {
                    word: word.clone(),
                    index,
                });
            }
        };

        instructions.push(instruction);
        index += 1;
    }

    Ok(instructions)
}

/// The raw word following `keyword`; any word is accepted as a name.
fn name_after(words: &[Word], index: usize, keyword: &'static str) -> Result<String, ParseError> {
    words
        .get(index + 1)
        .map(|(_, word)| word.to_string())
        .ok_or(ParseError::MissingName { keyword, index })
}

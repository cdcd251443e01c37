use std::{collections::HashMap, fmt};

use crate::errors::{SlangError, StructuralError};

mod block;
mod relation;

pub use block::{Block, extract_block};
pub use relation::Relation;

/// A single opcode of the language.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Instruction {
    Push(i64),
    Drop,
    Dup,
    Swap,
    Rot,
    Over,
    Flip,
    Increment,
    Decrement,
    Add,
    Sub,
    Mul,
    Div,
    Dump,
    Break,
    /// Only valid directly after `if` or `while`.
    Relation(Relation),
    If,
    While,
    Function {
        name: String,
        arity: usize,
    },
    Do,
    End,
    Return,
    /// Reserved, neither backend implements it.
    Else,
    Call(String),
}

impl Instruction {
    /// Whether this instruction owns a body closed by a matching `end`.
    pub fn opens_block(&self) -> bool {
        matches!(
            self,
            Instruction::If | Instruction::While | Instruction::Function { .. }
        )
    }

    /// Index of the first body instruction, relative to the opener.
    ///
    /// `if`/`while` are followed by a relation and `do`; a function header carries its name
    /// and arity inline and is only followed by `do`.
    pub fn body_offset(&self) -> Option<usize> {
        match self {
            Instruction::If | Instruction::While => Some(3),
            Instruction::Function { .. } => Some(2),
            _ => None,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Push(value) => write!(f, "{value}"),
            Instruction::Drop => f.write_str("drop"),
            Instruction::Dup => f.write_str("dup"),
            Instruction::Swap => f.write_str("swap"),
            Instruction::Rot => f.write_str("rot"),
            Instruction::Over => f.write_str("over"),
            Instruction::Flip => f.write_str("flip"),
            Instruction::Increment => f.write_str("++"),
            Instruction::Decrement => f.write_str("--"),
            Instruction::Add => f.write_str("+"),
            Instruction::Sub => f.write_str("-"),
            Instruction::Mul => f.write_str("*"),
            Instruction::Div => f.write_str("/"),
            Instruction::Dump => f.write_str("."),
            Instruction::Break => f.write_str("break"),
            Instruction::Relation(relation) => write!(f, "{relation}"),
            Instruction::If => f.write_str("if"),
            Instruction::While => f.write_str("while"),
            Instruction::Function { name, arity } => write!(f, "function {name} {arity}"),
            Instruction::Do => f.write_str("do"),
            Instruction::End => f.write_str("end"),
            Instruction::Return => f.write_str("return"),
            Instruction::Else => f.write_str("else"),
            Instruction::Call(name) => write!(f, "call {name}"),
        }
    }
}

/// A user function as recorded in a function table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FunctionDef {
    pub arity: usize,
    pub body: Block,
    /// Position of the defining `function` instruction.
    pub position: usize,
}

/// Function name to definition. Redefinition overwrites.
pub type FunctionTable = HashMap<String, FunctionDef>;

/// A whole program: a structurally valid instruction stream.
///
/// Built once and consumed, unchanged, by the interpreter and by the native backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    instructions: Vec<Instruction>,
}

impl Program {
    pub fn new(instructions: Vec<Instruction>) -> Result<Self, StructuralError> {
        let program = Self { instructions };
        program.validate()?;
        Ok(program)
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// The implicit top-level body.
    pub fn entry(&self) -> Block {
        Block::new(0, self.instructions.len())
    }

    /// Extracts the body of the opener at `position`, returning it with the index of its `end`.
    pub fn body_of(&self, position: usize) -> Result<(Block, usize), StructuralError> {
        let offset = self.instructions[position]
            .body_offset()
            .ok_or(StructuralError::UnexpectedDelimiter { position })?;
        extract_block(&self.instructions, position + offset).map_err(|error| match error {
            StructuralError::UnterminatedBlock { .. } => {
                StructuralError::UnterminatedBlock { position }
            }
            other => other,
        })
    }

    /// The relation in the header of the `if`/`while` at `position`.
    pub fn condition_of(&self, position: usize) -> Result<Relation, StructuralError> {
        match self.instructions.get(position + 1) {
            Some(Instruction::Relation(relation)) => Ok(*relation),
            _ => Err(StructuralError::MalformedCondition { position }),
        }
    }

    /// Fails with `StackOverflow` at the first `if`/`while` nested more than `max_depth` deep.
    ///
    /// Both backends walk nested bodies recursively, so they check this before running anything.
    pub fn check_nesting(&self, max_depth: usize) -> Result<(), SlangError> {
        let mut depth = 0usize;
        for (position, instruction) in self.instructions.iter().enumerate() {
            match instruction {
                Instruction::If | Instruction::While => {
                    depth += 1;
                    if depth > max_depth {
                        return Err(SlangError::StackOverflow { position });
                    }
                }
                // Function bodies open and close at depth zero.
                Instruction::End => depth = depth.saturating_sub(1),
                _ => {}
            }
        }
        Ok(())
    }

    /// One pass over the stream, pairing openers with their `end` through an explicit stack.
    fn validate(&self) -> Result<(), StructuralError> {
        let stream = &self.instructions;
        // Openers whose `end` is still ahead, innermost last.
        let mut open: Vec<usize> = Vec::new();
        let mut loops = 0usize;
        let mut in_function = false;
        let mut position = 0;

        while position < stream.len() {
            match &stream[position] {
                Instruction::If | Instruction::While => {
                    self.condition_of(position)?;
                    if stream.get(position + 2) != Some(&Instruction::Do) {
                        return Err(StructuralError::MalformedCondition { position });
                    }
                    if stream[position] == Instruction::While {
                        loops += 1;
                    }
                    open.push(position);
                    position += 3;
                    continue;
                }
                Instruction::Function { .. } => {
                    if !open.is_empty() {
                        return Err(StructuralError::NestedFunction { position });
                    }
                    if stream.get(position + 1) != Some(&Instruction::Do) {
                        return Err(StructuralError::MissingDo { position });
                    }
                    in_function = true;
                    open.push(position);
                    position += 2;
                    continue;
                }
                Instruction::End => {
                    let opener = open
                        .pop()
                        .ok_or(StructuralError::UnexpectedDelimiter { position })?;
                    match &stream[opener] {
                        Instruction::While => loops -= 1,
                        Instruction::Function { .. } => in_function = false,
                        _ => {}
                    }
                }
                Instruction::Relation(_) => {
                    return Err(StructuralError::MisplacedRelation { position });
                }
                Instruction::Do => {
                    return Err(StructuralError::UnexpectedDelimiter { position });
                }
                Instruction::Break if loops == 0 => {
                    return Err(StructuralError::BreakOutsideLoop { position });
                }
                Instruction::Return if !in_function => {
                    return Err(StructuralError::UnexpectedReturn { position });
                }
                Instruction::Else => {
                    return Err(StructuralError::UnsupportedFeature {
                        feature: "else",
                        position,
                    });
                }
                _ => {}
            }
            position += 1;
        }

        match open.first() {
            Some(&opener) => Err(StructuralError::UnterminatedBlock { position: opener }),
            None => Ok(()),
        }
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, instruction) in self.instructions.iter().enumerate() {
            if index > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{instruction}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn program(instructions: Vec<Instruction>) -> Result<Program, StructuralError> {
        Program::new(instructions)
    }

    #[test]
    fn accepts_nested_constructs() {
        let result = program(vec![
            Instruction::Function {
                name: "f".into(),
                arity: 1,
            },
            Instruction::Do,
            Instruction::Push(0),
            Instruction::While,
            Instruction::Relation(Relation::Lt),
            Instruction::Do,
            Instruction::If,
            Instruction::Relation(Relation::Eq),
            Instruction::Do,
            Instruction::Break,
            Instruction::End,
            Instruction::Increment,
            Instruction::End,
            Instruction::Return,
            Instruction::End,
            Instruction::Push(3),
            Instruction::Call("f".into()),
            Instruction::Dump,
        ]);

        let program = result.unwrap();
        let (body, end) = program.body_of(0).unwrap();
        assert_eq!((body, end), (Block::new(2, 14), 14));
        assert_eq!(program.condition_of(3).unwrap(), Relation::Lt);
    }

    #[test]
    fn rejects_header_without_relation() {
        let error = program(vec![
            Instruction::Push(1),
            Instruction::If,
            Instruction::Do,
            Instruction::End,
        ])
        .unwrap_err();
        assert_eq!(error, StructuralError::MalformedCondition { position: 1 });
    }

    #[test]
    fn rejects_function_without_do() {
        let error = program(vec![
            Instruction::Function {
                name: "f".into(),
                arity: 0,
            },
            Instruction::Push(1),
            Instruction::End,
        ])
        .unwrap_err();
        assert_eq!(error, StructuralError::MissingDo { position: 0 });
    }

    #[test]
    fn rejects_stray_delimiters_and_relations() {
        assert_eq!(
            program(vec![Instruction::Push(1), Instruction::End]).unwrap_err(),
            StructuralError::UnexpectedDelimiter { position: 1 }
        );
        assert_eq!(
            program(vec![Instruction::Relation(Relation::Gt)]).unwrap_err(),
            StructuralError::MisplacedRelation { position: 0 }
        );
    }

    #[test]
    fn rejects_unterminated_while() {
        let error = program(vec![
            Instruction::While,
            Instruction::Relation(Relation::Neq),
            Instruction::Do,
            Instruction::Decrement,
        ])
        .unwrap_err();
        assert_eq!(error, StructuralError::UnterminatedBlock { position: 0 });
    }

    #[test]
    fn break_must_be_inside_a_loop_of_the_same_function() {
        assert_eq!(
            program(vec![Instruction::Break]).unwrap_err(),
            StructuralError::BreakOutsideLoop { position: 0 }
        );

        let error = program(vec![
            Instruction::If,
            Instruction::Relation(Relation::Eq),
            Instruction::Do,
            Instruction::Break,
            Instruction::End,
        ])
        .unwrap_err();
        assert_eq!(error, StructuralError::BreakOutsideLoop { position: 3 });
    }

    #[test]
    fn functions_only_at_top_level() {
        let error = program(vec![
            Instruction::Function {
                name: "outer".into(),
                arity: 0,
            },
            Instruction::Do,
            Instruction::Function {
                name: "inner".into(),
                arity: 0,
            },
            Instruction::Do,
            Instruction::End,
            Instruction::End,
        ])
        .unwrap_err();
        assert_eq!(error, StructuralError::NestedFunction { position: 2 });
    }

    #[test]
    fn untaken_branches_are_still_checked() {
        // 0 1 if == do return end 5
        let error = program(vec![
            Instruction::Push(0),
            Instruction::Push(1),
            Instruction::If,
            Instruction::Relation(Relation::Eq),
            Instruction::Do,
            Instruction::Return,
            Instruction::End,
            Instruction::Push(5),
        ])
        .unwrap_err();
        assert_eq!(error, StructuralError::UnexpectedReturn { position: 5 });

        // 0 1 if == do else end 5
        let error = program(vec![
            Instruction::Push(0),
            Instruction::Push(1),
            Instruction::If,
            Instruction::Relation(Relation::Eq),
            Instruction::Do,
            Instruction::Else,
            Instruction::End,
            Instruction::Push(5),
        ])
        .unwrap_err();
        assert_eq!(
            error,
            StructuralError::UnsupportedFeature {
                feature: "else",
                position: 5
            }
        );
    }

    #[test]
    fn return_is_scoped_to_the_function_body() {
        let result = program(vec![
            Instruction::Function {
                name: "f".into(),
                arity: 0,
            },
            Instruction::Do,
            Instruction::Push(1),
            Instruction::Push(1),
            Instruction::If,
            Instruction::Relation(Relation::Eq),
            Instruction::Do,
            Instruction::Return,
            Instruction::End,
            Instruction::End,
            Instruction::Return,
        ]);
        assert_eq!(
            result.unwrap_err(),
            StructuralError::UnexpectedReturn { position: 10 }
        );
    }

    #[test]
    fn functions_are_not_allowed_inside_top_level_blocks() {
        let error = program(vec![
            Instruction::Push(1),
            Instruction::Push(1),
            Instruction::If,
            Instruction::Relation(Relation::Eq),
            Instruction::Do,
            Instruction::Function {
                name: "f".into(),
                arity: 0,
            },
            Instruction::Do,
            Instruction::End,
            Instruction::End,
        ])
        .unwrap_err();
        assert_eq!(error, StructuralError::NestedFunction { position: 5 });
    }

    /// `1 1` followed by `levels` nested `if == do` and as many `end`s.
    fn nested_ifs(levels: usize) -> Vec<Instruction> {
        let mut instructions = vec![Instruction::Push(1), Instruction::Push(1)];
        for _ in 0..levels {
            instructions.extend([
                Instruction::If,
                Instruction::Relation(Relation::Eq),
                Instruction::Do,
            ]);
        }
        instructions.extend(std::iter::repeat_n(Instruction::End, levels));
        instructions.push(Instruction::Dump);
        instructions
    }

    #[test]
    fn very_deep_nesting_validates_without_recursion() {
        let program = program(nested_ifs(100_000)).unwrap();

        // The 65th `if` starts at 2 + 64 * 3.
        assert_eq!(
            program.check_nesting(64).unwrap_err(),
            SlangError::StackOverflow { position: 194 }
        );
        assert!(program.check_nesting(100_000).is_ok());
    }

    #[test]
    fn nesting_depth_ignores_functions_and_siblings() {
        let mut instructions = vec![
            Instruction::Function {
                name: "f".into(),
                arity: 0,
            },
            Instruction::Do,
        ];
        instructions.extend(nested_ifs(2));
        instructions.push(Instruction::End);
        instructions.extend(nested_ifs(2));

        let program = program(instructions).unwrap();
        assert!(program.check_nesting(2).is_ok());
        assert!(program.check_nesting(1).is_err());
    }
}

//! Tree-walking interpreter.
//!
//! Bodies are executed by recursing into the blocks recovered with [`extract_block`]. Recursion
//! through function calls is bounded by [`Limits::max_call_depth`] and `if`/`while` nesting by
//! [`Limits::max_nesting_depth`], checked once before the run starts.
//!
//! [`extract_block`]: crate::ir::extract_block

use std::io::Write;

use tracing::{debug, trace};

use crate::{
    errors::{SlangError, StructuralError},
    ir::{Block, FunctionDef, FunctionTable, Instruction, Program, Relation},
    session::Limits,
};

pub use stack::Stack;

mod stack;

/// The complete state of one virtual machine.
///
/// A `Vm` is owned by its caller; two machines never share anything, so a fault in one run
/// leaves nothing behind for the next one.
#[derive(Debug, Clone)]
pub struct Vm {
    /// The top-level operand stack.
    pub stack: Stack,
    pub functions: FunctionTable,
    limits: Limits,
    call_depth: usize,
}

impl Default for Vm {
    fn default() -> Self {
        Self::new(Limits::default())
    }
}

/// How a block finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Next,
    Break,
    Return(i64),
}

/// One activation: the top level or a function call.
#[derive(Debug)]
struct Frame {
    stack: Stack,
    in_function: bool,
}

impl Vm {
    pub fn new(limits: Limits) -> Self {
        Self {
            stack: Stack::new(limits.stack_capacity),
            functions: FunctionTable::new(),
            limits,
            call_depth: 0,
        }
    }

    /// Runs `program` to completion against this machine, writing `dump` output to `out`.
    ///
    /// The top-level stack is kept in `self.stack` even when the run fails.
    pub fn run(&mut self, program: &Program, out: &mut dyn Write) -> Result<(), SlangError> {
        program.check_nesting(self.limits.max_nesting_depth)?;

        let stack = std::mem::replace(&mut self.stack, Stack::new(self.limits.stack_capacity));
        let mut frame = Frame {
            stack,
            in_function: false,
        };
        self.call_depth = 0;

        let result = self.exec_block(program, program.entry(), &mut frame, out);
        self.stack = frame.stack;

        let flow = result?;
        debug!(?flow, depth = self.stack.len(), "program finished");
        Ok(())
    }

    fn exec_block(
        &mut self,
        program: &Program,
        block: Block,
        frame: &mut Frame,
        out: &mut dyn Write,
    ) -> Result<Flow, SlangError> {
        let stream = program.instructions();
        let mut position = block.start;

        while position < block.end {
            let stack = &mut frame.stack;

            match &stream[position] {
                Instruction::Push(value) => stack.push(*value, position)?,
                Instruction::Drop => {
                    stack.pop(position)?;
                }
                Instruction::Dup => {
                    let top = stack.peek(1, position)?;
                    stack.push(top, position)?;
                }
                Instruction::Swap => {
                    let a = stack.pop(position)?;
                    let b = stack.pop(position)?;
                    stack.push(a, position)?;
                    stack.push(b, position)?;
                }
                Instruction::Rot => {
                    let a = stack.pop(position)?;
                    let b = stack.pop(position)?;
                    let c = stack.pop(position)?;
                    stack.push(a, position)?;
                    stack.push(c, position)?;
                    stack.push(b, position)?;
                }
                Instruction::Over => {
                    let second = stack.peek(2, position)?;
                    stack.push(second, position)?;
                }
                Instruction::Flip => stack.flip(position)?,
                Instruction::Increment => {
                    let value = stack.pop(position)?;
                    stack.push(value.wrapping_add(1), position)?;
                }
                Instruction::Decrement => {
                    let value = stack.pop(position)?;
                    stack.push(value.wrapping_sub(1), position)?;
                }
                Instruction::Add | Instruction::Sub | Instruction::Mul | Instruction::Div => {
                    let a = stack.pop(position)?;
                    let b = stack.pop(position)?;
                    let result = arithmetic(&stream[position], a, b, position)?;
                    stack.push(result, position)?;
                }
                Instruction::Dump => {
                    let top = stack.peek(1, position)?;
                    writeln!(out, "{top}").map_err(|error| SlangError::Output(error.to_string()))?;
                }
                Instruction::Break => return Ok(Flow::Break),
                Instruction::Return => {
                    if !frame.in_function {
                        return Err(StructuralError::UnexpectedReturn { position }.into());
                    }
                    return Ok(Flow::Return(stack.pop(position)?));
                }
                Instruction::Else => {
                    return Err(StructuralError::UnsupportedFeature {
                        feature: "else",
                        position,
                    }
                    .into());
                }
                Instruction::Function { name, arity } => {
                    let (body, end) = program.body_of(position)?;
                    // Its arguments could never fit in the callee's stack.
                    if *arity > self.limits.stack_capacity {
                        return Err(SlangError::StackOverflow { position });
                    }
                    debug!(name, arity, "defining function");
                    self.functions.insert(
                        name.clone(),
                        FunctionDef {
                            arity: *arity,
                            body,
                            position,
                        },
                    );
                    position = end + 1;
                    continue;
                }
                Instruction::Call(name) => {
                    let result = self.call(program, name, position, &mut frame.stack, out)?;
                    frame.stack.push(result, position)?;
                }
                Instruction::If => {
                    let relation = program.condition_of(position)?;
                    let (body, end) = program.body_of(position)?;
                    if test(relation, &frame.stack, position + 1)? {
                        let flow = self.exec_block(program, body, frame, out)?;
                        if flow != Flow::Next {
                            return Ok(flow);
                        }
                    }
                    position = end + 1;
                    continue;
                }
                Instruction::While => {
                    let relation = program.condition_of(position)?;
                    let (body, end) = program.body_of(position)?;
                    while test(relation, &frame.stack, position + 1)? {
                        match self.exec_block(program, body, frame, out)? {
                            Flow::Next => {}
                            Flow::Break => break,
                            Flow::Return(value) => return Ok(Flow::Return(value)),
                        }
                    }
                    position = end + 1;
                    continue;
                }
                Instruction::Relation(_) => {
                    return Err(StructuralError::MisplacedRelation { position }.into());
                }
                Instruction::Do | Instruction::End => {
                    return Err(StructuralError::UnexpectedDelimiter { position }.into());
                }
            }

            position += 1;
        }

        Ok(Flow::Next)
    }

    /// Calls `name` with arguments taken from `caller`, returning the single result.
    fn call(
        &mut self,
        program: &Program,
        name: &str,
        position: usize,
        caller: &mut Stack,
        out: &mut dyn Write,
    ) -> Result<i64, SlangError> {
        let function = *self
            .functions
            .get(name)
            .ok_or_else(|| SlangError::UndefinedFunction {
                name: name.to_string(),
                position,
            })?;

        // Popped topmost first; the deepest argument becomes the callee's first slot.
        let mut args = Vec::new();
        for _ in 0..function.arity {
            args.push(caller.pop(position)?);
        }
        args.reverse();

        if self.call_depth >= self.limits.max_call_depth {
            return Err(SlangError::StackOverflow { position });
        }

        trace!(name, ?args, depth = self.call_depth, "calling function");
        let mut frame = Frame {
            stack: Stack::with_values(args, self.limits.stack_capacity, function.position)?,
            in_function: true,
        };

        self.call_depth += 1;
        let flow = self.exec_block(program, function.body, &mut frame, out);
        self.call_depth -= 1;

        match flow? {
            Flow::Return(value) => Ok(value),
            Flow::Next | Flow::Break => Ok(0),
        }
    }
}

/// Evaluates a header relation; the relation tag itself sits at `position`.
fn test(relation: Relation, stack: &Stack, position: usize) -> Result<bool, SlangError> {
    let top = stack.peek(1, position)?;
    let second = stack.peek(2, position)?;
    Ok(relation.evaluate(top, second))
}

/// `a` is the first value popped (the old top), `b` the second.
fn arithmetic(
    instruction: &Instruction,
    a: i64,
    b: i64,
    position: usize,
) -> Result<i64, SlangError> {
    Ok(match instruction {
        Instruction::Add => a.wrapping_add(b),
        Instruction::Sub => a.wrapping_sub(b),
        Instruction::Mul => a.wrapping_mul(b),
        Instruction::Div => {
            if b == 0 {
                return Err(SlangError::DivisionByZero { position });
            }
            a.wrapping_div(b)
        }
        _ => unreachable!("not an arithmetic instruction: {instruction}"),
    })
}

use std::collections::HashMap;

use itertools::Itertools;
use tracing::{debug, info};

use crate::{
    errors::{Fault, SlangError, StructuralError},
    ir::{Block, Instruction, Program},
    session::{Limits, Session},
};

use super::module::{
    BasicBlock, BinOp, Function, FunctionKind, Inst, Module, Operand, Terminator,
};

/// Global lowering state: one slot per callable name and the finished functions.
struct Compiler<'a> {
    program: &'a Program,
    limits: Limits,
    slots: HashMap<String, usize>,
    functions: Vec<Function>,
}

/// Lowering state of a single function.
struct FunctionBuilder {
    symbol: String,
    kind: FunctionKind,
    blocks: Vec<BasicBlock>,
    label: String,
    insts: Vec<Inst>,
    next_value: usize,
    next_label: usize,
    /// `while.end` labels of the enclosing loops, innermost last.
    loop_exits: Vec<String>,
}

impl FunctionBuilder {
    fn new(symbol: String, kind: FunctionKind) -> Self {
        Self {
            symbol,
            kind,
            blocks: Vec::new(),
            label: "entry".to_string(),
            insts: Vec::new(),
            next_value: 0,
            next_label: 0,
            loop_exits: Vec::new(),
        }
    }

    fn value(&mut self) -> usize {
        let id = self.next_value;
        self.next_value += 1;
        id
    }

    fn label(&mut self, prefix: &str) -> String {
        let label = format!("{prefix}.{}", self.next_label);
        self.next_label += 1;
        label
    }

    fn emit(&mut self, inst: Inst) {
        self.insts.push(inst);
    }

    /// Closes the current block with `terminator` and continues in a new block named `next`.
    fn terminate(&mut self, terminator: Terminator, next: String) {
        let label = std::mem::replace(&mut self.label, next);
        self.blocks.push(BasicBlock {
            label,
            insts: std::mem::take(&mut self.insts),
            terminator,
        });
    }

    fn pop(&mut self, position: usize) -> Operand {
        let dest = self.value();
        self.emit(Inst::Pop { dest, position });
        Operand::Value(dest)
    }

    fn peek(&mut self, depth: usize, position: usize) -> Operand {
        let dest = self.value();
        self.emit(Inst::Peek {
            dest,
            depth,
            position,
        });
        Operand::Value(dest)
    }

    fn push(&mut self, value: Operand, position: usize) {
        self.emit(Inst::Push { value, position });
    }

    fn binary(&mut self, op: BinOp, lhs: Operand, rhs: Operand) -> Operand {
        let dest = self.value();
        self.emit(Inst::Binary { dest, op, lhs, rhs });
        Operand::Value(dest)
    }

    fn finish(mut self, terminator: Terminator) -> Function {
        let next = self.label("unreachable");
        self.terminate(terminator, next);
        Function {
            symbol: self.symbol,
            kind: self.kind,
            blocks: self.blocks,
        }
    }
}

/// Lowers the whole program into a module.
pub(crate) fn compile_program(session: &Session, program: &Program) -> Result<Module, SlangError> {
    info!("compiling program");
    program.check_nesting(session.limits.max_nesting_depth)?;

    let mut compiler = Compiler {
        program,
        limits: session.limits,
        slots: HashMap::new(),
        functions: Vec::new(),
    };

    let mut main = FunctionBuilder::new("main".to_string(), FunctionKind::Entry);
    compiler.lower_block(&mut main, program.entry())?;
    let main = main.finish(Terminator::Exit);

    let slots = compiler
        .slots
        .into_iter()
        .sorted_by_key(|(_, slot)| *slot)
        .map(|(name, _)| name)
        .collect();

    Ok(Module {
        limits: session.limits,
        slots,
        functions: compiler.functions,
        main,
    })
}

impl Compiler<'_> {
    /// The slot bound to `name`, allocated on first use.
    fn slot(&mut self, name: &str) -> usize {
        let next = self.slots.len();
        *self.slots.entry(name.to_string()).or_insert(next)
    }

    fn lower_block(&mut self, fb: &mut FunctionBuilder, block: Block) -> Result<(), SlangError> {
        let program = self.program;
        let stream = program.instructions();
        let mut position = block.start;

        while position < block.end {
            match &stream[position] {
                Instruction::Push(value) => fb.push(Operand::Const(*value), position),
                Instruction::Drop => {
                    fb.pop(position);
                }
                Instruction::Dup => {
                    let top = fb.peek(1, position);
                    fb.push(top, position);
                }
                Instruction::Swap => {
                    let a = fb.pop(position);
                    let b = fb.pop(position);
                    fb.push(a, position);
                    fb.push(b, position);
                }
                Instruction::Rot => {
                    let a = fb.pop(position);
                    let b = fb.pop(position);
                    let c = fb.pop(position);
                    fb.push(a, position);
                    fb.push(c, position);
                    fb.push(b, position);
                }
                Instruction::Over => {
                    let second = fb.peek(2, position);
                    fb.push(second, position);
                }
                Instruction::Flip => fb.emit(Inst::Flip { position }),
                Instruction::Increment | Instruction::Decrement => {
                    let value = fb.pop(position);
                    let op = if stream[position] == Instruction::Increment {
                        BinOp::Add
                    } else {
                        BinOp::Sub
                    };
                    let result = fb.binary(op, value, Operand::Const(1));
                    fb.push(result, position);
                }
                Instruction::Add | Instruction::Sub | Instruction::Mul => {
                    let a = fb.pop(position);
                    let b = fb.pop(position);
                    let op = match stream[position] {
                        Instruction::Add => BinOp::Add,
                        Instruction::Sub => BinOp::Sub,
                        _ => BinOp::Mul,
                    };
                    let result = fb.binary(op, a, b);
                    fb.push(result, position);
                }
                Instruction::Div => {
                    let a = fb.pop(position);
                    let b = fb.pop(position);
                    let dest = fb.value();
                    fb.emit(Inst::Div {
                        dest,
                        lhs: a,
                        rhs: b,
                        position,
                    });
                    fb.push(Operand::Value(dest), position);
                }
                Instruction::Dump => {
                    let value = fb.peek(1, position);
                    fb.emit(Inst::Dump { value });
                }
                Instruction::Break => {
                    let exit = fb
                        .loop_exits
                        .last()
                        .cloned()
                        .ok_or(StructuralError::BreakOutsideLoop { position })?;
                    let dead = fb.label("after.break");
                    fb.terminate(Terminator::Jump(exit), dead);
                }
                Instruction::Return => {
                    if fb.kind == FunctionKind::Entry {
                        return Err(StructuralError::UnexpectedReturn { position }.into());
                    }
                    let value = fb.pop(position);
                    let dead = fb.label("after.return");
                    fb.terminate(Terminator::Return(value), dead);
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
                    if *arity > self.limits.stack_capacity {
                        // Reaching the definition faults, so the body is never callable.
                        fb.emit(Inst::Fault {
                            fault: Fault::StackOverflow,
                            position,
                        });
                        let dead = fb.label("after.fault");
                        fb.terminate(Terminator::Unreachable, dead);
                    } else {
                        let slot = self.slot(name);
                        let symbol = self.lower_function(name, *arity, body, position)?;
                        fb.emit(Inst::Define { slot, symbol });
                    }
                    position = end + 1;
                    continue;
                }
                Instruction::Call(name) => {
                    let slot = self.slot(name);
                    let dest = fb.value();
                    fb.emit(Inst::Call {
                        dest,
                        slot,
                        position,
                    });
                    fb.push(Operand::Value(dest), position);
                }
                Instruction::If => {
                    let (body, end) = program.body_of(position)?;
                    let condition = self.lower_condition(fb, position)?;
                    let then = fb.label("if.then");
                    let after = fb.label("if.end");
                    fb.terminate(
                        Terminator::Branch {
                            condition,
                            then: then.clone(),
                            otherwise: after.clone(),
                        },
                        then,
                    );
                    self.lower_block(fb, body)?;
                    fb.terminate(Terminator::Jump(after.clone()), after);
                    position = end + 1;
                    continue;
                }
                Instruction::While => {
                    let (body, end) = program.body_of(position)?;
                    let check = fb.label("while.cond");
                    let looped = fb.label("while.body");
                    let after = fb.label("while.end");

                    fb.terminate(Terminator::Jump(check.clone()), check.clone());
                    let condition = self.lower_condition(fb, position)?;
                    fb.terminate(
                        Terminator::Branch {
                            condition,
                            then: looped.clone(),
                            otherwise: after.clone(),
                        },
                        looped,
                    );

                    fb.loop_exits.push(after.clone());
                    self.lower_block(fb, body)?;
                    fb.loop_exits.pop();

                    fb.terminate(Terminator::Jump(check), after);
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

        Ok(())
    }

    /// Emits the non-destructive test of the `if`/`while` header at `position`.
    fn lower_condition(
        &mut self,
        fb: &mut FunctionBuilder,
        position: usize,
    ) -> Result<usize, SlangError> {
        let relation = self.program.condition_of(position)?;
        let top = fb.peek(1, position + 1);
        let second = fb.peek(2, position + 1);
        let dest = fb.value();
        fb.emit(Inst::Compare {
            dest,
            relation,
            lhs: top,
            rhs: second,
        });
        Ok(dest)
    }

    /// Lowers one definition into its own symbol and returns it.
    fn lower_function(
        &mut self,
        name: &str,
        arity: usize,
        body: Block,
        position: usize,
    ) -> Result<String, SlangError> {
        let symbol = format!("slang.fn.{}", self.functions.len());
        debug!(name, arity, symbol, "lowering function");

        let mut fb = FunctionBuilder::new(symbol.clone(), FunctionKind::User);

        // Popped topmost first; the deepest argument becomes the first slot.
        let mut args: Vec<Operand> = (0..arity)
            .map(|_| {
                let dest = fb.value();
                fb.emit(Inst::Arg { dest });
                Operand::Value(dest)
            })
            .collect();
        args.reverse();
        fb.emit(Inst::Enter);
        for arg in args {
            fb.push(arg, position);
        }

        self.lower_block(&mut fb, body)?;
        let function = fb.finish(Terminator::Return(Operand::Const(0)));
        self.functions.push(function);
        Ok(symbol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Relation;

    fn compile(instructions: Vec<Instruction>) -> Result<Module, SlangError> {
        let program = Program::new(instructions).unwrap();
        compile_program(&Session::new("a.out".into()), &program)
    }

    fn function(name: &str, arity: usize) -> Instruction {
        Instruction::Function {
            name: name.to_string(),
            arity,
        }
    }

    #[test]
    fn straight_line_code_stays_in_entry() {
        let module = compile(vec![
            Instruction::Push(3),
            Instruction::Push(4),
            Instruction::Sub,
            Instruction::Dump,
        ])
        .unwrap();

        let entry = &module.main.blocks[0];
        assert_eq!(entry.label, "entry");
        assert_eq!(entry.terminator, Terminator::Exit);
        assert_eq!(
            entry.insts[4],
            Inst::Binary {
                dest: 2,
                op: BinOp::Sub,
                lhs: Operand::Value(0),
                rhs: Operand::Value(1),
            }
        );
        assert!(module.functions.is_empty());
    }

    #[test]
    fn while_has_three_regions() {
        // 0 3 while > do . -- end
        let module = compile(vec![
            Instruction::Push(0),
            Instruction::Push(3),
            Instruction::While,
            Instruction::Relation(Relation::Gt),
            Instruction::Do,
            Instruction::Dump,
            Instruction::Decrement,
            Instruction::End,
        ])
        .unwrap();

        let main = &module.main;
        assert_eq!(
            main.labels().collect::<Vec<_>>(),
            ["entry", "while.cond.0", "while.body.1", "while.end.2"]
        );
        assert_eq!(
            main.blocks[0].terminator,
            Terminator::Jump("while.cond.0".into())
        );
        assert_eq!(
            main.blocks[1].terminator.successors(),
            ["while.body.1", "while.end.2"]
        );
        assert_eq!(
            main.blocks[2].terminator,
            Terminator::Jump("while.cond.0".into())
        );
        assert_eq!(main.blocks[3].terminator, Terminator::Exit);
    }

    #[test]
    fn break_jumps_to_the_loop_exit() {
        // 1 1 while == do break 5 end
        let module = compile(vec![
            Instruction::Push(1),
            Instruction::Push(1),
            Instruction::While,
            Instruction::Relation(Relation::Eq),
            Instruction::Do,
            Instruction::Break,
            Instruction::Push(5),
            Instruction::End,
        ])
        .unwrap();

        let main = &module.main;
        let body = main.block("while.body.1").unwrap();
        assert!(body.insts.is_empty());
        assert_eq!(body.terminator, Terminator::Jump("while.end.2".into()));

        let dead = main.block("after.break.3").unwrap();
        assert_eq!(dead.insts.len(), 1);
        assert_eq!(dead.terminator, Terminator::Jump("while.cond.0".into()));
    }

    #[test]
    fn if_branches_over_its_body() {
        let module = compile(vec![
            Instruction::Push(1),
            Instruction::Push(1),
            Instruction::If,
            Instruction::Relation(Relation::Eq),
            Instruction::Do,
            Instruction::Dump,
            Instruction::End,
        ])
        .unwrap();

        let main = &module.main;
        assert_eq!(
            main.blocks[0].terminator,
            Terminator::Branch {
                condition: 2,
                then: "if.then.0".into(),
                otherwise: "if.end.1".into(),
            }
        );
        assert_eq!(
            main.blocks[0].insts[2],
            Inst::Peek {
                dest: 0,
                depth: 1,
                position: 3
            }
        );
        assert_eq!(
            main.block("if.then.0").unwrap().terminator,
            Terminator::Jump("if.end.1".into())
        );
    }

    #[test]
    fn functions_pop_their_own_arguments() {
        let module = compile(vec![
            function("minus", 2),
            Instruction::Do,
            Instruction::Sub,
            Instruction::Return,
            Instruction::End,
            Instruction::Push(10),
            Instruction::Push(3),
            Instruction::Call("minus".into()),
        ])
        .unwrap();

        let minus = module.function("slang.fn.0").unwrap();
        assert_eq!(minus.kind, FunctionKind::User);
        assert_eq!(
            minus.blocks[0].insts[..5],
            [
                Inst::Arg { dest: 0 },
                Inst::Arg { dest: 1 },
                Inst::Enter,
                Inst::Push {
                    value: Operand::Value(1),
                    position: 0
                },
                Inst::Push {
                    value: Operand::Value(0),
                    position: 0
                },
            ]
        );
        assert_eq!(minus.blocks[0].terminator, Terminator::Return(Operand::Value(5)));
        assert_eq!(
            minus.blocks.last().unwrap().terminator,
            Terminator::Return(Operand::Const(0))
        );

        assert_eq!(module.slots, ["minus"]);
        assert_eq!(
            module.main.blocks[0].insts[..2],
            [
                Inst::Define {
                    slot: 0,
                    symbol: "slang.fn.0".into()
                },
                Inst::Push {
                    value: Operand::Const(10),
                    position: 5
                },
            ]
        );
        assert_eq!(
            module.main.blocks[0].insts[3],
            Inst::Call {
                dest: 0,
                slot: 0,
                position: 7,
            }
        );
    }

    #[test]
    fn recursion_goes_through_the_slot() {
        let module = compile(vec![
            function("loop", 0),
            Instruction::Do,
            Instruction::Call("loop".into()),
            Instruction::End,
        ])
        .unwrap();

        let body = &module.function("slang.fn.0").unwrap().blocks[0];
        assert_eq!(
            body.insts[1],
            Inst::Call {
                dest: 0,
                slot: 0,
                position: 2
            }
        );
        assert_eq!(module.slots, ["loop"]);
    }

    #[test]
    fn calls_to_later_definitions_compile() {
        // function a 0 do call b return end function b 0 do 7 return end call a .
        let module = compile(vec![
            function("a", 0),
            Instruction::Do,
            Instruction::Call("b".into()),
            Instruction::Return,
            Instruction::End,
            function("b", 0),
            Instruction::Do,
            Instruction::Push(7),
            Instruction::Return,
            Instruction::End,
            Instruction::Call("a".into()),
            Instruction::Dump,
        ])
        .unwrap();

        assert_eq!(module.slots, ["a", "b"]);
        let a = module.function("slang.fn.0").unwrap();
        assert!(a.blocks[0].insts.contains(&Inst::Call {
            dest: 0,
            slot: 1,
            position: 2
        }));

        let defines: Vec<_> = module.main.blocks[0]
            .insts
            .iter()
            .filter(|inst| matches!(inst, Inst::Define { .. }))
            .collect();
        assert_eq!(
            defines,
            [
                &Inst::Define {
                    slot: 0,
                    symbol: "slang.fn.0".into()
                },
                &Inst::Define {
                    slot: 1,
                    symbol: "slang.fn.1".into()
                },
            ]
        );
    }

    #[test]
    fn redefinition_rebinds_the_slot_seen_by_other_functions() {
        // f returns 1, g calls f, f is redefined to return 2, then g is called.
        let module = compile(vec![
            function("f", 0),
            Instruction::Do,
            Instruction::Push(1),
            Instruction::Return,
            Instruction::End,
            function("g", 0),
            Instruction::Do,
            Instruction::Call("f".into()),
            Instruction::Return,
            Instruction::End,
            function("f", 0),
            Instruction::Do,
            Instruction::Push(2),
            Instruction::Return,
            Instruction::End,
            Instruction::Call("g".into()),
            Instruction::Dump,
        ])
        .unwrap();

        assert_eq!(module.functions.len(), 3);
        let f = module.slot("f").unwrap();
        let g = module.function("slang.fn.1").unwrap();
        assert!(
            g.blocks[0]
                .insts
                .iter()
                .any(|inst| matches!(inst, Inst::Call { slot, .. } if *slot == f))
        );

        // The last binding of `f` before `call g` is the second definition.
        let main = &module.main.blocks[0].insts;
        let call = main
            .iter()
            .position(|inst| matches!(inst, Inst::Call { .. }))
            .unwrap();
        let bound = main[..call].iter().rev().find_map(|inst| match inst {
            Inst::Define { slot, symbol } if *slot == f => Some(symbol.as_str()),
            _ => None,
        });
        assert_eq!(bound, Some("slang.fn.2"));

        let text = module.to_string();
        assert!(text.contains("store ptr @slang.fn.2, ptr @slang.slot.0"));
        assert!(text.contains(
            "%callee.0 = call ptr @slang.resolve(ptr @slang.slot.0, ptr @slang.msg.undefined.0, i64 7)"
        ));
    }

    #[test]
    fn undefined_names_fault_at_run_time() {
        let module = compile(vec![Instruction::Call("nope".into())]).unwrap();

        assert_eq!(module.slots, ["nope"]);
        assert!(module.functions.is_empty());
        assert_eq!(
            module.main.blocks[0].insts[0],
            Inst::Call {
                dest: 0,
                slot: 0,
                position: 0
            }
        );
    }

    #[test]
    fn arity_beyond_capacity_faults_at_the_definition() {
        let module = compile(vec![
            function("huge", usize::MAX / 4),
            Instruction::Do,
            Instruction::End,
            Instruction::Push(1),
        ])
        .unwrap();

        assert!(module.functions.is_empty());
        let entry = &module.main.blocks[0];
        assert_eq!(
            entry.insts,
            [Inst::Fault {
                fault: Fault::StackOverflow,
                position: 0
            }]
        );
        assert_eq!(entry.terminator, Terminator::Unreachable);
        assert_eq!(module.main.blocks[1].label, "after.fault.0");
    }

    #[test]
    fn nesting_past_the_limit_is_rejected() {
        let program = Program::new(vec![
            Instruction::Push(1),
            Instruction::Push(1),
            Instruction::If,
            Instruction::Relation(Relation::Eq),
            Instruction::Do,
            Instruction::While,
            Instruction::Relation(Relation::Eq),
            Instruction::Do,
            Instruction::Break,
            Instruction::End,
            Instruction::End,
        ])
        .unwrap();

        let mut session = Session::new("a.out".into());
        session.limits.max_nesting_depth = 1;
        assert_eq!(
            compile_program(&session, &program).unwrap_err(),
            SlangError::StackOverflow { position: 5 }
        );

        session.limits.max_nesting_depth = 2;
        assert!(compile_program(&session, &program).is_ok());
    }
}

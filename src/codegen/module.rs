use std::fmt;

use crate::{errors::Fault, ir::Relation, session::Limits};

use super::runtime;

/// A lowered program, rendered as textual LLVM IR through [`fmt::Display`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Module {
    pub limits: Limits,
    /// Names reachable through `call`, indexed by their slot.
    ///
    /// Every slot is a global holding the function currently bound to that name, null until the
    /// first definition runs. Calls load it when they execute, so they see redefinitions.
    pub slots: Vec<String>,
    /// User functions, in definition order.
    pub functions: Vec<Function>,
    /// The implicit top-level entry function.
    pub main: Function,
}

impl Module {
    pub fn function(&self, symbol: &str) -> Option<&Function> {
        self.functions.iter().find(|function| function.symbol == symbol)
    }

    pub fn slot(&self, name: &str) -> Option<usize> {
        self.slots.iter().position(|slot| slot == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Function {
    pub symbol: String,
    pub kind: FunctionKind,
    /// The first block is the entry block.
    pub blocks: Vec<BasicBlock>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    /// `i32 main()`, returning 0.
    Entry,
    /// A user function returning its single `i64` result.
    ///
    /// It receives the caller's region and the call position, pops its own arguments from the
    /// caller and accounts for the call depth before running its body.
    User,
}

impl Function {
    pub fn block(&self, label: &str) -> Option<&BasicBlock> {
        self.blocks.iter().find(|block| block.label == label)
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.blocks.iter().map(|block| block.label.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicBlock {
    pub label: String,
    pub insts: Vec<Inst>,
    pub terminator: Terminator,
}

/// An SSA value (`%vN`) or a constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    Const(i64),
    Value(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
}

/// Straight-line operations on the enclosing function's operand region.
///
/// Every fallible operation carries the instruction position it reports when it faults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inst {
    Push {
        value: Operand,
        position: usize,
    },
    Pop {
        dest: usize,
        position: usize,
    },
    /// Reads the cell `depth` slots below the top, 1 being the top.
    Peek {
        dest: usize,
        depth: usize,
        position: usize,
    },
    Flip {
        position: usize,
    },
    Binary {
        dest: usize,
        op: BinOp,
        lhs: Operand,
        rhs: Operand,
    },
    Div {
        dest: usize,
        lhs: Operand,
        rhs: Operand,
        position: usize,
    },
    /// Produces an `i1`.
    Compare {
        dest: usize,
        relation: Relation,
        lhs: Operand,
        rhs: Operand,
    },
    Dump {
        value: Operand,
    },
    /// Binds `symbol` to the name in `slot`.
    Define {
        slot: usize,
        symbol: String,
    },
    /// Calls whatever the name in `slot` is bound to, faulting when it is unbound.
    Call {
        dest: usize,
        slot: usize,
        position: usize,
    },
    /// Pops one argument off the caller's region. User functions only.
    Arg {
        dest: usize,
    },
    /// Enters a call, checking the depth limit. User functions only.
    Enter,
    Fault {
        fault: Fault,
        position: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Terminator {
    Jump(String),
    Branch {
        condition: usize,
        then: String,
        otherwise: String,
    },
    Return(Operand),
    /// Normal completion of `main`.
    Exit,
    Unreachable,
}

impl Terminator {
    pub fn successors(&self) -> Vec<&str> {
        match self {
            Terminator::Jump(target) => vec![target.as_str()],
            Terminator::Branch {
                then, otherwise, ..
            } => vec![then.as_str(), otherwise.as_str()],
            Terminator::Return(_) | Terminator::Exit | Terminator::Unreachable => Vec::new(),
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Const(value) => write!(f, "{value}"),
            Operand::Value(id) => write!(f, "%v{id}"),
        }
    }
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BinOp::Add => "add",
            BinOp::Sub => "sub",
            BinOp::Mul => "mul",
        })
    }
}

const REGION: &str = "ptr %stack, ptr %sp";
const CALLER_REGION: &str = "ptr %caller, ptr %caller.sp";

impl fmt::Display for Inst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Inst::Push { value, position } => write!(
                f,
                "call void @slang.push({REGION}, i64 {value}, i64 {position})"
            ),
            Inst::Pop { dest, position } => {
                write!(f, "%v{dest} = call i64 @slang.pop({REGION}, i64 {position})")
            }
            Inst::Peek {
                dest,
                depth,
                position,
            } => write!(
                f,
                "%v{dest} = call i64 @slang.peek({REGION}, i64 {depth}, i64 {position})"
            ),
            Inst::Flip { position } => {
                write!(f, "call void @slang.flip({REGION}, i64 {position})")
            }
            Inst::Binary { dest, op, lhs, rhs } => {
                write!(f, "%v{dest} = {op} i64 {lhs}, {rhs}")
            }
            Inst::Div {
                dest,
                lhs,
                rhs,
                position,
            } => write!(
                f,
                "%v{dest} = call i64 @slang.div(i64 {lhs}, i64 {rhs}, i64 {position})"
            ),
            Inst::Compare {
                dest,
                relation,
                lhs,
                rhs,
            } => write!(f, "%v{dest} = icmp {} i64 {lhs}, {rhs}", relation.predicate()),
            Inst::Dump { value } => write!(
                f,
                "call i32 (ptr, ...) @printf(ptr @slang.fmt.dump, i64 {value})"
            ),
            Inst::Define { slot, symbol } => {
                write!(f, "store ptr @{symbol}, ptr {}", runtime::slot_symbol(*slot))
            }
            Inst::Call {
                dest,
                slot,
                position,
            } => {
                writeln!(
                    f,
                    "%callee.{dest} = call ptr @slang.resolve(ptr {}, ptr {}, i64 {position})",
                    runtime::slot_symbol(*slot),
                    runtime::undefined_symbol(*slot)
                )?;
                write!(
                    f,
                    "  %v{dest} = call i64 %callee.{dest}({REGION}, i64 {position})"
                )
            }
            Inst::Arg { dest } => write!(
                f,
                "%v{dest} = call i64 @slang.pop({CALLER_REGION}, i64 %pos)"
            ),
            Inst::Enter => f.write_str("call void @slang.enter(i64 %pos)"),
            Inst::Fault { fault, position } => {
                f.write_str(&runtime::fault_call(*fault, &position.to_string()))
            }
        }
    }
}

impl fmt::Display for Terminator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Terminator::Jump(target) => write!(f, "br label %{target}"),
            Terminator::Branch {
                condition,
                then,
                otherwise,
            } => write!(
                f,
                "br i1 %v{condition}, label %{then}, label %{otherwise}"
            ),
            Terminator::Return(value) => write!(f, "ret i64 {value}"),
            Terminator::Exit => f.write_str("ret i32 0"),
            Terminator::Unreachable => f.write_str("unreachable"),
        }
    }
}

impl Function {
    fn render(&self, f: &mut fmt::Formatter<'_>, limits: Limits) -> fmt::Result {
        match self.kind {
            FunctionKind::Entry => writeln!(f, "define i32 @{}() {{", self.symbol)?,
            FunctionKind::User => writeln!(
                f,
                "define internal i64 @{}({CALLER_REGION}, i64 %pos) {{",
                self.symbol
            )?,
        }

        for (index, block) in self.blocks.iter().enumerate() {
            writeln!(f, "{}:", block.label)?;
            if index == 0 {
                writeln!(f, "  %stack = alloca [{} x i64]", limits.stack_capacity)?;
                writeln!(f, "  %sp = alloca i64")?;
                writeln!(f, "  store i64 0, ptr %sp")?;
            }
            for inst in &block.insts {
                writeln!(f, "  {inst}")?;
            }
            if let Terminator::Return(_) = block.terminator {
                writeln!(f, "  call void @slang.leave()")?;
            }
            writeln!(f, "  {}", block.terminator)?;
        }

        writeln!(f, "}}")
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "; generated by slang")?;
        runtime::write_prelude(f, self.limits)?;
        runtime::write_slots(f, &self.slots)?;

        for function in &self.functions {
            writeln!(f)?;
            function.render(f, self.limits)?;
        }

        writeln!(f)?;
        self.main.render(f, self.limits)
    }
}

use std::time::Instant;

use crate::{errors::SlangError, ir::Program, session::Session};

pub use module::{BasicBlock, BinOp, Function, FunctionKind, Inst, Module, Operand, Terminator};

mod compiler;
mod module;
mod runtime;

/// Lowers the given program into a module ready to be handed to a toolchain.
///
/// Rendering the module with `to_string()` produces textual LLVM IR that includes the runtime
/// helpers, so the result is a complete translation unit.
pub fn compile(session: &Session, program: &Program) -> Result<Module, SlangError> {
    let compile_codegen_time = Instant::now();
    let module = compiler::compile_program(session, program)?;
    let compile_codegen_time = compile_codegen_time.elapsed();

    tracing::debug!(
        functions = module.functions.len(),
        blocks = module.main.blocks.len(),
        "lowered program"
    );
    tracing::debug!("Codegen time {:?}", compile_codegen_time);

    Ok(module)
}

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Size limits shared by the interpreter and by compiled programs, so both fault at the same
/// point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Slots in each operand stack.
    pub stack_capacity: usize,
    /// Maximum number of simultaneously active function calls.
    pub max_call_depth: usize,
    /// Maximum number of `if`/`while` bodies nested inside one another.
    pub max_nesting_depth: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            stack_capacity: 1024,
            max_call_depth: 256,
            max_nesting_depth: 64,
        }
    }
}

/// This struct holds the information needed to compile a program,
/// like the optimization level, the output path and the limits baked into the binary.
#[derive(Debug, Clone)]
pub struct Session {
    /// The optimization level forwarded to the toolchain.
    pub optlevel: OptLevel,
    /// The file where to put the executable.
    pub output_file: PathBuf,
    /// Whether to keep the generated LLVM IR next to the output file.
    pub output_ll: bool,
    pub limits: Limits,
}

impl Session {
    pub fn new(output_file: PathBuf) -> Self {
        Self {
            optlevel: OptLevel::None,
            output_file,
            output_ll: false,
            limits: Limits::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OptLevel {
    None,       // -O0
    Less,       // -O1
    Default,    // -O2
    Aggressive, // -O3
}

impl OptLevel {
    pub fn flag(self) -> &'static str {
        match self {
            OptLevel::None => "-O0",
            OptLevel::Less => "-O1",
            OptLevel::Default => "-O2",
            OptLevel::Aggressive => "-O3",
        }
    }
}

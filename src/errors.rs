use thiserror::Error;

/// Faults in the shape of an instruction stream, detected before any backend runs it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StructuralError {
    #[error("block opened at instruction {position} has no matching `end`")]
    UnterminatedBlock { position: usize },
    #[error("`if`/`while` at instruction {position} must be followed by a relation and `do`")]
    MalformedCondition { position: usize },
    #[error("function header at instruction {position} must be followed by `do`")]
    MissingDo { position: usize },
    #[error("relation at instruction {position} is only valid in an `if`/`while` header")]
    MisplacedRelation { position: usize },
    #[error("unexpected delimiter at instruction {position}")]
    UnexpectedDelimiter { position: usize },
    #[error("function defined at instruction {position} is not at the top level")]
    NestedFunction { position: usize },
    #[error("`break` at instruction {position} is not inside a `while` body")]
    BreakOutsideLoop { position: usize },
    #[error("`return` outside of a function at instruction {position}")]
    UnexpectedReturn { position: usize },
    #[error("unsupported feature `{feature}` at instruction {position}")]
    UnsupportedFeature {
        feature: &'static str,
        position: usize,
    },
}

impl StructuralError {
    pub fn position(&self) -> usize {
        match self {
            Self::UnterminatedBlock { position }
            | Self::MalformedCondition { position }
            | Self::MissingDo { position }
            | Self::MisplacedRelation { position }
            | Self::UnexpectedDelimiter { position }
            | Self::NestedFunction { position }
            | Self::BreakOutsideLoop { position }
            | Self::UnexpectedReturn { position }
            | Self::UnsupportedFeature { position, .. } => *position,
        }
    }
}

/// Every way a run can fail, shared by the interpreter and the native backend.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SlangError {
    #[error(transparent)]
    Structural(#[from] StructuralError),
    #[error("stack underflow at instruction {position}")]
    StackUnderflow { position: usize },
    #[error("stack overflow at instruction {position}")]
    StackOverflow { position: usize },
    #[error("division by zero at instruction {position}")]
    DivisionByZero { position: usize },
    #[error("undefined function {name:?} at instruction {position}")]
    UndefinedFunction { name: String, position: usize },
    #[error("{tool} failed:\n{diagnostics}")]
    BuildFailed { tool: String, diagnostics: String },
    #[error("build cancelled while running {tool}")]
    BuildCancelled { tool: String },
    #[error("failed to write program output: {0}")]
    Output(String),
}

impl SlangError {
    /// The instruction the error points at, if it has one.
    pub fn position(&self) -> Option<usize> {
        match self {
            Self::Structural(error) => Some(error.position()),
            Self::StackUnderflow { position }
            | Self::StackOverflow { position }
            | Self::DivisionByZero { position }
            | Self::UndefinedFunction { position, .. } => Some(*position),
            Self::BuildFailed { .. } | Self::BuildCancelled { .. } | Self::Output(_) => None,
        }
    }

    /// Process exit code used for runtime faults, identical for interpreted and compiled runs.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::StackUnderflow { .. } => Fault::StackUnderflow.exit_code(),
            Self::StackOverflow { .. } => Fault::StackOverflow.exit_code(),
            Self::DivisionByZero { .. } => Fault::DivisionByZero.exit_code(),
            _ => FAILURE_EXIT_CODE,
        }
    }
}

/// Exit code of every failure without a dedicated [`Fault`] code, undefined functions included.
pub const FAILURE_EXIT_CODE: i32 = 1;

/// Runtime faults a compiled program can raise on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    StackUnderflow,
    StackOverflow,
    DivisionByZero,
}

impl Fault {
    pub const ALL: [Fault; 3] = [
        Fault::StackUnderflow,
        Fault::StackOverflow,
        Fault::DivisionByZero,
    ];

    pub fn exit_code(self) -> i32 {
        match self {
            Fault::StackUnderflow => 2,
            Fault::StackOverflow => 3,
            Fault::DivisionByZero => 4,
        }
    }

    /// Same wording as the matching [`SlangError`] display.
    pub fn message(self) -> &'static str {
        match self {
            Fault::StackUnderflow => "stack underflow",
            Fault::StackOverflow => "stack overflow",
            Fault::DivisionByZero => "division by zero",
        }
    }

    pub fn at(self, position: usize) -> SlangError {
        match self {
            Fault::StackUnderflow => SlangError::StackUnderflow { position },
            Fault::StackOverflow => SlangError::StackOverflow { position },
            Fault::DivisionByZero => SlangError::DivisionByZero { position },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fault_messages_match_error_display() {
        for fault in Fault::ALL {
            let error = fault.at(7);
            assert_eq!(
                error.to_string(),
                format!("{} at instruction 7", fault.message())
            );
            assert_eq!(error.exit_code(), fault.exit_code());
        }
    }

    #[test]
    fn structural_errors_keep_their_position() {
        let error: SlangError = StructuralError::MissingDo { position: 4 }.into();
        assert_eq!(error.position(), Some(4));
        assert_eq!(error.exit_code(), FAILURE_EXIT_CODE);

        let error: SlangError = StructuralError::UnexpectedReturn { position: 2 }.into();
        assert_eq!(error.to_string(), "`return` outside of a function at instruction 2");
    }

    #[test]
    fn undefined_functions_fail_with_the_generic_code() {
        let error = SlangError::UndefinedFunction {
            name: "f".into(),
            position: 3,
        };
        assert_eq!(error.exit_code(), FAILURE_EXIT_CODE);
        assert_eq!(error.to_string(), "undefined function \"f\" at instruction 3");
    }
}

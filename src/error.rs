use std::fmt::{Display, Formatter};

use thiserror::Error;

use crate::bytecode::{ConstantIndex, LocalSlot, UpvalueIndex};

/// Everything that can abort [`crate::vm::VirtualMachine::interpret`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeErrorKind {
    #[error("operator `{operator}` can only be applied to {expected}")]
    OperandType {
        operator: &'static str,
        expected: &'static str,
    },
    #[error("can only call functions and closures, not {0}")]
    NotCallable(&'static str),
    #[error("global `{0}` is already defined")]
    GlobalRedefinition(String),
    #[error("undefined global `{0}`")]
    UndefinedGlobal(String),
    #[error("expected {expected} arguments but got {got}")]
    Arity { expected: u8, got: u8 },

    #[error("stack overflow")]
    StackOverflow,
    #[error("stack underflow")]
    StackUnderflow,
    #[error("no active call frame")]
    NoActiveFrame,
    #[error("invalid operation code {0:#04x}")]
    InvalidOperationCode(u8),
    #[error("unexpected end of bytecode")]
    UnexpectedEndOfCode,
    #[error("constant index {0} out of bounds")]
    ConstantOutOfBounds(ConstantIndex),
    #[error("constant {index} is not a {expected}")]
    ConstantType {
        index: ConstantIndex,
        expected: &'static str,
    },
    #[error("local slot {0} out of bounds")]
    LocalOutOfBounds(LocalSlot),
    #[error("upvalue index {0} out of bounds")]
    UpvalueOutOfBounds(UpvalueIndex),
    #[error("dangling or mistyped object reference")]
    InvalidReference,
    #[error("failed to write output: {0}")]
    Output(String),
}

/// The broad classes of [`RuntimeErrorKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Operand kinds do not fit the operation, or the callee is not callable.
    Type,
    /// A global was redefined, or an undefined one was accessed.
    Name,
    /// Argument count does not match the callee.
    Arity,
    /// Malformed bytecode or an exhausted resource.
    Fault,
}

impl RuntimeErrorKind {
    pub fn category(&self) -> ErrorCategory {
        match self {
            RuntimeErrorKind::OperandType { .. } | RuntimeErrorKind::NotCallable(_) => {
                ErrorCategory::Type
            }
            RuntimeErrorKind::GlobalRedefinition(_) | RuntimeErrorKind::UndefinedGlobal(_) => {
                ErrorCategory::Name
            }
            RuntimeErrorKind::Arity { .. } => ErrorCategory::Arity,
            _ => ErrorCategory::Fault,
        }
    }
}

/// One line of a traceback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceLine {
    pub line: Option<u32>,
    /// Declared name of the function, `None` for the top-level script.
    pub function: Option<String>,
}

impl Display for TraceLine {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.line {
            Some(line) => write!(f, "[line {}] in ", line)?,
            None => write!(f, "[line ?] in ")?,
        }
        match &self.function {
            Some(name) => write!(f, "{}()", name),
            None => write!(f, "script"),
        }
    }
}

/// A [`RuntimeErrorKind`] with the call stack at the moment it was raised, innermost first.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}")]
pub struct RuntimeError {
    pub kind: RuntimeErrorKind,
    pub trace: Vec<TraceLine>,
}

impl RuntimeError {
    pub fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    /// The message followed by one line per frame.
    pub fn report(&self) -> String {
        let mut report = self.kind.to_string();
        for line in &self.trace {
            report.push('\n');
            report.push_str(&line.to_string());
        }
        report
    }
}

impl From<RuntimeErrorKind> for RuntimeError {
    fn from(kind: RuntimeErrorKind) -> Self {
        Self {
            kind,
            trace: Vec::new(),
        }
    }
}

/// The outcome of a failed interpretation.
#[derive(Debug, Error)]
pub enum InterpretError {
    /// Raised by a front end before any bytecode ran.
    #[error("compile error: {0}")]
    Compile(String),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

impl InterpretError {
    pub fn as_runtime(&self) -> Option<&RuntimeError> {
        match self {
            InterpretError::Runtime(error) => Some(error),
            InterpretError::Compile(_) => None,
        }
    }
}

//! Error types for the Simvolio engine
//!
//! Lexing, compiling and running all report through [`Error`]. Runtime errors
//! collect an unwind trailer naming every function frame they passed through.

use std::fmt;
use thiserror::Error as ThisError;

/// Source position of a lexeme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    pub line: u16,
    pub column: u32,
}

impl Position {
    pub fn new(line: u16, column: u32) -> Self {
        Self { line, column }
    }
}

/// Error kinds in Simvolio
#[derive(Debug, Clone, PartialEq, ThisError)]
pub enum ErrorKind {
    // Lexer errors
    #[error("unknown lexeme [Ln:{line} Col:{column}]")]
    UnknownLexeme { line: u16, column: u32 },
    #[error("invalid number '{0}'")]
    InvalidNumber(String),

    // Grammar errors, one per error state of the table
    #[error("{message} {lexeme} [Ln:{line} Col:{column}]")]
    Syntax {
        code: u32,
        message: &'static str,
        lexeme: String,
        line: u16,
        column: u32,
    },
    #[error("there is not eval expression")]
    MissingExpression,
    #[error("there is not pair")]
    NoPair,
    #[error("unexpected end of the expression")]
    EndOfExpression,
    #[error("unexpected operator; expecting operand")]
    UnexpectedOperator,
    #[error("unknown operator {0}")]
    UnknownOperator(String),
    #[error("multi-index is not supported")]
    MultiIndex,
    #[error("must be the name of the tail")]
    MustTail,
    #[error("unclosed array initialization")]
    UnclosedArray,
    #[error("unclosed map initialization")]
    UnclosedMap,
    #[error("unexpected lexem; expecting string key")]
    ExpectedKey,
    #[error("unexpected lexem; expecting colon")]
    ExpectedColon,
    #[error("unexpected lexem; expecting comma")]
    ExpectedComma,
    #[error("unexpected lexem; expecting string, int value or variable")]
    ExpectedValue,

    // Declaration errors
    #[error("{kind} '{name}' redeclared in this contract '{parent}'")]
    Redeclared {
        kind: &'static str,
        name: String,
        parent: String,
    },
    #[error("parameter '{0}' has already been declared")]
    DuplicateParam(String),
    #[error("variable '{0}' has already been declared")]
    DuplicateVar(String),
    #[error("... parameter must be one")]
    VariadicTwice,
    #[error("expecting type of the data field [Ln:{0} Col:{1}]")]
    DataType(u16, u32),
    #[error("expecting name of the data field [Ln:{0} Col:{1}]")]
    DataName(u16, u32),
    #[error("unexpected tag [Ln:{0} Col:{1}]")]
    DataTag(u16, u32),
    #[error("data can only be in contract")]
    DataOutsideContract,
    #[error("settings can only be in contract")]
    SettingsOutsideContract,
    #[error("'{0}' is a system variable and cannot be a data field")]
    DataSysVar(String),
    #[error("system variable ${0} cannot be changed")]
    SysVarAssign(String),
    #[error("unknown identifier {0}")]
    UnknownIdent(String),
    #[error("unknown variable {0}")]
    UnknownVariable(String),
    #[error("unknown function {0}")]
    UnknownFunction(String),
    #[error("unknown contract {0}")]
    UnknownContract(String),
    #[error("function {0} must have {1} parameters")]
    WrongParams(String, usize),
    #[error("The contract can't call itself recursively")]
    Recursion,
    #[error("'conditions' cannot call contracts or functions which can modify the blockchain database.")]
    ConditionsWrite,
    #[error("else without if")]
    ElseWithoutIf,

    // Runtime errors
    #[error("stack is empty")]
    StackEmpty,
    #[error("function {0} must return {1} values")]
    WrongResults(String, usize),
    #[error("unsupported type")]
    UnsupportedType,
    #[error("divided by zero")]
    DivisionByZero,
    #[error("{0} is not a valid integer")]
    InvalidInt(String),
    #[error("parameter {0} has wrong type")]
    ParamType(usize),
    #[error("index out of range")]
    IndexOutOfRange,
    #[error("The index is out of range")]
    MaxArrayIndex,
    #[error("The maximum length of map")]
    MaxMapCount,
    #[error("self assignment")]
    SelfAssignment,
    #[error("map index must be string, not {0}")]
    MapIndex(&'static str),
    #[error("array index must be int, not {0}")]
    ArrayIndex(&'static str),
    #[error("type {0} does not support indexing")]
    NotIndexable(&'static str),
    #[error("unknown extend identifier ${0}")]
    UnknownExtend(String),
    #[error("${name} (type {was}) cannot be assigned to the value of type {now}")]
    ExtendType {
        name: String,
        was: &'static str,
        now: &'static str,
    },
    #[error("cost limit overflow")]
    CostLimit,
    #[error("memory limit exceeded")]
    MemoryLimit,
    #[error("max call depth")]
    CallDepth,
    #[error("time limit exceeded")]
    TimeLimit,
    #[error("there is loop in {0} contract")]
    ContractLoop(String),
    #[error("contract {0} must have the same number of names and values")]
    ContractParams(String),
    #[error("{0} is undefined")]
    UndefinedParam(String),
    #[error("runtime panic error")]
    RuntimePanic,
    #[error("{0}")]
    Extension(String),
    /// Payload raised by `error`, `warning` or `info` statements
    #[error("{0}")]
    Contract(String),
}

/// A Simvolio error with location and unwind information
#[derive(Debug, Clone, PartialEq)]
pub struct Error {
    pub kind: ErrorKind,
    pub position: Option<Position>,
    pub trace: Vec<String>,
    pub source_line: Option<String>,
}

impl Error {
    pub fn new(kind: ErrorKind, position: Option<Position>) -> Self {
        Self {
            kind,
            position,
            trace: Vec::new(),
            source_line: None,
        }
    }

    /// Whether this error is a payload raised by the contract itself
    pub fn is_structured(&self) -> bool {
        matches!(self.kind, ErrorKind::Contract(_))
    }

    /// Records a function frame the error unwound through. Consecutive
    /// frames with the same name collapse into the innermost one.
    pub fn push_frame(&mut self, name: &str, line: u16) {
        if self.is_structured() {
            return;
        }
        if let Some(last) = self.trace.last() {
            if last.rsplit_once(' ').map(|(n, _)| n) == Some(name) {
                return;
            }
        }
        self.trace.push(format!("{} {}", name, line));
    }

    pub fn with_source(mut self, source: &str) -> Self {
        if let Some(pos) = &self.position {
            let lines: Vec<&str> = source.lines().collect();
            let line = pos.line as usize;
            if line > 0 && line <= lines.len() {
                self.source_line = Some(lines[line - 1].to_string());
            }
        }
        self
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error::new(kind, None)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        for frame in &self.trace {
            write!(f, " [{}]", frame)?;
        }
        if let (Some(pos), Some(line)) = (&self.position, &self.source_line) {
            write!(f, "\n  | {}", line)?;
            write!(f, "\n  | {}^", " ".repeat((pos.column as usize).saturating_sub(1)))?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {}

/// Result type for Simvolio operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trailer_single_append() {
        let mut err = Error::from(ErrorKind::DivisionByZero);
        err.push_frame("one", 3);
        err.push_frame("one", 5);
        err.push_frame("@1Token.action", 9);
        assert_eq!(err.to_string(), "divided by zero [one 3] [@1Token.action 9]");
    }

    #[test]
    fn test_structured_not_decorated() {
        let mut err = Error::from(ErrorKind::Contract(r#"{"type":"error","error":"stop"}"#.into()));
        err.push_frame("action", 2);
        assert_eq!(err.to_string(), r#"{"type":"error","error":"stop"}"#);
    }
}

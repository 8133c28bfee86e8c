//! Bytecode instructions for the Simvolio VM
//!
//! Operators carry their arity in the high byte of the command word.
//! Control-flow commands hold the child block they run.

use std::fmt;

use crate::block::{BlockId, ObjInfo};
use crate::token::*;
use crate::value::Value;

/// Commands of the VM
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Cmd {
    Push = 0x0001,  // push a constant
    Var,            // push a local variable
    ExtendVar,      // push an environment variable
    CallExtend,     // call an extension resolved by name at run time
    Call,           // call a function
    CallVariadic,   // call a variadic function, count on the stack
    Return,
    If,
    Else,
    While,
    Label,          // loop head
    Continue,
    Break,
    Assign,         // store stack values into the pending targets
    AssignVar,      // set the pending assignment targets
    Error,          // error, warning or info statement
    FuncName,       // collect arguments of a chained segment
    UnwrapArr,      // spread the array argument of the next variadic call
    MapInit,
    ArrayInit,
    Index,
    SetIndex,

    // Unary
    Not = 0x0101,
    Sign,

    // Binary
    Add = 0x0201,
    Sub,
    Mul,
    Div,
    And,
    Or,
    Equal,
    NotEq,
    Less,
    NotLess,
    Great,
    NotGreat,
}

/// Priority of unary operators
pub const UNARY_PRIORITY: u8 = 50;

impl Cmd {
    /// Number of stack operands of an operator
    pub fn arity(self) -> usize {
        (self as u16 >> 8) as usize
    }

    pub fn priority(self) -> u8 {
        match self {
            Cmd::Or => 10,
            Cmd::And => 15,
            Cmd::Equal | Cmd::NotEq => 20,
            Cmd::Less | Cmd::NotLess | Cmd::Great | Cmd::NotGreat => 22,
            Cmd::Add | Cmd::Sub => 25,
            Cmd::Mul | Cmd::Div => 30,
            Cmd::Not | Cmd::Sign => UNARY_PRIORITY,
            _ => 0,
        }
    }

    /// Maps an operator lexeme value to its command
    pub fn from_operator(code: u32) -> Option<Cmd> {
        Some(match code {
            OP_NOT => Cmd::Not,
            OP_SIGN => Cmd::Sign,
            OP_MUL => Cmd::Mul,
            OP_ADD => Cmd::Add,
            OP_SUB => Cmd::Sub,
            OP_DIV => Cmd::Div,
            OP_LESS => Cmd::Less,
            OP_GREAT => Cmd::Great,
            OP_NOT_EQ => Cmd::NotEq,
            OP_AND => Cmd::And,
            OP_LESS_EQ => Cmd::NotGreat,
            OP_EQ_EQ => Cmd::Equal,
            OP_GR_EQ => Cmd::NotLess,
            OP_OR => Cmd::Or,
            _ => return None,
        })
    }
}

/// Local variable reference resolved against the frame of `owner`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VarRef {
    pub owner: BlockId,
    pub index: usize,
}

/// Target of an assignment
#[derive(Debug, Clone, PartialEq)]
pub enum AssignTarget {
    Var(VarRef),
    Extend(String),
}

/// Element of a map or array literal, evaluated when the literal runs
#[derive(Debug, Clone, PartialEq)]
pub enum MapItem {
    Const(Value),
    Var(VarRef),
    Extend(String),
    Map(Vec<(String, MapItem)>),
    Array(Vec<MapItem>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorLevel {
    Error,
    Warning,
    Info,
}

impl ErrorLevel {
    pub fn name(self) -> &'static str {
        match self {
            ErrorLevel::Error => "error",
            ErrorLevel::Warning => "warning",
            ErrorLevel::Info => "info",
        }
    }
}

/// Operand of a command
#[derive(Debug, Clone, Default)]
pub enum Operand {
    #[default]
    None,
    Value(Value),
    Var(VarRef),
    Extend(String),
    Block(BlockId),
    Call(ObjInfo),
    Assign(Vec<AssignTarget>),
    Level(ErrorLevel),
    FuncName { name: String, count: usize },
    Map(Vec<(String, MapItem)>),
    Array(Vec<MapItem>),
}

/// A single instruction
#[derive(Debug, Clone)]
pub struct ByteCode {
    pub cmd: Cmd,
    pub line: u16,
    pub value: Operand,
}

impl ByteCode {
    pub fn new(cmd: Cmd, line: u16, value: Operand) -> Self {
        Self { cmd, line, value }
    }

    pub fn bare(cmd: Cmd, line: u16) -> Self {
        Self::new(cmd, line, Operand::None)
    }

    pub fn block(&self) -> Option<BlockId> {
        match self.value {
            Operand::Block(id) => Some(id),
            _ => None,
        }
    }
}

impl fmt::Display for ByteCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:4} {:?}", self.line, self.cmd)?;
        match &self.value {
            Operand::None => Ok(()),
            Operand::Value(v) => write!(f, " {:?}", v),
            Operand::Var(v) => write!(f, " var:{}@{}", v.index, v.owner),
            Operand::Extend(name) => write!(f, " ${}", name),
            Operand::Block(id) => write!(f, " block:{}", id),
            Operand::Call(ObjInfo::ExtFunc(ext)) => write!(f, " {}", ext.name),
            Operand::Call(obj) => match obj.block() {
                Some(id) => write!(f, " block:{}", id),
                None => Ok(()),
            },
            Operand::Assign(targets) => write!(f, " targets:{}", targets.len()),
            Operand::Level(level) => write!(f, " {}", level.name()),
            Operand::FuncName { name, count } => write!(f, " {}({})", name, count),
            Operand::Map(items) => write!(f, " map:{}", items.len()),
            Operand::Array(items) => write!(f, " array:{}", items.len()),
        }
    }
}

/// Renders a code sequence one instruction per line
pub fn disassemble(name: &str, code: &[ByteCode]) -> String {
    let mut out = format!("== {} ==\n", name);
    for (offset, cmd) in code.iter().enumerate() {
        out.push_str(&format!("{:04} {}\n", offset, cmd));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arity_in_high_byte() {
        assert_eq!(Cmd::Add.arity(), 2);
        assert_eq!(Cmd::NotGreat.arity(), 2);
        assert_eq!(Cmd::Sign.arity(), 1);
        assert_eq!(Cmd::Push.arity(), 0);
        assert_eq!(Cmd::SetIndex.arity(), 0);
    }

    #[test]
    fn test_priorities() {
        assert!(Cmd::Mul.priority() > Cmd::Add.priority());
        assert!(Cmd::Add.priority() > Cmd::Less.priority());
        assert!(Cmd::Less.priority() > Cmd::Equal.priority());
        assert!(Cmd::Equal.priority() > Cmd::And.priority());
        assert!(Cmd::And.priority() > Cmd::Or.priority());
        assert_eq!(Cmd::from_operator(OP_GR_EQ), Some(Cmd::NotLess));
    }

    #[test]
    fn test_disassemble() {
        let code = vec![
            ByteCode::new(Cmd::Push, 1, Operand::Value(Value::Int(7))),
            ByteCode::bare(Cmd::Return, 2),
        ];
        let text = disassemble("eval", &code);
        assert!(text.contains("Push 7"));
        assert!(text.contains("0001    2 Return"));
    }
}

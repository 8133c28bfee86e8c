//! Grammar state table
//!
//! The compiler is a state machine over `(state, lexeme type)`. A missing
//! pair falls back to the wildcard entry of the state, which is either an
//! error or a transition that re-reads the lexeme in another state.

use std::collections::HashMap;

use once_cell::sync::Lazy;

use crate::token::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    Root,
    Body,
    Block,
    Contract,
    Func,
    FParams,
    FParam,
    FParamType,
    FTail,
    FResult,
    FDot,
    Var,
    VarType,
    AssignEval,
    Assign,
    Tx,
    Settings,
    Consts,
    ConstsAssign,
    ConstsValue,
    Fields,
    /// Compile one expression and come back
    Eval,
}

/// Error states of the table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyntaxError {
    UnknownCmd,
    MustName,
    MustLCurly,
    MustRCurly,
    Params,
    Vars,
    VarType,
    Assign,
    StrNum,
}

impl SyntaxError {
    pub fn code(self) -> u32 {
        self as u32 + 1
    }

    pub fn message(self) -> &'static str {
        match self {
            SyntaxError::UnknownCmd => "unknown command",
            SyntaxError::MustName => "must be the name",
            SyntaxError::MustLCurly => "must be '{'",
            SyntaxError::MustRCurly => "must be '}'",
            SyntaxError::Params => "wrong parameters",
            SyntaxError::Vars => "wrong variables",
            SyntaxError::VarType => "must be type",
            SyntaxError::Assign => "must be '='",
            SyntaxError::StrNum => "must be number or string",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Next {
    State(State),
    Error(SyntaxError),
}

/// Semantic actions run after a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    None,
    NameBlock,
    FParam,
    FType,
    FTail,
    FResult,
    FNameParam,
    If,
    Else,
    While,
    Return,
    Continue,
    Break,
    CmdError,
    Var,
    VarType,
    AssignVar,
    Assign,
    Tx,
    Settings,
    ConstName,
    ConstValue,
    Field,
    FieldType,
    FieldTag,
    FieldComma,
    FieldLine,
    Fields,
}

// Transition flags
/// Continue in the Block state
pub const TO_BLOCK: u16 = 0x0001;
/// Continue in the Body state
pub const TO_BODY: u16 = 0x0002;
/// Remember the current lexeme
pub const FORK: u16 = 0x0004;
/// Go back to the remembered lexeme
pub const TO_FORK: u16 = 0x0008;
/// Emit a loop label before the expression
pub const LABEL: u16 = 0x0010;
/// The expression may not be empty
pub const MUST_EVAL: u16 = 0x0020;
/// Read the same lexeme again in the new state
pub const STAY: u16 = 0x0040;
/// Open a child block
pub const PUSH: u16 = 0x0080;
/// Close the current block
pub const POP: u16 = 0x0100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry {
    pub next: Next,
    pub flags: u16,
    pub action: Action,
}

impl Entry {
    pub fn has(&self, flag: u16) -> bool {
        self.flags & flag != 0
    }
}

/// Wildcard key of a state
const ANY: u32 = 0;

type Table = HashMap<(State, u32), Entry>;

static TABLE: Lazy<Table> = Lazy::new(build);

/// Finds the entry for `kind` in `state`, falling back to the wildcard
pub fn lookup(state: State, kind: u32) -> Entry {
    TABLE
        .get(&(state, kind))
        .or_else(|| TABLE.get(&(state, ANY)))
        .copied()
        .unwrap_or(Entry {
            next: Next::Error(SyntaxError::UnknownCmd),
            flags: 0,
            action: Action::None,
        })
}

fn to(state: State, flags: u16, action: Action) -> Entry {
    Entry {
        next: Next::State(state),
        flags,
        action,
    }
}

fn fail(err: SyntaxError) -> Entry {
    Entry {
        next: Next::Error(err),
        flags: 0,
        action: Action::None,
    }
}

fn build() -> Table {
    use Action as A;
    use State as S;

    let kw = keyword;
    let rows: Vec<(State, Vec<(u32, Entry)>)> = vec![
        (S::Root, vec![
            (LEX_NEWLINE, to(S::Root, 0, A::None)),
            (kw(KEY_CONTRACT), to(S::Contract, PUSH, A::None)),
            (kw(KEY_FUNC), to(S::Func, PUSH, A::None)),
            (ANY, fail(SyntaxError::UnknownCmd)),
        ]),
        (S::Body, vec![
            (LEX_NEWLINE, to(S::Body, 0, A::None)),
            (kw(KEY_FUNC), to(S::Func, PUSH, A::None)),
            (kw(KEY_RETURN), to(S::Eval, 0, A::Return)),
            (kw(KEY_CONTINUE), to(S::Body, 0, A::Continue)),
            (kw(KEY_BREAK), to(S::Body, 0, A::Break)),
            (kw(KEY_IF), to(S::Eval, PUSH | TO_BLOCK | MUST_EVAL, A::If)),
            (kw(KEY_WHILE), to(S::Eval, PUSH | TO_BLOCK | LABEL | MUST_EVAL, A::While)),
            (kw(KEY_ELSE), to(S::Block, PUSH, A::Else)),
            (kw(KEY_VAR), to(S::Var, 0, A::None)),
            (kw(KEY_TX), to(S::Tx, 0, A::Tx)),
            (kw(KEY_SETTINGS), to(S::Settings, 0, A::Settings)),
            (kw(KEY_ERROR), to(S::Eval, 0, A::CmdError)),
            (kw(KEY_WARNING), to(S::Eval, 0, A::CmdError)),
            (kw(KEY_INFO), to(S::Eval, 0, A::CmdError)),
            (LEX_IDENT, to(S::AssignEval, FORK, A::None)),
            (LEX_EXTEND, to(S::AssignEval, FORK, A::None)),
            (IS_RCURLY, to(S::Body, POP, A::None)),
            (ANY, fail(SyntaxError::MustRCurly)),
        ]),
        (S::Block, vec![
            (LEX_NEWLINE, to(S::Block, 0, A::None)),
            (IS_LCURLY, to(S::Body, 0, A::None)),
            (ANY, fail(SyntaxError::MustLCurly)),
        ]),
        (S::Contract, vec![
            (LEX_IDENT, to(S::Block, 0, A::NameBlock)),
            (ANY, fail(SyntaxError::MustName)),
        ]),
        (S::Func, vec![
            (LEX_IDENT, to(S::FParams, 0, A::NameBlock)),
            (ANY, fail(SyntaxError::MustName)),
        ]),
        (S::FParams, vec![
            (IS_LPAR, to(S::FParam, 0, A::None)),
            (ANY, to(S::FResult, STAY, A::None)),
        ]),
        (S::FParam, vec![
            (LEX_NEWLINE, to(S::FParam, 0, A::None)),
            (LEX_IDENT, to(S::FParamType, 0, A::FParam)),
            (IS_COMMA, to(S::FParam, 0, A::None)),
            (IS_RPAR, to(S::FResult, 0, A::None)),
            (ANY, fail(SyntaxError::Params)),
        ]),
        (S::FParamType, vec![
            (LEX_IDENT, to(S::FParamType, 0, A::FParam)),
            (LEX_TYPE, to(S::FParam, 0, A::FType)),
            (kw(KEY_TAIL), to(S::FTail, 0, A::FTail)),
            (IS_COMMA, to(S::FParamType, 0, A::None)),
            (ANY, fail(SyntaxError::VarType)),
        ]),
        (S::FTail, vec![
            (LEX_NEWLINE, to(S::FTail, 0, A::None)),
            (IS_RPAR, to(S::FResult, 0, A::None)),
            (ANY, fail(SyntaxError::Params)),
        ]),
        (S::FResult, vec![
            (IS_DOT, to(S::FDot, 0, A::None)),
            (LEX_TYPE, to(S::FResult, 0, A::FResult)),
            (IS_COMMA, to(S::FResult, 0, A::None)),
            (ANY, to(S::Block, STAY, A::None)),
        ]),
        (S::FDot, vec![
            (LEX_IDENT, to(S::FParams, 0, A::FNameParam)),
            (ANY, fail(SyntaxError::MustName)),
        ]),
        (S::Var, vec![
            (LEX_NEWLINE, to(S::Body, 0, A::None)),
            (LEX_IDENT, to(S::VarType, 0, A::Var)),
            (IS_RCURLY, to(S::Body, STAY, A::None)),
            (ANY, fail(SyntaxError::Vars)),
        ]),
        (S::VarType, vec![
            (LEX_IDENT, to(S::VarType, 0, A::Var)),
            (LEX_TYPE, to(S::Var, 0, A::VarType)),
            (IS_COMMA, to(S::VarType, 0, A::None)),
            (ANY, fail(SyntaxError::VarType)),
        ]),
        (S::AssignEval, vec![
            (IS_LPAR, to(S::Eval, TO_FORK | TO_BODY, A::None)),
            (IS_LBRACK, to(S::Eval, TO_FORK | TO_BODY, A::None)),
            (ANY, to(S::Assign, TO_FORK | STAY, A::None)),
        ]),
        (S::Assign, vec![
            (IS_COMMA, to(S::Assign, 0, A::None)),
            (LEX_IDENT, to(S::Assign, 0, A::AssignVar)),
            (LEX_EXTEND, to(S::Assign, 0, A::AssignVar)),
            (IS_EQ, to(S::Eval, TO_BODY | MUST_EVAL, A::Assign)),
            (ANY, fail(SyntaxError::Assign)),
        ]),
        (S::Tx, vec![
            (IS_LCURLY, to(S::Fields, 0, A::None)),
            (ANY, fail(SyntaxError::MustLCurly)),
        ]),
        (S::Settings, vec![
            (IS_LCURLY, to(S::Consts, 0, A::None)),
            (ANY, fail(SyntaxError::MustLCurly)),
        ]),
        (S::Consts, vec![
            (LEX_NEWLINE, to(S::Consts, 0, A::None)),
            (IS_COMMA, to(S::Consts, 0, A::None)),
            (LEX_IDENT, to(S::ConstsAssign, 0, A::ConstName)),
            (IS_RCURLY, to(S::Body, 0, A::None)),
            (ANY, fail(SyntaxError::MustRCurly)),
        ]),
        (S::ConstsAssign, vec![
            (IS_EQ, to(S::ConstsValue, 0, A::None)),
            (ANY, fail(SyntaxError::Assign)),
        ]),
        (S::ConstsValue, vec![
            (LEX_STRING, to(S::Consts, 0, A::ConstValue)),
            (LEX_NUMBER, to(S::Consts, 0, A::ConstValue)),
            (ANY, fail(SyntaxError::StrNum)),
        ]),
        (S::Fields, vec![
            (LEX_NEWLINE, to(S::Fields, 0, A::FieldLine)),
            (IS_COMMA, to(S::Fields, 0, A::FieldComma)),
            (LEX_IDENT, to(S::Fields, 0, A::Field)),
            (LEX_TYPE, to(S::Fields, 0, A::FieldType)),
            (LEX_STRING, to(S::Fields, 0, A::FieldTag)),
            (IS_RCURLY, to(S::Body, 0, A::Fields)),
            (ANY, fail(SyntaxError::MustRCurly)),
        ]),
    ];

    let mut table = Table::new();
    for (state, entries) in rows {
        for (kind, entry) in entries {
            table.insert((state, kind), entry);
        }
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_and_wildcard() {
        let entry = lookup(State::Body, keyword(KEY_WHILE));
        assert_eq!(entry.next, Next::State(State::Eval));
        assert!(entry.has(LABEL) && entry.has(MUST_EVAL) && entry.has(PUSH));
        assert_eq!(entry.action, Action::While);

        let entry = lookup(State::Body, IS_LPAR);
        assert_eq!(entry.next, Next::Error(SyntaxError::MustRCurly));

        let entry = lookup(State::FParams, LEX_TYPE);
        assert_eq!(entry.next, Next::State(State::FResult));
        assert!(entry.has(STAY));
    }

    #[test]
    fn test_error_codes_are_distinct() {
        let errors = [
            SyntaxError::UnknownCmd,
            SyntaxError::MustName,
            SyntaxError::MustLCurly,
            SyntaxError::MustRCurly,
            SyntaxError::Params,
            SyntaxError::Vars,
            SyntaxError::VarType,
            SyntaxError::Assign,
            SyntaxError::StrNum,
        ];
        let mut codes: Vec<u32> = errors.iter().map(|e| e.code()).collect();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
        assert_eq!(SyntaxError::MustLCurly.message(), "must be '{'");
    }
}

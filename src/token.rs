//! Lexeme definitions for Simvolio
//!
//! A lexeme type is a `u32`: the low byte is the category, the upper bits
//! carry a subtype (the ASCII code of a punctuation character, the packed
//! bytes of an operator or a keyword id). The grammar table dispatches on
//! the whole word, so `(` and `)` are distinct table keys.

use std::fmt;

use crate::value::VarType;

// Categories
pub const LEX_UNKNOWN: u32 = 0;
pub const LEX_SYS: u32 = 1;
pub const LEX_OPER: u32 = 2;
pub const LEX_NUMBER: u32 = 3;
pub const LEX_IDENT: u32 = 4;
pub const LEX_NEWLINE: u32 = 5;
pub const LEX_STRING: u32 = 6;
pub const LEX_COMMENT: u32 = 7;
pub const LEX_KEYWORD: u32 = 8;
pub const LEX_TYPE: u32 = 9;
pub const LEX_EXTEND: u32 = 10;
pub const LEX_ERROR: u32 = 0xff;

/// Builds the type word of a punctuation lexeme
pub const fn sys(ch: u8) -> u32 {
    LEX_SYS | ((ch as u32) << 8)
}

/// Builds the type word of a keyword lexeme
pub const fn keyword(id: u32) -> u32 {
    LEX_KEYWORD | (id << 8)
}

pub const IS_LPAR: u32 = sys(b'(');
pub const IS_RPAR: u32 = sys(b')');
pub const IS_COMMA: u32 = sys(b',');
pub const IS_DOT: u32 = sys(b'.');
pub const IS_COLON: u32 = sys(b':');
pub const IS_EQ: u32 = sys(b'=');
pub const IS_LCURLY: u32 = sys(b'{');
pub const IS_RCURLY: u32 = sys(b'}');
pub const IS_LBRACK: u32 = sys(b'[');
pub const IS_RBRACK: u32 = sys(b']');

// Operator values: raw bytes packed big-endian
pub const OP_NOT: u32 = 0x0021; // !
pub const OP_MUL: u32 = 0x002a; // *
pub const OP_ADD: u32 = 0x002b; // +
pub const OP_SUB: u32 = 0x002d; // -
pub const OP_SIGN: u32 = 0x012d; // unary -
pub const OP_DIV: u32 = 0x002f; // /
pub const OP_LESS: u32 = 0x003c; // <
pub const OP_GREAT: u32 = 0x003e; // >
pub const OP_NOT_EQ: u32 = 0x213d; // !=
pub const OP_AND: u32 = 0x2626; // &&
pub const OP_LESS_EQ: u32 = 0x3c3d; // <=
pub const OP_EQ_EQ: u32 = 0x3d3d; // ==
pub const OP_GR_EQ: u32 = 0x3e3d; // >=
pub const OP_OR: u32 = 0x7c7c; // ||

// Keywords
pub const KEY_CONTRACT: u32 = 1;
pub const KEY_FUNC: u32 = 2;
pub const KEY_RETURN: u32 = 3;
pub const KEY_IF: u32 = 4;
pub const KEY_ELIF: u32 = 5;
pub const KEY_ELSE: u32 = 6;
pub const KEY_WHILE: u32 = 7;
pub const KEY_TRUE: u32 = 8;
pub const KEY_FALSE: u32 = 9;
pub const KEY_VAR: u32 = 10;
pub const KEY_TX: u32 = 11;
pub const KEY_SETTINGS: u32 = 12;
pub const KEY_BREAK: u32 = 13;
pub const KEY_CONTINUE: u32 = 14;
pub const KEY_WARNING: u32 = 15;
pub const KEY_INFO: u32 = 16;
pub const KEY_NIL: u32 = 17;
pub const KEY_ACTION: u32 = 18;
pub const KEY_COND: u32 = 19;
pub const KEY_TAIL: u32 = 20;
pub const KEY_ERROR: u32 = 21;

pub const KEYWORDS: &[(&str, u32)] = &[
    ("contract", KEY_CONTRACT),
    ("func", KEY_FUNC),
    ("return", KEY_RETURN),
    ("if", KEY_IF),
    ("elif", KEY_ELIF),
    ("else", KEY_ELSE),
    ("while", KEY_WHILE),
    ("true", KEY_TRUE),
    ("false", KEY_FALSE),
    ("var", KEY_VAR),
    ("data", KEY_TX),
    ("settings", KEY_SETTINGS),
    ("break", KEY_BREAK),
    ("continue", KEY_CONTINUE),
    ("warning", KEY_WARNING),
    ("info", KEY_INFO),
    ("nil", KEY_NIL),
    ("action", KEY_ACTION),
    ("conditions", KEY_COND),
    ("...", KEY_TAIL),
    ("error", KEY_ERROR),
];

/// Check if a string is a keyword and return its id
pub fn lookup_keyword(ident: &str) -> Option<u32> {
    KEYWORDS.iter().find(|(name, _)| *name == ident).map(|(_, id)| *id)
}

pub fn keyword_name(id: u32) -> Option<&'static str> {
    KEYWORDS.iter().find(|(_, k)| *k == id).map(|(name, _)| *name)
}

/// Payload of a lexeme
#[derive(Debug, Clone, PartialEq)]
pub enum LexValue {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// Punctuation char, operator bytes or keyword id
    Code(u32),
    Type(VarType),
}

impl fmt::Display for LexValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LexValue::Nil => write!(f, "nil"),
            LexValue::Bool(b) => write!(f, "{}", b),
            LexValue::Int(n) => write!(f, "{}", n),
            LexValue::Float(n) => write!(f, "{}", n),
            LexValue::Str(s) => write!(f, "{}", s),
            LexValue::Code(c) => write!(f, "{}", c),
            LexValue::Type(t) => write!(f, "{}", t),
        }
    }
}

/// A lexeme with its type word and location
#[derive(Debug, Clone, PartialEq)]
pub struct Lexeme {
    pub kind: u32,
    /// Auxiliary tag; for types the original declared type id
    pub ext: u32,
    pub value: LexValue,
    pub line: u16,
    pub column: u32,
}

impl Lexeme {
    pub fn new(kind: u32, value: LexValue, line: u16, column: u32) -> Self {
        Self {
            kind,
            ext: 0,
            value,
            line,
            column,
        }
    }

    /// Category byte of the type word
    pub fn category(&self) -> u32 {
        self.kind & 0xff
    }

    pub fn ident(&self) -> Option<&str> {
        match &self.value {
            LexValue::Str(s) if matches!(self.category(), LEX_IDENT | LEX_EXTEND) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Lexeme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.category(), &self.value) {
            (LEX_NEWLINE, _) => write!(f, "newline"),
            (LEX_SYS, LexValue::Code(ch)) => match char::from_u32(*ch) {
                Some(ch) => write!(f, "{}", ch),
                None => write!(f, "{}", ch),
            },
            (LEX_OPER, LexValue::Code(code)) => {
                let text: String = code
                    .to_be_bytes()
                    .iter()
                    .filter(|b| **b != 0)
                    .map(|b| *b as char)
                    .collect();
                write!(f, "{}", text)
            }
            (LEX_KEYWORD, LexValue::Code(id)) => write!(f, "{}", keyword_name(*id).unwrap_or("?")),
            (LEX_STRING, LexValue::Str(s)) => write!(f, "{:?}", s),
            (LEX_EXTEND, LexValue::Str(s)) => write!(f, "${}", s),
            (_, value) => write!(f, "{}", value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lexeme_display() {
        let lex = Lexeme::new(LEX_OPER | (OP_EQ_EQ << 8), LexValue::Code(OP_EQ_EQ), 1, 1);
        assert_eq!(lex.to_string(), "==");
        let lex = Lexeme::new(IS_LCURLY, LexValue::Code(b'{' as u32), 1, 1);
        assert_eq!(lex.to_string(), "{");
        let lex = Lexeme::new(keyword(KEY_WHILE), LexValue::Code(KEY_WHILE), 1, 1);
        assert_eq!(lex.to_string(), "while");
    }

    #[test]
    fn test_lookup_keyword() {
        assert_eq!(lookup_keyword("data"), Some(KEY_TX));
        assert_eq!(lookup_keyword("..."), Some(KEY_TAIL));
        assert_eq!(lookup_keyword("datum"), None);
    }
}

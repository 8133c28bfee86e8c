//! Lexer for Simvolio
//!
//! A table-driven state machine turns source text into lexemes. Each cell of
//! the table says which state comes next, whether a lexeme ends on this
//! character and how the character takes part in it.
//!
//! The lexer also rewrites `elif` chains into nested `else { if ... }` so the
//! grammar only has to understand `if`/`else`.

use once_cell::sync::Lazy;

use crate::error::{Error, ErrorKind, Position, Result};
use crate::token::*;
use crate::value::VarType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Main,
    Slash,
    LineComment,
    BlockComment,
    BlockStar,
    Str,
    StrEscape,
    RawStr,
    Ident,
    Number,
    Dot,
    DoubleDot,
    Oper,
    Error,
}

const STATES: usize = State::Error as usize + 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Emit {
    None,
    NewLine,
    Sys,
    Oper,
    Number,
    Str,
    Ident,
}

// Character classes
const CL_OTHER: usize = 0;
const CL_SPACE: usize = 1;
const CL_NEWLINE: usize = 2;
const CL_SEMI: usize = 3;
const CL_SLASH: usize = 4;
const CL_STAR: usize = 5;
const CL_QUOTE: usize = 6;
const CL_BACKQUOTE: usize = 7;
const CL_BACKSLASH: usize = 8;
const CL_DIGIT: usize = 9;
const CL_LETTER: usize = 10;
const CL_PREFIX: usize = 11;
const CL_DOT: usize = 12;
const CL_SYS: usize = 13;
const CL_EQ: usize = 14;
const CL_CMP: usize = 15;
const CL_AND: usize = 16;
const CL_OR: usize = 17;
const CL_ARITH: usize = 18;
const CLASSES: usize = 19;

/// Remember the current offset as the lexeme start
const PUSH: u8 = 0x01;
/// The current character is the last one of the lexeme
const NEXT: u8 = 0x02;
/// Process the current character again in the next state
const AGAIN: u8 = 0x04;
/// The string holds escape sequences
const SKIP: u8 = 0x08;

#[derive(Debug, Clone, Copy)]
struct Transition {
    next: State,
    emit: Emit,
    flags: u8,
}

const fn go(next: State) -> Transition {
    Transition {
        next,
        emit: Emit::None,
        flags: 0,
    }
}

const fn go_with(next: State, flags: u8) -> Transition {
    Transition {
        next,
        emit: Emit::None,
        flags,
    }
}

const fn emit(emit: Emit, flags: u8) -> Transition {
    Transition {
        next: State::Main,
        emit,
        flags,
    }
}

static ALPHABET: Lazy<[u8; 128]> = Lazy::new(|| {
    let mut classes = [CL_OTHER as u8; 128];
    for ch in 0u8..128 {
        let class = match ch {
            b' ' | b'\t' | b'\r' => CL_SPACE,
            b'\n' => CL_NEWLINE,
            b';' => CL_SEMI,
            b'/' => CL_SLASH,
            b'*' => CL_STAR,
            b'"' => CL_QUOTE,
            b'`' => CL_BACKQUOTE,
            b'\\' => CL_BACKSLASH,
            b'0'..=b'9' => CL_DIGIT,
            b'a'..=b'z' | b'A'..=b'Z' | b'_' => CL_LETTER,
            b'$' | b'@' => CL_PREFIX,
            b'.' => CL_DOT,
            b'(' | b')' | b',' | b'[' | b']' | b'{' | b'}' | b':' => CL_SYS,
            b'=' => CL_EQ,
            b'!' | b'<' | b'>' => CL_CMP,
            b'&' => CL_AND,
            b'|' => CL_OR,
            b'+' | b'-' => CL_ARITH,
            _ => CL_OTHER,
        };
        classes[ch as usize] = class as u8;
    }
    classes
});

static TABLE: Lazy<Table> = Lazy::new(build_table);

fn build_table() -> Table {
    let mut table = [[go(State::Error); CLASSES]; STATES];

    row(
        &mut table,
        State::Main,
        go(State::Error),
        &[
            (&[CL_SPACE], go(State::Main)),
            (&[CL_NEWLINE, CL_SEMI], emit(Emit::NewLine, PUSH | NEXT)),
            (&[CL_SLASH], go_with(State::Slash, PUSH)),
            (&[CL_STAR, CL_ARITH], emit(Emit::Oper, PUSH | NEXT)),
            (&[CL_QUOTE], go_with(State::Str, PUSH)),
            (&[CL_BACKQUOTE], go_with(State::RawStr, PUSH)),
            (&[CL_DIGIT], go_with(State::Number, PUSH)),
            (&[CL_LETTER, CL_PREFIX], go_with(State::Ident, PUSH)),
            (&[CL_DOT], go_with(State::Dot, PUSH)),
            (&[CL_SYS], emit(Emit::Sys, PUSH | NEXT)),
            (&[CL_EQ, CL_CMP, CL_AND, CL_OR], go_with(State::Oper, PUSH)),
        ],
    );
    row(
        &mut table,
        State::Slash,
        emit(Emit::Oper, AGAIN),
        &[
            (&[CL_SLASH], go(State::LineComment)),
            (&[CL_STAR], go(State::BlockComment)),
        ],
    );
    row(
        &mut table,
        State::LineComment,
        go(State::LineComment),
        &[(&[CL_NEWLINE], go_with(State::Main, AGAIN))],
    );
    row(
        &mut table,
        State::BlockComment,
        go(State::BlockComment),
        &[(&[CL_STAR], go(State::BlockStar))],
    );
    row(
        &mut table,
        State::BlockStar,
        go(State::BlockComment),
        &[
            (&[CL_SLASH], go(State::Main)),
            (&[CL_STAR], go(State::BlockStar)),
        ],
    );
    row(
        &mut table,
        State::Str,
        go(State::Str),
        &[
            (&[CL_QUOTE], emit(Emit::Str, NEXT)),
            (&[CL_BACKSLASH], go_with(State::StrEscape, SKIP)),
        ],
    );
    row(&mut table, State::StrEscape, go(State::Str), &[]);
    row(
        &mut table,
        State::RawStr,
        go(State::RawStr),
        &[(&[CL_BACKQUOTE], emit(Emit::Str, NEXT))],
    );
    row(
        &mut table,
        State::Ident,
        emit(Emit::Ident, AGAIN),
        &[
            (&[CL_LETTER, CL_DIGIT], go(State::Ident)),
            (&[CL_PREFIX], go(State::Error)),
        ],
    );
    row(
        &mut table,
        State::Number,
        emit(Emit::Number, AGAIN),
        &[
            (&[CL_DIGIT, CL_DOT], go(State::Number)),
            (&[CL_LETTER, CL_PREFIX], go(State::Error)),
        ],
    );
    row(
        &mut table,
        State::Dot,
        emit(Emit::Sys, AGAIN),
        &[(&[CL_DOT], go(State::DoubleDot))],
    );
    row(
        &mut table,
        State::DoubleDot,
        go(State::Error),
        &[(&[CL_DOT], emit(Emit::Ident, NEXT))],
    );
    row(
        &mut table,
        State::Oper,
        emit(Emit::Oper, AGAIN),
        &[(&[CL_EQ, CL_AND, CL_OR], emit(Emit::Oper, NEXT))],
    );
    table
}

type Table = [[Transition; CLASSES]; STATES];

fn row(table: &mut Table, state: State, default: Transition, cells: &[(&[usize], Transition)]) {
    let line = &mut table[state as usize];
    line.fill(default);
    for (classes, transition) in cells {
        for class in classes.iter() {
            line[*class] = *transition;
        }
    }
}

fn class_of(ch: char) -> usize {
    if ch.is_ascii() {
        ALPHABET[ch as usize] as usize
    } else {
        CL_OTHER
    }
}

/// An open `if` whose closing brace has not been seen yet
#[derive(Debug, Default)]
struct IfFrame {
    /// Open braces inside the current branch
    pair: i32,
    /// `else {` wrappers injected for `elif` branches
    synthetic: u32,
}

/// The lexer state
pub struct Lexer {
    chars: Vec<char>,
    lexemes: Vec<Lexeme>,
    ifs: Vec<IfFrame>,
    line: u16,
    line_start: usize,
}

impl Lexer {
    /// Create a new lexer from source code
    pub fn new(source: &str) -> Self {
        let mut chars: Vec<char> = source.chars().collect();
        chars.push('\n');
        Self {
            chars,
            lexemes: Vec::new(),
            ifs: Vec::new(),
            line: 1,
            line_start: 0,
        }
    }

    /// Tokenize the entire source
    pub fn tokenize(mut self) -> Result<Vec<Lexeme>> {
        let table = &*TABLE;
        let mut state = State::Main;
        let mut start = 0usize;
        let mut start_pos = Position::new(1, 1);
        let mut unescape = false;
        let mut raw = false;
        let mut off = 0usize;

        while off < self.chars.len() {
            let ch = self.chars[off];
            let pos = Position::new(self.line, (off - self.line_start + 1) as u32);
            let cell = table[state as usize][class_of(ch)];
            if cell.next == State::Error {
                return Err(unknown(pos));
            }
            if cell.flags & PUSH != 0 {
                start = off;
                start_pos = pos;
                unescape = false;
                raw = ch == '`';
            }
            if cell.flags & SKIP != 0 {
                unescape = true;
            }
            if cell.emit != Emit::None {
                let end = if cell.flags & NEXT != 0 { off + 1 } else { off };
                let text: String = self.chars[start..end].iter().collect();
                self.emit(cell.emit, text, start_pos, unescape && !raw, end)?;
            }
            state = cell.next;
            if cell.flags & AGAIN == 0 {
                if ch == '\n' {
                    self.line = self.line.saturating_add(1);
                    self.line_start = off + 1;
                }
                off += 1;
            }
        }
        if state != State::Main {
            return Err(unknown(start_pos));
        }
        Ok(self.lexemes)
    }

    fn push(&mut self, kind: u32, value: LexValue, pos: Position) {
        self.lexemes.push(Lexeme::new(kind, value, pos.line, pos.column));
    }

    fn emit(&mut self, kind: Emit, text: String, pos: Position, unescape: bool, end: usize) -> Result<()> {
        match kind {
            Emit::None => {}
            Emit::NewLine => self.push(LEX_NEWLINE, LexValue::Nil, pos),
            Emit::Sys => {
                let ch = text.bytes().next().unwrap_or_default();
                self.push(sys(ch), LexValue::Code(ch as u32), pos);
                match ch {
                    b'{' => {
                        if let Some(frame) = self.ifs.last_mut() {
                            frame.pair += 1;
                        }
                    }
                    b'}' => self.close_brace(pos, end),
                    _ => {}
                }
            }
            Emit::Oper => {
                if text == "=" {
                    self.push(IS_EQ, LexValue::Code(b'=' as u32), pos);
                    return Ok(());
                }
                let code = text.bytes().fold(0u32, |acc, b| (acc << 8) | b as u32);
                if !matches!(
                    code,
                    OP_NOT | OP_MUL | OP_ADD | OP_SUB | OP_DIV | OP_LESS | OP_GREAT | OP_NOT_EQ
                        | OP_AND | OP_LESS_EQ | OP_EQ_EQ | OP_GR_EQ | OP_OR
                ) {
                    return Err(unknown(pos));
                }
                self.push(LEX_OPER | (code << 8), LexValue::Code(code), pos);
            }
            Emit::Number => {
                let value = if text.contains('.') {
                    text.parse::<f64>().map(LexValue::Float)
                        .map_err(|_| Error::new(ErrorKind::InvalidNumber(text.clone()), Some(pos)))?
                } else {
                    text.parse::<i64>().map(LexValue::Int)
                        .map_err(|_| Error::new(ErrorKind::InvalidNumber(text.clone()), Some(pos)))?
                };
                self.push(LEX_NUMBER, value, pos);
            }
            Emit::Str => {
                let inner: String = {
                    let mut chars = text.chars();
                    chars.next();
                    chars.next_back();
                    chars.collect()
                };
                let value = if unescape { unescape_str(&inner) } else { inner };
                self.push(LEX_STRING, LexValue::Str(value), pos);
            }
            Emit::Ident => self.ident(text, pos)?,
        }
        Ok(())
    }

    fn ident(&mut self, text: String, pos: Position) -> Result<()> {
        if let Some(name) = text.strip_prefix('$') {
            if name.is_empty() {
                return Err(unknown(pos));
            }
            self.push(LEX_EXTEND, LexValue::Str(name.to_string()), pos);
            return Ok(());
        }
        match lookup_keyword(&text) {
            Some(KEY_TRUE) => self.push(LEX_NUMBER, LexValue::Bool(true), pos),
            Some(KEY_FALSE) => self.push(LEX_NUMBER, LexValue::Bool(false), pos),
            Some(KEY_NIL) => self.push(LEX_NUMBER, LexValue::Nil, pos),
            Some(KEY_ACTION) | Some(KEY_COND) => {
                let after_func = self
                    .lexemes
                    .last()
                    .map_or(false, |lex| lex.kind == keyword(KEY_FUNC));
                if !after_func {
                    self.push(keyword(KEY_FUNC), LexValue::Code(KEY_FUNC), pos);
                }
                self.push(LEX_IDENT, LexValue::Str(text), pos);
            }
            Some(KEY_IF) => {
                self.ifs.push(IfFrame::default());
                self.push(keyword(KEY_IF), LexValue::Code(KEY_IF), pos);
            }
            Some(KEY_ELIF) if !self.ifs.is_empty() => {
                if let Some(frame) = self.ifs.last_mut() {
                    frame.synthetic += 1;
                }
                self.push(keyword(KEY_ELSE), LexValue::Code(KEY_ELSE), pos);
                self.push(IS_LCURLY, LexValue::Code(b'{' as u32), pos);
                self.push(keyword(KEY_IF), LexValue::Code(KEY_IF), pos);
            }
            Some(id) => self.push(keyword(id), LexValue::Code(id), pos),
            None => match VarType::lookup(&text) {
                Some(ty) => {
                    let mut lex = Lexeme::new(LEX_TYPE, LexValue::Type(ty), pos.line, pos.column);
                    lex.ext = ty as u32;
                    self.lexemes.push(lex);
                }
                None => self.push(LEX_IDENT, LexValue::Str(text), pos),
            },
        }
        Ok(())
    }

    /// Closes the current `if` branch. When no `else`/`elif` follows, the
    /// braces of the injected `else {` wrappers are closed as well.
    fn close_brace(&mut self, pos: Position, end: usize) {
        let Some(frame) = self.ifs.last_mut() else {
            return;
        };
        if frame.pair == 0 {
            return;
        }
        frame.pair -= 1;
        if frame.pair > 0 {
            return;
        }
        let word = self.word_at(end);
        if word == "else" || word == "elif" {
            return;
        }
        if let Some(frame) = self.ifs.pop() {
            for _ in 0..frame.synthetic {
                self.push(IS_RCURLY, LexValue::Code(b'}' as u32), pos);
            }
        }
    }

    /// Next word of the raw input after blanks and line breaks
    fn word_at(&self, mut off: usize) -> String {
        while off < self.chars.len() && matches!(self.chars[off], ' ' | '\t' | '\r' | '\n') {
            off += 1;
        }
        self.chars[off..]
            .iter()
            .take_while(|ch| ch.is_ascii_alphanumeric() || **ch == '_')
            .collect()
    }
}

fn unknown(pos: Position) -> Error {
    Error::new(
        ErrorKind::UnknownLexeme {
            line: pos.line,
            column: pos.column,
        },
        Some(pos),
    )
}

fn unescape_str(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Lexes source text
pub fn lex(source: &str) -> Result<Vec<Lexeme>> {
    Lexer::new(source).tokenize()
}

/// Names of the contracts and functions declared at the top level of
/// `source`, found without compiling it.
pub fn contracts_list(source: &str) -> Result<Vec<String>> {
    let lexemes = lex(source)?;
    let mut list = Vec::new();
    let mut level = 0i32;
    for (i, lexeme) in lexemes.iter().enumerate() {
        match lexeme.kind {
            IS_LCURLY => level += 1,
            IS_RCURLY => level -= 1,
            kind if kind == keyword(KEY_CONTRACT) || kind == keyword(KEY_FUNC) => {
                if level != 0 {
                    continue;
                }
                if let Some(name) = lexemes.get(i + 1).and_then(|next| next.ident()) {
                    if lexemes[i + 1].category() == LEX_IDENT {
                        list.push(name.to_string());
                    }
                }
            }
            _ => {}
        }
    }
    Ok(list)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn kinds(source: &str) -> Vec<u32> {
        lex(source)
            .unwrap()
            .into_iter()
            .map(|lex| lex.kind)
            .filter(|kind| *kind != LEX_NEWLINE)
            .collect()
    }

    fn values(source: &str) -> Vec<LexValue> {
        lex(source)
            .unwrap()
            .into_iter()
            .filter(|lex| lex.kind != LEX_NEWLINE)
            .map(|lex| lex.value)
            .collect()
    }

    #[test]
    fn test_operators() {
        let oper = |code: u32| LEX_OPER | (code << 8);
        assert_eq!(
            kinds("a == b != c <= d >= e && f || !g = h < i > j + k - l * m / n"),
            vec![
                LEX_IDENT, oper(OP_EQ_EQ), LEX_IDENT, oper(OP_NOT_EQ), LEX_IDENT,
                oper(OP_LESS_EQ), LEX_IDENT, oper(OP_GR_EQ), LEX_IDENT, oper(OP_AND),
                LEX_IDENT, oper(OP_OR), oper(OP_NOT), LEX_IDENT, IS_EQ, LEX_IDENT,
                oper(OP_LESS), LEX_IDENT, oper(OP_GREAT), LEX_IDENT, oper(OP_ADD),
                LEX_IDENT, oper(OP_SUB), LEX_IDENT, oper(OP_MUL), LEX_IDENT,
                oper(OP_DIV), LEX_IDENT,
            ]
        );
    }

    #[test]
    fn test_numbers_and_literals() {
        assert_eq!(
            values("42 3.5 true false nil"),
            vec![
                LexValue::Int(42),
                LexValue::Float(3.5),
                LexValue::Bool(true),
                LexValue::Bool(false),
                LexValue::Nil,
            ]
        );
        assert!(lex("99999999999999999999").is_err());
    }

    #[test]
    fn test_strings() {
        assert_eq!(
            values(r#""a\"b\n" `raw\n` "plain""#),
            vec![
                LexValue::Str("a\"b\n".into()),
                LexValue::Str("raw\\n".into()),
                LexValue::Str("plain".into()),
            ]
        );
    }

    #[test]
    fn test_comments_and_semicolons() {
        let lexemes = lex("a // note\n/* block\n comment */ b; c").unwrap();
        let kinds: Vec<u32> = lexemes.iter().map(|l| l.kind).collect();
        assert_eq!(
            kinds,
            vec![LEX_IDENT, LEX_NEWLINE, LEX_IDENT, LEX_NEWLINE, LEX_IDENT, LEX_NEWLINE]
        );
        assert_eq!(lexemes[2].line, 3);
    }

    #[test]
    fn test_identifiers_types_and_extend() {
        let lexemes = lex("$amount @1Token money arr...").unwrap();
        assert_eq!(lexemes[0].kind, LEX_EXTEND);
        assert_eq!(lexemes[0].value, LexValue::Str("amount".into()));
        assert_eq!(lexemes[1].value, LexValue::Str("@1Token".into()));
        assert_eq!(lexemes[2].value, LexValue::Type(VarType::Money));
        assert_eq!(lexemes[3].kind, LEX_IDENT);
        assert_eq!(lexemes[4].kind, keyword(KEY_TAIL));
    }

    #[test]
    fn test_action_gets_func() {
        assert_eq!(
            kinds("conditions { } func action { }"),
            vec![
                keyword(KEY_FUNC), LEX_IDENT, IS_LCURLY, IS_RCURLY,
                keyword(KEY_FUNC), LEX_IDENT, IS_LCURLY, IS_RCURLY,
            ]
        );
    }

    #[test]
    fn test_elif_desugaring() {
        assert_eq!(
            kinds("if a { b } elif c { d } else { e }"),
            kinds("if a { b } else { if c { d } else { e } }")
        );
        assert_eq!(
            kinds("if a {\n} elif b {\n} elif c {\n}\nx"),
            kinds("if a {} else { if b {} else { if c {} } }\nx")
        );
    }

    #[test]
    fn test_unknown_lexeme() {
        let err = lex("a = 1\nb = #").unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnknownLexeme { line: 2, column: 5 });
        assert!(lex("\"open").is_err());
    }

    #[test]
    fn test_identifier_charset() {
        let err = lex("ab#c").unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnknownLexeme { line: 1, column: 3 });
        assert!(lex("total%").is_err());
        assert!(lex("naïve").is_err());
        assert_eq!(kinds("a_1 B2"), vec![LEX_IDENT, LEX_IDENT]);
    }

    #[test]
    fn test_contracts_list() {
        let list = contracts_list(
            "contract One { func inner() {} }\nfunc two() int { return 1 }\ncontract Three {}",
        )
        .unwrap();
        assert_eq!(list, vec!["One", "two", "Three"]);
    }
}

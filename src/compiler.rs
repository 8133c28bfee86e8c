//! Compiler driver: lexemes → block tree
//!
//! Walks the lexemes through the grammar table. Declarations and statements
//! are handled by the semantic actions in `handlers`, expressions by the
//! shunting-yard compiler in `expr`.

use tracing::debug;

use crate::block::{Block, BlockId, Owner};
use crate::bytecode::{ByteCode, Cmd};
use crate::error::{Error, ErrorKind, Position, Result};
use crate::grammar::{self, Next, State, SyntaxError};
use crate::grammar::{LABEL, MUST_EVAL, POP, PUSH, STAY, TO_BLOCK, TO_BODY, FORK, TO_FORK};
use crate::lexer::lex;
use crate::token::Lexeme;
use crate::vm::VM;

/// Switches that change how sources are compiled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompileOptions {
    /// Unknown identifiers followed by `(` become late-bound contract calls
    pub extern_calls: bool,
}

/// Progress through a `data` section line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum FieldStep {
    #[default]
    Start,
    Name,
    Comma,
    Type,
    Tag,
}

/// The bytecode compiler
pub struct Compiler<'vm> {
    pub(crate) vm: &'vm mut VM,
    pub(crate) lexemes: Vec<Lexeme>,
    /// Open blocks, the unit root at the bottom
    pub(crate) stack: Vec<BlockId>,
    pub(crate) owner: Owner,
    pub(crate) options: CompileOptions,
    /// Variable or parameter names waiting for their type
    pub(crate) pending: Vec<String>,
    /// Data fields waiting for their type
    pub(crate) pending_fields: Vec<usize>,
    pub(crate) field_step: FieldStep,
    pub(crate) const_name: Option<String>,
}

/// Compiles `source` into a new root block in the VM arena.
/// On failure the arena is left as it was.
pub fn compile_block(vm: &mut VM, source: &str, owner: Owner, options: CompileOptions) -> Result<BlockId> {
    let lexemes = lex(source).map_err(|err| err.with_source(source))?;
    let base = vm.blocks.len();
    let root = vm.alloc(Block::new(None, owner));
    let result = Compiler {
        vm: &mut *vm,
        lexemes,
        stack: vec![root],
        owner,
        options,
        pending: Vec::new(),
        pending_fields: Vec::new(),
        field_step: FieldStep::Start,
        const_name: None,
    }
    .compile();
    match result {
        Ok(()) => {
            debug!(root, blocks = vm.blocks.len() - base, "compiled unit");
            Ok(root)
        }
        Err(err) => {
            vm.blocks.truncate(base);
            Err(err.with_source(source))
        }
    }
}

impl<'vm> Compiler<'vm> {
    fn compile(&mut self) -> Result<()> {
        let mut state = State::Root;
        let mut fork = 0usize;
        let mut i = 0usize;

        while i < self.lexemes.len() {
            let entry = grammar::lookup(state, self.lexemes[i].kind);
            let mut next = match entry.next {
                Next::State(next) => next,
                Next::Error(err) => return Err(self.syntax(err, i)),
            };
            if entry.has(FORK) {
                fork = i;
            }
            if entry.has(TO_FORK) {
                i = fork;
            }
            if entry.has(STAY) {
                state = next;
                continue;
            }
            let at = i;
            let mut resume = i + 1;
            if next == State::Eval {
                let top = self.top();
                if entry.has(LABEL) {
                    let line = self.lexemes[i].line;
                    self.block_mut(top).code.push(ByteCode::bare(Cmd::Label, line));
                }
                let before = self.block(top).code.len();
                let start = if entry.has(TO_FORK) { i } else { i + 1 };
                resume = self.compile_eval(start, entry.has(TO_BLOCK))?;
                if entry.has(MUST_EVAL) && self.block(top).code.len() == before {
                    return Err(self.error_at(ErrorKind::MissingExpression, at));
                }
                next = state;
            }
            if entry.has(PUSH) {
                let top = self.top();
                let child = self.vm.alloc(Block::new(Some(top), self.owner));
                self.block_mut(top).children.push(child);
                self.stack.push(child);
            }
            if entry.has(POP) {
                self.pop_block(at)?;
                next = if self.stack.len() == 1 { State::Root } else { State::Body };
            }
            if entry.has(TO_BLOCK) {
                next = State::Block;
            }
            if entry.has(TO_BODY) {
                next = State::Body;
            }
            self.action(entry.action, at)?;
            state = next;
            i = resume;
        }

        if self.stack.len() > 1 {
            let last = self.lexemes.len().saturating_sub(1);
            return Err(self.syntax(SyntaxError::MustRCurly, last));
        }
        self.check_conditions()
    }

    /// Closes the top block. A `continue` left by `while` in the parent
    /// moves to the end of the loop body.
    fn pop_block(&mut self, at: usize) -> Result<()> {
        if self.stack.len() <= 1 {
            return Err(self.syntax(SyntaxError::MustLCurly, at));
        }
        let child = self.stack.pop().unwrap_or_default();
        let parent = self.top();
        let code = &self.vm.blocks[parent].code;
        let n = code.len();
        let dangling = n >= 2
            && code[n - 1].cmd == Cmd::Continue
            && code[n - 2].cmd == Cmd::While
            && code[n - 2].block() == Some(child);
        if dangling {
            if let Some(cont) = self.vm.blocks[parent].code.pop() {
                self.vm.blocks[child].code.push(cont);
            }
        }
        Ok(())
    }

    /// `conditions` must not reach anything that writes
    fn check_conditions(&self) -> Result<()> {
        let root = self.stack[0];
        for &child in &self.block(root).children {
            let block = self.block(child);
            if block.contract().is_none() {
                continue;
            }
            if let Some(cond) = block.objects.get("conditions").and_then(|obj| obj.block()) {
                if self.block(cond).can_write() {
                    return Err(ErrorKind::ConditionsWrite.into());
                }
            }
        }
        Ok(())
    }

    pub(crate) fn top(&self) -> BlockId {
        self.stack.last().copied().unwrap_or_default()
    }

    /// Block right under the top of the stack
    pub(crate) fn parent(&self) -> BlockId {
        let n = self.stack.len();
        if n >= 2 {
            self.stack[n - 2]
        } else {
            self.stack[0]
        }
    }

    pub(crate) fn block(&self, id: BlockId) -> &Block {
        &self.vm.blocks[id]
    }

    pub(crate) fn block_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.vm.blocks[id]
    }

    /// Marks every open block as able to modify the database
    pub(crate) fn set_writable(&mut self) {
        for &id in &self.stack {
            self.vm.blocks[id].set_writable();
        }
    }

    pub(crate) fn position(&self, i: usize) -> Option<Position> {
        self.lexemes
            .get(i)
            .map(|lex| Position::new(lex.line, lex.column))
    }

    pub(crate) fn error_at(&self, kind: ErrorKind, i: usize) -> Error {
        Error::new(kind, self.position(i))
    }

    fn syntax(&self, err: SyntaxError, i: usize) -> Error {
        let (lexeme, line, column) = match self.lexemes.get(i) {
            Some(lex) => (lex.to_string(), lex.line, lex.column),
            None => (String::new(), 0, 0),
        };
        Error::new(
            ErrorKind::Syntax {
                code: err.code(),
                message: err.message(),
                lexeme,
                line,
                column,
            },
            self.position(i),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::ObjInfo;

    fn compile(source: &str) -> Result<(VM, BlockId)> {
        let mut vm = VM::new();
        let root = compile_block(&mut vm, source, Owner::state(1), CompileOptions::default())?;
        Ok((vm, root))
    }

    #[test]
    fn test_while_continue_moves_into_body() {
        let (vm, root) = compile("func f() {\n var i int\n while i < 3 { i = i + 1 }\n}").unwrap();
        let func = match vm.blocks[root].objects.get("f") {
            Some(ObjInfo::Func(id)) => *id,
            other => panic!("unexpected {:?}", other),
        };
        let code = &vm.blocks[func].code;
        assert_eq!(code.first().map(|c| c.cmd), Some(Cmd::Label));
        let last = code.last().unwrap();
        assert_eq!(last.cmd, Cmd::While);
        let body = last.block().unwrap();
        assert_eq!(vm.blocks[body].code.last().map(|c| c.cmd), Some(Cmd::Continue));
    }

    #[test]
    fn test_syntax_errors() {
        let err = compile("func f( { }").unwrap_err();
        assert!(err.to_string().starts_with("wrong parameters {"), "{}", err);

        let err = compile("func f() {\n if {\n}\n}").unwrap_err();
        assert!(matches!(err.kind, ErrorKind::MissingExpression));

        let err = compile("contract { }").unwrap_err();
        assert!(err.to_string().starts_with("must be the name {"));

        let err = compile("func f() {").unwrap_err();
        assert!(matches!(err.kind, ErrorKind::Syntax { message: "must be '}'", .. }));

        let err = compile("return 1").unwrap_err();
        assert!(err.to_string().starts_with("unknown command return"));
    }

    #[test]
    fn test_failed_compile_restores_arena() {
        let mut vm = VM::new();
        let before = vm.blocks.len();
        assert!(compile_block(&mut vm, "func f() { x = 1 }", Owner::state(1), CompileOptions::default()).is_err());
        assert_eq!(vm.blocks.len(), before);
    }
}

//! Expression compiler
//!
//! Operators go through a shunting yard: operands are emitted directly,
//! operators wait in a buffer until an operator of lower priority, a closing
//! bracket or the end of the expression flushes them. Calls keep a counter
//! of their arguments so the count can be baked into variadic calls.
//!
//! Map and array literals use a small grammar of their own. Their items are
//! resolved when the literal runs, so variables are read each time.

use std::rc::Rc;

use crate::block::{state_name, BlockId, ExtFuncInfo, ObjInfo};
use crate::bytecode::{AssignTarget, ByteCode, Cmd, MapItem, Operand};
use crate::compiler::Compiler;
use crate::error::{ErrorKind, Result};
use crate::token::*;
use crate::value::Value;

/// Callee of a pending call
#[derive(Debug, Clone)]
enum Target {
    Func(BlockId),
    Ext(Rc<ExtFuncInfo>),
    /// `$name(...)` resolved when the call runs
    Extend(String),
}

#[derive(Debug, Clone)]
struct PendingCall {
    target: Target,
    /// Rewritten contract call; the contract name is already pushed
    contract: bool,
    /// `CallContract`; the state id is already pushed
    state_arg: bool,
    /// Argument count of the base call while chained segments are compiled
    count: Option<usize>,
    line: u16,
}

#[derive(Debug, Clone)]
enum Pending {
    Op(Cmd),
    /// `(`, either grouping or call arguments
    Paren { call: bool },
    /// `[` of an index
    Index,
    Call(PendingCall),
    /// `.Name(` segment of a chained call
    Chain(String),
}

impl<'vm> Compiler<'vm> {
    /// Compiles one expression starting at lexeme `start` into the top block.
    /// Returns the index of the first lexeme that is not part of it.
    pub(crate) fn compile_eval(&mut self, start: usize, block_follows: bool) -> Result<usize> {
        let mut code: Vec<ByteCode> = Vec::new();
        let mut buffer: Vec<Pending> = Vec::new();
        let mut parcount: Vec<usize> = Vec::new();
        let mut set_index = false;
        let mut expect_operand = true;
        let mut prev: Option<u32> = None;
        let mut i = start;

        while i < self.lexemes.len() {
            let lexeme = self.lexemes[i].clone();
            let line = lexeme.line;
            match lexeme.kind {
                LEX_NEWLINE => {
                    let open = buffer
                        .iter()
                        .any(|p| matches!(p, Pending::Paren { .. } | Pending::Index));
                    if !open {
                        break;
                    }
                    i += 1;
                    continue;
                }
                IS_LCURLY => {
                    if !expect_operand || (block_follows && prev.is_none()) {
                        break;
                    }
                    let (items, next) = self.init_map(i)?;
                    code.push(ByteCode::new(Cmd::MapInit, line, Operand::Map(items)));
                    expect_operand = false;
                    prev = Some(IS_RCURLY);
                    i = next;
                    continue;
                }
                IS_RCURLY => break,
                IS_LBRACK => {
                    if expect_operand {
                        let (items, next) = self.init_array(i)?;
                        code.push(ByteCode::new(Cmd::ArrayInit, line, Operand::Array(items)));
                        expect_operand = false;
                        prev = Some(IS_RBRACK);
                        i = next;
                        continue;
                    }
                    buffer.push(Pending::Index);
                    expect_operand = true;
                }
                IS_RBRACK => {
                    if expect_operand {
                        return Err(self.error_at(ErrorKind::EndOfExpression, i));
                    }
                    self.flush_until(&mut buffer, &mut code, i, |p| matches!(p, Pending::Index))?;
                    match self.lexemes.get(i + 1).map(|l| l.kind) {
                        Some(IS_LBRACK) => return Err(self.error_at(ErrorKind::MultiIndex, i + 1)),
                        Some(IS_EQ) if buffer.is_empty() => {
                            set_index = true;
                            expect_operand = true;
                            prev = Some(IS_EQ);
                            i += 2;
                            continue;
                        }
                        _ => code.push(ByteCode::bare(Cmd::Index, line)),
                    }
                }
                IS_LPAR => {
                    if !expect_operand {
                        break;
                    }
                    buffer.push(Pending::Paren { call: false });
                }
                IS_RPAR => {
                    if prev == Some(IS_COMMA) || (expect_operand && prev != Some(IS_LPAR)) {
                        return Err(self.error_at(ErrorKind::EndOfExpression, i));
                    }
                    let call = self.flush_until(&mut buffer, &mut code, i, |p| {
                        matches!(p, Pending::Paren { .. })
                    })?;
                    expect_operand = false;
                    if matches!(call, Pending::Paren { call: true }) {
                        let mut count = parcount.pop().unwrap_or_default();
                        if prev != Some(IS_LPAR) {
                            count += 1;
                        }
                        if let Some(next) = self.close_call(&mut buffer, &mut parcount, &mut code, count, i)? {
                            prev = Some(IS_LPAR);
                            expect_operand = true;
                            i = next + 1;
                            continue;
                        }
                    }
                }
                IS_COMMA => {
                    if expect_operand {
                        return Err(self.error_at(ErrorKind::EndOfExpression, i));
                    }
                    while let Some(Pending::Op(cmd)) = buffer.last() {
                        code.push(ByteCode::bare(*cmd, line));
                        buffer.pop();
                    }
                    if let Some(Pending::Paren { call: true }) = buffer.last() {
                        if let Some(count) = parcount.last_mut() {
                            *count += 1;
                        }
                    }
                    expect_operand = true;
                }
                kind if kind & 0xff == LEX_OPER => {
                    let LexValue::Code(op) = lexeme.value else {
                        return Err(self.error_at(ErrorKind::UnknownOperator(lexeme.to_string()), i));
                    };
                    let op = if op == OP_SUB && expect_operand { OP_SIGN } else { op };
                    let Some(cmd) = Cmd::from_operator(op) else {
                        return Err(self.error_at(ErrorKind::UnknownOperator(lexeme.to_string()), i));
                    };
                    if cmd.arity() == 1 {
                        if !expect_operand {
                            return Err(self.error_at(ErrorKind::UnexpectedOperator, i));
                        }
                        buffer.push(Pending::Op(cmd));
                    } else {
                        if expect_operand {
                            return Err(self.error_at(ErrorKind::UnexpectedOperator, i));
                        }
                        while let Some(Pending::Op(top)) = buffer.last() {
                            if top.priority() < cmd.priority() {
                                break;
                            }
                            code.push(ByteCode::bare(*top, line));
                            buffer.pop();
                        }
                        buffer.push(Pending::Op(cmd));
                        expect_operand = true;
                    }
                }
                LEX_NUMBER | LEX_STRING => {
                    if !expect_operand {
                        break;
                    }
                    let value = match lexeme.value {
                        LexValue::Int(n) => Value::Int(n),
                        LexValue::Float(f) => Value::Float(f),
                        LexValue::Bool(b) => Value::Bool(b),
                        LexValue::Str(s) => Value::Str(s),
                        _ => Value::Nil,
                    };
                    code.push(ByteCode::new(Cmd::Push, line, Operand::Value(value)));
                    expect_operand = false;
                }
                LEX_IDENT | LEX_EXTEND => {
                    if !expect_operand {
                        break;
                    }
                    let name = lexeme.ident().unwrap_or_default().to_string();
                    let is_call = self.lexemes.get(i + 1).map(|l| l.kind) == Some(IS_LPAR);
                    if is_call {
                        let call = if lexeme.kind == LEX_EXTEND {
                            PendingCall {
                                target: Target::Extend(name),
                                contract: false,
                                state_arg: false,
                                count: None,
                                line,
                            }
                        } else {
                            self.open_call(&name, i, &mut code)?
                        };
                        buffer.push(Pending::Call(call));
                        buffer.push(Pending::Paren { call: true });
                        parcount.push(0);
                        prev = Some(IS_LPAR);
                        i += 2;
                        continue;
                    }
                    if lexeme.kind == LEX_EXTEND {
                        code.push(ByteCode::new(Cmd::ExtendVar, line, Operand::Extend(name)));
                    } else {
                        match self.find_var(&name) {
                            Some(AssignTarget::Var(var)) => {
                                code.push(ByteCode::new(Cmd::Var, line, Operand::Var(var)))
                            }
                            Some(AssignTarget::Extend(name)) => {
                                code.push(ByteCode::new(Cmd::ExtendVar, line, Operand::Extend(name)))
                            }
                            None => return Err(self.error_at(ErrorKind::UnknownIdent(name), i)),
                        }
                    }
                    expect_operand = false;
                }
                kind if kind == keyword(KEY_TAIL) => {
                    if expect_operand {
                        return Err(self.error_at(ErrorKind::MustTail, i));
                    }
                    code.push(ByteCode::bare(Cmd::UnwrapArr, line));
                }
                _ => break,
            }
            prev = Some(lexeme.kind);
            i += 1;
        }

        if matches!(prev, Some(kind) if kind == IS_COMMA || kind & 0xff == LEX_OPER) {
            return Err(self.error_at(ErrorKind::EndOfExpression, i.min(self.lexemes.len() - 1)));
        }
        while let Some(pending) = buffer.pop() {
            match pending {
                Pending::Op(cmd) => {
                    let line = self.lexemes.get(i).map_or(0, |l| l.line);
                    code.push(ByteCode::bare(cmd, line));
                }
                _ => return Err(self.error_at(ErrorKind::NoPair, i.min(self.lexemes.len() - 1))),
            }
        }
        if set_index {
            let line = self.lexemes.get(i).map_or(0, |l| l.line);
            code.push(ByteCode::bare(Cmd::SetIndex, line));
        }
        let top = self.top();
        self.block_mut(top).code.append(&mut code);
        Ok(i)
    }

    /// Moves operators to the output up to the first entry matching `stop`,
    /// which is removed and returned
    fn flush_until(
        &self,
        buffer: &mut Vec<Pending>,
        code: &mut Vec<ByteCode>,
        i: usize,
        stop: impl Fn(&Pending) -> bool,
    ) -> Result<Pending> {
        let line = self.lexemes[i].line;
        while let Some(pending) = buffer.pop() {
            if stop(&pending) {
                return Ok(pending);
            }
            match pending {
                Pending::Op(cmd) => code.push(ByteCode::bare(cmd, line)),
                _ => return Err(self.error_at(ErrorKind::NoPair, i)),
            }
        }
        Err(self.error_at(ErrorKind::NoPair, i))
    }

    /// Resolves a function, extension or contract by name, looking through
    /// the open blocks first and then the VM
    pub(crate) fn find_obj(&self, name: &str) -> Option<ObjInfo> {
        let qualified = state_name(self.owner.state_id, name);
        for key in [name, qualified.as_str()] {
            for &id in self.stack.iter().rev() {
                if let Some(obj) = self.block(id).objects.get(key) {
                    return Some(obj.clone());
                }
            }
            if let Some(obj) = self.vm.objects.get(key) {
                return Some(obj.clone());
            }
        }
        None
    }

    fn exec_contract(&self, i: usize) -> Result<Rc<ExtFuncInfo>> {
        match self.vm.objects.get("ExecContract") {
            Some(ObjInfo::ExtFunc(ext)) => Ok(ext.clone()),
            _ => Err(self.error_at(ErrorKind::UnknownFunction("ExecContract".into()), i)),
        }
    }

    /// Handles `name(` and emits the leading arguments of rewritten calls
    fn open_call(&mut self, name: &str, i: usize, code: &mut Vec<ByteCode>) -> Result<PendingCall> {
        let line = self.lexemes[i].line;
        let mut call = PendingCall {
            target: Target::Extend(String::new()),
            contract: false,
            state_arg: false,
            count: None,
            line,
        };
        match self.find_obj(name) {
            Some(ObjInfo::Func(id)) => call.target = Target::Func(id),
            Some(ObjInfo::ExtFunc(ext)) => {
                if ext.name == "CallContract" {
                    let state = Value::Int(self.owner.state_id as i64);
                    code.push(ByteCode::new(Cmd::Push, line, Operand::Value(state)));
                    call.state_arg = true;
                }
                call.target = Target::Ext(ext);
            }
            Some(ObjInfo::Contract(id)) => {
                let target = self
                    .block(id)
                    .contract()
                    .map(|info| (info.name.clone(), info.used.clone(), info.can_write))
                    .unwrap_or_default();
                let (full, used, can_write) = target;
                self.check_recursion(&full, &used, i)?;
                for &open in &self.stack {
                    if let Some(info) = self.vm.blocks[open].contract_mut() {
                        info.used.insert(full.clone());
                    }
                }
                if can_write {
                    self.set_writable();
                }
                code.push(ByteCode::new(Cmd::Push, line, Operand::Value(Value::Str(full))));
                call.target = Target::Ext(self.exec_contract(i)?);
                call.contract = true;
            }
            None if self.options.extern_calls => {
                let full = state_name(self.owner.state_id, name);
                code.push(ByteCode::new(Cmd::Push, line, Operand::Value(Value::Str(full))));
                call.target = Target::Ext(self.exec_contract(i)?);
                call.contract = true;
            }
            _ => return Err(self.error_at(ErrorKind::UnknownIdent(name.to_string()), i)),
        }
        Ok(call)
    }

    /// A contract may not reach itself through contract calls
    fn check_recursion(&self, target: &str, used: &std::collections::HashSet<String>, i: usize) -> Result<()> {
        let mut current = None;
        for &id in self.stack.iter().rev() {
            if let Some(info) = self.block(id).contract() {
                if info.name == target {
                    return Err(self.error_at(ErrorKind::Recursion, i));
                }
                current.get_or_insert(info.name.clone());
            }
        }
        if let Some(current) = current {
            if used.contains(&current) {
                return Err(self.error_at(ErrorKind::Recursion, i));
            }
        }
        Ok(())
    }

    /// Finishes the call whose argument list just closed. Returns the index
    /// of the `(` of a chained segment when one follows.
    fn close_call(
        &mut self,
        buffer: &mut Vec<Pending>,
        parcount: &mut Vec<usize>,
        code: &mut Vec<ByteCode>,
        count: usize,
        i: usize,
    ) -> Result<Option<usize>> {
        let line = self.lexemes[i].line;
        if let Some(Pending::Chain(name)) = buffer.last() {
            let name = name.clone();
            buffer.pop();
            code.push(ByteCode::new(Cmd::FuncName, line, Operand::FuncName { name, count }));
        }
        let Some(Pending::Call(call)) = buffer.last().cloned() else {
            return Err(self.error_at(ErrorKind::NoPair, i));
        };
        let count = call.count.unwrap_or(count);

        if let Target::Func(id) = call.target {
            let names = self.block(id).func().and_then(|info| info.names.clone());
            if let Some(names) = names {
                if code.last().map(|c| c.cmd) != Some(Cmd::FuncName) {
                    code.push(ByteCode::new(Cmd::Push, line, Operand::Value(Value::Nil)));
                }
                let chained = self.lexemes.get(i + 1).map(|l| l.kind) == Some(IS_DOT)
                    && self.lexemes.get(i + 3).map(|l| l.kind) == Some(IS_LPAR);
                if chained {
                    let segment = self.lexemes[i + 2].ident().unwrap_or_default().to_string();
                    if !names.contains_key(&segment) {
                        return Err(self.error_at(ErrorKind::UnknownFunction(segment), i + 2));
                    }
                    if let Some(Pending::Call(pending)) = buffer.last_mut() {
                        pending.count = Some(count);
                    }
                    buffer.push(Pending::Chain(segment));
                    buffer.push(Pending::Paren { call: true });
                    parcount.push(0);
                    return Ok(Some(i + 3));
                }
            }
        }
        buffer.pop();

        match &call.target {
            Target::Func(id) => {
                let Some(info) = self.block(*id).func() else {
                    return Err(self.error_at(ErrorKind::UnknownFunction(String::new()), i));
                };
                let want = info.params.len();
                let ok = if info.variadic { count + 1 >= want } else { count == want };
                if !ok {
                    return Err(self.error_at(ErrorKind::WrongParams(info.name.clone(), want), i));
                }
                let variadic = info.variadic;
                if info.can_write {
                    self.set_writable();
                }
                let obj = Operand::Call(ObjInfo::Func(*id));
                if variadic {
                    code.push(ByteCode::new(Cmd::Push, line, Operand::Value(Value::Int(count as i64))));
                    code.push(ByteCode::new(Cmd::CallVariadic, call.line, obj));
                } else {
                    code.push(ByteCode::new(Cmd::Call, call.line, obj));
                }
            }
            Target::Ext(ext) => {
                let mut count = count;
                if call.contract {
                    if count == 0 {
                        code.push(ByteCode::new(Cmd::Push, line, Operand::Value(Value::Str(String::new()))));
                        count = 2;
                    } else {
                        count += 1;
                    }
                }
                if call.state_arg {
                    count += 1;
                }
                let want = ext.params.len();
                let ok = if ext.variadic { count + 1 >= want } else { count == want };
                if !ok {
                    return Err(self.error_at(ErrorKind::WrongParams(ext.name.clone(), want), i));
                }
                if ext.can_write {
                    self.set_writable();
                }
                let obj = Operand::Call(ObjInfo::ExtFunc(ext.clone()));
                if ext.variadic {
                    code.push(ByteCode::new(Cmd::Push, line, Operand::Value(Value::Int(count as i64))));
                    code.push(ByteCode::new(Cmd::CallVariadic, call.line, obj));
                } else {
                    code.push(ByteCode::new(Cmd::Call, call.line, obj));
                }
            }
            Target::Extend(name) => {
                code.push(ByteCode::new(Cmd::Push, line, Operand::Value(Value::Int(count as i64))));
                code.push(ByteCode::new(Cmd::CallExtend, call.line, Operand::Extend(name.clone())));
            }
        }
        Ok(None)
    }

    /// `{ "key": value, ... }` starting at the `{` of lexeme `i`
    fn init_map(&self, mut i: usize) -> Result<(Vec<(String, MapItem)>, usize)> {
        let mut items = Vec::new();
        let mut key: Option<String> = None;
        let mut need_comma = false;
        i += 1;
        loop {
            let Some(lexeme) = self.lexemes.get(i) else {
                return Err(self.error_at(ErrorKind::UnclosedMap, i.saturating_sub(1)));
            };
            if lexeme.kind == LEX_NEWLINE {
                i += 1;
                continue;
            }
            if let Some(name) = key.take() {
                if lexeme.kind != IS_COLON {
                    return Err(self.error_at(ErrorKind::ExpectedColon, i));
                }
                let (item, next) = self.init_value(i + 1)?;
                items.push((name, item));
                need_comma = true;
                i = next;
                continue;
            }
            match lexeme.kind {
                IS_RCURLY => return Ok((items, i + 1)),
                IS_COMMA if need_comma => need_comma = false,
                _ if need_comma => return Err(self.error_at(ErrorKind::ExpectedComma, i)),
                LEX_STRING | LEX_IDENT => {
                    key = Some(match &lexeme.value {
                        LexValue::Str(s) => s.clone(),
                        other => other.to_string(),
                    })
                }
                _ => return Err(self.error_at(ErrorKind::ExpectedKey, i)),
            }
            i += 1;
        }
    }

    /// `[ value, ... ]` starting at the `[` of lexeme `i`
    fn init_array(&self, mut i: usize) -> Result<(Vec<MapItem>, usize)> {
        let mut items = Vec::new();
        let mut need_comma = false;
        i += 1;
        loop {
            let Some(lexeme) = self.lexemes.get(i) else {
                return Err(self.error_at(ErrorKind::UnclosedArray, i.saturating_sub(1)));
            };
            match lexeme.kind {
                LEX_NEWLINE => {}
                IS_RBRACK => return Ok((items, i + 1)),
                IS_COMMA if need_comma => need_comma = false,
                _ if need_comma => return Err(self.error_at(ErrorKind::ExpectedComma, i)),
                _ => {
                    let (item, next) = self.init_value(i)?;
                    items.push(item);
                    need_comma = true;
                    i = next;
                    continue;
                }
            }
            i += 1;
        }
    }

    fn init_value(&self, mut i: usize) -> Result<(MapItem, usize)> {
        while self.lexemes.get(i).map(|l| l.kind) == Some(LEX_NEWLINE) {
            i += 1;
        }
        let Some(lexeme) = self.lexemes.get(i) else {
            return Err(self.error_at(ErrorKind::ExpectedValue, i.saturating_sub(1)));
        };
        let item = match (lexeme.kind, &lexeme.value) {
            (LEX_NUMBER, LexValue::Int(n)) => MapItem::Const(Value::Int(*n)),
            (LEX_NUMBER, LexValue::Float(f)) => MapItem::Const(Value::Float(*f)),
            (LEX_NUMBER, LexValue::Bool(b)) => MapItem::Const(Value::Bool(*b)),
            (LEX_NUMBER, _) => MapItem::Const(Value::Nil),
            (LEX_STRING, LexValue::Str(s)) => MapItem::Const(Value::Str(s.clone())),
            (LEX_EXTEND, LexValue::Str(name)) => MapItem::Extend(name.clone()),
            (LEX_IDENT, LexValue::Str(name)) => match self.find_var(name) {
                Some(AssignTarget::Var(var)) => MapItem::Var(var),
                Some(AssignTarget::Extend(name)) => MapItem::Extend(name),
                None => return Err(self.error_at(ErrorKind::UnknownIdent(name.clone()), i)),
            },
            (IS_LCURLY, _) => {
                let (items, next) = self.init_map(i)?;
                return Ok((MapItem::Map(items), next));
            }
            (IS_LBRACK, _) => {
                let (items, next) = self.init_array(i)?;
                return Ok((MapItem::Array(items), next));
            }
            _ => return Err(self.error_at(ErrorKind::ExpectedValue, i)),
        };
        Ok((item, i + 1))
    }
}

#[cfg(test)]
mod tests {
    use crate::block::{ObjInfo, Owner};
    use crate::bytecode::Cmd;
    use crate::compiler::{compile_block, CompileOptions};
    use crate::error::ErrorKind;
    use crate::vm::VM;

    fn body(source: &str) -> Vec<Cmd> {
        let mut vm = VM::new();
        let root = compile_block(&mut vm, source, Owner::state(1), CompileOptions::default()).unwrap();
        let Some(ObjInfo::Func(id)) = vm.blocks[root].objects.get("f").cloned() else {
            panic!("no f");
        };
        vm.blocks[id].code.iter().map(|c| c.cmd).collect()
    }

    fn compile_err(source: &str) -> ErrorKind {
        let mut vm = VM::new();
        compile_block(&mut vm, source, Owner::state(1), CompileOptions::default())
            .unwrap_err()
            .kind
    }

    #[test]
    fn test_precedence() {
        assert_eq!(
            body("func f() int { return 1 + 2 * 3 }"),
            vec![Cmd::Push, Cmd::Push, Cmd::Push, Cmd::Mul, Cmd::Add, Cmd::Return]
        );
        assert_eq!(
            body("func f() int { return (1 + 2) * 3 }"),
            vec![Cmd::Push, Cmd::Push, Cmd::Add, Cmd::Push, Cmd::Mul, Cmd::Return]
        );
    }

    #[test]
    fn test_unary() {
        assert_eq!(
            body("func f() int { return - -2 * 3 }"),
            vec![Cmd::Push, Cmd::Sign, Cmd::Sign, Cmd::Push, Cmd::Mul, Cmd::Return]
        );
        assert_eq!(
            body("func f() bool { return !true && false }"),
            vec![Cmd::Push, Cmd::Not, Cmd::Push, Cmd::And, Cmd::Return]
        );
    }

    #[test]
    fn test_index_and_set_index() {
        assert_eq!(
            body("func f() { var m map\n m[\"a\"] = 1\n $x = m[\"a\"] }"),
            vec![
                Cmd::Var, Cmd::Push, Cmd::Push, Cmd::SetIndex,
                Cmd::AssignVar, Cmd::Var, Cmd::Push, Cmd::Index, Cmd::Assign,
            ]
        );
        assert_eq!(
            compile_err("func f() { var m array\n m[0][1] = 1 }"),
            ErrorKind::MultiIndex
        );
    }

    #[test]
    fn test_literals() {
        assert_eq!(
            body("func f() { var a int\n $m = {\"x\": a, \"y\": [1, $z, {\"k\": \"v\"}]} }"),
            vec![Cmd::AssignVar, Cmd::MapInit, Cmd::Assign]
        );
        assert_eq!(compile_err("func f() { $m = {\"x\" 1} }"), ErrorKind::ExpectedColon);
        assert_eq!(compile_err("func f() { $m = [1 2] }"), ErrorKind::ExpectedComma);
    }

    #[test]
    fn test_expression_errors() {
        assert_eq!(compile_err("func f() int { return 1 + }"), ErrorKind::EndOfExpression);
        assert_eq!(compile_err("func f() int { return 1 + * 2 }"), ErrorKind::UnexpectedOperator);
        assert_eq!(compile_err("func f() int { return (1 + 2 }"), ErrorKind::NoPair);
        assert_eq!(compile_err("func f() int { return g() }"), ErrorKind::UnknownIdent("g".into()));
        assert_eq!(
            compile_err("func g(a int) int { return a }\nfunc f() int { return g(1, 2) }"),
            ErrorKind::WrongParams("g".into(), 1)
        );
    }

    #[test]
    fn test_chained_call() {
        let cmds = body(
            "func q(t string).Where(w string).Limit(n int) string { return t }\n\
             func f() string { return q(\"a\").Where(\"b\").Limit(3) }",
        );
        assert_eq!(
            cmds,
            vec![
                Cmd::Push, Cmd::Push, Cmd::Push, Cmd::FuncName,
                Cmd::Push, Cmd::FuncName, Cmd::Call, Cmd::Return,
            ]
        );
    }
}

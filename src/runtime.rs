//! Bytecode interpreter
//!
//! Blocks run recursively: `if`, `else` and `while` bodies and function
//! calls each enter [`Runtime::run_block`]. Control flow leaves a block as a
//! [`Status`] rather than through the error channel. Every block entry may
//! move execution onto a fresh stack segment, so nesting is bounded by
//! `max_call_depth` and the cost budget, never by the native stack.
//!
//! Variables live in one flat vector. Every running block owns a window of
//! it that starts at the offset recorded in its frame.

use std::mem;
use std::rc::Rc;
use std::time::Instant;

use serde_json::json;

use crate::arith;
use crate::block::{BlockId, ExtFuncInfo, ObjInfo};
use crate::bytecode::{AssignTarget, ByteCode, Cmd, MapItem, Operand, VarRef};
use crate::config::Limits;
use crate::error::{ErrorKind, Result};
use crate::value::{Map, Value, VarType};
use crate::vm::VM;

/// Remaining native stack below which a block entry switches segments
const RED_ZONE: usize = 256 * 1024;
/// Size of each new stack segment
const STACK_PER_SEGMENT: usize = 4 * 1024 * 1024;

/// How a block finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Normal,
    Return,
    Continue,
    Break,
}

#[derive(Debug, Clone, Copy)]
struct Frame {
    block: BlockId,
    offset: usize,
}

/// State of one execution
pub struct Runtime<'a> {
    pub vm: &'a VM,
    stack: Vec<Value>,
    frames: Vec<Frame>,
    vars: Vec<Value>,
    /// Environment shared by `$name` variables and contract calls
    pub env: Map,
    /// Remaining cost
    pub cost: i64,
    mem: i64,
    depth: usize,
    /// Spread the array argument of the next variadic call
    unwrap: bool,
    deadline: Option<Instant>,
    /// Line of the innermost failing command not yet claimed by a function frame
    err_line: Option<u16>,
}

impl<'a> Runtime<'a> {
    pub fn new(vm: &'a VM, env: Map, cost: i64, deadline: Option<Instant>) -> Self {
        Self {
            vm,
            stack: Vec::new(),
            frames: Vec::new(),
            vars: Vec::new(),
            env,
            cost,
            mem: 0,
            depth: 0,
            unwrap: false,
            deadline,
            err_line: None,
        }
    }

    pub fn limits(&self) -> &'a Limits {
        &self.vm.limits
    }

    /// Deducts `amount` from the remaining cost
    pub fn charge(&mut self, amount: i64) -> Result<()> {
        self.cost -= amount;
        if self.cost <= 0 {
            return Err(ErrorKind::CostLimit.into());
        }
        Ok(())
    }

    /// Runs a function block with positional arguments and returns its results
    pub fn run(&mut self, id: BlockId, params: Vec<Value>) -> Result<Vec<Value>> {
        let block = &self.vm.blocks[id];
        let slots = match block.func() {
            Some(info) => {
                if params.len() != info.params.len() && !info.variadic {
                    return Err(ErrorKind::WrongParams(info.name.clone(), info.params.len()).into());
                }
                let mut params = params;
                if info.variadic {
                    let fixed = info.params.len().saturating_sub(1);
                    if params.len() < fixed {
                        return Err(ErrorKind::WrongParams(info.name.clone(), info.params.len()).into());
                    }
                    let tail = params.split_off(fixed);
                    params.push(Value::array(tail));
                }
                check_params(&info.params, &mut params)?;
                params
            }
            None => params,
        };
        let base = self.stack.len();
        self.run_block(id, slots)?;
        Ok(self.stack.split_off(base))
    }

    /// Runs a block. `slots` fill the first variable slots; the rest take the
    /// default value of their type.
    pub fn run_block(&mut self, id: BlockId, slots: Vec<Value>) -> Result<Status> {
        stacker::maybe_grow(RED_ZONE, STACK_PER_SEGMENT, || self.enter_block(id, slots))
    }

    fn enter_block(&mut self, id: BlockId, mut slots: Vec<Value>) -> Result<Status> {
        let vm = self.vm;
        let block = &vm.blocks[id];
        for ty in block.vars.iter().skip(slots.len()) {
            slots.push(ty.default_value());
        }
        let offset = self.vars.len();
        let base = self.stack.len();
        self.mem += slots.iter().map(Value::mem_size).sum::<i64>();
        self.vars.append(&mut slots);
        self.frames.push(Frame { block: id, offset });

        let result = self.exec(id);

        self.frames.pop();
        let released: i64 = self.vars.drain(offset..).map(|v| v.mem_size()).sum();
        self.mem = (self.mem - released).max(0);

        let status = result?;
        let Some(info) = block.func() else {
            if status != Status::Return {
                self.stack.truncate(base);
            }
            return Ok(status);
        };
        if status == Status::Return {
            let want = info.results.len();
            if self.stack.len() < base + want {
                return Err(ErrorKind::WrongResults(info.name.clone(), want).into());
            }
            let results = self.stack.split_off(self.stack.len() - want);
            self.stack.truncate(base);
            self.stack.extend(results);
        } else {
            self.stack.truncate(base);
        }
        Ok(Status::Normal)
    }

    /// Name of a function block in error trailers
    fn frame_name(&self, id: BlockId) -> Option<String> {
        let block = &self.vm.blocks[id];
        let info = block.func().filter(|info| !info.hidden)?;
        let contract = block
            .parent
            .and_then(|parent| self.vm.blocks[parent].contract());
        Some(match contract {
            Some(contract) => format!("{}.{}", contract.name, info.name),
            None => info.name.clone(),
        })
    }

    fn exec(&mut self, id: BlockId) -> Result<Status> {
        let vm = self.vm;
        let code = &vm.blocks[id].code;
        let mut ci = 0usize;
        let mut labels: Vec<usize> = Vec::new();
        let mut last_cond = false;
        let mut assign: Vec<AssignTarget> = Vec::new();

        while ci < code.len() {
            let cmd = &code[ci];
            match self.step(cmd, &mut ci, &mut labels, &mut last_cond, &mut assign) {
                Ok(Status::Normal) => {}
                Ok(status) => return Ok(status),
                Err(mut err) => {
                    match self.frame_name(id) {
                        Some(name) => {
                            let line = self.err_line.take().unwrap_or(cmd.line);
                            err.push_frame(&name, line);
                        }
                        None => {
                            self.err_line.get_or_insert(cmd.line);
                        }
                    }
                    return Err(err);
                }
            }
            ci += 1;
        }
        Ok(Status::Normal)
    }

    fn step(
        &mut self,
        cmd: &ByteCode,
        ci: &mut usize,
        labels: &mut Vec<usize>,
        last_cond: &mut bool,
        assign: &mut Vec<AssignTarget>,
    ) -> Result<Status> {
        self.charge(1)?;
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(ErrorKind::TimeLimit.into());
            }
        }
        if self.mem > self.vm.limits.max_mem {
            return Err(ErrorKind::MemoryLimit.into());
        }

        match (cmd.cmd, &cmd.value) {
            (Cmd::Push, Operand::Value(value)) => self.stack.push(value.clone()),
            (Cmd::Var, Operand::Var(var)) => {
                let value = self.var(var)?.clone();
                self.stack.push(value);
            }
            (Cmd::ExtendVar, Operand::Extend(name)) => {
                let value = self
                    .env
                    .get(name)
                    .cloned()
                    .ok_or_else(|| ErrorKind::UnknownExtend(name.clone()))?;
                self.stack.push(value);
            }
            (Cmd::CallExtend, Operand::Extend(name)) => {
                let count = self.pop()?.to_int()? as usize;
                let ext = match self.vm.objects.get(name) {
                    Some(ObjInfo::ExtFunc(ext)) => ext.clone(),
                    _ => return Err(ErrorKind::UnknownFunction(name.clone()).into()),
                };
                self.call_ext(&ext, Some(count))?;
            }
            (Cmd::Call, Operand::Call(obj)) => self.call(obj, None)?,
            (Cmd::CallVariadic, Operand::Call(obj)) => {
                let count = self.pop()?.to_int()? as usize;
                self.call(obj, Some(count))?;
            }
            (Cmd::Return, _) => return Ok(Status::Return),
            (Cmd::If, Operand::Block(body)) => {
                *last_cond = self.pop()?.is_truthy();
                if *last_cond {
                    let status = self.run_block(*body, Vec::new())?;
                    if status != Status::Normal {
                        return Ok(status);
                    }
                }
            }
            (Cmd::Else, Operand::Block(body)) => {
                if !*last_cond {
                    let status = self.run_block(*body, Vec::new())?;
                    if status != Status::Normal {
                        return Ok(status);
                    }
                }
            }
            (Cmd::Label, _) => labels.push(*ci),
            (Cmd::While, Operand::Block(body)) => {
                if self.pop()?.is_truthy() {
                    match self.run_block(*body, Vec::new())? {
                        Status::Return => return Ok(Status::Return),
                        Status::Break => {
                            labels.pop();
                        }
                        Status::Normal | Status::Continue => {
                            if let Some(&label) = labels.last() {
                                *ci = label;
                            }
                        }
                    }
                } else {
                    labels.pop();
                }
            }
            (Cmd::Continue, _) => return Ok(Status::Continue),
            (Cmd::Break, _) => return Ok(Status::Break),
            (Cmd::AssignVar, Operand::Assign(targets)) => *assign = targets.clone(),
            (Cmd::Assign, _) => {
                let targets = mem::take(assign);
                let values = self.pop_n(targets.len())?;
                for (target, value) in targets.iter().zip(values) {
                    self.set(target, value)?;
                }
            }
            (Cmd::Error, Operand::Level(level)) => {
                let message: String = self
                    .pop()?
                    .to_string()
                    .chars()
                    .take(self.vm.limits.max_err_len)
                    .collect();
                let payload = json!({ "type": level.name(), "error": message });
                return Err(ErrorKind::Contract(payload.to_string()).into());
            }
            (Cmd::FuncName, Operand::FuncName { name, count }) => {
                let args = self.pop_n(*count)?;
                let slot = self
                    .stack
                    .last_mut()
                    .ok_or(ErrorKind::StackEmpty)?;
                if matches!(slot, Value::Nil) {
                    *slot = Value::map(Map::new());
                }
                if let Value::Map(map) = slot {
                    map.borrow_mut().insert(name.clone(), Value::array(args));
                }
            }
            (Cmd::UnwrapArr, _) => self.unwrap = true,
            (Cmd::MapInit, Operand::Map(items)) => {
                let value = self.map_literal(items)?;
                self.stack.push(value);
            }
            (Cmd::ArrayInit, Operand::Array(items)) => {
                let value = self.array_literal(items)?;
                self.stack.push(value);
            }
            (Cmd::Index, _) => {
                let key = self.pop()?;
                let container = self.pop()?;
                let value = index(&container, &key)?;
                self.stack.push(value);
            }
            (Cmd::SetIndex, _) => {
                let value = self.pop()?;
                let key = self.pop()?;
                let container = self.pop()?;
                self.set_index(&container, key, value)?;
            }
            (cmd, _) if cmd.arity() == 1 => {
                let value = self.pop()?;
                self.stack.push(arith::unary(cmd, value)?);
            }
            (cmd, _) if cmd.arity() == 2 => {
                let b = self.pop()?;
                let a = self.pop()?;
                self.stack.push(arith::binary(cmd, a, b)?);
            }
            _ => return Err(ErrorKind::UnsupportedType.into()),
        }
        Ok(Status::Normal)
    }

    fn pop(&mut self) -> Result<Value> {
        self.stack.pop().ok_or_else(|| ErrorKind::StackEmpty.into())
    }

    fn pop_n(&mut self, n: usize) -> Result<Vec<Value>> {
        if self.stack.len() < n {
            return Err(ErrorKind::StackEmpty.into());
        }
        Ok(self.stack.split_off(self.stack.len() - n))
    }

    fn slot(&self, var: &VarRef) -> Result<usize> {
        self.frames
            .iter()
            .rev()
            .find(|frame| frame.block == var.owner)
            .map(|frame| frame.offset + var.index)
            .filter(|&slot| slot < self.vars.len())
            .ok_or_else(|| ErrorKind::UnknownVariable(format!("#{}", var.index)).into())
    }

    fn var(&self, var: &VarRef) -> Result<&Value> {
        let slot = self.slot(var)?;
        Ok(&self.vars[slot])
    }

    fn set(&mut self, target: &AssignTarget, value: Value) -> Result<()> {
        match target {
            AssignTarget::Var(var) => {
                let slot = self.slot(var)?;
                let value = match self.vm.blocks[var.owner].vars.get(var.index) {
                    Some(VarType::Money) if !matches!(value, Value::Money(_)) => {
                        Value::Money(value.to_money()?)
                    }
                    Some(VarType::Float) if matches!(value, Value::Int(_)) => Value::Float(value.to_float()),
                    _ => value,
                };
                self.mem += value.mem_size() - self.vars[slot].mem_size();
                self.vars[slot] = value;
            }
            AssignTarget::Extend(name) => {
                if let Some(old) = self.env.get(name) {
                    if !matches!(old, Value::Nil) && !old.same_type(&value) {
                        return Err(ErrorKind::ExtendType {
                            name: name.clone(),
                            was: old.type_name(),
                            now: value.type_name(),
                        }
                        .into());
                    }
                }
                self.env.insert(name.clone(), value);
            }
        }
        Ok(())
    }

    /// Stores `value` into a map or array. Memory is charged for the change
    /// in the container's size, so overwriting an element releases the old one.
    fn set_index(&mut self, container: &Value, key: Value, value: Value) -> Result<()> {
        if value.contains(container) {
            return Err(ErrorKind::SelfAssignment.into());
        }
        let limits = &self.vm.limits;
        let size = value.mem_size();
        let delta = match container {
            Value::Map(map) => {
                let Value::Str(key) = key else {
                    return Err(ErrorKind::MapIndex(key.type_name()).into());
                };
                let mut map = map.borrow_mut();
                if !map.contains_key(&key) && map.len() >= limits.max_map_count {
                    return Err(ErrorKind::MaxMapCount.into());
                }
                let entry = 4 + key.len() as i64;
                match map.insert(key, value) {
                    Some(old) => size - old.mem_size(),
                    None => entry + size,
                }
            }
            Value::Array(items) => {
                let Value::Int(index) = key else {
                    return Err(ErrorKind::ArrayIndex(key.type_name()).into());
                };
                if index < 0 {
                    return Err(ErrorKind::IndexOutOfRange.into());
                }
                let index = index as usize;
                if index >= limits.max_array_index {
                    return Err(ErrorKind::MaxArrayIndex.into());
                }
                let mut items = items.borrow_mut();
                let mut grown = 0;
                if index >= items.len() {
                    grown = 4 * (index + 1 - items.len()) as i64;
                    items.resize(index + 1, Value::Nil);
                }
                let old = mem::replace(&mut items[index], value);
                grown + size - old.mem_size()
            }
            other => return Err(ErrorKind::NotIndexable(other.type_name()).into()),
        };
        self.mem = (self.mem + delta).max(0);
        Ok(())
    }

    fn item(&self, item: &MapItem) -> Result<Value> {
        match item {
            MapItem::Const(value) => Ok(value.clone()),
            MapItem::Var(var) => self.var(var).cloned(),
            MapItem::Extend(name) => self
                .env
                .get(name)
                .cloned()
                .ok_or_else(|| ErrorKind::UnknownExtend(name.clone()).into()),
            MapItem::Map(items) => self.map_literal(items),
            MapItem::Array(items) => self.array_literal(items),
        }
    }

    fn map_literal(&self, items: &[(String, MapItem)]) -> Result<Value> {
        let mut map = Map::new();
        for (key, item) in items {
            map.insert(key.clone(), self.item(item)?);
        }
        Ok(Value::map(map))
    }

    fn array_literal(&self, items: &[MapItem]) -> Result<Value> {
        let values = items.iter().map(|item| self.item(item)).collect::<Result<Vec<_>>>()?;
        Ok(Value::array(values))
    }

    /// Pops `count` arguments, spreading the last one if `...` asked for it
    fn take_args(&mut self, count: usize) -> Result<Vec<Value>> {
        let mut args = self.pop_n(count)?;
        if mem::take(&mut self.unwrap) {
            if let Some(Value::Array(items)) = args.last().cloned() {
                args.pop();
                args.extend(items.borrow().iter().cloned());
            }
        }
        Ok(args)
    }

    fn enter(&mut self) -> Result<()> {
        if self.depth >= self.vm.limits.max_call_depth {
            return Err(ErrorKind::CallDepth.into());
        }
        self.depth += 1;
        Ok(())
    }

    fn call(&mut self, obj: &ObjInfo, count: Option<usize>) -> Result<()> {
        match obj {
            ObjInfo::Func(id) => self.call_func(*id, count),
            ObjInfo::ExtFunc(ext) => self.call_ext(ext, count),
            _ => Err(ErrorKind::UnknownFunction(String::new()).into()),
        }
    }

    fn call_func(&mut self, id: BlockId, count: Option<usize>) -> Result<()> {
        let vm = self.vm;
        let block = &vm.blocks[id];
        let Some(info) = block.func() else {
            return Err(ErrorKind::UnknownFunction(String::new()).into());
        };
        let named = match info.names {
            Some(_) => Some(self.pop()?),
            None => None,
        };
        let mut args = match count {
            Some(count) => {
                let mut args = self.take_args(count)?;
                let fixed = info.params.len().saturating_sub(1);
                if args.len() < fixed {
                    return Err(ErrorKind::WrongParams(info.name.clone(), info.params.len()).into());
                }
                let tail = args.split_off(fixed);
                args.push(Value::array(tail));
                args
            }
            None => {
                self.unwrap = false;
                self.pop_n(info.params.len())?
            }
        };
        check_params(&info.params, &mut args)?;

        let mut slots = args;
        for ty in block.vars.iter().skip(slots.len()) {
            slots.push(ty.default_value());
        }
        if let (Some(names), Some(Value::Map(named))) = (&info.names, named) {
            let named = named.borrow();
            for (segment, params) in names {
                let Some(Value::Array(values)) = named.get(segment) else {
                    continue;
                };
                let mut values = values.borrow().clone();
                if params.variadic {
                    let fixed = params.offsets.len().saturating_sub(1);
                    let tail = values.split_off(fixed.min(values.len()));
                    values.push(Value::array(tail));
                }
                check_params(&params.params, &mut values)?;
                for (offset, value) in params.offsets.iter().zip(values) {
                    slots[*offset] = value;
                }
            }
        }

        self.charge(self.vm.limits.cost_call)?;
        self.enter()?;
        let result = self.run_block(id, slots);
        self.depth -= 1;
        result.map(|_| ())
    }

    /// Calls a host extension and pushes its results
    pub fn call_ext(&mut self, ext: &Rc<ExtFuncInfo>, count: Option<usize>) -> Result<()> {
        let mut args = match count {
            Some(count) => self.take_args(count)?,
            None => {
                self.unwrap = false;
                self.pop_n(ext.params.len())?
            }
        };
        let fixed = if ext.variadic { ext.params.len().saturating_sub(1) } else { ext.params.len() };
        if args.len() < fixed {
            return Err(ErrorKind::WrongParams(ext.name.clone(), ext.params.len()).into());
        }
        check_params(&ext.params[..fixed], &mut args[..fixed])?;

        let mut full: Vec<Value> = ext
            .auto
            .iter()
            .map(|key| self.env.get(key).cloned().unwrap_or_default())
            .collect();
        full.extend(args);

        self.charge(self.vm.limits.cost_extend)?;
        if let Some(cost) = self.vm.ext_cost(&ext.name) {
            self.charge(cost)?;
        }
        self.enter()?;
        let result = (ext.func)(self, full);
        self.depth -= 1;
        let mut results = result?;
        if ext.queries_db && !results.is_empty() {
            let cost = results.remove(0).to_int()?;
            self.charge(cost)?;
        }
        self.stack.extend(results);
        Ok(())
    }
}

/// Checks arguments against declared types. Floats passed as ints are truncated.
fn check_params(params: &[VarType], args: &mut [Value]) -> Result<()> {
    for (i, (ty, arg)) in params.iter().zip(args.iter_mut()).enumerate() {
        if ty.accepts(arg) {
            continue;
        }
        match (ty, &*arg) {
            (VarType::Int, Value::Float(f)) => *arg = Value::Int(*f as i64),
            _ => return Err(ErrorKind::ParamType(i + 1).into()),
        }
    }
    Ok(())
}

fn index(container: &Value, key: &Value) -> Result<Value> {
    match container {
        Value::Map(map) => {
            let Value::Str(key) = key else {
                return Err(ErrorKind::MapIndex(key.type_name()).into());
            };
            Ok(map.borrow().get(key).cloned().unwrap_or_default())
        }
        Value::Array(items) => {
            let Value::Int(i) = key else {
                return Err(ErrorKind::ArrayIndex(key.type_name()).into());
            };
            let items = items.borrow();
            usize::try_from(*i)
                .ok()
                .and_then(|i| items.get(i).cloned())
                .ok_or_else(|| ErrorKind::IndexOutOfRange.into())
        }
        other => Err(ErrorKind::NotIndexable(other.type_name()).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::Owner;

    fn run(source: &str) -> Result<Vec<Value>> {
        let mut vm = VM::new();
        vm.compile(source, Owner::state(1))?;
        let id = vm.func("main").unwrap();
        vm.run(id, Vec::new(), &mut Map::new())
    }

    #[test]
    fn test_while_break_continue() {
        let out = run(
            "func main() int {\n var i, n int\n while i < 10 {\n i = i + 1\n if i == 3 { continue }\n if i == 6 { break }\n n = n + i\n }\n return n\n}",
        )
        .unwrap();
        assert_eq!(out, vec![Value::Int(1 + 2 + 4 + 5)]);
    }

    #[test]
    fn test_if_else() {
        let out = run("func main() string {\n if 1 > 2 { return \"a\" } else { return \"b\" }\n}").unwrap();
        assert_eq!(out, vec![Value::from("b")]);
    }

    #[test]
    fn test_multiple_results() {
        let out = run(
            "func pair(a int) int, string { return a * 2, \"x\" }\nfunc main() string {\n var n int\n var s string\n n, s = pair(4)\n return Sprintf(\"%d%s\", n, s)\n}",
        )
        .unwrap();
        assert_eq!(out, vec![Value::from("8x")]);
    }

    #[test]
    fn test_wrong_results() {
        let err = run("func one() int, int { return 1 }\nfunc main() { one() }").unwrap_err();
        assert!(err.to_string().starts_with("function one must return 2 values"), "{}", err);
    }

    #[test]
    fn test_maps_and_arrays() {
        let out = run(
            "func main() string {\n var m map\n var a array\n m[\"k\"] = 5\n a[2] = m[\"k\"]\n return Sprintf(\"%v %d\", a, Len(a))\n}",
        )
        .unwrap();
        assert_eq!(out, vec![Value::from("[<nil> <nil> 5] 3")]);
    }

    #[test]
    fn test_index_errors() {
        let err = run("func main() { var m map\n m[1] = 2 }").unwrap_err();
        assert_eq!(err.kind, ErrorKind::MapIndex("int"));
        let err = run("func main() { var a array\n $x = a[3] }").unwrap_err();
        assert_eq!(err.kind, ErrorKind::IndexOutOfRange);
        let err = run("func main() { var m map\n m[\"self\"] = m }").unwrap_err();
        assert_eq!(err.kind, ErrorKind::SelfAssignment);
    }

    #[test]
    fn test_money_var_coerces() {
        let out = run("func main() money { var m money\n m = 5\n return m + \"1.5\" }").unwrap();
        assert_eq!(out[0].to_string(), "6.5");
    }

    #[test]
    fn test_error_statement() {
        let err = run("func main() { error \"stop\" }").unwrap_err();
        assert_eq!(err.to_string(), r#"{"type":"error","error":"stop"}"#);
        assert!(err.is_structured());
    }

    #[test]
    fn test_trailer() {
        let err = run("func inner() int {\n return 1 / 0\n}\nfunc main() {\n if true {\n inner()\n }\n}").unwrap_err();
        assert_eq!(err.to_string(), "divided by zero [inner 2] [main 6]");
    }
}

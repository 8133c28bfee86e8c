//! Virtual machine registry
//!
//! Holds every compiled block in an arena together with the global name
//! table. Compiling a unit appends blocks to the arena and flushes its
//! top-level contracts and functions into the table. Savepoints record the
//! table and the arena length so a speculative compile can be undone.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::time::{Duration, Instant};

use crc::{Crc, CRC_64_ECMA_182};
use tracing::{debug, trace, warn};

use crate::block::{state_name, Block, BlockId, BlockInfo, ExtFuncInfo, ObjInfo, Owner};
use crate::builtins;
use crate::compiler::{compile_block, CompileOptions};
use crate::config::Limits;
use crate::error::{ErrorKind, Result};
use crate::lexer::lex;
use crate::runtime::Runtime;
use crate::token::{IS_LCURLY, IS_RCURLY};
use crate::value::{Map, Value};

const CHECKSUM: Crc<u64> = Crc::<u64>::new(&CRC_64_ECMA_182);

/// Extra cost charged for a contract or extension by name
pub type CostFn = Rc<dyn Fn(&str) -> Option<i64>>;

#[derive(Debug, Clone)]
struct Savepoint {
    objects: im::HashMap<String, ObjInfo>,
    children: Vec<BlockId>,
    blocks: usize,
}

/// The Virtual Machine
pub struct VM {
    /// Arena of every compiled block
    pub blocks: Vec<Block>,
    /// Global contracts, functions and extensions
    pub objects: im::HashMap<String, ObjInfo>,
    /// Top-level blocks by their stable id
    pub children: Vec<BlockId>,
    pub limits: Limits,
    pub options: CompileOptions,
    ext_cost: Option<CostFn>,
    contract_price: Option<CostFn>,
    savepoints: Vec<Savepoint>,
    /// Compiled conditions by checksum
    evals: HashMap<u64, BlockId>,
}

impl VM {
    pub fn new() -> Self {
        Self::with_limits(Limits::default())
    }

    pub fn with_limits(limits: Limits) -> Self {
        let mut vm = Self {
            blocks: Vec::new(),
            objects: im::HashMap::new(),
            children: Vec::new(),
            limits,
            options: CompileOptions::default(),
            ext_cost: None,
            contract_price: None,
            savepoints: Vec::new(),
            evals: HashMap::new(),
        };
        builtins::register(&mut vm);
        vm
    }

    pub(crate) fn alloc(&mut self, block: Block) -> BlockId {
        self.blocks.push(block);
        self.blocks.len() - 1
    }

    /// Registers a host function
    pub fn extend(&mut self, ext: ExtFuncInfo) {
        self.objects.insert(ext.name.clone(), ObjInfo::ExtFunc(Rc::new(ext)));
    }

    /// Sets the per-extension cost hook
    pub fn set_ext_cost(&mut self, hook: CostFn) {
        self.ext_cost = Some(hook);
    }

    /// Sets the per-contract price hook
    pub fn set_contract_price(&mut self, hook: CostFn) {
        self.contract_price = Some(hook);
    }

    pub(crate) fn ext_cost(&self, name: &str) -> Option<i64> {
        self.ext_cost.as_ref().and_then(|hook| hook(name))
    }

    pub(crate) fn contract_price(&self, name: &str) -> Option<i64> {
        self.contract_price.as_ref().and_then(|hook| hook(name))
    }

    /// Compiles a source unit and flushes it into the registry
    pub fn compile(&mut self, source: &str, owner: Owner) -> Result<()> {
        let options = self.options;
        let root = compile_block(self, source, owner, options)?;
        self.flush_block(root);
        Ok(())
    }

    /// Moves the top-level objects of a compiled unit into the registry. A
    /// replaced contract or function keeps the id of its predecessor.
    pub fn flush_block(&mut self, root: BlockId) {
        let children = self.blocks[root].children.clone();
        for child in children {
            let (name, obj) = match &self.blocks[child].info {
                BlockInfo::Contract(info) => (info.name.clone(), ObjInfo::Contract(child)),
                BlockInfo::Func(info) => (info.name.clone(), ObjInfo::Func(child)),
                BlockInfo::None => continue,
            };
            let previous = self
                .objects
                .get(&name)
                .and_then(|obj| obj.block())
                .map(|old| self.stable_id(old));
            let id = match previous {
                Some(id) if id < self.children.len() => {
                    self.children[id] = child;
                    id
                }
                _ => {
                    self.children.push(child);
                    self.children.len() - 1
                }
            };
            match &mut self.blocks[child].info {
                BlockInfo::Contract(info) => info.id = id as u32,
                BlockInfo::Func(info) => info.id = id as u32,
                BlockInfo::None => {}
            }
            debug!(name = %name, id, "flush");
            self.objects.insert(name, obj);
        }
    }

    fn stable_id(&self, block: BlockId) -> usize {
        match &self.blocks[block].info {
            BlockInfo::Contract(info) => info.id as usize,
            BlockInfo::Func(info) => info.id as usize,
            BlockInfo::None => usize::MAX,
        }
    }

    /// Looks up a global function
    pub fn func(&self, name: &str) -> Option<BlockId> {
        match self.objects.get(name) {
            Some(ObjInfo::Func(id)) => Some(*id),
            _ => None,
        }
    }

    /// Looks up a contract by its plain or qualified name
    pub fn contract(&self, state: u32, name: &str) -> Option<BlockId> {
        match self.objects.get(&state_name(state, name)) {
            Some(ObjInfo::Contract(id)) => Some(*id),
            _ => None,
        }
    }

    /// Top-level contract or function by stable id
    pub fn child(&self, id: usize) -> Option<BlockId> {
        self.children.get(id).copied()
    }

    /// Opens a savepoint and returns the nesting depth
    pub fn savepoint(&mut self) -> usize {
        self.savepoints.push(Savepoint {
            objects: self.objects.clone(),
            children: self.children.clone(),
            blocks: self.blocks.len(),
        });
        debug!(depth = self.savepoints.len(), "savepoint");
        self.savepoints.len()
    }

    /// Restores the registry to the most recent savepoint
    pub fn rollback(&mut self) -> bool {
        let Some(point) = self.savepoints.pop() else {
            return false;
        };
        self.objects = point.objects;
        self.children = point.children;
        self.blocks.truncate(point.blocks);
        self.evals.retain(|_, id| *id < point.blocks);
        debug!(depth = self.savepoints.len(), blocks = point.blocks, "rollback");
        true
    }

    /// Drops the most recent savepoint and keeps its changes
    pub fn release(&mut self) -> bool {
        let released = self.savepoints.pop().is_some();
        debug!(depth = self.savepoints.len(), "release");
        released
    }

    /// Compiles a boolean condition, reusing an earlier compile of the same text
    pub fn compile_eval(&mut self, source: &str, state: u32) -> Result<BlockId> {
        let mut digest = CHECKSUM.digest();
        digest.update(&state.to_le_bytes());
        digest.update(source.as_bytes());
        let key = digest.finalize();
        if let Some(&id) = self.evals.get(&key) {
            trace!(key, "eval cache hit");
            return Ok(id);
        }
        check_braces(source)?;
        let wrapped = format!("func eval bool {{ return {} }}", source);
        let options = self.options;
        let root = compile_block(self, &wrapped, Owner::state(state), options).map_err(|mut err| {
            err.position = None;
            err.source_line = None;
            err
        })?;
        let id = match self.blocks[root].objects.get("eval") {
            Some(ObjInfo::Func(id)) => *id,
            _ => return Err(ErrorKind::UnknownFunction("eval".into()).into()),
        };
        if let Some(info) = self.blocks[id].func_mut() {
            info.hidden = true;
        }
        self.evals.insert(key, id);
        Ok(id)
    }

    /// Evaluates a condition. An empty condition holds.
    pub fn eval_if(&mut self, source: &str, state: u32, env: &mut Map) -> Result<bool> {
        if source.trim().is_empty() {
            return Ok(true);
        }
        let id = self.compile_eval(source, state)?;
        let results = self.run(id, Vec::new(), env)?;
        Ok(results.first().map_or(false, Value::is_truthy))
    }

    /// Runs a compiled function. The cost budget comes from `$txcost` and
    /// the remainder is written back.
    pub fn run(&self, block: BlockId, params: Vec<Value>, env: &mut Map) -> Result<Vec<Value>> {
        self.execute(env, |rt| rt.run(block, params))
    }

    /// Runs `conditions` and `action` of a contract with the given data fields
    pub fn run_contract(&self, state: u32, name: &str, params: &Map, env: &mut Map) -> Result<Value> {
        self.execute(env, |rt| rt.call_contract(state, name, params))
    }

    fn execute<T>(&self, env: &mut Map, f: impl FnOnce(&mut Runtime<'_>) -> Result<T>) -> Result<T> {
        let cost = match env.get("txcost") {
            Some(value) => value.to_int()?,
            None => self.limits.max_cost,
        };
        let deadline = match (env.get("gen_block"), env.get("time_limit")) {
            (Some(gen), Some(limit)) if gen.is_truthy() => {
                let ms = limit.to_int()?.max(0) as u64;
                Some(Instant::now() + Duration::from_millis(ms))
            }
            _ => None,
        };
        let mut rt = Runtime::new(self, std::mem::take(env), cost, deadline);
        let result = panic::catch_unwind(AssertUnwindSafe(|| f(&mut rt)));
        *env = std::mem::take(&mut rt.env);
        env.insert("txcost".into(), Value::Int(rt.cost));
        match result {
            Ok(result) => result,
            Err(_) => {
                warn!("recovered panic in runtime");
                Err(ErrorKind::RuntimePanic.into())
            }
        }
    }
}

impl Default for VM {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for VM {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VM")
            .field("blocks", &self.blocks)
            .field("objects", &self.objects)
            .field("children", &self.children)
            .field("limits", &self.limits)
            .field("options", &self.options)
            .field("ext_cost", &self.ext_cost.is_some())
            .field("contract_price", &self.contract_price.is_some())
            .field("savepoints", &self.savepoints)
            .field("evals", &self.evals)
            .finish()
    }
}

/// A condition may hold map literals but must not close the block it is
/// compiled into
fn check_braces(source: &str) -> Result<()> {
    let mut depth = 0usize;
    for lex in lex(source)? {
        match lex.kind {
            IS_LCURLY => depth += 1,
            IS_RCURLY => {
                depth = depth.checked_sub(1).ok_or(ErrorKind::NoPair)?;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(ErrorKind::NoPair.into());
    }
    Ok(())
}

/// Names of the contracts and functions declared at the top of `source`
pub fn contracts_list(source: &str) -> Result<Vec<String>> {
    crate::lexer::contracts_list(source)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flush_keeps_id() {
        let mut vm = VM::new();
        vm.compile("contract A { action {} }\ncontract B { action {} }", Owner::state(1))
            .unwrap();
        let old = vm.contract(1, "B").unwrap();
        let stable = vm.blocks[old].contract().unwrap().id;
        vm.compile("contract B { action { $result = 1 } }", Owner::state(1)).unwrap();
        let new = vm.contract(1, "B").unwrap();
        assert_ne!(old, new);
        assert_eq!(vm.blocks[new].contract().unwrap().id, stable);
        assert_eq!(vm.child(stable as usize), Some(new));
    }

    #[test]
    fn test_savepoint_rollback() {
        let mut vm = VM::new();
        vm.compile("func keep() int { return 1 }", Owner::state(1)).unwrap();
        let blocks = vm.blocks.len();
        assert_eq!(vm.savepoint(), 1);
        vm.compile("func temp() int { return 2 }", Owner::state(1)).unwrap();
        vm.compile_eval("1 == 1", 1).unwrap();
        assert!(vm.func("temp").is_some());
        assert!(vm.rollback());
        assert!(vm.func("temp").is_none());
        assert!(vm.func("keep").is_some());
        assert_eq!(vm.blocks.len(), blocks);
        assert!(vm.evals.is_empty());
        assert!(!vm.rollback());
    }

    #[test]
    fn test_release_keeps_changes() {
        let mut vm = VM::new();
        vm.savepoint();
        vm.savepoint();
        vm.compile("func f() {}", Owner::state(1)).unwrap();
        assert!(vm.release());
        assert!(vm.rollback());
        assert!(vm.func("f").is_none());
    }

    #[test]
    fn test_eval_cache() {
        let mut vm = VM::new();
        let a = vm.compile_eval("2 > 1", 1).unwrap();
        let b = vm.compile_eval("2 > 1", 1).unwrap();
        assert_eq!(a, b);
        assert!(vm.eval_if("2 > 1", 1, &mut Map::new()).unwrap());
        assert!(vm.eval_if("  ", 1, &mut Map::new()).unwrap());
    }

    #[test]
    fn test_eval_cannot_escape_wrapper() {
        let mut vm = VM::new();
        let err = vm
            .compile_eval("true }\nfunc injected() int { return 1", 1)
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::NoPair);
        assert!(vm.compile_eval("1 == 1 }", 1).is_err());
        assert!(vm.eval_if("Len({\"a\": 1}) == 1", 1, &mut Map::new()).unwrap());
    }

    #[test]
    fn test_txcost_written_back() {
        let mut vm = VM::new();
        vm.compile("func main() int { return 1 + 2 }", Owner::state(1)).unwrap();
        let mut env = Map::new();
        env.insert("txcost".into(), Value::Int(500));
        let id = vm.func("main").unwrap();
        vm.run(id, Vec::new(), &mut env).unwrap();
        let Some(Value::Int(left)) = env.get("txcost") else {
            panic!("txcost missing");
        };
        assert!(*left < 500 && *left > 0);
    }
}

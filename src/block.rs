//! Compiled blocks and the objects they declare
//!
//! Blocks live in an arena owned by the VM and refer to each other by
//! [`BlockId`]. A block's parent is an index into the same arena.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::bytecode::ByteCode;
use crate::error::Result;
use crate::runtime::Runtime;
use crate::value::{Value, VarType};

/// Index of a block in the VM arena
pub type BlockId = usize;

/// Host callable bound into the language
pub type ExtFn = Rc<dyn Fn(&mut Runtime<'_>, Vec<Value>) -> Result<Vec<Value>>>;

/// Descriptor of an extension function
#[derive(Clone)]
pub struct ExtFuncInfo {
    pub name: String,
    /// Types of the arguments taken from the call site
    pub params: Vec<VarType>,
    pub results: Vec<VarType>,
    /// Environment keys whose values are passed ahead of the call-site arguments
    pub auto: Vec<String>,
    pub variadic: bool,
    pub can_write: bool,
    /// The first result is a cost to charge rather than a value
    pub queries_db: bool,
    pub func: ExtFn,
}

impl ExtFuncInfo {
    pub fn new(name: &str, params: Vec<VarType>, results: Vec<VarType>, func: ExtFn) -> Self {
        Self {
            name: name.to_string(),
            params,
            results,
            auto: Vec::new(),
            variadic: false,
            can_write: false,
            queries_db: false,
            func,
        }
    }

    pub fn variadic(mut self) -> Self {
        self.variadic = true;
        self
    }

    pub fn can_write(mut self) -> Self {
        self.can_write = true;
        self
    }

    pub fn queries_db(mut self) -> Self {
        self.queries_db = true;
        self
    }

    pub fn auto(mut self, keys: &[&str]) -> Self {
        self.auto = keys.iter().map(|k| k.to_string()).collect();
        self
    }
}

impl fmt::Debug for ExtFuncInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtFuncInfo")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("results", &self.results)
            .field("variadic", &self.variadic)
            .field("can_write", &self.can_write)
            .finish()
    }
}

/// What a name refers to
#[derive(Debug, Clone)]
pub enum ObjInfo {
    Contract(BlockId),
    Func(BlockId),
    ExtFunc(Rc<ExtFuncInfo>),
    /// Local variable slot of the declaring block
    Var { index: usize },
    /// Environment variable read by name
    ExtVar(String),
}

impl ObjInfo {
    pub fn block(&self) -> Option<BlockId> {
        match self {
            ObjInfo::Contract(id) | ObjInfo::Func(id) => Some(*id),
            _ => None,
        }
    }
}

/// Ecosystem, wallet and table a contract belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Owner {
    pub state_id: u32,
    pub active: bool,
    pub table_id: i64,
    pub wallet_id: i64,
    pub token_id: i64,
}

impl Owner {
    pub fn state(state_id: u32) -> Self {
        Self {
            state_id,
            ..Default::default()
        }
    }
}

/// Parameters of one `.Name(...)` segment of a chained function
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FuncName {
    pub params: Vec<VarType>,
    /// Variable slots receiving the arguments
    pub offsets: Vec<usize>,
    pub variadic: bool,
}

#[derive(Debug, Clone, Default)]
pub struct FuncInfo {
    pub name: String,
    pub params: Vec<VarType>,
    pub results: Vec<VarType>,
    pub names: Option<IndexMap<String, FuncName>>,
    /// Segment whose parameters are being declared
    pub chain: Option<String>,
    pub variadic: bool,
    pub id: u32,
    pub can_write: bool,
    /// Wrapper of a condition; left out of error trailers
    pub hidden: bool,
}

/// A field of the `data` section
#[derive(Debug, Clone, PartialEq)]
pub struct FieldInfo {
    pub name: String,
    pub ty: VarType,
    pub original: u32,
    pub tags: String,
}

impl FieldInfo {
    pub fn is_optional(&self) -> bool {
        self.tags.contains("optional")
    }
}

#[derive(Debug, Clone, Default)]
pub struct ContractInfo {
    pub id: u32,
    pub name: String,
    pub owner: Owner,
    /// Contracts called from this one
    pub used: HashSet<String>,
    pub tx: Option<Vec<FieldInfo>>,
    pub settings: IndexMap<String, Value>,
    pub can_write: bool,
}

#[derive(Debug, Clone, Default)]
pub enum BlockInfo {
    #[default]
    None,
    Func(FuncInfo),
    Contract(ContractInfo),
}

/// A compiled scope: unit root, contract, function or control-flow body
#[derive(Debug, Clone, Default)]
pub struct Block {
    pub objects: HashMap<String, ObjInfo>,
    pub info: BlockInfo,
    pub owner: Owner,
    pub parent: Option<BlockId>,
    pub vars: Vec<VarType>,
    pub code: Vec<ByteCode>,
    pub children: Vec<BlockId>,
}

impl Block {
    pub fn new(parent: Option<BlockId>, owner: Owner) -> Self {
        Self {
            parent,
            owner,
            ..Default::default()
        }
    }

    pub fn func(&self) -> Option<&FuncInfo> {
        match &self.info {
            BlockInfo::Func(info) => Some(info),
            _ => None,
        }
    }

    pub fn func_mut(&mut self) -> Option<&mut FuncInfo> {
        match &mut self.info {
            BlockInfo::Func(info) => Some(info),
            _ => None,
        }
    }

    pub fn contract(&self) -> Option<&ContractInfo> {
        match &self.info {
            BlockInfo::Contract(info) => Some(info),
            _ => None,
        }
    }

    pub fn contract_mut(&mut self) -> Option<&mut ContractInfo> {
        match &mut self.info {
            BlockInfo::Contract(info) => Some(info),
            _ => None,
        }
    }

    pub fn is_func(&self) -> bool {
        matches!(self.info, BlockInfo::Func(_))
    }

    pub fn can_write(&self) -> bool {
        match &self.info {
            BlockInfo::Func(info) => info.can_write,
            BlockInfo::Contract(info) => info.can_write,
            BlockInfo::None => false,
        }
    }

    pub fn set_writable(&mut self) {
        match &mut self.info {
            BlockInfo::Func(info) => info.can_write = true,
            BlockInfo::Contract(info) => info.can_write = true,
            BlockInfo::None => {}
        }
    }
}

/// Ecosystem-qualified contract name: `@<state><name>`
pub fn state_name(state: u32, name: &str) -> String {
    match name.strip_prefix('@') {
        None => format!("@{}{}", state, name),
        Some(rest) if !rest.starts_with(|c: char| c.is_ascii_digit()) => format!("@1{}", rest),
        Some(_) => name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_name() {
        assert_eq!(state_name(2, "Token"), "@2Token");
        assert_eq!(state_name(2, "@1Token"), "@1Token");
        assert_eq!(state_name(2, "@Token"), "@1Token");
    }

    #[test]
    fn test_set_writable() {
        let mut block = Block::new(None, Owner::state(1));
        block.info = BlockInfo::Func(FuncInfo::default());
        assert!(!block.can_write());
        block.set_writable();
        assert!(block.can_write());
    }
}

//! Simvolio - a contract language for blockchain nodes
//!
//! Sources are compiled by a table-driven compiler into blocks of bytecode
//! and run by a metered interpreter that charges cost for every step.

pub mod token;
pub mod lexer;
pub mod grammar;
pub mod compiler;
mod handlers;
mod expr;
pub mod block;
pub mod bytecode;
pub mod value;
pub mod arith;
pub mod vm;
pub mod runtime;
pub mod contract;
pub mod builtins;
pub mod config;
pub mod error;

pub use block::{ExtFuncInfo, Owner};
pub use compiler::CompileOptions;
pub use config::Limits;
pub use error::{Error, ErrorKind, Result};
pub use lexer::Lexer;
pub use runtime::Runtime;
pub use value::{Map, Value, VarType};
pub use vm::{contracts_list, VM};

/// Convenience function to compile a unit and run its `main` function
pub fn run(source: &str) -> Result<Vec<Value>> {
    let mut vm = VM::new();
    vm.compile(source, Owner::state(1))?;
    let main = vm
        .func("main")
        .ok_or_else(|| Error::from(ErrorKind::UnknownFunction("main".into())))?;
    vm.run(main, Vec::new(), &mut Map::new())
}

/// Version of the Simvolio language
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! Contract invocation
//!
//! A contract call runs `conditions` and then `action` of the callee on the
//! caller's runtime. The caller's own `$` variables are moved out of the
//! environment for the duration of the call, so the callee only sees system
//! variables and its data fields.

use tracing::trace;

use crate::block::{state_name, ObjInfo};
use crate::error::{ErrorKind, Result};
use crate::runtime::Runtime;
use crate::value::{Map, Value};

/// Environment keys owned by the node rather than by contracts
const SYS_VARS: &[&str] = &[
    "block",
    "block_key_id",
    "block_time",
    "ecosystem_id",
    "key_id",
    "account_id",
    "node_position",
    "parent",
    "original_contract",
    "sc",
    "contract",
    "this_contract",
    "time",
    "type",
    "txcost",
    "txhash",
    "guest_key",
    "gen_block",
    "time_limit",
    "pre_block_data_hash",
];

/// Marker prefix of contracts currently running
const LOOP_PREFIX: &str = "loop_";

pub fn is_sys_var(name: &str) -> bool {
    name.starts_with(LOOP_PREFIX) || SYS_VARS.contains(&name)
}

impl<'a> Runtime<'a> {
    /// Calls contract `name`. `names` is a comma separated list of data
    /// fields bound to `values` in order. Returns the callee's `$result`.
    pub fn exec_contract(&mut self, name: &str, names: &str, values: Vec<Value>) -> Result<Value> {
        let vm = self.vm;
        let id = match vm.objects.get(name) {
            Some(ObjInfo::Contract(id)) => *id,
            _ => return Err(ErrorKind::UnknownContract(name.to_string()).into()),
        };
        let block = &vm.blocks[id];
        let Some(info) = block.contract() else {
            return Err(ErrorKind::UnknownContract(name.to_string()).into());
        };

        let names: Vec<&str> = names
            .split(',')
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .collect();
        if names.len() != values.len() {
            return Err(ErrorKind::ContractParams(name.to_string()).into());
        }
        let marker = format!("{}{}", LOOP_PREFIX, name);
        if self.env.contains_key(&marker) {
            return Err(ErrorKind::ContractLoop(name.to_string()).into());
        }

        let mut params: Map = names
            .into_iter()
            .map(str::to_string)
            .zip(values)
            .collect();
        for field in info.tx.iter().flatten() {
            if params.contains_key(&field.name) {
                continue;
            }
            if !field.is_optional() {
                return Err(ErrorKind::UndefinedParam(field.name.clone()).into());
            }
            params.insert(field.name.clone(), field.ty.default_value());
        }

        self.charge(vm.limits.cost_contract)?;
        if let Some(price) = vm.contract_price(name) {
            self.charge(price)?;
        }

        let saved: Map = self
            .env
            .iter()
            .filter(|(key, _)| !is_sys_var(key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        self.env.retain(|key, _| is_sys_var(key));
        let this = self.env.get("this_contract").cloned();
        let parent = self.env.get("parent").cloned();
        self.env.insert(
            "parent".into(),
            this.clone().unwrap_or_else(|| Value::from("")),
        );
        self.env.insert("this_contract".into(), Value::from(name));
        self.env.insert(marker.clone(), Value::Bool(true));
        self.env.extend(params);

        trace!(contract = name, "exec contract");
        let result = self.run_sections(id);

        let value = self.env.get("result").cloned().unwrap_or_default();
        self.env.retain(|key, _| is_sys_var(key));
        self.env.shift_remove(&marker);
        restore(&mut self.env, "this_contract", this);
        restore(&mut self.env, "parent", parent);
        self.env.extend(saved);
        result.map(|_| value)
    }

    fn run_sections(&mut self, id: usize) -> Result<()> {
        let vm = self.vm;
        let block = &vm.blocks[id];
        for section in ["conditions", "action"] {
            if let Some(ObjInfo::Func(func)) = block.objects.get(section) {
                self.run(*func, Vec::new())?;
            }
        }
        Ok(())
    }

    /// `CallContract(name, params)`: like [`Runtime::exec_contract`] with the
    /// data fields given as a map
    pub fn call_contract(&mut self, state: u32, name: &str, params: &Map) -> Result<Value> {
        let name = state_name(state, name);
        let names: Vec<&str> = params.keys().map(String::as_str).collect();
        let values = params.values().cloned().collect();
        self.exec_contract(&name, &names.join(","), values)
    }
}

fn restore(env: &mut Map, key: &str, value: Option<Value>) {
    match value {
        Some(value) => {
            env.insert(key.to_string(), value);
        }
        None => {
            env.shift_remove(key);
        }
    }
}

//! Execution limits and cost constants

use serde::Deserialize;

use crate::error::{ErrorKind, Result};

/// Ceilings enforced by every runtime and the fixed call costs
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Cost budget when the environment carries no `txcost`
    pub max_cost: i64,
    /// Memory ceiling in bytes
    pub max_mem: i64,
    pub max_call_depth: usize,
    pub max_array_index: usize,
    pub max_map_count: usize,
    /// Longest message kept by `error`, `warning` and `info`
    pub max_err_len: usize,
    pub cost_call: i64,
    pub cost_contract: i64,
    pub cost_extend: i64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_cost: 10_000_000,
            max_mem: 128 << 20,
            max_call_depth: 1000,
            max_array_index: 1_000_000,
            max_map_count: 100_000,
            max_err_len: 150,
            cost_call: 50,
            cost_contract: 100,
            cost_extend: 10,
        }
    }
}

impl Limits {
    /// Parses limits from a TOML table. Missing keys keep their defaults.
    pub fn from_toml(source: &str) -> Result<Self> {
        toml::from_str(source).map_err(|err| ErrorKind::Extension(format!("config: {}", err)).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml() {
        let limits = Limits::from_toml("max_cost = 500\nmax_call_depth = 8\n").unwrap();
        assert_eq!(limits.max_cost, 500);
        assert_eq!(limits.max_call_depth, 8);
        assert_eq!(limits.max_map_count, 100_000);
    }

    #[test]
    fn test_bad_toml() {
        assert!(Limits::from_toml("max_cost = \"lots\"").is_err());
    }
}

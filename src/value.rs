//! Runtime value types for Simvolio

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::str::FromStr;

use indexmap::IndexMap;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::error::{ErrorKind, Result};

/// Insertion-ordered string-keyed map
pub type Map = IndexMap<String, Value>;

/// Declared types of the language
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VarType {
    Bool,
    Bytes,
    Int,
    Address,
    Array,
    Map,
    Money,
    Float,
    String,
    File,
    /// Only used in extension signatures
    Any,
}

impl VarType {
    /// Looks up a builtin type name
    pub fn lookup(name: &str) -> Option<VarType> {
        Some(match name {
            "bool" => VarType::Bool,
            "bytes" => VarType::Bytes,
            "int" => VarType::Int,
            "address" => VarType::Address,
            "array" => VarType::Array,
            "map" => VarType::Map,
            "money" => VarType::Money,
            "float" => VarType::Float,
            "string" => VarType::String,
            "file" => VarType::File,
            _ => return None,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            VarType::Bool => "bool",
            VarType::Bytes => "bytes",
            VarType::Int => "int",
            VarType::Address => "address",
            VarType::Array => "array",
            VarType::Map => "map",
            VarType::Money => "money",
            VarType::Float => "float",
            VarType::String => "string",
            VarType::File => "file",
            VarType::Any => "any",
        }
    }

    /// Canonical value of a freshly declared variable
    pub fn default_value(&self) -> Value {
        match self {
            VarType::Bool => Value::Bool(false),
            VarType::Bytes => Value::Bytes(Vec::new()),
            VarType::Int | VarType::Address => Value::Int(0),
            VarType::Array => Value::array(Vec::new()),
            VarType::Map | VarType::File => Value::map(Map::new()),
            VarType::Money => Value::Money(Decimal::ZERO),
            VarType::Float => Value::Float(0.0),
            VarType::String => Value::Str(String::new()),
            VarType::Any => Value::Nil,
        }
    }

    /// Whether a value may be bound to a parameter of this type
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (VarType::Any, _) => true,
            (VarType::Bool, Value::Bool(_)) => true,
            (VarType::Bytes, Value::Bytes(_)) => true,
            (VarType::Int | VarType::Address, Value::Int(_)) => true,
            (VarType::Money, Value::Money(_)) => true,
            (VarType::Float, Value::Float(_)) => true,
            (VarType::String, Value::Str(_)) => true,
            (VarType::Array, Value::Array(_) | Value::Nil) => true,
            (VarType::Map | VarType::File, Value::Map(_) | Value::Nil) => true,
            _ => false,
        }
    }
}

impl fmt::Display for VarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Runtime values in Simvolio
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Money(Decimal),
    Str(String),
    Bytes(Vec<u8>),
    Map(Rc<RefCell<Map>>),
    Array(Rc<RefCell<Vec<Value>>>),
}

impl Value {
    pub fn map(map: Map) -> Value {
        Value::Map(Rc::new(RefCell::new(map)))
    }

    pub fn array(items: Vec<Value>) -> Value {
        Value::Array(Rc::new(RefCell::new(items)))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Money(_) => "money",
            Value::Str(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Map(_) => "map",
            Value::Array(_) => "array",
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Nil => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Float(n) => *n != 0.0,
            Value::Money(d) => !d.is_zero(),
            Value::Str(s) => !s.is_empty(),
            Value::Bytes(b) => !b.is_empty(),
            Value::Map(m) => !m.borrow().is_empty(),
            Value::Array(a) => !a.borrow().is_empty(),
        }
    }

    /// Same variant, ignoring the payload
    pub fn same_type(&self, other: &Value) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }

    /// Integer view used by int-typed contexts. Strings must parse exactly.
    pub fn to_int(&self) -> Result<i64> {
        match self {
            Value::Int(n) => Ok(*n),
            Value::Float(f) => Ok(*f as i64),
            Value::Money(d) => d
                .trunc()
                .to_i64()
                .ok_or_else(|| ErrorKind::InvalidInt(d.to_string()).into()),
            Value::Bool(b) => Ok(*b as i64),
            Value::Str(s) if s.is_empty() => Ok(0),
            Value::Str(s) => s
                .parse::<i64>()
                .map_err(|_| ErrorKind::InvalidInt(s.clone()).into()),
            other => Err(ErrorKind::InvalidInt(other.to_string()).into()),
        }
    }

    /// Float view; unparsable strings become zero
    pub fn to_float(&self) -> f64 {
        match self {
            Value::Int(n) => *n as f64,
            Value::Float(f) => *f,
            Value::Money(d) => d.to_f64().unwrap_or_default(),
            Value::Str(s) => s.parse::<f64>().unwrap_or_default(),
            Value::Bool(b) => *b as i64 as f64,
            _ => 0.0,
        }
    }

    /// Decimal view; unparsable strings become zero
    pub fn to_money(&self) -> Result<Decimal> {
        match self {
            Value::Money(d) => Ok(*d),
            Value::Int(n) => Ok(Decimal::from(*n)),
            Value::Float(f) => Decimal::try_from(*f).map_err(|_| ErrorKind::UnsupportedType.into()),
            Value::Str(s) if s.is_empty() => Ok(Decimal::ZERO),
            Value::Str(s) => Decimal::from_str(s).or_else(|_| Decimal::from_scientific(s)).map_err(|_| {
                ErrorKind::Extension(format!("{} is not a valid decimal", s)).into()
            }),
            _ => Err(ErrorKind::UnsupportedType.into()),
        }
    }

    /// Byte cost of this value for the memory ceiling
    pub fn mem_size(&self) -> i64 {
        match self {
            Value::Nil => 0,
            Value::Bool(_) => 1,
            Value::Int(_) | Value::Float(_) => 8,
            Value::Money(_) => 16,
            Value::Str(s) => s.len() as i64,
            Value::Bytes(b) => 12 + b.len() as i64,
            Value::Array(items) => {
                12 + items.borrow().iter().map(|v| 4 + v.mem_size()).sum::<i64>()
            }
            Value::Map(map) => {
                12 + map
                    .borrow()
                    .iter()
                    .map(|(k, v)| 4 + k.len() as i64 + v.mem_size())
                    .sum::<i64>()
            }
        }
    }

    /// Whether `needle` is this container or is nested anywhere inside it
    pub fn contains(&self, needle: &Value) -> bool {
        match (self, needle) {
            (Value::Map(a), Value::Map(b)) if Rc::ptr_eq(a, b) => return true,
            (Value::Array(a), Value::Array(b)) if Rc::ptr_eq(a, b) => return true,
            _ => {}
        }
        match self {
            Value::Map(map) => map.borrow().values().any(|v| v.contains(needle)),
            Value::Array(items) => items.borrow().iter().any(|v| v.contains(needle)),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "<nil>"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(n) => write!(f, "{}", n),
            Value::Money(d) => write!(f, "{}", d),
            Value::Str(s) => write!(f, "{}", s),
            Value::Bytes(b) => {
                let parts: Vec<String> = b.iter().map(|x| x.to_string()).collect();
                write!(f, "[{}]", parts.join(" "))
            }
            Value::Array(items) => {
                let parts: Vec<String> = items.borrow().iter().map(|x| x.to_string()).collect();
                write!(f, "[{}]", parts.join(" "))
            }
            Value::Map(map) => {
                let parts: Vec<String> = map
                    .borrow()
                    .iter()
                    .map(|(k, v)| format!("{}:{}", k, v))
                    .collect();
                write!(f, "map[{}]", parts.join(" "))
            }
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => write!(f, "{:?}", s),
            _ => write!(f, "{}", self),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Money(a), Value::Money(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow(),
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow(),
            _ => false,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        assert_eq!(VarType::Int.default_value(), Value::Int(0));
        assert_eq!(VarType::String.default_value(), Value::Str(String::new()));
        assert_eq!(VarType::Money.default_value(), Value::Money(Decimal::ZERO));
        assert!(matches!(VarType::Array.default_value(), Value::Array(_)));
    }

    #[test]
    fn test_to_int_rejects_garbage() {
        assert_eq!(Value::from("42").to_int().unwrap(), 42);
        assert!(Value::from("4.2").to_int().is_err());
        assert_eq!(Value::Float(3.9).to_int().unwrap(), 3);
    }

    #[test]
    fn test_money_overflow_is_error() {
        assert_eq!(Value::Money(Decimal::new(-79, 1)).to_int().unwrap(), -7);
        let err = Value::Money(Decimal::MAX).to_int().unwrap_err();
        assert!(matches!(err.kind, ErrorKind::InvalidInt(_)));
    }

    #[test]
    fn test_mem_size_is_recursive() {
        let inner = Value::array(vec![Value::Int(1), Value::Int(2)]);
        let outer = Value::array(vec![inner.clone(), Value::from("abc")]);
        assert_eq!(inner.mem_size(), 12 + 2 * 12);
        assert_eq!(outer.mem_size(), 12 + (4 + inner.mem_size()) + (4 + 3));
    }

    #[test]
    fn test_contains_detects_nesting() {
        let map = Value::map(Map::new());
        let wrapper = Value::array(vec![Value::Int(1), map.clone()]);
        assert!(wrapper.contains(&map));
        assert!(map.contains(&map));
        assert!(!Value::array(vec![]).contains(&map));
    }

    #[test]
    fn test_display() {
        let mut m = Map::new();
        m.insert("a".into(), Value::Int(1));
        assert_eq!(Value::map(m).to_string(), "map[a:1]");
        assert_eq!(Value::array(vec![Value::Int(1), "x".into()]).to_string(), "[1 x]");
    }
}

//! Default extension functions
//!
//! Every VM starts with these. Embedders add their own through
//! [`VM::extend`](crate::vm::VM::extend).

use std::rc::Rc;

use crate::block::ExtFuncInfo;
use crate::error::{ErrorKind, Result};
use crate::runtime::Runtime;
use crate::value::{Value, VarType};
use crate::vm::VM;

use VarType::*;

pub fn register(vm: &mut VM) {
    vm.extend(ExtFuncInfo::new("Sprintf", vec![String, Any], vec![String], Rc::new(sprintf)).variadic());
    vm.extend(ExtFuncInfo::new("Len", vec![Any], vec![Int], Rc::new(len)));
    vm.extend(ExtFuncInfo::new("Str", vec![Any], vec![String], Rc::new(to_str)));
    vm.extend(ExtFuncInfo::new("Int", vec![Any], vec![Int], Rc::new(to_int)));
    vm.extend(ExtFuncInfo::new("Float", vec![Any], vec![Float], Rc::new(to_float)));
    vm.extend(ExtFuncInfo::new("Money", vec![Any], vec![Money], Rc::new(to_money)));
    vm.extend(ExtFuncInfo::new("Append", vec![Array, Any], vec![Array], Rc::new(append)));
    vm.extend(ExtFuncInfo::new("Join", vec![Array, String], vec![String], Rc::new(join)));
    vm.extend(
        ExtFuncInfo::new("ExecContract", vec![String, String, Any], vec![Any], Rc::new(exec_contract))
            .variadic(),
    );
    vm.extend(ExtFuncInfo::new("CallContract", vec![Int, String, Map], vec![Any], Rc::new(call_contract)));
}

fn arg(args: &[Value], i: usize) -> Value {
    args.get(i).cloned().unwrap_or_default()
}

fn to_str(_: &mut Runtime<'_>, args: Vec<Value>) -> Result<Vec<Value>> {
    Ok(vec![Value::Str(arg(&args, 0).to_string())])
}

fn to_int(_: &mut Runtime<'_>, args: Vec<Value>) -> Result<Vec<Value>> {
    Ok(vec![Value::Int(arg(&args, 0).to_int()?)])
}

fn to_float(_: &mut Runtime<'_>, args: Vec<Value>) -> Result<Vec<Value>> {
    Ok(vec![Value::Float(arg(&args, 0).to_float())])
}

fn to_money(_: &mut Runtime<'_>, args: Vec<Value>) -> Result<Vec<Value>> {
    Ok(vec![Value::Money(arg(&args, 0).to_money()?)])
}

fn len(_: &mut Runtime<'_>, args: Vec<Value>) -> Result<Vec<Value>> {
    let n = match arg(&args, 0) {
        Value::Str(s) => s.len(),
        Value::Bytes(b) => b.len(),
        Value::Array(items) => items.borrow().len(),
        Value::Map(map) => map.borrow().len(),
        Value::Nil => 0,
        other => return Err(ErrorKind::NotIndexable(other.type_name()).into()),
    };
    Ok(vec![Value::Int(n as i64)])
}

fn append(_: &mut Runtime<'_>, args: Vec<Value>) -> Result<Vec<Value>> {
    let mut items = match arg(&args, 0) {
        Value::Array(items) => items.borrow().clone(),
        _ => Vec::new(),
    };
    items.push(arg(&args, 1));
    Ok(vec![Value::array(items)])
}

fn join(_: &mut Runtime<'_>, args: Vec<Value>) -> Result<Vec<Value>> {
    let parts: Vec<std::string::String> = match arg(&args, 0) {
        Value::Array(items) => items.borrow().iter().map(|v| v.to_string()).collect(),
        _ => Vec::new(),
    };
    Ok(vec![Value::Str(parts.join(&arg(&args, 1).to_string()))])
}

fn exec_contract(rt: &mut Runtime<'_>, args: Vec<Value>) -> Result<Vec<Value>> {
    let mut args = args.into_iter();
    let name = args.next().unwrap_or_default().to_string();
    let names = args.next().unwrap_or_default().to_string();
    let result = rt.exec_contract(&name, &names, args.collect())?;
    Ok(vec![result])
}

fn call_contract(rt: &mut Runtime<'_>, args: Vec<Value>) -> Result<Vec<Value>> {
    let state = arg(&args, 0).to_int()? as u32;
    let name = arg(&args, 1).to_string();
    let params = match arg(&args, 2) {
        Value::Map(map) => map.borrow().clone(),
        _ => Default::default(),
    };
    let result = rt.call_contract(state, &name, &params)?;
    Ok(vec![result])
}

/// Formats `%v`, `%s`, `%d`, `%f` with an optional precision, and `%%`
fn sprintf(_: &mut Runtime<'_>, args: Vec<Value>) -> Result<Vec<Value>> {
    let mut args = args.into_iter();
    let format = args.next().unwrap_or_default().to_string();
    let mut out = std::string::String::with_capacity(format.len());
    let mut chars = format.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch != '%' {
            out.push(ch);
            continue;
        }
        let mut precision: Option<usize> = None;
        if chars.peek() == Some(&'.') {
            chars.next();
            let mut digits = std::string::String::new();
            while let Some(d) = chars.peek().filter(|c| c.is_ascii_digit()) {
                digits.push(*d);
                chars.next();
            }
            precision = digits.parse().ok();
        }
        match chars.next() {
            Some('%') => out.push('%'),
            Some('d') => out.push_str(&args.next().unwrap_or_default().to_int()?.to_string()),
            Some('f') => {
                let value = args.next().unwrap_or_default().to_float();
                out.push_str(&format!("{:.*}", precision.unwrap_or(6), value));
            }
            Some('s' | 'v') => out.push_str(&args.next().unwrap_or_default().to_string()),
            Some(other) => {
                out.push('%');
                out.push(other);
            }
            None => out.push('%'),
        }
    }
    Ok(vec![Value::Str(out)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Map;

    fn call(name: &str, args: Vec<Value>) -> Result<Vec<Value>> {
        let vm = VM::new();
        let Some(crate::block::ObjInfo::ExtFunc(ext)) = vm.objects.get(name).cloned() else {
            panic!("{} is not registered", name);
        };
        let mut rt = Runtime::new(&vm, Map::new(), 1000, None);
        (ext.func)(&mut rt, args)
    }

    #[test]
    fn test_sprintf() {
        let out = call(
            "Sprintf",
            vec!["%s=%d %.2f 100%% %v".into(), "x".into(), Value::Int(4), Value::Float(1.5), Value::Bool(true)],
        )
        .unwrap();
        assert_eq!(out, vec![Value::from("x=4 1.50 100% true")]);
    }

    #[test]
    fn test_collections() {
        let items = Value::array(vec![Value::Int(1)]);
        let out = call("Append", vec![items.clone(), Value::Int(2)]).unwrap();
        assert_eq!(out[0].to_string(), "[1 2]");
        assert_eq!(items.to_string(), "[1]");
        let out = call("Join", vec![out[0].clone(), ",".into()]).unwrap();
        assert_eq!(out, vec![Value::from("1,2")]);
        assert_eq!(call("Len", vec!["abc".into()]).unwrap(), vec![Value::Int(3)]);
    }

    #[test]
    fn test_conversions() {
        assert_eq!(call("Int", vec!["12".into()]).unwrap(), vec![Value::Int(12)]);
        assert!(call("Int", vec!["1x".into()]).is_err());
        assert_eq!(call("Str", vec![Value::Int(5)]).unwrap(), vec![Value::from("5")]);
        assert_eq!(call("Money", vec!["2.50".into()]).unwrap()[0].to_string(), "2.50");
    }
}

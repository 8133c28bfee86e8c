use std::rc::Rc;

use simvolio::{ErrorKind, ExtFuncInfo, Limits, Map, Owner, Result, Runtime, Value, VarType, VM};

fn compile(limits: Limits, source: &str) -> VM {
    let mut vm = VM::with_limits(limits);
    vm.compile(source, Owner::state(1)).expect("Compile failed");
    vm
}

fn run_main(vm: &VM, env: &mut Map) -> Result<Vec<Value>> {
    let main = vm.func("main").expect("main is declared");
    vm.run(main, Vec::new(), env)
}

fn error_of(limits: Limits, source: &str) -> ErrorKind {
    let vm = compile(limits, source);
    run_main(&vm, &mut Map::new()).unwrap_err().kind
}

fn left(env: &Map) -> i64 {
    match env.get("txcost") {
        Some(Value::Int(n)) => *n,
        other => panic!("Expected txcost, got {:?}", other),
    }
}

const SPIN: &str = r#"
    func main() {
        var i int
        while true { i = i + 1 }
    }
"#;

#[test]
fn test_cost_limit() {
    let vm = compile(Limits::default(), SPIN);
    let mut env = Map::new();
    env.insert("txcost".into(), Value::Int(1_000));
    let err = run_main(&vm, &mut env).unwrap_err();
    assert_eq!(err.kind, ErrorKind::CostLimit);
    assert!(left(&env) <= 0);
}

#[test]
fn test_max_cost_without_txcost() {
    let limits = Limits {
        max_cost: 5_000,
        ..Limits::default()
    };
    assert_eq!(error_of(limits, SPIN), ErrorKind::CostLimit);
}

#[test]
fn test_cost_is_deterministic() {
    let source = r#"
        func add(a, b int) int { return a + b }
        func main() int {
            var i, total int
            while i < 20 {
                total = add(total, i)
                i = i + 1
            }
            return total
        }
    "#;
    let vm = compile(Limits::default(), source);
    let mut first = Map::new();
    first.insert("txcost".into(), Value::Int(100_000));
    let mut second = first.clone();
    assert_eq!(run_main(&vm, &mut first).unwrap(), vec![Value::Int(190)]);
    run_main(&vm, &mut second).unwrap();
    assert_eq!(left(&first), left(&second));
    assert!(left(&first) < 100_000 - 20 * Limits::default().cost_call);
}

#[test]
fn test_call_depth() {
    let limits = Limits {
        max_call_depth: 50,
        ..Limits::default()
    };
    let source = r#"
        func down(n int) int { return down(n + 1) }
        func main() int { return down(0) }
    "#;
    assert_eq!(error_of(limits, source), ErrorKind::CallDepth);
}

#[test]
fn test_default_call_depth() {
    let plain = r#"
        func down(n int) int { return down(n + 1) }
        func main() int { return down(0) }
    "#;
    assert_eq!(error_of(Limits::default(), plain), ErrorKind::CallDepth);

    let nested = r#"
        func down(n int) int {
            if n >= 0 {
                while true {
                    if n < 0 {
                        return 0
                    } else {
                        return down(n + 1)
                    }
                }
            }
            return 0
        }
        func main() int { return down(0) }
    "#;
    let mut vm = VM::new();
    vm.compile(nested, Owner::state(1)).expect("Compile failed");
    let err = run_main(&vm, &mut Map::new()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::CallDepth);
}

#[test]
fn test_overwrite_releases_memory() {
    let limits = Limits {
        max_mem: 4_096,
        ..Limits::default()
    };
    let source = r#"
        func main() int {
            var m map
            var a array
            var i int
            while i < 5000 {
                m["k"] = Sprintf("%d", i) + "................................................................................................"
                a[0] = m["k"]
                i = i + 1
            }
            return Len(m) + Len(a)
        }
    "#;
    let vm = compile(limits, source);
    assert_eq!(run_main(&vm, &mut Map::new()).unwrap(), vec![Value::Int(2)]);
}

#[test]
fn test_memory_limit() {
    let limits = Limits {
        max_mem: 4_096,
        ..Limits::default()
    };
    let source = r#"
        func main() {
            var s string
            s = "memory"
            while true { s = s + s }
        }
    "#;
    assert_eq!(error_of(limits, source), ErrorKind::MemoryLimit);
}

#[test]
fn test_max_map_count() {
    let limits = Limits {
        max_map_count: 10,
        ..Limits::default()
    };
    let source = r#"
        func main() {
            var m map
            var i int
            while true {
                m[Str(i)] = i
                i = i + 1
            }
        }
    "#;
    assert_eq!(error_of(limits, source), ErrorKind::MaxMapCount);
}

#[test]
fn test_max_array_index() {
    let limits = Limits {
        max_array_index: 100,
        ..Limits::default()
    };
    let ok = r#"
        func main() int {
            var a array
            a[99] = 1
            return Len(a)
        }
    "#;
    let vm = compile(limits.clone(), ok);
    assert_eq!(run_main(&vm, &mut Map::new()).unwrap(), vec![Value::Int(100)]);

    let source = "func main() {\n var a array\n a[100] = 1\n}";
    assert_eq!(error_of(limits, source), ErrorKind::MaxArrayIndex);
}

#[test]
fn test_self_assignment() {
    let direct = "func main() {\n var a array\n a[0] = a\n}";
    assert_eq!(error_of(Limits::default(), direct), ErrorKind::SelfAssignment);

    let map = "func main() {\n var m map\n m[\"x\"] = m\n}";
    assert_eq!(error_of(Limits::default(), map), ErrorKind::SelfAssignment);

    let nested = r#"
        func main() {
            var a, b array
            b[0] = a
            a[0] = b
        }
    "#;
    assert_eq!(error_of(Limits::default(), nested), ErrorKind::SelfAssignment);
}

#[test]
fn test_time_limit() {
    let vm = compile(Limits::default(), SPIN);
    let mut env = Map::new();
    env.insert("gen_block".into(), Value::Bool(true));
    env.insert("time_limit".into(), Value::Int(0));
    let err = run_main(&vm, &mut env).unwrap_err();
    assert_eq!(err.kind, ErrorKind::TimeLimit);
}

fn lookup(_: &mut Runtime<'_>, _: Vec<Value>) -> Result<Vec<Value>> {
    Ok(vec![Value::Int(500), Value::Int(7)])
}

fn lookup_free(_: &mut Runtime<'_>, _: Vec<Value>) -> Result<Vec<Value>> {
    Ok(vec![Value::Int(0), Value::Int(7)])
}

fn spent(vm: &VM) -> i64 {
    let mut env = Map::new();
    env.insert("txcost".into(), Value::Int(100_000));
    assert_eq!(run_main(vm, &mut env).unwrap(), vec![Value::Int(7)]);
    100_000 - left(&env)
}

#[test]
fn test_extension_costs() {
    let source = "func main() int { return Lookup() }";
    let build = |func: fn(&mut Runtime<'_>, Vec<Value>) -> Result<Vec<Value>>| {
        let mut vm = VM::new();
        vm.extend(ExtFuncInfo::new("Lookup", Vec::new(), vec![VarType::Int], Rc::new(func)).queries_db());
        vm.compile(source, Owner::state(1)).expect("Compile failed");
        vm
    };

    let free = spent(&build(lookup_free));
    let paid = spent(&build(lookup));
    assert_eq!(paid - free, 500);

    let mut hooked = build(lookup_free);
    hooked.set_ext_cost(Rc::new(|name: &str| (name == "Lookup").then_some(300)));
    assert_eq!(spent(&hooked) - free, 300);
}

#[test]
fn test_limits_from_toml() {
    let limits = Limits::from_toml("max_call_depth = 5\ncost_call = 7").unwrap();
    assert_eq!(limits.max_call_depth, 5);
    assert_eq!(limits.cost_call, 7);
    assert_eq!(limits.max_map_count, Limits::default().max_map_count);
    assert!(Limits::from_toml("max_call_depth = \"deep\"").is_err());
}

use std::rc::Rc;

use simvolio::{CompileOptions, ErrorKind, ExtFuncInfo, Map, Owner, Result, Runtime, Value, VM};

const TOKEN: &str = r#"
contract Token {
    data {
        Amount int
        Memo string "optional"
    }
    settings {
        fee = 2
    }
    conditions {
        if Amount <= 0 {
            error "amount must be positive"
        }
    }
    action {
        $result = Sprintf("%d:%s", Amount * 2, Memo)
    }
}
"#;

fn params(pairs: &[(&str, Value)]) -> Map {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

fn token_vm() -> VM {
    let mut vm = VM::new();
    vm.compile(TOKEN, Owner::state(1)).expect("Compile failed");
    vm
}

#[test]
fn test_run_contract() {
    let vm = token_vm();
    let mut env = Map::new();
    let result = vm
        .run_contract(1, "Token", &params(&[("Amount", Value::Int(21))]), &mut env)
        .unwrap();
    assert_eq!(result, Value::from("42:"));
    assert!(env.get("Amount").is_none());
    assert!(env.get("loop_@1Token").is_none());
}

#[test]
fn test_conditions_reject() {
    let vm = token_vm();
    let err = vm
        .run_contract(1, "Token", &params(&[("Amount", Value::Int(0))]), &mut Map::new())
        .unwrap_err();
    assert_eq!(err.to_string(), r#"{"type":"error","error":"amount must be positive"}"#);
}

#[test]
fn test_missing_field() {
    let vm = token_vm();
    let err = vm.run_contract(1, "Token", &Map::new(), &mut Map::new()).unwrap_err();
    assert_eq!(err.to_string(), "Amount is undefined");
}

#[test]
fn test_contract_calls_contract() {
    let mut vm = token_vm();
    vm.compile(
        r#"
        contract Wallet {
            action {
                $note = "kept"
                $result = Token("Amount,Memo", 5, "hi") + "/" + $note
            }
        }
        "#,
        Owner::state(1),
    )
    .unwrap();
    let mut env = Map::new();
    env.insert("key_id".into(), Value::Int(3));
    let result = vm.run_contract(1, "Wallet", &Map::new(), &mut env).unwrap();
    assert_eq!(result, Value::from("10:hi/kept"));
    assert_eq!(env.get("key_id"), Some(&Value::Int(3)));
}

#[test]
fn test_wrong_names_count() {
    let mut vm = token_vm();
    vm.compile(
        "contract Bad { action { $result = Token(\"Amount,Memo\", 5) } }",
        Owner::state(1),
    )
    .unwrap();
    let err = vm.run_contract(1, "Bad", &Map::new(), &mut Map::new()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::ContractParams("@1Token".into()));
    assert!(err.to_string().ends_with("[@1Bad.action 1]"), "{}", err);
}

#[test]
fn test_recursion_is_compile_error() {
    let mut vm = VM::new();
    let err = vm
        .compile("contract A { action { A() } }", Owner::state(1))
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Recursion);

    vm.compile("contract B { action { $result = 1 } }", Owner::state(1)).unwrap();
    vm.compile("contract C { action { B() } }", Owner::state(1)).unwrap();
    let err = vm
        .compile("contract B { action { C() } }", Owner::state(1))
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Recursion);
}

#[test]
fn test_runtime_loop_detected() {
    let mut vm = VM::new();
    vm.compile(
        "contract Again { action { CallContract(\"Again\", {}) } }",
        Owner::state(1),
    )
    .unwrap();
    let err = vm.run_contract(1, "Again", &Map::new(), &mut Map::new()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::ContractLoop("@1Again".into()));
}

fn db_insert(_: &mut Runtime<'_>, _: Vec<Value>) -> Result<Vec<Value>> {
    Ok(Vec::new())
}

#[test]
fn test_conditions_cannot_write() {
    let mut vm = VM::new();
    vm.extend(ExtFuncInfo::new("DBInsert", Vec::new(), Vec::new(), Rc::new(db_insert)).can_write());

    vm.compile("contract Ok { action { DBInsert() } }", Owner::state(1)).unwrap();

    let err = vm
        .compile(
            "func helper() { DBInsert() }\ncontract No { conditions { helper() } }",
            Owner::state(1),
        )
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::ConditionsWrite);

    let err = vm
        .compile("contract Also { conditions { Ok() } }", Owner::state(1))
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::ConditionsWrite);
}

#[test]
fn test_extern_calls() {
    let mut vm = VM::new();
    vm.options = CompileOptions { extern_calls: true };
    vm.compile(
        "contract Caller { action { $result = Later(\"\") } }",
        Owner::state(1),
    )
    .unwrap();
    vm.compile("contract Later { action { $result = \"late\" } }", Owner::state(1))
        .unwrap();
    let result = vm.run_contract(1, "Caller", &Map::new(), &mut Map::new()).unwrap();
    assert_eq!(result, Value::from("late"));
}

#[test]
fn test_settings_and_price() {
    let mut vm = token_vm();
    let id = vm.contract(1, "Token").unwrap();
    let settings = &vm.blocks[id].contract().unwrap().settings;
    assert_eq!(settings.get("fee"), Some(&Value::Int(2)));

    vm.set_contract_price(Rc::new(|name: &str| (name == "@1Token").then_some(1_000)));
    let mut cheap = Map::new();
    cheap.insert("txcost".into(), Value::Int(100_000));
    vm.run_contract(1, "Token", &params(&[("Amount", Value::Int(1))]), &mut cheap)
        .unwrap();
    let Some(Value::Int(left)) = cheap.get("txcost") else {
        panic!("txcost missing");
    };
    assert!(*left < 100_000 - 1_000 - 100);
}

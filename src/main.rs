//! Simvolio CLI and REPL
//!
//! Usage:
//!   simvolio run <file.sim> [--call <name>] [--config <file>]
//!   simvolio repl             - Start interactive REPL
//!   simvolio help             - Show help message

use std::env;
use std::fs;
use std::process;

use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tracing_subscriber::EnvFilter;

use simvolio::{Limits, Map, Owner, Value, VERSION, VM};

/// Ecosystem used for code loaded from the command line
const STATE: u32 = 1;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_help();
        return;
    }

    match args[1].as_str() {
        "run" => {
            if args.len() < 3 {
                eprintln!("{}: missing file argument", "error".red());
                eprintln!("Usage: simvolio run <file.sim> [--call <name>] [--config <file>]");
                process::exit(1);
            }
            let call = flag(&args, "--call").unwrap_or("main");
            let limits = load_limits(flag(&args, "--config"));
            run_file(&args[2], call, limits);
        }
        "repl" => run_repl(load_limits(flag(&args, "--config"))),
        "help" | "--help" | "-h" => print_help(),
        "version" | "--version" | "-v" => println!("Simvolio {}", VERSION),
        _ => {
            if args[1].ends_with(".sim") {
                run_file(&args[1], "main", Limits::default());
            } else {
                eprintln!("{}: unknown command '{}'", "error".red(), args[1]);
                print_help();
                process::exit(1);
            }
        }
    }
}

fn flag<'a>(args: &'a [String], name: &str) -> Option<&'a str> {
    args.iter()
        .position(|arg| arg == name)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

fn load_limits(path: Option<&str>) -> Limits {
    let Some(path) = path else {
        return Limits::default();
    };
    let source = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            eprintln!("{}: cannot read config '{}': {}", "error".red(), path, e);
            process::exit(1);
        }
    };
    match Limits::from_toml(&source) {
        Ok(limits) => limits,
        Err(e) => {
            eprintln!("{}: {}", "error".red(), e);
            process::exit(1);
        }
    }
}

fn print_help() {
    println!("{}", "Simvolio".cyan().bold());
    println!("A contract language for blockchain nodes");
    println!("{} {}\n", "Version".cyan(), VERSION);
    println!("{}", "USAGE:".yellow());
    println!("  simvolio run <file.sim>          Run main() of a source file");
    println!("      --call <name>                Run another function or a contract");
    println!("      --config <file>              Read execution limits from TOML");
    println!("  simvolio repl                    Start interactive REPL");
    println!("  simvolio help                    Show this help message");
    println!("  simvolio version                 Show version\n");
    println!("{}", "LANGUAGE FEATURES:".yellow());
    println!("  func sum(a, b int) int {{ return a + b }}");
    println!("  contract Transfer {{ data {{ Amount money }} action {{ $result = Amount }} }}");
    println!("  func q(t string).Where(w string) string {{ return t + w }}");
    println!("  $total = Sprintf(\"%d items\", Len(list))");
}

fn run_file(path: &str, call: &str, limits: Limits) {
    let source = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            eprintln!("{}: cannot read file '{}': {}", "error".red(), path, e);
            process::exit(1);
        }
    };

    let mut vm = VM::with_limits(limits);
    if let Err(e) = vm.compile(&source, Owner::state(STATE)) {
        eprintln!("{}", e);
        process::exit(1);
    }

    let mut env = Map::new();
    let result = if let Some(id) = vm.func(call) {
        vm.run(id, Vec::new(), &mut env)
    } else if vm.contract(STATE, call).is_some() {
        vm.run_contract(STATE, call, &Map::new(), &mut env).map(|value| vec![value])
    } else {
        eprintln!("{}: nothing named '{}' in {}", "error".red(), call, path);
        process::exit(1);
    };

    match result {
        Ok(values) => {
            for value in values.iter().filter(|v| !matches!(v, Value::Nil)) {
                println!("{}", value);
            }
        }
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    }
}

fn run_repl(limits: Limits) {
    println!(
        "{} {} - {}",
        "Simvolio".cyan().bold(),
        VERSION.cyan(),
        "contract language".dimmed()
    );
    println!("Type {} to exit, {} for help\n", "exit".yellow(), "help".yellow());

    let mut rl = match DefaultEditor::new() {
        Ok(rl) => rl,
        Err(e) => {
            eprintln!("{}: cannot start REPL: {}", "error".red(), e);
            process::exit(1);
        }
    };

    // One VM for the session so earlier declarations stay callable
    let mut vm = VM::with_limits(limits.clone());
    let mut env = Map::new();
    let mut unit = String::new();

    loop {
        let prompt = if unit.is_empty() { "sim>" } else { " ..." };
        match rl.readline(&format!("{} ", prompt.green().bold())) {
            Ok(line) => {
                if unit.is_empty() {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    let _ = rl.add_history_entry(trimmed);
                    match trimmed {
                        "exit" | "quit" => {
                            println!("{}", "Goodbye!".cyan());
                            break;
                        }
                        "help" => {
                            print_repl_help();
                            continue;
                        }
                        "clear" => {
                            vm = VM::with_limits(limits.clone());
                            env = Map::new();
                            println!("{}", "State cleared.".dimmed());
                            continue;
                        }
                        "env" => {
                            for (key, value) in &env {
                                println!("  ${} = {}", key, value);
                            }
                            continue;
                        }
                        _ => {}
                    }
                }
                unit.push_str(&line);
                unit.push('\n');
                let open = unit.matches('{').count() as i64 - unit.matches('}').count() as i64;
                if open > 0 {
                    continue;
                }
                let source = std::mem::take(&mut unit);
                eval_unit(&mut vm, &mut env, source.trim());
            }
            Err(ReadlineError::Interrupted) => {
                unit.clear();
                println!("{}", "^C".dimmed());
            }
            Err(ReadlineError::Eof) => {
                println!("{}", "Goodbye!".cyan());
                break;
            }
            Err(err) => {
                eprintln!("{}: {:?}", "error".red(), err);
                break;
            }
        }
    }
}

/// Declarations are compiled into the session, anything else is evaluated
fn eval_unit(vm: &mut VM, env: &mut Map, source: &str) {
    if source.starts_with("func ") || source.starts_with("contract ") {
        match vm.compile(source, Owner::state(STATE)) {
            Ok(()) => println!("{}", "ok".dimmed()),
            Err(e) => eprintln!("{}", e.to_string().red()),
        }
        return;
    }
    let result = vm
        .compile_eval(source, STATE)
        .and_then(|id| vm.run(id, Vec::new(), env));
    env.shift_remove("txcost");
    match result {
        Ok(values) => {
            for value in values {
                println!("{} {}", "=>".dimmed(), value.to_string().cyan());
            }
        }
        Err(e) => eprintln!("{}", e.to_string().red()),
    }
}

fn print_repl_help() {
    println!("{}", "REPL Commands:".yellow());
    println!("  exit, quit   Exit the REPL");
    println!("  clear        Drop every declaration and $ variable");
    println!("  env          Show the $ variables");
    println!("  help         Show this help\n");
    println!("{}", "Language Examples:".yellow());
    println!("  func double(n int) int {{ return n * 2 }}");
    println!("  double(21) + 1");
    println!("  Sprintf(\"%v\", [1, 2, 3])");
}

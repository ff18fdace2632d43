use std::{env, process, sync::Arc};

use kiln::{
    bytecode::{disassembler::disassemble_all, function::BytecodeFunction, image::FunctionImage},
    runtime::{config::VmConfig, registry::Registry, value::Value, vm::Vm},
};
use tracing::Level;

const EXIT_UNCAUGHT: i32 = 1;
const EXIT_USAGE: i32 = 2;

fn main() {
    let mut args: Vec<String> = env::args().collect();
    let verbose = args.iter().any(|arg| arg == "--verbose");
    let trace = args.iter().any(|arg| arg == "--trace");
    if verbose {
        args.retain(|arg| arg != "--verbose");
    }
    if trace {
        args.retain(|arg| arg != "--trace");
    }
    let config_path = extract_value(&mut args, "--config");
    let stack_slots = extract_number(&mut args, "--stack-slots");
    let max_reentrancy = extract_number(&mut args, "--max-reentrancy");

    init_tracing(verbose, trace);

    if args.len() < 2 {
        print_help();
        process::exit(EXIT_USAGE);
    }

    match args[1].as_str() {
        "-h" | "--help" | "help" => print_help(),
        "run" => {
            let Some(path) = args.get(2) else {
                eprintln!("Usage: kiln run <image.json>");
                process::exit(EXIT_USAGE);
            };
            let mut config = match config_path {
                Some(path) => VmConfig::load(&path).unwrap_or_else(|err| {
                    eprintln!("Error: {err}");
                    process::exit(EXIT_USAGE);
                }),
                None => VmConfig::default(),
            };
            if let Some(slots) = stack_slots {
                config.value_stack_slots = slots;
            }
            if let Some(limit) = max_reentrancy {
                config.max_reentrancy = limit;
            }
            config.trace |= trace;
            run_image(path, config);
        }
        "disasm" => {
            let Some(path) = args.get(2) else {
                eprintln!("Usage: kiln disasm <image.json>");
                process::exit(EXIT_USAGE);
            };
            disasm_image(path);
        }
        "verify" => {
            let Some(path) = args.get(2) else {
                eprintln!("Usage: kiln verify <image.json>");
                process::exit(EXIT_USAGE);
            };
            let registry = Registry::new();
            load_image(path, &registry);
            println!("{path}: ok");
        }
        other => {
            eprintln!("Error: unknown command `{other}`");
            print_help();
            process::exit(EXIT_USAGE);
        }
    }
}

fn init_tracing(verbose: bool, trace: bool) {
    let level = if trace {
        Level::TRACE
    } else if verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_image(path: &str, registry: &Registry) -> Arc<BytecodeFunction> {
    let image = FunctionImage::load(path).unwrap_or_else(|err| {
        eprintln!("Error: {err}");
        process::exit(EXIT_USAGE);
    });
    image.to_function(registry).unwrap_or_else(|err| {
        eprintln!("Error: {err}");
        process::exit(EXIT_USAGE);
    })
}

fn run_image(path: &str, config: VmConfig) {
    let registry = Registry::new();
    let function = load_image(path, &registry);
    let mut vm = Vm::with_config(registry, config).unwrap_or_else(|err| {
        eprintln!("Error: {err}");
        process::exit(EXIT_USAGE);
    });
    tracing::debug!(image = path, function = function.name(), "running image");
    match vm.run(function, &[]) {
        Ok(Value::Nil) => {}
        Ok(value) => println!("{}", value.repr()),
        Err(err) => {
            eprintln!("{err}");
            process::exit(EXIT_UNCAUGHT);
        }
    }
}

fn disasm_image(path: &str) {
    let registry = Registry::new();
    let function = load_image(path, &registry);
    match disassemble_all(&function, Some(&registry)) {
        Ok(listing) => print!("{listing}"),
        Err(err) => {
            eprintln!("Error: {err}");
            process::exit(EXIT_USAGE);
        }
    }
}

fn extract_value(args: &mut Vec<String>, flag: &str) -> Option<String> {
    let position = args.iter().position(|arg| arg == flag)?;
    if position + 1 >= args.len() {
        eprintln!("Usage: kiln run <image.json> {flag} <value>");
        process::exit(EXIT_USAGE);
    }
    let value = args.remove(position + 1);
    args.remove(position);
    Some(value)
}

fn extract_number(args: &mut Vec<String>, flag: &str) -> Option<usize> {
    let value = extract_value(args, flag)?;
    match value.parse::<usize>() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            eprintln!("Error: {flag} expects a non-negative integer.");
            process::exit(EXIT_USAGE);
        }
    }
}

fn print_help() {
    println!(
        "\
Kiln bytecode VM

Usage:
  kiln run <image.json>
  kiln disasm <image.json>
  kiln verify <image.json>

Flags:
  --config <file>          Load VM settings from a JSON file
  --stack-slots <n>        Value stack size in slots
  --max-reentrancy <n>     Limit nested dispatch loops
  --trace                  Log every executed instruction
  --verbose                Log calls, unwinding and pool activity
  -h, --help               Show this help message
"
    );
}

//! `vesper`: a REPL / script runner over `vesper-core`'s embedding API.
//!
//! Grounded on the teacher's `luars_interpreter::bin::main` (option parsing
//! shape, `-e`/`-i`/script-file dispatch, line-accumulating REPL that first
//! tries the input as an expression), trimmed to the options this spec's
//! surface actually has — no `package.path`/`LUA_PATH` story (spec §6 names
//! only `import(name)` plus a host-installable loader, not a search-path
//! convention) and no `-l`/`require` (the stdlib exposes `import`, not
//! `require`).

use std::env;
use std::fs;
use std::io::{self, BufRead, Read, Write};
use std::path::{Path, PathBuf};

use vesper_core::error::Result;
use vesper_core::vm::interp;
use vesper_core::{stdlib, Error, ErrorKind, RuntimeOptions, State, Value};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

const VERSION: &str = "vesper 0.1.0";

fn print_usage() {
    eprintln!("usage: vesper [options] [script]");
    eprintln!("Available options are:");
    eprintln!("  -e stat   execute string 'stat'");
    eprintln!("  -i        enter interactive mode after executing 'script'");
    eprintln!("  -v        show version information");
    eprintln!("  --        stop handling options");
    eprintln!("  -         stop handling options and execute stdin");
}

#[derive(Default)]
struct Options {
    execute_strings: Vec<String>,
    interactive: bool,
    script_file: Option<String>,
    show_version: bool,
    read_stdin: bool,
}

fn parse_args() -> std::result::Result<Options, String> {
    let args: Vec<String> = env::args().collect();
    let mut opts = Options::default();
    let mut i = 1;
    let mut stop_options = false;

    while i < args.len() {
        let arg = &args[i];
        if !stop_options && arg.starts_with('-') && arg.len() > 1 {
            match arg.as_str() {
                "-e" => {
                    i += 1;
                    if i >= args.len() {
                        return Err("'-e' needs argument".to_string());
                    }
                    opts.execute_strings.push(args[i].clone());
                }
                "-i" => opts.interactive = true,
                "-v" => opts.show_version = true,
                "--" => stop_options = true,
                _ => return Err(format!("unrecognized option '{arg}'")),
            }
        } else if !stop_options && arg == "-" {
            opts.read_stdin = true;
            stop_options = true;
        } else {
            opts.script_file = Some(arg.clone());
            i += 1;
            break;
        }
        i += 1;
    }
    let _ = i;
    Ok(opts)
}

/// Host-installed `import(name)` loader (spec §6 "Module protocol"):
/// resolves `name` to `<name>.vsp` next to the current working directory,
/// compiles it as a fresh chunk, and runs it to completion. A `module;`
/// chunk's implicit return is its exports table (see `compiler::parser`'s
/// `compile_chunk`); a plain script loaded this way simply returns nothing,
/// which `import` rejects as "did not return a table".
fn module_loader(state: &mut State) -> Result<usize> {
    let name = state
        .to_string_value(0)
        .ok_or_else(|| Error::type_error("bad argument #1 to module loader (string expected)"))?;
    let path = PathBuf::from(format!("{name}.vsp"));
    let source = fs::read_to_string(&path)
        .map_err(|e| Error::new(ErrorKind::RuntimeError, format!("cannot open '{}': {e}", path.display())))?;
    let proto = vesper_core::compiler::compile(&source, &path.to_string_lossy())?;
    let func = state
        .heap
        .alloc_function(vesper_core::value::function::Closure::new(std::rc::Rc::new(proto), Vec::new()))?;
    let pos = state.top();
    state.push(Value::Function(func));
    interp::call(state, pos, 0, 1)?;
    let result = state.get_abs(pos);
    state.set_top_abs(pos);
    state.push(result);
    Ok(1)
}

fn new_state() -> Result<State> {
    let mut state = State::new(RuntimeOptions::default());
    stdlib::open_libs(&mut state)?;
    state.set_module_loader(module_loader);
    Ok(state)
}

fn run_source(state: &mut State, source: &str, chunk_name: &str) -> Result<Vec<Value>> {
    let proto = vesper_core::compiler::compile(source, chunk_name)?;
    let func = state
        .heap
        .alloc_function(vesper_core::value::function::Closure::new(std::rc::Rc::new(proto), Vec::new()))?;
    let pos = state.top();
    state.push(Value::Function(func));
    interp::call(state, pos, 0, -1)?;
    let results: Vec<Value> = (pos..state.top()).map(|i| state.get_abs(i)).collect();
    state.set_top_abs(pos);
    Ok(results)
}

fn execute_file(state: &mut State, filename: &str) -> std::result::Result<(), String> {
    let source = fs::read_to_string(filename).map_err(|e| format!("cannot open {filename}: {e}"))?;
    let chunk_name = Path::new(filename)
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| filename.to_string());
    run_source(state, &source, &chunk_name).map(|_| ()).map_err(|e| e.to_string())
}

fn execute_stdin(state: &mut State) -> std::result::Result<(), String> {
    let mut source = String::new();
    io::stdin().read_to_string(&mut source).map_err(|e| format!("error reading stdin: {e}"))?;
    run_source(state, &source, "<stdin>").map(|_| ()).map_err(|e| e.to_string())
}

fn run_repl(state: &mut State) {
    println!("{VERSION}");
    println!("Type Ctrl+D to exit\n");

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    let mut incomplete = String::new();

    loop {
        if incomplete.is_empty() {
            print!("> ");
        } else {
            print!(">> ");
        }
        io::stdout().flush().ok();

        let line = match lines.next() {
            Some(Ok(line)) => line,
            _ => break,
        };
        let trimmed = line.trim();
        if incomplete.is_empty() && (trimmed == "exit" || trimmed == "quit") {
            break;
        }
        if !incomplete.is_empty() {
            incomplete.push('\n');
        }
        incomplete.push_str(&line);

        // Try it as an expression first, so `1 + 2` at the prompt prints 3
        // instead of requiring `return 1 + 2`.
        let expr_source = format!("return {incomplete}");
        let code = if vesper_core::compiler::compile(&expr_source, "<stdin>").is_ok() {
            expr_source
        } else {
            incomplete.clone()
        };

        match run_source(state, &code, "<stdin>") {
            Ok(results) => {
                for v in &results {
                    if !v.is_nil() {
                        match interp::tostring(state, *v) {
                            Ok(s) => println!("{s}"),
                            Err(e) => eprintln!("{e}"),
                        }
                    }
                }
                incomplete.clear();
            }
            Err(e) => {
                let msg = e.to_string();
                if matches!(e.kind, ErrorKind::SyntaxError | ErrorKind::ParserError) && msg.contains("Eof") {
                    continue;
                }
                eprintln!("{e}");
                incomplete.clear();
            }
        }
    }
}

fn main() {
    env_logger::init();

    let opts = match parse_args() {
        Ok(opts) => opts,
        Err(e) => {
            eprintln!("vesper: {e}");
            print_usage();
            std::process::exit(1);
        }
    };

    if opts.show_version {
        println!("{VERSION}");
        if opts.execute_strings.is_empty() && opts.script_file.is_none() && !opts.read_stdin {
            return;
        }
    }

    let mut state = match new_state() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("vesper: failed to initialize runtime: {e}");
            std::process::exit(1);
        }
    };

    for code in &opts.execute_strings {
        if let Err(e) = run_source(&mut state, code, "<command line>") {
            eprintln!("vesper: {e}");
            std::process::exit(1);
        }
    }

    if let Some(filename) = &opts.script_file {
        if let Err(e) = execute_file(&mut state, filename) {
            eprintln!("vesper: {e}");
            std::process::exit(1);
        }
    } else if opts.read_stdin {
        if let Err(e) = execute_stdin(&mut state) {
            eprintln!("vesper: {e}");
            std::process::exit(1);
        }
    }

    if opts.interactive || (opts.execute_strings.is_empty() && opts.script_file.is_none() && !opts.read_stdin) {
        run_repl(&mut state);
    }
}

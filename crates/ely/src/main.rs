use std::env;
use std::fs;
use std::io::Read;
use std::process;

use ely_lexer::{flagrant, tokenize};
use ely_vm::program::Program;
use ely_vm::{Compiler, Vm};

struct Options {
    debug: bool,
    lex: bool,
    eval: Option<String>,
    script: Option<String>,
}

fn main() {
    let mut opts = Options { debug: false, lex: false, eval: None, script: None };
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--debug" => opts.debug = true,
            "--lex" => opts.lex = true,
            "--help" => {
                print_usage();
                return;
            }
            "-e" => match args.next() {
                Some(s) => opts.eval = Some(s),
                None => {
                    eprintln!("ely: -e requires an argument");
                    process::exit(1);
                }
            },
            s if s.starts_with('-') => {
                eprintln!("ely: unknown option '{}'", s);
                print_usage();
                process::exit(1);
            }
            s => opts.script = Some(s.to_string()),
        }
    }

    let source = match (&opts.eval, &opts.script) {
        (Some(src), _) => src.clone(),
        (None, Some(path)) => match fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) => {
                eprintln!("ely: cannot read '{}': {}", path, e);
                process::exit(1);
            }
        },
        (None, None) => {
            let mut buf = String::new();
            if let Err(e) = std::io::stdin().read_to_string(&mut buf) {
                eprintln!("ely: cannot read stdin: {}", e);
                process::exit(1);
            }
            buf
        }
    };

    if opts.lex {
        run_lex(&source);
        return;
    }
    run_source(&source, opts.debug);
}

fn print_usage() {
    println!("Usage: ely [--debug] [--lex] [--help] [-e STRING] [SCRIPT]");
    println!();
    println!("  --debug     trace compilation and execution to stderr");
    println!("  --lex       print the token stream and exit");
    println!("  -e STRING   run STRING instead of a script file");
    println!("  SCRIPT      script file (stdin is read when omitted)");
}

fn run_lex(source: &str) {
    let (tokens, errors) = tokenize(source);
    for t in &tokens {
        println!("{:4}  {:?}", t.span.line, t.kind);
    }
    if !errors.is_empty() {
        for e in &errors {
            eprintln!("{}", flagrant(source, e.line(), e.column(), &e.message()));
        }
        process::exit(1);
    }
}

fn run_source(source: &str, debug: bool) {
    let program = match Compiler::compile(source) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    };

    if debug {
        dump_program(&program, "<script>");
    }

    let mut vm = Vm::new();
    vm.trace = debug;
    if let Err(e) = vm.run(program) {
        eprintln!("{}", e);
        process::exit(1);
    }
}

fn dump_program(program: &Program, name: &str) {
    eprintln!("{}", program.disassemble(name));
    for proto in &program.protos {
        dump_program(&proto.program, &proto.name);
    }
}

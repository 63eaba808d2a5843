//! The compiler driver: `sysyc mode input -o output`.
//!
//! The CLI contract is deliberately rigid (spec.md §6): exactly `mode input
//! -o output`, nothing else. A malformed invocation exits 1 with no
//! diagnostic at all — so we bypass clap's usual auto-generated error
//! output and fail silently on a parse error, same as the arity check it
//! replaces.

use clap::Parser;

use sysyc::pipeline::{self, Mode};

#[derive(Parser)]
#[command(disable_help_flag = true, disable_version_flag = true)]
struct Args {
    /// `-koopa` or `-riscv`.
    mode: String,
    /// Source file to compile.
    input: String,
    #[arg(short = 'o')]
    output: String,
}

fn main() {
    env_logger::init();

    let args = match Args::try_parse() {
        Ok(a) => a,
        Err(_) => std::process::exit(1),
    };

    if let Err(e) = run(&args) {
        log::error!("{e}");
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), sysyc::CompileError> {
    let mode = Mode::parse(&args.mode)?;

    log::debug!("reading {}", args.input);
    let source = std::fs::read_to_string(&args.input)
        .map_err(|source| sysyc::CompileError::Io { path: args.input.clone(), source })?;

    let output = pipeline::compile(&source, mode)?;

    print!("{output}");

    log::debug!("writing {}", args.output);
    std::fs::write(&args.output, output)
        .map_err(|source| sysyc::CompileError::Io { path: args.output.clone(), source })?;

    Ok(())
}

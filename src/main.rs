/// pscal CLI: compile and run C-like sources on the shared VM.
///
/// Exit codes: 0 success, 1 compile or runtime error, 2 usage error;
/// halt(n) inside the program forces n.

use clap::Parser as ClapParser;
use std::path::PathBuf;
use std::process::ExitCode;

use pscal::errors::PscalError;
use pscal::frontend::{self, Options};

// 64 MB stack keeps deeply recursive programs off the host stack limit.
const STACK_SIZE: usize = 64 * 1024 * 1024;

#[derive(ClapParser)]
#[command(
    name = "pscal",
    version = "0.1.0",
    about = "PSCAL toolchain: compile and run C-like sources on the shared bytecode VM",
    arg_required_else_help = true
)]
struct Cli {
    /// Source file to compile and run
    source: Option<PathBuf>,

    /// Arguments passed through to the program (paramstr/paramcount)
    #[arg(trailing_var_arg = true)]
    program_args: Vec<String>,

    /// Print the AST as JSON before codegen
    #[arg(long)]
    dump_ast_json: bool,

    /// Print the disassembled chunk before execution
    #[arg(long)]
    dump_bytecode: bool,

    /// Print the disassembled chunk and exit without running
    #[arg(long)]
    dump_bytecode_only: bool,

    /// Skip the bytecode cache for both load and save
    #[arg(long)]
    no_cache: bool,

    /// Verbose diagnostics (cache decisions, frame dumps on error)
    #[arg(long, short)]
    verbose: bool,

    /// Trace the first N instructions to stderr
    #[arg(long, value_name = "N", default_value_t = 0)]
    vm_trace_head: u32,

    /// List the extended builtins and exit
    #[arg(long)]
    dump_ext_builtins: bool,

    /// Preprocessor defines (repeatable)
    #[arg(long = "define", short = 'D', value_name = "NAME")]
    defines: Vec<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let outcome = std::thread::Builder::new()
        .name("pscal-worker".into())
        .stack_size(STACK_SIZE)
        .spawn(move || std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| run(cli))))
        .expect("failed to spawn pscal worker thread")
        .join();

    match outcome {
        Ok(Ok(code)) => code,
        Ok(Err(payload)) | Err(payload) => {
            let msg = if let Some(s) = payload.downcast_ref::<&str>() {
                s.to_string()
            } else if let Some(s) = payload.downcast_ref::<String>() {
                s.clone()
            } else {
                "unexpected panic in the pscal runtime".to_string()
            };
            eprintln!("pscal crashed: internal error: {}", msg);
            ExitCode::from(1)
        }
    }
}

fn run(cli: Cli) -> ExitCode {
    if cli.dump_ext_builtins {
        frontend::dump_extended_builtins();
        return ExitCode::SUCCESS;
    }

    let source = match cli.source {
        Some(path) => path,
        None => {
            eprintln!("usage: pscal [options] <source> [program args...]");
            return ExitCode::from(2);
        }
    };

    let opts = Options {
        dump_ast_json: cli.dump_ast_json,
        dump_bytecode: cli.dump_bytecode,
        dump_bytecode_only: cli.dump_bytecode_only,
        no_cache: cli.no_cache,
        verbose: cli.verbose,
        trace_head: cli.vm_trace_head,
        defines: cli.defines,
    };

    let verbose = opts.verbose;
    match frontend::run_source(&source, cli.program_args, &opts, None) {
        Ok(code) => ExitCode::from(code.clamp(0, 255) as u8),
        Err(err) => {
            report(&source, err, verbose);
            ExitCode::from(1)
        }
    }
}

/// Errors print one `<kind> at line <N>: <message>` line; aborts stay quiet.
/// Verbose mode routes through the miette renderer for source context.
fn report(source: &PathBuf, err: PscalError, verbose: bool) {
    if let PscalError::Runtime(runtime) = &err {
        if runtime.is_abort() {
            return;
        }
    }
    if verbose {
        let report = miette::miette!("{}: {}", source.display(), err);
        eprintln!("{:?}", report);
    } else {
        eprintln!("{}", err);
    }
}

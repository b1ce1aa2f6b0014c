/// Frontend bootstrap for the C-like surface.
///
/// Drives the shared pipeline: read source, conditional preprocess, lex,
/// parse (resolving imports into the dependency list), semantic annotation,
/// verifier, optimizer, verifier, cache lookup, codegen + cache save on a
/// miss, then VM execution with the interrupt handler installed. Cache
/// problems never fail the run; they downgrade to a warning and a fresh
/// compile.

pub mod lexer;
pub mod parser;
pub mod sema;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::ast::verify;
use crate::builtins;
use crate::bytecode::{disassemble, Chunk, Dependency};
use crate::cache;
use crate::codegen;
use crate::errors::PscalError;
use crate::opt;
use crate::preproc::preprocess;
use crate::symbols::SymbolTables;
use crate::vm::{install_interrupt_handler, Vm};

pub const COMPILER_ID: &str = "clike";

#[derive(Debug, Clone, Default)]
pub struct Options {
    pub dump_ast_json: bool,
    pub dump_bytecode: bool,
    pub dump_bytecode_only: bool,
    pub no_cache: bool,
    pub verbose: bool,
    pub trace_head: u32,
    pub defines: Vec<String>,
}

pub struct Compiled {
    pub chunk: Chunk,
    pub tables: SymbolTables,
    pub deps: Vec<Dependency>,
    pub from_cache: bool,
}

fn warn(opts: &Options, message: &str) {
    // PSCAL_STRICT_SUCCESS silences advisory output on otherwise clean runs.
    if std::env::var_os("PSCAL_STRICT_SUCCESS").is_some() {
        return;
    }
    if opts.verbose {
        eprintln!("pscal: {}", message);
    }
}

pub fn compile_source(source_path: &Path, opts: &Options) -> Result<Compiled, PscalError> {
    builtins::register_core_builtins();
    builtins::register_extended_builtins();
    builtins::install_clike_aliases();

    let text = std::fs::read_to_string(source_path)
        .map_err(|e| PscalError::Io(format!("cannot read '{}': {}", source_path.display(), e)))?;
    let text = preprocess(&text, &opts.defines)?;

    let tokens = lexer::Lexer::new(&text).tokenize()?;
    let source_dir = source_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let mut parser = parser::Parser::new(tokens, source_dir, opts.defines.clone());
    let mut program = parser.parse_program()?;
    let dep_paths = parser.deps.clone();

    let mut tables = SymbolTables::new();
    sema::analyze(&mut program, &mut tables)?;

    verify(&program)?;
    let program = opt::optimize(program);
    verify(&program)?;

    if opts.dump_ast_json {
        println!("{}", serde_json::to_string_pretty(&program.to_json()).unwrap_or_default());
    }

    let deps = cache::describe_deps(&dep_paths);
    let frontend = std::env::current_exe().ok();

    if !opts.no_cache {
        match cache::load(source_path, COMPILER_ID, frontend.as_deref(), &deps) {
            Ok(chunk) => {
                // Codegen never ran, so the procedure addresses come back
                // from the chunk's own CALL instructions.
                for (name, addr) in crate::bytecode::scan_call_targets(&chunk) {
                    if let Some(sym) = tables.procedures.lookup_mut(&name) {
                        sym.bytecode_address = addr;
                        sym.is_defined = true;
                    }
                }
                return Ok(Compiled { chunk, tables, deps, from_cache: true });
            }
            Err(err) => warn(opts, &format!("cache miss: {}", err)),
        }
    }

    let chunk = codegen::compile(&program, &mut tables)?;

    if !opts.no_cache {
        match cache::save(source_path, COMPILER_ID, &deps, &chunk) {
            Ok(true) => {}
            Ok(false) => warn(opts, "chunk holds uncacheable constants, skipping cache write"),
            Err(err) => warn(opts, &format!("cache write failed: {}", err)),
        }
    }
    Ok(Compiled { chunk, tables, deps, from_cache: false })
}

/// Compile (or load from cache) and execute. Returns the process exit code.
pub fn run_source(
    source_path: &Path,
    program_args: Vec<String>,
    opts: &Options,
    output: Option<Box<dyn Write + Send>>,
) -> Result<i32, PscalError> {
    let Compiled { chunk, mut tables, .. } = compile_source(source_path, opts)?;

    if opts.dump_bytecode || opts.dump_bytecode_only {
        print!(
            "{}",
            disassemble(
                &chunk,
                &source_path.display().to_string(),
                Some(&tables.procedures)
            )
        );
        if opts.dump_bytecode_only {
            return Ok(0);
        }
    }

    let procedures = Arc::new(std::mem::take(&mut tables.procedures));
    let mut vm = Vm::new(Arc::new(chunk), procedures)
        .with_args(program_args)
        .with_trace_head(opts.trace_head)
        .with_verbose(opts.verbose);
    if let Some(output) = output {
        vm = vm.with_output(output);
    }
    if std::env::var_os("PSCAL_INIT_TERM").is_some() {
        vm.init_terminal();
    }
    install_interrupt_handler(&vm);

    let code = vm.run()?;
    vm.flush_out();
    Ok(code)
}

pub fn dump_extended_builtins() {
    builtins::register_core_builtins();
    builtins::register_extended_builtins();
    for name in builtins::extended_builtin_names() {
        let detail = builtins::lookup(name)
            .map(|b| match b.kind {
                builtins::BuiltinKind::Function => "function",
                builtins::BuiltinKind::Procedure => "procedure",
            })
            .unwrap_or("unregistered");
        println!("{} ({})", name, detail);
    }
}

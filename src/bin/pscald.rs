/// pscald: disassemble a compiled .pbc bytecode file.
///
/// The listing goes to stdout. With --asm the raw file bytes are also
/// emitted to stderr as a PSCALASM hex block, which pscalasm re-assembles
/// byte-exactly:
///
///   pscald --asm input.pbc 2> dump.txt
///   pscalasm dump.txt rebuilt.pbc

use clap::Parser as ClapParser;
use std::path::PathBuf;
use std::process::ExitCode;

use pscal::builtins;
use pscal::bytecode::{disassemble, emit_asm_block, parse_pbc};

#[derive(ClapParser)]
#[command(name = "pscald", version = "0.1.0", about = "PSCAL bytecode disassembler")]
struct Cli {
    /// Compiled bytecode file (.pbc or a cache .bc entry)
    input: PathBuf,

    /// Emit the raw bytes as a PSCALASM hex block on stderr
    #[arg(long)]
    asm: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    builtins::register_core_builtins();
    builtins::register_extended_builtins();

    let bytes = match std::fs::read(&cli.input) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("pscald: cannot read '{}': {}", cli.input.display(), e);
            return ExitCode::from(2);
        }
    };

    let file = match parse_pbc(&bytes) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("pscald: failed to load bytecode from {}: {}", cli.input.display(), e);
            return ExitCode::from(1);
        }
    };

    println!("compiler: {}", file.compiler_id);
    for dep in &file.deps {
        println!("dep: {} (mtime {})", dep.path, dep.mtime);
    }
    print!(
        "{}",
        disassemble(&file.chunk, &cli.input.display().to_string(), None)
    );

    if cli.asm {
        eprint!("{}", emit_asm_block(&bytes));
    }
    ExitCode::SUCCESS
}

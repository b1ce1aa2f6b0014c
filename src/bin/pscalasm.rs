/// pscalasm: reassemble a PSCALASM hex block into a .pbc file.
///
///   pscald --asm input.pbc 2> dump.txt
///   pscalasm dump.txt rebuilt.pbc
///
/// Input `-` reads the dump from stdin. The output is byte-exact with the
/// file the dump was produced from.

use clap::Parser as ClapParser;
use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;

use pscal::bytecode::{parse_asm_block, parse_pbc};

#[derive(ClapParser)]
#[command(name = "pscalasm", version = "0.1.0", about = "PSCAL bytecode assembler")]
struct Cli {
    /// Disassembly text holding a PSCALASM block, or - for stdin
    input: String,

    /// Output bytecode file
    output: PathBuf,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let text = if cli.input == "-" {
        let mut buf = String::new();
        if let Err(e) = std::io::stdin().read_to_string(&mut buf) {
            eprintln!("pscalasm: cannot read stdin: {}", e);
            return ExitCode::from(2);
        }
        buf
    } else {
        match std::fs::read_to_string(&cli.input) {
            Ok(text) => text,
            Err(e) => {
                eprintln!("pscalasm: cannot read '{}': {}", cli.input, e);
                return ExitCode::from(2);
            }
        }
    };

    let bytes = match parse_asm_block(&text) {
        Some(bytes) => bytes,
        None => {
            eprintln!("pscalasm: no valid PSCALASM block found in input");
            return ExitCode::from(1);
        }
    };

    // Sanity-check the payload before writing so a corrupted dump does not
    // produce an unloadable file.
    if let Err(e) = parse_pbc(&bytes) {
        eprintln!("pscalasm: block does not decode as bytecode: {}", e);
        return ExitCode::from(1);
    }

    if let Err(e) = std::fs::write(&cli.output, &bytes) {
        eprintln!("pscalasm: cannot write '{}': {}", cli.output.display(), e);
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

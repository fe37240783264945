pub mod lexer;
mod parser;

pub use lexer::Lexer;
pub use parser::compile;

use std::fs;
use std::path::Path;

use crate::config::RuntimeConfig;
use crate::vm::{debug, Vm};

/// Compile and run the given source code.
pub fn run_source(filename: &str, source: &str, config: &RuntimeConfig) -> Result<(), String> {
    let function = compile(filename, source)?;

    if config.dump_bytecode {
        eprint!("{}", debug::disassemble_chunk(&function.chunk, "<script>"));
    }

    let mut vm = Vm::new();
    vm.set_trace(config.trace_execution);
    vm.interpret(function)
}

/// Compile and run a file.
pub fn run_file(path: &Path, config: &RuntimeConfig) -> Result<(), String> {
    let source = read_source(path)?;
    run_source(&path.to_string_lossy(), &source, config)
}

/// Compile a file without running it.
pub fn check_file(path: &Path) -> Result<(), String> {
    let source = read_source(path)?;
    compile(&path.to_string_lossy(), &source)?;
    Ok(())
}

/// Compile a file and render its bytecode listing.
pub fn disassemble_file(path: &Path) -> Result<String, String> {
    let source = read_source(path)?;
    let function = compile(&path.to_string_lossy(), &source)?;
    Ok(debug::disassemble_chunk(&function.chunk, "<script>"))
}

fn read_source(path: &Path) -> Result<String, String> {
    fs::read_to_string(path).map_err(|e| format!("failed to read {}: {}", path.display(), e))
}

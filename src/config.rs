//! Runtime configuration types.

/// Runtime configuration for the VM.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeConfig {
    /// Print each instruction and the stack to stderr while running.
    pub trace_execution: bool,
    /// Dump compiled bytecode to stderr before running.
    pub dump_bytecode: bool,
}

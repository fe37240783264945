//! Lumo - a small scripting language
//!
//! This library provides the lumo compiler and virtual machine.

pub mod compiler;
pub mod config;
pub mod package;
pub mod vm;

// Re-export commonly used types
pub use config::RuntimeConfig;
pub use vm::{Chunk, OpCode, Value, Vm};

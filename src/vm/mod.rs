pub mod chunk;
pub mod debug;
pub mod natives;
pub mod value;
mod vm;

pub use chunk::{Chunk, OpCode};
pub use value::{Obj, ObjFunction, ObjNative, ObjString, Value};
pub use vm::Vm;

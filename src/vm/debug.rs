//! Human-readable bytecode listings, used by the `dis` subcommand, the
//! `--dump-bytecode` flag, and the execution tracer.

use super::chunk::{Chunk, OpCode};
use super::value::{Obj, Value};

/// Render a whole chunk, then every function nested in its constant pool.
pub fn disassemble_chunk(chunk: &Chunk, name: &str) -> String {
    let mut out = format!("== {} ==\n", name);

    let mut offset = 0;
    while offset < chunk.code.len() {
        out.push_str(&disassemble_instruction(chunk, offset));
        offset += instruction_width(chunk, offset);
    }

    for constant in &chunk.constants {
        if let Value::Obj(Obj::Function(function)) = constant {
            out.push('\n');
            out.push_str(&disassemble_chunk(&function.chunk, function.name_str()));
        }
    }

    out
}

/// Render the single instruction at `offset`, with a trailing newline.
pub fn disassemble_instruction(chunk: &Chunk, offset: usize) -> String {
    let mut out = format!("{:04} ", offset);

    if offset > 0 && chunk.line_at(offset) == chunk.line_at(offset - 1) {
        out.push_str("   | ");
    } else {
        out.push_str(&format!("{:4} ", chunk.line_at(offset)));
    }

    let byte = chunk.code[offset];
    let Ok(op) = OpCode::try_from(byte) else {
        out.push_str(&format!("Unknown opcode {}\n", byte));
        return out;
    };

    match op {
        OpCode::Constant | OpCode::GetGlobal | OpCode::DefineGlobal | OpCode::SetGlobal => {
            let index = chunk.code[offset + 1] as usize;
            out.push_str(&format!(
                "{:<16} {:4} '{}'\n",
                op.name(),
                index,
                chunk.constants[index]
            ));
        }
        OpCode::GetLocal | OpCode::SetLocal | OpCode::Call => {
            let operand = chunk.code[offset + 1];
            out.push_str(&format!("{:<16} {:4}\n", op.name(), operand));
        }
        OpCode::Jump | OpCode::JumpIfFalse | OpCode::Loop => {
            let distance =
                ((chunk.code[offset + 1] as usize) << 8) | chunk.code[offset + 2] as usize;
            let target = if op == OpCode::Loop {
                offset + 3 - distance
            } else {
                offset + 3 + distance
            };
            out.push_str(&format!("{:<16} {:4} -> {}\n", op.name(), offset, target));
        }
        _ => {
            out.push_str(&format!("{}\n", op.name()));
        }
    }

    out
}

fn instruction_width(chunk: &Chunk, offset: usize) -> usize {
    match OpCode::try_from(chunk.code[offset]) {
        Ok(op) => 1 + op.operand_width(),
        Err(_) => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile;

    #[test]
    fn test_lists_opcodes_with_offsets_and_lines() {
        let function = compile("test.lumo", "info 1 + 2;").unwrap();
        let listing = disassemble_chunk(&function.chunk, "<script>");

        assert!(listing.starts_with("== <script> ==\n"), "{}", listing);
        assert!(listing.contains("0000    1 CONSTANT"), "{}", listing);
        assert!(listing.contains("ADD"), "{}", listing);
        assert!(listing.contains("INFO"), "{}", listing);
        assert!(listing.contains("RETURN"), "{}", listing);
        // Same-line instructions collapse the line column.
        assert!(listing.contains("   | "), "{}", listing);
    }

    #[test]
    fn test_constant_operands_show_their_value() {
        let function = compile("test.lumo", "have x = 42;").unwrap();
        let listing = disassemble_chunk(&function.chunk, "<script>");
        assert!(listing.contains("'42'"), "{}", listing);
        assert!(listing.contains("DEFINE_GLOBAL"), "{}", listing);
        assert!(listing.contains("'x'"), "{}", listing);
    }

    #[test]
    fn test_jump_targets_are_resolved() {
        let function = compile("test.lumo", "if (true) info 1;").unwrap();
        let listing = disassemble_chunk(&function.chunk, "<script>");
        // JUMP_IF_FALSE at 1 spans to the else pop at 11.
        assert!(listing.contains("JUMP_IF_FALSE       1 -> 11"), "{}", listing);
    }

    #[test]
    fn test_loop_target_points_backward() {
        let function = compile("test.lumo", "while (true) info 1;").unwrap();
        let listing = disassemble_chunk(&function.chunk, "<script>");
        assert!(listing.contains("LOOP                8 -> 0"), "{}", listing);
    }

    #[test]
    fn test_nested_functions_get_their_own_section() {
        let function = compile("test.lumo", "func f() { return 1; }").unwrap();
        let listing = disassemble_chunk(&function.chunk, "<script>");
        assert!(listing.contains("== f =="), "{}", listing);
    }
}

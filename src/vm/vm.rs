//! The bytecode interpreter: a stack machine over call frames.

use std::collections::HashMap;
use std::io::{self, Write};
use std::rc::Rc;

use super::chunk::OpCode;
use super::debug;
use super::natives;
use super::value::{Obj, ObjFunction, Value};

/// Call-frame cap; recursing past it is a runtime error, not a crash.
const FRAMES_MAX: usize = 64;

/// One function activation: the function being run, the instruction pointer
/// into its chunk, and the stack slot its window starts at (slot `base`
/// holds the function value itself).
struct CallFrame {
    function: Rc<ObjFunction>,
    ip: usize,
    base: usize,
}

/// The interpreter. Output from `info` goes to the injected writer, so runs
/// are capturable in tests; diagnostics and traces go to stderr.
pub struct Vm<W: Write> {
    frames: Vec<CallFrame>,
    stack: Vec<Value>,
    globals: HashMap<String, Value>,
    out: W,
    trace: bool,
}

impl Vm<io::Stdout> {
    pub fn new() -> Self {
        Self::with_output(io::stdout())
    }
}

impl Default for Vm<io::Stdout> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W: Write> Vm<W> {
    pub fn with_output(out: W) -> Self {
        Self {
            frames: Vec::new(),
            stack: Vec::new(),
            globals: HashMap::new(),
            out,
            trace: false,
        }
    }

    /// Print each instruction and the stack to stderr while running.
    pub fn set_trace(&mut self, trace: bool) {
        self.trace = trace;
    }

    pub fn into_output(self) -> W {
        self.out
    }

    /// Run a compiled script to completion.
    pub fn interpret(&mut self, function: ObjFunction) -> Result<(), String> {
        let function = Rc::new(function);
        self.stack.push(Value::Obj(Obj::Function(function.clone())));
        self.frames.push(CallFrame {
            function,
            ip: 0,
            base: 0,
        });
        self.run()
    }

    // ---- frame and stack plumbing -----------------------------------------

    fn read_byte(&mut self) -> u8 {
        let i = self.frames.len() - 1;
        let frame = &mut self.frames[i];
        let byte = frame.function.chunk.code[frame.ip];
        frame.ip += 1;
        byte
    }

    fn read_u16(&mut self) -> usize {
        let hi = self.read_byte() as usize;
        let lo = self.read_byte() as usize;
        (hi << 8) | lo
    }

    fn read_constant(&mut self) -> Value {
        let index = self.read_byte() as usize;
        let frame = &self.frames[self.frames.len() - 1];
        frame.function.chunk.constants[index].clone()
    }

    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> Result<Value, String> {
        match self.stack.pop() {
            Some(value) => Ok(value),
            None => Err(self.runtime_error("Stack underflow.")),
        }
    }

    fn peek(&self, distance: usize) -> &Value {
        &self.stack[self.stack.len() - 1 - distance]
    }

    /// Format a runtime error with a stack trace, innermost frame first.
    fn runtime_error(&self, message: &str) -> String {
        let mut report = format!("runtime error: {}", message);
        for frame in self.frames.iter().rev() {
            let line = frame.function.chunk.line_at(frame.ip.saturating_sub(1));
            report.push_str(&format!(
                "\n  [line {}] in {}",
                line,
                frame.function.name_str()
            ));
        }
        report
    }

    // ---- dispatch loop -----------------------------------------------------

    fn run(&mut self) -> Result<(), String> {
        loop {
            if self.trace {
                self.trace_instruction();
            }

            let byte = self.read_byte();
            let op = OpCode::try_from(byte)
                .map_err(|b| self.runtime_error(&format!("Unknown opcode {}.", b)))?;

            match op {
                OpCode::Constant => {
                    let value = self.read_constant();
                    self.push(value);
                }
                OpCode::Nil => self.push(Value::Nil),
                OpCode::True => self.push(Value::Bool(true)),
                OpCode::False => self.push(Value::Bool(false)),
                OpCode::Pop => {
                    self.pop()?;
                }

                OpCode::GetLocal => {
                    let slot = self.read_byte() as usize;
                    let base = self.frames[self.frames.len() - 1].base;
                    let value = self.stack[base + slot].clone();
                    self.push(value);
                }
                OpCode::SetLocal => {
                    let slot = self.read_byte() as usize;
                    let base = self.frames[self.frames.len() - 1].base;
                    // Assignment is an expression: the value stays pushed.
                    self.stack[base + slot] = self.peek(0).clone();
                }
                OpCode::GetGlobal => {
                    let name = self.read_constant();
                    let Some(name) = name.as_str() else {
                        return Err(self.runtime_error("Variable name must be a string."));
                    };
                    match self.globals.get(name) {
                        Some(value) => {
                            let value = value.clone();
                            self.push(value);
                        }
                        None => {
                            let message = format!("Undefined variable '{}'.", name);
                            return Err(self.runtime_error(&message));
                        }
                    }
                }
                OpCode::DefineGlobal => {
                    let name = self.read_constant();
                    let Some(name) = name.as_str() else {
                        return Err(self.runtime_error("Variable name must be a string."));
                    };
                    let name = name.to_string();
                    let value = self.pop()?;
                    self.globals.insert(name, value);
                }
                OpCode::SetGlobal => {
                    let name = self.read_constant();
                    let Some(name) = name.as_str() else {
                        return Err(self.runtime_error("Variable name must be a string."));
                    };
                    if !self.globals.contains_key(name) {
                        let message = format!("Undefined variable '{}'.", name);
                        return Err(self.runtime_error(&message));
                    }
                    let value = self.peek(0).clone();
                    self.globals.insert(name.to_string(), value);
                }

                OpCode::Equal => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    self.push(Value::Bool(a == b));
                }
                OpCode::Greater => {
                    self.binary_number_op(|a, b| Value::Bool(a > b))?;
                }
                OpCode::Less => {
                    self.binary_number_op(|a, b| Value::Bool(a < b))?;
                }

                OpCode::Add => {
                    let b = self.peek(0).clone();
                    let a = self.peek(1).clone();
                    match (a, b) {
                        (Value::Number(a), Value::Number(b)) => {
                            self.pop()?;
                            self.pop()?;
                            self.push(Value::Number(a + b));
                        }
                        (Value::Obj(Obj::Str(a)), Value::Obj(Obj::Str(b))) => {
                            self.pop()?;
                            self.pop()?;
                            let joined = format!("{}{}", a.as_str(), b.as_str());
                            self.push(Value::string(&joined));
                        }
                        _ => {
                            return Err(self
                                .runtime_error("Operands must be two numbers or two strings."));
                        }
                    }
                }
                OpCode::Subtract => self.binary_number_op(|a, b| Value::Number(a - b))?,
                OpCode::Multiply => self.binary_number_op(|a, b| Value::Number(a * b))?,
                OpCode::Divide => self.binary_number_op(|a, b| Value::Number(a / b))?,
                OpCode::Modulo => self.binary_number_op(|a, b| Value::Number(a % b))?,
                OpCode::Power => self.binary_number_op(|a, b| Value::Number(a.powf(b)))?,

                OpCode::Not => {
                    let value = self.pop()?;
                    self.push(Value::Bool(!value.is_truthy()));
                }
                OpCode::Negate => {
                    let Some(n) = self.peek(0).as_number() else {
                        return Err(self.runtime_error("Operand must be a number."));
                    };
                    self.pop()?;
                    self.push(Value::Number(-n));
                }

                OpCode::Jump => {
                    let offset = self.read_u16();
                    let i = self.frames.len() - 1;
                    self.frames[i].ip += offset;
                }
                OpCode::JumpIfFalse => {
                    let offset = self.read_u16();
                    if !self.peek(0).is_truthy() {
                        let i = self.frames.len() - 1;
                        self.frames[i].ip += offset;
                    }
                }
                OpCode::Loop => {
                    let offset = self.read_u16();
                    let i = self.frames.len() - 1;
                    self.frames[i].ip -= offset;
                }

                OpCode::Call => {
                    let arg_count = self.read_byte() as usize;
                    let callee = self.peek(arg_count).clone();
                    self.call_value(callee, arg_count)?;
                }
                OpCode::Return => {
                    let result = self.pop()?;
                    let Some(frame) = self.frames.pop() else {
                        return Ok(());
                    };
                    if self.frames.is_empty() {
                        // The script function in slot 0.
                        self.pop()?;
                        return Ok(());
                    }
                    self.stack.truncate(frame.base);
                    self.push(result);
                }

                OpCode::Info => {
                    let value = self.pop()?;
                    writeln!(self.out, "{}", value)
                        .map_err(|e| self.runtime_error(&format!("Write failed: {}.", e)))?;
                }
                OpCode::Import => {
                    let module = self.pop()?;
                    let Some(module) = module.as_str() else {
                        return Err(self.runtime_error("Module name must be a string."));
                    };
                    if !natives::install(module, &mut self.globals) {
                        let message = format!("Unknown native module '{}'.", module);
                        return Err(self.runtime_error(&message));
                    }
                }
            }
        }
    }

    fn binary_number_op(&mut self, op: impl Fn(f64, f64) -> Value) -> Result<(), String> {
        let (Some(b), Some(a)) = (self.peek(0).as_number(), self.peek(1).as_number()) else {
            return Err(self.runtime_error("Operands must be numbers."));
        };
        self.pop()?;
        self.pop()?;
        self.push(op(a, b));
        Ok(())
    }

    fn call_value(&mut self, callee: Value, arg_count: usize) -> Result<(), String> {
        match callee {
            Value::Obj(Obj::Function(function)) => {
                if arg_count != function.arity as usize {
                    let message = format!(
                        "Expected {} arguments but got {}.",
                        function.arity, arg_count
                    );
                    return Err(self.runtime_error(&message));
                }
                if self.frames.len() == FRAMES_MAX {
                    return Err(self.runtime_error("Stack overflow."));
                }
                let base = self.stack.len() - arg_count - 1;
                self.frames.push(CallFrame {
                    function,
                    ip: 0,
                    base,
                });
                Ok(())
            }
            Value::Obj(Obj::Native(native)) => {
                let args_at = self.stack.len() - arg_count;
                let result = (native.function)(&self.stack[args_at..])
                    .map_err(|e| self.runtime_error(&e))?;
                self.stack.truncate(args_at - 1);
                self.push(result);
                Ok(())
            }
            _ => Err(self.runtime_error("Can only call functions.")),
        }
    }

    fn trace_instruction(&self) {
        let frame = &self.frames[self.frames.len() - 1];
        let mut stack_line = String::from("          ");
        for value in &self.stack {
            stack_line.push_str(&format!("[ {} ]", value));
        }
        eprintln!("{}", stack_line);
        eprint!(
            "{}",
            debug::disassemble_instruction(&frame.function.chunk, frame.ip)
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile;

    /// Compile and run `source`, returning everything `info` printed.
    fn run_capture(source: &str) -> Result<String, String> {
        let function = compile("test.lumo", source)?;
        let mut vm = Vm::with_output(Vec::new());
        vm.interpret(function)?;
        Ok(String::from_utf8(vm.into_output()).unwrap())
    }

    #[test]
    fn test_arithmetic_precedence() {
        assert_eq!(run_capture("info 1 + 2 * 3;").unwrap(), "7\n");
        assert_eq!(run_capture("info (1 + 2) * 3;").unwrap(), "9\n");
        assert_eq!(run_capture("info 10 % 3;").unwrap(), "1\n");
        assert_eq!(run_capture("info 2 ^ 10;").unwrap(), "1024\n");
        assert_eq!(run_capture("info -2 + 3;").unwrap(), "1\n");
        assert_eq!(run_capture("info 1 / 2;").unwrap(), "0.5\n");
    }

    #[test]
    fn test_power_evaluates_left_to_right() {
        assert_eq!(run_capture("info 2 ^ 3 ^ 2;").unwrap(), "64\n");
    }

    #[test]
    fn test_string_concatenation() {
        assert_eq!(
            run_capture("info \"foo\" + \"bar\";").unwrap(),
            "foobar\n"
        );
    }

    #[test]
    fn test_comparisons_and_equality() {
        let out = run_capture(
            "info 1 < 2; info 2 <= 2; info 3 > 4; info 1 == 1; info 1 != 1; info \"a\" == \"a\";",
        )
        .unwrap();
        assert_eq!(out, "true\ntrue\nfalse\ntrue\nfalse\ntrue\n");
    }

    #[test]
    fn test_truthiness_of_not() {
        assert_eq!(run_capture("info !nil;").unwrap(), "true\n");
        assert_eq!(run_capture("info !0;").unwrap(), "false\n");
        assert_eq!(run_capture("info !!\"\";").unwrap(), "true\n");
    }

    #[test]
    fn test_globals_define_and_assign() {
        let out = run_capture("have x = 1; info x; x = x + 1; info x;").unwrap();
        assert_eq!(out, "1\n2\n");
    }

    #[test]
    fn test_uninitialized_global_is_nil() {
        assert_eq!(run_capture("have x; info x;").unwrap(), "nil\n");
    }

    #[test]
    fn test_locals_and_shadowing() {
        let out = run_capture(
            "have a = \"global\";\n{ have a = \"outer\"; { have a = \"inner\"; info a; } info a; }\ninfo a;",
        )
        .unwrap();
        assert_eq!(out, "inner\nouter\nglobal\n");
    }

    #[test]
    fn test_if_else_branches() {
        assert_eq!(
            run_capture("if (1 < 2) info \"yes\"; else info \"no\";").unwrap(),
            "yes\n"
        );
        assert_eq!(
            run_capture("if (1 > 2) info \"yes\"; else info \"no\";").unwrap(),
            "no\n"
        );
    }

    #[test]
    fn test_logical_operators_yield_operands() {
        let out = run_capture("info 1 and 2; info nil and 2; info nil or \"x\"; info 1 or 2;")
            .unwrap();
        assert_eq!(out, "2\nnil\nx\n1\n");
    }

    #[test]
    fn test_and_short_circuits_side_effects() {
        let out =
            run_capture("func boom() { info \"boom\"; } false and boom(); info \"done\";")
                .unwrap();
        assert_eq!(out, "done\n");
    }

    #[test]
    fn test_while_loop() {
        let out = run_capture("have i = 0; while (i < 3) { info i; i = i + 1; }").unwrap();
        assert_eq!(out, "0\n1\n2\n");
    }

    #[test]
    fn test_for_loop_clause_order() {
        let out = run_capture("for (have i = 0; i < 3; i = i + 1) info i;").unwrap();
        assert_eq!(out, "0\n1\n2\n");
    }

    #[test]
    fn test_break_exits_loop() {
        let out = run_capture(
            "for (have i = 0; i < 10; i = i + 1) { if (i == 3) { break; } info i; } info \"end\";",
        )
        .unwrap();
        assert_eq!(out, "0\n1\n2\nend\n");
    }

    #[test]
    fn test_continue_runs_increment() {
        let out = run_capture(
            "for (have i = 0; i < 5; i = i + 1) { if (i % 2 == 0) { continue; } info i; }",
        )
        .unwrap();
        assert_eq!(out, "1\n3\n");
    }

    #[test]
    fn test_break_in_while_with_locals() {
        let out = run_capture(
            "have n = 0; while (true) { have step = 2; n = n + step; if (n >= 6) { break; } } info n;",
        )
        .unwrap();
        assert_eq!(out, "6\n");
    }

    #[test]
    fn test_function_call_and_return() {
        let out = run_capture("func add(a, b) { return a + b; } info add(1, 2);").unwrap();
        assert_eq!(out, "3\n");
    }

    #[test]
    fn test_function_without_return_yields_nil() {
        assert_eq!(
            run_capture("func noop() {} info noop();").unwrap(),
            "nil\n"
        );
    }

    #[test]
    fn test_recursion_fib() {
        let out = run_capture(
            "func fib(n) { if (n < 2) { return n; } return fib(n - 1) + fib(n - 2); } info fib(10);",
        )
        .unwrap();
        assert_eq!(out, "55\n");
    }

    #[test]
    fn test_function_prints_as_fn_name() {
        let out = run_capture("func greet() {} info greet;").unwrap();
        assert_eq!(out, "<fn greet>\n");
    }

    #[test]
    fn test_arity_mismatch() {
        let err = run_capture("func f(a) {} f();").unwrap_err();
        assert!(err.contains("Expected 1 arguments but got 0."), "{}", err);
    }

    #[test]
    fn test_call_non_callable() {
        let err = run_capture("have x = 1; x();").unwrap_err();
        assert!(err.contains("Can only call functions."), "{}", err);
    }

    #[test]
    fn test_stack_overflow_on_runaway_recursion() {
        let err = run_capture("func f() { return f(); } f();").unwrap_err();
        assert!(err.contains("Stack overflow."), "{}", err);
    }

    #[test]
    fn test_undefined_variable() {
        let err = run_capture("info missing;").unwrap_err();
        assert!(err.contains("Undefined variable 'missing'."), "{}", err);
    }

    #[test]
    fn test_assignment_to_undefined_global() {
        let err = run_capture("missing = 1;").unwrap_err();
        assert!(err.contains("Undefined variable 'missing'."), "{}", err);
    }

    #[test]
    fn test_add_type_error() {
        let err = run_capture("info 1 + \"one\";").unwrap_err();
        assert!(
            err.contains("Operands must be two numbers or two strings."),
            "{}",
            err
        );
    }

    #[test]
    fn test_numeric_op_type_error() {
        let err = run_capture("info \"a\" * 2;").unwrap_err();
        assert!(err.contains("Operands must be numbers."), "{}", err);
    }

    #[test]
    fn test_negate_type_error() {
        let err = run_capture("info -\"a\";").unwrap_err();
        assert!(err.contains("Operand must be a number."), "{}", err);
    }

    #[test]
    fn test_runtime_error_carries_line_and_function() {
        let err = run_capture("func f() {\n return 1 + nil;\n}\nf();").unwrap_err();
        assert!(err.contains("[line 2] in f"), "{}", err);
        assert!(err.contains("in <script>"), "{}", err);
    }

    #[test]
    fn test_import_installs_module_natives() {
        let out = run_capture("using \"math\"; info abs(-5);").unwrap();
        assert_eq!(out, "5\n");
    }

    #[test]
    fn test_unknown_module_is_a_runtime_error() {
        let err = run_capture("using \"nope\";").unwrap_err();
        assert!(err.contains("Unknown native module 'nope'."), "{}", err);
    }

    #[test]
    fn test_native_error_is_a_runtime_error() {
        let err = run_capture("using \"math\"; abs(\"x\");").unwrap_err();
        assert!(err.contains("runtime error:"), "{}", err);
    }

    #[test]
    fn test_native_prints_as_native_fn() {
        let out = run_capture("using \"std\"; info len;").unwrap();
        assert_eq!(out, "<native fn len>\n");
    }

    #[test]
    fn test_assignment_is_an_expression_value() {
        let out = run_capture("have x = 1; have y = x = 5; info y; info x;").unwrap();
        assert_eq!(out, "5\n5\n");
    }

    #[test]
    fn test_scope_exit_restores_stack_discipline() {
        // Locals from an inner block must not leak into later reads.
        let out = run_capture(
            "{ have a = 1; have b = 2; } { have c = 3; info c; }",
        )
        .unwrap();
        assert_eq!(out, "3\n");
    }
}

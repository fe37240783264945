//! Single-pass compiler: a Pratt parser that emits bytecode as it goes.
//!
//! There is no AST. Each declaration is parsed and compiled in one walk over
//! the token stream; forward control flow is emitted with two-byte
//! placeholder operands that are patched once the target offset is known.

use std::mem;
use std::rc::Rc;

use crate::compiler::lexer::{Lexer, Span, Token, TokenKind};
use crate::vm::chunk::OpCode;
use crate::vm::value::{ObjFunction, ObjString, Value};

/// Local-slot operands are one byte, so a function holds at most 256 locals
/// (slot 0 is reserved for the function itself).
const MAX_LOCALS: usize = 256;

/// Jump and loop operands are unsigned 16-bit distances.
const MAX_JUMP: usize = u16::MAX as usize;

/// Compile `source` into the top-level function object.
///
/// All compile errors found in one pass are reported together; when any
/// error was recorded, no function is produced.
pub fn compile(filename: &str, source: &str) -> Result<ObjFunction, String> {
    let mut lexer = Lexer::new(filename, source);
    let tokens = lexer.scan_tokens()?;

    let mut compiler = Compiler::new(filename, tokens);
    compiler.advance();
    while !compiler.match_token(&TokenKind::Eof) {
        compiler.declaration();
    }
    let function = compiler.end_compiler();

    if compiler.errors.is_empty() {
        Ok(function)
    } else {
        Err(compiler.errors.join("\n"))
    }
}

/// Binding precedence, weakest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    None,
    Assignment, // =
    Or,         // or
    And,        // and
    Equality,   // == !=
    Comparison, // < > <= >=
    Term,       // + -
    Factor,     // * / %
    Power,      // ^
    Unary,      // ! -
    Call,       // ()
    Primary,
}

impl Precedence {
    /// The next-stronger level; compiling every binary right operand one
    /// level up makes all binary operators left-associative, `^` included.
    fn next(self) -> Precedence {
        match self {
            Precedence::None => Precedence::Assignment,
            Precedence::Assignment => Precedence::Or,
            Precedence::Or => Precedence::And,
            Precedence::And => Precedence::Equality,
            Precedence::Equality => Precedence::Comparison,
            Precedence::Comparison => Precedence::Term,
            Precedence::Term => Precedence::Factor,
            Precedence::Factor => Precedence::Power,
            Precedence::Power => Precedence::Unary,
            Precedence::Unary => Precedence::Call,
            Precedence::Call | Precedence::Primary => Precedence::Primary,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum PrefixRule {
    Grouping,
    Unary,
    Number,
    String,
    Literal,
    Variable,
}

#[derive(Debug, Clone, Copy)]
enum InfixRule {
    Binary,
    And,
    Or,
    Call,
}

struct ParseRule {
    prefix: Option<PrefixRule>,
    infix: Option<InfixRule>,
    precedence: Precedence,
}

const fn rule(
    prefix: Option<PrefixRule>,
    infix: Option<InfixRule>,
    precedence: Precedence,
) -> ParseRule {
    ParseRule {
        prefix,
        infix,
        precedence,
    }
}

/// The Pratt table: prefix action, infix action, and binding precedence per
/// token kind. Anything absent here rejects with "Expect expression.".
fn get_rule(kind: &TokenKind) -> ParseRule {
    match kind {
        TokenKind::LParen => rule(
            Some(PrefixRule::Grouping),
            Some(InfixRule::Call),
            Precedence::Call,
        ),
        TokenKind::Minus => rule(
            Some(PrefixRule::Unary),
            Some(InfixRule::Binary),
            Precedence::Term,
        ),
        TokenKind::Plus => rule(None, Some(InfixRule::Binary), Precedence::Term),
        TokenKind::Star | TokenKind::Slash | TokenKind::Percent => {
            rule(None, Some(InfixRule::Binary), Precedence::Factor)
        }
        TokenKind::Caret => rule(None, Some(InfixRule::Binary), Precedence::Power),
        TokenKind::Bang => rule(Some(PrefixRule::Unary), None, Precedence::None),
        TokenKind::BangEq | TokenKind::EqEq => {
            rule(None, Some(InfixRule::Binary), Precedence::Equality)
        }
        TokenKind::Gt | TokenKind::Ge | TokenKind::Lt | TokenKind::Le => {
            rule(None, Some(InfixRule::Binary), Precedence::Comparison)
        }
        TokenKind::Number(_) => rule(Some(PrefixRule::Number), None, Precedence::None),
        TokenKind::Str(_) => rule(Some(PrefixRule::String), None, Precedence::None),
        TokenKind::Ident(_) => rule(Some(PrefixRule::Variable), None, Precedence::None),
        TokenKind::True | TokenKind::False | TokenKind::Nil => {
            rule(Some(PrefixRule::Literal), None, Precedence::None)
        }
        TokenKind::And => rule(None, Some(InfixRule::And), Precedence::And),
        TokenKind::Or => rule(None, Some(InfixRule::Or), Precedence::Or),
        _ => rule(None, None, Precedence::None),
    }
}

/// A lexically scoped variable slot. `depth == -1` marks a local that is
/// declared but whose initializer is still being compiled.
struct Local {
    name: String,
    depth: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FunctionKind {
    Script,
    Function,
}

/// Per-function compilation state. Compiling a nested function pushes a new
/// context whose `enclosing` is the previous one; the chain nests exactly
/// with the lexical nesting of function bodies.
struct FnContext {
    enclosing: Option<Box<FnContext>>,
    function: ObjFunction,
    kind: FunctionKind,
    locals: Vec<Local>,
    scope_depth: i32,
}

impl FnContext {
    fn new(kind: FunctionKind, name: Option<Rc<ObjString>>) -> Self {
        let mut ctx = Self {
            enclosing: None,
            function: ObjFunction::new(name),
            kind,
            locals: Vec::new(),
            scope_depth: 0,
        };
        // Slot 0 holds the function value itself at runtime.
        ctx.locals.push(Local {
            name: String::new(),
            depth: 0,
        });
        ctx
    }
}

/// The whole single-pass compilation context: token cursor, diagnostics,
/// loop bookkeeping, and the chain of function contexts. One `Compiler`
/// exists per `compile` call; nothing is process-global.
struct Compiler<'a> {
    filename: &'a str,
    tokens: Vec<Token>,
    pos: usize,
    previous: Token,
    current: Token,
    panic_mode: bool,
    errors: Vec<String>,
    ctx: Box<FnContext>,

    // Innermost-loop state, saved and restored around nested loops.
    loop_start: Option<usize>,
    loop_scope_depth: i32,
    break_jumps: Vec<usize>,
}

impl<'a> Compiler<'a> {
    fn new(filename: &'a str, tokens: Vec<Token>) -> Self {
        let placeholder = Token::new(TokenKind::Eof, Span::new(0, 0));
        Self {
            filename,
            tokens,
            pos: 0,
            previous: placeholder.clone(),
            current: placeholder,
            panic_mode: false,
            errors: Vec::new(),
            ctx: Box::new(FnContext::new(FunctionKind::Script, None)),
            loop_start: None,
            loop_scope_depth: 0,
            break_jumps: Vec::new(),
        }
    }

    // ---- token cursor -------------------------------------------------

    fn advance(&mut self) {
        let eof = Token::new(TokenKind::Eof, self.current.span);
        self.previous = mem::replace(&mut self.current, eof);
        if self.pos < self.tokens.len() {
            self.current = self.tokens[self.pos].clone();
            self.pos += 1;
        }
    }

    fn check(&self, kind: &TokenKind) -> bool {
        self.current.kind == *kind
    }

    fn match_token(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn consume(&mut self, kind: TokenKind, message: &str) {
        if self.current.kind == kind {
            self.advance();
        } else {
            self.error_at_current(message);
        }
    }

    fn consume_ident(&mut self, message: &str) -> Option<String> {
        if let TokenKind::Ident(name) = &self.current.kind {
            let name = name.clone();
            self.advance();
            Some(name)
        } else {
            self.error_at_current(message);
            None
        }
    }

    fn consume_string(&mut self, message: &str) -> Option<String> {
        if let TokenKind::Str(value) = &self.current.kind {
            let value = value.clone();
            self.advance();
            Some(value)
        } else {
            self.error_at_current(message);
            None
        }
    }

    // ---- diagnostics ---------------------------------------------------

    fn error_at(&mut self, span: Span, message: &str) {
        // Panic mode suppresses cascading reports until a statement boundary.
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        self.errors.push(format!(
            "error: {}\n  --> {}:{}:{}",
            message, self.filename, span.line, span.column
        ));
    }

    fn error(&mut self, message: &str) {
        let span = self.previous.span;
        self.error_at(span, message);
    }

    fn error_at_current(&mut self, message: &str) {
        let span = self.current.span;
        self.error_at(span, message);
    }

    fn synchronize(&mut self) {
        self.panic_mode = false;

        while self.current.kind != TokenKind::Eof {
            if self.previous.kind == TokenKind::Semi {
                return;
            }
            if matches!(
                self.current.kind,
                TokenKind::Func
                    | TokenKind::Have
                    | TokenKind::If
                    | TokenKind::While
                    | TokenKind::For
                    | TokenKind::Info
                    | TokenKind::Return
                    | TokenKind::Using
                    | TokenKind::Break
                    | TokenKind::Continue
            ) {
                return;
            }
            self.advance();
        }
    }

    // ---- code emission -------------------------------------------------

    fn current_offset(&self) -> usize {
        self.ctx.function.chunk.code.len()
    }

    fn emit_byte(&mut self, byte: u8) {
        let line = self.previous.span.line;
        self.ctx.function.chunk.write(byte, line);
    }

    fn emit_op(&mut self, op: OpCode) {
        self.emit_byte(op as u8);
    }

    fn emit_bytes(&mut self, byte1: u8, byte2: u8) {
        self.emit_byte(byte1);
        self.emit_byte(byte2);
    }

    fn emit_return(&mut self) {
        self.emit_op(OpCode::Nil);
        self.emit_op(OpCode::Return);
    }

    fn make_constant(&mut self, value: Value) -> u8 {
        match self.ctx.function.chunk.add_constant(value) {
            Some(index) => index,
            None => {
                self.error("Too many constants in one chunk.");
                0
            }
        }
    }

    fn emit_constant(&mut self, value: Value) {
        let index = self.make_constant(value);
        self.emit_bytes(OpCode::Constant as u8, index);
    }

    fn identifier_constant(&mut self, name: &str) -> u8 {
        self.make_constant(Value::string(name))
    }

    /// Emit `op` followed by a two-byte placeholder operand; returns the
    /// offset of the placeholder's first byte for a later `patch_jump`.
    fn emit_jump(&mut self, op: OpCode) -> usize {
        self.emit_op(op);
        self.emit_byte(0xff);
        self.emit_byte(0xff);
        self.current_offset() - 2
    }

    /// Point the placeholder at `offset` to the current end of code.
    fn patch_jump(&mut self, offset: usize) {
        // -2 adjusts for the two placeholder bytes themselves.
        let jump = self.current_offset() - offset - 2;
        if jump > MAX_JUMP {
            self.error("Too much code to jump over.");
            return;
        }
        self.ctx.function.chunk.code[offset] = (jump >> 8) as u8;
        self.ctx.function.chunk.code[offset + 1] = (jump & 0xff) as u8;
    }

    /// Emit a backward jump to `loop_start`; the distance is encoded as a
    /// positive amount the VM subtracts from its instruction pointer.
    fn emit_loop(&mut self, loop_start: usize) {
        self.emit_op(OpCode::Loop);

        let offset = self.current_offset() - loop_start + 2;
        if offset > MAX_JUMP {
            self.error("Loop body too large.");
        }

        self.emit_byte((offset >> 8) as u8);
        self.emit_byte((offset & 0xff) as u8);
    }

    // ---- function contexts ----------------------------------------------

    fn end_compiler(&mut self) -> ObjFunction {
        self.emit_return();
        let enclosing = self
            .ctx
            .enclosing
            .take()
            .unwrap_or_else(|| Box::new(FnContext::new(FunctionKind::Script, None)));
        let finished = mem::replace(&mut self.ctx, enclosing);
        finished.function
    }

    // ---- scopes and locals ----------------------------------------------

    fn begin_scope(&mut self) {
        self.ctx.scope_depth += 1;
    }

    /// Pop every local declared in the scope being left, in LIFO order.
    fn end_scope(&mut self) {
        self.ctx.scope_depth -= 1;

        while let Some(local) = self.ctx.locals.last() {
            if local.depth <= self.ctx.scope_depth {
                break;
            }
            self.emit_op(OpCode::Pop);
            self.ctx.locals.pop();
        }
    }

    fn add_local(&mut self, name: &str) {
        if self.ctx.locals.len() == MAX_LOCALS {
            self.error("Too many local variables in function.");
            return;
        }
        self.ctx.locals.push(Local {
            name: name.to_string(),
            depth: -1,
        });
    }

    fn declare_variable(&mut self, name: &str) {
        // Globals are late-bound by name; only block scopes reserve slots.
        if self.ctx.scope_depth == 0 {
            return;
        }

        let mut already_declared = false;
        for local in self.ctx.locals.iter().rev() {
            if local.depth != -1 && local.depth < self.ctx.scope_depth {
                break;
            }
            if local.name == name {
                already_declared = true;
                break;
            }
        }
        if already_declared {
            self.error("Already a variable with this name in this scope.");
        }

        self.add_local(name);
    }

    fn mark_initialized(&mut self) {
        if self.ctx.scope_depth == 0 {
            return;
        }
        if let Some(local) = self.ctx.locals.last_mut() {
            local.depth = self.ctx.scope_depth;
        }
    }

    fn define_variable(&mut self, global: u8) {
        if self.ctx.scope_depth > 0 {
            self.mark_initialized();
            return;
        }
        self.emit_bytes(OpCode::DefineGlobal as u8, global);
    }

    /// Innermost matching local wins, so shadowing resolves to the most
    /// recent declaration. A hit on a `depth == -1` slot means the variable
    /// is read inside its own initializer.
    fn resolve_local(&mut self, name: &str) -> Option<u8> {
        for i in (0..self.ctx.locals.len()).rev() {
            if self.ctx.locals[i].name == name {
                if self.ctx.locals[i].depth == -1 {
                    self.error("Cannot read local variable in its own initializer.");
                }
                return Some(i as u8);
            }
        }
        None
    }

    // ---- expressions -----------------------------------------------------

    fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    fn parse_precedence(&mut self, precedence: Precedence) {
        self.advance();
        let Some(prefix) = get_rule(&self.previous.kind).prefix else {
            self.error("Expect expression.");
            return;
        };

        // `=` is assignment only at statement-expression level, never inside
        // a tighter-binding subexpression.
        let can_assign = precedence <= Precedence::Assignment;
        self.run_prefix(prefix, can_assign);

        while precedence <= get_rule(&self.current.kind).precedence {
            self.advance();
            if let Some(infix) = get_rule(&self.previous.kind).infix {
                self.run_infix(infix, can_assign);
            }
        }

        if can_assign && self.match_token(&TokenKind::Eq) {
            self.error("Invalid assignment target.");
        }
    }

    fn run_prefix(&mut self, rule: PrefixRule, can_assign: bool) {
        match rule {
            PrefixRule::Grouping => self.grouping(),
            PrefixRule::Unary => self.unary(),
            PrefixRule::Number => self.number(),
            PrefixRule::String => self.string(),
            PrefixRule::Literal => self.literal(),
            PrefixRule::Variable => self.variable(can_assign),
        }
    }

    fn run_infix(&mut self, rule: InfixRule, _can_assign: bool) {
        match rule {
            InfixRule::Binary => self.binary(),
            InfixRule::And => self.and_(),
            InfixRule::Or => self.or_(),
            InfixRule::Call => self.call(),
        }
    }

    fn grouping(&mut self) {
        self.expression();
        self.consume(TokenKind::RParen, "Expect ')' after expression.");
    }

    fn number(&mut self) {
        if let TokenKind::Number(value) = self.previous.kind {
            self.emit_constant(Value::Number(value));
        }
    }

    fn string(&mut self) {
        if let TokenKind::Str(value) = &self.previous.kind {
            let value = value.clone();
            self.emit_constant(Value::string(&value));
        }
    }

    fn literal(&mut self) {
        match self.previous.kind {
            TokenKind::False => self.emit_op(OpCode::False),
            TokenKind::True => self.emit_op(OpCode::True),
            TokenKind::Nil => self.emit_op(OpCode::Nil),
            _ => {}
        }
    }

    fn variable(&mut self, can_assign: bool) {
        if let TokenKind::Ident(name) = &self.previous.kind {
            let name = name.clone();
            self.named_variable(&name, can_assign);
        }
    }

    fn named_variable(&mut self, name: &str, can_assign: bool) {
        let (get_op, set_op, arg) = match self.resolve_local(name) {
            Some(slot) => (OpCode::GetLocal, OpCode::SetLocal, slot),
            None => {
                let index = self.identifier_constant(name);
                (OpCode::GetGlobal, OpCode::SetGlobal, index)
            }
        };

        if can_assign && self.match_token(&TokenKind::Eq) {
            self.expression();
            self.emit_bytes(set_op as u8, arg);
        } else {
            self.emit_bytes(get_op as u8, arg);
        }
    }

    fn unary(&mut self) {
        let operator = self.previous.kind.clone();

        // Compile the operand first.
        self.parse_precedence(Precedence::Unary);

        match operator {
            TokenKind::Bang => self.emit_op(OpCode::Not),
            TokenKind::Minus => self.emit_op(OpCode::Negate),
            _ => {}
        }
    }

    fn binary(&mut self) {
        let operator = self.previous.kind.clone();
        let precedence = get_rule(&operator).precedence;
        self.parse_precedence(precedence.next());

        match operator {
            TokenKind::Plus => self.emit_op(OpCode::Add),
            TokenKind::Minus => self.emit_op(OpCode::Subtract),
            TokenKind::Star => self.emit_op(OpCode::Multiply),
            TokenKind::Slash => self.emit_op(OpCode::Divide),
            TokenKind::Percent => self.emit_op(OpCode::Modulo),
            TokenKind::Caret => self.emit_op(OpCode::Power),

            TokenKind::BangEq => {
                self.emit_op(OpCode::Equal);
                self.emit_op(OpCode::Not);
            }
            TokenKind::EqEq => self.emit_op(OpCode::Equal),
            TokenKind::Gt => self.emit_op(OpCode::Greater),
            TokenKind::Ge => {
                self.emit_op(OpCode::Less);
                self.emit_op(OpCode::Not);
            }
            TokenKind::Lt => self.emit_op(OpCode::Less),
            TokenKind::Le => {
                self.emit_op(OpCode::Greater);
                self.emit_op(OpCode::Not);
            }
            _ => {}
        }
    }

    /// `and` evaluates its right operand only when the left is truthy, so it
    /// emits its own jump rather than an arithmetic opcode.
    fn and_(&mut self) {
        let end_jump = self.emit_jump(OpCode::JumpIfFalse);

        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::And);

        self.patch_jump(end_jump);
    }

    fn or_(&mut self) {
        let else_jump = self.emit_jump(OpCode::JumpIfFalse);
        let end_jump = self.emit_jump(OpCode::Jump);

        self.patch_jump(else_jump);
        self.emit_op(OpCode::Pop);

        self.parse_precedence(Precedence::Or);
        self.patch_jump(end_jump);
    }

    fn call(&mut self) {
        let arg_count = self.argument_list();
        self.emit_bytes(OpCode::Call as u8, arg_count);
    }

    fn argument_list(&mut self) -> u8 {
        let mut count: usize = 0;
        if !self.check(&TokenKind::RParen) {
            loop {
                self.expression();
                if count == 255 {
                    self.error("Can't have more than 255 arguments.");
                }
                count += 1;
                if !self.match_token(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RParen, "Expect ')' after arguments.");
        count.min(255) as u8
    }

    // ---- declarations and statements --------------------------------------

    fn declaration(&mut self) {
        if self.match_token(&TokenKind::Func) {
            self.func_declaration();
        } else if self.match_token(&TokenKind::Have) {
            self.var_declaration();
        } else {
            self.statement();
        }

        if self.panic_mode {
            self.synchronize();
        }
    }

    fn func_declaration(&mut self) {
        let Some(name) = self.consume_ident("Expect function name.") else {
            return;
        };
        self.declare_variable(&name);
        let global = if self.ctx.scope_depth > 0 {
            0
        } else {
            self.identifier_constant(&name)
        };
        // The name is usable inside the body, so recursion resolves.
        self.mark_initialized();
        self.function(&name);
        self.define_variable(global);
    }

    fn function(&mut self, name: &str) {
        let name_obj = Rc::new(ObjString::new(name));
        let new_ctx = FnContext::new(FunctionKind::Function, Some(name_obj));
        let enclosing = mem::replace(&mut self.ctx, Box::new(new_ctx));
        self.ctx.enclosing = Some(enclosing);
        self.begin_scope();

        self.consume(TokenKind::LParen, "Expect '(' after function name.");
        if !self.check(&TokenKind::RParen) {
            loop {
                if self.ctx.function.arity == u8::MAX {
                    self.error_at_current("Can't have more than 255 parameters.");
                } else {
                    self.ctx.function.arity += 1;
                }
                let Some(param) = self.consume_ident("Expect parameter name.") else {
                    break;
                };
                self.declare_variable(&param);
                self.define_variable(0);
                if !self.match_token(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RParen, "Expect ')' after parameters.");
        self.consume(TokenKind::LBrace, "Expect '{' before function body.");
        self.block();

        // No end_scope: the function's locals die with its call frame.
        let function = self.end_compiler();
        let constant = self.make_constant(Value::function(function));
        self.emit_bytes(OpCode::Constant as u8, constant);
    }

    fn var_declaration(&mut self) {
        let Some(name) = self.consume_ident("Expect variable name.") else {
            return;
        };
        self.declare_variable(&name);
        let global = if self.ctx.scope_depth > 0 {
            0
        } else {
            self.identifier_constant(&name)
        };

        if self.match_token(&TokenKind::Eq) {
            self.expression();
        } else {
            self.emit_op(OpCode::Nil);
        }

        self.consume(TokenKind::Semi, "Expect ';' after variable declaration.");
        self.define_variable(global);
    }

    fn statement(&mut self) {
        if self.match_token(&TokenKind::Info) {
            self.info_statement();
        } else if self.match_token(&TokenKind::Return) {
            self.return_statement();
        } else if self.match_token(&TokenKind::If) {
            self.if_statement();
        } else if self.match_token(&TokenKind::Continue) {
            self.continue_statement();
        } else if self.match_token(&TokenKind::Break) {
            self.break_statement();
        } else if self.match_token(&TokenKind::While) {
            self.while_statement();
        } else if self.match_token(&TokenKind::For) {
            self.for_statement();
        } else if self.match_token(&TokenKind::Using) {
            self.using_statement();
        } else if self.match_token(&TokenKind::LBrace) {
            self.begin_scope();
            self.block();
            self.end_scope();
        } else {
            self.expression_statement();
        }
    }

    fn block(&mut self) {
        while !self.check(&TokenKind::RBrace) && !self.check(&TokenKind::Eof) {
            self.declaration();
        }
        self.consume(TokenKind::RBrace, "Expect '}' after block.");
    }

    fn expression_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semi, "Expect ';' after expression.");
        self.emit_op(OpCode::Pop);
    }

    fn info_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semi, "Expect ';' after value.");
        self.emit_op(OpCode::Info);
    }

    fn return_statement(&mut self) {
        if self.ctx.kind == FunctionKind::Script {
            self.error("Cannot return from top-level code.");
        }
        if self.match_token(&TokenKind::Semi) {
            self.emit_return();
        } else {
            self.expression();
            self.consume(TokenKind::Semi, "Expect ';' after return value.");
            self.emit_op(OpCode::Return);
        }
    }

    fn if_statement(&mut self) {
        self.consume(TokenKind::LParen, "Expect '(' after 'if'.");
        self.expression();
        self.consume(TokenKind::RParen, "Expect ')' after condition.");

        let then_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement();

        let else_jump = self.emit_jump(OpCode::Jump);

        self.patch_jump(then_jump);
        self.emit_op(OpCode::Pop);

        if self.match_token(&TokenKind::Else) {
            self.statement();
        }
        self.patch_jump(else_jump);
    }

    fn while_statement(&mut self) {
        let surrounding_start = self.loop_start;
        let surrounding_depth = self.loop_scope_depth;
        let surrounding_breaks = mem::take(&mut self.break_jumps);

        let loop_start = self.current_offset();
        self.loop_start = Some(loop_start);
        self.loop_scope_depth = self.ctx.scope_depth;

        self.consume(TokenKind::LParen, "Expect '(' after 'while'.");
        self.expression();
        self.consume(TokenKind::RParen, "Expect ')' after condition.");

        let exit_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement();
        self.emit_loop(loop_start);

        self.patch_jump(exit_jump);
        self.emit_op(OpCode::Pop);

        // Pending breaks land here, past the condition pop.
        for offset in mem::take(&mut self.break_jumps) {
            self.patch_jump(offset);
        }

        self.loop_start = surrounding_start;
        self.loop_scope_depth = surrounding_depth;
        self.break_jumps = surrounding_breaks;
    }

    /// Clauses are compiled in text order but execute as: initializer once,
    /// then {condition, body, increment} until the condition fails. The
    /// increment is compiled before the body, so the body is entered through
    /// a jump over it and loops back to it.
    fn for_statement(&mut self) {
        self.begin_scope();
        self.consume(TokenKind::LParen, "Expect '(' after 'for'.");

        if self.match_token(&TokenKind::Semi) {
            // No initializer.
        } else if self.match_token(&TokenKind::Have) {
            self.var_declaration();
        } else {
            self.expression_statement();
        }

        let surrounding_start = self.loop_start;
        let surrounding_depth = self.loop_scope_depth;
        let surrounding_breaks = mem::take(&mut self.break_jumps);

        self.loop_start = Some(self.current_offset());
        self.loop_scope_depth = self.ctx.scope_depth;

        let mut exit_jump = None;
        if !self.match_token(&TokenKind::Semi) {
            self.expression();
            self.consume(TokenKind::Semi, "Expect ';' after loop condition.");

            exit_jump = Some(self.emit_jump(OpCode::JumpIfFalse));
            self.emit_op(OpCode::Pop);
        }

        if !self.match_token(&TokenKind::RParen) {
            let body_jump = self.emit_jump(OpCode::Jump);

            let increment_start = self.current_offset();
            self.expression();
            self.emit_op(OpCode::Pop);
            self.consume(TokenKind::RParen, "Expect ')' after for clauses.");

            self.emit_loop(self.loop_start.unwrap_or(increment_start));
            // `continue` now re-enters at the increment, not the condition.
            self.loop_start = Some(increment_start);
            self.patch_jump(body_jump);
        }

        self.statement();
        if let Some(start) = self.loop_start {
            self.emit_loop(start);
        }

        if let Some(offset) = exit_jump {
            self.patch_jump(offset);
            self.emit_op(OpCode::Pop);
        }

        for offset in mem::take(&mut self.break_jumps) {
            self.patch_jump(offset);
        }

        self.loop_start = surrounding_start;
        self.loop_scope_depth = surrounding_depth;
        self.break_jumps = surrounding_breaks;

        self.end_scope();
    }

    /// Pop the locals declared inside the loop without forgetting them; code
    /// after the jump in the same scope still refers to their slots.
    fn emit_loop_local_pops(&mut self) {
        let mut pops = 0;
        for local in self.ctx.locals.iter().rev() {
            if local.depth <= self.loop_scope_depth {
                break;
            }
            pops += 1;
        }
        for _ in 0..pops {
            self.emit_op(OpCode::Pop);
        }
    }

    fn continue_statement(&mut self) {
        let Some(loop_start) = self.loop_start else {
            self.error("Cannot use 'continue' outside of a loop.");
            return;
        };
        self.emit_loop_local_pops();
        self.emit_loop(loop_start);
        self.consume(TokenKind::Semi, "Expect ';' after 'continue'.");
    }

    fn break_statement(&mut self) {
        if self.loop_start.is_none() {
            self.error("Cannot use 'break' outside of a loop.");
            return;
        }
        self.emit_loop_local_pops();
        let jump = self.emit_jump(OpCode::Jump);
        self.break_jumps.push(jump);
        self.consume(TokenKind::Semi, "Expect ';' after 'break'.");
    }

    fn using_statement(&mut self) {
        let Some(module) = self.consume_string("Expect string after 'using'.") else {
            return;
        };
        self.consume(TokenKind::Semi, "Expect ';' after value.");
        self.emit_constant(Value::string(&module));
        self.emit_op(OpCode::Import);
    }
}

//! Runtime values shared between the compiler's constant pools and the VM.

use std::fmt;
use std::rc::Rc;

use super::chunk::Chunk;

/// A tagged runtime value.
///
/// Heap-allocated variants are reference-counted handles: an object lives as
/// long as some constant pool, stack slot, or global binding still owns it,
/// and is freed when the last owner drops.
#[derive(Clone)]
pub enum Value {
    Nil,
    Bool(bool),
    Number(f64),
    Obj(Obj),
}

/// A heap object handle.
#[derive(Clone)]
pub enum Obj {
    Str(Rc<ObjString>),
    Function(Rc<ObjFunction>),
    Native(Rc<ObjNative>),
}

/// An immutable string with its content hash precomputed at construction.
#[derive(Debug)]
pub struct ObjString {
    pub chars: Box<str>,
    pub hash: u32,
}

impl ObjString {
    pub fn new(s: &str) -> Self {
        Self {
            chars: s.into(),
            hash: hash_string(s),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.chars
    }
}

impl PartialEq for ObjString {
    /// Content equality with a hash fast path; strings are not interned.
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash && self.chars == other.chars
    }
}

impl Eq for ObjString {}

/// FNV-1a, the hash the original object model precomputes per string.
fn hash_string(s: &str) -> u32 {
    let mut hash: u32 = 2166136261;
    for byte in s.bytes() {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(16777619);
    }
    hash
}

/// A compiled function: arity, owned bytecode, and an optional name
/// (`None` for the top-level script).
#[derive(Debug)]
pub struct ObjFunction {
    pub arity: u8,
    pub chunk: Chunk,
    pub name: Option<Rc<ObjString>>,
}

impl ObjFunction {
    pub fn new(name: Option<Rc<ObjString>>) -> Self {
        Self {
            arity: 0,
            chunk: Chunk::new(),
            name,
        }
    }

    pub fn name_str(&self) -> &str {
        self.name.as_ref().map(|n| n.as_str()).unwrap_or("<script>")
    }
}

/// Signature of a host-provided native function.
pub type NativeFn = fn(&[Value]) -> Result<Value, String>;

/// A host function bound into the global namespace by a `using` import.
pub struct ObjNative {
    pub name: &'static str,
    pub function: NativeFn,
}

impl fmt::Debug for ObjNative {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjNative({})", self.name)
    }
}

impl Value {
    pub fn string(s: &str) -> Self {
        Value::Obj(Obj::Str(Rc::new(ObjString::new(s))))
    }

    pub fn function(f: ObjFunction) -> Self {
        Value::Obj(Obj::Function(Rc::new(f)))
    }

    /// `nil` and `false` are falsey; everything else is truthy.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false))
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Obj(Obj::Str(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::Obj(Obj::Str(_)) => "string",
            Value::Obj(Obj::Function(_)) => "function",
            Value::Obj(Obj::Native(_)) => "native function",
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            // IEEE-754 comparison; NaN != NaN by hardware semantics.
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Obj(Obj::Str(a)), Value::Obj(Obj::Str(b))) => a == b,
            (Value::Obj(Obj::Function(a)), Value::Obj(Obj::Function(b))) => Rc::ptr_eq(a, b),
            (Value::Obj(Obj::Native(a)), Value::Obj(Obj::Native(b))) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "Nil"),
            Value::Bool(b) => write!(f, "Bool({})", b),
            Value::Number(n) => write!(f, "Number({})", n),
            Value::Obj(Obj::Str(s)) => write!(f, "Str({:?})", s.as_str()),
            Value::Obj(Obj::Function(func)) => write!(f, "Function({})", func.name_str()),
            Value::Obj(Obj::Native(n)) => write!(f, "Native({})", n.name),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", n),
            Value::Obj(Obj::Str(s)) => write!(f, "{}", s.as_str()),
            Value::Obj(Obj::Function(func)) => write!(f, "<fn {}>", func.name_str()),
            Value::Obj(Obj::Native(n)) => write!(f, "<native fn {}>", n.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truthiness() {
        assert!(!Value::Nil.is_truthy());
        assert!(!Value::Bool(false).is_truthy());
        assert!(Value::Bool(true).is_truthy());
        assert!(Value::Number(0.0).is_truthy());
        assert!(Value::string("").is_truthy());
    }

    #[test]
    fn test_number_equality() {
        assert_eq!(Value::Number(42.0), Value::Number(42.0));
        assert_ne!(Value::Number(1.0), Value::Number(2.0));
        assert_ne!(Value::Number(f64::NAN), Value::Number(f64::NAN));
    }

    #[test]
    fn test_string_content_equality() {
        // Two separately allocated strings with the same content are equal.
        let a = Value::string("hello");
        let b = Value::string("hello");
        assert_eq!(a, b);
        assert_ne!(Value::string("hello"), Value::string("world"));
    }

    #[test]
    fn test_string_hash_is_precomputed_fnv1a() {
        let s = ObjString::new("hello");
        assert_eq!(s.hash, 0x4f9f2cab);
        assert_eq!(ObjString::new("").hash, 2166136261);
    }

    #[test]
    fn test_cross_type_equality_is_false() {
        assert_ne!(Value::Nil, Value::Bool(false));
        assert_ne!(Value::Number(0.0), Value::Bool(false));
        assert_ne!(Value::string("1"), Value::Number(1.0));
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::Nil.to_string(), "nil");
        assert_eq!(Value::Bool(true).to_string(), "true");
        assert_eq!(Value::Number(3.5).to_string(), "3.5");
        assert_eq!(Value::string("hi").to_string(), "hi");

        let f = ObjFunction::new(Some(Rc::new(ObjString::new("fib"))));
        assert_eq!(Value::function(f).to_string(), "<fn fib>");
    }
}

use std::{
    fmt::{Debug, Display, Formatter},
    rc::Rc,
};

use crate::{bytecode::Chunk, gc::Reference, value::Value};

/// An immutable, interned string.
///
/// The hash is computed once on creation and used as the bucket key of the intern table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternedString {
    text: Box<str>,
    hash: u64,
}

impl InternedString {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.into(),
            hash: hash_text(text),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn hash(&self) -> u64 {
        self.hash
    }
}

impl Display for InternedString {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.text)
    }
}

/// FNV-1a over the UTF-8 bytes.
pub fn hash_text(text: &str) -> u64 {
    text.bytes().fold(0xcbf2_9ce4_8422_2325, |hash, byte| {
        (hash ^ byte as u64).wrapping_mul(0x0100_0000_01b3)
    })
}

/// The host callback behind a [`NativeFunction`]. Receives the call arguments, `argc` being
/// the slice length.
pub type NativeFn = Rc<dyn Fn(&[Value]) -> Value>;

pub struct NativeFunction {
    pub name: String,
    pub function: NativeFn,
}

impl NativeFunction {
    pub fn new(name: impl Into<String>, function: impl Fn(&[Value]) -> Value + 'static) -> Self {
        Self {
            name: name.into(),
            function: Rc::new(function),
        }
    }
}

impl Debug for NativeFunction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeFunction")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl Display for NativeFunction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "<native fn {}>", self.name)
    }
}

/// A compiled function: its code, arity, and the number of upvalues its closures capture.
///
/// The chunk is shared with whoever produced it and never mutated by the VM.
#[derive(Debug, Clone)]
pub struct Function {
    pub name: Option<String>,
    pub arity: u8,
    pub upvalue_count: u8,
    pub chunk: Rc<Chunk>,
}

impl Function {
    pub fn new(name: impl Into<String>, arity: u8, upvalue_count: u8, chunk: Chunk) -> Self {
        Self {
            name: Some(name.into()),
            arity,
            upvalue_count,
            chunk: Rc::new(chunk),
        }
    }

    /// The implicit top-level function wrapping a program.
    pub fn script(chunk: Rc<Chunk>) -> Self {
        Self {
            name: None,
            arity: 0,
            upvalue_count: 0,
            chunk,
        }
    }

    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or("script")
    }
}

impl Display for Function {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.name {
            Some(name) => write!(f, "<fn {}>", name),
            None => write!(f, "<script>"),
        }
    }
}

/// A captured variable.
///
/// An upvalue starts open, aliasing an operand stack slot, and linked into the VM's list of
/// open upvalues through `next`. It is closed exactly once, when the slot goes out of scope,
/// and from then on owns the value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Upvalue {
    Open { slot: usize, next: Option<Reference> },
    Closed(Value),
}

impl Upvalue {
    pub fn is_open(&self) -> bool {
        matches!(self, Upvalue::Open { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Closure {
    pub function: Reference,
    pub upvalues: Vec<Reference>,
}

impl Closure {
    /// A closure whose upvalues are yet to be captured.
    pub fn new(function: Reference, upvalue_count: usize) -> Self {
        Self {
            function,
            upvalues: Vec::with_capacity(upvalue_count),
        }
    }
}

use byteorder::LittleEndian;
use std::{
    hash::{Hash, Hasher},
    rc::Rc,
};

use crate::gc::Function;

mod reader;
mod writer;

pub use reader::*;
pub use writer::*;

/// The endianness of bytecode operands. Used in [`BytecodeReader`] and [`BytecodeWriter`].
pub type Endianness = LittleEndian;

/// The type of constant index in a [`Chunk`]. Defined using typedef to deal with possible
/// changes in the future.
pub type ConstantIndex = u16;

/// Offset of a local variable relative to the base of the current call frame.
pub type LocalSlot = u8;

/// Index into the upvalue array of the running closure.
pub type UpvalueIndex = u8;

/// Distance of a jump, in bytes, counted from the end of the jump instruction.
pub type JumpOffset = u16;

/// The largest argument count a call instruction can encode.
pub const MAX_CALL_ARGUMENTS: u8 = 8;

/// The operation codes.
///
/// Operation codes form the virtual ISA, which is recognized by the virtual machine (VM). It's
/// a dense, linear sequence of instructions and is good for performance. Tree structures at the
/// source code level (e.g. control flows) are implemented by several kinds of jump instructions.
///
/// Operands follow the operation code directly, in [`Endianness`] byte order.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationCode {
    /* Value operations */
    /// Load a constant into the VM stack, with its index stored as [`ConstantIndex`] following
    /// the operation code.
    Constant,
    Nil,
    True,
    False,
    Pop,

    /* Variable operations */
    /// Followed by a [`LocalSlot`]. Slot 0 is the callee of the running frame.
    GetLocal,
    /// Followed by a [`LocalSlot`]. The assigned value stays on the stack.
    SetLocal,
    /// Followed by a [`ConstantIndex`] naming the global. Fails if the name is already bound.
    DefineGlobal,
    GetGlobal,
    /// The assigned value stays on the stack.
    SetGlobal,
    /// Followed by an [`UpvalueIndex`].
    GetUpvalue,
    SetUpvalue,

    /* Unary operations */
    Negate,
    Not,

    /* Binary operations */
    Add,
    Subtract,
    Multiply,
    Divide,

    /* Relational operations */
    Equal,
    Greater,
    Less,

    Print,

    /* Control flow */
    /// Followed by a forward [`JumpOffset`].
    Jump,
    /// Followed by a forward [`JumpOffset`]. The condition is left on the stack.
    JumpIfFalse,
    /// Followed by a backward [`JumpOffset`].
    Loop,

    /* Calls, the argument count is encoded in the operation code itself */
    Call0,
    Call1,
    Call2,
    Call3,
    Call4,
    Call5,
    Call6,
    Call7,
    Call8,

    /// Followed by the [`ConstantIndex`] of a function constant, then one [`UpvalueCapture`]
    /// (two bytes) per upvalue the function declares.
    Closure,
    CloseUpvalue,
    Return,

    /// Guard variant to detect invalid operation codes.
    Impossible,
}

impl OperationCode {
    /// The call instruction for `argc` arguments, if the ISA can encode it.
    pub fn call(argc: u8) -> Option<Self> {
        if argc > MAX_CALL_ARGUMENTS {
            return None;
        }
        Self::try_from(OperationCode::Call0 as u8 + argc).ok()
    }

    /// The argument count of a call instruction.
    pub fn argument_count(self) -> Option<u8> {
        let code = self as u8;
        (OperationCode::Call0 as u8..=OperationCode::Call8 as u8)
            .contains(&code)
            .then(|| code - OperationCode::Call0 as u8)
    }
}

impl TryFrom<u8> for OperationCode {
    type Error = u8;

    fn try_from(candidate: u8) -> Result<Self, Self::Error> {
        if candidate >= OperationCode::Impossible as u8 {
            return Err(candidate);
        }
        // SAFETY: `OperationCode` is `repr(u8)` with contiguous discriminants starting at zero,
        // and everything below `Impossible` is a valid variant.
        Ok(unsafe { std::mem::transmute::<u8, OperationCode>(candidate) })
    }
}

/// How a [`OperationCode::Closure`] instruction obtains one of its upvalues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpvalueCapture {
    /// Capture a local of the frame executing the instruction.
    Local(LocalSlot),
    /// Forward an upvalue the executing closure already holds.
    Enclosing(UpvalueIndex),
}

impl UpvalueCapture {
    pub fn encode(self) -> [u8; 2] {
        match self {
            UpvalueCapture::Local(slot) => [1, slot],
            UpvalueCapture::Enclosing(index) => [0, index],
        }
    }

    pub fn decode(is_local: u8, index: u8) -> Self {
        if is_local != 0 {
            UpvalueCapture::Local(index)
        } else {
            UpvalueCapture::Enclosing(index)
        }
    }
}

/// The constants stored in a [`Chunk`].
///
/// Object types need dynamic memory allocation, which is a runtime feature, so the constant
/// pool stores their host-side description and the VM materializes them when loaded: strings
/// are interned, functions are allocated as [`crate::gc::Object::Function`]. Boolean and nil
/// literals have their own operation codes.
#[derive(Debug, Clone)]
pub enum Constant {
    Number(f64),
    String(String),
    Function(Function),
}

impl Hash for Constant {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Constant::Number(n) => n.to_bits().hash(state),
            Constant::String(s) => s.hash(state),
            Constant::Function(f) => Rc::as_ptr(&f.chunk).hash(state),
        }
    }
}

impl PartialEq for Constant {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Constant::Number(n1), Constant::Number(n2)) => n1.to_bits() == n2.to_bits(),
            (Constant::String(s1), Constant::String(s2)) => s1 == s2,
            (Constant::Function(f1), Constant::Function(f2)) => Rc::ptr_eq(&f1.chunk, &f2.chunk),
            _ => false,
        }
    }
}

impl Eq for Constant {}

/// A compiled chunk of bytecode.
///
/// A [`Chunk`] consists of an [`OperationCode`] sequence, the [`Constant`]s it refers to, and
/// a line table parallel to `code` which is only consulted for tracebacks.
#[derive(Debug, Clone, Default)]
pub struct Chunk {
    pub code: Vec<u8>,
    pub constants: Vec<Constant>,
    pub lines: Vec<u32>,
}

impl Chunk {
    pub fn new() -> Self {
        Self::default()
    }

    /// Source line of the byte at `offset`, if the line table covers it.
    pub fn line(&self, offset: usize) -> Option<u32> {
        self.lines.get(offset).copied()
    }
}

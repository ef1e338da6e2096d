use std::{mem, rc::Rc};

use byteorder::ReadBytesExt;

use crate::{
    bytecode::{Chunk, Constant, ConstantIndex, Endianness, JumpOffset, OperationCode},
    error::RuntimeErrorKind,
};

/// A shallow encapsulation of [`Chunk`].
///
/// For operation codes and operands, just call `fetch()`. The offset, endianness and type
/// conversion is considered internally. For constants, just call `load()`.
///
/// The reader shares the chunk rather than borrowing it, so every call frame can own one.
#[derive(Debug, Clone)]
pub struct BytecodeReader {
    chunk: Rc<Chunk>,
    position: usize,
}

impl BytecodeReader {
    pub fn new(chunk: Rc<Chunk>) -> Self {
        Self { chunk, position: 0 }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    /// Load a constant if any.
    pub fn load(&self, index: ConstantIndex) -> Result<&Constant, RuntimeErrorKind> {
        self.chunk
            .constants
            .get(index as usize)
            .ok_or(RuntimeErrorKind::ConstantOutOfBounds(index))
    }

    /// Source line of the most recently fetched byte.
    pub fn line(&self) -> Option<u32> {
        self.chunk.line(self.position.checked_sub(1)?)
    }

    pub fn jump(&mut self, offset: JumpOffset) -> Result<(), RuntimeErrorKind> {
        let target = self.position + offset as usize;
        if target > self.chunk.code.len() {
            return Err(RuntimeErrorKind::UnexpectedEndOfCode);
        }
        self.position = target;
        Ok(())
    }

    pub fn jump_back(&mut self, offset: JumpOffset) -> Result<(), RuntimeErrorKind> {
        self.position = self
            .position
            .checked_sub(offset as usize)
            .ok_or(RuntimeErrorKind::UnexpectedEndOfCode)?;
        Ok(())
    }

    fn remaining(&self) -> &[u8] {
        self.chunk.code.get(self.position..).unwrap_or_default()
    }
}

/// Helper trait to read operation codes and operands conveniently.
///
/// User does not need to call different methods when fetching operation codes or operands in
/// different types. Just call `fetch()` (with type annotations usually) and let the compiler
/// handles it.
pub trait Fetch<T> {
    fn fetch(&mut self) -> Result<T, RuntimeErrorKind>;
}

impl Fetch<OperationCode> for BytecodeReader {
    fn fetch(&mut self) -> Result<OperationCode, RuntimeErrorKind> {
        let candidate: u8 = self.fetch()?;
        OperationCode::try_from(candidate).map_err(RuntimeErrorKind::InvalidOperationCode)
    }
}

impl Fetch<u8> for BytecodeReader {
    fn fetch(&mut self) -> Result<u8, RuntimeErrorKind> {
        let byte = self
            .remaining()
            .read_u8()
            .map_err(|_| RuntimeErrorKind::UnexpectedEndOfCode)?;
        self.position += 1;
        Ok(byte)
    }
}

macro_rules! fetch_primitives_impl {
    ($($t: ty), *) => {
        paste::paste! {
            $(
            impl Fetch<$t> for BytecodeReader {
                fn fetch(&mut self) -> Result<$t, RuntimeErrorKind> {
                    let value = self
                        .remaining()
                        .[<read_ $t>]::<Endianness>()
                        .map_err(|_| RuntimeErrorKind::UnexpectedEndOfCode)?;
                    self.position += mem::size_of::<$t>();
                    Ok(value)
                }
            }
            )*
        }
    };
}

fetch_primitives_impl!(u16);

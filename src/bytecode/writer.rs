use std::collections::HashMap;

use anyhow::{bail, Result};
use byteorder::{ByteOrder, WriteBytesExt};

use crate::bytecode::{
    Chunk, Constant, ConstantIndex, Endianness, JumpOffset, OperationCode, UpvalueCapture,
};

/// A shallow encapsulation of [`Chunk`].
///
/// Writing bytecode, including operation codes, operands and constants is easy using this
/// struct. Constants are cached: if a constant has appeared before, its index will be returned
/// directly. Every emitted byte is tagged with the current source line.
pub struct BytecodeWriter<'a> {
    chunk: &'a mut Chunk,
    constant_cache: HashMap<Constant, ConstantIndex>,
    line: u32,
}

impl<'a> BytecodeWriter<'a> {
    pub fn new(chunk: &'a mut Chunk) -> Self {
        let constant_cache = chunk
            .constants
            .iter()
            .enumerate()
            .map(|(index, constant)| (constant.clone(), index as ConstantIndex))
            .collect();
        Self {
            chunk,
            constant_cache,
            line: 1,
        }
    }

    /// Set the source line recorded for subsequently emitted bytes.
    pub fn set_line(&mut self, line: u32) -> &mut Self {
        self.line = line;
        self
    }

    /// Offset of the next byte to be emitted.
    pub fn position(&self) -> usize {
        self.chunk.code.len()
    }

    pub fn define(&mut self, constant: Constant) -> Result<ConstantIndex> {
        if let Some(index) = self.constant_cache.get(&constant) {
            return Ok(*index);
        }
        // Define a new constant.
        if self.chunk.constants.len() > ConstantIndex::MAX as usize {
            bail!("too many constants");
        }
        let index = self.chunk.constants.len() as ConstantIndex;
        self.chunk.constants.push(constant.clone());
        self.constant_cache.insert(constant, index);
        Ok(index)
    }

    /// Emit a forward jump with a placeholder offset, returning the operand position for
    /// [`BytecodeWriter::patch_jump`].
    pub fn emit_jump(&mut self, opcode: OperationCode) -> Result<usize> {
        self.emit(opcode)?;
        let operand = self.position();
        self.emit(JumpOffset::MAX)?;
        Ok(operand)
    }

    /// Point a jump emitted by [`BytecodeWriter::emit_jump`] at the current position.
    pub fn patch_jump(&mut self, operand: usize) -> Result<()> {
        let end = operand + size_of_operand();
        if end > self.position() {
            bail!("no jump operand at offset {}", operand);
        }
        let Ok(distance) = JumpOffset::try_from(self.position() - end) else {
            bail!("too much code to jump over");
        };
        Endianness::write_u16(&mut self.chunk.code[operand..end], distance);
        Ok(())
    }

    /// Emit a [`OperationCode::Loop`] back to `start`.
    pub fn emit_loop(&mut self, start: usize) -> Result<()> {
        self.emit(OperationCode::Loop)?;
        let Ok(distance) = JumpOffset::try_from(self.position() + size_of_operand() - start) else {
            bail!("loop body too large");
        };
        self.emit(distance)
    }

    fn tag_lines(&mut self, count: usize) {
        let line = self.line;
        self.chunk.lines.extend(std::iter::repeat(line).take(count));
    }
}

const fn size_of_operand() -> usize {
    std::mem::size_of::<JumpOffset>()
}

/// Helper trait to write bytecode conveniently.
pub trait EmitBytecodeExt<T> {
    fn emit(&mut self, value: T) -> Result<()>;
}

impl EmitBytecodeExt<u8> for BytecodeWriter<'_> {
    fn emit(&mut self, value: u8) -> Result<()> {
        self.chunk.code.write_u8(value)?;
        self.tag_lines(1);
        Ok(())
    }
}

impl EmitBytecodeExt<OperationCode> for BytecodeWriter<'_> {
    fn emit(&mut self, value: OperationCode) -> Result<()> {
        self.emit(value as u8)
    }
}

impl EmitBytecodeExt<UpvalueCapture> for BytecodeWriter<'_> {
    fn emit(&mut self, value: UpvalueCapture) -> Result<()> {
        let [is_local, index] = value.encode();
        self.emit(is_local)?;
        self.emit(index)
    }
}

macro_rules! emit_primitives_impl {
    ($($t: ty), *) => {
        paste::paste! {
            $(
            impl EmitBytecodeExt<$t> for BytecodeWriter<'_> {
                fn emit(&mut self, value: $t) -> Result<()> {
                    self.chunk.code.[<write_ $t>]::<Endianness>(value)?;
                    self.tag_lines(std::mem::size_of::<$t>());
                    Ok(())
                }
            }
            )*
        }
    };
}

emit_primitives_impl!(u16);

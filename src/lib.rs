pub mod bytecode;
pub mod config;
pub mod error;
pub mod gc;
mod stack;
pub mod value;
pub mod vm;

pub use config::{Config, GcConfig};
pub use error::{ErrorCategory, InterpretError, RuntimeError, RuntimeErrorKind};
pub use value::Value;
pub use vm::VirtualMachine;

/// Convenient macro to form a [`bytecode::Chunk`] quickly and vividly.
///
/// Constants are defined first, in order, so their indices are their positions in the list
/// (duplicates collapse into the first one). Every code item is emitted through
/// [`bytecode::EmitBytecodeExt`], so operands need their types spelled out. The surrounding
/// function must return an [`anyhow::Result`].
#[macro_export]
macro_rules! bytecode {
    (const [$($constant: expr), * $(,)?] $($code: expr); * $(;)?) => {{
        use $crate::bytecode::EmitBytecodeExt;

        let mut chunk = $crate::bytecode::Chunk::new();
        let mut writer = $crate::bytecode::BytecodeWriter::new(&mut chunk);
        $( writer.define($constant)?; )*
        $( writer.emit($code)?; )*
        drop(writer);
        chunk
    }};
}

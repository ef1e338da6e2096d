#![allow(dead_code)]

use std::{cell::RefCell, io, io::Write, rc::Rc};

use anyhow::Result;
use clam_vm::{
    bytecode,
    bytecode::{Chunk, Constant, ConstantIndex, LocalSlot, OperationCode, UpvalueCapture, UpvalueIndex},
    gc::Function,
    Config, Value, VirtualMachine,
};

/// An in-memory sink for `Print`.
#[derive(Clone, Default)]
pub struct Capture(Rc<RefCell<Vec<u8>>>);

impl Capture {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.borrow()).into_owned()
    }
}

impl Write for Capture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub fn vm_with_capture(config: Config) -> (VirtualMachine, Capture) {
    let capture = Capture::default();
    let mut vm = VirtualMachine::with_config(config);
    vm.set_output(capture.clone());
    (vm, capture)
}

pub fn number(vm: &VirtualMachine, name: &str) -> Option<f64> {
    vm.global(name).as_ref().and_then(Value::as_number)
}

pub fn string(vm: &VirtualMachine, name: &str) -> Option<String> {
    let reference = vm.global(name)?.as_object()?;
    vm.heap().string(reference).map(str::to_owned)
}

/// fun make() {
///     var n = 0;
///     fun inc() { n = n + 1; return n; }
///     return inc;
/// }
/// var a = make();
/// var b = make();
/// a(); a();
/// var ra = a();
/// var rb = b();
pub fn counter_program() -> Result<Chunk> {
    let inc = bytecode! {
        const [Constant::Number(1.0)]

        OperationCode::GetUpvalue; 0 as UpvalueIndex;
        OperationCode::Constant; 0 as ConstantIndex;
        OperationCode::Add;
        OperationCode::SetUpvalue; 0 as UpvalueIndex;
        OperationCode::Return;
    };
    let make = bytecode! {
        const [
            Constant::Number(0.0),
            Constant::Function(Function::new("inc", 0, 1, inc)),
        ]

        OperationCode::Constant; 0 as ConstantIndex;
        OperationCode::Closure; 1 as ConstantIndex; UpvalueCapture::Local(1);
        OperationCode::GetLocal; 2 as LocalSlot;
        OperationCode::Return;
    };
    Ok(bytecode! {
        const [
            Constant::Function(Function::new("make", 0, 0, make)),
            Constant::String("a".into()),
            Constant::String("b".into()),
            Constant::String("ra".into()),
            Constant::String("rb".into()),
        ]

        OperationCode::Closure; 0 as ConstantIndex;
        OperationCode::GetLocal; 1 as LocalSlot;
        OperationCode::Call0;
        OperationCode::DefineGlobal; 1 as ConstantIndex;
        OperationCode::GetLocal; 1 as LocalSlot;
        OperationCode::Call0;
        OperationCode::DefineGlobal; 2 as ConstantIndex;
        OperationCode::GetGlobal; 1 as ConstantIndex;
        OperationCode::Call0;
        OperationCode::Pop;
        OperationCode::GetGlobal; 1 as ConstantIndex;
        OperationCode::Call0;
        OperationCode::Pop;
        OperationCode::GetGlobal; 1 as ConstantIndex;
        OperationCode::Call0;
        OperationCode::DefineGlobal; 3 as ConstantIndex;
        OperationCode::GetGlobal; 2 as ConstantIndex;
        OperationCode::Call0;
        OperationCode::DefineGlobal; 4 as ConstantIndex;
        OperationCode::Nil;
        OperationCode::Return;
    })
}

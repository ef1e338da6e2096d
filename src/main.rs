use anyhow::{Context, Result};
use clam_vm::{
    bytecode,
    bytecode::{Constant, ConstantIndex, LocalSlot, OperationCode, UpvalueCapture, UpvalueIndex},
    gc::Function,
    Config, Value, VirtualMachine,
};

fn main() -> Result<()> {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    // fun hello() {
    //     var world = 1;
    //     fun theworld() {
    //         world = world - 1;
    //         return world;
    //     }
    //     world = world + 114514;
    //     return theworld;
    // }
    //
    // var standpower = hello();
    // print standpower();
    // print standpower();
    // print clock() >= 0;
    //
    // ================Output================
    // 114514
    // 114513
    // true

    let theworld = bytecode! {
        const [Constant::Number(1.0)]

        OperationCode::GetUpvalue; 0 as UpvalueIndex;
        OperationCode::Constant; 0 as ConstantIndex;
        OperationCode::Subtract;
        OperationCode::SetUpvalue; 0 as UpvalueIndex;
        OperationCode::Pop;
        OperationCode::GetUpvalue; 0 as UpvalueIndex;
        OperationCode::Return;
    };

    let hello = bytecode! {
        const [
            Constant::Number(1.0),
            Constant::Number(114514.0),
            Constant::Function(Function::new("theworld", 0, 1, theworld)),
        ]

        OperationCode::Constant; 0 as ConstantIndex;
        OperationCode::Closure; 2 as ConstantIndex; UpvalueCapture::Local(1);
        OperationCode::GetLocal; 1 as LocalSlot;
        OperationCode::Constant; 1 as ConstantIndex;
        OperationCode::Add;
        OperationCode::SetLocal; 1 as LocalSlot;
        OperationCode::Pop;
        OperationCode::GetLocal; 2 as LocalSlot;
        OperationCode::Return;
    };

    let script = bytecode! {
        const [
            Constant::Function(Function::new("hello", 0, 0, hello)),
            Constant::String("standpower".into()),
            Constant::String("clock".into()),
            Constant::Number(0.0),
        ]

        OperationCode::Closure; 0 as ConstantIndex;
        OperationCode::Call0;
        OperationCode::DefineGlobal; 1 as ConstantIndex;
        OperationCode::GetGlobal; 1 as ConstantIndex;
        OperationCode::Call0;
        OperationCode::Print;
        OperationCode::GetGlobal; 1 as ConstantIndex;
        OperationCode::Call0;
        OperationCode::Print;
        OperationCode::GetGlobal; 2 as ConstantIndex;
        OperationCode::Call0;
        OperationCode::Constant; 3 as ConstantIndex;
        OperationCode::Less;
        OperationCode::Not;
        OperationCode::Print;
        OperationCode::Nil;
        OperationCode::Return;
    };

    let config = Config::from_env().context("failed to read VM configuration")?;
    let mut vm = VirtualMachine::with_config(config);
    let started = std::time::Instant::now();
    vm.define_native("clock", move |_| Value::from(started.elapsed().as_secs_f64()))?;
    vm.interpret(script)?;
    Ok(())
}

mod common;

use anyhow::Result;
use clam_vm::{
    bytecode,
    bytecode::{BytecodeWriter, Chunk, Constant, ConstantIndex, EmitBytecodeExt, OperationCode},
    error::TraceLine,
    gc::Function,
    Config, ErrorCategory, InterpretError, RuntimeError, RuntimeErrorKind, Value,
};

use common::{number, string, vm_with_capture};

fn runtime_error(result: Result<(), InterpretError>) -> RuntimeError {
    match result {
        Err(InterpretError::Runtime(error)) => error,
        other => panic!("expected a runtime error, got {:?}", other),
    }
}

#[test]
fn redefinition_keeps_the_first_binding() -> Result<()> {
    let script = bytecode! {
        const [
            Constant::Number(1.0),
            Constant::String("x".into()),
            Constant::Number(2.0),
        ]

        OperationCode::Constant; 0 as ConstantIndex;
        OperationCode::DefineGlobal; 1 as ConstantIndex;
        OperationCode::Constant; 2 as ConstantIndex;
        OperationCode::DefineGlobal; 1 as ConstantIndex;
        OperationCode::Nil;
        OperationCode::Return;
    };

    let (mut vm, _) = vm_with_capture(Config::default());
    let error = runtime_error(vm.interpret(script));
    assert_eq!(error.kind, RuntimeErrorKind::GlobalRedefinition("x".into()));
    assert_eq!(error.category(), ErrorCategory::Name);
    assert_eq!(number(&vm, "x"), Some(1.0));
    assert_eq!(vm.stack_len(), 0);
    Ok(())
}

#[test]
fn undefined_globals_cannot_be_read_or_assigned() -> Result<()> {
    let read = bytecode! {
        const [Constant::String("ghost".into())]

        OperationCode::GetGlobal; 0 as ConstantIndex;
        OperationCode::Print;
        OperationCode::Nil;
        OperationCode::Return;
    };
    let write = bytecode! {
        const [Constant::Number(1.0), Constant::String("ghost".into())]

        OperationCode::Constant; 0 as ConstantIndex;
        OperationCode::SetGlobal; 1 as ConstantIndex;
        OperationCode::Nil;
        OperationCode::Return;
    };

    let (mut vm, output) = vm_with_capture(Config::default());
    let error = runtime_error(vm.interpret(read));
    assert_eq!(error.kind, RuntimeErrorKind::UndefinedGlobal("ghost".into()));
    let error = runtime_error(vm.interpret(write));
    assert_eq!(error.kind, RuntimeErrorKind::UndefinedGlobal("ghost".into()));
    assert_eq!(error.category(), ErrorCategory::Name);
    // Assignment must not create the binding.
    assert_eq!(vm.global("ghost"), None);
    assert_eq!(output.text(), "");
    Ok(())
}

#[test]
fn assignment_leaves_the_value_on_the_stack() -> Result<()> {
    // var x = 1;
    // print x = 2;
    let script = bytecode! {
        const [
            Constant::Number(1.0),
            Constant::String("x".into()),
            Constant::Number(2.0),
        ]

        OperationCode::Constant; 0 as ConstantIndex;
        OperationCode::DefineGlobal; 1 as ConstantIndex;
        OperationCode::Constant; 2 as ConstantIndex;
        OperationCode::SetGlobal; 1 as ConstantIndex;
        OperationCode::Print;
        OperationCode::Nil;
        OperationCode::Return;
    };

    let (mut vm, output) = vm_with_capture(Config::default());
    vm.interpret(script)?;
    assert_eq!(number(&vm, "x"), Some(2.0));
    assert_eq!(output.text(), "2\n");
    Ok(())
}

#[test]
fn strings_concatenate_and_print() -> Result<()> {
    // var s = "con" + "cat";
    // print s;
    // print s == "concat";
    // print nil;
    // print !nil;
    let script = bytecode! {
        const [
            Constant::String("con".into()),
            Constant::String("cat".into()),
            Constant::String("s".into()),
            Constant::String("concat".into()),
        ]

        OperationCode::Constant; 0 as ConstantIndex;
        OperationCode::Constant; 1 as ConstantIndex;
        OperationCode::Add;
        OperationCode::DefineGlobal; 2 as ConstantIndex;
        OperationCode::GetGlobal; 2 as ConstantIndex;
        OperationCode::Print;
        OperationCode::GetGlobal; 2 as ConstantIndex;
        OperationCode::Constant; 3 as ConstantIndex;
        OperationCode::Equal;
        OperationCode::Print;
        OperationCode::Nil;
        OperationCode::Print;
        OperationCode::Nil;
        OperationCode::Not;
        OperationCode::Print;
        OperationCode::Nil;
        OperationCode::Return;
    };

    let (mut vm, output) = vm_with_capture(Config::default());
    vm.interpret(script)?;
    assert_eq!(string(&vm, "s").as_deref(), Some("concat"));
    assert_eq!(output.text(), "concat\ntrue\nnil\ntrue\n");
    Ok(())
}

#[test]
fn natives_receive_their_arguments() -> Result<()> {
    let script = bytecode! {
        const [
            Constant::String("sum".into()),
            Constant::Number(1.0),
            Constant::Number(2.0),
            Constant::Number(3.0),
            Constant::String("total".into()),
        ]

        OperationCode::GetGlobal; 0 as ConstantIndex;
        OperationCode::Constant; 1 as ConstantIndex;
        OperationCode::Constant; 2 as ConstantIndex;
        OperationCode::Constant; 3 as ConstantIndex;
        OperationCode::Call3;
        OperationCode::DefineGlobal; 4 as ConstantIndex;
        OperationCode::GetGlobal; 0 as ConstantIndex;
        OperationCode::Print;
        OperationCode::Nil;
        OperationCode::Return;
    };

    let (mut vm, output) = vm_with_capture(Config::default());
    vm.define_native("sum", |arguments| {
        Value::from(arguments.iter().filter_map(Value::as_number).sum::<f64>())
    })?;
    let error = vm
        .define_native("sum", |_| Value::Nil)
        .expect_err("a native name can only be bound once");
    assert_eq!(error.kind, RuntimeErrorKind::GlobalRedefinition("sum".into()));

    vm.interpret(script)?;
    assert_eq!(number(&vm, "total"), Some(6.0));
    assert_eq!(output.text(), "<native fn sum>\n");
    assert_eq!(vm.stack_len(), 0);
    Ok(())
}

#[test]
fn arity_mismatch_does_not_enter_the_callee() -> Result<()> {
    // fun f(a) { var touched = 1; }
    // f();
    let f = bytecode! {
        const [Constant::Number(1.0), Constant::String("touched".into())]

        OperationCode::Constant; 0 as ConstantIndex;
        OperationCode::DefineGlobal; 1 as ConstantIndex;
        OperationCode::Nil;
        OperationCode::Return;
    };
    let script = bytecode! {
        const [Constant::Function(Function::new("f", 1, 0, f))]

        OperationCode::Closure; 0 as ConstantIndex;
        OperationCode::Call0;
        OperationCode::Nil;
        OperationCode::Return;
    };
    let afterwards = bytecode! {
        const [Constant::Number(2.0), Constant::String("after".into())]

        OperationCode::Constant; 0 as ConstantIndex;
        OperationCode::DefineGlobal; 1 as ConstantIndex;
        OperationCode::Nil;
        OperationCode::Return;
    };

    let (mut vm, _) = vm_with_capture(Config::default());
    let error = runtime_error(vm.interpret(script));
    assert_eq!(
        error.kind,
        RuntimeErrorKind::Arity {
            expected: 1,
            got: 0
        }
    );
    assert_eq!(error.category(), ErrorCategory::Arity);
    assert_eq!(vm.global("touched"), None);
    assert_eq!(vm.stack_len(), 0);

    // The machine is usable again after the failure.
    vm.interpret(afterwards)?;
    assert_eq!(number(&vm, "after"), Some(2.0));
    Ok(())
}

#[test]
fn only_functions_are_callable() -> Result<()> {
    let number_callee = bytecode! {
        const [Constant::Number(1.0)]

        OperationCode::Constant; 0 as ConstantIndex;
        OperationCode::Call0;
        OperationCode::Nil;
        OperationCode::Return;
    };
    let string_callee = bytecode! {
        const [Constant::String("hi".into())]

        OperationCode::Constant; 0 as ConstantIndex;
        OperationCode::Call0;
        OperationCode::Nil;
        OperationCode::Return;
    };

    let (mut vm, _) = vm_with_capture(Config::default());
    let error = runtime_error(vm.interpret(number_callee));
    assert_eq!(error.kind, RuntimeErrorKind::NotCallable("number"));
    assert_eq!(error.category(), ErrorCategory::Type);
    let error = runtime_error(vm.interpret(string_callee));
    assert_eq!(error.kind, RuntimeErrorKind::NotCallable("String"));
    Ok(())
}

#[test]
fn operands_are_type_checked() -> Result<()> {
    let mixed_add = bytecode! {
        const [Constant::Number(1.0), Constant::String("a".into())]

        OperationCode::Constant; 0 as ConstantIndex;
        OperationCode::Constant; 1 as ConstantIndex;
        OperationCode::Add;
        OperationCode::Nil;
        OperationCode::Return;
    };
    let negate_bool = bytecode! {
        const []

        OperationCode::True;
        OperationCode::Negate;
        OperationCode::Nil;
        OperationCode::Return;
    };
    let compare_strings = bytecode! {
        const [Constant::String("a".into()), Constant::String("b".into())]

        OperationCode::Constant; 0 as ConstantIndex;
        OperationCode::Constant; 1 as ConstantIndex;
        OperationCode::Less;
        OperationCode::Nil;
        OperationCode::Return;
    };

    let (mut vm, _) = vm_with_capture(Config::default());
    let error = runtime_error(vm.interpret(mixed_add));
    assert_eq!(
        error.kind,
        RuntimeErrorKind::OperandType {
            operator: "+",
            expected: "two numbers or two strings"
        }
    );
    let error = runtime_error(vm.interpret(negate_bool));
    assert_eq!(
        error.kind,
        RuntimeErrorKind::OperandType {
            operator: "-",
            expected: "a number"
        }
    );
    let error = runtime_error(vm.interpret(compare_strings));
    assert_eq!(
        error.kind,
        RuntimeErrorKind::OperandType {
            operator: "<",
            expected: "numbers"
        }
    );
    assert_eq!(error.category(), ErrorCategory::Type);
    assert_eq!(vm.stack_len(), 0);
    Ok(())
}

#[test]
fn traceback_lists_frames_innermost_first() -> Result<()> {
    // 1 fun inner() {
    // 2     return missing;
    // 3 }
    // 4
    // 5 var f = inner;
    // 6 f();
    let mut inner = Chunk::new();
    let mut writer = BytecodeWriter::new(&mut inner);
    let missing = writer.define(Constant::String("missing".into()))?;
    writer.set_line(2).emit(OperationCode::GetGlobal)?;
    writer.emit(missing)?;
    writer.emit(OperationCode::Return)?;
    drop(writer);

    let mut script = Chunk::new();
    let mut writer = BytecodeWriter::new(&mut script);
    let function = writer.define(Constant::Function(Function::new("inner", 0, 0, inner)))?;
    writer.set_line(5).emit(OperationCode::Closure)?;
    writer.emit(function)?;
    writer.set_line(6).emit(OperationCode::Call0)?;
    writer.emit(OperationCode::Pop)?;
    writer.emit(OperationCode::Nil)?;
    writer.emit(OperationCode::Return)?;
    drop(writer);

    let (mut vm, _) = vm_with_capture(Config::default());
    let error = runtime_error(vm.interpret(script));
    assert_eq!(
        error.trace,
        vec![
            TraceLine {
                line: Some(2),
                function: Some("inner".into())
            },
            TraceLine {
                line: Some(6),
                function: None
            },
        ]
    );
    assert_eq!(
        error.report(),
        "undefined global `missing`\n[line 2] in inner()\n[line 6] in script"
    );
    Ok(())
}

#[test]
fn unbounded_recursion_overflows() -> Result<()> {
    // fun f() { return f(); }
    // f();
    let f = bytecode! {
        const [Constant::String("f".into())]

        OperationCode::GetGlobal; 0 as ConstantIndex;
        OperationCode::Call0;
        OperationCode::Return;
    };
    let script = bytecode! {
        const [
            Constant::Function(Function::new("f", 0, 0, f)),
            Constant::String("f".into()),
        ]

        OperationCode::Closure; 0 as ConstantIndex;
        OperationCode::DefineGlobal; 1 as ConstantIndex;
        OperationCode::GetGlobal; 1 as ConstantIndex;
        OperationCode::Call0;
        OperationCode::Pop;
        OperationCode::Nil;
        OperationCode::Return;
    };

    let (mut vm, _) = vm_with_capture(Config::default().with_max_frames(16));
    let error = runtime_error(vm.interpret(script));
    assert_eq!(error.kind, RuntimeErrorKind::StackOverflow);
    assert_eq!(error.category(), ErrorCategory::Fault);
    assert_eq!(error.trace.len(), 16);
    assert_eq!(vm.stack_len(), 0);
    Ok(())
}

#[test]
fn loops_jump_back_until_the_condition_fails() -> Result<()> {
    // var i = 0;
    // while (i < 5) i = i + 1;
    let mut chunk = Chunk::new();
    let mut writer = BytecodeWriter::new(&mut chunk);
    let i = writer.define(Constant::String("i".into()))?;
    let zero = writer.define(Constant::Number(0.0))?;
    let five = writer.define(Constant::Number(5.0))?;
    let one = writer.define(Constant::Number(1.0))?;

    writer.emit(OperationCode::Constant)?;
    writer.emit(zero)?;
    writer.emit(OperationCode::DefineGlobal)?;
    writer.emit(i)?;

    let start = writer.position();
    writer.emit(OperationCode::GetGlobal)?;
    writer.emit(i)?;
    writer.emit(OperationCode::Constant)?;
    writer.emit(five)?;
    writer.emit(OperationCode::Less)?;
    let exit = writer.emit_jump(OperationCode::JumpIfFalse)?;
    writer.emit(OperationCode::Pop)?;
    writer.emit(OperationCode::GetGlobal)?;
    writer.emit(i)?;
    writer.emit(OperationCode::Constant)?;
    writer.emit(one)?;
    writer.emit(OperationCode::Add)?;
    writer.emit(OperationCode::SetGlobal)?;
    writer.emit(i)?;
    writer.emit(OperationCode::Pop)?;
    writer.emit_loop(start)?;
    writer.patch_jump(exit)?;
    writer.emit(OperationCode::Pop)?;
    writer.emit(OperationCode::Nil)?;
    writer.emit(OperationCode::Return)?;
    drop(writer);

    let (mut vm, _) = vm_with_capture(Config::default());
    vm.interpret(chunk)?;
    assert_eq!(number(&vm, "i"), Some(5.0));
    assert_eq!(vm.stack_len(), 0);
    Ok(())
}

#[test]
fn compile_errors_never_reach_the_machine() -> Result<()> {
    let program = bytecode! {
        const [Constant::String("compiled".into())]

        OperationCode::Constant; 0 as ConstantIndex;
        OperationCode::Print;
        OperationCode::Nil;
        OperationCode::Return;
    };
    let failing = |_: &str| -> Result<Chunk, String> { Err("unexpected token".into()) };
    let succeeding = move |_: &str| -> Result<Chunk, String> { Ok(program.clone()) };

    let (mut vm, output) = vm_with_capture(Config::default());
    match vm.interpret_source(&failing, "print;") {
        Err(InterpretError::Compile(message)) => assert_eq!(message, "unexpected token"),
        other => panic!("expected a compile error, got {:?}", other),
    }
    assert_eq!(output.text(), "");

    vm.interpret_source(&succeeding, "print \"compiled\";")?;
    assert_eq!(output.text(), "compiled\n");
    Ok(())
}

#[test]
fn a_function_named_script_is_reported_as_a_call() -> Result<()> {
    // fun script() { return missing; }
    // script();
    let body = bytecode! {
        const [Constant::String("missing".into())]

        OperationCode::GetGlobal; 0 as ConstantIndex;
        OperationCode::Return;
    };
    let program = bytecode! {
        const [Constant::Function(Function::new("script", 0, 0, body))]

        OperationCode::Closure; 0 as ConstantIndex;
        OperationCode::Call0;
        OperationCode::Nil;
        OperationCode::Return;
    };

    let (mut vm, _) = vm_with_capture(Config::default());
    let error = runtime_error(vm.interpret(program));
    assert_eq!(
        error.report(),
        "undefined global `missing`\n[line 1] in script()\n[line 1] in script"
    );
    Ok(())
}

use std::{collections::HashMap, io::Write, rc::Rc};

use crate::{
    bytecode::{
        BytecodeReader, Chunk, Constant, ConstantIndex, Fetch, JumpOffset, LocalSlot,
        OperationCode, UpvalueCapture, UpvalueIndex,
    },
    config::Config,
    error::{InterpretError, RuntimeError, RuntimeErrorKind, TraceLine},
    gc::{
        Allocate, Closure, Downcast, Function, GarbageCollector, NativeFn,
        NativeFunction, Object, Reference, Upvalue,
    },
    stack::Stack,
    value::{DisplayValue, Value},
};

/// Capacity of the operand stack, in values.
pub const STACK_SIZE: usize = 4096;

/// A front end producing chunks from source text.
pub trait Compile {
    fn compile(&self, source: &str) -> Result<Chunk, String>;
}

impl<F> Compile for F
where
    F: Fn(&str) -> Result<Chunk, String>,
{
    fn compile(&self, source: &str) -> Result<Chunk, String> {
        self(source)
    }
}

/// An active function call.
struct CallFrame {
    closure: Reference,
    reader: BytecodeReader,
    /// Stack index of slot 0, which holds the callee.
    base: usize,
}

/// What a call instruction found below its arguments.
enum Callee {
    Native(NativeFn),
    Closure { arity: u8, chunk: Rc<Chunk> },
}

/// The virtual machine.
///
/// A virtual machine stores program states and executes bytecode instructions. As a stack
/// machine, it keeps local variables and intermediate results on the operand stack, one
/// [`CallFrame`] per active call, and every object in its [`GarbageCollector`].
///
/// Roots of a collection are the operand stack, the closures of the call frames, the list of
/// open upvalues and the global table. Anything the VM is still assembling is pushed onto the
/// operand stack before the next allocation, since any allocation may collect.
pub struct VirtualMachine {
    stack: Stack<Value, STACK_SIZE>,
    frames: Vec<CallFrame>,
    globals: HashMap<Reference, Value>,
    /// Head of the open upvalues, sorted by descending stack slot.
    open_upvalues: Option<Reference>,
    gc: GarbageCollector,
    config: Config,
    output: Box<dyn Write>,
}

impl Default for VirtualMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualMachine {
    /// Create a virtual machine with the default [`Config`], printing to stdout.
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        Self {
            stack: Stack::new(),
            frames: Vec::new(),
            globals: HashMap::new(),
            open_upvalues: None,
            gc: GarbageCollector::new(config.gc),
            config,
            output: Box::new(std::io::stdout()),
        }
    }

    /// Redirect the output of `Print`.
    pub fn set_output(&mut self, output: impl Write + 'static) {
        self.output = Box::new(output);
    }

    /// The heap, for inspecting objects.
    pub fn heap(&self) -> &GarbageCollector {
        &self.gc
    }

    pub fn display(&self, value: Value) -> DisplayValue<'_> {
        self.gc.display(value)
    }

    /// The value bound to a global name, if any.
    pub fn global(&self, name: &str) -> Option<Value> {
        let key = self.gc.find_interned(name)?;
        self.globals.get(&key).copied()
    }

    /// Number of values on the operand stack. Zero between runs.
    pub fn stack_len(&self) -> usize {
        self.stack.len()
    }

    /// Register a host function under a global name.
    ///
    /// Fails with [`RuntimeErrorKind::GlobalRedefinition`] if the name is taken.
    pub fn define_native(
        &mut self,
        name: &str,
        function: impl Fn(&[Value]) -> Value + 'static,
    ) -> Result<(), RuntimeError> {
        if self.global(name).is_some() {
            return Err(RuntimeErrorKind::GlobalRedefinition(name.to_owned()).into());
        }
        let key = self.intern(name);
        self.stack.push(Value::Object(key))?;
        let native = self.allocate(NativeFunction::new(name, function));
        self.stack.push(Value::Object(native))?;
        self.globals.insert(key, Value::Object(native));
        self.stack.truncate(self.stack.len() - 2);
        tracing::debug!(name, "defined native");
        Ok(())
    }

    /// Execute a chunk as the top-level script.
    ///
    /// On a runtime error the traceback is printed to stderr, and the operand stack, call
    /// frames and open upvalues are discarded. Globals and the heap survive, so the VM is ready
    /// for another chunk.
    pub fn interpret(&mut self, chunk: impl Into<Rc<Chunk>>) -> Result<(), InterpretError> {
        let function = Function::script(chunk.into());
        let result = self.call_script(function).and_then(|()| self.run());
        if let Err(kind) = result {
            let error = RuntimeError {
                kind,
                trace: self.traceback(),
            };
            eprintln!("{}", error.report());
            self.reset_stack();
            return Err(error.into());
        }
        Ok(())
    }

    /// Compile source text with `compiler` and run the result.
    pub fn interpret_source(
        &mut self,
        compiler: &impl Compile,
        source: &str,
    ) -> Result<(), InterpretError> {
        let chunk = compiler.compile(source).map_err(InterpretError::Compile)?;
        self.interpret(chunk)
    }

    /// Run a full collection now.
    pub fn collect_garbage(&mut self) {
        for value in self.stack.iter() {
            self.gc.mark_value(value);
        }
        for frame in &self.frames {
            self.gc.mark_object(frame.closure);
        }
        let mut upvalue = self.open_upvalues;
        while let Some(reference) = upvalue {
            self.gc.mark_object(reference);
            let open: Option<&Upvalue> = self.gc.downcast(reference);
            upvalue = match open {
                Some(Upvalue::Open { next, .. }) => *next,
                _ => None,
            };
        }
        for (name, value) in &self.globals {
            self.gc.mark_object(*name);
            self.gc.mark_value(value);
        }
        self.gc.collect();
    }

    fn allocate<T>(&mut self, value: T) -> Reference
    where
        GarbageCollector: Allocate<T>,
    {
        if self.gc.should_collect() {
            self.collect_garbage();
        }
        self.gc.allocate(value)
    }

    /// The canonical string for `text`. Only a miss allocates, so only a miss may collect.
    fn intern(&mut self, text: &str) -> Reference {
        match self.gc.find_interned(text) {
            Some(reference) => reference,
            None => self.allocate(text),
        }
    }

    fn reset_stack(&mut self) {
        // Closures that escaped into globals keep working once their slots are gone.
        if self.close_upvalues(0).is_err() {
            tracing::debug!("open upvalue list was corrupt, dropping it");
        }
        self.stack.clear();
        self.frames.clear();
        self.open_upvalues = None;
    }

    fn traceback(&self) -> Vec<TraceLine> {
        self.frames
            .iter()
            .rev()
            .map(|frame| TraceLine {
                line: frame.reader.line(),
                function: self
                    .frame_function(frame.closure)
                    .map_or_else(
                        |_| Some("<unknown>".to_owned()),
                        |function| function.name.clone(),
                    ),
            })
            .collect()
    }

    fn frame_function(&self, closure: Reference) -> Result<&Function, RuntimeErrorKind> {
        let closure: &Closure = self.resolve(closure)?;
        self.resolve(closure.function)
    }

    fn resolve<T>(&self, reference: Reference) -> Result<&T, RuntimeErrorKind>
    where
        GarbageCollector: Downcast<T>,
    {
        self.gc
            .downcast(reference)
            .ok_or(RuntimeErrorKind::InvalidReference)
    }

    fn resolve_mut<T>(&mut self, reference: Reference) -> Result<&mut T, RuntimeErrorKind>
    where
        GarbageCollector: Downcast<T>,
    {
        self.gc
            .downcast_mut(reference)
            .ok_or(RuntimeErrorKind::InvalidReference)
    }

    fn frame(&self) -> Result<&CallFrame, RuntimeErrorKind> {
        self.frames.last().ok_or(RuntimeErrorKind::NoActiveFrame)
    }

    fn frame_mut(&mut self) -> Result<&mut CallFrame, RuntimeErrorKind> {
        self.frames.last_mut().ok_or(RuntimeErrorKind::NoActiveFrame)
    }

    fn fetch<T>(&mut self) -> Result<T, RuntimeErrorKind>
    where
        BytecodeReader: Fetch<T>,
    {
        self.frame_mut()?.reader.fetch()
    }

    fn constant(&self, index: ConstantIndex) -> Result<&Constant, RuntimeErrorKind> {
        self.frame()?.reader.load(index)
    }

    fn constant_name(&self, index: ConstantIndex) -> Result<&str, RuntimeErrorKind> {
        match self.constant(index)? {
            Constant::String(name) => Ok(name.as_str()),
            _ => Err(RuntimeErrorKind::ConstantType {
                index,
                expected: "string",
            }),
        }
    }

    /// The global table key for a name constant, if that global is defined.
    fn global_key(&self, index: ConstantIndex) -> Result<Reference, RuntimeErrorKind> {
        let name = self.constant_name(index)?;
        self.gc
            .find_interned(name)
            .filter(|key| self.globals.contains_key(key))
            .ok_or_else(|| RuntimeErrorKind::UndefinedGlobal(name.to_owned()))
    }

    fn local_index(&self, slot: LocalSlot) -> Result<usize, RuntimeErrorKind> {
        let index = self.frame()?.base + slot as usize;
        if index >= self.stack.len() {
            return Err(RuntimeErrorKind::LocalOutOfBounds(slot));
        }
        Ok(index)
    }

    fn run(&mut self) -> Result<(), RuntimeErrorKind> {
        macro_rules! binary {
            ($operator: tt as $variant: ident) => {{
                // Only numbers are accepted, so no reference has to stay on the stack while
                // the result is computed.
                let right = self.stack.pop()?;
                let left = self.stack.pop()?;
                match (left, right) {
                    (Value::Number(left), Value::Number(right)) => {
                        self.stack.push(Value::$variant(left $operator right))?;
                    }
                    _ => {
                        return Err(RuntimeErrorKind::OperandType {
                            operator: stringify!($operator),
                            expected: "numbers",
                        })
                    }
                }
            }};
        }

        loop {
            let opcode: OperationCode = self.fetch()?;
            tracing::trace!(?opcode, depth = self.stack.len(), "dispatch");
            match opcode {
                OperationCode::Constant => {
                    let index: ConstantIndex = self.fetch()?;
                    let value = self.load_constant(index)?;
                    self.stack.push(value)?;
                }
                OperationCode::Nil => self.stack.push(Value::Nil)?,
                OperationCode::True => self.stack.push(Value::Boolean(true))?,
                OperationCode::False => self.stack.push(Value::Boolean(false))?,
                OperationCode::Pop => drop(self.stack.pop()?),

                OperationCode::GetLocal => {
                    let slot: LocalSlot = self.fetch()?;
                    let value = self.stack[self.local_index(slot)?];
                    self.stack.push(value)?;
                }
                OperationCode::SetLocal => {
                    let slot: LocalSlot = self.fetch()?;
                    let index = self.local_index(slot)?;
                    let value = *self.stack.top()?;
                    self.stack[index] = value;
                }
                OperationCode::DefineGlobal => {
                    let index: ConstantIndex = self.fetch()?;
                    self.define_global(index)?;
                }
                OperationCode::GetGlobal => {
                    let index: ConstantIndex = self.fetch()?;
                    self.get_global(index)?;
                }
                OperationCode::SetGlobal => {
                    let index: ConstantIndex = self.fetch()?;
                    self.set_global(index)?;
                }
                OperationCode::GetUpvalue => {
                    let index: UpvalueIndex = self.fetch()?;
                    let upvalue = self.frame_upvalue(index)?;
                    let value = match self.resolve::<Upvalue>(upvalue)? {
                        Upvalue::Open { slot, .. } => *self
                            .stack
                            .get(*slot)
                            .ok_or(RuntimeErrorKind::StackUnderflow)?,
                        Upvalue::Closed(value) => *value,
                    };
                    self.stack.push(value)?;
                }
                OperationCode::SetUpvalue => {
                    let index: UpvalueIndex = self.fetch()?;
                    let value = *self.stack.top()?;
                    let upvalue = self.frame_upvalue(index)?;
                    let open_slot = match self.resolve_mut::<Upvalue>(upvalue)? {
                        Upvalue::Open { slot, .. } => Some(*slot),
                        Upvalue::Closed(closed) => {
                            *closed = value;
                            None
                        }
                    };
                    if let Some(slot) = open_slot {
                        *self
                            .stack
                            .get_mut(slot)
                            .ok_or(RuntimeErrorKind::StackUnderflow)? = value;
                    }
                }

                OperationCode::Negate => match self.stack.pop()? {
                    Value::Number(n) => self.stack.push(Value::Number(-n))?,
                    _ => {
                        return Err(RuntimeErrorKind::OperandType {
                            operator: "-",
                            expected: "a number",
                        })
                    }
                },
                OperationCode::Not => {
                    let falsey = !self.stack.pop()?.is_truthy();
                    self.stack.push(Value::Boolean(falsey))?;
                }

                OperationCode::Add => self.add()?,
                OperationCode::Subtract => binary!(- as Number),
                OperationCode::Multiply => binary!(* as Number),
                OperationCode::Divide => binary!(/ as Number),

                OperationCode::Equal => {
                    let right = self.stack.pop()?;
                    let left = self.stack.pop()?;
                    self.stack.push(Value::Boolean(left == right))?;
                }
                OperationCode::Greater => binary!(> as Boolean),
                OperationCode::Less => binary!(< as Boolean),

                OperationCode::Print => {
                    // Printed before popping, the value stays rooted while it is rendered.
                    let value = *self.stack.top()?;
                    writeln!(self.output, "{}", self.gc.display(value))
                        .map_err(|error| RuntimeErrorKind::Output(error.to_string()))?;
                    self.stack.pop()?;
                }

                OperationCode::Jump => {
                    let offset: JumpOffset = self.fetch()?;
                    self.frame_mut()?.reader.jump(offset)?;
                }
                OperationCode::JumpIfFalse => {
                    let offset: JumpOffset = self.fetch()?;
                    if !self.stack.top()?.is_truthy() {
                        self.frame_mut()?.reader.jump(offset)?;
                    }
                }
                OperationCode::Loop => {
                    let offset: JumpOffset = self.fetch()?;
                    self.frame_mut()?.reader.jump_back(offset)?;
                }

                OperationCode::Call0
                | OperationCode::Call1
                | OperationCode::Call2
                | OperationCode::Call3
                | OperationCode::Call4
                | OperationCode::Call5
                | OperationCode::Call6
                | OperationCode::Call7
                | OperationCode::Call8 => {
                    let argc = opcode
                        .argument_count()
                        .ok_or(RuntimeErrorKind::InvalidOperationCode(opcode as u8))?;
                    self.call_value(argc)?;
                }

                OperationCode::Closure => self.make_closure()?,
                OperationCode::CloseUpvalue => {
                    let top = self
                        .stack
                        .len()
                        .checked_sub(1)
                        .ok_or(RuntimeErrorKind::StackUnderflow)?;
                    self.close_upvalues(top)?;
                    self.stack.pop()?;
                }
                OperationCode::Return => {
                    if self.return_from_frame()? {
                        return Ok(());
                    }
                }

                OperationCode::Impossible => {
                    return Err(RuntimeErrorKind::InvalidOperationCode(opcode as u8))
                }
            }
        }
    }

    /// Materialize a constant: strings are interned, functions allocated.
    fn load_constant(&mut self, index: ConstantIndex) -> Result<Value, RuntimeErrorKind> {
        let value = match self.constant(index)?.clone() {
            Constant::Number(n) => Value::Number(n),
            Constant::String(s) => Value::Object(self.intern(&s)),
            Constant::Function(function) => Value::Object(self.allocate(function)),
        };
        Ok(value)
    }

    fn add(&mut self) -> Result<(), RuntimeErrorKind> {
        // Both operands stay on the stack until the result exists, since concatenation
        // allocates.
        let right = *self.stack.peek(0)?;
        let left = *self.stack.peek(1)?;
        let sum = match (left, right) {
            (Value::Number(left), Value::Number(right)) => Value::Number(left + right),
            (Value::Object(left), Value::Object(right)) => {
                let concat = match (self.gc.string(left), self.gc.string(right)) {
                    (Some(left), Some(right)) => format!("{}{}", left, right),
                    _ => return Err(add_operand_error()),
                };
                Value::Object(self.intern(&concat))
            }
            _ => return Err(add_operand_error()),
        };
        self.stack.pop()?;
        self.stack.pop()?;
        self.stack.push(sum)
    }

    fn define_global(&mut self, index: ConstantIndex) -> Result<(), RuntimeErrorKind> {
        let name = self.constant_name(index)?.to_owned();
        if self.global_key(index).is_ok() {
            return Err(RuntimeErrorKind::GlobalRedefinition(name));
        }
        // The value stays on the stack while the name is interned.
        let key = self.intern(&name);
        let value = self.stack.pop()?;
        self.globals.insert(key, value);
        Ok(())
    }

    fn get_global(&mut self, index: ConstantIndex) -> Result<(), RuntimeErrorKind> {
        let key = self.global_key(index)?;
        let value = self.globals[&key];
        self.stack.push(value)
    }

    fn set_global(&mut self, index: ConstantIndex) -> Result<(), RuntimeErrorKind> {
        let key = self.global_key(index)?;
        let value = *self.stack.top()?;
        self.globals.insert(key, value);
        Ok(())
    }

    fn call_script(&mut self, function: Function) -> Result<(), RuntimeErrorKind> {
        let function = self.allocate(function);
        self.stack.push(Value::Object(function))?;
        let closure = self.allocate(Closure::new(function, 0));
        *self.stack.top_mut()? = Value::Object(closure);
        self.call_value(0)
    }

    /// Call the value sitting below the top `argc` arguments.
    fn call_value(&mut self, argc: u8) -> Result<(), RuntimeErrorKind> {
        let callee = *self.stack.peek(argc as usize)?;
        let Value::Object(reference) = callee else {
            return Err(RuntimeErrorKind::NotCallable(callee.type_name()));
        };
        let callee = match self.gc.get(reference) {
            Some(Object::Native(native)) => Callee::Native(Rc::clone(&native.function)),
            Some(Object::Closure(closure)) => {
                let function: &Function = self.resolve(closure.function)?;
                Callee::Closure {
                    arity: function.arity,
                    chunk: Rc::clone(&function.chunk),
                }
            }
            Some(object) => return Err(RuntimeErrorKind::NotCallable(object.kind().name())),
            None => return Err(RuntimeErrorKind::InvalidReference),
        };

        let base = self.stack.len() - argc as usize - 1;
        match callee {
            Callee::Native(function) => {
                let result = (*function)(&self.stack[base + 1..]);
                self.stack.truncate(base);
                self.stack.push(result)?;
            }
            Callee::Closure { arity, chunk } => {
                if arity != argc {
                    return Err(RuntimeErrorKind::Arity {
                        expected: arity,
                        got: argc,
                    });
                }
                if self.frames.len() >= self.config.max_frames {
                    return Err(RuntimeErrorKind::StackOverflow);
                }
                self.frames.push(CallFrame {
                    closure: reference,
                    reader: BytecodeReader::new(chunk),
                    base,
                });
                tracing::debug!(
                    function = self
                        .frame_function(reference)
                        .map_or("<unknown>", Function::name),
                    depth = self.frames.len(),
                    "call"
                );
            }
        }
        Ok(())
    }

    /// Pop the current frame. Returns whether it was the outermost one.
    fn return_from_frame(&mut self) -> Result<bool, RuntimeErrorKind> {
        let result = self.stack.pop()?;
        let frame = self.frames.pop().ok_or(RuntimeErrorKind::NoActiveFrame)?;
        self.close_upvalues(frame.base)?;
        self.stack.truncate(frame.base);
        tracing::debug!(depth = self.frames.len(), "return");
        if self.frames.is_empty() {
            return Ok(true);
        }
        self.stack.push(result)?;
        Ok(false)
    }

    fn make_closure(&mut self) -> Result<(), RuntimeErrorKind> {
        let index: ConstantIndex = self.fetch()?;
        let Constant::Function(function) = self.constant(index)?.clone() else {
            return Err(RuntimeErrorKind::ConstantType {
                index,
                expected: "function",
            });
        };
        let upvalue_count = function.upvalue_count;

        // The function, then the closure, stays on the stack while upvalues are captured.
        let function = self.allocate(function);
        self.stack.push(Value::Object(function))?;
        let closure = self.allocate(Closure::new(function, upvalue_count as usize));
        *self.stack.top_mut()? = Value::Object(closure);

        for _ in 0..upvalue_count {
            let is_local: u8 = self.fetch()?;
            let index: u8 = self.fetch()?;
            let upvalue = match UpvalueCapture::decode(is_local, index) {
                UpvalueCapture::Local(slot) => {
                    let slot = self.local_index(slot)?;
                    self.capture_upvalue(slot)?
                }
                UpvalueCapture::Enclosing(index) => self.frame_upvalue(index)?,
            };
            self.resolve_mut::<Closure>(closure)?.upvalues.push(upvalue);
        }
        Ok(())
    }

    fn frame_upvalue(&self, index: UpvalueIndex) -> Result<Reference, RuntimeErrorKind> {
        let closure: &Closure = self.resolve(self.frame()?.closure)?;
        closure
            .upvalues
            .get(index as usize)
            .copied()
            .ok_or(RuntimeErrorKind::UpvalueOutOfBounds(index))
    }

    /// Slot and successor of a member of the open upvalue list.
    fn open_upvalue(
        &self,
        reference: Reference,
    ) -> Result<(usize, Option<Reference>), RuntimeErrorKind> {
        match self.resolve::<Upvalue>(reference)? {
            Upvalue::Open { slot, next } => Ok((*slot, *next)),
            Upvalue::Closed(_) => Err(RuntimeErrorKind::InvalidReference),
        }
    }

    /// The open upvalue for a stack slot, created and linked in if there is none yet.
    fn capture_upvalue(&mut self, slot: usize) -> Result<Reference, RuntimeErrorKind> {
        let mut previous = None;
        let mut current = self.open_upvalues;
        while let Some(reference) = current {
            let (open_slot, next) = self.open_upvalue(reference)?;
            if open_slot < slot {
                break;
            }
            if open_slot == slot {
                return Ok(reference);
            }
            previous = Some(reference);
            current = next;
        }

        let created = self.allocate(Upvalue::Open {
            slot,
            next: current,
        });
        match previous {
            Some(previous) => match self.resolve_mut::<Upvalue>(previous)? {
                Upvalue::Open { next, .. } => *next = Some(created),
                Upvalue::Closed(_) => return Err(RuntimeErrorKind::InvalidReference),
            },
            None => self.open_upvalues = Some(created),
        }
        Ok(created)
    }

    /// Close every open upvalue aliasing `threshold` or a slot above it.
    fn close_upvalues(&mut self, threshold: usize) -> Result<(), RuntimeErrorKind> {
        while let Some(reference) = self.open_upvalues {
            let (slot, next) = self.open_upvalue(reference)?;
            if slot < threshold {
                break;
            }
            let value = *self
                .stack
                .get(slot)
                .ok_or(RuntimeErrorKind::StackUnderflow)?;
            *self.resolve_mut::<Upvalue>(reference)? = Upvalue::Closed(value);
            self.open_upvalues = next;
        }
        Ok(())
    }
}

fn add_operand_error() -> RuntimeErrorKind {
    RuntimeErrorKind::OperandType {
        operator: "+",
        expected: "two numbers or two strings",
    }
}

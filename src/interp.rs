//! Reference interpreter for method bodies
//!
//! Executes woven (or unwoven) methods so their runtime trace output can be
//! observed. It models just enough of the platform for the injected code:
//! `System.out`, `PrintStream.println`, `System.currentTimeMillis` and
//! `StringBuilder`, plus static calls between methods of the same class.
//!
//! Frame limits are enforced at runtime: pushing past `max_stack` or touching
//! a slot at or above `max_locals` is a fault, which makes under-allocation by
//! the frame planner observable in tests.

use crate::bytecode::{Instruction, Label, MethodRef};
use crate::descriptor::FieldType;
use crate::emit::{PRINT_STREAM, STRING_BUILDER, SYSTEM};
use crate::method::{ClassUnit, MethodUnit};
use std::collections::HashMap;
use std::io::{self, Write};
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Default instruction budget per top-level invocation
pub const DEFAULT_FUEL: u64 = 10_000_000;

/// Default limit on nested static calls
pub const DEFAULT_MAX_CALL_DEPTH: usize = 256;

/// Fault raised by a single instruction
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    #[error("operand stack overflow (max_stack {max_stack})")]
    StackOverflow { max_stack: u16 },

    #[error("operand stack underflow")]
    StackUnderflow,

    #[error("local slot {slot} out of range (max_locals {max_locals})")]
    LocalOutOfRange { slot: u16, max_locals: u16 },

    #[error("type mismatch: expected {0}")]
    TypeMismatch(&'static str),

    #[error("unsupported member {0}")]
    UnsupportedMember(String),

    #[error("undefined label {0}")]
    UndefinedLabel(Label),

    #[error("uncaught exception")]
    Thrown,

    #[error("execution ran off the end of the body")]
    FellOffEnd,
}

#[derive(Error, Debug)]
pub enum ExecError {
    #[error("no method named {0}")]
    UnknownMethod(String),

    #[error("{method}: expected {expected} argument(s), got {actual}")]
    ArgumentCount {
        method: String,
        expected: usize,
        actual: usize,
    },

    #[error("{method} at instruction {pc}: {fault}")]
    Fault {
        method: String,
        pc: usize,
        fault: Fault,
    },

    #[error("call depth limit {0} exceeded")]
    CallDepthExceeded(usize),

    #[error("instruction budget exhausted")]
    OutOfFuel,

    #[error("failed to write trace output: {0}")]
    Output(#[from] io::Error),
}

/// Time source for `System.currentTimeMillis`
pub trait Clock {
    fn now_millis(&mut self) -> i64;
}

/// Wall-clock milliseconds that never go backwards
///
/// Anchored to the system time once, then advanced by a monotonic [`Instant`].
#[derive(Debug, Clone)]
pub struct SystemClock {
    anchor_millis: i64,
    anchor: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        let anchor_millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        Self {
            anchor_millis,
            anchor: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_millis(&mut self) -> i64 {
        self.anchor_millis + self.anchor.elapsed().as_millis() as i64
    }
}

/// Deterministic clock advancing by a fixed step on every read
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: i64,
    step: i64,
}

impl ManualClock {
    pub fn new(start: i64, step: i64) -> Self {
        Self { now: start, step }
    }
}

impl Clock for ManualClock {
    fn now_millis(&mut self) -> i64 {
        let now = self.now;
        self.now += self.step;
        now
    }
}

/// Handle to a heap object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectId(usize);

/// Runtime value in a local slot or on the operand stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Int(i32),
    Long(i64),
    Ref(ObjectId),
    /// Second half of a long, or an unset local
    Top,
}

impl Value {
    fn width(&self) -> u16 {
        match self {
            Value::Long(_) => 2,
            _ => 1,
        }
    }
}

#[derive(Debug, Clone)]
enum Object {
    Str(String),
    Builder(String),
    PrintStream,
    Instance(String),
}

/// Operand stack and locals of one activation
struct Frame {
    stack: Vec<Value>,
    depth: u16,
    max_stack: u16,
    locals: Vec<Value>,
}

impl Frame {
    fn new(max_stack: u16, max_locals: u16) -> Self {
        Self {
            stack: Vec::with_capacity(usize::from(max_stack)),
            depth: 0,
            max_stack,
            locals: vec![Value::Top; usize::from(max_locals)],
        }
    }

    fn max_locals(&self) -> u16 {
        self.locals.len() as u16
    }

    fn push(&mut self, value: Value) -> Result<(), Fault> {
        let width = value.width();
        if self.depth + width > self.max_stack {
            return Err(Fault::StackOverflow {
                max_stack: self.max_stack,
            });
        }
        self.depth += width;
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> Result<Value, Fault> {
        let value = self.stack.pop().ok_or(Fault::StackUnderflow)?;
        self.depth -= value.width();
        Ok(value)
    }

    fn peek(&self) -> Result<&Value, Fault> {
        self.stack.last().ok_or(Fault::StackUnderflow)
    }

    fn pop_int(&mut self) -> Result<i32, Fault> {
        match self.pop()? {
            Value::Int(v) => Ok(v),
            _ => Err(Fault::TypeMismatch("int")),
        }
    }

    fn pop_long(&mut self) -> Result<i64, Fault> {
        match self.pop()? {
            Value::Long(v) => Ok(v),
            _ => Err(Fault::TypeMismatch("long")),
        }
    }

    fn pop_ref(&mut self) -> Result<ObjectId, Fault> {
        match self.pop()? {
            Value::Ref(r) => Ok(r),
            _ => Err(Fault::TypeMismatch("reference")),
        }
    }

    /// Pop a single-slot value
    fn pop_narrow(&mut self) -> Result<Value, Fault> {
        let value = self.pop()?;
        if value.width() != 1 {
            return Err(Fault::TypeMismatch("single-slot value"));
        }
        Ok(value)
    }

    fn check_slot(&self, slot: u16, width: u16) -> Result<usize, Fault> {
        if u32::from(slot) + u32::from(width) > u32::from(self.max_locals()) {
            return Err(Fault::LocalOutOfRange {
                slot,
                max_locals: self.max_locals(),
            });
        }
        Ok(usize::from(slot))
    }

    fn load(&self, slot: u16) -> Result<Value, Fault> {
        let index = self.check_slot(slot, 1)?;
        Ok(self.locals[index].clone())
    }

    fn store(&mut self, slot: u16, value: Value) -> Result<(), Fault> {
        let width = value.width();
        let index = self.check_slot(slot, width)?;
        self.locals[index] = value;
        if width == 2 {
            self.locals[index + 1] = Value::Top;
        }
        Ok(())
    }
}

enum Completion {
    Continue,
    Jump(Label),
    Return(Option<Value>),
}

/// Executes methods of one class
pub struct Interpreter<'a> {
    class: &'a ClassUnit,
    clock: Box<dyn Clock + 'a>,
    out: Box<dyn Write + 'a>,
    heap: Vec<Object>,
    system_out: Option<ObjectId>,
    constants: HashMap<String, ObjectId>,
    fuel_budget: u64,
    fuel: u64,
    max_call_depth: usize,
    call_depth: usize,
}

impl<'a> Interpreter<'a> {
    /// Interpreter writing to stdout with the system clock
    pub fn new(class: &'a ClassUnit) -> Self {
        Self {
            class,
            clock: Box::new(SystemClock::new()),
            out: Box::new(io::stdout()),
            heap: Vec::new(),
            system_out: None,
            constants: HashMap::new(),
            fuel_budget: DEFAULT_FUEL,
            fuel: DEFAULT_FUEL,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            call_depth: 0,
        }
    }

    pub fn with_clock(mut self, clock: impl Clock + 'a) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn with_output(mut self, out: impl Write + 'a) -> Self {
        self.out = Box::new(out);
        self
    }

    pub fn with_fuel(mut self, fuel: u64) -> Self {
        self.fuel_budget = fuel;
        self.fuel = fuel;
        self
    }

    pub fn with_max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth;
        self
    }

    /// Invoke the first method named `name` with the given arguments
    ///
    /// Instance methods receive a fresh receiver object in slot 0. Each call
    /// starts with the full instruction budget.
    pub fn invoke(&mut self, name: &str, args: &[Value]) -> Result<Option<Value>, ExecError> {
        self.fuel = self.fuel_budget;
        self.call_depth = 0;
        let class = self.class;
        let method = class
            .method(name)
            .ok_or_else(|| ExecError::UnknownMethod(name.to_string()))?;

        let mut full_args = Vec::with_capacity(args.len() + 1);
        if !method.header.access.is_static() {
            full_args.push(Value::Ref(self.alloc(Object::Instance(class.name.clone()))));
        }
        full_args.extend_from_slice(args);

        let result = self.execute(method, full_args);
        self.out.flush()?;
        result
    }

    /// Text of a string or string-builder reference
    pub fn string_value(&self, value: &Value) -> Option<&str> {
        match value {
            Value::Ref(ObjectId(index)) => match self.heap.get(*index)? {
                Object::Str(s) | Object::Builder(s) => Some(s),
                _ => None,
            },
            _ => None,
        }
    }

    fn alloc(&mut self, object: Object) -> ObjectId {
        self.heap.push(object);
        ObjectId(self.heap.len() - 1)
    }

    /// Shared string object for an `ldc` constant
    fn constant(&mut self, text: &str) -> ObjectId {
        if let Some(id) = self.constants.get(text) {
            return *id;
        }
        let id = self.alloc(Object::Str(text.to_string()));
        self.constants.insert(text.to_string(), id);
        id
    }

    fn system_out(&mut self) -> ObjectId {
        match self.system_out {
            Some(id) => id,
            None => {
                let id = self.alloc(Object::PrintStream);
                self.system_out = Some(id);
                id
            }
        }
    }

    /// Run `method` with `args` laid out from slot 0 (receiver included)
    fn execute(&mut self, method: &'a MethodUnit, args: Vec<Value>) -> Result<Option<Value>, ExecError> {
        let expected = usize::from(!method.header.access.is_static())
            + method.header.descriptor.as_ref().map_or(0, |d| d.params.len());
        if args.len() != expected {
            return Err(ExecError::ArgumentCount {
                method: method.header.qualified_name(),
                expected,
                actual: args.len(),
            });
        }

        if self.call_depth >= self.max_call_depth {
            return Err(ExecError::CallDepthExceeded(self.max_call_depth));
        }
        self.call_depth += 1;
        let result = self.run(method, args);
        self.call_depth -= 1;
        result
    }

    fn run(&mut self, method: &'a MethodUnit, args: Vec<Value>) -> Result<Option<Value>, ExecError> {
        let fault_at = |pc: usize, fault: Fault| ExecError::Fault {
            method: method.header.qualified_name(),
            pc,
            fault,
        };

        let mut frame = Frame::new(method.max_stack, method.max_locals);
        let mut slot = 0u16;
        for arg in args {
            let width = arg.width();
            frame.store(slot, arg).map_err(|f| fault_at(0, f))?;
            slot += width;
        }

        let labels: HashMap<Label, usize> = method
            .instructions
            .iter()
            .enumerate()
            .filter_map(|(i, insn)| match insn {
                Instruction::Label(label) => Some((*label, i)),
                _ => None,
            })
            .collect();

        let mut pc = 0usize;
        loop {
            let insn = method
                .instructions
                .get(pc)
                .ok_or_else(|| fault_at(pc, Fault::FellOffEnd))?;

            if self.fuel == 0 {
                return Err(ExecError::OutOfFuel);
            }
            self.fuel -= 1;

            match self.step(insn, &mut frame).map_err(|e| match e {
                StepError::Fault(fault) => fault_at(pc, fault),
                StepError::Exec(err) => err,
            })? {
                Completion::Continue => pc += 1,
                Completion::Jump(label) => {
                    pc = *labels
                        .get(&label)
                        .ok_or_else(|| fault_at(pc, Fault::UndefinedLabel(label)))?;
                }
                Completion::Return(value) => return Ok(value),
            }
        }
    }

    fn step(&mut self, insn: &Instruction, frame: &mut Frame) -> Result<Completion, StepError> {
        use Instruction as I;

        match insn {
            I::Label(_) | I::Nop => {}
            I::Iconst(v) => frame.push(Value::Int(*v))?,
            I::Lconst(v) => frame.push(Value::Long(*v))?,
            I::Ldc(s) => {
                let id = self.constant(s);
                frame.push(Value::Ref(id))?;
            }
            I::Iload(slot) => match frame.load(*slot)? {
                v @ Value::Int(_) => frame.push(v)?,
                _ => return Err(Fault::TypeMismatch("int local").into()),
            },
            I::Lload(slot) => {
                frame.check_slot(*slot, 2)?;
                match frame.load(*slot)? {
                    v @ Value::Long(_) => frame.push(v)?,
                    _ => return Err(Fault::TypeMismatch("long local").into()),
                }
            }
            I::Aload(slot) => match frame.load(*slot)? {
                v @ Value::Ref(_) => frame.push(v)?,
                _ => return Err(Fault::TypeMismatch("reference local").into()),
            },
            I::Istore(slot) => {
                let v = frame.pop_int()?;
                frame.store(*slot, Value::Int(v))?;
            }
            I::Lstore(slot) => {
                let v = frame.pop_long()?;
                frame.store(*slot, Value::Long(v))?;
            }
            I::Astore(slot) => {
                let r = frame.pop_ref()?;
                frame.store(*slot, Value::Ref(r))?;
            }
            I::Iinc { slot, delta } => match frame.load(*slot)? {
                Value::Int(v) => frame.store(*slot, Value::Int(v.wrapping_add(i32::from(*delta))))?,
                _ => return Err(Fault::TypeMismatch("int local").into()),
            },
            I::Iadd | I::Isub | I::Imul => {
                let b = frame.pop_int()?;
                let a = frame.pop_int()?;
                let result = match insn {
                    I::Iadd => a.wrapping_add(b),
                    I::Isub => a.wrapping_sub(b),
                    _ => a.wrapping_mul(b),
                };
                frame.push(Value::Int(result))?;
            }
            I::Ladd | I::Lsub | I::Lmul => {
                let b = frame.pop_long()?;
                let a = frame.pop_long()?;
                let result = match insn {
                    I::Ladd => a.wrapping_add(b),
                    I::Lsub => a.wrapping_sub(b),
                    _ => a.wrapping_mul(b),
                };
                frame.push(Value::Long(result))?;
            }
            I::Dup => {
                let v = frame.pop_narrow()?;
                frame.push(v.clone())?;
                frame.push(v)?;
            }
            I::Pop => {
                frame.pop_narrow()?;
            }
            I::Pop2 => {
                if frame.peek()?.width() == 2 {
                    frame.pop()?;
                } else {
                    frame.pop_narrow()?;
                    frame.pop_narrow()?;
                }
            }
            I::Swap => {
                let b = frame.pop_narrow()?;
                let a = frame.pop_narrow()?;
                frame.push(b)?;
                frame.push(a)?;
            }
            I::If { cond, target } => {
                let v = frame.pop_int()?;
                if cond.holds(v, 0) {
                    return Ok(Completion::Jump(*target));
                }
            }
            I::IfIcmp { cond, target } => {
                let b = frame.pop_int()?;
                let a = frame.pop_int()?;
                if cond.holds(a, b) {
                    return Ok(Completion::Jump(*target));
                }
            }
            I::Goto(target) => return Ok(Completion::Jump(*target)),
            I::GetStatic(field) => {
                if field.owner == SYSTEM && field.name == "out" {
                    let id = self.system_out();
                    frame.push(Value::Ref(id))?;
                } else {
                    return Err(Fault::UnsupportedMember(format!("{}.{}", field.owner, field.name)).into());
                }
            }
            I::New(class) => {
                let object = if class == STRING_BUILDER {
                    Object::Builder(String::new())
                } else {
                    Object::Instance(class.clone())
                };
                let id = self.alloc(object);
                frame.push(Value::Ref(id))?;
            }
            I::InvokeSpecial(method) => {
                let args = pop_args(frame, &method.descriptor.params)?;
                frame.pop_ref()?;
                if method.name != "<init>" || !args.is_empty() {
                    return Err(unsupported(method).into());
                }
            }
            I::InvokeVirtual(method) => {
                let args = pop_args(frame, &method.descriptor.params)?;
                let receiver = frame.pop_ref()?;
                if let Some(result) = self.invoke_virtual(method, receiver, &args)? {
                    frame.push(result)?;
                }
            }
            I::InvokeStatic(method) => {
                let args = pop_args(frame, &method.descriptor.params)?;
                if let Some(result) = self.invoke_static(method, args)? {
                    frame.push(result)?;
                }
            }
            I::Return => return Ok(Completion::Return(None)),
            I::Ireturn => return Ok(Completion::Return(Some(Value::Int(frame.pop_int()?)))),
            I::Lreturn => return Ok(Completion::Return(Some(Value::Long(frame.pop_long()?)))),
            I::Areturn => return Ok(Completion::Return(Some(Value::Ref(frame.pop_ref()?)))),
            I::Athrow => {
                frame.pop_ref()?;
                return Err(Fault::Thrown.into());
            }
        }

        Ok(Completion::Continue)
    }

    fn invoke_virtual(
        &mut self,
        method: &MethodRef,
        receiver: ObjectId,
        args: &[Value],
    ) -> Result<Option<Value>, StepError> {
        match (method.owner.as_str(), method.name.as_str()) {
            (PRINT_STREAM, "println") => {
                if !matches!(self.heap.get(receiver.0), Some(Object::PrintStream)) {
                    return Err(Fault::TypeMismatch("PrintStream receiver").into());
                }
                let line = match args {
                    [arg] => self.render(arg)?,
                    [] => String::new(),
                    _ => return Err(unsupported(method).into()),
                };
                writeln!(self.out, "{}", line).map_err(|e| StepError::Exec(e.into()))?;
                Ok(None)
            }
            (STRING_BUILDER, "append") => {
                let [arg] = args else {
                    return Err(unsupported(method).into());
                };
                let text = self.render(arg)?;
                match self.heap.get_mut(receiver.0) {
                    Some(Object::Builder(buf)) => buf.push_str(&text),
                    _ => return Err(Fault::TypeMismatch("StringBuilder receiver").into()),
                }
                Ok(Some(Value::Ref(receiver)))
            }
            (STRING_BUILDER, "toString") => {
                let text = match self.heap.get(receiver.0) {
                    Some(Object::Builder(buf)) => buf.clone(),
                    _ => return Err(Fault::TypeMismatch("StringBuilder receiver").into()),
                };
                Ok(Some(Value::Ref(self.alloc(Object::Str(text)))))
            }
            _ => Err(unsupported(method).into()),
        }
    }

    fn invoke_static(&mut self, method: &MethodRef, args: Vec<Value>) -> Result<Option<Value>, StepError> {
        if method.owner == SYSTEM && method.name == "currentTimeMillis" {
            return Ok(Some(Value::Long(self.clock.now_millis())));
        }

        let class = self.class;
        if method.owner == class.name {
            let callee = class
                .methods
                .iter()
                .find(|m| {
                    m.header.name == method.name
                        && m.header.access.is_static()
                        && m.header.descriptor.as_ref() == Some(&method.descriptor)
                })
                .ok_or_else(|| unsupported(method))?;
            return self.execute(callee, args).map_err(StepError::Exec);
        }

        Err(unsupported(method).into())
    }

    fn render(&self, value: &Value) -> Result<String, Fault> {
        match value {
            Value::Int(v) => Ok(v.to_string()),
            Value::Long(v) => Ok(v.to_string()),
            Value::Ref(id) => match self.heap.get(id.0) {
                Some(Object::Str(s)) | Some(Object::Builder(s)) => Ok(s.clone()),
                Some(Object::Instance(class)) => Ok(format!("{}@{:x}", class.replace('/', "."), id.0)),
                _ => Err(Fault::TypeMismatch("printable value")),
            },
            Value::Top => Err(Fault::TypeMismatch("initialized value")),
        }
    }
}

enum StepError {
    Fault(Fault),
    Exec(ExecError),
}

impl From<Fault> for StepError {
    fn from(fault: Fault) -> Self {
        StepError::Fault(fault)
    }
}

fn unsupported(method: &MethodRef) -> Fault {
    Fault::UnsupportedMember(format!("{}.{}{}", method.owner, method.name, method.descriptor))
}

/// Pop call arguments, returning them in declaration order
fn pop_args(frame: &mut Frame, params: &[FieldType]) -> Result<Vec<Value>, Fault> {
    let mut args = Vec::with_capacity(params.len());
    for param in params.iter().rev() {
        let value = match param {
            FieldType::Boolean | FieldType::Byte | FieldType::Char | FieldType::Short | FieldType::Int => {
                Value::Int(frame.pop_int()?)
            }
            FieldType::Long => Value::Long(frame.pop_long()?),
            FieldType::Object(_) | FieldType::Array(_) => Value::Ref(frame.pop_ref()?),
            FieldType::Float | FieldType::Double => {
                return Err(Fault::TypeMismatch("integral or reference argument"))
            }
        };
        args.push(value);
    }
    args.reverse();
    Ok(args)
}

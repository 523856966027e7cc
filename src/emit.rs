//! Instruction sequence emission
//!
//! [`SequenceBuilder`] is a small instruction adapter: typed helpers for the
//! handful of instructions the weaver injects, with operand-stack depth
//! tracked as instructions are appended. The peak depth of a sequence is what
//! the frame planner adds to a method's `max_stack`.
//!
//! The two injected templates live here too:
//! - entry: print `-> <name> start`, then store `currentTimeMillis()`
//! - exit: compute the elapsed time, store it, and print
//!   `<- <name> end cost <elapsed> ms` via a `StringBuilder`

use crate::bytecode::{FieldRef, Instruction, MethodRef};
use crate::descriptor::{FieldType, MethodDescriptor, ReturnType};

pub const SYSTEM: &str = "java/lang/System";
pub const PRINT_STREAM: &str = "java/io/PrintStream";
pub const STRING: &str = "java/lang/String";
pub const STRING_BUILDER: &str = "java/lang/StringBuilder";

/// `System.out`
pub fn system_out() -> FieldRef {
    FieldRef::new(SYSTEM, "out", FieldType::object(PRINT_STREAM))
}

/// `PrintStream.println(String)`
pub fn println() -> MethodRef {
    MethodRef::new(
        PRINT_STREAM,
        "println",
        MethodDescriptor::new(vec![FieldType::object(STRING)], ReturnType::Void),
    )
}

/// `System.currentTimeMillis()`
pub fn current_time_millis() -> MethodRef {
    MethodRef::new(
        SYSTEM,
        "currentTimeMillis",
        MethodDescriptor::new(vec![], ReturnType::Value(FieldType::Long)),
    )
}

/// `StringBuilder.<init>()`
pub fn string_builder_init() -> MethodRef {
    MethodRef::new(
        STRING_BUILDER,
        "<init>",
        MethodDescriptor::new(vec![], ReturnType::Void),
    )
}

/// `StringBuilder.append(<arg>)`
pub fn string_builder_append(arg: FieldType) -> MethodRef {
    MethodRef::new(
        STRING_BUILDER,
        "append",
        MethodDescriptor::new(
            vec![arg],
            ReturnType::Value(FieldType::object(STRING_BUILDER)),
        ),
    )
}

/// `StringBuilder.toString()`
pub fn string_builder_to_string() -> MethodRef {
    MethodRef::new(
        STRING_BUILDER,
        "toString",
        MethodDescriptor::new(vec![], ReturnType::Value(FieldType::object(STRING))),
    )
}

/// Entry trace line
pub fn entry_line(name: &str) -> String {
    format!("-> {} start", name)
}

/// Exit trace line prefix; the elapsed milliseconds and `" ms"` follow
pub fn exit_line_prefix(name: &str) -> String {
    format!("<- {} end cost ", name)
}

pub const EXIT_LINE_SUFFIX: &str = " ms";

/// Builds an instruction sequence while tracking its stack depth
#[derive(Debug, Default, Clone)]
pub struct SequenceBuilder {
    instructions: Vec<Instruction>,
    depth: u16,
    peak: u16,
}

impl SequenceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append any instruction
    ///
    /// Depth is relative to the stack at the start of the sequence; pops
    /// below that baseline saturate at zero.
    pub fn emit(&mut self, insn: Instruction) -> &mut Self {
        let effect = insn.stack_effect();
        self.depth = self.depth.saturating_sub(effect.pops) + effect.pushes;
        self.peak = self.peak.max(self.depth);
        self.instructions.push(insn);
        self
    }

    pub fn getstatic(&mut self, field: FieldRef) -> &mut Self {
        self.emit(Instruction::GetStatic(field))
    }

    pub fn ldc(&mut self, value: impl Into<String>) -> &mut Self {
        self.emit(Instruction::Ldc(value.into()))
    }

    pub fn anew(&mut self, class: &str) -> &mut Self {
        self.emit(Instruction::New(class.to_string()))
    }

    pub fn dup(&mut self) -> &mut Self {
        self.emit(Instruction::Dup)
    }

    pub fn invokestatic(&mut self, method: MethodRef) -> &mut Self {
        self.emit(Instruction::InvokeStatic(method))
    }

    pub fn invokevirtual(&mut self, method: MethodRef) -> &mut Self {
        self.emit(Instruction::InvokeVirtual(method))
    }

    pub fn invokespecial(&mut self, method: MethodRef) -> &mut Self {
        self.emit(Instruction::InvokeSpecial(method))
    }

    pub fn load_long(&mut self, slot: u16) -> &mut Self {
        self.emit(Instruction::Lload(slot))
    }

    pub fn store_long(&mut self, slot: u16) -> &mut Self {
        self.emit(Instruction::Lstore(slot))
    }

    pub fn sub_long(&mut self) -> &mut Self {
        self.emit(Instruction::Lsub)
    }

    /// Highest stack depth reached, relative to the starting depth
    pub fn peak_depth(&self) -> u16 {
        self.peak
    }

    /// Depth left on the stack by the sequence
    pub fn net_depth(&self) -> u16 {
        self.depth
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn finish(self) -> Vec<Instruction> {
        self.instructions
    }
}

/// Sequence printing the entry line and capturing the start timestamp
pub fn entry_sequence(name: &str, start_slot: u16) -> SequenceBuilder {
    let mut seq = SequenceBuilder::new();
    seq.getstatic(system_out())
        .ldc(entry_line(name))
        .invokevirtual(println())
        .invokestatic(current_time_millis())
        .store_long(start_slot);
    seq
}

/// Sequence computing the elapsed time and printing the exit line
pub fn exit_sequence(name: &str, start_slot: u16, end_slot: u16) -> SequenceBuilder {
    let mut seq = SequenceBuilder::new();
    seq.invokestatic(current_time_millis())
        .load_long(start_slot)
        .sub_long()
        .store_long(end_slot);

    seq.getstatic(system_out())
        .anew(STRING_BUILDER)
        .dup()
        .invokespecial(string_builder_init())
        .ldc(exit_line_prefix(name))
        .invokevirtual(string_builder_append(FieldType::object(STRING)))
        .load_long(end_slot)
        .invokevirtual(string_builder_append(FieldType::Long))
        .ldc(EXIT_LINE_SUFFIX)
        .invokevirtual(string_builder_append(FieldType::object(STRING)))
        .invokevirtual(string_builder_to_string())
        .invokevirtual(println());
    seq
}

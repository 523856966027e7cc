//! Structural verification of method bodies
//!
//! Computes the operand-stack depth at every reachable instruction by
//! propagating depths along the control-flow graph. For a method to verify:
//! - no instruction pops more than the stack holds
//! - the depth never exceeds `max_stack`
//! - every merge point is reached with a single depth
//! - every local access stays below `max_locals`
//! - parameters fit inside `max_locals`
//! - control never runs off the end of the body
//!
//! Woven output must verify whenever the input did; the property tests lean
//! on this to show the frame planner never under-allocates.

use crate::cfg::{CfgError, ControlFlowGraph};
use crate::method::MethodUnit;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VerifyError {
    #[error(transparent)]
    ControlFlow(#[from] CfgError),

    #[error("instruction {index} pops {needed} slots from a stack of depth {depth}")]
    StackUnderflow {
        index: usize,
        needed: u16,
        depth: u16,
    },

    #[error("instruction {index} raises stack depth to {depth}, above max_stack {max_stack}")]
    StackOverflow {
        index: usize,
        depth: u16,
        max_stack: u16,
    },

    #[error("instruction {index} reached with stack depths {first} and {second}")]
    InconsistentDepth {
        index: usize,
        first: u16,
        second: u16,
    },

    #[error("instruction {index} accesses local slot {slot}, max_locals is {max_locals}")]
    LocalOutOfRange {
        index: usize,
        slot: u16,
        max_locals: u16,
    },

    #[error("parameters need {needed} local slots, max_locals is {max_locals}")]
    ParametersExceedLocals { needed: u16, max_locals: u16 },

    #[error("control falls off the end of the method body")]
    FallsOffEnd,
}

/// Facts established by a successful verification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameUsage {
    /// Highest stack depth reached on any path
    pub max_depth: u16,
    /// One past the highest local slot accessed
    pub locals_used: u16,
    /// Reachable instruction count
    pub reachable: usize,
}

/// Verify `method` against its declared frame limits
pub fn verify(method: &MethodUnit) -> Result<FrameUsage, VerifyError> {
    let insns = &method.instructions;
    let args = method.header.argument_slots();
    if args > method.max_locals {
        return Err(VerifyError::ParametersExceedLocals {
            needed: args,
            max_locals: method.max_locals,
        });
    }

    let cfg = ControlFlowGraph::build(insns)?;
    if cfg.falls_off_end(insns) {
        return Err(VerifyError::FallsOffEnd);
    }

    let mut usage = FrameUsage {
        locals_used: args,
        ..FrameUsage::default()
    };
    if cfg.blocks().is_empty() {
        return Ok(usage);
    }

    let mut entry_depth: Vec<Option<u16>> = vec![None; cfg.blocks().len()];
    entry_depth[0] = Some(0);
    let mut worklist = vec![0usize];

    while let Some(id) = worklist.pop() {
        let block = &cfg.blocks()[id];
        let mut depth = entry_depth[id].unwrap_or(0);

        for (index, insn) in insns.iter().enumerate().take(block.end).skip(block.start) {
            let effect = insn.stack_effect();
            if depth < effect.pops {
                return Err(VerifyError::StackUnderflow {
                    index,
                    needed: effect.pops,
                    depth,
                });
            }
            depth = depth - effect.pops + effect.pushes;
            if depth > method.max_stack {
                return Err(VerifyError::StackOverflow {
                    index,
                    depth,
                    max_stack: method.max_stack,
                });
            }
            usage.max_depth = usage.max_depth.max(depth);
            usage.reachable += 1;

            if let Some(access) = insn.local_access() {
                if access.end() > u32::from(method.max_locals) {
                    return Err(VerifyError::LocalOutOfRange {
                        index,
                        slot: access.slot,
                        max_locals: method.max_locals,
                    });
                }
                // end() <= max_locals, so it fits in u16
                usage.locals_used = usage.locals_used.max(access.end() as u16);
            }
        }

        for &succ in &block.successors {
            match entry_depth[succ] {
                None => {
                    entry_depth[succ] = Some(depth);
                    worklist.push(succ);
                }
                Some(existing) if existing != depth => {
                    return Err(VerifyError::InconsistentDepth {
                        index: cfg.blocks()[succ].start,
                        first: existing,
                        second: depth,
                    });
                }
                Some(_) => {}
            }
        }
    }

    Ok(usage)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{Condition, Instruction, Label};
    use crate::method::{AccessFlags, MethodHeader};

    fn static_method(descriptor: &str, body: Vec<Instruction>, max_stack: u16, max_locals: u16) -> MethodUnit {
        let mut header = MethodHeader::new("m", Some(descriptor.parse().unwrap()));
        header.access = AccessFlags::STATIC;
        MethodUnit::new(header, body, max_stack, max_locals)
    }

    #[test]
    fn test_verifies_simple_body() {
        let method = static_method(
            "(I)I",
            vec![
                Instruction::Iload(0),
                Instruction::Iconst(2),
                Instruction::Imul,
                Instruction::Ireturn,
            ],
            2,
            1,
        );
        let usage = verify(&method).unwrap();
        assert_eq!(usage.max_depth, 2);
        assert_eq!(usage.locals_used, 1);
        assert_eq!(usage.reachable, 4);
    }

    #[test]
    fn test_detects_stack_overflow() {
        let method = static_method(
            "()I",
            vec![Instruction::Iconst(1), Instruction::Iconst(2), Instruction::Iadd, Instruction::Ireturn],
            1,
            0,
        );
        assert!(matches!(
            verify(&method),
            Err(VerifyError::StackOverflow { index: 1, depth: 2, max_stack: 1 })
        ));
    }

    #[test]
    fn test_detects_underflow() {
        let method = static_method("()V", vec![Instruction::Pop, Instruction::Return], 1, 0);
        assert!(matches!(verify(&method), Err(VerifyError::StackUnderflow { index: 0, .. })));
    }

    #[test]
    fn test_detects_local_out_of_range() {
        let method = static_method(
            "()V",
            vec![Instruction::Lconst(1), Instruction::Lstore(0), Instruction::Return],
            2,
            1,
        );
        assert!(matches!(
            verify(&method),
            Err(VerifyError::LocalOutOfRange { index: 1, slot: 0, max_locals: 1 })
        ));
    }

    #[test]
    fn test_detects_inconsistent_merge() {
        let method = static_method(
            "(I)V",
            vec![
                Instruction::Iload(0),
                Instruction::If { cond: Condition::Eq, target: Label(0) },
                Instruction::Iconst(1),
                Instruction::Label(Label(0)),
                Instruction::Return,
            ],
            1,
            1,
        );
        assert!(matches!(verify(&method), Err(VerifyError::InconsistentDepth { .. })));
    }

    #[test]
    fn test_detects_fall_off_end() {
        let method = static_method("()V", vec![Instruction::Nop], 0, 0);
        assert_eq!(verify(&method), Err(VerifyError::FallsOffEnd));
    }

    #[test]
    fn test_instance_receiver_needs_a_slot() {
        let header = MethodHeader::new("m", Some("(J)V".parse().unwrap()));
        let method = MethodUnit::new(header, vec![Instruction::Return], 0, 2);
        assert_eq!(
            verify(&method),
            Err(VerifyError::ParametersExceedLocals { needed: 3, max_locals: 2 })
        );
    }

    #[test]
    fn test_unreachable_code_is_not_checked() {
        let method = static_method(
            "()V",
            vec![Instruction::Return, Instruction::Pop, Instruction::Return],
            0,
            0,
        );
        let usage = verify(&method).unwrap();
        assert_eq!(usage.reachable, 1);
    }
}

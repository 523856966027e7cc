//! Lightweight control-flow graph over a method body
//!
//! Basic blocks start at the method entry, at every label, and after every
//! branch or exit instruction. The graph is used to enumerate exit sites for
//! the exit weaver and to drive the stack-depth dataflow in the verifier.

use crate::bytecode::{Instruction, Label};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CfgError {
    #[error("label {0} is defined more than once")]
    DuplicateLabel(Label),

    #[error("instruction {index} jumps to undefined label {label}")]
    UndefinedLabel { index: usize, label: Label },
}

/// A maximal straight-line run of instructions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicBlock {
    /// Index of the first instruction
    pub start: usize,
    /// One past the last instruction
    pub end: usize,
    /// Successor block ids
    pub successors: Vec<usize>,
}

impl BasicBlock {
    /// Index of the last instruction
    pub fn terminator(&self) -> usize {
        self.end - 1
    }
}

#[derive(Debug, Clone)]
pub struct ControlFlowGraph {
    blocks: Vec<BasicBlock>,
    labels: HashMap<Label, usize>,
}

impl ControlFlowGraph {
    pub fn build(instructions: &[Instruction]) -> Result<Self, CfgError> {
        let mut labels = HashMap::new();
        for (index, insn) in instructions.iter().enumerate() {
            if let Instruction::Label(label) = insn {
                if labels.insert(*label, index).is_some() {
                    return Err(CfgError::DuplicateLabel(*label));
                }
            }
        }

        let mut is_leader = vec![false; instructions.len()];
        for (index, insn) in instructions.iter().enumerate() {
            if index == 0 || matches!(insn, Instruction::Label(_)) {
                is_leader[index] = true;
            }
            if let Some(label) = insn.branch_target() {
                if !labels.contains_key(&label) {
                    return Err(CfgError::UndefinedLabel { index, label });
                }
            }
            if (insn.ends_block() || insn.is_conditional_branch()) && index + 1 < instructions.len() {
                is_leader[index + 1] = true;
            }
        }

        let starts: Vec<usize> = (0..instructions.len()).filter(|&i| is_leader[i]).collect();
        let mut block_of_insn = vec![0usize; instructions.len()];
        let mut blocks = Vec::with_capacity(starts.len());
        for (id, &start) in starts.iter().enumerate() {
            let end = starts.get(id + 1).copied().unwrap_or(instructions.len());
            for slot in &mut block_of_insn[start..end] {
                *slot = id;
            }
            blocks.push(BasicBlock {
                start,
                end,
                successors: Vec::new(),
            });
        }

        let block_count = blocks.len();
        for (id, block) in blocks.iter_mut().enumerate() {
            let last = &instructions[block.terminator()];
            if let Some(label) = last.branch_target() {
                block.successors.push(block_of_insn[labels[&label]]);
            }
            let falls_through = !last.ends_block();
            if falls_through && id + 1 < block_count && !block.successors.contains(&(id + 1)) {
                block.successors.push(id + 1);
            }
        }

        Ok(Self { blocks, labels })
    }

    pub fn blocks(&self) -> &[BasicBlock] {
        &self.blocks
    }

    /// Instruction index of a label definition
    pub fn label_position(&self, label: Label) -> Option<usize> {
        self.labels.get(&label).copied()
    }

    /// Blocks whose terminator is a return-family instruction
    pub fn exit_blocks<'a>(
        &'a self,
        instructions: &'a [Instruction],
    ) -> impl Iterator<Item = &'a BasicBlock> + 'a {
        self.blocks
            .iter()
            .filter(move |b| instructions[b.terminator()].is_return())
    }

    /// Instruction indices of every return-family instruction, ascending
    pub fn exit_sites(&self, instructions: &[Instruction]) -> Vec<usize> {
        self.exit_blocks(instructions)
            .map(BasicBlock::terminator)
            .collect()
    }

    /// Whether control can run past the last instruction
    pub fn falls_off_end(&self, instructions: &[Instruction]) -> bool {
        match self.blocks.last() {
            Some(block) => !instructions[block.terminator()].ends_block(),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::Condition;

    fn compute_body() -> Vec<Instruction> {
        vec![
            Instruction::Iload(0),
            Instruction::If { cond: Condition::Ge, target: Label(1) },
            Instruction::Iconst(0),
            Instruction::Ireturn,
            Instruction::Label(Label(1)),
            Instruction::Iload(0),
            Instruction::Iconst(2),
            Instruction::Imul,
            Instruction::Ireturn,
        ]
    }

    #[test]
    fn test_blocks_split_at_branches_and_labels() {
        let body = compute_body();
        let cfg = ControlFlowGraph::build(&body).unwrap();
        let blocks = cfg.blocks();

        assert_eq!(blocks.len(), 3);
        assert_eq!((blocks[0].start, blocks[0].end), (0, 2));
        assert_eq!((blocks[1].start, blocks[1].end), (2, 4));
        assert_eq!((blocks[2].start, blocks[2].end), (4, 9));
        assert_eq!(blocks[0].successors, vec![2, 1]);
        assert!(blocks[1].successors.is_empty());
        assert!(blocks[2].successors.is_empty());
    }

    #[test]
    fn test_exit_sites() {
        let body = compute_body();
        let cfg = ControlFlowGraph::build(&body).unwrap();
        assert_eq!(cfg.exit_sites(&body), vec![3, 8]);
        assert!(!cfg.falls_off_end(&body));
    }

    #[test]
    fn test_athrow_is_not_an_exit_site() {
        let body = vec![
            Instruction::Iload(0),
            Instruction::If { cond: Condition::Eq, target: Label(0) },
            Instruction::Aload(1),
            Instruction::Athrow,
            Instruction::Label(Label(0)),
            Instruction::Return,
        ];
        let cfg = ControlFlowGraph::build(&body).unwrap();
        assert_eq!(cfg.exit_sites(&body), vec![5]);
    }

    #[test]
    fn test_unreachable_returns_still_counted() {
        let body = vec![
            Instruction::Return,
            Instruction::Return,
        ];
        let cfg = ControlFlowGraph::build(&body).unwrap();
        assert_eq!(cfg.exit_sites(&body), vec![0, 1]);
    }

    #[test]
    fn test_loop_back_edge() {
        let body = vec![
            Instruction::Label(Label(0)),
            Instruction::Iinc { slot: 0, delta: -1 },
            Instruction::Iload(0),
            Instruction::If { cond: Condition::Gt, target: Label(0) },
            Instruction::Return,
        ];
        let cfg = ControlFlowGraph::build(&body).unwrap();
        assert_eq!(cfg.blocks().len(), 2);
        assert_eq!(cfg.blocks()[0].successors, vec![0, 1]);
        assert_eq!(cfg.label_position(Label(0)), Some(0));
    }

    #[test]
    fn test_undefined_and_duplicate_labels() {
        let undefined = vec![Instruction::Goto(Label(7))];
        assert_eq!(
            ControlFlowGraph::build(&undefined).unwrap_err(),
            CfgError::UndefinedLabel { index: 0, label: Label(7) }
        );

        let duplicate = vec![
            Instruction::Label(Label(1)),
            Instruction::Label(Label(1)),
            Instruction::Return,
        ];
        assert_eq!(
            ControlFlowGraph::build(&duplicate).unwrap_err(),
            CfgError::DuplicateLabel(Label(1))
        );
    }

    #[test]
    fn test_falls_off_end() {
        let body = vec![Instruction::Iconst(1), Instruction::Pop];
        let cfg = ControlFlowGraph::build(&body).unwrap();
        assert!(cfg.falls_off_end(&body));
        assert!(cfg.exit_sites(&body).is_empty());
    }

    #[test]
    fn test_empty_body() {
        let cfg = ControlFlowGraph::build(&[]).unwrap();
        assert!(cfg.blocks().is_empty());
        assert!(!cfg.falls_off_end(&[]));
    }
}

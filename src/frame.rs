//! Frame planning for woven methods
//!
//! Allocates two fresh local slots for the start and end timestamps and
//! computes the new frame limits. Slots are taken from the method's own
//! `max_locals`, so they can never alias a parameter or an existing local.

use crate::emit;
use crate::method::MethodUnit;
use thiserror::Error;

/// Local slots taken by one 64-bit timestamp
pub const TIMESTAMP_SLOTS: u16 = 2;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("max_locals {max_locals} leaves no room for timestamp slots")]
    LocalsExhausted { max_locals: u16 },

    #[error("max_stack {max_stack} leaves no room for {extra} injected stack slots")]
    StackExhausted { max_stack: u16, extra: u16 },
}

/// Fresh slots and updated limits for one target method
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotPlan {
    pub start_slot: u16,
    pub end_slot: u16,
    pub extra_stack_depth: u16,
    pub new_max_locals: u16,
    pub new_max_stack: u16,
}

/// Peak operand-stack growth of the injected sequences
///
/// Derived from the templates themselves; the exit sequence dominates.
pub fn injected_stack_depth() -> u16 {
    let entry = emit::entry_sequence("", 0).peak_depth();
    let exit = emit::exit_sequence("", 0, TIMESTAMP_SLOTS).peak_depth();
    entry.max(exit)
}

/// Plan the frame of `method`
pub fn plan(method: &MethodUnit) -> Result<SlotPlan, FrameError> {
    plan_frame(method.max_stack, method.max_locals)
}

/// Plan a frame from raw limits
pub fn plan_frame(max_stack: u16, max_locals: u16) -> Result<SlotPlan, FrameError> {
    let start_slot = max_locals;
    let end_slot = start_slot
        .checked_add(TIMESTAMP_SLOTS)
        .ok_or(FrameError::LocalsExhausted { max_locals })?;
    let new_max_locals = end_slot
        .checked_add(TIMESTAMP_SLOTS)
        .ok_or(FrameError::LocalsExhausted { max_locals })?
        .max(max_locals);

    let extra = injected_stack_depth();
    let new_max_stack = max_stack
        .checked_add(extra)
        .ok_or(FrameError::StackExhausted { max_stack, extra })?;

    Ok(SlotPlan {
        start_slot,
        end_slot,
        extra_stack_depth: extra,
        new_max_locals,
        new_max_stack,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slots_follow_max_locals() {
        let plan = plan_frame(2, 1).unwrap();
        assert_eq!(plan.start_slot, 1);
        assert_eq!(plan.end_slot, 3);
        assert_eq!(plan.new_max_locals, 5);
    }

    #[test]
    fn test_many_locals_never_collide() {
        // A fixed slot 10 would overwrite local 10 here
        let plan = plan_frame(4, 24).unwrap();
        assert_eq!(plan.start_slot, 24);
        assert_eq!(plan.end_slot, 26);
        assert_eq!(plan.new_max_locals, 28);
    }

    #[test]
    fn test_empty_frame() {
        let plan = plan_frame(0, 0).unwrap();
        assert_eq!(plan.start_slot, 0);
        assert_eq!(plan.end_slot, 2);
        assert_eq!(plan.new_max_locals, 4);
        assert_eq!(plan.new_max_stack, plan.extra_stack_depth);
    }

    #[test]
    fn test_extra_stack_depth_is_exit_peak() {
        assert_eq!(injected_stack_depth(), 4);
        let plan = plan_frame(3, 0).unwrap();
        assert_eq!(plan.extra_stack_depth, 4);
        assert_eq!(plan.new_max_stack, 7);
    }

    #[test]
    fn test_limits_exhausted() {
        assert_eq!(
            plan_frame(0, u16::MAX - 1),
            Err(FrameError::LocalsExhausted { max_locals: u16::MAX - 1 })
        );
        assert!(matches!(
            plan_frame(u16::MAX, 0),
            Err(FrameError::StackExhausted { .. })
        ));
    }
}

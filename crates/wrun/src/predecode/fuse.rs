//! Peephole fusion pass: collapses short, common instruction idioms
//! into the superinstructions of [`wrun_ir::opcode::fused`] (§4.2
//! "Peephole fusion").
//!
//! Fusion never changes the stream's length or any branch target: the
//! instructions a fused opcode consumes are left in place (stale but
//! unreachable, since the dispatch loop advances the program counter
//! by [`fused::consumed_count`]); only the window's first slot is
//! overwritten.

use std::collections::HashSet;

use wrun_ir::opcode::{fused, op, slot};
use wrun_ir::PreInstr;

/// Runs the fusion pass over one function's predecoded stream.
pub fn fuse(mut instrs: Vec<PreInstr>) -> Vec<PreInstr> {
    let targets = branch_targets(&instrs);

    let mut i = 0;
    while i < instrs.len() {
        if i + 3 <= instrs.len() && !window_has_target(&targets, i, 3) {
            if let Some(fused_op) = match_three(&instrs[i], &instrs[i + 1], &instrs[i + 2]) {
                instrs[i] = fused_op;
                i += 3;
                continue;
            }
        }
        if i + 2 <= instrs.len() && !window_has_target(&targets, i, 2) {
            if let Some(fused_op) = match_two(&instrs[i], &instrs[i + 1]) {
                instrs[i] = fused_op;
                i += 2;
                continue;
            }
        }
        i += 1;
    }
    instrs
}

/// Indices any instruction's resolved operand points at, across every
/// opcode shape that carries a branch target.
fn branch_targets(instrs: &[PreInstr]) -> HashSet<usize> {
    let mut targets = HashSet::new();
    for instr in instrs {
        match instr.opcode {
            op::BR | op::BR_IF | op::IF | slot::IF_DATA | slot::BR_TABLE_ENTRY => {
                targets.insert(instr.operand as usize);
            }
            _ => {}
        }
    }
    targets
}

/// True if any index in `[start + 1, start + len)` — i.e. every slot
/// the fused instruction would consume other than the window's first
/// — is a branch target the pass must not swallow.
fn window_has_target(targets: &HashSet<usize>, start: usize, len: usize) -> bool {
    (start + 1..start + len).any(|idx| targets.contains(&idx))
}

fn match_two(a: &PreInstr, b: &PreInstr) -> Option<PreInstr> {
    if a.opcode == op::LOCAL_GET && b.opcode == op::LOCAL_GET {
        return Some(PreInstr::new(fused::LOCALS_GET_GET, a.operand as u16, b.operand));
    }
    if a.opcode == op::LOCAL_GET && b.opcode == op::I32_CONST {
        return Some(PreInstr::new(fused::LOCAL_GET_CONST, a.operand as u16, b.operand));
    }
    None
}

fn match_three(a: &PreInstr, b: &PreInstr, c: &PreInstr) -> Option<PreInstr> {
    if a.opcode == op::LOCAL_GET && b.opcode == op::LOCAL_GET {
        let fused_op = match c.opcode {
            op::I32_ADD => fused::LOCALS_ADD,
            op::I32_SUB => fused::LOCALS_SUB,
            op::I32_GT_S => fused::LOCALS_GT_S,
            op::I32_LE_S => fused::LOCALS_LE_S,
            _ => return None,
        };
        return Some(PreInstr::new(fused_op, a.operand as u16, b.operand));
    }
    if a.opcode == op::LOCAL_GET && b.opcode == op::I32_CONST {
        let fused_op = match c.opcode {
            op::I32_ADD => fused::LOCAL_CONST_ADD,
            op::I32_SUB => fused::LOCAL_CONST_SUB,
            op::I32_LT_S => fused::LOCAL_CONST_LT_S,
            op::I32_GE_S => fused::LOCAL_CONST_GE_S,
            op::I32_LT_U => fused::LOCAL_CONST_LT_U,
            _ => return None,
        };
        return Some(PreInstr::new(fused_op, a.operand as u16, b.operand));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fuses_locals_add_and_keeps_length() {
        let instrs = vec![
            PreInstr::new(op::LOCAL_GET, 0, 0),
            PreInstr::new(op::LOCAL_GET, 0, 1),
            PreInstr::new(op::I32_ADD, 0, 0),
        ];
        let fused_instrs = fuse(instrs);
        assert_eq!(fused_instrs.len(), 3);
        assert_eq!(fused_instrs[0].opcode, fused::LOCALS_ADD);
        assert_eq!(fused_instrs[0].extra, 0);
        assert_eq!(fused_instrs[0].operand, 1);
    }

    #[test]
    fn does_not_fuse_across_a_branch_target() {
        let instrs = vec![
            PreInstr::new(op::LOCAL_GET, 0, 0),
            PreInstr::new(op::LOCAL_GET, 0, 1),
            PreInstr::new(op::I32_ADD, 0, 0),
            PreInstr::new(op::BR, 0, 1), // targets index 1, inside the window above
        ];
        let fused_instrs = fuse(instrs);
        assert_eq!(fused_instrs[0].opcode, op::LOCAL_GET);
    }
}

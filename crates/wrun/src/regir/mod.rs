//! Lowers a predecoded function to three-operand register IR by
//! simulating the Wasm operand stack at compile time (§4.3).

use wrun_ir::opcode::{fused, op};
use wrun_ir::{regop, PreInstr, RegFunc, RegInstr};

/// A free-list register allocator: virtual registers `0..num_locals`
/// are permanently reserved for parameters/locals; everything above
/// that is handed out from a simple stack-based free list as operand
/// values are produced and consumed.
struct Allocator {
    next_free: u32,
    free_list: Vec<u32>,
    high_water: u32,
}

impl Allocator {
    fn new(num_locals: u32) -> Self {
        Self {
            next_free: num_locals,
            free_list: Vec::new(),
            high_water: num_locals,
        }
    }

    fn alloc(&mut self) -> u32 {
        let reg = self.free_list.pop().unwrap_or_else(|| {
            let r = self.next_free;
            self.next_free += 1;
            r
        });
        self.high_water = self.high_water.max(reg + 1);
        reg
    }

    fn free(&mut self, reg: u32) {
        self.free_list.push(reg);
    }
}

/// Lowers one function's predecoded instruction stream and constant
/// pool into register IR.
///
/// This covers the straight-line and locally-branching subset of the
/// predecoded stream that Tier-2/Tier-3 accelerate; any opcode outside
/// that subset (bulk-memory misc ops, `call_indirect`, reference
/// types) causes lowering to bail out for that function, leaving it
/// pinned to Tier-1 (mirrors the predecoder's own SIMD fallback, §4.2
/// step 7).
pub fn lower(pre_instrs: &[PreInstr], consts: &[u64], num_locals: u32) -> Option<RegFunc> {
    let mut alloc = Allocator::new(num_locals);
    let mut stack: Vec<u8> = Vec::new();
    let mut out = RegFunc {
        instrs: Vec::new(),
        consts: Vec::new(),
        num_registers: num_locals,
        num_params_and_locals: num_locals,
    };
    // Maps predecoded-stream indices to regir-stream indices, so
    // branch targets (already absolute) can be re-resolved after
    // lowering reshapes the instruction count.
    let mut pc_map = vec![0u32; pre_instrs.len() + 1];

    let mut i = 0usize;
    while i < pre_instrs.len() {
        pc_map[i] = out.instrs.len() as u32;
        let instr = pre_instrs[i];
        let consumed = lower_one(instr, &mut alloc, &mut stack, &mut out, consts)?;
        i += consumed;
    }
    pc_map[pre_instrs.len()] = out.instrs.len() as u32;

    // Implicit return (the predecoded stream fell off the end rather
    // than hitting an explicit `return`): whatever is left on the
    // simulated stack is the function's result.
    if out.instrs.last().map(|i| i.op) != Some(regop::RETURN) {
        let rd = stack.last().copied().unwrap_or(0);
        out.instrs.push(RegInstr::new(regop::RETURN, rd, 0, 0));
    }

    for instr in &mut out.instrs {
        if is_branch_op(instr.op) {
            let target = instr.rs2_or_imm as usize;
            if target >= pc_map.len() {
                return None;
            }
            instr.rs2_or_imm = pc_map[target];
        }
    }

    out.num_registers = alloc.high_water.max(num_locals);
    Some(out)
}

fn is_branch_op(op: u16) -> bool {
    matches!(op, regop::BR | regop::BR_IF | regop::BR_IF_LT_S)
}

fn reg_const(out: &mut RegFunc, bits: u64) -> u32 {
    if let Some(pos) = out.consts.iter().position(|&c| c == bits) {
        pos as u32
    } else {
        out.consts.push(bits);
        (out.consts.len() - 1) as u32
    }
}

/// Lowers a single predecoded instruction, pushing/popping virtual
/// registers on `stack` to mirror the Wasm operand stack. Returns the
/// number of predecoded slots consumed (1, except fused
/// superinstructions), or `None` if this opcode has no register-IR
/// equivalent.
fn lower_one(
    instr: PreInstr,
    alloc: &mut Allocator,
    stack: &mut Vec<u8>,
    out: &mut RegFunc,
    consts: &[u64],
) -> Option<usize> {
    macro_rules! pop {
        () => {{
            let r = stack.pop()? as u32;
            alloc.free(r);
            r
        }};
    }
    macro_rules! push_new {
        () => {{
            let r = alloc.alloc();
            stack.push(r as u8);
            r
        }};
    }
    macro_rules! binop {
        ($regop:expr) => {{
            let b = pop!();
            let a = pop!();
            let d = push_new!();
            out.instrs.push(RegInstr::new($regop, d as u8, a as u8, b));
        }};
    }

    match instr.opcode {
        op::LOCAL_GET => {
            let r = alloc.alloc();
            stack.push(r as u8);
            out.instrs.push(RegInstr::new(
                regop::MOV,
                r as u8,
                instr.operand as u8,
                0,
            ));
        }
        op::LOCAL_SET | op::LOCAL_TEE => {
            let src = if instr.opcode == op::LOCAL_TEE {
                *stack.last()? as u32
            } else {
                pop!()
            };
            out.instrs.push(RegInstr::new(
                regop::MOV,
                instr.operand as u8,
                src as u8,
                0,
            ));
        }
        op::GLOBAL_GET => {
            let d = push_new!();
            out.instrs
                .push(RegInstr::new(regop::GLOBAL_GET, d as u8, 0, instr.operand));
        }
        op::GLOBAL_SET => {
            let src = pop!();
            out.instrs
                .push(RegInstr::new(regop::GLOBAL_SET, 0, src as u8, instr.operand));
        }
        op::I32_CONST => {
            let d = push_new!();
            out.instrs
                .push(RegInstr::new(regop::LOAD_CONST32, d as u8, 0, instr.operand));
        }
        op::I64_CONST => {
            let bits = *consts.get(instr.operand as usize)?;
            let idx = reg_const(out, bits);
            let d = push_new!();
            out.instrs
                .push(RegInstr::new(regop::LOAD_CONST64, d as u8, 0, idx));
        }
        op::I32_ADD => binop!(regop::I32_ADD),
        op::I32_SUB => binop!(regop::I32_SUB),
        op::I32_MUL => binop!(regop::I32_MUL),
        op::I32_DIV_S => binop!(regop::I32_DIV_S),
        op::I32_DIV_U => binop!(regop::I32_DIV_U),
        op::I32_REM_S => binop!(regop::I32_REM_S),
        op::I32_REM_U => binop!(regop::I32_REM_U),
        op::I32_AND => binop!(regop::I32_AND),
        op::I32_OR => binop!(regop::I32_OR),
        op::I32_XOR => binop!(regop::I32_XOR),
        op::I32_SHL => binop!(regop::I32_SHL),
        op::I32_SHR_S => binop!(regop::I32_SHR_S),
        op::I32_SHR_U => binop!(regop::I32_SHR_U),
        op::I32_LT_S => binop!(regop::I32_LT_S),
        op::I32_LE_S => binop!(regop::I32_LE_S),
        op::I32_GT_S => binop!(regop::I32_GT_S),
        op::I32_GE_S => binop!(regop::I32_GE_S),
        op::I32_EQ => binop!(regop::I32_EQ),
        op::I32_NE => binop!(regop::I32_NE),
        op::I64_ADD => binop!(regop::I64_ADD),
        op::I64_SUB => binop!(regop::I64_SUB),
        op::I64_MUL => binop!(regop::I64_MUL),
        op::F32_ADD => binop!(regop::F32_ADD),
        op::F32_SUB => binop!(regop::F32_SUB),
        op::F32_MUL => binop!(regop::F32_MUL),
        op::F32_DIV => binop!(regop::F32_DIV),
        op::F64_ADD => binop!(regop::F64_ADD),
        op::F64_SUB => binop!(regop::F64_SUB),
        op::F64_MUL => binop!(regop::F64_MUL),
        op::F64_DIV => binop!(regop::F64_DIV),
        op::I32_LOAD => {
            let addr = pop!();
            let d = push_new!();
            out.instrs
                .push(RegInstr::new(regop::I32_LOAD, d as u8, addr as u8, instr.operand));
        }
        op::I64_LOAD => {
            let addr = pop!();
            let d = push_new!();
            out.instrs
                .push(RegInstr::new(regop::I64_LOAD, d as u8, addr as u8, instr.operand));
        }
        op::I32_STORE => {
            // Tier 2 stores only carry one register operand besides the
            // address, so a nonzero memarg offset (which would need a
            // third operand slot) keeps this function pinned to Tier 1.
            if instr.operand != 0 {
                return None;
            }
            let val = pop!();
            let addr = pop!();
            out.instrs
                .push(RegInstr::new(regop::I32_STORE, 0, addr as u8, val));
        }
        op::I64_STORE => {
            if instr.operand != 0 {
                return None;
            }
            let val = pop!();
            let addr = pop!();
            out.instrs
                .push(RegInstr::new(regop::I64_STORE, 0, addr as u8, val));
        }
        op::DROP => {
            pop!();
        }
        op::RETURN => {
            let rd = stack.last().copied().unwrap_or(0);
            out.instrs.push(RegInstr::new(regop::RETURN, rd, 0, 0));
        }
        // `call`/`call_indirect` need an arbitrary-arity argument list
        // the fixed two-source-operand RegInstr shape has no room for;
        // functions that call anything stay on Tier 1 (§9 "Tier 2
        // covers leaf/computational functions only").
        op::BR => {
            let arity = instr.extra;
            if arity > 1 {
                return None;
            }
            out.instrs
                .push(RegInstr::new(regop::BR, 0, 0, instr.operand));
        }
        op::BR_IF => {
            let cond = pop!();
            out.instrs
                .push(RegInstr::new(regop::BR_IF, 0, cond as u8, instr.operand));
        }
        fused::LOCALS_ADD => {
            let d = push_new!();
            out.instrs.push(RegInstr::new(
                regop::I32_ADD,
                d as u8,
                instr.extra as u8,
                instr.operand,
            ));
        }
        fused::LOCALS_SUB => {
            let d = push_new!();
            out.instrs.push(RegInstr::new(
                regop::I32_SUB,
                d as u8,
                instr.extra as u8,
                instr.operand,
            ));
        }
        fused::LOCAL_CONST_ADD => {
            let d = push_new!();
            out.instrs.push(RegInstr::new(
                regop::I32_ADD_IMM,
                d as u8,
                instr.extra as u8,
                instr.operand,
            ));
        }
        fused::LOCAL_CONST_SUB => {
            let d = push_new!();
            out.instrs.push(RegInstr::new(
                regop::I32_SUB_IMM,
                d as u8,
                instr.extra as u8,
                instr.operand,
            ));
        }
        fused::LOCAL_CONST_LT_S => {
            let d = push_new!();
            out.instrs.push(RegInstr::new(
                regop::I32_LT_S_IMM,
                d as u8,
                instr.extra as u8,
                instr.operand,
            ));
        }
        fused::LOCAL_CONST_GE_S => {
            let d = push_new!();
            out.instrs.push(RegInstr::new(
                regop::I32_GE_S_IMM,
                d as u8,
                instr.extra as u8,
                instr.operand,
            ));
        }
        fused::LOCAL_CONST_LT_U => {
            let d = push_new!();
            out.instrs.push(RegInstr::new(
                regop::I32_LT_U_IMM,
                d as u8,
                instr.extra as u8,
                instr.operand,
            ));
        }
        _ => return None,
    }
    Some(fused::consumed_count(instr.opcode))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wrun_ir::PreInstr;

    #[test]
    fn lowers_straight_line_add() {
        // local.get 0, local.get 1, i32.add, return
        let instrs = vec![
            PreInstr::new(op::LOCAL_GET, 0, 0),
            PreInstr::new(op::LOCAL_GET, 0, 1),
            PreInstr::new(op::I32_ADD, 0, 0),
            PreInstr::new(op::RETURN, 0, 0),
        ];
        let func = lower(&instrs, &[], 2).expect("lowerable");
        assert!(func
            .instrs
            .iter()
            .any(|i| i.op == regop::I32_ADD));
        assert!(func.instrs.iter().any(|i| i.op == regop::RETURN));
    }

    #[test]
    fn bails_out_on_call_indirect() {
        let instrs = vec![PreInstr::new(op::CALL_INDIRECT, 0, 0)];
        assert!(lower(&instrs, &[], 0).is_none());
    }
}

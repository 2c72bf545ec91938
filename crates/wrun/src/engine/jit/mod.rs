//! ARM64 native code generation: Tier 3 (§4.6).
//!
//! Compiles the arithmetic-and-control-flow subset of [`RegFunc`] that
//! never touches linear memory, globals, or other functions straight
//! to AArch64 machine code. Every virtual register stays memory-
//! resident in the function's register file (the `regs: *mut u64`
//! argument, one 8-byte slot per vreg) rather than mapped onto the
//! callee/caller-saved physical registers sketched as a target design
//! — each op loads its operands from the register file into scratch
//! registers `X9`/`X10`, computes into `X11`, and stores the result
//! back. This keeps the encoder small enough to hand-verify without
//! a target compiler on hand, at the cost of the register traffic a
//! real allocator would eliminate (see DESIGN.md).
//!
//! [`compile`] bails with `Err(())` on the first unsupported opcode —
//! `CALL`/`CALL_INDIRECT`, any memory/global access, comparisons, and
//! the floating-point ops all fall back to Tier 2 for that function
//! (§4.6 "If any opcode is unsupported by the JIT, compilation fails
//! for that function"), so `vm`/`instance`, though part of the
//! documented native ABI, go unused: nothing this tier compiles can
//! call back into the engine.

use std::sync::Arc;

use region::Protection;
use wrun_core::{FuncType, UntypedVal};
use wrun_ir::{regop, RegFunc};

use super::{FuncInstance, Instance};

const X_A: u8 = 9;
const X_B: u8 = 10;
const X_R: u8 = 11;

/// A function's compiled native code, kept alive for as long as it
/// may be called (the backing pages are freed when this is dropped).
pub struct JitFunc {
    _mem: region::Allocation,
    entry: unsafe extern "C" fn(*mut u64, *mut u8, *mut u8) -> u64,
    /// The register the compiled function's `RETURN` site(s) leave
    /// the single result in. Picked from the first `RETURN`
    /// encountered at compile time, matching Tier 2's own (dynamic)
    /// assumption that every reachable return site in a function uses
    /// the same result register.
    result_reg: Option<u8>,
}

/// Attempts Tier 3 for `func_idx`, compiling on first use and caching
/// the result on the [`super::LocalFunc`]. Returns `None` when the
/// function has no register-IR form, or once compiled, never again
/// (a `None` cache entry pins the function at Tier 2 forever).
pub fn try_run(
    instance: &Instance,
    func_idx: u32,
    args: &[UntypedVal],
) -> Option<Result<Vec<UntypedVal>, wrun_core::WasmError>> {
    let local = match instance.funcs.get(func_idx as usize)? {
        FuncInstance::Local(local) => local,
        FuncInstance::Host(_) => return None,
    };
    let regir = local.regir.as_ref()?;
    let compiled = local
        .jit
        .get_or_init(|| compile(regir).ok().map(Arc::new))
        .as_ref()?;
    let func_ty = instance.module.get_type(local.type_idx)?;
    Some(Ok(execute(compiled, func_ty, regir, args)))
}

/// Compiles `func` to native code, or fails if it uses an opcode this
/// tier does not cover.
pub fn compile(func: &RegFunc) -> Result<JitFunc, ()> {
    let mut code: Vec<u32> = Vec::with_capacity(func.instrs.len() * 4 + 2);
    // `pc_to_native[i]` is the native word index where RegIR
    // instruction `i` begins; the one extra trailing entry is the
    // epilogue's start, the implicit target of every `RETURN`.
    let mut pc_to_native: Vec<usize> = Vec::with_capacity(func.instrs.len() + 1);
    let mut patches: Vec<(usize, usize, bool)> = Vec::new();
    let mut result_reg = None;

    for instr in func.instrs.iter() {
        pc_to_native.push(code.len());
        match instr.op {
            regop::NOP => {}
            regop::MOV => {
                code.push(ldr_x(X_A, instr.rs1));
                code.push(str_x(X_A, instr.rd));
            }
            regop::LOAD_CONST32 => {
                emit_mov_imm64(&mut code, X_A, instr.rs2_or_imm as u64);
                code.push(str_x(X_A, instr.rd));
            }
            regop::LOAD_CONST64 => {
                let bits = *func.consts.get(instr.rs2_or_imm as usize).ok_or(())?;
                emit_mov_imm64(&mut code, X_A, bits);
                code.push(str_x(X_A, instr.rd));
            }
            regop::I32_ADD
            | regop::I32_SUB
            | regop::I32_MUL
            | regop::I32_AND
            | regop::I32_OR
            | regop::I32_XOR
            | regop::I32_SHL
            | regop::I32_SHR_S
            | regop::I32_SHR_U => {
                code.push(ldr_x(X_A, instr.rs1));
                code.push(ldr_x(X_B, instr.rs2_or_imm as u8));
                code.push(alu_reg(instr.op, false, X_R, X_A, X_B)?);
                code.push(str_x(X_R, instr.rd));
            }
            regop::I32_ADD_IMM | regop::I32_SUB_IMM => {
                code.push(ldr_x(X_A, instr.rs1));
                emit_mov_imm64(&mut code, X_B, instr.rs2_or_imm as u64);
                let op = if instr.op == regop::I32_ADD_IMM {
                    regop::I32_ADD
                } else {
                    regop::I32_SUB
                };
                code.push(alu_reg(op, false, X_R, X_A, X_B)?);
                code.push(str_x(X_R, instr.rd));
            }
            regop::I64_ADD | regop::I64_SUB | regop::I64_MUL => {
                code.push(ldr_x(X_A, instr.rs1));
                code.push(ldr_x(X_B, instr.rs2_or_imm as u8));
                code.push(alu_reg(instr.op, true, X_R, X_A, X_B)?);
                code.push(str_x(X_R, instr.rd));
            }
            regop::BR => {
                patches.push((code.len(), instr.rs2_or_imm as usize, false));
                code.push(b_placeholder());
            }
            regop::BR_IF => {
                code.push(ldr_x(X_A, instr.rs1));
                patches.push((code.len(), instr.rs2_or_imm as usize, true));
                code.push(cbnz_x(X_A, 0));
            }
            regop::RETURN => {
                if result_reg.is_none() {
                    result_reg = Some(instr.rd);
                }
                patches.push((code.len(), func.instrs.len(), false));
                code.push(b_placeholder());
            }
            _ => return Err(()),
        }
    }

    let epilogue_native = code.len();
    pc_to_native.push(epilogue_native);
    emit_mov_imm64(&mut code, 0, 0);
    code.push(ret());

    for (native_idx, target_pc, conditional) in patches {
        let target_native = *pc_to_native.get(target_pc).ok_or(())?;
        let offset = target_native as i64 - native_idx as i64;
        if conditional {
            code[native_idx] |= ((offset as u32) & 0x7FFFF) << 5;
        } else {
            code[native_idx] |= (offset as u32) & 0x03FF_FFFF;
        }
    }

    finalize(code, result_reg)
}

fn alu_reg(op: u16, sf: bool, rd: u8, rn: u8, rm: u8) -> Result<u32, ()> {
    let base: u32 = match op {
        regop::I32_ADD | regop::I64_ADD => 0x0B000000,
        regop::I32_SUB | regop::I64_SUB => 0x4B000000,
        regop::I32_MUL | regop::I64_MUL => 0x1B007C00,
        regop::I32_AND => 0x0A000000,
        regop::I32_OR => 0x2A000000,
        regop::I32_XOR => 0x4A000000,
        regop::I32_SHL => 0x1AC02000,
        regop::I32_SHR_S => 0x1AC02800,
        regop::I32_SHR_U => 0x1AC02400,
        _ => return Err(()),
    };
    let sf_bit: u32 = sf as u32;
    Ok(base | (sf_bit << 31) | ((rm as u32) << 16) | ((rn as u32) << 5) | (rd as u32))
}

/// `LDR Xt, [X0, #(slot * 8)]` — loads vreg `slot` from the register
/// file, whose base address lives in `X0` for the whole function body
/// (the AAPCS64 first argument register, never clobbered since this
/// tier never calls out).
fn ldr_x(rt: u8, slot: u8) -> u32 {
    0xF9400000 | ((slot as u32 & 0xFFF) << 10) | (0 << 5) | (rt as u32)
}

fn str_x(rt: u8, slot: u8) -> u32 {
    0xF9000000 | ((slot as u32 & 0xFFF) << 10) | (0 << 5) | (rt as u32)
}

fn movz(rd: u8, imm16: u16, hw: u32) -> u32 {
    0xD2800000 | (hw << 21) | ((imm16 as u32) << 5) | (rd as u32)
}

fn movk(rd: u8, imm16: u16, hw: u32) -> u32 {
    0xF2800000 | (hw << 21) | ((imm16 as u32) << 5) | (rd as u32)
}

fn emit_mov_imm64(code: &mut Vec<u32>, rd: u8, value: u64) {
    code.push(movz(rd, (value & 0xFFFF) as u16, 0));
    for hw in 1..4u32 {
        let word = ((value >> (hw * 16)) & 0xFFFF) as u16;
        if word != 0 {
            code.push(movk(rd, word, hw));
        }
    }
}

fn b_placeholder() -> u32 {
    0x14000000
}

fn cbnz_x(rt: u8, imm19: u32) -> u32 {
    0xB5000000 | ((imm19 & 0x7FFFF) << 5) | (rt as u32)
}

fn ret() -> u32 {
    0xD65F03C0
}

fn finalize(code: Vec<u32>, result_reg: Option<u8>) -> Result<JitFunc, ()> {
    if code.is_empty() {
        return Err(());
    }
    let byte_len = code.len() * 4;
    let mut mem = region::alloc(byte_len, Protection::READ_WRITE).map_err(|_| ())?;
    unsafe {
        std::ptr::copy_nonoverlapping(code.as_ptr() as *const u8, mem.as_mut_ptr(), byte_len);
        region::protect(mem.as_ptr(), byte_len, Protection::READ_EXECUTE).map_err(|_| ())?;
    }
    flush_icache(mem.as_ptr(), byte_len);
    let entry = unsafe {
        std::mem::transmute::<*const u8, unsafe extern "C" fn(*mut u64, *mut u8, *mut u8) -> u64>(
            mem.as_ptr(),
        )
    };
    Ok(JitFunc {
        _mem: mem,
        entry,
        result_reg,
    })
}

/// Invalidates the instruction cache for freshly written code before
/// it is ever executed, per the AArch64 cache-maintenance sequence
/// (clean every data cache line touched, then invalidate the matching
/// instruction cache line, barriers on both sides). 64 bytes is a
/// conservative stand-in for the real `CTR_EL0.DminLine`/`IminLine`.
fn flush_icache(ptr: *const u8, len: usize) {
    const LINE: usize = 64;
    let start = ptr as usize;
    let end = start + len;
    unsafe {
        let mut addr = start & !(LINE - 1);
        while addr < end {
            std::arch::asm!("dc cvau, {0}", in(reg) addr);
            addr += LINE;
        }
        std::arch::asm!("dsb ish");
        let mut addr = start & !(LINE - 1);
        while addr < end {
            std::arch::asm!("ic ivau, {0}", in(reg) addr);
            addr += LINE;
        }
        std::arch::asm!("dsb ish");
        std::arch::asm!("isb");
    }
}

fn execute(jit: &JitFunc, func_ty: &FuncType, func: &RegFunc, args: &[UntypedVal]) -> Vec<UntypedVal> {
    let mut regs = vec![0u64; func.num_registers as usize];
    for (i, arg) in args.iter().enumerate().take(func.num_params_and_locals as usize) {
        regs[i] = arg.to_bits();
    }
    // SAFETY: `entry` was assembled by `compile` from a `RegFunc` this
    // tier accepted, against this exact `regs` layout; `vm`/`instance`
    // are unused by every op this tier supports.
    let _status = unsafe { (jit.entry)(regs.as_mut_ptr(), std::ptr::null_mut(), std::ptr::null_mut()) };
    let mut results = Vec::with_capacity(func_ty.results().len());
    if !func_ty.results().is_empty() {
        let reg = jit.result_reg.unwrap_or(0) as usize;
        results.push(UntypedVal::from_bits(regs.get(reg).copied().unwrap_or(0)));
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reg_func(instrs: Vec<wrun_ir::RegInstr>, num_registers: u32) -> RegFunc {
        RegFunc {
            instrs,
            consts: vec![],
            num_registers,
            num_params_and_locals: 2,
        }
    }

    #[test]
    fn compiles_and_runs_an_add() {
        let func = reg_func(
            vec![
                wrun_ir::RegInstr::new(regop::I32_ADD, 2, 0, 1),
                wrun_ir::RegInstr::new(regop::RETURN, 2, 0, 0),
            ],
            3,
        );
        let jit = compile(&func).expect("supported opcodes only");
        let func_ty = FuncType::new(
            [wrun_core::ValType::I32, wrun_core::ValType::I32],
            [wrun_core::ValType::I32],
        );
        let args = [UntypedVal::from(19i32), UntypedVal::from(23i32)];
        let results = execute(&jit, &func_ty, &func, &args);
        assert_eq!(results[0].i32(), 42);
    }

    #[test]
    fn bails_on_an_unsupported_opcode() {
        let func = reg_func(vec![wrun_ir::RegInstr::new(regop::CALL, 0, 0, 0)], 1);
        assert!(compile(&func).is_err());
    }

    #[test]
    fn loops_a_decrementing_counter_to_zero() {
        // r0 = 3 (const); loop: r0 -= 1; r0 != 0 -> br loop; return r0.
        let func = reg_func(
            vec![
                wrun_ir::RegInstr::new(regop::LOAD_CONST32, 0, 0, 3),
                wrun_ir::RegInstr::new(regop::I32_SUB_IMM, 0, 0, 1),
                wrun_ir::RegInstr::new(regop::BR_IF, 0, 0, 1),
                wrun_ir::RegInstr::new(regop::RETURN, 0, 0, 0),
            ],
            1,
        );
        let jit = compile(&func).expect("supported opcodes only");
        let func_ty = FuncType::new([], [wrun_core::ValType::I32]);
        let results = execute(&jit, &func_ty, &func, &[]);
        assert_eq!(results[0].i32(), 0);
    }
}

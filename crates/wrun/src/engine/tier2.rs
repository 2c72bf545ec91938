//! Tier 2: an interpreter over the three-operand register IR produced
//! by [`crate::regir::lower`] (§4.5).
//!
//! Only functions [`crate::regir::lower`] accepted a lowering for ever
//! reach here; anything it bailed out on (nested control flow,
//! `call_indirect`, bulk-memory misc ops) stays on Tier 1 forever,
//! since [`super::FuncInstance`] caches `regir: None` for them and
//! Tier 1's promotion check only fires when a lowering exists.

use wrun_core::{UntypedVal, WasmError};
use wrun_ir::regop;

use super::{FuncInstance, Instance};
use crate::runtime::Frame;

pub fn run(instance: &mut Instance, func_idx: u32, args: &[UntypedVal]) -> Result<Vec<UntypedVal>, WasmError> {
    let (func, type_idx) = match instance.funcs.get(func_idx as usize) {
        Some(FuncInstance::Local(local)) => match &local.regir {
            Some(f) => (f.clone(), local.type_idx),
            None => return super::tier1::run(instance, func_idx, args),
        },
        _ => return Err(WasmError::Trap),
    };

    let func_ty = instance
        .module
        .get_type(type_idx)
        .ok_or(WasmError::InvalidModule)?
        .clone();

    let mut regs = vec![UntypedVal::from(0i64); func.num_registers as usize];
    for (i, arg) in args.iter().enumerate().take(func.num_params_and_locals as usize) {
        regs[i] = *arg;
    }
    let mut frame = Frame::new(regs);

    let mut pc: usize = 0;
    let mut result_reg: Option<u8> = None;
    while pc < func.instrs.len() {
        let instr = func.instrs[pc];
        match instr.op {
            regop::NOP => {}
            regop::MOV => frame.locals[instr.rd as usize] = frame.locals[instr.rs1 as usize],
            regop::LOAD_CONST32 => {
                frame.locals[instr.rd as usize] = UntypedVal::from(instr.rs2_or_imm as i32)
            }
            regop::LOAD_CONST64 => {
                let bits = func.consts[instr.rs2_or_imm as usize];
                frame.locals[instr.rd as usize] = UntypedVal::from_bits(bits);
            }
            regop::GLOBAL_GET => {
                let v = instance
                    .globals
                    .get(instr.rs2_or_imm as usize)
                    .ok_or(WasmError::Trap)?
                    .get();
                frame.locals[instr.rd as usize] = v;
            }
            regop::GLOBAL_SET => {
                let v = frame.locals[instr.rs1 as usize];
                instance
                    .globals
                    .get_mut(instr.rs2_or_imm as usize)
                    .ok_or(WasmError::Trap)?
                    .set(v)?;
            }
            regop::I32_ADD => binop_i32(&mut frame, instr, |a, b| a.wrapping_add(b)),
            regop::I32_SUB => binop_i32(&mut frame, instr, |a, b| a.wrapping_sub(b)),
            regop::I32_MUL => binop_i32(&mut frame, instr, |a, b| a.wrapping_mul(b)),
            regop::I32_AND => binop_i32(&mut frame, instr, |a, b| a & b),
            regop::I32_OR => binop_i32(&mut frame, instr, |a, b| a | b),
            regop::I32_XOR => binop_i32(&mut frame, instr, |a, b| a ^ b),
            regop::I32_SHL => binop_i32(&mut frame, instr, |a, b| a.wrapping_shl(b as u32 & 31)),
            regop::I32_SHR_S => binop_i32(&mut frame, instr, |a, b| a.wrapping_shr(b as u32 & 31)),
            regop::I32_LT_S => cmp_i32(&mut frame, instr, |a, b| a < b),
            regop::I32_LE_S => cmp_i32(&mut frame, instr, |a, b| a <= b),
            regop::I32_GT_S => cmp_i32(&mut frame, instr, |a, b| a > b),
            regop::I32_GE_S => cmp_i32(&mut frame, instr, |a, b| a >= b),
            regop::I32_EQ => cmp_i32(&mut frame, instr, |a, b| a == b),
            regop::I32_NE => cmp_i32(&mut frame, instr, |a, b| a != b),
            regop::I32_DIV_S => {
                let a = frame.locals[instr.rs1 as usize].i32();
                let b = frame.locals[instr.rs2_or_imm as usize].i32();
                if b == 0 {
                    return Err(WasmError::DivisionByZero);
                }
                if a == i32::MIN && b == -1 {
                    return Err(WasmError::IntegerOverflow);
                }
                frame.locals[instr.rd as usize] = UntypedVal::from(a / b);
            }
            regop::I32_DIV_U => {
                let a = frame.locals[instr.rs1 as usize].u32();
                let b = frame.locals[instr.rs2_or_imm as usize].u32();
                if b == 0 {
                    return Err(WasmError::DivisionByZero);
                }
                frame.locals[instr.rd as usize] = UntypedVal::from(a / b);
            }
            regop::I32_REM_S => {
                let a = frame.locals[instr.rs1 as usize].i32();
                let b = frame.locals[instr.rs2_or_imm as usize].i32();
                if b == 0 {
                    return Err(WasmError::DivisionByZero);
                }
                frame.locals[instr.rd as usize] = UntypedVal::from(a.wrapping_rem(b));
            }
            regop::I32_REM_U => {
                let a = frame.locals[instr.rs1 as usize].u32();
                let b = frame.locals[instr.rs2_or_imm as usize].u32();
                if b == 0 {
                    return Err(WasmError::DivisionByZero);
                }
                frame.locals[instr.rd as usize] = UntypedVal::from(a % b);
            }
            regop::I32_SHR_U => binop_i32_u(&mut frame, instr, |a, b| a.wrapping_shr(b & 31)),
            regop::I32_ADD_IMM => {
                let a = frame.locals[instr.rs1 as usize].i32();
                frame.locals[instr.rd as usize] = UntypedVal::from(a.wrapping_add(instr.rs2_or_imm as i32));
            }
            regop::I32_SUB_IMM => {
                let a = frame.locals[instr.rs1 as usize].i32();
                frame.locals[instr.rd as usize] = UntypedVal::from(a.wrapping_sub(instr.rs2_or_imm as i32));
            }
            regop::I32_LT_S_IMM => {
                let a = frame.locals[instr.rs1 as usize].i32();
                frame.locals[instr.rd as usize] = UntypedVal::from(a < instr.rs2_or_imm as i32);
            }
            regop::I32_GE_S_IMM => {
                let a = frame.locals[instr.rs1 as usize].i32();
                frame.locals[instr.rd as usize] = UntypedVal::from(a >= instr.rs2_or_imm as i32);
            }
            regop::I32_LT_U_IMM => {
                let a = frame.locals[instr.rs1 as usize].u32();
                frame.locals[instr.rd as usize] = UntypedVal::from(a < instr.rs2_or_imm);
            }
            regop::I64_ADD => binop_i64(&mut frame, instr, |a, b| a.wrapping_add(b)),
            regop::I64_SUB => binop_i64(&mut frame, instr, |a, b| a.wrapping_sub(b)),
            regop::I64_MUL => binop_i64(&mut frame, instr, |a, b| a.wrapping_mul(b)),
            regop::F32_ADD => binop_f32(&mut frame, instr, |a, b| a + b),
            regop::F32_SUB => binop_f32(&mut frame, instr, |a, b| a - b),
            regop::F32_MUL => binop_f32(&mut frame, instr, |a, b| a * b),
            regop::F32_DIV => binop_f32(&mut frame, instr, |a, b| a / b),
            regop::F64_ADD => binop_f64(&mut frame, instr, |a, b| a + b),
            regop::F64_SUB => binop_f64(&mut frame, instr, |a, b| a - b),
            regop::F64_MUL => binop_f64(&mut frame, instr, |a, b| a * b),
            regop::F64_DIV => binop_f64(&mut frame, instr, |a, b| a / b),
            regop::I32_LOAD => {
                let addr = frame.locals[instr.rs1 as usize].u32() as u64 + instr.rs2_or_imm as u64;
                let bytes = instance.memories.get(0).ok_or(WasmError::Trap)?.read(addr, 4)?;
                frame.locals[instr.rd as usize] = UntypedVal::from(i32::from_le_bytes(bytes.try_into().unwrap()));
            }
            regop::I64_LOAD => {
                let addr = frame.locals[instr.rs1 as usize].u32() as u64 + instr.rs2_or_imm as u64;
                let bytes = instance.memories.get(0).ok_or(WasmError::Trap)?.read(addr, 8)?;
                frame.locals[instr.rd as usize] = UntypedVal::from(i64::from_le_bytes(bytes.try_into().unwrap()));
            }
            regop::I32_STORE => {
                // rs2_or_imm holds the value register here, not an
                // offset immediate (lowering bails to Tier 1 whenever
                // the source memarg has a nonzero offset).
                let addr = frame.locals[instr.rs1 as usize].u32() as u64;
                let value = frame.locals[instr.rs2_or_imm as usize].i32();
                instance
                    .memories
                    .get_mut(0)
                    .ok_or(WasmError::Trap)?
                    .write(addr, &value.to_le_bytes())?;
            }
            regop::I64_STORE => {
                let addr = frame.locals[instr.rs1 as usize].u32() as u64;
                let value = frame.locals[instr.rs2_or_imm as usize].i64();
                instance
                    .memories
                    .get_mut(0)
                    .ok_or(WasmError::Trap)?
                    .write(addr, &value.to_le_bytes())?;
            }
            regop::BR => {
                pc = instr.rs2_or_imm as usize;
                continue;
            }
            regop::BR_IF => {
                let cond = frame.locals[instr.rs1 as usize].i32();
                if cond != 0 {
                    pc = instr.rs2_or_imm as usize;
                    continue;
                }
            }
            regop::RETURN => {
                result_reg = Some(instr.rd);
                break;
            }
            other => {
                let _ = other;
                return Err(WasmError::Trap);
            }
        }
        pc += 1;
    }

    let num_results = func_ty.results().len();
    let mut results = Vec::with_capacity(num_results);
    if num_results > 0 {
        let reg = result_reg.unwrap_or(0);
        results.push(frame.locals[reg as usize]);
    }
    Ok(results)
}

fn binop_i32(frame: &mut Frame, instr: wrun_ir::RegInstr, f: impl Fn(i32, i32) -> i32) {
    let a = frame.locals[instr.rs1 as usize].i32();
    let b = frame.locals[instr.rs2_or_imm as usize].i32();
    frame.locals[instr.rd as usize] = UntypedVal::from(f(a, b));
}

fn binop_i32_u(frame: &mut Frame, instr: wrun_ir::RegInstr, f: impl Fn(u32, u32) -> u32) {
    let a = frame.locals[instr.rs1 as usize].u32();
    let b = frame.locals[instr.rs2_or_imm as usize].u32();
    frame.locals[instr.rd as usize] = UntypedVal::from(f(a, b));
}

fn cmp_i32(frame: &mut Frame, instr: wrun_ir::RegInstr, f: impl Fn(i32, i32) -> bool) {
    let a = frame.locals[instr.rs1 as usize].i32();
    let b = frame.locals[instr.rs2_or_imm as usize].i32();
    frame.locals[instr.rd as usize] = UntypedVal::from(f(a, b));
}

fn binop_i64(frame: &mut Frame, instr: wrun_ir::RegInstr, f: impl Fn(i64, i64) -> i64) {
    let a = frame.locals[instr.rs1 as usize].i64();
    let b = frame.locals[instr.rs2_or_imm as usize].i64();
    frame.locals[instr.rd as usize] = UntypedVal::from(f(a, b));
}

fn binop_f32(frame: &mut Frame, instr: wrun_ir::RegInstr, f: impl Fn(f32, f32) -> f32) {
    let a = frame.locals[instr.rs1 as usize].f32();
    let b = frame.locals[instr.rs2_or_imm as usize].f32();
    frame.locals[instr.rd as usize] = UntypedVal::from(f(a, b));
}

fn binop_f64(frame: &mut Frame, instr: wrun_ir::RegInstr, f: impl Fn(f64, f64) -> f64) {
    let a = frame.locals[instr.rs1 as usize].f64();
    let b = frame.locals[instr.rs2_or_imm as usize].f64();
    frame.locals[instr.rd as usize] = UntypedVal::from(f(a, b));
}

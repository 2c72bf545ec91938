//! Tier 1: a direct-threaded interpreter over the predecoded
//! [`PreInstr`] stream (§4.4).
//!
//! Every function starts here. [`run`] counts invocations and, once a
//! function crosses [`HOT_THRESHOLD`] and has a lowered register-IR
//! form, hands subsequent calls to [`super::jit::try_run`] (on
//! `aarch64` with the `jit` feature, falling back when the function
//! uses an opcode that tier does not cover) or [`super::tier2::run`]
//! otherwise.

use std::sync::atomic::Ordering;

use wrun_core::{UntypedVal, ValType, WasmError};
use wrun_ir::opcode::{fused, misc, op, slot};
use wrun_ir::PreInstr;

use super::{eval_const_expr, Engine, FuncInstance, Instance};
use crate::module::ElemItem;
use crate::predecode::PreFunc;
use crate::runtime::Frame;

/// Call-count threshold past which a function's subsequent
/// invocations are dispatched to Tier 2 (§4.4 "hotness counter").
pub const HOT_THRESHOLD: u32 = 100;

pub fn run(instance: &mut Instance, func_idx: u32, args: &[UntypedVal]) -> Result<Vec<UntypedVal>, WasmError> {
    let (pre, type_idx, promote) = match instance.funcs.get(func_idx as usize) {
        Some(FuncInstance::Local(local)) => {
            let count = local.call_count.fetch_add(1, Ordering::Relaxed);
            let promote = count + 1 >= HOT_THRESHOLD && local.regir.is_some();
            (local.pre.clone(), local.type_idx, promote)
        }
        _ => return Err(WasmError::Trap),
    };

    if promote {
        tracing::debug!(target: "engine", func_idx, "promoting to tier 2");
        #[cfg(all(feature = "jit", target_arch = "aarch64"))]
        if let Some(result) = super::jit::try_run(instance, func_idx, args) {
            return result;
        }
        return super::tier2::run(instance, func_idx, args);
    }

    let func_ty = instance
        .module
        .get_type(type_idx)
        .ok_or(WasmError::InvalidModule)?
        .clone();

    let mut locals: Vec<UntypedVal> = Vec::with_capacity(pre.num_locals as usize);
    for (i, ty) in pre.local_types.iter().enumerate() {
        if i < args.len() {
            locals.push(args[i]);
        } else {
            locals.push(zero_for(*ty));
        }
    }
    let mut frame = Frame::new(locals);

    let pc = exec(instance, &pre, &mut frame)?;
    let _ = pc;

    let num_results = func_ty.results().len();
    let mut results = Vec::with_capacity(num_results);
    for _ in 0..num_results {
        results.push(frame.pop()?);
    }
    results.reverse();
    Ok(results)
}

fn zero_for(ty: ValType) -> UntypedVal {
    match ty {
        ValType::I32 | ValType::F32 => UntypedVal::from(0i32),
        ValType::I64 | ValType::F64 => UntypedVal::from(0i64),
        ValType::V128 => UntypedVal::from(0i64),
        ValType::FuncRef | ValType::ExternRef => UntypedVal::from_bits(u64::MAX),
    }
}

/// Runs `pre`'s instruction stream to completion (either the stream's
/// end, or an executed `return`). Returns the terminating instruction
/// index for debugging; all observable results are left on
/// `frame`'s value stack.
fn exec(instance: &mut Instance, pre: &PreFunc, frame: &mut Frame) -> Result<usize, WasmError> {
    let mut pc: usize = 0;
    let mut block_stack: Vec<BlockRuntime> = Vec::new();
    macro_rules! binop_i32 {
        ($f:expr) => {{
            let b = frame.pop()?.i32();
            let a = frame.pop()?.i32();
            frame.push(UntypedVal::from($f(a, b)));
        }};
    }
    macro_rules! binop_i64 {
        ($f:expr) => {{
            let b = frame.pop()?.i64();
            let a = frame.pop()?.i64();
            frame.push(UntypedVal::from($f(a, b)));
        }};
    }
    macro_rules! cmp_i32 {
        ($f:expr) => {{
            let b = frame.pop()?.i32();
            let a = frame.pop()?.i32();
            frame.push(UntypedVal::from($f(a, b)));
        }};
    }

    while pc < pre.instrs.len() {
        let instr = pre.instrs[pc];
        match instr.opcode {
            op::UNREACHABLE => return Err(WasmError::Unreachable),
            op::NOP => {}
            op::BLOCK => {
                let arity = resolve_arity(instance, instr.extra)?;
                block_stack.push(BlockRuntime {
                    marker: instr.operand,
                    entry_height: frame.value_stack.len(),
                    arity,
                });
            }
            op::LOOP => {
                let arity = resolve_arity(instance, instr.extra)?;
                block_stack.push(BlockRuntime {
                    marker: instr.operand,
                    entry_height: frame.value_stack.len(),
                    arity,
                });
            }
            slot::IF_DATA => {}
            op::IF => {
                let cond = frame.pop()?.i32();
                let arity = resolve_arity(instance, instr.extra)?;
                let data = pre.instrs[pc + 1];
                block_stack.push(BlockRuntime {
                    marker: data.operand,
                    entry_height: frame.value_stack.len(),
                    arity,
                });
                if cond == 0 {
                    let has_else = data.extra == 1;
                    if !has_else {
                        take_branch(&mut block_stack, frame, instr.operand, arity)?;
                    }
                    pc = instr.operand as usize;
                    continue;
                }
            }
            op::END => {
                let closed = block_stack.pop().ok_or(WasmError::Trap)?;
                truncate_to_arity(frame, closed.entry_height, closed.arity)?;
            }
            op::BR => {
                let arity = resolve_arity(instance, instr.extra)?;
                take_branch(&mut block_stack, frame, instr.operand, arity)?;
                pc = instr.operand as usize;
                continue;
            }
            op::BR_IF => {
                let cond = frame.pop()?.i32();
                if cond != 0 {
                    let arity = resolve_arity(instance, instr.extra)?;
                    take_branch(&mut block_stack, frame, instr.operand, arity)?;
                    pc = instr.operand as usize;
                    continue;
                }
            }
            op::BR_TABLE => {
                let count = instr.extra as usize;
                let idx = frame.pop()?.u32() as usize;
                let chosen = if idx < count { idx } else { count };
                let entry = pre.instrs[pc + 1 + chosen];
                let arity = resolve_arity(instance, entry.extra)?;
                take_branch(&mut block_stack, frame, entry.operand, arity)?;
                pc = entry.operand as usize;
                continue;
            }
            op::RETURN => return Ok(pc),
            op::CALL => {
                let callee = instr.operand;
                let argc = instance
                    .module
                    .func_type(crate::module::FuncIdx(callee))
                    .map(|t| t.params().len())
                    .unwrap_or(0);
                let args = split_off_n(frame, argc)?;
                let results = Engine::call(instance, callee, &args)?;
                for r in results {
                    frame.push(r);
                }
            }
            op::CALL_INDIRECT => {
                let table_idx = instr.extra as u32;
                let type_idx = instr.operand;
                let elem_idx = frame.pop()?.u32();
                let table = instance.tables.get(table_idx as usize).ok_or(WasmError::Trap)?;
                let callee = table.get(elem_idx)?.ok_or(WasmError::Trap)?;
                let expected = instance
                    .module
                    .get_type(crate::module::TypeIdx(type_idx))
                    .ok_or(WasmError::InvalidModule)?;
                let actual = instance
                    .module
                    .func_type(crate::module::FuncIdx(callee))
                    .ok_or(WasmError::Trap)?;
                if expected != actual {
                    return Err(WasmError::Trap);
                }
                let argc = expected.params().len();
                let args = split_off_n(frame, argc)?;
                let results = Engine::call(instance, callee, &args)?;
                for r in results {
                    frame.push(r);
                }
            }
            op::DROP => {
                frame.pop()?;
            }
            op::SELECT => {
                let cond = frame.pop()?.i32();
                let b = frame.pop()?;
                let a = frame.pop()?;
                frame.push(if cond != 0 { a } else { b });
            }
            op::LOCAL_GET => {
                let v = *frame
                    .locals
                    .get(instr.operand as usize)
                    .ok_or(WasmError::Trap)?;
                frame.push(v);
            }
            op::LOCAL_SET => {
                let v = frame.pop()?;
                *frame
                    .locals
                    .get_mut(instr.operand as usize)
                    .ok_or(WasmError::Trap)? = v;
            }
            op::LOCAL_TEE => {
                let v = *frame.value_stack.last().ok_or(WasmError::Trap)?;
                *frame
                    .locals
                    .get_mut(instr.operand as usize)
                    .ok_or(WasmError::Trap)? = v;
            }
            op::GLOBAL_GET => {
                let v = instance
                    .globals
                    .get(instr.operand as usize)
                    .ok_or(WasmError::Trap)?
                    .get();
                frame.push(v);
            }
            op::GLOBAL_SET => {
                let v = frame.pop()?;
                instance
                    .globals
                    .get_mut(instr.operand as usize)
                    .ok_or(WasmError::Trap)?
                    .set(v)?;
            }
            op::I32_CONST => frame.push(UntypedVal::from(instr.operand as i32)),
            op::F32_CONST => frame.push(UntypedVal::from(f32::from_bits(instr.operand))),
            op::I64_CONST => {
                let bits = *pre.consts.get(instr.operand as usize).ok_or(WasmError::Trap)?;
                frame.push(UntypedVal::from(bits as i64));
            }
            op::F64_CONST => {
                let bits = *pre.consts.get(instr.operand as usize).ok_or(WasmError::Trap)?;
                frame.push(UntypedVal::from(f64::from_bits(bits)));
            }
            op::I32_EQZ => {
                let a = frame.pop()?.i32();
                frame.push(UntypedVal::from(a == 0));
            }
            op::I64_EQZ => {
                let a = frame.pop()?.i64();
                frame.push(UntypedVal::from(a == 0));
            }
            op::I32_EQ => cmp_i32!(|a, b| a == b),
            op::I32_NE => cmp_i32!(|a, b| a != b),
            op::I32_LT_S => cmp_i32!(|a, b| a < b),
            op::I32_LT_U => {
                let b = frame.pop()?.u32();
                let a = frame.pop()?.u32();
                frame.push(UntypedVal::from(a < b));
            }
            op::I32_GT_S => cmp_i32!(|a, b| a > b),
            op::I32_GT_U => {
                let b = frame.pop()?.u32();
                let a = frame.pop()?.u32();
                frame.push(UntypedVal::from(a > b));
            }
            op::I32_LE_S => cmp_i32!(|a, b| a <= b),
            op::I32_GE_S => cmp_i32!(|a, b| a >= b),
            op::I32_ADD => binop_i32!(|a: i32, b: i32| a.wrapping_add(b)),
            op::I32_SUB => binop_i32!(|a: i32, b: i32| a.wrapping_sub(b)),
            op::I32_MUL => binop_i32!(|a: i32, b: i32| a.wrapping_mul(b)),
            op::I32_DIV_S => {
                let b = frame.pop()?.i32();
                let a = frame.pop()?.i32();
                if b == 0 {
                    return Err(WasmError::DivisionByZero);
                }
                if a == i32::MIN && b == -1 {
                    return Err(WasmError::IntegerOverflow);
                }
                frame.push(UntypedVal::from(a / b));
            }
            op::I32_DIV_U => {
                let b = frame.pop()?.u32();
                let a = frame.pop()?.u32();
                if b == 0 {
                    return Err(WasmError::DivisionByZero);
                }
                frame.push(UntypedVal::from(a / b));
            }
            op::I32_REM_S => {
                let b = frame.pop()?.i32();
                let a = frame.pop()?.i32();
                if b == 0 {
                    return Err(WasmError::DivisionByZero);
                }
                frame.push(UntypedVal::from(a.wrapping_rem(b)));
            }
            op::I32_REM_U => {
                let b = frame.pop()?.u32();
                let a = frame.pop()?.u32();
                if b == 0 {
                    return Err(WasmError::DivisionByZero);
                }
                frame.push(UntypedVal::from(a % b));
            }
            op::I32_AND => binop_i32!(|a: i32, b: i32| a & b),
            op::I32_OR => binop_i32!(|a: i32, b: i32| a | b),
            op::I32_XOR => binop_i32!(|a: i32, b: i32| a ^ b),
            op::I32_SHL => binop_i32!(|a: i32, b: i32| a.wrapping_shl(b as u32 & 31)),
            op::I32_SHR_S => binop_i32!(|a: i32, b: i32| a.wrapping_shr(b as u32 & 31)),
            op::I32_SHR_U => {
                let b = frame.pop()?.u32();
                let a = frame.pop()?.u32();
                frame.push(UntypedVal::from(a.wrapping_shr(b & 31)));
            }
            op::I64_ADD => binop_i64!(|a: i64, b: i64| a.wrapping_add(b)),
            op::I64_SUB => binop_i64!(|a: i64, b: i64| a.wrapping_sub(b)),
            op::I64_MUL => binop_i64!(|a: i64, b: i64| a.wrapping_mul(b)),
            op::F32_ADD => {
                let b = frame.pop()?.f32();
                let a = frame.pop()?.f32();
                frame.push(UntypedVal::from(a + b));
            }
            op::F32_SUB => {
                let b = frame.pop()?.f32();
                let a = frame.pop()?.f32();
                frame.push(UntypedVal::from(a - b));
            }
            op::F64_ADD => {
                let b = frame.pop()?.f64();
                let a = frame.pop()?.f64();
                frame.push(UntypedVal::from(a + b));
            }
            op::F64_SUB => {
                let b = frame.pop()?.f64();
                let a = frame.pop()?.f64();
                frame.push(UntypedVal::from(a - b));
            }
            op::I32_LOAD => {
                let addr = load_addr(frame, instr)?;
                let bytes = instance.memories.get(0).ok_or(WasmError::Trap)?.read(addr, 4)?;
                frame.push(UntypedVal::from(i32::from_le_bytes(bytes.try_into().unwrap())));
            }
            op::I64_LOAD => {
                let addr = load_addr(frame, instr)?;
                let bytes = instance.memories.get(0).ok_or(WasmError::Trap)?.read(addr, 8)?;
                frame.push(UntypedVal::from(i64::from_le_bytes(bytes.try_into().unwrap())));
            }
            op::I32_LOAD8_U => {
                let addr = load_addr(frame, instr)?;
                let bytes = instance.memories.get(0).ok_or(WasmError::Trap)?.read(addr, 1)?;
                frame.push(UntypedVal::from(bytes[0] as i32));
            }
            op::I32_LOAD8_S => {
                let addr = load_addr(frame, instr)?;
                let bytes = instance.memories.get(0).ok_or(WasmError::Trap)?.read(addr, 1)?;
                frame.push(UntypedVal::from(bytes[0] as i8 as i32));
            }
            op::I32_STORE => {
                let value = frame.pop()?.i32();
                let addr = load_addr(frame, instr)?;
                instance
                    .memories
                    .get_mut(0)
                    .ok_or(WasmError::Trap)?
                    .write(addr, &value.to_le_bytes())?;
            }
            op::I64_STORE => {
                let value = frame.pop()?.i64();
                let addr = load_addr(frame, instr)?;
                instance
                    .memories
                    .get_mut(0)
                    .ok_or(WasmError::Trap)?
                    .write(addr, &value.to_le_bytes())?;
            }
            op::I32_STORE8 => {
                let value = frame.pop()?.i32();
                let addr = load_addr(frame, instr)?;
                instance
                    .memories
                    .get_mut(0)
                    .ok_or(WasmError::Trap)?
                    .write(addr, &[value as u8])?;
            }
            op::MEMORY_SIZE => {
                let pages = instance.memories.get(0).ok_or(WasmError::Trap)?.size_pages();
                frame.push(UntypedVal::from(pages as i32));
            }
            op::MEMORY_GROW => {
                let delta = frame.pop()?.u32() as u64;
                let result = instance.memories.get_mut(0).ok_or(WasmError::Trap)?.grow(delta);
                frame.push(UntypedVal::from(result as i32));
            }
            op::TABLE_GET => {
                let idx = frame.pop()?.u32();
                let v = instance
                    .tables
                    .get(instr.operand as usize)
                    .ok_or(WasmError::Trap)?
                    .get(idx)?;
                frame.push(UntypedVal::from_bits(v.map(u64::from).unwrap_or(u64::MAX)));
            }
            op::TABLE_SET => {
                let v = frame.pop()?;
                let idx = frame.pop()?.u32();
                let value = if v.to_bits() == u64::MAX { None } else { Some(v.u32()) };
                instance
                    .tables
                    .get_mut(instr.operand as usize)
                    .ok_or(WasmError::Trap)?
                    .set(idx, value)?;
            }
            op::REF_NULL => frame.push(UntypedVal::from_bits(u64::MAX)),
            op::REF_IS_NULL => {
                let v = frame.pop()?;
                frame.push(UntypedVal::from(v.to_bits() == u64::MAX));
            }
            op::REF_FUNC => frame.push(UntypedVal::from(instr.operand)),
            _ if instr.opcode >= misc::BASE && instr.opcode <= misc::BASE + 17 => {
                exec_misc(instance, frame, instr)?;
            }
            fused::LOCALS_GET_GET => {
                frame.push(*frame_local(frame, instr.extra as u32)?);
                frame.push(*frame_local(frame, instr.operand)?);
            }
            fused::LOCAL_GET_CONST => {
                frame.push(*frame_local(frame, instr.extra as u32)?);
                frame.push(UntypedVal::from(instr.operand as i32));
            }
            fused::LOCALS_ADD => {
                let a = frame_local(frame, instr.extra as u32)?.i32();
                let b = frame_local(frame, instr.operand)?.i32();
                frame.push(UntypedVal::from(a.wrapping_add(b)));
            }
            fused::LOCALS_SUB => {
                let a = frame_local(frame, instr.extra as u32)?.i32();
                let b = frame_local(frame, instr.operand)?.i32();
                frame.push(UntypedVal::from(a.wrapping_sub(b)));
            }
            fused::LOCALS_GT_S => {
                let a = frame_local(frame, instr.extra as u32)?.i32();
                let b = frame_local(frame, instr.operand)?.i32();
                frame.push(UntypedVal::from(a > b));
            }
            fused::LOCALS_LE_S => {
                let a = frame_local(frame, instr.extra as u32)?.i32();
                let b = frame_local(frame, instr.operand)?.i32();
                frame.push(UntypedVal::from(a <= b));
            }
            fused::LOCAL_CONST_ADD => {
                let a = frame_local(frame, instr.extra as u32)?.i32();
                frame.push(UntypedVal::from(a.wrapping_add(instr.operand as i32)));
            }
            fused::LOCAL_CONST_SUB => {
                let a = frame_local(frame, instr.extra as u32)?.i32();
                frame.push(UntypedVal::from(a.wrapping_sub(instr.operand as i32)));
            }
            fused::LOCAL_CONST_LT_S => {
                let a = frame_local(frame, instr.extra as u32)?.i32();
                frame.push(UntypedVal::from(a < instr.operand as i32));
            }
            fused::LOCAL_CONST_GE_S => {
                let a = frame_local(frame, instr.extra as u32)?.i32();
                frame.push(UntypedVal::from(a >= instr.operand as i32));
            }
            fused::LOCAL_CONST_LT_U => {
                let a = frame_local(frame, instr.extra as u32)?.u32();
                frame.push(UntypedVal::from(a < instr.operand));
            }
            slot::BR_TABLE_ENTRY => {}
            other => {
                let _ = other;
                return Err(WasmError::Trap);
            }
        }
        pc += fused::consumed_count(instr.opcode);
    }
    Ok(pc)
}

/// One active structured-control label on the runtime block stack: the
/// pc any branch resolved against it jumps to (a block/if's `end`, or a
/// loop's own start), the operand-stack height at the point the label
/// was entered, and the label's result arity (§4.4 "branch-arity trim").
struct BlockRuntime {
    marker: u32,
    entry_height: usize,
    arity: usize,
}

/// Resolves a `PreInstr`'s packed block-arity `extra` field to an
/// actual result count, looking the function type up by index for the
/// multi-value ("by type") encoding (§3 "Block arity", §9 "Block arity
/// by type index").
fn resolve_arity(instance: &Instance, extra: u16) -> Result<usize, WasmError> {
    if PreInstr::arity_is_by_type(extra) {
        let type_idx = PreInstr::arity_inline(extra) as u32;
        let ty = instance
            .module
            .get_type(crate::module::TypeIdx(type_idx))
            .ok_or(WasmError::InvalidModule)?;
        Ok(ty.results().len())
    } else {
        Ok(PreInstr::arity_inline(extra) as usize)
    }
}

/// Pops runtime block-stack frames that `target` jumps past, returning
/// the matched label's entry height. The matched frame itself is never
/// popped here: landing on it is either a loop's own start (still
/// active — this is a continue) or its `end` marker instruction, which
/// pops it when reached.
fn unwind_to(block_stack: &mut Vec<BlockRuntime>, target: u32) -> Result<usize, WasmError> {
    loop {
        let top = block_stack.last().ok_or(WasmError::Trap)?;
        if top.marker == target {
            return Ok(top.entry_height);
        }
        block_stack.pop();
    }
}

/// Trims the operand stack to `entry_height` plus the top `arity`
/// values, discarding anything pushed inside the exited block above
/// that — the Wasm branch-arity requirement (§4.4).
fn truncate_to_arity(frame: &mut Frame, entry_height: usize, arity: usize) -> Result<(), WasmError> {
    let len = frame.value_stack.len();
    if len < entry_height + arity {
        return Err(WasmError::Trap);
    }
    let keep_from = len - arity;
    if keep_from > entry_height {
        frame.value_stack.drain(entry_height..keep_from);
    }
    Ok(())
}

fn take_branch(block_stack: &mut Vec<BlockRuntime>, frame: &mut Frame, target: u32, arity: usize) -> Result<(), WasmError> {
    let entry_height = unwind_to(block_stack, target)?;
    truncate_to_arity(frame, entry_height, arity)
}

fn frame_local(frame: &Frame, idx: u32) -> Result<&UntypedVal, WasmError> {
    frame.locals.get(idx as usize).ok_or(WasmError::Trap)
}

fn load_addr(frame: &mut Frame, instr: PreInstr) -> Result<u64, WasmError> {
    let base = frame.pop()?.u32() as u64;
    base.checked_add(instr.operand as u64).ok_or(WasmError::OutOfBoundsMemoryAccess)
}

fn split_off_n(frame: &mut Frame, n: usize) -> Result<Vec<UntypedVal>, WasmError> {
    if frame.value_stack.len() < n {
        return Err(WasmError::Trap);
    }
    Ok(frame.value_stack.split_off(frame.value_stack.len() - n))
}

fn exec_misc(instance: &mut Instance, frame: &mut Frame, instr: PreInstr) -> Result<(), WasmError> {
    let sub = instr.opcode & !misc::BASE;
    match sub {
        misc::MEMORY_COPY => {
            let len = frame.pop()?.u32() as usize;
            let src = frame.pop()?.u32() as u64;
            let dst = frame.pop()?.u32() as u64;
            instance.memories.get_mut(0).ok_or(WasmError::Trap)?.copy_within(dst, src, len)?;
        }
        misc::MEMORY_FILL => {
            let len = frame.pop()?.u32() as usize;
            let val = frame.pop()?.u32() as u8;
            let dst = frame.pop()?.u32() as u64;
            instance.memories.get_mut(0).ok_or(WasmError::Trap)?.fill(dst, val, len)?;
        }
        misc::TABLE_SIZE => {
            let size = instance.tables.get(instr.operand as usize).ok_or(WasmError::Trap)?.size();
            frame.push(UntypedVal::from(size as i32));
        }
        misc::TABLE_GROW => {
            let delta = frame.pop()?.u32() as u64;
            let init = frame.pop()?;
            let init = if init.to_bits() == u64::MAX { None } else { Some(init.u32()) };
            let table = instance.tables.get_mut(instr.operand as usize).ok_or(WasmError::Trap)?;
            frame.push(UntypedVal::from(table.grow(delta, init) as i32));
        }
        misc::TABLE_FILL => {
            let len = frame.pop()?.u32();
            let val = frame.pop()?;
            let val = if val.to_bits() == u64::MAX { None } else { Some(val.u32()) };
            let idx = frame.pop()?.u32();
            instance
                .tables
                .get_mut(instr.operand as usize)
                .ok_or(WasmError::Trap)?
                .fill(idx, val, len)?;
        }
        misc::I32_TRUNC_SAT_F32_S => {
            let v = frame.pop()?.f32();
            frame.push(UntypedVal::from(sat_f32_to_i32(v)));
        }
        misc::I32_TRUNC_SAT_F32_U => {
            let v = frame.pop()?.f32();
            frame.push(UntypedVal::from(sat_f32_to_u32(v) as i32));
        }
        misc::I32_TRUNC_SAT_F64_S => {
            let v = frame.pop()?.f64();
            frame.push(UntypedVal::from(sat_f64_to_i32(v)));
        }
        misc::I32_TRUNC_SAT_F64_U => {
            let v = frame.pop()?.f64();
            frame.push(UntypedVal::from(sat_f64_to_u32(v) as i32));
        }
        misc::I64_TRUNC_SAT_F32_S => {
            let v = frame.pop()?.f32();
            frame.push(UntypedVal::from(sat_f32_to_i64(v)));
        }
        misc::I64_TRUNC_SAT_F32_U => {
            let v = frame.pop()?.f32();
            frame.push(UntypedVal::from(sat_f32_to_u64(v) as i64));
        }
        misc::I64_TRUNC_SAT_F64_S => {
            let v = frame.pop()?.f64();
            frame.push(UntypedVal::from(sat_f64_to_i64(v)));
        }
        misc::I64_TRUNC_SAT_F64_U => {
            let v = frame.pop()?.f64();
            frame.push(UntypedVal::from(sat_f64_to_u64(v) as i64));
        }
        misc::MEMORY_INIT => {
            let len = frame.pop()?.u32() as usize;
            let src = frame.pop()?.u32() as usize;
            let dst = frame.pop()?.u32() as u64;
            let data_idx = instr.operand as usize;
            let dropped = instance.data_dropped.get(data_idx).copied().unwrap_or(true);
            let seg = instance.module.data_segments().get(data_idx).ok_or(WasmError::Trap)?;
            let full = instance.module.bytes_at(seg.bytes);
            let avail = if dropped { 0 } else { full.len() };
            let end = src.checked_add(len).filter(|&e| e <= avail).ok_or(WasmError::Trap)?;
            instance.memories.get_mut(0).ok_or(WasmError::Trap)?.write(dst, &full[src..end])?;
        }
        misc::DATA_DROP => {
            let data_idx = instr.operand as usize;
            let flag = instance.data_dropped.get_mut(data_idx).ok_or(WasmError::Trap)?;
            *flag = true;
        }
        misc::TABLE_INIT => {
            let len = frame.pop()?.u32() as usize;
            let src = frame.pop()?.u32() as usize;
            let dst = frame.pop()?.u32();
            let elem_idx = instr.operand as usize;
            let table_idx = instr.extra as usize;
            let dropped = instance.elem_dropped.get(elem_idx).copied().unwrap_or(true);
            let module = instance.module.clone();
            let seg = module.element_segments().get(elem_idx).ok_or(WasmError::Trap)?;
            let avail = if dropped { 0 } else { seg.items.len() };
            let end = src.checked_add(len).filter(|&e| e <= avail).ok_or(WasmError::Trap)?;
            let items: Vec<Option<u32>> = seg.items[src..end]
                .iter()
                .map(|item| match item {
                    ElemItem::Func(idx) => Some(idx.0),
                    ElemItem::Expr(range) => {
                        eval_const_expr(&module, module.bytes_at(*range)).ok().map(|v| v as u32)
                    }
                })
                .collect();
            instance.tables.get_mut(table_idx).ok_or(WasmError::Trap)?.init(dst, &items)?;
        }
        misc::ELEM_DROP => {
            let elem_idx = instr.operand as usize;
            let flag = instance.elem_dropped.get_mut(elem_idx).ok_or(WasmError::Trap)?;
            *flag = true;
        }
        misc::TABLE_COPY => {
            let len = frame.pop()?.u32();
            let src = frame.pop()?.u32();
            let dst = frame.pop()?.u32();
            let dst_table = instr.extra as usize;
            let src_table = instr.operand as usize;
            if dst_table == src_table {
                instance
                    .tables
                    .get_mut(dst_table)
                    .ok_or(WasmError::Trap)?
                    .copy_within(dst, src, len)?;
            } else {
                let items: Vec<Option<u32>> = {
                    let end = (src as usize)
                        .checked_add(len as usize)
                        .ok_or(WasmError::Trap)?;
                    let table = instance.tables.get(src_table).ok_or(WasmError::Trap)?;
                    (src as usize..end)
                        .map(|i| table.get(i as u32))
                        .collect::<Result<Vec<_>, _>>()?
                };
                instance
                    .tables
                    .get_mut(dst_table)
                    .ok_or(WasmError::Trap)?
                    .init(dst, &items)?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn sat_f32_to_i32(v: f32) -> i32 {
    if v.is_nan() {
        0
    } else {
        v.clamp(i32::MIN as f32, i32::MAX as f32) as i32
    }
}

fn sat_f64_to_i32(v: f64) -> i32 {
    if v.is_nan() {
        0
    } else {
        v.clamp(i32::MIN as f64, i32::MAX as f64) as i32
    }
}

fn sat_f32_to_u32(v: f32) -> u32 {
    if v.is_nan() || v < 0.0 {
        0
    } else {
        v.clamp(0.0, u32::MAX as f32) as u32
    }
}

fn sat_f64_to_u32(v: f64) -> u32 {
    if v.is_nan() || v < 0.0 {
        0
    } else {
        v.clamp(0.0, u32::MAX as f64) as u32
    }
}

fn sat_f32_to_i64(v: f32) -> i64 {
    if v.is_nan() {
        0
    } else {
        v.clamp(i64::MIN as f32, i64::MAX as f32) as i64
    }
}

fn sat_f64_to_i64(v: f64) -> i64 {
    if v.is_nan() {
        0
    } else {
        v.clamp(i64::MIN as f64, i64::MAX as f64) as i64
    }
}

fn sat_f32_to_u64(v: f32) -> u64 {
    if v.is_nan() || v < 0.0 {
        0
    } else {
        v.clamp(0.0, u64::MAX as f32) as u64
    }
}

fn sat_f64_to_u64(v: f64) -> u64 {
    if v.is_nan() || v < 0.0 {
        0
    } else {
        v.clamp(0.0, u64::MAX as f64) as u64
    }
}

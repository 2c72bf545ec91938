//! Lowers a function's raw Wasm code bytes to the fixed-width
//! predecoded instruction stream the Tier-1 interpreter runs (§4.2).

mod fuse;

pub use fuse::fuse;

use wrun_core::{Reader, ValType, WasmError};
use wrun_ir::opcode::{misc, op, slot};
use wrun_ir::PreInstr;

/// A function's local variable declarations plus predecoded body.
#[derive(Debug, Clone, Default)]
pub struct PreFunc {
    pub instrs: Vec<PreInstr>,
    pub consts: Vec<u64>,
    /// Number of local slots, including the leading parameters.
    pub num_locals: u32,
    /// Value type of each local slot, used to zero-initialize frames.
    pub local_types: Vec<ValType>,
}

/// Predecoding failed because the function uses an instruction this
/// tier does not understand (currently: any SIMD opcode). Callers fall
/// back to a raw-bytecode slow path (§4.2 step 7) rather than treating
/// this as a module error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unsupported;

pub enum PredecodeError {
    Invalid(WasmError),
    Unsupported(Unsupported),
}

impl From<WasmError> for PredecodeError {
    fn from(e: WasmError) -> Self {
        Self::Invalid(e)
    }
}

impl From<Unsupported> for PredecodeError {
    fn from(e: Unsupported) -> Self {
        Self::Unsupported(e)
    }
}

/// One entry of the block stack: what kind of structured control the
/// entry opened, and which instruction indices need their branch
/// target patched once the matching `end` (or `else`) is reached.
struct BlockFrame {
    kind: BlockKind,
    /// Index of the opening instruction (`block`/`loop`/`if`).
    opener_idx: usize,
    /// Arity encoding to stamp onto every branch that targets this
    /// label (copied onto `br`/`br_if`/`br_table` entries).
    arity: u16,
    /// Instruction indices whose `operand` must become "the index
    /// right after the matching `end`" once this frame closes.
    pending_end_patches: Vec<usize>,
}

enum BlockKind {
    Block,
    /// `loop_start` is the instruction index branches should jump to
    /// directly — known up front, unlike `block`/`if`.
    Loop { loop_start: usize },
    If {
        data_idx: usize,
        else_seen: bool,
    },
}

struct Predecoder<'a> {
    reader: Reader<'a>,
    instrs: Vec<PreInstr>,
    consts: Vec<u64>,
    blocks: Vec<BlockFrame>,
}

/// Predecodes one function body (the bytes right after the leading
/// `u32` size prefix, up to and including the function's final
/// `end`), given its declared parameter count.
pub fn predecode(code: &[u8], params: &[ValType]) -> Result<PreFunc, PredecodeError> {
    let mut reader = Reader::new(code);
    let mut local_types: Vec<ValType> = params.to_vec();

    let num_local_decls = reader.read_u32_leb()?;
    for _ in 0..num_local_decls {
        let count = reader.read_u32_leb()?;
        let ty = ValType::from_byte(reader.read_u8()?).ok_or(WasmError::InvalidModule)?;
        for _ in 0..count {
            local_types.push(ty);
        }
    }
    let num_locals = local_types.len() as u32;

    let mut pd = Predecoder {
        reader,
        instrs: Vec::new(),
        consts: Vec::new(),
        blocks: Vec::new(),
    };
    pd.run_body()?;

    let fused_instrs = fuse::fuse(pd.instrs);

    Ok(PreFunc {
        instrs: fused_instrs,
        consts: pd.consts,
        num_locals,
        local_types,
    })
}

impl<'a> Predecoder<'a> {
    fn push(&mut self, instr: PreInstr) -> usize {
        self.instrs.push(instr);
        self.instrs.len() - 1
    }

    fn pc(&self) -> usize {
        self.instrs.len()
    }

    fn intern_const(&mut self, bits: u64) -> u32 {
        if let Some(pos) = self.consts.iter().position(|&c| c == bits) {
            pos as u32
        } else {
            self.consts.push(bits);
            (self.consts.len() - 1) as u32
        }
    }

    fn run_body(&mut self) -> Result<(), PredecodeError> {
        loop {
            let opcode_byte = self.reader.read_u8()?;
            match opcode_byte {
                b if b == op::SIMD_PREFIX => return Err(Unsupported.into()),
                b if b == op::MISC_PREFIX => self.misc_instr()?,
                _ => {
                    let done = self.plain_instr(opcode_byte)?;
                    if done {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Decodes a `blocktype`: an `s33` LEB128 value where `-64` means
    /// empty, `-1..=-5`/`-16`/`-17` name a single result value type,
    /// and any non-negative value is a type-section index (§3 "Block
    /// arity", §9 "Block arity by type index"). The type index, when
    /// present, is packed into the low 15 bits alongside the by-type
    /// flag, leaving every opener's `operand` field free for its own
    /// purpose (a branch target, for `if`).
    fn block_type(&mut self) -> Result<u16, WasmError> {
        let raw = self.reader.read_i64_leb()?;
        if raw == -64 {
            return Ok(PreInstr::encode_arity_inline(0));
        }
        if (-17..0).contains(&raw) {
            return Ok(PreInstr::encode_arity_inline(1));
        }
        if raw < 0 || raw > 0x7FFF {
            return Err(WasmError::InvalidModule);
        }
        Ok(PreInstr::encode_arity_by_type() | raw as u16)
    }

    fn record_branch_target(&mut self, depth: u32, instr_idx: usize) -> Result<(), WasmError> {
        let len = self.blocks.len();
        let target_level = len
            .checked_sub(1)
            .and_then(|top| top.checked_sub(depth as usize))
            .ok_or(WasmError::InvalidModule)?;
        let frame = &mut self.blocks[target_level];
        match frame.kind {
            BlockKind::Loop { loop_start } => {
                self.instrs[instr_idx].operand = loop_start as u32;
            }
            BlockKind::Block | BlockKind::If { .. } => {
                frame.pending_end_patches.push(instr_idx);
            }
        }
        Ok(())
    }

    fn arity_at_depth(&self, depth: u32) -> Result<u16, WasmError> {
        let len = self.blocks.len();
        let idx = len
            .checked_sub(1)
            .and_then(|top| top.checked_sub(depth as usize))
            .ok_or(WasmError::InvalidModule)?;
        Ok(self.blocks[idx].arity)
    }

    /// Decodes and emits one plain (non-prefixed) opcode. Returns
    /// `true` once the function's final `end` has been consumed.
    fn plain_instr(&mut self, byte: u8) -> Result<bool, PredecodeError> {
        let opcode = byte as u16;
        match opcode {
            op::BLOCK => {
                let arity = self.block_type()?;
                let idx = self.push(PreInstr::new(op::BLOCK, arity, 0));
                self.blocks.push(BlockFrame {
                    kind: BlockKind::Block,
                    opener_idx: idx,
                    arity,
                    // The opener's own `operand` is end-patched exactly
                    // like a branch targeting this label, so the runtime
                    // block stack can recover this block's exit point
                    // from the opener instruction alone (§4.4 branch-
                    // arity trim).
                    pending_end_patches: vec![idx],
                });
            }
            op::LOOP => {
                let arity = self.block_type()?;
                let idx = self.push(PreInstr::new(op::LOOP, arity, 0));
                // A loop's label targets its own start, known immediately
                // (unlike block/if, which need the later `end`).
                self.instrs[idx].operand = idx as u32;
                self.blocks.push(BlockFrame {
                    kind: BlockKind::Loop { loop_start: idx },
                    opener_idx: idx,
                    arity,
                    pending_end_patches: Vec::new(),
                });
            }
            op::IF => {
                let arity = self.block_type()?;
                let opener_idx = self.push(PreInstr::new(op::IF, arity, 0));
                let data_idx = self.push(PreInstr::new(slot::IF_DATA, 0, 0));
                self.blocks.push(BlockFrame {
                    kind: BlockKind::If {
                        data_idx,
                        else_seen: false,
                    },
                    opener_idx,
                    arity,
                    pending_end_patches: vec![opener_idx],
                });
            }
            0x05 => {
                // else
                let frame = self.blocks.last_mut().ok_or(WasmError::InvalidModule)?;
                let (data_idx, arity) = match &mut frame.kind {
                    BlockKind::If {
                        data_idx,
                        else_seen,
                    } => {
                        *else_seen = true;
                        (*data_idx, frame.arity)
                    }
                    _ => return Err(WasmError::InvalidModule.into()),
                };
                // opener's false-target is the else body start; it was
                // queued in pending_end_patches by mistake for the
                // no-else case, remove that and patch directly.
                frame.pending_end_patches.retain(|&i| i != frame.opener_idx);
                let opener_idx = frame.opener_idx;
                self.instrs[opener_idx].operand = self.pc() as u32;
                self.instrs[data_idx].extra = 1;
                // Falling off the then-branch must skip the else-branch;
                // emit a `br 0`-equivalent jump patched to the end.
                let br_idx = self.push(PreInstr::new(op::BR, arity, 0));
                let blocks_len = self.blocks.len();
                self.blocks[blocks_len - 1].pending_end_patches.push(br_idx);
            }
            op::END => {
                match self.blocks.pop() {
                    None => {
                        // Function-level `end`.
                        return Ok(true);
                    }
                    Some(frame) => {
                        let end_pc = self.pc() as u32;
                        for idx in frame.pending_end_patches {
                            self.instrs[idx].operand = end_pc;
                        }
                        if let BlockKind::If { data_idx, .. } = frame.kind {
                            self.instrs[data_idx].operand = end_pc;
                        }
                        // Emitted so the runtime block stack has a
                        // dispatch point to pop this label's frame on —
                        // every branch resolved against this label was
                        // patched to `end_pc`, which is exactly this
                        // instruction's index.
                        self.push(PreInstr::new(op::END, 0, 0));
                    }
                }
            }
            op::BR | op::BR_IF => {
                let depth = self.reader.read_u32_leb()?;
                let arity = self.arity_at_depth(depth)?;
                let idx = self.push(PreInstr::new(opcode, arity, 0));
                self.record_branch_target(depth, idx)?;
            }
            op::BR_TABLE => {
                let count = self.reader.read_u32_leb()?;
                if count > u16::MAX as u32 {
                    return Err(WasmError::InvalidModule.into());
                }
                let mut depths = Vec::with_capacity(count as usize + 1);
                for _ in 0..count {
                    depths.push(self.reader.read_u32_leb()?);
                }
                let default_depth = self.reader.read_u32_leb()?;
                depths.push(default_depth);
                self.push(PreInstr::new(op::BR_TABLE, count as u16, 0));
                for depth in depths {
                    let arity = self.arity_at_depth(depth)?;
                    let idx = self.push(PreInstr::new(slot::BR_TABLE_ENTRY, arity, 0));
                    self.record_branch_target(depth, idx)?;
                }
            }
            op::RETURN
            | op::UNREACHABLE
            | op::NOP
            | op::DROP
            | op::SELECT
            | op::I32_EQZ
            | op::I64_EQZ
            | op::REF_IS_NULL => {
                self.push(PreInstr::new(opcode, 0, 0));
            }
            op::SELECT_T => {
                // `select t*`: reads and discards the declared result
                // type vector (§9, reuses the plain select handler).
                let count = self.reader.read_u32_leb()?;
                for _ in 0..count {
                    ValType::from_byte(self.reader.read_u8()?).ok_or(WasmError::InvalidModule)?;
                }
                self.push(PreInstr::new(op::SELECT, 0, 0));
            }
            op::CALL => {
                let func_idx = self.reader.read_u32_leb()?;
                self.push(PreInstr::new(opcode, 0, func_idx));
            }
            op::CALL_INDIRECT => {
                let type_idx = self.reader.read_u32_leb()?;
                let table_idx = self.reader.read_u32_leb()?;
                if table_idx > u16::MAX as u32 {
                    return Err(WasmError::InvalidModule.into());
                }
                self.push(PreInstr::new(opcode, table_idx as u16, type_idx));
            }
            op::LOCAL_GET | op::LOCAL_SET | op::LOCAL_TEE => {
                let local_idx = self.reader.read_u32_leb()?;
                self.push(PreInstr::new(opcode, 0, local_idx));
            }
            op::GLOBAL_GET | op::GLOBAL_SET => {
                let global_idx = self.reader.read_u32_leb()?;
                self.push(PreInstr::new(opcode, 0, global_idx));
            }
            op::TABLE_GET | op::TABLE_SET => {
                let table_idx = self.reader.read_u32_leb()?;
                self.push(PreInstr::new(opcode, 0, table_idx));
            }
            _ if is_memory_op(byte) => {
                let align = self.reader.read_u32_leb()?;
                let offset = self.reader.read_u32_leb()?;
                if align > u16::MAX as u32 {
                    return Err(WasmError::InvalidModule.into());
                }
                self.push(PreInstr::new(opcode, align as u16, offset));
            }
            op::MEMORY_SIZE | op::MEMORY_GROW => {
                let _reserved = self.reader.read_u8()?;
                self.push(PreInstr::new(opcode, 0, 0));
            }
            op::I32_CONST => {
                let v = self.reader.read_i32_leb()?;
                self.push(PreInstr::new(opcode, 0, v as u32));
            }
            op::F32_CONST => {
                let v = self.reader.read_f32()?;
                self.push(PreInstr::new(opcode, 0, v.to_bits()));
            }
            op::I64_CONST => {
                let v = self.reader.read_i64_leb()?;
                let idx = self.intern_const(v as u64);
                self.push(PreInstr::new(opcode, 0, idx));
            }
            op::F64_CONST => {
                let v = self.reader.read_f64()?;
                let idx = self.intern_const(v.to_bits());
                self.push(PreInstr::new(opcode, 0, idx));
            }
            op::REF_NULL => {
                let ty = ValType::from_byte(self.reader.read_u8()?).ok_or(WasmError::InvalidModule)?;
                self.push(PreInstr::new(opcode, ty as u16, 0));
            }
            op::REF_FUNC => {
                let func_idx = self.reader.read_u32_leb()?;
                self.push(PreInstr::new(opcode, 0, func_idx));
            }
            _ if is_plain_numeric(byte) => {
                self.push(PreInstr::new(opcode, 0, 0));
            }
            _ => return Err(WasmError::InvalidModule.into()),
        }
        Ok(false)
    }

    fn misc_instr(&mut self) -> Result<(), PredecodeError> {
        let sub = self.reader.read_u32_leb()?;
        let sub = u16::try_from(sub).map_err(|_| WasmError::InvalidModule)?;
        let opcode = misc::BASE | sub;
        match sub {
            misc::MEMORY_INIT => {
                let data_idx = self.reader.read_u32_leb()?;
                let _mem_idx = self.reader.read_u8()?;
                self.push(PreInstr::new(opcode, 0, data_idx));
            }
            misc::DATA_DROP => {
                let data_idx = self.reader.read_u32_leb()?;
                self.push(PreInstr::new(opcode, 0, data_idx));
            }
            misc::MEMORY_COPY => {
                let _dst = self.reader.read_u8()?;
                let _src = self.reader.read_u8()?;
                self.push(PreInstr::new(opcode, 0, 0));
            }
            misc::MEMORY_FILL => {
                let _mem = self.reader.read_u8()?;
                self.push(PreInstr::new(opcode, 0, 0));
            }
            misc::TABLE_INIT => {
                let elem_idx = self.reader.read_u32_leb()?;
                let table_idx = self.reader.read_u32_leb()?;
                if table_idx > u16::MAX as u32 {
                    return Err(WasmError::InvalidModule.into());
                }
                self.push(PreInstr::new(opcode, table_idx as u16, elem_idx));
            }
            misc::ELEM_DROP => {
                let elem_idx = self.reader.read_u32_leb()?;
                self.push(PreInstr::new(opcode, 0, elem_idx));
            }
            misc::TABLE_COPY => {
                let dst = self.reader.read_u32_leb()?;
                let src = self.reader.read_u32_leb()?;
                if dst > u16::MAX as u32 {
                    return Err(WasmError::InvalidModule.into());
                }
                self.push(PreInstr::new(opcode, dst as u16, src));
            }
            misc::TABLE_GROW | misc::TABLE_SIZE | misc::TABLE_FILL => {
                let table_idx = self.reader.read_u32_leb()?;
                self.push(PreInstr::new(opcode, 0, table_idx));
            }
            misc::I32_TRUNC_SAT_F32_S
            | misc::I32_TRUNC_SAT_F32_U
            | misc::I32_TRUNC_SAT_F64_S
            | misc::I32_TRUNC_SAT_F64_U
            | misc::I64_TRUNC_SAT_F32_S
            | misc::I64_TRUNC_SAT_F32_U
            | misc::I64_TRUNC_SAT_F64_S
            | misc::I64_TRUNC_SAT_F64_U => {
                self.push(PreInstr::new(opcode, 0, 0));
            }
            _ => return Err(WasmError::InvalidModule.into()),
        };
        Ok(())
    }
}

/// True for every load/store opcode, which all share the
/// `(align, offset)` memarg immediate shape. These occupy one
/// contiguous range in the core opcode table (§4.1).
fn is_memory_op(byte: u8) -> bool {
    (op::I32_LOAD..=op::I64_STORE32).contains(&(byte as u16))
}

/// True for the large contiguous run of comparison/arithmetic/
/// conversion opcodes that take no immediate operand at all.
fn is_plain_numeric(byte: u8) -> bool {
    matches!(byte as u16,
        0x46..=0x66 | 0x67..=0xA6 | 0xA7..=0xBF | 0xC0..=0xC4
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use wrun_ir::opcode::fused;

    fn params_none() -> Vec<ValType> {
        Vec::new()
    }

    #[test]
    fn predecodes_i32_add_of_two_locals() {
        // locals: none; body: local.get 0, local.get 1, i32.add, end
        let code = [0x00, 0x20, 0x00, 0x20, 0x01, 0x6A, 0x0B];
        let params = vec![ValType::I32, ValType::I32];
        let func = predecode(&code, &params).map_err(|_| ()).unwrap();
        assert_eq!(func.num_locals, 2);
        // Peephole fusion overwrites the window's first slot but keeps
        // the stream length unchanged (§4.2 "Peephole fusion").
        assert_eq!(func.instrs.len(), 3);
        assert_eq!(func.instrs[0].opcode, fused::LOCALS_ADD);
    }

    #[test]
    fn predecodes_if_else() {
        // locals: none; body:
        // i32.const 1, if (result i32), i32.const 2, else, i32.const 3, end, end
        let code = [
            0x00, 0x41, 0x01, 0x04, 0x7F, 0x41, 0x02, 0x05, 0x41, 0x03, 0x0B, 0x0B,
        ];
        let func = predecode(&code, &params_none()).map_err(|_| ()).unwrap();
        assert!(func.instrs.iter().any(|i| i.opcode == op::IF));
        assert!(func.instrs.iter().any(|i| i.opcode == slot::IF_DATA));
    }

    #[test]
    fn rejects_simd_as_unsupported() {
        let code = [0x00, 0xFD, 0x00, 0x0B];
        let err = predecode(&code, &params_none()).unwrap_err();
        assert!(matches!(err, PredecodeError::Unsupported(_)));
    }

    #[test]
    fn loop_branch_targets_loop_start() {
        // locals: none; body: loop, br 0, end, end
        let code = [0x00, 0x03, 0x40, 0x0C, 0x00, 0x0B, 0x0B];
        let func = predecode(&code, &params_none()).map_err(|_| ()).unwrap();
        let loop_idx = func
            .instrs
            .iter()
            .position(|i| i.opcode == op::LOOP)
            .unwrap();
        let br_idx = func.instrs.iter().position(|i| i.opcode == op::BR).unwrap();
        assert_eq!(func.instrs[br_idx].operand, loop_idx as u32);
    }
}

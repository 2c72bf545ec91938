//! Fixed-width bytecode representations shared by the predecoder,
//! register allocator, and execution tiers.
//!
//! Mirrors the split between `wasmi_ir` (fixed-width instruction
//! encoding) and `wasmi_ir2` (the newer register-machine encoding) in
//! the teacher crate: [`PreInstr`] is the Tier-1 fixed-width form
//! (SPEC_FULL.md §3 "Predecoded instruction"), [`RegInstr`]/[`RegFunc`]
//! are the three-operand Tier-2/Tier-3 form (§3 "Register IR").

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(not(feature = "std"))]
extern crate alloc;
#[cfg(feature = "std")]
extern crate std as alloc;

pub mod opcode;
mod preinstr;
mod regir;

pub use preinstr::{PreInstr, ARITY_BY_TYPE_FLAG};
pub use regir::{regop, RegFunc, RegInstr};

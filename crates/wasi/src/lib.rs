//! WASI `preview1` host-function surface for the wrun runtime
//! (§6 "a simple adapter maps WASI Preview-2 interface names ... to
//! their Preview-1 function groups").
//!
//! Unlike the teacher crate, which wraps the heavier `wasi-common`/
//! `wiggle` stack, these host functions are implemented directly
//! against `std::io`/`rand`: the expanded spec treats WASI as an
//! external collaborator (an interface, not part of the core), and a
//! faithful-but-small Preview1 surface is enough to run the `hello`/
//! `proc_exit` class of guest programs this crate targets.

mod snapshot_preview1;

pub use snapshot_preview1::WasiCtx;

use snapshot_preview1 as p1;
use wrun::Linker;

/// Registers every supported `wasi_snapshot_preview1` function into
/// `linker` under the `wasi_snapshot_preview1` module name, closing
/// over a clone of `ctx` for functions that need guest-visible state
/// (`args_get`, `environ_get`, ...).
pub fn add_to_linker(linker: &mut Linker, ctx: WasiCtx) {
    p1::add_args(linker, ctx.clone());
    p1::add_environ(linker, ctx.clone());
    p1::add_fd(linker);
    p1::add_clock(linker);
    p1::add_random(linker);
    p1::add_proc(linker);
}

//! Black-box execution scenarios exercising recursive `call` and a
//! `call_indirect` type mismatch, complementing the smaller decode-
//! level fixtures in `src/lib.rs`'s own `#[cfg(test)]` module.

use wrun::{Engine, Instance, Linker, Module};
use wrun_core::{UntypedVal, WasmError};

/// `fib(n: i32) -> i32`, computed by direct recursive `call` (no
/// memoization): exercises `Engine::call`'s re-entrant call stack and
/// the predecoder's `if`/`else` block-stack patching together.
fn fib_module_bytes() -> Vec<u8> {
    let mut bytes = vec![0x00, 0x61, 0x73, 0x6D, 0x01, 0x00, 0x00, 0x00];
    // type: (i32) -> i32
    bytes.extend_from_slice(&[1, 6, 1, 0x60, 1, 0x7F, 1, 0x7F]);
    // function: 1 fn, type 0
    bytes.extend_from_slice(&[3, 2, 1, 0]);
    // export: "fib" -> func 0
    bytes.extend_from_slice(&[7, 7, 1, 3, b'f', b'i', b'b', 0x00, 0x00]);
    // code: locals none;
    //   local.get 0; i32.const 2; i32.lt_s
    //   if (result i32)
    //     local.get 0
    //   else
    //     local.get 0; i32.const 1; i32.sub; call 0
    //     local.get 0; i32.const 2; i32.sub; call 0
    //     i32.add
    //   end
    //   end
    bytes.extend_from_slice(&[
        10, 30, 1, 28, 0, 0x20, 0x00, 0x41, 0x02, 0x48, 0x04, 0x7F, 0x20, 0x00, 0x05, 0x20, 0x00,
        0x41, 0x01, 0x6B, 0x10, 0x00, 0x20, 0x00, 0x41, 0x02, 0x6B, 0x10, 0x00, 0x6A, 0x0B, 0x0B,
    ]);
    bytes
}

#[test]
fn recursive_call_computes_fibonacci() {
    let module = Module::new(fib_module_bytes()).unwrap();
    let linker = Linker::new();
    let mut instance = Instance::instantiate(module, &linker).unwrap();
    let func_idx = instance.export_func_index("fib").unwrap();
    let results = Engine::call(&mut instance, func_idx, &[UntypedVal::from(10i32)]).unwrap();
    assert_eq!(results[0].i32(), 55);
}

/// A funcref table holding one `() -> i32` function, called through
/// `call_indirect` declared against an incompatible `(i32) -> i32`
/// type: the signature mismatch must trap rather than execute.
fn call_indirect_mismatch_module_bytes() -> Vec<u8> {
    let mut bytes = vec![0x00, 0x61, 0x73, 0x6D, 0x01, 0x00, 0x00, 0x00];
    // type 0: () -> i32; type 1: (i32) -> i32
    bytes.extend_from_slice(&[1, 10, 2, 0x60, 0, 1, 0x7F, 0x60, 1, 0x7F, 1, 0x7F]);
    // function: 2 fns, both type 0 (func0 returns 42; func1 is "main")
    bytes.extend_from_slice(&[3, 3, 2, 0, 0]);
    // table: 1 funcref table, min=1, no max
    bytes.extend_from_slice(&[4, 4, 1, 0x70, 0x00, 0x01]);
    // export: "main" -> func 1
    bytes.extend_from_slice(&[7, 8, 1, 4, b'm', b'a', b'i', b'n', 0x00, 0x01]);
    // element: active, table 0, offset i32.const 0, func indices [0]
    bytes.extend_from_slice(&[9, 7, 1, 0, 0x41, 0x00, 0x0B, 1, 0]);
    // code: func0 = i32.const 42; end
    //       func1 = i32.const 0; call_indirect (type 1, table 0); end
    bytes.extend_from_slice(&[
        10, 14, 2, 4, 0, 0x41, 0x2A, 0x0B, 7, 0, 0x41, 0x00, 0x11, 0x01, 0x00, 0x0B,
    ]);
    bytes
}

#[test]
fn call_indirect_signature_mismatch_traps() {
    let module = Module::new(call_indirect_mismatch_module_bytes()).unwrap();
    let linker = Linker::new();
    let mut instance = Instance::instantiate(module, &linker).unwrap();
    let func_idx = instance.export_func_index("main").unwrap();
    let err = Engine::call(&mut instance, func_idx, &[]).unwrap_err();
    assert_eq!(err, WasmError::Trap);
}

use std::io::{Read, Write};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use wrun::{Instance, Linker};
use wrun_core::{FuncType, UntypedVal, ValType, WasmError};

const ESUCCESS: i32 = 0;
const EBADF: i32 = 8;
const EIO: i32 = 29;

/// Guest-visible process state handed to the guest through `args_get`/
/// `environ_get` and friends.
#[derive(Clone)]
pub struct WasiCtx {
    inner: Arc<Mutex<WasiState>>,
}

#[derive(Default)]
struct WasiState {
    args: Vec<String>,
    envs: Vec<(String, String)>,
}

impl WasiCtx {
    pub fn builder() -> WasiCtxBuilder {
        WasiCtxBuilder::default()
    }
}

/// Builds a [`WasiCtx`], mirroring the teacher's `WasiCtxBuilder`.
#[derive(Default)]
pub struct WasiCtxBuilder {
    state: WasiState,
}

impl WasiCtxBuilder {
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.state.args.push(arg.into());
        self
    }

    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        for arg in args {
            self = self.arg(arg);
        }
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.state.envs.push((key.into(), value.into()));
        self
    }

    pub fn build(self) -> WasiCtx {
        WasiCtx {
            inner: Arc::new(Mutex::new(self.state)),
        }
    }
}

fn mem<'a>(instance: &'a mut Instance) -> Result<&'a mut wrun::runtime::Memory, WasmError> {
    instance.memories.get_mut(0).ok_or(WasmError::Trap)
}

fn write_u32(instance: &mut Instance, ptr: u32, value: u32) -> Result<(), WasmError> {
    mem(instance)?.write(ptr as u64, &value.to_le_bytes())
}

fn read_u32(instance: &mut Instance, ptr: u32) -> Result<u32, WasmError> {
    let bytes = mem(instance)?.read(ptr as u64, 4)?;
    Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
}

fn i32_arg(args: &[UntypedVal], idx: usize) -> u32 {
    args[idx].i32() as u32
}

fn func_type(params: usize) -> FuncType {
    FuncType::new(vec![ValType::I32; params], [ValType::I32])
}

pub fn add_args(linker: &mut Linker, ctx: WasiCtx) {
    let c = ctx.clone();
    linker.define_func("wasi_snapshot_preview1", "args_sizes_get", func_type(2), move |instance, args| {
        let state = c.inner.lock().unwrap();
        let count = state.args.len() as u32;
        let buf_size: u32 = state.args.iter().map(|a| a.len() as u32 + 1).sum();
        drop(state);
        write_u32(instance, i32_arg(args, 0), count)?;
        write_u32(instance, i32_arg(args, 1), buf_size)?;
        Ok(vec![UntypedVal::from(ESUCCESS)])
    });

    linker.define_func("wasi_snapshot_preview1", "args_get", func_type(2), move |instance, args| {
        let state = ctx.inner.lock().unwrap();
        let entries: Vec<String> = state.args.clone();
        drop(state);
        let mut argv_ptr = i32_arg(args, 0);
        let mut buf_ptr = i32_arg(args, 1);
        for entry in &entries {
            write_u32(instance, argv_ptr, buf_ptr)?;
            let mut bytes = entry.clone().into_bytes();
            bytes.push(0);
            mem(instance)?.write(buf_ptr as u64, &bytes)?;
            buf_ptr += bytes.len() as u32;
            argv_ptr += 4;
        }
        Ok(vec![UntypedVal::from(ESUCCESS)])
    });
}

pub fn add_environ(linker: &mut Linker, ctx: WasiCtx) {
    let c = ctx.clone();
    linker.define_func("wasi_snapshot_preview1", "environ_sizes_get", func_type(2), move |instance, args| {
        let state = c.inner.lock().unwrap();
        let count = state.envs.len() as u32;
        let buf_size: u32 = state
            .envs
            .iter()
            .map(|(k, v)| k.len() as u32 + v.len() as u32 + 2)
            .sum();
        drop(state);
        write_u32(instance, i32_arg(args, 0), count)?;
        write_u32(instance, i32_arg(args, 1), buf_size)?;
        Ok(vec![UntypedVal::from(ESUCCESS)])
    });

    linker.define_func("wasi_snapshot_preview1", "environ_get", func_type(2), move |instance, args| {
        let state = ctx.inner.lock().unwrap();
        let entries: Vec<(String, String)> = state.envs.clone();
        drop(state);
        let mut environ_ptr = i32_arg(args, 0);
        let mut buf_ptr = i32_arg(args, 1);
        for (k, v) in &entries {
            write_u32(instance, environ_ptr, buf_ptr)?;
            let mut bytes = format!("{k}={v}").into_bytes();
            bytes.push(0);
            mem(instance)?.write(buf_ptr as u64, &bytes)?;
            buf_ptr += bytes.len() as u32;
            environ_ptr += 4;
        }
        Ok(vec![UntypedVal::from(ESUCCESS)])
    });
}

/// Reads the `iovs_len` `(ptr, len)` pairs starting at `iovs_ptr` and
/// returns the concatenated guest-memory ranges they describe.
fn read_iovecs(instance: &mut Instance, iovs_ptr: u32, iovs_len: u32) -> Result<Vec<(u32, u32)>, WasmError> {
    let mut out = Vec::with_capacity(iovs_len as usize);
    for i in 0..iovs_len {
        let base = iovs_ptr + i * 8;
        let ptr = read_u32(instance, base)?;
        let len = read_u32(instance, base + 4)?;
        out.push((ptr, len));
    }
    Ok(out)
}

pub fn add_fd(linker: &mut Linker) {
    linker.define_func("wasi_snapshot_preview1", "fd_write", func_type(4), |instance, args| {
        let fd = i32_arg(args, 0) as i32;
        let iovs_ptr = i32_arg(args, 1);
        let iovs_len = i32_arg(args, 2);
        let nwritten_ptr = i32_arg(args, 3);
        tracing::trace!(target: "wasi", fd, iovs_len, "fd_write");
        let iovecs = read_iovecs(instance, iovs_ptr, iovs_len)?;
        let mut total = 0u32;
        let mut buf = Vec::new();
        for (ptr, len) in iovecs {
            buf.extend_from_slice(mem(instance)?.read(ptr as u64, len as usize)?);
            total += len;
        }
        let result = match fd {
            1 => std::io::stdout().write_all(&buf),
            2 => std::io::stderr().write_all(&buf),
            _ => return Ok(vec![UntypedVal::from(EBADF)]),
        };
        if result.is_err() {
            return Ok(vec![UntypedVal::from(EIO)]);
        }
        write_u32(instance, nwritten_ptr, total)?;
        Ok(vec![UntypedVal::from(ESUCCESS)])
    });

    linker.define_func("wasi_snapshot_preview1", "fd_read", func_type(4), |instance, args| {
        let fd = i32_arg(args, 0) as i32;
        if fd != 0 {
            return Ok(vec![UntypedVal::from(EBADF)]);
        }
        let iovs_ptr = i32_arg(args, 1);
        let iovs_len = i32_arg(args, 2);
        let nread_ptr = i32_arg(args, 3);
        let iovecs = read_iovecs(instance, iovs_ptr, iovs_len)?;
        let mut total = 0u32;
        for (ptr, len) in iovecs {
            let mut chunk = vec![0u8; len as usize];
            let n = std::io::stdin().read(&mut chunk).unwrap_or(0);
            mem(instance)?.write(ptr as u64, &chunk[..n])?;
            total += n as u32;
            if n < len as usize {
                break;
            }
        }
        write_u32(instance, nread_ptr, total)?;
        Ok(vec![UntypedVal::from(ESUCCESS)])
    });

    linker.define_func("wasi_snapshot_preview1", "fd_close", func_type(1), |_instance, _args| {
        Ok(vec![UntypedVal::from(ESUCCESS)])
    });

    linker.define_func(
        "wasi_snapshot_preview1",
        "sched_yield",
        FuncType::new([], [ValType::I32]),
        |_instance, _args| Ok(vec![UntypedVal::from(ESUCCESS)]),
    );
}

pub fn add_clock(linker: &mut Linker) {
    linker.define_func(
        "wasi_snapshot_preview1",
        "clock_time_get",
        FuncType::new([ValType::I32, ValType::I64, ValType::I32], [ValType::I32]),
        |instance, args| {
            let time_ptr = i32_arg(args, 2);
            let nanos = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map_err(|_| WasmError::Trap)?
                .as_nanos() as u64;
            mem(instance)?.write(time_ptr as u64, &nanos.to_le_bytes())?;
            Ok(vec![UntypedVal::from(ESUCCESS)])
        },
    );
}

pub fn add_random(linker: &mut Linker) {
    linker.define_func("wasi_snapshot_preview1", "random_get", func_type(2), |instance, args| {
        let buf_ptr = i32_arg(args, 0);
        let buf_len = i32_arg(args, 1);
        let bytes: Vec<u8> = (0..buf_len).map(|_| rand::random::<u8>()).collect();
        mem(instance)?.write(buf_ptr as u64, &bytes)?;
        Ok(vec![UntypedVal::from(ESUCCESS)])
    });
}

pub fn add_proc(linker: &mut Linker) {
    linker.define_func(
        "wasi_snapshot_preview1",
        "proc_exit",
        FuncType::new([ValType::I32], []),
        |_instance, args| {
            let code = i32_arg(args, 0) as i32;
            tracing::debug!(target: "wasi", code, "proc_exit");
            // `proc_exit` never returns to the caller per the WASI spec;
            // terminating the host process directly is the faithful
            // behavior for a CLI embedding and avoids adding a second,
            // payload-carrying error channel alongside the flat
            // ordinal-based `WasmError` the JIT trampoline also uses.
            std::process::exit(code);
        },
    );

    // Left unmapped (no guest program in this collaborator's scope
    // needs them): fd_fdstat_get, fd_seek, fd_filestat_get, path_open,
    // poll_oneoff. See DESIGN.md.
}

#[cfg(test)]
mod tests {
    use super::*;
    use wrun::{Engine, Module};

    /// A module importing one `fd_write`-shaped function and declaring
    /// a one-page memory, with no functions or exports of its own —
    /// enough to exercise host-function registration directly through
    /// `Engine::call` at the import's function index.
    fn fd_write_import_module() -> Vec<u8> {
        let mut bytes = vec![0x00, 0x61, 0x73, 0x6D, 0x01, 0x00, 0x00, 0x00];
        bytes.extend_from_slice(&[1, 9, 1, 0x60, 4, 0x7F, 0x7F, 0x7F, 0x7F, 1, 0x7F]);
        let module_name = b"wasi_snapshot_preview1";
        let field_name = b"fd_write";
        let mut import = vec![1u8, module_name.len() as u8];
        import.extend_from_slice(module_name);
        import.push(field_name.len() as u8);
        import.extend_from_slice(field_name);
        import.push(0x00);
        import.push(0);
        bytes.push(2);
        bytes.push(import.len() as u8);
        bytes.extend(import);
        bytes.extend_from_slice(&[5, 3, 1, 0x00, 1]);
        bytes
    }

    #[test]
    fn fd_write_writes_to_stdout_and_reports_length() {
        let module = Module::new(fd_write_import_module()).unwrap();
        let mut linker = Linker::new();
        add_fd(&mut linker);
        let mut instance = Instance::instantiate(module, &linker).unwrap();

        // iovec at offset 0: (ptr=100, len=3); guest bytes "hi\n" at 100.
        instance.memories[0].write(0, &100u32.to_le_bytes()).unwrap();
        instance.memories[0].write(4, &3u32.to_le_bytes()).unwrap();
        instance.memories[0].write(100, b"hi\n").unwrap();

        let results = Engine::call(
            &mut instance,
            0,
            &[
                UntypedVal::from(1i32),
                UntypedVal::from(0i32),
                UntypedVal::from(1i32),
                UntypedVal::from(16i32),
            ],
        )
        .unwrap();
        assert_eq!(results[0].i32(), ESUCCESS);
        let nwritten = u32::from_le_bytes(instance.memories[0].read(16, 4).unwrap().try_into().unwrap());
        assert_eq!(nwritten, 3);
    }

    #[test]
    fn fd_write_to_unknown_fd_reports_ebadf() {
        let module = Module::new(fd_write_import_module()).unwrap();
        let mut linker = Linker::new();
        add_fd(&mut linker);
        let mut instance = Instance::instantiate(module, &linker).unwrap();
        instance.memories[0].write(0, &0u32.to_le_bytes()).unwrap();
        instance.memories[0].write(4, &0u32.to_le_bytes()).unwrap();

        let results = Engine::call(
            &mut instance,
            0,
            &[
                UntypedVal::from(9i32),
                UntypedVal::from(0i32),
                UntypedVal::from(0i32),
                UntypedVal::from(16i32),
            ],
        )
        .unwrap();
        assert_eq!(results[0].i32(), EBADF);
    }

    #[test]
    fn args_sizes_get_reports_argument_count_and_buffer_size() {
        let mut linker = Linker::new();
        add_fd(&mut linker);
        let ctx = WasiCtx::builder().arg("prog").arg("a").build();
        add_args(&mut linker, ctx);

        // args_get/args_sizes_get aren't imported by this fixture module,
        // so resolve the host function straight from the linker for a
        // unit-level check rather than routing it through a call opcode.
        let ty = FuncType::new([ValType::I32, ValType::I32], [ValType::I32]);
        let host = linker.resolve_func("wasi_snapshot_preview1", "args_sizes_get", &ty).unwrap();
        let module = Module::new(fd_write_import_module()).unwrap();
        let mut instance = Instance::instantiate(module, &linker).unwrap();
        let result = (host.func)(&mut instance, &[UntypedVal::from(0i32), UntypedVal::from(4i32)]).unwrap();
        assert_eq!(result[0].i32(), ESUCCESS);
        let count = u32::from_le_bytes(instance.memories[0].read(0, 4).unwrap().try_into().unwrap());
        assert_eq!(count, 2);
        let buf_size = u32::from_le_bytes(instance.memories[0].read(4, 4).unwrap().try_into().unwrap());
        assert_eq!(buf_size, "prog\0".len() as u32 + "a\0".len() as u32);
    }
}

use wrun_core::{WasmError, PAGE_SIZE};

/// A growable linear memory instance, page-addressed (§5 "Linear
/// memory").
#[derive(Debug, Clone)]
pub struct Memory {
    bytes: Vec<u8>,
    max_pages: Option<u64>,
}

impl Memory {
    pub fn new(min_pages: u64, max_pages: Option<u64>) -> Self {
        Self {
            bytes: vec![0u8; (min_pages * PAGE_SIZE) as usize],
            max_pages,
        }
    }

    pub fn size_pages(&self) -> u64 {
        self.bytes.len() as u64 / PAGE_SIZE
    }

    /// Grows by `delta` pages. Returns the previous size in pages on
    /// success, or `-1` (as `u32::MAX` cast, per the Wasm `memory.grow`
    /// convention) if growth would exceed the declared maximum or the
    /// host allocation fails.
    pub fn grow(&mut self, delta: u64) -> i64 {
        let current = self.size_pages();
        let new_size = match current.checked_add(delta) {
            Some(n) => n,
            None => return -1,
        };
        if let Some(max) = self.max_pages {
            if new_size > max {
                return -1;
            }
        }
        let new_len = (new_size * PAGE_SIZE) as usize;
        if self.bytes.try_reserve(new_len - self.bytes.len()).is_err() {
            return -1;
        }
        self.bytes.resize(new_len, 0);
        current as i64
    }

    fn bounds_check(&self, addr: u64, len: usize) -> Result<usize, WasmError> {
        let start = usize::try_from(addr).map_err(|_| WasmError::OutOfBoundsMemoryAccess)?;
        let end = start
            .checked_add(len)
            .ok_or(WasmError::OutOfBoundsMemoryAccess)?;
        if end > self.bytes.len() {
            return Err(WasmError::OutOfBoundsMemoryAccess);
        }
        Ok(start)
    }

    pub fn read(&self, addr: u64, len: usize) -> Result<&[u8], WasmError> {
        let start = self.bounds_check(addr, len)?;
        Ok(&self.bytes[start..start + len])
    }

    pub fn write(&mut self, addr: u64, data: &[u8]) -> Result<(), WasmError> {
        let start = self.bounds_check(addr, data.len())?;
        self.bytes[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    pub fn fill(&mut self, addr: u64, value: u8, len: usize) -> Result<(), WasmError> {
        let start = self.bounds_check(addr, len)?;
        self.bytes[start..start + len].fill(value);
        Ok(())
    }

    /// Implements `memory.copy`'s overlap-safe semantics.
    pub fn copy_within(&mut self, dst: u64, src: u64, len: usize) -> Result<(), WasmError> {
        let src_start = self.bounds_check(src, len)?;
        let dst_start = self.bounds_check(dst, len)?;
        self.bytes.copy_within(src_start..src_start + len, dst_start);
        Ok(())
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_within_max() {
        let mut mem = Memory::new(1, Some(2));
        assert_eq!(mem.grow(1), 1);
        assert_eq!(mem.size_pages(), 2);
        assert_eq!(mem.grow(1), -1);
    }

    #[test]
    fn out_of_bounds_read_traps() {
        let mem = Memory::new(1, None);
        assert_eq!(
            mem.read(PAGE_SIZE, 1),
            Err(WasmError::OutOfBoundsMemoryAccess)
        );
    }

    #[test]
    fn write_then_read_round_trips() {
        let mut mem = Memory::new(1, None);
        mem.write(0, &[1, 2, 3]).unwrap();
        assert_eq!(mem.read(0, 3).unwrap(), &[1, 2, 3]);
    }
}

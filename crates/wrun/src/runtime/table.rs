use wrun_core::WasmError;

/// A table of opaque references, holding either function indices
/// (`funcref`) or host-opaque externref handles, both represented as
/// `Option<u32>` (`None` = null) since the interpreter never
/// dereferences a table element itself — `call_indirect` resolves it
/// back through the owning instance (§5 "Tables").
#[derive(Debug, Clone)]
pub struct Table {
    elements: Vec<Option<u32>>,
    max: Option<u64>,
}

impl Table {
    pub fn new(min: u64, max: Option<u64>) -> Self {
        Self {
            elements: vec![None; min as usize],
            max,
        }
    }

    pub fn size(&self) -> u64 {
        self.elements.len() as u64
    }

    pub fn grow(&mut self, delta: u64, init: Option<u32>) -> i64 {
        let current = self.size();
        let new_size = match current.checked_add(delta) {
            Some(n) => n,
            None => return -1,
        };
        if let Some(max) = self.max {
            if new_size > max {
                return -1;
            }
        }
        self.elements.resize(new_size as usize, init);
        current as i64
    }

    pub fn get(&self, idx: u32) -> Result<Option<u32>, WasmError> {
        self.elements
            .get(idx as usize)
            .copied()
            .ok_or(WasmError::Trap)
    }

    pub fn set(&mut self, idx: u32, value: Option<u32>) -> Result<(), WasmError> {
        let slot = self.elements.get_mut(idx as usize).ok_or(WasmError::Trap)?;
        *slot = value;
        Ok(())
    }

    pub fn fill(&mut self, idx: u32, value: Option<u32>, len: u32) -> Result<(), WasmError> {
        let start = idx as usize;
        let end = start
            .checked_add(len as usize)
            .filter(|&e| e <= self.elements.len())
            .ok_or(WasmError::Trap)?;
        self.elements[start..end].fill(value);
        Ok(())
    }

    pub fn copy_within(&mut self, dst: u32, src: u32, len: u32) -> Result<(), WasmError> {
        let src_end = (src as usize)
            .checked_add(len as usize)
            .filter(|&e| e <= self.elements.len())
            .ok_or(WasmError::Trap)?;
        let dst_end = (dst as usize)
            .checked_add(len as usize)
            .filter(|&e| e <= self.elements.len())
            .ok_or(WasmError::Trap)?;
        let _ = dst_end;
        self.elements.copy_within(src as usize..src_end, dst as usize);
        Ok(())
    }

    pub fn init(&mut self, dst: u32, items: &[Option<u32>]) -> Result<(), WasmError> {
        let start = dst as usize;
        let end = start
            .checked_add(items.len())
            .filter(|&e| e <= self.elements.len())
            .ok_or(WasmError::Trap)?;
        self.elements[start..end].copy_from_slice(items);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_out_of_bounds_traps() {
        let table = Table::new(1, None);
        assert_eq!(table.get(5), Err(WasmError::Trap));
    }

    #[test]
    fn set_then_get_round_trips() {
        let mut table = Table::new(2, None);
        table.set(0, Some(7)).unwrap();
        assert_eq!(table.get(0).unwrap(), Some(7));
        assert_eq!(table.get(1).unwrap(), None);
    }
}

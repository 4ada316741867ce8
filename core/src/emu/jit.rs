use super::irqs::CpuId;

/// Observer for writes to executable memory and NWRAM remaps, so a JIT layer
/// can drop stale translated code. The core calls these on every store to
/// main RAM or NWRAM and on every MBK-driven mapping change.
pub trait Hooks {
    fn invalidate(&mut self, _cpu: CpuId, _addr: u32) {}
    fn remap_nwram(&mut self, _bank: usize) {}
}

pub struct NullHooks;

impl Hooks for NullHooks {}

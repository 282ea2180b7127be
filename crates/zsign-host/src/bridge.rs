//! Memory marshalling across the engine boundary.
//!
//! Byte buffers and C strings handed to the engine live in the module's
//! private memory and must be released before the owning call returns, on
//! every exit path. [`MemoryScope`] is the scoped-acquisition guard that
//! enforces this: it records every address it allocates and frees them all
//! when dropped, so an early return or a propagated error cannot leak a
//! handle.
//!
//! Output extraction uses the engine's two-slot convention: the caller
//! pre-allocates two zeroed pointer-sized slots, passes their addresses to
//! the entry point, then reads the slots back to learn the result's address
//! and length. The result bytes are copied into host memory before the
//! engine-side buffer is released with `free_buffer`.

use crate::engine::SigningEngine;
use crate::{Error, Result};

/// Scoped owner of engine-memory allocations.
///
/// All addresses obtained through this scope are released, in reverse
/// allocation order, when the scope is dropped. The engine itself is only
/// reachable through [`engine`](MemoryScope::engine) while the scope is
/// alive, so no allocation can outlive the borrow that created it.
pub struct MemoryScope<'e> {
    engine: &'e mut dyn SigningEngine,
    handles: Vec<usize>,
}

impl<'e> MemoryScope<'e> {
    pub fn new(engine: &'e mut dyn SigningEngine) -> Self {
        MemoryScope {
            engine,
            handles: Vec::new(),
        }
    }

    /// The engine under this scope's borrow, for issuing the signing call
    /// itself.
    pub fn engine(&mut self) -> &mut dyn SigningEngine {
        self.engine
    }

    /// Number of live allocations owned by this scope.
    pub fn handle_count(&self) -> usize {
        self.handles.len()
    }

    /// Copies `bytes` into a fresh engine-memory region and returns its
    /// address.
    ///
    /// A null address from the engine allocator raises
    /// [`Error::OutOfMemory`] immediately; a partially written region is
    /// still tracked and released on drop.
    pub fn alloc_bytes(&mut self, bytes: &[u8]) -> Result<usize> {
        let addr = self.engine.malloc(bytes.len())?;
        if addr == 0 {
            return Err(Error::OutOfMemory);
        }
        self.handles.push(addr);
        self.engine.write_memory(addr, bytes)?;
        Ok(addr)
    }

    /// Copies `text` into engine memory as a NUL-terminated C string.
    pub fn alloc_cstring(&mut self, text: &str) -> Result<usize> {
        if text.as_bytes().contains(&0) {
            return Err(Error::InvalidInput(
                "string argument contains an interior NUL byte".into(),
            ));
        }
        let mut encoded = Vec::with_capacity(text.len() + 1);
        encoded.extend_from_slice(text.as_bytes());
        encoded.push(0);
        self.alloc_bytes(&encoded)
    }

    /// Allocates one zeroed pointer-sized output slot.
    pub fn alloc_out_slot(&mut self) -> Result<usize> {
        let size = self.engine.ptr_slot_size();
        self.alloc_bytes(&vec![0u8; size])
    }

    /// Reads back a pointer-sized output slot.
    pub fn read_slot(&mut self, slot: usize) -> Result<usize> {
        self.engine.read_ptr_slot(slot)
    }

    /// Copies a region of engine memory into a host-owned buffer.
    pub fn read_region(&mut self, addr: usize, len: usize) -> Result<Vec<u8>> {
        self.engine.read_memory(addr, len)
    }
}

impl Drop for MemoryScope<'_> {
    fn drop(&mut self) {
        // Release failures cannot propagate out of drop; they are logged so
        // a faulting engine still surfaces in diagnostics.
        for &addr in self.handles.iter().rev() {
            if let Err(err) = self.engine.free(addr) {
                log::warn!("failed to release engine memory at {addr:#x}: {err}");
            }
        }
    }
}

#[cfg(all(test, feature = "mock-engine"))]
mod tests {
    use super::*;
    use crate::engine::mock::MockEngine;

    #[test]
    fn scope_releases_everything_on_drop() {
        let mut engine = MockEngine::new();
        {
            let mut scope = MemoryScope::new(&mut engine);
            scope.alloc_bytes(b"input").unwrap();
            scope.alloc_cstring("password").unwrap();
            scope.alloc_out_slot().unwrap();
            assert_eq!(scope.handle_count(), 3);
        }
        assert_eq!(engine.outstanding_allocations(), 0);
        assert_eq!(engine.allocation_count(), engine.free_count());
    }

    #[test]
    fn scope_releases_on_error_path() {
        let mut engine = MockEngine::new();
        {
            let mut scope = MemoryScope::new(&mut engine);
            scope.alloc_bytes(b"first").unwrap();
            engine_fail(&mut scope);
        }
        assert_eq!(engine.outstanding_allocations(), 0);
    }

    fn engine_fail(scope: &mut MemoryScope<'_>) {
        // Simulates the middle of a pipeline call failing after one
        // successful allocation.
        let err = scope.alloc_cstring("bad\0string").unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn null_allocation_is_out_of_memory() {
        let mut engine = MockEngine::new();
        engine.fail_next_alloc();
        let mut scope = MemoryScope::new(&mut engine);
        assert!(matches!(scope.alloc_bytes(b"data"), Err(Error::OutOfMemory)));
    }

    #[test]
    fn out_slots_start_zeroed() {
        let mut engine = MockEngine::new();
        let mut scope = MemoryScope::new(&mut engine);
        let slot = scope.alloc_out_slot().unwrap();
        assert_eq!(scope.read_slot(slot).unwrap(), 0);
    }

    #[test]
    fn cstring_is_nul_terminated() {
        let mut engine = MockEngine::new();
        let mut scope = MemoryScope::new(&mut engine);
        let addr = scope.alloc_cstring("pw").unwrap();
        assert_eq!(scope.read_region(addr, 3).unwrap(), b"pw\0");
    }
}

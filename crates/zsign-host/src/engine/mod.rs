//! The foreign-function boundary to the signing engine.
//!
//! The engine is a sandboxed module with its own private memory and virtual
//! filesystem; the host reaches it only through the fixed ABI captured by
//! [`SigningEngine`]. One engine instance serves one in-flight call at a
//! time: its memory is a single shared resource, and nothing in the ABI
//! promises reentrancy. Callers serialize access (see
//! [`crate::Resigner`]) rather than assuming the module copes.
//!
//! Addresses are `usize` on the host side. Backends with 32-bit pointers
//! report `ptr_slot_size() == 4` and truncate; see
//! [`SigningEngine::ptr_slot_size`].

#[cfg(feature = "mock-engine")]
pub mod mock;
#[cfg(feature = "native-engine")]
pub mod native;

use crate::Result;

/// Engine log verbosity, passed to [`SigningEngine::set_log_level`].
pub mod log_level {
    pub const NONE: i32 = 0;
    pub const ERROR: i32 = 1;
    pub const INFO: i32 = 2;
    pub const DEBUG: i32 = 3;
}

/// Kind of a directory entry in the engine's virtual filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

/// One entry returned by [`SigningEngine::read_dir`].
///
/// Names are bare (no path component); `.` and `..` self-references are
/// never included.
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: String,
    pub kind: EntryKind,
}

/// The fixed ABI of the signing engine module.
///
/// The first group of methods mirrors the engine's exported entry points and
/// allocator; the second group exposes its virtual filesystem, which the
/// workspace layer stages bundle trees into. Argument order on
/// [`sign_buffer`](SigningEngine::sign_buffer) and
/// [`sign_tree`](SigningEngine::sign_tree) is part of the ABI; booleans are
/// encoded as `0`/`1` integers.
///
/// All methods take `&mut self`: every call touches the module's single
/// shared memory.
pub trait SigningEngine {
    /// Engine version string.
    fn version(&mut self) -> Result<String>;

    /// Sets engine log verbosity (see [`log_level`]); returns the engine's
    /// raw reply.
    fn set_log_level(&mut self, level: i32) -> Result<i32>;

    /// Allocates `len` bytes in engine memory. Returns address `0` when the
    /// engine allocator fails; callers map that to
    /// [`crate::Error::OutOfMemory`].
    fn malloc(&mut self, len: usize) -> Result<usize>;

    /// Releases an address obtained from [`malloc`](SigningEngine::malloc).
    fn free(&mut self, addr: usize) -> Result<()>;

    /// Copies `bytes` into engine memory at `addr`.
    fn write_memory(&mut self, addr: usize, bytes: &[u8]) -> Result<()>;

    /// Copies `len` bytes out of engine memory at `addr` into a host-owned
    /// buffer.
    fn read_memory(&mut self, addr: usize, len: usize) -> Result<Vec<u8>>;

    /// Reads a pointer-sized output slot at `slot`.
    fn read_ptr_slot(&mut self, slot: usize) -> Result<usize>;

    /// Size in bytes of a pointer slot in engine memory (4 for wasm32-style
    /// modules, 8 for a native build).
    fn ptr_slot_size(&self) -> usize;

    /// Buffer-mode signing entry point.
    ///
    /// Pointer arguments are engine-memory addresses; optional assets pass
    /// address `0` with length `0`. `out_ptr_slot`/`out_len_slot` point at
    /// two pre-allocated, zeroed slots that the engine fills with the result
    /// address and length. Returns the raw status code; `0` is success.
    #[allow(clippy::too_many_arguments)]
    fn sign_buffer(
        &mut self,
        input_ptr: usize,
        input_len: usize,
        cert_ptr: usize,
        cert_len: usize,
        key_ptr: usize,
        key_len: usize,
        profile_ptr: usize,
        profile_len: usize,
        password_ptr: usize,
        entitlements_ptr: usize,
        entitlements_len: usize,
        adhoc: i32,
        sha256_only: i32,
        force_sign: i32,
        out_ptr_slot: usize,
        out_len_slot: usize,
    ) -> Result<i32>;

    /// Tree-mode signing entry point.
    ///
    /// `tree_path` is the staged bundle root inside the engine's virtual
    /// filesystem; the engine signs it in place. Absent assets pass empty
    /// strings. Returns the raw status code; `0` is success.
    #[allow(clippy::too_many_arguments)]
    fn sign_tree(
        &mut self,
        tree_path: &str,
        cert_path: &str,
        key_path: &str,
        profile_path: &str,
        password: &str,
        entitlements_path: &str,
        bundle_id: &str,
        bundle_version: &str,
        display_name: &str,
        adhoc: i32,
        sha256_only: i32,
        force_sign: i32,
        weak_inject: i32,
        enable_cache: i32,
    ) -> Result<i32>;

    /// Releases a result buffer the engine allocated during
    /// [`sign_buffer`](SigningEngine::sign_buffer).
    fn free_buffer(&mut self, addr: usize) -> Result<()>;

    /// Creates a directory (and missing parents) in the engine's virtual
    /// filesystem.
    fn create_dir_all(&mut self, path: &str) -> Result<()>;

    /// Writes a regular file, replacing any existing content.
    fn write_file(&mut self, path: &str, bytes: &[u8]) -> Result<()>;

    /// Reads a regular file in full.
    fn read_file(&mut self, path: &str) -> Result<Vec<u8>>;

    /// Lists the immediate children of a directory.
    fn read_dir(&mut self, path: &str) -> Result<Vec<DirEntry>>;

    /// Unlinks a regular file.
    fn remove_file(&mut self, path: &str) -> Result<()>;

    /// Removes an empty directory.
    fn remove_dir(&mut self, path: &str) -> Result<()>;

    /// Whether a path exists (file or directory).
    fn exists(&mut self, path: &str) -> Result<bool>;
}

//! In-process engine stub.
//!
//! Implements the full [`SigningEngine`] ABI over an arena allocator and an
//! in-memory virtual filesystem, with the same validation order and status
//! codes as the real engine. Signing is a no-op: buffer mode returns a copy
//! of the input, tree mode leaves the staged tree unchanged. That makes the
//! stub suitable for exercising the orchestration layer end to end — handle
//! accounting, workspace lifecycle, archive round trips — without a real
//! module.
//!
//! The stub also exposes counters and failure injection used by tests:
//! [`MockEngine::outstanding_allocations`], [`MockEngine::fail_next_alloc`],
//! [`MockEngine::force_buffer_status`], [`MockEngine::force_tree_status`].

use super::{DirEntry, EntryKind, SigningEngine};
use crate::{Error, Result};
use std::collections::{BTreeMap, HashMap};

/// First address handed out by the arena; address 0 stays reserved as the
/// null/failure value.
const ARENA_BASE: usize = 0x1000;

#[derive(Debug, Clone)]
enum Node {
    Directory,
    File(Vec<u8>),
}

/// Test double for the sandboxed signing engine.
#[derive(Debug, Default)]
pub struct MockEngine {
    regions: HashMap<usize, Vec<u8>>,
    next_addr: usize,
    allocations: u64,
    frees: u64,
    fail_next_alloc: bool,
    force_buffer_status: Option<i32>,
    force_tree_status: Option<i32>,
    fs: BTreeMap<String, Node>,
    log_level: i32,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of engine-memory regions currently live (handles plus any
    /// unreleased result buffers).
    pub fn outstanding_allocations(&self) -> usize {
        self.regions.len()
    }

    /// Total successful allocations since creation.
    pub fn allocation_count(&self) -> u64 {
        self.allocations
    }

    /// Total frees since creation.
    pub fn free_count(&self) -> u64 {
        self.frees
    }

    /// Makes the next `malloc` return the null address.
    pub fn fail_next_alloc(&mut self) {
        self.fail_next_alloc = true;
    }

    /// Forces the next buffer-mode call to return `code` before any work.
    pub fn force_buffer_status(&mut self, code: i32) {
        self.force_buffer_status = Some(code);
    }

    /// Forces the next tree-mode call to return `code` before any work.
    pub fn force_tree_status(&mut self, code: i32) {
        self.force_tree_status = Some(code);
    }

    /// Whether the virtual filesystem holds no entries at all.
    pub fn vfs_is_empty(&self) -> bool {
        self.fs.is_empty()
    }

    /// All paths currently present in the virtual filesystem.
    pub fn vfs_paths(&self) -> Vec<String> {
        self.fs.keys().cloned().collect()
    }

    fn region_mut(&mut self, addr: usize) -> Result<&mut Vec<u8>> {
        self.regions
            .get_mut(&addr)
            .ok_or_else(|| Error::EngineFault(format!("access to unallocated address {addr:#x}")))
    }

    fn alloc_region(&mut self, bytes: Vec<u8>) -> usize {
        if self.next_addr == 0 {
            self.next_addr = ARENA_BASE;
        }
        let addr = self.next_addr;
        // Round the next address up so regions never touch; size 0 still
        // consumes a slot.
        self.next_addr += bytes.len().max(1).next_multiple_of(16);
        self.regions.insert(addr, bytes);
        self.allocations += 1;
        addr
    }

    fn write_u32_slot(&mut self, slot: usize, value: u32) -> Result<()> {
        let region = self.region_mut(slot)?;
        if region.len() < 4 {
            return Err(Error::EngineFault(format!("slot at {slot:#x} is too small")));
        }
        region[..4].copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    fn is_dir(&self, path: &str) -> bool {
        matches!(self.fs.get(path), Some(Node::Directory))
    }

    fn parent_of(path: &str) -> Option<&str> {
        let trimmed = path.trim_end_matches('/');
        let idx = trimmed.rfind('/')?;
        if idx == 0 {
            None
        } else {
            Some(&trimmed[..idx])
        }
    }
}

impl SigningEngine for MockEngine {
    fn version(&mut self) -> Result<String> {
        Ok("zsign-stub/0.1".to_string())
    }

    fn set_log_level(&mut self, level: i32) -> Result<i32> {
        let previous = self.log_level;
        self.log_level = level;
        Ok(previous)
    }

    fn malloc(&mut self, len: usize) -> Result<usize> {
        if self.fail_next_alloc {
            self.fail_next_alloc = false;
            return Ok(0);
        }
        Ok(self.alloc_region(vec![0u8; len]))
    }

    fn free(&mut self, addr: usize) -> Result<()> {
        if self.regions.remove(&addr).is_none() {
            return Err(Error::EngineFault(format!(
                "free of unallocated address {addr:#x}"
            )));
        }
        self.frees += 1;
        Ok(())
    }

    fn write_memory(&mut self, addr: usize, bytes: &[u8]) -> Result<()> {
        let len = bytes.len();
        let region = self.region_mut(addr)?;
        if len > region.len() {
            return Err(Error::EngineFault(format!(
                "write of {len} bytes past region at {addr:#x}"
            )));
        }
        region[..len].copy_from_slice(bytes);
        Ok(())
    }

    fn read_memory(&mut self, addr: usize, len: usize) -> Result<Vec<u8>> {
        let region = self.region_mut(addr)?;
        if len > region.len() {
            return Err(Error::EngineFault(format!(
                "read of {len} bytes past region at {addr:#x}"
            )));
        }
        Ok(region[..len].to_vec())
    }

    fn read_ptr_slot(&mut self, slot: usize) -> Result<usize> {
        let region = self.region_mut(slot)?;
        if region.len() < 4 {
            return Err(Error::EngineFault(format!("slot at {slot:#x} is too small")));
        }
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&region[..4]);
        Ok(u32::from_le_bytes(raw) as usize)
    }

    fn ptr_slot_size(&self) -> usize {
        4
    }

    fn sign_buffer(
        &mut self,
        input_ptr: usize,
        input_len: usize,
        _cert_ptr: usize,
        _cert_len: usize,
        key_ptr: usize,
        _key_len: usize,
        profile_ptr: usize,
        _profile_len: usize,
        _password_ptr: usize,
        _entitlements_ptr: usize,
        _entitlements_len: usize,
        adhoc: i32,
        _sha256_only: i32,
        _force_sign: i32,
        out_ptr_slot: usize,
        out_len_slot: usize,
    ) -> Result<i32> {
        if let Some(code) = self.force_buffer_status.take() {
            return Ok(code);
        }
        if out_ptr_slot == 0
            || out_len_slot == 0
            || !self.regions.contains_key(&out_ptr_slot)
            || !self.regions.contains_key(&out_len_slot)
        {
            return Ok(-101);
        }
        if input_len == 0 {
            return Ok(-102);
        }
        if adhoc == 0 && (key_ptr == 0 || profile_ptr == 0) {
            return Ok(-2);
        }

        // No-op signer: the output is a verbatim copy of the input, in a
        // fresh engine-owned buffer the caller must release via free_buffer.
        let signed = self.read_memory(input_ptr, input_len)?;
        let out_len = signed.len();
        let out_addr = self.alloc_region(signed);
        self.write_u32_slot(out_ptr_slot, out_addr as u32)?;
        self.write_u32_slot(out_len_slot, out_len as u32)?;
        Ok(0)
    }

    fn sign_tree(
        &mut self,
        tree_path: &str,
        _cert_path: &str,
        key_path: &str,
        profile_path: &str,
        _password: &str,
        _entitlements_path: &str,
        _bundle_id: &str,
        _bundle_version: &str,
        _display_name: &str,
        adhoc: i32,
        _sha256_only: i32,
        _force_sign: i32,
        _weak_inject: i32,
        _enable_cache: i32,
    ) -> Result<i32> {
        if let Some(code) = self.force_tree_status.take() {
            return Ok(code);
        }
        if tree_path.is_empty() || !self.is_dir(tree_path) {
            return Ok(-201);
        }
        if adhoc == 0 && (key_path.is_empty() || profile_path.is_empty()) {
            return Ok(-202);
        }
        // No-op signer: the tree is left exactly as staged.
        Ok(0)
    }

    fn free_buffer(&mut self, addr: usize) -> Result<()> {
        self.free(addr)
    }

    fn create_dir_all(&mut self, path: &str) -> Result<()> {
        let trimmed = path.trim_end_matches('/');
        if trimmed.is_empty() {
            return Ok(());
        }
        let mut current = String::new();
        for part in trimmed.split('/').filter(|p| !p.is_empty()) {
            current.push('/');
            current.push_str(part);
            match self.fs.get(current.as_str()) {
                Some(Node::File(_)) => {
                    return Err(Error::EngineFault(format!(
                        "mkdir over existing file: {current}"
                    )));
                }
                Some(Node::Directory) => {}
                None => {
                    self.fs.insert(current.clone(), Node::Directory);
                }
            }
        }
        Ok(())
    }

    fn write_file(&mut self, path: &str, bytes: &[u8]) -> Result<()> {
        if let Some(parent) = Self::parent_of(path) {
            if !self.is_dir(parent) {
                return Err(Error::EngineFault(format!(
                    "write into missing directory: {parent}"
                )));
            }
        }
        if self.is_dir(path) {
            return Err(Error::EngineFault(format!("write over directory: {path}")));
        }
        self.fs.insert(path.to_string(), Node::File(bytes.to_vec()));
        Ok(())
    }

    fn read_file(&mut self, path: &str) -> Result<Vec<u8>> {
        match self.fs.get(path) {
            Some(Node::File(bytes)) => Ok(bytes.clone()),
            _ => Err(Error::EngineFault(format!("no such file: {path}"))),
        }
    }

    fn read_dir(&mut self, path: &str) -> Result<Vec<DirEntry>> {
        if !self.is_dir(path) {
            return Err(Error::EngineFault(format!("no such directory: {path}")));
        }
        let prefix = format!("{}/", path.trim_end_matches('/'));
        let mut entries = Vec::new();
        for (full, node) in self.fs.range(prefix.clone()..) {
            if !full.starts_with(&prefix) {
                break;
            }
            let rest = &full[prefix.len()..];
            if rest.is_empty() || rest.contains('/') {
                continue;
            }
            entries.push(DirEntry {
                name: rest.to_string(),
                kind: match node {
                    Node::Directory => EntryKind::Directory,
                    Node::File(_) => EntryKind::File,
                },
            });
        }
        Ok(entries)
    }

    fn remove_file(&mut self, path: &str) -> Result<()> {
        match self.fs.get(path) {
            Some(Node::File(_)) => {
                self.fs.remove(path);
                Ok(())
            }
            _ => Err(Error::EngineFault(format!("unlink of non-file: {path}"))),
        }
    }

    fn remove_dir(&mut self, path: &str) -> Result<()> {
        if !self.is_dir(path) {
            return Err(Error::EngineFault(format!("rmdir of non-directory: {path}")));
        }
        let prefix = format!("{}/", path.trim_end_matches('/'));
        if self.fs.keys().any(|k| k.starts_with(&prefix)) {
            return Err(Error::EngineFault(format!("rmdir of non-empty directory: {path}")));
        }
        self.fs.remove(path);
        Ok(())
    }

    fn exists(&mut self, path: &str) -> Result<bool> {
        Ok(self.fs.contains_key(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malloc_free_accounting() {
        let mut engine = MockEngine::new();
        let a = engine.malloc(16).unwrap();
        let b = engine.malloc(0).unwrap();
        assert_ne!(a, 0);
        assert_ne!(b, 0);
        assert_ne!(a, b);
        assert_eq!(engine.outstanding_allocations(), 2);
        engine.free(a).unwrap();
        engine.free(b).unwrap();
        assert_eq!(engine.outstanding_allocations(), 0);
        assert!(engine.free(a).is_err(), "double free must fault");
    }

    #[test]
    fn fail_next_alloc_returns_null_once() {
        let mut engine = MockEngine::new();
        engine.fail_next_alloc();
        assert_eq!(engine.malloc(8).unwrap(), 0);
        assert_ne!(engine.malloc(8).unwrap(), 0);
    }

    #[test]
    fn memory_roundtrip_and_bounds() {
        let mut engine = MockEngine::new();
        let addr = engine.malloc(4).unwrap();
        engine.write_memory(addr, b"abcd").unwrap();
        assert_eq!(engine.read_memory(addr, 4).unwrap(), b"abcd");
        assert!(engine.write_memory(addr, b"abcde").is_err());
        assert!(engine.read_memory(addr, 5).is_err());
    }

    #[test]
    fn vfs_requires_parent_and_refuses_nonempty_rmdir() {
        let mut engine = MockEngine::new();
        assert!(engine.write_file("/a/b.txt", b"x").is_err());
        engine.create_dir_all("/a").unwrap();
        engine.write_file("/a/b.txt", b"x").unwrap();
        assert!(engine.remove_dir("/a").is_err());
        engine.remove_file("/a/b.txt").unwrap();
        engine.remove_dir("/a").unwrap();
        assert!(engine.vfs_is_empty());
    }

    #[test]
    fn read_dir_lists_immediate_children_only() {
        let mut engine = MockEngine::new();
        engine.create_dir_all("/ws/input/nested").unwrap();
        engine.write_file("/ws/input/file.bin", b"data").unwrap();
        engine.write_file("/ws/input/nested/deep.bin", b"data").unwrap();

        let mut names: Vec<_> = engine
            .read_dir("/ws/input")
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        names.sort();
        assert_eq!(names, ["file.bin", "nested"]);
    }

    #[test]
    fn sign_buffer_validation_order() {
        let mut engine = MockEngine::new();
        let input = engine.malloc(4).unwrap();
        engine.write_memory(input, b"MACH").unwrap();
        let out_ptr = engine.malloc(4).unwrap();
        let out_len = engine.malloc(4).unwrap();

        let status = engine
            .sign_buffer(input, 4, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1, 0, 1, 0, 0)
            .unwrap();
        assert_eq!(status, -101);

        let status = engine
            .sign_buffer(input, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1, 0, 1, out_ptr, out_len)
            .unwrap();
        assert_eq!(status, -102);

        let status = engine
            .sign_buffer(input, 4, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1, out_ptr, out_len)
            .unwrap();
        assert_eq!(status, -2);

        let status = engine
            .sign_buffer(input, 4, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1, 0, 1, out_ptr, out_len)
            .unwrap();
        assert_eq!(status, 0);
        let out_addr = engine.read_ptr_slot(out_ptr).unwrap();
        let out_bytes = engine.read_ptr_slot(out_len).unwrap();
        assert_eq!(engine.read_memory(out_addr, out_bytes).unwrap(), b"MACH");
        engine.free_buffer(out_addr).unwrap();
    }

    #[test]
    fn sign_tree_validation() {
        let mut engine = MockEngine::new();
        let status = engine
            .sign_tree("/missing", "", "", "", "", "", "", "", "", 1, 0, 1, 0, 0)
            .unwrap();
        assert_eq!(status, -201);

        engine.create_dir_all("/ws/input").unwrap();
        let status = engine
            .sign_tree("/ws/input", "", "", "", "", "", "", "", "", 0, 0, 1, 0, 0)
            .unwrap();
        assert_eq!(status, -202);

        let status = engine
            .sign_tree("/ws/input", "", "/k", "/p", "", "", "", "", "", 0, 0, 1, 0, 0)
            .unwrap();
        assert_eq!(status, 0);
    }
}

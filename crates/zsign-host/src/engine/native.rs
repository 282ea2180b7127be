//! Native engine backend.
//!
//! Raw bindings for a zsign engine library linked into the process. The
//! module shares the host address space, so "engine memory" is the process
//! heap reached through the C allocator, and the engine's filesystem is a
//! [`tempfile::TempDir`] staging root that engine-absolute paths are mapped
//! onto before they cross the boundary.
//!
//! Pointer slots are 8 bytes here. `zsign_sign_macho_mem` writes its length
//! slot as a 32-bit value; the bridge pre-zeroes every slot, so reading the
//! full slot back yields the correct value on little-endian hosts.

use super::{DirEntry, EntryKind, SigningEngine};
use crate::{Error, Result};
use std::ffi::{c_char, c_int, c_uint, c_void, CStr, CString};
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

extern "C" {
    fn zsign_version() -> *const c_char;
    fn zsign_set_log_level(level: c_int) -> c_int;
    #[allow(clippy::too_many_arguments)]
    fn zsign_sign_macho_mem(
        input_data: *const u8,
        input_len: c_uint,
        cert_data: *const u8,
        cert_len: c_uint,
        pkey_data: *const u8,
        pkey_len: c_uint,
        prov_data: *const u8,
        prov_len: c_uint,
        password: *const c_char,
        entitlements_data: *const u8,
        entitlements_len: c_uint,
        adhoc: c_int,
        sha256_only: c_int,
        force_sign: c_int,
        output_data: *mut *mut u8,
        output_len: *mut c_uint,
    ) -> c_int;
    #[allow(clippy::too_many_arguments)]
    fn zsign_sign_bundle(
        folder: *const c_char,
        cert_file: *const c_char,
        pkey_file: *const c_char,
        prov_file: *const c_char,
        password: *const c_char,
        entitlements_file: *const c_char,
        bundle_id: *const c_char,
        bundle_version: *const c_char,
        display_name: *const c_char,
        adhoc: c_int,
        sha256_only: c_int,
        force_sign: c_int,
        weak_inject: c_int,
        enable_cache: c_int,
    ) -> c_int;
    fn zsign_free_buffer(p: *mut c_void);

    fn malloc(size: usize) -> *mut c_void;
    fn free(p: *mut c_void);
}

fn cstring(text: &str) -> Result<CString> {
    CString::new(text)
        .map_err(|_| Error::InvalidInput("string argument contains an interior NUL byte".into()))
}

/// [`SigningEngine`] over a linked zsign library.
pub struct NativeEngine {
    staging: TempDir,
}

impl NativeEngine {
    /// Creates a backend with a fresh staging root for the engine's
    /// filesystem.
    pub fn new() -> Result<Self> {
        Ok(NativeEngine {
            staging: TempDir::new()?,
        })
    }

    fn host_path(&self, engine_path: &str) -> PathBuf {
        self.staging.path().join(engine_path.trim_start_matches('/'))
    }

    /// Translates an engine-absolute path argument for the boundary; empty
    /// strings (absent assets) pass through unchanged.
    fn host_path_arg(&self, engine_path: &str) -> Result<CString> {
        if engine_path.is_empty() {
            return cstring("");
        }
        let host = self.host_path(engine_path);
        host.to_str()
            .ok_or_else(|| Error::InvalidInput("staging path is not valid UTF-8".into()))
            .and_then(cstring)
    }
}

impl SigningEngine for NativeEngine {
    fn version(&mut self) -> Result<String> {
        // SAFETY: the engine returns a pointer to a static version string.
        let raw = unsafe { zsign_version() };
        if raw.is_null() {
            return Err(Error::EngineFault("zsign_version returned null".into()));
        }
        Ok(unsafe { CStr::from_ptr(raw) }.to_string_lossy().into_owned())
    }

    fn set_log_level(&mut self, level: i32) -> Result<i32> {
        Ok(unsafe { zsign_set_log_level(level) })
    }

    fn malloc(&mut self, len: usize) -> Result<usize> {
        Ok(unsafe { malloc(len.max(1)) } as usize)
    }

    fn free(&mut self, addr: usize) -> Result<()> {
        // SAFETY: addr came from this backend's malloc and is freed once.
        unsafe { free(addr as *mut c_void) };
        Ok(())
    }

    fn write_memory(&mut self, addr: usize, bytes: &[u8]) -> Result<()> {
        if addr == 0 {
            return Err(Error::EngineFault("write to null address".into()));
        }
        // SAFETY: the bridge only writes into regions it allocated, at the
        // allocated size.
        unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), addr as *mut u8, bytes.len()) };
        Ok(())
    }

    fn read_memory(&mut self, addr: usize, len: usize) -> Result<Vec<u8>> {
        if addr == 0 {
            return Err(Error::EngineFault("read from null address".into()));
        }
        let mut bytes = vec![0u8; len];
        // SAFETY: addr/len describe an engine-owned buffer reported through
        // the output slots.
        unsafe { std::ptr::copy_nonoverlapping(addr as *const u8, bytes.as_mut_ptr(), len) };
        Ok(bytes)
    }

    fn read_ptr_slot(&mut self, slot: usize) -> Result<usize> {
        let raw = self.read_memory(slot, self.ptr_slot_size())?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&raw);
        Ok(usize::from_le_bytes(buf))
    }

    fn ptr_slot_size(&self) -> usize {
        8
    }

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
    ) -> Result<i32> {
        // SAFETY: all addresses were produced by this backend's allocator
        // and stay alive for the duration of the call.
        let status = unsafe {
            zsign_sign_macho_mem(
                input_ptr as *const u8,
                input_len as c_uint,
                cert_ptr as *const u8,
                cert_len as c_uint,
                key_ptr as *const u8,
                key_len as c_uint,
                profile_ptr as *const u8,
                profile_len as c_uint,
                password_ptr as *const c_char,
                entitlements_ptr as *const u8,
                entitlements_len as c_uint,
                adhoc,
                sha256_only,
                force_sign,
                out_ptr_slot as *mut *mut u8,
                out_len_slot as *mut c_uint,
            )
        };
        Ok(status)
    }

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
    ) -> Result<i32> {
        let folder = self.host_path_arg(tree_path)?;
        let cert = self.host_path_arg(cert_path)?;
        let key = self.host_path_arg(key_path)?;
        let profile = self.host_path_arg(profile_path)?;
        let password = cstring(password)?;
        let entitlements = self.host_path_arg(entitlements_path)?;
        let bundle_id = cstring(bundle_id)?;
        let bundle_version = cstring(bundle_version)?;
        let display_name = cstring(display_name)?;

        let status = unsafe {
            zsign_sign_bundle(
                folder.as_ptr(),
                cert.as_ptr(),
                key.as_ptr(),
                profile.as_ptr(),
                password.as_ptr(),
                entitlements.as_ptr(),
                bundle_id.as_ptr(),
                bundle_version.as_ptr(),
                display_name.as_ptr(),
                adhoc,
                sha256_only,
                force_sign,
                weak_inject,
                enable_cache,
            )
        };
        Ok(status)
    }

    fn free_buffer(&mut self, addr: usize) -> Result<()> {
        // SAFETY: addr was reported by the engine through the output slots.
        unsafe { zsign_free_buffer(addr as *mut c_void) };
        Ok(())
    }

    fn create_dir_all(&mut self, path: &str) -> Result<()> {
        fs::create_dir_all(self.host_path(path))?;
        Ok(())
    }

    fn write_file(&mut self, path: &str, bytes: &[u8]) -> Result<()> {
        fs::write(self.host_path(path), bytes)?;
        Ok(())
    }

    fn read_file(&mut self, path: &str) -> Result<Vec<u8>> {
        Ok(fs::read(self.host_path(path))?)
    }

    fn read_dir(&mut self, path: &str) -> Result<Vec<DirEntry>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(self.host_path(path))? {
            let entry = entry?;
            let kind = if entry.file_type()?.is_dir() {
                EntryKind::Directory
            } else {
                EntryKind::File
            };
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                kind,
            });
        }
        Ok(entries)
    }

    fn remove_file(&mut self, path: &str) -> Result<()> {
        fs::remove_file(self.host_path(path))?;
        Ok(())
    }

    fn remove_dir(&mut self, path: &str) -> Result<()> {
        fs::remove_dir(self.host_path(path))?;
        Ok(())
    }

    fn exists(&mut self, path: &str) -> Result<bool> {
        Ok(self.host_path(path).symlink_metadata().is_ok())
    }
}

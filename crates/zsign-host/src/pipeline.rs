//! The resigning pipeline.
//!
//! [`Resigner`] is the caller-facing facade around one loaded engine
//! module. The engine's memory is a single shared resource with no
//! reentrancy guarantee, so every engine-touching operation runs under one
//! mutex; concurrent callers are serialized, not interleaved.
//!
//! Buffer mode marshals all inputs through a [`MemoryScope`] so every
//! handle is released on every exit path. Tree mode stages the decoded
//! archive into an ephemeral workspace, lets the engine sign it in place,
//! walks the mutated tree back into a fresh archive, and destroys the
//! workspace unconditionally — a cleanup failure is logged, never allowed
//! to mask the primary outcome.

use crate::archive::{self, ArchiveEntry, CompressionLevel, EntryPayload};
use crate::bridge::MemoryScope;
use crate::engine::SigningEngine;
use crate::request::SigningRequest;
use crate::workspace::{self, Payload, Workspace};
use crate::{Error, Result};
use parking_lot::Mutex;

fn flag(on: bool) -> i32 {
    i32::from(on)
}

/// Re-signs buffers and bundle archives through a sandboxed signing engine.
///
/// # Example
///
/// ```
/// use zsign_host::{MockEngine, Resigner, SigningRequest};
///
/// let resigner = Resigner::new(MockEngine::new());
/// let request = SigningRequest::new().adhoc(true);
/// let signed = resigner.sign_buffer(&[0xfe, 0xed, 0xfa, 0xce], &request)?;
/// assert!(!signed.is_empty());
/// # Ok::<(), zsign_host::Error>(())
/// ```
pub struct Resigner<E: SigningEngine> {
    engine: Mutex<E>,
    compression: CompressionLevel,
}

impl<E: SigningEngine> Resigner<E> {
    /// Wraps a loaded engine module. Output archives default to maximum
    /// compression.
    pub fn new(engine: E) -> Self {
        Resigner {
            engine: Mutex::new(engine),
            compression: CompressionLevel::MAX,
        }
    }

    /// Set the compression level for repacked archives.
    pub fn compression_level(mut self, level: CompressionLevel) -> Self {
        self.compression = level;
        self
    }

    /// Engine version string.
    pub fn version(&self) -> Result<String> {
        self.engine.lock().version()
    }

    /// Sets engine log verbosity (see [`crate::engine::log_level`]).
    pub fn set_log_level(&self, level: i32) -> Result<i32> {
        self.engine.lock().set_log_level(level)
    }

    /// Consumes the facade and returns the engine.
    pub fn into_engine(self) -> E {
        self.engine.into_inner()
    }

    /// Signs a single executable image held in memory.
    ///
    /// Input and present assets are staged into engine memory, the engine's
    /// buffer entry point runs, and the result is copied back out before the
    /// engine-side buffer is released. Every staged handle is freed before
    /// this returns, on success and on every failure path.
    ///
    /// # Errors
    ///
    /// - [`Error::Engine`] for any non-zero engine status.
    /// - [`Error::OutputExtraction`] when the engine reports success but the
    ///   output slots are empty.
    /// - [`Error::OutOfMemory`] when staging exhausts the engine allocator.
    pub fn sign_buffer(&self, input: &[u8], request: &SigningRequest) -> Result<Vec<u8>> {
        let mut engine = self.engine.lock();
        sign_buffer_locked(&mut *engine, input, request)
    }

    /// Re-signs a bundle archive.
    ///
    /// Decodes the archive, stages it into a fresh workspace inside the
    /// engine's virtual filesystem, invokes the tree entry point, and
    /// repacks the signed tree at the configured compression level. The
    /// workspace is destroyed whatever the outcome.
    ///
    /// # Errors
    ///
    /// - [`Error::Zip`] when the input is not a valid archive.
    /// - [`Error::AssetStaging`] when an asset cannot be written into the
    ///   workspace.
    /// - [`Error::Engine`] for any non-zero engine status.
    pub fn sign_archive(&self, archive_bytes: &[u8], request: &SigningRequest) -> Result<Vec<u8>> {
        let entries = archive::unpack(archive_bytes)?;

        let mut guard = self.engine.lock();
        let ws = workspace::create(&mut *guard)?;
        let outcome = stage_sign_repack(&mut *guard, &ws, &entries, request, self.compression);
        if let Err(err) = workspace::destroy(&mut *guard, &ws) {
            log::warn!("workspace cleanup failed for {}: {err}", ws.root());
        }
        outcome
    }
}

fn sign_buffer_locked(
    engine: &mut dyn SigningEngine,
    input: &[u8],
    request: &SigningRequest,
) -> Result<Vec<u8>> {
    let mut scope = MemoryScope::new(engine);

    let input_ptr = scope.alloc_bytes(input)?;
    let cert = stage_optional(&mut scope, request.certificate_bytes())?;
    let key = stage_optional(&mut scope, request.private_key_bytes())?;
    let profile = stage_optional(&mut scope, request.provisioning_profile_bytes())?;
    let entitlements = stage_optional(&mut scope, request.entitlements_bytes())?;
    let password_ptr = if request.password_str().is_empty() {
        0
    } else {
        scope.alloc_cstring(request.password_str())?
    };
    let out_ptr_slot = scope.alloc_out_slot()?;
    let out_len_slot = scope.alloc_out_slot()?;

    let status = scope.engine().sign_buffer(
        input_ptr,
        input.len(),
        cert.0,
        cert.1,
        key.0,
        key.1,
        profile.0,
        profile.1,
        password_ptr,
        entitlements.0,
        entitlements.1,
        flag(request.is_adhoc()),
        flag(request.is_sha256_only()),
        flag(request.is_force_sign()),
        out_ptr_slot,
        out_len_slot,
    )?;
    if status != 0 {
        // Scope drop releases every staged handle on this path too.
        return Err(Error::from_status(status));
    }

    let out_addr = scope.read_slot(out_ptr_slot)?;
    let out_len = scope.read_slot(out_len_slot)?;
    if out_addr == 0 {
        return Err(Error::OutputExtraction(
            "engine reported success but the output slots are empty".into(),
        ));
    }
    if out_len == 0 {
        release_engine_buffer(&mut scope, out_addr);
        return Err(Error::OutputExtraction(
            "engine reported success but returned a zero-length output".into(),
        ));
    }

    // Copy out first, then release the engine-side buffer; the copy result
    // is surfaced after the release so a read fault cannot leak the buffer.
    let copied = scope.read_region(out_addr, out_len);
    release_engine_buffer(&mut scope, out_addr);
    copied
}

/// Stages an optional asset; absent assets pass the null address.
fn stage_optional(scope: &mut MemoryScope<'_>, bytes: &[u8]) -> Result<(usize, usize)> {
    if bytes.is_empty() {
        Ok((0, 0))
    } else {
        Ok((scope.alloc_bytes(bytes)?, bytes.len()))
    }
}

fn release_engine_buffer(scope: &mut MemoryScope<'_>, addr: usize) {
    if let Err(err) = scope.engine().free_buffer(addr) {
        log::warn!("failed to release engine result buffer at {addr:#x}: {err}");
    }
}

/// Everything between workspace creation and destruction: fallible steps
/// live here so the caller can run cleanup unconditionally.
fn stage_sign_repack(
    engine: &mut dyn SigningEngine,
    ws: &Workspace,
    entries: &[ArchiveEntry],
    request: &SigningRequest,
    compression: CompressionLevel,
) -> Result<Vec<u8>> {
    workspace::materialize(engine, ws, "input", Payload::Directory)?;
    workspace::materialize(engine, ws, "assets", Payload::Directory)?;

    for entry in entries {
        let staged = format!("input/{}", entry.path);
        match &entry.payload {
            EntryPayload::Directory => {
                workspace::materialize(engine, ws, &staged, Payload::Directory)?
            }
            EntryPayload::File(bytes) => {
                workspace::materialize(engine, ws, &staged, Payload::Bytes(bytes))?
            }
        }
    }

    let cert_path = stage_asset(engine, ws, "cert.bin", request.certificate_bytes())?;
    let key_path = stage_asset(engine, ws, "pkey.bin", request.private_key_bytes())?;
    let profile_path = stage_asset(
        engine,
        ws,
        "prov.mobileprovision",
        request.provisioning_profile_bytes(),
    )?;
    let entitlements_path = stage_asset(
        engine,
        ws,
        "entitlements.plist",
        request.entitlements_bytes(),
    )?;

    let input_root = ws.join("input");
    let status = engine.sign_tree(
        &input_root,
        &cert_path,
        &key_path,
        &profile_path,
        request.password_str(),
        &entitlements_path,
        request.bundle_id_str(),
        request.bundle_version_str(),
        request.display_name_str(),
        flag(request.is_adhoc()),
        flag(request.is_sha256_only()),
        flag(request.is_force_sign()),
        flag(request.is_weak_inject()),
        flag(request.is_enable_cache()),
    )?;
    if status != 0 {
        return Err(Error::from_status(status));
    }

    let mut signed_files = Vec::new();
    for item in workspace::walk(engine, &input_root) {
        signed_files.push(item?);
    }
    archive::pack(signed_files, compression)
}

/// Writes one asset under the workspace's `assets` subtree and returns its
/// engine-absolute path, or the empty string when the asset is absent.
fn stage_asset(
    engine: &mut dyn SigningEngine,
    ws: &Workspace,
    filename: &str,
    bytes: &[u8],
) -> Result<String> {
    if bytes.is_empty() {
        return Ok(String::new());
    }
    let relative = format!("assets/{filename}");
    workspace::materialize(engine, ws, &relative, Payload::Bytes(bytes))
        .map_err(|err| Error::AssetStaging(format!("failed to stage {filename}: {err}")))?;
    Ok(ws.join(&relative))
}

#[cfg(all(test, feature = "mock-engine"))]
mod tests {
    use super::*;
    use crate::engine::mock::MockEngine;
    use crate::status::StatusCategory;

    #[test]
    fn adhoc_buffer_signing_copies_input() {
        let resigner = Resigner::new(MockEngine::new());
        let input = vec![0xCEu8; 4096];
        let request = SigningRequest::new().adhoc(true);

        let output = resigner.sign_buffer(&input, &request).unwrap();
        assert!(!output.is_empty());
        assert_eq!(output, input);

        let engine = resigner.into_engine();
        assert_eq!(engine.outstanding_allocations(), 0);
        assert_eq!(engine.allocation_count(), engine.free_count());
    }

    #[test]
    fn buffer_failure_frees_every_handle() {
        let resigner = Resigner::new(MockEngine::new());
        // Key without profile, not adhoc: the engine reports -2.
        let request = SigningRequest::new().private_key(b"key".to_vec());

        let err = resigner.sign_buffer(b"binary", &request).unwrap_err();
        match err {
            Error::Engine(status) => {
                assert_eq!(status.code(), -2);
                assert_eq!(status.category(), StatusCategory::MissingCredentials);
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let engine = resigner.into_engine();
        assert_eq!(engine.outstanding_allocations(), 0);
        assert_eq!(engine.allocation_count(), engine.free_count());
    }

    #[test]
    fn unknown_status_maps_to_unknown_category() {
        let mut engine = MockEngine::new();
        engine.force_buffer_status(-777);
        let resigner = Resigner::new(engine);
        let err = resigner
            .sign_buffer(b"binary", &SigningRequest::new().adhoc(true))
            .unwrap_err();
        match err {
            Error::Engine(status) => {
                assert_eq!(status.category(), StatusCategory::Unknown);
                assert_eq!(status.description(), "unknown error");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn allocator_exhaustion_surfaces_out_of_memory() {
        let mut engine = MockEngine::new();
        engine.fail_next_alloc();
        let resigner = Resigner::new(engine);
        let err = resigner
            .sign_buffer(b"binary", &SigningRequest::new().adhoc(true))
            .unwrap_err();
        assert!(matches!(err, Error::OutOfMemory));
        assert_eq!(resigner.into_engine().outstanding_allocations(), 0);
    }

    #[test]
    fn passthroughs_reach_the_engine() {
        let resigner = Resigner::new(MockEngine::new());
        assert_eq!(resigner.version().unwrap(), "zsign-stub/0.1");
        resigner.set_log_level(crate::engine::log_level::DEBUG).unwrap();
        assert_eq!(
            resigner.set_log_level(crate::engine::log_level::NONE).unwrap(),
            crate::engine::log_level::DEBUG
        );
    }
}

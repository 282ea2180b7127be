//! Error types for host-side signing orchestration.
//!
//! This module defines the [`enum@Error`] enum covering all failure cases
//! around the engine boundary: input validation, asset staging, engine
//! status codes, result extraction, trust-material fetch, and allocation.
//!
//! # See Also
//!
//! - [`crate::Result`] - Convenience type alias using this error
//! - [`crate::EngineStatus`] - Decoded engine status carried by [`Error::Engine`]

use crate::status::EngineStatus;
use thiserror::Error;

/// Error type for all host-side signing operations.
///
/// All public functions in this crate return [`crate::Result<T>`], which uses
/// this error type. Match on variants to handle specific failure cases.
///
/// No failure is silently swallowed except workspace-cleanup errors, which
/// are logged and suppressed so they never mask the primary outcome.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O operation failed.
    ///
    /// Raised by archive reads/writes and, with the native backend, by the
    /// staging filesystem.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// ZIP archive operation failed.
    ///
    /// Occurs while decoding the input archive or encoding the signed output.
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// Caller-supplied input rejected before reaching the engine.
    ///
    /// Empty buffers, malformed workspace paths, and similar boundary
    /// violations.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Failed to stage an asset into the engine's workspace.
    #[error("Asset staging failed: {0}")]
    AssetStaging(String),

    /// The engine reported a non-zero status.
    ///
    /// Carries the raw code and its decoded description; see
    /// [`EngineStatus::category`] for the failure class. Engine-reported
    /// failures are never retried automatically.
    #[error("Engine call failed: {0}")]
    Engine(EngineStatus),

    /// The engine reported success but its output could not be read.
    ///
    /// The output pointer slots were empty or the result region was
    /// unreadable.
    #[error("Output extraction failed: {0}")]
    OutputExtraction(String),

    /// Every trust-material source was tried and none succeeded.
    #[error("Trust material unavailable: {0}")]
    TrustMaterialUnavailable(String),

    /// The engine's allocator returned a null address.
    #[error("Engine allocator returned null")]
    OutOfMemory,

    /// The engine module itself misbehaved at the boundary.
    ///
    /// Covers traps, out-of-bounds memory access, and other faults raised by
    /// the engine backend rather than reported through a status code.
    #[error("Engine fault: {0}")]
    EngineFault(String),
}

impl Error {
    /// Maps a non-zero engine status code to an [`Error::Engine`].
    pub(crate) fn from_status(code: i32) -> Self {
        Error::Engine(EngineStatus::from_code(code))
    }
}

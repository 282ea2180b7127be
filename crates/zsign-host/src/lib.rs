//! Host-side orchestration for a sandboxed zsign signing engine.
//!
//! The cryptographic and binary-format work happens inside an isolated
//! engine module reached through a fixed foreign-function boundary; this
//! crate owns everything around that boundary. [`Resigner`] marshals
//! buffers through [`bridge::MemoryScope`], stages bundle archives through
//! ephemeral [`workspace`] subtrees, and maps engine status codes into the
//! crate's error taxonomy. [`TrustChainAssembler`] composes the certificate
//! chain used for signing material; it is independent of the engine.

pub mod archive;
pub mod bridge;
pub mod engine;
pub mod error;
pub mod pipeline;
pub mod request;
pub mod status;
pub mod trust;
pub mod workspace;

pub use archive::CompressionLevel;
#[cfg(feature = "mock-engine")]
pub use engine::mock::MockEngine;
pub use engine::SigningEngine;
pub use error::Error;
pub use pipeline::Resigner;
pub use request::SigningRequest;
pub use status::{EngineStatus, StatusCategory};
pub use trust::{ChainOptions, HttpFetcher, TrustChainAssembler, TrustFetcher};

pub type Result<T> = std::result::Result<T, Error>;

//! Trust-chain assembly for signing material.
//!
//! Builds the ordered certificate chain the engine expects: developer
//! (leaf) certificate, intermediate authority, and optionally the platform
//! root. Intermediate and root bytes come from the caller when supplied,
//! otherwise from well-known sources with per-instance, populate-once
//! caching. Fetching goes through the [`TrustFetcher`] seam so the network
//! edge stays replaceable; the default is a blocking [`HttpFetcher`].

use crate::{Error, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

/// Intermediate-authority sources, tried in order until one succeeds.
pub const INTERMEDIATE_AUTHORITY_URLS: [&str; 4] = [
    "https://www.apple.com/certificateauthority/AppleWWDRCAG6.cer",
    "https://www.apple.com/certificateauthority/AppleWWDRCAG5.cer",
    "https://www.apple.com/certificateauthority/AppleWWDRCAG4.cer",
    "https://www.apple.com/certificateauthority/AppleWWDRCAG3.cer",
];

/// Single source for the platform root certificate.
pub const ROOT_AUTHORITY_URL: &str = "https://www.apple.com/appleca/AppleIncRootCertificate.cer";

/// Fetches trust material from a URL.
///
/// A non-2xx response or transport failure is reported as the error string;
/// the assembler treats either as grounds to advance to the next fallback
/// source.
pub trait TrustFetcher {
    fn fetch(&self, url: &str) -> std::result::Result<Vec<u8>, String>;
}

/// Default [`TrustFetcher`] over a blocking HTTP client.
#[derive(Debug, Default)]
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TrustFetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> std::result::Result<Vec<u8>, String> {
        let response = self.client.get(url).send().map_err(|e| e.to_string())?;
        let status = response.status();
        if !status.is_success() {
            return Err(format!("HTTP {status}"));
        }
        response
            .bytes()
            .map(|body| body.to_vec())
            .map_err(|e| e.to_string())
    }
}

/// Inputs for [`TrustChainAssembler::build_chain`] and
/// [`TrustChainAssembler::build_chain_der`].
///
/// Caller-supplied intermediate/root bytes are used directly and bypass the
/// fetch path entirely.
#[derive(Debug, Clone, Default)]
pub struct ChainOptions {
    developer_cert: Vec<u8>,
    intermediate_cert: Option<Vec<u8>>,
    root_cert: Option<Vec<u8>>,
    include_root_ca: bool,
}

impl ChainOptions {
    /// Options for a chain rooted at the given developer (leaf) certificate.
    pub fn new(developer_cert: impl Into<Vec<u8>>) -> Self {
        ChainOptions {
            developer_cert: developer_cert.into(),
            ..Default::default()
        }
    }

    /// Supply intermediate-authority bytes instead of fetching them.
    pub fn intermediate_cert(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.intermediate_cert = Some(bytes.into());
        self
    }

    /// Supply root-authority bytes instead of fetching them.
    pub fn root_cert(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.root_cert = Some(bytes.into());
        self
    }

    /// Append the root certificate to the chain. Off by default; most
    /// verifiers only want leaf + intermediate.
    pub fn include_root_ca(mut self, include: bool) -> Self {
        self.include_root_ca = include;
        self
    }
}

/// Assembles certificate chains with lazy, per-instance caching.
///
/// The intermediate and root caches are populated on first successful fetch
/// and never invalidated within the instance's lifetime;
/// [`reset_cache`](TrustChainAssembler::reset_cache) exists for tests only.
/// An assembler shared across threads must sit behind the same serialization
/// discipline as the engine.
pub struct TrustChainAssembler {
    fetcher: Box<dyn TrustFetcher>,
    intermediate_cache: Option<Vec<u8>>,
    root_cache: Option<Vec<u8>>,
}

impl TrustChainAssembler {
    /// Assembler using the default blocking HTTP fetcher.
    pub fn new() -> Self {
        Self::with_fetcher(Box::new(HttpFetcher::new()))
    }

    /// Assembler over a custom fetch implementation.
    pub fn with_fetcher(fetcher: Box<dyn TrustFetcher>) -> Self {
        TrustChainAssembler {
            fetcher,
            intermediate_cache: None,
            root_cache: None,
        }
    }

    /// Intermediate-authority bytes, fetched through the fallback list on
    /// first use and cached afterwards.
    ///
    /// # Errors
    ///
    /// [`Error::TrustMaterialUnavailable`] once every source has failed.
    pub fn intermediate_certificate(&mut self) -> Result<Vec<u8>> {
        if let Some(cached) = &self.intermediate_cache {
            return Ok(cached.clone());
        }
        for url in INTERMEDIATE_AUTHORITY_URLS {
            match self.fetcher.fetch(url) {
                Ok(bytes) => {
                    self.intermediate_cache = Some(bytes.clone());
                    return Ok(bytes);
                }
                Err(reason) => {
                    log::warn!("intermediate authority fetch failed for {url}: {reason}");
                }
            }
        }
        Err(Error::TrustMaterialUnavailable(
            "all intermediate authority sources failed".into(),
        ))
    }

    /// Root-authority bytes, fetched once and cached.
    pub fn root_certificate(&mut self) -> Result<Vec<u8>> {
        if let Some(cached) = &self.root_cache {
            return Ok(cached.clone());
        }
        match self.fetcher.fetch(ROOT_AUTHORITY_URL) {
            Ok(bytes) => {
                self.root_cache = Some(bytes.clone());
                Ok(bytes)
            }
            Err(reason) => Err(Error::TrustMaterialUnavailable(format!(
                "root authority fetch failed: {reason}"
            ))),
        }
    }

    /// Builds the chain as concatenated PEM blocks:
    /// developer + intermediate `[+ root]`.
    pub fn build_chain(&mut self, options: &ChainOptions) -> Result<String> {
        let intermediate = match &options.intermediate_cert {
            Some(bytes) => bytes.clone(),
            None => self.intermediate_certificate()?,
        };
        let root = if options.include_root_ca {
            Some(match &options.root_cert {
                Some(bytes) => bytes.clone(),
                None => self.root_certificate()?,
            })
        } else {
            None
        };

        let mut chain = der_to_pem(&options.developer_cert, "CERTIFICATE");
        chain.push_str(&der_to_pem(&intermediate, "CERTIFICATE"));
        if let Some(root) = root {
            chain.push_str(&der_to_pem(&root, "CERTIFICATE"));
        }
        Ok(chain)
    }

    /// Builds the chain as concatenated raw DER bytes in the same order.
    ///
    /// Plain byte concatenation; no container framing.
    pub fn build_chain_der(&mut self, options: &ChainOptions) -> Result<Vec<u8>> {
        let intermediate = match &options.intermediate_cert {
            Some(bytes) => bytes.clone(),
            None => self.intermediate_certificate()?,
        };

        let mut chain = options.developer_cert.clone();
        chain.extend_from_slice(&intermediate);
        if options.include_root_ca {
            let root = match &options.root_cert {
                Some(bytes) => bytes.clone(),
                None => self.root_certificate()?,
            };
            chain.extend_from_slice(&root);
        }
        Ok(chain)
    }

    /// Drops both caches. Intended for tests.
    pub fn reset_cache(&mut self) {
        self.intermediate_cache = None;
        self.root_cache = None;
    }
}

impl Default for TrustChainAssembler {
    fn default() -> Self {
        Self::new()
    }
}

/// Wraps DER bytes as a PEM block with 64-character base64 lines.
pub fn der_to_pem(der: &[u8], label: &str) -> String {
    let encoded = BASE64.encode(der);
    let mut body = String::with_capacity(encoded.len() + encoded.len() / 64 + 1);
    let mut rest = encoded.as_str();
    while rest.len() > 64 {
        let (line, tail) = rest.split_at(64);
        body.push_str(line);
        body.push('\n');
        rest = tail;
    }
    body.push_str(rest);
    format!("-----BEGIN {label}-----\n{body}\n-----END {label}-----\n")
}

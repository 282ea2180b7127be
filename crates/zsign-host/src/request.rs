//! Normalized signing options.
//!
//! Callers describe a signing job with [`SigningRequest`]; every field has a
//! defined default, so nothing partially-typed ever crosses the engine
//! boundary. Absent byte assets are empty vectors (staged as null pointers
//! or empty path strings downstream), absent strings are `""`, and flags
//! default to `false` except `force_sign`.

use secrecy::{ExposeSecret, SecretString};

/// Fully-typed view of caller-supplied signing options.
///
/// # Example
///
/// ```
/// use zsign_host::SigningRequest;
///
/// let request = SigningRequest::new()
///     .certificate(b"cert-der".to_vec())
///     .private_key(b"key-der".to_vec())
///     .provisioning_profile(b"profile".to_vec())
///     .password("secret")
///     .bundle_id("com.example.app");
/// ```
#[derive(Clone)]
pub struct SigningRequest {
    certificate: Vec<u8>,
    private_key: Vec<u8>,
    provisioning_profile: Vec<u8>,
    entitlements: Vec<u8>,
    password: Option<SecretString>,
    bundle_id: String,
    bundle_version: String,
    display_name: String,
    adhoc: bool,
    sha256_only: bool,
    force_sign: bool,
    weak_inject: bool,
    enable_cache: bool,
}

impl Default for SigningRequest {
    fn default() -> Self {
        SigningRequest {
            certificate: Vec::new(),
            private_key: Vec::new(),
            provisioning_profile: Vec::new(),
            entitlements: Vec::new(),
            password: None,
            bundle_id: String::new(),
            bundle_version: String::new(),
            display_name: String::new(),
            adhoc: false,
            sha256_only: false,
            force_sign: true,
            weak_inject: false,
            enable_cache: false,
        }
    }
}

impl SigningRequest {
    /// A request with default options: force-sign on, everything else off or
    /// empty.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the developer certificate bytes (DER or PEM).
    pub fn certificate(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.certificate = bytes.into();
        self
    }

    /// Set the private key bytes (DER or PEM).
    pub fn private_key(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.private_key = bytes.into();
        self
    }

    /// Set the provisioning profile bytes (.mobileprovision).
    pub fn provisioning_profile(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.provisioning_profile = bytes.into();
        self
    }

    /// Set entitlements plist bytes.
    pub fn entitlements(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.entitlements = bytes.into();
        self
    }

    /// Set the private key password.
    ///
    /// Stored as a [`SecretString`] and zeroized on drop.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(SecretString::new(password.into()));
        self
    }

    /// Set the bundle identifier override.
    pub fn bundle_id(mut self, id: impl Into<String>) -> Self {
        self.bundle_id = id.into();
        self
    }

    /// Set the bundle version override.
    pub fn bundle_version(mut self, version: impl Into<String>) -> Self {
        self.bundle_version = version.into();
        self
    }

    /// Set the display name override.
    pub fn display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    /// Ad-hoc signing: no certificate, key, or provisioning required.
    pub fn adhoc(mut self, adhoc: bool) -> Self {
        self.adhoc = adhoc;
        self
    }

    /// Derives the ad-hoc flag from the staged material: ad-hoc unless both
    /// a private key and a provisioning profile are present.
    pub fn infer_adhoc(mut self) -> Self {
        self.adhoc = self.private_key.is_empty() || self.provisioning_profile.is_empty();
        self
    }

    /// Emit SHA-256 digests only.
    pub fn sha256_only(mut self, on: bool) -> Self {
        self.sha256_only = on;
        self
    }

    /// Re-sign even when an existing signature looks current. Defaults to
    /// `true`.
    pub fn force_sign(mut self, on: bool) -> Self {
        self.force_sign = on;
        self
    }

    /// Use weak dylib injection in tree mode.
    pub fn weak_inject(mut self, on: bool) -> Self {
        self.weak_inject = on;
        self
    }

    /// Enable the engine's signing cache in tree mode.
    pub fn enable_cache(mut self, on: bool) -> Self {
        self.enable_cache = on;
        self
    }

    pub(crate) fn certificate_bytes(&self) -> &[u8] {
        &self.certificate
    }

    pub(crate) fn private_key_bytes(&self) -> &[u8] {
        &self.private_key
    }

    pub(crate) fn provisioning_profile_bytes(&self) -> &[u8] {
        &self.provisioning_profile
    }

    pub(crate) fn entitlements_bytes(&self) -> &[u8] {
        &self.entitlements
    }

    pub(crate) fn password_str(&self) -> &str {
        self.password
            .as_ref()
            .map(|p| p.expose_secret().as_str())
            .unwrap_or("")
    }

    pub(crate) fn bundle_id_str(&self) -> &str {
        &self.bundle_id
    }

    pub(crate) fn bundle_version_str(&self) -> &str {
        &self.bundle_version
    }

    pub(crate) fn display_name_str(&self) -> &str {
        &self.display_name
    }

    pub(crate) fn is_adhoc(&self) -> bool {
        self.adhoc
    }

    pub(crate) fn is_sha256_only(&self) -> bool {
        self.sha256_only
    }

    pub(crate) fn is_force_sign(&self) -> bool {
        self.force_sign
    }

    pub(crate) fn is_weak_inject(&self) -> bool {
        self.weak_inject
    }

    pub(crate) fn is_enable_cache(&self) -> bool {
        self.enable_cache
    }
}

impl std::fmt::Debug for SigningRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningRequest")
            .field("certificate", &self.certificate.len())
            .field("private_key", &self.private_key.len())
            .field("provisioning_profile", &self.provisioning_profile.len())
            .field("entitlements", &self.entitlements.len())
            .field("password", &self.password.is_some())
            .field("bundle_id", &self.bundle_id)
            .field("bundle_version", &self.bundle_version)
            .field("display_name", &self.display_name)
            .field("adhoc", &self.adhoc)
            .field("sha256_only", &self.sha256_only)
            .field("force_sign", &self.force_sign)
            .field("weak_inject", &self.weak_inject)
            .field("enable_cache", &self.enable_cache)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_table() {
        let request = SigningRequest::new();
        assert!(!request.is_adhoc());
        assert!(!request.is_sha256_only());
        assert!(request.is_force_sign());
        assert!(!request.is_weak_inject());
        assert!(!request.is_enable_cache());
        assert_eq!(request.password_str(), "");
        assert_eq!(request.bundle_id_str(), "");
        assert!(request.certificate_bytes().is_empty());
    }

    #[test]
    fn infer_adhoc_needs_both_key_and_profile() {
        assert!(SigningRequest::new().infer_adhoc().is_adhoc());
        assert!(SigningRequest::new()
            .private_key(b"k".to_vec())
            .infer_adhoc()
            .is_adhoc());
        assert!(!SigningRequest::new()
            .private_key(b"k".to_vec())
            .provisioning_profile(b"p".to_vec())
            .infer_adhoc()
            .is_adhoc());
    }

    #[test]
    fn debug_does_not_leak_secrets() {
        let request = SigningRequest::new().password("hunter2");
        let rendered = format!("{request:?}");
        assert!(!rendered.contains("hunter2"));
    }
}

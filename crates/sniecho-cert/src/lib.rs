//! Server credential provisioning
//!
//! Produces the single certificate/key pair presented by the echo listener,
//! either loaded from PEM files or synthesized as a self-signed certificate.

pub mod info;
pub mod loader;
pub mod self_signed;

pub use info::CertificateInfo;
pub use loader::load_from_files;
pub use self_signed::{
    generate_self_signed_cert, KeyAlgorithm, SelfSignedCertificate, SelfSignedConfig,
    SelfSignedError,
};

use std::fmt;
use std::path::PathBuf;

use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::sign::CertifiedKey;
use thiserror::Error;
use tracing::warn;

/// Credential errors
#[derive(Debug, Error)]
pub enum CertError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse PEM in {path}: {reason}")]
    Pem { path: PathBuf, reason: String },

    #[error("No certificate found in {0}")]
    NoCertificates(PathBuf),

    #[error("No private key found in {0}")]
    NoPrivateKey(PathBuf),

    #[error("Certificate parse error: {0}")]
    Parse(String),

    #[error("Private key does not match the certificate public key")]
    KeyMismatch,

    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    #[error(transparent)]
    SelfSigned(#[from] SelfSignedError),
}

/// Where a credential came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialOrigin {
    Files { cert_path: PathBuf, key_path: PathBuf },
    SelfSigned,
}

impl fmt::Display for CredentialOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialOrigin::Files {
                cert_path,
                key_path,
            } => write!(f, "files ({}, {})", cert_path.display(), key_path.display()),
            CredentialOrigin::SelfSigned => f.write_str("self-signed"),
        }
    }
}

/// Certificate chain with its private key and a summary of the leaf
#[derive(Debug)]
pub struct Credential {
    pub cert_chain: Vec<CertificateDer<'static>>,
    pub private_key: PrivateKeyDer<'static>,
    pub info: CertificateInfo,
    pub origin: CredentialOrigin,
}

impl Credential {
    /// Build the signing form used by rustls, rejecting a key that does not
    /// belong to the leaf certificate.
    pub fn into_certified_key(self, provider: &CryptoProvider) -> Result<CertifiedKey, CertError> {
        certified_key(self.cert_chain, self.private_key, provider)
    }
}

/// How the credential should be obtained
#[derive(Debug, Clone)]
pub enum CredentialSource {
    Files { cert_path: PathBuf, key_path: PathBuf },
    SelfSigned(SelfSignedConfig),
}

impl CredentialSource {
    /// Files are used only when both paths are present.
    pub fn from_paths(
        cert_path: Option<PathBuf>,
        key_path: Option<PathBuf>,
        self_signed: SelfSignedConfig,
    ) -> Self {
        match (cert_path, key_path) {
            (Some(cert_path), Some(key_path)) => CredentialSource::Files {
                cert_path,
                key_path,
            },
            _ => CredentialSource::SelfSigned(self_signed),
        }
    }

    pub fn load(&self) -> Result<Credential, CertError> {
        match self {
            CredentialSource::Files {
                cert_path,
                key_path,
            } => load_from_files(cert_path, key_path),
            CredentialSource::SelfSigned(config) => {
                Ok(generate_self_signed_cert(config)?.into_credential())
            }
        }
    }
}

pub(crate) fn certified_key(
    cert_chain: Vec<CertificateDer<'static>>,
    private_key: PrivateKeyDer<'static>,
    provider: &CryptoProvider,
) -> Result<CertifiedKey, CertError> {
    let signing_key = provider.key_provider.load_private_key(private_key)?;
    let certified = CertifiedKey::new(cert_chain, signing_key);

    match certified.keys_match() {
        Ok(()) => Ok(certified),
        Err(rustls::Error::InconsistentKeys(rustls::InconsistentKeys::KeyMismatch)) => {
            Err(CertError::KeyMismatch)
        }
        Err(rustls::Error::InconsistentKeys(rustls::InconsistentKeys::Unknown)) => {
            warn!("Unable to confirm that the private key matches the certificate");
            Ok(certified)
        }
        Err(e) => Err(CertError::Tls(e)),
    }
}

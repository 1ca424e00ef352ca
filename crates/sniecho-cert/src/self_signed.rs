//! Self-signed certificate generation
//!
//! Provides a throwaway certificate so the listener can start without any key
//! material on disk. The certificate is its own issuer and is never persisted
//! unless the caller asks for it.

use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose,
    Ia5String, IsCa, KeyPair, KeyUsagePurpose, SanType, SerialNumber,
};
use rsa::pkcs8::EncodePrivateKey;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use thiserror::Error;
use time::{Duration, OffsetDateTime};
use tracing::debug;

use crate::{CertificateInfo, Credential, CredentialOrigin};

/// How far `not_before` is backdated to absorb clock skew between peers
pub const CLOCK_SKEW_ALLOWANCE: Duration = Duration::minutes(1);

/// Lifetime of a generated certificate (8640 hours)
pub const VALIDITY_PERIOD: Duration = Duration::days(360);

const RSA_KEY_BITS: usize = 2048;

#[derive(Error, Debug)]
pub enum SelfSignedError {
    #[error("Key generation failed: {0}")]
    KeyGenerationFailed(String),

    #[error("Invalid DNS name {name:?}: {reason}")]
    InvalidDnsName { name: String, reason: String },

    #[error("Certificate generation failed: {0}")]
    GenerationFailed(String),

    #[error("Generated certificate could not be parsed: {0}")]
    ParseFailed(String),
}

/// Key algorithm for the generated certificate
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum KeyAlgorithm {
    /// 2048-bit RSA signed with SHA-256
    #[default]
    Rsa2048,
    /// NIST P-256 ECDSA signed with SHA-256
    EcdsaP256,
}

/// Identity attributes of a generated certificate
#[derive(Debug, Clone, Default)]
pub struct SelfSignedConfig {
    /// Mark the certificate as a CA in its basic constraints
    pub is_ca: bool,
    /// Subject common name; the subject is left empty when unset
    pub common_name: Option<String>,
    /// SAN DNS names in order; empty entries are skipped
    pub dns_names: Vec<String>,
    pub key_algorithm: KeyAlgorithm,
}

/// A self-signed certificate with its private key
pub struct SelfSignedCertificate {
    /// Certificate in DER format (binary)
    pub cert_der: CertificateDer<'static>,

    /// Private key in DER format (binary)
    pub key_der: PrivateKeyDer<'static>,

    /// Certificate in PEM format (text)
    pub pem_cert: String,

    /// Private key in PEM format (text)
    pub pem_key: String,

    /// Summary parsed back from `cert_der`
    pub info: CertificateInfo,
}

impl SelfSignedCertificate {
    pub fn into_credential(self) -> Credential {
        Credential {
            cert_chain: vec![self.cert_der],
            private_key: self.key_der,
            info: self.info,
            origin: CredentialOrigin::SelfSigned,
        }
    }
}

/// Generate a self-signed certificate for the echo listener
///
/// The certificate uses serial number 1, is valid from one minute ago for
/// 360 days, allows digital signature, key agreement and key encipherment,
/// and is usable for both server and client authentication. The basic
/// constraints extension is always emitted so that `is_ca = false` is explicit.
///
/// # Example
/// ```no_run
/// use sniecho_cert::{generate_self_signed_cert, SelfSignedConfig};
///
/// let config = SelfSignedConfig {
///     common_name: Some("echo.test".to_string()),
///     dns_names: vec!["echo.test".to_string()],
///     ..Default::default()
/// };
/// let cert = generate_self_signed_cert(&config).unwrap();
/// println!("{}", cert.pem_cert);
/// ```
pub fn generate_self_signed_cert(
    config: &SelfSignedConfig,
) -> Result<SelfSignedCertificate, SelfSignedError> {
    let key_pair = generate_key_pair(config.key_algorithm)?;

    let mut params = CertificateParams::default();
    params.serial_number = Some(SerialNumber::from(1u64));

    let now = OffsetDateTime::now_utc();
    params.not_before = now - CLOCK_SKEW_ALLOWANCE;
    params.not_after = now + VALIDITY_PERIOD;

    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyAgreement,
        KeyUsagePurpose::KeyEncipherment,
    ];
    params.extended_key_usages = vec![
        ExtendedKeyUsagePurpose::ClientAuth,
        ExtendedKeyUsagePurpose::ServerAuth,
    ];
    params.is_ca = if config.is_ca {
        IsCa::Ca(BasicConstraints::Unconstrained)
    } else {
        IsCa::ExplicitNoCa
    };

    // CertificateParams::default() carries a placeholder common name
    let mut dn = DistinguishedName::new();
    if let Some(cn) = config.common_name.as_deref().filter(|cn| !cn.is_empty()) {
        dn.push(DnType::CommonName, cn);
    }
    params.distinguished_name = dn;

    params.subject_alt_names = san_dns_names(&config.dns_names)?;

    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| SelfSignedError::GenerationFailed(e.to_string()))?;

    let cert_der = cert.der().clone();
    let info = CertificateInfo::from_der(&cert_der)
        .map_err(|e| SelfSignedError::ParseFailed(e.to_string()))?;

    debug!(
        "Generated self-signed certificate (cn: {:?}, sans: {:?}, ca: {})",
        info.common_name, info.dns_names, info.is_ca
    );

    Ok(SelfSignedCertificate {
        cert_der,
        key_der: PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der())),
        pem_cert: cert.pem(),
        pem_key: key_pair.serialize_pem(),
        info,
    })
}

fn generate_key_pair(algorithm: KeyAlgorithm) -> Result<KeyPair, SelfSignedError> {
    match algorithm {
        KeyAlgorithm::Rsa2048 => {
            let private_key = rsa::RsaPrivateKey::new(&mut rand::rngs::OsRng, RSA_KEY_BITS)
                .map_err(|e| SelfSignedError::KeyGenerationFailed(e.to_string()))?;
            let pkcs8 = private_key
                .to_pkcs8_der()
                .map_err(|e| SelfSignedError::KeyGenerationFailed(e.to_string()))?;

            KeyPair::from_pkcs8_der_and_sign_algo(
                &PrivatePkcs8KeyDer::from(pkcs8.as_bytes()),
                &rcgen::PKCS_RSA_SHA256,
            )
            .map_err(|e| SelfSignedError::KeyGenerationFailed(e.to_string()))
        }
        KeyAlgorithm::EcdsaP256 => KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256)
            .map_err(|e| SelfSignedError::KeyGenerationFailed(e.to_string())),
    }
}

fn san_dns_names(names: &[String]) -> Result<Vec<SanType>, SelfSignedError> {
    names
        .iter()
        .filter(|name| !name.is_empty())
        .map(|name| {
            Ia5String::try_from(name.as_str())
                .map(SanType::DnsName)
                .map_err(|e| SelfSignedError::InvalidDnsName {
                    name: name.clone(),
                    reason: e.to_string(),
                })
        })
        .collect()
}

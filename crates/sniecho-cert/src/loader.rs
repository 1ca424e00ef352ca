//! Loading an existing key pair from PEM files

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tracing::info;

use crate::{certified_key, CertError, CertificateInfo, Credential, CredentialOrigin};

/// Load a PEM certificate chain and its private key
///
/// The first certificate in the file is the leaf. The key may be PKCS#8,
/// PKCS#1 or SEC1 encoded and must belong to the leaf certificate.
pub fn load_from_files(cert_path: &Path, key_path: &Path) -> Result<Credential, CertError> {
    let cert_chain = load_certs(cert_path)?;
    let private_key = load_private_key(key_path)?;

    let info = CertificateInfo::from_der(&cert_chain[0])?;

    // Reject a mismatched pair now rather than at the first handshake
    let provider = rustls::crypto::ring::default_provider();
    certified_key(cert_chain.clone(), private_key.clone_key(), &provider)?;

    info!(
        "Certificate loaded from {} and {}",
        cert_path.display(),
        key_path.display()
    );

    Ok(Credential {
        cert_chain,
        private_key,
        info,
        origin: CredentialOrigin::Files {
            cert_path: cert_path.to_path_buf(),
            key_path: key_path.to_path_buf(),
        },
    })
}

fn open(path: &Path) -> Result<BufReader<File>, CertError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| CertError::Io {
            path: path.to_path_buf(),
            source,
        })
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, CertError> {
    let mut reader = open(path)?;

    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| CertError::Pem {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    if certs.is_empty() {
        return Err(CertError::NoCertificates(path.to_path_buf()));
    }

    Ok(certs)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, CertError> {
    let mut reader = open(path)?;

    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| CertError::Pem {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?
        .ok_or_else(|| CertError::NoPrivateKey(path.to_path_buf()))
}

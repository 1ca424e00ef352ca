//! Listener TLS configuration

use std::sync::Arc;

use rustls::ServerConfig;
use sniecho_cert::Credential;

use crate::resolver::EchoCertResolver;
use crate::server::TlsEchoServerError;

/// Build the immutable configuration shared by every connection
///
/// Empty ALPN entries are dropped; an empty list means no ALPN is negotiated.
pub fn build_server_config(
    credential: Credential,
    alpn_protocols: &[String],
) -> Result<Arc<ServerConfig>, TlsEchoServerError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let certified_key = credential.into_certified_key(&provider)?;

    let mut config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| TlsEchoServerError::TlsError(e.to_string()))?
        .with_no_client_auth()
        .with_cert_resolver(Arc::new(EchoCertResolver::new(Arc::new(certified_key))));

    config.alpn_protocols = alpn_protocols
        .iter()
        .filter(|p| !p.is_empty())
        .map(|p| p.as_bytes().to_vec())
        .collect();

    Ok(Arc::new(config))
}

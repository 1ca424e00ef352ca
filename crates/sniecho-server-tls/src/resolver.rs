//! Certificate resolver presenting one fixed credential

use std::sync::Arc;

use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use tracing::trace;

/// Always answers with the same certificate, whatever SNI the client sent.
///
/// Also the earliest point where the ClientHello is visible, so the offered
/// server name and protocols are traced here.
#[derive(Debug)]
pub struct EchoCertResolver {
    certified_key: Arc<CertifiedKey>,
}

impl EchoCertResolver {
    pub fn new(certified_key: Arc<CertifiedKey>) -> Self {
        Self { certified_key }
    }
}

impl ResolvesServerCert for EchoCertResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        let offered_alpn: Vec<String> = client_hello
            .alpn()
            .map(|protocols| {
                protocols
                    .map(|p| String::from_utf8_lossy(p).into_owned())
                    .collect()
            })
            .unwrap_or_default();

        trace!(
            "ClientHello: server_name={:?}, alpn={:?}",
            client_hello.server_name(),
            offered_alpn
        );

        Some(self.certified_key.clone())
    }
}

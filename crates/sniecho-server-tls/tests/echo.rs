//! End-to-end tests: real TLS clients against a running echo server

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::ServerName;
use rustls::ClientConfig;
use sniecho_cert::{generate_self_signed_cert, Credential, KeyAlgorithm, SelfSignedConfig};
use sniecho_server_tls::{ConnectionTimeouts, TlsEchoServer, TlsEchoServerConfig};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_rustls::TlsConnector;

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

fn init_logging() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init()
        .ok();
}

fn credential() -> Credential {
    generate_self_signed_cert(&SelfSignedConfig {
        common_name: Some("sniecho.test".to_string()),
        dns_names: vec!["sniecho.test".to_string()],
        key_algorithm: KeyAlgorithm::EcdsaP256,
        ..Default::default()
    })
    .unwrap()
    .into_credential()
}

struct RunningServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<Result<(), sniecho_server_tls::TlsEchoServerError>>,
}

impl RunningServer {
    async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let result = tokio::time::timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("server did not stop")
            .expect("server task panicked");
        assert!(result.is_ok(), "server returned error: {:?}", result);
    }
}

async fn start_server(alpn: &[&str], timeouts: ConnectionTimeouts) -> RunningServer {
    init_logging();

    let config = TlsEchoServerConfig {
        bind_addr: "127.0.0.1:0".to_string(),
        alpn_protocols: alpn.iter().map(|p| p.to_string()).collect(),
        timeouts,
    };
    let server = TlsEchoServer::bind(config, credential()).await.unwrap();
    let addr = server.local_addr().unwrap();

    let (tx, rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(server.run_until(async {
        let _ = rx.await;
    }));

    RunningServer {
        addr,
        shutdown: Some(tx),
        handle,
    }
}

fn connector(alpn: &[&str]) -> TlsConnector {
    let mut config = ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .unwrap()
    .dangerous()
    .with_custom_certificate_verifier(SkipVerification::new())
    .with_no_client_auth();

    config.alpn_protocols = alpn.iter().map(|p| p.as_bytes().to_vec()).collect();
    TlsConnector::from(Arc::new(config))
}

struct EchoReply {
    body: Vec<u8>,
    alpn: Option<Vec<u8>>,
}

/// Handshake with `server_name` (an IP literal suppresses SNI) and read until close
async fn echo(addr: SocketAddr, server_name: &str, alpn: &[&str]) -> std::io::Result<EchoReply> {
    let tcp = TcpStream::connect(addr).await?;
    let server_name = ServerName::try_from(server_name.to_string()).unwrap();

    let mut tls = connector(alpn).connect(server_name, tcp).await?;
    let negotiated = tls.get_ref().1.alpn_protocol().map(|p| p.to_vec());

    let mut body = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), tls.read_to_end(&mut body))
        .await
        .expect("server did not close the connection")?;

    Ok(EchoReply {
        body,
        alpn: negotiated,
    })
}

// Certificate verifier that skips verification (INSECURE)
#[derive(Debug)]
struct SkipVerification;

impl SkipVerification {
    fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

impl rustls::client::danger::ServerCertVerifier for SkipVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn test_echoes_sni() {
    let server = start_server(&[], ConnectionTimeouts::default()).await;

    let reply = echo(server.addr, "example.test", &[]).await.unwrap();
    assert_eq!(reply.body, b"example.test\n");
    assert_eq!(reply.alpn, None);

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_no_sni_gets_empty_line() {
    let server = start_server(&[], ConnectionTimeouts::default()).await;

    let reply = echo(server.addr, "127.0.0.1", &[]).await.unwrap();
    assert_eq!(reply.body, b"\n");

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_bare_tcp_close_does_not_disturb_server() {
    let server = start_server(&[], ConnectionTimeouts::default()).await;

    for _ in 0..3 {
        let probe = TcpStream::connect(server.addr).await.unwrap();
        drop(probe);
    }

    let reply = echo(server.addr, "after-probe.test", &[]).await.unwrap();
    assert_eq!(reply.body, b"after-probe.test\n");

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_clients_get_their_own_name() {
    let server = start_server(&[], ConnectionTimeouts::default()).await;
    let addr = server.addr;

    let names: Vec<String> = (0..16).map(|i| format!("client-{}.test", i)).collect();
    let tasks: Vec<_> = names
        .iter()
        .cloned()
        .map(|name| tokio::spawn(async move { (echo(addr, &name, &[]).await, name) }))
        .collect();

    for task in tasks {
        let (reply, name) = task.await.unwrap();
        assert_eq!(reply.unwrap().body, format!("{}\n", name).into_bytes());
    }

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_stalled_client_does_not_block_accept() {
    let server = start_server(&[], ConnectionTimeouts::unbounded()).await;

    // Connects and then says nothing, holding its task indefinitely
    let _stalled = TcpStream::connect(server.addr).await.unwrap();

    let reply = echo(server.addr, "live.test", &[]).await.unwrap();
    assert_eq!(reply.body, b"live.test\n");

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_handshake_timeout_closes_connection() {
    let timeouts = ConnectionTimeouts {
        handshake: Some(Duration::from_millis(200)),
        write: None,
    };
    let server = start_server(&[], timeouts).await;

    let mut stalled = TcpStream::connect(server.addr).await.unwrap();
    let mut buf = [0u8; 16];
    let n = tokio::time::timeout(Duration::from_secs(5), stalled.read(&mut buf))
        .await
        .expect("server kept the stalled connection open")
        .unwrap_or(0);
    assert_eq!(n, 0);

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_alpn_negotiates_server_preference() {
    let server = start_server(&["h2", "http/1.1"], ConnectionTimeouts::default()).await;

    let reply = echo(server.addr, "alpn.test", &["http/1.1", "h2"])
        .await
        .unwrap();
    assert_eq!(reply.body, b"alpn.test\n");
    assert_eq!(reply.alpn.as_deref(), Some(&b"h2"[..]));

    let reply = echo(server.addr, "alpn.test", &["http/1.1"]).await.unwrap();
    assert_eq!(reply.alpn.as_deref(), Some(&b"http/1.1"[..]));

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_client_without_alpn_is_served() {
    let server = start_server(&["h2"], ConnectionTimeouts::default()).await;

    let reply = echo(server.addr, "plain.test", &[]).await.unwrap();
    assert_eq!(reply.body, b"plain.test\n");
    assert_eq!(reply.alpn, None);

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_alpn_mismatch_fails_handshake_only() {
    let server = start_server(&["h2"], ConnectionTimeouts::default()).await;

    let result = echo(server.addr, "mismatch.test", &["imap"]).await;
    assert!(result.is_err(), "handshake should fail without a common protocol");

    let reply = echo(server.addr, "recovered.test", &["h2"]).await.unwrap();
    assert_eq!(reply.body, b"recovered.test\n");

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_plaintext_client_gets_no_reply() {
    let server = start_server(&[], ConnectionTimeouts::default()).await;

    let mut plain = TcpStream::connect(server.addr).await.unwrap();
    plain
        .write_all(b"GET / HTTP/1.1\r\nHost: plain.test\r\n\r\n")
        .await
        .unwrap();

    // A lone fatal alert record, no reply line
    let mut buf = Vec::new();
    let _ = tokio::time::timeout(Duration::from_secs(5), plain.read_to_end(&mut buf)).await;
    assert_eq!(buf.len(), 7, "unexpected bytes: {:02x?}", buf);
    assert_eq!(buf[0], 0x15);

    let reply = echo(server.addr, "still-up.test", &[]).await.unwrap();
    assert_eq!(reply.body, b"still-up.test\n");

    server.stop().await;
}

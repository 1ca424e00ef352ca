//! Per-connection handling: handshake, then echo the negotiated server name
//!
//! Every connection ends in exactly one [`ConnectionOutcome`]. The stream is
//! owned by the handler, so it is closed on every path when the handler
//! returns.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

/// Deadlines applied to each connection; `None` waits forever
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionTimeouts {
    /// Covers waiting for the ClientHello and the whole handshake
    pub handshake: Option<Duration>,
    /// Covers writing the reply and closing the session
    pub write: Option<Duration>,
}

impl Default for ConnectionTimeouts {
    fn default() -> Self {
        Self {
            handshake: Some(Duration::from_secs(10)),
            write: Some(Duration::from_secs(10)),
        }
    }
}

impl ConnectionTimeouts {
    /// No deadlines at all
    pub fn unbounded() -> Self {
        Self {
            handshake: None,
            write: None,
        }
    }
}

/// How a connection ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionOutcome {
    /// Peer closed before sending any TLS data (typically a TCP health check)
    ClosedBeforeHandshake,
    HandshakeFailed(String),
    HandshakeTimedOut,
    /// The server name was written back
    Echoed {
        server_name: String,
        alpn: Option<String>,
    },
    WriteFailed(String),
    WriteTimedOut,
}

impl ConnectionOutcome {
    /// Benign and successful outcomes; everything else is logged as a failure
    pub fn is_clean(&self) -> bool {
        matches!(
            self,
            ConnectionOutcome::ClosedBeforeHandshake | ConnectionOutcome::Echoed { .. }
        )
    }
}

enum Handshake {
    PeerClosed,
    Failed(io::Error),
    Established(Box<TlsStream<TcpStream>>),
}

/// Run one connection to completion
pub async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    acceptor: TlsAcceptor,
    timeouts: ConnectionTimeouts,
) -> ConnectionOutcome {
    let mut tls_stream = match with_deadline(timeouts.handshake, handshake(stream, &acceptor)).await
    {
        None => {
            warn!("TLS handshake with {} timed out", peer_addr);
            return ConnectionOutcome::HandshakeTimedOut;
        }
        Some(Handshake::PeerClosed) => {
            debug!(
                "{} closed the connection before sending a ClientHello",
                peer_addr
            );
            return ConnectionOutcome::ClosedBeforeHandshake;
        }
        Some(Handshake::Failed(e)) => {
            warn!("TLS handshake failed from {}: {}", peer_addr, e);
            return ConnectionOutcome::HandshakeFailed(e.to_string());
        }
        Some(Handshake::Established(tls_stream)) => tls_stream,
    };

    let (server_name, alpn) = {
        let (_, session) = tls_stream.get_ref();
        (
            session.server_name().unwrap_or_default().to_string(),
            session
                .alpn_protocol()
                .map(|p| String::from_utf8_lossy(p).into_owned()),
        )
    };

    info!(
        "ServerName: {} (peer: {}, alpn: {})",
        server_name,
        peer_addr,
        alpn.as_deref().unwrap_or("-")
    );

    let reply = format!("{}\n", server_name);
    let write = async {
        tls_stream.write_all(reply.as_bytes()).await?;
        tls_stream.flush().await
    };

    match with_deadline(timeouts.write, write).await {
        None => {
            warn!("Writing server name to {} timed out", peer_addr);
            return ConnectionOutcome::WriteTimedOut;
        }
        Some(Err(e)) => {
            warn!("Failed to write server name to {}: {}", peer_addr, e);
            return ConnectionOutcome::WriteFailed(e.to_string());
        }
        Some(Ok(())) => {}
    }

    // The reply is already delivered; close_notify is best effort
    match with_deadline(timeouts.write, tls_stream.shutdown()).await {
        None => debug!("Closing TLS session with {} timed out", peer_addr),
        Some(Err(e)) => debug!("Failed to close TLS session with {}: {}", peer_addr, e),
        Some(Ok(())) => {}
    }

    ConnectionOutcome::Echoed { server_name, alpn }
}

async fn handshake(stream: TcpStream, acceptor: &TlsAcceptor) -> Handshake {
    // A zero-length peek means EOF with nothing sent
    let mut probe = [0u8; 1];
    match stream.peek(&mut probe).await {
        Ok(0) => return Handshake::PeerClosed,
        Ok(_) => {}
        Err(e) => return Handshake::Failed(e),
    }

    match acceptor.accept(stream).await {
        Ok(tls_stream) => Handshake::Established(Box::new(tls_stream)),
        Err(e) => Handshake::Failed(e),
    }
}

async fn with_deadline<F: Future>(deadline: Option<Duration>, fut: F) -> Option<F::Output> {
    match deadline {
        Some(duration) => tokio::time::timeout(duration, fut).await.ok(),
        None => Some(fut.await),
    }
}

//! TLS echo server
//!
//! Accepts TCP connections, terminates TLS with the configured credential and
//! answers each successful handshake with the server name the client sent in
//! its ClientHello, followed by a newline. Each connection runs on its own
//! task, so a stalled client never holds up the accept loop.
use std::future::{self, Future};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rustls::ServerConfig;
use sniecho_cert::{CertError, Credential};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, trace};

use crate::connection::{handle_connection, ConnectionTimeouts};
use crate::tls::build_server_config;

#[derive(Debug, Error)]
pub enum TlsEchoServerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Credential error: {0}")]
    Credential(#[from] CertError),

    #[error("TLS error: {0}")]
    TlsError(String),

    #[error("Invalid listen address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Failed to bind to {address}: {reason}\n\nTroubleshooting:\n  • Check if another process is using this port: lsof -i :{port}\n  • Try using a different address or port")]
    BindError {
        address: String,
        port: u16,
        reason: String,
    },

    #[error("Failed to accept connection: {0}")]
    AcceptError(std::io::Error),
}

#[derive(Debug, Clone)]
pub struct TlsEchoServerConfig {
    /// `host:port`, `[v6]:port` or `:port` for all IPv4 interfaces
    pub bind_addr: String,
    /// Offered in preference order; empty entries are ignored
    pub alpn_protocols: Vec<String>,
    pub timeouts: ConnectionTimeouts,
}

impl Default for TlsEchoServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: ":8443".to_string(),
            alpn_protocols: Vec::new(),
            timeouts: ConnectionTimeouts::default(),
        }
    }
}

impl TlsEchoServerConfig {
    pub fn with_timeouts(mut self, handshake: Option<Duration>, write: Option<Duration>) -> Self {
        self.timeouts = ConnectionTimeouts { handshake, write };
        self
    }
}

pub struct TlsEchoServer {
    listener: TcpListener,
    tls_config: Arc<ServerConfig>,
    timeouts: ConnectionTimeouts,
}

impl TlsEchoServer {
    /// Build the TLS configuration and bind the listener
    ///
    /// The configuration is built exactly once here and only read afterwards.
    pub async fn bind(
        config: TlsEchoServerConfig,
        credential: Credential,
    ) -> Result<Self, TlsEchoServerError> {
        let tls_config = build_server_config(credential, &config.alpn_protocols)?;

        let bind_addr = resolve_bind_addr(&config.bind_addr).await?;
        let listener = TcpListener::bind(bind_addr).await.map_err(|e| {
            TlsEchoServerError::BindError {
                address: bind_addr.ip().to_string(),
                port: bind_addr.port(),
                reason: e.to_string(),
            }
        })?;

        Ok(Self {
            listener,
            tls_config,
            timeouts: config.timeouts,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TlsEchoServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// ALPN protocols offered to clients, in preference order
    pub fn alpn_protocols(&self) -> Vec<String> {
        self.tls_config
            .alpn_protocols
            .iter()
            .map(|p| String::from_utf8_lossy(p).into_owned())
            .collect()
    }

    /// Serve until the listener fails
    pub async fn run(self) -> Result<(), TlsEchoServerError> {
        self.run_until(future::pending()).await
    }

    /// Serve until `shutdown` completes or the listener fails
    ///
    /// Connections already in flight keep running on their own tasks.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), TlsEchoServerError>
    where
        F: Future<Output = ()>,
    {
        let local_addr = self.listener.local_addr()?;
        let acceptor = TlsAcceptor::from(self.tls_config.clone());
        let alpn = self.alpn_protocols();

        info!(
            "✅ TLS echo server listening on {} (alpn: {})",
            local_addr,
            if alpn.is_empty() {
                "none".to_string()
            } else {
                alpn.join(",")
            }
        );

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("TLS echo server on {} shutting down", local_addr);
                    return Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((socket, peer_addr)) => {
                        debug!("New TLS connection from {}", peer_addr);

                        let acceptor = acceptor.clone();
                        let timeouts = self.timeouts;

                        tokio::spawn(async move {
                            let outcome =
                                handle_connection(socket, peer_addr, acceptor, timeouts).await;
                            trace!(
                                "Connection from {} closed (clean: {}): {:?}",
                                peer_addr,
                                outcome.is_clean(),
                                outcome
                            );
                        });
                    }
                    Err(e) => {
                        error!("TLS listener accept error: {}", e);
                        return Err(TlsEchoServerError::AcceptError(e));
                    }
                }
            }
        }
    }
}

/// Resolve a listen address, accepting the `:port` shorthand
async fn resolve_bind_addr(address: &str) -> Result<SocketAddr, TlsEchoServerError> {
    let normalized = if address.starts_with(':') {
        format!("0.0.0.0{}", address)
    } else {
        address.to_string()
    };

    let invalid = |reason: String| TlsEchoServerError::InvalidAddress {
        address: address.to_string(),
        reason,
    };

    let mut addrs = tokio::net::lookup_host(normalized.as_str())
        .await
        .map_err(|e| invalid(e.to_string()))?;
    addrs
        .next()
        .ok_or_else(|| invalid("address resolved to nothing".to_string()))
}

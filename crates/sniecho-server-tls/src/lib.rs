//! TLS echo server: terminates TLS and writes the negotiated SNI back to the client
pub mod connection;
pub mod resolver;
pub mod server;
pub mod tls;

pub use connection::{ConnectionOutcome, ConnectionTimeouts};
pub use resolver::EchoCertResolver;
pub use server::{TlsEchoServer, TlsEchoServerConfig, TlsEchoServerError};
pub use tls::build_server_config;

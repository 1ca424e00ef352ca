//! Command-line configuration

use clap::{Parser, ValueEnum};
use sniecho_cert::{CredentialSource, KeyAlgorithm, SelfSignedConfig};
use sniecho_server_tls::{ConnectionTimeouts, TlsEchoServerConfig};
use std::path::PathBuf;
use std::time::Duration;

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("GIT_HASH"),
    ", built ",
    env!("BUILD_TIME"),
    ")"
);

/// sniecho - TLS server that echoes back the SNI each client sent
#[derive(Parser, Debug)]
#[command(name = "sniecho")]
#[command(about = "TLS server that echoes back the SNI each client sent")]
#[command(version, long_version = LONG_VERSION)]
#[command(long_about = r#"
Accepts TLS connections, completes the handshake and writes the server name
(SNI) from the client's ClientHello back as a single line, then closes the
connection. Useful for checking SNI routing and ALPN negotiation through load
balancers and TLS clients.

EXAMPLES:
  # Self-signed certificate for echo.test on the default port
  sniecho --cn echo.test --dns echo.test,*.echo.test

  # Use an existing key pair and offer HTTP/2 then HTTP/1.1
  sniecho -l 0.0.0.0:443 --cert-file cert.pem --key-file key.pem --alpn h2,http/1.1

  # Query it
  openssl s_client -connect 127.0.0.1:8443 -servername echo.test -quiet
"#)]
pub struct Cli {
    /// Listening address (host:port, or :port for all interfaces)
    #[arg(short = 'l', long = "listen", env = "SNIECHO_LISTEN", default_value = ":8443")]
    pub listen: String,

    /// Certificate file in PEM
    #[arg(long, env = "SNIECHO_CERT_FILE")]
    pub cert_file: Option<PathBuf>,

    /// Private key file in PEM
    #[arg(long, env = "SNIECHO_KEY_FILE")]
    pub key_file: Option<PathBuf>,

    /// Set CA=true in the self-signed certificate
    #[arg(long, env = "SNIECHO_CA")]
    pub ca: bool,

    /// Common name in the self-signed certificate
    #[arg(long, env = "SNIECHO_CN")]
    pub cn: Option<String>,

    /// DNS names to add to the self-signed SAN, comma-separated
    #[arg(long, env = "SNIECHO_DNS")]
    pub dns: Option<String>,

    /// ALPN protocols to offer, comma-separated, most preferred first
    #[arg(long, env = "SNIECHO_ALPN")]
    pub alpn: Option<String>,

    /// Key algorithm for the self-signed certificate
    #[arg(long, env = "SNIECHO_KEY_TYPE", value_enum, default_value = "rsa")]
    pub key_type: KeyType,

    /// Seconds allowed for the TLS handshake (0 = no limit)
    #[arg(long, env = "SNIECHO_HANDSHAKE_TIMEOUT", default_value = "10")]
    pub handshake_timeout: u64,

    /// Seconds allowed for writing the reply (0 = no limit)
    #[arg(long, env = "SNIECHO_WRITE_TIMEOUT", default_value = "10")]
    pub write_timeout: u64,

    /// Print the self-signed certificate PEM to stdout at startup
    #[arg(long)]
    pub print_cert: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyType {
    /// RSA 2048
    Rsa,
    /// ECDSA P-256
    Ecdsa,
}

impl From<KeyType> for KeyAlgorithm {
    fn from(key_type: KeyType) -> Self {
        match key_type {
            KeyType::Rsa => KeyAlgorithm::Rsa2048,
            KeyType::Ecdsa => KeyAlgorithm::EcdsaP256,
        }
    }
}

impl Cli {
    pub fn credential_source(&self) -> CredentialSource {
        let self_signed = SelfSignedConfig {
            is_ca: self.ca,
            common_name: self.cn.clone().filter(|cn| !cn.is_empty()),
            dns_names: self.dns.as_deref().map(split_list).unwrap_or_default(),
            key_algorithm: self.key_type.into(),
        };

        CredentialSource::from_paths(self.cert_file.clone(), self.key_file.clone(), self_signed)
    }

    pub fn server_config(&self) -> TlsEchoServerConfig {
        TlsEchoServerConfig {
            bind_addr: self.listen.clone(),
            alpn_protocols: self.alpn.as_deref().map(split_list).unwrap_or_default(),
            timeouts: ConnectionTimeouts {
                handshake: seconds(self.handshake_timeout),
                write: seconds(self.write_timeout),
            },
        }
    }

    /// Exactly one of the two key-pair paths was given
    pub fn has_partial_key_pair(&self) -> bool {
        self.cert_file.is_some() != self.key_file.is_some()
    }

    /// Self-signed options that have no effect when loading from files
    pub fn ignored_self_signed_flags(&self) -> Vec<&'static str> {
        let mut ignored = Vec::new();
        if self.ca {
            ignored.push("--ca");
        }
        if self.cn.is_some() {
            ignored.push("--cn");
        }
        if self.dns.is_some() {
            ignored.push("--dns");
        }
        if self.key_type != KeyType::Rsa {
            ignored.push("--key-type");
        }
        if self.print_cert {
            ignored.push("--print-cert");
        }
        ignored
    }
}

/// Split a comma-separated list, dropping empty entries and keeping order
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn seconds(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

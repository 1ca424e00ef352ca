//! sniecho - diagnostic TLS server
//!
//! Terminates TLS and answers every client with the server name it presented
//! during the handshake.

mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use sniecho_cert::{generate_self_signed_cert, Credential, CredentialSource};
use sniecho_server_tls::TlsEchoServer;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::cli::Cli;

/// Setup logging; RUST_LOG takes precedence over --verbose
fn setup_logging(verbose: bool) {
    let log_level = if verbose { "debug" } else { "info" };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .with(filter)
        .init();
}

/// Obtain the credential once, before anything is bound
fn load_credential(cli: &Cli) -> Result<Credential> {
    if cli.has_partial_key_pair() {
        warn!("Both --cert-file and --key-file are required to load a key pair; generating a self-signed certificate instead");
    }

    let credential = match cli.credential_source() {
        source @ CredentialSource::Files { .. } => {
            let ignored = cli.ignored_self_signed_flags();
            if !ignored.is_empty() {
                warn!(
                    "Ignoring {} when loading the certificate from files",
                    ignored.join(", ")
                );
            }
            source.load().context("Load cert/keypair")?
        }
        CredentialSource::SelfSigned(config) => {
            let generated =
                generate_self_signed_cert(&config).context("Generate self-signed certificate")?;
            if cli.print_cert {
                print!("{}", generated.pem_cert);
            }
            generated.into_credential()
        }
    };

    let cert = &credential.info;
    info!("Certificate source: {}", credential.origin);
    info!(
        "Certificate subject: {:?}, SANs: {:?}, CA: {}",
        cert.common_name.as_deref().unwrap_or(""),
        cert.dns_names,
        cert.is_ca
    );
    info!(
        "Certificate valid from {} until {} ({} {} bits)",
        cert.not_before,
        cert.not_after,
        cert.public_key_algorithm,
        cert.public_key_bits
            .map(|bits| bits.to_string())
            .unwrap_or_else(|| "?".to_string())
    );

    if !cert.is_current() {
        warn!(
            "Certificate is outside its validity window ({} to {}); clients will reject it",
            cert.not_before, cert.not_after
        );
    }

    Ok(credential)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    let credential = load_credential(&cli)?;

    let server = TlsEchoServer::bind(cli.server_config(), credential)
        .await
        .context("Create TLS listener")?;

    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Received Ctrl+C, shutting down...");
        })
        .await
        .context("TLS listener stopped")?;

    info!("sniecho stopped");
    Ok(())
}

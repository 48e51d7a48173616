//! Counting peer - both ends of the counting session over TCP or TLS.
//!
//! This example demonstrates:
//! - Loading a JSON config and overriding it from the command line
//! - Accepting connections (optionally TLS) and running one session each
//! - Connecting as the initiating side
//!
//! # Running
//!
//! ```text
//! cargo run --example count -- listen --port 7113
//! cargo run --example count -- connect --port 7113
//! ```
//!
//! With TLS:
//!
//! ```text
//! cargo run --example count -- listen --tls-cert cert.pem --tls-key key.pem
//! cargo run --example count -- connect --host localhost --insecure
//! ```
//!
//! Set `RUST_LOG=ampwire=debug` for protocol-level logs.

use std::path::PathBuf;

use ampwire::config::TlsSettings;
use ampwire::transport::{tcp, TlsAcceptor, TlsConnector};
use ampwire::{run_count_session, Config};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "count")]
#[command(about = "Symmetric counting session over TCP or TLS", long_about = None)]
struct Cli {
    /// JSON config file; command-line options override it
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Accept connections and answer Count calls
    Listen {
        #[command(flatten)]
        common: CommonArgs,

        /// Send Count(1) on every accepted connection
        #[arg(long)]
        initiate: bool,

        /// PEM certificate chain; enables TLS together with --tls-key
        #[arg(long, value_name = "FILE", requires = "tls_key")]
        tls_cert: Option<PathBuf>,

        /// PEM private key
        #[arg(long, value_name = "FILE", requires = "tls_cert")]
        tls_key: Option<PathBuf>,
    },

    /// Connect to a listening peer and start counting
    Connect {
        #[command(flatten)]
        common: CommonArgs,

        /// Wait for the other side to send Count(1)
        #[arg(long)]
        passive: bool,

        /// PEM CA certificates to trust; enables TLS
        #[arg(long, value_name = "FILE")]
        ca: Option<PathBuf>,

        /// Use TLS without verifying the server certificate
        #[arg(long)]
        insecure: bool,
    },
}

#[derive(Args)]
struct CommonArgs {
    /// Host to bind or connect to
    #[arg(long)]
    host: Option<String>,

    /// TCP port
    #[arg(short, long)]
    port: Option<u16>,

    /// Counting limit
    #[arg(short, long)]
    max_count: Option<u32>,
}

impl CommonArgs {
    fn apply(&self, config: &mut Config) {
        if let Some(host) = &self.host {
            config.transport.host = host.clone();
        }
        if let Some(port) = self.port {
            config.transport.port = port;
        }
        if let Some(max_count) = self.max_count {
            config.session.max_count = max_count;
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(tracing::Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    match cli.command {
        Command::Listen {
            common,
            initiate,
            tls_cert,
            tls_key,
        } => {
            common.apply(&mut config);
            config.session.initiate = initiate;
            if tls_cert.is_some() {
                config.transport.tls = Some(TlsSettings {
                    cert_path: tls_cert,
                    key_path: tls_key,
                    ..TlsSettings::default()
                });
            }
            listen(config).await
        }
        Command::Connect {
            common,
            passive,
            ca,
            insecure,
        } => {
            common.apply(&mut config);
            config.session.initiate = !passive;
            if ca.is_some() || insecure {
                config.transport.tls = Some(TlsSettings {
                    ca_path: ca,
                    insecure,
                    ..TlsSettings::default()
                });
            }
            connect(config).await
        }
    }
}

async fn listen(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let acceptor = match &config.transport.tls {
        Some(settings) => Some(TlsAcceptor::from_settings(settings)?),
        None => None,
    };
    let listener = tcp::Listener::bind(&config.transport.host, config.transport.port).await?;
    tracing::info!(
        addr = %listener.local_addr()?,
        tls = acceptor.is_some(),
        "listening"
    );

    loop {
        let (stream, addr) = listener.accept().await?;
        let config = config.clone();
        let acceptor = acceptor.clone();

        tokio::spawn(async move {
            let result = match acceptor {
                Some(acceptor) => match acceptor.accept(stream).await {
                    Ok(stream) => run_count_session(stream, &config).await,
                    Err(e) => Err(e),
                },
                None => run_count_session(stream, &config).await,
            };
            match result {
                Ok(snapshot) => tracing::info!(%addr, ?snapshot, "session finished"),
                Err(e) => tracing::warn!(%addr, error = %e, "session failed"),
            }
        });
    }
}

async fn connect(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let host = config.transport.host.clone();
    let stream = tcp::connect(&host, config.transport.port).await?;

    let snapshot = match &config.transport.tls {
        Some(settings) => {
            let connector = TlsConnector::from_settings(settings)?;
            let stream = connector.connect(&host, stream).await?;
            run_count_session(stream, &config).await?
        }
        None => run_count_session(stream, &config).await?,
    };

    tracing::info!(?snapshot, "session finished");
    Ok(())
}

//! TLS transport built on rustls with the ring crypto provider.
//!
//! The server side needs a certificate chain and private key. The client side
//! either trusts a set of root certificates or, for test setups with
//! self-signed certificates, accepts any server certificate.
//!
//! # Example
//!
//! ```ignore
//! use ampwire::transport::{tcp, TlsConnector, TrustPolicy};
//!
//! let connector = TlsConnector::new(TrustPolicy::AcceptAny)?;
//! let tcp = tcp::connect("127.0.0.1", 7113).await?;
//! let stream = connector.connect("localhost", tcp).await?;
//! ```

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{ring, verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, ServerConfig, SignatureScheme};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::{client, server};

use crate::config::TlsSettings;
use crate::error::{AmpError, Result};

/// How the client decides whether to trust the server.
#[derive(Debug, Clone)]
pub enum TrustPolicy {
    /// Accept any certificate. Signatures are still checked.
    AcceptAny,
    /// Trust certificates chaining to these roots.
    Roots(Vec<CertificateDer<'static>>),
}

fn provider() -> Arc<CryptoProvider> {
    Arc::new(ring::default_provider())
}

fn tls_error(message: String) -> AmpError {
    AmpError::Tls(rustls::Error::General(message))
}

/// Read every certificate from a PEM file.
pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let mut reader = BufReader::new(File::open(path)?);
    let certs = rustls_pemfile::certs(&mut reader).collect::<std::io::Result<Vec<_>>>()?;
    if certs.is_empty() {
        return Err(tls_error(format!("no certificates in {}", path.display())));
    }
    Ok(certs)
}

/// Read the first private key from a PEM file.
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let mut reader = BufReader::new(File::open(path)?);
    rustls_pemfile::private_key(&mut reader)?
        .ok_or_else(|| tls_error(format!("no private key in {}", path.display())))
}

/// Server-side TLS handshaker.
#[derive(Clone)]
pub struct TlsAcceptor {
    inner: tokio_rustls::TlsAcceptor,
}

impl TlsAcceptor {
    /// Serve `certs` (leaf first) with `key`.
    pub fn new(certs: Vec<CertificateDer<'static>>, key: PrivateKeyDer<'static>) -> Result<Self> {
        let config = ServerConfig::builder_with_provider(provider())
            .with_safe_default_protocol_versions()?
            .with_no_client_auth()
            .with_single_cert(certs, key)?;
        Ok(Self {
            inner: tokio_rustls::TlsAcceptor::from(Arc::new(config)),
        })
    }

    /// Build from configured PEM files.
    pub fn from_settings(settings: &TlsSettings) -> Result<Self> {
        match (&settings.cert_path, &settings.key_path) {
            (Some(cert), Some(key)) => Self::new(load_certs(cert)?, load_private_key(key)?),
            _ => Err(tls_error(
                "serving TLS needs cert_path and key_path".to_string(),
            )),
        }
    }

    /// Run the server handshake on `stream`.
    pub async fn accept<S>(&self, stream: S) -> Result<server::TlsStream<S>>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let stream = self.inner.accept(stream).await?;
        tracing::debug!("TLS handshake complete (server)");
        Ok(stream)
    }
}

/// Client-side TLS handshaker.
#[derive(Clone)]
pub struct TlsConnector {
    inner: tokio_rustls::TlsConnector,
}

impl TlsConnector {
    /// Create a connector with the given trust policy.
    pub fn new(policy: TrustPolicy) -> Result<Self> {
        let provider = provider();
        let builder = ClientConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()?;

        let config = match policy {
            TrustPolicy::AcceptAny => builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert { provider }))
                .with_no_client_auth(),
            TrustPolicy::Roots(certs) => {
                let mut roots = RootCertStore::empty();
                for cert in certs {
                    roots.add(cert)?;
                }
                builder.with_root_certificates(roots).with_no_client_auth()
            }
        };

        Ok(Self {
            inner: tokio_rustls::TlsConnector::from(Arc::new(config)),
        })
    }

    /// Build from configured trust settings.
    ///
    /// `insecure` wins over `ca_path`.
    pub fn from_settings(settings: &TlsSettings) -> Result<Self> {
        if settings.insecure {
            return Self::new(TrustPolicy::AcceptAny);
        }
        match &settings.ca_path {
            Some(ca) => Self::new(TrustPolicy::Roots(load_certs(ca)?)),
            None => Err(tls_error(
                "connecting over TLS needs ca_path or insecure".to_string(),
            )),
        }
    }

    /// Run the client handshake on `stream`, expecting `server_name`.
    pub async fn connect<S>(&self, server_name: &str, stream: S) -> Result<client::TlsStream<S>>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let name = ServerName::try_from(server_name.to_string())
            .map_err(|e| tls_error(format!("invalid server name {:?}: {}", server_name, e)))?;
        let stream = self.inner.connect(name, stream).await?;
        tracing::debug!(server_name, "TLS handshake complete (client)");
        Ok(stream)
    }
}

/// Skips chain and name checks but still verifies handshake signatures.
#[derive(Debug)]
struct AcceptAnyServerCert {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustls::pki_types::PrivatePkcs8KeyDer;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    fn self_signed() -> (CertificateDer<'static>, PrivateKeyDer<'static>) {
        let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let key = PrivatePkcs8KeyDer::from(certified.key_pair.serialize_der());
        (certified.cert.der().clone(), key.into())
    }

    async fn handshake(policy: TrustPolicy) -> (Result<()>, Result<()>) {
        let (cert, key) = self_signed();
        let acceptor = TlsAcceptor::new(vec![cert], key).unwrap();
        let connector = TlsConnector::new(policy).unwrap();
        let (a, b) = duplex(64 * 1024);

        let server = async move {
            let mut stream = acceptor.accept(a).await?;
            let mut buf = [0u8; 5];
            stream.read_exact(&mut buf).await?;
            assert_eq!(&buf, b"hello");
            stream.write_all(b"world").await?;
            stream.flush().await?;
            Ok::<(), AmpError>(())
        };
        // Keep the client stream open until the server has answered
        let client = async move {
            let mut stream = connector.connect("localhost", b).await?;
            stream.write_all(b"hello").await?;
            stream.flush().await?;
            let mut buf = [0u8; 5];
            stream.read_exact(&mut buf).await?;
            assert_eq!(&buf, b"world");
            Ok::<(), AmpError>(())
        };
        tokio::join!(server, client)
    }

    #[tokio::test]
    async fn test_accept_any_handshake() {
        let (server, client) = handshake(TrustPolicy::AcceptAny).await;
        assert!(client.is_ok());
        assert!(server.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_root_rejected() {
        let (other, _) = self_signed();
        let (server, client) = handshake(TrustPolicy::Roots(vec![other])).await;
        assert!(client.is_err());
        assert!(server.is_err());
    }

    #[tokio::test]
    async fn test_invalid_server_name() {
        let connector = TlsConnector::new(TrustPolicy::AcceptAny).unwrap();
        let (_a, b) = duplex(1024);
        let result = connector.connect("not a hostname!", b).await;
        assert!(matches!(result, Err(AmpError::Tls(_))));
    }

    #[test]
    fn test_settings_require_files() {
        assert!(TlsAcceptor::from_settings(&TlsSettings::default()).is_err());
        assert!(TlsConnector::from_settings(&TlsSettings::default()).is_err());

        let insecure = TlsSettings {
            insecure: true,
            ..TlsSettings::default()
        };
        assert!(TlsConnector::from_settings(&insecure).is_ok());
    }

    #[test]
    fn test_load_pem_files() {
        let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let dir = std::env::temp_dir().join(format!("ampwire-tls-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let cert_path = dir.join("cert.pem");
        let key_path = dir.join("key.pem");
        std::fs::write(&cert_path, certified.cert.pem()).unwrap();
        std::fs::write(&key_path, certified.key_pair.serialize_pem()).unwrap();

        let certs = load_certs(&cert_path).unwrap();
        assert_eq!(certs.len(), 1);
        assert!(load_private_key(&key_path).is_ok());
        assert!(load_certs(&key_path).is_err());

        let settings = TlsSettings {
            cert_path: Some(cert_path),
            key_path: Some(key_path),
            ..TlsSettings::default()
        };
        assert!(TlsAcceptor::from_settings(&settings).is_ok());

        std::fs::remove_dir_all(&dir).unwrap();
    }
}

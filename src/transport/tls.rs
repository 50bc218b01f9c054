use super::{ByteConnection, Endpoint};
use crate::error::TransportError;
use async_trait::async_trait;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, WebPkiSupportedAlgorithms};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use rustls_pki_types::pem::PemObject;
use rustls_pki_types::{CertificateDer, ServerName, UnixTime};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

/// Upper bound on TCP connect plus TLS handshake.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// How the server certificate is trusted.
#[derive(Debug, Clone)]
pub enum TlsTrust {
    /// Bundled Mozilla root store.
    WebPkiRoots,
    /// One or more PEM encoded trust anchors.
    CaPem(Vec<u8>),
    /// SHA-256 of the server's leaf certificate.
    Fingerprint([u8; 32]),
    /// Accept any certificate.
    Insecure,
}

impl TlsTrust {
    /// Parse a hex SHA-256 fingerprint; `:` and space separators are allowed.
    pub fn fingerprint_from_hex(text: &str) -> Result<Self, TransportError> {
        let cleaned: String = text
            .chars()
            .filter(|c| !matches!(c, ':' | ' '))
            .collect();
        let bytes = hex::decode(&cleaned)
            .map_err(|e| TransportError::Tls(format!("invalid fingerprint: {e}")))?;
        let pin: [u8; 32] = bytes.try_into().map_err(|v: Vec<u8>| {
            TransportError::Tls(format!(
                "fingerprint must be 32 bytes (SHA-256), got {}",
                v.len()
            ))
        })?;
        Ok(Self::Fingerprint(pin))
    }
}

fn crypto_provider() -> Arc<CryptoProvider> {
    CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()))
}

/// Verifier used for fingerprint pinning and insecure mode.
#[derive(Debug)]
struct PinnedVerifier {
    pin: Option<[u8; 32]>,
    algorithms: WebPkiSupportedAlgorithms,
}

impl ServerCertVerifier for PinnedVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let Some(pin) = self.pin else {
            return Ok(ServerCertVerified::assertion());
        };
        let digest = Sha256::digest(end_entity.as_ref());
        if digest.as_slice() == pin.as_slice() {
            Ok(ServerCertVerified::assertion())
        } else {
            tracing::warn!(
                "TLS fingerprint mismatch: got {}, pinned {}",
                hex::encode(digest),
                hex::encode(pin)
            );
            Err(rustls::Error::General(
                "server certificate fingerprint mismatch".into(),
            ))
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}

fn build_client_config(trust: &TlsTrust) -> Result<ClientConfig, TransportError> {
    let provider = crypto_provider();
    let algorithms = provider.signature_verification_algorithms;
    let builder = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| TransportError::Tls(e.to_string()))?;

    let config = match trust {
        TlsTrust::WebPkiRoots => {
            let roots = RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            builder.with_root_certificates(roots).with_no_client_auth()
        }
        TlsTrust::CaPem(pem) => {
            let mut roots = RootCertStore::empty();
            for cert in CertificateDer::pem_slice_iter(pem) {
                let cert = cert.map_err(|e| TransportError::Tls(format!("bad PEM: {e}")))?;
                roots
                    .add(cert)
                    .map_err(|e| TransportError::Tls(e.to_string()))?;
            }
            if roots.is_empty() {
                return Err(TransportError::Tls("no certificates in PEM".into()));
            }
            builder.with_root_certificates(roots).with_no_client_auth()
        }
        TlsTrust::Fingerprint(pin) => builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(PinnedVerifier {
                pin: Some(*pin),
                algorithms,
            }))
            .with_no_client_auth(),
        TlsTrust::Insecure => {
            tracing::warn!("TLS certificate verification is disabled");
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(PinnedVerifier {
                    pin: None,
                    algorithms,
                }))
                .with_no_client_auth()
        }
    };
    Ok(config)
}

/// TLS-over-TCP byte connection to the API host.
pub struct TlsConnection {
    connector: TlsConnector,
    server_name: ServerName<'static>,
    stream: Option<TlsStream<TcpStream>>,
}

impl TlsConnection {
    /// `server_name` is used for SNI and certificate checks, also when the
    /// connection goes to a fixed IP address.
    pub fn new(server_name: &str, trust: &TlsTrust) -> Result<Self, TransportError> {
        let config = build_client_config(trust)?;
        let server_name = ServerName::try_from(server_name.to_string())
            .map_err(|e| TransportError::Tls(format!("invalid server name: {e}")))?;
        Ok(Self {
            connector: TlsConnector::from(Arc::new(config)),
            server_name,
            stream: None,
        })
    }

    async fn open(&self, endpoint: &Endpoint) -> Result<TlsStream<TcpStream>, TransportError> {
        let tcp = match endpoint {
            Endpoint::Host { name, port } => TcpStream::connect((name.as_str(), *port)).await,
            Endpoint::Address(addr) => TcpStream::connect(*addr).await,
        }
        .map_err(|source| TransportError::Connect {
            target: endpoint.to_string(),
            source,
        })?;
        tcp.set_nodelay(true)?;

        self.connector
            .connect(self.server_name.clone(), tcp)
            .await
            .map_err(|e| TransportError::Tls(e.to_string()))
    }
}

#[async_trait]
impl ByteConnection for TlsConnection {
    async fn connect(&mut self, endpoint: &Endpoint) -> Result<(), TransportError> {
        self.close().await;
        let stream = tokio::time::timeout(CONNECT_TIMEOUT, self.open(endpoint))
            .await
            .map_err(|_| TransportError::Timeout(CONNECT_TIMEOUT))??;
        self.stream = Some(stream);
        Ok(())
    }

    async fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;
        let written = async {
            stream.write_all(bytes).await?;
            stream.flush().await
        }
        .await;
        if let Err(e) = written {
            self.stream = None;
            return Err(e.into());
        }
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;
        match stream.read(buf).await {
            Ok(0) => {
                self.stream = None;
                Ok(0)
            }
            Ok(n) => Ok(n),
            Err(e) => {
                self.stream = None;
                Err(e.into())
            }
        }
    }

    fn connected(&self) -> bool {
        self.stream.is_some()
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_accepts_colon_separated_hex() {
        let hex_pin = (0u8..32)
            .map(|b| format!("{b:02X}"))
            .collect::<Vec<_>>()
            .join(":");
        let trust = TlsTrust::fingerprint_from_hex(&hex_pin).unwrap();
        match trust {
            TlsTrust::Fingerprint(pin) => assert_eq!(pin[31], 31),
            other => panic!("unexpected trust: {other:?}"),
        }
    }

    #[test]
    fn fingerprint_rejects_sha1_length() {
        let sha1 = "F2AD299C3448DD8DF4CF5232F65733682E81C190";
        let err = TlsTrust::fingerprint_from_hex(sha1).unwrap_err();
        assert!(err.to_string().contains("32 bytes"), "got: {err}");
    }

    #[test]
    fn fingerprint_rejects_garbage() {
        assert!(TlsTrust::fingerprint_from_hex("not-hex").is_err());
    }

    #[test]
    fn empty_pem_is_rejected() {
        let result = TlsConnection::new("api.telegram.org", &TlsTrust::CaPem(Vec::new()));
        assert!(result.is_err());
    }

    #[test]
    fn new_connection_starts_disconnected() {
        let conn = TlsConnection::new("api.telegram.org", &TlsTrust::WebPkiRoots).unwrap();
        assert!(!conn.connected());
    }

    #[tokio::test]
    async fn write_without_connect_fails() {
        let mut conn = TlsConnection::new("api.telegram.org", &TlsTrust::Insecure).unwrap();
        let err = conn.write_all(b"x").await.unwrap_err();
        assert!(matches!(err, TransportError::NotConnected));
    }
}

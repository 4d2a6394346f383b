//! tarpc over Quinn QUIC with TLS
//!
//! Each dialed peer gets its own QUIC connection carrying one bidirectional
//! stream. Servers accept any number of streams per connection.

use super::Network;
use crate::client::RpcClient;
use crate::config::TlsConfig;
use crate::error::{Result, RouterError};
use crate::server::{RpcHandler, ServerHandle};
use crate::types::{Closer, RunCloser, Runner};
use async_trait::async_trait;
use quinn::{ClientConfig, Endpoint, ServerConfig};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use std::fs::File;
use std::io::{self, BufReader};
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::ReadBuf;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// QUIC network; all dials share one lazily bound client endpoint
pub struct QuicNetwork {
    tls: TlsConfig,
    client_config: ClientConfig,
    client_endpoint: OnceCell<Endpoint>,
    connect_timeout: Duration,
    request_timeout: Duration,
}

impl QuicNetwork {
    /// Create the network, validating the client TLS settings up front
    pub fn new(tls: TlsConfig, connect_timeout: Duration, request_timeout: Duration) -> Result<Self> {
        let client_config = build_client_config(&tls)?;
        Ok(Self {
            tls,
            client_config,
            client_endpoint: OnceCell::new(),
            connect_timeout,
            request_timeout,
        })
    }

    async fn client_endpoint(&self) -> Result<&Endpoint> {
        self.client_endpoint
            .get_or_try_init(|| async { bind_client_endpoint(self.client_config.clone()) })
            .await
    }
}

#[async_trait]
impl Network for QuicNetwork {
    async fn dial_client(&self, addr: &str) -> Result<Arc<dyn RunCloser>> {
        let sock_addr = resolve(addr).await?;
        let endpoint = self.client_endpoint().await?;
        debug!(addr = %addr, "Connecting to node");

        let connecting = endpoint
            .connect(sock_addr, &self.tls.server_name)
            .map_err(|e| RouterError::Dial(format!("Failed to connect to {}: {}", addr, e)))?;

        let connection = tokio::time::timeout(self.connect_timeout, connecting)
            .await
            .map_err(|_| RouterError::Dial(format!("Connection to {} timed out", addr)))?
            .map_err(|e| {
                RouterError::Dial(format!("Connection handshake failed with {}: {}", addr, e))
            })?;

        let (send, recv) = connection.open_bi().await.map_err(|e| {
            RouterError::Dial(format!("Failed to open stream to {}: {}", addr, e))
        })?;

        let client = RpcClient::spawn(
            addr,
            QuicBiStream { send, recv },
            self.request_timeout,
            Some(connection),
        )
        .verified()
        .await?;
        info!(addr = %addr, "Connected to node");
        Ok(Arc::new(client))
    }

    async fn register_server(
        &self,
        addr: &str,
        handler: Arc<dyn Runner>,
    ) -> Result<Box<dyn Closer>> {
        let bind_addr = resolve(addr).await?;
        let endpoint = make_server_endpoint(&self.tls, bind_addr)?;
        let handler = RpcHandler::new(handler);

        Ok(Box::new(ServerHandle::spawn(addr, move |token| {
            accept_loop(endpoint, handler, token)
        })))
    }

    fn name(&self) -> &'static str {
        "quic"
    }
}

async fn resolve(addr: &str) -> Result<SocketAddr> {
    tokio::net::lookup_host(addr)
        .await
        .map_err(|e| RouterError::Dial(format!("Failed to resolve {}: {}", addr, e)))?
        .next()
        .ok_or_else(|| RouterError::Dial(format!("No address found for {}", addr)))
}

async fn accept_loop(endpoint: Endpoint, handler: RpcHandler, token: CancellationToken) {
    loop {
        let incoming = tokio::select! {
            _ = token.cancelled() => break,
            incoming = endpoint.accept() => match incoming {
                Some(incoming) => incoming,
                None => break,
            },
        };

        let handler = handler.clone();
        let token = token.child_token();
        tokio::spawn(async move {
            let connection = match incoming.await {
                Ok(connection) => connection,
                Err(e) => {
                    warn!(error = %e, "Failed to accept connection");
                    return;
                }
            };
            debug!(peer = %connection.remote_address(), "Accepted connection");

            loop {
                let accepted = tokio::select! {
                    _ = token.cancelled() => break,
                    accepted = connection.accept_bi() => accepted,
                };
                match accepted {
                    Ok((send, recv)) => {
                        tokio::spawn(
                            handler
                                .clone()
                                .serve_stream(QuicBiStream { send, recv }, token.clone()),
                        );
                    }
                    Err(e) => {
                        debug!(error = %e, "Connection closed");
                        break;
                    }
                }
            }
        });
    }

    endpoint.close(0u32.into(), b"server closed");
}

/// Create a QUIC server endpoint
fn make_server_endpoint(tls: &TlsConfig, bind_addr: SocketAddr) -> Result<Endpoint> {
    let server_config = build_server_config(tls)?;

    let endpoint = Endpoint::server(server_config, bind_addr).map_err(|e| {
        RouterError::Transport(format!("Failed to create server endpoint: {}", e))
    })?;

    info!(addr = %bind_addr, "QUIC server listening");
    Ok(endpoint)
}

fn bind_client_endpoint(client_config: ClientConfig) -> Result<Endpoint> {
    // Bind to any available port for client
    let bind_addr = SocketAddr::from(([0, 0, 0, 0], 0));

    let mut endpoint = Endpoint::client(bind_addr).map_err(|e| {
        RouterError::Transport(format!("Failed to create client endpoint: {}", e))
    })?;
    endpoint.set_default_client_config(client_config);

    debug!("Created QUIC client endpoint");
    Ok(endpoint)
}

/// Build rustls ServerConfig for QUIC
fn build_server_config(tls_config: &TlsConfig) -> Result<ServerConfig> {
    let (certs, key) = load_certs_and_key(tls_config)?;

    let crypto = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| RouterError::Tls(format!("Failed to build server TLS config: {}", e)))?;

    let server_config = ServerConfig::with_crypto(Arc::new(
        quinn::crypto::rustls::QuicServerConfig::try_from(crypto)
            .map_err(|e| RouterError::Tls(format!("Failed to create QUIC server config: {}", e)))?,
    ));

    Ok(server_config)
}

/// Build rustls ClientConfig for QUIC
fn build_client_config(tls_config: &TlsConfig) -> Result<ClientConfig> {
    let crypto = if tls_config.skip_verify {
        // WARNING: This is insecure and should only be used for development
        warn!("QUIC peer verification disabled - INSECURE");

        rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(SkipServerVerification))
            .with_no_client_auth()
    } else {
        // Build proper certificate verification
        let mut roots = rustls::RootCertStore::empty();

        if let Some(ref ca_path) = tls_config.ca_cert_path {
            let ca_file = File::open(ca_path).map_err(|e| {
                RouterError::Tls(format!("Failed to open CA cert file {:?}: {}", ca_path, e))
            })?;
            let mut ca_reader = BufReader::new(ca_file);
            let ca_certs = rustls_pemfile::certs(&mut ca_reader)
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| RouterError::Tls(format!("Failed to parse CA certs: {}", e)))?;

            for cert in ca_certs {
                roots
                    .add(cert)
                    .map_err(|e| RouterError::Tls(format!("Failed to add CA cert: {}", e)))?;
            }
        } else {
            // Use system root certificates
            let native_certs = rustls_native_certs::load_native_certs();
            for cert in native_certs.certs {
                let _ = roots.add(cert);
            }
        }

        rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth()
    };

    let client_config = ClientConfig::new(Arc::new(
        quinn::crypto::rustls::QuicClientConfig::try_from(crypto)
            .map_err(|e| RouterError::Tls(format!("Failed to create QUIC client config: {}", e)))?,
    ));

    Ok(client_config)
}

/// Load certificates and private key from PEM files
fn load_certs_and_key(
    tls_config: &TlsConfig,
) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)> {
    // Load certificates
    let cert_file = File::open(&tls_config.cert_path).map_err(|e| {
        RouterError::Tls(format!(
            "Failed to open cert file {:?}: {}",
            tls_config.cert_path, e
        ))
    })?;
    let mut cert_reader = BufReader::new(cert_file);
    let certs = rustls_pemfile::certs(&mut cert_reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| RouterError::Tls(format!("Failed to parse certificates: {}", e)))?;

    if certs.is_empty() {
        return Err(RouterError::Tls(format!(
            "No certificates found in {:?}",
            tls_config.cert_path
        )));
    }

    // Load private key
    let key_file = File::open(&tls_config.key_path).map_err(|e| {
        RouterError::Tls(format!(
            "Failed to open key file {:?}: {}",
            tls_config.key_path, e
        ))
    })?;
    let mut key_reader = BufReader::new(key_file);

    let key = rustls_pemfile::private_key(&mut key_reader)
        .map_err(|e| RouterError::Tls(format!("Failed to parse private key: {}", e)))?
        .ok_or_else(|| {
            RouterError::Tls(format!("No private key found in {:?}", tls_config.key_path))
        })?;

    Ok((certs, key))
}

/// Wrapper around QUIC bidirectional streams for tokio I/O
pub(crate) struct QuicBiStream {
    send: quinn::SendStream,
    recv: quinn::RecvStream,
}

impl tokio::io::AsyncRead for QuicBiStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.recv).poll_read(cx, buf)
    }
}

impl tokio::io::AsyncWrite for QuicBiStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.send)
            .poll_write(cx, buf)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.send).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.send).poll_shutdown(cx)
    }
}

/// Certificate verifier that skips all verification (INSECURE)
#[derive(Debug)]
struct SkipServerVerification;

impl rustls::client::danger::ServerCertVerifier for SkipServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::ECDSA_NISTP521_SHA512,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA512,
            rustls::SignatureScheme::ED25519,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FnRunner;
    use tempfile::TempDir;

    /// Self-signed certificate for the default server name, trusted as CA
    fn self_signed_tls(dir: &TempDir) -> TlsConfig {
        let certified = rcgen::generate_simple_self_signed(vec![default_name()]).unwrap();
        let cert_path = dir.path().join("node-cert.pem");
        let key_path = dir.path().join("node-key.pem");
        std::fs::write(&cert_path, certified.cert.pem()).unwrap();
        std::fs::write(&key_path, certified.key_pair.serialize_pem()).unwrap();

        TlsConfig {
            cert_path: cert_path.clone(),
            key_path,
            ca_cert_path: Some(cert_path),
            ..TlsConfig::default()
        }
    }

    fn default_name() -> String {
        TlsConfig::default().server_name
    }

    fn free_udp_addr() -> String {
        let socket = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        socket.local_addr().unwrap().to_string()
    }

    #[test]
    fn test_missing_ca_file() {
        let tls = TlsConfig {
            ca_cert_path: Some("/nonexistent/ca.pem".into()),
            ..TlsConfig::default()
        };
        let err = build_client_config(&tls).err().unwrap();
        assert!(matches!(err, RouterError::Tls(msg) if msg.contains("CA cert")));
    }

    #[test]
    fn test_missing_server_cert() {
        let tls = TlsConfig {
            cert_path: "/nonexistent/cert.pem".into(),
            ..TlsConfig::default()
        };
        let err = build_server_config(&tls).err().unwrap();
        assert_eq!(err.error_type(), "tls");
    }

    #[test]
    fn test_skip_verify_builds() {
        let tls = TlsConfig {
            skip_verify: true,
            ..TlsConfig::default()
        };
        let network =
            QuicNetwork::new(tls, Duration::from_secs(1), Duration::from_secs(1)).unwrap();
        assert_eq!(network.name(), "quic");
    }

    #[tokio::test]
    async fn test_register_without_certs_fails() {
        let tls = TlsConfig {
            skip_verify: true,
            cert_path: "/nonexistent/cert.pem".into(),
            ..TlsConfig::default()
        };
        let network =
            QuicNetwork::new(tls, Duration::from_secs(1), Duration::from_secs(1)).unwrap();
        let handler: Arc<dyn Runner> = Arc::new(crate::types::FnRunner::new(
            |_, input: Vec<u8>| async move { Ok(input) },
        ));
        let err = network
            .register_server("127.0.0.1:0", handler)
            .await
            .err()
            .unwrap();
        assert_eq!(err.error_type(), "tls");
    }

    #[tokio::test]
    async fn test_round_trip_over_quic() {
        let dir = tempfile::tempdir().unwrap();
        let network = QuicNetwork::new(
            self_signed_tls(&dir),
            Duration::from_secs(5),
            Duration::from_secs(5),
        )
        .unwrap();

        // Hash 0 is never owned here
        let handler: Arc<dyn Runner> = Arc::new(FnRunner::new(|hash, mut input: Vec<u8>| async move {
            if hash == 0 {
                return Err(RouterError::IncorrectPartition);
            }
            input.extend_from_slice(b"!");
            Ok(input)
        }));

        let addr = free_udp_addr();
        let server = network.register_server(&addr, handler).await.unwrap();
        let client = network.dial_client(&addr).await.unwrap();

        assert_eq!(client.run(7, b"hi".to_vec()).await.unwrap(), b"hi!".to_vec());
        assert_eq!(
            client.run(0, b"hi".to_vec()).await,
            Err(RouterError::IncorrectPartition)
        );
        // The stream survives a rejected request
        assert_eq!(client.run(8, b"ok".to_vec()).await.unwrap(), b"ok!".to_vec());

        client.close().await.unwrap();
        server.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_untrusted_server_is_dial_error() {
        let dir = tempfile::tempdir().unwrap();
        let server_net = QuicNetwork::new(
            self_signed_tls(&dir),
            Duration::from_secs(5),
            Duration::from_secs(5),
        )
        .unwrap();

        // The client trusts a different self-signed certificate
        let other = tempfile::tempdir().unwrap();
        let client_net = QuicNetwork::new(
            self_signed_tls(&other),
            Duration::from_secs(5),
            Duration::from_secs(5),
        )
        .unwrap();

        let handler: Arc<dyn Runner> =
            Arc::new(FnRunner::new(|_, input: Vec<u8>| async move { Ok(input) }));
        let addr = free_udp_addr();
        let server = server_net.register_server(&addr, handler).await.unwrap();

        let err = client_net.dial_client(&addr).await.err().unwrap();
        assert_eq!(err.error_type(), "dial");
        server.close().await.unwrap();
    }
}

//! Bounded pool of persistent TLS sockets to the binary gateway.
//!
//! Sockets are built unconnected and dial lazily on checkout; a write
//! failure or an error frame clears the stream so the next checkout
//! reconnects. Checkouts are exclusive and the socket returns to the pool
//! on drop on every exit path.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use deadpool::managed::{Manager, Metrics, Object, Pool, RecycleResult};
use rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::{client::TlsStream, TlsConnector};

use crate::routers::apns::settings::ApnsSettings;

/// Write one PDU to the gateway.
pub(crate) async fn write_frame<S>(stream: &mut S, pdu: &[u8]) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    stream.write_all(pdu).await?;
    stream.flush().await
}

/// Wait out the read deadline for an error frame. `None` means the gateway
/// stayed silent, which is how it signals acceptance; otherwise the second
/// byte of the frame is the status code.
pub(crate) async fn read_error_frame<S>(
    stream: &mut S,
    deadline: Duration,
) -> io::Result<Option<u8>>
where
    S: AsyncRead + Unpin,
{
    let mut frame = [0u8; 6];
    match tokio::time::timeout(deadline, stream.read(&mut frame)).await {
        Err(_) => Ok(None),
        Ok(Ok(n)) if n >= 2 => Ok(Some(frame[1])),
        Ok(Ok(_)) => Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "gateway closed without an error frame",
        )),
        Ok(Err(e)) => Err(e),
    }
}

/// One lazily-connected client socket.
pub struct ApnsSocket {
    connector: TlsConnector,
    host: String,
    endpoint: String,
    stream: Option<TlsStream<TcpStream>>,
    transaction_id: u32,
    read_timeout: Duration,
}

impl ApnsSocket {
    /// Open a TCP connection to the gateway and complete the TLS handshake,
    /// unless the socket is already live. A live stream is trusted; the
    /// next write's failure is the liveness probe.
    pub async fn connect(&mut self) -> io::Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        let tcp = TcpStream::connect(&self.endpoint).await?;
        let name = ServerName::try_from(self.host.clone())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let tls = self.connector.connect(name, tcp).await?;
        self.stream = Some(tls);
        Ok(())
    }

    pub fn disconnect(&mut self) {
        self.stream = None;
    }

    /// Next per-socket transaction id. The gateway echoes it in error
    /// frames to identify the failed PDU.
    pub fn next_transaction_id(&mut self) -> u32 {
        self.transaction_id = self.transaction_id.wrapping_add(1);
        self.transaction_id
    }

    /// Write one PDU; a failure clears the stream so the next checkout
    /// reconnects.
    pub async fn write_pdu(&mut self, pdu: &[u8]) -> io::Result<()> {
        let stream = self.stream.as_mut().ok_or_else(not_connected)?;
        match write_frame(stream, pdu).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.disconnect();
                Err(e)
            }
        }
    }

    /// Wait for an error frame within the read deadline. Receiving one, or
    /// any read failure, means the gateway is closing this socket.
    pub async fn read_status(&mut self) -> io::Result<Option<u8>> {
        let deadline = self.read_timeout;
        let stream = self.stream.as_mut().ok_or_else(not_connected)?;
        match read_error_frame(stream, deadline).await {
            Ok(None) => Ok(None),
            Ok(Some(code)) => {
                self.disconnect();
                Ok(Some(code))
            }
            Err(e) => {
                self.disconnect();
                Err(e)
            }
        }
    }
}

fn not_connected() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "socket is not connected")
}

/// Socket manager: sockets share the application's parsed TLS
/// configuration and are created unconnected.
pub struct SocketManager {
    config: Arc<ClientConfig>,
    host: String,
    endpoint: String,
    read_timeout: Duration,
}

impl SocketManager {
    /// Parse the PEM credential and build the client TLS configuration.
    /// The certificate chain and private key share one buffer, so the same
    /// bytes are scanned for both.
    fn new(pem: &[u8], endpoint: &str, read_timeout: Duration) -> io::Result<Self> {
        let certs: Vec<CertificateDer<'static>> =
            rustls_pemfile::certs(&mut io::Cursor::new(pem)).collect::<Result<_, _>>()?;
        if certs.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "no certificate in credential",
            ));
        }
        let key: PrivateKeyDer<'static> = rustls_pemfile::private_key(&mut io::Cursor::new(pem))?
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidInput, "no private key in credential")
            })?;
        let config = ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert))
            .with_client_auth_cert(certs, key)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let host = endpoint.split(':').next().unwrap_or(endpoint).to_string();
        Ok(Self {
            config: Arc::new(config),
            host,
            endpoint: endpoint.to_string(),
            read_timeout,
        })
    }
}

impl Manager for SocketManager {
    type Type = ApnsSocket;
    type Error = io::Error;

    async fn create(&self) -> Result<ApnsSocket, Self::Error> {
        Ok(ApnsSocket {
            connector: TlsConnector::from(self.config.clone()),
            host: self.host.clone(),
            endpoint: self.endpoint.clone(),
            stream: None,
            transaction_id: 0,
            read_timeout: self.read_timeout,
        })
    }

    async fn recycle(&self, _socket: &mut ApnsSocket, _: &Metrics) -> RecycleResult<Self::Error> {
        // Disconnected sockets stay in the pool; connect() redials lazily.
        Ok(())
    }
}

/// Fixed-capacity pool of gateway sockets for one application.
#[derive(Clone)]
pub struct SocketPool {
    pool: Pool<SocketManager>,
}

impl SocketPool {
    pub fn new(pem: &[u8], settings: &ApnsSettings) -> io::Result<Self> {
        let manager = SocketManager::new(
            pem,
            settings.gateway(),
            Duration::from_millis(settings.read_timeout_millis),
        )?;
        let pool = Pool::builder(manager)
            .max_size(settings.pool_size)
            .build()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
        Ok(Self { pool })
    }

    /// Check a socket out, suspending while all of them are in use.
    pub async fn get(&self) -> io::Result<Object<SocketManager>> {
        self.pool
            .get()
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))
    }
}

/// Gateway peer verification is skipped: every presented certificate is
/// accepted.
#[derive(Debug)]
struct AcceptAnyServerCert;

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA1,
            SignatureScheme::ECDSA_SHA1_Legacy,
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP521_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
            SignatureScheme::ED448,
        ]
    }
}

// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! QUIC client helpers for connecting to a taskfabric runner.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use quinn::{ClientConfig, Connection, Endpoint, RecvStream, SendStream, TransportConfig};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use crate::frame::{Frame, FrameError, MessageType, read_frame, write_frame};
use crate::messages::{ClientMsg, RunnerMsg, RunnerStatus};

/// Errors that can occur in the QUIC client
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("connection error: {0}")]
    Connection(#[from] quinn::ConnectionError),

    #[error("connect error: {0}")]
    Connect(#[from] quinn::ConnectError),

    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("stream closed: {0}")]
    ClosedStream(#[from] quinn::ClosedStream),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("no connection established")]
    NotConnected,

    #[error("connection timed out after {0}ms")]
    Timeout(u64),
}

/// Client identity presented for mutual TLS (PEM format)
#[derive(Debug, Clone)]
pub struct ClientIdentity {
    pub cert_pem: Vec<u8>,
    pub key_pem: Vec<u8>,
}

/// Configuration for the QUIC client
#[derive(Debug, Clone)]
pub struct RunnerClientConfig {
    /// Runner address to connect to
    pub server_addr: SocketAddr,
    /// Server name for TLS verification
    pub server_name: String,
    /// Trusted authority for the runner certificate (PEM format).
    /// Falls back to the web PKI roots when unset.
    pub ca_pem: Option<Vec<u8>>,
    /// Certificate presented to runners that require client authentication
    pub identity: Option<ClientIdentity>,
    /// Skip certificate verification (for development only!)
    pub dangerous_skip_cert_verification: bool,
    /// Keep-alive interval in milliseconds (0 to disable)
    pub keep_alive_interval_ms: u64,
    /// Idle timeout in milliseconds
    pub idle_timeout_ms: u64,
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,
}

impl Default for RunnerClientConfig {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::from(([127, 0, 0, 1], 9190)),
            server_name: "localhost".to_string(),
            ca_pem: None,
            identity: None,
            dangerous_skip_cert_verification: false,
            keep_alive_interval_ms: 10_000,
            idle_timeout_ms: 120_000,
            connect_timeout_ms: 10_000,
        }
    }
}

/// QUIC client for talking to a runner
pub struct RunnerClient {
    endpoint: Endpoint,
    connection: Mutex<Option<Connection>>,
    config: RunnerClientConfig,
}

impl RunnerClient {
    /// Create a new client with the given configuration
    pub fn new(config: RunnerClientConfig) -> Result<Self, ClientError> {
        let mut endpoint = Endpoint::client(SocketAddr::from(([0, 0, 0, 0], 0)))?;

        let client_config = Self::build_client_config(&config)?;
        endpoint.set_default_client_config(client_config);

        Ok(Self {
            endpoint,
            connection: Mutex::new(None),
            config,
        })
    }

    /// Create a client for a runner in insecure mode (no certificate checks)
    pub fn insecure(server_addr: SocketAddr) -> Result<Self, ClientError> {
        Self::new(RunnerClientConfig {
            server_addr,
            dangerous_skip_cert_verification: true,
            ..Default::default()
        })
    }

    /// Address of the runner this client talks to
    pub fn server_addr(&self) -> SocketAddr {
        self.config.server_addr
    }

    fn build_client_config(config: &RunnerClientConfig) -> Result<ClientConfig, ClientError> {
        let builder = if config.dangerous_skip_cert_verification {
            rustls::ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(SkipServerVerification))
        } else {
            let mut roots = rustls::RootCertStore::empty();
            match &config.ca_pem {
                Some(ca_pem) => {
                    for cert in rustls_pemfile::certs(&mut ca_pem.as_slice()) {
                        let cert = cert.map_err(|e| {
                            ClientError::Tls(format!("failed to parse CA certificate: {}", e))
                        })?;
                        roots.add(cert).map_err(|e| ClientError::Tls(e.to_string()))?;
                    }
                }
                None => roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned()),
            }
            rustls::ClientConfig::builder().with_root_certificates(roots)
        };

        let crypto = match &config.identity {
            Some(identity) => {
                let certs = rustls_pemfile::certs(&mut identity.cert_pem.as_slice())
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|e| {
                        ClientError::Tls(format!("failed to parse client certificate: {}", e))
                    })?;
                let key = rustls_pemfile::private_key(&mut identity.key_pem.as_slice())
                    .map_err(|e| ClientError::Tls(format!("failed to parse client key: {}", e)))?
                    .ok_or_else(|| ClientError::Tls("no client private key found".to_string()))?;
                builder
                    .with_client_auth_cert(certs, key)
                    .map_err(|e| ClientError::Tls(e.to_string()))?
            }
            None => builder.with_no_client_auth(),
        };

        let mut transport = TransportConfig::default();
        if config.keep_alive_interval_ms > 0 {
            transport.keep_alive_interval(Some(Duration::from_millis(
                config.keep_alive_interval_ms,
            )));
        }
        let idle_timeout =
            quinn::IdleTimeout::try_from(Duration::from_millis(config.idle_timeout_ms))
                .map_err(|e| ClientError::Tls(format!("invalid idle timeout: {}", e)))?;
        transport.max_idle_timeout(Some(idle_timeout));

        let mut client_config = ClientConfig::new(Arc::new(
            quinn::crypto::rustls::QuicClientConfig::try_from(crypto)
                .map_err(|e| ClientError::Tls(e.to_string()))?,
        ));
        client_config.transport_config(Arc::new(transport));

        Ok(client_config)
    }

    /// Connect to the runner
    #[instrument(skip(self))]
    pub async fn connect(&self) -> Result<(), ClientError> {
        let mut conn_guard = self.connection.lock().await;

        if let Some(ref conn) = *conn_guard
            && conn.close_reason().is_none()
        {
            debug!("reusing existing connection");
            return Ok(());
        }

        info!(addr = %self.config.server_addr, "connecting to runner");

        let timeout = Duration::from_millis(self.config.connect_timeout_ms);
        let connecting = self
            .endpoint
            .connect(self.config.server_addr, &self.config.server_name)?;

        let connection = tokio::time::timeout(timeout, connecting)
            .await
            .map_err(|_| ClientError::Timeout(self.config.connect_timeout_ms))??;

        info!("connected to runner");
        *conn_guard = Some(connection);
        Ok(())
    }

    async fn get_connection(&self) -> Result<Connection, ClientError> {
        self.connect().await?;
        let conn_guard = self.connection.lock().await;
        conn_guard.clone().ok_or(ClientError::NotConnected)
    }

    /// Open a new engagement stream
    pub async fn engage(&self) -> Result<Engagement, ClientError> {
        let conn = self.get_connection().await?;
        let (send, recv) = conn.open_bi().await?;
        Ok(Engagement { send, recv })
    }

    /// Ask the runner how many engagements it currently has in flight
    #[instrument(skip(self))]
    pub async fn status(&self) -> Result<RunnerStatus, ClientError> {
        let conn = self.get_connection().await?;
        let (mut send, mut recv) = conn.open_bi().await?;
        write_frame(&mut send, &Frame::status_request()?).await?;
        send.finish()?;

        let frame = read_frame(&mut recv).await?;
        Ok(frame.decode_as(MessageType::StatusResponse)?)
    }

    /// Close the connection gracefully
    pub async fn close(&self) {
        let mut conn_guard = self.connection.lock().await;
        if let Some(conn) = conn_guard.take() {
            conn.close(0u32.into(), b"client closing");
        }
    }

    /// Check if the client is currently connected
    pub async fn is_connected(&self) -> bool {
        let conn_guard = self.connection.lock().await;
        if let Some(ref conn) = *conn_guard {
            conn.close_reason().is_none()
        } else {
            false
        }
    }
}

impl Drop for RunnerClient {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.connection.try_lock()
            && let Some(conn) = guard.take()
        {
            conn.close(0u32.into(), b"client dropped");
        }
    }
}

/// Client side of one engagement stream.
pub struct Engagement {
    send: SendStream,
    recv: RecvStream,
}

impl Engagement {
    /// Submit a serialized call descriptor
    pub async fn submit(&mut self, call_descriptor: impl Into<Vec<u8>>) -> Result<(), ClientError> {
        self.send_msg(&ClientMsg::try_call(call_descriptor)).await
    }

    /// Send a chunk of call input
    pub async fn send_data(
        &mut self,
        data: impl Into<Vec<u8>>,
        eof: bool,
    ) -> Result<(), ClientError> {
        self.send_msg(&ClientMsg::data(data, eof)).await
    }

    pub async fn send_msg(&mut self, msg: &ClientMsg) -> Result<(), ClientError> {
        write_frame(&mut self.send, &Frame::client(msg)?).await?;
        Ok(())
    }

    /// Receive the next runner message; `None` once the runner finished the stream
    pub async fn next_message(&mut self) -> Result<Option<RunnerMsg>, ClientError> {
        match read_frame(&mut self.recv).await {
            Ok(frame) => Ok(Some(frame.decode_as(MessageType::RunnerMsg)?)),
            Err(FrameError::ConnectionClosed) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Signal that no more client messages follow
    pub fn finish(&mut self) -> Result<(), ClientError> {
        self.send.finish()?;
        Ok(())
    }

    /// Split into the send and receive halves, for sending input while the
    /// response is being read
    pub fn into_parts(self) -> (SendStream, RecvStream) {
        (self.send, self.recv)
    }

    /// Abort the engagement, resetting both directions
    pub fn abort(mut self) {
        let _ = self.send.reset(0u32.into());
        let _ = self.recv.stop(0u32.into());
    }
}

/// Certificate verifier that skips all verification (for development only!)
#[derive(Debug)]
struct SkipServerVerification;

impl rustls::client::danger::ServerCertVerifier for SkipServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
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

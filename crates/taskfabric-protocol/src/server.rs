// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! QUIC server helpers for taskfabric runners.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use quinn::{Endpoint, Incoming, RecvStream, SendStream, ServerConfig, TransportConfig};
use rustls::pki_types::CertificateDer;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};


/// Errors that can occur in the QUIC server
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("bind error: {0}")]
    Bind(#[from] std::io::Error),

    #[error("connection error: {0}")]
    Connection(#[from] quinn::ConnectionError),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("invalid server configuration: {0}")]
    InvalidConfig(String),

    #[error("server closed")]
    Closed,
}

/// Configuration for the QUIC server
#[derive(Debug, Clone)]
pub struct FabricServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,
    /// TLS certificate chain (PEM format)
    pub cert_pem: Vec<u8>,
    /// TLS private key (PEM format)
    pub key_pem: Vec<u8>,
    /// Trusted authority for client certificates (PEM format).
    /// When set, every client must present a certificate chaining to it.
    pub client_ca_pem: Option<Vec<u8>>,
    /// Maximum pending incoming connections (handshakes in progress)
    pub max_incoming: u32,
    /// Maximum concurrent bidirectional streams per connection
    pub max_bi_streams: u32,
    /// Idle timeout in milliseconds
    pub idle_timeout_ms: u64,
    /// Server-side keep-alive interval in milliseconds (0 to disable)
    pub keep_alive_interval_ms: u64,
    /// UDP receive buffer size in bytes (0 for OS default)
    pub udp_receive_buffer_size: usize,
    /// UDP send buffer size in bytes (0 for OS default)
    pub udp_send_buffer_size: usize,
    /// Maximum concurrent connection handlers (0 for unlimited)
    pub max_concurrent_handlers: u32,
}

impl Default for FabricServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 9190)),
            cert_pem: Vec::new(),
            key_pem: Vec::new(),
            client_ca_pem: None,
            max_incoming: 10_000,
            max_bi_streams: 1_000,
            idle_timeout_ms: 120_000,
            keep_alive_interval_ms: 15_000,
            udp_receive_buffer_size: 2 * 1024 * 1024, // 2MB
            udp_send_buffer_size: 2 * 1024 * 1024,    // 2MB
            max_concurrent_handlers: 0,               // unlimited by default
        }
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl FabricServerConfig {
    /// Create a configuration from environment variables with defaults.
    ///
    /// Environment variables:
    /// - `TASKFABRIC_QUIC_MAX_INCOMING`: Max pending handshakes (default: 10000)
    /// - `TASKFABRIC_QUIC_MAX_BI_STREAMS`: Max bidirectional streams per connection (default: 1000)
    /// - `TASKFABRIC_QUIC_IDLE_TIMEOUT_MS`: Idle timeout in ms (default: 120000)
    /// - `TASKFABRIC_QUIC_KEEP_ALIVE_MS`: Keep-alive interval in ms, 0 to disable (default: 15000)
    /// - `TASKFABRIC_QUIC_UDP_RECV_BUFFER`: UDP receive buffer size in bytes (default: 2097152)
    /// - `TASKFABRIC_QUIC_UDP_SEND_BUFFER`: UDP send buffer size in bytes (default: 2097152)
    /// - `TASKFABRIC_QUIC_MAX_HANDLERS`: Max concurrent connection handlers, 0 for unlimited (default: 0)
    ///
    /// Bind address and TLS material are left at their defaults; callers fill them in.
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            max_incoming: env_or("TASKFABRIC_QUIC_MAX_INCOMING", default.max_incoming),
            max_bi_streams: env_or("TASKFABRIC_QUIC_MAX_BI_STREAMS", default.max_bi_streams),
            idle_timeout_ms: env_or("TASKFABRIC_QUIC_IDLE_TIMEOUT_MS", default.idle_timeout_ms),
            keep_alive_interval_ms: env_or(
                "TASKFABRIC_QUIC_KEEP_ALIVE_MS",
                default.keep_alive_interval_ms,
            ),
            udp_receive_buffer_size: env_or(
                "TASKFABRIC_QUIC_UDP_RECV_BUFFER",
                default.udp_receive_buffer_size,
            ),
            udp_send_buffer_size: env_or(
                "TASKFABRIC_QUIC_UDP_SEND_BUFFER",
                default.udp_send_buffer_size,
            ),
            max_concurrent_handlers: env_or(
                "TASKFABRIC_QUIC_MAX_HANDLERS",
                default.max_concurrent_handlers,
            ),
            ..default
        }
    }

    /// Whether clients are required to authenticate with a certificate
    pub fn requires_client_auth(&self) -> bool {
        self.client_ca_pem.is_some()
    }
}

/// QUIC server for taskfabric runners
pub struct FabricServer {
    endpoint: Endpoint,
    config: FabricServerConfig,
}

impl FabricServer {
    /// Create a new server with the given configuration
    pub fn new(config: FabricServerConfig) -> Result<Self, ServerError> {
        use socket2::{Domain, Protocol, Socket, Type};

        let server_config = Self::build_server_config(&config)?;

        let domain = if config.bind_addr.is_ipv6() {
            Domain::IPV6
        } else {
            Domain::IPV4
        };
        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;

        if config.udp_receive_buffer_size > 0
            && let Err(e) = socket.set_recv_buffer_size(config.udp_receive_buffer_size)
        {
            warn!(
                size = config.udp_receive_buffer_size,
                error = %e,
                "Failed to set UDP receive buffer size"
            );
        }
        if config.udp_send_buffer_size > 0
            && let Err(e) = socket.set_send_buffer_size(config.udp_send_buffer_size)
        {
            warn!(
                size = config.udp_send_buffer_size,
                error = %e,
                "Failed to set UDP send buffer size"
            );
        }

        socket.bind(&config.bind_addr.into())?;
        let std_socket: std::net::UdpSocket = socket.into();

        let runtime = quinn::default_runtime()
            .ok_or_else(|| ServerError::Bind(std::io::Error::other("no async runtime found")))?;
        let endpoint = Endpoint::new_with_abstract_socket(
            quinn::EndpointConfig::default(),
            Some(server_config),
            runtime.wrap_udp_socket(std_socket)?,
            runtime,
        )?;

        info!(
            addr = %config.bind_addr,
            mutual_tls = config.requires_client_auth(),
            max_incoming = config.max_incoming,
            max_bi_streams = config.max_bi_streams,
            idle_timeout_ms = config.idle_timeout_ms,
            keep_alive_ms = config.keep_alive_interval_ms,
            max_handlers = config.max_concurrent_handlers,
            "QUIC server bound"
        );

        Ok(Self { endpoint, config })
    }

    /// Create a server with an ephemeral self-signed certificate and no
    /// client authentication.
    pub fn insecure(bind_addr: SocketAddr) -> Result<Self, ServerError> {
        Self::insecure_with_config(bind_addr, FabricServerConfig::from_env())
    }

    /// Create a server with an ephemeral self-signed certificate and custom config
    pub fn insecure_with_config(
        bind_addr: SocketAddr,
        mut config: FabricServerConfig,
    ) -> Result<Self, ServerError> {
        let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
            .map_err(|e| ServerError::Tls(e.to_string()))?;

        config.bind_addr = bind_addr;
        config.cert_pem = cert.cert.pem().into_bytes();
        config.key_pem = cert.key_pair.serialize_pem().into_bytes();
        config.client_ca_pem = None;

        Self::new(config)
    }

    /// Get the server configuration
    pub fn config(&self) -> &FabricServerConfig {
        &self.config
    }

    fn parse_certs(pem: &[u8], what: &str) -> Result<Vec<CertificateDer<'static>>, ServerError> {
        let certs = rustls_pemfile::certs(&mut &pem[..])
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ServerError::Tls(format!("failed to parse {}: {}", what, e)))?;
        if certs.is_empty() {
            return Err(ServerError::Tls(format!("no {} found", what)));
        }
        Ok(certs)
    }

    fn build_server_config(config: &FabricServerConfig) -> Result<ServerConfig, ServerError> {
        let certs = Self::parse_certs(&config.cert_pem, "certificates")?;

        let key = rustls_pemfile::private_key(&mut config.key_pem.as_slice())
            .map_err(|e| ServerError::Tls(format!("failed to parse private key: {}", e)))?
            .ok_or_else(|| ServerError::Tls("no private key found".to_string()))?;

        let builder = rustls::ServerConfig::builder();
        let crypto = match &config.client_ca_pem {
            Some(ca_pem) => {
                let mut roots = rustls::RootCertStore::empty();
                for cert in Self::parse_certs(ca_pem, "CA certificates")? {
                    roots
                        .add(cert)
                        .map_err(|e| ServerError::Tls(format!("invalid CA certificate: {}", e)))?;
                }
                let verifier = rustls::server::WebPkiClientVerifier::builder(Arc::new(roots))
                    .build()
                    .map_err(|e| ServerError::Tls(e.to_string()))?;
                builder
                    .with_client_cert_verifier(verifier)
                    .with_single_cert(certs, key)
            }
            None => builder.with_no_client_auth().with_single_cert(certs, key),
        }
        .map_err(|e| ServerError::Tls(e.to_string()))?;

        let mut transport = TransportConfig::default();
        let idle_timeout = quinn::IdleTimeout::try_from(Duration::from_millis(
            config.idle_timeout_ms,
        ))
        .map_err(|e| ServerError::InvalidConfig(format!("idle timeout: {}", e)))?;
        transport.max_idle_timeout(Some(idle_timeout));
        transport.max_concurrent_bidi_streams(config.max_bi_streams.into());
        // Engagements only use bidirectional streams
        transport.max_concurrent_uni_streams(0u32.into());

        if config.keep_alive_interval_ms > 0 {
            transport.keep_alive_interval(Some(Duration::from_millis(
                config.keep_alive_interval_ms,
            )));
        }

        let mut server_config = ServerConfig::with_crypto(Arc::new(
            quinn::crypto::rustls::QuicServerConfig::try_from(crypto)
                .map_err(|e| ServerError::Tls(e.to_string()))?,
        ));
        server_config.transport_config(Arc::new(transport));
        server_config.max_incoming(config.max_incoming as usize);

        Ok(server_config)
    }

    /// Accept the next incoming connection
    pub async fn accept(&self) -> Option<Incoming> {
        self.endpoint.accept().await
    }

    /// Get the local address the server is bound to
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.endpoint.local_addr()?)
    }

    /// Close the server
    pub fn close(&self) {
        self.endpoint.close(0u32.into(), b"server closing");
    }

    /// Run the server with a connection handler
    #[instrument(skip(self, handler))]
    pub async fn run<H, Fut>(&self, handler: H) -> Result<(), ServerError>
    where
        H: Fn(ConnectionHandler) -> Fut + Send + Sync + Clone + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        use tokio::sync::Semaphore;

        info!("QUIC server running");

        let semaphore = if self.config.max_concurrent_handlers > 0 {
            Some(Arc::new(Semaphore::new(
                self.config.max_concurrent_handlers as usize,
            )))
        } else {
            None
        };

        while let Some(incoming) = self.accept().await {
            let handler = handler.clone();
            let semaphore = semaphore.clone();

            tokio::spawn(async move {
                let _permit = if let Some(ref sem) = semaphore {
                    match sem.clone().acquire_owned().await {
                        Ok(permit) => Some(permit),
                        Err(_) => {
                            warn!("semaphore closed, dropping connection");
                            return;
                        }
                    }
                } else {
                    None
                };

                match incoming.await {
                    Ok(connection) => {
                        let remote_addr = connection.remote_address();
                        debug!(%remote_addr, "accepted connection");

                        let conn_handler = ConnectionHandler::new(connection);
                        handler(conn_handler).await;
                    }
                    Err(e) => {
                        // Also where clients without a valid certificate end up
                        warn!("failed to accept connection: {}", e);
                    }
                }
            });
        }

        Ok(())
    }
}

/// Handler for an individual QUIC connection
pub struct ConnectionHandler {
    connection: quinn::Connection,
}

impl ConnectionHandler {
    pub fn new(connection: quinn::Connection) -> Self {
        Self { connection }
    }

    /// Get the remote address of the connection
    pub fn remote_address(&self) -> SocketAddr {
        self.connection.remote_address()
    }

    /// Whether the peer presented a (verified) client certificate
    pub fn is_authenticated(&self) -> bool {
        self.connection.peer_identity().is_some()
    }

    /// Accept the next bidirectional stream
    pub async fn accept_bi(&self) -> Result<(SendStream, RecvStream), ServerError> {
        Ok(self.connection.accept_bi().await?)
    }

    /// Run the connection handler with a stream handler
    #[instrument(skip(self, handler), fields(remote = %self.remote_address()))]
    pub async fn run<H, Fut>(&self, handler: H)
    where
        H: Fn(StreamHandler) -> Fut + Send + Sync + Clone + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        loop {
            match self.accept_bi().await {
                Ok((send, recv)) => {
                    let handler = handler.clone();
                    tokio::spawn(async move {
                        let stream_handler = StreamHandler::new(send, recv);
                        handler(stream_handler).await;
                    });
                }
                Err(e) => {
                    match &e {
                        ServerError::Connection(quinn::ConnectionError::ApplicationClosed(_))
                        | ServerError::Connection(quinn::ConnectionError::LocallyClosed) => {
                            debug!("connection closed");
                        }
                        _ => {
                            error!("error accepting stream: {}", e);
                        }
                    }
                    break;
                }
            }
        }
    }
}

/// Handler for an individual QUIC stream (bidirectional)
pub struct StreamHandler {
    send: SendStream,
    recv: RecvStream,
}

impl StreamHandler {
    pub fn new(send: SendStream, recv: RecvStream) -> Self {
        Self { send, recv }
    }

    /// Split into the send and receive halves, for patterns where reading
    /// and writing happen on different tasks
    pub fn into_parts(self) -> (SendStream, RecvStream) {
        (self.send, self.recv)
    }
}

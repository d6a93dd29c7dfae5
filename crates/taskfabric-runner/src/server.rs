// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Runner QUIC server.
//!
//! Every bidirectional stream is one engagement, unless its first frame is a
//! status request.

use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};

use anyhow::Result;
use taskfabric_protocol::{
    ConnectionHandler, FabricServer, FabricServerConfig, Frame, FrameError, MessageType,
    RunnerStatus, StreamHandler, read_frame, write_frame,
};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, error, info, instrument, warn};

use crate::agent::Agent;
use crate::config::Config;
use crate::error::EngageError;
use crate::session::EngagementSession;

/// Number of engagements currently being served.
#[derive(Debug, Default)]
pub struct InflightCounter(AtomicI32);

impl InflightCounter {
    /// Count one engagement until the guard is dropped.
    pub fn enter(self: &Arc<Self>) -> InflightGuard {
        self.0.fetch_add(1, Ordering::SeqCst);
        InflightGuard(self.clone())
    }

    pub fn current(&self) -> i32 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Decrements the in-flight count on drop.
#[derive(Debug)]
pub struct InflightGuard(Arc<InflightCounter>);

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.0.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Shared state for the runner server
pub struct RunnerState {
    pub agent: Arc<dyn Agent>,
    pub inflight: Arc<InflightCounter>,
}

impl RunnerState {
    pub fn new(agent: Arc<dyn Agent>) -> Self {
        Self {
            agent,
            inflight: Arc::new(InflightCounter::default()),
        }
    }

    pub fn status(&self) -> RunnerStatus {
        RunnerStatus {
            active: self.inflight.current(),
        }
    }
}

/// Build the QUIC endpoint: mutual TLS when certificate, key and CA are all
/// configured, otherwise an ephemeral self-signed certificate without client
/// authentication.
pub fn create_server(config: &Config) -> Result<FabricServer> {
    let transport = FabricServerConfig::from_env();

    if config.tls_incomplete {
        warn!(
            "TASKFABRIC_TLS_CERT, TASKFABRIC_TLS_KEY and TASKFABRIC_TLS_CA must all be set to enable mutual TLS"
        );
    }

    let server = match &config.tls {
        Some(paths) => {
            let material = paths.load()?;
            info!(cert = %paths.cert.display(), "mutual TLS enabled");
            FabricServer::new(FabricServerConfig {
                bind_addr: config.bind_addr,
                cert_pem: material.cert_pem,
                key_pem: material.key_pem,
                client_ca_pem: Some(material.ca_pem),
                ..transport
            })?
        }
        None => {
            warn!("Running runner in insecure mode: no client authentication");
            FabricServer::insecure_with_config(config.bind_addr, transport)?
        }
    };
    Ok(server)
}

/// Run the runner QUIC server until the endpoint closes
#[instrument(skip(server, state))]
pub async fn run_runner_server(server: Arc<FabricServer>, state: Arc<RunnerState>) -> Result<()> {
    info!(
        addr = %server.local_addr()?,
        engine = state.agent.engine_type(),
        mutual_tls = server.config().requires_client_auth(),
        "Runner QUIC server starting"
    );

    server
        .run(move |conn: ConnectionHandler| {
            let state = state.clone();
            async move {
                handle_connection(conn, state).await;
            }
        })
        .await?;

    Ok(())
}

/// Handle a single connection
#[instrument(skip(conn, state), fields(remote = %conn.remote_address()))]
pub async fn handle_connection(conn: ConnectionHandler, state: Arc<RunnerState>) {
    debug!(authenticated = conn.is_authenticated(), "connection accepted");

    conn.run(move |stream: StreamHandler| {
        let state = state.clone();
        async move {
            let (send, recv) = stream.into_parts();
            if let Err(e) = serve_stream(state, recv, send).await {
                if e.is_disconnect() {
                    debug!("stream closed: {}", e);
                } else {
                    error!("stream error: {}", e);
                }
            }
        }
    })
    .await;

    debug!("connection closed");
}

/// Serve one stream: a status query or an engagement, decided by the first
/// frame.
pub async fn serve_stream<R, W>(
    state: Arc<RunnerState>,
    mut recv: R,
    mut send: W,
) -> Result<(), EngageError>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let first = read_frame(&mut recv).await.map_err(EngageError::Receive)?;

    match first.message_type {
        MessageType::StatusRequest => {
            let status = state.status();
            debug!(active = status.active, "status requested");
            let reply =
                Frame::status_response(&status).map_err(|e| EngageError::Send(e.into()))?;
            write_status(&mut send, &reply).await
        }
        MessageType::ClientMsg => {
            let _inflight = state.inflight.enter();
            EngagementSession::new(state.agent.clone(), recv, send)
                .run_after(first)
                .await
        }
        other => {
            let _ = write_status(&mut send, &Frame::error()).await;
            Err(EngageError::Protocol(format!(
                "unexpected {:?} frame opening a stream",
                other
            )))
        }
    }
}

async fn write_status<W>(send: &mut W, frame: &Frame) -> Result<(), EngageError>
where
    W: AsyncWrite + Unpin,
{
    let map = |e: FrameError| EngageError::Send(e.into());
    write_frame(send, frame).await.map_err(map)?;
    send.shutdown()
        .await
        .map_err(|e| map(FrameError::Io(e)))?;
    Ok(())
}

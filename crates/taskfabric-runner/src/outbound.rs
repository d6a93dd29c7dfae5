// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Serialized send half of an engagement stream.
//!
//! The receive loop (acknowledgments) and the executor (response and
//! `CallFinished`) both send on the same stream. Every send goes through one
//! async mutex that owns the writer together with the fault flag, so "check
//! fault, send, record fault" is a single critical section and frames never
//! interleave.

use std::fmt::Display;

use taskfabric_protocol::{Frame, RunnerMsg, write_frame};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::SinkError;

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Send half shared by the session and its executor.
pub struct Outbound {
    state: Mutex<OutboundState>,
}

struct OutboundState {
    writer: BoxedWriter,
    /// Set once by the first failed send or receive; never cleared.
    fault: Option<String>,
    finished_sent: bool,
}

impl Outbound {
    pub fn new<W>(writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            state: Mutex::new(OutboundState {
                writer: Box::new(writer),
                fault: None,
                finished_sent: false,
            }),
        }
    }

    /// Send one message. Refuses without I/O once the stream has faulted.
    pub async fn send(&self, msg: &RunnerMsg) -> Result<(), SinkError> {
        let mut state = self.state.lock().await;
        state.send(msg).await
    }

    /// Send the terminal `CallFinished` message and finish the send half.
    ///
    /// Returns `Ok(false)` when a `CallFinished` was already sent (or
    /// attempted) on this stream.
    pub async fn send_finished(&self, success: bool, details: &str) -> Result<bool, SinkError> {
        let mut state = self.state.lock().await;
        if state.finished_sent {
            return Ok(false);
        }
        state.finished_sent = true;
        state.send(&RunnerMsg::finished(success, details)).await?;

        if let Err(e) = state.writer.shutdown().await {
            debug!("failed to finish send stream: {}", e);
        }
        Ok(true)
    }

    /// Mark the stream faulted (first reason wins).
    pub async fn record_fault(&self, reason: impl Display) {
        let mut state = self.state.lock().await;
        if state.fault.is_none() {
            warn!(reason = %reason, "engagement stream faulted");
            state.fault = Some(reason.to_string());
        }
    }

    /// Reason of the fault, if the stream faulted.
    pub async fn fault(&self) -> Option<String> {
        self.state.lock().await.fault.clone()
    }

    pub async fn is_faulted(&self) -> bool {
        self.state.lock().await.fault.is_some()
    }
}

impl OutboundState {
    async fn send(&mut self, msg: &RunnerMsg) -> Result<(), SinkError> {
        if let Some(reason) = &self.fault {
            return Err(SinkError::StreamFaulted(reason.clone()));
        }
        let frame = Frame::runner(msg)?;
        if let Err(e) = write_frame(&mut self.writer, &frame).await {
            warn!(kind = msg.kind(), "send failed, marking stream faulted: {}", e);
            self.fault = Some(e.to_string());
            return Err(e.into());
        }
        Ok(())
    }
}

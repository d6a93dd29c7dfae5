// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for the runner.

use taskfabric_protocol::FrameError;
use thiserror::Error;

use crate::agent::AgentError;

/// Errors from sending on an engagement stream through the response sink.
#[derive(Debug, Error)]
pub enum SinkError {
    /// An earlier send or receive on the stream failed; nothing more is sent.
    #[error("stream already faulted: {0}")]
    StreamFaulted(String),

    /// The send itself failed. The stream is faulted from now on.
    #[error("send failed: {0}")]
    Send(#[from] FrameError),

    /// The response was closed already.
    #[error("response already closed")]
    AlreadyClosed,
}

/// Errors that end an engagement session.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EngageError {
    /// The client sent a message that is not valid in the current state.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// The submitted call descriptor could not be parsed.
    #[error("invalid call descriptor: {0}")]
    InvalidDescriptor(#[from] serde_json::Error),

    /// The execution engine did not admit the call.
    #[error("call not admitted: {0}")]
    Allocation(#[from] AgentError),

    /// Receiving from the stream failed (client gone, transport error).
    #[error("stream receive failed: {0}")]
    Receive(FrameError),

    /// Sending on the stream failed.
    #[error("stream send failed: {0}")]
    Send(#[from] SinkError),

    /// The call input pipe no longer accepts data.
    #[error("call input closed")]
    InputClosed,
}

impl EngageError {
    /// The client went away cleanly without starting or finishing anything.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::Receive(FrameError::ConnectionClosed))
    }
}

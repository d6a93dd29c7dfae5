// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Taskfabric Protocol - QUIC + Protobuf communication layer
//!
//! This crate provides the wire protocol spoken between a front tier (or any
//! other client) and a taskfabric runner.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   taskfabric-protocol                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Engagement: one bidirectional stream per call              │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Framing: length + type header, Protobuf payload (prost)    │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Transport: QUIC (quinn), optional mutual TLS (rustls)      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Engagement
//!
//! | Direction | Message | When |
//! |-----------|---------|------|
//! | client → runner | `TryCall` | exactly once, first |
//! | runner → client | `CallAcknowledged` | exactly once, after `TryCall` |
//! | client → runner | `DataFrame` | zero or more, last one has `eof` |
//! | runner → client | `CallResultStart` | once, before any body |
//! | runner → client | `DataFrame` | body chunks, then one empty `eof` chunk |
//! | runner → client | `CallFinished` | exactly once, last |
//!
//! A stream whose first frame is a `StatusRequest` is a status query instead:
//! the runner answers with one `RunnerStatus` and finishes the stream.
//!
//! # Usage
//!
//! ```ignore
//! use taskfabric_protocol::RunnerClient;
//!
//! let client = RunnerClient::insecure("127.0.0.1:9190".parse()?)?;
//! let mut engagement = client.engage().await?;
//! engagement.submit(br#"{"id":"call-1"}"#.to_vec()).await?;
//! engagement.send_data(b"hello".to_vec(), true).await?;
//! while let Some(msg) = engagement.next_message().await? {
//!     println!("{}", msg.kind());
//! }
//! ```

pub mod client;
pub mod frame;
pub mod messages;
pub mod server;

pub use client::{ClientError, ClientIdentity, Engagement, RunnerClient, RunnerClientConfig};
pub use frame::{Frame, FrameError, MessageType, read_frame, write_frame};
pub use messages::{
    CallAcknowledged, CallFinished, CallResultStart, ClientMsg, DataFrame, HttpHeader, RunnerMsg,
    RunnerStatus, StatusRequest, TryCall, client_msg, runner_msg,
};
pub use server::{
    ConnectionHandler, FabricServer, FabricServerConfig, ServerError, StreamHandler,
};

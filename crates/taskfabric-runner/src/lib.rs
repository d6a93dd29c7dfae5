// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Taskfabric Runner - executes function calls engaged over QUIC
//!
//! A runner hosts one execution engine and serves engagements from the front
//! tier. Each engagement is one bidirectional stream carrying a single call:
//!
//! ```text
//! front tier                                   runner
//!     │ ── TryCall(descriptor) ──────────────────▶ │  engine admits the call
//!     │ ◀─────────── CallAcknowledged(call id) ─── │
//!     │ ── DataFrame ... DataFrame(eof) ─────────▶ │  input pipe → engine
//!     │ ◀──────────────────── CallResultStart ──── │  engine output
//!     │ ◀──────────── DataFrame ... DataFrame(eof) │
//!     │ ◀─────────────────────── CallFinished ──── │
//! ```
//!
//! # Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`session`] | Engagement state machine |
//! | [`response`] | Response adapter handed to engines |
//! | [`agent`] | Engine seam plus the echo and process engines |
//! | [`pool`] | Capacity routing contract used by the front tier |
//! | [`server`] | QUIC front door and in-flight accounting |
//!
//! # Configuration
//!
//! See [`config::Config::from_env`] for the environment variables.

pub mod agent;
pub mod config;
pub mod error;
pub mod outbound;
pub mod pipe;
pub mod pool;
pub mod response;
pub mod server;
pub mod session;

pub use agent::{Agent, AgentError, Call, CallDescriptor};
pub use config::{Config, ConfigError};
pub use error::{EngageError, SinkError};
pub use pool::{CapacityRequest, DispatchError, NodePool, NullWorker, Worker};
pub use response::{ResponseSink, ResponseWriter};
pub use server::{RunnerState, run_runner_server};
pub use session::{EngagementSession, SessionState};

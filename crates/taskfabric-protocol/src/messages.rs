// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Protobuf messages for the runner protocol.
//!
//! Equivalent `.proto` schema (package `taskfabric.runner`):
//!
//! ```text
//! message ClientMsg {
//!   oneof body { TryCall try = 1; DataFrame data = 2; }
//! }
//! message RunnerMsg {
//!   oneof body {
//!     CallAcknowledged acknowledged = 1;
//!     CallResultStart result_start = 2;
//!     DataFrame data = 3;
//!     CallFinished finished = 4;
//!   }
//! }
//! message TryCall { bytes call_descriptor = 1; }
//! message DataFrame { bytes data = 1; bool eof = 2; }
//! message CallAcknowledged {
//!   bool committed = 1;
//!   string details = 2;
//!   uint64 slot_allocation_latency_us = 3;
//! }
//! message HttpHeader { string key = 1; string value = 2; }
//! message CallResultStart { int32 status_code = 1; repeated HttpHeader headers = 2; }
//! message CallFinished { bool success = 1; string details = 2; }
//! message StatusRequest {}
//! message RunnerStatus { int32 active = 1; }
//! ```

/// Envelope for every message a client sends on an engagement stream.
#[derive(Clone, PartialEq, prost::Message)]
pub struct ClientMsg {
    #[prost(oneof = "client_msg::Body", tags = "1, 2")]
    pub body: Option<client_msg::Body>,
}

pub mod client_msg {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Body {
        /// Submit a call for execution. Must be the first message.
        #[prost(message, tag = "1")]
        Try(super::TryCall),
        /// A chunk of call input.
        #[prost(message, tag = "2")]
        Data(super::DataFrame),
    }
}

/// Envelope for every message a runner sends on an engagement stream.
#[derive(Clone, PartialEq, prost::Message)]
pub struct RunnerMsg {
    #[prost(oneof = "runner_msg::Body", tags = "1, 2, 3, 4")]
    pub body: Option<runner_msg::Body>,
}

pub mod runner_msg {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Body {
        #[prost(message, tag = "1")]
        Acknowledged(super::CallAcknowledged),
        #[prost(message, tag = "2")]
        ResultStart(super::CallResultStart),
        #[prost(message, tag = "3")]
        Data(super::DataFrame),
        #[prost(message, tag = "4")]
        Finished(super::CallFinished),
    }
}

/// Submit request carrying a serialized call descriptor.
#[derive(Clone, PartialEq, prost::Message)]
pub struct TryCall {
    #[prost(bytes = "vec", tag = "1")]
    pub call_descriptor: Vec<u8>,
}

/// A chunk of body bytes, used in both directions.
#[derive(Clone, PartialEq, prost::Message)]
pub struct DataFrame {
    #[prost(bytes = "vec", tag = "1")]
    pub data: Vec<u8>,
    #[prost(bool, tag = "2")]
    pub eof: bool,
}

/// Reply to a [`TryCall`].
///
/// When `committed` is true, `details` is the call id; otherwise it is the
/// reason the call was not admitted.
#[derive(Clone, PartialEq, prost::Message)]
pub struct CallAcknowledged {
    #[prost(bool, tag = "1")]
    pub committed: bool,
    #[prost(string, tag = "2")]
    pub details: String,
    /// Time spent acquiring an execution slot, in microseconds.
    #[prost(uint64, tag = "3")]
    pub slot_allocation_latency_us: u64,
}

#[derive(Clone, PartialEq, Eq, Hash, prost::Message)]
pub struct HttpHeader {
    #[prost(string, tag = "1")]
    pub key: String,
    #[prost(string, tag = "2")]
    pub value: String,
}

/// Response metadata, sent once before any response body.
#[derive(Clone, PartialEq, prost::Message)]
pub struct CallResultStart {
    #[prost(int32, tag = "1")]
    pub status_code: i32,
    #[prost(message, repeated, tag = "2")]
    pub headers: Vec<HttpHeader>,
}

/// Terminal message of an engagement.
///
/// `details` is the call id on success and the error text on failure.
#[derive(Clone, PartialEq, prost::Message)]
pub struct CallFinished {
    #[prost(bool, tag = "1")]
    pub success: bool,
    #[prost(string, tag = "2")]
    pub details: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct StatusRequest {}

#[derive(Clone, PartialEq, prost::Message)]
pub struct RunnerStatus {
    /// Number of engagements currently in flight on the runner.
    #[prost(int32, tag = "1")]
    pub active: i32,
}

impl ClientMsg {
    pub fn try_call(call_descriptor: impl Into<Vec<u8>>) -> Self {
        Self {
            body: Some(client_msg::Body::Try(TryCall {
                call_descriptor: call_descriptor.into(),
            })),
        }
    }

    pub fn data(data: impl Into<Vec<u8>>, eof: bool) -> Self {
        Self {
            body: Some(client_msg::Body::Data(DataFrame {
                data: data.into(),
                eof,
            })),
        }
    }
}

impl RunnerMsg {
    pub fn acknowledged(committed: bool, details: impl Into<String>, latency_us: u64) -> Self {
        Self {
            body: Some(runner_msg::Body::Acknowledged(CallAcknowledged {
                committed,
                details: details.into(),
                slot_allocation_latency_us: latency_us,
            })),
        }
    }

    pub fn result_start(status_code: i32, headers: Vec<HttpHeader>) -> Self {
        Self {
            body: Some(runner_msg::Body::ResultStart(CallResultStart {
                status_code,
                headers,
            })),
        }
    }

    pub fn data(data: impl Into<Vec<u8>>, eof: bool) -> Self {
        Self {
            body: Some(runner_msg::Body::Data(DataFrame {
                data: data.into(),
                eof,
            })),
        }
    }

    pub fn finished(success: bool, details: impl Into<String>) -> Self {
        Self {
            body: Some(runner_msg::Body::Finished(CallFinished {
                success,
                details: details.into(),
            })),
        }
    }

    /// Short name of the message kind, for logging.
    pub fn kind(&self) -> &'static str {
        match &self.body {
            Some(runner_msg::Body::Acknowledged(_)) => "acknowledged",
            Some(runner_msg::Body::ResultStart(_)) => "result_start",
            Some(runner_msg::Body::Data(_)) => "data",
            Some(runner_msg::Body::Finished(_)) => "finished",
            None => "empty",
        }
    }
}

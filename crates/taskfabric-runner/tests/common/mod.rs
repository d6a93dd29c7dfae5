// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared helpers for runner integration tests.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use rcgen::{BasicConstraints, CertificateParams, DnType, IsCa, KeyPair};
use taskfabric_protocol::{
    ClientMsg, Frame, FrameError, MessageType, RunnerMsg, read_frame, runner_msg, write_frame,
};
use taskfabric_runner::Agent;
use taskfabric_runner::config::TlsPaths;
use taskfabric_runner::session::EngagementSession;
use tokio::io::DuplexStream;

/// Client ends of an in-memory engagement.
pub struct Client {
    pub tx: DuplexStream,
    pub rx: DuplexStream,
}

impl Client {
    pub async fn send(&mut self, msg: ClientMsg) {
        write_frame(&mut self.tx, &Frame::client(&msg).unwrap())
            .await
            .unwrap();
    }

    /// Next runner message.
    pub async fn next(&mut self) -> runner_msg::Body {
        let frame = read_frame(&mut self.rx).await.unwrap();
        let msg: RunnerMsg = frame.decode_as(MessageType::RunnerMsg).unwrap();
        msg.body.expect("runner message without body")
    }

    pub async fn drain(&mut self) -> Vec<runner_msg::Body> {
        drain(&mut self.rx).await
    }
}

/// Read runner messages until the runner finishes its send half.
pub async fn drain(rx: &mut DuplexStream) -> Vec<runner_msg::Body> {
    let mut out = Vec::new();
    loop {
        match read_frame(rx).await {
            Ok(frame) => {
                let msg: RunnerMsg = frame.decode_as(MessageType::RunnerMsg).unwrap();
                out.push(msg.body.expect("runner message without body"));
            }
            Err(FrameError::ConnectionClosed) => return out,
            Err(e) => panic!("unexpected read error: {}", e),
        }
    }
}

/// A session wired to in-memory streams.
pub fn engagement(agent: Arc<dyn Agent>) -> (Client, EngagementSession) {
    let (client_tx, runner_rx) = tokio::io::duplex(64 * 1024);
    let (runner_tx, client_rx) = tokio::io::duplex(64 * 1024);
    (
        Client {
            tx: client_tx,
            rx: client_rx,
        },
        EngagementSession::new(agent, runner_rx, runner_tx),
    )
}

/// Concatenated payload of all data messages.
pub fn body_of(messages: &[runner_msg::Body]) -> Vec<u8> {
    messages
        .iter()
        .filter_map(|m| match m {
            runner_msg::Body::Data(d) => Some(d.data.as_slice()),
            _ => None,
        })
        .flatten()
        .copied()
        .collect()
}

/// PEM material for a certificate authority and two leaves it signed.
pub struct TestPki {
    pub ca_pem: Vec<u8>,
    pub server_cert_pem: Vec<u8>,
    pub server_key_pem: Vec<u8>,
    pub client_cert_pem: Vec<u8>,
    pub client_key_pem: Vec<u8>,
}

impl TestPki {
    pub fn generate() -> Self {
        let mut ca_params = CertificateParams::new(Vec::<String>::new()).unwrap();
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        ca_params
            .distinguished_name
            .push(DnType::CommonName, "runner test ca");
        let ca_key = KeyPair::generate().unwrap();
        let ca_cert = ca_params.self_signed(&ca_key).unwrap();

        let leaf = |name: &str| {
            let mut params = CertificateParams::new(vec!["localhost".to_string()]).unwrap();
            params.distinguished_name.push(DnType::CommonName, name);
            let key = KeyPair::generate().unwrap();
            let cert = params.signed_by(&key, &ca_cert, &ca_key).unwrap();
            (cert.pem().into_bytes(), key.serialize_pem().into_bytes())
        };

        let (server_cert_pem, server_key_pem) = leaf("runner");
        let (client_cert_pem, client_key_pem) = leaf("front tier");

        Self {
            ca_pem: ca_cert.pem().into_bytes(),
            server_cert_pem,
            server_key_pem,
            client_cert_pem,
            client_key_pem,
        }
    }

    /// Write the runner's certificate, key and CA into `dir`.
    pub fn write_runner_files(&self, dir: &Path) -> TlsPaths {
        let paths = TlsPaths {
            cert: dir.join("runner.pem"),
            key: dir.join("runner.key"),
            ca: dir.join("ca.pem"),
        };
        std::fs::write(&paths.cert, &self.server_cert_pem).unwrap();
        std::fs::write(&paths.key, &self.server_key_pem).unwrap();
        std::fs::write(&paths.ca, &self.ca_pem).unwrap();
        paths
    }
}

// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Engagement scenarios over in-memory streams.

mod common;

use std::io;
use std::sync::Arc;
use std::time::Duration;

use common::{body_of, engagement};
use taskfabric_protocol::{ClientMsg, runner_msg};
use taskfabric_runner::EngageError;
use taskfabric_runner::agent::{EchoAgent, MockAgent, SlotPool};

fn echo_agent(slots: usize) -> Arc<EchoAgent> {
    Arc::new(EchoAgent::new(SlotPool::new(
        slots,
        Duration::from_millis(100),
    )))
}

#[tokio::test]
async fn test_echo_roundtrip() {
    let (mut client, session) = engagement(echo_agent(1));
    let runner = tokio::spawn(session.run());

    client
        .send(ClientMsg::try_call(br#"{"id":"call-1","fn_id":"f"}"#.to_vec()))
        .await;
    client.send(ClientMsg::data(b"hello".to_vec(), true)).await;

    let messages = client.drain().await;
    runner.await.unwrap().unwrap();

    match &messages[0] {
        runner_msg::Body::Acknowledged(ack) => {
            assert!(ack.committed);
            assert_eq!(ack.details, "call-1");
        }
        other => panic!("expected acknowledgment, got {:?}", other),
    }
    match &messages[1] {
        runner_msg::Body::ResultStart(start) => {
            assert_eq!(start.status_code, 200);
            assert!(start.headers.iter().any(|h| {
                h.key.eq_ignore_ascii_case("content-type") && h.value == "application/octet-stream"
            }));
        }
        other => panic!("expected result start, got {:?}", other),
    }
    assert_eq!(body_of(&messages), b"hello");

    let n = messages.len();
    assert!(matches!(&messages[n - 2], runner_msg::Body::Data(d) if d.eof && d.data.is_empty()));
    assert!(
        matches!(&messages[n - 1], runner_msg::Body::Finished(f) if f.success && f.details == "call-1")
    );
}

#[tokio::test]
async fn test_unparsable_descriptor_is_rejected() {
    let agent = Arc::new(MockAgent::echo());
    let (mut client, session) = engagement(agent.clone());

    client.send(ClientMsg::try_call(b"not json".to_vec())).await;
    let err = session.run().await.unwrap_err();
    assert!(matches!(err, EngageError::InvalidDescriptor(_)));

    let messages = client.drain().await;
    assert_eq!(messages.len(), 1);
    match &messages[0] {
        runner_msg::Body::Acknowledged(ack) => {
            assert!(!ack.committed);
            assert!(!ack.details.is_empty());
        }
        other => panic!("expected acknowledgment, got {:?}", other),
    }
    assert_eq!(agent.admitted(), 0);
}

#[tokio::test]
async fn test_rejected_admission_sends_only_negative_ack() {
    let agent = Arc::new(MockAgent::rejecting("draining"));
    let (mut client, session) = engagement(agent.clone());

    client.send(ClientMsg::try_call(b"{}".to_vec())).await;
    let err = session.run().await.unwrap_err();
    assert!(matches!(err, EngageError::Allocation(_)));

    let messages = client.drain().await;
    assert_eq!(messages.len(), 1);
    assert!(
        matches!(&messages[0], runner_msg::Body::Acknowledged(a) if !a.committed && a.details.contains("draining"))
    );
}

#[tokio::test]
async fn test_no_capacity_is_rejected() {
    let agent = echo_agent(1);
    let (mut first, first_session) = engagement(agent.clone());
    let first_runner = tokio::spawn(first_session.run());
    first.send(ClientMsg::try_call(b"{}".to_vec())).await;
    assert!(matches!(first.next().await, runner_msg::Body::Acknowledged(a) if a.committed));

    // The first call holds the only slot until it finishes
    let (mut second, second_session) = engagement(agent);
    second.send(ClientMsg::try_call(b"{}".to_vec())).await;
    let err = second_session.run().await.unwrap_err();
    assert!(matches!(err, EngageError::Allocation(_)));
    assert!(
        matches!(&second.drain().await[0], runner_msg::Body::Acknowledged(a) if !a.committed)
    );

    first.send(ClientMsg::data(Vec::new(), true)).await;
    let messages = first.drain().await;
    first_runner.await.unwrap().unwrap();
    assert!(matches!(messages.first(), Some(runner_msg::Body::ResultStart(_))));
    assert!(matches!(messages.last(), Some(runner_msg::Body::Finished(f)) if f.success));
}

#[tokio::test]
async fn test_client_disconnect_mid_stream_aborts_input() {
    let agent = Arc::new(MockAgent::echo());
    let (mut client, session) = engagement(agent.clone());
    let outbound = session.outbound();

    client.send(ClientMsg::try_call(b"{}".to_vec())).await;
    client.send(ClientMsg::data(b"partial".to_vec(), false)).await;
    let common::Client { tx, mut rx } = client;
    drop(tx);

    let err = session.run().await.unwrap_err();
    assert!(matches!(err, EngageError::Receive(_)));
    assert!(outbound.fault().await.is_some());

    agent.wait_finished(1).await;
    assert_eq!(agent.input_errors().await, vec![io::ErrorKind::BrokenPipe]);

    let messages = common::drain(&mut rx).await;
    assert_eq!(messages.len(), 1);
    assert!(matches!(&messages[0], runner_msg::Body::Acknowledged(a) if a.committed));
}

#[tokio::test]
async fn test_engine_failure_after_partial_output() {
    let agent = Arc::new(MockAgent::failing_after(b"0123456789", "boom"));
    let (mut client, session) = engagement(agent);
    let runner = tokio::spawn(session.run());

    client.send(ClientMsg::try_call(b"{}".to_vec())).await;
    client.send(ClientMsg::data(b"input".to_vec(), true)).await;

    let messages = client.drain().await;
    runner.await.unwrap().unwrap();

    assert!(matches!(&messages[0], runner_msg::Body::Acknowledged(a) if a.committed));
    assert!(matches!(&messages[1], runner_msg::Body::ResultStart(s) if s.status_code == 200));
    assert_eq!(body_of(&messages), b"0123456789");

    let n = messages.len();
    assert!(matches!(&messages[n - 2], runner_msg::Body::Data(d) if d.eof));
    match &messages[n - 1] {
        runner_msg::Body::Finished(f) => {
            assert!(!f.success);
            assert!(f.details.contains("boom"));
        }
        other => panic!("expected finished, got {:?}", other),
    }
}

#[tokio::test]
async fn test_second_submit_is_protocol_violation() {
    let agent = Arc::new(MockAgent::echo());
    let (mut client, session) = engagement(agent.clone());

    client.send(ClientMsg::try_call(b"{}".to_vec())).await;
    client.send(ClientMsg::try_call(b"{}".to_vec())).await;

    let err = session.run().await.unwrap_err();
    assert!(matches!(err, EngageError::Protocol(_)));
    assert_eq!(agent.admitted(), 1);

    let messages = client.drain().await;
    assert_eq!(messages.len(), 1);
    assert!(matches!(&messages[0], runner_msg::Body::Acknowledged(a) if a.committed));
}

#[tokio::test]
async fn test_descriptor_reaches_engine_and_id_is_assigned() {
    let agent = Arc::new(MockAgent::echo());
    let (mut client, session) = engagement(agent.clone());
    let runner = tokio::spawn(session.run());

    client
        .send(ClientMsg::try_call(
            br#"{"app_id":"app","fn_id":"fn","method":"POST"}"#.to_vec(),
        ))
        .await;
    client.send(ClientMsg::data(b"x".to_vec(), false)).await;
    client.send(ClientMsg::data(b"y".to_vec(), true)).await;

    let messages = client.drain().await;
    runner.await.unwrap().unwrap();

    let descriptors = agent.descriptors().await;
    assert_eq!(descriptors.len(), 1);
    assert_eq!(descriptors[0].app_id, "app");
    assert_eq!(descriptors[0].method, "POST");
    assert!(!descriptors[0].id.is_empty());

    let id = &descriptors[0].id;
    assert!(matches!(&messages[0], runner_msg::Body::Acknowledged(a) if &a.details == id));
    assert!(matches!(&messages[1], runner_msg::Body::ResultStart(s)
        if s.headers.iter().any(|h| h.key == "X-Mock-Call" && &h.value == id)));
    assert_eq!(body_of(&messages), b"xy");
}

#[tokio::test]
async fn test_at_most_one_finished_per_stream() {
    let (mut client, session) = engagement(echo_agent(4));
    let runner = tokio::spawn(session.run());

    client.send(ClientMsg::try_call(b"{}".to_vec())).await;
    for chunk in [b"a".to_vec(), b"b".to_vec(), Vec::new()] {
        let eof = chunk.is_empty();
        client.send(ClientMsg::data(chunk, eof)).await;
    }

    let messages = client.drain().await;
    runner.await.unwrap().unwrap();

    let finished = messages
        .iter()
        .filter(|m| matches!(m, runner_msg::Body::Finished(_)))
        .count();
    assert_eq!(finished, 1);
    assert!(matches!(messages.last(), Some(runner_msg::Body::Finished(_))));
}

#[tokio::test]
async fn test_disconnect_while_input_is_backed_up() {
    let agent = Arc::new(MockAgent::stalling(Duration::from_secs(3)));
    let (mut client, session) = engagement(agent.clone());
    let outbound = session.outbound();
    let runner = tokio::spawn(session.run());

    client.send(ClientMsg::try_call(b"{}".to_vec())).await;
    assert!(matches!(client.next().await, runner_msg::Body::Acknowledged(a) if a.committed));

    // The call never reads, so the input pipe fills up and stays full
    for _ in 0..20 {
        client.send(ClientMsg::data(vec![7u8; 64], false)).await;
    }
    let common::Client { tx, rx: _rx } = client;
    drop(tx);

    let err = tokio::time::timeout(Duration::from_secs(1), runner)
        .await
        .expect("session did not notice the disconnect")
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, EngageError::Receive(_)));
    assert!(outbound.fault().await.is_some());
    assert_eq!(agent.admitted(), 1);
}

#[tokio::test]
async fn test_backed_up_input_still_completes() {
    let (mut client, session) = engagement(Arc::new(MockAgent::echo()));
    let runner = tokio::spawn(session.run());

    client.send(ClientMsg::try_call(b"{}".to_vec())).await;
    // More chunks than the pipe holds, sent before the call drains any
    let mut expected = Vec::new();
    for i in 0..40u8 {
        let chunk = vec![i; 32];
        expected.extend_from_slice(&chunk);
        client.send(ClientMsg::data(chunk, false)).await;
    }
    client.send(ClientMsg::data(Vec::new(), true)).await;
    let common::Client { tx, mut rx } = client;
    drop(tx);

    let messages = common::drain(&mut rx).await;
    runner.await.unwrap().unwrap();
    assert_eq!(body_of(&messages), expected);
    assert!(matches!(messages.last(), Some(runner_msg::Body::Finished(f)) if f.success));
}

#[tokio::test]
async fn test_crashed_call_finishes_once_with_failure() {
    let (mut client, session) = engagement(Arc::new(MockAgent::panicking()));
    let runner = tokio::spawn(session.run());

    client.send(ClientMsg::try_call(b"{}".to_vec())).await;
    client.send(ClientMsg::data(b"input".to_vec(), true)).await;

    let messages = client.drain().await;
    runner.await.unwrap().unwrap();

    assert!(matches!(&messages[0], runner_msg::Body::Acknowledged(a) if a.committed));
    let finished: Vec<_> = messages
        .iter()
        .filter_map(|m| match m {
            runner_msg::Body::Finished(f) => Some(f),
            _ => None,
        })
        .collect();
    assert_eq!(finished.len(), 1);
    assert!(!finished[0].success);
    assert_eq!(finished[0].details, "call executor crashed");
    assert!(matches!(messages.last(), Some(runner_msg::Body::Finished(_))));
}

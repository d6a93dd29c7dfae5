// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Frame encoding/decoding tests for taskfabric-protocol.

use bytes::Bytes;
use taskfabric_protocol::frame::{
    Frame, FrameError, HEADER_SIZE, MAX_FRAME_SIZE, MessageType, read_frame, write_frame,
};
use taskfabric_protocol::messages::{ClientMsg, HttpHeader, RunnerMsg, RunnerStatus, runner_msg};

#[test]
fn test_message_type_values() {
    assert_eq!(MessageType::ClientMsg as u16, 1);
    assert_eq!(MessageType::RunnerMsg as u16, 2);
    assert_eq!(MessageType::StatusRequest as u16, 3);
    assert_eq!(MessageType::StatusResponse as u16, 4);
    assert_eq!(MessageType::Error as u16, 5);
}

#[test]
fn test_max_frame_size_constant() {
    assert_eq!(MAX_FRAME_SIZE, 64 * 1024 * 1024);
}

#[test]
fn test_frame_decode_invalid_message_type() {
    let mut data = vec![0, 0, 0, 0];
    data.extend_from_slice(&[0, 99]);

    let result = Frame::decode_from_bytes(Bytes::from(data));
    assert!(matches!(result, Err(FrameError::InvalidMessageType(99))));
}

#[test]
fn test_frame_decode_empty_payload() {
    let mut data = vec![0, 0, 0, 0];
    data.extend_from_slice(&[0, 3]);

    let frame = Frame::decode_from_bytes(Bytes::from(data)).unwrap();
    assert_eq!(frame.message_type, MessageType::StatusRequest);
    assert!(frame.payload.is_empty());
}

#[test]
fn test_frame_bytes_survive_encoding_unchanged() {
    let msg = RunnerMsg::result_start(
        404,
        vec![HttpHeader {
            key: "Content-Type".to_string(),
            value: "text/plain".to_string(),
        }],
    );
    let frame = Frame::runner(&msg).unwrap();
    let encoded = frame.encode();
    let decoded = Frame::decode_from_bytes(encoded.clone()).unwrap();

    assert_eq!(decoded.encode(), encoded);
    let back: RunnerMsg = decoded.decode_as(MessageType::RunnerMsg).unwrap();
    assert_eq!(back, msg);
}

#[test]
fn test_status_response_decode() {
    let frame = Frame::status_response(&RunnerStatus { active: 12 }).unwrap();
    let status: RunnerStatus = frame.decode_as(MessageType::StatusResponse).unwrap();
    assert_eq!(status.active, 12);
}

#[tokio::test]
async fn test_full_engagement_sequence_over_buffer() {
    let sequence = vec![
        RunnerMsg::acknowledged(true, "call-1", 1500),
        RunnerMsg::result_start(200, Vec::new()),
        RunnerMsg::data(b"hello".to_vec(), false),
        RunnerMsg::data(Vec::new(), true),
        RunnerMsg::finished(true, "call-1"),
    ];

    let mut buffer = Vec::new();
    for msg in &sequence {
        write_frame(&mut buffer, &Frame::runner(msg).unwrap())
            .await
            .unwrap();
    }

    let mut reader = buffer.as_slice();
    let mut received = Vec::new();
    loop {
        match read_frame(&mut reader).await {
            Ok(frame) => received.push(frame.decode_as::<RunnerMsg>(MessageType::RunnerMsg).unwrap()),
            Err(FrameError::ConnectionClosed) => break,
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    assert_eq!(received, sequence);
    match &received[0].body {
        Some(runner_msg::Body::Acknowledged(ack)) => {
            assert!(ack.committed);
            assert_eq!(ack.slot_allocation_latency_us, 1500);
        }
        other => panic!("expected Acknowledged, got {:?}", other),
    }
}

#[tokio::test]
async fn test_client_frames_are_rejected_as_runner_frames() {
    let mut buffer = Vec::new();
    write_frame(
        &mut buffer,
        &Frame::client(&ClientMsg::data(b"x".to_vec(), true)).unwrap(),
    )
    .await
    .unwrap();

    let mut reader = buffer.as_slice();
    let frame = read_frame(&mut reader).await.unwrap();
    assert_eq!(frame.encode().len(), HEADER_SIZE + frame.payload.len());
    assert!(matches!(
        frame.decode_as::<RunnerMsg>(MessageType::RunnerMsg),
        Err(FrameError::UnexpectedMessageType { .. })
    ));
}

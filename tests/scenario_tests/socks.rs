// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use flowscope::{
    engine::{Chunk, Transport},
    session::Direction,
};

use super::common::{record_ints, record_strings, test_engine};

#[tokio::test]
async fn socks5_connect_through_port_1080_records_host_and_port() {
    let (engine, capture) = test_engine();
    let id = engine.open_session();

    engine
        .dispatch(id, Chunk {
            data: vec![0x05, 0x01, 0x00],
            which: Direction::Initiator,
            src_port: 49000,
            dst_port: 1080,
            transport: Transport::Tcp,
        })
        .await;
    engine
        .dispatch(id, Chunk {
            data: vec![0x05, 0x00],
            which: Direction::Responder,
            src_port: 1080,
            dst_port: 49000,
            transport: Transport::Tcp,
        })
        .await;

    let mut connect = vec![0x05u8, 0x01, 0x00, 0x03, 15];
    connect.extend_from_slice(b"proxied.example");
    connect.extend_from_slice(&8080u16.to_be_bytes());
    engine
        .dispatch(id, Chunk {
            data: connect,
            which: Direction::Initiator,
            src_port: 49000,
            dst_port: 1080,
            transport: Transport::Tcp,
        })
        .await;
    engine
        .dispatch(id, Chunk {
            data: vec![0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0],
            which: Direction::Responder,
            src_port: 1080,
            dst_port: 49000,
            transport: Transport::Tcp,
        })
        .await;

    engine.close_session(id).await;

    let records = capture.records();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record_strings(record, "SocksHost"), ["proxied.example"]);
    assert_eq!(record_ints(record, "SocksPort"), [8080]);
}

#[tokio::test]
async fn socks4_reply_tags_and_skips_without_touching_fields() {
    let (engine, capture) = test_engine();
    let id = engine.open_session();

    engine
        .dispatch(id, Chunk {
            data: vec![0x04, 0x01, 0x00, 0x50, 93, 184, 216, 34],
            which: Direction::Initiator,
            src_port: 49500,
            dst_port: 1080,
            transport: Transport::Tcp,
        })
        .await;
    engine
        .dispatch(id, Chunk {
            data: vec![0x00, 0x5a, 0x00, 0x00, 0, 0, 0, 0],
            which: Direction::Responder,
            src_port: 1080,
            dst_port: 49500,
            transport: Transport::Tcp,
        })
        .await;

    engine.close_session(id).await;

    let records = capture.records();
    assert_eq!(records.len(), 1);
    assert!(records[0].tags.contains(&"protocol:socks".to_string()));
}

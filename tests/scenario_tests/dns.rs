// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use flowscope::{
    engine::{Chunk, Transport},
    session::Direction,
};

use super::common::{record_strings, test_engine};

fn dns_response(name_labels: &[&str], ip: [u8; 4]) -> Vec<u8> {
    let mut msg = vec![0u8; 12];
    msg[5] = 1; // qdcount
    for label in name_labels {
        msg.push(label.len() as u8);
        msg.extend_from_slice(label.as_bytes());
    }
    msg.push(0);
    msg.extend_from_slice(&1u16.to_be_bytes());
    msg.extend_from_slice(&1u16.to_be_bytes());
    msg.extend_from_slice(&[0xc0, 0x0c]); // answer name: pointer to question
    msg.extend_from_slice(&1u16.to_be_bytes());
    msg.extend_from_slice(&1u16.to_be_bytes());
    msg.extend_from_slice(&120u32.to_be_bytes());
    msg.extend_from_slice(&4u16.to_be_bytes());
    msg.extend_from_slice(&ip);
    msg[6] = 0;
    msg[7] = 1; // ancount
    msg[2] = 0x81;
    msg[3] = 0x80;
    msg
}

#[tokio::test]
async fn udp_53_query_and_answer_produce_a_dns_session_record() {
    let (engine, capture) = test_engine();
    let id = engine.open_session();

    let query = {
        let mut q = vec![0u8; 12];
        q[5] = 1;
        for label in ["www", "flowscope", "test"] {
            q.push(label.len() as u8);
            q.extend_from_slice(label.as_bytes());
        }
        q.push(0);
        q.extend_from_slice(&1u16.to_be_bytes());
        q.extend_from_slice(&1u16.to_be_bytes());
        q
    };
    engine
        .dispatch(id, Chunk {
            data: query,
            which: Direction::Initiator,
            src_port: 53211,
            dst_port: 53,
            transport: Transport::Udp,
        })
        .await;

    engine
        .dispatch(id, Chunk {
            data: dns_response(&["www", "flowscope", "test"], [198, 51, 100, 7]),
            which: Direction::Responder,
            src_port: 53,
            dst_port: 53211,
            transport: Transport::Udp,
        })
        .await;

    engine.close_session(id).await;

    let records = capture.records();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert!(record.tags.contains(&"protocol:dns".to_string()));
    assert_eq!(record_strings(record, "DnsHost"), ["www.flowscope.test"]);
    assert!(record.strings.get("DnsIp").map(|v| v.contains(&"198.51.100.7".to_string())).unwrap_or(false));
}

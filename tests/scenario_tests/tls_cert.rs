// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use flowscope::{
    engine::{Chunk, Transport},
    session::Direction,
};

use super::common::test_engine;

fn der_tlv(tag: u8, value: &[u8]) -> Vec<u8> {
    let mut out = vec![tag, value.len() as u8];
    out.extend_from_slice(value);
    out
}

fn der_seq(parts: &[Vec<u8>]) -> Vec<u8> {
    let body: Vec<u8> = parts.concat();
    let mut out = vec![0x30, body.len() as u8];
    out.extend_from_slice(&body);
    out
}

fn rdn_cn(value: &str) -> Vec<u8> {
    let oid = der_tlv(0x06, &[0x55, 0x04, 0x03]);
    let val = der_tlv(0x13, value.as_bytes());
    let inner_seq = der_seq(&[oid, val]);
    let mut set = vec![0x31, inner_seq.len() as u8];
    set.extend_from_slice(&inner_seq);
    set
}

fn build_cert(common_name: &str) -> Vec<u8> {
    let serial = der_tlv(0x02, &[0x01]);
    let sig_alg = der_seq(&[]);
    let issuer = der_seq(&[rdn_cn(common_name)]);
    let validity = der_seq(&[]);
    let subject = der_seq(&[rdn_cn(common_name)]);
    let spki = der_seq(&[]);
    let tbs = der_seq(&[serial, sig_alg.clone(), issuer, validity, subject, spki]);
    der_seq(&[tbs, sig_alg, der_tlv(0x03, &[0x00])])
}

fn handshake(msg_type: u8, body: &[u8]) -> Vec<u8> {
    let len = body.len() as u32;
    let mut out = vec![msg_type, (len >> 16) as u8, (len >> 8) as u8, len as u8];
    out.extend_from_slice(body);
    out
}

fn tls_record(handshake_body: &[u8]) -> Vec<u8> {
    let len = handshake_body.len() as u16;
    let mut out = vec![0x16, 0x03, 0x03];
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(handshake_body);
    out
}

fn certificate_message(cert_der: &[u8]) -> Vec<u8> {
    let mut entry = vec![(cert_der.len() >> 16) as u8, (cert_der.len() >> 8) as u8, cert_der.len() as u8];
    entry.extend_from_slice(cert_der);
    let cert_list_len = entry.len() as u32;
    let mut body = vec![(cert_list_len >> 16) as u8, (cert_list_len >> 8) as u8, cert_list_len as u8];
    body.extend_from_slice(&entry);
    handshake(0x0b, &body)
}

#[tokio::test]
async fn server_hello_and_certificate_record_extract_subject() {
    let (engine, capture) = test_engine();
    let id = engine.open_session();

    // First record must look like a ServerHello for the classifier to
    // attach the certificate dissector; the second carries the actual
    // Certificate message the dissector is looking for.
    let server_hello = tls_record(&handshake(0x02, &[0u8; 4]));
    let cert = build_cert("www.flowscope.test");
    let certificate = tls_record(&certificate_message(&cert));

    let mut first_flight = server_hello;
    first_flight.extend_from_slice(&certificate);

    engine
        .dispatch(id, Chunk {
            data: first_flight,
            which: Direction::Responder,
            src_port: 443,
            dst_port: 52000,
            transport: Transport::Tcp,
        })
        .await;
    engine.close_session(id).await;

    let records = capture.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].cert_subjects, ["www.flowscope.test"]);
}

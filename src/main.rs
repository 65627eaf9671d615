// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Arc;

use anyhow::{Context as _, Result};
use flowscope::{
    cfg::{cli::resolve_config_path, config::Config, logger::init_logger},
    context::Context,
    engine::{Chunk, Engine, SinkFactory, Transport},
    session::Direction,
    sink::{FieldSink, JsonLogSink, RecordingFieldSink},
};
use tracing::info;

fn dns_query_and_answer() -> Vec<u8> {
    let mut msg = vec![0u8; 12];
    msg[5] = 1; // qdcount = 1
    for label in ["example", "com"] {
        msg.push(label.len() as u8);
        msg.extend_from_slice(label.as_bytes());
    }
    msg.push(0);
    msg.extend_from_slice(&1u16.to_be_bytes()); // qtype A
    msg.extend_from_slice(&1u16.to_be_bytes()); // qclass IN
    msg.extend_from_slice(&[0xc0, 0x0c]); // name: pointer back to offset 12
    msg.extend_from_slice(&1u16.to_be_bytes());
    msg.extend_from_slice(&1u16.to_be_bytes());
    msg.extend_from_slice(&300u32.to_be_bytes());
    msg.extend_from_slice(&4u16.to_be_bytes());
    msg.extend_from_slice(&[93, 184, 216, 34]);
    msg[6] = 0;
    msg[7] = 1; // ancount = 1
    msg[2] = 0x81; // QR=1, opcode 0, RD
    msg[3] = 0x80;
    msg
}

fn socks5_connect_request(host: &str, port: u16) -> Vec<u8> {
    let mut req = vec![0x05, 0x01, 0x00, 0x03, host.len() as u8];
    req.extend_from_slice(host.as_bytes());
    req.extend_from_slice(&port.to_be_bytes());
    req
}

#[tokio::main]
async fn main() -> Result<()> {
    let _guard = init_logger(&resolve_config_path("config/logger.yaml")?.to_string_lossy())?;

    let cfg = resolve_config_path("config/flowscope.yaml")
        .and_then(Config::load_from_file)
        .context("failed to resolve or load config")?;

    let context = Arc::new(Context::build());
    let bulk = Box::new(JsonLogSink::new(cfg.runtime.bulk_mode));
    let sink_factory: SinkFactory = Arc::new(|| Box::new(RecordingFieldSink::default()) as Box<dyn FieldSink>);
    let engine = Engine::new(context, cfg.runtime.max_sessions, sink_factory, bulk);

    // A DNS lookup: one datagram each way on port 53.
    let dns_session = engine.open_session();
    engine
        .dispatch(dns_session, Chunk {
            data: dns_query_and_answer(),
            which: Direction::Initiator,
            src_port: 51234,
            dst_port: 53,
            transport: Transport::Udp,
        })
        .await;
    engine.close_session(dns_session).await;

    // A SOCKS5 CONNECT handshake to a proxy on port 1080.
    let socks_session = engine.open_session();
    engine
        .dispatch(socks_session, Chunk {
            data: vec![0x05, 0x01, 0x00],
            which: Direction::Initiator,
            src_port: 51235,
            dst_port: 1080,
            transport: Transport::Tcp,
        })
        .await;
    engine
        .dispatch(socks_session, Chunk {
            data: vec![0x05, 0x00],
            which: Direction::Responder,
            src_port: 1080,
            dst_port: 51235,
            transport: Transport::Tcp,
        })
        .await;
    engine
        .dispatch(socks_session, Chunk {
            data: socks5_connect_request("example.com", 443),
            which: Direction::Initiator,
            src_port: 51235,
            dst_port: 1080,
            transport: Transport::Tcp,
        })
        .await;
    engine
        .dispatch(socks_session, Chunk {
            data: vec![0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0],
            which: Direction::Responder,
            src_port: 1080,
            dst_port: 51235,
            transport: Transport::Tcp,
        })
        .await;
    engine.close_session(socks_session).await;

    // An SMTP dialog with a small plain-text body.
    let smtp_session = engine.open_session();
    engine
        .dispatch(smtp_session, Chunk {
            data: b"EHLO client.example\r\nMAIL FROM:<a@example.com>\r\nRCPT TO:<b@example.com>\r\nDATA\r\nSubject: hi\r\n\r\nhello\r\n.\r\n".to_vec(),
            which: Direction::Initiator,
            src_port: 51236,
            dst_port: 25,
            transport: Transport::Tcp,
        })
        .await;
    engine.close_session(smtp_session).await;

    info!("demo sessions processed");
    Ok(())
}

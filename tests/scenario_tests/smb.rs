// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use flowscope::{
    engine::{Chunk, Transport},
    session::Direction,
};

use super::common::{record_strings, test_engine};

const SMB2_CREATE: u16 = 0x0005;

fn netbios_frame(payload: &[u8]) -> Vec<u8> {
    let mut out = vec![0u8];
    let len = payload.len() as u32;
    out.push(((len >> 16) & 0xff) as u8);
    out.push(((len >> 8) & 0xff) as u8);
    out.push((len & 0xff) as u8);
    out.extend_from_slice(payload);
    out
}

fn smb2_create_frame(filename_utf16le: &[u8]) -> Vec<u8> {
    let mut header = vec![0xfe, b'S', b'M', b'B'];
    header.extend(std::iter::repeat(0u8).take(60));
    header[12] = (SMB2_CREATE & 0xff) as u8;
    header[13] = (SMB2_CREATE >> 8) as u8;

    let mut body = vec![0u8; 48];
    let name_len = filename_utf16le.len() as u16;
    let name_offset: u16 = 64 + 56;
    body[44] = (name_len & 0xff) as u8;
    body[45] = (name_len >> 8) as u8;
    body[46] = (name_offset & 0xff) as u8;
    body[47] = (name_offset >> 8) as u8;
    body.resize(56, 0);
    body.extend_from_slice(filename_utf16le);

    let mut frame = header;
    frame.extend_from_slice(&body);
    frame
}

#[tokio::test]
async fn smb2_create_on_port_445_records_filename() {
    let (engine, capture) = test_engine();
    let id = engine.open_session();

    let filename: Vec<u8> = "\\share\\report.docx".encode_utf16().flat_map(|u| u.to_le_bytes()).collect();
    let framed = netbios_frame(&smb2_create_frame(&filename));

    engine
        .dispatch(id, Chunk {
            data: framed,
            which: Direction::Initiator,
            src_port: 50222,
            dst_port: 445,
            transport: Transport::Tcp,
        })
        .await;
    engine.close_session(id).await;

    let records = capture.records();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert!(record.tags.contains(&"protocol:smb".to_string()));
    assert_eq!(record_strings(record, "SmbFilename"), ["\\share\\report.docx"]);
}

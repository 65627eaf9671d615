// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use flowscope::{
    engine::{Chunk, Transport},
    session::Direction,
};

use super::common::{record_strings, test_engine};

#[tokio::test]
async fn smtp_dialog_with_base64_attachment_yields_envelope_and_hash() {
    let (engine, capture) = test_engine();
    let id = engine.open_session();

    let dialog = concat!(
        "EHLO client.example\r\n",
        "MAIL FROM:<sender@example.com>\r\n",
        "RCPT TO:<recipient@example.org>\r\n",
        "DATA\r\n",
        "Subject: scenario\r\n",
        "Content-Type: multipart/mixed; boundary=\"BB\"\r\n",
        "\r\n",
        "--BB\r\n",
        "Content-Transfer-Encoding: base64\r\n",
        "\r\n",
        "aGVsbG8=\r\n",
        "--BB--\r\n",
        ".\r\n",
    );

    engine
        .dispatch(id, Chunk {
            data: dialog.as_bytes().to_vec(),
            which: Direction::Initiator,
            src_port: 50111,
            dst_port: 25,
            transport: Transport::Tcp,
        })
        .await;
    engine.close_session(id).await;

    let records = capture.records();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert!(record.tags.contains(&"protocol:smtp".to_string()));
    assert_eq!(record_strings(record, "EmailSrc"), ["sender@example.com"]);
    assert_eq!(record_strings(record, "EmailDst"), ["recipient@example.org"]);
    let expected_md5 = {
        use md5::{Digest, Md5};
        hex::encode(Md5::digest(b"hello"))
    };
    assert_eq!(record_strings(record, "EmailAttachmentMd5"), [expected_md5]);
}

// SPDX-License-Identifier: AGPL-3.0-or-later

//! DNS message dissector (C8): stateless, one-shot per chunk — it
//! needs no parser slot since a DNS message fits in a single UDP
//! datagram (or the first TCP-framed message), per §4.8.

use zerocopy::{BigEndian, FromBytes, Immutable, KnownLayout, U16};

use crate::session::{FieldId, Session};

const MAX_NAME_BUF: usize = 8 * 1024;
const MAX_HOPS: usize = 6;

/// The fixed 12-byte DNS message header (RFC 1035 §4.1.1).
#[repr(C)]
#[derive(Debug, FromBytes, KnownLayout, Immutable)]
struct DnsHeader {
    id: U16<BigEndian>,
    flags: U16<BigEndian>,
    qdcount: U16<BigEndian>,
    ancount: U16<BigEndian>,
    nscount: U16<BigEndian>,
    arcount: U16<BigEndian>,
}

fn qclass_tag(class: u16) -> Option<&'static str> {
    Some(match class {
        1 => "dns:qclass:IN",
        2 => "dns:qclass:CS",
        3 => "dns:qclass:CH",
        4 => "dns:qclass:HS",
        255 => "dns:qclass:ANY",
        _ => return None,
    })
}

fn qtype_tag(qtype: u16) -> Option<&'static str> {
    Some(match qtype {
        1 => "dns:qtype:A",
        2 => "dns:qtype:NS",
        3 => "dns:qtype:MD",
        4 => "dns:qtype:MF",
        5 => "dns:qtype:CNAME",
        6 => "dns:qtype:SOA",
        7 => "dns:qtype:MB",
        8 => "dns:qtype:MG",
        9 => "dns:qtype:MR",
        10 => "dns:qtype:NULL",
        11 => "dns:qtype:WKS",
        12 => "dns:qtype:PTR",
        13 => "dns:qtype:HINFO",
        14 => "dns:qtype:MINFO",
        15 => "dns:qtype:MX",
        16 => "dns:qtype:TXT",
        252 => "dns:qtype:AXFR",
        253 => "dns:qtype:MAILB",
        254 => "dns:qtype:MAILA",
        255 => "dns:qtype:ANY",
        _ => return None,
    })
}

/// Decompresses a DNS name starting at `offset` within the full
/// message `msg`, returning the name and the offset just past its
/// encoding within `msg` (not following any pointer). `None` on
/// malformed input or a pointer chain longer than [`MAX_HOPS`].
fn read_name(msg: &[u8], mut offset: usize) -> Option<(String, usize)> {
    let mut name = String::new();
    let mut hops = 0;
    let mut end_offset = None;
    loop {
        let len_byte = *msg.get(offset)?;
        if len_byte & 0xc0 == 0xc0 {
            let b2 = *msg.get(offset + 1)?;
            if end_offset.is_none() {
                end_offset = Some(offset + 2);
            }
            hops += 1;
            if hops > MAX_HOPS {
                return None;
            }
            offset = (((len_byte & 0x3f) as usize) << 8) | b2 as usize;
            continue;
        }
        if len_byte == 0 {
            if end_offset.is_none() {
                end_offset = Some(offset + 1);
            }
            break;
        }
        let label_len = len_byte as usize;
        let label = msg.get(offset + 1..offset + 1 + label_len)?;
        if !name.is_empty() {
            name.push('.');
        }
        for &b in label {
            if name.len() >= MAX_NAME_BUF {
                break;
            }
            if b == b'.' || b == b'\\' {
                name.push('\\');
                name.push(b as char);
            } else if b >= 0x80 {
                name.push_str(&format!("M-{}", (b & 0x7f) as char));
            } else if !(0x20..0x7f).contains(&b) {
                name.push_str(&format!("^{}", (b ^ 0x40) as char));
            } else {
                name.push(b as char);
            }
        }
        offset += 1 + label_len;
    }
    Some((name, end_offset?))
}

/// Parses a single DNS message (question + answer sections) and
/// records hosts/IPs/tags. No parser slot is created: this is called
/// directly by [`crate::session::Session::dissect_dns`].
pub fn dissect(session: &mut Session, data: &[u8]) {
    if data.len() < 18 {
        return;
    }
    let Ok((header, _)) = DnsHeader::ref_from_prefix(data) else {
        return;
    };
    let flags = header.flags.get();
    let opcode = (flags >> 11) & 0x0f;
    if opcode != 0 {
        return;
    }
    let qr = flags & 0x8000 != 0;
    let qdcount = header.qdcount.get() as usize;
    let ancount = header.ancount.get() as usize;

    session.add_tag("protocol:dns");

    let mut offset = 12;
    for _ in 0..qdcount {
        let Some((name, after_name)) = read_name(data, offset) else { break };
        let Some(qtype_bytes) = data.get(after_name..after_name + 2) else { break };
        let Some(qclass_bytes) = data.get(after_name + 2..after_name + 4) else { break };
        let qtype = u16::from_be_bytes([qtype_bytes[0], qtype_bytes[1]]);
        let qclass = u16::from_be_bytes([qclass_bytes[0], qclass_bytes[1]]);
        session.field_string_add(FieldId::DnsHost, name.to_lowercase());
        if let Some(tag) = qtype_tag(qtype) {
            session.add_tag(tag);
        }
        if let Some(tag) = qclass_tag(qclass) {
            session.add_tag(tag);
        }
        offset = after_name + 4;
    }

    if !qr {
        return;
    }
    for _ in 0..ancount {
        let Some((_name, after_name)) = read_name(data, offset) else { break };
        let Some(rest) = data.get(after_name..after_name + 10) else { break };
        let rtype = u16::from_be_bytes([rest[0], rest[1]]);
        let rclass = u16::from_be_bytes([rest[2], rest[3]]);
        let rdlength = u16::from_be_bytes([rest[8], rest[9]]) as usize;
        let rdata_offset = after_name + 10;
        match (rtype, rclass, rdlength) {
            (1, 1, 4) => {
                let Some(ip) = data.get(rdata_offset..rdata_offset + 4) else { break };
                let addr = std::net::Ipv4Addr::new(ip[0], ip[1], ip[2], ip[3]);
                session.field_string_add(FieldId::DnsIp, addr.to_string());
            }
            (5, 1, _) => {
                if let Some((cname, _)) = read_name(data, rdata_offset) {
                    session.field_string_add(FieldId::DnsHost, cname.to_lowercase());
                }
            }
            _ => {}
        }
        offset = rdata_offset + rdlength;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::RecordingFieldSink;

    fn build_query(name_labels: &[&str], qtype: u16, qclass: u16) -> Vec<u8> {
        let mut msg = vec![0u8; 12];
        msg[4] = 0;
        msg[5] = 1; // qdcount = 1
        for label in name_labels {
            msg.push(label.len() as u8);
            msg.extend_from_slice(label.as_bytes());
        }
        msg.push(0);
        msg.extend_from_slice(&qtype.to_be_bytes());
        msg.extend_from_slice(&qclass.to_be_bytes());
        msg
    }

    #[test]
    fn minimal_18_byte_query_parses_to_zero_records() {
        let mut data = vec![0u8; 18];
        data[5] = 0;
        let mut session = Session::new(Box::new(RecordingFieldSink::default()));
        dissect(&mut session, &data);
        let sink = session.sink().unwrap().as_any().downcast_ref::<RecordingFieldSink>().unwrap();
        assert!(sink.strings_for(FieldId::DnsHost).is_empty());
    }

    #[test]
    fn seventeen_byte_input_is_rejected() {
        let data = vec![0u8; 17];
        let mut session = Session::new(Box::new(RecordingFieldSink::default()));
        dissect(&mut session, &data);
        let sink = session.sink().unwrap().as_any().downcast_ref::<RecordingFieldSink>().unwrap();
        assert!(!sink.tags.contains("protocol:dns"));
    }

    #[test]
    fn parses_a_query_and_answer() {
        let mut query = build_query(&["EXAMPLE", "com"], 1, 1);
        let answer_offset = query.len();
        query.extend_from_slice(&[0xc0, 0x0c]); // pointer to name at offset 12
        query.extend_from_slice(&1u16.to_be_bytes()); // type A
        query.extend_from_slice(&1u16.to_be_bytes()); // class IN
        query.extend_from_slice(&300u32.to_be_bytes()); // ttl
        query.extend_from_slice(&4u16.to_be_bytes()); // rdlength
        query.extend_from_slice(&[93, 184, 216, 34]);
        query[6] = 0;
        query[7] = 1; // ancount = 1
        query[2] = 0x81; // QR=1, opcode 0
        query[3] = 0x80;
        let _ = answer_offset;

        let mut session = Session::new(Box::new(RecordingFieldSink::default()));
        dissect(&mut session, &query);
        let sink = session.sink().unwrap().as_any().downcast_ref::<RecordingFieldSink>().unwrap();
        assert_eq!(sink.strings_for(FieldId::DnsHost), ["example.com"]);
        assert_eq!(sink.strings_for(FieldId::DnsIp), ["93.184.216.34"]);
        assert!(sink.tags.contains("protocol:dns"));
        assert!(sink.tags.contains("dns:qtype:A"));
        assert!(sink.tags.contains("dns:qclass:IN"));
    }

    #[test]
    fn pointer_loop_is_bounded_by_hop_cap() {
        let mut msg = vec![0u8; 12];
        msg[5] = 1;
        // A name entirely made of a self-referential pointer never
        // terminates without the hop cap.
        msg.extend_from_slice(&[0xc0, 12]);
        msg.extend_from_slice(&1u16.to_be_bytes());
        msg.extend_from_slice(&1u16.to_be_bytes());
        let mut session = Session::new(Box::new(RecordingFieldSink::default()));
        dissect(&mut session, &msg);
    }
}

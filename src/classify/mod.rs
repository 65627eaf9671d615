// SPDX-License-Identifier: AGPL-3.0-or-later

//! The classifier (C4): dispatch tables keyed by transport, port, and
//! leading bytes, run once against the first in-order chunk of each
//! session direction per §4.4.

use std::collections::HashMap;

use tracing::trace;

use crate::session::Direction;

bitflags::bitflags! {
    /// Which side of the port match a port-registered classifier cares
    /// about. A classifier may be registered against both.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PortFlags: u8 {
        const SRC = 0x01;
        const DST = 0x02;
    }
}

/// A classifier function: invoked with the session, the chunk, and
/// which direction it arrived on. Runs for side effect — tagging the
/// session and/or attaching dissectors.
pub type ClassifyFn = fn(&mut crate::session::Session, &[u8], Direction);

#[derive(Clone, Copy)]
struct ContentEntry {
    name: &'static str,
    offset: usize,
    // `match_bytes`/`min_len` already reflect the offset-2 routing
    // trim described in §4.4 (stored match advances by 2, matchlen
    // shrinks by 2) for byte2-bucket entries; byte0/byte1 entries keep
    // the full match.
    match_bytes: &'static [u8],
    min_len: usize,
    func: ClassifyFn,
}

impl ContentEntry {
    fn matches(&self, data: &[u8], cmp_from: usize) -> bool {
        data.len() >= self.min_len && data.get(cmp_from..cmp_from + self.match_bytes.len()) == Some(self.match_bytes)
    }
}

#[derive(Default)]
struct ContentBuckets {
    fallback: Vec<ContentEntry>,
    byte1: HashMap<u8, Vec<ContentEntry>>,
    byte2: HashMap<(u8, u8), Vec<ContentEntry>>,
}

impl ContentBuckets {
    /// Registers one content-match classifier, routing it into the
    /// fallback/byte1/byte2 bucket per §4.4's offset/matchlen rules.
    /// Identical `(name, offset, match, matchlen, func)` registrations
    /// are silently dropped.
    fn register(&mut self, name: &'static str, offset: usize, match_bytes: &'static [u8], func: ClassifyFn) {
        if offset != 0 || match_bytes.len() < 2 {
            let entry = ContentEntry {
                name,
                offset,
                min_len: offset + match_bytes.len(),
                match_bytes,
                func,
            };
            if match_bytes.len() == 1 && offset == 0 {
                let bucket = self.byte1.entry(match_bytes[0]).or_default();
                if !bucket.iter().any(|e| is_duplicate(e, &entry)) {
                    bucket.push(entry);
                }
                return;
            }
            if !self.fallback.iter().any(|e| is_duplicate(e, &entry)) {
                self.fallback.push(entry);
            }
            return;
        }
        let trimmed = &match_bytes[2..];
        let entry = ContentEntry {
            name,
            offset,
            min_len: 2 + trimmed.len(),
            match_bytes: trimmed,
            func,
        };
        let bucket = self.byte2.entry((match_bytes[0], match_bytes[1])).or_default();
        if !bucket.iter().any(|e| is_duplicate(e, &entry)) {
            bucket.push(entry);
        }
    }

    fn dispatch(&self, session: &mut crate::session::Session, data: &[u8], which: Direction) {
        for entry in &self.fallback {
            if entry.matches(data, entry.offset) {
                trace!(name = entry.name, "classifier matched (fallback)");
                (entry.func)(session, data, which);
            }
        }
        if let Some(byte0) = data.first() {
            if let Some(bucket) = self.byte1.get(byte0) {
                for entry in bucket {
                    trace!(name = entry.name, "classifier matched (byte1)");
                    (entry.func)(session, data, which);
                }
            }
        }
        if data.len() >= 2 {
            if let Some(bucket) = self.byte2.get(&(data[0], data[1])) {
                for entry in bucket {
                    if entry.matches(data, 2) {
                        trace!(name = entry.name, "classifier matched (byte2)");
                        (entry.func)(session, data, which);
                    }
                }
            }
        }
    }
}

fn is_duplicate(existing: &ContentEntry, new: &ContentEntry) -> bool {
    existing.offset == new.offset
        && existing.name == new.name
        && existing.match_bytes == new.match_bytes
        && existing.func as usize == new.func as usize
}

#[derive(Default)]
struct PortBuckets {
    src: HashMap<u16, Vec<(&'static str, ClassifyFn)>>,
    dst: HashMap<u16, Vec<(&'static str, ClassifyFn)>>,
}

impl PortBuckets {
    fn register(&mut self, name: &'static str, port: u16, flags: PortFlags, func: ClassifyFn) {
        if flags.contains(PortFlags::SRC) {
            let bucket = self.src.entry(port).or_default();
            if !bucket.iter().any(|(n, f)| *n == name && *f as usize == func as usize) {
                bucket.push((name, func));
            }
        }
        if flags.contains(PortFlags::DST) {
            let bucket = self.dst.entry(port).or_default();
            if !bucket.iter().any(|(n, f)| *n == name && *f as usize == func as usize) {
                bucket.push((name, func));
            }
        }
    }

    fn dispatch(&self, session: &mut crate::session::Session, data: &[u8], which: Direction, src_port: u16, dst_port: u16) {
        if let Some(bucket) = self.src.get(&src_port) {
            for (name, func) in bucket {
                trace!(name, "classifier matched (port src)");
                func(session, data, which);
            }
        }
        if let Some(bucket) = self.dst.get(&dst_port) {
            for (name, func) in bucket {
                trace!(name, "classifier matched (port dst)");
                func(session, data, which);
            }
        }
    }
}

/// All registered classifiers, one set of buckets per transport, built
/// once at startup and read-only from then on (§5: "classifier
/// dispatch tables are mutated only during initial registration").
#[derive(Default)]
pub struct ClassifierTables {
    tcp_content: ContentBuckets,
    tcp_port: PortBuckets,
    udp_content: ContentBuckets,
    udp_port: PortBuckets,
    sctp_content: ContentBuckets,
    sctp_port: PortBuckets,
    sctp_protocol: HashMap<u8, Vec<(&'static str, ClassifyFn)>>,
}

impl ClassifierTables {
    pub fn new() -> Self {
        ClassifierTables::default()
    }

    pub fn register_tcp(&mut self, name: &'static str, offset: usize, match_bytes: &'static [u8], func: ClassifyFn) {
        self.tcp_content.register(name, offset, match_bytes, func);
    }

    pub fn register_udp(&mut self, name: &'static str, offset: usize, match_bytes: &'static [u8], func: ClassifyFn) {
        self.udp_content.register(name, offset, match_bytes, func);
    }

    pub fn register_sctp(&mut self, name: &'static str, offset: usize, match_bytes: &'static [u8], func: ClassifyFn) {
        self.sctp_content.register(name, offset, match_bytes, func);
    }

    pub fn register_port(&mut self, name: &'static str, port: u16, transport: Transport, flags: PortFlags, func: ClassifyFn) {
        match transport {
            Transport::Tcp => self.tcp_port.register(name, port, flags, func),
            Transport::Udp => self.udp_port.register(name, port, flags, func),
            Transport::Sctp => self.sctp_port.register(name, port, flags, func),
        }
    }

    pub fn register_sctp_protocol(&mut self, name: &'static str, protocol: u8, func: ClassifyFn) {
        let bucket = self.sctp_protocol.entry(protocol).or_default();
        if !bucket.iter().any(|(n, f)| *n == name && *f as usize == func as usize) {
            bucket.push((name, func));
        }
    }

    pub fn classify_tcp(&self, session: &mut crate::session::Session, data: &[u8], which: Direction, src_port: u16, dst_port: u16) {
        if data.len() < 2 {
            return;
        }
        self.tcp_port.dispatch(session, data, which, src_port, dst_port);
        self.tcp_content.dispatch(session, data, which);
    }

    pub fn classify_udp(&self, session: &mut crate::session::Session, data: &[u8], which: Direction, src_port: u16, dst_port: u16) {
        if data.len() < 2 {
            return;
        }
        self.udp_port.dispatch(session, data, which, src_port, dst_port);
        self.udp_content.dispatch(session, data, which);
    }

    pub fn classify_sctp(&self, session: &mut crate::session::Session, data: &[u8], which: Direction, src_port: u16, dst_port: u16, payload_protocol_id: u32) {
        if data.len() < 2 {
            return;
        }
        self.sctp_port.dispatch(session, data, which, src_port, dst_port);
        self.sctp_content.dispatch(session, data, which);
        if payload_protocol_id < 256 {
            if let Some(bucket) = self.sctp_protocol.get(&(payload_protocol_id as u8)) {
                for (name, func) in bucket {
                    trace!(name, "classifier matched (sctp protocol)");
                    func(session, data, which);
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Tcp,
    Udp,
    Sctp,
}

/// Registers the built-in content classifiers for the dissectors this
/// crate ships: TLS ServerHello-Certificate, SMTP commands, SMB, and
/// SOCKS. DNS is dispatched directly by the capture reader on UDP/53
/// rather than through a content match (see `Session::dissect_dns`).
pub fn register_builtins(tables: &mut ClassifierTables) {
    tables.register_tcp("tls", 0, &[0x16, 0x03], classify_tls);
    tables.register_tcp("smtp", 0, b"EHLO", classify_smtp);
    tables.register_tcp("smtp", 0, b"HELO", classify_smtp);
    tables.register_port("smb", 445, Transport::Tcp, PortFlags::SRC | PortFlags::DST, classify_smb);
    tables.register_port("socks4", 1080, Transport::Tcp, PortFlags::DST, classify_socks4);
    tables.register_port("socks5", 1080, Transport::Tcp, PortFlags::DST, classify_socks5);
}

fn classify_tls(session: &mut crate::session::Session, data: &[u8], _which: Direction) {
    // §4.6: handshake type 2 (ServerHello) at byte 5, version <= TLS1.2.
    if data.len() >= 6 && data[2] <= 0x03 && data[5] == 0x02 {
        session.attach_tls();
    }
}

fn classify_smtp(session: &mut crate::session::Session, _data: &[u8], _which: Direction) {
    session.add_tag("protocol:smtp");
    session.attach_email();
}

fn classify_smb(session: &mut crate::session::Session, _data: &[u8], _which: Direction) {
    session.add_tag("protocol:smb");
    session.attach_smb(crate::cfg::config::DEFAULT_SMB_BUFFER_CAP);
}

fn classify_socks4(session: &mut crate::session::Session, data: &[u8], which: Direction) {
    if data.first() == Some(&0x04) {
        session.attach_socks(4, which);
    }
}

fn classify_socks5(session: &mut crate::session::Session, data: &[u8], which: Direction) {
    if data.first() == Some(&0x05) {
        session.attach_socks(5, which);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::RecordingFieldSink;

    fn new_session() -> crate::session::Session {
        crate::session::Session::new(Box::new(RecordingFieldSink::default()))
    }

    #[test]
    fn byte2_bucket_trims_stored_match_and_routes_correctly() {
        let mut tables = ClassifierTables::new();
        register_builtins(&mut tables);
        let mut session = new_session();
        // A TLS 1.2 record header: content-type 0x16, version 0x03 0x03,
        // then a 2-byte length, then handshake type 0x02 (ServerHello).
        let data = [0x16, 0x03, 0x03, 0x00, 0x10, 0x02];
        tables.classify_tcp(&mut session, &data, Direction::Responder, 443, 51234);
        assert!(session.certs().is_empty());
    }

    #[test]
    fn duplicate_registration_is_suppressed() {
        let mut tables = ClassifierTables::new();
        tables.register_tcp("dup", 0, b"AB", classify_tls);
        tables.register_tcp("dup", 0, b"AB", classify_tls);
        assert_eq!(tables.tcp_content.byte2.get(&(b'A', b'B')).map(|v| v.len()), Some(1));
    }

    #[test]
    fn port_registration_respects_src_dst_flags() {
        let mut tables = ClassifierTables::new();
        tables.register_port("p", 9999, Transport::Tcp, PortFlags::DST, classify_tls);
        assert!(tables.tcp_port.src.get(&9999).is_none());
        assert!(tables.tcp_port.dst.get(&9999).is_some());
    }

    #[test]
    fn short_chunk_is_not_classified() {
        let mut tables = ClassifierTables::new();
        register_builtins(&mut tables);
        let mut session = new_session();
        tables.classify_tcp(&mut session, &[0x16], Direction::Initiator, 1, 2);
        assert!(session.certs().is_empty());
    }
}

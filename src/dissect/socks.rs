// SPDX-License-Identifier: AGPL-3.0-or-later

//! SOCKS dissector (C10): SOCKS4's single reply handoff, and SOCKS5's
//! 5-state handshake, per §4.10.

use thiserror::Error;
use tracing::warn;

use crate::session::{Direction, FieldId, ParserControl, Session};

#[derive(Debug, Error)]
pub enum SocksError {
    #[error("unexpected direction for SOCKS phase {0:?}")]
    WrongDirection(Phase),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    VerReply,
    UserRequest,
    UserReply,
    ConnRequest,
    ConnReply,
    Done,
}

/// Per-session SOCKS dissector state. SOCKS4 needs only to watch for
/// its single 8-byte server reply; SOCKS5 runs the 5-state machine in
/// [`Phase`].
pub struct SocksParser {
    version: u8,
    phase: Phase,
    client_direction: Option<Direction>,
    /// SOCKS4 only: length of the CONNECT request (8-byte fixed header
    /// plus the variable-length USERID and its NUL terminator), so the
    /// reply can trigger a skip on the request side too.
    request_len: Option<usize>,
}

impl SocksParser {
    /// `client_direction` is the direction that sent the bytes which
    /// got this parser attached in the first place (the request side),
    /// known up front because the engine classifies on that very
    /// chunk's direction before dispatching it to the new parser.
    pub fn new(version: u8, client_direction: Direction) -> Self {
        SocksParser {
            version,
            phase: Phase::VerReply,
            client_direction: Some(client_direction),
            request_len: None,
        }
    }

    pub fn on_chunk(&mut self, session: &mut Session, data: &[u8], which: Direction) -> ParserControl {
        match self.version {
            4 => self.on_chunk_v4(session, data, which),
            5 => self.on_chunk_v5(session, data, which),
            _ => ParserControl::Detach,
        }
    }

    fn on_chunk_v4(&mut self, session: &mut Session, data: &[u8], which: Direction) -> ParserControl {
        if self.client_direction == Some(which) {
            // The engine hands this parser the very chunk that got it
            // attached, on the request direction itself, before the
            // server has had any chance to reply. Record the request's
            // length (8-byte fixed header + USERID + NUL) and wait for
            // the actual reply on the other direction.
            if self.request_len.is_none() && data.len() > 8 {
                if let Some(nul) = data[8..].iter().position(|&b| b == 0) {
                    self.request_len = Some(8 + nul + 1);
                }
            }
            return ParserControl::Continue;
        }
        if data.len() < 8 || data[0] != 0x00 {
            return ParserControl::Continue;
        }
        let status = data[1];
        if !(0x5a..=0x5d).contains(&status) {
            return ParserControl::Detach;
        }
        session.add_tag("protocol:socks");
        // Skip the 8-byte reply on this direction, and the request
        // (including any USERID) on the client's direction, so the
        // reader re-aligns both sides on the tunneled protocol's own
        // stream. Reclassifying what follows is the capture reader's
        // job once this parser detaches.
        session.skip(which, 8);
        if let Some(client) = self.client_direction {
            session.skip(client, self.request_len.unwrap_or(8));
        }
        ParserControl::Detach
    }

    fn on_chunk_v5(&mut self, session: &mut Session, data: &[u8], which: Direction) -> ParserControl {
        match self.phase {
            Phase::VerReply => {
                if data.len() < 2 {
                    return ParserControl::Continue;
                }
                session.add_tag("protocol:socks");
                self.phase = Phase::UserRequest;
                ParserControl::Continue
            }
            Phase::UserRequest => {
                // Username/password negotiation is optional in SOCKS5;
                // a client going straight to CONNECT looks identical to
                // a CONNECT request, so treat this phase's input as a
                // CONNECT request if it parses as one.
                if self.is_client(which) {
                    if let Some(control) = self.try_connect_request(session, data, which) {
                        return control;
                    }
                }
                self.phase = Phase::UserReply;
                ParserControl::Continue
            }
            Phase::UserReply => {
                self.phase = Phase::ConnRequest;
                ParserControl::Continue
            }
            Phase::ConnRequest => {
                if !self.is_client(which) {
                    let err = SocksError::WrongDirection(self.phase);
                    warn!(%err, "detaching");
                    return ParserControl::Detach;
                }
                self.try_connect_request(session, data, which).unwrap_or(ParserControl::Continue)
            }
            Phase::ConnReply => {
                self.phase = Phase::Done;
                ParserControl::Detach
            }
            Phase::Done => ParserControl::Detach,
        }
    }

    fn is_client(&self, which: Direction) -> bool {
        self.client_direction == Some(which)
    }

    fn try_connect_request(&mut self, session: &mut Session, data: &[u8], _which: Direction) -> Option<ParserControl> {
        if data.len() < 5 || data[0] != 0x05 {
            return None;
        }
        let atyp = data[3];
        let (host, rest_offset) = match atyp {
            0x01 => {
                if data.len() < 10 {
                    return None;
                }
                (std::net::Ipv4Addr::new(data[4], data[5], data[6], data[7]).to_string(), 8)
            }
            0x03 => {
                let len = data[4] as usize;
                if data.len() < 5 + len + 2 {
                    return None;
                }
                let name = String::from_utf8_lossy(&data[5..5 + len]).to_lowercase();
                (name, 5 + len)
            }
            0x04 => {
                if data.len() < 22 {
                    return None;
                }
                let segs: Vec<String> = data[4..20].chunks_exact(2).map(|c| format!("{:02x}{:02x}", c[0], c[1])).collect();
                (segs.join(":"), 20)
            }
            _ => return None,
        };
        let port = u16::from_be_bytes([data[rest_offset], data[rest_offset + 1]]);
        session.field_string_add(FieldId::SocksHost, host);
        session.field_int_add(FieldId::SocksPort, port as u32);
        self.phase = Phase::ConnReply;
        Some(ParserControl::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::RecordingFieldSink;

    #[test]
    fn socks5_connect_records_host_and_port() {
        let mut session = Session::new(Box::new(RecordingFieldSink::default()));
        let mut parser = SocksParser::new(5, Direction::Initiator);

        parser.on_chunk(&mut session, &[0x05, 0x01, 0x00], Direction::Initiator);
        parser.on_chunk(&mut session, &[0x05, 0x00], Direction::Responder);
        let domain = b"example.com";
        let mut req = vec![0x05, 0x01, 0x00, 0x03, domain.len() as u8];
        req.extend_from_slice(domain);
        req.extend_from_slice(&80u16.to_be_bytes());
        parser.on_chunk(&mut session, &req, Direction::Initiator);
        parser.on_chunk(
            &mut session,
            &[0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0],
            Direction::Responder,
        );

        let sink = session.sink().unwrap().as_any().downcast_ref::<RecordingFieldSink>().unwrap();
        assert_eq!(sink.strings_for(FieldId::SocksHost), ["example.com"]);
        assert_eq!(sink.ints_for(FieldId::SocksPort), [80]);
        assert!(sink.tags.contains("protocol:socks"));
    }

    #[test]
    fn socks4_reply_sets_skip_and_detaches() {
        let mut session = Session::new(Box::new(RecordingFieldSink::default()));
        let mut parser = SocksParser::new(4, Direction::Initiator);
        let reply = [0x00, 0x5a, 0x00, 0x00, 0, 0, 0, 0];
        let control = parser.on_chunk(&mut session, &reply, Direction::Responder);
        assert_eq!(control, ParserControl::Detach);
        assert!(session.sink().unwrap().as_any().downcast_ref::<RecordingFieldSink>().unwrap().tags.contains("protocol:socks"));
    }

    #[test]
    fn socks4_request_direction_is_ignored_until_the_real_reply_arrives() {
        let mut session = Session::new(Box::new(RecordingFieldSink::default()));
        let mut parser = SocksParser::new(4, Direction::Initiator);
        let request = [0x04, 0x01, 0x00, 0x50, 93, 184, 216, 34];
        // The engine hands the parser its own attaching chunk first;
        // that must not be mistaken for a reply.
        let control = parser.on_chunk(&mut session, &request, Direction::Initiator);
        assert_eq!(control, ParserControl::Continue);
        assert!(!session.sink().unwrap().as_any().downcast_ref::<RecordingFieldSink>().unwrap().tags.contains("protocol:socks"));

        let reply = [0x00, 0x5a, 0x00, 0x00, 0, 0, 0, 0];
        let control = parser.on_chunk(&mut session, &reply, Direction::Responder);
        assert_eq!(control, ParserControl::Detach);
        assert!(session.sink().unwrap().as_any().downcast_ref::<RecordingFieldSink>().unwrap().tags.contains("protocol:socks"));
    }
}

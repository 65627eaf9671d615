// SPDX-License-Identifier: AGPL-3.0-or-later

//! SMB dissector (C9): NetBIOS framing, SMB1/SMB2 discrimination, and
//! selected command dissection with UCS-2LE → UTF-8 conversion, per
//! §4.9.

use thiserror::Error;
use tracing::warn;

use crate::session::{Direction, FieldId, ParserControl, Session, buffer::ParserBuffer};

#[derive(Debug, Error)]
pub enum SmbError {
    #[error("framed record length {0} exceeds the coalescing buffer cap")]
    RecordTooLarge(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Netbios,
    SmbHeader,
}

struct SideState {
    state: State,
    remaining: u32,
    version: u8,
}

impl Default for SideState {
    fn default() -> Self {
        SideState {
            state: State::Netbios,
            remaining: 0,
            version: 0,
        }
    }
}

/// Per-session SMB dissector state: a coalescing [`ParserBuffer`] plus
/// per-direction framing state.
pub struct SmbParser {
    buffer: ParserBuffer,
    sides: [SideState; 2],
}

impl SmbParser {
    pub fn new(buffer_cap: usize) -> Self {
        SmbParser {
            buffer: ParserBuffer::new(buffer_cap),
            sides: [SideState::default(), SideState::default()],
        }
    }

    pub fn on_chunk(&mut self, session: &mut Session, data: &[u8], which: Direction) -> ParserControl {
        let idx = which.index();
        if !self.buffer.add(idx, data) {
            warn!("SMB coalescing buffer overflow, detaching");
            return ParserControl::Detach;
        }

        loop {
            match self.sides[idx].state {
                State::Netbios => {
                    // Need the 4-byte NetBIOS header plus the SMB
                    // version marker byte that immediately follows it;
                    // a chunk boundary landing right after the header
                    // is routine for a reassembled TCP stream, so don't
                    // read the marker until it has actually arrived.
                    if self.buffer.len(idx) < 5 {
                        break;
                    }
                    let bytes = self.buffer.bytes(idx);
                    let frame_len = u32::from_be_bytes([0, bytes[1], bytes[2], bytes[3]]) as usize;
                    let smb_marker = bytes[4];
                    self.sides[idx].version = match smb_marker {
                        0xff => 1,
                        0xfe => 2,
                        _ => 0,
                    };
                    self.sides[idx].remaining = frame_len as u32;
                    self.buffer.del(idx, 4);
                    self.sides[idx].state = State::SmbHeader;
                }
                State::SmbHeader => {
                    let remaining = self.sides[idx].remaining as usize;
                    if remaining > self.buffer_cap() {
                        let err = SmbError::RecordTooLarge(remaining);
                        warn!(%err, "detaching");
                        return ParserControl::Detach;
                    }
                    if self.buffer.len(idx) < remaining {
                        break;
                    }
                    let frame = self.buffer.bytes(idx)[..remaining].to_vec();
                    self.dissect_frame(session, &frame, self.sides[idx].version);
                    self.buffer.del(idx, remaining);
                    self.sides[idx].state = State::Netbios;
                }
            }
        }
        ParserControl::Continue
    }

    fn buffer_cap(&self) -> usize {
        // ParserBuffer doesn't expose its cap directly; SmbParser is
        // always constructed with the runtime's MAX_SMB_BUFFER, so the
        // check above is really "does this one frame fit in what we
        // can coalesce" — mirrored here via a second bound equal to
        // the buffer's own cap, read back through a zero-cost probe.
        self.buffer.cap()
    }

    fn dissect_frame(&self, session: &mut Session, frame: &[u8], version: u8) {
        match version {
            1 => dissect_smb1(session, frame),
            2 => dissect_smb2(session, frame),
            _ => {}
        }
    }
}

fn ucs2le_to_utf8(bytes: &[u8]) -> String {
    encoding_rs::UTF_16LE.decode(bytes).0.into_owned()
}

// SMB1 command codes relevant to §4.9.
const SMB1_DELETE: u8 = 0x06;
const SMB1_OPEN_ANDX: u8 = 0x2d;
const SMB1_CREATE_ANDX: u8 = 0xa2;
const SMB1_SETUP_ANDX: u8 = 0x73;
const SMB1_TREE_CONNECT_ANDX: u8 = 0x75;

fn dissect_smb1(session: &mut Session, frame: &[u8]) {
    if frame.len() < 32 {
        return;
    }
    let command = frame[4];
    let body = &frame[32..];
    match command {
        SMB1_DELETE | SMB1_OPEN_ANDX | SMB1_CREATE_ANDX => {
            if let Some(name) = extract_trailing_ucs2_filename(body) {
                session.field_string_add(FieldId::SmbFilename, name);
            }
        }
        SMB1_SETUP_ANDX => {
            if let Some((domain, user, host)) = extract_ntlmssp_authenticate(body) {
                session.field_string_add(FieldId::SmbDomain, domain);
                session.field_string_add(FieldId::SmbUser, user);
                session.field_string_add(FieldId::SmbHost, host);
            }
        }
        SMB1_TREE_CONNECT_ANDX => {
            if let Some(name) = extract_trailing_ucs2_filename(body) {
                session.field_string_add(FieldId::SmbFilename, name);
            }
        }
        _ => {}
    }
}

const SMB2_TREE_CONNECT: u16 = 0x0003;
const SMB2_CREATE: u16 = 0x0005;

fn dissect_smb2(session: &mut Session, frame: &[u8]) {
    if frame.len() < 64 {
        return;
    }
    let command = u16::from_le_bytes([frame[12], frame[13]]);
    let body = &frame[64..];
    match command {
        SMB2_CREATE => {
            // Fixed SMB2 CREATE request body is 56 bytes before the
            // variable name buffer; offsets 44/46 hold name
            // length/offset relative to the SMB2 header start.
            if body.len() >= 48 {
                let name_len = u16::from_le_bytes([body[44], body[45]]) as usize;
                let name_offset = u16::from_le_bytes([body[46], body[47]]) as usize;
                if name_offset >= 64 {
                    let rel = name_offset - 64;
                    if let Some(name_bytes) = frame.get(64 + rel..64 + rel + name_len) {
                        session.field_string_add(FieldId::SmbFilename, ucs2le_to_utf8(name_bytes));
                    }
                }
            }
        }
        SMB2_TREE_CONNECT => {
            if let Some(name) = extract_trailing_ucs2_filename(body) {
                session.field_string_add(FieldId::SmbHost, name);
            }
        }
        _ => {}
    }
}

fn extract_trailing_ucs2_filename(body: &[u8]) -> Option<String> {
    if body.len() < 2 {
        return None;
    }
    let name = ucs2le_to_utf8(body);
    let trimmed: String = name.chars().take_while(|&c| c != '\0').collect();
    if trimmed.is_empty() { None } else { Some(trimmed) }
}

/// Extracts domain/user/host from an NTLMSSP Authenticate message
/// embedded in an SMB1 SessionSetupAndX security blob.
fn extract_ntlmssp_authenticate(body: &[u8]) -> Option<(String, String, String)> {
    let sig = b"NTLMSSP\0";
    let pos = body.windows(sig.len()).position(|w| w == sig)?;
    let blob = &body[pos..];
    if blob.len() < 12 {
        return None;
    }
    let msg_type = u32::from_le_bytes([blob[8], blob[9], blob[10], blob[11]]);
    if msg_type != 3 {
        return None;
    }
    // Authenticate message field layout: each of Domain, User, Host is
    // an 8-byte (len, maxlen, offset) triple, present in this order
    // starting at offset 28.
    let domain = ntlm_field(blob, 28)?;
    let user = ntlm_field(blob, 36)?;
    let host = ntlm_field(blob, 44)?;
    Some((domain, user, host))
}

fn ntlm_field(blob: &[u8], field_off: usize) -> Option<String> {
    let len = u16::from_le_bytes([*blob.get(field_off)?, *blob.get(field_off + 1)?]) as usize;
    let offset = u32::from_le_bytes([
        *blob.get(field_off + 4)?,
        *blob.get(field_off + 5)?,
        *blob.get(field_off + 6)?,
        *blob.get(field_off + 7)?,
    ]) as usize;
    let bytes = blob.get(offset..offset + len)?;
    Some(ucs2le_to_utf8(bytes))
}

// SPDX-License-Identifier: AGPL-3.0-or-later

//! Email (SMTP/ESMTP) dissector (C7): a byte-driven state machine per
//! direction spanning the command dialog, DATA headers, and MIME parts
//! with base64 decode and per-part MD5, per §4.7.

use base64::Engine as _;
use md5::{Digest, Md5};
use tracing::warn;

use crate::{
    dissect::tls::TlsCertParser,
    session::{Direction, FieldId, ParserControl, Session},
};

const LINE_CAP: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Cmd,
    CmdReturn,
    DataHeader,
    DataHeaderReturn,
    Data,
    DataReturn,
    Ignore,
    TlsOk,
    TlsOkReturn,
    Tls,
    Mime,
    MimeReturn,
    MimeData,
    MimeDataReturn,
}

#[derive(Debug, Default)]
struct PartState {
    base64_active: bool,
    md5: Md5,
    base64_residual: Vec<u8>,
}

impl PartState {
    fn reset(&mut self) {
        self.base64_active = false;
        self.md5 = Md5::new();
        self.base64_residual.clear();
    }
}

#[derive(Debug)]
struct Side {
    state: State,
    line: Vec<u8>,
    part: PartState,
    header_name: String,
}

impl Default for Side {
    fn default() -> Self {
        Side {
            state: State::Cmd,
            line: Vec::new(),
            part: PartState::default(),
            header_name: String::new(),
        }
    }
}

/// Per-session email dissector state: one [`Side`] per direction, plus
/// session-wide MIME boundary tracking (§3 "list of active MIME
/// boundary strings").
#[derive(Debug)]
pub struct EmailParser {
    sides: [Side; 2],
    boundaries: Vec<String>,
}

impl Default for EmailParser {
    fn default() -> Self {
        EmailParser {
            sides: [Side::default(), Side::default()],
            boundaries: Vec::new(),
        }
    }
}

impl EmailParser {
    pub fn new() -> Self {
        EmailParser::default()
    }

    pub fn on_chunk(&mut self, session: &mut Session, data: &[u8], which: Direction) -> ParserControl {
        let mut i = 0;
        while i < data.len() {
            let byte = data[i];
            let state = self.sides[which.index()].state;
            match state {
                State::Ignore => {}
                _ if byte == b'\r' => {
                    self.sides[which.index()].state = Self::return_state(state);
                    i += 1;
                    continue;
                }
                state if Self::is_return_state(state) => {
                    if byte != b'\n' {
                        // Expected LF absent: re-enter the base state
                        // and re-process this byte (§4.7 "continue, do
                        // not advance").
                        self.sides[which.index()].state = Self::base_of_return(state);
                        continue;
                    }
                    let base = Self::base_of_return(state);
                    self.sides[which.index()].state = base;
                    if base == State::Tls {
                        // Hand the rest of this chunk to the TLS
                        // dissector and attach it for future chunks,
                        // then free this dissector entirely (§4.7).
                        let rest = &data[i + 1..];
                        session.attach_tls();
                        let mut tls = TlsCertParser::new();
                        tls.on_chunk(session, rest, which);
                        return ParserControl::Detach;
                    }
                    self.dispatch_line(session, which, base);
                    i += 1;
                    continue;
                }
                _ => {
                    let side = &mut self.sides[which.index()];
                    if side.line.len() < LINE_CAP {
                        side.line.push(byte);
                    } else {
                        session.add_tag("email:line-too-long");
                        side.line.clear();
                        side.state = State::Ignore;
                    }
                }
            }
            i += 1;
        }
        ParserControl::Continue
    }

    fn is_return_state(state: State) -> bool {
        matches!(
            state,
            State::CmdReturn | State::DataHeaderReturn | State::DataReturn | State::TlsOkReturn | State::MimeReturn | State::MimeDataReturn
        )
    }

    fn return_state(state: State) -> State {
        match state {
            State::Cmd => State::CmdReturn,
            State::DataHeader => State::DataHeaderReturn,
            State::Data => State::DataReturn,
            State::TlsOk => State::TlsOkReturn,
            State::Mime => State::MimeReturn,
            State::MimeData => State::MimeDataReturn,
            other => other,
        }
    }

    fn base_of_return(state: State) -> State {
        match state {
            State::CmdReturn => State::Cmd,
            State::DataHeaderReturn => State::DataHeader,
            State::DataReturn => State::Data,
            State::TlsOkReturn => State::Tls,
            State::MimeReturn => State::Mime,
            State::MimeDataReturn => State::MimeData,
            other => other,
        }
    }

    fn dispatch_line(&mut self, session: &mut Session, which: Direction, base: State) {
        let line = std::mem::take(&mut self.sides[which.index()].line);
        match base {
            State::Cmd => self.dispatch_command(session, which, &line),
            State::DataHeader => self.dispatch_header(session, which, &line),
            State::Data | State::MimeData => self.dispatch_data_line(session, which, base, &line),
            State::Mime => self.dispatch_mime_header(session, which, &line),
            _ => {}
        }
    }

    fn dispatch_command(&mut self, session: &mut Session, which: Direction, line: &[u8]) {
        let text = String::from_utf8_lossy(line);
        let upper = text.trim_end().to_ascii_uppercase();
        if let Some(rest) = starts_with_ci(&upper, &text, "MAIL FROM:") {
            if let Some(addr) = extract_address(rest) {
                session.field_string_add(FieldId::EmailSrc, addr.to_lowercase());
            }
        } else if let Some(rest) = starts_with_ci(&upper, &text, "RCPT TO:") {
            if let Some(addr) = extract_address(rest) {
                session.field_string_add(FieldId::EmailDst, addr.to_lowercase());
            }
        } else if upper.starts_with("DATA") {
            self.sides[which.index()].state = State::DataHeader;
            return;
        } else if upper.starts_with("STARTTLS") {
            self.sides[which.index()].state = State::Ignore;
            self.sides[which.other().index()].state = State::TlsOk;
            return;
        }
        self.sides[which.index()].state = State::Cmd;
    }

    fn dispatch_header(&mut self, session: &mut Session, which: Direction, line: &[u8]) {
        if line == b"." {
            self.sides[which.index()].state = State::Cmd;
            return;
        }
        if line.is_empty() {
            self.sides[which.index()].state = State::Data;
            return;
        }
        // CRLF+WSP folding: a continuation line starts with space/tab
        // and is appended to the previous header's accumulated name.
        if (line[0] == b' ' || line[0] == b'\t') && !self.sides[which.index()].header_name.is_empty() {
            apply_header(session, &self.sides[which.index()].header_name.clone(), line, &mut self.boundaries);
            self.sides[which.index()].state = State::DataHeader;
            return;
        }
        let text = String::from_utf8_lossy(line);
        match text.find(':') {
            Some(idx) => {
                let name = text[..idx].trim().to_ascii_lowercase();
                let value = text[idx + 1..].trim();
                apply_header(session, &name, value.as_bytes(), &mut self.boundaries);
                self.sides[which.index()].header_name = name;
            }
            None => {
                // Header line with no ':' is dropped; state returns to
                // DATA_HEADER (§8 boundary behavior).
            }
        }
        self.sides[which.index()].state = State::DataHeader;
    }

    fn dispatch_mime_header(&mut self, session: &mut Session, which: Direction, line: &[u8]) {
        if line.is_empty() {
            self.sides[which.index()].state = State::MimeData;
            return;
        }
        let text = String::from_utf8_lossy(line);
        if let Some(idx) = text.find(':') {
            let name = text[..idx].trim().to_ascii_lowercase();
            let value = &text[idx + 1..];
            match name.as_str() {
                "content-type" => extract_boundary(value, &mut self.boundaries),
                "content-disposition" => {
                    if let Some(fname) = extract_kv(value, "filename") {
                        session.field_string_add(FieldId::EmailFilename, fname);
                    }
                }
                "content-transfer-encoding" => {
                    if value.to_ascii_lowercase().contains("base64") {
                        self.sides[which.index()].part.base64_active = true;
                    }
                }
                _ => {}
            }
        }
        self.sides[which.index()].state = State::Mime;
    }

    fn dispatch_data_line(&mut self, session: &mut Session, which: Direction, base: State, line: &[u8]) {
        if line == b"." {
            self.sides[which.index()].state = State::Cmd;
            return;
        }
        if line.starts_with(b"--") {
            let suffix = &line[2..];
            // Matches both the mid-message separator (`--BOUNDARY`) and
            // the final closing delimiter (`--BOUNDARY--`).
            if self.boundaries.iter().any(|b| suffix.starts_with(b.as_bytes())) {
                self.finish_part(session, which);
                self.sides[which.index()].state = State::Mime;
                return;
            }
        }
        if base == State::MimeData && self.sides[which.index()].part.base64_active {
            decode_base64_line(&mut self.sides[which.index()].part, line);
        }
        self.sides[which.index()].state = base;
    }

    fn finish_part(&mut self, session: &mut Session, which: Direction) {
        let part = &mut self.sides[which.index()].part;
        if part.base64_active {
            let digest = part.md5.clone().finalize();
            session.field_string_add(FieldId::EmailAttachmentMd5, hex::encode(digest));
        }
        part.reset();
    }

    /// Invoked by `SessionParser::on_save` (through the renamed inherent
    /// entry point below, to avoid shadowing the trait method name and
    /// recursing into itself).
    pub fn finalize_open_part(&mut self, session: &mut Session, _final_flush: bool) {
        for which in [Direction::Initiator, Direction::Responder] {
            if self.sides[which.index()].part.base64_active {
                self.finish_part(session, which);
            }
        }
    }
}

fn starts_with_ci<'a>(upper: &str, original: &'a str, prefix: &str) -> Option<&'a str> {
    if upper.starts_with(prefix) {
        Some(original[prefix.len()..].trim())
    } else {
        None
    }
}

fn extract_address(s: &str) -> Option<String> {
    if let (Some(start), Some(end)) = (s.find('<'), s.rfind('>')) {
        if end > start {
            return Some(s[start + 1..end].to_string());
        }
    }
    let trimmed = s.trim();
    if trimmed.is_empty() { None } else { Some(trimmed.to_string()) }
}

fn apply_header(session: &mut Session, name: &str, value: &[u8], boundaries: &mut Vec<String>) {
    let value_str = String::from_utf8_lossy(value);
    match name {
        "to" => {
            if let Some(addr) = extract_address(&value_str) {
                session.field_string_add(FieldId::EmailDst, addr.to_lowercase());
            }
        }
        "cc" => {
            if let Some(addr) = extract_address(&value_str) {
                session.field_string_add(FieldId::EmailCc, addr.to_lowercase());
            }
        }
        "from" => {
            if let Some(addr) = extract_address(&value_str) {
                session.field_string_add(FieldId::EmailSrc, addr.to_lowercase());
            }
        }
        "message-id" => {
            let trimmed = value_str.trim().trim_start_matches('<').trim_end_matches('>');
            session.field_string_add(FieldId::EmailMessageId, trimmed.to_string());
        }
        "content-type" => {
            session.field_string_add(FieldId::EmailContentType, value_str.trim().to_string());
            extract_boundary(&value_str, boundaries);
        }
        "received" | "x-forwarded-for" => {
            if let Some(ip) = extract_bracketed_ip(&value_str) {
                session.field_string_add(FieldId::EmailIp, ip);
            } else {
                for candidate in value_str.split(',') {
                    let candidate = candidate.trim();
                    if let Some(ip) = crate::utils::parse_ipv4_hash(candidate) {
                        session.field_string_add(FieldId::EmailIp, ip.to_string());
                    } else if !candidate.is_empty() {
                        session.add_tag("http:bad-xff");
                    }
                }
            }
        }
        _ => {}
    }
}

fn extract_bracketed_ip(s: &str) -> Option<String> {
    let start = s.find('[')?;
    let end = s[start..].find(']')? + start;
    let candidate = &s[start + 1..end];
    crate::utils::parse_ipv4_hash(candidate).map(|ip| ip.to_string())
}

fn extract_boundary(value: &str, boundaries: &mut Vec<String>) {
    if let Some(b) = extract_kv(value, "boundary") {
        boundaries.push(b);
    }
}

fn extract_kv(value: &str, key: &str) -> Option<String> {
    let lower = value.to_ascii_lowercase();
    let idx = lower.find(key)?;
    let rest = &value[idx + key.len()..];
    let rest = rest.trim_start();
    let rest = rest.strip_prefix('=')?;
    let rest = rest.trim_start();
    if let Some(stripped) = rest.strip_prefix('"') {
        let end = stripped.find('"')?;
        Some(stripped[..end].to_string())
    } else {
        let end = rest.find(|c: char| c == ';' || c.is_whitespace()).unwrap_or(rest.len());
        Some(rest[..end].to_string())
    }
}

fn decode_base64_line(part: &mut PartState, line: &[u8]) {
    part.base64_residual.extend_from_slice(line);
    let usable = part.base64_residual.len() - part.base64_residual.len() % 4;
    if usable == 0 {
        return;
    }
    let chunk: Vec<u8> = part.base64_residual.drain(..usable).collect();
    match base64::engine::general_purpose::STANDARD.decode(&chunk) {
        Ok(bytes) => part.md5.update(&bytes),
        Err(err) => warn!(%err, "bad base64 in email part"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::RecordingFieldSink;

    fn feed(parser: &mut EmailParser, session: &mut Session, which: Direction, text: &str) {
        parser.on_chunk(session, text.as_bytes(), which);
    }

    #[test]
    fn extracts_envelope_addresses() {
        let mut session = Session::new(Box::new(RecordingFieldSink::default()));
        let mut parser = EmailParser::new();
        feed(&mut parser, &mut session, Direction::Initiator, "MAIL FROM:<a@x>\r\nRCPT TO:<b@y>\r\n");
        let sink = session.sink().unwrap().as_any().downcast_ref::<RecordingFieldSink>().unwrap();
        assert_eq!(sink.strings_for(FieldId::EmailSrc), ["a@x"]);
        assert_eq!(sink.strings_for(FieldId::EmailDst), ["b@y"]);
    }

    #[test]
    fn base64_attachment_hashes_to_expected_md5() {
        let mut session = Session::new(Box::new(RecordingFieldSink::default()));
        let mut parser = EmailParser::new();
        let dialog = "MAIL FROM:<a@x>\r\nRCPT TO:<b@y>\r\nDATA\r\nSubject: hi\r\nContent-Type: multipart/mixed; boundary=\"BB\"\r\n\r\n--BB\r\nContent-Transfer-Encoding: base64\r\n\r\naGVsbG8=\r\n--BB--\r\n.\r\n";
        feed(&mut parser, &mut session, Direction::Initiator, dialog);
        let expected = hex::encode(Md5::digest(b"hello"));
        let sink = session.sink().unwrap().as_any().downcast_ref::<RecordingFieldSink>().unwrap();
        assert_eq!(sink.strings_for(FieldId::EmailSrc), ["a@x"]);
        assert_eq!(sink.strings_for(FieldId::EmailDst), ["b@y"]);
        assert_eq!(sink.strings_for(FieldId::EmailAttachmentMd5), [expected]);
    }

    #[test]
    fn dropped_header_with_no_colon_returns_to_data_header() {
        let mut session = Session::new(Box::new(RecordingFieldSink::default()));
        let mut parser = EmailParser::new();
        feed(&mut parser, &mut session, Direction::Initiator, "DATA\r\nnocolonhere\r\nSubject: x\r\n\r\n");
        assert_eq!(parser.sides[0].state, State::Data);
    }

    #[test]
    fn overlong_line_truncates_and_tags() {
        let mut session = Session::new(Box::new(RecordingFieldSink::default()));
        let mut parser = EmailParser::new();
        let long = "A".repeat(LINE_CAP + 10);
        feed(&mut parser, &mut session, Direction::Initiator, &long);
        assert_eq!(parser.sides[0].state, State::Ignore);
    }
}

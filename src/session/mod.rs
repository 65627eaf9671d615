// SPDX-License-Identifier: AGPL-3.0-or-later

//! The dissector framework (C5): a `Session` handle carrying a
//! per-session parser slot table, plus the lifecycle (register,
//! unregister, dispatch, save, close) that drives it.

pub mod buffer;
pub mod named;

use std::collections::HashSet;

use enum_dispatch::enum_dispatch;
use tracing::warn;

use crate::{
    dissect::{dns, email::EmailParser, smb::SmbParser, socks::SocksParser, tls::TlsCertParser},
    sink::FieldSink,
};

/// Per-chunk direction: 0 = initiator→responder, 1 = responder→initiator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Initiator,
    Responder,
}

impl Direction {
    pub fn other(self) -> Direction {
        match self {
            Direction::Initiator => Direction::Responder,
            Direction::Responder => Direction::Initiator,
        }
    }

    pub fn index(self) -> usize {
        match self {
            Direction::Initiator => 0,
            Direction::Responder => 1,
        }
    }
}

/// The typed field identifiers a dissector can push into the field
/// sink, per §6's field-type table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldId {
    DnsHost,
    DnsIp,
    EmailSrc,
    EmailDst,
    EmailCc,
    EmailMessageId,
    EmailContentType,
    EmailFilename,
    EmailAttachmentMd5,
    EmailIp,
    SocksHost,
    SocksPort,
    SocksUser,
    SmbFilename,
    SmbDomain,
    SmbUser,
    SmbHost,
}

/// What a dissector returns after processing one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserControl {
    /// Keep this parser attached for the next chunk.
    Continue,
    /// Detach this parser; its slot is freed after this call.
    Detach,
}

/// A per-session dissector. Built-in dissectors are enum_dispatch
/// variants of [`ParserSlot`]; third-party extensions implement this
/// trait directly and are boxed into [`ParserSlot::Plugin`].
pub trait SessionParser: Send {
    fn parse(&mut self, session: &mut Session, data: &[u8], which: Direction) -> ParserControl;

    /// Invoked by `session_save`, with `final_flush` true only on the
    /// last save before session close.
    fn on_save(&mut self, _session: &mut Session, _final_flush: bool) {}

    /// Invoked right before this parser's slot is freed, either by
    /// `Detach` or by session close.
    fn on_detach(&mut self, _session: &mut Session) {}
}

/// Maximum live parser slots per session (§4.5, §5). Registration
/// beyond this cap logs once and is dropped.
pub const MAX_PARSER_SLOTS: usize = 32;

/// The tagged variant over built-in parser kinds, plus an escape hatch
/// for boxed trait-object extensions. Replaces the original's
/// function-pointer-plus-`void*` parser slot per the Design Notes §9
/// mandate; mirrors the `#[enum_dispatch]` tagged-PDU-enum idiom used
/// elsewhere in this codebase for the same "one trait, several
/// concrete shapes" problem.
#[enum_dispatch(SessionParser)]
pub enum ParserSlot {
    Tls(TlsCertParser),
    Email(EmailParser),
    Smb(SmbParser),
    Socks(SocksParser),
    Plugin(PluginSlot),
}

/// A boxed third-party dissector, named so it can be located again
/// for `unregister`.
pub struct PluginSlot {
    pub name: &'static str,
    pub inner: Box<dyn SessionParser>,
}

impl SessionParser for PluginSlot {
    fn parse(&mut self, session: &mut Session, data: &[u8], which: Direction) -> ParserControl {
        self.inner.parse(session, data, which)
    }

    fn on_save(&mut self, session: &mut Session, final_flush: bool) {
        self.inner.on_save(session, final_flush);
    }

    fn on_detach(&mut self, session: &mut Session) {
        self.inner.on_detach(session);
    }
}

// enum_dispatch generates `impl SessionParser for ParserSlot` by
// forwarding to each variant's inner value, since every variant
// listed above implements `SessionParser`.
impl SessionParser for TlsCertParser {
    fn parse(&mut self, session: &mut Session, data: &[u8], which: Direction) -> ParserControl {
        self.on_chunk(session, data, which)
    }
}

impl SessionParser for EmailParser {
    fn parse(&mut self, session: &mut Session, data: &[u8], which: Direction) -> ParserControl {
        self.on_chunk(session, data, which)
    }

    fn on_save(&mut self, session: &mut Session, final_flush: bool) {
        self.finalize_open_part(session, final_flush);
    }
}

impl SessionParser for SmbParser {
    fn parse(&mut self, session: &mut Session, data: &[u8], which: Direction) -> ParserControl {
        self.on_chunk(session, data, which)
    }
}

impl SessionParser for SocksParser {
    fn parse(&mut self, session: &mut Session, data: &[u8], which: Direction) -> ParserControl {
        self.on_chunk(session, data, which)
    }
}

/// A session's live dissectors: a fixed-capacity slot table, not
/// compacted on removal (matching §4.5's "later inserts fill zeros").
#[derive(Default)]
pub struct ParserTable {
    slots: Vec<Option<ParserSlot>>,
    capped_once: bool,
}

impl ParserTable {
    fn new() -> Self {
        ParserTable {
            slots: Vec::with_capacity(2),
            capped_once: false,
        }
    }

    /// Insert a new dissector into the first free slot, or grow the
    /// table, unless `MAX_PARSER_SLOTS` has been reached.
    fn register(&mut self, slot: ParserSlot) {
        if let Some(free) = self.slots.iter_mut().find(|s| s.is_none()) {
            *free = Some(slot);
            return;
        }
        if self.slots.len() >= MAX_PARSER_SLOTS {
            if !self.capped_once {
                warn!("parser slot table full, dropping registration");
                self.capped_once = true;
            }
            return;
        }
        self.slots.push(Some(slot));
    }

    fn dispatch(session_parsers: &mut ParserTable, session_rest: &mut SessionRest, data: &[u8], which: Direction) {
        let len = session_parsers.slots.len();
        for i in 0..len {
            let Some(mut slot) = session_parsers.slots[i].take() else {
                continue;
            };
            let control = {
                // Safety-free reborrow: Session is split into
                // `parsers` (this table) and `rest` (everything else)
                // so a parser can mutate the rest of the session while
                // we hold the slot out of the table.
                let mut tmp = Session {
                    parsers: std::mem::take(session_parsers),
                    rest: std::mem::take(session_rest),
                };
                let control = slot.parse(&mut tmp, data, which);
                *session_parsers = tmp.parsers;
                *session_rest = tmp.rest;
                control
            };
            match control {
                ParserControl::Continue => session_parsers.slots[i] = Some(slot),
                ParserControl::Detach => {
                    let mut tmp = Session {
                        parsers: std::mem::take(session_parsers),
                        rest: std::mem::take(session_rest),
                    };
                    slot.on_detach(&mut tmp);
                    *session_parsers = tmp.parsers;
                    *session_rest = tmp.rest;
                }
            }
        }
    }

    fn save(session_parsers: &mut ParserTable, session_rest: &mut SessionRest, final_flush: bool) {
        let len = session_parsers.slots.len();
        for i in 0..len {
            let Some(mut slot) = session_parsers.slots[i].take() else {
                continue;
            };
            let mut tmp = Session {
                parsers: std::mem::take(session_parsers),
                rest: std::mem::take(session_rest),
            };
            slot.on_save(&mut tmp, final_flush);
            *session_parsers = tmp.parsers;
            *session_rest = tmp.rest;
            session_parsers.slots[i] = Some(slot);
        }
    }

    fn close(session_parsers: &mut ParserTable, session_rest: &mut SessionRest) {
        let len = session_parsers.slots.len();
        for i in 0..len {
            let Some(mut slot) = session_parsers.slots[i].take() else {
                continue;
            };
            let mut tmp = Session {
                parsers: std::mem::take(session_parsers),
                rest: std::mem::take(session_rest),
            };
            slot.on_detach(&mut tmp);
            *session_parsers = tmp.parsers;
            *session_rest = tmp.rest;
        }
        session_parsers.slots.clear();
    }
}

/// A structurally hashable/eq certificate record, per §3. Equality and
/// hashing are derived directly rather than via a custom-equality
/// hash-set key, per Design Notes §9.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DistinguishedName {
    pub common_names: Vec<String>,
    pub org: Option<String>,
    pub org_is_utf8: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CertRecord {
    pub serial: Vec<u8>,
    pub issuer: DistinguishedName,
    pub subject: DistinguishedName,
    pub alt_names: Vec<String>,
}

/// Everything about a session other than its parser table; split out
/// so the dispatch loop above can hand a parser `&mut Session` built
/// from borrowed halves without holding the slot it's currently
/// running inside of.
#[derive(Default)]
pub struct SessionRest {
    pub skip: [usize; 2],
    pub certs: HashSet<CertRecord>,
    pub sink: Option<Box<dyn FieldSink>>,
    pub tags_emitted: HashSet<&'static str>,
}

/// A classified network flow. Core sees only this handle; five-tuple
/// identity and reassembly are the capture reader's job (§1/§3).
#[derive(Default)]
pub struct Session {
    parsers: ParserTable,
    rest: SessionRest,
}

impl Session {
    pub fn new(sink: Box<dyn FieldSink>) -> Self {
        Session {
            parsers: ParserTable::new(),
            rest: SessionRest {
                sink: Some(sink),
                ..Default::default()
            },
        }
    }

    pub fn add_tag(&mut self, tag: &'static str) {
        if self.rest.tags_emitted.insert(tag) {
            if let Some(sink) = self.rest.sink.as_deref_mut() {
                sink.add_tag(tag);
            }
        }
    }

    pub fn field_string_add(&mut self, field: FieldId, value: String) -> bool {
        self.rest
            .sink
            .as_deref_mut()
            .map(|s| s.field_string_add(field, value))
            .unwrap_or(false)
    }

    /// Read access to the attached field sink, for tests and the demo
    /// binary that need to inspect what a dissector recorded.
    pub fn sink(&self) -> Option<&dyn FieldSink> {
        self.rest.sink.as_deref()
    }

    pub fn field_int_add(&mut self, field: FieldId, value: u32) {
        if let Some(sink) = self.rest.sink.as_deref_mut() {
            sink.field_int_add(field, value);
        }
    }

    pub fn skip(&mut self, which: Direction, n: usize) {
        self.rest.skip[which.index()] += n;
    }

    pub fn take_skip(&mut self, which: Direction) -> usize {
        std::mem::take(&mut self.rest.skip[which.index()])
    }

    /// Insert `cert` into the session's certificate set, returning
    /// `true` if it was newly inserted (not a structural duplicate).
    pub fn add_cert(&mut self, cert: CertRecord) -> bool {
        self.rest.certs.insert(cert)
    }

    pub fn certs(&self) -> &HashSet<CertRecord> {
        &self.rest.certs
    }

    pub fn attach_tls(&mut self) {
        self.attach(ParserSlot::Tls(TlsCertParser::new()));
    }

    pub fn attach_email(&mut self) {
        self.attach(ParserSlot::Email(EmailParser::new()));
    }

    pub fn attach_smb(&mut self, buffer_cap: usize) {
        self.attach(ParserSlot::Smb(SmbParser::new(buffer_cap)));
    }

    pub fn attach_socks(&mut self, version: u8, client_direction: Direction) {
        self.attach(ParserSlot::Socks(SocksParser::new(version, client_direction)));
    }

    pub fn attach_plugin(&mut self, name: &'static str, parser: Box<dyn SessionParser>) {
        self.attach(ParserSlot::Plugin(PluginSlot { name, inner: parser }));
    }

    fn attach(&mut self, slot: ParserSlot) {
        self.parsers.register(slot);
    }

    /// Run the DNS dissector, which is stateless and one-shot per §4.8
    /// and therefore needs no parser slot.
    pub fn dissect_dns(&mut self, data: &[u8]) {
        dns::dissect(self, data);
    }

    /// Route `data` to every attached dissector, in slot order.
    pub fn dispatch(&mut self, data: &[u8], which: Direction) {
        ParserTable::dispatch(&mut self.parsers, &mut self.rest, data, which);
    }

    pub fn save(&mut self, final_flush: bool) {
        ParserTable::save(&mut self.parsers, &mut self.rest, final_flush);
    }

    pub fn close(&mut self) {
        ParserTable::close(&mut self.parsers, &mut self.rest);
    }
}

// SPDX-License-Identifier: AGPL-3.0-or-later

//! The field sink and bulk-send sink interfaces (§6). Both are
//! external collaborators — a real deployment would plug in an actual
//! field store and a real Kafka/Netflow/HTTP output — but a core that
//! can't be exercised end-to-end isn't useful, so this module also
//! provides a reference in-memory implementation of each, used by the
//! demo binary and the scenario tests.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::{cfg::enums::BulkMode, session::FieldId};

/// The typed-add interface a session's field store exposes. Strings
/// are deduplicated by the sink per field; `field_string_add` returns
/// whether the value was newly added.
pub trait FieldSink: Send {
    fn add_tag(&mut self, tag: &'static str);
    fn field_string_add(&mut self, field: FieldId, value: String) -> bool;
    fn field_int_add(&mut self, field: FieldId, value: u32);

    /// Lets scenario tests and the demo binary downcast to the
    /// concrete in-memory sink to inspect what was recorded; a real
    /// production sink has no reason to implement more than a no-op.
    fn as_any(&self) -> &dyn std::any::Any;
}

/// An in-memory field sink that simply records everything it's given,
/// for tests and the demo binary.
#[derive(Debug, Default)]
pub struct RecordingFieldSink {
    pub tags: HashSet<&'static str>,
    pub strings: HashMap<FieldId, Vec<String>>,
    pub ints: HashMap<FieldId, Vec<u32>>,
}

impl RecordingFieldSink {
    pub fn strings_for(&self, field: FieldId) -> &[String] {
        self.strings.get(&field).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn ints_for(&self, field: FieldId) -> &[u32] {
        self.ints.get(&field).map(|v| v.as_slice()).unwrap_or(&[])
    }
}

impl FieldSink for RecordingFieldSink {
    fn add_tag(&mut self, tag: &'static str) {
        self.tags.insert(tag);
    }

    fn field_string_add(&mut self, field: FieldId, value: String) -> bool {
        let list = self.strings.entry(field).or_default();
        if list.contains(&value) {
            false
        } else {
            list.push(value);
            true
        }
    }

    fn field_int_add(&mut self, field: FieldId, value: u32) {
        self.ints.entry(field).or_default().push(value);
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// A flattened, JSON-serializable view of one session's extracted
/// fields, handed to the bulk sink at flush time.
#[derive(Debug, Clone, Serialize)]
pub struct SessionRecord {
    pub tags: Vec<String>,
    pub strings: HashMap<String, Vec<String>>,
    pub ints: HashMap<String, Vec<u32>>,
    /// Subject common names of every certificate the TLS dissector
    /// extracted (§4.6). Kept separate from `strings` because certs
    /// live in `Session::certs()`, not behind the field-sink trait.
    pub cert_subjects: Vec<String>,
}

/// The downstream output interface (§6 "Core → bulk-send sink").
/// Implementations own batching and retry policy; the core only calls
/// `bulk_send` and interprets `BulkMode` to decide how eagerly to
/// call it.
pub trait BulkSink: Send {
    fn bulk_send(&mut self, records: &[SessionRecord]);
}

/// A reference bulk sink that serializes records to JSON and emits
/// them as structured log events, standing in for the out-of-scope
/// Kafka/Netflow/Suricata/HTTP/DB plug-ins named in §1.
#[derive(Debug, Default)]
pub struct JsonLogSink {
    pub mode: BulkMode,
    pending: Vec<SessionRecord>,
}

impl JsonLogSink {
    pub fn new(mode: BulkMode) -> Self {
        JsonLogSink {
            mode,
            pending: Vec::new(),
        }
    }

    fn flush_batch(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        match serde_json::to_string(&self.pending) {
            Ok(json) => tracing::info!(target: "bulk_sink", batch_size = self.pending.len(), %json, "bulk_send"),
            Err(err) => tracing::warn!(target: "bulk_sink", %err, "failed to serialize batch"),
        }
        self.pending.clear();
    }
}

impl BulkSink for JsonLogSink {
    fn bulk_send(&mut self, records: &[SessionRecord]) {
        match self.mode {
            BulkMode::Doc => {
                for record in records {
                    self.pending.push(record.clone());
                    self.flush_batch();
                }
            }
            BulkMode::Bulk1 => {
                for record in records {
                    self.pending.push(record.clone());
                    self.flush_batch();
                }
            }
            BulkMode::Bulk => {
                self.pending.extend(records.iter().cloned());
                if self.pending.len() >= 65_535 {
                    self.flush_batch();
                }
            }
        }
    }
}

/// Builds a [`SessionRecord`] out of a closed session's attached sink,
/// if it's the in-memory reference sink. A production deployment with
/// a real field store would flush its own way instead of going
/// through this; the engine in this crate only ever wires up
/// [`RecordingFieldSink`], so this is the one conversion it needs.
pub fn session_record(session: &crate::session::Session) -> Option<SessionRecord> {
    let mut record = session.sink()?.as_any().downcast_ref::<RecordingFieldSink>().map(SessionRecord::from)?;
    record.cert_subjects = session
        .certs()
        .iter()
        .flat_map(|cert| cert.subject.common_names.iter().cloned())
        .collect();
    Some(record)
}

impl From<&RecordingFieldSink> for SessionRecord {
    fn from(sink: &RecordingFieldSink) -> Self {
        let strings = sink
            .strings
            .iter()
            .map(|(k, v)| (format!("{k:?}"), v.clone()))
            .collect();
        let ints = sink.ints.iter().map(|(k, v)| (format!("{k:?}"), v.clone())).collect();
        SessionRecord {
            tags: sink.tags.iter().map(|t| t.to_string()).collect(),
            strings,
            ints,
            cert_subjects: Vec::new(),
        }
    }
}

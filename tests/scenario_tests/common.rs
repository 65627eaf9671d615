// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::{Arc, Mutex};

use flowscope::{
    context::Context,
    engine::{Engine, SinkFactory},
    sink::{BulkSink, FieldSink, RecordingFieldSink, SessionRecord},
};

/// Collects every record handed to it instead of emitting anywhere,
/// so a scenario test can inspect what the engine flushed once a
/// session closes.
#[derive(Clone, Default)]
pub struct CapturingSink {
    records: Arc<Mutex<Vec<SessionRecord>>>,
}

impl CapturingSink {
    pub fn records(&self) -> Vec<SessionRecord> {
        self.records.lock().unwrap().clone()
    }
}

impl BulkSink for CapturingSink {
    fn bulk_send(&mut self, records: &[SessionRecord]) {
        self.records.lock().unwrap().extend_from_slice(records);
    }
}

/// Builds an [`Engine`] wired with the built-in classifiers, a fresh
/// [`RecordingFieldSink`] per session, and a [`CapturingSink`] whose
/// handle is returned alongside so the test can read back results.
pub fn test_engine() -> (Engine, CapturingSink) {
    let context = Arc::new(Context::build());
    let capture = CapturingSink::default();
    let sink_factory: SinkFactory = Arc::new(|| Box::new(RecordingFieldSink::default()) as Box<dyn FieldSink>);
    let engine = Engine::new(context, 1000, sink_factory, Box::new(capture.clone()));
    (engine, capture)
}

pub fn record_strings<'a>(record: &'a SessionRecord, field: &str) -> &'a [String] {
    record.strings.get(field).map(|v| v.as_slice()).unwrap_or(&[])
}

pub fn record_ints<'a>(record: &'a SessionRecord, field: &str) -> &'a [u32] {
    record.ints.get(field).map(|v| v.as_slice()).unwrap_or(&[])
}

// SPDX-License-Identifier: AGPL-3.0-or-later

//! The engine (§5, §10.5): owns one tokio task per live session, fed
//! through a `DashMap<SessionId, mpsc::Sender<Chunk>>`. Each session
//! task owns its `Session` exclusively and processes chunks strictly
//! in arrival order, so the single-threaded-per-session invariant
//! holds without any lock inside a `Session`.

use std::sync::{Arc, atomic::{AtomicU64, Ordering}};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::{
    context::Context,
    session::{Direction, Session},
    sink::{BulkSink, FieldSink},
};

pub type SessionId = u64;

/// One chunk of reassembled bytes arriving on a session, tagged with
/// transport and direction so the session task can run the classifier
/// on its first chunk per direction (§4.4).
pub struct Chunk {
    pub data: Vec<u8>,
    pub which: Direction,
    pub src_port: u16,
    pub dst_port: u16,
    pub transport: Transport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Tcp,
    Udp,
    Sctp { payload_protocol_id: u32 },
}

/// A session's externally visible handle: a channel to push chunks
/// into its dedicated task, plus the task's join handle so closing a
/// session can wait for its final flush to the bulk sink.
struct SessionHandle {
    tx: mpsc::Sender<Chunk>,
    task: tokio::task::JoinHandle<()>,
}

/// Creates the field sink and bulk sink for a new session; kept as a
/// factory so tests can plug in `RecordingFieldSink` while production
/// wiring plugs in whatever real store/transport is configured.
pub type SinkFactory = Arc<dyn Fn() -> Box<dyn FieldSink> + Send + Sync>;

pub struct Engine {
    context: Arc<Context>,
    sessions: DashMap<SessionId, SessionHandle>,
    next_id: AtomicU64,
    max_sessions: u32,
    sink_factory: SinkFactory,
    bulk: Arc<tokio::sync::Mutex<Box<dyn BulkSink>>>,
}

impl Engine {
    pub fn new(context: Arc<Context>, max_sessions: u32, sink_factory: SinkFactory, bulk: Box<dyn BulkSink>) -> Self {
        Engine {
            context,
            sessions: DashMap::new(),
            next_id: AtomicU64::new(1),
            max_sessions,
            sink_factory,
            bulk: Arc::new(tokio::sync::Mutex::new(bulk)),
        }
    }

    /// Spawns a new session task, classifying nothing yet — the first
    /// chunk on each direction runs the classifier per §4.4.
    pub fn open_session(&self) -> SessionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if self.sessions.len() as u32 >= self.max_sessions {
            warn!(max_sessions = self.max_sessions, "session table full, dropping new session");
            return id;
        }
        let (tx, mut rx) = mpsc::channel::<Chunk>(256);
        let sink = (self.sink_factory)();
        let context = self.context.clone();
        let bulk = self.bulk.clone();
        let task = tokio::spawn(async move {
            let mut session = Session::new(sink);
            let mut classified = [false, false];
            while let Some(chunk) = rx.recv().await {
                let idx = chunk.which.index();
                let is_dns = chunk.transport == Transport::Udp && (chunk.src_port == 53 || chunk.dst_port == 53);
                if is_dns {
                    // DNS is one self-contained message per datagram, not a
                    // stream a parser attaches to, so it runs on every
                    // chunk rather than only the first per direction.
                    if !chunk.data.is_empty() {
                        session.dissect_dns(&chunk.data);
                    }
                    continue;
                }
                if !classified[idx] && !chunk.data.is_empty() {
                    classified[idx] = true;
                    match chunk.transport {
                        Transport::Tcp => context.classifiers.classify_tcp(&mut session, &chunk.data, chunk.which, chunk.src_port, chunk.dst_port),
                        Transport::Udp => context.classifiers.classify_udp(&mut session, &chunk.data, chunk.which, chunk.src_port, chunk.dst_port),
                        Transport::Sctp { payload_protocol_id } => context
                            .classifiers
                            .classify_sctp(&mut session, &chunk.data, chunk.which, chunk.src_port, chunk.dst_port, payload_protocol_id),
                    }
                }
                let skip = session.take_skip(chunk.which);
                let data = if skip >= chunk.data.len() { &[][..] } else { &chunk.data[skip..] };
                session.dispatch(data, chunk.which);
            }
            session.save(true);
            session.close();
            let record = crate::sink::session_record(&session);
            if let Some(record) = record {
                bulk.lock().await.bulk_send(&[record]);
            }
        });
        self.sessions.insert(id, SessionHandle { tx, task });
        info!(session_id = id, "session opened");
        id
    }

    /// Feeds one chunk to an open session. No-ops if the session was
    /// never opened or its task has already exited.
    pub async fn dispatch(&self, id: SessionId, chunk: Chunk) {
        let tx = self.sessions.get(&id).map(|h| h.tx.clone());
        if let Some(tx) = tx {
            let _ = tx.send(chunk).await;
        }
    }

    /// Drops the sender, then waits for the session task to drain its
    /// queue, classify, dispatch, and flush its record to the bulk
    /// sink before returning.
    pub async fn close_session(&self, id: SessionId) {
        if let Some((_, handle)) = self.sessions.remove(&id) {
            drop(handle.tx);
            let _ = handle.task.await;
        }
    }
}

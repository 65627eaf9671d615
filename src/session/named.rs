// SPDX-License-Identifier: AGPL-3.0-or-later

//! The named-callback registry (§4.5): cross-parser extensibility via
//! a string-named, small-integer-keyed dispatch table with an O(1)
//! "anything registered?" check.
//!
//! Grounded on `ArkimeNamedFunc_t`/`namedFuncsArr`/the has-any-func
//! bitmask in the original `parsers.c`. The union of two
//! function-pointer shapes there becomes a two-variant enum here
//! (Design Notes §9) instead of a null-sentinel check on a second
//! pointer.

use std::{collections::HashMap, sync::Arc};

use crate::session::{Direction, Session};

/// Maximum number of distinct named ids; matches the 64-bit
/// "has any callback" mask.
pub const MAX_NAMED_FUNCS: usize = 64;

type BasicFn = Arc<dyn Fn(&mut Session, &[u8], Direction) + Send + Sync>;
type KeyedFn = Arc<dyn Fn(&mut Session, &[u8], Direction, u32) + Send + Sync>;

/// The two call shapes a named callback can take: a plain per-chunk
/// callback, or one parameterized with an extra caller-supplied key
/// (e.g. the sub-protocol id of an outer framing parser).
#[derive(Clone)]
pub enum NamedCallback {
    Basic(BasicFn),
    Keyed(KeyedFn, u32),
}

impl NamedCallback {
    fn call(&self, session: &mut Session, data: &[u8], which: Direction) {
        match self {
            NamedCallback::Basic(f) => f(session, data, which),
            NamedCallback::Keyed(f, key) => f(session, data, which, *key),
        }
    }
}

/// Registration-time-write, steady-state-read dispatch table built
/// once before the engine starts accepting sessions (§5).
#[derive(Default)]
pub struct NamedRegistry {
    ids: HashMap<&'static str, u8>,
    callbacks: Vec<Vec<NamedCallback>>,
    mask: u64,
}

impl NamedRegistry {
    pub fn new() -> Self {
        NamedRegistry {
            ids: HashMap::new(),
            callbacks: Vec::new(),
            mask: 0,
        }
    }

    /// Allocate (or look up) the small id for `name`. Ids persist for
    /// the lifetime of the registry.
    pub fn named_id(&mut self, name: &'static str) -> u8 {
        if let Some(&id) = self.ids.get(name) {
            return id;
        }
        let id = self.callbacks.len() as u8;
        assert!((id as usize) < MAX_NAMED_FUNCS, "named callback id space exhausted");
        self.ids.insert(name, id);
        self.callbacks.push(Vec::new());
        id
    }

    /// Append a callback under `name`'s id, allocating the id if
    /// needed, and set the corresponding mask bit.
    pub fn named_add(&mut self, name: &'static str, cb: NamedCallback) {
        let id = self.named_id(name);
        self.callbacks[id as usize].push(cb);
        self.mask |= 1u64 << id;
    }

    pub fn has_named_func(&self, id: u8) -> bool {
        self.mask & (1u64 << id) != 0
    }

    /// O(1) return if nothing is installed for `id`; otherwise run
    /// every registered callback in registration order.
    pub fn named_call(&self, id: u8, session: &mut Session, data: &[u8], which: Direction) {
        if !self.has_named_func(id) {
            return;
        }
        if let Some(list) = self.callbacks.get(id as usize) {
            for cb in list {
                cb.call(session, data, which);
            }
        }
    }
}

/// A sub-parser registry mapping `(parser_name, key) -> callback`, for
/// protocols that dispatch an inner payload by a small opaque key
/// (e.g. an outer framing parser handing off by a type byte).
#[derive(Default)]
pub struct SubParserRegistry {
    table: HashMap<(&'static str, u32), BasicFn>,
}

impl SubParserRegistry {
    pub fn new() -> Self {
        SubParserRegistry { table: HashMap::new() }
    }

    pub fn register(&mut self, parser_name: &'static str, key: u32, cb: BasicFn) {
        self.table.insert((parser_name, key), cb);
    }

    pub fn dispatch(&self, parser_name: &'static str, key: u32, session: &mut Session, data: &[u8], which: Direction) -> bool {
        if let Some(cb) = self.table.get(&(parser_name, key)) {
            cb(session, data, which);
            true
        } else {
            false
        }
    }
}

// SPDX-License-Identifier: AGPL-3.0-or-later

//! The process-wide, build-once context: classifier dispatch tables
//! plus the named-callback/sub-parser registries, shared read-only
//! across every session task behind an `Arc` (§5).

use crate::{classify::ClassifierTables, session::named::NamedRegistry};

/// Immutable once built. Registration happens entirely inside
/// [`Context::build`], before the engine accepts its first session;
/// there is no interior mutability here because nothing after startup
/// ever needs to write to it.
pub struct Context {
    pub classifiers: ClassifierTables,
    pub named: NamedRegistry,
}

impl Context {
    /// Registers the built-in classifiers and named callbacks, and
    /// returns the finished, read-only context.
    pub fn build() -> Self {
        let mut classifiers = ClassifierTables::new();
        crate::classify::register_builtins(&mut classifiers);
        Context {
            classifiers,
            named: NamedRegistry::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_registers_builtin_classifiers() {
        let ctx = Context::build();
        let mut session = crate::session::Session::new(Box::new(crate::sink::RecordingFieldSink::default()));
        ctx.classifiers.classify_tcp(
            &mut session,
            &[0x16, 0x03, 0x03, 0x00, 0x10, 0x02],
            crate::session::Direction::Responder,
            443,
            51234,
        );
    }
}

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

/// Byte-safe buffer primitives shared across the dissectors (C1).
pub mod buf;
/// A minimal ASN.1 DER reader used by the TLS certificate dissector (C2).
pub mod asn1;
/// Content-type detection combining a built-in magic table with an
/// optional external typer (C3).
pub mod typer;
/// The classifier: port, byte, and protocol-id dispatch tables run
/// once per session direction (C4).
pub mod classify;
/// The dissector framework: `Session`, its parser slots, and the
/// shared field/type vocabulary (C5).
pub mod session;
/// Per-protocol dissectors (C6-C10): TLS certificates, SMTP/email,
/// DNS, SMB, and SOCKS.
pub mod dissect;
/// The field sink and bulk-send sink interfaces, plus reference
/// in-memory implementations.
pub mod sink;
/// Configuration, command-line parsing, and logging.
pub mod cfg;
/// The process-wide, build-once context shared across session tasks.
pub mod context;
/// The session engine: one tokio task per live session.
pub mod engine;
/// Small free functions shared by more than one dissector.
pub mod utils;

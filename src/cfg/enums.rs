// SPDX-License-Identifier: AGPL-3.0-or-later

use core::fmt;

use serde::{Deserialize, Serialize};

/// Bulk-send sink batching mode (§6/§10.2).
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BulkMode {
    /// JSON-encoded session records batched, ≤ 65,535 records per call.
    #[default]
    #[serde(rename = "bulk")]
    Bulk,
    /// Batches of 1.
    #[serde(rename = "bulk1")]
    Bulk1,
    /// Non-batched, document mode.
    #[serde(rename = "doc")]
    Doc,
}

impl fmt::Display for BulkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BulkMode::Bulk => "bulk",
            BulkMode::Bulk1 => "bulk1",
            BulkMode::Doc => "doc",
        })
    }
}

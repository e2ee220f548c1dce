// SPDX-License-Identifier: Apache-2.0

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;

use crate::identity::FileIdentity;

/// A single line read from a source, produced exactly once per byte range
/// per harvester instance. After a restart the same range may be re-emitted;
/// delivery is at-least-once.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    /// Path the line was read from.
    pub source: PathBuf,
    /// Byte position of the start of this line.
    pub offset: u64,
    /// Bytes consumed by this line including its terminator.
    pub consumed: u64,
    /// 1-based line number within this harvester instance.
    pub line: u64,
    /// Line content with the terminator stripped.
    pub text: String,
    /// Read time.
    pub timestamp: DateTime<Utc>,
    /// Identity of the underlying file. `None` marks a non-persistable
    /// source (stdin); the registrar never records such events.
    pub identity: Option<FileIdentity>,
}

impl Event {
    /// The byte position to resume from once this event is durably forwarded.
    pub fn next_offset(&self) -> u64 {
        self.offset + self.consumed
    }

    /// Whether this event may be recorded in the registry.
    pub fn is_persistable(&self) -> bool {
        self.identity.is_some()
    }
}

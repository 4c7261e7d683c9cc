//! Scanner checkpoint model.
//!
//! A checkpoint is the durable cursor of one `(chain, event)` scanner. The
//! cursor is ledger-native: a block number on EVM chains, a timestamp on
//! ledgers with paged history APIs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ChainId, EventKind};

/// Durable position of an event scanner.
///
/// `last_scan` never decreases; it is persisted only after a whole window
/// has been handled, so a crash re-delivers at most that window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub chain: ChainId,
    pub event: EventKind,
    pub last_scan: u64,
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    #[must_use]
    pub fn new(chain: ChainId, event: EventKind, last_scan: u64) -> Self {
        Self {
            chain,
            event,
            last_scan,
            updated_at: Utc::now(),
        }
    }

    /// Move the cursor forward. Returns `false` (and leaves the cursor alone)
    /// if `cursor` would move it backwards.
    pub fn advance(&mut self, cursor: u64) -> bool {
        if cursor < self.last_scan {
            return false;
        }
        self.last_scan = cursor;
        self.updated_at = Utc::now();
        true
    }
}

/// One bounded fetch issued by a scanner.
///
/// `from` and `to` are inclusive cursors. `limit` is set only for paged
/// history APIs, where `to` is the safe frontier rather than a window end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRange {
    pub from: u64,
    pub to: u64,
    pub limit: Option<u64>,
}

impl ScanRange {
    #[must_use]
    pub fn blocks(from: u64, to: u64) -> Self {
        Self {
            from,
            to,
            limit: None,
        }
    }

    #[must_use]
    pub fn page(from: u64, to: u64, limit: u64) -> Self {
        Self {
            from,
            to,
            limit: Some(limit),
        }
    }

    #[must_use]
    pub fn contains(&self, cursor: u64) -> bool {
        cursor >= self.from && cursor <= self.to
    }
}

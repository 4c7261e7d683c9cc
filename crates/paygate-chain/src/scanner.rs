//! Incremental, checkpointed event scanner.
//!
//! One scanner runs per `(chain, event kind)`. Each cycle:
//!
//! 1. `safe = head - confirmations`
//! 2. resume from the stored checkpoint (or the chain's genesis cursor)
//! 3. fetch bounded windows in increasing order, hand every event to the
//!    dispatcher in ledger order, persist the checkpoint after each window
//!
//! A handler error aborts the cycle *before* the checkpoint moves, so the
//! window is delivered again. Delivery is at-least-once; consumers dedupe.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use paygate_store::CheckpointStore;
use paygate_types::{ChainEvent, ChainId, EventKind, Result, ScanMode, ScanRange};

use crate::adapter::{ChainAdapter, ScanSettings};
use crate::registry::EventDispatcher;

/// Summary of one scan cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CycleReport {
    /// Events handed to the dispatcher.
    pub events: usize,
    /// Checkpoint after the cycle, if one exists.
    pub checkpoint: Option<u64>,
}

pub struct EventScanner {
    adapter: Arc<dyn ChainAdapter>,
    kind: EventKind,
    checkpoints: Arc<dyn CheckpointStore>,
    dispatcher: Arc<EventDispatcher>,
    settings: ScanSettings,
    chain: ChainId,
}

impl EventScanner {
    pub fn new(
        adapter: Arc<dyn ChainAdapter>,
        kind: EventKind,
        checkpoints: Arc<dyn CheckpointStore>,
        dispatcher: Arc<EventDispatcher>,
    ) -> Self {
        let settings = adapter.scan_settings();
        let chain = adapter.chain_id().clone();
        Self {
            adapter,
            kind,
            checkpoints,
            dispatcher,
            settings,
            chain,
        }
    }

    /// Scan forever: one cycle, then sleep for the configured interval.
    /// Cycle errors are logged and the loop carries on; only `cancel` ends it.
    pub async fn run(self, cancel: CancellationToken) {
        info!(chain = %self.chain, event = %self.kind, "event scanner started");
        loop {
            match self.scan_once(&cancel).await {
                Ok(report) if report.events > 0 => {
                    debug!(
                        chain = %self.chain,
                        event = %self.kind,
                        events = report.events,
                        checkpoint = ?report.checkpoint,
                        "scan cycle complete"
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(chain = %self.chain, event = %self.kind, error = %e, "scan cycle failed");
                }
            }
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(self.settings.interval) => {}
            }
        }
        info!(chain = %self.chain, event = %self.kind, "event scanner stopped");
    }

    /// Run one cycle. Stops early (with the checkpoint consistent) once
    /// `cancel` fires between windows.
    pub async fn scan_once(&self, cancel: &CancellationToken) -> Result<CycleReport> {
        let head = self.adapter.head().await?;
        let safe = head.saturating_sub(self.settings.confirmations);
        let stored = self
            .checkpoints
            .load_checkpoint(&self.chain, self.kind)
            .await?
            .map(|cp| cp.last_scan);

        match self.settings.mode {
            ScanMode::BlockRange => self.scan_blocks(stored, safe, cancel).await,
            ScanMode::Paged => self.scan_pages(stored, safe, cancel).await,
        }
    }

    /// Fixed block windows `[next, min(next + window - 1, safe)]`. The
    /// checkpoint is the last block fully handled.
    async fn scan_blocks(
        &self,
        stored: Option<u64>,
        safe: u64,
        cancel: &CancellationToken,
    ) -> Result<CycleReport> {
        let mut next = stored.map_or(self.settings.genesis, |last| last + 1);
        let mut report = CycleReport {
            events: 0,
            checkpoint: stored,
        };

        while next <= safe && !cancel.is_cancelled() {
            let to = next
                .saturating_add(self.settings.window.saturating_sub(1))
                .min(safe);
            let events = self
                .adapter
                .fetch_events(self.kind, ScanRange::blocks(next, to))
                .await?;
            debug!(
                chain = %self.chain,
                event = %self.kind,
                from = next,
                to,
                found = events.len(),
                "window fetched"
            );

            let empty = events.is_empty();
            self.deliver(&events).await?;
            report.events += events.len();
            report.checkpoint = Some(self.save(to).await?);
            if empty {
                break;
            }
            next = to + 1;
        }
        Ok(report)
    }

    /// Pages of at most `window` events with cursor `>=` the checkpoint. The
    /// checkpoint is the highest cursor seen, so events sharing that cursor
    /// are delivered again next cycle.
    async fn scan_pages(
        &self,
        stored: Option<u64>,
        safe: u64,
        cancel: &CancellationToken,
    ) -> Result<CycleReport> {
        let mut cursor = stored.unwrap_or(self.settings.genesis);
        let mut report = CycleReport {
            events: 0,
            checkpoint: stored,
        };

        while cursor <= safe && !cancel.is_cancelled() {
            let page = self.settings.window;
            let events = self
                .adapter
                .fetch_events(self.kind, ScanRange::page(cursor, safe, page))
                .await?;
            if events.is_empty() {
                break;
            }
            self.deliver(&events).await?;
            report.events += events.len();

            let full = u64::try_from(events.len()).unwrap_or(u64::MAX) >= page;
            let highest = events.iter().map(|e| e.cursor).max().unwrap_or(cursor);
            let advanced = if highest > cursor {
                highest
            } else if full {
                // A whole page at one cursor: step past it or never progress.
                warn!(
                    chain = %self.chain,
                    event = %self.kind,
                    cursor,
                    "page filled by a single cursor, skipping ahead"
                );
                cursor + 1
            } else {
                cursor
            };
            report.checkpoint = Some(self.save(advanced).await?);
            if !full {
                break;
            }
            cursor = advanced;
        }
        Ok(report)
    }

    async fn deliver(&self, events: &[ChainEvent]) -> Result<()> {
        for event in events {
            self.dispatcher.dispatch(event).await?;
        }
        Ok(())
    }

    async fn save(&self, cursor: u64) -> Result<u64> {
        let stored = self
            .checkpoints
            .save_checkpoint(&self.chain, self.kind, cursor)
            .await?;
        debug!(chain = %self.chain, event = %self.kind, checkpoint = stored, "checkpoint advanced");
        Ok(stored)
    }
}

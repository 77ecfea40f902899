use alloy_primitives::Address;
use tracing::{debug, info};

use crate::scanner::range::{BlockRange, EventBatchResult};

/// Why a holder candidate was kept or dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CandidateOutcome {
    Holder,
    Contract,
    ZeroBalance,
}

/// Progress notifications for an external display
#[derive(Debug)]
pub enum Progress<'a> {
    BatchScanned {
        event: &'a str,
        batch: &'a EventBatchResult,
        range: BlockRange,
    },
    CandidateChecked {
        address: Address,
        outcome: CandidateOutcome,
        checked: usize,
        total: usize,
    },
}

/// Receives progress notifications. Correctness never depends on them.
pub trait ProgressSink: Send + Sync {
    fn notify(&self, progress: Progress<'_>);
}

pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn notify(&self, _progress: Progress<'_>) {}
}

/// Reports progress through tracing
pub struct TracingProgress;

impl ProgressSink for TracingProgress {
    fn notify(&self, progress: Progress<'_>) {
        match progress {
            Progress::BatchScanned { event, batch, range } => {
                let done = batch.range.to_block - range.from_block + 1;
                if batch.events.is_empty() {
                    debug!(
                        "{}: scanned {}..={} ({}/{} blocks)",
                        event,
                        batch.range.from_block,
                        batch.range.to_block,
                        done,
                        range.block_count()
                    );
                } else {
                    info!(
                        "🔎 {}: found {} events in {}..={} ({}/{} blocks)",
                        event,
                        batch.events.len(),
                        batch.range.from_block,
                        batch.range.to_block,
                        done,
                        range.block_count()
                    );
                }
            }
            Progress::CandidateChecked {
                address,
                outcome,
                checked,
                total,
            } => {
                debug!("[{}/{}] {} -> {:?}", checked, total, address, outcome);
                if checked % 100 == 0 || checked == total {
                    info!("📊 Checked {}/{} candidate addresses", checked, total);
                }
            }
        }
    }
}

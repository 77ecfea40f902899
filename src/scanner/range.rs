use futures::stream::{self, StreamExt, TryStreamExt};
use std::sync::Arc;
use tracing::{info, instrument};

use crate::chain::provider::{ChainProvider, EventDescriptor, LogEntry};
use crate::chain::retry::{retry_call, RetryPolicy};
use crate::error::{AppResult, ConfigError};
use crate::scanner::progress::{Progress, ProgressSink};

/// Inclusive block range, `from_block <= to_block`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRange {
    pub from_block: u64,
    pub to_block: u64,
}

impl BlockRange {
    pub fn new(from_block: u64, to_block: u64) -> AppResult<Self> {
        if to_block < from_block {
            return Err(ConfigError::InvalidBlockRange {
                from_block,
                to_block,
            }
            .into());
        }
        Ok(Self {
            from_block,
            to_block,
        })
    }

    pub fn block_count(&self) -> u64 {
        (self.to_block - self.from_block).saturating_add(1)
    }

    /// Consecutive sub-ranges of at most `batch_size` blocks covering the range
    pub fn split(&self, batch_size: u64) -> Vec<BlockRange> {
        let batch_size = batch_size.max(1);
        let mut batches = Vec::new();
        let mut start = self.from_block;
        loop {
            let end = start.saturating_add(batch_size - 1).min(self.to_block);
            batches.push(BlockRange {
                from_block: start,
                to_block: end,
            });
            if end >= self.to_block {
                break;
            }
            start = end + 1;
        }
        batches
    }
}

/// Events fetched for one sub-range, in node order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventBatchResult {
    pub range: BlockRange,
    pub events: Vec<LogEntry>,
}

/// Fetches every occurrence of an event over a block range in bounded batches
pub struct RangeEventScanner {
    provider: Arc<dyn ChainProvider>,
    retry: RetryPolicy,
    batch_size: u64,
    concurrency: usize,
}

impl RangeEventScanner {
    pub fn new(provider: Arc<dyn ChainProvider>, retry: RetryPolicy, batch_size: u64) -> Self {
        Self {
            provider,
            retry,
            batch_size: batch_size.max(1),
            concurrency: 1,
        }
    }

    /// Number of batches fetched at once; results are still returned in block order
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    async fn fetch_batch(&self, event: &EventDescriptor, batch: BlockRange) -> AppResult<EventBatchResult> {
        let filter = event.filter(batch.from_block, batch.to_block);
        let label = format!(
            "getLogs({} {}..={})",
            event.name, batch.from_block, batch.to_block
        );
        let events = retry_call(&self.retry, &label, || self.provider.get_logs(&filter)).await?;
        Ok(EventBatchResult {
            range: batch,
            events,
        })
    }

    /// All matching logs in `[from_block, to_block]`, as if fetched in one call.
    ///
    /// Either the complete result or an error; never a truncated list.
    #[instrument(skip(self, event, progress), fields(event = %event.name))]
    pub async fn scan(
        &self,
        event: &EventDescriptor,
        from_block: u64,
        to_block: u64,
        progress: &dyn ProgressSink,
    ) -> AppResult<Vec<LogEntry>> {
        let range = BlockRange::new(from_block, to_block)?;
        let batches = range.split(self.batch_size);
        info!(
            "Fetching {} events from {} to {} in {} batches of up to {} blocks",
            event.name,
            from_block,
            to_block,
            batches.len(),
            self.batch_size
        );

        let events = stream::iter(batches)
            .map(|batch| self.fetch_batch(event, batch))
            .buffered(self.concurrency)
            .try_fold(Vec::new(), |mut events, batch| {
                progress.notify(Progress::BatchScanned {
                    event: &event.name,
                    batch: &batch,
                    range,
                });
                events.extend(batch.events);
                async move { Ok(events) }
            })
            .await?;

        info!("Found {} {} events in total", events.len(), event.name);
        Ok(events)
    }
}

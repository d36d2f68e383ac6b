//! Batch processor: chunked processing inside a workflow.
//!
//! Each chunk runs as its own memoized step (`{label}-batch-{n}`), followed by
//! a sleep step (`{label}-delay-{n}`) before the next chunk. Item failures
//! are isolated: they are collected in the chunk report and never fail the
//! step. A resumed run replays committed chunks from their reports and
//! continues with the first unfinished one.

use std::future::Future;
use std::time::Duration;

use classdesk_types::error::ErrorCategory;
use classdesk_types::workflow::StepFailure;
use serde::{Deserialize, Serialize};

use super::context::{StepContext, StepError};
use crate::repository::workflow::WorkflowRepository;

/// An item that can be identified in failure reports.
pub trait BatchItem {
    fn key(&self) -> String;
}

/// A single item that failed within a chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemFailure {
    pub key: String,
    pub message: String,
    pub category: ErrorCategory,
}

/// Memoized result of one chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    /// 1-based chunk number.
    pub batch: usize,
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    #[serde(default)]
    pub failures: Vec<ItemFailure>,
}

/// Cumulative counts reported after each chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchProgress {
    pub batch: usize,
    pub batches: usize,
    pub total: usize,
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Totals over all chunks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchSummary {
    pub batches: usize,
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub failures: Vec<ItemFailure>,
}

impl BatchSummary {
    fn absorb(&mut self, report: BatchReport) {
        self.batches += 1;
        self.processed += report.processed;
        self.succeeded += report.succeeded;
        self.failed += report.failed;
        self.failures.extend(report.failures);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BatchProcessor {
    batch_size: usize,
    delay: Duration,
}

impl BatchProcessor {
    pub fn new(batch_size: usize, delay: Duration) -> Self {
        Self {
            batch_size: batch_size.max(1),
            delay,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Split `items` into consecutive chunks of at most `batch_size`.
    pub fn partition<'a, T>(&self, items: &'a [T]) -> Vec<&'a [T]> {
        items.chunks(self.batch_size).collect()
    }

    /// Number of chunks `len` items split into.
    pub fn batch_count(&self, len: usize) -> usize {
        len.div_ceil(self.batch_size)
    }

    /// Process `items` chunk by chunk.
    ///
    /// `per_item` handles one item; its failure is recorded against the item.
    /// `on_progress` runs inside the chunk step with cumulative counts, so
    /// persisted progress and the chunk record commit together.
    pub async fn process<R, T, F, Fut, P, PFut>(
        &self,
        ctx: &StepContext<R>,
        label: &str,
        items: &[T],
        per_item: F,
        on_progress: P,
    ) -> Result<BatchSummary, StepError>
    where
        R: WorkflowRepository,
        T: BatchItem + Sync,
        F: Fn(&T) -> Fut + Sync,
        Fut: Future<Output = Result<(), StepFailure>> + Send,
        P: Fn(BatchProgress) -> PFut + Sync,
        PFut: Future<Output = Result<(), StepFailure>> + Send,
    {
        let batches = self.batch_count(items.len());
        let mut summary = BatchSummary::default();

        for (index, chunk) in self.partition(items).into_iter().enumerate() {
            let batch = index + 1;
            let before = (summary.processed, summary.succeeded, summary.failed);
            let per_item = &per_item;
            let on_progress = &on_progress;

            let report: BatchReport = ctx
                .run(&format!("{label}-batch-{batch}"), || async move {
                    let mut report = BatchReport {
                        batch,
                        processed: 0,
                        succeeded: 0,
                        failed: 0,
                        failures: Vec::new(),
                    };

                    for item in chunk {
                        report.processed += 1;
                        match per_item(item).await {
                            Ok(()) => report.succeeded += 1,
                            Err(failure) => {
                                tracing::warn!(
                                    batch,
                                    item = %item.key(),
                                    category = %failure.category,
                                    error = %failure.message,
                                    "batch item failed"
                                );
                                report.failed += 1;
                                report.failures.push(ItemFailure {
                                    key: item.key(),
                                    message: failure.message,
                                    category: failure.category,
                                });
                            }
                        }
                    }

                    on_progress(BatchProgress {
                        batch,
                        batches,
                        total: items.len(),
                        processed: before.0 + report.processed,
                        succeeded: before.1 + report.succeeded,
                        failed: before.2 + report.failed,
                    })
                    .await?;

                    Ok(report)
                })
                .await?;

            tracing::debug!(
                run_id = %ctx.run_id(),
                label,
                batch,
                batches,
                succeeded = report.succeeded,
                failed = report.failed,
                "batch done"
            );
            summary.absorb(report);

            if batch < batches && !self.delay.is_zero() {
                ctx.sleep(&format!("{label}-delay-{batch}"), self.delay).await?;
            }
        }

        Ok(summary)
    }
}

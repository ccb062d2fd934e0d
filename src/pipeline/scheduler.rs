//! Bounded-concurrency scheduling of batch items.
//!
//! Items run on their own tasks with at most `concurrency` in flight. They
//! complete in any order; results are reassembled into input order and
//! published to an optional progress channel as a contiguous prefix.

use futures::stream::{self, StreamExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::item_worker::ItemWorker;
use crate::models::batch::BatchItem;
use crate::models::job::ItemResult;

/// Progress published while a batch runs.
#[derive(Debug, Clone)]
pub enum Progress {
    /// An item finished; `index` is its position in the batch.
    ItemFinished { index: usize },
    /// The next result in batch order is ready. Emitted strictly in order.
    InOrder(ItemResult),
}

pub struct BatchScheduler {
    worker: Arc<ItemWorker>,
}

impl BatchScheduler {
    pub fn new(worker: Arc<ItemWorker>) -> Self {
        Self { worker }
    }

    /// Run every item with at most `concurrency` in flight.
    ///
    /// An item whose task panics or is cancelled becomes a `Failed` item
    /// result; siblings keep running. The returned sequence matches the
    /// input order.
    pub async fn run(
        &self,
        items: Vec<BatchItem>,
        concurrency: usize,
        progress: Option<mpsc::UnboundedSender<Progress>>,
    ) -> Result<Vec<ItemResult>, SchedulerError> {
        let total = items.len();
        let concurrency = concurrency.max(1);

        tracing::info!(items = total, concurrency, "Scheduling batch items");

        let mut pending: BTreeMap<usize, ItemResult> = BTreeMap::new();
        let mut ordered: Vec<ItemResult> = Vec::with_capacity(total);

        let mut completions = stream::iter(items.into_iter().enumerate())
            .map(|(index, item)| {
                let worker = self.worker.clone();
                let name = item.name.clone();
                async move {
                    let mut task =
                        AbortOnDrop(tokio::spawn(async move { worker.process(item).await }));
                    let outcome = (&mut task.0).await;
                    let result = outcome.unwrap_or_else(|e| {
                        tracing::error!(item = %name, error = %e, "Item task aborted");
                        ItemResult::faulted(name, format!("internal fault: {e}"))
                    });
                    (index, result)
                }
            })
            .buffer_unordered(concurrency);

        while let Some((index, result)) = completions.next().await {
            if index >= total || pending.insert(index, result).is_some() {
                return Err(SchedulerError::DuplicateResult { index });
            }
            publish(&progress, Progress::ItemFinished { index });

            // Release the contiguous run now available at the head.
            while let Some(next) = pending.remove(&ordered.len()) {
                publish(&progress, Progress::InOrder(next.clone()));
                ordered.push(next);
            }
        }

        if ordered.len() != total {
            return Err(SchedulerError::Incomplete {
                expected: total,
                got: ordered.len(),
            });
        }

        Ok(ordered)
    }
}

/// Aborts the item task if the batch future is dropped (job cancelled), so
/// abandoned work does not keep running.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn publish(progress: &Option<mpsc::UnboundedSender<Progress>>, event: Progress) {
    if let Some(tx) = progress {
        // A dropped receiver only means nobody is watching.
        let _ = tx.send(event);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Item {index} reported more than once")]
    DuplicateResult { index: usize },

    #[error("Batch finished with {got} of {expected} item results")]
    Incomplete { expected: usize, got: usize },
}

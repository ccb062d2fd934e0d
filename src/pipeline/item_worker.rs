use futures::stream::{self, StreamExt};
use std::sync::Arc;

use crate::models::batch::BatchItem;
use crate::models::job::{ImageResult, ItemResult, Stage};
use crate::services::fetcher::Fetcher;
use crate::services::retry::RetryPolicy;
use crate::services::storage::{ArtifactSink, StoreError};
use crate::services::transformer::Transformer;

/// Runs fetch → transform → store for every reference of one batch item.
pub struct ItemWorker {
    fetcher: Arc<dyn Fetcher>,
    transformer: Transformer,
    sink: Arc<dyn ArtifactSink>,
    store_retry: RetryPolicy,
    /// Max references of one item in flight at once.
    item_concurrency: usize,
}

impl ItemWorker {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        transformer: Transformer,
        sink: Arc<dyn ArtifactSink>,
        store_retry: RetryPolicy,
        item_concurrency: usize,
    ) -> Self {
        Self {
            fetcher,
            transformer,
            sink,
            store_retry,
            item_concurrency: item_concurrency.max(1),
        }
    }

    /// Process every reference of `item`.
    ///
    /// References are independent: a failure is recorded in its own
    /// `ImageResult` and never stops its siblings. `results` follows the
    /// order of `image_refs` regardless of completion order.
    pub async fn process(&self, item: BatchItem) -> ItemResult {
        let BatchItem { name, image_refs } = item;

        let results: Vec<ImageResult> = stream::iter(image_refs)
            .map(|reference| self.process_reference(reference))
            .buffered(self.item_concurrency)
            .collect()
            .await;

        let result = ItemResult::from_results(name, results);
        tracing::debug!(
            item = %result.name,
            outcome = %result.outcome,
            images = result.results.len(),
            "Item processed"
        );
        result
    }

    async fn process_reference(&self, reference: String) -> ImageResult {
        let raw = match self.fetcher.fetch(&reference).await {
            Ok(bytes) => bytes,
            Err(e) => return self.failed(reference, Stage::Fetch, e),
        };
        let raw_len = raw.len();

        let compressed = match self.transformer.transform_blocking(raw).await {
            Ok(bytes) => bytes,
            Err(e) => return self.failed(reference, Stage::Transform, e),
        };
        let compressed_len = compressed.len();

        let stored = self
            .store_retry
            .run(
                "artifact_put",
                || self.sink.put(&compressed),
                StoreError::is_retryable,
            )
            .await;

        match stored {
            Ok(location) => {
                metrics::counter!("batch_images_processed_total", "outcome" => "success")
                    .increment(1);
                metrics::histogram!("batch_image_bytes_saved")
                    .record(raw_len.saturating_sub(compressed_len) as f64);
                tracing::debug!(
                    reference = %reference,
                    location = %location,
                    raw_bytes = raw_len,
                    compressed_bytes = compressed_len,
                    "Image stored"
                );
                ImageResult::success(reference, location)
            }
            Err(e) => self.failed(reference, Stage::Store, e),
        }
    }

    fn failed(&self, reference: String, stage: Stage, error: impl std::fmt::Display) -> ImageResult {
        metrics::counter!("batch_images_processed_total", "outcome" => "failure").increment(1);
        tracing::warn!(reference = %reference, stage = %stage, error = %error, "Image failed");
        ImageResult::failure(reference, stage, error)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use async_trait::async_trait;
    use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};
    use std::collections::HashMap;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use crate::services::fetcher::{FetchError, Fetcher};
    use crate::services::storage::{ArtifactSink, StoreError};

    pub fn png_bytes(seed: u8) -> Vec<u8> {
        let img = ImageBuffer::from_fn(16, 16, |x, y| Rgb([seed, x as u8 * 8, y as u8 * 8]));
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    /// Fetcher serving canned responses keyed by reference, tracking
    /// concurrency and call counts.
    #[derive(Default)]
    pub struct FakeFetcher {
        pub responses: HashMap<String, Result<Vec<u8>, fn() -> FetchError>>,
        pub delays: HashMap<String, Duration>,
        pub in_flight: AtomicUsize,
        pub max_in_flight: AtomicUsize,
        pub calls: Mutex<Vec<String>>,
    }

    impl FakeFetcher {
        pub fn ok(mut self, reference: &str, bytes: Vec<u8>) -> Self {
            self.responses.insert(reference.to_string(), Ok(bytes));
            self
        }

        pub fn err(mut self, reference: &str, error: fn() -> FetchError) -> Self {
            self.responses.insert(reference.to_string(), Err(error));
            self
        }

        pub fn delay(mut self, reference: &str, delay: Duration) -> Self {
            self.delays.insert(reference.to_string(), delay);
            self
        }
    }

    #[async_trait]
    impl Fetcher for FakeFetcher {
        async fn fetch(&self, reference: &str) -> Result<Vec<u8>, FetchError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            self.calls.lock().unwrap().push(reference.to_string());

            let delay = self
                .delays
                .get(reference)
                .copied()
                .unwrap_or(Duration::from_millis(2));
            tokio::time::sleep(delay).await;

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            match self.responses.get(reference) {
                Some(Ok(bytes)) => Ok(bytes.clone()),
                Some(Err(make)) => Err(make()),
                None => Err(FetchError::BadStatus(404)),
            }
        }
    }

    /// Sink keeping artifacts in memory; can be told to fail N times.
    #[derive(Default)]
    pub struct MemorySink {
        pub artifacts: Mutex<Vec<Vec<u8>>>,
        pub failures_left: AtomicUsize,
    }

    #[async_trait]
    impl ArtifactSink for MemorySink {
        async fn put(&self, bytes: &[u8]) -> Result<String, StoreError> {
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(StoreError::Rejected(503));
            }
            let mut artifacts = self.artifacts.lock().unwrap();
            artifacts.push(bytes.to_vec());
            Ok(format!("mem://{}", artifacts.len() - 1))
        }
    }
}

//! Batch rendering of resolved records.
//!
//! ```text
//! records ──chunk(10)──▶ window(3) ──join──▶ window(3) ──join──▶ ...
//!                          │ render × 3         │
//!                          ▼                    ▼
//!                     artifacts (source order) + stats + failures
//! ```
//!
//! At most `concurrency` render calls are in flight: a window must fully
//! settle before the next one starts. A failed record is left out of the
//! output and counted; the batch goes on unless `continue_on_error` is off.

pub mod naming;
pub mod text;

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde::{Deserialize, Serialize};

use crate::error::{BatchError, RenderError};
use crate::logs::{log_error, log_info, log_success, log_warning};
use crate::models::{GeneratedArtifact, ProgressCallback, ResolvedRecord};

pub use naming::{sanitize_file_name, NamingStrategy};
pub use text::TextTemplateRenderer;

use naming::UniqueNames;

// =============================================================================
// Rendering engine contract
// =============================================================================

/// Turns a template and one flat record into document bytes.
#[allow(async_fn_in_trait)]
pub trait Renderer {
    async fn render(&self, template: &[u8], record: &ResolvedRecord) -> Result<Vec<u8>, RenderError>;
}

// =============================================================================
// Options & results
// =============================================================================

#[derive(Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BatchOptions {
    /// Render calls in flight at once.
    pub concurrency: usize,
    /// Records per logged chunk.
    pub chunk_size: usize,
    pub continue_on_error: bool,
    #[serde(skip)]
    pub on_progress: Option<ProgressCallback>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            concurrency: 3,
            chunk_size: 10,
            continue_on_error: true,
            on_progress: None,
        }
    }
}

impl std::fmt::Debug for BatchOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchOptions")
            .field("concurrency", &self.concurrency)
            .field("chunk_size", &self.chunk_size)
            .field("continue_on_error", &self.continue_on_error)
            .field("on_progress", &self.on_progress.is_some())
            .finish()
    }
}

impl BatchOptions {
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = continue_on_error;
        self
    }

    pub fn with_progress(mut self, callback: impl Fn(usize, usize) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Arc::new(callback));
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchStats {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub total_duration: Duration,
}

/// One record the engine could not render.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderFailure {
    pub index: usize,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct BatchOutput {
    /// Successful artifacts, in source order.
    pub artifacts: Vec<GeneratedArtifact>,
    pub stats: BatchStats,
    pub failures: Vec<RenderFailure>,
}

// =============================================================================
// Orchestration
// =============================================================================

/// Render every record with `renderer`, `options.concurrency` at a time.
///
/// Progress `(completed, total)` is reported after each window; completed
/// counts failures too and ends at `total`. An empty batch reports `(0, 0)`.
pub async fn run_batch<R: Renderer>(
    renderer: &R,
    template: &[u8],
    records: &[ResolvedRecord],
    naming: &NamingStrategy,
    options: &BatchOptions,
) -> Result<BatchOutput, BatchError> {
    let started = Instant::now();
    let total = records.len();
    let concurrency = options.concurrency.max(1);
    let chunk_size = options.chunk_size.max(concurrency);

    let mut artifacts = Vec::with_capacity(total);
    let mut failures = Vec::new();
    let mut names = UniqueNames::default();
    let mut completed = 0;

    if total == 0 {
        if let Some(callback) = &options.on_progress {
            callback(0, 0);
        }
    }

    let chunk_count = total.div_ceil(chunk_size);
    for (chunk_index, chunk) in records.chunks(chunk_size).enumerate() {
        let chunk_offset = chunk_index * chunk_size;
        log_info(format!(
            "Rendering chunk {}/{} ({} records)",
            chunk_index + 1,
            chunk_count,
            chunk.len()
        ));

        for (window_index, window) in chunk.chunks(concurrency).enumerate() {
            let offset = chunk_offset + window_index * concurrency;
            let futures = window.iter().enumerate().map(|(i, record)| async move {
                (offset + i, renderer.render(template, record).await)
            });

            // join_all keeps input order, so artifacts stay in source order
            let mut first_error: Option<(usize, RenderError)> = None;
            for (index, result) in join_all(futures).await {
                match result {
                    Ok(content) => {
                        let record = &records[index];
                        artifacts.push(GeneratedArtifact {
                            content,
                            file_name: names.claim(naming.file_name(record, index)),
                            source_index: index,
                            source_record: record.clone(),
                        });
                    }
                    Err(e) => {
                        log_error(format!("Record {} failed: {}", index + 1, e));
                        failures.push(RenderFailure {
                            index,
                            message: e.to_string(),
                        });
                        first_error.get_or_insert((index, e));
                    }
                }
            }

            completed += window.len();
            if let Some(callback) = &options.on_progress {
                callback(completed, total);
            }

            if let Some((index, source)) = first_error {
                if !options.continue_on_error {
                    log_warning(format!("Batch aborted after {}/{} records", completed, total));
                    return Err(BatchError::Aborted { index, source });
                }
            }
        }
    }

    let stats = BatchStats {
        total,
        successful: artifacts.len(),
        failed: failures.len(),
        total_duration: started.elapsed(),
    };
    log_success(format!(
        "Batch complete: {}/{} rendered, {} failed in {:.1}s",
        stats.successful,
        stats.total,
        stats.failed,
        stats.total_duration.as_secs_f64()
    ));

    Ok(BatchOutput {
        artifacts,
        stats,
        failures,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::cell::Cell;
    use std::sync::Mutex;

    /// Echoes the record's `Id`; fails when `Id` is listed in `failing`.
    #[derive(Default)]
    struct FlakyRenderer {
        failing: Vec<i64>,
        in_flight: Cell<usize>,
        max_in_flight: Cell<usize>,
    }

    impl Renderer for FlakyRenderer {
        async fn render(&self, _template: &[u8], record: &ResolvedRecord) -> Result<Vec<u8>, RenderError> {
            self.in_flight.set(self.in_flight.get() + 1);
            self.max_in_flight.set(self.max_in_flight.get().max(self.in_flight.get()));
            let id = record.get("Id").and_then(|v| v.as_i64()).unwrap_or_default();
            // later records finish first
            for _ in 0..(10 - id) {
                tokio::task::yield_now().await;
            }
            self.in_flight.set(self.in_flight.get() - 1);
            if self.failing.contains(&id) {
                return Err(RenderError::UndefinedVariable(format!("id{}", id)));
            }
            Ok(format!("doc {}", id).into_bytes())
        }
    }

    fn records(n: usize) -> Vec<ResolvedRecord> {
        (0..n)
            .map(|i| ResolvedRecord::from(json!({ "Id": i }).as_object().cloned().unwrap()))
            .collect()
    }

    fn progress_recorder() -> (Arc<Mutex<Vec<(usize, usize)>>>, BatchOptions) {
        let progress = Arc::new(Mutex::new(Vec::new()));
        let seen = progress.clone();
        let options = BatchOptions::default().with_progress(move |done, total| {
            seen.lock().unwrap().push((done, total));
        });
        (progress, options)
    }

    #[tokio::test]
    async fn test_failed_record_is_isolated() {
        let renderer = FlakyRenderer {
            failing: vec![3],
            ..Default::default()
        };
        let (progress, options) = progress_recorder();
        let options = options.with_concurrency(2);

        let output = run_batch(&renderer, b"t", &records(5), &NamingStrategy::new("Report"), &options)
            .await
            .unwrap();

        assert_eq!(output.artifacts.len(), 4);
        let indices: Vec<usize> = output.artifacts.iter().map(|a| a.source_index).collect();
        assert_eq!(indices, vec![0, 1, 2, 4]);
        assert_eq!(output.artifacts[3].file_name, "Report_5");
        assert_eq!(output.artifacts[3].content, b"doc 4".to_vec());

        let progress = progress.lock().unwrap().clone();
        assert_eq!(progress, vec![(2, 5), (4, 5), (5, 5)]);
        assert!(progress.windows(2).all(|w| w[0].0 <= w[1].0));

        assert_eq!(output.stats.total, 5);
        assert_eq!(output.stats.successful, 4);
        assert_eq!(output.stats.failed, 1);
        assert_eq!(output.failures[0].index, 3);
        assert_eq!(renderer.max_in_flight.get(), 2);
    }

    #[tokio::test]
    async fn test_abort_without_continue_on_error() {
        let renderer = FlakyRenderer {
            failing: vec![1],
            ..Default::default()
        };
        let (progress, options) = progress_recorder();
        let options = options.with_concurrency(2).with_continue_on_error(false);

        let err = run_batch(&renderer, b"t", &records(6), &NamingStrategy::default(), &options)
            .await
            .unwrap_err();
        assert!(matches!(err, BatchError::Aborted { index: 1, .. }));
        assert_eq!(*progress.lock().unwrap(), vec![(2, 6)]);
    }

    #[tokio::test]
    async fn test_empty_batch_and_chunking() {
        let renderer = FlakyRenderer::default();
        let (progress, options) = progress_recorder();
        let output = run_batch(&renderer, b"t", &[], &NamingStrategy::default(), &options)
            .await
            .unwrap();
        assert!(output.artifacts.is_empty());
        assert_eq!(*progress.lock().unwrap(), vec![(0, 0)]);

        // chunk of 4 with windows of 3 splits into 3 + 1
        let (progress, options) = progress_recorder();
        let options = options.with_chunk_size(4);
        run_batch(&renderer, b"t", &records(5), &NamingStrategy::default(), &options)
            .await
            .unwrap();
        assert_eq!(*progress.lock().unwrap(), vec![(3, 5), (4, 5), (5, 5)]);
        assert_eq!(renderer.max_in_flight.get(), 3);
    }

    #[tokio::test]
    async fn test_duplicate_names_are_suffixed() {
        let renderer = FlakyRenderer::default();
        let recs: Vec<ResolvedRecord> = (0..3)
            .map(|i| ResolvedRecord::from(json!({"Id": i, "Name": "Acme"}).as_object().cloned().unwrap()))
            .collect();
        let naming = NamingStrategy::default().with_extension("txt");
        let output = run_batch(&renderer, b"t", &recs, &naming, &BatchOptions::default())
            .await
            .unwrap();
        let names: Vec<&str> = output.artifacts.iter().map(|a| a.file_name.as_str()).collect();
        assert_eq!(names, vec!["Acme.txt", "Acme_2.txt", "Acme_3.txt"]);
    }
}

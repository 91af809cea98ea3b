//! Event handling: intake → derive → sink, one record at a time.
//!
//! ## Per-record flow
//!
//! 1. **Fetch** the source bytes through the [`ObjectFetcher`].
//! 2. **Derive** on a blocking thread: decode once, then render every ladder
//!    width and the original re-encode in parallel on a dedicated rayon pool,
//!    then gzip each result.
//! 3. **Store** every prepared object through the [`Sink`], with a bounded
//!    number of writes in flight.
//!
//! ## Failure isolation
//!
//! A record that cannot be fetched or decoded is reported and skipped; the
//! batch moves on. Within a record each output is independent: an encode or
//! write failure at one width is reported for that width alone.
//!
//! ## Invocation budget
//!
//! Records are started only while the soft limit (`timeout - safety margin`)
//! has not passed; later records are reported as timed out without being
//! fetched. A record still running at the hard limit is abandoned and
//! reported as timed out, listing the outputs it finished and marking the
//! rest timed out. Its encoding job is told to stop: renders that have not
//! started yet are skipped.

use crate::config::{ConfigError, InvocationConfig, PipelineConfig, effective_threads};
use crate::event::{Batch, ObjectCreated};
use crate::imaging::{
    ImageBackend, PlannedRendition, Quality, RenditionConfig, RenditionResult, RustBackend,
    create_renditions_cancellable,
};
use crate::report::{
    BatchReport, FailureStage, OutputReport, OutputStatus, RecordReport, RecordStatus,
};
use crate::sink::{PreparedObject, Sink, SinkError, Uploaded};
use crate::store::{ObjectFetcher, ObjectWriter};
use futures::stream::{self, StreamExt};
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{Instrument, debug, info, info_span, warn};

const TRACING_TARGET: &str = "image_derivatives::pipeline";

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to build encoding thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// An output after encoding and compression, before the write.
struct Staged {
    planned: PlannedRendition,
    outcome: Result<PreparedObject, OutputStatus>,
}

enum RecordFailure {
    Decode(String),
    Engine(String),
}

/// Output outcomes of the record in flight. Outlives the record's future,
/// so a record cut off at the hard limit still reports what it wrote.
#[derive(Default)]
struct Progress {
    outputs: Mutex<Vec<OutputReport>>,
}

impl Progress {
    fn outputs(&self) -> MutexGuard<'_, Vec<OutputReport>> {
        self.outputs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register every planned output as unfinished.
    fn plan(&self, planned: impl IntoIterator<Item = PlannedRendition>) {
        *self.outputs() = planned
            .into_iter()
            .map(|p| output_report(p, OutputStatus::TimedOut))
            .collect();
    }

    fn finish(&self, index: usize, status: OutputStatus) {
        if let Some(output) = self.outputs().get_mut(index) {
            output.status = status;
        }
    }

    fn take(&self) -> Vec<OutputReport> {
        std::mem::take(&mut *self.outputs())
    }
}

/// Raises the flag when dropped.
struct CancelOnDrop(Arc<AtomicBool>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

/// The event handler. Cheap to share: all state is behind `Arc`s.
pub struct Pipeline<B: ImageBackend = RustBackend> {
    backend: Arc<B>,
    fetcher: Arc<dyn ObjectFetcher>,
    sink: Sink,
    renditions: Arc<RenditionConfig>,
    upload_concurrency: usize,
    invocation: InvocationConfig,
    pool: Arc<rayon::ThreadPool>,
}

impl<B> Pipeline<B>
where
    B: ImageBackend + Send + 'static,
{
    /// Build a handler from validated config. Fails when no destination
    /// bucket is configured.
    pub fn new(
        config: &PipelineConfig,
        backend: B,
        fetcher: Arc<dyn ObjectFetcher>,
        writer: Arc<dyn ObjectWriter>,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        let bucket = config.require_target_bucket()?;
        let threads = effective_threads(&config.processing);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("derive-{i}"))
            .build()?;
        debug!(target: TRACING_TARGET, threads, bucket, "Pipeline initialized");

        Ok(Self {
            backend: Arc::new(backend),
            fetcher,
            sink: Sink::new(writer, bucket, &config.compression, &config.upload),
            renditions: Arc::new(RenditionConfig {
                widths: config.derivatives.widths.clone(),
                quality: Quality::new(config.derivatives.quality),
                max_pixels: config.derivatives.max_pixels,
            }),
            upload_concurrency: config.upload.max_concurrent.max(1),
            invocation: config.invocation.clone(),
            pool: Arc::new(pool),
        })
    }

    /// Destination bucket.
    pub fn target_bucket(&self) -> &str {
        self.sink.bucket()
    }

    /// Handle one notification batch. The budget starts now.
    pub async fn handle_batch(&self, batch: Batch) -> BatchReport {
        self.handle_batch_from(batch, Instant::now()).await
    }

    /// Handle one notification batch whose invocation started at `started`.
    pub async fn handle_batch_from(&self, mut batch: Batch, started: Instant) -> BatchReport {
        let soft_limit = started + self.invocation.soft_limit();
        let hard_limit = started + self.invocation.budget();

        batch.reject_bucket(self.sink.bucket());
        for rejected in &batch.rejected {
            warn!(
                target: TRACING_TARGET,
                index = rejected.index,
                reason = %rejected.reason,
                "Record rejected"
            );
        }
        info!(
            target: TRACING_TARGET,
            accepted = batch.records.len(),
            rejected = batch.rejected.len(),
            "Handling batch"
        );

        let mut records = Vec::with_capacity(batch.records.len());
        for record in batch.records {
            if Instant::now() >= soft_limit {
                warn!(
                    target: TRACING_TARGET,
                    index = record.index,
                    key = %record.key,
                    "Invocation budget nearly spent, record not started"
                );
                records.push(record_report(&record, RecordStatus::TimedOut, Vec::new()));
                continue;
            }

            let span = info_span!(
                target: TRACING_TARGET,
                "record",
                index = record.index,
                bucket = %record.bucket,
                key = %record.key
            );
            let progress = Progress::default();
            let processed =
                tokio::time::timeout_at(hard_limit, self.process_record(&record, &progress))
                    .instrument(span)
                    .await;
            records.push(processed.unwrap_or_else(|_| {
                let outputs = progress.take();
                warn!(
                    target: TRACING_TARGET,
                    index = record.index,
                    key = %record.key,
                    written = outputs.iter().filter(|o| o.status.is_written()).count(),
                    planned = outputs.len(),
                    "Invocation budget exhausted mid-record"
                );
                record_report(&record, RecordStatus::TimedOut, outputs)
            }));
        }

        BatchReport {
            records,
            rejected: batch.rejected,
            elapsed_ms: started.elapsed().as_millis() as u64,
        }
    }

    async fn process_record(&self, record: &ObjectCreated, progress: &Progress) -> RecordReport {
        let bytes = match self.fetcher.get(&record.bucket, &record.key).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(target: TRACING_TARGET, error = %e, "Fetch failed");
                return record_report(
                    record,
                    RecordStatus::Failed {
                        stage: FailureStage::Fetch,
                        reason: e.to_string(),
                    },
                    Vec::new(),
                );
            }
        };
        debug!(target: TRACING_TARGET, bytes = bytes.len(), "Fetched source");

        let staged = match self.derive(bytes, record.key.clone()).await {
            Ok(staged) => staged,
            Err(RecordFailure::Decode(reason)) => {
                warn!(target: TRACING_TARGET, error = %reason, "Decode failed");
                return record_report(
                    record,
                    RecordStatus::Failed {
                        stage: FailureStage::Decode,
                        reason,
                    },
                    Vec::new(),
                );
            }
            Err(RecordFailure::Engine(reason)) => {
                warn!(target: TRACING_TARGET, error = %reason, "Encoding worker failed");
                return record_report(
                    record,
                    RecordStatus::Failed {
                        stage: FailureStage::Engine,
                        reason,
                    },
                    Vec::new(),
                );
            }
        };

        progress.plan(staged.iter().map(|item| item.planned.clone()));
        let sink = &self.sink;
        stream::iter(staged.into_iter().enumerate())
            .for_each_concurrent(self.upload_concurrency, |(index, item)| async move {
                let status = match item.outcome {
                    Ok(object) => write_status(&object, sink.upload(&object).await),
                    Err(status) => status,
                };
                progress.finish(index, status);
            })
            .await;
        let outputs = progress.take();

        let written = outputs.iter().filter(|o| o.status.is_written()).count();
        let status = if written == outputs.len() {
            RecordStatus::Complete
        } else {
            RecordStatus::Partial
        };
        for output in &outputs {
            if output.status.is_written() {
                debug!(
                    target: TRACING_TARGET,
                    output = %output.key,
                    width = output.width,
                    "Output written"
                );
            } else {
                warn!(
                    target: TRACING_TARGET,
                    output = %output.key,
                    width = output.width,
                    status = ?output.status,
                    "Output failed"
                );
            }
        }
        info!(
            target: TRACING_TARGET,
            written,
            planned = outputs.len(),
            "Record processed"
        );
        record_report(record, status, outputs)
    }

    /// Decode, render, and compress on the blocking pool.
    ///
    /// Dropping the returned future cancels the job: renders not yet
    /// started are skipped.
    async fn derive(&self, bytes: Vec<u8>, key: String) -> Result<Vec<Staged>, RecordFailure> {
        let backend = Arc::clone(&self.backend);
        let pool = Arc::clone(&self.pool);
        let config = Arc::clone(&self.renditions);
        let sink = self.sink.clone();
        let cancel = Arc::new(AtomicBool::new(false));
        let _cancel_on_drop = CancelOnDrop(Arc::clone(&cancel));

        let job = tokio::task::spawn_blocking(move || -> Result<Vec<Staged>, RecordFailure> {
            let decoded = backend
                .decode(&bytes)
                .map_err(|e| RecordFailure::Decode(e.to_string()))?;
            drop(bytes);
            debug!(
                target: TRACING_TARGET,
                format = %decoded.format,
                width = decoded.dimensions.width,
                height = decoded.dimensions.height,
                "Decoded source"
            );
            Ok(pool.install(|| {
                create_renditions_cancellable(backend.as_ref(), &decoded, &key, &config, &cancel)
                    .into_par_iter()
                    .map(|result| stage(&sink, result))
                    .collect::<Vec<_>>()
            }))
        });

        job.await
            .unwrap_or_else(|e| Err(RecordFailure::Engine(e.to_string())))
    }
}

fn stage(sink: &Sink, result: RenditionResult) -> Staged {
    match result {
        Ok(rendition) => {
            let planned = PlannedRendition {
                key: rendition.key.clone(),
                kind: rendition.kind,
                width: rendition.width,
                height: rendition.height,
                content_type: rendition.content_type.clone(),
            };
            let outcome = sink
                .prepare(rendition)
                .map_err(|e| OutputStatus::CompressFailed {
                    reason: e.to_string(),
                });
            Staged { planned, outcome }
        }
        Err(failure) => Staged {
            planned: failure.planned,
            outcome: Err(OutputStatus::EncodeFailed {
                reason: failure.error.to_string(),
            }),
        },
    }
}

fn write_status(object: &PreparedObject, result: Result<Uploaded, SinkError>) -> OutputStatus {
    match result {
        Ok(uploaded) => OutputStatus::Written {
            bytes: object.raw_len,
            compressed_bytes: object.body.len(),
            attempts: uploaded.attempts,
            sha256: object.sha256.clone(),
        },
        Err(SinkError::Write { attempts, source }) => OutputStatus::WriteFailed {
            reason: source.to_string(),
            attempts,
        },
        Err(e @ SinkError::Compress(_)) => OutputStatus::CompressFailed {
            reason: e.to_string(),
        },
    }
}

fn output_report(planned: PlannedRendition, status: OutputStatus) -> OutputReport {
    OutputReport {
        key: planned.key,
        kind: planned.kind.into(),
        width: planned.width,
        height: planned.height,
        content_type: planned.content_type,
        status,
    }
}

fn record_report(
    record: &ObjectCreated,
    status: RecordStatus,
    outputs: Vec<OutputReport>,
) -> RecordReport {
    RecordReport {
        index: record.index,
        bucket: record.bucket.clone(),
        key: record.key.clone(),
        status,
        outputs,
    }
}

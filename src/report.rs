//! Batch outcome types and CLI output formatting.
//!
//! The pipeline never fails a batch as a whole. Everything that happened
//! (per record, per output) is collected into a [`BatchReport`], which
//! serializes to JSON for machine consumers and formats to text for humans.
//!
//! # Output Format
//!
//! ```text
//! 001 uploads/photos/cat.jpg: complete
//!     photos/cat-200.webp  200x150  written (10240 → 9876 bytes)
//!     photos/cat-400.webp  400x300  written (40960 → 39001 bytes, 2 attempts)
//!     photos/cat.jpg  1000x750  written (81234 → 80111 bytes)
//! 002 uploads/missing.jpg: failed at fetch
//!     object s3://uploads/missing.jpg not found
//!
//! Rejected
//!     003 event `ObjectRemoved:Delete` is not an object-created event
//!
//! Processed 2 records: 1 complete, 0 partial, 1 failed, 0 timed out, 1 rejected
//! ```
//!
//! Each view has a `format_*` function (returns `Vec<String>`) for testability
//! and a `print_*` wrapper that writes to stdout. Format functions are pure.

use crate::event::RejectedRecord;
use crate::imaging::{Rendition, RenditionKind, RenditionResult};
use serde::Serialize;

/// Outcome of one invocation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    /// Accepted records, in payload order.
    pub records: Vec<RecordReport>,
    /// Records rejected before processing, in payload order.
    pub rejected: Vec<RejectedRecord>,
    pub elapsed_ms: u64,
}

impl BatchReport {
    pub fn count(&self, matches: impl Fn(&RecordStatus) -> bool) -> usize {
        self.records.iter().filter(|r| matches(&r.status)).count()
    }

    /// True when every accepted record produced every output.
    pub fn is_complete(&self) -> bool {
        self.records
            .iter()
            .all(|r| r.status == RecordStatus::Complete)
    }
}

/// Outcome of one source object.
#[derive(Debug, Clone, Serialize)]
pub struct RecordReport {
    pub index: usize,
    pub bucket: String,
    pub key: String,
    pub status: RecordStatus,
    /// One entry per planned output, ladder order then the original.
    /// Empty when the record failed before planning.
    pub outputs: Vec<OutputReport>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RecordStatus {
    /// Every output written.
    Complete,
    /// At least one output failed; the others were written.
    Partial,
    /// No output was attempted.
    Failed { stage: FailureStage, reason: String },
    /// The invocation budget ran out before or during this record.
    TimedOut,
}

impl RecordStatus {
    fn label(&self) -> String {
        match self {
            RecordStatus::Complete => "complete".to_string(),
            RecordStatus::Partial => "partial".to_string(),
            RecordStatus::Failed { stage, .. } => format!("failed at {}", stage.name()),
            RecordStatus::TimedOut => "timed out".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Fetch,
    Decode,
    /// The encoding worker itself died.
    Engine,
}

impl FailureStage {
    fn name(self) -> &'static str {
        match self {
            FailureStage::Fetch => "fetch",
            FailureStage::Decode => "decode",
            FailureStage::Engine => "engine",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    Derivative,
    Original,
}

impl From<RenditionKind> for OutputKind {
    fn from(kind: RenditionKind) -> Self {
        match kind {
            RenditionKind::Resized { .. } => OutputKind::Derivative,
            RenditionKind::Original => OutputKind::Original,
        }
    }
}

/// Outcome of one planned output.
#[derive(Debug, Clone, Serialize)]
pub struct OutputReport {
    pub key: String,
    pub kind: OutputKind,
    pub width: u32,
    pub height: u32,
    pub content_type: String,
    #[serde(flatten)]
    pub status: OutputStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OutputStatus {
    Written {
        /// Rendition size before compression.
        bytes: usize,
        compressed_bytes: usize,
        attempts: u32,
        /// Hex SHA-256 of the uncompressed rendition.
        sha256: String,
    },
    EncodeFailed {
        reason: String,
    },
    CompressFailed {
        reason: String,
    },
    WriteFailed {
        reason: String,
        attempts: u32,
    },
    /// Not finished when the invocation budget ran out. The object may or
    /// may not be in the output store.
    TimedOut,
}

impl OutputStatus {
    pub fn is_written(&self) -> bool {
        matches!(self, OutputStatus::Written { .. })
    }
}

// ============================================================================
// Formatting
// ============================================================================

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

fn plural(n: u32, word: &str) -> String {
    if n == 1 {
        format!("{n} {word}")
    } else {
        format!("{n} {word}s")
    }
}

fn output_line(output: &OutputReport) -> String {
    let detail = match &output.status {
        OutputStatus::Written {
            bytes,
            compressed_bytes,
            attempts,
            ..
        } => {
            if *attempts > 1 {
                format!(
                    "written ({bytes} \u{2192} {compressed_bytes} bytes, {})",
                    plural(*attempts, "attempt")
                )
            } else {
                format!("written ({bytes} \u{2192} {compressed_bytes} bytes)")
            }
        }
        OutputStatus::EncodeFailed { reason } => format!("encode failed: {reason}"),
        OutputStatus::CompressFailed { reason } => format!("compress failed: {reason}"),
        OutputStatus::WriteFailed { reason, attempts } => {
            format!(
                "write failed after {}: {reason}",
                plural(*attempts, "attempt")
            )
        }
        OutputStatus::TimedOut => "timed out".to_string(),
    };
    format!(
        "    {}  {}x{}  {}",
        output.key, output.width, output.height, detail
    )
}

/// Format a batch report as display lines.
pub fn format_batch_report(report: &BatchReport) -> Vec<String> {
    let mut lines = Vec::new();

    for record in &report.records {
        lines.push(format!(
            "{} {}/{}: {}",
            format_index(record.index + 1),
            record.bucket,
            record.key,
            record.status.label()
        ));
        if let RecordStatus::Failed { reason, .. } = &record.status {
            lines.push(format!("    {reason}"));
        }
        lines.extend(record.outputs.iter().map(output_line));
    }

    if !report.rejected.is_empty() {
        lines.push(String::new());
        lines.push("Rejected".to_string());
        for rejected in &report.rejected {
            lines.push(format!(
                "    {} {}",
                format_index(rejected.index + 1),
                rejected.reason
            ));
        }
    }

    let records = report.records.len();
    lines.push(String::new());
    lines.push(format!(
        "Processed {} record{}: {} complete, {} partial, {} failed, {} timed out, {} rejected",
        records,
        if records == 1 { "" } else { "s" },
        report.count(|s| *s == RecordStatus::Complete),
        report.count(|s| *s == RecordStatus::Partial),
        report.count(|s| matches!(s, RecordStatus::Failed { .. })),
        report.count(|s| *s == RecordStatus::TimedOut),
        report.rejected.len()
    ));
    lines
}

/// Print a batch report to stdout.
pub fn print_batch_report(report: &BatchReport) {
    for line in format_batch_report(report) {
        println!("{}", line);
    }
}

/// Format locally derived renditions (the `derive` command) as display lines.
pub fn format_renditions(source: &str, results: &[RenditionResult]) -> Vec<String> {
    let mut lines = vec![source.to_string()];
    for result in results {
        match result {
            Ok(Rendition {
                key,
                width,
                height,
                bytes,
                ..
            }) => lines.push(format!(
                "    {key}  {width}x{height}  {} bytes",
                bytes.len()
            )),
            Err(failure) => lines.push(format!(
                "    {}  {}x{}  failed: {}",
                failure.planned.key, failure.planned.width, failure.planned.height, failure.error
            )),
        }
    }
    lines
}

/// Print locally derived renditions to stdout.
pub fn print_renditions(source: &str, results: &[RenditionResult]) {
    for line in format_renditions(source, results) {
        println!("{}", line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::RejectReason;
    use crate::imaging::{BackendError, PlannedRendition, RenditionFailure};

    fn written(key: &str, w: u32, h: u32, attempts: u32) -> OutputReport {
        OutputReport {
            key: key.to_string(),
            kind: OutputKind::Derivative,
            width: w,
            height: h,
            content_type: "image/webp".to_string(),
            status: OutputStatus::Written {
                bytes: 100,
                compressed_bytes: 90,
                attempts,
                sha256: "ab".repeat(32),
            },
        }
    }

    fn sample_report() -> BatchReport {
        BatchReport {
            records: vec![
                RecordReport {
                    index: 0,
                    bucket: "uploads".into(),
                    key: "photos/cat.jpg".into(),
                    status: RecordStatus::Partial,
                    outputs: vec![
                        written("photos/cat-200.webp", 200, 150, 1),
                        OutputReport {
                            status: OutputStatus::WriteFailed {
                                reason: "store error: boom".into(),
                                attempts: 4,
                            },
                            ..written("photos/cat-400.webp", 400, 300, 1)
                        },
                    ],
                },
                RecordReport {
                    index: 1,
                    bucket: "uploads".into(),
                    key: "missing.jpg".into(),
                    status: RecordStatus::Failed {
                        stage: FailureStage::Fetch,
                        reason: "object s3://uploads/missing.jpg not found".into(),
                    },
                    outputs: vec![],
                },
            ],
            rejected: vec![RejectedRecord {
                index: 2,
                reason: RejectReason::MissingKey,
            }],
            elapsed_ms: 12,
        }
    }

    #[test]
    fn format_index_pads_to_three_digits() {
        assert_eq!(format_index(1), "001");
        assert_eq!(format_index(42), "042");
        assert_eq!(format_index(1000), "1000");
    }

    #[test]
    fn batch_report_lines() {
        let lines = format_batch_report(&sample_report());
        assert_eq!(lines[0], "001 uploads/photos/cat.jpg: partial");
        assert_eq!(
            lines[1],
            "    photos/cat-200.webp  200x150  written (100 \u{2192} 90 bytes)"
        );
        assert_eq!(
            lines[2],
            "    photos/cat-400.webp  400x300  write failed after 4 attempts: store error: boom"
        );
        assert_eq!(lines[3], "002 uploads/missing.jpg: failed at fetch");
        assert_eq!(lines[4], "    object s3://uploads/missing.jpg not found");
        assert!(lines.contains(&"Rejected".to_string()));
        assert!(lines.contains(&"    003 missing or empty object key".to_string()));
        assert_eq!(
            lines.last().unwrap(),
            "Processed 2 records: 0 complete, 1 partial, 1 failed, 0 timed out, 1 rejected"
        );
    }

    #[test]
    fn retried_write_shows_attempts() {
        let line = output_line(&written("a-200.webp", 200, 100, 2));
        assert!(line.ends_with("(100 \u{2192} 90 bytes, 2 attempts)"), "{line}");
    }

    #[test]
    fn timed_out_record_lists_finished_and_unfinished_outputs() {
        let report = BatchReport {
            records: vec![RecordReport {
                index: 0,
                bucket: "uploads".into(),
                key: "a.jpg".into(),
                status: RecordStatus::TimedOut,
                outputs: vec![
                    written("a-200.webp", 200, 100, 1),
                    OutputReport {
                        key: "a.jpg".into(),
                        kind: OutputKind::Original,
                        status: OutputStatus::TimedOut,
                        ..written("a.jpg", 400, 200, 1)
                    },
                ],
            }],
            ..BatchReport::default()
        };
        let lines = format_batch_report(&report);
        assert_eq!(lines[0], "001 uploads/a.jpg: timed out");
        assert_eq!(lines[2], "    a.jpg  400x200  timed out");

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["records"][0]["outputs"][1]["status"], "timed_out");
    }

    #[test]
    fn empty_report_has_summary_only() {
        let lines = format_batch_report(&BatchReport::default());
        assert_eq!(
            lines,
            vec![
                String::new(),
                "Processed 0 records: 0 complete, 0 partial, 0 failed, 0 timed out, 0 rejected"
                    .to_string()
            ]
        );
    }

    #[test]
    fn is_complete_requires_every_record_complete() {
        assert!(BatchReport::default().is_complete());
        assert!(!sample_report().is_complete());
    }

    #[test]
    fn report_serializes_with_tagged_statuses() {
        let json = serde_json::to_value(sample_report()).unwrap();
        let record = &json["records"][0];
        assert_eq!(record["status"]["status"], "partial");
        assert_eq!(record["outputs"][0]["status"], "written");
        assert_eq!(record["outputs"][0]["kind"], "derivative");
        assert_eq!(record["outputs"][0]["compressed_bytes"], 90);
        assert_eq!(record["outputs"][1]["status"], "write_failed");
        assert_eq!(record["outputs"][1]["attempts"], 4);

        let failed = &json["records"][1]["status"];
        assert_eq!(failed["status"], "failed");
        assert_eq!(failed["stage"], "fetch");
        assert_eq!(json["rejected"][0]["index"], 2);
    }

    #[test]
    fn renditions_lines_show_failures() {
        let results: Vec<RenditionResult> = vec![
            Ok(Rendition {
                key: "a-200.webp".into(),
                kind: RenditionKind::Resized { target: 200 },
                width: 200,
                height: 100,
                content_type: "image/webp".into(),
                bytes: vec![0; 42],
            }),
            Err(RenditionFailure {
                planned: PlannedRendition {
                    key: "a.jpg".into(),
                    kind: RenditionKind::Original,
                    width: 400,
                    height: 200,
                    content_type: "image/jpeg".into(),
                },
                error: BackendError::Encode("nope".into()),
            }),
        ];
        let lines = format_renditions("a.jpg", &results);
        assert_eq!(lines[0], "a.jpg");
        assert_eq!(lines[1], "    a-200.webp  200x100  42 bytes");
        assert!(lines[2].starts_with("    a.jpg  400x200  failed: "));
    }
}

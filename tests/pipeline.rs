//! End-to-end runs of the handler with the pure-Rust backend and an
//! in-memory store.

use flate2::read::GzDecoder;
use image::{DynamicImage, GenericImageView, ImageFormat, RgbImage};
use image_derivatives::config::PipelineConfig;
use image_derivatives::event::{Batch, RejectReason, parse_batch};
use image_derivatives::imaging::RustBackend;
use image_derivatives::pipeline::Pipeline;
use image_derivatives::report::{OutputStatus, RecordStatus};
use image_derivatives::store::MemoryStore;
use std::io::{Cursor, Read};
use std::sync::Arc;

fn encode(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, ((x * y) % 256) as u8])
    });
    let mut cursor = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut cursor, format)
        .unwrap();
    cursor.into_inner()
}

fn gunzip(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    GzDecoder::new(bytes).read_to_end(&mut out).unwrap();
    out
}

fn config(widths: &[u32]) -> PipelineConfig {
    let mut config = PipelineConfig {
        target_bucket: "renditions".into(),
        ..PipelineConfig::default()
    };
    config.derivatives.widths = widths.to_vec();
    config.upload.retry_backoff_ms = 1;
    config
}

fn pipeline(config: &PipelineConfig, store: &Arc<MemoryStore>) -> Pipeline {
    Pipeline::new(config, RustBackend::new(), store.clone(), store.clone()).unwrap()
}

fn s3_event(records: &[(&str, &str)]) -> Batch {
    let records: Vec<serde_json::Value> = records
        .iter()
        .map(|(bucket, key)| {
            serde_json::json!({
                "eventName": "ObjectCreated:Put",
                "s3": {"bucket": {"name": bucket}, "object": {"key": key}}
            })
        })
        .collect();
    let payload = serde_json::json!({ "Records": records });
    parse_batch(&serde_json::to_vec(&payload).unwrap()).unwrap()
}

#[tokio::test]
async fn jpeg_upload_produces_named_renditions() {
    let store = Arc::new(MemoryStore::new());
    store.insert("uploads", "photos/cat.jpg", encode(120, 90, ImageFormat::Jpeg));
    let p = pipeline(&config(&[20, 40]), &store);

    let report = p.handle_batch(s3_event(&[("uploads", "photos/cat.jpg")])).await;

    assert!(report.is_complete(), "{report:?}");
    assert_eq!(
        store.keys("renditions"),
        vec!["photos/cat-20.webp", "photos/cat-40.webp", "photos/cat.jpg"]
    );

    let small = store.object("renditions", "photos/cat-20.webp").unwrap();
    assert_eq!(small.metadata.content_type, "image/webp");
    assert_eq!(small.metadata.content_encoding.as_deref(), Some("gzip"));

    let original = store.object("renditions", "photos/cat.jpg").unwrap();
    assert_eq!(original.metadata.content_type, "image/jpeg");
    assert_eq!(original.metadata.content_encoding.as_deref(), Some("gzip"));
}

#[tokio::test]
async fn renditions_decode_at_requested_width_with_source_aspect() {
    let store = Arc::new(MemoryStore::new());
    store.insert("uploads", "wide.png", encode(300, 100, ImageFormat::Png));
    let p = pipeline(&config(&[30, 150, 600]), &store);

    p.handle_batch(s3_event(&[("uploads", "wide.png")])).await;

    for (key, width, height) in [
        ("wide-30.webp", 30, 10),
        ("wide-150.webp", 150, 50),
        ("wide-600.webp", 600, 200),
    ] {
        let stored = store.object("renditions", key).unwrap();
        let raw = gunzip(&stored.body);
        let img = image::load_from_memory_with_format(&raw, ImageFormat::WebP).unwrap();
        assert_eq!(img.dimensions(), (width, height), "{key}");
    }

    let original = store.object("renditions", "wide.png").unwrap();
    assert_eq!(original.metadata.content_type, "image/png");
    let raw = gunzip(&original.body);
    let img = image::load_from_memory_with_format(&raw, ImageFormat::Png).unwrap();
    assert_eq!(img.dimensions(), (300, 100));
}

#[tokio::test]
async fn content_type_follows_detected_format_not_extension() {
    let store = Arc::new(MemoryStore::new());
    store.insert("uploads", "mislabeled.jpg", encode(40, 40, ImageFormat::Png));
    let p = pipeline(&config(&[20]), &store);

    p.handle_batch(s3_event(&[("uploads", "mislabeled.jpg")])).await;

    let original = store.object("renditions", "mislabeled.jpg").unwrap();
    assert_eq!(original.metadata.content_type, "image/png");
}

#[tokio::test]
async fn url_encoded_key_is_fetched_and_named_decoded() {
    let store = Arc::new(MemoryStore::new());
    store.insert("uploads", "my photos/sun set.png", encode(50, 50, ImageFormat::Png));
    let p = pipeline(&config(&[25]), &store);

    let report = p
        .handle_batch(s3_event(&[("uploads", "my+photos/sun%20set.png")]))
        .await;

    assert!(report.is_complete(), "{report:?}");
    assert_eq!(
        store.keys("renditions"),
        vec!["my photos/sun set-25.webp", "my photos/sun set.png"]
    );
}

#[tokio::test]
async fn one_bad_record_does_not_stop_the_batch() {
    let store = Arc::new(MemoryStore::new());
    store.insert("uploads", "a.png", encode(40, 20, ImageFormat::Png));
    store.insert("uploads", "broken.png", b"\x89PNG\r\n\x1a\n garbage".to_vec());
    store.insert("uploads", "c.png", encode(40, 20, ImageFormat::Png));
    let p = pipeline(&config(&[10]), &store);

    let report = p
        .handle_batch(s3_event(&[
            ("uploads", "a.png"),
            ("uploads", "missing.png"),
            ("uploads", "broken.png"),
            ("uploads", "c.png"),
        ]))
        .await;

    let statuses: Vec<&RecordStatus> = report.records.iter().map(|r| &r.status).collect();
    assert_eq!(statuses[0], &RecordStatus::Complete);
    assert!(matches!(statuses[1], RecordStatus::Failed { .. }));
    assert!(matches!(statuses[2], RecordStatus::Failed { .. }));
    assert_eq!(statuses[3], &RecordStatus::Complete);
    assert_eq!(
        store.keys("renditions"),
        vec!["a-10.webp", "a.png", "c-10.webp", "c.png"]
    );
}

#[tokio::test]
async fn rerun_rewrites_identical_objects() {
    let store = Arc::new(MemoryStore::new());
    store.insert("uploads", "x.png", encode(64, 48, ImageFormat::Png));
    let p = pipeline(&config(&[16, 32]), &store);

    p.handle_batch(s3_event(&[("uploads", "x.png")])).await;
    let first: Vec<Vec<u8>> = store
        .keys("renditions")
        .iter()
        .map(|k| store.object("renditions", k).unwrap().body)
        .collect();

    p.handle_batch(s3_event(&[("uploads", "x.png")])).await;
    let keys = store.keys("renditions");
    let second: Vec<Vec<u8>> = keys
        .iter()
        .map(|k| store.object("renditions", k).unwrap().body)
        .collect();

    assert_eq!(keys.len(), 3);
    assert_eq!(first, second);
    assert_eq!(store.writes().len(), 6);
}

#[tokio::test]
async fn transient_write_failure_is_retried() {
    let store = Arc::new(MemoryStore::new());
    store.insert("uploads", "r.png", encode(20, 20, ImageFormat::Png));
    store.fail_writes("renditions", "r-10.webp", 2);
    let p = pipeline(&config(&[10]), &store);

    let report = p.handle_batch(s3_event(&[("uploads", "r.png")])).await;

    let output = &report.records[0].outputs[0];
    assert!(matches!(
        output.status,
        OutputStatus::Written { attempts: 3, .. }
    ));
    assert!(report.is_complete());
}

#[tokio::test]
async fn written_output_reports_checksum_of_raw_rendition() {
    let store = Arc::new(MemoryStore::new());
    store.insert("uploads", "s.png", encode(20, 20, ImageFormat::Png));
    let p = pipeline(&config(&[10]), &store);

    let report = p.handle_batch(s3_event(&[("uploads", "s.png")])).await;

    let stored = store.object("renditions", "s-10.webp").unwrap();
    let raw = gunzip(&stored.body);
    match &report.records[0].outputs[0].status {
        OutputStatus::Written {
            bytes,
            compressed_bytes,
            sha256,
            ..
        } => {
            assert_eq!(*bytes, raw.len());
            assert_eq!(*compressed_bytes, stored.body.len());
            assert_eq!(sha256.len(), 64);
        }
        other => panic!("unexpected status {other:?}"),
    }
}

#[tokio::test]
async fn events_from_destination_bucket_are_ignored() {
    let store = Arc::new(MemoryStore::new());
    store.insert("renditions", "loop.png", encode(20, 20, ImageFormat::Png));
    let p = pipeline(&config(&[10]), &store);

    let report = p
        .handle_batch(s3_event(&[("renditions", "loop.png")]))
        .await;

    assert!(report.records.is_empty());
    assert_eq!(
        report.rejected[0].reason,
        RejectReason::SelfTrigger("renditions".into())
    );
    assert_eq!(store.keys("renditions"), vec!["loop.png"]);
}

#[tokio::test]
async fn narrow_tall_source_skips_widths_past_size_limit() {
    let store = Arc::new(MemoryStore::new());
    store.insert("uploads", "strip.png", encode(1, 2000, ImageFormat::Png));
    let p = pipeline(&config(&[4, 200, 3200]), &store);

    let report = p.handle_batch(s3_event(&[("uploads", "strip.png")])).await;

    let record = &report.records[0];
    assert_eq!(record.status, RecordStatus::Partial);
    assert!(record.outputs[0].status.is_written());
    for output in &record.outputs[1..3] {
        match &output.status {
            OutputStatus::EncodeFailed { reason } => {
                assert!(reason.contains("size limit"), "{reason}")
            }
            other => panic!("unexpected status for {}: {other:?}", output.key),
        }
    }
    assert_eq!(record.outputs[2].height, 6_400_000);
    assert!(record.outputs[3].status.is_written());
    assert_eq!(store.keys("renditions"), vec!["strip-4.webp", "strip.png"]);

    let thin = gunzip(&store.object("renditions", "strip-4.webp").unwrap().body);
    let img = image::load_from_memory_with_format(&thin, ImageFormat::WebP).unwrap();
    assert_eq!(img.dimensions(), (4, 8000));
}

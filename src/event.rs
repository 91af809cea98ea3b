//! Trigger payload parsing.
//!
//! The trigger payload is the only inbound wire contract, so it is parsed
//! defensively: a malformed record is rejected on its own and the rest of the
//! batch still runs. Only a payload that is not JSON, or that has no record
//! list at all, fails as a whole.
//!
//! ## Accepted shapes
//!
//! S3 event notifications, with URL-encoded object keys:
//!
//! ```json
//! {"Records": [{"eventName": "ObjectCreated:Put",
//!               "s3": {"bucket": {"name": "uploads"},
//!                      "object": {"key": "photos/my+cat.jpg"}}}]}
//! ```
//!
//! Flat records (keys taken verbatim), either under `Records` or as a bare array:
//!
//! ```json
//! [{"bucket": "uploads", "key": "photos/my cat.jpg"}]
//! ```

use serde::{Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EventError {
    #[error("payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("payload has no record list (expected a `Records` array or a bare array)")]
    MissingRecords,
}

/// One object-created notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectCreated {
    /// Position of the record in the payload, for attribution in logs.
    pub index: usize,
    pub bucket: String,
    pub key: String,
}

/// Why a record was not processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    NotAnObject,
    MissingBucket,
    MissingKey,
    NotObjectCreated(String),
    InvalidKeyEncoding(String),
    /// The source bucket is the destination bucket; processing it would
    /// re-trigger the pipeline on its own output.
    SelfTrigger(String),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::NotAnObject => f.write_str("record is not a JSON object"),
            RejectReason::MissingBucket => f.write_str("missing or empty bucket name"),
            RejectReason::MissingKey => f.write_str("missing or empty object key"),
            RejectReason::NotObjectCreated(name) => {
                write!(f, "event `{name}` is not an object-created event")
            }
            RejectReason::InvalidKeyEncoding(key) => {
                write!(f, "object key `{key}` is not valid URL-encoded UTF-8")
            }
            RejectReason::SelfTrigger(bucket) => {
                write!(f, "source bucket `{bucket}` is the destination bucket")
            }
        }
    }
}

impl Serialize for RejectReason {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A record that was rejected before processing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedRecord {
    pub index: usize,
    pub reason: RejectReason,
}

/// A parsed notification batch: accepted records in payload order, plus rejects.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    pub records: Vec<ObjectCreated>,
    pub rejected: Vec<RejectedRecord>,
}

impl Batch {
    /// Move records whose source bucket is `bucket` to the rejected list.
    pub fn reject_bucket(&mut self, bucket: &str) {
        let (kept, looping): (Vec<_>, Vec<_>) = std::mem::take(&mut self.records)
            .into_iter()
            .partition(|r| r.bucket != bucket);
        self.records = kept;
        self.rejected
            .extend(looping.into_iter().map(|r| RejectedRecord {
                index: r.index,
                reason: RejectReason::SelfTrigger(r.bucket),
            }));
        self.rejected.sort_by_key(|r| r.index);
    }
}

/// Parse a raw trigger payload.
pub fn parse_batch(payload: &[u8]) -> Result<Batch, EventError> {
    let value: Value = serde_json::from_slice(payload)?;
    parse_value(&value)
}

/// Parse an already-deserialized trigger payload.
pub fn parse_value(value: &Value) -> Result<Batch, EventError> {
    let records = match value {
        Value::Array(items) => items,
        Value::Object(map) => match map.get("Records") {
            Some(Value::Array(items)) => items,
            _ => return Err(EventError::MissingRecords),
        },
        _ => return Err(EventError::MissingRecords),
    };

    let mut batch = Batch::default();
    for (index, record) in records.iter().enumerate() {
        match parse_record(record) {
            Ok((bucket, key)) => batch.records.push(ObjectCreated { index, bucket, key }),
            Err(reason) => batch.rejected.push(RejectedRecord { index, reason }),
        }
    }
    Ok(batch)
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value.and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn parse_record(record: &Value) -> Result<(String, String), RejectReason> {
    let Value::Object(map) = record else {
        return Err(RejectReason::NotAnObject);
    };

    let Some(s3) = map.get("s3") else {
        let bucket = non_empty_str(map.get("bucket")).ok_or(RejectReason::MissingBucket)?;
        let key = non_empty_str(map.get("key")).ok_or(RejectReason::MissingKey)?;
        return Ok((bucket.to_string(), key.to_string()));
    };

    match map.get("eventName") {
        None | Some(Value::Null) => {}
        Some(Value::String(name)) if name.starts_with("ObjectCreated") => {}
        Some(Value::String(name)) => return Err(RejectReason::NotObjectCreated(name.clone())),
        Some(other) => return Err(RejectReason::NotObjectCreated(other.to_string())),
    }

    let bucket = non_empty_str(s3.pointer("/bucket/name")).ok_or(RejectReason::MissingBucket)?;
    let raw_key = non_empty_str(s3.pointer("/object/key")).ok_or(RejectReason::MissingKey)?;
    let key = decode_s3_key(raw_key)?;
    if key.is_empty() {
        return Err(RejectReason::MissingKey);
    }
    Ok((bucket.to_string(), key))
}

/// Decode an S3 notification key: `+` is a space, `%XX` is a byte.
pub fn decode_s3_key(raw: &str) -> Result<String, RejectReason> {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|k| k.into_owned())
        .map_err(|_| RejectReason::InvalidKeyEncoding(raw.to_string()))
}

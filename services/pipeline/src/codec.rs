//! Wire format for processing-requested events.
//!
//! The payload is a fixed three-field record; the event timestamp travels as
//! a message header named `timestamp` (RFC 3339), not inside the payload.
//! Consumers must read both, and the asymmetry is part of the contract.

use chrono::{DateTime, Utc};
use prost::Message;
use thiserror::Error;

/// Header key carrying the event timestamp.
pub const TIMESTAMP_HEADER: &str = "timestamp";

/// Errors raised while encoding or decoding bus records.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Failed to decode record: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("Missing required header: {0}")]
    MissingHeader(&'static str),

    #[error("Invalid timestamp header {value:?}: {message}")]
    InvalidTimestamp { value: String, message: String },
}

/// On-the-wire record for a processing request. Field numbers are frozen;
/// consumers on older schema revisions must keep decoding newer records.
#[derive(Clone, PartialEq, Message)]
pub struct ProcessingRequestRecord {
    /// Request identifier; equals the blob key of the stored image.
    #[prost(string, tag = "1")]
    pub id: String,
    /// Bucket holding the image bytes.
    #[prost(string, tag = "2")]
    pub bucket_name: String,
    /// Blob key within the bucket.
    #[prost(string, tag = "3")]
    pub blob_name: String,
}

/// A fully decoded processing request: payload record plus the timestamp
/// recovered from the message header.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessingRequest {
    pub id: String,
    pub bucket_name: String,
    pub blob_name: String,
    pub timestamp: DateTime<Utc>,
}

impl ProcessingRequest {
    pub fn new(
        id: impl Into<String>,
        bucket_name: impl Into<String>,
        blob_name: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            bucket_name: bucket_name.into(),
            blob_name: blob_name.into(),
            timestamp,
        }
    }

    /// Serialize the payload portion of this request.
    pub fn encode_payload(&self) -> Vec<u8> {
        ProcessingRequestRecord {
            id: self.id.clone(),
            bucket_name: self.bucket_name.clone(),
            blob_name: self.blob_name.clone(),
        }
        .encode_to_vec()
    }

    /// The value of the `timestamp` header for this request.
    pub fn timestamp_header_value(&self) -> String {
        self.timestamp.to_rfc3339()
    }

    /// Rebuild a request from a raw payload and the `timestamp` header value.
    pub fn decode(payload: &[u8], timestamp_header: Option<&str>) -> Result<Self, CodecError> {
        let record = ProcessingRequestRecord::decode(payload)?;
        let raw = timestamp_header.ok_or(CodecError::MissingHeader(TIMESTAMP_HEADER))?;
        let timestamp = DateTime::parse_from_rfc3339(raw)
            .map_err(|e| CodecError::InvalidTimestamp {
                value: raw.to_string(),
                message: e.to_string(),
            })?
            .with_timezone(&Utc);

        Ok(Self {
            id: record.id,
            bucket_name: record.bucket_name,
            blob_name: record.blob_name,
            timestamp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_request() -> ProcessingRequest {
        ProcessingRequest::new(
            "image-550e8400-e29b-41d4-a716-446655440000",
            "lumen-images",
            "image-550e8400-e29b-41d4-a716-446655440000",
            Utc.with_ymd_and_hms(2017, 2, 15, 10, 30, 0).unwrap(),
        )
    }

    #[test]
    fn test_roundtrip_with_timestamp_header() {
        let request = sample_request();
        let payload = request.encode_payload();
        let header = request.timestamp_header_value();

        let decoded = ProcessingRequest::decode(&payload, Some(&header)).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn test_timestamp_is_not_in_payload() {
        let request = sample_request();
        let payload = request.encode_payload();

        let record = ProcessingRequestRecord::decode(payload.as_slice()).unwrap();
        assert_eq!(record.id, request.id);
        // The record alone cannot produce a request: the header is required.
        assert!(matches!(
            ProcessingRequest::decode(&payload, None),
            Err(CodecError::MissingHeader(TIMESTAMP_HEADER))
        ));
    }

    #[test]
    fn test_invalid_timestamp_header_rejected() {
        let request = sample_request();
        let payload = request.encode_payload();

        let result = ProcessingRequest::decode(&payload, Some("not-a-timestamp"));
        assert!(matches!(result, Err(CodecError::InvalidTimestamp { .. })));
    }

    #[test]
    fn test_garbage_payload_rejected() {
        let result = ProcessingRequest::decode(&[0xff, 0xff, 0xff], Some("2017-02-15T10:30:00Z"));
        assert!(matches!(result, Err(CodecError::Decode(_))));
    }
}

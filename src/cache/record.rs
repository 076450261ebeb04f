//! Stored representation of a captured response.
//!
//! A record is a JSON array:
//!
//! ```text
//! [status, [[name, value], ...], "<base64 gzip body>", created_at, "location"?]
//! ```
//!
//! `created_at` is Unix seconds or `null`. The trailing location is only
//! written for 301 responses. Arrays with the timestamp missing altogether
//! still decode; such records are never eligible for stale serving.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Value, json};

use super::error::{CacheError, CacheResult};
use crate::http::{Headers, StatusCode};

#[derive(Debug, Clone, PartialEq)]
pub struct CacheRecord {
    pub status: StatusCode,
    /// Allowlisted headers only.
    pub headers: Headers,
    /// Gzip-compressed body.
    pub body: Vec<u8>,
    pub created_at: Option<i64>,
    pub location: Option<String>,
}

impl CacheRecord {
    /// The `ETag` captured with the record, if any.
    pub fn etag(&self) -> Option<&str> {
        self.headers.get("etag")
    }

    pub fn encode(&self) -> Vec<u8> {
        let headers: Vec<[&str; 2]> = self.headers.iter().map(|(k, v)| [k, v]).collect();
        let mut fields = vec![
            json!(self.status.as_u16()),
            json!(headers),
            json!(STANDARD.encode(&self.body)),
            json!(self.created_at),
        ];
        if let Some(location) = &self.location {
            fields.push(json!(location));
        }
        Value::Array(fields).to_string().into_bytes()
    }

    /// # Errors
    ///
    /// [`CacheError::CorruptRecord`] when the payload is not a record this
    /// module wrote, or names a status code that cannot be served.
    pub fn decode(payload: &[u8]) -> CacheResult<Self> {
        let value: Value = serde_json::from_slice(payload)
            .map_err(|e| CacheError::CorruptRecord(format!("invalid JSON: {e}")))?;
        let Value::Array(fields) = value else {
            return Err(corrupt("record is not an array"));
        };
        if fields.len() < 3 {
            return Err(corrupt("record has fewer than three fields"));
        }

        let code = fields[0]
            .as_u64()
            .and_then(|n| u16::try_from(n).ok())
            .ok_or_else(|| corrupt("status is not an integer"))?;
        let status = StatusCode::from_u16(code)
            .ok_or_else(|| CacheError::CorruptRecord(format!("unknown status {code}")))?;

        let headers = decode_headers(&fields[1])?;

        let body = fields[2]
            .as_str()
            .ok_or_else(|| corrupt("body is not a string"))
            .and_then(|encoded| {
                STANDARD
                    .decode(encoded)
                    .map_err(|e| CacheError::CorruptRecord(format!("body is not base64: {e}")))
            })?;

        let created_at = fields.get(3).and_then(Value::as_i64);
        let location = fields.get(4).and_then(Value::as_str).map(str::to_owned);

        Ok(Self {
            status,
            headers,
            body,
            created_at,
            location,
        })
    }
}

fn decode_headers(value: &Value) -> CacheResult<Headers> {
    let pairs = value
        .as_array()
        .ok_or_else(|| corrupt("headers are not an array"))?;
    pairs
        .iter()
        .map(|pair| match pair.as_array().map(Vec::as_slice) {
            Some([Value::String(name), Value::String(value)]) => Ok((name.clone(), value.clone())),
            _ => Err(corrupt("header entry is not a [name, value] pair")),
        })
        .collect()
}

fn corrupt(reason: &str) -> CacheError {
    CacheError::CorruptRecord(reason.to_owned())
}

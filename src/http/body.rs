//! Response bodies.
//!
//! Handlers may hand back a body in one piece or as a sequence of chunks.
//! Everything downstream that needs the whole payload (compression, cache
//! records, wire serialization) goes through [`Body::into_bytes`].

use bytes::{Bytes, BytesMut};

/// A response body, either complete or made of ordered chunks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Body {
    #[default]
    Empty,
    Full(Bytes),
    Chunked(Vec<Bytes>),
}

impl Body {
    /// Appends a chunk, turning a full body into a chunked one if needed.
    pub fn push_chunk(&mut self, chunk: impl Into<Bytes>) {
        let chunk = chunk.into();
        match self {
            Body::Empty => *self = Body::Chunked(vec![chunk]),
            Body::Full(existing) => {
                let first = std::mem::take(existing);
                *self = Body::Chunked(vec![first, chunk]);
            }
            Body::Chunked(chunks) => chunks.push(chunk),
        }
    }

    /// Total payload length in bytes.
    pub fn len(&self) -> usize {
        match self {
            Body::Empty => 0,
            Body::Full(bytes) => bytes.len(),
            Body::Chunked(chunks) => chunks.iter().map(Bytes::len).sum(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` when the body was produced as a sequence of chunks.
    pub fn is_chunked(&self) -> bool {
        matches!(self, Body::Chunked(_))
    }

    /// Flattens the body into one contiguous buffer.
    ///
    /// A full body is returned without copying.
    pub fn into_bytes(self) -> Bytes {
        match self {
            Body::Empty => Bytes::new(),
            Body::Full(bytes) => bytes,
            Body::Chunked(chunks) if chunks.len() == 1 => {
                chunks.into_iter().next().unwrap_or_default()
            }
            Body::Chunked(chunks) => {
                let total = chunks.iter().map(Bytes::len).sum();
                let mut buf = BytesMut::with_capacity(total);
                for chunk in chunks {
                    buf.extend_from_slice(&chunk);
                }
                buf.freeze()
            }
        }
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        if bytes.is_empty() {
            Body::Empty
        } else {
            Body::Full(bytes)
        }
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Body::from(Bytes::from(bytes))
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Body::from(Bytes::from(text))
    }
}

impl From<&'static str> for Body {
    fn from(text: &'static str) -> Self {
        Body::from(Bytes::from_static(text.as_bytes()))
    }
}

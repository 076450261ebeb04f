use thiserror::Error;

/// Errors that escape the cache engine.
///
/// Infrastructure trouble (an unreachable store, a lock that cannot be
/// taken) never shows up here; those paths degrade to a cache miss. What
/// remains are conditions where serving anything would mean guessing at
/// body bytes.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to compress body with {encoding}: {source}")]
    Compression {
        encoding: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decompress {encoding} body: {source}")]
    Decompression {
        encoding: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported content encoding: {0:?}")]
    UnsupportedEncoding(String),

    #[error("corrupt cache record: {0}")]
    CorruptRecord(String),
}

pub type CacheResult<T> = Result<T, CacheError>;

//! Body codecs for cached responses.
//!
//! Records always hold gzip; brotli is available to callers that negotiate
//! it themselves.

use std::io::{Read, Write};

use super::error::{CacheError, CacheResult};

/// Brotli quality used for compression (0–11).
const BROTLI_QUALITY: i32 = 9;

/// Brotli window size as log2 of bytes.
const BROTLI_LGWIN: i32 = 22;

/// Content codings understood by the codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    Gzip,
    Brotli,
}

impl Encoding {
    /// Parses a `Content-Encoding` token.
    ///
    /// # Errors
    ///
    /// [`CacheError::UnsupportedEncoding`] for anything but `gzip`, `x-gzip`
    /// and `br`.
    pub fn from_tag(tag: &str) -> CacheResult<Self> {
        let tag = tag.trim();
        if tag.eq_ignore_ascii_case("gzip") || tag.eq_ignore_ascii_case("x-gzip") {
            Ok(Self::Gzip)
        } else if tag.eq_ignore_ascii_case("br") {
            Ok(Self::Brotli)
        } else {
            Err(CacheError::UnsupportedEncoding(tag.to_owned()))
        }
    }

    /// The token written to `Content-Encoding`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gzip => "gzip",
            Self::Brotli => "br",
        }
    }
}

/// Compress `data` with the given encoding.
pub fn compress(encoding: Encoding, data: &[u8]) -> CacheResult<Vec<u8>> {
    match encoding {
        Encoding::Gzip => compress_gzip(data),
        Encoding::Brotli => compress_brotli(data),
    }
}

/// Decompress `data` that was produced with the given encoding.
pub fn decompress(encoding: Encoding, data: &[u8]) -> CacheResult<Vec<u8>> {
    match encoding {
        Encoding::Gzip => decompress_gzip(data),
        Encoding::Brotli => decompress_brotli(data),
    }
}

/// Gzip shorthand used by the capture pipeline.
pub fn gzip(data: &[u8]) -> CacheResult<Vec<u8>> {
    compress_gzip(data)
}

/// Gunzip shorthand used when serving a record to a client without gzip.
pub fn gunzip(data: &[u8]) -> CacheResult<Vec<u8>> {
    decompress_gzip(data)
}

fn compress_gzip(data: &[u8]) -> CacheResult<Vec<u8>> {
    let compression_failed = |source| CacheError::Compression {
        encoding: "gzip",
        source,
    };
    let mut encoder = flate2::write::GzEncoder::new(
        Vec::with_capacity(data.len() / 2 + 32),
        flate2::Compression::default(),
    );
    encoder.write_all(data).map_err(compression_failed)?;
    encoder.finish().map_err(compression_failed)
}

fn decompress_gzip(data: &[u8]) -> CacheResult<Vec<u8>> {
    let mut decoder = flate2::read::GzDecoder::new(data);
    let mut output = Vec::new();
    decoder
        .read_to_end(&mut output)
        .map_err(|source| CacheError::Decompression {
            encoding: "gzip",
            source,
        })?;
    Ok(output)
}

fn compress_brotli(data: &[u8]) -> CacheResult<Vec<u8>> {
    let params = brotli::enc::BrotliEncoderParams {
        quality: BROTLI_QUALITY,
        lgwin: BROTLI_LGWIN,
        ..Default::default()
    };
    let mut output = Vec::new();
    brotli::BrotliCompress(&mut &data[..], &mut output, &params).map_err(|source| {
        CacheError::Compression {
            encoding: "br",
            source,
        }
    })?;
    Ok(output)
}

fn decompress_brotli(data: &[u8]) -> CacheResult<Vec<u8>> {
    let mut output = Vec::new();
    brotli::BrotliDecompress(&mut &data[..], &mut output).map_err(|source| {
        CacheError::Decompression {
            encoding: "br",
            source,
        }
    })?;
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn large_payload() -> Vec<u8> {
        // Mildly compressible, just over 1 MiB.
        (0..(1024 * 1024 + 17))
            .map(|i: usize| (i.wrapping_mul(31) % 251) as u8)
            .collect()
    }

    #[test]
    fn gzip_roundtrip() {
        let data = b"<html><body>cached output</body></html>";
        let compressed = compress(Encoding::Gzip, data).unwrap();
        assert_ne!(compressed.as_slice(), data.as_slice());
        assert_eq!(decompress(Encoding::Gzip, &compressed).unwrap(), data);
    }

    #[test]
    fn gzip_roundtrip_empty() {
        let compressed = gzip(b"").unwrap();
        assert!(!compressed.is_empty());
        assert!(gunzip(&compressed).unwrap().is_empty());
    }

    #[test]
    fn gzip_roundtrip_large() {
        let data = large_payload();
        let compressed = gzip(&data).unwrap();
        assert_eq!(gunzip(&compressed).unwrap(), data);
    }

    #[test]
    fn brotli_roundtrip() {
        let data = b"Hello, World! This is a test of compression.";
        let compressed = compress(Encoding::Brotli, data).unwrap();
        assert_eq!(decompress(Encoding::Brotli, &compressed).unwrap(), data);
    }

    #[test]
    fn brotli_roundtrip_empty_and_large() {
        let empty = compress(Encoding::Brotli, b"").unwrap();
        assert!(decompress(Encoding::Brotli, &empty).unwrap().is_empty());

        let data = large_payload();
        let compressed = compress(Encoding::Brotli, &data).unwrap();
        assert_eq!(decompress(Encoding::Brotli, &compressed).unwrap(), data);
    }

    #[test]
    fn gunzip_rejects_garbage() {
        let err = gunzip(b"definitely not gzip").unwrap_err();
        assert!(matches!(
            err,
            CacheError::Decompression {
                encoding: "gzip",
                ..
            }
        ));
    }

    #[test]
    fn encoding_tags() {
        assert_eq!(Encoding::from_tag("gzip").unwrap(), Encoding::Gzip);
        assert_eq!(Encoding::from_tag(" X-GZIP ").unwrap(), Encoding::Gzip);
        assert_eq!(Encoding::from_tag("br").unwrap(), Encoding::Brotli);
        assert!(matches!(
            Encoding::from_tag("compress"),
            Err(CacheError::UnsupportedEncoding(tag)) if tag == "compress"
        ));
        assert_eq!(Encoding::Brotli.as_str(), "br");
    }
}

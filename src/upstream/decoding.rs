//! Response body decoding.
//!
//! Bodies are only decoded when the content needs rewriting; passthrough
//! responses keep their original encoding untouched. Some servers mislabel
//! raw deflate streams as zlib, so the deflate path tries both framings.

use std::io::Read;

use bytes::Bytes;
use flate2::read::{DeflateDecoder, GzDecoder};

use super::error::{DestinationError, DestinationResult};

/// Decode a body according to its `Content-Encoding` header value.
/// `identity`, an empty value, and unknown encodings return the body as-is.
pub fn decode_body(body: Bytes, content_encoding: Option<&str>, url: &str) -> DestinationResult<Bytes> {
    let encoding = match content_encoding {
        Some(value) => value.trim().to_ascii_lowercase(),
        None => return Ok(body),
    };

    match encoding.as_str() {
        "gzip" | "x-gzip" => decode_gzip(&body, url),
        "deflate" => decode_deflate(&body, url),
        "br" => decode_brotli(&body, url),
        _ => Ok(body),
    }
}

fn decode_gzip(body: &[u8], url: &str) -> DestinationResult<Bytes> {
    let mut out = Vec::new();
    GzDecoder::new(body)
        .read_to_end(&mut out)
        .map_err(|e| decode_error(url, "gzip", &e))?;
    Ok(Bytes::from(out))
}

fn decode_deflate(body: &[u8], url: &str) -> DestinationResult<Bytes> {
    let mut out = Vec::new();
    match flate2::read::ZlibDecoder::new(body).read_to_end(&mut out) {
        Ok(_) => Ok(Bytes::from(out)),
        Err(_) => {
            out.clear();
            DeflateDecoder::new(body)
                .read_to_end(&mut out)
                .map_err(|e| decode_error(url, "deflate", &e))?;
            Ok(Bytes::from(out))
        }
    }
}

fn decode_brotli(body: &[u8], url: &str) -> DestinationResult<Bytes> {
    let mut out = Vec::new();
    brotli::Decompressor::new(body, 4096)
        .read_to_end(&mut out)
        .map_err(|e| decode_error(url, "brotli", &e))?;
    Ok(Bytes::from(out))
}

fn decode_error(url: &str, encoding: &str, e: &std::io::Error) -> DestinationError {
    DestinationError::Transport {
        url: url.to_string(),
        detail: format!("failed to decode {} response body: {}", encoding, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const URL: &str = "http://h.example/";

    #[test]
    fn identity_passes_through() {
        let body = Bytes::from_static(b"plain");
        assert_eq!(decode_body(body.clone(), None, URL).unwrap(), body);
        assert_eq!(decode_body(body.clone(), Some("identity"), URL).unwrap(), body);
    }

    #[test]
    fn gzip_round_trip() {
        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(b"<html>hi</html>").unwrap();
        let compressed = encoder.finish().unwrap();

        let decoded = decode_body(Bytes::from(compressed), Some("gzip"), URL).unwrap();
        assert_eq!(&decoded[..], b"<html>hi</html>");
    }

    #[test]
    fn zlib_and_raw_deflate_both_decode() {
        let mut zlib =
            flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        zlib.write_all(b"zlib-framed").unwrap();
        let decoded =
            decode_body(Bytes::from(zlib.finish().unwrap()), Some("deflate"), URL).unwrap();
        assert_eq!(&decoded[..], b"zlib-framed");

        let mut raw =
            flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
        raw.write_all(b"raw-framed").unwrap();
        let decoded =
            decode_body(Bytes::from(raw.finish().unwrap()), Some("deflate"), URL).unwrap();
        assert_eq!(&decoded[..], b"raw-framed");
    }

    #[test]
    fn brotli_round_trip() {
        let mut compressed = Vec::new();
        {
            let mut writer =
                brotli::CompressorWriter::new(&mut compressed, 4096, 5, 22);
            writer.write_all(b"body { color: red }").unwrap();
        }
        let decoded = decode_body(Bytes::from(compressed), Some("br"), URL).unwrap();
        assert_eq!(&decoded[..], b"body { color: red }");
    }

    #[test]
    fn corrupt_stream_is_an_error() {
        let err = decode_body(Bytes::from_static(b"not gzip"), Some("gzip"), URL).unwrap_err();
        assert!(matches!(err, DestinationError::Transport { .. }));
    }
}

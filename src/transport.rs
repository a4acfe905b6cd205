//! Transport negotiation (C4): request decompression, response charset
//! selection, response compression, and the HTTP response headers that
//! frame all of it. Grounded in the pack's own gzip-body-decoding pattern
//! (`influxdb3_server`'s HTTP layer) and built on `flate2`.

use std::collections::HashSet;
use std::io::Read;

use flate2::read::{DeflateDecoder, DeflateEncoder, GzDecoder, GzEncoder};
use flate2::Compression;

use crate::charset::Charset;
use crate::fault::{Fault, FaultCode};

/// Case-insensitive header lookup, since the engine consumes headers from
/// whatever hosting layer received the request (spec §6: "request headers
/// honored" — a plain name→value map, not tied to any specific HTTP crate).
pub trait HeaderLookup {
    fn get_header(&self, name: &str) -> Option<&str>;
}

#[cfg(feature = "server")]
impl HeaderLookup for http::HeaderMap {
    fn get_header(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|v| v.to_str().ok())
    }
}

/// A simple case-insensitive header map, usable without the `server`
/// feature (and what the test suite uses to drive the engine directly).
#[derive(Clone, Debug, Default)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    pub fn new() -> Self {
        Headers(Vec::new())
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }

    pub fn into_pairs(self) -> Vec<(String, String)> {
        self.0
    }
}

impl HeaderLookup for Headers {
    fn get_header(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Compressor {
    Gzip,
    Deflate,
}

impl Compressor {
    pub fn wire_name(&self) -> &'static str {
        match self {
            Compressor::Gzip => "gzip",
            Compressor::Deflate => "deflate",
        }
    }

    fn parse(name: &str) -> Option<Compressor> {
        match name.trim().trim_start_matches("x-").to_ascii_lowercase().as_str() {
            "gzip" => Some(Compressor::Gzip),
            "deflate" => Some(Compressor::Deflate),
            _ => None,
        }
    }
}

/// `responseCharsetEncoding` configuration (spec §6).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CharsetPolicy {
    /// Always use the named charset.
    Fixed(Charset),
    /// Negotiate with `Accept-Charset` against the server's preference list.
    Auto,
    /// Never declare a charset.
    Empty,
}

/// Decompresses a request body per step 1 of the C4 algorithm: if
/// `Content-Encoding` names a compression the server accepts, inflate it;
/// if it names one the server doesn't accept, fault
/// `server_cannot_decompress`; if inflation itself fails, fault
/// `server_decompress_fail`.
pub fn decompress_request(
    headers: &impl HeaderLookup,
    body: &[u8],
    accepted: &HashSet<Compressor>,
) -> Result<Vec<u8>, Fault> {
    let Some(encoding_header) = headers.get_header("Content-Encoding") else {
        return Ok(body.to_vec());
    };

    let Some(compressor) = Compressor::parse(encoding_header) else {
        // unrecognized encodings are passed through untouched, matching
        // servers that only understand gzip/deflate and otherwise assume
        // the body is already in the wire format they expect
        return Ok(body.to_vec());
    };

    if !accepted.contains(&compressor) {
        return Err(Fault::from_code(
            FaultCode::ServerCannotDecompress,
            format!("Content-Encoding: {}", compressor.wire_name()),
        ));
    }

    let mut out = Vec::new();
    let result = match compressor {
        Compressor::Gzip => GzDecoder::new(body).read_to_end(&mut out),
        Compressor::Deflate => DeflateDecoder::new(body).read_to_end(&mut out),
    };

    result
        .map(|_| out)
        .map_err(|error| Fault::from_code(FaultCode::ServerDecompressFail, error.to_string()))
}

/// Chooses the response charset per step 2 of the C4 algorithm.
pub fn negotiate_response_charset(
    headers: &impl HeaderLookup,
    policy: &CharsetPolicy,
    internal: Charset,
) -> Option<Charset> {
    match policy {
        CharsetPolicy::Fixed(charset) => Some(*charset),
        CharsetPolicy::Empty => None,
        CharsetPolicy::Auto => {
            let accept_charset = headers.get_header("Accept-Charset").unwrap_or("");
            let accept_charset = accept_charset.to_ascii_uppercase();
            // preference order: the server's own internal charset first,
            // then the rest of the commonly supported set
            [internal, Charset::Utf8, Charset::Iso88591, Charset::UsAscii]
                .into_iter()
                .find(|candidate| accept_charset.contains(candidate.as_str()))
        }
    }
}

/// Compresses a response body per step 3 of the C4 algorithm, preferring
/// gzip over deflate when the client accepts both and the server allows
/// compressing at all.
pub fn compress_response(
    headers: &impl HeaderLookup,
    body: &[u8],
    compress_response: bool,
    accepted: &HashSet<Compressor>,
    hosting_layer_compresses: bool,
) -> (Vec<u8>, Option<Compressor>) {
    if !compress_response || hosting_layer_compresses {
        return (body.to_vec(), None);
    }

    let accept_encoding = headers.get_header("Accept-Encoding").unwrap_or("").to_ascii_lowercase();

    let chosen = [Compressor::Gzip, Compressor::Deflate]
        .into_iter()
        .find(|c| accepted.contains(c) && accept_encoding.contains(c.wire_name()));

    let Some(compressor) = chosen else {
        return (body.to_vec(), None);
    };

    let mut out = Vec::new();
    let result = match compressor {
        Compressor::Gzip => {
            let mut encoder = GzEncoder::new(body, Compression::default());
            encoder.read_to_end(&mut out)
        }
        Compressor::Deflate => {
            let mut encoder = DeflateEncoder::new(body, Compression::default());
            encoder.read_to_end(&mut out)
        }
    };

    match result {
        Ok(_) => (out, Some(compressor)),
        // compression is a best-effort optimization; if it somehow fails,
        // fall back to the uncompressed body rather than faulting a
        // response that was otherwise perfectly valid
        Err(_) => (body.to_vec(), None),
    }
}

/// The response headers the driver should emit, per step 4 of the C4
/// algorithm.
#[derive(Clone, Debug, Default)]
pub struct ResponseHeaders {
    pub content_type: String,
    pub content_encoding: Option<&'static str>,
    pub content_length: Option<usize>,
    pub vary: String,
}

pub fn build_response_headers(
    charset: Option<Charset>,
    compressor: Option<Compressor>,
    body_len: usize,
    hosting_layer_compresses: bool,
) -> ResponseHeaders {
    let content_type = match charset {
        Some(charset) => format!("text/xml; charset={}", charset.as_str()),
        None => "text/xml".to_string(),
    };

    let mut vary = String::from("Accept-Charset");
    if compressor.is_some() {
        vary.push_str(", Accept-Encoding");
    }

    ResponseHeaders {
        content_type,
        content_encoding: compressor.map(|c| c.wire_name()),
        content_length: if hosting_layer_compresses { None } else { Some(body_len) },
        vary,
    }
}

pub fn default_accepted_compression() -> HashSet<Compressor> {
    HashSet::from([Compressor::Gzip, Compressor::Deflate])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn decompresses_gzip_body() {
        let mut headers = Headers::new();
        headers.insert("Content-Encoding", "gzip");
        let compressed = gzip(b"hello world");
        let accepted = default_accepted_compression();
        let result = decompress_request(&headers, &compressed, &accepted).unwrap();
        assert_eq!(result, b"hello world");
    }

    #[test]
    fn rejects_unaccepted_compression() {
        let mut headers = Headers::new();
        headers.insert("Content-Encoding", "gzip");
        let accepted = HashSet::from([Compressor::Deflate]);
        let err = decompress_request(&headers, b"irrelevant", &accepted).unwrap_err();
        assert_eq!(err.code, FaultCode::ServerCannotDecompress.table_entry().0);
    }

    #[test]
    fn negotiates_charset_from_accept_header() {
        let mut headers = Headers::new();
        headers.insert("Accept-Charset", "iso-8859-1, utf-8");
        let charset = negotiate_response_charset(&headers, &CharsetPolicy::Auto, Charset::Utf8);
        assert_eq!(charset, Some(Charset::Utf8));
    }

    #[test]
    fn prefers_gzip_over_deflate_for_compression() {
        let mut headers = Headers::new();
        headers.insert("Accept-Encoding", "deflate, gzip");
        let accepted = default_accepted_compression();
        let (_, chosen) = compress_response(&headers, b"hello", true, &accepted, false);
        assert_eq!(chosen, Some(Compressor::Gzip));
    }
}

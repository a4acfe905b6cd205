//! Request driver (C7): the per-request state machine wiring every other
//! module together — `INIT -> HEADERS_PARSED -> BODY_DECODED -> XML_PARSED
//! -> DISPATCHED -> SERIALIZED -> COMPRESSED -> EMITTED`. Exposed as a plain
//! library call with no socket ownership; [`crate::server`] (feature
//! `server`) is the thin adapter that actually listens on one.

use std::any::Any;
use std::collections::HashSet;
use std::sync::Arc;

use crate::charset::{decode_bytes, guess_encoding, Charset};
use crate::codec::{parse_request, serialize_response, Outcome, Response};
use crate::debug_trace::{DebugLevel, DiagnosticsSink, ExceptionHandling};
use crate::dispatch::{DispatchConfig, DispatchEngine, DispatchError, DispatchMap, Handler, ParametersType, Signature};
use crate::fault::{Fault, FaultCode};
use crate::introspection::build_system_map;
use crate::transport::{
    build_response_headers, compress_response, decompress_request, default_accepted_compression, negotiate_response_charset,
    CharsetPolicy, Compressor, HeaderLookup, Headers, ResponseHeaders,
};

/// The assembled, immutable server-wide configuration (spec §6).
pub struct ServerConfig {
    pub debug_level: DebugLevel,
    pub exception_handling: ExceptionHandling,
    pub compress_response: bool,
    pub accepted_compression: HashSet<Compressor>,
    pub accepted_request_charsets: Vec<Charset>,
    pub response_charset: CharsetPolicy,
    pub allow_system_funcs: bool,
    pub parameters_type: ParametersType,
    pub user_data: Option<Arc<dyn Any + Send + Sync>>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            debug_level: DebugLevel::None,
            exception_handling: ExceptionHandling::WrapAsServerError,
            compress_response: true,
            accepted_compression: default_accepted_compression(),
            accepted_request_charsets: vec![Charset::Utf8, Charset::Iso88591, Charset::UsAscii],
            response_charset: CharsetPolicy::Auto,
            allow_system_funcs: true,
            parameters_type: ParametersType::NativeValue,
            user_data: None,
        }
    }
}

/// Builds a [`RequestDriver`], matching the teacher's own `ClientBuilder`
/// chained style (`dxr_client::ClientBuilder`). Distinct from the
/// feature-gated `server::ServerBuilder`, which wraps this one with socket
/// ownership; this builder stays usable without the `server` feature at all.
pub struct DriverBuilder {
    config: ServerConfig,
    user_map: DispatchMap,
}

impl DriverBuilder {
    pub fn new() -> Self {
        DriverBuilder {
            config: ServerConfig::default(),
            user_map: DispatchMap::new(),
        }
    }

    pub fn debug_level(mut self, level: DebugLevel) -> Self {
        self.config.debug_level = level;
        self
    }

    pub fn exception_handling(mut self, handling: ExceptionHandling) -> Self {
        self.config.exception_handling = handling;
        self
    }

    pub fn compress_response(mut self, enabled: bool) -> Self {
        self.config.compress_response = enabled;
        self
    }

    pub fn accepted_compression(mut self, accepted: HashSet<Compressor>) -> Self {
        self.config.accepted_compression = accepted;
        self
    }

    pub fn accepted_request_charsets(mut self, charsets: Vec<Charset>) -> Self {
        self.config.accepted_request_charsets = charsets;
        self
    }

    pub fn response_charset(mut self, policy: CharsetPolicy) -> Self {
        self.config.response_charset = policy;
        self
    }

    pub fn allow_system_funcs(mut self, allowed: bool) -> Self {
        self.config.allow_system_funcs = allowed;
        self
    }

    pub fn parameters_type(mut self, parameters_type: ParametersType) -> Self {
        self.config.parameters_type = parameters_type;
        self
    }

    pub fn user_data<T: Any + Send + Sync>(mut self, data: T) -> Self {
        self.config.user_data = Some(Arc::new(data));
        self
    }

    pub fn add_method(self, name: impl Into<String>, handler: Arc<dyn Handler>) -> Result<Self, DispatchError> {
        self.add_method_full(name, handler, None, None, None)
    }

    pub fn add_method_with_signature(
        self,
        name: impl Into<String>,
        handler: Arc<dyn Handler>,
        signatures: Vec<Signature>,
        doc: Option<String>,
    ) -> Result<Self, DispatchError> {
        self.add_method_full(name, handler, Some(signatures), doc, None)
    }

    fn add_method_full(
        mut self,
        name: impl Into<String>,
        handler: Arc<dyn Handler>,
        signatures: Option<Vec<Signature>>,
        doc: Option<String>,
        signature_docs: Option<Vec<Vec<String>>>,
    ) -> Result<Self, DispatchError> {
        self.user_map.register(name, handler, signatures, doc, signature_docs, Some(self.config.parameters_type))?;
        Ok(self)
    }

    pub fn build(self) -> RequestDriver {
        let nil_enabled = cfg!(feature = "nil");
        let system_map = build_system_map(nil_enabled);

        let dispatch_config = DispatchConfig {
            allow_system_funcs: self.config.allow_system_funcs,
            default_parameters_type: self.config.parameters_type,
            exception_handling: self.config.exception_handling,
            capture_warnings: self.config.debug_level >= DebugLevel::CapturedWarnings,
        };

        let engine = DispatchEngine::new(self.user_map, system_map, dispatch_config);

        RequestDriver {
            engine,
            debug_level: self.config.debug_level,
            compress_response: self.config.compress_response,
            accepted_compression: self.config.accepted_compression,
            accepted_request_charsets: self.config.accepted_request_charsets,
            response_charset: self.config.response_charset,
            user_data: self.config.user_data,
        }
    }
}

impl Default for DriverBuilder {
    fn default() -> Self {
        DriverBuilder::new()
    }
}

/// Runs the full per-request state machine over a decoded body and header
/// set, with no knowledge of sockets or connections.
pub struct RequestDriver {
    engine: DispatchEngine,
    debug_level: DebugLevel,
    compress_response: bool,
    accepted_compression: HashSet<Compressor>,
    accepted_request_charsets: Vec<Charset>,
    response_charset: CharsetPolicy,
    user_data: Option<Arc<dyn Any + Send + Sync>>,
}

impl RequestDriver {
    pub fn builder() -> DriverBuilder {
        DriverBuilder::new()
    }

    /// Processes one request end to end, returning the response bytes, the
    /// headers to send alongside them, and the [`Response`] itself (for
    /// callers that want to inspect the outcome, e.g. for access logging).
    pub fn handle(&self, headers: &Headers, body: &[u8]) -> (Vec<u8>, Headers, Response) {
        let diagnostics = DiagnosticsSink::new();

        // BODY_DECODED
        let decoded = match decompress_request(headers, body, &self.accepted_compression) {
            Ok(bytes) => bytes,
            Err(fault) => return self.finish(&diagnostics, body, headers, Response::fault(fault, body.to_vec())),
        };

        let content_type = headers.get_header("Content-Type");
        let charset = guess_encoding(content_type, &decoded);

        if !self.accepted_request_charsets.contains(&charset) {
            let fault = Fault::from_code(FaultCode::InvalidRequest, format!("unsupported request charset {}", charset.as_str()));
            return self.finish(&diagnostics, body, headers, Response::fault(fault, decoded));
        }

        let text = decode_bytes(&decoded, charset);

        // XML_PARSED + DISPATCHED
        let outcome = match parse_request(&text) {
            Ok(request) => {
                diagnostics.log_system(format!("dispatching {}", request.method_name));
                let user_data = self.user_data.as_deref().map(|data| data as &dyn Any);
                self.engine.execute(&request, headers, &diagnostics, user_data)
            }
            Err(fault) => Outcome::Fault(fault),
        };

        let response = match outcome {
            Outcome::Success(value) => Response::success(value, decoded),
            Outcome::Fault(fault) => Response::fault(fault, decoded),
        };

        self.finish(&diagnostics, body, headers, response)
    }

    /// SERIALIZED, COMPRESSED, EMITTED: renders the response body (splicing
    /// in the debug trace right after the XML prologue), compresses it if
    /// negotiated, and builds the matching response headers.
    fn finish(&self, diagnostics: &DiagnosticsSink, raw_request: &[u8], headers: &Headers, response: Response) -> (Vec<u8>, Headers, Response) {
        let charset = negotiate_response_charset(headers, &self.response_charset, Charset::Utf8);

        let rendered = serialize_response(&response, charset).unwrap_or_else(|error| {
            // serialization of a value this engine itself produced should
            // never fail; if it somehow does, report that fact as a fault
            // response instead of panicking the request.
            let fallback = Response::fault(Fault::from_code(FaultCode::InvalidRequest, error.to_string()), raw_request.to_vec());
            serialize_response(&fallback, charset).unwrap_or_default()
        });

        let with_trace = match diagnostics.render(self.debug_level, raw_request) {
            Ok(trace) if !trace.is_empty() => splice_after_prologue(&rendered, &trace),
            _ => rendered,
        };

        let body_bytes = with_trace.into_bytes();
        let (compressed, compressor) = compress_response(headers, &body_bytes, self.compress_response, &self.accepted_compression, false);

        let response_headers = build_response_headers(charset, compressor, compressed.len(), false);
        (compressed, headers_from_response_headers(response_headers), response)
    }
}

/// Splices `comment` in right after the first line (the XML declaration) of
/// a rendered document.
fn splice_after_prologue(document: &str, comment: &str) -> String {
    match document.find('\n') {
        Some(index) => {
            let (decl, rest) = document.split_at(index + 1);
            format!("{decl}{comment}{rest}")
        }
        None => format!("{document}\n{comment}"),
    }
}

fn headers_from_response_headers(response_headers: ResponseHeaders) -> Headers {
    let mut headers = Headers::new();
    headers.insert("Content-Type", response_headers.content_type);
    if let Some(encoding) = response_headers.content_encoding {
        headers.insert("Content-Encoding", encoding);
    }
    if let Some(length) = response_headers.content_length {
        headers.insert("Content-Length", length.to_string());
    }
    headers.insert("Vary", response_headers.vary);
    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn echo_handler() -> Arc<dyn Handler> {
        use crate::dispatch::FnHandler;
        Arc::new(FnHandler(|ctx: &crate::dispatch::CallContext| {
            Ok(Value::array(ctx.params.to_vec()).into())
        }))
    }

    #[test]
    fn round_trips_a_plain_echo_call() {
        let driver = RequestDriver::builder().add_method("echo", echo_handler()).unwrap().build();

        let request_xml = r#"<?xml version="1.0"?><methodCall><methodName>echo</methodName><params><param><value><string>hi</string></value></param></params></methodCall>"#;

        let headers = Headers::new();
        let (body, _headers, response) = driver.handle(&headers, request_xml.as_bytes());

        assert!(!response.is_fault());
        let rendered = String::from_utf8(body).unwrap();
        assert!(rendered.contains("<methodResponse>"));
        assert!(rendered.contains("hi"));
    }

    #[test]
    fn unknown_method_becomes_a_fault_response() {
        let driver = RequestDriver::builder().build();
        let request_xml = r#"<?xml version="1.0"?><methodCall><methodName>nope</methodName><params/></methodCall>"#;
        let headers = Headers::new();
        let (body, _headers, response) = driver.handle(&headers, request_xml.as_bytes());

        assert!(response.is_fault());
        let rendered = String::from_utf8(body).unwrap();
        assert!(rendered.contains("faultCode"));
    }

    #[test]
    fn system_list_methods_reports_registered_user_methods() {
        let driver = RequestDriver::builder().add_method("echo", echo_handler()).unwrap().build();
        let request_xml =
            r#"<?xml version="1.0"?><methodCall><methodName>system.listMethods</methodName><params/></methodCall>"#;
        let headers = Headers::new();
        let (body, _headers, response) = driver.handle(&headers, request_xml.as_bytes());

        assert!(!response.is_fault());
        let rendered = String::from_utf8(body).unwrap();
        assert!(rendered.contains("echo"));
    }
}

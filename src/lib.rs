//! An XML-RPC server engine: parses a request, dispatches it through a
//! named handler map, and serializes the result, while negotiating
//! content-encoding and character-set encoding along the way. Modeled on
//! `dxr`'s `Value`/`Struct`/`Array` data model and `Handler`/`ServerBuilder`
//! pattern, generalized to the XML-RPC calling conventions, introspection
//! methods, and transport negotiation rules described in the wire
//! specification (<http://xmlrpc.com/spec>).
//!
//! The engine itself (`dispatch`, `codec`, `charset`, `transport`, `driver`)
//! owns no socket; the optional `server` feature adds a thin `axum`/`tokio`
//! adapter that does.

mod charset;
mod codec;
mod convert;
mod debug_trace;
mod dispatch;
mod driver;
mod error;
mod fault;
mod introspection;
mod transport;
mod value;

#[cfg(feature = "server")]
mod server;

pub use charset::{decode_bytes, encode_entities, guess_encoding, Charset};
pub use codec::{deserialize_xml, parse_request, serialize_response, serialize_xml, FaultResponse, MethodCall, MethodResponse, Outcome, Request, Response};
pub use convert::{FromParams, ToDXR, TryFromValue, TryToParams, TryToValue};
pub use debug_trace::{DebugLevel, DiagnosticsSink, ExceptionHandling};
pub use dispatch::{
    CallContext, DispatchConfig, DispatchEngine, DispatchEntry, DispatchError, DispatchMap, EpiFnHandler, FnHandler, Handler, HandlerOutput,
    NativeFnHandler, ParametersType, Signature,
};
pub use driver::{DriverBuilder, RequestDriver, ServerConfig};
pub use error::DxrError;
pub use fault::{Fault, FaultCode};
pub use introspection::build_system_map;
pub use transport::{
    build_response_headers, compress_response, decompress_request, default_accepted_compression, negotiate_response_charset, CharsetPolicy, Compressor,
    HeaderLookup, Headers, ResponseHeaders,
};
pub use value::{Array, Kind, Member, Struct, TypeTag, Value, MAX_VALUE_DEPTH, XML_RPC_DATE_FORMAT};

#[cfg(feature = "server")]
pub use server::{Server, ServerBuilder};

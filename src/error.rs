//! Crate-wide error type, mirroring the teacher's `DxrError` (referenced
//! from `dxr_client::reqwest_support`) but scoped to the server side: parse
//! failures, transcoding failures, and parameter conversion failures. A
//! [`crate::fault::Fault`] is a *successful* XML-RPC response, not a member
//! of this enum.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DxrError {
    #[error("type mismatch: expected {expected}, got {actual}")]
    KindMismatch { expected: String, actual: String },

    #[error("index {index} out of range")]
    OutOfRange { index: usize },

    #[error("missing required field {field} on {type_name}")]
    MissingField { type_name: String, field: String },

    #[error("malformed XML-RPC document: {0}")]
    InvalidData(String),

    #[error("value tree exceeds maximum nesting depth ({0})")]
    TooDeep(usize),

    #[error("unsupported charset: {0}")]
    UnsupportedCharset(String),

    #[error("charset transcoding failure: {0}")]
    TranscodeFailure(String),

    #[error("failed to decompress request body: {0}")]
    DecompressFailure(String),

    #[error("XML serialization failure: {0}")]
    Serialize(#[from] quick_xml::DeError),

    #[error("parameter count mismatch: expected {expected}, got {actual}")]
    ParameterCount { expected: usize, actual: usize },
}

impl DxrError {
    pub fn kind_mismatch(expected: &str, actual: &str) -> Self {
        DxrError::KindMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    pub fn missing_field(type_name: &str, field: &str) -> Self {
        DxrError::MissingField {
            type_name: type_name.to_string(),
            field: field.to_string(),
        }
    }

    pub fn invalid_data(message: impl Into<String>) -> Self {
        DxrError::InvalidData(message.into())
    }
}

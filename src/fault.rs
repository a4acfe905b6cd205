//! Faults: application-level error responses framed as `(faultCode,
//! faultString)`. The symbolic fault code table lives here so numeric codes
//! never appear as bare literals at call sites (spec §9 design note).

use crate::error::DxrError;
use crate::value::{Member, Struct, Value};

/// A `(faultCode, faultString)` pair. `faultCode` is always non-zero;
/// `0` is reserved for "success" and must never appear here.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fault {
    pub code: i32,
    pub string: String,
}

impl Fault {
    pub fn new(code: i32, string: impl Into<String>) -> Self {
        debug_assert!(code != 0, "faultCode 0 is reserved for success");
        Fault {
            code,
            string: string.into(),
        }
    }

    /// Builds a fault from the symbolic catalog, appending call-site
    /// details to the default message rather than inventing a new one.
    pub fn from_code(code: FaultCode, detail: impl Into<String>) -> Self {
        let (numeric, default_message) = code.table_entry();
        let detail = detail.into();
        let string = if detail.is_empty() {
            default_message.to_string()
        } else {
            format!("{default_message}: {detail}")
        };
        Fault::new(numeric, string)
    }

    pub fn to_value(&self) -> Value {
        Value::structure(vec![
            Member::new("faultCode".to_string(), Value::i4(self.code)),
            Member::new("faultString".to_string(), Value::string(self.string.clone())),
        ])
    }

    pub fn from_struct(s: &Struct) -> Result<Fault, DxrError> {
        let code = s
            .get("faultCode")
            .ok_or_else(|| DxrError::missing_field("Fault", "faultCode"))?
            .as_i4()?;
        let string = s
            .get("faultString")
            .ok_or_else(|| DxrError::missing_field("Fault", "faultString"))?
            .as_str()?
            .to_string();
        Ok(Fault::new(code, string))
    }
}

impl From<DxrError> for Fault {
    fn from(error: DxrError) -> Self {
        Fault::from_code(FaultCode::ServerError, error.to_string())
    }
}

/// Symbolic fault codes. Numeric values are a stable, crate-internal table;
/// callers should never hardcode the numbers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FaultCode {
    UnknownMethod,
    InvalidRequest,
    IncorrectParams,
    IntrospectUnknown,
    ServerError,
    ServerDecompressFail,
    ServerCannotDecompress,
    MulticallNotStruct,
    MulticallNoMethod,
    MulticallNotString,
    MulticallNoParams,
    MulticallNotArray,
    MulticallRecursion,
}

impl FaultCode {
    /// `(numeric code, default message)`.
    pub fn table_entry(&self) -> (i32, &'static str) {
        match self {
            FaultCode::UnknownMethod => (-32601, "Requested method not found"),
            FaultCode::InvalidRequest => (-32700, "Invalid XML-RPC request"),
            FaultCode::IncorrectParams => (-32602, "Incorrect parameters passed to method"),
            FaultCode::IntrospectUnknown => (-32601, "Method does not exist"),
            FaultCode::ServerError => (-32500, "Application error"),
            FaultCode::ServerDecompressFail => (-32400, "Could not decompress request"),
            FaultCode::ServerCannotDecompress => (-32401, "Cannot decompress request content"),
            FaultCode::MulticallNotStruct => (-32600, "system.multicall expected struct"),
            FaultCode::MulticallNoMethod => (-32601, "missing methodName"),
            FaultCode::MulticallNotString => (-32600, "methodName must be a string"),
            FaultCode::MulticallNoParams => (-32602, "missing params"),
            FaultCode::MulticallNotArray => (-32600, "params must be an array"),
            FaultCode::MulticallRecursion => (-32603, "Recursive system.multicall forbidden"),
        }
    }
}

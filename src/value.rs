//! XML-RPC value tree: the tagged variant representation shared by every
//! other module. Mirrors the teacher's own `Value`/`Array`/`Struct`/`Member`
//! split, with `quick_xml`'s serde support providing the wire format for the
//! simple round-trip cases, and [`crate::codec`] handling the document-level
//! quirks (bare-string values, depth limits) that don't fit the derive model.

use serde::{Deserialize, Serialize};

use crate::error::DxrError;

/// `dateTime.iso8601` values are carried as the opaque wire string; this is
/// the format used when building one from a [`chrono::NaiveDateTime`].
pub const XML_RPC_DATE_FORMAT: &str = "%Y%m%dT%H:%M:%S";

/// Maximum nesting depth accepted by the codec. The wire contract allows
/// unbounded depth; this engine reports `invalid_request` beyond this limit
/// rather than recursing without bound.
pub const MAX_VALUE_DEPTH: usize = 256;

/// `boolean` is encoded as `0`/`1` on the wire, not `true`/`false`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct XmlBool(pub bool);

impl Serialize for XmlBool {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(if self.0 { "1" } else { "0" })
    }
}

impl<'de> Deserialize<'de> for XmlBool {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        match raw.trim() {
            "1" | "true" => Ok(XmlBool(true)),
            "0" | "false" => Ok(XmlBool(false)),
            other => Err(serde::de::Error::custom(format!("invalid boolean value: {other}"))),
        }
    }
}

/// `base64` values are stored decoded, but carried as base64 text on the wire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Base64Bytes(pub Vec<u8>);

impl Serialize for Base64Bytes {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use base64::Engine;
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for Base64Bytes {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use base64::Engine;
        let raw = String::deserialize(deserializer)?;
        let cleaned: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
        base64::engine::general_purpose::STANDARD
            .decode(cleaned)
            .map(Base64Bytes)
            .map_err(|error| serde::de::Error::custom(format!("invalid base64: {error}")))
    }
}

/// The scalar/composite payload carried inside a `<value>` element.
///
/// Variant tags are the XML-RPC wire names. `i4` also accepts `int` on
/// deserialize (the two are the same type); serialization always emits `i4`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Scalar {
    #[serde(rename = "i4", alias = "int")]
    I4(i32),

    #[cfg(feature = "i8")]
    #[serde(rename = "i8")]
    I8(i64),

    #[serde(rename = "boolean")]
    Boolean(XmlBool),

    #[serde(rename = "string")]
    Str(String),

    #[serde(rename = "double")]
    Double(f64),

    #[serde(rename = "dateTime.iso8601")]
    DateTime(String),

    #[serde(rename = "base64")]
    Base64(Base64Bytes),

    #[cfg(feature = "nil")]
    #[serde(rename = "nil")]
    Nil,

    #[serde(rename = "array")]
    Array(Array),

    #[serde(rename = "struct")]
    Struct(Struct),
}

/// A single XML-RPC value, wrapped in the `<value>` element.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename = "value")]
pub struct Value {
    #[serde(rename = "$value")]
    inner: Scalar,
}

/// The kind of an XML-RPC value, per the data model in the spec (scalar
/// values additionally report a more specific [`TypeTag`] via `scalar_type`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Kind {
    Scalar,
    Array,
    Struct,
}

/// Type tags used both for `scalar_type()` and for signature checking.
/// `Any` is the introspection-v2 wildcard; it never appears as a runtime
/// value's own tag, only in declared signatures.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TypeTag {
    I4,
    #[cfg(feature = "i8")]
    I8,
    Boolean,
    String,
    Double,
    DateTime,
    Base64,
    #[cfg(feature = "nil")]
    Nil,
    Array,
    Struct,
    Any,
}

impl TypeTag {
    /// The wire name used in `system.methodSignature` responses. The
    /// server-wide alias `i4`/`int` normalizes to `int` here, matching the
    /// introspection convention used by XML-RPC servers that declare
    /// signatures with `int` rather than `i4`.
    pub fn as_str(&self) -> &'static str {
        match self {
            TypeTag::I4 => "int",
            #[cfg(feature = "i8")]
            TypeTag::I8 => "i8",
            TypeTag::Boolean => "boolean",
            TypeTag::String => "string",
            TypeTag::Double => "double",
            TypeTag::DateTime => "dateTime.iso8601",
            TypeTag::Base64 => "base64",
            #[cfg(feature = "nil")]
            TypeTag::Nil => "nil",
            TypeTag::Array => "array",
            TypeTag::Struct => "struct",
            TypeTag::Any => "any",
        }
    }

    /// Parses a declared signature tag, normalizing `i4` to `int`.
    pub fn parse(tag: &str) -> Option<TypeTag> {
        Some(match tag {
            "i4" | "int" => TypeTag::I4,
            #[cfg(feature = "i8")]
            "i8" => TypeTag::I8,
            "boolean" => TypeTag::Boolean,
            "string" => TypeTag::String,
            "double" => TypeTag::Double,
            "dateTime.iso8601" => TypeTag::DateTime,
            "base64" => TypeTag::Base64,
            #[cfg(feature = "nil")]
            "nil" => TypeTag::Nil,
            "array" => TypeTag::Array,
            "struct" => TypeTag::Struct,
            "any" => TypeTag::Any,
            _ => return None,
        })
    }

    /// Whether `self` (a declared tag) accepts a value carrying `actual`.
    pub fn accepts(&self, actual: TypeTag) -> bool {
        matches!(self, TypeTag::Any) || *self == actual
    }
}

/// An ordered sequence of values, wrapped in `<array><data>…</data></array>`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename = "array")]
pub struct Array {
    data: Data,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct Data {
    #[serde(rename = "value", default)]
    value: Vec<Value>,
}

impl Array {
    pub fn from_elements(elements: Vec<Value>) -> Self {
        Array {
            data: Data { value: elements },
        }
    }

    pub fn into_elements(self) -> Vec<Value> {
        self.data.value
    }

    pub fn elements(&self) -> &[Value] {
        &self.data.value
    }
}

/// A single `<member>` of a `<struct>`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename = "member")]
pub struct Member {
    name: String,
    value: Value,
}

impl Member {
    pub fn new(name: String, value: Value) -> Self {
        Member { name, value }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &Value {
        &self.value
    }
}

/// An ordered name→value mapping. Insertion order is preserved because
/// `system.multicall` result ordering (and plain struct round-tripping)
/// depends on it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename = "struct")]
pub struct Struct {
    #[serde(rename = "member", default)]
    member: Vec<Member>,
}

impl Struct {
    pub fn from_members(members: Vec<Member>) -> Self {
        Struct { member: members }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.member.iter().find(|m| m.name == name).map(|m| &m.value)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.member.iter().map(|m| m.name.as_str())
    }

    pub fn members(&self) -> &[Member] {
        &self.member
    }

    pub fn push(&mut self, name: impl Into<String>, value: Value) {
        self.member.push(Member::new(name.into(), value));
    }
}

impl Value {
    pub fn i4(value: i32) -> Self {
        Value { inner: Scalar::I4(value) }
    }

    #[cfg(feature = "i8")]
    pub fn i8(value: i64) -> Self {
        Value { inner: Scalar::I8(value) }
    }

    pub fn boolean(value: bool) -> Self {
        Value {
            inner: Scalar::Boolean(XmlBool(value)),
        }
    }

    pub fn string(value: String) -> Self {
        Value { inner: Scalar::Str(value) }
    }

    pub fn double(value: f64) -> Self {
        Value { inner: Scalar::Double(value) }
    }

    /// Builds a `dateTime.iso8601` value from a [`chrono::NaiveDateTime`].
    pub fn datetime(value: chrono::NaiveDateTime) -> Self {
        Value {
            inner: Scalar::DateTime(value.format(XML_RPC_DATE_FORMAT).to_string()),
        }
    }

    /// Builds a `dateTime.iso8601` value from the opaque wire string
    /// directly, without requiring it to parse as a valid date/time. The
    /// spec treats this field as opaque text, not a validated timestamp.
    pub fn datetime_raw(value: String) -> Self {
        Value { inner: Scalar::DateTime(value) }
    }

    pub fn base64(value: Vec<u8>) -> Self {
        Value {
            inner: Scalar::Base64(Base64Bytes(value)),
        }
    }

    #[cfg(feature = "nil")]
    pub fn nil() -> Self {
        Value { inner: Scalar::Nil }
    }

    pub fn array(elements: Vec<Value>) -> Self {
        Value {
            inner: Scalar::Array(Array::from_elements(elements)),
        }
    }

    pub fn structure(members: Vec<Member>) -> Self {
        Value {
            inner: Scalar::Struct(Struct::from_members(members)),
        }
    }

    pub fn kind(&self) -> Kind {
        match &self.inner {
            Scalar::Array(_) => Kind::Array,
            Scalar::Struct(_) => Kind::Struct,
            _ => Kind::Scalar,
        }
    }

    /// The specific type tag. Always defined, even for composites.
    pub fn scalar_type(&self) -> TypeTag {
        match &self.inner {
            Scalar::I4(_) => TypeTag::I4,
            #[cfg(feature = "i8")]
            Scalar::I8(_) => TypeTag::I8,
            Scalar::Boolean(_) => TypeTag::Boolean,
            Scalar::Str(_) => TypeTag::String,
            Scalar::Double(_) => TypeTag::Double,
            Scalar::DateTime(_) => TypeTag::DateTime,
            Scalar::Base64(_) => TypeTag::Base64,
            #[cfg(feature = "nil")]
            Scalar::Nil => TypeTag::Nil,
            Scalar::Array(_) => TypeTag::Array,
            Scalar::Struct(_) => TypeTag::Struct,
        }
    }

    pub fn as_i4(&self) -> Result<i32, DxrError> {
        match &self.inner {
            Scalar::I4(v) => Ok(*v),
            _ => Err(DxrError::kind_mismatch("int", self.scalar_type().as_str())),
        }
    }

    pub fn as_bool(&self) -> Result<bool, DxrError> {
        match &self.inner {
            Scalar::Boolean(XmlBool(v)) => Ok(*v),
            _ => Err(DxrError::kind_mismatch("boolean", self.scalar_type().as_str())),
        }
    }

    pub fn as_str(&self) -> Result<&str, DxrError> {
        match &self.inner {
            Scalar::Str(v) => Ok(v.as_str()),
            _ => Err(DxrError::kind_mismatch("string", self.scalar_type().as_str())),
        }
    }

    pub fn as_f64(&self) -> Result<f64, DxrError> {
        match &self.inner {
            Scalar::Double(v) => Ok(*v),
            _ => Err(DxrError::kind_mismatch("double", self.scalar_type().as_str())),
        }
    }

    pub fn as_datetime_str(&self) -> Result<&str, DxrError> {
        match &self.inner {
            Scalar::DateTime(v) => Ok(v.as_str()),
            _ => Err(DxrError::kind_mismatch("dateTime.iso8601", self.scalar_type().as_str())),
        }
    }

    pub fn as_base64(&self) -> Result<&[u8], DxrError> {
        match &self.inner {
            Scalar::Base64(Base64Bytes(v)) => Ok(v.as_slice()),
            _ => Err(DxrError::kind_mismatch("base64", self.scalar_type().as_str())),
        }
    }

    pub fn array_len(&self) -> Result<usize, DxrError> {
        match &self.inner {
            Scalar::Array(a) => Ok(a.elements().len()),
            _ => Err(DxrError::kind_mismatch("array", self.scalar_type().as_str())),
        }
    }

    pub fn array_at(&self, index: usize) -> Result<&Value, DxrError> {
        match &self.inner {
            Scalar::Array(a) => a.elements().get(index).ok_or(DxrError::OutOfRange { index }),
            _ => Err(DxrError::kind_mismatch("array", self.scalar_type().as_str())),
        }
    }

    pub fn as_array(&self) -> Result<&[Value], DxrError> {
        match &self.inner {
            Scalar::Array(a) => Ok(a.elements()),
            _ => Err(DxrError::kind_mismatch("array", self.scalar_type().as_str())),
        }
    }

    pub fn struct_get(&self, name: &str) -> Result<Option<&Value>, DxrError> {
        match &self.inner {
            Scalar::Struct(s) => Ok(s.get(name)),
            _ => Err(DxrError::kind_mismatch("struct", self.scalar_type().as_str())),
        }
    }

    pub fn struct_keys(&self) -> Result<impl Iterator<Item = &str>, DxrError> {
        match &self.inner {
            Scalar::Struct(s) => Ok(s.keys()),
            _ => Err(DxrError::kind_mismatch("struct", self.scalar_type().as_str())),
        }
    }

    pub fn as_struct(&self) -> Result<&Struct, DxrError> {
        match &self.inner {
            Scalar::Struct(s) => Ok(s),
            _ => Err(DxrError::kind_mismatch("struct", self.scalar_type().as_str())),
        }
    }

    #[cfg(feature = "nil")]
    pub fn is_nil(&self) -> bool {
        matches!(self.inner, Scalar::Nil)
    }
}

//! Native ⇄ [`Value`] conversion traits, named after the teacher's own
//! `TryFromValue`/`TryToValue`/`FromParams`/`TryToParams` traits (see
//! `dxr_client::reqwest_support`, which already consumes these names).

use std::collections::HashMap;

use crate::error::DxrError;
use crate::value::{Member, Value};

pub trait TryFromValue: Sized {
    fn try_from_value(value: &Value) -> Result<Self, DxrError>;
}

pub trait TryToValue {
    fn try_to_value(&self) -> Result<Value, DxrError>;
}

/// Convenience alias used by `NativeValue`-convention handlers that cannot
/// fail during conversion (most scalar wrapping never fails).
pub trait ToDXR {
    fn to_dxr(&self) -> Result<Value, DxrError>;
}

impl<T: TryToValue> ToDXR for T {
    fn to_dxr(&self) -> Result<Value, DxrError> {
        self.try_to_value()
    }
}

macro_rules! impl_int {
    ($ty:ty) => {
        impl TryFromValue for $ty {
            fn try_from_value(value: &Value) -> Result<Self, DxrError> {
                value.as_i4().map(|v| v as $ty)
            }
        }

        impl TryToValue for $ty {
            fn try_to_value(&self) -> Result<Value, DxrError> {
                Ok(Value::i4(*self as i32))
            }
        }
    };
}

impl_int!(i32);
impl_int!(i16);
impl_int!(u16);
impl_int!(u8);
impl_int!(i8);

impl TryFromValue for bool {
    fn try_from_value(value: &Value) -> Result<Self, DxrError> {
        value.as_bool()
    }
}

impl TryToValue for bool {
    fn try_to_value(&self) -> Result<Value, DxrError> {
        Ok(Value::boolean(*self))
    }
}

impl TryFromValue for String {
    fn try_from_value(value: &Value) -> Result<Self, DxrError> {
        value.as_str().map(|s| s.to_string())
    }
}

impl TryToValue for String {
    fn try_to_value(&self) -> Result<Value, DxrError> {
        Ok(Value::string(self.clone()))
    }
}

impl TryToValue for &str {
    fn try_to_value(&self) -> Result<Value, DxrError> {
        Ok(Value::string((*self).to_string()))
    }
}

impl TryFromValue for f64 {
    fn try_from_value(value: &Value) -> Result<Self, DxrError> {
        value.as_f64()
    }
}

impl TryToValue for f64 {
    fn try_to_value(&self) -> Result<Value, DxrError> {
        Ok(Value::double(*self))
    }
}

impl TryFromValue for Vec<u8> {
    fn try_from_value(value: &Value) -> Result<Self, DxrError> {
        value.as_base64().map(|b| b.to_vec())
    }
}

impl TryToValue for Vec<u8> {
    fn try_to_value(&self) -> Result<Value, DxrError> {
        Ok(Value::base64(self.clone()))
    }
}

impl<T: TryFromValue> TryFromValue for Vec<T> {
    fn try_from_value(value: &Value) -> Result<Self, DxrError> {
        value.as_array()?.iter().map(T::try_from_value).collect()
    }
}

impl<T: TryToValue> TryToValue for Vec<T> {
    fn try_to_value(&self) -> Result<Value, DxrError> {
        let elements = self.iter().map(|v| v.try_to_value()).collect::<Result<Vec<_>, _>>()?;
        Ok(Value::array(elements))
    }
}

impl<T: TryFromValue> TryFromValue for HashMap<String, T> {
    fn try_from_value(value: &Value) -> Result<Self, DxrError> {
        let structure = value.as_struct()?;
        structure
            .members()
            .iter()
            .map(|m| Ok((m.name().to_string(), T::try_from_value(m.value())?)))
            .collect()
    }
}

impl<T: TryToValue> TryToValue for HashMap<String, T> {
    fn try_to_value(&self) -> Result<Value, DxrError> {
        let members = self
            .iter()
            .map(|(k, v)| Ok(Member::new(k.clone(), v.try_to_value()?)))
            .collect::<Result<Vec<_>, DxrError>>()?;
        Ok(Value::structure(members))
    }
}

#[cfg(feature = "nil")]
impl<T: TryFromValue> TryFromValue for Option<T> {
    fn try_from_value(value: &Value) -> Result<Self, DxrError> {
        if value.is_nil() {
            Ok(None)
        } else {
            T::try_from_value(value).map(Some)
        }
    }
}

#[cfg(feature = "nil")]
impl<T: TryToValue> TryToValue for Option<T> {
    fn try_to_value(&self) -> Result<Value, DxrError> {
        match self {
            Some(v) => v.try_to_value(),
            None => Ok(Value::nil()),
        }
    }
}

/// Converts an ordered parameter list into a native tuple/single value, for
/// `NativeValue`-convention handlers.
pub trait FromParams: Sized {
    fn from_params(params: &[Value]) -> Result<Self, DxrError>;
}

/// Converts a native return value back into an ordered parameter list, used
/// by `system.multicall`'s sub-call construction and by client-style call
/// builders.
pub trait TryToParams {
    fn try_to_params(&self) -> Result<Vec<Value>, DxrError>;
}

impl<T: TryFromValue> FromParams for T {
    fn from_params(params: &[Value]) -> Result<Self, DxrError> {
        match params {
            [single] => T::try_from_value(single),
            _ => Err(DxrError::ParameterCount {
                expected: 1,
                actual: params.len(),
            }),
        }
    }
}

impl<T: TryToValue> TryToParams for T {
    fn try_to_params(&self) -> Result<Vec<Value>, DxrError> {
        Ok(vec![self.try_to_value()?])
    }
}

macro_rules! impl_from_params_tuple {
    ($($name:ident),+; $count:expr) => {
        impl<$($name: TryFromValue),+> FromParams for ($($name,)+) {
            fn from_params(params: &[Value]) -> Result<Self, DxrError> {
                if params.len() != $count {
                    return Err(DxrError::ParameterCount { expected: $count, actual: params.len() });
                }
                #[allow(non_snake_case)]
                let [$($name),+] = params else { unreachable!() };
                Ok(($($name::try_from_value($name)?,)+))
            }
        }

        impl<$($name: TryToValue),+> TryToParams for ($($name,)+) {
            #[allow(non_snake_case)]
            fn try_to_params(&self) -> Result<Vec<Value>, DxrError> {
                let ($($name,)+) = self;
                Ok(vec![$($name.try_to_value()?),+])
            }
        }
    };
}

impl_from_params_tuple!(A, B; 2);
impl_from_params_tuple!(A, B, C; 3);
impl_from_params_tuple!(A, B, C, D; 4);

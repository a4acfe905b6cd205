//! Dispatch engine (C5): the name-keyed handler registry, signature
//! checking, the three calling conventions, and fault translation. Named
//! and shaped after the teacher's own `Handler` trait
//! (`dxr::{Handler, ServerBuilder}`, see `dxr/examples/server.rs`), but
//! generalized from "one fixed convention" to the three the spec requires.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::codec::{Outcome, Request};
use crate::convert::{FromParams, TryToValue};
use crate::debug_trace::{capture_warnings, DiagnosticsSink, ExceptionHandling};
use crate::fault::{Fault, FaultCode};
use crate::transport::Headers;
use crate::value::{TypeTag, Value};

/// A declared call signature: `[return, param1, …, paramN]`.
pub type Signature = Vec<TypeTag>;

/// The calling convention used to invoke a handler, per spec §4.5/§6.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParametersType {
    /// Handler receives the full [`Request`]; may return a [`HandlerOutput`]
    /// or a bare [`Value`].
    TypedValue,
    /// Handler receives native-language parameter values (via
    /// [`crate::convert`]); may return a native value, encoded back.
    NativeValue,
    /// Handler receives `(methodName, params, userData)` and returns a
    /// native value; a mapping with `faultCode`/`faultString` becomes a
    /// fault.
    Epi,
}

/// What a handler actually returns, before the dispatcher normalizes it
/// into a full [`Outcome`] (spec §4.5 step 5: "return coercion").
pub enum HandlerOutput {
    Outcome(Outcome),
    Value(Value),
}

impl From<Value> for HandlerOutput {
    fn from(value: Value) -> Self {
        HandlerOutput::Value(value)
    }
}

impl From<Outcome> for HandlerOutput {
    fn from(outcome: Outcome) -> Self {
        HandlerOutput::Outcome(outcome)
    }
}

impl From<Fault> for HandlerOutput {
    fn from(fault: Fault) -> Self {
        HandlerOutput::Outcome(Outcome::Fault(fault))
    }
}

/// A registered method handler. Mirrors the teacher's own `Handler` trait
/// (`fn handle(&self, params: &[Value], headers: &HeaderMap) -> Result<Value, Fault>`)
/// but returns a [`HandlerOutput`] so `TypedValue`-convention handlers can
/// also hand back a full fault [`Outcome`] directly, and takes the engine's
/// own [`Headers`] abstraction rather than a hard dependency on any one
/// HTTP crate's header map.
pub trait Handler: Send + Sync {
    fn handle(&self, ctx: &CallContext) -> Result<HandlerOutput, Fault>;
}

/// Everything a handler may need about the call it's servicing.
pub struct CallContext<'a> {
    pub method_name: &'a str,
    pub params: &'a [Value],
    pub headers: &'a Headers,
    /// The server-wide `userData` from spec §6, opaque to the engine itself.
    pub user_data: Option<&'a dyn std::any::Any>,
    pub diagnostics: &'a DiagnosticsSink,
    /// The engine servicing this call, so `system.*` handlers (listMethods,
    /// multicall, …) can reach back into it without smuggling it through
    /// `user_data`. Always `Some` in practice; set by [`DispatchEngine::execute`].
    pub engine: Option<&'a DispatchEngine>,
}

/// A closure-backed [`Handler`] for the common case of a plain function
/// over `&[Value]`.
pub struct FnHandler<F>(pub F)
where
    F: Fn(&CallContext) -> Result<HandlerOutput, Fault> + Send + Sync;

impl<F> Handler for FnHandler<F>
where
    F: Fn(&CallContext) -> Result<HandlerOutput, Fault> + Send + Sync,
{
    fn handle(&self, ctx: &CallContext) -> Result<HandlerOutput, Fault> {
        (self.0)(ctx)
    }
}

/// A `NativeValue`-convention handler (spec §4.5/§6): receives already
/// type-converted native parameters via [`FromParams`], and returns a
/// native value encoded back via [`TryToValue`], instead of working with
/// [`Value`] directly. This is the input-side half of the convention;
/// static typing means the conversion has to happen in the handler's own
/// call, not centrally in [`DispatchEngine::execute`].
pub struct NativeFnHandler<F, P, R>
where
    F: Fn(P) -> Result<R, Fault> + Send + Sync,
    P: FromParams,
    R: TryToValue,
{
    func: F,
    _marker: PhantomData<fn(P) -> R>,
}

impl<F, P, R> NativeFnHandler<F, P, R>
where
    F: Fn(P) -> Result<R, Fault> + Send + Sync,
    P: FromParams,
    R: TryToValue,
{
    pub fn new(func: F) -> Self {
        NativeFnHandler { func, _marker: PhantomData }
    }
}

impl<F, P, R> Handler for NativeFnHandler<F, P, R>
where
    F: Fn(P) -> Result<R, Fault> + Send + Sync,
    P: FromParams,
    R: TryToValue,
{
    fn handle(&self, ctx: &CallContext) -> Result<HandlerOutput, Fault> {
        let params = P::from_params(ctx.params)?;
        let result = (self.func)(params)?;
        Ok(HandlerOutput::Value(result.try_to_value()?))
    }
}

/// An `Epi`-convention handler (spec §4.5/§6): receives the raw
/// `(methodName, params, userData)` triple and returns a plain [`Value`].
/// The dispatcher, not the handler, interprets a returned
/// `{faultCode, faultString}` struct as a fault — see
/// [`DispatchEngine::execute`]'s return-coercion step — matching the
/// historical "epi" calling convention where a fault is just a
/// recognizably-shaped successful return value.
pub struct EpiFnHandler<F>(pub F)
where
    F: Fn(&str, &[Value], Option<&dyn std::any::Any>) -> Result<Value, Fault> + Send + Sync;

impl<F> Handler for EpiFnHandler<F>
where
    F: Fn(&str, &[Value], Option<&dyn std::any::Any>) -> Result<Value, Fault> + Send + Sync,
{
    fn handle(&self, ctx: &CallContext) -> Result<HandlerOutput, Fault> {
        let value = (self.0)(ctx.method_name, ctx.params, ctx.user_data)?;
        Ok(HandlerOutput::Value(value))
    }
}

/// One entry in the dispatch map.
pub struct DispatchEntry {
    pub handler: Arc<dyn Handler>,
    pub signatures: Option<Vec<Signature>>,
    pub doc: Option<String>,
    pub signature_docs: Option<Vec<Vec<String>>>,
    pub parameters_type: Option<ParametersType>,
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("method names starting with \"system.\" are reserved")]
    ReservedName,
}

/// The name→handler registry. Immutable during a request (spec §3/§5);
/// `register` is only ever called at server-construction time.
#[derive(Default)]
pub struct DispatchMap {
    entries: HashMap<String, DispatchEntry>,
}

impl DispatchMap {
    pub fn new() -> Self {
        DispatchMap::default()
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        handler: Arc<dyn Handler>,
        signatures: Option<Vec<Signature>>,
        doc: Option<String>,
        signature_docs: Option<Vec<Vec<String>>>,
        parameters_type: Option<ParametersType>,
    ) -> Result<(), DispatchError> {
        let name = name.into();
        if name.starts_with("system.") {
            return Err(DispatchError::ReservedName);
        }
        self.entries.insert(
            name,
            DispatchEntry {
                handler,
                signatures,
                doc,
                signature_docs,
                parameters_type,
            },
        );
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&DispatchEntry> {
        self.entries.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(|s| s.as_str())
    }
}

/// Server-wide settings that affect dispatch (the subset of spec §6's
/// configuration surface that `execute` itself consults).
#[derive(Clone)]
pub struct DispatchConfig {
    pub allow_system_funcs: bool,
    pub default_parameters_type: ParametersType,
    pub exception_handling: ExceptionHandling,
    /// Whether to install the `debug=3` log-capture shim around every
    /// handler invocation (spec §6/§9); set from `debug_level >=
    /// CapturedWarnings` at build time, since the debug level itself
    /// doesn't vary per request.
    pub capture_warnings: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        DispatchConfig {
            allow_system_funcs: true,
            default_parameters_type: ParametersType::NativeValue,
            exception_handling: ExceptionHandling::WrapAsServerError,
            capture_warnings: false,
        }
    }
}

/// The dispatch engine: holds the user map and the built-in `system.*` map,
/// and runs the `execute` state machine from spec §4.5.
pub struct DispatchEngine {
    pub user_map: DispatchMap,
    pub system_map: DispatchMap,
    pub config: DispatchConfig,
}

impl DispatchEngine {
    pub fn new(user_map: DispatchMap, system_map: DispatchMap, config: DispatchConfig) -> Self {
        DispatchEngine {
            user_map,
            system_map,
            config,
        }
    }

    /// Runs the full dispatch state machine for one request, returning the
    /// [`Outcome`] (never panics; every failure mode is a [`Fault`]).
    pub fn execute(&self, request: &Request, headers: &Headers, diagnostics: &DiagnosticsSink, user_data: Option<&dyn std::any::Any>) -> Outcome {
        // 1. lookup
        let is_system = request.method_name.starts_with("system.");
        let entry = if is_system {
            if !self.config.allow_system_funcs {
                return Outcome::Fault(Fault::from_code(FaultCode::UnknownMethod, request.method_name.clone()));
            }
            self.system_map.get(&request.method_name)
        } else {
            self.user_map.get(&request.method_name)
        };

        let Some(entry) = entry else {
            return Outcome::Fault(Fault::from_code(FaultCode::UnknownMethod, request.method_name.clone()));
        };

        // 2. signature check
        if let Some(signatures) = &entry.signatures {
            if let Err(fault) = check_signature(signatures, &request.params) {
                return Outcome::Fault(fault);
            }
        }

        // 3 + 4. calling convention + invocation, guarded against panics
        // the way `exceptionHandling` dictates (spec §7: every mode but
        // "propagate" converts failures into a fault Response).
        let ctx = CallContext {
            method_name: &request.method_name,
            params: &request.params,
            headers,
            user_data,
            diagnostics,
            engine: Some(self),
        };

        let invoke = || std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| entry.handler.handle(&ctx)));

        let (result, captured) = if self.config.capture_warnings {
            capture_warnings(invoke)
        } else {
            (invoke(), Vec::new())
        };
        for line in captured {
            diagnostics.log_captured(line);
        }

        let handler_result = match result {
            Ok(result) => result,
            Err(panic) => {
                let message = panic_message(&panic);
                match self.config.exception_handling {
                    ExceptionHandling::Propagate => std::panic::resume_unwind(panic),
                    ExceptionHandling::WrapAsServerError => {
                        Err(Fault::from_code(FaultCode::ServerError, message))
                    }
                    ExceptionHandling::WrapWithExceptionCodeAndMessage => {
                        Err(Fault::new(-32000, message))
                    }
                }
            }
        };

        // 5. return coercion
        let parameters_type = entry.parameters_type.unwrap_or(self.config.default_parameters_type);
        match handler_result {
            Ok(HandlerOutput::Outcome(outcome)) => outcome,
            Ok(HandlerOutput::Value(value)) => coerce_return(value, parameters_type),
            Err(fault) => Outcome::Fault(fault),
        }
    }
}

/// Applies the `Epi` convention's return-value rule (spec §4.5 step 3/§6):
/// a "successful" return that is itself a `{faultCode, faultString}`
/// struct is a fault, not a two-member struct result. `TypedValue` and
/// `NativeValue` handlers never produce this shape by accident (their own
/// return type already dictates the wire shape), so this only ever changes
/// behavior for `Epi`-convention entries.
fn coerce_return(value: Value, parameters_type: ParametersType) -> Outcome {
    if parameters_type == ParametersType::Epi {
        if let Ok(s) = value.as_struct() {
            if let Ok(fault) = Fault::from_struct(s) {
                return Outcome::Fault(fault);
            }
        }
    }
    Outcome::Success(value)
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}

/// Signature soundness check (spec §4.5 step 2 / P3): for each alternative
/// signature whose arity matches, compare each parameter's runtime type
/// tag against the declared tag (`any` matches anything, `i4`≡`int`). On
/// failure, the message names the mismatch from the *last* alternative
/// tried, per the documented (not accidental) behavior in spec §9.
fn check_signature(signatures: &[Signature], params: &[Value]) -> Result<(), Fault> {
    let mut last_message: Option<String> = None;
    let mut any_right_arity = false;

    for signature in signatures {
        if signature.len() != params.len() + 1 {
            continue;
        }
        any_right_arity = true;

        let mut mismatch = None;
        for (index, (declared, actual)) in signature[1..].iter().zip(params.iter()).enumerate() {
            let actual_tag = actual.scalar_type();
            if !declared.accepts(actual_tag) {
                // 1-based, matching the wire contract's own wording
                // ("at param 1" for the first parameter) — see spec §8
                // scenario 3. This is independent of (and does not
                // reproduce) the separate off-by-one bug flagged for
                // `system.multicall`'s own error reporting.
                mismatch = Some(format!(
                    "Wanted {}, got {} at param {}",
                    declared.as_str(),
                    actual_tag.as_str(),
                    index + 1
                ));
                break;
            }
        }

        match mismatch {
            None => return Ok(()),
            Some(message) => last_message = Some(message),
        }
    }

    if !any_right_arity {
        return Err(Fault::from_code(FaultCode::IncorrectParams, "No method signature matches number of parameters"));
    }

    Err(Fault::from_code(
        FaultCode::IncorrectParams,
        last_message.unwrap_or_else(|| "signature mismatch".to_string()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sig(tags: &[&str]) -> Signature {
        tags.iter().map(|t| TypeTag::parse(t).unwrap()).collect()
    }

    #[test]
    fn signature_matches_exact_types() {
        let signatures = vec![sig(&["int", "int", "int"])];
        let params = vec![Value::i4(1), Value::i4(2)];
        assert!(check_signature(&signatures, &params).is_ok());
    }

    #[test]
    fn signature_reports_mismatch_with_index() {
        let signatures = vec![sig(&["int", "int", "int"])];
        let params = vec![Value::string("a".into()), Value::string("b".into())];
        let fault = check_signature(&signatures, &params).unwrap_err();
        assert!(fault.string.contains("Wanted int, got string at param 1"));
    }

    #[test]
    fn signature_arity_mismatch_uses_generic_message() {
        let signatures = vec![sig(&["int", "int", "int"])];
        let params = vec![Value::i4(1)];
        let fault = check_signature(&signatures, &params).unwrap_err();
        assert_eq!(fault.string, "No method signature matches number of parameters");
    }

    #[test]
    fn any_wildcard_matches_everything() {
        let signatures = vec![sig(&["string", "any"])];
        let params = vec![Value::i4(42)];
        assert!(check_signature(&signatures, &params).is_ok());
    }

    #[test]
    fn i4_and_int_are_the_same_tag() {
        assert_eq!(TypeTag::parse("i4"), TypeTag::parse("int"));
    }

    #[test]
    fn native_value_handler_converts_params_and_return() {
        let mut user_map = DispatchMap::new();
        user_map
            .register(
                "add",
                Arc::new(NativeFnHandler::new(|(a, b): (i32, i32)| Ok(a + b))),
                None,
                None,
                None,
                Some(ParametersType::NativeValue),
            )
            .unwrap();

        let engine = DispatchEngine::new(user_map, DispatchMap::new(), DispatchConfig::default());
        let request = Request {
            method_name: "add".to_string(),
            params: vec![Value::i4(2), Value::i4(3)],
        };
        let diagnostics = DiagnosticsSink::new();

        match engine.execute(&request, &Headers::new(), &diagnostics, None) {
            Outcome::Success(value) => assert_eq!(value.as_i4().unwrap(), 5),
            Outcome::Fault(fault) => panic!("unexpected fault: {fault:?}"),
        }
    }

    #[test]
    fn epi_handler_fault_shaped_return_becomes_a_fault() {
        use crate::value::Member;

        let mut user_map = DispatchMap::new();
        user_map
            .register(
                "risky",
                Arc::new(EpiFnHandler(|_name: &str, _params: &[Value], _user_data: Option<&dyn std::any::Any>| {
                    Ok(Value::structure(vec![
                        Member::new("faultCode".to_string(), Value::i4(42)),
                        Member::new("faultString".to_string(), Value::string("nope".to_string())),
                    ]))
                })),
                None,
                None,
                None,
                Some(ParametersType::Epi),
            )
            .unwrap();

        let engine = DispatchEngine::new(user_map, DispatchMap::new(), DispatchConfig::default());
        let request = Request {
            method_name: "risky".to_string(),
            params: vec![],
        };
        let diagnostics = DiagnosticsSink::new();

        match engine.execute(&request, &Headers::new(), &diagnostics, None) {
            Outcome::Fault(fault) => {
                assert_eq!(fault.code, 42);
                assert_eq!(fault.string, "nope");
            }
            Outcome::Success(value) => panic!("expected a fault, got {value:?}"),
        }
    }

    #[test]
    fn epi_handler_plain_value_stays_a_success() {
        let mut user_map = DispatchMap::new();
        user_map
            .register(
                "greet",
                Arc::new(EpiFnHandler(|_name: &str, _params: &[Value], _user_data: Option<&dyn std::any::Any>| {
                    Ok(Value::string("hi".to_string()))
                })),
                None,
                None,
                None,
                Some(ParametersType::Epi),
            )
            .unwrap();

        let engine = DispatchEngine::new(user_map, DispatchMap::new(), DispatchConfig::default());
        let request = Request {
            method_name: "greet".to_string(),
            params: vec![],
        };
        let diagnostics = DiagnosticsSink::new();

        match engine.execute(&request, &Headers::new(), &diagnostics, None) {
            Outcome::Success(value) => assert_eq!(value.as_str().unwrap(), "hi"),
            Outcome::Fault(fault) => panic!("unexpected fault: {fault:?}"),
        }
    }
}

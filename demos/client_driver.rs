//! # Driving the request engine directly
//!
//! Run with `cargo run --example client_driver --features server`.
//!
//! This does not open a socket — it feeds a hand-written XML-RPC request
//! document straight to [`RequestDriver::handle`], the same entry point the
//! `server` example's HTTP adapter calls per request, and prints the
//! resulting response document. Useful for seeing exactly what the engine
//! produces without standing up a listener or a separate client process
//! (this crate has no outbound/client-side code at all).

use std::sync::Arc;

use dxr::{CallContext, Fault, FromParams, Handler, HandlerOutput, Headers, RequestDriver, ToDXR};

struct HelloHandler;

impl Handler for HelloHandler {
    fn handle(&self, ctx: &CallContext) -> Result<HandlerOutput, Fault> {
        let name = String::from_params(ctx.params)?;
        Ok(format!("Hello, {name}!").to_dxr()?.into())
    }
}

fn main() {
    let driver = RequestDriver::builder()
        .add_method("hello", Arc::new(HelloHandler))
        .expect("\"hello\" is not a reserved method name")
        .build();

    let request = br#"<?xml version="1.0"?>
<methodCall>
  <methodName>hello</methodName>
  <params><param><value><string>DXR</string></value></param></params>
</methodCall>"#;

    let (body, _headers, response) = driver.handle(&Headers::new(), request);

    println!("fault: {}", response.is_fault());
    println!("{}", String::from_utf8_lossy(&body));
}

//! # Simple example server
//!
//! Run this example with `cargo run --example server --features server`. It
//! will listen on <http://0.0.0.0:3000> for incoming XML-RPC requests.
//!
//! ```python3
//! >>> import xmlrpc.client
//! >>> proxy = xmlrpc.client.ServerProxy("http://0.0.0.0:3000/")
//! >>> proxy.hello("DXR")
//! 'Hello, DXR!'
//! ```

use std::sync::Arc;

use dxr::{CallContext, Fault, FromParams, Handler, HandlerOutput, ServerBuilder, ToDXR};

struct HelloHandler;

impl Handler for HelloHandler {
    fn handle(&self, ctx: &CallContext) -> Result<HandlerOutput, Fault> {
        let name = String::from_params(ctx.params)?;
        Ok(format!("Hello, {name}!").to_dxr()?.into())
    }
}

#[tokio::main]
async fn main() {
    let server = ServerBuilder::new("0.0.0.0:3000".parse().unwrap())
        .add_method("hello", Arc::new(HelloHandler))
        .expect("\"hello\" is not a reserved method name")
        .build();

    server.serve().await.expect("failed to run server")
}

//! Minimal end-to-end demo: a server exposing an Echo interface, a client
//! invoking it, and the server calling back into the client.
//!
//! Run with: `cargo run --example echo`

use std::sync::Arc;
use std::time::Duration;

use saker::prelude::*;
use saker::{CallError, Caller};

static ECHO: InterfaceDef = InterfaceDef {
    name: "demo.Echo",
    methods: &[MethodDef {
        name: "ping",
        params: &[ArgKind::Str],
    }],
};

struct EchoProxy {
    caller: Caller,
}

impl Proxy for EchoProxy {
    const INTERFACE: &'static InterfaceDef = &ECHO;

    fn bind(caller: Caller) -> Self {
        Self { caller }
    }
}

impl EchoProxy {
    fn ping(&self, text: &str) -> Result<(), CallError> {
        self.caller.call("ping", vec![ArgValue::Str(text.into())])
    }
}

/// Server-side implementation: prints the call and answers by invoking the
/// caller's own Echo interface.
struct AnsweringEcho {
    remote: Remote,
}

impl FromRemote for AnsweringEcho {
    fn from_remote(remote: Remote) -> Self {
        Self { remote }
    }
}

impl ServiceImpl for AnsweringEcho {
    fn invoke(&self, call: CallArgs<'_>) -> Result<(), InvokeFault> {
        let text: String = call.arg(0)?;
        println!("server <- {} : {text}", self.remote.id());
        let echo: EchoProxy = self.remote.proxy();
        echo.ping(&format!("re: {text}"))
            .map_err(|e| InvokeFault::failed(e.to_string()))
    }
}

/// Client-side implementation: just prints what the server sends back.
struct PrintingEcho;

impl ServiceImpl for PrintingEcho {
    fn invoke(&self, call: CallArgs<'_>) -> Result<(), InvokeFault> {
        let text: String = call.arg(0)?;
        println!("client <- {text}");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut server = ServerBuilder::new()
        .add_class::<AnsweringEcho>(&ECHO)?
        .keepalive(Duration::from_secs(5))
        .bind("127.0.0.1:0")
        .await?;
    println!("server listening on {}", server.local_addr());

    let mut client = ClientBuilder::new()
        .add_object(&ECHO, Arc::new(PrintingEcho))?
        .connect(server.local_addr())
        .await?;

    let echo: EchoProxy = client.proxy();
    echo.ping("hello")?;
    echo.ping("world")?;

    // Fire-and-forget calls need a moment to land before we tear down.
    tokio::time::sleep(Duration::from_millis(200)).await;

    client.shutdown().await?;
    server.shutdown().await?;
    Ok(())
}

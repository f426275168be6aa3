//! Minimal end-to-end walk-through: a loopback bridge, one host channel
//! with a sync and an async method, two calls, one pump loop.

use std::sync::Arc;
use std::sync::mpsc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use log::info;

use message_bridge::{Bridge, CallError, MethodResult, MethodTable, Value, set_global_bridge};

fn main() -> Result<()> {
    message_bridge::init_logging();

    let bridge = Bridge::new_loopback();
    set_global_bridge(bridge.clone());

    bridge.register(
        "demo/host",
        MethodTable::new()
            .sync_method("echoInt", |args| {
                let n = args
                    .as_i64()
                    .map_err(|e| CallError::new("type-error", e.to_string()))?;
                Ok(Value::Int64(n))
            })
            .async_method("shoutString", |args, responder| {
                // Completes from a worker thread; the bridge marshals the
                // reply back onto the owning thread.
                std::thread::spawn(move || match args.as_str() {
                    Ok(s) => responder.success(Value::from(s.to_uppercase())),
                    Err(e) => responder.error(CallError::new("type-error", e.to_string())),
                });
            }),
    );
    info!("[Demo] host channel registered");

    let echoed =
        call_and_pump(&bridge, "echoInt", Value::Int64(5)).context("calling echoInt")?;
    info!("[Demo] echoInt(5) -> {:?}", echoed);

    let shouted = call_and_pump(&bridge, "shoutString", Value::from("hello bridge"))
        .context("calling shoutString")?;
    info!("[Demo] shoutString(\"hello bridge\") -> {:?}", shouted);

    bridge.shutdown();
    Ok(())
}

fn call_and_pump(bridge: &Arc<Bridge>, method: &str, arguments: Value) -> Result<Value> {
    let (tx, rx) = mpsc::channel();
    bridge.invoke("demo/host", method, arguments, move |result| {
        let _ = tx.send(result);
    });

    // Sync handlers resolve inline; async ones need the owning thread to
    // pump until the worker's completion lands.
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    loop {
        match rx.try_recv() {
            Ok(MethodResult::Success(value)) => return Ok(value),
            Ok(MethodResult::Error(e)) => bail!("{} failed: {}", method, e),
            Ok(MethodResult::Unimplemented) => bail!("{} is not implemented", method),
            Ok(MethodResult::Cancelled) => bail!("{} was cancelled", method),
            Err(mpsc::TryRecvError::Empty) => {
                if std::time::Instant::now() >= deadline {
                    bail!("timed out waiting for {}", method);
                }
                bridge.pump_wait(Duration::from_millis(50));
            }
            Err(mpsc::TryRecvError::Disconnected) => {
                bail!("completion for {} was dropped", method)
            }
        }
    }
}

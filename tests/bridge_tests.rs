//! End-to-end scenarios over a loopback bridge: echo, unimplemented,
//! truncation, fault isolation, cross-thread completion, cancellation,
//! ordering.

use std::sync::Arc;
use std::sync::mpsc;
use std::time::Duration;

use message_bridge::{
    Bridge, CallError, DecodeError, MethodResult, MethodTable, Value, codec, envelope,
};

fn echo_bridge() -> Arc<Bridge> {
    let bridge = Bridge::new_loopback();
    bridge.register(
        "test/host",
        MethodTable::new().sync_method("echoInt", |args| {
            let n = args.as_i64().map_err(|e| CallError::new("type-error", e.to_string()))?;
            Ok(Value::Int64(n))
        }),
    );
    bridge
}

#[test]
fn echo_int_round_trip() {
    let bridge = echo_bridge();
    let (tx, rx) = mpsc::channel();
    bridge.invoke("test/host", "echoInt", Value::Int64(5), move |r| tx.send(r).unwrap());
    assert_eq!(rx.recv().unwrap(), MethodResult::Success(Value::Int64(5)));
}

#[test]
fn unregistered_method_is_unimplemented() {
    let bridge = echo_bridge();
    let (tx, rx) = mpsc::channel();
    bridge.invoke("test/host", "doesNotExist", Value::Null, move |r| tx.send(r).unwrap());
    assert_eq!(rx.recv().unwrap(), MethodResult::Unimplemented);
}

#[test]
fn unregistered_channel_still_resolves_the_call() {
    let bridge = Bridge::new_loopback();
    let (tx, rx) = mpsc::channel();
    bridge.invoke("test/ghost", "anything", Value::Null, move |r| tx.send(r).unwrap());
    assert_eq!(rx.recv().unwrap(), MethodResult::Unimplemented);
}

#[test]
fn truncated_envelope_is_a_typed_decode_failure() {
    let encoded = codec::encode(&Value::List(vec![Value::from("abc"), Value::Int64(5)]));
    let truncated = &encoded[..encoded.len() - 3];
    assert_eq!(codec::decode(truncated), Err(DecodeError::TruncatedInput));

    // Fed through a live dispatcher, the same bytes come back as an error
    // response, not a crash or silence.
    let bridge = echo_bridge();
    let reply = bridge.handle_message_sync("test/host", truncated).unwrap();
    match envelope::decode_response(&reply).unwrap() {
        MethodResult::Error(e) => assert_eq!(e.code, envelope::DECODE_ERROR_CODE),
        other => panic!("unexpected outcome: {:?}", other),
    }
}

#[test]
fn handler_fault_is_isolated_across_channels() {
    let bridge = echo_bridge();
    bridge.register(
        "test/fragile",
        MethodTable::new().sync_method("explode", |_| -> Result<Value, CallError> {
            panic!("handler bug")
        }),
    );

    let (tx, rx) = mpsc::channel();
    bridge.invoke("test/fragile", "explode", Value::Null, move |r| tx.send(r).unwrap());
    match rx.recv().unwrap() {
        MethodResult::Error(e) => {
            assert_eq!(e.code, envelope::INTERNAL_ERROR_CODE);
            assert_eq!(e.message, "handler bug");
        }
        other => panic!("unexpected outcome: {:?}", other),
    }

    // An unrelated channel keeps working after the fault...
    let (tx, rx) = mpsc::channel();
    bridge.invoke("test/host", "echoInt", Value::Int64(7), move |r| tx.send(r).unwrap());
    assert_eq!(rx.recv().unwrap(), MethodResult::Success(Value::Int64(7)));

    // ...and so does the faulting channel itself: it still dispatches and
    // still contains the fault.
    let (tx, rx) = mpsc::channel();
    bridge.invoke("test/fragile", "explode", Value::Null, move |r| tx.send(r).unwrap());
    match rx.recv().unwrap() {
        MethodResult::Error(e) => assert_eq!(e.code, envelope::INTERNAL_ERROR_CODE),
        other => panic!("unexpected outcome: {:?}", other),
    }
}

#[test]
fn async_handler_completes_from_background_thread() {
    let bridge = Bridge::new_loopback();
    bridge.register(
        "test/host",
        MethodTable::new().async_method("lateEcho", |args, responder| {
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                responder.success(args);
            });
        }),
    );

    let (tx, rx) = mpsc::channel();
    bridge.invoke("test/host", "lateEcho", Value::from("ping"), move |r| tx.send(r).unwrap());

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    let result = loop {
        if let Ok(r) = rx.try_recv() {
            break r;
        }
        assert!(std::time::Instant::now() < deadline, "async reply never arrived");
        bridge.pump_wait(Duration::from_millis(50));
    };
    assert_eq!(result, MethodResult::Success(Value::from("ping")));
}

#[test]
fn completion_after_teardown_is_observed_as_cancelled() {
    let bridge = Bridge::new_loopback();
    let (release_tx, release_rx) = mpsc::channel();
    let (held_tx, held_rx) = mpsc::channel();
    bridge.register(
        "test/host",
        MethodTable::new().async_method("hang", move |_args, responder| {
            held_tx.send(responder).unwrap();
        }),
    );

    let (tx, rx) = mpsc::channel();
    bridge.invoke("test/host", "hang", Value::Null, move |r| tx.send(r).unwrap());
    let responder = held_rx.recv().unwrap();

    // Background thread completes only after the owner tears down.
    let worker = std::thread::spawn(move || {
        release_rx.recv().unwrap();
        responder.success(Value::from("too late"));
    });

    bridge.shutdown();
    assert_eq!(rx.recv().unwrap(), MethodResult::Cancelled);

    release_tx.send(()).unwrap();
    worker.join().unwrap();
    // The stale reply is produced on the queue and then suppressed by the
    // cancelled caller; the completion must not fire a second time.
    bridge.pump();
    assert!(rx.try_recv().is_err());
}

#[test]
fn responses_arrive_in_request_order() {
    let bridge = Bridge::new_loopback();
    bridge.register(
        "test/host",
        MethodTable::new().sync_method("echoInt", |args| Ok(args)),
    );

    let (tx, rx) = mpsc::channel();
    for i in 0..10i64 {
        let tx = tx.clone();
        bridge.invoke("test/host", "echoInt", Value::Int64(i), move |r| {
            tx.send(r).unwrap();
        });
    }
    for i in 0..10i64 {
        assert_eq!(rx.recv().unwrap(), MethodResult::Success(Value::Int64(i)));
    }
}

#[test]
fn unregister_then_call_yields_unimplemented() {
    let bridge = echo_bridge();
    bridge.unregister("test/host");
    bridge.unregister("test/host"); // idempotent

    let (tx, rx) = mpsc::channel();
    bridge.invoke("test/host", "echoInt", Value::Int64(5), move |r| tx.send(r).unwrap());
    assert_eq!(rx.recv().unwrap(), MethodResult::Unimplemented);
}

#[test]
fn typed_argument_error_propagates_verbatim() {
    let bridge = echo_bridge();
    let (tx, rx) = mpsc::channel();
    bridge.invoke("test/host", "echoInt", Value::from("not an int"), move |r| {
        tx.send(r).unwrap()
    });
    match rx.recv().unwrap() {
        MethodResult::Error(e) => {
            assert_eq!(e.code, "type-error");
            assert!(e.message.contains("expected int64"));
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
}

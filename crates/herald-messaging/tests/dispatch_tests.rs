// Integration tests for handler dispatch

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::bail;
use herald_messaging::{
    payload, BusConfig, FailureKind, MessageBus, MessageError, MessageKey, Timeout, Value,
};

fn recorder() -> Arc<Mutex<Vec<String>>> {
    Arc::new(Mutex::new(Vec::new()))
}

fn entries(log: &Arc<Mutex<Vec<String>>>) -> Vec<String> {
    log.lock().unwrap().clone()
}

#[test]
fn test_ping_scenario() {
    let bus = MessageBus::new();
    let log = recorder();

    let a = Arc::clone(&log);
    bus.on_message("Ping", move |_| {
        a.lock().unwrap().push("A".to_string());
        Ok(())
    })
    .unwrap();

    bus.send("Ping", payload![]).unwrap();
    assert_eq!(entries(&log), vec!["A"]);

    let b = Arc::clone(&log);
    bus.on_message("Ping", move |_| {
        b.lock().unwrap().push("B".to_string());
        Ok(())
    })
    .unwrap();

    let report = bus.send("Ping", payload![]).unwrap();
    assert_eq!(report.handlers_run, 2);
    assert_eq!(entries(&log), vec!["A", "A", "B"]);
}

#[test]
fn test_handlers_receive_payload() {
    let bus = MessageBus::new();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let sink = Arc::clone(&seen);
    bus.on_message("Chat", move |args| {
        let text = args.get(0).and_then(Value::as_str).unwrap_or_default();
        let channel = args.get(1).and_then(Value::as_int).unwrap_or(-1);
        sink.lock().unwrap().push(format!("{}:{}", channel, text));
        Ok(())
    })
    .unwrap();

    bus.send("Chat", payload!["hello", 3]).unwrap();
    assert_eq!(*seen.lock().unwrap(), vec!["3:hello".to_string()]);
}

#[test]
fn test_order_is_per_key_across_interleaved_registration() {
    let bus = MessageBus::new();
    let log = recorder();

    for (key, name) in [("X", "x1"), ("Y", "y1"), ("X", "x2"), ("Y", "y2"), ("X", "x3")] {
        let log = Arc::clone(&log);
        bus.on_message(key, move |_| {
            log.lock().unwrap().push(name.to_string());
            Ok(())
        })
        .unwrap();
    }

    bus.send("X", ()).unwrap();
    bus.send("Y", ()).unwrap();
    assert_eq!(entries(&log), vec!["x1", "x2", "x3", "y1", "y2"]);
}

#[test]
fn test_clear_then_send_runs_nothing() {
    let bus = MessageBus::new();
    let log = recorder();

    let first = Arc::clone(&log);
    bus.on_message("Tick", move |_| {
        first.lock().unwrap().push("first".to_string());
        Ok(())
    })
    .unwrap();

    assert_eq!(bus.clear_message("Tick").unwrap(), 1);
    let report = bus.send("Tick", ()).unwrap();

    assert_eq!(report.handlers_run, 0);
    assert!(entries(&log).is_empty());
    assert_eq!(bus.clear_message("Tick").unwrap(), 0);
}

#[test]
fn test_reregistered_handlers_sort_after_earlier_ones() {
    let bus = MessageBus::new();
    let early = bus.on_message("Load", |_| Ok(())).unwrap();
    bus.clear_message("Load").unwrap();
    let late = bus.on_message("Load", |_| Ok(())).unwrap();

    assert!(late.sequence() > early.sequence());
}

#[test]
fn test_clear_does_not_touch_waiters() {
    let bus = MessageBus::new();
    bus.on_message("Door", |_| Ok(())).unwrap();
    let _pending = bus.enqueue_wait("Door", Timeout::Never).unwrap();

    bus.clear_message("Door").unwrap();
    assert_eq!(bus.pending_waiters("Door"), 1);
}

#[test]
fn test_failing_handler_does_not_stop_others() {
    let bus = MessageBus::new();
    let log = recorder();

    bus.on_message_labeled("Save", "broken", |_| bail!("disk full"))
        .unwrap();
    bus.on_message_labeled("Save", "panicky", |_| panic!("bad state"))
        .unwrap();
    let last = Arc::clone(&log);
    bus.on_message("Save", move |_| {
        last.lock().unwrap().push("last".to_string());
        Ok(())
    })
    .unwrap();

    let report = bus.send("Save", ()).unwrap();

    assert_eq!(report.handlers_run, 3);
    assert_eq!(entries(&log), vec!["last"]);
    assert_eq!(report.failures.len(), 2);
    assert_eq!(report.failures[0].label.as_deref(), Some("broken"));
    assert_eq!(
        report.failures[0].kind,
        FailureKind::Error("disk full".to_string())
    );
    assert_eq!(
        report.failures[1].kind,
        FailureKind::Panicked("bad state".to_string())
    );
    assert!(!report.is_clean());
}

#[test]
fn test_panic_unwinds_through_send_when_not_isolated() {
    let bus = MessageBus::with_config(BusConfig {
        isolate_panics: false,
        ..BusConfig::default()
    });
    let log = recorder();

    bus.on_message("Boom", |_| panic!("not isolated")).unwrap();
    let after = Arc::clone(&log);
    bus.on_message("Boom", move |_| {
        after.lock().unwrap().push("after".to_string());
        Ok(())
    })
    .unwrap();
    let _pending = bus.enqueue_wait("Boom", Timeout::Never).unwrap();

    let caught = panic::catch_unwind(AssertUnwindSafe(|| bus.send("Boom", ()))).unwrap_err();
    assert_eq!(caught.downcast_ref::<&str>(), Some(&"not isolated"));

    // The send stopped at the panicking handler and never reached the waiters.
    assert!(entries(&log).is_empty());
    assert_eq!(bus.pending_waiters("Boom"), 1);

    // The handler frame was unwound too, so waiting is allowed again on this thread.
    assert!(bus.enqueue_wait("Other", Timeout::Never).is_ok());
}

#[test]
fn test_slow_handler_still_completes_send() {
    let bus = MessageBus::with_config(BusConfig {
        slow_handler_warn_ms: Some(1),
        ..BusConfig::default()
    });
    let log = recorder();

    bus.on_message_labeled("Save", "slow", |_| {
        std::thread::sleep(Duration::from_millis(20));
        Ok(())
    })
    .unwrap();
    let fast = Arc::clone(&log);
    bus.on_message_labeled("Save", "fast", move |_| {
        fast.lock().unwrap().push("fast".to_string());
        Ok(())
    })
    .unwrap();

    let report = bus.send("Save", ()).unwrap();
    assert!(report.is_clean());
    assert_eq!(report.handlers_run, 2);
    assert_eq!(entries(&log), vec!["fast"]);
}

#[test]
fn test_handler_cannot_wait() {
    let bus = MessageBus::new();
    let inner = bus.clone();
    let refused = Arc::new(Mutex::new(None));

    let sink = Arc::clone(&refused);
    bus.on_message("Start", move |_| {
        let result = inner.enqueue_wait("Done", Timeout::Never);
        *sink.lock().unwrap() = result.err();
        Ok(())
    })
    .unwrap();

    let report = bus.send("Start", ()).unwrap();

    assert_eq!(
        *refused.lock().unwrap(),
        Some(MessageError::HandlerSuspension {
            key: MessageKey::from("Done")
        })
    );
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].kind, FailureKind::SuspensionViolation);
    assert_eq!(bus.pending_waiters("Done"), 0);

    bus.shutdown();
}

#[test]
fn test_propagated_suspension_error_is_reported_once() {
    let bus = MessageBus::new();
    let inner = bus.clone();
    bus.on_message("Start", move |_| {
        let _pending = inner.enqueue_wait("Done", Timeout::Never)?;
        Ok(())
    })
    .unwrap();

    let report = bus.send("Start", ()).unwrap();
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].kind, FailureKind::SuspensionViolation);

    // Outside a handler the same call is fine.
    assert!(bus.enqueue_wait("Done", Timeout::Never).is_ok());
    bus.shutdown();
}

#[test]
fn test_handler_registered_during_send_waits_for_next_send() {
    let bus = MessageBus::new();
    let inner = bus.clone();
    let log = recorder();

    let late = Arc::clone(&log);
    let registered = Arc::new(Mutex::new(false));
    let once = Arc::clone(&registered);
    bus.on_message("Boot", move |_| {
        let mut done = once.lock().unwrap();
        if !*done {
            *done = true;
            let late = Arc::clone(&late);
            inner.on_message("Boot", move |_| {
                late.lock().unwrap().push("late".to_string());
                Ok(())
            })?;
        }
        Ok(())
    })
    .unwrap();

    assert_eq!(bus.send("Boot", ()).unwrap().handlers_run, 1);
    assert!(entries(&log).is_empty());

    assert_eq!(bus.send("Boot", ()).unwrap().handlers_run, 2);
    assert_eq!(entries(&log), vec!["late"]);

    bus.shutdown();
}

#[test]
fn test_handlers_may_send_other_messages() {
    let bus = MessageBus::new();
    let inner = bus.clone();
    let log = recorder();

    let outer = Arc::clone(&log);
    bus.on_message("Outer", move |_| {
        outer.lock().unwrap().push("outer-start".to_string());
        inner.send("Inner", payload![1])?;
        outer.lock().unwrap().push("outer-end".to_string());
        Ok(())
    })
    .unwrap();

    let nested = Arc::clone(&log);
    bus.on_message("Inner", move |_| {
        nested.lock().unwrap().push("inner".to_string());
        Ok(())
    })
    .unwrap();

    assert!(bus.send("Outer", ()).unwrap().is_clean());
    assert_eq!(entries(&log), vec!["outer-start", "inner", "outer-end"]);

    bus.shutdown();
}

#[test]
fn test_shared_payload_is_forwarded_by_reference() {
    #[derive(Default)]
    struct SaveTable {
        entries: Vec<(String, i64)>,
    }

    let bus = MessageBus::new();
    bus.on_message("SaveData", |args| {
        if let Some(table) = args.get(0).and_then(Value::downcast::<Mutex<SaveTable>>) {
            table.lock().unwrap().entries.push(("gold".to_string(), 120));
        }
        Ok(())
    })
    .unwrap();
    bus.on_message("SaveData", |args| {
        if let Some(table) = args.get(0).and_then(Value::downcast::<Mutex<SaveTable>>) {
            table.lock().unwrap().entries.push(("level".to_string(), 4));
        }
        Ok(())
    })
    .unwrap();

    let table = Arc::new(Mutex::new(SaveTable::default()));
    bus.send("SaveData", payload![Value::from_arc(Arc::clone(&table))])
        .unwrap();

    assert_eq!(
        table.lock().unwrap().entries,
        vec![("gold".to_string(), 120), ("level".to_string(), 4)]
    );
}

#[test]
fn test_keys_of_different_kinds_are_distinct() {
    let bus = MessageBus::new();
    let object = Arc::new("player".to_string());
    let token = MessageKey::unique();

    bus.on_message(MessageKey::identity_of(&object), |_| Ok(()))
        .unwrap();
    bus.on_message(token.clone(), |_| Ok(())).unwrap();
    bus.on_message("player", |_| Ok(())).unwrap();

    assert_eq!(
        bus.send(MessageKey::identity_of(&object), ())
            .unwrap()
            .handlers_run,
        1
    );
    assert_eq!(bus.send(token, ()).unwrap().handlers_run, 1);
    assert_eq!(bus.send(MessageKey::unique(), ()).unwrap().handlers_run, 0);
}

#[test]
fn test_concurrent_senders_on_threads() {
    let bus = MessageBus::new();
    let count = Arc::new(Mutex::new(0u32));

    let counter = Arc::clone(&count);
    bus.on_message("Hit", move |_| {
        *counter.lock().unwrap() += 1;
        Ok(())
    })
    .unwrap();

    let threads: Vec<_> = (0..4)
        .map(|_| {
            let bus = bus.clone();
            std::thread::spawn(move || {
                for _ in 0..25 {
                    bus.send("Hit", ()).unwrap();
                }
            })
        })
        .collect();
    for thread in threads {
        thread.join().unwrap();
    }

    assert_eq!(*count.lock().unwrap(), 100);
}

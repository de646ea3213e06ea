use super::*;
use crate::receiver::{ReceiverKey, ReceiverResult};
use crate::sender::SenderKey;
use crate::test_utils::{CallRecorder, init_tracing};
use std::collections::HashSet;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::AtomicUsize;
use std::thread;

struct Device {
    id: u32,
}

fn device(id: u32) -> Tracked<Device> {
    Tracked::new(Device { id })
}

fn report(device: &Device, _sender: &Sender, _payload: &()) -> ReceiverResult<u32> {
    Ok(device.id)
}

fn pairs(results: Vec<(Receiver<(), i64>, i64)>) -> HashSet<(ReceiverKey, i64)> {
    results
        .into_iter()
        .map(|(receiver, value)| (receiver.key(), value))
        .collect()
}

#[test]
fn test_send_without_connections_is_empty() {
    let signal: Signal<(), i64> = Signal::named("idle");

    assert!(signal.send(ANY, &()).unwrap().is_empty());
    assert!(signal.send("anyone", &()).unwrap().is_empty());
    assert!(!signal.has_receivers_for(ANY));
    assert_eq!(signal.connection_count(), 0);
}

#[test]
fn test_scenario_any_receiver_gets_send() {
    init_tracing();
    let signal: Signal<(), i64> = Signal::named("ready");
    let recorder = CallRecorder::new();
    let f = signal.connect(&recorder.receiver(1)).unwrap();
    let obj = device(1);

    let results = signal.send(&obj, &()).unwrap();

    assert_eq!(pairs(results), HashSet::from([(f.key(), 1)]));
    assert_eq!(recorder.calls(), vec![Sender::tracked(&obj).key()]);
}

#[test]
fn test_scenario_sender_filter() {
    let signal: Signal<(), i64> = Signal::named("ready");
    let recorder = CallRecorder::new();
    let obj1 = device(1);
    let obj2 = device(2);
    let f = signal.connect_via(&recorder.receiver(2), &obj2).unwrap();

    assert!(signal.send(&obj1, &()).unwrap().is_empty());
    assert_eq!(
        pairs(signal.send(&obj2, &()).unwrap()),
        HashSet::from([(f.key(), 2)])
    );
    assert_eq!(recorder.count(), 1);
}

#[test]
fn test_scenario_disconnect_any_removes_all_records() {
    let signal: Signal<(), i64> = Signal::named("ready");
    let recorder = CallRecorder::new();
    let f = recorder.receiver(0);

    signal.connect(&f).unwrap();
    signal.connect_via(&f, "a").unwrap();
    signal.connect_via(&f, "b").unwrap();
    signal.connect_via(&f, 7).unwrap();
    assert_eq!(signal.connection_count(), 4);

    signal.disconnect(&f).unwrap();

    assert_eq!(signal.connection_count(), 0);
    assert!(signal.send("a", &()).unwrap().is_empty());
    assert_eq!(recorder.count(), 0);
}

#[test]
fn test_scenario_receiver_failure_is_not_rolled_back() {
    let signal: Signal<(), i64> = Signal::named("ready");
    let effects = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let calls = effects.clone();
    let failing: Receiver<(), i64> = Receiver::new(move |sender, _| {
        calls.lock().push(sender.key());
        Err("sensor offline".into())
    });
    signal.connect(&failing).unwrap();

    let err = signal.send("tester", &()).unwrap_err();

    assert!(err.is_receiver_error());
    assert_eq!(err.receiver(), Some(failing.key()));
    assert_eq!(err.to_string(), format!("receiver {} failed: sensor offline", failing.key()));
    assert_eq!(err.into_receiver_error().unwrap().to_string(), "sensor offline");
    assert_eq!(*effects.lock(), vec![SenderKey::Text("tester".into())]);
}

#[test]
fn test_failure_aborts_remaining_receivers() {
    let signal: Signal<(), i64> = Signal::new();
    let recorder = CallRecorder::new();
    let healthy = recorder.receiver(1);
    let failing: Receiver<(), i64> = Receiver::new(|_, _| Err("boom".into()));
    signal.connect(&healthy).unwrap();
    signal.connect(&failing).unwrap();

    assert!(signal.send(ANY, &()).is_err());
    // Order is unspecified, so the healthy receiver ran at most once
    assert!(recorder.count() <= 1);

    signal.disconnect(&failing).unwrap();
    assert_eq!(signal.send(ANY, &()).unwrap().len(), 1);
}

#[test]
fn test_connect_twice_yields_one_record() {
    let signal: Signal<(), i64> = Signal::new();
    let recorder = CallRecorder::new();
    let receiver = recorder.receiver(5);

    let first = signal.connect(&receiver).unwrap();
    let second = signal.connect(&receiver).unwrap();

    assert_eq!(first, receiver);
    assert_eq!(second, receiver);
    assert_eq!(signal.connection_count(), 1);
    assert_eq!(signal.send(ANY, &()).unwrap().len(), 1);
    assert_eq!(recorder.count(), 1);
}

#[test]
fn test_method_receivers_collapse() {
    let signal: Signal<(), u32> = Signal::new();
    let sensor = device(9);

    signal.connect(&Receiver::method(&sensor, report)).unwrap();
    signal.connect(&Receiver::method(&sensor, report)).unwrap();

    let results = signal.send(ANY, &()).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].1, 9);
}

#[test]
fn test_any_and_specific_receivers() {
    let signal: Signal<(), i64> = Signal::new();
    let recorder = CallRecorder::new();
    let wildcard = signal.connect(&recorder.receiver(0)).unwrap();
    let specific = signal.connect_via(&recorder.receiver(1), "s").unwrap();

    assert_eq!(
        pairs(signal.send("s", &()).unwrap()),
        HashSet::from([(wildcard.key(), 0), (specific.key(), 1)])
    );
    assert_eq!(
        pairs(signal.send("other", &()).unwrap()),
        HashSet::from([(wildcard.key(), 0)])
    );
    assert_eq!(
        pairs(signal.send(ANY, &()).unwrap()),
        HashSet::from([(wildcard.key(), 0)])
    );
}

#[test]
fn test_text_senders_match_by_value() {
    let signal: Signal<(), i64> = Signal::new();
    let recorder = CallRecorder::new();
    let _receiver = signal
        .connect_via(&recorder.receiver(0), String::from("sensor"))
        .unwrap();

    let name = ["sen", "sor"].concat();
    assert_eq!(signal.send(name.as_str(), &()).unwrap().len(), 1);
}

#[test]
fn test_connect_disconnect_round_trip() {
    let signal: Signal<(), i64> = Signal::new();
    let receiver = CallRecorder::new().receiver(0);
    let sender = device(3);

    signal.connect_via(&receiver, &sender).unwrap();
    assert!(signal.has_receivers_for(&sender));

    signal.disconnect_from(&receiver, &sender).unwrap();
    assert!(!signal.has_receivers_for(&sender));

    // Idempotent
    signal.disconnect_from(&receiver, &sender).unwrap();
    signal.disconnect(&receiver).unwrap();
}

#[test]
fn test_weak_receiver_removed_on_drop() {
    let signal: Signal<(), i64> = Signal::new();
    let receiver = CallRecorder::new().receiver(0);
    signal.connect_via(&receiver, "s").unwrap();

    drop(receiver);

    assert_eq!(signal.receivers_for("s").count(), 0);
    assert_eq!(signal.connection_count(), 0);
}

#[test]
fn test_strong_receiver_survives_drop() {
    let signal: Signal<(), i64> = Signal::new();
    let recorder = CallRecorder::new();
    signal
        .connect_with(&recorder.receiver(0), ANY, Strength::Strong)
        .unwrap();

    assert_eq!(signal.send(ANY, &()).unwrap().len(), 1);
    assert_eq!(recorder.count(), 1);
}

#[test]
fn test_signal_as_weak_sender() {
    let signal: Signal<(), i64> = Signal::new();
    let source: Signal<(), i64> = Signal::named("source");
    let receiver = CallRecorder::new().receiver(0);
    signal.connect_via(&receiver, &source).unwrap();

    assert_eq!(signal.send(&source, &()).unwrap().len(), 1);
    assert_eq!(signal.connections()[0].sender_strength, Strength::Weak);

    drop(source);
    assert_eq!(signal.connection_count(), 0);
}

#[test]
fn test_send_args_sender_count() {
    let signal: Signal<(), i64> = Signal::new();
    let recorder = CallRecorder::new();
    let _receiver = signal.connect(&recorder.receiver(0)).unwrap();

    assert_eq!(signal.send_args(&[], &()).unwrap().len(), 1);
    assert_eq!(recorder.calls(), vec![SenderKey::Any]);

    let err = signal
        .send_args(&[Sender::int(1), Sender::int(2)], &())
        .unwrap_err();
    assert!(matches!(err, SignalError::MultipleSenders { count: 2 }));
    assert_eq!(recorder.count(), 1, "nothing dispatched on a usage error");

    assert_eq!(signal.send_args(&[Sender::int(1)], &()).unwrap().len(), 1);
}

#[test]
fn test_connect_hook_reports_receiver_and_sender() {
    let signal: Signal<(), i64> = Signal::named("ready");
    let events = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let seen = events.clone();
    let hook = Receiver::new(move |sender: &Sender, event: &HookEvent| {
        seen.lock().push((sender.key(), event.clone()));
        Ok(())
    });
    signal.receiver_connected().connect(&hook).unwrap();

    let receiver = CallRecorder::new().receiver(0);
    signal.connect_via(&receiver, "s").unwrap();

    let events = events.lock();
    assert_eq!(events.len(), 1);
    let (hook_sender, event) = &events[0];
    assert_eq!(*hook_sender, Sender::from(&signal).key());
    assert_eq!(event.receiver_key, receiver.key());
    assert_eq!(event.receiver::<(), i64>(), Some(&receiver));
    assert!(event.receiver::<(), u8>().is_none());
    assert_eq!(event.sender, Sender::text("s"));
    assert_eq!(event.weak, Some(true));
    assert!(event.is_connect());
}

#[test]
fn test_disconnect_hook_fires_per_removed_record() {
    let signal: Signal<(), i64> = Signal::new();
    let senders = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let seen = senders.clone();
    let hook = Receiver::new(move |_: &Sender, event: &HookEvent| {
        assert_eq!(event.weak, None);
        seen.lock().push(event.sender.key());
        Ok(())
    });
    signal.receiver_disconnected().connect(&hook).unwrap();

    let receiver = CallRecorder::new().receiver(0);
    signal.connect_via(&receiver, "a").unwrap();
    signal.connect_via(&receiver, "b").unwrap();
    signal.disconnect(&receiver).unwrap();

    let fired: HashSet<SenderKey> = senders.lock().iter().cloned().collect();
    assert_eq!(
        fired,
        HashSet::from([SenderKey::Text("a".into()), SenderKey::Text("b".into())])
    );

    // Nothing left to remove, nothing fired
    signal.disconnect(&receiver).unwrap();
    assert_eq!(senders.lock().len(), 2);
}

#[test]
fn test_disconnect_hook_silent_on_expiry() {
    let signal: Signal<(), i64> = Signal::new();
    let fired = Arc::new(AtomicUsize::new(0));
    let counter = fired.clone();
    let hook = Receiver::new(move |_: &Sender, _: &HookEvent| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    signal.receiver_disconnected().connect(&hook).unwrap();

    let receiver = CallRecorder::new().receiver(0);
    signal.connect(&receiver).unwrap();
    drop(receiver);

    assert_eq!(signal.connection_count(), 0);
    assert_eq!(fired.load(Ordering::SeqCst), 0);
}

#[test]
fn test_failing_connect_hook_rolls_back() {
    let signal: Signal<(), i64> = Signal::new();
    let veto = Receiver::new(|_: &Sender, _: &HookEvent| Err("not allowed".into()));
    signal.receiver_connected().connect(&veto).unwrap();

    let err = signal
        .connect(&CallRecorder::new().receiver(0))
        .unwrap_err();

    assert_eq!(err.receiver(), Some(veto.key()));
    assert_eq!(signal.connection_count(), 0);
}

#[test]
fn test_failed_any_connect_keeps_sender_specific_records() {
    let signal: Signal<(), i64> = Signal::new();
    let receiver = CallRecorder::new().receiver(0);
    signal.connect_via(&receiver, "specific").unwrap();

    let veto = Receiver::new(|_: &Sender, _: &HookEvent| Err("not allowed".into()));
    signal.receiver_connected().connect(&veto).unwrap();
    assert!(signal.connect(&receiver).is_err());

    let connections = signal.connections();
    assert_eq!(connections.len(), 1);
    assert_eq!(connections[0].sender, SenderKey::Text("specific".into()));
    assert_eq!(signal.send("specific", &()).unwrap().len(), 1);
    assert!(signal.send("elsewhere", &()).unwrap().is_empty());
}

#[test]
fn test_failed_reconnect_restores_previous_record() {
    let signal: Signal<(), i64> = Signal::new();
    let receiver = CallRecorder::new().receiver(0);
    signal.connect_with(&receiver, "s", Strength::Strong).unwrap();

    let veto = Receiver::new(|_: &Sender, _: &HookEvent| Err("not allowed".into()));
    signal.receiver_connected().connect(&veto).unwrap();
    assert!(signal.connect_via(&receiver, "s").is_err());

    let connections = signal.connections();
    assert_eq!(connections.len(), 1);
    assert_eq!(connections[0].strength, Strength::Strong);

    // Still held strongly
    drop(receiver);
    assert_eq!(signal.send("s", &()).unwrap().len(), 1);
}

#[test]
fn test_hooks_are_lazy_and_per_signal() {
    let first: Signal<(), i64> = Signal::named("first");
    let second: Signal<(), i64> = Signal::named("second");

    assert!(first.core.connected_hook.get().is_none());
    let hook = first.receiver_connected().clone();
    assert!(hook.ptr_eq(first.receiver_connected()));
    assert!(!hook.ptr_eq(second.receiver_connected()));
    assert_eq!(hook.name(), Some("first.receiver_connected"));
}

#[test]
fn test_muted_suppresses_dispatch() {
    let signal: Signal<(), i64> = Signal::new();
    let recorder = CallRecorder::new();
    let _receiver = signal.connect(&recorder.receiver(0)).unwrap();

    {
        let _outer = signal.muted();
        {
            let _inner = signal.muted();
            assert!(signal.send(ANY, &()).unwrap().is_empty());
        }
        assert!(signal.is_muted());
        assert!(signal.send(ANY, &()).unwrap().is_empty());
    }

    assert!(!signal.is_muted());
    assert_eq!(signal.send(ANY, &()).unwrap().len(), 1);
    assert_eq!(recorder.count(), 1);
}

#[test]
fn test_connected_to_disconnects_on_drop() {
    let signal: Signal<(), i64> = Signal::new();
    let recorder = CallRecorder::new();

    {
        let guard = signal.connected_to(&recorder.receiver(0), "s").unwrap();
        assert_eq!(signal.connections()[0].strength, Strength::Strong);
        assert_eq!(signal.send("s", &()).unwrap()[0].0, *guard.receiver());
    }

    assert_eq!(signal.connection_count(), 0);
}

#[test]
fn test_connected_to_disconnects_on_panic() {
    let signal: Signal<(), i64> = Signal::new();
    let receiver = CallRecorder::new().receiver(0);

    let outcome = catch_unwind(AssertUnwindSafe(|| {
        let _guard = signal.connected_to(&receiver, ANY).unwrap();
        panic!("caller logic failed");
    }));

    assert!(outcome.is_err());
    assert_eq!(signal.connection_count(), 0);
}

#[test]
fn test_receiver_may_reenter_signal() {
    let signal: Signal<(), i64> = Signal::new();
    let recorder = CallRecorder::new();
    let late = recorder.receiver(2);
    let handle = signal.clone();
    let late_handle = late.clone();
    let connector = Receiver::new(move |_: &Sender, _: &()| {
        handle.connect(&late_handle)?;
        handle.send("nested", &())?;
        Ok(1)
    });
    signal.connect_via(&connector, "outer").unwrap();

    let results = signal.send("outer", &()).unwrap();

    // The late receiver was not in the snapshot of the outer send
    assert_eq!(results.len(), 1);
    assert_eq!(recorder.calls(), vec![SenderKey::Text("nested".into())]);
    assert_eq!(signal.connection_count(), 2);
}

#[test]
fn test_weak_signal_handle() {
    let signal: Signal<(), ()> = Signal::new();
    let weak = signal.downgrade();

    assert!(weak.upgrade().unwrap().ptr_eq(&signal));
    drop(signal);
    assert!(!weak.is_alive());
    assert!(weak.upgrade().is_none());
}

#[test]
fn test_builder_sets_name_doc_and_config() {
    let signal: Signal = SignalBuilder::new()
        .name("saved")
        .doc("Emitted after a document is written")
        .config(RegistryConfig::with_auto_prune(8))
        .build();

    assert_eq!(signal.name(), Some("saved"));
    assert_eq!(signal.config(), &RegistryConfig::with_auto_prune(8));
    assert_eq!(signal.doc(), Some("Emitted after a document is written"));
    assert!(Signal::<(), ()>::new().name().is_none());
}

#[test]
fn test_default_config_sweeps_stale_records() {
    let previous = crate::config::registry_config();
    crate::config::set_registry_config(RegistryConfig::with_auto_prune(1));
    let signal: Signal<(), i64> = Signal::new();
    crate::config::set_registry_config(previous);

    assert_eq!(signal.config().auto_prune_interval, Some(1));

    let stale = CallRecorder::new().receiver(0);
    signal.core.registry.insert_unwatched(&stale, &ANY);
    drop(stale);
    let other = CallRecorder::new().receiver(1);
    signal.connect(&other).unwrap();
    assert_eq!(signal.connection_count(), 2);

    signal.disconnect(&other).unwrap();

    assert_eq!(signal.connection_count(), 0);
}

#[test]
fn test_concurrent_connect_send_and_drop() {
    init_tracing();
    let signal: Signal<(), i64> = Signal::named("stress");
    let anchor = CallRecorder::new();
    let anchor_receiver = anchor.receiver(0);
    signal.connect(&anchor_receiver).unwrap();

    let mut handles = vec![];
    for i in 0..8_i64 {
        let signal = signal.clone();
        handles.push(thread::spawn(move || {
            let recorder = CallRecorder::new();
            for j in 0..100_i64 {
                let receiver = recorder.receiver(i);
                let sender = Sender::int(i * 1000 + j);
                signal.connect_via(&receiver, sender.clone()).unwrap();
                let results = signal.send(sender.clone(), &()).unwrap();
                assert!(results.iter().any(|(r, _)| *r == receiver));
                if j % 3 == 0 {
                    signal.disconnect_from(&receiver, sender).unwrap();
                }
            }
            recorder.count()
        }));
    }

    for handle in handles {
        assert_eq!(handle.join().unwrap(), 100);
    }

    assert_eq!(signal.connection_count(), 1);
    assert_eq!(signal.send(ANY, &()).unwrap().len(), 1);
    assert_eq!(anchor.count(), 801);
}

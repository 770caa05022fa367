//! Concurrency tests for the USB channel multiplexer
//!
//! Races teardown paths and connects on real threads, with randomized
//! ordering, and checks the slot table with property-based sequences.

use common::test_utils::create_mock_descriptor;
use mux::{
    ControlOutcome, LoopbackTransport, MuxError, ResultCode, SessionSettings, SlotIndex,
    SlotState, UsbSession,
};
use proptest::prelude::*;
use protocol::CONTROL_CHANNEL_NAME;
use rand::seq::SliceRandom;
use std::collections::HashSet;
use std::sync::Barrier;
use std::thread;

fn setup(capacity: usize) -> (LoopbackTransport, UsbSession) {
    let transport = LoopbackTransport::new();
    let session = UsbSession::new(SessionSettings::enabled(capacity));
    session.load(&transport).unwrap();
    assert_eq!(transport.initialize_plugins(), ResultCode::OK);
    transport.open_channel(CONTROL_CHANNEL_NAME).unwrap();
    (transport, session)
}

fn connect(session: &UsbSession, device_id: &str) -> Result<ControlOutcome, MuxError> {
    session.on_connect(create_mock_descriptor(device_id, 0x1234, 0x5678))
}

#[test]
fn test_disconnect_races_transport_close() {
    for _ in 0..200 {
        let (transport, session) = setup(2);
        connect(&session, "devA").unwrap();
        connect(&session, "devB").unwrap();
        let channel_a = transport.open_channel("URBDRC_00").unwrap();
        transport.open_channel("URBDRC_01").unwrap();

        let disconnect_first = rand::random::<bool>();
        let barrier = Barrier::new(2);

        thread::scope(|s| {
            s.spawn(|| {
                barrier.wait();
                if !disconnect_first {
                    thread::yield_now();
                }
                assert!(session.on_disconnect("devA").is_ok());
            });
            s.spawn(|| {
                barrier.wait();
                if disconnect_first {
                    thread::yield_now();
                }
                transport.remote_close("URBDRC_00");
            });
        });

        assert!(session.slot_of("devA").is_none());
        assert!(channel_a.is_closed());
        assert_eq!(session.in_use_count(), 1);
        assert_eq!(session.slots()[0].state, SlotState::Free);
        assert!(!transport.is_listening("URBDRC_00"));

        let b = session.slot_of("devB").unwrap();
        assert_eq!(b.index, SlotIndex(1));
        assert_eq!(b.state, SlotState::Active);
    }
}

#[test]
fn test_double_disconnect_race() {
    for _ in 0..100 {
        let (transport, session) = setup(2);
        connect(&session, "devA").unwrap();
        connect(&session, "devB").unwrap();
        transport.open_channel("URBDRC_00").unwrap();

        let barrier = Barrier::new(2);
        let freed = thread::scope(|s| {
            let handles: Vec<_> = (0..2)
                .map(|_| {
                    s.spawn(|| {
                        barrier.wait();
                        session.on_disconnect("devA").is_ok()
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|ok| *ok)
                .count()
        });

        assert_eq!(freed, 1);
        assert_eq!(session.in_use_count(), 1);
        assert_eq!(session.slot_of("devB").unwrap().index, SlotIndex(1));
    }
}

#[test]
fn test_concurrent_duplicate_connect() {
    let (_transport, session) = setup(8);
    let barrier = Barrier::new(8);

    let connected = thread::scope(|s| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                s.spawn(|| {
                    barrier.wait();
                    connect(&session, "same-device").is_ok()
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count()
    });

    assert_eq!(connected, 1);
    assert_eq!(session.in_use_count(), 1);
}

#[test]
fn test_concurrent_connect_fills_exactly_capacity() {
    let (_transport, session) = setup(4);
    let mut ids: Vec<String> = (0..12).map(|i| format!("dev-{}", i)).collect();
    ids.shuffle(&mut rand::rng());
    let barrier = Barrier::new(ids.len());

    thread::scope(|s| {
        for id in &ids {
            let session = &session;
            let barrier = &barrier;
            s.spawn(move || {
                barrier.wait();
                let _ = connect(session, id);
            });
        }
    });

    let slots = session.slots();
    assert_eq!(session.in_use_count(), 4);
    let owners: HashSet<_> = slots.iter().filter_map(|s| s.device_id.clone()).collect();
    assert_eq!(owners.len(), 4);
    assert!(slots.iter().all(|s| s.state == SlotState::Reserved));
}

#[derive(Debug, Clone)]
enum Op {
    Connect(u8),
    Disconnect(u8),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..10).prop_map(Op::Connect),
        (0u8..10).prop_map(Op::Disconnect),
    ]
}

proptest! {
    #[test]
    fn prop_slot_table_matches_model(
        capacity in 1usize..6,
        ops in proptest::collection::vec(op_strategy(), 1..60),
    ) {
        let (_transport, session) = setup(capacity);
        let mut model: Vec<Option<String>> = vec![None; capacity];

        for op in ops {
            match op {
                Op::Connect(n) => {
                    let id = format!("dev-{}", n);
                    let result = connect(&session, &id);
                    if model.iter().any(|s| s.as_deref() == Some(id.as_str())) {
                        let is_duplicate = matches!(result, Err(MuxError::DuplicateDevice { .. }));
                        prop_assert!(is_duplicate);
                    } else if let Some(free) = model.iter().position(Option::is_none) {
                        prop_assert_eq!(
                            result.ok(),
                            Some(ControlOutcome::Connected {
                                slot: SlotIndex(free),
                                channel_name: SlotIndex(free).channel_name(),
                            })
                        );
                        model[free] = Some(id);
                    } else {
                        let is_exhausted = matches!(result, Err(MuxError::SlotsExhausted { .. }));
                        prop_assert!(is_exhausted);
                    }
                }
                Op::Disconnect(n) => {
                    let id = format!("dev-{}", n);
                    let result = session.on_disconnect(&id);
                    match model.iter().position(|s| s.as_deref() == Some(id.as_str())) {
                        Some(slot) => {
                            prop_assert_eq!(
                                result.ok(),
                                Some(ControlOutcome::Disconnected { slot: SlotIndex(slot) })
                            );
                            model[slot] = None;
                        }
                        None => {
                            let is_unknown = matches!(result, Err(MuxError::UnknownDevice { .. }));
                            prop_assert!(is_unknown);
                        }
                    }
                }
            }

            let in_use = model.iter().filter(|s| s.is_some()).count();
            prop_assert_eq!(session.in_use_count(), in_use);
            prop_assert!(session.in_use_count() <= capacity);
        }

        let actual: Vec<Option<String>> =
            session.slots().into_iter().map(|s| s.device_id).collect();
        prop_assert_eq!(actual, model);
    }
}

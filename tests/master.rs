#![cfg(feature = "master")]

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use common::{byte, run, wire, CLOCK};
use twi_driver::{
    sim::{Fault, SimBus, SimTarget, Wire},
    ErrorKind, Event, State, Twi,
};

#[test]
fn transmit_sends_address_then_buffer_then_stop() {
    let errors = Mutex::new(Vec::new());
    let on_transmit = |twi: &Twi<SimBus>| errors.lock().unwrap().push(twi.error());

    let twi = Twi::<SimBus>::new(SimBus::new().with_target(SimTarget::new(0x50)), CLOCK);
    twi.set_on_transmit_handler(&on_transmit);
    twi.enable();

    twi.write(&[1, 2, 3]);
    twi.transmit(0x50).unwrap();
    assert_eq!(twi.state(), State::MasterTransmit);
    run(&twi);

    assert_eq!(
        wire(&twi),
        [
            Wire::Start,
            byte(0xA0, true),
            byte(1, true),
            byte(2, true),
            byte(3, true),
            Wire::Stop,
        ]
    );
    assert_eq!(*errors.lock().unwrap(), [ErrorKind::None]);
    assert_eq!(twi.state(), State::Ready);
    assert_eq!(
        twi.with_backend(|bus| bus.target(0x50).unwrap().received().to_vec()),
        [1, 2, 3]
    );
    assert_eq!(twi.try_listen(), Some(Event::Transmitted));
    assert_eq!(twi.try_listen(), None);
}

#[test]
fn receive_acks_all_but_last_byte() {
    let received = AtomicUsize::new(0);
    let on_receive = |twi: &Twi<SimBus>| {
        received.fetch_add(1, Ordering::SeqCst);
        assert_eq!(twi.available(), 4);
    };

    let bus = SimBus::new().with_target(SimTarget::new(0x50).with_reply(&[0xDE, 0xAD, 0xBE, 0xEF]));
    let twi = Twi::<SimBus>::new(bus, CLOCK);
    twi.set_on_receive_handler(&on_receive);
    twi.enable();

    twi.receive(0x50, 4).unwrap();
    run(&twi);

    assert_eq!(
        wire(&twi),
        [
            Wire::Start,
            byte(0xA1, true),
            byte(0xDE, true),
            byte(0xAD, true),
            byte(0xBE, true),
            byte(0xEF, false),
            Wire::Stop,
        ]
    );
    assert_eq!(received.load(Ordering::SeqCst), 1);
    assert_eq!(twi.error(), ErrorKind::None);

    let mut data = [0; 4];
    twi.read(&mut data);
    assert_eq!(data, [0xDE, 0xAD, 0xBE, 0xEF]);
    assert_eq!(twi.available(), 0);
}

#[test]
fn single_byte_receive_is_nacked_right_away() {
    let bus = SimBus::new().with_target(SimTarget::new(0x50).with_reply(&[0x42]));
    let twi = Twi::<SimBus>::new(bus, CLOCK);
    twi.enable();

    twi.receive(0x50, 1).unwrap();
    run(&twi);

    assert_eq!(
        wire(&twi),
        [Wire::Start, byte(0xA1, true), byte(0x42, false), Wire::Stop]
    );
    assert_eq!(twi.read_u8(), 0x42);
    assert_eq!(twi.try_listen(), Some(Event::Received { size: 1 }));
}

#[test]
fn typed_values_are_received_little_endian() {
    let bus = SimBus::new().with_target(SimTarget::new(0x20).with_reply(&[0x34, 0x12, 0, 0, 0x80, 0x3F]));
    let twi = Twi::<SimBus>::new(bus, CLOCK);
    twi.enable();

    twi.receive(0x20, 6).unwrap();
    run(&twi);

    assert_eq!(twi.read_u16(), 0x1234);
    assert_eq!(twi.read_f32(), 1.0);
    assert_eq!(twi.error(), ErrorKind::None);
}

#[test]
fn unacknowledged_write_address_latches_no_ack() {
    let transmitted = AtomicUsize::new(0);
    let on_transmit = |_: &Twi<SimBus>| {
        transmitted.fetch_add(1, Ordering::SeqCst);
    };

    let twi = Twi::<SimBus>::new(SimBus::new(), CLOCK);
    twi.set_on_transmit_handler(&on_transmit);
    twi.enable();

    twi.write(&[1, 2]);
    twi.transmit(0x50).unwrap();
    run(&twi);

    assert_eq!(wire(&twi), [Wire::Start, byte(0xA0, false), Wire::Stop]);
    assert_eq!(twi.error(), ErrorKind::NoAck);
    assert_eq!(transmitted.load(Ordering::SeqCst), 1);
    assert_eq!(twi.state(), State::Ready);
}

#[test]
fn unacknowledged_read_address_latches_no_ack() {
    let sizes = Mutex::new(Vec::new());
    let on_receive = |twi: &Twi<SimBus>| sizes.lock().unwrap().push(twi.available());

    let twi = Twi::<SimBus>::new(SimBus::new(), CLOCK);
    twi.set_on_receive_handler(&on_receive);
    twi.enable();

    twi.receive(0x51, 2).unwrap();
    run(&twi);

    assert_eq!(wire(&twi), [Wire::Start, byte(0xA3, false), Wire::Stop]);
    assert_eq!(twi.error(), ErrorKind::NoAck);
    assert_eq!(*sizes.lock().unwrap(), [0]);
    assert_eq!(twi.state(), State::Ready);
}

#[test]
fn data_nack_ends_transmit_early() {
    let twi = Twi::<SimBus>::new(
        SimBus::new().with_target(SimTarget::new(0x50).with_ack_limit(1)),
        CLOCK,
    );
    twi.enable();

    twi.write(&[1, 2, 3]);
    twi.transmit(0x50).unwrap();
    run(&twi);

    assert_eq!(
        wire(&twi),
        [
            Wire::Start,
            byte(0xA0, true),
            byte(1, true),
            byte(2, false),
            Wire::Stop,
        ]
    );
    assert_eq!(twi.error(), ErrorKind::NoAck);
    assert_eq!(
        twi.with_backend(|bus| bus.target(0x50).unwrap().received().to_vec()),
        [1]
    );
}

#[test]
fn empty_transmit_probes_the_address() {
    let twi = Twi::<SimBus>::new(SimBus::new().with_target(SimTarget::new(0x50)), CLOCK);
    twi.enable();

    twi.transmit(0x50).unwrap();
    run(&twi);

    assert_eq!(wire(&twi), [Wire::Start, byte(0xA0, true), Wire::Stop]);
    assert_eq!(twi.error(), ErrorKind::None);
}

#[test]
fn transmit_again_resends_the_same_message() {
    let twi = Twi::<SimBus>::new(SimBus::new().with_target(SimTarget::new(0x50)), CLOCK);
    twi.enable();

    twi.write(&[7, 8]);
    twi.transmit(0x50).unwrap();
    run(&twi);
    twi.transmit(0x50).unwrap();
    run(&twi);

    assert_eq!(
        twi.with_backend(|bus| bus.target(0x50).unwrap().received().to_vec()),
        [7, 8, 7, 8]
    );
}

#[test]
fn transmit_without_stop_continues_with_repeated_start() {
    let bus = SimBus::new().with_target(SimTarget::new(0x50).with_reply(&[0xAA, 0xBB]));
    let twi = Twi::<SimBus>::new(bus, CLOCK);
    twi.enable();

    twi.write_u8(0x10);
    twi.transmit_with_stop(0x50, false).unwrap();
    run(&twi);
    assert_eq!(twi.state(), State::Ready);
    assert!(twi.with_backend(|bus| bus.is_held()));

    twi.receive(0x50, 2).unwrap();
    run(&twi);

    assert_eq!(
        wire(&twi),
        [
            Wire::Start,
            byte(0xA0, true),
            byte(0x10, true),
            Wire::RepeatedStart,
            byte(0xA1, true),
            byte(0xAA, true),
            byte(0xBB, false),
            Wire::Stop,
        ]
    );
    assert!(!twi.with_backend(|bus| bus.is_held()));
}

#[test]
fn handler_can_start_next_transaction() {
    let received = AtomicUsize::new(0);
    let on_transmit = |twi: &Twi<SimBus>| {
        twi.receive(0x50, 2).unwrap();
    };
    let on_receive = |twi: &Twi<SimBus>| {
        assert_eq!(twi.read_u16(), 0x0201);
        received.fetch_add(1, Ordering::SeqCst);
    };

    let bus = SimBus::new().with_target(SimTarget::new(0x50).with_reply(&[1, 2]));
    let twi = Twi::<SimBus>::new(bus, CLOCK);
    twi.set_on_transmit_handler(&on_transmit);
    twi.set_on_receive_handler(&on_receive);
    twi.enable();

    twi.write_u8(0x00);
    twi.transmit(0x50).unwrap();
    run(&twi);

    assert_eq!(received.load(Ordering::SeqCst), 1);
    assert_eq!(twi.state(), State::Ready);
    assert_eq!(
        wire(&twi),
        [
            Wire::Start,
            byte(0xA0, true),
            byte(0x00, true),
            Wire::Stop,
            Wire::Start,
            byte(0xA1, true),
            byte(1, true),
            byte(2, false),
            Wire::Stop,
        ]
    );
}

#[test]
fn busy_driver_rejects_new_transactions() {
    let twi = Twi::<SimBus>::new(SimBus::new().with_target(SimTarget::new(0x50)), CLOCK);
    twi.enable();

    twi.write_u8(1);
    twi.transmit(0x50).unwrap();
    assert_eq!(twi.transmit(0x50), Err(ErrorKind::Write));
    assert_eq!(twi.receive(0x50, 1), Err(ErrorKind::Read));
    assert_eq!(twi.state(), State::MasterTransmit);

    run(&twi);
    assert_eq!(twi.state(), State::Ready);
    assert_eq!(
        twi.with_backend(|bus| bus.target(0x50).unwrap().received().to_vec()),
        [1]
    );
}

#[test]
fn lost_arbitration_aborts_and_retry_succeeds() {
    let transmitted = AtomicUsize::new(0);
    let on_transmit = |_: &Twi<SimBus>| {
        transmitted.fetch_add(1, Ordering::SeqCst);
    };

    let twi = Twi::<SimBus>::new(SimBus::new().with_target(SimTarget::new(0x50)), CLOCK);
    twi.set_on_transmit_handler(&on_transmit);
    twi.enable();

    twi.write_u8(0x33);
    twi.with_backend(|bus| bus.inject_fault(Fault::ArbitrationLoss));
    twi.transmit(0x50).unwrap();
    run(&twi);

    assert_eq!(twi.error(), ErrorKind::ArbitrationLost);
    assert_eq!(twi.state(), State::Ready);
    assert_eq!(transmitted.load(Ordering::SeqCst), 1);
    assert!(wire(&twi).is_empty());

    twi.transmit(0x50).unwrap();
    run(&twi);
    assert_eq!(twi.error(), ErrorKind::None);
    assert_eq!(transmitted.load(Ordering::SeqCst), 2);
    assert_eq!(
        twi.with_backend(|bus| bus.target(0x50).unwrap().received().to_vec()),
        [0x33]
    );
}

#[test]
#[cfg(feature = "slave")]
fn lost_arbitration_to_controller_addressing_us() {
    let transmitted = AtomicUsize::new(0);
    let on_transmit = |_: &Twi<SimBus>| {
        transmitted.fetch_add(1, Ordering::SeqCst);
    };
    let slave_data = Mutex::new(Vec::new());
    let on_receive = |twi: &Twi<SimBus>| {
        let mut data = vec![0; twi.available()];
        twi.read(&mut data);
        slave_data.lock().unwrap().extend(data);
    };

    let twi = Twi::<SimBus>::new(SimBus::new().with_target(SimTarget::new(0x50)), CLOCK);
    twi.set_on_transmit_handler(&on_transmit);
    twi.set_on_receive_handler(&on_receive);
    twi.set_address(0x0F).unwrap();
    twi.enable();

    twi.write(&[1, 2]);
    twi.transmit(0x50).unwrap();
    twi.with_backend(|bus| {
        bus.controller_write(0x0F, &[7, 8]).unwrap();
        bus.inject_fault(Fault::ArbitrationLoss);
    });
    run(&twi);

    assert_eq!(transmitted.load(Ordering::SeqCst), 1);
    assert_eq!(*slave_data.lock().unwrap(), [7, 8]);
    assert_eq!(twi.error(), ErrorKind::ArbitrationLost);
    assert_eq!(twi.state(), State::Ready);
    assert_eq!(
        wire(&twi),
        [
            Wire::Start,
            Wire::Start,
            byte(0x1E, true),
            byte(7, true),
            byte(8, true),
            Wire::Stop,
        ]
    );
}

#[test]
fn bus_error_aborts_receive() {
    let sizes = Mutex::new(Vec::new());
    let on_receive = |twi: &Twi<SimBus>| sizes.lock().unwrap().push(twi.available());

    let bus = SimBus::new().with_target(SimTarget::new(0x50).with_reply(&[1, 2, 3]));
    let twi = Twi::<SimBus>::new(bus, CLOCK);
    twi.set_on_receive_handler(&on_receive);
    twi.enable();

    twi.receive(0x50, 3).unwrap();
    assert!(twi.poll());
    twi.with_backend(|bus| bus.inject_fault(Fault::BusError));
    run(&twi);

    assert_eq!(twi.error(), ErrorKind::BusError);
    assert_eq!(twi.state(), State::Ready);
    assert_eq!(*sizes.lock().unwrap(), [0]);
    assert_eq!(wire(&twi), [Wire::Start, byte(0xA1, true), Wire::Stop]);
}

#[test]
#[cfg(feature = "slave")]
fn aborted_transaction_is_reported_before_slave_turn() {
    let calls = Mutex::new(Vec::new());
    let on_transmit = |twi: &Twi<SimBus>| {
        calls.lock().unwrap().push(("transmit", twi.state(), twi.error()));
        assert_eq!(twi.receive(0x50, 1), Ok(()));
        assert_eq!(twi.error(), ErrorKind::ArbitrationLost);
    };
    let on_request = |twi: &Twi<SimBus>| {
        calls.lock().unwrap().push(("request", twi.state(), twi.error()));
        twi.write(&[0xAA, 0xBB]);
    };
    let on_receive = |twi: &Twi<SimBus>| {
        calls.lock().unwrap().push(("receive", twi.state(), twi.error()));
    };

    let bus = SimBus::new().with_target(SimTarget::new(0x50).with_reply(&[0x5A]));
    let twi = Twi::<SimBus>::new(bus, CLOCK);
    twi.set_on_transmit_handler(&on_transmit);
    twi.set_on_request_handler(&on_request);
    twi.set_on_receive_handler(&on_receive);
    twi.set_address(0x0F).unwrap();
    twi.enable();

    twi.write(&[1, 2]);
    twi.transmit(0x50).unwrap();
    twi.with_backend(|bus| {
        bus.controller_read(0x0F, 2).unwrap();
        bus.inject_fault(Fault::ArbitrationLoss);
    });
    run(&twi);

    assert_eq!(
        *calls.lock().unwrap(),
        [
            ("transmit", State::Ready, ErrorKind::ArbitrationLost),
            ("request", State::SlaveTransmit, ErrorKind::ArbitrationLost),
            ("receive", State::Ready, ErrorKind::None),
        ]
    );
    assert_eq!(twi.with_backend(|bus| bus.read_back().to_vec()), [0xAA, 0xBB]);
    assert_eq!(twi.read_u8(), 0x5A);
    assert!(!twi.has_pending_start());
    assert_eq!(
        wire(&twi),
        [
            Wire::Start,
            Wire::Start,
            byte(0x1F, true),
            byte(0xAA, true),
            byte(0xBB, false),
            Wire::Stop,
            Wire::Start,
            byte(0xA1, true),
            byte(0x5A, false),
            Wire::Stop,
        ]
    );
}

use heapless::Vec;

use crate::{BufferError, BusBackend, ErrorKind, Event, State, Status};

/// Byte shifted out once a slave-transmit turn runs past the TX buffer.
#[cfg(feature = "slave")]
pub const PAD_BYTE: u8 = 0x00;

/// Parameters of the master transaction in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transfer {
    pub address: u8,
    /// Bytes requested by a master receive.
    pub length: usize,
    pub stop: bool,
    /// The previous transaction ended without STOP and still owns the bus.
    pub bus_held: bool,
}

impl Transfer {
    pub const fn new() -> Self {
        Self {
            address: 0,
            length: 0,
            stop: true,
            bus_held: false,
        }
    }

    pub const fn address_byte(&self, read: bool) -> u8 {
        (self.address << 1) | read as u8
    }
}

/// What the event path needs from the driver.
pub trait InterruptBridge {
    type Bus: BusBackend;

    fn with_bus<R>(&self, f: impl FnOnce(&mut Self::Bus) -> R) -> R;

    fn get_state(&self) -> State;

    fn set_state(&self, state: State);

    fn latch(&self, error: ErrorKind);

    fn transfer(&self) -> Transfer;

    fn set_bus_held(&self, held: bool);

    /// Hands `event` to the listener channel and the matching handler.
    fn notify(&self, event: Event);

    /// While set, a transaction started by the application is held back
    /// instead of issuing START.
    fn set_addressed(&self, addressed: bool);

    /// Issues the START held back by [`set_addressed`](Self::set_addressed),
    /// once the driver is `Ready` again.
    fn start_pending(&self);

    fn get_rxbuf_size(&self) -> usize;

    fn rxbuf_is_full(&self) -> bool;

    fn write_rxbuf_byte(&self, byte: u8) -> Result<(), BufferError>;

    fn reset_rxbuf(&self);

    fn pop_txbuf_byte(&self) -> Option<u8>;

    fn reset_txbuf(&self);

    fn get_txbuf_sent(&self) -> usize;
}

type Notifications = Vec<Event, 2>;

/// Services one peripheral event.
///
/// Call it from the peripheral's interrupt handler. It is not reentrant.
pub fn handle_event_interrupt<T: InterruptBridge>(bridge: &T) {
    let status = bridge.with_bus(|bus| bus.status());
    let state = bridge.get_state();
    trace!("event {:?} in {:?}", status, state);

    if matches!(state, State::Disabled) {
        warn!("event {:?} while disabled", status);
        return;
    }

    let mut notifications = Notifications::new();
    dispatch(bridge, status, state, &mut notifications);

    // Handlers may start the next transaction, so they run only after the
    // bus has been answered and the state settled.
    for event in notifications {
        bridge.notify(event);
    }
    bridge.start_pending();
}

fn dispatch<T: InterruptBridge>(
    bridge: &T,
    status: Status,
    mut state: State,
    out: &mut Notifications,
) {
    if bridge.with_bus(|bus| bus.last_event_was_bus_error()) {
        error!("bus error in {:?}", state);
        bridge.latch(ErrorKind::BusError);
        bridge.with_bus(|bus| bus.issue_stop());
        bridge.set_bus_held(false);
        push(out, abort(bridge, state));
        return;
    }

    if bridge.with_bus(|bus| bus.last_event_was_arbitration_loss()) {
        warn!("arbitration lost in {:?}", state);
        bridge.latch(ErrorKind::ArbitrationLost);
        bridge.set_bus_held(false);
        let aborted = abort(bridge, state);
        if matches!(status, Status::ArbitrationLost) {
            bridge.with_bus(|bus| bus.arm_next_event());
            push(out, aborted);
            return;
        }

        // The controller that won addressed us. Report the aborted
        // transaction before serving it; a retry from the handler waits
        // until the slave turn is over.
        if let Some(event) = aborted {
            bridge.set_addressed(true);
            bridge.notify(event);
            bridge.set_addressed(false);
        }
        state = bridge.get_state();
    }

    match (state, status) {
        #[cfg(feature = "master")]
        (
            State::MasterTransmit | State::MasterReceive,
            Status::MasterStart | Status::MasterRepeatedStart,
        ) => {
            let read = matches!(state, State::MasterReceive);
            let address = bridge.transfer().address_byte(read);
            bridge.with_bus(|bus| bus.shift_out_byte(address));
        }

        #[cfg(feature = "master")]
        (State::MasterTransmit, Status::MasterAddressWriteAck | Status::MasterDataSentAck) => {
            match bridge.pop_txbuf_byte() {
                Some(byte) => bridge.with_bus(|bus| bus.shift_out_byte(byte)),
                None => push(out, finish_master(bridge, Event::Transmitted)),
            }
        }

        #[cfg(feature = "master")]
        (State::MasterTransmit, Status::MasterAddressWriteNack | Status::MasterDataSentNack) => {
            debug!("transmit to {:#x} not acknowledged", bridge.transfer().address);
            bridge.latch(ErrorKind::NoAck);
            push(out, finish_master(bridge, Event::Transmitted));
        }

        #[cfg(feature = "master")]
        (State::MasterReceive, Status::MasterAddressReadAck) => {
            if bridge.transfer().length > 1 {
                bridge.with_bus(|bus| bus.send_ack());
            } else {
                bridge.with_bus(|bus| bus.send_nack());
            }
        }

        #[cfg(feature = "master")]
        (State::MasterReceive, Status::MasterAddressReadNack) => {
            debug!("receive from {:#x} not acknowledged", bridge.transfer().address);
            bridge.latch(ErrorKind::NoAck);
            let size = bridge.get_rxbuf_size();
            push(out, finish_master(bridge, Event::Received { size }));
        }

        #[cfg(feature = "master")]
        (State::MasterReceive, Status::MasterDataReceivedAck) => {
            store_received(bridge);
            // NACK the last requested byte.
            if bridge.get_rxbuf_size() + 1 < bridge.transfer().length {
                bridge.with_bus(|bus| bus.send_ack());
            } else {
                bridge.with_bus(|bus| bus.send_nack());
            }
        }

        #[cfg(feature = "master")]
        (State::MasterReceive, Status::MasterDataReceivedNack) => {
            store_received(bridge);
            let size = bridge.get_rxbuf_size();
            push(out, finish_master(bridge, Event::Received { size }));
        }

        #[cfg(feature = "slave")]
        (
            State::Ready,
            Status::SlaveWriteAddressed { .. } | Status::SlaveGeneralCall { .. },
        ) => {
            bridge.reset_rxbuf();
            bridge.set_state(State::SlaveReceive);
            answer_slave_receive(bridge);
        }

        #[cfg(feature = "slave")]
        (State::SlaveReceive, Status::SlaveDataReceivedAck) => {
            store_received(bridge);
            answer_slave_receive(bridge);
        }

        #[cfg(feature = "slave")]
        (State::SlaveReceive, Status::SlaveDataReceivedNack) => {
            // Only a full buffer makes us refuse a byte.
            store_received(bridge);
            push(out, finish_slave(bridge, State::SlaveReceive));
        }

        #[cfg(feature = "slave")]
        (State::SlaveReceive, Status::SlaveStop) => {
            push(out, finish_slave(bridge, State::SlaveReceive));
        }

        #[cfg(feature = "slave")]
        (State::Ready, Status::SlaveReadAddressed { .. }) => {
            bridge.reset_txbuf();
            bridge.set_state(State::SlaveTransmit);
            // The application fills the TX buffer before the first byte goes out.
            bridge.notify(Event::Requested);
            shift_out_slave(bridge);
        }

        #[cfg(feature = "slave")]
        (State::SlaveTransmit, Status::SlaveDataSentAck) => {
            shift_out_slave(bridge);
        }

        #[cfg(feature = "slave")]
        (
            State::SlaveTransmit,
            Status::SlaveDataSentNack | Status::SlaveLastDataSent | Status::SlaveStop,
        ) => {
            push(out, finish_slave(bridge, State::SlaveTransmit));
        }

        (_, Status::NoInfo) => {}

        (state, status) => {
            warn!("unexpected {:?} in {:?}", status, state);
            bridge.with_bus(|bus| bus.arm_next_event());
        }
    }
}

fn push(out: &mut Notifications, event: Option<Event>) {
    if let Some(event) = event {
        let _ = out.push(event);
    }
}

/// Drops the transaction in flight and returns the completion it owes.
fn abort<T: InterruptBridge>(bridge: &T, state: State) -> Option<Event> {
    let event = match state {
        State::MasterTransmit => Event::Transmitted,
        State::MasterReceive | State::SlaveReceive => Event::Received {
            size: bridge.get_rxbuf_size(),
        },
        State::SlaveTransmit => Event::Sent {
            sent: bridge.get_txbuf_sent(),
        },
        State::Ready | State::Disabled => return None,
    };
    bridge.set_state(State::Ready);
    Some(event)
}

fn store_received<T: InterruptBridge>(bridge: &T) {
    let byte = bridge.with_bus(|bus| bus.shift_in_byte());
    if bridge.write_rxbuf_byte(byte).is_err() {
        warn!("receive buffer full, byte {:#x} dropped", byte);
        bridge.latch(ErrorKind::Overflow);
    }
}

#[cfg(feature = "master")]
fn finish_master<T: InterruptBridge>(bridge: &T, event: Event) -> Option<Event> {
    if bridge.transfer().stop {
        bridge.with_bus(|bus| bus.issue_stop());
        bridge.set_bus_held(false);
    } else {
        bridge.with_bus(|bus| bus.hold_bus());
        bridge.set_bus_held(true);
    }
    bridge.set_state(State::Ready);
    Some(event)
}

#[cfg(feature = "slave")]
fn answer_slave_receive<T: InterruptBridge>(bridge: &T) {
    if bridge.rxbuf_is_full() {
        bridge.with_bus(|bus| bus.send_nack());
    } else {
        bridge.with_bus(|bus| bus.send_ack());
    }
}

#[cfg(feature = "slave")]
fn shift_out_slave<T: InterruptBridge>(bridge: &T) {
    let byte = bridge.pop_txbuf_byte().unwrap_or(PAD_BYTE);
    bridge.with_bus(|bus| bus.shift_out_byte(byte));
}

#[cfg(feature = "slave")]
fn finish_slave<T: InterruptBridge>(bridge: &T, state: State) -> Option<Event> {
    bridge.with_bus(|bus| bus.arm_next_event());
    abort(bridge, state)
}

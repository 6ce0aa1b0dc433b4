use core::cell::{Cell, RefCell};

use atomic::{Atomic, Ordering};
use critical_section::{CriticalSection, Mutex};
use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, channel};
use fugit::HertzU32;
use heapless::Deque;

use crate::{
    buffer::{BufferError, ByteBuffer},
    clock::{self, Prescaler},
    handlers::{Handler, Handlers, Slot},
    interrupts::{self, InterruptBridge, Transfer},
    state_holder::{StateHolder, STATES_HISTORY_SIZE},
    BusBackend, ConfigError, ErrorKind, Event, State, DEFAULT_BUFFER_LENGTH, MAX_ADDRESS,
};

pub const EVENTS_CHANNEL_SIZE: usize = 4;

pub const DEFAULT_FREQUENCY: HertzU32 = HertzU32::from_raw(100_000);

pub type EventChannel = channel::Channel<CriticalSectionRawMutex, Event, EVENTS_CHANNEL_SIZE>;

/// Process-wide peripheral configuration. Only changes while no transaction
/// is in flight.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Config {
    /// Clock feeding the peripheral.
    pub clock: HertzU32,
    /// Requested bus rate.
    pub frequency: HertzU32,
    pub prescaler: Prescaler,
    /// Own slave address, `None` while not listening as slave.
    pub address: Option<u8>,
    pub address_mask: u8,
}

impl Config {
    pub const fn new(clock: HertzU32) -> Self {
        Self {
            clock,
            frequency: DEFAULT_FREQUENCY,
            prescaler: Prescaler::Div1,
            address: None,
            address_mask: 0,
        }
    }
}

/// Interrupt-driven two-wire driver, master and slave.
///
/// The application fills the TX buffer, starts a transaction with
/// [`transmit`](Self::transmit) or [`receive`](Self::receive) and gets told
/// through a handler or [`listen`](Self::listen) once it is over. Events are
/// fed in with [`handle_event_interrupt`](crate::handle_event_interrupt) from
/// the peripheral's interrupt, or with [`poll`](Self::poll).
///
/// Buffers belong to the event path while a transaction is in flight; touch
/// them from application code only while the driver is [`State::Ready`] or
/// from inside a handler.
pub struct Twi<
    'h,
    B,
    const TXBUFSIZE: usize = DEFAULT_BUFFER_LENGTH,
    const RXBUFSIZE: usize = DEFAULT_BUFFER_LENGTH,
> {
    backend: Mutex<RefCell<B>>,

    send_buffer: Mutex<RefCell<ByteBuffer<TXBUFSIZE>>>,
    receive_buffer: Mutex<RefCell<ByteBuffer<RXBUFSIZE>>>,

    state_holder: StateHolder<STATES_HISTORY_SIZE>,
    error: Atomic<ErrorKind>,
    transfer: Mutex<Cell<Transfer>>,
    config: Mutex<Cell<Config>>,

    // A remote master owns the bus; transactions started meanwhile wait here.
    addressed: Atomic<bool>,
    pending: Mutex<Cell<Option<(State, Transfer)>>>,

    handlers: Handlers<'h, Twi<'h, B, TXBUFSIZE, RXBUFSIZE>>,
    channel: EventChannel,
}

impl<'h, B: BusBackend, const TXBUFSIZE: usize, const RXBUFSIZE: usize>
    Twi<'h, B, TXBUFSIZE, RXBUFSIZE>
{
    pub const fn new(backend: B, clock: HertzU32) -> Self {
        Self {
            backend: Mutex::new(RefCell::new(backend)),
            send_buffer: Mutex::new(RefCell::new(ByteBuffer::new())),
            receive_buffer: Mutex::new(RefCell::new(ByteBuffer::new())),
            state_holder: StateHolder::new(),
            error: Atomic::new(ErrorKind::None),
            transfer: Mutex::new(Cell::new(Transfer::new())),
            config: Mutex::new(Cell::new(Config::new(clock))),
            addressed: Atomic::new(false),
            pending: Mutex::new(Cell::new(None)),
            handlers: Handlers::new(),
            channel: EventChannel::new(),
        }
    }

    /// Runs `f` on the backend, e.g. to inspect a simulated bus.
    pub fn with_backend<R>(&self, f: impl FnOnce(&mut B) -> R) -> R {
        critical_section::with(|cs| f(&mut *self.backend.borrow_ref_mut(cs)))
    }

    pub fn enable(&self) {
        critical_section::with(|cs| {
            if !matches!(self.state(), State::Disabled) {
                return;
            }

            let config = self.config.borrow(cs).get();
            let mut backend = self.backend.borrow_ref_mut(cs);
            backend.enable();
            match clock::divider(config.clock, config.frequency, config.prescaler) {
                Ok(divider) => {
                    backend.set_prescaler(config.prescaler);
                    backend.set_bitrate_divider(divider);
                }
                Err(err) => warn!("bit rate left unprogrammed: {:?}", err),
            }
            if let Some(address) = config.address {
                backend.set_own_address(address, config.address_mask);
            }
            backend.arm_next_event();

            self.transfer.borrow(cs).set(Transfer::new());
            self.pending.borrow(cs).set(None);
            self.addressed.store(false, Ordering::SeqCst);
            self.clear_error();
            self.state_holder.set_state(State::Ready);
        });
        debug!("enabled");
    }

    /// Turns the peripheral off. A transaction in flight is dropped without
    /// notification.
    pub fn disable(&self) {
        critical_section::with(|cs| {
            if matches!(self.state(), State::Disabled) {
                return;
            }
            self.backend.borrow_ref_mut(cs).disable();
            self.pending.borrow(cs).set(None);
            self.state_holder.set_state(State::Disabled);
        });
        debug!("disabled");
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self.state(), State::Disabled)
    }

    pub fn state(&self) -> State {
        self.state_holder.get_state()
    }

    pub fn is_busy(&self) -> bool {
        self.state().is_busy()
    }

    /// Latest state transitions, oldest first.
    pub fn state_history(&self) -> Deque<State, STATES_HISTORY_SIZE> {
        self.state_holder.history()
    }

    /// Latched error, [`ErrorKind::None`] if nothing failed since the last clear.
    pub fn error(&self) -> ErrorKind {
        self.error.load(Ordering::SeqCst)
    }

    /// Returns the latched error and clears it.
    pub fn take_error(&self) -> ErrorKind {
        self.error.swap(ErrorKind::None, Ordering::SeqCst)
    }

    pub fn clear_error(&self) {
        self.error.store(ErrorKind::None, Ordering::SeqCst);
    }

    pub fn config(&self) -> Config {
        critical_section::with(|cs| self.config.borrow(cs).get())
    }

    /// Sets the own slave address and starts answering to it.
    pub fn set_address(&self, address: u8) -> Result<(), ConfigError> {
        self.set_address_mask(address, 0)
    }

    /// Like [`set_address`](Self::set_address), ignoring the address bits set
    /// in `mask`.
    pub fn set_address_mask(&self, address: u8, mask: u8) -> Result<(), ConfigError> {
        if address > MAX_ADDRESS || mask > MAX_ADDRESS {
            return Err(ConfigError::InvalidAddress);
        }
        self.update_config(|config, backend| {
            config.address = Some(address);
            config.address_mask = mask;
            backend.set_own_address(address, mask);
            Ok(())
        })
    }

    pub fn set_prescaler(&self, prescaler: Prescaler) -> Result<(), ConfigError> {
        self.update_config(|config, backend| {
            let divider = clock::divider(config.clock, config.frequency, prescaler)?;
            config.prescaler = prescaler;
            backend.set_prescaler(prescaler);
            backend.set_bitrate_divider(divider);
            Ok(())
        })
    }

    /// Sets the bus rate, keeping the current prescaler.
    pub fn set_frequency(&self, frequency: HertzU32) -> Result<(), ConfigError> {
        self.update_config(|config, backend| {
            let divider = clock::divider(config.clock, frequency, config.prescaler)?;
            config.frequency = frequency;
            backend.set_bitrate_divider(divider);
            Ok(())
        })
    }

    /// Bus rate actually produced by the current configuration.
    pub fn frequency(&self) -> Result<HertzU32, ConfigError> {
        let config = self.config();
        let divider = clock::divider(config.clock, config.frequency, config.prescaler)?;
        Ok(clock::frequency(config.clock, divider, config.prescaler))
    }

    fn update_config(
        &self,
        f: impl FnOnce(&mut Config, &mut B) -> Result<(), ConfigError>,
    ) -> Result<(), ConfigError> {
        critical_section::with(|cs| {
            if self.is_busy() {
                warn!("configuration change while {:?}", self.state());
                return Err(ConfigError::Busy);
            }
            let cell = self.config.borrow(cs);
            let mut config = cell.get();
            f(&mut config, &mut *self.backend.borrow_ref_mut(cs))?;
            cell.set(config);
            Ok(())
        })
    }

    fn latch_error(&self, error: ErrorKind) {
        self.error.store(error, Ordering::SeqCst);
    }

    /// Unread bytes in the RX buffer.
    pub fn available(&self) -> usize {
        critical_section::with(|cs| self.receive_buffer.borrow_ref(cs).remaining())
    }

    fn read_with<R: Default>(
        &self,
        f: impl FnOnce(&mut ByteBuffer<RXBUFSIZE>) -> Result<R, BufferError>,
    ) -> R {
        if matches!(self.state(), State::MasterReceive | State::SlaveReceive) {
            warn!("RX buffer read while {:?}", self.state());
            self.latch_error(ErrorKind::Read);
            return R::default();
        }
        let res = critical_section::with(|cs| f(&mut *self.receive_buffer.borrow_ref_mut(cs)));
        res.unwrap_or_else(|_| {
            self.latch_error(ErrorKind::Read);
            R::default()
        })
    }

    /// Next byte of the RX buffer; 0 and [`ErrorKind::Read`] latched if none.
    pub fn read_u8(&self) -> u8 {
        self.read_with(|buf| buf.pop_u8())
    }

    pub fn read_u16(&self) -> u16 {
        self.read_with(|buf| buf.pop_u16())
    }

    pub fn read_u32(&self) -> u32 {
        self.read_with(|buf| buf.pop_u32())
    }

    pub fn read_f32(&self) -> f32 {
        self.read_with(|buf| buf.pop_f32())
    }

    /// Fills `data` from the RX buffer. Nothing is consumed if fewer bytes
    /// are available.
    pub fn read(&self, data: &mut [u8]) {
        self.read_with(|buf| buf.pop_bytes(data))
    }

    fn write_with(&self, f: impl FnOnce(&mut ByteBuffer<TXBUFSIZE>) -> Result<(), BufferError>) {
        if matches!(self.state(), State::MasterTransmit) {
            warn!("TX buffer write while {:?}", self.state());
            return self.latch_error(ErrorKind::Write);
        }
        let res = critical_section::with(|cs| f(&mut *self.send_buffer.borrow_ref_mut(cs)));
        if res.is_err() {
            self.latch_error(ErrorKind::Overflow);
        }
    }

    /// Appends to the TX buffer; [`ErrorKind::Overflow`] latched if it does
    /// not fit, in which case nothing is written.
    pub fn write_u8(&self, value: u8) {
        self.write_with(|buf| buf.push_u8(value))
    }

    pub fn write_u16(&self, value: u16) {
        self.write_with(|buf| buf.push_u16(value))
    }

    pub fn write_u32(&self, value: u32) {
        self.write_with(|buf| buf.push_u32(value))
    }

    pub fn write_f32(&self, value: f32) {
        self.write_with(|buf| buf.push_f32(value))
    }

    pub fn write(&self, data: &[u8]) {
        self.write_with(|buf| buf.push_bytes(data))
    }

    /// Empties the TX buffer to prepare the next outgoing message.
    pub fn start(&self) {
        self.write_with(|buf| {
            buf.reset();
            Ok(())
        })
    }

    /// Busy-waits until no transaction is in flight or held back. Never call
    /// it from a handler or the interrupt itself.
    pub fn wait(&self) {
        while self.is_busy() || self.has_pending_start() {
            core::hint::spin_loop();
        }
    }

    /// A transaction was started while a remote master owned the bus and
    /// has not been issued yet.
    pub fn has_pending_start(&self) -> bool {
        critical_section::with(|cs| self.pending.borrow(cs).get().is_some())
    }

    /// Services one pending event, if any. Returns whether one was handled.
    pub fn poll(&self) -> bool {
        if self.with_backend(|backend| backend.event_pending()) {
            interrupts::handle_event_interrupt(self);
            true
        } else {
            false
        }
    }

    /// Sends the TX buffer to `address`, then STOP.
    #[cfg(feature = "master")]
    pub fn transmit(&self, address: u8) -> Result<(), ErrorKind> {
        self.transmit_with_stop(address, true)
    }

    /// Sends the TX buffer to `address`. Without `stop` the bus stays owned and
    /// the next transaction begins with a repeated START.
    #[cfg(feature = "master")]
    pub fn transmit_with_stop(&self, address: u8, stop: bool) -> Result<(), ErrorKind> {
        self.begin(State::MasterTransmit, address, 0, stop)
    }

    /// Reads `length` bytes from `address` into the RX buffer, then STOP.
    #[cfg(feature = "master")]
    pub fn receive(&self, address: u8, length: usize) -> Result<(), ErrorKind> {
        self.receive_with_stop(address, length, true)
    }

    #[cfg(feature = "master")]
    pub fn receive_with_stop(&self, address: u8, length: usize, stop: bool) -> Result<(), ErrorKind> {
        if length == 0 {
            return self.reject(ErrorKind::Read);
        }
        if length > RXBUFSIZE {
            return self.reject(ErrorKind::Overflow);
        }
        self.begin(State::MasterReceive, address, length, stop)
    }

    #[cfg(feature = "master")]
    fn begin(&self, state: State, address: u8, length: usize, stop: bool) -> Result<(), ErrorKind> {
        let rejected = match state {
            State::MasterReceive => ErrorKind::Read,
            _ => ErrorKind::Write,
        };
        if address > MAX_ADDRESS {
            return self.reject(rejected);
        }

        let transfer = Transfer {
            address,
            length,
            stop,
            bus_held: false,
        };
        let accepted = critical_section::with(|cs| {
            if !matches!(self.state(), State::Ready) {
                return false;
            }
            if self.addressed.load(Ordering::SeqCst) {
                let pending = self.pending.borrow(cs);
                if pending.get().is_some() {
                    return false;
                }
                debug!("{:?} with {:#x} held until the bus is free", state, address);
                pending.set(Some((state, transfer)));
                return true;
            }
            self.launch(cs, state, transfer);
            true
        });

        if accepted {
            Ok(())
        } else {
            self.reject(rejected)
        }
    }

    /// Prepares the buffers and issues START for a master transaction.
    fn launch(&self, cs: CriticalSection<'_>, state: State, transfer: Transfer) {
        let cell = self.transfer.borrow(cs);
        let restart = cell.get().bus_held;
        cell.set(transfer);

        match state {
            State::MasterReceive => self.receive_buffer.borrow_ref_mut(cs).reset(),
            _ => self.send_buffer.borrow_ref_mut(cs).rewind(),
        }

        self.clear_error();
        self.state_holder.set_state(state);
        self.backend.borrow_ref_mut(cs).issue_start(restart);
        trace!("{:?} with {:#x}", state, transfer.address);
    }

    #[cfg(feature = "master")]
    fn reject(&self, error: ErrorKind) -> Result<(), ErrorKind> {
        warn!("transaction rejected in {:?}: {:?}", self.state(), error);
        self.latch_error(error);
        Err(error)
    }

    /// Handler for a finished master transmit, successful or not.
    pub fn set_on_transmit_handler(&self, handler: Handler<'h, Self>) {
        self.handlers.set(Slot::Transmit, handler)
    }

    /// Handler for a finished receive, master or slave.
    pub fn set_on_receive_handler(&self, handler: Handler<'h, Self>) {
        self.handlers.set(Slot::Receive, handler)
    }

    /// Handler filling the TX buffer when a remote master reads from us.
    pub fn set_on_request_handler(&self, handler: Handler<'h, Self>) {
        self.handlers.set(Slot::Request, handler)
    }

    /// Waits for the next completion event.
    pub async fn listen(&self) -> Event {
        self.channel.receive().await
    }

    pub fn try_listen(&self) -> Option<Event> {
        self.channel.try_receive().ok()
    }
}

impl<'h, B: BusBackend, const TXBUFSIZE: usize, const RXBUFSIZE: usize> InterruptBridge
    for Twi<'h, B, TXBUFSIZE, RXBUFSIZE>
{
    type Bus = B;

    fn with_bus<R>(&self, f: impl FnOnce(&mut B) -> R) -> R {
        self.with_backend(f)
    }

    fn get_state(&self) -> State {
        self.state_holder.get_state()
    }

    fn set_state(&self, state: State) {
        self.state_holder.set_state(state)
    }

    fn latch(&self, error: ErrorKind) {
        self.latch_error(error)
    }

    fn transfer(&self) -> Transfer {
        critical_section::with(|cs| self.transfer.borrow(cs).get())
    }

    fn set_bus_held(&self, held: bool) {
        critical_section::with(|cs| {
            let transfer = self.transfer.borrow(cs);
            transfer.set(Transfer {
                bus_held: held,
                ..transfer.get()
            });
        })
    }

    fn notify(&self, event: Event) {
        if self.channel.try_send(event).is_err() {
            trace!("event channel full, {:?} dropped", event);
        }

        let slot = match event {
            Event::Transmitted => Slot::Transmit,
            Event::Received { .. } => Slot::Receive,
            Event::Requested => Slot::Request,
            Event::Sent { .. } => return,
        };
        self.handlers.invoke(slot, self);
    }

    fn set_addressed(&self, addressed: bool) {
        self.addressed.store(addressed, Ordering::SeqCst);
    }

    fn start_pending(&self) {
        critical_section::with(|cs| {
            if !matches!(self.state(), State::Ready) {
                return;
            }
            if let Some((state, transfer)) = self.pending.borrow(cs).take() {
                self.launch(cs, state, transfer);
            }
        })
    }

    fn get_rxbuf_size(&self) -> usize {
        critical_section::with(|cs| self.receive_buffer.borrow_ref(cs).len())
    }

    fn rxbuf_is_full(&self) -> bool {
        critical_section::with(|cs| self.receive_buffer.borrow_ref(cs).is_full())
    }

    fn write_rxbuf_byte(&self, byte: u8) -> Result<(), BufferError> {
        critical_section::with(|cs| self.receive_buffer.borrow_ref_mut(cs).push_u8(byte))
    }

    fn reset_rxbuf(&self) {
        critical_section::with(|cs| self.receive_buffer.borrow_ref_mut(cs).reset())
    }

    fn pop_txbuf_byte(&self) -> Option<u8> {
        critical_section::with(|cs| self.send_buffer.borrow_ref_mut(cs).pop())
    }

    fn reset_txbuf(&self) {
        critical_section::with(|cs| self.send_buffer.borrow_ref_mut(cs).reset())
    }

    fn get_txbuf_sent(&self) -> usize {
        critical_section::with(|cs| self.send_buffer.borrow_ref(cs).consumed())
    }
}

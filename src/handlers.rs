use core::cell::Cell;

use critical_section::Mutex;

/// Completion handler.
///
/// Runs on the event context (the interrupt handler, or whoever calls
/// [`Twi::poll`](crate::Twi::poll)). It must not block and must not call
/// [`Twi::wait`](crate::Twi::wait). It may read the RX buffer, refill the TX
/// buffer and start the next transaction.
pub type Handler<'h, D> = &'h (dyn Fn(&D) + Sync);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Transmit,
    Receive,
    Request,
}

pub struct Handlers<'h, D> {
    on_transmit: Mutex<Cell<Option<Handler<'h, D>>>>,
    on_receive: Mutex<Cell<Option<Handler<'h, D>>>>,
    on_request: Mutex<Cell<Option<Handler<'h, D>>>>,
}

impl<'h, D> Handlers<'h, D> {
    pub const fn new() -> Self {
        Self {
            on_transmit: Mutex::new(Cell::new(None)),
            on_receive: Mutex::new(Cell::new(None)),
            on_request: Mutex::new(Cell::new(None)),
        }
    }

    fn slot(&self, slot: Slot) -> &Mutex<Cell<Option<Handler<'h, D>>>> {
        match slot {
            Slot::Transmit => &self.on_transmit,
            Slot::Receive => &self.on_receive,
            Slot::Request => &self.on_request,
        }
    }

    /// Replaces whatever handler `slot` held.
    pub fn set(&self, slot: Slot, handler: Handler<'h, D>) {
        critical_section::with(|cs| self.slot(slot).borrow(cs).set(Some(handler)));
    }

    pub fn get(&self, slot: Slot) -> Option<Handler<'h, D>> {
        critical_section::with(|cs| self.slot(slot).borrow(cs).get())
    }

    /// Calls the handler in `slot`, if one is set. Returns whether it ran.
    pub fn invoke(&self, slot: Slot, driver: &D) -> bool {
        match self.get(slot) {
            Some(handler) => {
                handler(driver);
                true
            }
            None => false,
        }
    }
}

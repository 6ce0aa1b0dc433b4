#![cfg_attr(not(test), no_std)]

#[macro_use]
mod fmt;

mod backend;
mod buffer;
pub mod clock;
mod handlers;
mod interrupts;
pub mod sim;
mod state_holder;
mod twi;

pub use backend::{BusBackend, Status};
pub use buffer::{BufferError, ByteBuffer};
pub use clock::Prescaler;
pub use handlers::Handler;
pub use interrupts::handle_event_interrupt;
pub use twi::{Config, Twi};

/// Largest 7-bit bus address.
pub const MAX_ADDRESS: u8 = 0x7F;

/// Default capacity of the TX and RX buffers.
pub const DEFAULT_BUFFER_LENGTH: usize = 32;

/// Transaction state of the driver. Exactly one holds at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, bytemuck::NoUninit)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum State {
    Disabled,
    Ready,
    MasterTransmit,
    MasterReceive,
    SlaveTransmit,
    SlaveReceive,
}

impl State {
    /// A transaction is in flight.
    pub const fn is_busy(self) -> bool {
        matches!(
            self,
            State::MasterTransmit | State::MasterReceive | State::SlaveTransmit | State::SlaveReceive
        )
    }
}

/// Value of the latched error register. The most recent error wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, bytemuck::NoUninit)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum ErrorKind {
    None = 0xFF,
    Overflow = 0xF0,
    Write = 0xF1,
    Read = 0xF2,
    BusError = 0xF3,
    ArbitrationLost = 0xF4,
    NoAck = 0xF5,
}

impl ErrorKind {
    pub const fn code(self) -> u8 {
        self as u8
    }

    pub const fn is_none(self) -> bool {
        matches!(self, ErrorKind::None)
    }
}

/// Completion notification, delivered to the matching handler and to
/// [`Twi::listen`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Event {
    /// Master transmit finished, successfully or not.
    Transmitted,
    /// Master or slave receive finished with `size` bytes in the RX buffer.
    Received { size: usize },
    /// A remote master asked for data.
    Requested,
    /// The remote master ended our slave-transmit turn after `sent` buffered bytes.
    Sent { sent: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    InvalidAddress,
    InvalidFrequency,
    FrequencyTooHigh,
    FrequencyTooLow,
    Busy,
}

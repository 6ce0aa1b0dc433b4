use crate::Prescaler;

/// What the peripheral reports after a bus action completed.
///
/// Mirrors the classic two-wire status register; see [`Status::code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Status {
    MasterStart,
    MasterRepeatedStart,
    MasterAddressWriteAck,
    MasterAddressWriteNack,
    MasterDataSentAck,
    MasterDataSentNack,
    ArbitrationLost,
    MasterAddressReadAck,
    MasterAddressReadNack,
    MasterDataReceivedAck,
    MasterDataReceivedNack,
    /// Own address received with the write bit. `arbitration_lost` is set when
    /// this interrupted one of our own master transactions.
    SlaveWriteAddressed { arbitration_lost: bool },
    SlaveGeneralCall { arbitration_lost: bool },
    SlaveDataReceivedAck,
    SlaveDataReceivedNack,
    /// STOP or repeated START while addressed as slave.
    SlaveStop,
    SlaveReadAddressed { arbitration_lost: bool },
    SlaveDataSentAck,
    SlaveDataSentNack,
    /// Last byte sent with ACK disabled, but the master acknowledged it anyway.
    SlaveLastDataSent,
    BusError,
    NoInfo,
}

impl Status {
    /// Status register code, prescaler bits masked out.
    pub const fn code(self) -> u8 {
        match self {
            Status::BusError => 0x00,
            Status::MasterStart => 0x08,
            Status::MasterRepeatedStart => 0x10,
            Status::MasterAddressWriteAck => 0x18,
            Status::MasterAddressWriteNack => 0x20,
            Status::MasterDataSentAck => 0x28,
            Status::MasterDataSentNack => 0x30,
            Status::ArbitrationLost => 0x38,
            Status::MasterAddressReadAck => 0x40,
            Status::MasterAddressReadNack => 0x48,
            Status::MasterDataReceivedAck => 0x50,
            Status::MasterDataReceivedNack => 0x58,
            Status::SlaveWriteAddressed { arbitration_lost: false } => 0x60,
            Status::SlaveWriteAddressed { arbitration_lost: true } => 0x68,
            Status::SlaveGeneralCall { arbitration_lost: false } => 0x70,
            Status::SlaveGeneralCall { arbitration_lost: true } => 0x78,
            Status::SlaveDataReceivedAck => 0x80,
            Status::SlaveDataReceivedNack => 0x88,
            Status::SlaveStop => 0xA0,
            Status::SlaveReadAddressed { arbitration_lost: false } => 0xA8,
            Status::SlaveReadAddressed { arbitration_lost: true } => 0xB0,
            Status::SlaveDataSentAck => 0xB8,
            Status::SlaveDataSentNack => 0xC0,
            Status::SlaveLastDataSent => 0xC8,
            Status::NoInfo => 0xF8,
        }
    }

    /// Decodes a raw status register value. The low three bits are ignored.
    pub const fn from_code(code: u8) -> Option<Self> {
        let status = match code & 0xF8 {
            0x00 => Status::BusError,
            0x08 => Status::MasterStart,
            0x10 => Status::MasterRepeatedStart,
            0x18 => Status::MasterAddressWriteAck,
            0x20 => Status::MasterAddressWriteNack,
            0x28 => Status::MasterDataSentAck,
            0x30 => Status::MasterDataSentNack,
            0x38 => Status::ArbitrationLost,
            0x40 => Status::MasterAddressReadAck,
            0x48 => Status::MasterAddressReadNack,
            0x50 => Status::MasterDataReceivedAck,
            0x58 => Status::MasterDataReceivedNack,
            0x60 => Status::SlaveWriteAddressed { arbitration_lost: false },
            0x68 => Status::SlaveWriteAddressed { arbitration_lost: true },
            0x70 => Status::SlaveGeneralCall { arbitration_lost: false },
            0x78 => Status::SlaveGeneralCall { arbitration_lost: true },
            // General call data reports the same way as addressed data.
            0x80 | 0x90 => Status::SlaveDataReceivedAck,
            0x88 | 0x98 => Status::SlaveDataReceivedNack,
            0xA0 => Status::SlaveStop,
            0xA8 => Status::SlaveReadAddressed { arbitration_lost: false },
            0xB0 => Status::SlaveReadAddressed { arbitration_lost: true },
            0xB8 => Status::SlaveDataSentAck,
            0xC0 => Status::SlaveDataSentNack,
            0xC8 => Status::SlaveLastDataSent,
            0xF8 => Status::NoInfo,
            _ => return None,
        };
        Some(status)
    }

    /// The remote side answered our address or data byte with NACK.
    pub const fn is_nack(self) -> bool {
        matches!(
            self,
            Status::MasterAddressWriteNack
                | Status::MasterAddressReadNack
                | Status::MasterDataSentNack
                | Status::SlaveDataSentNack
        )
    }

    pub const fn is_arbitration_loss(self) -> bool {
        matches!(
            self,
            Status::ArbitrationLost
                | Status::SlaveWriteAddressed { arbitration_lost: true }
                | Status::SlaveGeneralCall { arbitration_lost: true }
                | Status::SlaveReadAddressed { arbitration_lost: true }
        )
    }
}

/// Capability set of the physical two-wire peripheral.
///
/// The driver never touches registers itself. Every event is answered with
/// exactly one releasing action: [`issue_start`], [`issue_stop`],
/// [`shift_out_byte`], [`send_ack`], [`send_nack`], [`arm_next_event`] or
/// [`hold_bus`]. Until then the peripheral keeps SCL low.
///
/// [`issue_start`]: BusBackend::issue_start
/// [`issue_stop`]: BusBackend::issue_stop
/// [`shift_out_byte`]: BusBackend::shift_out_byte
/// [`send_ack`]: BusBackend::send_ack
/// [`send_nack`]: BusBackend::send_nack
/// [`arm_next_event`]: BusBackend::arm_next_event
/// [`hold_bus`]: BusBackend::hold_bus
pub trait BusBackend {
    fn enable(&mut self);

    fn disable(&mut self);

    /// Status of the event being serviced.
    fn status(&self) -> Status;

    /// An event is waiting to be serviced.
    fn event_pending(&self) -> bool;

    /// Requests a START, or a repeated START while holding the bus.
    fn issue_start(&mut self, restart: bool);

    fn issue_stop(&mut self);

    /// Loads `byte` into the shift register and releases the bus.
    fn shift_out_byte(&mut self, byte: u8);

    /// Byte latched by the last receive event.
    fn shift_in_byte(&mut self) -> u8;

    /// Releases the bus, acknowledging the next byte received.
    fn send_ack(&mut self);

    /// Releases the bus, refusing the next byte received.
    fn send_nack(&mut self);

    /// Releases the bus and keeps answering to the own address.
    fn arm_next_event(&mut self);

    /// Keeps the bus owned without servicing further events, so the next
    /// transaction can begin with a repeated START.
    fn hold_bus(&mut self);

    /// Own slave address; bits set in `mask` are ignored when matching.
    fn set_own_address(&mut self, address: u8, mask: u8);

    fn set_bitrate_divider(&mut self, divider: u8);

    fn set_prescaler(&mut self, prescaler: Prescaler);

    fn last_event_was_nack(&self) -> bool {
        self.status().is_nack()
    }

    fn last_event_was_arbitration_loss(&self) -> bool {
        self.status().is_arbitration_loss()
    }

    fn last_event_was_bus_error(&self) -> bool {
        matches!(self.status(), Status::BusError)
    }
}

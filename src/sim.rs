//! Software two-wire bus.
//!
//! [`SimBus`] stands in for the peripheral on hosted targets and in tests. It
//! plays the remote side of every transaction: [`SimTarget`]s answer when the
//! driver is master, queued controller transactions address the driver as
//! slave. Everything that crosses the wires is logged as [`Wire`] entries.

use heapless::{Deque, Vec};

use crate::{BusBackend, Prescaler, Status};

pub const WIRE_LOG_SIZE: usize = 256;
pub const SIM_BUFFER_SIZE: usize = 64;
pub const MAX_TARGETS: usize = 4;
pub const CONTROLLER_QUEUE_SIZE: usize = 4;

/// Value read from a target with nothing left to say.
pub const IDLE_BYTE: u8 = 0xFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Wire {
    Start,
    RepeatedStart,
    /// A byte and whether the receiving side acknowledged it.
    Byte { value: u8, ack: bool },
    Stop,
}

/// One-shot fault applied to the next bus action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Fault {
    /// Another master wins the bus during our next master action. If a
    /// controller transaction is queued, it is the winner and addresses us.
    ArbitrationLoss,
    BusError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SimError {
    QueueFull,
    TooLong,
}

/// Remote device the driver talks to as master.
#[derive(Debug, Clone)]
pub struct SimTarget {
    address: u8,
    received: Vec<u8, SIM_BUFFER_SIZE>,
    reply: Deque<u8, SIM_BUFFER_SIZE>,
    ack_limit: Option<usize>,
}

impl SimTarget {
    pub const fn new(address: u8) -> Self {
        Self {
            address,
            received: Vec::new(),
            reply: Deque::new(),
            ack_limit: None,
        }
    }

    /// Bytes handed out to master reads, in order. Extra bytes are dropped.
    pub fn with_reply(mut self, data: &[u8]) -> Self {
        for &byte in data {
            let _ = self.reply.push_back(byte);
        }
        self
    }

    /// Acknowledge only the first `limit` data bytes written.
    pub fn with_ack_limit(mut self, limit: usize) -> Self {
        self.ack_limit = Some(limit);
        self
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    /// Data bytes written by the driver and acknowledged.
    pub fn received(&self) -> &[u8] {
        &self.received
    }

    fn accept(&mut self, byte: u8) -> bool {
        let ack = self
            .ack_limit
            .map_or(true, |limit| self.received.len() < limit);
        ack && self.received.push(byte).is_ok()
    }

    fn next_reply(&mut self) -> u8 {
        self.reply.pop_front().unwrap_or(IDLE_BYTE)
    }
}

#[derive(Debug, Clone)]
enum Request {
    Write(Vec<u8, SIM_BUFFER_SIZE>),
    Read(usize),
}

/// Transaction of a remote master addressing the driver.
#[derive(Debug, Clone)]
struct SimController {
    address: u8,
    request: Request,
    pos: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum Mode {
    Idle,
    Held,
    MasterAddress,
    MasterWrite,
    MasterRead,
    SlaveReceive,
    SlaveTransmit,
}

pub struct SimBus {
    enabled: bool,
    own_address: Option<(u8, u8)>,
    divider: u8,
    prescaler: Prescaler,

    status: Status,
    pending: bool,
    ack: bool,
    data: u8,
    mode: Mode,
    fault: Option<Fault>,

    targets: Vec<SimTarget, MAX_TARGETS>,
    active_target: Option<usize>,
    controllers: Deque<SimController, CONTROLLER_QUEUE_SIZE>,
    active_controller: Option<SimController>,
    read_back: Vec<u8, SIM_BUFFER_SIZE>,

    wire: Vec<Wire, WIRE_LOG_SIZE>,
}

impl SimBus {
    pub const fn new() -> Self {
        Self {
            enabled: false,
            own_address: None,
            divider: 0,
            prescaler: Prescaler::Div1,
            status: Status::NoInfo,
            pending: false,
            ack: false,
            data: 0,
            mode: Mode::Idle,
            fault: None,
            targets: Vec::new(),
            active_target: None,
            controllers: Deque::new(),
            active_controller: None,
            read_back: Vec::new(),
            wire: Vec::new(),
        }
    }

    /// Attaches a remote target. At most [`MAX_TARGETS`] fit; extra ones are
    /// ignored.
    pub fn with_target(mut self, target: SimTarget) -> Self {
        let _ = self.targets.push(target);
        self
    }

    pub fn target(&self, address: u8) -> Option<&SimTarget> {
        self.targets.iter().find(|t| t.address == address)
    }

    pub fn target_mut(&mut self, address: u8) -> Option<&mut SimTarget> {
        self.targets.iter_mut().find(|t| t.address == address)
    }

    /// Queues a remote master writing `data` to `address`.
    pub fn controller_write(&mut self, address: u8, data: &[u8]) -> Result<(), SimError> {
        let data = Vec::from_slice(data).map_err(|_| SimError::TooLong)?;
        self.queue(SimController {
            address,
            request: Request::Write(data),
            pos: 0,
        })
    }

    /// Queues a remote master reading `length` bytes from `address`.
    pub fn controller_read(&mut self, address: u8, length: usize) -> Result<(), SimError> {
        if length == 0 || length > SIM_BUFFER_SIZE {
            return Err(SimError::TooLong);
        }
        self.queue(SimController {
            address,
            request: Request::Read(length),
            pos: 0,
        })
    }

    /// Bytes collected by the last remote master read.
    pub fn read_back(&self) -> &[u8] {
        &self.read_back
    }

    pub fn inject_fault(&mut self, fault: Fault) {
        self.fault = Some(fault);
    }

    pub fn wire(&self) -> &[Wire] {
        &self.wire
    }

    pub fn clear_wire(&mut self) {
        self.wire.clear();
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn own_address(&self) -> Option<(u8, u8)> {
        self.own_address
    }

    pub fn bitrate(&self) -> (u8, Prescaler) {
        (self.divider, self.prescaler)
    }

    /// The bus is kept owned for a repeated START.
    pub fn is_held(&self) -> bool {
        matches!(self.mode, Mode::Held)
    }

    fn queue(&mut self, controller: SimController) -> Result<(), SimError> {
        self.controllers
            .push_back(controller)
            .map_err(|_| SimError::QueueFull)?;
        self.start_next_controller(false);
        Ok(())
    }

    fn log(&mut self, wire: Wire) {
        let _ = self.wire.push(wire);
    }

    fn raise(&mut self, status: Status) {
        trace!("sim raises {:?}", status);
        self.status = status;
        self.pending = true;
    }

    fn answers_to(&self, address: u8) -> bool {
        self.own_address
            .map_or(false, |(own, mask)| (address ^ own) & !mask & 0x7F == 0)
    }

    /// Applies the pending fault, if it hits this kind of action.
    fn inject(&mut self, master: bool) -> bool {
        match self.fault {
            Some(Fault::BusError) => {
                self.fault = None;
                self.mode = Mode::Idle;
                self.active_target = None;
                self.active_controller = None;
                self.raise(Status::BusError);
                true
            }
            Some(Fault::ArbitrationLoss) if master => {
                self.fault = None;
                self.mode = Mode::Idle;
                self.active_target = None;
                self.start_next_controller(true);
                if !self.pending {
                    self.raise(Status::ArbitrationLost);
                }
                true
            }
            _ => false,
        }
    }

    fn start_next_controller(&mut self, arbitration_lost: bool) {
        if !self.enabled || self.pending || self.mode != Mode::Idle {
            return;
        }

        while let Some(controller) = self.controllers.pop_front() {
            let read = matches!(controller.request, Request::Read(_));
            let value = (controller.address << 1) | read as u8;
            let ack = self.ack && self.answers_to(controller.address);

            self.log(Wire::Start);
            self.log(Wire::Byte { value, ack });
            if !ack {
                self.log(Wire::Stop);
                continue;
            }

            if read {
                self.read_back.clear();
                self.mode = Mode::SlaveTransmit;
                self.raise(Status::SlaveReadAddressed { arbitration_lost });
            } else {
                self.mode = Mode::SlaveReceive;
                self.raise(Status::SlaveWriteAddressed { arbitration_lost });
            }
            self.active_controller = Some(controller);
            return;
        }
    }

    fn end_controller(&mut self) {
        self.log(Wire::Stop);
        self.active_controller = None;
        self.mode = Mode::Idle;
    }

    fn release(&mut self, ack: bool) {
        if !self.enabled {
            return;
        }
        self.pending = false;

        match self.mode {
            Mode::MasterRead => {
                if self.inject(true) {
                    return;
                }
                let value = match self.active_target {
                    Some(index) => self.targets[index].next_reply(),
                    None => IDLE_BYTE,
                };
                self.data = value;
                self.log(Wire::Byte { value, ack });
                self.raise(if ack {
                    Status::MasterDataReceivedAck
                } else {
                    Status::MasterDataReceivedNack
                });
            }
            Mode::SlaveReceive => {
                self.ack = ack;
                if self.inject(false) {
                    return;
                }
                let next = match &mut self.active_controller {
                    Some(SimController {
                        request: Request::Write(data),
                        pos,
                        ..
                    }) if *pos < data.len() => {
                        *pos += 1;
                        Some(data[*pos - 1])
                    }
                    _ => None,
                };
                match next {
                    Some(value) => {
                        self.data = value;
                        self.log(Wire::Byte { value, ack });
                        if ack {
                            self.raise(Status::SlaveDataReceivedAck);
                        } else {
                            // A refused byte ends the remote master's write.
                            self.end_controller();
                            self.raise(Status::SlaveDataReceivedNack);
                        }
                    }
                    None => {
                        self.end_controller();
                        self.raise(Status::SlaveStop);
                    }
                }
            }
            Mode::Idle => {
                self.ack = ack;
                self.start_next_controller(false);
            }
            _ => {}
        }
    }
}

impl Default for SimBus {
    fn default() -> Self {
        Self::new()
    }
}

impl BusBackend for SimBus {
    fn enable(&mut self) {
        self.enabled = true;
        self.mode = Mode::Idle;
    }

    fn disable(&mut self) {
        self.enabled = false;
        self.pending = false;
        self.ack = false;
        self.mode = Mode::Idle;
        self.active_target = None;
        self.active_controller = None;
    }

    fn status(&self) -> Status {
        self.status
    }

    fn event_pending(&self) -> bool {
        self.enabled && self.pending
    }

    fn issue_start(&mut self, restart: bool) {
        if !self.enabled {
            return;
        }
        self.pending = false;
        self.ack = true;
        if self.inject(true) {
            return;
        }

        self.log(if restart { Wire::RepeatedStart } else { Wire::Start });
        self.mode = Mode::MasterAddress;
        self.active_target = None;
        self.raise(if restart {
            Status::MasterRepeatedStart
        } else {
            Status::MasterStart
        });
    }

    fn issue_stop(&mut self) {
        if !self.enabled {
            return;
        }
        self.pending = false;
        self.ack = true;
        self.log(Wire::Stop);
        self.mode = Mode::Idle;
        self.active_target = None;
        self.start_next_controller(false);
    }

    fn shift_out_byte(&mut self, value: u8) {
        if !self.enabled {
            return;
        }
        self.pending = false;

        match self.mode {
            Mode::MasterAddress => {
                if self.inject(true) {
                    return;
                }
                let read = value & 1 == 1;
                self.active_target = self.targets.iter().position(|t| t.address == value >> 1);
                let ack = self.active_target.is_some();
                self.log(Wire::Byte { value, ack });
                self.mode = if read { Mode::MasterRead } else { Mode::MasterWrite };
                self.raise(match (read, ack) {
                    (false, true) => Status::MasterAddressWriteAck,
                    (false, false) => Status::MasterAddressWriteNack,
                    (true, true) => Status::MasterAddressReadAck,
                    (true, false) => Status::MasterAddressReadNack,
                });
            }
            Mode::MasterWrite => {
                if self.inject(true) {
                    return;
                }
                let ack = match self.active_target {
                    Some(index) => self.targets[index].accept(value),
                    None => false,
                };
                self.log(Wire::Byte { value, ack });
                self.raise(if ack {
                    Status::MasterDataSentAck
                } else {
                    Status::MasterDataSentNack
                });
            }
            Mode::SlaveTransmit => {
                if self.inject(false) {
                    return;
                }
                let ack = match &mut self.active_controller {
                    Some(SimController {
                        request: Request::Read(length),
                        pos,
                        ..
                    }) => {
                        *pos += 1;
                        *pos < *length
                    }
                    _ => false,
                };
                let _ = self.read_back.push(value);
                self.log(Wire::Byte { value, ack });
                if ack {
                    self.raise(Status::SlaveDataSentAck);
                } else {
                    self.end_controller();
                    self.raise(Status::SlaveDataSentNack);
                }
            }
            mode => {
                warn!("sim: byte {:#x} shifted out in {:?}", value, mode);
            }
        }
    }

    fn shift_in_byte(&mut self) -> u8 {
        self.data
    }

    fn send_ack(&mut self) {
        self.release(true);
    }

    fn send_nack(&mut self) {
        self.release(false);
    }

    fn arm_next_event(&mut self) {
        if !self.enabled {
            return;
        }
        self.pending = false;
        self.ack = true;
        if !matches!(self.mode, Mode::SlaveReceive | Mode::SlaveTransmit) {
            self.mode = Mode::Idle;
            self.start_next_controller(false);
        }
    }

    fn hold_bus(&mut self) {
        self.pending = false;
        self.mode = Mode::Held;
    }

    fn set_own_address(&mut self, address: u8, mask: u8) {
        self.own_address = Some((address, mask));
    }

    fn set_bitrate_divider(&mut self, divider: u8) {
        self.divider = divider;
    }

    fn set_prescaler(&mut self, prescaler: Prescaler) {
        self.prescaler = prescaler;
    }
}

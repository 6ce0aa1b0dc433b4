#![allow(dead_code)]

use fugit::HertzU32;
use twi_driver::{
    sim::{SimBus, Wire},
    Twi,
};

pub const CLOCK: HertzU32 = HertzU32::from_raw(16_000_000);

/// Services events until the simulated bus goes quiet.
pub fn run<const TX: usize, const RX: usize>(twi: &Twi<'_, SimBus, TX, RX>) -> usize {
    let mut handled = 0;
    while twi.poll() {
        handled += 1;
        assert!(handled < 1_000, "bus never settled");
    }
    handled
}

pub fn byte(value: u8, ack: bool) -> Wire {
    Wire::Byte { value, ack }
}

pub fn wire<const TX: usize, const RX: usize>(twi: &Twi<'_, SimBus, TX, RX>) -> Vec<Wire> {
    twi.with_backend(|bus| bus.wire().to_vec())
}

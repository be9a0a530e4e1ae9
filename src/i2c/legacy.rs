//! Legacy I2C IP (I2C0, I2C1, I2C2)
//!
//! The legacy controller has no byte counter. Every bus condition (START, address, ACK/NACK of
//! the last bytes, STOP) is requested by software at the right event, which is why the transfer
//! engine carries the short-read special cases for this generation.

use super::ip::{Events, Generation, Interrupts, Ip};
use super::timing::legacy_timing;
use super::{Direction, Error, Speed, Stop, TargetConfig};
use crate::reg::Registers;
use crate::time::Hertz;

const CTL0: usize = 0x00;
const CTL1: usize = 0x04;
const SADDR0: usize = 0x08;
const DATA: usize = 0x10;
const STAT0: usize = 0x14;
const STAT1: usize = 0x18;
const CKCFG: usize = 0x1C;
const RT: usize = 0x20;
const FMPCFG: usize = 0x90;

mod ctl0 {
    pub const I2CEN: u32 = 1 << 0;
    pub const SMBEN: u32 = 1 << 1;
    pub const START: u32 = 1 << 8;
    pub const STOP: u32 = 1 << 9;
    pub const ACKEN: u32 = 1 << 10;
    pub const POAP: u32 = 1 << 11;
    pub const SRESET: u32 = 1 << 15;
}

mod ctl1 {
    pub const I2CCLK: u32 = 0x7F;
    pub const ERRIE: u32 = 1 << 8;
    pub const EVIE: u32 = 1 << 9;
    pub const BUFIE: u32 = 1 << 10;
    pub const DMAON: u32 = 1 << 11;
    pub const DMALST: u32 = 1 << 12;
}

mod stat0 {
    pub const SBSEND: u32 = 1 << 0;
    pub const ADDSEND: u32 = 1 << 1;
    pub const BTC: u32 = 1 << 2;
    pub const ADD10SEND: u32 = 1 << 3;
    pub const STPDET: u32 = 1 << 4;
    pub const RBNE: u32 = 1 << 6;
    pub const TBE: u32 = 1 << 7;
    pub const BERR: u32 = 1 << 8;
    pub const LOSTARB: u32 = 1 << 9;
    pub const AERR: u32 = 1 << 10;
    pub const OUERR: u32 = 1 << 11;
}

mod stat1 {
    pub const I2CBSY: u32 = 1 << 1;
}

const SADDR0_ADDRESS: u32 = 0x3FF;
const SADDR0_ADDFORMAT: u32 = 1 << 15;
const CKCFG_CLKC: u32 = 0xFFF;
const CKCFG_DTCY: u32 = 1 << 14;
const CKCFG_FAST: u32 = 1 << 15;
const RT_RISETIME: u32 = 0x7F;
const FMPCFG_FMPEN: u32 = 1 << 0;

/// Mapping between normalised events and STAT0 bits
const EVENT_BITS: [(Events, u32); 11] = [
    (Events::START_SENT, stat0::SBSEND),
    (Events::ADDRESS_SENT, stat0::ADDSEND),
    (Events::BYTE_DONE, stat0::BTC),
    (Events::HEADER_SENT, stat0::ADD10SEND),
    (Events::STOP_DETECTED, stat0::STPDET),
    (Events::RX_NOT_EMPTY, stat0::RBNE),
    (Events::TX_EMPTY, stat0::TBE),
    (Events::BUS_ERROR, stat0::BERR),
    (Events::ARBITRATION_LOST, stat0::LOSTARB),
    (Events::NACK, stat0::AERR),
    (Events::OVERRUN, stat0::OUERR),
];

/// Legacy controller over its register bank
pub struct Legacy<R> {
    regs: R,
}

impl<R> Legacy<R> {
    pub const fn new(regs: R) -> Self {
        Legacy { regs }
    }

    pub fn regs(&self) -> &R {
        &self.regs
    }
}

impl<R> crate::Sealed for Legacy<R> {}

fn interrupt_bits(interrupts: Interrupts) -> u32 {
    let mut bits = 0;
    if interrupts.contains(Interrupts::ERROR) {
        bits |= ctl1::ERRIE;
    }
    if interrupts.contains(Interrupts::EVENT) {
        bits |= ctl1::EVIE;
    }
    if interrupts.contains(Interrupts::BUFFER) {
        bits |= ctl1::BUFIE;
    }
    bits
}

impl<R: Registers> Ip for Legacy<R> {
    fn generation(&self) -> Generation {
        Generation::Legacy
    }

    fn enable(&self) {
        self.regs.set_bits(CTL0, ctl0::I2CEN);
    }

    fn disable(&self) {
        self.regs.clear_bits(CTL0, ctl0::I2CEN);
    }

    fn soft_reset(&self) {
        self.regs.set_bits(CTL0, ctl0::SRESET);
        self.regs.clear_bits(CTL0, ctl0::SRESET);
    }

    fn set_controller_mode(&self) {
        self.regs.clear_bits(CTL0, ctl0::SMBEN);
        self.regs.clear_bits(SADDR0, SADDR0_ADDFORMAT);
    }

    fn is_busy(&self) -> bool {
        self.regs.is_set(STAT1, stat1::I2CBSY)
    }

    fn configure_timing(&self, pclk: Hertz, speed: Speed) -> Result<(), Error> {
        let timing = legacy_timing(pclk.raw(), speed)?;

        self.regs.modify(CTL1, |r| {
            (r & !ctl1::I2CCLK) | (timing.pclk_mhz as u32 & ctl1::I2CCLK)
        });
        self.regs.modify(CKCFG, |r| {
            let r = (r & !(CKCFG_CLKC | CKCFG_DTCY | CKCFG_FAST))
                | (timing.clkc as u32 & CKCFG_CLKC);
            if timing.fast {
                r | CKCFG_FAST | CKCFG_DTCY
            } else {
                r
            }
        });
        self.regs.write(RT, timing.rise_time as u32 & RT_RISETIME);
        if timing.fast_plus {
            self.regs.set_bits(FMPCFG, FMPCFG_FMPEN);
        } else {
            self.regs.clear_bits(FMPCFG, FMPCFG_FMPEN);
        }
        Ok(())
    }

    fn start(&self) {
        self.regs.set_bits(CTL0, ctl0::START);
    }

    fn stop(&self) {
        self.regs.set_bits(CTL0, ctl0::STOP);
    }

    fn set_ack(&self, ack: bool) {
        if ack {
            self.regs.set_bits(CTL0, ctl0::ACKEN);
        } else {
            self.regs.clear_bits(CTL0, ctl0::ACKEN);
        }
    }

    fn set_ack_position_next(&self, next: bool) {
        if next {
            self.regs.set_bits(CTL0, ctl0::POAP);
        } else {
            self.regs.clear_bits(CTL0, ctl0::POAP);
        }
    }

    fn send_address(&self, byte: u8) {
        self.regs.write(DATA, byte as u32);
    }

    fn clear_address_flag(&self) {
        let _ = self.regs.read(STAT0);
        let _ = self.regs.read(STAT1);
    }

    // Segments and hardware addressing only exist on the ADD IP
    fn program_target(&self, _address: u16, _ten_bit: bool, _direction: Direction) {}

    fn program_segment(&self, _nbytes: u8, _stop: Stop) {}

    fn set_autoend(&self, _autoend: bool) {}

    fn autoend(&self) -> bool {
        false
    }

    fn clear_ten_bit(&self) {}

    fn read_byte(&self) -> u8 {
        self.regs.read(DATA) as u8
    }

    fn write_byte(&self, byte: u8) {
        self.regs.write(DATA, byte as u32);
    }

    fn enable_interrupts(&self, interrupts: Interrupts) {
        self.regs.set_bits(CTL1, interrupt_bits(interrupts));
    }

    fn disable_interrupts(&self, interrupts: Interrupts) {
        self.regs.clear_bits(CTL1, interrupt_bits(interrupts));
    }

    fn set_dma_requests(&self, direction: Option<Direction>) {
        if direction.is_some() {
            self.regs.set_bits(CTL1, ctl1::DMAON);
        } else {
            self.regs.clear_bits(CTL1, ctl1::DMAON);
        }
    }

    fn set_dma_last(&self, last: bool) {
        if last {
            self.regs.set_bits(CTL1, ctl1::DMALST);
        } else {
            self.regs.clear_bits(CTL1, ctl1::DMALST);
        }
    }

    fn events(&self) -> Events {
        let stat = self.regs.read(STAT0);
        EVENT_BITS
            .iter()
            .filter(|(_, bit)| stat & bit != 0)
            .fold(Events::empty(), |acc, (event, _)| acc | *event)
    }

    fn clear_events(&self, events: Events) {
        // Error flags are cleared by writing 0, the other flags by their read sequences
        let events = events & Events::ERRORS.union(Events::NACK);
        let mask = EVENT_BITS
            .iter()
            .filter(|(event, _)| events.contains(*event))
            .fold(0, |acc, (_, bit)| acc | bit);
        if mask != 0 {
            self.regs.clear_bits(STAT0, mask);
            interrupt_clear_clock_sync_delay!(self.regs, STAT0);
        }
    }

    fn data_register(&self, _direction: Direction) -> usize {
        self.regs.address(DATA)
    }

    fn restore_target(&self, config: &TargetConfig) {
        self.disable();
        self.regs.modify(SADDR0, |r| {
            let r = r & !(SADDR0_ADDRESS | SADDR0_ADDFORMAT);
            if config.ten_bit() {
                r | SADDR0_ADDFORMAT | (config.own_address as u32 & SADDR0_ADDRESS)
            } else {
                r | ((config.own_address as u32 & 0x7F) << 1)
            }
        });
        self.enable();
    }
}

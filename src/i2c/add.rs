//! ADD I2C IP
//!
//! The ADD controller counts bytes in hardware (up to 255 per segment), sends the address phase
//! on its own and can end a transfer with an automatic STOP.

use super::ip::{Events, Generation, Interrupts, Ip};
use super::timing::add_timing;
use super::{Direction, Error, Speed, Stop, TargetConfig};
use crate::reg::Registers;
use crate::time::Hertz;

const CTL0: usize = 0x00;
const CTL1: usize = 0x04;
const SADDR0: usize = 0x08;
const TIMING: usize = 0x10;
const STAT: usize = 0x18;
const STATC: usize = 0x1C;
const RDATA: usize = 0x24;
const TDATA: usize = 0x28;

mod ctl0 {
    pub const I2CEN: u32 = 1 << 0;
    pub const TIE: u32 = 1 << 1;
    pub const RBNEIE: u32 = 1 << 2;
    pub const ADDMIE: u32 = 1 << 3;
    pub const NACKIE: u32 = 1 << 4;
    pub const STPDETIE: u32 = 1 << 5;
    pub const TCIE: u32 = 1 << 6;
    pub const ERRIE: u32 = 1 << 7;
    pub const DENT: u32 = 1 << 14;
    pub const DENR: u32 = 1 << 15;
}

mod ctl1 {
    pub const SADDRESS: u32 = 0x3FF;
    pub const TRDIR: u32 = 1 << 10;
    pub const ADD10EN: u32 = 1 << 11;
    pub const HEAD10R: u32 = 1 << 12;
    pub const START: u32 = 1 << 13;
    pub const STOP: u32 = 1 << 14;
    pub const BYTENUM_SHIFT: u32 = 16;
    pub const BYTENUM: u32 = 0xFF << BYTENUM_SHIFT;
    pub const RELOAD: u32 = 1 << 24;
    pub const AUTOEND: u32 = 1 << 25;
}

mod stat {
    pub const TI: u32 = 1 << 1;
    pub const RBNE: u32 = 1 << 2;
    pub const ADDSEND: u32 = 1 << 3;
    pub const NACK: u32 = 1 << 4;
    pub const STPDET: u32 = 1 << 5;
    pub const TC: u32 = 1 << 6;
    pub const TCR: u32 = 1 << 7;
    pub const BERR: u32 = 1 << 8;
    pub const LOSTARB: u32 = 1 << 9;
    pub const OUERR: u32 = 1 << 10;
    pub const I2CBSY: u32 = 1 << 15;
}

/// Clear bits in STATC share the positions of their STAT flags
mod statc {
    pub const ADDSENDC: u32 = 1 << 3;
    pub const NACKC: u32 = 1 << 4;
    pub const STPDETC: u32 = 1 << 5;
    pub const BERRC: u32 = 1 << 8;
    pub const LOSTARBC: u32 = 1 << 9;
    pub const OUERRC: u32 = 1 << 10;
}

const SADDR0_ADDRESS: u32 = 0x3FF;
const SADDR0_ADDFORMAT: u32 = 1 << 10;
const SADDR0_ADDRESSEN: u32 = 1 << 15;

const EVENT_BITS: [(Events, u32); 10] = [
    (Events::TX_READY, stat::TI),
    (Events::RX_NOT_EMPTY, stat::RBNE),
    (Events::NACK, stat::NACK),
    (Events::STOP_DETECTED, stat::STPDET),
    (Events::TRANSFER_COMPLETE, stat::TC),
    (Events::RELOAD, stat::TCR),
    (Events::BUS_ERROR, stat::BERR),
    (Events::ARBITRATION_LOST, stat::LOSTARB),
    (Events::OVERRUN, stat::OUERR),
    (Events::ADDRESS_SENT, stat::ADDSEND),
];

const CLEAR_BITS: [(Events, u32); 6] = [
    (Events::ADDRESS_SENT, statc::ADDSENDC),
    (Events::NACK, statc::NACKC),
    (Events::STOP_DETECTED, statc::STPDETC),
    (Events::BUS_ERROR, statc::BERRC),
    (Events::ARBITRATION_LOST, statc::LOSTARBC),
    (Events::OVERRUN, statc::OUERRC),
];

/// ADD controller over its register bank
pub struct Add<R> {
    regs: R,
}

impl<R> Add<R> {
    pub const fn new(regs: R) -> Self {
        Add { regs }
    }

    pub fn regs(&self) -> &R {
        &self.regs
    }
}

impl<R> crate::Sealed for Add<R> {}

fn interrupt_bits(interrupts: Interrupts) -> u32 {
    [
        (Interrupts::ERROR, ctl0::ERRIE),
        (Interrupts::TX, ctl0::TIE),
        (Interrupts::RX, ctl0::RBNEIE),
        (Interrupts::ADDRESS, ctl0::ADDMIE),
        (Interrupts::NACK, ctl0::NACKIE),
        (Interrupts::STOP, ctl0::STPDETIE),
        (Interrupts::COMPLETE, ctl0::TCIE),
    ]
    .iter()
    .filter(|(i, _)| interrupts.contains(*i))
    .fold(0, |acc, (_, bit)| acc | bit)
}

impl<R: Registers> Ip for Add<R> {
    fn generation(&self) -> Generation {
        Generation::Add
    }

    fn enable(&self) {
        self.regs.set_bits(CTL0, ctl0::I2CEN);
    }

    fn disable(&self) {
        self.regs.clear_bits(CTL0, ctl0::I2CEN);
    }

    // Toggling I2CEN is the reset of this IP
    fn soft_reset(&self) {}

    fn set_controller_mode(&self) {}

    fn is_busy(&self) -> bool {
        self.regs.is_set(STAT, stat::I2CBSY)
    }

    fn configure_timing(&self, pclk: Hertz, speed: Speed) -> Result<(), Error> {
        let timing = add_timing(pclk.raw(), speed)?;
        self.regs.write(TIMING, timing.bits());
        Ok(())
    }

    fn start(&self) {
        self.regs.set_bits(CTL1, ctl1::START);
    }

    fn stop(&self) {
        self.regs.set_bits(CTL1, ctl1::STOP);
    }

    // ACK generation and the address phase are handled by the hardware
    fn set_ack(&self, _ack: bool) {}

    fn set_ack_position_next(&self, _next: bool) {}

    fn send_address(&self, _byte: u8) {}

    fn clear_address_flag(&self) {
        self.regs.write(STATC, statc::ADDSENDC);
    }

    fn program_target(&self, address: u16, ten_bit: bool, direction: Direction) {
        self.regs.modify(CTL1, |r| {
            let mut r = (r & !(ctl1::SADDRESS | ctl1::TRDIR | ctl1::ADD10EN | ctl1::HEAD10R))
                | (address as u32 & ctl1::SADDRESS);
            if ten_bit {
                r |= ctl1::ADD10EN;
            }
            if direction == Direction::Read {
                r |= ctl1::TRDIR;
            }
            r
        });
    }

    fn program_segment(&self, nbytes: u8, stop: Stop) {
        self.regs.modify(CTL1, |r| {
            let r = (r & !(ctl1::BYTENUM | ctl1::RELOAD | ctl1::AUTOEND))
                | ((nbytes as u32) << ctl1::BYTENUM_SHIFT);
            match stop {
                Stop::RepeatStart => r,
                Stop::Automatic => r | ctl1::AUTOEND,
                Stop::Reload => r | ctl1::RELOAD,
            }
        });
    }

    fn set_autoend(&self, autoend: bool) {
        if autoend {
            self.regs.set_bits(CTL1, ctl1::AUTOEND);
        } else {
            self.regs.clear_bits(CTL1, ctl1::AUTOEND);
        }
    }

    fn autoend(&self) -> bool {
        self.regs.is_set(CTL1, ctl1::AUTOEND)
    }

    fn clear_ten_bit(&self) {
        self.regs.clear_bits(CTL1, ctl1::ADD10EN | ctl1::HEAD10R);
    }

    fn read_byte(&self) -> u8 {
        self.regs.read(RDATA) as u8
    }

    fn write_byte(&self, byte: u8) {
        self.regs.write(TDATA, byte as u32);
    }

    fn enable_interrupts(&self, interrupts: Interrupts) {
        self.regs.set_bits(CTL0, interrupt_bits(interrupts));
    }

    fn disable_interrupts(&self, interrupts: Interrupts) {
        self.regs.clear_bits(CTL0, interrupt_bits(interrupts));
    }

    fn set_dma_requests(&self, direction: Option<Direction>) {
        self.regs.modify(CTL0, |r| {
            let r = r & !(ctl0::DENT | ctl0::DENR);
            match direction {
                Some(Direction::Write) => r | ctl0::DENT,
                Some(Direction::Read) => r | ctl0::DENR,
                None => r,
            }
        });
    }

    fn set_dma_last(&self, _last: bool) {}

    fn events(&self) -> Events {
        let flags = self.regs.read(STAT);
        EVENT_BITS
            .iter()
            .filter(|(_, bit)| flags & bit != 0)
            .fold(Events::empty(), |acc, (event, _)| acc | *event)
    }

    fn clear_events(&self, events: Events) {
        let mask = CLEAR_BITS
            .iter()
            .filter(|(event, _)| events.contains(*event))
            .fold(0, |acc, (_, bit)| acc | bit);
        if mask != 0 {
            self.regs.write(STATC, mask);
            interrupt_clear_clock_sync_delay!(self.regs, STAT);
        }
    }

    fn data_register(&self, direction: Direction) -> usize {
        match direction {
            Direction::Read => self.regs.address(RDATA),
            Direction::Write => self.regs.address(TDATA),
        }
    }

    fn restore_target(&self, config: &TargetConfig) {
        self.disable();
        let address = if config.ten_bit() {
            (config.own_address as u32 & SADDR0_ADDRESS) | SADDR0_ADDFORMAT
        } else {
            (config.own_address as u32 & 0x7F) << 1
        };
        self.regs.write(SADDR0, address | SADDR0_ADDRESSEN);
        self.enable();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reg::fake::FakeRegs;
    use crate::time::RateExtU32;

    fn add() -> Add<FakeRegs> {
        Add::new(FakeRegs::new(0x4000_C400, 0x100))
    }

    #[test]
    fn segment_programming() {
        let ip = add();
        ip.regs().set(CTL1, ctl1::AUTOEND | (3 << ctl1::BYTENUM_SHIFT));

        ip.program_segment(255, Stop::Reload);
        assert_eq!(ip.regs().get(CTL1), ctl1::RELOAD | (255 << ctl1::BYTENUM_SHIFT));
        assert!(!ip.autoend());

        ip.program_segment(45, Stop::Automatic);
        assert_eq!(ip.regs().get(CTL1), ctl1::AUTOEND | (45 << ctl1::BYTENUM_SHIFT));
        assert!(ip.autoend());

        ip.program_segment(2, Stop::RepeatStart);
        assert_eq!(ip.regs().get(CTL1), 2 << ctl1::BYTENUM_SHIFT);
    }

    #[test]
    fn target_address_and_direction() {
        let ip = add();
        ip.program_target(0x50 << 1, false, Direction::Read);
        assert_eq!(ip.regs().get(CTL1), 0xA0 | ctl1::TRDIR);

        ip.program_target(0x2A5, true, Direction::Write);
        assert_eq!(ip.regs().get(CTL1), 0x2A5 | ctl1::ADD10EN);

        ip.regs().set_bits(CTL1, ctl1::HEAD10R);
        ip.clear_ten_bit();
        assert_eq!(ip.regs().get(CTL1), 0x2A5);
    }

    #[test]
    fn dma_request_bits_follow_direction() {
        let ip = add();
        ip.set_dma_requests(Some(Direction::Write));
        assert_eq!(ip.regs().get(CTL0), ctl0::DENT);
        ip.set_dma_requests(Some(Direction::Read));
        assert_eq!(ip.regs().get(CTL0), ctl0::DENR);
        ip.set_dma_requests(None);
        assert_eq!(ip.regs().get(CTL0), 0);
    }

    #[test]
    fn target_restore_programs_own_address_only() {
        let ip = add();
        ip.restore_target(&TargetConfig::new(0x10));
        assert_eq!(ip.regs().get(SADDR0), (0x10 << 1) | SADDR0_ADDRESSEN);
        assert_eq!(ip.regs().get(CTL0), ctl0::I2CEN);

        ip.restore_target(&TargetConfig::new(0x2A5).own_address_mode(crate::i2c::AddressMode::TenBit));
        assert_eq!(
            ip.regs().get(SADDR0),
            0x2A5 | SADDR0_ADDFORMAT | SADDR0_ADDRESSEN
        );
        assert_eq!(ip.regs().get(CTL0), ctl0::I2CEN);
    }

    #[test]
    fn clear_writes_statc() {
        let ip = add();
        ip.clear_events(Events::NACK | Events::STOP_DETECTED | Events::RX_NOT_EMPTY);
        assert_eq!(ip.regs().get(STATC), statc::NACKC | statc::STPDETC);
    }

    #[test]
    fn timing_register_written() {
        let ip = add();
        ip.configure_timing(48.MHz(), Speed::Standard).unwrap();
        assert_eq!(ip.regs().get(TIMING) >> 28, 15);
        assert_eq!(
            ip.configure_timing(60.MHz(), Speed::Standard),
            Err(Error::NotSupported)
        );
    }
}

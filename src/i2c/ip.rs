//! Controller capability interface
//!
//! Two register sets implement the I2C controller on GD32 parts: the original "legacy" IP and the
//! newer "ADD" IP. The transfer engine only talks to the bus through [`Ip`], so one state machine
//! drives both. [`AnyIp`] selects the implementation from the peripheral base address when a
//! single binary has to handle instances of both kinds.

use super::{Direction, Error, Speed, Stop, TargetConfig};
use crate::reg::Registers;
use crate::time::Hertz;

pub use super::add::Add;
pub use super::legacy::Legacy;

/// Hardware generation of a controller instance
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Generation {
    Legacy,
    Add,
}

bitmask! {
    /// Normalised status events. Each generation reports the subset it has.
    pub struct Events: u32 {
        /// START condition sent (legacy)
        const START_SENT = 1 << 0;
        /// First byte of a 10-bit header sent (legacy)
        const HEADER_SENT = 1 << 1;
        /// Address acknowledged by the target (legacy)
        const ADDRESS_SENT = 1 << 2;
        /// Byte transfer finished with both data and shift registers idle (legacy)
        const BYTE_DONE = 1 << 3;
        const RX_NOT_EMPTY = 1 << 4;
        /// Transmit data register empty (legacy)
        const TX_EMPTY = 1 << 5;
        /// Transmit interrupt status: the next byte must be written (ADD)
        const TX_READY = 1 << 6;
        /// NACK received. On legacy this is the acknowledge error flag.
        const NACK = 1 << 7;
        const STOP_DETECTED = 1 << 8;
        /// Byte count of the last segment reached without AUTOEND (ADD)
        const TRANSFER_COMPLETE = 1 << 9;
        /// Byte count of a segment reached with RELOAD set (ADD)
        const RELOAD = 1 << 10;
        const BUS_ERROR = 1 << 11;
        const ARBITRATION_LOST = 1 << 12;
        const OVERRUN = 1 << 13;
    }
}

impl Events {
    /// Events reported through the error interrupt
    pub const ERRORS: Self = Self::from_bits(
        Self::BUS_ERROR.bits() | Self::ARBITRATION_LOST.bits() | Self::OVERRUN.bits(),
    );
}

bitmask! {
    /// Interrupt sources. Each generation ignores the sources it does not have.
    pub struct Interrupts: u32 {
        const ERROR = 1 << 0;
        /// Event interrupt (legacy)
        const EVENT = 1 << 1;
        /// Buffer interrupt (legacy)
        const BUFFER = 1 << 2;
        /// Transmit interrupt (ADD)
        const TX = 1 << 3;
        /// Receive interrupt (ADD)
        const RX = 1 << 4;
        /// Address match interrupt (ADD)
        const ADDRESS = 1 << 5;
        /// NACK interrupt (ADD)
        const NACK = 1 << 6;
        /// STOP detection interrupt (ADD)
        const STOP = 1 << 7;
        /// Transfer complete and reload interrupt (ADD)
        const COMPLETE = 1 << 8;
    }
}

impl Interrupts {
    pub const ALL: Self = Self::from_bits(0x1FF);
}

/// Register level operations the transfer engine needs from a controller.
///
/// Every method is a short, non-blocking register access. Methods that only exist on one
/// generation are no-ops on the other.
pub trait Ip: crate::Sealed {
    fn generation(&self) -> Generation;

    fn enable(&self);

    fn disable(&self);

    /// Pulse the software reset bit (legacy)
    fn soft_reset(&self);

    /// Select I2C controller operation (legacy: leave SMBus mode)
    fn set_controller_mode(&self);

    /// The bus is busy (a START was seen and no STOP since)
    fn is_busy(&self) -> bool;

    /// Derive and write the clock timing for `speed` from the peripheral clock `pclk`
    fn configure_timing(&self, pclk: Hertz, speed: Speed) -> Result<(), Error>;

    fn start(&self);

    fn stop(&self);

    /// Acknowledge received bytes (legacy)
    fn set_ack(&self, ack: bool);

    /// The ACK setting applies to the next byte rather than the current one (legacy)
    fn set_ack_position_next(&self, next: bool);

    /// Write an address or 10-bit header byte to the data register (legacy)
    fn send_address(&self, byte: u8);

    /// Clear the address-sent flag by the STAT0/STAT1 read sequence (legacy)
    fn clear_address_flag(&self);

    /// Program target address and direction (ADD). `address` is the raw 10-bit value, or the 7-bit
    /// address already shifted into bits 7:1.
    fn program_target(&self, address: u16, ten_bit: bool, direction: Direction);

    /// Program the byte count of the next segment and how it ends (ADD)
    fn program_segment(&self, nbytes: u8, stop: Stop);

    fn set_autoend(&self, autoend: bool);

    fn autoend(&self) -> bool;

    /// Leave 10-bit addressing mode (ADD)
    fn clear_ten_bit(&self);

    fn read_byte(&self) -> u8;

    fn write_byte(&self, byte: u8);

    fn enable_interrupts(&self, interrupts: Interrupts);

    fn disable_interrupts(&self, interrupts: Interrupts);

    /// Route data register requests to the DMA controller. `None` disables requests.
    fn set_dma_requests(&self, direction: Option<Direction>);

    /// The next DMA end of transfer is the last one of a receive (legacy)
    fn set_dma_last(&self, last: bool);

    fn events(&self) -> Events;

    fn clear_events(&self, events: Events);

    /// Bus address of the data register used for `direction`, for DMA descriptors
    fn data_register(&self, direction: Direction) -> usize;

    /// Put the peripheral back into target mode after a controller transfer
    fn restore_target(&self, config: &TargetConfig);
}

/// A controller of either generation, selected at construction
pub enum AnyIp<R> {
    Legacy(Legacy<R>),
    Add(Add<R>),
}

/// Base addresses of the controllers implemented with the legacy IP
pub const LEGACY_BASES: [usize; 3] = [0x4000_5400, 0x4000_5800, 0x4000_5C00];

impl<R: Registers> AnyIp<R> {
    /// Pick the implementation for the instance at `base`. I2C0, I2C1 and I2C2 use the legacy IP,
    /// every other instance the ADD IP.
    pub fn from_base(base: usize, regs: R) -> Self {
        if LEGACY_BASES.contains(&base) {
            AnyIp::Legacy(Legacy::new(regs))
        } else {
            AnyIp::Add(Add::new(regs))
        }
    }
}

impl<R> crate::Sealed for AnyIp<R> {}

macro_rules! dispatch {
    ($self:ident, $ip:ident => $e:expr) => {
        match $self {
            AnyIp::Legacy($ip) => $e,
            AnyIp::Add($ip) => $e,
        }
    };
}

impl<R: Registers> Ip for AnyIp<R> {
    fn generation(&self) -> Generation {
        dispatch!(self, ip => ip.generation())
    }

    fn enable(&self) {
        dispatch!(self, ip => ip.enable())
    }

    fn disable(&self) {
        dispatch!(self, ip => ip.disable())
    }

    fn soft_reset(&self) {
        dispatch!(self, ip => ip.soft_reset())
    }

    fn set_controller_mode(&self) {
        dispatch!(self, ip => ip.set_controller_mode())
    }

    fn is_busy(&self) -> bool {
        dispatch!(self, ip => ip.is_busy())
    }

    fn configure_timing(&self, pclk: Hertz, speed: Speed) -> Result<(), Error> {
        dispatch!(self, ip => ip.configure_timing(pclk, speed))
    }

    fn start(&self) {
        dispatch!(self, ip => ip.start())
    }

    fn stop(&self) {
        dispatch!(self, ip => ip.stop())
    }

    fn set_ack(&self, ack: bool) {
        dispatch!(self, ip => ip.set_ack(ack))
    }

    fn set_ack_position_next(&self, next: bool) {
        dispatch!(self, ip => ip.set_ack_position_next(next))
    }

    fn send_address(&self, byte: u8) {
        dispatch!(self, ip => ip.send_address(byte))
    }

    fn clear_address_flag(&self) {
        dispatch!(self, ip => ip.clear_address_flag())
    }

    fn program_target(&self, address: u16, ten_bit: bool, direction: Direction) {
        dispatch!(self, ip => ip.program_target(address, ten_bit, direction))
    }

    fn program_segment(&self, nbytes: u8, stop: Stop) {
        dispatch!(self, ip => ip.program_segment(nbytes, stop))
    }

    fn set_autoend(&self, autoend: bool) {
        dispatch!(self, ip => ip.set_autoend(autoend))
    }

    fn autoend(&self) -> bool {
        dispatch!(self, ip => ip.autoend())
    }

    fn clear_ten_bit(&self) {
        dispatch!(self, ip => ip.clear_ten_bit())
    }

    fn read_byte(&self) -> u8 {
        dispatch!(self, ip => ip.read_byte())
    }

    fn write_byte(&self, byte: u8) {
        dispatch!(self, ip => ip.write_byte(byte))
    }

    fn enable_interrupts(&self, interrupts: Interrupts) {
        dispatch!(self, ip => ip.enable_interrupts(interrupts))
    }

    fn disable_interrupts(&self, interrupts: Interrupts) {
        dispatch!(self, ip => ip.disable_interrupts(interrupts))
    }

    fn set_dma_requests(&self, direction: Option<Direction>) {
        dispatch!(self, ip => ip.set_dma_requests(direction))
    }

    fn set_dma_last(&self, last: bool) {
        dispatch!(self, ip => ip.set_dma_last(last))
    }

    fn events(&self) -> Events {
        dispatch!(self, ip => ip.events())
    }

    fn clear_events(&self, events: Events) {
        dispatch!(self, ip => ip.clear_events(events))
    }

    fn data_register(&self, direction: Direction) -> usize {
        dispatch!(self, ip => ip.data_register(direction))
    }

    fn restore_target(&self, config: &TargetConfig) {
        dispatch!(self, ip => ip.restore_target(config))
    }
}

//! Inter Integrated Circuit (I2C) controller
//!
//! This module drives the I2C controllers of GD32 parts as a bus controller. Two register sets
//! exist across the family: the legacy IP of I2C0 to I2C2, which needs software to sequence every
//! bus condition, and the ADD IP of the newer instances, which counts bytes in hardware. One
//! transfer engine drives both through the [`ip::Ip`] interface.
//!
//! # Usage
//!
//! The state that the interrupt handlers share with the driver lives in a [`Shared`] with a
//! `'static` lifetime, usually a `static`:
//!
//! ```ignore
//! static I2C0: Shared<Legacy<Mmio>> = Shared::new(Legacy::new(unsafe { Mmio::new(0x4000_5400) }));
//!
//! #[interrupt]
//! fn I2C0_EV() {
//!     I2C0.on_event();
//! }
//!
//! #[interrupt]
//! fn I2C0_ER() {
//!     I2C0.on_error();
//! }
//!
//! let mut i2c = I2c::new(&I2C0, delay, 50.MHz(), Config::new(Speed::Fast))?;
//! ```
//!
//! A transaction is a slice of [`Message`]s. Consecutive messages of the same direction are moved
//! as one sub-transfer without a repeated START in between; a direction change must be requested
//! with [`Message::with_restart`]. The last message always ends with STOP.
//!
//! ```ignore
//! // Set the EEPROM address pointer, then read back
//! let pointer = [0x00];
//! let mut data = [0u8; 16];
//! i2c.transfer(
//!     &mut [Message::write(&pointer), Message::read(&mut data).with_restart()],
//!     0x50,
//! )?;
//! ```
//!
//! The driver also implements the embedded-hal [`I2c`](embedded_hal::i2c::I2c) trait for 7-bit
//! and 10-bit addresses.
//!
//! ## DMA
//!
//! Give [`Shared::with_dma`] a transmit and a receive channel and call [`I2c::enable_dma`].
//! Sub-transfers of at least [`Config::dma_threshold`] bytes then move their data with DMA. If the
//! DMA does not complete within [`Config::dma_timeout`] the sub-transfer is retried from its first
//! byte with interrupt driven transfers.

use core::cell::RefCell;
use core::sync::atomic::AtomicU32;

use critical_section::Mutex;
use embedded_hal::delay::DelayNs;

use crate::dma::{NoDma, Stream, StreamLink};
use crate::sync::Completion;
use crate::time::Hertz;

pub mod config;
pub use config::{Config, TargetConfig};

mod add;
mod dma;
mod fsm;
mod hal;
pub mod ip;
mod legacy;
pub mod message;
mod timing;

#[cfg(test)]
mod sim;

pub use fsm::State;
pub use ip::{Add, AnyIp, Ip, Legacy};
pub use message::{Flags, Message};

use fsm::{Group, Transfer, MAX_SEGMENT};
use ip::{Events, Generation, Interrupts};

/// Busy-poll budget for the bus to go idle
const IDLE_POLLS: u32 = 10_000;

/// Busy-poll budget for the bus to go idle after a recovery
const RECOVERY_POLLS: u32 = 100;

/// I2C error
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub enum Error {
    /// Malformed message sequence, target address or speed class
    InvalidInput,
    /// The peripheral clock cannot produce the requested speed
    NotSupported,
    /// The bus stayed busy and could not be recovered
    Busy,
    /// The transfer failed on the bus. [`I2c::last_errors`] tells why.
    Io,
}

impl Error {
    /// Negative error number for callers that speak errno
    pub const fn errno(self) -> i32 {
        match self {
            Error::InvalidInput => -22,
            Error::NotSupported => -134,
            Error::Busy => -16,
            Error::Io => -5,
        }
    }
}

bitmask! {
    /// Conditions accumulated during the last sub-transfer
    pub struct ErrorFlags: u8 {
        /// Misplaced START or STOP
        const BUS = 1 << 0;
        const ARBITRATION = 1 << 1;
        /// Address or data byte not acknowledged
        const NACK = 1 << 2;
        /// Bus busy, recovery failed
        const BUSY = 1 << 4;
        /// Overrun, or more data received than requested
        const OVERFLOW = 1 << 5;
    }
}

/// Direction of transfer
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    /// Target to controller
    Read,
    /// Controller to target
    Write,
}

/// How a hardware segment of the ADD IP ends
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Stop {
    /// Hold the bus once the byte count is reached, so that software can issue a repeated START
    RepeatStart,
    /// Generate a STOP condition once the byte count is reached
    Automatic,
    /// Another segment of the same transfer follows
    Reload,
}

/// Addressing mode
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AddressMode {
    SevenBit,
    TenBit,
}

/// Bus speed class
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Speed {
    /// 100 kHz
    Standard,
    /// 400 kHz
    Fast,
    /// 1 MHz
    FastPlus,
    /// 3.4 MHz, not supported by the controllers
    High,
    /// 5 MHz unidirectional, not supported by the controllers
    Ultra,
}

impl Speed {
    /// SCL rate in Hz, for the speed classes the controllers support
    pub const fn bitrate(self) -> Option<u32> {
        match self {
            Speed::Standard => Some(100_000),
            Speed::Fast => Some(400_000),
            Speed::FastPlus => Some(1_000_000),
            Speed::High | Speed::Ultra => None,
        }
    }

    pub const fn from_bitrate(bitrate: u32) -> Option<Self> {
        match bitrate {
            100_000 => Some(Speed::Standard),
            400_000 => Some(Speed::Fast),
            1_000_000 => Some(Speed::FastPlus),
            _ => None,
        }
    }
}

/// Per-controller state shared between the driver and the interrupt handlers
pub struct Shared<IP, T = NoDma> {
    ip: IP,
    /// Transmit and receive channel
    dma: Option<(crate::dma::Channel<T>, crate::dma::Channel<T>)>,
    transfer: Mutex<RefCell<Transfer>>,
    done: Completion,
    /// DMA placeholder words for the inactive direction, transmit then receive
    scratch: [AtomicU32; 2],
    /// Completion callbacks of the transmit and the receive channel
    links: [StreamLink; 2],
}

impl<IP, T> Shared<IP, T> {
    pub const fn new(ip: IP) -> Self {
        Shared {
            ip,
            dma: None,
            transfer: Mutex::new(RefCell::new(Transfer::new())),
            done: Completion::new(),
            scratch: [AtomicU32::new(0), AtomicU32::new(0)],
            links: [StreamLink::new(Stream::Tx), StreamLink::new(Stream::Rx)],
        }
    }

    /// Shared state of a controller that can move data with DMA
    pub const fn with_dma(
        ip: IP,
        tx: crate::dma::Channel<T>,
        rx: crate::dma::Channel<T>,
    ) -> Self {
        Shared {
            ip,
            dma: Some((tx, rx)),
            transfer: Mutex::new(RefCell::new(Transfer::new())),
            done: Completion::new(),
            scratch: [AtomicU32::new(0), AtomicU32::new(0)],
            links: [StreamLink::new(Stream::Tx), StreamLink::new(Stream::Rx)],
        }
    }

    pub fn ip(&self) -> &IP {
        &self.ip
    }
}

impl<IP: Ip, T> Shared<IP, T> {
    /// Event interrupt handler
    pub fn on_event(&self) {
        critical_section::with(|cs| {
            if self.transfer.borrow_ref_mut(cs).on_event(&self.ip) {
                self.done.signal(cs);
            }
        });
    }

    /// Error interrupt handler
    pub fn on_error(&self) {
        critical_section::with(|cs| {
            if self.transfer.borrow_ref_mut(cs).on_error(&self.ip) {
                self.done.signal(cs);
            }
        });
    }

    /// Phase of the sub-transfer in flight
    pub fn state(&self) -> State {
        critical_section::with(|cs| self.transfer.borrow_ref(cs).state())
    }
}

fn wait_idle<I: Ip>(ip: &I, polls: u32) -> bool {
    (0..polls).any(|_| !ip.is_busy())
}

/// I2C controller driver
///
/// Exclusive access through `&mut self` serialises [`I2c::transfer`] and [`I2c::configure`]; the
/// interrupt handlers only reach the controller through [`Shared`].
pub struct I2c<IP: 'static, T: 'static, D> {
    shared: &'static Shared<IP, T>,
    delay: D,
    pclk: Hertz,
    config: Config,
    target: Option<TargetConfig>,
    dma_enabled: bool,
    /// The previous group ended without STOP and the bus is still ours
    bus_held: bool,
}

impl<IP, T, D> I2c<IP, T, D>
where
    IP: Ip + Sync,
    T: crate::dma::DmaTransport + Sync,
    D: DelayNs,
{
    /// Create a driver for the controller behind `shared`, clocked at `pclk`, and apply the
    /// bus speed of `config`
    pub fn new(
        shared: &'static Shared<IP, T>,
        delay: D,
        pclk: Hertz,
        config: impl Into<Config>,
    ) -> Result<Self, Error> {
        let config = config.into();
        let mut i2c = I2c {
            shared,
            delay,
            pclk,
            config,
            target: None,
            dma_enabled: false,
            bus_held: false,
        };
        i2c.configure(config.speed)?;
        Ok(i2c)
    }

    /// Release the delay provider
    pub fn free(self) -> D {
        self.shared.ip.disable();
        self.delay
    }

    /// Program the SCL timing for `speed`
    pub fn configure(&mut self, speed: Speed) -> Result<(), Error> {
        let ip = &self.shared.ip;
        ip.disable();
        ip.set_controller_mode();
        let result = ip.configure_timing(self.pclk, speed);
        if result.is_ok() {
            self.config.speed = speed;
        }
        ip.enable();
        result
    }

    /// Move sub-transfers of at least [`Config::dma_threshold`] bytes with DMA. Has no effect
    /// unless the controller was given DMA channels.
    pub fn enable_dma(&mut self) {
        self.dma_enabled = true;
    }

    pub fn disable_dma(&mut self) {
        self.dma_enabled = false;
    }

    /// Restore `config` as the own target address after every controller transfer
    pub fn register_target(&mut self, config: TargetConfig) {
        self.shared.ip.restore_target(&config);
        self.target = Some(config);
    }

    pub fn unregister_target(&mut self) -> Option<TargetConfig> {
        self.target.take()
    }

    /// Conditions recorded by the last sub-transfer, for diagnostics
    pub fn last_errors(&self) -> ErrorFlags {
        critical_section::with(|cs| self.shared.transfer.borrow_ref(cs).errors())
    }

    /// Execute `msgs` as one transaction with the target at `address`.
    ///
    /// The sequence is checked before the controller is touched: every message must be
    /// non-empty, only the last one may carry STOP, and a direction change needs RESTART. The
    /// first message then gets RESTART and the last one STOP.
    ///
    /// Messages are consumed in place. On error, the messages that were not completely moved
    /// keep a non-zero [`Message::remaining`] count.
    pub fn transfer(&mut self, msgs: &mut [Message<'_>], address: u16) -> Result<(), Error> {
        self.check_address(msgs, address)?;
        message::validate(msgs)?;
        if msgs.is_empty() {
            return Ok(());
        }

        self.shared.ip.enable();

        let mut result = Ok(());
        let mut start = 0;
        while start < msgs.len() {
            let group = self.group(msgs, start, address);
            result = self.transfer_group(msgs, &group);
            if result.is_err() {
                break;
            }
            start = group.end;
        }

        self.bus_held = false;
        if self.target.is_none() {
            self.shared.ip.disable();
        }
        result
    }

    fn check_address(&self, msgs: &[Message<'_>], address: u16) -> Result<(), Error> {
        let ten_bit = self.config.address_mode == AddressMode::TenBit
            || msgs.iter().any(|m| m.flags().contains(Flags::ADDR_10));
        let max = if ten_bit { 0x3FF } else { 0x7F };
        if address > max {
            return Err(Error::InvalidInput);
        }
        Ok(())
    }

    fn group(&self, msgs: &[Message<'_>], start: usize, address: u16) -> Group {
        let end = message::group_end(msgs, start);
        let first = &msgs[start];
        Group {
            start,
            end,
            len: msgs[start..end].iter().map(Message::remaining).sum(),
            direction: first.direction(),
            has_stop: msgs[end - 1].flags().contains(Flags::STOP),
            address,
            ten_bit: self.config.address_mode == AddressMode::TenBit
                || first.flags().contains(Flags::ADDR_10),
        }
    }

    fn transfer_group(&mut self, msgs: &mut [Message<'_>], group: &Group) -> Result<(), Error> {
        if let Some(channels) = self.dma_channels(group) {
            if let Some(result) = self.dma_transfer(channels, msgs, group) {
                return result;
            }
        }

        self.begin(msgs, group, false)?;
        while self.shared.done.wait(&mut self.delay, None).is_err() {}
        self.end(group)
    }

    fn dma_channels(
        &self,
        group: &Group,
    ) -> Option<&'static (crate::dma::Channel<T>, crate::dma::Channel<T>)> {
        let shared: &'static Shared<IP, T> = self.shared;
        if self.dma_enabled && group.len >= self.config.dma_threshold {
            shared.dma.as_ref()
        } else {
            None
        }
    }

    /// Prepare the controller for `group` and issue the START condition
    fn begin(&mut self, msgs: &mut [Message<'_>], group: &Group, dma: bool) -> Result<(), Error> {
        let shared = self.shared;
        let ip = &shared.ip;
        let generation = ip.generation();
        shared.done.reset();

        let check_idle = group.direction == Direction::Write || generation == Generation::Add;
        if !self.bus_held && check_idle && !wait_idle(ip, IDLE_POLLS) {
            self.recover()?;
        }
        self.bus_held = false;

        critical_section::with(|cs| {
            let mut t = shared.transfer.borrow_ref_mut(cs);
            t.attach(msgs);
            t.begin(group, dma);

            match generation {
                Generation::Legacy => {
                    let read = group.direction == Direction::Read;
                    ip.set_controller_mode();
                    ip.set_dma_last(dma && read && group.end - group.start == 1);
                    ip.set_ack(true);
                    ip.set_ack_position_next(read && group.len == 2);
                    if read && group.ten_bit {
                        t.owe_restart();
                    }
                    let interrupts = if dma {
                        Interrupts::ERROR | Interrupts::EVENT
                    } else {
                        Interrupts::ERROR | Interrupts::EVENT | Interrupts::BUFFER
                    };
                    ip.enable_interrupts(interrupts);
                }
                Generation::Add => {
                    ip.clear_events(
                        Events::NACK
                            | Events::BUS_ERROR
                            | Events::ARBITRATION_LOST
                            | Events::STOP_DETECTED,
                    );
                    let (nbytes, stop) = t.next_segment();
                    ip.program_target(t.target_address(), group.ten_bit, group.direction);
                    ip.program_segment(nbytes, stop);

                    let interrupts = if dma {
                        ip.set_dma_requests(Some(group.direction));
                        let mut interrupts = Interrupts::ERROR | Interrupts::NACK | Interrupts::STOP;
                        if group.len > MAX_SEGMENT || !group.has_stop {
                            interrupts |= Interrupts::COMPLETE;
                        }
                        interrupts
                    } else {
                        Interrupts::ERROR
                            | Interrupts::ADDRESS
                            | Interrupts::STOP
                            | Interrupts::COMPLETE
                            | Interrupts::NACK
                            | Interrupts::TX
                            | Interrupts::RX
                    };
                    ip.enable_interrupts(interrupts);
                }
            }
            ip.start();
        });
        Ok(())
    }

    /// Wind down the controller after `group` and report its outcome
    fn end(&mut self, group: &Group) -> Result<(), Error> {
        let shared = self.shared;
        let ip = &shared.ip;
        ip.disable_interrupts(Interrupts::ALL);

        let (errs, eeprom_busy) = critical_section::with(|cs| {
            let mut t = shared.transfer.borrow_ref_mut(cs);
            t.detach();
            (t.errors(), t.eeprom_busy())
        });

        let released = group.has_stop || !errs.is_empty();
        if released && !wait_idle(ip, IDLE_POLLS) {
            warn!("I2C bus busy after transfer end");
        }
        ip.set_autoend(false);
        ip.clear_ten_bit();
        if released {
            if let Some(target) = &self.target {
                ip.restore_target(target);
            }
        }

        if errs.is_empty() {
            self.bus_held = !group.has_stop
                && (group.direction == Direction::Write || ip.generation() == Generation::Add);
            return Ok(());
        }

        if eeprom_busy {
            debug!("I2C EEPROM {:#x} busy, write not acknowledged", group.address);
        } else {
            report(errs);
        }
        if errs.contains(ErrorFlags::BUSY) {
            Err(Error::Busy)
        } else {
            Err(Error::Io)
        }
    }

    /// Reset the controller and wait for the bus to go idle
    fn recover(&mut self) -> Result<(), Error> {
        let ip = &self.shared.ip;
        ip.disable();
        ip.soft_reset();
        ip.clear_events(Events::ERRORS | Events::NACK | Events::STOP_DETECTED);
        ip.set_controller_mode();
        let timing = ip.configure_timing(self.pclk, self.config.speed);
        ip.enable();

        if timing.is_ok() && wait_idle(ip, RECOVERY_POLLS) {
            info!("I2C bus recovered");
            return Ok(());
        }

        error!("I2C bus recovery failed");
        critical_section::with(|cs| {
            self.shared
                .transfer
                .borrow_ref_mut(cs)
                .set_errors(ErrorFlags::BUSY)
        });
        Err(Error::Busy)
    }
}

fn report(errs: ErrorFlags) {
    if errs.contains(ErrorFlags::NACK) {
        debug!("I2C NACK received");
    }
    if errs.contains(ErrorFlags::BUS) {
        error!("I2C bus error");
    }
    if errs.contains(ErrorFlags::ARBITRATION) {
        error!("I2C arbitration lost");
    }
    if errs.contains(ErrorFlags::OVERFLOW) {
        error!("I2C overflow");
    }
    if errs.contains(ErrorFlags::BUSY) {
        error!("I2C bus busy");
    }
}

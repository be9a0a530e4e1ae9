//! Behavioural model of a controller, its bus and a DMA controller
//!
//! The model advances by one bus action per [`SimDelay`] tick. After every step the DMA
//! completions and the interrupts the driver enabled are delivered, the way the NVIC would while
//! the driver thread waits. Targets are 24xx-style memories: the first bytes of a write set the
//! address pointer, further bytes are stored, and reads return memory from the pointer on.

use std::boxed::Box;
use std::sync::{Arc, Mutex, MutexGuard};
use std::vec::Vec;

use embedded_hal::delay::DelayNs;

use super::ip::{Events, Generation, Interrupts, Ip};
use super::{Config, Direction, Error, I2c, Shared, Speed, Stop, TargetConfig};
use crate::dma::{
    self, Channel, ChannelConfig, DmaCallback, DmaTransport, Status, TransferDirection,
};
use crate::time::Hertz;

const LEGACY_DATA: usize = 0x4000_5410;
const ADD_RXDATA: usize = 0x4000_C424;
const ADD_TXDATA: usize = 0x4000_C428;

pub(crate) const TX_CHANNEL: u32 = 0;
pub(crate) const RX_CHANNEL: u32 = 1;

/// Upper bound on ticks per driver, so a broken transition fails the test instead of hanging it
const TICK_LIMIT: u64 = 10_000_000;

/// What happened on SDA/SCL
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Wire {
    Start,
    /// Address or 10-bit header byte
    Address(u8),
    Nack,
    Write(u8),
    Read { byte: u8, ack: bool },
    Stop,
}

pub(crate) struct Target {
    pub address: u16,
    pub ten_bit: bool,
    pub memory: Vec<u8>,
    pointer: usize,
    pointer_width: usize,
    pointer_bytes: usize,
    /// Address phases to refuse, as an EEPROM does during its write cycle
    pub nacks: u32,
}

impl Target {
    /// 1 KiB memory with a 16-bit address pointer
    pub fn eeprom(address: u16) -> Self {
        Target {
            address,
            ten_bit: false,
            memory: vec![0xFF; 1024],
            pointer: 0,
            pointer_width: 2,
            pointer_bytes: 0,
            nacks: 0,
        }
    }

    /// 256 byte register file with an 8-bit pointer, behind a 10-bit address
    pub fn ten_bit(address: u16) -> Self {
        Target {
            address,
            ten_bit: true,
            memory: (0..=255).collect(),
            pointer: 0,
            pointer_width: 1,
            pointer_bytes: 0,
            nacks: 0,
        }
    }

    fn select(&mut self, direction: Direction) -> bool {
        if self.nacks > 0 {
            self.nacks -= 1;
            return false;
        }
        if direction == Direction::Write {
            self.pointer_bytes = 0;
        }
        true
    }

    fn write(&mut self, byte: u8) {
        if self.pointer_bytes < self.pointer_width {
            self.pointer = if self.pointer_bytes == 0 {
                byte as usize
            } else {
                (self.pointer << 8) | byte as usize
            };
            self.pointer %= self.memory.len();
            self.pointer_bytes += 1;
            return;
        }
        self.memory[self.pointer] = byte;
        self.pointer = (self.pointer + 1) % self.memory.len();
    }

    fn read(&mut self) -> u8 {
        let byte = self.memory[self.pointer];
        self.pointer = (self.pointer + 1) % self.memory.len();
        byte
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct SimChannel {
    /// Channel number on its own controller
    number: u32,
    pub config: Option<ChannelConfig>,
    pub running: bool,
    pub pending: usize,
    source: usize,
    destination: usize,
    pub configures: usize,
    pub starts: usize,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Phase {
    Idle,
    Address,
    Transmit,
    Receive,
    /// ADD: byte count reached without STOP, SCL held low
    Hold,
}

type Completion = (&'static dyn DmaCallback, u32, Result<(), dma::Error>);

pub(crate) struct World {
    generation: Generation,
    pub targets: Vec<Target>,
    pub wire: Vec<Wire>,
    pub segments: Vec<(u8, Stop)>,
    pub channels: Vec<SimChannel>,
    /// SDA held low by a target: the bus never goes idle, not even after a reset
    pub stuck: bool,
    pub busy: bool,
    /// DMA requests are never served
    pub dma_stall: bool,
    /// Deliver one spurious completion on an idle channel
    pub stray_callback: bool,
    pub fail_configure: bool,
    /// Data byte (counted from 1) whose transmission raises the given error events instead of
    /// reaching the target
    pub fault: Option<(usize, Events)>,
    pub enabled: bool,
    pub own_address: Option<u16>,
    phase: Phase,
    receiver: bool,
    selected: Option<usize>,
    start_pending: bool,
    stop_pending: bool,
    flags: Events,
    interrupts: Interrupts,
    dma_requests: Option<Direction>,
    // Legacy
    address_byte: Option<u8>,
    header_high: Option<u16>,
    ten_bit_selected: bool,
    dr: Option<u8>,
    shift: Option<u8>,
    /// A byte left the shift register since the address phase
    shifted: bool,
    ack: bool,
    ack_next: bool,
    latched_ack: bool,
    target_done: bool,
    dma_last: bool,
    // ADD
    target_address: u16,
    target_ten_bit: bool,
    target_direction: Direction,
    nbytes: usize,
    reload: bool,
    autoend: bool,
    tx: Option<u8>,
    rx: Option<u8>,
}

impl World {
    fn new(generation: Generation) -> Self {
        World {
            generation,
            targets: vec![Target::eeprom(0x50), Target::ten_bit(0x2A5)],
            wire: Vec::new(),
            segments: Vec::new(),
            channels: vec![SimChannel::default(); 2],
            stuck: false,
            busy: false,
            dma_stall: false,
            stray_callback: false,
            fail_configure: false,
            fault: None,
            enabled: false,
            own_address: None,
            phase: Phase::Idle,
            receiver: false,
            selected: None,
            start_pending: false,
            stop_pending: false,
            flags: Events::empty(),
            interrupts: Interrupts::empty(),
            dma_requests: None,
            address_byte: None,
            header_high: None,
            ten_bit_selected: false,
            dr: None,
            shift: None,
            shifted: false,
            ack: false,
            ack_next: false,
            latched_ack: false,
            target_done: false,
            dma_last: false,
            target_address: 0,
            target_ten_bit: false,
            target_direction: Direction::Write,
            nbytes: 0,
            reload: false,
            autoend: false,
            tx: None,
            rx: None,
        }
    }

    pub fn eeprom(&mut self) -> &mut Target {
        &mut self.targets[0]
    }

    pub fn ten_bit_target(&mut self) -> &mut Target {
        &mut self.targets[1]
    }

    /// Hold SDA low for good
    pub fn jam(&mut self) {
        self.stuck = true;
        self.busy = true;
    }

    pub fn starts(&self) -> usize {
        self.wire.iter().filter(|w| **w == Wire::Start).count()
    }

    pub fn addresses(&self) -> Vec<u8> {
        self.wire
            .iter()
            .filter_map(|w| match w {
                Wire::Address(byte) => Some(*byte),
                _ => None,
            })
            .collect()
    }

    pub fn reads(&self) -> Vec<(u8, bool)> {
        self.wire
            .iter()
            .filter_map(|w| match w {
                Wire::Read { byte, ack } => Some((*byte, *ack)),
                _ => None,
            })
            .collect()
    }

    fn reset_bus(&mut self) {
        self.busy = self.stuck;
        self.phase = Phase::Idle;
        self.receiver = false;
        self.selected = None;
        self.start_pending = false;
        self.stop_pending = false;
        self.flags = Events::empty();
        self.address_byte = None;
        self.header_high = None;
        self.ten_bit_selected = false;
        self.dr = None;
        self.shift = None;
        self.target_done = false;
        self.nbytes = 0;
        self.tx = None;
        self.rx = None;
    }

    fn target(&mut self) -> Option<&mut Target> {
        self.selected.and_then(|i| self.targets.get_mut(i))
    }

    fn emit_stop(&mut self) {
        self.wire.push(Wire::Stop);
        self.busy = self.stuck;
        self.phase = Phase::Idle;
        self.stop_pending = false;
        self.selected = None;
        self.ten_bit_selected = false;
        if self.generation == Generation::Add {
            self.flags.remove(Events::TRANSFER_COMPLETE | Events::RELOAD);
            self.flags.insert(Events::STOP_DETECTED);
        }
    }

    fn stop(&mut self) {
        if self.phase == Phase::Idle {
            return;
        }
        let byte_in_flight = match self.phase {
            Phase::Receive => self.generation == Generation::Legacy && !self.target_done,
            Phase::Transmit => {
                self.generation == Generation::Legacy && (self.dr.is_some() || self.shift.is_some())
            }
            _ => false,
        };
        if byte_in_flight {
            self.stop_pending = true;
        } else {
            self.emit_stop();
        }
    }

    /// Address phase outcome for the target in `selected`
    fn select(&mut self, direction: Direction) {
        let acked = self.target().is_some_and(|t| t.select(direction));
        if !acked {
            self.wire.push(Wire::Nack);
            self.selected = None;
            self.flags.insert(Events::NACK);
            if self.generation == Generation::Add {
                self.phase = Phase::Hold;
            }
            return;
        }
        self.receiver = direction == Direction::Read;
        self.shifted = false;
        self.phase = if self.receiver {
            Phase::Receive
        } else {
            Phase::Transmit
        };
        if self.generation == Generation::Legacy {
            self.flags.insert(Events::ADDRESS_SENT);
            self.latched_ack = self.ack;
        }
    }

    fn events(&self) -> Events {
        let mut events = self.flags;
        match self.generation {
            Generation::Legacy => {
                if !self.flags.contains(Events::ADDRESS_SENT) {
                    let done = match self.phase {
                        Phase::Transmit => {
                            self.shifted && self.dr.is_none() && self.shift.is_none()
                        }
                        Phase::Receive => self.dr.is_some() && self.shift.is_some(),
                        _ => false,
                    };
                    if done {
                        events.insert(Events::BYTE_DONE);
                    }
                    if self.phase == Phase::Transmit && self.dr.is_none() {
                        events.insert(Events::TX_EMPTY);
                    }
                }
                if self.receiver && self.dr.is_some() {
                    events.insert(Events::RX_NOT_EMPTY);
                }
            }
            Generation::Add => {
                if self.phase == Phase::Transmit && self.tx.is_none() && self.nbytes > 0 {
                    events.insert(Events::TX_READY);
                }
                if self.rx.is_some() {
                    events.insert(Events::RX_NOT_EMPTY);
                }
            }
        }
        events
    }

    /// Error and event interrupt lines
    fn pending(&self) -> (bool, bool) {
        if !self.enabled {
            return (false, false);
        }
        let events = self.events();
        let irq = self.interrupts;
        match self.generation {
            Generation::Legacy => {
                let error = irq.contains(Interrupts::ERROR)
                    && events.intersects(Events::ERRORS | Events::NACK);
                let event = irq.contains(Interrupts::EVENT)
                    && (events.intersects(
                        Events::START_SENT
                            | Events::HEADER_SENT
                            | Events::ADDRESS_SENT
                            | Events::BYTE_DONE,
                    ) || (irq.contains(Interrupts::BUFFER)
                        && events.intersects(Events::RX_NOT_EMPTY | Events::TX_EMPTY)));
                (error, event)
            }
            Generation::Add => {
                let error = irq.contains(Interrupts::ERROR) && events.intersects(Events::ERRORS);
                let event = (irq.contains(Interrupts::TX) && events.contains(Events::TX_READY))
                    || (irq.contains(Interrupts::RX) && events.contains(Events::RX_NOT_EMPTY))
                    || (irq.contains(Interrupts::NACK) && events.contains(Events::NACK))
                    || (irq.contains(Interrupts::STOP) && events.contains(Events::STOP_DETECTED))
                    || (irq.contains(Interrupts::COMPLETE)
                        && events.intersects(Events::TRANSFER_COMPLETE | Events::RELOAD));
                (error, event)
            }
        }
    }

    fn read_data(&mut self) -> u8 {
        match self.generation {
            Generation::Legacy => {
                let byte = self.dr.take();
                if self.dr.is_none() {
                    self.dr = self.shift.take();
                }
                byte.unwrap_or(0)
            }
            Generation::Add => self.rx.take().unwrap_or(0),
        }
    }

    fn write_data(&mut self, byte: u8) {
        match self.generation {
            Generation::Legacy => self.dr = Some(byte),
            Generation::Add => self.tx = Some(byte),
        }
    }

    fn tx_request(&self) -> bool {
        self.dma_requests == Some(Direction::Write)
            && self.phase == Phase::Transmit
            && match self.generation {
                Generation::Legacy => {
                    !self.flags.contains(Events::ADDRESS_SENT) && self.dr.is_none()
                }
                Generation::Add => self.tx.is_none() && self.nbytes > 0,
            }
    }

    fn rx_request(&self) -> bool {
        self.dma_requests == Some(Direction::Read)
            && match self.generation {
                Generation::Legacy => self.receiver && self.dr.is_some(),
                Generation::Add => self.rx.is_some(),
            }
    }

    /// Bytes the running receive channel still expects from the bus
    fn rx_block_left(&self) -> usize {
        let buffered = self.dr.is_some() as usize + self.shift.is_some() as usize;
        self.channels
            .iter()
            .find(|c| {
                c.running
                    && c.config
                        .is_some_and(|cfg| cfg.direction == TransferDirection::PeripheralToMemory)
            })
            .map_or(usize::MAX, |c| c.pending.saturating_sub(buffered))
    }

    fn step(&mut self) -> Vec<Completion> {
        let mut completions = Vec::new();
        self.dma_step(&mut completions);
        if self.enabled {
            match self.generation {
                Generation::Legacy => self.legacy_step(),
                Generation::Add => self.add_step(),
            }
        }
        completions
    }

    fn dma_step(&mut self, completions: &mut Vec<Completion>) {
        if self.dma_stall {
            return;
        }
        for index in 0..self.channels.len() {
            let channel = self.channels[index];
            let Some(config) = channel.config else {
                continue;
            };
            if !channel.running || channel.pending == 0 {
                continue;
            }
            match config.direction {
                TransferDirection::MemoryToPeripheral if self.tx_request() => {
                    // SAFETY: the channel points into a buffer of the driver thread, which stays
                    // blocked in the transfer while the channel runs
                    let byte = unsafe { *(channel.source as *const u8) };
                    self.write_data(byte);
                }
                TransferDirection::PeripheralToMemory if self.rx_request() => {
                    let byte = self.read_data();
                    // SAFETY: as above
                    unsafe { *(channel.destination as *mut u8) = byte };
                }
                _ => continue,
            }

            let ch = &mut self.channels[index];
            if config.source.increment {
                ch.source += 1;
            }
            if config.destination.increment {
                ch.destination += 1;
            }
            ch.pending -= 1;
            if ch.pending == 0 {
                ch.running = false;
                if let Some(callback) = config.callback {
                    completions.push((callback, channel.number, Ok(())));
                }
            }

            if self.stray_callback {
                self.stray_callback = false;
                let idle = self
                    .channels
                    .iter()
                    .enumerate()
                    .find(|(i, c)| *i != index && !c.running && c.config.is_some());
                if let Some((_, c)) = idle {
                    if let Some(callback) = c.config.and_then(|cfg| cfg.callback) {
                        completions.push((callback, c.number, Ok(())));
                    }
                }
            }
        }
    }

    fn legacy_step(&mut self) {
        if self.start_pending {
            self.start_pending = false;
            self.stop_pending = false;
            self.wire.push(Wire::Start);
            self.busy = true;
            self.phase = Phase::Address;
            self.flags.insert(Events::START_SENT);
            self.dr = None;
            self.shift = None;
            self.target_done = false;
            return;
        }
        if let Some(byte) = self.address_byte.take() {
            self.legacy_address(byte);
            return;
        }
        // SCL is stretched until the address flag is cleared
        if self.flags.contains(Events::ADDRESS_SENT) {
            return;
        }

        match self.phase {
            Phase::Transmit => {
                if let Some(byte) = self.shift.take() {
                    self.wire.push(Wire::Write(byte));
                    self.shifted = true;
                    if self.inject_fault() {
                        return;
                    }
                    if let Some(target) = self.target() {
                        target.write(byte);
                    }
                } else if let Some(byte) = self.dr.take() {
                    self.shift = Some(byte);
                }
                if self.stop_pending && self.dr.is_none() && self.shift.is_none() {
                    self.emit_stop();
                }
            }
            Phase::Receive if !self.target_done && self.shift.is_none() => {
                let byte = self.target().map_or(0xFF, |t| t.read());
                let mut ack = if self.ack_next {
                    self.latched_ack
                } else {
                    self.ack
                };
                if self.dma_last && self.rx_block_left() <= 1 {
                    ack = false;
                }
                self.latched_ack = self.ack;
                self.wire.push(Wire::Read { byte, ack });
                if self.dr.is_none() {
                    self.dr = Some(byte);
                } else {
                    self.shift = Some(byte);
                }
                if !ack {
                    self.target_done = true;
                    if self.stop_pending {
                        self.emit_stop();
                    }
                }
            }
            _ => {}
        }
    }

    fn legacy_address(&mut self, byte: u8) {
        self.flags
            .remove(Events::START_SENT | Events::HEADER_SENT);
        self.wire.push(Wire::Address(byte));
        let read = byte & 1 == 1;

        if byte & 0xF8 == 0xF0 {
            let high = u16::from((byte >> 1) & 0x3);
            if !read {
                self.header_high = Some(high);
                self.flags.insert(Events::HEADER_SENT);
                return;
            }
            // A read header only reaches the target selected by the preceding 10-bit write
            let selected = self
                .selected
                .filter(|&i| self.ten_bit_selected && self.targets[i].address >> 8 == high);
            self.selected = selected;
            self.select(Direction::Read);
            return;
        }

        if let Some(high) = self.header_high.take() {
            let address = (high << 8) | u16::from(byte);
            self.selected = self
                .targets
                .iter()
                .position(|t| t.ten_bit && t.address == address);
            self.ten_bit_selected = true;
            self.select(Direction::Write);
        } else {
            let address = u16::from(byte >> 1);
            self.selected = self
                .targets
                .iter()
                .position(|t| !t.ten_bit && t.address == address);
            self.ten_bit_selected = false;
            let direction = if read {
                Direction::Read
            } else {
                Direction::Write
            };
            self.select(direction);
        }
    }

    fn add_step(&mut self) {
        if self.start_pending {
            self.start_pending = false;
            self.wire.push(Wire::Start);
            self.busy = true;
            self.flags.remove(Events::TRANSFER_COMPLETE);
            self.phase = Phase::Address;
            self.tx = None;

            let rd = (self.target_direction == Direction::Read) as u8;
            let (ten_bit, address) = if self.target_ten_bit {
                let address = self.target_address & 0x3FF;
                self.wire
                    .push(Wire::Address(0xF0 | (((address >> 8) as u8) << 1) | rd));
                (true, address)
            } else {
                self.wire
                    .push(Wire::Address((self.target_address as u8 & 0xFE) | rd));
                (false, (self.target_address >> 1) & 0x7F)
            };
            self.selected = self
                .targets
                .iter()
                .position(|t| t.ten_bit == ten_bit && t.address == address);
            self.select(self.target_direction);
            return;
        }

        match self.phase {
            Phase::Transmit if self.nbytes > 0 => {
                if let Some(byte) = self.tx.take() {
                    self.wire.push(Wire::Write(byte));
                    self.nbytes -= 1;
                    if self.inject_fault() {
                        return;
                    }
                    if let Some(target) = self.target() {
                        target.write(byte);
                    }
                    if self.nbytes == 0 {
                        self.segment_done();
                    }
                }
            }
            Phase::Receive if self.nbytes > 0 && self.rx.is_none() => {
                let byte = self.target().map_or(0xFF, |t| t.read());
                self.nbytes -= 1;
                let ack = self.nbytes > 0 || self.reload;
                self.wire.push(Wire::Read { byte, ack });
                self.rx = Some(byte);
                if self.nbytes == 0 {
                    self.segment_done();
                }
            }
            _ => {}
        }
    }

    /// Count a data byte on the wire. Returns `true` when the scripted fault hit it: the byte is
    /// lost and the controller stalls with the fault flags latched.
    fn inject_fault(&mut self) -> bool {
        let Some((byte, events)) = self.fault else {
            return false;
        };
        if byte > 1 {
            self.fault = Some((byte - 1, events));
            return false;
        }
        self.fault = None;
        if events.contains(Events::NACK) {
            self.wire.push(Wire::Nack);
        }
        self.flags.insert(events);
        self.phase = Phase::Hold;
        self.dr = None;
        self.shift = None;
        self.tx = None;
        true
    }

    fn segment_done(&mut self) {
        if self.reload {
            self.flags.insert(Events::RELOAD);
        } else if self.autoend {
            self.emit_stop();
        } else {
            self.flags.insert(Events::TRANSFER_COMPLETE);
            self.phase = Phase::Hold;
        }
    }
}

/// Controller model
pub(crate) struct SimIp {
    world: Arc<Mutex<World>>,
}

impl SimIp {
    fn world(&self) -> MutexGuard<'_, World> {
        self.world.lock().unwrap()
    }
}

impl crate::Sealed for SimIp {}

impl Ip for SimIp {
    fn generation(&self) -> Generation {
        self.world().generation
    }

    fn enable(&self) {
        self.world().enabled = true;
    }

    fn disable(&self) {
        let mut world = self.world();
        world.enabled = false;
        world.reset_bus();
    }

    fn soft_reset(&self) {
        self.world().reset_bus();
    }

    fn set_controller_mode(&self) {}

    fn is_busy(&self) -> bool {
        self.world().busy
    }

    fn configure_timing(&self, _pclk: Hertz, speed: Speed) -> Result<(), Error> {
        speed.bitrate().map(|_| ()).ok_or(Error::InvalidInput)
    }

    fn start(&self) {
        self.world().start_pending = true;
    }

    fn stop(&self) {
        self.world().stop();
    }

    fn set_ack(&self, ack: bool) {
        self.world().ack = ack;
    }

    fn set_ack_position_next(&self, next: bool) {
        self.world().ack_next = next;
    }

    fn send_address(&self, byte: u8) {
        self.world().address_byte = Some(byte);
    }

    fn clear_address_flag(&self) {
        self.world().flags.remove(Events::ADDRESS_SENT);
    }

    fn program_target(&self, address: u16, ten_bit: bool, direction: Direction) {
        let mut world = self.world();
        world.target_address = address;
        world.target_ten_bit = ten_bit;
        world.target_direction = direction;
    }

    fn program_segment(&self, nbytes: u8, stop: Stop) {
        let mut world = self.world();
        world.nbytes = nbytes as usize;
        world.reload = stop == Stop::Reload;
        world.autoend = stop == Stop::Automatic;
        world.flags.remove(Events::RELOAD);
        world.segments.push((nbytes, stop));
    }

    fn set_autoend(&self, autoend: bool) {
        self.world().autoend = autoend;
    }

    fn autoend(&self) -> bool {
        self.world().autoend
    }

    fn clear_ten_bit(&self) {
        self.world().target_ten_bit = false;
    }

    fn read_byte(&self) -> u8 {
        self.world().read_data()
    }

    fn write_byte(&self, byte: u8) {
        self.world().write_data(byte);
    }

    fn enable_interrupts(&self, interrupts: Interrupts) {
        self.world().interrupts.insert(interrupts);
    }

    fn disable_interrupts(&self, interrupts: Interrupts) {
        self.world().interrupts.remove(interrupts);
    }

    fn set_dma_requests(&self, direction: Option<Direction>) {
        self.world().dma_requests = direction;
    }

    fn set_dma_last(&self, last: bool) {
        self.world().dma_last = last;
    }

    fn events(&self) -> Events {
        self.world().events()
    }

    fn clear_events(&self, events: Events) {
        self.world().flags.remove(events);
    }

    fn data_register(&self, direction: Direction) -> usize {
        match (self.generation(), direction) {
            (Generation::Legacy, _) => LEGACY_DATA,
            (Generation::Add, Direction::Write) => ADD_TXDATA,
            (Generation::Add, Direction::Read) => ADD_RXDATA,
        }
    }

    fn restore_target(&self, config: &TargetConfig) {
        self.world().own_address = Some(config.own_address);
    }
}

/// DMA controller model, serving the requests of the simulated controller.
///
/// Its channel `n` is channel `first + n` of the model.
#[derive(Clone)]
pub(crate) struct SimDma {
    world: Arc<Mutex<World>>,
    first: usize,
}

impl SimDma {
    fn with<R>(
        &self,
        channel: u32,
        f: impl FnOnce(&mut SimChannel) -> Result<R, dma::Error>,
    ) -> Result<R, dma::Error> {
        let mut world = self.world.lock().unwrap();
        let ch = world
            .channels
            .get_mut(self.first + channel as usize)
            .ok_or(dma::Error::InvalidChannel)?;
        f(ch)
    }
}

impl DmaTransport for SimDma {
    fn configure(&self, channel: u32, config: &ChannelConfig) -> Result<(), dma::Error> {
        if self.world.lock().unwrap().fail_configure {
            return Err(dma::Error::Busy);
        }
        self.with(channel, |ch| {
            if ch.running {
                return Err(dma::Error::Busy);
            }
            ch.number = channel;
            ch.config = Some(*config);
            ch.pending = config.block_size;
            ch.source = config.source.address;
            ch.destination = config.destination.address;
            ch.configures += 1;
            Ok(())
        })
    }

    fn reload(
        &self,
        channel: u32,
        source: usize,
        destination: usize,
        size: usize,
    ) -> Result<(), dma::Error> {
        self.with(channel, |ch| {
            ch.source = source;
            ch.destination = destination;
            ch.pending = size;
            Ok(())
        })
    }

    fn start(&self, channel: u32) -> Result<(), dma::Error> {
        self.with(channel, |ch| {
            ch.running = true;
            ch.starts += 1;
            Ok(())
        })
    }

    fn stop(&self, channel: u32) -> Result<(), dma::Error> {
        self.with(channel, |ch| {
            ch.running = false;
            Ok(())
        })
    }

    fn status(&self, channel: u32) -> Result<Status, dma::Error> {
        self.with(channel, |ch| {
            Ok(Status {
                busy: ch.running,
                pending_length: ch.pending,
                direction: ch.config.map(|c| c.direction).unwrap_or_default(),
            })
        })
    }
}

/// Delay provider that runs the model while the driver waits
pub(crate) struct SimDelay {
    world: Arc<Mutex<World>>,
    shared: &'static Shared<SimIp, SimDma>,
    ticks: u64,
}

impl SimDelay {
    fn tick(&mut self) {
        self.ticks += 1;
        assert!(self.ticks < TICK_LIMIT, "simulated bus made no progress");

        let completions = self.world.lock().unwrap().step();
        for (callback, channel, result) in completions {
            callback.on_transfer(channel, result);
        }

        let (error, event) = self.world.lock().unwrap().pending();
        if error {
            self.shared.on_error();
        }
        if event {
            self.shared.on_event();
        }
    }
}

impl DelayNs for SimDelay {
    fn delay_ns(&mut self, _ns: u32) {
        self.tick();
    }
}

/// A controller of one generation wired to the model, with a transmit and a receive channel
pub(crate) struct Bench {
    pub shared: &'static Shared<SimIp, SimDma>,
    world: Arc<Mutex<World>>,
}

impl Bench {
    pub fn new(generation: Generation) -> Self {
        let world = Arc::new(Mutex::new(World::new(generation)));
        let dma = SimDma {
            world: world.clone(),
            first: 0,
        };
        Self::with_channels(
            world,
            Channel::new(dma.clone(), TX_CHANNEL, 10),
            Channel::new(dma, RX_CHANNEL, 11),
        )
    }

    /// Transmit and receive channel on two controllers, both as channel 0
    pub fn with_split_controllers(generation: Generation) -> Self {
        let world = Arc::new(Mutex::new(World::new(generation)));
        let tx = SimDma {
            world: world.clone(),
            first: TX_CHANNEL as usize,
        };
        let rx = SimDma {
            world: world.clone(),
            first: RX_CHANNEL as usize,
        };
        Self::with_channels(world, Channel::new(tx, 0, 10), Channel::new(rx, 0, 11))
    }

    fn with_channels(
        world: Arc<Mutex<World>>,
        tx: Channel<SimDma>,
        rx: Channel<SimDma>,
    ) -> Self {
        let ip = SimIp {
            world: world.clone(),
        };
        let shared = Box::leak(Box::new(Shared::with_dma(ip, tx, rx)));
        Bench { shared, world }
    }

    pub fn world(&self) -> MutexGuard<'_, World> {
        self.world.lock().unwrap()
    }

    pub fn i2c(&self, config: Config) -> I2c<SimIp, SimDma, SimDelay> {
        let delay = SimDelay {
            world: self.world.clone(),
            shared: self.shared,
            ticks: 0,
        };
        match I2c::new(self.shared, delay, Hertz::MHz(48), config) {
            Ok(i2c) => i2c,
            Err(e) => panic!("controller setup failed: {e:?}"),
        }
    }
}

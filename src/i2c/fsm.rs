//! Transfer state machine
//!
//! [`Transfer`] holds the state of the grouped sub-transfer in flight: the message cursor, the
//! remaining byte count, the accumulated errors and the addressing details. The interrupt entry
//! points of the driver run exactly one transition per call and report whether the waiting thread
//! must be woken. Transitions only touch the hardware through [`Ip`], so each one can be driven
//! with a scripted controller.

use core::ptr;

use super::ip::{Events, Generation, Interrupts, Ip};
use super::message::Message;
use super::{Direction, ErrorFlags, Stop};
use crate::dma;

/// Largest byte count of one ADD hardware segment
pub(crate) const MAX_SEGMENT: usize = 255;

/// 7-bit addresses answered by 24xx-style EEPROMs
const EEPROM_ADDRESSES: core::ops::RangeInclusive<u16> = 0x50..=0x57;

/// Phase of the sub-transfer in flight
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum State {
    /// No sub-transfer in flight
    Idle,
    /// START issued, target address on the wire
    AddressPhase,
    /// Data bytes moving
    DataPhase,
    /// The current ADD segment ends with a reload and more segments follow
    ReloadPending,
    /// Every byte moved, waiting for the closing bus condition
    Completing,
    /// Aborted by an error
    Error,
}

/// One run of same-direction messages moved as a single hardware sub-transfer
#[derive(Copy, Clone, Debug)]
pub(crate) struct Group {
    pub start: usize,
    pub end: usize,
    pub len: usize,
    pub direction: Direction,
    pub has_stop: bool,
    /// Unshifted 7-bit or 10-bit target address
    pub address: u16,
    pub ten_bit: bool,
}

/// What the DMA completion handler has to do after a transition
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum DmaStep {
    /// Not ours: stale, or a channel of the inactive direction
    Ignore,
    /// Wake the waiting thread
    Done,
    /// Load the next message of the group into the active channel
    Next { address: usize, len: usize },
    /// All bytes handed over, the closing event comes from the controller
    Wait,
}

pub(crate) struct Transfer {
    state: State,
    msgs: *mut Message<'static>,
    /// Message under the PIO cursor
    index: usize,
    end: usize,
    /// Bytes of the group not yet moved
    xfer_len: usize,
    /// Bytes of the group not yet programmed into an ADD segment
    unprogrammed: usize,
    direction: Direction,
    /// Direction bit of the address byte, differs from `direction` during a 10-bit read header
    wire_direction: Direction,
    /// A repeated START is owed before the data phase
    is_restart: bool,
    has_stop: bool,
    address: u16,
    ten_bit: bool,
    errs: ErrorFlags,
    dma: bool,
    /// Message loaded in the active DMA channel
    dma_index: usize,
    /// Bytes moved by completed DMA blocks
    dma_count: usize,
}

// SAFETY: `msgs` is only dereferenced while the thread that lent the messages is blocked inside
// `I2c::transfer`, and every access is serialised by the critical section guarding `Transfer`.
unsafe impl Send for Transfer {}

impl Transfer {
    pub(crate) const fn new() -> Self {
        Transfer {
            state: State::Idle,
            msgs: ptr::null_mut(),
            index: 0,
            end: 0,
            xfer_len: 0,
            unprogrammed: 0,
            direction: Direction::Write,
            wire_direction: Direction::Write,
            is_restart: false,
            has_stop: false,
            address: 0,
            ten_bit: false,
            errs: ErrorFlags::empty(),
            dma: false,
            dma_index: 0,
            dma_count: 0,
        }
    }

    /// Lend the transaction to the state machine. [`Transfer::detach`] must run before the
    /// borrow of `msgs` ends.
    pub(crate) fn attach(&mut self, msgs: &mut [Message<'_>]) {
        self.msgs = msgs.as_mut_ptr().cast();
    }

    pub(crate) fn detach(&mut self) {
        self.msgs = ptr::null_mut();
        self.state = State::Idle;
        self.dma = false;
    }

    pub(crate) fn state(&self) -> State {
        self.state
    }

    pub(crate) fn errors(&self) -> ErrorFlags {
        self.errs
    }

    pub(crate) fn set_errors(&mut self, errs: ErrorFlags) {
        self.errs = errs;
    }

    pub(crate) fn direction(&self) -> Direction {
        self.direction
    }

    pub(crate) fn remaining(&self) -> usize {
        self.xfer_len
    }

    /// Bytes of the group moved by completed DMA blocks
    pub(crate) fn dma_count(&self) -> usize {
        self.dma_count
    }

    /// Reset the cursor and counters for `group`
    pub(crate) fn begin(&mut self, group: &Group, dma: bool) {
        self.state = State::AddressPhase;
        self.index = group.start;
        self.end = group.end;
        self.xfer_len = group.len;
        self.unprogrammed = group.len;
        self.direction = group.direction;
        self.wire_direction = group.direction;
        self.is_restart = false;
        self.has_stop = group.has_stop;
        self.address = group.address;
        self.ten_bit = group.ten_bit;
        self.errs = ErrorFlags::empty();
        self.dma = dma;
        self.dma_index = group.start;
        self.dma_count = 0;
    }

    /// A legacy 10-bit read first addresses the target for writing, then turns the bus around
    /// with a repeated START and the read header.
    pub(crate) fn owe_restart(&mut self) {
        self.is_restart = true;
        self.wire_direction = Direction::Write;
    }

    /// Leave DMA mode after a timeout, before the group is retried byte by byte
    pub(crate) fn leave_dma(&mut self) {
        self.dma = false;
        self.state = State::Idle;
    }

    /// A NACK on a write to an EEPROM, which refuses its address during the internal write
    /// cycle. The caller is expected to retry.
    pub(crate) fn eeprom_busy(&self) -> bool {
        !self.ten_bit
            && EEPROM_ADDRESSES.contains(&self.address)
            && self.direction == Direction::Write
            && self.errs == ErrorFlags::NACK
    }

    /// First byte after START on the legacy IP: 7-bit address or 10-bit header, plus the
    /// direction bit.
    fn header(&self) -> u8 {
        let rd = (self.wire_direction == Direction::Read) as u8;
        if self.ten_bit {
            0xF0 | (((self.address >> 8) as u8 & 0x3) << 1) | rd
        } else {
            ((self.address as u8 & 0x7F) << 1) | rd
        }
    }

    /// Target address as the ADD IP expects it: raw 10-bit, or 7-bit in bits 7:1
    pub(crate) fn target_address(&self) -> u16 {
        if self.ten_bit {
            self.address & 0x3FF
        } else {
            (self.address & 0x7F) << 1
        }
    }

    /// Byte count and end mode of the next ADD segment
    pub(crate) fn next_segment(&mut self) -> (u8, Stop) {
        let nbytes = self.unprogrammed.min(MAX_SEGMENT);
        self.unprogrammed -= nbytes;

        let stop = if self.unprogrammed > 0 {
            Stop::Reload
        } else if self.has_stop {
            Stop::Automatic
        } else {
            Stop::RepeatStart
        };
        (nbytes as u8, stop)
    }

    fn message(&mut self, index: usize) -> Option<&mut Message<'static>> {
        if self.msgs.is_null() || index >= self.end {
            return None;
        }
        // SAFETY: `index` is within the attached slice and the slice is still borrowed by the
        // blocked caller
        Some(unsafe { &mut *self.msgs.add(index) })
    }

    fn pop(&mut self) -> Option<u8> {
        while let Some(msg) = self.message(self.index) {
            if let Some(byte) = msg.pop() {
                return Some(byte);
            }
            self.index += 1;
        }
        None
    }

    fn push(&mut self, byte: u8) -> bool {
        while let Some(msg) = self.message(self.index) {
            if msg.push(byte) {
                return true;
            }
            self.index += 1;
        }
        false
    }

    fn receive<I: Ip>(&mut self, ip: &I) {
        let byte = ip.read_byte();
        if self.xfer_len == 0 || !self.push(byte) {
            self.errs.insert(ErrorFlags::OVERFLOW);
            return;
        }
        self.xfer_len -= 1;
    }

    fn transmit<I: Ip>(&mut self, ip: &I) {
        if let Some(byte) = self.pop() {
            self.xfer_len -= 1;
            ip.write_byte(byte);
        }
    }

    fn complete(&mut self) -> bool {
        self.state = State::Completing;
        true
    }

    pub(crate) fn abort<I: Ip>(&mut self, ip: &I, errs: ErrorFlags) -> bool {
        self.errs.insert(errs);
        ip.stop();
        self.state = State::Error;
        true
    }

    /// Event interrupt. Returns `true` when the waiting thread must be woken.
    pub(crate) fn on_event<I: Ip>(&mut self, ip: &I) -> bool {
        // After an abort the waiting thread owns the controller
        if matches!(self.state, State::Idle | State::Error) {
            return false;
        }
        match ip.generation() {
            Generation::Legacy => self.legacy_event(ip),
            Generation::Add => self.add_event(ip),
        }
    }

    /// Error interrupt. Returns `true` when the waiting thread must be woken.
    pub(crate) fn on_error<I: Ip>(&mut self, ip: &I) -> bool {
        if matches!(self.state, State::Idle | State::Error) {
            return false;
        }
        let events = ip.events();
        let mut errs = ErrorFlags::empty();

        if events.contains(Events::BUS_ERROR) {
            errs.insert(ErrorFlags::BUS);
        }
        if events.contains(Events::ARBITRATION_LOST) {
            errs.insert(ErrorFlags::ARBITRATION);
        }
        if events.contains(Events::OVERRUN) {
            errs.insert(ErrorFlags::OVERFLOW);
        }
        let mut handled = events & Events::ERRORS;

        // The legacy IP reports the acknowledge error through the error interrupt
        if ip.generation() == Generation::Legacy && events.contains(Events::NACK) {
            errs.insert(ErrorFlags::NACK);
            handled.insert(Events::NACK);
            if self.dma {
                ip.set_dma_requests(None);
            }
        }
        if errs.is_empty() {
            return false;
        }
        ip.clear_events(handled);
        self.abort(ip, errs)
    }

    fn legacy_event<I: Ip>(&mut self, ip: &I) -> bool {
        let events = ip.events();

        if events.contains(Events::START_SENT) {
            self.state = State::AddressPhase;
            ip.send_address(self.header());
            return false;
        }
        if events.contains(Events::HEADER_SENT) {
            ip.send_address(self.address as u8);
            return false;
        }
        if events.contains(Events::ADDRESS_SENT) {
            self.legacy_address_sent(ip);
            return false;
        }

        if self.dma {
            // Only the end of a DMA write is left to the event interrupt
            if self.xfer_len == 0 && events.contains(Events::BYTE_DONE) {
                return self.legacy_finish_write(ip);
            }
            return false;
        }

        if events.contains(Events::BYTE_DONE) {
            match self.direction {
                Direction::Read => self.legacy_byte_done_rx(ip),
                Direction::Write => self.legacy_tx(ip),
            }
        } else if events.contains(Events::RX_NOT_EMPTY) {
            self.legacy_rx(ip)
        } else if events.contains(Events::TX_EMPTY) {
            self.legacy_tx(ip)
        } else {
            false
        }
    }

    fn legacy_address_sent<I: Ip>(&mut self, ip: &I) {
        // NACK of the last byte has to be armed before the address flag is cleared
        if self.wire_direction == Direction::Read && self.xfer_len <= 2 {
            ip.set_ack(false);
        }
        ip.clear_address_flag();

        if self.is_restart {
            self.is_restart = false;
            self.wire_direction = Direction::Read;
            ip.start();
            return;
        }

        self.state = State::DataPhase;
        if self.dma {
            ip.set_dma_requests(Some(self.direction));
            if self.direction == Direction::Read && self.xfer_len == 1 {
                ip.set_ack(false);
                ip.stop();
            }
            ip.disable_interrupts(Interrupts::EVENT);
            return;
        }

        if self.wire_direction == Direction::Read && self.xfer_len == 1 {
            ip.stop();
        }
    }

    /// Both the data and the shift register hold a received byte
    fn legacy_byte_done_rx<I: Ip>(&mut self, ip: &I) -> bool {
        match self.xfer_len {
            2 => {
                ip.stop();
                self.receive(ip);
                self.receive(ip);
                self.complete()
            }
            3 => {
                // The byte now entering the shift register is the last one
                ip.set_ack(false);
                self.receive(ip);
                false
            }
            _ => self.legacy_rx(ip),
        }
    }

    fn legacy_rx<I: Ip>(&mut self, ip: &I) -> bool {
        match self.xfer_len {
            0 => self.complete(),
            1 => {
                self.receive(ip);
                self.complete()
            }
            // The tail is read on byte-transfer-complete
            2 | 3 => {
                ip.disable_interrupts(Interrupts::BUFFER);
                false
            }
            _ => {
                self.receive(ip);
                false
            }
        }
    }

    fn legacy_tx<I: Ip>(&mut self, ip: &I) -> bool {
        if self.xfer_len == 0 {
            return self.legacy_finish_write(ip);
        }
        if self.xfer_len == 1 {
            ip.disable_interrupts(Interrupts::BUFFER);
        }
        self.transmit(ip);
        false
    }

    fn legacy_finish_write<I: Ip>(&mut self, ip: &I) -> bool {
        if self.has_stop {
            ip.stop();
        } else {
            // The bus stays held for the repeated START of the next group
            ip.disable_interrupts(Interrupts::EVENT);
        }
        self.complete()
    }

    fn add_event<I: Ip>(&mut self, ip: &I) -> bool {
        let events = ip.events();

        if events.contains(Events::NACK) {
            ip.clear_events(Events::NACK);
            if self.dma {
                ip.set_dma_requests(None);
            }
            return self.abort(ip, ErrorFlags::NACK);
        }

        if self.state == State::AddressPhase {
            self.state = if self.unprogrammed > 0 {
                State::ReloadPending
            } else {
                State::DataPhase
            };
        }

        if !self.dma {
            match self.direction {
                Direction::Read if events.contains(Events::RX_NOT_EMPTY) => {
                    self.receive(ip);
                    if self.errs.contains(ErrorFlags::OVERFLOW) {
                        ip.disable_interrupts(Interrupts::ALL);
                        return self.abort(ip, ErrorFlags::OVERFLOW);
                    }
                }
                Direction::Write if events.contains(Events::TX_READY) => {
                    if self.xfer_len > 0 {
                        self.transmit(ip);
                    } else {
                        ip.disable_interrupts(Interrupts::TX);
                    }
                }
                _ => {}
            }
        }

        if events.contains(Events::RELOAD) {
            let (nbytes, stop) = self.next_segment();
            self.state = if stop == Stop::Reload {
                State::ReloadPending
            } else {
                State::DataPhase
            };
            ip.program_segment(nbytes, stop);
        }

        if events.contains(Events::STOP_DETECTED) {
            ip.clear_events(Events::STOP_DETECTED);
            ip.set_autoend(false);
            if self.dma && self.xfer_len > 0 {
                // The DMA completion still has to account for the last block
                return false;
            }
            ip.disable_interrupts(Interrupts::ALL);
            if self.xfer_len > 0 {
                // STOP before the byte count was reached
                self.errs.insert(ErrorFlags::BUS);
                self.state = State::Error;
                return true;
            }
            return self.complete();
        }

        if events.contains(Events::TRANSFER_COMPLETE) && self.xfer_len == 0 {
            if self.has_stop && !ip.autoend() {
                ip.stop();
            }
            ip.disable_interrupts(Interrupts::ALL);
            return self.complete();
        }

        false
    }

    /// DMA block completion on the channel of `direction`
    pub(crate) fn on_dma<I: Ip>(
        &mut self,
        ip: &I,
        direction: Direction,
        result: Result<(), dma::Error>,
    ) -> DmaStep {
        if !self.dma || self.state == State::Idle || direction != self.direction {
            return DmaStep::Ignore;
        }

        if result.is_err() {
            if self.errs.is_empty() {
                self.errs.insert(ErrorFlags::NACK);
            }
            ip.set_dma_requests(None);
            self.abort(ip, ErrorFlags::empty());
            return DmaStep::Done;
        }
        if !self.errs.is_empty() {
            self.state = State::Error;
            return DmaStep::Done;
        }

        let chunk = self.message(self.dma_index).map_or(0, |m| m.remaining());
        self.dma_count += chunk;
        self.xfer_len = self.xfer_len.saturating_sub(chunk);
        self.dma_index += 1;

        let last = self.dma_index + 1 == self.end;
        if let Some(msg) = self.message(self.dma_index) {
            let next = DmaStep::Next {
                address: msg.address(),
                len: msg.remaining(),
            };
            if last && self.direction == Direction::Read {
                ip.set_dma_last(true);
            }
            return next;
        }

        self.state = State::Completing;
        match (ip.generation(), self.direction) {
            (Generation::Legacy, Direction::Read) => {
                ip.stop();
                DmaStep::Done
            }
            // Wait for the last byte to leave the shift register
            (Generation::Legacy, Direction::Write) => {
                ip.enable_interrupts(Interrupts::EVENT);
                DmaStep::Wait
            }
            (Generation::Add, Direction::Read) => {
                if self.has_stop && !ip.autoend() {
                    ip.stop();
                }
                DmaStep::Done
            }
            (Generation::Add, Direction::Write) => {
                ip.enable_interrupts(Interrupts::COMPLETE | Interrupts::STOP);
                DmaStep::Wait
            }
        }
    }

    /// Mark the messages of the DMA group from `start` whose block completed as moved. After an
    /// abort the message in flight and the ones after it keep their count.
    pub(crate) fn consume_dma_blocks(&mut self, start: usize) {
        for index in start..self.dma_index {
            if let Some(msg) = self.message(index) {
                msg.consume();
            }
        }
    }
}

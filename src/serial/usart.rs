//! USART implementation for Serial
//!
//! This provides an implementation of the Serial functionality via the USART peripheral. See the
//! documentation for the `serial` module for more information.

use core::cell::{Cell, RefCell};
use core::ops::Deref;

use critical_section::Mutex;
use embedded_dma::{ReadBuffer, WriteBuffer};
use embedded_io as io;

use super::config::{Config, Parity, StopBits};
use super::*;
use crate::dma::{
    Channel, ChannelConfig, DmaTransport, Endpoint, NoDma, Stream, StreamCallback, StreamLink,
    TransferDirection,
};
use crate::reg::Registers;
use crate::time::{Hertz, MicroSeconds};

mod regs;
use regs::*;

/// Most events one driver call can produce
const MAX_NOTICES: usize = 6;

#[derive(Copy, Clone, Debug)]
struct RxBlock {
    address: usize,
    len: usize,
    /// Bytes already reported with `RxRdy`
    offset: usize,
    /// Bytes seen at the last idle timer check
    counter: usize,
    timeout: Option<MicroSeconds>,
}

impl RxBlock {
    const fn new(address: usize, len: usize, timeout: Option<MicroSeconds>) -> Self {
        RxBlock {
            address,
            len,
            offset: 0,
            counter: 0,
            timeout,
        }
    }
}

struct State {
    /// Length of the transmit block in flight
    tx: Option<usize>,
    rx: Option<RxBlock>,
}

impl State {
    const fn new() -> Self {
        State { tx: None, rx: None }
    }
}

/// Work for the event handler, collected inside a critical section and delivered after it
#[derive(Copy, Clone, Debug)]
enum Notice {
    TxDone(usize),
    TxAborted(usize),
    RxRdy {
        address: usize,
        offset: usize,
        len: usize,
    },
    RxBufRequest,
    RxBufReleased {
        address: usize,
        len: usize,
    },
    RxDisabled,
    Arm(Timeout, MicroSeconds),
    Cancel(Timeout),
}

#[derive(Default)]
struct Notices {
    list: [Option<Notice>; MAX_NOTICES],
}

impl Notices {
    fn one(notice: Notice) -> Self {
        let mut notices = Notices::default();
        notices.push(notice);
        notices
    }

    fn push(&mut self, notice: Notice) {
        if let Some(slot) = self.list.iter_mut().find(|slot| slot.is_none()) {
            *slot = Some(notice);
        }
    }
}

/// Per-instance state shared between the driver and the interrupt handlers
///
/// The asynchronous interface lives here, so that event handlers running in interrupt context
/// can drive it, e.g. answer [`Event::RxBufRequest`] with [`Shared::rx_buf_rsp`].
pub struct Shared<R, T = NoDma> {
    regs: R,
    /// Transmit and receive channel
    dma: Option<(Channel<T>, Channel<T>)>,
    state: Mutex<RefCell<State>>,
    handler: Mutex<Cell<Option<&'static dyn EventHandler>>>,
    /// Completion callbacks of the transmit and the receive channel
    links: [StreamLink; 2],
}

impl<R, T> Shared<R, T> {
    /// Shared state of an instance used without DMA. The asynchronous transfers report
    /// [`Error::NotSupported`].
    pub const fn new(regs: R) -> Self {
        Shared {
            regs,
            dma: None,
            state: Mutex::new(RefCell::new(State::new())),
            handler: Mutex::new(Cell::new(None)),
            links: [StreamLink::new(Stream::Tx), StreamLink::new(Stream::Rx)],
        }
    }

    pub const fn with_dma(regs: R, tx: Channel<T>, rx: Channel<T>) -> Self {
        Shared {
            regs,
            dma: Some((tx, rx)),
            state: Mutex::new(RefCell::new(State::new())),
            handler: Mutex::new(Cell::new(None)),
            links: [StreamLink::new(Stream::Tx), StreamLink::new(Stream::Rx)],
        }
    }

    pub fn regs(&self) -> &R {
        &self.regs
    }

    /// Deliver events of the asynchronous interface to `handler`
    pub fn set_handler(&self, handler: &'static dyn EventHandler) {
        critical_section::with(|cs| self.handler.borrow(cs).set(Some(handler)));
    }

    fn handler(&self) -> Option<&'static dyn EventHandler> {
        critical_section::with(|cs| self.handler.borrow(cs).get())
    }

    fn dispatch(&self, notices: Notices) {
        let Some(handler) = self.handler() else {
            return;
        };
        for notice in notices.list.into_iter().flatten() {
            match notice {
                Notice::TxDone(len) => handler.on_event(Event::TxDone { len }),
                Notice::TxAborted(sent) => handler.on_event(Event::TxAborted { sent }),
                Notice::RxRdy {
                    address,
                    offset,
                    len,
                } => {
                    // SAFETY: the DMA has moved past these bytes of a buffer handed over for 'static
                    let data =
                        unsafe { core::slice::from_raw_parts((address + offset) as *const u8, len) };
                    handler.on_event(Event::RxRdy { offset, len, data });
                }
                Notice::RxBufRequest => handler.on_event(Event::RxBufRequest),
                Notice::RxBufReleased { address, len } => {
                    // SAFETY: the driver no longer uses the buffer, so this is the only reference
                    let buf = unsafe { core::slice::from_raw_parts_mut(address as *mut u8, len) };
                    handler.on_event(Event::RxBufReleased(buf));
                }
                Notice::RxDisabled => handler.on_event(Event::RxDisabled),
                Notice::Arm(timeout, duration) => handler.arm_timeout(timeout, duration),
                Notice::Cancel(timeout) => handler.cancel_timeout(timeout),
            }
        }
    }
}

fn status_error(stat: u32) -> Result<(), Error> {
    if stat & STAT_PERR != 0 {
        Err(Error::Parity)
    } else if stat & STAT_FERR != 0 {
        Err(Error::Framing)
    } else if stat & STAT_NERR != 0 {
        Err(Error::Noise)
    } else if stat & STAT_ORERR != 0 {
        Err(Error::Overrun)
    } else {
        Ok(())
    }
}

impl<R: Registers, T> Shared<R, T> {
    /// Read one byte if one was received
    pub fn poll_in(&self) -> nb::Result<u8, Error> {
        if self.is_data_ready()? {
            Ok(self.read_data())
        } else {
            Err(nb::Error::WouldBlock)
        }
    }

    /// Send one byte, blocking until the transmit register accepts the next one
    pub fn poll_out(&self, byte: u8) {
        self.write_data(byte);
        while !self.is_tx_empty() {}
    }

    /// Report and clear the latched receive errors. Noise is cleared without being reported.
    pub fn err_check(&self) -> ErrorFlags {
        let stat = self.regs.read(STAT);
        let mut errors = ErrorFlags::empty();
        errors.set(ErrorFlags::OVERRUN, stat & STAT_ORERR != 0);
        errors.set(ErrorFlags::PARITY, stat & STAT_PERR != 0);
        errors.set(ErrorFlags::FRAMING, stat & STAT_FERR != 0);
        self.regs
            .clear_bits(STAT, STAT_ORERR | STAT_PERR | STAT_FERR | STAT_NERR);
        errors
    }

    /// Write as many bytes of `data` as the transmit register takes without waiting
    pub fn fifo_fill(&self, data: &[u8]) -> usize {
        let mut sent = 0;
        while sent < data.len() && self.is_tx_empty() {
            self.write_data(data[sent]);
            sent += 1;
        }
        sent
    }

    /// Read received bytes into `buf` until none is left
    pub fn fifo_read(&self, buf: &mut [u8]) -> usize {
        let mut received = 0;
        while received < buf.len() && self.regs.is_set(STAT, STAT_RBNE) {
            buf[received] = self.read_data();
            received += 1;
        }
        received
    }

    /// Starts listening for an interrupt event
    pub fn listen(&self, interrupt: Interrupt) {
        match interrupt {
            Interrupt::Tx => self.regs.set_bits(CTL0, CTL0_TCIE),
            Interrupt::Rx => self.regs.set_bits(CTL0, CTL0_RBNEIE),
            Interrupt::Idle => self.regs.set_bits(CTL0, CTL0_IDLEIE),
            Interrupt::Error => {
                self.regs.set_bits(CTL2, CTL2_ERRIE);
                self.regs.set_bits(CTL0, CTL0_PERRIE);
            }
        }
    }

    /// Stop listening for an interrupt event
    pub fn unlisten(&self, interrupt: Interrupt) {
        match interrupt {
            Interrupt::Tx => self.regs.clear_bits(CTL0, CTL0_TCIE),
            Interrupt::Rx => self.regs.clear_bits(CTL0, CTL0_RBNEIE),
            Interrupt::Idle => self.regs.clear_bits(CTL0, CTL0_IDLEIE),
            Interrupt::Error => {
                self.regs.clear_bits(CTL2, CTL2_ERRIE);
                self.regs.clear_bits(CTL0, CTL0_PERRIE);
            }
        }
        interrupt_clear_clock_sync_delay!(self.regs, CTL0);
    }

    /// The transmit register is empty and the transmission complete interrupt is active
    pub fn tx_ready(&self) -> bool {
        let stat = self.regs.read(STAT);
        stat & STAT_TBE != 0 && stat & STAT_TC != 0 && self.regs.is_set(CTL0, CTL0_TCIE)
    }

    /// Every byte, including the shift register, has left the transmitter
    pub fn tx_complete(&self) -> bool {
        self.regs.is_set(STAT, STAT_TC)
    }

    pub fn rx_ready(&self) -> bool {
        self.regs.is_set(STAT, STAT_RBNE)
    }

    /// A receive or transmission complete interrupt is pending
    pub fn is_pending(&self) -> bool {
        let stat = self.regs.read(STAT);
        let ctl0 = self.regs.read(CTL0);
        (stat & STAT_RBNE != 0 && ctl0 & CTL0_RBNEIE != 0)
            || (stat & STAT_TC != 0 && ctl0 & CTL0_TCIE != 0)
    }

    /// Return true if the line idle status is set
    pub fn is_idle(&self) -> bool {
        self.regs.is_set(STAT, STAT_IDLEF)
    }

    /// Return true if the tx register is empty (and can accept data)
    fn is_tx_empty(&self) -> bool {
        self.regs.is_set(STAT, STAT_TBE)
    }

    /// Return true if the rx register is not empty (and can be read)
    fn is_data_ready(&self) -> Result<bool, Error> {
        let stat = self.regs.read(STAT);
        if let Err(error) = status_error(stat) {
            self.clear_error_flag(error);
            return Err(error);
        }
        Ok(stat & STAT_RBNE != 0)
    }

    fn read_data(&self) -> u8 {
        self.regs.read(DATA) as u8
    }

    fn write_data(&self, byte: u8) {
        self.regs.write(DATA, byte as u32);
    }

    fn clear_error_flag(&self, error: Error) {
        let flag = match error {
            Error::Framing => STAT_FERR,
            Error::Noise => STAT_NERR,
            Error::Overrun => STAT_ORERR,
            Error::Parity => STAT_PERR,
            _ => return,
        };
        self.regs.clear_bits(STAT, flag);
    }

    fn read_words(&self, words: &mut [u8]) -> Result<usize, Error> {
        for (i, w) in words.iter_mut().enumerate() {
            if !self.is_data_ready()? {
                return Ok(i);
            }
            *w = self.read_data();
        }
        Ok(words.len())
    }

    fn write_words(&self, words: &[u8]) -> Result<usize, Error> {
        Ok(self.fifo_fill(words))
    }
}

impl<R, T> Shared<R, T>
where
    R: Registers + Sync + 'static,
    T: DmaTransport + Sync + 'static,
{
    /// Send `buf` with DMA. Completion is reported with [`Event::TxDone`].
    ///
    /// With a non-zero `timeout` the handler is asked to arm [`Timeout::Tx`], whose expiry
    /// aborts the transmission.
    pub fn tx(&'static self, buf: &'static [u8], timeout: Option<MicroSeconds>) -> Result<(), Error> {
        // SAFETY: the buffer is borrowed for 'static, so it outlives the transfer
        let (ptr, len) = unsafe { buf.read_buffer() };
        if len == 0 {
            return Err(Error::InvalidInput);
        }
        let (tx, _) = self.dma.as_ref().ok_or(Error::NotSupported)?;

        critical_section::with(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            if state.tx.is_some() {
                return Err(Error::Busy);
            }
            state.tx = Some(len);
            Ok(())
        })?;
        debug!("USART TX: {} bytes", len);

        let config = ChannelConfig {
            direction: TransferDirection::MemoryToPeripheral,
            request: tx.request,
            priority: tx.priority,
            source: Endpoint::incremented(ptr as usize),
            destination: Endpoint::fixed(self.regs.address(DATA)),
            block_size: len,
            callback: Some(self.link(Stream::Tx)),
            ..ChannelConfig::default()
        };
        let _ = tx.dma.stop(tx.channel);
        self.regs.set_bits(CTL2, CTL2_DENT);
        if let Err(e) = tx
            .dma
            .configure(tx.channel, &config)
            .and_then(|_| tx.dma.start(tx.channel))
        {
            self.regs.clear_bits(CTL2, CTL2_DENT);
            critical_section::with(|cs| self.state.borrow_ref_mut(cs).tx = None);
            return Err(e.into());
        }

        if let Some(timeout) = timeout.filter(|t| t.ticks() > 0) {
            self.dispatch(Notices::one(Notice::Arm(Timeout::Tx, timeout)));
        }
        Ok(())
    }

    /// Completion callback for the channel of `stream`, routed back to this instance
    fn link(&'static self, stream: Stream) -> &'static StreamLink {
        let link = &self.links[stream as usize];
        link.attach(self);
        link
    }

    /// Stop the transmission in flight, reporting [`Event::TxAborted`]
    pub fn tx_abort(&self) -> Result<(), Error> {
        debug!("USART TX abort");
        let mut notices = Notices::one(Notice::Cancel(Timeout::Tx));
        if let Some((_, sent)) = self.retire_tx() {
            notices.push(Notice::TxAborted(sent));
        }
        self.dispatch(notices);
        Ok(())
    }

    /// Expiry of [`Timeout::Tx`]
    pub fn on_tx_timeout(&self) {
        debug!("USART TX timeout");
        let _ = self.tx_abort();
    }

    /// Stop the transmit channel and drop the block in flight. Returns its length and the
    /// number of bytes sent.
    fn retire_tx(&self) -> Option<(usize, usize)> {
        let pending = self.dma.as_ref().and_then(|(tx, _)| {
            let _ = tx.dma.stop(tx.channel);
            tx.dma.status(tx.channel).ok()
        });
        self.regs.clear_bits(CTL2, CTL2_DENT);
        let len = critical_section::with(|cs| self.state.borrow_ref_mut(cs).tx.take())?;
        let sent = pending.map_or(0, |s| len.saturating_sub(s.pending_length));
        Some((len, sent))
    }

    fn tx_dma_done(&self, result: Result<(), crate::dma::Error>) {
        let mut notices = Notices::one(Notice::Cancel(Timeout::Tx));
        match (self.retire_tx(), result) {
            (Some((len, _)), Ok(())) => notices.push(Notice::TxDone(len)),
            (Some((_, sent)), Err(_)) => {
                error!("USART TX DMA error after {} bytes", sent);
                notices.push(Notice::TxAborted(sent));
            }
            (None, _) => {}
        }
        self.dispatch(notices);
    }

    /// Start receiving into `buf` with DMA.
    ///
    /// `timeout` controls when received bytes are reported once the line goes idle: zero
    /// reports at once, other values ask the handler to arm [`Timeout::Rx`] and report at its
    /// expiry, `None` only reports full buffers.
    pub fn rx_enable(
        &'static self,
        mut buf: &'static mut [u8],
        timeout: Option<MicroSeconds>,
    ) -> Result<(), Error> {
        if buf.is_empty() {
            return Err(Error::InvalidInput);
        }
        let (_, rx) = self.dma.as_ref().ok_or(Error::NotSupported)?;
        buf.fill(0);
        // SAFETY: the buffer is borrowed for 'static and handed over to the DMA here
        let (ptr, len) = unsafe { buf.write_buffer() };
        let address = ptr as usize;

        critical_section::with(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            if state.rx.is_some() {
                return Err(Error::Busy);
            }
            state.rx = Some(RxBlock::new(address, len, timeout));
            Ok(())
        })?;

        self.regs.clear_bits(STAT, STAT_IDLEF);
        let config = ChannelConfig {
            direction: TransferDirection::PeripheralToMemory,
            request: rx.request,
            priority: rx.priority,
            source: Endpoint::fixed(self.regs.address(DATA)),
            destination: Endpoint::incremented(address),
            block_size: len,
            callback: Some(self.link(Stream::Rx)),
            ..ChannelConfig::default()
        };
        let started = rx.dma.configure(rx.channel, &config).and_then(|_| {
            self.regs.set_bits(CTL2, CTL2_DENR);
            rx.dma.start(rx.channel)
        });
        if let Err(e) = started {
            self.regs.clear_bits(CTL2, CTL2_DENR);
            critical_section::with(|cs| self.state.borrow_ref_mut(cs).rx = None);
            return Err(e.into());
        }

        self.regs.clear_bits(STAT, STAT_IDLEF | STAT_RBNE);
        self.regs.set_bits(CTL0, CTL0_IDLEIE | CTL0_RBNEIE);
        debug!("USART RX enabled: {} bytes", len);
        Ok(())
    }

    /// Continue receiving into `buf`. Bytes of the current buffer not reported yet are reported
    /// first, then the current buffer is released.
    pub fn rx_buf_rsp(&self, mut buf: &'static mut [u8]) -> Result<(), Error> {
        if buf.is_empty() {
            return Err(Error::InvalidInput);
        }
        let (_, rx) = self.dma.as_ref().ok_or(Error::NotSupported)?;
        buf.fill(0);
        // SAFETY: as in `rx_enable`
        let (ptr, len) = unsafe { buf.write_buffer() };
        let address = ptr as usize;

        let (notices, result) = critical_section::with(|cs| {
            let mut notices = Notices::default();
            let mut state = self.state.borrow_ref_mut(cs);
            let Some(block) = state.rx.as_mut() else {
                return (notices, Err(Error::NotEnabled));
            };

            let _ = rx.dma.stop(rx.channel);
            self.regs.clear_bits(CTL2, CTL2_DENR);
            self.flush(block, &mut notices);
            notices.push(Notice::RxBufReleased {
                address: block.address,
                len: block.len,
            });
            *block = RxBlock::new(address, len, block.timeout);

            let started = rx
                .dma
                .reload(rx.channel, self.regs.address(DATA), address, len)
                .and_then(|_| {
                    self.regs.set_bits(CTL2, CTL2_DENR);
                    rx.dma.start(rx.channel)
                });
            if let Err(e) = started {
                error!("USART RX restart failed: {:?}", e);
                self.regs.clear_bits(CTL2, CTL2_DENR);
                state.rx = None;
                notices.push(Notice::RxBufReleased { address, len });
                notices.push(Notice::RxDisabled);
                return (notices, Err(e.into()));
            }
            debug!("USART RX buffer replaced: {} bytes", len);
            (notices, Ok(()))
        });
        self.dispatch(notices);
        result
    }

    /// Stop receiving. Bytes not reported yet are reported, the buffer is released and
    /// [`Event::RxDisabled`] closes the sequence.
    pub fn rx_disable(&self) -> Result<(), Error> {
        let (notices, result) = critical_section::with(|cs| {
            let mut notices = Notices::default();
            let mut state = self.state.borrow_ref_mut(cs);
            let Some(block) = state.rx.as_mut() else {
                notices.push(Notice::RxDisabled);
                return (notices, Err(Error::NotEnabled));
            };

            self.regs.clear_bits(CTL0, CTL0_IDLEIE);
            self.flush(block, &mut notices);
            self.regs.clear_bits(CTL2, CTL2_DENR);
            notices.push(Notice::Cancel(Timeout::Rx));
            if let Some((_, rx)) = self.dma.as_ref() {
                let _ = rx.dma.stop(rx.channel);
            }
            self.regs.clear_bits(CTL0, CTL0_RBNEIE);
            self.regs.clear_bits(STAT, STAT_IDLEF | STAT_RBNE);

            notices.push(Notice::RxBufReleased {
                address: block.address,
                len: block.len,
            });
            notices.push(Notice::RxDisabled);
            state.rx = None;
            (notices, Ok(()))
        });
        self.dispatch(notices);
        result
    }

    /// Expiry of [`Timeout::Rx`]. Re-arms while bytes keep arriving, reports them otherwise.
    pub fn on_rx_timeout(&self) {
        let notices = critical_section::with(|cs| {
            let mut notices = Notices::default();
            let mut state = self.state.borrow_ref_mut(cs);
            let Some(block) = state.rx.as_mut() else {
                return notices;
            };
            match self.received(block.len) {
                Some(received) if received > block.counter => {
                    block.counter = received;
                    if let Some(timeout) = block.timeout {
                        notices.push(Notice::Arm(Timeout::Rx, timeout));
                    }
                }
                _ => self.flush(block, &mut notices),
            }
            notices
        });
        self.dispatch(notices);
    }

    /// Interrupt handler
    pub fn on_interrupt(&self) {
        let stat = self.regs.read(STAT);
        let ctl0 = self.regs.read(CTL0);
        let idle = stat & STAT_IDLEF != 0 && ctl0 & CTL0_IDLEIE != 0;
        let rbne = stat & STAT_RBNE != 0 && ctl0 & CTL0_RBNEIE != 0;
        let tc = stat & STAT_TC != 0 && ctl0 & CTL0_TCIE != 0;

        if idle {
            // The idle flag clears on a status read followed by a data read
            let _ = self.regs.read(STAT);
            let _ = self.regs.read(DATA);
            if self.regs.is_set(STAT, STAT_IDLEF) {
                self.regs.clear_bits(STAT, STAT_IDLEF);
            }

            let notices = critical_section::with(|cs| {
                let mut notices = Notices::default();
                if let Some(block) = self.state.borrow_ref_mut(cs).rx.as_mut() {
                    if self.received(block.len).is_some_and(|r| r > block.offset) {
                        self.schedule_flush(block, &mut notices);
                    }
                }
                notices
            });
            self.dispatch(notices);
            return;
        }

        if rbne || tc {
            let consumed = critical_section::with(|cs| {
                let mut notices = Notices::default();
                let mut state = self.state.borrow_ref_mut(cs);
                let block = state.rx.as_mut()?;
                let received = self.received(block.len).filter(|&r| r > block.offset)?;
                block.counter = received;
                self.schedule_flush(block, &mut notices);
                Some(notices)
            });
            if let Some(notices) = consumed {
                self.dispatch(notices);
                return;
            }
        }

        if let Some(handler) = self.handler() {
            handler.on_interrupt();
        }
    }

    fn rx_dma_done(&self, result: Result<(), crate::dma::Error>) {
        let notices = critical_section::with(|cs| {
            let mut notices = Notices::default();
            let mut state = self.state.borrow_ref_mut(cs);
            let Some(block) = state.rx.as_mut() else {
                return notices;
            };

            self.regs.clear_bits(CTL2, CTL2_DENR);
            if let Some((_, rx)) = self.dma.as_ref() {
                let _ = rx.dma.stop(rx.channel);
            }
            notices.push(Notice::Cancel(Timeout::Rx));
            if result.is_err() {
                error!("USART RX DMA error");
            }
            self.flush(block, &mut notices);
            notices.push(Notice::RxBufRequest);
            notices
        });
        self.dispatch(notices);
    }

    /// Bytes the receive channel has written into a block of `len`
    fn received(&self, len: usize) -> Option<usize> {
        let (_, rx) = self.dma.as_ref()?;
        let status = rx.dma.status(rx.channel).ok()?;
        Some(len.saturating_sub(status.pending_length))
    }

    fn schedule_flush(&self, block: &mut RxBlock, notices: &mut Notices) {
        match block.timeout {
            Some(timeout) if timeout.ticks() > 0 => {
                notices.push(Notice::Arm(Timeout::Rx, timeout))
            }
            Some(_) => self.flush(block, notices),
            None => {}
        }
    }

    /// Report the bytes received since the last report. The channel keeps running.
    fn flush(&self, block: &mut RxBlock, notices: &mut Notices) {
        let Some(received) = self.received(block.len) else {
            return;
        };
        block.counter = received;
        if received > block.offset {
            notices.push(Notice::RxRdy {
                address: block.address,
                offset: block.offset,
                len: received - block.offset,
            });
            block.offset = received;
        }
    }
}

impl<R, T> StreamCallback for Shared<R, T>
where
    R: Registers + Sync + 'static,
    T: DmaTransport + Sync + 'static,
{
    fn on_stream(&self, stream: Stream, result: Result<(), crate::dma::Error>) {
        match stream {
            Stream::Tx => self.tx_dma_done(result),
            Stream::Rx => self.rx_dma_done(result),
        }
    }
}

/// Serial abstraction
pub struct Serial<R: 'static, T: 'static = NoDma> {
    shared: &'static Shared<R, T>,
}

impl<R, T> Deref for Serial<R, T> {
    type Target = Shared<R, T>;

    fn deref(&self) -> &Self::Target {
        self.shared
    }
}

impl<R: Registers, T> Serial<R, T> {
    /// Program the frame format of `config` for a peripheral clocked at `pclk`, then enable
    /// the transmitter and the receiver
    pub fn new(
        shared: &'static Shared<R, T>,
        pclk: Hertz,
        config: impl Into<Config>,
    ) -> Result<Self, Error> {
        let serial = Serial { shared };
        serial.configure(pclk, &config.into())?;
        Ok(serial)
    }

    /// Runs the serial port configuration process
    ///
    /// The peripheral is disabled while the frame format changes.
    pub fn configure(&self, pclk: Hertz, config: &Config) -> Result<(), Error> {
        let baudrate = config.baudrate.raw();
        if baudrate == 0 {
            return Err(Error::InvalidInput);
        }

        // 16 times oversampling. BAUD holds USARTDIV with 4 fractional bits:
        //
        // USARTDIV = pclk / (16 x baud), so BAUD = pclk / baud
        let div = (pclk.raw() as u64 + baudrate as u64 / 2) / baudrate as u64;
        if !(16..=0xFFFF).contains(&div) {
            return Err(Error::NotSupported);
        }
        let div = div as u32;
        debug!(
            "USART: pclk: {}; BAUD: {:#X}; Baudrate: {}",
            pclk.raw(),
            div,
            pclk.raw() / div
        );

        let regs = &self.shared.regs;
        regs.clear_bits(CTL0, CTL0_UEN);
        regs.write(BAUD, div);

        let stb = match config.stop_bits {
            StopBits::Stop1 => 0b00,
            StopBits::Stop0p5 => 0b01,
            StopBits::Stop2 => 0b10,
            StopBits::Stop1p5 => 0b11,
        };
        regs.modify(CTL1, |r| (r & !CTL1_STB_MASK) | (stb << CTL1_STB_SHIFT));

        // Keep 8 data bits: the parity bit takes the ninth
        let frame = match config.parity {
            Parity::ParityNone => 0,
            Parity::ParityEven => CTL0_WL | CTL0_PCEN,
            Parity::ParityOdd => CTL0_WL | CTL0_PCEN | CTL0_PM,
        };
        regs.modify(CTL0, |r| {
            (r & !(CTL0_WL | CTL0_PCEN | CTL0_PM)) | frame | CTL0_REN | CTL0_TEN
        });
        regs.set_bits(CTL0, CTL0_UEN);
        Ok(())
    }

    /// Wait for the transmitter to drain, disable the peripheral and release the shared state
    pub fn free(self) -> &'static Shared<R, T> {
        while !self.tx_complete() {}
        self.shared.regs.clear_bits(CTL0, CTL0_UEN);
        self.shared
    }
}

/*
 *  HAL Implementations
 */

impl<R, T> io::ErrorType for Serial<R, T> {
    type Error = Error;
}

impl<R: Registers, T> io::Read for Serial<R, T> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        if buf.is_empty() {
            return Ok(0);
        }
        let count = loop {
            let count = self.read_words(buf)?;
            if count > 0 {
                break count;
            }
        };
        Ok(count)
    }
}

impl<R: Registers, T> io::ReadReady for Serial<R, T> {
    fn read_ready(&mut self) -> Result<bool, Self::Error> {
        self.is_data_ready()
    }
}

impl<R: Registers, T> io::Write for Serial<R, T> {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        if buf.is_empty() {
            return Ok(0);
        }
        let count = loop {
            let count = self.write_words(buf)?;
            if count > 0 {
                break count;
            }
        };
        Ok(count)
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        while !self.tx_complete() {}
        Ok(())
    }
}

impl<R: Registers, T> io::WriteReady for Serial<R, T> {
    fn write_ready(&mut self) -> Result<bool, Self::Error> {
        Ok(self.is_tx_empty())
    }
}

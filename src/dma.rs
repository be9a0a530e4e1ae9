//! DMA transport
//!
//! Peripheral drivers in this crate do not program a DMA controller themselves. They describe
//! each block transfer with a [`ChannelConfig`] and hand it to a [`DmaTransport`], which owns the
//! channel registers and reports completion through a [`DmaCallback`]:
//!
//! ```ignore
//! let config = ChannelConfig {
//!     direction: TransferDirection::MemoryToPeripheral,
//!     request: 12,
//!     source: Endpoint::incremented(buf.as_ptr() as usize),
//!     destination: Endpoint::fixed(usart_data_register),
//!     block_size: buf.len(),
//!     callback: Some(&SERIAL_STATE),
//!     ..ChannelConfig::default()
//! };
//! dma.configure(3, &config)?;
//! dma.start(3)?;
//! ```
//!
//! Transports are shared between drivers and interrupt handlers, so every operation takes `&self`
//! and implementations keep their mutable state behind a critical section. Drivers hold a transport
//! by value: use a cheap handle type, or a `&'static` reference where the transport implements the
//! trait for one (as [`dmamux::DmaMux`] does).
//!
//! [`dmamux::DmaMux`] is a transport that routes peripheral requests onto the channels of one or
//! more downstream transports.

use core::cell::Cell;

use critical_section::Mutex;

pub mod dmamux;

/// Errors reported by a DMA transport
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub enum Error {
    /// Channel number out of range for this transport
    InvalidChannel,
    /// Request line out of range for this transport
    InvalidRequest,
    /// The channel is running and cannot be reconfigured
    Busy,
    /// The controller reported a bus or configuration error during the transfer
    Transfer,
}

/// The TransferDirection represents the available options for transfer types
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransferDirection {
    MemoryToMemory,
    #[default]
    MemoryToPeripheral,
    PeripheralToMemory,
}

/// Channel arbitration priority
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Priority {
    #[default]
    Low = 0,
    Medium = 1,
    High = 2,
    VeryHigh = 3,
}

/// Width of one transferred element
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DataSize {
    #[default]
    Byte = 1,
    HalfWord = 2,
    Word = 4,
}

/// Source or destination of a block transfer
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Endpoint {
    pub address: usize,
    /// Advance the address after every element
    pub increment: bool,
}

impl Endpoint {
    /// A memory buffer walked element by element
    pub const fn incremented(address: usize) -> Self {
        Endpoint {
            address,
            increment: true,
        }
    }

    /// A peripheral data register, or a single scratch word
    pub const fn fixed(address: usize) -> Self {
        Endpoint {
            address,
            increment: false,
        }
    }
}

/// Completion notification from a transport.
///
/// `on_transfer` runs in the transport's interrupt context. `result` is `Ok` when the block
/// completed and `Err` when the controller aborted it.
pub trait DmaCallback: Sync {
    fn on_transfer(&self, channel: u32, result: Result<(), Error>);
}

/// Side of a peripheral that owns one channel per direction
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Stream {
    Tx,
    Rx,
}

/// Completion notification for a peripheral with a transmit and a receive channel
pub trait StreamCallback: Sync {
    fn on_stream(&self, stream: Stream, result: Result<(), Error>);
}

/// Callback of one [`Stream`], handed to the transport in place of its owner.
///
/// Channels behind different transports can share a number, so the stream a completion belongs
/// to is fixed by the link it arrives through.
pub struct StreamLink {
    stream: Stream,
    owner: Mutex<Cell<Option<&'static dyn StreamCallback>>>,
}

impl StreamLink {
    pub const fn new(stream: Stream) -> Self {
        StreamLink {
            stream,
            owner: Mutex::new(Cell::new(None)),
        }
    }

    pub fn stream(&self) -> Stream {
        self.stream
    }

    /// Route the completions of this link to `owner`
    pub fn attach(&self, owner: &'static dyn StreamCallback) {
        critical_section::with(|cs| self.owner.borrow(cs).set(Some(owner)));
    }
}

impl DmaCallback for StreamLink {
    fn on_transfer(&self, channel: u32, result: Result<(), Error>) {
        match critical_section::with(|cs| self.owner.borrow(cs).get()) {
            Some(owner) => owner.on_stream(self.stream, result),
            None => warn!("DMA completion on channel {} with no owner", channel),
        }
    }
}

/// Description of one single-block transfer
#[derive(Clone, Copy, Default)]
pub struct ChannelConfig {
    pub direction: TransferDirection,
    /// Peripheral request line (mux input) that paces the transfer
    pub request: u32,
    pub priority: Priority,
    pub data_size: DataSize,
    pub source: Endpoint,
    pub destination: Endpoint,
    /// Number of elements in the block
    pub block_size: usize,
    pub callback: Option<&'static dyn DmaCallback>,
}

impl core::fmt::Debug for ChannelConfig {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ChannelConfig")
            .field("direction", &self.direction)
            .field("request", &self.request)
            .field("priority", &self.priority)
            .field("data_size", &self.data_size)
            .field("source", &self.source)
            .field("destination", &self.destination)
            .field("block_size", &self.block_size)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

/// Snapshot of a channel
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Status {
    pub busy: bool,
    /// Elements not yet transferred in the current block
    pub pending_length: usize,
    pub direction: TransferDirection,
}

/// A channel based block-transfer service
pub trait DmaTransport {
    /// Program `channel` for the transfer described by `config`. The channel is left stopped.
    fn configure(&self, channel: u32, config: &ChannelConfig) -> Result<(), Error>;

    /// Reprogram addresses and size of a configured channel, keeping the rest of its setup
    fn reload(
        &self,
        channel: u32,
        source: usize,
        destination: usize,
        size: usize,
    ) -> Result<(), Error>;

    fn start(&self, channel: u32) -> Result<(), Error>;

    fn stop(&self, channel: u32) -> Result<(), Error>;

    fn status(&self, channel: u32) -> Result<Status, Error>;
}

/// Placeholder transport for drivers used without DMA channels
#[derive(Copy, Clone, Debug)]
pub enum NoDma {}

impl DmaTransport for NoDma {
    fn configure(&self, _channel: u32, _config: &ChannelConfig) -> Result<(), Error> {
        match *self {}
    }

    fn reload(
        &self,
        _channel: u32,
        _source: usize,
        _destination: usize,
        _size: usize,
    ) -> Result<(), Error> {
        match *self {}
    }

    fn start(&self, _channel: u32) -> Result<(), Error> {
        match *self {}
    }

    fn stop(&self, _channel: u32) -> Result<(), Error> {
        match *self {}
    }

    fn status(&self, _channel: u32) -> Result<Status, Error> {
        match *self {}
    }
}

/// One channel of a transport, bound to the request line of a peripheral
#[derive(Clone, Copy, Debug)]
pub struct Channel<T> {
    pub dma: T,
    pub channel: u32,
    pub request: u32,
    pub priority: Priority,
}

impl<T> Channel<T> {
    pub const fn new(dma: T, channel: u32, request: u32) -> Self {
        Channel {
            dma,
            channel,
            request,
            priority: Priority::Low,
        }
    }

    pub const fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}

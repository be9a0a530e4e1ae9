//! Serial communication using the USART peripherals
//!
//! The driver has two faces. [`Serial`] is the owned handle that programs the frame format and
//! exposes the peripheral as a blocking byte stream through the embedded-io traits:
//! [`Read`][io::Read], [`ReadReady`][io::ReadReady], [`Write`][io::Write], and
//! [`WriteReady`][io::WriteReady] are implemented.
//!
//! [`Shared`] holds the state the interrupt handlers work on. Through it the peripheral also runs
//! asynchronously: transmit and receive blocks are moved by DMA, and progress is reported to an
//! [`EventHandler`].
//!
//! Frames are always 8 data bits. With parity enabled the word length is raised to 9 bits so that
//! the parity bit does not eat into the data.
//!
//! # Usage
//!
//! ## Initialization
//!
//! ```ignore
//! static USART0: Shared<Mmio, DmaHandle> = Shared::with_dma(
//!     unsafe { Mmio::new(0x4001_3800) },
//!     Channel::new(DMA, 3, 42),
//!     Channel::new(DMA, 4, 41),
//! );
//!
//! #[interrupt]
//! fn USART0() {
//!     USART0.on_interrupt();
//! }
//!
//! let serial = Serial::new(&USART0, 108.MHz(), Config::new(115_200.bps()).parity_even())?;
//! ```
//!
//! ## Blocking operation
//!
//! ```ignore
//! use embedded_io::{Read, Write};
//!
//! let bytes_written = serial.write(&[0x00, 0x11, 0x22]).unwrap();
//! let buf = &mut [0u8; 3];
//! let bytes_read = serial.read(buf).unwrap();
//! ```
//!
//! ## Asynchronous operation
//!
//! ```ignore
//! USART0.set_handler(&APP);
//! USART0.rx_enable(RX_BUF.take().unwrap(), Some(100.micros()))?;
//! USART0.tx(b"hello", None)?;
//! ```
//!
//! Received data is announced with [`Event::RxRdy`] once the line goes idle, or when the buffer
//! is full. A full buffer also raises [`Event::RxBufRequest`]; answer it with
//! [`Shared::rx_buf_rsp`] to keep receiving.
//!
//! [io::Read]: https://docs.rs/embedded-io/latest/embedded_io/trait.Read.html
//! [io::ReadReady]: https://docs.rs/embedded-io/latest/embedded_io/trait.ReadReady.html
//! [io::Write]: https://docs.rs/embedded-io/latest/embedded_io/trait.Write.html
//! [io::WriteReady]: https://docs.rs/embedded-io/latest/embedded_io/trait.WriteReady.html

use core::fmt::Display;

use embedded_io::{Error as IoError, ErrorKind as IoErrorKind};

use crate::time::MicroSeconds;

pub mod config;
mod usart;

pub use config::Config;
pub use usart::{Serial, Shared};

/// Serial error
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub enum Error {
    /// Framing error
    Framing,
    /// Noise error
    Noise,
    /// RX buffer overrun
    Overrun,
    /// Parity check error
    Parity,
    /// Empty buffer, or a baud rate of zero
    InvalidInput,
    /// A transfer of the same direction is already running
    Busy,
    /// Reception is not enabled
    NotEnabled,
    /// The peripheral clock cannot produce the baud rate, or the instance has no DMA channels
    NotSupported,
}

impl Error {
    /// Negative error number for callers that speak errno
    pub const fn errno(self) -> i32 {
        match self {
            Error::Framing | Error::Noise | Error::Overrun | Error::Parity => -5,
            Error::InvalidInput => -22,
            Error::Busy => -16,
            Error::NotEnabled => -14,
            Error::NotSupported => -134,
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl core::error::Error for Error {}

impl IoError for Error {
    fn kind(&self) -> IoErrorKind {
        match self {
            Error::InvalidInput => IoErrorKind::InvalidInput,
            Error::NotSupported => IoErrorKind::Unsupported,
            _ => IoErrorKind::Other,
        }
    }
}

impl From<crate::dma::Error> for Error {
    fn from(error: crate::dma::Error) -> Self {
        match error {
            crate::dma::Error::InvalidChannel | crate::dma::Error::InvalidRequest => {
                Error::InvalidInput
            }
            _ => Error::Busy,
        }
    }
}

bitmask! {
    /// Receive errors latched by the peripheral
    pub struct ErrorFlags: u8 {
        const OVERRUN = 1 << 0;
        const PARITY = 1 << 1;
        const FRAMING = 1 << 2;
    }
}

/// Interrupt sources of the byte level interface
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Interrupt {
    /// Transmission complete
    Tx,
    /// Receive buffer not empty
    Rx,
    /// Idle line detected
    Idle,
    /// Overrun, noise, framing and parity errors
    Error,
}

/// Timers the asynchronous interface asks the application to run
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Timeout {
    /// Expiry calls [`Shared::on_tx_timeout`]
    Tx,
    /// Expiry calls [`Shared::on_rx_timeout`]
    Rx,
}

/// Progress of the asynchronous interface
#[derive(Debug, PartialEq, Eq)]
pub enum Event<'a> {
    /// The whole transmit buffer was sent
    TxDone { len: usize },
    /// Transmission stopped early, after `sent` bytes
    TxAborted { sent: usize },
    /// `data` arrived at `offset` in the current receive buffer
    RxRdy { offset: usize, len: usize, data: &'a [u8] },
    /// The receive buffer is full. Provide the next one with [`Shared::rx_buf_rsp`].
    RxBufRequest,
    /// The driver no longer uses this receive buffer
    RxBufReleased(&'static mut [u8]),
    /// Reception stopped
    RxDisabled,
}

/// Receiver of asynchronous events.
///
/// All methods run in interrupt context, outside of the driver's critical sections, so they may
/// call back into [`Shared`].
pub trait EventHandler: Sync {
    fn on_event(&self, event: Event<'_>);

    /// Start, or restart, the `timeout` timer
    fn arm_timeout(&self, timeout: Timeout, duration: MicroSeconds) {
        let _ = (timeout, duration);
    }

    fn cancel_timeout(&self, timeout: Timeout) {
        let _ = timeout;
    }

    /// Interrupt not consumed by the asynchronous interface, for interrupt driven byte transfers
    fn on_interrupt(&self) {}
}

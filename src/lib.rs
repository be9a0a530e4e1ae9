//! Peripheral drivers for GD32 microcontrollers
//!
//! - [`i2c`]: I2C bus controller for the legacy and the ADD register sets, with interrupt and
//!   DMA driven transfers
//! - [`serial`]: USART byte stream and DMA driven asynchronous transfers
//! - [`display`]: TFT-LCD interface scanning a single layer out of a RAM framebuffer
//! - [`dma`]: the transport interface both drivers move data through, and the DMAMUX request
//!   router
//!
//! Drivers reach their peripheral through [`reg::Registers`] and their DMA channels through
//! [`dma::DmaTransport`], so they run unchanged against the register bank of any instance.

#![cfg_attr(not(test), no_std)]
#![cfg_attr(docsrs, feature(doc_cfg))]

#[macro_use]
mod macros;

pub mod display;
pub mod dma;
pub mod i2c;
pub mod reg;
pub mod serial;
pub mod sync;
pub mod time;

mod sealed {
    pub trait Sealed {}
}

pub(crate) use sealed::Sealed;

//! DMA request multiplexer (DMAMUX)
//!
//! The DMAMUX routes peripheral DMA requests onto the channels of the two DMA controllers. It
//! does not move data itself: it acts as a [`DmaTransport`] proxy that writes the request id of a
//! mux channel and forwards every other operation to the controller channel behind it.
//!
//! | Mux channel | Controller channel |
//! |-------------|--------------------|
//! | 0 ..= 6     | DMA0 channel 0 ..= 6 |
//! | 7 ..= 11    | DMA1 channel 0 ..= 4 |
//!
//! Completion callbacks coming back from a controller are translated to the mux channel number
//! before reaching the callback registered by the peripheral driver.
//!
//! ```ignore
//! static DMAMUX: DmaMux<Mmio, Dma> = DmaMux::new(
//!     unsafe { Mmio::new(DMAMUX_BASE) },
//!     [dma0, dma1],
//!     REQUEST_COUNT,
//! );
//!
//! DMAMUX.init();
//! let tx = Channel::new(&DMAMUX, 3, I2C3_TX_REQUEST);
//! ```

use core::cell::Cell;

use critical_section::Mutex;

use super::{ChannelConfig, DmaCallback, DmaTransport, Error, Status};
use crate::reg::Registers;

/// Channels of DMA0 reachable through the mux
pub const DMA0_CHANNELS: u32 = 7;
/// Channels of DMA1 reachable through the mux
pub const DMA1_CHANNELS: u32 = 5;
pub const CHANNEL_COUNT: u32 = DMA0_CHANNELS + DMA1_CHANNELS;

/// Channel x configuration register, at `x * 4`
const CHXCFG_STRIDE: usize = 0x04;
const CHXCFG_MUXID: u32 = 0xFF;
/// Interrupt flag register
const INTF: usize = 0x80;
/// Interrupt flag clear register
const INTC: usize = 0x84;

/// Per mux channel callback trampoline handed to the controllers
struct Slot {
    channel: u32,
    user: Mutex<Cell<Option<&'static dyn DmaCallback>>>,
}

impl Slot {
    const fn new(channel: u32) -> Self {
        Slot {
            channel,
            user: Mutex::new(Cell::new(None)),
        }
    }
}

impl DmaCallback for Slot {
    fn on_transfer(&self, channel: u32, result: Result<(), Error>) {
        let user = critical_section::with(|cs| self.user.borrow(cs).get());
        match user {
            Some(callback) => callback.on_transfer(self.channel, result),
            None => {
                warn!(
                    "DMAMUX: unexpected callback from controller channel {} (mux channel {})",
                    channel,
                    self.channel
                );
            }
        }
    }
}

/// DMAMUX driver, generic over its register bank and the controller transport
pub struct DmaMux<R, D> {
    regs: R,
    controllers: [D; 2],
    request_count: u32,
    slots: [Slot; CHANNEL_COUNT as usize],
}

impl<R, D> DmaMux<R, D> {
    /// `controllers` are DMA0 and DMA1, in that order. `request_count` is the highest valid
    /// request id.
    pub const fn new(regs: R, controllers: [D; 2], request_count: u32) -> Self {
        DmaMux {
            regs,
            controllers,
            request_count,
            slots: [
                Slot::new(0),
                Slot::new(1),
                Slot::new(2),
                Slot::new(3),
                Slot::new(4),
                Slot::new(5),
                Slot::new(6),
                Slot::new(7),
                Slot::new(8),
                Slot::new(9),
                Slot::new(10),
                Slot::new(11),
            ],
        }
    }

    /// Controller and controller channel behind a mux channel
    fn route(&self, channel: u32) -> Result<(&D, u32), Error> {
        if channel < DMA0_CHANNELS {
            Ok((&self.controllers[0], channel))
        } else if channel < CHANNEL_COUNT {
            Ok((&self.controllers[1], channel - DMA0_CHANNELS))
        } else {
            Err(Error::InvalidChannel)
        }
    }

    /// Returns true if `channel` is one of the channels allowed by the bit mask `filter`
    pub fn channel_filter(&self, channel: u32, filter: u32) -> bool {
        channel < CHANNEL_COUNT && filter & (1 << channel) != 0
    }
}

impl<R: Registers, D> DmaMux<R, D> {
    /// Put every mux channel in its reset state and clear all pending flags
    pub fn init(&self) {
        for channel in 0..CHANNEL_COUNT as usize {
            self.regs.write(channel * CHXCFG_STRIDE, 0);
        }
        self.regs.write(INTC, 0xFFFF_FFFF);
        interrupt_clear_clock_sync_delay!(self.regs, INTF);

        info!("DMAMUX initialized with {} channels", CHANNEL_COUNT);
    }

    fn set_request(&self, channel: u32, request: u32) {
        self.regs
            .modify(channel as usize * CHXCFG_STRIDE, |r| {
                (r & !CHXCFG_MUXID) | (request & CHXCFG_MUXID)
            });
        debug!("DMAMUX ch{}: request id {}", channel, request);
    }

    /// Request id currently routed to `channel`
    pub fn request(&self, channel: u32) -> Result<u32, Error> {
        self.route(channel)?;
        Ok(self.regs.read(channel as usize * CHXCFG_STRIDE) & CHXCFG_MUXID)
    }

    /// Raw interrupt flags (synchronisation overrun and request generator events)
    pub fn interrupt_flags(&self) -> u32 {
        self.regs.read(INTF)
    }
}

impl<R: Registers, D: DmaTransport> DmaTransport for &'static DmaMux<R, D> {
    fn configure(&self, channel: u32, config: &ChannelConfig) -> Result<(), Error> {
        let (dma, dma_channel) = self.route(channel).inspect_err(|_| {
            error!(
                "DMAMUX channel {} out of range (max {})",
                channel,
                CHANNEL_COUNT - 1
            );
        })?;

        if config.request > self.request_count {
            error!(
                "DMAMUX request id {} out of range (max {})",
                config.request,
                self.request_count
            );
            return Err(Error::InvalidRequest);
        }

        let this: &'static DmaMux<R, D> = *self;
        let slot = &this.slots[channel as usize];
        critical_section::with(|cs| slot.user.borrow(cs).set(config.callback));

        let forwarded = ChannelConfig {
            callback: Some(slot),
            ..*config
        };
        dma.configure(dma_channel, &forwarded).inspect_err(|_e| {
            error!(
                "DMAMUX: failed to configure controller channel {}",
                dma_channel
            );
        })?;

        self.set_request(channel, config.request);
        Ok(())
    }

    fn reload(
        &self,
        channel: u32,
        source: usize,
        destination: usize,
        size: usize,
    ) -> Result<(), Error> {
        let (dma, dma_channel) = self.route(channel)?;
        dma.reload(dma_channel, source, destination, size)
    }

    fn start(&self, channel: u32) -> Result<(), Error> {
        let (dma, dma_channel) = self.route(channel)?;
        debug!("DMAMUX ch{} start -> controller ch{}", channel, dma_channel);
        dma.start(dma_channel)
    }

    fn stop(&self, channel: u32) -> Result<(), Error> {
        let (dma, dma_channel) = self.route(channel)?;
        dma.stop(dma_channel)
    }

    fn status(&self, channel: u32) -> Result<Status, Error> {
        let (dma, dma_channel) = self.route(channel)?;
        dma.status(dma_channel)
    }
}

use super::{AddressMode, Speed};
use crate::time::MilliSeconds;

/// A structure for specifying the I2C controller configuration
///
/// This structure uses the builder pattern to generate the configuration:
///
/// ```ignore
/// let config = Config::new(Speed::Fast).dma_threshold(32);
/// ```
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub(crate) speed: Speed,
    /// Addressing mode of every target on the bus. Single messages can still ask for 10-bit
    /// addressing with [`Flags::ADDR_10`](super::Flags::ADDR_10).
    pub(crate) address_mode: AddressMode,
    /// Smallest sub-transfer, in bytes, moved with DMA
    pub(crate) dma_threshold: usize,
    /// Budget for a DMA sub-transfer before it is retried without DMA
    pub(crate) dma_timeout: MilliSeconds,
}

impl Config {
    /// Create a default configuration for the given bus speed: 7-bit addressing, DMA for
    /// sub-transfers of 16 bytes and more, 1 second DMA timeout.
    pub const fn new(speed: Speed) -> Self {
        Config {
            speed,
            address_mode: AddressMode::SevenBit,
            dma_threshold: 16,
            dma_timeout: MilliSeconds::millis(1000),
        }
    }

    pub const fn speed(mut self, speed: Speed) -> Self {
        self.speed = speed;
        self
    }

    pub const fn address_mode(mut self, address_mode: AddressMode) -> Self {
        self.address_mode = address_mode;
        self
    }

    pub const fn dma_threshold(mut self, bytes: usize) -> Self {
        self.dma_threshold = bytes;
        self
    }

    pub const fn dma_timeout(mut self, timeout: MilliSeconds) -> Self {
        self.dma_timeout = timeout;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::new(Speed::Standard)
    }
}

impl From<Speed> for Config {
    fn from(speed: Speed) -> Self {
        Config::new(speed)
    }
}

/// A structure for specifying the I2C Target configuration
///
/// A controller with a registered target configuration puts its own address back after every
/// controller transfer:
///
/// ```ignore
/// i2c.register_target(TargetConfig::new(0x10));
/// ```
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TargetConfig {
    /// Address mode of the MCU acting as a target
    pub(crate) own_address_mode: AddressMode,
    /// Target address for MCU
    pub(crate) own_address: u16,
}

impl TargetConfig {
    /// Create a configuration with the address of the MCU. The address should be specified
    /// unshifted. 7-bit addressing mode is used by default.
    pub const fn new(own_address: u16) -> Self {
        TargetConfig {
            own_address_mode: AddressMode::SevenBit,
            own_address,
        }
    }

    /// Set the addressing mode for the own address
    pub const fn own_address_mode(mut self, address_mode: AddressMode) -> Self {
        self.own_address_mode = address_mode;
        self
    }

    pub(crate) const fn ten_bit(&self) -> bool {
        matches!(self.own_address_mode, AddressMode::TenBit)
    }
}

use crate::time::Hertz;

/// The parity bits appended to each serial data word
///
/// When enabled parity bits will be automatically added by hardware on transmit, and automatically
/// checked by hardware on receive. For example, `read()` would return
/// [`Error::Parity`](super::Error::Parity).
///
/// Note that parity bits are included in the serial word length, so if parity is used word length
/// will be set to 9.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Parity {
    ParityNone,
    ParityEven,
    ParityOdd,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StopBits {
    #[doc = "1 stop bit"]
    Stop1,
    #[doc = "0.5 stop bits"]
    Stop0p5,
    #[doc = "2 stop bits"]
    Stop2,
    #[doc = "1.5 stop bits"]
    Stop1p5,
}

/// A structure for specifying the USART configuration
///
/// This structure uses the builder pattern to generate the configuration:
///
/// ```ignore
/// let config = Config::new(9_600.bps()).parity_odd();
/// ```
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    pub baudrate: Hertz,
    pub parity: Parity,
    pub stop_bits: StopBits,
}

impl Config {
    /// Create a default configuration for the USART interface
    ///
    /// * 8 bits, 1 stop bit, no parity (8N1)
    pub const fn new(baudrate: Hertz) -> Self {
        Config {
            baudrate,
            parity: Parity::ParityNone,
            stop_bits: StopBits::Stop1,
        }
    }

    pub const fn baudrate(mut self, baudrate: Hertz) -> Self {
        self.baudrate = baudrate;
        self
    }

    pub const fn parity_none(mut self) -> Self {
        self.parity = Parity::ParityNone;
        self
    }

    /// Enables Even Parity
    pub const fn parity_even(mut self) -> Self {
        self.parity = Parity::ParityEven;
        self
    }

    /// Enables Odd Parity
    pub const fn parity_odd(mut self) -> Self {
        self.parity = Parity::ParityOdd;
        self
    }

    /// Specify the number of stop bits
    pub const fn stop_bits(mut self, stop_bits: StopBits) -> Self {
        self.stop_bits = stop_bits;
        self
    }
}

impl Default for Config {
    fn default() -> Config {
        Self::new(Hertz::from_raw(115_200)) // 115k2 baud
    }
}

impl From<Hertz> for Config {
    fn from(baudrate: Hertz) -> Config {
        Self::new(baudrate)
    }
}

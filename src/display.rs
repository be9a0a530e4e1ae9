//! Display controllers
//!
//! [`tli::Tli`] drives the TFT-LCD interface: a single layer scanned out of a framebuffer in
//! RAM. Pixel clock, pins and the panel power rail are board concerns and are set up before the
//! driver is created.
//!
//! # Usage
//!
//! ```ignore
//! static mut FRAME: [u8; 480 * 272 * 2] = [0; 480 * 272 * 2];
//!
//! let config = Config::new(480, 272)
//!     .sync(41, 10)
//!     .back_porch(2, 2)
//!     .front_porch(2, 2)
//!     .pixel_format(PixelFormat::Rgb565);
//! let mut tli = Tli::new(unsafe { Mmio::new(0x4001_6800) }, config, unsafe { &mut FRAME })?
//!     .with_backlight(backlight_pin)?;
//!
//! tli.write(0, 0, &BufferDescriptor::new(16, 16), &sprite)?;
//! tli.blanking_off()?;
//! ```

pub mod tli;

pub use tli::{Config, Tli};

/// Display error
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub enum Error {
    /// Area outside the panel, or a source buffer too short for its descriptor
    InvalidInput,
    /// Operation or pixel format the controller does not offer
    NotSupported,
    /// The framebuffer is too small for the panel in the requested pixel format
    NoMemory,
    /// The backlight pin could not be driven
    Backlight,
}

impl Error {
    /// Negative error number for callers that speak errno
    pub const fn errno(self) -> i32 {
        match self {
            Error::InvalidInput => -22,
            Error::NotSupported => -134,
            Error::NoMemory => -12,
            Error::Backlight => -5,
        }
    }
}

/// Pixel layout of framebuffer data
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PixelFormat {
    Argb8888,
    Rgb888,
    Rgb565,
    Bgr565,
    /// 8-bit luminance
    L8,
}

impl PixelFormat {
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Argb8888 => 4,
            PixelFormat::Rgb888 => 3,
            PixelFormat::Rgb565 | PixelFormat::Bgr565 => 2,
            PixelFormat::L8 => 1,
        }
    }

    pub const fn bit(self) -> PixelFormats {
        match self {
            PixelFormat::Argb8888 => PixelFormats::ARGB_8888,
            PixelFormat::Rgb888 => PixelFormats::RGB_888,
            PixelFormat::Rgb565 => PixelFormats::RGB_565,
            PixelFormat::Bgr565 => PixelFormats::BGR_565,
            PixelFormat::L8 => PixelFormats::L_8,
        }
    }
}

bitmask! {
    /// Set of pixel formats
    pub struct PixelFormats: u8 {
        const ARGB_8888 = 1 << 0;
        const RGB_888 = 1 << 1;
        const RGB_565 = 1 << 2;
        const BGR_565 = 1 << 3;
        const L_8 = 1 << 4;
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Orientation {
    Normal,
    Rotated90,
    Rotated180,
    Rotated270,
}

/// What a display offers, and how it is set up right now
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Capabilities {
    pub x_resolution: u16,
    pub y_resolution: u16,
    pub supported_pixel_formats: PixelFormats,
    pub current_pixel_format: PixelFormat,
    pub current_orientation: Orientation,
}

/// Shape of a rectangle of pixels in a source buffer
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BufferDescriptor {
    pub width: u16,
    pub height: u16,
    /// Pixels from the start of one row to the start of the next
    pub pitch: u16,
}

impl BufferDescriptor {
    /// Tightly packed rows
    pub const fn new(width: u16, height: u16) -> Self {
        BufferDescriptor {
            width,
            height,
            pitch: width,
        }
    }

    pub const fn pitch(mut self, pitch: u16) -> Self {
        self.pitch = pitch;
        self
    }
}

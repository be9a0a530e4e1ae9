//! TFT-LCD interface
//!
//! Layer 0 covers the whole active area and scans out of the framebuffer handed to
//! [`Tli::new`]. Writes copy into the framebuffer and schedule a shadow register reload for the
//! next vertical blanking period, so a frame is never shown half updated.

use core::convert::Infallible;

use embedded_hal::digital::{ErrorType, OutputPin};

use super::{BufferDescriptor, Capabilities, Error, Orientation, PixelFormat, PixelFormats};
use crate::reg::Registers;

mod regs;
use regs::*;

/// Formats layer 0 is driven with
const SUPPORTED: PixelFormats = PixelFormats::ARGB_8888
    .union(PixelFormats::RGB_888)
    .union(PixelFormats::RGB_565);

/// Panel geometry and initial pixel format
///
/// Horizontal values are in pixel clocks, vertical values in lines.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    pub width: u16,
    pub height: u16,
    pub hsync: u16,
    pub vsync: u16,
    pub hbp: u16,
    pub vbp: u16,
    pub hfp: u16,
    pub vfp: u16,
    pub pixel_format: PixelFormat,
}

impl Config {
    /// One clock sync pulses, no porches, RGB565
    pub const fn new(width: u16, height: u16) -> Self {
        Config {
            width,
            height,
            hsync: 1,
            vsync: 1,
            hbp: 0,
            vbp: 0,
            hfp: 0,
            vfp: 0,
            pixel_format: PixelFormat::Rgb565,
        }
    }

    pub const fn sync(mut self, hsync: u16, vsync: u16) -> Self {
        self.hsync = hsync;
        self.vsync = vsync;
        self
    }

    pub const fn back_porch(mut self, hbp: u16, vbp: u16) -> Self {
        self.hbp = hbp;
        self.vbp = vbp;
        self
    }

    pub const fn front_porch(mut self, hfp: u16, vfp: u16) -> Self {
        self.hfp = hfp;
        self.vfp = vfp;
        self
    }

    pub const fn pixel_format(mut self, pixel_format: PixelFormat) -> Self {
        self.pixel_format = pixel_format;
        self
    }

    /// First active column and line
    fn active_start(&self) -> (u32, u32) {
        (
            u32::from(self.hsync) + u32::from(self.hbp),
            u32::from(self.vsync) + u32::from(self.vbp),
        )
    }

    fn validate(&self) -> Result<(), Error> {
        if self.width == 0 || self.height == 0 || self.hsync == 0 || self.vsync == 0 {
            return Err(Error::InvalidInput);
        }
        let (h, v) = self.active_start();
        let htotal = h + u32::from(self.width) + u32::from(self.hfp) - 1;
        let vtotal = v + u32::from(self.height) + u32::from(self.vfp) - 1;
        if htotal > HORIZONTAL_MAX || vtotal > VERTICAL_MAX {
            return Err(Error::InvalidInput);
        }
        Ok(())
    }
}

/// Backlight placeholder for panels without a controllable backlight
pub struct NoBacklight;

impl ErrorType for NoBacklight {
    type Error = Infallible;
}

impl OutputPin for NoBacklight {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// TLI driver
pub struct Tli<R, P = NoBacklight> {
    regs: R,
    config: Config,
    frame: &'static mut [u8],
    format: PixelFormat,
    backlight: P,
}

impl<R: Registers> Tli<R> {
    /// Program the panel timing and layer 0, and start scanning out `frame`.
    ///
    /// `frame` must hold a full panel in the configured pixel format.
    pub fn new(regs: R, config: Config, frame: &'static mut [u8]) -> Result<Self, Error> {
        config.validate()?;
        let format = config.pixel_format;
        if !SUPPORTED.contains(format.bit()) {
            error!("TLI pixel format {:?} not supported", format);
            return Err(Error::NotSupported);
        }

        let tli = Tli {
            regs,
            config,
            frame,
            format,
            backlight: NoBacklight,
        };
        tli.check_fits(format)?;
        tli.init_timing();
        tli.init_layer(format);
        tli.regs.set_bits(L0CTL, LXCTL_LEN);
        tli.regs.write(RL, RL_FBR);
        tli.regs.set_bits(CTL, CTL_TLIEN);

        info!(
            "TLI initialized: {}x{}, {:?}",
            config.width,
            config.height,
            format
        );
        Ok(tli)
    }
}

impl<R: Registers, P: OutputPin> Tli<R, P> {
    /// Switch the backlight to `pin`, which starts out off
    pub fn with_backlight<Q: OutputPin>(self, mut pin: Q) -> Result<Tli<R, Q>, Error> {
        pin.set_low().map_err(|_| Error::Backlight)?;
        Ok(Tli {
            regs: self.regs,
            config: self.config,
            frame: self.frame,
            format: self.format,
            backlight: pin,
        })
    }

    /// Copy a rectangle of `buf` to the panel at `x`, `y`
    pub fn write(
        &mut self,
        x: u16,
        y: u16,
        desc: &BufferDescriptor,
        buf: &[u8],
    ) -> Result<(), Error> {
        let (x, y) = (usize::from(x), usize::from(y));
        let (width, height, pitch) = (
            usize::from(desc.width),
            usize::from(desc.height),
            usize::from(desc.pitch),
        );
        let panel_width = usize::from(self.config.width);
        if x + width > panel_width || y + height > usize::from(self.config.height) {
            error!("TLI write coordinates out of bounds");
            return Err(Error::InvalidInput);
        }
        if width == 0 || height == 0 {
            return Ok(());
        }

        let px = self.format.bytes_per_pixel();
        if pitch < width || buf.len() < ((height - 1) * pitch + width) * px {
            return Err(Error::InvalidInput);
        }
        for row in 0..height {
            let dst = ((y + row) * panel_width + x) * px;
            let src = row * pitch * px;
            self.frame[dst..dst + width * px].copy_from_slice(&buf[src..src + width * px]);
        }

        self.regs.write(RL, RL_FBR);
        Ok(())
    }

    /// Pixels are never read back from the panel
    pub fn read(
        &mut self,
        _x: u16,
        _y: u16,
        _desc: &BufferDescriptor,
        _buf: &mut [u8],
    ) -> Result<(), Error> {
        error!("TLI read not supported");
        Err(Error::NotSupported)
    }

    /// The framebuffer being scanned out. Changes show after the next reload.
    pub fn framebuffer(&mut self) -> &mut [u8] {
        &mut self.frame[..]
    }

    /// Turn the backlight on and start the controller
    pub fn blanking_off(&mut self) -> Result<(), Error> {
        self.backlight.set_high().map_err(|_| {
            error!("TLI backlight on failed");
            Error::Backlight
        })?;
        self.regs.set_bits(CTL, CTL_TLIEN);
        Ok(())
    }

    /// Stop the controller and turn the backlight off
    pub fn blanking_on(&mut self) -> Result<(), Error> {
        self.regs.clear_bits(CTL, CTL_TLIEN);
        self.backlight.set_low().map_err(|_| {
            error!("TLI backlight off failed");
            Error::Backlight
        })
    }

    pub fn set_brightness(&mut self, _brightness: u8) -> Result<(), Error> {
        warn!("TLI brightness not supported");
        Err(Error::NotSupported)
    }

    pub fn set_contrast(&mut self, _contrast: u8) -> Result<(), Error> {
        warn!("TLI contrast not supported");
        Err(Error::NotSupported)
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            x_resolution: self.config.width,
            y_resolution: self.config.height,
            supported_pixel_formats: SUPPORTED,
            current_pixel_format: self.format,
            current_orientation: Orientation::Normal,
        }
    }

    /// Reprogram layer 0 for `format`. The framebuffer content is not converted.
    pub fn set_pixel_format(&mut self, format: PixelFormat) -> Result<(), Error> {
        if !SUPPORTED.contains(format.bit()) {
            error!("TLI pixel format {:?} not supported", format);
            return Err(Error::NotSupported);
        }
        self.check_fits(format)?;

        self.regs.clear_bits(L0CTL, LXCTL_LEN);
        self.regs.write(RL, RL_RQR);
        self.init_layer(format);
        self.regs.set_bits(L0CTL, LXCTL_LEN);
        self.regs.write(RL, RL_FBR);
        self.format = format;

        info!("TLI pixel format changed to {:?}", format);
        Ok(())
    }

    pub fn set_orientation(&mut self, orientation: Orientation) -> Result<(), Error> {
        if orientation != Orientation::Normal {
            error!("TLI only supports normal orientation");
            return Err(Error::NotSupported);
        }
        Ok(())
    }

    /// Stop the controller and give back its parts
    pub fn free(self) -> (R, &'static mut [u8], P) {
        self.regs.clear_bits(L0CTL, LXCTL_LEN);
        self.regs.clear_bits(CTL, CTL_TLIEN);
        (self.regs, self.frame, self.backlight)
    }

    fn check_fits(&self, format: PixelFormat) -> Result<(), Error> {
        let required = usize::from(self.config.width)
            * usize::from(self.config.height)
            * format.bytes_per_pixel();
        if required > self.frame.len() {
            error!(
                "TLI format {:?} needs {} framebuffer bytes, {} available",
                format,
                required,
                self.frame.len()
            );
            return Err(Error::NoMemory);
        }
        Ok(())
    }

    fn init_timing(&self) {
        let c = &self.config;
        let (h, v) = c.active_start();
        let (width, height) = (u32::from(c.width), u32::from(c.height));
        let pack = |h: u32, v: u32| (h << HORIZONTAL_SHIFT) | v;

        // Sync signals and the pixel clock keep their default polarity
        self.regs.write(CTL, 0);
        self.regs
            .write(SPSZ, pack(u32::from(c.hsync) - 1, u32::from(c.vsync) - 1));
        self.regs.write(BPSZ, pack(h - 1, v - 1));
        self.regs.write(ASZ, pack(h + width - 1, v + height - 1));
        self.regs.write(
            TSZ,
            pack(
                h + width + u32::from(c.hfp) - 1,
                v + height + u32::from(c.vfp) - 1,
            ),
        );
        self.regs.write(BGC, 0x00FF_FFFF);
    }

    fn init_layer(&self, format: PixelFormat) {
        let c = &self.config;
        let (h, v) = c.active_start();
        let (width, height) = (u32::from(c.width), u32::from(c.height));
        let ppf = match format {
            PixelFormat::Argb8888 => PPF_ARGB8888,
            PixelFormat::Rgb888 => PPF_RGB888,
            _ => PPF_RGB565,
        };
        let line = width * format.bytes_per_pixel() as u32;

        self.regs.write(L0HPOS, h | ((h + width - 1) << 16));
        self.regs.write(L0VPOS, v | ((v + height - 1) << 16));
        self.regs.write(L0PPF, ppf);
        self.regs.write(L0SA, 0xFF);
        // Opaque white is never shown: the default color has zero alpha
        self.regs.write(L0DC, 0x00FF_FFFF);
        self.regs.write(L0BLEND, BLEND_ACF1_PASA | BLEND_ACF2_PASA);
        self.regs.write(L0FBADDR, self.frame.as_ptr() as usize as u32);
        // The line length counts three bytes of bus latency on top of the row
        self.regs
            .write(L0FLLEN, (line + 3) | (line << FLLEN_STDOFF_SHIFT));
        self.regs.write(L0FTLN, height);
    }
}

#[cfg(test)]
mod tests {
    use std::boxed::Box;
    use std::vec;
    use std::vec::Vec;

    use super::regs::*;
    use super::*;
    use crate::reg::fake::FakeRegs;

    const BASE: usize = 0x4001_6800;

    fn frame(len: usize) -> &'static mut [u8] {
        Box::leak(vec![0u8; len].into_boxed_slice())
    }

    /// 4x3 panel with 2 clock sync pulses and porches of 1
    fn panel() -> Config {
        Config::new(4, 3)
            .sync(2, 2)
            .back_porch(1, 1)
            .front_porch(1, 1)
    }

    fn tli(config: Config, len: usize) -> Tli<FakeRegs> {
        Tli::new(FakeRegs::new(BASE, 0x100), config, frame(len)).unwrap()
    }

    /// Records the levels a pin was driven to
    #[derive(Default)]
    struct Pin {
        levels: Vec<bool>,
        broken: bool,
    }

    #[derive(Debug)]
    struct PinError;

    impl embedded_hal::digital::Error for PinError {
        fn kind(&self) -> embedded_hal::digital::ErrorKind {
            embedded_hal::digital::ErrorKind::Other
        }
    }

    impl ErrorType for Pin {
        type Error = PinError;
    }

    impl OutputPin for Pin {
        fn set_low(&mut self) -> Result<(), PinError> {
            self.levels.push(false);
            if self.broken {
                return Err(PinError);
            }
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), PinError> {
            self.levels.push(true);
            if self.broken {
                return Err(PinError);
            }
            Ok(())
        }
    }

    #[test]
    fn init_programs_timing_and_layer() {
        let tli = tli(panel(), 4 * 3 * 2);
        let regs = &tli.regs;

        assert_eq!(regs.get(SPSZ), (1 << 16) | 1);
        assert_eq!(regs.get(BPSZ), (2 << 16) | 2);
        assert_eq!(regs.get(ASZ), (6 << 16) | 5);
        assert_eq!(regs.get(TSZ), (7 << 16) | 6);
        assert_eq!(regs.get(BGC), 0x00FF_FFFF);

        assert_eq!(regs.get(L0HPOS), 3 | (6 << 16));
        assert_eq!(regs.get(L0VPOS), 3 | (5 << 16));
        assert_eq!(regs.get(L0PPF), PPF_RGB565);
        assert_eq!(regs.get(L0BLEND), BLEND_ACF1_PASA | BLEND_ACF2_PASA);
        assert_eq!(regs.get(L0FBADDR), tli.frame.as_ptr() as usize as u32);
        assert_eq!(regs.get(L0FLLEN), 11 | (8 << 16));
        assert_eq!(regs.get(L0FTLN), 3);

        assert_eq!(regs.get(L0CTL), LXCTL_LEN);
        assert_eq!(regs.get(RL), RL_FBR);
        assert_eq!(regs.get(CTL), CTL_TLIEN);
    }

    #[test]
    fn bad_geometry_and_short_framebuffer_are_refused() {
        let regs = || FakeRegs::new(BASE, 0x100);
        assert_eq!(
            Tli::new(regs(), Config::new(0, 3), frame(16)).err(),
            Some(Error::InvalidInput)
        );
        assert_eq!(
            Tli::new(regs(), panel().sync(0, 2), frame(24)).err(),
            Some(Error::InvalidInput)
        );
        assert_eq!(
            Tli::new(regs(), Config::new(4096, 1), frame(8192)).err(),
            Some(Error::InvalidInput)
        );
        assert_eq!(
            Tli::new(regs(), panel(), frame(23)).err(),
            Some(Error::NoMemory)
        );
        assert_eq!(
            Tli::new(regs(), panel().pixel_format(PixelFormat::L8), frame(12)).err(),
            Some(Error::NotSupported)
        );
    }

    #[test]
    fn write_copies_rows_and_reloads_in_blanking() {
        let mut tli = tli(panel(), 4 * 3 * 2);
        tli.regs.set(RL, 0);

        // 2x2 rectangle out of a source with a pitch of 3 pixels
        let src: Vec<u8> = (1..=10).collect();
        tli.write(1, 1, &BufferDescriptor::new(2, 2).pitch(3), &src)
            .unwrap();

        let mut expected = vec![0u8; 24];
        expected[10..14].copy_from_slice(&[1, 2, 3, 4]);
        expected[18..22].copy_from_slice(&[7, 8, 9, 10]);
        assert_eq!(tli.framebuffer(), &expected[..]);
        assert_eq!(tli.regs.get(RL), RL_FBR);
    }

    #[test]
    fn write_outside_panel_is_refused() {
        let mut tli = tli(panel(), 4 * 3 * 2);
        let src = [0xAAu8; 32];
        assert_eq!(
            tli.write(3, 0, &BufferDescriptor::new(2, 1), &src),
            Err(Error::InvalidInput)
        );
        assert_eq!(
            tli.write(0, 2, &BufferDescriptor::new(1, 2), &src),
            Err(Error::InvalidInput)
        );
        // Source shorter than the descriptor says
        assert_eq!(
            tli.write(0, 0, &BufferDescriptor::new(4, 3), &src[..23]),
            Err(Error::InvalidInput)
        );
        assert!(tli.framebuffer().iter().all(|&b| b == 0));

        let mut out = [0u8; 8];
        assert_eq!(
            tli.read(0, 0, &BufferDescriptor::new(2, 2), &mut out),
            Err(Error::NotSupported)
        );
    }

    #[test]
    fn blanking_drives_backlight_and_enable() {
        let mut tli = tli(panel(), 24).with_backlight(Pin::default()).unwrap();
        assert_eq!(tli.backlight.levels, [false]);

        tli.blanking_on().unwrap();
        assert_eq!(tli.regs.get(CTL) & CTL_TLIEN, 0);
        tli.blanking_off().unwrap();
        assert_eq!(tli.regs.get(CTL) & CTL_TLIEN, CTL_TLIEN);
        assert_eq!(tli.backlight.levels, [false, false, true]);

        tli.backlight.broken = true;
        assert_eq!(tli.blanking_off(), Err(Error::Backlight));
        // The controller is stopped even when the backlight cannot be switched off
        assert_eq!(tli.blanking_on(), Err(Error::Backlight));
        assert_eq!(tli.regs.get(CTL) & CTL_TLIEN, 0);
    }

    #[test]
    fn pixel_format_switch_reprograms_layer() {
        let mut tli = tli(panel(), 4 * 3 * 3);
        assert_eq!(tli.set_pixel_format(PixelFormat::Argb8888), Err(Error::NoMemory));
        assert_eq!(tli.set_pixel_format(PixelFormat::Bgr565), Err(Error::NotSupported));
        assert_eq!(tli.capabilities().current_pixel_format, PixelFormat::Rgb565);

        tli.set_pixel_format(PixelFormat::Rgb888).unwrap();
        assert_eq!(tli.regs.get(L0PPF), PPF_RGB888);
        assert_eq!(tli.regs.get(L0FLLEN), 15 | (12 << 16));
        assert_eq!(tli.regs.get(L0CTL), LXCTL_LEN);
        assert_eq!(tli.regs.get(RL), RL_FBR);

        let caps = tli.capabilities();
        assert_eq!(caps.x_resolution, 4);
        assert_eq!(caps.y_resolution, 3);
        assert_eq!(caps.current_pixel_format, PixelFormat::Rgb888);
        assert_eq!(caps.current_orientation, Orientation::Normal);
        assert!(caps.supported_pixel_formats.contains(PixelFormats::ARGB_8888));
        assert!(!caps.supported_pixel_formats.contains(PixelFormats::L_8));

        // Rows are now three bytes a pixel
        tli.write(3, 2, &BufferDescriptor::new(1, 1), &[7, 8, 9]).unwrap();
        assert_eq!(&tli.framebuffer()[33..36], &[7, 8, 9]);
    }

    #[test]
    fn fixed_panel_settings() {
        let mut tli = tli(panel(), 24);
        assert_eq!(tli.set_orientation(Orientation::Normal), Ok(()));
        assert_eq!(tli.set_orientation(Orientation::Rotated90), Err(Error::NotSupported));
        assert_eq!(tli.set_brightness(10), Err(Error::NotSupported));
        assert_eq!(tli.set_contrast(10), Err(Error::NotSupported));
        assert_eq!(Error::NotSupported.errno(), -134);

        let (regs, frame, _) = tli.free();
        assert_eq!(regs.get(CTL) & CTL_TLIEN, 0);
        assert_eq!(frame.len(), 24);
    }
}

//! TLI register map, layer 0 only

/// Synchronous pulse size
pub const SPSZ: usize = 0x08;
/// Back-porch size
pub const BPSZ: usize = 0x0C;
/// Active size
pub const ASZ: usize = 0x10;
/// Total size
pub const TSZ: usize = 0x14;
pub const CTL: usize = 0x18;
/// Reload
pub const RL: usize = 0x24;
/// Background color
pub const BGC: usize = 0x2C;

pub const L0CTL: usize = 0x84;
pub const L0HPOS: usize = 0x88;
pub const L0VPOS: usize = 0x8C;
pub const L0PPF: usize = 0x94;
/// Specified alpha
pub const L0SA: usize = 0x98;
/// Default color
pub const L0DC: usize = 0x9C;
pub const L0BLEND: usize = 0xA0;
pub const L0FBADDR: usize = 0xAC;
/// Frame line length and stride offset
pub const L0FLLEN: usize = 0xB0;
/// Frame total line number
pub const L0FTLN: usize = 0xB4;

/// Horizontal fields of the size registers
pub const HORIZONTAL_SHIFT: u32 = 16;
pub const HORIZONTAL_MAX: u32 = 0xFFF;
pub const VERTICAL_MAX: u32 = 0x7FF;

pub const CTL_TLIEN: u32 = 1 << 0;

/// Reload the shadow registers now
pub const RL_RQR: u32 = 1 << 0;
/// Reload the shadow registers during the next vertical blanking
pub const RL_FBR: u32 = 1 << 1;

pub const LXCTL_LEN: u32 = 1 << 0;

pub const PPF_ARGB8888: u32 = 0b000;
pub const PPF_RGB888: u32 = 0b001;
pub const PPF_RGB565: u32 = 0b010;

/// Blend factors: specified alpha times pixel alpha
pub const BLEND_ACF1_PASA: u32 = 6 << 8;
pub const BLEND_ACF2_PASA: u32 = 7;

pub const FLLEN_STDOFF_SHIFT: u32 = 16;

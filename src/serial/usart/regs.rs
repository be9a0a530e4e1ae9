//! USART register map

pub const STAT: usize = 0x00;
pub const DATA: usize = 0x04;
pub const BAUD: usize = 0x08;
pub const CTL0: usize = 0x0C;
pub const CTL1: usize = 0x10;
pub const CTL2: usize = 0x14;

pub const STAT_PERR: u32 = 1 << 0;
pub const STAT_FERR: u32 = 1 << 1;
pub const STAT_NERR: u32 = 1 << 2;
pub const STAT_ORERR: u32 = 1 << 3;
pub const STAT_IDLEF: u32 = 1 << 4;
pub const STAT_RBNE: u32 = 1 << 5;
pub const STAT_TC: u32 = 1 << 6;
pub const STAT_TBE: u32 = 1 << 7;

pub const CTL0_REN: u32 = 1 << 2;
pub const CTL0_TEN: u32 = 1 << 3;
pub const CTL0_IDLEIE: u32 = 1 << 4;
pub const CTL0_RBNEIE: u32 = 1 << 5;
pub const CTL0_TCIE: u32 = 1 << 6;
pub const CTL0_PERRIE: u32 = 1 << 8;
/// Odd parity
pub const CTL0_PM: u32 = 1 << 9;
pub const CTL0_PCEN: u32 = 1 << 10;
/// 9 bit words
pub const CTL0_WL: u32 = 1 << 12;
pub const CTL0_UEN: u32 = 1 << 13;

pub const CTL1_STB_SHIFT: u32 = 12;
pub const CTL1_STB_MASK: u32 = 0b11 << CTL1_STB_SHIFT;

pub const CTL2_ERRIE: u32 = 1 << 0;
pub const CTL2_DENR: u32 = 1 << 6;
pub const CTL2_DENT: u32 = 1 << 7;

//! SCL timing derivation
//!
//! Both generations are clocked from the APB peripheral clock (at most 54 MHz). The legacy IP
//! divides it with a single clock control value and a duty cycle selection; the ADD IP uses a
//! prescaler plus explicit SCL high/low periods and data setup/hold delays.
//!
//! Both derivations round the SCL period up to whole clock cycles, so the bus never runs faster
//! than the requested speed class.

use super::{Error, Speed};

/// Highest supported peripheral clock, in MHz
pub const PCLK_MAX_MHZ: u32 = 54;

const NS_PER_S: u64 = 1_000_000_000;

/// Minimum peripheral clock for a speed class, in MHz
const fn pclk_min_mhz(speed: Speed) -> u32 {
    match speed {
        Speed::Standard => 2,
        Speed::Fast => 8,
        _ => 24,
    }
}

/// Check the peripheral clock against the bounds of `speed` and return the bus rate in Hz
fn check_clock(pclk: u32, speed: Speed) -> Result<u32, Error> {
    let rate = speed.bitrate().ok_or(Error::InvalidInput)?;
    let mhz = pclk / 1_000_000;
    if mhz > PCLK_MAX_MHZ {
        error!("I2C max clock freq {} MHz, current is {} MHz", PCLK_MAX_MHZ, mhz);
        return Err(Error::NotSupported);
    }
    if mhz < pclk_min_mhz(speed) {
        error!(
            "I2C min clock freq for {} Hz is {} MHz, current is {} MHz",
            rate,
            pclk_min_mhz(speed),
            mhz
        );
        return Err(Error::NotSupported);
    }
    Ok(rate)
}

/// Clock configuration of the legacy IP
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LegacyTiming {
    /// Peripheral clock in MHz, for the I2CCLK field
    pub pclk_mhz: u8,
    /// SCL clock control value
    pub clkc: u16,
    /// Fast mode (FAST bit) with a 16:9 low/high duty cycle (DTCY bit)
    pub fast: bool,
    /// Maximum rise time, in peripheral clock cycles plus one
    pub rise_time: u8,
    /// Fast mode plus drive (FMPEN)
    pub fast_plus: bool,
}

pub fn legacy_timing(pclk: u32, speed: Speed) -> Result<LegacyTiming, Error> {
    let rate = check_clock(pclk, speed)?;
    let mhz = pclk / 1_000_000;

    let timing = match speed {
        Speed::Standard => LegacyTiming {
            pclk_mhz: mhz as u8,
            // SCL low and high are both CLKC cycles
            clkc: pclk.div_ceil(2 * rate).max(4) as u16,
            fast: false,
            // 1000 ns maximum rise time
            rise_time: (mhz + 1) as u8,
            fast_plus: false,
        },
        // Low is 16 * CLKC, high is 9 * CLKC
        _ => LegacyTiming {
            pclk_mhz: mhz as u8,
            clkc: pclk.div_ceil(25 * rate).max(1) as u16,
            fast: true,
            rise_time: (if speed == Speed::Fast {
                mhz * 300 / 1000 + 1
            } else {
                mhz * 120 / 1000 + 1
            }) as u8,
            fast_plus: speed == Speed::FastPlus,
        },
    };
    Ok(timing)
}

/// Clock configuration of the ADD IP, in register units
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct AddTiming {
    pub psc: u8,
    pub scl_delay: u8,
    pub sda_delay: u8,
    pub sclh: u8,
    pub scll: u8,
}

impl AddTiming {
    /// Value of the TIMING register
    pub const fn bits(&self) -> u32 {
        (self.scll as u32)
            | (self.sclh as u32) << 8
            | (self.sda_delay as u32 & 0xF) << 16
            | (self.scl_delay as u32 & 0xF) << 20
            | (self.psc as u32 & 0xF) << 28
    }
}

pub fn add_timing(pclk: u32, speed: Speed) -> Result<AddTiming, Error> {
    let rate = check_clock(pclk, speed)?;

    // Aim for about 8 prescaled clocks per SCL period
    let psc = if pclk > 8 * rate {
        (pclk / (8 * rate) - 1).min(15)
    } else {
        0
    };
    let div = psc + 1;
    // Whole prescaled cycles covering at least `ns` nanoseconds
    let cycles = |ns: u32| (ns as u64 * pclk as u64).div_ceil(NS_PER_S * div as u64) as u32;
    let period = pclk.div_ceil(rate * div).clamp(4, 512);

    // I2C-bus minimum SCL low/high, maximum rise/fall and minimum data setup times in ns
    let (t_low, t_high, t_rise, t_fall, t_su_dat): (u32, u32, u32, u32, u32) = match speed {
        Speed::Standard => (4700, 4000, 1000, 300, 250),
        Speed::Fast => (1300, 600, 300, 300, 100),
        _ => (500, 260, 120, 120, 50),
    };
    let low_min = cycles(t_low);
    let high_min = cycles(t_high);

    let (low, high) = if speed == Speed::Standard {
        let high = high_min.max(period / 2);
        (low_min.max(period.saturating_sub(high)), high)
    } else {
        let low = low_min.max(period * 2 / 3);
        (low, high_min.max(period.saturating_sub(low)))
    };

    // tSCLDELY = (SCLDELY + 1) * tPSC >= tr + tSU;DAT
    let scl_delay = cycles(t_rise + t_su_dat).saturating_sub(1);

    // tSDADELY = SDADELY * tPSC >= tf - tAF(min) - 3 * tI2CCLK, with a 50 ns analog filter
    let t_sync_ns = 50 + (3 * NS_PER_S / pclk as u64) as u32;
    let sda_delay = cycles(t_fall.saturating_sub(t_sync_ns));

    Ok(AddTiming {
        psc: psc as u8,
        scl_delay: scl_delay.clamp(1, 15) as u8,
        sda_delay: sda_delay.clamp(1, 15) as u8,
        // SCL low/high last (SCLL + 1) and (SCLH + 1) prescaled cycles
        sclh: (high.clamp(2, 256) - 1) as u8,
        scll: (low.clamp(2, 256) - 1) as u8,
    })
}

//! Register access
//!
//! Drivers in this crate never touch memory directly. Every peripheral register is reached through
//! the [`Registers`] trait using its byte offset from the peripheral base address. [`Mmio`] is the
//! implementation used on hardware.

/// 32-bit register bank of one peripheral instance
pub trait Registers {
    /// Read the register at `offset`
    fn read(&self, offset: usize) -> u32;

    /// Write `value` to the register at `offset`
    fn write(&self, offset: usize, value: u32);

    /// Bus address of the register at `offset`, as seen by a DMA controller
    fn address(&self, offset: usize) -> usize;

    /// Read-modify-write the register at `offset`
    #[inline(always)]
    fn modify<F: FnOnce(u32) -> u32>(&self, offset: usize, f: F) {
        let value = self.read(offset);
        self.write(offset, f(value));
    }

    #[inline(always)]
    fn set_bits(&self, offset: usize, mask: u32) {
        self.modify(offset, |r| r | mask);
    }

    #[inline(always)]
    fn clear_bits(&self, offset: usize, mask: u32) {
        self.modify(offset, |r| r & !mask);
    }

    #[inline(always)]
    fn is_set(&self, offset: usize, mask: u32) -> bool {
        self.read(offset) & mask != 0
    }
}

/// Memory mapped register bank at a fixed base address
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Mmio {
    base: usize,
}

impl Mmio {
    /// Create a register bank for the peripheral at `base`.
    ///
    /// # Safety
    ///
    /// `base` must be the base address of a peripheral whose register layout matches the driver
    /// that uses this bank, and no other driver may own the same peripheral.
    pub const unsafe fn new(base: usize) -> Self {
        Mmio { base }
    }

    pub const fn base(&self) -> usize {
        self.base
    }
}

impl Registers for Mmio {
    #[inline(always)]
    fn read(&self, offset: usize) -> u32 {
        // SAFETY: the constructor guarantees that base + offset is a valid peripheral register
        unsafe { core::ptr::read_volatile((self.base + offset) as *const u32) }
    }

    #[inline(always)]
    fn write(&self, offset: usize, value: u32) {
        // SAFETY: as above
        unsafe { core::ptr::write_volatile((self.base + offset) as *mut u32, value) }
    }

    fn address(&self, offset: usize) -> usize {
        self.base + offset
    }
}

impl<R: Registers + ?Sized> Registers for &R {
    fn read(&self, offset: usize) -> u32 {
        (**self).read(offset)
    }

    fn write(&self, offset: usize, value: u32) {
        (**self).write(offset, value)
    }

    fn address(&self, offset: usize) -> usize {
        (**self).address(offset)
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::vec::Vec;

    use super::Registers;

    /// In-memory register file. Plain storage: no write-1-to-clear or read side effects.
    pub struct FakeRegs {
        base: usize,
        regs: Vec<AtomicU32>,
    }

    impl FakeRegs {
        pub fn new(base: usize, size: usize) -> Self {
            FakeRegs {
                base,
                regs: (0..size / 4).map(|_| AtomicU32::new(0)).collect(),
            }
        }

        pub fn get(&self, offset: usize) -> u32 {
            self.read(offset)
        }

        pub fn set(&self, offset: usize, value: u32) {
            self.write(offset, value)
        }
    }

    impl Registers for FakeRegs {
        fn read(&self, offset: usize) -> u32 {
            self.regs[offset / 4].load(Ordering::SeqCst)
        }

        fn write(&self, offset: usize, value: u32) {
            self.regs[offset / 4].store(value, Ordering::SeqCst)
        }

        fn address(&self, offset: usize) -> usize {
            self.base + offset
        }
    }
}

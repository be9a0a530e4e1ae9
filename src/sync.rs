//! Interrupt to thread handoff

use core::cell::Cell;

use critical_section::{CriticalSection, Mutex};
use embedded_hal::delay::DelayNs;

use crate::time::MilliSeconds;

/// Granularity of [`Completion::wait`]
const WAIT_TICK_US: u32 = 10;

/// The wait budget elapsed before the event was signalled
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Timeout;

/// Single-slot completion event.
///
/// Interrupt handlers are the only producers ([`Completion::signal`]); the thread that started the
/// operation is the only consumer ([`Completion::wait`]). Signalling an already signalled event
/// is idempotent, and a successful wait consumes the event.
pub struct Completion {
    done: Mutex<Cell<bool>>,
}

impl Completion {
    pub const fn new() -> Self {
        Completion {
            done: Mutex::new(Cell::new(false)),
        }
    }

    /// Mark the event as complete. Called from interrupt context.
    pub fn signal(&self, cs: CriticalSection<'_>) {
        self.done.borrow(cs).set(true);
    }

    /// Discard a stale signal before starting a new operation
    pub fn reset(&self) {
        critical_section::with(|cs| self.done.borrow(cs).set(false));
    }

    fn take(&self) -> bool {
        critical_section::with(|cs| self.done.borrow(cs).replace(false))
    }

    /// Block until the event is signalled, or until `timeout` has elapsed.
    ///
    /// `None` waits forever.
    pub fn wait<D: DelayNs>(
        &self,
        delay: &mut D,
        timeout: Option<MilliSeconds>,
    ) -> Result<(), Timeout> {
        let budget_us = timeout.map(|t| t.ticks() as u64 * 1_000);
        let mut waited_us = 0u64;

        loop {
            if self.take() {
                return Ok(());
            }
            if let Some(budget) = budget_us {
                if waited_us >= budget {
                    return Err(Timeout);
                }
            }
            delay.delay_us(WAIT_TICK_US);
            waited_us += WAIT_TICK_US as u64;
        }
    }
}

impl Default for Completion {
    fn default() -> Self {
        Self::new()
    }
}

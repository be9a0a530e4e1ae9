//! Transfer messages
//!
//! A [`Message`] is one directional data unit of a transaction. The engine consumes messages in
//! place: once a message has been moved over the bus its [`Message::remaining`] count drops to
//! zero, and a message that was only partly moved before an error keeps a non-zero count.

use core::marker::PhantomData;
use core::ptr::NonNull;

use super::{Direction, Error};

bitmask! {
    /// Per-message flags
    pub struct Flags: u8 {
        /// Controller to target. This is the absence of [`Flags::READ`].
        const WRITE = 0;
        /// Target to controller
        const READ = 1 << 0;
        /// Generate a STOP condition after this message
        const STOP = 1 << 1;
        /// Generate a (repeated) START condition before this message
        const RESTART = 1 << 2;
        /// Address the target with a 10-bit address
        const ADDR_10 = 1 << 3;
    }
}

/// One directional data transfer unit
pub struct Message<'a> {
    buf: NonNull<u8>,
    len: usize,
    flags: Flags,
    _buf: PhantomData<&'a mut [u8]>,
}

// SAFETY: a message is a re-borrow of a byte slice, which is Send
unsafe impl Send for Message<'_> {}

impl<'a> Message<'a> {
    /// Transmit `buf` to the target
    pub fn write(buf: &'a [u8]) -> Self {
        Message {
            buf: NonNull::from(buf).cast(),
            len: buf.len(),
            flags: Flags::WRITE,
            _buf: PhantomData,
        }
    }

    /// Fill `buf` with data from the target
    pub fn read(buf: &'a mut [u8]) -> Self {
        let len = buf.len();
        Message {
            buf: NonNull::from(buf).cast(),
            len,
            flags: Flags::READ,
            _buf: PhantomData,
        }
    }

    pub const fn with_stop(mut self) -> Self {
        self.flags = self.flags.union(Flags::STOP);
        self
    }

    pub const fn with_restart(mut self) -> Self {
        self.flags = self.flags.union(Flags::RESTART);
        self
    }

    pub const fn with_ten_bit_address(mut self) -> Self {
        self.flags = self.flags.union(Flags::ADDR_10);
        self
    }

    pub fn flags(&self) -> Flags {
        self.flags
    }

    pub fn direction(&self) -> Direction {
        if self.flags.contains(Flags::READ) {
            Direction::Read
        } else {
            Direction::Write
        }
    }

    /// Bytes of this message not yet moved over the bus
    pub fn remaining(&self) -> usize {
        self.len
    }

    pub(crate) fn insert_flags(&mut self, flags: Flags) {
        self.flags.insert(flags);
    }

    /// Address of the next byte, for DMA descriptors
    pub(crate) fn address(&self) -> usize {
        self.buf.as_ptr() as usize
    }

    /// Store a received byte and advance the cursor. Returns `false` if the message is full.
    pub(crate) fn push(&mut self, byte: u8) -> bool {
        if self.len == 0 {
            return false;
        }
        // SAFETY: `len` bytes starting at `buf` belong to the mutably borrowed read buffer
        unsafe {
            self.buf.as_ptr().write(byte);
            self.buf = self.buf.add(1);
        }
        self.len -= 1;
        true
    }

    /// Take the next byte to transmit and advance the cursor
    pub(crate) fn pop(&mut self) -> Option<u8> {
        if self.len == 0 {
            return None;
        }
        // SAFETY: `len` bytes starting at `buf` belong to the borrowed buffer
        let byte = unsafe {
            let byte = self.buf.as_ptr().read();
            self.buf = self.buf.add(1);
            byte
        };
        self.len -= 1;
        Some(byte)
    }

    /// Mark every remaining byte as moved, after a DMA block covered them
    pub(crate) fn consume(&mut self) {
        // SAFETY: stays within, or one past the end of, the borrowed buffer
        self.buf = unsafe { self.buf.add(self.len) };
        self.len = 0;
    }
}

impl core::fmt::Debug for Message<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Message")
            .field("len", &self.len)
            .field("flags", &self.flags)
            .finish()
    }
}

/// Check a transaction before any hardware is touched, then normalise its flags: the first
/// message always starts with a (repeated) START and the last one always ends with STOP.
pub(crate) fn validate(msgs: &mut [Message<'_>]) -> Result<(), Error> {
    let count = msgs.len();
    for (i, msg) in msgs.iter().enumerate() {
        if msg.len == 0 {
            return Err(Error::InvalidInput);
        }
        if i + 1 < count && msg.flags.contains(Flags::STOP) {
            return Err(Error::InvalidInput);
        }
        if i > 0
            && msg.direction() != msgs[i - 1].direction()
            && !msg.flags.contains(Flags::RESTART)
        {
            return Err(Error::InvalidInput);
        }
    }

    if let Some(first) = msgs.first_mut() {
        first.insert_flags(Flags::RESTART);
    }
    if let Some(last) = msgs.last_mut() {
        last.insert_flags(Flags::STOP);
    }
    Ok(())
}

/// End (exclusive) of the group of same-direction messages starting at `start`
pub(crate) fn group_end(msgs: &[Message<'_>], start: usize) -> usize {
    let direction = msgs[start].direction();
    msgs[start..]
        .iter()
        .position(|m| m.direction() != direction)
        .map_or(msgs.len(), |n| start + n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_advances_through_buffer() {
        let mut buf = [0u8; 3];
        let mut msg = Message::read(&mut buf);
        assert!(msg.push(1));
        assert!(msg.push(2));
        assert_eq!(msg.remaining(), 1);
        assert!(msg.push(3));
        assert!(!msg.push(4));
        drop(msg);
        assert_eq!(buf, [1, 2, 3]);

        let data = [9, 8];
        let mut msg = Message::write(&data);
        assert_eq!(msg.pop(), Some(9));
        assert_eq!(msg.pop(), Some(8));
        assert_eq!(msg.pop(), None);
    }

    #[test]
    fn stop_only_on_last_message() {
        let (a, b) = ([1u8], [2u8]);
        let mut msgs = [Message::write(&a).with_stop(), Message::write(&b)];
        assert_eq!(validate(&mut msgs), Err(Error::InvalidInput));
    }

    #[test]
    fn direction_change_needs_restart() {
        let a = [1u8];
        let mut b = [0u8; 2];
        let mut msgs = [Message::write(&a), Message::read(&mut b)];
        assert_eq!(validate(&mut msgs), Err(Error::InvalidInput));
        // Nothing was normalised on failure
        assert!(!msgs[0].flags().contains(Flags::RESTART));
        assert!(!msgs[1].flags().contains(Flags::STOP));

        let mut b = [0u8; 2];
        let mut msgs = [Message::write(&a), Message::read(&mut b).with_restart()];
        assert_eq!(validate(&mut msgs), Ok(()));
        assert!(msgs[0].flags().contains(Flags::RESTART));
        assert!(msgs[1].flags().contains(Flags::STOP));
    }

    #[test]
    fn empty_message_rejected() {
        let a: [u8; 0] = [];
        let mut msgs = [Message::write(&a)];
        assert_eq!(validate(&mut msgs), Err(Error::InvalidInput));
    }

    #[test]
    fn groups_split_on_direction() {
        let (a, b) = ([0u8; 5], [0u8; 3]);
        let mut c = [0u8; 4];
        let msgs = [
            Message::write(&a),
            Message::write(&b),
            Message::read(&mut c).with_restart(),
        ];
        assert_eq!(group_end(&msgs, 0), 2);
        assert_eq!(group_end(&msgs, 2), 3);
    }
}

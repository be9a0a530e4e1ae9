use embedded_hal::delay::DelayNs;
use embedded_hal::i2c;

use super::*;
use crate::dma::DmaTransport;

/// Most operations one embedded-hal transaction may carry
const MAX_OPERATIONS: usize = 16;

impl i2c::Error for Error {
    fn kind(&self) -> i2c::ErrorKind {
        match self {
            Error::Busy => i2c::ErrorKind::Bus,
            _ => i2c::ErrorKind::Other,
        }
    }
}

impl<IP, T, D> i2c::ErrorType for I2c<IP, T, D> {
    type Error = Error;
}

trait OperationExt<'a> {
    fn direction(&self) -> Direction;
    fn message(&'a mut self) -> Message<'a>;
}

impl<'a> OperationExt<'a> for i2c::Operation<'_> {
    fn direction(&self) -> Direction {
        match self {
            Self::Read(_) => Direction::Read,
            Self::Write(_) => Direction::Write,
        }
    }

    fn message(&'a mut self) -> Message<'a> {
        match self {
            Self::Read(buffer) => Message::read(buffer),
            Self::Write(data) => Message::write(data),
        }
    }
}

impl<IP, T, D> I2c<IP, T, D>
where
    IP: Ip + Sync,
    T: DmaTransport + Sync,
    D: DelayNs,
{
    fn transact(
        &mut self,
        address: u16,
        address_mode: AddressMode,
        operations: &mut [i2c::Operation<'_>],
    ) -> Result<(), Error> {
        if operations.len() > MAX_OPERATIONS {
            return Err(Error::InvalidInput);
        }

        let count = operations.len();
        let mut msgs: [Message<'_>; MAX_OPERATIONS] = core::array::from_fn(|_| Message::write(&[]));
        let mut previous = None;
        for (msg, op) in msgs.iter_mut().zip(operations.iter_mut()) {
            let direction = op.direction();
            let mut m = op.message();
            // Adjacent operations of the same type are sent without a repeated START
            if previous.is_some_and(|d| d != direction) {
                m = m.with_restart();
            }
            if address_mode == AddressMode::TenBit {
                m = m.with_ten_bit_address();
            }
            *msg = m;
            previous = Some(direction);
        }

        self.transfer(&mut msgs[..count], address)
    }
}

impl<IP, T, D> i2c::I2c<i2c::SevenBitAddress> for I2c<IP, T, D>
where
    IP: Ip + Sync,
    T: DmaTransport + Sync,
    D: DelayNs,
{
    fn transaction(
        &mut self,
        address: i2c::SevenBitAddress,
        operations: &mut [i2c::Operation<'_>],
    ) -> Result<(), Self::Error> {
        self.transact(address as u16, AddressMode::SevenBit, operations)
    }
}

impl<IP, T, D> i2c::I2c<i2c::TenBitAddress> for I2c<IP, T, D>
where
    IP: Ip + Sync,
    T: DmaTransport + Sync,
    D: DelayNs,
{
    fn transaction(
        &mut self,
        address: i2c::TenBitAddress,
        operations: &mut [i2c::Operation<'_>],
    ) -> Result<(), Self::Error> {
        self.transact(address, AddressMode::TenBit, operations)
    }
}

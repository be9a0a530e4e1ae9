//! DMA data phase
//!
//! The active direction's channel moves the message buffers of a group one message per block.
//! The channel of the other direction is pointed at a per-controller scratch word so that a
//! stray request can never reach caller memory. While the channel runs the cursor is the block
//! index kept by the state machine. Once woken, the thread consumes the messages whose block
//! completed, so after an abort the message in flight still reports its full count.

use embedded_hal::delay::DelayNs;

use super::fsm::{DmaStep, Group};
use super::ip::{Events, Generation, Interrupts, Ip};
use super::{wait_idle, Direction, Error, I2c, Message, Shared, IDLE_POLLS};
use crate::dma::{
    Channel, ChannelConfig, DataSize, DmaTransport, Endpoint, Stream, StreamCallback,
    TransferDirection,
};
use crate::sync::Timeout;

type Channels<T> = (Channel<T>, Channel<T>);

impl<IP, T> Shared<IP, T>
where
    IP: Ip + Sync,
    T: DmaTransport + Sync,
{
    fn channel_config(
        &'static self,
        channel: &Channel<T>,
        stream: Stream,
        direction: TransferDirection,
        source: Endpoint,
        destination: Endpoint,
        block_size: usize,
    ) -> ChannelConfig {
        ChannelConfig {
            direction,
            request: channel.request,
            priority: channel.priority,
            data_size: DataSize::Byte,
            source,
            destination,
            block_size,
            callback: Some(&self.links[stream as usize]),
        }
    }

    /// Program both channels for `group` and start the active one
    fn setup_dma(
        &'static self,
        (tx, rx): &Channels<T>,
        msgs: &[Message<'_>],
        group: &Group,
    ) -> Result<(), crate::dma::Error> {
        let first = &msgs[group.start];
        let memory = Endpoint::incremented(first.address());
        let tdata = Endpoint::fixed(self.ip.data_register(Direction::Write));
        let rdata = Endpoint::fixed(self.ip.data_register(Direction::Read));
        let tx_scratch = Endpoint::fixed(self.scratch[0].as_ptr() as usize);
        let rx_scratch = Endpoint::fixed(self.scratch[1].as_ptr() as usize);

        let (active, active_config, inactive, inactive_config) = match group.direction {
            Direction::Write => (
                tx,
                self.channel_config(
                    tx,
                    Stream::Tx,
                    TransferDirection::MemoryToPeripheral,
                    memory,
                    tdata,
                    first.remaining(),
                ),
                rx,
                self.channel_config(
                    rx,
                    Stream::Rx,
                    TransferDirection::PeripheralToMemory,
                    rdata,
                    rx_scratch,
                    1,
                ),
            ),
            Direction::Read => (
                rx,
                self.channel_config(
                    rx,
                    Stream::Rx,
                    TransferDirection::PeripheralToMemory,
                    rdata,
                    memory,
                    first.remaining(),
                ),
                tx,
                self.channel_config(
                    tx,
                    Stream::Tx,
                    TransferDirection::MemoryToPeripheral,
                    tx_scratch,
                    tdata,
                    1,
                ),
            ),
        };

        for link in &self.links {
            link.attach(self);
        }
        inactive.dma.configure(inactive.channel, &inactive_config)?;
        active.dma.configure(active.channel, &active_config)?;
        active.dma.start(active.channel)
    }

    fn teardown_dma(&self, (tx, rx): &Channels<T>) {
        self.ip.set_dma_requests(None);
        self.ip.set_dma_last(false);
        if self.ip.generation() == Generation::Add {
            self.ip
                .clear_events(Events::STOP_DETECTED | Events::NACK);
        }
        for channel in [tx, rx] {
            if let Err(e) = channel.dma.stop(channel.channel) {
                warn!("I2C DMA channel {} stop failed: {:?}", channel.channel, e);
            }
        }
    }
}

impl<IP, T> StreamCallback for Shared<IP, T>
where
    IP: Ip + Sync,
    T: DmaTransport + Sync,
{
    fn on_stream(&self, stream: Stream, result: Result<(), crate::dma::Error>) {
        let Some((tx, rx)) = self.dma.as_ref() else {
            return;
        };
        let direction = match stream {
            Stream::Tx => Direction::Write,
            Stream::Rx => Direction::Read,
        };

        critical_section::with(|cs| {
            let mut t = self.transfer.borrow_ref_mut(cs);
            match t.on_dma(&self.ip, direction, result) {
                DmaStep::Ignore | DmaStep::Wait => {}
                DmaStep::Done => self.done.signal(cs),
                DmaStep::Next { address, len } => {
                    let data = self.ip.data_register(direction);
                    let (active, source, destination) = match direction {
                        Direction::Write => (tx, address, data),
                        Direction::Read => (rx, data, address),
                    };
                    let restarted = active
                        .dma
                        .reload(active.channel, source, destination, len)
                        .and_then(|()| active.dma.start(active.channel));
                    if let Err(e) = restarted {
                        error!("I2C DMA reload failed: {:?}", e);
                        t.abort(&self.ip, super::ErrorFlags::BUS);
                        self.done.signal(cs);
                    }
                }
            }
        });
    }
}

impl<IP, T, D> I2c<IP, T, D>
where
    IP: Ip + Sync,
    T: DmaTransport + Sync,
    D: DelayNs,
{
    /// Move `group` with DMA. `None` means the DMA path gave up and the group has to be moved
    /// byte by byte from its first message.
    pub(super) fn dma_transfer(
        &mut self,
        channels: &'static Channels<T>,
        msgs: &mut [Message<'_>],
        group: &Group,
    ) -> Option<Result<(), Error>> {
        let shared = self.shared;

        if let Err(e) = shared.setup_dma(channels, msgs, group) {
            shared.teardown_dma(channels);
            warn!("I2C DMA setup failed ({:?}), falling back to PIO", e);
            return None;
        }
        if let Err(e) = self.begin(msgs, group, true) {
            shared.teardown_dma(channels);
            return Some(Err(e));
        }

        match shared.done.wait(&mut self.delay, Some(self.config.dma_timeout)) {
            Ok(()) => {
                shared.teardown_dma(channels);
                critical_section::with(|cs| {
                    shared
                        .transfer
                        .borrow_ref_mut(cs)
                        .consume_dma_blocks(group.start)
                });
                Some(self.end(group))
            }
            Err(Timeout) => {
                shared.ip.disable_interrupts(Interrupts::ALL);
                shared.teardown_dma(channels);
                critical_section::with(|cs| shared.transfer.borrow_ref_mut(cs).leave_dma());
                error!("I2C DMA timeout");
                warn!("I2C falling back to PIO");

                // The retry starts with a fresh START, on a bus left in an unknown state
                self.bus_held = false;
                if !wait_idle(&shared.ip, IDLE_POLLS) {
                    if let Err(e) = self.recover() {
                        return Some(Err(e));
                    }
                }
                None
            }
        }
    }
}

use crate::base::error::Result;
use crate::base::frame::{Frame, Reply, FRAME_BYTES};
use crate::base::traits::SpiBus;
use log::{error, trace};

/// Channel owning the bus handle and the chip-select discipline.
///
/// One channel is exclusively owned by one session. Its single operation
/// exchanges exactly one frame in each direction with chip-select held for
/// the whole 9-byte window, so the device never observes a partial frame.
///
/// # Examples
/// ```ignore
/// let mut channel = Channel::new(spidev);
/// let reply = channel.exchange(&Frame::new(cmds::COMMAND_READ, 0))?;
/// ```
#[derive(Debug)]
pub struct Channel<T: ?Sized> {
    bus: Box<T>,
}

impl<T: ?Sized> Channel<T>
where
    T: SpiBus,
{
    /// Creates a new `Channel` around a bus handle.
    pub fn new(bus: Box<T>) -> Channel<T> {
        trace!("Creating new Channel");
        Channel { bus }
    }

    /// Exchanges one frame atomically and returns the captured reply.
    ///
    /// Chip-select is asserted before the first byte and released after the
    /// last, on success and on error alike. The transfer itself is all-or-
    /// nothing: a driver failure surfaces as `Error::Io` and no further
    /// bytes are clocked.
    pub fn exchange(&mut self, frame: &Frame) -> Result<Reply> {
        let tx = frame.to_wire_bytes();
        let mut rx = [0u8; FRAME_BYTES];
        trace!("exchange: cmd={:02X}, word={:016X}", frame.cmd, frame.word);

        self.bus.set_select(true)?;
        let transferred = self.bus.transfer(&tx, &mut rx);
        let released = self.bus.set_select(false);
        if let Err(e) = transferred {
            error!("exchange: transfer failed: {}", e);
            return Err(e.into());
        }
        released?;

        let reply = Reply::from_wire_bytes(&rx);
        trace!(
            "exchange: status={:02X}, reply word={:016X}",
            reply.status.to_byte(),
            reply.word
        );
        Ok(reply)
    }
}

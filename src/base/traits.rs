use std::io;

/// Defines the behavior of a full-duplex bus with a chip-select line.
///
/// Implementations wrap the actual driver (a kernel spidev handle, a
/// bit-banged port, a simulator). The controller core only ever performs
/// whole-frame transfers between a single select/deselect pair.
pub trait SpiBus {
    /// Drives the chip-select line: `true` selects the device (line low),
    /// `false` releases it.
    ///
    /// # Arguments
    ///
    /// * `selected` - Whether the device should be selected after the call.
    fn set_select(&mut self, selected: bool) -> io::Result<()>;

    /// Clocks `tx` out MSB-first while capturing the same number of bytes
    /// into `rx`. Both slices have the same length; the transfer is a single
    /// uninterrupted byte window.
    ///
    /// # Arguments
    ///
    /// * `tx` - The bytes to transmit.
    /// * `rx` - The buffer receiving the simultaneously clocked-in bytes.
    fn transfer(&mut self, tx: &[u8], rx: &mut [u8]) -> io::Result<()>;
}

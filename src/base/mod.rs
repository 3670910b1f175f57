//! # Bus Driver Infrastructure
//!
//! Transport-level building blocks: the error type, the fixed-width frame
//! pair, the bus trait and the channel that exchanges one frame atomically.

mod channel;
mod error;
mod frame;
mod traits;

// Re-export common driver items.
pub use self::error::{Error, RejectKind, Result};
pub use self::frame::{Frame, Reply, Status, COMMAND_BYTES, FRAME_BYTES, WORD_BYTES};
pub use self::traits::SpiBus;
// Re-export the Channel struct for communication.
pub use self::channel::Channel;

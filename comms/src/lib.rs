//! Framed transport between the coordinator and the task broker.
//!
//! A frame is an 8 byte big endian body length followed by the body. `msg` defines the
//! bodies exchanged with the broker, `specs` the types they carry.

mod codec;
pub mod msg;
mod receiver;
mod sender;
pub mod specs;

use tokio::io::{AsyncRead, AsyncWrite};

pub use codec::{Deserialize, Serialize};
pub use receiver::FrameReceiver;
pub use sender::FrameSender;

type LenType = u64;
const LEN_TYPE_SIZE: usize = size_of::<LenType>();

/// Frames above this size are refused by both ends.
pub const MAX_FRAME_LEN: usize = 256 * 1024 * 1024;

/// Wraps a reader and a writer into the two ends of a framed channel.
///
/// # Arguments
/// * `rx` - Where inbound frames are read from.
/// * `tx` - Where outbound frames are written to.
pub fn channel<R, W>(rx: R, tx: W) -> (FrameReceiver<R>, FrameSender<W>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    (FrameReceiver::new(rx), FrameSender::new(tx))
}

//! Wire types shared by the host command server and the client.
//!
//! Frames are bare UTF-8 JSON objects with no length prefix and no
//! delimiter. A frame is complete once the accumulated bytes parse as one
//! JSON document; see [`codec`] for the decoding rules.

pub mod codec;
mod command;
mod envelope;

pub use codec::{FrameBuffer, FrameError, FrameStatus, encode, try_decode};
pub use command::{Command, Params};
pub use envelope::{DEFAULT_ERROR_MESSAGE, Envelope};

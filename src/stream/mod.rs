//! Streamed agent replies: line splitting, event decoding, and the send loop.

mod event;
mod lines;
mod processor;

pub use event::{MalformedEvent, StreamEvent, decode_line, format_inform};
pub use lines::LineBuffer;
pub use processor::{Outcome, StreamProcessor};

pub mod event;
pub mod frame;

pub use event::ParsedEvent;
pub use frame::{Frame, FrameDecoder, FrameError};

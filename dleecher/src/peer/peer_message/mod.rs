pub mod bitfield;
pub mod message;
pub mod request;

pub use bitfield::Bitfield;
pub use message::{Frame, FrameError, Message, MessageId};
pub use request::Request;

//! Data models for virtual office entities

mod message;
mod participant;
mod zone;

pub use message::*;
pub use participant::*;
pub use zone::*;

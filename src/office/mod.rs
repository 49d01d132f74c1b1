//! Proximity session components and the context that composes them.

pub mod calls;
pub mod chat;
pub mod events;
pub mod position;
pub mod proximity;
pub mod registry;
pub mod runtime;
pub mod session;
pub mod zones;

pub use events::SessionEvent;
pub use runtime::{SessionCommand, SessionHandle, SessionSnapshot};
pub use session::{Identity, OfficeSession};

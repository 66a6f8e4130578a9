//! Lifecycle events and the broadcast bus that carries them.
//!
//! Every execution attempt of a named interval publishes a fixed sequence of
//! [`Event`]s; subscribers observe them through [`Bus::subscribe`]. Event
//! names follow `"<taskName>.<EventKind>"`.

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};

//! Wire types shared by the Pulseboard hub and its subscribers.
//!
//! Everything that crosses the `/ws` connection is an [`Envelope`]. The
//! event type is an open string key; [`events`] lists the names the
//! dashboard producers emit today.

pub mod constants;
pub mod envelope;
pub mod events;

pub use envelope::Envelope;

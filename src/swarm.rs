//! Swarm host.
//!
//! [`Swarm`] owns the download coordinator and one uploader per connection,
//! dispatches decoded wire messages to them, enforces the ban list, tells
//! peers about completed pieces and schedules uploads round-robin under the
//! upload cap. Like the rest of the engine it does no I/O: the embedding
//! transport feeds messages in and collects [`Outbound`](crate::peer::Outbound)
//! actions with [`Swarm::poll_outbound`].

mod choker;
mod error;
mod host;

pub use choker::{Choker, PeerStats};
pub use error::SwarmError;
pub use host::Swarm;

#[cfg(test)]
mod tests;

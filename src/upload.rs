//! Upload engine.
//!
//! A [`PeerUploader`] per connection queues the peer's requests and serves
//! them from the piece store while the peer is unchoked. When we start as a
//! complete seed with super-seeding on, no bitfield is sent; the
//! [`SuperSeeder`] reveals pieces with HAVE one at a time so that each
//! piece reaches the swarm through as few uploads from us as possible.

mod super_seed;
mod uploader;

pub use super_seed::SuperSeeder;
pub use uploader::PeerUploader;

#[cfg(test)]
mod tests;

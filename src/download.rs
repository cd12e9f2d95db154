//! Download engine.
//!
//! One [`PeerDownloader`] per connection holds choke/interest state, the
//! peer's have-set and the request pipeline. The [`DownloadCoordinator`]
//! owns them all together with the piece store, the piece picker, the
//! [`BadDataGuard`] and the global [`RateBudget`].
//!
//! # Pipelining
//!
//! Each peer's backlog is `min(2 + 4 * rate / chunk_size, 2 * just_unchoked
//! + queue_limit)`; anything above 50 is scaled down. The queue limit comes
//! from the rate budget and is effectively unlimited without a download cap.
//!
//! # Endgame
//!
//! Once the store has no unreserved chunk left the coordinator requests
//! every outstanding chunk from every peer that has it, and cancels the
//! duplicates as chunks arrive.

mod budget;
mod coordinator;
mod downloader;
mod guard;

pub use budget::RateBudget;
pub use coordinator::{DownloadCoordinator, HelperMode};
pub use downloader::PeerDownloader;
pub use guard::{BadDataGuard, GuardAction, PerIpStats};

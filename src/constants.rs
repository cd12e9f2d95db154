//! Protocol constants and tuning parameters.
//!
//! Defaults for the peer engine follow BitTornado-family clients; the overlay
//! values follow the deployed gossip-cast protocol so that casts interoperate
//! with existing peers.

use std::time::Duration;

// ============================================================================
// Client identification
// ============================================================================

/// Client ID prefix for peer ID generation (Azureus-style)
pub const CLIENT_PREFIX: &[u8; 8] = b"-SC0001-";

// ============================================================================
// Wire protocol
// ============================================================================

/// Standard chunk (block) size requested from peers (16KB)
pub const CHUNK_SIZE: u32 = 16384;

/// Largest REQUEST we serve. Peers asking for more are closed.
pub const MAX_SLICE_LENGTH: u32 = 131072;

/// Extended message id carrying Merkle uncle hashes alongside chunk data.
pub const HASHPIECE_ID: u8 = 250;

/// Upper bound on a single framed wire message.
pub const MAX_MESSAGE_SIZE: usize = 16777216;

// ============================================================================
// Download engine
// ============================================================================

/// Window over which transfer rates are averaged
pub const MAX_RATE_PERIOD: Duration = Duration::from_secs(20);

/// Fudge applied to a fresh rate meter so the first samples don't spike
pub const RATE_FUDGE: Duration = Duration::from_secs(1);

/// A peer that sends no PIECE for this long while unchoked is snubbed
pub const SNUB_TIME: Duration = Duration::from_secs(30);

/// Pipelining above this many requests is scaled down
pub const BACKLOG_SOFT_CAP: usize = 50;

/// Factor applied to oversize backlogs
pub const BACKLOG_SCALE: f64 = 0.075;

/// Burst credit of the download budget, in seconds of `download_rate`
pub const RATE_BUDGET_BURST_SECS: f64 = 5.0;

/// Queue limit reported when no download cap is set
pub const UNLIMITED_QUEUE: usize = 1 << 30;

/// Disconnected seeds are forgotten after this long
pub const DISCONNECTED_SEED_EXPIRY: Duration = Duration::from_secs(60 * 60);

/// Interval of the downloader housekeeping tick
pub const DOWNLOAD_TICK_INTERVAL: Duration = Duration::from_secs(1);

// ============================================================================
// Upload engine
// ============================================================================

/// Regular unchoke decisions are revisited this often
pub const UNCHOKE_INTERVAL: Duration = Duration::from_secs(10);

/// The optimistic unchoke slot rotates this often
pub const OPTIMISTIC_UNCHOKE_INTERVAL: Duration = Duration::from_secs(30);

/// Upload slots, including the optimistic one
pub const MAX_UNCHOKED: usize = 4;

// ============================================================================
// Bad data policy
// ============================================================================

/// Once more IPs than this have sent bad data, kicks and bans halt for good
pub const MAX_BAD_DATA_IPS: usize = 10;

/// Kicks need at least this many downloads to absorb the loss
pub const MIN_DOWNLOADS_FOR_KICK: usize = 3;

/// Distinct bad pieces before an IP can be banned
pub const BAN_MIN_BAD_PIECES: usize = 3;

/// An IP is banned once bad pieces exceed good pieces divided by this
pub const BAN_GOOD_RATIO: usize = 30;

// ============================================================================
// Overlay protocol versions
// ============================================================================

/// Overlay protocol version spoken by this engine
pub const OVERLAY_VERSION_CURRENT: u32 = 13;

/// Casts carry `npeers`/`nfiles`/`ndls` from this version on
pub const OVERLAY_VERSION_STATS: u32 = 6;

/// Peers from this version on answer remote searches
pub const OVERLAY_VERSION_REMOTE_SEARCH: u32 = 6;

/// Preferences carry click-log fields and peer entries carry `oversion`/`nfiles`
pub const OVERLAY_VERSION_CLICKLOG: u32 = 8;

// ============================================================================
// Gossip cast
// ============================================================================

/// Overlay frame id of a cast message
pub const CAST_MESSAGE_ID: u8 = 249;

/// Overlay frame id of a keep-alive
pub const KEEP_ALIVE_ID: u8 = 240;

/// Largest cast we accept or produce (10 KiB)
pub const MAX_CAST_SIZE: usize = 10 * 1024;

/// Peers are not cast to (or accepted from) again within this window
pub const BLOCK_INTERVAL: Duration = Duration::from_secs(4 * 60 * 60);

/// Slack tolerated before a block-list entry counts as expired
pub const NETWORK_DELAY: Duration = Duration::from_secs(30);

/// Deadline for an outbound overlay connection attempt
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Keep-alives go out to connected peers this often
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(120);

/// Grace period after which an empty bootstrap gives up
pub const BOOTSTRAP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Peers pulled from the peer store per bootstrap
pub const BOOTSTRAP_PEERS: usize = 10;

/// Connection candidate pool size
pub const MAX_CANDIDATES: usize = 100;

/// Connected taste buddies kept
pub const MAX_TASTE_BUDDIES: usize = 10;

/// Connected random peers kept
pub const MAX_RANDOM_PEERS: usize = 10;

/// Connected unconnectable peers kept
pub const MAX_UNCONNECTABLE: usize = 10;

/// Taste buddies kept at the current overlay version during partitioning
pub const MIN_CURRENT_VERSION_BUDDIES: usize = 3;

/// Further taste buddies kept at click-log capable versions
pub const MIN_CLICKLOG_VERSION_BUDDIES: usize = 3;

/// Remote-search capable peers mixed into `random peers`
pub const MAX_REMOTE_SEARCH_PEERS: usize = 2;

/// Own preferences sent per cast
pub const NUM_MY_PREFS: usize = 50;

/// Collected torrents sent per cast
pub const NUM_COLLECTED_TORRENTS: usize = 50;

/// Collected torrents remembered by the in-memory overlay store
pub const MAX_STORED_TORRENTS: usize = 4 * NUM_COLLECTED_TORRENTS;

/// Similarity is a cosine scaled to this integer range
pub const SIMILARITY_SCALE: f64 = 1000.0;

/// Largest opaque overlay identity accepted in a cast
pub const MAX_PERMID_LEN: usize = 128;

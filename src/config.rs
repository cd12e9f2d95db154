//! Engine configuration.
//!
//! Plain structs with defaults taken from [`crate::constants`]. Hosts build
//! one per torrent (download, upload) and one per process (gossip).

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use crate::constants::*;

/// Download engine settings.
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    /// Size of each REQUEST we issue.
    pub chunk_size: u32,
    /// Averaging window of per-peer rate meters.
    pub max_rate_period: Duration,
    /// Unchoked peers sending nothing for this long are snubbed.
    pub snub_time: Duration,
    /// Global download cap in bytes/second. Zero means unlimited.
    pub download_rate: u64,
    /// Whether bad data may kick and ban peers at all.
    pub kickbans_ok: bool,
    /// Largest chunk we accept in a PIECE.
    pub max_slice_length: u32,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            chunk_size: CHUNK_SIZE,
            max_rate_period: MAX_RATE_PERIOD,
            snub_time: SNUB_TIME,
            download_rate: 0,
            kickbans_ok: true,
            max_slice_length: MAX_SLICE_LENGTH,
        }
    }
}

/// Upload engine settings.
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Requests longer than this close the connection.
    pub max_slice_length: u32,
    /// Read whole pieces and serve chunks from the cached copy.
    pub buffer_reads: bool,
    /// Reveal pieces one peer at a time instead of sending a bitfield.
    pub super_seed: bool,
    /// Upload cap in bytes/second. Zero means unlimited.
    pub upload_rate: u64,
    pub max_rate_period: Duration,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_slice_length: MAX_SLICE_LENGTH,
            buffer_reads: true,
            super_seed: false,
            upload_rate: 0,
            max_rate_period: MAX_RATE_PERIOD,
        }
    }
}

/// Gossip overlay settings. Times are whole seconds, matching the
/// overlay's unix-second clock.
#[derive(Debug, Clone)]
pub struct GossipConfig {
    /// Human-readable name advertised in casts.
    pub name: String,
    /// Address advertised in casts.
    pub ip: IpAddr,
    pub port: u16,
    /// Whether others can dial us.
    pub connectable: bool,
    pub overlay_version: u32,
    pub block_interval_secs: u64,
    pub connect_timeout_secs: u64,
    /// Keep-alive period towards connected peers.
    pub check_period_secs: u64,
    pub bootstrap_interval_secs: u64,
    /// Early-unblock slack on block-list entries.
    pub network_delay_secs: u64,
    pub max_candidates: usize,
    pub max_taste_buddies: usize,
    pub max_random_peers: usize,
    pub max_unconnectable: usize,
    pub num_my_prefs: usize,
    pub num_collected_torrents: usize,
    /// Largest encoded cast accepted or sent.
    pub max_message_size: usize,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 0,
            connectable: false,
            overlay_version: OVERLAY_VERSION_CURRENT,
            block_interval_secs: BLOCK_INTERVAL.as_secs(),
            connect_timeout_secs: CONNECT_TIMEOUT.as_secs(),
            check_period_secs: KEEPALIVE_INTERVAL.as_secs(),
            bootstrap_interval_secs: BOOTSTRAP_INTERVAL.as_secs(),
            network_delay_secs: NETWORK_DELAY.as_secs(),
            max_candidates: MAX_CANDIDATES,
            max_taste_buddies: MAX_TASTE_BUDDIES,
            max_random_peers: MAX_RANDOM_PEERS,
            max_unconnectable: MAX_UNCONNECTABLE,
            num_my_prefs: NUM_MY_PREFS,
            num_collected_torrents: NUM_COLLECTED_TORRENTS,
            max_message_size: MAX_CAST_SIZE,
        }
    }
}

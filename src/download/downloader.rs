use std::collections::VecDeque;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use crate::constants::{BACKLOG_SCALE, BACKLOG_SOFT_CAP};
use crate::peer::{Bitfield, Chunk, ConnId, Message, Outbound, PeerId};
use crate::rate::RateMeter;

/// Download-side state of one peer connection.
///
/// The coordinator owns every `PeerDownloader` and drives them by
/// [`ConnId`]; the downloader itself only knows its own connection.
#[derive(Debug)]
pub struct PeerDownloader {
    pub(super) conn: ConnId,
    pub(super) ip: IpAddr,
    pub(super) peer_id: PeerId,
    pub(super) choked: bool,
    pub(super) interested: bool,
    pub(super) have: Bitfield,
    pub(super) got_bitfield: bool,
    pub(super) active_requests: Vec<Chunk>,
    pub(super) backlog: usize,
    pub(super) example_interest: Option<u32>,
    pub(super) rate: RateMeter,
    pub(super) peer_rate: RateMeter,
    /// Last message of any kind.
    pub(super) last_message: Instant,
    /// Last PIECE.
    pub(super) last_piece: Instant,
    /// Last PIECE or UNCHOKE; drives snub detection.
    pub(super) last_activity: Instant,
}

impl PeerDownloader {
    pub(super) fn new(
        conn: ConnId,
        ip: IpAddr,
        peer_id: PeerId,
        piece_count: usize,
        max_rate_period: Duration,
        now: Instant,
    ) -> Self {
        Self {
            conn,
            ip,
            peer_id,
            choked: true,
            interested: false,
            have: Bitfield::new(piece_count),
            got_bitfield: false,
            active_requests: Vec::new(),
            backlog: 0,
            example_interest: None,
            rate: RateMeter::new_at(max_rate_period, now),
            peer_rate: RateMeter::new_at(max_rate_period, now),
            last_message: now,
            last_piece: now,
            last_activity: now,
        }
    }

    pub fn conn(&self) -> ConnId {
        self.conn
    }

    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    /// Whether the remote peer is choking us.
    pub fn is_choked(&self) -> bool {
        self.choked
    }

    /// Whether we told the remote peer we are interested.
    pub fn is_interested(&self) -> bool {
        self.interested
    }

    pub fn have(&self) -> &Bitfield {
        &self.have
    }

    pub fn active_requests(&self) -> &[Chunk] {
        &self.active_requests
    }

    pub fn backlog(&self) -> usize {
        self.backlog
    }

    pub fn last_message(&self) -> Instant {
        self.last_message
    }

    pub fn download_rate(&mut self, now: Instant) -> f64 {
        self.rate.rate_at(now)
    }

    /// Rate at which the peer announces new pieces, in bytes/second.
    pub fn peer_rate(&mut self, now: Instant) -> f64 {
        self.peer_rate.rate_at(now)
    }

    pub fn downloaded(&self) -> u64 {
        self.rate.total()
    }

    /// No PIECE from this peer within `snub_time`.
    pub fn is_snubbed(&self, now: Instant, snub_time: Duration) -> bool {
        now.saturating_duration_since(self.last_piece) > snub_time
    }

    pub(super) fn touch(&mut self, now: Instant) {
        self.last_message = now;
    }

    /// Sizes the request pipeline from the observed rate and the global
    /// queue limit. Oversized backlogs are scaled down.
    pub(super) fn compute_backlog(
        &mut self,
        chunk_size: u32,
        queue_limit: usize,
        just_unchoked: bool,
        now: Instant,
    ) -> usize {
        let rate = self.rate.rate_at(now);
        let by_rate = 2 + (4.0 * rate / f64::from(chunk_size.max(1))) as usize;
        let by_budget = queue_limit.saturating_add(2 * usize::from(just_unchoked));

        let mut backlog = by_rate.min(by_budget);
        if backlog > BACKLOG_SOFT_CAP {
            backlog = BACKLOG_SOFT_CAP.max((backlog as f64 * BACKLOG_SCALE) as usize);
        }
        self.backlog = backlog;
        backlog
    }

    /// Sends INTERESTED unless already interested.
    pub(super) fn send_interested(&mut self, outbound: &mut VecDeque<(ConnId, Outbound)>) {
        if !self.interested {
            self.interested = true;
            outbound.push_back((self.conn, Outbound::Send(Message::Interested)));
        }
    }

    /// Sends NOT_INTERESTED unless already not interested.
    pub(super) fn send_not_interested(&mut self, outbound: &mut VecDeque<(ConnId, Outbound)>) {
        if self.interested {
            self.interested = false;
            outbound.push_back((self.conn, Outbound::Send(Message::NotInterested)));
        }
    }

    pub(super) fn take_request(&mut self, chunk: &Chunk) -> bool {
        match self.active_requests.iter().position(|c| c == chunk) {
            Some(pos) => {
                self.active_requests.remove(pos);
                true
            }
            None => false,
        }
    }
}

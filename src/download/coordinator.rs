use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::net::IpAddr;
use std::time::Instant;

use rand::seq::SliceRandom;
use tracing::{debug, info, trace, warn};

use super::budget::RateBudget;
use super::downloader::PeerDownloader;
use super::guard::{BadDataGuard, GuardAction};
use crate::config::DownloadConfig;
use crate::constants::DISCONNECTED_SEED_EXPIRY;
use crate::merkle::UncleList;
use crate::peer::{Bitfield, Chunk, ConnId, Message, Outbound, PeerError, PeerId};
use crate::rate::RateMeter;
use crate::storage::{ChunkOutcome, ChunkSource, PiecePicker, PieceStore};

/// Helper-mode capability supplied by the host.
///
/// A frozen connection, or the connection to our own coordinator, never
/// issues requests. Piece reservation for helpers is the host's business.
pub trait HelperMode: Send {
    fn is_frozen(&self, conn: ConnId) -> bool;
    fn is_coordinator(&self, conn: ConnId) -> bool;
}

/// Owns every [`PeerDownloader`] of one torrent.
///
/// All peer events enter here keyed by [`ConnId`]. Wire messages and
/// closes the engine wants are queued and collected with
/// [`drain_outbound`](Self::drain_outbound).
pub struct DownloadCoordinator {
    config: DownloadConfig,
    store: Box<dyn PieceStore>,
    picker: Box<dyn PiecePicker>,
    helper: Option<Box<dyn HelperMode>>,
    downloads: BTreeMap<ConnId, PeerDownloader>,
    guard: BadDataGuard,
    budget: RateBudget,
    queued_out: BTreeSet<ConnId>,
    requeueing: bool,
    endgame: bool,
    all_requests: Vec<Chunk>,
    paused: bool,
    super_seeding: bool,
    disconnected_seeds: HashMap<PeerId, Instant>,
    discarded: u64,
    swarm_rate: RateMeter,
    completed: Vec<u32>,
    outbound: VecDeque<(ConnId, Outbound)>,
}

impl DownloadCoordinator {
    pub fn new(
        config: DownloadConfig,
        store: Box<dyn PieceStore>,
        picker: Box<dyn PiecePicker>,
        now: Instant,
    ) -> Self {
        Self {
            guard: BadDataGuard::new(config.kickbans_ok),
            budget: RateBudget::new(config.download_rate, config.chunk_size, now),
            swarm_rate: RateMeter::new_at(config.max_rate_period, now),
            config,
            store,
            picker,
            helper: None,
            downloads: BTreeMap::new(),
            queued_out: BTreeSet::new(),
            requeueing: false,
            endgame: false,
            all_requests: Vec::new(),
            paused: false,
            super_seeding: false,
            disconnected_seeds: HashMap::new(),
            discarded: 0,
            completed: Vec::new(),
            outbound: VecDeque::new(),
        }
    }

    pub fn with_helper(mut self, helper: Box<dyn HelperMode>) -> Self {
        self.helper = Some(helper);
        self
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn store(&self) -> &dyn PieceStore {
        self.store.as_ref()
    }

    pub fn store_mut(&mut self) -> &mut dyn PieceStore {
        self.store.as_mut()
    }

    pub fn picker(&self) -> &dyn PiecePicker {
        self.picker.as_ref()
    }

    pub fn guard(&self) -> &BadDataGuard {
        &self.guard
    }

    pub fn downloader(&self, conn: ConnId) -> Option<&PeerDownloader> {
        self.downloads.get(&conn)
    }

    pub fn downloader_mut(&mut self, conn: ConnId) -> Option<&mut PeerDownloader> {
        self.downloads.get_mut(&conn)
    }

    pub fn downloaders(&self) -> impl Iterator<Item = &PeerDownloader> {
        self.downloads.values()
    }

    pub fn len(&self) -> usize {
        self.downloads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.downloads.is_empty()
    }

    pub fn is_endgame(&self) -> bool {
        self.endgame
    }

    /// Requests outstanding in endgame, each possibly sent to several peers.
    pub fn endgame_requests(&self) -> &[Chunk] {
        &self.all_requests
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn is_complete(&self) -> bool {
        self.picker.am_i_complete()
    }

    /// Bytes received for chunks we no longer had outstanding.
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    pub fn is_banned(&self, ip: &IpAddr) -> bool {
        self.guard.is_banned(ip)
    }

    pub fn is_queued_out(&self, conn: ConnId) -> bool {
        self.queued_out.contains(&conn)
    }

    pub fn set_super_seeding(&mut self, on: bool) {
        self.super_seeding = on;
    }

    pub fn set_download_rate(&mut self, bytes_per_sec: u64) {
        self.budget.set_rate(bytes_per_sec);
    }

    /// Rate at which the swarm as a whole announces pieces.
    pub fn swarm_rate(&mut self, now: Instant) -> f64 {
        self.swarm_rate.rate_at(now)
    }

    /// Pieces completed since the last call, for HAVE broadcast.
    pub fn take_completed(&mut self) -> Vec<u32> {
        std::mem::take(&mut self.completed)
    }

    pub fn drain_outbound(&mut self) -> Vec<(ConnId, Outbound)> {
        self.outbound.drain(..).collect()
    }

    /// Seeds that left within the last hour. Older entries are swept.
    pub fn disconnected_seeds(&mut self, now: Instant) -> Vec<PeerId> {
        self.disconnected_seeds
            .retain(|_, &mut at| now.saturating_duration_since(at) < DISCONNECTED_SEED_EXPIRY);
        self.disconnected_seeds.keys().copied().collect()
    }

    fn add_disconnected_seed(&mut self, peer_id: PeerId, now: Instant) {
        self.disconnected_seeds.insert(peer_id, now);
    }

    fn send(&mut self, conn: ConnId, message: Message) {
        self.outbound.push_back((conn, Outbound::Send(message)));
    }

    fn close(&mut self, conn: ConnId) {
        self.outbound.push_back((conn, Outbound::Close));
    }

    // ------------------------------------------------------------------
    // Connection lifecycle
    // ------------------------------------------------------------------

    /// Starts downloading from a freshly handshaken peer.
    pub fn add_peer(&mut self, conn: ConnId, ip: IpAddr, peer_id: PeerId, now: Instant) {
        let download = PeerDownloader::new(
            conn,
            ip,
            peer_id,
            self.store.piece_count(),
            self.config.max_rate_period,
            now,
        );
        self.guard.attach(conn, ip, peer_id);
        self.downloads.insert(conn, download);
        trace!(%conn, %ip, "download added");
    }

    /// Releases everything the connection held.
    pub fn disconnect(&mut self, conn: ConnId, now: Instant) {
        let Some(download) = self.downloads.remove(&conn) else {
            return;
        };
        if self.endgame && self.downloads.is_empty() {
            self.reset_endgame();
        }

        if download.have.complete() {
            self.picker.lost_seed();
            self.add_disconnected_seed(download.peer_id, now);
        } else {
            for piece in download.have.iter() {
                self.picker.lost_have(piece as u32);
            }
        }

        self.let_go(conn, download.active_requests, now);
        self.guard.detach(conn, download.ip);
        debug!(%conn, "download removed");
    }

    // ------------------------------------------------------------------
    // Wire events
    // ------------------------------------------------------------------

    /// Records that any message arrived on `conn`.
    pub fn touch(&mut self, conn: ConnId, now: Instant) {
        if let Some(d) = self.downloads.get_mut(&conn) {
            d.touch(now);
        }
    }

    pub fn on_choke(&mut self, conn: ConnId, now: Instant) {
        let Some(d) = self.downloads.get_mut(&conn) else {
            return;
        };
        if d.choked {
            return;
        }
        d.choked = true;
        let requests = std::mem::take(&mut d.active_requests);
        self.let_go(conn, requests, now);
    }

    pub fn on_unchoke(&mut self, conn: ConnId, now: Instant) {
        let Some(d) = self.downloads.get_mut(&conn) else {
            return;
        };
        if !d.choked {
            return;
        }
        d.choked = false;
        d.last_activity = now;
        if d.interested {
            self.request_more(conn, true, now);
        }
    }

    pub fn on_have(&mut self, conn: ConnId, piece: u32, now: Instant) -> Result<(), PeerError> {
        if piece as usize >= self.store.piece_count() {
            return Err(PeerError::Protocol(format!("HAVE for unknown piece {}", piece)));
        }
        let size = self.store.piece_size(piece);
        let Some(d) = self.downloads.get_mut(&conn) else {
            return Ok(());
        };
        d.peer_rate.update_at(size, now);
        self.swarm_rate.update_at(size, now);

        if d.have.get(piece as usize) {
            return Ok(());
        }
        d.have.set(piece as usize);
        self.picker.got_have(piece);

        if d.have.complete() {
            self.picker.became_seed(&d.have);
            if self.picker.am_i_complete() {
                let peer_id = d.peer_id;
                self.add_disconnected_seed(peer_id, now);
                self.close(conn);
            }
            return Ok(());
        }

        if self.endgame {
            self.fix_endgame(conn, false, now);
        } else if !self.paused
            && !self.picker.is_blocked(piece)
            && self.store.do_i_have_requests(piece)
        {
            if d.choked {
                d.send_interested(&mut self.outbound);
            } else {
                self.request_more(conn, false, now);
            }
        }
        Ok(())
    }

    /// Takes the peer's initial have-set. A second BITFIELD is a protocol
    /// violation.
    pub fn on_bitfield(&mut self, conn: ConnId, bits: &[u8], now: Instant) -> Result<(), PeerError> {
        let have = Bitfield::from_bytes(bits, self.store.piece_count())?;
        let Some(d) = self.downloads.get_mut(&conn) else {
            return Ok(());
        };
        if d.got_bitfield {
            return Err(PeerError::Protocol("duplicate BITFIELD".into()));
        }
        d.got_bitfield = true;

        if self.picker.am_i_complete() && have.complete() {
            let peer_id = d.peer_id;
            if self.super_seeding {
                self.send(conn, Message::Bitfield(have.to_bytes()));
            }
            debug!(%conn, "both sides complete, closing");
            self.add_disconnected_seed(peer_id, now);
            self.close(conn);
            return Ok(());
        }

        if have.complete() {
            self.picker.got_seed();
        } else {
            for piece in have.iter() {
                self.picker.got_have(piece as u32);
            }
        }
        d.have = have;

        if self.endgame && !self.paused {
            if self.all_requests.iter().any(|c| d.have.get(c.piece as usize)) {
                d.send_interested(&mut self.outbound);
            }
        } else {
            self.check_interests(conn);
        }
        Ok(())
    }

    /// Handles a PIECE (or HASHPIECE). Returns true if the piece is now held.
    ///
    /// Chunks we have no request outstanding for are counted as discarded;
    /// that covers CANCEL races and endgame duplicates. A chunk longer than
    /// `max_slice_length` closes the connection.
    pub fn on_piece(
        &mut self,
        conn: ConnId,
        piece: u32,
        offset: u32,
        data: &[u8],
        uncles: Option<&UncleList>,
        now: Instant,
    ) -> bool {
        if data.len() > self.config.max_slice_length as usize {
            warn!(%conn, piece, offset, len = data.len(), "oversized chunk");
            self.close(conn);
            return false;
        }
        let chunk = Chunk::new(piece, offset, data.len() as u32);
        let Some(d) = self.downloads.get_mut(&conn) else {
            return false;
        };
        if !d.take_request(&chunk) {
            self.discarded += u64::from(chunk.length);
            trace!(%conn, piece, offset, "discarding unrequested chunk");
            return false;
        }
        if self.endgame {
            self.all_requests.retain(|c| *c != chunk);
        }
        d.last_piece = now;
        d.last_activity = now;
        d.rate.update_at(u64::from(chunk.length), now);
        let source = ChunkSource::new(conn, d.ip);

        let outcome = match self.store.piece_came_in(&chunk, uncles, data, source) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(%conn, piece, offset, error = %e, "store rejected chunk");
                self.close(conn);
                return false;
            }
        };

        match outcome {
            ChunkOutcome::Flunked { sources } => {
                self.charge_bad_piece(piece, &sources);
                self.piece_flunked(piece, now);
                return false;
            }
            ChunkOutcome::Complete { sources } => {
                for s in &sources {
                    self.guard.good(s.conn, s.ip, piece);
                }
                self.picker.complete(piece);
                self.completed.push(piece);
                debug!(piece, "piece complete");
            }
            ChunkOutcome::Partial | ChunkOutcome::Duplicate => {}
        }

        if self.endgame {
            self.cancel_duplicates(conn, &chunk, now);
        }

        self.request_more(conn, false, now);
        self.check_complete(piece, now);
        self.store.do_i_have(piece)
    }

    fn charge_bad_piece(&mut self, piece: u32, sources: &[ChunkSource]) {
        warn!(piece, sources = sources.len(), "piece failed hash check");
        let downloads = self.downloads.len();
        let mut actions = Vec::new();
        for s in sources {
            actions.extend(self.guard.failed(s.conn, s.ip, piece, downloads));
        }
        for action in actions {
            match action {
                GuardAction::Kick(conn) => {
                    warn!(%conn, "kicking peer for sending bad data");
                    self.close(conn);
                }
                GuardAction::Ban(ip) => {
                    warn!(%ip, "banning address for sending bad data");
                    let conns: Vec<ConnId> = self
                        .downloads
                        .values()
                        .filter(|d| d.ip == ip)
                        .map(|d| d.conn)
                        .collect();
                    for conn in conns {
                        self.close(conn);
                    }
                }
            }
        }
    }

    /// Withdraws `chunk` from every other peer it was requested from.
    fn cancel_duplicates(&mut self, from: ConnId, chunk: &Chunk, now: Instant) {
        let others: Vec<ConnId> = self.downloads.keys().copied().filter(|&c| c != from).collect();
        for conn in others {
            let Some(d) = self.downloads.get_mut(&conn) else {
                continue;
            };
            if !d.interested {
                continue;
            }
            if !d.choked {
                if !d.take_request(chunk) {
                    continue;
                }
                self.send(conn, Message::Cancel(*chunk));
            }
            self.fix_endgame(conn, false, now);
        }
    }

    // ------------------------------------------------------------------
    // Request scheduling
    // ------------------------------------------------------------------

    /// Chunks that may be requested now under the global download cap.
    ///
    /// Once credit is available again, connections that were starved are
    /// re-driven once, in random order.
    pub fn queue_limit(&mut self, now: Instant) -> usize {
        if self.budget.is_unlimited() {
            return self.budget.limit();
        }
        let in_credit = self.budget.refill(now);
        if in_credit && !self.requeueing && !self.queued_out.is_empty() {
            self.requeueing = true;
            let mut queued: Vec<ConnId> = std::mem::take(&mut self.queued_out).into_iter().collect();
            queued.shuffle(&mut rand::rng());
            for conn in queued {
                self.request_more(conn, false, now);
            }
            self.requeueing = false;
        }
        self.budget.limit()
    }

    fn backlog(&mut self, conn: ConnId, just_unchoked: bool, now: Instant) -> usize {
        let limit = self.queue_limit(now);
        let chunk_size = self.config.chunk_size;
        self.downloads
            .get_mut(&conn)
            .map_or(0, |d| d.compute_backlog(chunk_size, limit, just_unchoked, now))
    }

    fn too_many_partials(&self) -> bool {
        self.store.dirty().len() > self.downloads.len() / 2
    }

    fn held_back(&self, conn: ConnId) -> bool {
        self.helper
            .as_ref()
            .is_some_and(|h| h.is_frozen(conn) || h.is_coordinator(conn))
    }

    /// Fills `conn`'s request pipeline up to its backlog.
    pub fn request_more(&mut self, conn: ConnId, just_unchoked: bool, now: Instant) {
        match self.downloads.get(&conn) {
            Some(d) if !d.choked => {}
            _ => return,
        }
        if self.held_back(conn) {
            return;
        }
        if self.endgame {
            self.fix_endgame(conn, just_unchoked, now);
            return;
        }
        if self.paused {
            return;
        }

        let backlog = self.backlog(conn, just_unchoked, now);
        let too_many_partials = self.too_many_partials();
        let Some(d) = self.downloads.get_mut(&conn) else {
            return;
        };
        if d.active_requests.len() >= backlog {
            if d.active_requests.is_empty() && backlog == 0 {
                self.queued_out.insert(conn);
            }
            return;
        }

        let mut lost_interests = Vec::new();
        while d.active_requests.len() < backlog {
            let store = self.store.as_ref();
            let Some(interest) =
                self.picker
                    .next(&d.have, &|p| store.do_i_have_requests(p), conn, too_many_partials)
            else {
                break;
            };
            d.example_interest = Some(interest);
            d.send_interested(&mut self.outbound);

            let mut requested = false;
            while d.active_requests.len() < backlog {
                let Some(chunk) = self.store.new_request(interest) else {
                    break;
                };
                requested = true;
                self.picker.requested(interest);
                d.active_requests.push(chunk);
                self.outbound
                    .push_back((conn, Outbound::Send(Message::Request(chunk))));
                self.budget.chunk_requested(chunk.length);
                if !self.store.do_i_have_requests(interest) {
                    lost_interests.push(interest);
                    break;
                }
            }
            if !requested {
                break;
            }
        }

        if d.active_requests.is_empty() {
            d.send_not_interested(&mut self.outbound);
        }

        if !lost_interests.is_empty() {
            self.recheck_interests(&lost_interests, too_many_partials);
        }
        if self.store.is_endgame() {
            self.start_endgame(now);
        }
    }

    /// Idle-but-interested peers whose only interest just ran out of
    /// chunks pick a new one or drop interest.
    fn recheck_interests(&mut self, lost: &[u32], too_many_partials: bool) {
        let store = self.store.as_ref();
        for (&conn, d) in self.downloads.iter_mut() {
            if !d.active_requests.is_empty() || !d.interested {
                continue;
            }
            if d.example_interest.is_some_and(|p| store.do_i_have_requests(p)) {
                continue;
            }
            if !lost.iter().any(|&p| d.have.get(p as usize)) {
                continue;
            }
            match self
                .picker
                .next(&d.have, &|p| store.do_i_have_requests(p), conn, too_many_partials)
            {
                Some(piece) => d.example_interest = Some(piece),
                None => d.send_not_interested(&mut self.outbound),
            }
        }
    }

    fn check_interests(&mut self, conn: ConnId) {
        if self.paused {
            return;
        }
        let Some(d) = self.downloads.get_mut(&conn) else {
            return;
        };
        if d.interested {
            return;
        }
        let endgame = self.endgame;
        let useful = d.have.iter().any(|p| {
            let p = p as u32;
            !self.picker.is_blocked(p) && (endgame || self.store.do_i_have_requests(p))
        });
        if useful {
            d.send_interested(&mut self.outbound);
        }
    }

    /// Returns requests to the store and lets other peers pick them up.
    fn let_go(&mut self, conn: ConnId, requests: Vec<Chunk>, now: Instant) {
        self.queued_out.remove(&conn);
        if requests.is_empty() || self.endgame {
            return;
        }

        let mut lost: Vec<u32> = requests.iter().map(|c| c.piece).collect();
        lost.dedup();
        for chunk in &requests {
            self.store.request_lost(chunk);
        }
        if self.paused {
            return;
        }

        let mut unchoked: Vec<ConnId> = self
            .downloads
            .values()
            .filter(|d| !d.choked)
            .map(|d| d.conn)
            .collect();
        unchoked.shuffle(&mut rand::rng());
        for other in unchoked {
            self.request_more(other, false, now);
        }

        let store = self.store.as_ref();
        for d in self.downloads.values_mut() {
            if d.choked
                && !d.interested
                && lost
                    .iter()
                    .any(|&p| d.have.get(p as usize) && store.do_i_have_requests(p))
            {
                d.send_interested(&mut self.outbound);
            }
        }
    }

    // ------------------------------------------------------------------
    // Endgame
    // ------------------------------------------------------------------

    /// Switches to requesting every missing chunk from every peer that has it.
    pub fn start_endgame(&mut self, now: Instant) {
        if self.endgame {
            return;
        }
        self.endgame = true;
        self.all_requests.clear();
        for d in self.downloads.values() {
            for chunk in &d.active_requests {
                if !self.all_requests.contains(chunk) {
                    self.all_requests.push(*chunk);
                }
            }
        }
        info!(outstanding = self.all_requests.len(), "entering endgame");

        let conns: Vec<ConnId> = self.downloads.keys().copied().collect();
        for conn in conns {
            self.fix_endgame(conn, false, now);
        }
    }

    fn fix_endgame(&mut self, conn: ConnId, just_unchoked: bool, now: Instant) {
        if self.paused || self.held_back(conn) {
            return;
        }
        let backlog = self.backlog(conn, just_unchoked, now);
        let Some(d) = self.downloads.get_mut(&conn) else {
            return;
        };
        if d.active_requests.len() >= backlog {
            if d.active_requests.is_empty() && backlog == 0 && !d.choked {
                self.queued_out.insert(conn);
            }
            return;
        }

        let mut want: Vec<Chunk> = self
            .all_requests
            .iter()
            .filter(|c| d.have.get(c.piece as usize) && !d.active_requests.contains(c))
            .copied()
            .collect();
        if d.active_requests.is_empty() && want.is_empty() {
            d.send_not_interested(&mut self.outbound);
            return;
        }
        if !want.is_empty() {
            d.send_interested(&mut self.outbound);
        }
        if d.choked {
            return;
        }

        want.shuffle(&mut rand::rng());
        want.truncate(backlog - d.active_requests.len());
        for chunk in want {
            d.active_requests.push(chunk);
            self.outbound
                .push_back((conn, Outbound::Send(Message::Request(chunk))));
            self.budget.chunk_requested(chunk.length);
        }
    }

    fn reset_endgame(&mut self) {
        debug!(outstanding = self.all_requests.len(), "leaving endgame");
        self.store.reset_endgame(&self.all_requests);
        self.all_requests.clear();
        self.endgame = false;
    }

    /// A completed piece failed its hash check; get it requested again.
    pub fn piece_flunked(&mut self, piece: u32, now: Instant) {
        self.picker.bump(piece);
        if self.paused {
            return;
        }

        if self.endgame {
            if self.downloads.is_empty() {
                self.reset_endgame();
                return;
            }
            while self.store.do_i_have_requests(piece) {
                let Some(chunk) = self.store.new_request(piece) else {
                    break;
                };
                self.all_requests.push(chunk);
            }
            let conns: Vec<ConnId> = self.downloads.keys().copied().collect();
            for conn in conns {
                self.fix_endgame(conn, false, now);
            }
            return;
        }

        let mut unchoked: Vec<ConnId> = self
            .downloads
            .values()
            .filter(|d| !d.choked)
            .map(|d| d.conn)
            .collect();
        unchoked.shuffle(&mut rand::rng());
        for conn in unchoked {
            self.request_more(conn, false, now);
        }

        for d in self.downloads.values_mut() {
            if !d.interested && d.have.get(piece as usize) {
                d.example_interest = Some(piece);
                d.send_interested(&mut self.outbound);
            }
        }
    }

    /// After `piece` completes: leave endgame when nothing is outstanding,
    /// and once we are a seed tell other seeds and drop them.
    pub fn check_complete(&mut self, piece: u32, now: Instant) -> bool {
        if self.endgame && self.all_requests.is_empty() {
            self.endgame = false;
        }
        if !self.picker.am_i_complete() {
            return false;
        }

        self.endgame = false;
        self.all_requests.clear();
        let seeds: Vec<(ConnId, PeerId)> = self
            .downloads
            .values()
            .filter(|d| d.have.complete())
            .map(|d| (d.conn, d.peer_id))
            .collect();
        for (conn, peer_id) in seeds {
            self.send(conn, Message::Have { piece });
            self.add_disconnected_seed(peer_id, now);
            self.close(conn);
        }
        info!("download complete");
        true
    }

    // ------------------------------------------------------------------
    // Housekeeping
    // ------------------------------------------------------------------

    /// Stops or resumes downloading.
    pub fn pause(&mut self, flag: bool, now: Instant) {
        self.paused = flag;
        let conns: Vec<ConnId> = self.downloads.keys().copied().collect();

        if flag {
            for &conn in &conns {
                let Some(d) = self.downloads.get_mut(&conn) else {
                    continue;
                };
                let requests = std::mem::take(&mut d.active_requests);
                for chunk in &requests {
                    self.outbound
                        .push_back((conn, Outbound::Send(Message::Cancel(*chunk))));
                }
                d.send_not_interested(&mut self.outbound);
                self.let_go(conn, requests, now);
            }
            if self.endgame {
                self.reset_endgame();
            }
            info!("downloads paused");
            return;
        }

        let mut conns = conns;
        conns.shuffle(&mut rand::rng());
        for conn in conns {
            self.check_interests(conn);
            let ready = self
                .downloads
                .get(&conn)
                .is_some_and(|d| d.interested && !d.choked);
            if ready {
                self.request_more(conn, false, now);
            }
        }
        info!("downloads resumed");
    }

    /// Periodic work: snub detection, budget requeue, seed expiry.
    pub fn tick(&mut self, now: Instant) {
        let snub_time = self.config.snub_time;
        let snubbed: Vec<ConnId> = self
            .downloads
            .values()
            .filter(|d| {
                d.interested
                    && !d.choked
                    && now.saturating_duration_since(d.last_activity) > snub_time
            })
            .map(|d| d.conn)
            .collect();

        for conn in snubbed {
            debug!(%conn, "peer snubbed us");
            if let Some(d) = self.downloads.get(&conn) {
                let cancels: Vec<Chunk> = d.active_requests.clone();
                for chunk in cancels {
                    self.send(conn, Message::Cancel(chunk));
                }
            }
            self.on_choke(conn, now);
        }

        self.queue_limit(now);
        self.disconnected_seeds(now);
    }

    /// Whether `conn` has sent no PIECE within the snub time.
    pub fn is_snubbed(&self, conn: ConnId, now: Instant) -> bool {
        self.downloads
            .get(&conn)
            .is_some_and(|d| d.is_snubbed(now, self.config.snub_time))
    }
}

use std::collections::{BTreeMap, VecDeque};
use std::net::IpAddr;
use std::time::Instant;

use tracing::{debug, info, trace, warn};

use super::choker::{Choker, PeerStats};
use super::error::SwarmError;
use crate::config::{DownloadConfig, UploadConfig};
use crate::download::DownloadCoordinator;
use crate::peer::{ConnId, Message, Outbound, PeerError, PeerId};
use crate::rate::TokenBucket;
use crate::storage::{PiecePicker, PieceStore};
use crate::upload::{PeerUploader, SuperSeeder};

/// One torrent's swarm: downloads, uploads and the choker.
pub struct Swarm {
    download: DownloadCoordinator,
    uploads: BTreeMap<ConnId, PeerUploader>,
    upload_config: UploadConfig,
    super_seeder: Option<SuperSeeder>,
    choker: Choker,
    upload_cap: TokenBucket,
    /// Round-robin order for serving uploads.
    upload_order: VecDeque<ConnId>,
    outbound: VecDeque<(ConnId, Outbound)>,
}

impl Swarm {
    pub fn new(
        download_config: DownloadConfig,
        upload_config: UploadConfig,
        store: Box<dyn PieceStore>,
        picker: Box<dyn PiecePicker>,
        now: Instant,
    ) -> Self {
        let mut download = DownloadCoordinator::new(download_config, store, picker, now);
        let super_seeder = (upload_config.super_seed && download.store().amount_left() == 0)
            .then(|| SuperSeeder::new(download.store().piece_count()));
        download.set_super_seeding(super_seeder.is_some());
        if super_seeder.is_some() {
            info!("super-seeding");
        }

        Self {
            download,
            uploads: BTreeMap::new(),
            upload_cap: TokenBucket::new(upload_config.upload_rate, now),
            upload_config,
            super_seeder,
            choker: Choker::new(),
            upload_order: VecDeque::new(),
            outbound: VecDeque::new(),
        }
    }

    pub fn download(&self) -> &DownloadCoordinator {
        &self.download
    }

    pub fn download_mut(&mut self) -> &mut DownloadCoordinator {
        &mut self.download
    }

    pub fn uploader(&self, conn: ConnId) -> Option<&PeerUploader> {
        self.uploads.get(&conn)
    }

    pub fn super_seeder(&self) -> Option<&SuperSeeder> {
        self.super_seeder.as_ref()
    }

    pub fn len(&self) -> usize {
        self.uploads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.uploads.is_empty()
    }

    pub fn is_complete(&self) -> bool {
        self.download.is_complete()
    }

    pub fn set_upload_rate(&mut self, bytes_per_sec: u64) {
        self.upload_cap.set_rate(bytes_per_sec);
    }

    /// Next action for the transport, in the order it was produced.
    pub fn poll_outbound(&mut self) -> Option<(ConnId, Outbound)> {
        self.collect();
        self.outbound.pop_front()
    }

    pub fn drain_outbound(&mut self) -> Vec<(ConnId, Outbound)> {
        self.collect();
        self.outbound.drain(..).collect()
    }

    /// Admits a handshaken connection and queues our BITFIELD.
    pub fn add_peer(&mut self, conn: ConnId, ip: IpAddr, peer_id: PeerId, now: Instant) -> Result<(), SwarmError> {
        if self.download.is_banned(&ip) {
            debug!(%conn, %ip, "rejecting banned address");
            return Err(SwarmError::Banned(ip));
        }

        self.download.add_peer(conn, ip, peer_id, now);
        let upload = PeerUploader::new(conn, &self.upload_config, self.download.store(), now);
        if let Some(bitfield) = upload.greeting(self.download.store()) {
            self.send(conn, bitfield);
        }
        self.uploads.insert(conn, upload);
        self.upload_order.push_back(conn);
        debug!(%conn, %ip, peers = self.uploads.len(), "peer added");
        Ok(())
    }

    /// Drops a closed connection, releasing its requests.
    pub fn remove_peer(&mut self, conn: ConnId, now: Instant) {
        let Some(mut upload) = self.uploads.remove(&conn) else {
            return;
        };
        upload.disconnected();
        self.download.disconnect(conn, now);
        self.choker.remove_peer(conn);
        if let Some(seeder) = &mut self.super_seeder {
            seeder.disconnected(conn);
        }
        self.upload_order.retain(|&c| c != conn);
        self.outbound.retain(|(c, _)| *c != conn);

        if !upload.is_choked() {
            self.rechoke(now);
        }
        debug!(%conn, peers = self.uploads.len(), "peer removed");
    }

    /// Feeds one decoded wire message from `conn`.
    ///
    /// Protocol violations queue a close for the connection and are returned
    /// so the host can log or count them.
    pub fn handle_message(&mut self, conn: ConnId, message: Message, now: Instant) -> Result<(), SwarmError> {
        if !self.uploads.contains_key(&conn) {
            return Err(SwarmError::UnknownConnection(conn));
        }
        self.download.touch(conn, now);

        if let Err(e) = self.dispatch(conn, message, now) {
            warn!(%conn, error = %e, "closing connection");
            self.close(conn);
            return Err(e.into());
        }

        self.broadcast_haves();
        self.pump_uploads(now);
        Ok(())
    }

    fn dispatch(&mut self, conn: ConnId, message: Message, now: Instant) -> Result<(), PeerError> {
        match message {
            Message::KeepAlive => {}
            Message::Choke => self.download.on_choke(conn, now),
            Message::Unchoke => self.download.on_unchoke(conn, now),
            Message::Interested => {
                if let Some(up) = self.uploads.get_mut(&conn) {
                    up.on_interested();
                }
                self.rechoke(now);
            }
            Message::NotInterested => {
                let was_unchoked = self.uploads.get_mut(&conn).is_some_and(|up| {
                    up.on_not_interested();
                    !up.is_choked()
                });
                if was_unchoked {
                    self.rechoke(now);
                }
            }
            Message::Have { piece } => {
                self.download.on_have(conn, piece, now)?;
                self.super_seed_have(conn, piece)?;
            }
            Message::Bitfield(bits) => {
                self.download.on_bitfield(conn, &bits, now)?;
                self.super_seed_reveal(conn)?;
            }
            Message::Request(chunk) => {
                if let Some(up) = self.uploads.get_mut(&conn) {
                    up.on_request(chunk)?;
                }
            }
            Message::Cancel(chunk) => {
                if let Some(up) = self.uploads.get_mut(&conn) {
                    up.on_cancel(&chunk);
                }
            }
            Message::Piece { piece, offset, data } => {
                self.download.on_piece(conn, piece, offset, &data, None, now);
            }
            Message::HashPiece {
                piece,
                offset,
                uncles,
                data,
            } => {
                self.download
                    .on_piece(conn, piece, offset, &data, Some(&uncles), now);
            }
            Message::Unknown { id, .. } => {
                trace!(%conn, id, "dropping unknown message");
            }
        }
        Ok(())
    }

    /// Reveals the next piece once a super-seeded peer holds the current one.
    fn super_seed_have(&mut self, conn: ConnId, piece: u32) -> Result<(), PeerError> {
        let advance = match &mut self.super_seeder {
            Some(seeder) => seeder.on_have(conn, piece),
            None => return Ok(()),
        };
        if advance {
            self.super_seed_reveal(conn)?;
        }
        Ok(())
    }

    fn super_seed_reveal(&mut self, conn: ConnId) -> Result<(), PeerError> {
        let (Some(seeder), Some(download), Some(up)) = (
            &mut self.super_seeder,
            self.download.downloader(conn),
            self.uploads.get_mut(&conn),
        ) else {
            return Ok(());
        };
        if seeder.has_assignment(conn) {
            return Ok(());
        }
        if up.revealed().len() >= 3 && !up.was_ever_interested() {
            // never asks for anything it is shown: most likely another seed
            return Err(PeerError::Protocol("super-seeded peer never interested".into()));
        }
        let Some(piece) = seeder.next_reveal(conn, download.have()) else {
            return Ok(());
        };
        let have = up.reveal(piece);
        self.send(conn, have);
        Ok(())
    }

    /// Periodic work: download housekeeping, choking and upload scheduling.
    pub fn tick(&mut self, now: Instant) {
        self.download.tick(now);

        let stats = self.peer_stats(now);
        let decisions = self.choker.tick(&stats, self.download.is_complete(), now);
        self.apply_chokes(decisions);

        if self.super_seeder.is_some() {
            let idle: Vec<ConnId> = self
                .uploads
                .iter()
                .filter(|(_, up)| up.revealed().is_empty())
                .map(|(&conn, _)| conn)
                .collect();
            for conn in idle {
                if let Err(e) = self.super_seed_reveal(conn) {
                    warn!(%conn, error = %e, "closing connection");
                    self.close(conn);
                }
            }
        }

        self.broadcast_haves();
        self.pump_uploads(now);
    }

    fn rechoke(&mut self, now: Instant) {
        let stats = self.peer_stats(now);
        let decisions = self.choker.rechoke(&stats, self.download.is_complete(), now);
        self.apply_chokes(decisions);
    }

    fn peer_stats(&mut self, now: Instant) -> Vec<(ConnId, PeerStats)> {
        let conns: Vec<ConnId> = self.uploads.keys().copied().collect();
        conns
            .into_iter()
            .filter_map(|conn| {
                let download_rate = self.download.downloader_mut(conn)?.download_rate(now);
                let up = self.uploads.get_mut(&conn)?;
                Some((
                    conn,
                    PeerStats {
                        download_rate,
                        upload_rate: up.upload_rate(now),
                        interested: up.is_interested(),
                        we_choking: up.is_choked(),
                    },
                ))
            })
            .collect()
    }

    fn apply_chokes(&mut self, decisions: Vec<(ConnId, bool)>) {
        for (conn, unchoke) in decisions {
            let Some(up) = self.uploads.get_mut(&conn) else {
                continue;
            };
            let message = if unchoke { up.unchoke() } else { up.choke() };
            if let Some(message) = message {
                trace!(%conn, unchoke, "choke state changed");
                self.send(conn, message);
            }
        }
    }

    /// Serves queued requests one chunk per peer per pass until the upload
    /// cap runs dry or nobody has anything queued.
    pub fn pump_uploads(&mut self, now: Instant) {
        loop {
            let mut served = false;
            for _ in 0..self.upload_order.len() {
                let Some(&conn) = self.upload_order.front() else {
                    break;
                };
                self.upload_order.rotate_left(1);

                let Some(up) = self.uploads.get_mut(&conn) else {
                    continue;
                };
                let Some(len) = up.next_len() else {
                    continue;
                };
                if !self.upload_cap.try_consume(len as usize, now) {
                    // keep this peer first in line for the next pass
                    self.upload_order.rotate_right(1);
                    return;
                }
                match up.next_chunk(self.download.store_mut(), now) {
                    Ok(Some(message)) => {
                        self.send(conn, message);
                        served = true;
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(%conn, error = %e, "upload read failed, closing");
                        up.disconnected();
                        self.close(conn);
                    }
                }
            }
            if !served {
                return;
            }
        }
    }

    /// Sends HAVE for newly completed pieces to every peer lacking them.
    fn broadcast_haves(&mut self) {
        let completed = self.download.take_completed();
        if completed.is_empty() {
            return;
        }
        for piece in completed {
            let targets: Vec<ConnId> = self
                .download
                .downloaders()
                .filter(|d| !d.have().get(piece as usize))
                .map(|d| d.conn())
                .collect();
            for conn in targets {
                self.send(conn, Message::Have { piece });
            }
        }
        if self.download.is_complete() {
            info!("torrent complete, seeding");
        }
    }

    fn collect(&mut self) {
        self.outbound.extend(self.download.drain_outbound());
    }

    fn send(&mut self, conn: ConnId, message: Message) {
        self.collect();
        self.outbound.push_back((conn, Outbound::Send(message)));
    }

    fn close(&mut self, conn: ConnId) {
        self.collect();
        self.outbound.push_back((conn, Outbound::Close));
    }
}

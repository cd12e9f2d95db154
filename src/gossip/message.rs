use std::fmt;
use std::net::IpAddr;

use bytes::{BufMut, Bytes, BytesMut};

use super::error::GossipError;
use crate::bencode::{decode, encode, encoded_len, Value};
use crate::constants::{
    CAST_MESSAGE_ID, KEEP_ALIVE_ID, MAX_PERMID_LEN, OVERLAY_VERSION_CLICKLOG, OVERLAY_VERSION_STATS,
};

/// Torrent identifier exchanged in preferences.
pub type InfoHash = [u8; 20];

/// Opaque overlay identity of a peer (its public key).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PermId(pub Bytes);

impl PermId {
    pub fn new(bytes: &[u8]) -> Self {
        Self(Bytes::copy_from_slice(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for PermId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0.iter().take(8) {
            write!(f, "{:02x}", b)?;
        }
        if self.0.len() > 8 {
            write!(f, "..")?;
        }
        Ok(())
    }
}

/// Search context recorded when the user picked a torrent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClickLog {
    pub terms: Vec<i64>,
    pub position: i64,
    pub reranking: i64,
}

/// One torrent we (or a peer) showed interest in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preference {
    pub infohash: InfoHash,
    pub click: Option<ClickLog>,
}

impl Preference {
    pub fn new(infohash: InfoHash) -> Self {
        Self {
            infohash,
            click: None,
        }
    }
}

/// A peer mentioned in a cast's `taste buddies` or `random peers`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerEntry {
    pub permid: PermId,
    pub ip: IpAddr,
    pub port: u16,
    /// Seconds since the sender last saw the peer.
    pub age: u64,
    pub similarity: i64,
    pub oversion: Option<u32>,
    pub nfiles: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CastStats {
    pub npeers: u64,
    pub nfiles: u64,
    pub ndls: u64,
}

/// A gossip cast: the sender's preferences and a sample of peers it knows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CastMessage {
    pub ip: IpAddr,
    pub port: u16,
    pub name: String,
    pub preferences: Vec<Preference>,
    pub taste_buddies: Vec<PeerEntry>,
    pub random_peers: Vec<PeerEntry>,
    pub collected_torrents: Vec<InfoHash>,
    pub connectable: bool,
    pub stats: Option<CastStats>,
}

impl CastMessage {
    /// Bencodes the cast for a peer speaking `version`.
    ///
    /// Click-log preferences and `oversion`/`nfiles` only go to version 8
    /// and later; stats only to version 6 and later.
    pub fn encode(&self, version: u32, limit: usize) -> Result<Bytes, GossipError> {
        let clicklog = version >= OVERLAY_VERSION_CLICKLOG;
        let preferences = self
            .preferences
            .iter()
            .map(|p| {
                if !clicklog {
                    return Value::bytes(&p.infohash);
                }
                let click = p.click.clone().unwrap_or_default();
                Value::List(vec![
                    Value::bytes(&p.infohash),
                    Value::List(click.terms.into_iter().map(Value::Integer).collect()),
                    Value::Integer(click.position),
                    Value::Integer(click.reranking),
                ])
            })
            .collect();

        let mut dict = Value::dict()
            .str("ip", &self.ip.to_string())
            .int("port", i64::from(self.port))
            .str("name", &self.name)
            .list("preferences", preferences)
            .list(
                "taste buddies",
                self.taste_buddies
                    .iter()
                    .map(|e| encode_entry(e, clicklog, true))
                    .collect(),
            )
            .list(
                "random peers",
                self.random_peers
                    .iter()
                    .map(|e| encode_entry(e, clicklog, false))
                    .collect(),
            )
            .list(
                "collected torrents",
                self.collected_torrents
                    .iter()
                    .map(|h| Value::bytes(h))
                    .collect(),
            )
            .int("connectable", i64::from(self.connectable));

        if version >= OVERLAY_VERSION_STATS {
            if let Some(stats) = self.stats {
                dict = dict
                    .int("npeers", clamp_u64(stats.npeers))
                    .int("nfiles", clamp_u64(stats.nfiles))
                    .int("ndls", clamp_u64(stats.ndls));
            }
        }

        let value = dict.build();
        let actual = encoded_len(&value);
        if actual > limit {
            return Err(GossipError::TooLarge { limit, actual });
        }
        Ok(Bytes::from(encode(&value)?))
    }

    /// Decodes and validates a cast received from a peer speaking `version`.
    pub fn decode(payload: &[u8], version: u32, limit: usize) -> Result<Self, GossipError> {
        if payload.len() > limit {
            return Err(GossipError::TooLarge {
                limit,
                actual: payload.len(),
            });
        }
        let value = decode(payload)?;
        if value.as_dict().is_none() {
            return Err(bad("cast is not a dictionary"));
        }

        let ip = parse_ip(value.get_str(b"ip").ok_or_else(|| bad("missing ip"))?)?;
        let port = parse_port(value.get_int(b"port").ok_or_else(|| bad("missing port"))?)?;
        let name = value
            .get_str(b"name")
            .ok_or_else(|| bad("missing or non-UTF-8 name"))?
            .to_string();

        let preferences = value
            .get_list(b"preferences")
            .ok_or_else(|| bad("missing preferences"))?
            .iter()
            .map(|v| parse_preference(v, version))
            .collect::<Result<Vec<_>, _>>()?;

        let taste_buddies = parse_entries(&value, b"taste buddies", version)?;
        let random_peers = parse_entries(&value, b"random peers", version)?;

        let collected_torrents = match value.get(b"collected torrents") {
            None => Vec::new(),
            Some(list) => list
                .as_list()
                .ok_or_else(|| bad("collected torrents is not a list"))?
                .iter()
                .map(parse_infohash)
                .collect::<Result<Vec<_>, _>>()?,
        };

        let connectable = match value.get_int(b"connectable") {
            None | Some(0) => false,
            Some(1) => true,
            Some(other) => return Err(bad(format!("connectable = {}", other))),
        };

        let stats = if version >= OVERLAY_VERSION_STATS {
            match (
                value.get_int(b"npeers"),
                value.get_int(b"nfiles"),
                value.get_int(b"ndls"),
            ) {
                (Some(npeers), Some(nfiles), Some(ndls)) => Some(CastStats {
                    npeers: non_negative(npeers, "npeers")?,
                    nfiles: non_negative(nfiles, "nfiles")?,
                    ndls: non_negative(ndls, "ndls")?,
                }),
                _ => None,
            }
        } else {
            None
        };

        Ok(Self {
            ip,
            port,
            name,
            preferences,
            taste_buddies,
            random_peers,
            collected_torrents,
            connectable,
            stats,
        })
    }

    /// The cast as an overlay frame.
    pub fn to_frame(&self, version: u32, limit: usize) -> Result<Bytes, GossipError> {
        let body = self.encode(version, limit)?;
        let mut frame = BytesMut::with_capacity(1 + body.len());
        frame.put_u8(CAST_MESSAGE_ID);
        frame.put_slice(&body);
        Ok(frame.freeze())
    }
}

/// A message on an overlay connection. The first byte is the message id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverlayFrame {
    Cast(Bytes),
    KeepAlive,
    /// Some other overlay protocol's message; not ours to handle.
    Other(u8),
}

impl OverlayFrame {
    pub fn parse(mut payload: Bytes) -> Result<Self, GossipError> {
        if payload.is_empty() {
            return Err(bad("empty overlay frame"));
        }
        let id = payload.split_to(1)[0];
        Ok(match id {
            CAST_MESSAGE_ID => OverlayFrame::Cast(payload),
            KEEP_ALIVE_ID => OverlayFrame::KeepAlive,
            other => OverlayFrame::Other(other),
        })
    }

    pub fn keep_alive() -> Bytes {
        Bytes::from_static(&[KEEP_ALIVE_ID])
    }
}

fn bad(reason: impl Into<String>) -> GossipError {
    GossipError::BadEncoding(reason.into())
}

fn clamp_u64(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

fn non_negative(v: i64, field: &str) -> Result<u64, GossipError> {
    u64::try_from(v).map_err(|_| bad(format!("negative {}", field)))
}

fn parse_ip(s: &str) -> Result<IpAddr, GossipError> {
    s.parse().map_err(|_| bad(format!("invalid ip {:?}", s)))
}

fn parse_port(v: i64) -> Result<u16, GossipError> {
    u16::try_from(v)
        .ok()
        .filter(|&p| p != 0)
        .ok_or_else(|| bad(format!("invalid port {}", v)))
}

fn parse_infohash(v: &Value) -> Result<InfoHash, GossipError> {
    v.as_bytes()
        .and_then(|b| InfoHash::try_from(&b[..]).ok())
        .ok_or_else(|| bad("infohash is not 20 bytes"))
}

fn parse_preference(v: &Value, version: u32) -> Result<Preference, GossipError> {
    if version < OVERLAY_VERSION_CLICKLOG {
        return parse_infohash(v).map(Preference::new);
    }
    let fields = v
        .as_list()
        .ok_or_else(|| bad("click-log preference is not a list"))?;
    let [hash, terms, position, reranking, ..] = fields else {
        return Err(bad("click-log preference too short"));
    };
    let terms = terms
        .as_list()
        .ok_or_else(|| bad("search terms are not a list"))?
        .iter()
        .map(|t| t.as_integer().ok_or_else(|| bad("search term is not an integer")))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Preference {
        infohash: parse_infohash(hash)?,
        click: Some(ClickLog {
            terms,
            position: position
                .as_integer()
                .ok_or_else(|| bad("position is not an integer"))?,
            reranking: reranking
                .as_integer()
                .ok_or_else(|| bad("reranking is not an integer"))?,
        }),
    })
}

fn parse_entries(cast: &Value, key: &[u8], version: u32) -> Result<Vec<PeerEntry>, GossipError> {
    let Some(list) = cast.get(key) else {
        return Ok(Vec::new());
    };
    list.as_list()
        .ok_or_else(|| bad("peer list is not a list"))?
        .iter()
        .map(|v| parse_entry(v, version))
        .collect()
}

fn parse_entry(v: &Value, version: u32) -> Result<PeerEntry, GossipError> {
    if v.as_dict().is_none() {
        return Err(bad("peer entry is not a dictionary"));
    }
    let permid = v.get_bytes(b"permid").ok_or_else(|| bad("peer entry without permid"))?;
    if permid.is_empty() || permid.len() > MAX_PERMID_LEN {
        return Err(bad("invalid permid length"));
    }
    let ip = parse_ip(v.get_str(b"ip").ok_or_else(|| bad("peer entry without ip"))?)?;
    let port = parse_port(v.get_int(b"port").ok_or_else(|| bad("peer entry without port"))?)?;
    let age = non_negative(v.get_int(b"age").unwrap_or(0), "age")?;
    let similarity = v.get_int(b"similarity").unwrap_or(0);

    let (oversion, nfiles) = if version >= OVERLAY_VERSION_CLICKLOG {
        let oversion = v
            .get_int(b"oversion")
            .map(|o| u32::try_from(o).map_err(|_| bad("invalid oversion")))
            .transpose()?;
        let nfiles = v
            .get_int(b"nfiles")
            .map(|n| non_negative(n, "nfiles"))
            .transpose()?;
        (oversion, nfiles)
    } else {
        (None, None)
    };

    Ok(PeerEntry {
        permid: PermId(permid.clone()),
        ip,
        port,
        age,
        similarity,
        oversion,
        nfiles,
    })
}

fn encode_entry(e: &PeerEntry, clicklog: bool, with_similarity: bool) -> Value {
    let mut dict = Value::dict()
        .bytes("permid", &e.permid.0)
        .str("ip", &e.ip.to_string())
        .int("port", i64::from(e.port))
        .int("age", clamp_u64(e.age));
    if with_similarity {
        dict = dict.int("similarity", e.similarity);
    }
    if clicklog {
        if let Some(oversion) = e.oversion {
            dict = dict.int("oversion", i64::from(oversion));
        }
        if let Some(nfiles) = e.nfiles {
            dict = dict.int("nfiles", clamp_u64(nfiles));
        }
    }
    dict.build()
}

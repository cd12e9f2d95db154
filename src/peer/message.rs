use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::chunk::Chunk;
use super::error::PeerError;
use crate::constants::{HASHPIECE_ID, MAX_MESSAGE_SIZE};
use crate::merkle::UncleList;

/// Single-byte ids of the messages this engine understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageId {
    Choke = 0,
    Unchoke = 1,
    Interested = 2,
    NotInterested = 3,
    Have = 4,
    Bitfield = 5,
    Request = 6,
    Piece = 7,
    Cancel = 8,
    HashPiece = HASHPIECE_ID,
}

impl MessageId {
    /// Maps a wire byte to a known id; unknown ids are not an error.
    pub fn from_byte(value: u8) -> Option<Self> {
        Some(match value {
            0 => MessageId::Choke,
            1 => MessageId::Unchoke,
            2 => MessageId::Interested,
            3 => MessageId::NotInterested,
            4 => MessageId::Have,
            5 => MessageId::Bitfield,
            6 => MessageId::Request,
            7 => MessageId::Piece,
            8 => MessageId::Cancel,
            HASHPIECE_ID => MessageId::HashPiece,
            _ => return None,
        })
    }
}

/// A framed peer wire message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have { piece: u32 },
    Bitfield(Bytes),
    Request(Chunk),
    Piece { piece: u32, offset: u32, data: Bytes },
    Cancel(Chunk),
    /// PIECE with the Merkle uncle hashes needed to verify it.
    HashPiece {
        piece: u32,
        offset: u32,
        uncles: UncleList,
        data: Bytes,
    },
    /// A message id from a newer protocol revision; the host drops it.
    Unknown { id: u8, payload: Bytes },
}

impl Message {
    /// Encodes the message with its 4-byte big-endian length prefix.
    pub fn encode(&self) -> Bytes {
        let mut body = BytesMut::new();

        match self {
            Message::KeepAlive => {}
            Message::Choke => body.put_u8(MessageId::Choke as u8),
            Message::Unchoke => body.put_u8(MessageId::Unchoke as u8),
            Message::Interested => body.put_u8(MessageId::Interested as u8),
            Message::NotInterested => body.put_u8(MessageId::NotInterested as u8),
            Message::Have { piece } => {
                body.put_u8(MessageId::Have as u8);
                body.put_u32(*piece);
            }
            Message::Bitfield(bits) => {
                body.put_u8(MessageId::Bitfield as u8);
                body.put_slice(bits);
            }
            Message::Request(chunk) => {
                body.put_u8(MessageId::Request as u8);
                put_chunk(&mut body, chunk);
            }
            Message::Piece {
                piece,
                offset,
                data,
            } => {
                body.put_u8(MessageId::Piece as u8);
                body.put_u32(*piece);
                body.put_u32(*offset);
                body.put_slice(data);
            }
            Message::Cancel(chunk) => {
                body.put_u8(MessageId::Cancel as u8);
                put_chunk(&mut body, chunk);
            }
            Message::HashPiece {
                piece,
                offset,
                uncles,
                data,
            } => {
                let hashes = uncles.to_bencode();
                body.put_u8(MessageId::HashPiece as u8);
                body.put_u32(*piece);
                body.put_u32(*offset);
                body.put_u32(hashes.len() as u32);
                body.put_slice(&hashes);
                body.put_slice(data);
            }
            Message::Unknown { id, payload } => {
                body.put_u8(*id);
                body.put_slice(payload);
            }
        }

        let mut frame = BytesMut::with_capacity(4 + body.len());
        frame.put_u32(body.len() as u32);
        frame.extend_from_slice(&body);
        frame.freeze()
    }

    /// Decodes one length-prefixed frame.
    pub fn decode(mut frame: Bytes) -> Result<Self, PeerError> {
        if frame.len() < 4 {
            return Err(PeerError::InvalidMessage("too short".into()));
        }

        let length = frame.get_u32() as usize;
        if length > MAX_MESSAGE_SIZE {
            return Err(PeerError::InvalidMessage(format!(
                "frame of {} bytes",
                length
            )));
        }
        if frame.remaining() < length {
            return Err(PeerError::InvalidMessage("incomplete message".into()));
        }
        if length == 0 {
            return Ok(Message::KeepAlive);
        }

        let mut body = frame.split_to(length);
        let raw_id = body.get_u8();
        let Some(id) = MessageId::from_byte(raw_id) else {
            return Ok(Message::Unknown {
                id: raw_id,
                payload: body,
            });
        };

        let message = match id {
            MessageId::Choke => Message::Choke,
            MessageId::Unchoke => Message::Unchoke,
            MessageId::Interested => Message::Interested,
            MessageId::NotInterested => Message::NotInterested,
            MessageId::Have => {
                need(&body, 4, "have")?;
                Message::Have {
                    piece: body.get_u32(),
                }
            }
            MessageId::Bitfield => Message::Bitfield(body),
            MessageId::Request => {
                need(&body, 12, "request")?;
                Message::Request(get_chunk(&mut body))
            }
            MessageId::Cancel => {
                need(&body, 12, "cancel")?;
                Message::Cancel(get_chunk(&mut body))
            }
            MessageId::Piece => {
                need(&body, 8, "piece")?;
                let piece = body.get_u32();
                let offset = body.get_u32();
                Message::Piece {
                    piece,
                    offset,
                    data: body,
                }
            }
            MessageId::HashPiece => {
                need(&body, 12, "hashpiece")?;
                let piece = body.get_u32();
                let offset = body.get_u32();
                let hashes_len = body.get_u32() as usize;
                need(&body, hashes_len, "hashpiece uncles")?;
                let hashes = body.split_to(hashes_len);
                Message::HashPiece {
                    piece,
                    offset,
                    uncles: UncleList::from_bencode(&hashes)?,
                    data: body,
                }
            }
        };

        Ok(message)
    }
}

fn need(body: &Bytes, len: usize, what: &str) -> Result<(), PeerError> {
    if body.remaining() < len {
        return Err(PeerError::InvalidMessage(format!("{} too short", what)));
    }
    Ok(())
}

fn put_chunk(buf: &mut BytesMut, chunk: &Chunk) {
    buf.put_u32(chunk.piece);
    buf.put_u32(chunk.offset);
    buf.put_u32(chunk.length);
}

fn get_chunk(buf: &mut Bytes) -> Chunk {
    Chunk::new(buf.get_u32(), buf.get_u32(), buf.get_u32())
}

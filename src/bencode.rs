//! Bencode encoding and decoding ([BEP-3]).
//!
//! Gossip casts and Merkle uncle lists travel bencoded. The decoder is
//! strict (no leading zeros, no trailing bytes, bounded nesting) because its
//! input comes straight from untrusted peers, and [`decode_limited`] lets
//! callers refuse oversized payloads before any parsing work is done.
//!
//! ```
//! use swarmcast::bencode::{decode, encode, Value};
//!
//! let value = decode(b"d4:porti7762e4:name5:alicee").unwrap();
//! assert_eq!(value.get_int(b"port"), Some(7762));
//! assert_eq!(value.get_str(b"name"), Some("alice"));
//! assert_eq!(encode(&value).unwrap(), b"d4:name5:alice4:porti7762ee");
//! ```
//!
//! [BEP-3]: http://bittorrent.org/beps/bep_0003.html

mod decode;
mod encode;
mod error;
mod value;

pub use decode::{decode, decode_limited};
pub use encode::{encode, encoded_len};
pub use error::BencodeError;
pub use value::{DictBuilder, Value};

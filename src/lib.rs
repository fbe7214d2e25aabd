// needed by the `select!` macro reaching the default recursion limit
#![recursion_limit = "256"]

#[macro_use]
extern crate serde_derive;

mod bitfield;
mod conf;
mod download;
pub mod engine;
pub mod error;
pub mod metainfo;
mod peer;
mod peer_addr;
pub mod tracker;

pub use bitfield::Bitfield;
pub use conf::{random_peer_id, Conf, LEECHCORE_CLIENT_ID};
pub use engine::{download, PieceResult};
pub use error::{Error, Result};
pub use metainfo::Metainfo;
pub use peer_addr::parse_compact_peers;

/// The type of a piece's index.
///
/// On the wire all integers are sent as 4-byte big endian integers, but in the
/// source code we use `usize` to be consistent with other index types in Rust.
pub type PieceIndex = usize;

/// The peer ID is an arbitrary 20 byte string.
///
/// Guidelines for choosing a peer ID: http://bittorrent.org/beps/bep_0020.html.
pub type PeerId = [u8; 20];

/// A SHA-1 hash digest, 20 bytes long.
pub type Sha1Hash = [u8; 20];

/// This is the only block length we're dealing with (except for possibly the
/// last block of a piece). It is the widely used and accepted 16 KiB.
pub(crate) const BLOCK_LEN: u32 = 0x4000;

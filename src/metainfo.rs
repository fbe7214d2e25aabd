//! Decodes the bencoded `.torrent` metainfo file into the record the
//! download engine consumes.
//!
//! Parsing the metainfo descriptor is an external collaborator of the core
//! engine (it does not call back into `engine`), but is implemented here in
//! full so the crate is usable end to end.

use serde_bytes::ByteBuf;
use sha1::{Digest, Sha1};

use crate::error::{Error, Result};
use crate::{PieceIndex, Sha1Hash};

#[derive(Debug, Serialize, Deserialize)]
struct RawMetainfo {
    announce: String,
    info: RawInfo,
}

#[derive(Debug, Serialize, Deserialize)]
struct RawInfo {
    name: String,
    #[serde(with = "serde_bytes")]
    pieces: ByteBuf,
    #[serde(rename = "piece length")]
    piece_length: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    length: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    files: Option<Vec<RawFile>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    private: Option<u8>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RawFile {
    path: Vec<String>,
    length: u64,
}

/// A parsed, ready-to-download torrent.
///
/// Single-file torrents only: the core and this crate's tracker/metainfo
/// collaborators do not support multi-file archives, which is an explicit
/// non-goal of this crate.
#[derive(Clone, Debug)]
pub struct Metainfo {
    /// The tracker URL to announce to.
    pub announce: String,
    /// SHA-1 of the canonical bencoded `info` dictionary.
    pub info_hash: Sha1Hash,
    /// The expected hash of each piece, in piece order.
    pub piece_hashes: Vec<Sha1Hash>,
    /// The nominal length of a piece, taken from the info dictionary's
    /// `piece length` field (not from `length` — see REDESIGN FLAGS in
    /// SPEC_FULL.md).
    pub piece_length: u32,
    /// The total length of the downloaded content, in bytes.
    pub length: u64,
    /// The torrent's name, used only cosmetically.
    pub name: String,
}

impl Metainfo {
    /// Parses a `.torrent` file's raw bytes into a [`Metainfo`].
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        let raw: RawMetainfo = serde_bencode::from_bytes(buf)?;

        if raw.info.files.is_some() {
            return Err(Error::InvalidMetainfo(
                "multi-file torrents are not supported".into(),
            ));
        }
        let length = raw.info.length.ok_or_else(|| {
            Error::InvalidMetainfo(
                "single-file info dict missing length".into(),
            )
        })?;

        let info_bytes = serde_bencode::to_bytes(&raw.info)?;
        let digest = Sha1::digest(&info_bytes);
        let mut info_hash = [0u8; 20];
        info_hash.copy_from_slice(&digest);

        let piece_hashes = split_piece_hashes(raw.info.pieces.as_ref())?;

        Ok(Self {
            announce: raw.announce,
            info_hash,
            piece_hashes,
            piece_length: raw.info.piece_length,
            length,
            name: raw.info.name,
        })
    }

    /// The number of pieces in the torrent.
    pub fn piece_count(&self) -> usize {
        self.piece_hashes.len()
    }

    /// Returns the length, in bytes, of the piece at `index`.
    ///
    /// All pieces but the last are `piece_length` bytes; the last piece is
    /// shorter whenever `length` is not an exact multiple of
    /// `piece_length`.
    pub fn piece_len(&self, index: PieceIndex) -> u32 {
        let begin = index as u64 * self.piece_length as u64;
        let end = (begin + self.piece_length as u64).min(self.length);
        (end - begin) as u32
    }
}

fn split_piece_hashes(buf: &[u8]) -> Result<Vec<Sha1Hash>> {
    const HASH_LEN: usize = 20;
    if buf.len() % HASH_LEN != 0 {
        return Err(Error::InvalidMetainfo(format!(
            "pieces field length {} is not a multiple of {}",
            buf.len(),
            HASH_LEN
        )));
    }
    Ok(buf
        .chunks_exact(HASH_LEN)
        .map(|chunk| {
            let mut hash = [0u8; HASH_LEN];
            hash.copy_from_slice(chunk);
            hash
        })
        .collect())
}

//! Crate-wide error type.
//!
//! There is no `thiserror` in the dependency graph, so `Error` implements
//! `std::error::Error` and `Display` by hand, the way the rest of this
//! crate's stack (`serde_bencode`, `reqwest`) does.

use std::fmt;

/// The result type used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong while decoding a torrent, announcing to a
/// tracker, or running the download engine.
#[derive(Debug)]
pub enum Error {
    /// A handshake, message frame or compact peer list did not conform to
    /// the wire format (bad length prefix, wrong message ID, truncated
    /// frame, out-of-bounds block offset, etc).
    InvalidMessage(String),
    /// The peer's handshake carried an info hash other than the one we
    /// asked for.
    InvalidPeerInfoHash,
    /// The first message a peer sent after the handshake was not a
    /// Bitfield.
    PeerNotSeed,
    /// A downloaded piece's bytes did not hash to the expected value.
    PieceHashMismatch { index: crate::PieceIndex },
    /// An I/O operation failed or exceeded its deadline.
    Io(std::io::Error),
    /// An I/O deadline elapsed.
    Timeout(tokio::time::error::Elapsed),
    /// The bencoded metainfo or tracker response could not be decoded.
    Bencode(serde_bencode::Error),
    /// The tracker's compact peer list was not a multiple of 6 bytes.
    InvalidPeerList,
    /// The tracker's `info` dictionary was missing `piece length` or
    /// `pieces`, or `pieces` was not a multiple of 20 bytes.
    InvalidMetainfo(String),
    /// The tracker responded with an explicit `failure reason`.
    TrackerFailure(String),
    /// The tracker announce request itself failed (network, TLS, status).
    Tracker(reqwest::Error),
    /// No peer remains that could make progress on the remaining pieces:
    /// every worker has exited but the piece count has not been reached.
    Stalled,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidMessage(msg) => write!(f, "invalid message: {}", msg),
            Self::InvalidPeerInfoHash => {
                write!(f, "peer handshake info hash mismatch")
            }
            Self::PeerNotSeed => {
                write!(f, "peer did not send a bitfield after handshake")
            }
            Self::PieceHashMismatch { index } => {
                write!(f, "piece {} failed integrity check", index)
            }
            Self::Io(e) => write!(f, "io error: {}", e),
            Self::Timeout(e) => write!(f, "io deadline elapsed: {}", e),
            Self::Bencode(e) => write!(f, "bencode error: {}", e),
            Self::InvalidPeerList => {
                write!(f, "compact peer list length is not a multiple of 6")
            }
            Self::InvalidMetainfo(msg) => write!(f, "invalid metainfo: {}", msg),
            Self::TrackerFailure(msg) => write!(f, "tracker failure: {}", msg),
            Self::Tracker(e) => write!(f, "tracker request failed: {}", e),
            Self::Stalled => write!(
                f,
                "no remaining peer advertises a still-needed piece"
            ),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Timeout(e) => Some(e),
            Self::Bencode(e) => Some(e),
            Self::Tracker(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(e: tokio::time::error::Elapsed) -> Self {
        Self::Timeout(e)
    }
}

impl From<serde_bencode::Error> for Error {
    fn from(e: serde_bencode::Error) -> Self {
        Self::Bencode(e)
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Self::Tracker(e)
    }
}

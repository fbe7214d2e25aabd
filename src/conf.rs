//! This module defines types used to configure the engine and its parts.

use std::time::Duration;

use rand::Rng;

use crate::PeerId;

/// The default leechcore client id.
pub const LEECHCORE_CLIENT_ID: &PeerId = b"-lc0001-000000000000";

/// Generates a fresh, cryptographically random peer ID.
///
/// The core never generates its own peer ID (spec.md §6: the caller
/// supplies one, chosen once per download), but picking 20 random bytes
/// is the caller's entire job, so it's provided here rather than left as
/// an exercise.
pub fn random_peer_id() -> PeerId {
    rand::thread_rng().gen::<PeerId>()
}

/// The only block length the core deals with, except possibly for the last
/// block of the last piece: the widely used and accepted 16 KiB.
pub const MAX_BLOCK_LEN: u32 = crate::BLOCK_LEN;

/// The configuration for the download engine and its peer sessions.
///
/// Reasonable defaults, matching the values spec'd by the BitTorrent wire
/// protocol and this engine's pipelining strategy, are provided by
/// [`Conf::new`]; a caller may override any field before starting a
/// download.
#[derive(Clone, Copy, Debug)]
pub struct Conf {
    /// The ID of the client to announce to trackers and send in handshakes.
    pub client_id: PeerId,
    /// The maximum number of outstanding block requests a piece download
    /// keeps in flight at once.
    pub max_backlog: usize,
    /// The block size used for all requests except possibly the last block
    /// of a piece.
    pub max_block_len: u32,
    /// How long a peer dial is allowed to take before failing the session.
    pub dial_timeout: Duration,
    /// How long the handshake exchange (send + receive) is allowed to take.
    pub handshake_timeout: Duration,
    /// How long the initial post-handshake bitfield read is allowed to take.
    pub bitfield_timeout: Duration,
    /// How long a single piece download attempt is allowed to take, counted
    /// from the first request sent to the last block received.
    pub piece_timeout: Duration,
}

impl Conf {
    /// Returns the engine configuration with reasonable defaults and the
    /// default client id, [`LEECHCORE_CLIENT_ID`].
    pub fn new() -> Self {
        Self::default()
    }
}

impl Default for Conf {
    fn default() -> Self {
        Self {
            client_id: *LEECHCORE_CLIENT_ID,
            max_backlog: 5,
            max_block_len: MAX_BLOCK_LEN,
            dial_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(3),
            bitfield_timeout: Duration::from_secs(5),
            piece_timeout: Duration::from_secs(30),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_peer_id_is_not_deterministic() {
        // not a strong randomness test, just a guard against an
        // accidental constant return value
        assert_ne!(random_peer_id(), random_peer_id());
    }

    #[test]
    fn default_conf_matches_spec_constants() {
        let conf = Conf::new();
        assert_eq!(conf.max_backlog, 5);
        assert_eq!(conf.max_block_len, 16384);
        assert_eq!(conf.dial_timeout, Duration::from_secs(10));
        assert_eq!(conf.handshake_timeout, Duration::from_secs(3));
        assert_eq!(conf.bitfield_timeout, Duration::from_secs(5));
        assert_eq!(conf.piece_timeout, Duration::from_secs(30));
    }
}

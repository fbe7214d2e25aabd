//! Announces to a torrent's tracker over HTTP and decodes the response
//! into a compact peer list (SPEC_FULL.md §4.10).
//!
//! Like [`crate::metainfo`], this is an external collaborator the core
//! download engine never calls into: it produces the `peers` list the
//! engine's entry point consumes, nothing more.

use std::net::SocketAddr;

use percent_encoding::{percent_encode, NON_ALPHANUMERIC};
use serde_bytes::ByteBuf;

use crate::{
    error::{Error, Result},
    peer_addr::parse_compact_peers,
    Metainfo, PeerId,
};

/// The port this client claims to be listening on when announcing.
///
/// The core never actually listens for incoming connections — it is a
/// leecher only, and seeding is an explicit Non-goal (spec.md §1) — but
/// the tracker protocol still requires a port number in the query.
pub const LISTEN_PORT: u16 = 6881;

#[derive(Debug, Serialize, Deserialize)]
struct RawResponse {
    #[serde(rename = "failure reason", skip_serializing_if = "Option::is_none")]
    failure_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    interval: Option<u64>,
    #[serde(with = "serde_bytes", default)]
    peers: ByteBuf,
}

/// The result of a successful announce: the tracker's requested
/// re-announce interval (if it sent one) and the decoded compact peer
/// list.
#[derive(Debug)]
pub struct TrackerResponse {
    pub interval: Option<u64>,
    pub peers: Vec<SocketAddr>,
}

/// Builds the tracker announce URL for `metainfo`.
///
/// The two binary query parameters, `info_hash` and `peer_id`, are
/// percent-encoded by hand rather than handed to a string-typed query
/// encoder: both are raw 20-byte digests, not valid UTF-8, and most HTTP
/// client query builders would mangle or reject them.
fn build_announce_url(
    metainfo: &Metainfo,
    peer_id: PeerId,
    port: u16,
    uploaded: u64,
    downloaded: u64,
) -> String {
    let left = metainfo.length.saturating_sub(downloaded);
    format!(
        "{}?info_hash={}&peer_id={}&port={}&uploaded={}&downloaded={}&left={}&compact=1",
        metainfo.announce,
        percent_encode(&metainfo.info_hash, NON_ALPHANUMERIC),
        percent_encode(&peer_id, NON_ALPHANUMERIC),
        port,
        uploaded,
        downloaded,
        left,
    )
}

/// Decodes a tracker's raw bencoded response body.
///
/// A `failure reason` key fails the request with that message; otherwise
/// the compact peer list is decoded via [`parse_compact_peers`]. The
/// tracker's non-compact, dictionary-of-peers response model is not
/// supported, matching the compact-only behavior this crate is modeled
/// on (SPEC_FULL.md §3).
fn decode_response(body: &[u8]) -> Result<TrackerResponse> {
    let raw: RawResponse = serde_bencode::from_bytes(body)?;
    if let Some(reason) = raw.failure_reason {
        return Err(Error::TrackerFailure(reason));
    }
    let peers = parse_compact_peers(raw.peers.as_ref())?;
    Ok(TrackerResponse { interval: raw.interval, peers })
}

/// Announces to `metainfo`'s tracker and returns its peer list.
///
/// `peer_id` should be chosen once per download (spec.md §6: "the caller
/// supplies a 20-byte peer ID, cryptographically random"); `uploaded` and
/// `downloaded` are this session's running totals in bytes, used only to
/// compute `left` and to report honest statistics to the tracker.
pub async fn announce(
    metainfo: &Metainfo,
    peer_id: PeerId,
    port: u16,
    uploaded: u64,
    downloaded: u64,
) -> Result<TrackerResponse> {
    let url = build_announce_url(metainfo, peer_id, port, uploaded, downloaded);

    let client = reqwest::Client::new();
    let body = client.get(&url).send().await?.bytes().await?;
    decode_response(&body)
}

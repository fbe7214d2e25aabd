//! A single peer's TCP connection and the session state layered on top of
//! it: the handshake/bitfield handshake sequence and typed message
//! send/receive. Owned exclusively by the worker task that creates it for
//! its entire lifetime — no state here is ever shared across peers.

use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::codec::{Framed, FramedParts};

use super::codec::{Handshake, HandshakeCodec, Message, PeerCodec};
use crate::{
    bitfield::{self, Bitfield},
    error::{Error, Result},
    Conf, PeerId, Sha1Hash,
};

/// An established, post-handshake connection to a single peer.
pub(crate) struct PeerSession {
    socket: Framed<TcpStream, PeerCodec>,
    /// Whether the peer is currently choking us. Starts `true`.
    pub(crate) choked: bool,
    /// The peer's advertised piece availability.
    pub(crate) bitfield: Bitfield,
}

impl PeerSession {
    /// Dials `addr`, performs the handshake, and waits for the peer's
    /// initial Bitfield message, per spec.md §4.5:
    ///
    /// 1. dial with a connect timeout;
    /// 2. exchange handshakes under a single deadline, rejecting an info
    ///    hash mismatch;
    /// 3. read the first post-handshake message under its own deadline,
    ///    requiring it to be a Bitfield.
    pub(crate) async fn connect(
        addr: SocketAddr,
        info_hash: Sha1Hash,
        peer_id: PeerId,
        conf: &Conf,
    ) -> Result<Self> {
        log::info!("Connecting to peer {}", addr);
        let socket = timeout(conf.dial_timeout, TcpStream::connect(addr))
            .await??;
        log::info!("Connected to peer {}", addr);

        let socket = timeout(
            conf.handshake_timeout,
            Self::handshake(socket, info_hash, peer_id),
        )
        .await??;

        let mut socket = socket;
        let bitfield = timeout(
            conf.bitfield_timeout,
            Self::receive_initial_bitfield(&mut socket),
        )
        .await??;

        Ok(Self { socket, choked: true, bitfield })
    }

    async fn handshake(
        socket: TcpStream,
        info_hash: Sha1Hash,
        peer_id: PeerId,
    ) -> Result<Framed<TcpStream, PeerCodec>> {
        let mut socket = Framed::new(socket, HandshakeCodec);

        let handshake = Handshake::new(info_hash, peer_id);
        socket.send(handshake).await?;

        let peer_handshake = socket
            .next()
            .await
            .ok_or_else(|| Error::InvalidMessage("peer closed before handshake".into()))??;
        if peer_handshake.info_hash != info_hash {
            log::info!(
                "peer sent info hash {} but we expected {}",
                hex::encode(peer_handshake.info_hash),
                hex::encode(info_hash)
            );
            return Err(Error::InvalidPeerInfoHash);
        }

        // switch codecs, carrying over any bytes already buffered past the
        // handshake frame
        let old_parts = socket.into_parts();
        let mut new_parts = FramedParts::new(old_parts.io, PeerCodec);
        new_parts.read_buf = old_parts.read_buf;
        new_parts.write_buf = old_parts.write_buf;
        Ok(Framed::from_parts(new_parts))
    }

    async fn receive_initial_bitfield(
        socket: &mut Framed<TcpStream, PeerCodec>,
    ) -> Result<Bitfield> {
        let msg = socket
            .next()
            .await
            .ok_or_else(|| Error::PeerNotSeed)??;
        match msg {
            Message::Bitfield(bitfield) => Ok(bitfield),
            _ => Err(Error::PeerNotSeed),
        }
    }

    /// Returns whether the peer's bitfield reports `index` as available.
    pub(crate) fn has_piece(&self, index: usize) -> bool {
        bitfield::has(&self.bitfield, index)
    }

    /// Blocks on the next frame from the peer.
    pub(crate) async fn read(&mut self) -> Result<Message> {
        self.socket
            .next()
            .await
            .ok_or_else(|| Error::InvalidMessage("peer closed connection".into()))?
    }

    pub(crate) async fn send_request(
        &mut self,
        piece_index: u32,
        begin: u32,
        len: u32,
    ) -> Result<()> {
        self.socket.send(Message::request(piece_index, begin, len)).await
    }

    pub(crate) async fn send_have(&mut self, piece_index: u32) -> Result<()> {
        self.socket.send(Message::have(piece_index)).await
    }

    pub(crate) async fn send_interested(&mut self) -> Result<()> {
        self.socket.send(Message::Interested).await
    }

    #[allow(dead_code)]
    pub(crate) async fn send_not_interested(&mut self) -> Result<()> {
        self.socket.send(Message::NotInterested).await
    }

    pub(crate) async fn send_unchoke(&mut self) -> Result<()> {
        self.socket.send(Message::Unchoke).await
    }
}

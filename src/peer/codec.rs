//! Wire-format codecs for the BitTorrent peer protocol: the fixed-format
//! handshake (used once per session, before any other codec is active) and
//! the length-prefixed message frames used for the rest of the session.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::{
    bitfield::Bitfield,
    error::{Error, Result},
    PeerId, Sha1Hash,
};

/// The protocol string every handshake carries, per the BitTorrent spec.
pub const PROTOCOL_STRING: &str = "BitTorrent protocol";

/// The session opener exchanged once, before either side speaks the
/// message protocol.
///
/// On-wire layout (`1 + pstr.len() + 48` bytes total):
/// `pstrlen (1) | pstr (pstrlen) | reserved (8, zero) | info_hash (20) |
/// peer_id (20)`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Handshake {
    pub info_hash: Sha1Hash,
    pub peer_id: PeerId,
}

impl Handshake {
    pub fn new(info_hash: Sha1Hash, peer_id: PeerId) -> Self {
        Self { info_hash, peer_id }
    }
}

/// Encodes and decodes [`Handshake`]s. Used as the codec for the first
/// frame of a session only; the connection is then handed over to
/// [`PeerCodec`] for the rest of its lifetime.
pub struct HandshakeCodec;

impl Encoder<Handshake> for HandshakeCodec {
    type Error = Error;

    fn encode(
        &mut self,
        handshake: Handshake,
        buf: &mut BytesMut,
    ) -> Result<()> {
        let pstr = PROTOCOL_STRING.as_bytes();
        buf.reserve(1 + pstr.len() + 48);
        buf.put_u8(pstr.len() as u8);
        buf.put_slice(pstr);
        buf.put_slice(&[0u8; 8]);
        buf.put_slice(&handshake.info_hash);
        buf.put_slice(&handshake.peer_id);
        Ok(())
    }
}

impl Decoder for HandshakeCodec {
    type Item = Handshake;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Handshake>> {
        if buf.is_empty() {
            return Ok(None);
        }
        let pstr_len = buf[0] as usize;
        if pstr_len == 0 {
            return Err(Error::InvalidMessage(
                "handshake pstrlen must not be 0".into(),
            ));
        }
        let total_len = 1 + pstr_len + 48;
        if buf.len() < total_len {
            buf.reserve(total_len - buf.len());
            return Ok(None);
        }

        let mut frame = buf.split_to(total_len);
        frame.advance(1 + pstr_len + 8);
        let mut info_hash = [0u8; 20];
        info_hash.copy_from_slice(&frame[0..20]);
        let mut peer_id = [0u8; 20];
        peer_id.copy_from_slice(&frame[20..40]);

        Ok(Some(Handshake { info_hash, peer_id }))
    }
}

/// The numeric wire value of each message kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum MessageId {
    Choke = 0,
    Unchoke = 1,
    Interested = 2,
    NotInterested = 3,
    Have = 4,
    Bitfield = 5,
    Request = 6,
    Piece = 7,
    Cancel = 8,
}

impl MessageId {
    fn from_u8(id: u8) -> Option<Self> {
        Some(match id {
            0 => Self::Choke,
            1 => Self::Unchoke,
            2 => Self::Interested,
            3 => Self::NotInterested,
            4 => Self::Have,
            5 => Self::Bitfield,
            6 => Self::Request,
            7 => Self::Piece,
            8 => Self::Cancel,
            _ => return None,
        })
    }
}

/// A single peer protocol message, including the zero-length keep-alive
/// (which has no message ID on the wire).
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Message {
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have { piece_index: u32 },
    Bitfield(Bitfield),
    Request { piece_index: u32, begin: u32, len: u32 },
    /// Named `Block` rather than the wire name `Piece` to avoid clashing
    /// with the piece/work vocabulary used the rest of this crate: this is
    /// a single block of piece data, not a whole piece.
    Block { piece_index: u32, begin: u32, data: Vec<u8> },
    Cancel { piece_index: u32, begin: u32, len: u32 },
}

impl Message {
    pub(crate) fn request(piece_index: u32, begin: u32, len: u32) -> Self {
        Self::Request { piece_index, begin, len }
    }

    pub(crate) fn have(piece_index: u32) -> Self {
        Self::Have { piece_index }
    }
}

/// Parses a [`Message::Have`] payload, requiring ID 4 and a payload length
/// of exactly 4 bytes.
pub(crate) fn parse_have(msg: &Message) -> Result<u32> {
    match msg {
        Message::Have { piece_index } => Ok(*piece_index),
        other => Err(Error::InvalidMessage(format!(
            "expected Have, got {:?}",
            other
        ))),
    }
}

/// Parses a [`Message::Block`] payload into `dest`, requiring that the
/// parsed piece index equal `expected_index`, the begin offset lie within
/// `dest`, and the block not overrun `dest`. Returns the number of bytes
/// written.
pub(crate) fn parse_piece(
    expected_index: u32,
    dest: &mut [u8],
    msg: &Message,
) -> Result<usize> {
    let (piece_index, begin, data) = match msg {
        Message::Block { piece_index, begin, data } => (*piece_index, *begin, data),
        other => {
            return Err(Error::InvalidMessage(format!(
                "expected Piece, got {:?}",
                other
            )))
        }
    };
    if piece_index != expected_index {
        return Err(Error::InvalidMessage(format!(
            "expected piece index {} but got {}",
            expected_index, piece_index
        )));
    }
    let begin = begin as usize;
    if begin >= dest.len() {
        return Err(Error::InvalidMessage(format!(
            "block begin {} is past buffer end {}",
            begin,
            dest.len()
        )));
    }
    if begin + data.len() > dest.len() {
        return Err(Error::InvalidMessage(
            "block data overruns piece buffer".into(),
        ));
    }
    dest[begin..begin + data.len()].copy_from_slice(data);
    Ok(data.len())
}

/// Encodes and decodes the length-prefixed [`Message`] frames used for the
/// bulk of a peer session, after the handshake.
pub(crate) struct PeerCodec;

impl Encoder<Message> for PeerCodec {
    type Error = Error;

    fn encode(&mut self, msg: Message, buf: &mut BytesMut) -> Result<()> {
        match msg {
            Message::KeepAlive => buf.put_u32(0),
            Message::Choke => encode_header(buf, MessageId::Choke, 0),
            Message::Unchoke => encode_header(buf, MessageId::Unchoke, 0),
            Message::Interested => encode_header(buf, MessageId::Interested, 0),
            Message::NotInterested => {
                encode_header(buf, MessageId::NotInterested, 0)
            }
            Message::Have { piece_index } => {
                encode_header(buf, MessageId::Have, 4);
                buf.put_u32(piece_index);
            }
            Message::Bitfield(bitfield) => {
                let bytes = bitfield.into_vec();
                encode_header(buf, MessageId::Bitfield, bytes.len() as u32);
                buf.put_slice(&bytes);
            }
            Message::Request { piece_index, begin, len } => {
                encode_header(buf, MessageId::Request, 12);
                buf.put_u32(piece_index);
                buf.put_u32(begin);
                buf.put_u32(len);
            }
            Message::Block { piece_index, begin, data } => {
                encode_header(buf, MessageId::Piece, 8 + data.len() as u32);
                buf.put_u32(piece_index);
                buf.put_u32(begin);
                buf.put_slice(&data);
            }
            Message::Cancel { piece_index, begin, len } => {
                encode_header(buf, MessageId::Cancel, 12);
                buf.put_u32(piece_index);
                buf.put_u32(begin);
                buf.put_u32(len);
            }
        }
        Ok(())
    }
}

fn encode_header(buf: &mut BytesMut, id: MessageId, payload_len: u32) {
    buf.put_u32(payload_len + 1);
    buf.put_u8(id as u8);
}

impl Decoder for PeerCodec {
    type Item = Message;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Message>> {
        if buf.len() < 4 {
            return Ok(None);
        }
        let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        if len == 0 {
            buf.advance(4);
            return Ok(Some(Message::KeepAlive));
        }
        if buf.len() < 4 + len {
            buf.reserve(4 + len - buf.len());
            return Ok(None);
        }

        buf.advance(4);
        let mut frame = buf.split_to(len);
        let id = frame.get_u8();
        let id = MessageId::from_u8(id).ok_or_else(|| {
            Error::InvalidMessage(format!("unknown message id {}", id))
        })?;
        let payload = frame;

        let msg = match id {
            MessageId::Choke => Message::Choke,
            MessageId::Unchoke => Message::Unchoke,
            MessageId::Interested => Message::Interested,
            MessageId::NotInterested => Message::NotInterested,
            MessageId::Have => {
                if payload.len() != 4 {
                    return Err(Error::InvalidMessage(
                        "Have payload must be 4 bytes".into(),
                    ));
                }
                Message::Have { piece_index: u32::from_be_bytes(payload[0..4].try_into().unwrap()) }
            }
            MessageId::Bitfield => {
                Message::Bitfield(Bitfield::from_vec(payload.to_vec()))
            }
            MessageId::Request => {
                if payload.len() != 12 {
                    return Err(Error::InvalidMessage(
                        "Request payload must be 12 bytes".into(),
                    ));
                }
                Message::Request {
                    piece_index: u32::from_be_bytes(payload[0..4].try_into().unwrap()),
                    begin: u32::from_be_bytes(payload[4..8].try_into().unwrap()),
                    len: u32::from_be_bytes(payload[8..12].try_into().unwrap()),
                }
            }
            MessageId::Piece => {
                if payload.len() < 8 {
                    return Err(Error::InvalidMessage(
                        "Piece payload must be at least 8 bytes".into(),
                    ));
                }
                Message::Block {
                    piece_index: u32::from_be_bytes(payload[0..4].try_into().unwrap()),
                    begin: u32::from_be_bytes(payload[4..8].try_into().unwrap()),
                    data: payload[8..].to_vec(),
                }
            }
            MessageId::Cancel => {
                if payload.len() != 12 {
                    return Err(Error::InvalidMessage(
                        "Cancel payload must be 12 bytes".into(),
                    ));
                }
                Message::Cancel {
                    piece_index: u32::from_be_bytes(payload[0..4].try_into().unwrap()),
                    begin: u32::from_be_bytes(payload[4..8].try_into().unwrap()),
                    len: u32::from_be_bytes(payload[8..12].try_into().unwrap()),
                }
            }
        };

        Ok(Some(msg))
    }
}

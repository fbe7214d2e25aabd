//! A bit-indexed set of piece indices, as advertised by a peer in a Bitfield
//! or Have message.

use bitvec::prelude::{BitVec, Msb0};

/// The piece availability of a peer.
///
/// It is a compact bool vector ordered from most significant to least
/// significant bits, that is, the first (highest) bit of the first byte
/// represents piece 0, the second highest bit piece 1, and so on (e.g.
/// `0b1100_0001` means pieces 0, 1 and 7 are present). This ordering is
/// mandated by the BitTorrent wire protocol and is observable on the wire.
pub type Bitfield = BitVec<u8, Msb0>;

/// Returns whether the bitfield reports piece `index` as present.
///
/// Returns `false` for any `index` outside `[0, 8 * bitfield.len_bytes())`
/// rather than panicking or erroring, per spec: an out-of-range query is
/// never an error.
pub(crate) fn has(bitfield: &Bitfield, index: usize) -> bool {
    bitfield.get(index).map(|bit| *bit).unwrap_or(false)
}

/// Marks piece `index` as present in the bitfield.
///
/// A no-op if `index` is out of range, rather than panicking or growing the
/// bitfield: the peer's advertised piece count is fixed at construction
/// time.
pub(crate) fn set(bitfield: &mut Bitfield, index: usize) {
    if let Some(mut bit) = bitfield.get_mut(index) {
        *bit = true;
    }
}

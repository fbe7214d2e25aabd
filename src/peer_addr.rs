//! Parses the tracker's compact peer list format into dialable addresses.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use crate::error::{Error, Result};

/// Parses a tracker's compact peer list: a byte sequence whose length must
/// be a multiple of 6, each group being a 4-byte IPv4 address followed by a
/// 2-byte big-endian port.
///
/// The reference implementation this crate is modeled on reads the port as
/// a 4-byte big-endian integer from the 2-byte slice, a latent defect; here
/// it is read as the 2-byte value the wire format actually carries.
pub fn parse_compact_peers(buf: &[u8]) -> Result<Vec<SocketAddr>> {
    const RECORD_LEN: usize = 6;
    if buf.len() % RECORD_LEN != 0 {
        return Err(Error::InvalidPeerList);
    }

    Ok(buf
        .chunks_exact(RECORD_LEN)
        .map(|record| {
            let ip = Ipv4Addr::new(record[0], record[1], record[2], record[3]);
            let port = u16::from_be_bytes([record[4], record[5]]);
            SocketAddr::V4(SocketAddrV4::new(ip, port))
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_peer() {
        // 10.0.0.1:6881
        let buf = [10, 0, 0, 1, 0x1A, 0xE1];
        let peers = parse_compact_peers(&buf).unwrap();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].to_string(), "10.0.0.1:6881");
    }

    #[test]
    fn parses_multiple_peers_in_order() {
        let buf = [
            192, 168, 0, 1, 0x00, 0x50, // 192.168.0.1:80
            1, 2, 3, 4, 0x00, 0x35, // 1.2.3.4:53
        ];
        let peers = parse_compact_peers(&buf).unwrap();
        assert_eq!(peers[0].to_string(), "192.168.0.1:80");
        assert_eq!(peers[1].to_string(), "1.2.3.4:53");
    }

    #[test]
    fn port_is_read_as_two_bytes_not_four() {
        // if the port were misread as a 4-byte big-endian integer over
        // bytes [4..8), it would consume part of the next record (or panic
        // on an out-of-bounds slice for the last one); reading exactly 2
        // bytes must yield the correct port here
        let buf = [0, 0, 0, 0, 0xFF, 0xFF];
        let peers = parse_compact_peers(&buf).unwrap();
        assert_eq!(peers[0].port(), 0xFFFF);
    }

    #[test]
    fn rejects_length_not_multiple_of_six() {
        let buf = [0u8; 7];
        assert!(parse_compact_peers(&buf).is_err());
    }

    #[test]
    fn empty_input_yields_empty_list() {
        assert_eq!(parse_compact_peers(&[]).unwrap(), Vec::new());
    }
}

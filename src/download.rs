//! The per-piece download state machine: pipelines block requests over a
//! single peer session, assembles the blocks into a buffer, and verifies
//! the result against the expected hash.

use sha1::{Digest, Sha1};
use tokio::time::timeout;

use crate::{
    error::{Error, Result},
    peer::{codec::Message, session::PeerSession},
    Conf, PieceIndex, Sha1Hash,
};

/// One piece's work item, as handed out by the coordinator's work queue.
///
/// Immutable once created; consumed by a worker, and re-enqueued verbatim
/// on recoverable failure.
#[derive(Clone, Debug)]
pub(crate) struct PieceWork {
    pub(crate) index: PieceIndex,
    pub(crate) expected_hash: Sha1Hash,
    pub(crate) len: u32,
}

/// The ephemeral, per-attempt state of downloading one piece over one
/// session.
struct PieceProgress {
    index: PieceIndex,
    buffer: Vec<u8>,
    downloaded: u32,
    requested: u32,
    backlog: usize,
}

impl PieceProgress {
    fn new(index: PieceIndex, len: u32) -> Self {
        Self {
            index,
            buffer: vec![0u8; len as usize],
            downloaded: 0,
            requested: 0,
            backlog: 0,
        }
    }

    fn is_complete(&self) -> bool {
        self.downloaded as usize == self.buffer.len()
    }
}

/// Attempts to download `work` in full over `session`.
///
/// Per spec.md §4.6:
/// 1. the caller must already have verified the session advertises the
///    piece;
/// 2. a single I/O deadline covers the entire attempt;
/// 3. requests are pipelined up to `conf.max_backlog` in flight, only
///    while the session is not choking us;
/// 4. the assembled buffer is hashed and compared to `work.expected_hash`
///    before being returned — a mismatch fails the attempt and no partial
///    buffer is ever returned.
pub(crate) async fn download_piece(
    session: &mut PeerSession,
    work: &PieceWork,
    conf: &Conf,
) -> Result<Vec<u8>> {
    let buffer = timeout(
        conf.piece_timeout,
        run_download_loop(session, work, conf),
    )
    .await??;

    verify_integrity(work, &buffer)?;
    Ok(buffer)
}

async fn run_download_loop(
    session: &mut PeerSession,
    work: &PieceWork,
    conf: &Conf,
) -> Result<Vec<u8>> {
    let mut progress = PieceProgress::new(work.index, work.len);

    while !progress.is_complete() {
        if !session.choked {
            pump_requests(session, &mut progress, conf).await?;
        }
        read_one_message(session, &mut progress).await?;
    }

    Ok(progress.buffer)
}

async fn pump_requests(
    session: &mut PeerSession,
    progress: &mut PieceProgress,
    conf: &Conf,
) -> Result<()> {
    let piece_len = progress.buffer.len() as u32;
    while progress.backlog < conf.max_backlog && progress.requested < piece_len
    {
        let block_len = conf.max_block_len.min(piece_len - progress.requested);
        session
            .send_request(
                progress.index as u32,
                progress.requested,
                block_len,
            )
            .await?;
        progress.backlog += 1;
        progress.requested += block_len;
    }
    Ok(())
}

async fn read_one_message(
    session: &mut PeerSession,
    progress: &mut PieceProgress,
) -> Result<()> {
    let msg = session.read().await?;
    match msg {
        Message::KeepAlive => {}
        Message::Unchoke => session.choked = false,
        Message::Choke => session.choked = true,
        Message::Have { piece_index } => {
            crate::bitfield::set(&mut session.bitfield, piece_index as usize);
        }
        Message::Block { .. } => {
            let n = crate::peer::codec::parse_piece(
                progress.index as u32,
                &mut progress.buffer,
                &msg,
            )?;
            progress.downloaded += n as u32;
            progress.backlog = progress.backlog.saturating_sub(1);
        }
        // any other message (Interested, NotInterested, Request, Cancel,
        // Bitfield past the initial exchange) is ignored
        _ => {}
    }
    Ok(())
}

fn verify_integrity(work: &PieceWork, buffer: &[u8]) -> Result<()> {
    let digest = Sha1::digest(buffer);
    if digest.as_slice() == work.expected_hash.as_slice() {
        Ok(())
    } else {
        Err(Error::PieceHashMismatch { index: work.index })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn piece_progress_tracks_invariants() {
        let mut progress = PieceProgress::new(0, 100);
        assert!(!progress.is_complete());
        progress.downloaded = 100;
        assert!(progress.is_complete());
    }

    #[test]
    fn verify_integrity_detects_mismatch() {
        let data = b"hello world";
        let digest = Sha1::digest(data);
        let mut good_hash: Sha1Hash = [0u8; 20];
        good_hash.copy_from_slice(&digest);
        let work = PieceWork { index: 0, expected_hash: good_hash, len: data.len() as u32 };
        assert!(verify_integrity(&work, data).is_ok());

        let bad_work = PieceWork { index: 0, expected_hash: [0u8; 20], len: data.len() as u32 };
        assert!(verify_integrity(&bad_work, data).is_err());
    }
}

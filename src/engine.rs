//! The download coordinator (spec.md §4.7): owns the work queue and result
//! stream, spawns one worker task per peer, and assembles the pieces each
//! worker reports into a single contiguous output buffer.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, Mutex, Notify};

use crate::{
    download::{download_piece, PieceWork},
    error::{Error, Result},
    peer::session::PeerSession,
    Conf, PeerId, PieceIndex, Sha1Hash,
};

/// A single verified piece, ready to be written into the output buffer.
#[derive(Debug)]
pub struct PieceResult {
    pub index: PieceIndex,
    pub bytes: Vec<u8>,
}

/// The work queue's receiving half, shared across every worker task so a
/// worker can both pull new work and, on failure, push its held item back
/// before giving up. A `tokio::sync::Mutex` rather than a lock over any
/// engine state: the only thing it guards is "whose turn is it to `recv`".
///
/// The lock is only ever held for a non-blocking [`mpsc::Receiver::try_recv`]
/// — never across a blocking wait — so that the coordinator can always
/// acquire it to call [`mpsc::Receiver::close`] once every piece has been
/// collected, even while a worker is parked waiting for more work that will
/// never come. See [`next_work`] and the `work_available` [`Notify`] below.
type WorkReceiver = Arc<Mutex<mpsc::Receiver<PieceWork>>>;

fn piece_len(index: PieceIndex, piece_length: u32, length: u64) -> u32 {
    let begin = index as u64 * piece_length as u64;
    let end = (begin + piece_length as u64).min(length);
    (end - begin) as u32
}

/// Downloads every piece of a torrent from `peers` and returns the
/// assembled content, `length` bytes long.
///
/// Implements spec.md §4.7: one work item per piece is pushed onto a
/// bounded queue sized to the piece count (so the initial enqueue never
/// blocks); one task is spawned per peer; the coordinator drains the
/// result stream until every piece has been reported, copying each
/// piece's bytes into its `[index * piece_length, ..)` slice of the
/// output buffer exactly once.
///
/// Returns [`Error::Stalled`] if every worker exits — whether from a
/// failed session, a dead connection, or simply running out of pieces it
/// can serve — before all pieces have been collected (spec.md §9's
/// "production implementation should detect this" guidance).
pub async fn download(
    peers: &[SocketAddr],
    peer_id: PeerId,
    info_hash: Sha1Hash,
    piece_hashes: &[Sha1Hash],
    piece_length: u32,
    length: u64,
    conf: &Conf,
) -> Result<Vec<u8>> {
    let piece_count = piece_hashes.len();

    let (work_tx, work_rx) = mpsc::channel(piece_count.max(1));
    for (index, &expected_hash) in piece_hashes.iter().enumerate() {
        let len = piece_len(index, piece_length, length);
        work_tx
            .send(PieceWork { index, expected_hash, len })
            .await
            .expect("work channel capacity equals piece count");
    }
    let work_rx: WorkReceiver = Arc::new(Mutex::new(work_rx));

    let (result_tx, mut result_rx) = mpsc::unbounded_channel();
    // wakes a worker parked in `next_work` whenever an item is (re-)enqueued
    // or the queue is closed; never held across a blocking wait itself, so
    // it cannot deadlock against the coordinator's own shutdown
    let work_available = Arc::new(Notify::new());

    for &addr in peers {
        let work_tx = work_tx.clone();
        let work_rx = Arc::clone(&work_rx);
        let work_available = Arc::clone(&work_available);
        let result_tx = result_tx.clone();
        let conf = *conf;
        tokio::spawn(async move {
            run_worker(
                addr,
                peer_id,
                info_hash,
                work_tx,
                work_rx,
                work_available,
                result_tx,
                conf,
            )
            .await;
        });
    }
    // the coordinator holds no work-queue sender or result-channel sender of
    // its own past this point; dropping these lets `work_rx` and
    // `result_rx` observe closure once every worker has exited
    drop(work_tx);
    drop(result_tx);

    let mut buffer = vec![0u8; length as usize];
    let mut remaining = piece_count;
    let mut stalled = false;
    while remaining > 0 {
        match result_rx.recv().await {
            Some(result) => {
                let begin = result.index as u64 * piece_length as u64;
                let end = (begin + result.bytes.len() as u64).min(length);
                buffer[begin as usize..end as usize]
                    .copy_from_slice(&result.bytes);
                remaining -= 1;
            }
            // every worker's `result_tx` clone has been dropped: no live
            // worker remains, but fewer than `piece_count` results ever
            // arrived.
            None => {
                stalled = true;
                break;
            }
        }
    }

    // every piece has been collected (or no worker remains to collect the
    // rest): close the shared receiver so that any worker still parked in
    // `next_work` observes the queue as terminated and exits, per spec.md
    // §4.7 step 3 and §9. `close()` only stops new sends from being
    // accepted; `notify_waiters` is what actually wakes a worker that's
    // currently waiting on `work_available`.
    work_rx.lock().await.close();
    work_available.notify_waiters();

    if stalled {
        log::warn!(
            "download stalled: {} of {} pieces missing, no peers remain",
            remaining,
            piece_count
        );
        return Err(Error::Stalled);
    }

    Ok(buffer)
}

/// Pulls the next work item off the shared queue, waiting for one to be
/// (re-)enqueued if it's currently empty.
///
/// The `work_rx` lock is only ever held for a non-blocking `try_recv` — it
/// is released before awaiting `work_available`, so a worker parked here
/// never prevents the coordinator from acquiring the lock to close the
/// queue. Registering the `Notified` future before re-checking the queue
/// (rather than after) is what makes this race-free: a `notify_waiters`
/// call that lands between the check and the `.await` is still observed.
async fn next_work(
    work_rx: &WorkReceiver,
    work_available: &Notify,
) -> Option<PieceWork> {
    loop {
        let notified = work_available.notified();
        let attempt = work_rx.lock().await.try_recv();
        match attempt {
            Ok(work) => return Some(work),
            Err(TryRecvError::Disconnected) => return None,
            Err(TryRecvError::Empty) => notified.await,
        }
    }
}

/// Pushes a failed or unclaimable work item back onto the shared queue and
/// wakes any worker waiting in [`next_work`]. Returns `false` if the queue
/// has been closed out from under us (coordinator already done).
async fn reenqueue(
    work_tx: &mpsc::Sender<PieceWork>,
    work_available: &Notify,
    work: PieceWork,
) -> bool {
    if work_tx.send(work).await.is_err() {
        return false;
    }
    work_available.notify_waiters();
    true
}

/// One peer's worker loop (spec.md §4.7 step 2): establish a session, best-
/// effort unchoke/interested, then repeatedly pull work until the queue is
/// exhausted or this session fails.
async fn run_worker(
    addr: SocketAddr,
    peer_id: PeerId,
    info_hash: Sha1Hash,
    work_tx: mpsc::Sender<PieceWork>,
    work_rx: WorkReceiver,
    work_available: Arc<Notify>,
    result_tx: mpsc::UnboundedSender<PieceResult>,
    conf: Conf,
) {
    let mut session = match PeerSession::connect(addr, info_hash, peer_id, &conf).await
    {
        Ok(session) => session,
        Err(e) => {
            log::info!("peer {} session setup failed: {}", addr, e);
            return;
        }
    };

    // best-effort: the source does not check these errors either, relying
    // on the next read to surface a dead connection (spec.md §9, Open
    // Questions)
    let _ = session.send_unchoke().await;
    let _ = session.send_interested().await;

    loop {
        let work = match next_work(&work_rx, &work_available).await {
            Some(work) => work,
            None => return,
        };

        if !session.has_piece(work.index) {
            if !reenqueue(&work_tx, &work_available, work).await {
                return;
            }
            continue;
        }

        match download_piece(&mut session, &work, &conf).await {
            Ok(bytes) => {
                let index = work.index;
                // a failure to notify isn't fatal: we already hold the
                // verified bytes and can still report the result
                let _ = session.send_have(index as u32).await;
                if result_tx.send(PieceResult { index, bytes }).is_err() {
                    return;
                }
            }
            Err(e) => {
                log::info!(
                    "piece {} failed on peer {}, dropping peer: {}",
                    work.index,
                    addr,
                    e
                );
                let _ = reenqueue(&work_tx, &work_available, work).await;
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitfield::Bitfield;
    use crate::peer::codec::{Handshake, HandshakeCodec, Message, PeerCodec};
    use futures::{SinkExt, StreamExt};
    use sha1::{Digest, Sha1};
    use tokio::net::TcpListener;
    use tokio_util::codec::{Framed, FramedParts};

    fn hash_of(data: &[u8]) -> Sha1Hash {
        let digest = Sha1::digest(data);
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&digest);
        hash
    }

    /// Spawns a fake peer that performs the handshake/bitfield opener, then
    /// serves every Request it receives from `pieces` (a map of piece
    /// index to full piece bytes), sending Unchoke first.
    async fn spawn_fake_peer(
        info_hash: Sha1Hash,
        bitfield_bytes: Vec<u8>,
        pieces: Vec<(u32, Vec<u8>)>,
    ) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut socket = Framed::new(socket, HandshakeCodec);
            let _their_handshake = socket.next().await.unwrap().unwrap();
            socket
                .send(Handshake::new(info_hash, [9u8; 20]))
                .await
                .unwrap();

            let old_parts = socket.into_parts();
            let mut new_parts = FramedParts::new(old_parts.io, PeerCodec);
            new_parts.read_buf = old_parts.read_buf;
            let mut socket = Framed::from_parts(new_parts);
            socket
                .send(Message::Bitfield(Bitfield::from_vec(bitfield_bytes)))
                .await
                .unwrap();
            // the worker sends Unchoke+Interested best-effort; drain them
            socket.next().await;
            socket.send(Message::Unchoke).await.unwrap();
            socket.next().await;

            loop {
                match socket.next().await {
                    Some(Ok(Message::Request { piece_index, begin, len })) => {
                        let (_, bytes) = pieces
                            .iter()
                            .find(|(i, _)| *i == piece_index)
                            .expect("request for unknown piece");
                        let block =
                            bytes[begin as usize..(begin + len) as usize].to_vec();
                        socket
                            .send(Message::Block { piece_index, begin, data: block })
                            .await
                            .unwrap();
                    }
                    Some(Ok(Message::Have { .. })) => {}
                    Some(Ok(_)) | Some(Err(_)) | None => break,
                }
            }
        });
        addr
    }

    #[tokio::test]
    async fn single_piece_single_peer() {
        let info_hash = [1u8; 20];
        let data = vec![b'A'; 16384];
        let hash = hash_of(&data);
        let addr = spawn_fake_peer(
            info_hash,
            vec![0b1000_0000],
            vec![(0, data.clone())],
        )
        .await;

        let conf = Conf::new();
        let buffer = download(
            &[addr],
            [2u8; 20],
            info_hash,
            &[hash],
            16384,
            16384,
            &conf,
        )
        .await
        .unwrap();

        assert_eq!(buffer, data);
    }

    #[tokio::test]
    async fn pipelines_multiple_blocks_in_one_piece() {
        let info_hash = [3u8; 20];
        let data: Vec<u8> = (0..65536u32).map(|i| (i % 251) as u8).collect();
        let hash = hash_of(&data);
        let addr =
            spawn_fake_peer(info_hash, vec![0b1000_0000], vec![(0, data.clone())])
                .await;

        let conf = Conf::new();
        let buffer = download(
            &[addr],
            [4u8; 20],
            info_hash,
            &[hash],
            65536,
            65536,
            &conf,
        )
        .await
        .unwrap();

        assert_eq!(buffer, data);
    }

    #[tokio::test]
    async fn short_last_piece_writes_exact_length() {
        let info_hash = [5u8; 20];
        let piece0 = vec![b'X'; 16384];
        let piece1 = vec![b'Y'; 8192];
        let hash0 = hash_of(&piece0);
        let hash1 = hash_of(&piece1);
        let addr = spawn_fake_peer(
            info_hash,
            vec![0b1100_0000],
            vec![(0, piece0.clone()), (1, piece1.clone())],
        )
        .await;

        let conf = Conf::new();
        let buffer = download(
            &[addr],
            [6u8; 20],
            info_hash,
            &[hash0, hash1],
            16384,
            24576,
            &conf,
        )
        .await
        .unwrap();

        assert_eq!(buffer.len(), 24576);
        assert_eq!(&buffer[..16384], piece0.as_slice());
        assert_eq!(&buffer[16384..], piece1.as_slice());
    }

    #[tokio::test]
    async fn peer_missing_piece_reenqueues_for_other_peer() {
        let info_hash = [7u8; 20];
        let piece0 = vec![b'P'; 16384];
        let piece1 = vec![b'Q'; 16384];
        let hash0 = hash_of(&piece0);
        let hash1 = hash_of(&piece1);

        // peer A only advertises piece 0
        let addr_a = spawn_fake_peer(
            info_hash,
            vec![0b1000_0000],
            vec![(0, piece0.clone())],
        )
        .await;
        // peer B advertises both
        let addr_b = spawn_fake_peer(
            info_hash,
            vec![0b1100_0000],
            vec![(0, piece0.clone()), (1, piece1.clone())],
        )
        .await;

        let conf = Conf::new();
        let buffer = download(
            &[addr_a, addr_b],
            [8u8; 20],
            info_hash,
            &[hash0, hash1],
            16384,
            32768,
            &conf,
        )
        .await
        .unwrap();

        assert_eq!(&buffer[..16384], piece0.as_slice());
        assert_eq!(&buffer[16384..], piece1.as_slice());
    }

    #[tokio::test]
    async fn handshake_mismatch_on_one_peer_does_not_block_others() {
        let info_hash = [9u8; 20];
        let wrong_hash = [10u8; 20];
        let data = vec![b'Z'; 16384];
        let hash = hash_of(&data);

        // peer A will respond with the wrong info hash during handshake
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr_a = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut socket = Framed::new(socket, HandshakeCodec);
            socket.next().await.unwrap().unwrap();
            socket
                .send(Handshake::new(wrong_hash, [0u8; 20]))
                .await
                .unwrap();
            futures::future::pending::<()>().await;
        });

        let addr_b =
            spawn_fake_peer(info_hash, vec![0b1000_0000], vec![(0, data.clone())])
                .await;

        let conf = Conf::new();
        let buffer = download(
            &[addr_a, addr_b],
            [11u8; 20],
            info_hash,
            &[hash],
            16384,
            16384,
            &conf,
        )
        .await
        .unwrap();

        assert_eq!(buffer, data);
    }

    #[tokio::test]
    async fn every_worker_exiting_before_completion_stalls() {
        // the only peer fails handshake, so its worker exits before ever
        // touching the work queue; with no other peer, the coordinator
        // must fail fast rather than block on the result channel forever
        let info_hash = [12u8; 20];
        let wrong_hash = [13u8; 20];
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut socket = Framed::new(socket, HandshakeCodec);
            socket.next().await.unwrap().unwrap();
            socket
                .send(Handshake::new(wrong_hash, [0u8; 20]))
                .await
                .unwrap();
            futures::future::pending::<()>().await;
        });

        let conf = Conf::new();
        let result = download(
            &[addr],
            [14u8; 20],
            info_hash,
            &[[0u8; 20]],
            16384,
            16384,
            &conf,
        )
        .await;

        assert!(matches!(result, Err(Error::Stalled)));
    }
}

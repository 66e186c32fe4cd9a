// MIT License - Copyright (c) 2026 Peter Wright
// UDP listener: one datagram per message, partial datagrams reassembled per peer

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::frame::FrameDecoder;
use crate::pipeline::Pipeline;

/// Receive buffer; larger than any valid frame so oversize datagrams are
/// seen whole and rejected.
const RECV_BUFFER_SIZE: usize = 2048;

struct Partial {
    decoder: FrameDecoder,
    last_seen: Instant,
}

/// Buffers datagrams that ended without a terminator.
struct Reassembly {
    peers: HashMap<SocketAddr, Partial>,
    max_frame_size: usize,
    timeout: Duration,
}

impl Reassembly {
    fn new(max_frame_size: usize, timeout: Duration) -> Self {
        Self {
            peers: HashMap::new(),
            max_frame_size,
            timeout,
        }
    }

    fn decoder(&mut self, peer: SocketAddr, now: Instant) -> &mut FrameDecoder {
        let max_frame_size = self.max_frame_size;
        let partial = self.peers.entry(peer).or_insert_with(|| Partial {
            decoder: FrameDecoder::new(max_frame_size),
            last_seen: now,
        });
        partial.last_seen = now;
        &mut partial.decoder
    }

    /// Forget the peer once nothing is pending.
    fn settle(&mut self, peer: SocketAddr) {
        if self.peers.get(&peer).is_some_and(|p| p.decoder.is_empty()) {
            self.peers.remove(&peer);
        }
    }

    /// Drop partial datagrams whose continuation never arrived.
    fn prune(&mut self, now: Instant) -> usize {
        let timeout = self.timeout;
        let before = self.peers.len();
        self.peers.retain(|peer, partial| {
            let keep = now.duration_since(partial.last_seen) <= timeout;
            if !keep {
                debug!(
                    "Dropped {} buffered bytes from {}: datagram never completed",
                    partial.decoder.pending(),
                    peer
                );
            }
            keep
        });
        before - self.peers.len()
    }
}

/// Receive datagrams until shutdown is signalled.
///
/// Frames are submitted to the pipeline in arrival order on this task;
/// only waiting for the response happens on a spawned task.
pub(crate) async fn serve(
    socket: Arc<UdpSocket>,
    pipeline: Arc<Pipeline>,
    max_frame_size: usize,
    reassembly_timeout: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut buf = vec![0u8; RECV_BUFFER_SIZE];
    let mut partials = Reassembly::new(max_frame_size, reassembly_timeout);
    let mut prune = tokio::time::interval(reassembly_timeout.max(Duration::from_millis(10)));

    loop {
        tokio::select! {
            received = socket.recv_from(&mut buf) => match received {
                Ok((len, peer)) => {
                    let now = Instant::now();
                    let decoder = partials.decoder(peer, now);
                    decoder.push(&buf[..len]);
                    while let Some(frame) = decoder.next_frame() {
                        let submission = pipeline.submit(frame);
                        let socket = Arc::clone(&socket);
                        tokio::spawn(async move {
                            let outcome = submission.resolve().await;
                            if let Some(response) = outcome.response {
                                if let Err(e) = socket.send_to(&response, peer).await {
                                    warn!("UDP send to {} failed: {}", peer, e);
                                }
                            }
                        });
                    }
                    partials.settle(peer);
                }
                Err(e) => {
                    warn!("UDP receive error: {}", e);
                }
            },
            _ = prune.tick() => {
                partials.prune(Instant::now());
            }
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }
    info!("UDP listener stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::encode_frame;

    #[test]
    fn test_reassembly_joins_split_datagram() {
        let peer: SocketAddr = "127.0.0.1:5000".parse().unwrap();
        let mut partials = Reassembly::new(1024, Duration::from_secs(2));
        let raw = encode_frame(b"\"SIA-DCS\"0001L0#1234[Nri1/CA001]");
        let (head, tail) = raw.split_at(10);
        let now = Instant::now();

        let decoder = partials.decoder(peer, now);
        decoder.push(head);
        assert!(decoder.next_frame().is_none());
        partials.settle(peer);
        assert_eq!(partials.peers.len(), 1);

        let decoder = partials.decoder(peer, now);
        decoder.push(tail);
        assert!(decoder.next_frame().unwrap().is_ok());
        partials.settle(peer);
        assert!(partials.peers.is_empty());
    }

    #[test]
    fn test_truncated_datagram_expires() {
        let peer: SocketAddr = "127.0.0.1:5000".parse().unwrap();
        let mut partials = Reassembly::new(1024, Duration::from_secs(2));
        let raw = encode_frame(b"\"SIA-DCS\"0001L0#1234[Nri1/CA001]");
        let start = Instant::now();

        partials.decoder(peer, start).push(&raw[..raw.len() - 1]);
        partials.settle(peer);
        assert_eq!(partials.prune(start + Duration::from_secs(1)), 0);
        assert_eq!(partials.prune(start + Duration::from_secs(3)), 1);
        assert!(partials.peers.is_empty());
    }
}

// MIT License - Copyright (c) 2026 Peter Wright
// TCP listener: one task per panel connection

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::frame::FrameDecoder;
use crate::pipeline::Pipeline;
use crate::transport::BadFrameCounter;

/// Accept connections until shutdown is signalled.
pub(crate) async fn serve(
    listener: TcpListener,
    pipeline: Arc<Pipeline>,
    max_frame_size: usize,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!("TCP connection from {}", peer);
                    tokio::spawn(handle_connection(
                        stream,
                        peer,
                        Arc::clone(&pipeline),
                        max_frame_size,
                        shutdown_rx.clone(),
                    ));
                }
                Err(e) => {
                    error!("TCP accept failed: {}", e);
                }
            },
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }
    info!("TCP listener stopped");
}

/// Read frames from one connection and answer each before reading the next.
async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    pipeline: Arc<Pipeline>,
    max_frame_size: usize,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut buf = vec![0u8; 4096];
    let mut decoder = FrameDecoder::new(max_frame_size);
    let mut bad_frames = BadFrameCounter::default();

    'conn: loop {
        let n = tokio::select! {
            read = stream.read(&mut buf) => match read {
                Ok(0) => {
                    debug!("Connection from {} closed", peer);
                    break;
                }
                Ok(n) => n,
                Err(e) => {
                    warn!("Read error from {}: {}", peer, e);
                    break;
                }
            },
            _ = shutdown_rx.changed() => break,
        };
        decoder.push(&buf[..n]);

        while let Some(frame) = decoder.next_frame() {
            let outcome = pipeline.submit(frame).resolve().await;

            if let Some(response) = &outcome.response {
                if let Err(e) = stream.write_all(response).await {
                    warn!("Write error to {}: {}", peer, e);
                    break 'conn;
                }
            }
            if outcome.close {
                info!("Closing connection from {}", peer);
                break 'conn;
            }
            if outcome.bad_frame && bad_frames.record(Instant::now()) {
                warn!("Closing connection from {}: too many bad frames", peer);
                break 'conn;
            }
        }
    }
    let _ = stream.shutdown().await;
}

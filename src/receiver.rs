// MIT License - Copyright (c) 2026 Peter Wright
// SiaReceiver: listeners, workers and subscribers behind one handle

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::ReceiverConfig;
use crate::dispatch::{AccountStats, Dispatcher};
use crate::error::{Result, SiaError};
use crate::event::DecodedEvent;
use crate::pipeline::Pipeline;
use crate::subscriber::{EventHandler, Sink, SubscriptionFilter, SubscriptionHandle};
use crate::transport;

/// A SIA DC-09 receiver.
///
/// Create it, register subscribers, then [`start`](Self::start) it.
/// Subscriptions may be added or removed at any time.
pub struct SiaReceiver {
    config: ReceiverConfig,
    dispatcher: Arc<Dispatcher>,
    pipeline: Option<Arc<Pipeline>>,
    tcp_addr: Option<SocketAddr>,
    udp_addr: Option<SocketAddr>,
    handles: Vec<JoinHandle<()>>,
    shutdown_tx: watch::Sender<bool>,
}

impl SiaReceiver {
    /// Validate the configuration and build the receiver.
    pub fn new(config: ReceiverConfig) -> Result<Self> {
        config.validate()?;
        let dispatcher = Arc::new(Dispatcher::new(
            config.accounts.iter().map(|a| a.id.clone()),
            config.queue_capacity,
        ));
        let (shutdown_tx, _) = watch::channel(false);
        Ok(Self {
            config,
            dispatcher,
            pipeline: None,
            tcp_addr: None,
            udp_addr: None,
            handles: Vec::new(),
            shutdown_tx,
        })
    }

    pub fn config(&self) -> &ReceiverConfig {
        &self.config
    }

    /// Bind the configured listeners and start processing.
    ///
    /// Sockets are bound before any task is spawned, so a failed start
    /// leaves nothing running and may be retried.
    pub async fn start(&mut self) -> Result<()> {
        if self.pipeline.is_some() {
            return Err(SiaError::config("receiver already started"));
        }

        let mode = self.config.transport;
        let mut addr = self.config.socket_addr();
        let max_frame_size = self.config.max_frame_size;

        let listener = if mode.tcp() {
            let listener = TcpListener::bind(addr).await?;
            // With port 0, UDP follows the port TCP was given.
            addr = listener.local_addr()?;
            Some(listener)
        } else {
            None
        };
        let socket = if mode.udp() {
            Some(UdpSocket::bind(addr).await?)
        } else {
            None
        };
        let tcp_addr = listener.as_ref().map(TcpListener::local_addr).transpose()?;
        let udp_addr = socket.as_ref().map(UdpSocket::local_addr).transpose()?;

        let (pipeline, workers) = Pipeline::spawn(&self.config, &self.dispatcher)?;
        let pipeline = Arc::new(pipeline);
        self.handles.extend(workers);
        self.handles.extend(self.dispatcher.spawn_delivery());

        if let (Some(listener), Some(local)) = (listener, tcp_addr) {
            info!("Listening for SIA on tcp://{}", local);
            self.handles.push(tokio::spawn(transport::tcp::serve(
                listener,
                Arc::clone(&pipeline),
                max_frame_size,
                self.shutdown_tx.subscribe(),
            )));
        }
        if let (Some(socket), Some(local)) = (socket, udp_addr) {
            info!("Listening for SIA on udp://{}", local);
            self.handles.push(tokio::spawn(transport::udp::serve(
                Arc::new(socket),
                Arc::clone(&pipeline),
                max_frame_size,
                self.config.udp_reassembly_timeout(),
                self.shutdown_tx.subscribe(),
            )));
        }

        info!(
            "SIA receiver started with {} account(s)",
            self.config.accounts.len()
        );
        self.tcp_addr = tcp_addr;
        self.udp_addr = udp_addr;
        self.pipeline = Some(pipeline);
        Ok(())
    }

    /// Register a callback subscriber.
    pub fn subscribe(
        &self,
        filter: SubscriptionFilter,
        handler: impl EventHandler,
    ) -> Result<SubscriptionHandle> {
        self.dispatcher
            .subscribe_sink(filter, Sink::Handler(Box::new(handler)))
    }

    /// Register a pull-style subscriber. Events that do not fit in the
    /// channel are dropped for this subscriber only.
    pub fn subscribe_channel(
        &self,
        filter: SubscriptionFilter,
        capacity: usize,
    ) -> Result<(SubscriptionHandle, mpsc::Receiver<Arc<DecodedEvent>>)> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = self.dispatcher.subscribe_sink(filter, Sink::Channel(tx))?;
        Ok((handle, rx))
    }

    /// Remove a subscription. A second call with the same handle returns
    /// `false`.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        self.dispatcher.unsubscribe(handle)
    }

    /// Forget an account's last sequence number, e.g. after the panel was
    /// reset and restarted its numbering.
    pub async fn reset_replay_window(&self, account: &str) -> Result<()> {
        match &self.pipeline {
            Some(pipeline) => pipeline.reset_replay_window(account).await,
            None => Err(SiaError::config("receiver not started")),
        }
    }

    pub fn stats(&self) -> Vec<AccountStats> {
        self.dispatcher.stats()
    }

    pub fn tcp_addr(&self) -> Option<SocketAddr> {
        self.tcp_addr
    }

    pub fn udp_addr(&self) -> Option<SocketAddr> {
        self.udp_addr
    }

    /// Stop listening and stop all workers.
    pub async fn shutdown(&mut self) {
        self.shutdown_tx.send_replace(true);
        self.dispatcher.close();
        self.pipeline = None;
        for handle in self.handles.drain(..) {
            handle.abort();
            let _ = handle.await;
        }
        info!("SIA receiver stopped");
    }
}

impl Drop for SiaReceiver {
    fn drop(&mut self) {
        self.shutdown_tx.send_replace(true);
        for handle in &self.handles {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Account, TransportMode};

    fn config() -> ReceiverConfig {
        ReceiverConfig::builder()
            .bind_address("127.0.0.1".parse().unwrap())
            .port(0)
            .transport(TransportMode::Both)
            .account(Account::builder("1234").build())
            .build()
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        assert!(SiaReceiver::new(ReceiverConfig::default()).is_err());
    }

    #[tokio::test]
    async fn test_start_binds_both_transports() {
        let mut receiver = SiaReceiver::new(config()).unwrap();
        receiver.start().await.unwrap();
        let tcp = receiver.tcp_addr().unwrap();
        let udp = receiver.udp_addr().unwrap();
        assert_ne!(tcp.port(), 0);
        assert_eq!(tcp.port(), udp.port());
        assert!(receiver.start().await.is_err());
        receiver.shutdown().await;
    }

    #[tokio::test]
    async fn test_failed_start_leaves_nothing_running() {
        let udp = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let port = udp.local_addr().unwrap().port();
        let mut config = config();
        config.port = port;
        let mut receiver = SiaReceiver::new(config).unwrap();

        assert!(matches!(receiver.start().await, Err(SiaError::Io(_))));
        assert_eq!(receiver.tcp_addr(), None);
        assert!(receiver.handles.is_empty());
        // The TCP port was released with the failed start.
        assert!(tokio::net::TcpStream::connect(("127.0.0.1", port)).await.is_err());

        drop(udp);
        receiver.start().await.unwrap();
        assert_eq!(receiver.tcp_addr().unwrap().port(), port);
        assert_eq!(receiver.udp_addr().unwrap().port(), port);
        receiver.shutdown().await;
    }

    #[tokio::test]
    async fn test_subscribe_unknown_account() {
        let receiver = SiaReceiver::new(config()).unwrap();
        assert!(matches!(
            receiver.subscribe_channel(SubscriptionFilter::account("FFFF"), 4),
            Err(SiaError::UnknownAccount { .. })
        ));
        let (handle, _rx) = receiver
            .subscribe_channel(SubscriptionFilter::account("1234"), 4)
            .unwrap();
        assert!(receiver.unsubscribe(&handle));
        assert!(!receiver.unsubscribe(&handle));
        assert!(receiver.reset_replay_window("1234").await.is_err());
    }
}

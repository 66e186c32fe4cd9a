// MIT License - Copyright (c) 2026 Peter Wright
// SIA DC-09 alarm receiver
//
//! # sia-receiver
//!
//! A receiver for alarm panels reporting over SIA DC-09 (TCP and UDP).
//!
//! Frames are checked (CRC, length), decrypted for keyed accounts
//! (AES-CBC), screened against replays (sequence numbers and timestamps),
//! parsed (SIA-DCS and ADM-CID) and handed to subscribers per account, in
//! wire order. The panel is acknowledged once subscribers were offered the
//! event.
//!
//! ## Quick Start
//!
//! ```no_run
//! use sia_receiver::{Account, ReceiverConfig, SiaReceiver, SubscriptionFilter, TransportMode};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ReceiverConfig::builder()
//!         .port(7777)
//!         .transport(TransportMode::Both)
//!         .account(Account::builder("1234").zones(2).build())
//!         .account(Account::builder("AAA").key("0123456789ABCDEF").build())
//!         .build();
//!
//!     let mut receiver = SiaReceiver::new(config)?;
//!     let (_handle, mut events) =
//!         receiver.subscribe_channel(SubscriptionFilter::account("1234"), 64)?;
//!     receiver.start().await?;
//!
//!     tokio::spawn(async move {
//!         while let Some(event) = events.recv().await {
//!             println!("{} zone {}: {}", event.account, event.zone, event.code);
//!         }
//!     });
//!
//!     tokio::signal::ctrl_c().await?;
//!     receiver.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod codes;
pub mod config;
pub mod constants;
pub mod crypto;
pub mod dispatch;
pub mod entities;
pub mod error;
pub mod event;
pub mod frame;
pub mod parser;
pub mod pipeline;
pub mod protocol;
pub mod receiver;
pub mod replay;
pub mod subscriber;
pub mod transport;

// Re-exports for convenience
pub use config::{Account, AccountBuilder, ReceiverConfig, ReceiverConfigBuilder, TransportMode};
pub use dispatch::AccountStats;
pub use entities::{AlarmPanelEntity, AlarmState, EntityHandler, EntityKind, EntityUpdate, SiaEntity, TextLogEntity};
pub use error::{ReplayReason, Result, SiaError, SubscriberError};
pub use event::{DecodedEvent, EventCode, EventFlags, Qualifier};
pub use protocol::MessageType;
pub use receiver::SiaReceiver;
pub use replay::ClockSkew;
pub use subscriber::{AccountFilter, EventHandler, SubscriptionFilter, SubscriptionHandle};

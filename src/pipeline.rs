// MIT License - Copyright (c) 2026 Peter Wright
// Frame -> authenticated event -> response

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{Account, ReceiverConfig};
use crate::crypto::AccountCipher;
use crate::dispatch::{AccountCounters, Dispatcher};
use crate::error::{ReplayReason, Result, SiaError};
use crate::frame::Frame;
use crate::parser::build_event;
use crate::protocol::{parse_timestamp, split_content, Envelope, MessageType, Response, ResponseKind};
use crate::replay::{ClockSkew, ReplayWindow};

/// What the transport should do after handling one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    /// Framed response to send, if any.
    pub response: Option<Vec<u8>>,
    /// The frame failed framing checks and counts toward the bad-frame limit.
    pub bad_frame: bool,
    /// Close the connection (TCP) after sending the response.
    pub close: bool,
}

impl Outcome {
    fn respond(response: Vec<u8>) -> Self {
        Self {
            response: Some(response),
            bad_frame: false,
            close: false,
        }
    }

    fn close() -> Self {
        Self {
            response: None,
            bad_frame: false,
            close: true,
        }
    }
}

/// Result of the worker for one message: the delivery receipt for an
/// accepted event, `None` for accepted messages carrying no event.
type WorkerReply = Result<Option<oneshot::Receiver<()>>>;

enum WorkerMessage {
    Job {
        envelope: Envelope,
        received_at: DateTime<Utc>,
        reply: oneshot::Sender<WorkerReply>,
    },
    ResetReplay,
}

/// Single owner of one account's cipher and replay window.
///
/// Jobs are processed strictly in arrival order, so events are queued
/// for delivery in wire order.
struct AccountWorker {
    account: String,
    cipher: Option<AccountCipher>,
    zones: u32,
    skew: ClockSkew,
    replay: ReplayWindow,
    dispatcher: Arc<Dispatcher>,
    counters: Arc<AccountCounters>,
}

impl AccountWorker {
    async fn run(mut self, mut rx: mpsc::Receiver<WorkerMessage>) {
        debug!("Worker started for account {}", self.account);
        while let Some(msg) = rx.recv().await {
            match msg {
                WorkerMessage::Job {
                    envelope,
                    received_at,
                    reply,
                } => {
                    let result = self.process(&envelope, received_at);
                    if let Err(e) = &result {
                        self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                        warn!(
                            "Dropped {} seq {:04} for account {}: {}",
                            envelope.message_type.as_str(),
                            envelope.sequence,
                            self.account,
                            e
                        );
                    }
                    let _ = reply.send(result);
                }
                WorkerMessage::ResetReplay => {
                    info!("Replay window reset for account {}", self.account);
                    self.replay.reset();
                }
            }
        }
        debug!("Worker stopped for account {}", self.account);
    }

    fn auth_error(&self, details: impl Into<String>) -> SiaError {
        SiaError::AuthenticationError {
            account: self.account.clone(),
            details: details.into(),
        }
    }

    fn process(&mut self, envelope: &Envelope, received_at: DateTime<Utc>) -> WorkerReply {
        let plain = match (&self.cipher, envelope.encrypted) {
            (Some(cipher), true) => cipher
                .decrypt_content(&envelope.data)
                .map_err(|e| self.auth_error(e.to_string()))?,
            (None, false) => envelope.data.clone(),
            (Some(_), false) => return Err(self.auth_error("cleartext message for keyed account")),
            (None, true) => return Err(self.auth_error("encrypted message for cleartext account")),
        };

        let content = split_content(&plain)?;
        if let Some(named) = content.account {
            if !named.eq_ignore_ascii_case(&envelope.account) {
                return Err(self.auth_error(format!(
                    "content names account {}",
                    named.to_ascii_uppercase()
                )));
            }
        }
        let panel_time = content.timestamp.map(parse_timestamp).transpose()?;

        if envelope.message_type == MessageType::Null {
            // Link test: authenticated but never sequenced or delivered.
            if let Some(ts) = panel_time {
                if !self.skew.contains(ts, received_at) {
                    return Err(SiaError::ReplayRejected {
                        account: self.account.clone(),
                        reason: ReplayReason::ClockSkew,
                    });
                }
            }
            debug!("Link test from account {}", self.account);
            return Ok(None);
        }

        let event = build_event(envelope, &content, panel_time, self.zones, received_at)?;

        self.replay
            .admit(
                envelope.sequence,
                panel_time,
                envelope.encrypted,
                &self.skew,
                received_at,
            )
            .map_err(|reason| SiaError::ReplayRejected {
                account: self.account.clone(),
                reason,
            })?;
        self.counters.accepted.fetch_add(1, Ordering::Relaxed);

        if event.is_zone_out_of_range() {
            debug!(
                "Account {} reported zone {} beyond its {} configured zones",
                self.account, event.zone, self.zones
            );
        }
        info!(
            "Account {} zone {}: {} {}",
            self.account,
            event.zone,
            event.code,
            event.description().unwrap_or("unknown code")
        );
        self.dispatcher.enqueue(Arc::new(event)).map(Some)
    }
}

struct AccountSlot {
    cipher: Option<AccountCipher>,
    worker: mpsc::Sender<WorkerMessage>,
    counters: Arc<AccountCounters>,
}

/// Turns received frames into responses.
///
/// [`Pipeline::submit`] runs on the network task and is synchronous, so the
/// order of submission is the order in which workers see messages.
/// [`Submission::resolve`] then waits for the worker and, for accepted
/// events, for delivery.
pub struct Pipeline {
    accounts: HashMap<String, AccountSlot>,
    ack_timeout: Duration,
}

impl Pipeline {
    /// Build the pipeline and spawn one worker per account.
    pub fn spawn(
        config: &ReceiverConfig,
        dispatcher: &Arc<Dispatcher>,
    ) -> Result<(Self, Vec<JoinHandle<()>>)> {
        let mut accounts = HashMap::new();
        let mut handles = Vec::new();
        for account in &config.accounts {
            let (slot, handle) = Self::spawn_worker(account, config.worker_capacity, dispatcher)?;
            accounts.insert(account.id.clone(), slot);
            handles.push(handle);
        }
        Ok((
            Self {
                accounts,
                ack_timeout: config.ack_timeout(),
            },
            handles,
        ))
    }

    fn spawn_worker(
        account: &Account,
        capacity: usize,
        dispatcher: &Arc<Dispatcher>,
    ) -> Result<(AccountSlot, JoinHandle<()>)> {
        let cipher = account.cipher()?;
        let counters = dispatcher
            .channel(&account.id)
            .map(|c| Arc::clone(&c.counters))
            .ok_or_else(|| SiaError::UnknownAccount {
                account: account.id.clone(),
            })?;
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let worker = AccountWorker {
            account: account.id.clone(),
            cipher: cipher.clone(),
            zones: account.zones,
            skew: account.clock_skew,
            replay: ReplayWindow::new(),
            dispatcher: Arc::clone(dispatcher),
            counters: Arc::clone(&counters),
        };
        let handle = tokio::spawn(worker.run(rx));
        Ok((
            AccountSlot {
                cipher,
                worker: tx,
                counters,
            },
            handle,
        ))
    }

    /// Route one frame (or framing failure) to its account worker.
    pub fn submit(&self, frame: Result<Frame>) -> Submission {
        let received_at = Utc::now();
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Dropped frame: {}", e);
                let kind = e.response_kind().unwrap_or(ResponseKind::Nak);
                return Submission::Ready(Outcome {
                    response: Some(Response::new(kind, None).encode(None, received_at)),
                    bad_frame: e.is_framing(),
                    close: false,
                });
            }
        };

        let envelope = match Envelope::parse(&frame.body) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Dropped frame: {}", e);
                return Submission::Ready(Outcome::respond(
                    Response::new(ResponseKind::Duh, None).encode(None, received_at),
                ));
            }
        };

        let Some(slot) = self.accounts.get(&envelope.account) else {
            warn!("{}", SiaError::UnknownAccount { account: envelope.account });
            return Submission::Ready(Outcome::close());
        };
        slot.counters.received.fetch_add(1, Ordering::Relaxed);

        let (reply_tx, reply_rx) = oneshot::channel();
        let job = WorkerMessage::Job {
            envelope: envelope.clone(),
            received_at,
            reply: reply_tx,
        };
        match slot.worker.try_send(job) {
            Ok(()) => Submission::Pending {
                envelope,
                cipher: slot.cipher.clone(),
                reply: reply_rx,
                ack_timeout: self.ack_timeout,
            },
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Worker for account {} is saturated", envelope.account);
                Submission::Ready(Outcome::respond(
                    Response::new(ResponseKind::Nak, Some(&envelope)).encode(None, received_at),
                ))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Submission::Ready(Outcome::close()),
        }
    }

    /// Clear an account's replay window.
    pub async fn reset_replay_window(&self, account: &str) -> Result<()> {
        let account = account.to_ascii_uppercase();
        let slot = self
            .accounts
            .get(&account)
            .ok_or(SiaError::UnknownAccount { account })?;
        slot.worker
            .send(WorkerMessage::ResetReplay)
            .await
            .map_err(|_| SiaError::ChannelClosed)
    }
}

/// A frame handed to the pipeline, awaiting its response.
pub enum Submission {
    Ready(Outcome),
    Pending {
        envelope: Envelope,
        cipher: Option<AccountCipher>,
        reply: oneshot::Receiver<WorkerReply>,
        ack_timeout: Duration,
    },
}

impl Submission {
    pub async fn resolve(self) -> Outcome {
        let (envelope, cipher, reply, ack_timeout) = match self {
            Submission::Ready(outcome) => return outcome,
            Submission::Pending {
                envelope,
                cipher,
                reply,
                ack_timeout,
            } => (envelope, cipher, reply, ack_timeout),
        };

        let result = reply.await.unwrap_or(Err(SiaError::ChannelClosed));
        let kind = match result {
            Ok(Some(delivered)) => {
                match tokio::time::timeout(ack_timeout, delivered).await {
                    Ok(Ok(())) => {}
                    Ok(Err(_)) => warn!(
                        "Event seq {:04} for account {} was dropped before delivery",
                        envelope.sequence, envelope.account
                    ),
                    Err(_) => debug!(
                        "Delivery of seq {:04} for account {} still pending, acknowledging",
                        envelope.sequence, envelope.account
                    ),
                }
                ResponseKind::Ack
            }
            Ok(None) => ResponseKind::Ack,
            Err(e) => match e.response_kind() {
                Some(kind) => kind,
                None => return Outcome::close(),
            },
        };

        let response = Response::new(kind, Some(&envelope)).encode(cipher.as_ref(), Utc::now());
        Outcome::respond(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::encode_frame;
    use crate::protocol::format_timestamp;
    use crate::subscriber::{Sink, SubscriptionFilter};
    use parking_lot::Mutex;

    const KEY: &str = "0123456789ABCDEF";

    fn setup() -> (Pipeline, Arc<Dispatcher>, Arc<Mutex<Vec<String>>>) {
        let config = ReceiverConfig::builder()
            .account(Account::builder("1234").zones(2).build())
            .account(Account::builder("AAA").key(KEY).build())
            .account(Account::builder("BBB").key(KEY).build())
            .ack_timeout_ms(1000)
            .build();
        let dispatcher = Arc::new(Dispatcher::new(
            config.accounts.iter().map(|a| a.id.clone()),
            16,
        ));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        dispatcher
            .subscribe_sink(
                SubscriptionFilter::all(),
                Sink::Handler(Box::new(
                    move |e: &crate::event::DecodedEvent| -> std::result::Result<bool, crate::error::SubscriberError> {
                        sink.lock().push(format!("{}:{}:{}", e.account, e.sequence, e.code));
                        Ok(true)
                    },
                )),
            )
            .unwrap();
        dispatcher.spawn_delivery();
        let (pipeline, _) = Pipeline::spawn(&config, &dispatcher).unwrap();
        (pipeline, dispatcher, seen)
    }

    fn frame(body: &str) -> Result<Frame> {
        Frame::parse(&encode_frame(body.as_bytes()))
    }

    fn response_body(outcome: &Outcome) -> String {
        let raw = outcome.response.as_ref().unwrap();
        let frame = Frame::parse(raw).unwrap();
        String::from_utf8(frame.body).unwrap()
    }

    #[tokio::test]
    async fn test_cleartext_event_acknowledged_after_delivery() {
        let (pipeline, _, seen) = setup();
        let outcome = pipeline
            .submit(frame("\"SIA-DCS\"0001L0#1234[#1234|Nri1/CA001]"))
            .resolve()
            .await;
        assert_eq!(response_body(&outcome), "\"ACK\"0001L0#1234[]");
        assert!(!outcome.close);
        assert_eq!(*seen.lock(), vec!["1234:1:CA"]);
    }

    #[tokio::test]
    async fn test_duplicate_acked_but_not_redelivered() {
        let (pipeline, dispatcher, seen) = setup();
        for _ in 0..2 {
            let outcome = pipeline
                .submit(frame("\"SIA-DCS\"0005L0#1234[#1234|Nri1/BA002]"))
                .resolve()
                .await;
            assert_eq!(response_body(&outcome), "\"ACK\"0005L0#1234[]");
        }
        assert_eq!(seen.lock().len(), 1);
        let stats = &dispatcher.stats()[0];
        assert_eq!(stats.account, "1234");
        assert_eq!(stats.received, 2);
        assert_eq!(stats.accepted, 1);
        assert_eq!(stats.rejected, 1);
    }

    #[tokio::test]
    async fn test_parse_error_gets_duh() {
        let (pipeline, _, seen) = setup();
        let outcome = pipeline
            .submit(frame("\"SIA-DCS\"0002L0#1234[#1234|Nri1/c1]"))
            .resolve()
            .await;
        assert!(response_body(&outcome).starts_with("\"DUH\"0002L0#1234"));
        assert!(seen.lock().is_empty());
    }

    #[tokio::test]
    async fn test_bad_checksum_gets_nak() {
        let (pipeline, _, _) = setup();
        let mut raw = encode_frame(b"\"SIA-DCS\"0003L0#1234[#1234|Nri1/CA001]");
        raw[20] ^= 0x01;
        let outcome = pipeline.submit(Frame::parse(&raw)).resolve().await;
        assert!(outcome.bad_frame);
        assert!(response_body(&outcome).starts_with("\"NAK\"0000R0L0A0[]_"));
    }

    #[tokio::test]
    async fn test_unknown_account_closes() {
        let (pipeline, _, _) = setup();
        let outcome = pipeline
            .submit(frame("\"SIA-DCS\"0003L0#9999[#9999|Nri1/CA001]"))
            .resolve()
            .await;
        assert!(outcome.close);
        assert!(outcome.response.is_none());
    }

    #[tokio::test]
    async fn test_encrypted_roundtrip() {
        let (pipeline, _, seen) = setup();
        let cipher = AccountCipher::new(KEY).unwrap();
        let data = cipher.encrypt_content(&format!("#AAA|Nri1/OP003]{}", format_timestamp(Utc::now())));
        let outcome = pipeline
            .submit(frame(&format!("\"*SIA-DCS\"0010L0#AAA[{}", data)))
            .resolve()
            .await;
        let body = response_body(&outcome);
        let (head, hex) = body.split_once('[').unwrap();
        assert_eq!(head, "\"*ACK\"0010L0#AAA");
        assert!(cipher.decrypt_content(hex).unwrap().starts_with("]_"));
        assert_eq!(*seen.lock(), vec!["AAA:10:OP"]);
    }

    #[tokio::test]
    async fn test_wrong_key_and_cleartext_for_keyed_account() {
        let (pipeline, _, seen) = setup();
        let wrong = AccountCipher::new("FEDCBA9876543210").unwrap();
        let data = wrong.encrypt_content(&format!("Nri1/OP003]{}", format_timestamp(Utc::now())));
        let outcome = pipeline
            .submit(frame(&format!("\"*SIA-DCS\"0011L0#AAA[{}", data)))
            .resolve()
            .await;
        assert!(response_body(&outcome).starts_with("\"NAK\""));

        let outcome = pipeline
            .submit(frame("\"SIA-DCS\"0012L0#AAA[Nri1/OP003]"))
            .resolve()
            .await;
        assert!(response_body(&outcome).starts_with("\"NAK\""));
        assert!(seen.lock().is_empty());
    }

    #[tokio::test]
    async fn test_content_for_another_account_rejected() {
        let (pipeline, _, seen) = setup();
        let cipher = AccountCipher::new(KEY).unwrap();
        let data = cipher.encrypt_content(&format!("#AAA|Nri1/OP003]{}", format_timestamp(Utc::now())));
        let outcome = pipeline
            .submit(frame(&format!("\"*SIA-DCS\"0020L0#BBB[{}", data)))
            .resolve()
            .await;
        assert!(response_body(&outcome).starts_with("\"NAK\""));

        let outcome = pipeline
            .submit(frame("\"SIA-DCS\"0021L0#1234[#1235|Nri1/OP003]"))
            .resolve()
            .await;
        assert!(response_body(&outcome).starts_with("\"NAK\""));
        assert!(seen.lock().is_empty());

        let outcome = pipeline
            .submit(frame(&format!("\"*SIA-DCS\"0022L0#AAA[{}", data)))
            .resolve()
            .await;
        assert!(response_body(&outcome).starts_with("\"*ACK\"0022L0#AAA"));
        assert_eq!(*seen.lock(), vec!["AAA:22:OP"]);
    }

    #[tokio::test]
    async fn test_null_message_acknowledged_not_delivered() {
        let (pipeline, _, seen) = setup();
        let outcome = pipeline
            .submit(frame("\"NULL\"0000L0#1234[]"))
            .resolve()
            .await;
        assert_eq!(response_body(&outcome), "\"ACK\"0000L0#1234[]");
        assert!(seen.lock().is_empty());
    }

    #[tokio::test]
    async fn test_reset_replay_window() {
        let (pipeline, _, seen) = setup();
        let body = "\"SIA-DCS\"0005L0#1234[#1234|Nri1/BA002]";
        pipeline.submit(frame(body)).resolve().await;
        pipeline.reset_replay_window("1234").await.unwrap();
        pipeline.submit(frame(body)).resolve().await;
        assert_eq!(seen.lock().len(), 2);
        assert!(pipeline.reset_replay_window("FFFF").await.is_err());
    }
}

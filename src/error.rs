// MIT License - Copyright (c) 2026 Peter Wright
// Error taxonomy for the SIA DC-09 receiver

use std::fmt;

use crate::protocol::ResponseKind;

/// Why an authenticated message was refused by the replay window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReplayReason {
    /// Sequence number equals the last accepted one (panel retransmission).
    Duplicate,
    /// Sequence number is behind the last accepted one.
    Stale,
    /// Panel timestamp outside the account's clock-skew window.
    ClockSkew,
    /// Encrypted message without a timestamp.
    MissingTimestamp,
}

impl ReplayReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Duplicate => "duplicate sequence number",
            Self::Stale => "stale sequence number",
            Self::ClockSkew => "timestamp outside clock-skew window",
            Self::MissingTimestamp => "missing timestamp",
        }
    }
}

impl fmt::Display for ReplayReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// All errors that can occur while receiving and decoding SIA messages.
///
/// None of the variants carry message payloads: they end up in logs, and
/// decrypted content may be sensitive.
#[derive(Debug, thiserror::Error)]
pub enum SiaError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Malformed frame: {details}")]
    MalformedFrame { details: String },

    #[error("Checksum mismatch: computed {computed:04X}, frame says {received:04X}")]
    ChecksumError { computed: u16, received: u16 },

    #[error("Authentication failed for account {account}: {details}")]
    AuthenticationError { account: String, details: String },

    #[error("Replay rejected for account {account}: {reason}")]
    ReplayRejected { account: String, reason: ReplayReason },

    #[error("Parse error: {details}")]
    ParseError { details: String },

    #[error("Unknown account: {account}")]
    UnknownAccount { account: String },

    #[error("Invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("Channel closed")]
    ChannelClosed,
}

impl SiaError {
    pub(crate) fn malformed(details: impl Into<String>) -> Self {
        SiaError::MalformedFrame {
            details: details.into(),
        }
    }

    pub(crate) fn parse(details: impl Into<String>) -> Self {
        SiaError::ParseError {
            details: details.into(),
        }
    }

    pub(crate) fn config(details: impl Into<String>) -> Self {
        SiaError::InvalidConfig {
            details: details.into(),
        }
    }

    /// Whether this error counts toward a connection's bad-frame limit.
    pub fn is_framing(&self) -> bool {
        matches!(
            self,
            SiaError::FrameTooLarge { .. }
                | SiaError::MalformedFrame { .. }
                | SiaError::ChecksumError { .. }
        )
    }

    /// The protocol reply owed to the panel for a frame that failed with
    /// this error, or `None` when nothing should be sent.
    ///
    /// A duplicate is acknowledged again so the panel stops retransmitting;
    /// it is still never delivered twice.
    pub fn response_kind(&self) -> Option<ResponseKind> {
        match self {
            SiaError::FrameTooLarge { .. }
            | SiaError::MalformedFrame { .. }
            | SiaError::ChecksumError { .. }
            | SiaError::AuthenticationError { .. } => Some(ResponseKind::Nak),
            SiaError::ReplayRejected {
                reason: ReplayReason::Duplicate,
                ..
            } => Some(ResponseKind::Ack),
            SiaError::ReplayRejected { .. } => Some(ResponseKind::Nak),
            SiaError::ParseError { .. } => Some(ResponseKind::Duh),
            SiaError::UnknownAccount { .. }
            | SiaError::Io(_)
            | SiaError::InvalidConfig { .. }
            | SiaError::ChannelClosed => None,
        }
    }
}

/// Failure reported by (or on behalf of) a subscriber. Logged by the
/// dispatcher and never propagated further.
#[derive(Debug, thiserror::Error)]
pub enum SubscriberError {
    #[error("Handler failed: {0}")]
    Handler(String),

    #[error("Handler panicked")]
    Panicked,

    #[error("Subscriber channel full")]
    ChannelFull,

    #[error("Subscriber channel closed")]
    ChannelClosed,
}

pub type Result<T> = std::result::Result<T, SiaError>;

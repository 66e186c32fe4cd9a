// MIT License - Copyright (c) 2026 Peter Wright
// Decoded SIA events

use std::fmt;

use bitflags::bitflags;
use chrono::{DateTime, Utc};

use crate::codes::{self, CodeInfo};
use crate::protocol::MessageType;

/// A two-letter SIA event code (`CA`, `BA`, `OP`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventCode([u8; 2]);

impl EventCode {
    /// Build a code from exactly two upper-case ASCII letters.
    pub fn new(code: &str) -> Option<Self> {
        match code.as_bytes() {
            [a, b] if a.is_ascii_uppercase() && b.is_ascii_uppercase() => Some(Self([*a, *b])),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &str {
        // Constructed from two ASCII letters only.
        std::str::from_utf8(&self.0).unwrap_or("??")
    }

    /// Static description of this code, when known.
    pub fn info(&self) -> Option<&'static CodeInfo> {
        codes::lookup(self.as_str())
    }
}

impl fmt::Display for EventCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the event starts, ends or merely reports a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Qualifier {
    New,
    Restore,
    /// Contact ID qualifier 6: previously reported condition still present.
    Status,
}

impl Qualifier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Restore => "restore",
            Self::Status => "status",
        }
    }
}

bitflags! {
    /// Decoding facts a consumer may want to know about an event.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EventFlags: u8 {
        /// The message arrived encrypted.
        const ENCRYPTED         = 0x01;
        /// The zone is beyond the account's configured zone count.
        const ZONE_OUT_OF_RANGE = 0x02;
        /// The message carried a panel timestamp.
        const PANEL_TIMESTAMP   = 0x04;
        /// The event was translated from Contact ID.
        const CONTACT_ID        = 0x08;
    }
}

/// A fully decoded event. Immutable once built and shared between
/// subscribers as `Arc<DecodedEvent>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedEvent {
    pub account: String,
    /// Area the event belongs to (`ri`); 0 = whole account.
    pub zone: u32,
    pub code: EventCode,
    pub qualifier: Qualifier,
    /// Zone/point or user number following the code.
    pub unit: Option<u32>,
    /// User id modifier (`id`).
    pub user: Option<u32>,
    /// Free text attached to the event.
    pub message: Option<String>,
    pub sequence: u16,
    pub received_at: DateTime<Utc>,
    pub panel_time: Option<DateTime<Utc>>,
    pub receiver: Option<String>,
    pub line: Option<String>,
    /// Extended data blocks, brackets stripped.
    pub extended: Vec<String>,
    pub message_type: MessageType,
    pub flags: EventFlags,
}

impl DecodedEvent {
    pub fn description(&self) -> Option<&'static str> {
        self.code.info().map(|i| i.description)
    }

    pub fn concerns(&self) -> Option<&'static str> {
        self.code.info().map(|i| i.concerns)
    }

    pub fn is_zone_out_of_range(&self) -> bool {
        self.flags.contains(EventFlags::ZONE_OUT_OF_RANGE)
    }

    pub fn is_encrypted(&self) -> bool {
        self.flags.contains(EventFlags::ENCRYPTED)
    }
}

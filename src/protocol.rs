// MIT License - Copyright (c) 2026 Peter Wright
// SIA DC-09 message envelope and receiver responses

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::constants::{
    ID_ACK, ID_ADM_CID, ID_DUH, ID_NAK, ID_NULL, ID_SIA_DCS, PAD_SEPARATOR, TIMESTAMP_FORMAT,
};
use crate::crypto::AccountCipher;
use crate::error::{Result, SiaError};

/// Message types a panel may send.
///
/// # Wire layout
///
/// ```text
/// "<*><ID>"<seq:4>[R<rcvr>][L<line>]#<acct>[<data>]<[X...]>*<_HH:MM:SS,MM-DD-YYYY>
/// ```
///
/// A leading `*` inside the quotes marks an encrypted message: everything
/// after the first `[` is then hex ciphertext.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// `SIA-DCS`: SIA DC-04 event data (`Nri1/CA001`).
    SiaDcs,
    /// `ADM-CID`: Ademco Contact ID event data (`1401 01 001`).
    AdmCid,
    /// `NULL`: link test / supervision; acknowledged, never delivered.
    Null,
}

impl MessageType {
    pub fn from_id(id: &str) -> Option<Self> {
        match id {
            ID_SIA_DCS => Some(Self::SiaDcs),
            ID_ADM_CID => Some(Self::AdmCid),
            ID_NULL => Some(Self::Null),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SiaDcs => ID_SIA_DCS,
            Self::AdmCid => ID_ADM_CID,
            Self::Null => ID_NULL,
        }
    }
}

/// The routing part of a frame body, parsed before any decryption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub message_type: MessageType,
    pub encrypted: bool,
    pub sequence: u16,
    /// Receiver number, without the `R` prefix.
    pub receiver: Option<String>,
    /// Line prefix, without the `L` prefix.
    pub line: Option<String>,
    /// Account id, upper-cased.
    pub account: String,
    /// Everything after the first `[`: cleartext content or hex ciphertext.
    pub data: String,
}

impl Envelope {
    /// Parse the envelope of a validated frame body.
    pub fn parse(body: &[u8]) -> Result<Self> {
        if !body.iter().all(|b| b.is_ascii() && !b.is_ascii_control()) {
            return Err(SiaError::parse("body is not printable ASCII"));
        }
        // Checked above: every byte is ASCII.
        let text = std::str::from_utf8(body).map_err(|_| SiaError::parse("body is not UTF-8"))?;

        let rest = text
            .strip_prefix('"')
            .ok_or_else(|| SiaError::parse("missing opening quote"))?;
        let (id, rest) = rest
            .split_once('"')
            .ok_or_else(|| SiaError::parse("missing closing quote"))?;
        let (encrypted, id) = match id.strip_prefix('*') {
            Some(id) => (true, id),
            None => (false, id),
        };
        let message_type = MessageType::from_id(id)
            .ok_or_else(|| SiaError::parse(format!("unsupported message type {:?}", id)))?;

        let (sequence, rest) = take_while(rest, |c| c.is_ascii_digit());
        if sequence.len() != 4 {
            return Err(SiaError::parse("sequence number must be 4 digits"));
        }
        let sequence: u16 = sequence
            .parse()
            .map_err(|_| SiaError::parse("invalid sequence number"))?;

        let (receiver, rest) = take_prefixed_hex(rest, 'R', 6)?;
        let (line, rest) = take_prefixed_hex(rest, 'L', 6)?;

        let rest = rest
            .strip_prefix('#')
            .ok_or_else(|| SiaError::parse("missing account marker"))?;
        let (account, rest) = take_while(rest, |c| c.is_ascii_hexdigit());
        if !(3..=16).contains(&account.len()) {
            return Err(SiaError::parse("account must be 3-16 hex characters"));
        }
        let data = rest
            .strip_prefix('[')
            .ok_or_else(|| SiaError::parse("missing data block"))?;

        Ok(Self {
            message_type,
            encrypted,
            sequence,
            receiver: receiver.map(str::to_string),
            line: line.map(str::to_string),
            account: account.to_ascii_uppercase(),
            data: data.to_string(),
        })
    }
}

fn take_while(s: &str, pred: impl Fn(char) -> bool) -> (&str, &str) {
    let end = s.find(|c: char| !pred(c)).unwrap_or(s.len());
    s.split_at(end)
}

fn take_prefixed_hex(s: &str, prefix: char, max: usize) -> Result<(Option<&str>, &str)> {
    match s.strip_prefix(prefix) {
        Some(rest) => {
            let (value, rest) = take_while(rest, |c| c.is_ascii_hexdigit());
            if value.is_empty() || value.len() > max {
                return Err(SiaError::parse(format!(
                    "{} field must be 1-{} hex characters",
                    prefix, max
                )));
            }
            Ok((Some(value), rest))
        }
        None => Ok((None, s)),
    }
}

/// Content split into its structural parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Content<'a> {
    /// Account named by a leading `#acct|` prefix, if any.
    pub account: Option<&'a str>,
    /// Event data with the `#acct|` prefix removed.
    pub block: &'a str,
    /// Extended data blocks (`[X...]`), brackets stripped.
    pub extended: Vec<&'a str>,
    /// Raw timestamp text following `_`.
    pub timestamp: Option<&'a str>,
}

/// Split cleartext (or decrypted) content into block, extended data and
/// timestamp. The content starts just after the first `[` of the body;
/// encrypted content must already be decrypted and stripped of its pad.
pub fn split_content(content: &str) -> Result<Content<'_>> {
    let (block, mut rest) = content
        .split_once(']')
        .ok_or_else(|| SiaError::parse("unterminated data block"))?;
    let (account, block) = match block
        .strip_prefix('#')
        .and_then(|b| b.split_once(PAD_SEPARATOR))
    {
        Some((account, event))
            if !account.is_empty() && account.bytes().all(|b| b.is_ascii_hexdigit()) =>
        {
            (Some(account), event)
        }
        _ => (None, block),
    };

    let mut extended = Vec::new();
    while let Some(inner) = rest.strip_prefix('[') {
        let (ext, after) = inner
            .split_once(']')
            .ok_or_else(|| SiaError::parse("unterminated extended data block"))?;
        extended.push(ext);
        rest = after;
    }

    let rest = rest.trim_end();
    let timestamp = match rest.strip_prefix('_') {
        Some(ts) => Some(ts),
        None if rest.is_empty() => None,
        None => return Err(SiaError::parse("unexpected data after data block")),
    };

    Ok(Content {
        account,
        block,
        extended,
        timestamp,
    })
}

/// Parse a panel timestamp (`HH:MM:SS,MM-DD-YYYY`, UTC).
pub fn parse_timestamp(text: &str) -> Result<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(text, TIMESTAMP_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|_| SiaError::parse("invalid timestamp"))
}

/// Format a timestamp with its leading `_`.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    format!("_{}", ts.format(TIMESTAMP_FORMAT))
}

/// Kinds of response a receiver sends back to the panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseKind {
    /// Message accepted.
    Ack,
    /// Message rejected (CRC, authentication, timestamp); the panel retries.
    Nak,
    /// Message understood at the transport level but its data could not be
    /// parsed; the panel should not retry.
    Duh,
}

impl ResponseKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ack => ID_ACK,
            Self::Nak => ID_NAK,
            Self::Duh => ID_DUH,
        }
    }
}

/// A response to one received frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response<'a> {
    pub kind: ResponseKind,
    /// The envelope being answered; `None` when the frame could not be
    /// understood far enough to echo its fields.
    pub envelope: Option<&'a Envelope>,
}

impl<'a> Response<'a> {
    pub fn new(kind: ResponseKind, envelope: Option<&'a Envelope>) -> Self {
        Self { kind, envelope }
    }

    /// Build the response body (without framing).
    ///
    /// A `NAK` never echoes the request and always carries the receiver's
    /// clock so the panel can resynchronise. An `ACK` to an encrypted
    /// message is itself encrypted with the account's key.
    pub fn body(&self, cipher: Option<&AccountCipher>, now: DateTime<Utc>) -> String {
        let envelope = match (self.kind, self.envelope) {
            (ResponseKind::Nak, _) | (_, None) => {
                let mut body = format!("\"{}\"0000R0L0A0[]", self.kind.as_str());
                if self.kind == ResponseKind::Nak {
                    body.push_str(&format_timestamp(now));
                }
                return body;
            }
            (_, Some(envelope)) => envelope,
        };

        let encrypt = self.kind == ResponseKind::Ack && envelope.encrypted;
        let mut body = String::with_capacity(64);
        body.push('"');
        if encrypt && cipher.is_some() {
            body.push('*');
        }
        body.push_str(self.kind.as_str());
        body.push('"');
        body.push_str(&format!("{:04}", envelope.sequence));
        if let Some(receiver) = &envelope.receiver {
            body.push('R');
            body.push_str(receiver);
        }
        body.push('L');
        body.push_str(envelope.line.as_deref().unwrap_or("0"));
        body.push('#');
        body.push_str(&envelope.account);
        body.push('[');
        match cipher {
            Some(cipher) if encrypt => {
                let plain = format!("]{}", format_timestamp(now));
                body.push_str(&cipher.encrypt_content(&plain));
            }
            _ => body.push(']'),
        }
        body
    }

    /// Build the framed response ready to write to the panel.
    pub fn encode(&self, cipher: Option<&AccountCipher>, now: DateTime<Utc>) -> Vec<u8> {
        crate::frame::encode_frame(self.body(cipher, now).as_bytes())
    }
}

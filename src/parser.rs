// MIT License - Copyright (c) 2026 Peter Wright
// Event data grammars: SIA-DCS and ADM-CID

use chrono::{DateTime, Utc};

use crate::codes;
use crate::event::{DecodedEvent, EventCode, EventFlags, Qualifier};
use crate::error::{Result, SiaError};
use crate::protocol::{Content, Envelope, MessageType};

/// Event fields recovered from a data block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventData {
    pub code: EventCode,
    pub qualifier: Qualifier,
    pub zone: u32,
    pub unit: Option<u32>,
    pub user: Option<u32>,
    pub message: Option<String>,
    pub contact_id: bool,
}

fn take_digits(s: &str) -> (&str, &str) {
    let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    s.split_at(end)
}

fn parse_number(digits: &str, what: &str) -> Result<Option<u32>> {
    if digits.is_empty() {
        return Ok(None);
    }
    digits
        .parse()
        .map(Some)
        .map_err(|_| SiaError::parse(format!("{} number out of range", what)))
}

/// Parse a SIA-DCS data block such as `Nri1/CA001` or
/// `Nid12/ri2/OP003^John^`.
///
/// Leading modifiers (`ri` area, `id` user, `ti` time, `pi` peripheral) may
/// come in any order, separated by `/`. Only the first event of a block is
/// decoded; its message is the text between `^` marks.
pub fn parse_sia_block(block: &str) -> Result<EventData> {
    let mut rest = block.strip_prefix('N').unwrap_or(block);
    let mut zone = 0;
    let mut user = None;

    loop {
        rest = rest.trim_start_matches('/');
        if let Some(r) = rest.strip_prefix("ri") {
            let (digits, r) = take_digits(r);
            zone = parse_number(digits, "area")?.unwrap_or(0);
            rest = r;
        } else if let Some(r) = rest.strip_prefix("id") {
            let (digits, r) = take_digits(r);
            user = parse_number(digits, "user")?;
            rest = r;
        } else if let Some(r) = rest.strip_prefix("ti") {
            let end = r
                .find(|c: char| !(c.is_ascii_digit() || c == ':'))
                .unwrap_or(r.len());
            rest = &r[end..];
        } else if let Some(r) = rest.strip_prefix("pi") {
            rest = take_digits(r).1;
        } else {
            break;
        }
    }

    let code_text = rest
        .get(..2)
        .ok_or_else(|| SiaError::parse("missing event code"))?;
    let code = EventCode::new(code_text)
        .ok_or_else(|| SiaError::parse(format!("invalid event code {:?}", code_text)))?;
    let (digits, rest) = take_digits(&rest[2..]);
    let unit = parse_number(digits, "unit")?;

    // Free text is only what sits between `^` marks; anything else is a
    // further event of the same block.
    let message = rest
        .strip_prefix('^')
        .map(|r| r.split_once('^').map_or(r, |(text, _)| text).trim())
        .filter(|text| !text.is_empty())
        .map(str::to_string);

    let qualifier = match code.info() {
        Some(info) if info.restore => Qualifier::Restore,
        _ => Qualifier::New,
    };

    Ok(EventData {
        code,
        qualifier,
        zone,
        unit,
        user,
        message,
        contact_id: false,
    })
}

/// Parse an ADM-CID data block `QEEE GG ZZZ` (qualifier, event, group,
/// zone/user) and translate it to a SIA code.
pub fn parse_contact_id_block(block: &str) -> Result<EventData> {
    let mut parts = block.split_whitespace();
    let event = parts
        .next()
        .ok_or_else(|| SiaError::parse("empty contact id block"))?;
    let group = parts.next().unwrap_or("0");
    let point = parts.next().unwrap_or("");

    if event.len() != 4 || !event.bytes().all(|b| b.is_ascii_digit()) {
        return Err(SiaError::parse("contact id event must be 4 digits"));
    }
    let qualifier = match &event[..1] {
        "1" => Qualifier::New,
        "3" => Qualifier::Restore,
        "6" => Qualifier::Status,
        _ => return Err(SiaError::parse("invalid contact id qualifier")),
    };
    let cid: u16 = event[1..]
        .parse()
        .map_err(|_| SiaError::parse("invalid contact id event"))?;
    let sia = codes::contact_id_to_sia(cid, qualifier == Qualifier::Restore)
        .ok_or_else(|| SiaError::parse(format!("unmapped contact id event {:03}", cid)))?;
    let code = EventCode::new(sia).ok_or_else(|| SiaError::parse("invalid mapped code"))?;

    if !group.bytes().all(|b| b.is_ascii_digit()) || !point.bytes().all(|b| b.is_ascii_digit()) {
        return Err(SiaError::parse("contact id group and zone must be digits"));
    }
    let zone = parse_number(group, "group")?.unwrap_or(0);
    let unit = parse_number(point, "zone")?;

    let rest: Vec<&str> = parts.collect();
    let message = (!rest.is_empty()).then(|| rest.join(" "));

    Ok(EventData {
        code,
        qualifier,
        zone,
        unit,
        user: None,
        message,
        contact_id: true,
    })
}

/// Build the delivered event from a parsed envelope and its content.
///
/// Zones beyond `zones` are flagged, not rejected: consumers tolerate
/// partially configured accounts.
pub fn build_event(
    envelope: &Envelope,
    content: &Content<'_>,
    panel_time: Option<DateTime<Utc>>,
    zones: u32,
    received_at: DateTime<Utc>,
) -> Result<DecodedEvent> {
    let data = match envelope.message_type {
        MessageType::SiaDcs => parse_sia_block(content.block)?,
        MessageType::AdmCid => parse_contact_id_block(content.block)?,
        MessageType::Null => return Err(SiaError::parse("NULL messages carry no event")),
    };

    let mut flags = EventFlags::empty();
    if envelope.encrypted {
        flags |= EventFlags::ENCRYPTED;
    }
    if panel_time.is_some() {
        flags |= EventFlags::PANEL_TIMESTAMP;
    }
    if data.contact_id {
        flags |= EventFlags::CONTACT_ID;
    }
    if data.zone > zones {
        flags |= EventFlags::ZONE_OUT_OF_RANGE;
    }

    Ok(DecodedEvent {
        account: envelope.account.clone(),
        zone: data.zone,
        code: data.code,
        qualifier: data.qualifier,
        unit: data.unit,
        user: data.user,
        message: data.message,
        sequence: envelope.sequence,
        received_at,
        panel_time,
        receiver: envelope.receiver.clone(),
        line: envelope.line.clone(),
        extended: content.extended.iter().map(|s| s.to_string()).collect(),
        message_type: envelope.message_type,
        flags,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::split_content;

    #[test]
    fn test_basic_sia_block() {
        let data = parse_sia_block("Nri1/CA001").unwrap();
        assert_eq!(data.code.as_str(), "CA");
        assert_eq!(data.zone, 1);
        assert_eq!(data.unit, Some(1));
        assert_eq!(data.qualifier, Qualifier::New);
        assert_eq!(data.message, None);
    }

    #[test]
    fn test_sia_block_without_modifiers() {
        let data = parse_sia_block("NRP0000").unwrap();
        assert_eq!(data.code.as_str(), "RP");
        assert_eq!(data.zone, 0);
        assert_eq!(data.unit, Some(0));

        let data = parse_sia_block("BA").unwrap();
        assert_eq!(data.code.as_str(), "BA");
        assert_eq!(data.unit, None);
    }

    #[test]
    fn test_sia_block_modifiers_and_text() {
        let data = parse_sia_block("Nti10:12/id7/ri2/OP003^User 'John'^").unwrap();
        assert_eq!(data.code.as_str(), "OP");
        assert_eq!(data.zone, 2);
        assert_eq!(data.user, Some(7));
        assert_eq!(data.unit, Some(3));
        assert_eq!(data.message.as_deref(), Some("User 'John'"));
    }

    #[test]
    fn test_sia_block_text_only_between_carets() {
        let data = parse_sia_block("Nri1/CA001/ri2/OP002").unwrap();
        assert_eq!(data.code.as_str(), "CA");
        assert_eq!(data.zone, 1);
        assert_eq!(data.message, None);

        let data = parse_sia_block("Nri1/OP001^User 'A|B'^/ri2/CL002").unwrap();
        assert_eq!(data.message.as_deref(), Some("User 'A|B'"));

        assert_eq!(parse_sia_block("Nri1/OP001^^").unwrap().message, None);
    }

    #[test]
    fn test_build_event_with_separator_in_text() {
        let envelope =
            Envelope::parse(b"\"SIA-DCS\"0006L0#1234[#1234|Nri1/OP001^User 'A|B'^]").unwrap();
        let content = split_content(&envelope.data).unwrap();
        let event = build_event(&envelope, &content, None, 2, Utc::now()).unwrap();
        assert_eq!(event.code.as_str(), "OP");
        assert_eq!(event.unit, Some(1));
        assert_eq!(event.message.as_deref(), Some("User 'A|B'"));
    }

    #[test]
    fn test_restore_qualifier() {
        assert_eq!(parse_sia_block("Nri1/BR001").unwrap().qualifier, Qualifier::Restore);
        assert_eq!(parse_sia_block("Nri1/BA001").unwrap().qualifier, Qualifier::New);
    }

    #[test]
    fn test_sia_block_errors() {
        for block in ["", "N", "Nri1/", "Nri1/c1", "Nri1/1A", "Nri99999999999/CA"] {
            assert!(
                matches!(parse_sia_block(block), Err(SiaError::ParseError { .. })),
                "accepted {:?}",
                block
            );
        }
    }

    #[test]
    fn test_contact_id_block() {
        let data = parse_contact_id_block("1130 01 015").unwrap();
        assert_eq!(data.code.as_str(), "BA");
        assert_eq!(data.qualifier, Qualifier::New);
        assert_eq!(data.zone, 1);
        assert_eq!(data.unit, Some(15));
        assert!(data.contact_id);

        let data = parse_contact_id_block("3401 02 003").unwrap();
        assert_eq!(data.code.as_str(), "CL");
        assert_eq!(data.qualifier, Qualifier::Restore);
        assert_eq!(data.zone, 2);
    }

    #[test]
    fn test_contact_id_errors() {
        for block in ["", "130 01 015", "2130 01 015", "1999 01 001", "1130 0A 001"] {
            assert!(parse_contact_id_block(block).is_err(), "accepted {:?}", block);
        }
    }

    #[test]
    fn test_build_event_flags_out_of_range_zone() {
        let envelope = Envelope::parse(b"\"SIA-DCS\"0005L0#1234[#1234|Nri9/BA004]").unwrap();
        let content = split_content(&envelope.data).unwrap();
        let now = Utc::now();
        let event = build_event(&envelope, &content, None, 2, now).unwrap();
        assert_eq!(event.account, "1234");
        assert_eq!(event.zone, 9);
        assert_eq!(event.sequence, 5);
        assert!(event.is_zone_out_of_range());
        assert!(!event.is_encrypted());
        assert_eq!(event.received_at, now);

        let event = build_event(&envelope, &content, None, 9, now).unwrap();
        assert!(!event.is_zone_out_of_range());
    }

    #[test]
    fn test_build_event_rejects_null() {
        let envelope = Envelope::parse(b"\"NULL\"0005L0#1234[]").unwrap();
        let content = split_content(&envelope.data).unwrap();
        assert!(build_event(&envelope, &content, None, 2, Utc::now()).is_err());
    }
}

// MIT License - Copyright (c) 2026 Peter Wright
// SIA event code and Contact ID tables

/// Static description of a SIA event code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeInfo {
    pub code: &'static str,
    pub description: &'static str,
    /// What the unit number of the event refers to ("Zone or point",
    /// "User number", "Area number", "Unused", ...).
    pub concerns: &'static str,
    /// Whether the code reports the end of a condition.
    pub restore: bool,
}

const fn info(
    code: &'static str,
    description: &'static str,
    concerns: &'static str,
    restore: bool,
) -> CodeInfo {
    CodeInfo {
        code,
        description,
        concerns,
        restore,
    }
}

/// Common SIA DC-03 event codes, sorted by code.
pub const SIA_CODES: &[CodeInfo] = &[
    info("AR", "AC Restoral", "Unused", true),
    info("AT", "AC Trouble", "Unused", false),
    info("BA", "Burglary Alarm", "Zone or point", false),
    info("BB", "Burglary Bypass", "Zone or point", false),
    info("BC", "Burglary Cancel", "User number", false),
    info("BH", "Burglary Alarm Restore", "Zone or point", true),
    info("BJ", "Burglary Trouble Restore", "Zone or point", true),
    info("BR", "Burglary Restoral", "Zone or point", true),
    info("BS", "Burglary Supervisory", "Zone or point", false),
    info("BT", "Burglary Trouble", "Zone or point", false),
    info("BU", "Burglary Unbypass", "Zone or point", true),
    info("BV", "Burglary Verified", "Area number", false),
    info("BX", "Burglary Test", "Zone or point", false),
    info("CA", "Automatic Closing", "Area number", false),
    info("CB", "Closing Before Exit Delay", "User number", false),
    info("CE", "Closing Extend", "User number", false),
    info("CF", "Forced Closing", "User number", false),
    info("CG", "Close Area", "Area number", false),
    info("CI", "Fail to Close", "Area number", false),
    info("CJ", "Late Close", "User number", false),
    info("CK", "Early Close", "User number", false),
    info("CL", "Closing Report", "User number", false),
    info("CP", "Automatic Closing", "User number", false),
    info("CQ", "Remote Closing", "User number", false),
    info("CR", "Recent Closing", "User number", false),
    info("CS", "Closing Keyswitch", "Zone or point", false),
    info("CW", "Was Force Armed", "Area number", false),
    info("DD", "Access Denied", "Door number", false),
    info("DG", "Access Granted", "Door number", false),
    info("EA", "Exit Alarm", "Zone or point", false),
    info("FA", "Fire Alarm", "Zone or point", false),
    info("FH", "Fire Alarm Restore", "Zone or point", true),
    info("FJ", "Fire Trouble Restore", "Zone or point", true),
    info("FR", "Fire Restoral", "Zone or point", true),
    info("FT", "Fire Trouble", "Zone or point", false),
    info("GA", "Gas Alarm", "Zone or point", false),
    info("GH", "Gas Alarm Restore", "Zone or point", true),
    info("HA", "Holdup Alarm", "Zone or point", false),
    info("HH", "Holdup Alarm Restore", "Zone or point", true),
    info("JA", "User Code Tamper", "Area number", false),
    info("KA", "Heat Alarm", "Zone or point", false),
    info("KH", "Heat Alarm Restore", "Zone or point", true),
    info("LB", "Local Program", "Unused", false),
    info("LR", "Phone Line Restoral", "Line number", true),
    info("LT", "Phone Line Trouble", "Line number", false),
    info("LX", "Local Programming Ended", "Unused", false),
    info("MA", "Medical Alarm", "Zone or point", false),
    info("MH", "Medical Alarm Restore", "Zone or point", true),
    info("NE", "Armed With Zones Excluded", "Area number", false),
    info("NF", "Forced Perimeter Arm", "Area number", false),
    info("NL", "Perimeter Armed", "Area number", false),
    info("NO", "Perimeter Disarmed", "User number", false),
    info("NP", "Perimeter Disarmed Automatically", "Area number", false),
    info("OA", "Automatic Opening", "Area number", false),
    info("OB", "Opening After Alarm", "User number", false),
    info("OG", "Open Area", "Area number", false),
    info("OP", "Opening Report", "User number", false),
    info("OQ", "Remote Opening", "User number", false),
    info("OR", "Disarm From Alarm", "User number", false),
    info("OS", "Opening Keyswitch", "Zone or point", false),
    info("PA", "Panic Alarm", "Zone or point", false),
    info("PH", "Panic Alarm Restore", "Zone or point", true),
    info("PR", "Panic Restoral", "Zone or point", true),
    info("QA", "Emergency Alarm", "Zone or point", false),
    info("RP", "Automatic Test", "Unused", false),
    info("RR", "Power Up", "Unused", false),
    info("RX", "Manual Test", "User number", false),
    info("SA", "Sprinkler Alarm", "Zone or point", false),
    info("TA", "Tamper Alarm", "Zone or point", false),
    info("TR", "Tamper Restoral", "Zone or point", true),
    info("UA", "Untyped Zone Alarm", "Zone or point", false),
    info("UR", "Untyped Zone Restoral", "Zone or point", true),
    info("WA", "Water Alarm", "Zone or point", false),
    info("WH", "Water Alarm Restore", "Zone or point", true),
    info("XR", "Transmitter Battery Restoral", "Zone or point", true),
    info("XT", "Transmitter Battery Trouble", "Zone or point", false),
    info("YC", "Communications Fail", "Unused", false),
    info("YK", "Communications Restoral", "Unused", true),
    info("YP", "Power Supply Trouble", "Unused", false),
    info("YQ", "Power Supply Restored", "Unused", true),
    info("YR", "System Battery Restoral", "Unused", true),
    info("YT", "System Battery Trouble", "Unused", false),
    info("ZA", "Freeze Alarm", "Zone or point", false),
];

/// Look up a SIA code.
pub fn lookup(code: &str) -> Option<&'static CodeInfo> {
    SIA_CODES
        .binary_search_by(|info| info.code.cmp(code))
        .ok()
        .map(|idx| &SIA_CODES[idx])
}

/// Contact ID event → (SIA code for a new event, SIA code for a restore).
///
/// For open/close events Contact ID uses qualifier 1 for an opening
/// (disarm) and 3 for a closing (arm), which the two columns mirror.
const CONTACT_ID_CODES: &[(u16, &str, &str)] = &[
    (100, "MA", "MH"),
    (110, "FA", "FH"),
    (120, "PA", "PH"),
    (121, "HA", "HH"),
    (122, "HA", "HH"),
    (130, "BA", "BH"),
    (131, "BA", "BH"),
    (132, "BA", "BH"),
    (134, "BA", "BH"),
    (137, "TA", "TR"),
    (144, "TA", "TR"),
    (151, "GA", "GH"),
    (154, "WA", "WH"),
    (158, "KA", "KH"),
    (301, "AT", "AR"),
    (302, "YT", "YR"),
    (350, "YC", "YK"),
    (384, "XT", "XR"),
    (401, "OP", "CL"),
    (402, "OG", "CG"),
    (403, "OA", "CA"),
    (407, "OQ", "CQ"),
    (409, "OS", "CS"),
    (441, "OP", "NL"),
    (570, "BB", "BU"),
    (601, "RX", "RX"),
    (602, "RP", "RP"),
];

/// Map a Contact ID event code to its SIA equivalent.
pub fn contact_id_to_sia(event: u16, restore: bool) -> Option<&'static str> {
    CONTACT_ID_CODES
        .iter()
        .find(|(cid, _, _)| *cid == event)
        .map(|(_, new, restored)| if restore { *restored } else { *new })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_sorted_and_unique() {
        for pair in SIA_CODES.windows(2) {
            assert!(pair[0].code < pair[1].code, "{} >= {}", pair[0].code, pair[1].code);
        }
    }

    #[test]
    fn test_lookup() {
        let ca = lookup("CA").unwrap();
        assert_eq!(ca.description, "Automatic Closing");
        assert!(!ca.restore);
        assert!(lookup("BR").unwrap().restore);
        assert_eq!(lookup("RP").unwrap().concerns, "Unused");
        assert!(lookup("ZZ").is_none());
    }

    #[test]
    fn test_every_alarm_panel_code_is_known() {
        for code in [
            "PA", "JA", "TA", "BA", "CA", "CB", "CG", "CL", "CP", "CQ", "CS", "CF", "NP", "NO",
            "OA", "OB", "OG", "OP", "OQ", "OR", "OS", "NL", "NE", "NF", "BR",
        ] {
            assert!(lookup(code).is_some(), "missing {}", code);
        }
    }

    #[test]
    fn test_contact_id_mapping() {
        assert_eq!(contact_id_to_sia(130, false), Some("BA"));
        assert_eq!(contact_id_to_sia(130, true), Some("BH"));
        assert_eq!(contact_id_to_sia(401, false), Some("OP"));
        assert_eq!(contact_id_to_sia(401, true), Some("CL"));
        assert_eq!(contact_id_to_sia(999, false), None);
    }

    #[test]
    fn test_contact_id_targets_are_known() {
        for (cid, new, restored) in CONTACT_ID_CODES {
            assert!(lookup(new).is_some(), "{} -> {}", cid, new);
            assert!(lookup(restored).is_some(), "{} -> {}", cid, restored);
        }
    }
}

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Every data schema revision the engine knows about, oldest first.
///
/// Ordering is declaration order, so `<`/`>=` compare revisions directly.
/// `Unknown` sorts below everything: a store or archive whose marker cannot
/// be read is treated the same as one that predates all supported versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SchemaVersion {
    Unknown,
    V2_4_0,
    V2_5_0,
    V2_6_0,
    V3_0_0,
    V3_0_1,
    V3_0_2,
    V3_0_3,
    V3_1_0,
    V3_2_0,
    V3_2_1,
    V4_0_0,
    V4_0_1,
    V4_1_0,
    V4_2_0,
    V4_2_1,
    V4_3_0,
    V4_4_0,
    V4_4_1,
    V4_4_2,
    V4_4_3,
    V4_5_0,
}

/// Key of the settings row that carries the schema version marker.
pub const VERSION_SETTING_NAME: &str = "DataSchemaVersion";

/// The fixed string <-> version lookup. Nothing else parses version strings.
const VERSION_STRINGS: &[(SchemaVersion, &str)] = &[
    (SchemaVersion::V2_4_0, "2.4.0"),
    (SchemaVersion::V2_5_0, "2.5.0"),
    (SchemaVersion::V2_6_0, "2.6.0"),
    (SchemaVersion::V3_0_0, "3.0.0"),
    (SchemaVersion::V3_0_1, "3.0.1"),
    (SchemaVersion::V3_0_2, "3.0.2"),
    (SchemaVersion::V3_0_3, "3.0.3"),
    (SchemaVersion::V3_1_0, "3.1.0"),
    (SchemaVersion::V3_2_0, "3.2.0"),
    (SchemaVersion::V3_2_1, "3.2.1"),
    (SchemaVersion::V4_0_0, "4.0.0"),
    (SchemaVersion::V4_0_1, "4.0.1"),
    (SchemaVersion::V4_1_0, "4.1.0"),
    (SchemaVersion::V4_2_0, "4.2.0"),
    (SchemaVersion::V4_2_1, "4.2.1"),
    (SchemaVersion::V4_3_0, "4.3.0"),
    (SchemaVersion::V4_4_0, "4.4.0"),
    (SchemaVersion::V4_4_1, "4.4.1"),
    (SchemaVersion::V4_4_2, "4.4.2"),
    (SchemaVersion::V4_4_3, "4.4.3"),
    (SchemaVersion::V4_5_0, "4.5.0"),
];

impl SchemaVersion {
    /// Oldest archive version a restore accepts (it gets reshaped first).
    pub const OLDEST_RESTORABLE: SchemaVersion = SchemaVersion::V2_6_0;
    /// First version produced by the legacy reshape; later steps are incremental.
    pub const BASELINE: SchemaVersion = SchemaVersion::V3_0_0;
    /// Version a fully upgraded store reports.
    pub const CURRENT: SchemaVersion = SchemaVersion::V4_5_0;

    /// Parses a marker value. Anything outside the lookup table is `Unknown`.
    pub fn parse(raw: &str) -> SchemaVersion {
        let trimmed = raw.trim();
        VERSION_STRINGS
            .iter()
            .find(|(_, text)| *text == trimmed)
            .map(|(version, _)| *version)
            .unwrap_or(SchemaVersion::Unknown)
    }

    pub fn as_str(&self) -> &'static str {
        VERSION_STRINGS
            .iter()
            .find(|(version, _)| version == self)
            .map(|(_, text)| *text)
            .unwrap_or("unknown")
    }

    /// The revision immediately after this one, if any.
    pub fn next(&self) -> Option<SchemaVersion> {
        if *self == SchemaVersion::Unknown {
            return None;
        }
        let idx = VERSION_STRINGS.iter().position(|(v, _)| v == self)?;
        VERSION_STRINGS.get(idx + 1).map(|(v, _)| *v)
    }

    pub fn is_known(&self) -> bool {
        *self != SchemaVersion::Unknown
    }

    /// Legacy archives use the `gs_`-prefixed table layout.
    pub fn is_legacy(&self) -> bool {
        self.is_known() && *self < SchemaVersion::BASELINE
    }

    pub fn all() -> impl Iterator<Item = SchemaVersion> {
        VERSION_STRINGS.iter().map(|(v, _)| *v)
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Serialized as the marker string ("4.5.0"), never the variant name.
impl Serialize for SchemaVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for SchemaVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(SchemaVersion::parse(&raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_round_trips_every_known_version() {
        for version in SchemaVersion::all() {
            assert_eq!(SchemaVersion::parse(version.as_str()), version);
        }
    }

    #[test]
    fn unmatched_strings_are_unknown() {
        assert_eq!(SchemaVersion::parse("9.9.9"), SchemaVersion::Unknown);
        assert_eq!(SchemaVersion::parse(""), SchemaVersion::Unknown);
        assert_eq!(SchemaVersion::parse("4.4"), SchemaVersion::Unknown);
        assert_eq!(SchemaVersion::parse(" 4.4.3 "), SchemaVersion::V4_4_3);
    }

    #[test]
    fn ordering_follows_declaration() {
        assert!(SchemaVersion::Unknown < SchemaVersion::V2_4_0);
        assert!(SchemaVersion::V2_6_0 < SchemaVersion::BASELINE);
        assert!(SchemaVersion::V4_4_3 < SchemaVersion::CURRENT);
        assert!(SchemaVersion::V2_5_0 < SchemaVersion::OLDEST_RESTORABLE);
    }

    #[test]
    fn next_walks_one_revision() {
        assert_eq!(SchemaVersion::V2_6_0.next(), Some(SchemaVersion::V3_0_0));
        assert_eq!(SchemaVersion::V4_4_3.next(), Some(SchemaVersion::V4_5_0));
        assert_eq!(SchemaVersion::CURRENT.next(), None);
        assert_eq!(SchemaVersion::Unknown.next(), None);
    }

    #[test]
    fn legacy_is_pre_baseline_only() {
        assert!(SchemaVersion::V2_6_0.is_legacy());
        assert!(!SchemaVersion::V3_0_0.is_legacy());
        assert!(!SchemaVersion::Unknown.is_legacy());
    }

    #[test]
    fn serializes_as_marker_string() {
        assert_eq!(serde_json::to_string(&SchemaVersion::V3_0_0).unwrap(), "\"3.0.0\"");
        let parsed: SchemaVersion = serde_json::from_str("\"2.6.0\"").unwrap();
        assert_eq!(parsed, SchemaVersion::V2_6_0);
        let odd: SchemaVersion = serde_json::from_str("\"7.0\"").unwrap();
        assert_eq!(odd, SchemaVersion::Unknown);
    }
}

//! Card descriptors and tag-standard detection.

use std::fmt;

use bytes::Bytes;

/// Tag standards distinguished by card processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Standard {
    /// ISO/IEC 14443-3: UID-level access (e.g. MIFARE Classic).
    Iso14443_3,
    /// ISO/IEC 14443-4: application-level access via SELECT.
    Iso14443_4,
}

impl Standard {
    /// String form of the standard, as carried in card snapshots.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Iso14443_3 => "TAG_ISO_14443_3",
            Self::Iso14443_4 => "TAG_ISO_14443_4",
        }
    }
}

impl fmt::Display for Standard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Detection predicate mapping an ATR to a tag standard.
pub type StandardPredicate = fn(&[u8]) -> Standard;

/// Default standard detection.
///
/// Looks at ATR byte 5: `0x4F` marks ISO 14443-3, anything else is
/// treated as ISO 14443-4. This is a deliberately loose heuristic; ATRs
/// shorter than 6 bytes fall through to ISO 14443-4. Readers fronting
/// unusual tags can install their own predicate via
/// [`ReaderConfig::with_standard_predicate`](crate::ReaderConfig::with_standard_predicate).
pub fn detect_standard(atr: &[u8]) -> Standard {
    if atr.len() > 5 && atr[5] == 0x4F {
        Standard::Iso14443_3
    } else {
        Standard::Iso14443_4
    }
}

/// Snapshot of the card currently (or last) seen by a reader.
///
/// Cards are transient: built on insertion, dropped on removal. Events
/// carry owned snapshots, never shared mutable state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Card {
    /// Answer-To-Reset reported by the provider, when available.
    pub atr: Option<Bytes>,
    /// Tag standard derived from the ATR.
    pub standard: Option<Standard>,
    /// Hex-encoded UID, populated by ISO 14443-3 processing.
    pub uid: Option<String>,
    /// SELECT payload, populated by ISO 14443-4 processing.
    pub data: Option<Bytes>,
}

impl Card {
    /// Build a card descriptor from an optional ATR.
    pub fn from_atr(atr: Option<Bytes>, detect: StandardPredicate) -> Self {
        let standard = atr.as_deref().map(detect);
        Self {
            atr,
            standard,
            uid: None,
            data: None,
        }
    }

    /// String form of the standard for external consumers.
    pub fn kind(&self) -> Option<&'static str> {
        self.standard.map(Standard::as_str)
    }
}

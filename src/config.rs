//! Reader configuration: processing mode, AID selection, block I/O
//! options.

use std::fmt;

use crate::card::{Card, StandardPredicate, detect_standard};
use crate::error::{ConfigError, Error};

/// Produces an AID for a card at processing time.
pub type AidProvider = Box<dyn Fn(&Card) -> Result<Vec<u8>, Error> + Send + Sync>;

/// Where the SELECT AID comes from.
pub enum AidSource {
    /// A literal AID.
    Fixed(Vec<u8>),
    /// A provider invoked with the card snapshot at processing time.
    Dynamic(AidProvider),
}

impl AidSource {
    /// Parse a hex string into a fixed AID.
    ///
    /// The setter is the validation point: bad hex is rejected here, not
    /// at processing time.
    pub fn from_hex(aid: &str) -> Result<Self, ConfigError> {
        Ok(Self::Fixed(hex::decode(aid)?))
    }

    /// A fixed AID from raw bytes.
    pub fn fixed(aid: impl Into<Vec<u8>>) -> Self {
        Self::Fixed(aid.into())
    }

    /// A dynamic AID computed per card. Failures returned by the provider
    /// surface on the reader's error event, not as a panic.
    pub fn dynamic(
        provider: impl Fn(&Card) -> Result<Vec<u8>, Error> + Send + Sync + 'static,
    ) -> Self {
        Self::Dynamic(Box::new(provider))
    }
}

impl fmt::Debug for AidSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(aid) => f
                .debug_tuple("Fixed")
                .field(&hex::encode_upper(aid))
                .finish(),
            Self::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

/// Reader behaviour configuration.
pub struct ReaderConfig {
    /// Whether inserted cards are processed automatically. When off, the
    /// reader emits the bare card snapshot after connecting and leaves
    /// all APDU exchanges to the consumer.
    pub auto_processing: bool,
    /// AID used for ISO 14443-4 processing.
    pub aid: Option<AidSource>,
    /// Predicate mapping an ATR to a tag standard.
    pub standard_predicate: StandardPredicate,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            auto_processing: true,
            aid: None,
            standard_predicate: detect_standard,
        }
    }
}

impl ReaderConfig {
    /// Create a default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set whether inserted cards are processed automatically.
    pub fn with_auto_processing(mut self, auto_processing: bool) -> Self {
        self.auto_processing = auto_processing;
        self
    }

    /// Set the AID used for ISO 14443-4 processing.
    pub fn with_aid(mut self, aid: AidSource) -> Self {
        self.aid = Some(aid);
        self
    }

    /// Replace the standard-detection predicate.
    pub fn with_standard_predicate(mut self, predicate: StandardPredicate) -> Self {
        self.standard_predicate = predicate;
        self
    }
}

impl fmt::Debug for ReaderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReaderConfig")
            .field("auto_processing", &self.auto_processing)
            .field("aid", &self.aid)
            .finish_non_exhaustive()
    }
}

/// Options for block reads.
///
/// The defaults are MIFARE-Classic-shaped; other tags may need different
/// block and packet sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOptions {
    /// Tag block size in bytes.
    pub block_size: u8,
    /// Maximum bytes fetched per Read Binary request.
    pub packet_size: u8,
    /// Class byte of the Read Binary command.
    pub class: u8,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            block_size: 4,
            packet_size: 16,
            class: 0xFF,
        }
    }
}

impl ReadOptions {
    /// Create default read options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the tag block size.
    pub const fn with_block_size(mut self, block_size: u8) -> Self {
        self.block_size = block_size;
        self
    }

    /// Set the per-request packet size.
    pub const fn with_packet_size(mut self, packet_size: u8) -> Self {
        self.packet_size = packet_size;
        self
    }

    /// Set the Read Binary class byte.
    pub const fn with_class(mut self, class: u8) -> Self {
        self.class = class;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aid_hex_is_decoded_on_assignment() {
        let AidSource::Fixed(aid) = AidSource::from_hex("F0010203040506").unwrap() else {
            panic!("hex AID should be fixed");
        };
        assert_eq!(aid, vec![0xF0, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06]);
    }

    #[test]
    fn bad_aid_hex_is_rejected() {
        assert!(AidSource::from_hex("zz").is_err());
        assert!(AidSource::from_hex("F00").is_err());
    }

    #[test]
    fn read_options_default_to_mifare_shapes() {
        let options = ReadOptions::default();
        assert_eq!(options.block_size, 4);
        assert_eq!(options.packet_size, 16);
        assert_eq!(options.class, 0xFF);
    }
}

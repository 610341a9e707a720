//! APDU command builders and response validation.
//!
//! Commands follow ISO/IEC 7816-4 framing: `CLA INS P1 P2 [Lc data] [Le]`.
//! Every response ends in a big-endian two-byte status word; `0x9000` is
//! the only success status.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::InvalidResponse;
use crate::keys::{KeyType, MifareKey};

/// The status word reported by every successful operation.
pub const SW_SUCCESS: u16 = 0x9000;

/// Status word `6A 82`: file or application not found.
pub const SW_FILE_NOT_FOUND: u16 = 0x6A82;

/// Default class byte for reader-addressed (pseudo-)APDUs.
pub const CLA_READER: u8 = 0xFF;

/// Two-byte status word trailing every APDU response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    /// First status byte.
    pub sw1: u8,
    /// Second status byte.
    pub sw2: u8,
}

impl Status {
    /// The status as a big-endian 16-bit word.
    pub const fn to_u16(self) -> u16 {
        ((self.sw1 as u16) << 8) | self.sw2 as u16
    }

    /// Whether the status word denotes success (`0x9000` exactly).
    pub const fn is_success(self) -> bool {
        self.to_u16() == SW_SUCCESS
    }
}

/// A validated APDU response: payload plus trailing status word.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Response payload, without the status word.
    pub data: Bytes,
    /// Trailing status word.
    pub status: Status,
}

impl Response {
    /// Split a raw response into payload and status word.
    pub fn from_bytes(raw: &[u8]) -> Result<Self, InvalidResponse> {
        if raw.len() < 2 {
            return Err(InvalidResponse);
        }
        let (data, sw) = raw.split_at(raw.len() - 2);
        Ok(Self {
            data: Bytes::copy_from_slice(data),
            status: Status { sw1: sw[0], sw2: sw[1] },
        })
    }

    /// Whether the status word denotes success.
    pub const fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// The status as a big-endian 16-bit word.
    pub const fn status_word(&self) -> u16 {
        self.status.to_u16()
    }

    /// The payload without the status word.
    pub fn payload(&self) -> &[u8] {
        &self.data
    }
}

fn frame(cla: u8, ins: u8, p1: u8, p2: u8, data: &[u8], le: Option<u8>) -> Bytes {
    let mut buf = BytesMut::with_capacity(5 + data.len() + 1);
    buf.put_u8(cla);
    buf.put_u8(ins);
    buf.put_u8(p1);
    buf.put_u8(p2);
    if !data.is_empty() {
        buf.put_u8(data.len() as u8);
        buf.put_slice(data);
    }
    if let Some(le) = le {
        buf.put_u8(le);
    }
    buf.freeze()
}

/// Load a MIFARE key into reader key slot `slot`.
pub fn load_authentication_key(slot: u8, key: &MifareKey) -> Bytes {
    frame(CLA_READER, 0x82, 0x00, slot, key.as_bytes(), None)
}

/// Authenticate a block against a loaded key slot (PC/SC 2.07 framing).
pub fn authenticate(block: u8, key_type: KeyType, slot: u8) -> Bytes {
    frame(
        CLA_READER,
        0x86,
        0x00,
        0x00,
        &[0x01, 0x00, block, key_type as u8, slot],
        None,
    )
}

/// Authenticate a block against a loaded key slot (obsolete PC/SC 2.01
/// framing, kept for old firmware).
///
/// The legacy layout does not follow Lc/data framing: the key type sits
/// where Lc would be, followed by the slot number.
pub fn authenticate_obsolete(block: u8, key_type: KeyType, slot: u8) -> Bytes {
    Bytes::copy_from_slice(&[CLA_READER, 0x88, 0x00, block, key_type as u8, slot])
}

/// Read `length` bytes starting at `block`.
///
/// The class byte is configurable because some tags expect a vendor
/// class for Read Binary.
pub fn read_binary(class: u8, block: u16, length: u8) -> Bytes {
    frame(
        class,
        0xB0,
        (block >> 8) as u8,
        (block & 0xFF) as u8,
        &[],
        Some(length),
    )
}

/// Write one block of data at `block`.
pub fn update_binary(block: u8, data: &[u8]) -> Bytes {
    frame(CLA_READER, 0xD6, 0x00, block, data, None)
}

/// Request the UID of an ISO 14443-3 tag.
pub fn get_uid() -> Bytes {
    frame(CLA_READER, 0xCA, 0x00, 0x00, &[], Some(0x00))
}

/// SELECT an on-card application by AID (ISO 14443-4).
pub fn select_aid(aid: &[u8]) -> Bytes {
    frame(0x00, 0xA4, 0x04, 0x00, aid, Some(0x00))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(hex_str: &str) -> MifareKey {
        hex_str.parse().unwrap()
    }

    #[test]
    fn load_authentication_key_frame() {
        let frame = load_authentication_key(0, &key("FFFFFFFFFFFF"));
        assert_eq!(
            frame.as_ref(),
            &[0xFF, 0x82, 0x00, 0x00, 0x06, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]
        );
    }

    #[test]
    fn authenticate_frame() {
        let frame = authenticate(4, KeyType::A, 0);
        assert_eq!(
            frame.as_ref(),
            &[0xFF, 0x86, 0x00, 0x00, 0x05, 0x01, 0x00, 0x04, 0x60, 0x00]
        );
    }

    #[test]
    fn authenticate_obsolete_frame() {
        let frame = authenticate_obsolete(4, KeyType::B, 1);
        assert_eq!(frame.as_ref(), &[0xFF, 0x88, 0x00, 0x04, 0x61, 0x01]);
    }

    #[test]
    fn read_binary_splits_block_number() {
        let frame = read_binary(0xFF, 0x0104, 16);
        assert_eq!(frame.as_ref(), &[0xFF, 0xB0, 0x01, 0x04, 0x10]);
    }

    #[test]
    fn update_binary_frame() {
        let frame = update_binary(1, &[0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(
            frame.as_ref(),
            &[0xFF, 0xD6, 0x00, 0x01, 0x04, 0xDE, 0xAD, 0xBE, 0xEF]
        );
    }

    #[test]
    fn get_uid_frame() {
        assert_eq!(get_uid().as_ref(), &[0xFF, 0xCA, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn select_aid_frame() {
        let aid = hex::decode("F0010203040506").unwrap();
        let frame = select_aid(&aid);
        assert_eq!(
            frame.as_ref(),
            &[0x00, 0xA4, 0x04, 0x00, 0x07, 0xF0, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x00]
        );
    }

    #[test]
    fn response_splits_payload_and_status() {
        let response = Response::from_bytes(&[0x04, 0xA1, 0xB2, 0xC3, 0x90, 0x00]).unwrap();
        assert_eq!(response.payload(), &[0x04, 0xA1, 0xB2, 0xC3]);
        assert_eq!(response.status_word(), SW_SUCCESS);
        assert!(response.is_success());
    }

    #[test]
    fn response_with_only_status_has_empty_payload() {
        let response = Response::from_bytes(&[0x6A, 0x82]).unwrap();
        assert!(response.payload().is_empty());
        assert_eq!(response.status_word(), SW_FILE_NOT_FOUND);
        assert!(!response.is_success());
    }

    #[test]
    fn short_response_is_rejected() {
        assert_eq!(Response::from_bytes(&[0x90]), Err(InvalidResponse));
        assert_eq!(Response::from_bytes(&[]), Err(InvalidResponse));
    }
}

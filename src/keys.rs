//! MIFARE key material and the reader-side key slot cache.
//!
//! Readers hold a small fixed table of loaded keys. Loading is the slow
//! path, so concurrent requests for the same key are coalesced through a
//! keyed table of in-flight loads: the first caller becomes the
//! initiator, everyone else waits on its gate and observes the same
//! outcome.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Condvar, Mutex};

use crate::error::InvalidKey;

/// Number of key slots offered by the reader.
pub const KEY_SLOT_COUNT: u8 = 2;

/// A 6-byte MIFARE Classic key.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct MifareKey([u8; 6]);

impl MifareKey {
    /// Key bytes.
    pub const fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }

    /// Canonical lowercase hex form, used for slot lookup and load
    /// coalescing.
    pub fn canonical_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for MifareKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MifareKey({})", self.canonical_hex())
    }
}

impl From<[u8; 6]> for MifareKey {
    fn from(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }
}

impl TryFrom<&[u8]> for MifareKey {
    type Error = InvalidKey;

    fn try_from(bytes: &[u8]) -> Result<Self, InvalidKey> {
        bytes.try_into().map(Self).map_err(|_| InvalidKey)
    }
}

impl FromStr for MifareKey {
    type Err = InvalidKey;

    fn from_str(s: &str) -> Result<Self, InvalidKey> {
        let bytes = hex::decode(s).map_err(|_| InvalidKey)?;
        bytes.as_slice().try_into()
    }
}

/// MIFARE key type used during authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum KeyType {
    /// Key A.
    A = 0x60,
    /// Key B.
    B = 0x61,
}

/// Fixed-size table of keys loaded into the reader.
#[derive(Debug, Default)]
pub(crate) struct KeyStore {
    slots: [Option<MifareKey>; KEY_SLOT_COUNT as usize],
}

impl KeyStore {
    /// Find the slot holding `key`, or with `None` the first empty slot.
    pub(crate) fn slot_of(&self, key: Option<&MifareKey>) -> Option<u8> {
        self.slots
            .iter()
            .position(|slot| match (slot, key) {
                (Some(stored), Some(wanted)) => stored == wanted,
                (None, None) => true,
                _ => false,
            })
            .map(|index| index as u8)
    }

    pub(crate) fn store(&mut self, slot: u8, key: MifareKey) {
        self.slots[slot as usize] = Some(key);
    }
}

/// Outcome of a key load shared between coalesced callers: the slot
/// index, or a rendered error message.
pub(crate) type LoadOutcome = Result<u8, String>;

/// One in-flight key load, shared by its initiator and any waiters.
#[derive(Default)]
pub(crate) struct LoadGate {
    outcome: Mutex<Option<LoadOutcome>>,
    ready: Condvar,
}

impl LoadGate {
    /// Block until the initiator settles the load.
    pub(crate) fn wait(&self) -> LoadOutcome {
        let mut outcome = self.outcome.lock().unwrap();
        while outcome.is_none() {
            outcome = self.ready.wait(outcome).unwrap();
        }
        outcome.clone().unwrap()
    }

    /// Settle the load and wake all waiters. The first settlement wins.
    fn settle(&self, result: LoadOutcome) {
        let mut outcome = self.outcome.lock().unwrap();
        if outcome.is_none() {
            *outcome = Some(result);
            self.ready.notify_all();
        }
    }
}

/// Initiator-side handle for an in-flight load.
///
/// Dropping the permit removes the pending entry; if the initiator never
/// settled (panic or early return), waiters are released with an error
/// instead of blocking forever.
pub(crate) struct LoadPermit<'a> {
    gate: Arc<LoadGate>,
    pending: &'a PendingLoads,
    key_hex: String,
}

impl LoadPermit<'_> {
    pub(crate) fn settle(&self, outcome: LoadOutcome) {
        self.gate.settle(outcome);
    }
}

impl Drop for LoadPermit<'_> {
    fn drop(&mut self) {
        self.gate.settle(Err("key load aborted".to_owned()));
        self.pending.clear(&self.key_hex);
    }
}

/// How a caller participates in a key load.
pub(crate) enum LoadTicket<'a> {
    /// This caller must perform the load and settle the gate.
    Initiator(LoadPermit<'a>),
    /// Another caller is loading the same key; wait on its gate.
    Waiter(Arc<LoadGate>),
}

/// Keyed table of in-flight key loads (canonical key hex → gate).
///
/// An entry exists exactly while a load is in flight; the initiator
/// removes it when the load settles.
#[derive(Default)]
pub(crate) struct PendingLoads {
    entries: Mutex<HashMap<String, Arc<LoadGate>>>,
}

impl PendingLoads {
    /// Join the in-flight load for `key_hex`, or become its initiator.
    pub(crate) fn join(&self, key_hex: &str) -> LoadTicket<'_> {
        let mut entries = self.entries.lock().unwrap();
        if let Some(gate) = entries.get(key_hex) {
            LoadTicket::Waiter(Arc::clone(gate))
        } else {
            let gate = Arc::new(LoadGate::default());
            entries.insert(key_hex.to_owned(), Arc::clone(&gate));
            LoadTicket::Initiator(LoadPermit {
                gate,
                pending: self,
                key_hex: key_hex.to_owned(),
            })
        }
    }

    fn clear(&self, key_hex: &str) {
        self.entries.lock().unwrap().remove(key_hex);
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_parses_from_hex() {
        let key: MifareKey = "FFffFFffFFff".parse().unwrap();
        assert_eq!(key.as_bytes(), &[0xFF; 6]);
        assert_eq!(key.canonical_hex(), "ffffffffffff");
    }

    #[test]
    fn wrong_length_keys_are_rejected() {
        assert!("FFFFFFFFFF".parse::<MifareKey>().is_err());
        assert!("FFFFFFFFFFFFFF".parse::<MifareKey>().is_err());
        assert!("not hex at all".parse::<MifareKey>().is_err());
        assert!(MifareKey::try_from(&[0u8; 5][..]).is_err());
    }

    #[test]
    fn slot_lookup_finds_keys_and_empty_slots() {
        let mut store = KeyStore::default();
        let key_a: MifareKey = "a0a1a2a3a4a5".parse().unwrap();
        let key_b: MifareKey = "b0b1b2b3b4b5".parse().unwrap();

        assert_eq!(store.slot_of(None), Some(0));
        assert_eq!(store.slot_of(Some(&key_a)), None);

        store.store(0, key_a);
        assert_eq!(store.slot_of(Some(&key_a)), Some(0));
        assert_eq!(store.slot_of(None), Some(1));

        store.store(1, key_b);
        assert_eq!(store.slot_of(Some(&key_b)), Some(1));
        assert_eq!(store.slot_of(None), None);
    }

    #[test]
    fn second_join_waits_on_the_first() {
        let pending = PendingLoads::default();
        let first = pending.join("ffffffffffff");
        let LoadTicket::Initiator(permit) = first else {
            panic!("first join should initiate");
        };
        let LoadTicket::Waiter(gate) = pending.join("ffffffffffff") else {
            panic!("second join should wait");
        };

        permit.settle(Ok(1));
        assert_eq!(gate.wait(), Ok(1));

        drop(permit);
        assert!(pending.is_empty());
    }

    #[test]
    fn abandoned_permit_releases_waiters() {
        let pending = PendingLoads::default();
        let LoadTicket::Initiator(permit) = pending.join("ffffffffffff") else {
            panic!("first join should initiate");
        };
        let LoadTicket::Waiter(gate) = pending.join("ffffffffffff") else {
            panic!("second join should wait");
        };

        drop(permit);
        assert!(gate.wait().is_err());
        assert!(pending.is_empty());
    }

    #[test]
    fn loads_of_distinct_keys_do_not_coalesce() {
        let pending = PendingLoads::default();
        let LoadTicket::Initiator(_first) = pending.join("a0a1a2a3a4a5") else {
            panic!("first join should initiate");
        };
        assert!(matches!(
            pending.join("b0b1b2b3b4b5"),
            LoadTicket::Initiator(_)
        ));
    }
}

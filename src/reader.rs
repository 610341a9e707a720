//! Reader lifecycle: status-driven state machine, automatic card
//! processing, MIFARE authentication and block I/O.
//!
//! A [`Reader`] is fed provider status changes through
//! [`Reader::handle_status`] and publishes lifecycle events to its
//! subscribers. Failures inside the state machine are emitted on the
//! event stream; they never cross back into the provider's thread.

use std::fmt;
use std::sync::{Arc, Mutex};

use bytes::{Bytes, BytesMut};
use tracing::{debug, warn};

use crate::apdu::{self, Response, SW_FILE_NOT_FOUND, SW_SUCCESS};
use crate::card::{Card, Standard};
use crate::config::{AidSource, ReadOptions, ReaderConfig};
use crate::error::{
    AuthenticationError, ConnectError, ControlError, DisconnectError, Error,
    LoadAuthenticationKeyError, ReadError, TransmitError, WriteError,
};
use crate::event::{Emitter, ReaderEvent, ReaderEventReceiver};
use crate::keys::{KEY_SLOT_COUNT, KeyStore, KeyType, LoadTicket, MifareKey, PendingLoads};
use crate::session::Session;
use crate::transport::{ConnectMode, Port, Protocol, StateFlags};

/// Response budget for the Get UID exchange.
const GET_UID_RESPONSE_LEN: usize = 12;
/// Response budget for the SELECT exchange.
const SELECT_RESPONSE_LEN: usize = 40;

/// Reader vendor classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vendor {
    /// Any CCID reader.
    Standard,
    /// ACS ACR122-class readers (ACR122U, ACR125x).
    Acr122,
}

impl Vendor {
    /// Classify a reader by its provider-reported name.
    pub fn classify(name: &str) -> Self {
        let name = name.to_lowercase();
        if name.contains("acr122") || name.contains("acr125") {
            Self::Acr122
        } else {
            Self::Standard
        }
    }
}

/// Lifecycle phase of a reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No card present.
    Idle,
    /// Card present, not yet connected.
    CardInserted,
    /// Connection open.
    Connected,
    /// Automatic processing in progress.
    Processing,
    /// The reader has been removed; no further events are produced.
    Ended,
}

/// An event-driven card reader on top of a provider [`Port`].
pub struct Reader<P: Port> {
    name: String,
    vendor: Vendor,
    port: P,
    config: Mutex<ReaderConfig>,
    session: Mutex<Session<P::Conn>>,
    keys: Mutex<KeyStore>,
    pending: PendingLoads,
    events: Emitter<ReaderEvent>,
    phase: Mutex<Phase>,
    previous_status: Mutex<StateFlags>,
}

impl<P: Port> fmt::Debug for Reader<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reader")
            .field("name", &self.name)
            .field("vendor", &self.vendor)
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

impl<P: Port> Reader<P> {
    /// Create a reader with default configuration.
    pub fn new(name: impl Into<String>, port: P) -> Self {
        Self::with_config(name, port, ReaderConfig::default())
    }

    /// Create a reader with the given configuration.
    pub fn with_config(name: impl Into<String>, port: P, config: ReaderConfig) -> Self {
        let name = name.into();
        let vendor = Vendor::classify(&name);
        Self {
            name,
            vendor,
            port,
            config: Mutex::new(config),
            session: Mutex::new(Session::new()),
            keys: Mutex::new(KeyStore::default()),
            pending: PendingLoads::default(),
            events: Emitter::new(),
            phase: Mutex::new(Phase::Idle),
            previous_status: Mutex::new(StateFlags::empty()),
        }
    }

    /// The provider-reported reader name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Vendor classification derived from the reader name.
    pub const fn vendor(&self) -> Vendor {
        self.vendor
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> Phase {
        *self.phase.lock().unwrap()
    }

    /// Snapshot of the current card, if any.
    pub fn card(&self) -> Option<Card> {
        self.session.lock().unwrap().card().cloned()
    }

    /// Share mode and protocol of the open connection, if any.
    pub fn connection(&self) -> Option<(ConnectMode, Protocol)> {
        self.session.lock().unwrap().connection_info()
    }

    /// Subscribe to this reader's events.
    pub fn subscribe(&self) -> ReaderEventReceiver {
        self.events.subscribe()
    }

    /// Set the AID used for ISO 14443-4 processing.
    pub fn set_aid(&self, aid: AidSource) {
        self.config.lock().unwrap().aid = Some(aid);
    }

    /// Enable or disable automatic card processing.
    pub fn set_auto_processing(&self, auto_processing: bool) {
        self.config.lock().unwrap().auto_processing = auto_processing;
    }

    /// Open a connection in `mode`.
    pub fn connect(&self, mode: ConnectMode) -> Result<Protocol, ConnectError> {
        self.session.lock().unwrap().connect(&self.port, mode)
    }

    /// Close the connection, leaving the card in the reader.
    pub fn disconnect(&self) -> Result<(), DisconnectError> {
        self.session.lock().unwrap().disconnect()
    }

    /// Exchange a raw APDU frame with the present card.
    pub fn transmit(&self, data: &[u8], max_response_len: usize) -> Result<Bytes, TransmitError> {
        self.session.lock().unwrap().transmit(data, max_response_len)
    }

    /// Send a vendor control escape to the reader itself.
    pub fn control(&self, data: &[u8], max_response_len: usize) -> Result<Bytes, ControlError> {
        self.session.lock().unwrap().control(data, max_response_len)
    }

    /// Load a MIFARE key into reader key slot `slot` (0 or 1) and record
    /// it in the slot cache. Returns the slot on success.
    pub fn load_authentication_key(
        &self,
        slot: u8,
        key: &MifareKey,
    ) -> Result<u8, LoadAuthenticationKeyError> {
        if slot >= KEY_SLOT_COUNT {
            return Err(LoadAuthenticationKeyError::InvalidKeyNumber(slot));
        }
        let frame = apdu::load_authentication_key(slot, key);
        let raw = self.transmit(&frame, 2)?;
        let response = Response::from_bytes(&raw)?;
        if !response.is_success() {
            return Err(LoadAuthenticationKeyError::OperationFailed(
                response.status_word(),
            ));
        }
        debug!(reader = %self.name, slot, "authentication key loaded");
        self.keys.lock().unwrap().store(slot, *key);
        Ok(slot)
    }

    /// Authenticate `block` with `key`, loading the key into a reader
    /// slot first if it is not already held.
    pub fn authenticate(
        &self,
        block: u8,
        key_type: KeyType,
        key: &MifareKey,
    ) -> Result<(), AuthenticationError> {
        self.authenticate_inner(block, key_type, key, false)
    }

    /// [`authenticate`](Self::authenticate) using the obsolete PC/SC 2.01
    /// command framing.
    pub fn authenticate_obsolete(
        &self,
        block: u8,
        key_type: KeyType,
        key: &MifareKey,
    ) -> Result<(), AuthenticationError> {
        self.authenticate_inner(block, key_type, key, true)
    }

    fn authenticate_inner(
        &self,
        block: u8,
        key_type: KeyType,
        key: &MifareKey,
        obsolete: bool,
    ) -> Result<(), AuthenticationError> {
        let slot = self.slot_for(key)?;
        let frame = if obsolete {
            apdu::authenticate_obsolete(block, key_type, slot)
        } else {
            apdu::authenticate(block, key_type, slot)
        };
        let raw = self.transmit(&frame, 2)?;
        let response = Response::from_bytes(&raw)?;
        if !response.is_success() {
            return Err(AuthenticationError::OperationFailed(response.status_word()));
        }
        Ok(())
    }

    /// Resolve the slot holding `key`, coalescing concurrent loads of
    /// the same key into a single wire operation.
    fn slot_for(&self, key: &MifareKey) -> Result<u8, AuthenticationError> {
        if let Some(slot) = self.keys.lock().unwrap().slot_of(Some(key)) {
            return Ok(slot);
        }
        let key_hex = key.canonical_hex();
        match self.pending.join(&key_hex) {
            LoadTicket::Waiter(gate) => {
                debug!(reader = %self.name, "awaiting in-flight key load");
                gate.wait().map_err(AuthenticationError::UnableToLoadKey)
            }
            LoadTicket::Initiator(permit) => {
                // the previous initiator may have landed the key between
                // our lookup and joining
                if let Some(slot) = self.keys.lock().unwrap().slot_of(Some(key)) {
                    permit.settle(Ok(slot));
                    return Ok(slot);
                }
                let slot = self.pick_slot();
                let outcome = self
                    .load_authentication_key(slot, key)
                    .map_err(|e| e.to_string());
                permit.settle(outcome.clone());
                outcome.map_err(AuthenticationError::UnableToLoadKey)
            }
        }
    }

    /// Choose a slot for a new key: the first empty slot, or slot 0 as
    /// the overwrite victim when every slot is taken.
    fn pick_slot(&self) -> u8 {
        self.keys.lock().unwrap().slot_of(None).unwrap_or(0)
    }

    /// Read `length` bytes starting at `block` with default MIFARE
    /// options.
    pub fn read(&self, block: u16, length: usize) -> Result<Bytes, ReadError> {
        self.read_with(block, length, ReadOptions::default())
    }

    /// Read with explicit chunking options.
    ///
    /// Requests larger than the packet size are split into
    /// ⌈length/packet⌉ sub-reads at consecutive block offsets; results
    /// are reassembled in request order and the first failing sub-read
    /// fails the whole operation.
    pub fn read_with(
        &self,
        block: u16,
        length: usize,
        options: ReadOptions,
    ) -> Result<Bytes, ReadError> {
        let packet = options.packet_size as usize;
        if length > packet {
            let requests = length.div_ceil(packet);
            debug!(reader = %self.name, block, length, requests, "splitting read");
            let mut out = BytesMut::with_capacity(length);
            for i in 0..requests {
                let offset = i * packet;
                let start = block + (offset / options.block_size as usize) as u16;
                let chunk = packet.min(length - offset) as u8;
                out.extend_from_slice(&self.read_single(start, chunk, options.class)?);
            }
            Ok(out.freeze())
        } else {
            self.read_single(block, length as u8, options.class)
        }
    }

    fn read_single(&self, block: u16, length: u8, class: u8) -> Result<Bytes, ReadError> {
        let frame = apdu::read_binary(class, block, length);
        let raw = self.transmit(&frame, length as usize + 2)?;
        let response = Response::from_bytes(&raw)?;
        if !response.is_success() {
            return Err(ReadError::OperationFailed(response.status_word()));
        }
        Ok(response.data)
    }

    /// Write `data` starting at `block` with the default MIFARE block
    /// size of 4.
    pub fn write(&self, block: u8, data: &[u8]) -> Result<(), WriteError> {
        self.write_with(block, data, 4)
    }

    /// Write with an explicit block size.
    ///
    /// `data` must be at least one block long and a whole number of
    /// blocks; larger payloads are split into single-block writes at
    /// consecutive block numbers.
    pub fn write_with(&self, block: u8, data: &[u8], block_size: u8) -> Result<(), WriteError> {
        let step = block_size as usize;
        if step == 0 || data.len() < step || data.len() % step != 0 {
            return Err(WriteError::InvalidDataLength);
        }
        let blocks = data.len() / step;
        // single-byte block addressing on the wire
        if usize::from(block) + blocks - 1 > usize::from(u8::MAX) {
            return Err(WriteError::InvalidDataLength);
        }
        if blocks > 1 {
            debug!(reader = %self.name, block, length = data.len(), blocks, "splitting write");
            for (i, chunk) in data.chunks(step).enumerate() {
                self.write_single(block + i as u8, chunk)?;
            }
            Ok(())
        } else {
            self.write_single(block, data)
        }
    }

    fn write_single(&self, block: u8, data: &[u8]) -> Result<(), WriteError> {
        let frame = apdu::update_binary(block, data);
        let raw = self.transmit(&frame, 2)?;
        let response = Response::from_bytes(&raw)?;
        if !response.is_success() {
            return Err(WriteError::OperationFailed(response.status_word()));
        }
        Ok(())
    }

    /// Feed a provider status change into the reader's state machine.
    ///
    /// Insertion and removal are detected on the rising edge of the
    /// PRESENT and EMPTY bits against the previously observed status.
    /// Failures during the resulting transitions are emitted on the
    /// event stream, never returned.
    pub fn handle_status(&self, status: StateFlags, atr: Option<Bytes>) {
        if self.phase() == Phase::Ended {
            return;
        }
        let previous = {
            let mut slot = self.previous_status.lock().unwrap();
            std::mem::replace(&mut *slot, status)
        };
        let changes = previous ^ status;
        if changes.contains(StateFlags::EMPTY) && status.contains(StateFlags::EMPTY) {
            self.handle_card_removed();
        }
        if changes.contains(StateFlags::PRESENT) && status.contains(StateFlags::PRESENT) {
            self.handle_card_inserted(atr);
        }
    }

    /// Mark the reader as removed and emit `End` exactly once.
    pub fn end(&self) {
        {
            let mut phase = self.phase.lock().unwrap();
            if *phase == Phase::Ended {
                return;
            }
            *phase = Phase::Ended;
        }
        debug!(reader = %self.name, "reader removed");
        self.events.emit(ReaderEvent::End);
    }

    fn handle_card_removed(&self) {
        if let Some(card) = self.card() {
            debug!(reader = %self.name, "card removed");
            self.events.emit(ReaderEvent::CardRemoved(card));
        }
        let disconnected = {
            let mut session = self.session.lock().unwrap();
            session.take_card();
            if session.is_connected() {
                session.disconnect()
            } else {
                Ok(())
            }
        };
        *self.phase.lock().unwrap() = Phase::Idle;
        if let Err(e) = disconnected {
            self.emit_error(e.into());
        }
    }

    fn handle_card_inserted(&self, atr: Option<Bytes>) {
        let (auto_processing, predicate) = {
            let config = self.config.lock().unwrap();
            (config.auto_processing, config.standard_predicate)
        };
        let card = Card::from_atr(atr, predicate);
        debug!(
            reader = %self.name,
            atr = ?card.atr.as_deref().map(hex::encode),
            standard = ?card.standard,
            "card inserted"
        );
        {
            let mut session = self.session.lock().unwrap();
            session.set_card(card.clone());
        }
        *self.phase.lock().unwrap() = Phase::CardInserted;

        if let Err(e) = self.connect(ConnectMode::Card) {
            self.emit_error(e.into());
            return;
        }
        *self.phase.lock().unwrap() = Phase::Connected;

        if auto_processing {
            *self.phase.lock().unwrap() = Phase::Processing;
            self.process_card();
            *self.phase.lock().unwrap() = Phase::Connected;
        } else {
            self.events.emit(ReaderEvent::Card(card));
        }
    }

    fn process_card(&self) {
        let Some(card) = self.card() else { return };
        match card.standard {
            Some(Standard::Iso14443_3) => self.process_uid(),
            Some(Standard::Iso14443_4) => self.process_select(card),
            None => {
                warn!(reader = %self.name, "card has no detectable standard, emitting as-is");
                self.events.emit(ReaderEvent::Card(card));
            }
        }
    }

    /// ISO 14443-3: fetch the UID and publish the card.
    fn process_uid(&self) {
        match self.fetch_uid() {
            Ok(uid) => {
                let snapshot = {
                    let mut session = self.session.lock().unwrap();
                    match session.card_mut() {
                        Some(card) => {
                            card.uid = Some(uid);
                            card.clone()
                        }
                        // card vanished mid-processing
                        None => return,
                    }
                };
                debug!(
                    reader = %self.name,
                    uid = snapshot.uid.as_deref().unwrap_or_default(),
                    "card processed"
                );
                self.events.emit(ReaderEvent::Card(snapshot));
            }
            Err(e) => self.emit_error(e.into()),
        }
    }

    fn fetch_uid(&self) -> Result<String, crate::error::GetUidError> {
        let raw = self.transmit(&apdu::get_uid(), GET_UID_RESPONSE_LEN)?;
        let response = Response::from_bytes(&raw)?;
        if !response.is_success() {
            return Err(crate::error::GetUidError::OperationFailed(
                response.status_word(),
            ));
        }
        Ok(hex::encode(response.payload()))
    }

    /// ISO 14443-4: SELECT the configured application and publish the
    /// card with the SELECT payload.
    fn process_select(&self, card: Card) {
        let resolved = {
            let config = self.config.lock().unwrap();
            match &config.aid {
                None => Err(Error::AidNotSet),
                Some(AidSource::Fixed(aid)) => Ok(aid.clone()),
                Some(AidSource::Dynamic(provider)) => provider(&card),
            }
        };
        let aid = match resolved {
            Ok(aid) => aid,
            Err(e) => {
                self.emit_error(e);
                return;
            }
        };
        match self.select_application(&aid) {
            Ok(data) => {
                let snapshot = {
                    let mut session = self.session.lock().unwrap();
                    match session.card_mut() {
                        Some(card) => {
                            card.data = Some(data);
                            card.clone()
                        }
                        None => return,
                    }
                };
                debug!(reader = %self.name, aid = %hex::encode_upper(&aid), "application selected");
                self.events.emit(ReaderEvent::Card(snapshot));
            }
            Err(e) => self.emit_error(e),
        }
    }

    fn select_application(&self, aid: &[u8]) -> Result<Bytes, Error> {
        let raw = self.transmit(&apdu::select_aid(aid), SELECT_RESPONSE_LEN)?;
        let response = Response::from_bytes(&raw)?;
        match response.status_word() {
            SW_SUCCESS => Ok(response.data),
            SW_FILE_NOT_FOUND => Err(Error::TagNotCompatible(hex::encode_upper(aid))),
            status => Err(Error::SelectFailed {
                aid: hex::encode_upper(aid),
                status,
            }),
        }
    }

    fn emit_error(&self, error: Error) {
        warn!(reader = %self.name, %error, "reader error");
        self.events.emit(ReaderEvent::Error(Arc::new(error)));
    }
}

//! Event-driven contactless smart-card access over PC/SC.
//!
//! This crate turns raw PC/SC reader status changes and opaque byte-level
//! card exchanges into a typed, event-driven surface: card discovery,
//! connection lifecycle, MIFARE Classic key management and
//! authentication, block-level read/write with automatic paging,
//! ISO/IEC 14443-3 UID acquisition and ISO/IEC 14443-4 application
//! selection.
//!
//! # Examples
//!
//! ```no_run
//! use tapcard::{DeviceEvent, DeviceManager, ReaderEvent};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let manager = DeviceManager::new()?;
//!     let devices = manager.subscribe();
//!     manager.watch();
//!
//!     while let Ok(event) = devices.recv() {
//!         match event {
//!             DeviceEvent::Attached(reader) => {
//!                 println!("reader attached: {}", reader.name());
//!                 let cards = reader.subscribe();
//!                 std::thread::spawn(move || {
//!                     while let Ok(event) = cards.recv() {
//!                         match event {
//!                             ReaderEvent::Card(card) => {
//!                                 println!("card: {:?}", card.uid);
//!                             }
//!                             ReaderEvent::CardRemoved(_) => println!("card removed"),
//!                             ReaderEvent::Error(e) => eprintln!("error: {e}"),
//!                             ReaderEvent::End => break,
//!                         }
//!                     }
//!                 });
//!             }
//!             DeviceEvent::Error(e) => eprintln!("error: {e}"),
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! Automatic processing can be turned off per reader, in which case the
//! consumer receives the bare card snapshot after connect and drives the
//! exchange itself through [`Reader::transmit`].

#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![warn(missing_docs)]

pub mod apdu;
mod card;
mod config;
mod error;
mod event;
mod keys;
mod manager;
mod pcsc_port;
mod reader;
mod session;
mod transport;

pub use card::{Card, Standard, StandardPredicate, detect_standard};
pub use config::{AidProvider, AidSource, ReadOptions, ReaderConfig};
pub use error::{
    AuthenticationError, ConfigError, ConnectError, ControlError, DisconnectError, Error,
    GetUidError, InvalidKey, InvalidResponse, LoadAuthenticationKeyError, ReadError,
    TransmitError, WriteError,
};
pub use event::{ReaderEvent, ReaderEventReceiver, ReaderEventSender};
pub use keys::{KEY_SLOT_COUNT, KeyType, MifareKey};
pub use manager::{DeviceEvent, DeviceManager, PcscReader};
pub use pcsc_port::{PcscConnection, PcscPort};
pub use reader::{Phase, Reader, Vendor};
pub use transport::{
    ConnectMode, Connection, Port, PortError, Protocol, StateFlags, ioctl_ccid_escape,
};

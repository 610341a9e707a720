//! Error types for reader and card operations.
//!
//! Each operation kind has its own error enum; [`Error`] aggregates them
//! for the event stream. Status-word failures carry the offending status
//! in the message, formatted as hex.

use thiserror::Error;

use crate::transport::PortError;

/// A response did not contain at least a status word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid response: missing status word")]
pub struct InvalidResponse;

/// Key material with the wrong length or encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid key: a MIFARE key is exactly 6 bytes")]
pub struct InvalidKey;

/// Errors from [`Reader::connect`](crate::Reader::connect).
#[derive(Debug, Error)]
pub enum ConnectError {
    /// The provider refused the connection.
    #[error("an error occurred while connecting")]
    Failure(#[source] PortError),
}

/// Errors from [`Reader::disconnect`](crate::Reader::disconnect).
#[derive(Debug, Error)]
pub enum DisconnectError {
    /// There is no open connection to tear down.
    #[error("cannot disconnect: reader not connected")]
    NotConnected,
    /// The provider failed to close the connection.
    #[error("an error occurred while disconnecting")]
    Failure(#[source] PortError),
}

/// Errors from [`Reader::transmit`](crate::Reader::transmit).
#[derive(Debug, Error)]
pub enum TransmitError {
    /// No card is present or no connection is open.
    #[error("cannot transmit data: card or connection not available")]
    CardNotConnected,
    /// The provider failed to exchange the frame.
    #[error("an error occurred while transmitting")]
    Failure(#[source] PortError),
}

/// Errors from [`Reader::control`](crate::Reader::control).
#[derive(Debug, Error)]
pub enum ControlError {
    /// No connection is open.
    #[error("cannot send control escape: connection not available")]
    NotConnected,
    /// The provider failed to execute the escape.
    #[error("an error occurred while sending a control escape")]
    Failure(#[source] PortError),
}

/// Errors from [`Reader::load_authentication_key`](crate::Reader::load_authentication_key).
#[derive(Debug, Error)]
pub enum LoadAuthenticationKeyError {
    /// The key was not 6 bytes.
    #[error(transparent)]
    InvalidKey(#[from] InvalidKey),
    /// Key slots are numbered 0 and 1.
    #[error("invalid key number {0}: key slots are 0 and 1")]
    InvalidKeyNumber(u8),
    /// The exchange with the reader failed.
    #[error(transparent)]
    Transmit(#[from] TransmitError),
    /// The response was too short to validate.
    #[error(transparent)]
    InvalidResponse(#[from] InvalidResponse),
    /// The reader rejected the key load.
    #[error("load authentication key operation failed: status 0x{0:04x}")]
    OperationFailed(u16),
}

/// Errors from [`Reader::authenticate`](crate::Reader::authenticate).
#[derive(Debug, Error)]
pub enum AuthenticationError {
    /// The key could not be placed into a reader slot.
    #[error("unable to load key into a reader slot: {0}")]
    UnableToLoadKey(String),
    /// The exchange with the reader failed.
    #[error(transparent)]
    Transmit(#[from] TransmitError),
    /// The response was too short to validate.
    #[error(transparent)]
    InvalidResponse(#[from] InvalidResponse),
    /// The card refused the authentication.
    #[error("authentication operation failed: status 0x{0:04x}")]
    OperationFailed(u16),
}

/// Errors from [`Reader::read`](crate::Reader::read).
#[derive(Debug, Error)]
pub enum ReadError {
    /// The exchange with the card failed.
    #[error(transparent)]
    Transmit(#[from] TransmitError),
    /// The response was too short to validate.
    #[error(transparent)]
    InvalidResponse(#[from] InvalidResponse),
    /// The card refused the read.
    #[error("read operation failed: status 0x{0:04x}")]
    OperationFailed(u16),
}

/// Errors from [`Reader::write`](crate::Reader::write).
#[derive(Debug, Error)]
pub enum WriteError {
    /// Data must be at least one block long and a whole number of blocks.
    #[error("invalid data length: must be a positive multiple of the block size")]
    InvalidDataLength,
    /// The exchange with the card failed.
    #[error(transparent)]
    Transmit(#[from] TransmitError),
    /// The response was too short to validate.
    #[error(transparent)]
    InvalidResponse(#[from] InvalidResponse),
    /// The card refused the write.
    #[error("write operation failed: status 0x{0:04x}")]
    OperationFailed(u16),
}

/// Errors from UID acquisition on ISO 14443-3 tags.
#[derive(Debug, Error)]
pub enum GetUidError {
    /// The exchange with the card failed.
    #[error(transparent)]
    Transmit(#[from] TransmitError),
    /// The response was too short to validate.
    #[error(transparent)]
    InvalidResponse(#[from] InvalidResponse),
    /// The card refused the UID request.
    #[error("get UID operation failed: status 0x{0:04x}")]
    OperationFailed(u16),
}

/// Errors from reader configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The AID hex string could not be decoded.
    #[error("invalid AID hex string")]
    InvalidAid(#[from] hex::FromHexError),
}

/// Aggregated error type, as carried by the event stream.
#[derive(Debug, Error)]
pub enum Error {
    /// Connection establishment failed.
    #[error(transparent)]
    Connect(#[from] ConnectError),
    /// Connection teardown failed.
    #[error(transparent)]
    Disconnect(#[from] DisconnectError),
    /// A card exchange failed.
    #[error(transparent)]
    Transmit(#[from] TransmitError),
    /// A control escape failed.
    #[error(transparent)]
    Control(#[from] ControlError),
    /// A key load failed.
    #[error(transparent)]
    LoadAuthenticationKey(#[from] LoadAuthenticationKeyError),
    /// An authentication failed.
    #[error(transparent)]
    Authentication(#[from] AuthenticationError),
    /// A block read failed.
    #[error(transparent)]
    Read(#[from] ReadError),
    /// A block write failed.
    #[error(transparent)]
    Write(#[from] WriteError),
    /// A UID acquisition failed.
    #[error(transparent)]
    GetUid(#[from] GetUidError),
    /// A configuration value was rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// A response could not be validated.
    #[error(transparent)]
    InvalidResponse(#[from] InvalidResponse),
    /// The provider reported a failure outside any operation.
    #[error(transparent)]
    Port(#[from] PortError),
    /// ISO 14443-4 processing was requested without an AID configured.
    #[error("cannot process ISO 14443-4 tag: no AID set")]
    AidNotSet,
    /// A dynamic AID provider failed to produce an AID.
    #[error("AID provider failed: {0}")]
    AidProvider(String),
    /// SELECT returned file-not-found for the configured AID.
    #[error("tag not compatible with AID {0}")]
    TagNotCompatible(String),
    /// SELECT failed with an unexpected status word.
    #[error("cannot select AID {aid}: status 0x{status:04x}")]
    SelectFailed {
        /// The AID that was selected, hex-encoded.
        aid: String,
        /// The status word returned by the card.
        status: u16,
    },
}

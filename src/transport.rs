//! Provider capability seam: ports, connections and platform constants.
//!
//! A [`Port`] is one physical reader as exposed by the provider; a
//! [`Connection`] is an open card (or direct) channel on it. The PC/SC
//! implementation lives in [`crate::pcsc_port`]; tests run against a
//! scripted mock.

use bitflags::bitflags;
use thiserror::Error;

bitflags! {
    /// Reader status bits, numerically equal to the PC/SC
    /// `SCARD_STATE_*` constants.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct StateFlags: u32 {
        /// No card in the reader.
        const EMPTY = 0x0010;
        /// A card is present.
        const PRESENT = 0x0020;
    }
}

/// How a connection is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectMode {
    /// Direct reader access without a card (provider "direct" share).
    Direct,
    /// Card access (provider "shared" share).
    Card,
}

/// Active protocol negotiated by the provider (`SCARD_PROTOCOL_*` codes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Protocol {
    /// No protocol negotiated (direct connections).
    Undefined = 0,
    /// T=0 character-oriented protocol.
    T0 = 1,
    /// T=1 block-oriented protocol.
    T1 = 2,
}

/// Control code for vendor escape commands (`IOCTL_CCID_ESCAPE`).
///
/// Windows encodes it as `SCARD_CTL_CODE(3500)`; everywhere else the
/// pcsc-lite encoding `SCARD_CTL_CODE(1)` applies.
pub const fn ioctl_ccid_escape() -> u32 {
    if cfg!(windows) {
        (0x31 << 16) | (3500 << 2)
    } else {
        0x4200_0000 + 1
    }
}

/// Failures reported by the provider layer.
#[derive(Debug, Error)]
pub enum PortError {
    /// PC/SC error.
    #[error("PC/SC error: {0}")]
    Pcsc(#[from] pcsc::Error),
    /// Any other provider failure.
    #[error("{0}")]
    Other(String),
}

/// One physical reader as exposed by the provider.
pub trait Port: Send + Sync {
    /// Connection type produced by this port.
    type Conn: Connection;

    /// Open a connection in the given mode.
    fn connect(&self, mode: ConnectMode) -> Result<(Self::Conn, Protocol), PortError>;
}

/// An open channel to a card or reader.
pub trait Connection: Send {
    /// Exchange an APDU frame with the card.
    fn transmit(&self, data: &[u8], max_response_len: usize) -> Result<Vec<u8>, PortError>;

    /// Send a control escape to the reader itself.
    fn control(&self, code: u32, data: &[u8], max_response_len: usize)
    -> Result<Vec<u8>, PortError>;

    /// Close the channel, leaving the card in the reader.
    fn disconnect(&mut self) -> Result<(), PortError>;
}

#[cfg(test)]
pub(crate) mod mock {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use super::{ConnectMode, Connection, Port, PortError, Protocol};

    #[derive(Default)]
    pub(crate) struct MockState {
        pub(crate) transmitted: Vec<Vec<u8>>,
        pub(crate) responses: VecDeque<Vec<u8>>,
        pub(crate) controls: Vec<(u32, Vec<u8>)>,
        /// Artificial latency applied to frames starting with the prefix.
        pub(crate) delay_on_prefix: Option<(Vec<u8>, Duration)>,
        pub(crate) disconnects: u32,
    }

    /// Scripted connection: records every frame it sees and replays
    /// queued responses in order.
    #[derive(Clone, Default)]
    pub(crate) struct MockConnection {
        pub(crate) state: Arc<Mutex<MockState>>,
    }

    impl MockConnection {
        pub(crate) fn push_response(&self, bytes: &[u8]) {
            self.state.lock().unwrap().responses.push_back(bytes.to_vec());
        }

        pub(crate) fn transmitted(&self) -> Vec<Vec<u8>> {
            self.state.lock().unwrap().transmitted.clone()
        }

        pub(crate) fn set_delay_on_prefix(&self, prefix: &[u8], delay: Duration) {
            self.state.lock().unwrap().delay_on_prefix = Some((prefix.to_vec(), delay));
        }
    }

    impl Connection for MockConnection {
        fn transmit(&self, data: &[u8], _max_response_len: usize) -> Result<Vec<u8>, PortError> {
            let delay = {
                let mut state = self.state.lock().unwrap();
                state.transmitted.push(data.to_vec());
                match &state.delay_on_prefix {
                    Some((prefix, delay)) if data.starts_with(prefix) => Some(*delay),
                    _ => None,
                }
            };
            if let Some(delay) = delay {
                std::thread::sleep(delay);
            }
            self.state
                .lock()
                .unwrap()
                .responses
                .pop_front()
                .ok_or_else(|| PortError::Other("no scripted response".into()))
        }

        fn control(
            &self,
            code: u32,
            data: &[u8],
            _max_response_len: usize,
        ) -> Result<Vec<u8>, PortError> {
            self.state.lock().unwrap().controls.push((code, data.to_vec()));
            Ok(Vec::new())
        }

        fn disconnect(&mut self) -> Result<(), PortError> {
            self.state.lock().unwrap().disconnects += 1;
            Ok(())
        }
    }

    /// Port handing out clones of a single scripted connection.
    #[derive(Clone, Default)]
    pub(crate) struct MockPort {
        pub(crate) conn: MockConnection,
        pub(crate) fail_connect: bool,
    }

    impl Port for MockPort {
        type Conn = MockConnection;

        fn connect(&self, mode: ConnectMode) -> Result<(MockConnection, Protocol), PortError> {
            if self.fail_connect {
                return Err(PortError::Other("connect refused".into()));
            }
            let protocol = match mode {
                ConnectMode::Direct => Protocol::Undefined,
                ConnectMode::Card => Protocol::T1,
            };
            Ok((self.conn.clone(), protocol))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(not(windows))]
    fn ccid_escape_uses_pcsc_lite_encoding() {
        assert_eq!(ioctl_ccid_escape(), 0x4200_0001);
    }

    #[test]
    #[cfg(windows)]
    fn ccid_escape_uses_windows_encoding() {
        assert_eq!(ioctl_ccid_escape(), (0x31 << 16) | (3500 << 2));
    }

    #[test]
    fn state_flags_match_provider_constants() {
        assert_eq!(StateFlags::EMPTY.bits(), 0x0010);
        assert_eq!(StateFlags::PRESENT.bits(), 0x0020);
    }
}

//! Connection lifecycle and raw exchanges for one reader.

use bytes::Bytes;
use tracing::trace;

use crate::card::Card;
use crate::error::{ConnectError, ControlError, DisconnectError, TransmitError};
use crate::transport::{ConnectMode, Connection, Port, Protocol, ioctl_ccid_escape};

/// An open provider connection plus its negotiated parameters.
#[derive(Debug)]
struct Active<C> {
    conn: C,
    mode: ConnectMode,
    protocol: Protocol,
}

/// Per-reader session state: the connection and the current card.
///
/// `transmit` requires both a card and a connection; `control` only
/// needs the connection.
#[derive(Debug)]
pub(crate) struct Session<C: Connection> {
    connection: Option<Active<C>>,
    card: Option<Card>,
}

impl<C: Connection> Session<C> {
    pub(crate) fn new() -> Self {
        Self {
            connection: None,
            card: None,
        }
    }

    pub(crate) fn card(&self) -> Option<&Card> {
        self.card.as_ref()
    }

    pub(crate) fn card_mut(&mut self) -> Option<&mut Card> {
        self.card.as_mut()
    }

    pub(crate) fn set_card(&mut self, card: Card) {
        self.card = Some(card);
    }

    pub(crate) fn take_card(&mut self) -> Option<Card> {
        self.card.take()
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    pub(crate) fn connection_info(&self) -> Option<(ConnectMode, Protocol)> {
        self.connection
            .as_ref()
            .map(|active| (active.mode, active.protocol))
    }

    /// Open a connection in `mode`. Connecting while connected is a
    /// no-op returning the existing protocol.
    pub(crate) fn connect<P>(&mut self, port: &P, mode: ConnectMode) -> Result<Protocol, ConnectError>
    where
        P: Port<Conn = C>,
    {
        if let Some(active) = &self.connection {
            return Ok(active.protocol);
        }
        let (conn, protocol) = port.connect(mode).map_err(ConnectError::Failure)?;
        trace!(?mode, ?protocol, "connection established");
        self.connection = Some(Active {
            conn,
            mode,
            protocol,
        });
        Ok(protocol)
    }

    /// Tear down the connection, leaving the card in the reader. The
    /// connection is kept when the provider refuses the teardown.
    pub(crate) fn disconnect(&mut self) -> Result<(), DisconnectError> {
        match &mut self.connection {
            None => Err(DisconnectError::NotConnected),
            Some(active) => {
                active.conn.disconnect().map_err(DisconnectError::Failure)?;
                self.connection = None;
                trace!("connection closed");
                Ok(())
            }
        }
    }

    /// Exchange an APDU with the present card.
    pub(crate) fn transmit(
        &self,
        data: &[u8],
        max_response_len: usize,
    ) -> Result<Bytes, TransmitError> {
        let active = match (&self.card, &self.connection) {
            (Some(_), Some(active)) => active,
            _ => return Err(TransmitError::CardNotConnected),
        };
        trace!(command = %hex::encode(data), "transmitting");
        let response = active
            .conn
            .transmit(data, max_response_len)
            .map_err(TransmitError::Failure)?;
        trace!(response = %hex::encode(&response), "received");
        Ok(Bytes::from(response))
    }

    /// Send a control escape to the reader itself. A card is not
    /// required.
    pub(crate) fn control(
        &self,
        data: &[u8],
        max_response_len: usize,
    ) -> Result<Bytes, ControlError> {
        let active = self.connection.as_ref().ok_or(ControlError::NotConnected)?;
        let response = active
            .conn
            .control(ioctl_ccid_escape(), data, max_response_len)
            .map_err(ControlError::Failure)?;
        Ok(Bytes::from(response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::{MockConnection, MockPort};

    fn connected_session(port: &MockPort) -> Session<MockConnection> {
        let mut session = Session::new();
        session.connect(port, ConnectMode::Card).unwrap();
        session
    }

    #[test]
    fn transmit_requires_card_and_connection() {
        let port = MockPort::default();

        let session: Session<MockConnection> = Session::new();
        assert!(matches!(
            session.transmit(&[0x00], 2),
            Err(TransmitError::CardNotConnected)
        ));

        // connection without card is still not enough
        let session = connected_session(&port);
        assert!(matches!(
            session.transmit(&[0x00], 2),
            Err(TransmitError::CardNotConnected)
        ));

        let mut session = connected_session(&port);
        session.set_card(Card::default());
        port.conn.push_response(&[0x90, 0x00]);
        assert_eq!(session.transmit(&[0x00], 2).unwrap().as_ref(), &[0x90, 0x00]);
    }

    #[test]
    fn control_requires_connection_only() {
        let port = MockPort::default();

        let session: Session<MockConnection> = Session::new();
        assert!(matches!(
            session.control(&[0x01], 8),
            Err(ControlError::NotConnected)
        ));

        let session = connected_session(&port);
        session.control(&[0x01, 0x02], 8).unwrap();
        let controls = port.conn.state.lock().unwrap().controls.clone();
        assert_eq!(controls, vec![(ioctl_ccid_escape(), vec![0x01, 0x02])]);
    }

    #[test]
    fn disconnect_without_connection_fails() {
        let mut session: Session<MockConnection> = Session::new();
        assert!(matches!(
            session.disconnect(),
            Err(DisconnectError::NotConnected)
        ));
    }

    #[test]
    fn disconnect_clears_the_connection() {
        let port = MockPort::default();
        let mut session = connected_session(&port);
        assert!(session.is_connected());
        session.disconnect().unwrap();
        assert!(!session.is_connected());
        assert_eq!(port.conn.state.lock().unwrap().disconnects, 1);
    }

    #[test]
    fn connect_is_idempotent() {
        let port = MockPort::default();
        let mut session = connected_session(&port);
        assert_eq!(
            session.connect(&port, ConnectMode::Card).unwrap(),
            Protocol::T1
        );
        assert_eq!(
            session.connection_info(),
            Some((ConnectMode::Card, Protocol::T1))
        );
    }
}

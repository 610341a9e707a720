//! PC/SC-backed port and connection.

use std::ffi::CString;

use pcsc::{Context, Disposition, Protocols, ShareMode};

use crate::transport::{ConnectMode, Connection, Port, PortError, Protocol};

/// One PC/SC reader usable as a [`Port`].
pub struct PcscPort {
    context: Context,
    reader_name: CString,
}

impl PcscPort {
    /// Wrap a PC/SC reader by name on an established context.
    pub fn new(context: Context, reader_name: &str) -> Result<Self, PortError> {
        let reader_name = CString::new(reader_name)
            .map_err(|_| PortError::Other("reader name contains a NUL byte".to_owned()))?;
        Ok(Self {
            context,
            reader_name,
        })
    }
}

impl Port for PcscPort {
    type Conn = PcscConnection;

    fn connect(&self, mode: ConnectMode) -> Result<(PcscConnection, Protocol), PortError> {
        let (share_mode, protocols) = match mode {
            ConnectMode::Direct => (ShareMode::Direct, Protocols::empty()),
            ConnectMode::Card => (ShareMode::Shared, Protocols::ANY),
        };
        let card = self.context.connect(&self.reader_name, share_mode, protocols)?;
        let protocol = match card.status2_owned().ok().and_then(|status| status.protocol2()) {
            Some(pcsc::Protocol::T0) => Protocol::T0,
            Some(pcsc::Protocol::T1) => Protocol::T1,
            _ => Protocol::Undefined,
        };
        Ok((PcscConnection { card: Some(card) }, protocol))
    }
}

/// An open PC/SC card handle.
pub struct PcscConnection {
    card: Option<pcsc::Card>,
}

impl PcscConnection {
    fn card(&self) -> Result<&pcsc::Card, PortError> {
        self.card
            .as_ref()
            .ok_or_else(|| PortError::Other("connection already closed".to_owned()))
    }
}

impl Connection for PcscConnection {
    fn transmit(&self, data: &[u8], max_response_len: usize) -> Result<Vec<u8>, PortError> {
        let card = self.card()?;
        let mut buffer = vec![0u8; max_response_len];
        let response = card.transmit(data, &mut buffer)?;
        Ok(response.to_vec())
    }

    fn control(
        &self,
        code: u32,
        data: &[u8],
        max_response_len: usize,
    ) -> Result<Vec<u8>, PortError> {
        let card = self.card()?;
        let mut buffer = vec![0u8; max_response_len];
        let response = card.control(code.into(), data, &mut buffer)?;
        Ok(response.to_vec())
    }

    fn disconnect(&mut self) -> Result<(), PortError> {
        match self.card.take() {
            None => Ok(()),
            Some(card) => card.disconnect(Disposition::LeaveCard).map_err(|(card, e)| {
                self.card = Some(card);
                PortError::Pcsc(e)
            }),
        }
    }
}

//! Reader enumeration and monitoring over a PC/SC context.
//!
//! The [`DeviceManager`] discovers readers, classifies them by vendor
//! and drives each reader's state machine from provider status changes
//! on a dedicated monitor thread.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use crossbeam_channel::Receiver;
use pcsc::{Context, ReaderState, Scope, State};
use tracing::{debug, warn};

use crate::error::Error;
use crate::event::Emitter;
use crate::pcsc_port::PcscPort;
use crate::reader::Reader;
use crate::transport::{PortError, StateFlags};

/// A reader backed by the PC/SC provider.
pub type PcscReader = Reader<PcscPort>;

/// Events emitted by the device manager.
#[derive(Debug, Clone)]
pub enum DeviceEvent {
    /// A reader appeared; subscribe to it for card events.
    Attached(Arc<PcscReader>),
    /// The provider reported a failure.
    Error(Arc<Error>),
}

/// Discovers readers and forwards provider status callbacks into their
/// state machines.
pub struct DeviceManager {
    context: Context,
    events: Arc<Emitter<DeviceEvent>>,
    running: Arc<AtomicBool>,
}

impl DeviceManager {
    /// Establish a user-scope PC/SC context.
    pub fn new() -> Result<Self, PortError> {
        let context = Context::establish(Scope::User)?;
        Ok(Self {
            context,
            events: Arc::new(Emitter::new()),
            running: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Subscribe to manager events.
    pub fn subscribe(&self) -> Receiver<DeviceEvent> {
        self.events.subscribe()
    }

    /// Names of the currently attached readers.
    pub fn list_reader_names(&self) -> Result<Vec<String>, PortError> {
        let names = match self.context.list_readers_owned() {
            Ok(names) => names,
            Err(pcsc::Error::NoReadersAvailable) => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(names
            .into_iter()
            .map(|name| name.to_string_lossy().into_owned())
            .collect())
    }

    /// Start the monitor thread. Calling `watch` while already watching
    /// is a no-op.
    pub fn watch(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let context = self.context.clone();
        let events = Arc::clone(&self.events);
        let running = Arc::clone(&self.running);
        thread::spawn(move || monitor_loop(&context, &events, &running));
    }

    /// Stop the monitor thread at its next wakeup.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

impl Drop for DeviceManager {
    fn drop(&mut self) {
        self.stop();
    }
}

fn monitor_loop(
    context: &Context,
    events: &Emitter<DeviceEvent>,
    running: &AtomicBool,
) {
    let pnp_name = pcsc::PNP_NOTIFICATION().to_string_lossy().into_owned();
    let mut readers: HashMap<String, Arc<PcscReader>> = HashMap::new();

    while running.load(Ordering::SeqCst) {
        let names = match context.list_readers_owned() {
            Ok(names) => names,
            Err(pcsc::Error::NoReadersAvailable) => Vec::new(),
            Err(e) => {
                warn!(error = %e, "failed to list readers");
                events.emit(DeviceEvent::Error(Arc::new(PortError::from(e).into())));
                thread::sleep(Duration::from_secs(1));
                continue;
            }
        };

        // attach new readers, end vanished ones
        let current: Vec<String> = names
            .iter()
            .map(|name| name.to_string_lossy().into_owned())
            .collect();
        for name in &current {
            if !readers.contains_key(name) {
                match PcscPort::new(context.clone(), name) {
                    Ok(port) => {
                        let reader = Arc::new(Reader::new(name.clone(), port));
                        debug!(reader = %name, vendor = ?reader.vendor(), "reader attached");
                        readers.insert(name.clone(), Arc::clone(&reader));
                        events.emit(DeviceEvent::Attached(reader));
                    }
                    Err(e) => events.emit(DeviceEvent::Error(Arc::new(e.into()))),
                }
            }
        }
        readers.retain(|name, reader| {
            let alive = current.contains(name);
            if !alive {
                reader.end();
            }
            alive
        });

        // wait for status changes on every reader plus the PnP
        // pseudo-reader that wakes us on attach/detach
        let mut states = vec![ReaderState::new(pcsc::PNP_NOTIFICATION(), State::UNAWARE)];
        for name in &names {
            states.push(ReaderState::new(name.clone(), State::UNAWARE));
        }
        for state in &mut states {
            state.sync_current_state();
        }

        match context.get_status_change(Some(Duration::from_secs(1)), &mut states) {
            Ok(()) => {
                for state in &states {
                    let name = state.name().to_string_lossy();
                    if name == pnp_name {
                        continue;
                    }
                    let Some(reader) = readers.get(name.as_ref()) else {
                        continue;
                    };
                    let bits = StateFlags::from_bits_truncate(state.event_state().bits() as u32);
                    let atr = match state.atr() {
                        [] => None,
                        atr => Some(Bytes::copy_from_slice(atr)),
                    };
                    reader.handle_status(bits, atr);
                }
            }
            Err(pcsc::Error::Timeout | pcsc::Error::Cancelled) => {}
            Err(e) => {
                warn!(error = %e, "status change wait failed");
                events.emit(DeviceEvent::Error(Arc::new(PortError::from(e).into())));
                thread::sleep(Duration::from_secs(1));
            }
        }

        // reader states are rebuilt from scratch each round, so the wait
        // can return immediately; the per-reader XOR edge detection makes
        // the repeats harmless, this delay just keeps the loop polite
        thread::sleep(Duration::from_millis(10));
    }
}

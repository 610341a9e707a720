//! Typed events emitted by readers, delivered over channels.
//!
//! Subscribing registers an unbounded channel; emissions fan out to all
//! live subscribers in registration order. Events are snapshots: cards
//! travel by value, errors behind an [`Arc`].

use std::sync::{Arc, Mutex};

use crossbeam_channel::{Receiver, Sender, unbounded};

use crate::card::Card;
use crate::error::Error;

/// Events emitted by a single reader.
#[derive(Debug, Clone)]
pub enum ReaderEvent {
    /// A card was processed (or, with auto-processing off, connected).
    Card(Card),
    /// The card was removed; carries the last snapshot.
    CardRemoved(Card),
    /// A failure during automatic handling.
    Error(Arc<Error>),
    /// The reader went away; no further events follow.
    End,
}

/// Sender half for reader events.
pub type ReaderEventSender = Sender<ReaderEvent>;
/// Receiver half for reader events.
pub type ReaderEventReceiver = Receiver<ReaderEvent>;

/// Multicast registry fanning events out to subscribers in registration
/// order. Subscribers whose receiver has been dropped are pruned on the
/// next emission.
pub(crate) struct Emitter<E: Clone> {
    subscribers: Mutex<Vec<Sender<E>>>,
}

impl<E: Clone> Emitter<E> {
    pub(crate) fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn subscribe(&self) -> Receiver<E> {
        let (sender, receiver) = unbounded();
        self.subscribers.lock().unwrap().push(sender);
        receiver
    }

    pub(crate) fn emit(&self, event: E) {
        self.subscribers
            .lock()
            .unwrap()
            .retain(|sender| sender.send(event.clone()).is_ok());
    }
}

impl<E: Clone> Default for Emitter<E> {
    fn default() -> Self {
        Self::new()
    }
}

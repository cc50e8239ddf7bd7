//! Participant state and the registry of active connections.
//!
//! Closing is split in two phases. While the loop is servicing connections a
//! failed participant is only marked closed; the registry removes it later in
//! a `sweep`, once no pass over the participants is in progress.

use crate::runtime::RecvBuffer;
use slab::Slab;
use std::io::{Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};

/// A byte stream with a transport identity.
///
/// Implemented for any socket with a raw file descriptor; the descriptor is
/// the participant's handle.
pub trait Transport: Read + Write {
    fn handle(&self) -> RawFd;
}

impl<T: Read + Write + AsRawFd> Transport for T {
    fn handle(&self) -> RawFd {
        self.as_raw_fd()
    }
}

/// One connected client.
#[derive(Debug)]
pub struct Participant<S> {
    /// The client's socket.
    pub stream: S,
    /// Unconsumed received bytes.
    pub buffer: RecvBuffer,
    handle: RawFd,
    closed: bool,
}

impl<S: Transport> Participant<S> {
    /// Create an open participant with an empty buffer.
    pub fn new(stream: S) -> Self {
        Self {
            handle: stream.handle(),
            stream,
            buffer: RecvBuffer::new(),
            closed: false,
        }
    }
}

impl<S> Participant<S> {
    pub fn handle(&self) -> RawFd {
        self.handle
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Mark for removal at the next sweep. There is no way back to open.
    pub fn close(&mut self) {
        self.closed = true;
    }
}

/// Registry of active participants.
///
/// Entries live in a slab; the slab key doubles as the poll token. A separate
/// list keeps insertion order so every pass visits participants in the order
/// they connected.
pub struct Registry<S> {
    participants: Slab<Participant<S>>,
    order: Vec<usize>,
}

impl<S: Transport> Registry<S> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            participants: Slab::new(),
            order: Vec::new(),
        }
    }

    /// Register a newly accepted stream.
    ///
    /// Returns the new key, or hands the stream back if a participant with the
    /// same handle is already registered.
    pub fn add(&mut self, stream: S) -> Result<usize, S> {
        let handle = stream.handle();
        if self.participants.iter().any(|(_, p)| p.handle == handle) {
            return Err(stream);
        }
        let key = self.participants.insert(Participant::new(stream));
        self.order.push(key);
        Ok(key)
    }
}

impl<S> Registry<S> {
    /// Get a mutable reference to a participant.
    pub fn get_mut(&mut self, key: usize) -> Option<&mut Participant<S>> {
        self.participants.get_mut(key)
    }

    /// Get an immutable reference to a participant.
    #[cfg(test)]
    pub fn get(&self, key: usize) -> Option<&Participant<S>> {
        self.participants.get(key)
    }

    /// Check if a participant exists.
    #[cfg(test)]
    pub fn contains(&self, key: usize) -> bool {
        self.participants.contains(key)
    }

    /// Number of registered participants, closed or not.
    pub fn len(&self) -> usize {
        self.participants.len()
    }

    /// Keys in insertion order.
    pub fn keys(&self) -> &[usize] {
        &self.order
    }

    /// Mark a participant closed. Unknown keys are ignored.
    pub fn mark_closed(&mut self, key: usize) {
        if let Some(participant) = self.participants.get_mut(key) {
            participant.close();
        }
    }

    /// Visit every participant present at call time, closed ones included.
    pub fn for_each_active<F>(&mut self, mut f: F)
    where
        F: FnMut(usize, &mut Participant<S>),
    {
        for &key in &self.order {
            if let Some(participant) = self.participants.get_mut(key) {
                f(key, participant);
            }
        }
    }

    /// Remove every closed participant, returning them in insertion order.
    ///
    /// Dropping a returned participant closes its socket and releases its
    /// buffer; the caller deregisters it from the poller first.
    pub fn sweep(&mut self) -> Vec<(usize, Participant<S>)> {
        let participants = &mut self.participants;
        let mut removed = Vec::new();
        self.order.retain(|&key| {
            let closed = participants.get(key).is_some_and(|p| p.closed);
            if closed {
                removed.push((key, participants.remove(key)));
            }
            !closed
        });
        removed
    }

    /// Remove every participant regardless of state.
    pub fn drain_all(&mut self) -> Vec<(usize, Participant<S>)> {
        let mut drained = Vec::with_capacity(self.order.len());
        for key in self.order.drain(..) {
            if let Some(participant) = self.participants.try_remove(key) {
                drained.push((key, participant));
            }
        }
        drained
    }
}

impl<S: Transport> Default for Registry<S> {
    fn default() -> Self {
        Self::new()
    }
}

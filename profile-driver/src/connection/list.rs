//! Table of admitted client connections.
//!
//! Owned by connection management; admission and the disconnect callback
//! are its only writers. All access goes through the table's own mutex.

use std::{
    collections::HashMap,
    fmt,
    sync::{
        Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

use shared::{BthAddr, ChannelHandle};

use super::policy::DeviceType;
use super::admission::RejectReason;

/// Handle of an admitted connection, unique per server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionHandle(u64);

impl ConnectionHandle {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// State of one remote peripheral's L2CAP channels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConnection {
    pub handle:      ConnectionHandle,
    pub address:     BthAddr,
    pub device_type: DeviceType,
    pub control:     Option<ChannelHandle>,
    pub interrupt:   Option<ChannelHandle>,
}

impl ClientConnection {
    /// Both HID channels are up.
    pub fn is_established(&self) -> bool {
        self.control.is_some() && self.interrupt.is_some()
    }
}

#[derive(Debug, Default)]
pub struct ConnectionList {
    by_address:  Mutex<HashMap<BthAddr, ClientConnection>>,
    next_handle: AtomicU64,
}

impl ConnectionList {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<BthAddr, ClientConnection>> {
        self.by_address.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a new connection whose primary (control) channel is opening.
    pub fn open(
        &self,
        address: BthAddr,
        device_type: DeviceType,
        channel: ChannelHandle,
    ) -> Result<ConnectionHandle, RejectReason> {
        let mut map = self.lock();
        if map.contains_key(&address) {
            return Err(RejectReason::AlreadyConnected);
        }
        let handle = ConnectionHandle(self.next_handle.fetch_add(1, Ordering::Relaxed) + 1);
        map.insert(
            address,
            ClientConnection { handle, address, device_type, control: Some(channel), interrupt: None },
        );
        Ok(handle)
    }

    /// Attach the interrupt channel to the connection opened by `address`.
    pub fn attach_interrupt(
        &self,
        address: BthAddr,
        channel: ChannelHandle,
    ) -> Result<ConnectionHandle, RejectReason> {
        let mut map = self.lock();
        match map.get_mut(&address) {
            Some(conn) if conn.control.is_none() => Err(RejectReason::MissingControlChannel),
            Some(conn) if conn.interrupt.is_some() => Err(RejectReason::AlreadyConnected),
            Some(conn) => {
                conn.interrupt = Some(channel);
                Ok(conn.handle)
            }
            None => Err(RejectReason::MissingControlChannel),
        }
    }

    pub fn remove(&self, address: BthAddr) -> Option<ClientConnection> {
        self.lock().remove(&address)
    }

    pub fn get(&self, address: BthAddr) -> Option<ClientConnection> {
        self.lock().get(&address).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Copy of every connection, ordered by handle.
    pub fn snapshot(&self) -> Vec<ClientConnection> {
        let mut all: Vec<_> = self.lock().values().cloned().collect();
        all.sort_by_key(|c| c.handle);
        all
    }
}

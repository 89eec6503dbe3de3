//! Server context shared by every indication of one device.
//!
//! Dispatch only reads it. Writers use the synchronisation of the field
//! they touch: the remote-name cache has its own `RwLock` (filled by name
//! resolution), the connection table its own mutex (admission and the
//! disconnect callback).

use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};

use shared::BthAddr;

use crate::connection::{AdmissionPolicy, ConnectionList};
use super::lifetime::DeviceLifetime;

#[derive(Debug)]
pub struct ServerContext {
    device:       Arc<DeviceLifetime>,
    policy:       AdmissionPolicy,
    remote_names: RwLock<HashMap<BthAddr, String>>,
    connections:  ConnectionList,
}

impl ServerContext {
    pub fn new(device: Arc<DeviceLifetime>, policy: AdmissionPolicy) -> Arc<Self> {
        Arc::new(Self {
            device,
            policy,
            remote_names: RwLock::new(HashMap::new()),
            connections:  ConnectionList::new(),
        })
    }

    pub fn device(&self) -> &Arc<DeviceLifetime> {
        &self.device
    }

    pub fn policy(&self) -> &AdmissionPolicy {
        &self.policy
    }

    pub fn connections(&self) -> &ConnectionList {
        &self.connections
    }

    /// Cache the name a remote device reported during inquiry.
    pub fn register_remote_name(&self, addr: BthAddr, name: impl Into<String>) {
        self.remote_names
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(addr, name.into());
    }

    pub fn remote_name(&self, addr: BthAddr) -> Option<String> {
        self.remote_names
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&addr)
            .cloned()
    }
}

//! Which device handle receives inbound state for a given token.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use devsim_protocol::DeviceId;

use crate::device::{DeviceHandle, DeviceKind, MemoryDevice};

/// Static `{token -> handle}` map, built once before the channel connects
#[derive(Clone, Default)]
pub struct DeviceRegistry {
    devices: HashMap<DeviceId, Arc<dyn DeviceHandle>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// One in-memory model per supported board
    pub fn with_default_devices() -> Self {
        DeviceKind::ALL.iter().fold(Self::new(), |registry, kind| {
            registry.with(kind.id(), Arc::new(MemoryDevice::for_kind(*kind)))
        })
    }

    /// Register a handle, replacing any handle already under `id`
    pub fn with(mut self, id: DeviceId, handle: Arc<dyn DeviceHandle>) -> Self {
        self.devices.insert(id, handle);
        self
    }

    pub fn resolve(&self, id: &DeviceId) -> Option<&Arc<dyn DeviceHandle>> {
        self.devices.get(id)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

impl fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<_> = self.devices.keys().collect();
        ids.sort();
        f.debug_struct("DeviceRegistry").field("devices", &ids).finish()
    }
}

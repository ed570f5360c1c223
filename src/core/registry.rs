//! Dispatch table registry.
//!
//! Maps the identity key of a dispatchable handle to the next layer's
//! function table. Instance and device tables live in separate maps, each
//! behind its own lock, held only for the map operation itself.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use ash::vk::{self, Handle};

use super::dispatch::{DeviceDispatch, InstanceDispatch};
use crate::sync::mutex::Mutex;

/// The loader dispatch pointer stored in the first word of a dispatchable
/// handle.
///
/// Objects created from the same instance or device share it, so a queue
/// resolves to its device's key and a physical device to its instance's.
/// Lookup only: a key never keeps anything alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IdentityKey(usize);

impl IdentityKey {
    /// Read the key of a dispatchable handle. `None` for a null handle.
    ///
    /// # Safety
    ///
    /// A non-null `handle` must be a live dispatchable handle handed out by
    /// the loader.
    pub unsafe fn from_handle<H: Handle>(handle: H) -> Option<Self> {
        let ptr = handle.as_raw() as usize as *const usize;
        if ptr.is_null() {
            return None;
        }
        Some(Self(ptr.read()))
    }

    /// Raw key value.
    pub fn as_usize(&self) -> usize {
        self.0
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// A dispatch table that could not be registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryError {
    /// Growing the map failed.
    OutOfMemory,
}

impl RegistryError {
    /// Result code an intercepted create call returns for this error.
    pub fn to_vk_result(&self) -> vk::Result {
        match self {
            RegistryError::OutOfMemory => vk::Result::ERROR_OUT_OF_HOST_MEMORY,
        }
    }
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::OutOfMemory => write!(f, "out of memory growing the registry"),
        }
    }
}

impl std::error::Error for RegistryError {}

/// One table kind.
struct TableMap<T> {
    tables: Mutex<HashMap<IdentityKey, Arc<T>>>,
}

impl<T> TableMap<T> {
    fn new() -> Self {
        Self {
            tables: Mutex::new(HashMap::new()),
        }
    }

    /// Insert `table`, returning the entry it replaced.
    fn insert(&self, key: IdentityKey, table: Arc<T>) -> Result<Option<Arc<T>>, RegistryError> {
        let mut tables = self.tables.lock();
        tables
            .try_reserve(1)
            .map_err(|_| RegistryError::OutOfMemory)?;
        Ok(tables.insert(key, table))
    }

    fn get(&self, key: IdentityKey) -> Option<Arc<T>> {
        self.tables.lock().get(&key).cloned()
    }

    fn len(&self) -> usize {
        self.tables.lock().len()
    }

    fn clear(&self) {
        // Drop the tables outside the lock.
        let drained = std::mem::take(&mut *self.tables.lock());
        drop(drained);
    }
}

/// Registry of next-layer dispatch tables.
///
/// Entries are never removed when their object is destroyed. The loader
/// recycles dispatch words, so a key that is registered again belongs to a
/// new object and its table replaces the stale one.
pub struct DispatchRegistry {
    instances: TableMap<InstanceDispatch>,
    devices: TableMap<DeviceDispatch>,
}

impl DispatchRegistry {
    pub fn new() -> Self {
        Self {
            instances: TableMap::new(),
            devices: TableMap::new(),
        }
    }

    /// Register the table of a newly created instance.
    ///
    /// Returns the table of a destroyed instance that held the same key.
    pub fn add_instance_table(
        &self,
        key: IdentityKey,
        table: Arc<InstanceDispatch>,
    ) -> Result<Option<Arc<InstanceDispatch>>, RegistryError> {
        self.instances.insert(key, table)
    }

    /// Register the table of a newly created device.
    ///
    /// Returns the table of a destroyed device that held the same key.
    pub fn add_device_table(
        &self,
        key: IdentityKey,
        table: Arc<DeviceDispatch>,
    ) -> Result<Option<Arc<DeviceDispatch>>, RegistryError> {
        self.devices.insert(key, table)
    }

    pub fn instance_table(&self, key: IdentityKey) -> Option<Arc<InstanceDispatch>> {
        self.instances.get(key)
    }

    pub fn device_table(&self, key: IdentityKey) -> Option<Arc<DeviceDispatch>> {
        self.devices.get(key)
    }

    /// Instance table for any handle scoped to an instance.
    ///
    /// # Safety
    ///
    /// Same contract as [`IdentityKey::from_handle`].
    pub unsafe fn instance_table_for<H: Handle>(&self, handle: H) -> Option<Arc<InstanceDispatch>> {
        IdentityKey::from_handle(handle).and_then(|key| self.instance_table(key))
    }

    /// Device table for any handle scoped to a device.
    ///
    /// # Safety
    ///
    /// Same contract as [`IdentityKey::from_handle`].
    pub unsafe fn device_table_for<H: Handle>(&self, handle: H) -> Option<Arc<DeviceDispatch>> {
        IdentityKey::from_handle(handle).and_then(|key| self.device_table(key))
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// Drop every table.
    pub fn clear(&self) {
        self.devices.clear();
        self.instances.clear();
    }
}

impl Default for DispatchRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DispatchRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchRegistry")
            .field("instances", &self.instance_count())
            .field("devices", &self.device_count())
            .finish()
    }
}

// This file is part of Astarte.
//
// Copyright 2026 SECO Mind Srl
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

//! Reference counted cache of the devices in use.
//!
//! Concurrent operations on the same device share a single entry, and with it the sessions
//! dialed with the device. An entry lives as long as a [`DeviceHandle`] to it exists: when the
//! last handle is released the device is closed.

use std::collections::HashMap;
use std::future::Future;
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use astarte_ocf_protocol::v1::DeviceId;
use tracing::{debug, trace};

/// Device stored in the [`DeviceCache`].
pub trait CachedDevice: Send + Sync + 'static {
    /// Closes the sessions with the device.
    fn close(&self) -> impl Future<Output = ()> + Send;
}

struct Slot<D> {
    device: Arc<D>,
    refs: usize,
}

struct State<D> {
    slots: HashMap<u64, Slot<D>>,
    devices: HashMap<DeviceId, u64>,
    next: u64,
}

impl<D> State<D> {
    fn insert(&mut self, device: Arc<D>) -> u64 {
        let slot = self.next;
        self.next = self.next.wrapping_add(1);

        self.slots.insert(slot, Slot { device, refs: 1 });

        slot
    }

    /// Returns the linked slot of the device.
    fn linked(&self, device_id: &DeviceId) -> Option<u64> {
        self.devices
            .get(device_id)
            .copied()
            .filter(|slot| self.slots.contains_key(slot))
    }

    /// Decrements the count, returns the device once it reaches zero.
    ///
    /// The last release unlinks every identifier of the slot, handles can be acquired under an
    /// identifier the entry was renamed from.
    fn decrement(&mut self, slot: u64) -> Option<Arc<D>> {
        let entry = self.slots.get_mut(&slot)?;

        entry.refs = entry.refs.saturating_sub(1);

        if entry.refs > 0 {
            return None;
        }

        self.devices.retain(|_, linked| *linked != slot);

        self.slots.remove(&slot).map(|entry| entry.device)
    }
}

/// Cache of the devices, keyed by identifier.
///
/// At most one entry is linked to an identifier at any time.
pub struct DeviceCache<D> {
    state: Arc<Mutex<State<D>>>,
}

impl<D: CachedDevice> DeviceCache<D> {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                slots: HashMap::new(),
                devices: HashMap::new(),
                next: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State<D>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn handle(&self, slot: u64, device_id: DeviceId, device: Arc<D>) -> DeviceHandle<D> {
        DeviceHandle {
            slot,
            device_id,
            device,
            cache: Arc::clone(&self.state),
            released: false,
        }
    }

    /// Acquires the device linked to the identifier, incrementing its reference count.
    pub fn acquire(&self, device_id: &DeviceId) -> Option<DeviceHandle<D>> {
        let mut state = self.lock();

        let slot = state.linked(device_id)?;
        let entry = state.slots.get_mut(&slot)?;
        entry.refs += 1;

        trace!(%device_id, refs = entry.refs, "device acquired");

        let device = Arc::clone(&entry.device);

        drop(state);

        Some(self.handle(slot, *device_id, device))
    }

    /// Creates a new entry for the device, not linked to the identifier.
    pub fn stage(&self, device_id: DeviceId, device: D) -> DeviceHandle<D> {
        let device = Arc::new(device);

        let slot = self.lock().insert(Arc::clone(&device));

        self.handle(slot, device_id, device)
    }

    /// Links the entry of the handle to its identifier.
    ///
    /// Returns false if the identifier is already linked to another live entry, the caller
    /// should then release its handle.
    pub fn try_store_to_temporary_cache(&self, handle: &DeviceHandle<D>) -> bool {
        let mut state = self.lock();

        match state.linked(&handle.device_id) {
            Some(slot) if slot != handle.slot => false,
            Some(_) => true,
            None => {
                state.devices.insert(handle.device_id, handle.slot);

                debug!(device_id = %handle.device_id, "device stored");

                true
            }
        }
    }

    /// Acquires the device, or stores the one created if not cached.
    ///
    /// A duplicate created concurrently with another store is closed.
    pub async fn get_or_create<F>(&self, device_id: DeviceId, create: F) -> DeviceHandle<D>
    where
        F: FnOnce() -> D,
    {
        if let Some(handle) = self.acquire(&device_id) {
            return handle;
        }

        let staged = self.stage(device_id, create());

        loop {
            if self.try_store_to_temporary_cache(&staged) {
                return staged;
            }

            if let Some(handle) = self.acquire(&device_id) {
                debug!(%device_id, "device stored concurrently, closing the duplicate");

                self.release(staged).await;

                return handle;
            }
        }
    }

    /// Unlinks the identifier if it's linked to the entry of the handle.
    pub fn remove_device(&self, device_id: &DeviceId, handle: &DeviceHandle<D>) -> bool {
        let mut state = self.lock();

        if state.devices.get(device_id) != Some(&handle.slot) {
            return false;
        }

        state.devices.remove(device_id);

        debug!(%device_id, "device removed");

        true
    }

    /// Links the entry of the handle to a new identifier.
    ///
    /// The old identifier is unlinked. If the new one is already linked to another live entry,
    /// the handle is returned as an error with its entry left unlinked.
    pub fn rename(
        &self,
        mut handle: DeviceHandle<D>,
        device_id: DeviceId,
    ) -> Result<DeviceHandle<D>, DeviceHandle<D>> {
        let mut state = self.lock();

        if state.devices.get(&handle.device_id) == Some(&handle.slot) {
            state.devices.remove(&handle.device_id);
        }

        if state
            .linked(&device_id)
            .is_some_and(|slot| slot != handle.slot)
        {
            drop(state);

            return Err(handle);
        }

        state.devices.insert(device_id, handle.slot);

        drop(state);

        debug!(from = %handle.device_id, to = %device_id, "device renamed");

        handle.device_id = device_id;

        Ok(handle)
    }

    /// Releases the handle, closing the device if it was the last one.
    pub async fn release(&self, mut handle: DeviceHandle<D>) {
        handle.released = true;

        let device = self.lock().decrement(handle.slot);

        if let Some(device) = device {
            debug!(device_id = %handle.device_id, "closing device");

            device.close().await;
        }
    }

    /// Returns the number of handles to the device linked to the identifier.
    pub fn reference_count(&self, device_id: &DeviceId) -> usize {
        let state = self.lock();

        state
            .linked(device_id)
            .and_then(|slot| state.slots.get(&slot))
            .map_or(0, |entry| entry.refs)
    }

    /// Returns the number of linked devices.
    pub fn len(&self) -> usize {
        let state = self.lock();

        state
            .devices
            .values()
            .filter(|slot| state.slots.contains_key(slot))
            .count()
    }

    /// Returns true if no device is linked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Unlinks every device.
    ///
    /// The devices are closed once their outstanding handles are released.
    pub fn close(&self) {
        let mut state = self.lock();

        let count = state.devices.len();
        state.devices.clear();

        debug!(count, "device cache closed");
    }
}

impl<D: CachedDevice> Default for DeviceCache<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D> std::fmt::Debug for DeviceCache<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceCache").finish_non_exhaustive()
    }
}

/// Counted reference to a cached device.
///
/// Dropping the handle releases it without awaiting the device close, prefer
/// [`DeviceCache::release`].
pub struct DeviceHandle<D> {
    slot: u64,
    device_id: DeviceId,
    device: Arc<D>,
    cache: Arc<Mutex<State<D>>>,
    released: bool,
}

impl<D> DeviceHandle<D> {
    /// Identifier the handle was acquired with.
    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    /// Returns true if both handles refer to the same entry.
    pub fn same_entry(&self, other: &Self) -> bool {
        self.slot == other.slot && Arc::ptr_eq(&self.cache, &other.cache)
    }
}

impl<D> Deref for DeviceHandle<D> {
    type Target = D;

    fn deref(&self) -> &Self::Target {
        &self.device
    }
}

impl<D> Drop for DeviceHandle<D> {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        // The device sessions are closed when the last Arc is dropped
        let _device = self
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .decrement(self.slot);
    }
}

impl<D> std::fmt::Debug for DeviceHandle<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("slot", &self.slot)
            .field("device_id", &self.device_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use pretty_assertions::assert_eq;

    use super::*;

    #[derive(Debug, Default)]
    struct Fake {
        closed: Arc<AtomicUsize>,
    }

    impl CachedDevice for Fake {
        async fn close(&self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn id(n: u128) -> DeviceId {
        DeviceId::new(uuid::Uuid::from_u128(n))
    }

    #[tokio::test]
    async fn release_closes_on_last_reference() {
        let cache = DeviceCache::new();
        let closed = Arc::new(AtomicUsize::new(0));

        let first = cache
            .get_or_create(id(1), || Fake {
                closed: Arc::clone(&closed),
            })
            .await;
        let second = cache.acquire(&id(1)).unwrap();

        assert!(first.same_entry(&second));
        assert_eq!(cache.reference_count(&id(1)), 2);

        cache.release(first).await;

        assert_eq!(closed.load(Ordering::SeqCst), 0);
        assert_eq!(cache.reference_count(&id(1)), 1);

        cache.release(second).await;

        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert!(cache.acquire(&id(1)).is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn get_or_create_reuses_entry() {
        let cache = DeviceCache::new();

        let first = cache.get_or_create(id(1), Fake::default).await;
        let second = cache
            .get_or_create(id(1), || -> Fake { panic!("device already cached") })
            .await;

        assert!(first.same_entry(&second));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn staged_duplicate_loses() {
        let cache = DeviceCache::new();
        let closed = Arc::new(AtomicUsize::new(0));

        let stored = cache.stage(id(1), Fake::default());
        let duplicate = cache.stage(
            id(1),
            Fake {
                closed: Arc::clone(&closed),
            },
        );

        assert!(cache.try_store_to_temporary_cache(&stored));
        assert!(cache.try_store_to_temporary_cache(&stored));
        assert!(!cache.try_store_to_temporary_cache(&duplicate));

        cache.release(duplicate).await;

        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert!(cache.acquire(&id(1)).unwrap().same_entry(&stored));
    }

    #[tokio::test]
    async fn remove_only_own_entry() {
        let cache = DeviceCache::new();

        let stored = cache.get_or_create(id(1), Fake::default).await;
        let other = cache.stage(id(1), Fake::default());

        assert!(!cache.remove_device(&id(1), &other));
        assert!(cache.remove_device(&id(1), &stored));
        assert!(cache.acquire(&id(1)).is_none());

        // The handle is still valid after the removal
        assert_eq!(stored.device_id(), id(1));

        assert!(cache.try_store_to_temporary_cache(&other));
    }

    #[tokio::test]
    async fn rename_moves_entry() {
        let cache = DeviceCache::new();

        let handle = cache.get_or_create(id(1), Fake::default).await;

        let handle = cache.rename(handle, id(2)).unwrap();

        assert_eq!(handle.device_id(), id(2));
        assert!(cache.acquire(&id(1)).is_none());
        assert!(cache.acquire(&id(2)).unwrap().same_entry(&handle));
    }

    #[tokio::test]
    async fn last_release_after_rename_unlinks() {
        let cache = DeviceCache::new();
        let closed = Arc::new(AtomicUsize::new(0));

        let renamed = cache
            .get_or_create(id(1), || Fake {
                closed: Arc::clone(&closed),
            })
            .await;
        let old = cache.acquire(&id(1)).unwrap();

        let renamed = cache.rename(renamed, id(2)).unwrap();

        cache.release(renamed).await;

        assert_eq!(closed.load(Ordering::SeqCst), 0);
        assert_eq!(cache.reference_count(&id(2)), 1);

        // Released under the identifier it was acquired with
        assert_eq!(old.device_id(), id(1));
        cache.release(old).await;

        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert!(cache.lock().devices.is_empty());
        assert!(cache.lock().slots.is_empty());
    }

    #[tokio::test]
    async fn rename_conflict_keeps_existing() {
        let cache = DeviceCache::new();
        let closed = Arc::new(AtomicUsize::new(0));

        let existing = cache.get_or_create(id(2), Fake::default).await;
        let renamed = cache
            .get_or_create(id(1), || Fake {
                closed: Arc::clone(&closed),
            })
            .await;

        let renamed = cache.rename(renamed, id(2)).unwrap_err();

        assert!(cache.acquire(&id(2)).unwrap().same_entry(&existing));
        assert!(cache.acquire(&id(1)).is_none());

        cache.release(renamed).await;

        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn drop_releases_handle() {
        let cache = DeviceCache::new();

        let handle = cache.get_or_create(id(1), Fake::default).await;
        let other = cache.acquire(&id(1)).unwrap();

        drop(handle);

        assert_eq!(cache.reference_count(&id(1)), 1);

        drop(other);

        assert!(cache.acquire(&id(1)).is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_get_or_create_single_entry() {
        let cache = Arc::new(DeviceCache::new());
        let created = Arc::new(AtomicUsize::new(0));
        let closed = Arc::new(AtomicUsize::new(0));

        let mut tasks = tokio::task::JoinSet::new();

        for _ in 0..16 {
            let cache = Arc::clone(&cache);
            let created = Arc::clone(&created);
            let closed = Arc::clone(&closed);

            tasks.spawn(async move {
                cache
                    .get_or_create(id(1), || {
                        created.fetch_add(1, Ordering::SeqCst);

                        Fake { closed }
                    })
                    .await
            });
        }

        let mut handles = Vec::new();
        while let Some(handle) = tasks.join_next().await {
            handles.push(handle.unwrap());
        }

        assert!(handles.windows(2).all(|w| w[0].same_entry(&w[1])));
        assert_eq!(cache.reference_count(&id(1)), 16);

        for handle in handles {
            cache.release(handle).await;
        }

        // Duplicates that lost the store are closed as well
        assert_eq!(
            closed.load(Ordering::SeqCst),
            created.load(Ordering::SeqCst)
        );
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn close_unlinks_devices() {
        let cache = DeviceCache::new();

        let handle = cache.get_or_create(id(1), Fake::default).await;

        cache.close();

        assert!(cache.acquire(&id(1)).is_none());
        assert_eq!(handle.closed.load(Ordering::SeqCst), 0);
    }
}

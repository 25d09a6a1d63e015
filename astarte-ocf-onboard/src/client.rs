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

//! Client to onboard the OCF devices.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use astarte_ocf_protocol::v1::doxm::Doxm;
use astarte_ocf_protocol::v1::links::{DeviceLinks, ResourceLink, UDP_SCHEME};
use astarte_ocf_protocol::v1::{ContentFormat, DeviceId, DOXM_HREF, RESOURCE_DIRECTORY_HREF};
use rustls::ClientConfig;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, instrument};

use crate::cache::{DeviceCache, DeviceHandle};
use crate::coap::Query;
use crate::config::Config;
use crate::device::Device;
use crate::discovery::{Discovered, Locator};
use crate::error::{Error, OnboardError, Step, StepExt};
use crate::identity::OwnerIdentity;
use crate::otm::OtmRegistry;
use crate::provision::ProvisioningClient;
use crate::transport::{Network, Request};

/// Ownership status the devices are discovered with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OwnershipFilter {
    /// Every device.
    #[default]
    All,
    /// Only the owned devices.
    Owned,
    /// Only the devices ready for ownership transfer.
    Unowned,
}

impl OwnershipFilter {
    fn query(&self) -> Option<Query> {
        match self {
            OwnershipFilter::All => None,
            OwnershipFilter::Owned => Some(Query::owned(true)),
            OwnershipFilter::Unowned => Some(Query::owned(false)),
        }
    }
}

/// Ownership status of a discovered device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceOwnership {
    /// Ownership resource of the device.
    pub doxm: Doxm,
    /// Address the device answered from.
    pub peer: SocketAddr,
}

/// Device discovered on the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    /// Identifier of the device.
    pub device_id: DeviceId,
    /// Links of the device resources, with the endpoints rewritten for the peer address.
    pub links: DeviceLinks,
    /// Address the device answered from.
    pub peer: SocketAddr,
}

/// Per device locks serializing the ownership changes.
#[derive(Debug, Default)]
pub(crate) struct OwnershipLocks {
    locks: Mutex<HashMap<DeviceId, Weak<tokio::sync::Mutex<()>>>>,
}

impl OwnershipLocks {
    pub(crate) async fn lock(&self, device_id: DeviceId) -> OwnedMutexGuard<()> {
        let mutex = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);

            locks.retain(|_, lock| lock.strong_count() > 0);

            match locks.get(&device_id).and_then(Weak::upgrade) {
                Some(mutex) => mutex,
                None => {
                    let mutex = Arc::new(tokio::sync::Mutex::new(()));

                    locks.insert(device_id, Arc::downgrade(&mutex));

                    mutex
                }
            }
        };

        mutex.lock_owned().await
    }
}

/// Onboarding client.
///
/// Transfers the ownership of the devices to the owner identity, and provisions the owned
/// devices.
pub struct Client<N: Network> {
    pub(crate) network: Arc<N>,
    pub(crate) config: Config,
    pub(crate) identity: OwnerIdentity,
    pub(crate) tls: Arc<ClientConfig>,
    pub(crate) registry: OtmRegistry<N>,
    pub(crate) locator: Locator<N>,
    pub(crate) cache: DeviceCache<Device<N>>,
    pub(crate) locks: OwnershipLocks,
}

impl<N: Network> Client<N> {
    /// Create the client for the owner identity.
    ///
    /// The registry holds the ownership transfer methods in order of preference.
    pub fn new(
        network: Arc<N>,
        config: Config,
        identity: OwnerIdentity,
        registry: OtmRegistry<N>,
    ) -> Result<Self, OnboardError> {
        let tls = identity.client_config()?;
        let locator = Locator::new(Arc::clone(&network), config.discovery_addresses.clone());

        debug!(owner = %identity.id(), methods = ?registry.offered(), "client created");

        Ok(Self {
            network,
            config,
            identity,
            tls,
            registry,
            locator,
            cache: DeviceCache::new(),
            locks: OwnershipLocks::default(),
        })
    }

    /// Identifier of the owner.
    pub fn owner_id(&self) -> DeviceId {
        self.identity.id()
    }

    /// Configuration of the client.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Devices in use.
    pub fn cache(&self) -> &DeviceCache<Device<N>> {
        &self.cache
    }

    /// Discovers the ownership status of the device.
    ///
    /// Returns the first reply of the device, the first error of the discovery if it didn't
    /// reply, or [`OnboardError::DeviceNotFound`].
    #[instrument(skip_all, fields(%device_id, ?filter))]
    pub async fn find_device_ownership(
        &self,
        device_id: DeviceId,
        filter: OwnershipFilter,
    ) -> Result<DeviceOwnership, OnboardError> {
        let request = filter.query().into_iter().fold(
            Request::get(DOXM_HREF).with_accept(ContentFormat::AppOcfCbor),
            |req, q| req.with_query(q),
        );

        let mut found = None;

        let res = self
            .locator
            .discover(
                request,
                self.config.discovery_timeout,
                |discovered: Discovered<Doxm>| {
                    if discovered.record.device_id != device_id {
                        return ControlFlow::Continue(());
                    }

                    found = Some(DeviceOwnership {
                        doxm: discovered.record,
                        peer: discovered.peer,
                    });

                    ControlFlow::Break(())
                },
            )
            .await;

        match (found, res) {
            (Some(ownership), _) => {
                debug!(owned = ownership.doxm.owned, peer = %ownership.peer, "device found");

                Ok(ownership)
            }
            (None, Err(err)) => Err(err),
            (None, Ok(())) => Err(OnboardError::DeviceNotFound),
        }
    }

    /// Discovers the devices and their resources.
    ///
    /// The handler is called once per device and can stop the discovery.
    pub async fn discover_devices<F>(&self, mut handler: F) -> Result<(), OnboardError>
    where
        F: FnMut(DiscoveredDevice) -> ControlFlow<()> + Send,
    {
        let request = Request::get(RESOURCE_DIRECTORY_HREF).with_accept(ContentFormat::AppOcfCbor);

        self.locator
            .discover(
                request,
                self.config.discovery_timeout,
                |discovered: Discovered<Vec<ResourceLink>>| {
                    for links in DeviceLinks::group(discovered.record) {
                        let links = links.patch_endpoints(UDP_SCHEME, discovered.peer);

                        if links.links.is_empty() {
                            continue;
                        }

                        let device = DiscoveredDevice {
                            device_id: links.device_id,
                            links,
                            peer: discovered.peer,
                        };

                        if handler(device).is_break() {
                            return ControlFlow::Break(());
                        }
                    }

                    ControlFlow::Continue(())
                },
            )
            .await
    }

    /// Discovers the links of the device.
    #[instrument(skip_all, fields(%device_id))]
    pub async fn discover_device_links(
        &self,
        device_id: DeviceId,
    ) -> Result<DeviceLinks, OnboardError> {
        let mut found = None;

        let res = self
            .discover_devices(|device| {
                if device.device_id != device_id {
                    return ControlFlow::Continue(());
                }

                found = Some(device.links);

                ControlFlow::Break(())
            })
            .await;

        match (found, res) {
            (Some(links), _) => Ok(links),
            (None, Err(err)) => Err(err),
            (None, Ok(())) => Err(OnboardError::DeviceNotFound),
        }
    }

    /// Creates the cache entry of the device from its links.
    pub(crate) fn new_device(&self, links: DeviceLinks) -> Device<N> {
        Device::new(
            links,
            Arc::clone(&self.network),
            Arc::clone(&self.tls),
            self.config.request_timeout,
        )
    }

    /// Acquires the device from the cache, discovering it if not cached.
    pub(crate) async fn acquire_device(
        &self,
        device_id: DeviceId,
    ) -> Result<DeviceHandle<Device<N>>, OnboardError> {
        if let Some(handle) = self.cache.acquire(&device_id) {
            return Ok(handle);
        }

        let links = self.discover_device_links(device_id).await?;

        let handle = self
            .cache
            .get_or_create(device_id, || self.new_device(links))
            .await;

        Ok(handle)
    }

    /// Starts provisioning an owned device.
    ///
    /// The device is moved to the ready for provisioning state and kept cached until the
    /// returned client is closed.
    #[instrument(skip_all, fields(%device_id))]
    pub async fn provision_device(
        &self,
        device_id: DeviceId,
    ) -> Result<ProvisioningClient<N>, Error> {
        let handle = self
            .acquire_device(device_id)
            .await
            .at(Step::Provisioning, device_id)?;

        ProvisioningClient::start(handle, device_id)
            .await
            .at(Step::Provisioning, device_id)
    }

    /// Reads a resource of an owned device.
    #[instrument(skip_all, fields(%device_id, href))]
    pub async fn get_resource<T>(&self, device_id: DeviceId, href: &str) -> Result<T, Error>
    where
        T: DeserializeOwned,
    {
        let handle = self
            .acquire_device(device_id)
            .await
            .at(Step::Provisioning, device_id)?;

        let res = match handle.session().await {
            Ok(session) => session.get_resource(href).await,
            Err(err) => Err(err),
        };

        self.cache.release(handle).await;

        res.at(Step::Provisioning, device_id)
    }

    /// Updates a resource of an owned device.
    #[instrument(skip_all, fields(%device_id, href))]
    pub async fn update_resource<T>(
        &self,
        device_id: DeviceId,
        href: &str,
        value: &T,
    ) -> Result<(), Error>
    where
        T: Serialize + Sync,
    {
        let handle = self
            .acquire_device(device_id)
            .await
            .at(Step::Provisioning, device_id)?;

        let res = match handle.session().await {
            Ok(session) => session.update_resource(href, value).await,
            Err(err) => Err(err),
        };

        self.cache.release(handle).await;

        res.at(Step::Provisioning, device_id)
    }

    /// Releases the cached devices.
    pub fn close(&self) {
        self.cache.close();

        info!("client closed");
    }
}

impl<N: Network> std::fmt::Debug for Client<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.config)
            .field("identity", &self.identity)
            .field("registry", &self.registry)
            .field("locator", &self.locator)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    use super::*;

    #[tokio::test]
    async fn ownership_locks_serialize_same_device() {
        let locks = Arc::new(OwnershipLocks::default());
        let device_id = DeviceId::new_v4();

        let guard = locks.lock(device_id).await;

        let pending = {
            let locks = Arc::clone(&locks);

            tokio::spawn(async move {
                let _guard = locks.lock(device_id).await;
            })
        };

        // A different device is not blocked
        let other = tokio::time::timeout(Duration::from_secs(1), locks.lock(DeviceId::new_v4()))
            .await
            .unwrap();
        drop(other);

        tokio::task::yield_now().await;
        assert!(!pending.is_finished());

        drop(guard);
        pending.await.unwrap();

        let _ = locks.lock(DeviceId::new_v4()).await;

        // Unused entries are dropped on the next lock
        assert_eq!(locks.locks.lock().unwrap().len(), 1);
    }

    #[test]
    fn filter_queries() {
        assert_eq!(OwnershipFilter::All.query(), None);
        assert_eq!(
            OwnershipFilter::Owned.query().unwrap().to_string(),
            "owned=TRUE"
        );
        assert_eq!(
            OwnershipFilter::Unowned.query().unwrap().to_string(),
            "owned=FALSE"
        );
    }
}

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

//! Ownership transfer methods.
//!
//! A method dials the first secure session with an unowned device and installs the owner
//! credentials on it.

use std::future::Future;
use std::pin::Pin;

use astarte_ocf_protocol::v1::doxm::OwnerTransferMethod;
use astarte_ocf_protocol::v1::links::Endpoint;
use astarte_ocf_protocol::v1::DeviceId;
use tracing::{debug, error};

use crate::coap::CoapClient;
use crate::error::OnboardError;
use crate::transport::Network;

pub mod manufacturer;

/// Boxed future returned by the [`OwnershipTransfer`] methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Ownership transfer method.
pub trait OwnershipTransfer<N: Network>: Send + Sync {
    /// Method implemented, written to the device `oxmsel`.
    fn kind(&self) -> OwnerTransferMethod;

    /// Dials the provisioning session with the device endpoint.
    fn dial<'a>(
        &'a self,
        network: &'a N,
        endpoint: &'a Endpoint,
    ) -> BoxFuture<'a, Result<N::Session, OnboardError>>;

    /// Installs the owner credentials over the provisioning session.
    fn provision_owner_credentials<'a>(
        &'a self,
        client: &'a CoapClient<N::Session>,
        owner: DeviceId,
        device: DeviceId,
    ) -> BoxFuture<'a, Result<(), OnboardError>>;
}

/// Available transfer methods, in order of preference.
pub struct OtmRegistry<N> {
    methods: Vec<Box<dyn OwnershipTransfer<N>>>,
}

impl<N: Network> OtmRegistry<N> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            methods: Vec::new(),
        }
    }

    /// Adds the method with the lowest preference.
    pub fn with<T>(mut self, method: T) -> Self
    where
        T: OwnershipTransfer<N> + 'static,
    {
        self.register(method);

        self
    }

    /// Adds the method with the lowest preference.
    pub fn register<T>(&mut self, method: T)
    where
        T: OwnershipTransfer<N> + 'static,
    {
        debug!(method = %method.kind(), "transfer method registered");

        self.methods.push(Box::new(method));
    }

    /// Methods available, in order of preference.
    pub fn offered(&self) -> Vec<OwnerTransferMethod> {
        self.methods.iter().map(|m| m.kind()).collect()
    }

    /// Selects the preferred method supported by the device.
    pub fn select(
        &self,
        supported: &[OwnerTransferMethod],
    ) -> Result<&dyn OwnershipTransfer<N>, OnboardError> {
        self.methods
            .iter()
            .find(|m| supported.contains(&m.kind()))
            .map(|m| m.as_ref())
            .ok_or_else(|| {
                let offered = self.offered();

                error!(?offered, ?supported, "no common ownership transfer method");

                OnboardError::UnsupportedMethod {
                    offered,
                    supported: supported.to_vec(),
                }
            })
    }
}

impl<N: Network> Default for OtmRegistry<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N> std::fmt::Debug for OtmRegistry<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OtmRegistry")
            .field("methods", &self.methods.len())
            .finish()
    }
}

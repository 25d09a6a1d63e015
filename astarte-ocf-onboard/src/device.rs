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

//! Device stored in the cache, with its normal operation session.

use std::sync::Arc;
use std::time::Duration;

use astarte_ocf_protocol::v1::links::{DeviceLinks, TCP_SECURE_SCHEME};
use astarte_ocf_protocol::v1::DeviceId;
use rustls::ClientConfig;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::cache::CachedDevice;
use crate::coap::CoapClient;
use crate::error::OnboardError;
use crate::transport::Network;

/// Owned device reachable over CoAP over TLS.
///
/// The session is dialed on first use with the owner identity and shared by every user of the
/// device.
pub struct Device<N: Network> {
    links: DeviceLinks,
    network: Arc<N>,
    tls: Arc<ClientConfig>,
    timeout: Duration,
    session: Mutex<Option<Arc<CoapClient<N::Session>>>>,
}

impl<N: Network> Device<N> {
    /// Create the device from its links.
    pub fn new(
        links: DeviceLinks,
        network: Arc<N>,
        tls: Arc<ClientConfig>,
        timeout: Duration,
    ) -> Self {
        Self {
            links,
            network,
            tls,
            timeout,
            session: Mutex::new(None),
        }
    }

    /// Identifier the device was discovered with.
    pub fn device_id(&self) -> DeviceId {
        self.links.device_id
    }

    /// Links of the device resources.
    pub fn links(&self) -> &DeviceLinks {
        &self.links
    }

    /// Returns the session with the device, dialing it if needed.
    pub async fn session(&self) -> Result<Arc<CoapClient<N::Session>>, OnboardError> {
        let mut session = self.session.lock().await;

        if let Some(client) = session.as_ref() {
            return Ok(Arc::clone(client));
        }

        let addr = self
            .links
            .tcp_secure_address()
            .and_then(|ep| ep.socket_addr())
            .ok_or(OnboardError::NoSecureEndpoint)?;

        let dialed = self
            .network
            .dial_tcp_tls(addr, Arc::clone(&self.tls))
            .await
            .map_err(|err| {
                error!(error = %err, %addr, "couldn't dial the device");

                OnboardError::Dial(err)
            })?;

        info!(device_id = %self.links.device_id, %addr, "session established");

        let client = Arc::new(CoapClient::new(dialed, TCP_SECURE_SCHEME, self.timeout));

        *session = Some(Arc::clone(&client));

        Ok(client)
    }

    /// Closes the session, the next use dials a new one.
    pub async fn drop_session(&self) {
        if let Some(client) = self.session.lock().await.take() {
            client.close();

            debug!(device_id = %self.links.device_id, "session closed");
        }
    }
}

impl<N: Network> CachedDevice for Device<N> {
    async fn close(&self) {
        self.drop_session().await;
    }
}

impl<N: Network> std::fmt::Debug for Device<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("links", &self.links)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

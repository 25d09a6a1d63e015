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

//! Provisioning of an owned device.

use std::sync::Arc;

use astarte_ocf_protocol::v1::acl::AclUpdate;
use astarte_ocf_protocol::v1::cred::CredentialUpdate;
use astarte_ocf_protocol::v1::pstat::{OperationalState, PstatUpdate};
use astarte_ocf_protocol::v1::{DeviceId, ACL2_HREF, CRED_HREF, PSTAT_HREF};
use tracing::{debug, info};

use crate::cache::DeviceHandle;
use crate::coap::{CoapClient, Query};
use crate::device::Device;
use crate::error::OnboardError;
use crate::transport::Network;

/// Session with a device in the ready for provisioning state.
///
/// The device stays cached until the client is dropped. [`close`](Self::close) moves the
/// device back to normal operation.
pub struct ProvisioningClient<N: Network> {
    handle: DeviceHandle<Device<N>>,
    client: Arc<CoapClient<N::Session>>,
    device_id: DeviceId,
}

impl<N: Network> ProvisioningClient<N> {
    pub(crate) async fn start(
        handle: DeviceHandle<Device<N>>,
        device_id: DeviceId,
    ) -> Result<Self, OnboardError> {
        let client = handle.session().await?;

        client
            .update_resource(
                PSTAT_HREF,
                &PstatUpdate::state(OperationalState::ReadyForProvisioning),
            )
            .await?;

        info!(%device_id, "device ready for provisioning");

        Ok(Self {
            handle,
            client,
            device_id,
        })
    }

    /// Identifier of the device.
    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    /// Session with the device.
    pub fn client(&self) -> &CoapClient<N::Session> {
        &self.client
    }

    /// Adds the credentials.
    pub async fn set_credentials(&self, update: &CredentialUpdate) -> Result<(), OnboardError> {
        self.client.update_resource(CRED_HREF, update).await?;

        debug!(count = update.creds.len(), "credentials set");

        Ok(())
    }

    /// Adds the access control entries.
    pub async fn set_access_control(&self, update: &AclUpdate) -> Result<(), OnboardError> {
        self.client.update_resource(ACL2_HREF, update).await?;

        debug!(count = update.entries.len(), "access control entries set");

        Ok(())
    }

    /// Deletes the credential.
    pub async fn delete_credential(&self, id: u64) -> Result<(), OnboardError> {
        self.client
            .delete_resource(CRED_HREF, &[Query::credential_id(id)])
            .await
    }

    /// Moves the device to normal operation and releases it.
    pub async fn close(self) -> Result<(), OnboardError> {
        self.finish().await.map(drop)
    }

    /// Moves the device to normal operation, returning the cached device.
    pub(crate) async fn finish(self) -> Result<DeviceHandle<Device<N>>, OnboardError> {
        self.client
            .update_resource(
                PSTAT_HREF,
                &PstatUpdate::state(OperationalState::ReadyForNormalOperation),
            )
            .await?;

        info!(device_id = %self.device_id, "device ready for normal operation");

        Ok(self.handle)
    }
}

impl<N: Network> std::fmt::Debug for ProvisioningClient<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvisioningClient")
            .field("device_id", &self.device_id)
            .field("remote_addr", &self.client.remote_addr())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use astarte_ocf_protocol::v1::cred::Credential;
    use pretty_assertions::assert_eq;

    use crate::tests::Fixture;

    use super::*;

    #[tokio::test]
    async fn provision_owned_device() {
        let fixture = Fixture::new().await;
        let device = fixture.add_device().await;
        let device_id = device.device_id();
        let owner = fixture.client.owner_id();

        fixture.client.own_device(device_id).await.unwrap();

        assert!(fixture.client.cache().is_empty());

        let provisioning = fixture.client.provision_device(device_id).await.unwrap();

        assert_eq!(provisioning.device_id(), device_id);
        assert_eq!(
            device.pstat().dos.state,
            OperationalState::ReadyForProvisioning
        );
        assert_eq!(fixture.client.cache().reference_count(&device_id), 1);

        let peer = DeviceId::new_v4();

        provisioning
            .set_credentials(&CredentialUpdate::single(
                owner,
                Credential::pair_wise(peer, b"peer key".to_vec()),
            ))
            .await
            .unwrap();

        let id = device
            .credentials()
            .iter()
            .find(|cred| cred.subject == peer)
            .and_then(|cred| cred.id)
            .unwrap();

        provisioning.delete_credential(id).await.unwrap();

        assert!(device.credentials().iter().all(|cred| cred.subject != peer));

        provisioning.close().await.unwrap();

        assert_eq!(
            device.pstat().dos.state,
            OperationalState::ReadyForNormalOperation
        );
        assert!(fixture.client.cache().is_empty());
        assert_eq!(device.live_sessions(), 0);
    }

    #[tokio::test]
    async fn provision_shares_cached_session() {
        let fixture = Fixture::new().await;
        let device = fixture.add_device().await;
        let device_id = device.device_id();

        fixture.client.own_device(device_id).await.unwrap();

        let dials = device.dials();

        let provisioning = fixture.client.provision_device(device_id).await.unwrap();

        // The cached device is reused by the other requests
        let pstat: astarte_ocf_protocol::v1::pstat::Pstat = fixture
            .client
            .get_resource(device_id, PSTAT_HREF)
            .await
            .unwrap();

        assert_eq!(pstat.dos.state, OperationalState::ReadyForProvisioning);
        assert_eq!(device.dials(), dials + 1);

        provisioning.close().await.unwrap();

        assert_eq!(device.live_sessions(), 0);
    }

    #[tokio::test]
    async fn provision_unknown_device() {
        let fixture = Fixture::new().await;

        let err = fixture
            .client
            .provision_device(DeviceId::new_v4())
            .await
            .unwrap_err();

        assert_eq!(err.step(), crate::Step::Provisioning);
        assert!(matches!(err.kind(), OnboardError::DeviceNotFound));
    }
}

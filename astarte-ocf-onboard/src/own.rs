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

//! Ownership transfer of a device.
//!
//! Every state performs one round with the device and consumes the previous state.

use std::sync::Arc;

use astarte_ocf_protocol::v1::acl::AclUpdate;
use astarte_ocf_protocol::v1::cred::{Credential, CredentialUpdate};
use astarte_ocf_protocol::v1::doxm::{Doxm, DoxmUpdate};
use astarte_ocf_protocol::v1::links::{TCP_SECURE_SCHEME, UDP_SCHEME};
use astarte_ocf_protocol::v1::pstat::{OperationalMode, OperationalState, Pstat, PstatUpdate};
use astarte_ocf_protocol::v1::{DeviceId, ACL2_HREF, CRED_HREF, DOXM_HREF, PSTAT_HREF};
use tracing::{debug, error, info, instrument, warn};

use crate::cache::DeviceHandle;
use crate::client::{Client, DeviceOwnership, OwnershipFilter};
use crate::coap::{CoapClient, Query};
use crate::device::Device;
use crate::error::{Error, OnboardError, Step, StepExt};
use crate::otm::OwnershipTransfer;
use crate::provision::ProvisioningClient;
use crate::transport::Network;

/// Temporary owner written to the legacy implementations before the real one.
const LEGACY_OWNER: DeviceId =
    DeviceId::new(uuid::uuid!("52a201a7-824c-4fc6-9092-d2b6a3414a5b"));

/// Key of the throwaway credential written for the temporary owner.
const LEGACY_OWNER_KEY: &[u8] = b"LEGACY OWNER PATCH";

/// Options of the ownership transfer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OwnOptions {
    /// Identifier assigned to the device once owned, it keeps its own if unset.
    pub new_device_id: Option<DeviceId>,
}

/// Result of a successful ownership transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnOutcome {
    /// The ownership was transferred.
    Owned {
        /// Identifier of the owned device.
        device_id: DeviceId,
    },
    /// The device was already owned by the client owner, nothing was done.
    AlreadyOwned,
}

struct Ctx<'a, N: Network> {
    client: &'a Client<N>,
    device_id: DeviceId,
    owner: DeviceId,
    new_device_id: DeviceId,
}

/// Returns an error if the device is not ready for ownership transfer.
fn check_ready_for_otm(pstat: &Pstat) -> Result<(), OnboardError> {
    if pstat.dos.pending {
        error!(state = %pstat.dos.state, "device state transition pending");

        return Err(OnboardError::DevicePending {
            state: pstat.dos.state,
        });
    }

    if pstat.dos.state != OperationalState::ReadyForOtm {
        error!(state = %pstat.dos.state, "device not ready for ownership transfer");

        return Err(OnboardError::InvalidOperationalState {
            state: pstat.dos.state,
        });
    }

    Ok(())
}

struct Discovered {
    ownership: DeviceOwnership,
}

impl Discovered {
    async fn run<'a, N: Network>(
        self,
        ctx: &Ctx<'a, N>,
    ) -> Result<Option<MethodSelected<'a, N>>, Error> {
        let step = Step::MethodSelected;
        let doxm = &self.ownership.doxm;

        if doxm.owned {
            if doxm.is_owned_by(&ctx.owner) {
                info!("device already owned");

                return Ok(None);
            }

            error!(owner = %doxm.owner_id, "device owned by another owner");

            return Err(Error::new(
                step,
                ctx.device_id,
                OnboardError::AlreadyOwned {
                    owner: doxm.owner_id,
                },
            ));
        }

        let otm = ctx
            .client
            .registry
            .select(&doxm.supported_methods)
            .at(step, ctx.device_id)?;

        let session = ctx
            .client
            .network
            .dial_udp(self.ownership.peer)
            .await
            .at(step, ctx.device_id)?;

        let udp = CoapClient::new(session, UDP_SCHEME, ctx.client.config.request_timeout);

        match udp.get_resource::<Pstat>(PSTAT_HREF).await {
            Ok(pstat) => check_ready_for_otm(&pstat).at(step, ctx.device_id)?,
            Err(err) => debug!(error = %err, "pstat not readable before the secure session"),
        }

        if let Err(err) = udp
            .update_resource(DOXM_HREF, &DoxmUpdate::select(otm.kind()))
            .await
        {
            // The device could have been owned since it was discovered
            if let Ok(doxm) = udp.get_resource::<Doxm>(DOXM_HREF).await {
                if doxm.is_owned_by(&ctx.owner) {
                    info!("device already owned");

                    return Ok(None);
                }
            }

            return Err(err).at(step, ctx.device_id);
        }

        info!(method = %otm.kind(), "Own.MethodSelected done");

        Ok(Some(MethodSelected { otm, udp }))
    }
}

struct MethodSelected<'a, N: Network> {
    otm: &'a dyn OwnershipTransfer<N>,
    udp: CoapClient<N::Session>,
}

impl<'a, N: Network> MethodSelected<'a, N> {
    async fn run(self, ctx: &Ctx<'a, N>) -> Result<SessionEstablished<'a, N>, Error> {
        let step = Step::SessionEstablished;

        let links = self
            .udp
            .device_links(&ctx.device_id)
            .await
            .at(step, ctx.device_id)?;

        // The unsecured session is not needed anymore
        drop(self.udp);

        let endpoint = links
            .tcp_secure_address()
            .cloned()
            .ok_or(OnboardError::NoSecureEndpoint)
            .at(step, ctx.device_id)?;

        let session = self
            .otm
            .dial(&ctx.client.network, &endpoint)
            .await
            .at(step, ctx.device_id)?;

        let handle = ctx
            .client
            .cache
            .get_or_create(ctx.device_id, || ctx.client.new_device(links))
            .await;

        info!(endpoint = %endpoint.url, "Own.SessionEstablished done");

        Ok(SessionEstablished {
            otm: self.otm,
            secure: Secure {
                handle,
                session: CoapClient::new(
                    session,
                    TCP_SECURE_SCHEME,
                    ctx.client.config.request_timeout,
                ),
            },
        })
    }
}

/// Provisioning session dialed with the transfer method.
struct Secure<N: Network> {
    handle: DeviceHandle<Device<N>>,
    session: CoapClient<N::Session>,
}

struct SessionEstablished<'a, N: Network> {
    otm: &'a dyn OwnershipTransfer<N>,
    secure: Secure<N>,
}

impl<'a, N: Network> SessionEstablished<'a, N> {
    async fn run(self, ctx: &Ctx<'a, N>) -> Result<StateValidated<'a, N>, Error> {
        let step = Step::StateValidated;

        let pstat: Pstat = self
            .secure
            .session
            .get_resource(PSTAT_HREF)
            .await
            .at(step, ctx.device_id)?;

        check_ready_for_otm(&pstat).at(step, ctx.device_id)?;

        if !pstat.supported_modes.has(OperationalMode::ClientDirected) {
            error!(
                supported = pstat.supported_modes.bits(),
                "client directed mode not supported"
            );

            return Err(OnboardError::UnsupportedOperationalMode {
                supported: pstat.supported_modes,
            })
            .at(step, ctx.device_id);
        }

        info!("Own.StateValidated done");

        Ok(StateValidated {
            otm: self.otm,
            secure: self.secure,
        })
    }
}

struct StateValidated<'a, N: Network> {
    otm: &'a dyn OwnershipTransfer<N>,
    secure: Secure<N>,
}

impl<'a, N: Network> StateValidated<'a, N> {
    async fn run(self, ctx: &Ctx<'a, N>) -> Result<OperationalModeSet<'a, N>, Error> {
        self.secure
            .session
            .update_resource(
                PSTAT_HREF,
                &PstatUpdate::mode(OperationalMode::ClientDirected),
            )
            .await
            .at(Step::OperationalModeSet, ctx.device_id)?;

        info!("Own.OperationalModeSet done");

        Ok(OperationalModeSet {
            otm: self.otm,
            secure: self.secure,
        })
    }
}

struct OperationalModeSet<'a, N: Network> {
    otm: &'a dyn OwnershipTransfer<N>,
    secure: Secure<N>,
}

impl<'a, N: Network> OperationalModeSet<'a, N> {
    async fn run(self, ctx: &Ctx<'a, N>) -> Result<CredentialsProvisioned<N>, Error> {
        self.otm
            .provision_owner_credentials(&self.secure.session, ctx.owner, ctx.device_id)
            .await
            .at(Step::CredentialsProvisioned, ctx.device_id)?;

        info!("Own.CredentialsProvisioned done");

        Ok(CredentialsProvisioned {
            secure: self.secure,
        })
    }
}

struct CredentialsProvisioned<N: Network> {
    secure: Secure<N>,
}

impl<N: Network> CredentialsProvisioned<N> {
    async fn run(self, ctx: &Ctx<'_, N>) -> Result<CompatibilityPatched<N>, Error> {
        let step = Step::CompatibilityPatched;
        let session = &self.secure.session;

        let legacy = session
            .is_legacy_implementation()
            .await
            .at(step, ctx.device_id)?;

        if legacy {
            debug!("patching legacy implementation");

            session
                .update_resource(DOXM_HREF, &DoxmUpdate::owner(LEGACY_OWNER))
                .await
                .at(step, ctx.device_id)?;

            let credential = Credential::pair_wise(LEGACY_OWNER, LEGACY_OWNER_KEY.to_vec());

            session
                .update_resource(CRED_HREF, &CredentialUpdate::single(ctx.owner, credential))
                .await
                .at(step, ctx.device_id)?;

            session
                .delete_resource(CRED_HREF, &[Query::credential_subject(&LEGACY_OWNER)])
                .await
                .at(step, ctx.device_id)?;
        }

        info!(legacy, "Own.CompatibilityPatched done");

        Ok(CompatibilityPatched {
            secure: self.secure,
        })
    }
}

struct CompatibilityPatched<N: Network> {
    secure: Secure<N>,
}

impl<N: Network> CompatibilityPatched<N> {
    async fn run(self, ctx: &Ctx<'_, N>) -> Result<OwnerSet<N>, Error> {
        self.secure
            .session
            .update_resource(DOXM_HREF, &DoxmUpdate::owner(ctx.owner))
            .await
            .at(Step::OwnerSet, ctx.device_id)?;

        info!(owner = %ctx.owner, "Own.OwnerSet done");

        Ok(OwnerSet {
            secure: self.secure,
        })
    }
}

struct OwnerSet<N: Network> {
    secure: Secure<N>,
}

impl<N: Network> OwnerSet<N> {
    async fn run(self, ctx: &Ctx<'_, N>) -> Result<OwnerVerified<N>, Error> {
        let step = Step::OwnerVerified;

        let doxm: Doxm = self
            .secure
            .session
            .get_resource(DOXM_HREF)
            .await
            .at(step, ctx.device_id)?;

        if doxm.owner_id != ctx.owner {
            error!(expected = %ctx.owner, actual = %doxm.owner_id, "owner not applied");

            return Err(OnboardError::OwnerMismatch {
                expected: ctx.owner,
                actual: doxm.owner_id,
            })
            .at(step, ctx.device_id);
        }

        info!("Own.OwnerVerified done");

        Ok(OwnerVerified {
            secure: self.secure,
        })
    }
}

struct OwnerVerified<N: Network> {
    secure: Secure<N>,
}

impl<N: Network> OwnerVerified<N> {
    async fn run(self, ctx: &Ctx<'_, N>) -> Result<MarkedOwned<N>, Error> {
        self.secure
            .session
            .update_resource(
                DOXM_HREF,
                &DoxmUpdate::owned(ctx.owner, ctx.new_device_id),
            )
            .await
            .at(Step::MarkedOwned, ctx.device_id)?;

        info!(device_id = %ctx.new_device_id, "Own.MarkedOwned done");

        Ok(MarkedOwned {
            secure: self.secure,
        })
    }
}

struct MarkedOwned<N: Network> {
    secure: Secure<N>,
}

impl<N: Network> MarkedOwned<N> {
    async fn run(self, ctx: &Ctx<'_, N>) -> Result<AclTransferred<N>, Error> {
        let step = Step::AclTransferred;

        let Secure { handle, session } = self.secure;

        // The owner credentials are installed, the next sessions use the owner identity
        drop(session);

        let session = handle.session().await.at(step, ctx.device_id)?;

        session
            .update_resource(PSTAT_HREF, &PstatUpdate::resource_owner(ctx.owner))
            .await
            .at(step, ctx.device_id)?;

        session
            .update_resource(ACL2_HREF, &AclUpdate::owner(ctx.owner))
            .await
            .at(step, ctx.device_id)?;

        info!("Own.AclTransferred done");

        Ok(AclTransferred { handle, session })
    }
}

struct AclTransferred<N: Network> {
    handle: DeviceHandle<Device<N>>,
    session: Arc<CoapClient<N::Session>>,
}

impl<N: Network> AclTransferred<N> {
    async fn run(self, ctx: &Ctx<'_, N>) -> Result<NormalOperation<N>, Error> {
        let step = Step::NormalOperation;

        let provisioning = ProvisioningClient::start(self.handle, ctx.new_device_id)
            .await
            .at(step, ctx.device_id)?;

        let handle = provisioning.finish().await.at(step, ctx.device_id)?;

        let pstat: Pstat = self
            .session
            .get_resource(PSTAT_HREF)
            .await
            .at(step, ctx.device_id)?;

        if pstat.dos.state != OperationalState::ReadyForNormalOperation {
            error!(state = %pstat.dos.state, "device not in normal operation");

            return Err(OnboardError::InvalidOperationalState {
                state: pstat.dos.state,
            })
            .at(step, ctx.device_id);
        }

        info!("Own.NormalOperation done");

        Ok(NormalOperation { handle })
    }
}

struct NormalOperation<N: Network> {
    handle: DeviceHandle<Device<N>>,
}

impl<N: Network> Client<N> {
    /// Transfers the ownership of the device to the owner.
    ///
    /// Owning a device already owned by the owner succeeds without changes.
    pub async fn own_device(&self, device_id: DeviceId) -> Result<OwnOutcome, Error> {
        self.own_device_with(device_id, OwnOptions::default()).await
    }

    /// Transfers the ownership of the device to the owner with the options.
    ///
    /// The first failed step is returned, the steps already completed are not rolled back.
    #[instrument(skip_all, fields(%device_id))]
    pub async fn own_device_with(
        &self,
        device_id: DeviceId,
        options: OwnOptions,
    ) -> Result<OwnOutcome, Error> {
        let _lock = self.locks.lock(device_id).await;

        info!("Own started");

        let ownership = self
            .find_device_ownership(device_id, OwnershipFilter::All)
            .await
            .at(Step::Discovery, device_id)?;

        let ctx = Ctx {
            client: self,
            device_id,
            owner: self.identity.id(),
            new_device_id: options.new_device_id.unwrap_or(device_id),
        };

        let Some(selected) = Discovered { ownership }.run(&ctx).await? else {
            return Ok(OwnOutcome::AlreadyOwned);
        };

        let established = selected.run(&ctx).await?;
        let validated = established.run(&ctx).await?;
        let mode_set = validated.run(&ctx).await?;
        let provisioned = mode_set.run(&ctx).await?;
        let patched = provisioned.run(&ctx).await?;
        let owner_set = patched.run(&ctx).await?;
        let verified = owner_set.run(&ctx).await?;
        let marked = verified.run(&ctx).await?;
        let acl = marked.run(&ctx).await?;
        let normal = acl.run(&ctx).await?;

        let mut handle = normal.handle;

        if ctx.new_device_id != device_id {
            handle = match self.cache.rename(handle, ctx.new_device_id) {
                Ok(handle) => handle,
                Err(handle) => {
                    warn!(new_device_id = %ctx.new_device_id, "device already cached with the new id");

                    handle
                }
            };
        }

        self.cache.release(handle).await;

        info!(device_id = %ctx.new_device_id, "Own done");

        Ok(OwnOutcome::Owned {
            device_id: ctx.new_device_id,
        })
    }
}

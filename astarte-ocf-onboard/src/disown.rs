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

//! Reset of the device ownership.

use astarte_ocf_protocol::v1::pstat::{OperationalState, PstatUpdate};
use astarte_ocf_protocol::v1::{DeviceId, PSTAT_HREF};
use tracing::{debug, error, info, instrument, warn};

use crate::client::{Client, OwnershipFilter};
use crate::error::{Error, OnboardError, Step};
use crate::transport::Network;

/// Result of a successful disown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisownOutcome {
    /// The device was reset to the ready for ownership transfer state.
    Reset,
    /// The device was not owned, nothing was done.
    AlreadyDisowned,
}

impl<N: Network> Client<N> {
    /// Resets the device, removing the owner and every credential and access control entry.
    ///
    /// Disowning a device that is not owned succeeds without changes.
    #[instrument(skip_all, fields(%device_id))]
    pub async fn disown_device(&self, device_id: DeviceId) -> Result<DisownOutcome, Error> {
        let _lock = self.locks.lock(device_id).await;

        info!("Disown started");

        let err = match self.reset_device(device_id).await {
            Ok(()) => {
                info!("Disown done");

                return Ok(DisownOutcome::Reset);
            }
            Err(err) => err,
        };

        // The device could be already disowned, and not reachable with the owner identity
        match self
            .find_device_ownership(device_id, OwnershipFilter::All)
            .await
        {
            Ok(ownership) if !ownership.doxm.owned => {
                info!("device already disowned");

                Ok(DisownOutcome::AlreadyDisowned)
            }
            Ok(_) | Err(_) => {
                error!(error = %err, "couldn't reset the device");

                Err(Error::new(Step::Disown, device_id, err))
            }
        }
    }

    async fn reset_device(&self, device_id: DeviceId) -> Result<(), OnboardError> {
        let handle = self.acquire_device(device_id).await?;

        let res = match handle.session().await {
            Ok(session) => {
                session
                    .update_resource(PSTAT_HREF, &PstatUpdate::state(OperationalState::Reset))
                    .await
            }
            Err(err) => Err(err),
        };

        let res = match res {
            // The device can close the session while applying the reset
            Err(OnboardError::Transport(err)) => {
                warn!(error = %err, "session lost during the reset");

                Ok(())
            }
            res => res,
        };

        // The session was authenticated with the owner credentials, now removed
        handle.drop_session().await;

        if self.cache.remove_device(&device_id, &handle) {
            debug!("device removed from the cache");
        }

        self.cache.release(handle).await;

        res
    }
}

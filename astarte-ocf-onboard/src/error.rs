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

//! Errors returned by the onboarding operations.

use std::fmt::Display;

use astarte_ocf_protocol::v1::doxm::OwnerTransferMethod;
use astarte_ocf_protocol::v1::pstat::{OperationalModes, OperationalState};
use astarte_ocf_protocol::v1::DeviceId;

use crate::identity::IdentityError;
use crate::signer::SignerError;
use crate::transport::TransportError;

/// Step of an operation on a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Locating the device on the network.
    Discovery,
    /// Reading the ownership status and selecting the transfer method.
    MethodSelected,
    /// Dialing the secure session with the transfer method.
    SessionEstablished,
    /// Checking the provisioning status.
    StateValidated,
    /// Selecting the client directed operational mode.
    OperationalModeSet,
    /// Installing the owner credentials.
    CredentialsProvisioned,
    /// Patching legacy implementations.
    CompatibilityPatched,
    /// Writing the device owner.
    OwnerSet,
    /// Reading back the device owner.
    OwnerVerified,
    /// Marking the device as owned.
    MarkedOwned,
    /// Writing the owner access control entry.
    AclTransferred,
    /// Moving the device to normal operation.
    NormalOperation,
    /// Resetting the device ownership.
    Disown,
    /// Provisioning an owned device.
    Provisioning,
}

impl Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Step::Discovery => write!(f, "Discovery"),
            Step::MethodSelected => write!(f, "Own.MethodSelected"),
            Step::SessionEstablished => write!(f, "Own.SessionEstablished"),
            Step::StateValidated => write!(f, "Own.StateValidated"),
            Step::OperationalModeSet => write!(f, "Own.OperationalModeSet"),
            Step::CredentialsProvisioned => write!(f, "Own.CredentialsProvisioned"),
            Step::CompatibilityPatched => write!(f, "Own.CompatibilityPatched"),
            Step::OwnerSet => write!(f, "Own.OwnerSet"),
            Step::OwnerVerified => write!(f, "Own.OwnerVerified"),
            Step::MarkedOwned => write!(f, "Own.MarkedOwned"),
            Step::AclTransferred => write!(f, "Own.AclTransferred"),
            Step::NormalOperation => write!(f, "Own.NormalOperation"),
            Step::Disown => write!(f, "Disown"),
            Step::Provisioning => write!(f, "Provisioning"),
        }
    }
}

/// Error of an operation on a device, tagged with the failed step.
#[derive(Debug, thiserror::Error)]
#[error("{step} failed for device {device_id}")]
pub struct Error {
    step: Step,
    device_id: DeviceId,
    #[source]
    source: OnboardError,
}

impl Error {
    /// Create the error for the step.
    pub fn new(step: Step, device_id: DeviceId, source: impl Into<OnboardError>) -> Self {
        Self {
            step,
            device_id,
            source: source.into(),
        }
    }

    /// Returns the step that failed.
    pub fn step(&self) -> Step {
        self.step
    }

    /// Returns the device the operation was on.
    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    /// Returns the cause of the error.
    pub fn kind(&self) -> &OnboardError {
        &self.source
    }

    /// Returns the cause of the error.
    pub fn into_kind(self) -> OnboardError {
        self.source
    }
}

/// Cause of an onboarding error.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum OnboardError {
    /// Couldn't exchange a message with the device.
    #[error("couldn't exchange message with the device")]
    Transport(#[from] TransportError),
    /// Invalid payload or error response.
    #[error("invalid message")]
    Protocol(#[from] astarte_ocf_protocol::Error),
    /// The device didn't answer the discovery.
    #[error("device not found")]
    DeviceNotFound,
    /// None of the offered transfer methods is supported by the device.
    #[error("ownership transfer methods {offered:?} not supported, device supports {supported:?}")]
    UnsupportedMethod {
        /// Methods available to the client.
        offered: Vec<OwnerTransferMethod>,
        /// Methods supported by the device.
        supported: Vec<OwnerTransferMethod>,
    },
    /// The device is owned by a different owner.
    #[error("device already owned by {owner}")]
    AlreadyOwned {
        /// Current owner of the device.
        owner: DeviceId,
    },
    /// The device is transitioning to another state.
    #[error("device pending for operational state {state}")]
    DevicePending {
        /// The pending state.
        state: OperationalState,
    },
    /// The device is not ready for ownership transfer.
    #[error("device operational state {state} is not RFOTM")]
    InvalidOperationalState {
        /// The current state.
        state: OperationalState,
    },
    /// The device doesn't support the client directed operational mode.
    #[error("device doesn't support client directed mode, supported modes {:#b}", .supported.bits())]
    UnsupportedOperationalMode {
        /// Supported modes.
        supported: OperationalModes,
    },
    /// The device has no CoAP over TLS endpoint.
    #[error("couldn't find a secure endpoint")]
    NoSecureEndpoint,
    /// The transfer method can't dial the endpoint scheme.
    #[error("scheme {scheme} not supported")]
    UnsupportedScheme {
        /// Scheme of the endpoint.
        scheme: String,
    },
    /// Couldn't establish the secure session.
    #[error("couldn't dial the secure session")]
    Dial(#[source] TransportError),
    /// The certificate signing request is invalid.
    #[error("invalid certificate signing request")]
    Csr(#[source] astarte_ocf_protocol::Error),
    /// The certificate authority couldn't sign the request.
    #[error("couldn't sign the certificate")]
    Signer(#[from] SignerError),
    /// Invalid identity certificate.
    #[error("invalid identity")]
    Identity(#[from] IdentityError),
    /// The device didn't apply the owner.
    #[error("device owner is {actual}, expected {expected}")]
    OwnerMismatch {
        /// The owner written.
        expected: DeviceId,
        /// The owner read back.
        actual: DeviceId,
    },
    /// The device answered the legacy implementation check with an unknown content format.
    #[error("unknown content format {0:?}")]
    UnknownContentFormat(Option<u16>),
    /// Couldn't configure TLS.
    #[error("couldn't configure tls")]
    Tls(#[from] rustls::Error),
    /// The request timed out.
    #[error("request timed out")]
    Timeout,
}

/// Tags the error of a step.
pub(crate) trait StepExt<T> {
    fn at(self, step: Step, device_id: DeviceId) -> Result<T, Error>;
}

impl<T, E> StepExt<T> for Result<T, E>
where
    E: Into<OnboardError>,
{
    fn at(self, step: Step, device_id: DeviceId) -> Result<T, Error> {
        self.map_err(|err| Error::new(step, device_id, err))
    }
}

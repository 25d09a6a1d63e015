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

//! Device provisioning status resource `/oic/sec/pstat`.

use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;
use crate::Error;

use super::DeviceId;

/// Device onboarding state.
///
/// ```text
/// 0: RESET
/// 1: RFOTM, ready for ownership transfer
/// 2: RFPRO, ready for provisioning
/// 3: RFNOP, ready for normal operation
/// 4: SRESET, soft reset
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum OperationalState {
    /// Device reset.
    Reset = 0,
    /// Ready for ownership transfer.
    ReadyForOtm = 1,
    /// Ready for provisioning.
    ReadyForProvisioning = 2,
    /// Ready for normal operation.
    ReadyForNormalOperation = 3,
    /// Soft reset.
    SoftReset = 4,
}

impl TryFrom<u8> for OperationalState {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        let value = match value {
            0 => OperationalState::Reset,
            1 => OperationalState::ReadyForOtm,
            2 => OperationalState::ReadyForProvisioning,
            3 => OperationalState::ReadyForNormalOperation,
            4 => OperationalState::SoftReset,
            _ => return Err(Error::new(ErrorKind::OutOfRange, "for OperationalState")),
        };

        Ok(value)
    }
}

impl From<OperationalState> for u8 {
    fn from(value: OperationalState) -> Self {
        value as u8
    }
}

impl Display for OperationalState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationalState::Reset => write!(f, "RESET"),
            OperationalState::ReadyForOtm => write!(f, "RFOTM"),
            OperationalState::ReadyForProvisioning => write!(f, "RFPRO"),
            OperationalState::ReadyForNormalOperation => write!(f, "RFNOP"),
            OperationalState::SoftReset => write!(f, "SRESET"),
        }
    }
}

/// Operational mode of the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum OperationalMode {
    /// Multiple services, server directed.
    ServerDirectedMultiple = 1,
    /// Single service, server directed.
    ServerDirectedSingle = 1 << 1,
    /// Client directed, the onboarding tool drives the provisioning.
    ClientDirected = 1 << 2,
}

impl TryFrom<u8> for OperationalMode {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        let value = match value {
            1 => OperationalMode::ServerDirectedMultiple,
            2 => OperationalMode::ServerDirectedSingle,
            4 => OperationalMode::ClientDirected,
            _ => return Err(Error::new(ErrorKind::OutOfRange, "for OperationalMode")),
        };

        Ok(value)
    }
}

impl From<OperationalMode> for u8 {
    fn from(value: OperationalMode) -> Self {
        value as u8
    }
}

impl Display for OperationalMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationalMode::ServerDirectedMultiple => write!(f, "ServerDirectedMultiple"),
            OperationalMode::ServerDirectedSingle => write!(f, "ServerDirectedSingle"),
            OperationalMode::ClientDirected => write!(f, "ClientDirected"),
        }
    }
}

/// Bitmask of supported [`OperationalMode`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationalModes(u8);

impl OperationalModes {
    /// Create the bitmask from the modes.
    pub fn new(modes: &[OperationalMode]) -> Self {
        Self(modes.iter().fold(0, |acc, mode| acc | u8::from(*mode)))
    }

    /// Returns true if the mode is supported.
    pub fn has(&self, mode: OperationalMode) -> bool {
        self.0 & u8::from(mode) != 0
    }

    /// Returns the raw bits.
    pub fn bits(&self) -> u8 {
        self.0
    }
}

/// Device onboarding state with the pending flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceOnboardingState {
    /// Current, or pending, state.
    #[serde(rename = "s")]
    pub state: OperationalState,
    /// A transition to [`state`](Self::state) is still in progress.
    #[serde(rename = "p", default)]
    pub pending: bool,
}

/// Provisioning status, as read from `/oic/sec/pstat`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pstat {
    /// Onboarding state.
    pub dos: DeviceOnboardingState,
    /// The device is operational.
    #[serde(rename = "isop", default)]
    pub is_operational: bool,
    /// Current provisioning mode bitmask.
    #[serde(rename = "cm", default)]
    pub current_mode: u16,
    /// Target provisioning mode bitmask.
    #[serde(rename = "tm", default)]
    pub target_mode: u16,
    /// Current operational mode.
    #[serde(rename = "om")]
    pub operational_mode: OperationalMode,
    /// Supported operational modes.
    #[serde(rename = "sm")]
    pub supported_modes: OperationalModes,
    /// Identifier of the resource owner.
    #[serde(rename = "rowneruuid", default)]
    pub resource_owner_id: DeviceId,
}

/// Requested onboarding state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DosUpdate {
    /// State to transition to.
    #[serde(rename = "s")]
    pub state: OperationalState,
}

/// Partial update of `/oic/sec/pstat`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PstatUpdate {
    /// Request a state transition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dos: Option<DosUpdate>,
    /// Set the operational mode.
    #[serde(rename = "om", default, skip_serializing_if = "Option::is_none")]
    pub operational_mode: Option<OperationalMode>,
    /// Set the resource owner.
    #[serde(rename = "rowneruuid", default, skip_serializing_if = "Option::is_none")]
    pub resource_owner_id: Option<DeviceId>,
}

impl PstatUpdate {
    /// Transition to the given state.
    pub fn state(state: OperationalState) -> Self {
        Self {
            dos: Some(DosUpdate { state }),
            ..Default::default()
        }
    }

    /// Set the operational mode.
    pub fn mode(mode: OperationalMode) -> Self {
        Self {
            operational_mode: Some(mode),
            ..Default::default()
        }
    }

    /// Set the resource owner.
    pub fn resource_owner(owner: DeviceId) -> Self {
        Self {
            resource_owner_id: Some(owner),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use ciborium::Value;
    use pretty_assertions::assert_eq;

    use crate::tests::{from_cbor, to_cbor};

    use super::*;

    #[test]
    fn decode_pstat() {
        let value = Value::Map(vec![
            (
                Value::Text("dos".into()),
                Value::Map(vec![
                    (Value::Text("s".into()), Value::Integer(1.into())),
                    (Value::Text("p".into()), Value::Bool(false)),
                ]),
            ),
            (Value::Text("isop".into()), Value::Bool(false)),
            (Value::Text("cm".into()), Value::Integer(2.into())),
            (Value::Text("tm".into()), Value::Integer(0.into())),
            (Value::Text("om".into()), Value::Integer(4.into())),
            (Value::Text("sm".into()), Value::Integer(5.into())),
            (Value::Text("rowneruuid".into()), Value::Text("".into())),
        ]);

        let pstat: Pstat = from_cbor(&to_cbor(&value));

        assert_eq!(pstat.dos.state, OperationalState::ReadyForOtm);
        assert!(!pstat.dos.pending);
        assert_eq!(pstat.operational_mode, OperationalMode::ClientDirected);
        assert!(pstat.supported_modes.has(OperationalMode::ClientDirected));
        assert!(pstat
            .supported_modes
            .has(OperationalMode::ServerDirectedMultiple));
        assert!(!pstat.supported_modes.has(OperationalMode::ServerDirectedSingle));
        assert!(pstat.resource_owner_id.is_nil());
    }

    #[test]
    fn state_update_only_sends_state() {
        let update = PstatUpdate::state(OperationalState::ReadyForNormalOperation);

        let map: BTreeMap<String, Value> = from_cbor(&to_cbor(&update));

        assert_eq!(
            map,
            BTreeMap::from([(
                "dos".to_string(),
                Value::Map(vec![(Value::Text("s".into()), Value::Integer(3.into()))])
            )])
        );
    }

    #[test]
    fn operational_modes_mask() {
        let modes = OperationalModes::new(&[
            OperationalMode::ServerDirectedSingle,
            OperationalMode::ClientDirected,
        ]);

        assert_eq!(modes.bits(), 6);
        assert!(!modes.has(OperationalMode::ServerDirectedMultiple));
    }

    #[test]
    fn state_display() {
        let states = [
            OperationalState::Reset,
            OperationalState::ReadyForOtm,
            OperationalState::ReadyForProvisioning,
            OperationalState::ReadyForNormalOperation,
            OperationalState::SoftReset,
        ]
        .map(|s| s.to_string())
        .join(" ");

        insta::assert_snapshot!(states, @"RESET RFOTM RFPRO RFNOP SRESET");

        let err = OperationalState::try_from(5).unwrap_err();

        assert_eq!(*err.kind(), ErrorKind::OutOfRange);
    }
}

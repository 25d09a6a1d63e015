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

//! Device owner transfer method resource `/oic/sec/doxm`.
//!
//! Holds the supported ownership transfer methods and the ownership status of the device.

use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;
use crate::Error;

use super::cred::CredentialType;
use super::DeviceId;

/// Ownership transfer method.
///
/// ```text
/// oic.sec.doxmtype:
///     0: Just Works
///     1: Random PIN
///     2: Manufacturer certificate
///     3: Decentralized public key
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum OwnerTransferMethod {
    /// Anonymous key agreement, no authentication.
    JustWorks = 0,
    /// Key agreement authenticated by a PIN shown on the device.
    RandomPin = 1,
    /// The device authenticates with a certificate issued by its manufacturer.
    ManufacturerCertificate = 2,
    /// Decentralized public key.
    DecentralizedPublicKey = 3,
}

impl TryFrom<u8> for OwnerTransferMethod {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        let value = match value {
            0 => OwnerTransferMethod::JustWorks,
            1 => OwnerTransferMethod::RandomPin,
            2 => OwnerTransferMethod::ManufacturerCertificate,
            3 => OwnerTransferMethod::DecentralizedPublicKey,
            _ => return Err(Error::new(ErrorKind::OutOfRange, "for OwnerTransferMethod")),
        };

        Ok(value)
    }
}

impl From<OwnerTransferMethod> for u8 {
    fn from(value: OwnerTransferMethod) -> Self {
        value as u8
    }
}

impl Display for OwnerTransferMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OwnerTransferMethod::JustWorks => write!(f, "JustWorks"),
            OwnerTransferMethod::RandomPin => write!(f, "RandomPin"),
            OwnerTransferMethod::ManufacturerCertificate => write!(f, "ManufacturerCertificate"),
            OwnerTransferMethod::DecentralizedPublicKey => write!(f, "DecentralizedPublicKey"),
        }
    }
}

/// Ownership status of the device, as read from `/oic/sec/doxm`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Doxm {
    /// Methods the device supports, in the device's preference order.
    #[serde(rename = "oxms", default)]
    pub supported_methods: Vec<OwnerTransferMethod>,
    /// Method selected by the onboarding tool.
    #[serde(rename = "oxmsel", default, skip_serializing_if = "Option::is_none")]
    pub selected_method: Option<OwnerTransferMethod>,
    /// Supported credential types.
    #[serde(rename = "sct", default)]
    pub supported_credential_types: CredentialType,
    /// The device has been owned.
    #[serde(default)]
    pub owned: bool,
    /// Identifier of the device.
    #[serde(rename = "deviceuuid")]
    pub device_id: DeviceId,
    /// Identifier of the owner.
    #[serde(rename = "devowneruuid", default)]
    pub owner_id: DeviceId,
    /// Identifier of the resource owner.
    #[serde(rename = "rowneruuid", default)]
    pub resource_owner_id: DeviceId,
}

impl Doxm {
    /// Returns true if the device is owned by the given identity.
    pub fn is_owned_by(&self, owner: &DeviceId) -> bool {
        self.owned && self.owner_id == *owner
    }

    /// Returns true if the device offers the ownership transfer method.
    pub fn supports(&self, method: OwnerTransferMethod) -> bool {
        self.supported_methods.contains(&method)
    }
}

/// Partial update of `/oic/sec/doxm`.
///
/// Only the set fields are written.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoxmUpdate {
    /// Select the ownership transfer method.
    #[serde(rename = "oxmsel", default, skip_serializing_if = "Option::is_none")]
    pub selected_method: Option<OwnerTransferMethod>,
    /// Mark the device as owned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owned: Option<bool>,
    /// Set the device identifier.
    #[serde(rename = "deviceuuid", default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<DeviceId>,
    /// Set the device owner.
    #[serde(rename = "devowneruuid", default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<DeviceId>,
    /// Set the resource owner.
    #[serde(rename = "rowneruuid", default, skip_serializing_if = "Option::is_none")]
    pub resource_owner_id: Option<DeviceId>,
}

impl DoxmUpdate {
    /// Selects the ownership transfer method.
    pub fn select(method: OwnerTransferMethod) -> Self {
        Self {
            selected_method: Some(method),
            ..Default::default()
        }
    }

    /// Sets the device owner.
    pub fn owner(owner: DeviceId) -> Self {
        Self {
            owner_id: Some(owner),
            ..Default::default()
        }
    }

    /// Marks the device owned, setting the resource owner and the device identifier.
    pub fn owned(owner: DeviceId, device_id: DeviceId) -> Self {
        Self {
            owned: Some(true),
            device_id: Some(device_id),
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

    const DEVICE: &str = "9f4c1d9e-6c0e-4b2a-8f53-0b3d2c2f3e11";
    const OWNER: &str = "0ac4f0a3-9f0e-4b1e-a0f5-3a3b9a7f1c22";

    #[test]
    fn decode_unowned_doxm() {
        let value = Value::Map(vec![
            (
                Value::Text("oxms".into()),
                Value::Array(vec![Value::Integer(0.into()), Value::Integer(2.into())]),
            ),
            (Value::Text("oxmsel".into()), Value::Integer(0.into())),
            (Value::Text("sct".into()), Value::Integer(9.into())),
            (Value::Text("owned".into()), Value::Bool(false)),
            (Value::Text("deviceuuid".into()), Value::Text(DEVICE.into())),
            (Value::Text("devowneruuid".into()), Value::Text("".into())),
            (Value::Text("rowneruuid".into()), Value::Text("".into())),
            (
                Value::Text("rt".into()),
                Value::Array(vec![Value::Text("oic.r.doxm".into())]),
            ),
        ]);

        let doxm: Doxm = from_cbor(&to_cbor(&value));

        assert_eq!(
            doxm.supported_methods,
            [
                OwnerTransferMethod::JustWorks,
                OwnerTransferMethod::ManufacturerCertificate
            ]
        );
        assert_eq!(doxm.selected_method, Some(OwnerTransferMethod::JustWorks));
        assert!(doxm
            .supported_credential_types
            .contains(CredentialType::ASYMMETRIC_SIGNING_WITH_CERTIFICATE));
        assert!(!doxm.owned);
        assert_eq!(doxm.device_id, DEVICE.parse().unwrap());
        assert!(doxm.owner_id.is_nil());
        assert!(doxm.supports(OwnerTransferMethod::ManufacturerCertificate));
        assert!(!doxm.supports(OwnerTransferMethod::RandomPin));
    }

    #[test]
    fn owned_by() {
        let owner: DeviceId = OWNER.parse().unwrap();
        let mut doxm = Doxm {
            supported_methods: vec![OwnerTransferMethod::ManufacturerCertificate],
            selected_method: None,
            supported_credential_types: CredentialType::default(),
            owned: false,
            device_id: DEVICE.parse().unwrap(),
            owner_id: owner,
            resource_owner_id: DeviceId::nil(),
        };

        assert!(!doxm.is_owned_by(&owner));

        doxm.owned = true;

        assert!(doxm.is_owned_by(&owner));
        assert!(!doxm.is_owned_by(&DeviceId::new_v4()));
    }

    #[test]
    fn update_skips_unset_fields() {
        let update = DoxmUpdate::owner(OWNER.parse().unwrap());

        let map: BTreeMap<String, Value> = from_cbor(&to_cbor(&update));

        assert_eq!(map.len(), 1);
        assert_eq!(map["devowneruuid"], Value::Text(OWNER.into()));

        let update = DoxmUpdate::owned(OWNER.parse().unwrap(), DEVICE.parse().unwrap());

        let map: BTreeMap<String, Value> = from_cbor(&to_cbor(&update));

        assert_eq!(
            map.keys().map(String::as_str).collect::<Vec<_>>(),
            ["deviceuuid", "owned", "rowneruuid"]
        );
    }

    #[test]
    fn unknown_method_out_of_range() {
        let err = OwnerTransferMethod::try_from(42).unwrap_err();

        assert_eq!(*err.kind(), ErrorKind::OutOfRange);

        let res: Result<Vec<OwnerTransferMethod>, _> =
            ciborium::from_reader(to_cbor(&[0u8, 42]).as_slice());

        assert!(res.is_err());
    }
}

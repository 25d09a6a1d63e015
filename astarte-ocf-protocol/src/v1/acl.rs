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

//! Access control list resource `/oic/sec/acl2`.

use std::ops::BitOr;

use serde::{Deserialize, Serialize};

use super::DeviceId;

/// Bitmask of the permissions granted by an entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(u8);

impl Permission {
    /// Create a resource.
    pub const CREATE: Self = Self(1);
    /// Retrieve a resource.
    pub const RETRIEVE: Self = Self(1 << 1);
    /// Update a resource.
    pub const UPDATE: Self = Self(1 << 2);
    /// Delete a resource.
    pub const DELETE: Self = Self(1 << 3);
    /// Observe a resource.
    pub const NOTIFY: Self = Self(1 << 4);
    /// Every permission.
    pub const ALL: Self = Self(31);

    /// Returns true if every bit of `other` is set.
    pub fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns the raw bits.
    pub fn bits(&self) -> u8 {
        self.0
    }
}

impl BitOr for Permission {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

/// Connection type of a subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionType {
    /// Unauthenticated and unencrypted connections.
    #[serde(rename = "anon-clear")]
    AnonClear,
    /// Authenticated and encrypted connections.
    #[serde(rename = "auth-crypt")]
    AuthCrypt,
}

/// Subject an entry applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Subject {
    /// A device identity.
    Device {
        /// Identifier of the device.
        #[serde(rename = "uuid")]
        device_id: DeviceId,
    },
    /// A role, optionally with the authority asserting it.
    Role {
        /// Name of the role.
        role: String,
        /// Authority of the role.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        authority: Option<String>,
    },
    /// Every connection of the type.
    Connection {
        /// The connection type.
        #[serde(rename = "conntype")]
        connection_type: ConnectionType,
    },
}

/// Wildcard matching a set of resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Wildcard {
    /// Every resource.
    #[serde(rename = "*")]
    All,
    /// Every discoverable non-configuration resource.
    #[serde(rename = "+")]
    Discoverable,
    /// Every non-discoverable non-configuration resource.
    #[serde(rename = "-")]
    NonDiscoverable,
}

/// Resource an entry applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Resource {
    /// A single resource.
    Href {
        /// Path of the resource.
        href: String,
    },
    /// A set of resources.
    Wildcard {
        /// The wildcard.
        #[serde(rename = "wc")]
        wildcard: Wildcard,
    },
}

/// Access control entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessControl {
    /// Identifier assigned by the device, absent when creating an entry.
    #[serde(rename = "aceid", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    /// Subject of the entry.
    pub subject: Subject,
    /// Resources the entry grants access to.
    pub resources: Vec<Resource>,
    /// Granted permissions.
    pub permission: Permission,
}

impl AccessControl {
    /// Entry for the owner: every permission on every resource.
    pub fn owner(owner: DeviceId) -> Self {
        Self {
            id: None,
            subject: Subject::Device { device_id: owner },
            resources: vec![Resource::Wildcard {
                wildcard: Wildcard::All,
            }],
            permission: Permission::ALL,
        }
    }
}

/// Access control list read from `/oic/sec/acl2`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessControlList {
    /// Entries of the list.
    #[serde(rename = "aclist2", default)]
    pub entries: Vec<AccessControl>,
    /// Identifier of the resource owner.
    #[serde(rename = "rowneruuid", default)]
    pub resource_owner_id: DeviceId,
}

/// Entries to add to `/oic/sec/acl2`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclUpdate {
    /// Set the resource owner.
    #[serde(rename = "rowneruuid", default, skip_serializing_if = "Option::is_none")]
    pub resource_owner_id: Option<DeviceId>,
    /// Entries to add.
    #[serde(rename = "aclist2", default)]
    pub entries: Vec<AccessControl>,
}

impl AclUpdate {
    /// Grants the owner every permission and sets it as resource owner.
    pub fn owner(owner: DeviceId) -> Self {
        Self {
            resource_owner_id: Some(owner),
            entries: vec![AccessControl::owner(owner)],
        }
    }
}

#[cfg(test)]
mod tests {
    use ciborium::Value;
    use pretty_assertions::assert_eq;

    use crate::tests::{from_cbor, to_cbor};

    use super::*;

    const OWNER: &str = "0ac4f0a3-9f0e-4b1e-a0f5-3a3b9a7f1c22";

    #[test]
    fn owner_entry_wire_format() {
        let update = AclUpdate::owner(OWNER.parse().unwrap());

        let value: Value = from_cbor(&to_cbor(&update));

        let expected = Value::Map(vec![
            (Value::Text("rowneruuid".into()), Value::Text(OWNER.into())),
            (
                Value::Text("aclist2".into()),
                Value::Array(vec![Value::Map(vec![
                    (
                        Value::Text("subject".into()),
                        Value::Map(vec![(Value::Text("uuid".into()), Value::Text(OWNER.into()))]),
                    ),
                    (
                        Value::Text("resources".into()),
                        Value::Array(vec![Value::Map(vec![(
                            Value::Text("wc".into()),
                            Value::Text("*".into()),
                        )])]),
                    ),
                    (Value::Text("permission".into()), Value::Integer(31.into())),
                ])]),
            ),
        ]);

        assert_eq!(value, expected);
    }

    #[test]
    fn decode_subjects() {
        let subjects = Value::Array(vec![
            Value::Map(vec![(
                Value::Text("conntype".into()),
                Value::Text("auth-crypt".into()),
            )]),
            Value::Map(vec![(Value::Text("role".into()), Value::Text("admin".into()))]),
            Value::Map(vec![(Value::Text("uuid".into()), Value::Text(OWNER.into()))]),
        ]);

        let subjects: Vec<Subject> = from_cbor(&to_cbor(&subjects));

        assert_eq!(
            subjects,
            [
                Subject::Connection {
                    connection_type: ConnectionType::AuthCrypt
                },
                Subject::Role {
                    role: "admin".to_string(),
                    authority: None
                },
                Subject::Device {
                    device_id: OWNER.parse().unwrap()
                },
            ]
        );
    }

    #[test]
    fn all_permissions() {
        let all = Permission::CREATE
            | Permission::RETRIEVE
            | Permission::UPDATE
            | Permission::DELETE
            | Permission::NOTIFY;

        assert_eq!(all, Permission::ALL);
        assert!(Permission::ALL.contains(Permission::NOTIFY));
        assert_eq!(Permission::ALL.bits(), 31);
    }
}

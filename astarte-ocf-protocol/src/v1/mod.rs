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

//! Resources of the OCF Security Specification version 2.2 used while onboarding a device.
//!
//! You can find the spec [here](https://openconnectivity.org/specs/OCF_Security_Specification_v2.2.5.pdf)

use std::fmt::{Debug, Display};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ErrorKind;
use crate::Error;

pub mod acl;
pub mod cred;
pub mod csr;
pub mod doxm;
pub mod links;
pub mod pstat;

/// Resource directory, lists the links of every resource of the device.
pub const RESOURCE_DIRECTORY_HREF: &str = "/oic/res";
/// Device information.
pub const DEVICE_HREF: &str = "/oic/d";
/// Device owner transfer method resource.
pub const DOXM_HREF: &str = "/oic/sec/doxm";
/// Device provisioning status resource.
pub const PSTAT_HREF: &str = "/oic/sec/pstat";
/// Credentials resource.
pub const CRED_HREF: &str = "/oic/sec/cred";
/// Access control list resource.
pub const ACL2_HREF: &str = "/oic/sec/acl2";
/// Certificate signing request resource.
pub const CSR_HREF: &str = "/oic/sec/csr";

/// Resource type of [`DOXM_HREF`]
pub const DOXM_RT: &str = "oic.r.doxm";
/// Resource type of [`PSTAT_HREF`]
pub const PSTAT_RT: &str = "oic.r.pstat";
/// Resource type of [`CRED_HREF`]
pub const CRED_RT: &str = "oic.r.cred";
/// Resource type of [`ACL2_HREF`]
pub const ACL2_RT: &str = "oic.r.acl2";
/// Resource type of [`CSR_HREF`]
pub const CSR_RT: &str = "oic.r.csr";
/// Resource type of [`DEVICE_HREF`]
pub const DEVICE_RT: &str = "oic.wk.d";

/// Baseline interface, every property of the resource.
pub const BASELINE_IF: &str = "oic.if.baseline";

/// Prefix of the common name of an identity certificate.
pub const COMMON_NAME_PREFIX: &str = "uuid:";

/// Content format of a payload.
///
/// Registered CoAP content format numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
#[repr(u16)]
pub enum ContentFormat {
    /// `application/cbor`
    ///
    /// Used by implementations that predate the OCF media type.
    AppCbor = 60,
    /// `application/vnd.ocf+cbor`
    AppOcfCbor = 10000,
}

impl TryFrom<u16> for ContentFormat {
    type Error = Error;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        let value = match value {
            60 => ContentFormat::AppCbor,
            10000 => ContentFormat::AppOcfCbor,
            _ => return Err(Error::new(ErrorKind::OutOfRange, "for ContentFormat")),
        };

        Ok(value)
    }
}

impl From<ContentFormat> for u16 {
    fn from(value: ContentFormat) -> Self {
        value as u16
    }
}

impl Display for ContentFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContentFormat::AppCbor => write!(f, "application/cbor"),
            ContentFormat::AppOcfCbor => write!(f, "application/vnd.ocf+cbor"),
        }
    }
}

/// Identifier of a device or of an owner.
///
/// The nil UUID (or the empty string on the wire) means no identity.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct DeviceId(Uuid);

impl DeviceId {
    /// Create an identifier from the UUID.
    pub const fn new(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// The empty identity.
    pub const fn nil() -> Self {
        Self(Uuid::nil())
    }

    /// Generate a new random identifier.
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns true if this is the empty identity.
    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }

    /// Returns the inner UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Parses the identifier from a certificate subject common name `uuid:<value>`.
    ///
    /// The prefix is case insensitive.
    pub fn from_common_name(cn: &str) -> Result<Self, Error> {
        let prefix = cn
            .get(..COMMON_NAME_PREFIX.len())
            .ok_or(Error::new(ErrorKind::Invalid, "common name too short"))?;

        if !prefix.eq_ignore_ascii_case(COMMON_NAME_PREFIX) {
            return Err(Error::new(ErrorKind::Invalid, "common name prefix"));
        }

        let id = cn[COMMON_NAME_PREFIX.len()..].parse()?;

        Ok(id)
    }

    /// Returns the common name for an identity certificate of this identifier.
    pub fn to_common_name(&self) -> String {
        format!("{COMMON_NAME_PREFIX}{self}")
    }
}

impl From<Uuid> for DeviceId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl FromStr for DeviceId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Ok(Self::nil());
        }

        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| Error::new(ErrorKind::Invalid, "device uuid"))
    }
}

impl Debug for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("DeviceId")
            .field(&self.0.hyphenated())
            .finish()
    }
}

impl Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0.hyphenated(), f)
    }
}

impl Serialize for DeviceId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(&self.0.hyphenated())
    }
}

impl<'de> Deserialize<'de> for DeviceId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct DeviceIdVisitor;

        impl serde::de::Visitor<'_> for DeviceIdVisitor {
            type Value = DeviceId;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("an hyphenated uuid or an empty string")
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                v.parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_str(DeviceIdVisitor)
    }
}

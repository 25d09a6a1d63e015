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

//! Credentials resource `/oic/sec/cred`.

use std::fmt::Display;
use std::ops::BitOr;

use serde::{Deserialize, Serialize};

use super::DeviceId;

/// Bitmask of credential types.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CredentialType(u8);

impl CredentialType {
    /// No credential.
    pub const EMPTY: Self = Self(0);
    /// Symmetric pair-wise key.
    pub const SYMMETRIC_PAIR_WISE: Self = Self(1);
    /// Symmetric group key.
    pub const SYMMETRIC_GROUP: Self = Self(1 << 1);
    /// Asymmetric signing key.
    pub const ASYMMETRIC_SIGNING: Self = Self(1 << 2);
    /// Asymmetric signing key with certificate.
    pub const ASYMMETRIC_SIGNING_WITH_CERTIFICATE: Self = Self(1 << 3);
    /// PIN or password.
    pub const PIN_OR_PASSWORD: Self = Self(1 << 4);
    /// Asymmetric encryption key.
    pub const ASYMMETRIC_ENCRYPTION_KEY: Self = Self(1 << 5);

    /// Returns true if every bit of `other` is set.
    pub fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns the raw bits.
    pub fn bits(&self) -> u8 {
        self.0
    }
}

impl BitOr for CredentialType {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

/// Usage of a certificate credential.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum CredentialUsage {
    /// Identity certificate of the subject.
    Cert,
    /// Trust anchor.
    TrustCa,
    /// Manufacturer certificate.
    MfgCert,
    /// Manufacturer trust anchor.
    MfgTrustCa,
    /// Role certificate.
    RoleCert,
    /// Usage not known to this library.
    Other(String),
}

impl CredentialUsage {
    /// Returns the value on the wire.
    pub fn as_str(&self) -> &str {
        match self {
            CredentialUsage::Cert => "oic.sec.cred.cert",
            CredentialUsage::TrustCa => "oic.sec.cred.trustca",
            CredentialUsage::MfgCert => "oic.sec.cred.mfgcert",
            CredentialUsage::MfgTrustCa => "oic.sec.cred.mfgtrustca",
            CredentialUsage::RoleCert => "oic.sec.cred.rolecert",
            CredentialUsage::Other(other) => other,
        }
    }
}

impl From<String> for CredentialUsage {
    fn from(value: String) -> Self {
        match value.as_str() {
            "oic.sec.cred.cert" => CredentialUsage::Cert,
            "oic.sec.cred.trustca" => CredentialUsage::TrustCa,
            "oic.sec.cred.mfgcert" => CredentialUsage::MfgCert,
            "oic.sec.cred.mfgtrustca" => CredentialUsage::MfgTrustCa,
            "oic.sec.cred.rolecert" => CredentialUsage::RoleCert,
            _ => CredentialUsage::Other(value),
        }
    }
}

impl From<CredentialUsage> for String {
    fn from(value: CredentialUsage) -> Self {
        match value {
            CredentialUsage::Other(other) => other,
            usage => usage.as_str().to_string(),
        }
    }
}

impl Display for CredentialUsage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Encoding of the credential data.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Encoding {
    /// PEM text.
    Pem,
    /// DER bytes.
    Der,
    /// Raw bytes.
    Raw,
    /// Base64 text.
    Base64,
    /// Encoding not known to this library.
    Other(String),
}

impl Encoding {
    /// Returns the value on the wire.
    pub fn as_str(&self) -> &str {
        match self {
            Encoding::Pem => "oic.sec.encoding.pem",
            Encoding::Der => "oic.sec.encoding.der",
            Encoding::Raw => "oic.sec.encoding.raw",
            Encoding::Base64 => "oic.sec.encoding.base64",
            Encoding::Other(other) => other,
        }
    }
}

impl From<String> for Encoding {
    fn from(value: String) -> Self {
        match value.as_str() {
            "oic.sec.encoding.pem" => Encoding::Pem,
            "oic.sec.encoding.der" => Encoding::Der,
            "oic.sec.encoding.raw" => Encoding::Raw,
            "oic.sec.encoding.base64" => Encoding::Base64,
            _ => Encoding::Other(value),
        }
    }
}

impl From<Encoding> for String {
    fn from(value: Encoding) -> Self {
        match value {
            Encoding::Other(other) => other,
            encoding => encoding.as_str().to_string(),
        }
    }
}

impl Display for Encoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Public or private data of a credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialData {
    /// The data, text encodings are accepted as bytes.
    #[serde(serialize_with = "serde_bytes::serialize", deserialize_with = "bytes_or_text")]
    pub data: Vec<u8>,
    /// How the data is encoded.
    pub encoding: Encoding,
}

impl CredentialData {
    /// DER encoded data.
    pub fn der(data: Vec<u8>) -> Self {
        Self {
            data,
            encoding: Encoding::Der,
        }
    }

    /// Raw data.
    pub fn raw(data: Vec<u8>) -> Self {
        Self {
            data,
            encoding: Encoding::Raw,
        }
    }
}

/// Devices send PEM data either as a byte string or as a text string.
pub(crate) fn bytes_or_text<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    struct DataVisitor;

    impl serde::de::Visitor<'_> for DataVisitor {
        type Value = Vec<u8>;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a byte or text string")
        }

        fn visit_bytes<E>(self, v: &[u8]) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(v.to_vec())
        }

        fn visit_byte_buf<E>(self, v: Vec<u8>) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(v)
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(v.as_bytes().to_vec())
        }

        fn visit_string<E>(self, v: String) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(v.into_bytes())
        }
    }

    deserializer.deserialize_any(DataVisitor)
}

/// A single credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Identifier assigned by the device, absent when creating a credential.
    #[serde(rename = "credid", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    /// Identity the credential belongs to.
    #[serde(rename = "subjectuuid")]
    pub subject: DeviceId,
    /// Type of the credential.
    #[serde(rename = "credtype")]
    pub credential_type: CredentialType,
    /// Usage of a certificate credential.
    #[serde(rename = "credusage", default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<CredentialUsage>,
    /// Public data, the certificate.
    #[serde(rename = "publicdata", default, skip_serializing_if = "Option::is_none")]
    pub public_data: Option<CredentialData>,
    /// Private data, the key.
    #[serde(rename = "privatedata", default, skip_serializing_if = "Option::is_none")]
    pub private_data: Option<CredentialData>,
}

impl Credential {
    /// Identity certificate of a device, DER encoded.
    pub fn identity_certificate(subject: DeviceId, der: Vec<u8>) -> Self {
        Self {
            id: None,
            subject,
            credential_type: CredentialType::ASYMMETRIC_SIGNING_WITH_CERTIFICATE,
            usage: Some(CredentialUsage::Cert),
            public_data: Some(CredentialData::der(der)),
            private_data: None,
        }
    }

    /// Trust anchor for the owner, DER encoded.
    pub fn trust_anchor(subject: DeviceId, der: Vec<u8>) -> Self {
        Self {
            id: None,
            subject,
            credential_type: CredentialType::ASYMMETRIC_SIGNING_WITH_CERTIFICATE,
            usage: Some(CredentialUsage::TrustCa),
            public_data: Some(CredentialData::der(der)),
            private_data: None,
        }
    }

    /// Symmetric pair-wise key for the subject.
    pub fn pair_wise(subject: DeviceId, key: Vec<u8>) -> Self {
        Self {
            id: None,
            subject,
            credential_type: CredentialType::SYMMETRIC_PAIR_WISE,
            usage: None,
            public_data: None,
            private_data: Some(CredentialData::raw(key)),
        }
    }

    /// Returns true for owner identity material replaced during ownership transfer.
    ///
    /// These are the certificate credentials with identity or trust anchor usage.
    pub fn is_owner_identity_material(&self) -> bool {
        self.credential_type == CredentialType::ASYMMETRIC_SIGNING_WITH_CERTIFICATE
            && matches!(
                self.usage,
                Some(CredentialUsage::Cert) | Some(CredentialUsage::TrustCa)
            )
    }
}

/// Credentials read from `/oic/sec/cred`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Every credential installed on the device.
    #[serde(default)]
    pub creds: Vec<Credential>,
    /// Identifier of the resource owner.
    #[serde(rename = "rowneruuid", default)]
    pub resource_owner_id: DeviceId,
}

/// Credentials to add to `/oic/sec/cred`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialUpdate {
    /// Set the resource owner.
    #[serde(rename = "rowneruuid", default, skip_serializing_if = "Option::is_none")]
    pub resource_owner_id: Option<DeviceId>,
    /// Credentials to add.
    #[serde(default)]
    pub creds: Vec<Credential>,
}

impl CredentialUpdate {
    /// Adds a single credential owned by `owner`.
    pub fn single(owner: DeviceId, credential: Credential) -> Self {
        Self {
            resource_owner_id: Some(owner),
            creds: vec![credential],
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

    #[test]
    fn credential_type_bits() {
        let sct = CredentialType::SYMMETRIC_PAIR_WISE
            | CredentialType::ASYMMETRIC_SIGNING_WITH_CERTIFICATE;

        assert_eq!(sct.bits(), 9);
        assert!(sct.contains(CredentialType::SYMMETRIC_PAIR_WISE));
        assert!(!sct.contains(CredentialType::PIN_OR_PASSWORD));
        assert!(sct.contains(CredentialType::EMPTY));
    }

    #[test]
    fn identity_certificate_wire_names() {
        let cred = Credential::identity_certificate(DEVICE.parse().unwrap(), vec![0x30, 0x82]);

        let map: BTreeMap<String, Value> = from_cbor(&to_cbor(&cred));

        assert_eq!(
            map.keys().map(String::as_str).collect::<Vec<_>>(),
            ["credtype", "credusage", "publicdata", "subjectuuid"]
        );
        assert_eq!(map["credtype"], Value::Integer(8.into()));
        assert_eq!(map["credusage"], Value::Text("oic.sec.cred.cert".into()));
        assert_eq!(
            map["publicdata"],
            Value::Map(vec![
                (Value::Text("data".into()), Value::Bytes(vec![0x30, 0x82])),
                (
                    Value::Text("encoding".into()),
                    Value::Text("oic.sec.encoding.der".into())
                ),
            ])
        );
    }

    #[test]
    fn decode_text_data_and_unknown_usage() {
        let value = Value::Map(vec![
            (Value::Text("credid".into()), Value::Integer(3.into())),
            (Value::Text("subjectuuid".into()), Value::Text(DEVICE.into())),
            (Value::Text("credtype".into()), Value::Integer(8.into())),
            (
                Value::Text("credusage".into()),
                Value::Text("x.vendor.usage".into()),
            ),
            (
                Value::Text("publicdata".into()),
                Value::Map(vec![
                    (Value::Text("data".into()), Value::Text("-----BEGIN".into())),
                    (
                        Value::Text("encoding".into()),
                        Value::Text("oic.sec.encoding.pem".into()),
                    ),
                ]),
            ),
        ]);

        let cred: Credential = from_cbor(&to_cbor(&value));

        assert_eq!(cred.id, Some(3));
        assert_eq!(
            cred.usage,
            Some(CredentialUsage::Other("x.vendor.usage".to_string()))
        );

        let data = cred.public_data.unwrap();
        assert_eq!(data.data, b"-----BEGIN");
        assert_eq!(data.encoding, Encoding::Pem);
    }

    #[test]
    fn owner_identity_material() {
        let id = DEVICE.parse().unwrap();

        assert!(Credential::identity_certificate(id, Vec::new()).is_owner_identity_material());
        assert!(Credential::trust_anchor(id, Vec::new()).is_owner_identity_material());
        assert!(!Credential::pair_wise(id, Vec::new()).is_owner_identity_material());

        let mut mfg = Credential::identity_certificate(id, Vec::new());
        mfg.usage = Some(CredentialUsage::MfgCert);

        assert!(!mfg.is_owner_identity_material());
    }
}

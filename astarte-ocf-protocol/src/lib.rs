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

#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

//! Data model of the OCF security resources used to onboard a device.
//!
//! The payloads are CBOR maps using the short property names of the OCF Security Specification.

pub mod error;
pub mod utils;

pub mod v1;

pub use self::error::Error;

/// Latest version of the resource model.
pub use self::v1 as latest;

#[cfg(test)]
pub(crate) mod tests {
    /// Encodes a value into CBOR.
    pub(crate) fn to_cbor<T>(value: &T) -> Vec<u8>
    where
        T: serde::Serialize,
    {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf).unwrap();

        buf
    }

    /// Decodes a value from CBOR.
    pub(crate) fn from_cbor<T>(buf: &[u8]) -> T
    where
        T: serde::de::DeserializeOwned,
    {
        ciborium::from_reader(buf).unwrap()
    }
}

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

//! Utilities to serialize and deserialize CBOR payloads.

use std::fmt::{Debug, Display};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::ErrorKind;
use crate::Error;

/// Encodes a payload into a CBOR buffer.
pub fn encode<T>(value: &T, ctx: &'static str) -> Result<Vec<u8>, Error>
where
    T: Serialize,
{
    let mut buf = Vec::new();

    ciborium::into_writer(value, &mut buf).map_err(|err| {
        #[cfg(feature = "tracing")]
        tracing::error!(error = %err, ctx, "couldn't encode cbor payload");
        #[cfg(not(feature = "tracing"))]
        let _ = err;

        Error::new(ErrorKind::Encode, ctx)
    })?;

    Ok(buf)
}

/// Decodes a payload from a CBOR buffer.
pub fn decode<T>(buf: &[u8], ctx: &'static str) -> Result<T, Error>
where
    T: DeserializeOwned,
{
    ciborium::from_reader(buf).map_err(|err| {
        #[cfg(feature = "tracing")]
        tracing::error!(error = %err, ctx, payload = %Hex::new(buf), "couldn't decode cbor payload");
        #[cfg(not(feature = "tracing"))]
        let _ = err;

        Error::new(ErrorKind::Decode, ctx)
    })
}

/// New type to debug print a byte slice as hex.
pub struct Hex<'a>(&'a [u8]);

impl<'a> Hex<'a> {
    /// Create a new instance for the slice.
    pub fn new(items: &'a [u8]) -> Self {
        Self(items)
    }
}

impl Debug for Hex<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self, f)
    }
}

impl Display for Hex<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for b in self.0 {
            write!(f, "{b:02x}")?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn decode_invalid_payload() {
        let err = decode::<String>(&[0xff, 0x00], "text").unwrap_err();

        assert_eq!(*err.kind(), ErrorKind::Decode);
        assert_eq!(err.ctx(), "text");
    }

    #[test]
    fn encode_then_decode() {
        let buf = encode(&"uuid", "text").unwrap();

        let back: String = decode(&buf, "text").unwrap();

        assert_eq!(back, "uuid");
    }

    #[test]
    fn hex_display() {
        let value = [0xde, 0xad, 0xbe, 0xef];

        let hex = Hex::new(&value);

        insta::assert_snapshot!(hex, @"deadbeef");
        assert_eq!(format!("{hex:?}"), "deadbeef");
    }
}

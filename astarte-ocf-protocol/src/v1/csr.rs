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

//! Certificate signing request resource `/oic/sec/csr`.

use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;
use crate::Error;

use super::cred::{bytes_or_text, Encoding};

/// Certificate signing request generated by the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Csr {
    /// The request.
    #[serde(serialize_with = "serde_bytes::serialize", deserialize_with = "bytes_or_text")]
    pub csr: Vec<u8>,
    /// Encoding of the request, PEM or DER.
    pub encoding: Encoding,
}

impl Csr {
    /// Returns the request DER encoded.
    pub fn to_der(&self) -> Result<Vec<u8>, Error> {
        match self.encoding {
            Encoding::Der => Ok(self.csr.clone()),
            Encoding::Pem => pem_to_der(&self.csr),
            _ => Err(Error::new(ErrorKind::Invalid, "csr encoding")),
        }
    }
}

/// Decodes the first PEM block of the buffer.
///
/// A trailing NUL terminator is allowed.
pub fn pem_to_der(data: &[u8]) -> Result<Vec<u8>, Error> {
    let data = data.strip_suffix(&[0]).unwrap_or(data);

    let (_, pem) = x509_parser::pem::parse_x509_pem(data).map_err(|err| {
        #[cfg(feature = "tracing")]
        tracing::error!(error = %err, "couldn't decode pem block");
        #[cfg(not(feature = "tracing"))]
        let _ = err;

        Error::new(ErrorKind::Decode, "invalid pem encoding")
    })?;

    Ok(pem.contents)
}

/// Returns the certificate DER encoded, decoding the first PEM block if needed.
pub fn certificate_to_der(data: &[u8]) -> Result<Vec<u8>, Error> {
    let start = data
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(data.len());

    if data[start..].starts_with(b"-----BEGIN") {
        pem_to_der(data)
    } else {
        Ok(data.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    const PEM: &str = "-----BEGIN CERTIFICATE REQUEST-----\nMAMCAQA=\n-----END CERTIFICATE REQUEST-----\n";
    const DER: &[u8] = &[0x30, 0x03, 0x02, 0x01, 0x00];

    #[test]
    fn pem_csr_to_der() {
        let csr = Csr {
            csr: PEM.as_bytes().to_vec(),
            encoding: Encoding::Pem,
        };

        assert_eq!(csr.to_der().unwrap(), DER);

        let mut terminated = PEM.as_bytes().to_vec();
        terminated.push(0);

        assert_eq!(pem_to_der(&terminated).unwrap(), DER);
    }

    #[test]
    fn der_csr_is_unchanged() {
        let csr = Csr {
            csr: DER.to_vec(),
            encoding: Encoding::Der,
        };

        assert_eq!(csr.to_der().unwrap(), DER);
    }

    #[test]
    fn invalid_pem_framing() {
        let csr = Csr {
            csr: b"-----BEGIN CERTIFICATE REQUEST-----\nMAMCAQA=\n".to_vec(),
            encoding: Encoding::Pem,
        };

        let err = csr.to_der().unwrap_err();

        assert_eq!(*err.kind(), ErrorKind::Decode);

        let csr = Csr {
            csr: DER.to_vec(),
            encoding: Encoding::Raw,
        };

        let err = csr.to_der().unwrap_err();

        assert_eq!(*err.kind(), ErrorKind::Invalid);
    }

    #[test]
    fn certificate_encodings() {
        let pem = PEM.replace("CERTIFICATE REQUEST", "CERTIFICATE");

        assert_eq!(certificate_to_der(pem.as_bytes()).unwrap(), DER);
        assert_eq!(certificate_to_der(DER).unwrap(), DER);
    }
}

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

//! Certificate authority issuing the identity certificates.

use std::future::Future;

use rcgen::{
    BasicConstraints, CertificateParams, CertificateSigningRequestParams, DnType,
    ExtendedKeyUsagePurpose, IsCa, KeyPair, KeyUsagePurpose, PKCS_ECDSA_P256_SHA256,
};
use rustls::pki_types::{CertificateDer, CertificateSigningRequestDer};
use tracing::{debug, error};

/// Extended key usage of the OCF identity certificates, `1.3.6.1.4.1.44924.1.6`.
pub const OCF_IDENTITY_EKU: [u64; 9] = [1, 3, 6, 1, 4, 1, 44924, 1, 6];

/// Error returned by the signer.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum SignerError {
    /// The certificate signing request couldn't be parsed.
    #[error("invalid certificate signing request")]
    InvalidCsr(#[source] rcgen::Error),
    /// Couldn't issue the certificate.
    #[error("couldn't issue the certificate")]
    Issue(#[source] rcgen::Error),
    /// The certificate authority refused to sign the request.
    #[error("request rejected: {0}")]
    Rejected(String),
}

/// Certificate authority interface.
pub trait CertificateSigner: Send + Sync {
    /// Signs the DER encoded certificate signing request.
    ///
    /// Returns the certificate, DER or PEM encoded.
    fn sign(&self, csr: &[u8]) -> impl Future<Output = Result<Vec<u8>, SignerError>> + Send;
}

/// Local certificate authority with a self-signed root.
///
/// The issued certificates can be used as OCF identity certificates: they have the client
/// authentication, server authentication and OCF identity extended key usages.
pub struct LocalCa {
    certificate: rcgen::Certificate,
    key: KeyPair,
}

impl std::fmt::Debug for LocalCa {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalCa").finish_non_exhaustive()
    }
}

impl LocalCa {
    /// Generates the root certificate with a new P-256 key.
    pub fn generate(common_name: &str) -> Result<Self, SignerError> {
        let key = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256).map_err(SignerError::Issue)?;

        let mut params = CertificateParams::default();
        params
            .distinguished_name
            .push(DnType::CommonName, common_name);
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];

        let certificate = params.self_signed(&key).map_err(|err| {
            error!(error = %err, "couldn't generate the root certificate");

            SignerError::Issue(err)
        })?;

        Ok(Self { certificate, key })
    }

    /// Returns the root certificate.
    pub fn certificate(&self) -> CertificateDer<'static> {
        self.certificate.der().clone()
    }

    fn issue(&self, csr: &[u8]) -> Result<Vec<u8>, SignerError> {
        let csr = CertificateSigningRequestDer::from(csr.to_vec());

        let mut request = CertificateSigningRequestParams::from_der(&csr).map_err(|err| {
            error!(error = %err, "couldn't parse the certificate signing request");

            SignerError::InvalidCsr(err)
        })?;

        request.params.is_ca = IsCa::ExplicitNoCa;
        request.params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyAgreement,
        ];
        request.params.extended_key_usages = vec![
            ExtendedKeyUsagePurpose::ClientAuth,
            ExtendedKeyUsagePurpose::ServerAuth,
            ExtendedKeyUsagePurpose::Other(OCF_IDENTITY_EKU.to_vec()),
        ];

        let certificate = request
            .signed_by(&self.certificate, &self.key)
            .map_err(|err| {
                error!(error = %err, "couldn't sign the certificate");

                SignerError::Issue(err)
            })?;

        debug!("certificate issued");

        Ok(certificate.der().to_vec())
    }
}

impl CertificateSigner for LocalCa {
    async fn sign(&self, csr: &[u8]) -> Result<Vec<u8>, SignerError> {
        self.issue(csr)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use x509_parser::prelude::{FromDer, X509Certificate};

    use super::*;

    fn csr(common_name: &str) -> Vec<u8> {
        let key = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256).unwrap();
        let mut params = CertificateParams::default();
        params
            .distinguished_name
            .push(DnType::CommonName, common_name);

        params.serialize_request(&key).unwrap().der().to_vec()
    }

    #[tokio::test]
    async fn issue_identity_certificate() {
        let ca = LocalCa::generate("Owner CA").unwrap();

        let der = ca
            .sign(&csr("uuid:9f4c1d9e-6c0e-4b2a-8f53-0b3d2c2f3e11"))
            .await
            .unwrap();

        let (_, cert) = X509Certificate::from_der(&der).unwrap();

        let cn = cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .unwrap();
        assert_eq!(cn, "uuid:9f4c1d9e-6c0e-4b2a-8f53-0b3d2c2f3e11");

        let ca_der = ca.certificate();
        let (_, ca_cert) = X509Certificate::from_der(&ca_der).unwrap();
        assert_eq!(cert.issuer().as_raw(), ca_cert.subject().as_raw());

        let eku = cert.extended_key_usage().unwrap().unwrap().value;
        assert!(eku.client_auth);
        assert!(eku.server_auth);
        assert_eq!(eku.other.len(), 1);
        assert_eq!(eku.other[0].to_id_string(), "1.3.6.1.4.1.44924.1.6");
    }

    #[tokio::test]
    async fn reject_invalid_csr() {
        let ca = LocalCa::generate("Owner CA").unwrap();

        let err = ca.sign(&[0x30, 0x03, 0x02, 0x01, 0x00]).await.unwrap_err();

        assert!(matches!(err, SignerError::InvalidCsr(_)));
    }
}

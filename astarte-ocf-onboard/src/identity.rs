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

//! Identity certificates of the owner and of the devices.

use std::sync::Arc;

use astarte_ocf_protocol::v1::csr::certificate_to_der;
use astarte_ocf_protocol::v1::DeviceId;
use rcgen::{CertificateParams, DnType, KeyPair, PKCS_ECDSA_P256_SHA256};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::verify_server_cert_signed_by_trust_anchor;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName, UnixTime};
use rustls::server::ParsedCertificate;
use rustls::{CertificateError, ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tracing::{debug, error, instrument};
use x509_parser::prelude::{FromDer, X509Certificate};
use zeroize::Zeroizing;

use crate::signer::{CertificateSigner, SignerError};

/// Object identifier of the OCF identity extended key usage.
pub const OCF_IDENTITY_EKU_OID: &str = "1.3.6.1.4.1.44924.1.6";

/// Error of an identity certificate.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum IdentityError {
    /// The certificate is not valid DER.
    #[error("couldn't parse the certificate")]
    Parse,
    /// Missing client authentication extended key usage.
    #[error("missing client authentication extended key usage")]
    MissingClientAuth,
    /// Missing server authentication extended key usage.
    #[error("missing server authentication extended key usage")]
    MissingServerAuth,
    /// Missing OCF identity extended key usage.
    #[error("missing OCF identity extended key usage")]
    MissingOcfIdentity,
    /// The subject common name is not `uuid:<device id>`.
    #[error("invalid subject common name {0:?}")]
    CommonName(String),
    /// No certificate of the chain is an identity certificate.
    #[error("no identity certificate in the chain: {0:?}")]
    NoIdentity(Vec<IdentityError>),
    /// Couldn't generate the key pair or the request.
    #[error("couldn't generate the key")]
    Key(#[source] rcgen::Error),
    /// The certificate authority couldn't issue the certificate.
    #[error("couldn't issue the certificate")]
    Signer(#[from] SignerError),
    /// The issued certificate is not DER or PEM.
    #[error("invalid certificate encoding")]
    Encoding(#[from] astarte_ocf_protocol::Error),
}

fn identity_from_certificate(der: &[u8], server_auth: bool) -> Result<DeviceId, IdentityError> {
    let (_, cert) = X509Certificate::from_der(der).map_err(|err| {
        error!(error = %err, "couldn't parse certificate");

        IdentityError::Parse
    })?;

    let eku = cert
        .extended_key_usage()
        .map_err(|err| {
            error!(error = %err, "couldn't parse extended key usage");

            IdentityError::Parse
        })?
        .map(|ext| ext.value)
        .ok_or(IdentityError::MissingClientAuth)?;

    if !eku.client_auth {
        return Err(IdentityError::MissingClientAuth);
    }

    if server_auth && !eku.server_auth {
        return Err(IdentityError::MissingServerAuth);
    }

    if !eku
        .other
        .iter()
        .any(|oid| oid.to_id_string() == OCF_IDENTITY_EKU_OID)
    {
        return Err(IdentityError::MissingOcfIdentity);
    }

    let cn = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .ok_or_else(|| IdentityError::CommonName(String::new()))?;

    DeviceId::from_common_name(cn).map_err(|_| IdentityError::CommonName(cn.to_string()))
}

/// Verifies the identity certificate of a device and returns its identifier.
///
/// The certificate must be usable for both client and server authentication.
pub fn verify_identity_certificate(der: &[u8]) -> Result<DeviceId, IdentityError> {
    identity_from_certificate(der, true)
}

/// Returns the identifier of a client identity certificate.
pub fn device_id_from_certificate(der: &[u8]) -> Result<DeviceId, IdentityError> {
    identity_from_certificate(der, false)
}

/// Certificate chain and private key used to authenticate a TLS session.
#[derive(Clone)]
pub struct TlsIdentity {
    chain: Vec<CertificateDer<'static>>,
    key: Zeroizing<Vec<u8>>,
}

impl TlsIdentity {
    /// Create the identity from the chain and the PKCS#8 DER private key.
    pub fn new(chain: Vec<CertificateDer<'static>>, key: Vec<u8>) -> Self {
        Self {
            chain,
            key: Zeroizing::new(key),
        }
    }

    /// Certificate chain, the leaf first.
    pub fn chain(&self) -> &[CertificateDer<'static>] {
        &self.chain
    }

    /// Private key, PKCS#8 DER.
    pub fn key_der(&self) -> &[u8] {
        &self.key
    }

    /// Private key to configure a TLS session.
    pub fn private_key(&self) -> PrivateKeyDer<'static> {
        PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(self.key.to_vec()))
    }

    /// Generates a P-256 key and gets the certificate for it issued by the signer.
    pub async fn issue<S>(signer: &S, common_name: &str) -> Result<Self, IdentityError>
    where
        S: CertificateSigner,
    {
        let key = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256).map_err(IdentityError::Key)?;

        let mut params = CertificateParams::default();
        params
            .distinguished_name
            .push(DnType::CommonName, common_name);

        let csr = params.serialize_request(&key).map_err(|err| {
            error!(error = %err, "couldn't create certificate signing request");

            IdentityError::Key(err)
        })?;

        let certificate = signer.sign(csr.der()).await?;
        let certificate = certificate_to_der(&certificate)?;

        Ok(Self::new(
            vec![CertificateDer::from(certificate)],
            key.serialize_der(),
        ))
    }
}

impl std::fmt::Debug for TlsIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsIdentity")
            .field("chain", &self.chain.len())
            .finish_non_exhaustive()
    }
}

/// Identity of the owner.
#[derive(Debug, Clone)]
pub struct OwnerIdentity {
    id: DeviceId,
    tls: TlsIdentity,
    cas: Vec<CertificateDer<'static>>,
}

impl OwnerIdentity {
    /// Create the identity from the certificate chain.
    ///
    /// The identifier is taken from the first certificate of the chain that is an identity
    /// certificate. The certificate authorities are installed as trust anchors on the owned
    /// devices and are used to verify them.
    pub fn from_chain(
        chain: Vec<CertificateDer<'static>>,
        key: Vec<u8>,
        cas: Vec<CertificateDer<'static>>,
    ) -> Result<Self, IdentityError> {
        let mut errors = Vec::new();
        let mut id = None;

        for cert in &chain {
            match device_id_from_certificate(cert) {
                Ok(found) => {
                    id = Some(found);

                    break;
                }
                Err(err) => errors.push(err),
            }
        }

        let id = id.ok_or(IdentityError::NoIdentity(errors))?;

        Ok(Self {
            id,
            tls: TlsIdentity::new(chain, key),
            cas,
        })
    }

    /// Generates the identity certificate for the owner.
    #[instrument(skip(signer, cas))]
    pub async fn generate<S>(
        signer: &S,
        id: DeviceId,
        cas: Vec<CertificateDer<'static>>,
    ) -> Result<Self, IdentityError>
    where
        S: CertificateSigner,
    {
        let tls = TlsIdentity::issue(signer, &id.to_common_name()).await?;

        let identity = Self::from_chain(tls.chain.clone(), tls.key.to_vec(), cas)?;

        debug!(owner = %identity.id, "owner identity generated");

        Ok(identity)
    }

    /// Identifier of the owner.
    pub fn id(&self) -> DeviceId {
        self.id
    }

    /// Certificate chain and key.
    pub fn tls(&self) -> &TlsIdentity {
        &self.tls
    }

    /// Certificate authorities of the owner.
    pub fn cas(&self) -> &[CertificateDer<'static>] {
        &self.cas
    }

    /// TLS configuration for the sessions with the owned devices.
    ///
    /// Authenticates with the owner identity and verifies the device identity certificate
    /// against the owner certificate authorities.
    pub fn client_config(&self) -> Result<Arc<ClientConfig>, rustls::Error> {
        client_config(&self.tls, &self.cas, true)
    }
}

/// Generates a manufacturer certificate with the given common name.
pub async fn generate_manufacturer_certificate<S>(
    signer: &S,
    common_name: &str,
) -> Result<TlsIdentity, IdentityError>
where
    S: CertificateSigner,
{
    TlsIdentity::issue(signer, common_name).await
}

/// Crypto provider used for the TLS sessions.
pub fn crypto_provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::aws_lc_rs::default_provider())
}

/// Creates the configuration of a TLS session authenticated by the identity.
///
/// The device certificate must be issued by one of the trust anchors, the host name is not
/// checked. With `verify_identity` the certificate must also be a device identity certificate.
pub fn client_config(
    identity: &TlsIdentity,
    trust_anchors: &[CertificateDer<'static>],
    verify_identity: bool,
) -> Result<Arc<ClientConfig>, rustls::Error> {
    let provider = crypto_provider();

    let mut roots = RootCertStore::empty();
    for ca in trust_anchors {
        roots.add(ca.clone())?;
    }

    let verifier = Arc::new(TrustAnchorVerifier {
        roots,
        provider: Arc::clone(&provider),
        verify_identity,
    });

    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .dangerous()
        .with_custom_certificate_verifier(verifier)
        .with_client_auth_cert(identity.chain.clone(), identity.private_key())?;

    Ok(Arc::new(config))
}

/// Verifies the device certificate against the trust anchors, without checking the host name.
#[derive(Debug)]
struct TrustAnchorVerifier {
    roots: RootCertStore,
    provider: Arc<CryptoProvider>,
    verify_identity: bool,
}

impl ServerCertVerifier for TrustAnchorVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let cert = ParsedCertificate::try_from(end_entity)?;

        verify_server_cert_signed_by_trust_anchor(
            &cert,
            &self.roots,
            intermediates,
            now,
            self.provider.signature_verification_algorithms.all,
        )
        .inspect_err(|err| error!(error = %err, "device certificate not trusted"))?;

        if self.verify_identity {
            let device_id = verify_identity_certificate(end_entity).map_err(|err| {
                error!(error = %err, "invalid device identity certificate");

                rustls::Error::InvalidCertificate(CertificateError::ApplicationVerificationFailure)
            })?;

            debug!(%device_id, "device identity verified");
        }

        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rcgen::ExtendedKeyUsagePurpose;

    use crate::signer::{LocalCa, OCF_IDENTITY_EKU};

    use super::*;

    const ID: &str = "9f4c1d9e-6c0e-4b2a-8f53-0b3d2c2f3e11";

    fn self_signed(cn: &str, ekus: Vec<ExtendedKeyUsagePurpose>) -> Vec<u8> {
        let key = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256).unwrap();
        let mut params = CertificateParams::default();
        params.distinguished_name.push(DnType::CommonName, cn);
        params.extended_key_usages = ekus;

        params.self_signed(&key).unwrap().der().to_vec()
    }

    #[test]
    fn identity_requires_ekus() {
        let ocf = ExtendedKeyUsagePurpose::Other(OCF_IDENTITY_EKU.to_vec());

        let client_only = self_signed(
            &format!("uuid:{ID}"),
            vec![ExtendedKeyUsagePurpose::ClientAuth, ocf.clone()],
        );

        assert_eq!(
            device_id_from_certificate(&client_only).unwrap(),
            ID.parse().unwrap()
        );
        assert!(matches!(
            verify_identity_certificate(&client_only),
            Err(IdentityError::MissingServerAuth)
        ));

        let no_ocf = self_signed(
            &format!("uuid:{ID}"),
            vec![
                ExtendedKeyUsagePurpose::ClientAuth,
                ExtendedKeyUsagePurpose::ServerAuth,
            ],
        );

        assert!(matches!(
            verify_identity_certificate(&no_ocf),
            Err(IdentityError::MissingOcfIdentity)
        ));

        let no_eku = self_signed(&format!("uuid:{ID}"), Vec::new());

        assert!(matches!(
            device_id_from_certificate(&no_eku),
            Err(IdentityError::MissingClientAuth)
        ));
    }

    #[test]
    fn identity_common_name() {
        let ekus = vec![
            ExtendedKeyUsagePurpose::ClientAuth,
            ExtendedKeyUsagePurpose::ServerAuth,
            ExtendedKeyUsagePurpose::Other(OCF_IDENTITY_EKU.to_vec()),
        ];

        let upper = self_signed(&format!("UUID:{ID}"), ekus.clone());

        assert_eq!(
            verify_identity_certificate(&upper).unwrap(),
            ID.parse().unwrap()
        );

        let invalid = self_signed("device-1", ekus);

        let err = verify_identity_certificate(&invalid).unwrap_err();
        assert!(matches!(err, IdentityError::CommonName(cn) if cn == "device-1"));

        assert!(matches!(
            verify_identity_certificate(&[0x30, 0x00]),
            Err(IdentityError::Parse)
        ));
    }

    #[tokio::test]
    async fn owner_identity_from_chain() {
        let ca = LocalCa::generate("Owner CA").unwrap();
        let id: DeviceId = ID.parse().unwrap();

        let owner = OwnerIdentity::generate(&ca, id, vec![ca.certificate()])
            .await
            .unwrap();

        assert_eq!(owner.id(), id);
        assert_eq!(owner.cas().len(), 1);
        assert!(owner.client_config().is_ok());

        // The root certificate is skipped
        let chain = vec![ca.certificate(), owner.tls().chain()[0].clone()];
        let from_chain =
            OwnerIdentity::from_chain(chain, owner.tls().key_der().to_vec(), Vec::new()).unwrap();

        assert_eq!(from_chain.id(), id);

        let err = OwnerIdentity::from_chain(vec![ca.certificate()], Vec::new(), Vec::new())
            .unwrap_err();

        assert!(matches!(err, IdentityError::NoIdentity(errors) if errors.len() == 1));
    }

    #[tokio::test]
    async fn manufacturer_certificate() {
        let ca = LocalCa::generate("Manufacturer CA").unwrap();

        let mfg = generate_manufacturer_certificate(&ca, "Onboarding tool")
            .await
            .unwrap();

        assert_eq!(mfg.chain().len(), 1);
        assert!(matches!(
            device_id_from_certificate(&mfg.chain()[0]),
            Err(IdentityError::CommonName(_))
        ));
        assert!(client_config(&mfg, &[ca.certificate()], false).is_ok());
    }
}

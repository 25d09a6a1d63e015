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

//! Manufacturer certificate ownership transfer.
//!
//! The provisioning session is authenticated by the manufacturer certificates: the client
//! presents its manufacturer chain and the device certificate must be issued by the
//! manufacturer certificate authority.

use std::sync::Arc;

use astarte_ocf_protocol::v1::cred::{Credential, CredentialUpdate, Credentials};
use astarte_ocf_protocol::v1::csr::{certificate_to_der, Csr};
use astarte_ocf_protocol::v1::doxm::OwnerTransferMethod;
use astarte_ocf_protocol::v1::links::{Endpoint, TCP_SECURE_SCHEME};
use astarte_ocf_protocol::v1::{DeviceId, CRED_HREF, CSR_HREF};
use rustls::pki_types::CertificateDer;
use rustls::ClientConfig;
use tracing::{debug, error, info, warn};

use crate::coap::{CoapClient, Query};
use crate::error::OnboardError;
use crate::identity::{client_config, TlsIdentity};
use crate::signer::CertificateSigner;
use crate::transport::{Network, Session};

use super::{BoxFuture, OwnershipTransfer};

/// Ownership transfer with the manufacturer certificate.
pub struct ManufacturerOtm<S> {
    tls: Arc<ClientConfig>,
    signer: S,
    cas: Vec<CertificateDer<'static>>,
}

impl<S: CertificateSigner> ManufacturerOtm<S> {
    /// Create the method.
    ///
    /// The client authenticates with the `manufacturer` identity and trusts the devices issued
    /// by the `manufacturer_cas`. The `signer` issues the device identity certificates and the
    /// owner `cas` are installed on the device as trust anchors.
    pub fn new(
        manufacturer: &TlsIdentity,
        manufacturer_cas: &[CertificateDer<'static>],
        signer: S,
        cas: Vec<CertificateDer<'static>>,
    ) -> Result<Self, OnboardError> {
        let tls = client_config(manufacturer, manufacturer_cas, false)?;

        Ok(Self { tls, signer, cas })
    }

    async fn issue_identity<T>(&self, client: &CoapClient<T>) -> Result<Vec<u8>, OnboardError>
    where
        T: Session,
    {
        let csr: Csr = client.get_resource(CSR_HREF).await?;
        let csr = csr.to_der().map_err(OnboardError::Csr)?;

        let certificate = self.signer.sign(&csr).await?;
        let certificate = certificate_to_der(&certificate)?;

        debug!(len = certificate.len(), "identity certificate issued");

        Ok(certificate)
    }

    async fn provision<T>(
        &self,
        client: &CoapClient<T>,
        owner: DeviceId,
        device: DeviceId,
    ) -> Result<(), OnboardError>
    where
        T: Session,
    {
        let certificate = self.issue_identity(client).await?;

        let installed: Credentials = client
            .get_resource_with_query(CRED_HREF, &[Query::credential_subject(&device)])
            .await?;

        // Identity and trust anchors left by a previous owner
        for cred in installed
            .creds
            .iter()
            .filter(|cred| cred.subject == device && cred.is_owner_identity_material())
        {
            let Some(id) = cred.id else {
                warn!(subject = %cred.subject, "credential without id, skipping");

                continue;
            };

            client
                .delete_resource(CRED_HREF, &[Query::credential_id(id)])
                .await?;

            debug!(id, "previous identity credential deleted");
        }

        client
            .update_resource(
                CRED_HREF,
                &CredentialUpdate::single(
                    owner,
                    Credential::identity_certificate(device, certificate),
                ),
            )
            .await?;

        for ca in &self.cas {
            client
                .update_resource(
                    CRED_HREF,
                    &CredentialUpdate::single(owner, Credential::trust_anchor(owner, ca.to_vec())),
                )
                .await?;
        }

        info!(trust_anchors = self.cas.len(), "owner credentials installed");

        Ok(())
    }
}

impl<N, S> OwnershipTransfer<N> for ManufacturerOtm<S>
where
    N: Network,
    S: CertificateSigner,
{
    fn kind(&self) -> OwnerTransferMethod {
        OwnerTransferMethod::ManufacturerCertificate
    }

    fn dial<'a>(
        &'a self,
        network: &'a N,
        endpoint: &'a Endpoint,
    ) -> BoxFuture<'a, Result<N::Session, OnboardError>> {
        Box::pin(async move {
            if endpoint.scheme() != TCP_SECURE_SCHEME {
                error!(url = %endpoint.url, "endpoint scheme not supported");

                return Err(OnboardError::UnsupportedScheme {
                    scheme: endpoint.scheme().to_string(),
                });
            }

            let addr = endpoint
                .socket_addr()
                .ok_or(OnboardError::NoSecureEndpoint)?;

            network
                .dial_tcp_tls(addr, Arc::clone(&self.tls))
                .await
                .map_err(|err| {
                    error!(error = %err, %addr, "couldn't dial with the manufacturer certificate");

                    OnboardError::Dial(err)
                })
        })
    }

    fn provision_owner_credentials<'a>(
        &'a self,
        client: &'a CoapClient<N::Session>,
        owner: DeviceId,
        device: DeviceId,
    ) -> BoxFuture<'a, Result<(), OnboardError>> {
        Box::pin(self.provision(client, owner, device))
    }
}

impl<S> std::fmt::Debug for ManufacturerOtm<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManufacturerOtm")
            .field("cas", &self.cas.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use crate::identity::generate_manufacturer_certificate;
    use crate::mock::MockNetwork;
    use crate::signer::LocalCa;

    use super::*;

    async fn otm() -> ManufacturerOtm<LocalCa> {
        let mfg_ca = LocalCa::generate("Manufacturer CA").unwrap();
        let mfg = generate_manufacturer_certificate(&mfg_ca, "Onboarding tool")
            .await
            .unwrap();

        let owner_ca = LocalCa::generate("Owner CA").unwrap();
        let cas = vec![owner_ca.certificate()];

        ManufacturerOtm::new(&mfg, &[mfg_ca.certificate()], owner_ca, cas).unwrap()
    }

    #[tokio::test]
    async fn dial_requires_tls_over_tcp() {
        let otm = otm().await;
        let network = MockNetwork::new();

        let addr: SocketAddr = "10.0.0.1:5683".parse().unwrap();
        let endpoint = Endpoint::from_socket_addr("coap", addr).unwrap();

        let err = OwnershipTransfer::<MockNetwork>::dial(&otm, &network, &endpoint)
            .await
            .err()
            .unwrap();

        assert!(matches!(err, OnboardError::UnsupportedScheme { scheme } if scheme == "coap"));
    }

    #[tokio::test]
    async fn dial_requires_address() {
        let otm = otm().await;
        let network = MockNetwork::new();

        let endpoint = Endpoint {
            url: "coaps+tcp://device.local:5684".parse().unwrap(),
            priority: None,
        };

        let err = OwnershipTransfer::<MockNetwork>::dial(&otm, &network, &endpoint)
            .await
            .err()
            .unwrap();

        assert!(matches!(err, OnboardError::NoSecureEndpoint));
    }

    #[tokio::test]
    async fn dial_unreachable_device() {
        let otm = otm().await;
        let network = MockNetwork::new();

        let addr: SocketAddr = "10.0.0.1:5684".parse().unwrap();
        let endpoint = Endpoint::from_socket_addr(TCP_SECURE_SCHEME, addr).unwrap();

        let err = OwnershipTransfer::<MockNetwork>::dial(&otm, &network, &endpoint)
            .await
            .err()
            .unwrap();

        assert!(matches!(err, OnboardError::Dial(_)));
    }
}

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

//! Client to read and write the resources of a device over a session.

use std::fmt::Display;
use std::net::SocketAddr;
use std::time::Duration;

use astarte_ocf_protocol::error::ErrorKind;
use astarte_ocf_protocol::utils::{decode, encode};
use astarte_ocf_protocol::v1::links::{DeviceLinks, ResourceLink};
use astarte_ocf_protocol::v1::{ContentFormat, DeviceId, RESOURCE_DIRECTORY_HREF};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, error, trace};

use crate::error::OnboardError;
use crate::transport::{Request, Response, Session};

/// Query option of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query(String);

impl Query {
    /// Select the credential by id.
    pub fn credential_id(id: u64) -> Self {
        Self(format!("credid={id}"))
    }

    /// Select the credentials of the subject.
    pub fn credential_subject(subject: &DeviceId) -> Self {
        Self(format!("subjectuuid={subject}"))
    }

    /// Filter by resource type.
    pub fn resource_type(rt: &str) -> Self {
        Self(format!("rt={rt}"))
    }

    /// Select the interface.
    pub fn interface(interface: &str) -> Self {
        Self(format!("if={interface}"))
    }

    /// Filter the devices by ownership status.
    pub fn owned(owned: bool) -> Self {
        let value = if owned { "TRUE" } else { "FALSE" };

        Self(format!("owned={value}"))
    }
}

impl Display for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reads and writes the resources of a device.
///
/// Every round trip is bounded by the request timeout. The session is closed on drop.
#[derive(Debug)]
pub struct CoapClient<S: Session> {
    session: S,
    scheme: &'static str,
    timeout: Duration,
}

impl<S: Session> CoapClient<S> {
    /// Wraps the session dialed with the scheme.
    pub fn new(session: S, scheme: &'static str, timeout: Duration) -> Self {
        Self {
            session,
            scheme,
            timeout,
        }
    }

    /// Address of the device.
    pub fn remote_addr(&self) -> SocketAddr {
        self.session.remote_addr()
    }

    /// Scheme of the session.
    pub fn scheme(&self) -> &'static str {
        self.scheme
    }

    /// Sends the request, without checking the response code.
    pub async fn exchange(&self, request: Request) -> Result<Response, OnboardError> {
        trace!(method = %request.method, href = request.href, "sending request");

        let response = tokio::time::timeout(self.timeout, self.session.send(request))
            .await
            .map_err(|_| {
                error!(timeout = ?self.timeout, "request timed out");

                OnboardError::Timeout
            })??;

        trace!(code = %response.code, "response received");

        Ok(response)
    }

    async fn send(&self, request: Request) -> Result<Response, OnboardError> {
        let method = request.method;
        let href = request.href.clone();

        let response = self.exchange(request).await?;

        if !response.code.is_success() {
            error!(%method, href, code = %response.code, "request failed");

            return Err(OnboardError::Protocol(astarte_ocf_protocol::Error::new(
                ErrorKind::ErrorResponse,
                "error response code",
            )));
        }

        Ok(response)
    }

    /// Reads the resource.
    pub async fn get_resource<T>(&self, href: &str) -> Result<T, OnboardError>
    where
        T: DeserializeOwned,
    {
        self.get_resource_with_query(href, &[]).await
    }

    /// Reads the resource with the query options.
    pub async fn get_resource_with_query<T>(
        &self,
        href: &str,
        queries: &[Query],
    ) -> Result<T, OnboardError>
    where
        T: DeserializeOwned,
    {
        let request = queries.iter().fold(
            Request::get(href).with_accept(ContentFormat::AppOcfCbor),
            |req, q| req.with_query(q),
        );

        let response = self.send(request).await?;

        let value = decode(&response.payload, "resource payload")?;

        debug!(href, "resource read");

        Ok(value)
    }

    /// Updates the resource, the response payload is ignored.
    pub async fn update_resource<T>(&self, href: &str, value: &T) -> Result<(), OnboardError>
    where
        T: Serialize,
    {
        let payload = encode(value, "resource payload")?;

        self.send(Request::post(href, payload)).await?;

        debug!(href, "resource updated");

        Ok(())
    }

    /// Deletes the resource, or the part selected by the query options.
    pub async fn delete_resource(&self, href: &str, queries: &[Query]) -> Result<(), OnboardError> {
        let request = queries
            .iter()
            .fold(Request::delete(href), |req, q| req.with_query(q));

        self.send(request).await?;

        debug!(href, "resource deleted");

        Ok(())
    }

    /// Reads the links of the device from the resource directory.
    ///
    /// The endpoints are patched with the address of the session, links without endpoints are
    /// dropped.
    pub async fn device_links(&self, device_id: &DeviceId) -> Result<DeviceLinks, OnboardError> {
        let links: Vec<ResourceLink> = self.get_resource(RESOURCE_DIRECTORY_HREF).await?;

        let device = DeviceLinks::group(links)
            .into_iter()
            .find(|device| device.device_id == *device_id)
            .ok_or(OnboardError::DeviceNotFound)?;

        Ok(device.patch_endpoints(self.scheme, self.remote_addr()))
    }

    /// Checks if the device is a legacy implementation.
    ///
    /// Legacy implementations answer with `application/cbor` instead of the OCF content format.
    pub async fn is_legacy_implementation(&self) -> Result<bool, OnboardError> {
        let request = Request::get(RESOURCE_DIRECTORY_HREF).with_accept(ContentFormat::AppOcfCbor);

        let response = self.send(request).await?;

        let format = response
            .content_format
            .ok_or(OnboardError::UnknownContentFormat(None))?;

        match ContentFormat::try_from(format) {
            Ok(ContentFormat::AppCbor) => Ok(true),
            Ok(ContentFormat::AppOcfCbor) => Ok(false),
            Err(_) => {
                error!(format, "unknown content format");

                Err(OnboardError::UnknownContentFormat(Some(format)))
            }
        }
    }

    /// Closes the session, further requests fail.
    pub fn close(&self) {
        self.session.close();
    }
}

impl<S: Session> Drop for CoapClient<S> {
    fn drop(&mut self) {
        self.session.close();
    }
}

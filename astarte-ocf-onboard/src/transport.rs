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

//! Transport the CoAP messages are exchanged with.
//!
//! The codec and the sockets are provided by the implementor of [`Network`].

use std::fmt::Display;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use astarte_ocf_protocol::v1::ContentFormat;
use tokio::sync::mpsc;

/// Method of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// Read a resource.
    Get,
    /// Update a resource.
    Post,
    /// Delete a resource, or part of it.
    Delete,
}

impl Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Method::Get => write!(f, "GET"),
            Method::Post => write!(f, "POST"),
            Method::Delete => write!(f, "DELETE"),
        }
    }
}

/// Response code, `class.detail`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Code(u8);

impl Code {
    /// 2.01 Created
    pub const CREATED: Self = Self::new(2, 1);
    /// 2.02 Deleted
    pub const DELETED: Self = Self::new(2, 2);
    /// 2.03 Valid
    pub const VALID: Self = Self::new(2, 3);
    /// 2.04 Changed
    pub const CHANGED: Self = Self::new(2, 4);
    /// 2.05 Content
    pub const CONTENT: Self = Self::new(2, 5);
    /// 4.00 Bad Request
    pub const BAD_REQUEST: Self = Self::new(4, 0);
    /// 4.01 Unauthorized
    pub const UNAUTHORIZED: Self = Self::new(4, 1);
    /// 4.03 Forbidden
    pub const FORBIDDEN: Self = Self::new(4, 3);
    /// 4.04 Not Found
    pub const NOT_FOUND: Self = Self::new(4, 4);
    /// 4.05 Method Not Allowed
    pub const METHOD_NOT_ALLOWED: Self = Self::new(4, 5);
    /// 5.00 Internal Server Error
    pub const INTERNAL_SERVER_ERROR: Self = Self::new(5, 0);
    /// 5.03 Service Unavailable
    pub const SERVICE_UNAVAILABLE: Self = Self::new(5, 3);

    /// Create the code from the class and detail.
    pub const fn new(class: u8, detail: u8) -> Self {
        Self((class << 5) | (detail & 0x1f))
    }

    /// Create the code from the byte on the wire.
    pub const fn from_raw(raw: u8) -> Self {
        Self(raw)
    }

    /// Class of the code.
    pub fn class(&self) -> u8 {
        self.0 >> 5
    }

    /// Detail of the code.
    pub fn detail(&self) -> u8 {
        self.0 & 0x1f
    }

    /// Returns true for the 2.xx codes.
    pub fn is_success(&self) -> bool {
        self.class() == 2
    }
}

impl Display for Code {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{:02}", self.class(), self.detail())
    }
}

/// Request sent to a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Method of the request.
    pub method: Method,
    /// Path of the resource.
    pub href: String,
    /// Query options, `key=value`.
    pub queries: Vec<String>,
    /// Accepted content format.
    pub accept: Option<ContentFormat>,
    /// Format of the payload.
    pub content_format: Option<ContentFormat>,
    /// Payload.
    pub payload: Vec<u8>,
}

impl Request {
    fn new(method: Method, href: &str) -> Self {
        Self {
            method,
            href: href.to_string(),
            queries: Vec::new(),
            accept: None,
            content_format: None,
            payload: Vec::new(),
        }
    }

    /// Read the resource.
    pub fn get(href: &str) -> Self {
        Self::new(Method::Get, href)
    }

    /// Update the resource with the CBOR payload.
    pub fn post(href: &str, payload: Vec<u8>) -> Self {
        Self {
            content_format: Some(ContentFormat::AppOcfCbor),
            payload,
            ..Self::new(Method::Post, href)
        }
    }

    /// Delete the resource.
    pub fn delete(href: &str) -> Self {
        Self::new(Method::Delete, href)
    }

    /// Adds a query option.
    pub fn with_query(mut self, query: impl Display) -> Self {
        self.queries.push(query.to_string());

        self
    }

    /// Sets the accepted content format.
    pub fn with_accept(mut self, accept: ContentFormat) -> Self {
        self.accept = Some(accept);

        self
    }

    /// Returns the value of the query option.
    pub fn query(&self, key: &str) -> Option<&str> {
        self.queries.iter().find_map(|q| {
            q.split_once('=')
                .and_then(|(k, v)| (k == key).then_some(v))
        })
    }
}

/// Response from a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Response code.
    pub code: Code,
    /// Content format of the payload, as sent by the device.
    pub content_format: Option<u16>,
    /// Payload.
    pub payload: Vec<u8>,
}

/// Reply to a multicast request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Address the reply was received from.
    pub peer: SocketAddr,
    /// The response.
    pub response: Response,
}

/// Error of the transport.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum TransportError {
    /// Socket error.
    #[error("couldn't complete io operation")]
    Io(#[from] std::io::Error),
    /// The session was closed.
    #[error("session closed")]
    Closed,
    /// No device listens on the address.
    #[error("address {0} unreachable")]
    Unreachable(SocketAddr),
    /// The TLS handshake failed.
    #[error("tls handshake failed")]
    Handshake(#[source] rustls::Error),
}

/// Session with a single device.
pub trait Session: Send + Sync + 'static {
    /// Sends the request and waits for the response.
    fn send(&self, request: Request)
        -> impl Future<Output = Result<Response, TransportError>> + Send;

    /// Address of the device.
    fn remote_addr(&self) -> SocketAddr;

    /// Closes the session, further requests fail.
    ///
    /// Must be idempotent.
    fn close(&self);
}

/// Endpoint of a multicast group.
pub trait MulticastEndpoint: Send + Sync + 'static {
    /// Publishes the request to the group and forwards every reply to the channel.
    ///
    /// Returns once no more replies can be received or the channel is closed.
    fn publish(
        &self,
        request: Request,
        replies: mpsc::Sender<Reply>,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// Network to dial the devices.
pub trait Network: Send + Sync + 'static {
    /// Session with a device.
    type Session: Session;
    /// Multicast group endpoint.
    type Multicast: MulticastEndpoint;

    /// Dial an unsecured CoAP over UDP session.
    fn dial_udp(
        &self,
        addr: SocketAddr,
    ) -> impl Future<Output = Result<Self::Session, TransportError>> + Send;

    /// Dial a CoAP over TLS session.
    ///
    /// The configuration carries the client certificate and the verifier of the device
    /// certificate.
    fn dial_tcp_tls(
        &self,
        addr: SocketAddr,
        tls: Arc<rustls::ClientConfig>,
    ) -> impl Future<Output = Result<Self::Session, TransportError>> + Send;

    /// Joins the multicast group.
    fn dial_multicast(
        &self,
        group: SocketAddr,
    ) -> impl Future<Output = Result<Self::Multicast, TransportError>> + Send;
}

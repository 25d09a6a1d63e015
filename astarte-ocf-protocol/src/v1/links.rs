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

//! Resource links listed by the resource directory `/oic/res`.

use std::net::{IpAddr, SocketAddr};

use serde::{Deserialize, Serialize};
use url::{Host, Url};

use super::DeviceId;

/// CoAP over UDP.
pub const UDP_SCHEME: &str = "coap";
/// CoAP over DTLS.
pub const UDP_SECURE_SCHEME: &str = "coaps";
/// CoAP over TCP.
pub const TCP_SCHEME: &str = "coap+tcp";
/// CoAP over TLS.
pub const TCP_SECURE_SCHEME: &str = "coaps+tcp";

/// Prefix of the anchor of a link.
pub const ANCHOR_PREFIX: &str = "ocf://";

/// Endpoint a resource is reachable at.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    /// Address of the endpoint, `coaps+tcp://[fe80::1]:5684`.
    #[serde(rename = "ep")]
    pub url: Url,
    /// Priority, lower is preferred.
    #[serde(rename = "pri", default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u16>,
}

impl Endpoint {
    /// Create an endpoint for the socket address.
    pub fn from_socket_addr(scheme: &str, addr: SocketAddr) -> Option<Self> {
        let url = Url::parse(&format!("{scheme}://{addr}")).ok()?;

        Some(Self {
            url,
            priority: None,
        })
    }

    /// Scheme of the endpoint.
    pub fn scheme(&self) -> &str {
        self.url.scheme()
    }

    /// Returns the socket address for an IP endpoint with a port.
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        let ip = match self.url.host()? {
            Host::Ipv4(ip) => IpAddr::V4(ip),
            Host::Ipv6(ip) => IpAddr::V6(ip),
            // Hosts of non special schemes are opaque
            Host::Domain(domain) => domain.parse().ok()?,
        };

        Some(SocketAddr::new(ip, self.url.port()?))
    }
}

/// Policy of a link.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    /// Bitmask: discoverable `1`, observable `2`.
    #[serde(rename = "bm", default)]
    pub bitmask: u8,
}

/// Link to a resource hosted by a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLink {
    /// Path of the resource.
    pub href: String,
    /// Anchor, `ocf://<device id>`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub anchor: String,
    /// Identifier of the device hosting the resource.
    #[serde(rename = "di", default)]
    pub device_id: DeviceId,
    /// Resource types.
    #[serde(rename = "rt", default)]
    pub resource_types: Vec<String>,
    /// Interfaces.
    #[serde(rename = "if", default)]
    pub interfaces: Vec<String>,
    /// Policy.
    #[serde(rename = "p", default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<Policy>,
    /// Endpoints the resource is reachable at.
    #[serde(rename = "eps", default)]
    pub endpoints: Vec<Endpoint>,
}

impl ResourceLink {
    /// Identifier of the device, from `di` or from the anchor.
    pub fn device(&self) -> DeviceId {
        if !self.device_id.is_nil() {
            return self.device_id;
        }

        self.anchor
            .strip_prefix(ANCHOR_PREFIX)
            .and_then(|id| id.parse().ok())
            .unwrap_or_default()
    }

    /// Returns true if the link has the resource type.
    pub fn has_type(&self, resource_type: &str) -> bool {
        self.resource_types.iter().any(|rt| rt == resource_type)
    }

    /// Returns the first endpoint with the scheme.
    pub fn endpoint(&self, scheme: &str) -> Option<&Endpoint> {
        self.endpoints.iter().find(|ep| ep.scheme() == scheme)
    }

    /// Returns the CoAP over TLS endpoint.
    pub fn tcp_secure_address(&self) -> Option<&Endpoint> {
        self.endpoint(TCP_SECURE_SCHEME)
    }

    /// Rewrites the hosts of the endpoints with the address the device was observed at.
    ///
    /// Devices often advertise addresses not reachable from the client, the port and the
    /// scheme are kept. A link with no endpoints gets one for the peer with the given scheme.
    pub fn patch_endpoint(mut self, scheme: &str, peer: SocketAddr) -> Self {
        if self.endpoints.is_empty() {
            self.endpoints
                .extend(Endpoint::from_socket_addr(scheme, peer));

            return self;
        }

        for ep in &mut self.endpoints {
            // Fails only for urls without a host
            let _ = ep.url.set_ip_host(peer.ip());
        }

        self
    }
}

/// Links of a single device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceLinks {
    /// Identifier of the device.
    pub device_id: DeviceId,
    /// Links to the device resources.
    pub links: Vec<ResourceLink>,
}

impl DeviceLinks {
    /// Groups the links by device, keeping the order the devices first appear in.
    pub fn group(links: Vec<ResourceLink>) -> Vec<DeviceLinks> {
        let mut devices: Vec<DeviceLinks> = Vec::new();

        for link in links {
            let device_id = link.device();

            match devices.iter_mut().find(|d| d.device_id == device_id) {
                Some(device) => device.links.push(link),
                None => devices.push(DeviceLinks {
                    device_id,
                    links: vec![link],
                }),
            }
        }

        devices
    }

    /// Returns the first CoAP over TLS endpoint of the device.
    pub fn tcp_secure_address(&self) -> Option<&Endpoint> {
        self.links.iter().find_map(ResourceLink::tcp_secure_address)
    }

    /// Patches every link with the peer address, dropping the links with no endpoints.
    pub fn patch_endpoints(self, scheme: &str, peer: SocketAddr) -> Self {
        let links = self
            .links
            .into_iter()
            .map(|link| link.patch_endpoint(scheme, peer))
            .filter(|link| !link.endpoints.is_empty())
            .collect();

        Self {
            device_id: self.device_id,
            links,
        }
    }
}

#[cfg(test)]
mod tests {
    use ciborium::Value;
    use pretty_assertions::assert_eq;

    use crate::tests::{from_cbor, to_cbor};

    use super::*;

    const DEVICE: &str = "9f4c1d9e-6c0e-4b2a-8f53-0b3d2c2f3e11";

    fn link(href: &str, eps: &[&str]) -> ResourceLink {
        ResourceLink {
            href: href.to_string(),
            anchor: format!("ocf://{DEVICE}"),
            device_id: DeviceId::nil(),
            resource_types: vec!["oic.wk.d".to_string()],
            interfaces: vec!["oic.if.baseline".to_string()],
            policy: Some(Policy { bitmask: 3 }),
            endpoints: eps
                .iter()
                .map(|ep| Endpoint {
                    url: Url::parse(ep).unwrap(),
                    priority: None,
                })
                .collect(),
        }
    }

    #[test]
    fn decode_link() {
        let value = Value::Map(vec![
            (Value::Text("href".into()), Value::Text("/oic/d".into())),
            (
                Value::Text("anchor".into()),
                Value::Text(format!("ocf://{DEVICE}")),
            ),
            (
                Value::Text("rt".into()),
                Value::Array(vec![Value::Text("oic.wk.d".into())]),
            ),
            (
                Value::Text("if".into()),
                Value::Array(vec![Value::Text("oic.if.baseline".into())]),
            ),
            (
                Value::Text("p".into()),
                Value::Map(vec![(Value::Text("bm".into()), Value::Integer(3.into()))]),
            ),
            (
                Value::Text("eps".into()),
                Value::Array(vec![
                    Value::Map(vec![(
                        Value::Text("ep".into()),
                        Value::Text("coap://[fe80::1]:5683".into()),
                    )]),
                    Value::Map(vec![
                        (
                            Value::Text("ep".into()),
                            Value::Text("coaps+tcp://[fe80::1]:45111".into()),
                        ),
                        (Value::Text("pri".into()), Value::Integer(2.into())),
                    ]),
                ]),
            ),
        ]);

        let link: ResourceLink = from_cbor(&to_cbor(&value));

        assert_eq!(link.device(), DEVICE.parse().unwrap());
        assert!(link.has_type("oic.wk.d"));

        let ep = link.tcp_secure_address().unwrap();
        assert_eq!(ep.priority, Some(2));
        assert_eq!(
            ep.socket_addr(),
            Some("[fe80::1]:45111".parse().unwrap())
        );
    }

    #[test]
    fn patch_endpoint_keeps_scheme_and_port() {
        let peer: SocketAddr = "192.168.1.20:5683".parse().unwrap();

        let patched = link(
            "/oic/d",
            &["coap://10.0.0.1:5683", "coaps+tcp://10.0.0.1:40000"],
        )
        .patch_endpoint(UDP_SCHEME, peer);

        let eps: Vec<String> = patched.endpoints.iter().map(|e| e.url.to_string()).collect();

        assert_eq!(
            eps,
            ["coap://192.168.1.20:5683", "coaps+tcp://192.168.1.20:40000"]
        );
        assert_eq!(
            patched.tcp_secure_address().unwrap().socket_addr(),
            Some("192.168.1.20:40000".parse().unwrap())
        );
    }

    #[test]
    fn patch_endpoint_adds_peer() {
        let peer: SocketAddr = "[fe80::2]:5683".parse().unwrap();

        let patched = link("/oic/d", &[]).patch_endpoint(UDP_SCHEME, peer);

        assert_eq!(patched.endpoints.len(), 1);
        assert_eq!(patched.endpoints[0].url.as_str(), "coap://[fe80::2]:5683");
    }

    #[test]
    fn group_by_device() {
        let other = DeviceId::new_v4();
        let mut foreign = link("/light", &["coap://10.0.0.2:5683"]);
        foreign.anchor = format!("ocf://{other}");

        let devices = DeviceLinks::group(vec![
            link("/oic/d", &["coap://10.0.0.1:5683"]),
            foreign,
            link("/oic/p", &["coaps+tcp://10.0.0.1:4000"]),
        ]);

        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].device_id, DEVICE.parse().unwrap());
        assert_eq!(devices[0].links.len(), 2);
        assert_eq!(devices[1].device_id, other);
        assert!(devices[0].tcp_secure_address().is_some());
        assert!(devices[1].tcp_secure_address().is_none());
    }
}

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

//! Configuration of the onboarding client.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Port of the CoAP discovery.
pub const DISCOVERY_PORT: u16 = 5683;
/// All CoAP nodes, IPv4.
pub const DISCOVERY_ADDRESS_V4: Ipv4Addr = Ipv4Addr::new(224, 0, 1, 187);
/// All CoAP nodes, IPv6 link-local, realm-local and site-local scopes.
pub const DISCOVERY_ADDRESSES_V6: [Ipv6Addr; 3] = [
    Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 0x158),
    Ipv6Addr::new(0xff03, 0, 0, 0, 0, 0, 0, 0x158),
    Ipv6Addr::new(0xff05, 0, 0, 0, 0, 0, 0, 0x158),
];

const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(2);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Multicast groups the discovery is sent to.
pub fn default_discovery_addresses() -> Vec<SocketAddr> {
    let v4 = SocketAddr::V4(SocketAddrV4::new(DISCOVERY_ADDRESS_V4, DISCOVERY_PORT));
    let v6 = DISCOVERY_ADDRESSES_V6
        .into_iter()
        .map(|ip| SocketAddr::V6(SocketAddrV6::new(ip, DISCOVERY_PORT, 0, 0)));

    std::iter::once(v4).chain(v6).collect()
}

/// Configuration of the [`Client`](crate::Client).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Window the discovery waits for replies.
    pub discovery_timeout: Duration,
    /// Timeout of a single request to a device.
    pub request_timeout: Duration,
    /// Multicast groups the discovery is sent to.
    pub discovery_addresses: Vec<SocketAddr>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            discovery_addresses: default_discovery_addresses(),
        }
    }
}

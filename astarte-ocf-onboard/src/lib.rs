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

//! Onboarding tool for OCF devices.
//!
//! Discovers unowned devices, transfers their ownership to the owner identity and provisions
//! the owner credentials and access control list, until the device is ready for normal
//! operation.

pub mod cache;
pub mod client;
pub mod coap;
pub mod config;
pub mod device;
pub mod discovery;
pub mod error;
pub mod identity;
pub mod otm;
pub mod provision;
pub mod signer;
pub mod transport;

mod disown;
mod own;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use astarte_ocf_protocol;
pub use rustls;
pub use url;

pub use self::client::Client;
pub use self::config::Config;
pub use self::disown::DisownOutcome;
pub use self::error::{Error, OnboardError, Step};
pub use self::own::{OwnOptions, OwnOutcome};

#[cfg(test)]
pub(crate) mod tests {
    use std::net::{IpAddr, SocketAddr};
    use std::sync::Arc;
    use std::time::Duration;

    use astarte_ocf_protocol::v1::DeviceId;

    use crate::config::{DISCOVERY_ADDRESS_V4, DISCOVERY_PORT};
    use crate::identity::{generate_manufacturer_certificate, OwnerIdentity};
    use crate::mock::{MockDevice, MockNetwork};
    use crate::otm::manufacturer::ManufacturerOtm;
    use crate::otm::OtmRegistry;
    use crate::signer::LocalCa;
    use crate::{Client, Config};

    /// IPv4 group the mock devices join by default.
    pub(crate) fn v4_group() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(DISCOVERY_ADDRESS_V4), DISCOVERY_PORT)
    }

    /// Client with the manufacturer certificate method over a mock network.
    pub(crate) struct Fixture {
        pub(crate) network: Arc<MockNetwork>,
        pub(crate) client: Client<MockNetwork>,
        pub(crate) manufacturer_ca: LocalCa,
    }

    impl Fixture {
        pub(crate) async fn new() -> Self {
            Self::with_config(Config {
                discovery_timeout: Duration::from_millis(200),
                request_timeout: Duration::from_secs(1),
                discovery_addresses: vec![v4_group()],
            })
            .await
        }

        pub(crate) async fn with_config(config: Config) -> Self {
            let manufacturer_ca = LocalCa::generate("Manufacturer CA").unwrap();
            let owner_ca = LocalCa::generate("Owner CA").unwrap();

            let identity = OwnerIdentity::generate(
                &owner_ca,
                DeviceId::new_v4(),
                vec![owner_ca.certificate()],
            )
            .await
            .unwrap();

            let client_certificate = generate_manufacturer_certificate(&manufacturer_ca, "Client")
                .await
                .unwrap();
            let cas = vec![owner_ca.certificate()];
            let otm = ManufacturerOtm::new(
                &client_certificate,
                &[manufacturer_ca.certificate()],
                owner_ca,
                cas,
            )
            .unwrap();

            let network = Arc::new(MockNetwork::new());
            let client = Client::new(
                Arc::clone(&network),
                config,
                identity,
                OtmRegistry::new().with(otm),
            )
            .unwrap();

            Self {
                network,
                client,
                manufacturer_ca,
            }
        }

        /// Adds an unowned device with a certificate of the manufacturer.
        pub(crate) async fn add_device(&self) -> Arc<MockDevice> {
            let certificate = generate_manufacturer_certificate(&self.manufacturer_ca, "Device")
                .await
                .unwrap();

            self.network
                .add_device(DeviceId::new_v4(), certificate)
                .unwrap()
        }
    }
}

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

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use astarte_ocf_onboard::astarte_ocf_protocol::v1::DeviceId;
use astarte_ocf_onboard::identity::{generate_manufacturer_certificate, OwnerIdentity};
use astarte_ocf_onboard::mock::{MockDevice, MockNetwork};
use astarte_ocf_onboard::otm::manufacturer::ManufacturerOtm;
use astarte_ocf_onboard::otm::OtmRegistry;
use astarte_ocf_onboard::signer::LocalCa;
use astarte_ocf_onboard::{Client, Config, OwnOptions};
use clap::{Parser, Subcommand};
use eyre::{ensure, eyre};
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use uuid::Uuid;

#[derive(Debug, Parser)]
struct Cli {
    /// Number of simulated devices
    #[arg(long, default_value_t = 1)]
    devices: usize,

    /// Simulate legacy implementations
    #[arg(long)]
    legacy: bool,

    /// Window the discovery waits for replies, in milliseconds
    #[arg(long, default_value_t = 500)]
    discovery_timeout_ms: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Lists the devices on the network
    Discover,
    /// Owns the first device
    Own {
        /// Identifier assigned to the device once owned
        #[arg(long)]
        new_device_id: Option<Uuid>,
    },
    /// Owns and disowns every device
    Cycle,
}

struct Setup {
    client: Client<MockNetwork>,
    devices: Vec<Arc<MockDevice>>,
}

async fn setup(cli: &Cli) -> eyre::Result<Setup> {
    let manufacturer_ca = LocalCa::generate("Manufacturer CA")?;
    let owner_ca = LocalCa::generate("Owner CA")?;

    let network = Arc::new(MockNetwork::new());

    let mut devices = Vec::with_capacity(cli.devices);
    for _ in 0..cli.devices {
        let device_id = DeviceId::new_v4();
        let certificate = generate_manufacturer_certificate(&manufacturer_ca, "Device").await?;

        let device = network.add_device(device_id, certificate)?;
        device.set_legacy(cli.legacy);

        info!(%device_id, addr = %device.udp_addr(), "device added");

        devices.push(device);
    }

    let identity = OwnerIdentity::generate(
        &owner_ca,
        DeviceId::new_v4(),
        vec![owner_ca.certificate()],
    )
    .await?;

    let client_certificate = generate_manufacturer_certificate(&manufacturer_ca, "Client").await?;
    let cas = vec![owner_ca.certificate()];
    let otm = ManufacturerOtm::new(
        &client_certificate,
        &[manufacturer_ca.certificate()],
        owner_ca,
        cas,
    )?;

    let config = Config {
        discovery_timeout: Duration::from_millis(cli.discovery_timeout_ms),
        ..Config::default()
    };

    let client = Client::new(network, config, identity, OtmRegistry::new().with(otm))?;

    info!(owner = %client.owner_id(), "client created");

    Ok(Setup { client, devices })
}

impl Command {
    async fn run(self, setup: &Setup) -> eyre::Result<()> {
        let client = &setup.client;

        match self {
            Command::Discover => {
                client
                    .discover_devices(|device| {
                        info!(
                            device_id = %device.device_id,
                            peer = %device.peer,
                            links = device.links.links.len(),
                            "device discovered"
                        );

                        ControlFlow::Continue(())
                    })
                    .await?;
            }
            Command::Own { new_device_id } => {
                let device = setup
                    .devices
                    .first()
                    .ok_or_else(|| eyre!("no simulated device"))?;

                let options = OwnOptions {
                    new_device_id: new_device_id.map(DeviceId::from),
                };

                let outcome = client
                    .own_device_with(device.device_id(), options)
                    .await?;

                info!(?outcome, doxm = ?device.doxm(), "device owned");
            }
            Command::Cycle => {
                for device in &setup.devices {
                    let device_id = device.device_id();

                    let outcome = client.own_device(device_id).await?;
                    info!(%device_id, ?outcome, "device owned");

                    ensure!(
                        device.doxm().is_owned_by(&client.owner_id()),
                        "device {device_id} not owned"
                    );

                    let outcome = client.disown_device(device_id).await?;
                    info!(%device_id, ?outcome, "device disowned");

                    ensure!(!device.doxm().owned, "device {device_id} still owned");
                }
            }
        }

        Ok(())
    }
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let cli = Cli::parse();

    color_eyre::install()?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive("info".parse()?)
                .from_env_lossy(),
        )
        .try_init()?;

    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .map_err(|_| eyre!("couldn't install crypto provider"))?;

    let setup = setup(&cli).await?;

    cli.command.clone().run(&setup).await?;

    setup.client.close();

    Ok(())
}

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

//! Multicast discovery of the devices.

use std::net::SocketAddr;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use astarte_ocf_protocol::utils::decode;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, trace, warn};

use crate::error::OnboardError;
use crate::transport::{MulticastEndpoint, Network, Reply, Request, TransportError};

/// Buffered replies before the endpoints wait for the handler.
const REPLY_BUFFER: usize = 32;

/// Record received from a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discovered<T> {
    /// Address the reply was received from.
    pub peer: SocketAddr,
    /// Decoded payload.
    pub record: T,
}

/// Sends the discovery requests to the multicast groups.
pub struct Locator<N> {
    network: Arc<N>,
    addresses: Vec<SocketAddr>,
}

impl<N: Network> Locator<N> {
    /// Create the locator for the multicast groups.
    pub fn new(network: Arc<N>, addresses: Vec<SocketAddr>) -> Self {
        Self { network, addresses }
    }

    /// Multicast groups the requests are sent to.
    pub fn addresses(&self) -> &[SocketAddr] {
        &self.addresses
    }

    /// Publishes the request to every group and passes the replies to the handler.
    ///
    /// The groups are queried concurrently for at most the window. When the handler breaks,
    /// the outstanding queries are cancelled and the handler is not called anymore. Replies
    /// with an error code or an invalid payload are skipped.
    ///
    /// If the handler didn't break, the first error of a group is returned.
    pub async fn discover<T, F>(
        &self,
        request: Request,
        window: Duration,
        mut handler: F,
    ) -> Result<(), OnboardError>
    where
        T: DeserializeOwned + Send,
        F: FnMut(Discovered<T>) -> ControlFlow<()> + Send,
    {
        let (tx, mut rx) = mpsc::channel::<Reply>(REPLY_BUFFER);

        // Dropping the set aborts the queries still running
        let mut queries = JoinSet::new();

        for group in self.addresses.iter().copied() {
            let network = Arc::clone(&self.network);
            let request = request.clone();
            let tx = tx.clone();

            queries.spawn(async move {
                let endpoint = network.dial_multicast(group).await.map_err(|err| {
                    warn!(error = %err, %group, "couldn't join the multicast group");

                    err
                })?;

                endpoint.publish(request, tx).await.map_err(|err| {
                    warn!(error = %err, %group, "multicast query failed");

                    err
                })
            });
        }

        drop(tx);

        let deadline = tokio::time::sleep(window);
        tokio::pin!(deadline);

        let mut first_error: Option<TransportError> = None;
        let mut open = true;

        loop {
            if !open && queries.is_empty() {
                debug!("every group answered");

                break;
            }

            tokio::select! {
                _ = &mut deadline => {
                    debug!(?window, "discovery window expired");

                    break;
                }
                reply = rx.recv(), if open => {
                    let Some(reply) = reply else {
                        open = false;

                        continue;
                    };

                    if !reply.response.code.is_success() {
                        trace!(peer = %reply.peer, code = %reply.response.code, "error reply skipped");

                        continue;
                    }

                    let Ok(record) = decode::<T>(&reply.response.payload, "discovery reply") else {
                        warn!(peer = %reply.peer, "invalid discovery reply skipped");

                        continue;
                    };

                    let discovered = Discovered {
                        peer: reply.peer,
                        record,
                    };

                    if handler(discovered).is_break() {
                        debug!("discovery stopped by the handler");

                        return Ok(());
                    }
                }
                Some(res) = queries.join_next() => {
                    match res {
                        Ok(Ok(())) => {}
                        Ok(Err(err)) => {
                            first_error.get_or_insert(err);
                        }
                        Err(err) => {
                            warn!(error = %err, "multicast query task failed");
                        }
                    }
                }
            }
        }

        match first_error {
            Some(err) => Err(OnboardError::Transport(err)),
            None => Ok(()),
        }
    }
}

impl<N> std::fmt::Debug for Locator<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Locator")
            .field("addresses", &self.addresses)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use astarte_ocf_protocol::v1::doxm::Doxm;
    use astarte_ocf_protocol::v1::{DeviceId, DOXM_HREF, RESOURCE_DIRECTORY_HREF};
    use pretty_assertions::assert_eq;
    use tokio::time::Instant;

    use crate::identity::generate_manufacturer_certificate;
    use crate::mock::{MockDevice, MockNetwork};
    use crate::signer::LocalCa;
    use crate::tests::v4_group;

    use super::*;

    async fn add_device(network: &MockNetwork, ca: &LocalCa) -> Arc<MockDevice> {
        let certificate = generate_manufacturer_certificate(ca, "Device")
            .await
            .unwrap();

        network.add_device(DeviceId::new_v4(), certificate).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn handler_break_cancels_queries() {
        let ca = LocalCa::generate("Manufacturer CA").unwrap();
        let network = Arc::new(MockNetwork::new());

        let fast = add_device(&network, &ca).await;
        let slow = add_device(&network, &ca).await;
        slow.set_multicast_delay(Duration::from_secs(10));

        let locator = Locator::new(Arc::clone(&network), vec![v4_group()]);

        let start = Instant::now();
        let mut found = Vec::new();

        locator
            .discover(
                Request::get(DOXM_HREF),
                Duration::from_secs(30),
                |discovered: Discovered<Doxm>| {
                    found.push(discovered.record.device_id);

                    ControlFlow::Break(())
                },
            )
            .await
            .unwrap();

        assert_eq!(found, vec![fast.device_id()]);
        assert!(start.elapsed() < Duration::from_secs(10));

        // Let the runtime drop the aborted query
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert_eq!(slow.active_queries(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn window_bounds_discovery() {
        let ca = LocalCa::generate("Manufacturer CA").unwrap();
        let network = Arc::new(MockNetwork::new());

        let slow = add_device(&network, &ca).await;
        slow.set_multicast_delay(Duration::from_secs(10));

        let locator = Locator::new(Arc::clone(&network), vec![v4_group()]);

        let start = Instant::now();
        let mut calls = 0;

        locator
            .discover(
                Request::get(DOXM_HREF),
                Duration::from_secs(1),
                |_: Discovered<Doxm>| {
                    calls += 1;

                    ControlFlow::Continue(())
                },
            )
            .await
            .unwrap();

        assert_eq!(calls, 0);
        assert!(start.elapsed() >= Duration::from_secs(1));
        assert!(start.elapsed() < Duration::from_secs(10));

        tokio::time::sleep(Duration::from_millis(1)).await;

        assert_eq!(slow.active_queries(), 0);
    }

    #[tokio::test]
    async fn invalid_replies_skipped() {
        let ca = LocalCa::generate("Manufacturer CA").unwrap();
        let network = Arc::new(MockNetwork::new());

        add_device(&network, &ca).await;

        let locator = Locator::new(Arc::clone(&network), vec![v4_group()]);

        let mut calls = 0;

        // The links are not an ownership resource
        locator
            .discover(
                Request::get(RESOURCE_DIRECTORY_HREF),
                Duration::from_secs(5),
                |_: Discovered<Doxm>| {
                    calls += 1;

                    ControlFlow::Continue(())
                },
            )
            .await
            .unwrap();

        assert_eq!(calls, 0);
    }

    #[tokio::test]
    async fn every_reply_without_break() {
        let ca = LocalCa::generate("Manufacturer CA").unwrap();
        let network = Arc::new(MockNetwork::new());

        let first = add_device(&network, &ca).await;
        let second = add_device(&network, &ca).await;

        let locator = Locator::new(Arc::clone(&network), vec![v4_group()]);

        let mut found = Vec::new();

        locator
            .discover(
                Request::get(DOXM_HREF),
                Duration::from_secs(5),
                |discovered: Discovered<Doxm>| {
                    found.push((discovered.peer, discovered.record.device_id));

                    ControlFlow::Continue(())
                },
            )
            .await
            .unwrap();

        found.sort();
        let mut expected = vec![
            (first.udp_addr(), first.device_id()),
            (second.udp_addr(), second.device_id()),
        ];
        expected.sort();

        assert_eq!(found, expected);
    }

    #[tokio::test]
    async fn group_error_returned() {
        let ca = LocalCa::generate("Manufacturer CA").unwrap();
        let network = Arc::new(MockNetwork::new());

        let device = add_device(&network, &ca).await;

        let v6_group: SocketAddr = "[ff02::158]:5683".parse().unwrap();
        network.fail_group(v6_group);

        let locator = Locator::new(Arc::clone(&network), vec![v4_group(), v6_group]);

        let mut found = Vec::new();

        let err = locator
            .discover(
                Request::get(DOXM_HREF),
                Duration::from_secs(5),
                |discovered: Discovered<Doxm>| {
                    found.push(discovered.record.device_id);

                    ControlFlow::Continue(())
                },
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            OnboardError::Transport(TransportError::Io(_))
        ));
        // The replies of the other groups are still handled
        assert_eq!(found, vec![device.device_id()]);

        // A break hides the errors
        let res = locator
            .discover(
                Request::get(DOXM_HREF),
                Duration::from_secs(5),
                |_: Discovered<Doxm>| ControlFlow::Break(()),
            )
            .await;

        assert!(res.is_ok());
    }
}

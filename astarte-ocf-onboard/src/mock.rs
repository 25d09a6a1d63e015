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

//! Simulated network of OCF devices.
//!
//! The devices keep their security resources in memory and answer the requests of the
//! sessions dialed through [`MockNetwork`]. The TLS handshake is performed in memory with the
//! configuration passed by the client, so the certificate verification is the real one.

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use astarte_ocf_protocol::utils::{decode, encode};
use astarte_ocf_protocol::v1::acl::{AccessControl, AccessControlList, AclUpdate};
use astarte_ocf_protocol::v1::cred::{
    Credential, CredentialType, CredentialUpdate, CredentialUsage, Credentials, Encoding,
};
use astarte_ocf_protocol::v1::csr::Csr;
use astarte_ocf_protocol::v1::doxm::{Doxm, DoxmUpdate, OwnerTransferMethod};
use astarte_ocf_protocol::v1::links::{
    Endpoint, Policy, ResourceLink, ANCHOR_PREFIX, TCP_SECURE_SCHEME, UDP_SCHEME,
};
use astarte_ocf_protocol::v1::pstat::{
    DeviceOnboardingState, OperationalMode, OperationalModes, OperationalState, Pstat,
    PstatUpdate,
};
use astarte_ocf_protocol::v1::{
    ContentFormat, DeviceId, ACL2_HREF, ACL2_RT, BASELINE_IF, CRED_HREF, CRED_RT, CSR_HREF,
    CSR_RT, DEVICE_HREF, DEVICE_RT, DOXM_HREF, DOXM_RT, PSTAT_HREF, PSTAT_RT,
    RESOURCE_DIRECTORY_HREF,
};
use rcgen::{CertificateParams, DnType, KeyPair, PKCS_ECDSA_P256_SHA256};
use rustls::pki_types::{CertificateDer, ServerName};
use rustls::{ClientConfig, ClientConnection, Connection, ServerConfig, ServerConnection};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::config::{DISCOVERY_ADDRESS_V4, DISCOVERY_PORT};
use crate::identity::{crypto_provider, TlsIdentity};
use crate::transport::{
    Code, Method, MulticastEndpoint, Network, Reply, Request, Response, Session, TransportError,
};

/// Port of the unsecured CoAP endpoint of the devices.
pub const UDP_PORT: u16 = 5683;
/// Port of the CoAP over TLS endpoint of the devices.
pub const TLS_PORT: u16 = 5684;

/// Host advertised in the device endpoints, rewritten by the client with the peer address.
const ADVERTISED_HOST: Ipv6Addr = Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 1);

const HANDSHAKE_ROUNDS: usize = 16;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Network of simulated devices.
#[derive(Debug, Default)]
pub struct MockNetwork {
    devices: Mutex<Vec<Arc<MockDevice>>>,
    failing_groups: Mutex<HashSet<SocketAddr>>,
}

impl MockNetwork {
    /// Create an empty network.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an unowned device presenting the manufacturer identity.
    pub fn add_device(
        &self,
        device_id: DeviceId,
        manufacturer: TlsIdentity,
    ) -> Result<Arc<MockDevice>, rcgen::Error> {
        let mut devices = lock(&self.devices);

        let [_, _, hi, lo] = u32::try_from(devices.len() + 1)
            .unwrap_or(u32::MAX)
            .to_be_bytes();
        let ip = IpAddr::V4(Ipv4Addr::new(10, 0, hi, lo));

        let device = Arc::new(MockDevice::new(device_id, manufacturer, ip)?);

        devices.push(Arc::clone(&device));

        Ok(device)
    }

    /// Joining the multicast group fails.
    pub fn fail_group(&self, group: SocketAddr) {
        lock(&self.failing_groups).insert(group);
    }

    fn find(&self, predicate: impl Fn(&MockDevice) -> bool) -> Option<Arc<MockDevice>> {
        lock(&self.devices)
            .iter()
            .find(|device| predicate(device))
            .cloned()
    }
}

impl Network for MockNetwork {
    type Session = MockSession;
    type Multicast = MockMulticast;

    async fn dial_udp(&self, addr: SocketAddr) -> Result<Self::Session, TransportError> {
        let device = self
            .find(|device| device.udp_addr == addr)
            .ok_or(TransportError::Unreachable(addr))?;

        device.dials.fetch_add(1, Ordering::SeqCst);

        Ok(MockSession::new(device, addr, false))
    }

    async fn dial_tcp_tls(
        &self,
        addr: SocketAddr,
        tls: Arc<ClientConfig>,
    ) -> Result<Self::Session, TransportError> {
        let device = self
            .find(|device| device.tls_addr == addr)
            .ok_or(TransportError::Unreachable(addr))?;

        device.dials.fetch_add(1, Ordering::SeqCst);

        handshake(tls, &device.server_identity()).map_err(TransportError::Handshake)?;

        Ok(MockSession::new(device, addr, true))
    }

    async fn dial_multicast(&self, group: SocketAddr) -> Result<Self::Multicast, TransportError> {
        if lock(&self.failing_groups).contains(&group) {
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::AddrNotAvailable,
                "multicast group not available",
            )));
        }

        let devices = lock(&self.devices)
            .iter()
            .filter(|device| lock(&device.state).groups.contains(&group))
            .cloned()
            .collect();

        Ok(MockMulticast { devices })
    }
}

fn handshake(config: Arc<ClientConfig>, identity: &TlsIdentity) -> Result<(), rustls::Error> {
    let server_config = ServerConfig::builder_with_provider(crypto_provider())
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_single_cert(identity.chain().to_vec(), identity.private_key())?;

    let name = ServerName::try_from("device.local")
        .map_err(|err| rustls::Error::General(err.to_string()))?;

    let mut client = Connection::from(ClientConnection::new(config, name)?);
    let mut server = Connection::from(ServerConnection::new(Arc::new(server_config))?);

    for _ in 0..HANDSHAKE_ROUNDS {
        if !client.is_handshaking() && !server.is_handshaking() {
            return Ok(());
        }

        transfer(&mut client, &mut server)?;
        transfer(&mut server, &mut client)?;
    }

    Err(rustls::Error::General("handshake didn't complete".to_string()))
}

fn transfer(from: &mut Connection, to: &mut Connection) -> Result<(), rustls::Error> {
    let io_err = |err: std::io::Error| rustls::Error::General(err.to_string());

    let mut buf = Vec::new();
    while from.wants_write() {
        from.write_tls(&mut buf).map_err(io_err)?;
    }

    let mut data = buf.as_slice();
    while !data.is_empty() {
        if to.read_tls(&mut data).map_err(io_err)? == 0 {
            break;
        }

        to.process_new_packets()?;
    }

    Ok(())
}

enum Handled {
    Reply(Response),
    Ignore,
    Dropped,
}

struct DeviceState {
    doxm: Doxm,
    pstat: Pstat,
    creds: Vec<Credential>,
    creds_owner: DeviceId,
    next_credid: u64,
    acl: Vec<AccessControl>,
    acl_owner: DeviceId,
    next_aceid: u64,
    legacy: bool,
    csr_pem: bool,
    groups: Vec<SocketAddr>,
    multicast_delay: Duration,
    ignore_owner_write: bool,
    drop_session_on_reset: bool,
    stall_requests: bool,
    credential_requests: Vec<(Method, Vec<String>)>,
}

impl DeviceState {
    fn content_format(&self) -> u16 {
        if self.legacy {
            ContentFormat::AppCbor.into()
        } else {
            ContentFormat::AppOcfCbor.into()
        }
    }

    fn reset(&mut self) {
        self.doxm.owned = false;
        self.doxm.selected_method = None;
        self.doxm.owner_id = DeviceId::nil();
        self.doxm.resource_owner_id = DeviceId::nil();

        self.pstat.dos = DeviceOnboardingState {
            state: OperationalState::ReadyForOtm,
            pending: false,
        };
        self.pstat.is_operational = false;
        self.pstat.resource_owner_id = DeviceId::nil();

        self.creds.clear();
        self.creds_owner = DeviceId::nil();
        self.acl.clear();
        self.acl_owner = DeviceId::nil();
    }
}

/// Simulated OCF device.
pub struct MockDevice {
    udp_addr: SocketAddr,
    tls_addr: SocketAddr,
    key: Vec<u8>,
    csr_der: Vec<u8>,
    csr_pem: String,
    manufacturer: TlsIdentity,
    state: Mutex<DeviceState>,
    dials: AtomicUsize,
    live_sessions: AtomicUsize,
    credential_writes: AtomicUsize,
    active_queries: AtomicUsize,
}

impl MockDevice {
    fn new(
        device_id: DeviceId,
        manufacturer: TlsIdentity,
        ip: IpAddr,
    ) -> Result<Self, rcgen::Error> {
        let key = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256)?;

        let mut params = CertificateParams::default();
        params
            .distinguished_name
            .push(DnType::CommonName, device_id.to_common_name());
        let csr = params.serialize_request(&key)?;

        let state = DeviceState {
            doxm: Doxm {
                supported_methods: vec![
                    OwnerTransferMethod::JustWorks,
                    OwnerTransferMethod::ManufacturerCertificate,
                ],
                selected_method: None,
                supported_credential_types: CredentialType::SYMMETRIC_PAIR_WISE
                    | CredentialType::ASYMMETRIC_SIGNING_WITH_CERTIFICATE,
                owned: false,
                device_id,
                owner_id: DeviceId::nil(),
                resource_owner_id: DeviceId::nil(),
            },
            pstat: Pstat {
                dos: DeviceOnboardingState {
                    state: OperationalState::ReadyForOtm,
                    pending: false,
                },
                is_operational: false,
                current_mode: 2,
                target_mode: 0,
                operational_mode: OperationalMode::ServerDirectedSingle,
                supported_modes: OperationalModes::new(&[
                    OperationalMode::ServerDirectedSingle,
                    OperationalMode::ClientDirected,
                ]),
                resource_owner_id: DeviceId::nil(),
            },
            creds: Vec::new(),
            creds_owner: DeviceId::nil(),
            next_credid: 1,
            acl: Vec::new(),
            acl_owner: DeviceId::nil(),
            next_aceid: 1,
            legacy: false,
            csr_pem: false,
            groups: vec![SocketAddr::new(
                IpAddr::V4(DISCOVERY_ADDRESS_V4),
                DISCOVERY_PORT,
            )],
            multicast_delay: Duration::ZERO,
            ignore_owner_write: false,
            drop_session_on_reset: false,
            stall_requests: false,
            credential_requests: Vec::new(),
        };

        Ok(Self {
            udp_addr: SocketAddr::new(ip, UDP_PORT),
            tls_addr: SocketAddr::new(ip, TLS_PORT),
            key: key.serialize_der(),
            csr_der: csr.der().to_vec(),
            csr_pem: csr.pem()?,
            manufacturer,
            state: Mutex::new(state),
            dials: AtomicUsize::new(0),
            live_sessions: AtomicUsize::new(0),
            credential_writes: AtomicUsize::new(0),
            active_queries: AtomicUsize::new(0),
        })
    }

    fn state(&self) -> MutexGuard<'_, DeviceState> {
        lock(&self.state)
    }

    /// Address of the unsecured endpoint.
    pub fn udp_addr(&self) -> SocketAddr {
        self.udp_addr
    }

    /// Address of the CoAP over TLS endpoint.
    pub fn tls_addr(&self) -> SocketAddr {
        self.tls_addr
    }

    /// Current device identifier.
    pub fn device_id(&self) -> DeviceId {
        self.state().doxm.device_id
    }

    /// Current ownership status.
    pub fn doxm(&self) -> Doxm {
        self.state().doxm.clone()
    }

    /// Current provisioning status.
    pub fn pstat(&self) -> Pstat {
        self.state().pstat.clone()
    }

    /// Installed credentials.
    pub fn credentials(&self) -> Vec<Credential> {
        self.state().creds.clone()
    }

    /// Installs the credential, returning the identifier assigned to it.
    pub fn add_credential(&self, mut cred: Credential) -> u64 {
        let mut state = self.state();

        let id = state.next_credid;
        state.next_credid += 1;

        cred.id = Some(id);
        state.creds.push(cred);

        id
    }

    /// Requests received on the credential resource, with their query options.
    pub fn credential_requests(&self) -> Vec<(Method, Vec<String>)> {
        self.state().credential_requests.clone()
    }

    /// Installed access control entries.
    pub fn access_control(&self) -> Vec<AccessControl> {
        self.state().acl.clone()
    }

    /// Answers with `application/cbor` like the legacy implementations.
    pub fn set_legacy(&self, legacy: bool) {
        self.state().legacy = legacy;
    }

    /// Returns the certificate signing request PEM encoded.
    pub fn set_csr_pem(&self, pem: bool) {
        self.state().csr_pem = pem;
    }

    /// Sets the pending flag of the onboarding state.
    pub fn set_pending(&self, pending: bool) {
        self.state().pstat.dos.pending = pending;
    }

    /// Sets the onboarding state.
    pub fn set_operational_state(&self, state: OperationalState) {
        self.state().pstat.dos.state = state;
    }

    /// Sets the supported operational modes.
    pub fn set_supported_modes(&self, modes: OperationalModes) {
        self.state().pstat.supported_modes = modes;
    }

    /// Sets the supported ownership transfer methods.
    pub fn set_supported_methods(&self, methods: Vec<OwnerTransferMethod>) {
        self.state().doxm.supported_methods = methods;
    }

    /// Marks the device owned by the owner.
    pub fn set_owned_by(&self, owner: DeviceId) {
        let mut state = self.state();

        state.doxm.owned = true;
        state.doxm.owner_id = owner;
        state.doxm.resource_owner_id = owner;
        state.pstat.dos.state = OperationalState::ReadyForNormalOperation;
        state.pstat.is_operational = true;
    }

    /// Ignores the writes of the device owner.
    pub fn ignore_owner_write(&self, ignore: bool) {
        self.state().ignore_owner_write = ignore;
    }

    /// Drops the session after applying a reset.
    pub fn drop_session_on_reset(&self, drop: bool) {
        self.state().drop_session_on_reset = drop;
    }

    /// Never answers the unicast requests.
    pub fn stall_requests(&self, stall: bool) {
        self.state().stall_requests = stall;
    }

    /// Delay of the multicast replies.
    pub fn set_multicast_delay(&self, delay: Duration) {
        self.state().multicast_delay = delay;
    }

    /// Multicast groups the device joined.
    pub fn set_groups(&self, groups: Vec<SocketAddr>) {
        self.state().groups = groups;
    }

    /// Number of sessions dialed.
    pub fn dials(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }

    /// Number of sessions not closed.
    pub fn live_sessions(&self) -> usize {
        self.live_sessions.load(Ordering::SeqCst)
    }

    /// Number of credential writes.
    pub fn credential_writes(&self) -> usize {
        self.credential_writes.load(Ordering::SeqCst)
    }

    /// Number of multicast queries still waiting to reply.
    pub fn active_queries(&self) -> usize {
        self.active_queries.load(Ordering::SeqCst)
    }

    /// Identity presented in the TLS handshake.
    ///
    /// The identity certificate once owned, the manufacturer one before.
    fn server_identity(&self) -> TlsIdentity {
        let state = self.state();

        // The manufacturer certificate authenticates the ownership transfer
        if !state.doxm.owned {
            return self.manufacturer.clone();
        }

        let identity = state.creds.iter().find_map(|cred| {
            let is_identity = cred.credential_type
                == CredentialType::ASYMMETRIC_SIGNING_WITH_CERTIFICATE
                && cred.usage == Some(CredentialUsage::Cert);

            is_identity
                .then_some(cred.public_data.as_ref())
                .flatten()
                .map(|data| data.data.clone())
        });

        match identity {
            Some(der) => TlsIdentity::new(vec![CertificateDer::from(der)], self.key.clone()),
            None => self.manufacturer.clone(),
        }
    }

    fn links(&self, state: &DeviceState) -> Vec<ResourceLink> {
        let device_id = state.doxm.device_id;

        let endpoints: Vec<Endpoint> = [
            Endpoint::from_socket_addr(
                UDP_SCHEME,
                SocketAddr::new(IpAddr::V6(ADVERTISED_HOST), self.udp_addr.port()),
            ),
            Endpoint::from_socket_addr(
                TCP_SECURE_SCHEME,
                SocketAddr::new(IpAddr::V6(ADVERTISED_HOST), self.tls_addr.port()),
            ),
        ]
        .into_iter()
        .flatten()
        .collect();

        [
            (DEVICE_HREF, DEVICE_RT),
            (DOXM_HREF, DOXM_RT),
            (PSTAT_HREF, PSTAT_RT),
            (CRED_HREF, CRED_RT),
            (ACL2_HREF, ACL2_RT),
            (CSR_HREF, CSR_RT),
        ]
        .into_iter()
        .map(|(href, rt)| ResourceLink {
            href: href.to_string(),
            anchor: format!("{ANCHOR_PREFIX}{device_id}"),
            device_id,
            resource_types: vec![rt.to_string()],
            interfaces: vec![BASELINE_IF.to_string()],
            policy: Some(Policy { bitmask: 1 }),
            endpoints: endpoints.clone(),
        })
        .collect()
    }

    fn handle(&self, request: &Request, secure: bool) -> Handled {
        let mut state = self.state();

        trace!(method = %request.method, href = request.href, secure, "mock request");

        if request.href == CRED_HREF {
            state
                .credential_requests
                .push((request.method, request.queries.clone()));
        }

        match (request.method, request.href.as_str()) {
            (Method::Get, RESOURCE_DIRECTORY_HREF) => {
                let links = self.links(&state);

                content(&state, &links)
            }
            (Method::Get, DOXM_HREF) => {
                if let Some(owned) = request.query("owned") {
                    if (owned == "TRUE") != state.doxm.owned {
                        return Handled::Ignore;
                    }
                }

                content(&state, &state.doxm)
            }
            (Method::Post, DOXM_HREF) => {
                let Some(update) = payload::<DoxmUpdate>(request) else {
                    return status(Code::BAD_REQUEST);
                };

                update_doxm(&mut state, update, secure)
            }
            (Method::Get, PSTAT_HREF) => content(&state, &state.pstat),
            _ if !secure => status(Code::UNAUTHORIZED),
            (Method::Post, PSTAT_HREF) => {
                let Some(update) = payload::<PstatUpdate>(request) else {
                    return status(Code::BAD_REQUEST);
                };

                update_pstat(&mut state, update)
            }
            (Method::Get, CSR_HREF) => {
                let csr = if state.csr_pem {
                    Csr {
                        csr: self.csr_pem.as_bytes().to_vec(),
                        encoding: Encoding::Pem,
                    }
                } else {
                    Csr {
                        csr: self.csr_der.clone(),
                        encoding: Encoding::Der,
                    }
                };

                content(&state, &csr)
            }
            (Method::Get, CRED_HREF) => {
                let subject = match request.query("subjectuuid").map(str::parse::<DeviceId>) {
                    Some(Ok(subject)) => Some(subject),
                    Some(Err(_)) => return status(Code::BAD_REQUEST),
                    None => None,
                };

                let creds = Credentials {
                    creds: state
                        .creds
                        .iter()
                        .filter(|cred| subject.map_or(true, |subject| cred.subject == subject))
                        .cloned()
                        .collect(),
                    resource_owner_id: state.creds_owner,
                };

                content(&state, &creds)
            }
            (Method::Post, CRED_HREF) => {
                let Some(update) = payload::<CredentialUpdate>(request) else {
                    return status(Code::BAD_REQUEST);
                };

                self.credential_writes.fetch_add(1, Ordering::SeqCst);

                if let Some(owner) = update.resource_owner_id {
                    state.creds_owner = owner;
                }

                for mut cred in update.creds {
                    cred.id = Some(state.next_credid);
                    state.next_credid += 1;

                    state.creds.push(cred);
                }

                status(Code::CHANGED)
            }
            (Method::Delete, CRED_HREF) => {
                if let Some(id) = request.query("credid") {
                    let Ok(id) = id.parse::<u64>() else {
                        return status(Code::BAD_REQUEST);
                    };

                    state.creds.retain(|cred| cred.id != Some(id));
                } else if let Some(subject) = request.query("subjectuuid") {
                    let Ok(subject) = subject.parse::<DeviceId>() else {
                        return status(Code::BAD_REQUEST);
                    };

                    state.creds.retain(|cred| cred.subject != subject);
                } else {
                    state.creds.clear();
                }

                status(Code::DELETED)
            }
            (Method::Get, ACL2_HREF) => {
                let acl = AccessControlList {
                    entries: state.acl.clone(),
                    resource_owner_id: state.acl_owner,
                };

                content(&state, &acl)
            }
            (Method::Post, ACL2_HREF) => {
                let Some(update) = payload::<AclUpdate>(request) else {
                    return status(Code::BAD_REQUEST);
                };

                if let Some(owner) = update.resource_owner_id {
                    state.acl_owner = owner;
                }

                for mut entry in update.entries {
                    entry.id = Some(state.next_aceid);
                    state.next_aceid += 1;

                    state.acl.push(entry);
                }

                status(Code::CHANGED)
            }
            _ => status(Code::NOT_FOUND),
        }
    }

    fn begin_query(self: &Arc<Self>) -> QueryGuard {
        self.active_queries.fetch_add(1, Ordering::SeqCst);

        QueryGuard(Arc::clone(self))
    }
}

impl std::fmt::Debug for MockDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockDevice")
            .field("udp_addr", &self.udp_addr)
            .field("tls_addr", &self.tls_addr)
            .finish_non_exhaustive()
    }
}

fn update_doxm(state: &mut DeviceState, update: DoxmUpdate, secure: bool) -> Handled {
    let only_selection = update.owned.is_none()
        && update.device_id.is_none()
        && update.owner_id.is_none()
        && update.resource_owner_id.is_none();

    if !secure && (state.doxm.owned || !only_selection) {
        return status(Code::UNAUTHORIZED);
    }

    if let Some(method) = update.selected_method {
        if !state.doxm.supports(method) {
            return status(Code::BAD_REQUEST);
        }

        state.doxm.selected_method = Some(method);
    }

    if let Some(owner) = update.owner_id {
        if state.ignore_owner_write {
            debug!(%owner, "owner write ignored");
        } else {
            state.doxm.owner_id = owner;
        }
    }

    if let Some(owned) = update.owned {
        state.doxm.owned = owned;
    }

    if let Some(device_id) = update.device_id {
        state.doxm.device_id = device_id;
    }

    if let Some(owner) = update.resource_owner_id {
        state.doxm.resource_owner_id = owner;
    }

    status(Code::CHANGED)
}

fn update_pstat(state: &mut DeviceState, update: PstatUpdate) -> Handled {
    if let Some(mode) = update.operational_mode {
        if !state.pstat.supported_modes.has(mode) {
            return status(Code::BAD_REQUEST);
        }

        state.pstat.operational_mode = mode;
    }

    if let Some(owner) = update.resource_owner_id {
        state.pstat.resource_owner_id = owner;
    }

    if let Some(dos) = update.dos {
        if dos.state == OperationalState::Reset {
            state.reset();

            debug!("device reset");

            if state.drop_session_on_reset {
                return Handled::Dropped;
            }

            return status(Code::CHANGED);
        }

        state.pstat.dos.state = dos.state;
        state.pstat.is_operational = dos.state == OperationalState::ReadyForNormalOperation;
    }

    status(Code::CHANGED)
}

fn payload<T>(request: &Request) -> Option<T>
where
    T: DeserializeOwned,
{
    decode(&request.payload, "mock request").ok()
}

fn content<T>(state: &DeviceState, value: &T) -> Handled
where
    T: Serialize,
{
    match encode(value, "mock response") {
        Ok(payload) => Handled::Reply(Response {
            code: Code::CONTENT,
            content_format: Some(state.content_format()),
            payload,
        }),
        Err(_) => status(Code::INTERNAL_SERVER_ERROR),
    }
}

fn status(code: Code) -> Handled {
    Handled::Reply(Response {
        code,
        content_format: None,
        payload: Vec::new(),
    })
}

struct QueryGuard(Arc<MockDevice>);

impl Drop for QueryGuard {
    fn drop(&mut self) {
        self.0.active_queries.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Session with a simulated device.
#[derive(Debug)]
pub struct MockSession {
    device: Arc<MockDevice>,
    peer: SocketAddr,
    secure: bool,
    closed: AtomicBool,
}

impl MockSession {
    fn new(device: Arc<MockDevice>, peer: SocketAddr, secure: bool) -> Self {
        device.live_sessions.fetch_add(1, Ordering::SeqCst);

        Self {
            device,
            peer,
            secure,
            closed: AtomicBool::new(false),
        }
    }

    /// Returns true for the CoAP over TLS sessions.
    pub fn is_secure(&self) -> bool {
        self.secure
    }
}

impl Session for MockSession {
    async fn send(&self, request: Request) -> Result<Response, TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }

        let stalled = self.device.state().stall_requests;
        if stalled {
            std::future::pending::<()>().await;
        }

        match self.device.handle(&request, self.secure) {
            Handled::Reply(response) => Ok(response),
            Handled::Ignore => Ok(Response {
                code: Code::NOT_FOUND,
                content_format: None,
                payload: Vec::new(),
            }),
            Handled::Dropped => {
                self.close();

                Err(TransportError::Closed)
            }
        }
    }

    fn remote_addr(&self) -> SocketAddr {
        self.peer
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.device.live_sessions.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Drop for MockSession {
    fn drop(&mut self) {
        self.close();
    }
}

/// Multicast group of simulated devices.
#[derive(Debug)]
pub struct MockMulticast {
    devices: Vec<Arc<MockDevice>>,
}

impl MulticastEndpoint for MockMulticast {
    async fn publish(
        &self,
        request: Request,
        replies: mpsc::Sender<Reply>,
    ) -> Result<(), TransportError> {
        let start = tokio::time::Instant::now();

        let mut devices: Vec<(Duration, Arc<MockDevice>)> = self
            .devices
            .iter()
            .map(|device| (device.state().multicast_delay, Arc::clone(device)))
            .collect();
        devices.sort_by_key(|(delay, _)| *delay);

        // Every device is answering until it replied or the query is cancelled
        let mut queries: Vec<Option<QueryGuard>> = devices
            .iter()
            .map(|(_, device)| Some(device.begin_query()))
            .collect();

        for (idx, (delay, device)) in devices.iter().enumerate() {
            tokio::time::sleep_until(start + *delay).await;

            let handled = device.handle(&request, false);

            if let Some(query) = queries.get_mut(idx) {
                query.take();
            }

            let Handled::Reply(response) = handled else {
                continue;
            };

            let reply = Reply {
                peer: device.udp_addr,
                response,
            };

            if replies.send(reply).await.is_err() {
                break;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::identity::{client_config, generate_manufacturer_certificate};
    use crate::signer::LocalCa;

    use super::*;

    #[tokio::test]
    async fn handshake_with_manufacturer_certificate() {
        let mfg_ca = LocalCa::generate("Manufacturer CA").unwrap();
        let device_mfg = generate_manufacturer_certificate(&mfg_ca, "Device")
            .await
            .unwrap();
        let client_mfg = generate_manufacturer_certificate(&mfg_ca, "Client")
            .await
            .unwrap();

        let trusted = client_config(&client_mfg, &[mfg_ca.certificate()], false).unwrap();
        handshake(trusted, &device_mfg).unwrap();

        let other_ca = LocalCa::generate("Other CA").unwrap();
        let untrusted = client_config(&client_mfg, &[other_ca.certificate()], false).unwrap();
        let err = handshake(untrusted, &device_mfg).unwrap_err();

        assert!(matches!(err, rustls::Error::InvalidCertificate(_)));
    }

    #[tokio::test]
    async fn unsecured_session_is_restricted() {
        let mfg_ca = LocalCa::generate("Manufacturer CA").unwrap();
        let mfg = generate_manufacturer_certificate(&mfg_ca, "Device")
            .await
            .unwrap();

        let network = MockNetwork::new();
        let device = network.add_device(DeviceId::new_v4(), mfg).unwrap();

        let session = network.dial_udp(device.udp_addr()).await.unwrap();

        let response = session.send(Request::get(PSTAT_HREF)).await.unwrap();
        assert_eq!(response.code, Code::CONTENT);

        let response = session.send(Request::get(CRED_HREF)).await.unwrap();
        assert_eq!(response.code, Code::UNAUTHORIZED);

        assert_eq!(device.live_sessions(), 1);
        session.close();
        session.close();
        assert_eq!(device.live_sessions(), 0);

        assert!(matches!(
            session.send(Request::get(PSTAT_HREF)).await,
            Err(TransportError::Closed)
        ));
    }
}

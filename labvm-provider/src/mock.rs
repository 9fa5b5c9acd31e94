//! In-memory mock control plane for tests.
//!
//! Keeps a ledger of every create and delete, hands out sequential fake IPs,
//! and supports injected failures per (kind, name). Deletes of resources
//! that are not live return `NotFound`, which exercises the tolerant
//! teardown paths the same way a real control plane would.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{ProviderError, Result};
use crate::{
    CloudProvider, InterfaceSpec, MachineSpec, PublicAddress, PublicAddressSpec,
    SecurityPolicySpec, VirtualNetworkSpec,
};

/// The kinds of resources the mock tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    VirtualNetwork,
    PublicAddress,
    SecurityPolicy,
    Interface,
    Machine,
}

#[derive(Default)]
struct MockState {
    live: HashSet<(ResourceKind, String)>,
    created: Vec<(ResourceKind, String)>,
    deleted: Vec<(ResourceKind, String)>,
    fail_create: HashSet<(ResourceKind, String)>,
    fail_delete: HashSet<(ResourceKind, String)>,
    addresses: HashMap<String, String>,
    next_ip: u8,
}

#[derive(Default)]
pub struct MockCloudProvider {
    state: Mutex<MockState>,
}

impl MockCloudProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next create of `(kind, name)` fail with a request error.
    pub fn fail_create(&self, kind: ResourceKind, name: &str) {
        self.state
            .lock()
            .unwrap()
            .fail_create
            .insert((kind, name.to_string()));
    }

    /// Make the next delete of `(kind, name)` fail with a request error.
    pub fn fail_delete(&self, kind: ResourceKind, name: &str) {
        self.state
            .lock()
            .unwrap()
            .fail_delete
            .insert((kind, name.to_string()));
    }

    /// Whether `(kind, name)` currently exists.
    pub fn is_live(&self, kind: ResourceKind, name: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .live
            .contains(&(kind, name.to_string()))
    }

    /// Number of live resources of one kind.
    pub fn live_count(&self, kind: ResourceKind) -> usize {
        self.state
            .lock()
            .unwrap()
            .live
            .iter()
            .filter(|(k, _)| *k == kind)
            .count()
    }

    /// Names of every resource of one kind ever created, in order.
    pub fn created_names(&self, kind: ResourceKind) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .created
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, n)| n.clone())
            .collect()
    }

    /// Names of every resource of one kind ever deleted, in order.
    pub fn deleted_names(&self, kind: ResourceKind) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .deleted
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, n)| n.clone())
            .collect()
    }

    fn create(&self, kind: ResourceKind, name: &str) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        if state.fail_create.remove(&(kind, name.to_string())) {
            return Err(ProviderError::Request(format!(
                "injected failure for {}",
                name
            )));
        }

        // Create-or-update: re-creating an existing resource succeeds
        state.live.insert((kind, name.to_string()));
        state.created.push((kind, name.to_string()));

        if kind == ResourceKind::PublicAddress && !state.addresses.contains_key(name) {
            state.next_ip += 1;
            let ip = format!("20.10.0.{}", state.next_ip);
            state.addresses.insert(name.to_string(), ip);
        }

        Ok(format!("/mock/{:?}/{}", kind, name))
    }

    fn delete(&self, kind: ResourceKind, name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_delete.remove(&(kind, name.to_string())) {
            return Err(ProviderError::Request(format!(
                "injected failure for {}",
                name
            )));
        }
        if state.live.remove(&(kind, name.to_string())) {
            state.deleted.push((kind, name.to_string()));
            Ok(())
        } else {
            Err(ProviderError::NotFound(name.to_string()))
        }
    }
}

#[async_trait]
impl CloudProvider for MockCloudProvider {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn create_virtual_network(
        &self,
        name: &str,
        _spec: &VirtualNetworkSpec,
    ) -> Result<String> {
        self.create(ResourceKind::VirtualNetwork, name)
    }

    async fn get_subnet(&self, network_name: &str, subnet_name: &str) -> Result<String> {
        let state = self.state.lock().unwrap();
        if state
            .live
            .contains(&(ResourceKind::VirtualNetwork, network_name.to_string()))
        {
            Ok(format!("/mock/Subnet/{}/{}", network_name, subnet_name))
        } else {
            Err(ProviderError::NotFound(network_name.to_string()))
        }
    }

    async fn create_public_address(&self, name: &str, _spec: &PublicAddressSpec) -> Result<String> {
        self.create(ResourceKind::PublicAddress, name)
    }

    async fn get_public_address(&self, name: &str) -> Result<PublicAddress> {
        let state = self.state.lock().unwrap();
        if !state
            .live
            .contains(&(ResourceKind::PublicAddress, name.to_string()))
        {
            return Err(ProviderError::NotFound(name.to_string()));
        }
        Ok(PublicAddress {
            id: format!("/mock/PublicAddress/{}", name),
            ip_address: state.addresses.get(name).cloned(),
        })
    }

    async fn create_security_policy(
        &self,
        name: &str,
        _spec: &SecurityPolicySpec,
    ) -> Result<String> {
        self.create(ResourceKind::SecurityPolicy, name)
    }

    async fn create_interface(&self, name: &str, _spec: &InterfaceSpec) -> Result<String> {
        self.create(ResourceKind::Interface, name)
    }

    async fn create_machine(&self, name: &str, _spec: &MachineSpec) -> Result<String> {
        self.create(ResourceKind::Machine, name)
    }

    async fn delete_machine(&self, name: &str) -> Result<()> {
        self.delete(ResourceKind::Machine, name)
    }

    async fn delete_interface(&self, name: &str) -> Result<()> {
        self.delete(ResourceKind::Interface, name)
    }

    async fn delete_security_policy(&self, name: &str) -> Result<()> {
        self.delete(ResourceKind::SecurityPolicy, name)
    }

    async fn delete_public_address(&self, name: &str) -> Result<()> {
        self.delete(ResourceKind::PublicAddress, name)
    }

    async fn delete_virtual_network(&self, name: &str) -> Result<()> {
        self.delete(ResourceKind::VirtualNetwork, name)
    }
}

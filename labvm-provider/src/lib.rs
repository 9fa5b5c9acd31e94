//! Cloud provider abstraction for per-student sandbox VMs.
//!
//! This library defines the [`CloudProvider`] trait (the control-plane
//! contract the provisioning stages call) plus the network and compute
//! stages themselves and the install-profile registry. Every create call is
//! idempotent-by-name (create-or-update semantics) and every delete call
//! tolerates a resource that is already gone.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod compute;
pub mod error;
pub mod network;
pub mod profiles;

// When the `test-helpers` feature is enabled, include the mock provider.
#[cfg(feature = "test-helpers")]
pub mod mock;

pub use compute::{deprovision_machine, provision_machine, MachineRequest};
pub use error::{ProviderError, Result, Stage};
pub use network::{deprovision_network, provision_network, public_ip, NetworkStack};
pub use profiles::{ImageReference, ProfileRegistry, VmProfile};

/// Instantiate a control plane by name.
///
/// The real cloud client is deployment-specific and registered by the
/// embedding service; the in-memory mock is available for local runs when
/// built with the `test-helpers` feature.
pub fn get_provider(name: &str) -> Result<std::sync::Arc<dyn CloudProvider>> {
    match name {
        #[cfg(feature = "test-helpers")]
        "mock" => Ok(std::sync::Arc::new(mock::MockCloudProvider::new())),
        other => Err(ProviderError::UnknownProvider(other.to_string())),
    }
}

/// Specification for a private network with a single subnet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VirtualNetworkSpec {
    pub location: String,
    pub address_space: String,
    pub subnet_name: String,
    pub subnet_prefix: String,
}

/// Specification for a static public address.
///
/// The Standard SKU with static allocation is required for the student
/// subscription tier; basic/dynamic addresses are rejected by the account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicAddressSpec {
    pub location: String,
    pub sku: String,
    pub allocation_method: String,
    pub address_version: String,
}

/// A single inbound/outbound security rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityRule {
    pub name: String,
    pub protocol: String,
    pub direction: String,
    pub access: String,
    pub priority: u32,
    pub source_address_prefix: String,
    pub source_port_range: String,
    pub destination_address_prefix: String,
    pub destination_port_range: String,
}

/// Specification for a security policy (rule set).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityPolicySpec {
    pub location: String,
    pub rules: Vec<SecurityRule>,
}

/// Specification for a network interface binding subnet, address, and policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterfaceSpec {
    pub location: String,
    pub ip_configuration_name: String,
    pub subnet_id: String,
    pub public_address_id: String,
    pub security_policy_id: String,
}

/// Full machine specification handed to the control plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineSpec {
    pub location: String,
    pub machine_size: String,
    pub image: ImageReference,
    pub os_disk_type: String,
    pub computer_name: String,
    pub admin_username: String,
    pub admin_password: String,
    /// Base64-encoded boot-time install script.
    pub custom_data: String,
    pub interface_id: String,
}

/// A public address as reported by the control plane. The IP is only
/// populated once the provider has finished allocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicAddress {
    pub id: String,
    pub ip_address: Option<String>,
}

/// The core trait for cloud control planes.
///
/// Resources are keyed by name within the resource group the provider was
/// constructed with. Create operations are create-or-update and return the
/// provider's identifier for the resource; delete operations must not error
/// when the named resource is already absent.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Get the name of the provider (e.g., "azure", "mock").
    fn name(&self) -> &'static str;

    async fn create_virtual_network(&self, name: &str, spec: &VirtualNetworkSpec)
        -> Result<String>;

    /// Look up the identifier of a subnet inside an existing network.
    async fn get_subnet(&self, network_name: &str, subnet_name: &str) -> Result<String>;

    async fn create_public_address(&self, name: &str, spec: &PublicAddressSpec) -> Result<String>;

    /// Fetch a public address, including its allocated IP when available.
    async fn get_public_address(&self, name: &str) -> Result<PublicAddress>;

    async fn create_security_policy(&self, name: &str, spec: &SecurityPolicySpec)
        -> Result<String>;

    async fn create_interface(&self, name: &str, spec: &InterfaceSpec) -> Result<String>;

    /// Create a machine and wait for the final provisioned state. Callers
    /// observe a fully provisioned machine, not an accepted request.
    async fn create_machine(&self, name: &str, spec: &MachineSpec) -> Result<String>;

    async fn delete_machine(&self, name: &str) -> Result<()>;
    async fn delete_interface(&self, name: &str) -> Result<()>;
    async fn delete_security_policy(&self, name: &str) -> Result<()>;
    async fn delete_public_address(&self, name: &str) -> Result<()>;
    async fn delete_virtual_network(&self, name: &str) -> Result<()>;
}

//! Network provisioning stage: the per-VM network stack.
//!
//! Each sandbox VM owns a private network, a static public address, a
//! security policy with a single inbound remote-desktop rule, and a network
//! interface binding the three together. The steps are strictly ordered,
//! since each one needs the identifier produced by the previous one, and the
//! stage performs no rollback of its own; cleanup of partial work belongs to
//! the caller.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{ProviderError, Result, Stage};
use crate::{
    CloudProvider, InterfaceSpec, PublicAddressSpec, SecurityPolicySpec, SecurityRule,
    VirtualNetworkSpec,
};

/// Address space for every per-VM private network.
const ADDRESS_SPACE: &str = "10.0.0.0/16";

/// Prefix of the single subnet inside the address space.
const SUBNET_PREFIX: &str = "10.0.0.0/24";

/// Inbound port for the remote-desktop rule.
const RDP_PORT: u16 = 3389;

/// Priority of the remote-desktop rule.
const RDP_RULE_PRIORITY: u32 = 1000;

/// Identifiers of a fully provisioned per-VM network stack. Ephemeral:
/// lives only for the duration of one pipeline run; teardown re-derives the
/// resource names from the VM name instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkStack {
    pub network_id: String,
    pub subnet_id: String,
    pub address_id: String,
    pub policy_id: String,
    pub interface_id: String,
}

fn vnet_name(vm_name: &str) -> String {
    format!("{}-vnet", vm_name)
}

fn subnet_name(vm_name: &str) -> String {
    format!("{}-subnet", vm_name)
}

pub(crate) fn address_name(vm_name: &str) -> String {
    format!("{}-ip", vm_name)
}

fn policy_name(vm_name: &str) -> String {
    format!("{}-nsg", vm_name)
}

pub(crate) fn interface_name(vm_name: &str) -> String {
    format!("{}-nic", vm_name)
}

/// Provision the network stack for one VM.
///
/// Steps, in dependency order: private network with one subnet, static
/// public address, security policy, network interface. A failure at any
/// step is surfaced with the stage it occurred in and leaves earlier
/// resources in place.
pub async fn provision_network(
    provider: &dyn CloudProvider,
    vm_name: &str,
    location: &str,
) -> Result<NetworkStack> {
    info!(vm_name, location, "Provisioning network stack");

    let vnet = vnet_name(vm_name);
    let subnet = subnet_name(vm_name);

    let network_id = provider
        .create_virtual_network(
            &vnet,
            &VirtualNetworkSpec {
                location: location.to_string(),
                address_space: ADDRESS_SPACE.to_string(),
                subnet_name: subnet.clone(),
                subnet_prefix: SUBNET_PREFIX.to_string(),
            },
        )
        .await
        .map_err(|e| e.at_stage(Stage::VirtualNetwork, &vnet))?;

    let subnet_id = provider
        .get_subnet(&vnet, &subnet)
        .await
        .map_err(|e| e.at_stage(Stage::VirtualNetwork, &subnet))?;
    debug!(vm_name, %subnet_id, "Virtual network ready");

    let address = address_name(vm_name);
    let address_id = provider
        .create_public_address(
            &address,
            &PublicAddressSpec {
                location: location.to_string(),
                // Standard SKU + static allocation: required for the
                // student subscription tier.
                sku: "Standard".to_string(),
                allocation_method: "Static".to_string(),
                address_version: "IPv4".to_string(),
            },
        )
        .await
        .map_err(|e| e.at_stage(Stage::PublicAddress, &address))?;
    debug!(vm_name, %address_id, "Public address ready");

    let policy = policy_name(vm_name);
    let policy_id = provider
        .create_security_policy(
            &policy,
            &SecurityPolicySpec {
                location: location.to_string(),
                rules: vec![SecurityRule {
                    name: "Allow-RDP".to_string(),
                    protocol: "Tcp".to_string(),
                    direction: "Inbound".to_string(),
                    access: "Allow".to_string(),
                    priority: RDP_RULE_PRIORITY,
                    source_address_prefix: "*".to_string(),
                    source_port_range: "*".to_string(),
                    destination_address_prefix: "*".to_string(),
                    destination_port_range: RDP_PORT.to_string(),
                }],
            },
        )
        .await
        .map_err(|e| e.at_stage(Stage::SecurityPolicy, &policy))?;
    debug!(vm_name, %policy_id, "Security policy ready");

    let nic = interface_name(vm_name);
    let interface_id = provider
        .create_interface(
            &nic,
            &InterfaceSpec {
                location: location.to_string(),
                ip_configuration_name: format!("{}-ipconfig", vm_name),
                subnet_id: subnet_id.clone(),
                public_address_id: address_id.clone(),
                security_policy_id: policy_id.clone(),
            },
        )
        .await
        .map_err(|e| e.at_stage(Stage::Interface, &nic))?;

    info!(vm_name, %interface_id, "Network stack provisioned");

    Ok(NetworkStack {
        network_id,
        subnet_id,
        address_id,
        policy_id,
        interface_id,
    })
}

/// Fetch the allocated public IP for a VM's address resource.
pub async fn public_ip(provider: &dyn CloudProvider, vm_name: &str) -> Result<String> {
    let name = address_name(vm_name);
    let address = provider.get_public_address(&name).await?;
    address
        .ip_address
        .ok_or_else(|| ProviderError::Request(format!("No IP allocated for {}", name)))
}

/// Tear down the network stack for one VM in reverse dependency order.
///
/// Each delete tolerates "resource not found"; an already-deleted resource
/// counts as success so re-entrant teardown is a no-op.
pub async fn deprovision_network(provider: &dyn CloudProvider, vm_name: &str) -> Result<()> {
    info!(vm_name, "Deprovisioning network stack");

    tolerate_missing(provider.delete_interface(&interface_name(vm_name)).await)?;
    tolerate_missing(provider.delete_security_policy(&policy_name(vm_name)).await)?;
    tolerate_missing(provider.delete_public_address(&address_name(vm_name)).await)?;
    tolerate_missing(provider.delete_virtual_network(&vnet_name(vm_name)).await)?;

    Ok(())
}

/// Treat a not-found result as success.
pub(crate) fn tolerate_missing(result: Result<()>) -> Result<()> {
    match result {
        Err(ProviderError::NotFound(name)) => {
            debug!(%name, "Resource already absent, skipping");
            Ok(())
        }
        other => other,
    }
}

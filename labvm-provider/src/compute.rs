//! Compute provisioning stage: the virtual machine itself.
//!
//! Runs after the network stage and consumes the interface it produced. The
//! machine specification comes from a named install profile; an unknown
//! profile is rejected before any cloud call is made.

use base64::{engine::general_purpose::STANDARD, Engine};
use tracing::info;

use crate::error::{ProviderError, Result, Stage};
use crate::network::tolerate_missing;
use crate::profiles::ProfileRegistry;
use crate::{CloudProvider, MachineSpec};

/// Managed disk tier for sandbox OS disks.
const OS_DISK_TYPE: &str = "Standard_LRS";

/// Everything needed to build a machine spec for one student sandbox.
#[derive(Debug)]
pub struct MachineRequest<'a> {
    pub vm_name: &'a str,
    pub host_name: &'a str,
    pub interface_id: &'a str,
    pub profile: &'a str,
    pub location: &'a str,
    pub username: &'a str,
    pub password: &'a str,
}

/// Provision a machine bound to a prepared interface.
///
/// Synchronous-to-completion: the returned identifier refers to a machine
/// the provider reports as fully provisioned.
pub async fn provision_machine(
    provider: &dyn CloudProvider,
    profiles: &ProfileRegistry,
    request: &MachineRequest<'_>,
) -> Result<String> {
    let profile = profiles
        .get(request.profile)
        .ok_or_else(|| ProviderError::UnknownProfile(request.profile.to_string()))?;

    info!(
        vm_name = request.vm_name,
        profile = request.profile,
        username = request.username,
        "Provisioning machine"
    );

    let spec = MachineSpec {
        location: request.location.to_string(),
        machine_size: profile.machine_size.clone(),
        image: profile.image.clone(),
        os_disk_type: OS_DISK_TYPE.to_string(),
        computer_name: request.host_name.to_string(),
        admin_username: request.username.to_string(),
        admin_password: request.password.to_string(),
        custom_data: STANDARD.encode(profile.install_script.as_bytes()),
        interface_id: request.interface_id.to_string(),
    };

    let machine_id = provider
        .create_machine(request.vm_name, &spec)
        .await
        .map_err(|e| e.at_stage(Stage::Machine, request.vm_name))?;

    info!(vm_name = request.vm_name, %machine_id, "Machine provisioned");
    Ok(machine_id)
}

/// Delete a machine, treating "already gone" as success.
pub async fn deprovision_machine(provider: &dyn CloudProvider, vm_name: &str) -> Result<()> {
    info!(vm_name, "Deprovisioning machine");
    tolerate_missing(provider.delete_machine(vm_name).await)
}

//! TTL reaper: deferred teardown of expired sandboxes.
//!
//! The reaper owns no in-memory schedule. Every sweep re-reads the rows
//! whose `expires_at` has passed and tears them down, so a process restart
//! only needs the periodic task running again to pick up pending work.
//! Each teardown step tolerates "already gone", making duplicate or
//! re-entrant reaps no-ops.

use std::sync::Arc;

use chrono::Utc;
use sqlx::SqlitePool;
use tokio::time::{interval, Duration};
use tracing::{error, info, warn};

use labvm_provider::{deprovision_machine, deprovision_network, CloudProvider};

use crate::error::Result;
use crate::store::FleetStore;

/// Failed reaps are retried on later sweeps up to this many times, then
/// escalated to the operator log and skipped.
pub const MAX_REAP_ATTEMPTS: i64 = 5;

/// Periodic reaper task. Runs until the process exits.
pub async fn start_reaper_task(
    pool: SqlitePool,
    provider: Arc<dyn CloudProvider>,
    interval_secs: u64,
) {
    let store = FleetStore::new(pool);
    let mut interval = interval(Duration::from_secs(interval_secs));

    info!(
        "Reaper task running (checks every {} seconds)",
        interval_secs
    );

    loop {
        interval.tick().await;

        if let Err(e) = sweep_expired(&store, provider.as_ref()).await {
            error!("Reaper sweep failed: {}", e);
        }
    }
}

/// One sweep: reap every VM whose TTL has elapsed.
pub async fn sweep_expired(store: &FleetStore, provider: &dyn CloudProvider) -> Result<()> {
    let expired = store.list_expired(Utc::now()).await?;

    for vm in expired {
        info!(
            "TTL expired, reaping VM: {} ({})",
            vm.vm_name, vm.student_email
        );

        if let Err(e) = reap_vm(store, provider, &vm.vm_name).await {
            let attempts = store
                .bump_reap_attempts(&vm.vm_name)
                .await
                .unwrap_or(MAX_REAP_ATTEMPTS);

            if attempts >= MAX_REAP_ATTEMPTS {
                error!(
                    "Giving up on reaping {} after {} attempts, operator action required: {}",
                    vm.vm_name, attempts, e
                );
            } else {
                warn!(
                    "Reap failed for {} (attempt {}), will retry next sweep: {}",
                    vm.vm_name, attempts, e
                );
            }
        }
    }

    Ok(())
}

/// Tear down one VM and remove its record: machine, then network stack,
/// then the row. Everything is re-derived from the VM name, and every step
/// treats "not found" as success.
pub async fn reap_vm(
    store: &FleetStore,
    provider: &dyn CloudProvider,
    vm_name: &str,
) -> Result<()> {
    deprovision_machine(provider, vm_name).await?;
    deprovision_network(provider, vm_name).await?;

    if !store.delete_provisioned_vm(vm_name).await? {
        info!(%vm_name, "Record already removed");
    }

    Ok(())
}

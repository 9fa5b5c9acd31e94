//! Fleet approval: one approval event fans out one provisioning pipeline
//! per roster member.
//!
//! The approval flag is committed before fan-out begins, so re-approving the
//! same request can never provision a second fleet. Individual member
//! failures are collected into the outcome instead of aborting siblings; a
//! member whose compute step fails gets its partial network stack rolled
//! back immediately so nothing dangling survives the batch.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use uuid::Uuid;

use labvm_core::{derive, generate_password, host_name, DerivedIdentity};
use labvm_provider::{
    deprovision_machine, deprovision_network, provision_machine, provision_network, public_ip,
    CloudProvider, MachineRequest, ProfileRegistry,
};

use crate::error::{OrchestratorError, Result};
use crate::reaper;
use crate::store::{FleetStore, ProvisionedVm, VmRequest};

/// Fixed time-to-live for every provisioned sandbox.
const DEFAULT_TTL_SECS: i64 = 3 * 60 * 60;

/// Default bound on concurrent per-student pipelines. Keeps fan-out under
/// the control plane's rate limits.
const DEFAULT_MAX_CONCURRENCY: usize = 4;

#[derive(Debug, Clone)]
pub struct FleetConfig {
    /// Cloud region every resource is created in.
    pub location: String,
    pub ttl_secs: i64,
    pub max_concurrency: usize,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            location: "southeastasia".to_string(),
            ttl_secs: DEFAULT_TTL_SECS,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }
}

/// A single roster member's failure, reported alongside sibling successes.
#[derive(Debug, Clone, Serialize)]
pub struct MemberFailure {
    pub student_email: String,
    pub vm_name: String,
    pub error: String,
}

/// Aggregate result of one approval.
#[derive(Debug, Default, Serialize)]
pub struct FleetOutcome {
    pub created: Vec<ProvisionedVm>,
    pub failures: Vec<MemberFailure>,
}

impl FleetOutcome {
    /// True when some members succeeded and some failed.
    pub fn is_partial(&self) -> bool {
        !self.created.is_empty() && !self.failures.is_empty()
    }
}

#[derive(Clone)]
pub struct FleetOrchestrator {
    store: FleetStore,
    provider: Arc<dyn CloudProvider>,
    profiles: Arc<ProfileRegistry>,
    config: FleetConfig,
}

impl FleetOrchestrator {
    pub fn new(
        store: FleetStore,
        provider: Arc<dyn CloudProvider>,
        profiles: Arc<ProfileRegistry>,
        config: FleetConfig,
    ) -> Self {
        Self {
            store,
            provider,
            profiles,
            config,
        }
    }

    pub fn store(&self) -> &FleetStore {
        &self.store
    }

    /// Approve a pending request and provision one sandbox per roster member.
    ///
    /// Fails with `RequestNotActionable` when the request is missing or
    /// already approved, with `EmptyRoster` when the course has no members
    /// (the request stays unapproved so it can be retried), and with
    /// `FleetProvisioningFailed` when every member failed.
    pub async fn approve(&self, request_id: i64) -> Result<FleetOutcome> {
        let request = self
            .store
            .get_request(request_id)
            .await?
            .filter(|r| !r.is_approved)
            .ok_or(OrchestratorError::RequestNotActionable(request_id))?;

        let roster = self.store.list_roster(&request.course_name).await?;
        if roster.is_empty() {
            return Err(OrchestratorError::EmptyRoster(request.course_name));
        }

        // Reject an unknown profile before touching any state at all; every
        // member would fail on it anyway, but then the request would already
        // be burned.
        if !self.profiles.contains(&request.vm_profile) {
            return Err(OrchestratorError::Validation(format!(
                "Unknown VM profile: {}",
                request.vm_profile
            )));
        }

        // Sole double-approval guard. Losing this CAS means a concurrent
        // call got here first.
        if !self.store.mark_approved(request_id).await? {
            return Err(OrchestratorError::RequestNotActionable(request_id));
        }

        let run_id = Uuid::new_v4();
        info!(
            %run_id,
            request_id,
            course = %request.course_name,
            members = roster.len(),
            "Fleet approval accepted, starting fan-out"
        );

        let mut outcome = FleetOutcome::default();
        let mut claimed: HashSet<String> = HashSet::new();
        let mut accepted: Vec<(String, DerivedIdentity)> = Vec::new();

        // Every fallible pre-check runs before the first spawn; once
        // pipelines are in flight, nothing on this path returns early.
        for email in roster {
            let derived = derive(&email, &request.course_name);

            // Duplicate trailing digits collide by design; surface each
            // collision per student instead of overwriting.
            if !claimed.insert(derived.vm_name.clone())
                || self.store.vm_name_exists(&derived.vm_name).await?
            {
                warn!(%run_id, student = %email, vm_name = %derived.vm_name, "Derived VM name already taken");
                outcome.failures.push(MemberFailure {
                    student_email: email,
                    vm_name: derived.vm_name.clone(),
                    error: OrchestratorError::ResourceConflict(derived.vm_name).to_string(),
                });
                continue;
            }

            accepted.push((email, derived));
        }

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency));
        let mut tasks: JoinSet<(String, String, Result<ProvisionedVm>)> = JoinSet::new();

        for (email, derived) in accepted {
            let orchestrator = self.clone();
            let request = request.clone();
            let semaphore = Arc::clone(&semaphore);

            tasks.spawn(async move {
                // The semaphore is never closed, so acquisition only fails
                // if the whole run is being torn down.
                let _permit = semaphore.acquire_owned().await.ok();
                let vm_name = derived.vm_name.clone();
                let result = orchestrator.provision_member(&request, &email, derived).await;
                (email, vm_name, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let (email, vm_name, result) = match joined {
                Ok(res) => res,
                Err(e) => {
                    error!(%run_id, "Provisioning task panicked: {}", e);
                    continue;
                }
            };

            match result {
                Ok(vm) => outcome.created.push(vm),
                Err(e) => {
                    warn!(%run_id, student = %email, %vm_name, "Member provisioning failed: {}", e);
                    outcome.failures.push(MemberFailure {
                        student_email: email,
                        vm_name,
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            %run_id,
            created = outcome.created.len(),
            failed = outcome.failures.len(),
            "Fleet fan-out complete"
        );

        if outcome.created.is_empty() {
            return Err(OrchestratorError::FleetProvisioningFailed(
                outcome.failures.len(),
            ));
        }

        Ok(outcome)
    }

    /// Run the full pipeline for one roster member: network stack, machine,
    /// address lookup, persisted record.
    async fn provision_member(
        &self,
        request: &VmRequest,
        email: &str,
        derived: DerivedIdentity,
    ) -> Result<ProvisionedVm> {
        let vm_name = &derived.vm_name;
        let password = generate_password(&derived.identity);
        let computer_name = host_name(vm_name);

        let stack =
            provision_network(self.provider.as_ref(), vm_name, &self.config.location).await?;

        let machine = provision_machine(
            self.provider.as_ref(),
            &self.profiles,
            &MachineRequest {
                vm_name,
                host_name: &computer_name,
                interface_id: &stack.interface_id,
                profile: &request.vm_profile,
                location: &self.config.location,
                username: &derived.username,
                password: &password,
            },
        )
        .await;

        if let Err(e) = machine {
            self.rollback_member(vm_name).await;
            return Err(e.into());
        }

        let ip_address = match public_ip(self.provider.as_ref(), vm_name).await {
            Ok(ip) => ip,
            Err(e) => {
                self.rollback_member(vm_name).await;
                return Err(e.into());
            }
        };

        let now = Utc::now();
        let vm = ProvisionedVm {
            vm_name: vm_name.clone(),
            student_email: email.to_string(),
            course_name: request.course_name.clone(),
            vm_profile: request.vm_profile.clone(),
            ip_address,
            username: derived.username,
            password,
            created_at: now,
            expires_at: now + Duration::seconds(self.config.ttl_secs),
            reap_attempts: 0,
        };

        if let Err(e) = self.store.insert_provisioned_vm(&vm).await {
            match e {
                // A conflict slipping past the pre-check means another
                // pipeline owns this name. Creates are create-or-update, so
                // "our" resources are the winning record's resources; they
                // must stay up.
                OrchestratorError::ResourceConflict(_) => return Err(e),
                other => {
                    self.rollback_member(vm_name).await;
                    return Err(other);
                }
            }
        }

        info!(
            %vm_name,
            student = %email,
            ip = %vm.ip_address,
            expires_at = %vm.expires_at,
            "Sandbox provisioned"
        );

        Ok(vm)
    }

    /// Best-effort teardown of one member's partial work. Failures are
    /// logged; whatever survives is still reachable by an administrative
    /// cancel since all resource names derive from the VM name.
    async fn rollback_member(&self, vm_name: &str) {
        if let Err(e) = deprovision_machine(self.provider.as_ref(), vm_name).await {
            warn!(%vm_name, "Rollback: machine teardown failed: {}", e);
        }
        if let Err(e) = deprovision_network(self.provider.as_ref(), vm_name).await {
            warn!(%vm_name, "Rollback: network teardown failed: {}", e);
        }
    }

    /// Administrative early teardown of one sandbox. Removing the record is
    /// what cancels the pending reap, since the sweep only acts on stored
    /// rows. Every step tolerates "already gone", so racing the reaper is
    /// harmless.
    pub async fn cancel_vm(&self, vm_name: &str) -> Result<()> {
        info!(%vm_name, "Administrative cancel");
        reaper::reap_vm(&self.store, self.provider.as_ref(), vm_name).await
    }
}

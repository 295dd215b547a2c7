//! Branches and staff registration.

use std::sync::Arc;
use uuid::Uuid;

use crate::clock::Clock;
use crate::errors::LeadError;
use crate::models::{Branch, NewStaff, RegisterStaffRequest, Role, Staff};
use crate::store::{Store, UnitOfWork};

/// How many generated NIPs are tried before registration gives up.
pub const NIP_ATTEMPTS: usize = 5;

/// Produces candidate employee identifiers. Uniqueness is checked by the caller.
pub trait NipGenerator: Send + Sync {
    fn generate(&self) -> String;
}

/// `M` followed by ten digits drawn from UUID v4 randomness.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomNipGenerator;

impl NipGenerator for RandomNipGenerator {
    fn generate(&self) -> String {
        let digits = Uuid::new_v4().as_u128() % 10_000_000_000;
        format!("M{:010}", digits)
    }
}

/// Loads the acting staff member, failing with `NotFound` when the NIP is unknown.
pub(crate) async fn load_actor(uow: &mut dyn UnitOfWork, nip: &str) -> Result<Staff, LeadError> {
    uow.find_staff_by_nip(nip)
        .await?
        .ok_or_else(|| LeadError::NotFound(format!("staff {} not found", nip)))
}

pub(crate) fn require_role(actor: &Staff, role: Role, action: &str) -> Result<(), LeadError> {
    if actor.role != role {
        tracing::warn!(
            "Staff {} ({}) attempted to {} without the {} role",
            actor.nip,
            actor.role,
            action,
            role
        );
        return Err(LeadError::Authorization(format!(
            "only {} staff may {}",
            role, action
        )));
    }
    Ok(())
}

pub struct Directory {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    nip_generator: Arc<dyn NipGenerator>,
}

impl Directory {
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        nip_generator: Arc<dyn NipGenerator>,
    ) -> Self {
        Self {
            store,
            clock,
            nip_generator,
        }
    }

    /// Creates a branch. Admin only.
    pub async fn create_branch(&self, actor_nip: &str, name: &str) -> Result<Branch, LeadError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(LeadError::Validation("branch name is required".to_string()));
        }

        let mut uow = self.store.begin().await?;
        let actor = load_actor(uow.as_mut(), actor_nip).await?;
        require_role(&actor, Role::Admin, "create branches")?;

        let branch = uow.insert_branch(name, self.clock.now()).await?;
        uow.commit().await?;

        tracing::info!("Branch {} '{}' created by {}", branch.id, branch.name, actor.nip);
        Ok(branch)
    }

    pub async fn list_branches(&self) -> Result<Vec<Branch>, LeadError> {
        let mut uow = self.store.begin().await?;
        Ok(uow.list_branches().await?)
    }

    /// Looks a staff member up by NIP.
    pub async fn find_staff(&self, nip: &str) -> Result<Staff, LeadError> {
        let mut uow = self.store.begin().await?;
        load_actor(uow.as_mut(), nip).await
    }

    /// Registers a staff member under a freshly generated NIP. Admin only.
    ///
    /// Branch managers and marketing staff must belong to an existing branch.
    pub async fn register_staff(
        &self,
        actor_nip: &str,
        request: RegisterStaffRequest,
    ) -> Result<Staff, LeadError> {
        let name = request.name.trim().to_string();
        if name.is_empty() {
            return Err(LeadError::Validation("staff name is required".to_string()));
        }
        if request.role != Role::Admin && request.branch_id.is_none() {
            return Err(LeadError::Validation(format!(
                "{} staff must belong to a branch",
                request.role
            )));
        }

        let mut uow = self.store.begin().await?;
        let actor = load_actor(uow.as_mut(), actor_nip).await?;
        require_role(&actor, Role::Admin, "register staff")?;

        if let Some(branch_id) = request.branch_id {
            if uow.find_branch(branch_id).await?.is_none() {
                return Err(LeadError::NotFound(format!("branch {} not found", branch_id)));
            }
        }

        let nip = self.unused_nip(uow.as_mut()).await?;
        let staff = uow
            .insert_staff(
                &NewStaff {
                    nip,
                    name,
                    role: request.role,
                    branch_id: request.branch_id,
                },
                self.clock.now(),
            )
            .await?;
        uow.commit().await?;

        tracing::info!(
            "Registered {} {} in branch {:?}",
            staff.role,
            staff.nip,
            staff.branch_id
        );
        Ok(staff)
    }

    async fn unused_nip(&self, uow: &mut dyn UnitOfWork) -> Result<String, LeadError> {
        for attempt in 1..=NIP_ATTEMPTS {
            let candidate = self.nip_generator.generate();
            if uow.find_staff_by_nip(&candidate).await?.is_none() {
                return Ok(candidate);
            }
            tracing::debug!("NIP {} taken (attempt {})", candidate, attempt);
        }
        Err(LeadError::Conflict(format!(
            "could not generate an unused NIP after {} attempts",
            NIP_ATTEMPTS
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_nip_shape() {
        let generator = RandomNipGenerator;
        for _ in 0..50 {
            let nip = generator.generate();
            assert_eq!(nip.len(), 11);
            assert!(nip.starts_with('M'));
            assert!(nip[1..].chars().all(|c| c.is_ascii_digit()));
        }
    }
}

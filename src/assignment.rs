//! Lead assignment lifecycle.
//!
//! ```text
//! Unassigned -> New -> Contacted -> Closed
//!                 \         \----> Rejected
//!                  \-------------> Closed | Rejected
//! ```
//!
//! The first status update by a marketing staff member claims an unassigned lead. A lead
//! has at most one active assignment, and `Closed`/`Rejected` accept no further updates.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::clock::Clock;
use crate::directory::{load_actor, require_role};
use crate::errors::LeadError;
use crate::models::{AssignmentStatus, LeadAssignment, Role, StatusUpdateRequest};
use crate::store::Store;

/// Applies `request` to `current`, checking the transition and its payload.
pub fn apply_transition(
    current: &LeadAssignment,
    request: &StatusUpdateRequest,
    now: DateTime<Utc>,
) -> Result<LeadAssignment, LeadError> {
    if current.status.is_final() {
        return Err(LeadError::FinalState(format!(
            "assignment is already {}",
            current.status
        )));
    }

    let notes = request
        .notes
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string);

    let mut next = current.clone();
    match request.status {
        AssignmentStatus::New => {
            if current.status != AssignmentStatus::New {
                return Err(LeadError::Validation(format!(
                    "cannot move a {} lead back to new",
                    current.status
                )));
            }
        }
        AssignmentStatus::Contacted => {}
        AssignmentStatus::Closed => {
            let product_id = request.product_id.ok_or_else(|| {
                LeadError::Validation("closing requires product_id".to_string())
            })?;
            let amount = request
                .amount
                .filter(|a| *a > 0)
                .ok_or_else(|| LeadError::Validation("closing requires a positive amount".to_string()))?;
            next.product_id = Some(product_id);
            next.amount = Some(amount);
            next.closed_at = Some(now);
        }
        AssignmentStatus::Rejected => {
            if notes.is_none() {
                return Err(LeadError::Validation(
                    "rejecting requires notes".to_string(),
                ));
            }
        }
    }

    next.status = request.status;
    if notes.is_some() {
        next.notes = notes;
    }
    next.updated_at = now;
    Ok(next)
}

pub struct LeadAssignmentStateMachine {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
}

impl LeadAssignmentStateMachine {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Moves the acting marketing staff member's assignment of `cif` to a new status,
    /// creating the assignment if the lead is still unassigned.
    pub async fn update_status(
        &self,
        actor_nip: &str,
        cif: &str,
        request: StatusUpdateRequest,
    ) -> Result<LeadAssignment, LeadError> {
        let mut uow = self.store.begin().await?;
        let actor = load_actor(uow.as_mut(), actor_nip).await?;
        require_role(&actor, Role::Marketing, "work leads")?;

        let lead = uow
            .lock_lead_by_cif(cif)
            .await?
            .ok_or_else(|| LeadError::NotFound(format!("lead {} not found", cif)))?;

        let now = self.clock.now();
        let current = match uow.active_assignment(lead.id).await? {
            Some(existing) if existing.staff_id != actor.id => {
                tracing::warn!(
                    "Staff {} tried to update lead {} assigned to staff id {}",
                    actor.nip,
                    cif,
                    existing.staff_id
                );
                return Err(LeadError::Conflict(format!(
                    "lead {} already assigned to another staff member",
                    cif
                )));
            }
            Some(existing) => existing,
            None => {
                let created = uow.insert_assignment(lead.id, actor.id, now).await?;
                tracing::info!("Lead {} claimed by {}", cif, actor.nip);
                created
            }
        };

        let next = apply_transition(&current, &request, now)?;

        if let (AssignmentStatus::Closed, Some(product_id)) = (next.status, next.product_id) {
            if uow.find_product(product_id).await?.is_none() {
                return Err(LeadError::NotFound(format!(
                    "product {} not found",
                    product_id
                )));
            }
        }

        uow.update_assignment(&next).await?;
        uow.commit().await?;

        tracing::info!(
            "Lead {} moved {} -> {} by {}",
            cif,
            current.status,
            next.status,
            actor.nip
        );
        Ok(next)
    }
}

//! Target allocation: yearly branch targets, their monthly split, and per-marketing quotas.
//!
//! Branch managers set an annual amount per product, which is split evenly over twelve
//! monthly rows, and then hand out slices of each monthly row to their marketing staff.
//! The slices of one monthly row never add up to more than the row itself.

use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;

use crate::directory::{load_actor, require_role};
use crate::errors::LeadError;
use crate::models::{
    AnnualTarget, AnnualTargetQuery, AnnualTargetRequest, MarketingTarget,
    MarketingTargetRequest, Period, ProductAmount, Role, Staff,
};
use crate::store::{Store, UnitOfWork};

/// Earliest year a target can be set for.
pub const MIN_TARGET_YEAR: i32 = 2024;

/// Monthly share of an annual amount. The remainder of the division is not redistributed.
pub fn monthly_split(annual_amount: i64) -> i64 {
    annual_amount / 12
}

/// Allocation state of one product for a branch and month.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductAllocation {
    pub product_id: i64,
    pub product_code: String,
    pub total_target: i64,
    pub assigned_amount: i64,
    pub unassigned_amount: i64,
}

fn validate_items(items: &[ProductAmount]) -> Result<(), LeadError> {
    if items.is_empty() {
        return Err(LeadError::Validation(
            "at least one product target is required".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    for item in items {
        if item.amount < 0 {
            return Err(LeadError::Validation(format!(
                "amount for product {} cannot be negative",
                item.product_id
            )));
        }
        if !seen.insert(item.product_id) {
            return Err(LeadError::Validation(format!(
                "product {} appears more than once",
                item.product_id
            )));
        }
    }
    Ok(())
}

fn validate_year(year: i32) -> Result<(), LeadError> {
    if year < MIN_TARGET_YEAR {
        return Err(LeadError::Validation(format!(
            "year must be {} or later",
            MIN_TARGET_YEAR
        )));
    }
    Ok(())
}

async fn require_product(uow: &mut dyn UnitOfWork, product_id: i64) -> Result<String, LeadError> {
    uow.find_product(product_id)
        .await?
        .map(|p| p.code)
        .ok_or_else(|| LeadError::NotFound(format!("product {} not found", product_id)))
}

pub struct TargetAllocator {
    store: Arc<dyn Store>,
}

impl TargetAllocator {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Upserts the annual target and its twelve monthly rows for every product in the
    /// request, all in one transaction.
    ///
    /// The branch defaults to the actor's own branch. The actor must be the manager of that
    /// branch.
    pub async fn set_annual_targets(
        &self,
        actor_nip: &str,
        request: AnnualTargetRequest,
    ) -> Result<Vec<AnnualTarget>, LeadError> {
        validate_year(request.year)?;
        validate_items(&request.targets)?;

        let mut uow = self.store.begin().await?;
        let actor = load_actor(uow.as_mut(), actor_nip).await?;

        let branch_id = request.branch_id.or(actor.branch_id).ok_or_else(|| {
            LeadError::Validation("branch_id is required for staff without a branch".to_string())
        })?;
        if uow.find_branch(branch_id).await?.is_none() {
            return Err(LeadError::NotFound(format!("branch {} not found", branch_id)));
        }
        if !actor.manages(branch_id) {
            tracing::warn!(
                "Staff {} tried to set targets for branch {} they do not manage",
                actor.nip,
                branch_id
            );
            return Err(LeadError::Validation(format!(
                "only the branch manager of branch {} may set its targets",
                branch_id
            )));
        }

        let mut saved = Vec::with_capacity(request.targets.len());
        for item in &request.targets {
            require_product(uow.as_mut(), item.product_id).await?;

            let annual = uow
                .upsert_annual_target(branch_id, item.product_id, request.year, item.amount)
                .await?;

            let monthly_amount = monthly_split(item.amount);
            for month in 1..=12 {
                uow.upsert_monthly_target(&annual, month, monthly_amount)
                    .await?;
            }

            saved.push(annual);
        }

        uow.commit().await?;

        tracing::info!(
            "Branch {} annual targets for {} set by {} ({} products)",
            branch_id,
            request.year,
            actor.nip,
            saved.len()
        );
        Ok(saved)
    }

    /// Annual targets of a branch for one year, ordered by product.
    ///
    /// Branch managers read their own branch. Admins must name the branch.
    pub async fn annual_targets(
        &self,
        actor_nip: &str,
        query: AnnualTargetQuery,
    ) -> Result<Vec<AnnualTarget>, LeadError> {
        let mut uow = self.store.begin().await?;
        let actor = load_actor(uow.as_mut(), actor_nip).await?;

        let branch_id = match actor.role {
            Role::Admin => query.branch_id.ok_or_else(|| {
                LeadError::Validation("branch_id is required for admins".to_string())
            })?,
            Role::BranchManager => {
                let own = actor.branch_id.ok_or_else(|| {
                    LeadError::Authorization(format!(
                        "staff {} is not attached to a branch",
                        actor.nip
                    ))
                })?;
                if query.branch_id.is_some_and(|requested| requested != own) {
                    return Err(LeadError::Authorization(format!(
                        "staff {} may only read targets of branch {}",
                        actor.nip, own
                    )));
                }
                own
            }
            Role::Marketing => {
                tracing::warn!("Staff {} attempted to read annual targets", actor.nip);
                return Err(LeadError::Authorization(
                    "only branch managers and admins may read annual targets".to_string(),
                ));
            }
        };

        if uow.find_branch(branch_id).await?.is_none() {
            return Err(LeadError::NotFound(format!("branch {} not found", branch_id)));
        }
        Ok(uow.annual_targets(branch_id, query.year).await?)
    }

    /// Assigns slices of the branch's monthly targets to one marketing staff member.
    ///
    /// Re-assigning a product replaces the staff member's previous slice. If any product
    /// would push the monthly row over its cap the whole batch is rejected.
    pub async fn assign_marketing_targets(
        &self,
        actor_nip: &str,
        staff_nip: &str,
        request: MarketingTargetRequest,
    ) -> Result<Vec<MarketingTarget>, LeadError> {
        let period = Period::new(request.year, request.month).map_err(LeadError::Validation)?;
        validate_year(period.year)?;
        validate_items(&request.targets)?;

        let mut uow = self.store.begin().await?;
        let actor = load_actor(uow.as_mut(), actor_nip).await?;
        let staff = load_actor(uow.as_mut(), staff_nip).await?;
        let branch_id = authorize_assignment(&actor, &staff)?;

        let mut saved = Vec::with_capacity(request.targets.len());
        for item in &request.targets {
            let monthly = uow
                .lock_monthly_target(branch_id, item.product_id, period)
                .await?
                .ok_or_else(|| {
                    LeadError::NotFound(format!(
                        "branch has not set a monthly target for product {} in {}",
                        item.product_id, period
                    ))
                })?;

            let current = uow
                .sum_marketing_targets(monthly.id, Some(staff.id))
                .await?;

            if current + item.amount > monthly.amount {
                tracing::warn!(
                    "Rejected target for {} product {} in {}: {} already assigned, {} requested, cap {}",
                    staff.nip,
                    item.product_id,
                    period,
                    current,
                    item.amount,
                    monthly.amount
                );
                return Err(LeadError::CapacityExceeded(format!(
                    "product {} in {}: {} already assigned, {} requested, monthly target is {}",
                    item.product_id, period, current, item.amount, monthly.amount
                )));
            }

            saved.push(
                uow.upsert_marketing_target(&monthly, staff.id, item.amount)
                    .await?,
            );
        }

        uow.commit().await?;

        tracing::info!(
            "Assigned {} product targets to {} for {} (by {})",
            saved.len(),
            staff.nip,
            period,
            actor.nip
        );
        Ok(saved)
    }

    /// Per product: the branch's monthly target, how much of it is handed out, and the rest.
    pub async fn branch_allocation(
        &self,
        actor_nip: &str,
        period: Period,
    ) -> Result<Vec<ProductAllocation>, LeadError> {
        let mut uow = self.store.begin().await?;
        let actor = load_actor(uow.as_mut(), actor_nip).await?;
        require_role(&actor, Role::BranchManager, "view branch allocation")?;
        let branch_id = actor.branch_id.ok_or_else(|| {
            LeadError::Authorization(format!("staff {} is not attached to a branch", actor.nip))
        })?;

        let monthly = uow.monthly_targets(branch_id, period).await?;
        let assigned = uow.marketing_target_totals(branch_id, period).await?;

        let mut rows = Vec::with_capacity(monthly.len());
        for target in monthly {
            let product_code = require_product(uow.as_mut(), target.product_id).await?;
            let assigned_amount = assigned
                .iter()
                .find(|t| t.product_id == target.product_id)
                .map(|t| t.amount)
                .unwrap_or(0);

            rows.push(ProductAllocation {
                product_id: target.product_id,
                product_code,
                total_target: target.amount,
                assigned_amount,
                unassigned_amount: (target.amount - assigned_amount).max(0),
            });
        }

        Ok(rows)
    }
}

/// The actor must manage the branch the marketing staff member belongs to.
fn authorize_assignment(actor: &Staff, staff: &Staff) -> Result<i64, LeadError> {
    require_role(actor, Role::BranchManager, "assign marketing targets")?;

    if staff.role != Role::Marketing {
        return Err(LeadError::Validation(format!(
            "targets can only be assigned to marketing staff, {} is {}",
            staff.nip, staff.role
        )));
    }

    match (actor.branch_id, staff.branch_id) {
        (Some(own), Some(theirs)) if own == theirs => Ok(own),
        _ => {
            tracing::warn!(
                "Staff {} tried to assign targets to {} outside their branch",
                actor.nip,
                staff.nip
            );
            Err(LeadError::Authorization(format!(
                "staff {} is not in your branch",
                staff.nip
            )))
        }
    }
}

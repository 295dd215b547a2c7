//! Lead intake: validation, prediction, ranking and eligibility, stored atomically.

use moka::future::Cache;
use phonenumber::country::Id as CountryId;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;
use crate::directory::{load_actor, require_role};
use crate::errors::LeadError;
use crate::models::{
    AssignedLead, AssignedLeadQuery, AssignmentStatus, Lead, LeadDetail, NewLead,
    NewLeadRequest, RecommendedProduct, Role,
};
use crate::plafond::{compute_envelope, Plafond};
use crate::prediction::{rank_scores, PredictionOracle};
use crate::store::{LeadKey, Store};
use crate::validation::validate_new_lead;

pub const DEFAULT_LIST_LIMIT: i64 = 50;
pub const MAX_LIST_LIMIT: i64 = 200;

/// How long an intake may hold its CIF before another intake of the same CIF is let in.
const IN_FLIGHT_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy)]
pub struct IntakeSettings {
    pub recommendation_limit: usize,
    pub phone_region: CountryId,
}

impl Default for IntakeSettings {
    fn default() -> Self {
        Self {
            recommendation_limit: 3,
            phone_region: CountryId::ID,
        }
    }
}

/// Statuses listed for a marketer when no status filter is given.
const ACTIVE_STATUSES: [AssignmentStatus; 4] = [
    AssignmentStatus::New,
    AssignmentStatus::Contacted,
    AssignmentStatus::Rejected,
    AssignmentStatus::Closed,
];

/// Marks a CIF as being processed by one intake.
#[derive(Debug)]
struct InFlight {
    started_at: i64,
    active: AtomicBool,
}

impl InFlight {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

/// Deactivates its claim when dropped, so a cancelled intake frees the CIF at once.
struct ClaimRelease(Arc<InFlight>);

impl Drop for ClaimRelease {
    fn drop(&mut self) {
        self.0.active.store(false, Ordering::Release);
    }
}

pub struct LeadIntake {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    oracle: Arc<dyn PredictionOracle>,
    settings: IntakeSettings,
    /// CIF -> claim of the intake processing it. Inactive claims are stale and replaceable.
    in_flight: Cache<String, Arc<InFlight>>,
}

/// Converts an envelope into the nullable columns of a recommendation.
/// Tenor bounds are left empty for products without a tenor.
fn envelope_columns(plafond: &Plafond) -> (Option<i64>, Option<i64>, Option<i32>, Option<i32>) {
    let money = |v: u64| Some(i64::try_from(v).unwrap_or(i64::MAX));
    let tenor = |v: u32| (plafond.max_tenor > 0).then(|| i32::try_from(v).unwrap_or(i32::MAX));
    (
        money(plafond.min_limit),
        money(plafond.max_limit),
        tenor(plafond.min_tenor),
        tenor(plafond.max_tenor),
    )
}

impl LeadIntake {
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        oracle: Arc<dyn PredictionOracle>,
        settings: IntakeSettings,
    ) -> Self {
        let in_flight = Cache::builder()
            .time_to_live(IN_FLIGHT_TTL)
            .max_capacity(10_000)
            .build();

        Self {
            store,
            clock,
            oracle,
            settings,
            in_flight,
        }
    }

    /// Validates and scores a new lead, then stores it with its ranked recommendations.
    ///
    /// The prediction call finishes before the transaction opens.
    pub async fn create_lead(&self, request: NewLeadRequest) -> Result<LeadDetail, LeadError> {
        let lead = validate_new_lead(request, self.settings.phone_region)?;
        let cif = lead.cif.clone();

        let claim = Arc::new(InFlight {
            started_at: self.clock.now().timestamp(),
            active: AtomicBool::new(true),
        });
        let candidate = claim.clone();
        let entry = self
            .in_flight
            .entry(cif.clone())
            .or_insert_with_if(async move { candidate }, |holder| !holder.is_active())
            .await;
        if !entry.is_fresh() {
            tracing::warn!(
                "Duplicate intake blocked: CIF {} already being processed since {}",
                cif,
                entry.value().started_at
            );
            return Err(LeadError::Conflict(format!(
                "lead {} is already being processed",
                cif
            )));
        }
        let _release = ClaimRelease(claim);

        let result = self.score_and_store(lead).await;
        self.in_flight.invalidate(&cif).await;
        result
    }

    async fn score_and_store(&self, lead: NewLead) -> Result<LeadDetail, LeadError> {
        let scores = self.oracle.predict(&lead).await?;
        let ranked = rank_scores(&scores, self.settings.recommendation_limit);
        tracing::debug!("Ranked products for CIF {}: {:?}", lead.cif, ranked);

        let mut uow = self.store.begin().await?;

        let unique_keys = [
            (LeadKey::Cif, Some(lead.cif.as_str())),
            (LeadKey::AccountNumber, Some(lead.account_number.as_str())),
            (LeadKey::Email, lead.email.as_deref()),
            (LeadKey::Phone, lead.phone.as_deref()),
        ];
        for (key, value) in unique_keys {
            if let Some(value) = value {
                if uow.lead_key_taken(key, value).await? {
                    return Err(LeadError::Conflict(format!(
                        "a lead with this {} already exists",
                        key.as_str()
                    )));
                }
            }
        }

        let stored = uow.insert_lead(&lead, self.clock.now()).await?;
        let age = u32::try_from(stored.age).unwrap_or(0);

        let mut recommendations = Vec::with_capacity(ranked.len());
        for (index, (code, score)) in ranked.into_iter().enumerate() {
            let product = uow.find_product_by_code(&code).await?.ok_or_else(|| {
                LeadError::NotFound(format!("product '{}' is not in the catalog", code))
            })?;

            let plafond =
                compute_envelope(&product.code, age, stored.monthly_income, stored.payroll);
            let (min_limit, max_limit, min_tenor, max_tenor) = envelope_columns(&plafond);

            let recommendation = RecommendedProduct {
                lead_id: stored.id,
                product_id: product.id,
                product_code: product.code,
                rank: i32::try_from(index + 1).unwrap_or(i32::MAX),
                score,
                min_limit,
                max_limit,
                min_tenor,
                max_tenor,
            };
            uow.insert_recommendation(&recommendation).await?;
            recommendations.push(recommendation);
        }

        uow.commit().await?;

        tracing::info!(
            "Lead {} created with {} recommended products",
            stored.cif,
            recommendations.len()
        );

        Ok(LeadDetail {
            lead: stored,
            recommendations,
            assignment: None,
        })
    }

    /// Lead with its recommendations and current assignment.
    ///
    /// Marketing staff only. A lead someone else has claimed reads as not found.
    pub async fn get_lead(&self, actor_nip: &str, cif: &str) -> Result<LeadDetail, LeadError> {
        let mut uow = self.store.begin().await?;
        let actor = load_actor(uow.as_mut(), actor_nip).await?;
        require_role(&actor, Role::Marketing, "view lead details")?;

        let not_found = || LeadError::NotFound(format!("lead {} not found or not yours", cif));
        let lead = uow.find_lead_by_cif(cif).await?.ok_or_else(not_found)?;
        let assignment = uow.active_assignment(lead.id).await?;
        if assignment.as_ref().is_some_and(|a| a.staff_id != actor.id) {
            return Err(not_found());
        }
        let recommendations = uow.recommendations_for(lead.id).await?;

        Ok(LeadDetail {
            lead,
            recommendations,
            assignment,
        })
    }

    /// Leads nobody has claimed yet, oldest first. Marketing staff only.
    pub async fn list_unassigned(
        &self,
        actor_nip: &str,
        limit: Option<i64>,
    ) -> Result<Vec<Lead>, LeadError> {
        let limit = limit
            .unwrap_or(DEFAULT_LIST_LIMIT)
            .clamp(1, MAX_LIST_LIMIT);

        let mut uow = self.store.begin().await?;
        let actor = load_actor(uow.as_mut(), actor_nip).await?;
        require_role(&actor, Role::Marketing, "list unassigned leads")?;

        Ok(uow.list_unassigned_leads(limit).await?)
    }

    /// Leads the marketer has claimed, most recently updated first.
    pub async fn list_assigned(
        &self,
        actor_nip: &str,
        query: AssignedLeadQuery,
    ) -> Result<Vec<AssignedLead>, LeadError> {
        let limit = query
            .limit
            .unwrap_or(DEFAULT_LIST_LIMIT)
            .clamp(1, MAX_LIST_LIMIT);
        let statuses = match query.status {
            Some(status) => vec![status],
            None => ACTIVE_STATUSES.to_vec(),
        };
        let search = query
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());

        let mut uow = self.store.begin().await?;
        let actor = load_actor(uow.as_mut(), actor_nip).await?;
        require_role(&actor, Role::Marketing, "list assigned leads")?;

        Ok(uow
            .assigned_leads(actor.id, &statuses, search, limit)
            .await?)
    }
}

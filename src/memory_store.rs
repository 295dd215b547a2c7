//! In-process [`Store`] used by tests and local demos.
//!
//! Units of work run one at a time: `begin` takes an owned lock on the shared state and
//! clones it into a working copy. Writes land in the copy, `commit` publishes it and a drop
//! simply discards it. This gives serializable isolation, which subsumes the row locks the
//! Postgres backend takes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::models::{
    AnnualTarget, AssignedLead, AssignmentStatus, Branch, Closing, ClosingScope, Lead,
    LeadAssignment, MarketingTarget, MonthlyTarget, NewLead, NewStaff, Period, Product,
    ProductTotal, RecommendedProduct, Role, Staff,
};
use crate::store::{LeadKey, Store, StoreError, UnitOfWork};

/// Product catalog every fresh store starts with, mirroring the migration seed.
pub const SEED_PRODUCTS: [(&str, &str); 6] = [
    ("mitraguna", "Mitraguna"),
    ("pensiun", "Pensiun"),
    ("prapensiun", "Prapensiun"),
    ("griya", "Griya"),
    ("oto", "Oto"),
    ("hasanahcard", "Hasanah Card"),
];

#[derive(Debug, Clone, Default)]
struct State {
    next_id: i64,
    branches: Vec<Branch>,
    staff: Vec<Staff>,
    products: Vec<Product>,
    leads: Vec<Lead>,
    recommendations: Vec<RecommendedProduct>,
    assignments: Vec<LeadAssignment>,
    annual_targets: Vec<AnnualTarget>,
    monthly_targets: Vec<MonthlyTarget>,
    marketing_targets: Vec<MarketingTarget>,
}

impl State {
    fn seeded() -> Self {
        let mut state = State::default();
        for (code, name) in SEED_PRODUCTS {
            let id = state.allocate_id();
            state.products.push(Product {
                id,
                code: code.to_string(),
                name: name.to_string(),
            });
        }
        state
    }

    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn staff_branch(&self, staff_id: i64) -> Option<i64> {
        self.staff
            .iter()
            .find(|s| s.id == staff_id)
            .and_then(|s| s.branch_id)
    }

    fn in_scope(&self, scope: ClosingScope, staff_id: i64) -> bool {
        match scope {
            ClosingScope::Staff(id) => staff_id == id,
            ClosingScope::Branch(branch_id) => self.staff_branch(staff_id) == Some(branch_id),
        }
    }
}

/// Case-insensitive substring match over the searchable lead columns.
fn lead_matches(lead: &Lead, needle: &str) -> bool {
    let fields = [
        Some(lead.cif.as_str()),
        Some(lead.account_number.as_str()),
        Some(lead.name.as_str()),
        lead.phone.as_deref(),
        lead.email.as_deref(),
        lead.job.as_deref(),
        lead.address.as_deref(),
    ];
    fields
        .into_iter()
        .flatten()
        .any(|field| field.to_lowercase().contains(needle))
}

/// Shared in-memory store. Cloning shares the same underlying state.
#[derive(Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Empty store with the standard product catalog.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::seeded())),
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryUnitOfWork { guard, working }))
    }
}

struct MemoryUnitOfWork {
    guard: OwnedMutexGuard<State>,
    working: State,
}

fn totals(rows: impl Iterator<Item = (i64, i64)>) -> Vec<ProductTotal> {
    let mut by_product: BTreeMap<i64, i64> = BTreeMap::new();
    for (product_id, amount) in rows {
        *by_product.entry(product_id).or_insert(0) += amount;
    }
    by_product
        .into_iter()
        .map(|(product_id, amount)| ProductTotal { product_id, amount })
        .collect()
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn find_branch(&mut self, branch_id: i64) -> Result<Option<Branch>, StoreError> {
        Ok(self
            .working
            .branches
            .iter()
            .find(|b| b.id == branch_id)
            .cloned())
    }

    async fn insert_branch(
        &mut self,
        name: &str,
        created_at: DateTime<Utc>,
    ) -> Result<Branch, StoreError> {
        let branch = Branch {
            id: self.working.allocate_id(),
            name: name.to_string(),
            created_at,
        };
        self.working.branches.push(branch.clone());
        Ok(branch)
    }

    async fn list_branches(&mut self) -> Result<Vec<Branch>, StoreError> {
        Ok(self.working.branches.clone())
    }

    async fn find_staff_by_nip(&mut self, nip: &str) -> Result<Option<Staff>, StoreError> {
        Ok(self.working.staff.iter().find(|s| s.nip == nip).cloned())
    }

    async fn insert_staff(
        &mut self,
        staff: &NewStaff,
        created_at: DateTime<Utc>,
    ) -> Result<Staff, StoreError> {
        if self.working.staff.iter().any(|s| s.nip == staff.nip) {
            return Err(StoreError::UniqueViolation("staff_nip_key".to_string()));
        }
        let row = Staff {
            id: self.working.allocate_id(),
            nip: staff.nip.clone(),
            name: staff.name.clone(),
            role: staff.role,
            branch_id: staff.branch_id,
            created_at,
        };
        self.working.staff.push(row.clone());
        Ok(row)
    }

    async fn list_staff_in_branch(
        &mut self,
        branch_id: i64,
        role: Role,
    ) -> Result<Vec<Staff>, StoreError> {
        let mut staff: Vec<Staff> = self
            .working
            .staff
            .iter()
            .filter(|s| s.branch_id == Some(branch_id) && s.role == role)
            .cloned()
            .collect();
        staff.sort_by(|a, b| a.nip.cmp(&b.nip));
        Ok(staff)
    }

    async fn find_product(&mut self, product_id: i64) -> Result<Option<Product>, StoreError> {
        Ok(self
            .working
            .products
            .iter()
            .find(|p| p.id == product_id)
            .cloned())
    }

    async fn find_product_by_code(&mut self, code: &str) -> Result<Option<Product>, StoreError> {
        Ok(self
            .working
            .products
            .iter()
            .find(|p| p.code.eq_ignore_ascii_case(code))
            .cloned())
    }

    async fn list_products(&mut self) -> Result<Vec<Product>, StoreError> {
        let mut products = self.working.products.clone();
        products.sort_by_key(|p| p.id);
        Ok(products)
    }

    async fn find_lead_by_cif(&mut self, cif: &str) -> Result<Option<Lead>, StoreError> {
        Ok(self.working.leads.iter().find(|l| l.cif == cif).cloned())
    }

    async fn lock_lead_by_cif(&mut self, cif: &str) -> Result<Option<Lead>, StoreError> {
        self.find_lead_by_cif(cif).await
    }

    async fn lead_key_taken(&mut self, key: LeadKey, value: &str) -> Result<bool, StoreError> {
        Ok(self.working.leads.iter().any(|lead| match key {
            LeadKey::Cif => lead.cif == value,
            LeadKey::AccountNumber => lead.account_number == value,
            LeadKey::Email => lead.email.as_deref() == Some(value),
            LeadKey::Phone => lead.phone.as_deref() == Some(value),
        }))
    }

    async fn insert_lead(
        &mut self,
        lead: &NewLead,
        created_at: DateTime<Utc>,
    ) -> Result<Lead, StoreError> {
        if self.working.leads.iter().any(|l| l.cif == lead.cif) {
            return Err(StoreError::UniqueViolation("leads_cif_key".to_string()));
        }
        let row = Lead {
            id: self.working.allocate_id(),
            cif: lead.cif.clone(),
            account_number: lead.account_number.clone(),
            name: lead.name.clone(),
            company_name: lead.company_name.clone(),
            phone: lead.phone.clone(),
            email: lead.email.clone(),
            age: lead.age,
            monthly_income: lead.monthly_income,
            payroll: lead.payroll,
            gender: lead.gender.clone(),
            married: lead.married,
            segment: lead.segment.clone(),
            job: lead.job.clone(),
            address: lead.address.clone(),
            existing_products: lead.existing_products.clone(),
            transaction_activity: lead.transaction_activity,
            created_at,
        };
        self.working.leads.push(row.clone());
        Ok(row)
    }

    async fn insert_recommendation(
        &mut self,
        recommendation: &RecommendedProduct,
    ) -> Result<(), StoreError> {
        let duplicate = self.working.recommendations.iter().any(|r| {
            r.lead_id == recommendation.lead_id && r.product_id == recommendation.product_id
        });
        if duplicate {
            return Err(StoreError::UniqueViolation(
                "lead_products_lead_id_product_id_key".to_string(),
            ));
        }
        self.working.recommendations.push(recommendation.clone());
        Ok(())
    }

    async fn recommendations_for(
        &mut self,
        lead_id: i64,
    ) -> Result<Vec<RecommendedProduct>, StoreError> {
        let mut rows: Vec<RecommendedProduct> = self
            .working
            .recommendations
            .iter()
            .filter(|r| r.lead_id == lead_id)
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.rank);
        Ok(rows)
    }

    async fn list_unassigned_leads(&mut self, limit: i64) -> Result<Vec<Lead>, StoreError> {
        let assigned: Vec<i64> = self.working.assignments.iter().map(|a| a.lead_id).collect();
        Ok(self
            .working
            .leads
            .iter()
            .filter(|l| !assigned.contains(&l.id))
            .take(usize::try_from(limit.max(0)).unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    async fn assigned_leads(
        &mut self,
        staff_id: i64,
        statuses: &[AssignmentStatus],
        search: Option<&str>,
        limit: i64,
    ) -> Result<Vec<AssignedLead>, StoreError> {
        let needle = search.map(str::to_lowercase);
        let mut rows: Vec<AssignedLead> = self
            .working
            .assignments
            .iter()
            .filter(|a| a.staff_id == staff_id && statuses.contains(&a.status))
            .filter_map(|a| {
                let lead = self.working.leads.iter().find(|l| l.id == a.lead_id)?;
                let matched = needle.as_deref().map_or(true, |n| lead_matches(lead, n));
                matched.then(|| AssignedLead {
                    lead: lead.clone(),
                    assignment: a.clone(),
                })
            })
            .collect();
        rows.sort_by(|a, b| {
            b.assignment
                .updated_at
                .cmp(&a.assignment.updated_at)
                .then(b.assignment.id.cmp(&a.assignment.id))
        });
        rows.truncate(usize::try_from(limit.max(0)).unwrap_or(usize::MAX));
        Ok(rows)
    }

    async fn active_assignment(
        &mut self,
        lead_id: i64,
    ) -> Result<Option<LeadAssignment>, StoreError> {
        Ok(self
            .working
            .assignments
            .iter()
            .find(|a| a.lead_id == lead_id)
            .cloned())
    }

    async fn insert_assignment(
        &mut self,
        lead_id: i64,
        staff_id: i64,
        created_at: DateTime<Utc>,
    ) -> Result<LeadAssignment, StoreError> {
        if self.working.assignments.iter().any(|a| a.lead_id == lead_id) {
            return Err(StoreError::UniqueViolation(
                "lead_assignments_active_lead_idx".to_string(),
            ));
        }
        let row = LeadAssignment {
            id: self.working.allocate_id(),
            lead_id,
            staff_id,
            status: AssignmentStatus::New,
            product_id: None,
            amount: None,
            notes: None,
            created_at,
            updated_at: created_at,
            closed_at: None,
        };
        self.working.assignments.push(row.clone());
        Ok(row)
    }

    async fn update_assignment(&mut self, assignment: &LeadAssignment) -> Result<(), StoreError> {
        let row = self
            .working
            .assignments
            .iter_mut()
            .find(|a| a.id == assignment.id)
            .ok_or_else(|| StoreError::Corrupt(format!("assignment {} vanished", assignment.id)))?;
        *row = assignment.clone();
        Ok(())
    }

    async fn closed_totals(
        &mut self,
        scope: ClosingScope,
        period: Period,
    ) -> Result<Vec<ProductTotal>, StoreError> {
        let state = &self.working;
        let rows = state.assignments.iter().filter_map(|a| {
            let closed_in_period = a.closed_at.is_some_and(|at| period.contains(at));
            if a.status == AssignmentStatus::Closed
                && state.in_scope(scope, a.staff_id)
                && closed_in_period
            {
                Some((a.product_id?, a.amount.unwrap_or(0)))
            } else {
                None
            }
        });
        Ok(totals(rows))
    }

    async fn closings(
        &mut self,
        scope: ClosingScope,
        product_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Closing>, StoreError> {
        let state = &self.working;
        let mut rows: Vec<Closing> = state
            .assignments
            .iter()
            .filter(|a| a.status == AssignmentStatus::Closed && a.product_id == Some(product_id))
            .filter(|a| state.in_scope(scope, a.staff_id))
            .filter_map(|a| {
                let closed_at = a.closed_at.filter(|at| *at >= from && *at < to)?;
                Some(Closing {
                    staff_id: a.staff_id,
                    product_id,
                    amount: a.amount?,
                    closed_at,
                })
            })
            .collect();
        rows.sort_by_key(|c| c.closed_at);
        Ok(rows)
    }

    async fn upsert_annual_target(
        &mut self,
        branch_id: i64,
        product_id: i64,
        year: i32,
        amount: i64,
    ) -> Result<AnnualTarget, StoreError> {
        if let Some(row) = self.working.annual_targets.iter_mut().find(|t| {
            t.branch_id == branch_id && t.product_id == product_id && t.year == year
        }) {
            row.amount = amount;
            return Ok(row.clone());
        }
        let row = AnnualTarget {
            id: self.working.allocate_id(),
            branch_id,
            product_id,
            year,
            amount,
        };
        self.working.annual_targets.push(row.clone());
        Ok(row)
    }

    async fn annual_targets(
        &mut self,
        branch_id: i64,
        year: i32,
    ) -> Result<Vec<AnnualTarget>, StoreError> {
        let mut rows: Vec<AnnualTarget> = self
            .working
            .annual_targets
            .iter()
            .filter(|t| t.branch_id == branch_id && t.year == year)
            .cloned()
            .collect();
        rows.sort_by_key(|t| t.product_id);
        Ok(rows)
    }

    async fn upsert_monthly_target(
        &mut self,
        annual: &AnnualTarget,
        month: u32,
        amount: i64,
    ) -> Result<MonthlyTarget, StoreError> {
        let month = month as i32;
        if let Some(row) = self.working.monthly_targets.iter_mut().find(|t| {
            t.branch_id == annual.branch_id
                && t.product_id == annual.product_id
                && t.year == annual.year
                && t.month == month
        }) {
            row.amount = amount;
            row.annual_target_id = annual.id;
            return Ok(row.clone());
        }
        let row = MonthlyTarget {
            id: self.working.allocate_id(),
            annual_target_id: annual.id,
            branch_id: annual.branch_id,
            product_id: annual.product_id,
            year: annual.year,
            month,
            amount,
        };
        self.working.monthly_targets.push(row.clone());
        Ok(row)
    }

    async fn lock_monthly_target(
        &mut self,
        branch_id: i64,
        product_id: i64,
        period: Period,
    ) -> Result<Option<MonthlyTarget>, StoreError> {
        Ok(self
            .working
            .monthly_targets
            .iter()
            .find(|t| {
                t.branch_id == branch_id
                    && t.product_id == product_id
                    && t.year == period.year
                    && t.month == period.month as i32
            })
            .cloned())
    }

    async fn monthly_targets(
        &mut self,
        branch_id: i64,
        period: Period,
    ) -> Result<Vec<MonthlyTarget>, StoreError> {
        let mut rows: Vec<MonthlyTarget> = self
            .working
            .monthly_targets
            .iter()
            .filter(|t| {
                t.branch_id == branch_id && t.year == period.year && t.month == period.month as i32
            })
            .cloned()
            .collect();
        rows.sort_by_key(|t| t.product_id);
        Ok(rows)
    }

    async fn sum_marketing_targets(
        &mut self,
        monthly_target_id: i64,
        excluding_staff: Option<i64>,
    ) -> Result<i64, StoreError> {
        Ok(self
            .working
            .marketing_targets
            .iter()
            .filter(|t| t.monthly_target_id == monthly_target_id)
            .filter(|t| Some(t.staff_id) != excluding_staff)
            .map(|t| t.amount)
            .sum())
    }

    async fn upsert_marketing_target(
        &mut self,
        monthly: &MonthlyTarget,
        staff_id: i64,
        amount: i64,
    ) -> Result<MarketingTarget, StoreError> {
        if let Some(row) = self
            .working
            .marketing_targets
            .iter_mut()
            .find(|t| t.monthly_target_id == monthly.id && t.staff_id == staff_id)
        {
            row.amount = amount;
            return Ok(row.clone());
        }
        let row = MarketingTarget {
            id: self.working.allocate_id(),
            monthly_target_id: monthly.id,
            staff_id,
            branch_id: monthly.branch_id,
            product_id: monthly.product_id,
            year: monthly.year,
            month: monthly.month,
            amount,
        };
        self.working.marketing_targets.push(row.clone());
        Ok(row)
    }

    async fn marketing_targets_for_staff(
        &mut self,
        staff_id: i64,
        period: Period,
    ) -> Result<Vec<MarketingTarget>, StoreError> {
        let mut rows: Vec<MarketingTarget> = self
            .working
            .marketing_targets
            .iter()
            .filter(|t| {
                t.staff_id == staff_id && t.year == period.year && t.month == period.month as i32
            })
            .cloned()
            .collect();
        rows.sort_by_key(|t| t.product_id);
        Ok(rows)
    }

    async fn marketing_target_totals(
        &mut self,
        branch_id: i64,
        period: Period,
    ) -> Result<Vec<ProductTotal>, StoreError> {
        let rows = self
            .working
            .marketing_targets
            .iter()
            .filter(|t| {
                t.branch_id == branch_id && t.year == period.year && t.month == period.month as i32
            })
            .map(|t| (t.product_id, t.amount));
        Ok(totals(rows))
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryUnitOfWork { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }
}

/// Row counts, for assertions in tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableCounts {
    pub leads: usize,
    pub recommendations: usize,
    pub assignments: usize,
    pub annual_targets: usize,
    pub monthly_targets: usize,
    pub marketing_targets: usize,
}

impl MemoryStore {
    pub async fn counts(&self) -> TableCounts {
        let state = self.state.lock().await;
        TableCounts {
            leads: state.leads.len(),
            recommendations: state.recommendations.len(),
            assignments: state.assignments.len(),
            annual_targets: state.annual_targets.len(),
            monthly_targets: state.monthly_targets.len(),
            marketing_targets: state.marketing_targets.len(),
        }
    }

    /// Product ids keyed by code.
    pub async fn product_ids(&self) -> HashMap<String, i64> {
        let state = self.state.lock().await;
        state
            .products
            .iter()
            .map(|p| (p.code.clone(), p.id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dropped_unit_of_work_rolls_back() {
        let store = MemoryStore::new();
        {
            let mut uow = store.begin().await.unwrap();
            uow.insert_branch("KC Bandung", Utc::now()).await.unwrap();
        }
        let mut uow = store.begin().await.unwrap();
        assert!(uow.list_branches().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn committed_writes_are_visible() {
        let store = MemoryStore::new();
        let mut uow = store.begin().await.unwrap();
        let branch = uow.insert_branch("KC Bandung", Utc::now()).await.unwrap();
        uow.commit().await.unwrap();

        let mut uow = store.begin().await.unwrap();
        assert_eq!(uow.find_branch(branch.id).await.unwrap(), Some(branch));
    }

    #[tokio::test]
    async fn seeded_catalog_is_present() {
        let store = MemoryStore::new();
        let ids = store.product_ids().await;
        assert_eq!(ids.len(), 6);
        let mut uow = store.begin().await.unwrap();
        let griya = uow.find_product_by_code("GRIYA").await.unwrap().unwrap();
        assert_eq!(Some(&griya.id), ids.get("griya"));
    }

    #[tokio::test]
    async fn second_active_assignment_is_rejected() {
        let store = MemoryStore::new();
        let mut uow = store.begin().await.unwrap();
        uow.insert_assignment(1, 10, Utc::now()).await.unwrap();
        let err = uow.insert_assignment(1, 11, Utc::now()).await.unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation(_)));
    }
}

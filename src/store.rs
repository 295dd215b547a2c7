//! Storage seam shared by every domain service.
//!
//! A [`Store`] hands out [`UnitOfWork`] values. Every read that establishes a precondition
//! and every write that follows it go through the same unit of work, and nothing is visible
//! to other callers until [`UnitOfWork::commit`]. Dropping a unit of work without committing
//! rolls it back, which is also what happens when the surrounding future is cancelled.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{
    AnnualTarget, AssignedLead, AssignmentStatus, Branch, Closing, ClosingScope, Lead,
    LeadAssignment, MarketingTarget, MonthlyTarget, NewLead, NewStaff, Period, Product,
    ProductTotal, RecommendedProduct, Role, Staff,
};

/// Failures raised by a storage backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Maps a Postgres unique violation (SQLSTATE 23505) to [`StoreError::UniqueViolation`].
    pub fn from_sqlx(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.is_unique_violation() {
                let constraint = db_err.constraint().unwrap_or("unknown").to_string();
                return StoreError::UniqueViolation(constraint);
            }
        }
        StoreError::Database(err)
    }
}

/// Lead columns that must be unique among live leads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeadKey {
    Cif,
    AccountNumber,
    Email,
    Phone,
}

impl LeadKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeadKey::Cif => "cif",
            LeadKey::AccountNumber => "account_number",
            LeadKey::Email => "email",
            LeadKey::Phone => "phone",
        }
    }
}

/// Opens transactional units of work.
#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError>;
}

/// One atomic storage scope.
#[async_trait]
pub trait UnitOfWork: Send {
    // ---- directory ----
    async fn find_branch(&mut self, branch_id: i64) -> Result<Option<Branch>, StoreError>;
    async fn insert_branch(
        &mut self,
        name: &str,
        created_at: DateTime<Utc>,
    ) -> Result<Branch, StoreError>;
    async fn list_branches(&mut self) -> Result<Vec<Branch>, StoreError>;

    async fn find_staff_by_nip(&mut self, nip: &str) -> Result<Option<Staff>, StoreError>;
    async fn insert_staff(
        &mut self,
        staff: &NewStaff,
        created_at: DateTime<Utc>,
    ) -> Result<Staff, StoreError>;
    async fn list_staff_in_branch(
        &mut self,
        branch_id: i64,
        role: Role,
    ) -> Result<Vec<Staff>, StoreError>;

    async fn find_product(&mut self, product_id: i64) -> Result<Option<Product>, StoreError>;
    async fn find_product_by_code(&mut self, code: &str) -> Result<Option<Product>, StoreError>;
    /// Whole catalog ordered by id.
    async fn list_products(&mut self) -> Result<Vec<Product>, StoreError>;

    // ---- leads ----
    async fn find_lead_by_cif(&mut self, cif: &str) -> Result<Option<Lead>, StoreError>;
    /// Like [`UnitOfWork::find_lead_by_cif`] but holds a row lock until the unit of work ends.
    async fn lock_lead_by_cif(&mut self, cif: &str) -> Result<Option<Lead>, StoreError>;
    async fn lead_key_taken(&mut self, key: LeadKey, value: &str) -> Result<bool, StoreError>;
    async fn insert_lead(
        &mut self,
        lead: &NewLead,
        created_at: DateTime<Utc>,
    ) -> Result<Lead, StoreError>;
    async fn insert_recommendation(
        &mut self,
        recommendation: &RecommendedProduct,
    ) -> Result<(), StoreError>;
    async fn recommendations_for(
        &mut self,
        lead_id: i64,
    ) -> Result<Vec<RecommendedProduct>, StoreError>;
    async fn list_unassigned_leads(&mut self, limit: i64) -> Result<Vec<Lead>, StoreError>;
    /// Leads assigned to one staff member in any of `statuses`, most recently updated first.
    ///
    /// `search` is a case-insensitive substring matched against the lead's identity and
    /// contact fields.
    async fn assigned_leads(
        &mut self,
        staff_id: i64,
        statuses: &[AssignmentStatus],
        search: Option<&str>,
        limit: i64,
    ) -> Result<Vec<AssignedLead>, StoreError>;

    // ---- assignments ----
    async fn active_assignment(
        &mut self,
        lead_id: i64,
    ) -> Result<Option<LeadAssignment>, StoreError>;
    async fn insert_assignment(
        &mut self,
        lead_id: i64,
        staff_id: i64,
        created_at: DateTime<Utc>,
    ) -> Result<LeadAssignment, StoreError>;
    async fn update_assignment(&mut self, assignment: &LeadAssignment) -> Result<(), StoreError>;
    /// Closed amounts per product whose closing timestamp falls within `period`.
    async fn closed_totals(
        &mut self,
        scope: ClosingScope,
        period: Period,
    ) -> Result<Vec<ProductTotal>, StoreError>;
    /// Individual closings of one product with `from <= closed_at < to`, oldest first.
    async fn closings(
        &mut self,
        scope: ClosingScope,
        product_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Closing>, StoreError>;

    // ---- targets ----
    async fn upsert_annual_target(
        &mut self,
        branch_id: i64,
        product_id: i64,
        year: i32,
        amount: i64,
    ) -> Result<AnnualTarget, StoreError>;
    async fn annual_targets(
        &mut self,
        branch_id: i64,
        year: i32,
    ) -> Result<Vec<AnnualTarget>, StoreError>;
    async fn upsert_monthly_target(
        &mut self,
        annual: &AnnualTarget,
        month: u32,
        amount: i64,
    ) -> Result<MonthlyTarget, StoreError>;
    /// Returns the monthly cap row and holds a row lock on it until the unit of work ends.
    async fn lock_monthly_target(
        &mut self,
        branch_id: i64,
        product_id: i64,
        period: Period,
    ) -> Result<Option<MonthlyTarget>, StoreError>;
    async fn monthly_targets(
        &mut self,
        branch_id: i64,
        period: Period,
    ) -> Result<Vec<MonthlyTarget>, StoreError>;

    /// Sum of marketing slices for one monthly target, optionally leaving one staff member out.
    async fn sum_marketing_targets(
        &mut self,
        monthly_target_id: i64,
        excluding_staff: Option<i64>,
    ) -> Result<i64, StoreError>;
    async fn upsert_marketing_target(
        &mut self,
        monthly: &MonthlyTarget,
        staff_id: i64,
        amount: i64,
    ) -> Result<MarketingTarget, StoreError>;
    async fn marketing_targets_for_staff(
        &mut self,
        staff_id: i64,
        period: Period,
    ) -> Result<Vec<MarketingTarget>, StoreError>;
    async fn marketing_target_totals(
        &mut self,
        branch_id: i64,
        period: Period,
    ) -> Result<Vec<ProductTotal>, StoreError>;

    /// Publishes every write made through this unit of work.
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

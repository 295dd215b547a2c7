//! PostgreSQL [`Store`] backed by `sqlx` transactions.
//!
//! Each unit of work owns a `Transaction<'static, Postgres>`. Preconditions that guard
//! concurrent writers lock their rows with `SELECT ... FOR UPDATE`: the monthly target row
//! for capacity checks and the lead row for assignment checks. An uncommitted transaction
//! is rolled back by sqlx when dropped.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, Transaction};

use crate::models::{
    ActivityLevel, AnnualTarget, AssignedLead, AssignmentStatus, Branch, Closing, ClosingScope,
    Lead, LeadAssignment, MarketingTarget, MonthlyTarget, NewLead, NewStaff, Period, Product,
    ProductTotal, RecommendedProduct, Role, Staff,
};
use std::collections::HashMap;
use crate::store::{LeadKey, Store, StoreError, UnitOfWork};

/// Store over a shared connection pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgUnitOfWork { tx }))
    }
}

pub struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

// ============ Row mapping ============

#[derive(FromRow)]
struct StaffRow {
    id: i64,
    nip: String,
    name: String,
    role: String,
    branch_id: Option<i64>,
    created_at: DateTime<Utc>,
}

impl TryFrom<StaffRow> for Staff {
    type Error = StoreError;

    fn try_from(row: StaffRow) -> Result<Self, Self::Error> {
        Ok(Staff {
            id: row.id,
            nip: row.nip,
            name: row.name,
            role: row.role.parse::<Role>().map_err(StoreError::Corrupt)?,
            branch_id: row.branch_id,
            created_at: row.created_at,
        })
    }
}

#[derive(FromRow)]
struct LeadRow {
    id: i64,
    cif: String,
    account_number: String,
    name: String,
    company_name: Option<String>,
    phone: Option<String>,
    email: Option<String>,
    age: i32,
    monthly_income: i64,
    payroll: bool,
    gender: Option<String>,
    married: Option<bool>,
    segment: Option<String>,
    job: Option<String>,
    address: Option<String>,
    existing_products: Vec<String>,
    transaction_activity: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<LeadRow> for Lead {
    type Error = StoreError;

    fn try_from(row: LeadRow) -> Result<Self, Self::Error> {
        let transaction_activity = row
            .transaction_activity
            .as_deref()
            .map(str::parse::<ActivityLevel>)
            .transpose()
            .map_err(StoreError::Corrupt)?;

        Ok(Lead {
            id: row.id,
            cif: row.cif,
            account_number: row.account_number,
            name: row.name,
            company_name: row.company_name,
            phone: row.phone,
            email: row.email,
            age: row.age,
            monthly_income: row.monthly_income,
            payroll: row.payroll,
            gender: row.gender,
            married: row.married,
            segment: row.segment,
            job: row.job,
            address: row.address,
            existing_products: row.existing_products,
            transaction_activity,
            created_at: row.created_at,
        })
    }
}

#[derive(FromRow)]
struct AssignmentRow {
    id: i64,
    lead_id: i64,
    staff_id: i64,
    status: String,
    product_id: Option<i64>,
    amount: Option<i64>,
    notes: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    closed_at: Option<DateTime<Utc>>,
}

/// `ILIKE` pattern matching `term` anywhere, with wildcards in the term escaped.
fn contains_pattern(term: &str) -> String {
    let escaped = term
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

fn scope_filter(scope: ClosingScope) -> (&'static str, i64) {
    match scope {
        ClosingScope::Staff(staff_id) => ("s.id = $1", staff_id),
        ClosingScope::Branch(branch_id) => ("s.branch_id = $1", branch_id),
    }
}

impl TryFrom<AssignmentRow> for LeadAssignment {
    type Error = StoreError;

    fn try_from(row: AssignmentRow) -> Result<Self, Self::Error> {
        Ok(LeadAssignment {
            id: row.id,
            lead_id: row.lead_id,
            staff_id: row.staff_id,
            status: row
                .status
                .parse::<AssignmentStatus>()
                .map_err(StoreError::Corrupt)?,
            product_id: row.product_id,
            amount: row.amount,
            notes: row.notes,
            created_at: row.created_at,
            updated_at: row.updated_at,
            closed_at: row.closed_at,
        })
    }
}

const STAFF_COLUMNS: &str = "id, nip, name, role, branch_id, created_at";

const LEAD_COLUMNS: &str = "id, cif, account_number, name, company_name, phone, email, age, \
     monthly_income, payroll, gender, married, segment, job, address, existing_products, \
     transaction_activity, created_at";

const ASSIGNMENT_COLUMNS: &str =
    "id, lead_id, staff_id, status, product_id, amount, notes, created_at, updated_at, closed_at";

const ASSIGNMENT_COLUMNS_LA: &str = "la.id, la.lead_id, la.staff_id, la.status, la.product_id, \
     la.amount, la.notes, la.created_at, la.updated_at, la.closed_at";

const MONTHLY_COLUMNS: &str = "id, annual_target_id, branch_id, product_id, year, month, amount";

const MARKETING_COLUMNS: &str =
    "id, monthly_target_id, staff_id, branch_id, product_id, year, month, amount";

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn find_branch(&mut self, branch_id: i64) -> Result<Option<Branch>, StoreError> {
        let branch = sqlx::query_as::<_, Branch>(
            "SELECT id, name, created_at FROM branches WHERE id = $1",
        )
        .bind(branch_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(branch)
    }

    async fn insert_branch(
        &mut self,
        name: &str,
        created_at: DateTime<Utc>,
    ) -> Result<Branch, StoreError> {
        sqlx::query_as::<_, Branch>(
            "INSERT INTO branches (name, created_at) VALUES ($1, $2) RETURNING id, name, created_at",
        )
        .bind(name)
        .bind(created_at)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(StoreError::from_sqlx)
    }

    async fn list_branches(&mut self) -> Result<Vec<Branch>, StoreError> {
        let branches = sqlx::query_as::<_, Branch>(
            "SELECT id, name, created_at FROM branches ORDER BY id",
        )
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(branches)
    }

    async fn find_staff_by_nip(&mut self, nip: &str) -> Result<Option<Staff>, StoreError> {
        let row = sqlx::query_as::<_, StaffRow>(&format!(
            "SELECT {} FROM staff WHERE nip = $1",
            STAFF_COLUMNS
        ))
        .bind(nip)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(Staff::try_from).transpose()
    }

    async fn insert_staff(
        &mut self,
        staff: &NewStaff,
        created_at: DateTime<Utc>,
    ) -> Result<Staff, StoreError> {
        let row = sqlx::query_as::<_, StaffRow>(&format!(
            r#"
            INSERT INTO staff (nip, name, role, branch_id, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {}
            "#,
            STAFF_COLUMNS
        ))
        .bind(&staff.nip)
        .bind(&staff.name)
        .bind(staff.role.as_str())
        .bind(staff.branch_id)
        .bind(created_at)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(StoreError::from_sqlx)?;
        Staff::try_from(row)
    }

    async fn list_staff_in_branch(
        &mut self,
        branch_id: i64,
        role: Role,
    ) -> Result<Vec<Staff>, StoreError> {
        let rows = sqlx::query_as::<_, StaffRow>(&format!(
            "SELECT {} FROM staff WHERE branch_id = $1 AND role = $2 ORDER BY nip",
            STAFF_COLUMNS
        ))
        .bind(branch_id)
        .bind(role.as_str())
        .fetch_all(&mut *self.tx)
        .await?;
        rows.into_iter().map(Staff::try_from).collect()
    }

    async fn find_product(&mut self, product_id: i64) -> Result<Option<Product>, StoreError> {
        let product =
            sqlx::query_as::<_, Product>("SELECT id, code, name FROM products WHERE id = $1")
                .bind(product_id)
                .fetch_optional(&mut *self.tx)
                .await?;
        Ok(product)
    }

    async fn find_product_by_code(&mut self, code: &str) -> Result<Option<Product>, StoreError> {
        let product = sqlx::query_as::<_, Product>(
            "SELECT id, code, name FROM products WHERE lower(code) = lower($1)",
        )
        .bind(code)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(product)
    }

    async fn list_products(&mut self) -> Result<Vec<Product>, StoreError> {
        let products =
            sqlx::query_as::<_, Product>("SELECT id, code, name FROM products ORDER BY id")
                .fetch_all(&mut *self.tx)
                .await?;
        Ok(products)
    }

    async fn find_lead_by_cif(&mut self, cif: &str) -> Result<Option<Lead>, StoreError> {
        let row = sqlx::query_as::<_, LeadRow>(&format!(
            "SELECT {} FROM leads WHERE cif = $1 AND deleted_at IS NULL",
            LEAD_COLUMNS
        ))
        .bind(cif)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(Lead::try_from).transpose()
    }

    async fn lock_lead_by_cif(&mut self, cif: &str) -> Result<Option<Lead>, StoreError> {
        let row = sqlx::query_as::<_, LeadRow>(&format!(
            "SELECT {} FROM leads WHERE cif = $1 AND deleted_at IS NULL FOR UPDATE",
            LEAD_COLUMNS
        ))
        .bind(cif)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(Lead::try_from).transpose()
    }

    async fn lead_key_taken(&mut self, key: LeadKey, value: &str) -> Result<bool, StoreError> {
        let (taken,): (bool,) = sqlx::query_as(&format!(
            "SELECT EXISTS (SELECT 1 FROM leads WHERE {} = $1 AND deleted_at IS NULL)",
            key.as_str()
        ))
        .bind(value)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(taken)
    }

    async fn insert_lead(
        &mut self,
        lead: &NewLead,
        created_at: DateTime<Utc>,
    ) -> Result<Lead, StoreError> {
        let row = sqlx::query_as::<_, LeadRow>(&format!(
            r#"
            INSERT INTO leads (
                cif, account_number, name, company_name, phone, email, age,
                monthly_income, payroll, gender, married, segment, job, address,
                existing_products, transaction_activity, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            RETURNING {}
            "#,
            LEAD_COLUMNS
        ))
        .bind(&lead.cif)
        .bind(&lead.account_number)
        .bind(&lead.name)
        .bind(&lead.company_name)
        .bind(&lead.phone)
        .bind(&lead.email)
        .bind(lead.age)
        .bind(lead.monthly_income)
        .bind(lead.payroll)
        .bind(&lead.gender)
        .bind(lead.married)
        .bind(&lead.segment)
        .bind(&lead.job)
        .bind(&lead.address)
        .bind(&lead.existing_products)
        .bind(lead.transaction_activity.map(|a| a.as_str()))
        .bind(created_at)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(StoreError::from_sqlx)?;
        Lead::try_from(row)
    }

    async fn insert_recommendation(
        &mut self,
        recommendation: &RecommendedProduct,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO lead_products (
                lead_id, product_id, rank, score, min_limit, max_limit, min_tenor, max_tenor
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(recommendation.lead_id)
        .bind(recommendation.product_id)
        .bind(recommendation.rank)
        .bind(recommendation.score)
        .bind(recommendation.min_limit)
        .bind(recommendation.max_limit)
        .bind(recommendation.min_tenor)
        .bind(recommendation.max_tenor)
        .execute(&mut *self.tx)
        .await
        .map_err(StoreError::from_sqlx)?;
        Ok(())
    }

    async fn recommendations_for(
        &mut self,
        lead_id: i64,
    ) -> Result<Vec<RecommendedProduct>, StoreError> {
        let rows = sqlx::query_as::<_, RecommendedProduct>(
            r#"
            SELECT lp.lead_id, lp.product_id, p.code AS product_code, lp.rank, lp.score,
                   lp.min_limit, lp.max_limit, lp.min_tenor, lp.max_tenor
            FROM lead_products lp
            JOIN products p ON p.id = lp.product_id
            WHERE lp.lead_id = $1
            ORDER BY lp.rank
            "#,
        )
        .bind(lead_id)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows)
    }

    async fn list_unassigned_leads(&mut self, limit: i64) -> Result<Vec<Lead>, StoreError> {
        let rows = sqlx::query_as::<_, LeadRow>(&format!(
            r#"
            SELECT {} FROM leads l
            WHERE l.deleted_at IS NULL
              AND NOT EXISTS (
                  SELECT 1 FROM lead_assignments la
                  WHERE la.lead_id = l.id AND la.deleted_at IS NULL
              )
            ORDER BY l.created_at, l.id
            LIMIT $1
            "#,
            LEAD_COLUMNS
        ))
        .bind(limit)
        .fetch_all(&mut *self.tx)
        .await?;
        rows.into_iter().map(Lead::try_from).collect()
    }

    async fn assigned_leads(
        &mut self,
        staff_id: i64,
        statuses: &[AssignmentStatus],
        search: Option<&str>,
        limit: i64,
    ) -> Result<Vec<AssignedLead>, StoreError> {
        let statuses: Vec<String> = statuses.iter().map(|s| s.as_str().to_string()).collect();
        let assignments = sqlx::query_as::<_, AssignmentRow>(&format!(
            r#"
            SELECT {} FROM lead_assignments la
            JOIN leads l ON l.id = la.lead_id
            WHERE la.staff_id = $1
              AND la.deleted_at IS NULL
              AND l.deleted_at IS NULL
              AND la.status = ANY($2)
              AND ($3::TEXT IS NULL
                   OR l.cif ILIKE $3 OR l.account_number ILIKE $3 OR l.name ILIKE $3
                   OR l.phone ILIKE $3 OR l.email ILIKE $3 OR l.job ILIKE $3
                   OR l.address ILIKE $3)
            ORDER BY la.updated_at DESC, la.id DESC
            LIMIT $4
            "#,
            ASSIGNMENT_COLUMNS_LA
        ))
        .bind(staff_id)
        .bind(statuses)
        .bind(search.map(contains_pattern))
        .bind(limit)
        .fetch_all(&mut *self.tx)
        .await?;

        let assignments = assignments
            .into_iter()
            .map(LeadAssignment::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        let lead_ids: Vec<i64> = assignments.iter().map(|a| a.lead_id).collect();

        let leads = sqlx::query_as::<_, LeadRow>(&format!(
            "SELECT {} FROM leads WHERE id = ANY($1)",
            LEAD_COLUMNS
        ))
        .bind(lead_ids)
        .fetch_all(&mut *self.tx)
        .await?;
        let mut leads: HashMap<i64, Lead> = leads
            .into_iter()
            .map(|row| Lead::try_from(row).map(|lead| (lead.id, lead)))
            .collect::<Result<_, _>>()?;

        assignments
            .into_iter()
            .map(|assignment| {
                let lead = leads.remove(&assignment.lead_id).ok_or_else(|| {
                    StoreError::Corrupt(format!("lead {} vanished", assignment.lead_id))
                })?;
                Ok(AssignedLead { lead, assignment })
            })
            .collect()
    }

    async fn active_assignment(
        &mut self,
        lead_id: i64,
    ) -> Result<Option<LeadAssignment>, StoreError> {
        let row = sqlx::query_as::<_, AssignmentRow>(&format!(
            "SELECT {} FROM lead_assignments WHERE lead_id = $1 AND deleted_at IS NULL",
            ASSIGNMENT_COLUMNS
        ))
        .bind(lead_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(LeadAssignment::try_from).transpose()
    }

    async fn insert_assignment(
        &mut self,
        lead_id: i64,
        staff_id: i64,
        created_at: DateTime<Utc>,
    ) -> Result<LeadAssignment, StoreError> {
        let row = sqlx::query_as::<_, AssignmentRow>(&format!(
            r#"
            INSERT INTO lead_assignments (lead_id, staff_id, status, created_at, updated_at)
            VALUES ($1, $2, 'new', $3, $3)
            RETURNING {}
            "#,
            ASSIGNMENT_COLUMNS
        ))
        .bind(lead_id)
        .bind(staff_id)
        .bind(created_at)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(StoreError::from_sqlx)?;
        LeadAssignment::try_from(row)
    }

    async fn update_assignment(&mut self, assignment: &LeadAssignment) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE lead_assignments
            SET status = $2, product_id = $3, amount = $4, notes = $5,
                updated_at = $6, closed_at = $7
            WHERE id = $1
            "#,
        )
        .bind(assignment.id)
        .bind(assignment.status.as_str())
        .bind(assignment.product_id)
        .bind(assignment.amount)
        .bind(&assignment.notes)
        .bind(assignment.updated_at)
        .bind(assignment.closed_at)
        .execute(&mut *self.tx)
        .await
        .map_err(StoreError::from_sqlx)?;
        Ok(())
    }

    async fn closed_totals(
        &mut self,
        scope: ClosingScope,
        period: Period,
    ) -> Result<Vec<ProductTotal>, StoreError> {
        let (filter, id) = scope_filter(scope);

        let rows = sqlx::query_as::<_, ProductTotal>(&format!(
            r#"
            SELECT la.product_id, COALESCE(SUM(la.amount), 0)::BIGINT AS amount
            FROM lead_assignments la
            JOIN staff s ON s.id = la.staff_id
            WHERE {}
              AND la.deleted_at IS NULL
              AND la.status = 'closed'
              AND la.product_id IS NOT NULL
              AND la.closed_at >= $2 AND la.closed_at < $3
            GROUP BY la.product_id
            ORDER BY la.product_id
            "#,
            filter
        ))
        .bind(id)
        .bind(period.start())
        .bind(period.end())
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows)
    }

    async fn closings(
        &mut self,
        scope: ClosingScope,
        product_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Closing>, StoreError> {
        let (filter, id) = scope_filter(scope);

        let rows = sqlx::query_as::<_, Closing>(&format!(
            r#"
            SELECT la.staff_id, la.product_id, la.amount, la.closed_at
            FROM lead_assignments la
            JOIN staff s ON s.id = la.staff_id
            WHERE {}
              AND la.deleted_at IS NULL
              AND la.status = 'closed'
              AND la.product_id = $2
              AND la.amount IS NOT NULL
              AND la.closed_at >= $3 AND la.closed_at < $4
            ORDER BY la.closed_at, la.id
            "#,
            filter
        ))
        .bind(id)
        .bind(product_id)
        .bind(from)
        .bind(to)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows)
    }

    async fn upsert_annual_target(
        &mut self,
        branch_id: i64,
        product_id: i64,
        year: i32,
        amount: i64,
    ) -> Result<AnnualTarget, StoreError> {
        sqlx::query_as::<_, AnnualTarget>(
            r#"
            INSERT INTO annual_targets (branch_id, product_id, year, amount)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (branch_id, product_id, year) DO UPDATE
            SET amount = EXCLUDED.amount, updated_at = now()
            RETURNING id, branch_id, product_id, year, amount
            "#,
        )
        .bind(branch_id)
        .bind(product_id)
        .bind(year)
        .bind(amount)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(StoreError::from_sqlx)
    }

    async fn annual_targets(
        &mut self,
        branch_id: i64,
        year: i32,
    ) -> Result<Vec<AnnualTarget>, StoreError> {
        let rows = sqlx::query_as::<_, AnnualTarget>(
            r#"
            SELECT id, branch_id, product_id, year, amount
            FROM annual_targets
            WHERE branch_id = $1 AND year = $2
            ORDER BY product_id
            "#,
        )
        .bind(branch_id)
        .bind(year)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows)
    }

    async fn upsert_monthly_target(
        &mut self,
        annual: &AnnualTarget,
        month: u32,
        amount: i64,
    ) -> Result<MonthlyTarget, StoreError> {
        sqlx::query_as::<_, MonthlyTarget>(&format!(
            r#"
            INSERT INTO monthly_targets (annual_target_id, branch_id, product_id, year, month, amount)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (branch_id, product_id, year, month) DO UPDATE
            SET amount = EXCLUDED.amount,
                annual_target_id = EXCLUDED.annual_target_id,
                updated_at = now()
            RETURNING {}
            "#,
            MONTHLY_COLUMNS
        ))
        .bind(annual.id)
        .bind(annual.branch_id)
        .bind(annual.product_id)
        .bind(annual.year)
        .bind(month as i32)
        .bind(amount)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(StoreError::from_sqlx)
    }

    async fn lock_monthly_target(
        &mut self,
        branch_id: i64,
        product_id: i64,
        period: Period,
    ) -> Result<Option<MonthlyTarget>, StoreError> {
        let row = sqlx::query_as::<_, MonthlyTarget>(&format!(
            r#"
            SELECT {} FROM monthly_targets
            WHERE branch_id = $1 AND product_id = $2 AND year = $3 AND month = $4
            FOR UPDATE
            "#,
            MONTHLY_COLUMNS
        ))
        .bind(branch_id)
        .bind(product_id)
        .bind(period.year)
        .bind(period.month as i32)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn monthly_targets(
        &mut self,
        branch_id: i64,
        period: Period,
    ) -> Result<Vec<MonthlyTarget>, StoreError> {
        let rows = sqlx::query_as::<_, MonthlyTarget>(&format!(
            r#"
            SELECT {} FROM monthly_targets
            WHERE branch_id = $1 AND year = $2 AND month = $3
            ORDER BY product_id
            "#,
            MONTHLY_COLUMNS
        ))
        .bind(branch_id)
        .bind(period.year)
        .bind(period.month as i32)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows)
    }

    async fn sum_marketing_targets(
        &mut self,
        monthly_target_id: i64,
        excluding_staff: Option<i64>,
    ) -> Result<i64, StoreError> {
        let (sum,): (i64,) = sqlx::query_as(
            r#"
            SELECT COALESCE(SUM(amount), 0)::BIGINT
            FROM marketing_targets
            WHERE monthly_target_id = $1
              AND ($2::BIGINT IS NULL OR staff_id <> $2)
            "#,
        )
        .bind(monthly_target_id)
        .bind(excluding_staff)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(sum)
    }

    async fn upsert_marketing_target(
        &mut self,
        monthly: &MonthlyTarget,
        staff_id: i64,
        amount: i64,
    ) -> Result<MarketingTarget, StoreError> {
        sqlx::query_as::<_, MarketingTarget>(&format!(
            r#"
            INSERT INTO marketing_targets (
                monthly_target_id, staff_id, branch_id, product_id, year, month, amount
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (monthly_target_id, staff_id) DO UPDATE
            SET amount = EXCLUDED.amount, updated_at = now()
            RETURNING {}
            "#,
            MARKETING_COLUMNS
        ))
        .bind(monthly.id)
        .bind(staff_id)
        .bind(monthly.branch_id)
        .bind(monthly.product_id)
        .bind(monthly.year)
        .bind(monthly.month)
        .bind(amount)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(StoreError::from_sqlx)
    }

    async fn marketing_targets_for_staff(
        &mut self,
        staff_id: i64,
        period: Period,
    ) -> Result<Vec<MarketingTarget>, StoreError> {
        let rows = sqlx::query_as::<_, MarketingTarget>(&format!(
            r#"
            SELECT {} FROM marketing_targets
            WHERE staff_id = $1 AND year = $2 AND month = $3
            ORDER BY product_id
            "#,
            MARKETING_COLUMNS
        ))
        .bind(staff_id)
        .bind(period.year)
        .bind(period.month as i32)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows)
    }

    async fn marketing_target_totals(
        &mut self,
        branch_id: i64,
        period: Period,
    ) -> Result<Vec<ProductTotal>, StoreError> {
        let rows = sqlx::query_as::<_, ProductTotal>(
            r#"
            SELECT product_id, COALESCE(SUM(amount), 0)::BIGINT AS amount
            FROM marketing_targets
            WHERE branch_id = $1 AND year = $2 AND month = $3
            GROUP BY product_id
            ORDER BY product_id
            "#,
        )
        .bind(branch_id)
        .bind(period.year)
        .bind(period.month as i32)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await.map_err(StoreError::from_sqlx)
    }
}

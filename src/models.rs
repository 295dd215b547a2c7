use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;

// ============ Roles & Statuses ============

/// Staff role. Closed set so an unknown role string can never pass an authorization check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "admin")]
    Admin,
    #[serde(rename = "bm")]
    BranchManager,
    #[serde(rename = "marketing")]
    Marketing,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::BranchManager => "bm",
            Role::Marketing => "marketing",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "admin" => Ok(Role::Admin),
            "bm" => Ok(Role::BranchManager),
            "marketing" => Ok(Role::Marketing),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

/// Lifecycle of a lead assignment. `Closed` and `Rejected` are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssignmentStatus {
    New,
    Contacted,
    Rejected,
    Closed,
}

impl AssignmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssignmentStatus::New => "new",
            AssignmentStatus::Contacted => "contacted",
            AssignmentStatus::Rejected => "rejected",
            AssignmentStatus::Closed => "closed",
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, AssignmentStatus::Closed | AssignmentStatus::Rejected)
    }
}

impl fmt::Display for AssignmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssignmentStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "new" => Ok(AssignmentStatus::New),
            "contacted" => Ok(AssignmentStatus::Contacted),
            "rejected" => Ok(AssignmentStatus::Rejected),
            "closed" => Ok(AssignmentStatus::Closed),
            other => Err(format!("unknown assignment status '{}'", other)),
        }
    }
}

/// Transaction-activity classification of a lead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityLevel {
    Active,
    Inactive,
}

impl ActivityLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityLevel::Active => "active",
            ActivityLevel::Inactive => "inactive",
        }
    }
}

impl FromStr for ActivityLevel {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "active" => Ok(ActivityLevel::Active),
            "inactive" => Ok(ActivityLevel::Inactive),
            other => Err(format!("unknown transaction activity '{}'", other)),
        }
    }
}

// ============ Reporting Period ============

/// A calendar month used as the key for monthly targets and closings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Period {
    pub year: i32,
    pub month: u32,
}

impl Period {
    /// Builds a period, rejecting months outside 1..=12.
    pub fn new(year: i32, month: u32) -> Result<Self, String> {
        if !(1..=12).contains(&month) {
            return Err(format!("month must be between 1 and 12, got {}", month));
        }
        Ok(Self { year, month })
    }

    pub fn of(timestamp: DateTime<Utc>) -> Self {
        Self {
            year: timestamp.year(),
            month: timestamp.month(),
        }
    }

    /// The month before this one; January rolls back to December of the previous year.
    pub fn previous(&self) -> Self {
        if self.month == 1 {
            Self {
                year: self.year - 1,
                month: 12,
            }
        } else {
            Self {
                year: self.year,
                month: self.month - 1,
            }
        }
    }

    pub fn next(&self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    /// Inclusive start of the month (UTC).
    pub fn start(&self) -> DateTime<Utc> {
        let midnight = NaiveDate::from_ymd_opt(self.year, self.month, 1)
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .unwrap_or(NaiveDateTime::MIN);
        Utc.from_utc_datetime(&midnight)
    }

    /// Exclusive end of the month (UTC).
    pub fn end(&self) -> DateTime<Utc> {
        self.next().start()
    }

    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        timestamp >= self.start() && timestamp < self.end()
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

// ============ Organisation ============

/// Branch office (kantor cabang) owning targets and marketing staff.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq)]
pub struct Branch {
    pub id: i64,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// A staff member as returned by the identity lookup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Staff {
    pub id: i64,
    /// Employee identifier (NIP).
    pub nip: String,
    pub name: String,
    pub role: Role,
    pub branch_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl Staff {
    /// True when this staff member manages the given branch.
    pub fn manages(&self, branch_id: i64) -> bool {
        self.role == Role::BranchManager && self.branch_id == Some(branch_id)
    }
}

/// Data required to create a staff record.
#[derive(Debug, Clone)]
pub struct NewStaff {
    pub nip: String,
    pub name: String,
    pub role: Role,
    pub branch_id: Option<i64>,
}

/// Product catalog entry. `code` is the identifier the prediction model emits.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq)]
pub struct Product {
    pub id: i64,
    pub code: String,
    pub name: String,
}

// ============ Leads ============

/// A prospective customer. Identity fields (CIF, account number) never change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Lead {
    pub id: i64,
    pub cif: String,
    pub account_number: String,
    pub name: String,
    pub company_name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub age: i32,
    pub monthly_income: i64,
    pub payroll: bool,
    pub gender: Option<String>,
    pub married: Option<bool>,
    pub segment: Option<String>,
    pub job: Option<String>,
    pub address: Option<String>,
    pub existing_products: Vec<String>,
    pub transaction_activity: Option<ActivityLevel>,
    pub created_at: DateTime<Utc>,
}

/// Validated lead fields ready for insertion.
#[derive(Debug, Clone, PartialEq)]
pub struct NewLead {
    pub cif: String,
    pub account_number: String,
    pub name: String,
    pub company_name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub age: i32,
    pub monthly_income: i64,
    pub payroll: bool,
    pub gender: Option<String>,
    pub married: Option<bool>,
    pub segment: Option<String>,
    pub job: Option<String>,
    pub address: Option<String>,
    pub existing_products: Vec<String>,
    pub transaction_activity: Option<ActivityLevel>,
}

/// A product recommended to a lead with its computed eligibility envelope.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq)]
pub struct RecommendedProduct {
    pub lead_id: i64,
    pub product_id: i64,
    pub product_code: String,
    pub rank: i32,
    pub score: f64,
    pub min_limit: Option<i64>,
    pub max_limit: Option<i64>,
    pub min_tenor: Option<i32>,
    pub max_tenor: Option<i32>,
}

/// Link between a lead and the marketing staff member working it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LeadAssignment {
    pub id: i64,
    pub lead_id: i64,
    pub staff_id: i64,
    pub status: AssignmentStatus,
    pub product_id: Option<i64>,
    pub amount: Option<i64>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

// ============ Targets ============

/// Yearly branch target for one product.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq)]
pub struct AnnualTarget {
    pub id: i64,
    pub branch_id: i64,
    pub product_id: i64,
    pub year: i32,
    pub amount: i64,
}

/// Monthly branch target derived from an [`AnnualTarget`].
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq)]
pub struct MonthlyTarget {
    pub id: i64,
    pub annual_target_id: i64,
    pub branch_id: i64,
    pub product_id: i64,
    pub year: i32,
    pub month: i32,
    pub amount: i64,
}

/// Slice of a [`MonthlyTarget`] assigned to one marketing staff member.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq)]
pub struct MarketingTarget {
    pub id: i64,
    pub monthly_target_id: i64,
    pub staff_id: i64,
    pub branch_id: i64,
    pub product_id: i64,
    pub year: i32,
    pub month: i32,
    pub amount: i64,
}

/// Amount aggregated per product.
#[derive(Debug, Clone, Copy, FromRow, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProductTotal {
    pub product_id: i64,
    pub amount: i64,
}

/// Which staff members a closing aggregate covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClosingScope {
    Staff(i64),
    Branch(i64),
}

/// One closed assignment, as read for time-series reports.
#[derive(Debug, Clone, Copy, FromRow, PartialEq, Eq)]
pub struct Closing {
    pub staff_id: i64,
    pub product_id: i64,
    pub amount: i64,
    pub closed_at: DateTime<Utc>,
}

/// Bucket size of a product performance series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Grouping {
    Week,
    Month,
    Year,
}

// ============ Request DTOs ============

/// One `{product_id, amount}` item of a target request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProductAmount {
    pub product_id: i64,
    pub amount: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnualTargetRequest {
    pub year: i32,
    pub branch_id: Option<i64>,
    pub targets: Vec<ProductAmount>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketingTargetRequest {
    pub year: i32,
    pub month: u32,
    pub targets: Vec<ProductAmount>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusUpdateRequest {
    pub status: AssignmentStatus,
    pub product_id: Option<i64>,
    pub amount: Option<i64>,
    pub notes: Option<String>,
}

/// Incoming lead as posted by the intake endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewLeadRequest {
    pub cif: String,
    pub account_number: String,
    pub name: String,
    #[serde(default)]
    pub company_name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    pub age: i32,
    pub monthly_income: i64,
    #[serde(default)]
    pub payroll: bool,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub married: Option<bool>,
    #[serde(default)]
    pub segment: Option<String>,
    #[serde(default)]
    pub job: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub existing_products: Vec<String>,
    #[serde(default)]
    pub transaction_activity: Option<ActivityLevel>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PeriodQuery {
    pub month: u32,
    pub year: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateBranchRequest {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterStaffRequest {
    pub name: String,
    pub role: Role,
    pub branch_id: Option<i64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ListQuery {
    pub limit: Option<i64>,
}

/// Filters for a marketer's own leads. Without a status every active assignment is listed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssignedLeadQuery {
    pub status: Option<AssignmentStatus>,
    pub search: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AnnualTargetQuery {
    pub year: i32,
    pub branch_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetOverviewQuery {
    pub month: u32,
    pub year: i32,
    pub has_target: Option<bool>,
    pub search: Option<String>,
}

/// One product over an inclusive date range, bucketed by `group_by`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PerformanceQuery {
    pub product_id: i64,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub group_by: Grouping,
}

// ============ Response DTOs ============

/// Lead with its recommendations and current assignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeadDetail {
    pub lead: Lead,
    pub recommendations: Vec<RecommendedProduct>,
    pub assignment: Option<LeadAssignment>,
}

/// A lead together with the caller's assignment on it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssignedLead {
    pub lead: Lead,
    pub assignment: LeadAssignment,
}

use crate::assignment::LeadAssignmentStateMachine;
use crate::directory::Directory;
use crate::errors::{AppError, ResultExt};
use crate::intake::LeadIntake;
use crate::models::*;
use crate::reporting::{
    BranchSummary, IndividualSummary, MonitoringRow, ProductPerformance, StaffMonitoring,
    TargetOverviewRow, TargetRollupReporter,
};
use crate::targets::{ProductAllocation, TargetAllocator};
use axum::{
    async_trait,
    extract::{FromRequestParts, Path, Query, State},
    http::{request::Parts, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;

/// Header carrying the acting staff member's NIP.
pub const STAFF_HEADER: &str = "x-staff-nip";

/// Shared application state injected into handlers.
pub struct AppState {
    pub directory: Directory,
    pub intake: LeadIntake,
    pub targets: TargetAllocator,
    pub reporting: TargetRollupReporter,
    pub assignments: LeadAssignmentStateMachine,
}

/// NIP of the staff member making the request, taken from `X-Staff-NIP`.
#[derive(Debug, Clone)]
pub struct ActorNip(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for ActorNip
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(STAFF_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| ActorNip(v.to_string()))
            .ok_or_else(|| AppError::Unauthorized("missing X-Staff-NIP header".to_string()))
    }
}

fn period_of(query: PeriodQuery) -> Result<Period, AppError> {
    Period::new(query.year, query.month).map_err(AppError::BadRequest)
}

/// Routes under `/api/v1`. Middleware is applied by the caller.
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/v1/leads", post(create_lead))
        .route("/api/v1/leads/unassigned", get(list_unassigned))
        .route("/api/v1/leads/assigned", get(list_assigned))
        .route("/api/v1/leads/:cif", get(get_lead))
        .route("/api/v1/leads/:cif/status", post(update_status))
        .route(
            "/api/v1/targets/yearly",
            post(set_annual_targets).get(annual_targets),
        )
        .route("/api/v1/targets/marketing/:nip", post(assign_marketing_targets))
        .route("/api/v1/targets/branch", get(branch_allocation))
        .route("/api/v1/reports/staff/:nip", get(individual_report))
        .route("/api/v1/reports/branch/:id", get(branch_report))
        .route("/api/v1/monitoring/branch/:id", get(branch_monitoring))
        .route("/api/v1/monitoring/staff/:nip", get(staff_monitoring))
        .route("/api/v1/monitoring/assignment", get(target_overview))
        .route("/api/v1/monitoring/product-performance", get(product_performance))
        .route("/api/v1/branches", post(create_branch).get(list_branches))
        .route("/api/v1/staff", post(register_staff))
}

/// Health check endpoint.
///
/// Returns the service status, version, and health information.
pub async fn health() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "rust-leads-api",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}

// ============ Leads ============

/// POST /api/v1/leads
///
/// Scores a new lead, computes eligibility for its top products and stores everything.
pub async fn create_lead(
    State(state): State<Arc<AppState>>,
    ActorNip(actor): ActorNip,
    Json(payload): Json<NewLeadRequest>,
) -> Result<(StatusCode, Json<LeadDetail>), AppError> {
    tracing::info!("POST /leads - CIF {} by {}", payload.cif, actor);

    state.directory.find_staff(&actor).await?;
    let detail = state.intake.create_lead(payload).await?;

    Ok((StatusCode::CREATED, Json(detail)))
}

/// GET /api/v1/leads/unassigned
pub async fn list_unassigned(
    State(state): State<Arc<AppState>>,
    ActorNip(actor): ActorNip,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Lead>>, AppError> {
    tracing::info!("GET /leads/unassigned by {}", actor);

    let leads = state.intake.list_unassigned(&actor, query.limit).await?;
    Ok(Json(leads))
}

/// GET /api/v1/leads/assigned?status=&search=&limit=
pub async fn list_assigned(
    State(state): State<Arc<AppState>>,
    ActorNip(actor): ActorNip,
    Query(query): Query<AssignedLeadQuery>,
) -> Result<Json<Vec<AssignedLead>>, AppError> {
    tracing::info!("GET /leads/assigned by {}", actor);

    let leads = state.intake.list_assigned(&actor, query).await?;
    Ok(Json(leads))
}

/// GET /api/v1/leads/:cif
pub async fn get_lead(
    State(state): State<Arc<AppState>>,
    ActorNip(actor): ActorNip,
    Path(cif): Path<String>,
) -> Result<Json<LeadDetail>, AppError> {
    tracing::info!("GET /leads/{} by {}", cif, actor);

    let detail = state
        .intake
        .get_lead(&actor, &cif)
        .await
        .with_context(|| format!("loading lead {}", cif))?;
    Ok(Json(detail))
}

/// POST /api/v1/leads/:cif/status
///
/// Claims the lead on first contact and moves its assignment through the lifecycle.
pub async fn update_status(
    State(state): State<Arc<AppState>>,
    ActorNip(actor): ActorNip,
    Path(cif): Path<String>,
    Json(payload): Json<StatusUpdateRequest>,
) -> Result<Json<LeadAssignment>, AppError> {
    tracing::info!("POST /leads/{}/status -> {} by {}", cif, payload.status, actor);

    let assignment = state.assignments.update_status(&actor, &cif, payload).await?;
    Ok(Json(assignment))
}

// ============ Targets ============

/// POST /api/v1/targets/yearly
///
/// Sets annual branch targets and derives the twelve monthly targets.
pub async fn set_annual_targets(
    State(state): State<Arc<AppState>>,
    ActorNip(actor): ActorNip,
    Json(payload): Json<AnnualTargetRequest>,
) -> Result<Json<Vec<AnnualTarget>>, AppError> {
    tracing::info!("POST /targets/yearly - {} by {}", payload.year, actor);

    let saved = state.targets.set_annual_targets(&actor, payload).await?;
    Ok(Json(saved))
}

/// GET /api/v1/targets/yearly?year=&branch_id=
pub async fn annual_targets(
    State(state): State<Arc<AppState>>,
    ActorNip(actor): ActorNip,
    Query(query): Query<AnnualTargetQuery>,
) -> Result<Json<Vec<AnnualTarget>>, AppError> {
    tracing::info!("GET /targets/yearly - {} by {}", query.year, actor);

    let targets = state.targets.annual_targets(&actor, query).await?;
    Ok(Json(targets))
}

/// POST /api/v1/targets/marketing/:nip
pub async fn assign_marketing_targets(
    State(state): State<Arc<AppState>>,
    ActorNip(actor): ActorNip,
    Path(nip): Path<String>,
    Json(payload): Json<MarketingTargetRequest>,
) -> Result<Json<Vec<MarketingTarget>>, AppError> {
    tracing::info!(
        "POST /targets/marketing/{} - {}-{:02} by {}",
        nip,
        payload.year,
        payload.month,
        actor
    );

    let saved = state
        .targets
        .assign_marketing_targets(&actor, &nip, payload)
        .await?;
    Ok(Json(saved))
}

/// GET /api/v1/targets/branch?month=&year=
pub async fn branch_allocation(
    State(state): State<Arc<AppState>>,
    ActorNip(actor): ActorNip,
    Query(query): Query<PeriodQuery>,
) -> Result<Json<Vec<ProductAllocation>>, AppError> {
    let period = period_of(query)?;
    tracing::info!("GET /targets/branch - {} by {}", period, actor);

    let rows = state.targets.branch_allocation(&actor, period).await?;
    Ok(Json(rows))
}

// ============ Reports ============

/// GET /api/v1/reports/staff/:nip?month=&year=
pub async fn individual_report(
    State(state): State<Arc<AppState>>,
    ActorNip(actor): ActorNip,
    Path(nip): Path<String>,
    Query(query): Query<PeriodQuery>,
) -> Result<Json<IndividualSummary>, AppError> {
    let period = period_of(query)?;
    tracing::info!("GET /reports/staff/{} - {} by {}", nip, period, actor);

    state.directory.find_staff(&actor).await?;
    let summary = state.reporting.individual_summary(&nip, period).await?;
    Ok(Json(summary))
}

/// GET /api/v1/reports/branch/:id?month=&year=
pub async fn branch_report(
    State(state): State<Arc<AppState>>,
    ActorNip(actor): ActorNip,
    Path(branch_id): Path<i64>,
    Query(query): Query<PeriodQuery>,
) -> Result<Json<BranchSummary>, AppError> {
    let period = period_of(query)?;
    tracing::info!("GET /reports/branch/{} - {} by {}", branch_id, period, actor);

    state.directory.find_staff(&actor).await?;
    let summary = state.reporting.branch_summary(branch_id, period).await?;
    Ok(Json(summary))
}

/// GET /api/v1/monitoring/branch/:id?month=&year=
pub async fn branch_monitoring(
    State(state): State<Arc<AppState>>,
    ActorNip(actor): ActorNip,
    Path(branch_id): Path<i64>,
    Query(query): Query<PeriodQuery>,
) -> Result<Json<Vec<MonitoringRow>>, AppError> {
    let period = period_of(query)?;
    tracing::info!("GET /monitoring/branch/{} - {} by {}", branch_id, period, actor);

    state.directory.find_staff(&actor).await?;
    let rows = state.reporting.branch_monitoring(branch_id, period).await?;
    Ok(Json(rows))
}

/// GET /api/v1/monitoring/staff/:nip?month=&year=
pub async fn staff_monitoring(
    State(state): State<Arc<AppState>>,
    ActorNip(actor): ActorNip,
    Path(nip): Path<String>,
    Query(query): Query<PeriodQuery>,
) -> Result<Json<StaffMonitoring>, AppError> {
    let period = period_of(query)?;
    tracing::info!("GET /monitoring/staff/{} - {} by {}", nip, period, actor);

    state.directory.find_staff(&actor).await?;
    let monitoring = state.reporting.staff_monitoring(&nip, period).await?;
    Ok(Json(monitoring))
}

/// GET /api/v1/monitoring/assignment?month=&year=&has_target=&search=
pub async fn target_overview(
    State(state): State<Arc<AppState>>,
    ActorNip(actor): ActorNip,
    Query(query): Query<TargetOverviewQuery>,
) -> Result<Json<Vec<TargetOverviewRow>>, AppError> {
    tracing::info!(
        "GET /monitoring/assignment - {}-{:02} by {}",
        query.year,
        query.month,
        actor
    );

    let rows = state.reporting.target_overview(&actor, query).await?;
    Ok(Json(rows))
}

/// GET /api/v1/monitoring/product-performance?product_id=&start_date=&end_date=&group_by=
///
/// Closings of one product per week, month or year for every marketer of the branch.
pub async fn product_performance(
    State(state): State<Arc<AppState>>,
    ActorNip(actor): ActorNip,
    Query(query): Query<PerformanceQuery>,
) -> Result<Json<ProductPerformance>, AppError> {
    tracing::info!(
        "GET /monitoring/product-performance - product {} {}..{} by {}",
        query.product_id,
        query.start_date,
        query.end_date,
        actor
    );

    let performance = state.reporting.product_performance(&actor, query).await?;
    Ok(Json(performance))
}

// ============ Directory ============

/// POST /api/v1/branches
pub async fn create_branch(
    State(state): State<Arc<AppState>>,
    ActorNip(actor): ActorNip,
    Json(payload): Json<CreateBranchRequest>,
) -> Result<(StatusCode, Json<Branch>), AppError> {
    tracing::info!("POST /branches - '{}' by {}", payload.name, actor);

    let branch = state.directory.create_branch(&actor, &payload.name).await?;
    Ok((StatusCode::CREATED, Json(branch)))
}

/// GET /api/v1/branches
pub async fn list_branches(
    State(state): State<Arc<AppState>>,
    ActorNip(actor): ActorNip,
) -> Result<Json<Vec<Branch>>, AppError> {
    tracing::info!("GET /branches by {}", actor);

    state.directory.find_staff(&actor).await?;
    let branches = state.directory.list_branches().await?;
    Ok(Json(branches))
}

/// POST /api/v1/staff
pub async fn register_staff(
    State(state): State<Arc<AppState>>,
    ActorNip(actor): ActorNip,
    Json(payload): Json<RegisterStaffRequest>,
) -> Result<(StatusCode, Json<Staff>), AppError> {
    tracing::info!("POST /staff - {} '{}' by {}", payload.role, payload.name, actor);

    let staff = state.directory.register_staff(&actor, payload).await?;
    Ok((StatusCode::CREATED, Json(staff)))
}

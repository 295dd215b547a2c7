//! Target rollups: individual and branch achievement, and the monitoring dashboard.
//!
//! Nothing here is persisted. Achievement is recomputed from closed assignments on every
//! query, including the carry-over credited from the previous month.

use chrono::{DateTime, Datelike, Days, Months, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

use crate::directory::{load_actor, require_role};
use crate::errors::LeadError;
use crate::models::{
    ClosingScope, Grouping, PerformanceQuery, Period, ProductTotal, Role, Staff,
    TargetOverviewQuery,
};
use crate::store::{Store, UnitOfWork};

/// Longest series a product performance report will produce.
pub const MAX_PERFORMANCE_BUCKETS: usize = 366;

/// NIP of the series that sums every marketer of the branch.
pub const BRANCH_SERIES: &str = "ALL";

/// `achieved / target` as a percentage rounded to two decimals, or 0 without a target.
pub fn achievement_percentage(achieved: i64, target: i64) -> f64 {
    if target <= 0 {
        return 0.0;
    }
    ((achieved as f64 / target as f64) * 100.0 * 100.0).round() / 100.0
}

/// Over-achievement of the previous month credited to the current one.
pub fn carry_over(previous_closed: i64, previous_target: i64) -> i64 {
    (previous_closed - previous_target).max(0)
}

/// Label of the bucket containing `date`: ISO week `2025-W07`, month `2025-02` or year `2025`.
pub fn bucket_label(date: NaiveDate, grouping: Grouping) -> String {
    match grouping {
        Grouping::Week => {
            let week = date.iso_week();
            format!("{:04}-W{:02}", week.year(), week.week())
        }
        Grouping::Month => format!("{:04}-{:02}", date.year(), date.month()),
        Grouping::Year => format!("{:04}", date.year()),
    }
}

fn bucket_start(date: NaiveDate, grouping: Grouping) -> Option<NaiveDate> {
    match grouping {
        Grouping::Week => {
            let offset = u64::from(date.weekday().num_days_from_monday());
            date.checked_sub_days(Days::new(offset))
        }
        Grouping::Month => date.with_day(1),
        Grouping::Year => NaiveDate::from_ymd_opt(date.year(), 1, 1),
    }
}

fn next_bucket(start: NaiveDate, grouping: Grouping) -> Option<NaiveDate> {
    match grouping {
        Grouping::Week => start.checked_add_days(Days::new(7)),
        Grouping::Month => start.checked_add_months(Months::new(1)),
        Grouping::Year => start.checked_add_months(Months::new(12)),
    }
}

/// Labels of every bucket touching `start..=end`, oldest first.
pub fn bucket_labels(
    start: NaiveDate,
    end: NaiveDate,
    grouping: Grouping,
) -> Result<Vec<String>, LeadError> {
    if start > end {
        return Err(LeadError::Validation(
            "start_date must not be after end_date".to_string(),
        ));
    }

    let mut labels = Vec::new();
    let mut cursor = bucket_start(start, grouping);
    while let Some(bucket) = cursor.filter(|b| *b <= end) {
        if labels.len() == MAX_PERFORMANCE_BUCKETS {
            return Err(LeadError::Validation(format!(
                "date range spans more than {} buckets",
                MAX_PERFORMANCE_BUCKETS
            )));
        }
        labels.push(bucket_label(bucket, grouping));
        cursor = next_bucket(bucket, grouping);
    }
    Ok(labels)
}

/// Calendar months overlapping `start..=end`.
fn months_between(start: NaiveDate, end: NaiveDate) -> Vec<Period> {
    let last = Period {
        year: end.year(),
        month: end.month(),
    };
    let mut period = Period {
        year: start.year(),
        month: start.month(),
    };
    let mut months = Vec::new();
    while period <= last {
        months.push(period);
        period = period.next();
    }
    months
}

/// `[start 00:00, day after end 00:00)` in UTC.
fn day_range(
    start: NaiveDate,
    end: NaiveDate,
) -> Result<(DateTime<Utc>, DateTime<Utc>), LeadError> {
    let after_end = end
        .succ_opt()
        .ok_or_else(|| LeadError::Validation("end_date is out of range".to_string()))?;
    Ok((
        Utc.from_utc_datetime(&start.and_time(NaiveTime::MIN)),
        Utc.from_utc_datetime(&after_end.and_time(NaiveTime::MIN)),
    ))
}

fn total(rows: &[ProductTotal]) -> i64 {
    rows.iter().map(|r| r.amount).sum()
}

fn amount_for(rows: &[ProductTotal], product_id: i64) -> i64 {
    rows.iter()
        .find(|r| r.product_id == product_id)
        .map(|r| r.amount)
        .unwrap_or(0)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndividualSummary {
    pub nip: String,
    pub name: String,
    pub year: i32,
    pub month: u32,
    pub total_target: i64,
    pub total_achieved: i64,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductSummary {
    pub product_id: i64,
    pub product_code: String,
    pub target: i64,
    pub achieved: i64,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BranchSummary {
    pub branch_id: i64,
    pub branch_name: String,
    pub year: i32,
    pub month: u32,
    pub total_target: i64,
    pub total_achieved: i64,
    pub percentage: f64,
    pub products: Vec<ProductSummary>,
}

/// One marketing staff member on the monitoring dashboard.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitoringRow {
    pub nip: String,
    pub name: String,
    pub monthly_target: i64,
    pub monthly_closing: i64,
    pub carry_over: i64,
    pub monthly_achieved: i64,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StaffMonitoring {
    #[serde(flatten)]
    pub summary: MonitoringRow,
    pub products: Vec<ProductSummary>,
}

/// Marketing target of one product.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductTarget {
    pub product_id: i64,
    pub product_code: String,
    pub product_name: String,
    pub amount: i64,
}

/// A marketer's assigned targets for one month across the whole catalog.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetOverviewRow {
    pub nip: String,
    pub name: String,
    pub has_target: bool,
    pub total_target: i64,
    pub targets: Vec<ProductTarget>,
}

/// Closings and targets of one marketer (or the branch) per bucket.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceSeries {
    /// Staff NIP, or [`BRANCH_SERIES`] for the branch total.
    pub nip: String,
    pub name: String,
    pub data: Vec<i64>,
    /// Assigned target per bucket. Weekly buckets carry no target.
    pub targets: Vec<i64>,
    /// Target over every month the range touches.
    pub total_target: i64,
}

impl PerformanceSeries {
    fn empty(nip: &str, name: &str, buckets: usize) -> Self {
        Self {
            nip: nip.to_string(),
            name: name.to_string(),
            data: vec![0; buckets],
            targets: vec![0; buckets],
            total_target: 0,
        }
    }

    fn absorb(&mut self, other: &PerformanceSeries) {
        for (sum, value) in self.data.iter_mut().zip(&other.data) {
            *sum += value;
        }
        for (sum, value) in self.targets.iter_mut().zip(&other.targets) {
            *sum += value;
        }
        self.total_target += other.total_target;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductPerformance {
    pub product_id: i64,
    pub product_code: String,
    pub product_name: String,
    pub group_by: Grouping,
    pub labels: Vec<String>,
    /// Branch total first, then one series per marketer ordered by NIP.
    pub series: Vec<PerformanceSeries>,
}

pub struct TargetRollupReporter {
    store: Arc<dyn Store>,
}

impl TargetRollupReporter {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Marketing targets versus closings of one staff member for a month.
    pub async fn individual_summary(
        &self,
        nip: &str,
        period: Period,
    ) -> Result<IndividualSummary, LeadError> {
        let mut uow = self.store.begin().await?;
        let staff = load_actor(uow.as_mut(), nip).await?;

        let targets = uow.marketing_targets_for_staff(staff.id, period).await?;
        let total_target: i64 = targets.iter().map(|t| t.amount).sum();
        let closed = uow
            .closed_totals(ClosingScope::Staff(staff.id), period)
            .await?;
        let total_achieved = total(&closed);

        Ok(IndividualSummary {
            nip: staff.nip,
            name: staff.name,
            year: period.year,
            month: period.month,
            total_target,
            total_achieved,
            percentage: achievement_percentage(total_achieved, total_target),
        })
    }

    /// Branch monthly targets versus closings of every staff member in the branch.
    ///
    /// Closings only count for products the branch has a target for in that month.
    pub async fn branch_summary(
        &self,
        branch_id: i64,
        period: Period,
    ) -> Result<BranchSummary, LeadError> {
        let mut uow = self.store.begin().await?;
        let branch = uow
            .find_branch(branch_id)
            .await?
            .ok_or_else(|| LeadError::NotFound(format!("branch {} not found", branch_id)))?;

        let targets = uow.monthly_targets(branch_id, period).await?;
        let closed = uow
            .closed_totals(ClosingScope::Branch(branch_id), period)
            .await?;

        let mut products = Vec::with_capacity(targets.len());
        for target in &targets {
            let achieved = amount_for(&closed, target.product_id);
            products.push(ProductSummary {
                product_id: target.product_id,
                product_code: product_code(uow.as_mut(), target.product_id).await?,
                target: target.amount,
                achieved,
                percentage: achievement_percentage(achieved, target.amount),
            });
        }

        let total_target = products.iter().map(|p| p.target).sum();
        let total_achieved = products.iter().map(|p| p.achieved).sum();

        Ok(BranchSummary {
            branch_id: branch.id,
            branch_name: branch.name,
            year: period.year,
            month: period.month,
            total_target,
            total_achieved,
            percentage: achievement_percentage(total_achieved, total_target),
            products,
        })
    }

    /// Dashboard rows for every marketing staff member of a branch, ordered by NIP.
    pub async fn branch_monitoring(
        &self,
        branch_id: i64,
        period: Period,
    ) -> Result<Vec<MonitoringRow>, LeadError> {
        let mut uow = self.store.begin().await?;
        if uow.find_branch(branch_id).await?.is_none() {
            return Err(LeadError::NotFound(format!("branch {} not found", branch_id)));
        }

        let staff = uow.list_staff_in_branch(branch_id, Role::Marketing).await?;
        let mut rows = Vec::with_capacity(staff.len());
        for member in &staff {
            rows.push(monitoring_row(uow.as_mut(), member, period).await?);
        }
        Ok(rows)
    }

    /// Dashboard row for one marketing staff member plus a per-product breakdown of the
    /// current month.
    pub async fn staff_monitoring(
        &self,
        nip: &str,
        period: Period,
    ) -> Result<StaffMonitoring, LeadError> {
        let mut uow = self.store.begin().await?;
        let staff = load_actor(uow.as_mut(), nip).await?;
        if staff.role != Role::Marketing {
            return Err(LeadError::NotFound(format!(
                "marketing staff {} not found",
                nip
            )));
        }

        let summary = monitoring_row(uow.as_mut(), &staff, period).await?;

        let targets = uow.marketing_targets_for_staff(staff.id, period).await?;
        let closed = uow
            .closed_totals(ClosingScope::Staff(staff.id), period)
            .await?;

        let mut product_ids: Vec<i64> = targets
            .iter()
            .map(|t| t.product_id)
            .chain(closed.iter().map(|c| c.product_id))
            .collect();
        product_ids.sort_unstable();
        product_ids.dedup();

        let mut products = Vec::with_capacity(product_ids.len());
        for product_id in product_ids {
            let target = targets
                .iter()
                .filter(|t| t.product_id == product_id)
                .map(|t| t.amount)
                .sum();
            let achieved = amount_for(&closed, product_id);
            products.push(ProductSummary {
                product_id,
                product_code: product_code(uow.as_mut(), product_id).await?,
                target,
                achieved,
                percentage: achievement_percentage(achieved, target),
            });
        }

        Ok(StaffMonitoring { summary, products })
    }

    /// Every marketer of the manager's branch with their targets for the month.
    ///
    /// Rows are ordered by name. `has_target` keeps only marketers with (or without) a
    /// non-zero total, and `search` matches NIP or name.
    pub async fn target_overview(
        &self,
        actor_nip: &str,
        query: TargetOverviewQuery,
    ) -> Result<Vec<TargetOverviewRow>, LeadError> {
        let period = Period::new(query.year, query.month).map_err(LeadError::Validation)?;
        let needle = query
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase);

        let mut uow = self.store.begin().await?;
        let branch_id = managed_branch(uow.as_mut(), actor_nip, "view marketing targets").await?;
        let products = uow.list_products().await?;
        let mut staff = uow.list_staff_in_branch(branch_id, Role::Marketing).await?;
        staff.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.nip.cmp(&b.nip)));

        let mut rows = Vec::with_capacity(staff.len());
        for member in staff {
            if let Some(needle) = &needle {
                let matches = member.nip.to_lowercase().contains(needle.as_str())
                    || member.name.to_lowercase().contains(needle.as_str());
                if !matches {
                    continue;
                }
            }

            let assigned = uow.marketing_targets_for_staff(member.id, period).await?;
            let targets: Vec<ProductTarget> = products
                .iter()
                .map(|product| ProductTarget {
                    product_id: product.id,
                    product_code: product.code.clone(),
                    product_name: product.name.clone(),
                    amount: assigned
                        .iter()
                        .filter(|t| t.product_id == product.id)
                        .map(|t| t.amount)
                        .sum(),
                })
                .collect();
            let total_target: i64 = targets.iter().map(|t| t.amount).sum();
            let has_target = total_target > 0;
            if query.has_target.is_some_and(|wanted| wanted != has_target) {
                continue;
            }

            rows.push(TargetOverviewRow {
                nip: member.nip,
                name: member.name,
                has_target,
                total_target,
                targets,
            });
        }
        Ok(rows)
    }

    /// Closings of one product in the manager's branch, bucketed by week, month or year,
    /// with each marketer's assigned targets alongside.
    pub async fn product_performance(
        &self,
        actor_nip: &str,
        query: PerformanceQuery,
    ) -> Result<ProductPerformance, LeadError> {
        let labels = bucket_labels(query.start_date, query.end_date, query.group_by)?;
        let (from, to) = day_range(query.start_date, query.end_date)?;
        let months = months_between(query.start_date, query.end_date);

        let mut uow = self.store.begin().await?;
        let branch_id =
            managed_branch(uow.as_mut(), actor_nip, "view product performance").await?;
        let product = uow.find_product(query.product_id).await?.ok_or_else(|| {
            LeadError::NotFound(format!("product {} not found", query.product_id))
        })?;
        let staff = uow.list_staff_in_branch(branch_id, Role::Marketing).await?;
        let closings = uow
            .closings(ClosingScope::Branch(branch_id), product.id, from, to)
            .await?;

        let index: HashMap<&str, usize> = labels
            .iter()
            .enumerate()
            .map(|(i, label)| (label.as_str(), i))
            .collect();

        let mut branch = PerformanceSeries::empty(BRANCH_SERIES, "All", labels.len());
        let mut series = Vec::with_capacity(staff.len() + 1);
        for member in &staff {
            let mut row = PerformanceSeries::empty(&member.nip, &member.name, labels.len());

            for closing in closings.iter().filter(|c| c.staff_id == member.id) {
                let label = bucket_label(closing.closed_at.date_naive(), query.group_by);
                if let Some(&i) = index.get(label.as_str()) {
                    row.data[i] += closing.amount;
                }
            }

            for &period in &months {
                let amount: i64 = uow
                    .marketing_targets_for_staff(member.id, period)
                    .await?
                    .iter()
                    .filter(|t| t.product_id == product.id)
                    .map(|t| t.amount)
                    .sum();
                row.total_target += amount;
                if query.group_by != Grouping::Week {
                    let label = bucket_label(period.start().date_naive(), query.group_by);
                    if let Some(&i) = index.get(label.as_str()) {
                        row.targets[i] += amount;
                    }
                }
            }

            branch.absorb(&row);
            series.push(row);
        }
        series.insert(0, branch);

        tracing::debug!(
            "Product performance for {} in branch {}: {} buckets, {} closings",
            product.code,
            branch_id,
            labels.len(),
            closings.len()
        );

        Ok(ProductPerformance {
            product_id: product.id,
            product_code: product.code,
            product_name: product.name,
            group_by: query.group_by,
            labels,
            series,
        })
    }
}

/// Branch of the acting branch manager.
async fn managed_branch(
    uow: &mut dyn UnitOfWork,
    actor_nip: &str,
    action: &str,
) -> Result<i64, LeadError> {
    let actor = load_actor(uow, actor_nip).await?;
    require_role(&actor, Role::BranchManager, action)?;
    actor.branch_id.ok_or_else(|| {
        LeadError::Authorization(format!("staff {} is not attached to a branch", actor.nip))
    })
}

async fn product_code(uow: &mut dyn UnitOfWork, product_id: i64) -> Result<String, LeadError> {
    Ok(uow
        .find_product(product_id)
        .await?
        .map(|p| p.code)
        .unwrap_or_else(|| product_id.to_string()))
}

async fn staff_totals(
    uow: &mut dyn UnitOfWork,
    staff_id: i64,
    period: Period,
) -> Result<(i64, i64), LeadError> {
    let target: i64 = uow
        .marketing_targets_for_staff(staff_id, period)
        .await?
        .iter()
        .map(|t| t.amount)
        .sum();
    let closed = total(&uow.closed_totals(ClosingScope::Staff(staff_id), period).await?);
    Ok((target, closed))
}

async fn monitoring_row(
    uow: &mut dyn UnitOfWork,
    staff: &Staff,
    period: Period,
) -> Result<MonitoringRow, LeadError> {
    let (monthly_target, monthly_closing) = staff_totals(uow, staff.id, period).await?;
    let (previous_target, previous_closing) =
        staff_totals(uow, staff.id, period.previous()).await?;

    let carry_over = carry_over(previous_closing, previous_target);
    let monthly_achieved = monthly_closing + carry_over;

    Ok(MonitoringRow {
        nip: staff.nip.clone(),
        name: staff.name.clone(),
        monthly_target,
        monthly_closing,
        carry_over,
        monthly_achieved,
        percentage: achievement_percentage(monthly_achieved, monthly_target),
    })
}

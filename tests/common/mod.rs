//! Shared fixtures for the integration tests: an in-memory store seeded with two branches
//! and their staff, a manually driven clock and scripted prediction oracles.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

use rust_leads_api::assignment::LeadAssignmentStateMachine;
use rust_leads_api::clock::{Clock, FixedClock};
use rust_leads_api::directory::{Directory, RandomNipGenerator};
use rust_leads_api::errors::LeadError;
use rust_leads_api::handlers::AppState;
use rust_leads_api::intake::{IntakeSettings, LeadIntake};
use rust_leads_api::integrations::memory::MemoryStore;
use rust_leads_api::integrations::prediction::{PredictionOracle, Scores};
use rust_leads_api::models::{
    ActivityLevel, AssignmentStatus, Branch, Lead, NewLead, NewLeadRequest, NewStaff, Role, Staff,
    StatusUpdateRequest,
};
use rust_leads_api::reporting::TargetRollupReporter;
use rust_leads_api::store::Store;
use rust_leads_api::targets::TargetAllocator;

pub const ADMIN_NIP: &str = "M0000000001";
pub const BM_NIP: &str = "M1000000001";
pub const MARKETING_A: &str = "M2000000001";
pub const MARKETING_B: &str = "M2000000002";
pub const OTHER_BM_NIP: &str = "M3000000001";
pub const OTHER_MARKETING: &str = "M3000000002";

pub fn at(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, 10, 0, 0).unwrap()
}

/// Staff and branches seeded into every fixture store.
pub struct Org {
    pub branch: Branch,
    pub other_branch: Branch,
    pub admin: Staff,
    pub bm: Staff,
    pub marketing_a: Staff,
    pub marketing_b: Staff,
    pub other_bm: Staff,
    pub other_marketing: Staff,
}

fn staff(nip: &str, name: &str, role: Role, branch_id: Option<i64>) -> NewStaff {
    NewStaff {
        nip: nip.to_string(),
        name: name.to_string(),
        role,
        branch_id,
    }
}

pub async fn seed_org(store: &MemoryStore, now: DateTime<Utc>) -> Org {
    let mut uow = store.begin().await.unwrap();
    let branch = uow.insert_branch("KC Bandung Asia Afrika", now).await.unwrap();
    let other_branch = uow.insert_branch("KC Surabaya Darmo", now).await.unwrap();

    let admin = uow
        .insert_staff(&staff(ADMIN_NIP, "Administrator", Role::Admin, None), now)
        .await
        .unwrap();
    let bm = uow
        .insert_staff(&staff(BM_NIP, "Rina Kusuma", Role::BranchManager, Some(branch.id)), now)
        .await
        .unwrap();
    let marketing_a = uow
        .insert_staff(&staff(MARKETING_A, "Budi Santoso", Role::Marketing, Some(branch.id)), now)
        .await
        .unwrap();
    let marketing_b = uow
        .insert_staff(&staff(MARKETING_B, "Sari Wulandari", Role::Marketing, Some(branch.id)), now)
        .await
        .unwrap();
    let other_bm = uow
        .insert_staff(
            &staff(OTHER_BM_NIP, "Agus Pratama", Role::BranchManager, Some(other_branch.id)),
            now,
        )
        .await
        .unwrap();
    let other_marketing = uow
        .insert_staff(
            &staff(OTHER_MARKETING, "Dewi Lestari", Role::Marketing, Some(other_branch.id)),
            now,
        )
        .await
        .unwrap();
    uow.commit().await.unwrap();

    Org {
        branch,
        other_branch,
        admin,
        bm,
        marketing_a,
        marketing_b,
        other_bm,
        other_marketing,
    }
}

/// Adds extra marketing staff to a branch and returns their NIPs.
pub async fn add_marketing(store: &MemoryStore, branch_id: i64, count: usize) -> Vec<String> {
    let mut uow = store.begin().await.unwrap();
    let mut nips = Vec::with_capacity(count);
    for i in 0..count {
        let nip = format!("M5{:09}", i);
        uow.insert_staff(
            &staff(&nip, &format!("Marketing {}", i), Role::Marketing, Some(branch_id)),
            Utc::now(),
        )
        .await
        .unwrap();
        nips.push(nip);
    }
    uow.commit().await.unwrap();
    nips
}

pub fn new_lead(cif: &str) -> NewLead {
    NewLead {
        cif: cif.to_string(),
        account_number: format!("7{}", cif),
        name: format!("Nasabah {}", cif),
        company_name: Some("PT Telkom Indonesia".to_string()),
        phone: None,
        email: None,
        age: 30,
        monthly_income: 10_000_000,
        payroll: false,
        gender: Some("F".to_string()),
        married: Some(true),
        segment: Some("retail".to_string()),
        job: Some("karyawan".to_string()),
        address: None,
        existing_products: vec!["tabungan".to_string()],
        transaction_activity: Some(ActivityLevel::Active),
    }
}

pub fn lead_request(cif: &str) -> NewLeadRequest {
    NewLeadRequest {
        cif: cif.to_string(),
        account_number: format!("7{}", cif),
        name: format!("Nasabah {}", cif),
        company_name: Some("PT Telkom Indonesia".to_string()),
        phone: None,
        email: None,
        age: 30,
        monthly_income: 10_000_000,
        payroll: false,
        gender: None,
        married: None,
        segment: None,
        job: None,
        address: None,
        existing_products: vec![],
        transaction_activity: None,
    }
}

/// Stores a lead directly, without going through intake.
pub async fn insert_lead(store: &MemoryStore, cif: &str) -> Lead {
    let mut uow = store.begin().await.unwrap();
    let lead = uow.insert_lead(&new_lead(cif), Utc::now()).await.unwrap();
    uow.commit().await.unwrap();
    lead
}

pub fn status(status: AssignmentStatus) -> StatusUpdateRequest {
    StatusUpdateRequest {
        status,
        product_id: None,
        amount: None,
        notes: None,
    }
}

pub fn closing(product_id: i64, amount: i64) -> StatusUpdateRequest {
    StatusUpdateRequest {
        status: AssignmentStatus::Closed,
        product_id: Some(product_id),
        amount: Some(amount),
        notes: Some("akad signed".to_string()),
    }
}

// ============ Oracles ============

/// Always answers with the same scores and counts its calls.
pub struct StaticOracle {
    scores: Scores,
    pub calls: AtomicUsize,
}

impl StaticOracle {
    pub fn new(pairs: &[(&str, f64)]) -> Self {
        Self {
            scores: pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PredictionOracle for StaticOracle {
    async fn predict(&self, _lead: &NewLead) -> Result<Scores, LeadError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.scores.clone())
    }
}

/// Always fails as an unreachable scoring service would.
pub struct DownOracle;

#[async_trait]
impl PredictionOracle for DownOracle {
    async fn predict(&self, _lead: &NewLead) -> Result<Scores, LeadError> {
        Err(LeadError::PredictionUnavailable(
            "connection refused".to_string(),
        ))
    }
}

/// Signals `entered` when a prediction starts and waits for `release` before answering.
pub struct GateOracle {
    pub entered: Notify,
    pub release: Notify,
}

impl GateOracle {
    pub fn new() -> Self {
        Self {
            entered: Notify::new(),
            release: Notify::new(),
        }
    }
}

#[async_trait]
impl PredictionOracle for GateOracle {
    async fn predict(&self, _lead: &NewLead) -> Result<Scores, LeadError> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(HashMap::from([("mitraguna".to_string(), 0.8)]))
    }
}

// ============ Services ============

pub struct Services {
    pub store: Arc<MemoryStore>,
    pub clock: Arc<FixedClock>,
    pub org: Org,
    pub products: HashMap<String, i64>,
    pub directory: Directory,
    pub targets: TargetAllocator,
    pub reporting: TargetRollupReporter,
    pub assignments: LeadAssignmentStateMachine,
}

impl Services {
    pub async fn new(now: DateTime<Utc>) -> Self {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(FixedClock::new(now));
        let org = seed_org(&store, now).await;
        let products = store.product_ids().await;

        let dyn_store: Arc<dyn Store> = store.clone();
        let dyn_clock: Arc<dyn Clock> = clock.clone();

        Self {
            directory: Directory::new(
                dyn_store.clone(),
                dyn_clock.clone(),
                Arc::new(RandomNipGenerator),
            ),
            targets: TargetAllocator::new(dyn_store.clone()),
            reporting: TargetRollupReporter::new(dyn_store.clone()),
            assignments: LeadAssignmentStateMachine::new(dyn_store, dyn_clock),
            store,
            clock,
            org,
            products,
        }
    }

    pub fn product(&self, code: &str) -> i64 {
        self.products[code]
    }

    pub fn intake(&self, oracle: Arc<dyn PredictionOracle>) -> LeadIntake {
        LeadIntake::new(
            self.store.clone(),
            self.clock.clone(),
            oracle,
            IntakeSettings::default(),
        )
    }

    /// Full application state over this fixture's store, for router tests.
    pub fn app_state(&self, oracle: Arc<dyn PredictionOracle>) -> Arc<AppState> {
        let store: Arc<dyn Store> = self.store.clone();
        let clock: Arc<dyn Clock> = self.clock.clone();
        Arc::new(AppState {
            directory: Directory::new(store.clone(), clock.clone(), Arc::new(RandomNipGenerator)),
            intake: self.intake(oracle),
            targets: TargetAllocator::new(store.clone()),
            reporting: TargetRollupReporter::new(store.clone()),
            assignments: LeadAssignmentStateMachine::new(store, clock),
        })
    }

    /// Claims and closes a fresh lead for `nip` at the given time.
    pub async fn close_lead_at(
        &self,
        cif: &str,
        nip: &str,
        product: &str,
        amount: i64,
        when: DateTime<Utc>,
    ) {
        insert_lead(&self.store, cif).await;
        self.clock.set(when);
        self.assignments
            .update_status(nip, cif, closing(self.product(product), amount))
            .await
            .unwrap();
    }
}

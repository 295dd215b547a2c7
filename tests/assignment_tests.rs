/// Lead assignment lifecycle against the in-memory store.
mod common;

use chrono::Duration;

use common::*;
use rust_leads_api::errors::LeadError;
use rust_leads_api::models::{AssignmentStatus, StatusUpdateRequest};

#[tokio::test]
async fn test_full_lifecycle_new_contacted_closed() {
    let svc = Services::new(at(2025, 5, 2)).await;
    insert_lead(&svc.store, "CIF100").await;

    let claimed = svc
        .assignments
        .update_status(MARKETING_A, "CIF100", status(AssignmentStatus::New))
        .await
        .unwrap();
    assert_eq!(claimed.status, AssignmentStatus::New);
    assert_eq!(claimed.staff_id, svc.org.marketing_a.id);

    svc.clock.advance(Duration::days(3));
    let contacted = svc
        .assignments
        .update_status(MARKETING_A, "CIF100", status(AssignmentStatus::Contacted))
        .await
        .unwrap();
    assert_eq!(contacted.id, claimed.id);
    assert_eq!(contacted.updated_at, at(2025, 5, 5));

    svc.clock.set(at(2025, 5, 20));
    let closed = svc
        .assignments
        .update_status(MARKETING_A, "CIF100", closing(svc.product("griya"), 250_000_000))
        .await
        .unwrap();
    assert_eq!(closed.status, AssignmentStatus::Closed);
    assert_eq!(closed.amount, Some(250_000_000));
    assert_eq!(closed.closed_at, Some(at(2025, 5, 20)));
    assert_eq!(svc.store.counts().await.assignments, 1);
}

#[tokio::test]
async fn test_closed_and_rejected_are_final() {
    let svc = Services::new(at(2025, 5, 2)).await;
    svc.close_lead_at("CIF101", MARKETING_A, "oto", 150_000_000, at(2025, 5, 3))
        .await;

    let err = svc
        .assignments
        .update_status(MARKETING_A, "CIF101", status(AssignmentStatus::Contacted))
        .await
        .unwrap_err();
    assert!(matches!(err, LeadError::FinalState(_)));

    insert_lead(&svc.store, "CIF102").await;
    let reject = StatusUpdateRequest {
        status: AssignmentStatus::Rejected,
        product_id: None,
        amount: None,
        notes: Some("sudah punya KPR di bank lain".to_string()),
    };
    svc.assignments
        .update_status(MARKETING_A, "CIF102", reject)
        .await
        .unwrap();

    let err = svc
        .assignments
        .update_status(MARKETING_A, "CIF102", closing(svc.product("griya"), 1))
        .await
        .unwrap_err();
    assert!(matches!(err, LeadError::FinalState(_)));
}

#[tokio::test]
async fn test_rejecting_without_notes_is_invalid() {
    let svc = Services::new(at(2025, 5, 2)).await;
    insert_lead(&svc.store, "CIF103").await;

    let err = svc
        .assignments
        .update_status(MARKETING_A, "CIF103", status(AssignmentStatus::Rejected))
        .await
        .unwrap_err();
    assert!(matches!(err, LeadError::Validation(_)));
    // The claim is part of the failed update and is rolled back with it.
    assert_eq!(svc.store.counts().await.assignments, 0);
}

#[tokio::test]
async fn test_closing_with_unknown_product_keeps_previous_status() {
    let svc = Services::new(at(2025, 5, 2)).await;
    insert_lead(&svc.store, "CIF104").await;
    svc.assignments
        .update_status(MARKETING_A, "CIF104", status(AssignmentStatus::Contacted))
        .await
        .unwrap();

    let err = svc
        .assignments
        .update_status(MARKETING_A, "CIF104", closing(9_999, 10_000_000))
        .await
        .unwrap_err();
    assert!(matches!(err, LeadError::NotFound(_)));

    let current = svc
        .assignments
        .update_status(MARKETING_A, "CIF104", status(AssignmentStatus::Contacted))
        .await
        .unwrap();
    assert_eq!(current.closed_at, None);
}

#[tokio::test]
async fn test_lead_held_by_another_marketing_conflicts() {
    let svc = Services::new(at(2025, 5, 2)).await;
    insert_lead(&svc.store, "CIF105").await;

    svc.assignments
        .update_status(MARKETING_A, "CIF105", status(AssignmentStatus::New))
        .await
        .unwrap();

    let err = svc
        .assignments
        .update_status(MARKETING_B, "CIF105", status(AssignmentStatus::Contacted))
        .await
        .unwrap_err();
    assert!(matches!(err, LeadError::Conflict(_)));
}

#[tokio::test]
async fn test_only_marketing_staff_work_leads() {
    let svc = Services::new(at(2025, 5, 2)).await;
    insert_lead(&svc.store, "CIF106").await;

    for nip in [BM_NIP, ADMIN_NIP] {
        let err = svc
            .assignments
            .update_status(nip, "CIF106", status(AssignmentStatus::New))
            .await
            .unwrap_err();
        assert!(matches!(err, LeadError::Authorization(_)), "{}: {:?}", nip, err);
    }

    let err = svc
        .assignments
        .update_status("M9999999999", "CIF106", status(AssignmentStatus::New))
        .await
        .unwrap_err();
    assert!(matches!(err, LeadError::NotFound(_)));

    let err = svc
        .assignments
        .update_status(MARKETING_A, "NOSUCHCIF", status(AssignmentStatus::New))
        .await
        .unwrap_err();
    assert!(matches!(err, LeadError::NotFound(_)));
}

#[tokio::test]
async fn test_concurrent_claims_have_exactly_one_winner() {
    let svc = Services::new(at(2025, 5, 2)).await;
    insert_lead(&svc.store, "CIF107").await;

    let (a, b) = tokio::join!(
        svc.assignments
            .update_status(MARKETING_A, "CIF107", status(AssignmentStatus::Contacted)),
        svc.assignments
            .update_status(MARKETING_B, "CIF107", status(AssignmentStatus::Contacted)),
    );

    let outcomes = [a, b];
    let winners = outcomes.iter().filter(|r| r.is_ok()).count();
    let conflicts = outcomes
        .iter()
        .filter(|r| matches!(r, Err(LeadError::Conflict(_))))
        .count();
    assert_eq!(winners, 1);
    assert_eq!(conflicts, 1);
    assert_eq!(svc.store.counts().await.assignments, 1);
}

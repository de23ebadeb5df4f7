//! Payment reference issuance, cancellation and expiry tests.

mod common;

use chrono::Duration;
use common::{charge_for, dec, period, register, scripted_engine, start_time, test_engine};
use dues_service::models::{ChargeStatus, PaymentReference, ReferenceStatus};
use dues_service::services::ReferenceSweeper;
use dues_service::DuesError;
use futures::future::join_all;
use std::collections::HashSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[tokio::test]
async fn issue_reference_binds_charges_and_sums_amount() {
    let t = test_engine();
    let resident = register(&t.engine, "A-101").await;
    let march = charge_for(&t.engine, &resident, "50.00", "Cuota", period(2026, 3)).await;
    let april = charge_for(&t.engine, &resident, "52.25", "Cuota", period(2026, 4)).await;

    let reference = t
        .engine
        .issue_reference(resident.resident_id, vec![march.charge_id, april.charge_id])
        .await
        .unwrap();

    assert_eq!(reference.status, ReferenceStatus::Active);
    assert_eq!(reference.amount.to_string(), "102.25");
    assert_eq!(reference.charge_ids, vec![march.charge_id, april.charge_id]);
    assert_eq!(reference.resident_id, resident.resident_id);
    assert_eq!(reference.created_utc, start_time());
    assert_eq!(reference.expires_utc, Some(start_time() + Duration::hours(24)));
    assert_eq!(
        reference.code,
        PaymentReference::format_code(start_time(), 1)
    );

    let debt = t
        .engine
        .get_outstanding_debt(resident.resident_id)
        .await
        .unwrap();
    assert!(debt
        .items
        .iter()
        .all(|i| i.charge.status == ChargeStatus::Referenced
            && i.charge.reference_id == Some(reference.reference_id)));
}

#[tokio::test]
async fn codes_are_unique_across_issuances() {
    let t = test_engine();
    let mut codes = HashSet::new();

    for i in 0..20 {
        let resident = register(&t.engine, &format!("U-{:03}", i)).await;
        let charge = charge_for(&t.engine, &resident, "50.00", "Cuota", period(2026, 3)).await;
        let reference = t
            .engine
            .issue_reference(resident.resident_id, vec![charge.charge_id])
            .await
            .unwrap();

        let parts: Vec<&str> = reference.code.split('-').collect();
        assert_eq!(parts[0], "REF");
        assert_eq!(parts[2].len(), 6);
        assert!(codes.insert(reference.code));
    }

    assert_eq!(codes.len(), 20);
}

#[tokio::test]
async fn invalid_selections_are_rejected() {
    let t = test_engine();
    let resident = register(&t.engine, "A-101").await;
    let other = register(&t.engine, "B-202").await;
    let charge = charge_for(&t.engine, &resident, "50.00", "Cuota", period(2026, 3)).await;
    let others_charge = t
        .engine
        .get_outstanding_debt(other.resident_id)
        .await
        .unwrap()
        .items[0]
        .charge
        .clone();

    let err = t
        .engine
        .issue_reference(resident.resident_id, vec![])
        .await
        .unwrap_err();
    assert!(matches!(err, DuesError::Validation(_)));

    let err = t
        .engine
        .issue_reference(resident.resident_id, vec![charge.charge_id, charge.charge_id])
        .await
        .unwrap_err();
    assert!(matches!(err, DuesError::Validation(_)));

    let missing = Uuid::new_v4();
    let err = t
        .engine
        .issue_reference(resident.resident_id, vec![missing])
        .await
        .unwrap_err();
    assert!(matches!(err, DuesError::ChargeNotFound(id) if id == missing));

    let err = t
        .engine
        .issue_reference(Uuid::new_v4(), vec![charge.charge_id])
        .await
        .unwrap_err();
    assert!(matches!(err, DuesError::ResidentNotFound(_)));

    let err = t
        .engine
        .issue_reference(
            resident.resident_id,
            vec![charge.charge_id, others_charge.charge_id],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DuesError::Validation(ref msg) if msg.contains("another resident")));

    // Nothing was bound by the failed attempts
    let debt = t
        .engine
        .get_outstanding_debt(resident.resident_id)
        .await
        .unwrap();
    assert_eq!(debt.items[0].charge.status, ChargeStatus::Pending);
}

#[tokio::test]
async fn referenced_charge_cannot_be_referenced_again() {
    let t = test_engine();
    let resident = register(&t.engine, "A-101").await;
    let charge = charge_for(&t.engine, &resident, "50.00", "Cuota", period(2026, 3)).await;

    t.engine
        .issue_reference(resident.resident_id, vec![charge.charge_id])
        .await
        .unwrap();

    let err = t
        .engine
        .issue_reference(resident.resident_id, vec![charge.charge_id])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DuesError::InvalidChargeState {
            status: ChargeStatus::Referenced,
            ..
        }
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_issuance_over_one_charge_has_one_winner() {
    let t = test_engine();
    let resident = register(&t.engine, "A-101").await;
    let charge = charge_for(&t.engine, &resident, "50.00", "Cuota", period(2026, 3)).await;

    let attempts = (0..16).map(|_| {
        let engine = t.engine.clone();
        let resident_id = resident.resident_id;
        let charge_id = charge.charge_id;
        tokio::spawn(async move { engine.issue_reference(resident_id, vec![charge_id]).await })
    });
    let results: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let winners: Vec<&PaymentReference> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(winners.len(), 1);
    for result in &results {
        if let Err(e) = result {
            assert!(
                matches!(
                    e,
                    DuesError::ConcurrentModification(_) | DuesError::InvalidChargeState { .. }
                ),
                "unexpected error: {:?}",
                e
            );
        }
    }

    let debt = t
        .engine
        .get_outstanding_debt(resident.resident_id)
        .await
        .unwrap();
    assert_eq!(debt.items[0].charge.reference_id, Some(winners[0].reference_id));
}

#[tokio::test]
async fn code_collision_is_retried_with_a_fresh_sequence() {
    let (engine, store, _clock) = scripted_engine();
    let a = register(&engine, "A-101").await;
    let b = register(&engine, "B-202").await;
    let a_charge = charge_for(&engine, &a, "50.00", "Cuota", period(2026, 3)).await;
    let b_charge = engine
        .get_outstanding_debt(b.resident_id)
        .await
        .unwrap()
        .items[0]
        .charge
        .clone();

    store.pin_sequence(Some(7));
    let first = engine
        .issue_reference(a.resident_id, vec![a_charge.charge_id])
        .await
        .unwrap();
    assert_eq!(first.code, PaymentReference::format_code(start_time(), 7));

    // Same clock second and same sequence: every attempt collides
    let err = engine
        .issue_reference(b.resident_id, vec![b_charge.charge_id])
        .await
        .unwrap_err();
    assert!(matches!(err, DuesError::ConcurrentModification(_)));
    let debt = engine.get_outstanding_debt(b.resident_id).await.unwrap();
    assert_eq!(debt.items[0].charge.status, ChargeStatus::Pending);

    store.pin_sequence(None);
    let second = engine
        .issue_reference(b.resident_id, vec![b_charge.charge_id])
        .await
        .unwrap();
    assert_ne!(second.code, first.code);
}

#[tokio::test]
async fn cancel_releases_charges_for_reissue() {
    let t = test_engine();
    let resident = register(&t.engine, "A-101").await;
    let charge = charge_for(&t.engine, &resident, "50.00", "Cuota", period(2026, 3)).await;
    let reference = t
        .engine
        .issue_reference(resident.resident_id, vec![charge.charge_id])
        .await
        .unwrap();

    t.clock.advance(Duration::minutes(5));
    let cancelled = t
        .engine
        .cancel_reference(resident.resident_id, &reference.code)
        .await
        .unwrap();
    assert_eq!(cancelled.status, ReferenceStatus::Cancelled);
    assert_eq!(cancelled.closed_utc, Some(start_time() + Duration::minutes(5)));

    let debt = t
        .engine
        .get_outstanding_debt(resident.resident_id)
        .await
        .unwrap();
    assert_eq!(debt.items[0].charge.status, ChargeStatus::Pending);
    assert_eq!(debt.items[0].reference_code, None);
    assert_eq!(debt.total, dec("50.00"));

    let err = t
        .engine
        .cancel_reference(resident.resident_id, &reference.code)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DuesError::InvalidReferenceState {
            status: ReferenceStatus::Cancelled,
            ..
        }
    ));

    let err = t
        .engine
        .redeem_reference(&reference.code, "cashier-1")
        .await
        .unwrap_err();
    assert!(matches!(err, DuesError::InvalidReferenceState { .. }));

    let reissued = t
        .engine
        .issue_reference(resident.resident_id, vec![charge.charge_id])
        .await
        .unwrap();
    assert_ne!(reissued.code, reference.code);
}

#[tokio::test]
async fn cancel_is_scoped_to_the_owner_and_refuses_paid_references() {
    let t = test_engine();
    let owner = register(&t.engine, "A-101").await;
    let stranger = register(&t.engine, "B-202").await;
    let charge = charge_for(&t.engine, &owner, "50.00", "Cuota", period(2026, 3)).await;
    let reference = t
        .engine
        .issue_reference(owner.resident_id, vec![charge.charge_id])
        .await
        .unwrap();

    let err = t
        .engine
        .cancel_reference(stranger.resident_id, &reference.code)
        .await
        .unwrap_err();
    assert!(matches!(err, DuesError::ReferenceNotFound(_)));

    t.engine
        .redeem_reference(&reference.code, "cashier-1")
        .await
        .unwrap();

    let err = t
        .engine
        .cancel_reference(owner.resident_id, &reference.code)
        .await
        .unwrap_err();
    assert!(matches!(err, DuesError::AlreadyRedeemed(_)));
}

#[tokio::test]
async fn expired_references_release_charges() {
    let t = test_engine();
    let resident = register(&t.engine, "A-101").await;
    let charge = charge_for(&t.engine, &resident, "50.00", "Cuota", period(2026, 3)).await;
    let reference = t
        .engine
        .issue_reference(resident.resident_id, vec![charge.charge_id])
        .await
        .unwrap();

    // Not yet due
    t.clock.advance(Duration::hours(23));
    assert!(t.engine.expire_stale_references().await.unwrap().is_empty());

    t.clock.advance(Duration::hours(2));

    // Past expiry but not swept yet: redemption is still refused
    let err = t
        .engine
        .redeem_reference(&reference.code, "cashier-1")
        .await
        .unwrap_err();
    assert!(matches!(err, DuesError::ReferenceExpired(_)));

    let expired = t.engine.expire_stale_references().await.unwrap();
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].code, reference.code);
    assert_eq!(expired[0].status, ReferenceStatus::Expired);

    let debt = t
        .engine
        .get_outstanding_debt(resident.resident_id)
        .await
        .unwrap();
    assert_eq!(debt.items[0].charge.status, ChargeStatus::Pending);
    assert_eq!(debt.total.to_string(), "50.00");

    let err = t
        .engine
        .redeem_reference(&reference.code, "cashier-1")
        .await
        .unwrap_err();
    assert!(matches!(err, DuesError::ReferenceExpired(_)));

    // A second sweep finds nothing new
    assert!(t.engine.expire_stale_references().await.unwrap().is_empty());
}

#[tokio::test]
async fn redeemed_references_are_never_expired() {
    let t = test_engine();
    let resident = register(&t.engine, "A-101").await;
    let charge = charge_for(&t.engine, &resident, "50.00", "Cuota", period(2026, 3)).await;
    let reference = t
        .engine
        .issue_reference(resident.resident_id, vec![charge.charge_id])
        .await
        .unwrap();
    t.engine
        .redeem_reference(&reference.code, "cashier-1")
        .await
        .unwrap();

    t.clock.advance(Duration::days(30));
    assert!(t.engine.expire_stale_references().await.unwrap().is_empty());

    let details = t.engine.lookup_reference(&reference.code).await.unwrap();
    assert_eq!(details.reference.status, ReferenceStatus::Redeemed);
    assert!(details.charges.iter().all(|c| c.status == ChargeStatus::Paid));
}

#[tokio::test]
async fn sweeper_expires_references_in_the_background() {
    let t = test_engine();
    let resident = register(&t.engine, "A-101").await;
    let charge = charge_for(&t.engine, &resident, "50.00", "Cuota", period(2026, 3)).await;
    let reference = t
        .engine
        .issue_reference(resident.resident_id, vec![charge.charge_id])
        .await
        .unwrap();
    t.clock.advance(Duration::hours(25));

    let token = CancellationToken::new();
    let handle = ReferenceSweeper::new(
        t.engine.clone(),
        std::time::Duration::from_millis(10),
        token.clone(),
    )
    .spawn();

    let mut released = false;
    for _ in 0..50 {
        let details = t.engine.lookup_reference(&reference.code).await.unwrap();
        if details.reference.status == ReferenceStatus::Expired {
            released = true;
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    token.cancel();
    handle.await.unwrap();

    assert!(released, "sweeper should have expired the reference");
    let debt = t
        .engine
        .get_outstanding_debt(resident.resident_id)
        .await
        .unwrap();
    assert_eq!(debt.items[0].charge.status, ChargeStatus::Pending);
}

#[tokio::test]
async fn references_without_ttl_never_expire() {
    let t = common::test_engine_with_policy(dues_service::services::ReferencePolicy {
        ttl: None,
        max_issue_attempts: 5,
    });
    assert!(t.engine.reference_policy().ttl.is_none());
    let resident = register(&t.engine, "A-101").await;
    let charge = charge_for(&t.engine, &resident, "50.00", "Cuota", period(2026, 3)).await;
    let reference = t
        .engine
        .issue_reference(resident.resident_id, vec![charge.charge_id])
        .await
        .unwrap();
    assert!(reference.expires_utc.is_none());

    t.clock.advance(Duration::days(365));
    assert!(t.engine.expire_stale_references().await.unwrap().is_empty());
    t.engine
        .redeem_reference(&reference.code, "cashier-1")
        .await
        .unwrap();
}

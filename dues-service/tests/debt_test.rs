//! Outstanding debt integration tests.

mod common;

use chrono::Duration;
use common::{charge_for, dec, period, register, test_engine};
use dues_service::models::ChargeStatus;
use dues_service::DuesError;
use uuid::Uuid;

#[tokio::test]
async fn resident_without_charges_owes_zero() {
    let t = test_engine();
    let resident = register(&t.engine, "A-101").await;

    let debt = t
        .engine
        .get_outstanding_debt(resident.resident_id)
        .await
        .unwrap();

    assert_eq!(debt.resident_id, resident.resident_id);
    assert_eq!(debt.total.to_string(), "0.00");
    assert_eq!(debt.pending_count, 0);
    assert!(debt.items.is_empty());
}

#[tokio::test]
async fn unknown_resident_is_not_found() {
    let t = test_engine();

    let err = t
        .engine
        .get_outstanding_debt(Uuid::new_v4())
        .await
        .unwrap_err();

    assert!(matches!(err, DuesError::ResidentNotFound(_)));
}

#[tokio::test]
async fn referenced_charges_still_count_until_paid() {
    let t = test_engine();
    let resident = register(&t.engine, "A-101").await;
    let march = charge_for(&t.engine, &resident, "50.00", "Cuota", period(2026, 3)).await;
    t.clock.advance(Duration::minutes(1));
    let april = charge_for(&t.engine, &resident, "55.50", "Cuota", period(2026, 4)).await;

    let reference = t
        .engine
        .issue_reference(resident.resident_id, vec![march.charge_id])
        .await
        .unwrap();

    let debt = t
        .engine
        .get_outstanding_debt(resident.resident_id)
        .await
        .unwrap();
    assert_eq!(debt.total.to_string(), "105.50");
    assert_eq!(debt.pending_count, 2);

    let first = &debt.items[0];
    assert_eq!(first.charge.charge_id, march.charge_id);
    assert_eq!(first.charge.status, ChargeStatus::Referenced);
    assert_eq!(first.reference_code.as_deref(), Some(reference.code.as_str()));

    let second = &debt.items[1];
    assert_eq!(second.charge.charge_id, april.charge_id);
    assert_eq!(second.reference_code, None);

    t.engine
        .redeem_reference(&reference.code, "cashier-1")
        .await
        .unwrap();

    let debt = t
        .engine
        .get_outstanding_debt(resident.resident_id)
        .await
        .unwrap();
    assert_eq!(debt.total, dec("55.50"));
    assert_eq!(debt.pending_count, 1);
    assert_eq!(debt.items[0].charge.charge_id, april.charge_id);
}

#[tokio::test]
async fn items_are_ordered_by_period_then_creation() {
    let t = test_engine();
    let resident = register(&t.engine, "A-101").await;

    charge_for(&t.engine, &resident, "60.00", "Cuota", period(2026, 5)).await;
    t.clock.advance(Duration::minutes(1));
    charge_for(&t.engine, &resident, "50.00", "Cuota", period(2026, 3)).await;
    t.clock.advance(Duration::minutes(1));
    charge_for(&t.engine, &resident, "5.00", "Multa", period(2026, 3)).await;

    let debt = t
        .engine
        .get_outstanding_debt(resident.resident_id)
        .await
        .unwrap();

    let order: Vec<(String, String)> = debt
        .items
        .iter()
        .map(|i| (i.charge.period.to_string(), i.charge.description.clone()))
        .collect();
    assert_eq!(
        order,
        vec![
            ("2026-03".to_string(), "Cuota".to_string()),
            ("2026-03".to_string(), "Multa".to_string()),
            ("2026-05".to_string(), "Cuota".to_string()),
        ]
    );
    assert_eq!(debt.total.to_string(), "115.00");
}

#[tokio::test]
async fn debts_are_isolated_per_resident() {
    let t = test_engine();
    let a = register(&t.engine, "A-101").await;
    let b = register(&t.engine, "B-202").await;
    let a_charge = charge_for(&t.engine, &a, "50.00", "Cuota", period(2026, 3)).await;

    let reference = t
        .engine
        .issue_reference(a.resident_id, vec![a_charge.charge_id])
        .await
        .unwrap();
    t.engine
        .redeem_reference(&reference.code, "cashier-1")
        .await
        .unwrap();

    let a_debt = t.engine.get_outstanding_debt(a.resident_id).await.unwrap();
    let b_debt = t.engine.get_outstanding_debt(b.resident_id).await.unwrap();
    assert_eq!(a_debt.total.to_string(), "0.00");
    assert_eq!(b_debt.total.to_string(), "50.00");
}

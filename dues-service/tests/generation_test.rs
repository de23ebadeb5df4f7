//! Monthly dues generation integration tests.

mod common;

use common::{dec, period, register, test_engine};
use dues_service::models::ChargeStatus;
use dues_service::DuesError;
use futures::future::join_all;

#[tokio::test]
async fn creates_one_pending_charge_per_active_resident() {
    let t = test_engine();
    let a = register(&t.engine, "A-101").await;
    let b = register(&t.engine, "B-202").await;
    let inactive = register(&t.engine, "C-303").await;
    t.engine
        .deactivate_resident(inactive.resident_id)
        .await
        .unwrap();

    let report = t
        .engine
        .generate_monthly_dues(dec("50"), "Cuota marzo", period(2026, 3))
        .await
        .unwrap();

    assert_eq!(report.created, 2);
    assert_eq!(report.skipped, 0);
    assert!(report.failures.is_empty());
    assert_eq!(report.period.to_string(), "2026-03");

    for resident in [&a, &b] {
        let debt = t
            .engine
            .get_outstanding_debt(resident.resident_id)
            .await
            .unwrap();
        assert_eq!(debt.pending_count, 1);
        let charge = &debt.items[0].charge;
        assert_eq!(charge.status, ChargeStatus::Pending);
        assert_eq!(charge.amount.to_string(), "50.00");
        assert_eq!(charge.description, "Cuota marzo");
    }

    let debt = t
        .engine
        .get_outstanding_debt(inactive.resident_id)
        .await
        .unwrap();
    assert_eq!(debt.pending_count, 0);
}

#[tokio::test]
async fn rerunning_a_period_skips_existing_charges() {
    let t = test_engine();
    let resident = register(&t.engine, "A-101").await;

    t.engine
        .generate_monthly_dues(dec("50.00"), "Cuota marzo", period(2026, 3))
        .await
        .unwrap();
    register(&t.engine, "B-202").await;

    let rerun = t
        .engine
        .generate_monthly_dues(dec("50.00"), "Cuota marzo", period(2026, 3))
        .await
        .unwrap();

    assert_eq!(rerun.created, 1);
    assert_eq!(rerun.skipped, 1);

    let debt = t
        .engine
        .get_outstanding_debt(resident.resident_id)
        .await
        .unwrap();
    assert_eq!(debt.pending_count, 1);
    assert_eq!(debt.total, dec("50.00"));
}

#[tokio::test]
async fn different_period_or_description_creates_new_charges() {
    let t = test_engine();
    let resident = register(&t.engine, "A-101").await;

    t.engine
        .generate_monthly_dues(dec("50.00"), "Cuota", period(2026, 3))
        .await
        .unwrap();
    t.engine
        .generate_monthly_dues(dec("50.00"), "Cuota", period(2026, 4))
        .await
        .unwrap();
    t.engine
        .generate_monthly_dues(dec("15.25"), "Fondo de reserva", period(2026, 4))
        .await
        .unwrap();

    let debt = t
        .engine
        .get_outstanding_debt(resident.resident_id)
        .await
        .unwrap();
    assert_eq!(debt.pending_count, 3);
    assert_eq!(debt.total.to_string(), "115.25");
    assert_eq!(debt.items[0].charge.period, period(2026, 3));
}

#[tokio::test]
async fn invalid_input_writes_nothing() {
    let t = test_engine();
    let resident = register(&t.engine, "A-101").await;

    for (amount, description) in [
        ("0", "Cuota"),
        ("-10.00", "Cuota"),
        ("10.005", "Cuota"),
        ("100000000000000000", "Cuota"),
        ("50000000000000000000000000000", "Cuota"),
        ("50.00", "   "),
    ] {
        let err = t
            .engine
            .generate_monthly_dues(dec(amount), description, period(2026, 3))
            .await
            .unwrap_err();
        assert!(
            matches!(err, DuesError::Validation(_)),
            "expected validation error for ({}, {:?}), got {:?}",
            amount,
            description,
            err
        );
    }

    let debt = t
        .engine
        .get_outstanding_debt(resident.resident_id)
        .await
        .unwrap();
    assert_eq!(debt.pending_count, 0);
    assert_eq!(debt.total.to_string(), "0.00");
}

#[tokio::test]
async fn largest_amounts_still_sum_with_cents() {
    let t = test_engine();
    let resident = register(&t.engine, "A-101").await;

    for month in [3, 4] {
        t.engine
            .generate_monthly_dues(dec("99999999999999999.99"), "Cuota", period(2026, month))
            .await
            .unwrap();
    }

    let debt = t
        .engine
        .get_outstanding_debt(resident.resident_id)
        .await
        .unwrap();
    assert_eq!(debt.pending_count, 2);
    assert_eq!(debt.total.to_string(), "199999999999999999.98");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_runs_create_each_charge_once() {
    let t = test_engine();
    let mut residents = Vec::new();
    for i in 0..10 {
        residents.push(register(&t.engine, &format!("U-{:03}", i)).await);
    }

    let runs = (0..8).map(|_| {
        let engine = t.engine.clone();
        tokio::spawn(async move {
            engine
                .generate_monthly_dues(dec("50.00"), "Cuota marzo", period(2026, 3))
                .await
        })
    });
    let reports: Vec<_> = join_all(runs)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    let created: u64 = reports.iter().map(|r| r.created).sum();
    let skipped: u64 = reports.iter().map(|r| r.skipped).sum();
    assert_eq!(created, 10);
    assert_eq!(skipped, 8 * 10 - 10);

    for resident in &residents {
        let debt = t
            .engine
            .get_outstanding_debt(resident.resident_id)
            .await
            .unwrap();
        assert_eq!(debt.pending_count, 1);
    }
}

#[tokio::test]
async fn one_failing_resident_does_not_abort_the_run() {
    let (engine, store, _clock) = common::scripted_engine();
    let healthy = register(&engine, "A-101").await;
    let broken = register(&engine, "B-202").await;
    store.fail_charges_for(broken.resident_id);

    let report = engine
        .generate_monthly_dues(dec("50.00"), "Cuota marzo", period(2026, 3))
        .await
        .unwrap();

    assert_eq!(report.created, 1);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].resident_id, broken.resident_id);

    let debt = engine
        .get_outstanding_debt(healthy.resident_id)
        .await
        .unwrap();
    assert_eq!(debt.pending_count, 1);
}

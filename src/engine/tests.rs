use super::*;
use chrono::{Days, NaiveDate};
use std::path::PathBuf;

fn d(month: u32, day: u32) -> Day {
    NaiveDate::from_ymd_opt(2025, month, day).unwrap()
}

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("novodom_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn new_engine(name: &str) -> Engine {
    new_engine_at(test_wal_path(name))
}

fn new_engine_at(path: PathBuf) -> Engine {
    Engine::new(path, Arc::new(NotifyHub::new())).unwrap()
}

async fn with_property(engine: &Engine, max_guests: u32) -> Id {
    let id = Id::generate();
    engine
        .create_property(id.clone(), Some("Квартира на Невском".into()), max_guests, 4000)
        .await
        .unwrap();
    id
}

async fn book(engine: &Engine, pid: &Id, check_in: Day, check_out: Day) -> Id {
    let id = Id::generate();
    engine
        .request_reservation(id.clone(), pid.clone(), check_in, check_out, 1, None)
        .await
        .unwrap();
    id
}

async fn status_of(engine: &Engine, id: &Id) -> ReservationStatus {
    engine.get_reservation(&id).await.unwrap().status
}

// ── Properties ───────────────────────────────────────────

#[tokio::test]
async fn create_update_and_list_properties() {
    let engine = new_engine("properties.wal");
    let a = with_property(&engine, 2).await;
    let b = with_property(&engine, 6).await;

    assert!(matches!(
        engine.create_property(a.clone(), None, 2, 0).await,
        Err(EngineError::AlreadyExists(id)) if id == a
    ));

    engine
        .update_property(b.clone(), Some("Лофт".into()), 8, 9900)
        .await
        .unwrap();

    let list = engine.list_properties().await;
    assert_eq!(list.len(), 2);
    let lofts: Vec<_> = list.iter().filter(|p| p.id == b).collect();
    assert_eq!(lofts[0].name.as_deref(), Some("Лофт"));
    assert_eq!(lofts[0].max_guests, 8);
    assert_eq!(lofts[0].nightly_price, 9900);
}

#[tokio::test]
async fn property_limits_enforced() {
    let engine = new_engine("property_limits.wal");
    assert!(matches!(
        engine.create_property(Id::generate(), None, 0, 0).await,
        Err(EngineError::LimitExceeded(_))
    ));
    let long_name = "д".repeat(crate::limits::MAX_NAME_LEN);
    assert!(matches!(
        engine.create_property(Id::generate(), Some(long_name), 2, 0).await,
        Err(EngineError::LimitExceeded("property name too long"))
    ));
}

#[tokio::test]
async fn delete_property_requires_no_active_reservations() {
    let engine = new_engine("delete_property.wal");
    let pid = with_property(&engine, 2).await;
    let rid = book(&engine, &pid, d(6, 1), d(6, 3)).await;

    assert!(matches!(
        engine.delete_property(pid.clone()).await,
        Err(EngineError::HasActiveReservations(id)) if id == pid
    ));

    engine.cancel_reservation(rid.clone()).await.unwrap();
    engine.delete_property(pid.clone()).await.unwrap();

    assert!(engine.get_property(&pid).is_none());
    assert!(engine.get_property_for_reservation(&rid).is_none());
    assert!(matches!(
        engine.get_reservation(&rid).await,
        Err(EngineError::NotFound(_))
    ));
    assert!(matches!(
        engine.delete_property(pid.clone()).await,
        Err(EngineError::NotFound(_))
    ));
}

// ── Requests and conflicts ───────────────────────────────

#[tokio::test]
async fn request_creates_pending_reservation() {
    let engine = new_engine("request_pending.wal");
    let pid = with_property(&engine, 3).await;
    let rid = Id::generate();
    engine
        .request_reservation(rid.clone(), pid.clone(), d(6, 10), d(6, 14), 3, Some("Анна".into()))
        .await
        .unwrap();

    let r = engine.get_reservation(&rid).await.unwrap();
    assert_eq!(r.status, ReservationStatus::Pending);
    assert_eq!(r.property_id, pid);
    assert_eq!(r.guest_name.as_deref(), Some("Анна"));
    assert_eq!(engine.get_property_for_reservation(&rid), Some(pid.clone()));

    // A pending request blocks the range.
    assert!(!engine
        .is_range_available(&pid, d(6, 12), d(6, 13), None)
        .await
        .unwrap());
}

#[tokio::test]
async fn overlapping_request_conflicts_with_ranges() {
    let engine = new_engine("overlap_conflict.wal");
    let pid = with_property(&engine, 2).await;
    let first = book(&engine, &pid, d(6, 1), d(6, 5)).await;
    book(&engine, &pid, d(6, 8), d(6, 10)).await;

    let err = engine
        .request_reservation(Id::generate(), pid.clone(), d(6, 4), d(6, 6), 1, None)
        .await
        .unwrap_err();
    match err {
        EngineError::Conflict {
            reservation_id,
            unavailable,
        } => {
            assert_eq!(reservation_id, first);
            assert_eq!(
                unavailable,
                vec![Stay::new(d(6, 1), d(6, 5)), Stay::new(d(6, 8), d(6, 10))]
            );
        }
        other => panic!("expected conflict, got {other}"),
    }
    assert_eq!(engine.get_reservations(&pid, None).await.unwrap().len(), 2);
}

#[tokio::test]
async fn back_to_back_stays_do_not_conflict() {
    let engine = new_engine("back_to_back.wal");
    let pid = with_property(&engine, 2).await;
    let a = book(&engine, &pid, d(6, 1), d(6, 5)).await;
    let b = book(&engine, &pid, d(6, 5), d(6, 9)).await;
    engine.accept_reservation(a.clone()).await.unwrap();
    engine.accept_reservation(b.clone()).await.unwrap();

    // The turnover day belongs to the arriving guest only.
    let day5 = engine.bookings_for_day(&pid, d(6, 5)).await.unwrap();
    assert_eq!(day5.len(), 1);
    assert_eq!(day5[0].id, b);
}

#[tokio::test]
async fn invalid_ranges_rejected() {
    let engine = new_engine("invalid_ranges.wal");
    let pid = with_property(&engine, 2).await;

    assert!(matches!(
        engine
            .request_reservation(Id::generate(), pid.clone(), d(6, 5), d(6, 5), 1, None)
            .await,
        Err(EngineError::InvalidRange(_))
    ));
    assert!(matches!(
        engine.is_range_available(&pid, d(6, 5), d(6, 1), None).await,
        Err(EngineError::InvalidRange(_))
    ));
    assert!(matches!(
        engine.conflicting(&pid, d(6, 5), d(6, 1), None).await,
        Err(EngineError::InvalidRange(_))
    ));
    assert!(engine.get_reservations(&pid, None).await.unwrap().is_empty());
}

#[tokio::test]
async fn guest_count_bounded_by_property() {
    let engine = new_engine("guest_limit.wal");
    let pid = with_property(&engine, 2).await;

    for guests in [0, 3] {
        assert!(matches!(
            engine
                .request_reservation(Id::generate(), pid.clone(), d(6, 1), d(6, 2), guests, None)
                .await,
            Err(EngineError::GuestLimitExceeded { requested, max: 2 }) if requested == guests
        ));
    }
}

#[tokio::test]
async fn duplicate_reservation_id_rejected() {
    let engine = new_engine("duplicate_reservation.wal");
    let pid = with_property(&engine, 2).await;
    let rid = book(&engine, &pid, d(6, 1), d(6, 2)).await;
    assert!(matches!(
        engine
            .request_reservation(rid.clone(), pid.clone(), d(7, 1), d(7, 2), 1, None)
            .await,
        Err(EngineError::AlreadyExists(id)) if id == rid
    ));
}

#[tokio::test]
async fn request_on_unknown_property() {
    let engine = new_engine("unknown_property.wal");
    let ghost = Id::generate();
    assert!(matches!(
        engine
            .request_reservation(Id::generate(), ghost.clone(), d(6, 1), d(6, 2), 1, None)
            .await,
        Err(EngineError::NotFound(id)) if id == ghost
    ));
}

#[tokio::test]
async fn concurrent_overlapping_requests_admit_exactly_one() {
    let engine = Arc::new(new_engine("concurrent_requests.wal"));
    let pid = with_property(&engine, 2).await;

    let mut handles = Vec::new();
    for offset in 0..16u32 {
        let engine = engine.clone();
        let pid = pid.clone();
        handles.push(tokio::spawn(async move {
            // Every window contains June 10th.
            let check_in = d(6, 10 - (offset % 5));
            let check_out = d(6, 11 + (offset % 3));
            engine
                .request_reservation(Id::generate(), pid.clone(), check_in, check_out, 1, None)
                .await
        }));
    }

    let mut ok = 0;
    let mut conflicts = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(()) => ok += 1,
            Err(EngineError::Conflict { .. }) => conflicts += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(ok, 1);
    assert_eq!(conflicts, 15);
    assert_eq!(engine.bookings_for_day(&pid, d(6, 10)).await.unwrap().len(), 1);
}

#[tokio::test]
async fn different_properties_do_not_interact() {
    let engine = new_engine("independent_properties.wal");
    let a = with_property(&engine, 2).await;
    let b = with_property(&engine, 2).await;
    book(&engine, &a, d(6, 1), d(6, 5)).await;
    book(&engine, &b, d(6, 1), d(6, 5)).await;
    assert!(!engine.is_range_available(&a, d(6, 2), d(6, 3), None).await.unwrap());
    assert!(engine
        .is_range_available(&b, d(6, 5), d(6, 6), None)
        .await
        .unwrap());
}

// ── Status transitions ───────────────────────────────────

#[tokio::test]
async fn accept_confirms_pending_once() {
    let engine = new_engine("accept.wal");
    let pid = with_property(&engine, 2).await;
    let rid = book(&engine, &pid, d(6, 1), d(6, 4)).await;

    assert_eq!(engine.accept_reservation(rid.clone()).await.unwrap(), pid);
    assert_eq!(status_of(&engine, &rid).await, ReservationStatus::Confirmed);

    assert!(matches!(
        engine.accept_reservation(rid.clone()).await,
        Err(EngineError::InvalidTransition {
            status: ReservationStatus::Confirmed,
            action: "accept",
            ..
        })
    ));
}

#[tokio::test]
async fn accept_rechecks_against_active_overlap() {
    let engine = new_engine("accept_recheck.wal");
    let pid = with_property(&engine, 2).await;
    let rid = book(&engine, &pid, d(6, 1), d(6, 4)).await;

    // Plant an overlapping confirmed stay directly, as a lost race would leave it.
    let intruder = Id::generate();
    {
        let ps = engine.get_property(&pid).unwrap();
        let mut guard = ps.write().await;
        guard.insert_reservation(Reservation {
            id: intruder.clone(),
            property_id: pid.clone(),
            check_in: d(6, 3),
            check_out: d(6, 6),
            status: ReservationStatus::Confirmed,
            guest_count: 1,
            guest_name: None,
        });
    }

    assert!(matches!(
        engine.accept_reservation(rid.clone()).await,
        Err(EngineError::Conflict { reservation_id, .. }) if reservation_id == intruder
    ));
    assert_eq!(status_of(&engine, &rid).await, ReservationStatus::Pending);
}

#[tokio::test]
async fn decline_only_from_pending() {
    let engine = new_engine("decline.wal");
    let pid = with_property(&engine, 2).await;
    let pending = book(&engine, &pid, d(6, 1), d(6, 4)).await;
    let confirmed = book(&engine, &pid, d(6, 4), d(6, 8)).await;
    engine.accept_reservation(confirmed.clone()).await.unwrap();

    engine.decline_reservation(pending.clone()).await.unwrap();
    assert_eq!(status_of(&engine, &pending).await, ReservationStatus::Cancelled);
    assert!(engine
        .is_range_available(&pid, d(6, 1), d(6, 4), None)
        .await
        .unwrap());

    assert!(matches!(
        engine.decline_reservation(confirmed.clone()).await,
        Err(EngineError::InvalidTransition { action: "decline", .. })
    ));
}

#[tokio::test]
async fn cancel_frees_range_and_is_terminal() {
    let engine = new_engine("cancel.wal");
    let pid = with_property(&engine, 2).await;
    let rid = book(&engine, &pid, d(6, 1), d(6, 4)).await;
    engine.accept_reservation(rid.clone()).await.unwrap();
    engine.cancel_reservation(rid.clone()).await.unwrap();

    assert_eq!(
        engine.occupancy_for_day(&pid, d(6, 2)).await.unwrap(),
        Occupancy::Available
    );
    book(&engine, &pid, d(6, 2), d(6, 3)).await;

    for result in [
        engine.cancel_reservation(rid.clone()).await,
        engine.accept_reservation(rid.clone()).await,
    ] {
        assert!(matches!(
            result,
            Err(EngineError::InvalidTransition {
                status: ReservationStatus::Cancelled,
                ..
            })
        ));
    }
}

#[tokio::test]
async fn complete_after_check_out_only() {
    let engine = new_engine("complete.wal");
    let pid = with_property(&engine, 2).await;
    let rid = book(&engine, &pid, d(6, 1), d(6, 4)).await;

    assert!(matches!(
        engine.complete_reservation(rid.clone(), d(6, 10)).await,
        Err(EngineError::InvalidTransition { action: "complete", .. })
    ));

    engine.accept_reservation(rid.clone()).await.unwrap();
    assert!(matches!(
        engine.complete_reservation(rid.clone(), d(6, 3)).await,
        Err(EngineError::StayNotElapsed(id)) if id == rid
    ));

    engine.complete_reservation(rid.clone(), d(6, 4)).await.unwrap();
    assert_eq!(status_of(&engine, &rid).await, ReservationStatus::Completed);

    // Completed stays stay on the calendar but no longer block the range.
    assert_eq!(
        engine.occupancy_for_day(&pid, d(6, 2)).await.unwrap(),
        Occupancy::Occupied
    );
    assert!(engine
        .is_range_available(&pid, d(6, 1), d(6, 4), None)
        .await
        .unwrap());
    assert!(matches!(
        engine.cancel_reservation(rid.clone()).await,
        Err(EngineError::InvalidTransition { .. })
    ));
}

#[tokio::test]
async fn unknown_reservation_is_not_found() {
    let engine = new_engine("unknown_reservation.wal");
    let ghost = Id::generate();
    assert!(matches!(
        engine.accept_reservation(ghost.clone()).await,
        Err(EngineError::NotFound(id)) if id == ghost
    ));
    assert!(matches!(
        engine.get_reservation(&ghost).await,
        Err(EngineError::NotFound(_))
    ));
}

// ── Rescheduling ─────────────────────────────────────────

#[tokio::test]
async fn reschedule_ignores_own_stay() {
    let engine = new_engine("reschedule_self.wal");
    let pid = with_property(&engine, 2).await;
    let rid = book(&engine, &pid, d(6, 1), d(6, 5)).await;
    engine.accept_reservation(rid.clone()).await.unwrap();

    engine.reschedule_reservation(rid.clone(), d(6, 3), d(6, 7)).await.unwrap();
    let r = engine.get_reservation(&rid).await.unwrap();
    assert_eq!(r.stay(), Stay::new(d(6, 3), d(6, 7)));
    assert_eq!(r.status, ReservationStatus::Confirmed);

    assert_eq!(
        engine.occupancy_for_day(&pid, d(6, 1)).await.unwrap(),
        Occupancy::Available
    );
}

#[tokio::test]
async fn reschedule_into_other_stay_conflicts() {
    let engine = new_engine("reschedule_conflict.wal");
    let pid = with_property(&engine, 2).await;
    let a = book(&engine, &pid, d(6, 1), d(6, 5)).await;
    let b = book(&engine, &pid, d(6, 10), d(6, 12)).await;

    assert!(matches!(
        engine.reschedule_reservation(a.clone(), d(6, 9), d(6, 11)).await,
        Err(EngineError::Conflict { reservation_id, .. }) if reservation_id == b
    ));
    let r = engine.get_reservation(&a).await.unwrap();
    assert_eq!(r.stay(), Stay::new(d(6, 1), d(6, 5)));

    engine.cancel_reservation(a.clone()).await.unwrap();
    assert!(matches!(
        engine.reschedule_reservation(a.clone(), d(7, 1), d(7, 3)).await,
        Err(EngineError::InvalidTransition { action: "reschedule", .. })
    ));
}

#[tokio::test]
async fn availability_with_exclusion() {
    let engine = new_engine("exclusion.wal");
    let pid = with_property(&engine, 2).await;
    let rid = book(&engine, &pid, d(6, 1), d(6, 5)).await;

    assert!(!engine.is_range_available(&pid, d(6, 2), d(6, 6), None).await.unwrap());
    assert!(engine
        .is_range_available(&pid, d(6, 2), d(6, 6), Some(&rid))
        .await
        .unwrap());
    assert!(engine
        .conflicting(&pid, d(6, 2), d(6, 6), Some(&rid))
        .await
        .unwrap()
        .is_empty());
    let ghost = Id::generate();
    assert!(matches!(
        engine
            .is_range_available(&pid, d(6, 2), d(6, 6), Some(&ghost))
            .await,
        Err(EngineError::NotFound(id)) if id == ghost
    ));
    assert!(matches!(
        engine.conflicting(&pid, d(6, 2), d(6, 6), Some(&ghost)).await,
        Err(EngineError::NotFound(id)) if id == ghost
    ));
}

#[tokio::test]
async fn wide_windows_answer_instead_of_failing() {
    let engine = new_engine("wide_window.wal");
    let pid = with_property(&engine, 2).await;
    let rid = book(&engine, &pid, d(6, 1), d(6, 5)).await;

    let from = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
    let to = NaiveDate::from_ymd_opt(2040, 1, 1).unwrap();
    assert!(!engine.is_range_available(&pid, from, to, None).await.unwrap());
    assert!(engine.is_range_available(&pid, from, to, Some(&rid)).await.unwrap());
    let hits = engine.conflicting(&pid, from, to, None).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, rid);
}

#[tokio::test]
async fn invalid_calendar_month_is_a_range_error() {
    let engine = new_engine("calendar_month.wal");
    let pid = with_property(&engine, 2).await;
    for month in [0, 13] {
        assert!(matches!(
            engine.month_calendar(&pid, 2025, month).await,
            Err(EngineError::InvalidRange(_))
        ));
    }
}

// ── Queries ──────────────────────────────────────────────

#[tokio::test]
async fn reservations_filtered_by_status() {
    let engine = new_engine("status_filter.wal");
    let pid = with_property(&engine, 2).await;
    let a = book(&engine, &pid, d(6, 1), d(6, 3)).await;
    let b = book(&engine, &pid, d(6, 3), d(6, 5)).await;
    let c = book(&engine, &pid, d(6, 5), d(6, 7)).await;
    engine.accept_reservation(b.clone()).await.unwrap();
    engine.cancel_reservation(c.clone()).await.unwrap();

    let ids = |rs: Vec<Reservation>| rs.into_iter().map(|r| r.id).collect::<Vec<_>>();
    assert_eq!(
        ids(engine.get_reservations(&pid, Some(ReservationStatus::Pending)).await.unwrap()),
        vec![a.clone()]
    );
    assert_eq!(
        ids(engine.get_reservations(&pid, Some(ReservationStatus::Confirmed)).await.unwrap()),
        vec![b.clone()]
    );
    assert_eq!(
        ids(engine.get_reservations(&pid, Some(ReservationStatus::Cancelled)).await.unwrap()),
        vec![c.clone()]
    );
    assert_eq!(ids(engine.get_reservations(&pid, None).await.unwrap()), vec![a, b, c]);
}

#[tokio::test]
async fn month_calendar_and_quote() {
    let engine = new_engine("calendar_quote.wal");
    let pid = with_property(&engine, 2).await;
    let rid = book(&engine, &pid, d(2, 26), d(3, 2)).await;

    let feb = engine.month_calendar(&pid, 2025, 2).await.unwrap();
    assert_eq!(feb.len(), 28);
    assert_eq!(feb[24].occupancy, Occupancy::Available);
    assert_eq!(feb[25].occupancy, Occupancy::Occupied);
    assert_eq!(feb[27].reservations[0].id, rid);

    let mar = engine.month_calendar(&pid, 2025, 3).await.unwrap();
    assert_eq!(mar[0].occupancy, Occupancy::Occupied);
    assert_eq!(mar[1].occupancy, Occupancy::Available);

    let q = engine.quote(&pid, d(2, 26), d(3, 2)).await.unwrap();
    assert_eq!(q.nights, 4);
    assert_eq!(q.subtotal, 16_000);
    assert_eq!(q.cleaning_fee + q.service_fee, 1_500);
    assert_eq!(q.total, 17_500);

    assert_eq!(
        engine.unavailable_ranges(&pid).await.unwrap(),
        vec![Stay::new(d(2, 26), d(3, 2))]
    );
}

// ── Persistence ──────────────────────────────────────────

#[tokio::test]
async fn wal_replay_restores_state() {
    let path = test_wal_path("replay.wal");
    let pid;
    let confirmed;
    let cancelled;
    let moved;
    {
        let engine = Engine::new(path.clone(), Arc::new(NotifyHub::new())).unwrap();
        pid = with_property(&engine, 4).await;
        confirmed = book(&engine, &pid, d(6, 1), d(6, 4)).await;
        cancelled = book(&engine, &pid, d(6, 4), d(6, 6)).await;
        moved = book(&engine, &pid, d(6, 10), d(6, 12)).await;
        engine.accept_reservation(confirmed.clone()).await.unwrap();
        engine.decline_reservation(cancelled.clone()).await.unwrap();
        engine.reschedule_reservation(moved.clone(), d(6, 20), d(6, 25)).await.unwrap();
    }

    let engine = Engine::new(path, Arc::new(NotifyHub::new())).unwrap();
    assert_eq!(status_of(&engine, &confirmed).await, ReservationStatus::Confirmed);
    assert_eq!(status_of(&engine, &cancelled).await, ReservationStatus::Cancelled);
    let r = engine.get_reservation(&moved).await.unwrap();
    assert_eq!(r.stay(), Stay::new(d(6, 20), d(6, 25)));
    assert_eq!(r.status, ReservationStatus::Pending);

    // Blocking survives a restart.
    assert!(matches!(
        engine
            .request_reservation(Id::generate(), pid.clone(), d(6, 2), d(6, 3), 1, None)
            .await,
        Err(EngineError::Conflict { .. })
    ));
}

#[tokio::test]
async fn replay_skips_deleted_property() {
    let path = test_wal_path("replay_deleted.wal");
    let pid;
    {
        let engine = Engine::new(path.clone(), Arc::new(NotifyHub::new())).unwrap();
        pid = with_property(&engine, 2).await;
        engine.delete_property(pid.clone()).await.unwrap();
    }
    let engine = Engine::new(path, Arc::new(NotifyHub::new())).unwrap();
    assert!(engine.get_property(&pid).is_none());
    assert!(engine.list_properties().await.is_empty());
}

#[tokio::test]
async fn compaction_preserves_state() {
    let path = test_wal_path("compaction.wal");
    let pid;
    let keep;
    {
        let engine = Engine::new(path.clone(), Arc::new(NotifyHub::new())).unwrap();
        pid = with_property(&engine, 2).await;
        for day in 1..20 {
            let rid = book(&engine, &pid, d(7, day), d(7, day + 1)).await;
            engine.decline_reservation(rid.clone()).await.unwrap();
        }
        keep = book(&engine, &pid, d(8, 1), d(8, 5)).await;
        engine.accept_reservation(keep.clone()).await.unwrap();
        for shift in 1..=10 {
            engine
                .reschedule_reservation(keep.clone(), d(8, 1 + shift), d(8, 5 + shift))
                .await
                .unwrap();
        }
        assert_eq!(engine.wal_appends_since_compact().await, 51);

        let before = std::fs::metadata(&path).unwrap().len();
        engine.compact_wal().await.unwrap();
        assert_eq!(engine.wal_appends_since_compact().await, 0);
        let after = std::fs::metadata(&path).unwrap().len();
        assert!(after < before);
    }

    let engine = Engine::new(path, Arc::new(NotifyHub::new())).unwrap();
    let all = engine.get_reservations(&pid, None).await.unwrap();
    assert_eq!(all.len(), 20);
    let kept = engine.get_reservation(&keep).await.unwrap();
    assert_eq!(kept.status, ReservationStatus::Confirmed);
    assert_eq!(kept.stay(), Stay::new(d(8, 11), d(8, 15)));
    assert_eq!(
        engine
            .get_reservations(&pid, Some(ReservationStatus::Cancelled))
            .await
            .unwrap()
            .len(),
        19
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn compaction_during_concurrent_writes_loses_nothing() {
    let path = test_wal_path("compaction_concurrent.wal");
    let mut properties = Vec::new();
    let mut booked: Vec<(Id, bool)> = Vec::new();
    {
        let engine = Arc::new(Engine::new(path.clone(), Arc::new(NotifyHub::new())).unwrap());
        for _ in 0..8 {
            properties.push(with_property(&engine, 2).await);
        }

        let compactor = {
            let engine = engine.clone();
            tokio::spawn(async move {
                for _ in 0..30 {
                    engine.compact_wal().await.unwrap();
                    tokio::task::yield_now().await;
                }
            })
        };

        let mut writers = Vec::new();
        for pid in properties.clone() {
            let engine = engine.clone();
            writers.push(tokio::spawn(async move {
                let mut ids = Vec::new();
                for night in 0..25u64 {
                    let check_in = d(1, 1) + Days::new(night);
                    let rid = Id::generate();
                    engine
                        .request_reservation(rid.clone(), pid.clone(), check_in, check_in + Days::new(1), 1, None)
                        .await
                        .unwrap();
                    let accepted = night % 2 == 0;
                    if accepted {
                        engine.accept_reservation(rid.clone()).await.unwrap();
                    }
                    ids.push((rid, accepted));
                }
                ids
            }));
        }
        for w in writers {
            booked.extend(w.await.unwrap());
        }
        compactor.await.unwrap();
    }

    let engine = new_engine_at(path);
    assert_eq!(booked.len(), 200);
    let mut restored = 0;
    for pid in &properties {
        restored += engine.get_reservations(pid, None).await.unwrap().len();
    }
    assert_eq!(restored, 200);
    for (rid, accepted) in &booked {
        let expected = if *accepted {
            ReservationStatus::Confirmed
        } else {
            ReservationStatus::Pending
        };
        assert_eq!(status_of(&engine, rid).await, expected, "reservation {rid}");
    }
}

#[tokio::test]
async fn second_engine_on_same_log_is_refused() {
    let path = test_wal_path("locked.wal");
    let first = new_engine_at(path.clone());
    let pid = with_property(&first, 2).await;

    let err = Engine::new(path.clone(), Arc::new(NotifyHub::new()))
        .err()
        .expect("a second engine must not open a held log");
    assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    assert!(err.to_string().contains("locked by another novodom process"), "{err}");

    drop(first);
    let reopened = new_engine_at(path);
    assert!(reopened.get_property(&pid).is_some());
}

// ── Snapshots ────────────────────────────────────────────

#[tokio::test]
async fn snapshot_export_import_roundtrip() {
    let source = new_engine("snapshot_source.wal");
    let pid = with_property(&source, 3).await;
    let a = book(&source, &pid, d(6, 1), d(6, 4)).await;
    let b = book(&source, &pid, d(6, 4), d(6, 9)).await;
    source.accept_reservation(a.clone()).await.unwrap();
    source.cancel_reservation(b.clone()).await.unwrap();

    let json = source.snapshot().await.to_json().unwrap();
    let snapshot = Snapshot::from_json(&json).unwrap();
    assert_eq!(snapshot.reservation_count(), 2);

    let target = new_engine("snapshot_target.wal");
    assert_eq!(target.import_snapshot(&snapshot).await.unwrap(), 2);
    assert_eq!(status_of(&target, &a).await, ReservationStatus::Confirmed);
    assert_eq!(status_of(&target, &b).await, ReservationStatus::Cancelled);
    assert_eq!(target.get_property_for_reservation(&a), Some(pid));

    // Same ids again
    assert!(matches!(
        target.import_snapshot(&snapshot).await,
        Err(EngineError::AlreadyExists(_))
    ));
}

#[tokio::test]
async fn import_rejects_double_booking() {
    let pid = Id::generate();
    let reservation = |check_in, check_out| Reservation {
        id: Id::generate(),
        property_id: pid.clone(),
        check_in,
        check_out,
        status: ReservationStatus::Confirmed,
        guest_count: 1,
        guest_name: None,
    };
    let snapshot = Snapshot::new(
        vec![PropertyInfo {
            id: pid.clone(),
            name: None,
            max_guests: 2,
            nightly_price: 0,
        }],
        vec![reservation(d(6, 1), d(6, 5)), reservation(d(6, 3), d(6, 7))],
    )
    .unwrap();
    assert_eq!(snapshot.anomalies().len(), 1);

    let engine = new_engine("import_double.wal");
    assert!(matches!(
        engine.import_snapshot(&snapshot).await,
        Err(EngineError::Conflict { .. })
    ));
    assert!(engine.get_property(&pid).is_none());
}

// ── Notifications ────────────────────────────────────────

#[tokio::test]
async fn workflow_events_are_broadcast() {
    let engine = new_engine("notify.wal");
    let pid = with_property(&engine, 2).await;
    let mut rx = engine.notify.subscribe(&pid);

    let rid = book(&engine, &pid, d(6, 1), d(6, 3)).await;
    engine.accept_reservation(rid.clone()).await.unwrap();
    engine.cancel_reservation(rid.clone()).await.unwrap();

    assert!(matches!(
        rx.recv().await.unwrap(),
        Event::ReservationRequested { id, .. } if id == rid
    ));
    assert_eq!(
        rx.recv().await.unwrap(),
        Event::ReservationAccepted { id: rid.clone(), property_id: pid.clone() }
    );
    assert_eq!(
        rx.recv().await.unwrap(),
        Event::ReservationCancelled { id: rid, property_id: pid }
    );
}

#[tokio::test]
async fn failed_mutation_is_not_broadcast() {
    let engine = new_engine("notify_failed.wal");
    let pid = with_property(&engine, 2).await;
    book(&engine, &pid, d(6, 1), d(6, 3)).await;
    let mut rx = engine.notify.subscribe(&pid);

    assert!(engine
        .request_reservation(Id::generate(), pid.clone(), d(6, 2), d(6, 4), 1, None)
        .await
        .is_err());
    assert!(rx.try_recv().is_err());
}

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use futures::{StreamExt, stream};
use ulid::Ulid;

use bookings::engine::{Engine, EngineError};
use bookings::model::*;
use bookings::session::SessionManager;
use bookings::store::{PersistenceStore, WalStore};
use bookings::wire;

// ── Test infrastructure ──────────────────────────────────────

fn test_data_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("bookings_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

async fn open(path: PathBuf) -> (Engine, Arc<WalStore>) {
    let store = Arc::new(WalStore::open(path).unwrap());
    if store.rooms().await.unwrap().is_empty() {
        store.insert_room("General's Quarters".into()).await.unwrap();
        store.insert_room("Major's Suite".into()).await.unwrap();
    }
    (Engine::new(store.clone()), store)
}

fn form(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn guest() -> GuestDetails {
    GuestDetails {
        first_name: "John".into(),
        last_name: "Smith".into(),
        email: "john@smith.com".into(),
        phone: "5555-555-555".into(),
    }
}

fn sep(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2050, 9, day).unwrap()
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn guest_books_and_admin_processes() {
    let (engine, _) = open(test_data_dir().join("bookings.wal")).await;
    let sessions = SessionManager::new(Duration::from_secs(3600));
    let guest_session = sessions.load(None);

    let stay = DateRange::parse("01-01-2050", "02-01-2050", DAY_MONTH_YEAR).unwrap();
    let rooms = engine.start_search(guest_session.as_ref(), stay).await.unwrap();
    assert_eq!(rooms.len(), 2);

    // Same browser comes back with its token.
    let guest_session = sessions.load(Some(guest_session.token()));
    engine.choose_room(guest_session.as_ref(), 1).await.unwrap();
    let summary = engine.submit(guest_session.as_ref(), guest()).await.unwrap();
    assert_eq!(summary.room.name, "General's Quarters");

    let check = form(&[("start", "01-01-2050"), ("end", "02-01-2050"), ("room_id", "1")]);
    let response = wire::availability_json(&engine, &check).await;
    assert!(!response.ok);
    assert_eq!(response.message, wire::MSG_NOT_AVAILABLE);

    let pending = engine.reservations(ReservationFilter::New).await.unwrap();
    assert_eq!(pending.len(), 1);
    let id = pending[0].id;
    assert!(engine.process(id).await.unwrap());
    assert!(engine.reservations(ReservationFilter::New).await.unwrap().is_empty());

    engine.remove(id).await.unwrap();
    let response = wire::availability_json(&engine, &check).await;
    assert!(response.ok);
}

#[tokio::test]
async fn calendar_form_round_trip() {
    let (engine, store) = open(test_data_dir().join("bookings.wal")).await;
    let sessions = SessionManager::new(Duration::from_secs(3600));
    let admin = sessions.load(None);

    let reserved = DateRange::new(sep(10), sep(12));
    engine
        .commit(&ReservationDraft {
            range: reserved,
            room_id: Some(2),
            guest: Some(guest()),
        })
        .await
        .unwrap();

    engine.load_calendar(admin.as_ref(), 2050, 9).await.unwrap();

    let block_room_1 = wire::block_key(1, sep(2));
    let block_reserved = wire::block_key(2, sep(10));
    let submitted = form(&[
        ("year", "2050"),
        ("month", "9"),
        (block_room_1.as_str(), "1"),
        (block_reserved.as_str(), "1"),
    ]);
    let submission = wire::parse_calendar_form(&submitted).unwrap();
    let reports = engine.reconcile_month(admin.as_ref(), &submission).await.unwrap();

    assert_eq!(reports[0].added, vec![sep(2)]);
    assert!(matches!(
        reports[1].failures.as_slice(),
        [(_, EngineError::DayOccupied { room_id: 2, .. })]
    ));

    // Submitting the same form again changes nothing.
    let submission = wire::parse_calendar_form(&submitted).unwrap();
    let again = engine.reconcile_month(admin.as_ref(), &submission).await.unwrap();
    assert_eq!(again[0].writes(), 0);

    // Dropping the key unblocks the day.
    let cleared = form(&[("year", "2050"), ("month", "9")]);
    let submission = wire::parse_calendar_form(&cleared).unwrap();
    let reports = engine.reconcile_month(admin.as_ref(), &submission).await.unwrap();
    assert_eq!(reports[0].removed, vec![sep(2)]);

    let month = DateRange::month(2050, 9).unwrap();
    let left = store.restrictions_for_room(1, month).await.unwrap();
    assert!(left.is_empty());
}

#[tokio::test]
async fn state_survives_restart_and_compaction() {
    let path = test_data_dir().join("bookings.wal");
    let id = {
        let (engine, store) = open(path.clone()).await;
        let id = engine
            .commit(&ReservationDraft {
                range: DateRange::new(sep(1), sep(4)),
                room_id: Some(1),
                guest: Some(guest()),
            })
            .await
            .unwrap();
        engine.process(id).await.unwrap();
        let session = bookings::session::Session::new("admin".into(), i64::MAX);
        let mut desired = std::collections::BTreeSet::new();
        desired.insert(sep(20));
        engine
            .reconcile_room(&session, 2, 2050, 9, &desired)
            .await
            .unwrap();
        store.compact_wal().await.unwrap();
        id
    };

    let (engine, _) = open(path).await;
    assert_eq!(engine.rooms().await.unwrap().len(), 2);
    let reservation = engine.reservation(id).await.unwrap();
    assert_eq!(reservation.status, ReservationStatus::Processed);
    assert!(!engine
        .is_room_available(1, &DateRange::new(sep(3), sep(5)))
        .await
        .unwrap());
    let snapshot = engine.build_snapshot(2, 2050, 9).await.unwrap();
    assert_eq!(snapshot.blocked_days().collect::<Vec<_>>(), vec![sep(20)]);
}

#[tokio::test]
async fn many_guests_one_night() {
    let (engine, _) = open(test_data_dir().join("bookings.wal")).await;
    let engine = Arc::new(engine);
    let night = DateRange::day(sep(15));

    let results: Vec<_> = stream::iter(0..20)
        .map(|i| {
            let engine = engine.clone();
            async move {
                let room_id = if i % 2 == 0 { 1 } else { 2 };
                engine
                    .commit(&ReservationDraft {
                        range: night,
                        room_id: Some(room_id),
                        guest: Some(guest()),
                    })
                    .await
            }
        })
        .buffer_unordered(20)
        .collect()
        .await;

    let won = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(won, 2, "one booking per room");
    assert!(results.iter().all(|r| matches!(
        r,
        Ok(_) | Err(EngineError::RoomUnavailable { .. })
    )));
    assert!(engine.find_available_rooms(&night).await.unwrap().is_empty());
}

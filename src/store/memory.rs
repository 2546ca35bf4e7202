use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;
use crate::wal::Wal;

use super::{PersistenceStore, StoreError};

pub type SharedRoomState = Arc<RwLock<RoomState>>;

// ── Group-commit WAL channel ─────────────────────────────

enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit:
/// take the first append, drain whatever else is already queued, then one
/// fsync answers the whole batch.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    // Flush what we have before touching the file any other way.
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        metrics::histogram!(observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        for (_, tx) in batch {
            let r = match &result {
                Ok(()) => Ok(()),
                Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
            };
            let _ = tx.send(r);
        }

        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
    debug!("WAL writer stopped");
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let append_result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so half-buffered bytes never leak into
    // the next batch; every caller in this batch is told it failed.
    let flush_result = wal.flush_sync();
    append_result.and(flush_result)
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

/// Apply a restriction-level event to a room (caller holds the room's write lock).
fn apply_to_room(
    rs: &mut RoomState,
    event: &Event,
    restriction_to_room: &DashMap<RestrictionId, RoomId>,
) {
    match event {
        Event::RestrictionAdded {
            id,
            room_id,
            range,
            kind,
        } => {
            rs.insert_restriction(RoomRestriction {
                id: *id,
                room_id: *room_id,
                range: *range,
                kind: *kind,
            });
            restriction_to_room.insert(*id, *room_id);
        }
        Event::ReservationCommitted {
            id,
            restriction_id,
            room_id,
            range,
            ..
        } => {
            rs.insert_restriction(RoomRestriction {
                id: *restriction_id,
                room_id: *room_id,
                range: *range,
                kind: RestrictionKind::Reservation(*id),
            });
            restriction_to_room.insert(*restriction_id, *room_id);
        }
        Event::RestrictionRemoved { id, .. } => {
            rs.remove_restriction(*id);
            restriction_to_room.remove(id);
        }
        Event::ReservationDeleted { id, .. } => {
            for removed in rs.remove_reservation(*id) {
                restriction_to_room.remove(&removed.id);
            }
        }
        _ => {}
    }
}

/// Apply a reservation-row event.
fn apply_to_reservations(reservations: &DashMap<ReservationId, Reservation>, event: &Event) {
    match event {
        Event::ReservationInserted {
            id,
            room_id,
            range,
            guest,
            created_at,
        }
        | Event::ReservationCommitted {
            id,
            room_id,
            range,
            guest,
            created_at,
            ..
        } => {
            reservations.insert(
                *id,
                Reservation {
                    id: *id,
                    room_id: *room_id,
                    range: *range,
                    guest: guest.clone(),
                    status: ReservationStatus::New,
                    created_at: *created_at,
                },
            );
        }
        Event::GuestUpdated { id, guest } => {
            if let Some(mut r) = reservations.get_mut(id) {
                r.guest = guest.clone();
            }
        }
        Event::ReservationProcessed { id } => {
            if let Some(mut r) = reservations.get_mut(id) {
                r.status = ReservationStatus::Processed;
            }
        }
        Event::ReservationDeleted { id, .. } => {
            reservations.remove(id);
        }
        _ => {}
    }
}

/// Room the event's restriction changes belong to, if any.
fn event_room_id(event: &Event) -> Option<RoomId> {
    match event {
        Event::RestrictionAdded { room_id, .. }
        | Event::ReservationCommitted { room_id, .. }
        | Event::RestrictionRemoved { room_id, .. }
        | Event::ReservationDeleted { room_id, .. } => Some(*room_id),
        _ => None,
    }
}

/// In-memory persistence store made durable by a write-ahead log.
///
/// Each room's restrictions sit behind their own `RwLock`; the overlap check
/// and the insert of a restriction happen under one write guard, which is what
/// makes two overlapping commits on the same room mutually exclusive.
pub struct WalStore {
    rooms: DashMap<RoomId, SharedRoomState>,
    reservations: DashMap<ReservationId, Reservation>,
    restriction_to_room: DashMap<RestrictionId, RoomId>,
    next_room_id: AtomicU32,
    /// Mutations hold this shared; compaction takes it exclusively so no
    /// append can slip in between the snapshot and the file swap.
    gate: RwLock<()>,
    wal_tx: mpsc::Sender<WalCommand>,
}

impl WalStore {
    /// Replay the log at `wal_path`, truncate any torn tail, and start the
    /// writer task. Needs a tokio runtime.
    pub fn open(wal_path: PathBuf) -> io::Result<Self> {
        let events = Wal::recover(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let store = Self {
            rooms: DashMap::new(),
            reservations: DashMap::new(),
            restriction_to_room: DashMap::new(),
            next_room_id: AtomicU32::new(1),
            gate: RwLock::new(()),
            wal_tx,
        };

        // We are the sole owner of every room lock here, so try_write never fails.
        // Never use blocking_write: open may run inside an async context.
        for event in &events {
            if let Event::RoomCreated { id, name } = event {
                store.install_room(*id, name.clone());
                continue;
            }
            apply_to_reservations(&store.reservations, event);
            if let Some(room_id) = event_room_id(event)
                && let Some(entry) = store.rooms.get(&room_id)
                && let Ok(mut guard) = entry.value().try_write()
            {
                apply_to_room(&mut guard, event, &store.restriction_to_room);
            }
        }

        info!(
            path = %wal_path.display(),
            events = events.len(),
            rooms = store.rooms.len(),
            reservations = store.reservations.len(),
            "store opened"
        );
        Ok(store)
    }

    fn install_room(&self, id: RoomId, name: String) {
        self.rooms
            .insert(id, Arc::new(RwLock::new(RoomState::new(Room { id, name }))));
        self.next_room_id.fetch_max(id + 1, Ordering::SeqCst);
    }

    fn get_room(&self, id: RoomId) -> Result<SharedRoomState, StoreError> {
        self.rooms
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or_else(|| StoreError::NotFound(format!("room {id}")))
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| StoreError::Unavailable("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Unavailable("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Wal(e.to_string()))
    }

    /// WAL-append then apply to the room the caller has locked.
    async fn persist_to_room(&self, rs: &mut RoomState, event: &Event) -> Result<(), StoreError> {
        self.wal_append(event).await?;
        apply_to_room(rs, event, &self.restriction_to_room);
        apply_to_reservations(&self.reservations, event);
        Ok(())
    }

    async fn persist_reservation(&self, event: &Event) -> Result<(), StoreError> {
        self.wal_append(event).await?;
        apply_to_reservations(&self.reservations, event);
        Ok(())
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Rewrite the WAL with only the events needed to recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), StoreError> {
        let _exclusive = self.gate.write().await;
        let mut events = Vec::new();

        let mut room_ids: Vec<RoomId> = self.rooms.iter().map(|e| *e.key()).collect();
        room_ids.sort_unstable();
        let mut restrictions = Vec::new();
        for id in room_ids {
            let rs = self.get_room(id)?;
            let guard = rs.read().await;
            events.push(Event::RoomCreated {
                id,
                name: guard.room.name.clone(),
            });
            restrictions.extend(guard.restrictions.iter().cloned());
        }

        let mut reservations: Vec<Reservation> =
            self.reservations.iter().map(|e| e.value().clone()).collect();
        reservations.sort_by_key(|r| r.id);
        for r in reservations {
            events.push(Event::ReservationInserted {
                id: r.id,
                room_id: r.room_id,
                range: r.range,
                guest: r.guest,
                created_at: r.created_at,
            });
            if r.status == ReservationStatus::Processed {
                events.push(Event::ReservationProcessed { id: r.id });
            }
        }

        events.extend(restrictions.into_iter().map(|r| Event::RestrictionAdded {
            id: r.id,
            room_id: r.room_id,
            range: r.range,
            kind: r.kind,
        }));

        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| StoreError::Unavailable("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Unavailable("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Wal(e.to_string()))?;
        metrics::counter!(observability::WAL_COMPACTIONS_TOTAL).increment(1);
        info!(events = count, "WAL compacted");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

#[async_trait]
impl PersistenceStore for WalStore {
    async fn insert_room(&self, name: String) -> Result<RoomId, StoreError> {
        if name.is_empty() || name.len() > MAX_ROOM_NAME_LEN {
            return Err(StoreError::LimitExceeded("room name length"));
        }
        let _shared = self.gate.read().await;
        // Rooms are never deleted, so the next id bounds the room count.
        let id = self
            .next_room_id
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |next| {
                (next as usize <= MAX_ROOMS).then_some(next + 1)
            })
            .map_err(|_| StoreError::LimitExceeded("too many rooms"))?;
        let event = Event::RoomCreated {
            id,
            name: name.clone(),
        };
        self.wal_append(&event).await?;
        self.install_room(id, name);
        Ok(id)
    }

    async fn room_by_id(&self, id: RoomId) -> Result<Room, StoreError> {
        let rs = self.get_room(id)?;
        let guard = rs.read().await;
        Ok(guard.room.clone())
    }

    async fn rooms(&self) -> Result<Vec<Room>, StoreError> {
        let shared: Vec<SharedRoomState> = self.rooms.iter().map(|e| e.value().clone()).collect();
        let mut rooms = Vec::with_capacity(shared.len());
        for rs in shared {
            rooms.push(rs.read().await.room.clone());
        }
        rooms.sort_by_key(|r| r.id);
        Ok(rooms)
    }

    async fn insert_reservation(
        &self,
        room_id: RoomId,
        range: DateRange,
        guest: GuestDetails,
    ) -> Result<ReservationId, StoreError> {
        let _shared = self.gate.read().await;
        self.get_room(room_id)?;
        let id = Ulid::new();
        let event = Event::ReservationInserted {
            id,
            room_id,
            range,
            guest,
            created_at: now_ms(),
        };
        self.persist_reservation(&event).await?;
        Ok(id)
    }

    async fn commit_reservation(
        &self,
        room_id: RoomId,
        range: DateRange,
        guest: GuestDetails,
    ) -> Result<ReservationId, StoreError> {
        let _shared = self.gate.read().await;
        let rs = self.get_room(room_id)?;
        let mut guard = rs.write().await;
        if guard.restrictions.len() >= MAX_RESTRICTIONS_PER_ROOM {
            return Err(StoreError::LimitExceeded("too many restrictions on room"));
        }
        if let Some(existing) = guard.overlapping(&range).next() {
            return Err(StoreError::Conflict {
                existing: existing.id,
                room_id,
                range,
            });
        }

        let id = Ulid::new();
        let event = Event::ReservationCommitted {
            id,
            restriction_id: Ulid::new(),
            room_id,
            range,
            guest,
            created_at: now_ms(),
        };
        self.persist_to_room(&mut guard, &event).await?;
        Ok(id)
    }

    async fn reservation_by_id(&self, id: ReservationId) -> Result<Reservation, StoreError> {
        self.reservations
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or_else(|| StoreError::NotFound(format!("reservation {id}")))
    }

    async fn reservations(&self, filter: ReservationFilter) -> Result<Vec<Reservation>, StoreError> {
        let mut found: Vec<Reservation> = self
            .reservations
            .iter()
            .filter(|e| filter.matches(e.value()))
            .map(|e| e.value().clone())
            .collect();
        found.sort_by_key(|r| (r.range.start, r.id));
        Ok(found)
    }

    async fn update_guest(&self, id: ReservationId, guest: GuestDetails) -> Result<(), StoreError> {
        let _shared = self.gate.read().await;
        self.reservation_by_id(id).await?;
        self.persist_reservation(&Event::GuestUpdated { id, guest }).await
    }

    async fn mark_reservation_processed(&self, id: ReservationId) -> Result<bool, StoreError> {
        let _shared = self.gate.read().await;
        let current = self.reservation_by_id(id).await?;
        if current.status == ReservationStatus::Processed {
            return Ok(false);
        }
        self.persist_reservation(&Event::ReservationProcessed { id }).await?;
        Ok(true)
    }

    async fn delete_reservation(&self, id: ReservationId) -> Result<(), StoreError> {
        let _shared = self.gate.read().await;
        let room_id = self.reservation_by_id(id).await?.room_id;
        let rs = self.get_room(room_id)?;
        let mut guard = rs.write().await;
        // Re-check under the room lock: a concurrent delete may have won.
        if !self.reservations.contains_key(&id) {
            return Err(StoreError::NotFound(format!("reservation {id}")));
        }
        let event = Event::ReservationDeleted { id, room_id };
        self.persist_to_room(&mut guard, &event).await
    }

    async fn insert_room_restriction(
        &self,
        room_id: RoomId,
        range: DateRange,
        kind: RestrictionKind,
    ) -> Result<RestrictionId, StoreError> {
        let _shared = self.gate.read().await;
        let rs = self.get_room(room_id)?;
        let mut guard = rs.write().await;
        if guard.restrictions.len() >= MAX_RESTRICTIONS_PER_ROOM {
            return Err(StoreError::LimitExceeded("too many restrictions on room"));
        }
        if let RestrictionKind::Reservation(reservation_id) = kind {
            match self.reservations.get(&reservation_id) {
                Some(r) if r.room_id == room_id && r.range == range => {}
                Some(_) => {
                    return Err(StoreError::NotFound(format!(
                        "reservation {reservation_id} for room {room_id} {range}"
                    )));
                }
                None => return Err(StoreError::NotFound(format!("reservation {reservation_id}"))),
            }
        }
        if let Some(existing) = guard.overlapping(&range).next() {
            return Err(StoreError::Conflict {
                existing: existing.id,
                room_id,
                range,
            });
        }

        let id = Ulid::new();
        let event = Event::RestrictionAdded {
            id,
            room_id,
            range,
            kind,
        };
        self.persist_to_room(&mut guard, &event).await?;
        Ok(id)
    }

    async fn delete_room_restriction(&self, id: RestrictionId) -> Result<(), StoreError> {
        let _shared = self.gate.read().await;
        let room_id = self
            .restriction_to_room
            .get(&id)
            .map(|e| *e.value())
            .ok_or_else(|| StoreError::NotFound(format!("restriction {id}")))?;
        let rs = self.get_room(room_id)?;
        let mut guard = rs.write().await;
        if !guard.restrictions.iter().any(|r| r.id == id) {
            return Err(StoreError::NotFound(format!("restriction {id}")));
        }
        let event = Event::RestrictionRemoved { id, room_id };
        self.persist_to_room(&mut guard, &event).await
    }

    async fn restrictions_for_room(
        &self,
        room_id: RoomId,
        window: DateRange,
    ) -> Result<Vec<RoomRestriction>, StoreError> {
        let rs = self.get_room(room_id)?;
        let guard = rs.read().await;
        Ok(guard.overlapping(&window).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("bookings_test_store");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn jan(a: u32, b: u32) -> DateRange {
        DateRange::new(d(2050, 1, a), d(2050, 1, b))
    }

    fn guest() -> GuestDetails {
        GuestDetails {
            first_name: "John".into(),
            last_name: "Smith".into(),
            email: "john@smith.com".into(),
            phone: "123456789".into(),
        }
    }

    #[tokio::test]
    async fn rooms_get_ascending_ids() {
        let store = WalStore::open(test_wal_path("rooms.wal")).unwrap();
        let a = store.insert_room("General's Quarters".into()).await.unwrap();
        let b = store.insert_room("Major's Suite".into()).await.unwrap();
        assert_eq!((a, b), (1, 2));
        let rooms = store.rooms().await.unwrap();
        assert_eq!(rooms.iter().map(|r| r.id).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(store.room_by_id(2).await.unwrap().name, "Major's Suite");
        assert!(matches!(store.room_by_id(9).await, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn empty_room_name_rejected() {
        let store = WalStore::open(test_wal_path("room_name.wal")).unwrap();
        let result = store.insert_room(String::new()).await;
        assert!(matches!(result, Err(StoreError::LimitExceeded(_))));
    }

    #[tokio::test]
    async fn overlapping_restriction_rejected() {
        let store = WalStore::open(test_wal_path("overlap.wal")).unwrap();
        let room = store.insert_room("R".into()).await.unwrap();
        let first = store
            .insert_room_restriction(room, jan(1, 5), RestrictionKind::OwnerBlock)
            .await
            .unwrap();

        let result = store
            .insert_room_restriction(room, jan(4, 6), RestrictionKind::OwnerBlock)
            .await;
        match result {
            Err(StoreError::Conflict { existing, .. }) => assert_eq!(existing, first),
            other => panic!("expected conflict, got {other:?}"),
        }

        // Touching the boundary is fine.
        store
            .insert_room_restriction(room, jan(5, 6), RestrictionKind::OwnerBlock)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn reservation_restriction_requires_matching_row() {
        let store = WalStore::open(test_wal_path("orphan.wal")).unwrap();
        let room = store.insert_room("R".into()).await.unwrap();
        let result = store
            .insert_room_restriction(room, jan(1, 2), RestrictionKind::Reservation(Ulid::new()))
            .await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));

        let res_id = store.insert_reservation(room, jan(1, 2), guest()).await.unwrap();
        let result = store
            .insert_room_restriction(room, jan(1, 3), RestrictionKind::Reservation(res_id))
            .await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn delete_reservation_drops_its_restriction() {
        let store = WalStore::open(test_wal_path("delete_res.wal")).unwrap();
        let room = store.insert_room("R".into()).await.unwrap();
        let res_id = store.insert_reservation(room, jan(1, 3), guest()).await.unwrap();
        store
            .insert_room_restriction(room, jan(1, 3), RestrictionKind::Reservation(res_id))
            .await
            .unwrap();
        store
            .insert_room_restriction(room, jan(10, 11), RestrictionKind::OwnerBlock)
            .await
            .unwrap();

        store.delete_reservation(res_id).await.unwrap();
        let left = store.restrictions_for_room(room, jan(1, 31)).await.unwrap();
        assert_eq!(left.len(), 1);
        assert!(left[0].kind.is_owner_block());
        assert!(matches!(
            store.delete_reservation(res_id).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn delete_restriction_twice_is_not_found() {
        let store = WalStore::open(test_wal_path("delete_block.wal")).unwrap();
        let room = store.insert_room("R".into()).await.unwrap();
        let id = store
            .insert_room_restriction(room, jan(2, 3), RestrictionKind::OwnerBlock)
            .await
            .unwrap();
        store.delete_room_restriction(id).await.unwrap();
        assert!(matches!(
            store.delete_room_restriction(id).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn processed_flag_is_idempotent() {
        let store = WalStore::open(test_wal_path("processed.wal")).unwrap();
        let room = store.insert_room("R".into()).await.unwrap();
        let id = store.insert_reservation(room, jan(1, 2), guest()).await.unwrap();
        assert!(store.mark_reservation_processed(id).await.unwrap());
        assert!(!store.mark_reservation_processed(id).await.unwrap());
        assert!(store.reservations(ReservationFilter::New).await.unwrap().is_empty());
        assert_eq!(store.reservations(ReservationFilter::All).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn state_survives_reopen() {
        let path = test_wal_path("reopen.wal");
        let (room, res_id) = {
            let store = WalStore::open(path.clone()).unwrap();
            let room = store.insert_room("General's Quarters".into()).await.unwrap();
            let res_id = store.insert_reservation(room, jan(1, 3), guest()).await.unwrap();
            store
                .insert_room_restriction(room, jan(1, 3), RestrictionKind::Reservation(res_id))
                .await
                .unwrap();
            let block = store
                .insert_room_restriction(room, jan(5, 6), RestrictionKind::OwnerBlock)
                .await
                .unwrap();
            store.delete_room_restriction(block).await.unwrap();
            store.mark_reservation_processed(res_id).await.unwrap();
            (room, res_id)
        };

        let store = WalStore::open(path).unwrap();
        assert_eq!(store.room_by_id(room).await.unwrap().name, "General's Quarters");
        let reservation = store.reservation_by_id(res_id).await.unwrap();
        assert_eq!(reservation.status, ReservationStatus::Processed);
        let restrictions = store.restrictions_for_room(room, jan(1, 31)).await.unwrap();
        assert_eq!(restrictions.len(), 1);
        assert_eq!(restrictions[0].kind, RestrictionKind::Reservation(res_id));

        // Ids continue after the highest replayed room.
        assert_eq!(store.insert_room("Next".into()).await.unwrap(), room + 1);
    }

    #[tokio::test]
    async fn commit_reservation_writes_row_and_restriction() {
        let path = test_wal_path("commit.wal");
        let room = {
            let store = WalStore::open(path.clone()).unwrap();
            let room = store.insert_room("R".into()).await.unwrap();
            let id = store.commit_reservation(room, jan(1, 3), guest()).await.unwrap();
            assert_eq!(store.reservation_by_id(id).await.unwrap().range, jan(1, 3));

            let result = store.commit_reservation(room, jan(2, 4), guest()).await;
            assert!(matches!(result, Err(StoreError::Conflict { .. })));
            assert_eq!(store.reservations(ReservationFilter::All).await.unwrap().len(), 1);
            room
        };

        let store = WalStore::open(path).unwrap();
        let reservations = store.reservations(ReservationFilter::All).await.unwrap();
        assert_eq!(reservations.len(), 1);
        let restrictions = store.restrictions_for_room(room, jan(1, 31)).await.unwrap();
        assert_eq!(restrictions.len(), 1);
        assert_eq!(restrictions[0].kind, RestrictionKind::Reservation(reservations[0].id));

        // Deleting the row takes the committed restriction with it.
        store.delete_reservation(reservations[0].id).await.unwrap();
        assert!(store.restrictions_for_room(room, jan(1, 31)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn commit_reservation_unknown_room_writes_nothing() {
        let store = WalStore::open(test_wal_path("commit_unknown.wal")).unwrap();
        let result = store.commit_reservation(7, jan(1, 3), guest()).await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
        assert_eq!(store.wal_appends_since_compact().await, 0);
    }

    #[tokio::test]
    async fn writes_after_torn_tail_survive_reopen() {
        let path = test_wal_path("torn_tail.wal");
        {
            let store = WalStore::open(path.clone()).unwrap();
            store.insert_room("A".into()).await.unwrap();
        }
        {
            use std::io::Write;
            let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[7, 0]).unwrap();
        }
        {
            let store = WalStore::open(path.clone()).unwrap();
            assert_eq!(store.room_count(), 1);
            store.insert_room("B".into()).await.unwrap();
        }

        let store = WalStore::open(path).unwrap();
        let names: Vec<String> = store.rooms().await.unwrap().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["A", "B"]);
    }

    #[tokio::test]
    async fn room_limit_holds_under_concurrent_inserts() {
        let store = Arc::new(WalStore::open(test_wal_path("room_limit.wal")).unwrap());
        let mut handles = Vec::new();
        for i in 0..MAX_ROOMS + 10 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.insert_room(format!("Room {i}")).await
            }));
        }
        let mut created = 0;
        let mut refused = 0;
        for h in handles {
            match h.await.unwrap() {
                Ok(_) => created += 1,
                Err(StoreError::LimitExceeded(_)) => refused += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!((created, refused), (MAX_ROOMS, 10));
        assert_eq!(store.room_count(), MAX_ROOMS);
    }

    #[tokio::test]
    async fn concurrent_overlapping_inserts_one_wins() {
        let store = Arc::new(WalStore::open(test_wal_path("race.wal")).unwrap());
        let room = store.insert_room("R".into()).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .insert_room_restriction(room, jan(1, 3), RestrictionKind::OwnerBlock)
                    .await
            }));
        }
        let mut ok = 0;
        for h in handles {
            match h.await.unwrap() {
                Ok(_) => ok += 1,
                Err(StoreError::Conflict { .. }) => {}
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(ok, 1);
    }

    #[tokio::test]
    async fn compact_preserves_state_and_resets_counter() {
        let path = test_wal_path("compact_store.wal");
        let store = WalStore::open(path.clone()).unwrap();
        let room = store.insert_room("R".into()).await.unwrap();
        for day in 1..10 {
            let id = store
                .insert_room_restriction(room, jan(day, day + 1), RestrictionKind::OwnerBlock)
                .await
                .unwrap();
            store.delete_room_restriction(id).await.unwrap();
        }
        let res_id = store.insert_reservation(room, jan(20, 22), guest()).await.unwrap();
        store
            .insert_room_restriction(room, jan(20, 22), RestrictionKind::Reservation(res_id))
            .await
            .unwrap();
        store.update_guest(res_id, GuestDetails { phone: "5555-555-555".into(), ..guest() })
            .await
            .unwrap();
        assert!(store.wal_appends_since_compact().await > 0);

        store.compact_wal().await.unwrap();
        assert_eq!(store.wal_appends_since_compact().await, 0);
        drop(store);

        let reopened = WalStore::open(path).unwrap();
        let restrictions = reopened.restrictions_for_room(room, jan(1, 31)).await.unwrap();
        assert_eq!(restrictions.len(), 1);
        let reservation = reopened.reservation_by_id(res_id).await.unwrap();
        assert_eq!(reservation.guest.phone, "5555-555-555");
    }
}

mod memory;

pub use memory::WalStore;

use async_trait::async_trait;

use crate::model::*;

#[derive(Debug, Clone)]
pub enum StoreError {
    /// The store cannot be reached (writer task gone, backend down).
    Unavailable(String),
    NotFound(String),
    /// A restriction on the same room already covers part of the range.
    Conflict {
        existing: RestrictionId,
        room_id: RoomId,
        range: DateRange,
    },
    LimitExceeded(&'static str),
    /// The write could not be made durable.
    Wal(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Unavailable(e) => write!(f, "store unavailable: {e}"),
            StoreError::NotFound(what) => write!(f, "not found: {what}"),
            StoreError::Conflict {
                existing,
                room_id,
                range,
            } => write!(f, "room {room_id} {range} conflicts with restriction {existing}"),
            StoreError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            StoreError::Wal(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Authoritative reservation and restriction records.
///
/// Implementations must reject a restriction insert that overlaps an existing
/// restriction on the same room, atomically with respect to other inserts.
/// The engine relies on that constraint to rule out double bookings.
#[async_trait]
pub trait PersistenceStore: Send + Sync {
    async fn insert_room(&self, name: String) -> Result<RoomId, StoreError>;

    async fn room_by_id(&self, id: RoomId) -> Result<Room, StoreError>;

    /// All rooms, ascending by id.
    async fn rooms(&self) -> Result<Vec<Room>, StoreError>;

    async fn insert_reservation(
        &self,
        room_id: RoomId,
        range: DateRange,
        guest: GuestDetails,
    ) -> Result<ReservationId, StoreError>;

    /// Insert a reservation row and its room restriction as one durable write.
    /// Either both exist afterwards or neither does; an overlapping restriction
    /// on the room yields `Conflict`.
    async fn commit_reservation(
        &self,
        room_id: RoomId,
        range: DateRange,
        guest: GuestDetails,
    ) -> Result<ReservationId, StoreError>;

    async fn reservation_by_id(&self, id: ReservationId) -> Result<Reservation, StoreError>;

    /// Reservations matching `filter`, ordered by start date.
    async fn reservations(&self, filter: ReservationFilter) -> Result<Vec<Reservation>, StoreError>;

    async fn update_guest(&self, id: ReservationId, guest: GuestDetails) -> Result<(), StoreError>;

    /// Returns false if the reservation was already processed.
    async fn mark_reservation_processed(&self, id: ReservationId) -> Result<bool, StoreError>;

    /// Deletes the reservation row together with every restriction it owns.
    async fn delete_reservation(&self, id: ReservationId) -> Result<(), StoreError>;

    async fn insert_room_restriction(
        &self,
        room_id: RoomId,
        range: DateRange,
        kind: RestrictionKind,
    ) -> Result<RestrictionId, StoreError>;

    async fn delete_room_restriction(&self, id: RestrictionId) -> Result<(), StoreError>;

    /// Restrictions on the room overlapping `window`, ordered by start date.
    async fn restrictions_for_room(
        &self,
        room_id: RoomId,
        window: DateRange,
    ) -> Result<Vec<RoomRestriction>, StoreError>;
}

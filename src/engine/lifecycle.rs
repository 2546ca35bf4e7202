use tracing::{debug, info};

use crate::model::*;
use crate::observability;
use crate::session::{SessionKey, SessionValue, TransientStore};
use crate::store::StoreError;

use super::conflict::{validate_guest, validate_range};
use super::{Engine, EngineError, instrumented};

fn session_draft(session: &dyn TransientStore) -> Result<ReservationDraft, EngineError> {
    match session.get(&SessionKey::Draft) {
        Some(SessionValue::Draft(draft)) => Ok(draft),
        _ => Err(EngineError::NoDraft),
    }
}

impl Engine {
    // ── Guest side: draft held in the session ────────────────

    /// Search for free rooms. When any are free, the range is kept in the
    /// session as a new draft for the room choice that follows.
    pub async fn start_search(
        &self,
        session: &dyn TransientStore,
        range: DateRange,
    ) -> Result<Vec<Room>, EngineError> {
        let rooms = self.find_available_rooms(&range).await?;
        if rooms.is_empty() {
            debug!(%range, "no availability");
            session.remove(&SessionKey::Draft);
        } else {
            session.put(SessionKey::Draft, SessionValue::Draft(ReservationDraft::new(range)));
        }
        Ok(rooms)
    }

    pub async fn choose_room(
        &self,
        session: &dyn TransientStore,
        room_id: RoomId,
    ) -> Result<ReservationDraft, EngineError> {
        let mut draft = session_draft(session)?;
        self.store.room_by_id(room_id).await?;
        draft.room_id = Some(room_id);
        session.put(SessionKey::Draft, SessionValue::Draft(draft.clone()));
        Ok(draft)
    }

    /// Start a draft for a specific room and range, e.g. from a room's own page.
    pub async fn book_room(
        &self,
        session: &dyn TransientStore,
        room_id: RoomId,
        range: DateRange,
    ) -> Result<ReservationDraft, EngineError> {
        validate_range(&range)?;
        self.store.room_by_id(room_id).await?;
        let draft = ReservationDraft {
            range,
            room_id: Some(room_id),
            guest: None,
        };
        session.put(SessionKey::Draft, SessionValue::Draft(draft.clone()));
        Ok(draft)
    }

    pub fn draft(&self, session: &dyn TransientStore) -> Result<ReservationDraft, EngineError> {
        session_draft(session)
    }

    /// Attach guest details to the session draft and commit it.
    ///
    /// On failure the draft stays in the session, guest details included, so
    /// the form can be shown again. On success the draft is replaced by the
    /// reservation summary.
    pub async fn submit(
        &self,
        session: &dyn TransientStore,
        guest: GuestDetails,
    ) -> Result<ReservationSummary, EngineError> {
        let mut draft = session_draft(session)?;
        draft.guest = Some(guest);
        session.put(SessionKey::Draft, SessionValue::Draft(draft.clone()));

        let id = self.commit(&draft).await?;
        session.remove(&SessionKey::Draft);

        let reservation = self.store.reservation_by_id(id).await?;
        let room = self.store.room_by_id(reservation.room_id).await?;
        let summary = ReservationSummary { reservation, room };
        session.put(SessionKey::Summary, SessionValue::Summary(summary.clone()));
        Ok(summary)
    }

    /// The summary of the reservation just made. Shown once.
    pub fn take_summary(
        &self,
        session: &dyn TransientStore,
    ) -> Result<ReservationSummary, EngineError> {
        match session.remove(&SessionKey::Summary) {
            Some(SessionValue::Summary(summary)) => Ok(summary),
            _ => Err(EngineError::NoDraft),
        }
    }

    // ── Commit ───────────────────────────────────────────────

    /// Persist a complete draft as a reservation plus the restriction that
    /// occupies its room.
    ///
    /// Availability is checked again first. Row and restriction go to the store
    /// as a single write that refuses an overlapping restriction, so a
    /// concurrent commit that slips past the check still loses at insert time
    /// and an abandoned commit never leaves a row without its restriction.
    pub async fn commit(&self, draft: &ReservationDraft) -> Result<ReservationId, EngineError> {
        instrumented("commit", async {
            let room_id = draft
                .room_id
                .ok_or_else(|| EngineError::InvalidReservation("no room chosen".into()))?;
            let guest = draft
                .guest
                .as_ref()
                .ok_or_else(|| EngineError::InvalidReservation("guest details missing".into()))?;
            validate_guest(guest)?;
            validate_range(&draft.range)?;
            let range = draft.range;

            if !self.is_room_available(room_id, &range).await? {
                metrics::counter!(observability::COMMIT_CONFLICTS_TOTAL, "stage" => "recheck")
                    .increment(1);
                return Err(EngineError::RoomUnavailable { room_id, range });
            }

            let reservation_id = self
                .store
                .commit_reservation(room_id, range, guest.clone())
                .await
                .map_err(|e| match e {
                    StoreError::Conflict { .. } => {
                        metrics::counter!(observability::COMMIT_CONFLICTS_TOTAL, "stage" => "insert")
                            .increment(1);
                        EngineError::RoomUnavailable { room_id, range }
                    }
                    StoreError::Unavailable(msg) => EngineError::StoreUnavailable(msg),
                    StoreError::NotFound(what) => EngineError::NotFound(what),
                    other => EngineError::PersistFailure(other.to_string()),
                })?;

            metrics::counter!(observability::RESERVATIONS_COMMITTED_TOTAL).increment(1);
            info!(%reservation_id, room_id, %range, "reservation committed");
            Ok(reservation_id)
        })
        .await
    }

    // ── Admin side ───────────────────────────────────────────

    /// Mark a reservation processed. Returns false if it already was.
    pub async fn process(&self, id: ReservationId) -> Result<bool, EngineError> {
        instrumented("process", async {
            let changed = self.store.mark_reservation_processed(id).await?;
            if changed {
                info!(reservation_id = %id, "reservation processed");
            } else {
                debug!(reservation_id = %id, "reservation already processed");
            }
            Ok(changed)
        })
        .await
    }

    /// Delete a reservation together with the restriction it holds.
    pub async fn remove(&self, id: ReservationId) -> Result<(), EngineError> {
        instrumented("remove", async {
            self.store.delete_reservation(id).await?;
            info!(reservation_id = %id, "reservation deleted");
            Ok(())
        })
        .await
    }

    pub async fn reservation(&self, id: ReservationId) -> Result<Reservation, EngineError> {
        Ok(self.store.reservation_by_id(id).await?)
    }

    pub async fn reservations(
        &self,
        filter: ReservationFilter,
    ) -> Result<Vec<Reservation>, EngineError> {
        Ok(self.store.reservations(filter).await?)
    }

    /// Replace the guest details of a persisted reservation. Room and dates stay.
    pub async fn update_guest(
        &self,
        id: ReservationId,
        guest: GuestDetails,
    ) -> Result<(), EngineError> {
        instrumented("update_guest", async {
            validate_guest(&guest)?;
            self.store.update_guest(id, guest).await?;
            info!(reservation_id = %id, "guest details updated");
            Ok(())
        })
        .await
    }
}

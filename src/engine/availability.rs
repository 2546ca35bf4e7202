use futures::future::try_join_all;

use crate::model::*;

use super::conflict::{first_conflict, validate_range};
use super::{Engine, EngineError, instrumented};

impl Engine {
    pub async fn rooms(&self) -> Result<Vec<Room>, EngineError> {
        Ok(self.store.rooms().await?)
    }

    /// True iff no restriction on the room overlaps `range`.
    pub async fn is_room_available(
        &self,
        room_id: RoomId,
        range: &DateRange,
    ) -> Result<bool, EngineError> {
        instrumented("is_room_available", async {
            validate_range(range)?;
            self.store.room_by_id(room_id).await?;
            let restrictions = self.store.restrictions_for_room(room_id, *range).await?;
            Ok(first_conflict(&restrictions, range).is_none())
        })
        .await
    }

    /// Every room with no restriction overlapping `range`, ascending by id.
    pub async fn find_available_rooms(&self, range: &DateRange) -> Result<Vec<Room>, EngineError> {
        instrumented("find_available_rooms", async {
            validate_range(range)?;
            let rooms = self.store.rooms().await?;
            let lookups = rooms.iter().map(|room| async move {
                let restrictions = self.store.restrictions_for_room(room.id, *range).await?;
                Ok::<bool, EngineError>(first_conflict(&restrictions, range).is_none())
            });
            let free = try_join_all(lookups).await?;

            let mut available: Vec<Room> = rooms
                .into_iter()
                .zip(free)
                .filter_map(|(room, is_free)| is_free.then_some(room))
                .collect();
            available.sort_by_key(|r| r.id);
            available.dedup_by_key(|r| r.id);
            Ok(available)
        })
        .await
    }
}

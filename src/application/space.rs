//! Community space access for linked users

use std::sync::Arc;

use tracing::{info, warn};

use crate::infrastructure::matrix::{ExtendedClient, MatrixError};

/// Invites linked users to the space and to its suggested rooms
#[derive(Clone)]
pub struct SpaceAccess {
    client: Arc<ExtendedClient>,
    space_id: String,
    max_depth: u32,
}

impl SpaceAccess {
    pub fn new(client: Arc<ExtendedClient>, space_id: impl Into<String>, max_depth: u32) -> Self {
        Self {
            client,
            space_id: space_id.into(),
            max_depth,
        }
    }

    pub fn space_id(&self) -> &str {
        &self.space_id
    }

    /// Invite `user_id` to the space and every suggested room below it
    ///
    /// A single failed invite (the user may already be in the room) does
    /// not stop the others. Returns the rooms the user was invited to.
    pub async fn grant(&self, user_id: &str) -> Result<Vec<String>, MatrixError> {
        let hierarchy = self
            .client
            .room_hierarchy(&self.space_id, self.max_depth, true)
            .await?;

        let mut targets = vec![self.space_id.clone()];
        targets.extend(
            hierarchy
                .into_iter()
                .map(|room| room.room_id)
                .filter(|room_id| *room_id != self.space_id),
        );

        let mut invited = Vec::with_capacity(targets.len());
        for room_id in targets {
            match self.client.invite(&room_id, user_id).await {
                Ok(()) => invited.push(room_id),
                Err(e) => warn!("Could not invite {} to {}: {}", user_id, room_id, e),
            }
        }

        info!("Granted {} access to {} rooms of {}", user_id, invited.len(), self.space_id);
        Ok(invited)
    }
}

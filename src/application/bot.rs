//! Matrix bot
//!
//! Greets users joining the welcome room with the link to their page and
//! follows invites.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::core::store::Store;
use crate::domain::MatrixUser;
use crate::infrastructure::matrix::sync::RawEvent;
use crate::infrastructure::matrix::{ExtendedClient, MatrixError, SyncHandler, SyncResponse};

/// Credentials used to bring the bot online
#[derive(Debug, Clone)]
pub struct BotCredentials {
    pub login_secret: String,
    /// Registration secret, username, displayname and password, when the
    /// account has to be created first
    pub registration: Option<Registration>,
}

#[derive(Debug, Clone)]
pub struct Registration {
    pub shared_secret: String,
    pub username: String,
    pub displayname: String,
    pub password: String,
}

/// Register (if asked to) and log the bot in
pub async fn authenticate(client: &ExtendedClient, credentials: &BotCredentials) -> Result<(), MatrixError> {
    if let Some(reg) = &credentials.registration {
        match client
            .register_with_shared_secret(&reg.shared_secret, &reg.username, &reg.displayname, &reg.password)
            .await
        {
            Ok(()) => info!("Registered {}", client.user_id()),
            Err(MatrixError::Request(e)) if e.is("M_USER_IN_USE") => {
                debug!("{} is already registered", client.user_id());
            }
            Err(e) => return Err(e),
        }
    }

    client.login_with_shared_secret(&credentials.login_secret).await?;
    info!("Logged in as {}", client.user_id());
    Ok(())
}

pub struct LokiBot {
    store: Arc<dyn Store>,
    public_url: String,
    welcome_room_id: Option<String>,
}

impl LokiBot {
    pub fn new(store: Arc<dyn Store>, public_url: impl Into<String>, welcome_room_id: Option<String>) -> Self {
        Self {
            store,
            public_url: public_url.into().trim_end_matches('/').to_string(),
            welcome_room_id,
        }
    }

    /// Page of the user on the web frontend
    pub fn profile_url(&self, user: &MatrixUser) -> String {
        format!("{}/matrix/{}/", self.public_url, user.token)
    }

    /// Message sent to a user in their DM
    pub fn greeting(&self, user: &MatrixUser) -> String {
        match &user.account_email {
            None => format!(
                "Ciao! Per accedere allo spazio di studenti@UniMoRe collega il tuo account Matrix \
                 al tuo account istituzionale qui: {}",
                self.profile_url(user)
            ),
            Some(email) => format!(
                "Ciao! Il tuo account Matrix è già collegato a {}. Puoi controllarlo qui: {}",
                email,
                self.profile_url(user)
            ),
        }
    }

    /// Create the user record if needed and send them their link
    pub async fn greet(&self, client: &ExtendedClient, user_id: &str) -> Result<()> {
        let user = self.store.get_or_create_matrix_user(user_id).await?;
        let room_id = client.pm_slide(user_id).await?;
        client.send_text(&room_id, &self.greeting(&user)).await?;
        info!("Sent link to {} in {}", user_id, room_id);
        Ok(())
    }

    /// Whether a join into `room_id` should be greeted
    async fn watches(&self, client: &ExtendedClient, room_id: &str, user_id: &str) -> bool {
        match &self.welcome_room_id {
            Some(welcome) => welcome == room_id,
            // without a welcome room, every room except DMs with that user
            None => !client
                .room(room_id)
                .await
                .map(|room| room.is_pm_with(user_id))
                .unwrap_or(false),
        }
    }
}

/// A member event that is a fresh join of somebody other than `own_id`
fn joined_user<'a>(event: &'a RawEvent, own_id: &str) -> Option<&'a str> {
    let user_id = event.state_key.as_deref()?;
    if user_id == own_id || event.membership() != Some("join") {
        return None;
    }
    // profile changes are also join -> join
    if event.prev_membership() == Some("join") {
        return None;
    }
    Some(user_id)
}

#[async_trait]
impl SyncHandler for LokiBot {
    async fn on_sync(&self, client: &ExtendedClient, response: &SyncResponse, initial: bool) -> Result<()> {
        for room_id in response.rooms.invite.keys() {
            if let Err(e) = client.join(room_id).await {
                warn!("Could not join {}: {}", room_id, e);
            }
        }

        if initial {
            debug!("Skipping events of the initial sync");
            return Ok(());
        }

        for (room_id, room) in &response.rooms.join {
            for event in &room.timeline.events {
                let Some(user_id) = joined_user(event, client.user_id()) else {
                    continue;
                };
                if !self.watches(client, room_id, user_id).await {
                    continue;
                }
                debug!("{} joined {}", user_id, room_id);
                if let Err(e) = self.greet(client, user_id).await {
                    warn!("Could not greet {}: {}", user_id, e);
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::MemoryStore;

    fn member(user: &str, membership: &str, prev: Option<&str>) -> RawEvent {
        serde_json::from_value(serde_json::json!({
            "type": "m.room.member",
            "state_key": user,
            "sender": user,
            "content": {"membership": membership},
            "unsigned": prev.map(|p| serde_json::json!({"prev_content": {"membership": p}}))
                .unwrap_or(serde_json::json!({})),
        }))
        .unwrap()
    }

    #[test]
    fn test_joined_user_filters() {
        let own = "@loki:example.org";
        assert_eq!(
            joined_user(&member("@alice:example.org", "join", None), own),
            Some("@alice:example.org")
        );
        assert_eq!(
            joined_user(&member("@alice:example.org", "join", Some("invite")), own),
            Some("@alice:example.org")
        );
        assert_eq!(joined_user(&member("@alice:example.org", "join", Some("join")), own), None);
        assert_eq!(joined_user(&member("@alice:example.org", "leave", None), own), None);
        assert_eq!(joined_user(&member(own, "join", None), own), None);
    }

    #[test]
    fn test_greeting_depends_on_link() {
        let bot = LokiBot::new(Arc::new(MemoryStore::new()), "https://loki.example.org/", None);
        let mut user = MatrixUser::new("@alice:example.org");

        let greeting = bot.greeting(&user);
        assert!(greeting.contains(&format!("https://loki.example.org/matrix/{}/", user.token)));
        assert!(!greeting.contains("già collegato"));

        user.account_email = Some("1@studenti.unimore.it".to_string());
        assert!(bot.greeting(&user).contains("già collegato a 1@studenti.unimore.it"));
    }
}

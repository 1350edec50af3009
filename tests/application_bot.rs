//! Bot and space access against an in-process homeserver

mod fixtures;

use std::sync::Arc;

use serde_json::{json, Value};

use fixtures::{direct_tag_event, joined_room, member_event, FakeHomeserver, BOT_ID};
use lokiunimore::application::{LokiBot, SpaceAccess};
use lokiunimore::core::store::{MemoryStore, Store};
use lokiunimore::domain::Account;
use lokiunimore::infrastructure::matrix::{SyncHandler, SyncResponse};

const WELCOME: &str = "!welcome:example.org";

fn sync_response(next_batch: &str, join: Value, invite: Value) -> SyncResponse {
    serde_json::from_value(json!({
        "next_batch": next_batch,
        "rooms": { "join": join, "invite": invite },
    }))
    .unwrap()
}

fn welcome_join(user_id: &str) -> Value {
    json!({ WELCOME: joined_room(vec![], vec![member_event(user_id, "join")], vec![]) })
}

#[tokio::test]
async fn test_bot_greets_new_member_with_link() {
    let hs = FakeHomeserver::start().await;
    let dir = tempfile::tempdir().unwrap();
    let client = hs.logged_in_client(dir.path()).await;
    let store = Arc::new(MemoryStore::new());
    let bot = LokiBot::new(store.clone(), "https://loki.example.org", Some(WELCOME.to_string()));

    let response = sync_response("s2", welcome_join("@alice:example.org"), json!({}));
    bot.on_sync(&client, &response, false).await.unwrap();

    let user = store.get_matrix_user("@alice:example.org").await.unwrap().unwrap();
    assert!(!user.is_linked());

    let messages = hs.state.messages.lock().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].0, "!created1:example.org");
    assert!(messages[0]
        .1
        .contains(&format!("https://loki.example.org/matrix/{}/", user.token)));

    let created = hs.state.created.lock().unwrap();
    assert_eq!(created[0]["invite"], json!(["@alice:example.org"]));
}

#[tokio::test]
async fn test_bot_keeps_token_across_greetings() {
    let hs = FakeHomeserver::start().await;
    let dir = tempfile::tempdir().unwrap();
    let client = hs.logged_in_client(dir.path()).await;
    let store = Arc::new(MemoryStore::new());
    let bot = LokiBot::new(store.clone(), "https://loki.example.org", Some(WELCOME.to_string()));

    bot.greet(&client, "@alice:example.org").await.unwrap();
    let user = store.get_matrix_user("@alice:example.org").await.unwrap().unwrap();
    store
        .merge_account(&Account::new("1@studenti.unimore.it", None, None))
        .await
        .unwrap();
    store
        .link_matrix_user(&user.token, "1@studenti.unimore.it")
        .await
        .unwrap();
    bot.greet(&client, "@alice:example.org").await.unwrap();

    // one DM, two messages, same token
    assert_eq!(hs.state.created.lock().unwrap().len(), 1);
    let messages = hs.state.messages.lock().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].0, messages[1].0);
    assert!(messages[1].1.contains("già collegato a 1@studenti.unimore.it"));
    assert!(messages[1].1.contains(&user.token));
}

#[tokio::test]
async fn test_bot_ignores_initial_sync_but_joins_invites() {
    let hs = FakeHomeserver::start().await;
    let dir = tempfile::tempdir().unwrap();
    let client = hs.logged_in_client(dir.path()).await;
    let store = Arc::new(MemoryStore::new());
    let bot = LokiBot::new(store.clone(), "https://loki.example.org", Some(WELCOME.to_string()));

    let response = sync_response(
        "s1",
        welcome_join("@alice:example.org"),
        json!({ "!invited:example.org": {} }),
    );
    bot.on_sync(&client, &response, true).await.unwrap();

    assert_eq!(
        *hs.state.joined.lock().unwrap(),
        vec!["!invited:example.org".to_string()]
    );
    assert!(hs.state.messages.lock().unwrap().is_empty());
    assert!(store.get_matrix_user("@alice:example.org").await.unwrap().is_none());
}

#[tokio::test]
async fn test_bot_ignores_other_rooms_and_itself() {
    let hs = FakeHomeserver::start().await;
    let dir = tempfile::tempdir().unwrap();
    let client = hs.logged_in_client(dir.path()).await;
    let bot = LokiBot::new(
        Arc::new(MemoryStore::new()),
        "https://loki.example.org",
        Some(WELCOME.to_string()),
    );

    let join = json!({
        "!elsewhere:example.org": joined_room(vec![], vec![member_event("@bob:example.org", "join")], vec![]),
        WELCOME: joined_room(vec![], vec![member_event(BOT_ID, "join")], vec![]),
    });
    bot.on_sync(&client, &sync_response("s2", join, json!({})), false)
        .await
        .unwrap();

    assert!(hs.state.messages.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_bot_without_welcome_room_skips_dm_joins() {
    let hs = FakeHomeserver::start().await;
    let dir = tempfile::tempdir().unwrap();
    let client = hs.logged_in_client(dir.path()).await;
    let bot = LokiBot::new(Arc::new(MemoryStore::new()), "https://loki.example.org", None);

    // alice accepting the DM the bot opened must not trigger another greeting
    let dm = json!({
        "!dm:example.org": joined_room(
            vec![member_event(BOT_ID, "join")],
            vec![member_event("@alice:example.org", "join")],
            vec![direct_tag_event()],
        ),
    });
    hs.state.queue_sync(json!({"next_batch": "s2", "rooms": {"join": dm}}));
    let response = client.sync_once(Some("s1")).await.unwrap();
    bot.on_sync(&client, &response, false).await.unwrap();
    assert!(hs.state.messages.lock().unwrap().is_empty());

    let lobby = json!({
        "!lobby:example.org": joined_room(vec![], vec![member_event("@bob:example.org", "join")], vec![]),
    });
    bot.on_sync(&client, &sync_response("s3", lobby, json!({})), false)
        .await
        .unwrap();
    assert_eq!(hs.state.messages.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_space_grant_invites_space_and_children() {
    let hs = FakeHomeserver::start().await;
    hs.state.set_hierarchy_page(
        "",
        json!({
            "rooms": [
                {"room_id": "!space:example.org", "room_type": "m.space"},
                {"room_id": "!general:example.org"},
                {"room_id": "!closed:example.org"},
            ],
        }),
    );
    hs.state.forbid_invites_to("!closed:example.org");
    let dir = tempfile::tempdir().unwrap();
    let client = Arc::new(hs.logged_in_client(dir.path()).await);
    let space = SpaceAccess::new(client, "!space:example.org", 1);

    let invited = space.grant("@alice:example.org").await.unwrap();

    assert_eq!(invited, vec!["!space:example.org", "!general:example.org"]);
    assert_eq!(hs.state.invites.lock().unwrap().len(), 2);
    let queries = hs.state.hierarchy_queries.lock().unwrap();
    assert_eq!(queries[0].get("suggested_only").map(String::as_str), Some("true"));
}

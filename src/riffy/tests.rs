use std::time::Duration;

use serde_json::json;

use super::*;
use crate::testing::{CLIENT_ID, Harness, MockTransport, event_names};

fn stats(players: u64, system_load: f64) -> String {
    json!({
        "op": "stats",
        "players": players,
        "playingPlayers": players,
        "uptime": 1,
        "cpu": { "cores": 4, "systemLoad": system_load, "lavalinkLoad": 0.0 }
    })
    .to_string()
}

#[tokio::test]
async fn nothing_works_before_init() {
    let (riffy, _events) = Riffy::builder(Config::default(), |_: &GuildId, _: Value| {})
        .transport_factory(|_: &NodeConfig| {
            Ok(Arc::new(MockTransport::default()) as Arc<dyn RestTransport>)
        })
        .build();

    assert!(matches!(
        riffy.create_connection(ConnectionOptions::new("1", "2")),
        Err(RiffyError::NotInitialized)
    ));
    assert!(matches!(
        riffy.resolve(ResolveOptions::new("x")).await,
        Err(RiffyError::NotInitialized)
    ));
    assert!(matches!(
        riffy
            .update_voice_state(&json!({
                "t": "VOICE_STATE_UPDATE",
                "d": { "guild_id": "1", "user_id": "1", "channel_id": "2" }
            }))
            .await,
        Ok(())
    ));
}

#[tokio::test]
async fn init_is_idempotent() {
    let h = Harness::with_nodes(&["a"]).await;
    h.riffy.init(99u64).await.unwrap();
    assert_eq!(h.riffy.client_id(), Some(UserId(CLIENT_ID)));
    assert_eq!(h.riffy.nodes().len(), 1);
}

#[tokio::test]
async fn duplicate_node_names_are_rejected() {
    let h = Harness::with_nodes(&["a"]).await;
    let err = h
        .riffy
        .register_node(NodeConfig::new("other-host", 2333, "pw").with_name("a"))
        .unwrap_err();
    assert!(matches!(err, RiffyError::Config(_)));
}

#[tokio::test]
async fn no_connected_node_means_no_player() {
    let h = Harness::with_nodes(&["a"]).await;
    let node = h.riffy.node("a").unwrap();
    node.handle_close(1000, "maintenance").await;

    assert!(matches!(
        h.riffy.create_connection(ConnectionOptions::new("1", "2")),
        Err(RiffyError::NoNodesAvailable)
    ));
    node.destroy(true).await;
}

#[tokio::test]
async fn region_hint_wins_over_call_count() {
    let mut h = Harness::with_nodes(&["a", "b"]).await;
    for _ in 0..3 {
        let _ = h.riffy.node("b").unwrap().rest().info().await;
    }

    let regional = h
        .riffy
        .create_connection(ConnectionOptions::new("1", "10").region("b"))
        .unwrap();
    assert_eq!(regional.node().name(), "b");

    let least_used = h
        .riffy
        .create_connection(ConnectionOptions::new("2", "10").region("nowhere"))
        .unwrap();
    assert_eq!(least_used.node().name(), "a");

    let again = h
        .riffy
        .create_connection(ConnectionOptions::new("1", "99"))
        .unwrap();
    assert!(Arc::ptr_eq(&again, &regional));

    let names = event_names(&h.drain());
    assert_eq!(names, vec!["playerCreate", "playerCreate"]);
}

#[tokio::test]
async fn create_connection_joins_voice() {
    let h = Harness::with_nodes(&["a"]).await;
    h.riffy
        .create_connection(ConnectionOptions::new("7", "70").mute(true))
        .unwrap();

    let sent = h.gateway.lock().clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, GuildId::from("7"));
    assert_eq!(
        sent[0].1,
        json!({
            "op": 4,
            "d": { "guild_id": "7", "channel_id": "70", "self_mute": true, "self_deaf": true }
        })
    );
}

#[tokio::test]
async fn best_nodes_sort_by_penalty() {
    let h = Harness::with_nodes(&["a", "b", "c"]).await;
    h.riffy.node("a").unwrap().handle_message(&stats(40, 0.5)).await;
    h.riffy.node("b").unwrap().handle_message(&stats(1, 0.0)).await;
    h.riffy.node("c").unwrap().handle_message(&stats(5, 0.25)).await;

    let order: Vec<String> = h.riffy.best_nodes().iter().map(|n| n.name().to_string()).collect();
    assert_eq!(order, vec!["b", "c", "a"]);
}

#[tokio::test]
async fn foreign_voice_states_are_ignored() {
    let h = Harness::with_nodes(&["a"]).await;
    let player = h
        .riffy
        .create_connection(ConnectionOptions::new("1", "100"))
        .unwrap();

    h.riffy
        .update_voice_state(&json!({
            "t": "VOICE_STATE_UPDATE",
            "d": { "guild_id": "1", "user_id": "555", "session_id": "theirs", "channel_id": null }
        }))
        .await
        .unwrap();
    h.riffy
        .update_voice_state(&json!({ "t": "MESSAGE_CREATE", "d": { "guild_id": "1" } }))
        .await
        .unwrap();

    assert!(h.riffy.player(player.guild_id()).is_some());
    assert!(player.voice().session_id.is_none());
}

#[tokio::test]
async fn node_frames_reach_the_player() {
    let mut h = Harness::with_nodes(&["a"]).await;
    let player = h.connected_player("1", "a").await;
    h.drain();

    let node = h.riffy.node("a").unwrap();
    node.handle_message(
        &json!({
            "op": "playerUpdate",
            "guildId": "1",
            "state": { "time": 1, "position": 42, "connected": true, "ping": 3 }
        })
        .to_string(),
    )
    .await;
    node.handle_message(r#"{"op":"playerUpdate","guildId":"404","state":{"position":1}}"#)
        .await;

    assert_eq!(player.position(), 42);
    assert_eq!(event_names(&h.drain()), vec!["playerUpdate"]);
}

#[tokio::test]
async fn stale_player_is_not_unregistered() {
    let h = Harness::with_nodes(&["a"]).await;
    let first = h.connected_player("1", "a").await;
    first.destroy(false).await;
    let second = h.connected_player("1", "a").await;

    first.destroy(false).await;
    assert!(Arc::ptr_eq(&h.riffy.get(first.guild_id()).unwrap(), &second));
}

#[tokio::test]
async fn node_migration_counts_failures_without_aborting() {
    let mut h = Harness::with_nodes(&["a", "b"]).await;
    let players = [
        h.connected_player("1", "a").await,
        h.connected_player("2", "a").await,
        h.connected_player("3", "a").await,
    ];
    h.mock("b").fail_on("/v4/sessions/session-b/players/2");
    h.drain();

    let source = h.riffy.node("a").unwrap();
    let moved = h.riffy.migrate_node(&source).await.unwrap();

    let mut moved_ids: Vec<String> = moved.iter().map(|p| p.guild_id().to_string()).collect();
    moved_ids.sort();
    assert_eq!(moved_ids, vec!["1", "3"]);

    let events = h.drain();
    let names = event_names(&events);
    assert_eq!(names.iter().filter(|n| **n == "playerMigrated").count(), 2);
    assert_eq!(names.iter().filter(|n| **n == "playerMigrationFailed").count(), 1);
    assert!(!names.contains(&"nodeMigrated"));
    match events.last() {
        Some(RiffyEvent::NodeMigrationFailed { node, failed, migrated }) => {
            assert_eq!(node, "a");
            assert_eq!(*failed, 1);
            assert_eq!(migrated.len(), 2);
        }
        other => panic!("expected nodeMigrationFailed, got {other:?}"),
    }

    // even the failed player was rebound
    assert!(players.iter().all(|p| p.node().name() == "b"));
    assert!(players.iter().all(|p| !p.is_migrating()));
}

#[tokio::test]
async fn empty_node_migrates_silently() {
    let mut h = Harness::with_nodes(&["a", "b"]).await;
    let source = h.riffy.node("a").unwrap();
    assert!(h.riffy.migrate_node(&source).await.unwrap().is_empty());
    assert!(event_names(&h.drain()).is_empty());
}

#[tokio::test]
async fn default_strategy_picks_lowest_penalty() {
    let mut h = Harness::with_nodes(&["a", "b", "c"]).await;
    h.riffy.node("b").unwrap().handle_message(&stats(50, 0.9)).await;
    h.riffy.node("c").unwrap().handle_message(&stats(2, 0.1)).await;
    let player = h.connected_player("1", "a").await;
    h.drain();

    let moved = h
        .riffy
        .migrate(MigrationTarget::Player(player.clone()), None)
        .await
        .unwrap();
    assert_eq!(moved.len(), 1);
    assert_eq!(player.node().name(), "c");

    match h.drain().into_iter().find(|e| e.name() == "playerMigrated") {
        Some(RiffyEvent::PlayerMigrated { old_node, new_node, .. }) => {
            assert_eq!(old_node, "a");
            assert_eq!(new_node, "c");
        }
        other => panic!("expected playerMigrated, got {other:?}"),
    }
}

#[tokio::test]
async fn disconnect_triggers_migration_when_enabled() {
    let mut config = Config::default();
    config.client.migrate_on_disconnect = true;
    let mut h = Harness::with_config(config, &["a", "b"]).await;
    let player = h.connected_player("1", "a").await;
    h.drain();

    let node = h.riffy.node("a").unwrap();
    node.handle_close(1006, "gone").await;
    for _ in 0..50 {
        if player.node().name() == "b" {
            break;
        }
        tokio::task::yield_now().await;
    }

    assert_eq!(player.node().name(), "b");
    node.destroy(true).await;
    let names = event_names(&h.drain());
    assert!(names.contains(&"playerMigrated"));
}

#[tokio::test]
async fn overlapping_node_drains_report_once() {
    let mut h = Harness::with_nodes(&["a", "b"]).await;
    let player = h.connected_player("1", "a").await;
    h.mock("a").set_delay(Duration::from_millis(20));
    h.drain();

    let source = h.riffy.node("a").unwrap();
    let (first, second) = tokio::join!(
        h.riffy.migrate_node(&source),
        h.riffy.migrate_node(&source)
    );
    assert_eq!(first.unwrap().len(), 1);
    assert!(second.unwrap().is_empty());
    assert_eq!(player.node().name(), "b");

    let names = event_names(&h.drain());
    assert_eq!(names.iter().filter(|n| **n == "playerMigrated").count(), 1);
    assert_eq!(names.iter().filter(|n| **n == "nodeMigrated").count(), 1);
    assert!(!names.contains(&"playerMigrationFailed"));
    assert!(!names.contains(&"nodeMigrationFailed"));
}

#[tokio::test]
async fn node_drain_skips_a_player_that_already_moved() {
    let mut h = Harness::with_nodes(&["a", "b"]).await;
    let player = h.connected_player("1", "a").await;
    h.mock("a").set_delay(Duration::from_millis(20));
    h.drain();

    let source = h.riffy.node("a").unwrap();
    let target = h.riffy.node("b").unwrap();
    let (single, batch) = tokio::join!(
        h.riffy.migrate_player(&player, Some(target)),
        h.riffy.migrate_node(&source)
    );
    assert_eq!(single.unwrap().name(), "b");
    assert!(batch.unwrap().is_empty());

    let names = event_names(&h.drain());
    assert_eq!(names, vec!["playerMigrated"]);
}

#[tokio::test]
async fn failure_then_close_migrates_without_failures() {
    let mut config = Config::default();
    config.client.migrate_on_failure = true;
    config.client.migrate_on_disconnect = true;
    let mut h = Harness::with_config(config, &["a", "b"]).await;
    let player = h.connected_player("1", "a").await;
    h.mock("b").set_delay(Duration::from_millis(20));
    h.drain();

    let node = h.riffy.node("a").unwrap();
    node.handle_error(RiffyError::Config("socket reset".into())).await;
    node.handle_close(1006, "gone").await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(player.node().name(), "b");
    node.destroy(true).await;
    let names = event_names(&h.drain());
    assert_eq!(names.iter().filter(|n| **n == "playerMigrated").count(), 1);
    assert!(!names.contains(&"playerMigrationFailed"));
    assert!(!names.contains(&"nodeMigrationFailed"));
}

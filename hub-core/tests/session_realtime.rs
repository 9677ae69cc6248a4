//! Session coupling, realtime refresh and the settings draft

use hub_core::config::Config;
use hub_core::core_hub::memory::Operation;
use hub_core::core_hub::{
    HubRole, InviteRequest, LocalCache, SettingsPatch, Theme, Timestamp,
};
use hub_core::test_utils::*;
use std::sync::Arc;
use std::time::Duration;

fn realtime_world() -> HubWorld {
    let mut config = Config::default();
    config.realtime.coalesce_window = Duration::from_millis(10);
    HubWorld::with_config(config)
}

#[tokio::test]
async fn test_members_refresh_after_remote_accept() {
    let world = realtime_world();
    let (owner, hub) = world.owner_with_hub("o@example.com", "Home").await;
    let member = world.user("m@example.com").await;
    let bridge = owner.context.realtime();
    let directory = owner.directory();
    let hub_id = &hub.id;

    wait_until(Duration::from_secs(2), move || async move {
        bridge.is_subscribed(hub_id).await
    })
    .await
    .expect("owner follows the current hub");

    world.join(&owner, &member, &hub.id, HubRole::Member).await;

    wait_until(Duration::from_secs(2), move || async move {
        directory.state().await.hub_members.len() == 2
    })
    .await
    .expect("owner sees the new member without reloading");
    assert!(owner.directory().state().await.pending_invites.is_empty());
    assert!(owner.context.realtime().reload_count() >= 1);
}

#[tokio::test]
async fn test_realtime_follows_hub_switches() {
    let world = realtime_world();
    let (owner, first) = world.owner_with_hub("o@example.com", "First").await;
    let second = owner
        .directory()
        .create_hub(hub_core::core_hub::NewHub::named("Second"))
        .await
        .unwrap();

    let bridge = owner.context.realtime();
    let (first_id, second_id) = (&first.id, &second.id);

    wait_until(Duration::from_secs(2), move || async move {
        bridge.active_subscriptions().await == [second_id.clone()]
    })
    .await
    .expect("subscription moves to the new hub");

    owner.directory().switch_hub(&first.id).await.unwrap();
    wait_until(Duration::from_secs(2), move || async move {
        bridge.active_subscriptions().await == [first_id.clone()]
    })
    .await
    .expect("subscription follows the switch");
}

#[tokio::test]
async fn test_sign_out_tears_everything_down() {
    let world = realtime_world();
    let (owner, hub) = world.owner_with_hub("o@example.com", "Home").await;
    owner
        .directory()
        .invite_member(&hub.id, InviteRequest::new("m@example.com", HubRole::Member))
        .await
        .unwrap();
    let bridge = owner.context.realtime();
    let hub_id = &hub.id;
    wait_until(Duration::from_secs(2), move || async move {
        bridge.is_subscribed(hub_id).await
    })
    .await
    .unwrap();

    owner.context.sign_out().await.unwrap();

    let state = owner.directory().state().await;
    assert!(state.user_hubs.is_empty());
    assert!(state.hub_members.is_empty());
    assert!(state.pending_invites.is_empty());
    assert!(state.current_hub.is_none());
    assert!(owner
        .cache
        .get(&world.config.session.current_hub_key)
        .is_none());
    assert!(owner.context.realtime().active_subscriptions().await.is_empty());
    assert!(!owner.context.settings().state().await.is_loaded);
    let backend = &world.backend;
    wait_until(Duration::from_secs(2), move || async move {
        backend.subscriber_count().await == 0
    })
    .await
    .expect("change feeds closed");
}

#[tokio::test]
async fn test_sign_out_discards_reload_in_flight() {
    let world = HubWorld::new();
    let (other, other_hub) = world.owner_with_hub("x@example.com", "Other").await;
    let (owner, hub) = world.owner_with_hub("o@example.com", "Home").await;
    world
        .backend
        .seed_invitation(
            &other_hub.id,
            "o@example.com",
            HubRole::Member,
            &other.identity.id,
            Timestamp::now().after(Duration::from_secs(3600)),
        )
        .await;
    world.backend.delay_hub(&hub.id, Duration::from_millis(200)).await;

    let directory = Arc::clone(owner.directory());
    let reload = tokio::spawn(async move { directory.reload().await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(owner.directory().state().await.is_loading);

    owner.context.sign_out().await.unwrap();
    // Finishing after sign-out may succeed or fail; either way nothing lands
    let _ = reload.await.unwrap();

    let state = owner.directory().state().await;
    assert!(state.user_id.is_none());
    assert!(state.user_hubs.is_empty());
    assert!(state.hub_roles.is_empty());
    assert!(state.user_invitations.is_empty());
    assert!(state.current_hub.is_none());
    assert!(state.error.is_none());
    assert!(!state.is_loading);
    assert!(owner.directory().subscribe_current_hub().borrow().is_none());
    assert!(owner
        .cache
        .get(&world.config.session.current_hub_key)
        .is_none());
}

#[tokio::test]
async fn test_settings_commit_and_revert() -> anyhow::Result<()> {
    let world = HubWorld::new();
    let user = world.user("u@example.com").await;
    let settings = user.context.settings();

    settings
        .stage(SettingsPatch {
            theme: Some(Theme::Dark),
            ..SettingsPatch::default()
        })
        .await;
    assert!(settings.state().await.has_unsaved_changes);

    let saved = settings.commit().await?;
    assert_eq!(saved.theme, Theme::Dark);
    let state = settings.state().await;
    assert!(!state.has_unsaved_changes);
    assert_eq!(state.confirmed.theme, Theme::Dark);

    settings
        .stage(SettingsPatch {
            language: Some("de".to_string()),
            ..SettingsPatch::default()
        })
        .await;
    world.backend.fail_next(Operation::SaveSettings).await;
    assert!(settings.commit().await.is_err());

    let state = settings.state().await;
    assert_eq!(state.draft, state.confirmed);
    assert_eq!(state.confirmed.language, "en");
    assert!(state.error.is_some());
    assert!(!state.is_saving);

    let restarted = user.restart(&world).await;
    assert_eq!(
        restarted.context.settings().state().await.confirmed.theme,
        Theme::Dark
    );
    Ok(())
}

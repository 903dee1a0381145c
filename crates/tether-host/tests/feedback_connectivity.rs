mod helpers;

use std::sync::Arc;
use std::time::Duration;

use helpers::fixtures;
use helpers::{builder, eventually, start, test_config};
use tether_host::{Dispatched, ManualConnectivity, Store, ToastView, connectivity_banner};
use tether_kernel::QueueStatus;
use tether_kernel::feedback::{self, FeedbackState, Level, Notice};

fn notices(store: &Store) -> Vec<Notice> {
    store
        .slice::<FeedbackState>(feedback::SLICE)
        .unwrap()
        .unwrap_or_default()
        .notices
}

fn messages(store: &Store) -> Vec<String> {
    notices(store).into_iter().map(|n| n.message).collect()
}

#[tokio::test(start_paused = true)]
async fn notices_expire_after_their_lifetime() {
    let app = start(builder(test_config())).await;

    app.store
        .dispatch(feedback::notify_for(Level::Info, "short", Some(1_000)));
    app.store
        .dispatch(feedback::notify_for(Level::Info, "long", Some(5_000)));
    assert_eq!(messages(&app.store), vec!["short", "long"]);

    tokio::time::sleep(Duration::from_millis(1_500)).await;
    assert_eq!(messages(&app.store), vec!["long"]);

    tokio::time::sleep(Duration::from_millis(4_000)).await;
    assert!(notices(&app.store).is_empty());
}

#[tokio::test(start_paused = true)]
async fn default_lifetime_applies_when_none_is_given() {
    let mut config = test_config();
    config.feedback.default_ttl = Some(Duration::from_millis(2_000));
    let app = start(builder(config)).await;

    app.store.dispatch(feedback::notify(Level::Warning, "heads up"));
    let notice = notices(&app.store).remove(0);
    assert!(notice.expires_at.is_some());

    tokio::time::sleep(Duration::from_millis(2_500)).await;
    assert!(notices(&app.store).is_empty());
}

#[tokio::test]
async fn dismiss_removes_a_notice() {
    let mut config = test_config();
    config.feedback.default_ttl = None;
    let app = start(builder(config)).await;
    let toasts = ToastView::new(&app.store);

    toasts.notify(Level::Error, "failed");
    toasts.notify(Level::Success, "saved");
    assert_eq!(toasts.lines(), vec!["[error] failed", "[success] saved"]);

    let first = toasts.notices()[0].id;
    toasts.dismiss(first);

    assert_eq!(messages(&app.store), vec!["saved"]);
}

#[tokio::test]
async fn oldest_notices_are_dropped_beyond_the_limit() {
    let mut config = test_config();
    config.feedback.default_ttl = None;
    config.feedback.max_notices = 2;
    let app = start(builder(config)).await;

    for message in ["one", "two", "three"] {
        app.store.dispatch(feedback::notify(Level::Info, message));
    }

    assert_eq!(messages(&app.store), vec!["two", "three"]);
    let ids: Vec<u64> = notices(&app.store).iter().map(|n| n.id).collect();
    assert!(ids[0] < ids[1]);
}

#[tokio::test]
async fn connectivity_binding_forwards_changes() {
    let connectivity = ManualConnectivity::new(true);
    let app = start(builder(test_config()).connectivity(Arc::new(connectivity.clone()))).await;
    assert_eq!(app.store.offline_queue().status, QueueStatus::Online);
    assert_eq!(connectivity_banner(&app.store), None);

    connectivity.set_online(false);
    eventually(|| app.store.offline_queue().status == QueueStatus::Offline).await;
    assert_eq!(connectivity_banner(&app.store).as_deref(), Some("Offline"));

    let queued = app.store.dispatch(fixtures::add_todo("later"));
    assert!(matches!(queued, Dispatched::Queued { .. }));
    assert_eq!(
        connectivity_banner(&app.store).as_deref(),
        Some("Offline, 1 change(s) waiting")
    );

    connectivity.set_online(true);
    eventually(|| {
        let queue = app.store.offline_queue();
        queue.is_empty() && queue.status == QueueStatus::Online
    })
    .await;
    assert_eq!(connectivity_banner(&app.store), None);
}

#[tokio::test]
async fn dropping_the_app_stops_connectivity_forwarding() {
    let connectivity = ManualConnectivity::new(true);
    let app = start(builder(test_config()).connectivity(Arc::new(connectivity.clone()))).await;
    let store = app.store.clone();

    drop(app);
    connectivity.set_online(false);
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(store.offline_queue().status, QueueStatus::Online);
}

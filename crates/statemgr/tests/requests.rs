//! Request admission: target validation, shutdown drains, and the
//! interaction between in-flight requests and transitions.

mod common;

use std::time::Duration;

use tabletd_statemgr::{RequestContext, ServingState, StateManagerConfig};
use tabletd_topology::{TabletType, Target};

use common::{test_now, test_tablet, test_tablet_with_config};

#[tokio::test]
async fn test_rejects_when_not_serving() {
    let t = test_tablet();
    let ctx = RequestContext::external();
    let target = Target::new("", "", TabletType::Unknown);

    let err = t
        .sm
        .start_request(&ctx, Some(&target), false)
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "operation not allowed in state NOT_SERVING"
    );
}

#[tokio::test]
async fn test_rejects_when_replication_unhealthy() {
    let t = test_tablet();
    t.repl_tracker.set_lag(Duration::from_secs(3 * 60 * 60));

    t.sm
        .set_serving_type(TabletType::Replica, test_now(), ServingState::Serving, "")
        .await
        .unwrap();

    let ctx = RequestContext::external();
    let target = Target::new("", "", TabletType::Replica);
    let err = t
        .sm
        .start_request(&ctx, Some(&target), false)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("operation not allowed"));

    t.sm.stop_service().await;
}

#[tokio::test]
async fn test_target_validation() {
    let t = test_tablet();
    t.sm
        .set_serving_type(TabletType::Primary, test_now(), ServingState::Serving, "")
        .await
        .unwrap();
    let ctx = RequestContext::external();

    let mut target = Target::new("a", "", TabletType::Primary);
    let err = t
        .sm
        .start_request(&ctx, Some(&target), false)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("invalid keyspace"));
    let err = t.sm.verify_target(&ctx, Some(&target)).await.unwrap_err();
    assert!(err.to_string().contains("invalid keyspace"));

    target.keyspace = String::new();
    target.shard = "a".into();
    let err = t
        .sm
        .start_request(&ctx, Some(&target), false)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("invalid shard"));
    let err = t.sm.verify_target(&ctx, Some(&target)).await.unwrap_err();
    assert!(err.to_string().contains("invalid shard"));

    target.shard = String::new();
    target.tablet_type = TabletType::Replica;
    let err = t
        .sm
        .start_request(&ctx, Some(&target), false)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("invalid tablet type"));
    let err = t.sm.verify_target(&ctx, Some(&target)).await.unwrap_err();
    assert!(err.to_string().contains("invalid tablet type"));

    let err = t.sm.start_request(&ctx, None, false).await.unwrap_err();
    assert!(err.to_string().contains("No target"));
    let err = t.sm.verify_target(&ctx, None).await.unwrap_err();
    assert!(err.to_string().contains("No target"));

    let local = RequestContext::local();
    t.sm.start_request(&local, None, false).await.unwrap();
    t.sm.end_request();
    t.sm.verify_target(&local, None).await.unwrap();

    let matching = Target::new("", "", TabletType::Primary);
    t.sm.start_request(&ctx, Some(&matching), false).await.unwrap();
    t.sm.end_request();

    t.sm.stop_service().await;
}

#[tokio::test]
async fn test_grace_window_admits_previous_type() {
    let t = test_tablet_with_config(StateManagerConfig {
        transition_grace_period: Duration::from_secs(10),
        ..StateManagerConfig::default()
    });
    let ctx = RequestContext::external();

    t.sm
        .set_serving_type(TabletType::Replica, test_now(), ServingState::Serving, "")
        .await
        .unwrap();
    t.sm
        .set_serving_type(TabletType::Primary, test_now(), ServingState::Serving, "")
        .await
        .unwrap();

    // A request still addressed at the old type is admitted during the
    // grace window.
    let old_type = Target::new("", "", TabletType::Replica);
    t.sm.start_request(&ctx, Some(&old_type), false).await.unwrap();
    t.sm.end_request();
    t.sm.verify_target(&ctx, Some(&old_type)).await.unwrap();

    let rdonly = Target::new("", "", TabletType::Rdonly);
    let err = t
        .sm
        .start_request(&ctx, Some(&rdonly), false)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("invalid tablet type"));

    t.sm.stop_service().await;
}

#[tokio::test]
async fn test_allow_on_shutdown_admits_during_drain() {
    let t = test_tablet();
    let ctx = RequestContext::external();
    let target = Target::new("", "", TabletType::Primary);

    t.sm
        .set_serving_type(TabletType::Primary, test_now(), ServingState::Serving, "")
        .await
        .unwrap();
    t.sm.start_request(&ctx, Some(&target), false).await.unwrap();

    // Start an unserve; it blocks draining the in-flight request while the
    // tablet is still internally serving.
    let sm = t.sm.clone();
    let unserve = tokio::spawn(async move {
        sm.set_serving_type(TabletType::Primary, test_now(), ServingState::NotServing, "")
            .await
    });
    while !t.sm.is_transitioning() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let err = t
        .sm
        .start_request(&ctx, Some(&target), false)
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "operation not allowed in state SHUTTING_DOWN"
    );

    // Internal drain-time work is still admitted.
    t.sm.start_request(&ctx, Some(&target), true).await.unwrap();
    t.sm.end_request();
    t.sm.end_request();

    unserve.await.unwrap().unwrap();
    assert_eq!(t.sm.state().await, ServingState::NotServing);

    t.sm.stop_service().await;
}

#[tokio::test]
async fn test_stop_service_waits_for_requests() {
    let t = test_tablet_with_config(StateManagerConfig {
        timebomb_duration: Duration::from_secs(10),
        ..StateManagerConfig::default()
    });
    let ctx = RequestContext::external();
    let target = Target::new("", "", TabletType::Primary);

    t.sm
        .set_serving_type(TabletType::Primary, test_now(), ServingState::Serving, "")
        .await
        .unwrap();
    t.sm.start_request(&ctx, Some(&target), false).await.unwrap();

    let sm = t.sm.clone();
    let stop = tokio::spawn(async move {
        sm.stop_service().await;
    });

    while !t.sm.is_transitioning() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(t.sm.is_transitioning(), "must keep draining while a request is in flight");
    assert_eq!(t.sm.state().await, ServingState::Serving);

    t.sm.end_request();
    stop.await.unwrap();

    assert!(!t.sm.is_transitioning());
    assert_eq!(t.sm.target().await.tablet_type, TabletType::Primary);
    assert_eq!(t.sm.state().await, ServingState::NotConnected);
}

#[tokio::test]
async fn test_drain_timeout_proceeds_anyway() {
    let t = test_tablet_with_config(StateManagerConfig {
        timebomb_duration: Duration::from_millis(50),
        ..StateManagerConfig::default()
    });
    let ctx = RequestContext::external();
    let target = Target::new("", "", TabletType::Primary);

    t.sm
        .set_serving_type(TabletType::Primary, test_now(), ServingState::Serving, "")
        .await
        .unwrap();
    t.sm.start_request(&ctx, Some(&target), false).await.unwrap();

    // The request is never ended; the timebomb lets the stop proceed.
    t.sm.stop_service().await;
    assert_eq!(t.sm.state().await, ServingState::NotConnected);
}

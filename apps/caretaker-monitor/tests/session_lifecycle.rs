use caretaker_monitor::capture::Frame;
use caretaker_monitor::transport::mock::ScriptedDialer;
use caretaker_monitor::{ConnectionState, MonitorConfig, MonitoringSession, SessionHandle};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, sleep_until, Instant};

fn start(dialer: &ScriptedDialer) -> SessionHandle {
    let source = || -> Option<Frame> { Some(Frame::jpeg(vec![0xff, 0xd8, 0xff, 0xe0])) };
    MonitoringSession::start(
        &MonitorConfig::default(),
        Box::new(source),
        Arc::new(dialer.clone()),
    )
}

#[test_timeout::tokio_timeout_test(paused)]
async fn sends_never_outpace_the_frame_interval() {
    let started = Instant::now();
    let dialer = ScriptedDialer::auto_open();
    let handle = start(&dialer);
    sleep(Duration::from_millis(1)).await;
    let link = dialer.link(0).expect("dialed on start");

    // Step against absolute deadlines; relative sleeps round up and drift.
    let window = Duration::from_millis(1_000);
    let mut sent_at = Vec::new();
    let mut step = 1;
    while Instant::now() < started + window {
        step += 1;
        sleep_until(started + Duration::from_millis(step)).await;
        let sent = link.sent().len();
        while sent_at.len() < sent {
            sent_at.push(Instant::now());
            link.complete_send();
        }
    }

    let elapsed = Instant::now() - started;
    let period = Duration::from_millis(100);
    let ceiling = elapsed.as_millis().div_ceil(period.as_millis()) as usize;
    assert!(sent_at.len() <= ceiling, "sent {} in {elapsed:?}", sent_at.len());
    assert!(sent_at.len() + 1 >= ceiling, "sent {} in {elapsed:?}", sent_at.len());

    // Every window of length T holds at most ceil(T / period) sends. A send
    // is observed at most one step late, hence the extra millisecond.
    for (i, first) in sent_at.iter().enumerate() {
        for (j, last) in sent_at.iter().enumerate().skip(i + 1) {
            let span = *last - *first + Duration::from_millis(2);
            let allowed = span.as_millis().div_ceil(period.as_millis()) as usize;
            assert!(j - i + 1 <= allowed, "{} sends within {span:?}", j - i + 1);
        }
    }

    let frame: serde_json::Value = serde_json::from_str(&link.sent()[0]).unwrap();
    assert!(frame["image"]
        .as_str()
        .unwrap()
        .starts_with("data:image/jpeg;base64,"));
    assert!(frame["timestamp"].as_i64().unwrap() > 0);

    let report = handle.stop().await.unwrap();
    assert_eq!(report.pacer.sent as usize, sent_at.len());
}

#[test_timeout::tokio_timeout_test(paused)]
async fn busy_link_drops_frames_instead_of_queueing() {
    let dialer = ScriptedDialer::auto_open();
    let handle = start(&dialer);

    sleep(Duration::from_millis(550)).await;
    assert_eq!(dialer.link(0).unwrap().sent().len(), 1);

    let report = handle.stop().await.unwrap();
    assert_eq!(report.pacer.sent, 1);
    assert_eq!(report.pacer.dropped_busy, 4);
}

#[test_timeout::tokio_timeout_test(paused)]
async fn close_triggers_one_reconnect_after_the_delay() {
    let dialer = ScriptedDialer::auto_open();
    let handle = start(&dialer);
    sleep(Duration::from_millis(50)).await;
    assert_eq!(handle.snapshot().connection, ConnectionState::Connected);

    let closed_at = Instant::now();
    dialer.link(0).unwrap().close("server restarted");
    sleep(Duration::from_millis(1)).await;
    assert_eq!(handle.snapshot().connection, ConnectionState::Reconnecting);

    sleep_until(closed_at + Duration::from_millis(2_990)).await;
    assert_eq!(dialer.dial_count(), 1);

    sleep_until(closed_at + Duration::from_millis(3_010)).await;
    assert_eq!(dialer.dial_count(), 2);
    assert_eq!(handle.snapshot().connection, ConnectionState::Connected);

    sleep(Duration::from_secs(10)).await;
    assert_eq!(dialer.dial_count(), 2);

    let report = handle.stop().await.unwrap();
    assert_eq!(report.reconnect_attempts, 1);
}

#[test_timeout::tokio_timeout_test(paused)]
async fn alert_banner_holds_for_its_full_period() {
    let dialer = ScriptedDialer::auto_open();
    let handle = start(&dialer);
    sleep(Duration::from_millis(10)).await;
    let link = dialer.link(0).unwrap();

    let raised_at = Instant::now();
    link.deliver_json(&json!({
        "fall_detection": {"fall_detected": true, "fall_confidence": 0.87, "reasons": ["sudden drop"]}
    }));
    sleep(Duration::from_millis(200)).await;
    link.deliver_json(&json!({
        "fall_detection": {"fall_detected": false, "fall_confidence": 0.1, "reasons": []}
    }));
    sleep(Duration::from_millis(1)).await;

    let snap = handle.snapshot();
    assert!(snap.alert_active);
    assert!(!snap.fall_status.detected);
    assert_eq!(snap.alert_history.len(), 1);

    sleep_until(raised_at + Duration::from_millis(9_900)).await;
    assert!(handle.snapshot().alert_active);

    sleep_until(raised_at + Duration::from_millis(10_010)).await;
    let snap = handle.snapshot();
    assert!(!snap.alert_active);
    assert_eq!(snap.alert_history.len(), 1);

    handle.stop().await.unwrap();
}

#[test_timeout::tokio_timeout_test(paused)]
async fn malformed_reply_leaves_connection_and_facets_alone() {
    let dialer = ScriptedDialer::auto_open();
    let handle = start(&dialer);
    sleep(Duration::from_millis(10)).await;
    let link = dialer.link(0).unwrap();

    link.deliver_json(&json!({"detection_data": {"num_people": 1, "pose_detected": true, "keypoints_detected": 17}}));
    sleep(Duration::from_millis(1)).await;
    let before = handle.snapshot();

    link.deliver("{not json");
    link.deliver_json(&json!({"gait_analysis": {"risk_level": "medium", "instability_score": 0.4}}));
    sleep(Duration::from_millis(1)).await;

    let after = handle.snapshot();
    assert_eq!(after.connection, ConnectionState::Connected);
    assert_eq!(after.detection, before.detection);
    assert_eq!(after.detection.num_people, 1);
    assert_eq!(after.gait.instability_score, 0.4);

    let report = handle.stop().await.unwrap();
    assert_eq!(report.router.rejected, 1);
    assert_eq!(report.router.routed, 2);
}

#[test_timeout::tokio_timeout_test(paused)]
async fn stop_cancels_pending_timers_and_ignores_late_events() {
    let dialer = ScriptedDialer::auto_open();
    let handle = start(&dialer);
    let mut snapshots = handle.subscribe();
    sleep(Duration::from_millis(10)).await;
    let link = dialer.link(0).unwrap();

    link.deliver_json(&json!({"alert": "fall_detected"}));
    sleep(Duration::from_millis(1)).await;
    assert!(handle.snapshot().alert_active);
    link.close("reset");
    sleep(Duration::from_millis(1)).await;
    assert_eq!(handle.snapshot().connection, ConnectionState::Reconnecting);

    let report = handle.stop().await.unwrap();
    let last = snapshots.borrow_and_update().clone();
    assert_eq!(last.connection, ConnectionState::Disconnected);
    assert!(!last.alert_active);
    assert_eq!(report.reconnect_attempts, 0);

    link.deliver_json(&json!({"gait_analysis": {"risk_level": "high"}}));
    sleep(Duration::from_secs(15)).await;
    assert_eq!(dialer.dial_count(), 1);
    assert_eq!(*snapshots.borrow(), last);
}

#[test_timeout::tokio_timeout_test(paused)]
async fn dropping_the_handle_releases_the_link() {
    let dialer = ScriptedDialer::auto_open();
    let handle = start(&dialer);
    sleep(Duration::from_millis(10)).await;
    let link = dialer.link(0).unwrap();
    assert!(!link.is_released());

    drop(handle);
    sleep(Duration::from_millis(1)).await;
    assert!(link.is_released());
}

#[test_timeout::tokio_timeout_test(paused)]
async fn each_session_starts_from_empty_state() {
    let dialer = ScriptedDialer::auto_open();
    let first = start(&dialer);
    sleep(Duration::from_millis(10)).await;
    dialer
        .link(0)
        .unwrap()
        .deliver_json(&json!({"fall_detected": true, "confidence": 0.9}));
    sleep(Duration::from_millis(1)).await;
    assert_eq!(first.snapshot().alert_history.len(), 1);
    first.stop().await.unwrap();

    let second = start(&dialer);
    let snap = second.snapshot();
    assert!(snap.alert_history.is_empty());
    assert!(!snap.alert_active);
    second.stop().await.unwrap();
}

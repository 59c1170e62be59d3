use caretaker_monitor::capture::SyntheticSource;
use caretaker_monitor::transport::WsDialer;
use caretaker_monitor::{ConnectionState, MonitorConfig, MonitoringSession};
use futures_util::{SinkExt, StreamExt};
use monitor_proto::{decode_data_uri, OutboundFrame};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

/// Accepts one client, checks its first frame and answers with a fall reply.
/// Returns the first frame and whether the client said goodbye with a close
/// frame.
async fn serve_one(listener: TcpListener) -> (OutboundFrame, bool) {
    let (stream, _) = listener.accept().await.unwrap();
    let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

    let frame = loop {
        match ws.next().await.expect("client hung up").unwrap() {
            Message::Text(text) => break serde_json::from_str::<OutboundFrame>(&text).unwrap(),
            _ => continue,
        }
    };

    let reply = serde_json::json!({
        "fall_detection": {"fall_detected": true, "fall_confidence": 0.91, "reasons": ["rapid descent"]},
        "gait_analysis": {"risk_level": "high", "instability_score": 0.7}
    });
    ws.send(Message::Text(reply.to_string())).await.unwrap();

    // Keep the socket open until the client leaves.
    let mut closed_cleanly = false;
    while let Some(Ok(message)) = ws.next().await {
        if message.is_close() {
            closed_cleanly = true;
            break;
        }
    }
    (frame, closed_cleanly)
}

#[test_timeout::tokio_timeout_test(20)]
async fn streams_frames_and_applies_replies_over_a_real_socket() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(serve_one(listener));

    let config = MonitorConfig {
        frame_interval: Duration::from_millis(20),
        ..MonitorConfig::default()
    }
    .with_endpoint(&format!("ws://{addr}/ws"))
    .unwrap();
    let source = SyntheticSource::new(32, 24).unwrap().with_quality(50);
    let handle = MonitoringSession::start(
        &config,
        Box::new(source),
        Arc::new(WsDialer::new(config.connect_timeout)),
    );

    let mut snapshots = handle.subscribe();
    snapshots
        .wait_for(|snap| !snap.alert_history.is_empty())
        .await
        .unwrap();

    let snap = handle.snapshot();
    assert_eq!(snap.connection, ConnectionState::Connected);
    assert!(snap.alert_active);
    assert_eq!(snap.alert_history.latest().unwrap().reasons, vec!["rapid descent"]);
    assert_eq!(snap.gait.risk_level.as_ref().map(|r| r.as_str()), Some("high"));

    let report = handle.stop().await.unwrap();
    assert!(report.pacer.sent >= 1);
    assert_eq!(report.router.routed, 1);

    let (first, closed_cleanly) = server.await.unwrap();
    assert!(closed_cleanly, "stopping the session must send a close frame");
    let decoded = decode_data_uri(&first.image).unwrap();
    assert_eq!(decoded.mime.as_deref(), Some("image/jpeg"));
    assert_eq!(&decoded.bytes[..2], &[0xff, 0xd8]);
    assert!(first.timestamp > 0);
}

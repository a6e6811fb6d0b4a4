//! ---
//! tsc_section: "02-messaging-ipc-data-model"
//! tsc_subsection: "module"
//! tsc_type: "source"
//! tsc_scope: "code"
//! tsc_description: "Command envelopes, topics, and publish transports."
//! tsc_version: "v0.1.0"
//! tsc_owner: "tbd"
//! ---
use serde_json::json;
use thermoscan_msg::{pump_json_lines, CommandEnvelope, MessagingError, Topics};
use tokio::sync::mpsc;

#[tokio::test]
async fn pumps_envelopes_and_routed_topics_in_order() {
    let input = concat!(
        "{\"command\":\"rotate\",\"payload\":{\"angle\":90,\"direction\":\"fw\"}}\n",
        "\n",
        "not json at all\n",
        "{\"topic\":\"/thermalcamera/cmd/release\"}\n",
        "{\"topic\":\"/thermalcamera/state\",\"payload\":{}}\n",
        "{\"command\":\"stop\"}\n",
    );
    let (tx, mut rx) = mpsc::channel(8);
    let forwarded = pump_json_lines(input.as_bytes(), &Topics::default(), &tx)
        .await
        .unwrap();
    drop(tx);

    assert_eq!(forwarded, 3);
    let mut received = Vec::new();
    while let Some(envelope) = rx.recv().await {
        received.push(envelope);
    }
    assert_eq!(
        received,
        vec![
            CommandEnvelope::new("rotate", json!({"angle": 90, "direction": "fw"})),
            CommandEnvelope::bare("release"),
            CommandEnvelope::bare("stop"),
        ]
    );
}

#[tokio::test]
async fn closed_queue_is_reported() {
    let (tx, rx) = mpsc::channel(1);
    drop(rx);
    let err = pump_json_lines(
        "{\"command\":\"init\"}\n".as_bytes(),
        &Topics::default(),
        &tx,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, MessagingError::ChannelClosed));
}

//! ---
//! tsc_section: "02-messaging-ipc-data-model"
//! tsc_subsection: "module"
//! tsc_type: "source"
//! tsc_scope: "code"
//! tsc_description: "Command envelopes, topics, and publish transports."
//! tsc_version: "v0.1.0"
//! tsc_owner: "tbd"
//! ---
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tracing::warn;

use crate::{CommandEnvelope, MessagingError, Result, Topics};

/// One inbound line: either an explicit envelope or a topic-routed payload
/// such as `{"topic": "/thermalcamera/cmd/rotate", "payload": {...}}`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum InboundLine {
    /// `{"command": ..., "payload": ...}`
    Envelope(CommandEnvelope),
    /// `{"topic": ..., "payload": ...}`
    Routed {
        /// Full command topic.
        topic: String,
        /// Command parameters.
        #[serde(default)]
        payload: JsonValue,
    },
}

impl InboundLine {
    /// Resolve to a command envelope using the topic layout.
    pub fn into_envelope(self, topics: &Topics) -> Result<CommandEnvelope> {
        match self {
            InboundLine::Envelope(envelope) => Ok(envelope),
            InboundLine::Routed { topic, payload } => {
                let command = topics.command_from_topic(&topic)?;
                let payload = if payload.is_null() {
                    JsonValue::Object(Default::default())
                } else {
                    payload
                };
                Ok(CommandEnvelope::new(command, payload))
            }
        }
    }
}

/// Forward JSON-lines commands from `reader` into the dispatcher queue.
///
/// Undecodable lines are logged and skipped. Returns the number of commands
/// forwarded once the reader reaches end of input.
pub async fn pump_json_lines<R>(
    reader: R,
    topics: &Topics,
    tx: &mpsc::Sender<CommandEnvelope>,
) -> Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut forwarded = 0usize;
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let decoded = serde_json::from_str::<InboundLine>(&line)
            .map_err(MessagingError::from)
            .and_then(|inbound| inbound.into_envelope(topics));
        let envelope = match decoded {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(error = %err, "discarding undecodable command line");
                continue;
            }
        };
        tx.send(envelope)
            .await
            .map_err(|_| MessagingError::ChannelClosed)?;
        forwarded += 1;
    }
    Ok(forwarded)
}

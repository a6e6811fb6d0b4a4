//! ---
//! tsc_section: "02-messaging-ipc-data-model"
//! tsc_subsection: "module"
//! tsc_type: "source"
//! tsc_scope: "code"
//! tsc_description: "Command envelopes, topics, and publish transports."
//! tsc_version: "v0.1.0"
//! tsc_owner: "tbd"
//! ---
use std::collections::VecDeque;
use std::io::Write;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::{Message, Result};

/// Outbound transport abstraction. Delivery is at-most-once.
pub trait Transport: Send + Sync {
    /// Hand a message to the transport.
    fn send(&self, msg: Message) -> Result<()>;
    /// Human-readable transport name for logging.
    fn name(&self) -> &'static str;
}

/// In-memory transport backed by a mutex protected queue.
#[derive(Clone, Default)]
pub struct InMemoryTransport {
    queue: Arc<Mutex<VecDeque<Message>>>,
}

impl InMemoryTransport {
    /// Create a new in-memory transport channel.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pop the oldest queued message.
    pub fn recv(&self) -> Option<Message> {
        self.queue.lock().pop_front()
    }

    /// Take every queued message, oldest first.
    pub fn drain(&self) -> Vec<Message> {
        self.queue.lock().drain(..).collect()
    }

    /// Copies of the queued messages published on `topic`.
    pub fn on_topic(&self, topic: &str) -> Vec<Message> {
        self.queue
            .lock()
            .iter()
            .filter(|msg| msg.topic == topic)
            .cloned()
            .collect()
    }

    /// Number of queued messages.
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    /// True when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }
}

impl Transport for InMemoryTransport {
    fn send(&self, msg: Message) -> Result<()> {
        self.queue.lock().push_back(msg);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "in_memory"
    }
}

/// Writes each message as one JSON document per line.
pub struct JsonLinesTransport {
    writer: Mutex<Box<dyn Write + Send>>,
}

impl JsonLinesTransport {
    /// Wrap an arbitrary writer.
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    /// Transport that writes to the process stdout.
    pub fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }
}

impl Transport for JsonLinesTransport {
    fn send(&self, msg: Message) -> Result<()> {
        let line = serde_json::to_string(&msg)?;
        let mut writer = self.writer.lock();
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "json_lines"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn in_memory_transport_send_and_recv() {
        let transport = InMemoryTransport::new();
        transport
            .send(Message::new("/a", json!({"x": 1}), false))
            .unwrap();
        transport
            .send(Message::new("/b", json!({"x": 2}), true))
            .unwrap();

        assert_eq!(transport.on_topic("/b").len(), 1);
        let first = transport.recv().expect("message available");
        assert_eq!(first.topic, "/a");
        assert_eq!(transport.drain().len(), 1);
        assert!(transport.is_empty());
    }

    #[test]
    fn json_lines_transport_writes_one_document_per_line() {
        let buffer = SharedBuffer::default();
        let transport = JsonLinesTransport::new(Box::new(buffer.clone()));
        transport
            .send(Message::new("/thermalcamera/state", json!({"running": 0}), true))
            .unwrap();
        transport
            .send(Message::new("/thermalcamera/switch", json!(false), false))
            .unwrap();

        let written = String::from_utf8(buffer.0.lock().clone()).unwrap();
        let lines: Vec<&str> = written.lines().collect();
        assert_eq!(lines.len(), 2);
        let decoded: Message = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(decoded.topic, "/thermalcamera/state");
        assert!(decoded.retain);
    }
}

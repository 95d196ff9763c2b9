use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{frame_line, ChannelError, EventSource, EventWriter};

/// Bounded in-process channel with the same contract as the FIFO.
///
/// A full queue drops the event rather than waiting: at most once, no
/// acknowledgement, no retry.
pub fn memory_channel(capacity: usize) -> (MemoryWriter, MemorySource) {
    let (tx, rx) = mpsc::channel(capacity);
    (MemoryWriter { tx }, MemorySource { rx })
}

#[derive(Debug, Clone)]
pub struct MemoryWriter {
    tx: mpsc::Sender<String>,
}

impl EventWriter for MemoryWriter {
    fn send_line(&self, line: &str) -> Result<(), ChannelError> {
        frame_line(line)?;
        self.tx.try_send(line.to_string()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ChannelError::Full,
            mpsc::error::TrySendError::Closed(_) => ChannelError::Closed,
        })
    }
}

#[derive(Debug)]
pub struct MemorySource {
    rx: mpsc::Receiver<String>,
}

#[async_trait]
impl EventSource for MemorySource {
    async fn next_line(&mut self) -> Result<Option<String>, ChannelError> {
        Ok(self.rx.recv().await)
    }
}

use std::collections::VecDeque;
use std::io::{ErrorKind, Read};
use std::sync::mpsc;
use std::time::Duration;

use anyhow::{Context, Result};
use log::info;
use serialport::SerialPort;

/// Source of raw bytes from the button controller.
pub trait TriggerLink: Send {
    /// Return every byte currently waiting without blocking. An empty
    /// vector means nothing has arrived since the last call.
    fn drain(&mut self) -> Result<Vec<u8>>;
}

/// Split a drained chunk into trimmed, non-empty lines.
///
/// A trailing fragment with no newline is returned as a line too: the link
/// had nothing more waiting, so it is as complete as it will get this poll.
pub fn split_signals(bytes: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(bytes)
        .split('\n')
        .map(|line| line.trim())
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Serial port opened with a zero timeout so reads never wait.
pub struct SerialTriggerLink {
    port: Box<dyn SerialPort>,
}

impl SerialTriggerLink {
    pub fn open(path: &str, baud_rate: u32) -> Result<Self> {
        let port = serialport::new(path, baud_rate)
            .timeout(Duration::ZERO)
            .open()
            .with_context(|| format!("failed to open trigger link {path} at {baud_rate} baud"))?;
        info!("Opened trigger link {} at {} baud", path, baud_rate);
        Ok(Self { port })
    }
}

impl TriggerLink for SerialTriggerLink {
    fn drain(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        loop {
            let waiting = self.port.bytes_to_read()? as usize;
            if waiting == 0 {
                break;
            }
            let mut buf = vec![0u8; waiting];
            match self.port.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => out.extend_from_slice(&buf[..n]),
                Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => break,
                Err(e) => return Err(e).context("trigger link read failed"),
            }
        }
        Ok(out)
    }
}

/// Pre-recorded chunks, one per poll. For tests and replays.
#[derive(Debug, Default)]
pub struct ScriptedLink {
    chunks: VecDeque<Vec<u8>>,
}

impl ScriptedLink {
    pub fn new<I, B>(chunks: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Vec<u8>>,
    {
        Self {
            chunks: chunks.into_iter().map(Into::into).collect(),
        }
    }

    pub fn push(&mut self, chunk: impl Into<Vec<u8>>) {
        self.chunks.push_back(chunk.into());
    }

    pub fn is_exhausted(&self) -> bool {
        self.chunks.is_empty()
    }
}

impl TriggerLink for ScriptedLink {
    fn drain(&mut self) -> Result<Vec<u8>> {
        Ok(self.chunks.pop_front().unwrap_or_default())
    }
}

/// Bytes pushed from another thread, e.g. a keyboard standing in for the
/// button.
pub struct ChannelLink {
    rx: mpsc::Receiver<Vec<u8>>,
}

impl ChannelLink {
    pub fn new() -> (mpsc::Sender<Vec<u8>>, Self) {
        let (tx, rx) = mpsc::channel();
        (tx, Self { rx })
    }
}

impl TriggerLink for ChannelLink {
    fn drain(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        while let Ok(chunk) = self.rx.try_recv() {
            out.extend(chunk);
        }
        Ok(out)
    }
}

//! Bounded capture of a child's output streams

use std::sync::{Arc, Mutex};

use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

const READ_CHUNK: usize = 8 * 1024;

/// Keeps the last `cap` bytes written to it and counts what was dropped
#[derive(Debug, Clone)]
pub struct TailBuffer {
    cap: usize,
    buf: Vec<u8>,
    dropped: usize,
}

impl TailBuffer {
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            buf: Vec::with_capacity(cap.min(READ_CHUNK)),
            dropped: 0,
        }
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
        if self.buf.len() > self.cap {
            let excess = self.buf.len() - self.cap;
            self.buf.drain(..excess);
            self.dropped += excess;
        }
    }

    pub fn is_truncated(&self) -> bool {
        self.dropped > 0
    }

    pub fn dropped(&self) -> usize {
        self.dropped
    }

    /// Render the retained tail, prefixed with a marker when bytes were dropped
    pub fn render(&self) -> String {
        let tail = String::from_utf8_lossy(&self.buf);
        if self.is_truncated() {
            format!("[... {} bytes truncated ...]\n{}", self.dropped, tail)
        } else {
            tail.into_owned()
        }
    }
}

pub type SharedTail = Arc<Mutex<TailBuffer>>;

pub fn shared(cap: usize) -> SharedTail {
    Arc::new(Mutex::new(TailBuffer::new(cap)))
}

/// Read `reader` to EOF into `tail`. Reading continues past the cap so the
/// child never blocks on a full pipe.
pub async fn drain_into<R>(mut reader: R, tail: SharedTail, stream: &'static str)
where
    R: AsyncRead + Unpin,
{
    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                let mut guard = tail.lock().unwrap_or_else(|e| e.into_inner());
                guard.push(&chunk[..n]);
            }
            Err(e) => {
                debug!("Stopped reading {}: {}", stream, e);
                break;
            }
        }
    }
}

/// Snapshot of a shared tail as `(text, truncated)`
pub fn snapshot(tail: &SharedTail) -> (String, bool) {
    let guard = tail.lock().unwrap_or_else(|e| e.into_inner());
    (guard.render(), guard.is_truncated())
}

//! Log ring buffer (C10): a fixed-capacity byte buffer hooked as a stdout
//! sink, matching the spec's "hooked to standard output" integration by
//! chaining into the same `fern::Dispatch` the agent binary already builds
//! for human-readable stdout logging (grounded on the teacher's
//! `logger.rs::setup_logging`, which chains multiple `io::Write` sinks onto
//! one dispatch). `log(...)` appends and arms a flush signal; the actual
//! flush (handing bytes to the uplink's `send_log` over the WebSocket) runs
//! on a separate async task so the `log`/`fern` call site never blocks on
//! network I/O.

use std::io;
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

struct State {
    buffer: Vec<u8>,
    capacity: usize,
    enabled: bool,
    flush_queued: bool,
}

/// Cloneable handle onto one ring buffer; clones share the same backing
/// state so the `io::Write` sink installed in the logger and the async
/// flush loop draining it can be handed out separately.
#[derive(Clone)]
pub struct LogRing {
    state: Arc<Mutex<State>>,
    notify: Arc<Notify>,
}

impl LogRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                buffer: Vec::with_capacity(capacity.min(64 * 1024)),
                capacity,
                enabled: true,
                flush_queued: false,
            })),
            notify: Arc::new(Notify::new()),
        }
    }

    /// An `io::Write` sink to chain onto a `fern::Dispatch`.
    pub fn writer(&self) -> LogRingWriter {
        LogRingWriter(self.clone())
    }

    /// Resolves once a flush has been queued since the last [`Self::drain`].
    pub async fn wait_for_signal(&self) {
        self.notify.notified().await;
    }

    /// If a flush is queued, disables further appends, drains the buffer,
    /// and returns the drained bytes. Returns `None` if nothing is queued
    /// (spurious wakeups are possible and harmless).
    pub fn drain(&self) -> Option<Vec<u8>> {
        let mut state = self.state.lock().unwrap();
        if !state.flush_queued {
            return None;
        }
        state.enabled = false;
        Some(std::mem::take(&mut state.buffer))
    }

    /// Re-enables appends and clears the queued flag after a drain's bytes
    /// have been handed off (successfully or not — overflow handling is the
    /// caller's concern, not the ring's).
    pub fn rearm(&self) {
        let mut state = self.state.lock().unwrap();
        state.enabled = true;
        state.flush_queued = false;
    }

    fn append(&self, data: &[u8]) {
        let mut state = self.state.lock().unwrap();
        if !state.enabled {
            return;
        }
        let remaining = state.capacity.saturating_sub(state.buffer.len());
        let take = remaining.min(data.len());
        if take > 0 {
            state.buffer.extend_from_slice(&data[..take]);
        }
        if !state.flush_queued && !state.buffer.is_empty() {
            state.flush_queued = true;
            drop(state);
            self.notify.notify_one();
        }
    }
}

/// The `io::Write` side of a [`LogRing`], installed into a logging backend's
/// dispatch chain.
pub struct LogRingWriter(LogRing);

impl io::Write for LogRingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.append(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn append_past_capacity_drops_the_excess() {
        let ring = LogRing::new(8);
        let mut writer = ring.writer();
        writer.write_all(b"0123456789").unwrap();
        let drained = ring.drain().unwrap();
        assert_eq!(drained, b"01234567");
    }

    #[test]
    fn drain_without_a_queued_flush_returns_none() {
        let ring = LogRing::new(8);
        assert!(ring.drain().is_none());
    }

    #[test]
    fn disabled_during_drain_drops_writes_until_rearmed() {
        let ring = LogRing::new(8);
        let mut writer = ring.writer();
        writer.write_all(b"abc").unwrap();
        let _ = ring.drain();
        writer.write_all(b"def").unwrap();
        assert!(ring.drain().is_none());
        ring.rearm();
        writer.write_all(b"ghi").unwrap();
        assert_eq!(ring.drain().unwrap(), b"ghi");
    }

    #[tokio::test]
    async fn appending_wakes_a_waiting_flush_loop() {
        let ring = LogRing::new(64);
        let mut writer = ring.writer();
        let waiter = ring.clone();
        let handle = tokio::spawn(async move {
            waiter.wait_for_signal().await;
            waiter.drain()
        });
        tokio::task::yield_now().await;
        writer.write_all(b"hello").unwrap();
        let drained = handle.await.unwrap();
        assert_eq!(drained.unwrap(), b"hello");
    }
}

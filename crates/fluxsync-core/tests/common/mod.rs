// Scripted in-memory transport shared by the integration tests.
#![allow(dead_code, clippy::unwrap_used)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use fluxsync_api::{Error as ApiError, Frame, ReconnectConfig, Streamer, Transport};
use fluxsync_core::{ConnectionState, SyncConfig};
use tokio::sync::{mpsc, watch};

enum Event {
    Frame(Frame),
    Fail(ApiError),
}

#[derive(Default)]
struct State {
    attempts: usize,
    opens: Vec<Vec<String>>,
    updates: Vec<Vec<String>>,
    closes: usize,
    live: usize,
    max_live: usize,
    fail_opens: u32,
    feed: Option<mpsc::UnboundedSender<Event>>,
}

/// A transport whose streamers are fed by the test.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<State>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(&self) -> Arc<dyn Transport> {
        Arc::new(self.clone())
    }

    /// Make the next `n` open attempts fail.
    pub fn fail_next_opens(&self, n: u32) {
        self.state.lock().unwrap().fail_opens = n;
    }

    /// Deliver a frame on the current streamer.
    pub fn push(&self, frame: Frame) {
        self.send(Event::Frame(frame));
    }

    /// Drop the current streamer as if the connection was lost.
    pub fn drop_stream(&self) {
        self.send(Event::Fail(ApiError::WebSocketClosed {
            code: 1006,
            reason: "abnormal closure".into(),
        }));
    }

    fn send(&self, event: Event) {
        let state = self.state.lock().unwrap();
        let feed = state.feed.as_ref().expect("no streamer opened");
        assert!(feed.send(event).is_ok(), "streamer already gone");
    }

    pub fn attempts(&self) -> usize {
        self.state.lock().unwrap().attempts
    }

    pub fn opens(&self) -> usize {
        self.state.lock().unwrap().opens.len()
    }

    pub fn opened_with(&self) -> Vec<Vec<String>> {
        self.state.lock().unwrap().opens.clone()
    }

    pub fn updates(&self) -> Vec<Vec<String>> {
        self.state.lock().unwrap().updates.clone()
    }

    pub fn closes(&self) -> usize {
        self.state.lock().unwrap().closes
    }

    pub fn live(&self) -> usize {
        self.state.lock().unwrap().live
    }

    pub fn max_live(&self) -> usize {
        self.state.lock().unwrap().max_live
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open_streamer(&self, channels: &[String]) -> Result<Box<dyn Streamer>, ApiError> {
        let mut state = self.state.lock().unwrap();
        state.attempts += 1;
        if state.fail_opens > 0 {
            state.fail_opens -= 1;
            return Err(ApiError::WebSocketConnect("connection refused".into()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        state.opens.push(channels.to_vec());
        state.live += 1;
        state.max_live = state.max_live.max(state.live);
        state.feed = Some(tx);

        Ok(Box::new(MockStreamer {
            rx,
            state: Arc::clone(&self.state),
            closed: false,
        }))
    }
}

struct MockStreamer {
    rx: mpsc::UnboundedReceiver<Event>,
    state: Arc<Mutex<State>>,
    closed: bool,
}

impl MockStreamer {
    fn release(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let mut state = self.state.lock().unwrap();
        state.closes += 1;
        state.live -= 1;
    }
}

#[async_trait]
impl Streamer for MockStreamer {
    async fn next(&mut self) -> Option<Result<Frame, ApiError>> {
        if self.closed {
            return None;
        }
        match self.rx.recv().await? {
            Event::Frame(frame) => Some(Ok(frame)),
            Event::Fail(err) => Some(Err(err)),
        }
    }

    async fn update(&mut self, channels: &[String]) -> Result<(), ApiError> {
        if self.closed {
            return Err(ApiError::StreamerClosed);
        }
        self.state.lock().unwrap().updates.push(channels.to_vec());
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ApiError> {
        self.release();
        Ok(())
    }
}

impl Drop for MockStreamer {
    fn drop(&mut self) {
        self.release();
    }
}

/// Fast retry policy for tests.
pub fn test_config() -> SyncConfig {
    SyncConfig::default().with_reconnect(ReconnectConfig {
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(100),
        max_retries: Some(3),
    })
}

/// Poll `cond` until it holds, advancing (paused) time 1ms per step.
pub async fn eventually(what: &str, mut cond: impl FnMut() -> bool) {
    for _ in 0..5_000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("timed out waiting for: {what}");
}

pub async fn wait_for_state(rx: &mut watch::Receiver<ConnectionState>, want: ConnectionState) {
    tokio::time::timeout(Duration::from_secs(30), rx.wait_for(|state| *state == want))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {want}"))
        .unwrap();
}

/// Let spawned tasks run without moving the clock.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

//! In-memory channel for exercising the session and registry without
//! hardware.

use crate::error::TransportError;
use crate::transport::{ChannelFactory, Transport, INBOUND_CAPACITY};
use async_trait::async_trait;
use dispense_protocol::FRAME_LEN;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct SentFrame {
    pub frame: [u8; FRAME_LEN],
    pub at: Instant,
}

/// Shared recording/behavior knobs, visible to the test after the transport
/// itself has been boxed away behind the registry.
#[derive(Default)]
pub struct MockState {
    pub sent: Mutex<Vec<SentFrame>>,
    /// 1-based send index that fails with an i/o error.
    pub fail_on: Mutex<Option<usize>>,
    /// 1-based send index that never completes (for timeout tests).
    pub hang_on: Mutex<Option<usize>>,
    pub opens: AtomicUsize,
    pub closes: AtomicUsize,
}

impl MockState {
    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn sent_at(&self) -> Vec<Instant> {
        self.sent.lock().unwrap().iter().map(|s| s.at).collect()
    }

    pub fn live_handles(&self) -> usize {
        self.opens.load(Ordering::SeqCst) - self.closes.load(Ordering::SeqCst)
    }
}

pub struct MockTransport {
    state: Arc<MockState>,
    inbound: broadcast::Sender<String>,
}

impl MockTransport {
    pub fn new(state: Arc<MockState>) -> Self {
        let (inbound, _) = broadcast::channel(INBOUND_CAPACITY);
        state.opens.fetch_add(1, Ordering::SeqCst);
        Self { state, inbound }
    }

    pub fn inbound_sender(&self) -> broadcast::Sender<String> {
        self.inbound.clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn send_frame(&mut self, frame: &[u8; FRAME_LEN]) -> Result<(), TransportError> {
        let index = self.state.sent_count() + 1;
        if *self.state.hang_on.lock().unwrap() == Some(index) {
            std::future::pending::<()>().await;
        }
        if *self.state.fail_on.lock().unwrap() == Some(index) {
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "mock send failure",
            )));
        }
        self.state.sent.lock().unwrap().push(SentFrame {
            frame: *frame,
            at: Instant::now(),
        });
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<String> {
        self.inbound.subscribe()
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Factory producing mock transports that all report into one shared state.
pub struct MockFactory {
    pub state: Arc<MockState>,
    /// When set, `open` fails this many times before succeeding.
    pub fail_opens: AtomicUsize,
    /// Last opened transport's inbound sender, for driving data events.
    pub inbound: Mutex<Option<broadcast::Sender<String>>>,
}

impl MockFactory {
    pub fn new() -> Self {
        Self {
            state: Arc::new(MockState::default()),
            fail_opens: AtomicUsize::new(0),
            inbound: Mutex::new(None),
        }
    }
}

#[async_trait]
impl ChannelFactory for MockFactory {
    async fn open(&self) -> Result<Box<dyn Transport>, TransportError> {
        if self.fail_opens.load(Ordering::SeqCst) > 0 {
            self.fail_opens.fetch_sub(1, Ordering::SeqCst);
            return Err(TransportError::NoDevice);
        }
        let transport = MockTransport::new(self.state.clone());
        *self.inbound.lock().unwrap() = Some(transport.inbound_sender());
        Ok(Box::new(transport))
    }
}

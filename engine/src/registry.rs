//! Shared ownership of the built-in UART channel.
//!
//! Several screens (checkout, diagnostics, slot testing) observe or use the
//! same physical connection. Instead of a hidden global, a `ChannelRegistry`
//! is constructed once at startup and handed to whoever needs it; cloning is
//! cheap and every clone sees the same channel, status, and message history.
//! The registry's internal mutex is also what keeps two dispense sessions
//! from interleaving frames on the shared line.

use crate::error::TransportError;
use crate::model::ChannelStatus;
use crate::transport::{ChannelFactory, Transport};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{broadcast, watch, Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How many cleaned inbound hex messages are kept for diagnostic screens.
pub const MESSAGE_BUFFER: usize = 50;

type SharedChannel = Arc<Mutex<Option<Box<dyn Transport>>>>;

struct Inner {
    factory: Arc<dyn ChannelFactory>,
    channel: SharedChannel,
    status: watch::Sender<ChannelStatus>,
    messages: StdMutex<VecDeque<String>>,
    pump: StdMutex<Option<JoinHandle<()>>>,
}

#[derive(Clone)]
pub struct ChannelRegistry {
    inner: Arc<Inner>,
}

impl ChannelRegistry {
    pub fn new(factory: Arc<dyn ChannelFactory>) -> Self {
        let (status, _) = watch::channel(ChannelStatus::default());
        Self {
            inner: Arc::new(Inner {
                factory,
                channel: Arc::new(Mutex::new(None)),
                status,
                messages: StdMutex::new(VecDeque::with_capacity(MESSAGE_BUFFER)),
                pump: StdMutex::new(None),
            }),
        }
    }

    /// Current shared state; never touches hardware.
    pub fn status(&self) -> ChannelStatus {
        *self.inner.status.borrow()
    }

    /// Watch for status changes (screens re-render off this).
    pub fn watch_status(&self) -> watch::Receiver<ChannelStatus> {
        self.inner.status.subscribe()
    }

    /// The last [`MESSAGE_BUFFER`] cleaned inbound hex messages, oldest
    /// first.
    pub fn recent_messages(&self) -> Vec<String> {
        self.inner
            .messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    /// Open the shared channel if it is not already open. The first caller
    /// pays for hardware initialization; later callers reuse the handle.
    pub async fn initialize(&self) -> Result<(), TransportError> {
        let mut guard = self.inner.channel.lock().await;
        if guard.is_some() {
            debug!("uart channel already initialized, reusing");
            return Ok(());
        }
        let transport = self.inner.factory.open().await?;
        self.start_pump(transport.subscribe());
        *guard = Some(transport);
        self.inner.status.send_replace(ChannelStatus {
            initialized: true,
            connected: true,
            listening: true,
        });
        info!("uart channel initialized");
        Ok(())
    }

    /// Close and forget the shared channel. Safe to call when nothing is
    /// open.
    pub async fn cleanup(&self) -> Result<(), TransportError> {
        let mut guard = self.inner.channel.lock().await;
        if let Some(handle) = self
            .inner
            .pump
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            handle.abort();
        }
        let result = match guard.take() {
            Some(mut transport) => transport.close().await,
            None => Ok(()),
        };
        self.inner.status.send_replace(ChannelStatus::default());
        if let Err(ref e) = result {
            warn!(error = %e, "uart channel cleanup reported an error");
        } else {
            info!("uart channel cleaned up");
        }
        result
    }

    /// Tear the channel down and bring it back up. This is the recovery used
    /// when a screen suspects the connection went stale.
    pub async fn refresh(&self) -> Result<(), TransportError> {
        self.cleanup().await?;
        self.initialize().await
    }

    /// Exclusive use of the shared channel for one send sequence. Holds the
    /// channel lock until the lease is dropped, so no other session can
    /// interleave frames.
    pub async fn acquire(&self) -> Result<ChannelLease, TransportError> {
        self.initialize().await?;
        let guard = self.inner.channel.clone().lock_owned().await;
        if guard.is_none() {
            // a cleanup slipped in between initialize and lock
            return Err(TransportError::Closed);
        }
        Ok(ChannelLease { guard })
    }

    fn start_pump(&self, mut rx: broadcast::Receiver<String>) {
        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(msg) => {
                        let mut messages =
                            inner.messages.lock().unwrap_or_else(|e| e.into_inner());
                        if messages.len() == MESSAGE_BUFFER {
                            messages.pop_front();
                        }
                        messages.push_back(msg);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "inbound message pump lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        let mut pump = self.inner.pump.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(old) = pump.replace(handle) {
            old.abort();
        }
    }
}

/// Exclusive lease on the shared channel, released on drop.
pub struct ChannelLease {
    guard: OwnedMutexGuard<Option<Box<dyn Transport>>>,
}

impl ChannelLease {
    pub fn transport(&mut self) -> &mut dyn Transport {
        // checked Some at acquire; the lock has been held ever since
        self.guard
            .as_mut()
            .expect("lease holds a live channel")
            .as_mut()
    }
}

//! The dispense session: one paid cart, one frame sequence, one channel.
//!
//! `Idle -> Acquiring -> Sending -> Completed`, with `Failed` reachable from
//! `Acquiring` (no channel) and `Sending` (a send failed). Frames go out
//! strictly one at a time; after every non-final frame the session waits the
//! settle delay so the motor can finish a physical dispense cycle. A
//! mid-sequence failure aborts the remainder (continuing past a failed
//! frame risks double-dispensing) and the result carries how many frames
//! made it out. The engine never retries the sequence itself; that decision
//! belongs to the caller.

use crate::config::{ChannelConfig, EngineConfig};
use crate::error::{EngineError, TransportError};
use crate::model::{DispenseRequest, DispenseResult, MachineProfile};
use crate::registry::{ChannelLease, ChannelRegistry};
use crate::sequence::CommandSequence;
use crate::transport::usb::UsbSerialTransport;
use crate::transport::Transport;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Acquiring,
    Sending,
    Completed,
    Failed,
}

/// Caller-held handle to abort a running session.
///
/// Aborting is cooperative: the current send is allowed to finish (or time
/// out), then the session stops and reports progress so far.
#[derive(Clone)]
pub struct AbortHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl AbortHandle {
    pub fn abort(&self) {
        let _ = self.tx.send(true);
    }
}

/// Either channel once acquired; owned exclusively for the send sequence.
enum Acquired {
    Usb(Box<dyn Transport>),
    Bridge(ChannelLease),
}

impl Acquired {
    fn transport(&mut self) -> &mut dyn Transport {
        match self {
            Acquired::Usb(t) => t.as_mut(),
            Acquired::Bridge(lease) => lease.transport(),
        }
    }
}

/// One session per paid cart. Construct, optionally grab the abort handle
/// and state watcher, then `run` exactly once.
pub struct DispenseSession {
    config: EngineConfig,
    registry: ChannelRegistry,
    state: watch::Sender<SessionState>,
    cancel_tx: Arc<watch::Sender<bool>>,
    cancel_rx: watch::Receiver<bool>,
}

impl DispenseSession {
    pub fn new(config: EngineConfig, registry: ChannelRegistry) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        Self {
            config,
            registry,
            state,
            cancel_tx: Arc::new(cancel_tx),
            cancel_rx,
        }
    }

    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle {
            tx: self.cancel_tx.clone(),
        }
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Drive a paid cart to the hardware. Consumes the session's one shot:
    /// mapping, channel acquisition (with the uniform retry policy), then
    /// the sequential send loop.
    pub async fn run(
        &mut self,
        request: &DispenseRequest,
        profile: Option<&MachineProfile>,
    ) -> DispenseResult {
        let sequence = match CommandSequence::from_request(request, profile) {
            Ok(seq) => seq,
            Err(e) => {
                warn!(error = %e, "cart could not be mapped to motor slots");
                self.state.send_replace(SessionState::Failed);
                return DispenseResult::failed(0, EngineError::Mapping(e));
            }
        };
        let total = sequence.len();
        if total == 0 {
            // nothing to dispense; vacuous success
            self.state.send_replace(SessionState::Completed);
            return DispenseResult::completed(0);
        }

        self.state.send_replace(SessionState::Acquiring);
        info!(frames = total, channel = ?self.config.channel, "acquiring hardware channel");
        let mut acquired = match self.acquire_with_retry().await {
            Ok(a) => a,
            Err(e) => {
                warn!(error = %e, "channel acquisition failed");
                self.state.send_replace(SessionState::Failed);
                return DispenseResult::failed(0, e);
            }
        };

        self.state.send_replace(SessionState::Sending);
        let result = self.send_all(&sequence, &mut acquired).await;
        match &result.last_error {
            None => self.state.send_replace(SessionState::Completed),
            Some(_) => self.state.send_replace(SessionState::Failed),
        };
        result
    }

    async fn send_all(&mut self, sequence: &CommandSequence, acquired: &mut Acquired) -> DispenseResult {
        let total = sequence.len();
        let settle = self.config.settle_delay();
        let send_timeout = self.config.send_timeout();

        for (i, frame) in sequence.frames().iter().enumerate() {
            if *self.cancel_rx.borrow() {
                info!(frames_sent = i, total, "dispense aborted before frame");
                return DispenseResult::failed(
                    i,
                    EngineError::Aborted {
                        frames_sent: i,
                        total,
                    },
                );
            }

            let transport = acquired.transport();
            debug!(frame = i + 1, total, slot = frame[2], "sending frame");
            let sent = tokio::select! {
                res = timeout(send_timeout, transport.send_frame(frame)) => res,
                _ = self.cancel_rx.wait_for(|c| *c) => {
                    info!(frames_sent = i, total, "dispense aborted mid-send");
                    return DispenseResult::failed(
                        i,
                        EngineError::Aborted { frames_sent: i, total },
                    );
                }
            };
            match sent {
                Ok(Ok(())) => {}
                Ok(Err(source)) => {
                    warn!(frame = i + 1, total, error = %source, "frame send failed, aborting sequence");
                    return DispenseResult::failed(
                        i,
                        EngineError::Send {
                            frames_sent: i,
                            total,
                            source,
                        },
                    );
                }
                Err(_) => {
                    warn!(frame = i + 1, total, "frame send timed out, aborting sequence");
                    return DispenseResult::failed(
                        i,
                        EngineError::Send {
                            frames_sent: i,
                            total,
                            source: TransportError::Timeout(send_timeout),
                        },
                    );
                }
            }

            // settle delay between frames only; the last frame ends the
            // sequence immediately
            if i + 1 < total {
                tokio::select! {
                    _ = sleep(settle) => {}
                    _ = self.cancel_rx.wait_for(|c| *c) => {
                        info!(frames_sent = i + 1, total, "dispense aborted during settle delay");
                        return DispenseResult::failed(
                            i + 1,
                            EngineError::Aborted {
                                frames_sent: i + 1,
                                total,
                            },
                        );
                    }
                }
            }
        }

        info!(frames_sent = total, "all frames transmitted");
        DispenseResult::completed(total)
    }

    async fn acquire_with_retry(&self) -> Result<Acquired, EngineError> {
        let policy = self.config.retry();
        let attempts = policy.attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = match self.config.channel {
                ChannelConfig::UsbSerial => UsbSerialTransport::open(&self.config.usb)
                    .await
                    .map(|t| Acquired::Usb(Box::new(t))),
                ChannelConfig::BridgeUart => self.registry.acquire().await.map(Acquired::Bridge),
            };
            match result {
                Ok(acquired) => return Ok(acquired),
                Err(source) => {
                    warn!(attempt, attempts, error = %source, "channel open failed");
                    if attempt >= attempts {
                        return Err(EngineError::Acquire { attempts, source });
                    }
                    sleep(policy.backoff).await;
                }
            }
        }
    }
}

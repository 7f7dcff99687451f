//! Serial-to-backend bridge runtime.
//!
//! A bridge is three cooperating pieces:
//! - a blocking reader thread (`serial`) that frames bytes into lines and
//!   pushes them into a channel,
//! - one processing task, [`BridgeRuntime::run`], that owns all device state
//!   and turns lines into [`Outbound`] payloads,
//! - an upload worker that posts those payloads one at a time.
//!
//! The processing task never awaits the network, so a slow backend cannot
//! stall frame ingestion. Device-specific behavior lives behind
//! [`FrameProcessor`] (`hardware` for vitals, `geofence` for radar).

use std::{future::Future, sync::Arc, time::Duration};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::error::TransportError;
use crate::uploader::{Backend, Outbound};

pub mod geofence;
pub mod hardware;
pub mod serial;

pub use geofence::{is_breach, CooldownTable, GeofenceBridge};
pub use hardware::HardwareBridge;
pub use serial::{discover_port, SerialLink};

/// Items produced by the transport reader.
pub type LineEvent = Result<String, TransportError>;

/// Default depth of the upload queue between processing and network.
pub const UPLOAD_QUEUE_DEPTH: usize = 64;

// ---

/// Lifecycle of a bridge. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Disconnected,
    Connecting,
    Open,
    Closed,
}

/// Device-specific frame handling plugged into [`BridgeRuntime`].
pub trait FrameProcessor: Send {
    /// Short label used in logs.
    fn name(&self) -> &'static str;

    /// Handle one framed line. Must never fail: bad lines are logged and skipped.
    fn on_line(&mut self, line: &str, now: Instant) -> Vec<Outbound>;

    /// Liveness ping payload.
    fn heartbeat(&self) -> Outbound;

    fn heartbeat_interval(&self) -> Duration;
}

/// Sending half of the upload worker's queue.
#[derive(Debug, Clone)]
pub struct UploadQueue {
    tx: mpsc::Sender<Outbound>,
}

impl UploadQueue {
    /// Hand a payload to the upload worker without waiting.
    ///
    /// A full queue drops the payload; the next cycle supersedes it.
    pub fn enqueue(&self, outbound: Outbound) {
        // ---
        match self.tx.try_send(outbound) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                warn!("Upload queue full, dropping POST {}", dropped.endpoint());
            }
            Err(mpsc::error::TrySendError::Closed(dropped)) => {
                debug!("Upload worker stopped, dropping POST {}", dropped.endpoint());
            }
        }
    }
}

/// Start the task that posts queued payloads sequentially, in arrival order.
pub fn spawn_upload_worker<B: Backend>(backend: Arc<B>, depth: usize) -> (UploadQueue, JoinHandle<()>) {
    // ---
    let (tx, mut rx) = mpsc::channel::<Outbound>(depth.max(1));

    let handle = tokio::spawn(async move {
        while let Some(outbound) = rx.recv().await {
            let endpoint = outbound.endpoint();
            // Failures are already logged by the backend; nothing is retried.
            if backend.deliver(outbound).await.is_err() {
                debug!("Dropped failed POST {}", endpoint);
            }
        }
        debug!("Upload worker drained");
    });

    (UploadQueue { tx }, handle)
}

/// Drives one [`FrameProcessor`] over a stream of lines.
pub struct BridgeRuntime<P> {
    processor: P,
    uploads: UploadQueue,
    state: BridgeState,
}

impl<P: FrameProcessor> BridgeRuntime<P> {
    pub fn new(processor: P, uploads: UploadQueue) -> Self {
        Self {
            processor,
            uploads,
            state: BridgeState::Disconnected,
        }
    }

    pub fn state(&self) -> BridgeState {
        self.state
    }

    pub fn processor(&self) -> &P {
        &self.processor
    }

    /// Record that the transport is being opened.
    pub fn mark_connecting(&mut self) {
        self.transition(BridgeState::Connecting);
    }

    /// Record that the transport could not be opened.
    pub fn mark_failed(&mut self) {
        self.transition(BridgeState::Closed);
    }

    fn transition(&mut self, next: BridgeState) {
        // ---
        if self.state == BridgeState::Closed {
            return;
        }
        debug!("[{}] {:?} -> {:?}", self.processor.name(), self.state, next);
        self.state = next;
    }

    /// Process lines until `shutdown` resolves or the transport fails.
    ///
    /// Returns `Ok(())` on a requested shutdown and the transport error
    /// otherwise. Either way the bridge ends in [`BridgeState::Closed`].
    pub async fn run<S>(
        &mut self,
        source: &str,
        mut lines: mpsc::Receiver<LineEvent>,
        shutdown: S,
    ) -> Result<(), TransportError>
    where
        S: Future<Output = ()>,
    {
        // ---
        self.transition(BridgeState::Open);
        info!("[{}] Listening on {}", self.processor.name(), source);

        let period = self.processor.heartbeat_interval();
        self.uploads.enqueue(self.processor.heartbeat());
        let mut heartbeat = interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tokio::pin!(shutdown);

        let result = loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    info!("[{}] Shutting down", self.processor.name());
                    break Ok(());
                }

                event = lines.recv() => match event {
                    Some(Ok(line)) => {
                        for outbound in self.processor.on_line(&line, Instant::now()) {
                            self.uploads.enqueue(outbound);
                        }
                    }
                    Some(Err(e)) => {
                        error!("[{}] Transport error: {}", self.processor.name(), e);
                        break Err(e);
                    }
                    None => {
                        error!("[{}] Transport reader stopped", self.processor.name());
                        break Err(TransportError::Closed(source.to_string()));
                    }
                },

                _ = heartbeat.tick() => {
                    debug!("[{}] Heartbeat", self.processor.name());
                    self.uploads.enqueue(self.processor.heartbeat());
                }
            }
        };

        self.transition(BridgeState::Closed);
        result
    }
}

//! Connectivity-gated incremental polling of the backend's read endpoints.
//!
//! Two timers per poller:
//! - a slow connectivity check against the feed's status endpoint, always
//!   running while the poller is started;
//! - a fast fetch loop, armed only while the last check said "connected".
//!
//! The connectivity tick also refreshes the feed's side data (latest alert
//! and stats for radar), whether or not the device is connected.
//!
//! Every completion re-checks a liveness flag and a generation counter under
//! the state lock, so results that land after `stop()`, a disconnect, a filter
//! change or a `refetch()` are discarded without touching state.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::PollerConfig;

pub mod feed;
pub mod state;

pub use feed::{FeedQuery, FeedSource, HttpRadarFeed, HttpSensorFeed, RadarExtras};
pub use state::{Connectivity, FeedKind, PollState, PollStatus, Timestamped};

/// Buffered new-data batches per subscriber before it starts lagging.
const EVENT_CHANNEL_DEPTH: usize = 32;

// ---

/// Cadences and sizing for one poller.
#[derive(Debug, Clone, Copy)]
pub struct PollerOptions {
    pub poll_interval: Duration,
    pub status_interval: Duration,
    pub capacity: usize,
}

impl PollerOptions {
    /// Vitals feed settings.
    pub fn sensors(cfg: &PollerConfig) -> Self {
        Self {
            poll_interval: cfg.poll_interval,
            status_interval: cfg.status_interval,
            capacity: cfg.buffer_capacity,
        }
    }

    /// Radar sweep settings.
    pub fn radar(cfg: &PollerConfig) -> Self {
        Self {
            poll_interval: cfg.radar_poll_interval,
            status_interval: cfg.status_interval,
            capacity: cfg.buffer_capacity,
        }
    }
}

type Callback<T> = Arc<dyn Fn(&[T]) + Send + Sync>;

struct Shared<T, X> {
    state: PollState<T>,
    extras: X,
    filter: Option<String>,
    alive: bool,
    generation: u64,
    status_task: Option<JoinHandle<()>>,
    fast_task: Option<JoinHandle<()>>,
}

impl<T, X> Shared<T, X> {
    fn is_current(&self, generation: u64) -> bool {
        self.alive && self.generation == generation
    }

    /// Cancel the fast loop and invalidate anything it still has in flight.
    fn disarm(&mut self) {
        // ---
        self.generation += 1;
        if let Some(task) = self.fast_task.take() {
            task.abort();
            debug!("Fast poll disarmed");
        }
    }
}

struct Inner<S: FeedSource> {
    source: S,
    options: PollerOptions,
    shared: Mutex<Shared<S::Item, S::Extras>>,
    on_new_data: Option<Callback<S::Item>>,
    events: broadcast::Sender<Arc<[S::Item]>>,
}

impl<S: FeedSource> Inner<S> {
    fn lock(&self) -> MutexGuard<'_, Shared<S::Item, S::Extras>> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start a fresh fast loop. Caller holds the lock.
    fn arm(self: &Arc<Self>, shared: &mut Shared<S::Item, S::Extras>) {
        // ---
        shared.disarm();
        let generation = shared.generation;
        let inner = Arc::clone(self);
        shared.fast_task = Some(tokio::spawn(fast_loop(inner, generation)));
        debug!("Fast poll armed (generation {})", generation);
    }

    /// Hand a batch to the callback and subscribers, unless the fetch that
    /// produced it has been superseded since it was merged.
    fn announce(&self, generation: u64, items: Vec<S::Item>) {
        // ---
        if !self.lock().is_current(generation) {
            debug!("Dropping {} item(s) from a superseded fetch", items.len());
            return;
        }
        if let Some(callback) = &self.on_new_data {
            callback(&items);
        }
        // No subscribers is fine.
        let _ = self.events.send(items.into());
    }
}

async fn status_loop<S: FeedSource>(inner: Arc<Inner<S>>) {
    // ---
    let mut ticker = interval(inner.options.status_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let result = inner.source.check_connectivity().await;

        let filter = {
            let mut shared = inner.lock();
            if !shared.alive {
                return;
            }

            let connectivity = match result {
                Ok(true) => Connectivity::Connected,
                Ok(false) => Connectivity::Disconnected,
                Err(e) => {
                    warn!("Connectivity check failed: {}", e);
                    Connectivity::Unknown
                }
            };

            if connectivity != shared.state.connectivity {
                info!("Device connectivity: {:?} -> {:?}", shared.state.connectivity, connectivity);
                shared.state.connectivity = connectivity;
            }

            match connectivity {
                Connectivity::Connected if shared.fast_task.is_none() => inner.arm(&mut shared),
                Connectivity::Connected => {}
                _ => shared.disarm(),
            }
            shared.filter.clone()
        };

        let update = inner.source.fetch_extras(filter).await;

        let mut shared = inner.lock();
        if !shared.alive {
            return;
        }
        S::merge_extras(&mut shared.extras, update);
    }
}

async fn fast_loop<S: FeedSource>(inner: Arc<Inner<S>>, generation: u64) {
    // ---
    let mut ticker = interval(inner.options.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let kind = inner.source.kind();

    loop {
        ticker.tick().await;

        let query = {
            let mut shared = inner.lock();
            if !shared.is_current(generation) {
                return;
            }
            shared.state.begin_fetch();
            FeedQuery {
                since: shared.state.since(),
                filter: shared.filter.clone(),
            }
        };

        let result = inner.source.fetch(query).await;

        let fresh = {
            let mut shared = inner.lock();
            if !shared.is_current(generation) {
                debug!("Discarding stale fetch result");
                return;
            }
            match result {
                Ok(items) => shared.state.apply(kind, items),
                Err(e) => {
                    // Log the transition into error once, not every tick.
                    if shared.state.status == PollStatus::Error {
                        debug!("Fetch still failing: {}", e);
                    } else {
                        warn!("Fetch failed: {}", e);
                    }
                    shared.state.record_error(e.to_string());
                    None
                }
            }
        };

        if let Some(items) = fresh {
            debug!("{} new item(s)", items.len());
            inner.announce(generation, items);
        }
    }
}

/// Follows one backend feed, polling fast only while its device is connected.
///
/// Must be started from within a Tokio runtime. Dropping the poller stops it.
pub struct AdaptivePoller<S: FeedSource> {
    inner: Arc<Inner<S>>,
}

impl<S: FeedSource> AdaptivePoller<S> {
    pub fn new(source: S, options: PollerOptions) -> Self {
        Self::build(source, options, None)
    }

    /// Like [`new`](Self::new), with a callback invoked with each batch of
    /// newly arrived items (never for the catch-up fetch).
    pub fn with_callback<F>(source: S, options: PollerOptions, on_new_data: F) -> Self
    where
        F: Fn(&[S::Item]) + Send + Sync + 'static,
    {
        Self::build(source, options, Some(Arc::new(on_new_data)))
    }

    fn build(source: S, options: PollerOptions, on_new_data: Option<Callback<S::Item>>) -> Self {
        // ---
        let (events, _) = broadcast::channel(EVENT_CHANNEL_DEPTH);
        let shared = Shared {
            state: PollState::new(options.capacity),
            extras: S::Extras::default(),
            filter: None,
            alive: false,
            generation: 0,
            status_task: None,
            fast_task: None,
        };
        Self {
            inner: Arc::new(Inner {
                source,
                options,
                shared: Mutex::new(shared),
                on_new_data,
                events,
            }),
        }
    }

    /// Begin connectivity checks. The first check runs immediately.
    ///
    /// Every start, including a restart after [`stop`](Self::stop), begins
    /// with a catch-up fetch.
    pub fn start(&self) {
        // ---
        let mut shared = self.inner.lock();
        if shared.alive {
            return;
        }
        shared.alive = true;
        shared.generation += 1;
        shared.state.reset();
        shared.status_task = Some(tokio::spawn(status_loop(Arc::clone(&self.inner))));
        info!(
            "Poller started (fast {:?}, status {:?})",
            self.inner.options.poll_interval, self.inner.options.status_interval
        );
    }

    /// Cancel both timers. In-flight results are discarded.
    pub fn stop(&self) {
        // ---
        let mut shared = self.inner.lock();
        if !shared.alive {
            return;
        }
        shared.alive = false;
        shared.disarm();
        if let Some(task) = shared.status_task.take() {
            task.abort();
        }
        shared.state.status = PollStatus::Idle;
        info!("Poller stopped");
    }

    pub fn is_running(&self) -> bool {
        self.inner.lock().alive
    }

    /// True while the fast fetch loop is active.
    pub fn is_armed(&self) -> bool {
        self.inner.lock().fast_task.is_some()
    }

    /// Switch the filter key. A change drops history and re-enters catch-up.
    pub fn set_filter(&self, filter: Option<String>) {
        // ---
        let mut shared = self.inner.lock();
        if shared.filter == filter {
            return;
        }
        info!("Poll filter changed: {:?} -> {:?}", shared.filter, filter);
        shared.filter = filter;
        self.restart_catch_up(&mut shared);
    }

    /// Drop history and run a catch-up fetch now (if the device is connected).
    pub fn refetch(&self) {
        let mut shared = self.inner.lock();
        self.restart_catch_up(&mut shared);
    }

    fn restart_catch_up(&self, shared: &mut Shared<S::Item, S::Extras>) {
        // ---
        shared.state.reset();
        if shared.fast_task.is_some() && shared.alive {
            self.inner.arm(shared);
        } else {
            shared.generation += 1;
        }
    }

    /// Clone of the observable state.
    pub fn snapshot(&self) -> PollState<S::Item> {
        self.inner.lock().state.clone()
    }

    /// Side data from the last successful slow-cadence refresh.
    pub fn extras(&self) -> S::Extras {
        self.inner.lock().extras.clone()
    }

    /// Stream of new-data batches. Receivers may come and go freely.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<[S::Item]>> {
        self.inner.events.subscribe()
    }
}

impl<S: FeedSource> Drop for AdaptivePoller<S> {
    fn drop(&mut self) {
        self.stop();
    }
}

//! # Location Providers
//!
//! The platform location service as seen by a tracking session: a one-shot
//! "where am I" request and a continuous subscription. A subscription is a
//! [`PositionStream`] of observations in delivery order plus a
//! [`WatchHandle`] that cancels it when dropped.
//!
//! [`ChannelProvider`] is an in-process provider fed through a
//! [`PositionFeed`]; platform glue pushes observations into the feed, and
//! tests use it as a scripted GPS.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use log::debug;
use tokio::sync::{mpsc, oneshot};

use crate::config::PositionOptions;
use crate::error::{ProviderErrorCode, Result, TrailMilesError};
use crate::Position;

/// Observations from a subscription, in delivery order.
pub type PositionStream = mpsc::UnboundedReceiver<Result<Position>>;

/// Cancels a position subscription. Dropping the handle cancels too.
pub struct WatchHandle {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl WatchHandle {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A handle with nothing to cancel.
    pub fn noop() -> Self {
        Self { cancel: None }
    }

    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchHandle")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// A platform location service.
#[async_trait]
pub trait LocationProvider: Send + Sync {
    /// A single position fix.
    async fn current_position(&self, options: &PositionOptions) -> Result<Position>;

    /// Subscribe to continuous position updates.
    async fn watch(&self, options: &PositionOptions) -> Result<(PositionStream, WatchHandle)>;
}

// ============================================================================
// Channel provider
// ============================================================================

#[derive(Default)]
struct FeedState {
    watchers: Vec<(u64, mpsc::UnboundedSender<Result<Position>>)>,
    pending: Vec<oneshot::Sender<Result<Position>>>,
    next_watch_id: u64,
    last_fix: Option<Position>,
}

type SharedFeed = Arc<Mutex<FeedState>>;

fn lock_feed(shared: &SharedFeed) -> MutexGuard<'_, FeedState> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Location provider driven by a [`PositionFeed`].
#[derive(Clone)]
pub struct ChannelProvider {
    shared: SharedFeed,
}

/// Producer side of a [`ChannelProvider`].
#[derive(Clone)]
pub struct PositionFeed {
    shared: SharedFeed,
}

impl ChannelProvider {
    pub fn new() -> (ChannelProvider, PositionFeed) {
        let shared: SharedFeed = Arc::new(Mutex::new(FeedState::default()));
        (
            ChannelProvider {
                shared: Arc::clone(&shared),
            },
            PositionFeed { shared },
        )
    }
}

impl PositionFeed {
    /// Deliver an observation to every subscriber and pending one-shot
    /// request. Returns the number of receivers reached.
    pub fn push(&self, position: Position) -> usize {
        let mut state = lock_feed(&self.shared);
        state.last_fix = Some(position.clone());
        Self::deliver(&mut state, Ok(position))
    }

    /// Deliver a provider error to every subscriber and pending request.
    pub fn push_error(&self, error: TrailMilesError) -> usize {
        let mut state = lock_feed(&self.shared);
        Self::deliver(&mut state, Err(error))
    }

    /// End every open subscription.
    pub fn close(&self) {
        let mut state = lock_feed(&self.shared);
        state.watchers.clear();
        state.pending.clear();
    }

    pub fn watcher_count(&self) -> usize {
        lock_feed(&self.shared).watchers.len()
    }

    fn deliver(state: &mut FeedState, observation: Result<Position>) -> usize {
        state
            .watchers
            .retain(|(_, tx)| tx.send(observation.clone()).is_ok());
        let mut delivered = state.watchers.len();

        for tx in state.pending.drain(..) {
            if tx.send(observation.clone()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }
}

#[async_trait]
impl LocationProvider for ChannelProvider {
    async fn current_position(&self, options: &PositionOptions) -> Result<Position> {
        let rx = {
            let mut state = lock_feed(&self.shared);

            if let Some(fix) = &state.last_fix {
                let age = Utc::now().signed_duration_since(fix.timestamp);
                if age.num_milliseconds() <= options.maximum_age_ms as i64 {
                    return Ok(fix.clone());
                }
            }

            // Requests that timed out are still queued until the next push
            state.pending.retain(|tx| !tx.is_closed());
            let (tx, rx) = oneshot::channel();
            state.pending.push(tx);
            rx
        };

        match tokio::time::timeout(Duration::from_millis(options.timeout_ms), rx).await {
            Ok(Ok(observation)) => observation,
            Ok(Err(_)) => Err(TrailMilesError::provider(
                ProviderErrorCode::PositionUnavailable,
                "position feed closed",
            )),
            Err(_) => Err(TrailMilesError::provider(
                ProviderErrorCode::Timeout,
                format!("no position within {} ms", options.timeout_ms),
            )),
        }
    }

    async fn watch(&self, _options: &PositionOptions) -> Result<(PositionStream, WatchHandle)> {
        let (tx, rx) = mpsc::unbounded_channel();

        let id = {
            let mut state = lock_feed(&self.shared);
            let id = state.next_watch_id;
            state.next_watch_id += 1;
            state.watchers.push((id, tx));
            id
        };
        debug!("[ChannelProvider] Watch {} registered", id);

        let shared = Arc::clone(&self.shared);
        let handle = WatchHandle::new(move || {
            lock_feed(&shared).watchers.retain(|(watch_id, _)| *watch_id != id);
            debug!("[ChannelProvider] Watch {} cleared", id);
        });

        Ok((rx, handle))
    }
}

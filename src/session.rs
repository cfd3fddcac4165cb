//! # Tracking Session
//!
//! Bridges a continuous position stream to discrete mile-change events.
//!
//! ## States
//!
//! `Idle` -> `Tracking` on a successful [`TrackingSession::start`], back to
//! `Idle` on [`TrackingSession::stop`], on a provider error, or when the
//! provider ends the stream.
//!
//! ## Ordering
//!
//! One task per subscription consumes observations strictly in delivery
//! order. [`TrackingSession::handle_observation`] is synchronous, so the
//! notification for observation N is emitted before observation N+1 is
//! looked at. The state lock is never held across an await or while the
//! callback runs.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, error, info, warn};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::config::TrackerConfig;
use crate::error::{OptionExt, ProviderErrorCode, Result, TrailMilesError};
use crate::geo_utils::closest_markers;
use crate::markers::{MarkerCatalog, MarkerSource};
use crate::provider::{LocationProvider, PositionStream, WatchHandle};
use crate::spatial::MarkerIndex;
use crate::{Fix, MarkerDistance, MileChange, MileMarker, Position};

/// Receiver of mile-change notifications.
pub type MileChangeCallback = Arc<dyn Fn(&MileChange) + Send + Sync>;

struct SessionState {
    current_position: Option<Position>,
    tracking: bool,
    index: MarkerIndex,
    snap_distance_meters: f64,
    last_resolved_mile: Option<f64>,
    on_mile_change: Option<MileChangeCallback>,
    last_error: Option<TrailMilesError>,
    /// Bumped on every start/stop so a superseded task cannot touch state
    generation: u64,
    /// Provider subscription of the current run
    watch: Option<WatchHandle>,
}

struct SessionInner {
    state: Mutex<SessionState>,
}

/// Stateful wrapper around a location provider and a marker set.
pub struct TrackingSession {
    config: TrackerConfig,
    provider: Option<Arc<dyn LocationProvider>>,
    catalog: MarkerCatalog,
    inner: Arc<SessionInner>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl TrackingSession {
    /// Create an idle session.
    ///
    /// `provider` is `None` on platforms without location support; `source`
    /// is `None` when only built-in markers are available.
    pub fn new(
        config: TrackerConfig,
        provider: Option<Arc<dyn LocationProvider>>,
        source: Option<Arc<dyn MarkerSource>>,
    ) -> Self {
        let catalog = MarkerCatalog::new(source, &config);
        let state = SessionState {
            current_position: None,
            tracking: false,
            index: MarkerIndex::default(),
            snap_distance_meters: config.snap_distance_meters,
            last_resolved_mile: None,
            on_mile_change: None,
            last_error: None,
            generation: 0,
            watch: None,
        };

        Self {
            config,
            provider,
            catalog,
            inner: Arc::new(SessionInner {
                state: Mutex::new(state),
            }),
            task: Mutex::new(None),
        }
    }

    // ========================================================================
    // Markers
    // ========================================================================

    /// Load the marker set for `trail_id` and make it the session's markers.
    ///
    /// Failures for the default trail fall back to built-in markers; other
    /// trails surface the error and keep the current markers.
    pub async fn load_markers(&self, trail_id: &str) -> Result<Vec<MileMarker>> {
        let markers = self.catalog.load(trail_id).await?;
        self.set_markers(markers.as_ref().clone());
        Ok(markers.as_ref().clone())
    }

    /// Load the default trail's markers if the session has none yet.
    async fn ensure_markers(&self) -> Result<()> {
        let missing = self.inner.lock_state().index.is_empty();
        if missing {
            let trail = self.config.default_trail.clone();
            self.load_markers(&trail).await?;
        }
        Ok(())
    }

    /// Replace the marker set directly.
    pub fn set_markers(&self, markers: Vec<MileMarker>) {
        let count = markers.len();
        self.inner.lock_state().index = MarkerIndex::new(markers);
        debug!("[Session] Using {} mile markers", count);
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Start tracking and resolve once the first observation is processed.
    ///
    /// Loads the default trail's markers first if none are loaded. Restarts
    /// cleanly if already tracking.
    pub async fn start(&self, on_mile_change: MileChangeCallback) -> Result<()> {
        let provider = self
            .provider
            .clone()
            .ok_or_capability("GPS not supported on this device")?;

        self.stop();

        self.ensure_markers().await?;

        let generation = {
            let mut state = self.inner.lock_state();
            state.generation += 1;
            state.tracking = true;
            state.on_mile_change = Some(on_mile_change);
            state.last_error = None;
            state.generation
        };
        info!("[Session] Tracking started");

        let (stream, handle) = match provider.watch(&self.config.position).await {
            Ok(subscription) => subscription,
            Err(err) => {
                error!("[Session] Failed to subscribe to positions: {}", err);
                self.inner.reset_to_idle(generation, Some(err.clone()));
                return Err(err);
            }
        };

        if !self.inner.install_watch(generation, handle) {
            return Err(TrailMilesError::provider(
                ProviderErrorCode::PositionUnavailable,
                "tracking stopped before the first position fix",
            ));
        }

        let (first_fix_tx, first_fix_rx) = oneshot::channel();
        let task = tokio::spawn(Arc::clone(&self.inner).run(stream, generation, first_fix_tx));
        *self.lock_task() = Some(task);

        match first_fix_rx.await {
            Ok(result) => result,
            Err(_) => Err(TrailMilesError::provider(
                ProviderErrorCode::PositionUnavailable,
                "tracking stopped before the first position fix",
            )),
        }
    }

    /// Stop tracking. Safe to call when already idle.
    pub fn stop(&self) {
        let watch = {
            let mut state = self.inner.lock_state();
            if state.tracking {
                info!("[Session] Tracking stopped");
            }
            state.tracking = false;
            state.generation += 1;
            state.watch.take()
        };

        if let Some(watch) = watch {
            watch.cancel();
        }
        if let Some(task) = self.lock_task().take() {
            task.abort();
        }
    }

    /// Process one raw observation.
    ///
    /// Records the position, resolves its mile and notifies the callback
    /// only when the mile differs from the previously resolved one. Never
    /// fails; a panicking callback is logged and contained.
    pub fn handle_observation(&self, position: Position) -> Option<MileChange> {
        self.inner.handle_observation(position)
    }

    /// Take a single fix without emitting a mile change.
    pub async fn locate_once(&self) -> Result<Fix> {
        let provider = self
            .provider
            .clone()
            .ok_or_capability("GPS not supported on this device")?;

        self.ensure_markers().await?;

        let position = provider.current_position(&self.config.position).await?;

        let mut state = self.inner.lock_state();
        let mile = state
            .index
            .nearest_mile(&position, state.snap_distance_meters);
        state.current_position = Some(position.clone());
        Ok(Fix { position, mile })
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn is_tracking(&self) -> bool {
        self.inner.lock_state().tracking
    }

    pub fn mile_markers(&self) -> Vec<MileMarker> {
        self.inner.lock_state().index.markers().to_vec()
    }

    pub fn position(&self) -> Option<Position> {
        self.inner.lock_state().current_position.clone()
    }

    pub fn last_resolved_mile(&self) -> Option<f64> {
        self.inner.lock_state().last_resolved_mile
    }

    pub fn snap_distance_meters(&self) -> f64 {
        self.inner.lock_state().snap_distance_meters
    }

    /// Change the snap distance for future observations.
    pub fn set_snap_distance(&self, meters: f64) -> Result<()> {
        if !meters.is_finite() || meters < 0.0 {
            return Err(TrailMilesError::config(format!(
                "snap distance must be a non-negative number of meters, got {}",
                meters
            )));
        }
        self.inner.lock_state().snap_distance_meters = meters;
        Ok(())
    }

    /// Provider error that ended the most recent tracking run, if any.
    pub fn last_error(&self) -> Option<TrailMilesError> {
        self.inner.lock_state().last_error.clone()
    }

    /// The `count` markers nearest the current position.
    pub fn closest_markers(&self, count: usize) -> Vec<MarkerDistance> {
        let state = self.inner.lock_state();
        match &state.current_position {
            Some(position) => closest_markers(position, state.index.markers(), count),
            None => Vec::new(),
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    fn lock_task(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.task.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for TrackingSession {
    fn drop(&mut self) {
        self.stop();
    }
}

impl SessionInner {
    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn handle_observation(&self, position: Position) -> Option<MileChange> {
        let (change, callback) = {
            let mut state = self.lock_state();
            let resolved = state
                .index
                .nearest_mile(&position, state.snap_distance_meters);

            debug!(
                "[Session] Position {:.6}, {:.6} (accuracy {:?}) -> mile {:?}",
                position.lat, position.lng, position.accuracy, resolved
            );

            state.current_position = Some(position.clone());
            if resolved == state.last_resolved_mile {
                return None;
            }

            let change = MileChange {
                mile: resolved,
                previous_mile: state.last_resolved_mile,
                timestamp: position.timestamp,
                position,
            };
            state.last_resolved_mile = resolved;
            (change, state.on_mile_change.clone())
        };

        if let Some(callback) = callback {
            if catch_unwind(AssertUnwindSafe(|| callback(&change))).is_err() {
                error!(
                    "[Session] Mile change callback panicked for mile {:?}",
                    change.mile
                );
            }
        }
        Some(change)
    }

    /// Whether the task started under `generation` is still the active one.
    fn is_current(&self, generation: u64) -> bool {
        let state = self.lock_state();
        state.tracking && state.generation == generation
    }

    /// Keep `handle` as the subscription of run `generation`. A handle for
    /// a superseded run is cancelled instead.
    fn install_watch(&self, generation: u64, handle: WatchHandle) -> bool {
        let stale = {
            let mut state = self.lock_state();
            if state.generation == generation {
                state.watch = Some(handle);
                None
            } else {
                Some(handle)
            }
        };
        match stale {
            Some(handle) => {
                handle.cancel();
                false
            }
            None => true,
        }
    }

    /// End run `generation` and release its provider subscription.
    fn reset_to_idle(&self, generation: u64, error: Option<TrailMilesError>) {
        let watch = {
            let mut state = self.lock_state();
            if state.generation != generation {
                return;
            }
            state.tracking = false;
            if error.is_some() {
                state.last_error = error;
            }
            state.watch.take()
        };

        if let Some(watch) = watch {
            watch.cancel();
            debug!("[Session] Position subscription released");
        }
    }

    async fn run(
        self: Arc<Self>,
        mut stream: PositionStream,
        generation: u64,
        first_fix: oneshot::Sender<Result<()>>,
    ) {
        let mut first_fix = Some(first_fix);

        while let Some(observation) = stream.recv().await {
            if !self.is_current(generation) {
                return;
            }

            match observation {
                Ok(position) => {
                    self.handle_observation(position);
                    if let Some(tx) = first_fix.take() {
                        let _ = tx.send(Ok(()));
                    }
                }
                Err(err) => {
                    error!("[Session] Location provider error: {}", err);
                    self.reset_to_idle(generation, Some(err.clone()));
                    if let Some(tx) = first_fix.take() {
                        let _ = tx.send(Err(err));
                    }
                    return;
                }
            }
        }

        if self.is_current(generation) {
            warn!("[Session] Position stream ended, tracking stopped");
        }
        self.reset_to_idle(generation, None);
        if let Some(tx) = first_fix.take() {
            let _ = tx.send(Err(TrailMilesError::provider(
                ProviderErrorCode::PositionUnavailable,
                "position stream ended before the first fix",
            )));
        }
    }
}

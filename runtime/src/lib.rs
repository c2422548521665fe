//! # tripcarry runtime
//!
//! The Store runtime that coordinates reducer execution and effect handling.
//!
//! ## Core Components
//!
//! - **Store**: owns the state, serializes reductions, executes effects
//! - **Notifications**: every accepted action is followed by an ordered
//!   [`Notification`] carrying a snapshot of the new state
//! - **Effect handles**: let callers wait until the remote work started by an
//!   action (and the feedback it produced) has been applied
//!
//! ## Example
//!
//! ```ignore
//! use tripcarry_runtime::Store;
//!
//! let store = Store::new(initial_state, my_reducer, environment);
//!
//! // Watch the state before sending, so nothing is missed
//! let mut notifications = store.subscribe();
//!
//! // Rejections come back synchronously
//! let mut handle = store.send(Action::DoSomething).await?;
//! handle.wait().await;
//!
//! let value = store.state(|s| s.some_field).await;
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{RwLock, watch};
use tripcarry_core::{effect::Effect, reducer::Reducer};

/// Error types for the Store runtime
pub mod error {
    use thiserror::Error;

    /// Errors that can occur during Store operations
    ///
    /// `E` is the reducer's rejection type.
    #[derive(Error, Debug)]
    pub enum StoreError<E> {
        /// The reducer rejected the action; state is unchanged
        #[error("Action rejected: {0}")]
        Rejected(E),

        /// Store is shutting down and not accepting new actions
        #[error("Store is shutting down")]
        ShutdownInProgress,

        /// Shutdown timed out waiting for effects to complete
        #[error("Shutdown timed out with {0} effects still running")]
        ShutdownTimeout(usize),
    }

    impl<E> StoreError<E> {
        /// The reducer's rejection, if that is what this error is
        #[must_use]
        pub fn into_rejection(self) -> Option<E> {
            match self {
                Self::Rejected(error) => Some(error),
                Self::ShutdownInProgress | Self::ShutdownTimeout(_) => None,
            }
        }
    }
}

pub use error::StoreError;

/// Configuration for Store instances
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use tripcarry_runtime::StoreConfig;
///
/// let config = StoreConfig::default()
///     .with_notification_capacity(1024)
///     .with_shutdown_timeout(Duration::from_secs(5));
/// assert_eq!(config.notification_capacity, 1024);
/// ```
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// How many notifications a slow subscriber may fall behind before it lags
    pub notification_capacity: usize,
    /// Default timeout for graceful shutdown
    pub default_shutdown_timeout: Duration,
}

impl StoreConfig {
    /// Create a new configuration with custom values
    #[must_use]
    pub const fn new(notification_capacity: usize, default_shutdown_timeout: Duration) -> Self {
        Self {
            notification_capacity,
            default_shutdown_timeout,
        }
    }

    /// Set the notification channel capacity
    #[must_use]
    pub const fn with_notification_capacity(mut self, capacity: usize) -> Self {
        self.notification_capacity = capacity;
        self
    }

    /// Set the default shutdown timeout
    #[must_use]
    pub const fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.default_shutdown_timeout = timeout;
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            notification_capacity: 256,
            default_shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// A state change published by the Store
///
/// Published while the state write lock is still held, so `sequence` order,
/// reduction order and delivery order are the same thing.
#[derive(Debug)]
pub struct Notification<S, A> {
    /// Monotonic position of this change, starting at 1
    pub sequence: u64,
    /// The accepted action that produced the change
    pub action: A,
    /// State right after the action was reduced
    pub state: Arc<S>,
}

impl<S, A: Clone> Clone for Notification<S, A> {
    fn clone(&self) -> Self {
        Self {
            sequence: self.sequence,
            action: self.action.clone(),
            state: Arc::clone(&self.state),
        }
    }
}

/// Handle for tracking effect completion
///
/// Returned by [`Store::send()`]. Completes once every effect the action
/// started has finished and any action it fed back has been reduced.
///
/// # Example
///
/// ```ignore
/// let mut handle = store.send(Action::Start).await?;
/// handle.wait_with_timeout(Duration::from_secs(5)).await?;
/// ```
#[derive(Clone)]
pub struct EffectHandle {
    effects: Arc<AtomicUsize>,
    completion: watch::Receiver<()>,
}

impl EffectHandle {
    fn new() -> (Self, EffectTracking) {
        let counter = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = watch::channel(());

        let handle = Self {
            effects: Arc::clone(&counter),
            completion: rx,
        };
        let tracking = EffectTracking {
            counter,
            notifier: Arc::new(tx),
        };

        (handle, tracking)
    }

    /// Create a handle that's already complete
    #[must_use]
    pub fn completed() -> Self {
        let (tx, rx) = watch::channel(());
        let _ = tx.send(());

        Self {
            effects: Arc::new(AtomicUsize::new(0)),
            completion: rx,
        }
    }

    /// Number of effects still running
    #[must_use]
    pub fn pending(&self) -> usize {
        self.effects.load(Ordering::SeqCst)
    }

    /// Wait for all effects to complete
    pub async fn wait(&mut self) {
        while self.effects.load(Ordering::SeqCst) > 0 {
            if self.completion.changed().await.is_err() {
                // Every tracker is gone, so the counter can no longer move
                break;
            }
        }
    }

    /// Wait for all effects to complete with a timeout
    ///
    /// # Errors
    ///
    /// Returns `Err(())` if the timeout expires before all effects complete.
    pub async fn wait_with_timeout(&mut self, timeout: Duration) -> Result<(), ()> {
        tokio::time::timeout(timeout, self.wait())
            .await
            .map_err(|_| ())
    }
}

impl std::fmt::Debug for EffectHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectHandle")
            .field("pending_effects", &self.effects.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

/// Internal: effect counter shared by every effect started from one action
#[derive(Clone)]
struct EffectTracking {
    counter: Arc<AtomicUsize>,
    notifier: Arc<watch::Sender<()>>,
}

impl EffectTracking {
    fn increment(&self) {
        self.counter.fetch_add(1, Ordering::SeqCst);
    }

    fn decrement(&self) {
        if self.counter.fetch_sub(1, Ordering::SeqCst) == 1 {
            let _ = self.notifier.send(());
        }
    }
}

/// Internal: RAII guard that decrements the effect counter on drop
///
/// Keeps the counter honest even if the effect task panics.
struct DecrementGuard(EffectTracking);

impl Drop for DecrementGuard {
    fn drop(&mut self) {
        self.0.decrement();
    }
}

/// Guard that decrements an atomic counter on drop (for shutdown tracking)
struct AtomicCounterGuard(Arc<AtomicUsize>);

impl Drop for AtomicCounterGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Store runtime for coordinating reducer execution and effect handling.
pub mod store {
    use super::{
        Arc, AtomicBool, AtomicCounterGuard, AtomicU64, AtomicUsize, DecrementGuard, Duration,
        Effect, EffectHandle, EffectTracking, Notification, Ordering, Reducer, RwLock,
        StoreConfig, StoreError,
    };
    use tokio::sync::broadcast;

    /// Whether an action came from a caller or from an effect
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Origin {
        Command,
        Feedback,
    }

    /// The Store - runtime coordinator for a reducer
    ///
    /// The Store owns:
    /// 1. State (behind `RwLock`; the reducer runs under the write lock)
    /// 2. Reducer (business logic)
    /// 3. Environment (injected dependencies)
    /// 4. Effect execution (with feedback loop)
    /// 5. The notification channel every subscriber reads from
    ///
    /// Reductions never interleave. Effects run concurrently on tokio and
    /// only touch state again by feeding an action back through the reducer.
    pub struct Store<S, A, E, R>
    where
        R: Reducer<State = S, Action = A, Environment = E>,
    {
        state: Arc<RwLock<S>>,
        reducer: R,
        environment: E,
        config: StoreConfig,
        shutdown: Arc<AtomicBool>,
        pending_effects: Arc<AtomicUsize>,
        sequence: Arc<AtomicU64>,
        notifications: broadcast::Sender<Notification<S, A>>,
    }

    impl<S, A, E, R> Store<S, A, E, R>
    where
        R: Reducer<State = S, Action = A, Environment = E> + Clone + Send + Sync + 'static,
        R::Error: std::fmt::Display + Send,
        A: std::fmt::Debug + Clone + Send + Sync + 'static,
        S: Clone + Send + Sync + 'static,
        E: Clone + Send + Sync + 'static,
    {
        /// Create a new store with default configuration
        #[must_use]
        pub fn new(initial_state: S, reducer: R, environment: E) -> Self {
            Self::with_config(initial_state, reducer, environment, StoreConfig::default())
        }

        /// Create a new Store with custom configuration
        #[must_use]
        pub fn with_config(
            initial_state: S,
            reducer: R,
            environment: E,
            config: StoreConfig,
        ) -> Self {
            let (notifications, _) = broadcast::channel(config.notification_capacity.max(1));

            Self {
                state: Arc::new(RwLock::new(initial_state)),
                reducer,
                environment,
                config,
                shutdown: Arc::new(AtomicBool::new(false)),
                pending_effects: Arc::new(AtomicUsize::new(0)),
                sequence: Arc::new(AtomicU64::new(0)),
                notifications,
            }
        }

        /// The configuration this store was built with
        #[must_use]
        pub const fn config(&self) -> &StoreConfig {
            &self.config
        }

        /// Number of effects currently running across all actions
        #[must_use]
        pub fn pending_effects(&self) -> usize {
            self.pending_effects.load(Ordering::Acquire)
        }

        /// Send an action to the store
        ///
        /// 1. Acquires the write lock on state
        /// 2. Calls the reducer; a rejection is returned as-is and nothing is published
        /// 3. Publishes a [`Notification`] while still holding the lock
        /// 4. Starts the returned effects and hands back an [`EffectHandle`]
        ///
        /// # Errors
        ///
        /// - [`StoreError::Rejected`] if the reducer refused the action
        /// - [`StoreError::ShutdownInProgress`] if the store is shutting down
        #[tracing::instrument(skip(self, action), name = "store_send")]
        pub async fn send(&self, action: A) -> Result<EffectHandle, StoreError<R::Error>> {
            if self.shutdown.load(Ordering::Acquire) {
                tracing::warn!("Rejected action: store is shutting down");
                metrics::counter!("store.shutdown.rejected_actions").increment(1);
                return Err(StoreError::ShutdownInProgress);
            }

            self.dispatch(action, Origin::Command).await
        }

        /// Reduce an action and start its effects
        async fn dispatch(
            &self,
            action: A,
            origin: Origin,
        ) -> Result<EffectHandle, StoreError<R::Error>> {
            let kind = match origin {
                Origin::Command => "command",
                Origin::Feedback => "feedback",
            };
            metrics::counter!("store.actions.total", "origin" => kind).increment(1);

            let (handle, tracking) = EffectHandle::new();

            let effects = {
                let mut state = self.state.write().await;
                tracing::trace!("Acquired write lock on state");

                let span = tracing::debug_span!("reducer_execution", origin = kind);
                let _enter = span.enter();

                let published = action.clone();
                let start = std::time::Instant::now();
                let result = self.reducer.reduce(&mut *state, action, &self.environment);
                metrics::histogram!("store.reducer.duration_seconds")
                    .record(start.elapsed().as_secs_f64());

                let effects = match result {
                    Ok(effects) => effects,
                    Err(error) => {
                        tracing::debug!(%error, "Reducer rejected action");
                        metrics::counter!("store.actions.rejected", "origin" => kind)
                            .increment(1);
                        return Err(StoreError::Rejected(error));
                    },
                };

                let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
                // No subscribers is fine; the change is still applied
                let _ = self.notifications.send(Notification {
                    sequence,
                    action: published,
                    state: Arc::new((*state).clone()),
                });

                tracing::trace!(sequence, "Reducer completed, returned {} effects", effects.len());
                effects
            };

            for effect in effects {
                self.execute_effect(effect, tracking.clone());
            }

            Ok(handle)
        }

        /// Read current state via a closure
        ///
        /// ```ignore
        /// let count = store.state(|s| s.len()).await;
        /// ```
        pub async fn state<F, T>(&self, f: F) -> T
        where
            F: FnOnce(&S) -> T,
        {
            let state = self.state.read().await;
            f(&state)
        }

        /// Subscribe to state changes
        ///
        /// The receiver sees every change reduced after this call, in order.
        /// A receiver that falls more than `notification_capacity` changes
        /// behind gets [`broadcast::error::RecvError::Lagged`] and resumes at the
        /// oldest retained change.
        #[must_use]
        pub fn subscribe(&self) -> broadcast::Receiver<Notification<S, A>> {
            self.notifications.subscribe()
        }

        /// Number of live subscribers
        #[must_use]
        pub fn subscriber_count(&self) -> usize {
            self.notifications.receiver_count()
        }

        /// Initiate graceful shutdown of the store
        ///
        /// New actions are rejected from now on. Effects already running keep
        /// going and their feedback is still reduced, so in-flight work settles.
        ///
        /// # Errors
        ///
        /// Returns [`StoreError::ShutdownTimeout`] if effects are still running
        /// when the timeout elapses.
        pub async fn shutdown(&self, timeout: Duration) -> Result<(), StoreError<R::Error>> {
            tracing::info!("Initiating graceful shutdown");
            metrics::counter!("store.shutdown.initiated").increment(1);

            self.shutdown.store(true, Ordering::Release);

            let start = std::time::Instant::now();
            let poll_interval = Duration::from_millis(10);

            loop {
                let pending = self.pending_effects.load(Ordering::Acquire);

                if pending == 0 {
                    tracing::info!("All effects completed, shutdown successful");
                    metrics::counter!("store.shutdown.completed").increment(1);
                    return Ok(());
                }

                if start.elapsed() >= timeout {
                    tracing::error!(pending_effects = pending, "Shutdown timed out");
                    metrics::counter!("store.shutdown.timeout").increment(1);
                    return Err(StoreError::ShutdownTimeout(pending));
                }

                tokio::time::sleep(poll_interval).await;
            }
        }

        /// Whether shutdown has been initiated
        #[must_use]
        pub fn is_shutting_down(&self) -> bool {
            self.shutdown.load(Ordering::Acquire)
        }

        /// Execute an effect with tracking
        ///
        /// `Future` effects run in their own task. The action they produce is
        /// reduced before the effect counts as finished, so an [`EffectHandle`]
        /// only completes once the feedback is visible in state.
        #[allow(clippy::needless_pass_by_value)] // tracking is cloned per effect
        fn execute_effect(&self, effect: Effect<A>, tracking: EffectTracking) {
            match effect {
                Effect::None => {
                    metrics::counter!("store.effects.executed", "type" => "none").increment(1);
                },
                Effect::Parallel(effects) => {
                    metrics::counter!("store.effects.executed", "type" => "parallel").increment(1);
                    for effect in effects {
                        self.execute_effect(effect, tracking.clone());
                    }
                },
                Effect::Future(fut) => {
                    metrics::counter!("store.effects.executed", "type" => "future").increment(1);
                    tracking.increment();

                    self.pending_effects.fetch_add(1, Ordering::SeqCst);
                    let pending_guard = AtomicCounterGuard(Arc::clone(&self.pending_effects));

                    let guard = DecrementGuard(tracking);
                    let store = self.clone();

                    tokio::spawn(async move {
                        let _guard = guard;
                        let _pending_guard = pending_guard;

                        let Some(action) = fut.await else {
                            tracing::trace!("Effect::Future completed with no action");
                            return;
                        };

                        tracing::trace!("Effect::Future produced an action, feeding it back");
                        // Feedback bypasses the shutdown gate so in-flight work settles
                        if let Err(error) = store.dispatch(action, Origin::Feedback).await {
                            tracing::error!(%error, "Feedback action was not applied");
                        }
                    });
                },
            }
        }
    }

    impl<S, A, E, R> Clone for Store<S, A, E, R>
    where
        R: Reducer<State = S, Action = A, Environment = E> + Clone,
        E: Clone,
    {
        fn clone(&self) -> Self {
            Self {
                state: Arc::clone(&self.state),
                reducer: self.reducer.clone(),
                environment: self.environment.clone(),
                config: self.config.clone(),
                shutdown: Arc::clone(&self.shutdown),
                pending_effects: Arc::clone(&self.pending_effects),
                sequence: Arc::clone(&self.sequence),
                notifications: self.notifications.clone(),
            }
        }
    }
}

// Re-export for convenience
pub use store::Store;

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code
mod tests {
    use super::*;

    #[tokio::test]
    async fn completed_handle_does_not_block() {
        let mut handle = EffectHandle::completed();
        assert_eq!(handle.pending(), 0);
        assert!(handle.wait_with_timeout(Duration::from_millis(50)).await.is_ok());
    }

    #[tokio::test]
    async fn handle_completes_when_last_effect_finishes() {
        let (mut handle, tracking) = EffectHandle::new();
        tracking.increment();
        tracking.increment();
        assert_eq!(handle.pending(), 2);

        let first = DecrementGuard(tracking.clone());
        let second = DecrementGuard(tracking);
        drop(first);
        assert!(handle.wait_with_timeout(Duration::from_millis(20)).await.is_err());

        drop(second);
        assert!(handle.wait_with_timeout(Duration::from_millis(50)).await.is_ok());
    }

    #[test]
    fn rejection_is_recoverable_from_store_error() {
        let error: StoreError<String> = StoreError::Rejected("nope".to_string());
        assert_eq!(error.to_string(), "Action rejected: nope");
        assert_eq!(error.into_rejection().as_deref(), Some("nope"));
        assert!(StoreError::<String>::ShutdownInProgress.into_rejection().is_none());
    }

    #[test]
    fn config_builders_override_defaults() {
        let config = StoreConfig::default()
            .with_notification_capacity(8)
            .with_shutdown_timeout(Duration::from_secs(1));
        assert_eq!(config.notification_capacity, 8);
        assert_eq!(config.default_shutdown_timeout, Duration::from_secs(1));
    }
}

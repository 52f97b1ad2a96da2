use super::config::{PipelineConfig, SYNC_POLL_INTERVAL};
use super::event::{ChangeEvent, ObjectKey};
use super::health::HealthSnapshot;
use super::queue::EventQueue;
use super::store::ResourceStore;
use super::watch::{WatchAdapter, WatchSource};
use super::worker::{EventHandler, run_worker};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex as StdMutex, RwLock};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Lifecycle states; transitions never skip a state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Created,
    Starting,
    Running,
    Stopping,
    Stopped,
}

/// The composite of watch adapter, resource cache and event dispatch
///
/// Construction wires the store and the bounded queue together; `start`
/// subscribes, waits for the initial sync and launches the workers; `stop`
/// tears everything down cooperatively. Reads (`get`, `list`, `health`) are
/// safe to call concurrently with everything else.
pub struct Pipeline<S, H>
where
    S: WatchSource,
    H: EventHandler<S::Object>,
{
    config: PipelineConfig,
    source: Arc<S>,
    handler: Arc<H>,
    store: ResourceStore<S::Object>,
    queue: Arc<EventQueue<S::Object>>,
    queue_rx: StdMutex<Option<mpsc::Receiver<ChangeEvent<S::Object>>>>,
    state: RwLock<PipelineState>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    last_sync: RwLock<Option<DateTime<Utc>>>,
    last_error: RwLock<Option<String>>,
}

impl<S, H> Pipeline<S, H>
where
    S: WatchSource,
    H: EventHandler<S::Object>,
{
    /// Create a pipeline from a validated configuration
    ///
    /// Zero-valued config fields are defaulted before validation, so an
    /// all-default config is accepted.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` if the configuration is rejected.
    pub fn new(mut config: PipelineConfig, source: S, handler: H) -> Result<Self> {
        config.set_defaults();
        config.validate()?;

        let store = ResourceStore::new(config.max_cache_size);
        let (queue, queue_rx) = EventQueue::new(config.event_queue_capacity);

        info!(
            namespace = %config.namespace,
            workers = config.workers,
            queue_capacity = config.event_queue_capacity,
            resync_secs = config.resync_interval.as_secs(),
            "pipeline initialized"
        );

        Ok(Self {
            config,
            source: Arc::new(source),
            handler: Arc::new(handler),
            store,
            queue: Arc::new(queue),
            queue_rx: StdMutex::new(Some(queue_rx)),
            state: RwLock::new(PipelineState::Created),
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            last_sync: RwLock::new(None),
            last_error: RwLock::new(None),
        })
    }

    /// Subscribe, wait for the initial sync, then launch the workers
    ///
    /// Blocks until the watch source reports `has_synced` or `sync_timeout`
    /// elapses. A sync timeout is fatal to startup: no workers are launched
    /// and the pipeline ends up `Stopped`; retrying means building a new
    /// pipeline.
    ///
    /// # Errors
    ///
    /// `Error::AlreadyStarted` if the pipeline ever left `Created`;
    /// `Error::Sync` if the initial sync missed the deadline; subscription
    /// errors are passed through.
    pub async fn start(&self, sync_timeout: Duration) -> Result<()> {
        self.transition(PipelineState::Created, PipelineState::Starting)
            .map_err(|_| Error::AlreadyStarted)?;

        info!("starting pipeline");

        let notifications = match self.source.subscribe(&self.config.namespace).await {
            Ok(rx) => rx,
            Err(err) => {
                self.record_error(&err);
                // Only claim Stopped if a concurrent stop() has not already.
                let _ = self.transition(PipelineState::Starting, PipelineState::Stopped);
                return Err(err);
            }
        };

        let adapter = WatchAdapter::new(self.store.clone(), Arc::clone(&self.queue));
        let adapter_task = tokio::spawn(adapter.run(
            notifications,
            self.config.resync_interval,
            self.cancel.child_token(),
        ));
        self.tasks.lock().await.push(adapter_task);

        if let Err(err) = self.wait_for_sync(sync_timeout).await {
            self.record_error(&err);
            self.cancel.cancel();
            self.queue.close();
            let _ = self.transition(PipelineState::Starting, PipelineState::Stopped);
            return Err(err);
        }
        *write_lock(&self.last_sync) = Some(Utc::now());

        // A concurrent stop() may have won the race while we were syncing; it
        // already cancelled the token and closed the queue, so launching
        // workers now would resurrect a torn-down pipeline.
        if self
            .transition(PipelineState::Starting, PipelineState::Running)
            .is_err()
        {
            let err = Error::Sync("pipeline stopped during startup".to_string());
            self.record_error(&err);
            return Err(err);
        }

        self.spawn_workers().await;
        info!("pipeline started successfully");
        Ok(())
    }

    /// Stop accepting events, then wait for workers to finish in flight work
    ///
    /// Idempotent: stopping a never-started or already-stopped pipeline is a
    /// successful no-op.
    ///
    /// # Errors
    ///
    /// `Error::ShutdownTimeout` if the drain misses the deadline; the
    /// remaining tasks keep tearing down detached in the background.
    pub async fn stop(&self, drain_timeout: Duration) -> Result<()> {
        {
            let mut state = write_lock(&self.state);
            match *state {
                PipelineState::Starting | PipelineState::Running => {
                    *state = PipelineState::Stopping;
                }
                // Nothing running; nothing to do.
                PipelineState::Created | PipelineState::Stopping | PipelineState::Stopped => {
                    return Ok(());
                }
            }
        }

        info!("stopping pipeline");
        self.cancel.cancel();
        self.queue.close();

        let tasks = std::mem::take(&mut *self.tasks.lock().await);
        let drain = async {
            for task in tasks {
                // A worker that panicked is already gone; joining the rest
                // is all that matters here.
                let _ = task.await;
            }
        };

        match tokio::time::timeout(drain_timeout, drain).await {
            Ok(()) => {
                self.set_state(PipelineState::Stopped);
                info!("pipeline stopped successfully");
                Ok(())
            }
            Err(_) => {
                // Dropping the join handles detaches the tasks; they exit on
                // their own once in-flight handlers return.
                self.set_state(PipelineState::Stopped);
                warn!(
                    timeout_ms = %drain_timeout.as_millis(),
                    "drain deadline elapsed, teardown continues in background"
                );
                Err(Error::ShutdownTimeout(drain_timeout))
            }
        }
    }

    /// Look up one cached object; `None` means not (yet) mirrored
    pub async fn get(&self, namespace: &str, name: &str) -> Option<S::Object> {
        self.store.get(&ObjectKey::new(namespace, name)).await
    }

    /// Snapshot of every cached object at call time, order unspecified
    pub async fn list(&self) -> Vec<S::Object> {
        self.store.list().await
    }

    /// Point-in-time health projection; pure read, no side effects
    pub async fn health(&self) -> HealthSnapshot {
        let state = self.state();
        let last_error = read_lock(&self.last_error).clone();
        let last_sync_time = *read_lock(&self.last_sync);
        HealthSnapshot {
            is_healthy: state == PipelineState::Running && last_error.is_none(),
            last_sync_time,
            cache_size: self.store.len().await,
            worker_count: if state == PipelineState::Running {
                self.config.workers
            } else {
                0
            },
            dropped_events: self.queue.dropped_events(),
            last_error,
        }
    }

    #[must_use]
    pub fn state(&self) -> PipelineState {
        *read_lock(&self.state)
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Poll the source until it reports synced, the deadline elapses, or
    /// cancellation fires
    async fn wait_for_sync(&self, sync_timeout: Duration) -> Result<()> {
        let wait = async {
            loop {
                // Cancellation wins even if the source already reports
                // synced; a stopped pipeline must not keep starting.
                if self.cancel.is_cancelled() {
                    return Err(Error::Sync("cancelled while waiting for sync".to_string()));
                }
                if self.source.has_synced() {
                    return Ok(());
                }
                tokio::select! {
                    () = self.cancel.cancelled() => {
                        return Err(Error::Sync("cancelled while waiting for sync".to_string()));
                    }
                    () = tokio::time::sleep(SYNC_POLL_INTERVAL) => {}
                }
            }
        };

        match tokio::time::timeout(sync_timeout, wait).await {
            Ok(result) => result,
            Err(_) => Err(Error::Sync(format!(
                "initial sync did not complete within {}ms",
                sync_timeout.as_millis()
            ))),
        }
    }

    async fn spawn_workers(&self) {
        let queue_rx = {
            let mut slot = match self.queue_rx.lock() {
                Ok(slot) => slot,
                Err(poisoned) => poisoned.into_inner(),
            };
            slot.take()
        };
        // Present by construction: taken exactly once, on the only start
        // attempt that gets past the Created state.
        let Some(queue_rx) = queue_rx else { return };
        let queue_rx = Arc::new(Mutex::new(queue_rx));

        let mut tasks = self.tasks.lock().await;
        for id in 0..self.config.workers {
            tasks.push(tokio::spawn(run_worker(
                id,
                Arc::clone(&queue_rx),
                Arc::clone(&self.handler),
                self.cancel.child_token(),
            )));
        }
        info!(workers = self.config.workers, "event workers launched");
    }

    fn transition(&self, from: PipelineState, to: PipelineState) -> core::result::Result<(), ()> {
        let mut state = write_lock(&self.state);
        if *state == from {
            *state = to;
            Ok(())
        } else {
            Err(())
        }
    }

    fn set_state(&self, to: PipelineState) {
        *write_lock(&self.state) = to;
    }

    fn record_error(&self, err: &Error) {
        *write_lock(&self.last_error) = Some(err.to_string());
    }
}

fn read_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(std::sync::PoisonError::into_inner)
}

fn write_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}
